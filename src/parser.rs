//! Parsing source text into a [Program].
//!
//! A source text is processed line by line. Everything after an unquoted `#` or `;` is a
//! comment. Each line may start with any number of declarations:
//!
//! - `$p<n>` / `$x<n>` binds power or XBus pin `n` to the register `p<n>` / `x<n>`.
//! - `$name` declares a plain register.
//! - `*name[size]` declares a fixed-size memory `name` and its cursor `name_i`.
//! - `&name` declares a growable memory `name` and its cursor `name_i`.
//! - `name:` declares a label pointing at the next instruction.
//!
//! The rest of the line, if any, is an instruction. A leading `@` marks it as run-once.
//!
//! Test instructions (`teq`, `tgt`, `tlt`, `tcp`) own the `+` and `-` prefixed lines that follow
//! them. Either sign may come first and a blank line ends the block. Both branches may also be
//! written inline: `teq acc 1, + mov "yes" stdout, - mov "no" stdout`.

use std::collections::HashMap;
use std::sync::Arc;

use logos::Logos;
use nom::{
    IResult,
    branch::alt,
    bytes::complete::{take_while, take_while1},
    character::complete::{char, digit1},
    combinator::{cut, map, map_res, not, recognize, value, verify},
    error::context,
    sequence::{delimited, pair, preceded, terminated},
};
use slog::{debug, o, trace, Discard, Logger};

use crate::channel::{Channel, PinKind, PinRegistry};
use crate::config::Config;
use crate::error::{ErrorExt, ErrorKind, ParseError, SyntaxError};
use crate::instruction::{Instruction, OpCode};
use crate::program::{Entry, Program};
use crate::register::{
    MAX_MEMORY_CELLS,
    OffsetRegister,
    PinRegister,
    RegisterRef,
    RegisterTable,
    SizedMemoryRegister,
    UnsizedMemoryRegister,
};
use crate::token::Token;
use crate::value::Value;

type PResult<'a, T> = IResult<&'a str, T, SyntaxError>;

const SPACE_CHARACTERS: &str = " \t";

#[derive(Clone, Copy, Debug, PartialEq)]
enum Declaration<'a> {
    Pin(PinKind, u32),
    Register(&'a str),
    Memory(&'a str, Option<usize>),
    Label(&'a str),
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn sp(input: &str) -> PResult<&str> {
    take_while(|c| SPACE_CHARACTERS.contains(c))(input)
}

fn identifier(input: &str) -> PResult<&str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic()),
        take_while(is_word_char),
    ))(input)
}

fn word_end(input: &str) -> PResult<()> {
    not(take_while1(is_word_char))(input)
}

fn pin_declaration(input: &str) -> PResult<Declaration> {
    map(
        preceded(
            char('$'),
            terminated(
                pair(
                    alt((
                        value(PinKind::Power, char('p')),
                        value(PinKind::XBus, char('x')),
                    )),
                    map_res(digit1, |n: &str| n.parse::<u32>()),
                ),
                word_end,
            ),
        ),
        |(kind, pin)| Declaration::Pin(kind, pin),
    )(input)
}

fn register_declaration(input: &str) -> PResult<Declaration> {
    preceded(
        char('$'),
        context("register declaration", cut(map(
            terminated(identifier, word_end),
            Declaration::Register,
        ))),
    )(input)
}

fn sized_memory_declaration(input: &str) -> PResult<Declaration> {
    preceded(
        char('*'),
        context("memory declaration", cut(map(
            pair(
                identifier,
                delimited(
                    char('['),
                    verify(
                        map_res(digit1, |n: &str| n.parse::<usize>()),
                        |n: &usize| *n > 0 && *n <= MAX_MEMORY_CELLS,
                    ),
                    char(']'),
                ),
            ),
            |(name, size)| Declaration::Memory(name, Some(size)),
        ))),
    )(input)
}

fn unsized_memory_declaration(input: &str) -> PResult<Declaration> {
    preceded(
        char('&'),
        context("memory declaration", cut(map(
            terminated(identifier, word_end),
            |name| Declaration::Memory(name, None),
        ))),
    )(input)
}

fn label_declaration(input: &str) -> PResult<Declaration> {
    map(terminated(identifier, char(':')), Declaration::Label)(input)
}

fn declaration(input: &str) -> PResult<Declaration> {
    preceded(sp, alt((
        pin_declaration,
        register_declaration,
        sized_memory_declaration,
        unsized_memory_declaration,
        label_declaration,
    )))(input)
}

/// Splits `p12` into a power pin and `x3` into an XBus pin.
fn pin_name(name: &str) -> Option<(PinKind, u32)> {
    let kind = match name.chars().next()? {
        'p' => PinKind::Power,
        'x' => PinKind::XBus,
        _ => return None,
    };

    let digits = &name[1..];

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    digits.parse().ok().map(|pin| (kind, pin))
}

/// Cuts the line at the first `#` or `;` that is not inside a string literal.
fn strip_comment(line: &str) -> &str {
    let mut quote = None;
    let mut escaped = false;

    for (i, c) in line.char_indices() {
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => (),
            None => match c {
                '"' | '\'' => quote = Some(c),
                '#' | ';' => return &line[..i],
                _ => (),
            },
        }
    }

    line
}

#[derive(Clone, Copy, Debug)]
struct Line<'s> {
    number: usize,
    raw: &'s str,
    text: &'s str,
}

impl<'s> Line<'s> {
    fn sign(&self) -> Option<char> {
        self.text.chars().next().filter(|c| *c == '+' || *c == '-')
    }

    /// The line with its branch sign removed.
    fn unsigned(&self) -> Line<'s> {
        Line {
            text: self.text[1..].trim_start(),
            ..*self
        }
    }

    fn error(&self, kind: ErrorKind) -> ParseError {
        ParseError::new(self.number, self.raw, kind)
    }
}

fn lex<'s>(line: &Line<'s>) -> Result<Vec<Token<'s>>, ParseError> {
    let mut lexer = Token::lexer(line.text);
    let mut tokens = Vec::new();

    while let Some(token) = lexer.next() {
        if token == Token::Error {
            return Err(line.error(ErrorKind::UnknownToken(lexer.slice().to_string())));
        }

        tokens.push(token);
    }

    Ok(tokens)
}

/// A site that must be checked once every label is known.
struct Reference {
    label: String,
    line: usize,
    source: String,
}

/// Turns the source text of one node into a [Program].
///
/// Pins are resolved against the shared [PinRegistry], so parsing two programs with the same
/// registry connects them.
pub struct Parser<'p> {
    pins: &'p PinRegistry,
    registers: RegisterTable,
    entries: Vec<Entry>,
    jump_table: HashMap<String, usize>,
    labels: Vec<Reference>,
    jumps: Vec<Reference>,
    logger: Logger,
}

impl<'p> Parser<'p> {
    pub fn new(pins: &'p PinRegistry, config: &Config) -> Parser<'p> {
        Parser {
            pins,
            registers: RegisterTable::with_defaults(config),
            entries: Vec::new(),
            jump_table: HashMap::new(),
            labels: Vec::new(),
            jumps: Vec::new(),
            logger: Logger::root(Discard, o!()),
        }
    }

    pub fn with_logger<L>(mut self, logger: L) -> Parser<'p>
    where
        L: Into<Option<Logger>>,
    {
        if let Some(logger) = logger.into() {
            self.logger = logger.new(o!("stage" => "parsing"));
        }

        self
    }

    pub fn parse(mut self, source: &str) -> Result<Program, ParseError> {
        let lines: Vec<Line> = source
            .lines()
            .enumerate()
            .map(|(i, raw)| Line {
                number: i + 1,
                raw,
                text: strip_comment(raw).trim(),
            })
            .collect();

        let mut cursor = 0;

        while cursor < lines.len() {
            let line = lines[cursor];
            cursor += 1;

            let rest = self.declarations(&line)?;

            if rest.is_empty() {
                continue;
            }

            let line = Line { text: rest, ..line };

            if line.sign().is_some() {
                return Err(line.error(ErrorKind::StrayBranch));
            }

            let (run_once, line) = match line.text.strip_prefix('@') {
                Some(text) => (true, Line { text: text.trim_start(), ..line }),
                None => (false, line),
            };

            let (instruction, consumed) = self.instruction(&line, &lines[cursor..])
                .context("instruction")?;

            cursor += consumed;

            trace!(self.logger, "append instruction";
                "line" => line.number,
                "index" => self.entries.len(),
                "instruction" => %instruction);

            self.entries.push(Entry {
                instruction,
                run_once,
                line: line.number,
            });
        }

        self.resolve()?;

        debug!(self.logger, "parsed program";
            "instructions" => self.entries.len(),
            "labels" => self.jump_table.len(),
            "registers" => self.registers.len());

        Ok(Program {
            entries: self.entries,
            jump_table: self.jump_table,
            registers: self.registers,
        })
    }

    /// Applies the declarations at the start of the line and returns what is left of it.
    fn declarations<'s>(&mut self, line: &Line<'s>) -> Result<&'s str, ParseError> {
        let mut rest = line.text;

        loop {
            match declaration(rest) {
                Ok((remaining, declaration)) => {
                    self.declare(line, declaration).context("declaration")?;
                    rest = remaining.trim_start();
                },
                Err(nom::Err::Failure(err)) => {
                    return Err(line.error(ErrorKind::MalformedDeclaration(err.construct())));
                },
                Err(_) => return Ok(rest),
            }
        }
    }

    fn declare(&mut self, line: &Line, declaration: Declaration) -> Result<(), ParseError> {
        match declaration {
            Declaration::Pin(kind, pin) => {
                self.declare_pin(line, kind, pin)?;
            },
            Declaration::Register(name) => {
                self.declare_register(line, name)?;
            },
            Declaration::Memory(name, size) => self.declare_memory(line, name, size)?,
            Declaration::Label(label) => {
                if self.jump_table.contains_key(label) {
                    return Err(line.error(ErrorKind::DuplicateLabel(label.to_string())));
                }

                trace!(self.logger, "add a label to the jump table";
                    "label" => label,
                    "index" => self.entries.len());

                self.jump_table.insert(label.to_string(), self.entries.len());
                self.labels.push(Reference {
                    label: label.to_string(),
                    line: line.number,
                    source: line.raw.to_string(),
                });
            },
        }

        Ok(())
    }

    fn declare_register(&mut self, line: &Line, name: &str) -> Result<RegisterRef, ParseError> {
        match pin_name(name) {
            Some((kind, pin)) => self.declare_pin(line, kind, pin),
            None => Ok(self.registers.declare(name)),
        }
    }

    fn declare_pin(&mut self, line: &Line, kind: PinKind, pin: u32) -> Result<RegisterRef, ParseError> {
        let name = format!("{}{}", kind.prefix(), pin);

        if let Some(register) = self.registers.get(&name) {
            return Ok(register);
        }

        let channel = self.pins
            .channel(pin, kind)
            .map_err(|bound| line.error(ErrorKind::PinConflict { pin, bound }))?;

        debug!(self.logger, "bind pin"; "pin" => pin, "kind" => %kind);

        let register = RegisterRef::new(PinRegister::new(&name, channel));
        self.registers.insert(register.clone());

        Ok(register)
    }

    fn declare_memory(&mut self, line: &Line, name: &str, size: Option<usize>) -> Result<(), ParseError> {
        let cursor = format!("{}_i", name);

        for taken in [name, cursor.as_str()].iter() {
            if self.registers.contains(taken) {
                return Err(line.error(ErrorKind::DuplicateRegister(taken.to_string())));
            }
        }

        let offset = Arc::new(OffsetRegister::new(&cursor));

        let memory = match size {
            Some(size) => RegisterRef::new(SizedMemoryRegister::new(name, offset.clone(), size)),
            None => RegisterRef::new(UnsizedMemoryRegister::new(name, offset.clone())),
        };

        self.registers.insert(memory);
        self.registers.insert(RegisterRef::from_arc(offset));

        Ok(())
    }

    /// Parses the instruction on `line`. Returns the instruction and the number of lines from
    /// `following` it consumed as test branches.
    fn instruction<'s>(&mut self, line: &Line<'s>, following: &[Line<'s>])
        -> Result<(Instruction, usize), ParseError>
    {
        let tokens = lex(line)?;
        self.build(line, &tokens, following)
    }

    fn build<'s>(&mut self, line: &Line<'s>, tokens: &[Token<'s>], following: &[Line<'s>])
        -> Result<(Instruction, usize), ParseError>
    {
        let (mnemonic, operands) = match tokens.split_first() {
            Some((Token::Word(mnemonic), operands)) => (*mnemonic, operands),
            Some((token, _)) => return Err(line.error(ErrorKind::UnknownInstruction {
                mnemonic: token.to_string(),
                suggestion: None,
            })),
            None => return Err(line.error(ErrorKind::UnknownInstruction {
                mnemonic: String::new(),
                suggestion: None,
            })),
        };

        let opcode = OpCode::from_mnemonic(mnemonic)
            .ok_or_else(|| line.error(ErrorKind::UnknownInstruction {
                mnemonic: mnemonic.to_string(),
                suggestion: OpCode::suggest(mnemonic),
            }))?;

        let (operands, branches) = match opcode {
            OpCode::Test(_) => match operands.iter().position(Token::is_branch) {
                Some(split) => operands.split_at(split),
                None => (operands, &[][..]),
            },
            _ => (operands, &[][..]),
        };

        if operands.len() != opcode.operand_count() {
            return Err(line.error(ErrorKind::OperandCount {
                mnemonic: opcode.mnemonic(),
                expected: opcode.operand_count(),
                got: operands.len(),
            }));
        }

        let mut consumed = 0;

        let instruction = match opcode {
            OpCode::NoOperation => Instruction::NoOperation,
            OpCode::End => Instruction::End,
            OpCode::Not => Instruction::Not,
            OpCode::Move => Instruction::Move {
                source: self.value(line, operands, 0)?,
                target: self.register(line, operands, 1)?,
            },
            OpCode::Swap => Instruction::Swap {
                left: self.register(line, operands, 0)?,
                right: self.register(line, operands, 1)?,
            },
            OpCode::Jump => match operands[0] {
                Token::Word(label) => {
                    self.jumps.push(Reference {
                        label: label.to_string(),
                        line: line.number,
                        source: line.raw.to_string(),
                    });

                    Instruction::Jump { label: label.to_string() }
                },
                _ => return Err(line.error(ErrorKind::InvalidOperand {
                    index: 0,
                    reason: "expected a label",
                })),
            },
            OpCode::Sleep => Instruction::Sleep {
                duration: self.value(line, operands, 0)?,
            },
            OpCode::SleepXBus => Instruction::SleepXBus {
                register: self.pin(line, operands, 0, Some(PinKind::XBus))?,
            },
            OpCode::Generate => Instruction::Generate {
                register: self.pin(line, operands, 0, None)?,
                on: self.value(line, operands, 1)?,
                off: self.value(line, operands, 2)?,
            },
            OpCode::Add => Instruction::Add(self.value(line, operands, 0)?),
            OpCode::Subtract => Instruction::Subtract(self.value(line, operands, 0)?),
            OpCode::Multiply => Instruction::Multiply(self.value(line, operands, 0)?),
            OpCode::Divide => Instruction::Divide(self.value(line, operands, 0)?),
            OpCode::Digit => Instruction::Digit(self.value(line, operands, 0)?),
            OpCode::DigitSet => Instruction::DigitSet {
                position: self.value(line, operands, 0)?,
                digit: self.value(line, operands, 1)?,
            },
            OpCode::Cast => Instruction::Cast(self.cast_type(line, operands)?),
            OpCode::Increment => Instruction::Increment(self.register(line, operands, 0)?),
            OpCode::Decrement => Instruction::Decrement(self.register(line, operands, 0)?),
            OpCode::Test(kind) => {
                let left = self.value(line, operands, 0)?;
                let right = self.value(line, operands, 1)?;

                let (positive, negative) = if branches.is_empty() {
                    let (positive, negative, used) = self.block_branches(following)?;
                    consumed = used;
                    (positive, negative)
                } else {
                    self.inline_branches(line, branches)?
                };

                Instruction::Test { kind, left, right, positive, negative }
            },
        };

        Ok((instruction, consumed))
    }

    fn value(&mut self, line: &Line, operands: &[Token], index: usize) -> Result<Value, ParseError> {
        let value = match &operands[index] {
            Token::Int(i) => Value::Int(*i),
            Token::Float(f) => Value::Float(*f),
            Token::Str(s) => Value::Str(s.clone()),
            Token::Register(name) => Value::Ref(self.declare_register(line, name)?),
            Token::Word(name) => self.registers
                .get(name)
                .map(Value::Ref)
                .ok_or_else(|| line.error(ErrorKind::UnknownToken(name.to_string())))?,
            token => return Err(line.error(ErrorKind::UnknownToken(token.to_string()))),
        };

        Ok(value)
    }

    fn register(&mut self, line: &Line, operands: &[Token], index: usize) -> Result<RegisterRef, ParseError> {
        match self.value(line, operands, index)? {
            Value::Ref(register) => Ok(register),
            _ => Err(line.error(ErrorKind::InvalidOperand {
                index,
                reason: "expected a register",
            })),
        }
    }

    /// A register backed by a pin, optionally of a specific kind.
    fn pin(&mut self, line: &Line, operands: &[Token], index: usize, kind: Option<PinKind>)
        -> Result<RegisterRef, ParseError>
    {
        let register = self.register(line, operands, index)?;
        let bound = register.channel().map(Channel::kind);

        let accepted = match kind {
            Some(kind) => bound == Some(kind),
            None => bound.is_some(),
        };

        if !accepted {
            let reason = match kind {
                Some(PinKind::XBus) => "expected an xbus pin",
                _ => "expected a pin",
            };

            return Err(line.error(ErrorKind::InvalidOperand { index, reason }));
        }

        Ok(register)
    }

    /// The operand of `cst`. Bare words that are not registers are type names.
    fn cast_type(&mut self, line: &Line, operands: &[Token]) -> Result<Value, ParseError> {
        let name = match &operands[0] {
            Token::Word(word) if !self.registers.contains(word) => word.to_string(),
            Token::Str(s) => s.clone(),
            _ => return self.value(line, operands, 0),
        };

        if !Value::is_cast_type(&name) {
            return Err(line.error(ErrorKind::InvalidOperand {
                index: 0,
                reason: "unknown cast type",
            }));
        }

        Ok(Value::Str(name))
    }

    /// Consumes the `+`/`-` lines following a test instruction.
    fn block_branches<'s>(&mut self, following: &[Line<'s>])
        -> Result<(Vec<Instruction>, Vec<Instruction>, usize), ParseError>
    {
        let first = match following.first().and_then(Line::sign) {
            Some(sign) => sign,
            None => return Ok((Vec::new(), Vec::new(), 0)),
        };

        let second = if first == '+' { '-' } else { '+' };

        let first_len = following.iter()
            .take_while(|line| line.sign() == Some(first))
            .count();

        let second_len = following[first_len..].iter()
            .take_while(|line| line.sign() == Some(second))
            .count();

        let first_lines: Vec<Line> = following[..first_len]
            .iter()
            .map(Line::unsigned)
            .collect();

        let second_lines: Vec<Line> = following[first_len..first_len + second_len]
            .iter()
            .map(Line::unsigned)
            .collect();

        let first_block = self.block(&first_lines).context("branch")?;
        let second_block = self.block(&second_lines).context("branch")?;

        let (positive, negative) = match first {
            '+' => (first_block, second_block),
            _ => (second_block, first_block),
        };

        Ok((positive, negative, first_len + second_len))
    }

    fn block<'s>(&mut self, lines: &[Line<'s>]) -> Result<Vec<Instruction>, ParseError> {
        let mut instructions = Vec::new();
        let mut cursor = 0;

        while cursor < lines.len() {
            let line = lines[cursor];
            cursor += 1;

            if line.text.is_empty() {
                continue;
            }

            if line.sign().is_some() {
                return Err(line.error(ErrorKind::StrayBranch));
            }

            let (instruction, consumed) = self.instruction(&line, &lines[cursor..])?;
            cursor += consumed;

            instructions.push(instruction);
        }

        Ok(instructions)
    }

    /// Splits `+ ins ... - ins ...` into the two branches.
    fn inline_branches<'s>(&mut self, line: &Line<'s>, branches: &[Token<'s>])
        -> Result<(Vec<Instruction>, Vec<Instruction>), ParseError>
    {
        let mut positive = Vec::new();
        let mut negative = Vec::new();
        let mut rest = branches;

        while let Some((sign, tail)) = rest.split_first() {
            let end = tail.iter().position(Token::is_branch).unwrap_or_else(|| tail.len());
            let (group, next) = tail.split_at(end);
            rest = next;

            if group.is_empty() {
                continue;
            }

            let (instruction, _) = self.build(line, group, &[]).context("branch")?;

            match sign {
                Token::Positive => positive.push(instruction),
                _ => negative.push(instruction),
            }
        }

        Ok((positive, negative))
    }

    /// Checks the jump table once the whole source text has been read.
    fn resolve(&self) -> Result<(), ParseError> {
        for jump in &self.jumps {
            if !self.jump_table.contains_key(&jump.label) {
                return Err(ParseError::new(
                    jump.line,
                    &jump.source,
                    ErrorKind::UnknownLabel(jump.label.clone()),
                ));
            }
        }

        for label in &self.labels {
            let target = self.jump_table.get(&label.label).copied().unwrap_or(0);

            if target >= self.entries.len() {
                return Err(ParseError::new(
                    label.line,
                    &label.source,
                    ErrorKind::TrailingLabel(label.label.clone()),
                ));
            }
        }

        Ok(())
    }
}
