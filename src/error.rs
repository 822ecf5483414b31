//! Error types for compiling and running nodes.
//!
//! Compilation problems are reported as a [ParseError] carrying the offending line. Problems
//! raised while a node runs are [Faults](Fault); a fault terminates the node that raised it and
//! nothing else.

use std::fmt::{self, Display};
use std::io;

use itertools::Itertools;
use nom::error::ErrorKind as NomErrorKind;

use crate::channel::{Operation, PinKind};

#[derive(Debug, Clone)]
enum InnerError {
    Context(&'static str),
    Nom(NomErrorKind),
}

impl fmt::Display for InnerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InnerError::Context(ctx) => write!(f, "invalid {}", ctx),
            InnerError::Nom(_err) => write!(f, "unexpected input"),
        }
    }
}

/// Error type of the nom parsers that classify declaration prefixes.
///
/// Keeps every context label that was attached on the way up, so the outermost one can be
/// used to name the malformed construct.
#[derive(Clone, Debug)]
pub struct SyntaxError {
    stack: Vec<(String, InnerError)>,
}

impl SyntaxError {
    /// The outermost context label, e.g. `"memory declaration"`.
    pub(crate) fn construct(&self) -> &'static str {
        self.stack
            .iter()
            .rev()
            .find_map(|(_, inner)| match inner {
                InnerError::Context(ctx) => Some(*ctx),
                InnerError::Nom(_) => None,
            })
            .unwrap_or("declaration")
    }
}

impl Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.stack.last() {
            Some((rest, kind)) => write!(f, "{} at: {}", kind, rest),
            None => write!(f, "unexpected input"),
        }
    }
}

impl<'a> nom::error::ParseError<&'a str> for SyntaxError {
    fn from_error_kind(input: &'a str, kind: NomErrorKind) -> Self {
        SyntaxError {
            stack: vec![(input.to_string(), InnerError::Nom(kind))],
        }
    }

    fn append(input: &'a str, kind: NomErrorKind, mut other: Self) -> Self {
        other.stack.push((input.to_string(), InnerError::Nom(kind)));
        other
    }

    fn add_context(input: &'a str, ctx: &'static str, mut other: Self) -> Self {
        other.stack.push((input.to_string(), InnerError::Context(ctx)));
        other
    }
}

/// The reason a source text could not be compiled.
#[derive(Clone, Debug, PartialEq)]
pub enum ErrorKind {
    /// The first word of an instruction is not a known mnemonic.
    UnknownInstruction {
        mnemonic: String,
        /// The closest known mnemonic, if one is close enough to be a likely typo.
        suggestion: Option<&'static str>,
    },

    /// The instruction was given the wrong number of operands.
    OperandCount {
        mnemonic: &'static str,
        expected: usize,
        got: usize,
    },

    /// An operand has the wrong kind, e.g. a literal where a register is required.
    InvalidOperand {
        index: usize,
        reason: &'static str,
    },

    /// A token is neither a literal nor the name of a known register.
    UnknownToken(String),

    /// A jump names a label that is never declared.
    UnknownLabel(String),

    /// A label is declared twice.
    DuplicateLabel(String),

    /// A label is declared after the last instruction.
    TrailingLabel(String),

    /// A line starts like a declaration but does not finish like one.
    MalformedDeclaration(&'static str),

    /// A memory declaration reuses the name of an existing register.
    DuplicateRegister(String),

    /// A pin id is used with both channel kinds.
    PinConflict {
        pin: u32,
        bound: PinKind,
    },

    /// A `+` or `-` branch line that does not belong to a test instruction.
    StrayBranch,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::UnknownInstruction { mnemonic, suggestion: Some(suggestion) } =>
                write!(f, "unknown instruction '{}', did you mean '{}'?", mnemonic, suggestion),
            ErrorKind::UnknownInstruction { mnemonic, suggestion: None } =>
                write!(f, "unknown instruction '{}'", mnemonic),
            ErrorKind::OperandCount { mnemonic, expected, got } =>
                write!(f, "'{}' takes {} operand(s), got {}", mnemonic, expected, got),
            ErrorKind::InvalidOperand { index, reason } =>
                write!(f, "invalid operand {}: {}", index + 1, reason),
            ErrorKind::UnknownToken(token) =>
                write!(f, "unknown token '{}'", token),
            ErrorKind::UnknownLabel(label) =>
                write!(f, "unknown label '{}'", label),
            ErrorKind::DuplicateLabel(label) =>
                write!(f, "label '{}' already defined", label),
            ErrorKind::TrailingLabel(label) =>
                write!(f, "label '{}' has no instruction to land on", label),
            ErrorKind::MalformedDeclaration(construct) =>
                write!(f, "malformed {}", construct),
            ErrorKind::DuplicateRegister(name) =>
                write!(f, "register '{}' already declared", name),
            ErrorKind::PinConflict { pin, bound } =>
                write!(f, "pin {} is already bound to a {} channel", pin, bound),
            ErrorKind::StrayBranch =>
                write!(f, "branch line without a test instruction"),
        }
    }
}

/// Error type that contains the reason of the error and its location in the source text.
#[derive(Clone, Debug)]
pub struct ParseError {
    /// The line number (1-based) of the offending line.
    pub line: usize,
    /// The offending line, as written.
    pub source: String,
    kind: ErrorKind,
    context: Vec<&'static str>,
}

impl ParseError {
    pub(crate) fn new(line: usize, source: &str, kind: ErrorKind) -> ParseError {
        ParseError {
            line,
            source: source.trim().to_string(),
            kind,
            context: Vec::new(),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

pub(crate) trait ErrorExt {
    fn context(self, ctx: &'static str) -> Self;
}

impl<R> ErrorExt for Result<R, ParseError> {
    fn context(mut self, ctx: &'static str) -> Self {
        if let Err(ref mut err) = self {
            err.context.push(ctx);
        }

        self
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let end = self.source
            .char_indices()
            .nth(40)
            .map(|(i, _)| i)
            .unwrap_or(self.source.len());

        let rest = &self.source[..end];

        if self.context.is_empty() {
            write!(f, "at line {}: {}, at '{}'", self.line, self.kind, rest)
        } else {
            let ctx = self.context.iter().rev().join(": ");
            write!(f, "at line {}: {}: {}, at '{}'", self.line, ctx, self.kind, rest)
        }
    }
}

impl std::error::Error for ParseError {}

/// A fatal error raised while a node executes an instruction.
#[derive(Clone, Debug, PartialEq)]
pub enum Fault {
    /// An integer or float division by zero.
    DivisionByZero,

    /// `cst` was given an unknown type or a radix the value cannot be read in.
    InvalidCast(String),

    /// An XBus operation did not find a partner before the channel timeout.
    Desynchronized {
        pin: u32,
        operation: Operation,
    },

    /// A jump to a label missing from the jump table.
    UnknownLabel(String),

    /// Reading from or writing to a stream register failed.
    Io(String),

    /// A string or memory would have grown past its limit.
    OutOfMemory {
        requested: usize,
        limit: usize,
    },

    /// The node's thread terminated abnormally.
    Aborted,

    /// [Node::start](crate::node::Node::start) or [Node::run](crate::node::Node::run) was
    /// called on a node that is already running.
    AlreadyRunning,
}

impl Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Fault::DivisionByZero => write!(f, "division by zero"),
            Fault::InvalidCast(cast) => write!(f, "invalid cast: '{}'", cast),
            Fault::Desynchronized { pin, operation } =>
                write!(f, "xbus {} desynchronized while waiting to {}", pin, operation),
            Fault::UnknownLabel(label) => write!(f, "jump to unknown label '{}'", label),
            Fault::Io(msg) => write!(f, "io error: {}", msg),
            Fault::OutOfMemory { requested, limit } =>
                write!(f, "out of memory: {} requested, limit is {}", requested, limit),
            Fault::Aborted => write!(f, "node aborted"),
            Fault::AlreadyRunning => write!(f, "node is already running"),
        }
    }
}

impl std::error::Error for Fault {}

impl From<io::Error> for Fault {
    fn from(err: io::Error) -> Fault {
        Fault::Io(err.to_string())
    }
}
