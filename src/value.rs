//! The tagged value algebra shared by registers, channels and instructions.
//!
//! Every operator first flattens both operands, so a [Value::Ref] is read exactly once per
//! operand. Reading a register may have side effects (a random register advances, an XBus pin
//! blocks), which is why flattening and every operator built on it is fallible.

use std::cmp::Ordering;
use std::fmt;

use itertools::Itertools;
use logos::Logos;

use crate::error::{ErrorKind, Fault};
use crate::register::{RegisterRef, RegisterTable};
use crate::token::Token;

/// Longest string, in bytes, that an operator may produce. Anything longer faults the node.
pub const MAX_TEXT_LENGTH: usize = 1 << 20;

/// A value as seen by a running node.
#[derive(Clone)]
pub enum Value {
    Int(i32),
    Float(f32),
    Str(String),
    Null,

    /// A lazy alias of a register. Never stored inside a register; always flattened before
    /// being written or combined.
    Ref(RegisterRef),
}

impl Value {
    /// Parses a single literal token.
    ///
    /// Integers, floats and quoted strings become literals. Any other token must name a
    /// register in `registers`, and becomes a reference to it.
    pub fn parse(token: &str, registers: &RegisterTable) -> Result<Value, ErrorKind> {
        let mut lexer = Token::lexer(token);

        let value = match (lexer.next(), lexer.next()) {
            (Some(Token::Int(i)), None) => Value::Int(i),
            (Some(Token::Float(f)), None) => Value::Float(f),
            (Some(Token::Str(s)), None) => Value::Str(s),
            (Some(Token::Word(name)), None) | (Some(Token::Register(name)), None) => registers
                .get(name)
                .map(Value::Ref)
                .ok_or_else(|| ErrorKind::UnknownToken(token.to_string()))?,
            _ => return Err(ErrorKind::UnknownToken(token.to_string())),
        };

        Ok(value)
    }

    /// Resolves a register reference to the register's current value.
    pub fn flatten(&self) -> Result<Value, Fault> {
        match self {
            Value::Ref(register) => register.get(),
            value => Ok(value.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            _ => false,
        }
    }

    pub fn to_int(&self) -> Result<i32, Fault> {
        Ok(self.flatten()?.int())
    }

    pub fn to_float(&self) -> Result<f32, Fault> {
        Ok(self.flatten()?.float())
    }

    /// The textual form used by string concatenation and the tape registers.
    pub fn text(&self) -> Result<String, Fault> {
        Ok(self.flatten()?.plain_text())
    }

    // The helpers below expect an already flattened value.

    fn int(&self) -> i32 {
        match self {
            Value::Int(i) => *i,
            Value::Float(f) => *f as i32,
            Value::Str(s) => s.trim()
                .parse()
                .ok()
                .or_else(|| s.chars().exactly_one().ok().map(|c| c as i32))
                .unwrap_or(0),
            Value::Null | Value::Ref(_) => 0,
        }
    }

    fn float(&self) -> f32 {
        match self {
            Value::Int(i) => *i as f32,
            Value::Float(f) => *f,
            Value::Str(s) => s.trim().parse().unwrap_or(0.0),
            Value::Null => std::f32::NAN,
            Value::Ref(_) => 0.0,
        }
    }

    fn plain_text(&self) -> String {
        match self {
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format!("{:.8}", f),
            Value::Str(s) => s.clone(),
            Value::Null => "null".to_string(),
            Value::Ref(_) => String::new(),
        }
    }

    pub fn add(&self, rhs: &Value) -> Result<Value, Fault> {
        let (lhs, rhs) = (self.flatten()?, rhs.flatten()?);

        Ok(match (lhs, rhs) {
            (Value::Null, _) => Value::Null,
            (Value::Int(i), Value::Str(s)) => Value::Str(bounded(i.to_string(), s.len())? + &s),
            (Value::Int(i), rhs) => Value::Int(i.wrapping_add(rhs.int())),
            (Value::Float(f), rhs) => Value::Float(f + rhs.float()),
            (Value::Str(s), Value::Null) => Value::Str(s),
            (Value::Str(s), rhs) => {
                let tail = rhs.plain_text();
                Value::Str(bounded(s, tail.len())? + &tail)
            },
            (lhs @ Value::Ref(_), _) => lhs,
        })
    }

    pub fn sub(&self, rhs: &Value) -> Result<Value, Fault> {
        let (lhs, rhs) = (self.flatten()?, rhs.flatten()?);

        Ok(match (lhs, rhs) {
            (Value::Null, _) => Value::Null,
            (Value::Int(i), rhs) => Value::Int(i.wrapping_sub(rhs.int())),
            (Value::Float(f), rhs) => Value::Float(f - rhs.float()),
            (Value::Str(s), Value::Str(pattern)) => Value::Str(s.replacen(&pattern, "", 1)),
            (Value::Str(s), Value::Int(n)) => Value::Str(s.chars().take(n.max(0) as usize).collect()),
            (Value::Str(s), Value::Float(f)) => {
                let keep = (f.abs() * s.chars().count() as f32) as usize;
                Value::Str(s.chars().take(keep).collect())
            },
            (lhs, _) => lhs,
        })
    }

    pub fn mul(&self, rhs: &Value) -> Result<Value, Fault> {
        let (lhs, rhs) = (self.flatten()?, rhs.flatten()?);

        Ok(match (lhs, rhs) {
            (Value::Null, _) => Value::Null,
            (Value::Int(i), rhs) => Value::Int(i.wrapping_mul(rhs.int())),
            (Value::Float(f), rhs) => Value::Float(f * rhs.float()),
            (Value::Str(s), Value::Int(n)) => {
                let n = n.max(0) as usize;
                check_length(s.len().saturating_mul(n))?;
                Value::Str(s.repeat(n))
            },
            (Value::Str(s), Value::Float(f)) => Value::Str(scale(&s, f)?),
            (Value::Str(_), Value::Null) => Value::Str(String::new()),
            (Value::Str(s), Value::Str(t)) => Value::Str({
                let pairs = t.chars().count().saturating_mul(s.len())
                    .saturating_add(s.chars().count().saturating_mul(t.len()));
                check_length(pairs)?;

                s.chars()
                    .cartesian_product(t.chars().collect::<Vec<_>>())
                    .map(|(a, b)| format!("{}{}", a, b))
                    .collect()
            }),
            (lhs, _) => lhs,
        })
    }

    pub fn div(&self, rhs: &Value) -> Result<Value, Fault> {
        let (lhs, rhs) = (self.flatten()?, rhs.flatten()?);

        match (lhs, rhs) {
            (Value::Null, _) => Ok(Value::Null),
            (Value::Int(i), rhs) => match rhs.int() {
                0 => Err(Fault::DivisionByZero),
                d => Ok(Value::Int(i.wrapping_div(d))),
            },
            (Value::Float(f), rhs) => {
                let d = rhs.float();

                if d == 0.0 {
                    return Err(Fault::DivisionByZero);
                }

                Ok(Value::Float(f / d))
            },
            (lhs, _) => Ok(lhs),
        }
    }

    /// Logical not on numbers (zero becomes 100, anything else 0), bytewise complement of
    /// every character on strings.
    pub fn not(&self) -> Result<Value, Fault> {
        Ok(match self.flatten()? {
            Value::Int(i) => Value::Int(if i == 0 { 100 } else { 0 }),
            Value::Float(f) => Value::Int(if f as i32 == 0 { 100 } else { 0 }),
            Value::Str(s) => Value::Str(s.chars().map(|c| (!(c as u32 as u8)) as char).collect()),
            other => other,
        })
    }

    /// Extracts the `index`-th digit (from the left) of a number, or the `index`-th character
    /// of a string.
    pub fn dgt(&self, index: i32) -> Result<Value, Fault> {
        let value = self.flatten()?;

        let position = match index {
            i if i < 0 => None,
            i => Some(i as usize),
        };

        Ok(match value {
            Value::Int(_) | Value::Float(_) => {
                let digit = position
                    .and_then(|i| value.int().to_string().chars().nth(i))
                    .and_then(|c| c.to_digit(10))
                    .unwrap_or(0);

                Value::Int(digit as i32)
            },
            Value::Str(s) => Value::Str(
                position
                    .and_then(|i| s.chars().nth(i))
                    .map(String::from)
                    .unwrap_or_default()
            ),
            other => other,
        })
    }

    /// Overwrites the `index`-th digit of a number with the most significant digit of `digit`,
    /// or the `index`-th character of a string with the text of `digit`.
    pub fn dst(&self, index: i32, digit: &Value) -> Result<Value, Fault> {
        let value = self.flatten()?;
        let digit = digit.flatten()?;

        if index < 0 {
            return Ok(value);
        }

        let index = index as usize;

        Ok(match value {
            Value::Int(_) | Value::Float(_) => {
                let number = value.int();
                let replacement = (digit.int() as i64).abs().to_string();

                Value::Int(replace_at(&number.to_string(), index, &replacement[..1])
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(number))
            },
            Value::Str(s) => {
                let replaced = replace_at(&s, index, &digit.plain_text());
                Value::Str(replaced.unwrap_or(s))
            },
            other => other,
        })
    }

    /// Re-types the value. `kind` is either a type name (`"i"`, `"f"`, `"s"`, `"c"` or
    /// `"i<radix>"`) or a value whose variant is copied.
    pub fn cast(&self, kind: &Value) -> Result<Value, Fault> {
        let value = self.flatten()?;

        match kind.flatten()? {
            Value::Str(name) => cast_named(value, &name),
            Value::Int(_) => Ok(Value::Int(value.int())),
            Value::Float(_) => Ok(Value::Float(value.float())),
            Value::Null => Ok(Value::Null),
            Value::Ref(_) => Ok(value),
        }
    }

    /// Checks whether `name` is accepted by [Value::cast] as a type name.
    pub fn is_cast_type(name: &str) -> bool {
        match name {
            "i" | "f" | "s" | "c" => true,
            radix if radix.starts_with('i') => radix[1..]
                .parse::<u32>()
                .map(|radix| radix >= 2 && radix <= 36)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Compares two values.
    ///
    /// `Null` equals `Null` and blank (or NUL) strings, and is less than anything else.
    /// Otherwise the left operand decides how the right one is coerced.
    pub fn compare(&self, other: &Value) -> Result<Ordering, Fault> {
        let (lhs, rhs) = (self.flatten()?, other.flatten()?);

        Ok(match (&lhs, &rhs) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, Value::Str(s)) if is_blank(s) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (Value::Str(s), Value::Null) if is_blank(s) => Ordering::Equal,
            (_, Value::Null) => Ordering::Greater,
            (Value::Int(i), rhs) => i.cmp(&rhs.int()),
            (Value::Float(f), rhs) => compare_floats(*f, rhs.float()),
            (Value::Str(s), rhs) => s.as_str().cmp(rhs.plain_text().as_str()),
            (Value::Ref(_), _) => Ordering::Equal,
        })
    }
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty() || s == "\u{0}"
}

fn compare_floats(lhs: f32, rhs: f32) -> Ordering {
    match (lhs.is_nan(), rhs.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => lhs.partial_cmp(&rhs).unwrap_or(Ordering::Equal),
    }
}

/// Repeats the characters of `s` until `factor * len` characters have been produced.
fn check_length(length: usize) -> Result<(), Fault> {
    match length {
        length if length > MAX_TEXT_LENGTH => Err(Fault::OutOfMemory {
            requested: length,
            limit: MAX_TEXT_LENGTH,
        }),
        _ => Ok(()),
    }
}

/// Passes `s` through if it can grow by `extra` bytes without exceeding [MAX_TEXT_LENGTH].
fn bounded(s: String, extra: usize) -> Result<String, Fault> {
    check_length(s.len().saturating_add(extra))?;
    Ok(s)
}

fn scale(s: &str, factor: f32) -> Result<String, Fault> {
    let len = s.chars().count();
    let total = (factor * len as f32) as i64;

    if len == 0 || total <= 0 {
        return Ok(String::new());
    }

    let widest = s.chars().map(char::len_utf8).max().unwrap_or(1);
    check_length((total as usize).saturating_mul(widest))?;

    Ok(s.chars().cycle().take(total as usize).collect())
}

fn replace_at(s: &str, index: usize, replacement: &str) -> Option<String> {
    let chars: Vec<char> = s.chars().collect();

    if index >= chars.len() {
        return None;
    }

    let mut out: String = chars[..index].iter().collect();
    out.push_str(replacement);
    out.extend(&chars[index + 1..]);

    Some(out)
}

fn cast_named(value: Value, name: &str) -> Result<Value, Fault> {
    let cast = match name {
        "c" => match value {
            Value::Int(i) => Value::Str(
                std::char::from_u32(i as u32).map(String::from).unwrap_or_default()
            ),
            Value::Str(s) => Value::Int(s.chars().next().map(|c| c as i32).unwrap_or(0)),
            _ => Value::Int(-1),
        },
        "i" => Value::Int(value.int()),
        "f" => Value::Float(value.float()),
        "s" => Value::Str(value.plain_text()),
        radix if Value::is_cast_type(radix) => {
            let radix = radix[1..].parse().map_err(|_| Fault::InvalidCast(name.to_string()))?;

            i32::from_str_radix(value.plain_text().trim(), radix)
                .map(Value::Int)
                .map_err(|_| Fault::InvalidCast(name.to_string()))?
        },
        _ => return Err(Fault::InvalidCast(name.to_string())),
    };

    Ok(cast)
}

impl PartialEq for Value {
    /// Structural equality. For the language's notion of equality see [Value::compare].
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Ref(a), Value::Ref(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "Int({})", i),
            Value::Float(x) => write!(f, "Float({})", x),
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Null => write!(f, "Null"),
            Value::Ref(register) => write!(f, "Ref({:?})", register),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Ref(register) => write!(f, "{:?}", register),
            other => write!(f, "{}", other.plain_text()),
        }
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Value {
        Value::Int(i)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Value {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Str(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::register::{PlainRegister, Register};

    fn s(s: &str) -> Value {
        Value::Str(s.to_string())
    }

    #[test]
    fn test_flatten_is_idempotent() {
        let register = RegisterRef::new(PlainRegister::new("a"));
        register.put(Value::Int(7)).unwrap();

        let values = vec![
            Value::Int(1),
            Value::Float(1.5),
            s("x"),
            Value::Null,
            Value::Ref(register),
        ];

        for v in values {
            let once = v.flatten().unwrap();
            assert_eq!(once.flatten().unwrap(), once);
        }
    }

    #[test]
    fn test_not() {
        assert_eq!(Value::Int(0).not().unwrap(), Value::Int(100));
        assert_eq!(Value::Int(5).not().unwrap(), Value::Int(0));
        assert_eq!(Value::Int(0).not().unwrap().not().unwrap(), Value::Int(0));
        assert_eq!(Value::Int(100).not().unwrap().not().unwrap(), Value::Int(100));
        assert_eq!(Value::Float(0.5).not().unwrap(), Value::Int(100));

        let complemented = s("ab").not().unwrap();
        assert_ne!(complemented, s("ab"));
        assert_eq!(complemented.not().unwrap(), s("ab"));
    }

    #[test]
    fn test_string_arithmetic() {
        assert_eq!(s("ab").mul(&Value::Int(3)).unwrap(), s("ababab"));
        assert_eq!(s("ab").mul(&s("xy")).unwrap(), s("axaybxby"));
        assert_eq!(s("abcd").mul(&Value::Float(0.5)).unwrap(), s("ab"));
        assert_eq!(s("ab").mul(&Value::Float(1.5)).unwrap(), s("aba"));

        assert_eq!(s("hello world").sub(&s("o")).unwrap(), s("hell world"));
        assert_eq!(s("hello").sub(&Value::Int(2)).unwrap(), s("he"));
        assert_eq!(s("hello").sub(&Value::Int(10)).unwrap(), s("hello"));
        assert_eq!(s("abcd").sub(&Value::Float(0.75)).unwrap(), s("abc"));

        assert_eq!(s("n=").add(&Value::Int(4)).unwrap(), s("n=4"));
        assert_eq!(Value::Int(4).add(&s("x")).unwrap(), s("4x"));
        assert_eq!(s("abc").div(&Value::Int(0)).unwrap(), s("abc"));
    }

    #[test]
    fn test_numeric_arithmetic() {
        assert_eq!(Value::Int(7).div(&Value::Int(2)).unwrap(), Value::Int(3));
        assert_eq!(Value::Int(-7).div(&Value::Int(2)).unwrap(), Value::Int(-3));
        assert_eq!(Value::Float(7.0).div(&Value::Int(2)).unwrap(), Value::Float(3.5));
        assert_eq!(Value::Int(2).add(&Value::Float(1.9)).unwrap(), Value::Int(3));
        assert_eq!(Value::Int(2).mul(&s("21")).unwrap(), Value::Int(42));

        assert_eq!(Value::Int(1).div(&Value::Int(0)), Err(Fault::DivisionByZero));
        assert_eq!(Value::Float(1.0).div(&Value::Float(0.0)), Err(Fault::DivisionByZero));
    }

    #[test]
    fn test_null_absorbs_from_the_left() {
        assert_eq!(Value::Null.add(&Value::Int(1)).unwrap(), Value::Null);
        assert_eq!(Value::Null.mul(&s("ab")).unwrap(), Value::Null);
        assert_eq!(Value::Null.div(&Value::Int(0)).unwrap(), Value::Null);
        assert_eq!(Value::Null.not().unwrap(), Value::Null);
    }

    #[test]
    fn test_null_right_operand() {
        assert_eq!(Value::Int(5).add(&Value::Null).unwrap(), Value::Int(5));
        assert_eq!(Value::Int(5).mul(&Value::Null).unwrap(), Value::Int(0));
        assert_eq!(Value::Int(5).div(&Value::Null), Err(Fault::DivisionByZero));

        match Value::Float(1.5).add(&Value::Null).unwrap() {
            Value::Float(f) => assert!(f.is_nan()),
            other => panic!("expected a float, got {:?}", other),
        }

        assert_eq!(s("ab").add(&Value::Null).unwrap(), s("ab"));
        assert_eq!(s("ab").sub(&Value::Null).unwrap(), s("ab"));
        assert_eq!(s("ab").mul(&Value::Null).unwrap(), s(""));
        assert_eq!(s("ab").div(&Value::Null).unwrap(), s("ab"));
    }

    #[test]
    fn test_text_growth_is_bounded() {
        let limit = MAX_TEXT_LENGTH;
        let half = s(&"x".repeat(limit / 2));

        assert_eq!(half.mul(&Value::Int(2)).unwrap(), s(&"x".repeat(limit)));

        assert_eq!(
            s("ab").mul(&Value::Int(std::i32::MAX)),
            Err(Fault::OutOfMemory { requested: 2 * std::i32::MAX as usize, limit }),
        );
        assert_eq!(
            half.mul(&half),
            Err(Fault::OutOfMemory { requested: 2 * (limit / 2) * (limit / 2), limit }),
        );

        match s("ab").mul(&Value::Float(1.0e12)) {
            Err(Fault::OutOfMemory { .. }) => (),
            other => panic!("expected an allocation fault, got {:?}", other),
        }

        let full = s(&"x".repeat(limit));
        match full.add(&s("y")) {
            Err(Fault::OutOfMemory { requested, .. }) => assert_eq!(requested, limit + 1),
            other => panic!("expected an allocation fault, got {:?}", other),
        }
    }

    #[test]
    fn test_null_comparison() {
        assert_eq!(Value::Null.compare(&Value::Null).unwrap(), Ordering::Equal);
        assert_eq!(Value::Null.compare(&s("")).unwrap(), Ordering::Equal);
        assert_eq!(Value::Null.compare(&s("   ")).unwrap(), Ordering::Equal);
        assert_eq!(Value::Null.compare(&s("\u{0}")).unwrap(), Ordering::Equal);
        assert_eq!(s("  \r\n").compare(&Value::Null).unwrap(), Ordering::Equal);
        assert_eq!(Value::Null.compare(&Value::Int(1)).unwrap(), Ordering::Less);
        assert_eq!(Value::Int(1).compare(&Value::Null).unwrap(), Ordering::Greater);
    }

    #[test]
    fn test_compare_coerces_right_operand() {
        assert_eq!(Value::Int(10).compare(&s("9")).unwrap(), Ordering::Greater);
        assert_eq!(s("10").compare(&Value::Int(9)).unwrap(), Ordering::Less);
        assert_eq!(Value::Float(1.5).compare(&Value::Int(1)).unwrap(), Ordering::Greater);
    }

    #[test]
    fn test_digits() {
        assert_eq!(Value::Int(4721).dgt(1).unwrap(), Value::Int(7));
        assert_eq!(Value::Int(4721).dgt(9).unwrap(), Value::Int(0));
        assert_eq!(s("abc").dgt(2).unwrap(), s("c"));
        assert_eq!(s("abc").dgt(3).unwrap(), s(""));

        assert_eq!(Value::Int(4721).dst(0, &Value::Int(93)).unwrap(), Value::Int(9721));
        assert_eq!(Value::Int(4721).dst(7, &Value::Int(9)).unwrap(), Value::Int(4721));
        assert_eq!(s("abc").dst(1, &s("XY")).unwrap(), s("aXYc"));
    }

    #[test]
    fn test_cast() {
        assert_eq!(s("42").cast(&s("i")).unwrap(), Value::Int(42));
        assert_eq!(Value::Int(3).cast(&s("f")).unwrap(), Value::Float(3.0));
        assert_eq!(Value::Int(3).cast(&s("s")).unwrap(), s("3"));
        assert_eq!(Value::Int(65).cast(&s("c")).unwrap(), s("A"));
        assert_eq!(s("A").cast(&s("c")).unwrap(), Value::Int(65));
        assert_eq!(s("ff").cast(&s("i16")).unwrap(), Value::Int(255));
        assert_eq!(s("102").cast(&s("i2")), Err(Fault::InvalidCast("i2".into())));
        assert_eq!(s("1").cast(&s("q")), Err(Fault::InvalidCast("q".into())));
        assert_eq!(Value::Float(2.7).cast(&Value::Int(0)).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_parse_literals() {
        let registers = RegisterTable::with_defaults(&Config::default());

        assert_eq!(Value::parse("12", &registers), Ok(Value::Int(12)));
        assert_eq!(Value::parse("-3", &registers), Ok(Value::Int(-3)));
        assert_eq!(Value::parse("1.25", &registers), Ok(Value::Float(1.25)));
        assert_eq!(Value::parse(r#""a\tb""#, &registers), Ok(s("a\tb")));
        assert_eq!(Value::parse("'q'", &registers), Ok(s("q")));

        match Value::parse("acc", &registers) {
            Ok(Value::Ref(register)) => assert_eq!(register.identifier(), "acc"),
            other => panic!("expected a register reference, got {:?}", other),
        }

        assert_eq!(
            Value::parse("nothing", &registers),
            Err(ErrorKind::UnknownToken("nothing".into())),
        );
    }
}
