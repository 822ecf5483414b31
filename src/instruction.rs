//! Types for representing instructions and executing them.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use lazy_static::lazy_static;

use crate::channel::Channel;
use crate::error::Fault;
use crate::register::RegisterRef;
use crate::value::Value;

/// The comparison a test instruction performs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TestKind {
    /// Runs the positive branch if the operands are equal. (`teq`)
    Equal,

    /// Runs the positive branch if the left operand is greater. (`tgt`)
    Greater,

    /// Runs the positive branch if the left operand is less. (`tlt`)
    Less,

    /// Runs the positive branch if the left operand is greater, the negative branch if it is
    /// less and neither if they are equal. (`tcp`)
    Compare,
}

/// Every instruction of the language, without operands.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Does nothing besides advancing the program counter.
    NoOperation,

    /// Stops the node.
    End,

    /// Copies a value into a register.
    Move,

    /// Exchanges the values of two registers.
    Swap,

    /// Continues execution at a label.
    Jump,

    /// Sleeps for a number of clock ticks.
    Sleep,

    /// Sleeps until an XBus pin has a value waiting.
    SleepXBus,

    /// Emits a pulse on a pin.
    Generate,

    Add,
    Subtract,
    Multiply,
    Divide,
    Not,

    /// Reads one digit of the accumulator.
    Digit,

    /// Overwrites one digit of the accumulator.
    DigitSet,

    /// Re-types the accumulator.
    Cast,

    /// Increments a register and copies the result into the accumulator.
    Increment,

    /// Decrements a register and copies the result into the accumulator.
    Decrement,

    Test(TestKind),
}

lazy_static! {
    static ref MNEMONICS: HashMap<&'static str, OpCode> = {
        let mut map = HashMap::new();

        for opcode in OpCode::ALL.iter() {
            map.insert(opcode.mnemonic(), *opcode);
        }

        map
    };
}

impl OpCode {
    pub const ALL: [OpCode; 22] = [
        OpCode::NoOperation,
        OpCode::End,
        OpCode::Move,
        OpCode::Swap,
        OpCode::Jump,
        OpCode::Sleep,
        OpCode::SleepXBus,
        OpCode::Generate,
        OpCode::Add,
        OpCode::Subtract,
        OpCode::Multiply,
        OpCode::Divide,
        OpCode::Not,
        OpCode::Digit,
        OpCode::DigitSet,
        OpCode::Cast,
        OpCode::Increment,
        OpCode::Decrement,
        OpCode::Test(TestKind::Equal),
        OpCode::Test(TestKind::Greater),
        OpCode::Test(TestKind::Less),
        OpCode::Test(TestKind::Compare),
    ];

    pub fn mnemonic(&self) -> &'static str {
        match self {
            OpCode::NoOperation => "nop",
            OpCode::End => "end",
            OpCode::Move => "mov",
            OpCode::Swap => "swp",
            OpCode::Jump => "jmp",
            OpCode::Sleep => "slp",
            OpCode::SleepXBus => "slx",
            OpCode::Generate => "gen",
            OpCode::Add => "add",
            OpCode::Subtract => "sub",
            OpCode::Multiply => "mul",
            OpCode::Divide => "div",
            OpCode::Not => "not",
            OpCode::Digit => "dgt",
            OpCode::DigitSet => "dst",
            OpCode::Cast => "cst",
            OpCode::Increment => "inc",
            OpCode::Decrement => "dec",
            OpCode::Test(TestKind::Equal) => "teq",
            OpCode::Test(TestKind::Greater) => "tgt",
            OpCode::Test(TestKind::Less) => "tlt",
            OpCode::Test(TestKind::Compare) => "tcp",
        }
    }

    /// Looks up a mnemonic, ignoring case.
    pub fn from_mnemonic(mnemonic: &str) -> Option<OpCode> {
        MNEMONICS.get(mnemonic.to_lowercase().as_str()).copied()
    }

    /// The known mnemonic closest to `mnemonic`, if it is within two edits.
    pub fn suggest(mnemonic: &str) -> Option<&'static str> {
        let mnemonic = mnemonic.to_lowercase();

        MNEMONICS.keys()
            .map(|known| (edit_distance::edit_distance(&mnemonic, known), *known))
            .filter(|(distance, _)| *distance <= 2)
            .min()
            .map(|(_, known)| known)
    }

    /// The number of operands the instruction takes, not counting test branches.
    pub fn operand_count(&self) -> usize {
        match self {
            OpCode::NoOperation | OpCode::End | OpCode::Not => 0,
            OpCode::Jump
            | OpCode::Sleep
            | OpCode::SleepXBus
            | OpCode::Add
            | OpCode::Subtract
            | OpCode::Multiply
            | OpCode::Divide
            | OpCode::Digit
            | OpCode::Cast
            | OpCode::Increment
            | OpCode::Decrement => 1,
            OpCode::Move | OpCode::Swap | OpCode::DigitSet | OpCode::Test(_) => 2,
            OpCode::Generate => 3,
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// The view of a running node that instructions act on.
pub trait Machine {
    fn accumulator(&self) -> RegisterRef;

    /// Makes the next instruction the one at `label`.
    fn jump_to(&mut self, label: &str) -> Result<(), Fault>;

    /// Stops the node after the current instruction.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Blocks for `units` clock ticks. Returns immediately while the clock is disabled.
    fn sleep(&mut self, units: i32);
}

/// A fully parsed instruction with its operands.
#[derive(Clone, Debug)]
pub enum Instruction {
    NoOperation,
    End,
    Move {
        source: Value,
        target: RegisterRef,
    },
    Swap {
        left: RegisterRef,
        right: RegisterRef,
    },
    Jump {
        label: String,
    },
    Sleep {
        duration: Value,
    },
    SleepXBus {
        register: RegisterRef,
    },
    Generate {
        register: RegisterRef,
        on: Value,
        off: Value,
    },
    Add(Value),
    Subtract(Value),
    Multiply(Value),
    Divide(Value),
    Not,
    Digit(Value),
    DigitSet {
        position: Value,
        digit: Value,
    },
    Cast(Value),
    Increment(RegisterRef),
    Decrement(RegisterRef),
    Test {
        kind: TestKind,
        left: Value,
        right: Value,
        positive: Vec<Instruction>,
        negative: Vec<Instruction>,
    },
}

fn accumulate<F>(machine: &mut dyn Machine, op: F) -> Result<(), Fault>
where
    F: FnOnce(&Value) -> Result<Value, Fault>,
{
    let accumulator = machine.accumulator();
    let result = op(&accumulator.get()?)?;
    accumulator.put(result)
}

fn step(machine: &mut dyn Machine, register: &RegisterRef, delta: i32) -> Result<(), Fault> {
    let result = register.get()?.add(&Value::Int(delta))?;
    machine.accumulator().put(result.clone())?;
    register.put(result)
}

impl Instruction {
    pub fn opcode(&self) -> OpCode {
        match self {
            Instruction::NoOperation => OpCode::NoOperation,
            Instruction::End => OpCode::End,
            Instruction::Move { .. } => OpCode::Move,
            Instruction::Swap { .. } => OpCode::Swap,
            Instruction::Jump { .. } => OpCode::Jump,
            Instruction::Sleep { .. } => OpCode::Sleep,
            Instruction::SleepXBus { .. } => OpCode::SleepXBus,
            Instruction::Generate { .. } => OpCode::Generate,
            Instruction::Add(_) => OpCode::Add,
            Instruction::Subtract(_) => OpCode::Subtract,
            Instruction::Multiply(_) => OpCode::Multiply,
            Instruction::Divide(_) => OpCode::Divide,
            Instruction::Not => OpCode::Not,
            Instruction::Digit(_) => OpCode::Digit,
            Instruction::DigitSet { .. } => OpCode::DigitSet,
            Instruction::Cast(_) => OpCode::Cast,
            Instruction::Increment(_) => OpCode::Increment,
            Instruction::Decrement(_) => OpCode::Decrement,
            Instruction::Test { kind, .. } => OpCode::Test(*kind),
        }
    }

    /// Executes the instruction against `machine`.
    ///
    /// Every register operand is read at most once.
    pub fn execute(&self, machine: &mut dyn Machine) -> Result<(), Fault> {
        match self {
            Instruction::NoOperation => {},
            Instruction::End => machine.stop(),
            Instruction::Move { source, target } => target.put(source.flatten()?)?,
            Instruction::Swap { left, right } => {
                let (a, b) = (left.get()?, right.get()?);
                left.put(b)?;
                right.put(a)?;
            },
            Instruction::Jump { label } => machine.jump_to(label)?,
            Instruction::Sleep { duration } => {
                let duration = duration.to_int()?;
                machine.sleep(duration);
            },
            Instruction::SleepXBus { register } => {
                if let Some(Channel::XBus(bus)) = register.channel() {
                    bus.sleep()?;
                }
            },
            Instruction::Generate { register, on, off } => {
                let (on, off) = (on.to_int()?, off.to_int()?);

                register.put(Value::Int(100))?;
                machine.sleep(on);
                register.put(Value::Int(0))?;
                machine.sleep(off);
            },
            Instruction::Add(value) => accumulate(machine, |acc| acc.add(value))?,
            Instruction::Subtract(value) => accumulate(machine, |acc| acc.sub(value))?,
            Instruction::Multiply(value) => accumulate(machine, |acc| acc.mul(value))?,
            Instruction::Divide(value) => accumulate(machine, |acc| acc.div(value))?,
            Instruction::Not => accumulate(machine, Value::not)?,
            Instruction::Digit(position) => {
                let position = position.to_int()?;
                accumulate(machine, |acc| acc.dgt(position))?
            },
            Instruction::DigitSet { position, digit } => {
                let position = position.to_int()?;
                let digit = digit.flatten()?;
                accumulate(machine, |acc| acc.dst(position, &digit))?
            },
            Instruction::Cast(kind) => accumulate(machine, |acc| acc.cast(kind))?,
            Instruction::Increment(register) => step(machine, register, 1)?,
            Instruction::Decrement(register) => step(machine, register, -1)?,
            Instruction::Test { kind, left, right, positive, negative } => {
                let ordering = left.compare(right)?;

                let branch = match (kind, ordering) {
                    (TestKind::Equal, ordering) => Some(ordering == Ordering::Equal),
                    (TestKind::Greater, ordering) => Some(ordering == Ordering::Greater),
                    (TestKind::Less, ordering) => Some(ordering == Ordering::Less),
                    (TestKind::Compare, Ordering::Greater) => Some(true),
                    (TestKind::Compare, Ordering::Less) => Some(false),
                    (TestKind::Compare, Ordering::Equal) => None,
                };

                let block = match branch {
                    Some(true) => positive,
                    Some(false) => negative,
                    None => return Ok(()),
                };

                for instruction in block {
                    if !machine.is_running() {
                        break;
                    }

                    instruction.execute(machine)?;
                }
            },
        }

        Ok(())
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Instruction::Move { source, target } => write!(f, "mov {} {:?}", source, target),
            Instruction::Swap { left, right } => write!(f, "swp {:?} {:?}", left, right),
            Instruction::Jump { label } => write!(f, "jmp {}", label),
            Instruction::Sleep { duration } => write!(f, "slp {}", duration),
            Instruction::SleepXBus { register } => write!(f, "slx {:?}", register),
            Instruction::Generate { register, on, off } =>
                write!(f, "gen {:?} {} {}", register, on, off),
            Instruction::Add(value)
            | Instruction::Subtract(value)
            | Instruction::Multiply(value)
            | Instruction::Divide(value)
            | Instruction::Digit(value)
            | Instruction::Cast(value) => write!(f, "{} {}", self.opcode(), value),
            Instruction::DigitSet { position, digit } => write!(f, "dst {} {}", position, digit),
            Instruction::Increment(register) | Instruction::Decrement(register) =>
                write!(f, "{} {:?}", self.opcode(), register),
            Instruction::Test { left, right, positive, negative, .. } => write!(
                f,
                "{} {} {} (+{} -{})",
                self.opcode(),
                left,
                right,
                positive.len(),
                negative.len(),
            ),
            other => write!(f, "{}", other.opcode()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::PlainRegister;

    struct TestMachine {
        accumulator: RegisterRef,
        jumped: Option<String>,
        running: bool,
        slept: Vec<i32>,
    }

    impl TestMachine {
        fn new() -> TestMachine {
            TestMachine {
                accumulator: RegisterRef::new(PlainRegister::new("acc")),
                jumped: None,
                running: true,
                slept: Vec::new(),
            }
        }

        fn run(&mut self, instructions: &[Instruction]) -> Result<(), Fault> {
            for instruction in instructions {
                instruction.execute(self)?;
            }

            Ok(())
        }

        fn acc(&self) -> Value {
            self.accumulator.get().unwrap()
        }
    }

    impl Machine for TestMachine {
        fn accumulator(&self) -> RegisterRef {
            self.accumulator.clone()
        }

        fn jump_to(&mut self, label: &str) -> Result<(), Fault> {
            self.jumped = Some(label.to_string());
            Ok(())
        }

        fn stop(&mut self) {
            self.running = false;
        }

        fn is_running(&self) -> bool {
            self.running
        }

        fn sleep(&mut self, units: i32) {
            self.slept.push(units);
        }
    }

    fn register(name: &str, value: Value) -> RegisterRef {
        let register = RegisterRef::new(PlainRegister::new(name));
        register.put(value).unwrap();
        register
    }

    #[test]
    fn test_mnemonics() {
        for opcode in OpCode::ALL.iter() {
            assert_eq!(OpCode::from_mnemonic(opcode.mnemonic()), Some(*opcode));
        }

        assert_eq!(OpCode::from_mnemonic("MOV"), Some(OpCode::Move));
        assert_eq!(OpCode::from_mnemonic("mvo"), None);
        assert_eq!(OpCode::suggest("mvo"), Some("mov"));
        assert_eq!(OpCode::suggest("teqq"), Some("teq"));
        assert_eq!(OpCode::suggest("banana"), None);
    }

    #[test]
    fn test_arithmetic() {
        let mut machine = TestMachine::new();

        machine.run(&[
            Instruction::Add(Value::Int(5)),
            Instruction::Add(Value::Int(3)),
            Instruction::Multiply(Value::Int(4)),
            Instruction::Subtract(Value::Int(2)),
            Instruction::Divide(Value::Int(3)),
        ]).unwrap();

        assert_eq!(machine.acc(), Value::Int(10));

        assert_eq!(
            machine.run(&[Instruction::Divide(Value::Int(0))]),
            Err(Fault::DivisionByZero),
        );
    }

    #[test]
    fn test_swap_and_step() {
        let mut machine = TestMachine::new();
        let a = register("a", Value::Int(1));
        let b = register("b", Value::from("two"));

        machine.run(&[
            Instruction::Swap { left: a.clone(), right: b.clone() },
            Instruction::Increment(b.clone()),
        ]).unwrap();

        assert_eq!(a.get().unwrap(), Value::from("two"));
        assert_eq!(b.get().unwrap(), Value::Int(2));
        assert_eq!(machine.acc(), Value::Int(2));

        machine.run(&[Instruction::Decrement(b.clone())]).unwrap();
        assert_eq!(b.get().unwrap(), Value::Int(1));
    }

    #[test]
    fn test_compare_branches() {
        let out = register("out", Value::Null);

        let tcp = |left: i32, right: i32| Instruction::Test {
            kind: TestKind::Compare,
            left: Value::Int(left),
            right: Value::Int(right),
            positive: vec![Instruction::Move { source: Value::from("+"), target: out.clone() }],
            negative: vec![Instruction::Move { source: Value::from("-"), target: out.clone() }],
        };

        let mut machine = TestMachine::new();

        machine.run(&[tcp(5, 3)]).unwrap();
        assert_eq!(out.get().unwrap(), Value::from("+"));

        machine.run(&[tcp(3, 5)]).unwrap();
        assert_eq!(out.get().unwrap(), Value::from("-"));

        out.put(Value::Null).unwrap();
        machine.run(&[tcp(4, 4)]).unwrap();
        assert_eq!(out.get().unwrap(), Value::Null);
    }

    #[test]
    fn test_end_inside_branch() {
        let out = register("out", Value::Int(0));
        let mut machine = TestMachine::new();

        machine.run(&[Instruction::Test {
            kind: TestKind::Equal,
            left: Value::Int(1),
            right: Value::Int(1),
            positive: vec![
                Instruction::End,
                Instruction::Move { source: Value::Int(9), target: out.clone() },
            ],
            negative: vec![],
        }]).unwrap();

        assert!(!machine.running);
        assert_eq!(out.get().unwrap(), Value::Int(0));
    }

    #[test]
    fn test_generate_pulses() {
        let pin = register("p0", Value::Int(0));
        let mut machine = TestMachine::new();

        machine.run(&[
            Instruction::Generate { register: pin.clone(), on: Value::Int(2), off: Value::Int(3) },
            Instruction::Sleep { duration: Value::from("4") },
            Instruction::Jump { label: "loop".into() },
        ]).unwrap();

        assert_eq!(pin.get().unwrap(), Value::Int(0));
        assert_eq!(machine.slept, vec![2, 3, 4]);
        assert_eq!(machine.jumped.as_ref().map(String::as_str), Some("loop"));
    }

    #[test]
    fn test_accumulator_digits() {
        let mut machine = TestMachine::new();

        machine.run(&[
            Instruction::Add(Value::Int(4721)),
            Instruction::DigitSet { position: Value::Int(3), digit: Value::Int(5) },
        ]).unwrap();
        assert_eq!(machine.acc(), Value::Int(4725));

        machine.run(&[Instruction::Digit(Value::Int(1))]).unwrap();
        assert_eq!(machine.acc(), Value::Int(7));

        machine.run(&[Instruction::Cast(Value::from("s")), Instruction::Not]).unwrap();
        assert_eq!(machine.acc(), Value::from("\u{c8}"));
    }
}
