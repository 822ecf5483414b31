//! Registers, the named storage cells of a node.
//!
//! Every register implements [Register]. Registers are shared between the instructions that
//! reference them through [RegisterRef], and pin registers are shared between nodes through their
//! channel, so all of them use interior mutability and are `Send + Sync`.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{self, BufRead, Read, Write};
use std::mem;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::channel::{lock, Channel};
use crate::config::Config;
use crate::error::Fault;
use crate::value::{Value, MAX_TEXT_LENGTH};

pub const MIN_CLOCK_SPEED: i32 = 1;
pub const MAX_CLOCK_SPEED: i32 = 6000;

/// Most cells a memory register may hold.
pub const MAX_MEMORY_CELLS: usize = 1 << 20;

fn check_cells(cells: usize) -> Result<(), Fault> {
    match cells {
        cells if cells > MAX_MEMORY_CELLS => Err(Fault::OutOfMemory {
            requested: cells,
            limit: MAX_MEMORY_CELLS,
        }),
        _ => Ok(()),
    }
}

/// A named storage cell.
pub trait Register: Send + Sync {
    fn identifier(&self) -> &str;

    /// Stores a value. The value is always flattened first.
    fn put(&self, value: Value) -> Result<(), Fault>;

    /// Reads the current value. Never returns a [Value::Ref].
    fn get(&self) -> Result<Value, Fault>;

    /// The channel behind a pin register.
    fn channel(&self) -> Option<&Channel> {
        None
    }
}

/// A shared handle to a register.
#[derive(Clone)]
pub struct RegisterRef(Arc<dyn Register>);

impl RegisterRef {
    pub fn new<R: Register + 'static>(register: R) -> RegisterRef {
        RegisterRef(Arc::new(register))
    }

    pub fn from_arc(register: Arc<dyn Register>) -> RegisterRef {
        RegisterRef(register)
    }

    /// Checks whether both handles point to the same register.
    pub fn ptr_eq(&self, other: &RegisterRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for RegisterRef {
    type Target = dyn Register;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl fmt::Debug for RegisterRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "${}", self.identifier())
    }
}

/// Discards writes and reads as `Null`.
pub struct NullRegister {
    identifier: String,
}

impl NullRegister {
    pub fn new(identifier: &str) -> NullRegister {
        NullRegister { identifier: identifier.to_string() }
    }
}

impl Register for NullRegister {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn put(&self, _value: Value) -> Result<(), Fault> {
        Ok(())
    }

    fn get(&self) -> Result<Value, Fault> {
        Ok(Value::Null)
    }
}

/// A general purpose register holding a single value. Starts out as `Int(0)`.
pub struct PlainRegister {
    identifier: String,
    value: Mutex<Value>,
}

impl PlainRegister {
    pub fn new(identifier: &str) -> PlainRegister {
        PlainRegister {
            identifier: identifier.to_string(),
            value: Mutex::new(Value::Int(0)),
        }
    }
}

impl Register for PlainRegister {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn put(&self, value: Value) -> Result<(), Fault> {
        let value = value.flatten()?;
        *lock(&self.value) = value;
        Ok(())
    }

    fn get(&self) -> Result<Value, Fault> {
        Ok(lock(&self.value).clone())
    }
}

/// Controls how fast its node executes.
///
/// Writing `-1` disables the clock, making the node run as fast as it can and skip every sleep.
/// Any other value enables the clock and sets its speed, clamped to 1..=6000 instructions per
/// second. Reads return the clamped speed either way.
pub struct ClockRegister {
    identifier: String,
    speed: AtomicI32,
    active: AtomicBool,
}

impl ClockRegister {
    pub fn new(identifier: &str, speed: i32) -> ClockRegister {
        let clock = ClockRegister {
            identifier: identifier.to_string(),
            speed: AtomicI32::new(MIN_CLOCK_SPEED),
            active: AtomicBool::new(false),
        };

        clock.set(speed);
        clock
    }

    fn set(&self, speed: i32) {
        self.active.store(speed != -1, Ordering::SeqCst);
        self.speed.store(speed.max(MIN_CLOCK_SPEED).min(MAX_CLOCK_SPEED), Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn speed(&self) -> i32 {
        self.speed.load(Ordering::SeqCst)
    }

    /// The wall-clock length of `units` clock ticks, or `None` while the clock is disabled.
    pub fn scale(&self, units: i32) -> Option<Duration> {
        if !self.is_active() {
            return None;
        }

        let micros = units.max(0) as u64 * 1_000_000 / self.speed() as u64;
        Some(Duration::from_micros(micros))
    }
}

impl Register for ClockRegister {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn put(&self, value: Value) -> Result<(), Fault> {
        self.set(value.to_int()?);
        Ok(())
    }

    fn get(&self) -> Result<Value, Fault> {
        Ok(Value::Int(self.speed()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum RandomKind {
    Int,
    Float,
    Str,
}

struct RandomState {
    rng: Option<StdRng>,
    kind: RandomKind,
    length: usize,
}

/// A pseudo-random generator. The type of the last written seed decides what it produces:
///
/// - `Int` seeds produce integers in `0..999`.
/// - `Float` seeds produce floats in `0..1`.
/// - `Str` seeds produce printable ASCII strings. The length is the seed parsed as an integer,
///   or the seed's own length.
/// - `Null` reseeds from the wall clock and picks the output type at random.
pub struct RandomRegister {
    identifier: String,
    state: Mutex<RandomState>,
}

fn wall_clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

impl RandomRegister {
    pub fn new(identifier: &str) -> RandomRegister {
        RandomRegister {
            identifier: identifier.to_string(),
            state: Mutex::new(RandomState {
                rng: None,
                kind: RandomKind::Int,
                length: 1,
            }),
        }
    }
}

impl Register for RandomRegister {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn put(&self, value: Value) -> Result<(), Fault> {
        let value = value.flatten()?;
        let mut state = lock(&self.state);

        let (rng, kind) = match value {
            Value::Int(seed) => (StdRng::seed_from_u64(seed as u64), RandomKind::Int),
            Value::Float(seed) => {
                let seed = (seed * 9999.0) as i32;
                (StdRng::seed_from_u64(seed as u64), RandomKind::Float)
            },
            Value::Str(seed) => {
                let length = seed.trim()
                    .parse::<i32>()
                    .map(|n| (n as i64).abs() as usize)
                    .unwrap_or_else(|_| seed.chars().count());

                if length > MAX_TEXT_LENGTH {
                    return Err(Fault::OutOfMemory { requested: length, limit: MAX_TEXT_LENGTH });
                }

                state.length = length;

                let mut hasher = DefaultHasher::new();
                seed.hash(&mut hasher);

                (StdRng::seed_from_u64(hasher.finish()), RandomKind::Str)
            },
            _ => {
                let mut rng = StdRng::seed_from_u64(wall_clock_seed());

                let kind = match rng.gen_range(0, 3) {
                    0 => RandomKind::Int,
                    1 => RandomKind::Float,
                    _ => RandomKind::Str,
                };

                (rng, kind)
            },
        };

        state.rng = Some(rng);
        state.kind = kind;

        Ok(())
    }

    fn get(&self) -> Result<Value, Fault> {
        let mut state = lock(&self.state);
        let RandomState { rng, kind, length } = &mut *state;

        let rng = rng.get_or_insert_with(|| StdRng::seed_from_u64(wall_clock_seed()));

        let value = match kind {
            RandomKind::Int => Value::Int(rng.gen_range(0, 999)),
            RandomKind::Float => Value::Float(rng.gen::<f32>()),
            RandomKind::Str => Value::Str(
                (0..*length).map(|_| rng.gen_range(32u8, 127u8) as char).collect()
            ),
        };

        Ok(value)
    }
}

/// A register that forwards every read and write to a pin's channel.
pub struct PinRegister {
    identifier: String,
    channel: Arc<Channel>,
}

impl PinRegister {
    pub fn new(identifier: &str, channel: Arc<Channel>) -> PinRegister {
        PinRegister {
            identifier: identifier.to_string(),
            channel,
        }
    }
}

impl Register for PinRegister {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn put(&self, value: Value) -> Result<(), Fault> {
        self.channel.send(value.flatten()?)
    }

    fn get(&self) -> Result<Value, Fault> {
        self.channel.receive()
    }

    fn channel(&self) -> Option<&Channel> {
        Some(&*self.channel)
    }
}

/// The cursor of a memory register, exposed as its own `<name>_i` register.
pub struct OffsetRegister {
    identifier: String,
    offset: AtomicI32,
}

impl OffsetRegister {
    pub fn new(identifier: &str) -> OffsetRegister {
        OffsetRegister {
            identifier: identifier.to_string(),
            offset: AtomicI32::new(0),
        }
    }

    pub fn offset(&self) -> i32 {
        self.offset.load(Ordering::SeqCst)
    }

    pub fn set_offset(&self, offset: i32) {
        self.offset.store(offset, Ordering::SeqCst)
    }
}

impl Register for OffsetRegister {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn put(&self, value: Value) -> Result<(), Fault> {
        self.set_offset(value.to_int()?);
        Ok(())
    }

    fn get(&self) -> Result<Value, Fault> {
        Ok(Value::Int(self.offset()))
    }
}

fn wrap(offset: i32, len: usize) -> usize {
    match len {
        0 => 0,
        len => offset.rem_euclid(len as i32) as usize,
    }
}

/// A fixed-capacity memory. The offset wraps around in both directions.
pub struct SizedMemoryRegister {
    identifier: String,
    offset: Arc<OffsetRegister>,
    cells: Mutex<Vec<Value>>,
}

impl SizedMemoryRegister {
    pub fn new(identifier: &str, offset: Arc<OffsetRegister>, size: usize) -> SizedMemoryRegister {
        SizedMemoryRegister {
            identifier: identifier.to_string(),
            offset,
            cells: Mutex::new(vec![Value::Null; size]),
        }
    }

    pub fn capacity(&self) -> usize {
        lock(&self.cells).len()
    }

    /// Changes the capacity. New cells read as `Null`.
    pub fn resize(&self, size: usize) -> Result<(), Fault> {
        check_cells(size)?;
        lock(&self.cells).resize(size, Value::Null);
        Ok(())
    }
}

impl Register for SizedMemoryRegister {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn put(&self, value: Value) -> Result<(), Fault> {
        let value = value.flatten()?;
        let mut cells = lock(&self.cells);
        let index = wrap(self.offset.offset(), cells.len());

        match cells.get_mut(index) {
            Some(cell) => {
                *cell = value;
                self.offset.set_offset(index as i32);
            },
            None => {
                // Unreachable cell, restart from the first one.
                if let Some(cell) = cells.first_mut() {
                    *cell = value;
                }

                self.offset.set_offset(0);
            },
        }

        Ok(())
    }

    fn get(&self) -> Result<Value, Fault> {
        let cells = lock(&self.cells);
        let index = wrap(self.offset.offset(), cells.len());

        match cells.get(index) {
            Some(value) => {
                self.offset.set_offset(index as i32);
                Ok(value.clone())
            },
            None => {
                self.offset.set_offset(0);
                Ok(cells.first().cloned().unwrap_or(Value::Null))
            },
        }
    }
}

/// A memory that grows on demand. Negative offsets count from the end.
pub struct UnsizedMemoryRegister {
    identifier: String,
    offset: Arc<OffsetRegister>,
    cells: Mutex<Vec<Value>>,
}

impl UnsizedMemoryRegister {
    pub fn new(identifier: &str, offset: Arc<OffsetRegister>) -> UnsizedMemoryRegister {
        UnsizedMemoryRegister {
            identifier: identifier.to_string(),
            offset,
            cells: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.cells).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Register for UnsizedMemoryRegister {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn put(&self, value: Value) -> Result<(), Fault> {
        let value = value.flatten()?;
        let mut cells = lock(&self.cells);

        let index = match self.offset.offset() {
            offset if offset < 0 => wrap(offset, cells.len()),
            offset => offset as usize,
        };

        if index >= cells.len() {
            check_cells(index + 1)?;
            cells.resize(index + 1, Value::Null);
        }

        cells[index] = value;
        self.offset.set_offset(index as i32);

        Ok(())
    }

    fn get(&self) -> Result<Value, Fault> {
        let cells = lock(&self.cells);

        let value = match self.offset.offset() {
            offset if offset < 0 && !cells.is_empty() => {
                let index = wrap(offset, cells.len());
                self.offset.set_offset(index as i32);
                cells[index].clone()
            },
            offset if offset < 0 => Value::Null,
            offset => cells.get(offset as usize).cloned().unwrap_or(Value::Null),
        };

        Ok(value)
    }
}

/// An output stream. Everything written is printed and also kept on a tape, and reads pop the
/// most recent entry off the tape.
pub struct TapeRegister {
    identifier: String,
    sink: Mutex<Box<dyn Write + Send>>,
    tape: Mutex<Vec<String>>,
}

impl TapeRegister {
    pub fn new(identifier: &str, sink: Box<dyn Write + Send>) -> TapeRegister {
        TapeRegister {
            identifier: identifier.to_string(),
            sink: Mutex::new(sink),
            tape: Mutex::new(Vec::new()),
        }
    }

    pub fn stdout(identifier: &str) -> TapeRegister {
        TapeRegister::new(identifier, Box::new(io::stdout()))
    }

    pub fn stderr(identifier: &str) -> TapeRegister {
        TapeRegister::new(identifier, Box::new(io::stderr()))
    }
}

impl Register for TapeRegister {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn put(&self, value: Value) -> Result<(), Fault> {
        let text = value.text()?;

        {
            let mut sink = lock(&self.sink);
            sink.write_all(text.as_bytes())?;
            sink.flush()?;
        }

        lock(&self.tape).push(text);
        Ok(())
    }

    fn get(&self) -> Result<Value, Fault> {
        Ok(Value::Str(lock(&self.tape).pop().unwrap_or_default()))
    }
}

struct Input {
    source: Box<dyn BufRead + Send>,
    buffer: String,
    closed: bool,
}

/// An input stream.
///
/// Writing prepares input: a string reads up to and excluding that delimiter, a number reads that
/// many bytes. Reading returns everything prepared so far, or `Null` once the stream has ended
/// and nothing is left.
pub struct StdinRegister {
    identifier: String,
    input: Mutex<Input>,
}

impl StdinRegister {
    pub fn new(identifier: &str, source: Box<dyn BufRead + Send>) -> StdinRegister {
        StdinRegister {
            identifier: identifier.to_string(),
            input: Mutex::new(Input {
                source,
                buffer: String::new(),
                closed: false,
            }),
        }
    }

    pub fn stdin(identifier: &str) -> StdinRegister {
        StdinRegister::new(identifier, Box::new(io::BufReader::new(io::stdin())))
    }
}

impl Register for StdinRegister {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn put(&self, value: Value) -> Result<(), Fault> {
        let value = value.flatten()?;
        let mut input = lock(&self.input);
        let Input { source, buffer, closed } = &mut *input;

        if *closed {
            return Ok(());
        }

        match value {
            Value::Str(delimiter) if !delimiter.is_empty() => {
                let delimiter = delimiter.as_bytes();
                let mut scratch = Vec::new();
                let mut byte = [0u8; 1];

                loop {
                    match source.read(&mut byte) {
                        Ok(0) | Err(_) => {
                            *closed = true;
                            break;
                        },
                        Ok(_) => {
                            scratch.push(byte[0]);

                            if scratch.ends_with(delimiter) {
                                scratch.truncate(scratch.len() - delimiter.len());
                                break;
                            }
                        },
                    }
                }

                buffer.push_str(&String::from_utf8_lossy(&scratch));
            },
            other => {
                let count = other.to_int()?.max(0) as u64;
                let mut scratch = Vec::new();

                match source.take(count).read_to_end(&mut scratch) {
                    Ok(n) if (n as u64) < count => *closed = true,
                    Ok(_) => (),
                    Err(_) => *closed = true,
                }

                buffer.push_str(&String::from_utf8_lossy(&scratch));
            },
        }

        Ok(())
    }

    fn get(&self) -> Result<Value, Fault> {
        let mut input = lock(&self.input);

        if input.closed && input.buffer.trim().is_empty() {
            return Ok(Value::Null);
        }

        Ok(Value::Str(mem::replace(&mut input.buffer, String::new())))
    }
}

/// The registers visible to one node, by name.
#[derive(Clone)]
pub struct RegisterTable {
    registers: HashMap<String, RegisterRef>,
    accumulator: RegisterRef,
    clock: Arc<ClockRegister>,
}

impl RegisterTable {
    /// Creates a table with the default registers: `null`, `clk`, `acc`, `stdout`, `stdin`,
    /// `stderr` and `rng`.
    pub fn with_defaults(config: &Config) -> RegisterTable {
        let clock = Arc::new(ClockRegister::new("clk", config.clock_speed));
        let accumulator = RegisterRef::new(PlainRegister::new("acc"));

        let mut table = RegisterTable {
            registers: HashMap::new(),
            accumulator: accumulator.clone(),
            clock: clock.clone(),
        };

        table.insert(RegisterRef::new(NullRegister::new("null")));
        table.insert(RegisterRef::from_arc(clock));
        table.insert(accumulator);
        table.insert(RegisterRef::new(TapeRegister::stdout("stdout")));
        table.insert(RegisterRef::new(StdinRegister::stdin("stdin")));
        table.insert(RegisterRef::new(TapeRegister::stderr("stderr")));
        table.insert(RegisterRef::new(RandomRegister::new("rng")));

        table
    }

    pub fn get(&self, identifier: &str) -> Option<RegisterRef> {
        self.registers.get(identifier).cloned()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.registers.contains_key(identifier)
    }

    /// Adds a register under its own identifier, replacing and returning any register that
    /// already used it.
    pub fn insert(&mut self, register: RegisterRef) -> Option<RegisterRef> {
        self.registers.insert(register.identifier().to_string(), register)
    }

    /// Returns the register called `identifier`, declaring a plain register if there is none.
    pub fn declare(&mut self, identifier: &str) -> RegisterRef {
        self.registers
            .entry(identifier.to_string())
            .or_insert_with(|| RegisterRef::new(PlainRegister::new(identifier)))
            .clone()
    }

    pub fn accumulator(&self) -> &RegisterRef {
        &self.accumulator
    }

    pub fn clock(&self) -> &Arc<ClockRegister> {
        &self.clock
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterRef> {
        self.registers.values()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Operation, XBusChannel};
    use std::io::Cursor;
    use std::thread;

    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn sized(size: usize) -> (Arc<OffsetRegister>, SizedMemoryRegister) {
        let offset = Arc::new(OffsetRegister::new("m_i"));
        let memory = SizedMemoryRegister::new("m", offset.clone(), size);
        (offset, memory)
    }

    #[test]
    fn test_plain_register_flattens() {
        let source = RegisterRef::new(PlainRegister::new("a"));
        let target = PlainRegister::new("b");

        source.put(Value::Int(3)).unwrap();
        target.put(Value::Ref(source.clone())).unwrap();
        source.put(Value::Int(4)).unwrap();

        assert_eq!(target.get().unwrap(), Value::Int(3));
    }

    #[test]
    fn test_sized_memory_wraps() {
        let (offset, memory) = sized(4);

        offset.set_offset(5);
        memory.put(Value::Int(10)).unwrap();
        assert_eq!(offset.offset(), 1);

        offset.set_offset(-1);
        memory.put(Value::Int(30)).unwrap();
        assert_eq!(offset.offset(), 3);

        offset.set_offset(-3);
        assert_eq!(memory.get().unwrap(), Value::Int(10));
        assert_eq!(offset.offset(), 1);

        offset.set_offset(2);
        assert_eq!(memory.get().unwrap(), Value::Null);
    }

    #[test]
    fn test_sized_memory_resize() {
        let (offset, memory) = sized(4);

        offset.set_offset(3);
        memory.put(Value::Int(1)).unwrap();

        memory.resize(2).unwrap();
        assert_eq!(memory.capacity(), 2);
        assert_eq!(memory.get().unwrap(), Value::Null);
        assert_eq!(offset.offset(), 1);

        memory.resize(0).unwrap();
        memory.put(Value::Int(9)).unwrap();
        assert_eq!(offset.offset(), 0);
        assert_eq!(memory.get().unwrap(), Value::Null);
    }

    #[test]
    fn test_unsized_memory_grows() {
        let offset = Arc::new(OffsetRegister::new("u_i"));
        let memory = UnsizedMemoryRegister::new("u", offset.clone());

        offset.set_offset(-1);
        assert_eq!(memory.get().unwrap(), Value::Null);

        memory.put(Value::from("first")).unwrap();
        assert_eq!(offset.offset(), 0);

        offset.set_offset(3);
        memory.put(Value::from("fourth")).unwrap();
        assert_eq!(memory.len(), 4);

        offset.set_offset(-1);
        assert_eq!(memory.get().unwrap(), Value::from("fourth"));
        assert_eq!(offset.offset(), 3);

        offset.set_offset(1);
        assert_eq!(memory.get().unwrap(), Value::Null);

        offset.set_offset(10);
        assert_eq!(memory.get().unwrap(), Value::Null);
    }

    #[test]
    fn test_unsized_memory_growth_is_bounded() {
        let offset = Arc::new(OffsetRegister::new("u_i"));
        let memory = UnsizedMemoryRegister::new("u", offset.clone());

        offset.set_offset(MAX_MEMORY_CELLS as i32 - 1);
        memory.put(Value::Int(1)).unwrap();
        assert_eq!(memory.len(), MAX_MEMORY_CELLS);

        offset.set_offset(2_000_000_000);
        assert_eq!(
            memory.put(Value::Int(2)),
            Err(Fault::OutOfMemory { requested: 2_000_000_001, limit: MAX_MEMORY_CELLS }),
        );
        assert_eq!(memory.len(), MAX_MEMORY_CELLS);

        let (_, sized) = sized(2);
        assert!(sized.resize(MAX_MEMORY_CELLS + 1).is_err());
        assert_eq!(sized.capacity(), 2);
    }

    #[test]
    fn test_clock() {
        let clock = ClockRegister::new("clk", 500);
        assert_eq!(clock.scale(1), Some(Duration::from_micros(2000)));

        clock.put(Value::Int(100_000)).unwrap();
        assert_eq!(clock.get().unwrap(), Value::Int(MAX_CLOCK_SPEED));

        clock.put(Value::Int(0)).unwrap();
        assert_eq!(clock.speed(), MIN_CLOCK_SPEED);
        assert_eq!(clock.scale(2), Some(Duration::from_secs(2)));

        clock.put(Value::Int(-1)).unwrap();
        assert!(!clock.is_active());
        assert_eq!(clock.scale(5), None);
        assert_eq!(clock.get().unwrap(), Value::Int(MIN_CLOCK_SPEED));
    }

    #[test]
    fn test_random_seeding() {
        let a = RandomRegister::new("rng");
        let b = RandomRegister::new("rng");

        a.put(Value::Int(7)).unwrap();
        b.put(Value::Int(7)).unwrap();

        for _ in 0..20 {
            let value = a.get().unwrap();
            assert_eq!(value, b.get().unwrap());

            match value {
                Value::Int(i) => assert!(i >= 0 && i < 999),
                other => panic!("expected an integer, got {:?}", other),
            }
        }

        a.put(Value::Float(0.5)).unwrap();
        match a.get().unwrap() {
            Value::Float(f) => assert!(f >= 0.0 && f < 1.0),
            other => panic!("expected a float, got {:?}", other),
        }

        a.put(Value::from("12")).unwrap();
        match a.get().unwrap() {
            Value::Str(s) => {
                assert_eq!(s.len(), 12);
                assert!(s.bytes().all(|b| b >= 32 && b < 127));
            },
            other => panic!("expected a string, got {:?}", other),
        }

        a.put(Value::from("abc")).unwrap();
        match a.get().unwrap() {
            Value::Str(s) => assert_eq!(s.len(), 3),
            other => panic!("expected a string, got {:?}", other),
        }
    }

    #[test]
    fn test_random_string_length_is_bounded() {
        let rng = RandomRegister::new("rng");

        assert_eq!(
            rng.put(Value::from("2000000000")),
            Err(Fault::OutOfMemory { requested: 2_000_000_000, limit: MAX_TEXT_LENGTH }),
        );
    }

    #[test]
    fn test_flattening_reads_random_register() {
        let rng = RegisterRef::new(RandomRegister::new("rng"));
        let twin = RandomRegister::new("rng");

        rng.put(Value::Int(3)).unwrap();
        twin.put(Value::Int(3)).unwrap();

        let reference = Value::Ref(rng.clone());
        let first = reference.flatten().unwrap();
        let second = reference.flatten().unwrap();

        assert_eq!(first, twin.get().unwrap());
        assert_eq!(second, twin.get().unwrap());
    }

    #[test]
    fn test_flattening_consumes_xbus_value() {
        let channel = Arc::new(Channel::XBus(XBusChannel::new(3, Duration::from_millis(100))));
        let pin = RegisterRef::new(PinRegister::new("x3", channel.clone()));

        let sender = thread::spawn(move || channel.send(Value::Int(11)));

        let reference = Value::Ref(pin);
        assert_eq!(reference.flatten().unwrap(), Value::Int(11));
        assert_eq!(sender.join().unwrap(), Ok(()));

        assert_eq!(
            reference.flatten(),
            Err(Fault::Desynchronized { pin: 3, operation: Operation::Receive }),
        );
    }

    #[test]
    fn test_tape() {
        let output = Arc::new(Mutex::new(Vec::new()));
        let tape = TapeRegister::new("stdout", Box::new(SharedSink(output.clone())));

        tape.put(Value::from("a")).unwrap();
        tape.put(Value::Int(2)).unwrap();

        assert_eq!(&*output.lock().unwrap(), b"a2");
        assert_eq!(tape.get().unwrap(), Value::from("2"));
        assert_eq!(tape.get().unwrap(), Value::from("a"));
        assert_eq!(tape.get().unwrap(), Value::from(""));
    }

    #[test]
    fn test_stdin() {
        let source = Cursor::new(b"hello, world\nrest".to_vec());
        let stdin = StdinRegister::new("stdin", Box::new(source));

        stdin.put(Value::from(", ")).unwrap();
        assert_eq!(stdin.get().unwrap(), Value::from("hello"));

        stdin.put(Value::Int(3)).unwrap();
        assert_eq!(stdin.get().unwrap(), Value::from("wor"));

        stdin.put(Value::from("\n")).unwrap();
        stdin.put(Value::from("\n")).unwrap();
        assert_eq!(stdin.get().unwrap(), Value::from("ldrest"));

        stdin.put(Value::Int(4)).unwrap();
        assert_eq!(stdin.get().unwrap(), Value::Null);
    }

    #[test]
    fn test_default_table() {
        let table = RegisterTable::with_defaults(&Config::default());

        for name in &["null", "clk", "acc", "stdout", "stdin", "stderr", "rng"] {
            assert!(table.contains(name), "missing default register {}", name);
        }

        assert!(table.get("acc").unwrap().ptr_eq(table.accumulator()));
        assert_eq!(table.clock().speed(), 500);
    }
}
