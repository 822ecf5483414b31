//! Inter-node channels.
//!
//! Nodes communicate through numbered pins. A pin is bound to exactly one channel kind for the
//! lifetime of a [PinRegistry]:
//!
//! - **Power** pins hold the last integer written to them. Writes never block and reads never
//!   block.
//! - **XBus** pins are rendezvous points. A send completes only once a receiver has taken the
//!   value, and a receive blocks until a value arrives. Both give up after the configured timeout
//!   and fault the node with [Fault::Desynchronized].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::Config;
use crate::error::Fault;
use crate::value::Value;

/// Locks a mutex, recovering the guard if another node panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PinKind {
    Power,
    XBus,
}

impl PinKind {
    /// The letter that prefixes pin register names: `p0`, `x3`.
    pub fn prefix(self) -> char {
        match self {
            PinKind::Power => 'p',
            PinKind::XBus => 'x',
        }
    }
}

impl fmt::Display for PinKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PinKind::Power => write!(f, "power"),
            PinKind::XBus => write!(f, "xbus"),
        }
    }
}

/// The XBus operation that was waiting when a timeout hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Send,
    Receive,
    Sleep,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operation::Send => write!(f, "send"),
            Operation::Receive => write!(f, "receive"),
            Operation::Sleep => write!(f, "observe activity"),
        }
    }
}

#[derive(Debug, Default)]
pub struct PowerChannel {
    level: AtomicI32,
}

impl PowerChannel {
    pub fn new() -> PowerChannel {
        PowerChannel::default()
    }

    pub fn send(&self, value: &Value) -> Result<(), Fault> {
        self.level.store(value.to_int()?, Ordering::SeqCst);
        Ok(())
    }

    pub fn receive(&self) -> Value {
        Value::Int(self.level.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Default)]
struct Slot {
    value: Option<Value>,
    /// Number of values ever deposited.
    deposited: u64,
    /// Number of values ever taken.
    taken: u64,
}

#[derive(Debug)]
pub struct XBusChannel {
    pin: u32,
    slot: Mutex<Slot>,
    signal: Condvar,
    timeout: Duration,
}

impl XBusChannel {
    pub fn new(pin: u32, timeout: Duration) -> XBusChannel {
        XBusChannel {
            pin,
            slot: Mutex::new(Slot::default()),
            signal: Condvar::new(),
            timeout,
        }
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    fn desynchronized(&self, operation: Operation) -> Fault {
        Fault::Desynchronized { pin: self.pin, operation }
    }

    /// Deposits `value` and blocks until a receiver has taken it.
    pub fn send(&self, value: Value) -> Result<(), Fault> {
        let slot = lock(&self.slot);

        let (mut slot, _) = self.signal
            .wait_timeout_while(slot, self.timeout, |slot| slot.value.is_some())
            .unwrap_or_else(PoisonError::into_inner);

        if slot.value.is_some() {
            return Err(self.desynchronized(Operation::Send));
        }

        slot.value = Some(value);
        slot.deposited += 1;
        let ticket = slot.deposited;
        self.signal.notify_all();

        let (mut slot, _) = self.signal
            .wait_timeout_while(slot, self.timeout, |slot| slot.taken < ticket)
            .unwrap_or_else(PoisonError::into_inner);

        if slot.taken < ticket {
            // Nobody took it, so the value in the slot is still ours.
            slot.value = None;
            slot.deposited -= 1;
            self.signal.notify_all();

            return Err(self.desynchronized(Operation::Send));
        }

        Ok(())
    }

    /// Blocks until a value is available and takes it.
    pub fn receive(&self) -> Result<Value, Fault> {
        let slot = lock(&self.slot);

        let (mut slot, _) = self.signal
            .wait_timeout_while(slot, self.timeout, |slot| slot.value.is_none())
            .unwrap_or_else(PoisonError::into_inner);

        match slot.value.take() {
            Some(value) => {
                slot.taken += 1;
                self.signal.notify_all();
                Ok(value)
            },
            None => Err(self.desynchronized(Operation::Receive)),
        }
    }

    /// Blocks until a value is available without taking it.
    pub fn sleep(&self) -> Result<(), Fault> {
        let slot = lock(&self.slot);

        let (slot, _) = self.signal
            .wait_timeout_while(slot, self.timeout, |slot| slot.value.is_none())
            .unwrap_or_else(PoisonError::into_inner);

        match slot.value {
            Some(_) => Ok(()),
            None => Err(self.desynchronized(Operation::Sleep)),
        }
    }
}

#[derive(Debug)]
pub enum Channel {
    Power(PowerChannel),
    XBus(XBusChannel),
}

impl Channel {
    pub fn kind(&self) -> PinKind {
        match self {
            Channel::Power(_) => PinKind::Power,
            Channel::XBus(_) => PinKind::XBus,
        }
    }

    pub fn send(&self, value: Value) -> Result<(), Fault> {
        match self {
            Channel::Power(power) => power.send(&value),
            Channel::XBus(xbus) => xbus.send(value),
        }
    }

    pub fn receive(&self) -> Result<Value, Fault> {
        match self {
            Channel::Power(power) => Ok(power.receive()),
            Channel::XBus(xbus) => xbus.receive(),
        }
    }
}

/// Process-wide table of pins, shared by every node compiled against it.
///
/// Cloning the registry yields a handle to the same table.
#[derive(Clone, Debug)]
pub struct PinRegistry {
    channels: Arc<Mutex<HashMap<u32, Arc<Channel>>>>,
    timeout: Duration,
}

impl PinRegistry {
    pub fn new(config: &Config) -> PinRegistry {
        PinRegistry {
            channels: Arc::new(Mutex::new(HashMap::new())),
            timeout: config.xbus_timeout,
        }
    }

    /// Returns the channel bound to `pin`, creating it if the pin is unused.
    ///
    /// Fails with the kind the pin is already bound to if that differs from `kind`.
    pub fn channel(&self, pin: u32, kind: PinKind) -> Result<Arc<Channel>, PinKind> {
        let mut channels = lock(&self.channels);
        let timeout = self.timeout;

        let channel = channels.entry(pin).or_insert_with(|| Arc::new(match kind {
            PinKind::Power => Channel::Power(PowerChannel::new()),
            PinKind::XBus => Channel::XBus(XBusChannel::new(pin, timeout)),
        }));

        if channel.kind() != kind {
            return Err(channel.kind());
        }

        Ok(channel.clone())
    }

    pub fn len(&self) -> usize {
        lock(&self.channels).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn short() -> Config {
        Config::default().with_xbus_timeout(Duration::from_millis(100))
    }

    #[test]
    fn test_power_last_write_wins() {
        let power = PowerChannel::new();
        assert_eq!(power.receive(), Value::Int(0));

        power.send(&Value::Int(3)).unwrap();
        power.send(&Value::Float(7.9)).unwrap();

        assert_eq!(power.receive(), Value::Int(7));
        assert_eq!(power.receive(), Value::Int(7));
    }

    #[test]
    fn test_xbus_handshake() {
        let bus = Arc::new(XBusChannel::new(1, Duration::from_secs(5)));
        let sender = bus.clone();

        let handle = thread::spawn(move || {
            sender.send(Value::Int(42))?;
            sender.send(Value::Int(43))
        });

        assert_eq!(bus.receive().unwrap(), Value::Int(42));
        assert_eq!(bus.receive().unwrap(), Value::Int(43));
        assert_eq!(handle.join().unwrap(), Ok(()));
    }

    #[test]
    fn test_xbus_send_timeout_retracts() {
        let bus = XBusChannel::new(4, Duration::from_millis(50));

        assert_eq!(
            bus.send(Value::Int(1)),
            Err(Fault::Desynchronized { pin: 4, operation: Operation::Send }),
        );

        assert_eq!(
            bus.receive(),
            Err(Fault::Desynchronized { pin: 4, operation: Operation::Receive }),
        );
    }

    #[test]
    fn test_xbus_sleep_does_not_consume() {
        let bus = Arc::new(XBusChannel::new(2, Duration::from_secs(5)));
        let sender = bus.clone();

        let handle = thread::spawn(move || sender.send(Value::from("hi")));

        bus.sleep().unwrap();
        assert_eq!(bus.receive().unwrap(), Value::from("hi"));
        assert_eq!(handle.join().unwrap(), Ok(()));
    }

    #[test]
    fn test_registry_binds_kind_once() {
        let pins = PinRegistry::new(&short());

        let first = pins.channel(0, PinKind::XBus).unwrap();
        let second = pins.channel(0, PinKind::XBus).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        assert_eq!(pins.channel(0, PinKind::Power).unwrap_err(), PinKind::XBus);
        assert_eq!(pins.clone().len(), 1);
    }
}
