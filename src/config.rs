//! Runtime limits shared by every node a compiler produces.

use std::time::Duration;

/// Default clock speed, in instructions per second.
pub const DEFAULT_CLOCK_SPEED: i32 = 500;

/// Default time an XBus operation waits for its partner.
pub const DEFAULT_XBUS_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct Config {
    /// How long an XBus send, receive or `slx` may block before the node faults
    pub xbus_timeout: Duration,

    /// Initial speed of each node's `clk` register
    pub clock_speed: i32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            xbus_timeout: DEFAULT_XBUS_TIMEOUT,
            clock_speed: DEFAULT_CLOCK_SPEED,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_xbus_timeout(mut self, timeout: Duration) -> Self {
        self.xbus_timeout = timeout;
        self
    }

    /// Sets the initial clock speed. `-1` starts nodes with the clock disabled.
    pub fn with_clock_speed(mut self, speed: i32) -> Self {
        self.clock_speed = speed;
        self
    }
}
