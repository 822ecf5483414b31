//! A crate for parsing and running programs written in SIO, a small assembly language for
//! concurrently running nodes that talk to each other over numbered pins.
//!
//! Currently this crate provides the functionality to:
//! - Parse SIO source texts into [Programs](Program), reporting mistakes with their line.
//! - Run each program as a [Node] on its own thread, paced by the node's `clk` register.
//! - Connect nodes through power pins (last value wins) and XBus pins (blocking rendezvous).
//! - Observe running nodes through [events](event).
//!
//! # Language
//!
//! ```text
//! $x0                   # bind XBus pin 0 to the register x0
//! *buf[4]               # four cells of memory, cursor in buf_i
//! loop: mov x0 acc      # receive a value
//! @mov "ready" stdout   # runs only the first time around
//! teq acc 0
//! + end
//! - mov acc buf
//! inc buf_i
//! jmp loop
//! ```
//!
//! Every node has the registers `acc`, `clk`, `null`, `rng`, `stdin`, `stdout` and `stderr`.
//! Arithmetic instructions (`add`, `sub`, `mul`, `div`, `not`, `dgt`, `dst`, `cst`) operate on
//! `acc`.
//!
//! # Example
//! ```
//! use sio::{Compiler, Value};
//!
//! // Every node compiled by the same compiler shares its pins.
//! let compiler = Compiler::new();
//!
//! let sender = compiler.compile("mov 42 $x0\nend").unwrap();
//! let receiver = compiler.compile("mov $x0 acc\nend").unwrap();
//!
//! let handles = vec![sender.start(), receiver.start()];
//!
//! for handle in handles {
//!     handle.join().expect("node faulted");
//! }
//!
//! let acc = receiver.register("acc").unwrap();
//! assert_eq!(acc.get().unwrap(), Value::Int(42));
//! ```
//!
//! # Executables
//!
//! ## `siorun`
//!
//! Compiles every file given on the command line against one pin registry, runs them all
//! concurrently and reports the nodes that faulted. Requires the `siorun` feature.
//!
//! ```text
//! siorun --verbose producer.sio consumer.sio
//! ```
pub mod channel;
pub mod compiler;
pub mod config;
pub mod error;
pub mod event;
pub mod instruction;
pub mod node;
pub mod parser;
pub mod program;
pub mod register;
pub mod token;
pub mod value;

pub use compiler::{compile, compile_with_logger, Compiler};
pub use config::Config;
pub use error::{Fault, ParseError};
pub use node::{Node, NodeHandle};
pub use program::Program;
pub use value::Value;
