//! Running compiled programs.
//!
//! A [Node] owns one [Program] and executes it in a loop: after the last instruction execution
//! wraps around to the first one, until an `end` instruction, a call to [Node::stop] or a
//! [Fault]. Every node runs on its own thread when started with [Node::start].
//!
//! While the node's `clk` register is active, each instruction takes at least one clock tick
//! (`1 / speed` seconds) and `slp`/`gen` durations are measured in ticks. Writing `-1` to `clk`
//! disables pacing entirely.
//!
//! Run-once (`@`) instructions stay spent for the life of the node, across repeated calls to
//! [Node::run] and [Node::start]. A node whose every instruction is spent stops on its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use slog::{debug, o, trace, warn, Discard, Logger};

use crate::error::Fault;
use crate::event::{Event, EventDispatcher, EventListener};
use crate::instruction::Machine;
use crate::program::Program;
use crate::register::{RegisterRef, RegisterTable};

/// Longest stretch a sleeping node goes without checking whether it has been stopped.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// A compiled program together with its run state.
///
/// Clones share the program, the registers and the run state.
#[derive(Clone)]
pub struct Node {
    program: Arc<Program>,
    running: Arc<AtomicBool>,

    /// Run-once instructions that have already run.
    spent: Arc<Vec<AtomicBool>>,

    events: Arc<EventDispatcher>,
    logger: Logger,
}

/// Handle to a node running on its own thread.
pub struct NodeHandle {
    thread: JoinHandle<Result<(), Fault>>,
    running: Arc<AtomicBool>,
}

impl NodeHandle {
    /// Asks the node to stop before its next instruction.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Waits for the node to stop and returns the fault that stopped it, if any.
    pub fn join(self) -> Result<(), Fault> {
        self.thread.join().unwrap_or(Err(Fault::Aborted))
    }
}

/// The run state of one execution of a program.
struct Execution<'n> {
    node: &'n Node,

    /// Index of the instruction being executed.
    pc: usize,

    /// Set by a jump, replaces the regular advance to the next instruction.
    pending: Option<usize>,

    /// Set by `end`.
    halted: bool,
}

impl<'n> Execution<'n> {
    fn new(node: &'n Node) -> Execution<'n> {
        Execution {
            node,
            pc: 0,
            pending: None,
            halted: false,
        }
    }

    fn run(mut self) -> Result<(), Fault> {
        let node = self.node;
        let program: &'n Program = &node.program;
        let clock = program.registers.clock();

        if program.is_empty() {
            return Ok(());
        }

        // Spent entries passed over since the last executed instruction.
        let mut skipped = 0;

        while self.is_running() {
            let position = self.pc;
            let entry = &program.entries[position];

            if node.spent[position].load(Ordering::SeqCst) {
                if skipped == program.len() {
                    debug!(node.logger, "every instruction is spent");
                    break;
                }

                skipped += 1;
                node.dispatch(Event::Skipped { position });
                self.pc = (position + 1) % program.len();
                continue;
            }

            skipped = 0;

            let started = Instant::now();
            let tick = clock.scale(1);
            let opcode = entry.instruction.opcode();

            trace!(self.node.logger, "execute instruction";
                "pc" => position,
                "line" => entry.line,
                "op" => %opcode);

            entry.instruction.execute(&mut self)?;

            self.node.dispatch(Event::Executed { position, opcode });

            if entry.run_once {
                node.spent[position].store(true, Ordering::SeqCst);
            }

            self.pc = match self.pending.take() {
                Some(target) => target,
                None => (position + 1) % program.len(),
            };

            if let Some(rest) = tick.and_then(|tick| tick.checked_sub(started.elapsed())) {
                thread::sleep(rest);
            }
        }

        Ok(())
    }
}

impl Machine for Execution<'_> {
    fn accumulator(&self) -> RegisterRef {
        self.node.program.registers.accumulator().clone()
    }

    fn jump_to(&mut self, label: &str) -> Result<(), Fault> {
        let target = self.node.program
            .label(label)
            .ok_or_else(|| Fault::UnknownLabel(label.to_string()))?;

        self.pending = Some(target);
        Ok(())
    }

    fn stop(&mut self) {
        self.halted = true;
    }

    fn is_running(&self) -> bool {
        !self.halted && self.node.is_running()
    }

    fn sleep(&mut self, units: i32) {
        let deadline = match self.node.program.registers.clock().scale(units) {
            Some(duration) => Instant::now() + duration,
            None => return,
        };

        while self.node.is_running() {
            let now = Instant::now();

            if now >= deadline {
                break;
            }

            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

impl Node {
    pub fn new(program: Program) -> Node {
        Node {
            spent: Arc::new((0..program.len()).map(|_| AtomicBool::new(false)).collect()),
            program: Arc::new(program),
            running: Arc::new(AtomicBool::new(false)),
            events: Arc::new(EventDispatcher::new()),
            logger: Logger::root(Discard, o!()),
        }
    }

    pub fn with_logger<L>(mut self, logger: L) -> Node
    where
        L: Into<Option<Logger>>,
    {
        self.set_logger(logger);
        self
    }

    pub fn set_logger<L>(&mut self, logger: L)
    where
        L: Into<Option<Logger>>,
    {
        self.logger = logger.into().unwrap_or_else(|| Logger::root(Discard, o!()));
    }

    pub fn add_listener<L: EventListener + 'static>(&self, listener: L) {
        self.events.add_listener(listener)
    }

    fn dispatch(&self, event: Event) {
        self.events.dispatch(event)
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn registers(&self) -> &RegisterTable {
        &self.program.registers
    }

    /// Looks up one of the node's registers by name.
    pub fn register(&self, identifier: &str) -> Option<RegisterRef> {
        self.program.registers.get(identifier)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Asks the node to stop before its next instruction.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Marks the node as running. Fails if it already is.
    fn claim(&self) -> Result<(), Fault> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| Fault::AlreadyRunning)
    }

    /// Runs the node on the current thread until it stops.
    pub fn run(&self) -> Result<(), Fault> {
        self.claim()?;
        self.execute()
    }

    /// Runs the node on a new thread.
    ///
    /// If the node is already running, the returned handle joins with
    /// [Fault::AlreadyRunning] and does not control the running instance.
    pub fn start(&self) -> NodeHandle {
        if let Err(fault) = self.claim() {
            warn!(self.logger, "node is already running");

            return NodeHandle {
                thread: thread::spawn(move || Err(fault)),
                running: Arc::new(AtomicBool::new(false)),
            };
        }

        let node = self.clone();
        let thread = thread::spawn(move || node.execute());

        NodeHandle {
            thread,
            running: self.running.clone(),
        }
    }

    fn execute(&self) -> Result<(), Fault> {
        debug!(self.logger, "node started"; "instructions" => self.program.len());

        let result = Execution::new(self).run();
        self.running.store(false, Ordering::SeqCst);

        match &result {
            Ok(()) => {
                debug!(self.logger, "node stopped");
                self.dispatch(Event::Stopped);
            },
            Err(fault) => {
                warn!(self.logger, "node faulted"; "fault" => %fault);
                self.dispatch(Event::Faulted(fault.clone()));
            },
        }

        result
    }
}
