//! Compiling source texts into runnable [Nodes](Node).

use std::sync::atomic::{AtomicUsize, Ordering};

use slog::{o, Discard, Logger};

use crate::channel::PinRegistry;
use crate::config::Config;
use crate::error::ParseError;
use crate::node::Node;
use crate::parser::Parser;
use crate::program::Program;

/// Compiles source texts against one shared [PinRegistry], so that every node it produces can
/// reach the others through their pins.
pub struct Compiler {
    config: Config,
    pins: PinRegistry,
    logger: Logger,
    compiled: AtomicUsize,
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}

impl Compiler {
    pub fn new() -> Compiler {
        Compiler::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Compiler {
        Compiler {
            pins: PinRegistry::new(&config),
            config,
            logger: Logger::root(Discard, o!()),
            compiled: AtomicUsize::new(0),
        }
    }

    pub fn with_logger<L>(mut self, logger: L) -> Compiler
    where
        L: Into<Option<Logger>>,
    {
        self.logger = logger.into().unwrap_or_else(|| Logger::root(Discard, o!()));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pins(&self) -> &PinRegistry {
        &self.pins
    }

    /// Parses a source text without wrapping it in a node.
    pub fn parse(&self, source: &str) -> Result<Program, ParseError> {
        Parser::new(&self.pins, &self.config)
            .with_logger(self.logger.clone())
            .parse(source)
    }

    /// Compiles a source text into a node that is ready to be started.
    pub fn compile(&self, source: &str) -> Result<Node, ParseError> {
        let index = self.compiled.fetch_add(1, Ordering::SeqCst);
        let logger = self.logger.new(o!("node" => index));

        let program = Parser::new(&self.pins, &self.config)
            .with_logger(logger.clone())
            .parse(source)?;

        Ok(Node::new(program).with_logger(logger))
    }
}

/// Compiles a standalone node with the default configuration.
pub fn compile(source: &str) -> Result<Node, ParseError> {
    compile_with_logger(source, None::<Logger>)
}

pub fn compile_with_logger<L>(source: &str, logger: L) -> Result<Node, ParseError>
where
    L: Into<Option<Logger>>,
{
    Compiler::new().with_logger(logger).compile(source)
}
