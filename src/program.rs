//! The compiled form of one node's source text.

use std::collections::HashMap;

use crate::channel::PinRegistry;
use crate::config::Config;
use crate::error::ParseError;
use crate::instruction::Instruction;
use crate::parser::Parser;
use crate::register::RegisterTable;

/// A top-level instruction and its bookkeeping.
#[derive(Clone, Debug)]
pub struct Entry {
    pub instruction: Instruction,

    /// Marked with `@`: executes on the first visit only.
    pub run_once: bool,

    /// Line of the source text the instruction starts on.
    pub line: usize,
}

#[derive(Clone)]
pub struct Program {
    pub entries: Vec<Entry>,

    /// Label name to the index of the entry it precedes.
    pub jump_table: HashMap<String, usize>,

    pub registers: RegisterTable,
}

impl Program {
    /// Parses a standalone program with the default configuration and its own pin registry.
    ///
    /// Nodes that talk to each other must be compiled against a shared registry, see
    /// [Compiler](crate::compiler::Compiler).
    pub fn parse(source: &str) -> Result<Program, ParseError> {
        let config = Config::default();
        Parser::new(&PinRegistry::new(&config), &config).parse(source)
    }

    pub fn label(&self, label: &str) -> Option<usize> {
        self.jump_table.get(label).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
