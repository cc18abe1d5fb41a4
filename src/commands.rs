//! Command registry.
//!
//! Maps command names to the dispatch tags sent over the wire and to the
//! handler each worker runs. Both the pooled and the serial path execute
//! tasks through [`CommandRegistry::execute`].

use crate::handlers;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Maximum result size in bytes, matching a worker's reply buffer.
pub const RESULT_CAPACITY: usize = 255;

/// Result text for a tag no handler is registered under.
pub const UNKNOWN_COMMAND: &str = "Unknown command";

/// A handler turns a task parameter into result text.
pub type Handler = fn(&str) -> String;

/// Wire identifier for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DispatchTag(pub u32);

impl DispatchTag {
    pub const PRIMES: Self = Self(1);
    pub const PRIME_DIVISORS: Self = Self(2);
    pub const ANAGRAMS: Self = Self(3);
    /// Reserved sentinel that tells a worker to exit.
    pub const TERMINATE: Self = Self(99);

    pub fn is_terminate(self) -> bool {
        self == Self::TERMINATE
    }
}

impl fmt::Display for DispatchTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Command {
    name: &'static str,
    tag: DispatchTag,
    handler: Handler,
}

/// Lookup table from command names and tags to handlers.
pub struct CommandRegistry {
    commands: Vec<Command>,
}

impl CommandRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    /// Registry with `PRIMES`, `PRIMEDIVISORS` and `ANAGRAMS`.
    pub fn builtin() -> Self {
        Self::new()
            .with("PRIMES", DispatchTag::PRIMES, handlers::primes)
            .with(
                "PRIMEDIVISORS",
                DispatchTag::PRIME_DIVISORS,
                handlers::prime_divisors,
            )
            .with("ANAGRAMS", DispatchTag::ANAGRAMS, handlers::anagrams_report)
    }

    /// Register a command. Later registrations shadow earlier ones.
    ///
    /// # Panics
    /// If `tag` is the termination sentinel.
    pub fn with(mut self, name: &'static str, tag: DispatchTag, handler: Handler) -> Self {
        assert!(!tag.is_terminate(), "tag {} is reserved", tag);
        self.commands.insert(0, Command { name, tag, handler });
        self
    }

    /// Resolve a command name to its dispatch tag.
    pub fn resolve(&self, name: &str) -> Option<DispatchTag> {
        self.commands
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.tag)
    }

    /// Run the handler registered under `tag`, truncating its output to
    /// [`RESULT_CAPACITY`]. Returns `None` for an unregistered tag.
    pub fn execute(&self, tag: DispatchTag, parameter: &str) -> Option<String> {
        let command = self.commands.iter().find(|c| c.tag == tag)?;
        let mut text = (command.handler)(parameter);
        if truncate_result(&mut text) {
            debug!(command = command.name, "Result truncated to {} bytes", RESULT_CAPACITY);
        }
        Some(text)
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Cut `text` to [`RESULT_CAPACITY`] bytes on a char boundary.
/// Returns whether anything was removed.
pub fn truncate_result(text: &mut String) -> bool {
    if text.len() <= RESULT_CAPACITY {
        return false;
    }
    let mut end = RESULT_CAPACITY;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    true
}
