//! Generic utility primitives with zero domain knowledge.
//!
//! - `fanout` - Bounded parallel execution over independent units
//! - `io` - File I/O with consistent error handling
//! - `shell` - Shell escaping and quoting
//! - `template` - String template rendering

pub mod fanout;
pub mod io;
pub mod shell;
pub mod template;
