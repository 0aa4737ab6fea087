//! Command handlers behind the `aequitas` binary

mod commands;

pub use commands::*;
