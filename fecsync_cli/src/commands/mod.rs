//! CLI subcommand implementations.

pub mod collect;
pub mod status;
