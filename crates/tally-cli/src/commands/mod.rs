//! CLI subcommand implementations.

pub mod identity;
pub mod import;
pub mod summary;
pub mod util;
