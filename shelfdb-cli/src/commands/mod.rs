//! Subcommand implementations

pub mod default_config;
pub mod init;
pub mod target;
