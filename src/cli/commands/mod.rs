//! Command implementations for agent-proxy CLI

pub mod cleanup;
pub mod completion;
pub mod config;
pub mod run;
pub mod version;
