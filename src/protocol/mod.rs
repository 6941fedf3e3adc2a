//! Agent wire protocols
//!
//! - `assuan`: the line protocol spoken by gpg-agent
//! - `ssh`: the SSH agent binary protocol

pub mod assuan;
pub mod ssh;

pub use ssh::{AgentMessage, Identity, MessageType};
