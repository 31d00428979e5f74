//! Memory Agent: personal-context retrieval over email and calendar.

pub mod config;
pub mod error;
pub mod llm;
pub mod memory;

pub use error::{Error, Result};
