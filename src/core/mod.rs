//! Core domain models for the orchestrator
//!
//! This module defines flow definitions, execution records, variable
//! handling and configuration.

pub mod artifact;
pub mod config;
pub mod error;
pub mod model;
pub mod state;
pub mod variables;

pub use artifact::*;
pub use error::*;
pub use model::*;
pub use state::*;
pub use variables::*;
