//! Core domain models
//!
//! This module defines the workflow definition, the stage graph, trigger
//! context, condition evaluation, run state and result aggregation.

pub mod condition;
pub mod config;
pub mod context;
pub mod findings;
pub mod graph;
pub mod pipeline;
pub mod results;
pub mod stage;
pub mod state;
pub mod workflow;

pub use context::*;
pub use pipeline::*;
pub use stage::*;
pub use state::*;
pub use workflow::*;
