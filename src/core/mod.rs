//! Core domain models for the pipeline executor
//!
//! This module defines the fundamental data structures that represent
//! pipelines, steps, runs and their results.

pub mod config;
pub mod pipeline;
pub mod run;
pub mod state;
pub mod step;
pub mod trigger;

pub use pipeline::*;
pub use run::*;
pub use state::*;
pub use step::*;
pub use trigger::*;
