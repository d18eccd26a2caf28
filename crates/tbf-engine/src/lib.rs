#![doc = include_str!("../README.md")]

//! Concurrent test generation and test-based validation.
//!
//! [`orchestrator::run`] drives one run: an [`generator::InputGenerator`]
//! produces test cases while the [`validator::TestValidator`] checks them
//! with the configured [`strategy`] chain.

pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod generator;
pub mod harness;
pub mod machine_model;
pub mod nondet;
pub mod orchestrator;
pub mod process;
pub mod statistics;
pub mod strategy;
pub mod test_case;
pub mod test_vector;
pub mod validator;
pub mod verdict;
pub mod witness;

mod timeout;

pub use config::{GenerationMode, RunOptions, ValidationConfig};
pub use error::RunError;
pub use orchestrator::{run, RunReport};
pub use verdict::Verdict;
