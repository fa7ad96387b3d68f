//! Multi-scenario data-analysis workbench.
//!
//! Scenarios are isolated, lineage-tracked copies of a working dataset. A
//! request runs a generated script against one scenario, repairing it within
//! a bounded number of attempts, or compares a table across several.

pub mod aggregate;
pub mod cache;
pub mod cli;
pub mod collaborator;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod handlers;
pub mod history;
pub mod llm;
pub mod printer;
pub mod role;
pub mod sandbox;
pub mod scenario;
pub mod store;
pub mod utils;
pub mod value;

pub use error::WorkbenchError;
