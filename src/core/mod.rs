//! Core provisioning logic: types, parsing, planning, codegen, execution.

pub mod codegen;
pub mod executor;
pub mod parser;
pub mod planner;
pub mod preflight;
pub mod selector;
pub mod state;
pub mod types;
