//! Legion Tools - bridge between HTTP callers and external reconnaissance tools.
//!
//! This crate provides:
//! - `ExternalTool`: the strategy interface every integrated tool implements
//!   (argument building, output parsing, synthetic output)
//! - `ToolRegistry`: lookup table from tool id to implementation
//! - `SimulatedOutputGenerator`: seedable source of structurally valid fake results
//! - `ToolBridge`: resolves availability, runs the process and degrades to
//!   simulation on every execution failure
//!
//! Only output-parsing failures of a successful process are surfaced to the
//! caller as errors. Every other failure mode yields a simulated result.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod adapters;
pub mod bridge;
pub mod error;
pub mod registry;
pub mod simulate;
pub mod types;
mod validate;

pub use bridge::{BridgeConfig, ToolBridge};
pub use error::{ToolError, ToolResult};
pub use registry::{ExternalTool, ToolRegistry};
pub use simulate::SimulatedOutputGenerator;
pub use types::{
    CompanionScript, ExecutionMode, Invocation, SimulationReason, ToolContext, ToolDescriptor,
    ToolOutcome,
};
