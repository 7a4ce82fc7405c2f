//! Bytecode contract inference for JVM class files.
//!
//! Classes are scanned into a compact instruction form, each method is summarized by
//! per-direction equations over the keys of the members it calls, and solve requests
//! resolve those equations into nullness, failure and purity facts.

pub mod analysis;
pub mod cli;
pub mod descriptor;
pub mod engine;
pub mod flow;
pub mod hierarchy;
pub mod ir;
pub mod opcodes;
pub mod report;
pub mod scan;
pub mod telemetry;

#[cfg(test)]
mod test_harness;
