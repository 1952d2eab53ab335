//! Integration test suite for nodekeeper
//!
//! End-to-end tests against a local release server and fake node binaries
//! (small shell scripts, so the process tests only run on Unix).
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **cli**: the `nodekeeper` binary and its configuration handling
//! - **download**: streaming downloads, progress reports and failure cleanup
//! - **orchestrator**: update cycles, the single in-flight install and the loop
//! - **release**: release lookup against the API
//! - **supervisor**: launching, logging and stopping the node

#[path = "../common/mod.rs"]
mod common;

mod cli;
mod orchestrator;
mod release;
mod supervisor;
