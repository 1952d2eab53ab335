//! Core types and error handling for nodekeeper
//!
//! The [`error`] module defines [`NodeError`], the typed error returned by every
//! node management operation, and the [`ErrorContext`] presentation used by the
//! CLI entry point.

pub mod error;

pub use error::{ErrorContext, NodeError, user_friendly_error};
