//! Shared types for the edge controller workspace.
//!
//! The entity model and its validation rules live here because the HTTP
//! and gRPC surfaces both depend on identical invariants.

#![warn(missing_docs)]

pub mod entities;
pub mod validation;

pub use validation::ValidationError;
