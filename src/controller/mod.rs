//! Controller module for unit-operator.
//!
//! Contains the reconciliation loop, finalizer lifecycle, error handling,
//! status aggregation, and validation logic.

pub mod context;
pub mod error;
pub mod finalizer;
pub mod reconciler;
pub mod status;
pub mod validation;
