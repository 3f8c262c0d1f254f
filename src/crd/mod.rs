//! Custom Resource Definitions for unit-operator.
//!
//! - `Unit`: one primary workload plus optional Service, Ingress and PVC

mod unit;

pub use unit::*;
