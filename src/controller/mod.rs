//! Controller implementations for Flotilla CRDs
//!
//! This module contains the reconciliation logic for Component resources.
//! The controller follows the Kubernetes controller pattern with
//! observe-diff-act loops; desired state is recomputed in full every pass.

mod component;

pub use component::{error_policy, reconcile, Context};
