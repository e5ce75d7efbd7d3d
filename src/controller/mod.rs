//! Controller module for redis-operator.
//!
//! The reconcile loop (`reconciler`) orchestrates the other pieces:
//! spec validation, the per-cluster meta cache, dependent-object
//! convergence (`ensure`), and topology checking/healing.

pub mod checker;
pub mod cluster_cache;
pub mod context;
pub mod ensure;
pub mod error;
pub mod healer;
pub mod reconciler;
pub mod validation;
