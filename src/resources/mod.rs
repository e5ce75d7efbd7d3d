//! Kubernetes resource generation for redis clusters.
//!
//! Each submodule produces one family of dependent objects from a
//! validated RedisCluster spec:
//! - `statefulset`: redis and sentinel workloads
//! - `services`: headless and routable services
//! - `configmaps`: sentinel seed config, readiness and shutdown scripts
//! - `pdb`: pod disruption budgets
//! - `common`: naming, labels, owner references, quantities

pub mod common;
pub mod configmaps;
pub mod pdb;
pub mod services;
pub mod statefulset;
