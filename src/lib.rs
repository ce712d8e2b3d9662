//! # Ingress Annotation Controller
//!
//! A level-triggered Kubernetes controller that keeps one managed Ingress
//! per Service carrying the `ingress/http` annotation: the Ingress exists
//! exactly when the annotation does, regardless of which watch events were
//! missed or delivered out of order.
//!
//! The core pieces:
//!
//! - [`workqueue`] - deduplicating, rate-limited key queue with per-key
//!   in-flight serialization and retry bookkeeping
//! - [`controller`] - fixed worker pool, typed event handlers, ownership
//!   filtering, and the bounded retry policy
//! - [`reconciler`] - the idempotent `sync(key)` decision logic
//! - [`watch`] - adaptation of the kube watcher substrate into typed
//!   notifications
//! - [`api`] - trait seams for cache lookups and Ingress mutations
//!
//! Tests are included in the module files and in `tests/`.

pub mod api;
pub mod backoff;
pub mod constants;
pub mod controller;
pub mod metrics;
pub mod reconciler;
pub mod server;
pub mod watch;
pub mod workqueue;
