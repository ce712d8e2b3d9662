//! # Constants
//!
//! Shared defaults used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! CLI flags or environment variables where applicable.

/// Default number of parallel reconciliation workers.
///
/// Bounds maximum reconciliation concurrency; per-key serialization is
/// enforced by the work queue regardless of pool size.
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// Annotation that marks a Service as wanting a managed Ingress.
pub const DEFAULT_ANNOTATION_KEY: &str = "ingress/http";

/// Consecutive sync failures for one key before the controller gives up
/// until a fresh notification arrives.
pub const MAX_RETRIES: u32 = 10;

/// Base delay for the work queue rate limiter (milliseconds).
pub const BACKOFF_BASE_MS: u64 = 5;

/// Upper bound on a single rate-limited requeue delay (milliseconds).
pub const BACKOFF_MAX_MS: u64 = 30_000;

/// Default HTTP server port for metrics and health probes.
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Ingress class assigned to managed Ingress resources.
pub const INGRESS_CLASS_NAME: &str = "ingress";

/// Host used by the single routing rule on managed Ingress resources.
pub const INGRESS_HOST: &str = "example.com";

/// Backend port used when a Service declares no ports.
pub const DEFAULT_BACKEND_PORT: i32 = 80;

/// Kind of the triggering resource, used by the ownership filter on
/// Ingress delete notifications.
pub const TRIGGER_KIND: &str = "Service";
