//! # Controller
//!
//! Dispatcher, event handlers, and the retry policy tying the work queue
//! to the reconciler.
//!
//! A fixed pool of symmetric worker tasks drains the queue; any worker may
//! process any key, and per-key serialization comes from the queue's
//! in-flight marker rather than from worker affinity. Watch notifications
//! arrive through the typed [`NotificationHandler`] implementations and
//! are reduced to `namespace/name` keys before they touch the queue.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

use crate::constants::{MAX_RETRIES, TRIGGER_KIND};
use crate::metrics;
use crate::reconciler::{Reconciler, SyncError};
use crate::workqueue::WorkQueue;

/// A change observed on a watched kind.
#[derive(Debug, Clone)]
pub enum Notification<T> {
    Added(T),
    Updated { old: T, new: T },
    Deleted(T),
}

/// Capability interface implemented by the controller once per watched
/// kind; the watch pump dispatches through it.
pub trait NotificationHandler<T>: Send + Sync {
    fn handle(&self, notification: Notification<T>);
}

/// Derive the `namespace/name` key for an object, if it has both.
#[must_use]
pub fn object_key<K: ResourceExt>(object: &K) -> Option<String> {
    let meta = object.meta();
    let namespace = meta.namespace.as_deref()?;
    let name = meta.name.as_deref()?;
    Some(format!("{namespace}/{name}"))
}

pub struct Controller {
    queue: WorkQueue<String>,
    reconciler: Reconciler,
    max_retries: u32,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl Controller {
    #[must_use]
    pub fn new(queue: WorkQueue<String>, reconciler: Reconciler) -> Self {
        Self {
            queue,
            reconciler,
            max_retries: MAX_RETRIES,
        }
    }

    #[must_use]
    pub fn queue(&self) -> &WorkQueue<String> {
        &self.queue
    }

    /// Run `workers` reconciliation loops until `shutdown` fires, then
    /// drain: the queue stops accepting keys, blocked workers wake, and
    /// in-flight syncs finish their current iteration before the join.
    pub async fn run(self: Arc<Self>, workers: usize, shutdown: impl Future<Output = ()> + Send) {
        info!(workers, "starting reconciliation workers");
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let controller = Arc::clone(&self);
                tokio::spawn(async move {
                    while controller.process_next_item().await {}
                    debug!(worker, "worker exited");
                })
            })
            .collect();

        shutdown.await;
        info!("shutdown signal received, draining work queue");
        self.queue.shut_down();
        for handle in handles {
            // Worker tasks only end via queue shutdown; a join error means
            // the task panicked and the remaining workers keep the pool
            // alive until shutdown.
            if let Err(err) = handle.await {
                error!(error = %err, "worker task failed");
            }
        }
    }

    /// One dispatcher iteration: dequeue, sync, route the outcome.
    ///
    /// Returns `false` once the queue reports shutdown. `done` is called
    /// on every path so the key's in-flight marker is always released.
    pub async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        metrics::increment_reconciliations();
        let started = Instant::now();
        match self.reconciler.sync(&key).await {
            Ok(()) => self.queue.forget(key.as_str()),
            Err(err) => self.handle_error(&key, &err),
        }
        metrics::observe_reconciliation_duration(started.elapsed());

        self.queue.done(key.as_str());
        metrics::set_queue_depth(self.queue.len());
        true
    }

    /// Retry policy: rate-limited requeue up to the retry bound, then
    /// surface the error and clear the key's retry state so a fresh
    /// notification starts from zero. Never aborts the process.
    pub fn handle_error(&self, key: &str, err: &SyncError) {
        metrics::increment_reconciliation_errors();

        if !err.is_retryable() {
            error!(key, error = %err, "dropping key after non-retryable sync error");
            self.queue.forget(key);
            return;
        }

        let requeues = self.queue.num_requeues(key);
        if requeues < self.max_retries {
            debug!(key, requeues, error = %err, "requeueing after sync error");
            metrics::increment_requeues();
            self.queue.add_rate_limited(key.to_string());
            return;
        }

        error!(
            key,
            requeues,
            error = %err,
            "retry budget exhausted, waiting for a new notification"
        );
        self.queue.forget(key);
    }

    fn enqueue<K: ResourceExt>(&self, object: &K) {
        match object_key(object) {
            Some(key) => {
                self.queue.add(key);
                metrics::set_queue_depth(self.queue.len());
            }
            None => warn!("dropping notification for object without namespace/name"),
        }
    }
}

impl NotificationHandler<Service> for Controller {
    fn handle(&self, notification: Notification<Service>) {
        match notification {
            Notification::Added(service) => self.enqueue(&service),
            Notification::Updated { old, new } => {
                // Resync re-deliveries carry an unchanged resourceVersion;
                // comparing revision tokens suppresses those without deep
                // structural comparison.
                if old.resource_version() == new.resource_version() {
                    return;
                }
                self.enqueue(&new);
            }
            // Service deletion needs no sync: the derived Ingress is
            // cleaned up through its own lifecycle.
            Notification::Deleted(_) => {}
        }
    }
}

impl NotificationHandler<Ingress> for Controller {
    fn handle(&self, notification: Notification<Ingress>) {
        let Notification::Deleted(ingress) = notification else {
            // Add/update of an Ingress is either our own write echoing back
            // or someone else's resource; neither is a reconcile signal.
            return;
        };

        // Ownership filter: only react when the deleted Ingress was (or
        // could have been) managed for a Service. A controller owner of a
        // different kind marks someone else's resource.
        if let Some(owner) = ingress
            .owner_references()
            .iter()
            .find(|owner| owner.controller == Some(true))
        {
            if owner.kind != TRIGGER_KIND {
                debug!(
                    name = %ingress.name_any(),
                    owner_kind = %owner.kind,
                    "ignoring deletion of ingress owned by another controller"
                );
                return;
            }
        }
        self.enqueue(&ingress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::FibonacciBackoff;
    use crate::reconciler::testing::{
        harness_with_client, ingress, service, Reply, RecordingClient,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use std::time::Duration;
    use tokio::time::timeout;

    fn controller_with(client: RecordingClient) -> (Arc<Controller>, crate::reconciler::testing::Harness) {
        let h = harness_with_client(client);
        let queue = WorkQueue::new(FibonacciBackoff::default());
        let reconciler = Reconciler::new(
            Arc::clone(&h.services) as _,
            Arc::clone(&h.ingresses) as _,
            Arc::clone(&h.client) as _,
            crate::reconciler::testing::TEST_ANNOTATION,
        );
        (Arc::new(Controller::new(queue, reconciler)), h)
    }

    fn controller() -> (Arc<Controller>, crate::reconciler::testing::Harness) {
        controller_with(RecordingClient::default())
    }

    fn notify<T>(controller: &Controller, notification: Notification<T>)
    where
        Controller: NotificationHandler<T>,
    {
        NotificationHandler::handle(controller, notification);
    }

    fn owned_ingress(namespace: &str, name: &str, owner_kind: &str) -> Ingress {
        let mut ing = ingress(namespace, name);
        ing.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "v1".to_string(),
            kind: owner_kind.to_string(),
            name: name.to_string(),
            uid: "1234".to_string(),
            controller: Some(true),
            ..OwnerReference::default()
        }]);
        ing
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_add_enqueues_key() {
        let (c, _h) = controller();
        notify(&c, Notification::Added(service("ns", "foo", true)));
        assert_eq!(c.queue().get().await.as_deref(), Some("ns/foo"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_update_with_same_revision_is_skipped() {
        let (c, _h) = controller();

        let mut old = service("ns", "foo", true);
        old.metadata.resource_version = Some("7".to_string());
        let new = old.clone();
        notify(&c, Notification::Updated { old, new });

        assert!(c.queue().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_update_with_new_revision_enqueues() {
        let (c, _h) = controller();

        let mut old = service("ns", "foo", true);
        old.metadata.resource_version = Some("7".to_string());
        let mut new = old.clone();
        new.metadata.resource_version = Some("8".to_string());
        notify(&c, Notification::Updated { old, new });

        assert_eq!(c.queue().get().await.as_deref(), Some("ns/foo"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_owned_ingress_deletion_is_filtered() {
        let (c, _h) = controller();

        notify(&c, Notification::Deleted(owned_ingress("ns", "foo", "Deployment")));

        assert!(c.queue().is_empty());
        assert!(timeout(Duration::from_millis(50), c.queue().get())
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_owned_ingress_deletion_enqueues() {
        let (c, _h) = controller();

        notify(&c, Notification::Deleted(owned_ingress("ns", "foo", "Service")));

        assert_eq!(c.queue().get().await.as_deref(), Some("ns/foo"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unowned_ingress_deletion_enqueues() {
        let (c, _h) = controller();

        notify(&c, Notification::Deleted(ingress("ns", "foo")));

        assert_eq!(c.queue().get().await.as_deref(), Some("ns/foo"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_sync_resets_retry_state() {
        let (c, h) = controller();
        h.services.insert("ns", "foo", service("ns", "foo", true));

        c.queue().add("ns/foo".to_string());
        assert!(c.process_next_item().await);

        assert_eq!(h.client.create_count(), 1);
        assert_eq!(c.queue().num_requeues("ns/foo"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_requeue_until_retry_bound() {
        let (c, h) = controller_with(RecordingClient::replying(Reply::Transient, Reply::Transient));
        h.services.insert("ns", "foo", service("ns", "foo", true));

        c.queue().add("ns/foo".to_string());
        // Each iteration fails and requeues with backoff; paused time
        // auto-advances through the delays.
        for expected_requeues in 1..=MAX_RETRIES {
            assert!(c.process_next_item().await);
            assert_eq!(c.queue().num_requeues("ns/foo"), expected_requeues);
        }

        // The next failure exhausts the budget: retry state clears and
        // nothing is requeued.
        assert!(c.process_next_item().await);
        assert_eq!(c.queue().num_requeues("ns/foo"), 0);
        assert!(timeout(Duration::from_secs(120), c.queue().get())
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_key_is_dropped_without_retry() {
        let (c, h) = controller();

        c.queue().add("not-a-key".to_string());
        assert!(c.process_next_item().await);

        assert_eq!(h.client.create_count(), 0);
        assert_eq!(c.queue().num_requeues("not-a-key"), 0);
        assert!(timeout(Duration::from_millis(50), c.queue().get())
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_drains_and_joins_on_shutdown() {
        let (c, h) = controller();
        h.services.insert("ns", "foo", service("ns", "foo", true));
        c.queue().add("ns/foo".to_string());

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let run = {
            let c = Arc::clone(&c);
            tokio::spawn(c.run(2, async move {
                let _ = rx.await;
            }))
        };

        // Give the workers a chance to drain the key.
        while h.client.create_count() == 0 {
            tokio::task::yield_now().await;
        }

        tx.send(()).unwrap();
        run.await.unwrap();

        assert_eq!(h.client.create_count(), 1);
    }
}
