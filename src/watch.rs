//! # Watch Pump
//!
//! Adapts raw `kube` watcher events into the controller's typed
//! [`Notification`] variants.
//!
//! The watcher substrate only reports "this object now looks like X" and
//! "this object is gone"; to hand the controller an `Updated { old, new }`
//! pair, each pump keeps the previously observed object per key. One pump
//! task runs per watched kind, feeding the same controller from its own
//! concurrent context.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use kube::ResourceExt;
use kube_runtime::watcher;
use tracing::{debug, warn};

use crate::controller::{object_key, Notification, NotificationHandler};

/// Drive `stream` to completion, dispatching each event through `handler`.
///
/// Watch errors are logged and skipped; the underlying watcher re-lists
/// and the level-triggered sync re-derives whatever was missed.
///
/// A re-list does not carry Delete events for objects removed while the
/// watcher was disconnected, so each `Init`/`InitDone` pair is used to
/// diff the new listing against `observed`: anything missing from the
/// listing is delivered as `Deleted` and dropped from the map.
pub async fn pump<K, S>(stream: S, handler: Arc<dyn NotificationHandler<K>>)
where
    K: Clone + ResourceExt,
    S: Stream<Item = Result<watcher::Event<K>, watcher::Error>>,
{
    futures::pin_mut!(stream);
    let mut observed: HashMap<String, K> = HashMap::new();
    let mut relisted: Option<HashSet<String>> = None;

    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Apply(object) | watcher::Event::InitApply(object)) => {
                let Some(key) = object_key(&object) else {
                    warn!("skipping watch event for object without namespace/name");
                    continue;
                };
                if let Some(listing) = relisted.as_mut() {
                    listing.insert(key.clone());
                }
                match observed.insert(key, object.clone()) {
                    Some(old) => handler.handle(Notification::Updated { old, new: object }),
                    None => handler.handle(Notification::Added(object)),
                }
            }
            Ok(watcher::Event::Delete(object)) => {
                if let Some(key) = object_key(&object) {
                    observed.remove(&key);
                }
                handler.handle(Notification::Deleted(object));
            }
            Ok(watcher::Event::Init) => relisted = Some(HashSet::new()),
            Ok(watcher::Event::InitDone) => {
                if let Some(listing) = relisted.take() {
                    let vanished: Vec<String> = observed
                        .keys()
                        .filter(|key| !listing.contains(*key))
                        .cloned()
                        .collect();
                    for key in vanished {
                        if let Some(old) = observed.remove(&key) {
                            handler.handle(Notification::Deleted(old));
                        }
                    }
                }
            }
            Err(err) => warn!(error = %err, "watch stream error, will retry"),
        }
    }
    debug!("watch stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Service;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl NotificationHandler<Service> for Recorder {
        fn handle(&self, notification: Notification<Service>) {
            let label = match notification {
                Notification::Added(s) => format!("added:{}", s.name_any()),
                Notification::Updated { new, .. } => format!("updated:{}", new.name_any()),
                Notification::Deleted(s) => format!("deleted:{}", s.name_any()),
            };
            self.seen.lock().unwrap().push(label);
        }
    }

    fn svc(name: &str, version: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns".to_string()),
                resource_version: Some(version.to_string()),
                ..ObjectMeta::default()
            },
            ..Service::default()
        }
    }

    #[tokio::test]
    async fn test_pump_distinguishes_adds_updates_and_deletes() {
        let recorder = Arc::new(Recorder::default());
        let events: Vec<Result<watcher::Event<Service>, watcher::Error>> = vec![
            Ok(watcher::Event::Init),
            Ok(watcher::Event::InitApply(svc("foo", "1"))),
            Ok(watcher::Event::InitDone),
            Ok(watcher::Event::Apply(svc("foo", "2"))),
            Ok(watcher::Event::Apply(svc("bar", "1"))),
            Ok(watcher::Event::Delete(svc("foo", "2"))),
        ];

        pump(
            futures::stream::iter(events),
            Arc::clone(&recorder) as Arc<dyn NotificationHandler<Service>>,
        )
        .await;

        assert_eq!(
            recorder.seen.lock().unwrap().as_slice(),
            &[
                "added:foo".to_string(),
                "updated:foo".to_string(),
                "added:bar".to_string(),
                "deleted:foo".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_relist_prunes_objects_deleted_while_disconnected() {
        let recorder = Arc::new(Recorder::default());
        // foo and bar are observed, then the watcher re-lists with only
        // foo present: bar was deleted during the disconnect and must be
        // delivered as Deleted, and its later re-creation as a fresh Added.
        let events: Vec<Result<watcher::Event<Service>, watcher::Error>> = vec![
            Ok(watcher::Event::Apply(svc("foo", "1"))),
            Ok(watcher::Event::Apply(svc("bar", "1"))),
            Ok(watcher::Event::Init),
            Ok(watcher::Event::InitApply(svc("foo", "2"))),
            Ok(watcher::Event::InitDone),
            Ok(watcher::Event::Apply(svc("bar", "5"))),
        ];

        pump(
            futures::stream::iter(events),
            Arc::clone(&recorder) as Arc<dyn NotificationHandler<Service>>,
        )
        .await;

        assert_eq!(
            recorder.seen.lock().unwrap().as_slice(),
            &[
                "added:foo".to_string(),
                "added:bar".to_string(),
                "updated:foo".to_string(),
                "deleted:bar".to_string(),
                "added:bar".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_pump_readds_after_delete() {
        let recorder = Arc::new(Recorder::default());
        let events: Vec<Result<watcher::Event<Service>, watcher::Error>> = vec![
            Ok(watcher::Event::Apply(svc("foo", "1"))),
            Ok(watcher::Event::Delete(svc("foo", "1"))),
            Ok(watcher::Event::Apply(svc("foo", "3"))),
        ];

        pump(
            futures::stream::iter(events),
            Arc::clone(&recorder) as Arc<dyn NotificationHandler<Service>>,
        )
        .await;

        assert_eq!(
            recorder.seen.lock().unwrap().as_slice(),
            &[
                "added:foo".to_string(),
                "deleted:foo".to_string(),
                "added:foo".to_string(),
            ]
        );
    }
}
