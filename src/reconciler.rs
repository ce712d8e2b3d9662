//! # Reconciler
//!
//! Level-triggered sync logic: an Ingress exists exactly when its Service
//! carries the designated annotation.
//!
//! ## Reconciliation Flow
//!
//! 1. Split the key into namespace and name
//! 2. Look up the Service in the watch cache; absent means nothing to do
//! 3. Evaluate the trigger predicate (annotation present)
//! 4. Look up the Ingress of the same namespace/name
//! 5. Create or delete so that Ingress existence matches the predicate
//!
//! Every step re-derives truth from current cache state, so the algorithm
//! is correct regardless of which events were missed or reordered, and a
//! repeated sync with unchanged state performs no mutations.

use std::fmt;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use thiserror::Error;
use tracing::{debug, info};

use crate::api::{ApiError, IngressClient, ObjectCache};
use crate::constants::{DEFAULT_BACKEND_PORT, INGRESS_CLASS_NAME, INGRESS_HOST};

#[derive(Debug, Error)]
pub enum SyncError {
    /// Corrupted enqueue input. Retrying cannot make the key well-formed.
    #[error("malformed key {0:?}: expected namespace/name")]
    MalformedKey(String),
    /// Transient API failure (conflict, throttling, network); may succeed
    /// on retry.
    #[error(transparent)]
    Api(ApiError),
}

impl SyncError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Api(_))
    }
}

/// Split a `namespace/name` key into its parts.
pub fn split_key(key: &str) -> Result<(&str, &str), SyncError> {
    match key.split_once('/') {
        Some((namespace, name))
            if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
        {
            Ok((namespace, name))
        }
        _ => Err(SyncError::MalformedKey(key.to_string())),
    }
}

/// Stateless decision logic; all cluster access is injected.
pub struct Reconciler {
    services: Arc<dyn ObjectCache<Service>>,
    ingresses: Arc<dyn ObjectCache<Ingress>>,
    client: Arc<dyn IngressClient>,
    annotation_key: String,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("annotation_key", &self.annotation_key)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        services: Arc<dyn ObjectCache<Service>>,
        ingresses: Arc<dyn ObjectCache<Ingress>>,
        client: Arc<dyn IngressClient>,
        annotation_key: impl Into<String>,
    ) -> Self {
        Self {
            services,
            ingresses,
            client,
            annotation_key: annotation_key.into(),
        }
    }

    /// Converge the Ingress addressed by `key` towards the state its
    /// Service currently asks for.
    ///
    /// Returns an error only for conditions that may succeed on retry;
    /// not-found reads and idempotent mutation outcomes are success.
    pub async fn sync(&self, key: &str) -> Result<(), SyncError> {
        let (namespace, name) = split_key(key)?;

        let Some(service) = self.services.get(namespace, name) else {
            // Service is gone. Cleanup of a leftover Ingress is driven by
            // its own delete notification rather than re-derived here; an
            // Ingress orphaned while the controller was not watching is a
            // known gap and is left in place.
            debug!(key, "service not in cache, nothing to reconcile");
            return Ok(());
        };

        let wants_ingress = service.annotations().contains_key(&self.annotation_key);
        let ingress_exists = self.ingresses.get(namespace, name).is_some();

        match (wants_ingress, ingress_exists) {
            (true, false) => self.create(&service).await,
            (false, true) => self.delete(namespace, name).await,
            // Already converged.
            _ => Ok(()),
        }
    }

    async fn create(&self, service: &Service) -> Result<(), SyncError> {
        let ingress = build_ingress(service);
        match self.client.create_ingress(&ingress).await {
            Ok(()) => {
                info!(
                    namespace = %service.namespace().unwrap_or_default(),
                    name = %service.name_any(),
                    "created ingress"
                );
                Ok(())
            }
            // Another actor or an earlier partial attempt got there first.
            Err(ApiError::AlreadyExists) => Ok(()),
            Err(err) => Err(SyncError::Api(err)),
        }
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), SyncError> {
        match self.client.delete_ingress(namespace, name).await {
            Ok(()) => {
                info!(namespace, name, "deleted ingress");
                Ok(())
            }
            Err(ApiError::NotFound) => Ok(()),
            Err(err) => Err(SyncError::Api(err)),
        }
    }
}

/// Build the Ingress a Service asks for: same namespace/name, a single
/// prefix rule routing `/` on the fixed host to the Service's primary
/// port, and the Service's controller owner carried over for provenance.
#[must_use]
pub fn build_ingress(service: &Service) -> Ingress {
    let name = service.name_any();
    let controller_owner = service
        .owner_references()
        .iter()
        .find(|owner| owner.controller == Some(true))
        .cloned();
    let backend_port = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .and_then(|ports| ports.first())
        .map_or(DEFAULT_BACKEND_PORT, |port| port.port);

    Ingress {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: service.namespace(),
            owner_references: controller_owner.map(|owner| vec![owner]),
            ..ObjectMeta::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: Some(INGRESS_CLASS_NAME.to_string()),
            rules: Some(vec![IngressRule {
                host: Some(INGRESS_HOST.to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name,
                                port: Some(ServiceBackendPort {
                                    number: Some(backend_port),
                                    ..ServiceBackendPort::default()
                                }),
                            }),
                            ..IngressBackend::default()
                        },
                    }],
                }),
            }]),
            ..IngressSpec::default()
        }),
        status: None,
    }
}
