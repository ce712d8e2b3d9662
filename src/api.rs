//! # Cluster Access
//!
//! Abstractions over the watch cache and the mutating API client.
//!
//! The reconciler only ever sees these traits: point lookups come from
//! [`ObjectCache`] (backed by reflector stores in production, by maps in
//! tests) and mutations go through [`IngressClient`]. Keeping both behind
//! traits keeps the sync algorithm free of any transport concerns.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, ResourceExt};
use kube_runtime::reflector::{ObjectRef, Store};
use thiserror::Error;

/// Outcome taxonomy for mutating API calls.
///
/// `AlreadyExists` and `NotFound` are split out because the reconciler
/// treats them as successful convergence rather than failures.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("resource already exists")]
    AlreadyExists,
    #[error("resource not found")]
    NotFound,
    #[error("api request failed: {0}")]
    Other(#[source] kube::Error),
}

impl ApiError {
    fn classify(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref response) if response.code == 409 => Self::AlreadyExists,
            kube::Error::Api(ref response) if response.code == 404 => Self::NotFound,
            other => Self::Other(other),
        }
    }
}

/// Point-in-time lookup by namespace and name against a watch cache.
pub trait ObjectCache<K>: Send + Sync {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>>;
}

impl<K> ObjectCache<K> for Store<K>
where
    // Lookup is the reflector's addressing trait; () is the dynamic type of
    // all static k8s-openapi kinds.
    K: kube_runtime::reflector::Lookup<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        Store::get(self, &ObjectRef::new(name).within(namespace))
    }
}

/// Mutating client for the derived Ingress resources.
#[async_trait]
pub trait IngressClient: Send + Sync {
    async fn create_ingress(&self, ingress: &Ingress) -> Result<(), ApiError>;
    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<(), ApiError>;
}

/// [`IngressClient`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeIngressClient {
    client: Client,
}

impl KubeIngressClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn ingresses(&self, namespace: &str) -> Api<Ingress> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl fmt::Debug for KubeIngressClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeIngressClient").finish_non_exhaustive()
    }
}

#[async_trait]
impl IngressClient for KubeIngressClient {
    async fn create_ingress(&self, ingress: &Ingress) -> Result<(), ApiError> {
        let namespace = ingress.namespace().unwrap_or_default();
        self.ingresses(&namespace)
            .create(&PostParams::default(), ingress)
            .await
            .map(|_| ())
            .map_err(ApiError::classify)
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<(), ApiError> {
        self.ingresses(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(ApiError::classify)
    }
}
