//! Garden kubehub: the Kubernetes side of member management.
//!
//! [`ProjectStore`] and [`ServiceAccountStore`] are the seams the member
//! manager talks through; [`KubeProjects`] and [`KubeServiceAccounts`] back
//! them with kube-rs.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use garden_core::{Project, ServiceAccountInfo, Subject};
use k8s_openapi::api::authentication::v1::{TokenRequest, TokenRequestSpec};
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    core::{ApiResource, DynamicObject, ErrorResponse, GroupVersionKind},
    Client,
};
use serde::Deserialize;
use tracing::{debug, info};

mod kubeconfig;

pub use kubeconfig::{context_name, render_kubeconfig, KubeconfigParams};

pub const PROJECT_GROUP: &str = "core.gardener.cloud";
pub const PROJECT_VERSION: &str = "v1beta1";
pub const PROJECT_KIND: &str = "Project";
pub const PROJECT_PLURAL: &str = "projects";

/// Access to the cluster-scoped Project resource.
#[async_trait::async_trait]
pub trait ProjectStore: Send + Sync {
    /// Project whose `spec.namespace` is `namespace`; 404 if there is none.
    async fn find_by_namespace(&self, namespace: &str) -> kube::Result<Project>;

    /// Merge-patch `spec.members`.
    async fn patch_members(&self, name: &str, members: &[Subject]) -> kube::Result<()>;
}

/// Namespaced ServiceAccount operations.
#[async_trait::async_trait]
pub trait ServiceAccountStore: Send + Sync {
    async fn list(&self, namespace: &str) -> kube::Result<Vec<ServiceAccountInfo>>;

    /// Fails with 409 if the account already exists.
    async fn create(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> kube::Result<ServiceAccountInfo>;

    /// Fails with 404 if the account does not exist.
    async fn delete(&self, namespace: &str, name: &str) -> kube::Result<()>;

    async fn patch_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> kube::Result<ServiceAccountInfo>;

    /// Mint a bound token for the account.
    async fn create_token(
        &self,
        namespace: &str,
        name: &str,
        audiences: &[String],
        expiration_seconds: i64,
    ) -> kube::Result<String>;
}

/// True if `err` is an API error with the given HTTP status.
pub fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == code)
}

/// API error shaped like the server's own status responses.
pub fn api_error(code: u16, reason: &str, message: impl Into<String>) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.into(),
        reason: reason.to_string(),
        code,
    })
}

pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("creating kube client from default config")
}

fn render_time(t: &Time) -> String {
    t.0.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Shape a live ServiceAccount into the engine's view of it.
pub fn service_account_info(sa: &ServiceAccount) -> ServiceAccountInfo {
    let meta = &sa.metadata;
    ServiceAccountInfo {
        namespace: meta.namespace.clone().unwrap_or_default(),
        name: meta.name.clone().unwrap_or_default(),
        annotations: meta.annotations.clone().unwrap_or_default(),
        creation_timestamp: meta.creation_timestamp.as_ref().map(render_time),
        deletion_timestamp: meta.deletion_timestamp.as_ref().map(render_time),
        secrets: sa
            .secrets
            .as_ref()
            .map(|refs| refs.iter().filter_map(|r| r.name.clone()).collect())
            .unwrap_or_default(),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProjectSpec {
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    members: Vec<Subject>,
}

fn project_from(obj: &DynamicObject) -> kube::Result<Project> {
    let spec: ProjectSpec = match obj.data.get("spec") {
        Some(v) => serde_json::from_value(v.clone()).map_err(kube::Error::SerdeError)?,
        None => ProjectSpec::default(),
    };
    Ok(Project {
        name: obj.metadata.name.clone().unwrap_or_default(),
        namespace: spec.namespace.unwrap_or_default(),
        members: spec.members,
    })
}

/// kube-rs backed [`ProjectStore`].
#[derive(Clone)]
pub struct KubeProjects {
    api: Api<DynamicObject>,
}

impl KubeProjects {
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk(PROJECT_GROUP, PROJECT_VERSION, PROJECT_KIND);
        let ar = ApiResource::from_gvk_with_plural(&gvk, PROJECT_PLURAL);
        Self { api: Api::all_with(client, &ar) }
    }
}

#[async_trait::async_trait]
impl ProjectStore for KubeProjects {
    async fn find_by_namespace(&self, namespace: &str) -> kube::Result<Project> {
        let list = self.api.list(&ListParams::default()).await?;
        for obj in list.items.iter() {
            let ns = obj.data.get("spec").and_then(|s| s.get("namespace")).and_then(|v| v.as_str());
            if ns == Some(namespace) {
                return project_from(obj);
            }
        }
        Err(api_error(404, "NotFound", format!("no project for namespace {}", namespace)))
    }

    async fn patch_members(&self, name: &str, members: &[Subject]) -> kube::Result<()> {
        let patch = serde_json::json!({ "spec": { "members": members } });
        let _ = self.api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        info!(project = %name, members = members.len(), "project members patched");
        Ok(())
    }
}

/// kube-rs backed [`ServiceAccountStore`].
#[derive(Clone)]
pub struct KubeServiceAccounts {
    client: Client,
}

impl KubeServiceAccounts {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ServiceAccount> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl ServiceAccountStore for KubeServiceAccounts {
    async fn list(&self, namespace: &str) -> kube::Result<Vec<ServiceAccountInfo>> {
        let list = self.api(namespace).list(&ListParams::default()).await?;
        debug!(ns = %namespace, count = list.items.len(), "service accounts listed");
        Ok(list.items.iter().map(service_account_info).collect())
    }

    async fn create(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> kube::Result<ServiceAccountInfo> {
        let sa = ServiceAccount {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                annotations: Some(annotations),
                ..Default::default()
            },
            ..Default::default()
        };
        let created = self.api(namespace).create(&PostParams::default(), &sa).await?;
        info!(ns = %namespace, name = %name, "service account created");
        Ok(service_account_info(&created))
    }

    async fn delete(&self, namespace: &str, name: &str) -> kube::Result<()> {
        let _ = self.api(namespace).delete(name, &DeleteParams::default()).await?;
        info!(ns = %namespace, name = %name, "service account deleted");
        Ok(())
    }

    async fn patch_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> kube::Result<ServiceAccountInfo> {
        let patch = serde_json::json!({ "metadata": { "annotations": annotations } });
        let patched = self.api(namespace).patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        debug!(ns = %namespace, name = %name, "service account annotations patched");
        Ok(service_account_info(&patched))
    }

    async fn create_token(
        &self,
        namespace: &str,
        name: &str,
        audiences: &[String],
        expiration_seconds: i64,
    ) -> kube::Result<String> {
        let req = TokenRequest {
            spec: TokenRequestSpec {
                audiences: audiences.to_vec(),
                expiration_seconds: Some(expiration_seconds),
                ..Default::default()
            },
            ..Default::default()
        };
        let body = serde_json::to_vec(&req).map_err(kube::Error::SerdeError)?;
        let res: TokenRequest = self
            .api(namespace)
            .create_subresource("token", name, &PostParams::default(), body)
            .await?;
        let token = res.status.map(|s| s.token).unwrap_or_default();
        debug!(ns = %namespace, name = %name, "service account token issued");
        Ok(token)
    }
}
