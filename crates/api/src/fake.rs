//! In-memory cluster implementing both collaborator traits, for tests and demos.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use garden_core::{Project, ServiceAccountInfo, Subject};
use garden_kubehub::{api_error, ProjectStore, ServiceAccountStore};

/// Creation timestamp stamped onto accounts created through the fake.
pub const FAKE_CREATION_TIMESTAMP: &str = "2024-01-01T00:00:00Z";

#[derive(Debug, Default)]
struct State {
    projects: Vec<Project>,
    service_accounts: Vec<ServiceAccountInfo>,
    calls: Vec<String>,
    patches: Vec<Vec<Subject>>,
    respawn: Vec<String>,
}

/// Simple in-memory cluster. Records every mutating call as `"<verb> <ns>/<name>"`.
#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new(project: Project, service_accounts: Vec<ServiceAccountInfo>) -> Self {
        let state = State { projects: vec![project], service_accounts, ..Default::default() };
        Self { state: Mutex::new(state) }
    }

    /// Accounts the cluster recreates on its own right after deletion, like `default`.
    pub fn with_respawning(self, name: &str) -> Self {
        self.lock().respawn.push(name.to_string());
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Every `spec.members` patch, oldest first.
    pub fn patches(&self) -> Vec<Vec<Subject>> {
        self.lock().patches.clone()
    }

    pub fn project(&self, name: &str) -> Option<Project> {
        self.lock().projects.iter().find(|p| p.name == name).cloned()
    }

    pub fn service_account(&self, namespace: &str, name: &str) -> Option<ServiceAccountInfo> {
        self.lock().service_accounts.iter().find(|s| s.namespace == namespace && s.name == name).cloned()
    }
}

#[async_trait::async_trait]
impl ProjectStore for FakeCluster {
    async fn find_by_namespace(&self, namespace: &str) -> kube::Result<Project> {
        self.lock()
            .projects
            .iter()
            .find(|p| p.namespace == namespace)
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound", format!("no project for namespace {}", namespace)))
    }

    async fn patch_members(&self, name: &str, members: &[Subject]) -> kube::Result<()> {
        let mut st = self.lock();
        st.calls.push(format!("patch project/{}", name));
        st.patches.push(members.to_vec());
        let project = st
            .projects
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| api_error(404, "NotFound", format!("projects \"{}\" not found", name)))?;
        project.members = members.to_vec();
        Ok(())
    }
}

#[async_trait::async_trait]
impl ServiceAccountStore for FakeCluster {
    async fn list(&self, namespace: &str) -> kube::Result<Vec<ServiceAccountInfo>> {
        Ok(self.lock().service_accounts.iter().filter(|s| s.namespace == namespace).cloned().collect())
    }

    async fn create(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> kube::Result<ServiceAccountInfo> {
        let mut st = self.lock();
        st.calls.push(format!("create {}/{}", namespace, name));
        if st.service_accounts.iter().any(|s| s.namespace == namespace && s.name == name) {
            return Err(api_error(409, "AlreadyExists", format!("serviceaccounts \"{}\" already exists", name)));
        }
        let sa = ServiceAccountInfo {
            namespace: namespace.to_string(),
            name: name.to_string(),
            annotations,
            creation_timestamp: Some(FAKE_CREATION_TIMESTAMP.to_string()),
            ..Default::default()
        };
        st.service_accounts.push(sa.clone());
        Ok(sa)
    }

    async fn delete(&self, namespace: &str, name: &str) -> kube::Result<()> {
        let mut st = self.lock();
        st.calls.push(format!("delete {}/{}", namespace, name));
        let pos = st
            .service_accounts
            .iter()
            .position(|s| s.namespace == namespace && s.name == name)
            .ok_or_else(|| api_error(404, "NotFound", format!("serviceaccounts \"{}\" not found", name)))?;
        st.service_accounts.remove(pos);
        if st.respawn.iter().any(|n| n == name) {
            st.service_accounts.push(ServiceAccountInfo {
                namespace: namespace.to_string(),
                name: name.to_string(),
                creation_timestamp: Some(FAKE_CREATION_TIMESTAMP.to_string()),
                ..Default::default()
            });
        }
        Ok(())
    }

    async fn patch_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> kube::Result<ServiceAccountInfo> {
        let mut st = self.lock();
        st.calls.push(format!("patch {}/{}", namespace, name));
        let sa = st
            .service_accounts
            .iter_mut()
            .find(|s| s.namespace == namespace && s.name == name)
            .ok_or_else(|| api_error(404, "NotFound", format!("serviceaccounts \"{}\" not found", name)))?;
        sa.annotations.extend(annotations);
        Ok(sa.clone())
    }

    async fn create_token(
        &self,
        namespace: &str,
        name: &str,
        _audiences: &[String],
        _expiration_seconds: i64,
    ) -> kube::Result<String> {
        let mut st = self.lock();
        st.calls.push(format!("token {}/{}", namespace, name));
        if !st.service_accounts.iter().any(|s| s.namespace == namespace && s.name == name) {
            return Err(api_error(404, "NotFound", format!("serviceaccounts \"{}\" not found", name)));
        }
        Ok(format!("token-{}", name))
    }
}
