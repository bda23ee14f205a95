//! Member manager: subject list reconciliation plus the Kubernetes side effects it implies.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use garden_core::{
    service_account_ref, ItemExtensions, ItemIndex, Member, MemberExtensions, Project, ServiceAccountInfo,
    SubjectKind, SubjectList, SubjectListItem, CREATED_BY_ANNOTATION, DESCRIPTION_ANNOTATION,
};
use garden_kubehub::{context_name, is_status, render_kubeconfig, KubeconfigParams, ProjectStore, ServiceAccountStore};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::MembersConfig;
use crate::error::{MemberError, MemberResult};

/// Cluster collaborators a manager talks to.
#[derive(Clone)]
pub struct Backends {
    pub projects: Arc<dyn ProjectStore>,
    pub service_accounts: Arc<dyn ServiceAccountStore>,
}

/// Payload of create/update requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberBody {
    /// Username; only read on create when the request carries no name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Null and blank entries are dropped during validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<Option<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl MemberBody {
    pub fn with_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { roles: Some(roles.into_iter().map(|r| Some(r.into())).collect()), ..Default::default() }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Everything an operation needs besides the subject list itself.
struct Scope {
    backends: Backends,
    config: MembersConfig,
    user: String,
    project: String,
    namespace: String,
}

impl Scope {
    /// Namespace and name of `id` if it is a service account of this project.
    fn owned_service_account<'a>(&self, id: &'a str) -> Option<(&'a str, &'a str)> {
        service_account_ref(id).filter(|(ns, _)| *ns == self.namespace)
    }

    fn set_item_roles(&self, item: &mut SubjectListItem, roles: Option<Vec<Option<String>>>) -> MemberResult<()> {
        let roles = roles.ok_or_else(|| MemberError::UnprocessableEntity("roles must be an array".into()))?;
        if roles.len() > self.config.max_roles {
            return Err(MemberError::UnprocessableEntity(format!(
                "at most {} roles are allowed (got {})",
                self.config.max_roles,
                roles.len()
            )));
        }
        let roles: Vec<String> = roles
            .iter()
            .flatten()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect();
        if roles.is_empty() && item.kind() != SubjectKind::ServiceAccount {
            return Err(MemberError::UnprocessableEntity(format!("member {} needs at least one role", item.id())));
        }
        item.set_roles(roles);
        Ok(())
    }

    fn annotations(created_by: &str, description: Option<&str>) -> BTreeMap<String, String> {
        let mut annotations = BTreeMap::new();
        annotations.insert(CREATED_BY_ANNOTATION.to_string(), created_by.to_string());
        if let Some(d) = description {
            annotations.insert(DESCRIPTION_ANNOTATION.to_string(), d.to_string());
        }
        annotations
    }

    async fn create_service_account(&self, item: &mut SubjectListItem, description: Option<&str>) -> MemberResult<()> {
        let id = item.id();
        let Some((ns, name)) = self.owned_service_account(&id) else {
            debug!(id = %id, "service account of another namespace; not creating");
            return Ok(());
        };
        let sa = self
            .backends
            .service_accounts
            .create(ns, name, Self::annotations(&self.user, description))
            .await?;
        counter!("members_sa_created_total", 1u64);
        item.extend(&sa.extensions());
        Ok(())
    }

    /// Write the description annotation, but only when it actually changes.
    async fn update_service_account(&self, item: &mut SubjectListItem, description: Option<&str>) -> MemberResult<()> {
        let id = item.id();
        let Some((ns, name)) = self.owned_service_account(&id) else { return Ok(()) };
        let Some(description) = description else { return Ok(()) };
        let patch = ItemExtensions {
            member: MemberExtensions { description: Some(description.to_string()), ..Default::default() },
            secrets: None,
        };
        if !item.extend(&patch) {
            debug!(id = %id, "description unchanged");
            return Ok(());
        }
        let mut annotations = BTreeMap::new();
        annotations.insert(DESCRIPTION_ANNOTATION.to_string(), description.to_string());
        self.backends.service_accounts.patch_annotations(ns, name, annotations).await?;
        Ok(())
    }

    /// Delete the backing object; a missing one counts as deleted.
    async fn delete_service_account(&self, id: &str) -> MemberResult<()> {
        let Some((ns, name)) = self.owned_service_account(id) else { return Ok(()) };
        match self.backends.service_accounts.delete(ns, name).await {
            Ok(()) => {
                counter!("members_sa_deleted_total", 1u64);
                Ok(())
            }
            Err(e) if is_status(&e, 404) => {
                debug!(id = %id, "service account already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn reset_service_account(&self, item: &mut SubjectListItem) -> MemberResult<()> {
        let id = item.id();
        if item.kind() != SubjectKind::ServiceAccount {
            return Err(MemberError::UnprocessableEntity(format!("{} is not a service account", id)));
        }
        let Some((ns, name)) = self.owned_service_account(&id) else {
            return Err(MemberError::UnprocessableEntity(format!(
                "cannot reset service account {} outside of namespace {}",
                id, self.namespace
            )));
        };
        self.delete_service_account(&id).await?;

        let current = &item.extensions().member;
        let created_by = current.created_by.clone().unwrap_or_else(|| self.user.clone());
        let annotations = Self::annotations(&created_by, current.description.as_deref());
        let (sa, outcome) = match self.backends.service_accounts.create(ns, name, annotations.clone()).await {
            Ok(sa) => (sa, ResetOutcome::Recreated),
            Err(e) if is_status(&e, 409) => {
                // recreated by the cluster itself (e.g. `default`)
                warn!(id = %id, "service account already recreated; patching annotations");
                let sa = self.backends.service_accounts.patch_annotations(ns, name, annotations).await?;
                (sa, ResetOutcome::Patched)
            }
            Err(e) => return Err(e.into()),
        };
        outcome.record();
        let mut patch = sa.extensions();
        patch.member.created_by = Some(created_by);
        patch.member.orphaned = Some(false);
        item.extend(&patch);
        Ok(())
    }

    async fn attach_kubeconfig(&self, item: &mut SubjectListItem) -> MemberResult<()> {
        let id = item.id();
        let Some((ns, name)) = self.owned_service_account(&id) else { return Ok(()) };
        if item.is_orphaned() {
            return Ok(());
        }
        let token = self
            .backends
            .service_accounts
            .create_token(ns, name, &self.config.token_audiences, self.config.token_expiration_seconds)
            .await?;
        let context = context_name(&self.config.cluster_name, &self.project, name);
        let kubeconfig = render_kubeconfig(&KubeconfigParams {
            user_name: name,
            context_name: &context,
            cluster_name: &self.config.cluster_name,
            namespace: ns,
            token: &token,
            server: &self.config.api_server_url,
            ca_data: self.config.api_server_ca_data.as_deref(),
        })
        .map_err(|e| MemberError::Internal(format!("rendering kubeconfig: {}", e)))?;
        item.extend(&ItemExtensions {
            member: MemberExtensions { kubeconfig: Some(kubeconfig), ..Default::default() },
            secrets: None,
        });
        Ok(())
    }
}

/// How a reset brought the account back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResetOutcome {
    /// Created by us after the delete.
    Recreated,
    /// Already recreated by the cluster; only annotations were written.
    Patched,
}

impl ResetOutcome {
    fn metric(self) -> &'static str {
        match self {
            ResetOutcome::Recreated => "members_sa_created_total",
            ResetOutcome::Patched => "members_sa_reset_patched_total",
        }
    }

    fn record(self) {
        counter!(self.metric(), 1u64);
    }
}

fn observe<T>(op: &'static str, id: &str, t0: Instant, res: &MemberResult<T>) {
    let took_ms = t0.elapsed().as_secs_f64() * 1000.0;
    histogram!("members_op_latency_ms", took_ms, "op" => op);
    counter!("members_ops_total", 1u64, "op" => op);
    match res {
        Ok(_) => info!(op, id = %id, took_ms = %t0.elapsed().as_millis(), "members: ok"),
        Err(e) => {
            counter!("members_errors_total", 1u64, "op" => op, "kind" => e.kind_label());
            warn!(op, id = %id, error = %e, took_ms = %t0.elapsed().as_millis(), "members: failed");
        }
    }
}

/// Per-request member manager over one Project snapshot.
///
/// Built from a point-in-time snapshot and never refreshed; mutating
/// operations end with a single merge-patch of the Project's members.
pub struct MemberManager {
    scope: Scope,
    subject_list: SubjectList,
}

impl MemberManager {
    pub fn new(
        backends: Backends,
        config: MembersConfig,
        user: impl Into<String>,
        project: Project,
        service_accounts: Vec<ServiceAccountInfo>,
    ) -> Self {
        let subject_list = SubjectList::new(&project.namespace, project.members, &service_accounts);
        let scope = Scope { backends, config, user: user.into(), project: project.name, namespace: project.namespace };
        Self { scope, subject_list }
    }

    /// Fetch the project owning `namespace` and its service accounts, concurrently.
    pub async fn load(backends: Backends, config: MembersConfig, user: &str, namespace: &str) -> MemberResult<Self> {
        let t0 = Instant::now();
        let (project, service_accounts) = futures::try_join!(
            backends.projects.find_by_namespace(namespace),
            backends.service_accounts.list(namespace),
        )?;
        debug!(
            ns = %namespace,
            project = %project.name,
            subjects = project.members.len(),
            service_accounts = service_accounts.len(),
            took_ms = %t0.elapsed().as_millis(),
            "members: snapshot loaded"
        );
        Ok(Self::new(backends, config, user, project, service_accounts))
    }

    pub fn project_name(&self) -> &str {
        &self.scope.project
    }

    pub fn namespace(&self) -> &str {
        &self.scope.namespace
    }

    pub fn subject_list(&self) -> &SubjectList {
        &self.subject_list
    }

    pub fn list(&self) -> Vec<Member> {
        self.subject_list.members()
    }

    /// Single member; service accounts of this project come with a fresh kubeconfig.
    pub async fn get(&mut self, id: &str) -> MemberResult<Member> {
        let t0 = Instant::now();
        let res = self.get_member(id).await;
        observe("get", id, t0, &res);
        res
    }

    pub async fn create(&mut self, id: &str, body: MemberBody) -> MemberResult<()> {
        let t0 = Instant::now();
        let res = self.create_member(id, body).await;
        observe("create", id, t0, &res);
        res
    }

    pub async fn update(&mut self, id: &str, body: MemberBody) -> MemberResult<()> {
        let t0 = Instant::now();
        let res = self.update_member(id, body).await;
        observe("update", id, t0, &res);
        res
    }

    /// Absent members are ignored.
    pub async fn delete(&mut self, id: &str) -> MemberResult<()> {
        let t0 = Instant::now();
        let res = self.delete_member(id).await;
        observe("delete", id, t0, &res);
        res
    }

    /// Recreate the backing ServiceAccount, invalidating its tokens. Membership is untouched.
    pub async fn reset_service_account(&mut self, id: &str) -> MemberResult<()> {
        let t0 = Instant::now();
        let res = match self.subject_list.get_mut(id) {
            Some(item) => self.scope.reset_service_account(item).await,
            None => Ok(()),
        };
        observe("reset", id, t0, &res);
        res
    }

    async fn get_member(&mut self, id: &str) -> MemberResult<Member> {
        let item = self
            .subject_list
            .get_mut(id)
            .ok_or_else(|| MemberError::NotFound(format!("member {} not found", id)))?;
        if item.kind() == SubjectKind::ServiceAccount {
            self.scope.attach_kubeconfig(item).await?;
        }
        Ok(item.member())
    }

    async fn create_member(&mut self, id: &str, body: MemberBody) -> MemberResult<()> {
        if self.subject_list.has(id) {
            return Err(MemberError::Conflict(format!("member {} already exists", id)));
        }
        let mut item = SubjectListItem::from_username(id, ItemIndex::EndOfList);
        self.scope.set_item_roles(&mut item, body.roles)?;
        if item.kind() == SubjectKind::ServiceAccount {
            self.scope.create_service_account(&mut item, body.description.as_deref()).await?;
        }
        // TODO: decide whether a role-less service account should be registered instead of only created
        if item.roles().is_empty() {
            info!(id = %id, "no roles; member not registered");
            return Ok(());
        }
        self.subject_list.set(item);
        self.save().await
    }

    async fn update_member(&mut self, id: &str, body: MemberBody) -> MemberResult<()> {
        let item = self
            .subject_list
            .get_mut(id)
            .ok_or_else(|| MemberError::NotFound(format!("member {} not found", id)))?;
        self.scope.set_item_roles(item, body.roles)?;
        if item.kind() == SubjectKind::ServiceAccount {
            if item.is_orphaned() {
                self.scope.create_service_account(item, body.description.as_deref()).await?;
                item.extend(&ItemExtensions::orphaned(false));
            } else {
                self.scope.update_service_account(item, body.description.as_deref()).await?;
            }
        }
        self.save().await
    }

    async fn delete_member(&mut self, id: &str) -> MemberResult<()> {
        let Some(kind) = self.subject_list.get(id).map(|i| i.kind()) else {
            debug!(id = %id, "member not present; nothing to delete");
            return Ok(());
        };
        if kind == SubjectKind::ServiceAccount {
            self.scope.delete_service_account(id).await?;
        }
        self.subject_list.delete(id);
        self.save().await
    }

    async fn save(&self) -> MemberResult<()> {
        let subjects = self.subject_list.subjects();
        self.scope.backends.projects.patch_members(&self.scope.project, &subjects).await?;
        counter!("members_project_patches_total", 1u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_outcomes_count_under_their_own_metric() {
        assert_eq!(ResetOutcome::Recreated.metric(), "members_sa_created_total");
        assert_eq!(ResetOutcome::Patched.metric(), "members_sa_reset_patched_total");
    }

    #[test]
    fn body_roles_accept_null_entries() {
        let body: MemberBody = serde_json::from_value(serde_json::json!({ "roles": ["viewer", null] })).unwrap();
        assert_eq!(body.roles, Some(vec![Some("viewer".to_string()), None]));
        assert!(serde_json::from_value::<MemberBody>(serde_json::json!({ "roles": "viewer" })).is_err());
    }
}
