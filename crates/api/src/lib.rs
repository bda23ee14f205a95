//! Garden project members.
//!
//! Entry points used by the API layer. Each call builds a fresh
//! [`MemberManager`] from the Project and ServiceAccount snapshot of the
//! request's namespace and delegates to it.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use tracing::info;

mod config;
mod error;
pub mod fake;
mod manager;

pub use config::MembersConfig;
pub use error::{MemberError, MemberResult};
pub use garden_core::{Member, MemberExtensions};
pub use manager::{Backends, MemberBody, MemberManager};

/// One inbound call: acting user, project namespace, optional member name and body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemberRequest {
    pub user: String,
    pub namespace: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

impl MemberRequest {
    pub fn new(user: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self { user: user.into(), namespace: namespace.into(), name: None, body: None }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    fn parse_body(&self) -> MemberResult<MemberBody> {
        match &self.body {
            None | Some(serde_json::Value::Null) => Ok(MemberBody::default()),
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| MemberError::UnprocessableEntity(format!("invalid member body: {}", e))),
        }
    }

    fn required_name(&self) -> MemberResult<&str> {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| MemberError::UnprocessableEntity("member name is required".into()))
    }

    async fn manager(&self, backends: &Backends, config: &MembersConfig) -> MemberResult<MemberManager> {
        MemberManager::load(backends.clone(), config.clone(), &self.user, &self.namespace).await
    }
}

pub async fn list(backends: &Backends, config: &MembersConfig, req: MemberRequest) -> MemberResult<Vec<Member>> {
    let manager = req.manager(backends, config).await?;
    Ok(manager.list())
}

pub async fn get(backends: &Backends, config: &MembersConfig, req: MemberRequest) -> MemberResult<Member> {
    let name = req.required_name()?;
    let mut manager = req.manager(backends, config).await?;
    manager.get(name).await
}

/// Create a member; the name comes from the request or, failing that, the body.
pub async fn create(backends: &Backends, config: &MembersConfig, req: MemberRequest) -> MemberResult<Vec<Member>> {
    let mut body = req.parse_body()?;
    let name = match req.name.clone().or_else(|| body.name.take()) {
        Some(n) if !n.is_empty() => n,
        _ => return Err(MemberError::UnprocessableEntity("member name is required".into())),
    };
    let mut manager = req.manager(backends, config).await?;
    manager.create(&name, body).await?;
    info!(ns = %req.namespace, user = %req.user, member = %name, "member created");
    Ok(manager.list())
}

pub async fn update(backends: &Backends, config: &MembersConfig, req: MemberRequest) -> MemberResult<Member> {
    let name = req.required_name()?;
    let body = req.parse_body()?;
    let mut manager = req.manager(backends, config).await?;
    manager.update(name, body).await?;
    manager.get(name).await
}

pub async fn remove(backends: &Backends, config: &MembersConfig, req: MemberRequest) -> MemberResult<Vec<Member>> {
    let name = req.required_name()?;
    let mut manager = req.manager(backends, config).await?;
    manager.delete(name).await?;
    Ok(manager.list())
}

/// Recreate a project service account; `None` if there is no such member.
pub async fn reset_service_account(
    backends: &Backends,
    config: &MembersConfig,
    req: MemberRequest,
) -> MemberResult<Option<Member>> {
    let name = req.required_name()?;
    let mut manager = req.manager(backends, config).await?;
    manager.reset_service_account(name).await?;
    if !manager.subject_list().has(name) {
        return Ok(None);
    }
    manager.get(name).await.map(Some)
}
