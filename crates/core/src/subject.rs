//! Raw RBAC subjects as stored in a Project's member list.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// API group of `User` subjects.
pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Username prefix of Kubernetes service accounts.
pub const SERVICE_ACCOUNT_PREFIX: &str = "system:serviceaccount:";

static SERVICE_ACCOUNT_USERNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^system:serviceaccount:([^:]+):([^:]+)$").expect("valid service account regex")
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SubjectKind {
    User,
    ServiceAccount,
}

impl SubjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::User => "User",
            SubjectKind::ServiceAccount => "ServiceAccount",
        }
    }
}

impl std::fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declarative member entry of a Project (`spec.members[]`).
///
/// The same principal may appear several times with different role
/// assignments; see [`Subject::username`] for the grouping key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub kind: SubjectKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
}

impl Subject {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::User,
            name: name.into(),
            namespace: None,
            api_group: Some(RBAC_API_GROUP.to_string()),
            role: None,
            roles: None,
        }
    }

    pub fn service_account(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::ServiceAccount,
            name: name.into(),
            namespace: Some(namespace.into()),
            api_group: None,
            role: None,
            roles: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = Some(roles.into_iter().map(Into::into).collect());
        self
    }

    /// Logical identity used to group subjects referring to the same principal.
    pub fn username(&self) -> String {
        match self.kind {
            SubjectKind::ServiceAccount => format!(
                "{}{}:{}",
                SERVICE_ACCOUNT_PREFIX,
                self.namespace.as_deref().unwrap_or_default(),
                self.name
            ),
            SubjectKind::User => self.name.clone(),
        }
    }
}

/// Classify a username as a `ServiceAccount` or `User` subject.
///
/// Total: anything not shaped like `system:serviceaccount:<ns>:<name>` is a user.
pub fn parse_username(username: &str) -> Subject {
    match SERVICE_ACCOUNT_USERNAME.captures(username) {
        Some(caps) => Subject::service_account(&caps[1], &caps[2]),
        None => Subject::user(username),
    }
}

/// Namespace and name of a service account username, if it is one.
pub fn service_account_ref(username: &str) -> Option<(&str, &str)> {
    let caps = SERVICE_ACCOUNT_USERNAME.captures(username)?;
    let ns = caps.get(1)?.as_str();
    let name = caps.get(2)?.as_str();
    Some((ns, name))
}

/// Project snapshot the engine works on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Project {
    pub name: String,
    pub namespace: String,
    pub members: Vec<Subject>,
}
