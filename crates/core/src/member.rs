//! Externally visible member projection.

use serde::{Deserialize, Serialize};

/// Extension fields allowed to reach a [`Member`].
///
/// Anything an item tracks beyond these (see [`crate::ItemExtensions`]) stays internal.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemberExtensions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphaned: Option<bool>,
}

impl MemberExtensions {
    pub const FIELDS: &'static [&'static str] = &[
        "createdBy",
        "creationTimestamp",
        "deletionTimestamp",
        "description",
        "kubeconfig",
        "orphaned",
    ];

    /// Overlay every field set in `patch`.
    pub(crate) fn merge(&mut self, patch: &MemberExtensions) {
        fn set<T: Clone>(dst: &mut Option<T>, src: &Option<T>) {
            if let Some(v) = src {
                *dst = Some(v.clone());
            }
        }
        set(&mut self.created_by, &patch.created_by);
        set(&mut self.creation_timestamp, &patch.creation_timestamp);
        set(&mut self.deletion_timestamp, &patch.deletion_timestamp);
        set(&mut self.description, &patch.description);
        set(&mut self.kubeconfig, &patch.kubeconfig);
        set(&mut self.orphaned, &patch.orphaned);
    }
}

/// One project member as seen by API consumers: username, merged roles, extensions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub username: String,
    pub roles: Vec<String>,
    #[serde(flatten)]
    pub extensions: MemberExtensions,
}

impl Member {
    pub fn new(username: impl Into<String>, roles: Vec<String>, extensions: &MemberExtensions) -> Self {
        Self { username: username.into(), roles, extensions: extensions.clone() }
    }

    pub fn is_orphaned(&self) -> bool {
        self.extensions.orphaned.unwrap_or(false)
    }
}
