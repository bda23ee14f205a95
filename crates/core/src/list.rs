//! Reconciled username -> item map built from a Project and its live service accounts.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::item::{ItemExtensions, ItemIndex, SubjectListItem, UniqItem};
use crate::member::{Member, MemberExtensions};
use crate::subject::{service_account_ref, Subject, SERVICE_ACCOUNT_PREFIX};

pub const CREATED_BY_ANNOTATION: &str = "dashboard.gardener.cloud/created-by";
/// Older creator annotation, still honoured when the current one is missing.
pub const LEGACY_CREATED_BY_ANNOTATION: &str = "garden.sapcloud.io/createdBy";
pub const DESCRIPTION_ANNOTATION: &str = "dashboard.gardener.cloud/description";

/// Shaped view of a live ServiceAccount object.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountInfo {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<String>,
    #[serde(default)]
    pub secrets: Vec<String>,
}

impl ServiceAccountInfo {
    pub fn username(&self) -> String {
        format!("{}{}:{}", SERVICE_ACCOUNT_PREFIX, self.namespace, self.name)
    }

    pub fn created_by(&self) -> Option<&str> {
        self.annotations
            .get(CREATED_BY_ANNOTATION)
            .or_else(|| self.annotations.get(LEGACY_CREATED_BY_ANNOTATION))
            .map(|s| s.as_str())
    }

    pub fn description(&self) -> Option<&str> {
        self.annotations.get(DESCRIPTION_ANNOTATION).map(|s| s.as_str())
    }

    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Extensions an item picks up from this object.
    pub fn extensions(&self) -> ItemExtensions {
        ItemExtensions {
            member: MemberExtensions {
                created_by: self.created_by().map(str::to_string),
                creation_timestamp: self.creation_timestamp.clone(),
                deletion_timestamp: self.deletion_timestamp.clone(),
                description: self.description().map(str::to_string),
                ..Default::default()
            },
            secrets: if self.secrets.is_empty() { None } else { Some(self.secrets.clone()) },
        }
    }
}

/// Insertion-ordered map of logical members.
#[derive(Debug, Clone, Default)]
pub struct SubjectList {
    map: FxHashMap<String, SubjectListItem>,
    order: Vec<String>,
}

impl SubjectList {
    /// Reconcile declarative `subjects` with the live `service_accounts` of `namespace`.
    ///
    /// Declarative entries come first, in the order their username first
    /// appears; live service accounts no subject references follow.
    pub fn new(namespace: &str, subjects: Vec<Subject>, service_accounts: &[ServiceAccountInfo]) -> Self {
        // live service accounts, keyed by username
        let mut live: FxHashMap<String, ItemExtensions> = FxHashMap::default();
        let mut live_order: Vec<String> = Vec::with_capacity(service_accounts.len());
        for sa in service_accounts {
            let id = sa.username();
            if live.insert(id.clone(), sa.extensions()).is_none() {
                live_order.push(id);
            }
        }

        // declarative subjects grouped by username, original positions kept
        let mut grouped: FxHashMap<String, Vec<UniqItem>> = FxHashMap::default();
        let mut order: Vec<String> = Vec::new();
        for (pos, subject) in subjects.into_iter().enumerate() {
            let id = subject.username();
            let entry = grouped.entry(id.clone()).or_insert_with(|| {
                order.push(id);
                Vec::new()
            });
            entry.push(UniqItem::new(subject, ItemIndex::At(pos)));
        }

        let mut map: FxHashMap<String, SubjectListItem> = FxHashMap::default();
        order.retain(|id| {
            let Some(items) = grouped.remove(id) else { return false };
            let Some(mut item) = SubjectListItem::from_items(items) else { return false };
            if in_namespace(id, namespace) {
                match live.remove(id) {
                    Some(ext) => {
                        item.extend(&ext);
                    }
                    None => {
                        item.extend(&ItemExtensions::orphaned(true));
                    }
                }
            }
            map.insert(id.clone(), item);
            true
        });

        // no-member service accounts fill in behind the declarative entries
        let mut no_member = 0usize;
        for id in live_order {
            let Some(ext) = live.remove(&id) else { continue };
            if map.contains_key(&id) {
                continue;
            }
            let mut item = SubjectListItem::from_username(&id, ItemIndex::NotInList);
            item.extend(&ext);
            map.insert(id.clone(), item);
            order.push(id);
            no_member += 1;
        }
        debug!(namespace = %namespace, items = order.len(), no_member, "subject list built");
        Self { map, order }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn has(&self, id: &str) -> bool {
        self.map.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&SubjectListItem> {
        self.map.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut SubjectListItem> {
        self.map.get_mut(id)
    }

    /// Insert or replace; a new username is appended to the iteration order.
    pub fn set(&mut self, item: SubjectListItem) {
        let id = item.id();
        if self.map.insert(id.clone(), item).is_none() {
            self.order.push(id);
        }
    }

    pub fn delete(&mut self, id: &str) -> Option<SubjectListItem> {
        let removed = self.map.remove(id)?;
        self.order.retain(|k| k != id);
        Some(removed)
    }

    /// Items in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &SubjectListItem> + '_ {
        self.order.iter().filter_map(move |id| self.map.get(id))
    }

    /// Every item, active or not, as seen by API consumers.
    pub fn members(&self) -> Vec<Member> {
        self.iter().map(|i| i.member()).collect()
    }

    /// Raw subjects to persist into `spec.members`, ordered by original position.
    pub fn subjects(&self) -> Vec<Subject> {
        let mut active: Vec<&UniqItem> = self
            .iter()
            .flat_map(|i| i.occurrences())
            .filter(|u| u.index().is_active())
            .collect();
        active.sort_by_key(|u| u.index());
        active.into_iter().map(|u| u.subject().clone()).collect()
    }
}

fn in_namespace(id: &str, namespace: &str) -> bool {
    matches!(service_account_ref(id), Some((ns, _)) if ns == namespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::SubjectKind;

    const NS: &str = "garden-foo";

    fn roles(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn sa(name: &str, created_by: &str, ts: &str) -> ServiceAccountInfo {
        let mut annotations = BTreeMap::new();
        annotations.insert(CREATED_BY_ANNOTATION.to_string(), created_by.to_string());
        ServiceAccountInfo {
            namespace: NS.into(),
            name: name.into(),
            annotations,
            creation_timestamp: Some(ts.into()),
            ..Default::default()
        }
    }

    fn fixture() -> SubjectList {
        let subjects = vec![
            Subject::user("foo@example.org").with_role("admin").with_roles(["owner"]),
            Subject::user("mutiple@bar.com").with_role("admin"),
            Subject::service_account(NS, "robot").with_role("viewer"),
            Subject::user("mutiple@bar.com").with_role("admin").with_roles(["viewer"]),
            Subject::service_account(NS, "robot-orphaned").with_role("viewer"),
            Subject::service_account("garden-other", "robot").with_role("viewer"),
        ];
        let live = vec![sa("robot", "foo@example.org", "robot-time"), sa("robot-nomember", "foo", "bar-time")];
        SubjectList::new(NS, subjects, &live)
    }

    #[test]
    fn groups_by_username_in_first_seen_order() {
        let list = fixture();
        let ids: Vec<String> = list.iter().map(|i| i.id()).collect();
        assert_eq!(
            ids,
            vec![
                "foo@example.org",
                "mutiple@bar.com",
                "system:serviceaccount:garden-foo:robot",
                "system:serviceaccount:garden-foo:robot-orphaned",
                "system:serviceaccount:garden-other:robot",
                "system:serviceaccount:garden-foo:robot-nomember",
            ]
        );
        assert!(matches!(list.get("mutiple@bar.com"), Some(SubjectListItem::Group(_))));
        assert_eq!(list.get("mutiple@bar.com").unwrap().roles(), roles(&["admin", "viewer"]));
    }

    #[test]
    fn merges_live_metadata_and_flags_orphans() {
        let list = fixture();
        let robot = list.get("system:serviceaccount:garden-foo:robot").unwrap().member();
        assert_eq!(robot.extensions.created_by.as_deref(), Some("foo@example.org"));
        assert_eq!(robot.extensions.orphaned, None);

        let orphan = list.get("system:serviceaccount:garden-foo:robot-orphaned").unwrap();
        assert!(orphan.is_orphaned());

        // foreign namespace: neither merged nor flagged
        let foreign = list.get("system:serviceaccount:garden-other:robot").unwrap();
        assert_eq!(foreign.extensions(), &ItemExtensions::default());
    }

    #[test]
    fn no_member_service_accounts_show_up_without_roles() {
        let list = fixture();
        let m = list.get("system:serviceaccount:garden-foo:robot-nomember").unwrap();
        assert!(!m.is_active());
        assert!(!m.is_orphaned());
        let member = m.member();
        assert_eq!(
            serde_json::to_value(&member).unwrap(),
            serde_json::json!({
                "username": "system:serviceaccount:garden-foo:robot-nomember",
                "roles": [],
                "createdBy": "foo",
                "creationTimestamp": "bar-time"
            })
        );
        assert!(list.subjects().iter().all(|s| s.name != "robot-nomember"));
    }

    #[test]
    fn legacy_creator_annotation_is_a_fallback() {
        let mut info = sa("robot", "new", "t");
        info.annotations.insert(LEGACY_CREATED_BY_ANNOTATION.into(), "old".into());
        assert_eq!(info.created_by(), Some("new"));
        info.annotations.remove(CREATED_BY_ANNOTATION);
        assert_eq!(info.created_by(), Some("old"));
    }

    #[test]
    fn subjects_keep_original_order() {
        let list = fixture();
        let subjects = list.subjects();
        assert_eq!(subjects.len(), 6);
        assert_eq!(subjects[0].name, "foo@example.org");
        assert_eq!(subjects[1].name, "mutiple@bar.com");
        assert_eq!(subjects[3].roles, Some(roles(&["viewer"])));
        assert_eq!(subjects[5].namespace.as_deref(), Some("garden-other"));
    }

    #[test]
    fn appended_and_deactivated_items() {
        let mut list = fixture();
        let mut item = SubjectListItem::from_username("new@example.org", ItemIndex::EndOfList);
        item.set_roles(roles(&["viewer"]));
        list.set(item);

        list.get_mut("system:serviceaccount:garden-foo:robot").unwrap().set_roles(vec![]);
        list.get_mut("mutiple@bar.com").unwrap().set_roles(roles(&["otherrole"]));

        let subjects = list.subjects();
        let names: Vec<&str> = subjects.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["foo@example.org", "mutiple@bar.com", "robot-orphaned", "robot", "new@example.org"]);
        assert_eq!(subjects[1].role.as_deref(), Some("otherrole"));
        assert_eq!(subjects[3].kind, SubjectKind::ServiceAccount);

        // deactivated member is still listed
        assert_eq!(list.members().len(), 7);
    }

    #[test]
    fn delete_removes_from_both_projections() {
        let mut list = fixture();
        assert!(list.delete("foo@example.org").is_some());
        assert!(list.delete("foo@example.org").is_none());
        assert!(!list.has("foo@example.org"));
        assert_eq!(list.len(), 5);
        assert!(list.subjects().iter().all(|s| s.name != "foo@example.org"));
    }
}
