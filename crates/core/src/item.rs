//! Subject list items: one logical member's role state and list position.
//!
//! An item is either [`UniqItem`] (exactly one raw subject) or [`GroupItem`]
//! (several raw subjects sharing one username). Both expose the same
//! `roles`/`set_roles` contract; only the group variant has to decide which of
//! its occurrences receive added roles and which ones lose removed roles.

use serde::{Deserialize, Serialize};

use crate::member::{Member, MemberExtensions};
use crate::subject::{parse_username, Subject, SubjectKind};

/// Position of an item in the persisted member list.
///
/// Variant order is significant: `At(_)` sorts before `EndOfList`, which is
/// how freshly appended items land behind every existing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemIndex {
    /// Not part of the persisted list (deactivated or never persisted).
    NotInList,
    /// Original position in `spec.members`.
    At(usize),
    /// Appended; not yet persisted.
    EndOfList,
}

impl ItemIndex {
    pub fn is_active(&self) -> bool {
        !matches!(self, ItemIndex::NotInList)
    }
}

/// Extension bag of an item: the member-visible fields plus internal bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ItemExtensions {
    #[serde(flatten)]
    pub member: MemberExtensions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<Vec<String>>,
}

impl ItemExtensions {
    pub const INTERNAL_FIELDS: &'static [&'static str] = &["secrets"];

    pub fn orphaned(orphaned: bool) -> Self {
        Self { member: MemberExtensions { orphaned: Some(orphaned), ..Default::default() }, secrets: None }
    }

    pub fn is_orphaned(&self) -> bool {
        self.member.orphaned.unwrap_or(false)
    }

    fn merge(&mut self, patch: &ItemExtensions) {
        self.member.merge(&patch.member);
        if let Some(s) = &patch.secrets {
            self.secrets = Some(s.clone());
        }
    }
}

/// Deduplicate roles keeping first-seen order; empty names are dropped.
pub(crate) fn uniq_roles<I, S>(roles: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = Vec::new();
    for r in roles {
        let r = r.as_ref();
        if r.is_empty() || out.iter().any(|x| x == r) {
            continue;
        }
        out.push(r.to_string());
    }
    out
}

/// Item wrapping exactly one raw subject.
#[derive(Debug, Clone, PartialEq)]
pub struct UniqItem {
    subject: Subject,
    index: ItemIndex,
    extensions: ItemExtensions,
}

impl UniqItem {
    pub fn new(subject: Subject, index: ItemIndex) -> Self {
        Self { subject, index, extensions: ItemExtensions::default() }
    }

    pub fn id(&self) -> String {
        self.subject.username()
    }

    pub fn kind(&self) -> SubjectKind {
        self.subject.kind
    }

    pub fn index(&self) -> ItemIndex {
        self.index
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// `role` followed by `roles`, deduplicated.
    pub fn roles(&self) -> Vec<String> {
        let primary = self.subject.role.iter();
        let extra = self.subject.roles.iter().flatten();
        uniq_roles(primary.chain(extra))
    }

    /// First role becomes `role`, the rest (deduplicated) `roles`.
    ///
    /// Service accounts leave the persisted list when they lose every role and
    /// are appended again when an inactive one gets roles back. Users keep their
    /// index; rejecting role-less users is up to the caller.
    pub fn set_roles(&mut self, value: Vec<String>) {
        let emptied = value.is_empty();
        let mut it = value.into_iter();
        self.subject.role = it.next();
        let rest = uniq_roles(it);
        self.subject.roles = if rest.is_empty() { None } else { Some(rest) };
        if self.subject.kind == SubjectKind::ServiceAccount {
            if emptied {
                self.index = ItemIndex::NotInList;
            } else if self.index == ItemIndex::NotInList {
                self.index = ItemIndex::EndOfList;
            }
        }
    }
}

/// Several raw subjects that resolve to the same username.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupItem {
    id: String,
    kind: SubjectKind,
    items: Vec<UniqItem>,
    extensions: ItemExtensions,
}

impl GroupItem {
    /// Remaining occurrences. May shrink below two after role updates.
    pub fn items(&self) -> &[UniqItem] {
        &self.items
    }

    /// Smallest index of the remaining occurrences.
    pub fn index(&self) -> ItemIndex {
        self.items.iter().map(|i| i.index).min().unwrap_or(ItemIndex::NotInList)
    }

    /// Union of every occurrence's roles, first-seen order.
    pub fn roles(&self) -> Vec<String> {
        uniq_roles(self.items.iter().flat_map(|i| i.roles()))
    }

    /// Apply the smallest change reaching `value`.
    ///
    /// Added roles go onto the first occurrence only, removed roles are taken
    /// from every occurrence, and occurrences left without roles are dropped.
    /// A group emptied earlier gets a fresh occurrence appended to the list.
    pub fn set_roles(&mut self, value: Vec<String>) {
        let current = self.roles();
        let added: Vec<String> = value.iter().filter(|r| !current.contains(r)).cloned().collect();
        let removed: Vec<String> = current.iter().filter(|r| !value.contains(r)).cloned().collect();
        if self.items.is_empty() && !added.is_empty() {
            self.items.push(UniqItem::new(parse_username(&self.id), ItemIndex::EndOfList));
        }
        if let Some(first) = self.items.first_mut() {
            if !added.is_empty() {
                let mut roles = first.roles();
                roles.extend(added);
                first.set_roles(roles);
            }
        }
        if !removed.is_empty() {
            for item in self.items.iter_mut() {
                let before = item.roles();
                let after: Vec<String> = before.iter().filter(|r| !removed.contains(r)).cloned().collect();
                if after.len() != before.len() {
                    item.set_roles(after);
                }
            }
        }
        self.items.retain(|i| !i.roles().is_empty());
    }
}

/// One logical member in a [`crate::SubjectList`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubjectListItem {
    Uniq(UniqItem),
    Group(GroupItem),
}

impl SubjectListItem {
    /// Item for a bare username, e.g. a member about to be created.
    pub fn from_username(username: &str, index: ItemIndex) -> Self {
        SubjectListItem::Uniq(UniqItem::new(parse_username(username), index))
    }

    pub fn from_subject(subject: Subject, index: ItemIndex) -> Self {
        SubjectListItem::Uniq(UniqItem::new(subject, index))
    }

    /// Collapse occurrences of one username: a single one stays uniq, more form a group.
    /// Returns `None` for an empty input.
    pub fn from_items(mut items: Vec<UniqItem>) -> Option<Self> {
        match items.len() {
            0 => None,
            1 => items.pop().map(SubjectListItem::Uniq),
            _ => {
                let id = items[0].id();
                let kind = items[0].kind();
                Some(SubjectListItem::Group(GroupItem { id, kind, items, extensions: ItemExtensions::default() }))
            }
        }
    }

    pub fn id(&self) -> String {
        match self {
            SubjectListItem::Uniq(u) => u.id(),
            SubjectListItem::Group(g) => g.id.clone(),
        }
    }

    pub fn kind(&self) -> SubjectKind {
        match self {
            SubjectListItem::Uniq(u) => u.kind(),
            SubjectListItem::Group(g) => g.kind,
        }
    }

    pub fn index(&self) -> ItemIndex {
        match self {
            SubjectListItem::Uniq(u) => u.index(),
            SubjectListItem::Group(g) => g.index(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.index().is_active()
    }

    pub fn roles(&self) -> Vec<String> {
        match self {
            SubjectListItem::Uniq(u) => u.roles(),
            SubjectListItem::Group(g) => g.roles(),
        }
    }

    /// The only way role assignments change.
    pub fn set_roles(&mut self, value: Vec<String>) {
        match self {
            SubjectListItem::Uniq(u) => u.set_roles(value),
            SubjectListItem::Group(g) => g.set_roles(value),
        }
    }

    pub fn extensions(&self) -> &ItemExtensions {
        match self {
            SubjectListItem::Uniq(u) => &u.extensions,
            SubjectListItem::Group(g) => &g.extensions,
        }
    }

    /// Merge `patch` into the extension bag; true iff its contents changed.
    pub fn extend(&mut self, patch: &ItemExtensions) -> bool {
        let bag = match self {
            SubjectListItem::Uniq(u) => &mut u.extensions,
            SubjectListItem::Group(g) => &mut g.extensions,
        };
        let before = bag.clone();
        bag.merge(patch);
        *bag != before
    }

    pub fn is_orphaned(&self) -> bool {
        self.extensions().is_orphaned()
    }

    pub fn member(&self) -> Member {
        Member::new(self.id(), self.roles(), &self.extensions().member)
    }

    /// Underlying raw occurrences (groups expanded).
    pub fn occurrences(&self) -> Vec<&UniqItem> {
        match self {
            SubjectListItem::Uniq(u) => vec![u],
            SubjectListItem::Group(g) => g.items.iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn user(role: &str, extra: &[&str], index: usize) -> UniqItem {
        let mut s = Subject::user("mutiple@bar.com").with_role(role);
        if !extra.is_empty() {
            s = s.with_roles(extra.iter().copied());
        }
        UniqItem::new(s, ItemIndex::At(index))
    }

    fn group(items: Vec<UniqItem>) -> SubjectListItem {
        SubjectListItem::from_items(items).unwrap()
    }

    #[test]
    fn index_order_puts_appended_last() {
        assert!(ItemIndex::NotInList < ItemIndex::At(0));
        assert!(ItemIndex::At(usize::MAX) < ItemIndex::EndOfList);
        assert!(!ItemIndex::NotInList.is_active());
        assert!(ItemIndex::EndOfList.is_active());
    }

    #[test]
    fn uniq_roles_merge_role_and_roles() {
        let u = user("admin", &["viewer", "admin", ""], 0);
        assert_eq!(u.roles(), roles(&["admin", "viewer"]));
    }

    #[test]
    fn uniq_setter_splits_first_role() {
        let mut u = user("admin", &[], 0);
        u.set_roles(roles(&["viewer", "owner", "owner"]));
        assert_eq!(u.subject().role.as_deref(), Some("viewer"));
        assert_eq!(u.subject().roles, Some(roles(&["owner"])));
        u.set_roles(roles(&["viewer"]));
        assert_eq!(u.subject().roles, None);
    }

    #[test]
    fn empty_roles_deactivate_service_accounts_only() {
        let mut sa = SubjectListItem::from_username("system:serviceaccount:garden-foo:robot", ItemIndex::At(3));
        sa.set_roles(vec![]);
        assert_eq!(sa.index(), ItemIndex::NotInList);
        sa.set_roles(roles(&["viewer"]));
        assert_eq!(sa.index(), ItemIndex::EndOfList);

        let mut u = SubjectListItem::from_username("foo@bar.com", ItemIndex::At(1));
        u.set_roles(vec![]);
        assert_eq!(u.index(), ItemIndex::At(1));
        assert!(u.roles().is_empty());
    }

    #[test]
    fn group_roles_are_the_union() {
        let g = group(vec![user("admin", &[], 0), user("admin", &["viewer"], 4), user("owner", &["viewer"], 6)]);
        assert_eq!(g.roles(), roles(&["admin", "viewer", "owner"]));
        assert_eq!(g.index(), ItemIndex::At(0));
        assert_eq!(g.id(), "mutiple@bar.com");
    }

    #[test]
    fn group_update_touches_minimal_occurrences() {
        let mut g = group(vec![user("admin", &[], 0), user("admin", &["viewer"], 1)]);
        g.set_roles(roles(&["admin", "newrole"]));
        let occ = g.occurrences();
        assert_eq!(occ.len(), 2);
        assert_eq!(occ[0].subject().role.as_deref(), Some("admin"));
        assert_eq!(occ[0].subject().roles, Some(roles(&["newrole"])));
        assert_eq!(occ[1].subject().role.as_deref(), Some("admin"));
        assert_eq!(occ[1].subject().roles, None);
    }

    #[test]
    fn group_update_prunes_emptied_occurrences() {
        let mut g = group(vec![user("admin", &[], 0), user("admin", &["viewer"], 1)]);
        g.set_roles(roles(&["otherrole"]));
        let occ = g.occurrences();
        assert_eq!(occ.len(), 1);
        assert_eq!(occ[0].subject().role.as_deref(), Some("otherrole"));
        assert_eq!(occ[0].index(), ItemIndex::At(0));
    }

    #[test]
    fn group_leaves_unaffected_occurrences_alone() {
        let mut g = group(vec![user("admin", &[], 0), user("viewer", &["viewer"], 1)]);
        g.set_roles(roles(&["viewer"]));
        let occ = g.occurrences();
        assert_eq!(occ.len(), 1);
        // untouched: duplicate `roles` entry is not normalised away
        assert_eq!(occ[0].subject().roles, Some(roles(&["viewer"])));
        assert_eq!(occ[0].index(), ItemIndex::At(1));
        assert_eq!(g.index(), ItemIndex::At(1));
    }

    #[test]
    fn emptied_group_is_inactive() {
        let mut g = group(vec![user("admin", &[], 0), user("admin", &[], 1)]);
        g.set_roles(vec![]);
        assert!(g.occurrences().is_empty());
        assert!(!g.is_active());
        assert_eq!(g.id(), "mutiple@bar.com");
    }

    #[test]
    fn emptied_group_can_be_granted_roles_again() {
        let sa = |role: &str, index: usize| {
            UniqItem::new(Subject::service_account("garden-foo", "robot").with_role(role), ItemIndex::At(index))
        };
        let mut g = group(vec![sa("admin", 2), sa("viewer", 5)]);
        g.set_roles(vec![]);
        assert!(!g.is_active());

        g.set_roles(roles(&["admin"]));
        assert_eq!(g.roles(), roles(&["admin"]));
        assert_eq!(g.index(), ItemIndex::EndOfList);
        let occ = g.occurrences();
        assert_eq!(occ.len(), 1);
        assert_eq!(occ[0].subject(), &Subject::service_account("garden-foo", "robot").with_role("admin"));
    }

    #[test]
    fn extend_reports_real_changes_only() {
        let mut item = SubjectListItem::from_username("system:serviceaccount:ns:sa", ItemIndex::At(0));
        let patch = ItemExtensions {
            member: MemberExtensions { description: Some("d".into()), ..Default::default() },
            secrets: Some(vec!["sa-token".into()]),
        };
        assert!(item.extend(&patch));
        assert!(!item.extend(&patch));
        assert!(!item.extend(&ItemExtensions::default()));
        assert!(item.extend(&ItemExtensions::orphaned(true)));
        assert!(item.is_orphaned());
    }

    #[test]
    fn member_projection_drops_internal_extensions() {
        let mut item = SubjectListItem::from_username("system:serviceaccount:ns:sa", ItemIndex::At(0));
        item.set_roles(roles(&["admin"]));
        item.extend(&ItemExtensions { secrets: Some(vec!["sa-token".into()]), ..Default::default() });
        let v = serde_json::to_value(item.member()).unwrap();
        assert!(v.get("secrets").is_none());
        assert_eq!(v["roles"], serde_json::json!(["admin"]));
    }
}
