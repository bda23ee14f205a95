//! Garden members core: subjects, member projections and the subject list
//! reconciliation engine. Pure data; no I/O.

#![forbid(unsafe_code)]

mod item;
mod list;
mod member;
mod subject;

pub use item::{GroupItem, ItemExtensions, ItemIndex, SubjectListItem, UniqItem};
pub use list::{
    ServiceAccountInfo, SubjectList, CREATED_BY_ANNOTATION, DESCRIPTION_ANNOTATION, LEGACY_CREATED_BY_ANNOTATION,
};
pub use member::{Member, MemberExtensions};
pub use subject::{
    parse_username, service_account_ref, Project, Subject, SubjectKind, RBAC_API_GROUP, SERVICE_ACCOUNT_PREFIX,
};

pub mod prelude {
    pub use super::{ItemExtensions, ItemIndex, Member, Subject, SubjectKind, SubjectList, SubjectListItem};
}
