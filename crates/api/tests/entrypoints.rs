use std::sync::Arc;

use garden_core::{Project, ServiceAccountInfo, Subject};
use garden_members::fake::FakeCluster;
use garden_members::{self as members, Backends, MemberError, MemberRequest, MembersConfig};
use serde_json::json;

const NS: &str = "garden-foo";

fn setup() -> (Arc<FakeCluster>, Backends) {
    let project = Project {
        name: "foo".into(),
        namespace: NS.into(),
        members: vec![
            Subject::user("foo@example.org").with_role("admin"),
            Subject::service_account(NS, "robot").with_role("viewer"),
        ],
    };
    let robot = ServiceAccountInfo {
        namespace: NS.into(),
        name: "robot".into(),
        creation_timestamp: Some("robot-time".into()),
        ..Default::default()
    };
    let cluster = Arc::new(FakeCluster::new(project, vec![robot]));
    let backends = Backends { projects: cluster.clone(), service_accounts: cluster.clone() };
    (cluster, backends)
}

fn req() -> MemberRequest {
    MemberRequest::new("admin@example.org", NS)
}

#[tokio::test]
async fn create_takes_name_from_body() {
    let (c, b) = setup();
    let cfg = MembersConfig::default();
    let list = members::create(&b, &cfg, req().body(json!({"name": "bar@example.org", "roles": ["viewer"]})))
        .await
        .unwrap();
    assert!(list.iter().any(|m| m.username == "bar@example.org"));
    assert_eq!(c.patches().len(), 1);
}

#[tokio::test]
async fn create_without_name_or_with_bad_body_is_unprocessable() {
    let (c, b) = setup();
    let cfg = MembersConfig::default();
    let no_name = members::create(&b, &cfg, req().body(json!({"roles": ["viewer"]}))).await.unwrap_err();
    assert!(matches!(no_name, MemberError::UnprocessableEntity(_)));
    let bad = members::create(&b, &cfg, req().name("bar@example.org").body(json!({"roles": "viewer"})))
        .await
        .unwrap_err();
    assert_eq!(bad.status_code(), 422);
    assert!(c.calls().is_empty());
}

#[tokio::test]
async fn update_returns_fresh_member() {
    let (_c, b) = setup();
    let cfg = MembersConfig::default();
    let member = members::update(
        &b,
        &cfg,
        req().name("foo@example.org").body(json!({"roles": ["admin", "owner"]})),
    )
    .await
    .unwrap();
    assert_eq!(member.roles, vec!["admin".to_string(), "owner".to_string()]);
}

#[tokio::test]
async fn get_requires_a_name() {
    let (_c, b) = setup();
    let err = members::get(&b, &MembersConfig::default(), req()).await.unwrap_err();
    assert_eq!(err.status_code(), 422);
}

#[tokio::test]
async fn remove_returns_remaining_members() {
    let (c, b) = setup();
    let cfg = MembersConfig::default();
    let list = members::remove(&b, &cfg, req().name("system:serviceaccount:garden-foo:robot")).await.unwrap();
    assert_eq!(list.len(), 1);
    assert!(c.service_account(NS, "robot").is_none());
}

#[tokio::test]
async fn reset_of_absent_member_returns_none() {
    let (c, b) = setup();
    let cfg = MembersConfig::default();
    let none = members::reset_service_account(&b, &cfg, req().name("system:serviceaccount:garden-foo:ghost"))
        .await
        .unwrap();
    assert!(none.is_none());
    assert!(c.calls().is_empty());

    let robot = members::reset_service_account(&b, &cfg, req().name("system:serviceaccount:garden-foo:robot"))
        .await
        .unwrap()
        .expect("robot is a member");
    assert!(robot.extensions.kubeconfig.is_some());
    assert_eq!(robot.extensions.created_by.as_deref(), Some("admin@example.org"));
}

#[tokio::test]
async fn list_of_unknown_namespace_passes_through_404() {
    let (_c, b) = setup();
    let err = members::list(&b, &MembersConfig::default(), MemberRequest::new("admin@example.org", "garden-x"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn create_drops_null_role_entries() {
    let (c, b) = setup();
    let cfg = MembersConfig::default();
    let list = members::create(&b, &cfg, req().name("x@y.z").body(json!({"roles": ["viewer", null]})))
        .await
        .unwrap();
    let created = list.into_iter().find(|m| m.username == "x@y.z").unwrap();
    assert_eq!(created.roles, vec!["viewer".to_string()]);
    assert_eq!(c.patches()[0].last().unwrap().role.as_deref(), Some("viewer"));

    let only_null = members::create(&b, &cfg, req().name("n@y.z").body(json!({"roles": [null]}))).await.unwrap_err();
    assert_eq!(only_null.status_code(), 422);
}
