use std::sync::Arc;
use std::time::Duration;

use warden_core::{AppError, CallerContext};
use warden_domain::DomainRef;

use crate::test_support::FakeRuleStore;
use crate::{
    Enforcer, PolicyTemplates, PolicyWriter, RoleGraphResolver, TenantProvisioner, WriteOutcome,
};

use super::GroupService;

struct Fixture {
    groups: GroupService,
    enforcer: Enforcer,
    caller: CallerContext,
    domain: DomainRef,
}

async fn provisioned_org() -> Fixture {
    let store = Arc::new(FakeRuleStore::default());
    let writer = PolicyWriter::new(store.clone(), None, Duration::from_secs(5));
    let resolver = RoleGraphResolver::new(store);
    let templates = PolicyTemplates::defaults().unwrap_or_else(|error| panic!("{error}"));
    let domain = DomainRef::org("org-1").unwrap_or_else(|error| panic!("{error}"));

    TenantProvisioner::new(writer.clone(), templates)
        .provision(&domain, "alice")
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    Fixture {
        groups: GroupService::new(writer, resolver.clone()),
        enforcer: Enforcer::new(resolver, None),
        caller: CallerContext::new("alice"),
        domain,
    }
}

impl Fixture {
    async fn allowed(&self, user: &str, resource: &str, action: &str) -> bool {
        self.enforcer
            .enforce(user, &self.domain, resource, action)
            .await
            .unwrap_or_else(|error| panic!("{error}"))
    }
}

#[tokio::test]
async fn group_members_receive_the_group_role() {
    let fixture = provisioned_org().await;
    fixture
        .groups
        .create_group(&fixture.caller, &fixture.domain, "eng", "org_admin")
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    for user in ["bob", "carol"] {
        fixture
            .groups
            .add_user_to_group(&fixture.caller, &fixture.domain, "eng", user)
            .await
            .unwrap_or_else(|error| panic!("{error}"));
    }

    assert!(fixture.allowed("bob", "canvas", "create").await);
    assert!(fixture.allowed("carol", "canvas", "create").await);

    fixture
        .groups
        .remove_user_from_group(&fixture.caller, &fixture.domain, "eng", "bob")
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    for (resource, action) in [("canvas", "create"), ("org", "read")] {
        assert_eq!(
            fixture.allowed("bob", resource, action).await,
            fixture.allowed("nobody", resource, action).await
        );
    }
    assert!(!fixture.allowed("bob", "canvas", "create").await);
    assert!(fixture.allowed("carol", "canvas", "create").await);
}

#[tokio::test]
async fn duplicate_group_is_a_conflict() {
    let fixture = provisioned_org().await;
    fixture
        .groups
        .create_group(&fixture.caller, &fixture.domain, "eng", "org_admin")
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    let duplicate = fixture
        .groups
        .create_group(&fixture.caller, &fixture.domain, "eng", "org_viewer")
        .await;

    assert!(matches!(duplicate, Err(AppError::Conflict(message)) if message.contains("already exists")));
}

#[tokio::test]
async fn group_role_must_exist() {
    let fixture = provisioned_org().await;

    let result = fixture
        .groups
        .create_group(&fixture.caller, &fixture.domain, "eng", "ghost")
        .await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn membership_changes_need_an_existing_group() {
    let fixture = provisioned_org().await;

    let add = fixture
        .groups
        .add_user_to_group(&fixture.caller, &fixture.domain, "ghosts", "bob")
        .await;
    let remove = fixture
        .groups
        .remove_user_from_group(&fixture.caller, &fixture.domain, "ghosts", "bob")
        .await;

    assert!(matches!(add, Err(AppError::NotFound(message)) if message.contains("does not exist")));
    assert!(matches!(remove, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn membership_changes_are_idempotent() {
    let fixture = provisioned_org().await;
    fixture
        .groups
        .create_group(&fixture.caller, &fixture.domain, "eng", "org_viewer")
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    let first = fixture
        .groups
        .add_user_to_group(&fixture.caller, &fixture.domain, "eng", "bob")
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    let second = fixture
        .groups
        .add_user_to_group(&fixture.caller, &fixture.domain, "eng", "bob")
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    let absent = fixture
        .groups
        .remove_user_from_group(&fixture.caller, &fixture.domain, "eng", "carol")
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    assert_eq!(first, WriteOutcome::Applied);
    assert_eq!(second, WriteOutcome::Unchanged);
    assert_eq!(absent, WriteOutcome::Unchanged);
}

#[tokio::test]
async fn update_group_role_replaces_the_edge() {
    let fixture = provisioned_org().await;
    fixture
        .groups
        .create_group(&fixture.caller, &fixture.domain, "eng", "org_viewer")
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    fixture
        .groups
        .update_group_role(&fixture.caller, &fixture.domain, "eng", "org_admin")
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    let role = fixture
        .groups
        .get_group_role(&fixture.caller, &fixture.domain, "eng")
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    let groups = fixture
        .groups
        .get_groups(&fixture.caller, &fixture.domain)
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    assert_eq!(role, "org_admin");
    assert_eq!(groups.len(), 1);
}

#[tokio::test]
async fn delete_group_removes_memberships_and_role_edge() {
    let fixture = provisioned_org().await;
    fixture
        .groups
        .create_group(&fixture.caller, &fixture.domain, "eng", "org_admin")
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    for user in ["bob", "carol"] {
        fixture
            .groups
            .add_user_to_group(&fixture.caller, &fixture.domain, "eng", user)
            .await
            .unwrap_or_else(|error| panic!("{error}"));
    }
    assert_eq!(
        fixture
            .groups
            .get_group_users(&fixture.caller, &fixture.domain, "eng")
            .await
            .unwrap_or_else(|error| panic!("{error}")),
        vec!["bob".to_owned(), "carol".to_owned()]
    );

    fixture
        .groups
        .delete_group(&fixture.caller, &fixture.domain, "eng")
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    let users = fixture
        .groups
        .get_group_users(&fixture.caller, &fixture.domain, "eng")
        .await;
    assert!(matches!(users, Err(AppError::NotFound(_))));
    assert!(
        !fixture
            .enforcer
            .enforce("bob", &fixture.domain, "canvas", "create")
            .await
            .unwrap_or_else(|error| panic!("{error}"))
    );
}
