//! Engine-level scenarios over the in-memory adapters.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use warden_application::{
    CacheStamp, CustomRoleInput, DecisionCache, DecisionKey, EngineConfig, PolicyEngine,
    PolicyTemplates, RuleStore, WriteOutcome,
};
use warden_core::{AppError, AppResult, CallerContext};
use warden_domain::{DomainRef, DomainType, GrantRule, Permission};

use crate::{InMemoryDecisionCache, InMemoryRuleStore};

struct Harness {
    engine: PolicyEngine,
    store: Arc<InMemoryRuleStore>,
    cache: Arc<InMemoryDecisionCache>,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryRuleStore::new());
    let cache = Arc::new(InMemoryDecisionCache::new(Duration::from_secs(300)));
    let templates = PolicyTemplates::defaults().unwrap_or_else(|error| panic!("{error}"));
    let engine = PolicyEngine::new(
        store.clone(),
        Some(cache.clone() as Arc<dyn DecisionCache>),
        templates,
        EngineConfig::default(),
    );

    Harness {
        engine,
        store,
        cache,
    }
}

fn org(id: &str) -> DomainRef {
    DomainRef::org(id).unwrap_or_else(|error| panic!("{error}"))
}

fn canvas_in(canvas_id: &str, organization_id: &str) -> DomainRef {
    DomainRef::canvas(canvas_id)
        .and_then(|canvas| canvas.with_organization(organization_id))
        .unwrap_or_else(|error| panic!("{error}"))
}

fn permission(resource: &str, action: &str) -> Permission {
    Permission::new(resource, action).unwrap_or_else(|error| panic!("{error}"))
}

fn custom_role(name: &str, permissions: Vec<Permission>, inherits_from: Option<&str>) -> CustomRoleInput {
    CustomRoleInput {
        name: name.to_owned(),
        permissions,
        inherits_from: inherits_from.map(str::to_owned),
        display_name: None,
        description: None,
    }
}

impl Harness {
    async fn provision_org(&self, organization_id: &str, owner: &str) -> DomainRef {
        let domain = org(organization_id);
        self.engine
            .provisioner()
            .provision(&domain, owner)
            .await
            .unwrap_or_else(|error| panic!("{error}"));
        domain
    }

    async fn allowed(&self, user: &str, domain: &DomainRef, resource: &str, action: &str) -> bool {
        self.engine
            .enforcer()
            .enforce(user, domain, resource, action)
            .await
            .unwrap_or_else(|error| panic!("{error}"))
    }
}

#[tokio::test]
async fn owner_holds_every_permission_and_strangers_hold_none() {
    let harness = harness();
    let domain = harness.provision_org("org-1", "alice").await;

    for (resource, action) in [
        ("org", "delete"),
        ("org", "admin"),
        ("canvas", "create"),
        ("secret", "read"),
        ("integration", "read"),
    ] {
        assert!(harness.allowed("alice", &domain, resource, action).await);
        assert!(!harness.allowed("mallory", &domain, resource, action).await);
    }
}

#[tokio::test]
async fn viewer_and_former_owner_lose_what_they_do_not_hold() {
    let harness = harness();
    let domain = harness.provision_org("org-1", "alice").await;
    let caller = CallerContext::new("alice");
    let assignments = harness.engine.assignments();

    assignments
        .assign_role(&caller, &domain, "bob", "org_viewer")
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    assert!(harness.allowed("bob", &domain, "org", "read").await);
    assert!(!harness.allowed("bob", &domain, "org", "delete").await);
    assert!(harness.allowed("alice", &domain, "canvas", "read").await);

    let removed = assignments
        .remove_role(&caller, &domain, "alice", "org_owner")
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    assert_eq!(removed, WriteOutcome::Applied);
    assert!(!harness.allowed("alice", &domain, "canvas", "read").await);
    assert!(!harness.allowed("alice", &domain, "org", "delete").await);
    assert!(harness.allowed("bob", &domain, "org", "read").await);
}

#[tokio::test]
async fn organizations_are_isolated() {
    let harness = harness();
    let first = harness.provision_org("org-1", "alice").await;
    let second = harness.provision_org("org-2", "bob").await;

    assert!(harness.allowed("alice", &first, "org", "read").await);
    assert!(!harness.allowed("alice", &second, "org", "read").await);
    assert!(!harness.allowed("bob", &first, "org", "read").await);

    let roles = harness
        .engine
        .enforcer()
        .implicit_roles("alice", &second)
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    assert!(roles.is_empty());
}

#[tokio::test]
async fn assignment_change_invalidates_cached_denial() {
    let harness = harness();
    let domain = harness.provision_org("org-1", "alice").await;
    let caller = CallerContext::new("alice");

    assert!(!harness.allowed("bob", &domain, "org", "read").await);
    assert!(!harness.cache.is_empty().await);

    let outcome = harness
        .engine
        .assignments()
        .assign_role(&caller, &domain, "bob", "org_viewer")
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    assert_eq!(outcome, WriteOutcome::Applied);
    assert!(harness.allowed("bob", &domain, "org", "read").await);
    assert!(!harness.allowed("bob", &domain, "org", "update").await);

    harness
        .engine
        .assignments()
        .remove_role(&caller, &domain, "bob", "org_viewer")
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    assert!(!harness.allowed("bob", &domain, "org", "read").await);
}

#[tokio::test]
async fn repeated_assignment_is_a_no_op() {
    let harness = harness();
    let domain = harness.provision_org("org-1", "alice").await;
    let caller = CallerContext::new("alice");
    let assignments = harness.engine.assignments();

    let first = assignments
        .assign_role(&caller, &domain, "bob", "org_admin")
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    let second = assignments
        .assign_role(&caller, &domain, "bob", "org_admin")
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    assert_eq!(first, WriteOutcome::Applied);
    assert_eq!(second, WriteOutcome::Unchanged);
    let users = assignments
        .list_role_users(&caller, &domain, "org_admin")
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    assert_eq!(users, vec!["bob".to_owned()]);
}

#[tokio::test]
async fn adding_grants_only_widens_access() {
    let harness = harness();
    let domain = harness.provision_org("org-1", "alice").await;
    let caller = CallerContext::new("alice");
    let roles = harness.engine.roles();

    roles
        .create_role(
            &caller,
            &domain,
            custom_role("auditor", vec![permission("audit", "read")], Some("org_viewer")),
        )
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    harness
        .engine
        .assignments()
        .assign_role(&caller, &domain, "carol", "auditor")
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    let before = harness
        .engine
        .enforcer()
        .implicit_permissions("carol", &domain)
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    roles
        .update_role(
            &caller,
            &domain,
            custom_role(
                "auditor",
                vec![permission("audit", "read"), permission("audit", "export")],
                Some("org_viewer"),
            ),
        )
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    let after = harness
        .engine
        .enforcer()
        .implicit_permissions("carol", &domain)
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    assert!(before.is_subset(&after));
    assert!(after.contains(&permission("audit", "export")));
    assert!(harness.allowed("carol", &domain, "audit", "export").await);
    assert!(harness.allowed("carol", &domain, "member", "read").await);
}

#[tokio::test]
async fn built_in_roles_stay_read_only() {
    let harness = harness();
    let domain = harness.provision_org("org-1", "alice").await;
    let caller = CallerContext::new("alice");

    let update = harness
        .engine
        .roles()
        .update_role(
            &caller,
            &domain,
            custom_role("org_viewer", vec![permission("org", "delete")], None),
        )
        .await;
    let delete = harness
        .engine
        .roles()
        .delete_role(&caller, &domain, "org_admin")
        .await;

    assert!(matches!(update, Err(AppError::DefaultRole(_))));
    assert!(matches!(delete, Err(AppError::DefaultRole(_))));
    assert!(!harness.allowed("bob", &domain, "org", "delete").await);
    assert!(harness.allowed("alice", &domain, "org", "update").await);
}

#[tokio::test]
async fn inheritance_cycles_are_refused() {
    let harness = harness();
    let domain = harness.provision_org("org-1", "alice").await;
    let caller = CallerContext::new("alice");
    let roles = harness.engine.roles();

    roles
        .create_role(
            &caller,
            &domain,
            custom_role("reviewer", vec![permission("canvas", "read")], None),
        )
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    roles
        .create_role(
            &caller,
            &domain,
            custom_role("lead", vec![permission("canvas", "update")], Some("reviewer")),
        )
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    let cycle = roles
        .update_role(
            &caller,
            &domain,
            custom_role("reviewer", vec![permission("canvas", "read")], Some("lead")),
        )
        .await;
    assert!(matches!(cycle, Err(AppError::Conflict(_))));

    let reviewer = roles
        .get_role(&caller, &domain, "reviewer")
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    assert!(reviewer.inherits_from.is_none());
}

#[tokio::test]
async fn group_members_receive_the_group_role() {
    let harness = harness();
    let domain = harness.provision_org("org-1", "alice").await;
    let caller = CallerContext::new("alice");
    let groups = harness.engine.groups();

    groups
        .create_group(&caller, &domain, "engineering", "org_admin")
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    for user in ["dave", "frank"] {
        groups
            .add_user_to_group(&caller, &domain, "engineering", user)
            .await
            .unwrap_or_else(|error| panic!("{error}"));
    }

    assert!(harness.allowed("dave", &domain, "canvas", "create").await);
    assert!(harness.allowed("frank", &domain, "canvas", "create").await);
    assert!(!harness.allowed("dave", &domain, "org", "delete").await);

    groups
        .remove_user_from_group(&caller, &domain, "engineering", "dave")
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    for (resource, action) in [("canvas", "create"), ("org", "read"), ("member", "invite")] {
        assert_eq!(
            harness.allowed("dave", &domain, resource, action).await,
            harness.allowed("mallory", &domain, resource, action).await
        );
    }
    assert!(harness.allowed("frank", &domain, "canvas", "create").await);

    groups
        .update_group_role(&caller, &domain, "engineering", "org_viewer")
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    assert!(!harness.allowed("frank", &domain, "canvas", "create").await);
    assert!(harness.allowed("frank", &domain, "org", "read").await);

    groups
        .delete_group(&caller, &domain, "engineering")
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    assert!(!harness.allowed("frank", &domain, "org", "read").await);
}

#[tokio::test]
async fn failed_policy_update_leaves_no_trace() {
    let harness = harness();
    let domain = harness.provision_org("org-1", "alice").await;
    let before = harness
        .store
        .filter_grants(&domain, None)
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    let rule = GrantRule::new("org_viewer", domain.clone(), permission("secret", "read"))
        .unwrap_or_else(|error| panic!("{error}"));

    let result: Result<(), AppError> = harness
        .engine
        .provisioner()
        .update_domain_policy(&domain, move |transaction| {
            Box::pin(async move {
                transaction.add_grant(&rule).await?;
                Err(AppError::Internal("aborted".to_owned()))
            })
        })
        .await;

    assert!(result.is_err());
    let after = harness
        .store
        .filter_grants(&domain, None)
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    assert_eq!(before, after);
}

#[tokio::test]
async fn canvases_fall_back_to_the_organization_catalog() {
    let harness = harness();
    harness.provision_org("org-1", "alice").await;
    harness
        .engine
        .provisioner()
        .provision_global_catalog("org-1")
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    let caller = CallerContext::new("alice").with_organization("org-1");
    let catalog = DomainRef::new(DomainType::Canvas, "*").unwrap_or_else(|error| panic!("{error}"));
    harness
        .engine
        .roles()
        .create_role(
            &caller,
            &catalog,
            custom_role("stage_operator", vec![permission("stage", "update")], None),
        )
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    let canvas = canvas_in("canvas-1", "org-1");
    harness
        .engine
        .assignments()
        .assign_role(&caller, &canvas, "erin", "stage_operator")
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    assert!(harness.allowed("erin", &canvas, "stage", "update").await);

    let standalone = DomainRef::canvas("canvas-1").unwrap_or_else(|error| panic!("{error}"));
    assert!(!harness.allowed("erin", &standalone, "stage", "update").await);

    harness
        .engine
        .roles()
        .update_role(
            &caller,
            &catalog,
            custom_role("stage_operator", vec![permission("stage", "read")], None),
        )
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    assert!(!harness.allowed("erin", &canvas, "stage", "update").await);
    assert!(harness.allowed("erin", &canvas, "stage", "read").await);
}

#[tokio::test]
async fn reprovisioning_is_a_conflict() {
    let harness = harness();
    let domain = harness.provision_org("org-1", "alice").await;

    let again = harness.engine.provisioner().provision(&domain, "bob").await;

    assert!(matches!(again, Err(AppError::Conflict(_))));
    assert!(!harness.allowed("bob", &domain, "org", "read").await);

    let accessible = harness
        .engine
        .assignments()
        .accessible_domains("alice", DomainType::Org)
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    assert_eq!(accessible, vec![domain]);
}

/// Decision cache whose invalidation outlasts the transaction timeout.
struct SlowInvalidation {
    inner: InMemoryDecisionCache,
    delay: Duration,
}

#[async_trait]
impl DecisionCache for SlowInvalidation {
    async fn stamp(&self, partitions: &[String]) -> AppResult<CacheStamp> {
        self.inner.stamp(partitions).await
    }

    async fn get(&self, key: &DecisionKey, stamp: &CacheStamp) -> AppResult<Option<bool>> {
        self.inner.get(key, stamp).await
    }

    async fn put(&self, key: DecisionKey, stamp: CacheStamp, allowed: bool) -> AppResult<()> {
        self.inner.put(key, stamp, allowed).await
    }

    async fn invalidate(&self, partition: &str) -> AppResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.invalidate(partition).await
    }
}

#[tokio::test(start_paused = true)]
async fn committed_write_invalidates_even_when_invalidation_is_slow() {
    let store = Arc::new(InMemoryRuleStore::new());
    let cache = Arc::new(SlowInvalidation {
        inner: InMemoryDecisionCache::new(Duration::from_secs(300)),
        delay: Duration::from_millis(300),
    });
    let engine = PolicyEngine::new(
        store,
        Some(cache as Arc<dyn DecisionCache>),
        PolicyTemplates::defaults().unwrap_or_else(|error| panic!("{error}")),
        EngineConfig {
            transaction_timeout: Duration::from_millis(100),
            ..EngineConfig::default()
        },
    );
    let domain = org("org-1");
    engine
        .provisioner()
        .provision(&domain, "alice")
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    let denied = engine
        .enforcer()
        .enforce("bob", &domain, "org", "read")
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    assert!(!denied);

    let outcome = engine
        .assignments()
        .assign_role(&CallerContext::new("alice"), &domain, "bob", "org_viewer")
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    assert_eq!(outcome, WriteOutcome::Applied);
    let allowed = engine
        .enforcer()
        .enforce("bob", &domain, "org", "read")
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    assert!(allowed);
}

#[tokio::test]
async fn forged_ids_cannot_reach_another_organization_catalog() {
    let harness = harness();
    harness.provision_org("victim", "alice").await;
    harness
        .engine
        .provisioner()
        .provision_global_catalog("victim")
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    let catalog =
        DomainRef::global_canvas_catalog("victim").unwrap_or_else(|error| panic!("{error}"));
    let before = harness
        .store
        .filter_grants(&catalog, None)
        .await
        .unwrap_or_else(|error| panic!("{error}"));

    assert!(matches!(
        DomainRef::canvas("*:victim"),
        Err(AppError::Validation(_))
    ));

    let attacker = CallerContext::new("mallory").with_organization("x:victim");
    let global = DomainRef::canvas("*").unwrap_or_else(|error| panic!("{error}"));
    let created = harness
        .engine
        .roles()
        .create_role(
            &attacker,
            &global,
            custom_role("backdoor", vec![permission("secret", "delete")], None),
        )
        .await;
    assert!(matches!(created, Err(AppError::Validation(_))));

    let after = harness
        .store
        .filter_grants(&catalog, None)
        .await
        .unwrap_or_else(|error| panic!("{error}"));
    assert_eq!(before, after);
    assert!(!harness.allowed("mallory", &canvas_in("c-1", "victim"), "secret", "delete").await);
}
