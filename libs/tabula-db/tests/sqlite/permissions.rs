#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Row permissions, group grants and the permission cache.
//!
//! Rows get the table's default mask: owners have full access, guests may
//! only peek, and groups act through the table's join table to `usergroup`.

mod common;

use std::sync::Arc;

use common::{TestDb, attrs, user};
use tabula_db::{
    ColumnInfo, ColumnType, EngineConfig, Page, PermissionCacheConfig, RelationDescriptor,
    RelationKind, ResourceEngine, Row, Value,
};
use tabula_security::{CallerContext, Capability, ReferenceId};

const JOIN: &str = "post_post_id_has_usergroup_usergroup_id";

async fn post_by(env: &TestDb, caller: &CallerContext, title: &str) -> Row {
    let tx = env.db.begin().await.expect("begin");
    let row = env
        .engine
        .create("post", attrs([("title", Value::String(title.into()))]), caller, &tx)
        .await
        .expect("create post");
    tx.commit().await.expect("commit");
    row
}

/// Adds `usergroup(name)` and `post has_many usergroup`.
async fn with_groups(env: &TestDb) {
    env.mutator
        .create_table(
            env.mutator
                .new_table("usergroup")
                .with_column(ColumnInfo::new("name", ColumnType::Text)),
        )
        .await
        .expect("create usergroup");
    env.mutator
        .add_relation(RelationDescriptor::new("post", RelationKind::HasMany, "usergroup"))
        .await
        .expect("post has_many usergroup");
}

/// Creates group `name` and shares `post` with it. Only admins can write
/// either table.
async fn share(env: &TestDb, post: &Row, name: &str) -> ReferenceId {
    let admin = env.admin();
    let tx = env.db.begin().await.expect("begin");
    let group = env
        .engine
        .create("usergroup", attrs([("name", Value::String(name.into()))]), &admin, &tx)
        .await
        .expect("create group");
    env.engine
        .create(
            JOIN,
            attrs([
                ("post_id", Value::Reference(post.reference_id())),
                ("usergroup_id", Value::Reference(group.reference_id())),
            ]),
            &admin,
            &tx,
        )
        .await
        .expect("grant");
    tx.commit().await.expect("commit");
    group.reference_id()
}

#[tokio::test]
async fn strangers_cannot_read_or_write_but_may_peek() {
    let env = TestDb::new("perm_stranger").await;
    env.blog().await;
    let (alice, mallory) = (user(), user());
    let post = post_by(&env, &alice, "private").await;
    let reference = post.reference_id();

    let tx = env.db.begin().await.expect("begin");
    let err = env.engine.find_one("post", reference, &mallory, &tx).await.unwrap_err();
    assert!(err.is_unauthorized(), "{err}");

    let err = env
        .engine
        .update("post", reference, attrs([("title", Value::String("mine".into()))]), &mallory, &tx)
        .await
        .unwrap_err();
    assert!(err.is_unauthorized(), "{err}");

    let err = env.engine.delete("post", reference, &mallory, &tx).await.unwrap_err();
    assert!(err.is_unauthorized(), "{err}");

    let peeked = env
        .engine
        .peek("post", reference, &mallory, &tx)
        .await
        .expect("guests may peek");
    assert_eq!(peeked.reference_id, reference);
    assert_eq!(peeked.table, "post");

    let visible = env.engine.find_all("post", &mallory, &tx).await.expect("find_all");
    assert!(visible.is_empty());
    let mine = env.engine.find_all("post", &alice, &tx).await.expect("find_all");
    assert_eq!(mine.len(), 1);
    tx.commit().await.expect("commit");
}

#[tokio::test]
async fn anonymous_callers_own_nothing() {
    let env = TestDb::new("perm_anonymous").await;
    env.blog().await;
    let anon = CallerContext::anonymous();

    let tx = env.db.begin().await.expect("begin");
    let row = env
        .engine
        .create("post", attrs([("title", Value::String("drive-by".into()))]), &anon, &tx)
        .await
        .expect("guests may create posts");
    assert!(row.owner_id().is_null());

    let err = env
        .engine
        .find_one("post", row.reference_id(), &anon, &tx)
        .await
        .unwrap_err();
    assert!(err.is_unauthorized(), "null owner must not match a null caller");
    tx.commit().await.expect("commit");
}

#[tokio::test]
async fn refer_is_checked_on_foreign_key_targets() {
    let env = TestDb::new("perm_refer").await;
    env.blog().await;
    let (alice, mallory) = (user(), user());
    let post = post_by(&env, &alice, "alice's").await;

    let tx = env.db.begin().await.expect("begin");
    let err = env
        .engine
        .create(
            "comment",
            attrs([
                ("content", Value::String("spam".into())),
                ("post_id", Value::Reference(post.reference_id())),
            ]),
            &mallory,
            &tx,
        )
        .await
        .unwrap_err();
    assert!(
        matches!(err, tabula_db::EngineError::Unauthorized { capability: Capability::Refer, .. }),
        "{err}"
    );
    tx.rollback().await.expect("rollback");
}

#[tokio::test]
async fn default_table_mask_blocks_plain_users_from_creating() {
    let env = TestDb::new("perm_table_mask").await;
    env.mutator
        .create_table(
            env.mutator
                .new_table("note")
                .with_column(ColumnInfo::new("text", ColumnType::Text)),
        )
        .await
        .expect("create note");

    let tx = env.db.begin().await.expect("begin");
    let err = env
        .engine
        .create("note", attrs([("text", Value::String("x".into()))]), &user(), &tx)
        .await
        .unwrap_err();
    assert!(
        matches!(err, tabula_db::EngineError::Unauthorized { capability: Capability::Create, .. }),
        "{err}"
    );

    env.engine
        .create("note", attrs([("text", Value::String("x".into()))]), &env.admin(), &tx)
        .await
        .expect("admins bypass the table mask");
    tx.commit().await.expect("commit");
}

#[tokio::test]
async fn admins_pass_every_row_check() {
    let env = TestDb::new("perm_admin").await;
    env.blog().await;
    let post = post_by(&env, &user(), "someone's").await;
    let admin = env.admin();

    let tx = env.db.begin().await.expect("begin");
    env.engine
        .find_one("post", post.reference_id(), &admin, &tx)
        .await
        .expect("read");
    env.engine
        .update("post", post.reference_id(), attrs([("title", Value::String("edited".into()))]), &admin, &tx)
        .await
        .expect("update");
    env.engine
        .delete("post", post.reference_id(), &admin, &tx)
        .await
        .expect("delete");
    tx.commit().await.expect("commit");
}

#[tokio::test]
async fn group_members_read_shared_rows() {
    let env = TestDb::new("perm_groups").await;
    env.blog().await;
    with_groups(&env).await;

    let alice = user();
    let post = post_by(&env, &alice, "team notes").await;
    let group = share(&env, &post, "team").await;

    let member = CallerContext::builder()
        .user_id(ReferenceId::new_v4())
        .member_of(group)
        .build();
    let outsider = CallerContext::builder()
        .user_id(ReferenceId::new_v4())
        .member_of(ReferenceId::new_v4())
        .build();

    let tx = env.db.begin().await.expect("begin");
    let row = env
        .engine
        .find_one("post", post.reference_id(), &member, &tx)
        .await
        .expect("member reads shared post");
    assert_eq!(row.get("title"), Some(&Value::String("team notes".into())));

    let err = env
        .engine
        .find_one("post", post.reference_id(), &outsider, &tx)
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());

    let listed = env.engine.find_all("post", &member, &tx).await.expect("find_all");
    assert_eq!(listed.len(), 1);

    let own_group = env
        .engine
        .find_one("usergroup", group, &member, &tx)
        .await
        .expect("members read their own group row");
    assert_eq!(own_group.get("name"), Some(&Value::String("team".into())));

    let perm = env
        .engine
        .permission_of("post", post.reference_id(), &tx)
        .await
        .expect("permission_of");
    assert_eq!(perm.owner_id, alice.user_id());
    assert_eq!(perm.group_permissions.len(), 1);
    assert_eq!(perm.group_permissions[0].group_reference_id, group);
    tx.commit().await.expect("commit");
}

#[tokio::test]
async fn deleting_the_grant_revokes_access() {
    let env = TestDb::new("perm_revoke").await;
    env.blog().await;
    with_groups(&env).await;

    let post = post_by(&env, &user(), "shared").await;
    let group = share(&env, &post, "readers").await;
    let member = CallerContext::builder()
        .user_id(ReferenceId::new_v4())
        .member_of(group)
        .build();

    let tx = env.db.begin().await.expect("begin");
    env.engine
        .find_one("post", post.reference_id(), &member, &tx)
        .await
        .expect("granted");
    env.engine
        .delete("usergroup", group, &env.admin(), &tx)
        .await
        .expect("delete group");
    let err = env
        .engine
        .find_one("post", post.reference_id(), &member, &tx)
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
    tx.commit().await.expect("commit");
}

#[tokio::test]
async fn cache_entries_follow_writes() {
    let env = TestDb::with_config("perm_cache", cached_config()).await;
    env.blog().await;
    with_groups(&env).await;
    let cache = env.engine.cache().expect("cache enabled");

    let alice = user();
    let post = post_by(&env, &alice, "cached").await;
    assert!(cache.is_empty());

    let tx = env.db.begin().await.expect("begin");
    env.engine
        .find_one("post", post.reference_id(), &alice, &tx)
        .await
        .expect("find_one");
    assert_eq!(cache.len(), 1);
    env.engine
        .find_one("post", post.reference_id(), &alice, &tx)
        .await
        .expect("cached find_one");
    assert_eq!(cache.len(), 1);

    env.engine
        .update("post", post.reference_id(), attrs([("title", Value::String("changed".into()))]), &alice, &tx)
        .await
        .expect("update");
    assert!(cache.is_empty(), "a write drops the row's entry");
    tx.commit().await.expect("commit");

    let tx = env.db.begin().await.expect("begin");
    env.engine
        .find_one("post", post.reference_id(), &alice, &tx)
        .await
        .expect("find_one");
    assert_eq!(cache.len(), 1);
    tx.commit().await.expect("commit");

    share(&env, &post, "late").await;
    assert!(cache.is_empty(), "a grant clears every entry");
}

#[tokio::test]
async fn disabled_cache_is_absent() {
    let env = TestDb::new("perm_no_cache").await;
    assert!(env.engine.cache().is_none());
}

fn cached_config() -> EngineConfig {
    EngineConfig {
        permission_cache: PermissionCacheConfig {
            enabled: true,
            max_entries: 64,
        },
        ..EngineConfig::default()
    }
}

#[tokio::test]
async fn rolled_back_grant_does_not_linger_in_the_cache() {
    let env = TestDb::with_config("perm_cache_rollback", cached_config()).await;
    env.blog().await;
    with_groups(&env).await;
    let admin = env.admin();

    let post = post_by(&env, &user(), "draft").await;
    let tx = env.db.begin().await.expect("begin");
    let group = env
        .engine
        .create("usergroup", attrs([("name", Value::String("editors".into()))]), &admin, &tx)
        .await
        .expect("create group")
        .reference_id();
    tx.commit().await.expect("commit");
    let member = CallerContext::builder()
        .user_id(ReferenceId::new_v4())
        .member_of(group)
        .build();

    let tx = env.db.begin().await.expect("begin");
    env.engine
        .create(
            JOIN,
            attrs([
                ("post_id", Value::Reference(post.reference_id())),
                ("usergroup_id", Value::Reference(group)),
            ]),
            &admin,
            &tx,
        )
        .await
        .expect("grant");
    env.engine
        .find_one("post", post.reference_id(), &member, &tx)
        .await
        .expect("granted inside the transaction");
    tx.rollback().await.expect("rollback");

    let tx = env.db.begin().await.expect("begin");
    let perm = env
        .engine
        .permission_of("post", post.reference_id(), &tx)
        .await
        .expect("permission_of");
    assert!(perm.group_permissions.is_empty());
    let err = env
        .engine
        .find_one("post", post.reference_id(), &member, &tx)
        .await
        .unwrap_err();
    assert!(err.is_unauthorized(), "{err}");
    tx.commit().await.expect("commit");
}

#[tokio::test]
async fn grants_committed_by_another_engine_reach_the_cache() {
    let env = TestDb::with_config("perm_cache_peer", cached_config()).await;
    env.blog().await;
    with_groups(&env).await;

    let post = post_by(&env, &user(), "shared later").await;
    let tx = env.db.begin().await.expect("begin");
    let group = env
        .engine
        .create("usergroup", attrs([("name", Value::String("late".into()))]), &env.admin(), &tx)
        .await
        .expect("create group")
        .reference_id();
    tx.commit().await.expect("commit");
    let member = CallerContext::builder()
        .user_id(ReferenceId::new_v4())
        .member_of(group)
        .build();

    let tx = env.db.begin().await.expect("begin");
    let err = env
        .engine
        .find_one("post", post.reference_id(), &member, &tx)
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
    tx.commit().await.expect("commit");
    let cache = env.engine.cache().expect("cache enabled");
    assert!(!cache.is_empty(), "the denial was cached");

    // Same database, separate engine: its write never touches our cache.
    let mut peer_config = cached_config();
    peer_config.admin_group_id = Some(env.admin_group);
    let peer = ResourceEngine::new(Arc::clone(&env.registry), &peer_config);
    let tx = env.db.begin().await.expect("begin");
    peer.create(
        JOIN,
        attrs([
            ("post_id", Value::Reference(post.reference_id())),
            ("usergroup_id", Value::Reference(group)),
        ]),
        &env.admin(),
        &tx,
    )
    .await
    .expect("grant through the peer");
    tx.commit().await.expect("commit");
    assert!(!cache.is_empty());

    let tx = env.db.begin().await.expect("begin");
    env.engine
        .find_one("post", post.reference_id(), &member, &tx)
        .await
        .expect("stale entry is not trusted");
    tx.commit().await.expect("commit");
}

#[tokio::test]
async fn pages_count_only_readable_rows() {
    let env = TestDb::new("perm_pages").await;
    env.blog().await;
    let (alice, bob) = (user(), user());
    for n in 0..3 {
        post_by(&env, &bob, &format!("bob {n}")).await;
        post_by(&env, &alice, &format!("alice {n}")).await;
    }

    let tx = env.db.begin().await.expect("begin");
    let titles = |rows: Vec<Row>| -> Vec<String> {
        rows.iter()
            .filter_map(|r| r.get("title").and_then(Value::as_str).map(str::to_owned))
            .collect()
    };
    let first = env
        .engine
        .find_page("post", Page::new(0, 2), &alice, &tx)
        .await
        .expect("first page");
    assert_eq!(titles(first), ["alice 0", "alice 1"]);
    let second = env
        .engine
        .find_page("post", Page::new(2, 2), &alice, &tx)
        .await
        .expect("second page");
    assert_eq!(titles(second), ["alice 2"]);
    let empty = env
        .engine
        .find_page("post", Page::new(0, 0), &alice, &tx)
        .await
        .expect("zero limit");
    assert!(empty.is_empty());
    tx.commit().await.expect("commit");
}
