#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Create/read/update/delete through the engine on SQLite.

mod common;

use common::{TestDb, attrs, user};
use tabula_db::{EngineError, Operation, Outcome, Page, ResourceRequest, Value};
use tabula_security::ReferenceId;

#[tokio::test]
async fn create_then_find_one_returns_stored_values() {
    let env = TestDb::new("crud_create").await;
    env.blog().await;
    let alice = user();

    let tx = env.db.begin().await.expect("begin");
    let created = env
        .engine
        .create(
            "post",
            attrs([("title", Value::String("hello".into()))]),
            &alice,
            &tx,
        )
        .await
        .expect("create");

    assert!(!created.reference_id().is_null());
    assert_eq!(created.owner_id(), alice.user_id());
    assert_eq!(created.get("title"), Some(&Value::String("hello".into())));
    assert_eq!(created.get("body"), Some(&Value::Null));
    assert!(created.get("id").is_none(), "internal id must stay hidden");
    assert!(created.get("created_at").and_then(Value::as_timestamp).is_some());

    let found = env
        .engine
        .find_one("post", created.reference_id(), &alice, &tx)
        .await
        .expect("find_one");
    assert_eq!(found.values(), created.values());
    tx.commit().await.expect("commit");
}

#[tokio::test]
async fn managed_columns_are_ignored_on_create() {
    let env = TestDb::new("crud_managed").await;
    env.blog().await;
    let alice = user();
    let forged_ref = ReferenceId::new_v4();

    let tx = env.db.begin().await.expect("begin");
    let row = env
        .engine
        .create(
            "post",
            attrs([
                ("title", Value::String("t".into())),
                ("reference_id", Value::Reference(forged_ref)),
                ("user_account_id", Value::Reference(ReferenceId::new_v4())),
                ("permission", Value::Int(0)),
            ]),
            &alice,
            &tx,
        )
        .await
        .expect("create");

    assert_ne!(row.reference_id(), forged_ref);
    assert_eq!(row.owner_id(), alice.user_id());
    assert_ne!(row.permission().bits(), 0);
    tx.commit().await.expect("commit");
}

#[tokio::test]
async fn unknown_and_missing_columns_are_rejected() {
    let env = TestDb::new("crud_columns").await;
    env.blog().await;
    let alice = user();

    let tx = env.db.begin().await.expect("begin");
    let unknown = env
        .engine
        .create(
            "post",
            attrs([
                ("title", Value::String("t".into())),
                ("nope", Value::Int(1)),
            ]),
            &alice,
            &tx,
        )
        .await
        .unwrap_err();
    assert!(matches!(unknown, EngineError::QueryConstruction(_)), "{unknown}");

    let missing = env
        .engine
        .create("post", attrs([("body", Value::String("b".into()))]), &alice, &tx)
        .await
        .unwrap_err();
    assert!(matches!(missing, EngineError::QueryConstruction(_)), "{missing}");

    let unknown_table = env
        .engine
        .find_all("nowhere", &alice, &tx)
        .await
        .unwrap_err();
    assert!(matches!(unknown_table, EngineError::QueryConstruction(_)));
    tx.rollback().await.expect("rollback");
}

#[tokio::test]
async fn malformed_foreign_key_is_rejected() {
    let env = TestDb::new("crud_malformed_fk").await;
    env.blog().await;
    let alice = user();

    let tx = env.db.begin().await.expect("begin");
    let err = env
        .engine
        .create(
            "comment",
            attrs([
                ("content", Value::String("c".into())),
                ("post_id", Value::String("not-a-reference".into())),
            ]),
            &alice,
            &tx,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MalformedIdentifier(_)), "{err}");
    tx.rollback().await.expect("rollback");
}

#[tokio::test]
async fn foreign_key_to_missing_row_is_rejected() {
    let env = TestDb::new("crud_missing_fk").await;
    env.blog().await;
    let alice = user();

    let tx = env.db.begin().await.expect("begin");
    let err = env
        .engine
        .create(
            "comment",
            attrs([
                ("content", Value::String("c".into())),
                ("post_id", Value::Reference(ReferenceId::new_v4())),
            ]),
            &alice,
            &tx,
        )
        .await
        .unwrap_err();
    assert!(err.is_foreign_key_integrity(), "{err}");
    tx.rollback().await.expect("rollback");
}

#[tokio::test]
async fn foreign_keys_come_back_as_reference_ids() {
    let env = TestDb::new("crud_fk_roundtrip").await;
    env.blog().await;
    let alice = user();

    let tx = env.db.begin().await.expect("begin");
    let post = env
        .engine
        .create("post", attrs([("title", Value::String("p".into()))]), &alice, &tx)
        .await
        .expect("post");
    let comment = env
        .engine
        .create(
            "comment",
            attrs([
                ("content", Value::String("c".into())),
                ("post_id", Value::String(post.reference_id().to_string())),
            ]),
            &alice,
            &tx,
        )
        .await
        .expect("comment");

    assert_eq!(
        comment.get("post_id"),
        Some(&Value::Reference(post.reference_id()))
    );
    let listed = env.engine.find_all("comment", &alice, &tx).await.expect("find_all");
    assert_eq!(listed.len(), 1);
    assert_eq!(
        listed[0].get("post_id"),
        Some(&Value::Reference(post.reference_id()))
    );
    tx.commit().await.expect("commit");
}

#[tokio::test]
async fn update_merges_and_skips_unchanged_values() {
    let env = TestDb::new("crud_update").await;
    env.blog().await;
    let alice = user();

    let tx = env.db.begin().await.expect("begin");
    let post = env
        .engine
        .create(
            "post",
            attrs([
                ("title", Value::String("first".into())),
                ("body", Value::String("text".into())),
            ]),
            &alice,
            &tx,
        )
        .await
        .expect("create");
    let reference = post.reference_id();

    let same = env
        .engine
        .update("post", reference, attrs([("title", Value::String("first".into()))]), &alice, &tx)
        .await
        .expect("no-op update");
    assert_eq!(same.get("updated_at"), post.get("updated_at"));

    let updated = env
        .engine
        .update("post", reference, attrs([("title", Value::String("second".into()))]), &alice, &tx)
        .await
        .expect("update");
    assert_eq!(updated.get("title"), Some(&Value::String("second".into())));
    assert_eq!(updated.get("body"), Some(&Value::String("text".into())));
    assert!(updated.get("updated_at").and_then(Value::as_timestamp).is_some());
    assert_eq!(updated.reference_id(), reference);

    let cleared = env
        .engine
        .update("post", reference, attrs([("title", Value::Null)]), &alice, &tx)
        .await
        .unwrap_err();
    assert!(matches!(cleared, EngineError::QueryConstruction(_)));
    tx.commit().await.expect("commit");
}

#[tokio::test]
async fn deleted_rows_disappear_from_every_read() {
    let env = TestDb::new("crud_delete").await;
    env.blog().await;
    let alice = user();

    let tx = env.db.begin().await.expect("begin");
    let keep = env
        .engine
        .create("post", attrs([("title", Value::String("keep".into()))]), &alice, &tx)
        .await
        .expect("keep");
    let gone = env
        .engine
        .create("post", attrs([("title", Value::String("gone".into()))]), &alice, &tx)
        .await
        .expect("gone");
    let gone_ref = gone.reference_id();

    env.engine
        .delete("post", gone_ref, &alice, &tx)
        .await
        .expect("delete");

    let err = env.engine.find_one("post", gone_ref, &alice, &tx).await.unwrap_err();
    assert!(err.is_not_found());

    let all = env.engine.find_all("post", &alice, &tx).await.expect("find_all");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].reference_id(), keep.reference_id());

    let err = env
        .engine
        .update("post", gone_ref, attrs([("title", Value::String("x".into()))]), &alice, &tx)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    let err = env.engine.delete("post", gone_ref, &alice, &tx).await.unwrap_err();
    assert!(err.is_not_found());
    let err = env.engine.reference_to_id("post", gone_ref, &tx).await.unwrap_err();
    assert!(err.is_not_found());
    tx.commit().await.expect("commit");
}

#[tokio::test]
async fn reference_and_internal_ids_translate_both_ways() {
    let env = TestDb::new("crud_translate").await;
    env.blog().await;
    let alice = user();

    let tx = env.db.begin().await.expect("begin");
    let post = env
        .engine
        .create("post", attrs([("title", Value::String("p".into()))]), &alice, &tx)
        .await
        .expect("create");

    let id = env
        .engine
        .reference_to_id("post", post.reference_id(), &tx)
        .await
        .expect("reference_to_id");
    let back = env
        .engine
        .id_to_reference("post", id, &tx)
        .await
        .expect("id_to_reference");
    assert_eq!(back, post.reference_id());

    let err = env
        .engine
        .reference_to_id("post", ReferenceId::NULL, &tx)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    tx.commit().await.expect("commit");
}

#[tokio::test]
async fn find_page_windows_rows_in_creation_order() {
    let env = TestDb::new("crud_page").await;
    env.blog().await;
    let alice = user();

    let tx = env.db.begin().await.expect("begin");
    for n in 0..5 {
        env.engine
            .create("post", attrs([("title", Value::String(format!("p{n}")))]), &alice, &tx)
            .await
            .expect("create");
    }

    let page = env
        .engine
        .find_page("post", Page::new(1, 2), &alice, &tx)
        .await
        .expect("page");
    let titles: Vec<_> = page
        .iter()
        .filter_map(|r| r.get("title").and_then(Value::as_str))
        .collect();
    assert_eq!(titles, ["p1", "p2"]);

    let tail = env
        .engine
        .find_page("post", Page::new(4, 10), &alice, &tx)
        .await
        .expect("tail");
    assert_eq!(tail.len(), 1);
    tx.commit().await.expect("commit");
}

#[tokio::test]
async fn execute_dispatches_each_operation() {
    let env = TestDb::new("crud_execute").await;
    env.blog().await;
    let alice = user();
    let request = |operation| ResourceRequest {
        table: "post".to_owned(),
        operation,
        caller: alice.clone(),
    };

    let tx = env.db.begin().await.expect("begin");
    let Outcome::Row(created) = env
        .engine
        .execute(
            request(Operation::Create(attrs([("title", Value::String("a".into()))]))),
            &tx,
        )
        .await
        .expect("create")
    else {
        panic!("create should return a row");
    };
    let reference = created.reference_id();

    let outcome = env
        .engine
        .execute(
            request(Operation::Update(reference, attrs([("title", Value::String("b".into()))]))),
            &tx,
        )
        .await
        .expect("update");
    assert!(matches!(outcome, Outcome::Row(ref r) if r.get("title") == Some(&Value::String("b".into()))));

    let outcome = env
        .engine
        .execute(request(Operation::FindOne(reference)), &tx)
        .await
        .expect("find_one");
    assert!(matches!(outcome, Outcome::Row(_)));

    let outcome = env
        .engine
        .execute(request(Operation::FindAll), &tx)
        .await
        .expect("find_all");
    assert!(matches!(outcome, Outcome::Rows(ref rows) if rows.len() == 1));

    let outcome = env
        .engine
        .execute(request(Operation::Delete(reference)), &tx)
        .await
        .expect("delete");
    assert!(matches!(outcome, Outcome::Deleted(r) if r == reference));
    tx.commit().await.expect("commit");
}

#[tokio::test]
async fn rolled_back_writes_are_not_visible() {
    let env = TestDb::new("crud_rollback").await;
    env.blog().await;
    let alice = user();

    let tx = env.db.begin().await.expect("begin");
    env.engine
        .create("post", attrs([("title", Value::String("tmp".into()))]), &alice, &tx)
        .await
        .expect("create");
    tx.rollback().await.expect("rollback");

    let tx = env.db.begin().await.expect("begin");
    let all = env.engine.find_all("post", &alice, &tx).await.expect("find_all");
    assert!(all.is_empty());
    tx.commit().await.expect("commit");
}
