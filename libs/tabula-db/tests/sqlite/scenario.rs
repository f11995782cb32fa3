#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end: a foreign key whose target is soft-deleted stops resolving.

mod common;

use common::{TestDb, attrs, user};
use sea_orm::ConnectionTrait;
use tabula_db::{EngineError, Value};

#[tokio::test]
async fn deleting_a_parent_breaks_reads_of_its_children() {
    let env = TestDb::new("scenario_dangling").await;
    env.blog().await;
    let alice = user();

    let tx = env.db.begin().await.expect("begin");
    let post_ref = env
        .engine
        .create("post", attrs([("title", Value::String("parent".into()))]), &alice, &tx)
        .await
        .expect("post")
        .reference_id();
    let comment_ref = env
        .engine
        .create(
            "comment",
            attrs([
                ("content", Value::String("child".into())),
                ("post_id", Value::Reference(post_ref)),
            ]),
            &alice,
            &tx,
        )
        .await
        .expect("comment")
        .reference_id();
    tx.commit().await.expect("commit");

    let tx = env.db.begin().await.expect("begin");
    env.engine
        .find_one("post", post_ref, &alice, &tx)
        .await
        .expect("post is live");
    env.engine
        .delete("post", post_ref, &alice, &tx)
        .await
        .expect("delete post");

    let err = env.engine.find_one("post", post_ref, &alice, &tx).await.unwrap_err();
    assert!(err.is_not_found(), "{err}");

    let err = env
        .engine
        .find_one("comment", comment_ref, &alice, &tx)
        .await
        .unwrap_err();
    assert!(err.is_foreign_key_integrity(), "{err}");

    let err = env.engine.find_all("comment", &alice, &tx).await.unwrap_err();
    assert!(
        matches!(&err, EngineError::ForeignKeyIntegrity { column, target, .. } if column == "post_id" && target == "post"),
        "{err}"
    );

    // The row itself is still addressable; only its foreign key dangles.
    env.engine
        .reference_to_id("comment", comment_ref, &tx)
        .await
        .expect("comment row is live");

    let err = env
        .engine
        .create(
            "comment",
            attrs([
                ("content", Value::String("late".into())),
                ("post_id", Value::Reference(post_ref)),
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
async fn failed_transaction_closure_rolls_back() {
    let env = TestDb::new("scenario_rollback").await;
    env.blog().await;

    let result: Result<(), EngineError> = env
        .db
        .transaction(|tx| {
            Box::pin(async move {
                tx.execute_unprepared(
                    "INSERT INTO post (reference_id, permission, title, created_at) \
                     VALUES (x'00112233445566778899aabbccddeeff', 0, 'doomed', '2026-01-01T00:00:00+00:00')",
                )
                .await?;
                Err(EngineError::query("abort"))
            })
        })
        .await;
    assert!(matches!(result, Err(EngineError::QueryConstruction(_))));

    let tx = env.db.begin().await.expect("begin");
    let posts = env
        .engine
        .find_all("post", &env.admin(), &tx)
        .await
        .expect("find_all");
    assert!(posts.is_empty());
    tx.commit().await.expect("commit");
}
