//! The replication primitives: put_rev grafting, idempotence, revs_diff,
//! and history reads with known ancestors.

mod common;

use barrel::{GetOptions, Revision};
use common::fresh_db;

fn rev(s: &str) -> Revision {
    s.parse().unwrap()
}

#[tokio::test]
async fn put_rev_grafts_a_full_history() {
    let (_barrel, db) = fresh_db("repl_graft").await;

    db.put_rev(
        serde_json::json!({"_id": "doc1", "v": 9}),
        vec![rev("3-c"), rev("2-b"), rev("1-a")],
    )
    .await
    .unwrap();

    let info = db.get_doc_info("doc1").await.unwrap().unwrap();
    assert_eq!(info.rev_tree.len(), 3);
    assert_eq!(info.current_rev.as_ref(), Some(&rev("3-c")));
    assert!(!info.branched);
    assert!(!info.conflict);

    let doc = db.get("doc1").await.unwrap();
    assert_eq!(doc.data["v"], 9);
    assert_eq!(doc.rev.as_ref(), Some(&rev("3-c")));
}

#[tokio::test]
async fn put_rev_replay_is_a_no_op() {
    let (_barrel, db) = fresh_db("repl_idem").await;

    let body = serde_json::json!({"_id": "doc1", "v": 9});
    let history = vec![rev("3-c"), rev("2-b"), rev("1-a")];

    let first = db.put_rev(body.clone(), history.clone()).await.unwrap();
    let replay = db.put_rev(body, history).await.unwrap();
    assert_eq!(first.rev, replay.rev);

    // No new sequence was allocated and the tree is unchanged.
    assert_eq!(db.update_seq(), 1);
    let info = db.get_doc_info("doc1").await.unwrap().unwrap();
    assert_eq!(info.rev_tree.len(), 3);
}

#[tokio::test]
async fn put_rev_extends_a_known_branch() {
    let (_barrel, db) = fresh_db("repl_extend").await;

    let r1 = db
        .put(serde_json::json!({"_id": "doc1", "v": 1}))
        .await
        .unwrap();
    let r2 = db
        .put(serde_json::json!({"_id": "doc1", "_rev": r1.rev.to_string(), "v": 2}))
        .await
        .unwrap();

    db.put_rev(
        serde_json::json!({"_id": "doc1", "v": 3}),
        vec![rev("3-zz"), r2.rev.clone(), r1.rev.clone()],
    )
    .await
    .unwrap();

    let info = db.get_doc_info("doc1").await.unwrap().unwrap();
    assert_eq!(info.rev_tree.len(), 3);
    assert_eq!(
        info.rev_tree.get(&rev("3-zz")).unwrap().parent.as_ref(),
        Some(&r2.rev)
    );
    assert!(!info.branched);
}

#[tokio::test]
async fn put_rev_tombstone_replicates_a_delete() {
    let (_barrel, db) = fresh_db("repl_del").await;

    let r1 = db
        .put(serde_json::json!({"_id": "doc1", "v": 1}))
        .await
        .unwrap();

    db.put_rev(
        serde_json::json!({"_id": "doc1", "_deleted": true}),
        vec![rev("2-dead"), r1.rev.clone()],
    )
    .await
    .unwrap();

    let info = db.get_doc_info("doc1").await.unwrap().unwrap();
    assert!(info.deleted);
    assert!(db.get("doc1").await.is_err());
}

#[tokio::test]
async fn revs_diff_on_known_revs_is_empty() {
    let (_barrel, db) = fresh_db("repl_diff_known").await;

    let r1 = db
        .put(serde_json::json!({"_id": "doc1", "v": 1}))
        .await
        .unwrap();
    let r2 = db
        .put(serde_json::json!({"_id": "doc1", "_rev": r1.rev.to_string(), "v": 2}))
        .await
        .unwrap();

    let diff = db
        .revs_diff("doc1", vec![r1.rev.clone(), r2.rev.clone()])
        .await
        .unwrap();
    assert!(diff.missing.is_empty());
    assert!(diff.possible_ancestors.is_empty());
}

#[tokio::test]
async fn revs_diff_on_missing_doc_returns_everything() {
    let (_barrel, db) = fresh_db("repl_diff_missing").await;

    let revs = vec![rev("1-a"), rev("2-b")];
    let diff = db.revs_diff("ghost", revs.clone()).await.unwrap();
    assert_eq!(diff.missing, revs);
    assert!(diff.possible_ancestors.is_empty());
}

#[tokio::test]
async fn revs_diff_reports_input_order_and_ancestors() {
    let (_barrel, db) = fresh_db("repl_diff_anc").await;

    let r1 = db
        .put(serde_json::json!({"_id": "doc1", "v": 1}))
        .await
        .unwrap();

    // The known leaf is generation 1; a missing generation-2 rev can use
    // it as an ancestor.
    let diff = db
        .revs_diff(
            "doc1",
            vec![rev("2-xx"), r1.rev.clone(), rev("4-yy")],
        )
        .await
        .unwrap();

    assert_eq!(diff.missing, vec![rev("2-xx"), rev("4-yy")]);
    assert_eq!(diff.possible_ancestors, vec![r1.rev.clone()]);
}

#[tokio::test]
async fn revs_diff_same_generation_offers_the_parent() {
    let (_barrel, db) = fresh_db("repl_diff_gen").await;

    let r1 = db
        .put(serde_json::json!({"_id": "doc1", "v": 1}))
        .await
        .unwrap();
    let r2 = db
        .put(serde_json::json!({"_id": "doc1", "_rev": r1.rev.to_string(), "v": 2}))
        .await
        .unwrap();

    // 2-zz is missing; the known leaf r2 has the same generation, so its
    // parent r1 is the candidate ancestor.
    let diff = db
        .revs_diff("doc1", vec![rev("2-zz"), r2.rev.clone()])
        .await
        .unwrap();

    assert_eq!(diff.missing, vec![rev("2-zz")]);
    assert_eq!(diff.possible_ancestors, vec![r1.rev.clone()]);
}

#[tokio::test]
async fn history_walk_stops_at_known_ancestor() {
    let (_barrel, db) = fresh_db("repl_history").await;

    db.put_rev(
        serde_json::json!({"_id": "doc1", "v": 3}),
        vec![rev("3-c"), rev("2-b"), rev("1-a")],
    )
    .await
    .unwrap();

    let doc = db
        .get_with_opts(
            "doc1",
            GetOptions {
                history: true,
                ancestors: vec![rev("2-b")],
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let ids = doc.data["_revisions"]["ids"].as_array().unwrap();
    assert_eq!(ids.len(), 2); // 3-c, then 2-b inclusive, then stop
    assert_eq!(ids[0], "c");
    assert_eq!(ids[1], "b");

    let capped = db
        .get_with_opts(
            "doc1",
            GetOptions {
                history: true,
                max_history: 1,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(capped.data["_revisions"]["ids"].as_array().unwrap().len(), 1);
}
