//! Database lifecycle: info, system docs, clean, and persistence across
//! process restarts with the redb backend.

mod common;

use barrel::{Backend, Barrel, BarrelConfig, BarrelError, FoldOptions, StoreDef};
use common::fresh_db;

#[tokio::test]
async fn info_counts_live_documents() {
    let (_barrel, db) = fresh_db("ops_info").await;

    db.put(serde_json::json!({"_id": "a", "v": 1})).await.unwrap();
    db.put(serde_json::json!({"_id": "b", "v": 1})).await.unwrap();
    let r = db.put(serde_json::json!({"_id": "c", "v": 1})).await.unwrap();
    db.delete("c", &r.rev).await.unwrap();

    let info = db.info().await.unwrap();
    assert_eq!(info.db_name, "ops_info");
    assert_eq!(info.doc_count, 2);
    assert_eq!(info.update_seq, 4);
}

#[tokio::test]
async fn infos_lists_in_docid_order() {
    let (_barrel, db) = fresh_db("ops_infos").await;

    for id in ["cherry", "apple", "banana"] {
        db.put(serde_json::json!({"_id": id})).await.unwrap();
    }

    let page = db.infos(FoldOptions::default()).await.unwrap();
    let ids: Vec<&str> = page.rows.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["apple", "banana", "cherry"]);
    assert_eq!(page.total_rows, 3);
    assert_eq!(page.offset, 0);

    let ranged = db
        .infos(FoldOptions {
            start_key: Some("banana".into()),
            end_key: Some("banana".into()),
            max: None,
        })
        .await
        .unwrap();
    assert_eq!(ranged.rows.len(), 1);
    assert_eq!(ranged.rows[0].id, "banana");
}

#[tokio::test]
async fn system_docs_bypass_the_changes_feed() {
    let (_barrel, db) = fresh_db("ops_sysdocs").await;

    db.write_system_doc("replication-checkpoint", serde_json::json!({"seq": 42}))
        .await
        .unwrap();

    let value = db.read_system_doc("replication-checkpoint").await.unwrap();
    assert_eq!(value["seq"], 42);

    // No sequence allocated, nothing on the feed.
    assert_eq!(db.update_seq(), 0);
    assert!(db.changes_since(0, None).await.unwrap().results.is_empty());

    db.delete_system_doc("replication-checkpoint").await.unwrap();
    assert!(matches!(
        db.read_system_doc("replication-checkpoint").await,
        Err(BarrelError::NotFound(_))
    ));
}

#[tokio::test]
async fn clean_destroys_and_reopen_starts_fresh() {
    let barrel = Barrel::memory();
    let db = barrel.open(Barrel::DEFAULT_STORE, "ops_clean").await.unwrap();

    db.put(serde_json::json!({"_id": "a", "v": 1})).await.unwrap();
    db.write_system_doc("sys", serde_json::json!({})).await.unwrap();

    barrel.clean(Barrel::DEFAULT_STORE, "ops_clean").await.unwrap();

    // The old handle is dead.
    assert!(matches!(
        db.put(serde_json::json!({"_id": "b"})).await,
        Err(BarrelError::NotFound(_))
    ));
    assert!(db.get("a").await.is_err());

    // Reopening creates an empty database.
    let db = barrel.open(Barrel::DEFAULT_STORE, "ops_clean").await.unwrap();
    assert_eq!(db.update_seq(), 0);
    assert!(matches!(db.get("a").await, Err(BarrelError::NotFound(_))));
    assert!(db.read_system_doc("sys").await.is_err());
}

#[tokio::test]
async fn clean_of_never_opened_database_is_ok() {
    let barrel = Barrel::memory();
    barrel.clean(Barrel::DEFAULT_STORE, "never_opened").await.unwrap();
}

#[tokio::test]
async fn databases_are_isolated_within_a_store() {
    let barrel = Barrel::memory();
    let one = barrel.open(Barrel::DEFAULT_STORE, "iso_one").await.unwrap();
    let two = barrel.open(Barrel::DEFAULT_STORE, "iso_two").await.unwrap();

    one.put(serde_json::json!({"_id": "a", "v": 1})).await.unwrap();

    assert!(two.get("a").await.is_err());
    assert_eq!(two.update_seq(), 0);
    assert_eq!(one.update_seq(), 1);
}

#[tokio::test]
async fn redb_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("barrel.redb");
    let config = |path: &std::path::Path| BarrelConfig {
        stores: vec![StoreDef {
            name: "disk".into(),
            backend: Backend::Redb {
                path: path.to_path_buf(),
            },
        }],
    };

    let first_rev = {
        let barrel = Barrel::new(config(&path)).unwrap();
        let db = barrel.open("disk", "mydb").await.unwrap();
        let created = db.put(serde_json::json!({"_id": "a", "v": 1})).await.unwrap();
        assert_eq!(db.update_seq(), 1);
        created.rev
    };

    // Let the dropped writer task release its store handle before the
    // second engine instance opens the file.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let barrel = Barrel::new(config(&path)).unwrap();
    let db = barrel.open("disk", "mydb").await.unwrap();

    // Recovered high-water mark and data.
    assert_eq!(db.update_seq(), 1);
    let doc = db.get("a").await.unwrap();
    assert_eq!(doc.data["v"], 1);
    assert_eq!(doc.rev.as_ref(), Some(&first_rev));

    // Sequences continue where they left off.
    let updated = db
        .put(serde_json::json!({"_id": "a", "_rev": first_rev.to_string(), "v": 2}))
        .await
        .unwrap();
    assert_eq!(updated.rev.pos, 2);
    assert_eq!(db.update_seq(), 2);
}
