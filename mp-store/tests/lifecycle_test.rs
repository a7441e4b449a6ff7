//! Store lifecycle across open/close boundaries.

use chrono::{TimeZone, Utc};
use mp_core::EventRecord;
use mp_store::{FetchMetadata, IngestOptions, Store};
use std::panic::AssertUnwindSafe;

fn events(n: u32) -> Vec<EventRecord> {
    (0..n)
        .map(|i| EventRecord {
            event_name: "Ping".into(),
            event_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            distinct_id: format!("u{i}"),
            insert_id: format!("i{i}"),
            properties: serde_json::json!({}),
        })
        .collect()
}

#[test]
fn persistent_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("project.db");

    let mut store = Store::open(&path).unwrap();
    store
        .create_events_table("pings", events(25), &FetchMetadata::default(), IngestOptions::default())
        .unwrap();
    store.close().unwrap();

    let reopened = Store::open(&path).unwrap();
    let tables = reopened.list_tables().unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].row_count, 25);
    assert_eq!(
        reopened.sql_scalar("SELECT count(*) FROM pings").unwrap(),
        serde_json::json!(25)
    );
}

#[test]
fn read_only_store_serves_queries_but_rejects_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("project.db");
    let mut store = Store::open(&path).unwrap();
    store
        .create_events_table("pings", events(5), &FetchMetadata::default(), IngestOptions::default())
        .unwrap();
    store.close().unwrap();

    let mut reader = Store::open_read_only(&path).unwrap();
    assert!(reader.is_read_only());
    assert_eq!(
        reader.sql_scalar("SELECT count(*) FROM pings").unwrap(),
        serde_json::json!(5)
    );
    let err = reader
        .create_events_table("more", events(1), &FetchMetadata::default(), IngestOptions::default())
        .unwrap_err();
    assert!(err.to_string().contains("read-only"));
}

#[test]
fn ephemeral_cleanup_holds_across_panics() {
    let mut path_holder = None;
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
        let store = Store::ephemeral().unwrap();
        path_holder = Some(store.path().unwrap().to_path_buf());
        panic!("scope exits exceptionally");
    }));
    assert!(outcome.is_err());
    // The temp file is gone even though the scope unwound.
    assert!(!path_holder.unwrap().exists());
}

#[test]
fn default_project_path_is_under_the_app_dir() {
    // Only check path construction; do not touch the real home directory.
    let home = dirs::home_dir();
    if home.is_none() {
        return;
    }
    // for_project would create the file; use open on a temp mirror instead.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".mixpanel_data").join("123.db");
    let store = Store::open(&path).unwrap();
    assert!(store.path().unwrap().ends_with(".mixpanel_data/123.db"));
}
