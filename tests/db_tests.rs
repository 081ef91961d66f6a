//! DB tests: ingest batching and idempotence, connection repository, due selection, leases, search.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sokoni::engine::db_ops::{
    DbPool, IngestWriter, ScanLease, count_files, create_connection, delete_connection,
    due_connections, files_for_connection, get_connection, ingest, list_connections,
    mark_scanned, search_files, update_connection,
};
use sokoni::pipeline::local_walk;
use sokoni::{ConnectionSpec, FileRecord, ScanError};
use std::time::Duration;
use tempfile::TempDir;

fn pool() -> (TempDir, DbPool) {
    let dir = tempfile::tempdir().unwrap();
    let pool = DbPool::open(&dir.path().join("test.db"), 2).unwrap();
    (dir, pool)
}

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
}

fn spec(name: &str) -> ConnectionSpec {
    ConnectionSpec {
        name: name.into(),
        base_path: format!("/srv/{name}"),
        ..Default::default()
    }
}

fn record(i: usize) -> FileRecord {
    FileRecord {
        path: format!("/srv/docs/f{i:04}.pdf"),
        name: format!("f{i:04}.pdf"),
        size: i as u64,
        mod_time: at(1_700_000_000 + i as i64),
    }
}

// --- ingest ---

#[test]
fn test_ingest_commits_full_and_partial_batches() {
    let (_dir, pool) = pool();
    let mut db = pool.get().unwrap();
    let c = create_connection(&db, &spec("docs"), 1, Utc::now()).unwrap();

    let mut batches = Vec::new();
    let stats = {
        let mut writer =
            IngestWriter::new(&mut db, c.id, 100).on_batch(|s| batches.push(s.files));
        for i in 0..250 {
            writer.push(record(i)).unwrap();
        }
        writer.finish().unwrap()
    };
    assert_eq!(stats.files, 250);
    assert_eq!(stats.batches, 3);
    assert_eq!(batches, vec![100, 200, 250]);
    assert_eq!(count_files(&db).unwrap(), 250);
}

#[test]
fn test_ingest_empty_stream_commits_nothing() {
    let (_dir, pool) = pool();
    let mut db = pool.get().unwrap();
    let c = create_connection(&db, &spec("docs"), 1, Utc::now()).unwrap();
    let stats = IngestWriter::new(&mut db, c.id, 100).finish().unwrap();
    assert_eq!(stats.batches, 0);
    assert_eq!(count_files(&db).unwrap(), 0);
}

#[test]
fn test_ingest_is_idempotent() {
    let (_dir, pool) = pool();
    let mut db = pool.get().unwrap();
    let c = create_connection(&db, &spec("docs"), 1, Utc::now()).unwrap();

    let mut scans = Vec::new();
    for _ in 0..2 {
        let mut writer = IngestWriter::new(&mut db, c.id, 100);
        for i in 0..30 {
            writer.push(record(i)).unwrap();
        }
        writer.finish().unwrap();
        scans.push(files_for_connection(&db, c.id).unwrap());
        std::thread::sleep(Duration::from_millis(20));
    }
    let (first, second) = (&scans[0], &scans[1]);
    assert_eq!(second.len(), 30);
    for (a, b) in first.iter().zip(second) {
        assert_eq!((&a.path, a.size, a.mod_time), (&b.path, b.size, b.mod_time));
        assert_eq!(a.created_at, b.created_at);
        // Reappearing paths are re-stamped.
        assert!(b.updated_at > a.updated_at, "{} not re-stamped", b.path);
    }
}

#[test]
fn test_ingest_updates_changed_file_in_place() {
    let (_dir, pool) = pool();
    let mut db = pool.get().unwrap();
    let c = create_connection(&db, &spec("docs"), 1, Utc::now()).unwrap();

    let mut writer = IngestWriter::new(&mut db, c.id, 10);
    writer.push(record(1)).unwrap();
    writer.finish().unwrap();

    let mut changed = record(1);
    changed.size = 999;
    changed.mod_time = at(1_800_000_000);
    let mut writer = IngestWriter::new(&mut db, c.id, 10);
    writer.push(changed).unwrap();
    writer.finish().unwrap();

    let rows = files_for_connection(&db, c.id).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].size, 999);
    assert_eq!(rows[0].mod_time, at(1_800_000_000));
    assert!(rows[0].updated_at >= rows[0].created_at);
}

#[test]
fn test_ingest_moves_ownership_to_latest_connection() {
    let (_dir, pool) = pool();
    let mut db = pool.get().unwrap();
    let a = create_connection(&db, &spec("a"), 1, Utc::now()).unwrap();
    let b = create_connection(&db, &spec("b"), 1, Utc::now()).unwrap();
    for id in [a.id, b.id] {
        let mut writer = IngestWriter::new(&mut db, id, 10);
        writer.push(record(5)).unwrap();
        writer.finish().unwrap();
    }
    assert!(files_for_connection(&db, a.id).unwrap().is_empty());
    assert_eq!(files_for_connection(&db, b.id).unwrap().len(), 1);
}

#[test]
fn test_ingest_failed_batch_rolls_back_only_that_batch() {
    let (_dir, pool) = pool();
    let mut db = pool.get().unwrap();
    let c = create_connection(&db, &spec("docs"), 1, Utc::now()).unwrap();
    db.execute_batch(
        "CREATE TRIGGER poison BEFORE INSERT ON files WHEN NEW.name = 'poison.pdf' \
         BEGIN SELECT RAISE(ABORT, 'poisoned record'); END;",
    )
    .unwrap();

    let mut writer = IngestWriter::new(&mut db, c.id, 100);
    for i in 0..100 {
        writer.push(record(i)).unwrap();
    }
    // Second batch: the bad record sits in the middle of a full batch of 100.
    for i in 100..150 {
        writer.push(record(i)).unwrap();
    }
    let mut poison = record(150);
    poison.name = "poison.pdf".into();
    poison.path = "/srv/docs/poison.pdf".into();
    writer.push(poison).unwrap();
    for i in 151..199 {
        writer.push(record(i)).unwrap();
    }
    let err = writer.push(record(199)).unwrap_err();
    assert!(matches!(err, ScanError::Persistence { .. }), "{err}");
    assert_eq!(err.phase(), "persist");
    assert_eq!(writer.stats().batches, 1);
    drop(writer);

    // First batch committed, nothing from the failing batch.
    assert_eq!(count_files(&db).unwrap(), 100);
    let rows = files_for_connection(&db, c.id).unwrap();
    assert!(rows.iter().all(|f| f.size < 100));
}

#[test]
fn test_ingest_failed_trailing_batch_rolls_back() {
    let (_dir, pool) = pool();
    let mut db = pool.get().unwrap();
    let c = create_connection(&db, &spec("docs"), 1, Utc::now()).unwrap();
    db.execute_batch(
        "CREATE TRIGGER poison BEFORE INSERT ON files WHEN NEW.name = 'poison.pdf' \
         BEGIN SELECT RAISE(ABORT, 'poisoned record'); END;",
    )
    .unwrap();

    let mut writer = IngestWriter::new(&mut db, c.id, 100);
    for i in 0..120 {
        writer.push(record(i)).unwrap();
    }
    let mut poison = record(120);
    poison.name = "poison.pdf".into();
    poison.path = "/srv/docs/poison.pdf".into();
    writer.push(poison).unwrap();
    assert!(writer.finish().is_err());
    assert_eq!(count_files(&db).unwrap(), 100);
}

#[test]
fn test_ingest_walk_error_drops_pending_batch() {
    let (_dir, pool) = pool();
    let mut db = pool.get().unwrap();
    let c = create_connection(&db, &spec("docs"), 1, Utc::now()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let err = ingest(
        &mut db,
        c.id,
        local_walk(&dir.path().join("missing")),
        100,
        None,
    )
    .unwrap_err();
    assert!(matches!(err, ScanError::Filesystem { .. }));
    assert_eq!(count_files(&db).unwrap(), 0);
}

#[test]
fn test_ingest_reports_each_batch() {
    let (_dir, pool) = pool();
    let mut db = pool.get().unwrap();
    let c = create_connection(&db, &spec("docs"), 1, Utc::now()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    for i in 0..5 {
        std::fs::write(dir.path().join(format!("f{i}.pdf")), b"%PDF").unwrap();
    }
    let mut seen = Vec::new();
    let mut observer = |s: &sokoni::IngestStats| seen.push((s.files, s.batches));
    let stats = ingest(&mut db, c.id, local_walk(dir.path()), 2, Some(&mut observer)).unwrap();
    assert_eq!(stats.files, 5);
    assert_eq!(seen, vec![(2, 1), (4, 2), (5, 3)]);
}

// --- connections ---

#[test]
fn test_create_connection_defaults() {
    let (_dir, pool) = pool();
    let db = pool.get().unwrap();
    let c = create_connection(&db, &spec("docs"), 42, at(1_700_000_000)).unwrap();
    assert_eq!(c.scan_interval, 604_800);
    assert!(c.auto_scan);
    assert_eq!(c.last_scan, None);
    assert_eq!(c.user_id, 42);
    assert_eq!(c.created_at, at(1_700_000_000));
    assert_eq!(get_connection(&db, c.id).unwrap(), c);
}

#[test]
fn test_create_connection_rejects_bad_input() {
    let (_dir, pool) = pool();
    let db = pool.get().unwrap();
    let mut bad = spec("docs");
    bad.scan_interval = Some(0);
    assert!(matches!(
        create_connection(&db, &bad, 1, Utc::now()),
        Err(ScanError::Validation { .. })
    ));
    let mut bad = spec("docs");
    bad.base_path = "//nas".into();
    assert!(matches!(
        create_connection(&db, &bad, 1, Utc::now()),
        Err(ScanError::InvalidPathSpec { .. })
    ));
    assert!(matches!(
        create_connection(&db, &spec(" "), 1, Utc::now()),
        Err(ScanError::Validation { .. })
    ));
}

#[test]
fn test_list_connections_newest_first_and_scoped() {
    let (_dir, pool) = pool();
    let db = pool.get().unwrap();
    create_connection(&db, &spec("old"), 1, at(1_000)).unwrap();
    create_connection(&db, &spec("new"), 1, at(2_000)).unwrap();
    create_connection(&db, &spec("other"), 2, at(3_000)).unwrap();
    let names: Vec<String> = list_connections(&db, 1)
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["new", "old"]);
}

#[test]
fn test_update_connection_keeps_unset_fields() {
    let (_dir, pool) = pool();
    let db = pool.get().unwrap();
    let mut s = spec("docs");
    s.password = Some("secret".into());
    s.scan_interval = Some(3600);
    s.auto_scan = Some(false);
    let c = create_connection(&db, &s, 1, at(1_000)).unwrap();

    let mut change = spec("renamed");
    change.base_path = "//nas/docs".into();
    let updated = update_connection(&db, c.id, 1, &change, at(2_000)).unwrap();
    assert_eq!(updated.name, "renamed");
    assert_eq!(updated.base_path, "//nas/docs");
    assert_eq!(updated.scan_interval, 3600);
    assert!(!updated.auto_scan);
    assert_eq!(updated.password.as_deref(), Some("secret"));
    assert_eq!(updated.updated_at, at(2_000));

    let err = update_connection(&db, c.id, 2, &change, at(3_000)).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_delete_connection_cascades_to_files() {
    let (_dir, pool) = pool();
    let mut db = pool.get().unwrap();
    let c = create_connection(&db, &spec("docs"), 1, Utc::now()).unwrap();
    let mut writer = IngestWriter::new(&mut db, c.id, 10);
    for i in 0..3 {
        writer.push(record(i)).unwrap();
    }
    writer.finish().unwrap();

    assert!(delete_connection(&db, c.id, 2).unwrap_err().is_not_found());
    delete_connection(&db, c.id, 1).unwrap();
    assert_eq!(count_files(&db).unwrap(), 0);
    assert!(get_connection(&db, c.id).unwrap_err().is_not_found());
    assert!(delete_connection(&db, c.id, 1).is_err());
}

#[test]
fn test_password_never_serialized() {
    let (_dir, pool) = pool();
    let db = pool.get().unwrap();
    let mut s = spec("docs");
    s.password = Some("hunter2".into());
    let c = create_connection(&db, &s, 1, Utc::now()).unwrap();
    let json = serde_json::to_string(&c).unwrap();
    assert!(!json.contains("hunter2"));
    assert!(json.contains("\"base_path\":\"/srv/docs\""));
}

// --- due selection ---

#[test]
fn test_due_connections_boundaries() {
    let (_dir, pool) = pool();
    let db = pool.get().unwrap();
    let now = at(1_700_000_000);
    let interval = 3600;
    let make = |name: &str, auto: bool| {
        let mut s = spec(name);
        s.scan_interval = Some(interval);
        s.auto_scan = Some(auto);
        create_connection(&db, &s, 1, at(0)).unwrap()
    };
    let never = make("never", true);
    let elapsed = make("elapsed", true);
    let exact = make("exact", true);
    let almost = make("almost", true);
    let recent = make("recent", true);
    let disabled = make("disabled", false);
    let disabled_never = make("disabled-never", false);

    mark_scanned(&db, elapsed.id, now - ChronoDuration::seconds(interval + 1)).unwrap();
    mark_scanned(&db, exact.id, now - ChronoDuration::seconds(interval)).unwrap();
    mark_scanned(&db, almost.id, now - ChronoDuration::seconds(interval - 1)).unwrap();
    mark_scanned(&db, recent.id, now - ChronoDuration::seconds(10)).unwrap();
    mark_scanned(&db, disabled.id, now - ChronoDuration::days(365)).unwrap();

    let due_at = |t: DateTime<Utc>| -> Vec<i64> {
        due_connections(&db, t)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect()
    };

    // last_scan + interval == now is not yet due; one second short is not due either.
    assert_eq!(due_at(now), vec![never.id, elapsed.id]);

    // One second later the exact boundary has passed, `almost` sits on it.
    assert_eq!(
        due_at(now + ChronoDuration::seconds(1)),
        vec![never.id, elapsed.id, exact.id]
    );
    assert_eq!(
        due_at(now + ChronoDuration::seconds(2)),
        vec![never.id, elapsed.id, exact.id, almost.id]
    );

    // auto_scan off is never due, however old or missing its last scan.
    let far = due_at(now + ChronoDuration::days(3650));
    assert!(far.contains(&recent.id));
    assert!(!far.contains(&disabled.id));
    assert!(!far.contains(&disabled_never.id));
}

#[test]
fn test_mark_scanned_missing_connection() {
    let (_dir, pool) = pool();
    let db = pool.get().unwrap();
    assert!(mark_scanned(&db, 99, Utc::now()).unwrap_err().is_not_found());
}

// --- search ---

#[test]
fn test_search_files_case_insensitive_substring() {
    let (_dir, pool) = pool();
    let mut db = pool.get().unwrap();
    let c = create_connection(&db, &spec("docs"), 1, Utc::now()).unwrap();
    let names = ["Annual_Report.pdf", "report-2024.PDF", "invoice.pdf", "100%_done.pdf"];
    let mut writer = IngestWriter::new(&mut db, c.id, 10);
    for (i, name) in names.iter().enumerate() {
        writer
            .push(FileRecord {
                path: format!("/srv/docs/{i}/{name}"),
                name: name.to_string(),
                size: 1,
                mod_time: at(0),
            })
            .unwrap();
    }
    writer.finish().unwrap();

    let hits: Vec<String> = search_files(&db, "REPORT", 10)
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(hits, vec!["Annual_Report.pdf", "report-2024.PDF"]);
    assert_eq!(search_files(&db, "report", 1).unwrap().len(), 1);
    assert_eq!(search_files(&db, "%", 10).unwrap().len(), 1);
    assert!(search_files(&db, "missing", 10).unwrap().is_empty());
}

// --- leases ---

#[test]
fn test_lease_blocks_second_holder_until_dropped() {
    let (_dir, pool) = pool();
    let id = {
        let db = pool.get().unwrap();
        create_connection(&db, &spec("docs"), 1, Utc::now()).unwrap().id
    };
    let ttl = Duration::from_secs(3600);
    let lease = ScanLease::acquire(&pool, id, "scheduler", ttl, Utc::now()).unwrap();
    assert_eq!(lease.connection_id(), id);

    let err = ScanLease::acquire(&pool, id, "cli", ttl, Utc::now()).unwrap_err();
    match &err {
        ScanError::ScanInProgress { holder, .. } => assert_eq!(holder, "scheduler"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.phase(), "lease");

    drop(lease);
    let again = ScanLease::acquire(&pool, id, "cli", ttl, Utc::now()).unwrap();
    again.release().unwrap();
}

#[test]
fn test_stale_lease_is_taken_over() {
    let (_dir, pool) = pool();
    let id = {
        let db = pool.get().unwrap();
        create_connection(&db, &spec("docs"), 1, Utc::now()).unwrap().id
    };
    let ttl = Duration::from_secs(60);
    let old = ScanLease::acquire(&pool, id, "crashed", ttl, at(1_000)).unwrap();
    let new = ScanLease::acquire(&pool, id, "scheduler", ttl, at(1_000 + 61)).unwrap();
    assert_eq!(new.holder(), "scheduler");

    // Releasing the stale guard must not remove the new holder's row.
    drop(old);
    let err = ScanLease::acquire(&pool, id, "cli", ttl, at(1_000 + 62)).unwrap_err();
    assert!(matches!(err, ScanError::ScanInProgress { .. }));
}
