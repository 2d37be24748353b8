//! Integration tests for the SQLite store: entry lifecycle, lease CAS,
//! transcript locking, search, links, and settings.

use chrono::{Duration, NaiveDate, Utc};
use murmur_db::{
    Database, EntryKind, LinkType, NewEntry, SearchRequest, SettingsPatch, Stage, StageClass,
};

fn new_entry(kind: EntryKind) -> NewEntry {
    NewEntry {
        id: murmur_db::new_entry_id(),
        entry_type: kind,
        timezone: "UTC".to_string(),
        entry_date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
    }
}

#[tokio::test]
async fn test_create_and_get_round_trip() {
    let db = Database::open_in_memory().await.unwrap();
    let created = db.entries.create(new_entry(EntryKind::BrainDump)).await.unwrap();

    assert_eq!(created.stage, Stage::Pending);
    assert_eq!(created.entry_type, EntryKind::BrainDump);
    assert!(created.raw_transcript.is_none());
    assert!(created.locked_by.is_none());

    let fetched = db.entries.get(&created.id).await.unwrap();
    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.entry_date, created.entry_date);
    assert_eq!(fetched.timezone, "UTC");
}

#[tokio::test]
async fn test_get_unknown_id_is_not_found() {
    let db = Database::open_in_memory().await.unwrap();
    let err = db.entries.get("nosuchentry00").await.unwrap_err();
    assert!(matches!(err, murmur_db::Error::EntryNotFound(_)));
}

#[tokio::test]
async fn test_list_paginates_with_total() {
    let db = Database::open_in_memory().await.unwrap();
    for _ in 0..5 {
        db.entries.create(new_entry(EntryKind::QuickNote)).await.unwrap();
    }

    let (page, total) = db.entries.list(2, 0).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(total, 5);

    let (rest, _) = db.entries.list(10, 4).await.unwrap();
    assert_eq!(rest.len(), 1);
}

#[tokio::test]
async fn test_next_runnable_is_fifo_over_queued() {
    let db = Database::open_in_memory().await.unwrap();
    let first = db.entries.create(new_entry(EntryKind::QuickNote)).await.unwrap();
    let second = db.entries.create(new_entry(EntryKind::QuickNote)).await.unwrap();

    // Nothing runnable while both are pending.
    assert!(db.entries.next_runnable().await.unwrap().is_none());

    db.entries.set_stage(&second.id, Stage::Queued, None).await.unwrap();
    db.entries.set_stage(&first.id, Stage::Queued, None).await.unwrap();

    // Oldest created_at wins even though it was queued later.
    let picked = db.entries.next_runnable().await.unwrap().unwrap();
    assert_eq!(picked.id, first.id);
}

#[tokio::test]
async fn test_lease_cas_excludes_second_worker() {
    let db = Database::open_in_memory().await.unwrap();
    let entry = db.entries.create(new_entry(EntryKind::QuickNote)).await.unwrap();
    db.entries.set_stage(&entry.id, Stage::Queued, None).await.unwrap();

    assert!(db
        .entries
        .acquire_lease(&entry.id, "worker-a", Stage::Queued)
        .await
        .unwrap());
    // Second worker must be refused while the lease is held.
    assert!(!db
        .entries
        .acquire_lease(&entry.id, "worker-b", Stage::Queued)
        .await
        .unwrap());
    // Self re-acquire is allowed.
    assert!(db
        .entries
        .acquire_lease(&entry.id, "worker-a", Stage::Queued)
        .await
        .unwrap());

    db.entries.release_lease(&entry.id).await.unwrap();
    assert!(db
        .entries
        .acquire_lease(&entry.id, "worker-b", Stage::Queued)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_lease_cas_checks_stage() {
    let db = Database::open_in_memory().await.unwrap();
    let entry = db.entries.create(new_entry(EntryKind::QuickNote)).await.unwrap();
    db.entries.set_stage(&entry.id, Stage::Queued, None).await.unwrap();

    // The stage moved between observation and acquisition.
    assert!(!db
        .entries
        .acquire_lease(&entry.id, "worker-a", Stage::Writing)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_leased_entry_is_not_runnable() {
    let db = Database::open_in_memory().await.unwrap();
    let entry = db.entries.create(new_entry(EntryKind::QuickNote)).await.unwrap();
    db.entries.set_stage(&entry.id, Stage::Queued, None).await.unwrap();
    db.entries
        .acquire_lease(&entry.id, "worker-a", Stage::Queued)
        .await
        .unwrap();

    assert!(db.entries.next_runnable().await.unwrap().is_none());
}

#[tokio::test]
async fn test_raw_transcript_locks_on_first_write() {
    let db = Database::open_in_memory().await.unwrap();
    let entry = db.entries.create(new_entry(EntryKind::BrainDump)).await.unwrap();

    assert!(db
        .entries
        .set_raw_transcript(&entry.id, "first words")
        .await
        .unwrap());

    // A re-run of the stage must not overwrite the locked value.
    assert!(!db
        .entries
        .set_raw_transcript(&entry.id, "second words")
        .await
        .unwrap());

    let fetched = db.entries.get(&entry.id).await.unwrap();
    assert_eq!(fetched.raw_transcript.as_deref(), Some("first words"));
    assert!(fetched.raw_transcript_locked_at.is_some());
}

#[tokio::test]
async fn test_stale_running_and_reset() {
    let db = Database::open_in_memory().await.unwrap();
    let entry = db.entries.create(new_entry(EntryKind::BrainDump)).await.unwrap();
    db.entries.set_stage(&entry.id, Stage::Queued, None).await.unwrap();
    db.entries
        .acquire_lease(&entry.id, "worker-a", Stage::Queued)
        .await
        .unwrap();
    db.entries
        .set_stage(&entry.id, Stage::Transcribing, Some("Transcribing"))
        .await
        .unwrap();

    // Fresh heartbeat: not stale.
    let stale = db.entries.stale_running(Duration::minutes(5)).await.unwrap();
    assert!(stale.is_empty());

    // Zero threshold: everything with a heartbeat is stale.
    let stale = db.entries.stale_running(Duration::seconds(-1)).await.unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, entry.id);

    db.entries
        .reset_to_queued(&entry.id, "Reset to queue after stale heartbeat")
        .await
        .unwrap();
    let fetched = db.entries.get(&entry.id).await.unwrap();
    assert_eq!(fetched.stage, Stage::Queued);
    assert!(fetched.locked_by.is_none());
    assert!(fetched.heartbeat_at.is_none());
    assert!(fetched
        .stage_message
        .as_deref()
        .unwrap()
        .contains("Reset"));
}

#[tokio::test]
async fn test_cancel_only_from_cancellable_stages() {
    let db = Database::open_in_memory().await.unwrap();
    let entry = db.entries.create(new_entry(EntryKind::QuickNote)).await.unwrap();

    // pending is not cancellable
    assert!(!db.entries.request_cancel(&entry.id).await.unwrap());

    db.entries.set_stage(&entry.id, Stage::Transcribing, None).await.unwrap();
    assert!(db.entries.request_cancel(&entry.id).await.unwrap());

    let fetched = db.entries.get(&entry.id).await.unwrap();
    assert_eq!(fetched.stage, Stage::CancelRequested);

    // Once requested, a second request is refused (already out of the set).
    assert!(!db.entries.request_cancel(&entry.id).await.unwrap());

    db.entries.finalize_cancel(&entry.id).await.unwrap();
    let fetched = db.entries.get(&entry.id).await.unwrap();
    assert_eq!(fetched.stage, Stage::Cancelled);
    assert!(fetched.locked_by.is_none());
    assert!(fetched.normalized_audio_path.is_none());
}

#[tokio::test]
async fn test_fail_records_diagnostic_and_clears_lease() {
    let db = Database::open_in_memory().await.unwrap();
    let entry = db.entries.create(new_entry(EntryKind::BrainDump)).await.unwrap();
    db.entries.set_stage(&entry.id, Stage::Queued, None).await.unwrap();
    db.entries
        .acquire_lease(&entry.id, "worker-a", Stage::Queued)
        .await
        .unwrap();

    db.entries
        .fail(&entry.id, "ffmpeg exited with 1: invalid data")
        .await
        .unwrap();

    let fetched = db.entries.get(&entry.id).await.unwrap();
    assert_eq!(fetched.stage, Stage::Failed);
    assert!(fetched.error_message.as_deref().unwrap().contains("ffmpeg"));
    assert!(fetched.locked_by.is_none());
}

#[tokio::test]
async fn test_search_prefix_and_terms() {
    let db = Database::open_in_memory().await.unwrap();
    let a = db.entries.create(new_entry(EntryKind::BrainDump)).await.unwrap();
    let b = db.entries.create(new_entry(EntryKind::QuickNote)).await.unwrap();

    db.entries
        .set_raw_transcript(&a.id, "grateful for coffee this morning")
        .await
        .unwrap();
    db.entries
        .set_raw_transcript(&b.id, "meeting notes about the roadmap")
        .await
        .unwrap();

    let result = db
        .search
        .search(&SearchRequest {
            query: Some("grat cof".to_string()),
            limit: 20,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(result.total, 1);
    assert_eq!(result.entries[0].id, a.id);
    assert!(!result.has_more);

    // Both tokens must match: a term found in different entries only is no hit.
    let result = db
        .search
        .search(&SearchRequest {
            query: Some("grateful roadmap".to_string()),
            limit: 20,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(result.total, 0);
}

#[tokio::test]
async fn test_search_sees_edited_transcript_and_sections() {
    let db = Database::open_in_memory().await.unwrap();
    let entry = db.entries.create(new_entry(EntryKind::BrainDump)).await.unwrap();
    db.entries.set_raw_transcript(&entry.id, "original").await.unwrap();
    db.entries
        .set_edited_transcript(&entry.id, "polished phrasing")
        .await
        .unwrap();

    let mut sections = std::collections::HashMap::new();
    sections.insert("SUMMARY".to_string(), "shipped the quarterly report".to_string());
    db.entries
        .set_generated_sections(&entry.id, &sections)
        .await
        .unwrap();

    for term in ["polished", "quarterly", "original"] {
        let result = db
            .search
            .search(&SearchRequest {
                query: Some(term.to_string()),
                limit: 20,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(result.total, 1, "term {term} should match");
    }
}

#[tokio::test]
async fn test_search_filters() {
    let db = Database::open_in_memory().await.unwrap();
    let dump = db.entries.create(new_entry(EntryKind::BrainDump)).await.unwrap();
    let quick = db.entries.create(new_entry(EntryKind::QuickNote)).await.unwrap();
    db.entries.set_raw_transcript(&dump.id, "walking the dog").await.unwrap();
    db.entries.set_raw_transcript(&quick.id, "walking to work").await.unwrap();
    db.entries.set_stage(&quick.id, Stage::Completed, None).await.unwrap();

    // Kind filter
    let result = db
        .search
        .search(&SearchRequest {
            query: Some("walking".to_string()),
            entry_type: Some(EntryKind::QuickNote),
            limit: 20,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(result.total, 1);
    assert_eq!(result.entries[0].id, quick.id);

    // Stage-class filter: active excludes the completed entry.
    let result = db
        .search
        .search(&SearchRequest {
            query: Some("walking".to_string()),
            status: Some(StageClass::Active),
            limit: 20,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(result.total, 1);
    assert_eq!(result.entries[0].id, dump.id);

    // Date range filter excluding everything.
    let result = db
        .search
        .search(&SearchRequest {
            date_to: Some(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()),
            limit: 20,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(result.total, 0);
}

#[tokio::test]
async fn test_search_without_term_lists_filtered() {
    let db = Database::open_in_memory().await.unwrap();
    for _ in 0..3 {
        db.entries.create(new_entry(EntryKind::QuickNote)).await.unwrap();
    }

    let result = db
        .search
        .search(&SearchRequest {
            limit: 2,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(result.total, 3);
    assert_eq!(result.entries.len(), 2);
    assert!(result.has_more);
}

#[tokio::test]
async fn test_links_round_trip() {
    let db = Database::open_in_memory().await.unwrap();
    let a = db.entries.create(new_entry(EntryKind::QuickNote)).await.unwrap();
    let b = db.entries.create(new_entry(EntryKind::QuickNote)).await.unwrap();

    db.links.add(&a.id, &b.id, LinkType::Followup).await.unwrap();
    // Duplicate insert is a no-op.
    db.links.add(&a.id, &b.id, LinkType::Followup).await.unwrap();

    let from_a = db.links.list_for_entry(&a.id).await.unwrap();
    assert_eq!(from_a.len(), 1);
    assert_eq!(from_a[0].target_id, b.id);
    assert_eq!(from_a[0].link_type, LinkType::Followup);

    // Two-sided listing: b sees the inbound edge.
    let from_b = db.links.list_for_entry(&b.id).await.unwrap();
    assert_eq!(from_b.len(), 1);

    db.links.remove(&a.id, &b.id, LinkType::Followup).await.unwrap();
    assert!(db.links.list_for_entry(&a.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_link_rejects_self_and_unknown() {
    let db = Database::open_in_memory().await.unwrap();
    let a = db.entries.create(new_entry(EntryKind::QuickNote)).await.unwrap();

    assert!(db.links.add(&a.id, &a.id, LinkType::Related).await.is_err());
    assert!(db
        .links
        .add(&a.id, "missingentry0", LinkType::Related)
        .await
        .is_err());
}

#[tokio::test]
async fn test_settings_seed_and_patch() {
    let db = Database::open_in_memory().await.unwrap();
    let settings = db.settings.get().await.unwrap();
    assert_eq!(settings.chunk_duration_secs, 60);
    assert!(settings.keep_audio);

    let patch: SettingsPatch = serde_json::from_str(
        r#"{"vaultPath":"/vault","keepAudio":false,"chunkDurationSecs":90}"#,
    )
    .unwrap();
    let updated = patch.apply(settings).unwrap();
    db.settings.update(&updated).await.unwrap();

    let reloaded = db.settings.get().await.unwrap();
    assert_eq!(reloaded.vault_path, "/vault");
    assert!(!reloaded.keep_audio);
    assert_eq!(reloaded.chunk_duration_secs, 90);
}

#[tokio::test]
async fn test_delete_removes_entry_and_index_row() {
    let db = Database::open_in_memory().await.unwrap();
    let entry = db.entries.create(new_entry(EntryKind::QuickNote)).await.unwrap();
    db.entries.set_raw_transcript(&entry.id, "ephemeral words").await.unwrap();

    db.entries.delete(&entry.id).await.unwrap();
    assert!(db.entries.try_get(&entry.id).await.unwrap().is_none());

    let result = db
        .search
        .search(&SearchRequest {
            query: Some("ephemeral".to_string()),
            limit: 20,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(result.total, 0);
}

#[tokio::test]
async fn test_note_output_and_duration() {
    let db = Database::open_in_memory().await.unwrap();
    let entry = db.entries.create(new_entry(EntryKind::QuickNote)).await.unwrap();

    db.entries.set_duration(&entry.id, 12.5).await.unwrap();
    let mtime = Utc::now();
    db.entries
        .set_note_output(&entry.id, "journal/2026-03-14-101500-quick-note.md", mtime)
        .await
        .unwrap();

    let fetched = db.entries.get(&entry.id).await.unwrap();
    assert_eq!(fetched.audio_duration_secs, Some(12.5));
    assert_eq!(
        fetched.note_path.as_deref(),
        Some("journal/2026-03-14-101500-quick-note.md")
    );
    assert_eq!(fetched.note_mtime.unwrap().timestamp(), mtime.timestamp());
}
