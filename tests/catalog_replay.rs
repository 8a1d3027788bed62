mod common;

use std::fs;

use pretty_assertions::assert_eq;

use audiofs::catalog::model::ImportMode;
use audiofs::import::outcome::MatchKind;
use audiofs::utils::reporting::Reporter;
use audiofs::{CatalogError, Stage};
use common::FakeAudio;

#[test]
fn batch_replay_reports_the_missing_file_and_continues() {
    let dir = tempfile::tempdir().unwrap();
    let engine = common::engine(dir.path());

    let mut tickets = Vec::new();
    let mut paths = Vec::new();
    for i in 0..5u32 {
        let path = dir.path().join(format!("track{}.flac", i));
        if i != 2 {
            let audio = FakeAudio::new("flac", common::samples(100 + i, 800), Some(common::fingerprint(100 + i, 64)));
            common::write_fixture(dir.path(), &format!("track{}.flac", i), &audio);
        }
        tickets.push(engine.add_to_catalog(&path).unwrap());
        paths.push(path);
    }
    assert_eq!(engine.queue().pending_count().unwrap(), 5);
    assert_eq!(engine.store().identity_count().unwrap(), 0);

    let batch = engine.import_catalog(true, true).unwrap();
    assert_eq!(batch.total(), 5);
    assert_eq!(batch.committed().count(), 4);

    let failures: Vec<_> = batch.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0.id, tickets[2]);
    assert_eq!(failures[0].1.stage, Stage::Started);
    assert!(matches!(
        batch.ensure_complete(),
        Err(CatalogError::BatchPartialFailure { failed: 1, total: 5 })
    ));

    let pending: Vec<_> = engine.queue().pending_tickets().map(|t| t.unwrap().id).collect();
    assert_eq!(pending, vec![tickets[2]]);
    assert_eq!(engine.store().identity_count().unwrap(), 4);
    for identity in engine.store().snapshot().unwrap() {
        assert_eq!(identity.references[0].import_mode, ImportMode::CatalogOnly);
    }

    // Once the file shows up, a second replay picks up only that ticket.
    common::write_fixture(
        dir.path(),
        "track2.flac",
        &FakeAudio::new("flac", common::samples(102, 800), None),
    );
    let batch = engine.import_catalog(true, true).unwrap();
    assert_eq!(batch.total(), 1);
    assert!(batch.ensure_complete().is_ok());
    assert_eq!(engine.queue().pending_count().unwrap(), 0);
    assert_eq!(engine.store().identity_count().unwrap(), 5);
}

#[test]
fn replayed_duplicates_attach_and_resolve_their_tickets() {
    let dir = tempfile::tempdir().unwrap();
    let engine = common::engine(dir.path());
    let audio = FakeAudio::new("flac", common::samples(7, 600), None);
    let a = common::write_fixture(dir.path(), "a.flac", &audio);
    let b = common::write_fixture(dir.path(), "b.flac", &audio);

    engine.add_to_catalog(&a).unwrap();
    engine.add_to_catalog(&b).unwrap();
    let batch = engine.import_catalog(false, false).unwrap();
    assert!(batch.ensure_complete().is_ok());

    let snapshot = engine.store().snapshot().unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].references.len(), 2);
    assert!(!a.exists());
    assert!(!b.exists());
    assert_eq!(engine.queue().pending_count().unwrap(), 0);
}

#[test]
fn empty_catalog_replays_to_an_empty_batch() {
    let engine = common::engine_in_memory();
    let batch = engine.import_catalog(true, true).unwrap();
    assert_eq!(batch.total(), 0);
    assert!(batch.ensure_complete().is_ok());
}

#[test]
fn tickets_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = common::write_fixture(dir.path(), "a.wav", &FakeAudio::new("wav", common::samples(3, 300), None));
    {
        let engine = common::engine(dir.path());
        engine.add_to_catalog(&path).unwrap();
    }

    let engine = common::engine(dir.path());
    assert_eq!(engine.queue().pending_count().unwrap(), 1);
    let batch = engine.import_catalog(true, true).unwrap();
    assert_eq!(batch.committed().count(), 1);
}

#[test]
fn batch_report_has_one_row_per_ticket() {
    let dir = tempfile::tempdir().unwrap();
    let engine = common::engine(dir.path());
    let ok = common::write_fixture(dir.path(), "ok.flac", &FakeAudio::new("flac", common::samples(1, 300), None));
    engine.add_to_catalog(&ok).unwrap();
    engine.add_to_catalog(dir.path().join("missing.flac")).unwrap();

    let batch = engine.import_catalog(true, true).unwrap();
    let report = dir.path().join("report.csv");
    Reporter::new().generate_batch_report(&batch, &report).unwrap();

    let text = fs::read_to_string(&report).unwrap();
    let rows: Vec<_> = text.lines().collect();
    assert_eq!(rows.len(), 3);
    assert!(rows[1].contains(",committed,committed,#1,inserted (new),"));
    assert!(rows[2].contains(",failed,started,"));
}

#[test]
fn exists_is_read_only() {
    let dir = tempfile::tempdir().unwrap();
    let engine = common::engine(dir.path());
    let print = common::fingerprint(50, 100);
    let stored = common::write_fixture(
        dir.path(),
        "stored.flac",
        &FakeAudio::new("flac", common::samples(50, 1_000), Some(print.clone())),
    );
    engine.import(&stored, true, true).unwrap();
    let before = engine.store().snapshot().unwrap();

    let same = common::write_fixture(dir.path(), "same.mp3", &FakeAudio::new("mp3", common::samples(50, 1_000), None));
    let similar = common::write_fixture(
        dir.path(),
        "similar.mp3",
        &FakeAudio::new("mp3", common::samples(51, 1_000), Some(print)),
    );
    let unknown = common::write_fixture(
        dir.path(),
        "unknown.wav",
        &FakeAudio::new("wav", common::samples(52, 1_000), Some(common::fingerprint(52, 100))),
    );

    assert_eq!(engine.exists(&same, false).unwrap().match_kind(), Some(MatchKind::Exact));
    assert_eq!(
        engine.exists(&similar, true).unwrap().match_kind(),
        Some(MatchKind::Perceptual { similarity: 1.0 })
    );
    assert!(!engine.exists(&similar, false).unwrap().exists());
    assert!(!engine.exists(&unknown, true).unwrap().exists());

    let missing = engine.exists(dir.path().join("missing.flac"), true).unwrap_err();
    assert_eq!(missing.stage, Stage::Started);

    assert_eq!(engine.store().snapshot().unwrap(), before);
    assert_eq!(engine.queue().pending_count().unwrap(), 0);
}
