//! Spooling undelivered batches and replaying them with a sweep

mod common;

use common::*;
use fs2::FileExt;
use std::fs::{self, File};
use usenet_rnews::{BatchContext, EntryOutcome, Ingester, PeerId, Undelivered};

fn ctx(peer: &str) -> BatchContext {
    BatchContext::new(PeerId::from(peer), "test")
}

const REPLIES: [&str; 5] = ["335 ok", "235 ok", "435 dup", "335 ok", "437 no"];

#[test]
fn test_replay_matches_direct_delivery() {
    let dir = tempfile::tempdir().unwrap();
    let ingester = Ingester::new(test_config(dir.path()));
    let batch = rnews_batch(&[article("r1"), article("r2"), article("r3")]);

    let mut direct_peer = scripted_peer(&REPLIES);
    let direct = ingester.process(&ctx("uunet"), &input_file(&batch), &mut direct_peer);
    let direct_wire = sent_to_peer(direct_peer);

    let mut busy = scripted_peer(&["436 busy"]);
    let (_, undelivered) = ingester
        .ingest(&ctx("uunet"), &input_file(&batch), &mut busy, true)
        .unwrap();
    let Undelivered::Spooled(entry) = undelivered else {
        panic!("expected the batch to be spooled");
    };

    let mut replay_peer = scripted_peer(&REPLIES);
    let replayed = ingester.process(
        &ctx("uunet"),
        &File::open(&entry.path).unwrap(),
        &mut replay_peer,
    );
    assert_eq!(replayed.outcomes, direct.outcomes);
    assert_eq!(sent_to_peer(replay_peer), direct_wire);

    let mut sweep_peer = scripted_peer(&REPLIES);
    let report = ingester.sweep(&mut sweep_peer, false).unwrap();
    assert_eq!(report.delivered(), 1);
    assert!(!entry.path.exists(), "delivered entries are deleted");
    assert_eq!(sent_to_peer(sweep_peer), direct_wire);
}

#[test]
fn test_sweep_quarantines_corrupt_entry_and_continues() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let incoming = config.spool.incoming_dir.clone();
    let ingester = Ingester::new(config);

    fs::write(incoming.join("aaaaBADBAD"), b"#! rnews 0\n").unwrap();
    fs::write(incoming.join("bbbbGOOD01"), rnews_batch(&[article("ok")])).unwrap();

    let mut peer = scripted_peer(&["335 ok", "235 ok"]);
    let report = ingester.sweep(&mut peer, false).unwrap();

    assert!(!report.stopped_early);
    assert_eq!(report.delivered(), 1);
    assert_eq!(report.quarantined(), 1);
    let quarantined = report
        .entries
        .iter()
        .find_map(|entry| match &entry.outcome {
            EntryOutcome::Quarantined(dest) => Some(dest.clone()),
            _ => None,
        })
        .unwrap();
    assert!(quarantined.starts_with(ingester.store().bad_news_dir()));
    assert_eq!(fs::read(&quarantined).unwrap(), b"#! rnews 0\n");
    assert!(!incoming.join("aaaaBADBAD").exists());
    assert!(!incoming.join("bbbbGOOD01").exists());
}

#[test]
fn test_sweep_stops_when_peer_is_busy() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let incoming = config.spool.incoming_dir.clone();
    let ingester = Ingester::new(config);

    fs::write(incoming.join("peer1AAAAAA"), rnews_batch(&[article("x1")])).unwrap();
    fs::write(incoming.join("peer2BBBBBB"), rnews_batch(&[article("x2")])).unwrap();

    let mut peer = scripted_peer(&["436 busy"]);
    let report = ingester.sweep(&mut peer, false).unwrap();

    assert!(report.stopped_early);
    assert_eq!(report.entries.len(), 1);
    assert!(matches!(report.entries[0].outcome, EntryOutcome::Quarantined(_)));
    assert!(incoming.join("peer2BBBBBB").exists(), "later entries wait for the next sweep");
    assert_eq!(offers(&sent_to_peer(peer)).len(), 1);
}

#[test]
fn test_locked_entry_is_left_alone() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let path = config.spool.incoming_dir.join("peerLOCKED");
    fs::write(&path, rnews_batch(&[article("l1")])).unwrap();
    let ingester = Ingester::new(config);

    let holder = File::open(&path).unwrap();
    FileExt::try_lock_exclusive(&holder).unwrap();

    let mut peer = scripted_peer(&[]);
    let report = ingester.sweep(&mut peer, false).unwrap();

    assert_eq!(report.entries[0].outcome, EntryOutcome::Locked);
    assert!(path.exists());
    assert!(sent_to_peer(peer).is_empty());
}

#[test]
fn test_spooled_name_carries_peer_and_skips_temp_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let incoming = config.spool.incoming_dir.clone();
    let ingester = Ingester::new(config);

    fs::write(incoming.join(".uunetTMPTMP"), b"half written").unwrap();
    let entry = ingester
        .spool_all(&ctx("uunet"), &input_file(b"#! rnews 1\nx"))
        .unwrap();

    let name = entry.path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("uunet"));
    assert_eq!(ingester.store().pending().unwrap(), vec![entry.path.clone()]);
}
