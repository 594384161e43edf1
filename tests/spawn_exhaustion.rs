//! Helpers that cannot be started degrade delivery to spooling
//!
//! An unpack program held open for writing fails to exec with ETXTBSY, a
//! transient error, for as long as the handle stays open. This runs in its own
//! test binary so no other test execs while the handle is held.

mod common;

use common::*;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::process::Command;
use usenet_rnews::{
    AbortCause, BatchContext, DecodeError, Disposition, EntryOutcome, Ingester, PeerId,
    SpawnError, Undelivered,
};

/// Whether exec of `program` currently fails with "text file busy"
fn exec_is_busy(program: &Path) -> bool {
    match Command::new(program).spawn() {
        Ok(mut child) => {
            let _ = child.kill();
            let _ = child.wait();
            false
        }
        Err(e) => e.raw_os_error() == Some(26),
    }
}

#[test]
fn test_spawn_exhaustion_spools_then_defers_on_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    install_program(&mut config, "unbusy", "#!/bin/sh\nexec cat\n");
    let program = config.helpers.programs_dir.join("unbusy");
    let incoming = config.spool.incoming_dir.clone();

    let _writer = OpenOptions::new().append(true).open(&program).unwrap();
    if !exec_is_busy(&program) {
        println!("Skipping test: kernel allows exec of a file open for writing");
        return;
    }

    let mut batch = b"#! unbusy\n".to_vec();
    batch.extend_from_slice(&rnews_batch(&[article("e1"), article("e2")]));
    let ingester = Ingester::new(config);
    let ctx = BatchContext::new(PeerId::from("uunet"), "test");

    let mut peer = scripted_peer(&[]);
    let (report, undelivered) = ingester
        .ingest(&ctx, &input_file(&batch), &mut peer, true)
        .unwrap();

    let Disposition::Aborted {
        cause: AbortCause::Decode(cause),
        resume_offset: 0,
    } = &report.disposition
    else {
        panic!("expected a decode abort at offset 0, got {:?}", report.disposition);
    };
    assert!(cause.is_spawn_exhausted());
    assert!(matches!(
        cause,
        DecodeError::Spawn(SpawnError::Exhausted { attempts: 5, .. })
    ));
    assert_eq!(report.children_spawned, 0);
    assert!(sent_to_peer(peer).is_empty());
    let Undelivered::Spooled(entry) = undelivered else {
        panic!("expected the batch to be spooled");
    };
    assert_eq!(fs::read(&entry.path).unwrap(), batch);

    let mut sweep_peer = scripted_peer(&[]);
    let sweep = ingester.sweep(&mut sweep_peer, false).unwrap();

    assert!(sweep.stopped_early);
    assert_eq!(sweep.entries.len(), 1);
    assert_eq!(sweep.entries[0].outcome, EntryOutcome::Deferred);
    assert!(entry.path.exists(), "deferred entries stay in the spool");
    assert_eq!(sweep.quarantined(), 0);
    assert!(incoming.join(entry.path.file_name().unwrap()).exists());
    assert!(sent_to_peer(sweep_peer).is_empty());
}
