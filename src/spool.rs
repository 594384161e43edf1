//! Recovery store
//!
//! Undelivered input is copied verbatim into the incoming directory and
//! replayed later by a sweep. Spool files are named `<peer-id><suffix>` where
//! the suffix is [`SUFFIX_LEN`] random alphanumerics. They are written under a
//! dotted temporary name and renamed into place without clobbering, so a
//! sweep never sees a half-written batch.
//!
//! A sweep holds an advisory exclusive lock on a second handle for the whole
//! time it works on an entry, so concurrent sweeps never replay the same file.

use crate::config::SpoolConfig;
use crate::error::SpoolError;
use crate::types::{BatchContext, PeerId};
use fs2::FileExt;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::fs::{self, File, Permissions};
use std::io::{self, ErrorKind, Write};
use std::os::unix::fs::{FileExt as _, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Length of the random tail of a spool file name
pub const SUFFIX_LEN: usize = 6;

/// Rename attempts before giving up on finding a free spool name
const MAX_NAME_ATTEMPTS: usize = 16;

/// Copy chunk size
const COPY_CHUNK: usize = 64 * 1024;

/// A batch persisted for later delivery
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpoolEntry {
    /// Final location in the incoming directory
    pub path: PathBuf,
    /// Origin recorded in the file name
    pub peer: PeerId,
    /// Number of bytes spooled
    pub bytes: u64,
}

/// What the replay of one spool entry asks the sweep to do with it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayVerdict {
    /// Everything was handled; delete the file
    Delivered,
    /// The entry cannot be replayed; move it aside and go on
    Quarantine,
    /// The entry failed because of the peer; move it aside and stop sweeping
    QuarantineAndStop,
    /// Helpers could not be started; keep the file and stop sweeping
    Defer,
}

/// Final disposition of one spool entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Replayed and deleted
    Delivered,
    /// Moved into the quarantine directory
    Quarantined(PathBuf),
    /// Should have been quarantined but could not be moved
    QuarantineFailed,
    /// Another process holds the lock; left alone
    Locked,
    /// Kept in place for a later sweep
    Deferred,
}

/// One processed spool entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepEntry {
    /// The spool file
    pub path: PathBuf,
    /// What happened to it
    pub outcome: EntryOutcome,
}

/// Per-entry results of a sweep
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries in the order they were visited
    pub entries: Vec<SweepEntry>,
    /// Whether the sweep ended before visiting every entry
    pub stopped_early: bool,
}

impl SweepReport {
    /// Number of entries with the given outcome kind
    pub fn count(&self, matches: impl Fn(&EntryOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| matches(&e.outcome)).count()
    }

    /// Number of entries delivered and deleted
    pub fn delivered(&self) -> usize {
        self.count(|o| *o == EntryOutcome::Delivered)
    }

    /// Number of entries moved to quarantine
    pub fn quarantined(&self) -> usize {
        self.count(|o| matches!(o, EntryOutcome::Quarantined(_)))
    }
}

/// Spool and replay of undelivered batches
#[derive(Clone, Debug)]
pub struct RecoveryStore {
    incoming_dir: PathBuf,
    bad_news_dir: PathBuf,
    file_mode: u32,
}

impl RecoveryStore {
    /// Create a store over the configured directories
    pub fn new(config: &SpoolConfig) -> Self {
        Self {
            incoming_dir: config.incoming_dir.clone(),
            bad_news_dir: config.bad_news_path(),
            file_mode: config.file_mode,
        }
    }

    /// Directory holding spooled batches
    pub fn incoming_dir(&self) -> &Path {
        &self.incoming_dir
    }

    /// Directory holding quarantined batches and rejected articles
    pub fn bad_news_dir(&self) -> &Path {
        &self.bad_news_dir
    }

    /// Persist everything in `input` from `offset` on
    ///
    /// The bytes are copied with positioned reads, so the read position of
    /// `input` (possibly shared with a helper) does not matter.
    pub fn spool_remainder(
        &self,
        ctx: &BatchContext,
        input: &File,
        offset: u64,
    ) -> Result<SpoolEntry, SpoolError> {
        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{}", ctx.peer))
            .rand_bytes(SUFFIX_LEN)
            .tempfile_in(&self.incoming_dir)
            .map_err(|source| SpoolError::CreateTemp {
                dir: self.incoming_dir.clone(),
                source,
            })?;

        let source = input.try_clone().map_err(|source| SpoolError::Write { offset, source })?;
        let bytes = copy_from(&source, offset, temp.as_file_mut())?;
        temp.as_file()
            .sync_all()
            .map_err(|source| SpoolError::Write {
                offset: offset + bytes,
                source,
            })?;
        fs::set_permissions(temp.path(), Permissions::from_mode(self.file_mode)).map_err(
            |source| SpoolError::Permissions {
                path: temp.path().to_path_buf(),
                source,
            },
        )?;

        let path = self.persist(temp, &ctx.peer)?;
        info!(peer = %ctx.peer, path = %path.display(), offset, bytes, "spooled");
        Ok(SpoolEntry {
            path,
            peer: ctx.peer.clone(),
            bytes,
        })
    }

    fn persist(
        &self,
        mut temp: tempfile::NamedTempFile,
        peer: &PeerId,
    ) -> Result<PathBuf, SpoolError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let dest = self.incoming_dir.join(format!("{peer}{}", random_suffix()));
            match temp.persist_noclobber(&dest) {
                Ok(_) => return Ok(dest),
                Err(e)
                    if e.error.kind() == ErrorKind::AlreadyExists
                        && attempt < MAX_NAME_ATTEMPTS =>
                {
                    debug!(path = %dest.display(), "spool name taken, retrying");
                    temp = e.file;
                }
                Err(e) => {
                    return Err(SpoolError::Rename {
                        from: e.file.path().to_path_buf(),
                        to: dest,
                        source: e.error,
                    });
                }
            }
        }
    }

    /// Keep a copy of a rejected article in the bad-news directory
    pub fn save_rejected(&self, ctx: &BatchContext, article: &[u8]) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.bad_news_dir)?;
        let mut temp = tempfile::Builder::new()
            .prefix(ctx.peer.as_str())
            .rand_bytes(SUFFIX_LEN)
            .tempfile_in(&self.bad_news_dir)?;
        temp.write_all(article)?;
        fs::set_permissions(temp.path(), Permissions::from_mode(self.file_mode))?;
        let (_, path) = temp.keep()?;
        Ok(path)
    }

    /// Spool files waiting for replay, sorted by name
    ///
    /// Dotfiles (in-progress spools) and anything that is not a regular file
    /// are skipped.
    pub fn pending(&self) -> Result<Vec<PathBuf>, SpoolError> {
        let read_dir = fs::read_dir(&self.incoming_dir).map_err(|source| SpoolError::ReadDir {
            dir: self.incoming_dir.clone(),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|source| SpoolError::ReadDir {
                dir: self.incoming_dir.clone(),
                source,
            })?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let path = entry.path();
            if path == self.bad_news_dir || !path.is_file() {
                continue;
            }
            paths.push(path);
        }
        paths.sort();
        Ok(paths)
    }

    /// Replay every pending spool file through `replay`
    ///
    /// `replay` gets the batch context derived from the file name and a
    /// handle to read the batch from. The entry stays locked until its
    /// terminal action (delete, quarantine, keep) is done.
    pub fn sweep<F>(&self, mut replay: F) -> Result<SweepReport, SpoolError>
    where
        F: FnMut(&BatchContext, File) -> ReplayVerdict,
    {
        let mut report = SweepReport::default();
        for path in self.pending()? {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };

            let (input, lock) = match (File::open(&path), File::open(&path)) {
                (Ok(input), Ok(lock)) => (input, lock),
                (Err(e), _) | (_, Err(e)) => {
                    if e.kind() != ErrorKind::NotFound {
                        warn!(path = %path.display(), error = %e, "cannot open spool file");
                    }
                    continue;
                }
            };
            if let Err(e) = FileExt::try_lock_exclusive(&lock) {
                if e.kind() != fs2::lock_contended_error().kind() {
                    warn!(path = %path.display(), error = %e, "cannot lock spool file");
                }
                debug!(path = %path.display(), "spool file locked elsewhere");
                report.entries.push(SweepEntry {
                    path,
                    outcome: EntryOutcome::Locked,
                });
                continue;
            }
            // Another sweep may have finished it between listing and locking.
            if !path.exists() {
                continue;
            }

            let ctx = BatchContext::new(PeerId::from_spool_name(&name, SUFFIX_LEN), name);
            let verdict = replay(&ctx, input);
            let outcome = match verdict {
                ReplayVerdict::Delivered => {
                    if let Err(e) = fs::remove_file(&path) {
                        error!(
                            path = %path.display(),
                            error = %e,
                            "cannot remove delivered spool file"
                        );
                    }
                    EntryOutcome::Delivered
                }
                ReplayVerdict::Defer => EntryOutcome::Deferred,
                ReplayVerdict::Quarantine | ReplayVerdict::QuarantineAndStop => {
                    match self.quarantine(&path, &ctx.peer) {
                        Ok(dest) => EntryOutcome::Quarantined(dest),
                        Err(e) => {
                            error!(
                                path = %path.display(),
                                error = %e,
                                "cant unspool saving to {}",
                                self.bad_news_dir.display()
                            );
                            EntryOutcome::QuarantineFailed
                        }
                    }
                }
            };
            drop(lock);

            report.entries.push(SweepEntry { path, outcome });
            if matches!(verdict, ReplayVerdict::Defer | ReplayVerdict::QuarantineAndStop) {
                report.stopped_early = true;
                break;
            }
        }
        Ok(report)
    }

    /// Move a spool file into the bad-news directory under a fresh
    /// `<peer><suffix>` name, reserved first so nothing already there is
    /// replaced
    fn quarantine(&self, path: &Path, peer: &PeerId) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.bad_news_dir)?;
        let (_, dest) = tempfile::Builder::new()
            .prefix(peer.as_str())
            .rand_bytes(SUFFIX_LEN)
            .tempfile_in(&self.bad_news_dir)?
            .keep()?;
        if let Err(e) = fs::rename(path, &dest) {
            let _ = fs::remove_file(&dest);
            return Err(e);
        }
        warn!(path = %path.display(), dest = %dest.display(), "quarantined spool file");
        Ok(dest)
    }
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect()
}

/// Copy `source` from `offset` to its end into `dest`, returning the byte count
fn copy_from(source: &File, offset: u64, dest: &mut File) -> Result<u64, SpoolError> {
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut pos = offset;
    loop {
        let n = match source.read_at(&mut buf, pos) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(source) => return Err(SpoolError::Write { offset: pos, source }),
        };
        dest.write_all(&buf[..n])
            .map_err(|source| SpoolError::Write { offset: pos, source })?;
        pos += n as u64;
    }
    Ok(pos - offset)
}
