//! Batch orchestration
//!
//! [`Ingester`] drives one batch through decode, framing and offer, keeps the
//! per-article bookkeeping (duplicate log, saved rejects, tallies), reaps the
//! helpers it started and decides what happens to input that was not
//! delivered.

use crate::article::offer_headers;
use crate::config::{Config, DuplicateLog};
use crate::decoder::{BatchDecoder, Unit};
use crate::error::{DecodeError, Result};
use crate::framer::{ArticleBuffer, read_bytecount, read_remainder};
use crate::pipeline::Stream;
use crate::protocol::PeerSession;
use crate::spool::{RecoveryStore, ReplayVerdict, SpoolEntry, SweepReport};
use crate::types::{BatchContext, OfferOutcome, OfferStats, RejectReason};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, Write};
use tracing::{debug, info, warn};

/// Bytes of a rejected article shown in verbose mode
const PREVIEW_LEN: usize = 40;

/// Why a batch stopped before its end
#[derive(Debug)]
pub enum AbortCause {
    /// The batch could not be decoded or framed
    Decode(DecodeError),
    /// The peer is busy or the connection is unusable
    Peer(OfferOutcome),
}

impl AbortCause {
    fn verdict(&self) -> ReplayVerdict {
        match self {
            AbortCause::Decode(e) if e.is_spawn_exhausted() => ReplayVerdict::Defer,
            AbortCause::Decode(_) => ReplayVerdict::Quarantine,
            AbortCause::Peer(_) => ReplayVerdict::QuarantineAndStop,
        }
    }
}

/// How a batch ended
#[derive(Debug)]
pub enum Disposition {
    /// Every article reached a final per-article outcome
    Delivered,
    /// Processing stopped; input from `resume_offset` on was not delivered
    Aborted {
        /// What stopped the batch
        cause: AbortCause,
        /// Offset in the original input where the unfinished unit began
        resume_offset: u64,
    },
}

/// Everything that happened to one batch
#[derive(Debug)]
pub struct BatchReport {
    /// Per-article outcomes in stream order
    pub outcomes: Vec<OfferOutcome>,
    /// Tallies of `outcomes`
    pub stats: OfferStats,
    /// How the batch ended
    pub disposition: Disposition,
    /// Helpers started for this batch
    pub children_spawned: usize,
    /// Helpers reaped for this batch
    pub children_reaped: usize,
}

impl BatchReport {
    /// Whether the batch was fully handled
    pub fn is_delivered(&self) -> bool {
        matches!(self.disposition, Disposition::Delivered)
    }
}

/// Where undelivered input ended up
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Undelivered {
    /// Everything was handled
    Nothing,
    /// The remainder was written to the spool
    Spooled(SpoolEntry),
    /// The remainder was dropped on request
    NotSpooled,
}

/// Runs batches against a peer
#[derive(Debug, Clone)]
pub struct Ingester {
    config: Config,
    store: RecoveryStore,
}

impl Ingester {
    /// Create an ingester
    pub fn new(config: Config) -> Self {
        let store = RecoveryStore::new(&config.spool);
        Self { config, store }
    }

    /// The spool this ingester writes to and sweeps
    pub fn store(&self) -> &RecoveryStore {
        &self.store
    }

    /// Process one batch read from `input`
    ///
    /// Articles are offered strictly in stream order. Whatever happens, every
    /// helper started for the batch is reaped before returning.
    pub fn process<R: BufRead, W: Write>(
        &self,
        ctx: &BatchContext,
        input: &File,
        session: &mut PeerSession<R, W>,
    ) -> BatchReport {
        let mut outcomes = Vec::new();
        let mut stats = OfferStats::default();

        let stream = match input.try_clone() {
            Ok(file) => Stream::input(file),
            Err(source) => {
                return BatchReport {
                    outcomes,
                    stats,
                    disposition: Disposition::Aborted {
                        cause: AbortCause::Decode(DecodeError::Read {
                            what: "input",
                            source,
                        }),
                        resume_offset: 0,
                    },
                    children_spawned: 0,
                    children_reaped: 0,
                };
            }
        };

        let mut decoder = BatchDecoder::new(stream, &self.config);
        let mut buffer = ArticleBuffer::new();
        let disposition = loop {
            match self.next_article(&mut decoder, &mut buffer) {
                Ok(true) => {}
                Ok(false) => break Disposition::Delivered,
                Err(e) => {
                    warn!(peer = %ctx.peer, input = %ctx.input, error = %e, "cannot decode batch");
                    break Disposition::Aborted {
                        cause: AbortCause::Decode(e),
                        resume_offset: decoder.resume_offset(),
                    };
                }
            }

            if buffer.is_empty_article() {
                debug!(peer = %ctx.peer, "empty article");
                stats.empty += 1;
                continue;
            }

            let outcome = session.offer(ctx, buffer.as_bytes());
            stats.record(&outcome);
            self.account(ctx, buffer.as_bytes(), &outcome);
            let fatal = outcome.is_batch_fatal();
            outcomes.push(outcome.clone());
            if fatal {
                break Disposition::Aborted {
                    cause: AbortCause::Peer(outcome),
                    resume_offset: decoder.resume_offset(),
                };
            }
        };

        let children_spawned = decoder.children_spawned();
        let aborted = matches!(disposition, Disposition::Aborted { .. });
        let mut children = decoder.into_children();
        let children_reaped = children.reap(aborted);

        info!(
            peer = %ctx.peer,
            input = %ctx.input,
            accepted = stats.accepted,
            duplicates = stats.duplicates,
            rejected = stats.rejected,
            aborted,
            "batch done"
        );
        BatchReport {
            outcomes,
            stats,
            disposition,
            children_spawned,
            children_reaped,
        }
    }

    /// Process one batch and spool what was not delivered
    ///
    /// With `spool` false an undelivered remainder is dropped and reported as
    /// [`Undelivered::NotSpooled`]. Failing to spool is an error.
    pub fn ingest<R: BufRead, W: Write>(
        &self,
        ctx: &BatchContext,
        input: &File,
        session: &mut PeerSession<R, W>,
        spool: bool,
    ) -> Result<(BatchReport, Undelivered)> {
        let report = self.process(ctx, input, session);
        let undelivered = match &report.disposition {
            Disposition::Delivered => Undelivered::Nothing,
            Disposition::Aborted { .. } if !spool => {
                warn!(peer = %ctx.peer, input = %ctx.input, "batch not delivered and not spooled");
                Undelivered::NotSpooled
            }
            Disposition::Aborted { resume_offset, .. } => {
                Undelivered::Spooled(self.store.spool_remainder(ctx, input, *resume_offset)?)
            }
        };
        Ok((report, undelivered))
    }

    /// Spool a whole input without processing it (peer unreachable)
    pub fn spool_all(&self, ctx: &BatchContext, input: &File) -> Result<SpoolEntry> {
        Ok(self.store.spool_remainder(ctx, input, 0)?)
    }

    /// Replay every spooled batch against `session`
    pub fn sweep<R: BufRead, W: Write>(
        &self,
        session: &mut PeerSession<R, W>,
        verbose: bool,
    ) -> Result<SweepReport> {
        let report = self.store.sweep(|ctx, input| {
            let ctx = ctx.clone().verbose(verbose);
            let report = self.process(&ctx, &input, session);
            match report.disposition {
                Disposition::Delivered => ReplayVerdict::Delivered,
                Disposition::Aborted { cause, .. } => cause.verdict(),
            }
        })?;
        info!(
            delivered = report.delivered(),
            quarantined = report.quarantined(),
            stopped_early = report.stopped_early,
            "sweep done"
        );
        Ok(report)
    }

    /// Frame the next article into `buffer`; `false` at end of batch
    fn next_article(
        &self,
        decoder: &mut BatchDecoder,
        buffer: &mut ArticleBuffer,
    ) -> std::result::Result<bool, DecodeError> {
        let unit = decoder.next_unit()?;
        let Some(stream) = decoder.stream_mut() else {
            return Ok(false);
        };
        let framed = match unit {
            Unit::End => return Ok(false),
            Unit::Bytecount(size) => read_bytecount(stream, size, buffer).map(|_| ()),
            Unit::Remainder(prefix) => read_remainder(&mut *stream, &prefix, buffer),
        };
        framed.map_err(|source| DecodeError::Read {
            what: "article",
            source,
        })?;
        Ok(true)
    }

    /// Per-article bookkeeping for outcomes that do not stop the batch
    fn account(&self, ctx: &BatchContext, article: &[u8], outcome: &OfferOutcome) {
        match outcome {
            OfferOutcome::Duplicate => self.log_duplicate(ctx, article),
            OfferOutcome::RejectedIndividually(reason) => self.reject(ctx, article, reason),
            OfferOutcome::Accepted
            | OfferOutcome::PeerBusyResend
            | OfferOutcome::WholeBatchAbort(_) => {}
        }
    }

    fn reject(&self, ctx: &BatchContext, article: &[u8], reason: &RejectReason) {
        warn!(peer = %ctx.peer, "{}", reason);
        if ctx.verbose {
            let preview = &article[..article.len().min(PREVIEW_LEN)];
            warn!(
                peer = %ctx.peer,
                article = %String::from_utf8_lossy(preview),
                "rejected article"
            );
        }
        if !self.config.policy.save_rejected || !reason.saves_article() {
            return;
        }
        match self.store.save_rejected(ctx, article) {
            Ok(path) => debug!(path = %path.display(), "saved rejected article"),
            Err(e) => warn!(error = %e, "cant save rejected article"),
        }
    }

    fn log_duplicate(&self, ctx: &BatchContext, article: &[u8]) {
        let (id, path) = match offer_headers(article) {
            Ok(headers) => (headers.message_id, headers.path),
            Err(_) => return,
        };
        match self.config.policy.duplicate_log {
            DuplicateLog::None => {}
            DuplicateLog::Log => info!(peer = %ctx.peer, message_id = %id, %path, "duplicate"),
            DuplicateLog::File => {
                let log_path = &self.config.policy.duplicate_log_path;
                let line = format!(
                    "{} duplicate {} {}\n",
                    chrono::Local::now().format("%b %e %H:%M:%S"),
                    id,
                    path
                );
                let written = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(log_path)
                    .and_then(|mut file| file.write_all(line.as_bytes()));
                if let Err(e) = written {
                    warn!(path = %log_path.display(), error = %e, "cannot append to duplicate log");
                }
            }
        }
    }
}
