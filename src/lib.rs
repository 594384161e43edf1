//! # usenet-rnews
//!
//! Batch ingestion and forwarding engine for Usenet news.
//!
//! A batch arrives as raw article text, a single article, or a stream of
//! byte-counted articles that may be wrapped in gzip/compress layers or an
//! external unpack command. Each article is offered to a peer with the
//! `ihave` handshake. Anything that cannot be delivered right now is spooled
//! verbatim and replayed later by a sweep.
//!
//! ## Design Philosophy
//!
//! - **Never lose a batch** - Undelivered input is spooled atomically or the
//!   invocation fails loudly
//! - **Per-article failures stay per-article** - A bad article never costs the
//!   rest of the batch
//! - **Explicit context** - The origin peer travels in a [`BatchContext`]
//! - **Runtime policy** - Duplicate logging, saved rejects and unpack programs
//!   are configuration, not build variants
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::fs::File;
//! use usenet_rnews::{BatchContext, Config, Ingester, PeerId, protocol};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let mut session = protocol::connect(&config.peer)?;
//!     let ingester = Ingester::new(config);
//!
//!     let input = File::open("batch.rnews")?;
//!     let ctx = BatchContext::new(PeerId::new("uunet"), "batch.rnews");
//!     let (report, undelivered) = ingester.ingest(&ctx, &input, &mut session, true)?;
//!     println!("{:?} {:?}", report.stats, undelivered);
//!
//!     session.quit();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Article headers and dot-stuffing
pub mod article;
/// Configuration types
pub mod config;
/// Batch format decoding
pub mod decoder;
/// Error types
pub mod error;
/// Article framing
pub mod framer;
/// Batch orchestration
pub mod orchestrator;
/// Helper process plumbing
pub mod pipeline;
/// Peer protocol (offer handshake, connection setup)
pub mod protocol;
/// Retry logic with exponential backoff
pub mod retry;
/// Spooling and replay of undelivered batches
pub mod spool;
/// Core types
pub mod types;

// Re-export commonly used types
pub use config::{
    Config, DuplicateLog, HelperConfig, PeerConfig, PolicyConfig, RetryConfig, SpoolConfig,
};
pub use decoder::{BatchDecoder, Unit};
pub use error::{DecodeError, Error, PeerError, Result, SpawnError, SpoolError};
pub use framer::{ArticleBuffer, Framing};
pub use orchestrator::{AbortCause, BatchReport, Disposition, Ingester, Undelivered};
pub use pipeline::{Children, HelperCommand, ProcessPipeline, Stream};
pub use protocol::PeerSession;
pub use spool::{
    EntryOutcome, RecoveryStore, ReplayVerdict, SpoolEntry, SweepEntry, SweepReport,
};
pub use types::{AbortReason, BatchContext, OfferOutcome, OfferStats, PeerId, RejectReason, Stage};
