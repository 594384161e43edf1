//! Core types for usenet-rnews

use std::fmt;

/// Identifier of the peer a batch came from (the UUCP host)
///
/// It names spool files and is attached to log events. An empty identifier is
/// valid and means the origin is unknown.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PeerId(String);

impl PeerId {
    /// Create a new PeerId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the origin is unknown
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Recover the peer identifier from a spool file name
    ///
    /// Spool names are `<peer-id><suffix>`; the last `suffix_len` characters
    /// are dropped. Names no longer than the suffix yield an empty identifier.
    pub fn from_spool_name(name: &str, suffix_len: usize) -> Self {
        let chars = name.chars().count();
        if chars <= suffix_len {
            return Self::default();
        }
        Self(name.chars().take(chars - suffix_len).collect())
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Explicit per-batch context passed to every component that logs or names
/// spool files
#[derive(Clone, Debug)]
pub struct BatchContext {
    /// Origin of the batch
    pub peer: PeerId,
    /// Human-readable name of the input ("stdin", a path, a spool entry)
    pub input: String,
    /// Log article previews on rejects
    pub verbose: bool,
}

impl BatchContext {
    /// Create a context for one batch
    pub fn new(peer: PeerId, input: impl Into<String>) -> Self {
        Self {
            peer,
            input: input.into(),
            verbose: false,
        }
    }

    /// Enable verbose reject reporting
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// The protocol step a peer reply answered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Reply to the `ihave` offer
    Offer,
    /// Reply after the article body
    Body,
}

impl Stage {
    /// Name used in log messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Offer => "ihave",
            Stage::Body => "article",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a single article was turned away without affecting the batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// A required header is absent
    MissingHeader(&'static str),
    /// The Message-ID header has no line terminator
    UnterminatedMessageId,
    /// The peer refused the article content
    Rejected {
        /// The peer's reply line
        reply: String,
    },
    /// The peer answered with a status code outside the protocol
    UnknownReply {
        /// Which step the reply answered
        stage: Stage,
        /// The peer's reply line
        reply: String,
    },
}

impl RejectReason {
    /// Whether the article should be kept in the bad-news directory
    ///
    /// An unknown reply after the body only gets logged.
    pub fn saves_article(&self) -> bool {
        !matches!(
            self,
            RejectReason::UnknownReply {
                stage: Stage::Body,
                ..
            }
        )
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MissingHeader(name) => write!(f, "bad_article missing {name}"),
            RejectReason::UnterminatedMessageId => {
                write!(f, "bad_article unterminated Message-ID header")
            }
            RejectReason::Rejected { reply } => write!(f, "rejected {reply}"),
            RejectReason::UnknownReply { stage, reply } => {
                write!(f, "unknown_reply after {stage} {reply}")
            }
        }
    }
}

/// Why the peer connection is considered unusable
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbortReason {
    /// Reading the reply failed or the connection closed
    ReadFailed {
        /// Which step was waiting
        stage: Stage,
    },
    /// Sending the offer or the body failed
    WriteFailed,
    /// The reply did not start with a numeric status
    BadReply {
        /// Which step the reply answered
        stage: Stage,
        /// The reply line
        reply: String,
    },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::ReadFailed { stage } => write!(f, "cannot read reply after {stage}"),
            AbortReason::WriteFailed => write!(f, "cannot send to peer"),
            AbortReason::BadReply { stage, reply } => write!(f, "bad_reply after {stage} {reply}"),
        }
    }
}

/// Result of offering one article to the peer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OfferOutcome {
    /// The peer took the article
    Accepted,
    /// The peer already has the article; the body was not sent
    Duplicate,
    /// The article was turned away; the batch continues
    RejectedIndividually(RejectReason),
    /// The peer asked to resend later; the batch is preserved for later
    PeerBusyResend,
    /// The peer connection is unusable; the batch is preserved for later
    WholeBatchAbort(AbortReason),
}

impl OfferOutcome {
    /// Whether this outcome stops the batch and triggers spooling
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            OfferOutcome::PeerBusyResend | OfferOutcome::WholeBatchAbort(_)
        )
    }
}

/// Per-batch tallies of offer outcomes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OfferStats {
    /// Articles the peer took
    pub accepted: usize,
    /// Articles the peer already had
    pub duplicates: usize,
    /// Articles turned away individually
    pub rejected: usize,
    /// Empty articles skipped without an offer
    pub empty: usize,
}

impl OfferStats {
    /// Count one outcome
    pub fn record(&mut self, outcome: &OfferOutcome) {
        match outcome {
            OfferOutcome::Accepted => self.accepted += 1,
            OfferOutcome::Duplicate => self.duplicates += 1,
            OfferOutcome::RejectedIndividually(_) => self.rejected += 1,
            OfferOutcome::PeerBusyResend | OfferOutcome::WholeBatchAbort(_) => {}
        }
    }

    /// Number of articles that reached a final per-article outcome
    pub fn total(&self) -> usize {
        self.accepted + self.duplicates + self.rejected
    }
}
