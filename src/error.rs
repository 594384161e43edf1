//! Error types for usenet-rnews
//!
//! This module provides the error taxonomy of the ingest engine:
//! - Decode-fatal errors raised while peeling batch and compression layers
//! - Helper spawn errors, split into "gave up after retries" and "cannot run"
//! - Peer session errors (connect, greeting, authentication, I/O)
//! - Spool errors, which are fatal to the invocation
//!
//! Per-article problems are not errors: they surface as
//! [`OfferOutcome`](crate::types::OfferOutcome) values.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for usenet-rnews operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for usenet-rnews
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "port")
        key: Option<String>,
    },

    /// Batch decoding failed
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Peer session error
    #[error("peer error: {0}")]
    Peer(#[from] PeerError),

    /// Spooling failed
    #[error("spool error: {0}")]
    Spool(#[from] SpoolError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that make a batch undecodable
///
/// Every variant escalates to a whole-batch abort.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Reading the current stream failed
    #[error("cannot read {what}: {source}")]
    Read {
        /// What was being read (e.g., "first character")
        what: &'static str,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// A batch command line exceeded the configured maximum
    #[error("bad_line too long {line}")]
    LineTooLong {
        /// The partial line that was read
        line: String,
    },

    /// The stream ended in the middle of a command line
    #[error("cannot read first line, got {line}")]
    UnterminatedLine {
        /// The partial line that was read
        line: String,
    },

    /// `#! rnews` carried a missing, zero or negative count
    #[error("bad_line bad count {line}")]
    BadCount {
        /// The offending command line
        line: String,
    },

    /// A second `#! cunbatch` appeared inside the same batch
    #[error("nested_cunbatch")]
    NestedCunbatch,

    /// Something other than a byte-count marker followed a byte-counted article
    #[error("bad_format data after byte-counted article is not a batch marker")]
    CorruptAfterCount,

    /// Unknown `#!` command and external unpack programs are disabled
    #[error("bad_format unknown command {line}")]
    UnknownCommand {
        /// The offending command line
        line: String,
    },

    /// The unpack program named by a command line does not exist
    #[error("unpack program {path} not found")]
    ProgramNotFound {
        /// The resolved path of the program
        path: PathBuf,
    },

    /// No decompression helper could be located
    #[error("no decompression helper available")]
    NoDecompressor,

    /// Compressed data appeared on a stream that cannot be rewound
    #[error("compressed layer inside a helper's output cannot be rewound")]
    CompressedPipe,

    /// A helper process could not be started
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

impl DecodeError {
    /// Whether this failure comes from exhausting the spawn retry budget
    ///
    /// That condition degrades the invocation to "spool instead of deliver".
    pub fn is_spawn_exhausted(&self) -> bool {
        matches!(self, DecodeError::Spawn(SpawnError::Exhausted { .. }))
    }
}

/// Errors from starting a helper process
#[derive(Debug, Error)]
pub enum SpawnError {
    /// Spawning kept failing with a transient error until the retry budget ran out
    #[error("cannot spawn {program} after {attempts} attempts, spooling: {source}")]
    Exhausted {
        /// The helper program
        program: PathBuf,
        /// Number of attempts made
        attempts: u32,
        /// The last spawn error
        source: std::io::Error,
    },

    /// Spawning failed with a permanent error
    #[error("cannot spawn {program}: {source}")]
    Failed {
        /// The helper program
        program: PathBuf,
        /// The spawn error
        source: std::io::Error,
    },
}

/// Peer session errors
#[derive(Debug, Error)]
pub enum PeerError {
    /// TCP connection could not be established
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        /// The address that was dialled
        addr: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The peer answered the connection with a refusal
    #[error("rejected connection {reply}")]
    Refused {
        /// The greeting line
        reply: String,
    },

    /// Authentication was not accepted
    #[error("authentication failed: {reply}")]
    AuthFailed {
        /// The reply that ended the exchange
        reply: String,
    },

    /// Reading from the peer failed or the peer closed the connection
    #[error("cannot read from peer after {stage}: {source}")]
    Read {
        /// The protocol step that was waiting for a reply
        stage: &'static str,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Writing to the peer failed
    #[error("cannot write to peer: {0}")]
    Write(#[source] std::io::Error),

    /// The peer sent a reply that does not start with a status code
    #[error("bad_reply after {stage} {line}")]
    BadReply {
        /// The protocol step that was waiting for a reply
        stage: &'static str,
        /// The reply line
        line: String,
    },
}

/// Spool errors
///
/// Failure to persist an undelivered batch is fatal to the invocation.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// The temporary batch file could not be created
    #[error("cannot create temporary batch file in {dir}: {source}")]
    CreateTemp {
        /// The spool directory
        dir: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Copying the batch into the spool failed
    #[error("cannot write around {offset}: {source}")]
    Write {
        /// Number of bytes copied before the failure
        offset: u64,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Setting permissions on the batch file failed
    #[error("cannot chmod temporary batch file {path}: {source}")]
    Permissions {
        /// The temporary file
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Moving the batch file into place failed
    #[error("cannot rename {from} to {to}: {source}")]
    Rename {
        /// The temporary file
        from: PathBuf,
        /// The destination path
        to: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The spool directory could not be read
    #[error("cannot open spool directory {dir}: {source}")]
    ReadDir {
        /// The spool directory
        dir: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_decode_error_messages_keep_log_vocabulary() {
        let err = DecodeError::BadCount {
            line: "#! rnews 0".into(),
        };
        assert_eq!(err.to_string(), "bad_line bad count #! rnews 0");
        assert_eq!(DecodeError::NestedCunbatch.to_string(), "nested_cunbatch");
    }

    #[test]
    fn test_spawn_exhaustion_is_detected_through_decode_error() {
        let exhausted = DecodeError::Spawn(SpawnError::Exhausted {
            program: PathBuf::from("/usr/bin/gzip"),
            attempts: 3,
            source: io::Error::new(io::ErrorKind::WouldBlock, "EAGAIN"),
        });
        assert!(exhausted.is_spawn_exhausted());

        let failed = DecodeError::Spawn(SpawnError::Failed {
            program: PathBuf::from("/nope"),
            source: io::Error::new(io::ErrorKind::NotFound, "missing"),
        });
        assert!(!failed.is_spawn_exhausted());
        assert!(!DecodeError::NestedCunbatch.is_spawn_exhausted());
    }

    #[test]
    fn test_top_level_error_wraps_sub_errors() {
        let err: Error = PeerError::Refused {
            reply: "502 go away".into(),
        }
        .into();
        assert!(matches!(err, Error::Peer(PeerError::Refused { .. })));
        assert_eq!(err.to_string(), "peer error: rejected connection 502 go away");

        let err: Error = io::Error::other("disk on fire").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
