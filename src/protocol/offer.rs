//! Offer handshake
//!
//! One article at a time: `ihave <message-id>`, wait for the peer's
//! decision, send the dot-stuffed body only when asked, then read the
//! final verdict. Nothing is pipelined.

use super::{
    HAVE_IT, POSTED, POSTING_FAILED, REJECT_IT, RESEND_IT, SEND_IT, TOOK_IT, parse_reply,
    read_line,
};
use crate::article::{HeaderProblem, offer_headers, write_dot_stuffed};
use crate::types::{AbortReason, BatchContext, OfferOutcome, RejectReason, Stage};
use std::io::{BufRead, Write};
use tracing::{debug, info, warn};

/// A peer connection as a pair of byte streams
#[derive(Debug)]
pub struct PeerSession<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> PeerSession<R, W> {
    /// Wrap an already-greeted connection
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Offer one article and classify the peer's answer
    ///
    /// Articles without the required headers are turned away before anything
    /// is sent.
    pub fn offer(&mut self, ctx: &BatchContext, article: &[u8]) -> OfferOutcome {
        let headers = match offer_headers(article) {
            Ok(headers) => headers,
            Err(HeaderProblem::Missing(name)) => {
                return OfferOutcome::RejectedIndividually(RejectReason::MissingHeader(name));
            }
            Err(HeaderProblem::UnterminatedMessageId) => {
                return OfferOutcome::RejectedIndividually(RejectReason::UnterminatedMessageId);
            }
        };

        if let Err(e) = self.send(format!("ihave {}\r\n", headers.message_id).as_bytes()) {
            warn!(peer = %ctx.peer, error = %e, "cannot send ihave");
            return OfferOutcome::WholeBatchAbort(AbortReason::WriteFailed);
        }
        info!(peer = %ctx.peer, message_id = %headers.message_id, "offered");

        let reply = match self.reply(ctx, Stage::Offer) {
            Ok(reply) => reply,
            Err(abort) => return OfferOutcome::WholeBatchAbort(abort),
        };
        match reply.code {
            SEND_IT => {}
            HAVE_IT => return OfferOutcome::Duplicate,
            RESEND_IT => {
                info!(peer = %ctx.peer, reply = %reply.line, "peer asked to resend");
                return OfferOutcome::PeerBusyResend;
            }
            _ => {
                return OfferOutcome::RejectedIndividually(RejectReason::UnknownReply {
                    stage: Stage::Offer,
                    reply: reply.line,
                });
            }
        }

        let sent = write_dot_stuffed(&mut self.writer, article).and_then(|()| self.writer.flush());
        if let Err(e) = sent {
            warn!(peer = %ctx.peer, error = %e, "cant sendarticle");
            return OfferOutcome::WholeBatchAbort(AbortReason::WriteFailed);
        }

        let reply = match self.reply(ctx, Stage::Body) {
            Ok(reply) => reply,
            Err(abort) => return OfferOutcome::WholeBatchAbort(abort),
        };
        match reply.code {
            TOOK_IT | POSTED => OfferOutcome::Accepted,
            RESEND_IT => {
                info!(peer = %ctx.peer, reply = %reply.line, "peer asked to resend");
                OfferOutcome::PeerBusyResend
            }
            REJECT_IT | POSTING_FAILED => {
                OfferOutcome::RejectedIndividually(RejectReason::Rejected { reply: reply.line })
            }
            _ => OfferOutcome::RejectedIndividually(RejectReason::UnknownReply {
                stage: Stage::Body,
                reply: reply.line,
            }),
        }
    }

    /// Say goodbye and read the peer's answer, ignoring failures
    pub fn quit(&mut self) {
        if self.send(b"quit\r\n").is_err() {
            return;
        }
        match read_line(&mut self.reader) {
            Ok(line) => debug!(reply = %line, "quit"),
            Err(e) => debug!(error = %e, "no reply to quit"),
        }
    }

    /// Give back the underlying streams
    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }

    fn send(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()
    }

    fn reply(&mut self, ctx: &BatchContext, stage: Stage) -> Result<super::Reply, AbortReason> {
        let line = read_line(&mut self.reader).map_err(|e| {
            warn!(peer = %ctx.peer, error = %e, "cannot read reply after {}", stage);
            AbortReason::ReadFailed { stage }
        })?;
        parse_reply(&line).ok_or_else(|| {
            warn!(peer = %ctx.peer, reply = %line, "bad_reply after {}", stage);
            AbortReason::BadReply { stage, reply: line }
        })
    }
}
