//! Batch format decoder
//!
//! Classifies the stream from its leading bytes and peels layers until an
//! article is ready to be framed:
//!
//! - `1f 8b` / `1f 9d`: gzip or compress data; a decompressor is spliced in
//! - `#! cunbatch`: the rest is compressed; a decompressor is spliced in
//! - `#! rnews <N>`: the next `N` bytes are one article
//! - `#! <program>`: the rest is unpacked by `<program>` from the helper directory
//! - anything else: the whole stream is a single article
//!
//! Once a byte count has been seen, anything that is not another batch marker
//! means the batch is corrupt; it is never reinterpreted as a raw article.

use crate::config::Config;
use crate::error::DecodeError;
use crate::pipeline::{Children, HelperCommand, ProcessPipeline, Stream, resolve_unpack_program};
use std::io;
use std::path::PathBuf;
use tracing::{debug, warn};

/// First byte of gzip and compress data
const COMPRESS_MAGIC: u8 = 0x1f;
/// Second byte of gzip data
const GZIP_MAGIC2: u8 = 0x8b;
/// Second byte of compress data
const COMPRESS_MAGIC2: u8 = 0x9d;
/// Batch command lines start with these two bytes
const BATCH_MAGIC: [u8; 2] = *b"#!";

const RNEWS_COMMAND: &str = "#! rnews";
const CUNBATCH_COMMAND: &str = "#! cunbatch";

/// The next logical unit of a batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Unit {
    /// The next `N` bytes of the stream are one article
    Bytecount(usize),
    /// `prefix` followed by the rest of the stream is one article
    Remainder(Vec<u8>),
    /// The stream is exhausted
    End,
}

/// Peels compression and batch layers off one input
#[derive(Debug)]
pub struct BatchDecoder {
    stream: Option<Stream>,
    pipeline: ProcessPipeline,
    children: Children,
    decompressor: Option<HelperCommand>,
    programs_dir: Option<PathBuf>,
    max_line_length: usize,
    saw_cunbatch: bool,
    had_count: bool,
    resume_offset: u64,
}

impl BatchDecoder {
    /// Create a decoder over the original input
    pub fn new(stream: Stream, config: &Config) -> Self {
        let decompressor = config
            .helpers
            .resolve_gzip()
            .map(|program| HelperCommand::new(program, config.helpers.gzip_args.clone()));
        let programs_dir = config
            .helpers
            .unpack_programs
            .then(|| config.helpers.programs_dir.clone());

        Self {
            stream: Some(stream),
            pipeline: ProcessPipeline::new(config.spawn_retry.clone()),
            children: Children::new(),
            decompressor,
            programs_dir,
            max_line_length: config.spool.max_line_length,
            saw_cunbatch: false,
            had_count: false,
            resume_offset: 0,
        }
    }

    /// Offset in the original input where the unit being processed began
    ///
    /// Once a helper owns the original input this stays at the start of the
    /// layer it was handed.
    pub fn resume_offset(&self) -> u64 {
        self.resume_offset
    }

    /// Number of helpers spawned for this batch
    pub fn children_spawned(&self) -> usize {
        self.children.spawned()
    }

    /// The current stream, for framing the unit just returned
    pub fn stream_mut(&mut self) -> Option<&mut Stream> {
        self.stream.as_mut()
    }

    /// Close the current stream and hand over the helpers to reap
    pub fn into_children(mut self) -> Children {
        self.stream = None;
        self.children
    }

    /// Classify the next unit, splicing in helpers as layers are found
    pub fn next_unit(&mut self) -> Result<Unit, DecodeError> {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(Unit::End);
            };
            if let Some(offset) = stream.input_offset() {
                self.resume_offset = offset;
            }

            let first = match stream.read_byte() {
                Ok(Some(byte)) => byte,
                Ok(None) => return Ok(Unit::End),
                Err(source) => {
                    return Err(DecodeError::Read {
                        what: "first character",
                        source,
                    });
                }
            };
            if first != COMPRESS_MAGIC && first != BATCH_MAGIC[0] {
                return self.not_a_batch(vec![first]);
            }

            let second = match stream.read_byte() {
                Ok(Some(byte)) => byte,
                Ok(None) => return self.not_a_batch(vec![first]),
                Err(source) => {
                    return Err(DecodeError::Read {
                        what: "second character",
                        source,
                    });
                }
            };

            if first == COMPRESS_MAGIC && (second == GZIP_MAGIC2 || second == COMPRESS_MAGIC2) {
                let rewound = stream.rewind_by(2).map_err(|source| DecodeError::Read {
                    what: "compressed input",
                    source,
                })?;
                if !rewound {
                    warn!("compressed data inside helper output");
                    return Err(DecodeError::CompressedPipe);
                }
                debug!(offset = self.resume_offset, "compressed batch");
                self.splice_decompressor()?;
                continue;
            }
            if [first, second] != BATCH_MAGIC {
                return self.not_a_batch(vec![first, second]);
            }

            let line = self.read_command_line()?;
            if line.starts_with(RNEWS_COMMAND) {
                let size = parse_count(&line[RNEWS_COMMAND.len()..])
                    .ok_or_else(|| DecodeError::BadCount { line: line.clone() })?;
                self.had_count = true;
                return Ok(Unit::Bytecount(size));
            }

            if self.had_count {
                return Err(DecodeError::CorruptAfterCount);
            }

            if line == CUNBATCH_COMMAND {
                if self.saw_cunbatch {
                    return Err(DecodeError::NestedCunbatch);
                }
                self.splice_decompressor()?;
                continue;
            }

            self.splice_program(&line)?;
        }
    }

    fn not_a_batch(&self, prefix: Vec<u8>) -> Result<Unit, DecodeError> {
        if self.had_count {
            return Err(DecodeError::CorruptAfterCount);
        }
        Ok(Unit::Remainder(prefix))
    }

    /// Read the rest of a `#!` line, byte by byte so nothing past it is consumed
    fn read_command_line(&mut self) -> Result<String, DecodeError> {
        let mut line = BATCH_MAGIC.to_vec();
        let Some(stream) = self.stream.as_mut() else {
            return Err(stream_closed());
        };
        loop {
            let byte = stream.read_byte().map_err(|source| DecodeError::Read {
                what: "first line",
                source,
            })?;
            match byte {
                Some(b'\n') => break,
                Some(byte) if line.len() < self.max_line_length => line.push(byte),
                Some(_) => {
                    let line = String::from_utf8_lossy(&line).into_owned();
                    warn!(%line, "bad_line too long");
                    return Err(DecodeError::LineTooLong { line });
                }
                None => {
                    return Err(DecodeError::UnterminatedLine {
                        line: String::from_utf8_lossy(&line).into_owned(),
                    });
                }
            }
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    fn splice_decompressor(&mut self) -> Result<(), DecodeError> {
        let helper = self
            .decompressor
            .clone()
            .ok_or(DecodeError::NoDecompressor)?;
        self.splice(&helper)?;
        self.saw_cunbatch = true;
        Ok(())
    }

    fn splice_program(&mut self, line: &str) -> Result<(), DecodeError> {
        let Some(dir) = &self.programs_dir else {
            warn!(%line, "bad_format unknown command");
            return Err(DecodeError::UnknownCommand {
                line: line.to_string(),
            });
        };
        let command = line[BATCH_MAGIC.len()..].trim_start();
        let program = resolve_unpack_program(dir, command).ok_or_else(|| {
            DecodeError::UnknownCommand {
                line: line.to_string(),
            }
        })?;
        if !program.is_file() {
            warn!(program = %program.display(), "unpack program not found");
            return Err(DecodeError::ProgramNotFound { path: program });
        }
        self.splice(&HelperCommand::new(program, Vec::new()))
    }

    fn splice(&mut self, helper: &HelperCommand) -> Result<(), DecodeError> {
        let Some(stream) = self.stream.take() else {
            return Err(stream_closed());
        };
        let stream = self.pipeline.splice(stream, helper, &mut self.children)?;
        self.stream = Some(stream);
        Ok(())
    }
}

fn stream_closed() -> DecodeError {
    DecodeError::Read {
        what: "stream",
        source: io::Error::other("stream already closed"),
    }
}

/// Parse the count of a `#! rnews <N>` line
///
/// Leading blanks are skipped and the count ends at the first non-digit;
/// zero or a missing count is invalid.
fn parse_count(rest: &str) -> Option<usize> {
    let rest = rest.trim_start();
    let digits = rest
        .find(|c: char| !c.is_ascii_digit())
        .map_or(rest, |end| &rest[..end]);
    match digits.parse::<usize>() {
        Ok(0) | Err(_) => None,
        Ok(size) => Some(size),
    }
}
