//! Helper process plumbing
//!
//! A batch is read through a single [`Stream`] handle. When a compression or
//! unpack layer is found, [`ProcessPipeline::splice`] starts a helper whose
//! stdin is the current stream and whose stdout becomes the new stream. The
//! old handle is consumed and closed in the parent as soon as the helper owns
//! it, so end-of-input propagates down the chain.
//!
//! Every helper is recorded in a [`Children`] set owned by the caller, which
//! reaps exactly the helpers it spawned.

use crate::config::RetryConfig;
use crate::error::SpawnError;
use crate::retry::{IsRetryable, with_retry};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

/// Where the bytes of a [`Stream`] come from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamSource {
    /// The original input (seekable)
    Input,
    /// The stdout pipe of a helper process
    Helper,
}

/// The single active readable handle of a batch
///
/// Reads are unbuffered so the descriptor offset always matches what has
/// been consumed; a helper started on this stream sees exactly the unread
/// remainder.
#[derive(Debug)]
pub struct Stream {
    file: File,
    source: StreamSource,
}

impl Stream {
    /// Wrap the original, seekable input
    pub fn input(file: File) -> Self {
        Self {
            file,
            source: StreamSource::Input,
        }
    }

    fn helper(fd: OwnedFd) -> Self {
        Self {
            file: File::from(fd),
            source: StreamSource::Helper,
        }
    }

    /// Where this stream's bytes come from
    pub fn source(&self) -> StreamSource {
        self.source
    }

    /// Offset into the original input, if this stream still is the original input
    pub fn input_offset(&mut self) -> Option<u64> {
        match self.source {
            StreamSource::Input => self.file.stream_position().ok(),
            StreamSource::Helper => None,
        }
    }

    /// Step back over bytes that were peeked
    ///
    /// Only the original input can be rewound; helper pipes cannot.
    pub fn rewind_by(&mut self, count: i64) -> io::Result<bool> {
        match self.source {
            StreamSource::Input => {
                self.file.seek(SeekFrom::Current(-count))?;
                Ok(true)
            }
            StreamSource::Helper => Ok(false),
        }
    }

    /// Read a single byte, `None` at end of stream
    pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.file.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

/// A helper program and its fixed argument list
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelperCommand {
    /// Program to execute
    pub program: PathBuf,
    /// Arguments
    pub args: Vec<String>,
}

impl HelperCommand {
    /// Create a helper command
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn display(&self) -> String {
        self.program.display().to_string()
    }
}

/// Helpers spawned while processing one batch
#[derive(Debug, Default)]
pub struct Children {
    children: Vec<(PathBuf, Child)>,
    reaped: usize,
}

impl Children {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of helpers spawned so far
    pub fn spawned(&self) -> usize {
        self.children.len() + self.reaped
    }

    /// Number of helpers reaped so far
    pub fn reaped(&self) -> usize {
        self.reaped
    }

    fn push(&mut self, program: PathBuf, child: Child) {
        self.children.push((program, child));
    }

    /// Wait for every tracked helper
    ///
    /// The stream they feed must already be closed. With `kill`, helpers
    /// still running are terminated first; their output is no longer wanted.
    /// Returns the number of helpers reaped by this call.
    pub fn reap(&mut self, kill: bool) -> usize {
        let mut count = 0;
        for (program, mut child) in self.children.drain(..) {
            if kill {
                if let Ok(None) = child.try_wait() {
                    debug!(program = %program.display(), pid = child.id(), "killing helper");
                    if let Err(e) = child.kill() {
                        warn!(program = %program.display(), error = %e, "cannot kill helper");
                    }
                }
            }
            match child.wait() {
                Ok(status) if status.success() => {
                    debug!(program = %program.display(), "helper exited");
                }
                Ok(status) => {
                    if !kill {
                        warn!(program = %program.display(), %status, "helper exited abnormally");
                    }
                }
                Err(e) => warn!(program = %program.display(), error = %e, "cannot wait"),
            }
            count += 1;
        }
        self.reaped += count;
        count
    }
}

/// Starts helpers over the current stream
#[derive(Debug, Clone)]
pub struct ProcessPipeline {
    retry: RetryConfig,
}

impl ProcessPipeline {
    /// Create a pipeline with a spawn retry budget
    pub fn new(retry: RetryConfig) -> Self {
        Self { retry }
    }

    /// Start `helper` reading `stream` and return its output as the new stream
    ///
    /// Transient spawn failures are retried with backoff; running out of
    /// attempts yields [`SpawnError::Exhausted`]. The old stream is closed in
    /// the parent once the helper has started.
    pub fn splice(
        &self,
        stream: Stream,
        helper: &HelperCommand,
        children: &mut Children,
    ) -> Result<Stream, SpawnError> {
        let mut attempts = 0;
        let result = with_retry(&self.retry, || {
            attempts += 1;
            spawn_helper(&stream, helper)
        });

        let mut child = match result {
            Ok(child) => child,
            Err(source) if source.is_retryable() => {
                warn!(program = %helper.display(), attempts, "cannot fork, spooling");
                return Err(SpawnError::Exhausted {
                    program: helper.program.clone(),
                    attempts,
                    source,
                });
            }
            Err(source) => {
                return Err(SpawnError::Failed {
                    program: helper.program.clone(),
                    source,
                });
            }
        };

        // The helper owns the input now.
        drop(stream);

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SpawnError::Failed {
                    program: helper.program.clone(),
                    source: io::Error::other("helper has no stdout pipe"),
                });
            }
        };

        info!(program = %helper.display(), pid = child.id(), "started helper");
        children.push(helper.program.clone(), child);
        Ok(Stream::helper(OwnedFd::from(stdout)))
    }
}

fn spawn_helper(stream: &Stream, helper: &HelperCommand) -> io::Result<Child> {
    let stdin = stream.file.try_clone()?;
    Command::new(&helper.program)
        .args(&helper.args)
        .stdin(Stdio::from(stdin))
        .stdout(Stdio::piped())
        .spawn()
}

/// Resolve the program named by a `#! <command>` line inside `programs_dir`
///
/// Leading path components are dropped and everything from the first
/// whitespace on is ignored, so a batch cannot name a program outside the
/// directory.
pub fn resolve_unpack_program(programs_dir: &Path, command: &str) -> Option<PathBuf> {
    let word = command.split_whitespace().next()?;
    let name = word.rsplit('/').next().unwrap_or(word);
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(programs_dir.join(name))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn quick_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    fn input_with(bytes: &[u8]) -> Stream {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(bytes).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        Stream::input(file)
    }

    #[test]
    fn test_resolve_unpack_program_strips_paths() {
        let dir = Path::new("/opt/rnews.libexec");
        assert_eq!(
            resolve_unpack_program(dir, "/usr/bin/c7unbatch extra args"),
            Some(dir.join("c7unbatch"))
        );
        assert_eq!(
            resolve_unpack_program(dir, "../../bin/sh"),
            Some(dir.join("sh"))
        );
        assert_eq!(resolve_unpack_program(dir, "   "), None);
        assert_eq!(resolve_unpack_program(dir, "foo/"), None);
        assert_eq!(resolve_unpack_program(dir, ".."), None);
    }

    #[test]
    fn test_input_stream_rewinds_and_reports_offset() {
        let mut stream = input_with(b"#!x");
        assert_eq!(stream.read_byte().unwrap(), Some(b'#'));
        assert_eq!(stream.read_byte().unwrap(), Some(b'!'));
        assert_eq!(stream.input_offset(), Some(2));
        assert!(stream.rewind_by(2).unwrap());
        assert_eq!(stream.input_offset(), Some(0));
    }

    #[test]
    fn test_splice_through_cat_replaces_stream() {
        let Ok(cat) = which::which("cat") else {
            println!("Skipping test: cat not found in PATH");
            return;
        };
        let pipeline = ProcessPipeline::new(quick_retry());
        let mut children = Children::new();
        let mut stream = input_with(b"skip:payload");
        let mut prefix = [0u8; 5];
        stream.read_exact(&mut prefix).unwrap();

        let mut stream = pipeline
            .splice(stream, &HelperCommand::new(cat, vec![]), &mut children)
            .unwrap();
        assert_eq!(stream.source(), StreamSource::Helper);
        assert_eq!(stream.input_offset(), None);
        assert!(!stream.rewind_by(1).unwrap());

        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"payload");

        drop(stream);
        assert_eq!(children.spawned(), 1);
        assert_eq!(children.reap(false), 1);
        assert_eq!(children.reaped(), 1);
    }

    #[test]
    fn test_splice_missing_program_is_permanent_failure() {
        let pipeline = ProcessPipeline::new(quick_retry());
        let mut children = Children::new();
        let stream = input_with(b"data");
        let err = pipeline
            .splice(
                stream,
                &HelperCommand::new("/nonexistent/helper-xyz", vec![]),
                &mut children,
            )
            .unwrap_err();
        assert!(matches!(err, SpawnError::Failed { .. }));
        assert_eq!(children.spawned(), 0);
    }
}
