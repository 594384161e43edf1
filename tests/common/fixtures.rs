//! Article and batch fixtures

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::process::{Command, Stdio};

/// A minimal article carrying every required header
pub fn article(id: &str) -> String {
    format!(
        "Path: relay.example!poster\n\
Message-ID: <{id}@example.com>\n\
Newsgroups: alt.test\n\
From: poster@example.com\n\
Date: 1 Jan 2024 00:00:00 GMT\n\
Subject: test {id}\n\
\n\
Body of {id}.\n"
    )
}

/// An article with one header line removed
pub fn article_without(id: &str, header: &str) -> String {
    article(id)
        .lines()
        .filter(|line| !line.starts_with(&format!("{header}:")))
        .map(|line| format!("{line}\n"))
        .collect()
}

/// Frame articles as `#! rnews <N>` records
pub fn rnews_batch(articles: &[String]) -> Vec<u8> {
    let mut batch = Vec::new();
    for article in articles {
        batch.extend_from_slice(format!("#! rnews {}\n", article.len()).as_bytes());
        batch.extend_from_slice(article.as_bytes());
    }
    batch
}

/// An anonymous file holding `bytes`, positioned at the start
pub fn input_file(bytes: &[u8]) -> File {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(bytes).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file
}

/// Compress `bytes` with the system gzip, if there is one
pub fn gzip(bytes: &[u8]) -> Option<Vec<u8>> {
    let gzip = which::which("gzip").ok()?;
    let input = input_file(bytes);
    let output = Command::new(gzip)
        .arg("-c")
        .stdin(Stdio::from(input))
        .stderr(Stdio::null())
        .output()
        .ok()?;
    output.status.success().then_some(output.stdout)
}
