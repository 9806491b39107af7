//! Reads gzip-compressed query log artifacts line by line
//!
//! Decompression runs on the blocking thread pool and hands lines to the
//! async side through a bounded channel.

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::debug;

/// Decoded lines buffered ahead of the forwarder
const DECODE_CHANNEL_CAPACITY: usize = 256;

/// Lazy, single-pass reader over the non-blank lines of a `.gz` artifact.
///
/// The first read error ends the sequence. Dropping the decoder stops the
/// background reader and closes the file.
pub struct LogDecoder {
    lines: mpsc::Receiver<io::Result<String>>,
}

impl LogDecoder {
    pub async fn open(path: &Path) -> io::Result<Self> {
        let file = tokio::fs::File::open(path).await?.into_std().await;
        let (tx, rx) = mpsc::channel(DECODE_CHANNEL_CAPACITY);

        tokio::task::spawn_blocking(move || read_lines(file, tx));

        Ok(Self { lines: rx })
    }

    /// Next trimmed, non-blank line; `None` once the artifact is exhausted
    pub async fn next_line(&mut self) -> Option<io::Result<String>> {
        self.lines.recv().await
    }
}

fn read_lines(file: File, tx: mpsc::Sender<io::Result<String>>) {
    let mut blank_lines = 0u64;

    for line in BufReader::new(MultiGzDecoder::new(file)).lines() {
        let item = match line {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    blank_lines += 1;
                    continue;
                }
                Ok(trimmed.to_string())
            }
            Err(e) => Err(e),
        };

        let stop = item.is_err();
        if tx.blocking_send(item).is_err() {
            debug!("Log decoder dropped before the artifact was exhausted");
            return;
        }
        if stop {
            return;
        }
    }

    debug!("Skipped {} blank lines", blank_lines);
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn write_gz(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(content).unwrap();
        encoder.finish().unwrap();
        path
    }

    async fn collect(decoder: &mut LogDecoder) -> Vec<io::Result<String>> {
        let mut lines = Vec::new();
        while let Some(line) = decoder.next_line().await {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_gz(
            dir.path(),
            "logs.gz",
            b"{\"msg\":\"a\"}\n\n   \n{\"msg\":\"b\"}\r\n\n",
        );

        let mut decoder = LogDecoder::open(&path).await.unwrap();
        let lines: Vec<String> = collect(&mut decoder)
            .await
            .into_iter()
            .map(|l| l.unwrap())
            .collect();

        assert_eq!(lines, vec![r#"{"msg":"a"}"#, r#"{"msg":"b"}"#]);
    }

    #[tokio::test]
    async fn test_more_lines_than_channel_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let content: String = (0..DECODE_CHANNEL_CAPACITY * 3)
            .map(|i| format!("{{\"n\":{}}}\n", i))
            .collect();
        let path = write_gz(dir.path(), "large.gz", content.as_bytes());

        let mut decoder = LogDecoder::open(&path).await.unwrap();
        let lines = collect(&mut decoder).await;

        assert_eq!(lines.len(), DECODE_CHANNEL_CAPACITY * 3);
        assert_eq!(lines[0].as_ref().unwrap(), r#"{"n":0}"#);
        assert!(lines.iter().all(|l| l.is_ok()));
    }

    #[tokio::test]
    async fn test_empty_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_gz(dir.path(), "empty.gz", b"");

        let mut decoder = LogDecoder::open(&path).await.unwrap();
        assert!(decoder.next_line().await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_artifact_yields_one_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.gz");
        std::fs::write(&path, b"definitely not gzip").unwrap();

        let mut decoder = LogDecoder::open(&path).await.unwrap();
        let lines = collect(&mut decoder).await;

        assert_eq!(lines.len(), 1);
        assert!(lines[0].is_err());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LogDecoder::open(&dir.path().join("absent.gz")).await.is_err());
    }
}
