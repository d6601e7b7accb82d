//! Trainer output handling: progress parsing and the per-job log file.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};

fn step_regex() -> &'static Regex {
    static STEP_RE: OnceLock<Regex> = OnceLock::new();
    STEP_RE.get_or_init(|| Regex::new(r"step\s*(\d+)/(\d+)").expect("Invalid step regex"))
}

/// Percent complete from a `step <cur>/<total>` line, if the line has one.
pub fn parse_progress(line: &str) -> Option<f64> {
    let caps = step_regex().captures(line)?;
    let current: f64 = caps.get(1)?.as_str().parse().ok()?;
    let total: f64 = caps.get(2)?.as_str().parse().ok()?;
    if total <= 0.0 {
        return None;
    }
    Some(current * 100.0 / total)
}

/// Decodes one raw output line, dropping the line terminator and replacing
/// invalid UTF-8 with U+FFFD.
pub fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Line reader over process output that never fails on undecodable bytes.
///
/// A partially read line stays buffered when `next_line` is cancelled, so it
/// can be polled from `tokio::select!`.
pub struct LossyLines<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LossyLines<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// The next line, or `None` at end of stream.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let read = self.reader.read_until(b'\n', &mut self.buf).await?;
        if read == 0 && self.buf.is_empty() {
            return Ok(None);
        }
        let line = decode_line(&self.buf);
        self.buf.clear();
        Ok(Some(line))
    }
}

/// `[YYYY-MM-DD HH:MM:SS] message`
pub fn timestamp_line(message: &str) -> String {
    format!("[{}] {}", Utc::now().format("%Y-%m-%d %H:%M:%S"), message)
}

/// Append-only job log.
#[derive(Debug, Clone)]
pub struct JobLog {
    path: PathBuf,
}

impl JobLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, message: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let mut line = timestamp_line(message);
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }

    /// Appends, logging instead of failing.
    pub async fn note(&self, message: &str) {
        if let Err(e) = self.append(message).await {
            tracing::warn!(log = %self.path.display(), error = %e, "Failed to write job log");
        }
    }

    /// The last `lines` lines. `None` when the log does not exist yet.
    pub async fn tail(&self, lines: usize) -> std::io::Result<Option<String>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let all: Vec<&str> = content.lines().collect();
        let start = all.len().saturating_sub(lines);
        Ok(Some(all[start..].join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress() {
        assert_eq!(parse_progress("step 50/100"), Some(50.0));
        assert_eq!(parse_progress("INFO step 1/4 loss=0.3"), Some(25.0));
        assert_eq!(parse_progress("step 5/0"), None);
        assert_eq!(parse_progress("stepping along"), None);
        assert_eq!(parse_progress("loss 1/2"), None);
    }

    #[test]
    fn test_decode_line_replaces_invalid_bytes() {
        assert_eq!(decode_line(b"step 1/2\r\n"), "step 1/2");
        assert_eq!(decode_line(b"\xff ok\n"), "\u{FFFD} ok");
        assert_eq!(decode_line(b"no newline"), "no newline");
    }

    #[tokio::test]
    async fn test_lossy_lines_keep_reading_past_bad_bytes() {
        let input: &[u8] = b"start\n\xff\xfe\n\nstep 3/4";
        let mut lines = LossyLines::new(input);

        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("start"));
        assert_eq!(
            lines.next_line().await.unwrap().as_deref(),
            Some("\u{FFFD}\u{FFFD}")
        );
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some(""));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("step 3/4"));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[test]
    fn test_timestamp_line_format() {
        let line = timestamp_line("hello");
        assert!(line.starts_with('['));
        assert_eq!(&line[20..], "] hello");
    }

    #[tokio::test]
    async fn test_log_append_and_tail() {
        let dir = tempfile::tempdir().unwrap();
        let log = JobLog::new(dir.path().join("job/train.log"));
        assert!(log.tail(5).await.unwrap().is_none());

        for i in 0..5 {
            log.append(&format!("line {}", i)).await.unwrap();
        }
        let tail = log.tail(2).await.unwrap().unwrap();
        let lines: Vec<&str> = tail.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("line 3"));
        assert!(lines[1].ends_with("line 4"));
    }
}
