use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tnt_common::TntError;

use crate::{MESSAGE_MAX_BYTES, USERNAME_MAX_BYTES};

const CHUNK_SIZE: usize = 4096;
const FUTURE_SLACK: Duration = Duration::days(1);
const PAST_SLACK_YEARS: i64 = 10;

/// One line of chat history: `<RFC3339-UTC>|<username>|<content>\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub timestamp: OffsetDateTime,
    pub username: String,
    pub content: String,
}

impl Message {
    pub fn new(username: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            username: username.into(),
            content: content.into(),
        }
    }
}

fn sanitize(s: &str, forbidden: &[char], replacement: char) -> String {
    s.chars()
        .map(|c| if forbidden.contains(&c) { replacement } else { c })
        .collect()
}

/// Append-only log on disk; opened lazily on the first write rather than
/// held open for the process lifetime.
#[derive(Debug, Clone)]
pub struct MessageLog {
    path: PathBuf,
}

impl MessageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Appends `msg` as one sanitized line. A missing parent directory or a
    /// permission error surfaces to the caller; the in-memory broadcast is
    /// unaffected either way.
    pub fn append(&self, msg: &Message) -> Result<(), TntError> {
        let username = sanitize(&msg.username, &['|', '\n', '\r'], '_');
        let content = sanitize(&msg.content, &['|', '\n', '\r'], ' ');
        let timestamp = msg
            .timestamp
            .format(&Rfc3339)
            .map_err(|e| TntError::Log(e.to_string()))?;
        let line = format!("{timestamp}|{username}|{content}\n");

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Loads the most recent `max` valid records. Scans backward from EOF in
    /// fixed-size chunks counting line terminators rather than reading the
    /// whole file, so memory use is independent of file size. A missing file
    /// is an empty log, not an error.
    pub fn replay(&self, max: usize) -> Result<VecDeque<Message>, TntError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(VecDeque::new()),
            Err(e) => return Err(e.into()),
        };
        if max == 0 {
            return Ok(VecDeque::new());
        }
        let start_offset = Self::find_replay_offset(&file, max)?;

        let mut file = file;
        file.seek(SeekFrom::Start(start_offset))?;
        let reader = BufReader::new(file);
        let now = OffsetDateTime::now_utc();

        let mut messages = VecDeque::with_capacity(max);
        for line in reader.lines() {
            let line = line?;
            if let Some(msg) = Self::parse_line(&line, now) {
                messages.push_back(msg);
                if messages.len() > max {
                    messages.pop_front();
                }
            }
        }
        Ok(messages)
    }

    fn find_replay_offset(file: &File, max: usize) -> Result<u64, TntError> {
        let file_len = file.metadata()?.len();
        if file_len == 0 {
            return Ok(0);
        }

        let mut file = file.try_clone()?;
        let mut newlines_found = 0usize;
        let mut pos = file_len;
        let mut buf = vec![0u8; CHUNK_SIZE];

        while pos > 0 {
            let read_size = std::cmp::min(CHUNK_SIZE as u64, pos) as usize;
            pos -= read_size as u64;
            file.seek(SeekFrom::Start(pos))?;
            file.read_exact(&mut buf[..read_size])?;

            for i in (0..read_size).rev() {
                if buf[i] != b'\n' {
                    continue;
                }
                let absolute = pos + i as u64;
                if absolute == file_len - 1 {
                    // trailing newline terminates the last line, it doesn't
                    // separate two lines.
                    continue;
                }
                newlines_found += 1;
                if newlines_found >= max {
                    return Ok(absolute + 1);
                }
            }
        }
        Ok(0)
    }

    fn parse_line(line: &str, now: OffsetDateTime) -> Option<Message> {
        let mut parts = line.splitn(3, '|');
        let ts_str = parts.next()?;
        let username = parts.next()?;
        let content = parts.next()?;

        if username.is_empty() || username.len() > USERNAME_MAX_BYTES {
            return None;
        }
        if content.len() > MESSAGE_MAX_BYTES {
            return None;
        }

        let timestamp = OffsetDateTime::parse(ts_str, &Rfc3339).ok()?;
        if timestamp > now + FUTURE_SLACK {
            return None;
        }
        if timestamp < now - Duration::days(365 * PAST_SLACK_YEARS) {
            return None;
        }

        Some(Message {
            timestamp,
            username: username.to_string(),
            content: content.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_log_path(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("tnt-test-{name}-{}.log", std::process::id()));
        p
    }

    #[test]
    fn missing_log_replays_empty() {
        let path = temp_log_path("missing");
        let _ = std::fs::remove_file(&path);
        let log = MessageLog::new(&path);
        assert!(log.replay(100).unwrap().is_empty());
    }

    #[test]
    fn append_then_replay_round_trips() {
        let path = temp_log_path("roundtrip");
        let _ = std::fs::remove_file(&path);
        let log = MessageLog::new(&path);

        log.append(&Message::new("alice", "hello")).unwrap();
        log.append(&Message::new("bob", "hi back")).unwrap();

        let replayed = log.replay(100).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[1].username, "bob");
        assert_eq!(replayed[1].content, "hi back");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn replay_honors_history_cap_on_large_logs() {
        let path = temp_log_path("cap");
        let _ = std::fs::remove_file(&path);
        let log = MessageLog::new(&path);

        for i in 0..250 {
            log.append(&Message::new("a", format!("msg {i}"))).unwrap();
        }

        let replayed = log.replay(100).unwrap();
        assert_eq!(replayed.len(), 100);
        assert_eq!(replayed.back().unwrap().content, "msg 249");
        assert_eq!(replayed.front().unwrap().content, "msg 150");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn malformed_lines_are_skipped_not_fatal() {
        let path = temp_log_path("malformed");
        let _ = std::fs::remove_file(&path);
        {
            let mut f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .unwrap();
            writeln!(f, "not-a-valid-line").unwrap();
            writeln!(f, "2024-01-01T00:00:00Z|alice").unwrap();
            writeln!(f, "garbage-timestamp|alice|hello").unwrap();
        }
        let log = MessageLog::new(&path);
        let replayed = log.replay(100).unwrap();
        assert!(replayed.is_empty());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn sanitizes_pipes_and_newlines_on_write() {
        let path = temp_log_path("sanitize");
        let _ = std::fs::remove_file(&path);
        let log = MessageLog::new(&path);
        log.append(&Message::new("a|b", "x\ny|z")).unwrap();
        let replayed = log.replay(10).unwrap();
        assert_eq!(replayed[0].username, "a_b");
        assert_eq!(replayed[0].content, "x y z");

        let _ = std::fs::remove_file(&path);
    }
}
