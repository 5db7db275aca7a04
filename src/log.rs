//! The operational log channel.
//!
//! `spec.md` §6 routes user-facing operational lines ("sensor N opened a
//! connection", threshold alerts, "connection to SQL server lost"...)
//! through a separate log-writer process reached over a named pipe; that
//! process prepends a sequence number and a local timestamp before
//! appending to `gateway.log`. The transport (the pipe, the child
//! process) is an external collaborator and out of scope here — but the
//! discipline around it is not: `spec.md` §5 requires the channel be
//! serialised by its own lock and each line written atomically.
//!
//! Per the redesign note in `spec.md` §9 ("the log channel is an
//! explicit handle cloned to each thread that writes"), this rewrite
//! collapses the pipe and the child process into one `LogChannel`: a
//! `Mutex`-guarded writer, `Clone`-able, handed to every manager thread
//! that needs to log a user-facing line. It reproduces the external
//! process's documented formatting exactly (sequence number, local
//! timestamp, truncation to `log_length` characters, one flushed line per
//! call) without the process boundary.
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Local;

struct Inner {
    writer: Mutex<File>,
    sequence: AtomicU64,
    log_length: usize,
}

/// A cloneable handle to the operational log.
#[derive(Clone)]
pub struct LogChannel {
    inner: Arc<Inner>,
}

impl LogChannel {
    /// Open (creating/truncating) the log file at `path`.
    pub fn open(path: impl AsRef<Path>, log_length: usize) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            inner: Arc::new(Inner {
                writer: Mutex::new(file),
                sequence: AtomicU64::new(0),
                log_length,
            }),
        })
    }

    /// Write one operational line: `"<seq> <local timestamp> <message>"`,
    /// truncated to the configured length, flushed before returning.
    pub fn log(&self, message: &str) {
        let seq = self.inner.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut line = format!("{seq} {timestamp} {message}\n");
        if line.len() > self.inner.log_length {
            line.truncate(self.inner.log_length.saturating_sub(1));
            line.push('\n');
        }

        let mut writer = self.inner.writer.lock().unwrap();
        if writer.write_all(line.as_bytes()).is_ok() {
            let _ = writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::thread;

    #[test]
    fn writes_sequence_and_message() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let log = LogChannel::open(file.path(), 500).unwrap();
        log.log("hello");
        log.log("world");

        let mut contents = String::new();
        File::open(file.path())
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("1 "));
        assert!(lines[0].ends_with("hello"));
        assert!(lines[1].starts_with("2 "));
    }

    #[test]
    fn truncates_to_log_length() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let log = LogChannel::open(file.path(), 20).unwrap();
        log.log("this message is far longer than twenty characters");

        let mut contents = String::new();
        File::open(file.path())
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert!(contents.len() <= 20);
    }

    #[test]
    fn concurrent_writers_never_interleave_a_line() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let log = LogChannel::open(file.path(), 500).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = log.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        log.log(&format!("thread-{i}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut contents = String::new();
        File::open(file.path())
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents.lines().count(), 400);
        for line in contents.lines() {
            let parts: Vec<_> = line.splitn(3, ' ').collect();
            assert_eq!(parts.len(), 3);
            assert!(parts[2].starts_with("thread-"));
        }
    }
}
