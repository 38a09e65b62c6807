//! tracing 初始化 + 供 /log 端点使用的内存日志环
//!
//! Formatted log lines are teed into a bounded in-memory ring so the
//! unauthenticated `/log` endpoint can serve recent activity without
//! touching the filesystem.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::constants::LOG_RING_CAPACITY;

static LOG_RING: Lazy<Mutex<VecDeque<String>>> =
    Lazy::new(|| Mutex::new(VecDeque::with_capacity(LOG_RING_CAPACITY)));

struct TeeWriter;

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = io::stdout().write(buf)?;
        if let Ok(line) = std::str::from_utf8(buf) {
            let line = line.trim_end();
            if !line.is_empty() {
                let mut ring = LOG_RING.lock().unwrap();
                if ring.len() >= LOG_RING_CAPACITY {
                    ring.pop_front();
                }
                ring.push_back(line.to_string());
            }
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}

struct TeeMakeWriter;

impl<'a> MakeWriter<'a> for TeeMakeWriter {
    type Writer = TeeWriter;

    fn make_writer(&'a self) -> Self::Writer {
        TeeWriter
    }
}

pub fn init_logger() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,grazie_relay=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(TeeMakeWriter)
        .init();
}

/// Most recent log lines, newest first.
pub fn recent_logs(limit: usize) -> Vec<String> {
    let ring = LOG_RING.lock().unwrap();
    ring.iter().rev().take(limit).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_is_bounded_and_newest_first() {
        for i in 0..LOG_RING_CAPACITY + 10 {
            let mut writer = TeeWriter;
            let _ = writer.write(format!("line {}\n", i).as_bytes());
        }
        let logs = recent_logs(5);
        assert_eq!(logs.len(), 5);
        // Newest entry comes back first.
        assert!(logs[0].ends_with(&format!("line {}", LOG_RING_CAPACITY + 9)));
        let ring = LOG_RING.lock().unwrap();
        assert!(ring.len() <= LOG_RING_CAPACITY);
    }
}
