//! Log Tail Streamer - follows a growing training log
//!
//! Each stream owns its own byte offset and polls the file on a fixed
//! interval. Only complete lines are emitted while the run is live; once a
//! terminal status is observed the remainder (including an unterminated last
//! line) is flushed and a single `Done` event ends the stream.
//!
//! `\n`, `\r` and `\r\n` all end a line, so progress bars that redraw with a
//! carriage return stream one event per update. Events carry line text only:
//! joining them reproduces the log up to its line terminators, and invalid
//! UTF-8 is replaced with U+FFFD.
//!
//! Dropping the stream cancels it. The file is reopened on every tick, so
//! nothing is held open between ticks.

use std::collections::VecDeque;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use futures::stream;
use log::{debug, warn};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::domain::RunStatus;
use crate::registry::LiveStatusRegistry;

/// One event in a log stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TailEvent {
    /// A line appended to the log, without its newline
    Line { line: String },
    /// The run reached a terminal status, or has no live owner
    Done {
        done: bool,
        status: RunStatus,
        /// The run was left unfinished by a previous process
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        interrupted: bool,
    },
}

impl TailEvent {
    pub fn line(line: impl Into<String>) -> Self {
        TailEvent::Line { line: line.into() }
    }

    pub fn done(status: RunStatus) -> Self {
        TailEvent::Done {
            done: true,
            status,
            interrupted: false,
        }
    }

    pub fn interrupted(status: RunStatus) -> Self {
        TailEvent::Done {
            done: true,
            status,
            interrupted: true,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, TailEvent::Done { .. })
    }
}

/// What to conclude when the registry has no entry for the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fallback {
    /// Persisted status is terminal: finish with it
    Terminal(RunStatus),
    /// Persisted status is non-terminal and no process owns the run
    Stale(RunStatus),
    /// The run was just submitted by this process; keep polling
    Wait,
}

/// Per-observer tail state
pub struct LogTail {
    run_id: i64,
    path: PathBuf,
    offset: u64,
    registry: Arc<LiveStatusRegistry>,
    fallback: Fallback,
    interval: Duration,
    first_tick: bool,
}

impl LogTail {
    pub fn new(
        run_id: i64,
        path: impl Into<PathBuf>,
        registry: Arc<LiveStatusRegistry>,
        fallback: Fallback,
        interval: Duration,
    ) -> Self {
        Self {
            run_id,
            path: path.into(),
            offset: 0,
            registry,
            fallback,
            interval,
            first_tick: true,
        }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read new lines since the last call.
    ///
    /// Without `flush`, a trailing partial line is left for the next read.
    pub async fn read_new_lines(&mut self, flush: bool) -> Vec<String> {
        match self.read_chunk(flush).await {
            Ok(lines) => lines,
            Err(e) => {
                warn!("Failed to read log {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    async fn read_chunk(&mut self, flush: bool) -> std::io::Result<Vec<String>> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let len = file.metadata().await?.len();
        if len < self.offset {
            debug!("Log {} shrank, restarting from the top", self.path.display());
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset)).await?;
        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        file.read_to_end(&mut buf).await?;

        let consumed = if flush { buf.len() } else { complete_len(&buf) };
        self.offset += consumed as u64;

        Ok(split_lines(&buf[..consumed]))
    }

    /// Terminal event if the run is finished (or unowned), else None.
    fn terminal_event(&self) -> Option<TailEvent> {
        match self.registry.observe(self.run_id) {
            Some(entry) if entry.status.is_terminal() => Some(TailEvent::done(entry.status)),
            Some(_) => None,
            None => match self.fallback {
                Fallback::Terminal(status) => Some(TailEvent::done(status)),
                Fallback::Stale(status) => Some(TailEvent::interrupted(status)),
                Fallback::Wait => None,
            },
        }
    }

    /// One poll: returns the events produced and whether the stream is over.
    pub async fn tick(&mut self) -> (Vec<TailEvent>, bool) {
        if self.first_tick {
            self.first_tick = false;
        } else {
            tokio::time::sleep(self.interval).await;
        }

        let mut events: Vec<TailEvent> = self.read_new_lines(false).await.into_iter().map(TailEvent::line).collect();

        match self.terminal_event() {
            Some(done) => {
                // The worker has exited; pick up anything written after the read above
                events.extend(self.read_new_lines(true).await.into_iter().map(TailEvent::line));
                events.push(done);
                (events, true)
            }
            None => (events, false),
        }
    }

    /// Turn the tail into a lazy stream of events ending with `Done`.
    pub fn into_stream(self) -> impl Stream<Item = TailEvent> + Send {
        stream::unfold((self, VecDeque::new(), false), |(mut tail, mut queue, mut finished)| async move {
            loop {
                if let Some(event) = queue.pop_front() {
                    return Some((event, (tail, queue, finished)));
                }
                if finished {
                    debug!("Log stream for run {} finished", tail.run_id);
                    return None;
                }
                let (events, over) = tail.tick().await;
                queue.extend(events);
                finished = over;
            }
        })
    }
}

fn is_line_end(byte: &u8) -> bool {
    *byte == b'\n' || *byte == b'\r'
}

/// Length of the leading run of complete lines.
///
/// A final `\r` is held back: the next read may start with its `\n`.
fn complete_len(buf: &[u8]) -> usize {
    match buf.iter().rposition(is_line_end) {
        Some(pos) if buf[pos] == b'\r' && pos + 1 == buf.len() => {
            buf[..pos].iter().rposition(is_line_end).map_or(0, |prev| prev + 1)
        }
        Some(pos) => pos + 1,
        None => 0,
    }
}

/// Split on `\n`, `\r` and `\r\n`. A trailing terminator adds no empty line.
fn split_lines(bytes: &[u8]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if is_line_end(&bytes[i]) {
            lines.push(String::from_utf8_lossy(&bytes[start..i]).into_owned());
            if bytes[i] == b'\r' && bytes.get(i + 1) == Some(&b'\n') {
                i += 1;
            }
            start = i + 1;
        }
        i += 1;
    }
    if start < bytes.len() {
        lines.push(String::from_utf8_lossy(&bytes[start..]).into_owned());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::path::Path;
    use std::io::Write;
    use tempfile::TempDir;

    fn tail(path: &Path, registry: &Arc<LiveStatusRegistry>, fallback: Fallback) -> LogTail {
        LogTail::new(1, path, Arc::clone(registry), fallback, Duration::from_millis(10))
    }

    #[test]
    fn test_split_lines() {
        assert_eq!(split_lines(b"a\nb\n"), vec!["a", "b"]);
        assert_eq!(split_lines(b"a\r\n\nb"), vec!["a", "", "b"]);
        assert_eq!(split_lines(b"10%\r20%\r30%\n"), vec!["10%", "20%", "30%"]);
        assert_eq!(split_lines(b"a\r\rb"), vec!["a", "", "b"]);
        assert!(split_lines(b"").is_empty());
    }

    #[test]
    fn test_complete_len() {
        assert_eq!(complete_len(b"a\nb"), 2);
        assert_eq!(complete_len(b"10%\r20%"), 4);
        assert_eq!(complete_len(b"a\nb\r"), 2);
        assert_eq!(complete_len(b"a\r\n"), 3);
        assert_eq!(complete_len(b"\r"), 0);
        assert_eq!(complete_len(b"partial"), 0);
    }

    #[test]
    fn test_event_wire_format() {
        assert_eq!(
            serde_json::to_string(&TailEvent::line("epoch 1")).unwrap(),
            "{\"line\":\"epoch 1\"}"
        );
        assert_eq!(
            serde_json::to_string(&TailEvent::done(RunStatus::Success)).unwrap(),
            "{\"done\":true,\"status\":\"success\"}"
        );
        assert_eq!(
            serde_json::to_string(&TailEvent::interrupted(RunStatus::Running)).unwrap(),
            "{\"done\":true,\"status\":\"running\",\"interrupted\":true}"
        );
    }

    #[tokio::test]
    async fn test_crlf_split_across_reads_is_one_line_end() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("train_1.log");
        let registry = Arc::new(LiveStatusRegistry::new());
        let mut tail = tail(&path, &registry, Fallback::Wait);

        std::fs::write(&path, "first\r").unwrap();
        assert!(tail.read_new_lines(false).await.is_empty());
        assert_eq!(tail.offset(), 0);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "\nsecond\n").unwrap();
        assert_eq!(tail.read_new_lines(false).await, vec!["first", "second"]);
        assert_eq!(tail.offset(), 14);
    }

    #[tokio::test]
    async fn test_carriage_return_progress_streams_while_live() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("train_1.log");
        std::fs::write(&path, " 10%|#   | 1/10\r 20%|##  | 2/10\r 30%|### | 3/10").unwrap();
        let registry = Arc::new(LiveStatusRegistry::new());
        registry.register(1, &path);

        let mut stream = Box::pin(tail(&path, &registry, Fallback::Wait).into_stream());
        let first = tokio::time::timeout(Duration::from_millis(300), stream.next()).await;
        assert_eq!(first.unwrap(), Some(TailEvent::line(" 10%|#   | 1/10")));
        assert_eq!(stream.next().await, Some(TailEvent::line(" 20%|##  | 2/10")));

        // The bar still being drawn is held until the run ends
        let held = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(held.is_err());

        registry.finish(1, RunStatus::Success);
        let rest: Vec<TailEvent> = stream.collect().await;
        assert_eq!(
            rest,
            vec![TailEvent::line(" 30%|### | 3/10"), TailEvent::done(RunStatus::Success)]
        );
    }

    #[tokio::test]
    async fn test_partial_line_waits_for_newline() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("train_1.log");
        let registry = Arc::new(LiveStatusRegistry::new());
        let mut tail = tail(&path, &registry, Fallback::Wait);

        assert!(tail.read_new_lines(false).await.is_empty());

        std::fs::write(&path, "first\nsec").unwrap();
        assert_eq!(tail.read_new_lines(false).await, vec!["first"]);
        assert_eq!(tail.offset(), 6);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "ond\n").unwrap();
        assert_eq!(tail.read_new_lines(false).await, vec!["second"]);
        assert_eq!(tail.offset(), 13);
    }

    #[tokio::test]
    async fn test_offset_counts_bytes_not_chars() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("train_1.log");
        let registry = Arc::new(LiveStatusRegistry::new());
        let mut tail = tail(&path, &registry, Fallback::Wait);

        std::fs::write(&path, "λoss → 0.5\n").unwrap();
        assert_eq!(tail.read_new_lines(false).await, vec!["λoss → 0.5"]);
        assert_eq!(tail.offset(), "λoss → 0.5\n".len() as u64);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "next\n").unwrap();
        assert_eq!(tail.read_new_lines(false).await, vec!["next"]);
    }

    #[tokio::test]
    async fn test_stream_ends_with_registry_status() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("train_1.log");
        std::fs::write(&path, "epoch 0\nepoch 1\nunterminated").unwrap();

        let registry = Arc::new(LiveStatusRegistry::new());
        registry.register(1, &path);
        registry.finish(1, RunStatus::Success);

        let events: Vec<TailEvent> = tail(&path, &registry, Fallback::Wait).into_stream().collect().await;
        assert_eq!(
            events,
            vec![
                TailEvent::line("epoch 0"),
                TailEvent::line("epoch 1"),
                TailEvent::line("unterminated"),
                TailEvent::done(RunStatus::Success),
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_follows_growing_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("train_1.log");
        let registry = Arc::new(LiveStatusRegistry::new());
        registry.register(1, &path);

        let writer_path = path.clone();
        let writer_registry = Arc::clone(&registry);
        let writer = tokio::spawn(async move {
            let mut file = std::fs::File::create(&writer_path).unwrap();
            for i in 0..20 {
                write!(file, "line {}\n", i).unwrap();
                if i % 3 == 0 {
                    write!(file, "half-").unwrap();
                    tokio::time::sleep(Duration::from_millis(7)).await;
                    write!(file, "done {}\n", i).unwrap();
                }
                tokio::time::sleep(Duration::from_millis(3)).await;
            }
            writer_registry.finish(1, RunStatus::Failed);
        });

        let events: Vec<TailEvent> = tail(&path, &registry, Fallback::Wait).into_stream().collect().await;
        writer.await.unwrap();

        let (done, lines) = events.split_last().unwrap();
        assert_eq!(*done, TailEvent::done(RunStatus::Failed));
        let text: String = lines
            .iter()
            .map(|e| match e {
                TailEvent::Line { line } => format!("{}\n", line),
                other => panic!("unexpected event {:?}", other),
            })
            .collect();
        assert_eq!(text, std::fs::read_to_string(&path).unwrap());
    }

    #[tokio::test]
    async fn test_unregistered_terminal_run_replays_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("train_1.log");
        std::fs::write(&path, "a\nb\n").unwrap();
        let registry = Arc::new(LiveStatusRegistry::new());

        let events: Vec<TailEvent> = tail(&path, &registry, Fallback::Terminal(RunStatus::Success))
            .into_stream()
            .collect()
            .await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], TailEvent::done(RunStatus::Success));
    }

    #[tokio::test]
    async fn test_stale_run_is_flagged_interrupted() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.log");
        let registry = Arc::new(LiveStatusRegistry::new());

        let events: Vec<TailEvent> = tail(&path, &registry, Fallback::Stale(RunStatus::Pending))
            .into_stream()
            .collect()
            .await;
        assert_eq!(events, vec![TailEvent::interrupted(RunStatus::Pending)]);
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("train_1.log");
        std::fs::write(&path, "only line\n").unwrap();
        let registry = Arc::new(LiveStatusRegistry::new());
        registry.register(1, &path);

        let mut stream = Box::pin(tail(&path, &registry, Fallback::Wait).into_stream());
        assert_eq!(stream.next().await, Some(TailEvent::line("only line")));

        let next = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(next.is_err(), "live run should keep the stream open");
        drop(stream);
    }
}
