//! Last-line / LLU cache for the frame view.
//!
//! The frame tree asks for `(last log line, seconds since log update)` on
//! every repaint; this buffer answers immediately from cache and refreshes
//! entries older than [`LOG_TTL_SECS`] through the work pool. Switching
//! the monitored job drops the whole cache, as does a backed-up pending
//! sub-queue (more in flight than the pool can even hold).

use super::{frame_log_path, read_tail};
use crate::model::{EntityKey, Frame, Job, Keyed};
use crate::pool::{UiCallback, WorkPool};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

pub const LOG_TTL_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub last_line: String,
    /// Seconds since the log was written; -1 while unknown.
    pub llu_secs: i64,
}

impl LogEntry {
    fn placeholder() -> LogEntry {
        LogEntry {
            last_line: String::new(),
            llu_secs: -1,
        }
    }
}

struct Slot {
    last_access: Instant,
    value: LogEntry,
}

struct State {
    job_id: Option<Uuid>,
    entries: HashMap<EntityKey, Slot>,
    pending: HashSet<EntityKey>,
}

pub struct LogBuffer {
    state: Mutex<State>,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBuffer {
    pub fn new() -> LogBuffer {
        LogBuffer {
            state: Mutex::new(State {
                job_id: None,
                entries: HashMap::new(),
                pending: HashSet::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Cached value for a frame, scheduling a refresh as needed. Always
    /// returns immediately.
    pub fn get(self: &Arc<Self>, pool: &WorkPool, job: &Job, frame: &Frame) -> LogEntry {
        let key = frame.key();
        let path = frame_log_path(job, frame);
        let mut state = self.lock();

        if state.job_id != Some(job.id) {
            state.entries.clear();
            state.pending.clear();
            state.job_id = Some(job.id);
        }
        if state.pending.len() > pool.max_queue() {
            // The pool cannot even hold what we think is in flight;
            // something is backed up, start over.
            state.entries.clear();
            state.pending.clear();
        }

        if let Some(slot) = state.entries.get_mut(&key) {
            let value = slot.value.clone();
            if slot.last_access.elapsed().as_secs() > LOG_TTL_SECS {
                slot.last_access = Instant::now();
                self.enqueue(&mut state, pool, key, path);
            }
            return value;
        }

        state.entries.insert(
            key.clone(),
            Slot {
                last_access: Instant::now(),
                value: LogEntry::placeholder(),
            },
        );
        self.enqueue(&mut state, pool, key, path);
        LogEntry::placeholder()
    }

    fn enqueue(
        self: &Arc<Self>,
        state: &mut State,
        pool: &WorkPool,
        key: EntityKey,
        path: std::path::PathBuf,
    ) {
        if !state.pending.insert(key.clone()) {
            return;
        }
        let buffer = self.clone();
        let label = format!("logtail:{}", key);
        pool.queue(&label, move || {
            let value = match read_tail(&path) {
                Ok((last_line, llu_secs)) => LogEntry {
                    last_line,
                    llu_secs,
                },
                // Log not written yet, or unreadable: cache the miss so we
                // do not hammer the filesystem until the TTL passes.
                Err(_) => LogEntry::placeholder(),
            };
            Ok(Some(Box::new(move || {
                buffer.store(key, value);
            }) as UiCallback))
        });
    }

    /// Delivery path. A key that vanished (job switched mid-flight) is
    /// silently ignored.
    fn store(&self, key: EntityKey, value: LogEntry) {
        let mut state = self.lock();
        state.pending.remove(&key);
        if let Some(slot) = state.entries.get_mut(&key) {
            slot.value = value;
            slot.last_access = Instant::now();
        }
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.pending.clear();
        state.job_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FrameState;
    use crate::rpc::fake;
    use crossbeam::channel;
    use std::io::Write;
    use std::thread;
    use std::time::Duration;

    fn pump(rx: channel::Receiver<crate::pool::Delivery>) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            for d in rx.iter() {
                d.run();
            }
        })
    }

    fn staged_frame(dir: &std::path::Path) -> (crate::model::Job, Frame) {
        let mut job = fake::job("testing-sh010-render", "testing", "u");
        job.log_dir = dir.to_string_lossy().into_owned();
        let layer = fake::layer("render", job.id);
        let frame = fake::frame(1, &layer, FrameState::Running);
        let path = frame_log_path(&job, &frame);
        let mut f = std::fs::File::create(path).unwrap();
        write!(f, "first\nsecond\nthird\n").unwrap();
        (job, frame)
    }

    #[test]
    fn miss_returns_placeholder_then_fills() {
        let dir = tempfile::tempdir().unwrap();
        let (job, frame) = staged_frame(dir.path());
        let (pool, rx) = WorkPool::new(1, 10);
        let ui = pump(rx);
        let buffer = Arc::new(LogBuffer::new());

        let first = buffer.get(&pool, &job, &frame);
        assert_eq!(first, LogEntry::placeholder());

        for _ in 0..500 {
            if buffer.pending_len() == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        let cached = buffer.get(&pool, &job, &frame);
        assert_eq!(cached.last_line, "third");
        assert!(cached.llu_secs >= 0);

        pool.shutdown();
        drop(pool);
        ui.join().unwrap();
    }

    #[test]
    fn job_switch_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let (job, frame) = staged_frame(dir.path());
        let (pool, rx) = WorkPool::new(1, 10);
        let ui = pump(rx);
        let buffer = Arc::new(LogBuffer::new());

        buffer.get(&pool, &job, &frame);
        for _ in 0..500 {
            if buffer.pending_len() == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(buffer.len(), 1);

        let other = fake::job("testing-sh020-other", "testing", "u");
        let layer = fake::layer("comp", other.id);
        let other_frame = fake::frame(1, &layer, FrameState::Running);
        let entry = buffer.get(&pool, &other, &other_frame);
        assert_eq!(entry, LogEntry::placeholder());
        // The old job's entries are gone.
        assert_eq!(buffer.len(), 1);

        pool.shutdown();
        drop(pool);
        ui.join().unwrap();
    }

    #[test]
    fn late_delivery_for_dropped_key_is_ignored() {
        let buffer = Arc::new(LogBuffer::new());
        buffer.store(
            EntityKey::new(crate::model::EntityKind::Frame, Uuid::new_v4()),
            LogEntry {
                last_line: "stale".to_string(),
                llu_secs: 3,
            },
        );
        assert!(buffer.is_empty());
    }
}
