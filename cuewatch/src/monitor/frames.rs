//! Frame tree for the currently monitored job.
//!
//! Frame queries are paged (500 per page) and filtered by layer, state and
//! range. Two refresh flavors exist: a full snapshot replacing the tree,
//! and a cheaper changed-since query merged in place. The flavor is picked
//! by tick bucket: changed-since on the regular interval, full once
//! [`FULL_REFRESH_AFTER_TICKS`] have passed since the last full one. A
//! changed-since request the server rejects for clock skew forces the next
//! refresh to be full without touching the selection.

use super::{ColumnModel, Delegate, Monitor, MonitorCore, SortKey};
use crate::model::{format_duration, format_mem, parse_last_resource, Frame, FrameState, Job};
use crate::pool::TickScheduler;
use crate::rpc::{CueClient, CueError, FrameSearch, FRAME_PAGE_SIZE};

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use uuid::Uuid;

/// Changed-since refreshes run on this tick interval.
pub const CHANGED_REFRESH_AFTER_TICKS: u32 = 10;

/// A full snapshot replaces the tree after this many ticks. Both values
/// are tuning constants; the cadence (one full per three changed) is what
/// matters, not the numbers.
pub const FULL_REFRESH_AFTER_TICKS: u32 = 30;

/// Overlap subtracted from changed-since timestamps so frames finishing
/// right at the boundary are not missed.
const CHANGED_SINCE_MARGIN_SECS: u64 = 5;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameFilters {
    pub layers: Vec<String>,
    pub states: Vec<FrameState>,
    pub range: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct PendingFetch {
    job_id: Uuid,
    full: bool,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub struct FrameMonitor {
    core: MonitorCore<Frame>,
    columns: ColumnModel<Frame>,
    job: Mutex<Option<Job>>,
    filters: Mutex<FrameFilters>,
    page: AtomicU32,
    /// Unix time of the last successful refresh of either flavor.
    last_update: AtomicU64,
    last_full_tick: AtomicU64,
    force_full: AtomicBool,
    /// Written worker-side right before the fetch, read by the merge.
    /// Safe because deliveries are serialized and deduped per label.
    pending: Mutex<Option<PendingFetch>>,
}

impl Default for FrameMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameMonitor {
    pub fn new() -> FrameMonitor {
        FrameMonitor {
            core: MonitorCore::new(
                "refresh:Frames",
                TickScheduler::new(CHANGED_REFRESH_AFTER_TICKS),
            ),
            columns: frame_columns(),
            job: Mutex::new(None),
            filters: Mutex::new(FrameFilters::default()),
            page: AtomicU32::new(1),
            last_update: AtomicU64::new(0),
            last_full_tick: AtomicU64::new(0),
            force_full: AtomicBool::new(false),
            pending: Mutex::new(None),
        }
    }

    pub fn columns(&self) -> &ColumnModel<Frame> {
        &self.columns
    }

    pub fn job(&self) -> Option<Job> {
        self.job.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Bind the tree to a job (or none). Rebinding drops everything.
    pub fn set_job(&self, job: Option<Job>) {
        let mut slot = self.job.lock().unwrap_or_else(|p| p.into_inner());
        let changed = slot.as_ref().map(|j| j.id) != job.as_ref().map(|j| j.id);
        *slot = job;
        drop(slot);
        if changed {
            self.core.registry.remove_all();
            self.page.store(1, Ordering::Relaxed);
            self.last_update.store(0, Ordering::Relaxed);
            self.force_full.store(true, Ordering::Relaxed);
            self.core.update_soon();
        }
    }

    pub fn set_filters(&self, filters: FrameFilters) {
        *self.filters.lock().unwrap_or_else(|p| p.into_inner()) = filters;
        self.force_full.store(true, Ordering::Relaxed);
        self.core.update_soon();
    }

    pub fn filters(&self) -> FrameFilters {
        self.filters.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn set_page(&self, page: u32) {
        self.page.store(page.max(1), Ordering::Relaxed);
        self.force_full.store(true, Ordering::Relaxed);
        self.core.update_soon();
    }

    pub fn page(&self) -> u32 {
        self.page.load(Ordering::Relaxed)
    }

    /// Reset filters, paging and all accumulated suppression state.
    pub fn clear_filters(&self) {
        *self.filters.lock().unwrap_or_else(|p| p.into_inner()) = FrameFilters::default();
        self.page.store(1, Ordering::Relaxed);
        self.force_full.store(true, Ordering::Relaxed);
        self.core.with_ticker(|t| t.clear());
    }

    /// The search the current state implies, used for bulk frame actions
    /// (retry/eat/kill selected layers or states).
    pub fn current_search(&self) -> Option<FrameSearch> {
        let job = self.job()?;
        let filters = self.filters();
        let mut search = FrameSearch::for_job(job.id);
        search.layers = filters.layers;
        search.states = filters.states;
        search.range = filters.range;
        search.page = self.page();
        search.limit = FRAME_PAGE_SIZE;
        Some(search)
    }
}

impl Monitor for FrameMonitor {
    type Entity = Frame;

    fn core(&self) -> &MonitorCore<Frame> {
        &self.core
    }

    fn get_update(&self, client: &dyn CueClient) -> Result<Vec<Frame>, CueError> {
        let job = match self.job() {
            Some(job) => job,
            None => return Ok(Vec::new()),
        };
        let total_ticks = self.core.with_ticker(|t| t.total_ticks());
        let last_update = self.last_update.load(Ordering::Relaxed);
        let full = self.force_full.swap(false, Ordering::Relaxed)
            || last_update == 0
            || total_ticks.saturating_sub(self.last_full_tick.load(Ordering::Relaxed))
                >= FULL_REFRESH_AFTER_TICKS as u64;

        let mut search = self.current_search().ok_or_else(|| {
            CueError::Validation("no job monitored".to_string())
        })?;
        if !full {
            search.changed_since = last_update.saturating_sub(CHANGED_SINCE_MARGIN_SECS);
        }
        *self.pending.lock().unwrap_or_else(|p| p.into_inner()) = Some(PendingFetch {
            job_id: job.id,
            full,
        });
        let frames = client.get_frames(&search)?;
        if full {
            self.last_full_tick.store(total_ticks, Ordering::Relaxed);
        }
        Ok(frames)
    }

    fn process_update(&self, records: Vec<Frame>) {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        let pending = match pending {
            Some(p) => p,
            None => return,
        };
        // Stale result: the monitored job changed while the fetch was in
        // flight.
        match self.job() {
            Some(job) if job.id == pending.job_id => {}
            _ => return,
        }

        if pending.full {
            self.core.registry.merge(records, |_| false);
        } else {
            // Changed-since snapshots are partial; absent frames are not
            // removals.
            for frame in records {
                self.core.registry.upsert_child(None, frame);
            }
        }
        self.last_update.store(unix_now(), Ordering::Relaxed);
    }

    fn process_error(&self, err: CueError) {
        match &err {
            CueError::TimestampSkew => {
                info!("changed-since refresh rejected for clock skew, forcing full refresh");
                self.force_full.store(true, Ordering::Relaxed);
                self.core.with_ticker(|t| {
                    t.updated();
                    t.force_next();
                });
            }
            CueError::EntityVanished(key) => {
                warn!(%key, "monitored job vanished");
                self.set_job(None);
                self.core.with_ticker(|t| t.updated());
            }
            _ => {
                self.core.with_ticker(|t| t.updated());
            }
        }
        self.core.set_error(&err);
    }
}

fn frame_columns() -> ColumnModel<Frame> {
    ColumnModel::builder()
        .column("Frame", "number", 7, |f: &Frame| f.number.to_string())
        .sort(|f: &Frame| SortKey::Int(f.number))
        .column("Layer", "layer", 24, |f: &Frame| f.layer_name.clone())
        .sort(|f: &Frame| SortKey::Text(f.layer_name.clone()))
        .column("Status", "status", 10, |f: &Frame| {
            match &f.state_override {
                Some(o) => o.text.clone(),
                None => f.state.to_string(),
            }
        })
        .sort(|f: &Frame| SortKey::Text(f.state.to_string()))
        .column("Cores", "cores", 6, |f: &Frame| {
            match parse_last_resource(&f.last_resource).1 {
                Some(cores) => format!("{:.2}", cores),
                None => "-".to_string(),
            }
        })
        .column("GPUs", "gpus", 5, |f: &Frame| {
            match parse_last_resource(&f.last_resource).2 {
                Some(gpus) => gpus.to_string(),
                None => "-".to_string(),
            }
        })
        .hidden()
        .column("Host", "host", 16, |f: &Frame| {
            parse_last_resource(&f.last_resource)
                .0
                .unwrap_or_else(|| "-".to_string())
        })
        .column("Retries", "retries", 7, |f: &Frame| f.retry_count.to_string())
        .sort(|f: &Frame| SortKey::Int(f.retry_count as i64))
        .column("Runtime", "runtime", 9, |f: &Frame| {
            format_duration(f.runtime(unix_now()))
        })
        .sort(|f: &Frame| SortKey::Int(f.runtime(unix_now()) as i64))
        .volatile()
        .delegate(Delegate::ProgressBar)
        .column("Memory", "memory", 8, |f: &Frame| format_mem(f.used_memory))
        .sort(|f: &Frame| SortKey::Int(f.used_memory as i64))
        .volatile()
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Keyed;
    use crate::monitor::refresh_now;
    use crate::rpc::fake::{self, FakeFarm};
    use std::sync::Arc;

    fn staged() -> (Arc<FakeFarm>, Job) {
        let farm = Arc::new(FakeFarm::new("t"));
        let job = fake::job("testing-sh010-render", "testing", "t");
        let layer = fake::layer("render", job.id);
        farm.edit(|s| {
            for n in 1..=8 {
                s.frames.push(fake::frame(n, &layer, FrameState::Waiting));
            }
            s.layers.push(layer);
            s.jobs.push(job.clone());
        });
        (farm, job)
    }

    fn client(farm: &Arc<FakeFarm>) -> Arc<dyn CueClient> {
        farm.clone()
    }

    #[test]
    fn first_refresh_is_full() {
        let (farm, job) = staged();
        let monitor = Arc::new(FrameMonitor::new());
        monitor.set_job(Some(job));
        refresh_now(&monitor, &client(&farm));
        assert_eq!(monitor.core().registry.len(), 8);
    }

    #[test]
    fn changed_since_merges_without_removing() {
        let (farm, job) = staged();
        let monitor = Arc::new(FrameMonitor::new());
        monitor.set_job(Some(job.clone()));
        refresh_now(&monitor, &client(&farm));
        assert_eq!(monitor.core().registry.len(), 8);

        // Second refresh takes the changed-since path; the fake returns
        // the same frames, nothing is dropped and selection holds.
        let key = monitor.core().registry.keys().into_iter().next().unwrap();
        monitor.core().registry.set_selected(&key, true);
        refresh_now(&monitor, &client(&farm));
        assert_eq!(monitor.core().registry.len(), 8);
        assert!(monitor.core().registry.is_selected(&key));
    }

    #[test]
    fn skew_forces_full_refresh_and_keeps_selection() {
        let (farm, job) = staged();
        let monitor = Arc::new(FrameMonitor::new());
        monitor.set_job(Some(job.clone()));
        refresh_now(&monitor, &client(&farm));
        let key = monitor.core().registry.keys().into_iter().next().unwrap();
        monitor.core().registry.set_selected(&key, true);

        farm.edit(|s| s.fail_next = Some(CueError::TimestampSkew));
        refresh_now(&monitor, &client(&farm));
        assert!(monitor.core().registry.is_selected(&key));
        assert!(monitor.force_full.load(Ordering::Relaxed));

        // The forced refresh goes through as a full snapshot.
        refresh_now(&monitor, &client(&farm));
        assert_eq!(monitor.core().registry.len(), 8);
        assert!(monitor.core().registry.is_selected(&key));
    }

    #[test]
    fn vanished_job_clears_binding() {
        let (farm, job) = staged();
        let monitor = Arc::new(FrameMonitor::new());
        monitor.set_job(Some(job.clone()));
        refresh_now(&monitor, &client(&farm));
        farm.edit(|s| {
            s.fail_next = Some(CueError::EntityVanished(job.key()));
        });
        refresh_now(&monitor, &client(&farm));
        assert!(monitor.job().is_none());
        assert!(monitor.core().registry.is_empty());
    }

    #[test]
    fn stale_result_for_old_job_is_discarded() {
        let (farm, job) = staged();
        let monitor = Arc::new(FrameMonitor::new());
        monitor.set_job(Some(job.clone()));
        let records = monitor.get_update(farm.as_ref()).unwrap();
        assert_eq!(records.len(), 8);
        // The operator switches jobs before the merge runs.
        let other = fake::job("testing-sh020-other", "testing", "t");
        monitor.set_job(Some(other));
        monitor.process_update(records);
        assert!(monitor.core().registry.is_empty());
    }

    #[test]
    fn paging_limits_the_query() {
        let (farm, job) = staged();
        let monitor = Arc::new(FrameMonitor::new());
        monitor.set_job(Some(job));
        let mut search = monitor.current_search().unwrap();
        search.limit = 3;
        search.page = 2;
        let page = farm.get_frames(&search).unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].number, 4);
    }

    #[test]
    fn state_filter_narrows_update() {
        let (farm, job) = staged();
        farm.edit(|s| {
            s.frames[0].state = FrameState::Dead;
            s.frames[1].state = FrameState::Dead;
        });
        let monitor = Arc::new(FrameMonitor::new());
        monitor.set_job(Some(job));
        monitor.set_filters(FrameFilters {
            states: vec![FrameState::Dead],
            ..Default::default()
        });
        refresh_now(&monitor, &client(&farm));
        assert_eq!(monitor.core().registry.len(), 2);
    }
}
