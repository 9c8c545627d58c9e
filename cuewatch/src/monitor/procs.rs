//! Flat proc tree.

use super::{ColumnModel, Monitor, MonitorCore, SortKey};
use crate::model::{format_duration, format_mem, Proc};
use crate::pool::TickScheduler;
use crate::rpc::{CueClient, CueError, ProcSearch};

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

pub const PROC_UPDATE_INTERVAL: u32 = 22;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub struct ProcMonitor {
    core: MonitorCore<Proc>,
    columns: ColumnModel<Proc>,
    search: Mutex<ProcSearch>,
}

impl Default for ProcMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcMonitor {
    pub fn new() -> ProcMonitor {
        ProcMonitor {
            core: MonitorCore::new("refresh:Procs", TickScheduler::new(PROC_UPDATE_INTERVAL)),
            columns: proc_columns(),
            search: Mutex::new(ProcSearch::default()),
        }
    }

    pub fn columns(&self) -> &ColumnModel<Proc> {
        &self.columns
    }

    pub fn set_search(&self, search: ProcSearch) {
        *self.search.lock().unwrap_or_else(|p| p.into_inner()) = search;
        self.core.update_soon();
    }

    pub fn search(&self) -> ProcSearch {
        self.search.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn clear_filters(&self) {
        *self.search.lock().unwrap_or_else(|p| p.into_inner()) = ProcSearch::default();
        self.core.with_ticker(|t| t.clear());
    }
}

impl Monitor for ProcMonitor {
    type Entity = Proc;

    fn core(&self) -> &MonitorCore<Proc> {
        &self.core
    }

    fn get_update(&self, client: &dyn CueClient) -> Result<Vec<Proc>, CueError> {
        client.get_procs(&self.search())
    }

    fn process_update(&self, records: Vec<Proc>) {
        self.core.registry.merge(records, |_| false);
    }
}

fn proc_columns() -> ColumnModel<Proc> {
    ColumnModel::builder()
        .column("Proc", "name", 26, |p: &Proc| p.name.clone())
        .sort(|p: &Proc| SortKey::Text(p.name.clone()))
        .column("Cores", "cores", 6, |p: &Proc| format!("{:.2}", p.reserved_cores))
        .sort(|p: &Proc| SortKey::Float(p.reserved_cores as f64))
        .column("Memory", "memory", 14, |p: &Proc| {
            format!("{} of {}", format_mem(p.used_memory), format_mem(p.reserved_memory))
        })
        .sort(|p: &Proc| SortKey::Int(p.used_memory as i64))
        .column("Job", "job", 36, |p: &Proc| p.job_name.clone())
        .sort(|p: &Proc| SortKey::Text(p.job_name.clone()))
        .column("Frame", "frame", 18, |p: &Proc| p.frame_name.clone())
        .column("Age", "age", 9, |p: &Proc| {
            format_duration(unix_now().saturating_sub(p.dispatch_time))
        })
        .sort(|p: &Proc| SortKey::Int(p.dispatch_time as i64))
        .volatile()
        .column("Unbooked", "unbooked", 8, |p: &Proc| {
            if p.unbooked { "yes".to_string() } else { String::new() }
        })
        .hidden()
        .column("Redirect", "redirect", 20, |p: &Proc| {
            p.redirect_target.clone().unwrap_or_default()
        })
        .hidden()
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::refresh_now;
    use crate::rpc::fake::{self, FakeFarm};
    use crate::model::FrameState;
    use std::sync::Arc;

    #[test]
    fn show_filter_and_clear() {
        let farm = Arc::new(FakeFarm::new("t"));
        farm.edit(|s| {
            for (show, host) in [("testing", "h01"), ("testing", "h02"), ("other", "h03")] {
                let mut job = fake::job(&format!("{}-sh-x", show), show, "t");
                job.show = show.to_string();
                let layer = fake::layer("render", job.id);
                let frame = fake::frame(1, &layer, FrameState::Running);
                let h = fake::host(host, "local.general");
                s.procs.push(fake::proc(
                    &format!("{}/1", host),
                    &h,
                    &job,
                    &layer,
                    &frame,
                ));
                s.hosts.push(h);
                s.frames.push(frame);
                s.layers.push(layer);
                s.jobs.push(job);
            }
        });
        let monitor = Arc::new(ProcMonitor::new());
        let client: Arc<dyn CueClient> = farm.clone();
        refresh_now(&monitor, &client);
        assert_eq!(monitor.core().registry.len(), 3);

        monitor.set_search(ProcSearch {
            shows: vec!["testing".to_string()],
            ..Default::default()
        });
        refresh_now(&monitor, &client);
        assert_eq!(monitor.core().registry.len(), 2);

        monitor.clear_filters();
        refresh_now(&monitor, &client);
        assert_eq!(monitor.core().registry.len(), 3);
    }
}
