//! Layer tree for the currently monitored job.

use super::{ColumnModel, Delegate, Monitor, MonitorCore, SortKey};
use crate::model::{format_duration, format_mem, Job, Layer};
use crate::pool::TickScheduler;
use crate::rpc::{CueClient, CueError};

use std::sync::Mutex;
use uuid::Uuid;

pub const LAYER_UPDATE_INTERVAL: u32 = 10;

pub struct LayerMonitor {
    core: MonitorCore<Layer>,
    columns: ColumnModel<Layer>,
    job: Mutex<Option<Job>>,
}

impl Default for LayerMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerMonitor {
    pub fn new() -> LayerMonitor {
        LayerMonitor {
            core: MonitorCore::new("refresh:Layers", TickScheduler::new(LAYER_UPDATE_INTERVAL)),
            columns: layer_columns(),
            job: Mutex::new(None),
        }
    }

    pub fn columns(&self) -> &ColumnModel<Layer> {
        &self.columns
    }

    pub fn job(&self) -> Option<Job> {
        self.job.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn set_job(&self, job: Option<Job>) {
        let mut slot = self.job.lock().unwrap_or_else(|p| p.into_inner());
        let changed = slot.as_ref().map(|j| j.id) != job.as_ref().map(|j| j.id);
        *slot = job;
        drop(slot);
        if changed {
            self.core.registry.remove_all();
            self.core.update_soon();
        }
    }

    pub fn clear_filters(&self) {
        self.core.with_ticker(|t| t.clear());
    }
}

impl Monitor for LayerMonitor {
    type Entity = Layer;

    fn core(&self) -> &MonitorCore<Layer> {
        &self.core
    }

    fn get_update(&self, client: &dyn CueClient) -> Result<Vec<Layer>, CueError> {
        match self.job() {
            Some(job) => client.get_layers(job.id),
            None => Ok(Vec::new()),
        }
    }

    fn process_update(&self, records: Vec<Layer>) {
        // Stale guard: every record carries its job id.
        let current: Option<Uuid> = self.job().map(|j| j.id);
        if let Some(first) = records.first() {
            if current != Some(first.job_id) {
                return;
            }
        }
        self.core.registry.merge(records, |_| false);
    }
}

fn layer_columns() -> ColumnModel<Layer> {
    ColumnModel::builder()
        .column("Layer", "name", 28, |l: &Layer| l.name.clone())
        .sort(|l: &Layer| SortKey::Text(l.name.clone()))
        .column("Services", "services", 14, |l: &Layer| l.services.join(","))
        .column("Range", "range", 18, |l: &Layer| l.range_display())
        .tooltip("Frame range, with the chunk size when chunked")
        .column("Done", "done", 8, |l: &Layer| {
            let total = l.stats.frames.total().max(1);
            format!("{}%", l.stats.frames.succeeded * 100 / total)
        })
        .sort(|l: &Layer| {
            SortKey::Int((l.stats.frames.succeeded * 100 / l.stats.frames.total().max(1)) as i64)
        })
        .delegate(Delegate::ProgressBar)
        .column("Cores", "cores", 6, |l: &Layer| format!("{:.2}", l.min_cores))
        .sort(|l: &Layer| SortKey::Float(l.min_cores as f64))
        .column("Memory", "memory", 8, |l: &Layer| format_mem(l.min_memory))
        .sort(|l: &Layer| SortKey::Int(l.min_memory as i64))
        .column("AvgTime", "avg", 9, |l: &Layer| {
            format_duration(l.stats.avg_frame_secs as u64)
        })
        .sort(|l: &Layer| SortKey::Int(l.stats.avg_frame_secs as i64))
        .column("Tags", "tags", 16, |l: &Layer| l.tags.join(" "))
        .hidden()
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::refresh_now;
    use crate::rpc::fake::{self, FakeFarm};
    use std::sync::Arc;

    #[test]
    fn layers_follow_the_monitored_job() {
        let farm = Arc::new(FakeFarm::new("t"));
        let job_a = fake::job("testing-sh010-a", "testing", "t");
        let job_b = fake::job("testing-sh020-b", "testing", "t");
        farm.edit(|s| {
            s.layers.push(fake::layer("render", job_a.id));
            s.layers.push(fake::layer("comp", job_a.id));
            s.layers.push(fake::layer("sim", job_b.id));
            s.jobs.push(job_a.clone());
            s.jobs.push(job_b.clone());
        });
        let monitor = Arc::new(LayerMonitor::new());
        let client: Arc<dyn CueClient> = farm.clone();

        monitor.set_job(Some(job_a));
        refresh_now(&monitor, &client);
        assert_eq!(monitor.core().registry.len(), 2);

        monitor.set_job(Some(job_b));
        refresh_now(&monitor, &client);
        assert_eq!(monitor.core().registry.len(), 1);

        monitor.set_job(None);
        refresh_now(&monitor, &client);
        assert!(monitor.core().registry.is_empty());
    }

    #[test]
    fn stale_layers_for_previous_job_are_dropped() {
        let farm = Arc::new(FakeFarm::new("t"));
        let job_a = fake::job("testing-sh010-a", "testing", "t");
        let job_b = fake::job("testing-sh020-b", "testing", "t");
        farm.edit(|s| {
            s.layers.push(fake::layer("render", job_a.id));
            s.jobs.push(job_a.clone());
            s.jobs.push(job_b.clone());
        });
        let monitor = Arc::new(LayerMonitor::new());
        monitor.set_job(Some(job_a));
        let records = monitor.get_update(farm.as_ref()).unwrap();
        monitor.set_job(Some(job_b));
        monitor.process_update(records);
        assert!(monitor.core().registry.is_empty());
    }
}
