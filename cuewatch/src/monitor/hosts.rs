//! Flat host tree.

use super::{ColumnModel, Monitor, MonitorCore, SortKey};
use crate::model::{format_mem, Host, LockState};
use crate::pool::TickScheduler;
use crate::rpc::{CueClient, CueError, HostSearch};

use std::sync::Mutex;

pub const HOST_UPDATE_INTERVAL: u32 = 20;

pub struct HostMonitor {
    core: MonitorCore<Host>,
    columns: ColumnModel<Host>,
    search: Mutex<HostSearch>,
}

impl Default for HostMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMonitor {
    pub fn new() -> HostMonitor {
        HostMonitor {
            core: MonitorCore::new("refresh:Hosts", TickScheduler::new(HOST_UPDATE_INTERVAL)),
            columns: host_columns(),
            search: Mutex::new(HostSearch::default()),
        }
    }

    pub fn columns(&self) -> &ColumnModel<Host> {
        &self.columns
    }

    pub fn set_search(&self, search: HostSearch) {
        *self.search.lock().unwrap_or_else(|p| p.into_inner()) = search;
        self.core.update_soon();
    }

    pub fn search(&self) -> HostSearch {
        self.search.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn clear_filters(&self) {
        *self.search.lock().unwrap_or_else(|p| p.into_inner()) = HostSearch::default();
        self.core.with_ticker(|t| t.clear());
    }
}

impl Monitor for HostMonitor {
    type Entity = Host;

    fn core(&self) -> &MonitorCore<Host> {
        &self.core
    }

    fn get_update(&self, client: &dyn CueClient) -> Result<Vec<Host>, CueError> {
        client.get_hosts(&self.search())
    }

    fn process_update(&self, records: Vec<Host>) {
        self.core.registry.merge(records, |_| false);
    }
}

fn host_columns() -> ColumnModel<Host> {
    ColumnModel::builder()
        .column("Host", "name", 24, |h: &Host| h.name.clone())
        .sort(|h: &Host| SortKey::Text(h.name.clone()))
        .column("Alloc", "allocation", 14, |h: &Host| h.allocation.clone())
        .sort(|h: &Host| SortKey::Text(h.allocation.clone()))
        .column("State", "state", 9, |h: &Host| format!("{:?}", h.state))
        .column("Lock", "lock", 11, |h: &Host| match h.lock_state {
            LockState::Open => "Open".to_string(),
            LockState::Locked => "Locked".to_string(),
            LockState::NimbyLocked => "NimbyLocked".to_string(),
        })
        .column("Cores", "cores", 11, |h: &Host| {
            format!("{:.0} of {:.0}", h.idle_cores, h.cores)
        })
        .sort(|h: &Host| SortKey::Float(h.idle_cores as f64))
        .column("Memory", "memory", 10, |h: &Host| format_mem(h.free_memory))
        .sort(|h: &Host| SortKey::Int(h.free_memory as i64))
        .column("Swap", "swap", 9, |h: &Host| format_mem(h.free_swap))
        .sort(|h: &Host| SortKey::Int(h.free_swap as i64))
        .hidden()
        .column("Tags", "tags", 20, |h: &Host| h.tags.join(" "))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::refresh_now;
    use crate::rpc::fake::{self, FakeFarm};
    use std::sync::Arc;

    #[test]
    fn filters_by_allocation() {
        let farm = Arc::new(FakeFarm::new("t"));
        farm.edit(|s| {
            s.hosts.push(fake::host("a01", "local.general"));
            s.hosts.push(fake::host("a02", "local.general"));
            s.hosts.push(fake::host("b01", "cloud.burst"));
        });
        let monitor = Arc::new(HostMonitor::new());
        let client: Arc<dyn CueClient> = farm.clone();
        refresh_now(&monitor, &client);
        assert_eq!(monitor.core().registry.len(), 3);

        monitor.set_search(HostSearch {
            allocations: vec!["cloud.burst".to_string()],
            ..Default::default()
        });
        refresh_now(&monitor, &client);
        assert_eq!(monitor.core().registry.len(), 1);

        monitor.clear_filters();
        refresh_now(&monitor, &client);
        assert_eq!(monitor.core().registry.len(), 3);
    }
}
