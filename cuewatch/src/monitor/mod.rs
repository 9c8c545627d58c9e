//! Monitor trees.
//!
//! Every pane of the console is a monitor: it owns search criteria, a
//! [`TickScheduler`], an [`ItemRegistry`] and a [`ColumnModel`], fetches
//! snapshots on the worker side (`get_update`) and merges them on the UI
//! side (`process_update`). The shared plumbing here turns a tick into a
//! deduped work-pool fetch whose callback runs the merge.

pub mod columns;
pub mod cuejob;
pub mod frames;
pub mod hosts;
pub mod jobs;
pub mod layers;
pub mod procs;
pub mod registry;
pub mod shows;

pub use columns::{ColumnLayout, ColumnModel, Delegate, SortKey};
pub use registry::{ItemRegistry, MergeStats, NestedNode, VisibleRow};

use crate::model::Keyed;
use crate::pool::{TickAction, TickScheduler, UiCallback, WorkPool};
use crate::rpc::{CueClient, CueError};

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

/// Shared per-tree state.
pub struct MonitorCore<E> {
    pub registry: ItemRegistry<E>,
    ticker: Mutex<TickScheduler>,
    label: String,
    last_error: Mutex<Option<String>>,
}

impl<E: Keyed + Clone> MonitorCore<E> {
    pub fn new(label: &str, ticker: TickScheduler) -> MonitorCore<E> {
        MonitorCore {
            registry: ItemRegistry::new(),
            ticker: Mutex::new(ticker),
            label: label.to_string(),
            last_error: Mutex::new(None),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn with_ticker<R>(&self, f: impl FnOnce(&mut TickScheduler) -> R) -> R {
        let mut ticker = self.ticker.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut ticker)
    }

    /// Ask for a refresh on the next tick (after-action path, filter edit).
    pub fn update_soon(&self) {
        self.with_ticker(|t| t.force_next());
    }

    pub fn note_scroll(&self) {
        self.with_ticker(|t| t.note_scroll());
    }

    fn set_error(&self, err: &CueError) {
        let mut slot = self.last_error.lock().unwrap_or_else(|p| p.into_inner());
        *slot = Some(err.to_string());
    }

    /// Latest surfaced error, consumed by the status line.
    pub fn take_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
    }
}

/// A monitor tree. `get_update` runs on a worker thread; `process_update`
/// and `process_error` run on the UI thread via the pool's delivery
/// channel.
pub trait Monitor: Send + Sync + 'static {
    type Entity: Keyed + Clone + Send;

    fn core(&self) -> &MonitorCore<Self::Entity>;

    fn get_update(&self, client: &dyn CueClient) -> Result<Vec<Self::Entity>, CueError>;

    fn process_update(&self, records: Vec<Self::Entity>);

    /// Error behavior per kind: transient errors surface and retry on the
    /// next tick; a vanished entity clears the tree and continues.
    fn process_error(&self, err: CueError) {
        match &err {
            CueError::EntityVanished(key) => {
                debug!(%key, "monitored entity vanished, clearing tree");
                self.core().registry.remove_all();
            }
            other => {
                warn!(label = self.core().label(), %other, "update failed");
            }
        }
        self.core().set_error(&err);
        self.core().with_ticker(|t| t.updated());
    }
}

/// Advance a monitor's heartbeat; on an eligible tick, enqueue the fetch.
pub fn tick<M: Monitor>(
    monitor: &Arc<M>,
    pool: &WorkPool,
    client: &Arc<dyn CueClient>,
    minimized: bool,
) -> TickAction {
    let action = monitor.core().with_ticker(|t| t.tick(minimized));
    if action == TickAction::Update {
        request_update(monitor, pool, client);
    }
    action
}

/// Enqueue one snapshot fetch. Dedupe in the pool guarantees at most one
/// pending fetch per label.
pub fn request_update<M: Monitor>(
    monitor: &Arc<M>,
    pool: &WorkPool,
    client: &Arc<dyn CueClient>,
) {
    let label = monitor.core().label().to_string();
    monitor.core().with_ticker(|t| t.fetch_started());
    let m = monitor.clone();
    let client = client.clone();
    pool.queue(&label, move || {
        let outcome = m.get_update(client.as_ref());
        let m = m.clone();
        Ok(Some(Box::new(move || match outcome {
            Ok(records) => {
                m.process_update(records);
                m.core().with_ticker(|t| t.updated());
            }
            Err(err) => m.process_error(err),
        }) as UiCallback))
    });
}

/// Run one synchronous fetch-and-merge on the calling thread. The admin
/// CLI and tests use this instead of the pool.
pub fn refresh_now<M: Monitor>(monitor: &Arc<M>, client: &Arc<dyn CueClient>) {
    match monitor.get_update(client.as_ref()) {
        Ok(records) => {
            monitor.process_update(records);
            monitor.core().with_ticker(|t| t.updated());
        }
        Err(err) => monitor.process_error(err),
    }
}
