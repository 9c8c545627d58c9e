//! Predicted seconds-remaining cache for running frames.
//!
//! Same shape as the log buffer with a longer TTL. The cached value is the
//! prediction *at computation time*; reads subtract the elapsed time since
//! then, so the progress bar counts down smoothly between refreshes.

use crate::model::{EntityKey, Frame, Keyed};
use crate::pool::{UiCallback, WorkPool};
use crate::rpc::CueClient;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

pub const ETA_TTL_SECS: u64 = 60;

struct Slot {
    last_access: Instant,
    computed_at: Instant,
    eta_secs: f64,
}

struct State {
    job_id: Option<Uuid>,
    entries: HashMap<EntityKey, Slot>,
    pending: HashSet<EntityKey>,
}

pub struct EtaBuffer {
    state: Mutex<State>,
}

impl Default for EtaBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl EtaBuffer {
    pub fn new() -> EtaBuffer {
        EtaBuffer {
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

    /// Seconds remaining for a running frame, counting down from the last
    /// computed prediction. `None` until the first prediction lands.
    pub fn get(
        self: &Arc<Self>,
        pool: &WorkPool,
        client: &Arc<dyn CueClient>,
        job_id: Uuid,
        frame: &Frame,
    ) -> Option<f64> {
        let key = frame.key();
        let mut state = self.lock();

        if state.job_id != Some(job_id) {
            state.entries.clear();
            state.pending.clear();
            state.job_id = Some(job_id);
        }
        if state.pending.len() > pool.max_queue() {
            state.entries.clear();
            state.pending.clear();
        }

        if let Some(slot) = state.entries.get_mut(&key) {
            let value = (slot.eta_secs - slot.computed_at.elapsed().as_secs_f64()).max(0.0);
            if slot.last_access.elapsed().as_secs() > ETA_TTL_SECS {
                slot.last_access = Instant::now();
                self.enqueue(&mut state, pool, client, key, frame.id);
            }
            return Some(value);
        }

        self.enqueue(&mut state, pool, client, key, frame.id);
        None
    }

    fn enqueue(
        self: &Arc<Self>,
        state: &mut State,
        pool: &WorkPool,
        client: &Arc<dyn CueClient>,
        key: EntityKey,
        frame_id: Uuid,
    ) {
        if !state.pending.insert(key.clone()) {
            return;
        }
        let buffer = self.clone();
        let client = client.clone();
        let label = format!("eta:{}", key);
        pool.queue(&label, move || {
            let eta = client
                .predicted_eta(frame_id)
                .map_err(|e| format!("eta fetch: {}", e))?;
            Ok(Some(Box::new(move || {
                buffer.store(key, eta);
            }) as UiCallback))
        });
    }

    fn store(&self, key: EntityKey, eta_secs: f64) {
        let mut state = self.lock();
        state.pending.remove(&key);
        state.entries.insert(
            key,
            Slot {
                last_access: Instant::now(),
                computed_at: Instant::now(),
                eta_secs,
            },
        );
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.pending.clear();
        state.job_id = None;
    }

    #[cfg(test)]
    fn seed(&self, key: EntityKey, eta_secs: f64, age: std::time::Duration) {
        let then = Instant::now() - age;
        self.lock().entries.insert(
            key,
            Slot {
                last_access: Instant::now(),
                computed_at: then,
                eta_secs,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FrameState;
    use crate::rpc::fake::{self, FakeFarm};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn counts_down_between_refreshes() {
        let farm: Arc<dyn CueClient> = Arc::new(FakeFarm::new("t"));
        let (pool, _rx) = WorkPool::new(1, 10);
        let buffer = Arc::new(EtaBuffer::new());
        let job = fake::job("j", "testing", "t");
        let layer = fake::layer("render", job.id);
        let frame = fake::frame(1, &layer, FrameState::Running);

        buffer.lock().job_id = Some(job.id);
        buffer.seed(frame.key(), 100.0, Duration::from_secs(40));
        let eta = buffer.get(&pool, &farm, job.id, &frame).unwrap();
        assert!(eta > 55.0 && eta <= 60.5, "eta was {}", eta);
        pool.shutdown();
    }

    #[test]
    fn countdown_floors_at_zero() {
        let farm: Arc<dyn CueClient> = Arc::new(FakeFarm::new("t"));
        let (pool, _rx) = WorkPool::new(1, 10);
        let buffer = Arc::new(EtaBuffer::new());
        let job = fake::job("j", "testing", "t");
        let layer = fake::layer("render", job.id);
        let frame = fake::frame(1, &layer, FrameState::Running);

        buffer.lock().job_id = Some(job.id);
        buffer.seed(frame.key(), 5.0, Duration::from_secs(30));
        assert_eq!(buffer.get(&pool, &farm, job.id, &frame), Some(0.0));
        pool.shutdown();
    }

    #[test]
    fn first_read_schedules_and_returns_none() {
        let farm = Arc::new(FakeFarm::new("t"));
        let job = fake::job("j", "testing", "t");
        let layer = {
            let mut l = fake::layer("render", job.id);
            l.stats.avg_frame_secs = 300;
            l
        };
        let mut frame = fake::frame(1, &layer, FrameState::Running);
        frame.start_time = 1_000_000;
        farm.edit(|s| {
            s.now = Some(1_000_100);
            s.jobs.push(job.clone());
            s.layers.push(layer);
            s.frames.push(frame.clone());
        });

        let client: Arc<dyn CueClient> = farm;
        let (pool, rx) = WorkPool::new(1, 10);
        let ui = thread::spawn(move || {
            for d in rx.iter() {
                d.run();
            }
        });
        let buffer = Arc::new(EtaBuffer::new());

        assert_eq!(buffer.get(&pool, &client, job.id, &frame), None);
        let deadline = Instant::now() + Duration::from_secs(5);
        let eta = loop {
            if let Some(eta) = buffer.get(&pool, &client, job.id, &frame) {
                break eta;
            }
            assert!(Instant::now() < deadline, "prediction never landed");
            thread::sleep(Duration::from_millis(5));
        };
        // avg 300 minus 100 of runtime, minus scheduling slack.
        assert!(eta > 150.0 && eta <= 200.0, "eta was {}", eta);

        pool.shutdown();
        drop(pool);
        ui.join().unwrap();
    }

    #[test]
    fn pool_deliveries_ignored_after_clear() {
        let buffer = EtaBuffer::new();
        buffer.store(
            EntityKey::new(crate::model::EntityKind::Frame, Uuid::new_v4()),
            42.0,
        );
        buffer.clear();
        assert!(buffer.lock().entries.is_empty());
    }
}
