//! Stuck-frame detection.
//!
//! A running frame is "stuck" when its log has gone quiet for long enough
//! relative to how long it has been running. The engine scans a show's
//! running procs through per-service filter rules, computes the stuckness
//! metrics for each, and groups the survivors under job and group parents
//! in a three-level tree. Scanning emits a monotone progress stream for
//! the UI's progress bar.
//!
//! Classification itself is a pure function of the snapshot, the log
//! mtime, the layer average and the rule set, so the same inputs always
//! classify the same way.

pub mod rules;
pub mod yamldb;

pub use rules::{is_stuck, FrameMetrics, FilterRule, RuleSet, WILDCARD_SERVICE};
pub use yamldb::{merge_log_db, StuckLogRecord};

use crate::model::{EntityKey, EntityKind, Keyed, Proc};
use crate::monitor::ItemRegistry;
use crate::rpc::{CueClient, CueError, ProcSearch};

use crossbeam::channel::Sender;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;
use uuid::Uuid;

/// Already-present frames are re-scored against the (possibly edited)
/// rules this often, without refetching procs.
pub const REVALIDATE_AFTER_TICKS: u32 = 40;

/// The yaml log cache is flushed this often when non-empty.
pub const FLUSH_AFTER_TICKS: u32 = 400;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A classified frame with the metrics that got it classified.
#[derive(Debug, Clone, PartialEq)]
pub struct StuckFrame {
    pub proc_id: Uuid,
    pub job_id: Uuid,
    pub job_name: String,
    pub group_name: String,
    pub layer_name: String,
    pub frame_name: String,
    pub host_name: String,
    pub services: Vec<String>,
    pub log_path: String,
    pub runtime_secs: i64,
    pub llu_secs: i64,
    pub avg_frame_secs: u32,
    pub stuckness: f64,
    pub last_line: String,
}

impl StuckFrame {
    pub fn metrics(&self) -> FrameMetrics {
        FrameMetrics {
            runtime_secs: self.runtime_secs,
            llu_secs: self.llu_secs,
            avg_frame_secs: self.avg_frame_secs,
        }
    }
}

/// Nodes of the three-level result tree.
#[derive(Debug, Clone, PartialEq)]
pub enum StuckNode {
    Group { id: Uuid, name: String },
    Job { id: Uuid, name: String },
    Frame(StuckFrame),
}

impl Keyed for StuckNode {
    fn key(&self) -> EntityKey {
        match self {
            StuckNode::Group { id, .. } => EntityKey::new(EntityKind::Group, *id),
            StuckNode::Job { id, .. } => EntityKey::new(EntityKind::Job, *id),
            StuckNode::Frame(frame) => EntityKey::new(EntityKind::Proc, frame.proc_id),
        }
    }
    fn label(&self) -> &str {
        match self {
            StuckNode::Group { name, .. } => name,
            StuckNode::Job { name, .. } => name,
            StuckNode::Frame(frame) => &frame.frame_name,
        }
    }
}

/// Scan progress: `(scanned, total)`, `scanned` strictly increasing.
pub type Progress = (usize, usize);

pub struct StuckFrameEngine {
    pub registry: ItemRegistry<StuckNode>,
    rules: Mutex<RuleSet>,
    show: Mutex<String>,
    /// Synthetic ids for group rows, stable per name for the engine's
    /// lifetime so selection survives rescans.
    group_ids: Mutex<HashMap<String, Uuid>>,
    log_cache: Mutex<BTreeMap<String, StuckLogRecord>>,
    ticks: Mutex<u32>,
}

impl StuckFrameEngine {
    pub fn new(show: &str, rules: RuleSet) -> StuckFrameEngine {
        StuckFrameEngine {
            registry: ItemRegistry::new(),
            rules: Mutex::new(rules),
            show: Mutex::new(show.to_string()),
            group_ids: Mutex::new(HashMap::new()),
            log_cache: Mutex::new(BTreeMap::new()),
            ticks: Mutex::new(0),
        }
    }

    pub fn show(&self) -> String {
        self.show.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn set_show(&self, show: &str) {
        *self.show.lock().unwrap_or_else(|p| p.into_inner()) = show.to_string();
        self.registry.remove_all();
    }

    pub fn rules(&self) -> RuleSet {
        self.rules.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn set_rules(&self, rules: RuleSet) {
        *self.rules.lock().unwrap_or_else(|p| p.into_inner()) = rules;
    }

    /// Advance one tick and report what housekeeping is due. Scanning is
    /// driven by the operator (or the console's own scheduler), not here.
    pub fn on_tick(&self) -> TickWork {
        let mut ticks = self.ticks.lock().unwrap_or_else(|p| p.into_inner());
        *ticks += 1;
        TickWork {
            revalidate: *ticks % REVALIDATE_AFTER_TICKS == 0,
            flush: *ticks % FLUSH_AFTER_TICKS == 0 && !self.log_cache_is_empty(),
        }
    }

    fn log_cache_is_empty(&self) -> bool {
        self.log_cache
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_empty()
    }

    /// Worker-side scan: iterate the show's running procs, score each
    /// against the rules, return the classified frames. Progress is sent
    /// after every proc, `1..=total`.
    pub fn scan(
        &self,
        client: &dyn CueClient,
        progress: Option<&Sender<Progress>>,
    ) -> Result<Vec<StuckFrame>, CueError> {
        let rules = self.rules();
        let show = self.show();
        let procs = client.get_procs(&ProcSearch {
            shows: vec![show],
            ..Default::default()
        })?;
        let total = procs.len();
        let now = unix_now();

        let mut layer_avgs: HashMap<Uuid, HashMap<String, u32>> = HashMap::new();
        let mut found = Vec::new();
        for (n, proc) in procs.into_iter().enumerate() {
            if let Some(tx) = progress {
                let _ = tx.try_send((n + 1, total));
            }
            if proc.unbooked || proc.redirect_target.is_some() {
                continue;
            }
            let llu = match log_llu(Path::new(&proc.log_path), now) {
                Some(llu) => llu,
                // Unreadable log; cannot score this frame.
                None => continue,
            };
            let avg = *layer_avgs
                .entry(proc.job_id)
                .or_insert_with(|| {
                    client
                        .get_layers(proc.job_id)
                        .map(|layers| {
                            layers
                                .into_iter()
                                .map(|l| (l.name, l.stats.avg_frame_secs))
                                .collect()
                        })
                        .unwrap_or_default()
                })
                .get(&proc.layer_name)
                .unwrap_or(&0);
            let metrics = FrameMetrics {
                runtime_secs: now.saturating_sub(proc.dispatch_time) as i64,
                llu_secs: llu,
                avg_frame_secs: avg,
            };
            let rule = match rules.rule_for(&proc.services) {
                Some(rule) => rule,
                None => continue,
            };
            if is_stuck(rule, &proc.job_name, &proc.layer_name, &metrics) {
                found.push(stuck_frame(&proc, &metrics));
            }
        }
        debug!(found = found.len(), "stuck-frame scan finished");
        Ok(found)
    }

    /// UI-side merge of a scan result: rebuild the group/job/frame tree,
    /// creating ancestors lazily, and remember the frames for the log db.
    pub fn apply_scan(&self, frames: Vec<StuckFrame>) {
        self.registry.remove_all();
        {
            let mut cache = self.log_cache.lock().unwrap_or_else(|p| p.into_inner());
            for frame in &frames {
                cache.insert(yamldb::record_key(frame), StuckLogRecord::from(frame));
            }
        }
        for frame in frames {
            let group_key = self.group_node(&frame.group_name);
            let job_key = StuckNode::Job {
                id: frame.job_id,
                name: frame.job_name.clone(),
            };
            let job_entity_key = job_key.key();
            self.registry.upsert_child(Some(&group_key), job_key);
            self.registry
                .upsert_child(Some(&job_entity_key), StuckNode::Frame(frame));
        }
        self.registry.expand_all();
    }

    fn group_node(&self, name: &str) -> EntityKey {
        let id = {
            let mut ids = self.group_ids.lock().unwrap_or_else(|p| p.into_inner());
            *ids.entry(name.to_string()).or_insert_with(Uuid::new_v4)
        };
        let node = StuckNode::Group {
            id,
            name: name.to_string(),
        };
        let key = node.key();
        self.registry.upsert_child(None, node);
        key
    }

    /// Re-score the already-present frames against the current rules and
    /// prune the tree; no procs are fetched. Keeps the view coherent with
    /// filter edits without hammering the server.
    pub fn revalidate(&self) -> usize {
        let rules = self.rules();
        let removed = self.registry.retain_entities(|node| match node {
            StuckNode::Frame(frame) => match rules.rule_for(&frame.services) {
                Some(rule) => is_stuck(rule, &frame.job_name, &frame.layer_name, &frame.metrics()),
                None => false,
            },
            _ => true,
        });
        // Parents with no surviving frames go too, jobs before groups.
        let empty_jobs: Vec<EntityKey> = self.keys_of(|n| matches!(n, StuckNode::Job { .. }));
        for key in empty_jobs {
            if self.registry.child_keys(&key).is_empty() {
                self.registry.remove_item(&key);
            }
        }
        let empty_groups: Vec<EntityKey> = self.keys_of(|n| matches!(n, StuckNode::Group { .. }));
        for key in empty_groups {
            if self.registry.child_keys(&key).is_empty() {
                self.registry.remove_item(&key);
            }
        }
        removed
    }

    fn keys_of(&self, pred: impl Fn(&StuckNode) -> bool) -> Vec<EntityKey> {
        let mut keys = Vec::new();
        self.registry.for_each(|node| {
            if pred(node) {
                keys.push(node.key());
            }
        });
        keys
    }

    /// Merge the cached stuck-frame metadata into the per-show yaml
    /// database and clear the cache. Running it twice with the same cache
    /// produces the same file.
    pub fn flush_log_db(&self, path: &Path) -> std::io::Result<()> {
        let records = {
            let cache = self.log_cache.lock().unwrap_or_else(|p| p.into_inner());
            cache.clone()
        };
        if records.is_empty() {
            return Ok(());
        }
        merge_log_db(path, &records)?;
        self.log_cache
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickWork {
    pub revalidate: bool,
    pub flush: bool,
}

fn stuck_frame(proc: &Proc, metrics: &FrameMetrics) -> StuckFrame {
    let last_line = crate::cache::read_tail(Path::new(&proc.log_path))
        .map(|(line, _)| line)
        .unwrap_or_default();
    StuckFrame {
        proc_id: proc.id,
        job_id: proc.job_id,
        job_name: proc.job_name.clone(),
        group_name: proc.group_name.clone(),
        layer_name: proc.layer_name.clone(),
        frame_name: proc.frame_name.clone(),
        host_name: proc.host_name.clone(),
        services: proc.services.clone(),
        log_path: proc.log_path.clone(),
        runtime_secs: metrics.runtime_secs,
        llu_secs: metrics.llu_secs,
        avg_frame_secs: metrics.avg_frame_secs,
        stuckness: metrics.stuckness(),
        last_line,
    }
}

fn log_llu(path: &Path, now: u64) -> Option<i64> {
    let mtime = std::fs::metadata(path)
        .ok()?
        .modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()?
        .as_secs();
    Some(now.saturating_sub(mtime) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FrameState;
    use crate::rpc::fake::{self, FakeFarm};
    use crossbeam::channel;
    use std::io::Write;

    fn lenient_rule() -> FilterRule {
        FilterRule {
            service: WILDCARD_SERVICE.to_string(),
            exclude: Vec::new(),
            min_stuckness_pct: 0,
            min_llu_minutes: 0,
            min_pct_of_avg_completion: 0,
            min_runtime_minutes: 0,
            enabled: true,
        }
    }

    fn staged_farm(dir: &Path) -> (std::sync::Arc<FakeFarm>, String) {
        let farm = std::sync::Arc::new(FakeFarm::new("t"));
        let mut job = fake::job("testing-sh010-render", "testing", "t");
        job.group = "fx".to_string();
        job.log_dir = dir.to_string_lossy().into_owned();
        let layer = fake::layer("render", job.id);
        let mut frame = fake::frame(3, &layer, FrameState::Running);
        frame.start_time = unix_now().saturating_sub(1200);
        let host = fake::host("h01", "local.general");
        let mut p = fake::proc("h01/3", &host, &job, &layer, &frame);
        p.dispatch_time = frame.start_time;
        let mut f = std::fs::File::create(&p.log_path).unwrap();
        writeln!(f, "rendering tile 4 of 9").unwrap();
        let job_name = job.name.clone();
        farm.edit(|s| {
            s.hosts.push(host);
            s.procs.push(p);
            s.frames.push(frame);
            s.layers.push(layer);
            s.jobs.push(job);
        });
        (farm, job_name)
    }

    #[test]
    fn scan_groups_and_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let (farm, job_name) = staged_farm(dir.path());
        let engine = StuckFrameEngine::new("testing", RuleSet::new(vec![lenient_rule()]));
        let (tx, rx) = channel::unbounded();

        let found = engine.scan(farm.as_ref(), Some(&tx)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].job_name, job_name);
        assert_eq!(found[0].last_line, "rendering tile 4 of 9");

        let progress: Vec<Progress> = rx.try_iter().collect();
        assert_eq!(progress, vec![(1, 1)]);

        engine.apply_scan(found);
        let rows = engine.registry.visible();
        // group -> job -> frame
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].depth, 0);
        assert!(matches!(rows[0].entity, StuckNode::Group { .. }));
        assert_eq!(rows[2].depth, 2);
        assert!(matches!(rows[2].entity, StuckNode::Frame(_)));
    }

    #[test]
    fn progress_is_monotone_over_many_procs() {
        let dir = tempfile::tempdir().unwrap();
        let (farm, _) = staged_farm(dir.path());
        // Clone the proc a few times under different ids.
        farm.edit(|s| {
            for n in 0..5 {
                let mut p = s.procs[0].clone();
                p.id = Uuid::new_v4();
                p.name = format!("h01/{}", n + 10);
                s.procs.push(p);
            }
        });
        let engine = StuckFrameEngine::new("testing", RuleSet::new(vec![lenient_rule()]));
        let (tx, rx) = channel::unbounded();
        engine.scan(farm.as_ref(), Some(&tx)).unwrap();
        let progress: Vec<Progress> = rx.try_iter().collect();
        assert_eq!(progress.len(), 6);
        for pair in progress.windows(2) {
            assert!(pair[1].0 > pair[0].0);
        }
        assert_eq!(progress.last().unwrap(), &(6, 6));
    }

    #[test]
    fn revalidate_prunes_after_rules_tighten() {
        let dir = tempfile::tempdir().unwrap();
        let (farm, _) = staged_farm(dir.path());
        let engine = StuckFrameEngine::new("testing", RuleSet::new(vec![lenient_rule()]));
        let found = engine.scan(farm.as_ref(), None).unwrap();
        engine.apply_scan(found);
        assert_eq!(engine.registry.visible().len(), 3);

        // Tighten: the fresh log (llu ~ 0) can no longer qualify.
        let mut strict = lenient_rule();
        strict.min_llu_minutes = 5;
        engine.set_rules(RuleSet::new(vec![strict]));
        engine.revalidate();
        assert!(engine.registry.is_empty());
    }

    #[test]
    fn redirected_and_unbooked_procs_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (farm, _) = staged_farm(dir.path());
        farm.edit(|s| s.procs[0].redirect_target = Some("elsewhere".to_string()));
        let engine = StuckFrameEngine::new("testing", RuleSet::new(vec![lenient_rule()]));
        let found = engine.scan(farm.as_ref(), None).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn tick_work_fires_on_the_configured_intervals() {
        let engine = StuckFrameEngine::new("testing", RuleSet::new(vec![lenient_rule()]));
        let mut revalidations = 0;
        for _ in 0..REVALIDATE_AFTER_TICKS * 2 {
            if engine.on_tick().revalidate {
                revalidations += 1;
            }
        }
        assert_eq!(revalidations, 2);
        // Flush never fires with an empty cache.
        let engine = StuckFrameEngine::new("testing", RuleSet::new(vec![]));
        for _ in 0..FLUSH_AFTER_TICKS {
            assert!(!engine.on_tick().flush);
        }
    }
}
