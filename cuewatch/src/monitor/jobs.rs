//! Monitored-jobs tree.
//!
//! The operator picks the jobs this tree watches; membership is explicit
//! and persists across sessions with a per-job load timestamp. With the
//! load-mine flag on, the current user's jobs are pulled in automatically
//! on every update. A job added with dependent grouping nests the
//! recursive set of jobs depending on it underneath it.

use super::{ColumnModel, Monitor, MonitorCore, NestedNode, SortKey};
use crate::model::{format_mem, format_time, Job, JobState, Keyed};
use crate::pool::TickScheduler;
use crate::rpc::{CueClient, CueError, JobSearch};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const JOB_UPDATE_INTERVAL: u32 = 10;

/// How many monitored jobs are restored from a saved session.
pub const MONITORED_RESTORE_LIMIT: usize = 200;

/// Number of user-assignable background color slots.
pub const USER_COLOR_SLOTS: usize = 15;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub struct JobMonitor {
    core: MonitorCore<Job>,
    columns: ColumnModel<Job>,
    /// Monitored job id -> unix seconds it was added.
    monitored: Mutex<HashMap<Uuid, u64>>,
    /// Dependent-grouping edges, child job -> parent job. Doubles as the
    /// reverse map that prevents a job from being grouped twice.
    dependent_of: Mutex<HashMap<Uuid, Uuid>>,
    /// Per-job background color slot.
    colors: Mutex<HashMap<Uuid, usize>>,
    load_mine: AtomicBool,
}

impl Default for JobMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl JobMonitor {
    pub fn new() -> JobMonitor {
        JobMonitor {
            core: MonitorCore::new("refresh:Jobs", TickScheduler::new(JOB_UPDATE_INTERVAL)),
            columns: job_columns(),
            monitored: Mutex::new(HashMap::new()),
            dependent_of: Mutex::new(HashMap::new()),
            colors: Mutex::new(HashMap::new()),
            load_mine: AtomicBool::new(true),
        }
    }

    pub fn columns(&self) -> &ColumnModel<Job> {
        &self.columns
    }

    pub fn set_load_mine(&self, on: bool) {
        self.load_mine.store(on, Ordering::Relaxed);
    }

    pub fn load_mine(&self) -> bool {
        self.load_mine.load(Ordering::Relaxed)
    }

    fn lock_monitored(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, u64>> {
        self.monitored.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_dependents(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Uuid>> {
        self.dependent_of.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_monitored(&self, job: Uuid) -> bool {
        self.lock_monitored().contains_key(&job)
    }

    /// Add a job by name. With `group_dependents`, jobs that (recursively)
    /// depend on it are nested underneath; each job is grouped at most
    /// once even when several parents claim it.
    pub fn add_job(
        &self,
        client: &dyn CueClient,
        name: &str,
        group_dependents: bool,
    ) -> Result<Job, CueError> {
        let job = client.find_job(name)?;
        self.lock_monitored().entry(job.id).or_insert_with(unix_now);
        if group_dependents {
            let mut seen: HashSet<Uuid> = HashSet::new();
            seen.insert(job.id);
            self.collect_dependents(client, job.id, &mut seen)?;
        }
        self.core.update_soon();
        Ok(job)
    }

    fn collect_dependents(
        &self,
        client: &dyn CueClient,
        parent: Uuid,
        seen: &mut HashSet<Uuid>,
    ) -> Result<(), CueError> {
        // Active dependencies only; inactive edges are history.
        let depends = client.get_what_depends_on(parent)?;
        for depend in depends.into_iter().filter(|d| d.active) {
            let child = depend.depender_job_id;
            if !seen.insert(child) {
                continue;
            }
            {
                let mut dependents = self.lock_dependents();
                if dependents.contains_key(&child) {
                    continue;
                }
                dependents.insert(child, parent);
            }
            self.lock_monitored().entry(child).or_insert_with(unix_now);
            self.collect_dependents(client, child, seen)?;
        }
        Ok(())
    }

    pub fn remove_job(&self, job: Uuid) {
        self.lock_monitored().remove(&job);
        let mut dependents = self.lock_dependents();
        dependents.remove(&job);
        dependents.retain(|_, parent| *parent != job);
        drop(dependents);
        self.colors.lock().unwrap_or_else(|p| p.into_inner()).remove(&job);
        self.core.update_soon();
    }

    /// Drop every monitored job that has finished.
    pub fn remove_finished(&self) {
        let finished: Vec<Uuid> = {
            let mut out = Vec::new();
            self.core.registry.for_each(|job: &Job| {
                if job.is_finished() {
                    out.push(job.id);
                }
            });
            out
        };
        for id in finished {
            self.remove_job(id);
        }
    }

    /// Reset membership and all accumulated suppression state.
    pub fn clear(&self) {
        self.lock_monitored().clear();
        self.lock_dependents().clear();
        self.core.registry.remove_all();
        self.core.with_ticker(|t| t.clear());
    }

    pub fn set_color(&self, job: Uuid, slot: Option<usize>) {
        let mut colors = self.colors.lock().unwrap_or_else(|p| p.into_inner());
        match slot {
            Some(slot) if slot < USER_COLOR_SLOTS => {
                colors.insert(job, slot);
            }
            _ => {
                colors.remove(&job);
            }
        }
    }

    pub fn color(&self, job: Uuid) -> Option<usize> {
        self.colors
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&job)
            .copied()
    }

    pub fn colors_for_session(&self) -> HashMap<Uuid, usize> {
        self.colors.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn restore_colors(&self, colors: HashMap<Uuid, usize>) {
        *self.colors.lock().unwrap_or_else(|p| p.into_inner()) = colors;
    }

    /// Monitored ids with load time, most recently added first.
    pub fn monitored_for_session(&self) -> Vec<(Uuid, u64)> {
        let mut list: Vec<(Uuid, u64)> = self
            .lock_monitored()
            .iter()
            .map(|(id, at)| (*id, *at))
            .collect();
        list.sort_by(|a, b| b.1.cmp(&a.1));
        list
    }

    /// Restore a saved monitored list, keeping the `limit` most recent.
    pub fn restore_monitored(&self, list: Vec<(Uuid, u64)>, limit: usize) {
        let mut sorted = list;
        sorted.sort_by(|a, b| b.1.cmp(&a.1));
        sorted.truncate(limit);
        let mut monitored = self.lock_monitored();
        monitored.clear();
        monitored.extend(sorted);
        self.core.update_soon();
    }
}

impl Monitor for JobMonitor {
    type Entity = Job;

    fn core(&self) -> &MonitorCore<Job> {
        &self.core
    }

    fn get_update(&self, client: &dyn CueClient) -> Result<Vec<Job>, CueError> {
        if self.load_mine() {
            let mine = client.get_jobs(&JobSearch::by_user(&client.current_user()))?;
            let mut monitored = self.lock_monitored();
            for job in mine {
                monitored.entry(job.id).or_insert_with(unix_now);
            }
        }
        let ids: Vec<Uuid> = self.lock_monitored().keys().copied().collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        client.get_jobs(&JobSearch {
            ids,
            include_finished: true,
            ..Default::default()
        })
    }

    fn process_update(&self, records: Vec<Job>) {
        let monitored = self.lock_monitored().clone();
        let dependent_of = self.lock_dependents().clone();

        // The server no longer knows retired jobs; finished ones that the
        // operator still monitors are carried over from the registry.
        let mut snapshot: Vec<Job> = records
            .into_iter()
            .filter(|j| monitored.contains_key(&j.id))
            .collect();
        let present: HashSet<Uuid> = snapshot.iter().map(|j| j.id).collect();
        self.core.registry.for_each(|job: &Job| {
            if job.is_finished() && monitored.contains_key(&job.id) && !present.contains(&job.id) {
                snapshot.push(job.clone());
            }
        });

        // Nest dependent-grouped jobs under their parent when the parent
        // is part of the snapshot; everything else is a root.
        let by_id: HashMap<Uuid, Job> = snapshot.iter().map(|j| (j.id, j.clone())).collect();
        let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        let mut roots: Vec<Uuid> = Vec::new();
        for job in &snapshot {
            match dependent_of.get(&job.id) {
                Some(parent) if by_id.contains_key(parent) => {
                    children.entry(*parent).or_default().push(job.id);
                }
                _ => roots.push(job.id),
            }
        }
        fn build(
            id: Uuid,
            by_id: &HashMap<Uuid, Job>,
            children: &HashMap<Uuid, Vec<Uuid>>,
        ) -> NestedNode<Job> {
            NestedNode {
                entity: by_id[&id].clone(),
                children: children
                    .get(&id)
                    .map(|kids| kids.iter().map(|k| build(*k, by_id, children)).collect())
                    .unwrap_or_default(),
            }
        }
        let tree: Vec<NestedNode<Job>> = roots
            .into_iter()
            .map(|id| build(id, &by_id, &children))
            .collect();
        self.core.registry.merge_nested(tree);
    }
}

fn job_columns() -> ColumnModel<Job> {
    ColumnModel::builder()
        .column("Job", "name", 48, |j: &Job| j.name.clone())
        .sort(|j: &Job| SortKey::Text(j.name.clone()))
        .tooltip("The name of the job: show-shot-user_descriptor")
        .column("State", "state", 10, |j: &Job| {
            if j.is_finished() {
                "Finished".to_string()
            } else if j.is_paused {
                "Paused".to_string()
            } else if j.stats.frames.dead > 0 {
                "Failing".to_string()
            } else {
                "In Progress".to_string()
            }
        })
        .column("Done", "done", 8, |j: &Job| {
            let total = j.stats.frames.total().max(1);
            format!("{}%", j.stats.frames.succeeded * 100 / total)
        })
        .sort(|j: &Job| {
            SortKey::Int(
                (j.stats.frames.succeeded * 100 / j.stats.frames.total().max(1)) as i64,
            )
        })
        .delegate(super::Delegate::ProgressBar)
        .column("Cores", "cores", 7, |j: &Job| {
            format!("{:.2}", j.stats.reserved_cores)
        })
        .sort(|j: &Job| SortKey::Float(j.stats.reserved_cores as f64))
        .column("Wait", "wait", 6, |j: &Job| {
            j.stats.frames.waiting.to_string()
        })
        .sort(|j: &Job| SortKey::Int(j.stats.frames.waiting as i64))
        .column("Run", "run", 6, |j: &Job| j.stats.frames.running.to_string())
        .sort(|j: &Job| SortKey::Int(j.stats.frames.running as i64))
        .column("Dead", "dead", 6, |j: &Job| j.stats.frames.dead.to_string())
        .sort(|j: &Job| SortKey::Int(j.stats.frames.dead as i64))
        .column("Pri", "priority", 5, |j: &Job| j.priority.to_string())
        .sort(|j: &Job| SortKey::Int(j.priority as i64))
        .column("User", "user", 10, |j: &Job| j.user.clone())
        .sort(|j: &Job| SortKey::Text(j.user.clone()))
        .column("MaxRss", "max_rss", 8, |j: &Job| format_mem(j.stats.max_rss))
        .sort(|j: &Job| SortKey::Int(j.stats.max_rss as i64))
        .column("Started", "started", 12, |j: &Job| format_time(j.start_time))
        .sort(|j: &Job| SortKey::Int(j.start_time as i64))
        .column("Stopped", "stopped", 12, |j: &Job| format_time(j.stop_time))
        .sort(|j: &Job| SortKey::Int(j.stop_time as i64))
        .hidden()
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityKey, EntityKind};
    use crate::rpc::fake::{self, FakeFarm};
    use crate::rpc::CueClient;
    use std::sync::Arc;

    fn farm_with_jobs() -> (Arc<FakeFarm>, Vec<Job>) {
        let farm = Arc::new(FakeFarm::new("rb"));
        let jobs: Vec<Job> = (0..3)
            .map(|n| fake::job(&format!("testing-sh{:02}-render", n), "testing", "rb"))
            .collect();
        farm.edit(|s| s.jobs.extend(jobs.iter().cloned()));
        (farm, jobs)
    }

    fn client(farm: &Arc<FakeFarm>) -> Arc<dyn CueClient> {
        farm.clone()
    }

    #[test]
    fn load_mine_pulls_in_my_jobs() {
        let (farm, jobs) = farm_with_jobs();
        farm.edit(|s| s.jobs.push(fake::job("other-sh01-x", "other", "someone")));
        let monitor = Arc::new(JobMonitor::new());
        super::super::refresh_now(&monitor, &client(&farm));
        assert_eq!(monitor.core().registry.len(), jobs.len());
        assert!(monitor.is_monitored(jobs[0].id));
    }

    #[test]
    fn explicit_add_without_load_mine() {
        let (farm, jobs) = farm_with_jobs();
        let monitor = Arc::new(JobMonitor::new());
        monitor.set_load_mine(false);
        monitor
            .add_job(farm.as_ref(), &jobs[1].name, false)
            .unwrap();
        super::super::refresh_now(&monitor, &client(&farm));
        assert_eq!(monitor.core().registry.len(), 1);
        assert!(monitor
            .core()
            .registry
            .contains(&EntityKey::new(EntityKind::Job, jobs[1].id)));
    }

    #[test]
    fn finished_monitored_job_survives_server_purge() {
        let (farm, jobs) = farm_with_jobs();
        let monitor = Arc::new(JobMonitor::new());
        super::super::refresh_now(&monitor, &client(&farm));
        assert_eq!(monitor.core().registry.len(), 3);

        // The job finishes and later the server forgets it entirely.
        farm.edit(|s| {
            s.jobs[0].state = JobState::Finished;
        });
        super::super::refresh_now(&monitor, &client(&farm));
        farm.edit(|s| {
            s.jobs.remove(0);
        });
        super::super::refresh_now(&monitor, &client(&farm));
        let key = EntityKey::new(EntityKind::Job, jobs[0].id);
        assert!(monitor.core().registry.contains(&key));
        assert_eq!(monitor.core().registry.len(), 3);
    }

    #[test]
    fn dependent_jobs_nest_under_parent() {
        let (farm, jobs) = farm_with_jobs();
        let parent = jobs[0].clone();
        let child = jobs[1].clone();
        farm.edit(|s| {
            s.depends.push(crate::model::Depend {
                id: Uuid::new_v4(),
                depend_type: "JobOnJob".to_string(),
                active: true,
                depender_job: child.name.clone(),
                depender_job_id: child.id,
                depend_on_job: parent.name.clone(),
                depend_on_job_id: parent.id,
            });
        });
        let monitor = Arc::new(JobMonitor::new());
        monitor.set_load_mine(false);
        monitor.add_job(farm.as_ref(), &parent.name, true).unwrap();
        super::super::refresh_now(&monitor, &client(&farm));

        let parent_key = EntityKey::new(EntityKind::Job, parent.id);
        monitor.core().registry.set_expanded(&parent_key, true);
        let rows = monitor.core().registry.visible();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, parent_key);
        assert_eq!(rows[1].depth, 1);
        assert_eq!(rows[1].key, EntityKey::new(EntityKind::Job, child.id));
    }

    #[test]
    fn session_round_trip_truncates_to_most_recent() {
        let monitor = JobMonitor::new();
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let list: Vec<(Uuid, u64)> = ids.iter().enumerate().map(|(n, id)| (*id, n as u64)).collect();
        monitor.restore_monitored(list, 3);
        let restored = monitor.monitored_for_session();
        assert_eq!(restored.len(), 3);
        // Most recently added first.
        assert_eq!(restored[0].0, ids[4]);
        assert_eq!(restored[2].0, ids[2]);
    }

    #[test]
    fn colors_stick_per_job() {
        let monitor = JobMonitor::new();
        let id = Uuid::new_v4();
        monitor.set_color(id, Some(4));
        assert_eq!(monitor.color(id), Some(4));
        monitor.set_color(id, Some(USER_COLOR_SLOTS + 1));
        assert_eq!(monitor.color(id), None);
    }

    #[test]
    fn clear_resets_membership() {
        let (farm, _jobs) = farm_with_jobs();
        let monitor = Arc::new(JobMonitor::new());
        super::super::refresh_now(&monitor, &client(&farm));
        assert!(!monitor.core().registry.is_empty());
        monitor.clear();
        assert!(monitor.core().registry.is_empty());
        assert!(monitor.monitored_for_session().is_empty());
    }
}
