//! In-memory farm.
//!
//! A [`CueClient`] backed by a mutable snapshot of farm state, used by the
//! test suites and by `cue-monitor --demo`. Mutations behave like the real
//! scheduler where the monitors can observe the difference (pause flips
//! `is_paused`, eat moves frames to `Eaten`, redirect stamps
//! `redirect_target`), and `get_frames` enforces the gateway's
//! changed-since clock-skew rejection.

use super::{CueClient, CueError, FrameSearch, HostSearch, JobSearch, ProcSearch, ReorderPosition};
use crate::model::{
    Allocation, CheckpointState, Comment, Depend, EntityKey, EntityKind, Frame, FrameState, Group,
    GroupStats, Host, HostState, Job, JobState, JobStats, Layer, LayerStats, Limit, LockState,
    Proc, Service, Show, Subscription, ThreadMode,
};

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Tolerated clock skew for changed-since queries, matching the server.
const MAX_SKEW_SECS: u64 = 60;

#[derive(Debug, Default)]
pub struct FarmState {
    pub shows: Vec<Show>,
    pub groups: Vec<Group>,
    pub jobs: Vec<Job>,
    pub layers: Vec<Layer>,
    pub frames: Vec<Frame>,
    pub hosts: Vec<Host>,
    pub procs: Vec<Proc>,
    pub allocations: Vec<Allocation>,
    pub subscriptions: Vec<Subscription>,
    pub services: Vec<Service>,
    pub comments: Vec<(Uuid, Comment)>,
    pub depends: Vec<Depend>,
    pub limits: Vec<Limit>,
    /// Server clock override for tests; `None` uses the wall clock.
    pub now: Option<u64>,
    /// When set, the next query returns this error once.
    pub fail_next: Option<CueError>,
}

impl FarmState {
    fn now(&self) -> u64 {
        self.now.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0)
        })
    }

    fn job_mut(&mut self, id: Uuid) -> Result<&mut Job, CueError> {
        self.jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(CueError::EntityVanished(EntityKey::new(EntityKind::Job, id)))
    }

    fn host_mut(&mut self, id: Uuid) -> Result<&mut Host, CueError> {
        self.hosts
            .iter_mut()
            .find(|h| h.id == id)
            .ok_or(CueError::EntityVanished(EntityKey::new(EntityKind::Host, id)))
    }
}

pub struct FakeFarm {
    state: Mutex<FarmState>,
    user: String,
}

impl FakeFarm {
    pub fn new(user: &str) -> FakeFarm {
        FakeFarm {
            state: Mutex::new(FarmState::default()),
            user: user.to_string(),
        }
    }

    /// Run `f` against the farm state. Tests and the demo seeder use this
    /// to stage entities and flip the clock.
    pub fn edit<R>(&self, f: impl FnOnce(&mut FarmState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut state)
    }

    fn query<R>(&self, f: impl FnOnce(&FarmState) -> R) -> Result<R, CueError> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }
        Ok(f(&state))
    }

    fn mutate(&self, f: impl FnOnce(&mut FarmState) -> Result<(), CueError>) -> Result<(), CueError> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }
        f(&mut state)
    }
}

pub fn show(name: &str) -> Show {
    Show {
        id: Uuid::new_v4(),
        name: name.to_string(),
        active: true,
        reserved_cores: 0.0,
        running_frames: 0,
        pending_frames: 0,
        pending_jobs: 0,
    }
}

pub fn group(name: &str, show_name: &str, parent: Option<Uuid>) -> Group {
    Group {
        id: Uuid::new_v4(),
        name: name.to_string(),
        parent_id: parent,
        show_name: show_name.to_string(),
        department: "unknown".to_string(),
        min_cores: 0.0,
        max_cores: -1.0,
        min_gpus: 0,
        max_gpus: 0,
        stats: GroupStats::default(),
    }
}

pub fn job(name: &str, show_name: &str, user: &str) -> Job {
    Job {
        id: Uuid::new_v4(),
        name: name.to_string(),
        show: show_name.to_string(),
        shot: "sh010".to_string(),
        user: user.to_string(),
        facility: "local".to_string(),
        group: String::new(),
        state: JobState::Pending,
        is_paused: false,
        auto_eat: false,
        has_comment: false,
        min_cores: 1.0,
        max_cores: 200.0,
        min_gpus: 0,
        max_gpus: 0,
        priority: 1,
        start_time: 1,
        stop_time: 0,
        log_dir: "/tmp/rqd/logs".to_string(),
        stats: JobStats::default(),
    }
}

pub fn layer(name: &str, job_id: Uuid) -> Layer {
    Layer {
        id: Uuid::new_v4(),
        name: name.to_string(),
        job_id,
        dispatch_order: 0,
        services: vec!["shell".to_string()],
        limits: vec![],
        range: "1-10".to_string(),
        chunk_size: 1,
        min_cores: 1.0,
        min_memory: 2 * 1024 * 1024,
        min_gpus: 0,
        min_gpu_memory: 0,
        timeout: 0,
        timeout_llu: 0,
        tags: vec![],
        stats: LayerStats::default(),
    }
}

pub fn frame(number: i64, layer: &Layer, state: FrameState) -> Frame {
    Frame {
        id: Uuid::new_v4(),
        number,
        layer_id: layer.id,
        layer_name: layer.name.clone(),
        job_id: layer.job_id,
        state,
        state_override: None,
        last_resource: String::new(),
        retry_count: 0,
        checkpoint_state: CheckpointState::Disabled,
        checkpoint_count: 0,
        start_time: 0,
        stop_time: 0,
        used_memory: 0,
        max_rss: 0,
        used_gpu_memory: 0,
        max_gpu_memory: 0,
    }
}

pub fn host(name: &str, allocation: &str) -> Host {
    Host {
        id: Uuid::new_v4(),
        name: name.to_string(),
        allocation: allocation.to_string(),
        os: "linux".to_string(),
        state: HostState::Up,
        lock_state: LockState::Open,
        thread_mode: ThreadMode::Auto,
        cores: 16.0,
        idle_cores: 16.0,
        gpus: 0,
        idle_gpus: 0,
        memory: 64 * 1024 * 1024,
        idle_memory: 64 * 1024 * 1024,
        free_memory: 64 * 1024 * 1024,
        swap: 8 * 1024 * 1024,
        free_swap: 8 * 1024 * 1024,
        gpu_memory: 0,
        idle_gpu_memory: 0,
        free_gpu_memory: 0,
        tags: vec!["general".to_string()],
        has_comment: false,
        ping_time: 0,
    }
}

pub fn proc(name: &str, host: &Host, job: &Job, layer: &Layer, frame: &Frame) -> Proc {
    Proc {
        id: Uuid::new_v4(),
        name: name.to_string(),
        host_name: host.name.clone(),
        job_id: job.id,
        job_name: job.name.clone(),
        layer_name: layer.name.clone(),
        frame_name: frame.name(),
        show_name: job.show.clone(),
        group_name: job.group.clone(),
        services: layer.services.clone(),
        reserved_cores: layer.min_cores,
        reserved_memory: layer.min_memory,
        reserved_gpu_memory: 0,
        used_memory: 0,
        used_gpu_memory: 0,
        dispatch_time: frame.start_time,
        log_path: format!("{}/{}.{}.rqlog", job.log_dir, job.name, frame.name()),
        unbooked: false,
        redirect_target: None,
    }
}

impl CueClient for FakeFarm {
    fn current_user(&self) -> String {
        self.user.clone()
    }

    fn get_active_shows(&self) -> Result<Vec<Show>, CueError> {
        self.query(|s| s.shows.iter().filter(|x| x.active).cloned().collect())
    }

    fn get_shows(&self) -> Result<Vec<Show>, CueError> {
        self.query(|s| s.shows.clone())
    }

    fn find_show(&self, name: &str) -> Result<Show, CueError> {
        self.query(|s| s.shows.iter().find(|x| x.name == name).cloned())?
            .ok_or_else(|| CueError::Validation(format!("no show named {}", name)))
    }

    fn get_groups(&self, show: &str) -> Result<Vec<Group>, CueError> {
        self.query(|s| {
            s.groups
                .iter()
                .filter(|g| g.show_name == show)
                .cloned()
                .collect()
        })
    }

    fn get_jobs(&self, search: &JobSearch) -> Result<Vec<Job>, CueError> {
        self.query(|s| {
            s.jobs
                .iter()
                .filter(|j| search.include_finished || j.state != JobState::Finished)
                .filter(|j| search.users.is_empty() || search.users.contains(&j.user))
                .filter(|j| search.shows.is_empty() || search.shows.contains(&j.show))
                .filter(|j| search.shots.is_empty() || search.shots.contains(&j.shot))
                .filter(|j| search.ids.is_empty() || search.ids.contains(&j.id))
                .filter(|j| {
                    search.substr.is_empty()
                        || search.substr.iter().any(|sub| j.name.contains(sub.as_str()))
                })
                .cloned()
                .collect()
        })
    }

    fn find_job(&self, name: &str) -> Result<Job, CueError> {
        self.query(|s| s.jobs.iter().find(|j| j.name == name).cloned())?
            .ok_or_else(|| CueError::Validation(format!("no job named {}", name)))
    }

    fn get_job(&self, id: Uuid) -> Result<Job, CueError> {
        self.query(|s| s.jobs.iter().find(|j| j.id == id).cloned())?
            .ok_or(CueError::EntityVanished(EntityKey::new(EntityKind::Job, id)))
    }

    fn get_layers(&self, job: Uuid) -> Result<Vec<Layer>, CueError> {
        self.query(|s| s.layers.iter().filter(|l| l.job_id == job).cloned().collect())
    }

    fn get_frames(&self, search: &FrameSearch) -> Result<Vec<Frame>, CueError> {
        self.query(|s| {
            if search.changed_since > s.now().saturating_add(MAX_SKEW_SECS) {
                return Err(CueError::TimestampSkew);
            }
            let page = search.page.max(1) as usize;
            let limit = search.limit.max(1) as usize;
            Ok(s.frames
                .iter()
                .filter(|f| f.job_id == search.job)
                .filter(|f| search.layers.is_empty() || search.layers.contains(&f.layer_name))
                .filter(|f| search.states.is_empty() || search.states.contains(&f.state))
                .skip((page - 1) * limit)
                .take(limit)
                .cloned()
                .collect())
        })?
    }

    fn get_hosts(&self, search: &HostSearch) -> Result<Vec<Host>, CueError> {
        self.query(|s| {
            s.hosts
                .iter()
                .filter(|h| {
                    search.allocations.is_empty() || search.allocations.contains(&h.allocation)
                })
                .filter(|h| {
                    search.substr.is_empty()
                        || search.substr.iter().any(|sub| h.name.contains(sub.as_str()))
                })
                .cloned()
                .collect()
        })
    }

    fn get_procs(&self, search: &ProcSearch) -> Result<Vec<Proc>, CueError> {
        self.query(|s| {
            let procs: Vec<Proc> = s
                .procs
                .iter()
                .filter(|p| search.shows.is_empty() || search.shows.contains(&p.show_name))
                .filter(|p| search.jobs.is_empty() || search.jobs.contains(&p.job_name))
                .filter(|p| {
                    search.allocations.is_empty() || {
                        s.hosts
                            .iter()
                            .find(|h| h.name == p.host_name)
                            .map(|h| search.allocations.contains(&h.allocation))
                            .unwrap_or(false)
                    }
                })
                .cloned()
                .collect();
            match search.max_results {
                Some(max) => procs.into_iter().take(max as usize).collect(),
                None => procs,
            }
        })
    }

    fn get_allocations(&self) -> Result<Vec<Allocation>, CueError> {
        self.query(|s| s.allocations.clone())
    }

    fn get_subscriptions(&self, show: &str) -> Result<Vec<Subscription>, CueError> {
        self.query(|s| {
            s.subscriptions
                .iter()
                .filter(|x| x.show_name == show)
                .cloned()
                .collect()
        })
    }

    fn get_default_services(&self) -> Result<Vec<Service>, CueError> {
        self.query(|s| s.services.clone())
    }

    fn get_limits(&self) -> Result<Vec<Limit>, CueError> {
        self.query(|s| s.limits.clone())
    }

    fn get_comments(&self, job: Uuid) -> Result<Vec<Comment>, CueError> {
        self.query(|s| {
            s.comments
                .iter()
                .filter(|(j, _)| *j == job)
                .map(|(_, c)| c.clone())
                .collect()
        })
    }

    fn get_what_depends_on(&self, job: Uuid) -> Result<Vec<Depend>, CueError> {
        self.query(|s| {
            s.depends
                .iter()
                .filter(|d| d.depend_on_job_id == job)
                .cloned()
                .collect()
        })
    }

    fn predicted_eta(&self, frame: Uuid) -> Result<f64, CueError> {
        self.query(|s| {
            let f = match s.frames.iter().find(|f| f.id == frame) {
                Some(f) => f,
                None => return 0.0,
            };
            let avg = s
                .layers
                .iter()
                .find(|l| l.id == f.layer_id)
                .map(|l| l.stats.avg_frame_secs)
                .unwrap_or(0);
            (avg as f64 - f.runtime(s.now()) as f64).max(0.0)
        })
    }

    fn kill_job(&self, job: Uuid) -> Result<(), CueError> {
        self.mutate(|s| {
            s.job_mut(job)?.state = JobState::Finished;
            Ok(())
        })
    }

    fn pause_job(&self, job: Uuid) -> Result<(), CueError> {
        self.mutate(|s| {
            s.job_mut(job)?.is_paused = true;
            Ok(())
        })
    }

    fn resume_job(&self, job: Uuid) -> Result<(), CueError> {
        self.mutate(|s| {
            s.job_mut(job)?.is_paused = false;
            Ok(())
        })
    }

    fn set_job_min_cores(&self, job: Uuid, cores: f32) -> Result<(), CueError> {
        self.mutate(|s| {
            s.job_mut(job)?.min_cores = cores;
            Ok(())
        })
    }

    fn set_job_max_cores(&self, job: Uuid, cores: f32) -> Result<(), CueError> {
        self.mutate(|s| {
            s.job_mut(job)?.max_cores = cores;
            Ok(())
        })
    }

    fn set_job_priority(&self, job: Uuid, priority: i32) -> Result<(), CueError> {
        self.mutate(|s| {
            s.job_mut(job)?.priority = priority;
            Ok(())
        })
    }

    fn set_job_auto_eat(&self, job: Uuid, auto_eat: bool) -> Result<(), CueError> {
        self.mutate(|s| {
            s.job_mut(job)?.auto_eat = auto_eat;
            Ok(())
        })
    }

    fn add_comment(&self, job: Uuid, comment: Comment) -> Result<(), CueError> {
        self.mutate(|s| {
            s.job_mut(job)?.has_comment = true;
            s.comments.push((job, comment));
            Ok(())
        })
    }

    fn eat_frames(&self, search: &FrameSearch) -> Result<(), CueError> {
        self.set_frames(search, FrameState::Eaten)
    }

    fn retry_frames(&self, search: &FrameSearch) -> Result<(), CueError> {
        self.set_frames(search, FrameState::Waiting)
    }

    fn kill_frames(&self, search: &FrameSearch) -> Result<(), CueError> {
        self.set_frames(search, FrameState::Dead)
    }

    fn markdone_frames(&self, search: &FrameSearch) -> Result<(), CueError> {
        self.set_frames(search, FrameState::Succeeded)
    }

    fn reorder_frames(
        &self,
        _layer: Uuid,
        _range: &str,
        _position: ReorderPosition,
    ) -> Result<(), CueError> {
        Ok(())
    }

    fn stagger_frames(&self, _layer: Uuid, _range: &str, stagger: i32) -> Result<(), CueError> {
        if stagger < 1 {
            return Err(CueError::Validation("stagger must be positive".to_string()));
        }
        Ok(())
    }

    fn lock_host(&self, host: Uuid) -> Result<(), CueError> {
        self.mutate(|s| {
            s.host_mut(host)?.lock_state = LockState::Locked;
            Ok(())
        })
    }

    fn unlock_host(&self, host: Uuid) -> Result<(), CueError> {
        self.mutate(|s| {
            s.host_mut(host)?.lock_state = LockState::Open;
            Ok(())
        })
    }

    fn reboot_host(&self, host: Uuid) -> Result<(), CueError> {
        self.mutate(|s| {
            s.host_mut(host)?.state = HostState::Rebooting;
            Ok(())
        })
    }

    fn add_host_tags(&self, host: Uuid, tags: &[String]) -> Result<(), CueError> {
        self.mutate(|s| {
            let h = s.host_mut(host)?;
            for tag in tags {
                if !h.tags.contains(tag) {
                    h.tags.push(tag.clone());
                }
            }
            Ok(())
        })
    }

    fn remove_host_tags(&self, host: Uuid, tags: &[String]) -> Result<(), CueError> {
        self.mutate(|s| {
            s.host_mut(host)?.tags.retain(|t| !tags.contains(t));
            Ok(())
        })
    }

    fn set_host_allocation(&self, host: Uuid, allocation: &str) -> Result<(), CueError> {
        self.mutate(|s| {
            s.host_mut(host)?.allocation = allocation.to_string();
            Ok(())
        })
    }

    fn unbook_proc(&self, proc_id: Uuid, _kill: bool) -> Result<(), CueError> {
        self.mutate(|s| {
            if let Some(p) = s.procs.iter_mut().find(|p| p.id == proc_id) {
                p.unbooked = true;
            }
            Ok(())
        })
    }

    fn kill_proc(&self, proc_id: Uuid) -> Result<(), CueError> {
        self.mutate(|s| {
            s.procs.retain(|p| p.id != proc_id);
            Ok(())
        })
    }

    fn redirect_procs(&self, procs: &[Uuid], target_job: Uuid) -> Result<(), CueError> {
        self.mutate(|s| {
            let target = s
                .jobs
                .iter()
                .find(|j| j.id == target_job)
                .map(|j| j.name.clone())
                .ok_or(CueError::EntityVanished(EntityKey::new(
                    EntityKind::Job,
                    target_job,
                )))?;
            for p in s.procs.iter_mut() {
                if procs.contains(&p.id) {
                    p.redirect_target = Some(target.clone());
                }
            }
            Ok(())
        })
    }

    fn reparent_jobs(&self, group: Uuid, jobs: &[Uuid]) -> Result<(), CueError> {
        self.mutate(|s| {
            let group_name = s
                .groups
                .iter()
                .find(|g| g.id == group)
                .map(|g| g.name.clone())
                .ok_or(CueError::EntityVanished(EntityKey::new(
                    EntityKind::Group,
                    group,
                )))?;
            for j in s.jobs.iter_mut() {
                if jobs.contains(&j.id) {
                    j.group = group_name.clone();
                }
            }
            Ok(())
        })
    }

    fn reparent_groups(&self, group: Uuid, groups: &[Uuid]) -> Result<(), CueError> {
        self.mutate(|s| {
            for g in s.groups.iter_mut() {
                if groups.contains(&g.id) {
                    g.parent_id = Some(group);
                }
            }
            Ok(())
        })
    }
}

impl FakeFarm {
    fn set_frames(&self, search: &FrameSearch, state: FrameState) -> Result<(), CueError> {
        self.mutate(|s| {
            for f in s.frames.iter_mut() {
                if f.job_id == search.job
                    && (search.layers.is_empty() || search.layers.contains(&f.layer_name))
                    && (search.states.is_empty() || search.states.contains(&f.state))
                {
                    f.state = state;
                }
            }
            Ok(())
        })
    }

    /// A small seeded farm for `cue-monitor --demo`.
    pub fn demo() -> FakeFarm {
        let farm = FakeFarm::new("demo");
        farm.edit(|s| {
            let now = s.now();
            s.shows.push(show("testing"));
            let mut root = group("testing", "testing", None);
            root.department = "root".to_string();
            let fx = group("fx", "testing", Some(root.id));
            s.groups.push(root);
            s.groups.push(fx.clone());

            s.allocations.push(Allocation {
                id: Uuid::new_v4(),
                name: "local.general".to_string(),
                facility: "local".to_string(),
                tag: "general".to_string(),
                cores: 320.0,
                available_cores: 120.0,
                hosts: 20,
                locked_hosts: 0,
                down_hosts: 1,
            });
            s.subscriptions.push(Subscription {
                id: Uuid::new_v4(),
                name: "testing.local.general".to_string(),
                show_name: "testing".to_string(),
                allocation_name: "local.general".to_string(),
                size: 100.0,
                burst: 150.0,
                reserved_cores: 40.0,
            });

            for i in 0..4 {
                let mut j = job(
                    &format!("testing-sh{:03}-demo_render_v{}", i + 10, i + 1),
                    "testing",
                    "demo",
                );
                j.group = fx.name.clone();
                j.start_time = now.saturating_sub(3600 * (i as u64 + 1));
                let mut l = layer("render", j.id);
                l.stats.avg_frame_secs = 600;
                for n in 1..=10 {
                    let state = match n % 4 {
                        0 => FrameState::Succeeded,
                        1 => FrameState::Running,
                        2 => FrameState::Waiting,
                        _ => FrameState::Depend,
                    };
                    let mut f = frame(n, &l, state);
                    if state == FrameState::Running {
                        f.start_time = now.saturating_sub(900);
                        f.last_resource = format!("host{:02}/2.0/0", n);
                        j.stats.frames.running += 1;
                    }
                    s.frames.push(f);
                }
                j.stats.frames.waiting = 3;
                j.stats.reserved_cores = j.stats.frames.running as f32 * 2.0;
                s.layers.push(l);
                s.jobs.push(j);
            }

            for n in 0..6 {
                s.hosts.push(host(&format!("host{:02}", n + 1), "local.general"));
            }
            let (jobs, layers, frames, hosts) =
                (s.jobs.clone(), s.layers.clone(), s.frames.clone(), s.hosts.clone());
            for f in frames.iter().filter(|f| f.state == FrameState::Running) {
                let j = jobs.iter().find(|j| j.id == f.job_id).unwrap();
                let l = layers.iter().find(|l| l.id == f.layer_id).unwrap();
                let h = &hosts[(f.number as usize) % hosts.len()];
                s.procs
                    .push(proc(&format!("{}/{}", h.name, f.name()), h, j, l, f));
            }
        });
        farm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changed_since_far_in_the_future_is_skew() {
        let farm = FakeFarm::new("t");
        let j = job("testing-sh010-render", "testing", "t");
        let job_id = j.id;
        farm.edit(|s| {
            s.now = Some(1_000_000);
            s.jobs.push(j);
        });
        let mut search = FrameSearch::for_job(job_id);
        search.changed_since = 1_000_000 + 120;
        assert_eq!(farm.get_frames(&search), Err(CueError::TimestampSkew));
        search.changed_since = 1_000_000 + 30;
        assert!(farm.get_frames(&search).is_ok());
    }

    #[test]
    fn frame_queries_page() {
        let farm = FakeFarm::new("t");
        let j = job("testing-sh010-render", "testing", "t");
        let l = layer("render", j.id);
        let job_id = j.id;
        farm.edit(|s| {
            for n in 1..=12 {
                s.frames.push(frame(n, &l, FrameState::Waiting));
            }
            s.layers.push(l);
            s.jobs.push(j);
        });
        let mut search = FrameSearch::for_job(job_id);
        search.limit = 5;
        search.page = 3;
        let page = farm.get_frames(&search).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].number, 11);
    }

    #[test]
    fn pause_and_resume_round_trip() {
        let farm = FakeFarm::new("t");
        let j = job("testing-sh010-render", "testing", "t");
        let id = j.id;
        farm.edit(|s| s.jobs.push(j));
        farm.pause_job(id).unwrap();
        assert!(farm.get_job(id).unwrap().is_paused);
        farm.resume_job(id).unwrap();
        assert!(!farm.get_job(id).unwrap().is_paused);
    }

    #[test]
    fn missing_job_vanishes() {
        let farm = FakeFarm::new("t");
        let id = Uuid::new_v4();
        match farm.get_job(id) {
            Err(CueError::EntityVanished(key)) => assert_eq!(key.id, id),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn demo_farm_is_coherent() {
        let farm = FakeFarm::demo();
        let shows = farm.get_active_shows().unwrap();
        assert_eq!(shows.len(), 1);
        let jobs = farm.get_jobs(&JobSearch::default()).unwrap();
        assert!(!jobs.is_empty());
        let procs = farm.get_procs(&ProcSearch::default()).unwrap();
        assert!(!procs.is_empty());
        for p in procs {
            assert!(p.log_path.ends_with(".rqlog"));
        }
    }
}
