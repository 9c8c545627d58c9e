//! Client surface to the scheduler.
//!
//! The monitors and engines consume the opaque [`CueClient`] trait and never
//! see a transport. `wire` provides the TCP gateway client used by the
//! tools; `fake` provides an in-memory farm for tests and demo mode.
//!
//! Every call can fail with a single [`CueError`]; callers surface it and
//! continue, the next tick retries.

pub mod fake;
pub mod wire;

use crate::model::{
    Allocation, Comment, Depend, EntityKey, Frame, FrameState, Group, Host, Job, Layer, Limit,
    Proc, Service, Show, Subscription,
};

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Default page size for frame queries.
pub const FRAME_PAGE_SIZE: u32 = 500;

#[derive(Debug, Clone, PartialEq)]
pub enum CueError {
    /// Single-operation failure; surfaced and retried on the next tick.
    Transient(String),
    /// Requested id is gone server-side; callers clear the binding.
    EntityVanished(EntityKey),
    /// Changed-since timestamp rejected; forces a full refresh.
    TimestampSkew,
    PermissionDenied { owner: String },
    Validation(String),
    Io(String),
}

impl fmt::Display for CueError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CueError::Transient(msg) => write!(f, "{}", msg),
            CueError::EntityVanished(key) => write!(f, "{} no longer exists", key),
            CueError::TimestampSkew => {
                write!(f, "timestamp cannot be over a minute off")
            }
            CueError::PermissionDenied { owner } => {
                write!(f, "permission denied, entity is owned by {}", owner)
            }
            CueError::Validation(msg) => write!(f, "{}", msg),
            CueError::Io(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for CueError {}

impl From<std::io::Error> for CueError {
    fn from(err: std::io::Error) -> CueError {
        CueError::Io(err.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSearch {
    pub substr: Vec<String>,
    pub users: Vec<String>,
    pub shows: Vec<String>,
    pub shots: Vec<String>,
    pub ids: Vec<Uuid>,
    pub include_finished: bool,
}

impl JobSearch {
    pub fn by_user(user: &str) -> JobSearch {
        JobSearch {
            users: vec![user.to_string()],
            ..Default::default()
        }
    }

    pub fn by_substr(substr: &str) -> JobSearch {
        JobSearch {
            substr: vec![substr.to_string()],
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.substr.is_empty()
            && self.users.is_empty()
            && self.shows.is_empty()
            && self.shots.is_empty()
            && self.ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSearch {
    pub job: Uuid,
    pub layers: Vec<String>,
    pub states: Vec<FrameState>,
    pub range: Option<String>,
    pub page: u32,
    pub limit: u32,
    /// Unix seconds; non-zero requests only frames changed since then.
    pub changed_since: u64,
}

impl FrameSearch {
    pub fn for_job(job: Uuid) -> FrameSearch {
        FrameSearch {
            job,
            layers: Vec::new(),
            states: Vec::new(),
            range: None,
            page: 1,
            limit: FRAME_PAGE_SIZE,
            changed_since: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostSearch {
    pub substr: Vec<String>,
    pub allocations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcSearch {
    pub shows: Vec<String>,
    pub allocations: Vec<String>,
    pub jobs: Vec<String>,
    pub max_results: Option<u32>,
}

/// Frame reorder positions for `reorder_frames`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReorderPosition {
    First,
    Last,
    Reverse,
}

/// The full client surface the console consumes. Object-safe; worker
/// threads share one `Arc<dyn CueClient>`.
pub trait CueClient: Send + Sync {
    fn current_user(&self) -> String;

    // Queries.
    fn get_active_shows(&self) -> Result<Vec<Show>, CueError>;
    fn get_shows(&self) -> Result<Vec<Show>, CueError>;
    fn find_show(&self, name: &str) -> Result<Show, CueError>;
    fn get_groups(&self, show: &str) -> Result<Vec<Group>, CueError>;
    fn get_jobs(&self, search: &JobSearch) -> Result<Vec<Job>, CueError>;
    fn find_job(&self, name: &str) -> Result<Job, CueError>;
    fn get_job(&self, id: Uuid) -> Result<Job, CueError>;
    fn get_layers(&self, job: Uuid) -> Result<Vec<Layer>, CueError>;
    fn get_frames(&self, search: &FrameSearch) -> Result<Vec<Frame>, CueError>;
    fn get_hosts(&self, search: &HostSearch) -> Result<Vec<Host>, CueError>;
    fn get_procs(&self, search: &ProcSearch) -> Result<Vec<Proc>, CueError>;
    fn get_allocations(&self) -> Result<Vec<Allocation>, CueError>;
    fn get_subscriptions(&self, show: &str) -> Result<Vec<Subscription>, CueError>;
    fn get_default_services(&self) -> Result<Vec<Service>, CueError>;
    fn get_limits(&self) -> Result<Vec<Limit>, CueError>;
    fn get_comments(&self, job: Uuid) -> Result<Vec<Comment>, CueError>;
    /// Jobs directly depending on this job (reverse dependencies).
    fn get_what_depends_on(&self, job: Uuid) -> Result<Vec<Depend>, CueError>;
    /// Predicted seconds remaining for a running frame.
    fn predicted_eta(&self, frame: Uuid) -> Result<f64, CueError>;

    // Job mutations.
    fn kill_job(&self, job: Uuid) -> Result<(), CueError>;
    fn pause_job(&self, job: Uuid) -> Result<(), CueError>;
    fn resume_job(&self, job: Uuid) -> Result<(), CueError>;
    fn set_job_min_cores(&self, job: Uuid, cores: f32) -> Result<(), CueError>;
    fn set_job_max_cores(&self, job: Uuid, cores: f32) -> Result<(), CueError>;
    fn set_job_priority(&self, job: Uuid, priority: i32) -> Result<(), CueError>;
    fn set_job_auto_eat(&self, job: Uuid, auto_eat: bool) -> Result<(), CueError>;
    fn add_comment(&self, job: Uuid, comment: Comment) -> Result<(), CueError>;

    // Frame mutations, by search within a job.
    fn eat_frames(&self, search: &FrameSearch) -> Result<(), CueError>;
    fn retry_frames(&self, search: &FrameSearch) -> Result<(), CueError>;
    fn kill_frames(&self, search: &FrameSearch) -> Result<(), CueError>;
    fn markdone_frames(&self, search: &FrameSearch) -> Result<(), CueError>;

    // Layer mutations.
    fn reorder_frames(
        &self,
        layer: Uuid,
        range: &str,
        position: ReorderPosition,
    ) -> Result<(), CueError>;
    fn stagger_frames(&self, layer: Uuid, range: &str, stagger: i32) -> Result<(), CueError>;

    // Host mutations.
    fn lock_host(&self, host: Uuid) -> Result<(), CueError>;
    fn unlock_host(&self, host: Uuid) -> Result<(), CueError>;
    fn reboot_host(&self, host: Uuid) -> Result<(), CueError>;
    fn add_host_tags(&self, host: Uuid, tags: &[String]) -> Result<(), CueError>;
    fn remove_host_tags(&self, host: Uuid, tags: &[String]) -> Result<(), CueError>;
    fn set_host_allocation(&self, host: Uuid, allocation: &str) -> Result<(), CueError>;

    // Proc mutations.
    fn unbook_proc(&self, proc_id: Uuid, kill: bool) -> Result<(), CueError>;
    fn kill_proc(&self, proc_id: Uuid) -> Result<(), CueError>;
    /// Move a host's procs onto the target job once they finish their
    /// current frames.
    fn redirect_procs(&self, procs: &[Uuid], target_job: Uuid) -> Result<(), CueError>;

    // Group mutations.
    fn reparent_jobs(&self, group: Uuid, jobs: &[Uuid]) -> Result<(), CueError>;
    fn reparent_groups(&self, group: Uuid, groups: &[Uuid]) -> Result<(), CueError>;
}
