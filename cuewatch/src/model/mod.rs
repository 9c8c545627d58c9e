//! Farm entity records.
//!
//! These are plain snapshots of server-side state. Worker threads own them
//! while a fetch is in flight; once delivered to the UI thread they are
//! moved into the monitor registries and owned there. All ids are
//! server-assigned and opaque; the canonical registry key is `"<Kind>.<id>"`.

pub mod display;

pub use display::{format_duration, format_mem, format_time, parse_last_resource, FrameRange};

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Show,
    Group,
    Job,
    Layer,
    Frame,
    Host,
    Proc,
    Allocation,
    Subscription,
    Comment,
    Service,
    Depend,
    Limit,
    Filter,
    Task,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Canonical registry key, `"<Kind>.<id>"`. Globally unique within a tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: Uuid) -> EntityKey {
        EntityKey { kind, id }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.id)
    }
}

/// Anything that can live in a monitor tree.
pub trait Keyed {
    fn key(&self) -> EntityKey;
    /// Human-readable identity, used for sorting fallback and logging.
    fn label(&self) -> &str;
}

macro_rules! keyed {
    ($ty:ident, $kind:ident, $label:ident) => {
        impl Keyed for $ty {
            fn key(&self) -> EntityKey {
                EntityKey::new(EntityKind::$kind, self.id)
            }
            fn label(&self) -> &str {
                &self.$label
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameState {
    Waiting,
    Setup,
    Running,
    Succeeded,
    Dead,
    Eaten,
    Depend,
    Checkpoint,
}

impl FrameState {
    pub const ALL: [FrameState; 8] = [
        FrameState::Waiting,
        FrameState::Setup,
        FrameState::Running,
        FrameState::Succeeded,
        FrameState::Dead,
        FrameState::Eaten,
        FrameState::Depend,
        FrameState::Checkpoint,
    ];
}

impl fmt::Display for FrameState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostState {
    Up,
    Down,
    Repair,
    Rebooting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockState {
    Open,
    Locked,
    NimbyLocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadMode {
    Auto,
    All,
    Variable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointState {
    Disabled,
    Enabled,
    Copying,
    Complete,
}

/// Per-state frame counts, shared by job, layer and group aggregates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameStateTotals {
    pub waiting: u32,
    pub setup: u32,
    pub running: u32,
    pub succeeded: u32,
    pub dead: u32,
    pub eaten: u32,
    pub depend: u32,
    pub checkpoint: u32,
}

impl FrameStateTotals {
    pub fn total(&self) -> u32 {
        self.waiting
            + self.setup
            + self.running
            + self.succeeded
            + self.dead
            + self.eaten
            + self.depend
            + self.checkpoint
    }

    pub fn pending(&self) -> u32 {
        self.waiting + self.setup + self.depend + self.checkpoint
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStats {
    pub frames: FrameStateTotals,
    pub reserved_cores: f32,
    pub reserved_gpus: u32,
    pub max_rss: u64,
    pub max_gpu_mem: u64,
    pub avg_frame_secs: u32,
    pub remaining_core_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerStats {
    pub frames: FrameStateTotals,
    pub avg_frame_secs: u32,
    pub max_rss: u64,
    pub reserved_cores: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub reserved_cores: f32,
    pub running_frames: u32,
    pub dead_frames: u32,
    pub waiting_frames: u32,
    pub pending_jobs: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Show {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
    pub reserved_cores: f32,
    pub running_frames: u32,
    pub pending_frames: u32,
    pub pending_jobs: u32,
}

keyed!(Show, Show, name);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    /// None for a show's root group.
    pub parent_id: Option<Uuid>,
    pub show_name: String,
    pub department: String,
    pub min_cores: f32,
    pub max_cores: f32,
    pub min_gpus: u32,
    pub max_gpus: u32,
    pub stats: GroupStats,
}

keyed!(Group, Group, name);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub show: String,
    pub shot: String,
    pub user: String,
    pub facility: String,
    pub group: String,
    pub state: JobState,
    pub is_paused: bool,
    pub auto_eat: bool,
    pub has_comment: bool,
    pub min_cores: f32,
    pub max_cores: f32,
    pub min_gpus: u32,
    pub max_gpus: u32,
    pub priority: i32,
    pub start_time: u64,
    pub stop_time: u64,
    pub log_dir: String,
    pub stats: JobStats,
}

keyed!(Job, Job, name);

impl Job {
    pub fn is_finished(&self) -> bool {
        self.state == JobState::Finished
    }

    /// Waiting frames that could still pick up procs.
    pub fn pending_waiting(&self) -> u32 {
        self.stats.frames.waiting
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: Uuid,
    pub name: String,
    pub job_id: Uuid,
    pub dispatch_order: u32,
    pub services: Vec<String>,
    pub limits: Vec<String>,
    pub range: String,
    pub chunk_size: u32,
    pub min_cores: f32,
    pub min_memory: u64,
    pub min_gpus: u32,
    pub min_gpu_memory: u64,
    pub timeout: u32,
    pub timeout_llu: u32,
    pub tags: Vec<String>,
    pub stats: LayerStats,
}

keyed!(Layer, Layer, name);

impl Layer {
    /// `"<range> chunked <N>"` when chunked, bare range otherwise.
    pub fn range_display(&self) -> String {
        if self.chunk_size > 1 {
            format!("{} chunked {}", self.range, self.chunk_size)
        } else {
            self.range.clone()
        }
    }
}

/// Optional server-pushed override for how a frame state renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameStateOverride {
    pub color: [u8; 3],
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub id: Uuid,
    pub number: i64,
    pub layer_id: Uuid,
    pub layer_name: String,
    pub job_id: Uuid,
    pub state: FrameState,
    pub state_override: Option<FrameStateOverride>,
    /// `"<host>/<cores>/<gpus>"`, textual; may be empty before dispatch.
    pub last_resource: String,
    pub retry_count: u32,
    pub checkpoint_state: CheckpointState,
    pub checkpoint_count: u32,
    pub start_time: u64,
    pub stop_time: u64,
    pub used_memory: u64,
    pub max_rss: u64,
    pub used_gpu_memory: u64,
    pub max_gpu_memory: u64,
}

impl Keyed for Frame {
    fn key(&self) -> EntityKey {
        EntityKey::new(EntityKind::Frame, self.id)
    }
    fn label(&self) -> &str {
        &self.layer_name
    }
}

impl Frame {
    /// Dispatcher frame name, `"<0-padded number>-<layer>"`. The log file
    /// contract keys off this.
    pub fn name(&self) -> String {
        format!("{:04}-{}", self.number, self.layer_name)
    }

    /// Runtime in seconds against `now`, zero before dispatch.
    pub fn runtime(&self, now: u64) -> u64 {
        if self.start_time == 0 {
            return 0;
        }
        let end = if self.stop_time > 0 { self.stop_time } else { now };
        end.saturating_sub(self.start_time)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub id: Uuid,
    pub name: String,
    pub allocation: String,
    pub os: String,
    pub state: HostState,
    pub lock_state: LockState,
    pub thread_mode: ThreadMode,
    pub cores: f32,
    pub idle_cores: f32,
    pub gpus: u32,
    pub idle_gpus: u32,
    pub memory: u64,
    pub idle_memory: u64,
    pub free_memory: u64,
    pub swap: u64,
    pub free_swap: u64,
    pub gpu_memory: u64,
    pub idle_gpu_memory: u64,
    pub free_gpu_memory: u64,
    pub tags: Vec<String>,
    pub has_comment: bool,
    pub ping_time: u64,
}

keyed!(Host, Host, name);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proc {
    pub id: Uuid,
    pub name: String,
    pub host_name: String,
    pub job_id: Uuid,
    pub job_name: String,
    pub layer_name: String,
    pub frame_name: String,
    pub show_name: String,
    pub group_name: String,
    pub services: Vec<String>,
    pub reserved_cores: f32,
    pub reserved_memory: u64,
    pub reserved_gpu_memory: u64,
    pub used_memory: u64,
    pub used_gpu_memory: u64,
    pub dispatch_time: u64,
    pub log_path: String,
    pub unbooked: bool,
    pub redirect_target: Option<String>,
}

keyed!(Proc, Proc, name);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: Uuid,
    pub name: String,
    pub facility: String,
    pub tag: String,
    pub cores: f32,
    pub available_cores: f32,
    pub hosts: u32,
    pub locked_hosts: u32,
    pub down_hosts: u32,
}

keyed!(Allocation, Allocation, name);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub name: String,
    pub show_name: String,
    pub allocation_name: String,
    pub size: f32,
    pub burst: f32,
    pub reserved_cores: f32,
}

keyed!(Subscription, Subscription, name);

impl Subscription {
    /// Cores left before the burst ceiling.
    pub fn burst_slack(&self) -> f32 {
        (self.burst - self.reserved_cores).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub user: String,
    pub subject: String,
    pub message: String,
    pub timestamp: u64,
}

keyed!(Comment, Comment, subject);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    pub threadable: bool,
    pub min_cores: f32,
    pub max_cores: f32,
    pub min_memory: u64,
    pub tags: Vec<String>,
}

keyed!(Service, Service, name);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Depend {
    pub id: Uuid,
    pub depend_type: String,
    pub active: bool,
    pub depender_job: String,
    pub depender_job_id: Uuid,
    pub depend_on_job: String,
    pub depend_on_job_id: Uuid,
}

keyed!(Depend, Depend, depend_type);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    pub id: Uuid,
    pub name: String,
    pub max_value: u32,
    pub current_running: u32,
}

keyed!(Limit, Limit, name);

/// Booking filter attached to a show. The matcher/action rows inside it
/// stay server-side; the console only lists and reorders filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub id: Uuid,
    pub name: String,
    pub filter_type: String,
    pub order: f32,
    pub enabled: bool,
}

keyed!(Filter, Filter, name);

/// Per-department task weight within a show.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub department: String,
    pub shot: String,
    pub min_cores: f32,
    pub adjust_cores: f32,
}

keyed!(Task, Task, name);
