//! Gateway wire client.
//!
//! Implements [`CueClient`] over the scheduler's JSON gateway: one request
//! per line (`{"id", "method", "params"}`), one response per line
//! (`{"id", "result"}` or `{"id", "error": {"kind", "message"}}`). The
//! line framing makes it trivial to split the stream back into messages at
//! the receiving end.
//!
//! Calls are serialized over a single connection; the whole client sits
//! behind one mutex, which is fine because only worker threads and the
//! admin CLI issue calls, never the UI thread directly.

use super::{
    CueClient, CueError, FrameSearch, HostSearch, JobSearch, ProcSearch, ReorderPosition,
};
use crate::model::{
    Allocation, Comment, Depend, EntityKey, EntityKind, Frame, Group, Host, Job, Layer, Limit,
    Proc, Service, Show, Subscription,
};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_PORT: u16 = 8443;

#[derive(Serialize)]
struct Request<'a, P: Serialize> {
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct Response<R> {
    id: u64,
    result: Option<R>,
    error: Option<WireError>,
}

#[derive(Deserialize)]
struct WireError {
    kind: String,
    message: String,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    entity: Option<String>,
}

impl WireError {
    fn into_cue_error(self) -> CueError {
        match self.kind.as_str() {
            "timestampSkew" => CueError::TimestampSkew,
            "entityVanished" => {
                let key = self
                    .entity
                    .and_then(|e| {
                        let (kind, id) = e.split_once('.')?;
                        let id = Uuid::parse_str(id).ok()?;
                        let kind = match kind {
                            "Show" => EntityKind::Show,
                            "Group" => EntityKind::Group,
                            "Job" => EntityKind::Job,
                            "Layer" => EntityKind::Layer,
                            "Frame" => EntityKind::Frame,
                            "Host" => EntityKind::Host,
                            "Proc" => EntityKind::Proc,
                            _ => return None,
                        };
                        Some(EntityKey::new(kind, id))
                    })
                    .unwrap_or_else(|| EntityKey::new(EntityKind::Job, Uuid::nil()));
                CueError::EntityVanished(key)
            }
            "permissionDenied" => CueError::PermissionDenied {
                owner: self.owner.unwrap_or_default(),
            },
            "validation" => CueError::Validation(self.message),
            _ => CueError::Transient(self.message),
        }
    }
}

struct Conn {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    next_id: u64,
}

/// A [`CueClient`] talking to a gateway endpoint over TCP.
pub struct WireClient {
    conn: Mutex<Conn>,
    user: String,
}

impl WireClient {
    /// Connect to `host:port`. `addr` without a port gets [`DEFAULT_PORT`].
    pub fn connect(addr: &str, user: &str) -> Result<WireClient, CueError> {
        let addr = if addr.contains(':') {
            addr.to_string()
        } else {
            format!("{}:{}", addr, DEFAULT_PORT)
        };
        let stream = TcpStream::connect(&addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(30)))?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(WireClient {
            conn: Mutex::new(Conn {
                stream,
                reader,
                next_id: 1,
            }),
            user: user.to_string(),
        })
    }

    fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, CueError> {
        let mut conn = match self.conn.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        let id = conn.next_id;
        conn.next_id += 1;

        let mut line = serde_json::to_string(&Request { id, method, params })
            .map_err(|e| CueError::Io(e.to_string()))?;
        line.push('\n');
        conn.stream.write_all(line.as_bytes())?;

        let mut reply = String::new();
        loop {
            reply.clear();
            if conn.reader.read_line(&mut reply)? == 0 {
                return Err(CueError::Io("gateway closed the connection".to_string()));
            }
            let response: Response<R> =
                serde_json::from_str(&reply).map_err(|e| CueError::Io(e.to_string()))?;
            // Replies to stale requests (a previous timeout) are skipped.
            if response.id != id {
                continue;
            }
            if let Some(err) = response.error {
                return Err(err.into_cue_error());
            }
            return response
                .result
                .ok_or_else(|| CueError::Io("gateway reply had no result".to_string()));
        }
    }

    fn act<P: Serialize>(&self, method: &str, params: P) -> Result<(), CueError> {
        let _ok: bool = self.call(method, params)?;
        Ok(())
    }
}

impl CueClient for WireClient {
    fn current_user(&self) -> String {
        self.user.clone()
    }

    fn get_active_shows(&self) -> Result<Vec<Show>, CueError> {
        self.call("getActiveShows", json!({}))
    }

    fn get_shows(&self) -> Result<Vec<Show>, CueError> {
        self.call("getShows", json!({}))
    }

    fn find_show(&self, name: &str) -> Result<Show, CueError> {
        self.call("findShow", json!({ "name": name }))
    }

    fn get_groups(&self, show: &str) -> Result<Vec<Group>, CueError> {
        self.call("getGroups", json!({ "show": show }))
    }

    fn get_jobs(&self, search: &JobSearch) -> Result<Vec<Job>, CueError> {
        self.call("getJobs", search)
    }

    fn find_job(&self, name: &str) -> Result<Job, CueError> {
        self.call("findJob", json!({ "name": name }))
    }

    fn get_job(&self, id: Uuid) -> Result<Job, CueError> {
        self.call("getJob", json!({ "id": id }))
    }

    fn get_layers(&self, job: Uuid) -> Result<Vec<Layer>, CueError> {
        self.call("getLayers", json!({ "job": job }))
    }

    fn get_frames(&self, search: &FrameSearch) -> Result<Vec<Frame>, CueError> {
        self.call("getFrames", search)
    }

    fn get_hosts(&self, search: &HostSearch) -> Result<Vec<Host>, CueError> {
        self.call("getHosts", search)
    }

    fn get_procs(&self, search: &ProcSearch) -> Result<Vec<Proc>, CueError> {
        self.call("getProcs", search)
    }

    fn get_allocations(&self) -> Result<Vec<Allocation>, CueError> {
        self.call("getAllocations", json!({}))
    }

    fn get_subscriptions(&self, show: &str) -> Result<Vec<Subscription>, CueError> {
        self.call("getSubscriptions", json!({ "show": show }))
    }

    fn get_default_services(&self) -> Result<Vec<Service>, CueError> {
        self.call("getDefaultServices", json!({}))
    }

    fn get_limits(&self) -> Result<Vec<Limit>, CueError> {
        self.call("getLimits", json!({}))
    }

    fn get_comments(&self, job: Uuid) -> Result<Vec<Comment>, CueError> {
        self.call("getComments", json!({ "job": job }))
    }

    fn get_what_depends_on(&self, job: Uuid) -> Result<Vec<Depend>, CueError> {
        self.call("getWhatDependsOnThis", json!({ "job": job }))
    }

    fn predicted_eta(&self, frame: Uuid) -> Result<f64, CueError> {
        self.call("getFrameEta", json!({ "frame": frame }))
    }

    fn kill_job(&self, job: Uuid) -> Result<(), CueError> {
        self.act("killJob", json!({ "job": job }))
    }

    fn pause_job(&self, job: Uuid) -> Result<(), CueError> {
        self.act("pauseJob", json!({ "job": job }))
    }

    fn resume_job(&self, job: Uuid) -> Result<(), CueError> {
        self.act("resumeJob", json!({ "job": job }))
    }

    fn set_job_min_cores(&self, job: Uuid, cores: f32) -> Result<(), CueError> {
        self.act("setJobMinCores", json!({ "job": job, "cores": cores }))
    }

    fn set_job_max_cores(&self, job: Uuid, cores: f32) -> Result<(), CueError> {
        self.act("setJobMaxCores", json!({ "job": job, "cores": cores }))
    }

    fn set_job_priority(&self, job: Uuid, priority: i32) -> Result<(), CueError> {
        self.act("setJobPriority", json!({ "job": job, "priority": priority }))
    }

    fn set_job_auto_eat(&self, job: Uuid, auto_eat: bool) -> Result<(), CueError> {
        self.act("setJobAutoEat", json!({ "job": job, "autoEat": auto_eat }))
    }

    fn add_comment(&self, job: Uuid, comment: Comment) -> Result<(), CueError> {
        self.act("addComment", json!({ "job": job, "comment": comment }))
    }

    fn eat_frames(&self, search: &FrameSearch) -> Result<(), CueError> {
        self.act("eatFrames", search)
    }

    fn retry_frames(&self, search: &FrameSearch) -> Result<(), CueError> {
        self.act("retryFrames", search)
    }

    fn kill_frames(&self, search: &FrameSearch) -> Result<(), CueError> {
        self.act("killFrames", search)
    }

    fn markdone_frames(&self, search: &FrameSearch) -> Result<(), CueError> {
        self.act("markdoneFrames", search)
    }

    fn reorder_frames(
        &self,
        layer: Uuid,
        range: &str,
        position: ReorderPosition,
    ) -> Result<(), CueError> {
        self.act(
            "reorderFrames",
            json!({ "layer": layer, "range": range, "position": position }),
        )
    }

    fn stagger_frames(&self, layer: Uuid, range: &str, stagger: i32) -> Result<(), CueError> {
        self.act(
            "staggerFrames",
            json!({ "layer": layer, "range": range, "stagger": stagger }),
        )
    }

    fn lock_host(&self, host: Uuid) -> Result<(), CueError> {
        self.act("lockHost", json!({ "host": host }))
    }

    fn unlock_host(&self, host: Uuid) -> Result<(), CueError> {
        self.act("unlockHost", json!({ "host": host }))
    }

    fn reboot_host(&self, host: Uuid) -> Result<(), CueError> {
        self.act("rebootHost", json!({ "host": host }))
    }

    fn add_host_tags(&self, host: Uuid, tags: &[String]) -> Result<(), CueError> {
        self.act("addHostTags", json!({ "host": host, "tags": tags }))
    }

    fn remove_host_tags(&self, host: Uuid, tags: &[String]) -> Result<(), CueError> {
        self.act("removeHostTags", json!({ "host": host, "tags": tags }))
    }

    fn set_host_allocation(&self, host: Uuid, allocation: &str) -> Result<(), CueError> {
        self.act(
            "setHostAllocation",
            json!({ "host": host, "allocation": allocation }),
        )
    }

    fn unbook_proc(&self, proc_id: Uuid, kill: bool) -> Result<(), CueError> {
        self.act("unbookProc", json!({ "proc": proc_id, "kill": kill }))
    }

    fn kill_proc(&self, proc_id: Uuid) -> Result<(), CueError> {
        self.act("killProc", json!({ "proc": proc_id }))
    }

    fn redirect_procs(&self, procs: &[Uuid], target_job: Uuid) -> Result<(), CueError> {
        self.act(
            "redirectToJob",
            json!({ "procs": procs, "job": target_job }),
        )
    }

    fn reparent_jobs(&self, group: Uuid, jobs: &[Uuid]) -> Result<(), CueError> {
        self.act("reparentJobs", json!({ "group": group, "jobs": jobs }))
    }

    fn reparent_groups(&self, group: Uuid, groups: &[Uuid]) -> Result<(), CueError> {
        self.act("reparentGroups", json!({ "group": group, "groups": groups }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_error_kinds_map_to_behaviors() {
        let err = WireError {
            kind: "timestampSkew".to_string(),
            message: String::new(),
            owner: None,
            entity: None,
        };
        assert_eq!(err.into_cue_error(), CueError::TimestampSkew);

        let err = WireError {
            kind: "permissionDenied".to_string(),
            message: String::new(),
            owner: Some("msmith".to_string()),
            entity: None,
        };
        assert_eq!(
            err.into_cue_error(),
            CueError::PermissionDenied {
                owner: "msmith".to_string()
            }
        );

        let err = WireError {
            kind: "serverOnFire".to_string(),
            message: "boom".to_string(),
            owner: None,
            entity: None,
        };
        assert_eq!(err.into_cue_error(), CueError::Transient("boom".to_string()));
    }

    #[test]
    fn vanished_entity_key_parses() {
        let id = Uuid::new_v4();
        let err = WireError {
            kind: "entityVanished".to_string(),
            message: String::new(),
            owner: None,
            entity: Some(format!("Job.{}", id)),
        };
        match err.into_cue_error() {
            CueError::EntityVanished(key) => {
                assert_eq!(key.kind, EntityKind::Job);
                assert_eq!(key.id, id);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
