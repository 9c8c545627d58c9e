//! Core-redirection planner.
//!
//! Given proc search filters and a target job, find source hosts whose
//! reserved cores can be moved onto the target, then run the safety
//! checks before any RPC fires: cross-show moves and burst overdraw need
//! operator confirmation, a missing subscription or a saturated target is
//! an outright rejection.

use crate::model::{Host, Job, Proc};
use crate::rpc::{CueClient, CueError, HostSearch, ProcSearch};

use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RedirectFilters {
    pub show: String,
    pub allocations: Vec<String>,
    /// A host qualifies once its accumulated procs reach these.
    pub min_cores: f32,
    /// Upper bound on a host's accumulated cores; 0 = unbounded.
    pub max_cores: f32,
    pub min_memory: u64,
    /// Qualifying hosts counted toward the plan; 0 = unbounded.
    pub result_limit: usize,
    /// Procs running longer than this are left alone; 0 = no cutoff.
    pub cutoff_runtime_secs: u64,
    pub required_service: Option<String>,
    pub excluded_job_regex: Option<String>,
    pub included_groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostCandidate {
    pub host_name: String,
    pub procs: Vec<Proc>,
    pub cores: f32,
    pub memory: u64,
    pub oldest_dispatch_age_secs: u64,
    /// Sums crossed the thresholds and the host made the result limit.
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedirectPlan {
    pub candidates: Vec<HostCandidate>,
}

impl RedirectPlan {
    pub fn ok_hosts(&self) -> Vec<&HostCandidate> {
        self.candidates.iter().filter(|c| c.ok).collect()
    }

    pub fn total_cores(&self) -> f32 {
        self.ok_hosts().iter().map(|c| c.cores).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SafetyIssue {
    /// Selected procs belong to other shows than the target's.
    CrossShow { shows: Vec<String> },
    /// Redirecting strands more cores in the allocation than the
    /// configured waste threshold.
    BurstExceeded { allocation: String, wasted_cores: f32 },
    /// The target show has no subscription in an affected allocation.
    NoSubscription { allocation: String },
    /// Target cannot absorb the incoming cores.
    TargetSaturated {
        incoming_cores: f32,
        reserved_cores: f32,
        max_cores: f32,
    },
    TargetNoWaitingFrames,
    SourceNoWaitingFrames { job: String },
}

impl SafetyIssue {
    /// Rejections stop the redirect outright; the rest want confirmation.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SafetyIssue::NoSubscription { .. }
                | SafetyIssue::TargetSaturated { .. }
                | SafetyIssue::TargetNoWaitingFrames
                | SafetyIssue::SourceNoWaitingFrames { .. }
        )
    }
}

pub struct RedirectEngine {
    pub filters: RedirectFilters,
    /// From the resources config: tolerated wasted cores per allocation.
    pub wasted_cores_threshold: f32,
}

impl RedirectEngine {
    pub fn new(filters: RedirectFilters, wasted_cores_threshold: f32) -> RedirectEngine {
        RedirectEngine {
            filters,
            wasted_cores_threshold,
        }
    }

    /// Build the candidate host list for a redirect onto `target`.
    pub fn plan(&self, client: &dyn CueClient, target: &Job) -> Result<RedirectPlan, CueError> {
        let f = &self.filters;
        let exclude_re = match &f.excluded_job_regex {
            Some(pattern) => Some(
                Regex::new(pattern)
                    .map_err(|e| CueError::Validation(format!("bad exclude pattern: {}", e)))?,
            ),
            None => None,
        };
        let procs = client.get_procs(&ProcSearch {
            shows: vec![f.show.clone()],
            allocations: f.allocations.clone(),
            ..Default::default()
        })?;
        let now = unix_now();

        // BTreeMap keeps candidate order stable across plans.
        let mut hosts: BTreeMap<String, HostCandidate> = BTreeMap::new();
        for proc in procs {
            if proc.job_id == target.id || proc.redirect_target.is_some() || proc.unbooked {
                continue;
            }
            if let Some(service) = &f.required_service {
                if !proc.services.iter().any(|s| s == service) {
                    continue;
                }
            }
            if !f.included_groups.is_empty() && !f.included_groups.contains(&proc.group_name) {
                continue;
            }
            if let Some(re) = &exclude_re {
                if re.is_match(&proc.job_name) {
                    continue;
                }
            }
            let age = now.saturating_sub(proc.dispatch_time);
            if f.cutoff_runtime_secs > 0 && age > f.cutoff_runtime_secs {
                continue;
            }
            let entry = hosts
                .entry(proc.host_name.clone())
                .or_insert_with(|| HostCandidate {
                    host_name: proc.host_name.clone(),
                    procs: Vec::new(),
                    cores: 0.0,
                    memory: 0,
                    oldest_dispatch_age_secs: 0,
                    ok: false,
                });
            entry.cores += proc.reserved_cores;
            entry.memory += proc.reserved_memory;
            entry.oldest_dispatch_age_secs = entry.oldest_dispatch_age_secs.max(age);
            entry.procs.push(proc);
        }

        let mut candidates: Vec<HostCandidate> = hosts.into_values().collect();
        let mut ok_count = 0;
        for candidate in candidates.iter_mut() {
            let within_cap = f.max_cores <= 0.0 || candidate.cores <= f.max_cores;
            let crossed = candidate.cores >= f.min_cores && candidate.memory >= f.min_memory;
            if crossed && within_cap && (f.result_limit == 0 || ok_count < f.result_limit) {
                candidate.ok = true;
                ok_count += 1;
            }
        }
        Ok(RedirectPlan { candidates })
    }

    /// Run every safety check for redirecting `selection` onto `target`.
    /// An empty result means the redirect may proceed unprompted.
    pub fn check(
        &self,
        client: &dyn CueClient,
        selection: &[&HostCandidate],
        target: &Job,
    ) -> Result<Vec<SafetyIssue>, CueError> {
        let mut issues = Vec::new();
        let procs: Vec<&Proc> = selection.iter().flat_map(|c| c.procs.iter()).collect();

        let mut foreign: Vec<String> = procs
            .iter()
            .filter(|p| p.show_name != target.show)
            .map(|p| p.show_name.clone())
            .collect();
        foreign.sort();
        foreign.dedup();
        if !foreign.is_empty() {
            issues.push(SafetyIssue::CrossShow { shows: foreign });
        }

        // Target capacity: reserved plus incoming stays under max, and the
        // target actually has frames waiting to pick the cores up.
        let incoming: f32 = procs.iter().map(|p| p.reserved_cores).sum();
        if target.stats.reserved_cores + incoming > target.max_cores {
            issues.push(SafetyIssue::TargetSaturated {
                incoming_cores: incoming,
                reserved_cores: target.stats.reserved_cores,
                max_cores: target.max_cores,
            });
        }
        if target.pending_waiting() == 0 {
            issues.push(SafetyIssue::TargetNoWaitingFrames);
        }

        // Source jobs must have waiting frames of their own, or killing
        // their procs just strands the work.
        let mut source_jobs: Vec<String> = procs.iter().map(|p| p.job_name.clone()).collect();
        source_jobs.sort();
        source_jobs.dedup();
        for name in source_jobs {
            let job = client.find_job(&name)?;
            if job.pending_waiting() == 0 {
                issues.push(SafetyIssue::SourceNoWaitingFrames { job: name });
            }
        }

        // Burst accounting per affected allocation.
        let alloc_of: HashMap<String, String> = client
            .get_hosts(&HostSearch::default())?
            .into_iter()
            .map(|h: Host| (h.name, h.allocation))
            .collect();
        let mut cores_per_alloc: BTreeMap<String, f32> = BTreeMap::new();
        for candidate in selection {
            if let Some(alloc) = alloc_of.get(&candidate.host_name) {
                *cores_per_alloc.entry(alloc.clone()).or_insert(0.0) += candidate.cores;
            }
        }
        let subs = client.get_subscriptions(&target.show)?;
        for (allocation, moved_cores) in cores_per_alloc {
            match subs.iter().find(|s| s.allocation_name == allocation) {
                None => issues.push(SafetyIssue::NoSubscription { allocation }),
                Some(sub) => {
                    let wasted = moved_cores - sub.burst_slack();
                    if wasted > self.wasted_cores_threshold {
                        issues.push(SafetyIssue::BurstExceeded {
                            allocation,
                            wasted_cores: wasted,
                        });
                    }
                }
            }
        }

        Ok(issues)
    }

    /// Dispatch the redirect, one call per host. Call only after `check`
    /// came back clean or the operator confirmed.
    pub fn execute(
        &self,
        client: &dyn CueClient,
        selection: &[&HostCandidate],
        target: &Job,
    ) -> Result<usize, CueError> {
        let mut moved = 0;
        for candidate in selection {
            let ids: Vec<uuid::Uuid> = candidate.procs.iter().map(|p| p.id).collect();
            client.redirect_procs(&ids, target.id)?;
            moved += ids.len();
            info!(
                host = %candidate.host_name,
                procs = ids.len(),
                target = %target.name,
                "redirected"
            );
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FrameState, Subscription};
    use crate::rpc::fake::{self, FakeFarm};
    use std::sync::Arc;
    use uuid::Uuid;

    struct Stage {
        farm: Arc<FakeFarm>,
        target: Job,
    }

    fn stage(source_hosts: usize, procs_per_host: usize) -> Stage {
        let farm = Arc::new(FakeFarm::new("t"));
        let mut target = fake::job("testing-sh900-target", "testing", "t");
        target.stats.frames.waiting = 40;
        target.max_cores = 200.0;
        let mut source = fake::job("testing-sh100-source", "testing", "t");
        source.group = "fx".to_string();
        source.stats.frames.waiting = 10;
        let layer = fake::layer("render", source.id);
        farm.edit(|s| {
            s.subscriptions.push(Subscription {
                id: Uuid::new_v4(),
                name: "testing.local.general".to_string(),
                show_name: "testing".to_string(),
                allocation_name: "local.general".to_string(),
                size: 100.0,
                burst: 300.0,
                reserved_cores: 40.0,
            });
            for h in 0..source_hosts {
                let host = fake::host(&format!("h{:02}", h), "local.general");
                for n in 0..procs_per_host {
                    let mut frame = fake::frame((h * 10 + n) as i64, &layer, FrameState::Running);
                    frame.start_time = 1;
                    let mut p =
                        fake::proc(&format!("{}/{}", host.name, n), &host, &source, &layer, &frame);
                    p.reserved_cores = 2.0;
                    p.dispatch_time = unix_now().saturating_sub(600);
                    s.procs.push(p);
                    s.frames.push(frame);
                }
                s.hosts.push(host);
            }
            s.layers.push(layer);
            s.jobs.push(source);
            s.jobs.push(target.clone());
        });
        Stage { farm, target }
    }

    fn filters() -> RedirectFilters {
        RedirectFilters {
            show: "testing".to_string(),
            min_cores: 4.0,
            ..Default::default()
        }
    }

    #[test]
    fn plan_accumulates_per_host_and_marks_ok() {
        let stage = stage(3, 2);
        let engine = RedirectEngine::new(filters(), 100.0);
        let plan = engine.plan(stage.farm.as_ref(), &stage.target).unwrap();
        assert_eq!(plan.candidates.len(), 3);
        for c in &plan.candidates {
            assert_eq!(c.procs.len(), 2);
            assert_eq!(c.cores, 4.0);
            assert!(c.ok);
        }
        assert_eq!(plan.total_cores(), 12.0);
    }

    #[test]
    fn result_limit_caps_ok_hosts() {
        let stage = stage(5, 2);
        let mut f = filters();
        f.result_limit = 2;
        let engine = RedirectEngine::new(f, 100.0);
        let plan = engine.plan(stage.farm.as_ref(), &stage.target).unwrap();
        assert_eq!(plan.candidates.len(), 5);
        assert_eq!(plan.ok_hosts().len(), 2);
    }

    #[test]
    fn already_redirected_and_target_procs_are_excluded() {
        let stage = stage(2, 2);
        stage.farm.edit(|s| {
            s.procs[0].redirect_target = Some("elsewhere".to_string());
            s.procs[1].job_id = stage.target.id;
        });
        let engine = RedirectEngine::new(filters(), 100.0);
        let plan = engine.plan(stage.farm.as_ref(), &stage.target).unwrap();
        // Host h00 lost both procs; only h01 remains.
        assert_eq!(plan.candidates.len(), 1);
        assert_eq!(plan.candidates[0].host_name, "h01");
    }

    #[test]
    fn excluded_job_regex_filters_sources() {
        let stage = stage(2, 2);
        let mut f = filters();
        f.excluded_job_regex = Some("sh100".to_string());
        let engine = RedirectEngine::new(f, 100.0);
        let plan = engine.plan(stage.farm.as_ref(), &stage.target).unwrap();
        assert!(plan.candidates.is_empty());
    }

    #[test]
    fn saturated_target_is_rejected_before_any_rpc() {
        // Target: max 200, reserved 180. Selection: 50 cores incoming.
        let stage = stage(5, 5);
        stage.farm.edit(|s| {
            let t = s.jobs.iter_mut().find(|j| j.name.contains("target")).unwrap();
            t.stats.reserved_cores = 180.0;
        });
        let mut target = stage.target.clone();
        target.stats.reserved_cores = 180.0;

        let engine = RedirectEngine::new(filters(), 100.0);
        let plan = engine.plan(stage.farm.as_ref(), &target).unwrap();
        let selection = plan.ok_hosts();
        assert_eq!(
            selection.iter().map(|c| c.cores).sum::<f32>(),
            50.0
        );

        let issues = engine.check(stage.farm.as_ref(), &selection, &target).unwrap();
        assert!(issues.iter().any(|i| matches!(
            i,
            SafetyIssue::TargetSaturated {
                incoming_cores,
                reserved_cores,
                max_cores,
            } if *incoming_cores == 50.0 && *reserved_cores == 180.0 && *max_cores == 200.0
        )));
        assert!(issues.iter().any(|i| i.is_rejection()));

        // Refused: no RPC was made, nothing is marked redirected.
        let procs = stage
            .farm
            .get_procs(&crate::rpc::ProcSearch::default())
            .unwrap();
        assert!(procs.iter().all(|p| p.redirect_target.is_none()));
    }

    #[test]
    fn cross_show_wants_confirmation_not_rejection() {
        // Sources stay in "testing"; the target belongs to another show.
        let stage = stage(1, 2);
        let mut target = stage.target.clone();
        target.show = "othershow".to_string();
        let engine = RedirectEngine::new(filters(), 100.0);
        let plan = engine.plan(stage.farm.as_ref(), &target).unwrap();
        let selection = plan.ok_hosts();
        let issues = engine
            .check(stage.farm.as_ref(), &selection, &target)
            .unwrap();
        let cross = issues
            .iter()
            .find(|i| matches!(i, SafetyIssue::CrossShow { .. }))
            .unwrap();
        assert!(!cross.is_rejection());
    }

    #[test]
    fn missing_subscription_rejects() {
        let stage = stage(1, 2);
        stage.farm.edit(|s| s.subscriptions.clear());
        let engine = RedirectEngine::new(filters(), 100.0);
        let plan = engine.plan(stage.farm.as_ref(), &stage.target).unwrap();
        let selection = plan.ok_hosts();
        let issues = engine
            .check(stage.farm.as_ref(), &selection, &stage.target)
            .unwrap();
        assert!(issues
            .iter()
            .any(|i| matches!(i, SafetyIssue::NoSubscription { .. }) && i.is_rejection()));
    }

    #[test]
    fn burst_overdraw_wants_confirmation() {
        let stage = stage(3, 2);
        stage.farm.edit(|s| {
            // Allocation nearly at burst already.
            s.subscriptions[0].reserved_cores = 299.0;
        });
        let engine = RedirectEngine::new(filters(), 2.0);
        let plan = engine.plan(stage.farm.as_ref(), &stage.target).unwrap();
        let selection = plan.ok_hosts();
        let issues = engine
            .check(stage.farm.as_ref(), &selection, &stage.target)
            .unwrap();
        let burst = issues
            .iter()
            .find(|i| matches!(i, SafetyIssue::BurstExceeded { .. }))
            .unwrap();
        assert!(!burst.is_rejection());
    }

    #[test]
    fn execute_marks_procs_redirected() {
        let stage = stage(2, 2);
        let engine = RedirectEngine::new(filters(), 100.0);
        let plan = engine.plan(stage.farm.as_ref(), &stage.target).unwrap();
        let selection = plan.ok_hosts();
        let issues = engine
            .check(stage.farm.as_ref(), &selection, &stage.target)
            .unwrap();
        assert!(issues.is_empty());

        let moved = engine
            .execute(stage.farm.as_ref(), &selection, &stage.target)
            .unwrap();
        assert_eq!(moved, 4);
        let procs = stage
            .farm
            .get_procs(&crate::rpc::ProcSearch::default())
            .unwrap();
        assert!(procs
            .iter()
            .all(|p| p.redirect_target.as_deref() == Some("testing-sh900-target")));
    }

    #[test]
    fn empty_last_resource_hosts_never_enter_scan() {
        // A frame that has never dispatched has no host triple; parsing
        // yields Nones and the proc list simply never contains it.
        let (host, cores, gpus) = crate::model::parse_last_resource("");
        assert_eq!((host, cores, gpus), (None, None, None));
    }
}
