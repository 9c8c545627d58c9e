//! Shared plumbing for the cuewatch tools: option parsing, logging setup,
//! client connection, and the action catalog the console dispatches
//! through.

use cuewatch::model::{FrameState, Job};
use cuewatch::rpc::fake::FakeFarm;
use cuewatch::rpc::wire::WireClient;
use cuewatch::rpc::{CueClient, CueError, FrameSearch};

use getopts::Options;
use std::sync::Arc;

pub fn default_server() -> String {
    std::env::var("CUEWATCH_SERVER").unwrap_or_else(|_| "localhost".to_string())
}

pub fn default_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Common options every tool takes.
pub fn cue_opts() -> Options {
    let mut opts = Options::new();
    opts.optopt(
        "r",
        "server",
        &format!("scheduler gateway address (default {})", default_server()),
        "address",
    );
    opts.optopt("c", "config", "configuration file path", "path");
    opts.optflag("", "demo", "run against a built-in demo farm");
    opts.optflag("h", "help", "print this help");
    opts
}

/// Route logging to stderr so it never fights the alternate screen.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("CUEWATCH_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn connect(server: &str, demo: bool) -> Result<Arc<dyn CueClient>, CueError> {
    if demo {
        Ok(Arc::new(FakeFarm::demo()))
    } else {
        Ok(Arc::new(WireClient::connect(server, &default_user())?))
    }
}

/// Console verbs against a job, dispatched through one checked path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    Pause,
    Resume,
    Kill,
    RetryDead,
    EatDead,
    AutoEatOn,
    AutoEatOff,
}

impl JobAction {
    pub fn label(&self) -> &'static str {
        match self {
            JobAction::Pause => "Pause",
            JobAction::Resume => "Unpause",
            JobAction::Kill => "Kill",
            JobAction::RetryDead => "Retry dead frames",
            JobAction::EatDead => "Eat dead frames",
            JobAction::AutoEatOn => "Enable auto-eating",
            JobAction::AutoEatOff => "Disable auto-eating",
        }
    }

    /// Destructive verbs are gated on ownership or the job-interaction
    /// override.
    pub fn destructive(&self) -> bool {
        !matches!(self, JobAction::Pause | JobAction::Resume)
    }

    /// Kill also wants a confirmation prompt even for the owner.
    pub fn needs_confirmation(&self) -> bool {
        matches!(self, JobAction::Kill | JobAction::EatDead)
    }
}

/// Run one job action. Destructive actions against someone else's job are
/// refused unless the operator has opted into job interaction; the error
/// names the owner and the override setting.
pub fn dispatch_job_action(
    client: &dyn CueClient,
    job: &Job,
    action: JobAction,
    acting_user: &str,
    allow_job_interaction: bool,
) -> Result<(), CueError> {
    if action.destructive() && !allow_job_interaction && job.user != acting_user {
        return Err(CueError::PermissionDenied {
            owner: job.user.clone(),
        });
    }
    match action {
        JobAction::Pause => client.pause_job(job.id),
        JobAction::Resume => client.resume_job(job.id),
        JobAction::Kill => client.kill_job(job.id),
        JobAction::RetryDead => {
            let mut search = FrameSearch::for_job(job.id);
            search.states = vec![FrameState::Dead];
            client.retry_frames(&search)
        }
        JobAction::EatDead => {
            let mut search = FrameSearch::for_job(job.id);
            search.states = vec![FrameState::Dead];
            client.eat_frames(&search)
        }
        JobAction::AutoEatOn => client.set_job_auto_eat(job.id, true),
        JobAction::AutoEatOff => client.set_job_auto_eat(job.id, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuewatch::model::JobState;
    use cuewatch::rpc::fake;

    #[test]
    fn foreign_destructive_action_is_refused_with_owner() {
        let farm = FakeFarm::new("me");
        let job = fake::job("testing-sh01-x", "testing", "someone_else");
        farm.edit(|s| s.jobs.push(job.clone()));

        let err = dispatch_job_action(&farm, &job, JobAction::Kill, "me", false).unwrap_err();
        match err {
            CueError::PermissionDenied { owner } => assert_eq!(owner, "someone_else"),
            other => panic!("unexpected: {:?}", other),
        }
        // The job is untouched.
        assert_eq!(farm.get_job(job.id).unwrap().state, JobState::Pending);
    }

    #[test]
    fn override_flag_allows_foreign_actions() {
        let farm = FakeFarm::new("me");
        let job = fake::job("testing-sh01-x", "testing", "someone_else");
        farm.edit(|s| s.jobs.push(job.clone()));
        dispatch_job_action(&farm, &job, JobAction::Kill, "me", true).unwrap();
        assert_eq!(farm.get_job(job.id).unwrap().state, JobState::Finished);
    }

    #[test]
    fn pause_is_never_gated() {
        let farm = FakeFarm::new("me");
        let job = fake::job("testing-sh01-x", "testing", "someone_else");
        farm.edit(|s| s.jobs.push(job.clone()));
        dispatch_job_action(&farm, &job, JobAction::Pause, "me", false).unwrap();
        assert!(farm.get_job(job.id).unwrap().is_paused);
    }

    #[test]
    fn retry_dead_only_touches_dead_frames() {
        let farm = FakeFarm::new("me");
        let job = fake::job("testing-sh01-x", "testing", "me");
        let layer = fake::layer("render", job.id);
        farm.edit(|s| {
            s.frames.push(fake::frame(1, &layer, FrameState::Dead));
            s.frames.push(fake::frame(2, &layer, FrameState::Succeeded));
            s.layers.push(layer);
            s.jobs.push(job.clone());
        });
        dispatch_job_action(&farm, &job, JobAction::RetryDead, "me", false).unwrap();
        let frames = farm.get_frames(&FrameSearch::for_job(job.id)).unwrap();
        assert_eq!(frames[0].state, FrameState::Waiting);
        assert_eq!(frames[1].state, FrameState::Succeeded);
    }
}
