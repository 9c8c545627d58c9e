//! Live console for the render farm.
//!
//! Panes for jobs, frames, hosts, procs and shows, each backed by its
//! monitor from the library. One event loop owns every tree: it selects
//! over work-pool deliveries and a 1 Hz tick, polls the keyboard without
//! blocking, and never waits on an RPC itself. Losing terminal focus
//! counts as minimized for the tick schedulers.

use cuewatch::cache::{EtaBuffer, LogBuffer};
use cuewatch::config::{Config, RefreshConfig};
use cuewatch::model::Keyed;
use cuewatch::monitor::frames::FrameMonitor;
use cuewatch::monitor::hosts::HostMonitor;
use cuewatch::monitor::jobs::{JobMonitor, MONITORED_RESTORE_LIMIT};
use cuewatch::monitor::procs::ProcMonitor;
use cuewatch::monitor::shows::{ShowMonitor, ShowNode};
use cuewatch::monitor::{self, Monitor};
use cuewatch::monitor::{ColumnModel, SortKey};
use cuewatch::pool::{Delivery, WorkPool};
use cuewatch::rpc::CueClient;
use cuewatch::session::SessionStore;
use cuewatch::stuck::{FilterRule, Progress, RuleSet, StuckFrameEngine, StuckNode, WILDCARD_SERVICE};
use cuewatch_tools::{
    connect, cue_opts, default_user, dispatch_job_action, init_logging, JobAction,
};

use crossbeam::channel::{self, Receiver};
use crossterm::event::{self, Event, KeyCode, KeyEvent};
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, Clear, ClearType, EnterAlternateScreen,
    LeaveAlternateScreen,
};
use crossterm::{cursor, execute, queue};
use std::io::{stdout, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pane {
    Jobs,
    Frames,
    Hosts,
    Procs,
    Shows,
    Stuck,
}

impl Pane {
    fn next(self) -> Pane {
        match self {
            Pane::Jobs => Pane::Frames,
            Pane::Frames => Pane::Hosts,
            Pane::Hosts => Pane::Procs,
            Pane::Procs => Pane::Shows,
            Pane::Shows => Pane::Stuck,
            Pane::Stuck => Pane::Jobs,
        }
    }

    fn title(self) -> &'static str {
        match self {
            Pane::Jobs => "Jobs",
            Pane::Frames => "Frames",
            Pane::Hosts => "Hosts",
            Pane::Procs => "Procs",
            Pane::Shows => "Shows",
            Pane::Stuck => "Stuck Frames",
        }
    }
}

fn stuck_columns() -> ColumnModel<StuckNode> {
    fn frame_of(node: &StuckNode) -> Option<&cuewatch::stuck::StuckFrame> {
        match node {
            StuckNode::Frame(frame) => Some(frame),
            _ => None,
        }
    }
    ColumnModel::builder()
        .column("Name", "name", 36, |n: &StuckNode| n.label().to_string())
        .column("Host", "host", 14, |n: &StuckNode| {
            frame_of(n).map(|f| f.host_name.clone()).unwrap_or_default()
        })
        .column("LLU", "llu", 8, |n: &StuckNode| {
            frame_of(n)
                .map(|f| format!("{}s", f.llu_secs))
                .unwrap_or_default()
        })
        .sort(|n: &StuckNode| SortKey::Int(frame_of(n).map(|f| f.llu_secs).unwrap_or(0)))
        .column("Runtime", "runtime", 9, |n: &StuckNode| {
            frame_of(n)
                .map(|f| cuewatch::model::format_duration(f.runtime_secs.max(0) as u64))
                .unwrap_or_default()
        })
        .column("Stuck", "stuckness", 7, |n: &StuckNode| {
            frame_of(n)
                .map(|f| format!("{:.0}%", f.stuckness * 100.0))
                .unwrap_or_default()
        })
        .column("Last line", "last_line", 48, |n: &StuckNode| {
            frame_of(n).map(|f| f.last_line.clone()).unwrap_or_default()
        })
        .build()
}

struct App {
    pool: WorkPool,
    deliveries: Receiver<Delivery>,
    client: Arc<dyn CueClient>,
    config: Config,
    session: SessionStore,

    jobs: Arc<JobMonitor>,
    frames: Arc<FrameMonitor>,
    hosts: Arc<HostMonitor>,
    procs: Arc<ProcMonitor>,
    shows: Arc<ShowMonitor>,
    logs: Arc<LogBuffer>,
    etas: Arc<EtaBuffer>,
    stuck: Arc<StuckFrameEngine>,
    stuck_columns: ColumnModel<StuckNode>,
    progress: Option<Receiver<Progress>>,

    pane: Pane,
    cursor: usize,
    minimized: bool,
    allow_job_interaction: bool,
    status: String,
    confirm: Option<(JobAction, Uuid)>,
    next_forced: Option<Instant>,
    quit: bool,
}

impl App {
    fn new(client: Arc<dyn CueClient>, config: Config, session: SessionStore) -> App {
        let (pool, deliveries) = WorkPool::with_defaults();
        let jobs = Arc::new(JobMonitor::new());
        let frames = Arc::new(FrameMonitor::new());
        let hosts = Arc::new(HostMonitor::new());
        let procs = Arc::new(ProcMonitor::new());
        let shows = Arc::new(ShowMonitor::new());

        let r = &config.refresh;
        jobs.core()
            .with_ticker(|t| t.set_interval(RefreshConfig::interval_ticks(r.job_update_delay)));
        frames
            .core()
            .with_ticker(|t| t.set_interval(RefreshConfig::interval_ticks(r.frame_update_delay)));
        hosts
            .core()
            .with_ticker(|t| t.set_interval(RefreshConfig::interval_ticks(r.host_update_delay)));
        procs
            .core()
            .with_ticker(|t| t.set_interval(RefreshConfig::interval_ticks(r.proc_update_delay)));

        App {
            pool,
            deliveries,
            client,
            config,
            session,
            jobs,
            frames,
            hosts,
            procs,
            shows,
            logs: Arc::new(LogBuffer::new()),
            etas: Arc::new(EtaBuffer::new()),
            stuck: Arc::new(StuckFrameEngine::new(
                "",
                RuleSet::new(vec![FilterRule::for_service(WILDCARD_SERVICE)]),
            )),
            stuck_columns: stuck_columns(),
            progress: None,
            pane: Pane::Jobs,
            cursor: 0,
            minimized: false,
            allow_job_interaction: false,
            status: String::new(),
            confirm: None,
            next_forced: None,
            quit: false,
        }
    }

    fn restore_session(&mut self) {
        if let Some(list) = self
            .session
            .get::<Vec<(Uuid, u64)>>("MonitorJobs", "monitored")
        {
            self.jobs.restore_monitored(list, MONITORED_RESTORE_LIMIT);
        }
        if let Some(load_mine) = self.session.get::<bool>("MonitorJobs", "loadMine") {
            self.jobs.set_load_mine(load_mine);
        }
        if let Some(colors) = self
            .session
            .get::<std::collections::HashMap<Uuid, usize>>("MonitorJobs", "userColors")
        {
            self.jobs.restore_colors(colors);
        }
        if let Some(allow) = self.session.get::<bool>("Main", "allowJobInteraction") {
            self.allow_job_interaction = allow;
        }
    }

    fn save_session(&self) {
        self.session
            .set("MonitorJobs", "monitored", &self.jobs.monitored_for_session());
        self.session
            .set("MonitorJobs", "loadMine", &self.jobs.load_mine());
        self.session
            .set("MonitorJobs", "userColors", &self.jobs.colors_for_session());
        self.session
            .set("Main", "allowJobInteraction", &self.allow_job_interaction);
        if let Err(err) = self.session.save() {
            tracing::warn!(%err, "failed to save session");
        }
    }

    /// Coalesce "refresh soon" requests into one delayed tick.
    fn schedule_refresh(&mut self) {
        if self.next_forced.is_none() {
            self.next_forced = Some(Instant::now() + self.config.refresh.after_action_delay());
        }
    }

    fn start_stuck_scan(&mut self) {
        let show = self
            .shows
            .core()
            .registry
            .visible()
            .into_iter()
            .find_map(|row| match row.entity {
                ShowNode::Show(show) => Some(show.name),
                _ => None,
            });
        let show = match show {
            Some(show) => show,
            None => {
                self.status = "no show loaded yet, cannot scan".to_string();
                return;
            }
        };
        self.stuck.set_show(&show);
        let (tx, rx) = channel::unbounded::<Progress>();
        self.progress = Some(rx);
        let engine = self.stuck.clone();
        let client = self.client.clone();
        self.pool.queue("stuck:scan", move || {
            let found = engine
                .scan(client.as_ref(), Some(&tx))
                .map_err(|e| e.to_string())?;
            Ok(Some(Box::new(move || {
                engine.apply_scan(found);
            }) as cuewatch::pool::UiCallback))
        });
        self.status = format!("scanning {} for stuck frames", show);
        self.pane = Pane::Stuck;
        self.cursor = 0;
    }

    fn drain_progress(&mut self) {
        if let Some(rx) = self.progress.take() {
            let mut last = None;
            for p in rx.try_iter() {
                last = Some(p);
            }
            if let Some((n, total)) = last {
                self.status = format!("stuck frame scan {}/{}", n, total);
                if n < total {
                    self.progress = Some(rx);
                }
            } else {
                self.progress = Some(rx);
            }
        }
    }

    fn on_tick(&mut self) {
        let stuck_work = self.stuck.on_tick();
        if stuck_work.revalidate {
            let removed = self.stuck.revalidate();
            if removed > 0 {
                self.status = format!("stuck list pruned {} rows against edited filters", removed);
            }
        }
        if stuck_work.flush {
            let engine = self.stuck.clone();
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            let path = PathBuf::from(home)
                .join(".config/cuewatch")
                .join(format!("{}.stuck.yaml", engine.show()));
            self.pool.queue("stuck:flush", move || {
                engine.flush_log_db(&path).map_err(|e| e.to_string())?;
                Ok(None)
            });
        }

        if let Some(at) = self.next_forced {
            if Instant::now() >= at {
                self.next_forced = None;
                self.jobs.core().update_soon();
                self.frames.core().update_soon();
                self.procs.core().update_soon();
            }
        }
        monitor::tick(&self.jobs, &self.pool, &self.client, self.minimized);
        monitor::tick(&self.frames, &self.pool, &self.client, self.minimized);
        monitor::tick(&self.hosts, &self.pool, &self.client, self.minimized);
        monitor::tick(&self.procs, &self.pool, &self.client, self.minimized);
        monitor::tick(&self.shows, &self.pool, &self.client, self.minimized);

        for error in [
            self.jobs.core().take_error(),
            self.frames.core().take_error(),
            self.hosts.core().take_error(),
            self.procs.core().take_error(),
            self.shows.core().take_error(),
        ]
        .into_iter()
        .flatten()
        {
            self.status = error;
        }
    }

    fn rows_in_pane(&self) -> usize {
        match self.pane {
            Pane::Jobs => self.jobs.core().registry.visible().len(),
            Pane::Frames => self.frames.core().registry.visible().len(),
            Pane::Hosts => self.hosts.core().registry.visible().len(),
            Pane::Procs => self.procs.core().registry.visible().len(),
            Pane::Shows => self.shows.core().registry.visible().len(),
            Pane::Stuck => self.stuck.registry.visible().len(),
        }
    }

    fn job_under_cursor(&self) -> Option<cuewatch::model::Job> {
        let rows = self.jobs.core().registry.visible();
        rows.get(self.cursor).map(|row| row.entity.clone())
    }

    fn run_job_action(&mut self, action: JobAction) {
        if self.pane != Pane::Jobs {
            return;
        }
        let job = match self.job_under_cursor() {
            Some(job) => job,
            None => return,
        };
        if action.needs_confirmation() && self.confirm != Some((action, job.id)) {
            self.confirm = Some((action, job.id));
            self.status = format!("{} {}? press y to confirm", action.label(), job.name);
            return;
        }
        self.confirm = None;
        let user = default_user();
        match dispatch_job_action(
            self.client.as_ref(),
            &job,
            action,
            &user,
            self.allow_job_interaction,
        ) {
            Ok(()) => {
                self.status = format!("{}: {}", action.label(), job.name);
                self.schedule_refresh();
            }
            Err(err) => self.status = format!("{}", err),
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        let pending = self.confirm.take();
        match key.code {
            KeyCode::Char('y') => {
                if let Some((action, id)) = pending {
                    // Re-arm so run_job_action sees the confirmation and
                    // executes, provided the cursor is still on that job.
                    self.confirm = Some((action, id));
                    self.run_job_action(action);
                }
                return;
            }
            _ => {
                if pending.is_some() {
                    self.status = "cancelled".to_string();
                }
            }
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.quit = true,
            KeyCode::Tab => {
                self.pane = self.pane.next();
                self.cursor = 0;
            }
            KeyCode::Up => {
                self.cursor = self.cursor.saturating_sub(1);
                self.note_scroll();
            }
            KeyCode::Down => {
                self.cursor = (self.cursor + 1).min(self.rows_in_pane().saturating_sub(1));
                self.note_scroll();
            }
            KeyCode::Enter => {
                if self.pane == Pane::Jobs {
                    if let Some(job) = self.job_under_cursor() {
                        self.status = format!("monitoring frames of {}", job.name);
                        self.frames.set_job(Some(job));
                        self.pane = Pane::Frames;
                        self.cursor = 0;
                    }
                } else if let Some(key) = self.key_under_cursor() {
                    self.toggle_expanded(&key);
                }
            }
            KeyCode::Char(' ') => {
                if let Some(key) = self.key_under_cursor() {
                    let registry_selected = self.is_selected(&key);
                    self.set_selected(&key, !registry_selected);
                }
            }
            KeyCode::Char('p') => self.run_job_action(JobAction::Pause),
            KeyCode::Char('u') => self.run_job_action(JobAction::Resume),
            KeyCode::Char('k') => self.run_job_action(JobAction::Kill),
            KeyCode::Char('r') => self.run_job_action(JobAction::RetryDead),
            KeyCode::Char('e') => self.run_job_action(JobAction::EatDead),
            KeyCode::Char('m') => {
                let on = !self.jobs.load_mine();
                self.jobs.set_load_mine(on);
                self.status = format!("load mine: {}", if on { "on" } else { "off" });
                self.schedule_refresh();
            }
            KeyCode::Char('i') => {
                self.allow_job_interaction = !self.allow_job_interaction;
                self.status = format!(
                    "job interaction with other users' jobs: {}",
                    if self.allow_job_interaction { "allowed" } else { "refused" }
                );
            }
            KeyCode::Char('c') => {
                self.frames.clear_filters();
                self.hosts.clear_filters();
                self.procs.clear_filters();
                self.status = "filters cleared".to_string();
            }
            KeyCode::Char('f') => self.start_stuck_scan(),
            KeyCode::Char('l') => self.set_host_lock(true),
            KeyCode::Char('o') => self.set_host_lock(false),
            _ => {}
        }
    }

    /// Lock or open the host under the cursor. Short synchronous call,
    /// like every menu action.
    fn set_host_lock(&mut self, lock: bool) {
        if self.pane != Pane::Hosts {
            return;
        }
        let host = match self.hosts.core().registry.visible().get(self.cursor) {
            Some(row) => row.entity.clone(),
            None => return,
        };
        let result = if lock {
            self.client.lock_host(host.id)
        } else {
            self.client.unlock_host(host.id)
        };
        match result {
            Ok(()) => {
                self.status = format!(
                    "{} {}",
                    if lock { "locked" } else { "opened" },
                    host.name
                );
                self.hosts.core().update_soon();
            }
            Err(err) => self.status = format!("{}", err),
        }
    }

    fn note_scroll(&self) {
        match self.pane {
            Pane::Jobs => self.jobs.core().note_scroll(),
            Pane::Frames => self.frames.core().note_scroll(),
            Pane::Hosts => self.hosts.core().note_scroll(),
            Pane::Procs => self.procs.core().note_scroll(),
            Pane::Shows => self.shows.core().note_scroll(),
            Pane::Stuck => {}
        }
    }

    fn key_under_cursor(&self) -> Option<cuewatch::model::EntityKey> {
        let key = match self.pane {
            Pane::Jobs => self.jobs.core().registry.visible().get(self.cursor)?.key.clone(),
            Pane::Frames => self.frames.core().registry.visible().get(self.cursor)?.key.clone(),
            Pane::Hosts => self.hosts.core().registry.visible().get(self.cursor)?.key.clone(),
            Pane::Procs => self.procs.core().registry.visible().get(self.cursor)?.key.clone(),
            Pane::Shows => self.shows.core().registry.visible().get(self.cursor)?.key.clone(),
            Pane::Stuck => self.stuck.registry.visible().get(self.cursor)?.key.clone(),
        };
        Some(key)
    }

    fn is_selected(&self, key: &cuewatch::model::EntityKey) -> bool {
        match self.pane {
            Pane::Jobs => self.jobs.core().registry.is_selected(key),
            Pane::Frames => self.frames.core().registry.is_selected(key),
            Pane::Hosts => self.hosts.core().registry.is_selected(key),
            Pane::Procs => self.procs.core().registry.is_selected(key),
            Pane::Shows => self.shows.core().registry.is_selected(key),
            Pane::Stuck => self.stuck.registry.is_selected(key),
        }
    }

    fn set_selected(&self, key: &cuewatch::model::EntityKey, on: bool) {
        match self.pane {
            Pane::Jobs => self.jobs.core().registry.set_selected(key, on),
            Pane::Frames => self.frames.core().registry.set_selected(key, on),
            Pane::Hosts => self.hosts.core().registry.set_selected(key, on),
            Pane::Procs => self.procs.core().registry.set_selected(key, on),
            Pane::Shows => self.shows.core().registry.set_selected(key, on),
            Pane::Stuck => self.stuck.registry.set_selected(key, on),
        }
    }

    fn toggle_expanded(&self, key: &cuewatch::model::EntityKey) {
        fn toggle<E: Keyed + Clone>(
            registry: &cuewatch::monitor::ItemRegistry<E>,
            key: &cuewatch::model::EntityKey,
        ) {
            if let Some(row) = registry.visible().iter().find(|r| &r.key == key) {
                registry.set_expanded(key, !row.expanded);
            }
        }
        match self.pane {
            Pane::Jobs => toggle(&self.jobs.core().registry, key),
            Pane::Shows => toggle(&self.shows.core().registry, key),
            Pane::Stuck => toggle(&self.stuck.registry, key),
            _ => {}
        }
    }

    fn draw(&mut self) -> std::io::Result<()> {
        let mut out = stdout();
        let (_, height) = crossterm::terminal::size()?;
        let body_rows = height.saturating_sub(4) as usize;
        queue!(out, cursor::MoveTo(0, 0), Clear(ClearType::All))?;

        let header = format!(
            " cue-monitor  [{}]  (tab: next pane, q: quit){}",
            self.pane.title(),
            if self.minimized { "  [unfocused]" } else { "" }
        );
        queue!(out, Print(header), Print("\r\n"))?;

        match self.pane {
            Pane::Jobs => draw_pane(
                &mut out,
                &self.jobs.core().registry.visible(),
                self.jobs.columns(),
                self.cursor,
                body_rows,
            )?,
            Pane::Frames => draw_pane(
                &mut out,
                &self.frames.core().registry.visible(),
                self.frames.columns(),
                self.cursor,
                body_rows,
            )?,
            Pane::Hosts => draw_pane(
                &mut out,
                &self.hosts.core().registry.visible(),
                self.hosts.columns(),
                self.cursor,
                body_rows,
            )?,
            Pane::Procs => draw_pane(
                &mut out,
                &self.procs.core().registry.visible(),
                self.procs.columns(),
                self.cursor,
                body_rows,
            )?,
            Pane::Shows => draw_pane(
                &mut out,
                &self.shows.core().registry.visible(),
                self.shows.columns(),
                self.cursor,
                body_rows,
            )?,
            Pane::Stuck => draw_pane(
                &mut out,
                &self.stuck.registry.visible(),
                &self.stuck_columns,
                self.cursor,
                body_rows,
            )?,
        }

        // Frames pane: tail of the selected frame's log, straight from
        // the log buffer's cache.
        if self.pane == Pane::Frames {
            if let Some(job) = self.frames.job() {
                let rows = self.frames.core().registry.visible();
                if let Some(row) = rows.get(self.cursor) {
                    let entry = self.logs.get(&self.pool, &job, &row.entity);
                    let llu = if entry.llu_secs >= 0 {
                        format!("{}s", entry.llu_secs)
                    } else {
                        "-".to_string()
                    };
                    let eta = if row.entity.state == cuewatch::model::FrameState::Running {
                        self.etas
                            .get(&self.pool, &self.client, job.id, &row.entity)
                            .map(|secs| format!("  eta {}s", secs as u64))
                            .unwrap_or_default()
                    } else {
                        String::new()
                    };
                    queue!(
                        out,
                        cursor::MoveTo(0, height.saturating_sub(2)),
                        Clear(ClearType::CurrentLine),
                        Print(format!(" llu {:>6}{}  {}", llu, eta, entry.last_line))
                    )?;
                }
            }
        }

        queue!(
            out,
            cursor::MoveTo(0, height.saturating_sub(1)),
            Clear(ClearType::CurrentLine),
            Print(format!(" {}", self.status))
        )?;
        out.flush()
    }
}

fn pad(text: &str, width: u16) -> String {
    let width = width as usize;
    format!("{:<width$.width$}", text, width = width)
}

fn draw_pane<E: Keyed + Clone>(
    out: &mut std::io::Stdout,
    rows: &[cuewatch::monitor::VisibleRow<E>],
    columns: &cuewatch::monitor::ColumnModel<E>,
    cursor_row: usize,
    body_rows: usize,
) -> std::io::Result<()> {
    let layout = columns.default_layout();
    let visual = columns.visual_columns(&layout);

    let mut titles = String::from("   ");
    for &c in &visual {
        titles.push_str(&pad(columns.columns()[c].title, layout.widths[c]));
        titles.push(' ');
    }
    queue!(out, Print(titles), Print("\r\n"))?;

    let start = cursor_row.saturating_sub(body_rows.saturating_sub(1));
    for (n, row) in rows.iter().enumerate().skip(start).take(body_rows) {
        let marker = if n == cursor_row { '>' } else { ' ' };
        let selected = if row.selected { '*' } else { ' ' };
        let mut line = format!("{}{} ", marker, selected);
        for (i, &c) in visual.iter().enumerate() {
            let mut cell = columns.display(row, c);
            if i == 0 && row.depth > 0 {
                cell = format!("{}{}", "  ".repeat(row.depth), cell);
            }
            line.push_str(&pad(&cell, layout.widths[c]));
            line.push(' ');
        }
        if n == cursor_row {
            queue!(out, SetAttribute(Attribute::Reverse))?;
        }
        queue!(out, Print(line), Print("\r\n"))?;
        if n == cursor_row {
            queue!(out, SetAttribute(Attribute::Reset))?;
        }
    }
    Ok(())
}

fn config_path(matches: &getopts::Matches) -> PathBuf {
    match matches.opt_str("c") {
        Some(path) => PathBuf::from(path),
        None => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/cuewatch/cuewatch.yaml")
        }
    }
}

fn run(app: &mut App) -> std::io::Result<()> {
    let ticker = channel::tick(Duration::from_secs(1));
    loop {
        while event::poll(Duration::from_millis(0))? {
            match event::read()? {
                Event::Key(key) => app.handle_key(key),
                Event::FocusLost => app.minimized = true,
                Event::FocusGained => app.minimized = false,
                _ => {}
            }
        }
        if app.quit {
            return Ok(());
        }

        let mut sel = channel::Select::new();
        let del_idx = sel.recv(&app.deliveries);
        let tick_idx = sel.recv(&ticker);
        match sel.ready_timeout(Duration::from_millis(50)) {
            Ok(idx) if idx == del_idx => {
                for delivery in app.deliveries.try_iter() {
                    delivery.run();
                }
            }
            Ok(idx) if idx == tick_idx => {
                let _ = ticker.try_recv();
                app.on_tick();
            }
            _ => {}
        }
        app.drain_progress();
        app.draw()?;
    }
}

fn main() -> std::io::Result<()> {
    init_logging();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = cue_opts();
    let matches = match opts.parse(&args) {
        Ok(matches) => matches,
        Err(err) => {
            eprintln!("Error: {}", err);
            std::process::exit(1);
        }
    };
    if matches.opt_present("h") {
        println!("{}", opts.usage("usage: cue-monitor [options]"));
        return Ok(());
    }
    let demo = matches.opt_present("demo");
    let server = matches
        .opt_str("r")
        .unwrap_or_else(cuewatch_tools::default_server);

    // Demo mode runs with built-in defaults; a real session refuses to
    // start without its configuration file.
    let path = config_path(&matches);
    let config = match Config::load(&path) {
        Ok(config) => config,
        Err(err) if demo => {
            tracing::debug!(%err, "demo mode, using default configuration");
            Config::default()
        }
        Err(err) => {
            eprintln!("Error: {}", err);
            std::process::exit(1);
        }
    };

    let client = match connect(&server, demo) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("Error: {}", err);
            std::process::exit(1);
        }
    };

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let session = SessionStore::load(&PathBuf::from(home).join(".config/cuewatch/session.json"));
    let mut app = App::new(client, config, session);
    app.restore_session();

    let mut out = stdout();
    enable_raw_mode()?;
    execute!(out, EnterAlternateScreen, cursor::Hide)?;
    execute!(out, event::EnableFocusChange)?;

    let result = run(&mut app);

    execute!(out, event::DisableFocusChange)?;
    execute!(out, LeaveAlternateScreen, cursor::Show)?;
    disable_raw_mode()?;

    app.save_session();
    app.pool.shutdown();
    result
}
