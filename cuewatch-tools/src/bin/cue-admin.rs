//! Flat administrative CLI for the scheduler.
//!
//! The grammar is single-dash and verb-oriented (`-lj`, `-ls`, `-lb show
//! ...`), which neither getopts nor clap can express, so the scanner below
//! walks the argument list directly. Exit code 0 on success; 1 on an
//! argument error, with the message on stderr prefixed `Error: `.

use cuewatch::model::{format_duration, format_mem, format_time};
use cuewatch::rpc::{CueClient, HostSearch, JobSearch, ProcSearch};
use cuewatch_tools::{connect, default_server};

use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    ListJobs(Vec<String>),
    ListAllJobs,
    JobInfo(Vec<String>),
    ListHosts(Vec<String>),
    ListShows,
    ListAllocations,
    ListSubscriptions(Vec<String>),
    Query(Vec<String>),
    Help,
}

#[derive(Debug, Clone, PartialEq)]
struct AdminArgs {
    server: String,
    facility: Option<String>,
    verbose: bool,
    force: bool,
    demo: bool,
    command: Command,
}

const USAGE: &str = "usage: cue-admin [options] <query>
options:
  -server <host>     scheduler gateway address
  -facility <name>   facility code
  -verbose | -v      verbose output
  -force             skip confirmations
queries:
  -lj  [substr ...]  list jobs, optionally filtered by substring
  -laj               list all jobs, including finished
  -lji [substr ...]  detailed job info
  -lh  [substr ...]  list hosts
  -ls                list shows
  -la                list allocations
  -lb  <show ...>    list subscriptions for shows
  -q   <k=v ...>     query procs (show=, alloc=, job=, limit=)";

fn parse(args: &[String]) -> Result<AdminArgs, String> {
    let mut out = AdminArgs {
        server: default_server(),
        facility: None,
        verbose: false,
        force: false,
        demo: false,
        command: Command::Help,
    };
    let mut command: Option<Command> = None;
    fn set(command: &mut Option<Command>, cmd: Command) -> Result<(), String> {
        if command.is_some() {
            return Err("only one query per invocation".to_string());
        }
        *command = Some(cmd);
        Ok(())
    }
    fn operands(args: &[String], i: &mut usize) -> Vec<String> {
        let mut out = Vec::new();
        while *i + 1 < args.len() && !args[*i + 1].starts_with('-') {
            out.push(args[*i + 1].clone());
            *i += 1;
        }
        out
    }

    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "-server" => {
                i += 1;
                out.server = args
                    .get(i)
                    .cloned()
                    .ok_or_else(|| "-server requires an address".to_string())?;
            }
            "-facility" => {
                i += 1;
                out.facility = Some(
                    args.get(i)
                        .cloned()
                        .ok_or_else(|| "-facility requires a name".to_string())?,
                );
            }
            "-verbose" | "-v" => out.verbose = true,
            "-force" => out.force = true,
            "-demo" => out.demo = true,
            "-help" | "-h" => set(&mut command, Command::Help)?,
            "-lj" => {
                let subs = operands(args, &mut i);
                set(&mut command, Command::ListJobs(subs))?;
            }
            "-laj" => set(&mut command, Command::ListAllJobs)?,
            "-lji" => {
                let subs = operands(args, &mut i);
                set(&mut command, Command::JobInfo(subs))?;
            }
            "-lh" => {
                let subs = operands(args, &mut i);
                set(&mut command, Command::ListHosts(subs))?;
            }
            "-ls" => set(&mut command, Command::ListShows)?,
            "-la" => set(&mut command, Command::ListAllocations)?,
            "-lb" => {
                let shows = operands(args, &mut i);
                if shows.is_empty() {
                    return Err("-lb requires at least one show".to_string());
                }
                set(&mut command, Command::ListSubscriptions(shows))?;
            }
            "-q" => {
                let criteria = operands(args, &mut i);
                if criteria.is_empty() {
                    return Err("-q requires at least one criterion".to_string());
                }
                set(&mut command, Command::Query(criteria))?;
            }
            other => return Err(format!("unknown argument {}", other)),
        }
        i += 1;
    }
    out.command = command.ok_or_else(|| "no query given".to_string())?;
    Ok(out)
}

fn parse_proc_query(criteria: &[String]) -> Result<ProcSearch, String> {
    let mut search = ProcSearch::default();
    for criterion in criteria {
        let (key, value) = criterion
            .split_once('=')
            .ok_or_else(|| format!("bad criterion {} (expected k=v)", criterion))?;
        match key {
            "show" => search.shows.push(value.to_string()),
            "alloc" => search.allocations.push(value.to_string()),
            "job" => search.jobs.push(value.to_string()),
            "limit" => {
                search.max_results = Some(
                    value
                        .parse()
                        .map_err(|_| format!("bad limit {}", value))?,
                )
            }
            other => return Err(format!("unknown criterion {}", other)),
        }
    }
    Ok(search)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn run(client: &dyn CueClient, args: &AdminArgs) -> Result<(), String> {
    if args.verbose {
        let facility = args.facility.as_deref().unwrap_or("-");
        eprintln!(
            "server={} facility={} force={}",
            if args.demo { "demo" } else { &args.server },
            facility,
            args.force
        );
    }
    match &args.command {
        Command::Help => println!("{}", USAGE),
        Command::ListJobs(subs) => {
            let jobs = client
                .get_jobs(&JobSearch {
                    substr: subs.clone(),
                    ..Default::default()
                })
                .map_err(|e| e.to_string())?;
            println!(
                "{:<48} {:>8} {:>8} {:>6} {:>6} {:>6}",
                "Job", "Cores", "Wait", "Run", "Dead", "Pri"
            );
            for job in jobs {
                println!(
                    "{:<48} {:>8.2} {:>8} {:>6} {:>6} {:>6}",
                    job.name,
                    job.stats.reserved_cores,
                    job.stats.frames.waiting,
                    job.stats.frames.running,
                    job.stats.frames.dead,
                    job.priority
                );
            }
        }
        Command::ListAllJobs => {
            let jobs = client
                .get_jobs(&JobSearch {
                    include_finished: true,
                    ..Default::default()
                })
                .map_err(|e| e.to_string())?;
            for job in jobs {
                println!("{}", job.name);
            }
        }
        Command::JobInfo(subs) => {
            let jobs = client
                .get_jobs(&JobSearch {
                    substr: subs.clone(),
                    include_finished: true,
                    ..Default::default()
                })
                .map_err(|e| e.to_string())?;
            for job in jobs {
                println!("{}", job.name);
                println!("  show/shot:  {}/{}", job.show, job.shot);
                println!("  user:       {}", job.user);
                println!("  state:      {:?}{}", job.state, if job.is_paused { " (paused)" } else { "" });
                println!("  started:    {}", format_time(job.start_time));
                println!(
                    "  frames:     {} waiting, {} running, {} dead, {} done",
                    job.stats.frames.waiting,
                    job.stats.frames.running,
                    job.stats.frames.dead,
                    job.stats.frames.succeeded
                );
                println!("  cores:      {:.2} (max {:.0})", job.stats.reserved_cores, job.max_cores);
                println!("  max rss:    {}", format_mem(job.stats.max_rss));
                println!("  log dir:    {}", job.log_dir);
                if args.verbose {
                    for comment in client.get_comments(job.id).map_err(|e| e.to_string())? {
                        println!(
                            "  comment:    [{}] {}: {}",
                            format_time(comment.timestamp),
                            comment.user,
                            comment.subject
                        );
                    }
                }
            }
        }
        Command::ListHosts(subs) => {
            let hosts = client
                .get_hosts(&HostSearch {
                    substr: subs.clone(),
                    ..Default::default()
                })
                .map_err(|e| e.to_string())?;
            println!(
                "{:<24} {:<14} {:<9} {:<11} {:>10} {:>10}",
                "Host", "Alloc", "State", "Lock", "Idle", "Memory"
            );
            for host in hosts {
                println!(
                    "{:<24} {:<14} {:<9} {:<11} {:>10} {:>10}",
                    host.name,
                    host.allocation,
                    format!("{:?}", host.state),
                    format!("{:?}", host.lock_state),
                    format!("{:.0}/{:.0}", host.idle_cores, host.cores),
                    format_mem(host.free_memory)
                );
            }
        }
        Command::ListShows => {
            let shows = client.get_shows().map_err(|e| e.to_string())?;
            println!(
                "{:<20} {:>8} {:>8} {:>8} {:>6}",
                "Show", "Active", "Cores", "Frames", "Jobs"
            );
            for show in shows {
                println!(
                    "{:<20} {:>8} {:>8.2} {:>8} {:>6}",
                    show.name,
                    if show.active { "yes" } else { "no" },
                    show.reserved_cores,
                    show.running_frames,
                    show.pending_jobs
                );
            }
        }
        Command::ListAllocations => {
            let allocations = client.get_allocations().map_err(|e| e.to_string())?;
            println!(
                "{:<20} {:<10} {:>8} {:>8} {:>6} {:>6}",
                "Allocation", "Tag", "Cores", "Idle", "Hosts", "Down"
            );
            for alloc in allocations {
                println!(
                    "{:<20} {:<10} {:>8.0} {:>8.0} {:>6} {:>6}",
                    alloc.name, alloc.tag, alloc.cores, alloc.available_cores, alloc.hosts,
                    alloc.down_hosts
                );
            }
        }
        Command::ListSubscriptions(shows) => {
            for show in shows {
                let subs = client.get_subscriptions(show).map_err(|e| e.to_string())?;
                for sub in subs {
                    println!(
                        "{:<36} {:>8.0} {:>8.0} {:>8.2}",
                        sub.name, sub.size, sub.burst, sub.reserved_cores
                    );
                }
            }
        }
        Command::Query(criteria) => {
            let search = parse_proc_query(criteria)?;
            let procs = client.get_procs(&search).map_err(|e| e.to_string())?;
            let now = unix_now();
            println!(
                "{:<26} {:>6} {:>10} {:<36} {:>10}",
                "Proc", "Cores", "Memory", "Job", "Age"
            );
            for proc in procs {
                println!(
                    "{:<26} {:>6.2} {:>10} {:<36} {:>10}",
                    proc.name,
                    proc.reserved_cores,
                    format_mem(proc.used_memory),
                    proc.job_name,
                    format_duration(now.saturating_sub(proc.dispatch_time))
                );
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    cuewatch_tools::init_logging();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let parsed = match parse(&args) {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("Error: {}", err);
            return ExitCode::from(1);
        }
    };
    let client = match connect(&parsed.server, parsed.demo) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("Error: {}", err);
            return ExitCode::from(1);
        }
    };
    match run(client.as_ref(), &parsed) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::from(1)
        }
    }
}
