//! Per-frame caches served by the work pool.
//!
//! Log tails and ETA predictions are too slow to compute during painting,
//! so both live in TTL caches: reads return whatever is cached and, when
//! the entry has gone stale, enqueue a background refresh. Each buffer is
//! covered by a single mutex spanning the cache and its pending sub-queue.

pub mod etabuf;
pub mod logbuf;

pub use etabuf::EtaBuffer;
pub use logbuf::{LogBuffer, LogEntry};

use crate::model::{Frame, Job};

use regex::Regex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// How much of the end of a log file the tail reader looks at.
pub const TAIL_BYTES: u64 = 4096;

/// Frame logs live under the job's log dir as
/// `<job.name>.<frame.name>.rqlog`.
pub fn frame_log_path(job: &Job, frame: &Frame) -> PathBuf {
    Path::new(&job.log_dir).join(format!("{}.{}.rqlog", job.name, frame.name()))
}

/// Rotated copy `n` of a log (`.1`, `.2`, ...; higher is older).
pub fn rotated_log_path(path: &Path, n: u32) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{}", n));
    PathBuf::from(name)
}

fn ansi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("\x1b\\[[0-9;]*[A-Za-z]").expect("static regex"))
}

/// Strip ANSI CSI sequences from a log line.
pub fn strip_ansi(line: &str) -> String {
    ansi_re().replace_all(line, "").into_owned()
}

/// Read the last line of a log and the seconds since the file was last
/// written. Looks only at the trailing [`TAIL_BYTES`], decodes UTF-8
/// lossily and strips ANSI escapes.
pub fn read_tail(path: &Path) -> std::io::Result<(String, i64)> {
    let meta = std::fs::metadata(path)?;
    let mtime = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let llu = now.saturating_sub(mtime) as i64;

    let mut file = File::open(path)?;
    let len = meta.len();
    let start = len.saturating_sub(TAIL_BYTES);
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf)?;
    let text = String::from_utf8_lossy(&buf);

    let trimmed = text.trim_end_matches(['\n', '\r']);
    let last = match trimmed.rfind('\n') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    };
    Ok((strip_ansi(last.trim_end()), llu))
}
