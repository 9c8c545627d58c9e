//! Display formatting and small textual parsers shared by every tree.

use chrono::{Local, TimeZone};

const KB_PER_MB: u64 = 1024;
const KB_PER_GB: u64 = 1024 * 1024;
const KB_PER_TB: u64 = 1024 * 1024 * 1024;

/// Memory is stored in kilobytes everywhere. Unit switches at 1 GB and 1 TB.
pub fn format_mem(kb: u64) -> String {
    if kb < KB_PER_MB {
        format!("{}K", kb)
    } else if kb < KB_PER_GB {
        format!("{:.1}M", kb as f64 / KB_PER_MB as f64)
    } else if kb < KB_PER_TB {
        format!("{:.1}G", kb as f64 / KB_PER_GB as f64)
    } else {
        format!("{:.1}T", kb as f64 / KB_PER_TB as f64)
    }
}

/// Unix seconds to local wall clock. Zero means "absent" server-side and
/// renders as a dashed placeholder.
pub fn format_time(secs: u64) -> String {
    if secs == 0 {
        return "--/-- --:--".to_string();
    }
    match Local.timestamp_opt(secs as i64, 0) {
        chrono::LocalResult::Single(t) => t.format("%m/%d %H:%M").to_string(),
        _ => "--/-- --:--".to_string(),
    }
}

pub fn format_duration(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Parse a frame's `last_resource` field, `"<host>/<cores>/<gpus>"`.
/// Cores are fractional, gpus integral. Any parse failure yields `None`s
/// for the numeric parts; an empty string yields all `None`. Display never
/// aborts on a bad value.
pub fn parse_last_resource(s: &str) -> (Option<String>, Option<f32>, Option<u32>) {
    if s.is_empty() {
        return (None, None, None);
    }
    let mut parts = s.split('/');
    let host = parts.next().filter(|h| !h.is_empty()).map(str::to_string);
    let cores = parts.next().and_then(|c| c.parse::<f32>().ok());
    let gpus = parts.next().and_then(|g| g.parse::<u32>().ok());
    (host, cores, gpus)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRange {
    pub start: i64,
    pub end: i64,
    pub step: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeParseError(pub String);

impl std::fmt::Display for RangeParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "bad frame range: {}", self.0)
    }
}

impl std::error::Error for RangeParseError {}

impl FrameRange {
    /// Parse `"a-b"`, `"a-bxS"`, or a single frame `"a"`.
    pub fn parse(s: &str) -> Result<FrameRange, RangeParseError> {
        let err = || RangeParseError(s.to_string());
        let (span, step) = match s.split_once('x') {
            Some((span, step)) => (span, step.parse::<i64>().map_err(|_| err())?),
            None => (s, 1),
        };
        if step < 1 {
            return Err(err());
        }
        // A leading '-' is a negative start frame, not a separator.
        let split = span[1.min(span.len())..].find('-').map(|i| i + 1);
        let (start, end) = match split {
            Some(i) => {
                let start = span[..i].parse::<i64>().map_err(|_| err())?;
                let end = span[i + 1..].parse::<i64>().map_err(|_| err())?;
                (start, end)
            }
            None => {
                let only = span.parse::<i64>().map_err(|_| err())?;
                (only, only)
            }
        };
        if end < start {
            return Err(err());
        }
        Ok(FrameRange { start, end, step })
    }

    pub fn len(&self) -> usize {
        ((self.end - self.start) / self.step + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn frames(&self) -> Vec<i64> {
        (self.start..=self.end).step_by(self.step as usize).collect()
    }

    /// Effective range: intersection with an outline range when one is set,
    /// the full range otherwise. Disjoint ranges yield `None`.
    pub fn effective(&self, outline: Option<&FrameRange>) -> Option<FrameRange> {
        let outline = match outline {
            Some(o) => o,
            None => return Some(*self),
        };
        let start = self.start.max(outline.start);
        let end = self.end.min(outline.end);
        if start > end {
            return None;
        }
        Some(FrameRange {
            start,
            end,
            step: self.step,
        })
    }

    /// Split into per-proc frame sets. A chunk size of zero dispatches one
    /// frame at a time; a chunk size at or past the range length clamps to
    /// a single local set.
    pub fn chunks(&self, chunk_size: u32) -> Vec<Vec<i64>> {
        let frames = self.frames();
        let chunk = (chunk_size.max(1) as usize).min(frames.len());
        frames.chunks(chunk).map(|c| c.to_vec()).collect()
    }
}

impl std::fmt::Display for FrameRange {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else if self.step == 1 {
            write!(f, "{}-{}", self.start, self.end)
        } else {
            write!(f, "{}-{}x{}", self.start, self.end, self.step)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_units() {
        assert_eq!(format_mem(512), "512K");
        assert_eq!(format_mem(2048), "2.0M");
        assert_eq!(format_mem(3 * 1024 * 1024), "3.0G");
        assert_eq!(format_mem(2 * 1024 * 1024 * 1024), "2.0T");
    }

    #[test]
    fn zero_time_is_dashed() {
        assert_eq!(format_time(0), "--/-- --:--");
        assert_ne!(format_time(1_700_000_000), "--/-- --:--");
    }

    #[test]
    fn duration_format() {
        assert_eq!(format_duration(3723), "01:02:03");
        assert_eq!(format_duration(0), "00:00:00");
    }

    #[test]
    fn last_resource_parses() {
        let (host, cores, gpus) = parse_last_resource("render01/2.5/1");
        assert_eq!(host.as_deref(), Some("render01"));
        assert_eq!(cores, Some(2.5));
        assert_eq!(gpus, Some(1));
    }

    #[test]
    fn last_resource_empty_and_garbage() {
        assert_eq!(parse_last_resource(""), (None, None, None));
        let (host, cores, gpus) = parse_last_resource("render01/lots/none");
        assert_eq!(host.as_deref(), Some("render01"));
        assert_eq!(cores, None);
        assert_eq!(gpus, None);
    }

    #[test]
    fn range_parse_forms() {
        assert_eq!(
            FrameRange::parse("1-100").unwrap(),
            FrameRange { start: 1, end: 100, step: 1 }
        );
        assert_eq!(
            FrameRange::parse("1-100x10").unwrap(),
            FrameRange { start: 1, end: 100, step: 10 }
        );
        assert_eq!(
            FrameRange::parse("5").unwrap(),
            FrameRange { start: 5, end: 5, step: 1 }
        );
        assert!(FrameRange::parse("10-1").is_err());
        assert!(FrameRange::parse("a-b").is_err());
    }

    #[test]
    fn single_frame_range() {
        let range = FrameRange::parse("1-1").unwrap();
        assert_eq!(range.len(), 1);
        assert_eq!(range.frames(), vec![1]);
    }

    #[test]
    fn chunk_clamps_to_range() {
        let range = FrameRange::parse("1-4").unwrap();
        assert_eq!(range.chunks(100), vec![vec![1, 2, 3, 4]]);
        assert_eq!(range.chunks(2), vec![vec![1, 2], vec![3, 4]]);
        assert_eq!(range.chunks(0).len(), 4);
    }

    #[test]
    fn effective_range_intersects_outline() {
        let own = FrameRange::parse("1-100").unwrap();
        let outline = FrameRange::parse("50-200").unwrap();
        assert_eq!(
            own.effective(Some(&outline)).unwrap(),
            FrameRange { start: 50, end: 100, step: 1 }
        );
        assert_eq!(own.effective(None).unwrap(), own);
        let disjoint = FrameRange::parse("200-300").unwrap();
        assert!(own.effective(Some(&disjoint)).is_none());
    }
}
