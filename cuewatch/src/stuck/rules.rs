//! Filter rules and the classification function.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Service name of the catch-all rule applied to procs no service-specific
/// rule matches.
pub const WILDCARD_SERVICE: &str = "(all other types)";

/// Stuckness at or past this is assumed to be a clock-skew artifact, not a
/// hung frame.
const STUCKNESS_CEILING: f64 = 1.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    /// Service this rule applies to, or [`WILDCARD_SERVICE`].
    pub service: String,
    /// Patterns excluding a frame when they match the job or layer name.
    /// Invalid regexes degrade to plain substring matching.
    pub exclude: Vec<String>,
    pub min_stuckness_pct: u32,
    pub min_llu_minutes: u32,
    pub min_pct_of_avg_completion: u32,
    pub min_runtime_minutes: u32,
    pub enabled: bool,
}

impl FilterRule {
    pub fn for_service(service: &str) -> FilterRule {
        FilterRule {
            service: service.to_string(),
            exclude: Vec::new(),
            min_stuckness_pct: 50,
            min_llu_minutes: 15,
            min_pct_of_avg_completion: 115,
            min_runtime_minutes: 30,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    rules: Vec<FilterRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<FilterRule>) -> RuleSet {
        RuleSet { rules }
    }

    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    pub fn rules_mut(&mut self) -> &mut Vec<FilterRule> {
        &mut self.rules
    }

    /// The rule governing a proc: the first enabled rule naming one of its
    /// services, else the enabled wildcard rule if there is one.
    pub fn rule_for(&self, services: &[String]) -> Option<&FilterRule> {
        self.rules
            .iter()
            .find(|r| r.enabled && services.iter().any(|s| *s == r.service))
            .or_else(|| {
                self.rules
                    .iter()
                    .find(|r| r.enabled && r.service == WILDCARD_SERVICE)
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMetrics {
    pub runtime_secs: i64,
    pub llu_secs: i64,
    /// Layer average; 0 means "no data" and bypasses the completion gate.
    pub avg_frame_secs: u32,
}

impl FrameMetrics {
    pub fn stuckness(&self) -> f64 {
        self.llu_secs as f64 / self.runtime_secs.max(1) as f64
    }
}

fn excluded(pattern: &str, text: &str) -> bool {
    match Regex::new(pattern) {
        Ok(re) => re.is_match(text),
        Err(_) => text.contains(pattern),
    }
}

/// Pure classification: same inputs, same verdict.
pub fn is_stuck(rule: &FilterRule, job_name: &str, layer_name: &str, m: &FrameMetrics) -> bool {
    if !rule.enabled || m.llu_secs < 0 {
        return false;
    }
    if rule
        .exclude
        .iter()
        .any(|p| excluded(p, job_name) || excluded(p, layer_name))
    {
        return false;
    }
    if m.runtime_secs < rule.min_runtime_minutes as i64 * 60 {
        return false;
    }
    if m.llu_secs < rule.min_llu_minutes as i64 * 60 {
        return false;
    }
    if m.avg_frame_secs > 0 {
        let needed = m.avg_frame_secs as i64 * rule.min_pct_of_avg_completion as i64 / 100;
        if m.runtime_secs < needed {
            return false;
        }
    }
    let stuckness = m.stuckness();
    stuckness >= rule.min_stuckness_pct as f64 / 100.0 && stuckness < STUCKNESS_CEILING
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nuke_rule() -> FilterRule {
        FilterRule {
            service: "nuke".to_string(),
            exclude: Vec::new(),
            min_stuckness_pct: 50,
            min_llu_minutes: 5,
            min_pct_of_avg_completion: 115,
            min_runtime_minutes: 10,
            enabled: true,
        }
    }

    fn metrics(runtime: i64, llu: i64, avg: u32) -> FrameMetrics {
        FrameMetrics {
            runtime_secs: runtime,
            llu_secs: llu,
            avg_frame_secs: avg,
        }
    }

    #[test]
    fn stuckness_gate_dominates() {
        let rule = nuke_rule();
        // All gates but stuckness pass: 400/1200 = 33% < 50%.
        assert!(!is_stuck(&rule, "job", "layer", &metrics(1200, 400, 600)));
        // Longer runtime only lowers stuckness further.
        assert!(!is_stuck(&rule, "job", "layer", &metrics(2400, 400, 600)));
        // 900/1500 = 60%, every gate passes.
        assert!(is_stuck(&rule, "job", "layer", &metrics(1500, 900, 600)));
    }

    #[test]
    fn ceiling_suppresses_clock_skew() {
        let rule = nuke_rule();
        // llu exceeding runtime by a lot means a skewed clock, not a hang.
        assert!(!is_stuck(&rule, "job", "layer", &metrics(1500, 1700, 600)));
        // Just under the ceiling still counts.
        assert!(is_stuck(&rule, "job", "layer", &metrics(1500, 1600, 600)));
    }

    #[test]
    fn completion_gate_bypassed_without_avg() {
        let rule = nuke_rule();
        // avg = 0 means no data; the completion gate is skipped.
        assert!(is_stuck(&rule, "job", "layer", &metrics(1500, 900, 0)));
        // With avg data the runtime must reach 115% of it.
        assert!(!is_stuck(&rule, "job", "layer", &metrics(660, 400, 600)));
    }

    #[test]
    fn exclusions_match_job_or_layer() {
        let mut rule = nuke_rule();
        rule.exclude = vec!["_hold".to_string(), "^ignore".to_string()];
        let m = metrics(1500, 900, 600);
        assert!(!is_stuck(&rule, "show-shot-user_hold", "layer", &m));
        assert!(!is_stuck(&rule, "job", "ignore_this_layer", &m));
        assert!(is_stuck(&rule, "job", "layer", &m));
        // Invalid regex degrades to substring matching.
        rule.exclude = vec!["[bad".to_string()];
        assert!(!is_stuck(&rule, "job-with-[bad-token", "layer", &m));
        assert!(is_stuck(&rule, "job", "layer", &m));
    }

    #[test]
    fn disabled_rules_and_negative_llu_never_classify() {
        let mut rule = nuke_rule();
        let m = metrics(1500, 900, 600);
        rule.enabled = false;
        assert!(!is_stuck(&rule, "job", "layer", &m));
        let rule = nuke_rule();
        assert!(!is_stuck(&rule, "job", "layer", &metrics(1500, -1, 600)));
    }

    #[test]
    fn rule_selection_prefers_service_match_then_wildcard() {
        let nuke = nuke_rule();
        let mut wildcard = nuke_rule();
        wildcard.service = WILDCARD_SERVICE.to_string();
        wildcard.min_llu_minutes = 99;
        let rules = RuleSet::new(vec![nuke, wildcard]);

        let svc = vec!["nuke".to_string()];
        assert_eq!(rules.rule_for(&svc).unwrap().service, "nuke");
        let other = vec!["arnold".to_string()];
        assert_eq!(rules.rule_for(&other).unwrap().service, WILDCARD_SERVICE);

        let no_wildcard = RuleSet::new(vec![nuke_rule()]);
        assert!(no_wildcard.rule_for(&other).is_none());
    }

    #[test]
    fn classification_is_deterministic() {
        let rule = nuke_rule();
        let m = metrics(1500, 900, 600);
        let first = is_stuck(&rule, "job", "layer", &m);
        for _ in 0..10 {
            assert_eq!(is_stuck(&rule, "job", "layer", &m), first);
        }
    }
}
