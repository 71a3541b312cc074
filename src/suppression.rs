//! Suppression rules and the engine that applies them.
//!
//! Suppression never removes a finding. A match appends a
//! [`SuppressionAnnotation`] and the finding drops out of the actionable
//! counts while staying in every export.
//!
//! A rule matches a finding when all of the following hold:
//! - `rule_id` glob matches the finding's rule id.
//! - `path` glob matches the uri of at least one finding location.
//! - the rule's line range, if any, intersects the primary location's range.
//!
//! Rules are evaluated independently, so overlapping rules behave as a union
//! and the order in which they are listed never changes the outcome.

use crate::error::ValidationError;
use crate::finding::{Finding, Location, SuppressionAnnotation};
use chrono::{NaiveDate, Utc};
use globset::{GlobBuilder, GlobMatcher};
use std::collections::BTreeSet;

/// A configured match pattern that marks findings non-actionable.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct SuppressionRule {
    /// Glob over rule ids, e.g. `"B605"` or `"semgrep.*"`.
    pub rule_id: String,
    /// Glob over source-relative paths, e.g. `"tests/**"`.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_start: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_end: Option<u32>,
    pub reason: String,
    /// Last day the rule applies (`YYYY-MM-DD`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<NaiveDate>,
}

impl SuppressionRule {
    pub fn new(rule_id: &str, path: &str, reason: &str) -> Self {
        SuppressionRule {
            rule_id: rule_id.to_string(),
            path: path.to_string(),
            line_start: None,
            line_end: None,
            reason: reason.to_string(),
            expiration: None,
        }
    }

    pub fn lines(mut self, start: Option<u32>, end: Option<u32>) -> Self {
        self.line_start = start;
        self.line_end = end;
        self
    }

    pub fn expires(mut self, date: NaiveDate) -> Self {
        self.expiration = Some(date);
        self
    }

    /// Stable textual reference written into annotations.
    pub fn reference(&self) -> String {
        match (self.line_start, self.line_end) {
            (None, None) => format!("{}@{}", self.rule_id, self.path),
            (start, end) => format!(
                "{}@{}:{}-{}",
                self.rule_id,
                self.path,
                start.map(|n| n.to_string()).unwrap_or_default(),
                end.map(|n| n.to_string()).unwrap_or_default()
            ),
        }
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiration.is_some_and(|d| d < today)
    }

    /// Whether the rule's line range intersects the location's range.
    fn lines_match(&self, location: Option<&Location>) -> bool {
        if self.line_start.is_none() && self.line_end.is_none() {
            return true;
        }
        let Some(start) = location.and_then(|l| l.start_line) else {
            return false;
        };
        let end = location.and_then(|l| l.end_line).unwrap_or(start);
        match (self.line_start, self.line_end) {
            (Some(rs), None) => end >= rs,
            (None, Some(re)) => start <= re,
            (Some(rs), Some(re)) => start <= re && end >= rs,
            (None, None) => true,
        }
    }
}

struct CompiledRule {
    rule: SuppressionRule,
    rule_id: GlobMatcher,
    path: GlobMatcher,
}

impl CompiledRule {
    fn compile(rule: &SuppressionRule) -> Result<Self, ValidationError> {
        Ok(CompiledRule {
            rule_id: compile_glob(&rule.rule_id)?,
            path: compile_glob(rule.path.trim_start_matches("./"))?,
            rule: rule.clone(),
        })
    }

    fn matches(&self, finding: &Finding) -> bool {
        self.rule_id.is_match(&finding.rule_id)
            && finding
                .locations
                .iter()
                .any(|l| self.path.is_match(&l.uri))
            && self.rule.lines_match(finding.primary_location())
    }
}

fn compile_glob(pattern: &str) -> Result<GlobMatcher, ValidationError> {
    GlobBuilder::new(pattern)
        .literal_separator(false)
        .build()
        .map(|g| g.compile_matcher())
        .map_err(|e| ValidationError::new(format!("invalid glob `{pattern}`: {e}")))
}

/// What a single [`SuppressionEngine::apply`] call changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SuppressionOutcome {
    /// Findings that carried no annotation before this call and do now.
    pub newly_suppressed: usize,
    /// References of rules that matched at least one finding.
    pub matched_rules: BTreeSet<String>,
}

/// Applies suppression rules to a finding collection.
pub struct SuppressionEngine {
    rules: Vec<CompiledRule>,
    invalid: Vec<(String, ValidationError)>,
    ignore: bool,
}

impl SuppressionEngine {
    /// Compiles `rules`, dropping expired ones and ones whose globs do not
    /// compile. With `ignore_suppressions` set, the engine is a pass-through.
    pub fn new(rules: &[SuppressionRule], ignore_suppressions: bool) -> Self {
        Self::with_today(rules, ignore_suppressions, Utc::now().date_naive())
    }

    pub fn with_today(rules: &[SuppressionRule], ignore_suppressions: bool, today: NaiveDate) -> Self {
        let mut compiled = Vec::new();
        let mut invalid = Vec::new();
        for rule in rules {
            if rule.is_expired(today) {
                tracing::debug!(rule = %rule.reference(), "suppression expired, ignoring");
                continue;
            }
            match CompiledRule::compile(rule) {
                Ok(c) => compiled.push(c),
                Err(e) => {
                    tracing::warn!(rule = %rule.reference(), error = %e, "skipping suppression rule");
                    invalid.push((rule.reference(), e));
                }
            }
        }
        SuppressionEngine {
            rules: compiled,
            invalid,
            ignore: ignore_suppressions,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.ignore
    }

    /// Rules rejected at construction, with the reason.
    pub fn invalid_rules(&self) -> &[(String, ValidationError)] {
        &self.invalid
    }

    /// Annotates every finding matched by any active rule.
    ///
    /// Idempotent: a rule never annotates the same finding twice.
    pub fn apply(&self, findings: &mut [Finding]) -> SuppressionOutcome {
        let mut outcome = SuppressionOutcome::default();
        if self.ignore {
            return outcome;
        }
        for finding in findings.iter_mut() {
            let was_suppressed = finding.is_suppressed();
            for compiled in &self.rules {
                if !compiled.matches(finding) {
                    continue;
                }
                let reference = compiled.rule.reference();
                if !finding.suppressions.iter().any(|a| a.rule == reference) {
                    finding.suppressions.push(SuppressionAnnotation {
                        rule: reference.clone(),
                        justification: compiled.rule.reason.clone(),
                    });
                }
                outcome.matched_rules.insert(reference);
            }
            if !was_suppressed && finding.is_suppressed() {
                outcome.newly_suppressed += 1;
            }
        }
        outcome
    }

    /// Active rules that match none of `findings`.
    pub fn unused_rules(&self, findings: &[Finding]) -> Vec<&SuppressionRule> {
        self.rules
            .iter()
            .filter(|c| !findings.iter().any(|f| c.matches(f)))
            .map(|c| &c.rule)
            .collect()
    }

    /// Active rules whose expiration falls within `days` of `today`.
    pub fn expiring_within(&self, today: NaiveDate, days: i64) -> Vec<&SuppressionRule> {
        let horizon = today + chrono::Duration::days(days);
        self.rules
            .iter()
            .filter(|c| c.rule.expiration.is_some_and(|d| d >= today && d <= horizon))
            .map(|c| &c.rule)
            .collect()
    }
}
