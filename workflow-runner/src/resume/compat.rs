//! Compatibility validation between a stored snapshot and the current
//! workflow source text.
//!
//! Pure functions over their inputs — no I/O — so the scoring is fully
//! unit-testable without a filesystem. The similarity-weighted scoring is
//! deliberately conservative: refusing a silently-wrong resume beats
//! resuming anyway.

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use crate::resume::snapshot::ResumeSnapshot;

/// Minimum score at which resuming is allowed, unless overridden.
pub const DEFAULT_RESUME_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone)]
pub struct CompatibilityResult {
    pub can_resume: bool,
    /// Confidence in `[0, 1]` that the snapshot is safe to resume against
    /// the current source.
    pub score: f64,
    pub warnings: Vec<String>,
    pub requires_adaptation: bool,
}

/// sha256 hex digest of workflow text.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Normalized similarity in `[0, 1]`: `1 − distance / max(len_a, len_b)`.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let len_a = a.chars().count();
    let len_b = b.chars().count();
    let max_len = len_a.max(len_b);
    if max_len == 0 {
        return 1.0;
    }
    let distance = levenshtein(a, b);
    (1.0 - distance as f64 / max_len as f64).clamp(0.0, 1.0)
}

/// Decide whether `snapshot` may be used to resume against
/// `current_source`, given the currently registered tool names.
pub fn validate_compatibility(
    snapshot: &ResumeSnapshot,
    current_source: &str,
    registered_tools: &[String],
    threshold: f64,
) -> CompatibilityResult {
    let mut warnings = Vec::new();
    let mut requires_adaptation = false;
    let mut score = 1.0_f64;

    let meta = &snapshot.workflow_metadata;
    if content_hash(current_source) != meta.original_workflow_hash {
        let sim = similarity(&meta.original_workflow_content, current_source);
        score *= sim;
        if sim < 0.8 {
            warnings.push(format!(
                "workflow content changed significantly since the snapshot \
                 was taken (similarity {:.2})",
                sim
            ));
        }
        if sim < 0.5 {
            requires_adaptation = true;
            warnings.push(
                "the workflow has diverged heavily; consider a fresh run and \
                 carry important variables over manually"
                    .to_string(),
            );
        }
    }

    // Every tool the prior run used must still resolve, both against the
    // snapshot's declared set and against what is registered now.
    let mut unresolvable: BTreeSet<&str> = BTreeSet::new();
    for tool in &snapshot.completed_tools {
        let name = tool.function_name.as_str();
        let declared = meta.available_tools.contains(name);
        let registered = registered_tools.iter().any(|t| t == name);
        if !(declared && registered) {
            unresolvable.insert(name);
        }
    }
    for name in unresolvable {
        score *= 0.7;
        warnings.push(format!(
            "previously used tool '{}' is no longer available",
            name
        ));
    }

    let score = score.clamp(0.0, 1.0);
    CompatibilityResult {
        can_resume: score >= threshold,
        score,
        warnings,
        requires_adaptation,
    }
}

/// Character-level edit distance, two-row dynamic programming.
fn levenshtein(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr: Vec<usize> = vec![0; b_chars.len() + 1];

    for (i, &ca) in a_chars.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b_chars.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}
