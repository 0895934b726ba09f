//! Symmetric similarity measures bounded to [0, 1]

use std::collections::BTreeSet;

use crate::agent::AgentRun;
use crate::findings::{normalize_text, tokenize, Finding};

/// Partial agreement never counts as much as a category + severity match
const PARTIAL_AGREEMENT_CAP: f64 = 0.8;

/// Jaccard overlap of the token sets of `a` and `b`
pub fn token_jaccard(a: &str, b: &str) -> f64 {
    let ta: BTreeSet<String> = tokenize(a).collect();
    let tb: BTreeSet<String> = tokenize(b).collect();
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let intersection = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    intersection / union
}

/// Mean of token Jaccard and normalized Levenshtein over normalized text
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let na = normalize_text(a);
    let nb = normalize_text(b);
    if na.is_empty() && nb.is_empty() {
        return 1.0;
    }
    let edit = strsim::normalized_levenshtein(&na, &nb);
    clamp_unit((token_jaccard(&na, &nb) + edit) / 2.0)
}

/// Stage-by-stage narrative similarity of two runs.
///
/// Stage positions present in only one run score 0; the mean is taken over
/// the longer run. Two runs with no stages have nothing to agree on.
pub fn narrative_consistency(a: &AgentRun, b: &AgentRun) -> f64 {
    let longest = a.stages.len().max(b.stages.len());
    if longest == 0 {
        return 0.0;
    }
    let total: f64 = a
        .stages
        .iter()
        .zip(b.stages.iter())
        .map(|(sa, sb)| text_similarity(&sa.summary(), &sb.summary()))
        .sum();
    clamp_unit(total / longest as f64)
}

/// Agreement between two single findings
pub fn finding_agreement(a: &Finding, b: &Finding) -> f64 {
    if a.kind != b.kind {
        return 0.0;
    }
    if normalize_text(&a.category) == normalize_text(&b.category) && a.severity == b.severity {
        return 1.0;
    }
    text_similarity(&a.description, &b.description) * PARTIAL_AGREEMENT_CAP
}

/// Best-match agreement between two finding sets, averaged in both directions
pub fn conclusion_similarity(a: &[Finding], b: &[Finding]) -> f64 {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        _ => {}
    }
    let best = |f: &Finding, others: &[Finding]| {
        others
            .iter()
            .map(|o| finding_agreement(f, o))
            .fold(0.0_f64, f64::max)
    };
    let forward: f64 = a.iter().map(|f| best(f, b)).sum();
    let backward: f64 = b.iter().map(|f| best(f, a)).sum();
    clamp_unit((forward + backward) / (a.len() + b.len()) as f64)
}

fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}
