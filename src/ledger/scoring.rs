//! Item scoring.
//!
//! `total = base + Σ min(count, cap) * weight` across the engagement metrics.
//! The base score is fixed at item creation; the bonus is recomputed from
//! current counters on every refresh. Per-metric caps bound how many points a
//! single viral post can farm.

use serde::Serialize;

use crate::config::ScoringConfig;
use crate::sources::EngagementCounts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScoreBreakdown {
    pub base: i64,
    pub bonus: i64,
    pub total: i64,
}

/// Weighted, capped bonus for a set of engagement counters.
pub fn bonus(counts: &EngagementCounts, config: &ScoringConfig) -> i64 {
    let w = &config.weights;
    let c = &config.caps;

    metric(counts.likes, c.likes, w.likes)
        + metric(counts.reposts, c.reposts, w.reposts)
        + metric(counts.replies, c.replies, w.replies)
        + metric(counts.quotes, c.quotes, w.quotes)
        + metric(counts.views, c.views, w.views)
        + metric(counts.bookmarks, c.bookmarks, w.bookmarks)
}

/// Full breakdown for a newly created item.
pub fn score(counts: &EngagementCounts, config: &ScoringConfig) -> ScoreBreakdown {
    let base = config.base_score;
    let bonus = bonus(counts, config);
    ScoreBreakdown {
        base,
        bonus,
        total: base + bonus,
    }
}

fn metric(count: i64, cap: i64, weight: i64) -> i64 {
    count.max(0).min(cap) * weight
}
