//! Weighted vendor scoring.
//!
//! Evaluations are folded into four fixed buckets and combined with fixed
//! weights. Scores are always derived from the current evaluation set and
//! never stored.
//!
//! | Bucket | Weight |
//! |--------|--------|
//! | technical | 0.30 |
//! | cost | 0.25 |
//! | experience | 0.25 |
//! | support | 0.20 |

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{Vendor, VendorEvaluation, VendorStatus};

pub const WEIGHT_TECHNICAL: f64 = 0.30;
pub const WEIGHT_COST: f64 = 0.25;
pub const WEIGHT_EXPERIENCE: f64 = 0.25;
pub const WEIGHT_SUPPORT: f64 = 0.20;

/// How several evaluations in the same category collapse into one bucket value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Last evaluation encountered wins. Callers pass evaluations oldest first.
    #[default]
    Latest,
    Max,
    Average,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Technical,
    Cost,
    Experience,
    Support,
}

impl Bucket {
    /// Matches a category label, ignoring case and surrounding whitespace.
    pub fn from_category(category: &str) -> Option<Self> {
        match category.trim().to_lowercase().as_str() {
            "technical" => Some(Bucket::Technical),
            "cost" => Some(Bucket::Cost),
            "experience" => Some(Bucket::Experience),
            "support" => Some(Bucket::Support),
            _ => None,
        }
    }
}

/// Per-bucket scores plus the weighted total.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ScoreBreakdown {
    pub technical: f64,
    pub cost: f64,
    pub experience: f64,
    pub support: f64,
    pub total: f64,
}

/// Anything carrying a category label and a score.
pub trait Scored {
    fn category(&self) -> &str;
    fn score(&self) -> f64;
}

impl Scored for VendorEvaluation {
    fn category(&self) -> &str {
        &self.category
    }
    fn score(&self) -> f64 {
        self.score
    }
}

impl Scored for (&str, f64) {
    fn category(&self) -> &str {
        self.0
    }
    fn score(&self) -> f64 {
        self.1
    }
}

/// Computes the bucket scores and rounded weighted total.
///
/// Categories outside the four buckets are ignored. An empty input yields
/// all zeros.
pub fn score<E: Scored>(evaluations: &[E], policy: DuplicatePolicy) -> ScoreBreakdown {
    // (sum, count, last, max) per bucket
    let mut acc: HashMap<Bucket, (f64, usize, f64, f64)> = HashMap::new();

    for eval in evaluations {
        let Some(bucket) = Bucket::from_category(eval.category()) else {
            continue;
        };
        let value = eval.score();
        let entry = acc
            .entry(bucket)
            .or_insert((0.0, 0, value, f64::NEG_INFINITY));
        entry.0 += value;
        entry.1 += 1;
        entry.2 = value;
        entry.3 = entry.3.max(value);
    }

    let resolve = |bucket: Bucket| -> f64 {
        match acc.get(&bucket) {
            None => 0.0,
            Some(&(sum, count, last, max)) => match policy {
                DuplicatePolicy::Latest => last,
                DuplicatePolicy::Max => max,
                DuplicatePolicy::Average => sum / count as f64,
            },
        }
    };

    let technical = resolve(Bucket::Technical);
    let cost = resolve(Bucket::Cost);
    let experience = resolve(Bucket::Experience);
    let support = resolve(Bucket::Support);

    let total = technical * WEIGHT_TECHNICAL
        + cost * WEIGHT_COST
        + experience * WEIGHT_EXPERIENCE
        + support * WEIGHT_SUPPORT;

    ScoreBreakdown {
        technical,
        cost,
        experience,
        support,
        total: round2(total),
    }
}

/// Rounds to two decimal places, half away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Vendor identity combined with its score breakdown, shaped for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorScore {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: VendorStatus,
    pub technical_score: f64,
    pub cost_score: f64,
    pub experience_score: f64,
    pub support_score: f64,
    pub total_score: f64,
}

pub fn score_vendor(
    vendor: &Vendor,
    evaluations: &[VendorEvaluation],
    policy: DuplicatePolicy,
) -> VendorScore {
    let breakdown = score(evaluations, policy);
    VendorScore {
        id: vendor.id.clone(),
        name: vendor.name.clone(),
        description: vendor.description.clone(),
        status: vendor.status,
        technical_score: breakdown.technical,
        cost_score: breakdown.cost,
        experience_score: breakdown.experience,
        support_score: breakdown.support,
        total_score: breakdown.total,
    }
}

/// Sorts by total score, highest first. Ties keep their input order.
pub fn rank(mut scores: Vec<VendorScore>) -> Vec<VendorScore> {
    scores.sort_by(|a, b| b.total_score.total_cmp(&a.total_score));
    scores
}
