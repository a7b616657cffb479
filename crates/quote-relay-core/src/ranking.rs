//! Composite quote scoring, ordering, and weighted random sampling.
//!
//! The ranking engine has no I/O and no mutable state beyond its fixed
//! weights. Every function takes quotes by reference and never mutates
//! them.
//!
//! # Scoring
//!
//! | Metric | Formula |
//! |--------|---------|
//! | recency | `0.5` if never viewed, else `exp(-hours_since_last_view / 24)`, hours floored at 0 |
//! | popularity | `0` if no likes, else `log10(likes + 1) / 2` |
//! | engagement | `0` if no views, else `min(likes / views, 1)` |
//!
//! `score = recency × 0.2 + popularity × 0.5 + engagement × 0.3`
//!
//! The weights are applied as-is, without renormalisation. Never-viewed
//! quotes get the 0.5 recency baseline so unseen content is not ranked as
//! stale.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;

use crate::models::{Quote, QuoteMetrics};

/// Recency assigned to quotes that have never been viewed.
pub const RECENCY_BASELINE: f64 = 0.5;
/// e-folding time of the recency decay, in hours.
pub const RECENCY_DECAY_HOURS: f64 = 24.0;
/// Floor applied to sampling weights so no quote is unreachable.
pub const MIN_SAMPLING_WEIGHT: f64 = 0.1;

/// Relative weight of each metric in the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RankingWeights {
    pub recency: f64,
    pub likes: f64,
    pub engagement: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            recency: 0.2,
            likes: 0.5,
            engagement: 0.3,
        }
    }
}

/// Stateless scorer over [`Quote`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct RankingEngine {
    weights: RankingWeights,
}

impl RankingEngine {
    pub fn new(weights: RankingWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> RankingWeights {
        self.weights
    }

    /// Individual ranking signals for `quote`, evaluated at `now`.
    pub fn metrics(&self, quote: &Quote, now: DateTime<Utc>) -> QuoteMetrics {
        QuoteMetrics {
            recency: recency(quote, now),
            popularity: popularity(quote),
            engagement: engagement(quote),
        }
    }

    /// Composite score evaluated at `now`.
    pub fn score_at(&self, quote: &Quote, now: DateTime<Utc>) -> f64 {
        let m = self.metrics(quote, now);
        m.recency * self.weights.recency
            + m.popularity * self.weights.likes
            + m.engagement * self.weights.engagement
    }

    /// Composite score evaluated at the current time.
    pub fn calculate_score(&self, quote: &Quote) -> f64 {
        self.score_at(quote, Utc::now())
    }

    /// Order `quotes` by composite score, best first.
    ///
    /// The sort is stable, so equal scores keep their input order.
    pub fn rank_for_new_users(&self, quotes: &[Quote]) -> Vec<Quote> {
        let now = Utc::now();
        let mut scored: Vec<(f64, &Quote)> =
            quotes.iter().map(|q| (self.score_at(q, now), q)).collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.into_iter().map(|(_, q)| q.clone()).collect()
    }

    /// The best `limit` quotes by composite score.
    pub fn top_quotes(&self, quotes: &[Quote], limit: usize) -> Vec<Quote> {
        let mut ranked = self.rank_for_new_users(quotes);
        ranked.truncate(limit);
        ranked
    }

    /// Score-weighted random pick using the thread-local RNG.
    ///
    /// Returns `None` only for an empty slice.
    pub fn select_weighted_random<'a>(&self, quotes: &'a [Quote]) -> Option<&'a Quote> {
        self.select_weighted_with(quotes, &mut rand::thread_rng())
    }

    /// Score-weighted random pick driven by `rng`.
    ///
    /// Each candidate weighs `max(score, 0.1)`. A point `r` is drawn
    /// uniformly in `[0, total)` and the candidates are walked, subtracting
    /// weights, until `r <= 0`. If float drift exhausts the walk first the
    /// last candidate is returned.
    pub fn select_weighted_with<'a, R>(&self, quotes: &'a [Quote], rng: &mut R) -> Option<&'a Quote>
    where
        R: Rng + ?Sized,
    {
        let last = quotes.last()?;
        let now = Utc::now();
        let weighted: Vec<(f64, &Quote)> = quotes
            .iter()
            .map(|q| (self.score_at(q, now).max(MIN_SAMPLING_WEIGHT), q))
            .collect();
        let total: f64 = weighted.iter().map(|(w, _)| w).sum();

        let mut r = rng.gen::<f64>() * total;
        for (weight, quote) in weighted {
            r -= weight;
            if r <= 0.0 {
                return Some(quote);
            }
        }
        Some(last)
    }
}

fn recency(quote: &Quote, now: DateTime<Utc>) -> f64 {
    match quote.last_viewed_at {
        None => RECENCY_BASELINE,
        Some(seen) => {
            // A view stamped after `now` (clock skew, concurrent view) is "just now".
            let hours = ((now - seen).num_milliseconds() as f64 / 3_600_000.0).max(0.0);
            (-hours / RECENCY_DECAY_HOURS).exp()
        }
    }
}

fn popularity(quote: &Quote) -> f64 {
    if quote.likes == 0 {
        return 0.0;
    }
    ((quote.likes + 1) as f64).log10() / 2.0
}

fn engagement(quote: &Quote) -> f64 {
    if quote.views == 0 {
        return 0.0;
    }
    (quote.likes as f64 / quote.views as f64).min(1.0)
}
