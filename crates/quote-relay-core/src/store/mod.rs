//! Repository abstraction for cached quotes.
//!
//! The [`QuoteRepository`] trait defines every cache operation the service
//! layer needs: idempotent upsert, lookup, filtered and similarity scans,
//! monotonic counters, and top-N ordering. All operations are synchronous;
//! scans are O(n) over the cached set, which is bounded by upstream
//! traffic rather than by user data.
//!
//! Implementations must be `Send + Sync` and must serialise each
//! read-modify-write (increments, upserts) so concurrent requests never
//! lose an update.

pub mod memory;

use anyhow::Result;

use crate::models::{Quote, QuoteFilters, SimilarQuery};

/// Points awarded per tag shared with the similarity query.
pub const TAG_SIMILARITY_WEIGHT: u32 = 10;
/// Points awarded when the author matches the query author exactly.
pub const AUTHOR_MATCH_WEIGHT: u32 = 5;

/// Abstract quote store.
///
/// Returned quotes are snapshots; mutating them does not affect the
/// stored record.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`save`](QuoteRepository::save) | Insert-if-absent, returns the stored record |
/// | [`find_by_id`](QuoteRepository::find_by_id) | Lookup by id |
/// | [`find_all`](QuoteRepository::find_all) | Full or filtered scan |
/// | [`find_similar`](QuoteRepository::find_similar) | Tag/author similarity scan |
/// | [`increment_likes`](QuoteRepository::increment_likes) | `likes += 1` |
/// | [`increment_views`](QuoteRepository::increment_views) | `views += 1`, stamp `last_viewed_at` |
/// | [`top_rated`](QuoteRepository::top_rated) | Top-N by likes |
/// | [`most_viewed`](QuoteRepository::most_viewed) | Top-N by views |
pub trait QuoteRepository: Send + Sync {
    /// Store `quote` unless its id is already present.
    ///
    /// Returns the stored record: the new one on first insert, otherwise
    /// the existing record unchanged (the new content is dropped).
    fn save(&self, quote: Quote) -> Result<Quote>;

    fn find_by_id(&self, id: &str) -> Result<Option<Quote>>;

    /// Scan the cache. `None` (or empty filters) returns every quote.
    fn find_all(&self, filters: Option<&QuoteFilters>) -> Result<Vec<Quote>>;

    /// Quotes sharing tags or author with the query, best first.
    fn find_similar(&self, query: &SimilarQuery) -> Result<Vec<Quote>>;

    /// Returns the updated record, or `None` if the id is unknown.
    fn increment_likes(&self, id: &str) -> Result<Option<Quote>>;

    /// Returns the updated record, or `None` if the id is unknown.
    fn increment_views(&self, id: &str) -> Result<Option<Quote>>;

    /// Top `limit` quotes by raw likes. Ties keep insertion order.
    fn top_rated(&self, limit: usize) -> Result<Vec<Quote>>;

    /// Top `limit` quotes by raw views. Ties keep insertion order.
    fn most_viewed(&self, limit: usize) -> Result<Vec<Quote>>;

    fn count(&self) -> Result<usize>;

    fn exists(&self, id: &str) -> Result<bool>;

    fn clear(&self) -> Result<()>;
}

/// Similarity score of `quote` against `query`.
///
/// `+10` per quote tag found in the query tag set, `+5` for an exact
/// author match.
pub fn similarity_score(quote: &Quote, query: &SimilarQuery) -> u32 {
    let shared = quote
        .tags
        .iter()
        .filter(|tag| query.tags.contains(tag))
        .count() as u32;
    let mut score = shared * TAG_SIMILARITY_WEIGHT;
    if let Some(author) = &query.author {
        if quote.author == *author {
            score += AUTHOR_MATCH_WEIGHT;
        }
    }
    score
}
