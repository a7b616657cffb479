//! Core data models used throughout Quote Relay.
//!
//! [`ExternalQuote`] is the upstream wire shape; [`Quote`] is the cached
//! record owned by the repository. The remaining types are query and
//! aggregate shapes passed between the repository, the ranking engine,
//! and the service layer.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A cached quote.
///
/// Identity fields (`id`, `content`, `author`, `tags`, `length`,
/// `created_at`) never change after the first insertion. Counters only
/// move forward, and only through the repository's increment operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Stable upstream identifier; unique key in the repository.
    pub id: String,
    pub content: String,
    pub author: String,
    /// Tag order is preserved for display but irrelevant for matching.
    pub tags: Vec<String>,
    /// Character count of `content`.
    pub length: u32,
    pub likes: u64,
    pub views: u64,
    pub created_at: DateTime<Utc>,
    /// `None` until the first view increment.
    pub last_viewed_at: Option<DateTime<Utc>>,
}

impl Quote {
    /// Build a fresh, never-viewed quote with zeroed counters.
    ///
    /// `length` is derived from the character count of `content`.
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        author: impl Into<String>,
        tags: Vec<String>,
    ) -> Self {
        let content = content.into();
        let length = content.chars().count() as u32;
        Self {
            id: id.into(),
            content,
            author: author.into(),
            tags,
            length,
            likes: 0,
            views: 0,
            created_at: Utc::now(),
            last_viewed_at: None,
        }
    }

    /// True if the quote carries `tag` (exact match).
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Quote as returned by the upstream quotes API.
///
/// Field names follow the upstream JSON contract (`_id`, `authorSlug`,
/// `dateAdded`, ...). Optional decorations default to empty values so a
/// sparse upstream payload still decodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalQuote {
    #[serde(rename = "_id")]
    pub id: String,
    pub content: String,
    pub author: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub author_slug: String,
    #[serde(default)]
    pub length: u32,
    #[serde(default)]
    pub date_added: String,
    #[serde(default)]
    pub date_modified: String,
}

impl ExternalQuote {
    /// Map to a cached [`Quote`] with zeroed counters.
    ///
    /// `created_at` comes from `dateAdded`; when that is missing or
    /// unparseable the current time is used instead. A missing `length`
    /// is derived from `content`.
    pub fn into_quote(self) -> Quote {
        let created_at = parse_upstream_date(&self.date_added).unwrap_or_else(Utc::now);
        let length = if self.length > 0 {
            self.length
        } else {
            self.content.chars().count() as u32
        };
        Quote {
            id: self.id,
            content: self.content,
            author: self.author,
            tags: self.tags,
            length,
            likes: 0,
            views: 0,
            created_at,
            last_viewed_at: None,
        }
    }
}

impl From<ExternalQuote> for Quote {
    fn from(external: ExternalQuote) -> Self {
        external.into_quote()
    }
}

/// Parse an upstream date: RFC 3339 first, then a bare `YYYY-MM-DD`
/// interpreted as midnight UTC.
pub fn parse_upstream_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| ndt.and_utc())
}

/// Derived ranking signals for one quote. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuoteMetrics {
    pub recency: f64,
    pub popularity: f64,
    pub engagement: f64,
}

/// Filters for [`QuoteRepository::find_all`](crate::store::QuoteRepository::find_all).
///
/// All populated filters must match (logical AND).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuoteFilters {
    /// Matches when the quote carries at least one of these tags.
    /// An empty list disables the filter.
    pub tags: Vec<String>,
    /// Case-insensitive substring match on the author name.
    pub author: Option<String>,
    /// Inclusive lower bound on `length`.
    pub min_length: Option<u32>,
    /// Inclusive upper bound on `length`.
    pub max_length: Option<u32>,
}

impl QuoteFilters {
    /// True when no filter is populated.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
            && self.author.is_none()
            && self.min_length.is_none()
            && self.max_length.is_none()
    }

    pub fn matches(&self, quote: &Quote) -> bool {
        if !self.tags.is_empty() && !self.tags.iter().any(|t| quote.has_tag(t)) {
            return false;
        }
        if let Some(author) = &self.author {
            if !quote
                .author
                .to_lowercase()
                .contains(&author.to_lowercase())
            {
                return false;
            }
        }
        if let Some(min) = self.min_length {
            if quote.length < min {
                return false;
            }
        }
        if let Some(max) = self.max_length {
            if quote.length > max {
                return false;
            }
        }
        true
    }
}

/// Default number of results for a similarity query.
pub const DEFAULT_SIMILAR_LIMIT: usize = 5;

/// Similarity query for [`QuoteRepository::find_similar`](crate::store::QuoteRepository::find_similar).
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarQuery {
    pub tags: Vec<String>,
    /// Exact (case-sensitive) author match.
    pub author: Option<String>,
    /// Never returned, even if it scores.
    pub exclude_id: Option<String>,
    pub limit: usize,
}

impl Default for SimilarQuery {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            author: None,
            exclude_id: None,
            limit: DEFAULT_SIMILAR_LIMIT,
        }
    }
}

impl SimilarQuery {
    /// Query for quotes resembling `quote`, excluding `quote` itself.
    pub fn like(quote: &Quote, limit: usize) -> Self {
        Self {
            tags: quote.tags.clone(),
            author: Some(quote.author.clone()),
            exclude_id: Some(quote.id.clone()),
            limit,
        }
    }
}

/// Aggregate counters over the whole cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteStatistics {
    pub total_quotes: usize,
    pub total_likes: u64,
    pub total_views: u64,
    pub average_likes: f64,
    pub average_views: f64,
}

impl QuoteStatistics {
    /// Aggregate over `quotes`; averages are 0 for an empty slice.
    pub fn from_quotes(quotes: &[Quote]) -> Self {
        let total_likes: u64 = quotes.iter().map(|q| q.likes).sum();
        let total_views: u64 = quotes.iter().map(|q| q.views).sum();
        let n = quotes.len();
        let (average_likes, average_views) = if n > 0 {
            (total_likes as f64 / n as f64, total_views as f64 / n as f64)
        } else {
            (0.0, 0.0)
        };
        Self {
            total_quotes: n,
            total_likes,
            total_views,
            average_likes,
            average_views,
        }
    }
}
