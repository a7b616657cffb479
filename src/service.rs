//! Quote orchestration: read-through caching over the upstream source.
//!
//! [`QuoteService`] owns handles to the repository, the upstream source
//! and the ranking engine. Repository and ranking calls are synchronous
//! and complete before any upstream `.await`.
//!
//! # Failure handling
//!
//! | Operation | Upstream failure |
//! |-----------|------------------|
//! | [`get_random_quote`](QuoteService::get_random_quote) | Falls back to a score-weighted pick from the cache; `NoQuotesAvailable` if the cache is empty |
//! | [`get_similar_quotes`](QuoteService::get_similar_quotes) | Backfill failure is logged and the cached results are returned |
//! | [`search_upstream`](QuoteService::search_upstream), [`fetch_by_author`](QuoteService::fetch_by_author) | Propagated |

use quote_relay_core::models::{
    ExternalQuote, Quote, QuoteFilters, QuoteStatistics, SimilarQuery, DEFAULT_SIMILAR_LIMIT,
};
use quote_relay_core::ranking::RankingEngine;
use quote_relay_core::store::QuoteRepository;
use std::sync::Arc;

use crate::error::ServiceError;
use crate::upstream::QuoteSource;

/// Default page size for top-rated and most-viewed listings.
pub const DEFAULT_TOP_LIMIT: usize = 10;
/// Number of quotes requested from upstream when backfilling similar quotes.
pub const SIMILAR_BACKFILL_LIMIT: usize = 5;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Clone)]
pub struct QuoteService {
    repository: Arc<dyn QuoteRepository>,
    source: Arc<dyn QuoteSource>,
    ranking: RankingEngine,
}

impl QuoteService {
    pub fn new(
        repository: Arc<dyn QuoteRepository>,
        source: Arc<dyn QuoteSource>,
        ranking: RankingEngine,
    ) -> Self {
        Self {
            repository,
            source,
            ranking,
        }
    }

    pub fn repository(&self) -> &Arc<dyn QuoteRepository> {
        &self.repository
    }

    pub fn source(&self) -> &Arc<dyn QuoteSource> {
        &self.source
    }

    /// Fetch a fresh quote from upstream, cache it, and count a view.
    ///
    /// When upstream fails for any reason, a cached quote is picked by
    /// score-weighted sampling instead.
    pub async fn get_random_quote(&self) -> ServiceResult<Quote> {
        match self.source.fetch_random_quote().await {
            Ok(external) => {
                let stored = self.cache(external)?;
                let viewed = self.repository.increment_views(&stored.id)?;
                Ok(viewed.unwrap_or(stored))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Upstream random quote failed, serving from cache");
                self.random_from_cache()
            }
        }
    }

    fn random_from_cache(&self) -> ServiceResult<Quote> {
        let cached = self.repository.find_all(None)?;
        let picked = self
            .ranking
            .select_weighted_random(&cached)
            .ok_or(ServiceError::NoQuotesAvailable)?;
        tracing::debug!(id = %picked.id, candidates = cached.len(), "Selected cached quote");

        let viewed = self.repository.increment_views(&picked.id)?;
        Ok(viewed.unwrap_or_else(|| picked.clone()))
    }

    /// Cached lookup. Does not count a view.
    pub fn get_quote_by_id(&self, id: &str) -> ServiceResult<Option<Quote>> {
        Ok(self.repository.find_by_id(id)?)
    }

    pub fn like_quote(&self, id: &str) -> ServiceResult<Option<Quote>> {
        let liked = self.repository.increment_likes(id)?;
        if let Some(q) = &liked {
            tracing::info!(id = %q.id, likes = q.likes, "Quote liked");
        }
        Ok(liked)
    }

    /// Cached quotes resembling `id`, best first.
    ///
    /// If the cache yields fewer than `limit` and the quote has tags,
    /// quotes sharing its first tag are pulled from upstream once and the
    /// query is repeated.
    pub async fn get_similar_quotes(
        &self,
        id: &str,
        limit: Option<usize>,
    ) -> ServiceResult<Vec<Quote>> {
        let quote = self
            .repository
            .find_by_id(id)?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))?;

        let query = SimilarQuery::like(&quote, limit.unwrap_or(DEFAULT_SIMILAR_LIMIT));
        let similar = self.repository.find_similar(&query)?;
        if similar.len() >= query.limit {
            return Ok(similar);
        }

        let Some(tag) = quote.tags.first() else {
            return Ok(similar);
        };

        match self
            .source
            .fetch_quotes_by_tag(tag, SIMILAR_BACKFILL_LIMIT)
            .await
        {
            Ok(fetched) => {
                tracing::debug!(id, tag = %tag, fetched = fetched.len(), "Backfilled similar quotes");
                self.cache_all(fetched)?;
                Ok(self.repository.find_similar(&query)?)
            }
            Err(e) => {
                tracing::warn!(id, tag = %tag, error = %e, "Failed to backfill similar quotes from upstream");
                Ok(similar)
            }
        }
    }

    /// Most-liked cached quotes, re-ordered by composite score.
    pub fn get_top_rated_quotes(&self, limit: Option<usize>) -> ServiceResult<Vec<Quote>> {
        let top = self
            .repository
            .top_rated(limit.unwrap_or(DEFAULT_TOP_LIMIT))?;
        Ok(self.ranking.rank_for_new_users(&top))
    }

    /// Most-viewed cached quotes, by raw view count.
    pub fn get_most_viewed_quotes(&self, limit: Option<usize>) -> ServiceResult<Vec<Quote>> {
        Ok(self
            .repository
            .most_viewed(limit.unwrap_or(DEFAULT_TOP_LIMIT))?)
    }

    pub fn get_all_quotes(&self, filters: Option<&QuoteFilters>) -> ServiceResult<Vec<Quote>> {
        Ok(self.repository.find_all(filters)?)
    }

    pub fn get_statistics(&self) -> ServiceResult<QuoteStatistics> {
        let quotes = self.repository.find_all(None)?;
        Ok(QuoteStatistics::from_quotes(&quotes))
    }

    /// Upstream full-text search. Results are cached before returning.
    pub async fn search_upstream(&self, query: &str, limit: usize) -> ServiceResult<Vec<Quote>> {
        let fetched = self.source.search_quotes(query, limit).await?;
        self.cache_all(fetched)
    }

    /// Upstream lookup by author. Results are cached before returning.
    pub async fn fetch_by_author(&self, author: &str, limit: usize) -> ServiceResult<Vec<Quote>> {
        let fetched = self.source.fetch_quotes_by_author(author, limit).await?;
        self.cache_all(fetched)
    }

    fn cache(&self, external: ExternalQuote) -> ServiceResult<Quote> {
        Ok(self.repository.save(external.into_quote())?)
    }

    fn cache_all(&self, fetched: Vec<ExternalQuote>) -> ServiceResult<Vec<Quote>> {
        fetched.into_iter().map(|eq| self.cache(eq)).collect()
    }
}
