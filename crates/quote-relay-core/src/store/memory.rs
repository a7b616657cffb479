//! In-memory [`QuoteRepository`] implementation.
//!
//! Quotes live in an insertion-ordered `Vec` with a `HashMap` id index,
//! behind a single `std::sync::RwLock`. Scans walk the `Vec`, so ties in
//! sorted results always resolve to insertion order. Nothing is persisted:
//! the cache is empty on every start.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use chrono::Utc;

use crate::models::{Quote, QuoteFilters, SimilarQuery};

use super::{similarity_score, QuoteRepository};

#[derive(Default)]
struct Inner {
    quotes: Vec<Quote>,
    index: HashMap<String, usize>,
}

impl Inner {
    fn get_mut(&mut self, id: &str) -> Option<&mut Quote> {
        let pos = *self.index.get(id)?;
        self.quotes.get_mut(pos)
    }

    fn sorted_by_key<F>(&self, limit: usize, key: F) -> Vec<Quote>
    where
        F: Fn(&Quote) -> u64,
    {
        let mut sorted: Vec<&Quote> = self.quotes.iter().collect();
        // `sort_by` is stable: equal keys keep insertion order.
        sorted.sort_by(|a, b| key(*b).cmp(&key(*a)));
        sorted.into_iter().take(limit).cloned().collect()
    }
}

/// Volatile, process-local quote cache.
pub struct InMemoryRepository {
    inner: RwLock<Inner>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| anyhow!("quote repository lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| anyhow!("quote repository lock poisoned"))
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteRepository for InMemoryRepository {
    fn save(&self, quote: Quote) -> Result<Quote> {
        let mut inner = self.write()?;
        if let Some(&pos) = inner.index.get(&quote.id) {
            return Ok(inner.quotes[pos].clone());
        }
        let pos = inner.quotes.len();
        inner.index.insert(quote.id.clone(), pos);
        inner.quotes.push(quote.clone());
        Ok(quote)
    }

    fn find_by_id(&self, id: &str) -> Result<Option<Quote>> {
        let inner = self.read()?;
        Ok(inner.index.get(id).map(|&pos| inner.quotes[pos].clone()))
    }

    fn find_all(&self, filters: Option<&QuoteFilters>) -> Result<Vec<Quote>> {
        let inner = self.read()?;
        let quotes = match filters {
            Some(f) if !f.is_empty() => inner
                .quotes
                .iter()
                .filter(|q| f.matches(q))
                .cloned()
                .collect(),
            _ => inner.quotes.clone(),
        };
        Ok(quotes)
    }

    fn find_similar(&self, query: &SimilarQuery) -> Result<Vec<Quote>> {
        let inner = self.read()?;
        let mut scored: Vec<(u32, &Quote)> = inner
            .quotes
            .iter()
            .filter(|q| query.exclude_id.as_deref() != Some(q.id.as_str()))
            .map(|q| (similarity_score(q, query), q))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(query.limit)
            .map(|(_, q)| q.clone())
            .collect())
    }

    fn increment_likes(&self, id: &str) -> Result<Option<Quote>> {
        let mut inner = self.write()?;
        Ok(inner.get_mut(id).map(|q| {
            q.likes += 1;
            q.clone()
        }))
    }

    fn increment_views(&self, id: &str) -> Result<Option<Quote>> {
        let mut inner = self.write()?;
        Ok(inner.get_mut(id).map(|q| {
            q.views += 1;
            let now = Utc::now();
            // Wall clocks can step backwards; the stamp must not.
            q.last_viewed_at = Some(match q.last_viewed_at {
                Some(prev) if prev > now => prev,
                _ => now,
            });
            q.clone()
        }))
    }

    fn top_rated(&self, limit: usize) -> Result<Vec<Quote>> {
        Ok(self.read()?.sorted_by_key(limit, |q| q.likes))
    }

    fn most_viewed(&self, limit: usize) -> Result<Vec<Quote>> {
        Ok(self.read()?.sorted_by_key(limit, |q| q.views))
    }

    fn count(&self) -> Result<usize> {
        Ok(self.read()?.quotes.len())
    }

    fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.read()?.index.contains_key(id))
    }

    fn clear(&self) -> Result<()> {
        let mut inner = self.write()?;
        inner.quotes.clear();
        inner.index.clear();
        Ok(())
    }
}
