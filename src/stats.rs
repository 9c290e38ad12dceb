use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Counters for one run. Updated as chunks commit so that progress made
/// before a failure or timeout can still be reported.
#[derive(Default)]
pub struct RunStats {
    pub rows_staged: AtomicU64,
    pub invalid_dates: AtomicU64,
    pub publications_upserted: AtomicU64,
    pub publication_chunks: AtomicU64,
    pub articles_inserted: AtomicU64,
    pub article_chunks: AtomicU64,
    pub rows_excluded: AtomicU64,
    missing_names: Mutex<BTreeSet<String>>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rows_staged(&self, count: u64) {
        self.rows_staged.store(count, Ordering::Relaxed);
    }

    pub fn set_invalid_dates(&self, count: u64) {
        self.invalid_dates.store(count, Ordering::Relaxed);
    }

    pub fn add_publications(&self, count: u64) {
        self.publications_upserted
            .fetch_add(count, Ordering::Relaxed);
        self.publication_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_articles(&self, count: u64) {
        self.articles_inserted.fetch_add(count, Ordering::Relaxed);
        self.article_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_excluded(&self, count: u64) {
        self.rows_excluded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_missing<I>(&self, names: I)
    where
        I: IntoIterator<Item = String>,
    {
        match self.missing_names.lock() {
            Ok(mut set) => set.extend(names),
            Err(poisoned) => poisoned.into_inner().extend(names),
        }
    }

    pub fn rows_staged(&self) -> u64 {
        self.rows_staged.load(Ordering::Relaxed)
    }

    pub fn invalid_dates(&self) -> u64 {
        self.invalid_dates.load(Ordering::Relaxed)
    }

    pub fn publications(&self) -> u64 {
        self.publications_upserted.load(Ordering::Relaxed)
    }

    pub fn publication_chunks(&self) -> u64 {
        self.publication_chunks.load(Ordering::Relaxed)
    }

    pub fn articles(&self) -> u64 {
        self.articles_inserted.load(Ordering::Relaxed)
    }

    pub fn article_chunks(&self) -> u64 {
        self.article_chunks.load(Ordering::Relaxed)
    }

    pub fn excluded(&self) -> u64 {
        self.rows_excluded.load(Ordering::Relaxed)
    }

    pub fn missing_names(&self) -> BTreeSet<String> {
        match self.missing_names.lock() {
            Ok(set) => set.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
