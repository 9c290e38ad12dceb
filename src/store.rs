use crate::error::StoreError;
use crate::models::{ArticleRecord, NewArticle, PublicationRecord};
use async_trait::async_trait;
use chrono::Utc;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// The durable store as the pipeline sees it. Every call is its own
/// transaction: it either commits in full or leaves the store unchanged.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Cheap readiness check.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Inserts each name; on conflict refreshes `updated_on` only. Returns
    /// `(name, id)` for every name whether it was inserted or updated.
    async fn upsert_publications(&self, names: &[String])
        -> Result<Vec<(String, Uuid)>, StoreError>;

    /// Plain bulk insert with no conflict handling. Returns rows inserted.
    async fn insert_articles(&self, rows: &[NewArticle]) -> Result<u64, StoreError>;
}

#[derive(Default)]
struct MemoryTables {
    publications: FxHashMap<String, PublicationRecord>,
    articles: Vec<ArticleRecord>,
    publication_batches: Vec<usize>,
    article_batches: Vec<usize>,
}

/// In-process repository with the same constraints as the relational schema
/// (unique publication name, article foreign key). Used for dry runs.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryTables> {
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn publications(&self) -> Vec<PublicationRecord> {
        let mut records: Vec<_> = self.lock().publications.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    pub fn publication(&self, name: &str) -> Option<PublicationRecord> {
        self.lock().publications.get(name).cloned()
    }

    pub fn articles(&self) -> Vec<ArticleRecord> {
        self.lock().articles.clone()
    }

    /// Size of each committed publication upsert, in commit order.
    pub fn publication_batches(&self) -> Vec<usize> {
        self.lock().publication_batches.clone()
    }

    /// Size of each committed article insert, in commit order.
    pub fn article_batches(&self) -> Vec<usize> {
        self.lock().article_batches.clone()
    }
}

#[async_trait]
impl Repository for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upsert_publications(
        &self,
        names: &[String],
    ) -> Result<Vec<(String, Uuid)>, StoreError> {
        let mut tables = self.lock();

        // Postgres refuses to touch the same row twice in one upsert.
        let mut batch = FxHashSet::default();
        for name in names {
            if !batch.insert(name.as_str()) {
                return Err(StoreError::Integrity(format!(
                    "publication {name:?} appears twice in one upsert"
                )));
            }
        }

        let now = Utc::now();
        let mut returned = Vec::with_capacity(names.len());
        for name in names {
            let record = tables
                .publications
                .entry(name.clone())
                .and_modify(|r| r.updated_on = now)
                .or_insert_with(|| PublicationRecord {
                    id: Uuid::new_v4(),
                    name: name.clone(),
                    created_on: now,
                    updated_on: now,
                });
            returned.push((record.name.clone(), record.id));
        }
        tables.publication_batches.push(names.len());
        Ok(returned)
    }

    async fn insert_articles(&self, rows: &[NewArticle]) -> Result<u64, StoreError> {
        let mut tables = self.lock();

        let known: FxHashSet<Uuid> = tables.publications.values().map(|p| p.id).collect();
        if let Some(orphan) = rows.iter().find(|r| !known.contains(&r.publication_id)) {
            return Err(StoreError::Integrity(format!(
                "article {:?} references unknown publication {}",
                orphan.url, orphan.publication_id
            )));
        }

        let now = Utc::now();
        tables.articles.extend(rows.iter().map(|r| ArticleRecord {
            id: Uuid::new_v4(),
            url: r.url.clone(),
            title: r.title.clone(),
            subtitle: r.subtitle.clone(),
            publication_id: r.publication_id,
            date_published: r.date_published,
            created_on: now,
            updated_on: now,
        }));
        tables.article_batches.push(rows.len());
        Ok(rows.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn article(url: &str, publication_id: Uuid) -> NewArticle {
        NewArticle {
            url: url.to_string(),
            title: format!("Title of {url}"),
            subtitle: None,
            publication_id,
            date_published: None,
        }
    }

    #[tokio::test]
    async fn upsert_returns_every_name() {
        let store = MemoryStore::new();
        let returned = store
            .upsert_publications(&names(&["Alpha", "Beta"]))
            .await
            .unwrap();
        assert_eq!(returned.len(), 2);
        assert_eq!(returned[0].0, "Alpha");
        assert_eq!(returned[1].0, "Beta");
        assert_eq!(store.publications().len(), 2);
    }

    #[tokio::test]
    async fn upsert_conflict_keeps_id_and_refreshes_updated_on() {
        let store = MemoryStore::new();
        let first = store.upsert_publications(&names(&["Alpha"])).await.unwrap();
        let before = store.publication("Alpha").unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.upsert_publications(&names(&["Alpha"])).await.unwrap();
        let after = store.publication("Alpha").unwrap();

        assert_eq!(first[0].1, second[0].1);
        assert_eq!(before.created_on, after.created_on);
        assert!(after.updated_on > before.updated_on);
        assert_eq!(store.publications().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_name_in_one_batch_rejected() {
        let store = MemoryStore::new();
        let result = store
            .upsert_publications(&names(&["Alpha", "Alpha"]))
            .await;
        assert!(matches!(result, Err(StoreError::Integrity(_))));
        assert!(store.publications().is_empty());
        assert!(store.publication_batches().is_empty());
    }

    #[tokio::test]
    async fn insert_enforces_foreign_key() {
        let store = MemoryStore::new();
        let pubs = store.upsert_publications(&names(&["Alpha"])).await.unwrap();
        let good = article("u1", pubs[0].1);
        let orphan = article("u2", Uuid::new_v4());

        let result = store.insert_articles(&[good.clone(), orphan]).await;
        assert!(matches!(result, Err(StoreError::Integrity(_))));
        assert!(store.articles().is_empty());

        assert_eq!(store.insert_articles(&[good]).await.unwrap(), 1);
        assert_eq!(store.articles().len(), 1);
        assert_eq!(store.article_batches(), vec![1]);
    }

    #[tokio::test]
    async fn insert_allows_duplicate_articles() {
        let store = MemoryStore::new();
        let pubs = store.upsert_publications(&names(&["Alpha"])).await.unwrap();
        let row = article("u1", pubs[0].1);
        store.insert_articles(&[row.clone()]).await.unwrap();
        store.insert_articles(&[row]).await.unwrap();

        let articles = store.articles();
        assert_eq!(articles.len(), 2);
        assert_ne!(articles[0].id, articles[1].id);
    }
}
