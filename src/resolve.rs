use crate::error::PipelineError;
use crate::loader::Loader;
use crate::models::PublicationMapping;
use crate::staging::StagingHandle;
use crate::stats::RunStats;
use tracing::info;

/// Upserts every distinct publication name in staging and returns the
/// name to id mapping.
///
/// Names are matched exactly (case and whitespace sensitive). Each chunk is
/// committed on its own; if a later chunk fails the earlier ones stay in
/// the store and the error is `MappingIncomplete`.
pub async fn resolve_publications(
    staging: &StagingHandle,
    loader: &Loader,
    stats: &RunStats,
) -> Result<PublicationMapping, PipelineError> {
    let names = staging.distinct_publications()?;
    info!(
        publications = names.len(),
        chunk_size = loader.chunk_size(),
        "Resolving publications"
    );

    let mapping = loader.load_publications(&names, stats).await?;

    info!(mapping = mapping.len(), "Publication mapping complete");
    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::staging;
    use crate::store::MemoryStore;
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn staged(contents: &str) -> (NamedTempFile, StagingHandle) {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(contents.as_bytes()).unwrap();
        tmp.flush().unwrap();
        let handle = staging::load(tmp.path()).unwrap();
        (tmp, handle)
    }

    fn loader(store: Arc<MemoryStore>, chunk_size: usize) -> Loader {
        let config = PipelineConfig::new(chunk_size, Duration::from_secs(5)).unwrap();
        Loader::new(store, &config)
    }

    #[tokio::test]
    async fn one_entry_per_distinct_name() {
        let (_tmp, handle) = staged(
            "url,title,publication\n\
             u1,t1,Alpha\n\
             u2,t2,Beta\n\
             u3,t3,Alpha\n\
             u4,t4,ALPHA\n",
        );
        let store = Arc::new(MemoryStore::new());
        let mapping = resolve_publications(&handle, &loader(store.clone(), 2), &RunStats::new())
            .await
            .unwrap();

        assert_eq!(mapping.len(), 3);
        assert!(mapping.contains("ALPHA"));
        assert_eq!(store.publications().len(), 3);
    }

    #[tokio::test]
    async fn rerun_keeps_ids() {
        let (_tmp, handle) = staged("url,title,publication\nu1,t1,Alpha\nu2,t2,Beta\n");
        let store = Arc::new(MemoryStore::new());
        let loader = loader(store.clone(), 1);

        let first = resolve_publications(&handle, &loader, &RunStats::new())
            .await
            .unwrap();
        let second = resolve_publications(&handle, &loader, &RunStats::new())
            .await
            .unwrap();

        for (name, id) in first.iter() {
            assert_eq!(second.get(name), Some(id));
        }
        assert_eq!(store.publications().len(), 2);
    }

    #[tokio::test]
    async fn empty_publication_not_upserted() {
        let (_tmp, handle) = staged("url,title,publication\nu1,t1,\nu2,t2,Alpha\n");
        let store = Arc::new(MemoryStore::new());
        let mapping = resolve_publications(&handle, &loader(store, 10), &RunStats::new())
            .await
            .unwrap();
        assert_eq!(mapping.len(), 1);
        assert!(!mapping.contains(""));
    }
}
