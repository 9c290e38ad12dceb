use crate::config::PipelineConfig;
use crate::error::{PipelineError, StoreError};
use crate::models::{NewArticle, PublicationMapping};
use crate::stats::RunStats;
use crate::store::Repository;
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Writes rows to the repository in fixed-size chunks, one transaction per chunk.
///
/// Chunks that committed before a failure stay committed; the error carries
/// how far the load got.
pub struct Loader {
    repo: Arc<dyn Repository>,
    chunk_size: NonZeroUsize,
    max_parallel: usize,
    show_progress: bool,
}

impl Loader {
    pub fn new(repo: Arc<dyn Repository>, config: &PipelineConfig) -> Self {
        Self {
            repo,
            chunk_size: config.chunk_size,
            max_parallel: config.max_parallel_chunks.max(1),
            show_progress: config.show_progress,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size.get()
    }

    /// Upserts `names` chunk by chunk, in order, and returns the name to id
    /// mapping built from the rows the store returned. A name that comes back
    /// without an id is logged and left out; its articles are dropped later.
    pub async fn load_publications(
        &self,
        names: &[String],
        stats: &RunStats,
    ) -> Result<PublicationMapping, PipelineError> {
        let pb = self.progress_bar(chunk_count(names.len(), self.chunk_size), "Publications");
        let mut mapping = PublicationMapping::new();
        let mut upserted = 0u64;

        for (index, chunk) in names.chunks(self.chunk_size.get()).enumerate() {
            let returned = match self.repo.upsert_publications(chunk).await {
                Ok(returned) => returned,
                Err(source) => {
                    pb.abandon_with_message(format!("publications: chunk {index} failed"));
                    warn!(chunk = index, error = %source, "Publication upsert failed");
                    return Err(PipelineError::MappingIncomplete {
                        committed_chunks: index,
                        upserted,
                        source,
                    });
                }
            };

            let count = returned.len() as u64;
            for (name, id) in returned {
                mapping.insert(name, id);
            }
            upserted += count;
            stats.add_publications(count);
            pb.inc(1);
            debug!(chunk = index, rows = count, "Publication chunk committed");

            let unreturned: Vec<&str> = chunk
                .iter()
                .filter(|n| !mapping.contains(n))
                .map(String::as_str)
                .collect();
            if !unreturned.is_empty() {
                warn!(chunk = index, names = ?unreturned, "Upsert returned no id for some publications");
            }
        }

        pb.finish_with_message(format!("publications: {upserted} upserted"));
        Ok(mapping)
    }

    /// Inserts `rows` chunk by chunk with at most `max_parallel` chunks in
    /// flight. After the first failure no new chunk is started; chunks already
    /// in flight are awaited and counted.
    pub async fn load_articles(
        &self,
        rows: &[NewArticle],
        stats: &RunStats,
    ) -> Result<u64, PipelineError> {
        let total = chunk_count(rows.len(), self.chunk_size);
        let pb = self.progress_bar(total, "Articles");
        if rows.is_empty() {
            pb.finish_with_message("articles: nothing to load");
            return Ok(0);
        }

        let mut pending = rows.chunks(self.chunk_size.get());
        let mut in_flight = FuturesUnordered::new();
        let mut inserted = 0u64;
        let mut committed = 0usize;
        let mut first_error: Option<StoreError> = None;

        for chunk in pending.by_ref().take(self.max_parallel) {
            in_flight.push(self.repo.insert_articles(chunk));
        }

        while let Some(result) = in_flight.next().await {
            match result {
                Ok(count) => {
                    inserted += count;
                    committed += 1;
                    stats.add_articles(count);
                }
                Err(e) => {
                    warn!(error = %e, "Article chunk failed");
                    first_error.get_or_insert(e);
                }
            }
            pb.inc(1);

            if first_error.is_none() {
                if let Some(chunk) = pending.next() {
                    in_flight.push(self.repo.insert_articles(chunk));
                }
            }
        }

        if let Some(source) = first_error {
            pb.abandon_with_message(format!("articles: {inserted} inserted before failure"));
            return Err(PipelineError::Load {
                committed_chunks: committed,
                inserted,
                source,
            });
        }

        pb.finish_with_message(format!("articles: {inserted} inserted"));
        info!(inserted, chunks = committed, "Articles loaded");
        Ok(inserted)
    }

    fn progress_bar(&self, total: u64, label: &str) -> ProgressBar {
        if self.show_progress {
            make_progress_bar(total, label)
        } else {
            ProgressBar::hidden()
        }
    }
}

/// `ceil(len / chunk_size)`
pub fn chunk_count(len: usize, chunk_size: NonZeroUsize) -> u64 {
    len.div_ceil(chunk_size.get()) as u64
}

fn make_progress_bar(total: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let template =
        format!("    {{spinner:.cyan}} {label:<14} [{{bar:30.cyan/blue}}] {{pos}}/{{len}} chunks");
    match ProgressStyle::default_bar().template(&template) {
        Ok(style) => pb.set_style(style.progress_chars("=> ")),
        Err(e) => debug!(error = %e, "Invalid progress template, using default style"),
    }
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
