use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::loader::Loader;
use crate::resolve::resolve_publications;
use crate::staging;
use crate::stats::RunStats;
use crate::store::Repository;
use crate::transform::transform;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    TimedOut,
}

/// Terminal result of a run. Counters reflect what committed before any
/// abort: a `Failed` or `TimedOut` run may have partially loaded the store.
#[derive(Debug, Serialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<PipelineError>,
    pub rows_staged: u64,
    pub publications_upserted: u64,
    pub articles_inserted: u64,
    pub rows_excluded: u64,
    pub missing_publication_names: BTreeSet<String>,
    pub invalid_dates: u64,
    pub elapsed_secs: f64,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

fn serialize_error<S: Serializer>(
    error: &Option<PipelineError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Runs stage, resolve, transform and load under one deadline.
pub struct Pipeline {
    config: PipelineConfig,
    repo: Arc<dyn Repository>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, repo: Arc<dyn Repository>) -> Self {
        Self { config, repo }
    }

    /// Never returns early with an error: every failure, including the
    /// deadline, is reported through the outcome.
    pub async fn run(&self, path: impl AsRef<Path>) -> RunOutcome {
        let start = Instant::now();
        let path = path.as_ref().to_path_buf();
        let stats = RunStats::new();

        info!(
            path = %path.display(),
            chunk_size = self.config.chunk_size.get(),
            deadline_secs = self.config.deadline.as_secs_f64(),
            "Starting pipeline run"
        );

        let result = tokio::time::timeout(self.config.deadline, self.execute(path, &stats)).await;
        let (status, error) = match result {
            Ok(Ok(())) => (RunStatus::Completed, None),
            Ok(Err(e)) => {
                error!(error = %e, "Pipeline run failed");
                (RunStatus::Failed, Some(e))
            }
            Err(_) => {
                warn!(
                    deadline_secs = self.config.deadline.as_secs_f64(),
                    "Pipeline run exceeded its deadline"
                );
                (
                    RunStatus::TimedOut,
                    Some(PipelineError::Timeout(self.config.deadline)),
                )
            }
        };

        let outcome = RunOutcome {
            status,
            error,
            rows_staged: stats.rows_staged(),
            publications_upserted: stats.publications(),
            articles_inserted: stats.articles(),
            rows_excluded: stats.excluded(),
            missing_publication_names: stats.missing_names(),
            invalid_dates: stats.invalid_dates(),
            elapsed_secs: start.elapsed().as_secs_f64(),
        };
        info!(
            status = ?outcome.status,
            publications = outcome.publications_upserted,
            articles = outcome.articles_inserted,
            excluded = outcome.rows_excluded,
            "Pipeline run finished"
        );
        outcome
    }

    async fn execute(&self, path: PathBuf, stats: &RunStats) -> Result<(), PipelineError> {
        // Staging and the repository readiness check are independent; both must
        // finish before resolution starts.
        let extract = async {
            let handle = tokio::task::spawn_blocking(move || staging::load(path)).await??;
            Ok::<_, PipelineError>(handle)
        };
        let ready = async { self.repo.ping().await.map_err(PipelineError::Store) };
        let (staging, ()) = tokio::try_join!(extract, ready)?;

        stats.set_rows_staged(staging.row_count() as u64);
        let invalid_dates = staging.invalid_dates()?;
        stats.set_invalid_dates(invalid_dates);
        if invalid_dates > 0 {
            warn!(rows = invalid_dates, "Unparseable dates stored as null");
        }

        let loader = Loader::new(self.repo.clone(), &self.config);
        let mapping = resolve_publications(&staging, &loader, stats).await?;

        let transformed = transform(&staging, &mapping)?;
        stats.add_excluded(transformed.excluded as u64);
        stats.record_missing(transformed.missing);

        loader.load_articles(&transformed.rows, stats).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn write_csv(contents: &str) -> NamedTempFile {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(contents.as_bytes()).unwrap();
        tmp.flush().unwrap();
        tmp
    }

    fn pipeline(store: Arc<MemoryStore>) -> Pipeline {
        let config = PipelineConfig::new(2, Duration::from_secs(10)).unwrap();
        Pipeline::new(config, store)
    }

    #[tokio::test]
    async fn missing_file_fails_run() {
        let store = Arc::new(MemoryStore::new());
        let outcome = pipeline(store.clone()).run("/definitely/not/here.csv").await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(matches!(outcome.error, Some(PipelineError::NotFound { .. })));
        assert!(store.publications().is_empty());
    }

    #[tokio::test]
    async fn empty_file_is_precondition_failure() {
        let csv = write_csv("url,title,publication\n");
        let store = Arc::new(MemoryStore::new());
        let outcome = pipeline(store.clone()).run(csv.path()).await;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(matches!(outcome.error, Some(PipelineError::Precondition)));
        assert!(store.articles().is_empty());
    }

    #[tokio::test]
    async fn outcome_serializes_error_as_message() {
        let store = Arc::new(MemoryStore::new());
        let outcome = pipeline(store).run("/definitely/not/here.csv").await;
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert!(json["error"]
            .as_str()
            .unwrap()
            .contains("/definitely/not/here.csv"));
        assert_eq!(json["articles_inserted"], 0);
    }

    #[tokio::test]
    async fn completed_run_counts() {
        let csv = write_csv(
            "url,title,publication,date\n\
             u1,t1,Alpha,2020-01-01\n\
             u2,t2,Beta,bad-date\n\
             u3,t3,Alpha,\n",
        );
        let store = Arc::new(MemoryStore::new());
        let outcome = pipeline(store.clone()).run(csv.path()).await;

        assert!(outcome.is_completed(), "{:?}", outcome.error);
        assert_eq!(outcome.rows_staged, 3);
        assert_eq!(outcome.publications_upserted, 2);
        assert_eq!(outcome.articles_inserted, 3);
        assert_eq!(outcome.invalid_dates, 1);
        assert!(outcome.missing_publication_names.is_empty());
        assert_eq!(store.articles().len(), 3);
    }
}
