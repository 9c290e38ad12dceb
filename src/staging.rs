use crate::error::PipelineError;
use crate::models::StagingRow;
use csv::ReaderBuilder;
use rustc_hash::FxHashSet;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const REQUIRED_COLUMNS: &[&str] = &["url", "title", "publication"];

/// A queryable holding area for the raw export.
///
/// Implementations are loaded once and are read-only afterwards. `release`
/// must make every later query fail with [`PipelineError::State`].
pub trait Staging: Send + Sync {
    /// Materializes the file's rows. Returns the number of rows staged.
    fn load_file(&mut self, path: &Path) -> Result<usize, PipelineError>;

    /// Distinct non-empty publication names, exact-match, in first-seen order.
    fn distinct_publications(&self) -> Result<Vec<String>, PipelineError>;

    fn rows(&self) -> Result<&[StagingRow], PipelineError>;

    fn release(&mut self);
}

/// In-memory staging backed by the `csv` reader.
#[derive(Default)]
pub struct MemoryStaging {
    rows: Option<Vec<StagingRow>>,
    publications: Vec<String>,
}

impl MemoryStaging {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Staging for MemoryStaging {
    fn load_file(&mut self, path: &Path) -> Result<usize, PipelineError> {
        let staging_err = |source| PipelineError::Staging {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(|e| staging_err(csv::Error::from(e)))?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_reader(BufReader::with_capacity(128 * 1024, file));

        let headers = reader.headers().map_err(staging_err)?.clone();
        for &column in REQUIRED_COLUMNS {
            if !headers.iter().any(|h| h == column) {
                return Err(PipelineError::MissingColumn {
                    path: path.to_path_buf(),
                    column,
                });
            }
        }

        let mut rows = Vec::new();
        let mut seen = FxHashSet::default();
        let mut publications = Vec::new();
        for result in reader.deserialize::<StagingRow>() {
            let row = result.map_err(staging_err)?;
            if !row.publication_name.is_empty() && seen.insert(row.publication_name.clone()) {
                publications.push(row.publication_name.clone());
            }
            rows.push(row);
        }

        let count = rows.len();
        self.rows = Some(rows);
        self.publications = publications;
        Ok(count)
    }

    fn distinct_publications(&self) -> Result<Vec<String>, PipelineError> {
        match self.rows {
            Some(_) => Ok(self.publications.clone()),
            None => Err(PipelineError::State(
                "no file is loaded into staging".to_string(),
            )),
        }
    }

    fn rows(&self) -> Result<&[StagingRow], PipelineError> {
        self.rows
            .as_deref()
            .ok_or_else(|| PipelineError::State("no file is loaded into staging".to_string()))
    }

    fn release(&mut self) {
        self.rows = None;
        self.publications = Vec::new();
    }
}

/// A loaded staging area. Released when dropped, on every exit path.
pub struct StagingHandle {
    inner: Box<dyn Staging>,
    path: PathBuf,
    row_count: usize,
}

impl StagingHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn rows(&self) -> Result<&[StagingRow], PipelineError> {
        self.inner.rows()
    }

    pub fn distinct_publications(&self) -> Result<Vec<String>, PipelineError> {
        self.inner.distinct_publications()
    }

    /// Rows with a non-empty date that could not be parsed.
    pub fn invalid_dates(&self) -> Result<u64, PipelineError> {
        let count = self
            .rows()?
            .iter()
            .filter(|r| {
                r.date_raw.as_deref().is_some_and(|d| !d.trim().is_empty())
                    && r.date_published().is_none()
            })
            .count();
        Ok(count as u64)
    }
}

impl Drop for StagingHandle {
    fn drop(&mut self) {
        self.inner.release();
        debug!(path = %self.path.display(), "Staging released");
    }
}

/// Stages `path` into a fresh [`MemoryStaging`].
pub fn load(path: impl AsRef<Path>) -> Result<StagingHandle, PipelineError> {
    load_into(path, Box::new(MemoryStaging::new()))
}

/// Stages `path` into the given backend. Fails with `NotFound` unless
/// `path` is an existing regular file.
pub fn load_into(
    path: impl AsRef<Path>,
    mut staging: Box<dyn Staging>,
) -> Result<StagingHandle, PipelineError> {
    let path = path.as_ref();
    let is_file = fs::metadata(path).map(|m| m.is_file()).unwrap_or(false);
    if !is_file {
        return Err(PipelineError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let row_count = staging.load_file(path)?;
    let handle = StagingHandle {
        inner: staging,
        path: path.to_path_buf(),
        row_count,
    };

    info!(
        path = %path.display(),
        rows = row_count,
        publications = handle.distinct_publications()?.len(),
        "Staged input file"
    );
    Ok(handle)
}
