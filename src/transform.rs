use crate::error::PipelineError;
use crate::models::{NewArticle, PublicationMapping};
use crate::staging::StagingHandle;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Staged articles joined against the publication mapping.
#[derive(Debug, Default)]
pub struct Transformed {
    pub rows: Vec<NewArticle>,
    /// Publication names seen in staging with no mapping entry
    pub missing: BTreeSet<String>,
    /// Rows dropped because their publication was missing
    pub excluded: usize,
}

/// Replaces each row's publication name with its id. Rows whose name has no
/// mapping entry are dropped and the name is recorded; this is not an error.
pub fn transform(
    staging: &StagingHandle,
    mapping: &PublicationMapping,
) -> Result<Transformed, PipelineError> {
    if mapping.is_empty() {
        return Err(PipelineError::Precondition);
    }

    let staged = staging.rows()?;
    let mut out = Transformed {
        rows: Vec::with_capacity(staged.len()),
        ..Default::default()
    };

    for row in staged {
        let Some(publication_id) = mapping.get(&row.publication_name) else {
            out.missing.insert(row.publication_name.clone());
            out.excluded += 1;
            continue;
        };
        out.rows.push(NewArticle {
            url: row.url.clone(),
            title: row.title.clone(),
            subtitle: row.subtitle.clone(),
            publication_id,
            date_published: row.date_published(),
        });
    }

    if !out.missing.is_empty() {
        warn!(
            names = ?out.missing,
            excluded = out.excluded,
            "Articles dropped: publication not in mapping"
        );
    }
    info!(
        resolved = out.rows.len(),
        excluded = out.excluded,
        "Articles transformed"
    );
    Ok(out)
}
