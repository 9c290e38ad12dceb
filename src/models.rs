use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row of the input export as held in staging.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StagingRow {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    /// Raw publication name; exact string, no trimming or case folding
    #[serde(rename = "publication")]
    pub publication_name: String,
    #[serde(rename = "date", default)]
    pub date_raw: Option<String>,
}

impl StagingRow {
    /// Parsed publication date. `None` when the field is empty or unparseable.
    pub fn date_published(&self) -> Option<DateTime<Utc>> {
        self.date_raw.as_deref().and_then(parse_date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicationRecord {
    pub id: Uuid,
    pub name: String,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleRecord {
    pub id: Uuid,
    pub url: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub publication_id: Uuid,
    pub date_published: Option<DateTime<Utc>>,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
}

/// An article row whose publication name has been replaced by its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewArticle {
    pub url: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub publication_id: Uuid,
    pub date_published: Option<DateTime<Utc>>,
}

/// Publication name to surrogate id, built once per run.
#[derive(Debug, Default, Clone)]
pub struct PublicationMapping {
    ids: FxHashMap<String, Uuid>,
}

impl PublicationMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, name: String, id: Uuid) {
        self.ids.insert(name, id);
    }

    pub fn get(&self, name: &str) -> Option<Uuid> {
        self.ids.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ids.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Uuid)> {
        self.ids.iter().map(|(name, id)| (name.as_str(), *id))
    }
}

impl FromIterator<(String, Uuid)> for PublicationMapping {
    fn from_iter<I: IntoIterator<Item = (String, Uuid)>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) and bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parse_bare_date_is_midnight_utc() {
        let dt = parse_date("2019-05-30").unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2019, 5, 30));
        assert_eq!(dt.hour(), 0);
    }

    #[test]
    fn parse_rfc3339_normalises_offset() {
        let dt = parse_date("2021-03-01T10:00:00+02:00").unwrap();
        assert_eq!(dt.hour(), 8);
    }

    #[test]
    fn parse_space_separated_timestamp() {
        let dt = parse_date("2020-01-02 03:04:05").unwrap();
        assert_eq!((dt.hour(), dt.minute(), dt.second()), (3, 4, 5));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_date("last tuesday"), None);
        assert_eq!(parse_date("   "), None);
        assert_eq!(parse_date("2020-13-40"), None);
    }

    #[test]
    fn mapping_lookup_is_exact() {
        let id = Uuid::new_v4();
        let mapping: PublicationMapping = [("Alpha".to_string(), id)].into_iter().collect();
        assert_eq!(mapping.get("Alpha"), Some(id));
        assert_eq!(mapping.get("alpha"), None);
        assert_eq!(mapping.get("Alpha "), None);
        assert_eq!(mapping.len(), 1);
        assert!(!mapping.is_empty());
    }

    #[test]
    fn staging_row_date_accessor() {
        let row = StagingRow {
            url: "https://example.com/a".to_string(),
            title: "A".to_string(),
            subtitle: None,
            publication_name: "Alpha".to_string(),
            date_raw: Some("not a date".to_string()),
        };
        assert_eq!(row.date_published(), None);
    }
}
