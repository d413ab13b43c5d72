use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A discovered job listing, as produced by the search scrapers.
///
/// Fields this crate does not know about are kept in `extra` and written back
/// untouched, in their original order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Pending,
    Enriched,
    Failed,
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordStatus::Pending => write!(f, "pending"),
            RecordStatus::Enriched => write!(f, "enriched"),
            RecordStatus::Failed => write!(f, "failed"),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

impl JobRecord {
    pub fn new(
        title: impl Into<String>,
        company: impl Into<String>,
        location: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            company: company.into(),
            location: location.into(),
            url: url.into(),
            salary: None,
            description: None,
            posted_date: None,
            search_query: None,
            extra: Map::new(),
        }
    }

    pub fn has_url(&self) -> bool {
        !self.url.trim().is_empty()
    }

    pub fn description(&self) -> Option<&str> {
        non_blank(&self.description)
    }

    pub fn has_description(&self) -> bool {
        self.description().is_some()
    }

    /// Status is never stored on the record; `failed_this_run` comes from the
    /// run's failure log.
    pub fn status(&self, failed_this_run: bool) -> RecordStatus {
        if self.has_description() {
            RecordStatus::Enriched
        } else if failed_this_run {
            RecordStatus::Failed
        } else {
            RecordStatus::Pending
        }
    }

    /// Overlays the non-blank fields of `other` onto `self`.
    ///
    /// Blank or absent values in `other` never erase what is already here, so
    /// re-importing a bare listing keeps an earlier enrichment intact.
    pub fn merge_from(&mut self, other: JobRecord) {
        fn take(dst: &mut String, src: String) {
            if !src.trim().is_empty() {
                *dst = src;
            }
        }
        fn take_opt(dst: &mut Option<String>, src: Option<String>) {
            if let Some(v) = src.filter(|s| !s.trim().is_empty()) {
                *dst = Some(v);
            }
        }

        take(&mut self.title, other.title);
        take(&mut self.company, other.company);
        take(&mut self.location, other.location);
        take_opt(&mut self.salary, other.salary);
        take_opt(&mut self.description, other.description);
        take_opt(&mut self.posted_date, other.posted_date);
        take_opt(&mut self.search_query, other.search_query);

        for (key, value) in other.extra {
            if !value.is_null() {
                self.extra.insert(key, value);
            }
        }
    }
}
