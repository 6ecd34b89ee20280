use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::KaggleError;

/// Kaggle username and API key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub identity: String,
    pub secret: String,
}

impl Credential {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.identity.trim().is_empty() && !self.secret.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// `owner/slug` reference of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatasetRef {
    owner: String,
    slug: String,
}

impl DatasetRef {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.slug)
    }
}

impl FromStr for DatasetRef {
    type Err = KaggleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim().trim_matches('/');
        let (owner, slug) = trimmed
            .split_once('/')
            .ok_or_else(|| KaggleError::InvalidDatasetRef(value.to_string()))?;
        if !is_ref_segment(owner) || !is_ref_segment(slug) {
            return Err(KaggleError::InvalidDatasetRef(value.to_string()));
        }
        Ok(Self {
            owner: owner.to_string(),
            slug: slug.to_string(),
        })
    }
}

impl TryFrom<String> for DatasetRef {
    type Error = KaggleError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DatasetRef> for String {
    fn from(value: DatasetRef) -> Self {
        value.to_string()
    }
}

fn is_ref_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
}

/// Dataset metadata as returned by the catalog listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub reference: DatasetRef,
    pub owner_identity: String,
    pub owner_display_name: String,
    pub title: String,
    pub subtitle: String,
    pub description: String,
    pub total_size_bytes: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub usability_score: f64,
    pub tags: BTreeSet<String>,
    pub url: String,
    pub license_name: Option<String>,
    pub download_count: u64,
    pub vote_count: u64,
}

impl CatalogEntry {
    /// Minimal entry for a dataset known only by its reference.
    pub fn from_ref(reference: DatasetRef) -> Self {
        let owner = reference.owner().to_string();
        let title = reference.slug().to_string();
        let url = format!("https://www.kaggle.com/datasets/{reference}");
        Self {
            reference,
            owner_identity: owner.clone(),
            owner_display_name: owner,
            title,
            subtitle: String::new(),
            description: String::new(),
            total_size_bytes: 0,
            last_updated: None,
            usability_score: 0.0,
            tags: BTreeSet::new(),
            url,
            license_name: None,
            download_count: 0,
            vote_count: 0,
        }
    }

    pub fn owner_url(&self) -> String {
        format!("https://www.kaggle.com/{}", self.owner_identity)
    }
}

/// One file of a dataset manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub reference: String,
    pub kind: String,
    pub size_bytes: u64,
}

impl FileEntry {
    pub fn is_archive(&self) -> bool {
        self.kind.trim_start_matches('.').eq_ignore_ascii_case("zip")
    }

    /// Percent-decoded path segments of the file reference.
    pub fn relative_segments(&self) -> Result<Vec<String>, KaggleError> {
        let decoded = urlencoding::decode(&self.reference)
            .map_err(|_| KaggleError::InvalidFileRef(self.reference.clone()))?;
        let decoded = decoded.replace('\\', "/");
        let segments = decoded
            .split('/')
            .map(|segment| segment.to_string())
            .collect::<Vec<_>>();
        let valid = segments
            .iter()
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
        if !valid {
            return Err(KaggleError::InvalidFileRef(self.reference.clone()));
        }
        Ok(segments)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum SortBy {
    Hottest,
    Votes,
    Updated,
    Active,
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortBy::Hottest => write!(f, "hottest"),
            SortBy::Votes => write!(f, "votes"),
            SortBy::Updated => write!(f, "updated"),
            SortBy::Active => write!(f, "active"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum DatasetGroup {
    Public,
    My,
    MyPrivate,
    Updated,
}

impl fmt::Display for DatasetGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetGroup::Public => write!(f, "public"),
            DatasetGroup::My => write!(f, "my"),
            DatasetGroup::MyPrivate => write!(f, "myPrivate"),
            DatasetGroup::Updated => write!(f, "updated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum FileType {
    All,
    Csv,
    Sqlite,
    Json,
    BigQuery,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::All => write!(f, "all"),
            FileType::Csv => write!(f, "csv"),
            FileType::Sqlite => write!(f, "sqlite"),
            FileType::Json => write!(f, "json"),
            FileType::BigQuery => write!(f, "bigQuery"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum License {
    All,
    Cc,
    Gpl,
    Odb,
    Other,
}

impl fmt::Display for License {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            License::All => write!(f, "all"),
            License::Cc => write!(f, "cc"),
            License::Gpl => write!(f, "gpl"),
            License::Odb => write!(f, "odb"),
            License::Other => write!(f, "other"),
        }
    }
}

/// Filters for a catalog listing. Unset fields are left out of the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub search: Option<String>,
    pub group: Option<DatasetGroup>,
    pub sort_by: Option<SortBy>,
    pub file_type: Option<FileType>,
    pub license: Option<License>,
}

impl ListQuery {
    pub fn page(page: i64) -> Self {
        Self {
            page: Some(page),
            ..Self::default()
        }
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Query parameters in request order.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(search) = self.search.as_deref().filter(|value| !value.is_empty()) {
            pairs.push(("search", search.to_string()));
        }
        if let Some(page) = self.page {
            pairs.push(("page", page.max(1).to_string()));
        }
        if let Some(group) = self.group {
            pairs.push(("group", group.to_string()));
        }
        if let Some(sort_by) = self.sort_by {
            pairs.push(("sortBy", sort_by.to_string()));
        }
        if let Some(file_type) = self.file_type {
            pairs.push(("filetype", file_type.to_string()));
        }
        if let Some(license) = self.license {
            pairs.push(("license", license.to_string()));
        }
        pairs
    }
}

/// Joins content-store path segments with forward slashes.
pub fn join_content_path<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    segments
        .into_iter()
        .map(|segment| segment.as_ref().trim_matches('/').to_string())
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
