use std::collections::BTreeSet;
use std::io::Read;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Url;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::domain::{CatalogEntry, Credential, FileEntry, ListQuery};
use crate::error::KaggleError;
use crate::http::{build_client, send_with_retries};

pub const KAGGLE_API_URL: &str = "https://www.kaggle.com/api/v1/";

/// Body of a downloaded file, consumed incrementally.
pub type ByteStream = Box<dyn Read + Send>;

/// Remote dataset catalog.
///
/// Probing and listing are advisory reads: failures are logged and degrade to
/// `false` or an empty list. Downloads return errors, since a failed download
/// has to stop the acquisition of the dataset.
pub trait CatalogClient {
    fn probe(&self, credential: &Credential) -> bool;
    fn list_datasets(&self, credential: &Credential, query: &ListQuery) -> Vec<CatalogEntry>;
    fn list_dataset_files(&self, credential: &Credential, entry: &CatalogEntry) -> Vec<FileEntry>;
    fn download_dataset_file(
        &self,
        credential: &Credential,
        entry: &CatalogEntry,
        file: &FileEntry,
    ) -> Result<ByteStream, KaggleError>;
    fn download_dataset(
        &self,
        credential: &Credential,
        entry: &CatalogEntry,
    ) -> Result<ByteStream, KaggleError>;
}

#[derive(Clone)]
pub struct KaggleHttpClient {
    api: Client,
    transfer: Client,
    base_url: Url,
}

impl KaggleHttpClient {
    pub fn new() -> Result<Self, KaggleError> {
        Self::with_base_url(KAGGLE_API_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, KaggleError> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized)
            .map_err(|err| KaggleError::CatalogHttp(format!("invalid API url {base_url}: {err}")))?;
        Ok(Self {
            api: build_client(Some(Duration::from_secs(60)), KaggleError::CatalogHttp)?,
            transfer: build_client(None, KaggleError::CatalogHttp)?,
            base_url,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, KaggleError> {
        self.base_url
            .join(path)
            .map_err(|err| KaggleError::CatalogHttp(format!("invalid endpoint {path}: {err}")))
    }

    /// Endpoint for one file: archives come from the packaged endpoint, every
    /// other kind from the raw one. Reference segments are escaped, so `?`
    /// or `#` in a file name stay part of the path.
    pub fn file_download_url(
        &self,
        entry: &CatalogEntry,
        file: &FileEntry,
    ) -> Result<Url, KaggleError> {
        let prefix = if file.is_archive() {
            "datasets/download"
        } else {
            "datasets/download-raw"
        };
        let segments = file.relative_segments()?;
        let mut url = self.endpoint(prefix)?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| KaggleError::CatalogHttp(format!("invalid API url {}", self.base_url)))?;
            path.pop_if_empty()
                .push(entry.reference.owner())
                .push(entry.reference.slug())
                .extend(&segments);
        }
        url.query_pairs_mut().append_pair("noRedirect", "true");
        Ok(url)
    }

    fn handle_status(response: Response) -> Result<Response, KaggleError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "Kaggle request failed".to_string());
        Err(KaggleError::CatalogStatus { status, message })
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        credential: &Credential,
        url: &Url,
    ) -> Result<T, KaggleError> {
        let response = send_with_retries(
            || {
                self.api
                    .get(url.clone())
                    .basic_auth(&credential.identity, Some(&credential.secret))
            },
            KaggleError::CatalogHttp,
        )?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| KaggleError::CatalogHttp(err.to_string()))
    }

    /// Asks for the signed location of a download and streams it without
    /// credentials.
    fn follow_download(&self, credential: &Credential, url: Url) -> Result<ByteStream, KaggleError> {
        tracing::debug!(endpoint = %url.path(), "requesting download location");
        let location: String = self.get_json(credential, &url)?;
        let target = Url::parse(location.trim())
            .map_err(|_| KaggleError::InvalidRedirect(location.clone()))?;
        let response = send_with_retries(
            || self.transfer.get(target.clone()),
            KaggleError::CatalogHttp,
        )?;
        let response = Self::handle_status(response)?;
        Ok(Box::new(response))
    }
}

impl CatalogClient for KaggleHttpClient {
    fn probe(&self, credential: &Credential) -> bool {
        let url = match self.endpoint("hello") {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!(error = %err, "probe endpoint unavailable");
                return false;
            }
        };
        let response = self
            .api
            .get(url)
            .basic_auth(&credential.identity, Some(&credential.secret))
            .send();
        match response {
            Ok(response) if response.status().as_u16() < 300 => true,
            Ok(response) => {
                tracing::warn!(
                    identity = %credential.identity,
                    status = response.status().as_u16(),
                    "credential rejected"
                );
                false
            }
            Err(err) => {
                tracing::warn!(error = %err, "credential probe failed");
                false
            }
        }
    }

    fn list_datasets(&self, credential: &Credential, query: &ListQuery) -> Vec<CatalogEntry> {
        let result = self.endpoint("datasets/list").and_then(|mut url| {
            let pairs = query.to_pairs();
            if !pairs.is_empty() {
                let mut serializer = url.query_pairs_mut();
                for (key, value) in &pairs {
                    serializer.append_pair(key, value);
                }
            }
            self.get_json::<Vec<RawDataset>>(credential, &url)
        });
        match result {
            Ok(raw) => raw.into_iter().filter_map(RawDataset::into_entry).collect(),
            Err(err) => {
                tracing::warn!(error = %err, "dataset listing failed");
                Vec::new()
            }
        }
    }

    fn list_dataset_files(&self, credential: &Credential, entry: &CatalogEntry) -> Vec<FileEntry> {
        let result = self
            .endpoint(&format!("datasets/list/{}", entry.reference))
            .and_then(|url| self.get_json::<RawFileListing>(credential, &url));
        match result {
            Ok(listing) => {
                if let Some(message) = listing.error_message.as_deref().filter(|m| !m.is_empty()) {
                    tracing::warn!(dataset = %entry.reference, detail = message, "file listing reported an error");
                }
                listing
                    .dataset_files
                    .into_iter()
                    .map(FileEntry::from)
                    .collect()
            }
            Err(err) => {
                tracing::warn!(dataset = %entry.reference, error = %err, "file listing failed");
                Vec::new()
            }
        }
    }

    fn download_dataset_file(
        &self,
        credential: &Credential,
        entry: &CatalogEntry,
        file: &FileEntry,
    ) -> Result<ByteStream, KaggleError> {
        let url = self.file_download_url(entry, file)?;
        self.follow_download(credential, url)
    }

    fn download_dataset(
        &self,
        credential: &Credential,
        entry: &CatalogEntry,
    ) -> Result<ByteStream, KaggleError> {
        let mut url = self.endpoint(&format!("datasets/download/{}", entry.reference))?;
        url.query_pairs_mut().append_pair("noRedirect", "true");
        self.follow_download(credential, url)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDataset {
    #[serde(rename = "ref")]
    reference: String,
    #[serde(default)]
    owner_ref: Option<String>,
    #[serde(default)]
    owner_name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    subtitle: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    total_bytes: Option<u64>,
    #[serde(default)]
    last_updated: Option<String>,
    #[serde(default)]
    usability_rating: Option<f64>,
    #[serde(default)]
    tags: Vec<RawTag>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    license_name: Option<String>,
    #[serde(default)]
    download_count: Option<u64>,
    #[serde(default)]
    vote_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawTag {
    #[serde(default, rename = "ref")]
    reference: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl RawDataset {
    fn into_entry(self) -> Option<CatalogEntry> {
        let reference = match self.reference.parse() {
            Ok(reference) => reference,
            Err(err) => {
                tracing::warn!(error = %err, "skipping catalog entry");
                return None;
            }
        };
        let mut entry = CatalogEntry::from_ref(reference);
        if let Some(owner) = self.owner_ref.filter(|value| !value.is_empty()) {
            entry.owner_identity = owner;
        }
        entry.owner_display_name = self
            .owner_name
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| entry.owner_identity.clone());
        if let Some(title) = self.title {
            entry.title = title;
        }
        entry.subtitle = self.subtitle.unwrap_or_default();
        entry.description = self.description.unwrap_or_default();
        entry.total_size_bytes = self.total_bytes.unwrap_or(0);
        entry.last_updated = self.last_updated.as_deref().and_then(parse_timestamp);
        entry.usability_score = self.usability_rating.unwrap_or(0.0);
        entry.tags = self
            .tags
            .into_iter()
            .filter_map(|tag| tag.name.or(tag.reference))
            .collect::<BTreeSet<_>>();
        if let Some(url) = self.url.filter(|value| !value.is_empty()) {
            entry.url = url;
        }
        entry.license_name = self.license_name;
        entry.download_count = self.download_count.unwrap_or(0);
        entry.vote_count = self.vote_count.unwrap_or(0);
        Some(entry)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFileListing {
    #[serde(default)]
    dataset_files: Vec<RawFile>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFile {
    #[serde(rename = "ref")]
    reference: String,
    #[serde(default)]
    file_type: Option<String>,
    #[serde(default)]
    total_bytes: Option<u64>,
}

impl From<RawFile> for FileEntry {
    fn from(value: RawFile) -> Self {
        Self {
            reference: value.reference,
            kind: value.file_type.unwrap_or_default(),
            size_bytes: value.total_bytes.unwrap_or(0),
        }
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|value| value.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|value| value.and_utc())
        })
}
