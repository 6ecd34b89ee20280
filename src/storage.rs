use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use directories::BaseDirs;
use reqwest::Url;
use reqwest::blocking::{Client, Response};
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::join_content_path;
use crate::encoding::decode_chunk;
use crate::error::KaggleError;
use crate::http::{build_client, send_with_retries};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Directory,
    File,
    Notebook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    Text,
    Base64,
    Json,
}

/// Metadata of one entry of the content store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentModel {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ContentKind,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub last_modified: Option<String>,
}

/// Body of a save. `chunk` follows the Jupyter contents convention: `1`
/// starts a file, larger values append, `-1` appends the final chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveRequest {
    #[serde(rename = "type")]
    pub kind: ContentKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ContentFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<i64>,
}

impl SaveRequest {
    pub fn directory() -> Self {
        Self {
            kind: ContentKind::Directory,
            format: None,
            content: None,
            chunk: None,
        }
    }

    pub fn base64_chunk(encoded: String, chunk: i64) -> Self {
        Self {
            kind: ContentKind::File,
            format: Some(ContentFormat::Base64),
            content: Some(Value::String(encoded)),
            chunk: Some(chunk),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::File,
            format: Some(ContentFormat::Text),
            content: Some(Value::String(content.into())),
            chunk: None,
        }
    }

    pub fn notebook(content: Value) -> Self {
        Self {
            kind: ContentKind::Notebook,
            format: Some(ContentFormat::Json),
            content: Some(content),
            chunk: None,
        }
    }
}

/// Hierarchical content store that datasets are persisted into.
///
/// `get` must fail with [`KaggleError::StorageNotFound`] for a missing path;
/// callers treat that as the only signal that something needs creating.
pub trait StorageSink {
    fn get(&self, path: &str) -> Result<ContentModel, KaggleError>;
    fn save(&self, path: &str, request: &SaveRequest) -> Result<ContentModel, KaggleError>;

    /// How a stored path reads to the user, e.g. inside a generated notebook.
    fn display_path(&self, path: &str) -> String {
        format!("~/{path}")
    }
}

impl<T: StorageSink + ?Sized> StorageSink for &T {
    fn get(&self, path: &str) -> Result<ContentModel, KaggleError> {
        (**self).get(path)
    }

    fn save(&self, path: &str, request: &SaveRequest) -> Result<ContentModel, KaggleError> {
        (**self).save(path, request)
    }

    fn display_path(&self, path: &str) -> String {
        (**self).display_path(path)
    }
}

impl<T: StorageSink + ?Sized> StorageSink for Arc<T> {
    fn get(&self, path: &str) -> Result<ContentModel, KaggleError> {
        (**self).get(path)
    }

    fn save(&self, path: &str, request: &SaveRequest) -> Result<ContentModel, KaggleError> {
        (**self).save(path, request)
    }

    fn display_path(&self, path: &str) -> String {
        (**self).display_path(path)
    }
}

/// Creates `path` as a directory unless it already exists. Returns whether a
/// directory was created.
pub fn ensure_directory<S: StorageSink + ?Sized>(storage: &S, path: &str) -> Result<bool, KaggleError> {
    match storage.get(path) {
        Ok(_) => Ok(false),
        Err(err) if err.is_not_found() => {
            tracing::info!(path, "creating folder");
            storage.save(path, &SaveRequest::directory())?;
            Ok(true)
        }
        Err(err) => Err(err),
    }
}

/// Content store backed by a local directory.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: Utf8PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The user's home directory, which is where a notebook server keeps its
    /// contents by default.
    pub fn default_root() -> Result<Utf8PathBuf, KaggleError> {
        BaseDirs::new()
            .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.home_dir().to_path_buf()).ok())
            .ok_or_else(|| KaggleError::Filesystem("unable to resolve home directory".to_string()))
    }

    pub fn resolve(&self, path: &str) -> Result<Utf8PathBuf, KaggleError> {
        let mut resolved = self.root.clone();
        for segment in path.split('/').filter(|segment| !segment.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(KaggleError::Filesystem(format!(
                    "path escapes storage root: {path}"
                )));
            }
            resolved.push(segment);
        }
        Ok(resolved)
    }

    fn model(&self, path: &str, target: &Utf8Path) -> Result<ContentModel, KaggleError> {
        let metadata = fs::metadata(target.as_std_path()).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                KaggleError::StorageNotFound(path.to_string())
            } else {
                KaggleError::Filesystem(format!("stat {target}: {err}"))
            }
        })?;
        let kind = if metadata.is_dir() {
            ContentKind::Directory
        } else if target.extension() == Some("ipynb") {
            ContentKind::Notebook
        } else {
            ContentKind::File
        };
        let last_modified = metadata
            .modified()
            .ok()
            .map(|time| DateTime::<Utc>::from(time).to_rfc3339());
        Ok(ContentModel {
            name: target.file_name().unwrap_or_default().to_string(),
            path: join_content_path(path.split('/')),
            kind,
            size: (!metadata.is_dir()).then(|| metadata.len()),
            last_modified,
        })
    }

    fn file_bytes(request: &SaveRequest) -> Result<Vec<u8>, KaggleError> {
        let Some(content) = &request.content else {
            return Ok(Vec::new());
        };
        match (request.format, content) {
            (Some(ContentFormat::Base64), Value::String(text)) => decode_chunk(text)
                .map_err(|err| KaggleError::Filesystem(format!("invalid base64 content: {err}"))),
            (_, Value::String(text)) => Ok(text.as_bytes().to_vec()),
            (_, other) => serde_json::to_vec_pretty(other)
                .map_err(|err| KaggleError::Filesystem(err.to_string())),
        }
    }
}

impl StorageSink for FsStorage {
    fn get(&self, path: &str) -> Result<ContentModel, KaggleError> {
        let target = self.resolve(path)?;
        self.model(path, &target)
    }

    fn save(&self, path: &str, request: &SaveRequest) -> Result<ContentModel, KaggleError> {
        let target = self.resolve(path)?;
        match request.kind {
            ContentKind::Directory => {
                if !target.as_std_path().is_dir() {
                    fs::create_dir(target.as_std_path())
                        .map_err(|err| KaggleError::Filesystem(format!("mkdir {target}: {err}")))?;
                }
            }
            ContentKind::File | ContentKind::Notebook => {
                let bytes = Self::file_bytes(request)?;
                match request.chunk {
                    None | Some(1) => fs::write(target.as_std_path(), &bytes)
                        .map_err(|err| KaggleError::Filesystem(format!("write {target}: {err}")))?,
                    Some(_) => {
                        let mut file = OpenOptions::new()
                            .append(true)
                            .open(target.as_std_path())
                            .map_err(|err| {
                                KaggleError::Filesystem(format!("append {target}: {err}"))
                            })?;
                        file.write_all(&bytes).map_err(|err| {
                            KaggleError::Filesystem(format!("append {target}: {err}"))
                        })?;
                    }
                }
            }
        }
        self.model(path, &target)
    }

    fn display_path(&self, path: &str) -> String {
        match self.resolve(path) {
            Ok(resolved) => resolved.to_string(),
            Err(_) => format!("{}/{path}", self.root),
        }
    }
}

/// Content store of a running Jupyter server, reached over its REST API.
#[derive(Clone)]
pub struct JupyterContentsStorage {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl JupyterContentsStorage {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, KaggleError> {
        let base_url = Url::parse(base_url)
            .map_err(|err| KaggleError::StorageHttp(format!("invalid server url {base_url}: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(KaggleError::StorageHttp(format!(
                "invalid server url {base_url}"
            )));
        }
        Ok(Self {
            client: build_client(Some(Duration::from_secs(60)), KaggleError::StorageHttp)?,
            base_url,
            token: token.filter(|value| !value.trim().is_empty()),
        })
    }

    pub fn contents_url(&self, path: &str) -> Result<Url, KaggleError> {
        let mut url = self.base_url.clone();
        url.set_query(None);
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| KaggleError::StorageHttp(format!("invalid server url {}", self.base_url)))?;
            segments.pop_if_empty();
            segments.extend(["api", "contents"]);
            segments.extend(path.split('/').filter(|segment| !segment.is_empty()));
        }
        Ok(url)
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("token {token}")),
            None => request,
        }
    }

    fn handle_status(path: &str, response: Response) -> Result<Response, KaggleError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status.as_u16() == 404 {
            return Err(KaggleError::StorageNotFound(path.to_string()));
        }
        let message = response
            .text()
            .unwrap_or_else(|_| "contents request failed".to_string());
        Err(KaggleError::StorageStatus {
            status: status.as_u16(),
            message,
        })
    }
}

impl StorageSink for JupyterContentsStorage {
    fn get(&self, path: &str) -> Result<ContentModel, KaggleError> {
        let mut url = self.contents_url(path)?;
        url.query_pairs_mut().append_pair("content", "0");
        let response = send_with_retries(
            || self.authorize(self.client.get(url.clone())),
            KaggleError::StorageHttp,
        )?;
        Self::handle_status(path, response)?
            .json()
            .map_err(|err| KaggleError::StorageHttp(err.to_string()))
    }

    fn save(&self, path: &str, request: &SaveRequest) -> Result<ContentModel, KaggleError> {
        let url = self.contents_url(path)?;
        // Not retried: a repeated append would duplicate the chunk.
        let response = self
            .authorize(self.client.put(url).json(request))
            .send()
            .map_err(|err| KaggleError::StorageHttp(err.to_string()))?;
        Self::handle_status(path, response)?
            .json()
            .map_err(|err| KaggleError::StorageHttp(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::encoding::encode_chunk;

    fn temp_storage() -> (tempfile::TempDir, FsStorage) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        (temp, FsStorage::new(root))
    }

    #[test]
    fn missing_path_is_not_found() {
        let (_temp, storage) = temp_storage();
        assert_matches!(storage.get("kaggle"), Err(KaggleError::StorageNotFound(_)));
    }

    #[test]
    fn ensure_directory_creates_once() {
        let (_temp, storage) = temp_storage();
        assert!(ensure_directory(&storage, "kaggle").unwrap());
        assert!(!ensure_directory(&storage, "kaggle").unwrap());
        assert_eq!(storage.get("kaggle").unwrap().kind, ContentKind::Directory);
    }

    #[test]
    fn directory_save_requires_parent() {
        let (_temp, storage) = temp_storage();
        assert_matches!(
            storage.save("a/b", &SaveRequest::directory()),
            Err(KaggleError::Filesystem(_))
        );
    }

    #[test]
    fn chunks_append_in_order() {
        let (_temp, storage) = temp_storage();
        storage
            .save("data.bin", &SaveRequest::base64_chunk(encode_chunk(b"hello "), 1))
            .unwrap();
        storage
            .save("data.bin", &SaveRequest::base64_chunk(encode_chunk(b"world"), 2))
            .unwrap();
        let model = storage
            .save("data.bin", &SaveRequest::base64_chunk(encode_chunk(b"!"), -1))
            .unwrap();

        assert_eq!(model.size, Some(12));
        let content = fs::read(storage.resolve("data.bin").unwrap()).unwrap();
        assert_eq!(content, b"hello world!");
    }

    #[test]
    fn first_chunk_truncates() {
        let (_temp, storage) = temp_storage();
        storage.save("a.txt", &SaveRequest::text("old content")).unwrap();
        storage
            .save("a.txt", &SaveRequest::base64_chunk(encode_chunk(b"new"), 1))
            .unwrap();
        let content = fs::read_to_string(storage.resolve("a.txt").unwrap()).unwrap();
        assert_eq!(content, "new");
    }

    #[test]
    fn resolve_rejects_parent_segments() {
        let (_temp, storage) = temp_storage();
        assert_matches!(storage.resolve("kaggle/../.."), Err(KaggleError::Filesystem(_)));
    }

    #[test]
    fn contents_url_encodes_segments() {
        let storage = JupyterContentsStorage::new("http://localhost:8888/user/me/", None).unwrap();
        let url = storage.contents_url("kaggle/owner/my file.csv").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8888/user/me/api/contents/kaggle/owner/my%20file.csv"
        );
    }
}
