use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;

use crate::catalog::{ByteStream, CatalogClient};
use crate::domain::{CatalogEntry, Credential, FileEntry, ListQuery, join_content_path};
use crate::documents::DocumentService;
use crate::encoding::encode_chunk;
use crate::error::KaggleError;
use crate::starter::starter_notebook;
use crate::storage::{ContentKind, SaveRequest, StorageSink, ensure_directory};

/// Folder of the content store that every dataset is downloaded under.
pub const ROOT_PATH: &str = "kaggle";
/// Folder that starter notebooks are created in.
pub const NOTEBOOK_DIR: &str = "work";

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    NotReady,
    Ready,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Result of persisting one file.
///
/// A transfer that breaks after the stream was opened is not an error of the
/// import: it is reported as `Partial`, and whatever was written stays on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Complete {
        path: String,
        chunks: u32,
        bytes: u64,
    },
    Partial {
        path: String,
        chunks: u32,
        bytes: u64,
        error: String,
    },
}

impl FileOutcome {
    pub fn path(&self) -> &str {
        match self {
            FileOutcome::Complete { path, .. } | FileOutcome::Partial { path, .. } => path,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, FileOutcome::Complete { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub reference: String,
    pub size_bytes: u64,
    pub outcome: FileOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub dataset: String,
    pub destination: String,
    pub files: Vec<FileReport>,
    pub notebook: Option<String>,
}

impl ImportReport {
    pub fn partial_files(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|file| !file.outcome.is_complete())
    }
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub starter_notebook: bool,
    pub notebook_dir: String,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            starter_notebook: true,
            notebook_dir: NOTEBOOK_DIR.to_string(),
        }
    }
}

/// Acquires datasets from a catalog into a content store.
///
/// Holds the credential and whether it was accepted by the catalog. Every
/// catalog operation fails with [`KaggleError::NotInitialized`] until a
/// credential has been probed successfully.
pub struct Importer<C: CatalogClient, S: StorageSink> {
    catalog: C,
    storage: S,
    root: String,
    credential: Option<Credential>,
    readiness: Readiness,
}

impl<C: CatalogClient, S: StorageSink> Importer<C, S> {
    /// Probes `credential` once; the importer starts `Ready` only if the
    /// catalog accepts it.
    pub fn new(catalog: C, storage: S, credential: Option<Credential>) -> Self {
        let mut importer = Self {
            catalog,
            storage,
            root: ROOT_PATH.to_string(),
            credential: None,
            readiness: Readiness::NotReady,
        };
        match credential {
            Some(credential) if credential.is_complete() => {
                if importer.catalog.probe(&credential) {
                    importer.credential = Some(credential);
                    importer.readiness = Readiness::Ready;
                } else {
                    tracing::warn!(identity = %credential.identity, "stored credential was rejected");
                }
            }
            Some(_) => tracing::debug!("stored credential is incomplete"),
            None => {}
        }
        importer
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Replaces the credential if the catalog accepts the new one. A rejected
    /// credential leaves the current credential and readiness untouched.
    pub fn change_credential(&mut self, credential: Credential) -> bool {
        if !credential.is_complete() || !self.catalog.probe(&credential) {
            tracing::warn!(identity = %credential.identity, "credential change rejected");
            return false;
        }
        tracing::info!(identity = %credential.identity, "credential accepted");
        self.credential = Some(credential);
        self.readiness = Readiness::Ready;
        true
    }

    fn ready_credential(&self) -> Result<&Credential, KaggleError> {
        match (&self.readiness, &self.credential) {
            (Readiness::Ready, Some(credential)) => Ok(credential),
            _ => Err(KaggleError::NotInitialized),
        }
    }

    pub fn list_datasets(&self, query: &ListQuery) -> Result<Vec<CatalogEntry>, KaggleError> {
        let credential = self.ready_credential()?;
        Ok(self.catalog.list_datasets(credential, query))
    }

    pub fn list_dataset_files(&self, entry: &CatalogEntry) -> Result<Vec<FileEntry>, KaggleError> {
        let credential = self.ready_credential()?;
        Ok(self.catalog.list_dataset_files(credential, entry))
    }

    pub fn owner_path(&self, entry: &CatalogEntry) -> String {
        join_content_path([self.root.as_str(), entry.reference.owner()])
    }

    pub fn dataset_path(&self, entry: &CatalogEntry) -> String {
        join_content_path([
            self.root.as_str(),
            entry.reference.owner(),
            entry.reference.slug(),
        ])
    }

    pub fn file_path(&self, entry: &CatalogEntry, file: &FileEntry) -> Result<String, KaggleError> {
        let segments = file.relative_segments()?;
        let dataset_path = self.dataset_path(entry);
        Ok(join_content_path(
            std::iter::once(dataset_path.as_str()).chain(segments.iter().map(String::as_str)),
        ))
    }

    /// Creates the folders of a dataset and returns its file manifest.
    ///
    /// The root and owner folders are created when absent. The dataset folder
    /// must not exist yet: a dataset is never downloaded twice.
    pub fn acquire_dataset(&self, entry: &CatalogEntry) -> Result<Vec<FileEntry>, KaggleError> {
        let credential = self.ready_credential()?;

        ensure_directory(&self.storage, &self.root)?;
        ensure_directory(&self.storage, &self.owner_path(entry))?;

        let dataset_path = self.dataset_path(entry);
        match self.storage.get(&dataset_path) {
            Ok(_) => return Err(KaggleError::AlreadyDownloaded(entry.reference.to_string())),
            Err(err) if err.is_not_found() => {
                tracing::info!(dataset = %entry.reference, path = %dataset_path, "creating dataset folder");
                self.storage.save(&dataset_path, &SaveRequest::directory())?;
            }
            Err(err) => return Err(err),
        }

        Ok(self.catalog.list_dataset_files(credential, entry))
    }

    /// Creates every intermediate folder that the given files live in,
    /// parents first.
    pub fn prepare_file_folders(
        &self,
        entry: &CatalogEntry,
        files: &[FileEntry],
    ) -> Result<(), KaggleError> {
        self.ready_credential()?;
        for file in files {
            self.ensure_file_parents(entry, file)?;
        }
        Ok(())
    }

    fn ensure_file_parents(&self, entry: &CatalogEntry, file: &FileEntry) -> Result<(), KaggleError> {
        let segments = file.relative_segments()?;
        let mut directory = self.dataset_path(entry);
        for segment in &segments[..segments.len().saturating_sub(1)] {
            directory = join_content_path([directory.as_str(), segment.as_str()]);
            ensure_directory(&self.storage, &directory)?;
        }
        Ok(())
    }

    /// Streams one file of the dataset into the content store.
    ///
    /// Failing to open the download is an error. Once bytes flow, a read or
    /// write failure ends the transfer with [`FileOutcome::Partial`].
    pub fn download_file(
        &self,
        entry: &CatalogEntry,
        file: &FileEntry,
    ) -> Result<FileOutcome, KaggleError> {
        let credential = self.ready_credential()?;
        self.ensure_file_parents(entry, file)?;
        let path = self.file_path(entry, file)?;

        tracing::info!(dataset = %entry.reference, file = %file.reference, "downloading file");
        let stream = self.catalog.download_dataset_file(credential, entry, file)?;
        Ok(self.persist_stream(&path, stream))
    }

    /// Downloads the whole dataset as one archive next to the dataset folder.
    pub fn download_archive(&self, entry: &CatalogEntry) -> Result<FileOutcome, KaggleError> {
        let credential = self.ready_credential()?;
        ensure_directory(&self.storage, &self.root)?;
        ensure_directory(&self.storage, &self.owner_path(entry))?;

        let path = format!("{}.zip", self.dataset_path(entry));
        match self.storage.get(&path) {
            Ok(_) => return Err(KaggleError::AlreadyDownloaded(entry.reference.to_string())),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        tracing::info!(dataset = %entry.reference, "downloading dataset archive");
        let stream = self.catalog.download_dataset(credential, entry)?;
        Ok(self.persist_stream(&path, stream))
    }

    fn persist_stream(&self, path: &str, mut stream: ByteStream) -> FileOutcome {
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut chunks = 0u32;
        let mut bytes = 0u64;
        loop {
            let read = match stream.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::warn!(path, chunks, error = %err, "download stream failed");
                    return FileOutcome::Partial {
                        path: path.to_string(),
                        chunks,
                        bytes,
                        error: err.to_string(),
                    };
                }
            };
            chunks += 1;
            let request = SaveRequest::base64_chunk(encode_chunk(&buffer[..read]), i64::from(chunks));
            if let Err(err) = self.storage.save(path, &request) {
                tracing::warn!(path, chunk = chunks, error = %err, "failed to persist chunk");
                return FileOutcome::Partial {
                    path: path.to_string(),
                    chunks: chunks - 1,
                    bytes,
                    error: err.to_string(),
                };
            }
            bytes += read as u64;
        }

        if chunks == 0 {
            if let Err(err) = self.storage.save(path, &SaveRequest::text("")) {
                tracing::warn!(path, error = %err, "failed to create empty file");
                return FileOutcome::Partial {
                    path: path.to_string(),
                    chunks,
                    bytes,
                    error: err.to_string(),
                };
            }
        }

        tracing::debug!(path, chunks, bytes, "file stored");
        FileOutcome::Complete {
            path: path.to_string(),
            chunks,
            bytes,
        }
    }

    /// Saves a notebook pointing at the dataset folder and reveals it.
    pub fn create_starter_artifact(
        &self,
        entry: &CatalogEntry,
        documents: &dyn DocumentService,
        directory: &str,
    ) -> Result<String, KaggleError> {
        let dataset_path = self.storage.display_path(&self.dataset_path(entry));
        let untitled = documents.new_untitled(directory, ContentKind::Notebook)?;
        let saved = documents.save_document(&untitled.path, starter_notebook(entry, &dataset_path))?;

        documents.open_or_reveal(&saved.path)?;
        documents.execute_command("filebrowser:activate", json!({ "path": saved.path }))?;
        documents.execute_command("filebrowser:go-to-path", json!({ "path": saved.path }))?;
        Ok(saved.path)
    }

    /// Full import of one dataset: folders, every file in manifest order, then
    /// the starter notebook. A file whose download cannot be opened aborts the
    /// import.
    pub fn import_dataset(
        &self,
        entry: &CatalogEntry,
        options: &ImportOptions,
        documents: &dyn DocumentService,
        sink: &dyn ProgressSink,
    ) -> Result<ImportReport, KaggleError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; dataset {}", entry.reference),
            elapsed: None,
        });
        let files = self.acquire_dataset(entry)?;

        sink.event(ProgressEvent {
            message: format!("phase=Prepare; {} file(s)", files.len()),
            elapsed: None,
        });
        self.prepare_file_folders(entry, &files)?;

        let total = files.len();
        let mut reports = Vec::with_capacity(total);
        for (index, file) in files.into_iter().enumerate() {
            sink.event(ProgressEvent {
                message: format!("phase=Fetch; {} ({}/{total})", file.reference, index + 1),
                elapsed: None,
            });
            let start = Instant::now();
            let outcome = self.download_file(entry, &file)?;
            let message = match &outcome {
                FileOutcome::Complete { bytes, .. } => {
                    format!("phase=Store; {} stored ({bytes} bytes)", file.reference)
                }
                FileOutcome::Partial { error, .. } => {
                    format!("phase=Store; {} incomplete: {error}", file.reference)
                }
            };
            sink.event(ProgressEvent {
                message,
                elapsed: Some(start.elapsed()),
            });
            reports.push(FileReport {
                reference: file.reference,
                size_bytes: file.size_bytes,
                outcome,
            });
        }

        let notebook = if options.starter_notebook {
            sink.event(ProgressEvent {
                message: "phase=Store; creating starter notebook".to_string(),
                elapsed: None,
            });
            Some(self.create_starter_artifact(entry, documents, &options.notebook_dir)?)
        } else {
            None
        };

        Ok(ImportReport {
            dataset: entry.reference.to_string(),
            destination: self.storage.display_path(&self.dataset_path(entry)),
            files: reports,
            notebook,
        })
    }
}
