use std::fs;
use std::io::Cursor;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::Value;

use kaggle_datasets::app::{ImportOptions, Importer, ProgressEvent, ProgressSink};
use kaggle_datasets::catalog::{ByteStream, CatalogClient};
use kaggle_datasets::documents::WorkspaceDocuments;
use kaggle_datasets::domain::{CatalogEntry, Credential, FileEntry, ListQuery};
use kaggle_datasets::error::KaggleError;
use kaggle_datasets::storage::{ContentKind, FsStorage, SaveRequest, StorageSink};

struct FixtureCatalog;

impl CatalogClient for FixtureCatalog {
    fn probe(&self, _credential: &Credential) -> bool {
        true
    }

    fn list_datasets(&self, _credential: &Credential, _query: &ListQuery) -> Vec<CatalogEntry> {
        Vec::new()
    }

    fn list_dataset_files(&self, _credential: &Credential, _entry: &CatalogEntry) -> Vec<FileEntry> {
        vec![
            FileEntry {
                reference: "train.csv".to_string(),
                kind: ".csv".to_string(),
                size_bytes: 12,
            },
            FileEntry {
                reference: "images%2Fcat.png".to_string(),
                kind: ".png".to_string(),
                size_bytes: 4,
            },
            FileEntry {
                reference: "empty.txt".to_string(),
                kind: ".txt".to_string(),
                size_bytes: 0,
            },
        ]
    }

    fn download_dataset_file(
        &self,
        _credential: &Credential,
        _entry: &CatalogEntry,
        file: &FileEntry,
    ) -> Result<ByteStream, KaggleError> {
        let body: &[u8] = match file.reference.as_str() {
            "train.csv" => b"id,label\n1,0\n",
            "images%2Fcat.png" => &[0x89, b'P', b'N', b'G'],
            _ => b"",
        };
        Ok(Box::new(Cursor::new(body.to_vec())))
    }

    fn download_dataset(
        &self,
        _credential: &Credential,
        _entry: &CatalogEntry,
    ) -> Result<ByteStream, KaggleError> {
        Err(KaggleError::CatalogHttp("no archive".to_string()))
    }
}

struct Quiet;

impl ProgressSink for Quiet {
    fn event(&self, _event: ProgressEvent) {}
}

fn temp_root() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, root)
}

#[test]
fn import_into_local_directory() {
    let (_temp, root) = temp_root();
    let storage = FsStorage::new(root.clone());
    let importer = Importer::new(
        FixtureCatalog,
        &storage,
        Some(Credential::new("alice", "abc123")),
    );
    let documents = WorkspaceDocuments::new(&storage);
    let entry = CatalogEntry::from_ref("ownerA/ds1".parse().unwrap());

    let report = importer
        .import_dataset(&entry, &ImportOptions::default(), &documents, &Quiet)
        .unwrap();

    let dataset_dir = root.join("kaggle").join("ownerA").join("ds1");
    assert_eq!(report.destination, dataset_dir.to_string());
    assert_eq!(
        fs::read(dataset_dir.join("train.csv")).unwrap(),
        b"id,label\n1,0\n"
    );
    assert_eq!(
        fs::read(dataset_dir.join("images").join("cat.png")).unwrap(),
        vec![0x89, b'P', b'N', b'G']
    );
    assert_eq!(fs::read(dataset_dir.join("empty.txt")).unwrap(), b"");
    assert_eq!(report.partial_files().count(), 0);

    let notebook_path = root.join("work").join("Untitled.ipynb");
    let notebook: Value = serde_json::from_str(&fs::read_to_string(&notebook_path).unwrap()).unwrap();
    assert_eq!(notebook["nbformat"], 4);
    let listing = notebook["cells"][1]["source"][0].as_str().unwrap();
    assert_eq!(listing, format!("!ls -l -a {dataset_dir}"));
}

#[test]
fn nested_notebook_dir_is_created() {
    let (_temp, root) = temp_root();
    let storage = FsStorage::new(root.clone());
    let importer = Importer::new(
        FixtureCatalog,
        &storage,
        Some(Credential::new("alice", "abc123")),
    );
    let documents = WorkspaceDocuments::new(&storage);
    let entry = CatalogEntry::from_ref("ownerA/ds1".parse().unwrap());
    let options = ImportOptions {
        starter_notebook: true,
        notebook_dir: "notes/kaggle".to_string(),
    };

    let report = importer
        .import_dataset(&entry, &options, &documents, &Quiet)
        .unwrap();

    assert_eq!(report.notebook.as_deref(), Some("notes/kaggle/Untitled.ipynb"));
    assert!(root.join("notes/kaggle/Untitled.ipynb").is_file());
    assert!(root.join("kaggle/ownerA/ds1/train.csv").is_file());
}

#[test]
fn existing_dataset_folder_blocks_import() {
    let (_temp, root) = temp_root();
    fs::create_dir_all(root.join("kaggle").join("ownerA").join("ds1")).unwrap();
    let storage = FsStorage::new(root.clone());
    let importer = Importer::new(
        FixtureCatalog,
        &storage,
        Some(Credential::new("alice", "abc123")),
    );
    let documents = WorkspaceDocuments::new(&storage);
    let entry = CatalogEntry::from_ref("ownerA/ds1".parse().unwrap());

    assert_matches!(
        importer.import_dataset(&entry, &ImportOptions::default(), &documents, &Quiet),
        Err(KaggleError::AlreadyDownloaded(_))
    );
    assert!(!root.join("work").exists());
}

#[test]
fn notebook_save_writes_json() {
    let (_temp, root) = temp_root();
    let storage = FsStorage::new(root.clone());
    storage.save("work", &SaveRequest::directory()).unwrap();

    let model = storage
        .save(
            "work/demo.ipynb",
            &SaveRequest::notebook(serde_json::json!({"cells": [], "nbformat": 4})),
        )
        .unwrap();

    assert_eq!(model.kind, ContentKind::Notebook);
    assert_eq!(model.path, "work/demo.ipynb");
    let saved: Value =
        serde_json::from_str(&fs::read_to_string(root.join("work/demo.ipynb")).unwrap()).unwrap();
    assert_eq!(saved["nbformat"], 4);
}

#[test]
fn display_path_is_absolute() {
    let (_temp, root) = temp_root();
    let storage = FsStorage::new(root.clone());
    assert_eq!(
        storage.display_path("kaggle/ownerA/ds1"),
        root.join("kaggle/ownerA/ds1").to_string()
    );
}
