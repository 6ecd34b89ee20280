use std::sync::Mutex;

use serde_json::Value;

use crate::domain::join_content_path;
use crate::error::KaggleError;
use crate::starter::empty_notebook;
use crate::storage::{ContentKind, ContentModel, SaveRequest, StorageSink, ensure_directory};

/// Document and navigation services of the workspace hosting the notebooks.
pub trait DocumentService {
    fn new_untitled(&self, directory: &str, kind: ContentKind) -> Result<ContentModel, KaggleError>;
    fn save_document(&self, path: &str, content: Value) -> Result<ContentModel, KaggleError>;
    fn open_or_reveal(&self, path: &str) -> Result<(), KaggleError>;
    fn execute_command(&self, command: &str, args: Value) -> Result<(), KaggleError>;
}

/// Document service on top of a content store. Revealing a document only
/// records it; a front end decides how to surface the recorded paths.
pub struct WorkspaceDocuments<S: StorageSink> {
    storage: S,
    revealed: Mutex<Vec<String>>,
}

impl<S: StorageSink> WorkspaceDocuments<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            revealed: Mutex::new(Vec::new()),
        }
    }

    pub fn revealed(&self) -> Vec<String> {
        self.revealed
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    fn free_path(&self, directory: &str, kind: ContentKind) -> Result<String, KaggleError> {
        let (stem, extension) = match kind {
            ContentKind::Notebook => ("Untitled", ".ipynb"),
            ContentKind::File => ("untitled", ".txt"),
            ContentKind::Directory => ("Untitled Folder", ""),
        };
        for index in 0u32.. {
            let name = if index == 0 {
                format!("{stem}{extension}")
            } else if kind == ContentKind::Directory {
                format!("{stem} {index}")
            } else {
                format!("{stem}{index}{extension}")
            };
            let path = join_content_path([directory, name.as_str()]);
            match self.storage.get(&path) {
                Ok(_) => continue,
                Err(err) if err.is_not_found() => return Ok(path),
                Err(err) => return Err(err),
            }
        }
        Err(KaggleError::Filesystem(format!(
            "no free untitled name in {directory}"
        )))
    }
}

impl<S: StorageSink> DocumentService for WorkspaceDocuments<S> {
    fn new_untitled(&self, directory: &str, kind: ContentKind) -> Result<ContentModel, KaggleError> {
        let mut prefix = String::new();
        for segment in directory.split('/').filter(|segment| !segment.is_empty()) {
            prefix = join_content_path([prefix.as_str(), segment]);
            ensure_directory(&self.storage, &prefix)?;
        }
        let path = self.free_path(directory, kind)?;
        let request = match kind {
            ContentKind::Notebook => SaveRequest::notebook(empty_notebook()),
            ContentKind::File => SaveRequest::text(""),
            ContentKind::Directory => SaveRequest::directory(),
        };
        self.storage.save(&path, &request)
    }

    fn save_document(&self, path: &str, content: Value) -> Result<ContentModel, KaggleError> {
        self.storage.save(path, &SaveRequest::notebook(content))
    }

    fn open_or_reveal(&self, path: &str) -> Result<(), KaggleError> {
        tracing::info!(path, "revealing document");
        match self.revealed.lock() {
            Ok(mut guard) => guard.push(path.to_string()),
            Err(poisoned) => poisoned.into_inner().push(path.to_string()),
        }
        Ok(())
    }

    fn execute_command(&self, command: &str, args: Value) -> Result<(), KaggleError> {
        tracing::debug!(command, %args, "workspace command");
        Ok(())
    }
}
