use std::fs;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::catalog::KAGGLE_API_URL;
use crate::domain::Credential;
use crate::error::KaggleError;

/// Key the credential record is stored under in the settings file. Serde
/// attributes only take literals, so `Settings` repeats it; the
/// `credential_key_matches_field_name` test keeps the two in step.
pub const CREDENTIAL_KEY: &str = "kaggle-datasets:credential";

#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(
        rename = "kaggle-datasets:credential",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub credential: Option<Credential>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jupyter_url: Option<String>,
}

/// Settings after environment overrides are applied.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub credential: Option<Credential>,
    pub api_url: String,
    pub storage_root: Option<Utf8PathBuf>,
    pub jupyter_url: Option<String>,
    pub jupyter_token: Option<String>,
}

pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new() -> Result<Self, KaggleError> {
        let dirs = ProjectDirs::from("", "", "kaggle-datasets").ok_or_else(|| {
            KaggleError::Filesystem("unable to resolve config directory".to_string())
        })?;
        Ok(Self {
            path: dirs.config_dir().join("settings.json"),
        })
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing settings read as defaults.
    pub fn load(&self) -> Result<Settings, KaggleError> {
        if !self.path.exists() {
            return Ok(Settings::default());
        }
        let content = fs::read_to_string(&self.path)
            .map_err(|_| KaggleError::ConfigRead(self.path.clone()))?;
        serde_json::from_str(&content).map_err(|err| KaggleError::ConfigParse(err.to_string()))
    }

    pub fn save(&self, settings: &Settings) -> Result<(), KaggleError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| KaggleError::Filesystem(err.to_string()))?;
        }
        let content = serde_json::to_vec_pretty(settings)
            .map_err(|err| KaggleError::Filesystem(err.to_string()))?;
        let tmp_path = self.path.with_extension("json.tmp");
        write_private(&tmp_path, &content)?;
        fs::rename(&tmp_path, &self.path).map_err(|err| KaggleError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn save_credential(&self, credential: &Credential) -> Result<(), KaggleError> {
        let mut settings = self.load()?;
        settings.credential = Some(credential.clone());
        self.save(&settings)
    }
}

/// Writes `content` to a file that is owner-only before any byte lands in it.
#[cfg(unix)]
fn write_private(path: &Path, content: &[u8]) -> Result<(), KaggleError> {
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|err| KaggleError::Filesystem(err.to_string()))?;
    // `mode` only applies on creation; a stale tmp file keeps its old bits.
    file.set_permissions(fs::Permissions::from_mode(0o600))
        .map_err(|err| KaggleError::Filesystem(err.to_string()))?;
    file.write_all(content)
        .map_err(|err| KaggleError::Filesystem(err.to_string()))
}

#[cfg(not(unix))]
fn write_private(path: &Path, content: &[u8]) -> Result<(), KaggleError> {
    fs::write(path, content).map_err(|err| KaggleError::Filesystem(err.to_string()))
}

#[derive(Debug, Deserialize)]
struct TokenFile {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    key: Option<String>,
}

/// Parses a `kaggle.json` API token.
pub fn parse_token(content: &str) -> Result<Credential, KaggleError> {
    let token: TokenFile = serde_json::from_str(content)
        .map_err(|err| KaggleError::InvalidTokenFile(err.to_string()))?;
    match (token.username, token.key) {
        (Some(username), Some(key)) if !username.is_empty() && !key.is_empty() => {
            Ok(Credential::new(username, key))
        }
        _ => Err(KaggleError::InvalidTokenFile(
            "expected non-empty \"username\" and \"key\"".to_string(),
        )),
    }
}

pub fn import_token_file(path: &Path) -> Result<Credential, KaggleError> {
    let content =
        fs::read_to_string(path).map_err(|_| KaggleError::ConfigRead(path.to_path_buf()))?;
    parse_token(&content)
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(store: &SettingsStore) -> Result<ResolvedConfig, KaggleError> {
        let settings = store.load()?;
        Ok(Self::resolve_settings(settings, |name| std::env::var(name).ok()))
    }

    /// `KAGGLE_USERNAME`/`KAGGLE_KEY`, `KAGGLE_API_URL` and `JUPYTER_TOKEN`
    /// take precedence over stored settings.
    pub fn resolve_settings<F>(settings: Settings, env: F) -> ResolvedConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| env(name).filter(|value| !value.trim().is_empty());

        let credential = match (lookup("KAGGLE_USERNAME"), lookup("KAGGLE_KEY")) {
            (Some(username), Some(key)) => Some(Credential::new(username, key)),
            _ => settings.credential,
        };

        ResolvedConfig {
            credential,
            api_url: lookup("KAGGLE_API_URL")
                .or(settings.api_url)
                .unwrap_or_else(|| KAGGLE_API_URL.to_string()),
            storage_root: settings.storage_root.map(Utf8PathBuf::from),
            jupyter_url: settings.jupyter_url,
            jupyter_token: lookup("JUPYTER_TOKEN"),
        }
    }
}
