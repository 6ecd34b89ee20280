use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kaggle_datasets::app::{ImportOptions, Importer, NOTEBOOK_DIR};
use kaggle_datasets::catalog::{CatalogClient, KaggleHttpClient};
use kaggle_datasets::config::{ConfigLoader, ResolvedConfig, SettingsStore, import_token_file};
use kaggle_datasets::documents::WorkspaceDocuments;
use kaggle_datasets::domain::{
    CatalogEntry, Credential, DatasetGroup, DatasetRef, FileType, License, ListQuery, SortBy,
};
use kaggle_datasets::error::KaggleError;
use kaggle_datasets::output::{AuthStatus, JsonOutput, OutputMode, TerminalOutput};
use kaggle_datasets::storage::{FsStorage, JupyterContentsStorage, StorageSink};

#[derive(Parser)]
#[command(name = "kgd")]
#[command(about = "Browse Kaggle datasets and download them into a notebook workspace")]
#[command(version)]
struct Cli {
    /// Print JSON instead of human-readable output.
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Workspace directory datasets are stored under (defaults to the home directory).
    #[arg(long, global = true)]
    root: Option<Utf8PathBuf>,

    /// Store datasets through a running Jupyter server instead of the local filesystem.
    #[arg(long, global = true)]
    jupyter_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Manage the Kaggle API credential")]
    Auth(AuthArgs),
    #[command(about = "Browse and download datasets")]
    Datasets(DatasetsArgs),
}

#[derive(Args)]
struct AuthArgs {
    #[command(subcommand)]
    command: AuthCommand,
}

#[derive(Subcommand)]
enum AuthCommand {
    #[command(about = "Show whether the stored credential is accepted")]
    Status,
    #[command(about = "Validate and store a username and API key")]
    Set {
        #[arg(long)]
        username: String,
        #[arg(long)]
        key: String,
    },
    #[command(about = "Validate and store the credential of a kaggle.json token file")]
    Import { path: PathBuf },
}

#[derive(Args)]
struct DatasetsArgs {
    #[command(subcommand)]
    command: DatasetsCommand,
}

#[derive(Subcommand)]
enum DatasetsCommand {
    #[command(about = "Search the dataset catalog")]
    List(ListArgs),
    #[command(about = "List the files of a dataset")]
    Files { reference: String },
    #[command(about = "Download a dataset and create a starter notebook")]
    Download(DownloadArgs),
}

#[derive(Args)]
struct ListArgs {
    #[arg(long)]
    page: Option<i64>,
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    group: Option<DatasetGroup>,
    #[arg(long)]
    sort_by: Option<SortBy>,
    #[arg(long)]
    file_type: Option<FileType>,
    #[arg(long)]
    license: Option<License>,
}

#[derive(Args)]
struct DownloadArgs {
    reference: String,

    /// Skip the starter notebook.
    #[arg(long)]
    no_notebook: bool,

    /// Download the whole dataset as a single archive.
    #[arg(long)]
    archive: bool,

    /// Folder the starter notebook is created in.
    #[arg(long, default_value = NOTEBOOK_DIR)]
    notebook_dir: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kaggle) = report.downcast_ref::<KaggleError>() {
            return ExitCode::from(map_exit_code(kaggle));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KaggleError) -> u8 {
    match error {
        KaggleError::NotInitialized
        | KaggleError::MissingCredential
        | KaggleError::AlreadyDownloaded(_)
        | KaggleError::InvalidDatasetRef(_)
        | KaggleError::InvalidTokenFile(_)
        | KaggleError::CredentialRejected(_) => 2,
        KaggleError::CatalogHttp(_)
        | KaggleError::CatalogStatus { .. }
        | KaggleError::InvalidRedirect(_)
        | KaggleError::StorageHttp(_)
        | KaggleError::StorageStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let settings = SettingsStore::new()?;
    let config = ConfigLoader::resolve(&settings)?;
    let catalog = KaggleHttpClient::with_base_url(&config.api_url)?;
    let storage = open_storage(&cli, &config)?;

    let importer = Importer::new(catalog, storage, config.credential.clone());

    match cli.command {
        Commands::Auth(args) => run_auth(args.command, importer, &settings, output_mode),
        Commands::Datasets(args) => {
            if config.credential.is_none() {
                return Err(KaggleError::MissingCredential.into());
            }
            run_datasets(args.command, importer, output_mode)
        }
    }
}

fn open_storage(cli: &Cli, config: &ResolvedConfig) -> miette::Result<Arc<dyn StorageSink>> {
    let jupyter_url = cli.jupyter_url.clone().or_else(|| config.jupyter_url.clone());
    if let Some(url) = jupyter_url {
        let storage = JupyterContentsStorage::new(&url, config.jupyter_token.clone())?;
        return Ok(Arc::new(storage));
    }
    let root = match cli.root.clone().or_else(|| config.storage_root.clone()) {
        Some(root) => root,
        None => FsStorage::default_root()?,
    };
    Ok(Arc::new(FsStorage::new(root)))
}

fn run_auth<C: CatalogClient>(
    command: AuthCommand,
    mut importer: Importer<C, Arc<dyn StorageSink>>,
    settings: &SettingsStore,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let candidate = match command {
        AuthCommand::Status => None,
        AuthCommand::Set { username, key } => Some(Credential::new(username, key)),
        AuthCommand::Import { path } => Some(import_token_file(&path)?),
    };

    if let Some(credential) = candidate {
        if !importer.change_credential(credential.clone()) {
            return Err(KaggleError::CredentialRejected(credential.identity).into());
        }
        settings.save_credential(&credential)?;
    }

    let status = AuthStatus {
        readiness: importer.readiness(),
        identity: importer.credential().map(|credential| credential.identity.clone()),
        settings_path: settings.path().display().to_string(),
    };
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_auth(&status).into_diagnostic(),
        OutputMode::Interactive => {
            TerminalOutput::print_auth(&status);
            Ok(())
        }
    }
}

fn run_datasets<C: CatalogClient>(
    command: DatasetsCommand,
    importer: Importer<C, Arc<dyn StorageSink>>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match command {
        DatasetsCommand::List(args) => {
            let query = ListQuery {
                page: args.page,
                search: args.search,
                group: args.group,
                sort_by: args.sort_by,
                file_type: args.file_type,
                license: args.license,
            };
            let entries = importer.list_datasets(&query)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_datasets(&entries).into_diagnostic(),
                OutputMode::Interactive => {
                    TerminalOutput::print_datasets(&entries);
                    Ok(())
                }
            }
        }
        DatasetsCommand::Files { reference } => {
            let entry = resolve_entry(&importer, &reference)?;
            let files = importer.list_dataset_files(&entry)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_files(&files).into_diagnostic(),
                OutputMode::Interactive => {
                    TerminalOutput::print_files(&files);
                    Ok(())
                }
            }
        }
        DatasetsCommand::Download(args) => run_download(args, importer, output_mode),
    }
}

fn run_download<C: CatalogClient>(
    args: DownloadArgs,
    importer: Importer<C, Arc<dyn StorageSink>>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let entry = resolve_entry(&importer, &args.reference)?;

    if args.archive {
        let outcome = importer.download_archive(&entry)?;
        return match output_mode {
            OutputMode::NonInteractive => JsonOutput::print_archive(&outcome).into_diagnostic(),
            OutputMode::Interactive => {
                TerminalOutput::print_archive(&outcome);
                Ok(())
            }
        };
    }

    let documents = WorkspaceDocuments::new(importer.storage().clone());
    let options = ImportOptions {
        starter_notebook: !args.no_notebook,
        notebook_dir: args.notebook_dir,
    };
    match output_mode {
        OutputMode::NonInteractive => {
            let report = importer
                .import_dataset(&entry, &options, &documents, &JsonOutput)?;
            JsonOutput::print_import(&report).into_diagnostic()
        }
        OutputMode::Interactive => {
            let report = importer
                .import_dataset(&entry, &options, &documents, &TerminalOutput)?;
            TerminalOutput::print_import(&report);
            Ok(())
        }
    }
}

/// Looks the dataset up in the catalog so downloads carry its metadata; a
/// dataset the search does not surface is still addressable by reference.
fn resolve_entry<C: CatalogClient>(
    importer: &Importer<C, Arc<dyn StorageSink>>,
    reference: &str,
) -> miette::Result<CatalogEntry> {
    let reference: DatasetRef = reference.parse()?;
    let query = ListQuery::default().with_search(reference.slug());
    let found = importer
        .list_datasets(&query)?
        .into_iter()
        .find(|entry| entry.reference == reference);
    Ok(found.unwrap_or_else(|| CatalogEntry::from_ref(reference)))
}
