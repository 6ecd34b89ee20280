use std::io::{self, Write};

use crossterm::style::Stylize;
use serde::Serialize;

use crate::app::{FileOutcome, ImportReport, ProgressEvent, ProgressSink, Readiness};
use crate::domain::{CatalogEntry, FileEntry};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthStatus {
    pub readiness: Readiness,
    pub identity: Option<String>,
    pub settings_path: String,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_datasets(entries: &[CatalogEntry]) -> io::Result<()> {
        Self::print_json(&entries)
    }

    pub fn print_files(files: &[FileEntry]) -> io::Result<()> {
        Self::print_json(&files)
    }

    pub fn print_import(report: &ImportReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_archive(outcome: &FileOutcome) -> io::Result<()> {
        Self::print_json(outcome)
    }

    pub fn print_auth(status: &AuthStatus) -> io::Result<()> {
        Self::print_json(status)
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Human-readable rendering for terminals.
pub struct TerminalOutput;

impl TerminalOutput {
    pub fn print_datasets(entries: &[CatalogEntry]) {
        if entries.is_empty() {
            println!("{}", "No datasets found.".yellow());
            return;
        }
        for entry in entries {
            println!("{} {}", "•".cyan(), entry.title.as_str().bold());
            println!(
                "  {}  by {}  {}  usability {:.2}",
                entry.reference.to_string().cyan(),
                entry.owner_display_name,
                format_size(entry.total_size_bytes),
                entry.usability_score
            );
            if let Some(updated) = entry.last_updated {
                println!("  updated {}", updated.format("%Y-%m-%d"));
            }
            if !entry.tags.is_empty() {
                let tags = entry.tags.iter().cloned().collect::<Vec<_>>().join(", ");
                println!("  tags: {}", tags.dark_grey());
            }
        }
    }

    pub fn print_files(files: &[FileEntry]) {
        if files.is_empty() {
            println!("{}", "No files listed.".yellow());
            return;
        }
        for file in files {
            println!(
                "{} {} ({}, {})",
                "•".cyan(),
                file.reference,
                if file.kind.is_empty() { "?" } else { file.kind.as_str() },
                format_size(file.size_bytes)
            );
        }
    }

    pub fn print_import(report: &ImportReport) {
        let partial = report.partial_files().count();
        println!("{}", format!("Dataset {}", report.dataset).cyan());
        println!("  destination: {}", report.destination);
        for file in &report.files {
            match &file.outcome {
                FileOutcome::Complete { bytes, .. } => println!(
                    "  {} {} ({})",
                    "✔".green(),
                    file.reference,
                    format_size(*bytes)
                ),
                FileOutcome::Partial { bytes, error, .. } => println!(
                    "  {} {} incomplete after {}: {}",
                    "✘".red(),
                    file.reference,
                    format_size(*bytes),
                    error
                ),
            }
        }
        if let Some(notebook) = &report.notebook {
            println!("  notebook: {notebook}");
        }
        if partial > 0 {
            println!(
                "{}",
                format!("{partial} file(s) were not downloaded completely").yellow()
            );
        } else {
            println!("{}", format!("{} file(s) downloaded", report.files.len()).green());
        }
    }

    pub fn print_archive(outcome: &FileOutcome) {
        let path = outcome.path();
        match outcome {
            FileOutcome::Complete { bytes, .. } => {
                println!("{} {path} ({})", "✔".green(), format_size(*bytes))
            }
            FileOutcome::Partial { error, .. } => {
                println!("{} {path} incomplete: {error}", "✘".red())
            }
        }
    }

    pub fn print_auth(status: &AuthStatus) {
        match (status.readiness, &status.identity) {
            (Readiness::Ready, Some(identity)) => {
                println!("{} authenticated as {identity}", "✔".green())
            }
            _ => println!("{} not authenticated", "✘".red()),
        }
        println!("  settings: {}", status.settings_path);
    }
}

impl ProgressSink for TerminalOutput {
    fn event(&self, event: ProgressEvent) {
        let message = match event.elapsed {
            Some(elapsed) => format!("{} [{} ms]", event.message, elapsed.as_millis()),
            None => event.message,
        };
        eprintln!("{}", message.dark_grey());
    }
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
