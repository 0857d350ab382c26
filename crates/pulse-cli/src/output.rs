//! Output formatting for the CLI.

use anyhow::Result;
use pulse_core::{Block, SelectionKey};
use pulse_sync::{BatchReport, BrowsePage, WorkspaceView};
use serde::Serialize;
use std::fmt::Write;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    #[default]
    Human,
    /// JSON output
    Json,
    /// YAML output
    Yaml,
}

/// Print output in the specified format.
pub fn print<T: Serialize + HumanDisplay + ?Sized>(value: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Human => println!("{}", value.human_display()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

/// Print a list in the specified format.
pub fn print_list<T: Serialize + HumanDisplay>(values: &[T], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Human => {
            for value in values {
                println!("{}", value.human_display());
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(values)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(values)?),
    }
    Ok(())
}

/// Print a success message.
pub fn print_success(message: &str, format: OutputFormat) -> Result<()> {
    let value = serde_json::json!({ "status": "ok", "message": message });
    match format {
        OutputFormat::Human => println!("{message}"),
        OutputFormat::Json => println!("{value}"),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&value)?),
    }
    Ok(())
}

/// Trait for human-readable display.
pub trait HumanDisplay {
    fn human_display(&self) -> String;
}

impl HumanDisplay for Block {
    fn human_display(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "{}:{}  {}", self.dataset_id, self.question_id, self.question_text);
        for (key, value) in &self.metadata {
            let value = value.as_str().map_or_else(|| value.to_string(), String::from);
            let _ = writeln!(out, "    {key}: {value}");
        }

        let width = self
            .responses
            .iter()
            .map(|r| r.label.chars().count())
            .max()
            .unwrap_or(0);
        for row in &self.responses {
            let _ = writeln!(out, "    {:<width$}  {}", row.label, row.value);
        }

        out
    }
}

impl HumanDisplay for WorkspaceView {
    fn human_display(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "== {} ({} block(s))", self.dataset_id, self.blocks.len());
        for (i, block) in self.blocks.iter().enumerate() {
            let _ = write!(out, "{:>3}. {}", i + 1, block.human_display());
        }

        out
    }
}

impl HumanDisplay for BrowsePage {
    fn human_display(&self) -> String {
        let mut out = String::new();

        let scope = self.dataset_id.as_deref().unwrap_or("all datasets");
        let _ = write!(out, "== {scope}");
        if let Some(search) = &self.search {
            let _ = write!(out, " matching \"{search}\"");
        }
        let shown = self.entries.len();
        let first = if shown == 0 { 0 } else { self.offset + 1 };
        let _ = write!(out, " ({first}-{} of ", self.offset + shown);
        match self.total {
            Some(total) => {
                let _ = write!(out, "{total})");
            }
            None => out.push_str("unknown)"),
        }
        out.push('\n');

        for entry in &self.entries {
            let mark = if entry.selected { "[x]" } else { "[ ]" };
            let block = &entry.block;
            let _ = writeln!(
                out,
                "{mark} {}:{}  {}",
                block.dataset_id, block.question_id, block.question_text
            );
        }
        if self.has_more() {
            let _ = writeln!(out, "... more with --offset {}", self.offset + self.limit);
        }

        out
    }
}

impl HumanDisplay for SelectionKey {
    fn human_display(&self) -> String {
        self.to_string()
    }
}

impl HumanDisplay for BatchReport {
    fn human_display(&self) -> String {
        let mut out = self.summary();
        for failure in &self.failed {
            let status = failure
                .status
                .map_or_else(|| "network".to_string(), |s| s.to_string());
            let _ = write!(out, "\n  x {} [{status}] {}", failure.key, failure.message);
        }
        out
    }
}
