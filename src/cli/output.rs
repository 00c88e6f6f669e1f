//! Output formatting for CLI commands.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::str::FromStr;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    Json,
    #[default]
    Text,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "text" => Ok(OutputFormat::Text),
            _ => anyhow::bail!("Unsupported output format: '{}'. Use 'json' or 'text'.", s),
        }
    }
}

/// Print data as JSON
pub fn print_json<T: Serialize>(data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data).context("Failed to serialize to JSON")?;
    println!("{}", json);
    Ok(())
}

/// Print `label: value` lines, skipping absent values.
pub fn print_fields(fields: &[(&str, Option<String>)]) {
    let width = fields.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    for (label, value) in fields {
        if let Some(value) = value {
            println!("{:<width$}  {}", label, value, width = width);
        }
    }
}

/// Write PEM text to `path`, or print it when no path is given.
pub fn emit_pem(pem: &str, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, pem)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            print!("{}", pem);
            Ok(())
        }
    }
}
