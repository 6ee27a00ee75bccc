//! Output formatting for the Strata CLI
//!
//! Every command result renders either as a colored, human-readable table
//! or as JSON for machine consumption.

use clap::ValueEnum;
use serde::Serialize;
use std::io::IsTerminal;
use std::str::FromStr;

mod json;

pub use self::json::JsonOutput;

/// Output format for CLI results
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format (default)
    #[default]
    Table,
    /// JSON format for machine consumption
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: '{}'", s)),
        }
    }
}

/// Configuration for output rendering
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// The output format to use
    pub format: OutputFormat,
    /// Disable colored output
    pub no_color: bool,
    /// Compact mode (single-line JSON)
    pub compact: bool,
}

impl OutputConfig {
    /// Create an OutputConfig with automatic TTY detection
    ///
    /// Colors are disabled when stdout is piped or redirected.
    pub fn auto_detect(format: OutputFormat) -> Self {
        Self {
            format,
            no_color: !std::io::stdout().is_terminal(),
            compact: false,
        }
    }

    /// Builder: enable compact mode
    pub fn compact(mut self) -> Self {
        self.compact = true;
        self
    }
}

/// Types that can be displayed as a table
pub trait TableDisplay: Serialize {
    /// Convert to table format string
    fn to_table(&self) -> String;
}

/// Result wrapper for formatted output with automatic format selection
pub struct Output<T> {
    data: T,
    config: OutputConfig,
}

impl<T: TableDisplay> Output<T> {
    /// Create a new output wrapper with the given configuration
    pub fn new(data: T, config: OutputConfig) -> Self {
        Self { data, config }
    }

    /// Get the rendered string without printing
    pub fn render_to_string(&self) -> String {
        match self.config.format {
            OutputFormat::Table => {
                if self.config.no_color {
                    colored::control::set_override(false);
                }
                self.data.to_table()
            }
            OutputFormat::Json => JsonOutput::format(&self.data, &self.config),
        }
    }

    /// Render the output to stdout
    pub fn render(&self) -> anyhow::Result<()> {
        println!("{}", self.render_to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Sample {
        pages: usize,
    }

    impl TableDisplay for Sample {
        fn to_table(&self) -> String {
            format!("Pages: {}", self.pages)
        }
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("table".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert!("csv".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_render_by_format() {
        let table = Output::new(Sample { pages: 3 }, OutputConfig::auto_detect(OutputFormat::Table))
            .render_to_string();
        assert_eq!(table, "Pages: 3");

        let json = Output::new(Sample { pages: 3 }, OutputConfig::auto_detect(OutputFormat::Json))
            .render_to_string();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["pages"], 3);
        assert!(json.contains('\n'));
    }

    #[test]
    fn test_compact_renders_single_line_json() {
        let config = OutputConfig::auto_detect(OutputFormat::Json).compact();
        assert!(config.compact);

        let json = Output::new(Sample { pages: 3 }, config).render_to_string();
        assert_eq!(json, r#"{"pages":3}"#);
    }
}
