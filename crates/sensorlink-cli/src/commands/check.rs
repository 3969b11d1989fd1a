//! Check command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;

use sensorlink_types::DescriptorRegistry;

use super::write_output;
use crate::config::Config;
use crate::format::FormatOptions;

/// Load and validate the configuration, then print it back resolved.
pub fn cmd_check(path: Option<&Path>, opts: &FormatOptions) -> Result<()> {
    let config = Config::load(path)?;
    config.validate(&DescriptorRegistry::standard())?;

    let source = path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::path);
    let mut content = toml::to_string_pretty(&config).context("Failed to serialize config")?;
    content.push('\n');
    content.push_str(&summary(&config, &source, opts));
    write_output(&content)
}

fn summary(config: &Config, source: &Path, opts: &FormatOptions) -> String {
    let status = if opts.no_color {
        "OK".to_string()
    } else {
        "OK".green().bold().to_string()
    };
    format!(
        "# {} {}: {} session(s), {} attribute link(s) at {} Hz\n",
        status,
        source.display(),
        config.sessions.len(),
        config.attribute_links.len(),
        config.rate_hz
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_links() {
        let config = Config::parse(
            r#"
            rate_hz = 20.0

            [[attribute_link]]
            name = "thermometer"
            address = "AA:BB:CC:DD:EE:FF"
            attributes = ["temperature"]
            "#,
        )
        .unwrap();
        let line = summary(&config, Path::new("links.toml"), &FormatOptions::new(true));
        assert_eq!(
            line,
            "# OK links.toml: 0 session(s), 1 attribute link(s) at 20 Hz\n"
        );
    }
}
