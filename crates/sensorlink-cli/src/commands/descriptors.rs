//! Descriptors command implementation.

use anyhow::Result;

use sensorlink_types::DescriptorRegistry;

use super::write_output;
use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_descriptors_json, format_descriptors_text};

pub fn cmd_descriptors(format: OutputFormat, opts: &FormatOptions) -> Result<()> {
    let registry = DescriptorRegistry::standard();
    let descriptors: Vec<_> = registry.iter().collect();

    let content = match format {
        OutputFormat::Json => format_descriptors_json(&descriptors)?,
        OutputFormat::Text => format_descriptors_text(&descriptors, opts),
    };
    write_output(&content)
}
