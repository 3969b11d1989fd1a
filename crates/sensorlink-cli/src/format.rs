//! Output formatting for text and JSON.

use anyhow::Result;
use owo_colors::OwoColorize;
use serde::Serialize;

use sensorlink_types::{AttributeDescriptor, AttributeValue};

/// One line of `watch` output.
#[derive(Debug, Clone, Serialize)]
pub struct TickSample {
    pub tick: u64,
    pub sessions: Vec<SessionSample>,
    pub attributes: Vec<AttributeSample>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSample {
    pub name: String,
    pub connected: bool,
    /// Last frame received, `None` until one has arrived.
    pub frame: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttributeSample {
    pub name: String,
    pub connected: bool,
    pub ready: bool,
    pub values: Vec<ValueSample>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValueSample {
    pub attribute: String,
    pub value: Option<AttributeValue>,
}

/// Formatting options for output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
}

impl FormatOptions {
    pub fn new(no_color: bool) -> Self {
        Self { no_color }
    }

    fn up(&self, connected: bool) -> String {
        let mark = if connected { "up" } else { "down" };
        match (self.no_color, connected) {
            (true, _) => mark.to_string(),
            (false, true) => mark.green().to_string(),
            (false, false) => mark.red().to_string(),
        }
    }

    fn missing(&self) -> String {
        if self.no_color {
            "-".to_string()
        } else {
            "-".dimmed().to_string()
        }
    }

    fn name(&self, name: &str) -> String {
        if self.no_color {
            name.to_string()
        } else {
            name.bold().to_string()
        }
    }
}

/// Format a tick as a single text line.
#[must_use]
pub fn format_tick_text(sample: &TickSample, opts: &FormatOptions) -> String {
    let mut parts = Vec::new();

    for session in &sample.sessions {
        let frame = match &session.frame {
            Some(frame) => hex(frame),
            None => opts.missing(),
        };
        parts.push(format!(
            "{} [{}] {}",
            opts.name(&session.name),
            opts.up(session.connected),
            frame
        ));
    }

    for link in &sample.attributes {
        let values: Vec<String> = link
            .values
            .iter()
            .map(|v| {
                let value = match &v.value {
                    Some(value) => value.to_string(),
                    None => opts.missing(),
                };
                format!("{}={}", v.attribute, value)
            })
            .collect();
        parts.push(format!(
            "{} [{}] {}",
            opts.name(&link.name),
            opts.up(link.ready),
            values.join(" ")
        ));
    }

    format!("{:>6}  {}\n", sample.tick, parts.join("  |  "))
}

/// Format a tick as one compact JSON line.
pub fn format_tick_json(sample: &TickSample) -> Result<String> {
    Ok(serde_json::to_string(sample)? + "\n")
}

/// Format the descriptor table.
#[must_use]
pub fn format_descriptors_text(descriptors: &[&AttributeDescriptor], opts: &FormatOptions) -> String {
    let mut output = String::new();
    let header = format!(
        "{:<22} {:<8} {:>5}  {}",
        "NAME", "FORMAT", "SCALE", "UUID"
    );
    if opts.no_color {
        output.push_str(&header);
    } else {
        output.push_str(&header.bold().to_string());
    }
    output.push('\n');
    for d in descriptors {
        output.push_str(&format!(
            "{:<22} {:<8} {:>5}  {}\n",
            d.name,
            d.raw_format.name(),
            d.decimal_scale,
            d.id
        ));
    }
    output
}

pub fn format_descriptors_json(descriptors: &[&AttributeDescriptor]) -> Result<String> {
    Ok(serde_json::to_string_pretty(descriptors)? + "\n")
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorlink_types::DescriptorRegistry;

    fn sample() -> TickSample {
        TickSample {
            tick: 7,
            sessions: vec![SessionSample {
                name: "glove".into(),
                connected: true,
                frame: Some(vec![0x01, 0xab]),
            }],
            attributes: vec![AttributeSample {
                name: "thermometer".into(),
                connected: true,
                ready: false,
                values: vec![
                    ValueSample {
                        attribute: "battery-level".into(),
                        value: Some(AttributeValue::Integer(50)),
                    },
                    ValueSample {
                        attribute: "temperature".into(),
                        value: None,
                    },
                ],
            }],
        }
    }

    #[test]
    fn test_format_tick_text_plain() {
        let line = format_tick_text(&sample(), &FormatOptions::new(true));
        assert_eq!(
            line,
            "     7  glove [up] 01ab  |  thermometer [down] battery-level=50 temperature=-\n"
        );
    }

    #[test]
    fn test_format_tick_json_is_one_line() {
        let line = format_tick_json(&sample()).unwrap();
        assert_eq!(line.matches('\n').count(), 1);

        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["tick"], 7);
        assert_eq!(parsed["sessions"][0]["frame"], serde_json::json!([1, 171]));
        assert_eq!(parsed["attributes"][0]["values"][0]["value"]["value"], 50);
        assert!(parsed["attributes"][0]["values"][1]["value"].is_null());
    }

    #[test]
    fn test_format_tick_text_without_frame() {
        let mut tick = sample();
        tick.sessions[0].frame = None;
        tick.sessions[0].connected = false;
        let line = format_tick_text(&tick, &FormatOptions::new(true));
        assert!(line.contains("glove [down] -"));
    }

    #[test]
    fn test_format_descriptors() {
        let registry = DescriptorRegistry::standard();
        let all: Vec<_> = registry.iter().collect();
        let text = format_descriptors_text(&all, &FormatOptions::new(true));
        assert!(text.starts_with("NAME"));
        assert!(text.contains("battery-level"));
        assert_eq!(text.lines().count(), all.len() + 1);

        let json = format_descriptors_json(&all).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.as_array().map(Vec::len), Some(all.len()));
    }
}
