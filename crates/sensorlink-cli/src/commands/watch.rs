//! Watch command implementation.
//!
//! Connects every configured link, then samples all channels on a fixed
//! tick. Sampling never blocks on a link; links that drop keep reconnecting
//! in the background and show up as `down` until they return.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::time::MissedTickBehavior;
use tracing::info;

use sensorlink_types::DescriptorRegistry;

use super::write_output;
use crate::cli::OutputFormat;
use crate::config::Config;
use crate::format::{FormatOptions, format_tick_json, format_tick_text};
use crate::links::LinkSet;

/// Arguments for the watch command.
pub struct WatchArgs<'a> {
    pub config: Option<PathBuf>,
    pub rate: Option<f64>,
    pub count: u64,
    pub format: OutputFormat,
    pub connect_timeout: Option<u64>,
    pub demo: bool,
    pub opts: &'a FormatOptions,
}

pub async fn cmd_watch(args: WatchArgs<'_>) -> Result<()> {
    let WatchArgs {
        config,
        rate,
        count,
        format,
        connect_timeout,
        demo,
        opts,
    } = args;

    let mut config = Config::load(config.as_deref())?;
    if let Some(rate) = rate {
        config.rate_hz = rate;
    }
    if let Some(secs) = connect_timeout {
        config.connect_timeout_secs = secs;
    }

    let registry = Arc::new(DescriptorRegistry::standard());
    config.validate(&registry)?;
    if config.is_empty() {
        bail!(
            "No links configured. Add [[session]] or [[attribute_link]] entries to {}",
            Config::path().display()
        );
    }

    let links = if demo {
        LinkSet::demo(&config, registry)?
    } else {
        LinkSet::hardware(&config, registry).await?
    };
    info!(
        sessions = config.sessions.len(),
        attribute_links = config.attribute_links.len(),
        rate_hz = config.rate_hz,
        "Starting watch"
    );

    if let Err(e) = links
        .connect(Duration::from_secs(config.connect_timeout_secs))
        .await
    {
        links.disconnect().await;
        return Err(e);
    }

    let result = sample_loop(&links, config.tick(), count, format, opts).await;
    links.disconnect().await;
    result
}

async fn sample_loop(
    links: &LinkSet,
    tick: Duration,
    count: u64,
    format: OutputFormat,
    opts: &FormatOptions,
) -> Result<()> {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut ticks: u64 = 0;
    loop {
        if count > 0 && ticks >= count {
            return Ok(());
        }

        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!(ticks, "Interrupted");
                return Ok(());
            }
        }

        let sample = links.sample(ticks);
        let line = match format {
            OutputFormat::Json => format_tick_json(&sample)?,
            OutputFormat::Text => format_tick_text(&sample, opts),
        };
        write_output(&line)?;
        ticks += 1;
    }
}
