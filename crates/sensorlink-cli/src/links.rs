//! Builds the configured links and samples them once per tick.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures::future::join_all;
use tracing::{info, warn};

use sensorlink_core::{
    AttributeBackend, AttributeChannel, AttributeEventReceiver, AttributeLink, Error,
    PresenceSource, SessionChannel, SessionLink, SessionTransport,
};
use sensorlink_types::DescriptorRegistry;

use crate::config::{AttributeLinkConfig, Config};
use crate::demo::Demo;
use crate::format::{AttributeSample, SessionSample, TickSample, ValueSample};

struct SessionEntry {
    name: String,
    channel: SessionChannel,
    frame_size: usize,
}

struct AttributeEntry {
    name: String,
    address: String,
    link: AttributeLink,
    channels: Vec<(String, AttributeChannel)>,
}

/// Every link of one configuration.
pub struct LinkSet {
    sessions: Vec<SessionEntry>,
    attributes: Vec<AttributeEntry>,
    demo: Option<Demo>,
}

impl LinkSet {
    /// Links on the local Bluetooth adapter.
    pub async fn hardware(config: &Config, registry: Arc<DescriptorRegistry>) -> Result<Self> {
        let sessions = if config.sessions.is_empty() {
            None
        } else {
            Some(session_backend(config).await?)
        };

        let adapter = if config.attribute_links.is_empty() {
            None
        } else {
            Some(
                sensorlink_core::btle::get_adapter()
                    .await
                    .context("No Bluetooth adapter for attribute links")?,
            )
        };

        Self::build(config, registry, sessions, None, |_, link| {
            let adapter = adapter
                .clone()
                .context("Bluetooth adapter not initialized")?;
            let (events, callbacks) = sensorlink_core::attribute_event_channel();
            let backend = sensorlink_core::BtleplugBackend::new(
                adapter,
                sensorlink_core::BtleConfig::default(),
                events,
            );
            info!(link = %link.name, "Using btleplug backend");
            Ok((Arc::new(backend) as Arc<dyn AttributeBackend>, callbacks))
        })
    }

    /// Links served by simulated peers.
    pub fn demo(config: &Config, registry: Arc<DescriptorRegistry>) -> Result<Self> {
        let mut demo = Demo::new(config.tick());
        for session in &config.sessions {
            demo.serve_session(session)?;
        }
        let hub = demo.hub().clone();
        let sessions = Some((hub.transport(), Some(hub.presence())));

        let mut set = Self::build(
            config,
            Arc::clone(&registry),
            sessions,
            Some(&mut demo),
            |demo, link| match demo {
                Some(demo) => demo.attribute_backend(link, Arc::clone(&registry)),
                None => bail!("demo peers missing"),
            },
        )?;
        set.demo = Some(demo);
        Ok(set)
    }

    fn build(
        config: &Config,
        registry: Arc<DescriptorRegistry>,
        sessions: Option<(Arc<dyn SessionTransport>, Option<Arc<dyn PresenceSource>>)>,
        mut demo: Option<&mut Demo>,
        mut backend_for: impl FnMut(
            Option<&mut Demo>,
            &AttributeLinkConfig,
        ) -> Result<(Arc<dyn AttributeBackend>, AttributeEventReceiver)>,
    ) -> Result<Self> {
        let mut set = Self {
            sessions: Vec::new(),
            attributes: Vec::new(),
            demo: None,
        };

        if let Some((transport, presence)) = sessions {
            for session in &config.sessions {
                let mut link = SessionLink::new(
                    session.identity(),
                    Arc::clone(&transport),
                    session.options(&config.reconnect),
                )
                .with_context(|| format!("session '{}'", session.name))?;
                if let Some(presence) = &presence {
                    link = link.with_presence(Arc::clone(presence))?;
                }
                set.sessions.push(SessionEntry {
                    name: session.name.clone(),
                    channel: SessionChannel::new(link),
                    frame_size: session.frame_size,
                });
            }
        }

        for entry in &config.attribute_links {
            let (backend, callbacks) = backend_for(demo.as_deref_mut(), entry)?;
            let link = AttributeLink::new(
                &entry.name,
                backend,
                callbacks,
                Arc::clone(&registry),
                entry.options(&config.reconnect),
            )
            .with_context(|| format!("attribute_link '{}'", entry.name))?;
            let channels = entry
                .attributes
                .iter()
                .map(|reference| Ok((reference.clone(), link.observe_named(reference)?)))
                .collect::<Result<Vec<_>, Error>>()?;
            set.attributes.push(AttributeEntry {
                name: entry.name.clone(),
                address: entry.address.clone(),
                link,
                channels,
            });
        }
        Ok(set)
    }

    /// Connect everything, waiting at most `timeout`.
    ///
    /// Links that are still down afterwards keep retrying in the background.
    /// Configuration errors abort.
    pub async fn connect(&self, timeout: Duration) -> Result<()> {
        for entry in &self.attributes {
            entry
                .link
                .connect(&entry.address)
                .with_context(|| format!("attribute_link '{}'", entry.name))?;
        }

        let sessions = join_all(self.sessions.iter().map(|entry| {
            let link = entry.channel.link().clone();
            async move {
                (
                    entry.name.as_str(),
                    tokio::time::timeout(timeout, link.connect()).await,
                )
            }
        }));
        let attributes = join_all(self.attributes.iter().map(|entry| async move {
            (
                entry.name.as_str(),
                tokio::time::timeout(timeout, entry.link.wait_until_ready()).await,
            )
        }));
        let (sessions, attributes) = tokio::join!(sessions, attributes);

        for (name, result) in sessions {
            match result {
                Ok(Ok(())) => info!(link = name, "Session connected"),
                Ok(Err(e @ Error::InvalidConfig(_))) => {
                    return Err(e).with_context(|| format!("session '{}'", name));
                }
                Ok(Err(e)) => warn!(link = name, "Session not connected: {}", e),
                Err(_) => warn!(link = name, ?timeout, "Session still connecting"),
            }
        }
        for (name, result) in attributes {
            match result {
                Ok(Ok(())) => info!(link = name, "Attribute link ready"),
                Ok(Err(e)) => warn!(link = name, "Attribute link not ready: {}", e),
                Err(_) => warn!(link = name, ?timeout, "Attribute link not ready yet"),
            }
        }
        Ok(())
    }

    /// Read every channel without blocking.
    pub fn sample(&self, tick: u64) -> TickSample {
        let sessions = self
            .sessions
            .iter()
            .map(|entry| {
                let mut frame = vec![0u8; entry.frame_size];
                let fresh = entry.channel.sample(&mut frame);
                SessionSample {
                    name: entry.name.clone(),
                    connected: entry.channel.link().is_connected(),
                    frame: fresh.then_some(frame),
                }
            })
            .collect();

        let attributes = self
            .attributes
            .iter()
            .map(|entry| AttributeSample {
                name: entry.name.clone(),
                connected: entry.link.is_connected(),
                ready: entry.link.is_ready(),
                values: entry
                    .channels
                    .iter()
                    .map(|(attribute, channel)| ValueSample {
                        attribute: attribute.clone(),
                        value: channel.sample(),
                    })
                    .collect(),
            })
            .collect();

        TickSample {
            tick,
            sessions,
            attributes,
        }
    }

    pub async fn disconnect(self) {
        let sessions = self
            .sessions
            .iter()
            .map(|entry| entry.channel.link().disconnect());
        let attributes = self.attributes.iter().map(|entry| entry.link.disconnect());
        tokio::join!(join_all(sessions), join_all(attributes));
        if let Some(demo) = self.demo {
            demo.stop();
        }
    }
}

#[cfg(all(target_os = "linux", feature = "bluez"))]
async fn session_backend(
    config: &Config,
) -> Result<(Arc<dyn SessionTransport>, Option<Arc<dyn PresenceSource>>)> {
    let mut transport = sensorlink_core::RfcommTransport::new()
        .await
        .context("BlueZ is not available")?;
    for session in &config.sessions {
        if let Some(channel) = session.channel {
            transport = transport.with_channel(&session.name, channel);
        }
    }
    let transport = Arc::new(transport);
    Ok((transport.clone(), Some(transport)))
}

#[cfg(not(all(target_os = "linux", feature = "bluez")))]
async fn session_backend(
    _config: &Config,
) -> Result<(Arc<dyn SessionTransport>, Option<Arc<dyn PresenceSource>>)> {
    bail!("[[session]] links need a build with the `bluez` feature on Linux")
}
