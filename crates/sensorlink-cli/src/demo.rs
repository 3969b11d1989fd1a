//! Simulated peers for `watch --demo`.
//!
//! Every configured link is served by an in-memory peer that produces a
//! counter-driven signal once per tick, so the whole pipeline runs without a
//! Bluetooth adapter.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::debug;

use sensorlink_core::mock::{MockAttributeBackend, MockSessionHub};
use sensorlink_core::{AttributeBackend, AttributeEventReceiver};
use sensorlink_types::{AttributeValue, DescriptorRegistry, Role, codec};

use crate::config::{AttributeLinkConfig, SessionConfig};

/// Address the simulated peers answer to.
pub const DEMO_PEER: &str = "D0:E0:00:00:00:01";

pub struct Demo {
    hub: MockSessionHub,
    tick: Duration,
    tasks: Vec<JoinHandle<()>>,
}

impl Demo {
    pub fn new(tick: Duration) -> Self {
        Self {
            hub: MockSessionHub::new(),
            tick,
            tasks: Vec::new(),
        }
    }

    pub fn hub(&self) -> &MockSessionHub {
        &self.hub
    }

    /// Start the remote end of `session`.
    pub fn serve_session(&mut self, session: &SessionConfig) -> Result<()> {
        let name = session.name.clone();
        let frame_size = session.frame_size;
        let tick = self.tick;
        let hub = self.hub.clone();

        let task = match session.role {
            // The link listens, so the simulated peer dials in.
            Role::Server => tokio::spawn(async move {
                loop {
                    match hub.dial(&name, DEMO_PEER).await {
                        Ok(mut peer) => stream_frames(&mut peer, frame_size, tick).await,
                        Err(e) => debug!(session = %name, "Demo dial failed: {}", e),
                    }
                    tokio::time::sleep(tick).await;
                }
            }),
            Role::Client => {
                let address = if session.remote_name.is_empty() {
                    session
                        .remote_address
                        .clone()
                        .unwrap_or_else(|| DEMO_PEER.to_string())
                } else {
                    self.hub.add_bonded(DEMO_PEER, &session.remote_name);
                    DEMO_PEER.to_string()
                };
                let mut listener = self.hub.listen_as(&name, &address)?;
                tokio::spawn(async move {
                    while let Ok(mut peer) = listener.accept().await {
                        stream_frames(&mut peer, frame_size, tick).await;
                    }
                })
            }
        };
        self.tasks.push(task);
        Ok(())
    }

    /// Build a scripted backend for `link` and start feeding it values.
    pub fn attribute_backend(
        &mut self,
        link: &AttributeLinkConfig,
        registry: Arc<DescriptorRegistry>,
    ) -> Result<(Arc<dyn AttributeBackend>, AttributeEventReceiver)> {
        let mut builder = MockAttributeBackend::builder();
        let mut attributes = Vec::new();
        for reference in &link.attributes {
            let id = registry.resolve(reference)?;
            builder = builder.attribute(id);
            attributes.push(id);
        }
        let (backend, callbacks) = builder.build();
        let backend = Arc::new(backend);

        let feeder = Arc::clone(&backend);
        let tick = self.tick;
        self.tasks.push(tokio::spawn(async move {
            let mut counter: i64 = 0;
            loop {
                tokio::time::sleep(tick).await;
                if !feeder.is_connected() {
                    continue;
                }
                for (offset, id) in attributes.iter().enumerate() {
                    let sample = (counter + offset as i64 * 10) % 100;
                    match registry.get(id) {
                        Some(descriptor) => {
                            match codec::encode(descriptor, &AttributeValue::Integer(sample)) {
                                Ok(raw) => feeder.notify(*id, &raw),
                                Err(e) => debug!(attribute = %id, "Demo value skipped: {}", e),
                            }
                        }
                        None => feeder.notify(*id, &[sample as u8]),
                    }
                }
                counter += 1;
            }
        }));

        Ok((backend, callbacks))
    }

    pub fn stop(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

async fn stream_frames(peer: &mut sensorlink_core::mock::MockPeer, frame_size: usize, tick: Duration) {
    let mut counter: u8 = 0;
    loop {
        let frame: Vec<u8> = (0..frame_size)
            .map(|i| counter.wrapping_add(i as u8))
            .collect();
        if peer.send(&frame).await.is_err() {
            return;
        }
        counter = counter.wrapping_add(1);
        tokio::time::sleep(tick).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorlink_core::{AttributeLink, AttributeLinkOptions, SessionChannel, SessionLink};

    fn session(role: Role) -> SessionConfig {
        SessionConfig {
            name: "glove".into(),
            role,
            remote_name: if role == Role::Client { "Glove".into() } else { String::new() },
            remote_address: None,
            frame_size: 3,
            channel: None,
            reconnect: None,
        }
    }

    #[tokio::test]
    async fn test_demo_serves_server_session() {
        let mut demo = Demo::new(Duration::from_millis(5));
        let config = session(Role::Server);
        demo.serve_session(&config).unwrap();

        let link = SessionLink::new(
            config.identity(),
            demo.hub().transport(),
            config.options(&Default::default()),
        )
        .unwrap();
        tokio::time::timeout(Duration::from_secs(2), link.connect())
            .await
            .unwrap()
            .unwrap();

        let channel = SessionChannel::new(link.clone());
        let mut frames = link.frame_watch();
        frames.wait_for(|f| f.is_some()).await.unwrap();
        let mut buf = [0u8; 3];
        assert!(channel.sample(&mut buf));
        assert_eq!(buf[1], buf[0].wrapping_add(1));

        link.disconnect().await;
        demo.stop();
    }

    #[tokio::test]
    async fn test_demo_serves_client_session_by_bonded_name() {
        let mut demo = Demo::new(Duration::from_millis(5));
        let config = session(Role::Client);
        demo.serve_session(&config).unwrap();

        let link = SessionLink::new(
            config.identity(),
            demo.hub().transport(),
            config.options(&Default::default()),
        )
        .unwrap();
        tokio::time::timeout(Duration::from_secs(2), link.connect())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(link.peer().map(|p| p.address), Some(DEMO_PEER.to_string()));
        link.disconnect().await;
        demo.stop();
    }

    #[tokio::test]
    async fn test_demo_feeds_attribute_values() {
        let registry = Arc::new(DescriptorRegistry::standard());
        let config = AttributeLinkConfig {
            name: "thermometer".into(),
            address: "AA:BB".into(),
            attributes: vec!["temperature".into()],
            teardown_timeout_ms: 500,
            auto_reconnect: true,
            reconnect: None,
        };
        let mut demo = Demo::new(Duration::from_millis(5));
        let (backend, callbacks) = demo.attribute_backend(&config, Arc::clone(&registry)).unwrap();
        let link = AttributeLink::new(
            "thermometer",
            backend,
            callbacks,
            registry,
            AttributeLinkOptions::default(),
        )
        .unwrap();
        let mut temperature = link.observe_named("temperature").unwrap();
        link.connect("AA:BB").unwrap();

        let value = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(Some(value)) = temperature.changed().await {
                    break value;
                }
            }
        })
        .await
        .unwrap();
        assert!(matches!(value, AttributeValue::Float(_)));
        link.disconnect().await;
        demo.stop();
    }
}
