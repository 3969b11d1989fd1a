//! Sampling adapters between links and a fixed-rate pipeline.
//!
//! Channels hold only the read surface of a link. A sample never blocks and
//! never tears the link down.

use bytes::Bytes;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use sensorlink_types::AttributeValue;

use crate::session::SessionLink;

/// Reads fixed-size frames from a [`SessionLink`].
///
/// The last received frame stays readable until a newer one arrives or the
/// session drops, so a slow peer is sampled as a held value.
#[derive(Debug, Clone)]
pub struct SessionChannel {
    link: SessionLink,
    frames: watch::Receiver<Option<Bytes>>,
}

impl SessionChannel {
    pub fn new(link: SessionLink) -> Self {
        let frames = link.frame_watch();
        Self { link, frames }
    }

    pub fn link(&self) -> &SessionLink {
        &self.link
    }

    /// Copy the latest frame into `buffer`.
    ///
    /// Returns `false` when the session is not connected, no frame has
    /// arrived yet, or the frame length differs from `buffer.len()`.
    pub fn sample(&self, buffer: &mut [u8]) -> bool {
        if !self.link.is_connected() {
            return false;
        }
        let frame = self.frames.borrow();
        let Some(frame) = frame.as_ref() else {
            return false;
        };
        if frame.len() != buffer.len() {
            debug!(
                link = %self.link.link_id(),
                expected = buffer.len(),
                actual = frame.len(),
                "Frame size mismatch"
            );
            self.link.report_frame_mismatch(buffer.len(), frame.len());
            return false;
        }
        buffer.copy_from_slice(frame);
        true
    }

    /// Send one frame to the peer. Returns whether the transfer succeeded.
    pub async fn send(&self, frame: &[u8]) -> bool {
        match self.link.send_frame(frame).await {
            Ok(()) => true,
            Err(e) => {
                debug!(link = %self.link.link_id(), "Send failed: {}", e);
                false
            }
        }
    }
}

/// Reads the cached value of one attribute.
#[derive(Debug, Clone)]
pub struct AttributeChannel {
    attribute: Uuid,
    value: watch::Receiver<Option<AttributeValue>>,
}

impl AttributeChannel {
    pub(crate) fn new(attribute: Uuid, value: watch::Receiver<Option<AttributeValue>>) -> Self {
        Self { attribute, value }
    }

    pub fn attribute(&self) -> Uuid {
        self.attribute
    }

    /// The latest decoded value, or `None` before the first notification
    /// (and after the link drops).
    pub fn sample(&self) -> Option<AttributeValue> {
        self.value.borrow().clone()
    }

    /// Wait for the next value change. Returns `None` once the link is gone.
    pub async fn changed(&mut self) -> Option<Option<AttributeValue>> {
        self.value.changed().await.ok()?;
        Some(self.value.borrow_and_update().clone())
    }
}
