//! The seam between the connection driver and the socket.
//!
//! A [`Connector`] dials the server and hands back a [`Link`]: a pair of
//! channels carrying [`Frame`]s. The driver never touches the socket
//! directly, so tests can drive it with [`Link::pair`].

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{TransportError, TransportResult};
use crate::protocol::Frame;

/// An open, framed connection.
///
/// The link is closed when `inbound` yields `None` or an error. Dropping
/// `outbound` asks the far side to close.
#[derive(Debug)]
pub struct Link {
    /// Frames to write.
    pub outbound: mpsc::Sender<Frame>,
    /// Frames read, or the error that ended the read side.
    pub inbound: mpsc::Receiver<TransportResult<Frame>>,
}

/// The far side of an in-memory [`Link`].
#[derive(Debug)]
pub struct LinkPeer {
    /// Frames the client wrote.
    pub received: mpsc::Receiver<Frame>,
    /// Frames to deliver to the client. Drop to close the link.
    pub deliver: mpsc::Sender<TransportResult<Frame>>,
}

impl LinkPeer {
    /// Deliver one frame to the client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] if the client has dropped the link.
    pub async fn send(&self, frame: Frame) -> TransportResult<()> {
        self.deliver
            .send(Ok(frame))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// End the link with a read error.
    pub async fn fail(self, error: TransportError) {
        let _ = self.deliver.send(Err(error)).await;
    }
}

impl Link {
    /// Create a connected in-memory link and its far side.
    #[must_use]
    pub fn pair(buffer: usize) -> (Self, LinkPeer) {
        let buffer = buffer.max(1);
        let (outbound, received) = mpsc::channel(buffer);
        let (deliver, inbound) = mpsc::channel(buffer);
        (Self { outbound, inbound }, LinkPeer { received, deliver })
    }
}

/// Dials a room server.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a link to `url`. `room_id` is informational; joining happens
    /// over the link once it is open.
    async fn connect(&self, url: &Url, room_id: &str) -> TransportResult<Link>;
}
