//! The transport boundary.
//!
//! The runtime does not speak any wire protocol. It pulls raw envelopes from
//! an [`EventSource`] and asks it to reconnect when it reports a disconnect.

use async_trait::async_trait;
use tokio::sync::mpsc;
use yoz_core::{TransportError, TransportResult};

/// A stream of raw inbound envelopes from the gateway.
#[async_trait]
pub trait EventSource: Send {
    /// Waits for the next envelope.
    ///
    /// [`TransportError::Closed`] ends the dispatch loop; any other error
    /// triggers [`reconnect`](Self::reconnect).
    async fn recv(&mut self) -> TransportResult<Vec<u8>>;

    /// Re-establishes the session after a disconnect.
    async fn reconnect(&mut self) -> TransportResult<()> {
        Ok(())
    }
}

/// Sending half of a [`ChannelSource`].
pub type ChannelSender = mpsc::Sender<TransportResult<Vec<u8>>>;

/// An in-process [`EventSource`] fed through an mpsc channel.
///
/// Errors sent through the channel are surfaced as-is, which lets an
/// embedding transport report disconnects. Dropping every sender closes the
/// source.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<TransportResult<Vec<u8>>>,
    reconnects: u32,
}

impl ChannelSource {
    /// Creates a source with a bounded buffer of `capacity` envelopes.
    pub fn channel(capacity: usize) -> (ChannelSender, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx, reconnects: 0 })
    }

    /// Number of times the runtime asked this source to reconnect.
    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn recv(&mut self) -> TransportResult<Vec<u8>> {
        self.rx.recv().await.unwrap_or(Err(TransportError::Closed))
    }

    async fn reconnect(&mut self) -> TransportResult<()> {
        if self.rx.is_closed() && self.rx.is_empty() {
            return Err(TransportError::Closed);
        }
        self.reconnects += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_channel_source_forwards_then_closes() {
        let (tx, mut source) = ChannelSource::channel(4);
        tx.send(Ok(b"one".to_vec())).await.unwrap();
        tx.send(Err(TransportError::disconnected("reset"))).await.unwrap();
        drop(tx);

        assert_eq!(assert_ok!(source.recv().await), b"one");
        assert!(matches!(
            source.recv().await,
            Err(TransportError::Disconnected { .. })
        ));
        assert!(matches!(source.recv().await, Err(TransportError::Closed)));
        assert!(matches!(source.reconnect().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_reconnect_counts_while_open() {
        let (_tx, mut source) = ChannelSource::channel(1);
        assert_ok!(source.reconnect().await);
        assert_ok!(source.reconnect().await);
        assert_eq!(source.reconnects(), 2);
    }
}
