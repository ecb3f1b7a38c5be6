//! A scripted desktop peer on the in-memory network.
//!
//! The peer listens on an address, accepts one connection and plays its
//! script step by step. Whatever it receives is recorded in a [`PeerLog`]
//! that the test inspects once the peer finishes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::task::JoinHandle;
use tracing::debug;

use fieldlink_sync::{
    ChannelAddress, FrameSource, MemoryListener, MemoryNetwork, Message, Response, Transport,
    TransportEvent,
};

/// One scripted action of the peer.
#[derive(Debug, Clone)]
pub enum Step {
    /// Send a raw text frame.
    Send(String),
    Message(Message),
    Respond(Response),
    /// Wait for exactly one text frame from the device.
    Expect,
    /// Close with a closing handshake carrying this code.
    Close(u16),
    /// Drop the connection without a handshake.
    Abort,
    Sleep(Duration),
    /// Record frames until the device closes.
    Linger,
}

/// What the peer saw.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PeerLog {
    pub received: Vec<String>,
    /// Close code of the device's closure, if the peer observed one.
    pub closed: Option<u16>,
}

/// A running scripted peer.
pub struct ScriptedPeer {
    handle: JoinHandle<anyhow::Result<PeerLog>>,
}

impl ScriptedPeer {
    /// Listen on `address` and play `script` against the first connection.
    ///
    /// Listening starts before this returns, so the device can dial right
    /// away.
    pub async fn listen(
        network: &Arc<MemoryNetwork>,
        address: &ChannelAddress,
        script: Vec<Step>,
    ) -> Self {
        let listener = network.listen(address).await;
        Self {
            handle: tokio::spawn(run(listener, script)),
        }
    }

    /// Wait for the script to end.
    pub async fn finish(self) -> anyhow::Result<PeerLog> {
        self.handle.await.context("peer task panicked")?
    }
}

async fn run(mut listener: MemoryListener, script: Vec<Step>) -> anyhow::Result<PeerLog> {
    let (mut transport, mut source) = listener
        .accept()
        .await
        .context("network dropped before the device dialed")?;
    let mut log = PeerLog::default();

    for step in script {
        debug!(?step, "peer step");
        match step {
            Step::Send(text) => transport.send_text(text).await?,
            Step::Message(message) => transport.send_text(message.to_text()?).await?,
            Step::Respond(response) => transport.send_text(response.to_text()?).await?,
            Step::Expect => match source.next_event().await {
                Some(TransportEvent::Text(text)) => log.received.push(text),
                Some(TransportEvent::Closed { code, .. }) => {
                    log.closed = Some(code);
                    bail!("device closed ({}) while a frame was expected", code);
                }
                other => bail!("expected a frame, got {:?}", other),
            },
            Step::Close(code) => transport.close_with(code, "").await?,
            Step::Abort => transport.abort(),
            Step::Sleep(duration) => tokio::time::sleep(duration).await,
            Step::Linger => loop {
                match source.next_event().await {
                    Some(TransportEvent::Text(text)) => log.received.push(text),
                    Some(TransportEvent::Closed { code, .. }) => {
                        log.closed = Some(code);
                        break;
                    }
                    Some(TransportEvent::Error(e)) => bail!("transport error: {}", e),
                    None => break,
                }
            },
        }
    }
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldlink_sync::transport::CLOSE_NORMAL;
    use fieldlink_sync::{decode, Connector};

    #[tokio::test]
    async fn test_peer_plays_script_in_order() {
        let network = MemoryNetwork::new();
        let address = decode("peer.test:8080").unwrap();
        let peer = ScriptedPeer::listen(
            &network,
            &address,
            vec![
                Step::Send("hello".into()),
                Step::Expect,
                Step::Linger,
            ],
        )
        .await;

        let (mut transport, mut source) = network.connector().connect(&address).await.unwrap();
        assert_eq!(
            source.next_event().await,
            Some(TransportEvent::Text("hello".into()))
        );
        transport.send_text("reply".into()).await.unwrap();
        transport.close().await.unwrap();

        let log = peer.finish().await.unwrap();
        assert_eq!(log.received, vec!["reply".to_string()]);
        assert_eq!(log.closed, Some(CLOSE_NORMAL));
    }
}
