//! Handler trait and the send/dispatch paths

use crate::error::RouterError;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tester_session::LinkSender;
use tester_wire::{decode_frame, MessageFromDevice, MessageToDevice, WireError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Receiver of decoded controller messages
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Called once per decoded message, in arrival order
    async fn on_message(&self, message: MessageFromDevice);

    /// Called for every frame that failed to decode; the frame is dropped
    async fn on_decode_error(&self, error: &WireError) {
        warn!("Dropping undecodable frame: {}", error);
    }
}

/// Outcome of one dispatch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Frames decoded and delivered to the handler
    pub decoded: u64,
    /// Frames dropped because they failed to decode
    pub dropped: u64,
    /// Dropped frames whose opcode is not a known reply
    pub unrecognized: u64,
}

/// Boundary between the application and one controller link
#[derive(Clone, Debug)]
pub struct Router {
    sender: LinkSender,
}

impl Router {
    /// Route requests onto the given outbound queue
    pub fn new(sender: LinkSender) -> Self {
        Self { sender }
    }

    /// Encode a request and queue it for the controller
    pub fn send(&self, message: &MessageToDevice) -> Result<(), RouterError> {
        let payload = message.encode();
        debug!("Queueing {:?} ({} bytes)", message.opcode(), payload.len());
        self.sender.enqueue(payload)?;
        Ok(())
    }

    /// Decode every inbound frame until the stream ends.
    ///
    /// Returns once the link has closed its inbound queue.
    pub async fn dispatch<H>(
        mut inbound: mpsc::UnboundedReceiver<Bytes>,
        handler: Arc<H>,
    ) -> DispatchStats
    where
        H: MessageHandler + ?Sized,
    {
        let mut stats = DispatchStats::default();

        while let Some(payload) = inbound.recv().await {
            match decode_frame(payload) {
                Ok(message) => {
                    stats.decoded += 1;
                    debug!("Dispatching {:?}", message.opcode());
                    handler.on_message(message).await;
                }
                Err(e) => {
                    stats.dropped += 1;
                    if e.is_unrecognized() {
                        stats.unrecognized += 1;
                    }
                    handler.on_decode_error(&e).await;
                }
            }
        }

        debug!("Inbound stream ended: {:?}", stats);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Duration;
    use tester_session::{encode_frame, Link, LinkConfig, LinkError, LinkState};
    use tester_wire::{ControllerResponse, PinAddress};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<MessageFromDevice>>,
        errors: Mutex<Vec<WireError>>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn on_message(&self, message: MessageFromDevice) {
            self.messages.lock().await.push(message);
        }

        async fn on_decode_error(&self, error: &WireError) {
            self.errors.lock().await.push(error.clone());
        }
    }

    struct Silent;

    #[async_trait]
    impl MessageHandler for Silent {
        async fn on_message(&self, _message: MessageFromDevice) {}
    }

    fn loopback_config() -> LinkConfig {
        LinkConfig {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            accept_timeout: Duration::from_secs(2),
            ..LinkConfig::default()
        }
    }

    #[tokio::test]
    async fn test_dispatch_absorbs_bad_frames() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Bytes::from_static(&[51, 1])).unwrap();
        tx.send(Bytes::new()).unwrap();
        tx.send(Bytes::from_static(&[99, 0, 0])).unwrap();
        tx.send(Bytes::from_static(&[52, 1, 2, 3])).unwrap();
        tx.send(Bytes::from_static(&[55])).unwrap();
        drop(tx);

        let recorder = Arc::new(Recorder::default());
        let stats = Router::dispatch(rx, recorder.clone()).await;
        assert_eq!(
            stats,
            DispatchStats {
                decoded: 2,
                dropped: 3,
                unrecognized: 1,
            }
        );

        let messages = recorder.messages.lock().await;
        assert_eq!(
            *messages,
            vec![
                MessageFromDevice::OperationStatus(ControllerResponse::CommandPerformanceSuccess),
                MessageFromDevice::KeepAlive,
            ]
        );
        let errors = recorder.errors.lock().await;
        assert_eq!(errors[0], WireError::Empty);
        assert_eq!(errors[1], WireError::Unrecognized(99));
    }

    #[tokio::test]
    async fn test_default_error_hook_keeps_dispatching() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Bytes::from_static(&[200])).unwrap();
        tx.send(Bytes::from_static(&[54])).unwrap();
        drop(tx);

        let handler: Arc<dyn MessageHandler> = Arc::new(Silent);
        let stats = Router::dispatch(rx, handler).await;
        assert_eq!(stats.decoded, 1);
        assert_eq!(stats.dropped, 1);
    }

    #[tokio::test]
    async fn test_send_and_dispatch_over_link() {
        let mut link = Link::new(loopback_config());
        let inbound = link.take_inbound().unwrap();
        let router = Router::new(link.sender());
        let addr = link.start().await.unwrap();

        router
            .send(&MessageToDevice::CheckConnections {
                pin: PinAddress::new(3, 5),
            })
            .unwrap();

        let mut controller = TcpStream::connect(addr).await.unwrap();
        let mut frame = [0u8; 7];
        controller.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame, [3, 0, 0, 0, 103, 3, 5]);

        let recorder = Arc::new(Recorder::default());
        let dispatcher = tokio::spawn(Router::dispatch(inbound, recorder.clone()));

        use tokio::io::AsyncWriteExt;
        controller.write_all(&encode_frame(&[51, 0])).await.unwrap();
        drop(controller);

        let stats = tokio::time::timeout(Duration::from_secs(2), dispatcher)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.decoded, 1);
        assert_eq!(link.wait_until(LinkState::Closed).await.state, LinkState::Closed);
        assert_eq!(
            recorder.messages.lock().await[0],
            MessageFromDevice::OperationStatus(ControllerResponse::CommandAcknowledge)
        );
    }

    #[tokio::test]
    async fn test_send_on_stopped_link_fails() {
        let mut link = Link::new(loopback_config());
        let router = Router::new(link.sender());
        link.stop().await;

        let err = router.send(&MessageToDevice::KeepAlive).unwrap_err();
        assert!(matches!(err, RouterError::Link(LinkError::Closed)));
    }
}
