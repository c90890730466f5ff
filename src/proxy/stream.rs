//! Stream listener: each TCP read becomes one upstream POST
//!
//! Nothing is written back to the peer; the upstream response is only logged.

use super::{Lifecycle, Listener, Notifier};
use crate::client::ForwardingClient;
use crate::config::TcpListenerConfig;
use crate::error::{BridgeError, Result};
use crate::ProxyState;
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// TCP inbound listener
pub struct StreamProxyListener {
    config: TcpListenerConfig,
    client: Arc<ForwardingClient>,
    lifecycle: Lifecycle,
}

impl StreamProxyListener {
    /// Create a stopped listener
    pub fn new(config: TcpListenerConfig, client: Arc<ForwardingClient>) -> Self {
        Self {
            config,
            client,
            lifecycle: Lifecycle::default(),
        }
    }

    /// Listener configuration
    pub fn config(&self) -> &TcpListenerConfig {
        &self.config
    }
}

#[async_trait]
impl Listener for StreamProxyListener {
    fn protocol(&self) -> &'static str {
        "tcp"
    }

    async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let run = self.lifecycle.begin(self.protocol(), &cancel)?;

        self.config.validate()?;
        let addr = self.config.bind_addr()?;
        let notifier = Notifier::new(
            self.client.clone(),
            self.config.profile()?,
            self.config.content_type.as_str(),
        );

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Transport(format!("Failed to bind TCP {}: {}", addr, e)))?;
        let local = listener.local_addr()?;
        run.bound(local);

        tracing::info!(
            address = %local,
            target = self.config.target_url.as_deref().unwrap_or_default(),
            buffer_size = self.config.buffer_size,
            "TCP listener started"
        );

        let buffer_size = self.config.buffer_size;
        let pause = Duration::from_millis(self.config.read_pause_ms);

        loop {
            let (stream, peer) = tokio::select! {
                _ = run.token().cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept TCP connection");
                        continue;
                    }
                },
            };

            let notifier = notifier.clone();
            let token = run.token().child_token();
            let client = self.client.clone();
            tokio::spawn(async move {
                client.metrics().inc_connections();
                tracing::info!(peer = %peer, "TCP connection accepted");
                read_loop(stream, peer, buffer_size, pause, notifier, token).await;
                tracing::info!(peer = %peer, "TCP connection closed");
                client.metrics().dec_connections();
            });
        }

        tracing::info!(address = %local, "TCP listener stopped");
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.lifecycle.end(self.protocol())
    }

    fn state(&self) -> ProxyState {
        self.lifecycle.state()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.local_addr()
    }
}

/// Forward every non-empty read until the peer closes or the listener stops
async fn read_loop(
    mut stream: TcpStream,
    peer: SocketAddr,
    buffer_size: usize,
    pause: Duration,
    notifier: Notifier,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; buffer_size];
    loop {
        // Cancellation wins over data that is already buffered
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(peer = %peer, "TCP connection cancelled");
                return;
            }
            read = stream.read(&mut buf) => match read {
                Ok(0) => return,
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(error = %e, peer = %peer, "TCP read failed");
                    return;
                }
            },
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            dispatched = notifier.dispatch(Bytes::copy_from_slice(&buf[..n]), peer) => {
                if let Err(e) = dispatched {
                    tracing::warn!(error = %e, peer = %peer, "TCP read dropped");
                    return;
                }
            }
        }

        if !pause.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use wiremock::matchers::{body_string, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    async fn wait_bound(listener: &StreamProxyListener) -> SocketAddr {
        for _ in 0..100 {
            if let Some(addr) = listener.local_addr() {
                return addr;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("listener never bound");
    }

    async fn wait_for_requests(server: &MockServer, count: usize) {
        for _ in 0..200 {
            if server.received_requests().await.unwrap_or_default().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_each_read_is_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string("ping"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let client = Arc::new(ForwardingClient::with_defaults().unwrap());
        let listener = Arc::new(StreamProxyListener::new(
            TcpListenerConfig::new("127.0.0.1", free_port(), server.uri()),
            client,
        ));
        let cancel = CancellationToken::new();
        let task = {
            let listener = listener.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { listener.start(cancel).await })
        };

        let addr = wait_bound(&listener).await;
        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"ping").await.unwrap();
        wait_for_requests(&server, 1).await;
        conn.write_all(b"ping").await.unwrap();
        wait_for_requests(&server, 2).await;

        listener.stop().unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(listener.state(), ProxyState::Stopped);
    }

    #[tokio::test]
    async fn test_missing_target_fails_start() {
        let client = Arc::new(ForwardingClient::with_defaults().unwrap());
        let mut config = TcpListenerConfig::new("127.0.0.1", free_port(), "http://127.0.0.1:1/");
        config.target_url = None;
        let listener = StreamProxyListener::new(config, client);

        let err = listener.start(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
        assert_eq!(listener.state(), ProxyState::Stopped);
    }

    #[tokio::test]
    async fn test_cancel_stops_listener() {
        let client = Arc::new(ForwardingClient::with_defaults().unwrap());
        let listener = Arc::new(StreamProxyListener::new(
            TcpListenerConfig::new("127.0.0.1", free_port(), "http://127.0.0.1:1/"),
            client,
        ));
        let cancel = CancellationToken::new();
        let task = {
            let listener = listener.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { listener.start(cancel).await })
        };
        wait_bound(&listener).await;
        assert_eq!(listener.state(), ProxyState::Running);

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(listener.state(), ProxyState::Stopped);
        assert!(listener.stop().is_err());
    }
    #[tokio::test]
    async fn test_open_connection_stops_forwarding_after_stop() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = Arc::new(ForwardingClient::with_defaults().unwrap());
        let listener = Arc::new(StreamProxyListener::new(
            TcpListenerConfig::new("127.0.0.1", free_port(), server.uri()),
            client,
        ));
        let task = {
            let listener = listener.clone();
            tokio::spawn(async move { listener.start(CancellationToken::new()).await })
        };

        let addr = wait_bound(&listener).await;
        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"one").await.unwrap();
        wait_for_requests(&server, 1).await;

        listener.stop().unwrap();
        task.await.unwrap().unwrap();

        // The connection was opened before stop; later data must not be forwarded
        let _ = conn.write_all(b"two").await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].body, b"one");
    }
}
