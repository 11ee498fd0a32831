//! Live channel of one connected device.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::DeliveryFailure;

/// A device's open WebSocket, as seen by the rest of the server.
///
/// Outbound frames go through a bounded buffer drained by the socket's
/// writer task. Cancelling [`Self::close`] ends the socket.
pub struct ClientConnection {
    /// Connection ID (`conn_…`), same as the presence record's.
    pub id: String,
    /// Workspace the device joined.
    pub workspace_id: String,
    /// Connected user.
    pub user_id: String,
    /// Connected device.
    pub device_id: String,
    tx: mpsc::Sender<Arc<String>>,
    close: CancellationToken,
    /// When the socket was accepted.
    pub connected_at: Instant,
    /// Whether the client has answered since the last keepalive check.
    pub is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    /// Frames dropped because the buffer was full or closed.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a connection around the writer task's sender.
    pub fn new(
        id: String,
        workspace_id: String,
        user_id: String,
        device_id: String,
        tx: mpsc::Sender<Arc<String>>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            workspace_id,
            user_id,
            device_id,
            tx,
            close: CancellationToken::new(),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Enqueue a frame without waiting.
    ///
    /// Returns `false` if the buffer is full or closed, and counts the drop.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Enqueue a frame, waiting at most `timeout` for buffer space.
    pub async fn send_timeout(
        &self,
        message: Arc<String>,
        timeout: Duration,
    ) -> Result<(), DeliveryFailure> {
        match self.tx.send_timeout(message, timeout).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                Err(match e {
                    SendTimeoutError::Timeout(_) => DeliveryFailure::Timeout,
                    SendTimeoutError::Closed(_) => DeliveryFailure::ChannelClosed,
                })
            }
        }
    }

    /// Serialize and enqueue without waiting.
    pub fn send_json<T: Serialize>(&self, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.send(Arc::new(json)),
            Err(_) => false,
        }
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Ask the socket to close.
    pub fn close(&self) {
        self.close.cancel();
    }

    /// Whether [`Self::close`] has been called.
    pub fn is_closing(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Token cancelled when the socket should close.
    pub fn close_token(&self) -> CancellationToken {
        self.close.clone()
    }

    /// Mark the connection as alive (pong or any inbound frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the last pong (or since the socket was accepted).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Read and reset the alive flag.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection(capacity: usize) -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = ClientConnection::new(
            "conn_1".into(),
            "W1".into(),
            "u1".into(),
            "device-a".into(),
            tx,
        );
        (conn, rx)
    }

    #[tokio::test]
    async fn send_message_success() {
        let (conn, mut rx) = make_connection(4);
        assert!(conn.send(Arc::new("hello".into())));
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
        assert_eq!(conn.drop_count(), 0);
    }

    #[test]
    fn send_to_full_channel_counts_drop() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.send(Arc::new("one".into())));
        assert!(!conn.send(Arc::new("two".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn send_timeout_on_full_buffer() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.send(Arc::new("one".into())));
        let result = conn
            .send_timeout(Arc::new("two".into()), Duration::from_millis(50))
            .await;
        assert_eq!(result, Err(DeliveryFailure::Timeout));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_timeout_on_closed_channel() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        let result = conn
            .send_timeout(Arc::new("x".into()), Duration::from_millis(50))
            .await;
        assert_eq!(result, Err(DeliveryFailure::ChannelClosed));
    }

    #[tokio::test]
    async fn send_json_serializes() {
        let (conn, mut rx) = make_connection(4);
        assert!(conn.send_json(&serde_json::json!({"key": "value"})));
        let parsed: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(parsed["key"], "value");
    }

    #[test]
    fn close_cancels_token() {
        let (conn, _rx) = make_connection(4);
        let token = conn.close_token();
        assert!(!conn.is_closing());
        conn.close();
        assert!(conn.is_closing());
        assert!(token.is_cancelled());
    }

    #[test]
    fn mark_alive_and_check() {
        let (conn, _rx) = make_connection(4);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }
}
