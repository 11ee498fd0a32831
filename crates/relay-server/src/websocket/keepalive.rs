//! Protocol-level Ping/Pong liveness.
//!
//! Independent of the presence heartbeat: this only decides whether the
//! socket itself is still there.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use super::connection::ClientConnection;

/// Outcome of the keepalive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveResult {
    /// The client stopped answering within the timeout window.
    TimedOut,
    /// The loop was cancelled externally.
    Cancelled,
}

/// Watch a connection's alive flag.
///
/// At each `interval` tick the flag is checked and reset. After
/// `timeout / interval` consecutive misses (at least one) the connection is
/// considered dead.
pub async fn run_keepalive(
    connection: Arc<ClientConnection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> KeepaliveResult {
    let mut check_interval = time::interval(interval);
    // The first tick completes immediately.
    let _ = check_interval.tick().await;
    let mut missed: u32 = 0;

    let interval_ms = interval.as_millis().max(1);
    #[allow(clippy::cast_possible_truncation)]
    let max_missed = (timeout.as_millis() / interval_ms).max(1) as u32;

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return KeepaliveResult::TimedOut;
                    }
                }
                connection.is_alive.store(false, Ordering::Relaxed);
            }
            () = cancel.cancelled() => return KeepaliveResult::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn make_connection() -> Arc<ClientConnection> {
        let (tx, _rx) = mpsc::channel(4);
        Arc::new(ClientConnection::new(
            "ka_conn".into(),
            "W1".into(),
            "u1".into(),
            "dev".into(),
            tx,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn silent_client_times_out() {
        let conn = make_connection();
        conn.is_alive.store(false, Ordering::Relaxed);
        let result = run_keepalive(
            conn,
            Duration::from_millis(100),
            Duration::from_millis(300),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, KeepaliveResult::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn answering_client_stays_alive() {
        let conn = make_connection();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_keepalive(
            Arc::clone(&conn),
            Duration::from_millis(50),
            Duration::from_millis(100),
            cancel.clone(),
        ));

        for _ in 0..10 {
            time::sleep(Duration::from_millis(20)).await;
            conn.mark_alive();
        }
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), KeepaliveResult::Cancelled);
    }

    #[tokio::test]
    async fn cancelled_immediately() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run_keepalive(
            make_connection(),
            Duration::from_secs(30),
            Duration::from_secs(60),
            cancel,
        )
        .await;
        assert_eq!(result, KeepaliveResult::Cancelled);
    }
}
