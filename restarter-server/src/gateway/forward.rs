//! Inner dial and byte bridging for forwarded channels
//!
//! Once the gateway has admitted a `direct-tcpip` channel, this module
//! connects it to the child's TCP port. The dial retries on a fixed
//! interval because a forward is often what triggered the child's spawn in
//! the first place, and the child needs time to start listening.

use std::time::Duration;

use russh::server::Msg;
use russh::Channel;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use restarter_utils::{RestarterError, Result};

use crate::supervisor::Event;

/// Only loopback destinations on the configured forward port are served
pub(crate) fn destination_allowed(host: &str, port: u32, fwd_port: u16) -> bool {
    (host == "localhost" || host == "127.0.0.1") && port == u32::from(fwd_port)
}

/// Dial `addr`, retrying while the child is still coming up
///
/// Makes up to `max_attempts` attempts with a fixed `delay` between them
/// and returns the first established stream. Per-attempt failures are
/// logged; exhausting the attempts is the reportable error.
pub(crate) async fn dial_with_retry(
    addr: &str,
    max_attempts: u32,
    delay: Duration,
) -> Result<TcpStream> {
    for attempt in 1..=max_attempts {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                trace!(addr, attempt, "inner dial succeeded");
                return Ok(stream);
            }
            Err(e) => debug!(addr, attempt, error = %e, "inner dial failed"),
        }
        if attempt < max_attempts {
            tokio::time::sleep(delay).await;
        }
    }
    Err(RestarterError::DialExhausted {
        addr: addr.to_string(),
        attempts: max_attempts,
    })
}

/// Bridge a confirmed channel and an established socket
///
/// Two independent copy tasks, one per direction. Each reports the bridge
/// as down when its direction ends, so a single forward may emit the down
/// event twice; the supervisor's session set treats the second as a no-op.
pub(crate) fn bridge(
    channel: Channel<Msg>,
    socket: TcpStream,
    id: String,
    events: mpsc::Sender<Event>,
) {
    let (mut chan_read, mut chan_write) = tokio::io::split(channel.into_stream());
    let (mut sock_read, mut sock_write) = socket.into_split();

    let down_events = events.clone();
    let down_id = id.clone();
    tokio::spawn(async move {
        let _ = tokio::io::copy(&mut chan_read, &mut sock_write).await;
        let _ = sock_write.shutdown().await;
        let _ = down_events
            .send(Event::Login {
                up: false,
                id: down_id,
            })
            .await;
    });

    tokio::spawn(async move {
        let _ = tokio::io::copy(&mut sock_read, &mut chan_write).await;
        let _ = chan_write.shutdown().await;
        let _ = events.send(Event::Login { up: false, id }).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Instant;
    use tokio::net::TcpListener;

    #[test]
    fn test_destination_allowed() {
        assert!(destination_allowed("localhost", 25565, 25565));
        assert!(destination_allowed("127.0.0.1", 25565, 25565));
        assert!(!destination_allowed("localhost", 25566, 25565));
        assert!(!destination_allowed("example.com", 80, 25565));
        assert!(!destination_allowed("example.com", 25565, 25565));
        assert!(!destination_allowed("::1", 25565, 25565));
    }

    /// Bind-then-drop to find a port with nothing listening on it
    async fn free_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    #[tokio::test]
    async fn test_dial_succeeds_immediately() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stream = dial_with_retry(&addr.to_string(), 3, Duration::from_millis(50)).await;
        assert!(stream.is_ok());
    }

    #[tokio::test]
    async fn test_dial_gives_up_after_max_attempts() {
        let addr = free_addr().await;

        let started = Instant::now();
        let result = dial_with_retry(&addr.to_string(), 3, Duration::from_millis(50)).await;
        assert!(matches!(
            result,
            Err(RestarterError::DialExhausted { attempts: 3, .. })
        ));
        // Two inter-attempt delays for three attempts.
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_dial_succeeds_after_retries() {
        let addr = free_addr().await;

        // The "child" starts listening only after the first attempts fail.
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let listener = TcpListener::bind(addr).await.unwrap();
            let _ = listener.accept().await;
        });

        let stream = dial_with_retry(&addr.to_string(), 10, Duration::from_millis(50)).await;
        assert!(stream.is_ok());
    }

    #[tokio::test]
    async fn test_dial_zero_attempts() {
        let addr = free_addr().await;
        let result = dial_with_retry(&addr.to_string(), 0, Duration::from_millis(10)).await;
        assert!(matches!(
            result,
            Err(RestarterError::DialExhausted { attempts: 0, .. })
        ));
    }
}
