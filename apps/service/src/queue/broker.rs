//! TCP queue broker and its client.
//!
//! The broker keeps the named lists in a [`MemoryQueue`] and speaks
//! newline-delimited JSON: one request per line, one response per line.
//!
//! ```text
//! {"op":"push","queue":"vigil.jobs","payload":"..."}  ->  {"ok":true}
//! {"op":"pop","queue":"vigil.jobs"}                    ->  {"ok":true,"payload":"..."} / {"ok":true}
//! {"op":"blocking_pop","queue":"vigil.jobs"}           ->  {"ok":true,"payload":"..."}  (once available)
//! ```
//!
//! A line longer than [`MAX_LINE_LENGTH`] gets an error response and the
//! connection is closed.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{MemoryQueue, Queue, QueueError};

/// Longest request or response line, newline excluded
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

type Connection = Framed<TcpStream, LinesCodec>;

fn framed(socket: TcpStream) -> Connection {
    Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LENGTH))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    Push { queue: String, payload: String },
    Pop { queue: String },
    BlockingPop { queue: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
struct Response {
    ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Response {
    fn payload(payload: Option<String>) -> Self {
        Self { ok: true, payload, error: None }
    }

    fn error(error: impl Into<String>) -> Self {
        Self { ok: false, payload: None, error: Some(error.into()) }
    }
}

/// Accept connections until cancelled
pub async fn serve(listener: TcpListener, queue: Arc<MemoryQueue>, cancel: CancellationToken) -> Result<(), QueueError> {
    info!(address = %listener.local_addr()?, "Queue broker listening");

    loop {
        let (socket, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept broker connection: {}", e);
                    continue;
                }
            },
        };

        let queue = queue.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, peer, queue, cancel).await {
                debug!(%peer, "Broker connection ended: {}", e);
            }
        });
    }

    info!("Queue broker stopped");
    Ok(())
}

async fn handle_connection(
    socket: TcpStream,
    peer: SocketAddr,
    queue: Arc<MemoryQueue>,
    cancel: CancellationToken,
) -> Result<(), QueueError> {
    let mut connection = framed(socket);

    while let Some(line) = connection.next().await {
        let line = match line {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!(%peer, limit = MAX_LINE_LENGTH, "Closing connection after oversized request");
                write_response(&mut connection, &Response::error("request line too long")).await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let request = match serde_json::from_str::<Request>(&line) {
            Ok(request) => request,
            Err(e) => {
                write_response(&mut connection, &Response::error(format!("invalid request: {e}"))).await?;
                continue;
            }
        };

        let response = match request {
            Request::Push { queue: name, payload } => {
                queue.push(&name, payload).await?;
                Response::payload(None)
            }
            Request::Pop { queue: name } => Response::payload(queue.pop(&name).await?),
            Request::BlockingPop { queue: name } => {
                // Waiting clients are not expected to send anything else, any
                // input (or EOF) cancels the wait so no item is taken for a
                // client that went away.
                let payload = tokio::select! {
                    payload = queue.blocking_pop(&name) => payload?,
                    _ = connection.next() => {
                        debug!(%peer, queue = %name, "Client left while waiting");
                        return Ok(());
                    }
                    _ = cancel.cancelled() => return Ok(()),
                };

                let response = Response::payload(Some(payload.clone()));
                if let Err(e) = write_response(&mut connection, &response).await {
                    warn!(%peer, queue = %name, "Failed to hand out payload, restoring it: {}", e);
                    queue.restore(&name, payload);
                    return Err(e);
                }
                continue;
            }
        };

        write_response(&mut connection, &response).await?;
    }

    Ok(())
}

async fn write_response(connection: &mut Connection, response: &Response) -> Result<(), QueueError> {
    connection.send(serde_json::to_string(response)?).await?;
    Ok(())
}

/// Client for a queue broker, one connection per operation
#[derive(Debug, Clone)]
pub struct RemoteQueue {
    address: String,
}

impl RemoteQueue {
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into() }
    }

    async fn request(&self, request: &Request) -> Result<Option<String>, QueueError> {
        let mut connection = framed(TcpStream::connect(&self.address).await?);
        connection.send(serde_json::to_string(request)?).await?;

        let reply = connection.next().await.ok_or(QueueError::Closed)??;
        let response: Response = serde_json::from_str(&reply)?;

        if response.ok {
            Ok(response.payload)
        } else {
            Err(QueueError::Broker(response.error.unwrap_or_default()))
        }
    }
}

#[async_trait::async_trait]
impl Queue for RemoteQueue {
    async fn push(&self, queue: &str, payload: String) -> Result<(), QueueError> {
        self.request(&Request::Push { queue: queue.to_string(), payload }).await?;
        Ok(())
    }

    async fn blocking_pop(&self, queue: &str) -> Result<String, QueueError> {
        self.request(&Request::BlockingPop { queue: queue.to_string() })
            .await?
            .ok_or_else(|| QueueError::Broker("blocking pop returned no payload".to_string()))
    }

    async fn pop(&self, queue: &str) -> Result<Option<String>, QueueError> {
        self.request(&Request::Pop { queue: queue.to_string() }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    async fn start_broker() -> (RemoteQueue, Arc<MemoryQueue>, CancellationToken) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let storage = Arc::new(MemoryQueue::new());
        let cancel = CancellationToken::new();
        tokio::spawn(serve(listener, storage.clone(), cancel.clone()));
        (RemoteQueue::new(address), storage, cancel)
    }

    #[test]
    fn test_request_wire_format() {
        let request = Request::BlockingPop { queue: "vigil.jobs".to_string() };
        assert_eq!(serde_json::to_string(&request).unwrap(), r#"{"op":"blocking_pop","queue":"vigil.jobs"}"#);
        assert_eq!(serde_json::to_string(&Response::payload(None)).unwrap(), r#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn test_push_and_pop_through_broker() {
        let (client, storage, cancel) = start_broker().await;

        client.push("jobs", "first".to_string()).await.unwrap();
        client.push("jobs", "second".to_string()).await.unwrap();
        assert_eq!(storage.len("jobs"), 2);

        assert_eq!(client.pop("jobs").await.unwrap().as_deref(), Some("first"));
        assert_eq!(client.blocking_pop("jobs").await.unwrap(), "second");
        assert_eq!(client.pop("jobs").await.unwrap(), None);

        cancel.cancel();
    }

    #[tokio::test]
    async fn test_blocking_pop_waits_for_remote_push() {
        let (client, _storage, cancel) = start_broker().await;

        let waiter = {
            let client = client.clone();
            tokio::spawn(async move { client.blocking_pop("results").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.push("results", "done".to_string()).await.unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(2), waiter).await.unwrap().unwrap().unwrap();
        assert_eq!(payload, "done");
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_invalid_request_is_reported() {
        let (client, _storage, cancel) = start_broker().await;

        let mut socket = TcpStream::connect(&client.address).await.unwrap();
        socket.write_all(b"{\"op\":\"shuffle\"}\n").await.unwrap();
        let mut lines = BufReader::new(socket).lines();
        let response: Response = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();

        assert!(!response.ok);
        assert!(response.error.unwrap().contains("invalid request"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_oversized_request_is_rejected() {
        let (client, storage, cancel) = start_broker().await;
        storage.push("jobs", "queued".to_string()).await.unwrap();

        // No newline: the broker has read every byte by the time it gives up
        let mut socket = TcpStream::connect(&client.address).await.unwrap();
        socket.write_all("x".repeat(MAX_LINE_LENGTH + 1).as_bytes()).await.unwrap();

        let mut lines = BufReader::new(socket).lines();
        let rejected: Response = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(!rejected.ok);
        assert_eq!(rejected.error.as_deref(), Some("request line too long"));
        assert!(lines.next_line().await.unwrap().is_none());

        assert_eq!(storage.len("jobs"), 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_unreachable_broker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let error = RemoteQueue::new(address).pop("jobs").await.unwrap_err();
        assert!(matches!(error, QueueError::Io(_)));
    }
}
