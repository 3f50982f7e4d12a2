//! IPC client for communicating with the hopper server
//!
//! One client holds one connection. Plain requests are answered in order.
//! `watch` consumes the connection: the server closes it once the lode
//! finishes.

use std::path::PathBuf;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio_util::codec::{FramedRead, FramedWrite};

use hopper_core::ipc::{ErrorKind, IpcEvent, IpcMessage, IpcRequest, IpcResponse};
use hopper_core::{BacklogItem, Lode, Terminal};
use hopper_protocol::JsonLinesCodec;

use super::default_socket_path;

/// Failures reported by or about the server
#[derive(Error, Debug)]
pub enum ClientError {
    /// The server rejected the request
    #[error("{message}")]
    Server { kind: ErrorKind, message: String },

    /// The server hung up before answering
    #[error("Server closed the connection")]
    Closed,

    /// The server is stopping
    #[error("Server is shutting down")]
    Shutdown,

    /// A reply did not carry the expected field
    #[error("Unexpected reply from server: missing {0}")]
    MissingField(&'static str),
}

struct Connection {
    reader: FramedRead<OwnedReadHalf, JsonLinesCodec>,
    writer: FramedWrite<OwnedWriteHalf, JsonLinesCodec>,
}

/// Client for communicating with the hopper server
pub struct HopperClient {
    socket_path: PathBuf,
    connection: Option<Connection>,
}

impl HopperClient {
    /// Create a new client for the default socket
    pub fn new() -> Self {
        Self::with_socket(default_socket_path())
    }

    /// Create a new client for a custom socket
    pub fn with_socket(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            connection: None,
        }
    }

    /// Connect if not already connected
    pub async fn connect(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }

        let stream = UnixStream::connect(&self.socket_path).await.with_context(|| {
            format!(
                "Failed to connect to hopper server at {} - is it running?",
                self.socket_path.display()
            )
        })?;
        tracing::debug!("Connected to {}", self.socket_path.display());

        let (reader, writer) = stream.into_split();
        self.connection = Some(Connection {
            reader: FramedRead::new(reader, JsonLinesCodec::new()),
            writer: FramedWrite::new(writer, JsonLinesCodec::new()),
        });
        Ok(())
    }

    async fn send(&mut self, request: &IpcRequest) -> Result<()> {
        self.connect().await?;
        let Some(connection) = self.connection.as_mut() else {
            return Err(ClientError::Closed.into());
        };
        tracing::debug!("Sending {} request", request.name());
        connection.writer.send(request).await?;
        Ok(())
    }

    /// Next line from the server, `None` once it hangs up
    async fn recv(&mut self) -> Result<Option<IpcMessage>> {
        let Some(connection) = self.connection.as_mut() else {
            return Ok(None);
        };
        let next = connection.reader.next().await;
        match next {
            Some(frame) => Ok(Some(frame?.parse()?)),
            None => {
                self.connection = None;
                Ok(None)
            }
        }
    }

    /// Wait for the response to the last request
    async fn response(&mut self) -> Result<IpcResponse> {
        loop {
            match self.recv().await? {
                Some(IpcMessage::Response(response)) => return check(response),
                Some(IpcMessage::Event(IpcEvent::Shutdown)) => {
                    return Err(ClientError::Shutdown.into())
                }
                // Pushed frames are not answers
                Some(IpcMessage::Event(_)) => continue,
                None => return Err(ClientError::Closed.into()),
            }
        }
    }

    /// Send a request and wait for its successful response
    pub async fn request(&mut self, request: IpcRequest) -> Result<IpcResponse> {
        self.send(&request).await?;
        self.response().await
    }

    async fn lode_request(&mut self, request: IpcRequest) -> Result<Lode> {
        let response = self.request(request).await?;
        response
            .lode
            .ok_or_else(|| ClientError::MissingField("lode").into())
    }

    async fn item_request(&mut self, request: IpcRequest) -> Result<BacklogItem> {
        let response = self.request(request).await?;
        response
            .item
            .ok_or_else(|| ClientError::MissingField("item").into())
    }

    /// Liveness check; returns the full response for version and uptime
    pub async fn ping(&mut self) -> Result<IpcResponse> {
        self.request(IpcRequest::Ping).await
    }

    pub async fn create(
        &mut self,
        project: &str,
        scope: &str,
        title: Option<String>,
    ) -> Result<Lode> {
        self.lode_request(IpcRequest::Create {
            project: project.to_string(),
            scope: scope.to_string(),
            title,
            backlog_id: None,
        })
        .await
    }

    pub async fn get(&mut self, id: &str) -> Result<Lode> {
        self.lode_request(IpcRequest::Get { id: id.to_string() }).await
    }

    pub async fn list(&mut self, archived: bool) -> Result<Vec<Lode>> {
        let response = self.request(IpcRequest::List { archived }).await?;
        Ok(response.lodes.unwrap_or_default())
    }

    pub async fn advance(&mut self, id: &str, output: &str) -> Result<Lode> {
        self.lode_request(IpcRequest::Advance {
            id: id.to_string(),
            output: output.to_string(),
        })
        .await
    }

    pub async fn gate(&mut self, id: &str, doc: &str) -> Result<Lode> {
        self.lode_request(IpcRequest::Gate {
            id: id.to_string(),
            doc: doc.to_string(),
        })
        .await
    }

    pub async fn resume(&mut self, id: &str) -> Result<Lode> {
        self.lode_request(IpcRequest::Resume { id: id.to_string() }).await
    }

    pub async fn fail(&mut self, id: &str, reason: &str) -> Result<Lode> {
        self.lode_request(IpcRequest::Fail {
            id: id.to_string(),
            reason: reason.to_string(),
        })
        .await
    }

    pub async fn restart(&mut self, id: &str) -> Result<Lode> {
        self.lode_request(IpcRequest::Restart { id: id.to_string() }).await
    }

    pub async fn archive(&mut self, id: &str) -> Result<Lode> {
        self.lode_request(IpcRequest::Archive { id: id.to_string() }).await
    }

    pub async fn unarchive(&mut self, id: &str) -> Result<Lode> {
        self.lode_request(IpcRequest::Unarchive { id: id.to_string() }).await
    }

    pub async fn set_status(&mut self, id: &str, status: &str) -> Result<Lode> {
        self.lode_request(IpcRequest::StatusSet {
            id: id.to_string(),
            status: status.to_string(),
        })
        .await
    }

    pub async fn backlog_add(
        &mut self,
        project: &str,
        description: &str,
    ) -> Result<BacklogItem> {
        self.item_request(IpcRequest::BacklogAdd {
            project: project.to_string(),
            description: description.to_string(),
            lode_id: None,
        })
        .await
    }

    pub async fn backlog_list(&mut self) -> Result<Vec<BacklogItem>> {
        let response = self.request(IpcRequest::BacklogList).await?;
        Ok(response.items.unwrap_or_default())
    }

    pub async fn backlog_remove(&mut self, id: &str) -> Result<BacklogItem> {
        self.item_request(IpcRequest::BacklogRemove { id: id.to_string() }).await
    }

    pub async fn backlog_promote(&mut self, id: &str, scope: Option<String>) -> Result<Lode> {
        self.lode_request(IpcRequest::BacklogPromote {
            id: id.to_string(),
            scope,
        })
        .await
    }

    /// Ask the server to stop
    pub async fn shutdown(&mut self) -> Result<()> {
        self.request(IpcRequest::Shutdown).await?;
        Ok(())
    }

    /// Follow a lode until it finishes
    ///
    /// `on_update` sees the lode as it was when the watch started, then every
    /// intermediate state. The connection is closed afterwards.
    pub async fn watch<F>(&mut self, id: &str, mut on_update: F) -> Result<Terminal>
    where
        F: FnMut(&Lode),
    {
        let ack = self.request(IpcRequest::Watch { id: id.to_string() }).await?;
        if let Some(lode) = &ack.lode {
            on_update(lode);
        }

        let result = loop {
            match self.recv().await? {
                Some(IpcMessage::Event(IpcEvent::Update { lode, .. })) => on_update(&lode),
                Some(IpcMessage::Event(IpcEvent::Done { terminal })) => break Ok(terminal),
                Some(IpcMessage::Event(IpcEvent::Shutdown)) => {
                    break Err(ClientError::Shutdown.into())
                }
                Some(other) => tracing::debug!("Ignoring frame while watching: {:?}", other),
                None => break Err(ClientError::Closed.into()),
            }
        };

        self.connection = None;
        result
    }
}

impl Default for HopperClient {
    fn default() -> Self {
        Self::new()
    }
}

fn check(response: IpcResponse) -> Result<IpcResponse> {
    if response.ok {
        return Ok(response);
    }
    match response.error {
        Some(error) => Err(ClientError::Server {
            kind: error.kind,
            message: error.message,
        }
        .into()),
        None => Err(ClientError::MissingField("error").into()),
    }
}
