//! Per-connection request/response loop
//!
//! Each connection reads one JSON line at a time and answers it before
//! reading the next. A `subscribe` request turns the connection into a
//! dashboard feed that keeps accepting requests; a `watch` request turns it
//! into a single-lode feed that closes once the lode finishes.

use std::sync::Arc;

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio_util::codec::{FramedRead, FramedWrite};

use hopper_core::ipc::{ErrorKind, IpcEvent, IpcRequest, IpcResponse};
use hopper_core::workflow::Transition;
use hopper_core::{HopperError, LodeId, Terminal};
use hopper_protocol::{Frame, JsonLinesCodec, ProtocolError};

use crate::hub::{Broadcast, Change, Subscription};
use crate::state::ServerState;
use crate::store::{OwnerId, Watch};

type Writer = FramedWrite<OwnedWriteHalf, JsonLinesCodec>;

/// What this connection is subscribed to
enum Feed {
    Dashboard(Subscription),
    Watch { id: LodeId, subscription: Subscription },
}

impl Feed {
    fn subscription(&mut self) -> &mut Subscription {
        match self {
            Feed::Dashboard(subscription) => subscription,
            Feed::Watch { subscription, .. } => subscription,
        }
    }

    /// The watched lode, or `None` for a dashboard feed
    fn watched(&self) -> Option<LodeId> {
        match self {
            Feed::Dashboard(_) => None,
            Feed::Watch { id, .. } => Some(id.clone()),
        }
    }
}

/// Whether the loop keeps reading after a message
enum Flow {
    Continue,
    Close,
}

async fn next_broadcast(feed: &mut Option<Feed>) -> Option<Arc<Broadcast>> {
    match feed {
        Some(feed) => feed.subscription().recv().await,
        None => std::future::pending().await,
    }
}

async fn send<T: Serialize>(writer: &mut Writer, message: T) -> Result<()> {
    writer.send(message).await?;
    Ok(())
}

/// Serve one client until it disconnects, finishes a watch, or the server stops
pub async fn handle_client(stream: UnixStream, state: Arc<ServerState>) -> Result<()> {
    let conn_id = state.next_connection_id();
    let codec = JsonLinesCodec::with_max_length(state.config.max_frame_bytes);
    let (reader, writer) = stream.into_split();
    let mut reader = FramedRead::new(reader, codec.clone());
    let mut writer = FramedWrite::new(writer, codec);
    let mut feed: Option<Feed> = None;

    tracing::debug!("Connection {} opened", conn_id);

    let result = async {
        loop {
            tokio::select! {
                frame = reader.next() => {
                    let flow = match frame {
                        None => Flow::Close,
                        Some(Ok(frame)) => {
                            handle_frame(frame, &state, conn_id, &mut feed, &mut writer).await?
                        }
                        Some(Err(e)) => reject_stream(e, conn_id, &mut writer).await?,
                    };
                    if let Flow::Close = flow {
                        break;
                    }
                }

                broadcast = next_broadcast(&mut feed) => {
                    let Some(broadcast) = broadcast else {
                        tracing::warn!("Connection {} fell behind and was dropped", conn_id);
                        break;
                    };
                    let watched = feed.as_ref().and_then(Feed::watched);
                    if let Flow::Close = forward(&broadcast, watched, &mut writer).await? {
                        break;
                    }
                }

                _ = state.shutdown.cancelled() => {
                    if feed.is_some() {
                        // Best effort; the peer may already be gone
                        let _ = send(&mut writer, IpcEvent::Shutdown).await;
                    }
                    break;
                }
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    drop(feed);
    state.store.release(conn_id);
    tracing::debug!("Connection {} closed", conn_id);
    result
}

/// Answer a decoder failure; only malformed-but-bounded input is survivable
async fn reject_stream(
    error: ProtocolError,
    conn_id: OwnerId,
    writer: &mut Writer,
) -> Result<Flow> {
    tracing::warn!("Connection {}: {}", conn_id, error);
    let flow = if error.is_recoverable() {
        Flow::Continue
    } else {
        Flow::Close
    };

    // Best effort; after an I/O error the peer is usually gone
    let response = IpcResponse::error(HopperError::from(error).to_payload());
    let _ = send(writer, response).await;
    Ok(flow)
}

async fn handle_frame(
    frame: Frame,
    state: &ServerState,
    conn_id: OwnerId,
    feed: &mut Option<Feed>,
    writer: &mut Writer,
) -> Result<Flow> {
    let request = match frame.parse::<IpcRequest>() {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("Connection {} sent a malformed request: {}", conn_id, e);
            tracing::debug!("Rejected frame: {}", frame.text());
            send(writer, IpcResponse::error(HopperError::from(e).to_payload())).await?;
            return Ok(Flow::Continue);
        }
    };

    tracing::debug!("Connection {} request: {}", conn_id, request.name());

    match request {
        IpcRequest::Subscribe => {
            if feed.is_some() {
                send(writer, already_subscribed()).await?;
                return Ok(Flow::Continue);
            }
            let (snapshot, subscription) = state.store.subscribe();
            send(
                writer,
                IpcResponse {
                    seq: Some(snapshot.seq),
                    ..IpcResponse::ok()
                },
            )
            .await?;
            send(writer, IpcEvent::Snapshot(snapshot)).await?;
            *feed = Some(Feed::Dashboard(subscription));
            Ok(Flow::Continue)
        }

        IpcRequest::Watch { id } => {
            if feed.is_some() {
                send(writer, already_subscribed()).await?;
                return Ok(Flow::Continue);
            }
            match state.store.watch(&id) {
                Ok((lode, Watch::Finished(terminal))) => {
                    send(writer, IpcResponse::with_lode(lode)).await?;
                    send(writer, IpcEvent::Done { terminal }).await?;
                    Ok(Flow::Close)
                }
                Ok((lode, Watch::Streaming(subscription))) => {
                    let id = lode.id.clone();
                    send(writer, IpcResponse::with_lode(lode)).await?;
                    *feed = Some(Feed::Watch { id, subscription });
                    Ok(Flow::Continue)
                }
                Err(e) => {
                    send(writer, error_response(&e, conn_id)).await?;
                    Ok(Flow::Continue)
                }
            }
        }

        request => {
            let response = match handle_request(request, state, conn_id) {
                Ok(response) => response,
                Err(e) => error_response(&e, conn_id),
            };
            send(writer, response).await?;
            Ok(Flow::Continue)
        }
    }
}

/// Push one broadcast to this connection's client
async fn forward(
    broadcast: &Broadcast,
    watched: Option<LodeId>,
    writer: &mut Writer,
) -> Result<Flow> {
    let Some(id) = watched else {
        send(writer, broadcast.to_event()).await?;
        return Ok(Flow::Continue);
    };

    let Some(lode) = broadcast.lode().filter(|l| l.id == id) else {
        return Ok(Flow::Continue);
    };

    send(
        writer,
        IpcEvent::Update {
            seq: broadcast.seq,
            lode: lode.clone(),
        },
    )
    .await?;

    let terminal = match broadcast.change {
        Change::LodeArchived(_) => Some(Terminal::Archived),
        _ => lode.terminal(),
    };
    match terminal {
        Some(terminal) => {
            send(writer, IpcEvent::Done { terminal }).await?;
            Ok(Flow::Close)
        }
        None => Ok(Flow::Continue),
    }
}

fn already_subscribed() -> IpcResponse {
    let error = HopperError::Validation("connection is already subscribed".to_string());
    IpcResponse::error(error.to_payload())
}

fn error_response(error: &HopperError, conn_id: OwnerId) -> IpcResponse {
    match error.kind() {
        ErrorKind::Persistence => tracing::warn!("Connection {}: {}", conn_id, error),
        _ => tracing::debug!("Connection {}: {}", conn_id, error),
    }
    IpcResponse::error(error.to_payload())
}

fn lode_reply((lode, _): (hopper_core::Lode, hopper_core::Effect)) -> IpcResponse {
    IpcResponse::with_lode(lode)
}

/// Plain request/response operations
fn handle_request(
    request: IpcRequest,
    state: &ServerState,
    conn_id: OwnerId,
) -> Result<IpcResponse, HopperError> {
    let store = &state.store;

    let response = match request {
        IpcRequest::Ping => IpcResponse {
            pong: Some(true),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            started_at: Some(state.started_at),
            seq: Some(store.seq()),
            ..IpcResponse::ok()
        },

        IpcRequest::Create {
            project,
            scope,
            title,
            backlog_id,
        } => lode_reply(store.create(&project, &scope, title, backlog_id.as_deref())?),

        IpcRequest::Get { id } => IpcResponse {
            lode: Some(store.get(&id)?),
            ..IpcResponse::ok()
        },

        IpcRequest::List { archived } => IpcResponse {
            lodes: Some(store.list(archived)),
            ..IpcResponse::ok()
        },

        IpcRequest::Advance { id, output } => {
            lode_reply(store.transition(&id, Transition::Advance { output })?)
        }

        IpcRequest::Gate { id, doc } => {
            lode_reply(store.transition(&id, Transition::Gate { doc })?)
        }

        IpcRequest::Resume { id } => lode_reply(store.transition(&id, Transition::Resume)?),

        IpcRequest::Fail { id, reason } => {
            lode_reply(store.transition(&id, Transition::Fail { reason })?)
        }

        IpcRequest::Restart { id } => lode_reply(store.transition(&id, Transition::Restart)?),

        IpcRequest::Archive { id } => IpcResponse::with_lode(store.archive(&id)?),

        IpcRequest::Unarchive { id } => IpcResponse::with_lode(store.unarchive(&id)?),

        IpcRequest::StatusSet { id, status } => {
            lode_reply(store.transition(&id, Transition::SetStatus { status })?)
        }

        IpcRequest::Attach { id, window_ref } => {
            IpcResponse::with_lode(store.attach(&id, window_ref, conn_id)?)
        }

        IpcRequest::BacklogAdd {
            project,
            description,
            lode_id,
        } => IpcResponse::with_item(store.backlog_add(&project, &description, lode_id.as_deref())?),

        IpcRequest::BacklogList => IpcResponse {
            items: Some(store.backlog()),
            ..IpcResponse::ok()
        },

        IpcRequest::BacklogRemove { id } => IpcResponse::with_item(store.backlog_remove(&id)?),

        IpcRequest::BacklogPromote { id, scope } => {
            lode_reply(store.promote(&id, scope.as_deref())?)
        }

        IpcRequest::Shutdown => {
            tracing::info!("Shutdown requested via IPC");
            state.shutdown.cancel();
            IpcResponse::ok()
        }

        // Feed requests are handled before dispatch
        IpcRequest::Subscribe | IpcRequest::Watch { .. } => already_subscribed(),
    };

    Ok(response)
}
