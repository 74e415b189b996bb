// src/server.rs - TCP front end exposing a registry to remote participants
//
// Each connection is served by its own task. Until it subscribes, a
// connection answers one response per request frame; after a subscribe it
// only streams updates, and the subscription ends when the peer disconnects.
//
// Pushed updates pass through a small bounded buffer, so a peer that stops
// reading makes its router subscription slow and the router's timeout, retry
// and drop policy applies. A write that cannot complete within the write
// timeout closes the connection.

use crate::config::ServerConfig;
use crate::error::{AlarmError, Result};
use crate::registry::AlarmRegistry;
use crate::router::Topic;
use crate::sink::QueueSink;
use crate::transport::protocol::{self, AlarmMessage, Request, Response};
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, info, warn};

type Connection = Framed<TcpStream, LinesCodec>;

/// Pause after a failed accept, e.g. while file descriptors are exhausted
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Per-connection limits taken from [`ServerConfig`]
#[derive(Debug, Clone, Copy)]
struct Limits {
    max_frame_length: usize,
    write_timeout: Duration,
    push_buffer: usize,
}

/// Registry process listening for broadcasters and listeners
pub struct AlarmServer {
    registry: AlarmRegistry,
    listener: TcpListener,
    limits: Limits,
}

impl AlarmServer {
    /// Bind the listening socket described by `config`
    pub async fn bind(registry: AlarmRegistry, config: &ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.bind).await.map_err(|e| {
            AlarmError::Transport(format!("cannot listen on {}: {}", config.bind, e))
        })?;
        info!("Alarm registry listening on {}", listener.local_addr()?);

        Ok(Self {
            registry,
            listener,
            limits: Limits {
                max_frame_length: config.max_frame_length,
                write_timeout: config.write_timeout(),
                push_buffer: config.push_buffer,
            },
        })
    }

    /// Address actually bound, useful when binding port 0
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> &AlarmRegistry {
        &self.registry
    }

    /// Serve connections until `shutdown` resolves
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Alarm registry server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.spawn_connection(stream, peer),
                        // Accept errors are per-connection (e.g. fd exhaustion), keep serving
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            sleep(ACCEPT_RETRY_DELAY).await;
                        }
                    }
                }
            }
        }
    }

    /// Serve connections forever
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let registry = self.registry.clone();
        let limits = self.limits;

        tokio::spawn(async move {
            debug!("Connection from {}", peer);
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
            }
            let conn = Framed::new(stream, LinesCodec::new_with_max_length(limits.max_frame_length));
            match serve(registry, conn, limits).await {
                Ok(()) => debug!("Connection from {} closed", peer),
                Err(e) => warn!("Connection from {} failed: {}", peer, e),
            }
        });
    }
}

async fn reply(conn: &mut Connection, response: &Response, limits: Limits) -> Result<()> {
    let frame = protocol::encode(response)?;
    match timeout(limits.write_timeout, conn.send(frame)).await {
        Ok(sent) => sent.map_err(AlarmError::transport),
        Err(_) => Err(AlarmError::Transport(format!(
            "peer did not accept a frame within {} ms",
            limits.write_timeout.as_millis()
        ))),
    }
}

async fn serve(registry: AlarmRegistry, mut conn: Connection, limits: Limits) -> Result<()> {
    while let Some(frame) = conn.next().await {
        let line = frame.map_err(AlarmError::transport)?;
        if line.trim().is_empty() {
            continue;
        }

        let request = match protocol::decode::<Request>(&line) {
            Ok(request) => request,
            Err(e) => {
                reply(&mut conn, &Response::rejected(&e), limits).await?;
                continue;
            }
        };

        let response = match request {
            Request::Update { alarm } => match registry.update(alarm.into()) {
                Ok(()) => Response::Ack,
                Err(e) => Response::rejected(&e),
            },
            Request::Get {
                alarm_name: Some(name),
            } => Response::Alarm {
                alarm: registry.query(&name).map(AlarmMessage::from),
            },
            Request::Get { alarm_name: None } => {
                let mut alarms: Vec<AlarmMessage> = registry
                    .query_all()
                    .into_values()
                    .map(AlarmMessage::from)
                    .collect();
                alarms.sort_by(|a, b| a.alarm_name.cmp(&b.alarm_name));
                Response::Alarms { alarms }
            }
            Request::Subscribe { alarm_name } => {
                let topic = match alarm_name {
                    Some(name) if name.is_empty() => {
                        let err = AlarmError::InvalidRecord(
                            "cannot subscribe to an empty alarm name".to_string(),
                        );
                        reply(&mut conn, &Response::rejected(&err), limits).await?;
                        continue;
                    }
                    Some(name) => Topic::Alarm(name),
                    None => Topic::All,
                };
                return stream_updates(&registry, conn, topic, limits).await;
            }
        };

        reply(&mut conn, &response, limits).await?;
    }
    Ok(())
}

/// Push every update on `topic` to the peer until it disconnects
async fn stream_updates(
    registry: &AlarmRegistry,
    mut conn: Connection,
    topic: Topic,
    limits: Limits,
) -> Result<()> {
    let (sink, mut updates) = QueueSink::new(limits.push_buffer);
    let handle = match registry.router().subscribe(topic, Arc::new(sink)) {
        Ok(handle) => handle,
        Err(e) => {
            reply(&mut conn, &Response::rejected(&e), limits).await?;
            return Err(e);
        }
    };

    let result: Result<()> = async {
        reply(&mut conn, &Response::Subscribed { subscription: handle.id() }, limits).await?;
        loop {
            tokio::select! {
                update = updates.recv() => {
                    let Some(record) = update else { break };
                    reply(&mut conn, &Response::Update { alarm: record.into() }, limits).await?;
                }
                incoming = conn.next() => {
                    match incoming {
                        // Subscribed connections carry no further requests
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(AlarmError::transport(e)),
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }
    .await;

    registry.unsubscribe(&handle);
    result
}
