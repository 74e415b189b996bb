// src/transport/tcp.rs - Client side of the JSON-lines registry protocol
//
// Requests use a short-lived connection each: connect, write one frame, read
// one frame. A subscription owns a dedicated connection whose reader task
// feeds the local sink until it is unsubscribed or the registry goes away.
// When the registry ends a subscription the sink is told through
// `AlarmSink::closed` and the handle stops reporting as subscribed.

use super::protocol::{self, AlarmMessage, Request, Response};
use super::{Query, QueryReply, Transport};
use crate::config::ClientConfig;
use crate::error::{AlarmError, Result};
use crate::record::AlarmRecord;
use crate::router::{SubscriptionHandle, Topic};
use crate::sink::AlarmSink;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, warn};

type Connection = Framed<TcpStream, LinesCodec>;
type Subscriptions = Arc<Mutex<HashMap<u64, JoinHandle<()>>>>;

/// Transport reaching a registry server over TCP
pub struct TcpTransport {
    config: ClientConfig,
    next_id: AtomicU64,
    subscriptions: Subscriptions,
}

impl TcpTransport {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Transport for the address in `ALARM_REGISTRY_ADDR`, or the default one
    pub fn from_env() -> Self {
        Self::new(ClientConfig::from_env())
    }

    pub fn registry_addr(&self) -> &str {
        &self.config.registry_addr
    }

    /// Run `op` under the request timeout, mapping expiry to a transport error
    async fn timed<T>(&self, what: &str, op: impl Future<Output = Result<T>>) -> Result<T> {
        timeout(self.config.request_timeout(), op)
            .await
            .map_err(|_| {
                AlarmError::Transport(format!(
                    "{} to {} timed out after {} ms",
                    what, self.config.registry_addr, self.config.request_timeout_ms
                ))
            })?
    }

    async fn connect(&self) -> Result<Connection> {
        let stream = self
            .timed("connect", async {
                TcpStream::connect(&self.config.registry_addr)
                    .await
                    .map_err(|e| socket_error(&self.config.registry_addr, e))
            })
            .await?;
        stream
            .set_nodelay(true)
            .map_err(|e| socket_error(&self.config.registry_addr, e))?;
        Ok(Framed::new(
            stream,
            LinesCodec::new_with_max_length(self.config.max_frame_length),
        ))
    }

    /// One request/response exchange on an already open connection
    async fn exchange(&self, conn: &mut Connection, request: &Request) -> Result<Response> {
        let frame = protocol::encode(request)?;
        self.timed("request", async {
            conn.send(frame).await.map_err(AlarmError::transport)?;
            match conn.next().await {
                Some(Ok(line)) => protocol::decode(&line),
                Some(Err(e)) => Err(AlarmError::transport(e)),
                None => Err(AlarmError::Transport(
                    "registry closed the connection".to_string(),
                )),
            }
        })
        .await
    }

    async fn call(&self, request: Request) -> Result<Response> {
        let mut conn = self.connect().await?;
        match self.exchange(&mut conn, &request).await? {
            Response::Rejected { kind, reason } => Err(Response::rejection_error(kind, reason)),
            response => Ok(response),
        }
    }
}

fn socket_error(addr: &str, err: std::io::Error) -> AlarmError {
    AlarmError::Transport(format!("cannot reach registry at {}: {}", addr, err))
}

fn unexpected(response: Response) -> AlarmError {
    AlarmError::Transport(format!("unexpected reply from registry: {:?}", response))
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, record: AlarmRecord) -> Result<()> {
        let request = Request::Update {
            alarm: AlarmMessage::from(record),
        };
        match self.call(request).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn request(&self, query: Query) -> Result<QueryReply> {
        match query {
            Query::Alarm(name) => match self.call(Request::Get { alarm_name: Some(name) }).await? {
                Response::Alarm { alarm } => Ok(QueryReply::Alarm(alarm.map(AlarmRecord::from))),
                other => Err(unexpected(other)),
            },
            Query::All => match self.call(Request::Get { alarm_name: None }).await? {
                Response::Alarms { alarms } => Ok(QueryReply::All(
                    alarms
                        .into_iter()
                        .map(|msg| (msg.alarm_name.clone(), AlarmRecord::from(msg)))
                        .collect(),
                )),
                other => Err(unexpected(other)),
            },
        }
    }

    async fn subscribe(&self, topic: Topic, sink: Arc<dyn AlarmSink>) -> Result<SubscriptionHandle> {
        let alarm_name = match &topic {
            Topic::Alarm(name) => Some(name.clone()),
            Topic::All => None,
        };

        let mut conn = self.connect().await?;
        let remote_id = match self.exchange(&mut conn, &Request::Subscribe { alarm_name }).await? {
            Response::Subscribed { subscription } => subscription,
            Response::Rejected { kind, reason } => {
                return Err(Response::rejection_error(kind, reason))
            }
            other => return Err(unexpected(other)),
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = SubscriptionHandle::new(id, topic);
        debug!(
            subscription = id,
            remote = remote_id,
            "Subscribed to {} at {}",
            handle.topic(),
            self.config.registry_addr
        );

        // Held across the spawn so a stream that ends at once cannot remove
        // its entry before it was inserted
        {
            let mut subscriptions = self.subscriptions.lock();
            let task = tokio::spawn(forward_updates(
                conn,
                sink,
                handle.clone(),
                self.subscriptions.clone(),
            ));
            subscriptions.insert(id, task);
        }
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<()> {
        if let Some(task) = self.subscriptions.lock().remove(&handle.id()) {
            // Dropping the connection ends the subscription on the registry side
            task.abort();
            debug!(subscription = handle.id(), "Unsubscribed from {}", handle.topic());
        }
        Ok(())
    }

    fn is_subscribed(&self, handle: &SubscriptionHandle) -> bool {
        self.subscriptions.lock().contains_key(&handle.id())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        for (_, task) in self.subscriptions.lock().drain() {
            task.abort();
        }
    }
}

/// Push every update frame arriving on `conn` into `sink`, then tell the
/// sink the stream is gone
async fn forward_updates(
    mut conn: Connection,
    sink: Arc<dyn AlarmSink>,
    handle: SubscriptionHandle,
    subscriptions: Subscriptions,
) {
    let reason = loop {
        let line = match conn.next().await {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                break AlarmError::Transport(format!(
                    "subscription to {} failed: {}",
                    handle.topic(),
                    e
                ))
            }
            None => {
                break AlarmError::Transport(format!(
                    "registry closed subscription to {}",
                    handle.topic()
                ))
            }
        };

        match protocol::decode::<Response>(&line) {
            Ok(Response::Update { alarm }) => {
                let record = AlarmRecord::from(alarm);
                if let Err(e) = sink.deliver(&record).await {
                    warn!(
                        subscription = handle.id(),
                        alarm = %record.alarm_name,
                        "Local delivery failed: {}",
                        e
                    );
                }
            }
            Ok(other) => debug!(subscription = handle.id(), "Ignoring frame {:?}", other),
            Err(e) => warn!(subscription = handle.id(), "Malformed frame from registry: {}", e),
        }
    };

    subscriptions.lock().remove(&handle.id());
    warn!(subscription = handle.id(), "{}", reason);
    sink.closed(&reason).await;
}
