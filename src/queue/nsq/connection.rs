//! A single broker connection: handshake, identify and auth

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use super::codec::{Command, Frame, NsqCodec, MAGIC_V2};
use crate::queue::QueueError;

/// Client settings sent to the broker on connect
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub client_id: String,
    pub hostname: String,
    pub user_agent: String,
    pub heartbeat_interval: Duration,

    /// Server-side visibility timeout for messages delivered to this client
    pub msg_timeout: Duration,

    pub connect_timeout: Duration,
    pub auth_secret: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let hostname = crate::utils::local_hostname();
        Self {
            client_id: hostname.split('.').next().unwrap_or("client").to_string(),
            hostname,
            user_agent: crate::utils::user_agent("client"),
            heartbeat_interval: Duration::from_secs(30),
            msg_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            auth_secret: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct IdentifyBody<'a> {
    client_id: &'a str,
    hostname: &'a str,
    user_agent: &'a str,
    heartbeat_interval: u64,
    msg_timeout: u64,
    feature_negotiation: bool,
}

/// Negotiated settings returned by the broker
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdentifyResponse {
    pub max_rdy_count: u64,
    pub version: String,
    pub msg_timeout: u64,
    pub auth_required: bool,
}

/// Reply to a successful AUTH
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthResponse {
    pub identity: String,
    pub identity_url: String,
    pub permission_count: u32,
}

/// An established, identified connection to one nsqd
pub struct NsqConnection {
    framed: Framed<TcpStream, NsqCodec>,
    addr: String,
    negotiated: IdentifyResponse,
}

impl NsqConnection {
    /// Connect, send the protocol magic, IDENTIFY and, when required, AUTH
    pub async fn connect(addr: &str, config: &ConnectionConfig) -> Result<Self, QueueError> {
        let mut stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                QueueError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connecting to {addr} timed out"),
                ))
            })??;
        stream.set_nodelay(true)?;
        stream.write_all(MAGIC_V2).await?;

        let mut conn = Self {
            framed: Framed::new(stream, NsqCodec::new()),
            addr: addr.to_string(),
            negotiated: IdentifyResponse::default(),
        };

        conn.negotiated = conn.identify(config).await?;
        debug!(
            addr,
            version = %conn.negotiated.version,
            max_rdy_count = conn.negotiated.max_rdy_count,
            "Identified with broker"
        );

        match (&config.auth_secret, conn.negotiated.auth_required) {
            (Some(secret), true) => {
                let auth = conn.auth(secret).await?;
                debug!(addr, identity = %auth.identity, permissions = auth.permission_count, "Authenticated with broker");
            }
            (None, true) => {
                return Err(QueueError::Auth(format!(
                    "broker at {addr} requires auth but no secret is configured"
                )));
            }
            (Some(_), false) => {
                warn!(addr, "Auth secret configured but broker does not require auth");
            }
            (None, false) => {}
        }

        Ok(conn)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn negotiated(&self) -> &IdentifyResponse {
        &self.negotiated
    }

    async fn identify(&mut self, config: &ConnectionConfig) -> Result<IdentifyResponse, QueueError> {
        let body = serde_json::to_vec(&IdentifyBody {
            client_id: &config.client_id,
            hostname: &config.hostname,
            user_agent: &config.user_agent,
            heartbeat_interval: config.heartbeat_interval.as_millis() as u64,
            msg_timeout: config.msg_timeout.as_millis() as u64,
            feature_negotiation: true,
        })?;

        self.send(Command::Identify(Bytes::from(body))).await?;
        let response = self.read_response().await?;

        // Brokers that ignore feature negotiation answer with a bare OK
        if response.as_ref() == super::codec::OK {
            return Ok(IdentifyResponse::default());
        }
        Ok(serde_json::from_slice(&response)?)
    }

    async fn auth(&mut self, secret: &str) -> Result<AuthResponse, QueueError> {
        self.send(Command::Auth(Bytes::copy_from_slice(secret.as_bytes())))
            .await?;

        match self.read_response().await {
            Ok(body) => Ok(serde_json::from_slice(&body)?),
            Err(QueueError::Broker(message)) => Err(QueueError::Auth(message)),
            Err(e) => Err(e),
        }
    }

    /// Write one command and flush it
    pub async fn send(&mut self, command: Command) -> Result<(), QueueError> {
        self.framed.send(command).await
    }

    /// Next frame from the broker; `ConnectionClosed` at end of stream
    pub async fn next_frame(&mut self) -> Result<Frame, QueueError> {
        match self.framed.next().await {
            Some(frame) => frame,
            None => Err(QueueError::ConnectionClosed),
        }
    }

    /// Read until a non-heartbeat response, answering heartbeats on the way
    pub async fn read_response(&mut self) -> Result<Bytes, QueueError> {
        loop {
            match self.next_frame().await? {
                frame if frame.is_heartbeat() => self.send(Command::Nop).await?,
                Frame::Response(body) => return Ok(body),
                Frame::Error(body) => {
                    return Err(QueueError::Broker(String::from_utf8_lossy(&body).into_owned()))
                }
                Frame::Message(msg) => {
                    return Err(QueueError::Protocol(format!(
                        "unexpected message {} while awaiting a response",
                        msg.id
                    )))
                }
            }
        }
    }

    /// Ask the broker to close the connection cleanly
    pub async fn close(mut self) -> Result<(), QueueError> {
        self.send(Command::Cls).await?;
        // CLOSE_WAIT, possibly preceded by in-flight frames
        let _ = tokio::time::timeout(Duration::from_secs(1), self.read_response()).await;
        Ok(())
    }

    /// Give up the connection for split reading and writing
    pub fn into_framed(self) -> Framed<TcpStream, NsqCodec> {
        self.framed
    }
}
