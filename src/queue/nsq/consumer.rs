//! Subscription loop delivering messages to a [`MessageHandler`]

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::codec::{is_valid_name, Command, Frame, NsqCodec};
use super::connection::{ConnectionConfig, NsqConnection};
use crate::queue::{HandlerOutcome, Message, MessageHandler, QueueError};
use crate::utils::retry::{with_retry_if, RetryPolicy};

type Sink = SplitSink<Framed<TcpStream, NsqCodec>, Command>;
type Stream = SplitStream<Framed<TcpStream, NsqCodec>>;

/// Consumer settings
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub topic: String,
    pub channel: String,

    /// RDY count advertised to the broker. Messages are still handled one at
    /// a time; extras wait in a local buffer.
    pub max_in_flight: u32,

    pub connection: ConnectionConfig,

    /// Send TOUCH for the in-flight message at this interval while its
    /// handler runs
    pub touch_interval: Option<Duration>,

    /// Backoff between reconnect attempts
    pub reconnect: RetryPolicy,
}

impl ConsumerConfig {
    pub fn new(topic: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            channel: channel.into(),
            max_in_flight: 1,
            connection: ConnectionConfig::default(),
            touch_interval: None,
            reconnect: RetryPolicy {
                initial_interval: Duration::from_secs(1),
                max_interval: Duration::from_secs(60),
                max_elapsed_time: None,
                ..Default::default()
            },
        }
    }
}

enum SessionEnd {
    Cancelled,
    Disconnected(QueueError),
}

/// NSQ consumer bound to one nsqd
pub struct NsqConsumer<H> {
    addr: String,
    config: ConsumerConfig,
    handler: H,
}

impl<H: MessageHandler> NsqConsumer<H> {
    pub fn new(addr: impl Into<String>, config: ConsumerConfig, handler: H) -> Self {
        Self {
            addr: addr.into(),
            config,
            handler,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Consume until cancelled
    ///
    /// Connection losses are retried with backoff. Returns an error only for
    /// failures a reconnect cannot fix, such as rejected credentials.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), QueueError> {
        if !is_valid_name(&self.config.topic) || !is_valid_name(&self.config.channel) {
            return Err(QueueError::Protocol(format!(
                "invalid topic/channel {}/{}",
                self.config.topic, self.config.channel
            )));
        }

        loop {
            let connect = with_retry_if(
                &self.config.reconnect,
                || self.subscribe(),
                QueueError::is_recoverable,
                |e, wait| warn!(addr = %self.addr, error = %e, ?wait, "Consumer connect failed, retrying"),
            );

            let (sink, stream) = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = connect => result.map_err(|e| e.into_inner())?,
            };

            info!(
                addr = %self.addr,
                topic = %self.config.topic,
                channel = %self.config.channel,
                "Consumer subscribed"
            );

            match self.session(sink, stream, &cancel).await {
                SessionEnd::Cancelled => return Ok(()),
                SessionEnd::Disconnected(e) if e.is_recoverable() => {
                    warn!(addr = %self.addr, error = %e, "Consumer disconnected, reconnecting");
                }
                SessionEnd::Disconnected(e) => return Err(e),
            }
        }
    }

    async fn subscribe(&self) -> Result<(Sink, Stream), QueueError> {
        let mut conn = NsqConnection::connect(&self.addr, &self.config.connection).await?;
        conn.send(Command::Sub {
            topic: self.config.topic.clone(),
            channel: self.config.channel.clone(),
        })
        .await?;
        conn.read_response().await?;
        conn.send(Command::Rdy(self.config.max_in_flight)).await?;
        Ok(conn.into_framed().split())
    }

    async fn session(&self, mut sink: Sink, mut stream: Stream, cancel: &CancellationToken) -> SessionEnd {
        let mut pending: VecDeque<Message> = VecDeque::new();

        loop {
            let message = match pending.pop_front() {
                Some(message) => message,
                None => {
                    let frame = tokio::select! {
                        _ = cancel.cancelled() => {
                            let _ = sink.send(Command::Cls).await;
                            return SessionEnd::Cancelled;
                        }
                        frame = stream.next() => frame,
                    };
                    match frame {
                        Some(Ok(Frame::Message(message))) => message,
                        Some(Ok(frame)) => {
                            if let Err(e) = answer_control_frame(&mut sink, frame).await {
                                return SessionEnd::Disconnected(e);
                            }
                            continue;
                        }
                        Some(Err(e)) => return SessionEnd::Disconnected(e),
                        None => return SessionEnd::Disconnected(QueueError::ConnectionClosed),
                    }
                }
            };

            match self
                .process(&message, &mut sink, &mut stream, &mut pending, cancel)
                .await
            {
                Ok(Some(outcome)) => {
                    let command = match outcome {
                        HandlerOutcome::Finish => Command::Fin(message.id),
                        HandlerOutcome::Requeue(delay) => Command::Req {
                            id: message.id,
                            delay,
                        },
                    };
                    if let Err(e) = sink.send(command).await {
                        return SessionEnd::Disconnected(e);
                    }
                }
                // Abandoned in flight; the broker redelivers after its timeout
                Ok(None) => return SessionEnd::Cancelled,
                Err(e) => return SessionEnd::Disconnected(e),
            }
        }
    }

    /// Run the handler while keeping the connection alive
    ///
    /// Returns `Ok(None)` when cancelled before the handler finished.
    async fn process(
        &self,
        message: &Message,
        sink: &mut Sink,
        stream: &mut Stream,
        pending: &mut VecDeque<Message>,
        cancel: &CancellationToken,
    ) -> Result<Option<HandlerOutcome>, QueueError> {
        debug!(id = %message.id, attempts = message.attempts, "Handling message");

        let handled = self.handler.handle(message);
        tokio::pin!(handled);

        let mut touch = self
            .config
            .touch_interval
            .map(|every| tokio::time::interval_at(tokio::time::Instant::now() + every, every));

        loop {
            tokio::select! {
                outcome = &mut handled => return Ok(Some(outcome)),
                _ = cancel.cancelled() => {
                    warn!(id = %message.id, "Shutdown requested, abandoning in-flight message");
                    return Ok(None);
                }
                frame = stream.next() => match frame {
                    Some(Ok(Frame::Message(next))) => pending.push_back(next),
                    Some(Ok(frame)) => answer_control_frame(sink, frame).await?,
                    Some(Err(e)) => return Err(e),
                    None => return Err(QueueError::ConnectionClosed),
                },
                _ = next_touch(&mut touch) => {
                    debug!(id = %message.id, "Touching in-flight message");
                    sink.send(Command::Touch(message.id)).await?;
                }
            }
        }
    }
}

async fn next_touch(touch: &mut Option<tokio::time::Interval>) {
    match touch {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn answer_control_frame(sink: &mut Sink, frame: Frame) -> Result<(), QueueError> {
    match frame {
        frame if frame.is_heartbeat() => sink.send(Command::Nop).await,
        Frame::Response(body) => {
            debug!(response = %String::from_utf8_lossy(&body), "Broker response");
            Ok(())
        }
        // E_FIN_FAILED and friends are per-message; the connection stays usable
        Frame::Error(body) => {
            error!(error = %String::from_utf8_lossy(&body), "Broker error frame");
            Ok(())
        }
        Frame::Message(_) => Ok(()),
    }
}
