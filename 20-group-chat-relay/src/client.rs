use std::{
    fmt::Display,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        TcpStream, ToSocketAddrs,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{
        Mutex,
        mpsc::{self, error::TrySendError},
    },
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};

use crate::{
    error::{ClientError, FrameError},
    frame::{encode_frame, read_frame},
    topic::{ClientIdentity, TopicMessage, format_message, is_for_topic},
};

/// Messages [`ChatClient::messages`] buffers for a receiver that falls behind.
pub const INBOX_CAPACITY: usize = 1024;

/// Client side of the relay protocol.
///
/// After [`connect`](Self::connect), call [`listen`](Self::listen) or
/// [`messages`](Self::messages) once to start the background read loop.
/// Sending works independently of listening.
pub struct ChatClient {
    identity: ClientIdentity,
    server: SocketAddr,
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: Arc<AtomicBool>,
}

impl ChatClient {
    pub async fn connect<A>(addr: A, identity: ClientIdentity) -> Result<Self, ClientError>
    where
        A: ToSocketAddrs + Display,
    {
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        let server = stream.peer_addr().map_err(|source| ClientError::Connect {
            addr: addr.to_string(),
            source,
        })?;
        if let Err(error) = stream.set_nodelay(true) {
            debug!(?error, "failed to set TCP_NODELAY");
        }

        info!(%server, topic = identity.topic_id(), "connected to relay");

        let (reader, writer) = stream.into_split();
        Ok(Self {
            identity,
            server,
            reader: Some(BufReader::new(reader)),
            writer: Mutex::new(Some(writer)),
            connected: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Spawns the read loop, handing every message for this client's topic to
    /// `on_message` in arrival order.
    ///
    /// The loop ends when the connection fails or closes; the client is then
    /// marked disconnected and is not reconnected.
    pub fn listen<F>(&mut self, on_message: F) -> Result<JoinHandle<()>, ClientError>
    where
        F: FnMut(TopicMessage) + Send + 'static,
    {
        let reader = self.reader.take().ok_or(ClientError::AlreadyListening)?;
        let identity = self.identity.clone();
        let connected = Arc::clone(&self.connected);
        Ok(tokio::spawn(run_listen_loop(
            reader, identity, connected, on_message,
        )))
    }

    /// Like [`listen`](Self::listen), delivering messages over a channel that
    /// closes once the client is disconnected.
    ///
    /// The channel holds at most [`INBOX_CAPACITY`] messages. When the receiver
    /// falls that far behind, newer messages are dropped with a warning rather
    /// than stalling the read loop, since stalling it would back up into the
    /// relay and get this client dropped as a slow recipient.
    pub fn messages(&mut self) -> Result<mpsc::Receiver<TopicMessage>, ClientError> {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.listen(move |message| {
            deliver(&tx, message);
        })?;
        Ok(rx)
    }

    /// Sends `body` to this client's own topic under its own sender id.
    pub async fn send(&self, body: &str) -> Result<(), ClientError> {
        self.send_as(self.identity.topic_id(), self.identity.sender_id(), body)
            .await
    }

    /// Sends `body` tagged with an arbitrary topic and sender.
    ///
    /// A write failure marks the client disconnected. Nothing is retried.
    pub async fn send_as(&self, topic_id: &str, sender_id: &str, body: &str) -> Result<(), ClientError> {
        let text = format_message(topic_id, sender_id, body)?;
        let encoded = encode_frame(&text).map_err(|err| match err {
            FrameError::FrameTooLarge(len) => ClientError::MessageTooLarge(len),
            other => ClientError::Disconnected(Some(other)),
        })?;

        if !self.is_connected() {
            return Err(ClientError::Disconnected(None));
        }

        let mut writer = self.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(ClientError::Disconnected(None));
        };

        let written = async {
            stream.write_all(&encoded).await?;
            stream.flush().await
        }
        .await;

        if let Err(error) = written {
            warn!(?error, "failed to send message");
            self.connected.store(false, Ordering::Release);
            writer.take();
            return Err(ClientError::Disconnected(Some(FrameError::Io(error))));
        }

        debug!(topic = topic_id, "message sent");
        Ok(())
    }

    /// Shuts down the write half. The relay then closes its side, which ends
    /// the read loop.
    pub async fn close(&self) -> std::io::Result<()> {
        self.connected.store(false, Ordering::Release);
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            writer.shutdown().await?;
        }
        Ok(())
    }
}

async fn run_listen_loop<F>(
    mut reader: BufReader<OwnedReadHalf>,
    identity: ClientIdentity,
    connected: Arc<AtomicBool>,
    mut on_message: F,
) where
    F: FnMut(TopicMessage),
{
    loop {
        match read_frame(&mut reader).await {
            Ok(raw) => {
                if let Some(message) = accept_frame(&identity, &raw) {
                    on_message(message);
                }
            }
            Err(FrameError::ConnectionClosed) => {
                info!("relay closed the connection");
                break;
            }
            Err(error) => {
                warn!(?error, "lost connection to relay");
                break;
            }
        }
    }

    connected.store(false, Ordering::Release);
}

/// Queues one message for [`ChatClient::messages`]; returns whether it was queued.
fn deliver(inbox: &mpsc::Sender<TopicMessage>, message: TopicMessage) -> bool {
    match inbox.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(message)) => {
            warn!(
                sender = %message.sender_id,
                capacity = INBOX_CAPACITY,
                "inbox full, dropping message"
            );
            false
        }
        // Nobody is reading any more.
        Err(TrySendError::Closed(_)) => false,
    }
}

/// Applies the topic filter and the self filter to one raw frame.
fn accept_frame(identity: &ClientIdentity, raw: &str) -> Option<TopicMessage> {
    if !is_for_topic(raw, identity.topic_id()) {
        trace!(topic = identity.topic_id(), "ignoring frame for another topic");
        return None;
    }

    let message = match TopicMessage::parse(raw) {
        Ok(message) => message,
        Err(error) => {
            warn!(%error, raw, "discarding unparsable frame");
            return None;
        }
    };

    if message.sender_id == identity.sender_id() {
        trace!("ignoring echo of own message");
        return None;
    }

    Some(message)
}
