use std::{
    io,
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    select,
    sync::{Mutex, watch},
    time::timeout,
};

use crate::{
    error::SessionError,
    frame::{read_frame, write_frame},
};

pub type SessionId = u64;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Server-side handle for one accepted connection.
///
/// The write half lives behind its own lock so a frame is always written as
/// one unit, even if two broadcasts ever target the session at once. The read
/// half is handed out separately as a [`SessionReader`] owned by the
/// connection's task.
pub struct Session {
    id: SessionId,
    peer: Option<SocketAddr>,
    writer: Mutex<Option<BoxedWriter>>,
    closed: AtomicBool,
    close_signal: watch::Sender<bool>,
    write_timeout: Duration,
}

impl Session {
    pub fn new<W>(id: SessionId, peer: Option<SocketAddr>, writer: W, write_timeout: Duration) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (close_signal, _) = watch::channel(false);
        let writer: BoxedWriter = Box::new(writer);
        Self {
            id,
            peer,
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
            close_signal,
            write_timeout,
        }
    }

    /// Wraps the read half of this session's connection.
    pub fn reader<R>(&self, reader: R) -> SessionReader<R>
    where
        R: AsyncRead + Unpin,
    {
        SessionReader {
            id: self.id,
            reader,
            closed: self.close_signal.subscribe(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Writes one frame to the client, giving up after the write timeout.
    pub async fn send(&self, text: &str) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed(self.id));
        }

        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(SessionError::Closed(self.id));
        };

        match timeout(self.write_timeout, write_frame(writer, text)).await {
            Ok(result) => result.map_err(SessionError::from),
            Err(_) => Err(SessionError::WriteTimeout {
                id: self.id,
                timeout: self.write_timeout,
            }),
        }
    }

    /// Closes the session.
    ///
    /// Returns `Ok(true)` for the call that actually closed it and `Ok(false)`
    /// for every later call. A pending [`SessionReader::read_next`] returns
    /// [`SessionError::Closed`] as soon as the first call starts.
    pub async fn close(&self) -> io::Result<bool> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        self.close_signal.send_replace(true);

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            writer.shutdown().await?;
        }
        Ok(true)
    }
}

/// Read half of a [`Session`].
pub struct SessionReader<R> {
    id: SessionId,
    reader: R,
    closed: watch::Receiver<bool>,
}

impl<R> SessionReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Waits for the next frame from the client.
    ///
    /// Any error ends the session: EOF, reset, a malformed frame, or the
    /// session being closed from elsewhere. Once closed, frames already
    /// buffered on the socket are never returned.
    pub async fn read_next(&mut self) -> Result<String, SessionError> {
        select! {
            biased;
            _ = self.closed.wait_for(|closed| *closed) => Err(SessionError::Closed(self.id)),
            frame = read_frame(&mut self.reader) => frame.map_err(SessionError::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::FrameError, frame::write_frame};

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn send_writes_a_frame() {
        let (writer, mut client) = tokio::io::duplex(64);
        let session = Session::new(1, None, writer, TIMEOUT);

        session.send("hola").await.expect("send");

        assert_eq!(read_frame(&mut client).await.expect("read"), "hola");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_later_sends() {
        let (writer, _client) = tokio::io::duplex(64);
        let session = Session::new(7, None, writer, TIMEOUT);

        assert!(session.close().await.expect("first close"));
        assert!(!session.close().await.expect("second close"));
        assert!(session.is_closed());

        let err = session.send("late").await.unwrap_err();
        assert!(matches!(err, SessionError::Closed(7)));
    }

    #[tokio::test]
    async fn close_unblocks_pending_read() {
        let (writer, _client_reader) = tokio::io::duplex(64);
        let (reader, _client_writer) = tokio::io::duplex(64);
        let session = Session::new(3, None, writer, TIMEOUT);
        let mut reader = session.reader(reader);

        let pending = tokio::spawn(async move { reader.read_next().await });
        tokio::task::yield_now().await;
        session.close().await.expect("close");

        let result = tokio::time::timeout(TIMEOUT, pending)
            .await
            .expect("read_next should return after close")
            .expect("reader task");
        assert!(matches!(result, Err(SessionError::Closed(3))));
    }

    #[tokio::test]
    async fn closed_session_does_not_yield_buffered_frames() {
        let (writer, _client_reader) = tokio::io::duplex(64);
        let (reader, mut client_writer) = tokio::io::duplex(4096);
        let session = Session::new(6, None, writer, TIMEOUT);
        let mut reader = session.reader(reader);

        for seq in 0..50 {
            write_frame(&mut client_writer, &format!("queued-{seq}"))
                .await
                .expect("write");
        }
        session.close().await.expect("close");

        for _ in 0..50 {
            let err = reader.read_next().await.unwrap_err();
            assert!(matches!(err, SessionError::Closed(6)));
        }
    }

    #[tokio::test]
    async fn read_next_reports_eof_as_connection_closed() {
        let (writer, _client_reader) = tokio::io::duplex(64);
        let (reader, mut client_writer) = tokio::io::duplex(64);
        let session = Session::new(4, None, writer, TIMEOUT);
        let mut reader = session.reader(reader);

        write_frame(&mut client_writer, "last words").await.expect("write");
        drop(client_writer);

        assert_eq!(reader.read_next().await.expect("frame"), "last words");
        let err = reader.read_next().await.unwrap_err();
        assert!(matches!(err, SessionError::Frame(FrameError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn stalled_client_times_out() {
        // The client never reads, so the duplex buffer fills before the frame is written.
        let (writer, _client) = tokio::io::duplex(8);
        let session = Session::new(5, None, writer, Duration::from_millis(50));

        let err = session
            .send("a frame that does not fit in eight bytes")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::WriteTimeout { id: 5, .. }));
    }
}
