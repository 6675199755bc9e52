//! Bridge TCP streams to the synchronous [Socket] and [Transport] interfaces.

use futures::{
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    StreamExt,
};
use onionlink_cryptography::Address;
use onionlink_p2p::{Socket, Transport, TransportId};
use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};
use tracing::debug;

/// Size of a single read.
const READ_BUFFER: usize = 4096;

enum Outbound {
    Data(Vec<u8>),
    Close,
}

/// Outcome of a connection dialed to a contact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialed {
    Connected,
    Failed,
    Closed,
}

/// Something that happened on a connection.
pub enum Inbound {
    /// Bytes received on accepted connection `id`.
    Data(u64, Vec<u8>),
    /// Accepted connection `id` went away.
    Closed(u64),
    /// Progress of transport `id` dialed to a contact.
    Dialed(Address, TransportId, Dialed),
}

/// Write half of a TCP stream, drained by a background task.
pub struct TcpSocket {
    sender: UnboundedSender<Outbound>,
    aborted: Arc<AtomicBool>,
}

impl TcpSocket {
    fn channel() -> (Self, UnboundedReceiver<Outbound>, Arc<AtomicBool>) {
        let (sender, receiver) = mpsc::unbounded();
        let aborted = Arc::new(AtomicBool::new(false));
        let socket = Self {
            sender,
            aborted: aborted.clone(),
        };
        (socket, receiver, aborted)
    }

    pub fn spawn(writer: OwnedWriteHalf) -> Self {
        let (socket, receiver, aborted) = Self::channel();
        tokio::spawn(write(writer, receiver, aborted));
        socket
    }
}

impl Socket for TcpSocket {
    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.sender
            .unbounded_send(Outbound::Data(data.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "connection closed"))
    }

    fn close(&mut self) {
        let _ = self.sender.unbounded_send(Outbound::Close);
    }
}

impl Transport for TcpSocket {
    fn abort(&mut self) {
        self.aborted.store(true, Ordering::Relaxed);
        self.close();
    }
}

/// Write everything queued on `receiver` until the socket is closed, dropped or aborted.
async fn write(
    mut writer: OwnedWriteHalf,
    mut receiver: UnboundedReceiver<Outbound>,
    aborted: Arc<AtomicBool>,
) {
    while let Some(outbound) = receiver.next().await {
        if aborted.load(Ordering::Relaxed) {
            break;
        }
        match outbound {
            Outbound::Data(data) => {
                if let Err(err) = writer.write_all(&data).await {
                    debug!(?err, "write failed");
                    return;
                }
            }
            Outbound::Close => break,
        }
    }
    let _ = writer.shutdown().await;
}

/// Forward everything read from accepted connection `id` to `sender`.
pub fn spawn_reader(id: u64, mut reader: OwnedReadHalf, sender: UnboundedSender<Inbound>) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUFFER];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if sender
                        .unbounded_send(Inbound::Data(id, buf[..n].to_vec()))
                        .is_err()
                    {
                        return;
                    }
                }
                Err(err) => {
                    debug!(session = id, ?err, "read failed");
                    break;
                }
            }
        }
        let _ = sender.unbounded_send(Inbound::Closed(id));
    });
}

/// Connect directly to `host:port` on behalf of `address`.
///
/// Writes are queued until the connection is established. Data sent by the contact is not
/// interpreted: only the connection's lifetime is reported to `sender`.
pub fn dial(
    address: Address,
    id: TransportId,
    host: String,
    port: u16,
    sender: UnboundedSender<Inbound>,
) -> TcpSocket {
    let (socket, receiver, aborted) = TcpSocket::channel();
    tokio::spawn(async move {
        let stream = match TcpStream::connect((host.as_str(), port)).await {
            Ok(stream) => stream,
            Err(err) => {
                debug!(peer = %address, %id, ?err, "dial failed");
                let _ = sender.unbounded_send(Inbound::Dialed(address, id, Dialed::Failed));
                return;
            }
        };
        let (mut reader, writer) = stream.into_split();
        let _ = sender.unbounded_send(Inbound::Dialed(address, id, Dialed::Connected));
        tokio::spawn(write(writer, receiver, aborted));

        let mut buf = vec![0u8; READ_BUFFER];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => debug!(peer = %address, %id, n, "ignoring contact data"),
                Err(err) => {
                    debug!(peer = %address, %id, ?err, "read failed");
                    break;
                }
            }
        }
        let _ = sender.unbounded_send(Inbound::Dialed(address, id, Dialed::Closed));
    });
    socket
}
