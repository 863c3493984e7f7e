use bytes::BytesMut;
use log::{trace, warn};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::channel::{write_done, write_pending, WriteFuture};
use crate::error::Error;
use crate::executor::EventBase;
use crate::runtime::io::AsyncWriteExt;
use crate::runtime::net::OwnedWriteHalf;
use crate::transport::{AsyncTransport, WriteFlags};

enum WriteRequest {
    Write {
        buf: BytesMut,
        completion: oneshot::Sender<Result<(), Error>>,
    },
    ShutdownWrite {
        completion: oneshot::Sender<Result<(), Error>>,
    },
    Close {
        completion: oneshot::Sender<Result<(), Error>>,
    },
}

/// TCP implementation of [AsyncTransport].
///
/// Writes are drained by a single writer task on the owning event base, so
/// submission order equals completion order. The read half stays with the
/// bootstrap read loop, which subscribes to this transport's close signal.
pub struct TcpTransport {
    local_addr: SocketAddr,
    peer_addr: Option<SocketAddr>,
    good: AtomicBool,
    event_base: Arc<EventBase>,

    request_tx: mpsc::UnboundedSender<WriteRequest>,
    close_tx: broadcast::Sender<()>,
}

impl TcpTransport {
    /// Creates a transport over the write half of a connected TCP stream; the
    /// writer task is spawned onto `event_base`.
    pub fn new(
        writer: OwnedWriteHalf,
        local_addr: SocketAddr,
        peer_addr: Option<SocketAddr>,
        event_base: Arc<EventBase>,
    ) -> Arc<Self> {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (close_tx, _) = broadcast::channel(1);

        let transport = Arc::new(Self {
            local_addr,
            peer_addr,
            good: AtomicBool::new(true),
            event_base: event_base.clone(),
            request_tx,
            close_tx: close_tx.clone(),
        });

        // The task holds only a weak reference so the transport's lifetime is
        // governed by the pipeline that stores it.
        let weak = Arc::downgrade(&transport);
        event_base.spawn(Self::drain_writes(writer, request_rx, close_tx, weak));

        transport
    }

    async fn drain_writes(
        mut writer: OwnedWriteHalf,
        mut request_rx: mpsc::UnboundedReceiver<WriteRequest>,
        close_tx: broadcast::Sender<()>,
        transport: Weak<TcpTransport>,
    ) {
        let mark_not_good = |transport: &Weak<TcpTransport>| {
            if let Some(transport) = transport.upgrade() {
                transport.good.store(false, Ordering::SeqCst);
            }
        };

        while let Some(request) = request_rx.recv().await {
            match request {
                WriteRequest::Write { buf, completion } => {
                    match writer.write_all(&buf).await {
                        Ok(()) => {
                            trace!("socket wrote {} bytes", buf.len());
                            let _ = completion.send(Ok(()));
                        }
                        Err(err) => {
                            warn!("socket write error {}", err);
                            mark_not_good(&transport);
                            let _ = completion.send(Err(err.into()));
                            break;
                        }
                    }
                }
                WriteRequest::ShutdownWrite { completion } => {
                    let result = writer.shutdown().await.map_err(Error::from);
                    let _ = completion.send(result);
                }
                WriteRequest::Close { completion } => {
                    trace!("close socket");
                    mark_not_good(&transport);
                    let _ = close_tx.send(());
                    let _ = completion.send(Ok(()));
                    break;
                }
            }
        }
        // Dropping the writer sends FIN; requests still queued resolve as
        // broken-pipe when their completion senders drop.
    }

    /// Subscribes to the transport's close signal; the bootstrap read loop
    /// uses this to stop reading once an outbound close tears the socket down.
    pub fn subscribe_close(&self) -> broadcast::Receiver<()> {
        self.close_tx.subscribe()
    }

    fn request(&self, request: WriteRequest) -> Option<Error> {
        match self.request_tx.send(request) {
            Ok(()) => None,
            Err(_) => Some(Error::new(
                ErrorKind::BrokenPipe,
                "socket writer is gone".to_string(),
            )),
        }
    }
}

impl AsyncTransport for TcpTransport {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    fn good(&self) -> bool {
        self.good.load(Ordering::SeqCst)
    }

    fn event_base(&self) -> Arc<EventBase> {
        self.event_base.clone()
    }

    fn write_chain(&self, buf: BytesMut, _flags: WriteFlags) -> WriteFuture {
        if !self.good() {
            return write_done(Err(Error::new(
                ErrorKind::NotConnected,
                "socket is closed".to_string(),
            )));
        }
        let (completion, rx) = oneshot::channel();
        if let Some(err) = self.request(WriteRequest::Write { buf, completion }) {
            return write_done(Err(err));
        }
        write_pending(rx)
    }

    fn shutdown_write(&self) -> WriteFuture {
        let (completion, rx) = oneshot::channel();
        if let Some(err) = self.request(WriteRequest::ShutdownWrite { completion }) {
            return write_done(Err(err));
        }
        write_pending(rx)
    }

    fn close_now(&self) -> WriteFuture {
        let (completion, rx) = oneshot::channel();
        if let Some(err) = self.request(WriteRequest::Close { completion }) {
            // Already closed; a repeated close resolves as success.
            let _ = err;
            return write_done(Ok(()));
        }
        write_pending(rx)
    }

    fn close_with_reset(&self) -> WriteFuture {
        // The split write half exposes no linger control, so a reset-close
        // degrades to an immediate close.
        self.close_now()
    }
}
