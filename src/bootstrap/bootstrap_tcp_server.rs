use log::{trace, warn};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use waitgroup::WaitGroup;

use bytes::BytesMut;

use super::{process_pipeline, Bootstrap, PipelineFactoryFn};
use crate::channel::InboundPipeline;
use crate::error::Error;
use crate::executor::{EventBase, EventBasePool};
use crate::runtime::net::{TcpListener, TcpStream, ToSocketAddrs};
use crate::transport::{AsyncTransport, TcpTransport};

/// A bootstrap that makes it easy to create pipelines for TCP servers.
///
/// The accept loop runs on a dedicated acceptor base; every accepted socket is
/// re-registered on a connection base (pool round-robin, or the acceptor base
/// itself when no pool was supplied) where its pipeline is built and read.
pub struct BootstrapTcpServer<W: Send + Sync + 'static> {
    bootstrap: Bootstrap<W>,
    acceptor_base: StdMutex<Option<Arc<EventBase>>>,
}

impl<W: Send + Sync + 'static> Default for BootstrapTcpServer<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Send + Sync + 'static> BootstrapTcpServer<W> {
    /// Creates a new BootstrapTcpServer
    pub fn new() -> Self {
        Self {
            bootstrap: Bootstrap::new(),
            acceptor_base: StdMutex::new(None),
        }
    }

    /// Sets the read chunk size, default is 2048 bytes
    pub fn max_payload_size(&mut self, max_payload_size: usize) -> &mut Self {
        self.bootstrap.max_payload_size(max_payload_size);
        self
    }

    /// Supplies the I/O thread pool used for accepted connections.
    pub fn event_base_pool(&mut self, pool: Arc<EventBasePool>) -> &mut Self {
        self.bootstrap.event_base_pool(pool);
        self
    }

    /// Creates pipeline instances from when calling [BootstrapTcpServer::bind].
    pub fn pipeline(&mut self, pipeline_factory_fn: PipelineFactoryFn<W>) -> &mut Self {
        self.bootstrap.pipeline(pipeline_factory_fn);
        self
    }

    /// Binds the listener and starts accepting connections. Returns the bound
    /// local address.
    pub async fn bind<A: ToSocketAddrs + Send + 'static>(
        &mut self,
        addr: A,
    ) -> Result<SocketAddr, Error> {
        let factory = self.bootstrap.factory()?;
        let pool = self.bootstrap.pool();
        let max_payload_size = self.bootstrap.payload_size();

        let acceptor_base = {
            let mut base = self.acceptor_base.lock().unwrap();
            if base.is_none() {
                *base = Some(EventBase::new("acceptor")?);
            }
            base.clone().unwrap()
        };

        let (close_tx, mut close_rx) = self.bootstrap.new_close_signal();
        let worker = self.bootstrap.new_worker();

        let fallback_base = acceptor_base.clone();
        acceptor_base
            .run_and_wait(async move {
                let listener = TcpListener::bind(addr).await?;
                let local_addr = listener.local_addr()?;

                tokio::task::spawn_local(async move {
                    let _w = worker;

                    let child_wg = WaitGroup::new();
                    loop {
                        tokio::select! {
                            _ = close_rx.recv() => {
                                trace!("listener exit loop");
                                break;
                            }
                            res = listener.accept() => {
                                match res {
                                    Ok((socket, peer_addr)) => {
                                        // Re-register the socket on the
                                        // connection base so all of its I/O
                                        // stays on that thread.
                                        let std_socket = match socket.into_std() {
                                            Ok(socket) => socket,
                                            Err(err) => {
                                                warn!("accepted socket detach error {}", err);
                                                continue;
                                            }
                                        };

                                        let connection_base = pool
                                            .as_ref()
                                            .map(|pool| pool.next_base())
                                            .unwrap_or_else(|| fallback_base.clone());
                                        let base = connection_base.clone();
                                        let factory = factory.clone();
                                        let conn_close_rx = close_tx.subscribe();
                                        let child_worker = child_wg.worker();

                                        connection_base.spawn(async move {
                                            let socket = match TcpStream::from_std(std_socket) {
                                                Ok(socket) => socket,
                                                Err(err) => {
                                                    warn!("accepted socket attach error {}", err);
                                                    return;
                                                }
                                            };
                                            let local_addr = match socket.local_addr() {
                                                Ok(local_addr) => local_addr,
                                                Err(err) => {
                                                    warn!("accepted socket addr error {}", err);
                                                    return;
                                                }
                                            };
                                            let (reader, writer) = socket.into_split();

                                            let transport = TcpTransport::new(
                                                writer,
                                                local_addr,
                                                Some(peer_addr),
                                                base,
                                            );
                                            let transport_close_rx = transport.subscribe_close();

                                            let dyn_transport: Arc<dyn AsyncTransport> = transport;
                                            let pipeline = (factory)(dyn_transport).await;
                                            pipeline.transport_active().await;

                                            let inbound: Arc<dyn InboundPipeline<BytesMut>> =
                                                pipeline;
                                            process_pipeline(
                                                reader,
                                                inbound,
                                                conn_close_rx,
                                                transport_close_rx,
                                                child_worker,
                                                max_payload_size,
                                            )
                                            .await;
                                        });
                                    }
                                    Err(err) => {
                                        warn!("listener accept error {}", err);
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    child_wg.wait().await;
                });

                Ok(local_addr)
            })
            .await?
    }

    /// Stops the server
    pub fn stop(&self) {
        self.bootstrap.stop();
    }

    /// Gracefully stops the server, waiting for the acceptor and every
    /// connection read loop to wind down.
    pub async fn graceful_stop(&self) {
        self.bootstrap.graceful_stop().await;
    }
}
