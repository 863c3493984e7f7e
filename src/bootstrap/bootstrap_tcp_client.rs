use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;

use super::{process_pipeline, Bootstrap, PipelineFactoryFn};
use crate::channel::{InboundPipeline, Pipeline};
use crate::error::Error;
use crate::executor::EventBasePool;
use crate::runtime::net::{TcpStream, ToSocketAddrs};
use crate::transport::{AsyncTransport, TcpTransport};

/// A bootstrap that makes it easy to create pipelines for TCP clients.
///
/// `connect` picks an event base, creates the socket and the pipeline on that
/// base, fires `transport_active` inbound and hands the pipeline back.
pub struct BootstrapTcpClient<W: Send + Sync + 'static> {
    bootstrap: Bootstrap<W>,
}

impl<W: Send + Sync + 'static> Default for BootstrapTcpClient<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Send + Sync + 'static> BootstrapTcpClient<W> {
    /// Creates a new BootstrapTcpClient
    pub fn new() -> Self {
        Self {
            bootstrap: Bootstrap::new(),
        }
    }

    /// Sets the read chunk size, default is 2048 bytes
    pub fn max_payload_size(&mut self, max_payload_size: usize) -> &mut Self {
        self.bootstrap.max_payload_size(max_payload_size);
        self
    }

    /// Supplies the I/O thread pool; without one the client runs all of its
    /// connections on a single lazily created event base.
    pub fn event_base_pool(&mut self, pool: Arc<EventBasePool>) -> &mut Self {
        self.bootstrap.event_base_pool(pool);
        self
    }

    /// Creates pipeline instances from when calling [BootstrapTcpClient::connect].
    pub fn pipeline(&mut self, pipeline_factory_fn: PipelineFactoryFn<W>) -> &mut Self {
        self.bootstrap.pipeline(pipeline_factory_fn);
        self
    }

    /// Connects to the remote peer within `timeout`.
    ///
    /// On the chosen event base this creates the socket, builds the pipeline
    /// via the factory, fires `transport_active` and spawns the read loop.
    pub async fn connect<A: ToSocketAddrs + Send + 'static>(
        &mut self,
        addr: A,
        timeout: Duration,
    ) -> Result<Arc<Pipeline<BytesMut, W>>, Error> {
        let factory = self.bootstrap.factory()?;
        let event_base = self.bootstrap.pick_event_base()?;
        let max_payload_size = self.bootstrap.payload_size();

        let (_close_tx, close_rx) = self.bootstrap.new_close_signal();
        let worker = self.bootstrap.new_worker();

        let base = event_base.clone();
        event_base
            .run_and_wait(async move {
                let socket = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await
                {
                    Ok(Ok(socket)) => socket,
                    Ok(Err(err)) => return Err(err.into()),
                    Err(_) => {
                        return Err(Error::new(
                            ErrorKind::TimedOut,
                            format!("connect timed out after {:?}", timeout),
                        ))
                    }
                };
                let local_addr = socket.local_addr()?;
                let peer_addr = socket.peer_addr()?;
                let (reader, writer) = socket.into_split();

                let transport = TcpTransport::new(writer, local_addr, Some(peer_addr), base);
                let transport_close_rx = transport.subscribe_close();

                let dyn_transport: Arc<dyn AsyncTransport> = transport;
                let pipeline = (factory)(dyn_transport).await;
                pipeline.transport_active().await;

                let inbound: Arc<dyn InboundPipeline<BytesMut>> = pipeline.clone();
                tokio::task::spawn_local(process_pipeline(
                    reader,
                    inbound,
                    close_rx,
                    transport_close_rx,
                    worker,
                    max_payload_size,
                ));

                Ok(pipeline)
            })
            .await?
    }

    /// Stops the client
    pub fn stop(&self) {
        self.bootstrap.stop();
    }

    /// Gracefully stops the client, waiting for its read loops to wind down.
    pub async fn graceful_stop(&self) {
        self.bootstrap.graceful_stop().await;
    }
}
