//! Client and server bootstraps: create sockets, attach them to pipelines
//! produced by a user-supplied factory, and drive the connect/accept
//! lifecycles on event bases.

use bytes::BytesMut;
use log::{trace, warn};
use std::future::Future;
use std::io::ErrorKind;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::broadcast;
use waitgroup::{WaitGroup, Worker};

use crate::channel::{InboundPipeline, Pipeline};
use crate::error::Error;
use crate::executor::{EventBase, EventBasePool};
use crate::runtime::io::AsyncReadExt;
use crate::runtime::net::OwnedReadHalf;
use crate::transport::AsyncTransport;

mod bootstrap_tcp_client;
mod bootstrap_tcp_server;

#[cfg(test)]
mod bootstrap_test;

pub use bootstrap_tcp_client::BootstrapTcpClient;
pub use bootstrap_tcp_server::BootstrapTcpServer;

/// Future returned by a [PipelineFactoryFn]; resolves to the finalized
/// pipeline for one connection.
pub type PipelineFactoryFuture<W> =
    Pin<Box<dyn Future<Output = Arc<Pipeline<BytesMut, W>>> + Send>>;

/// Creates pipeline instances, one per connection, given the connection's
/// transport. The factory composes the pipeline (socket handler first) and
/// finalizes it before returning.
pub type PipelineFactoryFn<W> =
    Box<dyn (Fn(Arc<dyn AsyncTransport>) -> PipelineFactoryFuture<W>) + Send + Sync>;

pub(crate) struct Bootstrap<W: Send + Sync + 'static> {
    pipeline_factory_fn: Option<Arc<PipelineFactoryFn<W>>>,
    event_base_pool: Option<Arc<EventBasePool>>,
    default_base: StdMutex<Option<Arc<EventBase>>>,
    max_payload_size: usize,

    close_tx: StdMutex<Option<broadcast::Sender<()>>>,
    wg: StdMutex<Option<WaitGroup>>,
}

impl<W: Send + Sync + 'static> Bootstrap<W> {
    pub(crate) fn new() -> Self {
        Self {
            pipeline_factory_fn: None,
            event_base_pool: None,
            default_base: StdMutex::new(None),
            max_payload_size: 2048,

            close_tx: StdMutex::new(None),
            wg: StdMutex::new(None),
        }
    }

    pub(crate) fn pipeline(&mut self, pipeline_factory_fn: PipelineFactoryFn<W>) {
        self.pipeline_factory_fn = Some(Arc::new(pipeline_factory_fn));
    }

    pub(crate) fn factory(&self) -> Result<Arc<PipelineFactoryFn<W>>, Error> {
        self.pipeline_factory_fn.clone().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidInput,
                "pipeline factory is not set".to_string(),
            )
        })
    }

    pub(crate) fn max_payload_size(&mut self, max_payload_size: usize) {
        self.max_payload_size = max_payload_size;
    }

    pub(crate) fn payload_size(&self) -> usize {
        self.max_payload_size
    }

    pub(crate) fn event_base_pool(&mut self, pool: Arc<EventBasePool>) {
        self.event_base_pool = Some(pool);
    }

    pub(crate) fn pool(&self) -> Option<Arc<EventBasePool>> {
        self.event_base_pool.clone()
    }

    // Pool round-robin when a pool was supplied, otherwise a lazily created
    // base owned by this bootstrap.
    pub(crate) fn pick_event_base(&self) -> Result<Arc<EventBase>, Error> {
        if let Some(pool) = &self.event_base_pool {
            return Ok(pool.next_base());
        }
        let mut base = self.default_base.lock().unwrap();
        if base.is_none() {
            *base = Some(EventBase::new("bootstrap-io")?);
        }
        Ok(base.clone().unwrap())
    }

    pub(crate) fn new_close_signal(&self) -> (broadcast::Sender<()>, broadcast::Receiver<()>) {
        let (close_tx, close_rx) = broadcast::channel(1);
        {
            let mut tx = self.close_tx.lock().unwrap();
            *tx = Some(close_tx.clone());
        }
        (close_tx, close_rx)
    }

    pub(crate) fn new_worker(&self) -> Worker {
        let wg = WaitGroup::new();
        let worker = wg.worker();
        {
            let mut slot = self.wg.lock().unwrap();
            *slot = Some(wg);
        }
        worker
    }

    pub(crate) fn stop(&self) {
        let tx = self.close_tx.lock().unwrap();
        if let Some(tx) = &*tx {
            let _ = tx.send(());
        }
    }

    pub(crate) async fn graceful_stop(&self) {
        self.stop();
        let wg = {
            let mut slot = self.wg.lock().unwrap();
            slot.take()
        };
        if let Some(wg) = wg {
            wg.wait().await;
        }
    }
}

// Per-connection read loop, always run on the connection's event base. The
// caller fires transport_active before handing the pipeline over; this loop
// feeds raw chunks into the pipeline head and fires transport_inactive on the
// way out.
pub(crate) async fn process_pipeline(
    mut reader: OwnedReadHalf,
    pipeline: Arc<dyn InboundPipeline<BytesMut>>,
    mut close_rx: broadcast::Receiver<()>,
    mut transport_close_rx: broadcast::Receiver<()>,
    worker: Worker,
    max_payload_size: usize,
) {
    let _w = worker;

    let mut buf = BytesMut::with_capacity(max_payload_size);

    loop {
        buf.reserve(max_payload_size);

        tokio::select! {
            _ = close_rx.recv() => {
                trace!("pipeline socket exit loop");
                break;
            }
            _ = transport_close_rx.recv() => {
                trace!("socket closed, exit read loop");
                break;
            }
            res = reader.read_buf(&mut buf) => {
                match res {
                    Ok(0) => {
                        pipeline.read_eof().await;
                        break;
                    }
                    Ok(n) => {
                        trace!("socket read {} bytes", n);
                        pipeline.read(buf.split()).await;
                    }
                    Err(err) => {
                        warn!("socket read error {}", err);
                        pipeline.read_exception(err.into()).await;
                        break;
                    }
                }
            }
        }
    }
    pipeline.transport_inactive().await;
}
