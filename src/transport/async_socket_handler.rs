use async_trait::async_trait;
use bytes::BytesMut;
use log::warn;
use std::io::ErrorKind;
use std::sync::Arc;

use crate::buf::BufQueue;
use crate::channel::{
    write_done, Handler, InboundContext, InboundHandler, OutboundContext, OutboundHandler,
    WriteFuture,
};
use crate::error::Error;
use crate::transport::{AsyncTransport, WriteFlags};

struct AsyncSocketDecoder {
    transport: Arc<dyn AsyncTransport>,
    queue: BufQueue,
    fired_inactive: bool,
}

struct AsyncSocketEncoder {
    transport: Arc<dyn AsyncTransport>,
    pipeline_deleted: bool,
}

/// The bytes-handling adapter at the front of every byte-oriented pipeline.
///
/// Inbound it accumulates raw socket chunks into a [BufQueue] and fires the
/// queue down the chain for decoders to consume destructively; outbound it
/// turns writes into transport writes and closes into transport teardown.
///
/// This handler may only be used in a single pipeline: the transport's read
/// callback slot is singular.
pub struct AsyncSocketHandler {
    decoder: AsyncSocketDecoder,
    encoder: AsyncSocketEncoder,
}

impl AsyncSocketHandler {
    /// Creates a new AsyncSocketHandler over a transport.
    pub fn new(transport: Arc<dyn AsyncTransport>) -> Self {
        AsyncSocketHandler {
            decoder: AsyncSocketDecoder {
                transport: transport.clone(),
                queue: BufQueue::new(),
                fired_inactive: false,
            },
            encoder: AsyncSocketEncoder {
                transport,
                pipeline_deleted: false,
            },
        }
    }
}

impl AsyncSocketDecoder {
    fn refresh_timeout(&self, ctx: &InboundContext<BytesMut, BufQueue>) {
        if let Some(manager) = ctx.pipeline_manager() {
            manager.refresh_timeout();
        }
    }
}

#[async_trait]
impl InboundHandler for AsyncSocketDecoder {
    type Rin = BytesMut;
    type Rout = BufQueue;

    async fn transport_active(&mut self, ctx: &InboundContext<Self::Rin, Self::Rout>) {
        ctx.set_transport(Some(self.transport.clone()));
        self.fired_inactive = false;
        ctx.fire_transport_active().await;
    }

    async fn transport_inactive(&mut self, ctx: &InboundContext<Self::Rin, Self::Rout>) {
        if !self.fired_inactive {
            self.fired_inactive = true;
            ctx.fire_transport_inactive().await;
        }
        ctx.set_transport(None);
    }

    async fn read(&mut self, ctx: &InboundContext<Self::Rin, Self::Rout>, msg: Self::Rin) {
        self.refresh_timeout(ctx);

        let (min_available, allocation_size) = ctx.read_buffer_settings();
        self.queue.preallocate(min_available, allocation_size);
        self.queue.append(msg);

        ctx.fire_read(self.queue.clone()).await;
    }
}

impl AsyncSocketEncoder {
    fn refresh_timeout(&self, ctx: &OutboundContext<BytesMut, BytesMut>) {
        if let Some(manager) = ctx.pipeline_manager() {
            manager.refresh_timeout();
        }
    }

    // Tears the transport down and tells the manager to drop this pipeline,
    // at most once per handler lifetime.
    fn shutdown(
        &mut self,
        ctx: &OutboundContext<BytesMut, BytesMut>,
        close_with_reset: bool,
    ) -> WriteFuture {
        let future = if close_with_reset {
            self.transport.close_with_reset()
        } else {
            self.transport.close_now()
        };
        if !self.pipeline_deleted {
            self.pipeline_deleted = true;
            if let Some(manager) = ctx.pipeline_manager() {
                manager.delete_pipeline();
            }
        }
        future
    }
}

#[async_trait]
impl OutboundHandler for AsyncSocketEncoder {
    type Win = BytesMut;
    type Wout = BytesMut;

    async fn write(
        &mut self,
        ctx: &OutboundContext<Self::Win, Self::Wout>,
        msg: Self::Win,
    ) -> WriteFuture {
        self.refresh_timeout(ctx);

        if msg.is_empty() {
            return write_done(Ok(()));
        }
        if !self.transport.good() {
            return write_done(Err(Error::new(
                ErrorKind::NotConnected,
                "socket is closed in write()".to_string(),
            )));
        }
        self.transport.write_chain(msg, ctx.write_flags())
    }

    async fn write_exception(
        &mut self,
        ctx: &OutboundContext<Self::Win, Self::Wout>,
        err: Error,
    ) -> WriteFuture {
        warn!("write_exception {} shuts down socket", err);
        self.shutdown(ctx, true)
    }

    async fn close(&mut self, ctx: &OutboundContext<Self::Win, Self::Wout>) -> WriteFuture {
        if ctx.write_flags().contains(WriteFlags::WRITE_SHUTDOWN) {
            self.transport.shutdown_write()
        } else {
            self.shutdown(ctx, false)
        }
    }
}

impl Handler for AsyncSocketHandler {
    type Rin = BytesMut;
    type Rout = BufQueue;
    type Win = BytesMut;
    type Wout = BytesMut;

    fn name(&self) -> &str {
        "AsyncSocketHandler"
    }

    fn split(
        self,
    ) -> (
        Option<Box<dyn InboundHandler<Rin = Self::Rin, Rout = Self::Rout>>>,
        Option<Box<dyn OutboundHandler<Win = Self::Win, Wout = Self::Wout>>>,
    ) {
        (Some(Box::new(self.decoder)), Some(Box::new(self.encoder)))
    }
}
