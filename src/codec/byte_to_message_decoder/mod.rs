//! Byte-queue to message-frame decoding.

use async_trait::async_trait;
use bytes::BytesMut;

use crate::buf::BufQueue;
use crate::channel::{Handler, InboundContext, InboundHandler, OutboundContext, OutboundHandler, WriteFuture};
use crate::error::Error;

mod fixed_length_frame_decoder;
mod length_field_based_frame_decoder;
mod length_field_prepender;
mod line_based_frame_decoder;

pub use fixed_length_frame_decoder::FixedLengthFrameDecoder;
pub use length_field_based_frame_decoder::LengthFieldBasedFrameDecoder;
pub use length_field_prepender::LengthFieldPrepender;
pub use line_based_frame_decoder::{LineBasedFrameDecoder, TerminatorType};

/// Splits frames off the front of a [BufQueue].
///
/// Per invocation a decoder either returns one complete frame (consuming
/// exactly its bytes), or `Ok(None)` leaving the queue untouched and recording
/// in `needed` how many more bytes it wants, or an error after trimming the
/// offending bytes. A decoder never returns a partial frame and never buffers
/// bytes outside the queue.
pub trait MessageDecoder: Send + Sync {
    /// Returns decoder id
    fn id(&self) -> String;
    /// Decodes one frame off the front of `buf`.
    fn decode(&mut self, buf: &mut BufQueue, needed: &mut usize)
        -> Result<Option<BytesMut>, Error>;
}

struct ByteToMessageDecoder {
    transport_active: bool,
    message_decoder: Box<dyn MessageDecoder>,
}

struct ByteToMessageEncoder;

/// An inbound/outbound adapter that runs a [MessageDecoder] over the byte
/// queue fired by the socket handler, emitting one inbound read per decoded
/// frame. Outbound bytes pass straight through.
pub struct ByteToMessageCodec {
    name: String,
    decoder: ByteToMessageDecoder,
    encoder: ByteToMessageEncoder,
}

impl ByteToMessageCodec {
    /// Creates a new ByteToMessageCodec around a decoder. The handler takes
    /// the decoder's id as its name.
    pub fn new(message_decoder: Box<dyn MessageDecoder>) -> Self {
        Self {
            name: message_decoder.id(),
            decoder: ByteToMessageDecoder {
                transport_active: false,
                message_decoder,
            },
            encoder: ByteToMessageEncoder {},
        }
    }
}

#[async_trait]
impl InboundHandler for ByteToMessageDecoder {
    type Rin = BufQueue;
    type Rout = BytesMut;

    async fn transport_active(&mut self, ctx: &InboundContext<Self::Rin, Self::Rout>) {
        self.transport_active = true;
        ctx.fire_transport_active().await;
    }
    async fn transport_inactive(&mut self, ctx: &InboundContext<Self::Rin, Self::Rout>) {
        self.transport_active = false;
        ctx.fire_transport_inactive().await;
    }

    async fn read(&mut self, ctx: &InboundContext<Self::Rin, Self::Rout>, mut msg: Self::Rin) {
        while self.transport_active {
            let mut needed = 0;
            match self.message_decoder.decode(&mut msg, &mut needed) {
                Ok(Some(frame)) => {
                    ctx.fire_read(frame).await;
                }
                Ok(None) => {
                    return;
                }
                Err(err) => {
                    ctx.fire_read_exception(err).await;
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl OutboundHandler for ByteToMessageEncoder {
    type Win = BytesMut;
    type Wout = BytesMut;

    async fn write(
        &mut self,
        ctx: &OutboundContext<Self::Win, Self::Wout>,
        msg: Self::Win,
    ) -> WriteFuture {
        ctx.fire_write(msg).await
    }
}

impl Handler for ByteToMessageCodec {
    type Rin = BufQueue;
    type Rout = BytesMut;
    type Win = BytesMut;
    type Wout = BytesMut;

    fn name(&self) -> &str {
        self.name.as_str()
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
