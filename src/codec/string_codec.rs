use async_trait::async_trait;
use bytes::{BufMut, BytesMut};

use crate::channel::{
    Handler, InboundContext, InboundHandler, OutboundContext, OutboundHandler, WriteFuture,
};

#[derive(Default)]
struct StringDecoder;
#[derive(Default)]
struct StringEncoder;

/// A codec between UTF-8 byte frames and [String] messages.
#[derive(Default)]
pub struct StringCodec {
    decoder: StringDecoder,
    encoder: StringEncoder,
}

impl StringCodec {
    /// Creates a new StringCodec
    pub fn new() -> Self {
        StringCodec {
            decoder: StringDecoder {},
            encoder: StringEncoder {},
        }
    }
}

#[async_trait]
impl InboundHandler for StringDecoder {
    type Rin = BytesMut;
    type Rout = String;

    async fn read(&mut self, ctx: &InboundContext<Self::Rin, Self::Rout>, msg: Self::Rin) {
        match String::from_utf8(msg.to_vec()) {
            Ok(text) => {
                ctx.fire_read(text).await;
            }
            Err(err) => ctx.fire_read_exception(err.into()).await,
        }
    }
}

#[async_trait]
impl OutboundHandler for StringEncoder {
    type Win = String;
    type Wout = BytesMut;

    async fn write(
        &mut self,
        ctx: &OutboundContext<Self::Win, Self::Wout>,
        msg: Self::Win,
    ) -> WriteFuture {
        let mut buf = BytesMut::with_capacity(msg.len());
        buf.put(msg.as_bytes());
        ctx.fire_write(buf).await
    }
}

impl Handler for StringCodec {
    type Rin = BytesMut;
    type Rout = String;
    type Win = String;
    type Wout = BytesMut;

    fn name(&self) -> &str {
        "StringCodec"
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
