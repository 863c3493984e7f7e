use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::io::ErrorKind;

use crate::channel::{
    write_done, Handler, InboundHandler, OutboundContext, OutboundHandler, WriteFuture,
};
use crate::error::Error;

struct LengthFieldPrependerEncoder {
    length_field_length: usize,
    length_adjustment: isize,
    length_includes_length_field: bool,
    network_byte_order: bool,
}

/// Outbound-only handler that prepends the frame length to every write, the
/// encoding counterpart of
/// [LengthFieldBasedFrameDecoder](crate::codec::byte_to_message_decoder::LengthFieldBasedFrameDecoder).
pub struct LengthFieldPrepender {
    encoder: LengthFieldPrependerEncoder,
}

impl LengthFieldPrepender {
    /// Creates a new LengthFieldPrepender.
    ///
    /// `length_field_length` must be 1, 2, 4 or 8.
    pub fn new(
        length_field_length: usize,
        length_adjustment: isize,
        length_includes_length_field: bool,
        network_byte_order: bool,
    ) -> Result<Self, Error> {
        if !matches!(length_field_length, 1 | 2 | 4 | 8) {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("invalid length field length {}", length_field_length),
            ));
        }
        Ok(Self {
            encoder: LengthFieldPrependerEncoder {
                length_field_length,
                length_adjustment,
                length_includes_length_field,
                network_byte_order,
            },
        })
    }
}

#[async_trait]
impl OutboundHandler for LengthFieldPrependerEncoder {
    type Win = BytesMut;
    type Wout = BytesMut;

    async fn write(
        &mut self,
        ctx: &OutboundContext<Self::Win, Self::Wout>,
        msg: Self::Win,
    ) -> WriteFuture {
        let mut length = msg.len() as i128 + self.length_adjustment as i128;
        if self.length_includes_length_field {
            length += self.length_field_length as i128;
        }

        let max = match self.length_field_length {
            1 => u8::MAX as i128,
            2 => u16::MAX as i128,
            4 => u32::MAX as i128,
            _ => u64::MAX as i128,
        };
        if length < 0 || length > max {
            return write_done(Err(Error::new(
                ErrorKind::InvalidData,
                format!(
                    "frame length {} does not fit in {} length field bytes",
                    length, self.length_field_length
                ),
            )));
        }
        let length = length as u64;

        let mut out = BytesMut::with_capacity(self.length_field_length + msg.len());
        match (self.length_field_length, self.network_byte_order) {
            (1, _) => out.put_u8(length as u8),
            (2, true) => out.put_u16(length as u16),
            (2, false) => out.put_u16_le(length as u16),
            (4, true) => out.put_u32(length as u32),
            (4, false) => out.put_u32_le(length as u32),
            (8, true) => out.put_u64(length),
            (8, false) => out.put_u64_le(length),
            _ => unreachable!("length field length validated in new()"),
        }
        out.extend_from_slice(&msg);

        ctx.fire_write(out).await
    }
}

impl Handler for LengthFieldPrepender {
    type Rin = ();
    type Rout = ();
    type Win = BytesMut;
    type Wout = BytesMut;

    fn name(&self) -> &str {
        "LengthFieldPrepender"
    }

    fn split(
        self,
    ) -> (
        Option<Box<dyn InboundHandler<Rin = Self::Rin, Rout = Self::Rout>>>,
        Option<Box<dyn OutboundHandler<Win = Self::Win, Wout = Self::Wout>>>,
    ) {
        (None, Some(Box::new(self.encoder)))
    }
}
