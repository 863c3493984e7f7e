use async_trait::async_trait;
use bytes::BytesMut;
use log::warn;
use std::io::ErrorKind;

use crate::channel::handler::{
    write_done, Handler, InboundHandler, OutboundContext, OutboundHandler, WriteFuture,
};
use crate::error::Error;

#[derive(Default)]
struct EventBaseEncoder;

/// Outbound-only handler that redirects writes and closes onto the event base
/// owning the pipeline's transport.
///
/// Placed right after the [AsyncSocketHandler](crate::transport::AsyncSocketHandler),
/// it lets application code on any thread issue writes without racing the
/// socket: a caller off the I/O thread is blocked until the downstream call
/// has run on the event base, and receives the future that call produced.
#[derive(Default)]
pub struct EventBaseHandler {
    encoder: EventBaseEncoder,
}

impl EventBaseHandler {
    /// Creates a new EventBaseHandler
    pub fn new() -> Self {
        EventBaseHandler {
            encoder: EventBaseEncoder {},
        }
    }
}

#[async_trait]
impl OutboundHandler for EventBaseEncoder {
    type Win = BytesMut;
    type Wout = BytesMut;

    async fn write(
        &mut self,
        ctx: &OutboundContext<Self::Win, Self::Wout>,
        msg: Self::Win,
    ) -> WriteFuture {
        let Some(transport) = ctx.transport() else {
            return write_done(Err(Error::new(
                ErrorKind::NotConnected,
                "no transport attached to pipeline".to_string(),
            )));
        };

        let event_base = transport.event_base();
        if event_base.in_event_base_thread() {
            return ctx.fire_write(msg).await;
        }

        let Some((next_handler, next_context)) = ctx.next_out_pair() else {
            warn!("write reached end of pipeline");
            return write_done(Ok(()));
        };
        let scheduled = event_base
            .run_and_wait(async move {
                let (mut handler, context) =
                    (next_handler.lock().await, next_context.lock().await);
                handler.write_internal(&*context, Box::new(msg)).await
            })
            .await;
        match scheduled {
            Ok(future) => future,
            Err(err) => write_done(Err(err)),
        }
    }

    async fn close(&mut self, ctx: &OutboundContext<Self::Win, Self::Wout>) -> WriteFuture {
        let Some(transport) = ctx.transport() else {
            // transport already detached, nothing to redirect onto
            return ctx.fire_close().await;
        };

        let event_base = transport.event_base();
        if event_base.in_event_base_thread() {
            return ctx.fire_close().await;
        }

        let Some((next_handler, next_context)) = ctx.next_out_pair() else {
            warn!("close reached end of pipeline");
            return write_done(Ok(()));
        };
        let scheduled = event_base
            .run_and_wait(async move {
                let (mut handler, context) =
                    (next_handler.lock().await, next_context.lock().await);
                handler.close_internal(&*context).await
            })
            .await;
        match scheduled {
            Ok(future) => future,
            Err(err) => write_done(Err(err)),
        }
    }
}

impl Handler for EventBaseHandler {
    type Rin = ();
    type Rout = ();
    type Win = BytesMut;
    type Wout = BytesMut;

    fn name(&self) -> &str {
        "EventBaseHandler"
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
