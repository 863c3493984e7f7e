use async_trait::async_trait;
use bytes::BytesMut;
use log::warn;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::oneshot;

use crate::channel::handler::{
    write_done, write_pending, Handler, InboundHandler, OutboundContext, OutboundHandler,
    WriteFuture,
};
use crate::error::Error;

/// A one-resolver / many-awaiters completion broadcast: every future obtained
/// before resolution resolves with a clone of the single result.
#[derive(Default, Clone)]
pub struct SharedPromise {
    state: Arc<StdMutex<SharedPromiseState>>,
}

#[derive(Default)]
struct SharedPromiseState {
    result: Option<Result<(), Error>>,
    waiters: Vec<oneshot::Sender<Result<(), Error>>>,
}

impl SharedPromise {
    /// Creates a new unresolved SharedPromise
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a future resolved by [SharedPromise::resolve]. Futures obtained
    /// after resolution resolve immediately.
    pub fn future(&self) -> WriteFuture {
        let mut state = self.state.lock().unwrap();
        if let Some(result) = &state.result {
            return write_done(result.clone());
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.push(tx);
        write_pending(rx)
    }

    /// Resolves every outstanding and future awaiter. A second resolution is
    /// ignored.
    pub fn resolve(&self, result: Result<(), Error>) {
        let mut state = self.state.lock().unwrap();
        if state.result.is_some() {
            return;
        }
        for waiter in state.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
        state.result = Some(result);
    }
}

struct OutputBuffer {
    sends: Option<BytesMut>,
    shared_promise: SharedPromise,
    // cancel token of the flush scheduled for the end of the current turn
    scheduled: Option<Arc<AtomicBool>>,
}

struct OutputBufferingEncoder {
    buffer: Arc<StdMutex<OutputBuffer>>,
}

/// Outbound-only handler that coalesces writes within one reactor turn to
/// minimize syscalls: the transport is written to once per event loop turn
/// instead of on every write.
///
/// Every buffered write returns a future off a shared promise resolved when
/// the coalesced downstream write completes.
///
/// This handler may only be used in a single pipeline.
pub struct OutputBufferingHandler {
    encoder: OutputBufferingEncoder,
}

impl Default for OutputBufferingHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBufferingHandler {
    /// Creates a new OutputBufferingHandler
    pub fn new() -> Self {
        OutputBufferingHandler {
            encoder: OutputBufferingEncoder {
                buffer: Arc::new(StdMutex::new(OutputBuffer {
                    sends: None,
                    shared_promise: SharedPromise::new(),
                    scheduled: None,
                })),
            },
        }
    }
}

#[async_trait]
impl OutboundHandler for OutputBufferingEncoder {
    type Win = BytesMut;
    type Wout = BytesMut;

    async fn write(
        &mut self,
        ctx: &OutboundContext<Self::Win, Self::Wout>,
        msg: Self::Win,
    ) -> WriteFuture {
        let Some(transport) = ctx.transport() else {
            // nothing to batch against, pass straight through
            return ctx.fire_write(msg).await;
        };

        let mut buffer = self.buffer.lock().unwrap();
        if let Some(sends) = &mut buffer.sends {
            sends.extend_from_slice(&msg);
            return buffer.shared_promise.future();
        }

        let Some((next_handler, next_context)) = ctx.next_out_pair() else {
            warn!("write reached end of pipeline");
            return write_done(Ok(()));
        };

        buffer.sends = Some(msg);
        let cancel = Arc::new(AtomicBool::new(false));
        buffer.scheduled = Some(cancel.clone());

        let shared_buffer = self.buffer.clone();
        transport.event_base().run_in_loop(move || {
            if cancel.load(Ordering::SeqCst) {
                return;
            }

            let (sends, promise) = {
                let mut buffer = shared_buffer.lock().unwrap();
                buffer.scheduled = None;
                (
                    buffer.sends.take(),
                    std::mem::take(&mut buffer.shared_promise),
                )
            };
            let Some(sends) = sends else {
                return;
            };

            tokio::task::spawn_local(async move {
                let future = {
                    let (mut handler, context) =
                        (next_handler.lock().await, next_context.lock().await);
                    handler.write_internal(&*context, Box::new(sends)).await
                };
                promise.resolve(future.await);
            });
        });

        buffer.shared_promise.future()
    }

    async fn close(&mut self, ctx: &OutboundContext<Self::Win, Self::Wout>) -> WriteFuture {
        {
            let mut buffer = self.buffer.lock().unwrap();
            if let Some(cancel) = buffer.scheduled.take() {
                cancel.store(true, Ordering::SeqCst);
            }
            if buffer.sends.take().is_some() {
                let promise = std::mem::take(&mut buffer.shared_promise);
                promise.resolve(Err(Error::new(
                    ErrorKind::Interrupted,
                    "close() called while sends still pending".to_string(),
                )));
            }
        }
        ctx.fire_close().await
    }
}

impl Handler for OutputBufferingHandler {
    type Rin = ();
    type Rout = ();
    type Win = BytesMut;
    type Wout = BytesMut;

    fn name(&self) -> &str {
        "OutputBufferingHandler"
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
