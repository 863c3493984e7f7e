use async_trait::async_trait;
use log::{trace, warn};
use std::any::{Any, TypeId};
use std::future::Future;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;

use crate::channel::handler_internal::{
    InboundContextInternal, InboundHandlerInternal, MessageInternal, OutboundContextInternal,
    OutboundHandlerInternal,
};
use crate::channel::pipeline::{PipelineManager, PipelineState};
use crate::error::Error;
use crate::runtime::sync::Mutex;
use crate::transport::{AsyncTransport, WriteFlags};

/// Completion of an outbound write or close, resolved once the transport (or a
/// terminal handler) reports the outcome.
///
/// Outbound event propagation itself never blocks on I/O; it returns one of
/// these, and the caller decides whether to await it.
pub type WriteFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'static>>;

/// Creates an already-resolved [WriteFuture].
pub fn write_done(result: Result<(), Error>) -> WriteFuture {
    Box::pin(async move { result })
}

/// Creates a [WriteFuture] resolved by a completion callback elsewhere.
pub fn write_pending(completion: oneshot::Receiver<Result<(), Error>>) -> WriteFuture {
    Box::pin(async move {
        match completion.await {
            Ok(result) => result,
            Err(_) => Err(Error::new(
                ErrorKind::BrokenPipe,
                "write completion dropped".to_string(),
            )),
        }
    })
}

/// Handles both inbound and outbound events and splits itself into an optional
/// [InboundHandler] and an optional [OutboundHandler].
///
/// Returning `None` for a half disables that direction: an inbound-only
/// handler never appears in the outbound chain and vice versa. Disabled
/// directions use `()` for their element types.
pub trait Handler: Send + Sync {
    /// Associated input message type for [InboundHandler::read]
    type Rin: Send + Sync + 'static;
    /// Associated output message type for [InboundContext::fire_read]
    type Rout: Send + Sync + 'static;
    /// Associated input message type for [OutboundHandler::write]
    type Win: Send + Sync + 'static;
    /// Associated output message type for [OutboundContext::fire_write]
    type Wout: Send + Sync + 'static;

    /// Returns handler name
    fn name(&self) -> &str;

    #[doc(hidden)]
    #[allow(clippy::type_complexity)]
    fn generate(
        self,
    ) -> (
        String,
        Option<(
            Arc<Mutex<dyn InboundContextInternal>>,
            Arc<Mutex<dyn InboundHandlerInternal>>,
        )>,
        Option<(
            Arc<Mutex<dyn OutboundContextInternal>>,
            Arc<Mutex<dyn OutboundHandlerInternal>>,
        )>,
    )
    where
        Self: Sized,
    {
        let handler_name = self.name().to_owned();
        let (inbound_handler, outbound_handler) = self.split();

        let inbound = inbound_handler.map(|handler| {
            let context: InboundContext<Self::Rin, Self::Rout> =
                InboundContext::new(&handler_name);
            (
                Arc::new(Mutex::new(context)) as Arc<Mutex<dyn InboundContextInternal>>,
                Arc::new(Mutex::new(handler)) as Arc<Mutex<dyn InboundHandlerInternal>>,
            )
        });
        let outbound = outbound_handler.map(|handler| {
            let context: OutboundContext<Self::Win, Self::Wout> =
                OutboundContext::new(&handler_name);
            (
                Arc::new(Mutex::new(context)) as Arc<Mutex<dyn OutboundContextInternal>>,
                Arc::new(Mutex::new(handler)) as Arc<Mutex<dyn OutboundHandlerInternal>>,
            )
        });

        (handler_name, inbound, outbound)
    }

    /// Splits itself into its inbound and outbound halves.
    #[allow(clippy::type_complexity)]
    fn split(
        self,
    ) -> (
        Option<Box<dyn InboundHandler<Rin = Self::Rin, Rout = Self::Rout>>>,
        Option<Box<dyn OutboundHandler<Win = Self::Win, Wout = Self::Wout>>>,
    );
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// Handles an inbound I/O event or intercepts an I/O operation, and forwards it
/// to its next inbound handler in its Pipeline.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Associated input message type for [InboundHandler::read]
    type Rin: Send + Sync + 'static;
    /// Associated output message type for [InboundContext::fire_read]
    type Rout: Send + Sync + 'static;

    /// Transport is active now, which means it is connected.
    async fn transport_active(&mut self, ctx: &InboundContext<Self::Rin, Self::Rout>) {
        ctx.fire_transport_active().await;
    }
    /// Transport is inactive now, which means it is disconnected.
    async fn transport_inactive(&mut self, ctx: &InboundContext<Self::Rin, Self::Rout>) {
        ctx.fire_transport_inactive().await;
    }

    /// Reads a message.
    async fn read(&mut self, ctx: &InboundContext<Self::Rin, Self::Rout>, msg: Self::Rin);
    /// Reads an [Error] exception in one of its inbound operations.
    async fn read_exception(&mut self, ctx: &InboundContext<Self::Rin, Self::Rout>, err: Error) {
        ctx.fire_read_exception(err).await;
    }
    /// Reads an EOF event.
    async fn read_eof(&mut self, ctx: &InboundContext<Self::Rin, Self::Rout>) {
        ctx.fire_read_eof().await;
    }
}

#[async_trait]
impl<Rin: Send + Sync + 'static, Rout: Send + Sync + 'static> InboundHandlerInternal
    for Box<dyn InboundHandler<Rin = Rin, Rout = Rout>>
{
    async fn transport_active_internal(&mut self, ctx: &dyn InboundContextInternal) {
        if let Some(ctx) = ctx.as_any().downcast_ref::<InboundContext<Rin, Rout>>() {
            self.transport_active(ctx).await;
        } else {
            panic!(
                "ctx can't downcast_ref::<InboundContext<Rin, Rout>> in {} handler",
                ctx.name()
            );
        }
    }
    async fn transport_inactive_internal(&mut self, ctx: &dyn InboundContextInternal) {
        if let Some(ctx) = ctx.as_any().downcast_ref::<InboundContext<Rin, Rout>>() {
            self.transport_inactive(ctx).await;
        } else {
            panic!(
                "ctx can't downcast_ref::<InboundContext<Rin, Rout>> in {} handler",
                ctx.name()
            );
        }
    }

    async fn read_internal(&mut self, ctx: &dyn InboundContextInternal, msg: MessageInternal) {
        if let Some(ctx) = ctx.as_any().downcast_ref::<InboundContext<Rin, Rout>>() {
            if let Ok(msg) = msg.downcast::<Rin>() {
                self.read(ctx, *msg).await;
            } else {
                panic!("msg can't downcast::<Rin> in {} handler", ctx.name());
            }
        } else {
            panic!(
                "ctx can't downcast_ref::<InboundContext<Rin, Rout>> in {} handler",
                ctx.name()
            );
        }
    }
    async fn read_exception_internal(&mut self, ctx: &dyn InboundContextInternal, err: Error) {
        if let Some(ctx) = ctx.as_any().downcast_ref::<InboundContext<Rin, Rout>>() {
            self.read_exception(ctx, err).await;
        } else {
            panic!(
                "ctx can't downcast_ref::<InboundContext<Rin, Rout>> in {} handler",
                ctx.name()
            );
        }
    }
    async fn read_eof_internal(&mut self, ctx: &dyn InboundContextInternal) {
        if let Some(ctx) = ctx.as_any().downcast_ref::<InboundContext<Rin, Rout>>() {
            self.read_eof(ctx).await;
        } else {
            panic!(
                "ctx can't downcast_ref::<InboundContext<Rin, Rout>> in {} handler",
                ctx.name()
            );
        }
    }
}

/// Handles an outbound I/O event or intercepts an I/O operation, and forwards
/// it to its next outbound handler in its Pipeline.
///
/// Every outbound operation returns a [WriteFuture] so that callers can await
/// transport completion without the propagation itself blocking the reactor.
#[async_trait]
pub trait OutboundHandler: Send + Sync {
    /// Associated input message type for [OutboundHandler::write]
    type Win: Send + Sync + 'static;
    /// Associated output message type for [OutboundContext::fire_write]
    type Wout: Send + Sync + 'static;

    /// Writes a message.
    async fn write(
        &mut self,
        ctx: &OutboundContext<Self::Win, Self::Wout>,
        msg: Self::Win,
    ) -> WriteFuture;
    /// Writes an [Error] exception from one of its outbound operations.
    async fn write_exception(
        &mut self,
        ctx: &OutboundContext<Self::Win, Self::Wout>,
        err: Error,
    ) -> WriteFuture {
        ctx.fire_write_exception(err).await
    }
    /// Writes a close event.
    async fn close(&mut self, ctx: &OutboundContext<Self::Win, Self::Wout>) -> WriteFuture {
        ctx.fire_close().await
    }
}

#[async_trait]
impl<Win: Send + Sync + 'static, Wout: Send + Sync + 'static> OutboundHandlerInternal
    for Box<dyn OutboundHandler<Win = Win, Wout = Wout>>
{
    async fn write_internal(
        &mut self,
        ctx: &dyn OutboundContextInternal,
        msg: MessageInternal,
    ) -> WriteFuture {
        if let Some(ctx) = ctx.as_any().downcast_ref::<OutboundContext<Win, Wout>>() {
            if let Ok(msg) = msg.downcast::<Win>() {
                self.write(ctx, *msg).await
            } else {
                panic!("msg can't downcast::<Win> in {} handler", ctx.name());
            }
        } else {
            panic!(
                "ctx can't downcast_ref::<OutboundContext<Win, Wout>> in {} handler",
                ctx.name()
            );
        }
    }
    async fn write_exception_internal(
        &mut self,
        ctx: &dyn OutboundContextInternal,
        err: Error,
    ) -> WriteFuture {
        if let Some(ctx) = ctx.as_any().downcast_ref::<OutboundContext<Win, Wout>>() {
            self.write_exception(ctx, err).await
        } else {
            panic!(
                "ctx can't downcast_ref::<OutboundContext<Win, Wout>> in {} handler",
                ctx.name()
            );
        }
    }
    async fn close_internal(&mut self, ctx: &dyn OutboundContextInternal) -> WriteFuture {
        if let Some(ctx) = ctx.as_any().downcast_ref::<OutboundContext<Win, Wout>>() {
            self.close(ctx).await
        } else {
            panic!(
                "ctx can't downcast_ref::<OutboundContext<Win, Wout>> in {} handler",
                ctx.name()
            );
        }
    }
}

/// Enables a [InboundHandler] to interact with its Pipeline and other handlers.
///
/// It derefs to an [OutboundContext] whose write type equals this handler's
/// read type, so echo-style handlers can turn a read straight into a write.
pub struct InboundContext<Rin, Rout> {
    name: String,

    next_in_context: Option<Arc<Mutex<dyn InboundContextInternal>>>,
    next_in_handler: Option<Arc<Mutex<dyn InboundHandlerInternal>>>,

    next_out: OutboundContext<Rout, Rin>,

    state: Option<Weak<PipelineState>>,
    attached: bool,

    phantom: PhantomData<(Rin, Rout)>,
}

impl<Rin: Send + Sync + 'static, Rout: Send + Sync + 'static> InboundContext<Rin, Rout> {
    /// Creates a new InboundContext
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),

            next_in_context: None,
            next_in_handler: None,

            next_out: OutboundContext::new(name),

            state: None,
            attached: false,

            phantom: PhantomData,
        }
    }

    // Proof of pipeline liveness for the duration of a nested event
    // propagation. None means the context is detached or its pipeline has
    // been released, and the event must be dropped.
    fn guard(&self) -> Option<Arc<PipelineState>> {
        self.state.as_ref().and_then(Weak::upgrade)
    }

    /// Transport is active now, which means it is connected.
    pub async fn fire_transport_active(&self) {
        let Some(_pipeline) = self.guard() else {
            trace!("pipeline released, dropping transport_active");
            return;
        };
        if let (Some(next_in_handler), Some(next_in_context)) =
            (&self.next_in_handler, &self.next_in_context)
        {
            let (mut next_handler, next_ctx) =
                (next_in_handler.lock().await, next_in_context.lock().await);
            next_handler.transport_active_internal(&*next_ctx).await;
        }
    }

    /// Transport is inactive now, which means it is disconnected.
    pub async fn fire_transport_inactive(&self) {
        let Some(_pipeline) = self.guard() else {
            trace!("pipeline released, dropping transport_inactive");
            return;
        };
        if let (Some(next_in_handler), Some(next_in_context)) =
            (&self.next_in_handler, &self.next_in_context)
        {
            let (mut next_handler, next_ctx) =
                (next_in_handler.lock().await, next_in_context.lock().await);
            next_handler.transport_inactive_internal(&*next_ctx).await;
        }
    }

    /// Reads a message.
    pub async fn fire_read(&self, msg: Rout) {
        let Some(_pipeline) = self.guard() else {
            trace!("pipeline released, dropping read");
            return;
        };
        if let (Some(next_in_handler), Some(next_in_context)) =
            (&self.next_in_handler, &self.next_in_context)
        {
            let (mut next_handler, next_ctx) =
                (next_in_handler.lock().await, next_in_context.lock().await);
            next_handler
                .read_internal(&*next_ctx, Box::new(msg))
                .await;
        } else {
            warn!("read reached end of pipeline");
        }
    }

    /// Reads an [Error] exception in one of its inbound operations.
    pub async fn fire_read_exception(&self, err: Error) {
        let Some(_pipeline) = self.guard() else {
            trace!("pipeline released, dropping read_exception");
            return;
        };
        if let (Some(next_in_handler), Some(next_in_context)) =
            (&self.next_in_handler, &self.next_in_context)
        {
            let (mut next_handler, next_ctx) =
                (next_in_handler.lock().await, next_in_context.lock().await);
            next_handler
                .read_exception_internal(&*next_ctx, err)
                .await;
        } else {
            warn!("read_exception reached end of pipeline: {}", err);
        }
    }

    /// Reads an EOF event.
    pub async fn fire_read_eof(&self) {
        let Some(_pipeline) = self.guard() else {
            trace!("pipeline released, dropping read_eof");
            return;
        };
        if let (Some(next_in_handler), Some(next_in_context)) =
            (&self.next_in_handler, &self.next_in_context)
        {
            let (mut next_handler, next_ctx) =
                (next_in_handler.lock().await, next_in_context.lock().await);
            next_handler.read_eof_internal(&*next_ctx).await;
        } else {
            warn!("read_eof reached end of pipeline");
        }
    }
}

impl<Rin: Send + Sync + 'static, Rout: Send + Sync + 'static> InboundContextInternal
    for InboundContext<Rin, Rout>
{
    fn name(&self) -> &str {
        self.name.as_str()
    }
    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    fn input_type(&self) -> TypeId {
        TypeId::of::<Rin>()
    }
    fn input_type_name(&self) -> &'static str {
        std::any::type_name::<Rin>()
    }
    fn output_type(&self) -> TypeId {
        TypeId::of::<Rout>()
    }
    fn output_type_name(&self) -> &'static str {
        std::any::type_name::<Rout>()
    }

    fn attach(&mut self, state: Weak<PipelineState>) {
        self.next_out.attach(state.clone());
        self.state = Some(state);
        self.attached = true;
    }
    fn detach(&mut self) {
        self.next_out.detach();
        self.state = None;
        self.attached = false;
    }
    fn attached(&self) -> bool {
        self.attached
    }

    fn set_next_in_context(
        &mut self,
        next_in_context: Option<Arc<Mutex<dyn InboundContextInternal>>>,
    ) {
        self.next_in_context = next_in_context;
    }
    fn set_next_in_handler(
        &mut self,
        next_in_handler: Option<Arc<Mutex<dyn InboundHandlerInternal>>>,
    ) {
        self.next_in_handler = next_in_handler;
    }
    fn set_next_out_context(
        &mut self,
        next_out_context: Option<Arc<Mutex<dyn OutboundContextInternal>>>,
    ) {
        self.next_out.set_next_out_context(next_out_context);
    }
    fn set_next_out_handler(
        &mut self,
        next_out_handler: Option<Arc<Mutex<dyn OutboundHandlerInternal>>>,
    ) {
        self.next_out.set_next_out_handler(next_out_handler);
    }
}

impl<Rin: Send + Sync + 'static, Rout: Send + Sync + 'static> Deref for InboundContext<Rin, Rout> {
    type Target = OutboundContext<Rout, Rin>;
    fn deref(&self) -> &Self::Target {
        &self.next_out
    }
}

impl<Rin: Send + Sync + 'static, Rout: Send + Sync + 'static> DerefMut
    for InboundContext<Rin, Rout>
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.next_out
    }
}

/// Enables a [OutboundHandler] to interact with its Pipeline and other handlers.
pub struct OutboundContext<Win, Wout> {
    name: String,

    next_out_context: Option<Arc<Mutex<dyn OutboundContextInternal>>>,
    next_out_handler: Option<Arc<Mutex<dyn OutboundHandlerInternal>>>,

    state: Option<Weak<PipelineState>>,
    attached: bool,

    phantom: PhantomData<(Win, Wout)>,
}

impl<Win: Send + Sync + 'static, Wout: Send + Sync + 'static> OutboundContext<Win, Wout> {
    /// Creates a new OutboundContext
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),

            next_out_context: None,
            next_out_handler: None,

            state: None,
            attached: false,

            phantom: PhantomData,
        }
    }

    fn guard(&self) -> Option<Arc<PipelineState>> {
        self.state.as_ref().and_then(Weak::upgrade)
    }

    /// Writes a message.
    pub async fn fire_write(&self, msg: Wout) -> WriteFuture {
        let Some(_pipeline) = self.guard() else {
            trace!("pipeline released, dropping write");
            return write_done(Ok(()));
        };
        if let (Some(next_out_handler), Some(next_out_context)) =
            (&self.next_out_handler, &self.next_out_context)
        {
            let (mut next_handler, next_ctx) =
                (next_out_handler.lock().await, next_out_context.lock().await);
            next_handler
                .write_internal(&*next_ctx, Box::new(msg))
                .await
        } else {
            warn!("write reached end of pipeline");
            write_done(Ok(()))
        }
    }

    /// Writes an [Error] exception from one of its outbound operations.
    pub async fn fire_write_exception(&self, err: Error) -> WriteFuture {
        let Some(_pipeline) = self.guard() else {
            trace!("pipeline released, dropping write_exception");
            return write_done(Ok(()));
        };
        if let (Some(next_out_handler), Some(next_out_context)) =
            (&self.next_out_handler, &self.next_out_context)
        {
            let (mut next_handler, next_ctx) =
                (next_out_handler.lock().await, next_out_context.lock().await);
            next_handler
                .write_exception_internal(&*next_ctx, err)
                .await
        } else {
            warn!("write_exception reached end of pipeline: {}", err);
            write_done(Ok(()))
        }
    }

    /// Writes a close event.
    pub async fn fire_close(&self) -> WriteFuture {
        let Some(_pipeline) = self.guard() else {
            trace!("pipeline released, dropping close");
            return write_done(Ok(()));
        };
        if let (Some(next_out_handler), Some(next_out_context)) =
            (&self.next_out_handler, &self.next_out_context)
        {
            let (mut next_handler, next_ctx) =
                (next_out_handler.lock().await, next_out_context.lock().await);
            next_handler.close_internal(&*next_ctx).await
        } else {
            warn!("close reached end of pipeline");
            write_done(Ok(()))
        }
    }

    /// Returns the transport stored on this context's pipeline, if any.
    pub fn transport(&self) -> Option<Arc<dyn AsyncTransport>> {
        self.state.as_ref()?.upgrade()?.transport()
    }

    /// Stores the transport on this context's pipeline.
    ///
    /// Must only be called from the thread of the event base owning the
    /// transport.
    pub fn set_transport(&self, transport: Option<Arc<dyn AsyncTransport>>) {
        if let Some(state) = self.state.as_ref().and_then(Weak::upgrade) {
            state.set_transport(transport);
        }
    }

    /// Returns the pipeline-wide write flags.
    pub fn write_flags(&self) -> WriteFlags {
        self.state
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|state| state.write_flags())
            .unwrap_or(WriteFlags::NONE)
    }

    /// Returns the pipeline-wide read buffer settings
    /// `(min_available, allocation_size)`.
    pub fn read_buffer_settings(&self) -> (usize, usize) {
        self.state
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|state| state.read_buffer_settings())
            .unwrap_or(crate::channel::pipeline::DEFAULT_READ_BUFFER_SETTINGS)
    }

    /// Returns the pipeline manager observing this pipeline, if any.
    pub fn pipeline_manager(&self) -> Option<Arc<dyn PipelineManager>> {
        self.state.as_ref()?.upgrade()?.manager()
    }

    #[allow(clippy::type_complexity)]
    pub(crate) fn next_out_pair(
        &self,
    ) -> Option<(
        Arc<Mutex<dyn OutboundHandlerInternal>>,
        Arc<Mutex<dyn OutboundContextInternal>>,
    )> {
        match (&self.next_out_handler, &self.next_out_context) {
            (Some(handler), Some(context)) => Some((handler.clone(), context.clone())),
            _ => None,
        }
    }
}

impl<Win: Send + Sync + 'static, Wout: Send + Sync + 'static> OutboundContextInternal
    for OutboundContext<Win, Wout>
{
    fn name(&self) -> &str {
        self.name.as_str()
    }
    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    fn input_type(&self) -> TypeId {
        TypeId::of::<Win>()
    }
    fn input_type_name(&self) -> &'static str {
        std::any::type_name::<Win>()
    }
    fn output_type(&self) -> TypeId {
        TypeId::of::<Wout>()
    }
    fn output_type_name(&self) -> &'static str {
        std::any::type_name::<Wout>()
    }

    fn attach(&mut self, state: Weak<PipelineState>) {
        self.state = Some(state);
        self.attached = true;
    }
    fn detach(&mut self) {
        self.state = None;
        self.attached = false;
    }
    fn attached(&self) -> bool {
        self.attached
    }

    fn set_next_out_context(
        &mut self,
        next_out_context: Option<Arc<Mutex<dyn OutboundContextInternal>>>,
    ) {
        self.next_out_context = next_out_context;
    }
    fn set_next_out_handler(
        &mut self,
        next_out_handler: Option<Arc<Mutex<dyn OutboundHandlerInternal>>>,
    ) {
        self.next_out_handler = next_out_handler;
    }
}
