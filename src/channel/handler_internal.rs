use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::sync::{Arc, Weak};

use crate::channel::handler::WriteFuture;
use crate::channel::pipeline::PipelineState;
use crate::error::Error;
use crate::runtime::sync::Mutex;

/// Type-erased message travelling through a pipeline.
pub type MessageInternal = Box<dyn Any + Send + Sync>;

/// Internal Inbound Handler trait
#[async_trait]
pub trait InboundHandlerInternal: Send + Sync {
    #[doc(hidden)]
    async fn transport_active_internal(&mut self, ctx: &dyn InboundContextInternal);
    #[doc(hidden)]
    async fn transport_inactive_internal(&mut self, ctx: &dyn InboundContextInternal);
    #[doc(hidden)]
    async fn read_internal(&mut self, ctx: &dyn InboundContextInternal, msg: MessageInternal);
    #[doc(hidden)]
    async fn read_exception_internal(&mut self, ctx: &dyn InboundContextInternal, err: Error);
    #[doc(hidden)]
    async fn read_eof_internal(&mut self, ctx: &dyn InboundContextInternal);
}

/// Internal Inbound Context trait
pub trait InboundContextInternal: Send + Sync {
    #[doc(hidden)]
    fn name(&self) -> &str;
    /// Casts it to Any dyn trait
    fn as_any(&self) -> &(dyn Any + Send + Sync);

    #[doc(hidden)]
    fn input_type(&self) -> TypeId;
    #[doc(hidden)]
    fn input_type_name(&self) -> &'static str;
    #[doc(hidden)]
    fn output_type(&self) -> TypeId;
    #[doc(hidden)]
    fn output_type_name(&self) -> &'static str;

    #[doc(hidden)]
    fn attach(&mut self, state: Weak<PipelineState>);
    #[doc(hidden)]
    fn detach(&mut self);
    #[doc(hidden)]
    fn attached(&self) -> bool;

    #[doc(hidden)]
    fn set_next_in_context(
        &mut self,
        next_in_context: Option<Arc<Mutex<dyn InboundContextInternal>>>,
    );
    #[doc(hidden)]
    fn set_next_in_handler(
        &mut self,
        next_in_handler: Option<Arc<Mutex<dyn InboundHandlerInternal>>>,
    );
    #[doc(hidden)]
    fn set_next_out_context(
        &mut self,
        next_out_context: Option<Arc<Mutex<dyn OutboundContextInternal>>>,
    );
    #[doc(hidden)]
    fn set_next_out_handler(
        &mut self,
        next_out_handler: Option<Arc<Mutex<dyn OutboundHandlerInternal>>>,
    );
}

/// Internal Outbound Handler trait
#[async_trait]
pub trait OutboundHandlerInternal: Send + Sync {
    #[doc(hidden)]
    async fn write_internal(
        &mut self,
        ctx: &dyn OutboundContextInternal,
        msg: MessageInternal,
    ) -> WriteFuture;
    #[doc(hidden)]
    async fn write_exception_internal(
        &mut self,
        ctx: &dyn OutboundContextInternal,
        err: Error,
    ) -> WriteFuture;
    #[doc(hidden)]
    async fn close_internal(&mut self, ctx: &dyn OutboundContextInternal) -> WriteFuture;
}

/// Internal Outbound Context trait
pub trait OutboundContextInternal: Send + Sync {
    #[doc(hidden)]
    fn name(&self) -> &str;
    /// Casts it to Any dyn trait
    fn as_any(&self) -> &(dyn Any + Send + Sync);

    #[doc(hidden)]
    fn input_type(&self) -> TypeId;
    #[doc(hidden)]
    fn input_type_name(&self) -> &'static str;
    #[doc(hidden)]
    fn output_type(&self) -> TypeId;
    #[doc(hidden)]
    fn output_type_name(&self) -> &'static str;

    #[doc(hidden)]
    fn attach(&mut self, state: Weak<PipelineState>);
    #[doc(hidden)]
    fn detach(&mut self);
    #[doc(hidden)]
    fn attached(&self) -> bool;

    #[doc(hidden)]
    fn set_next_out_context(
        &mut self,
        next_out_context: Option<Arc<Mutex<dyn OutboundContextInternal>>>,
    );
    #[doc(hidden)]
    fn set_next_out_handler(
        &mut self,
        next_out_handler: Option<Arc<Mutex<dyn OutboundHandlerInternal>>>,
    );
}
