//! Typed, bidirectional handler pipelines: handlers, contexts, pipelines and
//! the built-in adapter handlers.

mod event_base_handler;
mod handler;
mod handler_internal;
mod output_buffering_handler;
mod pipeline;


pub use event_base_handler::EventBaseHandler;
pub use handler::{
    write_done, write_pending, Handler, InboundContext, InboundHandler, OutboundContext,
    OutboundHandler, WriteFuture,
};
pub use handler_internal::{
    InboundContextInternal, InboundHandlerInternal, MessageInternal, OutboundContextInternal,
    OutboundHandlerInternal,
};
pub use output_buffering_handler::{OutputBufferingHandler, SharedPromise};
pub use pipeline::{
    InboundPipeline, OutboundPipeline, Pipeline, PipelineManager, PipelineState,
    DEFAULT_READ_BUFFER_SETTINGS,
};
