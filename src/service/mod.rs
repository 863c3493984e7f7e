//! The RPC surface over a pipeline: services, filters, factories and the
//! client/server dispatchers that terminate a pipeline.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Error;

mod client_dispatcher;
mod server_dispatcher;

#[cfg(test)]
mod service_test;

pub use client_dispatcher::{PipelinedClientDispatcher, SerialClientDispatcher};
pub use server_dispatcher::{
    MultiplexServerDispatcher, PipelinedServerDispatcher, SerialServerDispatcher,
};

/// An asynchronous function from request to response, the basic unit of the
/// RPC interface.
#[async_trait]
pub trait Service: Send + Sync {
    /// Request type accepted by the service.
    type Request: Send + Sync + 'static;
    /// Response type produced by the service.
    type Response: Send + Sync + 'static;

    /// Calls the service.
    async fn call(&self, req: Self::Request) -> Result<Self::Response, Error>;

    /// Releases whatever the service holds on to.
    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Returns false once the service can no longer handle calls.
    fn is_available(&self) -> bool {
        true
    }
}

/// A shared, type-erased [Service].
pub type BoxService<Req, Resp> = Arc<dyn Service<Request = Req, Response = Resp>>;

/// A decorator/transformer of a service: it may rewrite the request on the way
/// in and the response on the way out, across different type pairs.
#[async_trait]
pub trait ServiceFilter: Send + Sync {
    /// Request type exposed by the filtered service.
    type ReqA: Send + Sync + 'static;
    /// Response type exposed by the filtered service.
    type RespA: Send + Sync + 'static;
    /// Request type of the wrapped service.
    type ReqB: Send + Sync + 'static;
    /// Response type of the wrapped service.
    type RespB: Send + Sync + 'static;

    /// Handles one request, delegating to the wrapped service as needed.
    async fn filter(
        &self,
        req: Self::ReqA,
        inner: &BoxService<Self::ReqB, Self::RespB>,
    ) -> Result<Self::RespA, Error>;
}

/// A [Service] assembled from a [ServiceFilter] and the service it wraps.
pub struct FilteredService<F: ServiceFilter> {
    filter: F,
    inner: BoxService<F::ReqB, F::RespB>,
}

impl<F: ServiceFilter> FilteredService<F> {
    /// Creates a new FilteredService
    pub fn new(filter: F, inner: BoxService<F::ReqB, F::RespB>) -> Self {
        Self { filter, inner }
    }
}

#[async_trait]
impl<F: ServiceFilter> Service for FilteredService<F> {
    type Request = F::ReqA;
    type Response = F::RespA;

    async fn call(&self, req: Self::Request) -> Result<Self::Response, Error> {
        self.filter.filter(req, &self.inner).await
    }

    async fn close(&self) -> Result<(), Error> {
        self.inner.close().await
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}

/// Creates services bound to a client, so RPC calls can be made on the
/// [Service] interface over a client's pipeline.
#[async_trait]
pub trait ServiceFactory: Send + Sync {
    /// Request type of the produced services.
    type Request: Send + Sync + 'static;
    /// Response type of the produced services.
    type Response: Send + Sync + 'static;

    /// Produces a fresh service.
    async fn new_service(&self) -> Result<BoxService<Self::Request, Self::Response>, Error>;
}

/// Adapts a [ServiceFactory] into a [Service] that produces a service per
/// call and closes it afterwards.
pub struct FactoryToService<F: ServiceFactory> {
    factory: F,
}

impl<F: ServiceFactory> FactoryToService<F> {
    /// Creates a new FactoryToService
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl<F: ServiceFactory> Service for FactoryToService<F> {
    type Request = F::Request;
    type Response = F::Response;

    async fn call(&self, req: Self::Request) -> Result<Self::Response, Error> {
        let service = self.factory.new_service().await?;
        let result = service.call(req).await;
        let _ = service.close().await;
        result
    }
}

// Dispatchers sit at the tail of a pipeline; their outbound half just hands
// outbound messages on to the handler before them.
pub(crate) struct PassThroughEncoder<T> {
    phantom: std::marker::PhantomData<T>,
}

impl<T> PassThroughEncoder<T> {
    pub(crate) fn new() -> Self {
        Self {
            phantom: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> crate::channel::OutboundHandler for PassThroughEncoder<T> {
    type Win = T;
    type Wout = T;

    async fn write(
        &mut self,
        ctx: &crate::channel::OutboundContext<Self::Win, Self::Wout>,
        msg: Self::Win,
    ) -> crate::channel::WriteFuture {
        ctx.fire_write(msg).await
    }
}
