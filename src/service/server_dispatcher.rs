use async_trait::async_trait;
use log::warn;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex as StdMutex, Weak};

use crate::channel::{
    Handler, InboundContext, InboundHandler, OutboundHandler, OutboundPipeline,
};
use crate::error::Error;
use crate::runtime;
use crate::service::{BoxService, PassThroughEncoder, Service};

fn bound_pipeline<Resp: Send + Sync + 'static>(
    slot: &StdMutex<Option<Weak<dyn OutboundPipeline<Resp>>>>,
) -> Result<Arc<dyn OutboundPipeline<Resp>>, Error> {
    let pipeline = slot.lock().unwrap();
    pipeline.as_ref().and_then(Weak::upgrade).ok_or_else(|| {
        Error::new(
            ErrorKind::NotConnected,
            "dispatcher is not bound to a pipeline".to_string(),
        )
    })
}

struct SerialServerShared<Req: Send + Sync + 'static, Resp: Send + Sync + 'static> {
    service: BoxService<Req, Resp>,
    pipeline: StdMutex<Option<Weak<dyn OutboundPipeline<Resp>>>>,
}

/// Serves one request at a time: the service future is awaited inside `read`,
/// so concurrent requests queue naturally behind the inbound chain.
pub struct SerialServerDispatcher<Req: Send + Sync + 'static, Resp: Send + Sync + 'static> {
    shared: Arc<SerialServerShared<Req, Resp>>,
}

impl<Req: Send + Sync + 'static, Resp: Send + Sync + 'static> Clone for SerialServerDispatcher<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<Req, Resp> SerialServerDispatcher<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    /// Creates a new SerialServerDispatcher around a service.
    pub fn new(service: BoxService<Req, Resp>) -> Self {
        Self {
            shared: Arc::new(SerialServerShared {
                service,
                pipeline: StdMutex::new(None),
            }),
        }
    }

    /// Binds the dispatcher to the pipeline a clone of it was added to. Only a
    /// weak reference is kept.
    pub fn bind(&self, pipeline: &Arc<dyn OutboundPipeline<Resp>>) -> &Self {
        let mut slot = self.shared.pipeline.lock().unwrap();
        *slot = Some(Arc::downgrade(pipeline));
        self
    }
}

struct SerialServerDecoder<Req: Send + Sync + 'static, Resp: Send + Sync + 'static> {
    shared: Arc<SerialServerShared<Req, Resp>>,
}

#[async_trait]
impl<Req, Resp> InboundHandler for SerialServerDecoder<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    type Rin = Req;
    type Rout = Req;

    async fn read(&mut self, _ctx: &InboundContext<Self::Rin, Self::Rout>, msg: Self::Rin) {
        let result = self.shared.service.call(msg).await;

        let pipeline = match bound_pipeline(&self.shared.pipeline) {
            Ok(pipeline) => pipeline,
            Err(_) => {
                warn!("server dispatcher has no pipeline to respond on");
                return;
            }
        };
        match result {
            Ok(resp) => {
                let _ = pipeline.write(resp).await;
            }
            Err(err) => {
                let _ = pipeline.write_exception(err).await;
            }
        }
    }
}

impl<Req, Resp> Handler for SerialServerDispatcher<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    type Rin = Req;
    type Rout = Req;
    type Win = Resp;
    type Wout = Resp;

    fn name(&self) -> &str {
        "SerialServerDispatcher"
    }

    fn split(
        self,
    ) -> (
        Option<Box<dyn InboundHandler<Rin = Self::Rin, Rout = Self::Rout>>>,
        Option<Box<dyn OutboundHandler<Win = Self::Win, Wout = Self::Wout>>>,
    ) {
        (
            Some(Box::new(SerialServerDecoder {
                shared: self.shared,
            })),
            Some(Box::new(PassThroughEncoder::new())),
        )
    }
}

struct PipelinedServerInner<Resp: Send + Sync + 'static> {
    // next request id to allocate; the first request gets 1
    request_id: u32,
    responses: HashMap<u32, Result<Resp, Error>>,
    last_written_id: u32,
}

struct PipelinedServerShared<Req: Send + Sync + 'static, Resp: Send + Sync + 'static> {
    service: BoxService<Req, Resp>,
    pipeline: StdMutex<Option<Weak<dyn OutboundPipeline<Resp>>>>,
    inner: tokio::sync::Mutex<PipelinedServerInner<Resp>>,
}

impl<Req, Resp> PipelinedServerShared<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    // Write out every response whose predecessors have all been written.
    async fn flush(&self) {
        let mut inner = self.inner.lock().await;
        loop {
            let next_id = inner.last_written_id + 1;
            let Some(result) = inner.responses.remove(&next_id) else {
                break;
            };
            let pipeline = match bound_pipeline(&self.pipeline) {
                Ok(pipeline) => pipeline,
                Err(_) => {
                    warn!("server dispatcher has no pipeline to respond on");
                    return;
                }
            };
            match result {
                Ok(resp) => {
                    let _ = pipeline.write(resp).await;
                }
                Err(err) => {
                    let _ = pipeline.write_exception(err).await;
                }
            }
            inner.last_written_id += 1;
        }
    }
}

/// Invokes the service concurrently as requests arrive but emits responses
/// strictly in request order, holding completed responses back until all of
/// their predecessors have been written.
pub struct PipelinedServerDispatcher<Req: Send + Sync + 'static, Resp: Send + Sync + 'static> {
    shared: Arc<PipelinedServerShared<Req, Resp>>,
}

impl<Req: Send + Sync + 'static, Resp: Send + Sync + 'static> Clone for PipelinedServerDispatcher<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<Req, Resp> PipelinedServerDispatcher<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    /// Creates a new PipelinedServerDispatcher around a service.
    pub fn new(service: BoxService<Req, Resp>) -> Self {
        Self {
            shared: Arc::new(PipelinedServerShared {
                service,
                pipeline: StdMutex::new(None),
                inner: tokio::sync::Mutex::new(PipelinedServerInner {
                    request_id: 1,
                    responses: HashMap::new(),
                    last_written_id: 0,
                }),
            }),
        }
    }

    /// Binds the dispatcher to the pipeline a clone of it was added to. Only a
    /// weak reference is kept.
    pub fn bind(&self, pipeline: &Arc<dyn OutboundPipeline<Resp>>) -> &Self {
        let mut slot = self.shared.pipeline.lock().unwrap();
        *slot = Some(Arc::downgrade(pipeline));
        self
    }
}

struct PipelinedServerDecoder<Req: Send + Sync + 'static, Resp: Send + Sync + 'static> {
    shared: Arc<PipelinedServerShared<Req, Resp>>,
}

#[async_trait]
impl<Req, Resp> InboundHandler for PipelinedServerDecoder<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    type Rin = Req;
    type Rout = Req;

    async fn read(&mut self, _ctx: &InboundContext<Self::Rin, Self::Rout>, msg: Self::Rin) {
        let id = {
            let mut inner = self.shared.inner.lock().await;
            let id = inner.request_id;
            inner.request_id += 1;
            id
        };

        let shared = self.shared.clone();
        runtime::spawn(Box::pin(async move {
            let result = shared.service.call(msg).await;
            {
                let mut inner = shared.inner.lock().await;
                inner.responses.insert(id, result);
            }
            shared.flush().await;
        }));
    }
}

impl<Req, Resp> Handler for PipelinedServerDispatcher<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    type Rin = Req;
    type Rout = Req;
    type Win = Resp;
    type Wout = Resp;

    fn name(&self) -> &str {
        "PipelinedServerDispatcher"
    }

    fn split(
        self,
    ) -> (
        Option<Box<dyn InboundHandler<Rin = Self::Rin, Rout = Self::Rout>>>,
        Option<Box<dyn OutboundHandler<Win = Self::Win, Wout = Self::Wout>>>,
    ) {
        (
            Some(Box::new(PipelinedServerDecoder {
                shared: self.shared,
            })),
            Some(Box::new(PassThroughEncoder::new())),
        )
    }
}

struct MultiplexServerShared<Req: Send + Sync + 'static, Resp: Send + Sync + 'static> {
    service: BoxService<Req, Resp>,
    pipeline: StdMutex<Option<Weak<dyn OutboundPipeline<Resp>>>>,
}

/// Invokes the service concurrently and writes each response as soon as it is
/// ready, in no particular order. Assumes the wire protocol carries
/// per-request correlation ids that the pipeline has already copied from
/// request to response.
pub struct MultiplexServerDispatcher<Req: Send + Sync + 'static, Resp: Send + Sync + 'static> {
    shared: Arc<MultiplexServerShared<Req, Resp>>,
}

impl<Req: Send + Sync + 'static, Resp: Send + Sync + 'static> Clone for MultiplexServerDispatcher<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<Req, Resp> MultiplexServerDispatcher<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    /// Creates a new MultiplexServerDispatcher around a service.
    pub fn new(service: BoxService<Req, Resp>) -> Self {
        Self {
            shared: Arc::new(MultiplexServerShared {
                service,
                pipeline: StdMutex::new(None),
            }),
        }
    }

    /// Binds the dispatcher to the pipeline a clone of it was added to. Only a
    /// weak reference is kept.
    pub fn bind(&self, pipeline: &Arc<dyn OutboundPipeline<Resp>>) -> &Self {
        let mut slot = self.shared.pipeline.lock().unwrap();
        *slot = Some(Arc::downgrade(pipeline));
        self
    }
}

struct MultiplexServerDecoder<Req: Send + Sync + 'static, Resp: Send + Sync + 'static> {
    shared: Arc<MultiplexServerShared<Req, Resp>>,
}

#[async_trait]
impl<Req, Resp> InboundHandler for MultiplexServerDecoder<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    type Rin = Req;
    type Rout = Req;

    async fn read(&mut self, _ctx: &InboundContext<Self::Rin, Self::Rout>, msg: Self::Rin) {
        let shared = self.shared.clone();
        runtime::spawn(Box::pin(async move {
            let result = shared.service.call(msg).await;
            let pipeline = match bound_pipeline(&shared.pipeline) {
                Ok(pipeline) => pipeline,
                Err(_) => {
                    warn!("server dispatcher has no pipeline to respond on");
                    return;
                }
            };
            match result {
                Ok(resp) => {
                    let _ = pipeline.write(resp).await;
                }
                Err(err) => {
                    let _ = pipeline.write_exception(err).await;
                }
            }
        }));
    }
}

impl<Req, Resp> Handler for MultiplexServerDispatcher<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    type Rin = Req;
    type Rout = Req;
    type Win = Resp;
    type Wout = Resp;

    fn name(&self) -> &str {
        "MultiplexServerDispatcher"
    }

    fn split(
        self,
    ) -> (
        Option<Box<dyn InboundHandler<Rin = Self::Rin, Rout = Self::Rout>>>,
        Option<Box<dyn OutboundHandler<Win = Self::Win, Wout = Self::Wout>>>,
    ) {
        (
            Some(Box::new(MultiplexServerDecoder {
                shared: self.shared,
            })),
            Some(Box::new(PassThroughEncoder::new())),
        )
    }
}
