use crate::channel::*;
use crate::error::Error;
use crate::service::*;

use anyhow::Result;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

// Stands in for the wire end of a pipeline: forwards inbound reads and
// captures outbound writes for the test to observe.
struct CaptureDecoder;

struct CaptureEncoder {
    written_tx: mpsc::UnboundedSender<String>,
}

struct CaptureHandler {
    decoder: CaptureDecoder,
    encoder: CaptureEncoder,
}

impl CaptureHandler {
    fn new(written_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            decoder: CaptureDecoder {},
            encoder: CaptureEncoder { written_tx },
        }
    }
}

#[async_trait]
impl InboundHandler for CaptureDecoder {
    type Rin = String;
    type Rout = String;

    async fn read(&mut self, ctx: &InboundContext<Self::Rin, Self::Rout>, msg: Self::Rin) {
        ctx.fire_read(msg).await;
    }
}

#[async_trait]
impl OutboundHandler for CaptureEncoder {
    type Win = String;
    type Wout = String;

    async fn write(
        &mut self,
        _ctx: &OutboundContext<Self::Win, Self::Wout>,
        msg: Self::Win,
    ) -> WriteFuture {
        let _ = self.written_tx.send(msg);
        write_done(Ok(()))
    }

    async fn close(&mut self, _ctx: &OutboundContext<Self::Win, Self::Wout>) -> WriteFuture {
        write_done(Ok(()))
    }
}

impl Handler for CaptureHandler {
    type Rin = String;
    type Rout = String;
    type Win = String;
    type Wout = String;

    fn name(&self) -> &str {
        "CaptureHandler"
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

async fn client_pipeline<D: Handler>(
    dispatcher: D,
) -> Result<(Arc<Pipeline<String, String>>, mpsc::UnboundedReceiver<String>)> {
    let (written_tx, written_rx) = mpsc::unbounded_channel();
    let pipeline: Pipeline<String, String> = Pipeline::new();
    pipeline.add_back(CaptureHandler::new(written_tx))?;
    pipeline.add_back(dispatcher)?;
    pipeline.finalize().await?;
    Ok((Arc::new(pipeline), written_rx))
}

#[tokio::test]
async fn test_serial_client_dispatcher_round_trip() -> Result<()> {
    let dispatcher = SerialClientDispatcher::<String, String>::new();
    let (pipeline, mut written_rx) = client_pipeline(dispatcher.clone()).await?;
    let outbound: Arc<dyn OutboundPipeline<String>> = pipeline.clone();
    dispatcher.bind(&outbound);
    assert!(dispatcher.is_available());

    let caller = dispatcher.clone();
    let call = tokio::spawn(async move { caller.call("ping".to_string()).await });

    // the request went down the outbound chain
    assert_eq!(Some("ping".to_string()), written_rx.recv().await);

    // and the response read fulfils the call
    pipeline.read("pong".to_string()).await;
    assert_eq!("pong".to_string(), call.await??);

    Ok(())
}

#[tokio::test]
async fn test_serial_client_dispatcher_rejects_second_outstanding() -> Result<()> {
    let dispatcher = SerialClientDispatcher::<String, String>::new();
    let (pipeline, mut written_rx) = client_pipeline(dispatcher.clone()).await?;
    let outbound: Arc<dyn OutboundPipeline<String>> = pipeline.clone();
    dispatcher.bind(&outbound);

    let caller = dispatcher.clone();
    let first = tokio::spawn(async move { caller.call("first".to_string()).await });
    assert_eq!(Some("first".to_string()), written_rx.recv().await);

    // one request may be outstanding at a time
    let err = dispatcher.call("second".to_string()).await.unwrap_err();
    assert_eq!(ErrorKind::WouldBlock, err.kind);

    pipeline.read("resp".to_string()).await;
    assert_eq!("resp".to_string(), first.await??);

    Ok(())
}

#[tokio::test]
async fn test_serial_client_dispatcher_fails_on_transport_inactive() -> Result<()> {
    let dispatcher = SerialClientDispatcher::<String, String>::new();
    let (pipeline, mut written_rx) = client_pipeline(dispatcher.clone()).await?;
    let outbound: Arc<dyn OutboundPipeline<String>> = pipeline.clone();
    dispatcher.bind(&outbound);

    let caller = dispatcher.clone();
    let call = tokio::spawn(async move { caller.call("ping".to_string()).await });
    assert_eq!(Some("ping".to_string()), written_rx.recv().await);

    pipeline.transport_inactive().await;
    let err = call.await?.unwrap_err();
    assert_eq!(ErrorKind::BrokenPipe, err.kind);

    Ok(())
}

#[tokio::test]
async fn test_pipelined_client_dispatcher_matches_responses_in_order() -> Result<()> {
    let dispatcher = PipelinedClientDispatcher::<String, String>::new();
    let (pipeline, mut written_rx) = client_pipeline(dispatcher.clone()).await?;
    let outbound: Arc<dyn OutboundPipeline<String>> = pipeline.clone();
    dispatcher.bind(&outbound);

    let mut calls = Vec::new();
    for req in ["A", "B", "C"] {
        let caller = dispatcher.clone();
        let request = req.to_string();
        calls.push(tokio::spawn(async move { caller.call(request).await }));
        // wait for each request to hit the wire so the FIFO order is fixed
        assert_eq!(Some(req.to_string()), written_rx.recv().await);
    }

    // responses come back in wire order and pair up first-in first-out
    for resp in ["resp-A", "resp-B", "resp-C"] {
        pipeline.read(resp.to_string()).await;
    }
    let mut results = Vec::new();
    for call in calls {
        results.push(call.await??);
    }
    assert_eq!(
        vec![
            "resp-A".to_string(),
            "resp-B".to_string(),
            "resp-C".to_string()
        ],
        results
    );

    Ok(())
}

struct DelayedEchoService;

#[async_trait]
impl Service for DelayedEchoService {
    type Request = String;
    type Response = String;

    // requests look like "id:delay_ms"; the response is the id after the delay
    async fn call(&self, req: String) -> Result<String, Error> {
        let (id, delay) = req.split_once(':').unwrap_or((req.as_str(), "0"));
        let delay: u64 = delay.parse().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(id.to_string())
    }
}

#[tokio::test]
async fn test_serial_server_dispatcher_echoes() -> Result<()> {
    let service: BoxService<String, String> = Arc::new(DelayedEchoService {});
    let dispatcher = SerialServerDispatcher::new(service);
    let (pipeline, mut written_rx) = client_pipeline(dispatcher.clone()).await?;
    let outbound: Arc<dyn OutboundPipeline<String>> = pipeline.clone();
    dispatcher.bind(&outbound);

    pipeline.read("one:0".to_string()).await;
    assert_eq!(Some("one".to_string()), written_rx.recv().await);

    Ok(())
}

#[tokio::test]
async fn test_pipelined_server_dispatcher_writes_in_request_order() -> Result<()> {
    let service: BoxService<String, String> = Arc::new(DelayedEchoService {});
    let dispatcher = PipelinedServerDispatcher::new(service);
    let (pipeline, mut written_rx) = client_pipeline(dispatcher.clone()).await?;
    let outbound: Arc<dyn OutboundPipeline<String>> = pipeline.clone();
    dispatcher.bind(&outbound);

    // completion order would be 2, 3, 1; the wire order must stay 1, 2, 3
    pipeline.read("1:60".to_string()).await;
    pipeline.read("2:10".to_string()).await;
    pipeline.read("3:30".to_string()).await;

    let mut responses = Vec::new();
    for _ in 0..3 {
        responses.push(written_rx.recv().await.unwrap_or_default());
    }
    assert_eq!(
        vec!["1".to_string(), "2".to_string(), "3".to_string()],
        responses
    );

    Ok(())
}

#[tokio::test]
async fn test_multiplex_server_dispatcher_writes_in_completion_order() -> Result<()> {
    let service: BoxService<String, String> = Arc::new(DelayedEchoService {});
    let dispatcher = MultiplexServerDispatcher::new(service);
    let (pipeline, mut written_rx) = client_pipeline(dispatcher.clone()).await?;
    let outbound: Arc<dyn OutboundPipeline<String>> = pipeline.clone();
    dispatcher.bind(&outbound);

    pipeline.read("1:90".to_string()).await;
    pipeline.read("2:10".to_string()).await;
    pipeline.read("3:45".to_string()).await;

    let mut responses = Vec::new();
    for _ in 0..3 {
        responses.push(written_rx.recv().await.unwrap_or_default());
    }
    assert_eq!(
        vec!["2".to_string(), "3".to_string(), "1".to_string()],
        responses
    );

    Ok(())
}

struct TrimFilter;

#[async_trait]
impl ServiceFilter for TrimFilter {
    type ReqA = String;
    type RespA = usize;
    type ReqB = String;
    type RespB = String;

    async fn filter(
        &self,
        req: Self::ReqA,
        inner: &BoxService<Self::ReqB, Self::RespB>,
    ) -> Result<Self::RespA, Error> {
        let resp = inner.call(req.trim().to_string()).await?;
        Ok(resp.len())
    }
}

#[tokio::test]
async fn test_filtered_service_transforms_both_directions() -> Result<()> {
    let inner: BoxService<String, String> = Arc::new(DelayedEchoService {});
    let filtered = FilteredService::new(TrimFilter {}, inner);

    assert!(filtered.is_available());
    let length = filtered.call("  four:0  ".to_string()).await?;
    assert_eq!("four".len(), length);

    Ok(())
}

struct ConstFactory;

#[async_trait]
impl ServiceFactory for ConstFactory {
    type Request = String;
    type Response = String;

    async fn new_service(&self) -> Result<BoxService<String, String>, Error> {
        Ok(Arc::new(DelayedEchoService {}))
    }
}

#[tokio::test]
async fn test_factory_to_service() -> Result<()> {
    let service = FactoryToService::new(ConstFactory {});
    assert_eq!("id".to_string(), service.call("id:0".to_string()).await?);

    Ok(())
}
