use crate::bootstrap::{BootstrapTcpClient, BootstrapTcpServer, PipelineFactoryFn};
use crate::channel::{EventBaseHandler, OutboundPipeline, Pipeline, PipelineManager};
use crate::codec::byte_to_message_decoder::{
    ByteToMessageCodec, LengthFieldBasedFrameDecoder, LengthFieldPrepender,
    LineBasedFrameDecoder, TerminatorType,
};
use crate::executor::EventBasePool;
use crate::codec::string_codec::StringCodec;
use crate::error::Error;
use crate::service::{
    BoxService, PipelinedClientDispatcher, PipelinedServerDispatcher, SerialClientDispatcher,
    SerialServerDispatcher, Service,
};
use crate::transport::{AsyncSocketHandler, AsyncTransport};

use anyhow::Result;
use async_trait::async_trait;
use bytes::BytesMut;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct EchoService;

#[async_trait]
impl Service for EchoService {
    type Request = String;
    type Response = String;

    async fn call(&self, req: String) -> Result<String, Error> {
        Ok(format!("{}\r\n", req))
    }
}

struct DelayService;

#[async_trait]
impl Service for DelayService {
    type Request = String;
    type Response = String;

    // requests look like "id:delay_ms"
    async fn call(&self, req: String) -> Result<String, Error> {
        let (id, delay) = req.split_once(':').unwrap_or((req.as_str(), "0"));
        let delay: u64 = delay.parse().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(format!("{}\r\n", id))
    }
}

fn serial_server_factory(service: BoxService<String, String>) -> PipelineFactoryFn<String> {
    Box::new(move |transport: Arc<dyn AsyncTransport>| {
        let service = service.clone();
        Box::pin(async move {
            let pipeline: Pipeline<BytesMut, String> = Pipeline::new();
            let dispatcher = SerialServerDispatcher::new(service);

            pipeline.add_back(AsyncSocketHandler::new(transport)).unwrap();
            pipeline
                .add_back(ByteToMessageCodec::new(Box::new(
                    LineBasedFrameDecoder::new(8192, true, TerminatorType::Both),
                )))
                .unwrap();
            pipeline.add_back(StringCodec::new()).unwrap();
            pipeline.add_back(dispatcher.clone()).unwrap();

            let pipeline = Arc::new(pipeline);
            pipeline.finalize().await.unwrap();

            let outbound: Arc<dyn OutboundPipeline<String>> = pipeline.clone();
            dispatcher.bind(&outbound);
            pipeline
        })
    })
}

fn pipelined_server_factory(service: BoxService<String, String>) -> PipelineFactoryFn<String> {
    Box::new(move |transport: Arc<dyn AsyncTransport>| {
        let service = service.clone();
        Box::pin(async move {
            let pipeline: Pipeline<BytesMut, String> = Pipeline::new();
            let dispatcher = PipelinedServerDispatcher::new(service);

            pipeline.add_back(AsyncSocketHandler::new(transport)).unwrap();
            pipeline
                .add_back(ByteToMessageCodec::new(Box::new(
                    LineBasedFrameDecoder::new(8192, true, TerminatorType::Both),
                )))
                .unwrap();
            pipeline.add_back(StringCodec::new()).unwrap();
            pipeline.add_back(dispatcher.clone()).unwrap();

            let pipeline = Arc::new(pipeline);
            pipeline.finalize().await.unwrap();

            let outbound: Arc<dyn OutboundPipeline<String>> = pipeline.clone();
            dispatcher.bind(&outbound);
            pipeline
        })
    })
}

fn client_factory(
    dispatcher: impl crate::channel::Handler + Clone + 'static,
) -> PipelineFactoryFn<String> {
    Box::new(move |transport: Arc<dyn AsyncTransport>| {
        let dispatcher = dispatcher.clone();
        Box::pin(async move {
            let pipeline: Pipeline<BytesMut, String> = Pipeline::new();

            pipeline.add_back(AsyncSocketHandler::new(transport)).unwrap();
            pipeline.add_back(EventBaseHandler::new()).unwrap();
            pipeline
                .add_back(ByteToMessageCodec::new(Box::new(
                    LineBasedFrameDecoder::new(8192, true, TerminatorType::Both),
                )))
                .unwrap();
            pipeline.add_back(StringCodec::new()).unwrap();
            pipeline.add_back(dispatcher).unwrap();

            let pipeline = Arc::new(pipeline);
            pipeline.finalize().await.unwrap();
            pipeline
        })
    })
}

#[tokio::test]
async fn test_echo_serial_client_server() -> Result<()> {
    let mut server = BootstrapTcpServer::new();
    server.pipeline(serial_server_factory(Arc::new(EchoService {})));
    let server_addr = server.bind("127.0.0.1:0").await?;

    let dispatcher = SerialClientDispatcher::<String, String>::new();
    let mut client = BootstrapTcpClient::new();
    client.pipeline(client_factory(dispatcher.clone()));

    let pipeline = client.connect(server_addr, Duration::from_secs(5)).await?;
    let outbound: Arc<dyn OutboundPipeline<String>> = pipeline.clone();
    dispatcher.bind(&outbound);

    let reply = dispatcher.call("hello\r\n".to_string()).await?;
    assert_eq!("hello", reply);

    let reply = dispatcher.call("bye\r\n".to_string()).await?;
    assert_eq!("bye", reply);

    client.graceful_stop().await;
    server.graceful_stop().await;
    Ok(())
}

#[tokio::test]
async fn test_echo_pipelined_client_server() -> Result<()> {
    let mut server = BootstrapTcpServer::new();
    server.pipeline(pipelined_server_factory(Arc::new(DelayService {})));
    let server_addr = server.bind("127.0.0.1:0").await?;

    let dispatcher = PipelinedClientDispatcher::<String, String>::new();
    let mut client = BootstrapTcpClient::new();
    client.event_base_pool(Arc::new(EventBasePool::new(2)?));
    client.pipeline(client_factory(dispatcher.clone()));

    let pipeline = client.connect(server_addr, Duration::from_secs(5)).await?;
    let outbound: Arc<dyn OutboundPipeline<String>> = pipeline.clone();
    dispatcher.bind(&outbound);

    // server-side completion order would be B, C, A; every caller still gets
    // its own response because both ends run strict FIFO
    let mut calls = Vec::new();
    for req in ["A:60", "B:10", "C:30"] {
        let caller = dispatcher.clone();
        let request = format!("{}\r\n", req);
        calls.push(tokio::spawn(async move { caller.call(request).await }));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let mut replies = Vec::new();
    for call in calls {
        replies.push(call.await??);
    }
    assert_eq!(
        vec!["A".to_string(), "B".to_string(), "C".to_string()],
        replies
    );

    client.graceful_stop().await;
    server.graceful_stop().await;
    Ok(())
}

// Length-prefixed framing on both ends: any string survives the trip
// bit-identical through encoder and decoder.
fn length_field_factory(
    dispatcher: impl crate::channel::Handler + Clone + 'static,
) -> PipelineFactoryFn<String> {
    Box::new(move |transport: Arc<dyn AsyncTransport>| {
        let dispatcher = dispatcher.clone();
        Box::pin(async move {
            let pipeline: Pipeline<BytesMut, String> = Pipeline::new();

            pipeline.add_back(AsyncSocketHandler::new(transport)).unwrap();
            pipeline
                .add_back(ByteToMessageCodec::new(Box::new(
                    LengthFieldBasedFrameDecoder::new(4, 65536, 0, 0, 4, true).unwrap(),
                )))
                .unwrap();
            pipeline
                .add_back(LengthFieldPrepender::new(4, 0, false, true).unwrap())
                .unwrap();
            pipeline.add_back(StringCodec::new()).unwrap();
            pipeline.add_back(dispatcher).unwrap();

            let pipeline = Arc::new(pipeline);
            pipeline.finalize().await.unwrap();
            pipeline
        })
    })
}

struct LengthFieldEchoService;

#[async_trait]
impl Service for LengthFieldEchoService {
    type Request = String;
    type Response = String;

    async fn call(&self, req: String) -> Result<String, Error> {
        Ok(req)
    }
}

#[tokio::test]
async fn test_length_field_round_trip() -> Result<()> {
    let mut server = BootstrapTcpServer::new();
    server.pipeline({
        let service: BoxService<String, String> = Arc::new(LengthFieldEchoService {});
        Box::new(move |transport: Arc<dyn AsyncTransport>| {
            let service = service.clone();
            Box::pin(async move {
                let pipeline: Pipeline<BytesMut, String> = Pipeline::new();
                let dispatcher = SerialServerDispatcher::new(service);

                pipeline.add_back(AsyncSocketHandler::new(transport)).unwrap();
                pipeline
                    .add_back(ByteToMessageCodec::new(Box::new(
                        LengthFieldBasedFrameDecoder::new(4, 65536, 0, 0, 4, true).unwrap(),
                    )))
                    .unwrap();
                pipeline
                    .add_back(LengthFieldPrepender::new(4, 0, false, true).unwrap())
                    .unwrap();
                pipeline.add_back(StringCodec::new()).unwrap();
                pipeline.add_back(dispatcher.clone()).unwrap();

                let pipeline = Arc::new(pipeline);
                pipeline.finalize().await.unwrap();

                let outbound: Arc<dyn OutboundPipeline<String>> = pipeline.clone();
                dispatcher.bind(&outbound);
                pipeline
            })
        })
    });
    let server_addr = server.bind("127.0.0.1:0").await?;

    let dispatcher = SerialClientDispatcher::<String, String>::new();
    let mut client = BootstrapTcpClient::new();
    client.pipeline(length_field_factory(dispatcher.clone()));

    let pipeline = client.connect(server_addr, Duration::from_secs(5)).await?;
    let outbound: Arc<dyn OutboundPipeline<String>> = pipeline.clone();
    dispatcher.bind(&outbound);

    // embedded terminators and binary-ish text come back untouched
    let message = "line one\r\nline two\u{00}binary".to_string();
    let reply = dispatcher.call(message.clone()).await?;
    assert_eq!(message, reply);

    client.graceful_stop().await;
    server.graceful_stop().await;
    Ok(())
}

struct CountingManager {
    deletes: AtomicUsize,
    refreshes: AtomicUsize,
}

impl PipelineManager for CountingManager {
    fn delete_pipeline(&self) {
        self.deletes.fetch_add(1, Ordering::SeqCst);
    }
    fn refresh_timeout(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_close_notifies_manager_once() -> Result<()> {
    let mut server = BootstrapTcpServer::new();
    server.pipeline(serial_server_factory(Arc::new(EchoService {})));
    let server_addr = server.bind("127.0.0.1:0").await?;

    let dispatcher = SerialClientDispatcher::<String, String>::new();
    let mut client = BootstrapTcpClient::new();
    client.pipeline(client_factory(dispatcher.clone()));

    let pipeline = client.connect(server_addr, Duration::from_secs(5)).await?;
    let outbound: Arc<dyn OutboundPipeline<String>> = pipeline.clone();
    dispatcher.bind(&outbound);

    let manager = Arc::new(CountingManager {
        deletes: AtomicUsize::new(0),
        refreshes: AtomicUsize::new(0),
    });
    let dyn_manager: Arc<dyn PipelineManager> = manager.clone();
    pipeline.set_pipeline_manager(&dyn_manager);

    let reply = dispatcher.call("ping\r\n".to_string()).await?;
    assert_eq!("ping", reply);
    assert!(manager.refreshes.load(Ordering::SeqCst) >= 1);

    pipeline.close().await.await?;
    // closing an already-closed pipeline still resolves successfully and the
    // manager hears about the teardown exactly once
    pipeline.close().await.await?;
    assert_eq!(1, manager.deletes.load(Ordering::SeqCst));

    client.graceful_stop().await;
    server.graceful_stop().await;
    Ok(())
}

#[tokio::test]
async fn test_connect_refused() -> Result<()> {
    let dispatcher = SerialClientDispatcher::<String, String>::new();
    let mut client = BootstrapTcpClient::new();
    client.pipeline(client_factory(dispatcher));

    // nothing listens on this port
    let result = client
        .connect("127.0.0.1:1", Duration::from_secs(5))
        .await;
    assert!(result.is_err());

    Ok(())
}
