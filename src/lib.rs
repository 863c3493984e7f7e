//! ### What is Hawser?
//! Hawser is an asynchronous Rust networking toolkit for building protocols and
//! application clients/servers out of typed, bidirectional handler pipelines,
//! in the spirit of [Netty](https://netty.io) and
//! [Wangle](https://github.com/facebook/wangle).
//!
//! ### What is a Pipeline?
//! The fundamental abstraction of Hawser is the [Pipeline](crate::channel::Pipeline).
//! A pipeline is a chain of request/response [handlers](crate::channel::Handler)
//! that handle inbound events (data from the network) and outbound events
//! (data to the network). Once you chain handlers together, it provides an
//! agile way to convert a raw data stream into the desired message type and
//! the inverse. Each handler should do one and only one function, so that
//! protocols stay easy to change and compose.
//!
//! ### How does an event flow in a Pipeline?
//! ```text
//!                                                     | write()
//!   +-------------------------------------------------+---------------+
//!   |                           Pipeline              |               |
//!   |                                                \|/              |
//!   |    +---------+----------+-----------+-----------+----------+    |
//!   |    |                      Handler  N                       |    |
//!   |    +---------+----------+-----------+-----------+----------+    |
//!   |             /|\                                 |               |
//!   |              |                                  |               |
//!   |     Context.fire_read()              Context.fire_write()       |
//!   |              |                                  |               |
//!   |              |                                 \|/              |
//!   |    +---------+----------+-----------+-----------+----------+    |
//!   |    |                      Handler  1                       |    |
//!   |    +---------+----------+-----------+-----------+----------+    |
//!   |             /|\                                 |               |
//!   +--------------+----------------------------------+---------------+
//!                  | read()                           | write_chain()
//!                  |                                 \|/
//!   +--------------+----------------------------------+---------------+
//!   |              |                                  |               |
//!   |            Event Base (per-transport I/O thread)                |
//!   +-----------------------------------------------------------------+
//! ```
//! Inbound events travel head to tail through every inbound-capable handler;
//! outbound events travel tail to head through every outbound-capable handler.
//! Outbound operations return a [WriteFuture](crate::channel::WriteFuture)
//! resolved when the transport reports completion, so event propagation never
//! blocks the reactor.
//!
//! ### Echo Server Example
//! The pipeline for a line-based echo server couples the socket handler with a
//! line decoder, a string codec and a serial dispatcher around an echo
//! service:
//! ```ignore
//! struct EchoService;
//!
//! #[async_trait]
//! impl Service for EchoService {
//!     type Request = String;
//!     type Response = String;
//!
//!     async fn call(&self, req: String) -> Result<String, Error> {
//!         Ok(format!("{}\r\n", req))
//!     }
//! }
//! ```
//!
//! It is really important to be strict in the order of insertion as handlers
//! are chained by insertion order:
//! ```ignore
//! let mut bootstrap = BootstrapTcpServer::new();
//! bootstrap.pipeline(Box::new(move |transport: Arc<dyn AsyncTransport>| {
//!     Box::pin(async move {
//!         let pipeline: Pipeline<BytesMut, String> = Pipeline::new();
//!
//!         let dispatcher = SerialServerDispatcher::new(Arc::new(EchoService {}));
//!
//!         pipeline.add_back(AsyncSocketHandler::new(transport))?;
//!         pipeline.add_back(ByteToMessageCodec::new(Box::new(
//!             LineBasedFrameDecoder::new(8192, true, TerminatorType::Both),
//!         )))?;
//!         pipeline.add_back(StringCodec::new())?;
//!         pipeline.add_back(dispatcher.clone())?;
//!
//!         let pipeline = Arc::new(pipeline);
//!         pipeline.finalize().await?;
//!
//!         let outbound: Arc<dyn OutboundPipeline<String>> = pipeline.clone();
//!         dispatcher.bind(&outbound);
//!         pipeline
//!     })
//! }));
//!
//! bootstrap.bind(format!("{}:{}", host, port)).await?;
//! ```
//!
//! ### Echo Client Example
//! The client pipeline is the same topology terminated by a client dispatcher,
//! which doubles as the [Service](crate::service::Service) you call:
//! ```ignore
//! let dispatcher = SerialClientDispatcher::<String, String>::new();
//!
//! let mut bootstrap = BootstrapTcpClient::new();
//! bootstrap.pipeline({
//!     let dispatcher = dispatcher.clone();
//!     Box::new(move |transport: Arc<dyn AsyncTransport>| { /* as above */ })
//! });
//!
//! let pipeline = bootstrap.connect(addr, Duration::from_secs(5)).await?;
//! let outbound: Arc<dyn OutboundPipeline<String>> = pipeline.clone();
//! dispatcher.bind(&outbound);
//!
//! let echoed = dispatcher.call("hello".to_string()).await?;
//! ```

#![warn(rust_2018_idioms)]
#![allow(dead_code)]
#![warn(missing_docs)]

pub mod bootstrap;
pub mod buf;
pub mod channel;
pub mod codec;
pub mod error;
pub mod executor;
pub mod runtime;
pub mod service;
pub mod transport;
