//! Thin facade over the async runtime used by the crate.

use std::future::Future;
use std::pin::Pin;

/// Spawns a future onto the multi-threaded runtime of the caller.
pub fn spawn(future: Pin<Box<dyn Future<Output = ()> + Send>>) {
    tokio::spawn(future);
}

/// Synchronization primitives.
pub mod sync {
    pub use tokio::sync::Mutex;
}

/// Networking primitives.
pub mod net {
    pub use tokio::net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream, ToSocketAddrs,
    };
}

/// Async I/O extension traits.
pub mod io {
    pub use tokio::io::{AsyncReadExt, AsyncWriteExt};
}
