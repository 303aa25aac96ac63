//! Concrete socket types and the transport/server engines behind them.

mod server;
pub(crate) mod sys;
mod tcp;
mod transport;
mod unix;

pub use self::server::{AcceptFn, ChildSocket, ServerCore, ServerDisconnectFn};
pub use self::tcp::{TcpClient, TcpServer};
pub use self::transport::{DisconnectFn, ReadFn, SentFn, Transport};
pub use self::unix::{UnixClient, UnixServer};

use crate::error::SocketError;

/// How a transport socket frames inbound data.
///
/// - `Lines` — buffer bytes until delimiter-terminated records are
///   available; one read event per complete line.
/// - `Raw` — one read event per chunk, unframed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadingMode {
    #[default]
    Lines,
    Raw,
}

/// Sockets that can establish (or report) their connection.
pub trait Connectable {
    /// Connects the socket. Implementation-specific: clients create and
    /// connect, servers create, bind and listen, child sockets only
    /// report their status. Errors with `AlreadyConnected` when the
    /// socket is already up.
    fn connect(&mut self) -> Result<(), SocketError>;
}
