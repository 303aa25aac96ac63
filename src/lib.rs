//! Single-threaded, select-based socket reactor with line framing and
//! write throttling.
//!
//! Applications construct concrete sockets against a [`Reactor`],
//! subscribe listeners, call [`Connectable::connect`] and then drive
//! everything by repeatedly calling [`Reactor::poll`] from their own
//! loop. All callbacks run synchronously inside `poll` on the calling
//! thread; there are no internal threads.

pub mod buffer;
pub mod event;
pub mod reactor;
pub mod socket;
mod addr;
mod error;

pub use self::addr::{TcpAddr, ToSockAddr, UnixAddr};
pub use self::buffer::LineBuffer;
pub use self::error::{IoError, SocketError, errno};
pub use self::event::{ListenerId, Listeners};
pub use self::reactor::{Pollable, Reactor, SocketId};
pub use self::socket::{ChildSocket, Connectable, ReadingMode, ServerCore, TcpClient, TcpServer,
                       Transport, UnixClient, UnixServer};
