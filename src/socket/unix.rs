//! Unix domain stream sockets.

use std::cell::RefCell;
use std::os::fd::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::rc::Rc;

use crate::addr::UnixAddr;
use crate::error::SocketError;
use crate::reactor::{Pollable, Reactor, SocketId};
use crate::socket::Connectable;
use crate::socket::server::ServerCore;
use crate::socket::sys;
use crate::socket::transport::Transport;

const LISTEN_BACKLOG: i32 = 128;

/// Unix domain client socket that connects to a socket file.
pub struct UnixClient {
    transport: Transport,
    path: PathBuf,
}

impl UnixClient {
    /// Creates a client for the socket file at `path`, registered with
    /// the reactor but not yet connected.
    pub fn new<P: Into<PathBuf>>(reactor: &Reactor, path: P) -> Rc<RefCell<UnixClient>> {
        let client = Rc::new(RefCell::new(UnixClient {
            transport: Transport::new(reactor),
            path: path.into(),
        }));
        let as_dyn: Rc<RefCell<dyn Pollable>> = client.clone();
        reactor.register(client.borrow().socket_id(), &as_dyn);
        client
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl Connectable for UnixClient {
    fn connect(&mut self) -> Result<(), SocketError> {
        if self.is_connected() {
            log::warn!("tried to connect already connected UNIX client socket");
            return Err(SocketError::AlreadyConnected);
        }

        let addr = UnixAddr::new(self.path.as_os_str().as_encoded_bytes());
        let fd = sys::stream_socket(libc::AF_UNIX)?;
        log::info!(
            "connecting UNIX client socket {} to {}",
            self.socket_id(),
            self.path.display()
        );

        if let Err(err) = sys::connect(fd.as_raw_fd(), &addr) {
            log::warn!(
                "failed to connect UNIX client socket {} to {}: {}",
                self.socket_id(),
                self.path.display(),
                err
            );
            return Err(err);
        }

        self.transport.set_fd(fd);
        Ok(())
    }
}

impl std::ops::Deref for UnixClient {
    type Target = Transport;

    fn deref(&self) -> &Transport {
        &self.transport
    }
}

impl std::ops::DerefMut for UnixClient {
    fn deref_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }
}

impl Pollable for UnixClient {
    fn socket_id(&self) -> SocketId {
        self.transport.socket_id()
    }

    fn raw_fd(&self) -> Option<RawFd> {
        self.transport.raw_fd()
    }

    fn ready(&mut self) {
        self.transport.handle_ready();
    }

    fn post_poll(&mut self) {
        self.transport.flush_throttled();
    }
}

/// Unix domain server socket.
///
/// Binds a socket file at the configured path and unlinks it again on
/// disconnect — callers must point it at a path nothing else owns.
pub struct UnixServer {
    core: ServerCore,
    path: PathBuf,
}

impl UnixServer {
    /// Creates a server for the socket file at `path`; `connect()` binds
    /// and listens.
    pub fn new<P: Into<PathBuf>>(reactor: &Reactor, path: P) -> Rc<RefCell<UnixServer>> {
        let server = Rc::new(RefCell::new(UnixServer {
            core: ServerCore::new(reactor),
            path: path.into(),
        }));
        let as_dyn: Rc<RefCell<dyn Pollable>> = server.clone();
        reactor.register(server.borrow().socket_id(), &as_dyn);
        server
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl Connectable for UnixServer {
    fn connect(&mut self) -> Result<(), SocketError> {
        if self.is_connected() {
            log::warn!("tried to connect already listening UNIX server socket");
            return Err(SocketError::AlreadyConnected);
        }

        let addr = UnixAddr::new(self.path.as_os_str().as_encoded_bytes());
        let fd = sys::stream_socket(libc::AF_UNIX)?;
        log::info!(
            "binding UNIX server socket {} to {}",
            self.socket_id(),
            self.path.display()
        );

        if let Err(err) = sys::bind(fd.as_raw_fd(), &addr) {
            log::warn!(
                "failed to bind UNIX server socket {} to {}: {}",
                self.socket_id(),
                self.path.display(),
                err
            );
            return Err(err);
        }
        if let Err(err) = sys::listen(fd.as_raw_fd(), LISTEN_BACKLOG) {
            log::warn!(
                "failed to listen on UNIX server socket {}: {}",
                self.socket_id(),
                err
            );
            return Err(err);
        }

        self.core.set_fd(fd);
        self.core.set_unlink_path(self.path.clone());
        Ok(())
    }
}

impl std::ops::Deref for UnixServer {
    type Target = ServerCore;

    fn deref(&self) -> &ServerCore {
        &self.core
    }
}

impl std::ops::DerefMut for UnixServer {
    fn deref_mut(&mut self) -> &mut ServerCore {
        &mut self.core
    }
}

impl Pollable for UnixServer {
    fn socket_id(&self) -> SocketId {
        self.core.socket_id()
    }

    fn raw_fd(&self) -> Option<RawFd> {
        self.core.raw_fd()
    }

    fn pre_poll(&mut self) {
        self.core.prune_children();
    }

    fn ready(&mut self) {
        self.core.handle_ready();
    }
}
