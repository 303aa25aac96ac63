//! TCP client and server sockets over IPv4.

use std::cell::RefCell;
use std::os::fd::{AsRawFd, RawFd};
use std::rc::Rc;

use crate::addr::TcpAddr;
use crate::error::SocketError;
use crate::reactor::{Pollable, Reactor, SocketId};
use crate::socket::Connectable;
use crate::socket::server::ServerCore;
use crate::socket::sys;
use crate::socket::transport::Transport;

const LISTEN_BACKLOG: i32 = 128;

/// TCP client socket that connects to a port on an address.
pub struct TcpClient {
    transport: Transport,
    address: String,
    port: u16,
}

impl TcpClient {
    /// Creates a client for `address:port`, registered with the reactor
    /// but not yet connected. The address must be a dotted-quad IPv4
    /// string; hostnames are not resolved.
    pub fn new<A: Into<String>>(reactor: &Reactor, address: A, port: u16) -> Rc<RefCell<TcpClient>> {
        let client = Rc::new(RefCell::new(TcpClient {
            transport: Transport::new(reactor),
            address: address.into(),
            port,
        }));
        let as_dyn: Rc<RefCell<dyn Pollable>> = client.clone();
        reactor.register(client.borrow().socket_id(), &as_dyn);
        client
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Connectable for TcpClient {
    fn connect(&mut self) -> Result<(), SocketError> {
        if self.is_connected() {
            log::warn!("tried to connect already connected TCP client socket");
            return Err(SocketError::AlreadyConnected);
        }

        let addr = TcpAddr::parse(&self.address, self.port)?;
        let fd = sys::stream_socket(libc::AF_INET)?;
        log::info!(
            "connecting TCP client socket {} to {}:{}",
            self.socket_id(),
            self.address,
            self.port
        );

        if let Err(err) = sys::connect(fd.as_raw_fd(), &addr) {
            log::warn!(
                "failed to connect TCP client socket {} to {}:{}: {}",
                self.socket_id(),
                self.address,
                self.port,
                err
            );
            return Err(err);
        }

        self.transport.set_fd(fd);
        Ok(())
    }
}

impl std::ops::Deref for TcpClient {
    type Target = Transport;

    fn deref(&self) -> &Transport {
        &self.transport
    }
}

impl std::ops::DerefMut for TcpClient {
    fn deref_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }
}

impl Pollable for TcpClient {
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

/// TCP server socket that listens on a port and accepts child sockets.
pub struct TcpServer {
    core: ServerCore,
    address: String,
    port: u16,
}

impl TcpServer {
    /// Creates a server bound to nothing yet; `connect()` binds and
    /// listens. Binding to port 0 picks an ephemeral port, retrievable
    /// through `local_port()`.
    pub fn new<A: Into<String>>(reactor: &Reactor, address: A, port: u16) -> Rc<RefCell<TcpServer>> {
        let server = Rc::new(RefCell::new(TcpServer {
            core: ServerCore::new(reactor),
            address: address.into(),
            port,
        }));
        let as_dyn: Rc<RefCell<dyn Pollable>> = server.clone();
        reactor.register(server.borrow().socket_id(), &as_dyn);
        server
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The port actually bound, once listening.
    pub fn local_port(&self) -> Option<u16> {
        let fd = self.core.raw_fd()?;
        match sys::local_port(fd) {
            Ok(port) => Some(port),
            Err(err) => {
                log::warn!(
                    "local port lookup for socket {} failed: {}",
                    self.socket_id(),
                    err
                );
                None
            }
        }
    }
}

impl Connectable for TcpServer {
    fn connect(&mut self) -> Result<(), SocketError> {
        if self.is_connected() {
            log::warn!("tried to connect already listening TCP server socket");
            return Err(SocketError::AlreadyConnected);
        }

        let addr = TcpAddr::parse(&self.address, self.port)?;
        let fd = sys::stream_socket(libc::AF_INET)?;
        sys::set_reuse_addr(fd.as_raw_fd(), true)?;
        log::info!(
            "binding TCP server socket {} to {}:{}",
            self.socket_id(),
            self.address,
            self.port
        );

        if let Err(err) = sys::bind(fd.as_raw_fd(), &addr) {
            log::warn!(
                "failed to bind TCP server socket {} to {}:{}: {}",
                self.socket_id(),
                self.address,
                self.port,
                err
            );
            return Err(err);
        }
        if let Err(err) = sys::listen(fd.as_raw_fd(), LISTEN_BACKLOG) {
            log::warn!(
                "failed to listen on TCP server socket {}: {}",
                self.socket_id(),
                err
            );
            return Err(err);
        }

        self.core.set_fd(fd);
        Ok(())
    }
}

impl std::ops::Deref for TcpServer {
    type Target = ServerCore;

    fn deref(&self) -> &ServerCore {
        &self.core
    }
}

impl std::ops::DerefMut for TcpServer {
    fn deref_mut(&mut self) -> &mut ServerCore {
        &mut self.core
    }
}

impl Pollable for TcpServer {
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
