//! Passive listening sockets and the child transports they accept.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::rc::Rc;

use crate::error::SocketError;
use crate::event::{ListenerId, Listeners};
use crate::reactor::{Pollable, Reactor, SocketId};
use crate::socket::Connectable;
use crate::socket::sys;
use crate::socket::transport::Transport;

/// Listener for accepted connections; receives the server and the freshly
/// registered child socket.
pub type AcceptFn = Box<dyn FnMut(&mut ServerCore, &Rc<RefCell<ChildSocket>>)>;

/// Listener fired when the server socket disconnects.
pub type ServerDisconnectFn = Box<dyn FnMut(&mut ServerCore)>;

/// Listening socket engine embedded in `TcpServer` and `UnixServer`.
///
/// Owns the children it accepted, keyed by their socket id. Children that
/// disconnect are collected during the server's pre-poll phase; children
/// still connected when the server disconnects are disconnected with it.
pub struct ServerCore {
    id: SocketId,
    reactor: Reactor,
    fd: Option<OwnedFd>,
    children: BTreeMap<SocketId, Rc<RefCell<ChildSocket>>>,
    unlink_path: Option<PathBuf>,
    accept_listeners: Listeners<AcceptFn>,
    disconnected_listeners: Listeners<ServerDisconnectFn>,
}

impl ServerCore {
    pub(crate) fn new(reactor: &Reactor) -> Self {
        let id = reactor.allocate_id();
        log::debug!("socket {} created", id);
        Self {
            id,
            reactor: reactor.clone(),
            fd: None,
            children: BTreeMap::new(),
            unlink_path: None,
            accept_listeners: Listeners::new(),
            disconnected_listeners: Listeners::new(),
        }
    }

    pub fn socket_id(&self) -> SocketId {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.fd.is_some()
    }

    pub(crate) fn raw_fd(&self) -> Option<RawFd> {
        self.fd.as_ref().map(|fd| fd.as_raw_fd())
    }

    pub(crate) fn set_fd(&mut self, fd: OwnedFd) {
        self.fd = Some(fd);
    }

    /// Path removed from the filesystem when this server disconnects
    /// (Unix servers unlink their socket file).
    pub(crate) fn set_unlink_path(&mut self, path: PathBuf) {
        self.unlink_path = Some(path);
    }

    /// The accepted children still held by this server.
    pub fn children(&self) -> &BTreeMap<SocketId, Rc<RefCell<ChildSocket>>> {
        &self.children
    }

    pub fn on_accepted<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&mut ServerCore, &Rc<RefCell<ChildSocket>>) + 'static,
    {
        self.accept_listeners.add(Box::new(listener))
    }

    pub fn remove_accepted_listener(&mut self, id: ListenerId) -> bool {
        self.accept_listeners.remove(id)
    }

    pub fn on_disconnected<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&mut ServerCore) + 'static,
    {
        self.disconnected_listeners.add(Box::new(listener))
    }

    pub fn remove_disconnected_listener(&mut self, id: ListenerId) -> bool {
        self.disconnected_listeners.remove(id)
    }

    /// Stops listening: disconnects any children still held, releases the
    /// descriptor, fires `disconnected` and unlinks the socket file if one
    /// was bound. No-op when already disconnected.
    pub fn disconnect(&mut self) {
        if let Some(fd) = self.fd.take() {
            for child in self.children.values() {
                child.borrow_mut().disconnect();
            }
            self.children.clear();

            drop(fd);
            self.emit_disconnected();

            if let Some(path) = self.unlink_path.take() {
                if let Err(err) = std::fs::remove_file(&path) {
                    log::warn!(
                        "failed to unlink socket file {} for socket {}: {}",
                        path.display(),
                        self.id,
                        err
                    );
                }
            }

            log::info!("socket {} disconnected", self.id);
        }
    }

    /// Disconnects if needed and removes this socket from the registry.
    /// Idempotent.
    pub fn destroy(&mut self) {
        if self.is_connected() {
            self.disconnect();
        }
        if self.reactor.deregister(self.id) {
            log::debug!("socket {} destroyed", self.id);
        }
    }

    /// Readiness dispatch: accepts exactly one pending connection, adopts
    /// it as a registered child and fires `accepted`. Accept failures are
    /// logged, not fatal.
    pub(crate) fn handle_ready(&mut self) {
        let Some(fd) = self.raw_fd() else {
            return;
        };
        match sys::accept(fd) {
            Ok(child_fd) => {
                let child = ChildSocket::adopt(&self.reactor, child_fd);
                let child_id = child.borrow().socket_id();
                self.children.insert(child_id, child.clone());
                log::debug!("server socket {} accepted child {}", self.id, child_id);
                self.emit_accepted(&child);
            }
            Err(err) => {
                log::warn!("accepting socket from parent {} failed: {}", self.id, err);
            }
        }
    }

    /// Pre-poll collection of children that disconnected since last tick.
    pub(crate) fn prune_children(&mut self) {
        let disconnected: Vec<SocketId> = self
            .children
            .iter()
            .filter(|(_, child)| !child.borrow().is_connected())
            .map(|(id, _)| *id)
            .collect();
        for child_id in disconnected {
            self.children.remove(&child_id);
            log::debug!(
                "disconnected child {} collected by parent socket {}",
                child_id,
                self.id
            );
        }
    }

    fn emit_accepted(&mut self, child: &Rc<RefCell<ChildSocket>>) {
        let mut listeners = std::mem::take(&mut self.accept_listeners);
        for listener in listeners.iter_mut() {
            listener(self, child);
        }
        self.accept_listeners.restore(listeners);
    }

    fn emit_disconnected(&mut self) {
        let mut listeners = std::mem::take(&mut self.disconnected_listeners);
        for listener in listeners.iter_mut() {
            listener(self);
        }
        self.disconnected_listeners.restore(listeners);
    }
}

impl Drop for ServerCore {
    fn drop(&mut self) {
        if self.is_connected() {
            self.disconnect();
        }
    }
}

/// Transport socket created by accepting a connection on a server socket.
///
/// Connected by construction; owned by its parent server until it
/// disconnects, at which point the parent collects it on its next
/// pre-poll.
pub struct ChildSocket {
    transport: Transport,
}

impl ChildSocket {
    /// Wraps an accepted descriptor and registers it with the reactor.
    pub(crate) fn adopt(reactor: &Reactor, fd: OwnedFd) -> Rc<RefCell<ChildSocket>> {
        let mut transport = Transport::new(reactor);
        transport.set_fd(fd);
        let child = Rc::new(RefCell::new(ChildSocket { transport }));
        let as_dyn: Rc<RefCell<dyn Pollable>> = child.clone();
        reactor.register(child.borrow().socket_id(), &as_dyn);
        child
    }
}

impl Connectable for ChildSocket {
    /// Pure status check: a child is connected by construction, so this
    /// performs no I/O.
    fn connect(&mut self) -> Result<(), SocketError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SocketError::NotConnected)
        }
    }
}

impl std::ops::Deref for ChildSocket {
    type Target = Transport;

    fn deref(&self) -> &Transport {
        &self.transport
    }
}

impl std::ops::DerefMut for ChildSocket {
    fn deref_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }
}

impl Pollable for ChildSocket {
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
