//! The readiness-polling loop and its socket registry.
//!
//! A `Reactor` is an explicit instance (cheaply clonable handle) instead of
//! process-global state, so multiple independent reactors can coexist and
//! tests can tear theirs down cleanly. The registry holds weak references:
//! it never extends a socket's lifetime, and entries whose owner dropped
//! are pruned at the start of the next tick.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::socket::sys;

/// Unique socket identifier, assigned at construction and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SocketId(u64);

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Reactor-facing contract every registered socket fulfils.
///
/// Callbacks run synchronously inside `Reactor::poll` on the caller's
/// stack; a handler that blocks stalls every other registered socket.
pub trait Pollable {
    /// This socket's registry id.
    fn socket_id(&self) -> SocketId;

    /// The native descriptor, present iff the socket is connected.
    fn raw_fd(&self) -> Option<RawFd>;

    fn is_connected(&self) -> bool {
        self.raw_fd().is_some()
    }

    /// Runs before the readiness wait of every tick.
    fn pre_poll(&mut self) {}

    /// Runs when the readiness wait reports this socket's descriptor.
    /// Called at most once per tick; implementations drain internally.
    fn ready(&mut self);

    /// Runs after dispatch of every tick (throttled writers flush here).
    fn post_poll(&mut self) {}
}

struct Registry {
    sockets: BTreeMap<SocketId, Weak<RefCell<dyn Pollable>>>,
    next_id: u64,
}

/// Handle to a socket registry and its poll loop.
///
/// Cloning is cheap and yields a handle to the same registry. All sockets
/// constructed against a reactor keep one of these handles for id
/// assignment, child registration and deregistration on destroy.
#[derive(Clone)]
pub struct Reactor {
    inner: Rc<RefCell<Registry>>,
}

impl Reactor {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Registry {
                sockets: BTreeMap::new(),
                next_id: 0,
            })),
        }
    }

    /// Reserves the next socket id. Ids are monotonic and never reused.
    pub fn allocate_id(&self) -> SocketId {
        let mut registry = self.inner.borrow_mut();
        let id = SocketId(registry.next_id);
        registry.next_id += 1;
        id
    }

    /// Registers a socket under a previously allocated id.
    ///
    /// Only a weak reference is stored; dropping the last `Rc` to the
    /// socket removes it from the registry on the next tick.
    pub fn register(&self, id: SocketId, socket: &Rc<RefCell<dyn Pollable>>) {
        self.inner
            .borrow_mut()
            .sockets
            .insert(id, Rc::downgrade(socket));
    }

    /// Removes a socket from the registry. Returns true if it was present.
    pub fn deregister(&self, id: SocketId) -> bool {
        self.inner.borrow_mut().sockets.remove(&id).is_some()
    }

    pub fn contains(&self, id: SocketId) -> bool {
        self.inner.borrow().sockets.contains_key(&id)
    }

    /// Number of registered sockets whose owner is still alive.
    pub fn socket_count(&self) -> usize {
        self.inner
            .borrow()
            .sockets
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Runs one reactor tick bounded by `timeout_us` microseconds.
    ///
    /// Phases, each iterating the registry in id (insertion) order:
    /// 1. prune entries whose owner dropped, then `pre_poll` on the rest;
    /// 2. one `select` over the descriptors of all connected sockets;
    /// 3. `ready` exactly once for each socket whose descriptor is ready;
    /// 4. `post_poll` on every socket.
    ///
    /// Sockets registered during a tick join the next tick. A failed
    /// readiness wait is logged and the tick proceeds to post-poll. Must
    /// not be re-entered from a socket callback.
    pub fn poll(&self, timeout_us: i64) {
        let snapshot: Vec<(SocketId, Rc<RefCell<dyn Pollable>>)> = {
            let mut registry = self.inner.borrow_mut();
            registry
                .sockets
                .retain(|_, weak| weak.strong_count() > 0);
            registry
                .sockets
                .iter()
                .filter_map(|(id, weak)| weak.upgrade().map(|rc| (*id, rc)))
                .collect()
        };

        for (id, socket) in &snapshot {
            if self.contains(*id) {
                socket.borrow_mut().pre_poll();
            }
        }

        let mut readers: Vec<(SocketId, RawFd, Rc<RefCell<dyn Pollable>>)> = Vec::new();
        for (id, socket) in &snapshot {
            if !self.contains(*id) {
                continue;
            }
            if let Some(fd) = socket.borrow().raw_fd() {
                readers.push((*id, fd, socket.clone()));
            }
        }

        if readers.is_empty() {
            // Nothing to wait on; still honor the timeout so driver loops
            // don't spin hot.
            if timeout_us > 0 {
                std::thread::sleep(Duration::from_micros(timeout_us as u64));
            }
        } else {
            let fds: Vec<RawFd> = readers.iter().map(|(_, fd, _)| *fd).collect();
            match sys::select(&fds, timeout_us) {
                Ok(ready) => {
                    for (id, fd, socket) in &readers {
                        if ready.contains(*fd) && self.contains(*id) {
                            socket.borrow_mut().ready();
                        }
                    }
                }
                Err(err) => log::warn!("readiness wait failed: {}", err),
            }
        }

        for (id, socket) in &snapshot {
            if self.contains(*id) {
                socket.borrow_mut().post_poll();
            }
        }
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}
