//! Phase-ordering guarantees of the poll loop, checked with pipe-backed
//! pollables so readiness is fully deterministic.

use std::cell::RefCell;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::rc::Rc;

use wireloop::{Pollable, Reactor, SocketId};

struct PipeProbe {
    id: SocketId,
    name: &'static str,
    read_end: OwnedFd,
    log: Rc<RefCell<Vec<String>>>,
}

impl Pollable for PipeProbe {
    fn socket_id(&self) -> SocketId {
        self.id
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.read_end.as_raw_fd())
    }

    fn pre_poll(&mut self) {
        self.log.borrow_mut().push(format!("pre {}", self.name));
    }

    fn ready(&mut self) {
        let mut buf = [0u8; 64];
        let n = unsafe {
            libc::read(
                self.read_end.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        assert!(n > 0);
        self.log.borrow_mut().push(format!("ready {}", self.name));
    }

    fn post_poll(&mut self) {
        self.log.borrow_mut().push(format!("post {}", self.name));
    }
}

fn pipe() -> (OwnedFd, OwnedFd) {
    let mut fds = [0; 2];
    let result = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(result, 0);
    unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
}

/// Registers a probe and returns it with the write end of its pipe.
fn probe(
    reactor: &Reactor,
    name: &'static str,
    log: &Rc<RefCell<Vec<String>>>,
) -> (Rc<RefCell<PipeProbe>>, OwnedFd) {
    let (read_end, write_end) = pipe();
    let id = reactor.allocate_id();
    let probe = Rc::new(RefCell::new(PipeProbe {
        id,
        name,
        read_end,
        log: log.clone(),
    }));
    let as_dyn: Rc<RefCell<dyn Pollable>> = probe.clone();
    reactor.register(id, &as_dyn);
    (probe, write_end)
}

fn wake(write_end: &OwnedFd) {
    let n = unsafe {
        libc::write(
            write_end.as_raw_fd(),
            b"x".as_ptr() as *const libc::c_void,
            1,
        )
    };
    assert_eq!(n, 1);
}

#[test]
fn phases_run_in_registration_order() {
    let reactor = Reactor::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let (_a, wake_a) = probe(&reactor, "a", &log);
    let (_b, wake_b) = probe(&reactor, "b", &log);
    let (_c, wake_c) = probe(&reactor, "c", &log);

    wake(&wake_a);
    wake(&wake_b);
    wake(&wake_c);
    reactor.poll(10_000);

    assert_eq!(
        *log.borrow(),
        vec![
            "pre a", "pre b", "pre c", "ready a", "ready b", "ready c", "post a", "post b",
            "post c",
        ]
    );
}

#[test]
fn only_ready_sockets_are_dispatched() {
    let reactor = Reactor::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let (_a, _wake_a) = probe(&reactor, "a", &log);
    let (_b, wake_b) = probe(&reactor, "b", &log);
    let (_c, _wake_c) = probe(&reactor, "c", &log);

    wake(&wake_b);
    reactor.poll(10_000);

    assert_eq!(
        *log.borrow(),
        vec!["pre a", "pre b", "pre c", "ready b", "post a", "post b", "post c"]
    );
}

#[test]
fn one_dispatch_per_tick_even_with_more_data_pending() {
    let reactor = Reactor::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let (_a, wake_a) = probe(&reactor, "a", &log);

    // Multiple wakeups still coalesce into one dispatch this tick.
    wake(&wake_a);
    wake(&wake_a);
    wake(&wake_a);
    reactor.poll(10_000);

    let ready_count = log
        .borrow()
        .iter()
        .filter(|entry| entry.starts_with("ready"))
        .count();
    assert_eq!(ready_count, 1);
}

#[test]
fn deregistered_sockets_are_skipped() {
    let reactor = Reactor::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let (a, wake_a) = probe(&reactor, "a", &log);

    wake(&wake_a);
    reactor.deregister(a.borrow().socket_id());
    reactor.poll(10_000);

    assert!(log.borrow().is_empty());
}
