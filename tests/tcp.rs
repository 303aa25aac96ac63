//! End-to-end loopback exchanges between a `TcpServer` and a `TcpClient`
//! driven through a single reactor.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use wireloop::{ChildSocket, Connectable, Reactor, TcpClient, TcpServer};

fn tick(reactor: &Reactor, times: usize) {
    for _ in 0..times {
        reactor.poll(10_000);
    }
}

struct Loopback {
    reactor: Reactor,
    server: Rc<RefCell<TcpServer>>,
    client: Rc<RefCell<TcpClient>>,
    child: Rc<RefCell<Option<Rc<RefCell<ChildSocket>>>>>,
}

/// Brings up a listening server on an ephemeral port, connects a client to
/// it and polls until the child socket has been accepted.
fn loopback() -> Loopback {
    let _ = env_logger::builder().is_test(true).try_init();
    let reactor = Reactor::new();
    let server = TcpServer::new(&reactor, "127.0.0.1", 0);
    server
        .borrow_mut()
        .connect()
        .unwrap_or_else(|error| panic!("listen failed: {error}"));
    let port = server.borrow().local_port().unwrap();

    let child = Rc::new(RefCell::new(None));
    {
        let child = child.clone();
        server.borrow_mut().on_accepted(move |_, accepted| {
            *child.borrow_mut() = Some(accepted.clone());
        });
    }

    let client = TcpClient::new(&reactor, "127.0.0.1", port);
    client
        .borrow_mut()
        .connect()
        .unwrap_or_else(|error| panic!("connect failed: {error}"));

    tick(&reactor, 5);
    assert!(child.borrow().is_some(), "no connection accepted");

    Loopback {
        reactor,
        server,
        client,
        child,
    }
}

#[test]
fn lines_arrive_in_order() {
    let net = loopback();
    let lines = Rc::new(RefCell::new(Vec::new()));
    {
        let lines = lines.clone();
        let child = net.child.borrow();
        child.as_ref().unwrap().borrow_mut().on_read(move |_, data| {
            lines.borrow_mut().push(String::from_utf8_lossy(data).into_owned());
        });
    }

    net.client.borrow_mut().write_line("alpha");
    net.client.borrow_mut().write_line("beta");
    net.client.borrow_mut().write_line("gamma");
    tick(&net.reactor, 5);

    assert_eq!(*lines.borrow(), vec!["alpha", "beta", "gamma"]);
}

#[test]
fn child_can_reply_from_its_read_listener() {
    let net = loopback();
    {
        let child = net.child.borrow();
        child.as_ref().unwrap().borrow_mut().on_read(|socket, data| {
            let mut reply = b"echo ".to_vec();
            reply.extend_from_slice(data);
            socket.write_line(reply);
        });
    }

    let replies = Rc::new(RefCell::new(Vec::new()));
    {
        let replies = replies.clone();
        net.client.borrow_mut().on_read(move |_, data| {
            replies.borrow_mut().push(String::from_utf8_lossy(data).into_owned());
        });
    }

    net.client.borrow_mut().write_line("ping");
    tick(&net.reactor, 5);

    assert_eq!(*replies.borrow(), vec!["echo ping"]);
}

#[test]
fn disconnected_child_is_collected_by_parent() {
    let net = loopback();
    assert_eq!(net.server.borrow().children().len(), 1);

    net.client.borrow_mut().disconnect();
    tick(&net.reactor, 5);

    assert_eq!(net.server.borrow().children().len(), 0);
}

#[test]
fn throttled_lines_trickle_out_over_ticks() {
    let net = loopback();
    let lines = Rc::new(RefCell::new(Vec::new()));
    {
        let lines = lines.clone();
        let child = net.child.borrow();
        child.as_ref().unwrap().borrow_mut().on_read(move |_, data| {
            lines.borrow_mut().push(data.len());
        });
    }

    // 100 bytes per second with a two second peak allows roughly 200 bytes
    // on the first flush after a quiet period.
    net.client.borrow_mut().enable_write_throttling(100, 2.0);
    let payload = vec![b'x'; 89];
    for _ in 0..3 {
        net.client.borrow_mut().write_line(&payload);
    }
    tick(&net.reactor, 5);
    assert_eq!(*lines.borrow(), vec![89, 89]);

    // The third line needs the quota to refill.
    std::thread::sleep(Duration::from_millis(1100));
    tick(&net.reactor, 5);
    assert_eq!(*lines.borrow(), vec![89, 89, 89]);
}

#[test]
fn peer_close_flushes_the_partial_line() {
    let net = loopback();
    let lines = Rc::new(RefCell::new(Vec::new()));
    let gone = Rc::new(RefCell::new(false));
    {
        let lines = lines.clone();
        let gone = gone.clone();
        let child = net.child.borrow();
        let mut child = child.as_ref().unwrap().borrow_mut();
        child.on_read(move |_, data| {
            lines.borrow_mut().push(String::from_utf8_lossy(data).into_owned());
        });
        child.on_disconnected(move |_| *gone.borrow_mut() = true);
    }

    net.client.borrow_mut().write(b"no newline here").unwrap();
    net.client.borrow_mut().disconnect();
    tick(&net.reactor, 5);

    assert_eq!(*lines.borrow(), vec!["no newline here"]);
    assert!(*gone.borrow());
}
