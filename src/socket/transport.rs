//! Bidirectional data transport shared by all stream sockets.
//!
//! `Transport` is the engine embedded in `TcpClient`, `UnixClient` and
//! `ChildSocket`: it owns the descriptor, the inbound line assembly, the
//! outbound write throttle and the per-socket listener registries. The
//! concrete types add only their connect glue and deref to it.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::time::Instant;

use crate::buffer::LineBuffer;
use crate::error::SocketError;
use crate::event::{ListenerId, Listeners};
use crate::reactor::{Reactor, SocketId};
use crate::socket::ReadingMode;
use crate::socket::sys;

/// Bytes read from the descriptor per readiness dispatch.
pub(crate) const READ_CHUNK: usize = 4096;

/// Listener for data read from the socket. In line mode the payload is one
/// line without its delimiter; in raw mode it is the raw chunk.
pub type ReadFn = Box<dyn FnMut(&mut Transport, &[u8])>;

/// Listener for completed sends; the payload is the number of bytes written.
pub type SentFn = Box<dyn FnMut(&mut Transport, usize)>;

/// Listener fired when the transport disconnects.
pub type DisconnectFn = Box<dyn FnMut(&mut Transport)>;

/// Outbound rate limiter state. Exists iff throttling is enabled.
struct Throttle {
    bps: u32,
    peak: f64,
    last_send: Option<Instant>,
    buffer: LineBuffer,
}

impl Throttle {
    /// Largest burst allowed in a single flush, in bytes.
    fn peak_budget(&self) -> f64 {
        self.bps as f64 * self.peak
    }

    /// Byte quota available right now: elapsed time since the last
    /// successful send times the rate, capped at the peak budget. Quota
    /// never accumulates beyond the cap, no matter how long the socket
    /// sat idle.
    fn quota(&self) -> f64 {
        match self.last_send {
            None => self.peak_budget(),
            Some(at) => (at.elapsed().as_secs_f64() * self.bps as f64).min(self.peak_budget()),
        }
    }
}

/// Stream socket endpoint with read-event delivery and throttled writes.
pub struct Transport {
    id: SocketId,
    reactor: Reactor,
    fd: Option<OwnedFd>,
    reading_mode: ReadingMode,
    reading_buffer: LineBuffer,
    writing_line_ending: Vec<u8>,
    throttle: Option<Throttle>,
    read_listeners: Listeners<ReadFn>,
    sent_listeners: Listeners<SentFn>,
    disconnected_listeners: Listeners<DisconnectFn>,
}

impl Transport {
    pub(crate) fn new(reactor: &Reactor) -> Self {
        let id = reactor.allocate_id();
        log::debug!("socket {} created", id);
        Self {
            id,
            reactor: reactor.clone(),
            fd: None,
            reading_mode: ReadingMode::Lines,
            reading_buffer: LineBuffer::new(),
            writing_line_ending: b"\n".to_vec(),
            throttle: None,
            read_listeners: Listeners::new(),
            sent_listeners: Listeners::new(),
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

    /// Writes data directly to the socket.
    ///
    /// Contract: only valid while write throttling is disabled; use
    /// `write_line` on throttled sockets. Transient write failures and
    /// writes to an unconnected socket are logged, not returned.
    pub fn write(&mut self, data: &[u8]) -> Result<(), SocketError> {
        if self.throttle.is_some() {
            return Err(SocketError::ThrottledWrite);
        }
        self.send_now(data);
        Ok(())
    }

    /// Writes one line (payload plus the writing line ending).
    pub fn write_line<L: AsRef<[u8]>>(&mut self, line: L) {
        self.write_line_opts(line.as_ref(), false, false);
    }

    /// Writes one line with queue placement control.
    ///
    /// With throttling enabled the framed line is queued (prepended when
    /// `high_priority`) and drained by the post-poll flush; lines longer
    /// than the peak burst budget are truncated to fit. `force_flush`
    /// bypasses the throttle and sends immediately.
    pub fn write_line_opts(&mut self, line: &[u8], high_priority: bool, force_flush: bool) {
        match self.throttle.as_mut() {
            Some(throttle) if !force_flush => {
                if self.fd.is_none() {
                    log::warn!("cannot write to unconnected socket {}", self.id);
                    return;
                }

                let ending = &self.writing_line_ending;
                let budget = throttle.peak_budget() as usize;
                let mut line = line;
                if line.len() + ending.len() > budget {
                    let keep = budget.saturating_sub(ending.len()).min(line.len());
                    line = &line[..keep];
                    log::warn!("trimmed overlong line for socket {}", self.id);
                }
                if line.iter().any(|b| ending.contains(b)) {
                    log::warn!("line written to socket {} contains line ending bytes", self.id);
                }

                let mut framed = line.to_vec();
                framed.extend_from_slice(ending);
                if high_priority {
                    throttle.buffer.prepend(&framed);
                } else {
                    throttle.buffer.append(&framed);
                }
            }
            _ => {
                let mut framed = line.to_vec();
                framed.extend_from_slice(&self.writing_line_ending);
                self.send_now(&framed);
            }
        }
    }

    fn send_now(&mut self, data: &[u8]) {
        let Some(fd) = self.raw_fd() else {
            log::warn!("cannot write to unconnected socket {}", self.id);
            return;
        };
        match sys::write(fd, data) {
            Ok(written) => self.emit_sent(written),
            Err(err) => log::warn!("failed to write to socket {}: {}", self.id, err),
        }
    }

    /// Switches writes to buffered, metered mode.
    ///
    /// `bps` is the sustained rate in bytes per second; `peak` caps the
    /// burst at `bps * peak` bytes per flush. Re-enabling resets the
    /// outbound buffer.
    pub fn enable_write_throttling(&mut self, bps: u32, peak: f64) {
        self.throttle = Some(Throttle {
            bps,
            peak,
            last_send: None,
            buffer: LineBuffer::with_ending(&self.writing_line_ending),
        });
    }

    /// Reverts to immediate writes. Buffered-but-unsent data is discarded.
    pub fn disable_write_throttling(&mut self) {
        self.throttle = None;
    }

    pub fn is_write_throttling_enabled(&self) -> bool {
        self.throttle.is_some()
    }

    pub fn set_reading_mode(&mut self, mode: ReadingMode) {
        self.reading_mode = mode;
    }

    pub fn reading_mode(&self) -> ReadingMode {
        self.reading_mode
    }

    /// Sets the line ending used to frame inbound reads.
    /// Clears the existing reading buffer.
    pub fn set_reading_line_ending<E: AsRef<[u8]>>(&mut self, line_ending: E) {
        self.reading_buffer = LineBuffer::with_ending(line_ending);
    }

    /// Sets the line ending appended by `write_line`.
    /// Resets the outbound buffer if write throttling is enabled.
    pub fn set_writing_line_ending<E: AsRef<[u8]>>(&mut self, line_ending: E) {
        self.writing_line_ending = line_ending.as_ref().to_vec();
        if let Some(throttle) = &mut self.throttle {
            throttle.buffer = LineBuffer::with_ending(&self.writing_line_ending);
        }
    }

    /// Sets the reading and writing line endings simultaneously.
    pub fn set_line_ending<E: AsRef<[u8]>>(&mut self, line_ending: E) {
        self.set_reading_line_ending(line_ending.as_ref());
        self.set_writing_line_ending(line_ending.as_ref());
    }

    /// This socket's peer, formatted as "ip:port" or a Unix path.
    pub fn peer_name(&self) -> Option<String> {
        let Some(fd) = self.raw_fd() else {
            log::warn!("trying to look up peer name of unconnected socket {}", self.id);
            return None;
        };
        match sys::peer_name(fd) {
            Ok(name) => Some(name),
            Err(err) => {
                log::warn!("peer lookup for socket {} failed: {}", self.id, err);
                None
            }
        }
    }

    pub fn on_read<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&mut Transport, &[u8]) + 'static,
    {
        self.read_listeners.add(Box::new(listener))
    }

    pub fn remove_read_listener(&mut self, id: ListenerId) -> bool {
        self.read_listeners.remove(id)
    }

    pub fn on_sent<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&mut Transport, usize) + 'static,
    {
        self.sent_listeners.add(Box::new(listener))
    }

    pub fn remove_sent_listener(&mut self, id: ListenerId) -> bool {
        self.sent_listeners.remove(id)
    }

    pub fn on_disconnected<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&mut Transport) + 'static,
    {
        self.disconnected_listeners.add(Box::new(listener))
    }

    pub fn remove_disconnected_listener(&mut self, id: ListenerId) -> bool {
        self.disconnected_listeners.remove(id)
    }

    /// Releases the descriptor, fires `disconnected` and clears the
    /// inbound buffer. No-op when already disconnected.
    pub fn disconnect(&mut self) {
        if let Some(fd) = self.fd.take() {
            drop(fd);
            self.emit_disconnected();
            self.reading_buffer.clear();
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

    /// Readiness dispatch: drains one chunk from the descriptor.
    ///
    /// Line mode fires one read event per complete line available this
    /// tick; raw mode fires exactly one event with the chunk. A zero-byte
    /// read means the peer closed: any trailing partial line is flushed as
    /// a final read event, then the socket is torn down.
    pub(crate) fn handle_ready(&mut self) {
        let Some(fd) = self.raw_fd() else {
            return;
        };

        let mut chunk = [0u8; READ_CHUNK];
        match sys::read(fd, &mut chunk) {
            Ok(0) => {
                if self.reading_mode == ReadingMode::Lines {
                    let remainder = self.reading_buffer.take_bytes();
                    if !remainder.is_empty() {
                        self.emit_read(&remainder);
                    }
                }
                log::info!("socket {} closed by peer", self.id);
                self.destroy();
            }
            Ok(count) => match self.reading_mode {
                ReadingMode::Lines => {
                    self.reading_buffer.append(&chunk[..count]);
                    while let Some(line) = self.reading_buffer.pop_line() {
                        self.emit_read(&line);
                    }
                }
                ReadingMode::Raw => {
                    let data = chunk[..count].to_vec();
                    self.emit_read(&data);
                }
            },
            Err(err) => log::warn!("read from socket {} failed: {}", self.id, err),
        }
    }

    /// Post-poll flush of the throttled outbound buffer.
    ///
    /// Sends whole framed lines while they fit within the current quota;
    /// stops at the first line that would exceed it. No partial-line
    /// sends. A failed send drops the line and continues.
    pub(crate) fn flush_throttled(&mut self) {
        let Some(fd) = self.raw_fd() else {
            return;
        };
        let Some(mut throttle) = self.throttle.take() else {
            return;
        };

        let mut quota = throttle.quota();
        let mut sends = Vec::new();
        while let Some(line_len) = throttle.buffer.has_line() {
            let framed_len = line_len + self.writing_line_ending.len();
            if (framed_len as f64) > quota {
                break;
            }
            let Some(mut line) = throttle.buffer.pop_line() else {
                break;
            };
            line.extend_from_slice(&self.writing_line_ending);
            match sys::write(fd, &line) {
                Ok(written) => {
                    throttle.last_send = Some(Instant::now());
                    quota -= framed_len as f64;
                    sends.push(written);
                }
                Err(err) => log::warn!("failed to write to socket {}: {}", self.id, err),
            }
        }

        self.throttle = Some(throttle);
        for written in sends {
            self.emit_sent(written);
        }
    }

    fn emit_read(&mut self, data: &[u8]) {
        let mut listeners = std::mem::take(&mut self.read_listeners);
        for listener in listeners.iter_mut() {
            listener(self, data);
        }
        self.read_listeners.restore(listeners);
    }

    fn emit_sent(&mut self, written: usize) {
        let mut listeners = std::mem::take(&mut self.sent_listeners);
        for listener in listeners.iter_mut() {
            listener(self, written);
        }
        self.sent_listeners.restore(listeners);
    }

    fn emit_disconnected(&mut self) {
        let mut listeners = std::mem::take(&mut self.disconnected_listeners);
        for listener in listeners.iter_mut() {
            listener(self);
        }
        self.disconnected_listeners.restore(listeners);
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if self.is_connected() {
            self.disconnect();
        }
    }
}
