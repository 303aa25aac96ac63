//! Byte buffer that can be popped linewise.
//!
//! Used on the inbound side to assemble newline-delimited records out of
//! arbitrary read chunks, and on the outbound side as the queue that the
//! write throttle drains from.

/// Append-only byte buffer with line extraction.
///
/// The line ending is treated as a *set* of delimiter bytes: a line is the
/// longest prefix containing none of them, and it only counts as a line if
/// a delimiter byte actually follows it. Popping a line absorbs the run of
/// delimiter bytes after it, capped at the ending's length, so a `"\r\n"`
/// ending swallows both bytes while repeated bare `"\n"`s surface as empty
/// lines on subsequent pops.
#[derive(Debug, Clone)]
pub struct LineBuffer {
    buffer: Vec<u8>,
    line_ending: Vec<u8>,
}

impl LineBuffer {
    /// Creates a buffer using `"\n"` as the line ending.
    pub fn new() -> Self {
        Self::with_ending("\n")
    }

    /// Creates a buffer with an explicit line ending.
    pub fn with_ending<E: AsRef<[u8]>>(line_ending: E) -> Self {
        Self {
            buffer: Vec::new(),
            line_ending: line_ending.as_ref().to_vec(),
        }
    }

    /// Appends bytes to the tail of the buffer.
    pub fn append(&mut self, tail: &[u8]) {
        self.buffer.extend_from_slice(tail);
    }

    /// Prepends bytes to the head of the buffer (priority writes).
    pub fn prepend(&mut self, head: &[u8]) {
        self.buffer.splice(0..0, head.iter().copied());
    }

    /// Checks whether there is a full line to read from the buffer.
    ///
    /// Returns the byte length of the line (without its delimiter), or
    /// `None` if the buffer is empty or holds only a partial line.
    pub fn has_line(&self) -> Option<usize> {
        self.buffer
            .iter()
            .position(|b| self.line_ending.contains(b))
    }

    /// Extracts one line from the buffer, without its delimiter.
    pub fn pop_line(&mut self) -> Option<Vec<u8>> {
        let line_len = self.has_line()?;
        let line = self.buffer[..line_len].to_vec();

        let run = self.buffer[line_len..]
            .iter()
            .take_while(|b| self.line_ending.contains(b))
            .count();
        let skip = run.min(self.line_ending.len());
        self.buffer.drain(..line_len + skip);

        Some(line)
    }

    /// Returns the current buffer contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Drains and returns everything left in the buffer.
    pub fn take_bytes(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Clears the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns the configured line ending.
    pub fn line_ending(&self) -> &[u8] {
        &self.line_ending
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pops_lines_in_order() {
        let mut buf = LineBuffer::new();
        buf.append(b"a\nb\n");
        assert_eq!(buf.pop_line().as_deref(), Some(&b"a"[..]));
        assert_eq!(buf.pop_line().as_deref(), Some(&b"b"[..]));
        assert_eq!(buf.pop_line(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_line_is_not_a_line() {
        let mut buf = LineBuffer::new();
        buf.append(b"partial");
        assert_eq!(buf.has_line(), None);
        assert_eq!(buf.pop_line(), None);
        assert_eq!(buf.as_bytes(), b"partial");

        // A later delimiter completes it.
        buf.append(b" done\n");
        assert_eq!(buf.has_line(), Some(12));
        assert_eq!(buf.pop_line().as_deref(), Some(&b"partial done"[..]));
    }

    #[test]
    fn crlf_ending_is_absorbed_whole() {
        let mut buf = LineBuffer::with_ending("\r\n");
        buf.append(b"a\r\nb\r\n");
        assert_eq!(buf.pop_line().as_deref(), Some(&b"a"[..]));
        assert_eq!(buf.pop_line().as_deref(), Some(&b"b"[..]));
        assert_eq!(buf.pop_line(), None);
    }

    #[test]
    fn repeated_bare_delimiters_become_empty_lines() {
        let mut buf = LineBuffer::new();
        buf.append(b"a\n\nb\n");
        assert_eq!(buf.pop_line().as_deref(), Some(&b"a"[..]));
        assert_eq!(buf.pop_line().as_deref(), Some(&b""[..]));
        assert_eq!(buf.pop_line().as_deref(), Some(&b"b"[..]));
    }

    #[test]
    fn prepend_takes_priority() {
        let mut buf = LineBuffer::new();
        buf.append(b"second\n");
        buf.prepend(b"first\n");
        assert_eq!(buf.pop_line().as_deref(), Some(&b"first"[..]));
        assert_eq!(buf.pop_line().as_deref(), Some(&b"second"[..]));
    }

    #[test]
    fn round_trips_many_lines() {
        let mut buf = LineBuffer::new();
        let lines: Vec<String> = (0..50).map(|i| format!("line {}", i)).collect();
        for line in &lines {
            buf.append(line.as_bytes());
            buf.append(b"\n");
        }
        for line in &lines {
            assert_eq!(buf.pop_line().as_deref(), Some(line.as_bytes()));
        }
        assert_eq!(buf.pop_line(), None);
    }

    #[test]
    fn take_bytes_drains_remainder() {
        let mut buf = LineBuffer::new();
        buf.append(b"done\ntail");
        buf.pop_line();
        assert_eq!(buf.take_bytes(), b"tail");
        assert!(buf.is_empty());
    }
}
