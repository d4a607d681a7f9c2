//! Reassembles newline-delimited messages from arbitrarily chunked reads.
//! Bytes after the last newline are retained for the next chunk.

#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every line completed by it. Trailing
    /// `\r` is stripped; blank lines and invalid UTF-8 are dropped.
    pub fn extend(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            match String::from_utf8(line) {
                Ok(text) if !text.trim().is_empty() => lines.push(text),
                _ => {}
            }
        }
        lines
    }

    /// The retained incomplete fragment, if any.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn single_complete_line() {
        let mut buf = LineBuffer::new();
        let lines = buf.extend(b"{\"type\":\"result\"}\n");
        assert_eq!(lines, vec!["{\"type\":\"result\"}".to_string()]);
        assert!(buf.pending().is_empty());
    }

    #[test]
    fn line_split_across_chunks() {
        let mut buf = LineBuffer::new();
        assert!(buf.extend(b"{\"type\":").is_empty());
        assert_eq!(buf.pending(), b"{\"type\":");
        let lines = buf.extend(b"\"result\"}\n{\"type\":");
        assert_eq!(lines, vec!["{\"type\":\"result\"}".to_string()]);
        assert_eq!(buf.pending(), b"{\"type\":");
    }

    #[test]
    fn multiple_lines_in_one_chunk() {
        let mut buf = LineBuffer::new();
        let lines = buf.extend(b"one\ntwo\nthree");
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(buf.pending(), b"three");
        let lines = buf.extend(b"\n");
        assert_eq!(lines, vec!["three".to_string()]);
    }

    #[test]
    fn crlf_and_blank_lines() {
        let mut buf = LineBuffer::new();
        let lines = buf.extend(b"one\r\n\r\n  \ntwo\n");
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
    }
}
