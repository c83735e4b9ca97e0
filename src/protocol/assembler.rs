//! # Line Assembler
//!
//! Turns arbitrarily chunked serial reads into complete, trimmed text lines.
//!
//! Bytes outside the ASCII range are dropped on the way in. A trailing partial
//! line is held until its newline arrives, so the emitted lines never depend
//! on where the transport happened to split the stream.

use bytes::BytesMut;
use tracing::warn;

use crate::error::FramingError;

/// Initial capacity of the pending buffer
const INITIAL_CAPACITY: usize = 256;

/// Newline-delimited framer over raw serial bytes
#[derive(Debug)]
pub struct LineAssembler {
    /// Text after the last newline seen so far
    pending: BytesMut,
    /// Length cap for a single line, `None` for unbounded
    max_line_length: Option<usize>,
    /// Set after an overflow until the offending line's newline arrives
    discarding: bool,
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new(None)
    }
}

impl LineAssembler {
    /// Create an assembler, optionally capping the length of a single line
    ///
    /// A line longer than the cap is reported once as
    /// [`FramingError::Overflow`] and discarded up to its newline.
    pub fn new(max_line_length: Option<usize>) -> Self {
        Self {
            pending: BytesMut::with_capacity(INITIAL_CAPACITY),
            max_line_length,
            discarding: false,
        }
    }

    /// Feed one chunk of raw bytes
    ///
    /// # Returns
    ///
    /// Every line completed by this chunk, in arrival order, plus a framing
    /// error in place of any line that blew past the length cap.
    ///
    /// # Examples
    ///
    /// ```
    /// use serial_telemetry::protocol::assembler::LineAssembler;
    ///
    /// let mut assembler = LineAssembler::default();
    /// assert!(assembler.feed(b"SW:0").is_empty());
    ///
    /// let lines = assembler.feed(b"1|A0:5;0.02V\r\nSW:");
    /// assert_eq!(lines, vec![Ok("SW:01|A0:5;0.02V".to_string())]);
    /// assert_eq!(assembler.pending(), b"SW:");
    /// ```
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<String, FramingError>> {
        let mut lines = Vec::new();

        for segment in bytes.split_inclusive(|&b| b == b'\n') {
            let (body, complete) = match segment.split_last() {
                Some((&b'\n', body)) => (body, true),
                _ => (segment, false),
            };

            if let Some(err) = self.append(body) {
                lines.push(Err(err));
            }

            if complete {
                if let Some(line) = self.finish_line() {
                    lines.push(Ok(line));
                }
            }
        }

        lines
    }

    /// Bytes received after the last newline
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    fn append(&mut self, body: &[u8]) -> Option<FramingError> {
        if self.discarding {
            return None;
        }

        self.pending.extend(body.iter().copied().filter(u8::is_ascii));

        let limit = self.max_line_length?;
        if self.pending.len() <= limit {
            return None;
        }

        warn!(
            "Discarding partial line: {} bytes without a newline (limit {})",
            self.pending.len(),
            limit
        );
        self.pending.clear();
        self.discarding = true;
        Some(FramingError::Overflow { limit })
    }

    fn finish_line(&mut self) -> Option<String> {
        if self.discarding {
            self.discarding = false;
            self.pending.clear();
            return None;
        }

        let line = self.pending.split();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &[u8] =
        b"boot ok\r\nSW:01|A0:512;2.50V\n\nSW:10|MODE:AVG|A1:3;0.01V\r\n  SW:11  \npartial";

    fn collect_lines(out: Vec<Result<String, FramingError>>) -> Vec<String> {
        out.into_iter().map(|line| line.unwrap()).collect()
    }

    #[test]
    fn test_no_newline_yields_nothing() {
        let mut assembler = LineAssembler::default();
        assert!(assembler.feed(b"SW:01|A0:1").is_empty());
        assert_eq!(assembler.pending(), b"SW:01|A0:1");
    }

    #[test]
    fn test_lines_are_trimmed_and_tail_is_kept() {
        let mut assembler = LineAssembler::default();
        let lines = collect_lines(assembler.feed(STREAM));

        assert_eq!(
            lines,
            vec![
                "boot ok",
                "SW:01|A0:512;2.50V",
                "",
                "SW:10|MODE:AVG|A1:3;0.01V",
                "SW:11",
            ]
        );
        assert_eq!(assembler.pending(), b"partial");
    }

    #[test]
    fn test_chunk_boundary_invariance() {
        let mut whole = LineAssembler::default();
        let expected = collect_lines(whole.feed(STREAM));

        // Two-way split at every boundary
        for split in 0..=STREAM.len() {
            let mut assembler = LineAssembler::default();
            let mut lines = collect_lines(assembler.feed(&STREAM[..split]));
            lines.extend(collect_lines(assembler.feed(&STREAM[split..])));
            assert_eq!(lines, expected, "split at {}", split);
            assert_eq!(assembler.pending(), whole.pending());
        }

        // One byte at a time
        let mut assembler = LineAssembler::default();
        let mut lines = Vec::new();
        for byte in STREAM {
            lines.extend(collect_lines(assembler.feed(std::slice::from_ref(byte))));
        }
        assert_eq!(lines, expected);
    }

    #[test]
    fn test_non_ascii_bytes_are_dropped() {
        let mut assembler = LineAssembler::default();
        let lines = collect_lines(assembler.feed(b"SW:\xff01|A0:1;\xc3\xa90.5V\n"));
        assert_eq!(lines, vec!["SW:01|A0:1;0.5V"]);
    }

    #[test]
    fn test_empty_feed_is_noop() {
        let mut assembler = LineAssembler::default();
        assert!(assembler.feed(b"").is_empty());
        assert!(assembler.pending().is_empty());
    }

    #[test]
    fn test_overflow_reports_once_and_resyncs() {
        let mut assembler = LineAssembler::new(Some(8));

        let out = assembler.feed(b"0123456789");
        assert_eq!(out, vec![Err(FramingError::Overflow { limit: 8 })]);
        assert!(assembler.pending().is_empty());

        // The rest of the runaway line is swallowed, no second error
        assert!(assembler.feed(b"abcdef").is_empty());

        let out = assembler.feed(b"xyz\nSW:01\n");
        assert_eq!(out, vec![Ok("SW:01".to_string())]);
    }

    #[test]
    fn test_overflow_is_chunk_invariant() {
        let stream = b"SW:01\nAAAAAAAAAAAAAAAAAAAA\nSW:10\n";

        let mut whole = LineAssembler::new(Some(10));
        let expected = whole.feed(stream);
        assert_eq!(
            expected,
            vec![
                Ok("SW:01".to_string()),
                Err(FramingError::Overflow { limit: 10 }),
                Ok("SW:10".to_string()),
            ]
        );

        for split in 0..=stream.len() {
            let mut assembler = LineAssembler::new(Some(10));
            let mut out = assembler.feed(&stream[..split]);
            out.extend(assembler.feed(&stream[split..]));
            assert_eq!(out, expected, "split at {}", split);
        }
    }

    #[test]
    fn test_line_at_limit_is_accepted() {
        let mut assembler = LineAssembler::new(Some(5));
        assert_eq!(assembler.feed(b"SW:01\n"), vec![Ok("SW:01".to_string())]);
    }
}
