//! # Stream Decoder
//!
//! Raw serial bytes in, one [`DecodedBatch`] per read out.

use tracing::warn;

use super::assembler::LineAssembler;
use super::parser::{ParseOutcome, RecordParser};
use super::record::TelemetryRecord;

/// Records and rejects decoded from one serial read, in arrival order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedBatch {
    pub records: Vec<TelemetryRecord>,
    pub header_errors: u64,
    pub framing_errors: u64,
}

impl DecodedBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.header_errors == 0 && self.framing_errors == 0
    }
}

/// Line assembler and record parser chained together
#[derive(Debug)]
pub struct StreamDecoder {
    assembler: LineAssembler,
    parser: RecordParser,
}

impl StreamDecoder {
    pub fn new(parser: RecordParser, max_line_length: Option<usize>) -> Self {
        Self {
            assembler: LineAssembler::new(max_line_length),
            parser,
        }
    }

    /// Decode one chunk of serial bytes
    ///
    /// Non-record lines are skipped silently. Broken headers and overlong
    /// lines are logged and counted; neither stops the lines after them.
    pub fn decode(&mut self, bytes: &[u8]) -> DecodedBatch {
        let mut batch = DecodedBatch::default();

        for line in self.assembler.feed(bytes) {
            let line = match line {
                Ok(line) => line,
                Err(_) => {
                    batch.framing_errors += 1;
                    continue;
                }
            };

            match self.parser.parse(&line) {
                Ok(ParseOutcome::Record(record)) => batch.records.push(record),
                Ok(ParseOutcome::Skip) => {}
                Err(err) => {
                    warn!("Skipping line {:?}: {}", line, err);
                    batch.header_errors += 1;
                }
            }
        }

        batch
    }
}
