// ABOUTME: Decodes line-framed "data: <json>" streams into JSON records
// ABOUTME: Buffers bytes across chunks so split lines and split UTF-8 sequences decode intact

use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

pub const FRAME_PREFIX: &str = "data:";

/// Incremental decoder. Feed chunks with [`push`](Self::push) and call
/// [`finish`](Self::finish) once the stream ends.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every record completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(chunk);

        let mut records = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            if let Some(record) = parse_line(&self.buffer[start..end]) {
                records.push(record);
            }
            start = end + 1;
        }
        self.buffer.drain(..start);
        records
    }

    /// Give a trailing unterminated line one last parse attempt.
    pub fn finish(&mut self) -> Option<Value> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest)
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

fn parse_line(raw: &[u8]) -> Option<Value> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line.trim_end_matches('\r'),
        Err(e) => {
            warn!("Skipping frame with invalid UTF-8: {}", e);
            return None;
        }
    };
    if line.trim().is_empty() {
        return None;
    }

    let Some(payload) = line.strip_prefix(FRAME_PREFIX) else {
        debug!("Ignoring non-data line: {}", line);
        return None;
    };

    match serde_json::from_str(payload.trim()) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!("Skipping malformed frame '{}': {}", payload.trim(), e);
            None
        }
    }
}

/// Turn a byte stream into a stream of decoded records. A transport error is
/// yielded once and ends the stream.
pub fn decode_stream<S, B, E>(mut chunks: S) -> impl Stream<Item = Result<Value, E>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    async_stream::stream! {
        let mut decoder = FrameDecoder::new();
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    for record in decoder.push(bytes.as_ref()) {
                        yield Ok(record);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        if let Some(record) = decoder.finish() {
            yield Ok(record);
        }
    }
}
