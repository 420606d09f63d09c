//! Shared server-sent-events line framing for the streaming chat clients.
//! Each provider's byte stream gets buffered and split on `\n`; blank lines
//! (the SSE event separator) are dropped since every provider here emits one
//! JSON payload per `data:` line.

use futures::stream::{self, BoxStream, StreamExt};

use crate::error::MimirError;

pub fn sse_lines(
    byte_stream: impl futures::Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
) -> BoxStream<'static, std::result::Result<String, MimirError>> {
    let line_stream = byte_stream
        .map(|chunk| chunk.map_err(|e| MimirError::Transport(e.to_string())))
        .scan(Vec::<u8>::new(), |buf, chunk| {
            let lines = match chunk {
                Ok(bytes) => {
                    buf.extend_from_slice(&bytes);
                    let mut lines = Vec::new();
                    while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buf.drain(..=pos).collect();
                        let text = String::from_utf8_lossy(&line).trim().to_string();
                        if !text.is_empty() {
                            lines.push(Ok(text));
                        }
                    }
                    lines
                }
                Err(e) => vec![Err(e)],
            };
            futures::future::ready(Some(stream::iter(lines)))
        })
        .flatten();

    Box::pin(line_stream)
}
