//! Incremental decoders for the two streaming framings providers use:
//! server-sent events and newline-delimited JSON.

use crate::error::{LlmError, Result};
use bytes::Bytes;
use futures_util::Stream;
use futures_util::StreamExt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field, "message" when absent.
    pub event: String,
    /// `data:` lines joined with "\n".
    pub data: String,
}

pub fn decode_sse<S, E>(bytes_stream: S) -> impl Stream<Item = Result<SseEvent>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send,
{
    futures_util::stream::unfold(
        (bytes_stream, Vec::<u8>::new(), false),
        |(mut stream, mut buffer, mut eof)| async move {
            loop {
                if let Some((end, delim)) = find_blank_line(&buffer) {
                    let raw: Vec<u8> = buffer.drain(..end + delim).collect();
                    match parse_sse_block(&raw[..end]) {
                        Some(event) => return Some((Ok(event), (stream, buffer, eof))),
                        None => continue,
                    }
                }

                if eof {
                    if buffer.iter().all(|b| b.is_ascii_whitespace()) {
                        return None;
                    }
                    // Final block without a trailing blank line.
                    let raw = std::mem::take(&mut buffer);
                    match parse_sse_block(&raw) {
                        Some(event) => return Some((Ok(event), (stream, buffer, eof))),
                        None => return None,
                    }
                }

                match stream.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        eof = true;
                        buffer.clear();
                        return Some((
                            Err(LlmError::Transport(e.to_string())),
                            (stream, buffer, eof),
                        ));
                    }
                    None => eof = true,
                }
            }
        },
    )
}

/// Position of the first blank line (event terminator) and its length.
fn find_blank_line(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_sse_block(raw: &[u8]) -> Option<SseEvent> {
    let raw = String::from_utf8_lossy(raw);
    let mut event = String::new();
    let mut data_lines = Vec::new();

    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = rest.trim().to_string();
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
    }

    if event.is_empty() && data_lines.is_empty() {
        return None;
    }
    if event.is_empty() {
        event = "message".to_string();
    }
    Some(SseEvent {
        event,
        data: data_lines.join("\n"),
    })
}

/// Yields each non-empty line as one frame.
pub fn decode_ndjson<S, E>(bytes_stream: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send,
{
    futures_util::stream::unfold(
        (bytes_stream, Vec::<u8>::new(), false),
        |(mut stream, mut buffer, mut eof)| async move {
            loop {
                if let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&raw).trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    return Some((Ok(line), (stream, buffer, eof)));
                }

                if eof {
                    let rest = String::from_utf8_lossy(&std::mem::take(&mut buffer))
                        .trim()
                        .to_string();
                    if rest.is_empty() {
                        return None;
                    }
                    return Some((Ok(rest), (stream, buffer, eof)));
                }

                match stream.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        eof = true;
                        buffer.clear();
                        return Some((
                            Err(LlmError::Transport(e.to_string())),
                            (stream, buffer, eof),
                        ));
                    }
                    None => eof = true,
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&str]) -> impl Stream<Item = std::result::Result<Bytes, String>> + Unpin {
        let items: Vec<std::result::Result<Bytes, String>> = parts
            .iter()
            .map(|p| Ok(Bytes::from(p.to_string())))
            .collect();
        futures_util::stream::iter(items)
    }

    #[tokio::test]
    async fn sse_reassembles_events_split_across_chunks() {
        let stream = chunks(&[
            "event: content_block_delta\nda",
            "ta: {\"a\":1}\n\n: keep-alive\n\nevent: ping\r\ndata: {}\r\n\r\n",
            "data: tail-without-terminator",
        ]);
        let events: Vec<SseEvent> = decode_sse(stream)
            .map(|e| e.expect("event"))
            .collect()
            .await;

        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: "content_block_delta".to_string(),
                    data: "{\"a\":1}".to_string(),
                },
                SseEvent {
                    event: "ping".to_string(),
                    data: "{}".to_string(),
                },
                SseEvent {
                    event: "message".to_string(),
                    data: "tail-without-terminator".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn sse_joins_multiple_data_lines() {
        let stream = chunks(&["data: one\ndata: two\n\n"]);
        let events: Vec<SseEvent> = decode_sse(stream)
            .map(|e| e.expect("event"))
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "one\ntwo");
    }

    #[tokio::test]
    async fn ndjson_splits_lines_and_flushes_remainder() {
        let stream = chunks(&["{\"a\":", "1}\n\n{\"b\":2}\r\n", "{\"c\":3}"]);
        let lines: Vec<String> = decode_ndjson(stream)
            .map(|l| l.expect("line"))
            .collect()
            .await;
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}", "{\"c\":3}"]);
    }

    #[tokio::test]
    async fn transport_errors_end_the_stream() {
        let items: Vec<std::result::Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"{\"a\":1}\n{\"partial\"")),
            Err("connection reset".to_string()),
            Ok(Bytes::from_static(b"never read\n")),
        ];
        let out: Vec<Result<String>> = decode_ndjson(futures_util::stream::iter(items))
            .collect()
            .await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_deref().expect("first line"), "{\"a\":1}");
        assert_eq!(
            out[1].clone().expect_err("transport error"),
            LlmError::Transport("connection reset".to_string())
        );
    }

    #[tokio::test]
    async fn empty_body_yields_no_frames() {
        let events: Vec<Result<SseEvent>> = decode_sse(chunks(&[])).collect().await;
        assert!(events.is_empty());
        let lines: Vec<Result<String>> = decode_ndjson(chunks(&["\n\n"])).collect().await;
        assert!(lines.is_empty());
    }
}
