//! Frame Decoder
//!
//! Server-sent-event style framing:
//!
//! ```text
//! data: {"status":"chunk","response":"Hel"}
//! data: {"status":"chunk","response":"lo"}
//! data: [DONE]
//! ```
//!
//! Input arrives as arbitrary byte chunks. Partial lines (and partial UTF-8
//! sequences) are buffered until the next chunk completes them.

use std::collections::VecDeque;

use futures_util::stream::{self, Stream, StreamExt};
use tracing::debug;

/// Prefix of payload-carrying lines. One space after it is optional.
pub const DATA_PREFIX: &str = "data:";

/// Payload value that terminates the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded unit of the event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Raw payload text (normally JSON)
    Data(String),
    /// Terminator received
    Done,
}

/// Incremental line-oriented decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the terminator was seen or `finish` was called.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one byte chunk, returning every frame it completes.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        if self.finished {
            return Vec::new();
        }
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let line = decode_line(&self.buffer[start..end]);
            start = end + 1;

            match parse_line(&line) {
                Some(Frame::Done) => {
                    debug!("stream terminator received");
                    frames.push(Frame::Done);
                    self.finished = true;
                    self.buffer.clear();
                    return frames;
                }
                Some(frame) => frames.push(frame),
                None => {}
            }
        }

        self.buffer.drain(..start);
        frames
    }

    /// Transport closed: flush a trailing line that never got its newline.
    pub fn finish(&mut self) -> Option<Frame> {
        if self.finished {
            return None;
        }
        self.finished = true;
        let rest = std::mem::take(&mut self.buffer);
        if rest.is_empty() {
            return None;
        }
        parse_line(&decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

fn parse_line(line: &str) -> Option<Frame> {
    let payload = line.strip_prefix(DATA_PREFIX)?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    if payload.trim().is_empty() {
        return None;
    }
    if payload.trim() == DONE_SENTINEL {
        return Some(Frame::Done);
    }
    Some(Frame::Data(payload.to_string()))
}

struct DecodeState<S> {
    inner: S,
    decoder: FrameDecoder,
    pending: VecDeque<Frame>,
    exhausted: bool,
}

/// Lazily decode a byte stream into frames.
///
/// Ends after `Frame::Done`, at the end of the input, or right after the
/// first transport error (which is yielded).
pub fn decode_frames<S, B, E>(inner: S) -> impl Stream<Item = Result<Frame, E>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    let state = DecodeState {
        inner,
        decoder: FrameDecoder::new(),
        pending: VecDeque::new(),
        exhausted: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                return Some((Ok(frame), state));
            }
            if state.exhausted || state.decoder.is_finished() {
                return None;
            }
            match state.inner.next().await {
                Some(Ok(bytes)) => {
                    let frames = state.decoder.push(bytes.as_ref());
                    state.pending.extend(frames);
                }
                Some(Err(err)) => {
                    state.exhausted = true;
                    return Some((Err(err), state));
                }
                None => {
                    state.exhausted = true;
                    if let Some(frame) = state.decoder.finish() {
                        state.pending.push_back(frame);
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK_LINE: &str = "data: {\"status\":\"chunk\",\"response\":\"hi\"}\n";

    #[test]
    fn test_single_frame() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(CHUNK_LINE.as_bytes());
        assert_eq!(
            frames,
            vec![Frame::Data("{\"status\":\"chunk\",\"response\":\"hi\"}".to_string())]
        );
    }

    #[test]
    fn test_split_at_every_byte_boundary() {
        let bytes = CHUNK_LINE.as_bytes();
        let mut whole = FrameDecoder::new();
        let expected = whole.push(bytes);

        for split in 0..=bytes.len() {
            let mut decoder = FrameDecoder::new();
            let mut frames = decoder.push(&bytes[..split]);
            frames.extend(decoder.push(&bytes[split..]));
            assert_eq!(frames, expected, "split at {}", split);
        }
    }

    #[test]
    fn test_utf8_sequence_split_across_chunks() {
        let line = "data: {\"status\":\"chunk\",\"response\":\"你好\"}\n";
        let bytes = line.as_bytes();
        let split = line.find('你').unwrap() + 1;

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&bytes[..split]).is_empty());
        let frames = decoder.push(&bytes[split..]);
        assert_eq!(
            frames,
            vec![Frame::Data("{\"status\":\"chunk\",\"response\":\"你好\"}".to_string())]
        );
    }

    #[test]
    fn test_non_data_lines_ignored() {
        let mut decoder = FrameDecoder::new();
        let input = "event: message\n: keep-alive\nid: 7\n\ndata:{\"status\":\"thinking\"}\r\n";
        let frames = decoder.push(input.as_bytes());
        assert_eq!(frames, vec![Frame::Data("{\"status\":\"thinking\"}".to_string())]);
    }

    #[test]
    fn test_done_stops_decoding() {
        let mut decoder = FrameDecoder::new();
        let input = format!("{}data: [DONE]\n{}", CHUNK_LINE, CHUNK_LINE);
        let frames = decoder.push(input.as_bytes());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], Frame::Done);
        assert!(decoder.is_finished());
        assert!(decoder.push(CHUNK_LINE.as_bytes()).is_empty());
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(b"data: {\"status\":\"result\"}").is_empty());
        assert_eq!(
            decoder.finish(),
            Some(Frame::Data("{\"status\":\"result\"}".to_string()))
        );
        assert!(decoder.finish().is_none());
    }

    #[tokio::test]
    async fn test_decode_frames_stream() {
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"data: {\"status\":\"chunk\",".to_vec()),
            Ok(b"\"response\":\"a\"}\ndata: [DO".to_vec()),
            Ok(b"NE]\ndata: {\"status\":\"chunk\"}\n".to_vec()),
        ];
        let frames: Vec<Frame> = decode_frames(futures::stream::iter(chunks))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(
            frames,
            vec![
                Frame::Data("{\"status\":\"chunk\",\"response\":\"a\"}".to_string()),
                Frame::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_decode_frames_yields_transport_error_then_stops() {
        let chunks: Vec<Result<Vec<u8>, String>> = vec![
            Ok(CHUNK_LINE.as_bytes().to_vec()),
            Err("connection reset".to_string()),
            Ok(CHUNK_LINE.as_bytes().to_vec()),
        ];
        let items: Vec<Result<Frame, String>> =
            decode_frames(futures::stream::iter(chunks)).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert_eq!(items[1], Err("connection reset".to_string()));
    }
}
