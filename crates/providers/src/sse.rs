//! SSE transport shared by the provider adapters.
//!
//! Both wire formats arrive as `text/event-stream` bodies. The
//! [`FrameDecoder`] accumulates raw body chunks and yields complete
//! `data:` payloads; [`sse_response_stream`] wraps a response and an
//! adapter-specific payload parser into a boxed event stream. A
//! transport failure after the first bytes terminates the stream with
//! an error item.

use axon_domain::stream::BoxStream;
use axon_domain::Result;

use crate::traits::StreamEvent;
use crate::util::from_reqwest;

/// Incremental decoder for `text/event-stream` bodies.
///
/// Frames are separated by a blank line; within a frame only `data:`
/// lines carry payload (`event:`, `id:`, and `retry:` lines are
/// skipped). A partial frame stays buffered until more bytes arrive or
/// [`FrameDecoder::finish`] is called at end of body.
#[derive(Default)]
pub(crate) struct FrameDecoder {
    pending: String,
}

impl FrameDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk; returns every payload completed by it.
    pub(crate) fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);

        let mut payloads = Vec::new();
        while let Some(boundary) = self.pending.find("\n\n") {
            let frame: String = self.pending.drain(..boundary + 2).collect();
            Self::payloads_of(&frame, &mut payloads);
        }
        payloads
    }

    /// Drain whatever is still buffered once the body has ended;
    /// servers occasionally omit the final blank line.
    pub(crate) fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.pending);
        let mut payloads = Vec::new();
        if !rest.trim().is_empty() {
            Self::payloads_of(&rest, &mut payloads);
        }
        payloads
    }

    fn payloads_of(frame: &str, out: &mut Vec<String>) {
        for line in frame.lines() {
            let Some(data) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if !data.is_empty() {
                out.push(data.to_string());
            }
        }
    }
}

/// Build a [`BoxStream`] of parsed events from an SSE response.
///
/// The parser receives each payload string and returns zero or more
/// events; it is `FnMut` because the Anthropic parser keeps assembly
/// state across payloads. If the parser never produced a `Done`, one
/// is synthesised when the body closes so consumers always see a
/// terminal marker.
pub(crate) fn sse_response_stream<F>(
    provider: &'static str,
    response: reqwest::Response,
    mut parse_payload: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut decoder = FrameDecoder::new();
        let mut done_seen = false;

        loop {
            let payloads = match response.chunk().await {
                Ok(Some(bytes)) => decoder.feed(&String::from_utf8_lossy(&bytes)),
                Ok(None) => {
                    for payload in decoder.finish() {
                        for event in parse_payload(&payload) {
                            done_seen |= matches!(&event, Ok(StreamEvent::Done { .. }));
                            yield event;
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(provider, e));
                    break;
                }
            };

            for payload in payloads {
                for event in parse_payload(&payload) {
                    done_seen |= matches!(&event, Ok(StreamEvent::Done { .. }));
                    yield event;
                }
            }
        }

        if !done_seen {
            yield Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            });
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_complete_frame() {
        let mut decoder = FrameDecoder::new();
        let payloads = decoder.feed("event: message\ndata: {\"hello\":\"world\"}\n\n");
        assert_eq!(payloads, vec!["{\"hello\":\"world\"}"]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn multiple_frames_in_one_chunk() {
        let mut decoder = FrameDecoder::new();
        let payloads = decoder.feed("data: first\n\ndata: second\n\n");
        assert_eq!(payloads, vec!["first", "second"]);
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed("data: complete\n\ndata: par"), vec!["complete"]);
        assert_eq!(decoder.feed("tial\n\n"), vec!["partial"]);
    }

    #[test]
    fn split_across_many_chunks() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed("da").is_empty());
        assert!(decoder.feed("ta: chunk1").is_empty());
        assert_eq!(decoder.feed("\n\ndata: chunk2\n\n"), vec!["chunk1", "chunk2"]);
    }

    #[test]
    fn non_data_lines_are_skipped() {
        let mut decoder = FrameDecoder::new();
        let payloads = decoder.feed("event: ping\nid: 42\nretry: 5000\ndata: payload\n\n");
        assert_eq!(payloads, vec!["payload"]);
    }

    #[test]
    fn empty_data_lines_are_skipped() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed("data: \n\n").is_empty());
    }

    #[test]
    fn done_sentinel_passes_through() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed("data: [DONE]\n\n"), vec!["[DONE]"]);
    }

    #[test]
    fn finish_flushes_unterminated_frame() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed("data: trailing").is_empty());
        assert_eq!(decoder.finish(), vec!["trailing"]);
        // A second finish has nothing left.
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn finish_ignores_whitespace_remainder() {
        let mut decoder = FrameDecoder::new();
        decoder.feed("data: ok\n\n  \n");
        assert!(decoder.finish().is_empty());
    }
}
