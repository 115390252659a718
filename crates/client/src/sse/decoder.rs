use bytes::BytesMut;
use gentable_core::gen_table::{
    ChunkError, GenTableStreamEvent, COMPLETION_CHUNK_OBJECT, REFERENCES_OBJECT,
};
use serde::de::IgnoredAny;
use tracing::{debug, warn};

const SENTINEL: &str = "[DONE]";
const DONE_LINE: &str = "data: [DONE]";

/// Result of classifying one candidate frame line.
#[derive(Debug)]
pub enum LineOutcome {
    Event(GenTableStreamEvent),
    Done,
    Skip(SkipReason),
    Fatal(ChunkError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Blank,
    /// SSE comment line such as a `: keep-alive` ping.
    Comment,
    /// Not parseable as JSON, usually a frame cut at a chunk boundary.
    Incomplete(String),
    /// Known discriminator but the payload does not fit its schema.
    Invalid { object: String, error: String },
}

/// Output of [`FrameDecoder::feed`].
#[derive(Debug)]
pub enum Decoded {
    Event(GenTableStreamEvent),
    Done,
    Fatal(ChunkError),
}

/// The payload of a line with any `data:` prefix removed.
fn payload(line: &str) -> &str {
    line.strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))
        .unwrap_or(line)
        .trim()
}

/// True when `line` holds a whole payload: the sentinel or parseable JSON.
fn is_complete(line: &str) -> bool {
    let line = match line.strip_suffix(DONE_LINE) {
        Some(head) if !head.trim().is_empty() => head,
        _ => line,
    };
    let content = payload(line);
    content == SENTINEL || serde_json::from_str::<IgnoredAny>(content).is_ok()
}

pub fn classify_line(line: &str) -> LineOutcome {
    if line.starts_with(':') {
        return LineOutcome::Skip(SkipReason::Comment);
    }
    let content = payload(line);
    if content.is_empty() {
        return LineOutcome::Skip(SkipReason::Blank);
    }
    if content == SENTINEL {
        return LineOutcome::Done;
    }
    let value: serde_json::Value = match serde_json::from_str(content) {
        Ok(v) => v,
        Err(e) => return LineOutcome::Skip(SkipReason::Incomplete(e.to_string())),
    };
    let object = value
        .get("object")
        .and_then(|o| o.as_str())
        .map(str::to_owned);
    match object.as_deref() {
        Some(COMPLETION_CHUNK_OBJECT) | Some(REFERENCES_OBJECT) => {
            match serde_json::from_value::<GenTableStreamEvent>(value) {
                Ok(ev) => LineOutcome::Event(ev),
                Err(e) => {
                    let object = object.unwrap_or_default();
                    warn!(target:"gentable::sse","dropping invalid {} event: {}", object, e);
                    LineOutcome::Skip(SkipReason::Invalid {
                        object,
                        error: e.to_string(),
                    })
                }
            }
        }
        _ => LineOutcome::Fatal(ChunkError::new(content)),
    }
}

/// Splits a segment into candidate frame lines. A `data: [DONE]` glued to
/// the end of a data line becomes its own line.
fn candidate_lines(segment: &str) -> impl Iterator<Item = &str> {
    segment
        .split('\n')
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .flat_map(|line| {
            let (head, tail) = match line.strip_suffix(DONE_LINE) {
                Some(head) if !head.trim().is_empty() => (head, Some(SENTINEL)),
                _ => (line, None),
            };
            std::iter::once(head).chain(tail)
        })
}

/// `buf` starts with `carried` bytes left over from the previous chunk.
fn carried_is_stale(buf: &[u8], carried: usize) -> bool {
    let end = buf[carried..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(buf.len(), |p| carried + p);
    let joined = String::from_utf8_lossy(&buf[..end]);
    if is_complete(joined.trim_end_matches('\r')) {
        return false;
    }
    let fresh = String::from_utf8_lossy(&buf[carried..end]);
    is_complete(fresh.trim_end_matches('\r'))
}

/// Incremental decoder for one streaming response.
///
/// Complete frames (everything up to the last `\n\n`) are classified
/// immediately. Text after the last terminator is classified too, so a
/// frame sent without its blank line is not held back; only a trailing
/// line that fails to parse is carried into the next chunk.
/// The carried fragment is joined with the next chunk; it is dropped only
/// when the joined line does not parse but the new chunk's part of it does.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: BytesMut,
    finished: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `[DONE]` or a fatal event was seen, or after [`finish`](Self::finish).
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Decoded> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        let carried = self.pending.len();
        self.pending.extend_from_slice(chunk);
        let mut buf = self.pending.split();
        if carried > 0 && carried_is_stale(&buf, carried) {
            debug!(target:"gentable::sse","dropping stale partial frame len={}", carried);
            let _ = buf.split_to(carried);
        }

        let split_at = twoway::rfind_bytes(&buf, b"\n\n").map_or(0, |p| p + 2);
        let (complete, rest) = buf.split_at(split_at);

        let text = String::from_utf8_lossy(complete);
        for segment in text.split("\n\n").filter(|s| !s.trim().is_empty()) {
            for line in candidate_lines(segment) {
                if self.accept(classify_line(line), &mut out) {
                    return out;
                }
            }
        }

        if rest.is_empty() {
            return out;
        }
        let rest_text = match std::str::from_utf8(rest) {
            Ok(s) => s.to_owned(),
            // multi-byte character cut at the chunk boundary
            Err(e) if e.error_len().is_none() => {
                self.pending.extend_from_slice(rest);
                return out;
            }
            Err(_) => String::from_utf8_lossy(rest).into_owned(),
        };
        let lines: Vec<&str> = candidate_lines(&rest_text).collect();
        let last = lines.len().saturating_sub(1);
        for (i, line) in lines.iter().enumerate() {
            let outcome = classify_line(line);
            if i == last {
                if let LineOutcome::Skip(SkipReason::Incomplete(_)) = outcome {
                    self.pending.extend_from_slice(line.as_bytes());
                    break;
                }
            }
            if self.accept(outcome, &mut out) {
                return out;
            }
        }
        out
    }

    /// Marks the end of input. A leftover partial frame is discarded.
    pub fn finish(&mut self) {
        if !self.pending.is_empty() {
            debug!(target:"gentable::sse","discarding partial frame at end of stream len={}", self.pending.len());
            self.pending.clear();
        }
        self.finished = true;
    }

    /// Returns true when decoding must stop.
    fn accept(&mut self, outcome: LineOutcome, out: &mut Vec<Decoded>) -> bool {
        match outcome {
            LineOutcome::Event(ev) => {
                out.push(Decoded::Event(ev));
                false
            }
            LineOutcome::Done => {
                out.push(Decoded::Done);
                self.finish();
                true
            }
            LineOutcome::Fatal(e) => {
                out.push(Decoded::Fatal(e));
                self.finish();
                true
            }
            LineOutcome::Skip(reason) => {
                debug!(target:"gentable::sse","skipping frame line: {:?}", reason);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_frame(row: &str, text: &str) -> String {
        format!(
            "data: {{\"id\":\"c-{row}\",\"object\":\"gen_table.completion.chunk\",\"created\":1,\"model\":\"m\",\"choices\":[{{\"index\":0,\"message\":{{\"role\":\"assistant\",\"content\":\"{text}\"}}}}],\"output_column_name\":\"out\",\"row_id\":\"{row}\"}}\n\n"
        )
    }

    fn refs_frame(row: &str) -> String {
        format!(
            "data: {{\"object\":\"gen_table.references\",\"chunks\":[],\"search_query\":\"q\",\"output_column_name\":\"out\",\"row_id\":\"{row}\"}}\n\n"
        )
    }

    fn texts(decoded: &[Decoded]) -> Vec<String> {
        decoded
            .iter()
            .map(|d| match d {
                Decoded::Event(GenTableStreamEvent::Chunk(c)) => c.text().to_string(),
                Decoded::Event(GenTableStreamEvent::References(_)) => "<refs>".to_string(),
                Decoded::Done => "<done>".to_string(),
                Decoded::Fatal(_) => "<fatal>".to_string(),
            })
            .collect()
    }

    #[test]
    fn classify_strips_prefix_and_routes() {
        let line = chunk_frame("r1", "hi");
        match classify_line(line.trim_end()) {
            LineOutcome::Event(GenTableStreamEvent::Chunk(c)) => assert_eq!(c.row_id, "r1"),
            other => panic!("unexpected {:?}", other),
        }
        let line = refs_frame("r1");
        assert!(matches!(
            classify_line(line.trim_end()),
            LineOutcome::Event(GenTableStreamEvent::References(_))
        ));
    }

    #[test]
    fn classify_sentinel_variants() {
        assert!(matches!(classify_line("data: [DONE]"), LineOutcome::Done));
        assert!(matches!(classify_line("[DONE]"), LineOutcome::Done));
        assert!(matches!(classify_line("data:[DONE]  "), LineOutcome::Done));
    }

    #[test]
    fn classify_unknown_object_is_fatal() {
        match classify_line(r#"data: {"object":"unexpected.type"}"#) {
            LineOutcome::Fatal(e) => assert_eq!(e.payload, r#"{"object":"unexpected.type"}"#),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(classify_line(r#"data: {"id":1}"#), LineOutcome::Fatal(_)));
        assert!(matches!(classify_line("data: 42"), LineOutcome::Fatal(_)));
    }

    #[test]
    fn classify_partial_json_is_skipped() {
        assert!(matches!(
            classify_line(r#"data: {"object":"gen_table.compl"#),
            LineOutcome::Skip(SkipReason::Incomplete(_))
        ));
        assert!(matches!(classify_line("data: "), LineOutcome::Skip(SkipReason::Blank)));
    }

    #[test]
    fn classify_schema_mismatch_is_skipped() {
        let outcome = classify_line(r#"data: {"object":"gen_table.completion.chunk","row_id":"r1"}"#);
        match outcome {
            LineOutcome::Skip(SkipReason::Invalid { object, .. }) => {
                assert_eq!(object, COMPLETION_CHUNK_OBJECT)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn batched_frames_in_one_chunk() {
        let mut dec = FrameDecoder::new();
        let chunk = format!("{}{}", chunk_frame("r1", "a"), chunk_frame("r1", "b"));
        let out = dec.feed(chunk.as_bytes());
        assert_eq!(texts(&out), vec!["a", "b"]);
        assert!(!dec.is_finished());
    }

    #[test]
    fn frame_split_mid_json_is_reassembled() {
        let mut dec = FrameDecoder::new();
        let frame = chunk_frame("r1", "hello");
        let (first, second) = frame.split_at(40);
        assert!(dec.feed(first.as_bytes()).is_empty());
        let out = dec.feed(second.as_bytes());
        assert_eq!(texts(&out), vec!["hello"]);
    }

    #[test]
    fn frame_split_inside_prefix_is_reassembled() {
        let mut dec = FrameDecoder::new();
        let frame = chunk_frame("r1", "x");
        assert!(dec.feed(&frame.as_bytes()[..2]).is_empty());
        assert_eq!(texts(&dec.feed(&frame.as_bytes()[2..])), vec!["x"]);
    }

    #[test]
    fn frame_without_terminator_is_emitted_immediately() {
        let mut dec = FrameDecoder::new();
        let frame = chunk_frame("r1", "now");
        let out = dec.feed(frame.trim_end().as_bytes());
        assert_eq!(texts(&out), vec!["now"]);
        assert!(dec.feed(b"\n\n").is_empty());
    }

    #[test]
    fn multibyte_char_split_across_chunks() {
        let mut dec = FrameDecoder::new();
        let frame = chunk_frame("r1", "caf\u{e9}");
        let bytes = frame.as_bytes();
        let cut = frame.find('\u{e9}').unwrap() + 1;
        assert!(dec.feed(&bytes[..cut]).is_empty());
        assert_eq!(texts(&dec.feed(&bytes[cut..])), vec!["caf\u{e9}"]);
    }

    #[test]
    fn stale_fragment_dropped_when_new_frame_starts() {
        let mut dec = FrameDecoder::new();
        assert!(dec.feed(br#"data: {"object":"gen_ta"#).is_empty());
        let out = dec.feed(chunk_frame("r2", "fresh").as_bytes());
        assert_eq!(texts(&out), vec!["fresh"]);
    }

    #[test]
    fn frame_split_before_data_in_content() {
        let frame = chunk_frame("r1", "Input data: 42");
        let at = frame.find("data: 42").unwrap();
        let mut dec = FrameDecoder::new();
        assert!(dec.feed(frame[..at].as_bytes()).is_empty());
        let out = dec.feed(frame[at..].as_bytes());
        assert_eq!(texts(&out), vec!["Input data: 42"]);
    }

    #[test]
    fn comment_lines_are_skipped_and_not_carried() {
        assert!(matches!(classify_line(": keep-alive"), LineOutcome::Skip(SkipReason::Comment)));
        let mut dec = FrameDecoder::new();
        assert!(dec.feed(b": keep-alive").is_empty());
        let out = dec.feed(chunk_frame("r1", "after").as_bytes());
        assert_eq!(texts(&out), vec!["after"]);
    }

    #[test]
    fn sentinel_after_events_in_same_chunk() {
        let mut dec = FrameDecoder::new();
        let chunk = format!("{}data: [DONE]\n\n{}", refs_frame("r1"), chunk_frame("r1", "late"));
        let out = dec.feed(chunk.as_bytes());
        assert_eq!(texts(&out), vec!["<refs>", "<done>"]);
        assert!(dec.is_finished());
        assert!(dec.feed(chunk_frame("r1", "after").as_bytes()).is_empty());
    }

    #[test]
    fn sentinel_glued_to_data_line() {
        let mut dec = FrameDecoder::new();
        let glued = format!("{}data: [DONE]\n\n", chunk_frame("r1", "z").trim_end());
        let out = dec.feed(glued.as_bytes());
        assert_eq!(texts(&out), vec!["z", "<done>"]);
    }

    #[test]
    fn lines_without_blank_separator_are_split() {
        let mut dec = FrameDecoder::new();
        let chunk = format!(
            "{}\n{}\n\n",
            chunk_frame("r1", "one").trim_end(),
            chunk_frame("r1", "two").trim_end()
        );
        assert_eq!(texts(&dec.feed(chunk.as_bytes())), vec!["one", "two"]);
    }

    #[test]
    fn crlf_frames_are_accepted() {
        let mut dec = FrameDecoder::new();
        let frame = chunk_frame("r1", "win").replace("\n\n", "\r\n\n");
        assert_eq!(texts(&dec.feed(frame.as_bytes())), vec!["win"]);
    }

    #[test]
    fn fatal_stops_decoding() {
        let mut dec = FrameDecoder::new();
        let chunk = format!(
            "{}data: {{\"object\":\"unexpected.type\"}}\n\n{}",
            chunk_frame("r1", "before"),
            chunk_frame("r1", "after")
        );
        let out = dec.feed(chunk.as_bytes());
        assert_eq!(texts(&out), vec!["before", "<fatal>"]);
        assert!(dec.is_finished());
        assert!(dec.feed(chunk_frame("r1", "later").as_bytes()).is_empty());
    }

    #[test]
    fn garbage_between_frames_is_skipped() {
        let mut dec = FrameDecoder::new();
        let chunk = format!("{}data: not json\n\n{}", chunk_frame("r1", "a"), chunk_frame("r1", "b"));
        assert_eq!(texts(&dec.feed(chunk.as_bytes())), vec!["a", "b"]);
    }
}
