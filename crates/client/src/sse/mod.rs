//! Server-sent event demultiplexer for generative-table streams.
//!
//! Frames look like `data: {json}\n\n` and end with `data: [DONE]`. Each
//! JSON payload is routed on its `object` field to a completion chunk or a
//! references event. Unknown `object` values are fatal, while fragments
//! that do not parse are skipped.

mod decoder;
mod stream;

pub use decoder::{classify_line, Decoded, FrameDecoder, LineOutcome, SkipReason};
pub use stream::{demux_channel, demux_stream, DemuxProducer, SourceError};
