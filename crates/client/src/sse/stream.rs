use std::fmt;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use gentable_core::gen_table::{GenTableError, GenTableStream, GenTableStreamEvent};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::decoder::{Decoded, FrameDecoder};

type Item = Result<GenTableStreamEvent, GenTableError>;

/// Error type of a byte source that [`demux_stream`] can read from.
///
/// Transport failures become [`GenTableError::Unexpected`]; a source that
/// already speaks [`GenTableError`] (such as an idle-timeout wrapper)
/// passes its error through unchanged.
pub trait SourceError: fmt::Display {
    fn into_stream_error(self) -> GenTableError
    where
        Self: Sized,
    {
        GenTableError::Unexpected(self.to_string())
    }
}

impl SourceError for reqwest::Error {}

impl SourceError for std::io::Error {}

impl SourceError for GenTableError {
    fn into_stream_error(self) -> GenTableError {
        self
    }
}

/// Turns a response body into typed events.
///
/// The returned stream owns `source`; dropping it early drops the source
/// and with it the underlying connection. A source error ends the stream
/// with [`SourceError::into_stream_error`], which is
/// [`GenTableError::Unexpected`] for transport errors.
pub fn demux_stream<'a, S, E>(source: S) -> GenTableStream<'a>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'a,
    E: SourceError + Send + 'a,
{
    let s = async_stream::stream! {
        let mut source = Box::pin(source);
        let mut decoder = FrameDecoder::new();
        'outer: while let Some(chunk) = source.next().await {
            match chunk {
                Ok(b) => {
                    for decoded in decoder.feed(&b) {
                        match decoded {
                            Decoded::Event(ev) => { yield Ok(ev); }
                            Decoded::Done => {
                                debug!(target:"gentable::sse","stream done");
                                break 'outer;
                            }
                            Decoded::Fatal(e) => {
                                warn!(target:"gentable::sse","unexpected event, closing stream: {}", e.payload);
                                yield Err(GenTableError::Chunk(e));
                                break 'outer;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(target:"gentable::sse","source error: {}", e);
                    yield Err(e.into_stream_error());
                    break 'outer;
                }
            }
        }
        decoder.finish();
        drop(source);
    };
    Box::pin(s)
}

/// Push side of [`demux_channel`], for transports that deliver chunks
/// through callbacks instead of a `Stream`.
///
/// The producer never blocks. Once the output is closed, by `[DONE]`, a
/// fatal event, an error, [`on_end`](Self::on_end), or the consumer
/// dropping its stream, every further call is a no-op.
#[derive(Debug)]
pub struct DemuxProducer {
    decoder: FrameDecoder,
    tx: Option<mpsc::UnboundedSender<Item>>,
}

pub fn demux_channel<'a>() -> (DemuxProducer, GenTableStream<'a>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let producer = DemuxProducer {
        decoder: FrameDecoder::new(),
        tx: Some(tx),
    };
    let events = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    (producer, Box::pin(events))
}

impl DemuxProducer {
    pub fn on_chunk(&mut self, chunk: &[u8]) {
        if self.tx.is_none() {
            return;
        }
        for decoded in self.decoder.feed(chunk) {
            let item = match decoded {
                Decoded::Event(ev) => Ok(ev),
                Decoded::Done => {
                    self.close();
                    return;
                }
                Decoded::Fatal(e) => {
                    warn!(target:"gentable::sse","unexpected event, closing stream: {}", e.payload);
                    Err(GenTableError::Chunk(e))
                }
            };
            let terminal = item.is_err();
            if !self.send(item) || terminal {
                self.close();
                return;
            }
        }
    }

    pub fn on_error(&mut self, err: impl fmt::Display) {
        if self.tx.is_none() {
            return;
        }
        error!(target:"gentable::sse","transport error: {}", err);
        self.send(Err(GenTableError::Unexpected(err.to_string())));
        self.close();
    }

    pub fn on_end(&mut self) {
        self.close();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }

    fn send(&mut self, item: Item) -> bool {
        match &self.tx {
            Some(tx) => {
                let ok = tx.send(item).is_ok();
                if !ok {
                    debug!(target:"gentable::sse","consumer detached");
                }
                ok
            }
            None => false,
        }
    }

    fn close(&mut self) {
        if self.tx.take().is_some() {
            self.decoder.finish();
        }
    }
}
