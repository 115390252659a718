use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::Stream;
use gentable_core::gen_table::GenTableError;
use pin_project_lite::pin_project;
use tokio::time::{sleep, Instant, Sleep};

use crate::sse::SourceError;

pin_project! {
    /// Ends the wrapped body stream with `GenTableError::Timeout` when no
    /// chunk arrives within `idle`. Sits below the demultiplexer, so
    /// keep-alive comments count as activity.
    pub(crate) struct IdleTimeout<S> {
        #[pin]
        inner: S,
        #[pin]
        deadline: Sleep,
        idle: Duration,
        done: bool,
    }
}

impl<S> IdleTimeout<S> {
    pub(crate) fn new(inner: S, idle: Duration) -> Self {
        Self {
            inner,
            deadline: sleep(idle),
            idle,
            done: false,
        }
    }
}

impl<S, T, E> Stream for IdleTimeout<S>
where
    S: Stream<Item = Result<T, E>>,
    E: SourceError,
{
    type Item = Result<T, GenTableError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }
        match this.inner.poll_next(cx) {
            Poll::Ready(Some(item)) => {
                let next = Instant::now() + *this.idle;
                this.deadline.as_mut().reset(next);
                Poll::Ready(Some(item.map_err(SourceError::into_stream_error)))
            }
            Poll::Ready(None) => {
                *this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => match this.deadline.poll(cx) {
                Poll::Ready(()) => {
                    *this.done = true;
                    Poll::Ready(Some(Err(GenTableError::Timeout(format!(
                        "no data for {}ms",
                        this.idle.as_millis()
                    )))))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
