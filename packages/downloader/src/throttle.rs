use std::{
    io::Result,
    pin::Pin,
    task::{Context, Poll, ready},
    time::Duration,
};

use bytes::Bytes;
use futures::Stream;
use pin_project::pin_project;
use tokio::time::Sleep;

pub const THROTTLE_INTERVAL: Duration = Duration::from_millis(100);
const INTERVALS_PER_SECOND: u64 = 10;

/// Fixed chunk size plus a fixed pause between chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub chunk_size: usize,
    pub interval: Duration,
}

impl RateLimit {
    /// `None` when `bytes_per_second` is `0`.
    #[must_use]
    pub fn bytes_per_second(bytes_per_second: u64) -> Option<Self> {
        if bytes_per_second == 0 {
            return None;
        }

        let per_interval = bytes_per_second / INTERVALS_PER_SECOND;

        Some(Self {
            chunk_size: usize::try_from(per_interval.max(1)).unwrap_or(usize::MAX),
            interval: THROTTLE_INTERVAL,
        })
    }
}

/// Re-chunks a byte stream and sleeps between chunks.
///
/// There is no pause after the final chunk.
#[pin_project]
pub struct Throttled<S: Stream<Item = Result<Bytes>>> {
    #[pin]
    inner: S,
    limit: RateLimit,
    buffer: Bytes,
    delay: Option<Pin<Box<Sleep>>>,
    done: bool,
}

impl<S: Stream<Item = Result<Bytes>>> Throttled<S> {
    pub const fn new(inner: S, limit: RateLimit) -> Self {
        Self {
            inner,
            limit,
            buffer: Bytes::new(),
            delay: None,
            done: false,
        }
    }
}

impl<S: Stream<Item = Result<Bytes>>> Stream for Throttled<S> {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if !this.buffer.is_empty() {
                if let Some(delay) = this.delay.as_mut() {
                    ready!(delay.as_mut().poll(cx));
                }

                let len = this.limit.chunk_size.min(this.buffer.len());
                let chunk = this.buffer.split_to(len);

                *this.delay = Some(Box::pin(tokio::time::sleep(this.limit.interval)));

                return Poll::Ready(Some(Ok(chunk)));
            }

            if *this.done {
                return Poll::Ready(None);
            }

            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(bytes)) => *this.buffer = bytes,
                Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                None => {
                    *this.done = true;
                    return Poll::Ready(None);
                }
            }
        }
    }
}
