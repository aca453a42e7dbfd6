//! Merging of independent event streams.
//!
//! [`Multiplexer`] keeps at most one outstanding "advance" per source in a
//! [`FuturesUnordered`] set and yields whichever completes first:
//!
//! ```text
//!  source 0 ──▶ StreamFuture ─┐
//!  source 1 ──▶ StreamFuture ─┼──▶ FuturesUnordered ──▶ (SourceId, Item)
//!  source 2 ──▶ StreamFuture ─┘          │
//!        ▲                               │ item: re-arm the source
//!        └───────────────────────────────┘ end:  drop the source
//! ```
//!
//! Items from one source keep their relative order. Items are never
//! interpreted: an `Err` item is yielded like any other and its source stays
//! armed. The merged stream ends once every source has ended.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures::stream::{FuturesUnordered, StreamFuture};
use futures::{Stream, StreamExt};
use tracing::trace;

/// Identifies a source within one [`Multiplexer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(usize);

impl SourceId {
    /// Position at which the source was pushed.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// One outstanding advance of a source.
struct Advance<S> {
    id: SourceId,
    inner: StreamFuture<S>,
}

impl<S: Stream + Unpin> Advance<S> {
    fn new(id: SourceId, stream: S) -> Self {
        Self {
            id,
            inner: stream.into_future(),
        }
    }
}

impl<S: Stream + Unpin> Future for Advance<S> {
    type Output = (SourceId, Option<S::Item>, S);

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        let (item, stream) = ready!(Pin::new(&mut self.inner).poll(cx));
        Poll::Ready((id, item, stream))
    }
}

/// Merges many streams into one, by arrival.
pub struct Multiplexer<S> {
    in_flight: FuturesUnordered<Advance<S>>,
    next_id: usize,
}

impl<S: Stream + Unpin> Multiplexer<S> {
    /// Creates a multiplexer with no sources.
    pub fn new() -> Self {
        Self {
            in_flight: FuturesUnordered::new(),
            next_id: 0,
        }
    }

    /// Adds a source and starts advancing it.
    pub fn push(&mut self, stream: S) -> SourceId {
        let id = SourceId(self.next_id);
        self.next_id += 1;
        self.in_flight.push(Advance::new(id, stream));
        id
    }

    /// Number of sources that have not ended.
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether every source has ended.
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Takes back every source that has not ended.
    ///
    /// Nothing a source produced is lost: a source is only handed out when no
    /// item of it is waiting to be yielded.
    pub fn into_sources(self) -> Vec<(SourceId, S)> {
        let mut sources: Vec<_> = self
            .in_flight
            .into_iter()
            .filter_map(|advance| advance.inner.into_inner().map(|s| (advance.id, s)))
            .collect();
        sources.sort_by_key(|(id, _)| *id);
        sources
    }
}

impl<S: Stream + Unpin> Default for Multiplexer<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Stream + Unpin> FromIterator<S> for Multiplexer<S> {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut mux = Self::new();
        for stream in iter {
            mux.push(stream);
        }
        mux
    }
}

impl<S: Stream + Unpin> Stream for Multiplexer<S> {
    type Item = (SourceId, S::Item);

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match ready!(self.in_flight.poll_next_unpin(cx)) {
                Some((id, Some(item), stream)) => {
                    self.in_flight.push(Advance::new(id, stream));
                    return Poll::Ready(Some((id, item)));
                }
                Some((id, None, _)) => {
                    trace!(source = %id, remaining = self.in_flight.len(), "Source ended");
                }
                None => return Poll::Ready(None),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.in_flight.is_empty() {
            (0, Some(0))
        } else {
            (0, None)
        }
    }
}

impl<S> fmt::Debug for Multiplexer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("sources", &self.in_flight.len())
            .finish()
    }
}
