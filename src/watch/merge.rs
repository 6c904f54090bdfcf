//! Fan-in of many watch loops into one observation stream.
//!
//! All loops share one bounded channel, so observations come out in the order
//! their fetches completed. A slow resource never holds back a fast one; each
//! loop only ever waits on its own fetch.

use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tokio_util::sync::DropGuard;
use tracing::debug;

use super::WatchLoop;
use crate::model::Observation;
use crate::registry::RegistryClient;
use crate::Result;

/// Merged observations of a set of watch loops.
///
/// - Dropping the stream cancels every loop.
/// - The first fatal error is yielded once, every loop is cancelled, and the
///   stream ends.
pub struct MergedStream {
    inner: ReceiverStream<Result<Observation>>,
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    finished: bool,
    _guard: DropGuard,
}

impl std::fmt::Debug for MergedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergedStream")
            .field("loops", &self.handles.len())
            .field("finished", &self.finished)
            .finish()
    }
}

/// Starts every loop and returns their merged stream.
pub fn merge<C>(loops: Vec<WatchLoop<C>>, buffer: usize) -> MergedStream
where
    C: RegistryClient,
{
    let token = CancellationToken::new();
    let (tx, rx) = mpsc::channel(buffer.max(1));

    let handles = loops
        .into_iter()
        .map(|watch| {
            debug!(resource = %watch.resource(), "starting watch loop");
            watch.spawn(tx.clone(), token.child_token())
        })
        .collect();
    // Only the loops hold senders: the channel closes once they all stop
    drop(tx);

    MergedStream {
        inner: ReceiverStream::new(rx),
        _guard: token.clone().drop_guard(),
        token,
        handles,
        finished: false,
    }
}

impl MergedStream {
    /// Stops every loop. Observations already queued are discarded.
    pub fn cancel(&mut self) {
        self.token.cancel();
        self.finished = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Number of loops started by this merge
    pub fn loop_count(&self) -> usize {
        self.handles.len()
    }
}

impl Stream for MergedStream {
    type Item = Result<Observation>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Err(e))) => {
                debug!(error = %e, "watch loop failed, cancelling remaining loops");
                self.token.cancel();
                self.finished = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}
