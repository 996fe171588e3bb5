//! Functionality for the [`FragmentHandle`] struct.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::executor::block_on;
use futures::Stream;
use tokio::sync::mpsc::UnboundedReceiver;

use super::InferenceSession;

/// The receiving end of a running completion.
///
/// Fragments arrive in generation order and each one is complete UTF-8. The handle can
/// be drained synchronously ([`next_fragment`][FragmentHandle::next_fragment], or the
/// [`Iterator`] impl), asynchronously
/// ([`next_fragment_async`][FragmentHandle::next_fragment_async], or the [`Stream`]
/// impl), or abandoned: dropping the handle stops the worker after at most one further
/// decode step.
pub struct FragmentHandle {
    rx: UnboundedReceiver<String>,
    session: InferenceSession,
}

impl FragmentHandle {
    pub(crate) fn new(rx: UnboundedReceiver<String>, session: InferenceSession) -> Self {
        Self { rx, session }
    }

    /// Blocks until the next fragment arrives, returning `None` once generation has
    /// finished.
    pub fn next_fragment(&mut self) -> Option<String> {
        block_on(self.rx.recv())
    }

    /// Awaits the next fragment, returning `None` once generation has finished.
    pub async fn next_fragment_async(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Cancels the completion feeding this handle.
    ///
    /// Fragments already in flight can still be received; no new ones are produced
    /// after the worker observes the flag.
    pub fn stop(&self) {
        self.session.mark_done();
    }
}

impl fmt::Debug for FragmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FragmentHandle")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Iterator for FragmentHandle {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_fragment()
    }
}

impl Stream for FragmentHandle {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
