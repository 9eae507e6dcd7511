//! Bundle loading: the only door new `define` calls come through.
//!
//! Each URL gets exactly one `BundleEntry` whose state moves
//! `Pending -> Loaded | Failed` and never again. Script injection itself
//! lives behind [`BundleHost`], since a browser host attaches a
//! `<script async>` tag to the document head while tests drive a mock.

use crate::registry::{Registry, Require};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("bundle '{url}' failed to load")]
    BundleLoadFailed { url: String },
}

/// Legacy synchronous callback channel; invoked with the bound require
/// once the bundle's defines have run.
pub type LoadCallback = Box<dyn FnOnce(Require)>;

/// The script-injection seam. `inject` must fire the ticket exactly once
/// when the fetch settles; it may do so re-entrantly.
pub trait BundleHost {
    fn inject(&self, url: &str, ticket: LoadTicket);
}

/// Host used when no injection mechanism is attached; every fetch fails.
pub struct NullHost;

impl BundleHost for NullHost {
    fn inject(&self, url: &str, ticket: LoadTicket) {
        tracing::warn!("no bundle host attached, failing '{}'", url);
        ticket.failed();
    }
}

/// Single-use completion handle given to the host alongside a URL.
pub struct LoadTicket {
    registry: Registry,
    url: String,
}

impl LoadTicket {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn loaded(self) {
        self.registry.finish_bundle(&self.url, true);
    }

    pub fn failed(self) {
        self.registry.finish_bundle(&self.url, false);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BundleState {
    Pending,
    Loaded,
    Failed,
}

pub(crate) struct BundleEntry {
    pub(crate) state: BundleState,
    waiters: Vec<LoadCallback>,
    watchers: Vec<oneshot::Sender<Result<(), LoadError>>>,
}

impl BundleEntry {
    fn new() -> Self {
        Self {
            state: BundleState::Pending,
            waiters: Vec::new(),
            watchers: Vec::new(),
        }
    }
}

/// Completion future of one `ensure_bundle` call.
pub struct LoadFuture {
    url: String,
    inner: LoadFutureInner,
}

enum LoadFutureInner {
    Ready(Option<Result<(), LoadError>>),
    Waiting(oneshot::Receiver<Result<(), LoadError>>),
}

impl Future for LoadFuture {
    type Output = Result<(), LoadError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.inner {
            LoadFutureInner::Ready(slot) => Poll::Ready(slot.take().unwrap_or_else(|| {
                Err(LoadError::BundleLoadFailed { url: this.url.clone() })
            })),
            LoadFutureInner::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                // Sender dropped without settling: the registry is gone.
                Poll::Ready(Err(_)) => Poll::Ready(Err(LoadError::BundleLoadFailed {
                    url: this.url.clone(),
                })),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl Registry {
    /// Ensure the bundle at `url` is loaded.
    ///
    /// The first call for a URL records a pending entry *before* asking the
    /// host to fetch, so re-entrant calls during creation join the same
    /// entry; at most one injection ever happens per URL. A failed URL is
    /// terminal: later calls see the same rejection, the callback is never
    /// invoked, and no retry occurs.
    pub fn ensure_bundle(&self, url: &str, mut callback: Option<LoadCallback>) -> LoadFuture {
        let mut inject = false;
        let inner = {
            let mut state = self.state.borrow_mut();
            match state.bundles.get_mut(url) {
                Some(entry) => match entry.state {
                    BundleState::Loaded => LoadFutureInner::Ready(Some(Ok(()))),
                    BundleState::Failed => LoadFutureInner::Ready(Some(Err(
                        LoadError::BundleLoadFailed { url: url.to_string() },
                    ))),
                    BundleState::Pending => {
                        if let Some(cb) = callback.take() {
                            entry.waiters.push(cb);
                        }
                        let (tx, rx) = oneshot::channel();
                        entry.watchers.push(tx);
                        LoadFutureInner::Waiting(rx)
                    }
                },
                None => {
                    let mut entry = BundleEntry::new();
                    if let Some(cb) = callback.take() {
                        entry.waiters.push(cb);
                    }
                    let (tx, rx) = oneshot::channel();
                    entry.watchers.push(tx);
                    state.bundles.insert(url.to_string(), entry);
                    inject = true;
                    LoadFutureInner::Waiting(rx)
                }
            }
        };
        // An already-loaded bundle invokes the callback straight away,
        // outside the state borrow so it can require freely.
        if matches!(inner, LoadFutureInner::Ready(Some(Ok(())))) {
            if let Some(cb) = callback.take() {
                cb(self.require_fn());
            }
        }
        if inject {
            tracing::info!("loading bundle '{}'", url);
            let ticket = LoadTicket {
                registry: self.clone(),
                url: url.to_string(),
            };
            self.host.inject(url, ticket);
        }
        LoadFuture { url: url.to_string(), inner }
    }

    pub(crate) fn finish_bundle(&self, url: &str, success: bool) {
        let (waiters, watchers) = {
            let mut state = self.state.borrow_mut();
            let entry = match state.bundles.get_mut(url) {
                Some(entry) => entry,
                None => {
                    tracing::warn!("completion for unknown bundle '{}'", url);
                    return;
                }
            };
            if entry.state != BundleState::Pending {
                tracing::warn!("bundle '{}' already settled", url);
                return;
            }
            entry.state = if success {
                BundleState::Loaded
            } else {
                BundleState::Failed
            };
            (
                std::mem::take(&mut entry.waiters),
                std::mem::take(&mut entry.watchers),
            )
        };
        if success {
            tracing::info!("bundle '{}' loaded, draining {} waiters", url, waiters.len());
            // FIFO, borrow released: a waiter may itself call ensure_bundle.
            for waiter in waiters {
                waiter(self.require_fn());
            }
            for tx in watchers {
                let _ = tx.send(Ok(()));
            }
        } else {
            tracing::error!("bundle '{}' failed to load", url);
            // Waiters are dropped unnotified; the future rejection is the
            // sole failure signal.
            drop(waiters);
            for tx in watchers {
                let _ = tx.send(Err(LoadError::BundleLoadFailed { url: url.to_string() }));
            }
        }
    }
}
