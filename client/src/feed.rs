//! Change-feed subscription and reload coalescing.
//!
//! Notifications are coarse: they only say that the location or profile
//! collection changed. The subscriber turns each received batch into one
//! `on_change` call; [`ReloadGate`] makes sure those calls never produce
//! overlapping reloads.

use std::cell::{Cell, RefCell};
use std::pin::Pin;
use std::rc::Rc;

use futures::stream::{Stream, StreamExt};
use globe_shared::ChangeNotice;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::SubscriptionError;

/// What a change-feed transport delivers.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Connected,
    Batch(Vec<ChangeNotice>),
    /// Notifications were lost; the subscriber treats this as a change.
    Lagged(u64),
    Disconnected(SubscriptionError),
}

pub type ChangeStream = Pin<Box<dyn Stream<Item = FeedMessage>>>;

/// A source of change notifications for the location and profile collections.
pub trait ChangeFeed {
    fn connect(&self) -> ChangeStream;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Live,
    Reconnecting,
}

struct SubscriptionInner {
    active: Cell<bool>,
    status: Cell<ConnectionStatus>,
    batches: Cell<u64>,
    task: RefCell<Option<JoinHandle<()>>>,
}

/// Live subscription; cheap to clone, all clones share the same state.
#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Rc<SubscriptionInner>,
}

impl SubscriptionHandle {
    /// Unsubscribe. Idempotent; no `on_change` runs after this returns.
    pub fn stop(&self) {
        if !self.inner.active.replace(false) {
            return;
        }
        if let Some(task) = self.inner.task.borrow_mut().take() {
            task.abort();
        }
        debug!("change feed subscription stopped");
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.get()
    }

    pub fn batches_received(&self) -> u64 {
        self.inner.batches.get()
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("active", &self.inner.active.get())
            .field("status", &self.inner.status.get())
            .field("batches", &self.inner.batches.get())
            .finish()
    }
}

pub struct ChangeFeedSubscriber;

impl ChangeFeedSubscriber {
    /// Start listening. Must be called from within a `tokio::task::LocalSet`.
    ///
    /// `on_change` runs once per received batch and once per reconnect,
    /// `on_warning` once per transport problem; neither runs after
    /// [`SubscriptionHandle::stop`].
    pub fn start<F>(
        feed: &F,
        mut on_change: impl FnMut() + 'static,
        mut on_warning: impl FnMut(SubscriptionError) + 'static,
    ) -> SubscriptionHandle
    where
        F: ChangeFeed + ?Sized,
    {
        let inner = Rc::new(SubscriptionInner {
            active: Cell::new(true),
            status: Cell::new(ConnectionStatus::Connecting),
            batches: Cell::new(0),
            task: RefCell::new(None),
        });

        let mut stream = feed.connect();
        let state = Rc::clone(&inner);
        let task = tokio::task::spawn_local(async move {
            while let Some(message) = stream.next().await {
                if !state.active.get() {
                    break;
                }
                match message {
                    FeedMessage::Connected => match state.status.replace(ConnectionStatus::Live) {
                        ConnectionStatus::Reconnecting => {
                            // Notices sent while disconnected are gone.
                            info!("change feed reconnected; forcing reload");
                            state.batches.set(state.batches.get() + 1);
                            on_change();
                        }
                        ConnectionStatus::Connecting => info!("change feed live"),
                        ConnectionStatus::Live => {}
                    },
                    FeedMessage::Batch(notices) => {
                        if notices.is_empty() {
                            continue;
                        }
                        state.status.set(ConnectionStatus::Live);
                        state.batches.set(state.batches.get() + 1);
                        debug!(notices = notices.len(), "change batch received");
                        on_change();
                    }
                    FeedMessage::Lagged(skipped) => {
                        warn!(skipped, "change feed lagged; forcing reload");
                        on_warning(SubscriptionError::Lagged(skipped));
                        state.batches.set(state.batches.get() + 1);
                        on_change();
                    }
                    FeedMessage::Disconnected(e) => {
                        state.status.set(ConnectionStatus::Reconnecting);
                        warn!(error = %e, "change feed disconnected; keeping last snapshot");
                        on_warning(e);
                    }
                }
            }
            state.active.set(false);
        });

        *inner.task.borrow_mut() = Some(task);
        SubscriptionHandle { inner }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadTicket {
    /// No reload was running; the caller must start one.
    Start,
    /// Folded into the trailing re-run of the reload in flight.
    Coalesced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadFollowUp {
    /// Requests arrived meanwhile: reload once more, the gate stays held.
    Rerun,
    Idle,
}

/// Single in-flight reload guard.
#[derive(Debug, Default)]
pub struct ReloadGate {
    in_flight: bool,
    pending: bool,
}

impl ReloadGate {
    pub fn request(&mut self) -> ReloadTicket {
        if self.in_flight {
            self.pending = true;
            ReloadTicket::Coalesced
        } else {
            self.in_flight = true;
            ReloadTicket::Start
        }
    }

    pub fn finish(&mut self) -> ReloadFollowUp {
        if std::mem::take(&mut self.pending) {
            ReloadFollowUp::Rerun
        } else {
            self.in_flight = false;
            ReloadFollowUp::Idle
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn reset(&mut self) {
        self.in_flight = false;
        self.pending = false;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use futures::stream;
    use globe_shared::{ChangeKind, ChangeNotice, Table};
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    use super::{
        ChangeFeed, ChangeFeedSubscriber, ChangeStream, ConnectionStatus, FeedMessage,
        ReloadFollowUp, ReloadGate, ReloadTicket,
    };
    use crate::error::SubscriptionError;

    struct ChannelFeed {
        rx: RefCell<Option<mpsc::UnboundedReceiver<FeedMessage>>>,
    }

    impl ChangeFeed for ChannelFeed {
        fn connect(&self) -> ChangeStream {
            match self.rx.borrow_mut().take() {
                Some(rx) => Box::pin(UnboundedReceiverStream::new(rx)),
                None => Box::pin(stream::empty()),
            }
        }
    }

    fn channel_feed() -> (mpsc::UnboundedSender<FeedMessage>, ChannelFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            ChannelFeed {
                rx: RefCell::new(Some(rx)),
            },
        )
    }

    fn notice(seq: u64) -> ChangeNotice {
        ChangeNotice {
            seq,
            table: Table::Locations,
            kind: ChangeKind::Insert,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    async fn drain() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn gate_coalesces_requests_into_one_trailing_run() {
        let mut gate = ReloadGate::default();
        assert_eq!(gate.request(), ReloadTicket::Start);
        assert_eq!(gate.request(), ReloadTicket::Coalesced);
        assert_eq!(gate.request(), ReloadTicket::Coalesced);

        assert_eq!(gate.finish(), ReloadFollowUp::Rerun);
        assert!(gate.is_in_flight());
        assert_eq!(gate.finish(), ReloadFollowUp::Idle);
        assert!(!gate.is_in_flight());
        assert_eq!(gate.request(), ReloadTicket::Start);
    }

    #[tokio::test]
    async fn one_callback_per_batch_and_none_after_stop() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (tx, feed) = channel_feed();
                let changes = Rc::new(Cell::new(0u32));
                let warnings = Rc::new(Cell::new(0u32));

                let handle = ChangeFeedSubscriber::start(
                    &feed,
                    {
                        let changes = Rc::clone(&changes);
                        move || changes.set(changes.get() + 1)
                    },
                    {
                        let warnings = Rc::clone(&warnings);
                        move |_| warnings.set(warnings.get() + 1)
                    },
                );
                assert_eq!(handle.status(), ConnectionStatus::Connecting);

                tx.send(FeedMessage::Connected).expect("send");
                tx.send(FeedMessage::Batch(vec![notice(1), notice(2)]))
                    .expect("send");
                tx.send(FeedMessage::Batch(Vec::new())).expect("send");
                tx.send(FeedMessage::Batch(vec![notice(3)])).expect("send");
                drain().await;

                assert_eq!(changes.get(), 2);
                assert_eq!(handle.status(), ConnectionStatus::Live);
                assert_eq!(handle.batches_received(), 2);

                tx.send(FeedMessage::Disconnected(SubscriptionError::Closed(
                    "eof".to_string(),
                )))
                .expect("send");
                drain().await;
                assert_eq!(warnings.get(), 1);
                assert_eq!(handle.status(), ConnectionStatus::Reconnecting);

                handle.stop();
                handle.stop();
                let _ = tx.send(FeedMessage::Batch(vec![notice(4)]));
                drain().await;
                assert_eq!(changes.get(), 2);
                assert!(!handle.is_active());
            })
            .await;
    }

    #[tokio::test]
    async fn reconnect_counts_as_change() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (tx, feed) = channel_feed();
                let changes = Rc::new(Cell::new(0u32));

                let handle = ChangeFeedSubscriber::start(
                    &feed,
                    {
                        let changes = Rc::clone(&changes);
                        move || changes.set(changes.get() + 1)
                    },
                    |_| {},
                );
                tx.send(FeedMessage::Connected).expect("send");
                drain().await;
                assert_eq!(changes.get(), 0);

                tx.send(FeedMessage::Disconnected(SubscriptionError::Closed(
                    "eof".to_string(),
                )))
                .expect("send");
                tx.send(FeedMessage::Connected).expect("send");
                drain().await;

                assert_eq!(changes.get(), 1);
                assert_eq!(handle.status(), ConnectionStatus::Live);
                assert_eq!(handle.batches_received(), 1);

                tx.send(FeedMessage::Connected).expect("send");
                drain().await;
                assert_eq!(changes.get(), 1);
            })
            .await;
    }

    #[tokio::test]
    async fn lag_counts_as_change_and_warns() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (tx, feed) = channel_feed();
                let changes = Rc::new(Cell::new(0u32));
                let warned = Rc::new(RefCell::new(Vec::new()));

                let _handle = ChangeFeedSubscriber::start(
                    &feed,
                    {
                        let changes = Rc::clone(&changes);
                        move || changes.set(changes.get() + 1)
                    },
                    {
                        let warned = Rc::clone(&warned);
                        move |e| warned.borrow_mut().push(e)
                    },
                );
                tx.send(FeedMessage::Lagged(5)).expect("send");
                drain().await;

                assert_eq!(changes.get(), 1);
                assert_eq!(*warned.borrow(), vec![SubscriptionError::Lagged(5)]);
            })
            .await;
    }
}
