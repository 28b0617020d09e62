//! Observer connections and their outbound queues.

use crate::HubError;
use futures_util::{stream, Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// A serialized event, shared by every observer it is delivered to.
pub type Frame = Arc<str>;

/// Identity of an observer connection, unique for its lifetime.
pub type ObserverId = Uuid;

/// Lifecycle of an observer connection.
///
/// Transitions only move forward: `Active -> Closing -> Closed`, or
/// `Active -> Closed` directly when the hub unregisters a healthy observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Active,
    Closing,
    Closed,
}

/// The producer side of one observer: its identity, the sending half of its
/// bounded outbound queue, and its lifecycle state.
///
/// The hub only ever calls [`enqueue`](Self::enqueue) and
/// [`close`](Self::close); the matching [`Outbound`] is owned by the task
/// that writes to the observer's transport.
#[derive(Debug)]
pub struct ObserverConnection {
    id: ObserverId,
    queue: mpsc::Sender<Frame>,
    state: watch::Sender<ConnectionState>,
}

impl ObserverConnection {
    /// Creates a connection with an outbound queue holding at most
    /// `capacity` frames (a capacity of zero is raised to one).
    pub fn new(capacity: usize) -> (Arc<Self>, Outbound) {
        let (queue_tx, queue_rx) = mpsc::channel(capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Active);

        let connection = Arc::new(Self {
            id: Uuid::new_v4(),
            queue: queue_tx,
            state: state_tx,
        });

        let outbound = Outbound {
            connection: connection.clone(),
            queue: queue_rx,
            state: state_rx,
        };

        (connection, outbound)
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Appends a frame to the outbound queue without waiting.
    ///
    /// A full queue moves the connection to `Closing` and returns
    /// [`HubError::QueueOverflow`]; the caller is expected to unregister it.
    pub fn enqueue(&self, frame: Frame) -> Result<(), HubError> {
        if !self.is_active() {
            return Err(HubError::Closed);
        }

        match self.queue.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.mark_closing();
                Err(HubError::QueueOverflow)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.mark_closing();
                Err(HubError::Closed)
            }
        }
    }

    /// Moves an active connection to `Closing`. Returns `false` if it had
    /// already left `Active`.
    pub(crate) fn mark_closing(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Active {
                *state = ConnectionState::Closing;
                true
            } else {
                false
            }
        })
    }

    /// Moves the connection to `Closed`, waking its writer so the outbound
    /// queue is dropped.
    ///
    /// Idempotent: returns `true` only for the single call that performed the
    /// transition, however many callers race on it.
    pub fn close(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closed {
                false
            } else {
                *state = ConnectionState::Closed;
                true
            }
        })
    }

    /// Resolves once the connection has left `Active`.
    pub async fn closing(&self) {
        let mut state = self.state.subscribe();
        wait_until_inactive(&mut state).await;
    }

    /// Resolves once the connection is `Closed`.
    pub async fn closed(&self) {
        let mut state = self.state.subscribe();
        wait_until(&mut state, |state| state == ConnectionState::Closed).await;
    }
}

async fn wait_until_inactive(state: &mut watch::Receiver<ConnectionState>) {
    wait_until(state, |state| state != ConnectionState::Active).await;
}

async fn wait_until(
    state: &mut watch::Receiver<ConnectionState>,
    done: impl Fn(ConnectionState) -> bool,
) {
    loop {
        if done(*state.borrow_and_update()) {
            return;
        }
        // The sender lives as long as the connection; once it is gone
        // nothing can change the state any more.
        if state.changed().await.is_err() {
            return;
        }
    }
}

/// The consumer side of one observer's outbound queue.
///
/// Single-consumer: exactly one writer drains it, in submission order.
#[derive(Debug)]
pub struct Outbound {
    connection: Arc<ObserverConnection>,
    queue: mpsc::Receiver<Frame>,
    state: watch::Receiver<ConnectionState>,
}

impl Outbound {
    pub fn connection(&self) -> &Arc<ObserverConnection> {
        &self.connection
    }

    /// Waits for the next queued frame.
    ///
    /// Returns `None` once the connection has left `Active`; frames still
    /// queued at that point are discarded.
    pub async fn recv(&mut self) -> Option<Frame> {
        if !self.connection.is_active() {
            return None;
        }

        tokio::select! {
            biased;
            () = wait_until_inactive(&mut self.state) => None,
            frame = self.queue.recv() => frame,
        }
    }

    /// Turns the queue into a lazy stream of frames that ends when the
    /// connection closes.
    pub fn into_stream(self) -> impl Stream<Item = Frame> + Send {
        stream::unfold(self, |mut outbound| async move {
            let frame = outbound.recv().await?;
            Some((frame, outbound))
        })
    }

    /// Writes every queued frame to `sink` until the connection closes.
    ///
    /// A write failure moves the connection to `Closing` and is returned as
    /// [`HubError::TransportWrite`]. The queue is released when this returns.
    pub async fn drain<S>(self, sink: S) -> Result<(), HubError>
    where
        S: Sink<Frame>,
        S::Error: std::fmt::Display,
    {
        let connection = self.connection.clone();
        let frames = self.into_stream();
        let mut frames = std::pin::pin!(frames);
        let mut sink = std::pin::pin!(sink);

        while let Some(frame) = frames.next().await {
            if let Err(e) = sink.send(frame).await {
                connection.mark_closing();
                tracing::debug!(
                    observer_id = %connection.id(),
                    error = %e,
                    "observer transport write failed"
                );
                return Err(HubError::TransportWrite(e.to_string()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::sink;

    fn frame(text: &str) -> Frame {
        Frame::from(text)
    }

    #[tokio::test]
    async fn enqueue_preserves_fifo_order() {
        let (connection, mut outbound) = ObserverConnection::new(8);
        for text in ["a", "b", "c"] {
            connection.enqueue(frame(text)).expect("queue has room");
        }

        assert_eq!(outbound.recv().await.as_deref(), Some("a"));
        assert_eq!(outbound.recv().await.as_deref(), Some("b"));
        assert_eq!(outbound.recv().await.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn overflow_marks_connection_closing_without_blocking() {
        let (connection, _outbound) = ObserverConnection::new(2);
        connection.enqueue(frame("1")).unwrap();
        connection.enqueue(frame("2")).unwrap();

        let err = connection.enqueue(frame("3")).unwrap_err();
        assert!(matches!(err, HubError::QueueOverflow));
        assert_eq!(connection.state(), ConnectionState::Closing);

        // Further enqueues are refused rather than retried.
        assert!(matches!(
            connection.enqueue(frame("4")),
            Err(HubError::Closed)
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (connection, _outbound) = ObserverConnection::new(1);
        assert!(connection.close());
        assert!(!connection.close());
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(!connection.mark_closing(), "closed never goes back");
    }

    #[tokio::test]
    async fn concurrent_close_releases_exactly_once() {
        let (connection, _outbound) = ObserverConnection::new(1);
        let mut handles = Vec::new();
        for _ in 0..32 {
            let connection = connection.clone();
            handles.push(tokio::spawn(async move { connection.close() }));
        }

        let mut released = 0;
        for handle in handles {
            if handle.await.unwrap() {
                released += 1;
            }
        }
        assert_eq!(released, 1);
    }

    #[tokio::test]
    async fn close_discards_pending_frames_and_ends_stream() {
        let (connection, outbound) = ObserverConnection::new(4);
        connection.enqueue(frame("pending")).unwrap();
        connection.close();

        let frames: Vec<Frame> = outbound.into_stream().collect().await;
        assert!(frames.is_empty());
    }

    #[tokio::test]
    async fn closed_resolves_after_overflow() {
        let (connection, _outbound) = ObserverConnection::new(1);
        connection.enqueue(frame("1")).unwrap();
        let _ = connection.enqueue(frame("2"));

        tokio::time::timeout(std::time::Duration::from_secs(1), connection.closing())
            .await
            .expect("closing() should resolve once the connection overflows");
        assert_eq!(connection.state(), ConnectionState::Closing);
    }

    #[tokio::test]
    async fn drain_writes_frames_in_order_until_closed() {
        let (connection, outbound) = ObserverConnection::new(8);
        let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
        let writer = sink::unfold(tx, |tx, frame: Frame| async move {
            tx.send(frame).map(|()| tx)
        });

        let task = tokio::spawn(outbound.drain(writer));
        connection.enqueue(frame("first")).unwrap();
        connection.enqueue(frame("second")).unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("first"));
        assert_eq!(rx.recv().await.as_deref(), Some("second"));

        connection.close();
        task.await.unwrap().expect("drain ends cleanly on close");
    }

    #[tokio::test]
    async fn write_failure_marks_connection_closing() {
        let (connection, outbound) = ObserverConnection::new(8);
        let broken = sink::unfold((), |(), _frame: Frame| async move {
            Err::<(), _>(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "peer went away",
            ))
        });

        connection.enqueue(frame("doomed")).unwrap();
        let err = outbound.drain(broken).await.unwrap_err();

        assert!(matches!(err, HubError::TransportWrite(ref msg) if msg.contains("peer went away")));
        assert_eq!(connection.state(), ConnectionState::Closing);
    }
}
