//! The hub: a single coordination task that owns the observer registry.
//!
//! Every registry mutation and every fan-out goes through one unbounded
//! command channel, so the registry has exactly one owner and no lock.
//! Callers never wait on the loop except for [`Hub::observer_count`].

use crate::{Frame, HubError, ObserverConnection, ObserverId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Default outbound queue capacity per observer.
pub const DEFAULT_OBSERVER_QUEUE_CAPACITY: usize = 256;

/// Tunables for the hub and the connections it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubSettings {
    /// Frames an observer may have queued before it is disconnected.
    pub observer_queue_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            observer_queue_capacity: DEFAULT_OBSERVER_QUEUE_CAPACITY,
        }
    }
}

enum Command {
    Register(Arc<ObserverConnection>),
    Unregister(Arc<ObserverConnection>),
    Broadcast(Frame),
    Count(oneshot::Sender<usize>),
}

/// Handle to the coordination loop. Cheap to clone; the loop stops once
/// every handle has been dropped.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::UnboundedSender<Command>,
    settings: HubSettings,
}

impl Hub {
    /// Starts the coordination loop on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn(settings: HubSettings) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx));
        tracing::info!(
            observer_queue_capacity = settings.observer_queue_capacity,
            "hub coordination loop started"
        );
        Self { commands, settings }
    }

    pub fn settings(&self) -> HubSettings {
        self.settings
    }

    /// Adds a connection to the registry.
    ///
    /// Any broadcast submitted after this returns is delivered to the
    /// connection (while it stays active).
    pub fn register(&self, connection: Arc<ObserverConnection>) -> Result<(), HubError> {
        self.commands
            .send(Command::Register(connection))
            .map_err(|_| HubError::Unavailable)
    }

    /// Removes a connection from the registry and closes it.
    ///
    /// Idempotent, and never waits for the connection's writer. If the loop
    /// has already stopped the connection is closed directly.
    pub fn unregister(&self, connection: &Arc<ObserverConnection>) {
        if self
            .commands
            .send(Command::Unregister(connection.clone()))
            .is_err()
        {
            connection.close();
        }
    }

    /// Serializes `event` once and queues it for every registered observer.
    ///
    /// Returns as soon as the frame is handed to the loop. A serialization
    /// failure drops this one event and is reported here; slow or broken
    /// observers are handled by the loop and never surface to the caller.
    pub fn broadcast<E>(&self, event: &E) -> Result<(), HubError>
    where
        E: Serialize + ?Sized,
    {
        let frame: Frame = serde_json::to_string(event)?.into();
        self.commands
            .send(Command::Broadcast(frame))
            .map_err(|_| HubError::Unavailable)
    }

    /// Number of active observers in the registry, as seen by the loop after
    /// every command submitted before this call. An observer whose transport
    /// already failed is not counted, even before it is unregistered.
    pub async fn observer_count(&self) -> Result<usize, HubError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Count(tx))
            .map_err(|_| HubError::Unavailable)?;
        rx.await.map_err(|_| HubError::Unavailable)
    }
}

async fn run(mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut registry: HashMap<ObserverId, Arc<ObserverConnection>> = HashMap::new();

    while let Some(command) = commands.recv().await {
        match command {
            Command::Register(connection) => {
                if !connection.is_active() {
                    tracing::debug!(
                        observer_id = %connection.id(),
                        "ignoring registration of inactive observer"
                    );
                    continue;
                }
                registry.insert(connection.id(), connection.clone());
                tracing::info!(
                    observer_id = %connection.id(),
                    observers = registry.len(),
                    "observer registered"
                );
            }
            Command::Unregister(connection) => {
                let removed = registry.remove(&connection.id()).is_some();
                connection.close();
                if removed {
                    tracing::info!(
                        observer_id = %connection.id(),
                        observers = registry.len(),
                        "observer unregistered"
                    );
                }
            }
            Command::Broadcast(frame) => fan_out(&mut registry, frame),
            Command::Count(reply) => {
                let active = registry.values().filter(|c| c.is_active()).count();
                let _ = reply.send(active);
            }
        }
    }

    for connection in registry.values() {
        connection.close();
    }
    tracing::debug!(
        observers = registry.len(),
        "hub coordination loop stopped"
    );
}

fn fan_out(registry: &mut HashMap<ObserverId, Arc<ObserverConnection>>, frame: Frame) {
    if registry.is_empty() {
        tracing::trace!("no observers registered, event dropped");
        return;
    }

    registry.retain(|id, connection| match connection.enqueue(frame.clone()) {
        Ok(()) => true,
        Err(HubError::QueueOverflow) => {
            tracing::warn!(observer_id = %id, "observer queue full, disconnecting slow consumer");
            connection.close();
            false
        }
        Err(e) => {
            tracing::debug!(observer_id = %id, error = %e, "dropping inactive observer");
            connection.close();
            false
        }
    });

    tracing::trace!(observers = registry.len(), "event fanned out");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConnectionState;
    use serde::ser::Error as _;
    use serde::Serializer;

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("refusing to serialize"))
        }
    }

    #[tokio::test]
    async fn register_and_unregister_update_count() {
        let hub = Hub::spawn(HubSettings::default());
        let (connection, _outbound) = ObserverConnection::new(4);

        hub.register(connection.clone()).unwrap();
        assert_eq!(hub.observer_count().await.unwrap(), 1);

        hub.unregister(&connection);
        assert_eq!(hub.observer_count().await.unwrap(), 0);
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn serialization_failure_is_reported_and_hub_survives() {
        let hub = Hub::spawn(HubSettings::default());
        let (connection, mut outbound) = ObserverConnection::new(4);
        hub.register(connection.clone()).unwrap();

        let err = hub.broadcast(&Unserializable).unwrap_err();
        assert!(matches!(err, HubError::Serialization(_)));

        hub.broadcast("still alive").unwrap();
        assert_eq!(outbound.recv().await.as_deref(), Some("\"still alive\""));
        assert!(connection.is_active());
    }

    #[tokio::test]
    async fn broadcast_without_observers_is_dropped() {
        let hub = Hub::spawn(HubSettings::default());
        hub.broadcast(&serde_json::json!({"type": "WINE_DELETED"}))
            .expect("no observers is not an error");

        // A later observer does not see the earlier event.
        let (connection, mut outbound) = ObserverConnection::new(4);
        hub.register(connection.clone()).unwrap();
        hub.broadcast("after").unwrap();
        assert_eq!(outbound.recv().await.as_deref(), Some("\"after\""));
    }

    #[tokio::test]
    async fn inactive_connection_is_not_registered() {
        let hub = Hub::spawn(HubSettings::default());
        let (connection, _outbound) = ObserverConnection::new(4);
        connection.close();

        hub.register(connection).unwrap();
        assert_eq!(hub.observer_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn closing_observer_is_pruned_on_next_broadcast() {
        let hub = Hub::spawn(HubSettings::default());
        let (connection, _outbound) = ObserverConnection::new(4);
        hub.register(connection.clone()).unwrap();

        // A writer failure marks the connection closing before the adapter
        // gets around to unregistering it.
        connection.mark_closing();
        hub.broadcast("x").unwrap();

        assert_eq!(hub.observer_count().await.unwrap(), 0);
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn dropping_every_handle_closes_remaining_observers() {
        let hub = Hub::spawn(HubSettings::default());
        let (connection, _outbound) = ObserverConnection::new(4);
        hub.register(connection.clone()).unwrap();
        assert_eq!(hub.observer_count().await.unwrap(), 1);

        drop(hub);
        tokio::time::timeout(std::time::Duration::from_secs(1), connection.closed())
            .await
            .expect("loop shutdown closes observers");
    }

    #[tokio::test]
    async fn settings_are_exposed_to_adapters() {
        let hub = Hub::spawn(HubSettings {
            observer_queue_capacity: 3,
        });
        assert_eq!(hub.settings().observer_queue_capacity, 3);
    }

    #[tokio::test]
    async fn count_skips_observers_that_are_closing() {
        let hub = Hub::spawn(HubSettings::default());
        let (failing, _failing_out) = ObserverConnection::new(4);
        let (healthy, _healthy_out) = ObserverConnection::new(4);
        hub.register(failing.clone()).unwrap();
        hub.register(healthy.clone()).unwrap();
        assert_eq!(hub.observer_count().await.unwrap(), 2);

        // As after a transport write error, before the adapter unregisters.
        assert!(failing.mark_closing());
        assert_eq!(hub.observer_count().await.unwrap(), 1);

        hub.unregister(&failing);
        assert_eq!(hub.observer_count().await.unwrap(), 1);
        assert!(healthy.is_active());
    }
}
