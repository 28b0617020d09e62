//! Real-time fan-out of catalogue changes to connected observers.
//!
//! The crate has three parts:
//!
//! - [`ObserverConnection`] / [`Outbound`]: one observer's bounded outbound
//!   queue and its `Active -> Closing -> Closed` lifecycle.
//! - [`Hub`]: a single coordination task that owns the registry of active
//!   observers and fans each event out to all of them. Callers reach it only
//!   through message passing, and never wait on any observer.
//! - [`serve_observer`]: the ingress adapter that turns an accepted
//!   transport (any frame `Sink` plus inbound `Stream`) into a registered
//!   observer and tears it down again.
//!
//! # Backpressure
//!
//! An observer whose queue is full when an event arrives is disconnected.
//! Other observers are unaffected, and the caller of [`Hub::broadcast`]
//! never finds out.
//!
//! ```rust,ignore
//! let hub = Hub::spawn(HubSettings::default());
//! hub.broadcast(&WineEvent::deleted(7))?;
//! ```

mod connection;
mod error;
mod hub;
mod ingress;

pub use connection::{ConnectionState, Frame, ObserverConnection, ObserverId, Outbound};
pub use error::HubError;
pub use hub::{Hub, HubSettings, DEFAULT_OBSERVER_QUEUE_CAPACITY};
pub use ingress::{serve_observer, DisconnectReason, Inbound};
