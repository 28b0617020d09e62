//! Shared record and event types for the Cellar service.
//!
//! Every other crate in the workspace speaks in terms of these types: the
//! storage layer persists [`Wine`] records, the request handlers accept
//! [`WineDraft`] bodies, and the hub fans out [`WineEvent`] values to
//! connected observers.
//!
//! # Wire format
//!
//! A [`WineEvent`] serializes to exactly one JSON object with two fields:
//!
//! | Kind | `type` | `payload` |
//! |------|--------|-----------|
//! | [`EventKind::Created`] | `WINE_ADDED` | the full [`Wine`] |
//! | [`EventKind::Updated`] | `WINE_UPDATED` | the full [`Wine`] |
//! | [`EventKind::Deleted`] | `WINE_DELETED` | `{"id": <id>}` |

use serde::{Deserialize, Serialize};

/// Store-assigned identifier of a wine record.
pub type WineId = i64;

/// A persisted wine record.
///
/// Field names on the wire are camelCase to stay compatible with existing
/// mobile clients. An empty `origin` is omitted from the JSON output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wine {
    /// Identifier assigned by the store on creation.
    pub id: WineId,
    /// Display name.
    pub name: String,
    /// Retail price.
    pub price: f64,
    /// Production date as entered by the client (free-form, usually ISO 8601).
    pub production_date: String,
    /// Region or country of origin.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub origin: String,
    /// Alcohol by volume, in percent.
    pub alcohol_degree: f64,
}

/// The mutable fields of a wine, as sent by clients on create and update.
///
/// Any `id` present in a request body is ignored: the store assigns ids on
/// create and the request path names the record on update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WineDraft {
    pub name: String,
    pub price: f64,
    pub production_date: String,
    #[serde(default)]
    pub origin: String,
    pub alcohol_degree: f64,
}

impl Wine {
    /// Builds a record from a draft and the id it is stored under.
    pub fn from_draft(id: WineId, draft: WineDraft) -> Self {
        Self {
            id,
            name: draft.name,
            price: draft.price,
            production_date: draft.production_date,
            origin: draft.origin,
            alcohol_degree: draft.alcohol_degree,
        }
    }
}

/// Payload of a deletion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedWine {
    pub id: WineId,
}

/// The kind of state change an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

impl EventKind {
    /// Returns the `type` tag used for this kind on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "WINE_ADDED",
            Self::Updated => "WINE_UPDATED",
            Self::Deleted => "WINE_DELETED",
        }
    }
}

/// An immutable description of one completed mutation.
///
/// Each variant carries the payload type its kind requires, so a deletion
/// can never be constructed with a full record and vice versa.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum WineEvent {
    #[serde(rename = "WINE_ADDED")]
    Created(Wine),
    #[serde(rename = "WINE_UPDATED")]
    Updated(Wine),
    #[serde(rename = "WINE_DELETED")]
    Deleted(DeletedWine),
}

impl WineEvent {
    pub fn created(wine: Wine) -> Self {
        Self::Created(wine)
    }

    pub fn updated(wine: Wine) -> Self {
        Self::Updated(wine)
    }

    pub fn deleted(id: WineId) -> Self {
        Self::Deleted(DeletedWine { id })
    }

    /// Returns the kind of change this event describes.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Created(_) => EventKind::Created,
            Self::Updated(_) => EventKind::Updated,
            Self::Deleted(_) => EventKind::Deleted,
        }
    }

    /// Returns the id of the record the event refers to.
    pub fn wine_id(&self) -> WineId {
        match self {
            Self::Created(wine) | Self::Updated(wine) => wine.id,
            Self::Deleted(deleted) => deleted.id,
        }
    }
}
