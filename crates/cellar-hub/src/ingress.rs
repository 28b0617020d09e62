//! Bridges an established transport stream into the hub.

use crate::{Frame, Hub, HubError, ObserverConnection, ObserverId};
use futures_util::{Sink, Stream, StreamExt};
use std::fmt;

/// An inbound message from an observer, reduced to what the hub cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text message. Observers have no commands yet, so it is discarded.
    Text(String),
    /// Binary, ping or pong frames.
    Other,
    /// The observer asked to close the stream.
    Close,
}

/// Why an observer session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The observer sent a close message.
    ClientClosed,
    /// The inbound stream ended without a close message.
    StreamEnded,
    /// Reading from the transport failed.
    ReadFailed(String),
    /// Writing to the transport failed.
    WriteFailed(String),
    /// The hub closed the connection, e.g. after a queue overflow.
    Evicted,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed => f.write_str("client closed"),
            Self::StreamEnded => f.write_str("stream ended"),
            Self::ReadFailed(e) => write!(f, "read failed: {e}"),
            Self::WriteFailed(e) => write!(f, "write failed: {e}"),
            Self::Evicted => f.write_str("evicted by hub"),
        }
    }
}

/// Runs one observer session to completion.
///
/// Registers a fresh [`ObserverConnection`] with the hub, drains its queue
/// into `writer` on a separate task while reading `reader` on this one, and
/// unregisters exactly once when either side stops.
///
/// # Errors
///
/// Returns [`HubError::Unavailable`] if the hub refused the registration;
/// nothing has been read or written in that case.
pub async fn serve_observer<W, R, E>(
    hub: &Hub,
    writer: W,
    reader: R,
) -> Result<DisconnectReason, HubError>
where
    W: Sink<Frame> + Send + 'static,
    W::Error: fmt::Display,
    R: Stream<Item = Result<Inbound, E>>,
    E: fmt::Display,
{
    let (connection, outbound) =
        ObserverConnection::new(hub.settings().observer_queue_capacity);
    let observer_id = connection.id();

    hub.register(connection.clone())?;

    let mut writer_task = tokio::spawn(outbound.drain(writer));
    let mut writer_done = false;

    let reason = tokio::select! {
        reason = read_inbound(reader, observer_id) => reason,
        joined = &mut writer_task => {
            writer_done = true;
            match joined {
                Ok(Ok(())) => DisconnectReason::Evicted,
                Ok(Err(e)) => DisconnectReason::WriteFailed(e.to_string()),
                Err(e) => DisconnectReason::WriteFailed(e.to_string()),
            }
        }
        () = connection.closed() => DisconnectReason::Evicted,
    };

    hub.unregister(&connection);

    // The writer may be parked on a transport write that will never finish;
    // it owns nothing but this observer's sink.
    if !writer_done {
        writer_task.abort();
        let _ = writer_task.await;
    }

    tracing::info!(observer_id = %observer_id, %reason, "observer disconnected");
    Ok(reason)
}

async fn read_inbound<R, E>(reader: R, observer_id: ObserverId) -> DisconnectReason
where
    R: Stream<Item = Result<Inbound, E>>,
    E: fmt::Display,
{
    let mut reader = std::pin::pin!(reader);

    while let Some(message) = reader.next().await {
        match message {
            Ok(Inbound::Close) => return DisconnectReason::ClientClosed,
            Ok(Inbound::Text(text)) => {
                tracing::trace!(
                    observer_id = %observer_id,
                    len = text.len(),
                    "ignoring inbound text message"
                );
            }
            Ok(Inbound::Other) => {}
            Err(e) => return DisconnectReason::ReadFailed(e.to_string()),
        }
    }

    DisconnectReason::StreamEnded
}
