//! Types related to emitting metrics to collectors

use std::time::{SystemTime, UNIX_EPOCH};

mod channel_connection;
mod opentelemetry_downstream;

pub use channel_connection::{ChannelType, Connection, ConnectionFactory, GrpcConnectionFactory};
pub use opentelemetry_downstream::{OpenTelemetryDownstream, OpentelemetryBatcher};

pub(crate) use channel_connection::parse_endpoint;

/// A provider of unix epoch nanos
pub trait EpochTime {
    /// return nanos since the unix epoch
    fn nanos_since_epoch(&self) -> u64;
}

impl EpochTime for SystemTime {
    fn nanos_since_epoch(&self) -> u64 {
        // A clock before 1970 is not worth failing an export over.
        self.duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64
    }
}
