//! The packet value object and the reserved channel id catalogue.

use crate::correlation::CorrelationId;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use stratus_types::Document;

/// Reserved packet channel ids.
///
/// Channel ids above this range are free for collaborator modules;
/// inbound packets on ids nobody listens to are dropped, never an
/// error, so new ids can be introduced without lockstep upgrades.
pub mod channels {
    /// One-time connection authorization.
    pub const AUTHORIZATION: u16 = 1;
    /// Service snapshot publishes and fan-out.
    pub const SERVICE_INFO_PUBLISH: u16 = 2;
    /// Permission store pushes from the authority.
    pub const PERMISSIONS_PUBLISH: u16 = 3;
    /// Cross-process channel messages.
    pub const CHANNEL_MESSAGING: u16 = 4;
    /// Driver-API requests and their responses.
    pub const DRIVER_API: u16 = 5;
    /// Cluster-wide log level control.
    pub const GLOBAL_LOG_LEVEL: u16 = 6;
}

/// An immutable routed message.
///
/// Ownership passes to the transport on send; receivers get a shared
/// reference for the duration of dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    channel_id: u16,
    correlation_id: Option<CorrelationId>,
    header: Document,
    body: Bytes,
}

impl Packet {
    /// Build a packet with a raw body.
    #[must_use]
    pub fn new(channel_id: u16, header: Document, body: impl Into<Bytes>) -> Self {
        Self {
            channel_id,
            correlation_id: None,
            header,
            body: body.into(),
        }
    }

    /// Build a packet whose body is the JSON encoding of `value`.
    pub fn typed<T: Serialize>(
        channel_id: u16,
        header: Document,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(channel_id, header, serde_json::to_vec(value)?))
    }

    /// Attach a correlation id, consuming the packet.
    #[must_use]
    pub fn with_correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Build the response to a query packet: same channel, same id.
    #[must_use]
    pub fn response_to(request: &Packet, header: Document, body: impl Into<Bytes>) -> Self {
        let mut packet = Self::new(request.channel_id, header, body);
        packet.correlation_id = request.correlation_id;
        packet
    }

    /// Build a typed response to a query packet.
    pub fn typed_response_to<T: Serialize>(
        request: &Packet,
        header: Document,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::response_to(request, header, serde_json::to_vec(value)?))
    }

    /// The routing channel id.
    #[must_use]
    pub fn channel_id(&self) -> u16 {
        self.channel_id
    }

    /// The correlation id, when this packet belongs to a query flow.
    #[must_use]
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.correlation_id
    }

    /// The header document.
    #[must_use]
    pub fn header(&self) -> &Document {
        &self.header
    }

    /// The opaque body bytes.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Decode the body as the JSON encoding of `T`.
    pub fn decode_body<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Deconstruct into the wire fields.
    #[must_use]
    pub(crate) fn into_parts(self) -> (u16, Option<CorrelationId>, Document, Bytes) {
        (self.channel_id, self.correlation_id, self.header, self.body)
    }

    /// Rebuild from decoded wire fields.
    #[must_use]
    pub(crate) fn from_parts(
        channel_id: u16,
        correlation_id: Option<CorrelationId>,
        header: Document,
        body: Bytes,
    ) -> Self {
        Self { channel_id, correlation_id, header, body }
    }
}
