//! Addressed, ported message exchanged between endpoints.

/// Address used on point-to-point links, where nobody needs to be addressed.
pub const LINK_LOCAL_ADDRESS: u8 = 0;

/// Highest node address usable on a multi-drop bus.
pub const MAX_ADDRESS: u8 = 254;

/// One decoded packet.
///
/// Built by the application for sending, or by a frame parser once a frame
/// validated. Never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Packet {
    source_address: u8,
    destination_address: u8,
    source_port: u8,
    destination_port: u8,
    payload: Vec<u8>,
}

impl Packet {
    /// Create a packet.
    ///
    /// No wire-format constraints are checked here; the framing that sends it
    /// does that.
    pub fn new(
        source_address: u8,
        destination_address: u8,
        source_port: u8,
        destination_port: u8,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            source_address,
            destination_address,
            source_port,
            destination_port,
            payload: payload.into(),
        }
    }

    /// Create a packet for a point-to-point link (addresses fixed to 0).
    pub fn link_local(source_port: u8, destination_port: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(
            LINK_LOCAL_ADDRESS,
            LINK_LOCAL_ADDRESS,
            source_port,
            destination_port,
            payload,
        )
    }

    /// Address of the sender.
    pub fn source_address(&self) -> u8 {
        self.source_address
    }

    /// Address of the receiver.
    pub fn destination_address(&self) -> u8 {
        self.destination_address
    }

    /// Port on the sender.
    pub fn source_port(&self) -> u8 {
        self.source_port
    }

    /// Port on the receiver.
    pub fn destination_port(&self) -> u8 {
        self.destination_port
    }

    /// Application data.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the packet, returning its data.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}
