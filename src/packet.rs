//! The transport packet envelope.
//!
//! Packets arrive already destined for this node. The scheduler reads the
//! header flags and the partition id to pick a queue; the payload stays
//! opaque until a worker asks the operation handler to deserialize it.
//! Flag bit positions are owned by the transport layer.

/// Header bit marking a packet that carries a serialized operation.
pub const FLAG_OP: u16 = 1 << 0;
/// Header bit marking a response packet.
pub const FLAG_RESPONSE: u16 = 1 << 1;
/// Header bit marking an urgent packet.
pub const FLAG_URGENT: u16 = 1 << 2;

/// A serialized envelope delivered by the transport.
#[derive(Debug, Clone)]
pub struct Packet {
    flags: u16,
    partition_id: i32,
    payload: Vec<u8>,
}

impl Packet {
    /// Creates a packet with the given header flags and payload.
    #[must_use]
    pub fn new(flags: u16, partition_id: i32, payload: Vec<u8>) -> Self {
        Self {
            flags,
            partition_id,
            payload,
        }
    }

    /// True when every bit of `flag` is raised in the header.
    #[must_use]
    pub fn is_flag_raised(&self, flag: u16) -> bool {
        self.flags & flag == flag
    }

    /// True when the response header bit is set.
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.is_flag_raised(FLAG_RESPONSE)
    }

    /// True when the urgent header bit is set.
    #[must_use]
    pub fn is_urgent(&self) -> bool {
        self.is_flag_raised(FLAG_URGENT)
    }

    /// Partition the payload operation belongs to. Negative means generic.
    #[must_use]
    pub fn partition_id(&self) -> i32 {
        self.partition_id
    }

    /// Serialized payload, to be deserialized by a handler.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}
