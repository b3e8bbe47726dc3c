//! Error types for slot construction

/// Errors raised while building a [`Slot`](crate::Slot) from raw parts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotError {
    /// Address does not fit in the 48-bit payload
    #[error("address {0:#x} does not fit in a 48-bit slot payload")]
    AddressOutOfRange(u64),

    /// Symbol hash does not fit in the 48-bit payload
    #[error("symbol hash {0:#x} does not fit in a 48-bit slot payload")]
    HashOutOfRange(u64),
}
