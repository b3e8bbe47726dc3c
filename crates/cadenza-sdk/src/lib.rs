//! Cadenza SDK - value model shared by the compiler, the runtime, and
//! generated code
//!
//! Everything a host needs to read or construct language values lives here:
//! the NaN-boxed [`Slot`] and the [`TypeFlags`] bitset the compiler uses to
//! track which types a value may take.

#![warn(missing_docs)]

mod error;
mod slot;

pub use error::SlotError;
pub use slot::{
    Slot, TypeFlags, BOOLEAN_TAG, CHAR_TAG, INT32_TAG, NIL_TAG, OBJECT_TAG, PAYLOAD_MASK,
    RAW_POINTER_TAG, SLOT_SIZE, STACK_SLOT_SIZE, SYMBOL_TAG,
};
