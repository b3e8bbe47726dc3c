//! Slot: the NaN-boxed u64 value representation
//!
//! Every dynamic value in the language fits in one 64-bit slot. Generated
//! code, the heap, and the compiler all agree on this encoding, so the tag
//! constants below are part of the machine-code contract and must not change.
//!
//! # Encoding
//!
//! ```text
//! f64 (float): any bit pattern below 0xFFF8_0000_0000_0000 (raw IEEE 754)
//! Tagged:      high 16 bits select the type, low 48 bits are the payload
//!   - nil:          0xFFF8_0000_0000_0000
//!   - int32:        0xFFF9_0000_xxxx_xxxx  (low 32 bits)
//!   - boolean:      0xFFFA_0000_0000_000b  (low bit)
//!   - heap object:  0xFFFB_pppp_pppp_pppp  (48-bit address)
//!   - symbol:       0xFFFC_hhhh_hhhh_hhhh  (48-bit hash)
//!   - char:         0xFFFD_0000_0000_00cc  (low 8 bits)
//!   - raw pointer:  0xFFFE_pppp_pppp_pppp  (48-bit address)
//! ```

use serde::{Deserialize, Serialize};

use crate::error::SlotError;

/// Size in bytes of a slot in memory.
pub const SLOT_SIZE: usize = 8;

/// Size in bytes of one call-stack slot (value word plus type word).
pub const STACK_SLOT_SIZE: usize = 16;

/// Mask that strips the type tag, leaving the 48-bit payload.
pub const PAYLOAD_MASK: u64 = !0xffff_0000_0000_0000;

const TAG_MASK: u64 = 0xffff_0000_0000_0000;

/// Tag of the nil value.
pub const NIL_TAG: u64 = 0xfff8_0000_0000_0000;
/// Tag of 32-bit integers.
pub const INT32_TAG: u64 = 0xfff9_0000_0000_0000;
/// Tag of booleans.
pub const BOOLEAN_TAG: u64 = 0xfffa_0000_0000_0000;
/// Tag of pointers to heap objects.
pub const OBJECT_TAG: u64 = 0xfffb_0000_0000_0000;
/// Tag of symbols.
pub const SYMBOL_TAG: u64 = 0xfffc_0000_0000_0000;
/// Tag of characters.
pub const CHAR_TAG: u64 = 0xfffd_0000_0000_0000;
/// Tag of raw (untagged-memory) pointers.
pub const RAW_POINTER_TAG: u64 = 0xfffe_0000_0000_0000;

const NIL_BITS: u64 = NIL_TAG;
const TRUE_BITS: u64 = BOOLEAN_TAG | 1;
const FALSE_BITS: u64 = BOOLEAN_TAG;

// Canonical quiet NaN; keeps NaN floats out of the tagged range.
const CANONICAL_NAN: u64 = 0x7ff8_0000_0000_0000;

// ============================================================================
// TypeFlags
// ============================================================================

/// Bitset of the dynamic types a value may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TypeFlags(u8);

impl TypeFlags {
    /// No type; the value is never observed.
    pub const NONE: TypeFlags = TypeFlags(0x00);
    /// nil
    pub const NIL: TypeFlags = TypeFlags(0x01);
    /// 32-bit integer
    pub const INTEGER: TypeFlags = TypeFlags(0x02);
    /// Double-precision float
    pub const FLOAT: TypeFlags = TypeFlags(0x04);
    /// Boolean
    pub const BOOLEAN: TypeFlags = TypeFlags(0x08);
    /// Character
    pub const CHAR: TypeFlags = TypeFlags(0x10);
    /// Symbol
    pub const SYMBOL: TypeFlags = TypeFlags(0x20);
    /// Heap object
    pub const OBJECT: TypeFlags = TypeFlags(0x40);
    /// Raw pointer
    pub const RAW_POINTER: TypeFlags = TypeFlags(0x80);
    /// Any language-visible type.
    pub const ALL: TypeFlags = TypeFlags(0x7f);

    /// Raw bit representation.
    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True if every flag in `other` is also set in `self`.
    #[inline]
    pub const fn contains(self, other: TypeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if no flag is set.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for TypeFlags {
    type Output = TypeFlags;

    fn bitor(self, rhs: TypeFlags) -> TypeFlags {
        TypeFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for TypeFlags {
    fn bitor_assign(&mut self, rhs: TypeFlags) {
        self.0 |= rhs.0;
    }
}

impl std::ops::BitAnd for TypeFlags {
    type Output = TypeFlags;

    fn bitand(self, rhs: TypeFlags) -> TypeFlags {
        TypeFlags(self.0 & rhs.0)
    }
}

impl std::fmt::Display for TypeFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if *self == TypeFlags::ALL {
            return write!(f, "*");
        }
        const NAMES: [(TypeFlags, &str); 8] = [
            (TypeFlags::NIL, "nil"),
            (TypeFlags::INTEGER, "int"),
            (TypeFlags::FLOAT, "float"),
            (TypeFlags::BOOLEAN, "bool"),
            (TypeFlags::CHAR, "char"),
            (TypeFlags::SYMBOL, "symbol"),
            (TypeFlags::OBJECT, "object"),
            (TypeFlags::RAW_POINTER, "raw"),
        ];
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        if first {
            write!(f, "none")?;
        }
        Ok(())
    }
}

// ============================================================================
// Slot
// ============================================================================

/// NaN-boxed 64-bit dynamic value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Slot(u64);

impl Slot {
    /// The nil value.
    pub const NIL: Slot = Slot(NIL_BITS);
    /// The boolean `true`.
    pub const TRUE: Slot = Slot(TRUE_BITS);
    /// The boolean `false`.
    pub const FALSE: Slot = Slot(FALSE_BITS);

    // ========================================================================
    // Raw conversion
    // ========================================================================

    /// Create from raw u64 bits.
    #[inline(always)]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw u64 bits, exactly as stored in memory and registers.
    #[inline(always)]
    pub const fn as_bits(self) -> u64 {
        self.0
    }

    // ========================================================================
    // Constructors
    // ========================================================================

    /// Create the nil value.
    #[inline]
    pub const fn make_nil() -> Self {
        Self::NIL
    }

    /// Create a 32-bit integer.
    #[inline]
    pub const fn make_int32(i: i32) -> Self {
        Self(INT32_TAG | (i as u32 as u64))
    }

    /// Create a float. NaN inputs are canonicalized so they cannot alias a tag.
    #[inline]
    pub fn make_float(f: f64) -> Self {
        if f.is_nan() {
            Self(CANONICAL_NAN)
        } else {
            Self(f.to_bits())
        }
    }

    /// Create a boolean.
    #[inline]
    pub const fn make_bool(b: bool) -> Self {
        Self(if b { TRUE_BITS } else { FALSE_BITS })
    }

    /// Create a heap object reference from a 48-bit address.
    pub fn make_pointer(address: u64) -> Result<Self, SlotError> {
        if address & TAG_MASK != 0 {
            return Err(SlotError::AddressOutOfRange(address));
        }
        Ok(Self(OBJECT_TAG | address))
    }

    /// Create a symbol from its 48-bit hash.
    pub fn make_symbol(hash: u64) -> Result<Self, SlotError> {
        if hash & TAG_MASK != 0 {
            return Err(SlotError::HashOutOfRange(hash));
        }
        Ok(Self(SYMBOL_TAG | hash))
    }

    /// Create a character.
    #[inline]
    pub const fn make_char(c: u8) -> Self {
        Self(CHAR_TAG | c as u64)
    }

    /// Create a raw pointer from a 48-bit address.
    pub fn make_raw_pointer(address: u64) -> Result<Self, SlotError> {
        if address & TAG_MASK != 0 {
            return Err(SlotError::AddressOutOfRange(address));
        }
        Ok(Self(RAW_POINTER_TAG | address))
    }

    // ========================================================================
    // Type checks
    // ========================================================================

    #[inline]
    const fn tag(self) -> u64 {
        self.0 & TAG_MASK
    }

    /// Check if value is nil
    #[inline]
    pub const fn is_nil(self) -> bool {
        self.0 == NIL_BITS
    }

    /// Check if value is a 32-bit integer
    #[inline]
    pub const fn is_int32(self) -> bool {
        self.tag() == INT32_TAG
    }

    /// Check if value is a float (raw IEEE 754, not NaN-boxed)
    #[inline]
    pub const fn is_float(self) -> bool {
        self.0 < NIL_TAG
    }

    /// Check if value is a boolean
    #[inline]
    pub const fn is_bool(self) -> bool {
        self.tag() == BOOLEAN_TAG
    }

    /// Check if value references a heap object
    #[inline]
    pub const fn is_pointer(self) -> bool {
        self.tag() == OBJECT_TAG
    }

    /// Check if value is a symbol
    #[inline]
    pub const fn is_symbol(self) -> bool {
        self.tag() == SYMBOL_TAG
    }

    /// Check if value is a character
    #[inline]
    pub const fn is_char(self) -> bool {
        self.tag() == CHAR_TAG
    }

    /// Check if value is a raw pointer
    #[inline]
    pub const fn is_raw_pointer(self) -> bool {
        self.tag() == RAW_POINTER_TAG
    }

    // ========================================================================
    // Extractors
    // ========================================================================

    /// Extract the integer value
    #[inline]
    pub const fn get_int32(self) -> Option<i32> {
        if self.is_int32() {
            Some(self.0 as u32 as i32)
        } else {
            None
        }
    }

    /// Extract the float value
    #[inline]
    pub fn get_float(self) -> Option<f64> {
        if self.is_float() {
            Some(f64::from_bits(self.0))
        } else {
            None
        }
    }

    /// Extract the boolean value
    #[inline]
    pub const fn get_bool(self) -> Option<bool> {
        if self.is_bool() {
            Some(self.0 & 1 == 1)
        } else {
            None
        }
    }

    /// Extract the heap object address
    #[inline]
    pub const fn get_pointer(self) -> Option<u64> {
        if self.is_pointer() {
            Some(self.0 & PAYLOAD_MASK)
        } else {
            None
        }
    }

    /// Extract the symbol hash
    #[inline]
    pub const fn get_symbol_hash(self) -> Option<u64> {
        if self.is_symbol() {
            Some(self.0 & PAYLOAD_MASK)
        } else {
            None
        }
    }

    /// Extract the character
    #[inline]
    pub const fn get_char(self) -> Option<u8> {
        if self.is_char() {
            Some(self.0 as u8)
        } else {
            None
        }
    }

    /// Extract the raw pointer address
    #[inline]
    pub const fn get_raw_pointer(self) -> Option<u64> {
        if self.is_raw_pointer() {
            Some(self.0 & PAYLOAD_MASK)
        } else {
            None
        }
    }

    /// The single type flag describing this value.
    pub const fn type_flags(self) -> TypeFlags {
        if self.is_float() {
            return TypeFlags::FLOAT;
        }
        match self.tag() {
            NIL_TAG => TypeFlags::NIL,
            INT32_TAG => TypeFlags::INTEGER,
            BOOLEAN_TAG => TypeFlags::BOOLEAN,
            OBJECT_TAG => TypeFlags::OBJECT,
            SYMBOL_TAG => TypeFlags::SYMBOL,
            CHAR_TAG => TypeFlags::CHAR,
            RAW_POINTER_TAG => TypeFlags::RAW_POINTER,
            _ => TypeFlags::NONE,
        }
    }

    /// Get type name for debugging
    pub const fn type_name(self) -> &'static str {
        if self.is_float() {
            return "float";
        }
        match self.tag() {
            NIL_TAG => "nil",
            INT32_TAG => "int32",
            BOOLEAN_TAG => "boolean",
            OBJECT_TAG => "object",
            SYMBOL_TAG => "symbol",
            CHAR_TAG => "char",
            RAW_POINTER_TAG => "raw pointer",
            _ => "invalid",
        }
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self::NIL
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_float() {
            return write!(f, "Slot::Float({})", f64::from_bits(self.0));
        }
        match self.tag() {
            NIL_TAG => write!(f, "Slot::Nil"),
            INT32_TAG => write!(f, "Slot::Int32({})", self.0 as u32 as i32),
            BOOLEAN_TAG => write!(f, "Slot::Bool({})", self.0 & 1 == 1),
            OBJECT_TAG => write!(f, "Slot::Object({:#x})", self.0 & PAYLOAD_MASK),
            SYMBOL_TAG => write!(f, "Slot::Symbol({:#x})", self.0 & PAYLOAD_MASK),
            CHAR_TAG => write!(f, "Slot::Char({:?})", self.0 as u8 as char),
            RAW_POINTER_TAG => write!(f, "Slot::RawPointer({:#x})", self.0 & PAYLOAD_MASK),
            _ => write!(f, "Slot::Invalid({:#x})", self.0),
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(value) = self.get_float() {
            return write!(f, "{:?}", value);
        }
        match self.tag() {
            NIL_TAG => write!(f, "nil"),
            INT32_TAG => write!(f, "{}", self.0 as u32 as i32),
            BOOLEAN_TAG => write!(f, "{}", self.0 & 1 == 1),
            OBJECT_TAG => write!(f, "<object {:#x}>", self.0 & PAYLOAD_MASK),
            SYMBOL_TAG => write!(f, "<symbol {:#x}>", self.0 & PAYLOAD_MASK),
            CHAR_TAG => write!(f, "${}", self.0 as u8 as char),
            RAW_POINTER_TAG => write!(f, "<raw {:#x}>", self.0 & PAYLOAD_MASK),
            _ => write!(f, "<invalid {:#x}>", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil() {
        let v = Slot::make_nil();
        assert!(v.is_nil());
        assert_eq!(v.as_bits(), 0xfff8_0000_0000_0000);
        assert!(!v.is_float());
        assert!(!v.is_pointer());
        assert_eq!(v.type_flags(), TypeFlags::NIL);
    }

    #[test]
    fn test_int32_tag_and_payload() {
        let v = Slot::make_int32(-7);
        assert_eq!(v.as_bits() >> 48, 0xfff9);
        assert_eq!(v.get_int32(), Some(-7));
        assert_eq!(Slot::make_int32(i32::MAX).get_int32(), Some(i32::MAX));
        assert_eq!(Slot::make_int32(i32::MIN).get_int32(), Some(i32::MIN));
    }

    #[test]
    fn test_bool() {
        assert_eq!(Slot::make_bool(true).as_bits(), 0xfffa_0000_0000_0001);
        assert_eq!(Slot::make_bool(false).get_bool(), Some(false));
        assert_eq!(Slot::TRUE.get_bool(), Some(true));
    }

    #[test]
    fn test_float_below_tag_range() {
        let v = Slot::make_float(-2.5);
        assert!(v.is_float());
        assert_eq!(v.get_float(), Some(-2.5));
        assert_eq!(v.get_int32(), None);

        // Negative NaN would otherwise look like nil.
        let nan = Slot::make_float(-f64::NAN);
        assert!(nan.is_float());
        assert!(nan.get_float().is_some_and(f64::is_nan));
    }

    #[test]
    fn test_pointer_and_symbol() {
        let p = Slot::make_pointer(0x1234_5678).unwrap();
        assert_eq!(p.as_bits() >> 48, 0xfffb);
        assert_eq!(p.get_pointer(), Some(0x1234_5678));
        assert_eq!(p.type_flags(), TypeFlags::OBJECT);

        let s = Slot::make_symbol(0xabcd).unwrap();
        assert_eq!(s.as_bits() >> 48, 0xfffc);
        assert_eq!(s.get_symbol_hash(), Some(0xabcd));

        assert!(Slot::make_pointer(1 << 50).is_err());
        assert!(Slot::make_symbol(u64::MAX).is_err());
    }

    #[test]
    fn test_char_and_raw_pointer() {
        let c = Slot::make_char(b'q');
        assert_eq!(c.as_bits() >> 48, 0xfffd);
        assert_eq!(c.get_char(), Some(b'q'));

        let r = Slot::make_raw_pointer(0x40).unwrap();
        assert_eq!(r.as_bits() >> 48, 0xfffe);
        assert_eq!(r.get_raw_pointer(), Some(0x40));
        assert_eq!(r.as_bits() & PAYLOAD_MASK, 0x40);
    }

    #[test]
    fn test_type_flags_union() {
        let flags = TypeFlags::INTEGER | TypeFlags::FLOAT;
        assert!(flags.contains(TypeFlags::INTEGER));
        assert!(!flags.contains(TypeFlags::NIL));
        assert!(TypeFlags::ALL.contains(flags));
        assert_eq!(format!("{}", flags), "int|float");
        assert_eq!(format!("{}", TypeFlags::ALL), "*");
    }

    #[test]
    fn test_display() {
        assert_eq!(Slot::make_int32(42).to_string(), "42");
        assert_eq!(Slot::NIL.to_string(), "nil");
        assert_eq!(Slot::make_char(b'a').to_string(), "$a");
    }
}
