//! Opcode stream encoding
//!
//! Every instruction is one opcode byte followed by fixed-size operands:
//! registers are one byte (see [`Reg::encode`]), immediates and jump
//! targets are little-endian. Jump targets are absolute byte positions in
//! the stream, written as placeholders and patched once known.

use std::fmt;

use serde::Serialize;

use super::traits::Reg;

/// Opcode byte values.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum Opcode {
    Addr = 0x01,
    Addi = 0x02,
    Andi = 0x03,
    Ori = 0x04,
    Xorr = 0x05,
    Movr = 0x06,
    Movi = 0x07,
    MoviU = 0x08,
    Bgei = 0x09,
    Beqi = 0x0a,
    Jmp = 0x0b,
    Jmpr = 0x0c,
    Jmpi = 0x0d,
    LdrL = 0x0e,
    LdxiW = 0x0f,
    LdxiI = 0x10,
    LdxiL = 0x11,
    StrI = 0x12,
    StrL = 0x13,
    StxiW = 0x14,
    StxiI = 0x15,
    StxiL = 0x16,
    Ret = 0x17,
    Retr = 0x18,
    Reti = 0x19,
    Label = 0x1a,
    // 0x1b..=0x1d are the address and patch pseudo-ops; they emit nothing
    MovAddr = 0x1e,
}

impl Opcode {
    /// Decode an opcode byte.
    pub fn from_u8(byte: u8) -> Option<Self> {
        use Opcode::*;
        Some(match byte {
            0x01 => Addr,
            0x02 => Addi,
            0x03 => Andi,
            0x04 => Ori,
            0x05 => Xorr,
            0x06 => Movr,
            0x07 => Movi,
            0x08 => MoviU,
            0x09 => Bgei,
            0x0a => Beqi,
            0x0b => Jmp,
            0x0c => Jmpr,
            0x0d => Jmpi,
            0x0e => LdrL,
            0x0f => LdxiW,
            0x10 => LdxiI,
            0x11 => LdxiL,
            0x12 => StrI,
            0x13 => StrL,
            0x14 => StxiW,
            0x15 => StxiI,
            0x16 => StxiL,
            0x17 => Ret,
            0x18 => Retr,
            0x19 => Reti,
            0x1a => Label,
            0x1e => MovAddr,
            _ => return None,
        })
    }

    /// Encoded size of the instruction, opcode byte included.
    pub fn size(self) -> usize {
        use Opcode::*;
        match self {
            Ret => 1,
            Jmpr | Retr => 2,
            Movr | LdrL | StrI | StrL => 3,
            Addr | Xorr => 4,
            Reti => 5,
            LdxiW | LdxiI | LdxiL | StxiW | StxiI | StxiL => 7,
            Jmp | Jmpi | Label => 9,
            Movi | MoviU | MovAddr => 10,
            Addi | Andi | Ori => 11,
            Bgei | Beqi => 18,
        }
    }
}

/// Offset of the jump-target word inside a conditional branch.
pub const BRANCH_TARGET_OFFSET: usize = 10;

/// A decoded instruction. Operands are named after the [`Jit`](super::traits::Jit) methods.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Instruction {
    Addr { target: Reg, a: Reg, b: Reg },
    Addi { target: Reg, a: Reg, value: i64 },
    Andi { target: Reg, a: Reg, value: u64 },
    Ori { target: Reg, a: Reg, value: u64 },
    Xorr { target: Reg, a: Reg, b: Reg },
    Movr { target: Reg, value: Reg },
    Movi { target: Reg, value: i64 },
    MoviU { target: Reg, value: u64 },
    MovAddr { target: Reg, address: i64 },
    Bgei { a: Reg, value: i64, address: i64 },
    Beqi { a: Reg, value: i64, address: i64 },
    Jmp { address: i64 },
    Jmpr { register: Reg },
    Jmpi { address: u64 },
    LdrL { target: Reg, address: Reg },
    LdxiW { target: Reg, address: Reg, offset: i32 },
    LdxiI { target: Reg, address: Reg, offset: i32 },
    LdxiL { target: Reg, address: Reg, offset: i32 },
    StrI { address: Reg, value: Reg },
    StrL { address: Reg, value: Reg },
    StxiW { offset: i32, address: Reg, value: Reg },
    StxiI { offset: i32, address: Reg, value: Reg },
    StxiL { offset: i32, address: Reg, value: Reg },
    Ret,
    Retr { register: Reg },
    Reti { value: i32 },
    Label { position: u64 },
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;
        match self {
            Addr { target, a, b } => write!(f, "addr {}, {}, {}", target, a, b),
            Addi { target, a, value } => write!(f, "addi {}, {}, {}", target, a, value),
            Andi { target, a, value } => write!(f, "andi {}, {}, {:#x}", target, a, value),
            Ori { target, a, value } => write!(f, "ori {}, {}, {:#x}", target, a, value),
            Xorr { target, a, b } => write!(f, "xorr {}, {}, {}", target, a, b),
            Movr { target, value } => write!(f, "movr {}, {}", target, value),
            Movi { target, value } => write!(f, "movi {}, {}", target, value),
            MoviU { target, value } => write!(f, "movi_u {}, {:#x}", target, value),
            MovAddr { target, address } => write!(f, "mov_addr {}, @{}", target, address),
            Bgei { a, value, address } => write!(f, "bgei {}, {}, @{}", a, value, address),
            Beqi { a, value, address } => write!(f, "beqi {}, {:#x}, @{}", a, value, address),
            Jmp { address } => write!(f, "jmp @{}", address),
            Jmpr { register } => write!(f, "jmpr {}", register),
            Jmpi { address } => write!(f, "jmpi {:#x}", address),
            LdrL { target, address } => write!(f, "ldr_l {}, [{}]", target, address),
            LdxiW { target, address, offset } => write!(f, "ldxi_w {}, [{} {:+}]", target, address, offset),
            LdxiI { target, address, offset } => write!(f, "ldxi_i {}, [{} {:+}]", target, address, offset),
            LdxiL { target, address, offset } => write!(f, "ldxi_l {}, [{} {:+}]", target, address, offset),
            StrI { address, value } => write!(f, "str_i [{}], {}", address, value),
            StrL { address, value } => write!(f, "str_l [{}], {}", address, value),
            StxiW { offset, address, value } => write!(f, "stxi_w [{} {:+}], {}", address, offset, value),
            StxiI { offset, address, value } => write!(f, "stxi_i [{} {:+}], {}", address, offset, value),
            StxiL { offset, address, value } => write!(f, "stxi_l [{} {:+}], {}", address, offset, value),
            Ret => write!(f, "ret"),
            Retr { register } => write!(f, "retr {}", register),
            Reti { value } => write!(f, "reti {}", value),
            Label { position } => write!(f, "label @{}", position),
        }
    }
}

/// Decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Unknown opcode byte
    #[error("invalid opcode {byte:#04x} at {position}")]
    InvalidOpcode {
        /// The byte
        byte: u8,
        /// Where it was read
        position: usize,
    },

    /// The stream ends inside an instruction
    #[error("truncated instruction at {0}")]
    Truncated(usize),
}

/// Appends encoded instructions to a buffer of fixed capacity.
///
/// A write that does not fit is dropped and sets the overflow flag; the
/// caller checks [`OpcodeWriteIterator::has_overflowed`] once at the end.
#[derive(Debug, Clone)]
pub struct OpcodeWriteIterator {
    buffer: Vec<u8>,
    capacity: usize,
    overflowed: bool,
}

impl OpcodeWriteIterator {
    /// Empty buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity.min(1 << 20)),
            capacity,
            overflowed: false,
        }
    }

    /// Bytes written so far.
    pub fn position(&self) -> usize {
        self.buffer.len()
    }

    /// Maximum size of the stream.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True if a write was dropped.
    pub fn has_overflowed(&self) -> bool {
        self.overflowed
    }

    /// The encoded stream.
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Take the encoded stream.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    fn write(&mut self, bytes: &[u8]) -> bool {
        if self.overflowed || self.buffer.len() + bytes.len() > self.capacity {
            self.overflowed = true;
            return false;
        }
        self.buffer.extend_from_slice(bytes);
        true
    }

    fn register(&mut self, register: Reg) -> u8 {
        match register.encode() {
            Some(byte) => byte,
            None => {
                self.overflowed = true;
                0
            }
        }
    }

    /// Write an opcode and its operands.
    pub fn instruction(&mut self, instruction: &Instruction) -> bool {
        use Instruction::*;
        let mut bytes = Vec::with_capacity(18);
        let op = |opcode: Opcode| opcode as u8;
        match *instruction {
            Addr { target, a, b } => {
                bytes.extend([op(Opcode::Addr), self.register(target), self.register(a), self.register(b)])
            }
            Addi { target, a, value } => {
                bytes.extend([op(Opcode::Addi), self.register(target), self.register(a)]);
                bytes.extend(value.to_le_bytes());
            }
            Andi { target, a, value } => {
                bytes.extend([op(Opcode::Andi), self.register(target), self.register(a)]);
                bytes.extend(value.to_le_bytes());
            }
            Ori { target, a, value } => {
                bytes.extend([op(Opcode::Ori), self.register(target), self.register(a)]);
                bytes.extend(value.to_le_bytes());
            }
            Xorr { target, a, b } => {
                bytes.extend([op(Opcode::Xorr), self.register(target), self.register(a), self.register(b)])
            }
            Movr { target, value } => bytes.extend([op(Opcode::Movr), self.register(target), self.register(value)]),
            Movi { target, value } => {
                bytes.extend([op(Opcode::Movi), self.register(target)]);
                bytes.extend(value.to_le_bytes());
            }
            MoviU { target, value } => {
                bytes.extend([op(Opcode::MoviU), self.register(target)]);
                bytes.extend(value.to_le_bytes());
            }
            MovAddr { target, address } => {
                bytes.extend([op(Opcode::MovAddr), self.register(target)]);
                bytes.extend(address.to_le_bytes());
            }
            Bgei { a, value, address } => {
                bytes.extend([op(Opcode::Bgei), self.register(a)]);
                bytes.extend(value.to_le_bytes());
                bytes.extend(address.to_le_bytes());
            }
            Beqi { a, value, address } => {
                bytes.extend([op(Opcode::Beqi), self.register(a)]);
                bytes.extend(value.to_le_bytes());
                bytes.extend(address.to_le_bytes());
            }
            Jmp { address } => {
                bytes.push(op(Opcode::Jmp));
                bytes.extend(address.to_le_bytes());
            }
            Jmpr { register } => bytes.extend([op(Opcode::Jmpr), self.register(register)]),
            Jmpi { address } => {
                bytes.push(op(Opcode::Jmpi));
                bytes.extend(address.to_le_bytes());
            }
            LdrL { target, address } => bytes.extend([op(Opcode::LdrL), self.register(target), self.register(address)]),
            LdxiW { target, address, offset } => {
                bytes.extend([op(Opcode::LdxiW), self.register(target), self.register(address)]);
                bytes.extend(offset.to_le_bytes());
            }
            LdxiI { target, address, offset } => {
                bytes.extend([op(Opcode::LdxiI), self.register(target), self.register(address)]);
                bytes.extend(offset.to_le_bytes());
            }
            LdxiL { target, address, offset } => {
                bytes.extend([op(Opcode::LdxiL), self.register(target), self.register(address)]);
                bytes.extend(offset.to_le_bytes());
            }
            StrI { address, value } => bytes.extend([op(Opcode::StrI), self.register(address), self.register(value)]),
            StrL { address, value } => bytes.extend([op(Opcode::StrL), self.register(address), self.register(value)]),
            StxiW { offset, address, value } => {
                bytes.push(op(Opcode::StxiW));
                bytes.extend(offset.to_le_bytes());
                bytes.extend([self.register(address), self.register(value)]);
            }
            StxiI { offset, address, value } => {
                bytes.push(op(Opcode::StxiI));
                bytes.extend(offset.to_le_bytes());
                bytes.extend([self.register(address), self.register(value)]);
            }
            StxiL { offset, address, value } => {
                bytes.push(op(Opcode::StxiL));
                bytes.extend(offset.to_le_bytes());
                bytes.extend([self.register(address), self.register(value)]);
            }
            Ret => bytes.push(op(Opcode::Ret)),
            Retr { register } => bytes.extend([op(Opcode::Retr), self.register(register)]),
            Reti { value } => {
                bytes.push(op(Opcode::Reti));
                bytes.extend(value.to_le_bytes());
            }
            Label { position } => {
                bytes.push(op(Opcode::Label));
                bytes.extend(position.to_le_bytes());
            }
        }
        self.write(&bytes)
    }

    /// Overwrite the 8-byte word at `site`.
    pub fn patch_word(&mut self, site: usize, value: i64) -> bool {
        match self.buffer.get_mut(site..site + 8) {
            Some(word) => {
                word.copy_from_slice(&value.to_le_bytes());
                true
            }
            None => {
                self.overflowed = true;
                false
            }
        }
    }
}

/// Decodes an opcode stream from any position.
#[derive(Debug, Clone)]
pub struct OpcodeReadIterator<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> OpcodeReadIterator<'a> {
    /// Start decoding at the beginning of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    /// Position of the next instruction.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Continue decoding at `position`.
    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    /// True when every byte has been decoded.
    pub fn at_end(&self) -> bool {
        self.position >= self.bytes.len()
    }

    /// Decode the instruction at the current position and advance past it.
    pub fn decode(&mut self) -> Result<Instruction, DecodeError> {
        use Instruction::*;
        let start = self.position;
        let byte = *self.bytes.get(start).ok_or(DecodeError::Truncated(start))?;
        let opcode = Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode { byte, position: start })?;
        let operands = self
            .bytes
            .get(start + 1..start + opcode.size())
            .ok_or(DecodeError::Truncated(start))?;
        let reg = |i: usize| Reg::decode(operands[i]);
        let word = |i: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&operands[i..i + 8]);
            raw
        };
        let int = |i: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&operands[i..i + 4]);
            i32::from_le_bytes(raw)
        };

        let instruction = match opcode {
            Opcode::Addr => Addr {
                target: reg(0),
                a: reg(1),
                b: reg(2),
            },
            Opcode::Addi => Addi {
                target: reg(0),
                a: reg(1),
                value: i64::from_le_bytes(word(2)),
            },
            Opcode::Andi => Andi {
                target: reg(0),
                a: reg(1),
                value: u64::from_le_bytes(word(2)),
            },
            Opcode::Ori => Ori {
                target: reg(0),
                a: reg(1),
                value: u64::from_le_bytes(word(2)),
            },
            Opcode::Xorr => Xorr {
                target: reg(0),
                a: reg(1),
                b: reg(2),
            },
            Opcode::Movr => Movr {
                target: reg(0),
                value: reg(1),
            },
            Opcode::Movi => Movi {
                target: reg(0),
                value: i64::from_le_bytes(word(1)),
            },
            Opcode::MoviU => MoviU {
                target: reg(0),
                value: u64::from_le_bytes(word(1)),
            },
            Opcode::MovAddr => MovAddr {
                target: reg(0),
                address: i64::from_le_bytes(word(1)),
            },
            Opcode::Bgei => Bgei {
                a: reg(0),
                value: i64::from_le_bytes(word(1)),
                address: i64::from_le_bytes(word(9)),
            },
            Opcode::Beqi => Beqi {
                a: reg(0),
                value: i64::from_le_bytes(word(1)),
                address: i64::from_le_bytes(word(9)),
            },
            Opcode::Jmp => Jmp {
                address: i64::from_le_bytes(word(0)),
            },
            Opcode::Jmpr => Jmpr { register: reg(0) },
            Opcode::Jmpi => Jmpi {
                address: u64::from_le_bytes(word(0)),
            },
            Opcode::LdrL => LdrL {
                target: reg(0),
                address: reg(1),
            },
            Opcode::LdxiW => LdxiW {
                target: reg(0),
                address: reg(1),
                offset: int(2),
            },
            Opcode::LdxiI => LdxiI {
                target: reg(0),
                address: reg(1),
                offset: int(2),
            },
            Opcode::LdxiL => LdxiL {
                target: reg(0),
                address: reg(1),
                offset: int(2),
            },
            Opcode::StrI => StrI {
                address: reg(0),
                value: reg(1),
            },
            Opcode::StrL => StrL {
                address: reg(0),
                value: reg(1),
            },
            Opcode::StxiW => StxiW {
                offset: int(0),
                address: reg(4),
                value: reg(5),
            },
            Opcode::StxiI => StxiI {
                offset: int(0),
                address: reg(4),
                value: reg(5),
            },
            Opcode::StxiL => StxiL {
                offset: int(0),
                address: reg(4),
                value: reg(5),
            },
            Opcode::Ret => Ret,
            Opcode::Retr => Retr { register: reg(0) },
            Opcode::Reti => Reti { value: int(0) },
            Opcode::Label => Label {
                position: u64::from_le_bytes(word(0)),
            },
        };
        self.position = start + opcode.size();
        Ok(instruction)
    }
}

impl Iterator for OpcodeReadIterator<'_> {
    type Item = Result<(usize, Instruction), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.at_end() {
            return None;
        }
        let position = self.position;
        match self.decode() {
            Ok(instruction) => Some(Ok((position, instruction))),
            Err(error) => {
                // Stop after the first error
                self.position = self.bytes.len();
                Some(Err(error))
            }
        }
    }
}

/// One instruction per line, prefixed with its position.
pub fn disassemble(bytes: &[u8]) -> Result<String, DecodeError> {
    let mut text = String::new();
    for decoded in OpcodeReadIterator::new(bytes) {
        let (position, instruction) = decoded?;
        text.push_str(&format!("{:6}  {}\n", position, instruction));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(instructions: &[Instruction]) -> Vec<u8> {
        let mut writer = OpcodeWriteIterator::new(1024);
        for instruction in instructions {
            assert!(writer.instruction(instruction));
        }
        writer.into_bytes()
    }

    #[test]
    fn test_sizes_match_encoding() {
        let samples = [
            Instruction::Addr {
                target: Reg(0),
                a: Reg(1),
                b: Reg(2),
            },
            Instruction::Addi {
                target: Reg(0),
                a: Reg::STACK,
                value: -8,
            },
            Instruction::Movr {
                target: Reg(0),
                value: Reg(1),
            },
            Instruction::Beqi {
                a: Reg(3),
                value: 1,
                address: 40,
            },
            Instruction::StxiL {
                offset: -16,
                address: Reg::STACK,
                value: Reg(2),
            },
            Instruction::Ret,
            Instruction::Reti { value: 7 },
            Instruction::Label { position: 0 },
            Instruction::MovAddr {
                target: Reg(0),
                address: 0,
            },
        ];
        for sample in samples {
            let bytes = encode(&[sample]);
            let opcode = Opcode::from_u8(bytes[0]).unwrap();
            assert_eq!(bytes.len(), opcode.size(), "{}", sample);
        }
    }

    #[test]
    fn test_decode_recovers_operands() {
        let program = [
            Instruction::LdxiL {
                target: Reg(1),
                address: Reg::CONTEXT,
                offset: 24,
            },
            Instruction::StxiL {
                offset: -16,
                address: Reg::STACK,
                value: Reg(0),
            },
            Instruction::Jmpr { register: Reg(1) },
        ];
        let bytes = encode(&program);
        let decoded: Vec<Instruction> = OpcodeReadIterator::new(&bytes).map(|d| d.unwrap().1).collect();
        assert_eq!(decoded, program);
    }

    #[test]
    fn test_overflow_is_sticky() {
        let mut writer = OpcodeWriteIterator::new(5);
        assert!(writer.instruction(&Instruction::Movr {
            target: Reg(0),
            value: Reg(1),
        }));
        assert!(!writer.instruction(&Instruction::Movr {
            target: Reg(1),
            value: Reg(0),
        }));
        assert!(writer.has_overflowed());
        assert!(!writer.instruction(&Instruction::Ret));
        assert_eq!(writer.position(), 3);
    }

    #[test]
    fn test_invalid_opcode() {
        let result: Result<Vec<_>, _> = OpcodeReadIterator::new(&[0x1b]).collect();
        assert_eq!(
            result,
            Err(DecodeError::InvalidOpcode {
                byte: 0x1b,
                position: 0
            })
        );
    }

    #[test]
    fn test_disassemble() {
        let bytes = encode(&[Instruction::Movi {
            target: Reg(0),
            value: 5,
        }]);
        assert_eq!(disassemble(&bytes).unwrap().trim(), "0  movi r0, 5");
    }
}
