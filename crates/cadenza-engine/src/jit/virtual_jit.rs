//! [`Jit`] implementation that records the opcode stream

use super::opcode::{Instruction, OpcodeWriteIterator, BRANCH_TARGET_OFFSET};
use super::traits::{Jit, Label, Reg};

/// Writes every instruction into an [`OpcodeWriteIterator`].
#[derive(Debug, Clone)]
pub struct VirtualJit {
    writer: OpcodeWriteIterator,
}

impl VirtualJit {
    /// Recorder with room for `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            writer: OpcodeWriteIterator::new(capacity),
        }
    }

    /// True if an instruction did not fit.
    pub fn has_overflowed(&self) -> bool {
        self.writer.has_overflowed()
    }

    /// Capacity the recorder was created with.
    pub fn capacity(&self) -> usize {
        self.writer.capacity()
    }

    /// The recorded stream.
    pub fn bytes(&self) -> &[u8] {
        self.writer.bytes()
    }

    /// Take the recorded stream.
    pub fn into_bytes(self) -> Vec<u8> {
        self.writer.into_bytes()
    }

    fn emit(&mut self, instruction: Instruction) {
        self.writer.instruction(&instruction);
    }

    /// Emit a placeholder instruction and return the site of its target
    /// word.
    fn emit_site(&mut self, instruction: Instruction, offset: usize) -> Label {
        let site = Label(self.writer.position() + offset);
        self.emit(instruction);
        site
    }
}

impl Jit for VirtualJit {
    fn addr(&mut self, target: Reg, a: Reg, b: Reg) {
        self.emit(Instruction::Addr { target, a, b });
    }

    fn addi(&mut self, target: Reg, a: Reg, value: i64) {
        self.emit(Instruction::Addi { target, a, value });
    }

    fn andi(&mut self, target: Reg, a: Reg, value: u64) {
        self.emit(Instruction::Andi { target, a, value });
    }

    fn ori(&mut self, target: Reg, a: Reg, value: u64) {
        self.emit(Instruction::Ori { target, a, value });
    }

    fn xorr(&mut self, target: Reg, a: Reg, b: Reg) {
        self.emit(Instruction::Xorr { target, a, b });
    }

    fn movr(&mut self, target: Reg, value: Reg) {
        if target != value {
            self.emit(Instruction::Movr { target, value });
        }
    }

    fn movi(&mut self, target: Reg, value: i64) {
        self.emit(Instruction::Movi { target, value });
    }

    fn movi_u(&mut self, target: Reg, value: u64) {
        self.emit(Instruction::MoviU { target, value });
    }

    fn mov_addr(&mut self, target: Reg) -> Label {
        self.emit_site(Instruction::MovAddr { target, address: 0 }, 2)
    }

    fn bgei(&mut self, a: Reg, value: i64) -> Label {
        self.emit_site(Instruction::Bgei { a, value, address: 0 }, BRANCH_TARGET_OFFSET)
    }

    fn beqi(&mut self, a: Reg, value: i64) -> Label {
        self.emit_site(Instruction::Beqi { a, value, address: 0 }, BRANCH_TARGET_OFFSET)
    }

    fn jmp(&mut self) -> Label {
        self.emit_site(Instruction::Jmp { address: 0 }, 1)
    }

    fn jmpr(&mut self, register: Reg) {
        self.emit(Instruction::Jmpr { register });
    }

    fn jmpi(&mut self, address: u64) {
        self.emit(Instruction::Jmpi { address });
    }

    fn ldr_l(&mut self, target: Reg, address: Reg) {
        self.emit(Instruction::LdrL { target, address });
    }

    fn ldxi_w(&mut self, target: Reg, address: Reg, offset: i32) {
        self.emit(Instruction::LdxiW { target, address, offset });
    }

    fn ldxi_i(&mut self, target: Reg, address: Reg, offset: i32) {
        self.emit(Instruction::LdxiI { target, address, offset });
    }

    fn ldxi_l(&mut self, target: Reg, address: Reg, offset: i32) {
        self.emit(Instruction::LdxiL { target, address, offset });
    }

    fn str_i(&mut self, address: Reg, value: Reg) {
        self.emit(Instruction::StrI { address, value });
    }

    fn str_l(&mut self, address: Reg, value: Reg) {
        self.emit(Instruction::StrL { address, value });
    }

    fn stxi_w(&mut self, offset: i32, address: Reg, value: Reg) {
        self.emit(Instruction::StxiW { offset, address, value });
    }

    fn stxi_i(&mut self, offset: i32, address: Reg, value: Reg) {
        self.emit(Instruction::StxiI { offset, address, value });
    }

    fn stxi_l(&mut self, offset: i32, address: Reg, value: Reg) {
        self.emit(Instruction::StxiL { offset, address, value });
    }

    fn ret(&mut self) {
        self.emit(Instruction::Ret);
    }

    fn retr(&mut self, register: Reg) {
        self.emit(Instruction::Retr { register });
    }

    fn reti(&mut self, value: i32) {
        self.emit(Instruction::Reti { value });
    }

    fn label(&mut self) -> Label {
        let position = self.writer.position();
        self.emit(Instruction::Label {
            position: position as u64,
        });
        Label(position)
    }

    fn address(&mut self) -> Label {
        Label(self.writer.position())
    }

    fn patch_here(&mut self, site: Label) {
        let here = self.writer.position() as i64;
        self.writer.patch_word(site.0, here);
    }

    fn patch_there(&mut self, site: Label, target: Label) {
        self.writer.patch_word(site.0, target.0 as i64);
    }

    fn current_address(&self) -> usize {
        self.writer.position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::opcode::OpcodeReadIterator;

    fn decode(jit: &VirtualJit) -> Vec<Instruction> {
        OpcodeReadIterator::new(jit.bytes()).map(|d| d.unwrap().1).collect()
    }

    #[test]
    fn test_movr_to_self_is_dropped() {
        let mut jit = VirtualJit::new(64);
        jit.movr(Reg(1), Reg(1));
        assert_eq!(jit.current_address(), 0);
        jit.movr(Reg(1), Reg(2));
        assert_eq!(jit.current_address(), 3);
    }

    #[test]
    fn test_forward_branch_patch() {
        let mut jit = VirtualJit::new(64);
        let site = jit.beqi(Reg(0), 1);
        jit.movi(Reg(0), 2);
        let target = jit.label();
        jit.ret();
        jit.patch_there(site, target);
        assert_eq!(
            decode(&jit)[0],
            Instruction::Beqi {
                a: Reg(0),
                value: 1,
                address: 28
            }
        );
    }

    #[test]
    fn test_patch_here_and_mov_addr() {
        let mut jit = VirtualJit::new(64);
        let site = jit.mov_addr(Reg(0));
        let jump = jit.jmp();
        jit.patch_here(site);
        jit.patch_here(jump);
        let decoded = decode(&jit);
        assert_eq!(
            decoded[0],
            Instruction::MovAddr {
                target: Reg(0),
                address: 19
            }
        );
        assert_eq!(decoded[1], Instruction::Jmp { address: 19 });
    }

    #[test]
    fn test_address_emits_nothing() {
        let mut jit = VirtualJit::new(64);
        jit.ret();
        assert_eq!(jit.address(), Label(1));
        assert_eq!(jit.current_address(), 1);
    }
}
