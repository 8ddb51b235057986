//! Label-resolving EVM assembler
//!
//! Jump targets are always pushed with `PUSH2`, so label offsets are known
//! after a single layout pass. Runtime code therefore may not exceed 64 KiB,
//! which is well above the deployable size limit anyway.

use std::collections::HashMap;

use alloy_primitives::U256;

use crate::error::CodegenError;
use crate::token::Position;

/// Width of every label push
const LABEL_WIDTH: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

#[derive(Clone, Debug)]
pub enum AsmInst {
    Op(u8),
    /// Immediate, pushed with the smallest width that holds it
    Push(U256),
    /// Offset of a label, pushed with `PUSH2`
    PushLabel(Label),
    /// Marks a position; emits nothing
    Label(Label),
}

#[derive(Debug)]
pub struct AssembledCode {
    pub bytecode: Vec<u8>,
    pub label_offsets: HashMap<Label, usize>,
}

#[derive(Debug, Default)]
pub struct Assembler {
    instructions: Vec<AsmInst>,
    next_label: u32,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    pub fn emit_op(&mut self, opcode: u8) {
        self.instructions.push(AsmInst::Op(opcode));
    }

    pub fn emit_ops(&mut self, opcodes: &[u8]) {
        self.instructions.extend(opcodes.iter().map(|&op| AsmInst::Op(op)));
    }

    pub fn emit_push(&mut self, value: U256) {
        self.instructions.push(AsmInst::Push(value));
    }

    pub fn emit_push_u64(&mut self, value: u64) {
        self.emit_push(U256::from(value));
    }

    pub fn emit_push_label(&mut self, label: Label) {
        self.instructions.push(AsmInst::PushLabel(label));
    }

    pub fn define_label(&mut self, label: Label) {
        self.instructions.push(AsmInst::Label(label));
    }

    /// Defines `label` followed by the `JUMPDEST` that makes it a valid target
    pub fn jump_target(&mut self, label: Label) {
        self.define_label(label);
        self.emit_op(opcodes::JUMPDEST);
    }

    pub fn jump(&mut self, label: Label) {
        self.emit_push_label(label);
        self.emit_op(opcodes::JUMP);
    }

    /// Jumps to `label` when the top of the stack is non-zero
    pub fn jump_if(&mut self, label: Label) {
        self.emit_push_label(label);
        self.emit_op(opcodes::JUMPI);
    }

    pub fn assemble(self) -> Result<AssembledCode, CodegenError> {
        let mut offset = 0usize;
        let mut label_offsets = HashMap::new();
        for inst in &self.instructions {
            match inst {
                AsmInst::Op(_) => offset += 1,
                AsmInst::Push(value) => offset += 1 + push_width(*value) as usize,
                AsmInst::PushLabel(_) => offset += 1 + LABEL_WIDTH as usize,
                AsmInst::Label(label) => {
                    label_offsets.insert(*label, offset);
                }
            }
        }

        if offset > usize::from(u16::MAX) {
            return Err(CodegenError::unsupported(
                format!("runtime code of {offset} bytes exceeds the 64 KiB jump range"),
                Position::default(),
            ));
        }

        let mut bytecode = Vec::with_capacity(offset);
        for inst in &self.instructions {
            match inst {
                AsmInst::Op(opcode) => bytecode.push(*opcode),
                AsmInst::Push(value) => emit_push_value(&mut bytecode, *value),
                AsmInst::PushLabel(label) => {
                    let target = label_offsets.get(label).copied().ok_or_else(|| {
                        CodegenError::InvalidModule(format!("undefined label {}", label.0))
                    })?;
                    emit_push_fixed_width(&mut bytecode, U256::from(target), LABEL_WIDTH);
                }
                AsmInst::Label(_) => {}
            }
        }

        Ok(AssembledCode { bytecode, label_offsets })
    }
}

/// Returns the number of bytes needed to push a value.
pub(crate) fn push_width(value: U256) -> u8 {
    if value.is_zero() {
        return 0;
    }

    let bytes = value.to_be_bytes::<32>();
    let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(32);
    (32 - first_nonzero) as u8
}

pub(crate) fn emit_push_value(bytecode: &mut Vec<u8>, value: U256) {
    emit_push_fixed_width(bytecode, value, push_width(value));
}

pub(crate) fn emit_push_fixed_width(bytecode: &mut Vec<u8>, value: U256, width: u8) {
    if width == 0 {
        bytecode.push(opcodes::PUSH0);
        return;
    }

    // PUSH1 = 0x60 ... PUSH32 = 0x7f
    bytecode.push(opcodes::PUSH0 + width);

    let bytes = value.to_be_bytes::<32>();
    let start = 32 - width as usize;
    bytecode.extend_from_slice(&bytes[start..]);
}

/// Opcodes used by the backend
pub mod opcodes {
    pub const STOP: u8 = 0x00;
    pub const ADD: u8 = 0x01;
    pub const MUL: u8 = 0x02;
    pub const SUB: u8 = 0x03;
    pub const DIV: u8 = 0x04;
    pub const MOD: u8 = 0x06;

    pub const LT: u8 = 0x10;
    pub const GT: u8 = 0x11;
    pub const EQ: u8 = 0x14;
    pub const ISZERO: u8 = 0x15;
    pub const AND: u8 = 0x16;
    pub const SHL: u8 = 0x1b;
    pub const SHR: u8 = 0x1c;

    pub const KECCAK256: u8 = 0x20;

    pub const CALLER: u8 = 0x33;
    pub const CALLVALUE: u8 = 0x34;
    pub const CALLDATALOAD: u8 = 0x35;
    pub const CALLDATASIZE: u8 = 0x36;
    pub const CALLDATACOPY: u8 = 0x37;
    pub const CODECOPY: u8 = 0x39;

    pub const TIMESTAMP: u8 = 0x42;
    pub const NUMBER: u8 = 0x43;

    pub const POP: u8 = 0x50;
    pub const MLOAD: u8 = 0x51;
    pub const MSTORE: u8 = 0x52;
    pub const SLOAD: u8 = 0x54;
    pub const SSTORE: u8 = 0x55;
    pub const JUMP: u8 = 0x56;
    pub const JUMPI: u8 = 0x57;
    pub const GAS: u8 = 0x5a;
    pub const JUMPDEST: u8 = 0x5b;
    pub const PUSH0: u8 = 0x5f;
    pub const PUSH1: u8 = 0x60;
    pub const PUSH2: u8 = 0x61;
    pub const PUSH4: u8 = 0x63;

    pub const DUP1: u8 = 0x80;
    pub const DUP2: u8 = 0x81;
    pub const SWAP1: u8 = 0x90;

    pub const LOG1: u8 = 0xa1;

    pub const CALL: u8 = 0xf1;
    pub const RETURN: u8 = 0xf3;
    pub const REVERT: u8 = 0xfd;
}
