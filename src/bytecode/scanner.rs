//! Decoding of a single method's bytecode: instruction lengths, branch
//! operands and big-endian operand access.

use crate::bytecode::opcodes::{self, *};
use crate::error::ScanError;

pub fn get_u1(code: &[u8], pos: usize) -> u8 {
    code[pos]
}

pub fn get_u2(code: &[u8], pos: usize) -> u16 {
    ((code[pos] as u16) << 8) | code[pos + 1] as u16
}

pub fn get_s2(code: &[u8], pos: usize) -> i16 {
    get_u2(code, pos) as i16
}

pub fn get_u4(code: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes([code[pos], code[pos + 1], code[pos + 2], code[pos + 3]])
}

pub fn get_s4(code: &[u8], pos: usize) -> i32 {
    get_u4(code, pos) as i32
}

pub fn put_u2(code: &mut [u8], pos: usize, value: u16) {
    code[pos] = (value >> 8) as u8;
    code[pos + 1] = value as u8;
}

pub fn put_s2(code: &mut [u8], pos: usize, value: i16) {
    put_u2(code, pos, value as u16)
}

pub fn put_u4(code: &mut [u8], pos: usize, value: u32) {
    code[pos] = (value >> 24) as u8;
    code[pos + 1] = (value >> 16) as u8;
    code[pos + 2] = (value >> 8) as u8;
    code[pos + 3] = value as u8;
}

pub fn put_s4(code: &mut [u8], pos: usize, value: i32) {
    put_u4(code, pos, value as u32)
}

/// Padding bytes that follow a switch opcode at `offset` so its operands are 4-byte aligned.
pub fn switch_padding(offset: usize) -> usize {
    (4 - (offset + 1) % 4) % 4
}

/// Length of the instruction starting at `offset`.
///
/// Unknown opcodes and instructions that run past the end of the code are
/// corruption, never guessed around.
pub fn instruction_length(code: &[u8], offset: usize) -> Result<usize, ScanError> {
    let truncated = ScanError::Truncated { offset, code_length: code.len() };
    let opcode = *code.get(offset).ok_or(truncated.clone())?;
    let len = match opcode {
        TABLESWITCH => {
            let base = offset + 1 + switch_padding(offset);
            if base + 12 > code.len() {
                return Err(truncated);
            }
            let low = get_s4(code, base + 4) as i64;
            let high = get_s4(code, base + 8) as i64;
            if high < low {
                return Err(ScanError::MalformedSwitch { offset, reason: "high is below low" });
            }
            let entries = (high - low + 1) as usize;
            1 + switch_padding(offset) + 4 * (3 + entries)
        }
        LOOKUPSWITCH => {
            let base = offset + 1 + switch_padding(offset);
            if base + 8 > code.len() {
                return Err(truncated);
            }
            let npairs = get_s4(code, base + 4);
            if npairs < 0 {
                return Err(ScanError::MalformedSwitch { offset, reason: "negative pair count" });
            }
            1 + switch_padding(offset) + 4 * (2 + 2 * npairs as usize)
        }
        WIDE => {
            let target = *code.get(offset + 1).ok_or(truncated.clone())?;
            match target {
                IINC => 6,
                ILOAD..=ALOAD | ISTORE..=ASTORE | RET => 4,
                _ => {
                    warn!("wide prefix on opcode 0x{:02x} at {}", target, offset);
                    2
                }
            }
        }
        _ => opcodes::fixed_length(opcode).ok_or(ScanError::UnknownOpcode { opcode, offset })?,
    };
    if offset + len > code.len() {
        return Err(truncated);
    }
    Ok(len)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insn {
    pub offset: usize,
    pub opcode: u8,
    pub len: usize,
}

/// Decodes every instruction of `code` in order.
pub fn scan(code: &[u8]) -> Result<Vec<Insn>, ScanError> {
    let mut insns = Vec::with_capacity(code.len() / 2 + 1);
    let mut offset = 0;
    while offset < code.len() {
        let len = instruction_length(code, offset)?;
        insns.push(Insn { offset, opcode: code[offset], len });
        offset += len;
    }
    Ok(insns)
}

/// The offset-bearing operands of one instruction, relative to that instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Branch {
    None,
    Short(i16),
    Wide(i32),
    Table { default: i32, low: i32, high: i32, targets: Vec<i32> },
    Lookup { default: i32, pairs: Vec<(i32, i32)> },
}

impl Branch {
    /// All relative targets of this instruction.
    pub fn targets(&self) -> Vec<i64> {
        match self {
            Branch::None => vec![],
            Branch::Short(rel) => vec![*rel as i64],
            Branch::Wide(rel) => vec![*rel as i64],
            Branch::Table { default, targets, .. } => {
                std::iter::once(*default as i64).chain(targets.iter().map(|t| *t as i64)).collect()
            }
            Branch::Lookup { default, pairs } => {
                let targets = pairs.iter().map(|(_, t)| *t as i64);
                std::iter::once(*default as i64).chain(targets).collect()
            }
        }
    }

    /// Length of the switch operands after the opcode and its padding.
    pub fn switch_body_len(&self) -> usize {
        match self {
            Branch::Table { targets, .. } => 12 + 4 * targets.len(),
            Branch::Lookup { pairs, .. } => 8 + 8 * pairs.len(),
            _ => 0,
        }
    }
}

pub fn decode_branch(code: &[u8], insn: &Insn) -> Branch {
    let op = insn.offset;
    match insn.opcode {
        opcode if opcodes::is_short_branch(opcode) => Branch::Short(get_s2(code, op + 1)),
        opcode if opcodes::is_wide_branch(opcode) => Branch::Wide(get_s4(code, op + 1)),
        TABLESWITCH => {
            let base = op + 1 + switch_padding(op);
            let low = get_s4(code, base + 4);
            let high = get_s4(code, base + 8);
            let count = (high as i64 - low as i64 + 1) as usize;
            Branch::Table {
                default: get_s4(code, base),
                low,
                high,
                targets: (0..count).map(|i| get_s4(code, base + 12 + 4 * i)).collect(),
            }
        }
        LOOKUPSWITCH => {
            let base = op + 1 + switch_padding(op);
            let npairs = get_s4(code, base + 4) as usize;
            Branch::Lookup {
                default: get_s4(code, base),
                pairs: (0..npairs)
                    .map(|i| (get_s4(code, base + 8 + 8 * i), get_s4(code, base + 12 + 8 * i)))
                    .collect(),
            }
        }
        _ => Branch::None,
    }
}

/// Reusable output buffer for rewritten code.
///
/// Owned by one instrumentation call chain; capacity grows geometrically and
/// is never given back, so repeated insertions into one method do not
/// reallocate.
#[derive(Debug, Default)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
}

impl CodeBuffer {
    pub fn new() -> CodeBuffer {
        CodeBuffer::default()
    }

    /// Clears the buffer and makes room for `len` bytes.
    pub fn reset(&mut self, len: usize) {
        self.bytes.clear();
        let capacity = self.bytes.capacity();
        if capacity < len {
            self.bytes.reserve(len.max(capacity * 2));
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn put_u1(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn put_u2(&mut self, value: u16) {
        self.bytes.push((value >> 8) as u8);
        self.bytes.push(value as u8);
    }

    pub fn put_s2(&mut self, value: i16) {
        self.put_u2(value as u16)
    }

    pub fn put_u4(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    pub fn put_s4(&mut self, value: i32) {
        self.put_u4(value as u32)
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    /// Exchanges contents with `code`: the buffer takes the old code's
    /// allocation for the next round.
    pub fn swap_into(&mut self, code: &mut Vec<u8>) {
        std::mem::swap(&mut self.bytes, code);
    }
}
