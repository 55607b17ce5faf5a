//! Splicing new instruction sequences into a method's code.
//!
//! Every insertion is one forward pass over the current code. The pass assigns each original
//! instruction its new position (switch padding is recomputed against the new position, so a
//! switch may change length) and then re-emits the code with every relative operand
//! re-threaded through that position map. The same map relocates the exception table and the
//! offset-bearing Code sub-attributes.

use crate::bytecode::classfile::{CodeAttribute, CodeSubAttribute, StackMapFrame, VerificationType};
use crate::bytecode::opcodes::*;
use crate::bytecode::scanner::{self, Branch, CodeBuffer, Insn};
use crate::error::ScanError;

const MAX_CODE_LENGTH: usize = 0xFFFF;

/// What a branch or handler that targeted the insertion offset points at afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Binding {
    /// Targets stay with the original instruction; the new code runs only on fall-through.
    Preceding,
    /// Only branches from instructions in `[from, offset)` move to the new code. Everything
    /// else, side tables included, stays with the original instruction.
    Inner { from: usize },
    /// Targets move to the new code, which then runs before the instruction on every path.
    Following,
}

impl Binding {
    fn retargets(self, source: Option<usize>, insert_at: usize) -> bool {
        match self {
            Binding::Preceding => false,
            Binding::Inner { from } => {
                source.map_or(false, |source| source >= from && source < insert_at)
            },
            Binding::Following => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionSite {
    pub offset: usize,
    pub code: Vec<u8>,
    pub binding: Binding,
}

impl InjectionSite {
    pub fn new(offset: usize, code: Vec<u8>, binding: Binding) -> InjectionSite {
        InjectionSite { offset, code, binding }
    }
}

/// Old-to-new offset map produced by one insertion.
#[derive(Debug, Clone)]
pub struct Relocation {
    positions: Vec<Option<usize>>,
    insert_at: usize,
    inject_at: usize,
    binding: Binding,
}

impl Relocation {
    /// New position of the instruction that started at `old`, or of the code end.
    pub fn instruction(&self, old: usize) -> Option<usize> {
        self.positions.get(old).copied().flatten()
    }

    /// New value of a code position recorded as a handler, range bound or line start.
    ///
    /// Under `Following` every position equal to the insertion offset moves to the new code,
    /// `end_pc` included: a range that ended at the insertion point now ends right before the
    /// new code, so the new code is never covered by a range it was not inserted into. Under `Preceding` and `Inner` such positions stay with the instruction,
    /// so a range ending there grows over the new code. Positions past the insertion offset
    /// always move by the inserted length.
    pub fn target(&self, old: usize) -> Option<usize> {
        self.resolve(None, old)
    }

    /// New value of a branch target, for a branch at old offset `source`.
    pub fn branch_target(&self, source: usize, old: usize) -> Option<usize> {
        self.resolve(Some(source), old)
    }

    fn resolve(&self, source: Option<usize>, old: usize) -> Option<usize> {
        if old == self.insert_at && self.binding.retargets(source, self.insert_at) {
            Some(self.inject_at)
        } else {
            self.instruction(old)
        }
    }

    /// Where the injected code starts.
    pub fn inject_at(&self) -> usize {
        self.inject_at
    }
}

/// Applies insertions to Code attributes, reusing one output buffer across them.
#[derive(Debug, Default)]
pub struct Injector {
    buffer: CodeBuffer,
}

impl Injector {
    pub fn new() -> Injector {
        Injector::default()
    }

    /// Applies `sites`, whose offsets refer to the code as it is now, from low to high offset.
    /// At equal offsets preceding-bound sites go first and following-bound sites last.
    pub fn inject_all(&mut self,
                      code: &mut CodeAttribute,
                      mut sites: Vec<InjectionSite>)
                      -> Result<(), ScanError> {
        sites.sort_by(|a, b| (a.offset, a.binding).cmp(&(b.offset, b.binding)));
        for i in 0..sites.len() {
            let relocation = self.inject(code, &sites[i])?;
            for later in sites[i + 1..].iter_mut() {
                later.offset = relocation.instruction(later.offset)
                    .ok_or(ScanError::NotAnInstruction(later.offset))?;
                if let Binding::Inner { from } = later.binding {
                    let from = relocation.instruction(from)
                        .ok_or(ScanError::NotAnInstruction(from))?;
                    later.binding = Binding::Inner { from };
                }
            }
        }
        Ok(())
    }

    /// Inserts one sequence and fixes up everything that holds a code offset.
    pub fn inject(&mut self,
                  code: &mut CodeAttribute,
                  site: &InjectionSite)
                  -> Result<Relocation, ScanError> {
        let insns = scanner::scan(&code.code)?;
        let relocation = self.splice(&mut code.code, &insns, site)?;
        relocate_side_tables(code, &relocation)?;
        trace!("injected {} bytes at {} ({:?})", site.code.len(), site.offset, site.binding);
        Ok(relocation)
    }

    fn splice(&mut self,
              code: &mut Vec<u8>,
              insns: &[Insn],
              site: &InjectionSite)
              -> Result<Relocation, ScanError> {
        let old_len = code.len();
        if site.offset != old_len && !insns.iter().any(|insn| insn.offset == site.offset) {
            return Err(ScanError::NotAnInstruction(site.offset));
        }

        let mut positions = vec![None; old_len + 1];
        let mut branches = Vec::with_capacity(insns.len());
        let mut inject_at = 0;
        let mut pos = 0;
        for insn in insns {
            if insn.offset == site.offset {
                inject_at = pos;
                pos += site.code.len();
            }
            positions[insn.offset] = Some(pos);
            let branch = scanner::decode_branch(code, insn);
            pos += match branch {
                Branch::Table { .. } | Branch::Lookup { .. } => {
                    1 + scanner::switch_padding(pos) + branch.switch_body_len()
                },
                _ => insn.len
            };
            branches.push(branch);
        }
        if site.offset == old_len {
            inject_at = pos;
            pos += site.code.len();
        }
        positions[old_len] = Some(pos);
        if pos > MAX_CODE_LENGTH {
            return Err(ScanError::CodeTooLarge(pos));
        }

        let relocation = Relocation {
            positions,
            insert_at: site.offset,
            inject_at,
            binding: site.binding,
        };
        self.buffer.reset(pos);
        for (insn, branch) in insns.iter().zip(branches.iter()) {
            if insn.offset == site.offset {
                self.buffer.put_bytes(&site.code);
            }
            let here = self.buffer.len();
            let new_target = |rel: i64| -> Result<i64, ScanError> {
                let old_target = insn.offset as i64 + rel;
                let bad = ScanError::BadBranchTarget { offset: insn.offset, target: old_target };
                if old_target < 0 || old_target >= old_len as i64 {
                    return Err(bad);
                }
                match relocation.branch_target(insn.offset, old_target as usize) {
                    Some(target) => Ok(target as i64 - here as i64),
                    None => Err(bad)
                }
            };
            match branch {
                Branch::None => self.buffer.put_bytes(&code[insn.offset..insn.offset + insn.len]),
                Branch::Short(rel) => {
                    let delta = new_target(*rel as i64)?;
                    if delta < i16::MIN as i64 || delta > i16::MAX as i64 {
                        return Err(ScanError::BranchOverflow { offset: insn.offset, delta });
                    }
                    self.buffer.put_u1(insn.opcode);
                    self.buffer.put_s2(delta as i16);
                },
                Branch::Wide(rel) => {
                    let delta = new_target(*rel as i64)?;
                    self.buffer.put_u1(insn.opcode);
                    self.buffer.put_s4(delta as i32);
                },
                Branch::Table { default, low, high, targets } => {
                    self.put_switch_header(insn.opcode, here);
                    self.buffer.put_s4(new_target(*default as i64)? as i32);
                    self.buffer.put_s4(*low);
                    self.buffer.put_s4(*high);
                    for target in targets {
                        self.buffer.put_s4(new_target(*target as i64)? as i32);
                    }
                },
                Branch::Lookup { default, pairs } => {
                    self.put_switch_header(insn.opcode, here);
                    self.buffer.put_s4(new_target(*default as i64)? as i32);
                    self.buffer.put_s4(pairs.len() as i32);
                    for (key, target) in pairs {
                        self.buffer.put_s4(*key);
                        self.buffer.put_s4(new_target(*target as i64)? as i32);
                    }
                }
            }
        }
        if site.offset == old_len {
            self.buffer.put_bytes(&site.code);
        }
        debug_assert_eq!(self.buffer.len(), pos);
        self.buffer.swap_into(code);
        Ok(relocation)
    }

    fn put_switch_header(&mut self, opcode: u8, here: usize) {
        self.buffer.put_u1(opcode);
        for _ in 0..scanner::switch_padding(here) {
            self.buffer.put_u1(NOP);
        }
    }
}

fn relocate_side_tables(code: &mut CodeAttribute,
                        relocation: &Relocation)
                        -> Result<(), ScanError> {
    let point = |old: u16| -> Result<u16, ScanError> {
        relocation.target(old as usize)
            .map(|new| new as u16)
            .ok_or(ScanError::NotAnInstruction(old as usize))
    };
    for handler in code.exception_table.iter_mut() {
        handler.start_pc = point(handler.start_pc)?;
        handler.end_pc = point(handler.end_pc)?;
        handler.handler_pc = point(handler.handler_pc)?;
    }
    for attribute in code.attributes.iter_mut() {
        match attribute {
            CodeSubAttribute::LineNumberTable { table, .. } => {
                for entry in table.iter_mut() {
                    entry.start_pc = point(entry.start_pc)?;
                }
            },
            CodeSubAttribute::LocalVariables { table, .. } => {
                for entry in table.iter_mut() {
                    let start = point(entry.start_pc)?;
                    let end = entry.start_pc.checked_add(entry.length)
                        .ok_or(ScanError::BadAttribute("LocalVariableTable"))?;
                    let end = point(end)?;
                    entry.start_pc = start;
                    entry.length = end - start;
                }
            },
            CodeSubAttribute::StackMapTable { frames, .. } => relocate_frames(frames, relocation)?,
            _ => {}
        }
    }
    Ok(())
}

fn relocate_frames(frames: &mut Vec<StackMapFrame>,
                   relocation: &Relocation)
                   -> Result<(), ScanError> {
    let bad = || ScanError::BadAttribute("StackMapTable");
    let mut old_offset: i64 = -1;
    let mut new_offset: i64 = -1;
    for frame in std::mem::take(frames) {
        old_offset += frame.offset_delta() as i64 + 1;
        let mut frame = frame;
        for vt in frame.verification_types_mut() {
            if let VerificationType::Uninitialized { offset } = vt {
                *offset = relocation.instruction(*offset as usize).ok_or_else(bad)? as u16;
            }
        }
        let old = old_offset as usize;
        let target = relocation.target(old).ok_or_else(bad)? as i64;
        if old == relocation.insert_at && matches!(relocation.binding, Binding::Inner { .. }) {
            // the new code is a branch target as well and starts in the same state
            let inject_at = relocation.inject_at as i64;
            let repeat = repeat_frame(&frame);
            frames.push(frame.with_offset_delta((inject_at - new_offset - 1) as u16));
            frames.push(repeat.with_offset_delta((target - inject_at - 1) as u16));
        } else {
            frames.push(frame.with_offset_delta((target - new_offset - 1) as u16));
        }
        new_offset = target;
    }
    Ok(())
}

/// A frame describing the same state as `frame`, to follow it directly.
fn repeat_frame(frame: &StackMapFrame) -> StackMapFrame {
    match frame {
        StackMapFrame::SameLocals1StackItemFrame { stack, .. }
        | StackMapFrame::SameLocals1StackItemFrameExtended { stack, .. } => {
            StackMapFrame::SameLocals1StackItemFrameExtended { offset_delta: 0, stack: *stack }
        },
        StackMapFrame::FullFrame { locals, stack, .. } => {
            StackMapFrame::FullFrame {
                offset_delta: 0,
                locals: locals.clone(),
                stack: stack.clone(),
            }
        },
        _ => StackMapFrame::SameFrameExtended { offset_delta: 0 },
    }
}
