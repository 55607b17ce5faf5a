//! Read-only analyses of a method's code: where allocations and calls happen, which offsets
//! begin a source line, and whether a body is trivial.

use crate::bytecode::classfile::{CodeAttribute, ConstantPool, MemberRef};
use crate::bytecode::opcodes::{self, *};
use crate::bytecode::scanner::{self, get_u1, get_u2, Insn};
use crate::error::ScanError;

/// An allocation instruction and the class it instantiates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedClass {
    pub bci: usize,
    pub class_name: String,
}

/// Every `new`, `newarray`, `anewarray` and `multianewarray` of `code`, in bytecode order.
/// Array classes are named by their descriptor, e.g. `[I` or `[Ljava/lang/String;`.
pub fn allocation_sites(code: &[u8], cp: &ConstantPool) -> Result<Vec<AllocatedClass>, ScanError> {
    let mut sites = vec![];
    for insn in scanner::scan(code)? {
        if !opcodes::is_allocation(insn.opcode) {
            continue;
        }
        let class_name = match insn.opcode {
            NEW | MULTIANEWARRAY => cp.class_name(get_u2(code, insn.offset + 1)),
            ANEWARRAY => cp.class_name(get_u2(code, insn.offset + 1)).map(|element| {
                if element.starts_with('[') {
                    format!("[{}", element)
                } else {
                    format!("[L{};", element)
                }
            }),
            NEWARRAY => {
                opcodes::primitive_array_name(get_u1(code, insn.offset + 1)).map(str::to_owned)
            },
            _ => continue
        };
        match class_name {
            Some(class_name) => sites.push(AllocatedClass { bci: insn.offset, class_name }),
            None => warn!("allocation at {} has an unresolvable class operand", insn.offset)
        }
    }
    Ok(sites)
}

/// A resolved `invokevirtual`, `invokespecial`, `invokestatic` or `invokeinterface`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTarget {
    pub opcode: u8,
    pub member: MemberRef,
}

impl CallTarget {
    /// Whether the call is dispatched on the receiver's runtime class.
    pub fn is_virtual(&self) -> bool {
        self.opcode == INVOKEVIRTUAL || self.opcode == INVOKEINTERFACE
    }
}

pub fn invoke_targets(code: &[u8], cp: &ConstantPool) -> Result<Vec<CallTarget>, ScanError> {
    let mut targets = vec![];
    for insn in scanner::scan(code)? {
        if !opcodes::is_invoke(insn.opcode) {
            continue;
        }
        match cp.member_ref(get_u2(code, insn.offset + 1)) {
            Some(member) => targets.push(CallTarget { opcode: insn.opcode, member }),
            None => warn!("call at {} has an unresolvable method operand", insn.offset)
        }
    }
    Ok(targets)
}

pub fn has_subroutines(insns: &[Insn]) -> bool {
    insns.iter().any(|insn| insn.opcode == JSR || insn.opcode == JSR_W)
}

fn sorted_lines(code: &CodeAttribute) -> Vec<(usize, u16)> {
    let mut lines: Vec<(usize, u16)> = code.line_numbers()
        .map(|l| (l.start_pc as usize, l.line_number))
        .collect();
    lines.sort();
    lines
}

/// First offset attributed to `line`, or to the nearest following line when `line` itself
/// produced no code.
pub fn line_start(code: &CodeAttribute, line: u16) -> Option<usize> {
    let lines = sorted_lines(code);
    let target = lines.iter().map(|(_, l)| *l).filter(|l| *l >= line).min()?;
    lines.iter().filter(|(_, l)| *l == target).map(|(pc, _)| *pc).min()
}

/// Where the code of a source line range starts and where control leaves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionBounds {
    /// First instruction of the lowest line in range.
    pub entry: usize,
    /// Returns inside the range.
    pub returns: Vec<usize>,
    /// First instruction past the range. Only fall-through and branches from inside the range
    /// leave through it; a jump over the range from before it never entered.
    pub end: Option<usize>,
}

/// Bounds of the code between two source lines inclusive, or `None` when no line in range
/// produced code.
pub fn region_bounds(code: &CodeAttribute,
                     insns: &[Insn],
                     start_line: u16,
                     end_line: u16)
                     -> Option<RegionBounds> {
    let lines = sorted_lines(code);
    let in_range = |line: u16| line >= start_line && line <= end_line;
    let first_line = lines.iter().map(|(_, l)| *l).filter(|l| in_range(*l)).min()?;
    let entry = lines.iter().filter(|(_, l)| *l == first_line).map(|(pc, _)| *pc).min()?;

    let line_of = |offset: usize| {
        lines.iter().take_while(|(pc, _)| *pc <= offset).last().map(|(_, l)| *l)
    };
    let mut returns = vec![];
    let mut last_in_region = None;
    for (i, insn) in insns.iter().enumerate() {
        if insn.offset < entry || !line_of(insn.offset).map_or(false, in_range) {
            continue;
        }
        if opcodes::is_return(insn.opcode) {
            returns.push(insn.offset);
        }
        last_in_region = Some(i);
    }
    let end = last_in_region.and_then(|i| insns.get(i + 1)).map(|next| next.offset);
    Some(RegionBounds { entry, returns, end })
}

/// `return` alone.
pub fn is_empty_method(code: &[u8]) -> bool {
    code == [RETURN]
}

/// A plain field read or write: `[aload_0] get*; xreturn` or `aload_0; xload_1; putfield; return`.
pub fn is_getter_or_setter(code: &[u8]) -> bool {
    const GETFIELD_GETTER: usize = 5;
    const GETSTATIC_GETTER: usize = 4;
    match code.len() {
        GETFIELD_GETTER => {
            code[0] == ALOAD_0
                && code[1] == GETFIELD
                && opcodes::is_return(code[4])
                && code[4] != RETURN
        },
        GETSTATIC_GETTER => {
            code[0] == GETSTATIC && opcodes::is_return(code[3]) && code[3] != RETURN
        },
        6 => {
            code[0] == ALOAD_0
                && [ILOAD_1, LLOAD_1, FLOAD_1, DLOAD_1, ALOAD_1].contains(&code[1])
                && code[2] == PUTFIELD
                && code[5] == RETURN
        },
        _ => false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::classfile::{CodeSubAttribute, LineNumber};

    fn with_lines(code: Vec<u8>, lines: &[(u16, u16)]) -> CodeAttribute {
        CodeAttribute {
            name_index: 1,
            max_stack: 2,
            max_locals: 1,
            code,
            exception_table: vec![],
            attributes: vec![CodeSubAttribute::LineNumberTable {
                name_index: 2,
                table: lines.iter()
                    .map(|&(start_pc, line_number)| LineNumber { start_pc, line_number })
                    .collect()
            }]
        }
    }

    #[test]
    fn test_region_bounds() {
        // line 10: 0 iconst_0, 1 istore_0 (0x3b) ; line 11: 2 iinc ; line 12: 5 return
        let lines = [(0, 10), (2, 11), (5, 12)];
        let code = with_lines(vec![ICONST_0, 0x3b, IINC, 0, 1, RETURN], &lines);
        let insns = scanner::scan(&code.code).unwrap();
        assert_eq!(region_bounds(&code, &insns, 11, 11),
                   Some(RegionBounds { entry: 2, returns: vec![], end: Some(5) }));
        assert_eq!(region_bounds(&code, &insns, 10, 12),
                   Some(RegionBounds { entry: 0, returns: vec![5], end: None }));
        assert_eq!(region_bounds(&code, &insns, 20, 30), None);
    }

    #[test]
    fn test_line_start_falls_forward() {
        let code = with_lines(vec![ICONST_0, 0x3b, RETURN], &[(0, 10), (2, 14)]);
        assert_eq!(line_start(&code, 10), Some(0));
        assert_eq!(line_start(&code, 12), Some(2));
        assert_eq!(line_start(&code, 15), None);
    }

    #[test]
    fn test_trivial_bodies() {
        assert!(is_empty_method(&[RETURN]));
        assert!(is_getter_or_setter(&[ALOAD_0, GETFIELD, 0, 2, IRETURN]));
        assert!(is_getter_or_setter(&[ALOAD_0, ILOAD_1, PUTFIELD, 0, 2, RETURN]));
        assert!(!is_getter_or_setter(&[ALOAD_0, GETFIELD, 0, 2, RETURN]));
    }
}
