//! Turning a list of injections into a rewritten `method_info`.

use crate::bytecode::classfile::*;
use crate::bytecode::io::reader::ClassReader;
use crate::bytecode::io::writer::method_info_bytes;
use crate::bytecode::opcodes::*;
use crate::bytecode::scanner::{self, Insn};
use crate::error::ScanError;
use crate::instr::injector::{Binding, InjectionSite, Injector};
use crate::instr::sites;

/// An allocation instruction to report, with the id of the class it allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationSite {
    pub bci: usize,
    pub class_id: u16,
}

/// What to inject into one method. Call operands are absolute constant pool indices of
/// method references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Injection {
    /// `entry(id)` at the start, `exit(id)` before every return and optionally in a
    /// catch-all handler that rethrows.
    EntryExit { entry: u16, exit: u16, method_id: u16, exit_handler: bool },
    /// `entry()` and `exit()` around the code of a source line range.
    CodeRegion { entry: u16, exit: u16, start_line: u16, end_line: u16 },
    /// `call(local)` at offset 0, passing the reference in local `aload`.
    SpecialCall { call: u16, aload: u8 },
    /// `call(class_id)` before each allocation site.
    Allocations { call: u16, sites: Vec<AllocationSite> },
    /// `call(id)` before the first instruction of each `(line, id)`.
    ProfilePointHits { call: u16, hits: Vec<(u16, u16)> },
}

/// Class level facts the injected code depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InjectionContext {
    /// Whether the class verifies by type checking, so a new handler needs a frame.
    pub stack_maps: bool,
    /// `StackMapTable` utf8, used when a method gains its first frame.
    pub stack_map_name: Option<u16>,
    /// `Class` entry of `java/lang/Throwable`.
    pub throwable_class: Option<u16>,
}

/// Pushes `value` as a char argument. `sipush` sign-extends, so values past `i16::MAX` are
/// narrowed back with `i2c`.
fn push_char(out: &mut Vec<u8>, value: u16) {
    match value {
        0..=5 => out.push(ICONST_0 + value as u8),
        6..=127 => {
            out.push(BIPUSH);
            out.push(value as u8);
        },
        128..=0x7FFF => {
            out.push(SIPUSH);
            out.extend_from_slice(&value.to_be_bytes());
        },
        _ => {
            out.push(SIPUSH);
            out.extend_from_slice(&value.to_be_bytes());
            out.push(I2C);
        }
    }
}

fn invoke_static(out: &mut Vec<u8>, method_ref: u16) {
    out.push(INVOKESTATIC);
    out.extend_from_slice(&method_ref.to_be_bytes());
}

fn call_with_char(method_ref: u16, value: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(6);
    push_char(&mut out, value);
    invoke_static(&mut out, method_ref);
    out
}

fn plain_call(method_ref: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(3);
    invoke_static(&mut out, method_ref);
    out
}

/// Decodes `method_info`, applies `injections` to its code and returns the re-encoded method.
/// Site offsets are all taken from the code as passed in, so `method_info` must be the
/// original, uninstrumented method. Returns `None` when no injection found a site.
pub fn instrument_method(injector: &mut Injector,
                         method_info: &[u8],
                         cp: &ConstantPool,
                         ctx: &InjectionContext,
                         injections: &[Injection])
                         -> Result<Option<Vec<u8>>, ScanError> {
    let mut method = ClassReader::read_method_info(method_info, cp)?;
    let code = method.code_mut().ok_or(ScanError::BadAttribute("Code"))?;
    let insns = scanner::scan(&code.code)?;

    let mut sites = vec![];
    let mut handler = None;
    for injection in injections {
        collect_sites(code, &insns, injection, &mut sites, &mut handler);
    }
    if sites.is_empty() && handler.is_none() {
        return Ok(None);
    }

    code.attributes.retain(|attr| !matches!(attr, CodeSubAttribute::TypeAnnotations { .. }));
    injector.inject_all(code, sites)?;
    code.max_stack = code.max_stack.saturating_add(1);
    if let Some((method_id, exit)) = handler {
        append_exit_handler(code, ctx, method_id, exit)?;
    }
    Ok(Some(method_info_bytes(&method)))
}

fn collect_sites(code: &CodeAttribute,
                 insns: &[Insn],
                 injection: &Injection,
                 sites: &mut Vec<InjectionSite>,
                 handler: &mut Option<(u16, u16)>) {
    match injection {
        Injection::EntryExit { entry, exit, method_id, exit_handler } => {
            let call = call_with_char(*entry, *method_id);
            sites.push(InjectionSite::new(0, call, Binding::Preceding));
            for insn in insns.iter().filter(|insn| is_return(insn.opcode)) {
                let call = call_with_char(*exit, *method_id);
                sites.push(InjectionSite::new(insn.offset, call, Binding::Following));
            }
            if *exit_handler {
                if sites::has_subroutines(insns) {
                    debug!("no exit handler for method {}: it uses jsr", method_id);
                } else {
                    *handler = Some((*method_id, *exit));
                }
            }
        },
        Injection::CodeRegion { entry, exit, start_line, end_line } => {
            match sites::region_bounds(code, insns, *start_line, *end_line) {
                Some(bounds) => {
                    let following = |offset, method_ref| {
                        InjectionSite::new(offset, plain_call(method_ref), Binding::Following)
                    };
                    sites.push(following(bounds.entry, *entry));
                    for offset in bounds.returns {
                        sites.push(following(offset, *exit));
                    }
                    if let Some(end) = bounds.end {
                        let binding = Binding::Inner { from: bounds.entry };
                        sites.push(InjectionSite::new(end, plain_call(*exit), binding));
                    }
                },
                None => debug!("no code for lines {}..={}", start_line, end_line)
            }
        },
        Injection::SpecialCall { call, aload } => {
            let mut out = vec![ALOAD_0 + aload];
            invoke_static(&mut out, *call);
            sites.push(InjectionSite::new(0, out, Binding::Preceding));
        },
        Injection::Allocations { call, sites: allocations } => {
            for site in allocations {
                let call = call_with_char(*call, site.class_id);
                sites.push(InjectionSite::new(site.bci, call, Binding::Following));
            }
        },
        Injection::ProfilePointHits { call, hits } => {
            for (line, id) in hits {
                match sites::line_start(code, *line) {
                    Some(offset) => {
                        let call = call_with_char(*call, *id);
                        sites.push(InjectionSite::new(offset, call, Binding::Following))
                    },
                    None => warn!("profile point {} at line {} has no code", id, line)
                }
            }
        }
    }
}

/// Appends `exit(id); athrow` as a catch-all handler over the whole original body.
fn append_exit_handler(code: &mut CodeAttribute,
                       ctx: &InjectionContext,
                       method_id: u16,
                       exit: u16)
                       -> Result<(), ScanError> {
    let needs_frame = ctx.stack_maps;
    let (stack_map_name, throwable_class) = match (ctx.stack_map_name, ctx.throwable_class) {
        (Some(name), Some(class)) => (name, class),
        _ if needs_frame => {
            warn!("no exit handler for method {}: stack map entries unavailable", method_id);
            return Ok(());
        },
        _ => (0, 0)
    };

    let handler_pc = code.code.len();
    let mut handler = call_with_char(exit, method_id);
    handler.push(ATHROW);
    if handler_pc + handler.len() > 0xFFFF {
        return Err(ScanError::CodeTooLarge(handler_pc + handler.len()));
    }
    code.code.extend_from_slice(&handler);
    code.exception_table.push(ExceptionHandler {
        start_pc: 0,
        end_pc: handler_pc as u16,
        handler_pc: handler_pc as u16,
        catch_type: 0,
    });
    code.max_stack = code.max_stack.max(2);

    if needs_frame {
        let frame = |last: Option<usize>| StackMapFrame::FullFrame {
            offset_delta: match last {
                Some(last) => (handler_pc - last - 1) as u16,
                None => handler_pc as u16,
            },
            locals: vec![],
            stack: vec![VerificationType::Object { cpool_index: throwable_class }],
        };
        match code.stack_map_mut() {
            Some(frames) => {
                let last = frames.iter().fold(None, |last: Option<usize>, f| {
                    Some(last.map_or(0, |l| l + 1) + f.offset_delta() as usize)
                });
                frames.push(frame(last));
            },
            None => {
                code.attributes.push(CodeSubAttribute::StackMapTable {
                    name_index: stack_map_name,
                    frames: vec![frame(None)],
                })
            }
        }
    }
    Ok(())
}
