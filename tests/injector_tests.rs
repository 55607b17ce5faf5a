extern crate env_logger;
extern crate profinject;

mod common;

use common::{ClassBuilder, Code, ACC_PUBLIC, ACC_STATIC};
use profinject::bytecode::classfile::*;
use profinject::bytecode::io::reader::ClassReader;
use profinject::bytecode::opcodes::*;
use profinject::error::ScanError;
use profinject::instr::{instrument_method, Binding, Injection, InjectionContext};
use profinject::instr::{InjectionSite, Injector};

const ILOAD_0: u8 = 0x1a;
const STATIC: u16 = ACC_PUBLIC | ACC_STATIC;

fn code_attribute(code: Vec<u8>) -> CodeAttribute {
    CodeAttribute {
        name_index: 1,
        max_stack: 1,
        max_locals: 1,
        code,
        exception_table: vec![],
        attributes: vec![],
    }
}

/// Entry and exit calls to `entry` and `entry + 1`.
fn entry_exit(entry: u16, method_id: u16, exit_handler: bool) -> [Injection; 1] {
    [Injection::EntryExit { entry, exit: entry + 1, method_id, exit_handler }]
}

fn region_of_line(line: u16) -> [Injection; 1] {
    [Injection::CodeRegion { entry: 30, exit: 31, start_line: line, end_line: line }]
}

fn inject(code: &mut CodeAttribute, offset: usize, injected: Vec<u8>, binding: Binding) {
    Injector::new().inject(code, &InjectionSite::new(offset, injected, binding)).unwrap();
}

fn lines_of(code: &CodeAttribute) -> Vec<(u16, u16)> {
    code.line_numbers().map(|l| (l.start_pc, l.line_number)).collect()
}

/// Instruments the first method of `class_bytes` and returns its new Code attribute.
fn instrumented(class_bytes: Vec<u8>,
                ctx: &InjectionContext,
                injections: &[Injection])
                -> CodeAttribute {
    let class = ClassReader::read_binary(class_bytes).unwrap();
    let (cp, method_info) = (&class.constant_pool, class.method_info(0));
    let rewritten = instrument_method(&mut Injector::new(), method_info, cp, ctx, injections)
        .unwrap()
        .unwrap();
    let method = ClassReader::read_method_info(&rewritten, &class.constant_pool).unwrap();
    method.code().cloned().unwrap()
}

fn s4(code: &[u8], pos: usize) -> i32 {
    i32::from_be_bytes([code[pos], code[pos + 1], code[pos + 2], code[pos + 3]])
}

#[test]
fn test_entry_and_exit_around_return() {
    let _ = env_logger::try_init();
    let mut code = code_attribute(vec![ILOAD_0, IRETURN]);
    let sites = vec![
        InjectionSite::new(1, vec![ICONST_0, INVOKESTATIC, 0, 21], Binding::Following),
        InjectionSite::new(0, vec![ICONST_0, INVOKESTATIC, 0, 20], Binding::Preceding),
    ];
    Injector::new().inject_all(&mut code, sites).unwrap();
    assert_eq!(code.code, vec![ICONST_0, INVOKESTATIC, 0, 20,
                               ILOAD_0,
                               ICONST_0, INVOKESTATIC, 0, 21,
                               IRETURN]);
}

#[test]
fn test_rewritten_method_reports_new_code_length() {
    let _ = env_logger::try_init();
    let mut builder = ClassBuilder::new("demo/Ident");
    builder.method(STATIC, "id", "(I)I", Code::new(vec![ILOAD_0, IRETURN]));

    let injections = entry_exit(20, 3, false);
    let code = instrumented(builder.build(), &InjectionContext::default(), &injections);
    assert_eq!(code.code.len(), 10);
    assert_eq!(code.code[9], IRETURN);
    assert_eq!(code.code[0..4], [ICONST_0 + 3, INVOKESTATIC, 0, 20]);
    assert_eq!(code.max_stack, 3);
}

#[test]
fn test_backward_branch_to_insertion_point() {
    let _ = env_logger::try_init();
    // 0: nop, 1: goto 0
    let original = vec![NOP, GOTO, 0xff, 0xff];

    let mut preceding = code_attribute(original.clone());
    let site = InjectionSite::new(0, vec![NOP, NOP, NOP], Binding::Preceding);
    Injector::new().inject(&mut preceding, &site).unwrap();
    assert_eq!(preceding.code, vec![NOP, NOP, NOP, NOP, GOTO, 0xff, 0xff]);

    let mut following = code_attribute(original);
    let site = InjectionSite::new(0, vec![NOP, NOP, NOP], Binding::Following);
    Injector::new().inject(&mut following, &site).unwrap();
    assert_eq!(following.code, vec![NOP, NOP, NOP, NOP, GOTO, 0xff, 0xfc]);
}

#[test]
fn test_forward_branch_over_insertion() {
    let _ = env_logger::try_init();
    // 0: iload_0, 1: ifeq 6, 4: nop, 5: nop, 6: return
    let mut code = code_attribute(vec![ILOAD_0, IFEQ, 0, 5, NOP, NOP, RETURN]);
    inject(&mut code, 5, vec![NOP; 4], Binding::Following);
    assert_eq!(code.code[1..4], [IFEQ, 0, 9]);
    assert_eq!(code.code.len(), 11);
}

#[test]
fn test_exception_range_grows_with_inner_insertion() {
    let _ = env_logger::try_init();
    let mut code = code_attribute(vec![NOP, NOP, NOP, RETURN, ATHROW]);
    let handler = ExceptionHandler { start_pc: 0, end_pc: 3, handler_pc: 4, catch_type: 0 };
    code.exception_table.push(handler);
    inject(&mut code, 1, vec![NOP, NOP], Binding::Following);
    let expected = ExceptionHandler { start_pc: 0, end_pc: 5, handler_pc: 6, catch_type: 0 };
    assert_eq!(code.exception_table[0], expected);
}

#[test]
fn test_exception_bounds_at_insertion_point() {
    let _ = env_logger::try_init();
    let handler = |start_pc, end_pc, handler_pc| {
        ExceptionHandler { start_pc, end_pc, handler_pc, catch_type: 0 }
    };
    let relocated = |binding| {
        // 0: nop, 1: nop, 2: nop, 3: athrow; two nops go in at 1
        let mut code = code_attribute(vec![NOP, NOP, NOP, ATHROW]);
        code.exception_table.push(handler(0, 1, 1));
        code.exception_table.push(handler(1, 2, 3));
        inject(&mut code, 1, vec![NOP, NOP], binding);
        code.exception_table
    };

    // the range ending at 1 keeps the new code out and the handler at 1 starts with it
    assert_eq!(relocated(Binding::Following), vec![handler(0, 1, 1), handler(1, 4, 5)]);
    // the new code joins the range ending at 1 and the handler skips it
    assert_eq!(relocated(Binding::Preceding), vec![handler(0, 3, 3), handler(3, 4, 5)]);
    assert_eq!(relocated(Binding::Inner { from: 0 }), vec![handler(0, 3, 3), handler(3, 4, 5)]);
}

#[test]
fn test_tableswitch_padding_is_recomputed() {
    let _ = env_logger::try_init();
    // 0: iload_0, 1: tableswitch (2 padding bytes) default 20, 0 -> 21; 20: return, 21: return
    let mut original = vec![ILOAD_0, TABLESWITCH, 0, 0];
    original.extend_from_slice(&19i32.to_be_bytes());
    original.extend_from_slice(&0i32.to_be_bytes());
    original.extend_from_slice(&0i32.to_be_bytes());
    original.extend_from_slice(&20i32.to_be_bytes());
    original.extend_from_slice(&[RETURN, RETURN]);
    assert_eq!(original.len(), 22);

    let mut code = code_attribute(original);
    inject(&mut code, 0, vec![NOP], Binding::Preceding);
    let code = code.code;
    assert_eq!(code.len(), 22);
    assert_eq!(code[2], TABLESWITCH);
    assert_eq!(code[3], NOP);
    assert_eq!(s4(&code, 4), 18);
    assert_eq!(s4(&code, 16), 19);
    assert_eq!(code[20..], [RETURN, RETURN]);
}

#[test]
fn test_lookupswitch_padding_is_recomputed() {
    let _ = env_logger::try_init();
    // 0: iload_0, 1: lookupswitch (2 padding bytes) default 20, 5 -> 21; 20: return, 21: return
    let mut original = vec![ILOAD_0, LOOKUPSWITCH, 0, 0];
    original.extend_from_slice(&19i32.to_be_bytes());
    original.extend_from_slice(&1i32.to_be_bytes());
    original.extend_from_slice(&5i32.to_be_bytes());
    original.extend_from_slice(&20i32.to_be_bytes());
    original.extend_from_slice(&[RETURN, RETURN]);
    assert_eq!(original.len(), 22);

    let mut code = code_attribute(original);
    inject(&mut code, 0, vec![NOP], Binding::Preceding);
    let code = code.code;
    assert_eq!(code.len(), 22);
    assert_eq!(code[2], LOOKUPSWITCH);
    assert_eq!(code[3], NOP);
    assert_eq!(s4(&code, 4), 18);
    assert_eq!(s4(&code, 8), 1);
    assert_eq!(s4(&code, 12), 5);
    assert_eq!(s4(&code, 16), 19);
    assert_eq!(code[20..], [RETURN, RETURN]);
}

#[test]
fn test_short_branch_overflow() {
    let _ = env_logger::try_init();
    let mut original = vec![ILOAD_0, IFEQ];
    original.extend_from_slice(&32760i16.to_be_bytes());
    original.resize(32761, NOP);
    original.push(RETURN);

    let mut code = code_attribute(original);
    let site = InjectionSite::new(4, vec![NOP; 100], Binding::Preceding);
    let result = Injector::new().inject(&mut code, &site);
    assert_eq!(result.unwrap_err(), ScanError::BranchOverflow { offset: 1, delta: 32860 });
}

#[test]
fn test_code_too_large() {
    let _ = env_logger::try_init();
    let mut original = vec![NOP; 65530];
    original.push(RETURN);
    let mut code = code_attribute(original);
    let site = InjectionSite::new(0, vec![NOP; 10], Binding::Preceding);
    let result = Injector::new().inject(&mut code, &site);
    assert_eq!(result.unwrap_err(), ScanError::CodeTooLarge(65541));
}

#[test]
fn test_line_and_local_variable_tables() {
    let _ = env_logger::try_init();
    let mut code = code_attribute(vec![NOP, NOP, RETURN]);
    code.attributes.push(CodeSubAttribute::LineNumberTable {
        name_index: 2,
        table: vec![
            LineNumber { start_pc: 0, line_number: 10 },
            LineNumber { start_pc: 2, line_number: 11 },
        ],
    });
    code.attributes.push(CodeSubAttribute::LocalVariables {
        name_index: 3,
        table: vec![LocalVariable {
            start_pc: 0,
            length: 3,
            name_index: 4,
            descriptor_index: 5,
            index: 0,
        }],
    });
    inject(&mut code, 2, vec![NOP, NOP, NOP], Binding::Following);

    assert_eq!(lines_of(&code), vec![(0, 10), (2, 11)]);
    match code.attributes[1] {
        CodeSubAttribute::LocalVariables { ref table, .. } => {
            assert_eq!((table[0].start_pc, table[0].length), (0, 6))
        },
        ref other => panic!("unexpected attribute {:?}", other),
    }
}

#[test]
fn test_exit_handler_adds_frame_and_catch_all() {
    let _ = env_logger::try_init();
    let mut builder = ClassBuilder::new("demo/Handler");
    let stack_map_name = builder.utf8("StackMapTable");
    let throwable = builder.class("java/lang/Throwable");
    builder.method(STATIC, "run", "()V", Code::new(vec![NOP, RETURN]));

    let ctx = InjectionContext {
        stack_maps: true,
        stack_map_name: Some(stack_map_name),
        throwable_class: Some(throwable),
    };
    let injections = entry_exit(30, 0, true);
    let code = instrumented(builder.build(), &ctx, &injections);

    // entry(4) nop exit(4) return | exit(4) athrow
    assert_eq!(code.code.len(), 15);
    assert_eq!(code.code[10..], [ICONST_0, INVOKESTATIC, 0, 31, ATHROW]);
    let catch_all = ExceptionHandler { start_pc: 0, end_pc: 10, handler_pc: 10, catch_type: 0 };
    assert_eq!(code.exception_table, vec![catch_all]);
    assert!(code.max_stack >= 2);
    let frames = code.attributes.iter().find_map(|attr| match attr {
        CodeSubAttribute::StackMapTable { frames, .. } => Some(frames.clone()),
        _ => None
    });
    assert_eq!(frames, Some(vec![StackMapFrame::FullFrame {
        offset_delta: 10,
        locals: vec![],
        stack: vec![VerificationType::Object { cpool_index: throwable }],
    }]));
}

#[test]
fn test_unknown_opcode_fails_the_method() {
    let _ = env_logger::try_init();
    let mut builder = ClassBuilder::new("demo/Broken");
    builder.method(STATIC, "bad", "()V", Code::new(vec![0xcb, RETURN]));
    let class = ClassReader::read_binary(builder.build()).unwrap();
    let injections = entry_exit(20, 0, false);
    let result = instrument_method(&mut Injector::new(),
                                   class.method_info(0),
                                   &class.constant_pool,
                                   &InjectionContext::default(),
                                   &injections);
    assert_eq!(result.unwrap_err(), ScanError::UnknownOpcode { opcode: 0xcb, offset: 0 });
}

#[test]
fn test_existing_handler_and_frame_follow_their_code() {
    let _ = env_logger::try_init();
    // 0: iload_0, 1: ifeq 5, 4: nop, 5: return; a frame and a handler at the return
    let mut builder = ClassBuilder::new("demo/Tables");
    let body = Code::new(vec![ILOAD_0, IFEQ, 0, 4, NOP, RETURN])
        .handler(0, 4, 5, 0)
        .stack_map(vec![0, 1, 5]);
    builder.method(STATIC, "run", "(Z)V", body);

    let injections = entry_exit(20, 0, false);
    let code = instrumented(builder.build(), &InjectionContext::default(), &injections);
    assert_eq!(code.code, vec![ICONST_0, INVOKESTATIC, 0, 20, ILOAD_0, IFEQ, 0, 4, NOP,
                               ICONST_0, INVOKESTATIC, 0, 21, RETURN]);
    let handler = ExceptionHandler { start_pc: 4, end_pc: 8, handler_pc: 9, catch_type: 0 };
    assert_eq!(code.exception_table, vec![handler]);
    let frames = code.attributes.iter().find_map(|attr| match attr {
        CodeSubAttribute::StackMapTable { frames, .. } => Some(frames.clone()),
        _ => None
    });
    assert_eq!(frames, Some(vec![StackMapFrame::SameFrame { tag: 9 }]));
}

#[test]
fn test_exit_handler_without_frames_before_java_6() {
    let _ = env_logger::try_init();
    let mut builder = ClassBuilder::new("demo/Legacy").major(49);
    builder.method(STATIC, "run", "()V", Code::new(vec![RETURN]));
    let bytes = builder.build();
    let stack_maps = ClassReader::read_binary(bytes.clone()).unwrap().requires_stack_maps();
    assert!(!stack_maps);

    let ctx = InjectionContext { stack_maps, stack_map_name: None, throwable_class: None };
    let injections = entry_exit(30, 1, true);
    let code = instrumented(bytes, &ctx, &injections);
    assert_eq!(code.code[9..], [ICONST_0 + 1, INVOKESTATIC, 0, 31, ATHROW]);
    assert_eq!(code.exception_table.len(), 1);
    let has_frames = code.attributes.iter()
        .any(|attr| matches!(attr, CodeSubAttribute::StackMapTable { .. }));
    assert!(!has_frames);
}

#[test]
fn test_method_id_above_short_range() {
    let _ = env_logger::try_init();
    let mut builder = ClassBuilder::new("demo/Many");
    builder.method(STATIC, "run", "()V", Code::new(vec![RETURN]));

    let injections = entry_exit(20, 40000, false);
    let code = instrumented(builder.build(), &InjectionContext::default(), &injections);
    // sipush pushes -25536, i2c narrows it back to 40000
    assert_eq!(code.code, vec![SIPUSH, 0x9C, 0x40, I2C, INVOKESTATIC, 0, 20,
                               SIPUSH, 0x9C, 0x40, I2C, INVOKESTATIC, 0, 21,
                               RETURN]);
}

#[test]
fn test_region_exit_skipped_by_jump_over_region() {
    let _ = env_logger::try_init();
    // line 10: iload_0, ifeq 5 | line 11: nop | line 12: return
    let mut builder = ClassBuilder::new("demo/Guard");
    let body = Code::new(vec![ILOAD_0, IFEQ, 0, 4, NOP, RETURN])
        .lines(&[(0, 10), (4, 11), (5, 12)]);
    builder.method(STATIC, "run", "(Z)V", body);

    let injections = region_of_line(11);
    let code = instrumented(builder.build(), &InjectionContext::default(), &injections);
    // the guard jumps straight to the return, past both calls
    assert_eq!(code.code, vec![ILOAD_0, IFEQ, 0, 10,
                               INVOKESTATIC, 0, 30,
                               NOP,
                               INVOKESTATIC, 0, 31,
                               RETURN]);
    assert_eq!(lines_of(&code), vec![(0, 10), (4, 11), (11, 12)]);
}

#[test]
fn test_region_exit_taken_by_jump_out_of_region() {
    let _ = env_logger::try_init();
    // line 11: iload_0, ifeq 6, nop, nop | line 12: return
    let mut builder = ClassBuilder::new("demo/Leave");
    let body = Code::new(vec![ILOAD_0, IFEQ, 0, 5, NOP, NOP, RETURN]).lines(&[(0, 11), (6, 12)]);
    builder.method(STATIC, "run", "(Z)V", body);

    let injections = region_of_line(11);
    let code = instrumented(builder.build(), &InjectionContext::default(), &injections);
    // the jump from inside the region leaves through the exit call
    assert_eq!(code.code, vec![INVOKESTATIC, 0, 30,
                               ILOAD_0, IFEQ, 0, 5, NOP, NOP,
                               INVOKESTATIC, 0, 31,
                               RETURN]);
}
