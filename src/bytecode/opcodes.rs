//! Opcode values and fixed instruction lengths.

pub const NOP: u8 = 0x00;
pub const ICONST_0: u8 = 0x03;
pub const BIPUSH: u8 = 0x10;
pub const SIPUSH: u8 = 0x11;
pub const ILOAD: u8 = 0x15;
pub const LLOAD: u8 = 0x16;
pub const FLOAD: u8 = 0x17;
pub const DLOAD: u8 = 0x18;
pub const ALOAD: u8 = 0x19;
pub const ILOAD_1: u8 = 0x1b;
pub const LLOAD_1: u8 = 0x1f;
pub const FLOAD_1: u8 = 0x23;
pub const DLOAD_1: u8 = 0x27;
pub const ALOAD_0: u8 = 0x2a;
pub const ALOAD_1: u8 = 0x2b;
pub const ISTORE: u8 = 0x36;
pub const ASTORE: u8 = 0x3a;
pub const POP: u8 = 0x57;
pub const DUP: u8 = 0x59;
pub const IINC: u8 = 0x84;
pub const I2C: u8 = 0x92;
pub const IFEQ: u8 = 0x99;
pub const IFNE: u8 = 0x9a;
pub const IF_ICMPLT: u8 = 0xa1;
pub const IF_ACMPNE: u8 = 0xa6;
pub const GOTO: u8 = 0xa7;
pub const JSR: u8 = 0xa8;
pub const RET: u8 = 0xa9;
pub const TABLESWITCH: u8 = 0xaa;
pub const LOOKUPSWITCH: u8 = 0xab;
pub const IRETURN: u8 = 0xac;
pub const LRETURN: u8 = 0xad;
pub const FRETURN: u8 = 0xae;
pub const DRETURN: u8 = 0xaf;
pub const ARETURN: u8 = 0xb0;
pub const RETURN: u8 = 0xb1;
pub const GETSTATIC: u8 = 0xb2;
pub const PUTSTATIC: u8 = 0xb3;
pub const GETFIELD: u8 = 0xb4;
pub const PUTFIELD: u8 = 0xb5;
pub const INVOKEVIRTUAL: u8 = 0xb6;
pub const INVOKESPECIAL: u8 = 0xb7;
pub const INVOKESTATIC: u8 = 0xb8;
pub const INVOKEINTERFACE: u8 = 0xb9;
pub const INVOKEDYNAMIC: u8 = 0xba;
pub const NEW: u8 = 0xbb;
pub const NEWARRAY: u8 = 0xbc;
pub const ANEWARRAY: u8 = 0xbd;
pub const ATHROW: u8 = 0xbf;
pub const WIDE: u8 = 0xc4;
pub const MULTIANEWARRAY: u8 = 0xc5;
pub const IFNULL: u8 = 0xc6;
pub const IFNONNULL: u8 = 0xc7;
pub const GOTO_W: u8 = 0xc8;
pub const JSR_W: u8 = 0xc9;

/// Length of every fixed-size opcode. Zero marks either a variable-length
/// opcode (`tableswitch`, `lookupswitch`, `wide`) or an undefined one.
const FIXED_LENGTHS: [u8; 256] = {
    let mut table = [0u8; 256];
    let mut op = 0;
    while op <= 0xc9 {
        table[op] = 1;
        op += 1;
    }
    table[BIPUSH as usize] = 2;
    table[SIPUSH as usize] = 3;
    table[0x12] = 2; // ldc
    table[0x13] = 3; // ldc_w
    table[0x14] = 3; // ldc2_w
    let mut op = ILOAD as usize;
    while op <= ALOAD as usize {
        table[op] = 2;
        op += 1;
    }
    let mut op = ISTORE as usize;
    while op <= ASTORE as usize {
        table[op] = 2;
        op += 1;
    }
    table[IINC as usize] = 3;
    let mut op = IFEQ as usize;
    while op <= JSR as usize {
        table[op] = 3;
        op += 1;
    }
    table[RET as usize] = 2;
    table[TABLESWITCH as usize] = 0;
    table[LOOKUPSWITCH as usize] = 0;
    let mut op = GETSTATIC as usize;
    while op <= INVOKESTATIC as usize {
        table[op] = 3;
        op += 1;
    }
    table[INVOKEINTERFACE as usize] = 5;
    table[INVOKEDYNAMIC as usize] = 5;
    table[NEW as usize] = 3;
    table[NEWARRAY as usize] = 2;
    table[ANEWARRAY as usize] = 3;
    table[0xc0] = 3; // checkcast
    table[0xc1] = 3; // instanceof
    table[WIDE as usize] = 0;
    table[MULTIANEWARRAY as usize] = 4;
    table[IFNULL as usize] = 3;
    table[IFNONNULL as usize] = 3;
    table[GOTO_W as usize] = 5;
    table[JSR_W as usize] = 5;
    table
};

/// Fixed length of `opcode`, or `None` for variable-length and undefined opcodes.
pub fn fixed_length(opcode: u8) -> Option<usize> {
    match FIXED_LENGTHS[opcode as usize] {
        0 => None,
        len => Some(len as usize),
    }
}

pub fn is_return(opcode: u8) -> bool {
    (IRETURN..=RETURN).contains(&opcode)
}

/// Conditional branches, `goto` and `jsr` with a two byte relative operand.
pub fn is_short_branch(opcode: u8) -> bool {
    (IFEQ..=JSR).contains(&opcode) || opcode == IFNULL || opcode == IFNONNULL
}

pub fn is_wide_branch(opcode: u8) -> bool {
    opcode == GOTO_W || opcode == JSR_W
}

pub fn is_invoke(opcode: u8) -> bool {
    (INVOKEVIRTUAL..=INVOKEINTERFACE).contains(&opcode)
}

pub fn is_allocation(opcode: u8) -> bool {
    matches!(opcode, NEW | NEWARRAY | ANEWARRAY | MULTIANEWARRAY)
}

/// Array class name allocated by `newarray` for its primitive `atype` operand.
pub fn primitive_array_name(atype: u8) -> Option<&'static str> {
    match atype {
        4 => Some("[Z"),
        5 => Some("[C"),
        6 => Some("[F"),
        7 => Some("[D"),
        8 => Some("[B"),
        9 => Some("[S"),
        10 => Some("[I"),
        11 => Some("[J"),
        _ => None,
    }
}
