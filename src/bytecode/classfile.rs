/// A `ClassBinary` owns the original bytes of one classfile plus the cursors
/// that locate its structural regions. Everything except the constant pool
/// and the method table is kept as opaque bytes, which is what lets a
/// rewritten class stay byte-identical outside the regions the engine touches.
#[derive(Debug, Clone)]
pub struct ClassBinary {
    pub(crate) bytes: Vec<u8>,
    pub version: ClassfileVersion,
    pub constant_pool: ConstantPool,
    /// Offset of the first constant pool entry (just past `constant_pool_count`).
    pub cp_start: usize,
    /// Offset just past the last constant pool entry (`access_flags`).
    pub intermediate_start: usize,
    /// Offset of `methods_count`.
    pub methods_start: usize,
    /// Offset of the class level `attributes_count`.
    pub attributes_start: usize,
    pub access_flags: AccessFlags,
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub methods: Vec<MethodInfoRange>,
}

/// Offset of the `constant_pool_count` field.
pub const CP_COUNT_OFFSET: usize = 8;

impl ClassBinary {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Number of slots in the original constant pool, including the unused slot 0.
    pub fn cp_count(&self) -> u16 {
        self.constant_pool.cp_len() as u16
    }

    /// The original `method_info` bytes of the method at `index`.
    pub fn method_info(&self, index: usize) -> &[u8] {
        let range = &self.methods[index];
        &self.bytes[range.start..range.end]
    }

    /// Recomputes the cursors and decoded tables for `bytes`, which replace the class.
    pub fn reset(&mut self, bytes: Vec<u8>) -> Result<(), crate::error::ClassFormatError> {
        *self = crate::bytecode::io::reader::ClassReader::read_binary(bytes)?;
        Ok(())
    }

    /// Whether methods of this class must carry a `StackMapTable` when they branch.
    pub fn requires_stack_maps(&self) -> bool {
        self.version.major_version >= 50
    }
}

/// Describe a classfile version number.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Clone, Copy)]
pub struct ClassfileVersion {
    pub minor_version: u16,
    pub major_version: u16
}

impl ClassfileVersion {
    pub fn new(major_version: u16, minor_version: u16) -> ClassfileVersion {
        ClassfileVersion { major_version, minor_version }
    }
}

/// Location and identity of one `method_info` inside the original bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfoRange {
    pub start: usize,
    pub end: usize,
    pub access_flags: AccessFlags,
    pub name: String,
    pub descriptor: String,
}

/// A `ConstantPool` is a table of various string and number literal constants that are referred
/// within the substructures of the class. Slot 0 and the second slot of longs and doubles hold
/// `Constant::Placeholder`.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    pub constants: Vec<Constant>
}

impl ConstantPool {
    pub fn new(constants: Vec<Constant>) -> ConstantPool {
        ConstantPool { constants }
    }

    pub fn get(&self, idx: u16) -> Option<&Constant> {
        self.constants.get(idx as usize)
    }

    pub fn get_utf8(&self, idx: u16) -> Option<&[u8]> {
        match self.get(idx) {
            Some(Constant::Utf8(bytes)) => Some(bytes),
            _ => None
        }
    }

    pub fn get_utf8_string(&self, idx: u16) -> Option<String> {
        self.get_utf8(idx).and_then(|bytes| String::from_utf8(bytes.to_vec()).ok())
    }

    /// Name of the class referenced by the `Class` entry at `idx`.
    pub fn class_name(&self, idx: u16) -> Option<String> {
        match self.get(idx) {
            Some(Constant::Class(name_index)) => self.get_utf8_string(*name_index),
            _ => None
        }
    }

    /// Owner, name and descriptor of a field, method or interface method reference.
    pub fn member_ref(&self, idx: u16) -> Option<MemberRef> {
        let (class_index, name_and_type_index) = match self.get(idx) {
            Some(Constant::FieldRef { class_index, name_and_type_index })
            | Some(Constant::MethodRef { class_index, name_and_type_index })
            | Some(Constant::InterfaceMethodRef { class_index, name_and_type_index }) => {
                (*class_index, *name_and_type_index)
            },
            _ => return None
        };
        let (name_index, descriptor_index) = match self.get(name_and_type_index) {
            Some(Constant::NameAndType { name_index, descriptor_index }) => {
                (*name_index, *descriptor_index)
            },
            _ => return None
        };
        Some(MemberRef {
            class_name: self.class_name(class_index)?,
            name: self.get_utf8_string(name_index)?,
            descriptor: self.get_utf8_string(descriptor_index)?,
        })
    }

    pub fn cp_len(&self) -> usize {
        self.constants.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberRef {
    pub class_name: String,
    pub name: String,
    pub descriptor: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Utf8(Vec<u8>),
    Integer(u32),
    Float(u32),
    Long(u64),
    Double(u64),
    Class(u16),
    FieldRef { class_index: u16, name_and_type_index: u16 },
    MethodRef { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodRef { class_index: u16, name_and_type_index: u16 },
    String(u16),
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_kind: u8, reference_index: u16 },
    MethodType(u16),
    Dynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    Module(u16),
    Package(u16),
    Placeholder
}

impl Constant {
    pub fn cp_size(&self) -> usize {
        match self {
            Constant::Long(_) => 2,
            Constant::Double(_) => 2,
            Constant::Placeholder => 0,
            _ => 1
        }
    }
}

pub mod tags {
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELDREF: u8 = 9;
    pub const METHODREF: u8 = 10;
    pub const INTERFACE_METHODREF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
    pub const METHOD_HANDLE: u8 = 15;
    pub const METHOD_TYPE: u8 = 16;
    pub const DYNAMIC: u8 = 17;
    pub const INVOKE_DYNAMIC: u8 = 18;
    pub const MODULE: u8 = 19;
    pub const PACKAGE: u8 = 20;
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessFlags {
    pub flags: u16
}

impl AccessFlags {
    pub fn of(val: u16) -> AccessFlags {
        AccessFlags { flags: val }
    }

    pub fn has_flag(&self, flag: MethodAccessFlags) -> bool {
        self.flags & flag as u16 > 0
    }
}

pub enum MethodAccessFlags {
    Public = 0x0001, //	Declared public; may be accessed from outside its package.
    Private = 0x0002, //	Declared private; accessible only within the defining class.
    Protected = 0x0004, //	Declared protected; may be accessed within subclasses.
    Static = 0x0008, //	Declared static.
    Final = 0x0010, //	Declared final; must not be overridden (§5.4.5).
    Synchronized = 0x0020, //	Declared synchronized; invocation is wrapped by a monitor use.
    Bridge = 0x0040, //	A bridge method, generated by the compiler.
    Varargs = 0x0080, //	Declared with variable number of arguments.
    Native = 0x0100, //	Declared native; implemented in a language other than Java.
    Abstract = 0x0400, //	Declared abstract; no implementation is provided.
    Strict = 0x0800, //	Declared strictfp; floating-point mode is FP-strict.
    Synthetic = 0x1000 //	Declared synthetic; not present in the source code.
}

/// Instrumentation state of one method.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodFlags {
    pub instrumented: bool,
    /// Selectively de-instrumented (some injected sites were withdrawn).
    pub special: bool,
    /// Native or abstract: there is no code to scan.
    pub unscannable: bool,
    pub root: bool,
    pub marker: bool,
}

/// A `MethodRecord` tracks one method of a loaded class across instrumentation passes.
/// Its `method_info` starts out as the slice of the original class bytes and is replaced
/// wholesale whenever the method is rewritten.
#[derive(Debug, Clone)]
pub struct MethodRecord {
    pub index: usize,
    pub name: String,
    pub descriptor: String,
    pub access_flags: AccessFlags,
    pub flags: MethodFlags,
    replacement: Option<Vec<u8>>,
}

impl MethodRecord {
    pub fn new(index: usize, range: &MethodInfoRange) -> MethodRecord {
        let unscannable = range.access_flags.has_flag(MethodAccessFlags::Native)
            || range.access_flags.has_flag(MethodAccessFlags::Abstract);
        MethodRecord {
            index,
            name: range.name.clone(),
            descriptor: range.descriptor.clone(),
            access_flags: range.access_flags,
            flags: MethodFlags { unscannable, ..Default::default() },
            replacement: None,
        }
    }

    /// Current `method_info` bytes: the replacement if there is one, else the original.
    pub fn method_info<'a>(&'a self, class: &'a ClassBinary) -> &'a [u8] {
        match self.replacement {
            Some(ref bytes) => bytes,
            None => class.method_info(self.index),
        }
    }

    pub fn replacement(&self) -> Option<&[u8]> {
        self.replacement.as_deref()
    }

    pub fn set_replacement(&mut self, method_info: Vec<u8>) {
        self.replacement = Some(method_info);
    }

    pub fn clear_replacement(&mut self) {
        self.replacement = None;
    }

    /// Drops the rewritten body and every instrumentation flag.
    pub fn reset(&mut self) {
        self.replacement = None;
        self.flags = MethodFlags { unscannable: self.flags.unscannable, ..Default::default() };
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.has_flag(MethodAccessFlags::Static)
    }

    pub fn signature(&self) -> String {
        format!("{}{}", self.name, self.descriptor)
    }
}

/// A decoded `method_info`. Only the Code attribute is modelled; other attributes are kept as
/// raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    pub access_flags: AccessFlags,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<MethodAttribute>
}

impl MethodInfo {
    pub fn code(&self) -> Option<&CodeAttribute> {
        self.attributes.iter().find_map(|attr| match attr {
            MethodAttribute::Code(code) => Some(code),
            _ => None
        })
    }

    pub fn code_mut(&mut self) -> Option<&mut CodeAttribute> {
        self.attributes.iter_mut().find_map(|attr| match attr {
            MethodAttribute::Code(code) => Some(code),
            _ => None
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MethodAttribute {
    Code(CodeAttribute),
    Raw { name_index: u16, info: Vec<u8> }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeAttribute {
    pub name_index: u16,
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<CodeSubAttribute>
}

impl CodeAttribute {
    pub fn line_numbers(&self) -> impl Iterator<Item = &LineNumber> {
        self.attributes.iter().flat_map(|attr| match attr {
            CodeSubAttribute::LineNumberTable { table, .. } => table.as_slice(),
            _ => &[][..]
        })
    }

    pub fn stack_map_mut(&mut self) -> Option<&mut Vec<StackMapFrame>> {
        self.attributes.iter_mut().find_map(|attr| match attr {
            CodeSubAttribute::StackMapTable { frames, .. } => Some(frames),
            _ => None
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CodeSubAttribute {
    LineNumberTable { name_index: u16, table: Vec<LineNumber> },
    /// `LocalVariableTable` or `LocalVariableTypeTable`; both share one layout.
    LocalVariables { name_index: u16, table: Vec<LocalVariable> },
    StackMapTable { name_index: u16, frames: Vec<StackMapFrame> },
    /// Type annotations on code locations. Offsets in them are not relocated, so they are
    /// dropped when the method is rewritten.
    TypeAnnotations { name_index: u16, info: Vec<u8> },
    Raw { name_index: u16, info: Vec<u8> }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    pub start_pc: u16,
    pub line_number: u16
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariable {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub index: u16
}

/// One `StackMapTable` entry. Offsets are kept as the encoded deltas.
#[derive(Debug, Clone, PartialEq)]
pub enum StackMapFrame {
    SameFrame { tag: u8 },
    SameLocals1StackItemFrame { tag: u8, stack: VerificationType },
    SameLocals1StackItemFrameExtended { offset_delta: u16, stack: VerificationType },
    ChopFrame { tag: u8, offset_delta: u16 },
    SameFrameExtended { offset_delta: u16 },
    AppendFrame { tag: u8, offset_delta: u16, locals: Vec<VerificationType> },
    FullFrame { offset_delta: u16, locals: Vec<VerificationType>, stack: Vec<VerificationType> }
}

impl StackMapFrame {
    pub fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::SameFrame { tag } => *tag as u16,
            StackMapFrame::SameLocals1StackItemFrame { tag, .. } => (*tag - 64) as u16,
            StackMapFrame::SameLocals1StackItemFrameExtended { offset_delta, .. }
            | StackMapFrame::ChopFrame { offset_delta, .. }
            | StackMapFrame::SameFrameExtended { offset_delta }
            | StackMapFrame::AppendFrame { offset_delta, .. }
            | StackMapFrame::FullFrame { offset_delta, .. } => *offset_delta
        }
    }

    /// Re-encodes this frame with a new delta, switching to the extended form when the compact
    /// form can not hold it.
    pub fn with_offset_delta(self, delta: u16) -> StackMapFrame {
        match self {
            StackMapFrame::SameFrame { .. } | StackMapFrame::SameFrameExtended { .. } => {
                if delta < 64 {
                    StackMapFrame::SameFrame { tag: delta as u8 }
                } else {
                    StackMapFrame::SameFrameExtended { offset_delta: delta }
                }
            },
            StackMapFrame::SameLocals1StackItemFrame { stack, .. }
            | StackMapFrame::SameLocals1StackItemFrameExtended { stack, .. } => {
                if delta < 64 {
                    StackMapFrame::SameLocals1StackItemFrame { tag: 64 + delta as u8, stack }
                } else {
                    StackMapFrame::SameLocals1StackItemFrameExtended { offset_delta: delta, stack }
                }
            },
            StackMapFrame::ChopFrame { tag, .. } => {
                StackMapFrame::ChopFrame { tag, offset_delta: delta }
            },
            StackMapFrame::AppendFrame { tag, locals, .. } => {
                StackMapFrame::AppendFrame { tag, offset_delta: delta, locals }
            },
            StackMapFrame::FullFrame { locals, stack, .. } => {
                StackMapFrame::FullFrame { offset_delta: delta, locals, stack }
            }
        }
    }

    pub fn verification_types_mut(&mut self) -> Vec<&mut VerificationType> {
        match self {
            StackMapFrame::SameFrame { .. }
            | StackMapFrame::ChopFrame { .. }
            | StackMapFrame::SameFrameExtended { .. } => vec![],
            StackMapFrame::SameLocals1StackItemFrame { stack, .. }
            | StackMapFrame::SameLocals1StackItemFrameExtended { stack, .. } => vec![stack],
            StackMapFrame::AppendFrame { locals, .. } => locals.iter_mut().collect(),
            StackMapFrame::FullFrame { locals, stack, .. } => {
                locals.iter_mut().chain(stack.iter_mut()).collect()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Long,
    Double,
    Null,
    UninitializedThis,
    Object { cpool_index: u16 },
    Uninitialized { offset: u16 }
}
