use crate::bytecode::classfile::*;
use crate::error::{ClassFormatError, ScanError};

pub struct ClassReader {
}

impl ClassReader {

    /// Walks the structure of `bytes` once, decoding the constant pool and the method
    /// table and recording the offsets of every region.
    pub fn read_binary(bytes: Vec<u8>) -> Result<ClassBinary, ClassFormatError> {
        let layout = {
            let mut reader = BlockReader::new(&bytes);
            ClassReader::read_layout(&mut reader)?
        };
        Ok(ClassBinary {
            bytes,
            version: layout.version,
            constant_pool: layout.constant_pool,
            cp_start: layout.cp_start,
            intermediate_start: layout.intermediate_start,
            methods_start: layout.methods_start,
            attributes_start: layout.attributes_start,
            access_flags: layout.access_flags,
            name: layout.name,
            super_name: layout.super_name,
            interfaces: layout.interfaces,
            methods: layout.methods,
        })
    }

    fn read_layout(reader: &mut BlockReader) -> Result<Layout, ClassFormatError> {
        let magic = reader.read_u32()?;
        if magic != 0xCAFEBABE {
            return Err(ClassFormatError::InvalidMagic(magic));
        }
        let minor_version = reader.read_u16()?;
        let major_version = reader.read_u16()?;
        let constant_pool = ClassReader::read_constant_pool(reader)?;
        let cp_start = CP_COUNT_OFFSET + 2;
        let intermediate_start = reader.position();

        let access_flags = AccessFlags::of(reader.read_u16()?);
        let this_class = reader.read_u16()?;
        let class_name = |idx: u16| {
            constant_pool.class_name(idx).ok_or(ClassFormatError::InvalidIndex(idx))
        };
        let name = class_name(this_class)?;
        let super_class = reader.read_u16()?;
        let super_name = match super_class {
            0 => None,
            idx => Some(class_name(idx)?)
        };
        let interfaces_count = reader.read_u16()?;
        let mut interfaces = Vec::with_capacity(interfaces_count as usize);
        for _ in 0..interfaces_count {
            let idx = reader.read_u16()?;
            interfaces.push(class_name(idx)?);
        }

        let fields_count = reader.read_u16()?;
        for _ in 0..fields_count {
            reader.skip(6)?;
            ClassReader::skip_attributes(reader)?;
        }

        let utf8 = |idx: u16| {
            constant_pool.get_utf8_string(idx).ok_or(ClassFormatError::InvalidIndex(idx))
        };
        let methods_start = reader.position();
        let methods_count = reader.read_u16()?;
        let mut methods = Vec::with_capacity(methods_count as usize);
        for _ in 0..methods_count {
            let start = reader.position();
            let access_flags = AccessFlags::of(reader.read_u16()?);
            let name_index = reader.read_u16()?;
            let descriptor_index = reader.read_u16()?;
            ClassReader::skip_attributes(reader)?;
            methods.push(MethodInfoRange {
                start,
                end: reader.position(),
                access_flags,
                name: utf8(name_index)?,
                descriptor: utf8(descriptor_index)?,
            });
        }

        let attributes_start = reader.position();
        ClassReader::skip_attributes(reader)?;

        Ok(Layout {
            version: ClassfileVersion::new(major_version, minor_version),
            constant_pool,
            cp_start,
            intermediate_start,
            methods_start,
            attributes_start,
            access_flags,
            name,
            super_name,
            interfaces,
            methods,
        })
    }

    fn read_constant_pool(reader: &mut BlockReader) -> Result<ConstantPool, ClassFormatError> {
        let cp_len = reader.read_u16()?;
        let mut constants: Vec<Constant> = vec![ Constant::Placeholder ];

        while constants.len() < cp_len as usize {
            let index = constants.len() as u16;
            let constant = ClassReader::read_constant(reader, index)?;
            let constant_size = constant.cp_size();

            constants.push(constant);

            for _ in 1..constant_size {
                constants.push(Constant::Placeholder);
            }
        }

        Ok(ConstantPool::new(constants))
    }

    fn read_constant(reader: &mut BlockReader, index: u16) -> Result<Constant, ClassFormatError> {
        let tag = reader.read_u8()?;

        let constant = match tag {
            tags::UTF8 => {
                let str_len = reader.read_u16()?;
                Constant::Utf8(reader.read_n(str_len as usize)?.to_vec())
            },
            tags::INTEGER => Constant::Integer(reader.read_u32()?),
            tags::FLOAT => Constant::Float(reader.read_u32()?),
            tags::LONG => Constant::Long(reader.read_u64()?),
            tags::DOUBLE => Constant::Double(reader.read_u64()?),
            tags::CLASS => Constant::Class(reader.read_u16()?),
            tags::STRING => Constant::String(reader.read_u16()?),
            tags::FIELDREF => Constant::FieldRef {
                class_index: reader.read_u16()?,
                name_and_type_index: reader.read_u16()?
            },
            tags::METHODREF => Constant::MethodRef {
                class_index: reader.read_u16()?,
                name_and_type_index: reader.read_u16()?
            },
            tags::INTERFACE_METHODREF => Constant::InterfaceMethodRef {
                class_index: reader.read_u16()?,
                name_and_type_index: reader.read_u16()?
            },
            tags::NAME_AND_TYPE => Constant::NameAndType {
                name_index: reader.read_u16()?,
                descriptor_index: reader.read_u16()?
            },
            tags::METHOD_HANDLE => Constant::MethodHandle {
                reference_kind: reader.read_u8()?,
                reference_index: reader.read_u16()?
            },
            tags::METHOD_TYPE => Constant::MethodType(reader.read_u16()?),
            tags::DYNAMIC => Constant::Dynamic {
                bootstrap_method_attr_index: reader.read_u16()?,
                name_and_type_index: reader.read_u16()?
            },
            tags::INVOKE_DYNAMIC => Constant::InvokeDynamic {
                bootstrap_method_attr_index: reader.read_u16()?,
                name_and_type_index: reader.read_u16()?
            },
            tags::MODULE => Constant::Module(reader.read_u16()?),
            tags::PACKAGE => Constant::Package(reader.read_u16()?),
            tag => return Err(ClassFormatError::InvalidConstantPoolTag { tag, index })
        };
        Ok(constant)
    }

    fn skip_attributes(reader: &mut BlockReader) -> Result<(), Eof> {
        let count = reader.read_u16()?;
        for _ in 0..count {
            reader.skip(2)?;
            let len = reader.read_u32()?;
            reader.skip(len as usize)?;
        }
        Ok(())
    }

    /// Decodes one `method_info`, including its Code attribute and the Code sub-attributes
    /// that carry bytecode offsets.
    pub fn read_method_info(bytes: &[u8], cp: &ConstantPool) -> Result<MethodInfo, ScanError> {
        let mut reader = BlockReader::new(bytes);
        ClassReader::read_method(&mut reader, cp)
            .map_err(|_| ScanError::BadAttribute("method_info"))?
    }

    fn read_method(reader: &mut BlockReader,
                   cp: &ConstantPool)
                   -> Result<Result<MethodInfo, ScanError>, Eof> {
        let access_flags = AccessFlags::of(reader.read_u16()?);
        let name_index = reader.read_u16()?;
        let descriptor_index = reader.read_u16()?;
        let count = reader.read_u16()?;
        let mut attributes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let attr_name_index = reader.read_u16()?;
            let len = reader.read_u32()? as usize;
            let info = reader.read_n(len)?;
            match cp.get_utf8(attr_name_index) {
                Some(b"Code") => match ClassReader::read_code(attr_name_index, info, cp) {
                    Ok(code) => attributes.push(MethodAttribute::Code(code)),
                    Err(err) => return Ok(Err(err))
                },
                _ => {
                    attributes.push(MethodAttribute::Raw {
                        name_index: attr_name_index,
                        info: info.to_vec(),
                    })
                }
            }
        }
        Ok(Ok(MethodInfo { access_flags, name_index, descriptor_index, attributes }))
    }

    fn read_code(name_index: u16,
                 info: &[u8],
                 cp: &ConstantPool)
                 -> Result<CodeAttribute, ScanError> {
        let bad = |_| ScanError::BadAttribute("Code");
        let mut reader = BlockReader::new(info);
        let max_stack = reader.read_u16().map_err(bad)?;
        let max_locals = reader.read_u16().map_err(bad)?;
        let code_length = reader.read_u32().map_err(bad)? as usize;
        let code = reader.read_n(code_length).map_err(bad)?.to_vec();
        let table_len = reader.read_u16().map_err(bad)?;
        let mut exception_table = Vec::with_capacity(table_len as usize);
        for _ in 0..table_len {
            exception_table.push(ExceptionHandler {
                start_pc: reader.read_u16().map_err(bad)?,
                end_pc: reader.read_u16().map_err(bad)?,
                handler_pc: reader.read_u16().map_err(bad)?,
                catch_type: reader.read_u16().map_err(bad)?,
            });
        }
        let count = reader.read_u16().map_err(bad)?;
        let mut attributes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let attr_name_index = reader.read_u16().map_err(bad)?;
            let len = reader.read_u32().map_err(bad)? as usize;
            let attr = reader.read_n(len).map_err(bad)?;
            attributes.push(ClassReader::read_code_sub_attribute(attr_name_index, attr, cp)?);
        }
        Ok(CodeAttribute { name_index, max_stack, max_locals, code, exception_table, attributes })
    }

    fn read_code_sub_attribute(name_index: u16,
                               info: &[u8],
                               cp: &ConstantPool)
                               -> Result<CodeSubAttribute, ScanError> {
        let mut reader = BlockReader::new(info);
        let attr = match cp.get_utf8(name_index) {
            Some(b"LineNumberTable") => {
                let bad = |_| ScanError::BadAttribute("LineNumberTable");
                let n = reader.read_u16().map_err(bad)?;
                let mut table = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    table.push(LineNumber {
                        start_pc: reader.read_u16().map_err(bad)?,
                        line_number: reader.read_u16().map_err(bad)?
                    });
                }
                CodeSubAttribute::LineNumberTable { name_index, table }
            },
            Some(b"LocalVariableTable") | Some(b"LocalVariableTypeTable") => {
                let bad = |_| ScanError::BadAttribute("LocalVariableTable");
                let n = reader.read_u16().map_err(bad)?;
                let mut table = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    table.push(LocalVariable {
                        start_pc: reader.read_u16().map_err(bad)?,
                        length: reader.read_u16().map_err(bad)?,
                        name_index: reader.read_u16().map_err(bad)?,
                        descriptor_index: reader.read_u16().map_err(bad)?,
                        index: reader.read_u16().map_err(bad)?
                    });
                }
                CodeSubAttribute::LocalVariables { name_index, table }
            },
            Some(b"StackMapTable") => {
                let frames = match ClassReader::read_stack_map_table(&mut reader) {
                    Ok(frames) => frames,
                    Err(FrameError::Eof(_)) => return Err(ScanError::BadAttribute("StackMapTable")),
                    Err(FrameError::Format(err)) => return Err(ScanError::Format(err))
                };
                CodeSubAttribute::StackMapTable { name_index, frames }
            },
            Some(b"RuntimeVisibleTypeAnnotations") | Some(b"RuntimeInvisibleTypeAnnotations") => {
                CodeSubAttribute::TypeAnnotations { name_index, info: info.to_vec() }
            },
            _ => CodeSubAttribute::Raw { name_index, info: info.to_vec() }
        };
        Ok(attr)
    }

    fn read_stack_map_table(reader: &mut BlockReader) -> Result<Vec<StackMapFrame>, FrameError> {
        let n = reader.read_u16()?;
        let mut frames = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let frame_type = reader.read_u8()?;
            let frame = match frame_type {
                tag @ 0..=63 => StackMapFrame::SameFrame { tag },
                tag @ 64..=127 => {
                    let stack = ClassReader::read_verification_type(reader)?;
                    StackMapFrame::SameLocals1StackItemFrame { tag, stack }
                },
                247 => StackMapFrame::SameLocals1StackItemFrameExtended {
                    offset_delta: reader.read_u16()?,
                    stack: ClassReader::read_verification_type(reader)?
                },
                tag @ 248..=250 => {
                    StackMapFrame::ChopFrame { tag, offset_delta: reader.read_u16()? }
                },
                251 => StackMapFrame::SameFrameExtended { offset_delta: reader.read_u16()? },
                tag @ 252..=254 => {
                    let offset_delta = reader.read_u16()?;
                    let mut locals = Vec::with_capacity((tag - 251) as usize);
                    for _ in 0..tag - 251 {
                        locals.push(ClassReader::read_verification_type(reader)?);
                    }
                    StackMapFrame::AppendFrame { tag, offset_delta, locals }
                },
                255 => {
                    let offset_delta = reader.read_u16()?;
                    let nlocals = reader.read_u16()?;
                    let mut locals = Vec::with_capacity(nlocals as usize);
                    for _ in 0..nlocals {
                        locals.push(ClassReader::read_verification_type(reader)?);
                    }
                    let nstack = reader.read_u16()?;
                    let mut stack = Vec::with_capacity(nstack as usize);
                    for _ in 0..nstack {
                        stack.push(ClassReader::read_verification_type(reader)?);
                    }
                    StackMapFrame::FullFrame { offset_delta, locals, stack }
                },
                tag => return Err(FrameError::Format(ClassFormatError::InvalidFrameType(tag)))
            };
            frames.push(frame);
        }
        Ok(frames)
    }

    fn read_verification_type(reader: &mut BlockReader) -> Result<VerificationType, FrameError> {
        Ok(match reader.read_u8()? {
            0 => VerificationType::Top,
            1 => VerificationType::Integer,
            2 => VerificationType::Float,
            3 => VerificationType::Double,
            4 => VerificationType::Long,
            5 => VerificationType::Null,
            6 => VerificationType::UninitializedThis,
            7 => VerificationType::Object { cpool_index: reader.read_u16()? },
            8 => VerificationType::Uninitialized { offset: reader.read_u16()? },
            tag => return Err(FrameError::Format(ClassFormatError::InvalidVerificationType(tag)))
        })
    }
}

enum FrameError {
    Eof(Eof),
    Format(ClassFormatError),
}

impl From<Eof> for FrameError {
    fn from(eof: Eof) -> Self {
        FrameError::Eof(eof)
    }
}

struct Layout {
    version: ClassfileVersion,
    constant_pool: ConstantPool,
    cp_start: usize,
    intermediate_start: usize,
    methods_start: usize,
    attributes_start: usize,
    access_flags: AccessFlags,
    name: String,
    super_name: Option<String>,
    interfaces: Vec<String>,
    methods: Vec<MethodInfoRange>,
}

/// Ran out of input at the given position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eof(pub usize);

impl From<Eof> for ClassFormatError {
    fn from(eof: Eof) -> Self {
        ClassFormatError::UnexpectedEof(eof.0)
    }
}

/// Big-endian cursor over a byte slice.
pub struct BlockReader<'a> {
    source: &'a [u8],
    position: usize
}

impl<'a> BlockReader<'a> {

    pub fn new(source: &'a [u8]) -> BlockReader<'a> {
        BlockReader { source, position: 0 }
    }

    pub fn read_n(&mut self, count: usize) -> Result<&'a [u8], Eof> {
        let end = self.position.checked_add(count).ok_or(Eof(self.position))?;
        if end > self.source.len() {
            return Err(Eof(self.position));
        }
        let bytes = &self.source[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    pub fn skip(&mut self, count: usize) -> Result<(), Eof> {
        self.read_n(count).map(|_| ())
    }

    pub fn read_u64(&mut self) -> Result<u64, Eof> {
        let buf = self.read_n(8)?;
        Ok(buf.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }

    pub fn read_u32(&mut self) -> Result<u32, Eof> {
        let buf = self.read_n(4)?;
        Ok(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
    }

    pub fn read_u16(&mut self) -> Result<u16, Eof> {
        let buf = self.read_n(2)?;
        Ok(((buf[0] as u16) << 8) + buf[1] as u16)
    }

    pub fn read_u8(&mut self) -> Result<u8, Eof> {
        let buf = self.read_n(1)?;
        Ok(buf[0])
    }

    pub fn position(&self) -> usize {
        self.position
    }
}
