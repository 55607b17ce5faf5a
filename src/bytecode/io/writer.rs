use crate::bytecode::classfile::*;

/// Serialises decoded `method_info` structures back to classfile bytes. The target is an
/// in-memory buffer, so writes can not fail.
pub struct ClassWriter<'a> {
    target: &'a mut Vec<u8>
}

impl<'a> ClassWriter<'a> {
    pub fn new(target: &'a mut Vec<u8>) -> ClassWriter<'a> {
        ClassWriter { target }
    }

    pub fn write_method_info(&mut self, method: &MethodInfo) {
        self.write_u16(method.access_flags.flags);
        self.write_u16(method.name_index);
        self.write_u16(method.descriptor_index);
        self.write_u16(method.attributes.len() as u16);
        for attribute in &method.attributes {
            match attribute {
                MethodAttribute::Code(code) => {
                    let mut body = vec![];
                    ClassWriter::new(&mut body).write_code(code);
                    self.write_u16(code.name_index);
                    self.write_u32(body.len() as u32);
                    self.write_n(&body);
                },
                MethodAttribute::Raw { name_index, info } => {
                    self.write_raw_attribute(*name_index, info)
                }
            }
        }
    }

    fn write_code(&mut self, code: &CodeAttribute) {
        self.write_u16(code.max_stack);
        self.write_u16(code.max_locals);
        self.write_u32(code.code.len() as u32);
        self.write_n(&code.code);
        self.write_exception_handlers(&code.exception_table);
        self.write_u16(code.attributes.len() as u16);
        for attribute in &code.attributes {
            self.write_code_sub_attribute(attribute);
        }
    }

    fn write_code_sub_attribute(&mut self, attribute: &CodeSubAttribute) {
        match attribute {
            CodeSubAttribute::LineNumberTable { name_index, table } => {
                self.write_u16(*name_index);
                self.write_u32(2 + 4 * table.len() as u32);
                self.write_u16(table.len() as u16);
                for entry in table {
                    self.write_u16(entry.start_pc);
                    self.write_u16(entry.line_number);
                }
            },
            CodeSubAttribute::LocalVariables { name_index, table } => {
                self.write_u16(*name_index);
                self.write_u32(2 + 10 * table.len() as u32);
                self.write_u16(table.len() as u16);
                for entry in table {
                    self.write_u16(entry.start_pc);
                    self.write_u16(entry.length);
                    self.write_u16(entry.name_index);
                    self.write_u16(entry.descriptor_index);
                    self.write_u16(entry.index);
                }
            },
            CodeSubAttribute::StackMapTable { name_index, frames } => {
                self.write_stack_map_table(*name_index, frames)
            },
            CodeSubAttribute::TypeAnnotations { name_index, info }
            | CodeSubAttribute::Raw { name_index, info } => {
                self.write_raw_attribute(*name_index, info)
            }
        }
    }

    fn write_raw_attribute(&mut self, name_index: u16, info: &[u8]) {
        self.write_u16(name_index);
        self.write_u32(info.len() as u32);
        self.write_n(info);
    }

    fn write_stack_map_table(&mut self, name_index: u16, frames: &[StackMapFrame]) {
        let mut entries = vec![];
        {
            let mut writer = ClassWriter::new(&mut entries);
            for frame in frames {
                writer.write_stack_map_frame(frame);
            }
        }
        // attribute_length = number_of_entries (2) + entries
        self.write_u16(name_index);
        self.write_u32(2 + entries.len() as u32);
        self.write_u16(frames.len() as u16);
        self.write_n(&entries);
    }

    fn write_stack_map_frame(&mut self, frame: &StackMapFrame) {
        match frame {
            StackMapFrame::SameFrame { tag } => self.write_u8(*tag),
            StackMapFrame::SameLocals1StackItemFrame { tag, stack } => {
                self.write_u8(*tag);
                self.write_verification_type(stack);
            },
            StackMapFrame::SameLocals1StackItemFrameExtended { offset_delta, stack } => {
                self.write_u8(247);
                self.write_u16(*offset_delta);
                self.write_verification_type(stack);
            },
            StackMapFrame::ChopFrame { tag, offset_delta } => {
                self.write_u8(*tag);
                self.write_u16(*offset_delta);
            },
            StackMapFrame::SameFrameExtended { offset_delta } => {
                self.write_u8(251);
                self.write_u16(*offset_delta);
            },
            StackMapFrame::AppendFrame { tag, offset_delta, locals } => {
                self.write_u8(*tag);
                self.write_u16(*offset_delta);
                locals.iter().for_each(|x| self.write_verification_type(x));
            },
            StackMapFrame::FullFrame { offset_delta, locals, stack } => {
                self.write_u8(255);
                self.write_u16(*offset_delta);
                self.write_u16(locals.len() as u16);
                locals.iter().for_each(|x| self.write_verification_type(x));
                self.write_u16(stack.len() as u16);
                stack.iter().for_each(|x| self.write_verification_type(x));
            }
        }
    }

    fn write_verification_type(&mut self, info: &VerificationType) {
        match info {
            VerificationType::Top => self.write_u8(0),
            VerificationType::Integer => self.write_u8(1),
            VerificationType::Float => self.write_u8(2),
            VerificationType::Double => self.write_u8(3),
            VerificationType::Long => self.write_u8(4),
            VerificationType::Null => self.write_u8(5),
            VerificationType::UninitializedThis => self.write_u8(6),
            VerificationType::Object { cpool_index } => {
                self.write_u8(7);
                self.write_u16(*cpool_index);
            },
            VerificationType::Uninitialized { offset } => {
                self.write_u8(8);
                self.write_u16(*offset);
            }
        }
    }

    fn write_exception_handlers(&mut self, exception_table: &[ExceptionHandler]) {
        self.write_u16(exception_table.len() as u16);
        for x in exception_table {
            self.write_u16(x.start_pc);
            self.write_u16(x.end_pc);
            self.write_u16(x.handler_pc);
            self.write_u16(x.catch_type);
        }
    }

    pub fn write_n(&mut self, bytes: &[u8]) {
        self.target.extend_from_slice(bytes);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.target.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u16(&mut self, value: u16) {
        self.target.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u8(&mut self, value: u8) {
        self.target.push(value);
    }
}

/// Encodes `method` as a standalone `method_info` blob.
pub fn method_info_bytes(method: &MethodInfo) -> Vec<u8> {
    let mut bytes = vec![];
    ClassWriter::new(&mut bytes).write_method_info(method);
    bytes
}
