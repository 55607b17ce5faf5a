#![allow(dead_code)]

use std::collections::HashMap;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;

/// A method body for `ClassBuilder::method`.
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    /// `(start_pc, end_pc, handler_pc, catch_type)`
    pub handlers: Vec<(u16, u16, u16, u16)>,
    /// `(start_pc, line)`
    pub lines: Vec<(u16, u16)>,
    /// Encoded frames, preceded by their count.
    pub stack_map: Option<Vec<u8>>,
}

impl Code {
    pub fn new(code: Vec<u8>) -> Code {
        Code { max_stack: 2, max_locals: 2, code, handlers: vec![], lines: vec![], stack_map: None }
    }

    pub fn lines(mut self, lines: &[(u16, u16)]) -> Code {
        self.lines = lines.to_vec();
        self
    }

    pub fn handler(mut self, start: u16, end: u16, handler: u16, catch_type: u16) -> Code {
        self.handlers.push((start, end, handler, catch_type));
        self
    }

    pub fn stack_map(mut self, frames: Vec<u8>) -> Code {
        self.stack_map = Some(frames);
        self
    }
}

/// Assembles minimal classfiles: a constant pool, a superclass and methods with Code. Fields
/// and class attributes are left empty.
pub struct ClassBuilder {
    major: u16,
    pool: Vec<u8>,
    next_index: u16,
    utf8s: HashMap<String, u16>,
    classes: HashMap<String, u16>,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    methods: Vec<Vec<u8>>,
}

impl ClassBuilder {
    pub fn new(name: &str) -> ClassBuilder {
        let mut builder = ClassBuilder {
            major: 52,
            pool: vec![],
            next_index: 1,
            utf8s: HashMap::new(),
            classes: HashMap::new(),
            this_class: 0,
            super_class: 0,
            interfaces: vec![],
            methods: vec![],
        };
        builder.this_class = builder.class(name);
        builder.super_class = builder.class("java/lang/Object");
        builder
    }

    pub fn major(mut self, major: u16) -> ClassBuilder {
        self.major = major;
        self
    }

    pub fn extends(mut self, super_name: &str) -> ClassBuilder {
        self.super_class = self.class(super_name);
        self
    }

    pub fn implements(mut self, interface: &str) -> ClassBuilder {
        let index = self.class(interface);
        self.interfaces.push(index);
        self
    }

    fn entry(&mut self, bytes: &[u8]) -> u16 {
        self.pool.extend_from_slice(bytes);
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    pub fn utf8(&mut self, value: &str) -> u16 {
        if let Some(index) = self.utf8s.get(value) {
            return *index;
        }
        let mut bytes = vec![1];
        bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
        bytes.extend_from_slice(value.as_bytes());
        let index = self.entry(&bytes);
        self.utf8s.insert(value.to_owned(), index);
        index
    }

    pub fn class(&mut self, name: &str) -> u16 {
        if let Some(index) = self.classes.get(name) {
            return *index;
        }
        let name_index = self.utf8(name);
        let mut bytes = vec![7];
        bytes.extend_from_slice(&name_index.to_be_bytes());
        let index = self.entry(&bytes);
        self.classes.insert(name.to_owned(), index);
        index
    }

    /// A long constant; takes two pool slots.
    pub fn long(&mut self, value: u64) -> u16 {
        let mut bytes = vec![5];
        bytes.extend_from_slice(&value.to_be_bytes());
        let index = self.entry(&bytes);
        self.next_index += 1;
        index
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class);
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let mut nat = vec![12];
        nat.extend_from_slice(&name_index.to_be_bytes());
        nat.extend_from_slice(&descriptor_index.to_be_bytes());
        let nat_index = self.entry(&nat);
        let mut bytes = vec![10];
        bytes.extend_from_slice(&class_index.to_be_bytes());
        bytes.extend_from_slice(&nat_index.to_be_bytes());
        self.entry(&bytes)
    }

    pub fn method(&mut self,
                  access: u16,
                  name: &str,
                  descriptor: &str,
                  code: Code)
                  -> &mut ClassBuilder {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let code_name = self.utf8("Code");

        let mut sub_attributes: Vec<u8> = vec![];
        let mut sub_count = 0u16;
        if !code.lines.is_empty() {
            let attr_name = self.utf8("LineNumberTable");
            sub_attributes.extend_from_slice(&attr_name.to_be_bytes());
            sub_attributes.extend_from_slice(&(2 + 4 * code.lines.len() as u32).to_be_bytes());
            sub_attributes.extend_from_slice(&(code.lines.len() as u16).to_be_bytes());
            for (pc, line) in &code.lines {
                sub_attributes.extend_from_slice(&pc.to_be_bytes());
                sub_attributes.extend_from_slice(&line.to_be_bytes());
            }
            sub_count += 1;
        }
        if let Some(ref frames) = code.stack_map {
            let attr_name = self.utf8("StackMapTable");
            sub_attributes.extend_from_slice(&attr_name.to_be_bytes());
            sub_attributes.extend_from_slice(&(frames.len() as u32).to_be_bytes());
            sub_attributes.extend_from_slice(frames);
            sub_count += 1;
        }

        let mut body = vec![];
        body.extend_from_slice(&code.max_stack.to_be_bytes());
        body.extend_from_slice(&code.max_locals.to_be_bytes());
        body.extend_from_slice(&(code.code.len() as u32).to_be_bytes());
        body.extend_from_slice(&code.code);
        body.extend_from_slice(&(code.handlers.len() as u16).to_be_bytes());
        for (start, end, handler, catch_type) in &code.handlers {
            for value in &[*start, *end, *handler, *catch_type] {
                body.extend_from_slice(&value.to_be_bytes());
            }
        }
        body.extend_from_slice(&sub_count.to_be_bytes());
        body.extend_from_slice(&sub_attributes);

        let mut info = vec![];
        info.extend_from_slice(&access.to_be_bytes());
        info.extend_from_slice(&name_index.to_be_bytes());
        info.extend_from_slice(&descriptor_index.to_be_bytes());
        info.extend_from_slice(&1u16.to_be_bytes());
        info.extend_from_slice(&code_name.to_be_bytes());
        info.extend_from_slice(&(body.len() as u32).to_be_bytes());
        info.extend_from_slice(&body);
        self.methods.push(info);
        self
    }

    /// Number of pool slots in use, the classfile's `constant_pool_count`.
    pub fn cp_count(&self) -> u16 {
        self.next_index
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0xCA, 0xFE, 0xBA, 0xBE, 0, 0];
        out.extend_from_slice(&self.major.to_be_bytes());
        out.extend_from_slice(&self.next_index.to_be_bytes());
        out.extend_from_slice(&self.pool);
        out.extend_from_slice(&0x0021u16.to_be_bytes());
        out.extend_from_slice(&self.this_class.to_be_bytes());
        out.extend_from_slice(&self.super_class.to_be_bytes());
        out.extend_from_slice(&(self.interfaces.len() as u16).to_be_bytes());
        for interface in &self.interfaces {
            out.extend_from_slice(&interface.to_be_bytes());
        }
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&(self.methods.len() as u16).to_be_bytes());
        for method in &self.methods {
            out.extend_from_slice(method);
        }
        out.extend_from_slice(&0u16.to_be_bytes());
        out
    }
}

/// Code of method `index` in a classfile, as read back by the crate.
pub fn method_code(class_bytes: &[u8],
                   index: usize)
                   -> profinject::bytecode::classfile::CodeAttribute {
    use profinject::bytecode::io::reader::ClassReader;
    let class = ClassReader::read_binary(class_bytes.to_vec()).unwrap();
    let method_info = class.method_info(index);
    let method = ClassReader::read_method_info(method_info, &class.constant_pool).unwrap();
    method.code().cloned().unwrap()
}
