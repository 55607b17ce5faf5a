//! Class metadata store consulted by the orchestrator.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::bytecode::classfile::{ClassBinary, CodeAttribute, MethodRecord};
use crate::bytecode::io::reader::ClassReader;
use crate::error::{ClassFormatError, InstrError, ScanError};
use crate::instr::ExtensionState;

/// Id of the bootstrap class loader, which has no parent.
pub const BOOTSTRAP_LOADER: u32 = 0;

/// One loaded class version: its original bytes, per-method instrumentation state and the
/// constant pool growth bookkeeping.
#[derive(Debug, Clone)]
pub struct ClassRecord {
    pub name: String,
    pub loader_id: u32,
    pub class: ClassBinary,
    pub methods: Vec<MethodRecord>,
    pub extension: ExtensionState,
}

impl ClassRecord {
    pub fn new(name: &str, loader_id: u32, class: ClassBinary) -> ClassRecord {
        let methods = ClassRecord::method_records(&class);
        let extension = ExtensionState::new(class.cp_count());
        ClassRecord { name: name.to_owned(), loader_id, class, methods, extension }
    }

    fn method_records(class: &ClassBinary) -> Vec<MethodRecord> {
        class.methods.iter()
            .enumerate()
            .map(|(i, range)| MethodRecord::new(i, range))
            .collect()
    }

    /// Takes `bytes` as the new original class. Method state and appended pool entries start
    /// over.
    pub fn redefine(&mut self, bytes: Vec<u8>) -> Result<(), ClassFormatError> {
        self.class.reset(bytes)?;
        self.methods = ClassRecord::method_records(&self.class);
        self.extension = ExtensionState::new(self.class.cp_count());
        Ok(())
    }

    pub fn method_index(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.methods.iter().position(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Decoded Code attribute of the original method at `index`; `None` for native and
    /// abstract methods.
    pub fn original_code(&self, index: usize) -> Result<Option<CodeAttribute>, ScanError> {
        if self.methods[index].flags.unscannable {
            return Ok(None);
        }
        let info = self.class.method_info(index);
        let method = ClassReader::read_method_info(info, &self.class.constant_pool)?;
        Ok(method.code().cloned())
    }

    /// Whether the class currently differs from its original bytes.
    pub fn is_modified(&self) -> bool {
        self.extension.added_count() > 0 || self.methods.iter().any(|m| m.replacement().is_some())
    }

    pub fn reset(&mut self) {
        self.methods.iter_mut().for_each(MethodRecord::reset);
        self.extension.reset();
    }
}

/// Result of a repository lookup. Absence is expected and never an error.
#[derive(Debug)]
pub enum Lookup<'a> {
    Found(&'a mut ClassRecord),
    /// Known to the runtime, but without bytes to instrument.
    Placeholder,
    NotFound,
}

/// Source of class metadata. A class is visible through a loader when that loader or one of
/// its ancestors defined it.
pub trait ClassRepository {
    /// Records a class the target runtime loaded. `None` bytes make a placeholder.
    fn define(&mut self, name: &str, loader_id: u32, parent_loader_id: u32, bytes: Option<Vec<u8>>);

    /// Makes sure the class bytes are read and decoded. Only this call does I/O.
    fn preload_bytecode(&mut self, name: &str, loader_id: u32) -> Result<(), InstrError>;

    fn lookup(&mut self, name: &str, loader_id: u32) -> Lookup<'_>;

    /// Loader ids of every defined version of `name`.
    fn all_versions(&self, name: &str) -> Vec<u32>;

    /// Every defined class in definition order.
    fn loaded_classes(&self) -> Vec<(String, u32)>;

    /// Drops all decoded state; it is rebuilt from the original bytes on the next preload.
    fn clear_cache(&mut self);
}

#[derive(Debug, Clone)]
enum Source {
    Bytes(Vec<u8>),
    File(PathBuf),
    Placeholder,
}

/// A `ClassRepository` over bytes held in memory or in files read on demand.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    sources: HashMap<(String, u32), Source>,
    records: HashMap<(String, u32), ClassRecord>,
    parents: HashMap<u32, u32>,
    order: Vec<(String, u32)>,
}

impl MemoryRepository {
    pub fn new() -> MemoryRepository {
        MemoryRepository::default()
    }

    /// Defines a class whose bytes live in `path`; the file is read by `preload_bytecode`.
    pub fn define_file(&mut self,
                       name: &str,
                       loader_id: u32,
                       parent_loader_id: u32,
                       path: impl Into<PathBuf>) {
        self.add_source(name, loader_id, parent_loader_id, Source::File(path.into()));
    }

    fn add_source(&mut self, name: &str, loader_id: u32, parent_loader_id: u32, source: Source) {
        if loader_id != BOOTSTRAP_LOADER {
            self.parents.insert(loader_id, parent_loader_id);
        }
        let key = (name.to_owned(), loader_id);
        let record = self.records.remove(&key);
        if let (Some(mut record), Source::Bytes(bytes)) = (record, &source) {
            match record.redefine(bytes.clone()) {
                Ok(()) => {
                    debug!("{} redefined by loader {}", name, loader_id);
                    self.records.insert(key.clone(), record);
                },
                Err(err) => warn!("redefinition of {} is unreadable: {}", name, err)
            }
        }
        if self.sources.insert(key.clone(), source).is_none() {
            self.order.push(key);
        }
    }

    /// The loader that defined `name` as seen from `loader_id`.
    fn resolve(&self, name: &str, loader_id: u32) -> Option<(String, u32)> {
        let mut loader = loader_id;
        // bounded walk; a malformed parent table must not loop forever
        for _ in 0..=self.parents.len() {
            let key = (name.to_owned(), loader);
            if self.sources.contains_key(&key) {
                return Some(key);
            }
            if loader == BOOTSTRAP_LOADER {
                return None;
            }
            loader = self.parents.get(&loader).copied().unwrap_or(BOOTSTRAP_LOADER);
        }
        None
    }
}

impl ClassRepository for MemoryRepository {
    fn define(&mut self,
              name: &str,
              loader_id: u32,
              parent_loader_id: u32,
              bytes: Option<Vec<u8>>) {
        let source = match bytes {
            Some(bytes) => Source::Bytes(bytes),
            None => Source::Placeholder
        };
        self.add_source(name, loader_id, parent_loader_id, source);
    }

    fn preload_bytecode(&mut self, name: &str, loader_id: u32) -> Result<(), InstrError> {
        let key = match self.resolve(name, loader_id) {
            Some(key) => key,
            None => return Ok(())
        };
        if self.records.contains_key(&key) {
            return Ok(());
        }
        let bytes = match self.sources.get(&key) {
            Some(Source::Bytes(bytes)) => bytes.clone(),
            Some(Source::File(path)) => {
                debug!("reading {} from {}", name, path.display());
                fs::read(path)?
            },
            Some(Source::Placeholder) | None => return Ok(())
        };
        let class = ClassReader::read_binary(bytes)?;
        let record = ClassRecord::new(name, key.1, class);
        self.records.insert(key, record);
        Ok(())
    }

    fn lookup(&mut self, name: &str, loader_id: u32) -> Lookup<'_> {
        let key = match self.resolve(name, loader_id) {
            Some(key) => key,
            None => return Lookup::NotFound
        };
        if let Some(Source::Placeholder) = self.sources.get(&key) {
            return Lookup::Placeholder;
        }
        match self.records.get_mut(&key) {
            Some(record) => Lookup::Found(record),
            None => Lookup::NotFound
        }
    }

    fn all_versions(&self, name: &str) -> Vec<u32> {
        self.order.iter().filter(|(n, _)| n == name).map(|(_, loader)| *loader).collect()
    }

    fn loaded_classes(&self) -> Vec<(String, u32)> {
        self.order.clone()
    }

    fn clear_cache(&mut self) {
        self.records.clear();
    }
}
