//! Commands from the target runtime and the instrumentation responses sent back.

use crate::policy::ProfilingMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ClassLoaded {
        name: String,
        loader_id: u32,
        parent_loader_id: u32,
        bytes: Option<Vec<u8>>,
    },
    /// A method reached by reflection, which static call scanning can not see.
    MethodLoaded {
        class_name: String,
        loader_id: u32,
        method_name: String,
        descriptor: String,
    },
    MethodInvokedFirstTime {
        method_id: u16,
    },
    /// Every class loaded when the session starts. `cached_bytes[i]` is `None` when the
    /// runtime could not supply the bytes of `class_names[i]`.
    RootClassLoaded {
        class_names: Vec<String>,
        loader_ids: Vec<u32>,
        parent_loader_ids: Vec<u32>,
        cached_bytes: Vec<Option<Vec<u8>>>,
    },
    /// Stop tracking allocations of every class id whose flag is set.
    UnprofileClasses {
        flags: Vec<bool>,
    },
}

/// Replacement classfiles for one batch. `class_names`, `loader_ids` and `class_bytes` are
/// parallel and in the order the classes were changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentMethodGroup {
    pub instr_type: ProfilingMode,
    pub class_names: Vec<String>,
    pub loader_ids: Vec<u32>,
    pub class_bytes: Vec<Vec<u8>>,
    /// Call-graph modes: whether each method id belongs to a root method.
    pub root_flags: Option<Vec<bool>>,
    /// Number of class ids (memory modes) or method ids (call-graph modes) handed out.
    pub max_class_id: u32,
}

impl InstrumentMethodGroup {
    pub fn new(instr_type: ProfilingMode) -> InstrumentMethodGroup {
        InstrumentMethodGroup {
            instr_type,
            class_names: vec![],
            loader_ids: vec![],
            class_bytes: vec![],
            root_flags: None,
            max_class_id: 0,
        }
    }

    pub fn push(&mut self, class_name: &str, loader_id: u32, bytes: Vec<u8>) {
        self.class_names.push(class_name.to_owned());
        self.loader_ids.push(loader_id);
        self.class_bytes.push(bytes);
    }

    pub fn len(&self) -> usize {
        self.class_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.class_names.is_empty()
    }

    /// `None` stands for "no instrumentation needed".
    pub fn into_option(self) -> Option<InstrumentMethodGroup> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}
