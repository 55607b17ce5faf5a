//! Decisions about which methods get which injections.
//!
//! Policies only flag methods and describe injections symbolically; resolving those against a
//! class's constant pool and rewriting the code is left to the orchestrator.

pub mod call_graph;
pub mod code_region;
pub mod memory;
pub mod roots;

use crate::instr::{AllocationSite, InjectionType};
use crate::repository::{ClassRecord, ClassRepository};

pub use self::call_graph::{CallGraphPolicy, MethodKey};
pub use self::code_region::CodeRegionPolicy;
pub use self::memory::MemoryPolicy;
pub use self::roots::{ProfilePointSpec, RootMethodSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfilingMode {
    None,
    RecursiveFull,
    RecursiveSampled,
    CodeRegion,
    ObjectAllocations,
    ObjectLiveness,
}

impl ProfilingMode {
    pub fn is_active(self) -> bool {
        self != ProfilingMode::None
    }
}

/// An injection before constant pool indices are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Planned {
    EntryExit { ty: InjectionType, method_id: u16, exit_handler: bool },
    CodeRegion { start_line: u16, end_line: u16 },
    SpecialCall { ty: InjectionType, aload: u8 },
    Allocations { ty: InjectionType, sites: Vec<AllocationSite> },
    ProfilePoints { hits: Vec<(u16, u16)> },
}

/// The active instrumentation policy.
#[derive(Debug)]
pub enum Policy {
    CallGraph(CallGraphPolicy),
    CodeRegion(CodeRegionPolicy),
    Memory(MemoryPolicy),
}

impl Policy {
    /// Flags the methods of a newly loaded class. Returns whether the class needs rewriting.
    pub fn class_loaded(&mut self, record: &mut ClassRecord) -> bool {
        match self {
            Policy::CallGraph(policy) => policy.class_loaded(record),
            Policy::CodeRegion(policy) => policy.class_loaded(record),
            Policy::Memory(policy) => policy.class_loaded(record),
        }
    }

    /// Every injection the method at `index` should carry right now.
    pub fn plan(&self, record: &ClassRecord, index: usize) -> Vec<Planned> {
        match self {
            Policy::CallGraph(policy) => policy.plan(record, index),
            Policy::CodeRegion(policy) => policy.plan(record, index),
            Policy::Memory(policy) => policy.plan(record, index),
        }
    }

    pub fn method_invoked_first_time(&mut self,
                                     repo: &mut dyn ClassRepository,
                                     method_id: u16)
                                     -> Vec<(String, u32)> {
        match self {
            Policy::CallGraph(policy) => policy.method_invoked_first_time(repo, method_id),
            _ => {
                debug!("first invocation of {} ignored outside call-graph profiling", method_id);
                vec![]
            }
        }
    }

    pub fn method_loaded(&mut self,
                         repo: &mut dyn ClassRepository,
                         class_name: &str,
                         loader_id: u32,
                         name: &str,
                         descriptor: &str)
                         -> Vec<(String, u32)> {
        match self {
            Policy::CallGraph(policy) => {
                policy.method_loaded(repo, class_name, loader_id, name, descriptor)
            },
            _ => vec![]
        }
    }

    pub fn unprofile_classes(&mut self,
                             repo: &mut dyn ClassRepository,
                             flags: &[bool])
                             -> Vec<(String, u32)> {
        match self {
            Policy::Memory(policy) => policy.unprofile_classes(repo, flags),
            _ => {
                warn!("class unprofiling requested outside allocation profiling");
                vec![]
            }
        }
    }

    pub fn root_flags(&self) -> Option<Vec<bool>> {
        match self {
            Policy::CallGraph(policy) => Some(policy.root_flags()),
            _ => None
        }
    }

    pub fn max_id(&self) -> u32 {
        match self {
            Policy::CallGraph(policy) => policy.method_count() as u32,
            Policy::CodeRegion(_) => 0,
            Policy::Memory(policy) => policy.class_count() as u32,
        }
    }
}
