//! Per-purpose constant pool fragments and the per-class bookkeeping that appends each of
//! them at most once.

use crate::config::RuntimeNames;
use crate::error::FragmentError;
use crate::instr::cpool::{external, Fragment, FragmentEntry};

/// Why entries were added to a class's constant pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InjectionType {
    Common,
    CpuFullNormal,
    CpuFullRoot,
    CpuFullMarker,
    CpuSampledNormal,
    CpuSampledRoot,
    CpuSampledMarker,
    CodeRegion,
    ReflectInvoke,
    ServletDoMethod,
    ObjectAllocation,
    ObjectLiveness,
    ProfilePoint,
}

impl InjectionType {
    pub const COUNT: usize = 13;

    pub const ALL: [InjectionType; InjectionType::COUNT] = [
        InjectionType::Common,
        InjectionType::CpuFullNormal,
        InjectionType::CpuFullRoot,
        InjectionType::CpuFullMarker,
        InjectionType::CpuSampledNormal,
        InjectionType::CpuSampledRoot,
        InjectionType::CpuSampledMarker,
        InjectionType::CodeRegion,
        InjectionType::ReflectInvoke,
        InjectionType::ServletDoMethod,
        InjectionType::ObjectAllocation,
        InjectionType::ObjectLiveness,
        InjectionType::ProfilePoint,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Entries of the shared fragment every other fragment may reference.
pub mod common {
    pub const STACK_MAP_TABLE: u16 = 0;
    pub const THROWABLE_CLASS: u16 = 2;
    pub const CHAR_VOID: u16 = 3;
    pub const VOID_VOID: u16 = 4;
}

enum Descriptor {
    CharVoid,
    VoidVoid,
    Own(&'static str),
}

/// The unrelocated fragment of every injection type, built once from the runtime class names,
/// and the fragment-relative index of each method reference the injected code calls.
#[derive(Debug, Clone)]
pub struct FragmentRegistry {
    fragments: Vec<Fragment>,
    calls: Vec<Vec<u16>>,
}

impl FragmentRegistry {
    pub fn new(names: &RuntimeNames) -> Result<FragmentRegistry, FragmentError> {
        let mut registry = FragmentRegistry { fragments: vec![], calls: vec![] };
        for ty in InjectionType::ALL.iter() {
            let (fragment, calls) = match ty {
                InjectionType::Common => (FragmentRegistry::common()?, vec![]),
                InjectionType::CpuFullNormal => {
                    entry_exit(&names.cpu_full, "methodEntry", "methodExit")?
                },
                InjectionType::CpuFullRoot => {
                    entry_exit(&names.cpu_full, "rootMethodEntry", "methodExit")?
                },
                InjectionType::CpuFullMarker => {
                    entry_exit(&names.cpu_full, "markerMethodEntry", "markerMethodExit")?
                },
                InjectionType::CpuSampledNormal => {
                    entry_exit(&names.cpu_sampled, "methodEntry", "methodExit")?
                },
                InjectionType::CpuSampledRoot => {
                    entry_exit(&names.cpu_sampled, "rootMethodEntry", "methodExit")?
                },
                InjectionType::CpuSampledMarker => {
                    entry_exit(&names.cpu_sampled, "markerMethodEntry", "markerMethodExit")?
                },
                InjectionType::CodeRegion => {
                    let methods = [
                        ("codeRegionEntry", Descriptor::VoidVoid),
                        ("codeRegionExit", Descriptor::VoidVoid),
                    ];
                    call_fragment(&names.cpu_code_region, &methods)?
                },
                InjectionType::ReflectInvoke => {
                    let descriptor = Descriptor::Own("(Ljava/lang/reflect/Method;)V");
                    call_fragment(&names.cpu, &[("handleJavaLangReflectMethodInvoke", descriptor)])?
                },
                InjectionType::ServletDoMethod => {
                    let descriptor = Descriptor::Own("(Ljavax/servlet/http/HttpServletRequest;)V");
                    call_fragment(&names.cpu, &[("handleServletDoMethod", descriptor)])?
                },
                InjectionType::ObjectAllocation => char_call(&names.obj_alloc, "traceObjAlloc")?,
                InjectionType::ObjectLiveness => char_call(&names.obj_liveness, "traceObjAlloc")?,
                InjectionType::ProfilePoint => char_call(&names.profiler, "profilePointHit")?,
            };
            registry.fragments.push(fragment);
            registry.calls.push(calls);
        }
        Ok(registry)
    }

    fn common() -> Result<Fragment, FragmentError> {
        Fragment::build(&[
            FragmentEntry::utf8("StackMapTable"),
            FragmentEntry::utf8("java/lang/Throwable"),
            FragmentEntry::class(1),
            FragmentEntry::utf8("(C)V"),
            FragmentEntry::utf8("()V"),
        ])
    }

    pub fn fragment(&self, ty: InjectionType) -> &Fragment {
        &self.fragments[ty.index()]
    }

    /// Fragment-relative index of the `n`th method reference of `ty`.
    pub fn call(&self, ty: InjectionType, n: usize) -> Option<u16> {
        self.calls[ty.index()].get(n).copied()
    }
}

/// Entry and exit calls, both taking the method id as a char.
fn entry_exit(class_name: &str,
              entry: &str,
              exit: &str)
              -> Result<(Fragment, Vec<u16>), FragmentError> {
    call_fragment(class_name, &[(entry, Descriptor::CharVoid), (exit, Descriptor::CharVoid)])
}

fn char_call(class_name: &str, name: &str) -> Result<(Fragment, Vec<u16>), FragmentError> {
    call_fragment(class_name, &[(name, Descriptor::CharVoid)])
}

fn call_fragment(class_name: &str,
                 methods: &[(&str, Descriptor)])
                 -> Result<(Fragment, Vec<u16>), FragmentError> {
    let mut entries = vec![FragmentEntry::utf8(class_name), FragmentEntry::class(0)];
    let mut calls = vec![];
    for (name, descriptor) in methods {
        let name_index = entries.len() as u32;
        entries.push(FragmentEntry::utf8(name));
        let descriptor_index = match descriptor {
            Descriptor::CharVoid => external(common::CHAR_VOID),
            Descriptor::VoidVoid => external(common::VOID_VOID),
            Descriptor::Own(desc) => {
                entries.push(FragmentEntry::utf8(desc));
                entries.len() as u32 - 1
            }
        };
        entries.push(FragmentEntry::name_and_type(name_index, descriptor_index));
        entries.push(FragmentEntry::method_ref(1, entries.len() as u32 - 1));
        calls.push(entries.len() as u16 - 1);
    }
    Ok((Fragment::build(&entries)?, calls))
}

/// Records, for one class, where each injection type's fragment was appended and how large
/// the constant pool has grown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionState {
    bases: [Option<u16>; InjectionType::COUNT],
    original_count: u16,
    current_count: u16,
}

impl ExtensionState {
    pub fn new(original_count: u16) -> ExtensionState {
        ExtensionState {
            bases: [None; InjectionType::COUNT],
            original_count,
            current_count: original_count,
        }
    }

    pub fn base(&self, ty: InjectionType) -> Option<u16> {
        self.bases[ty.index()]
    }

    pub fn original_count(&self) -> u16 {
        self.original_count
    }

    pub fn current_count(&self) -> u16 {
        self.current_count
    }

    pub fn added_count(&self) -> u16 {
        self.current_count - self.original_count
    }

    /// Absolute index of the `n`th call of `ty`, once its fragment is appended.
    pub fn call_index(&self,
                      registry: &FragmentRegistry,
                      ty: InjectionType,
                      n: usize)
                      -> Option<u16> {
        Some(self.base(ty)? + registry.call(ty, n)?)
    }

    /// Absolute index of an entry of the shared fragment.
    pub fn common_index(&self, entry: u16) -> Option<u16> {
        self.base(InjectionType::Common).map(|base| base + entry)
    }

    /// Appends the fragment of `ty`, preceded by the shared fragment when that is still
    /// missing. Returns the relocated bytes added, which are empty when `ty` is already there.
    pub fn fragment_for(&mut self,
                        registry: &FragmentRegistry,
                        ty: InjectionType)
                        -> Result<Vec<u8>, FragmentError> {
        if self.base(ty).is_some() {
            return Ok(vec![]);
        }
        let mut bytes = vec![];
        if ty != InjectionType::Common {
            bytes = self.fragment_for(registry, InjectionType::Common)?;
        }
        let fragment = registry.fragment(ty);
        let base = self.current_count;
        let external_base = self.base(InjectionType::Common).unwrap_or(0);
        bytes.extend(fragment.relocate(base, external_base)?);
        self.bases[ty.index()] = Some(base);
        self.current_count = base + fragment.entry_count();
        trace!("appended {:?} fragment at {} ({} entries)", ty, base, fragment.entry_count());
        Ok(bytes)
    }

    /// Every fragment appended so far, in pool order.
    pub fn all_added(&self, registry: &FragmentRegistry) -> Result<Vec<u8>, FragmentError> {
        let external_base = self.base(InjectionType::Common).unwrap_or(0);
        let mut bytes = vec![];
        let mut lower_bound = self.original_count;
        loop {
            let next = InjectionType::ALL.iter()
                .filter_map(|ty| self.base(*ty).map(|base| (base, *ty)))
                .filter(|(base, _)| *base >= lower_bound)
                .min();
            match next {
                Some((base, ty)) => {
                    let fragment = registry.fragment(ty);
                    bytes.extend(fragment.relocate(base, external_base)?);
                    lower_bound = base + fragment.entry_count().max(1);
                },
                None => return Ok(bytes)
            }
        }
    }

    pub fn reset(&mut self) {
        *self = ExtensionState::new(self.original_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_is_appended_once() {
        let registry = FragmentRegistry::new(&RuntimeNames::default()).unwrap();
        let mut state = ExtensionState::new(10);
        let first = state.fragment_for(&registry, InjectionType::ProfilePoint).unwrap();
        assert!(!first.is_empty());
        let size = state.current_count();
        assert_eq!(state.base(InjectionType::Common), Some(10));
        assert_eq!(state.base(InjectionType::ProfilePoint), Some(15));
        let second = state.fragment_for(&registry, InjectionType::ProfilePoint).unwrap();
        assert!(second.is_empty());
        assert_eq!(state.current_count(), size);
    }

    #[test]
    fn test_all_added_concatenates_in_pool_order() {
        let registry = FragmentRegistry::new(&RuntimeNames::default()).unwrap();
        let mut state = ExtensionState::new(3);
        let mut expected = state.fragment_for(&registry, InjectionType::ObjectAllocation).unwrap();
        expected.extend(state.fragment_for(&registry, InjectionType::CpuFullNormal).unwrap());
        expected.extend(state.fragment_for(&registry, InjectionType::Common).unwrap());
        assert_eq!(state.all_added(&registry).unwrap(), expected);
    }

    #[test]
    fn test_call_index_points_at_method_ref() {
        let registry = FragmentRegistry::new(&RuntimeNames::default()).unwrap();
        let mut state = ExtensionState::new(1);
        state.fragment_for(&registry, InjectionType::CpuFullNormal).unwrap();
        // common takes 1..=5, runtime class utf8 6, class 7, then name, nat, methodref
        assert_eq!(state.call_index(&registry, InjectionType::CpuFullNormal, 0), Some(10));
        assert_eq!(state.call_index(&registry, InjectionType::CpuFullNormal, 1), Some(13));
        assert_eq!(state.common_index(common::THROWABLE_CLASS), Some(3));
    }
}
