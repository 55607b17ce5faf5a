//! Object allocation and liveness profiling.

use std::collections::{HashMap, HashSet};

use crate::config::InstrumentationConfig;
use crate::instr::sites::{self, AllocatedClass};
use crate::instr::{AllocationSite, InjectionType};
use crate::policy::Planned;
use crate::repository::{ClassRecord, ClassRepository, Lookup};

/// Reports every allocation site of every loaded class, identifying allocated classes by a
/// 16-bit class id. Classes can be withdrawn from tracking; the withdrawn set only grows.
#[derive(Debug)]
pub struct MemoryPolicy {
    liveness: bool,
    config: InstrumentationConfig,
    class_ids: HashMap<String, u16>,
    class_names: Vec<String>,
    unprofiled: HashSet<u16>,
}

impl MemoryPolicy {
    pub fn new(config: InstrumentationConfig, liveness: bool) -> MemoryPolicy {
        MemoryPolicy {
            liveness,
            config,
            class_ids: HashMap::new(),
            class_names: vec![],
            unprofiled: HashSet::new(),
        }
    }

    pub fn class_count(&self) -> usize {
        self.class_names.len()
    }

    pub fn class_id_of(&self, class_name: &str) -> Option<u16> {
        self.class_ids.get(class_name).copied()
    }

    fn injection_type(&self) -> InjectionType {
        if self.liveness {
            InjectionType::ObjectLiveness
        } else {
            InjectionType::ObjectAllocation
        }
    }

    fn assign_class_id(&mut self, class_name: &str) -> Option<u16> {
        if let Some(id) = self.class_ids.get(class_name) {
            return Some(*id);
        }
        if self.class_names.len() > u16::MAX as usize {
            warn!("class ids exhausted, allocations of {} are not tracked", class_name);
            return None;
        }
        let id = self.class_names.len() as u16;
        self.class_ids.insert(class_name.to_owned(), id);
        self.class_names.push(class_name.to_owned());
        Some(id)
    }

    fn allocations(record: &mut ClassRecord, index: usize) -> Vec<AllocatedClass> {
        let result = match record.original_code(index) {
            Ok(Some(code)) => sites::allocation_sites(&code.code, &record.class.constant_pool),
            Ok(None) => Ok(vec![]),
            Err(err) => Err(err)
        };
        result.unwrap_or_else(|err| {
            error!("scan of {}.{} failed: {}", record.name, record.methods[index].signature(), err);
            record.methods[index].flags.unscannable = true;
            vec![]
        })
    }

    pub fn class_loaded(&mut self, record: &mut ClassRecord) -> bool {
        self.assign_class_id(&record.name);
        if self.config.runtime.is_runtime_class(&record.name) {
            return false;
        }
        let mut changed = false;
        for i in 0..record.methods.len() {
            let mut tracked = false;
            for site in MemoryPolicy::allocations(record, i) {
                match self.assign_class_id(&site.class_name) {
                    Some(id) if !self.unprofiled.contains(&id) => tracked = true,
                    _ => {}
                }
            }
            if tracked {
                record.methods[i].flags.instrumented = true;
                changed = true;
            }
        }
        changed
    }

    pub fn plan(&self, record: &ClassRecord, index: usize) -> Vec<Planned> {
        let method = &record.methods[index];
        if !method.flags.instrumented || method.flags.unscannable {
            return vec![];
        }
        let allocations = match record.original_code(index) {
            Ok(Some(code)) => {
                sites::allocation_sites(&code.code, &record.class.constant_pool).unwrap_or_default()
            },
            _ => vec![]
        };
        let sites: Vec<AllocationSite> = allocations.iter()
            .filter_map(|site| {
                let class_id = self.class_id_of(&site.class_name)?;
                Some(AllocationSite { bci: site.bci, class_id })
            })
            .filter(|site| !self.unprofiled.contains(&site.class_id))
            .collect();
        if sites.is_empty() {
            vec![]
        } else {
            vec![Planned::Allocations { ty: self.injection_type(), sites }]
        }
    }

    /// Withdraws the class ids flagged in `flags`. Only methods already instrumented are
    /// rescanned; the ones allocating a withdrawn class are marked special and their classes
    /// returned for rewriting.
    pub fn unprofile_classes(&mut self,
                             repo: &mut dyn ClassRepository,
                             flags: &[bool])
                             -> Vec<(String, u32)> {
        let newly: HashSet<u16> = flags.iter().enumerate()
            .filter(|(id, flag)| **flag && *id <= u16::MAX as usize)
            .map(|(id, _)| id as u16)
            .filter(|id| self.unprofiled.insert(*id))
            .collect();
        if newly.is_empty() {
            return vec![];
        }
        debug!("unprofiling {} classes, {} in total", newly.len(), self.unprofiled.len());

        let mut changed = vec![];
        for (class_name, loader_id) in repo.loaded_classes() {
            let record = match repo.lookup(&class_name, loader_id) {
                Lookup::Found(record) => record,
                _ => continue
            };
            let mut affected = false;
            for i in 0..record.methods.len() {
                if !record.methods[i].flags.instrumented {
                    continue;
                }
                let hit = MemoryPolicy::allocations(record, i).iter()
                    .any(|site| {
                        self.class_id_of(&site.class_name).map_or(false, |id| newly.contains(&id))
                    });
                if hit {
                    record.methods[i].flags.special = true;
                    affected = true;
                }
            }
            if affected {
                changed.push((class_name, loader_id));
            }
        }
        changed
    }
}
