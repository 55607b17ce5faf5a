//! The instrumentation state machine.
//!
//! An `Orchestrator` owns the active profiling mode and its policy, consumes load and invoke
//! events and answers each with the replacement classfiles it produced. Every entry point takes
//! `&mut self`, so events are handled one at a time; share an orchestrator between threads
//! behind a mutex.

use crate::config::InstrumentationConfig;
use crate::error::{FragmentError, InstrError};
use crate::instr::extension::common;
use crate::instr::{self, ExtensionState, FragmentRegistry, Injection, InjectionContext};
use crate::instr::{InjectionType, Injector};
use crate::policy::*;
use crate::protocol::{Command, InstrumentMethodGroup};
use crate::repository::{ClassRecord, ClassRepository, Lookup};

#[derive(Debug)]
pub struct Orchestrator {
    config: InstrumentationConfig,
    registry: FragmentRegistry,
    mode: ProfilingMode,
    policy: Option<Policy>,
    profile_points: Vec<ProfilePointSpec>,
    injector: Injector,
}

impl Orchestrator {
    pub fn new(config: InstrumentationConfig) -> Result<Orchestrator, FragmentError> {
        crate::init_logging();
        let registry = FragmentRegistry::new(&config.runtime)?;
        Ok(Orchestrator {
            config,
            registry,
            mode: ProfilingMode::None,
            policy: None,
            profile_points: vec![],
            injector: Injector::new(),
        })
    }

    pub fn mode(&self) -> ProfilingMode {
        self.mode
    }

    pub fn policy(&self) -> Option<&Policy> {
        self.policy.as_ref()
    }

    /// The method a call-graph method id stands for.
    pub fn method(&self, method_id: u16) -> Option<&MethodKey> {
        match self.policy {
            Some(Policy::CallGraph(ref policy)) => policy.method(method_id),
            _ => None
        }
    }

    /// Profile points take effect for classes instrumented from now on.
    pub fn set_profile_points(&mut self, points: Vec<ProfilePointSpec>) {
        self.profile_points = points;
    }

    /// Switches the profiling mode. Any instrumentation in place is withdrawn first: the
    /// returned group carries the original bytes of every modified class. Entering an active
    /// mode installs a fresh policy; classes are then instrumented as load events arrive,
    /// starting with `Command::RootClassLoaded`.
    pub fn set_mode(&mut self,
                    repo: &mut dyn ClassRepository,
                    mode: ProfilingMode,
                    roots: Vec<RootMethodSpec>)
                    -> Option<InstrumentMethodGroup> {
        info!("profiling mode {:?} -> {:?}", self.mode, mode);
        let group = if self.mode.is_active() {
            self.deinstrument(repo).into_option()
        } else {
            None
        };
        self.mode = mode;
        self.policy = match mode {
            ProfilingMode::None => None,
            ProfilingMode::RecursiveFull | ProfilingMode::RecursiveSampled => {
                let sampled = mode == ProfilingMode::RecursiveSampled;
                Some(Policy::CallGraph(CallGraphPolicy::new(self.config.clone(), sampled, roots)))
            },
            ProfilingMode::CodeRegion => {
                let region = roots.iter().find_map(|root| match root {
                    RootMethodSpec::CodeRegion { class_name, start_line, end_line } => {
                        Some(CodeRegionPolicy::new(class_name, *start_line, *end_line))
                    },
                    _ => None
                });
                if region.is_none() {
                    warn!("code region profiling started without a region");
                }
                region.map(Policy::CodeRegion)
            },
            ProfilingMode::ObjectAllocations | ProfilingMode::ObjectLiveness => {
                let liveness = mode == ProfilingMode::ObjectLiveness;
                Some(Policy::Memory(MemoryPolicy::new(self.config.clone(), liveness)))
            },
        };
        group
    }

    pub fn handle(&mut self,
                  repo: &mut dyn ClassRepository,
                  command: Command)
                  -> Option<InstrumentMethodGroup> {
        match command {
            Command::ClassLoaded { name, loader_id, parent_loader_id, bytes } => {
                repo.define(&name, loader_id, parent_loader_id, bytes);
                self.classes_loaded(repo, vec![(name, loader_id)])
            },
            Command::RootClassLoaded {
                class_names,
                loader_ids,
                parent_loader_ids,
                cached_bytes,
            } => {
                let count = class_names.len();
                if count != loader_ids.len() || count != cached_bytes.len() {
                    warn!("root class list is inconsistent: {} names, {} loaders, {} byte arrays",
                          class_names.len(), loader_ids.len(), cached_bytes.len());
                }
                let mut classes = vec![];
                let named_bytes = class_names.into_iter().zip(cached_bytes.into_iter());
                for (i, (name, bytes)) in named_bytes.enumerate() {
                    let loader_id = match loader_ids.get(i) {
                        Some(loader_id) => *loader_id,
                        None => break
                    };
                    let parent = parent_loader_ids.get(i).copied().unwrap_or(0);
                    repo.define(&name, loader_id, parent, bytes);
                    classes.push((name, loader_id));
                }
                self.classes_loaded(repo, classes)
            },
            Command::MethodInvokedFirstTime { method_id } => {
                let changed = match self.policy {
                    Some(ref mut policy) => policy.method_invoked_first_time(repo, method_id),
                    None => return None
                };
                self.rebuild_all(repo, changed)
            },
            Command::MethodLoaded { class_name, loader_id, method_name, descriptor } => {
                let changed = match self.policy {
                    Some(ref mut policy) => {
                        let (name, descriptor) = (method_name.as_str(), descriptor.as_str());
                        policy.method_loaded(repo, &class_name, loader_id, name, descriptor)
                    },
                    None => return None
                };
                self.rebuild_all(repo, changed)
            },
            Command::UnprofileClasses { flags } => self.unprofile_classes(repo, &flags),
        }
    }

    /// Stops tracking allocations of the flagged class ids. The withdrawn set accumulates over
    /// calls; a method rewritten later never reports a withdrawn class again.
    pub fn unprofile_classes(&mut self,
                             repo: &mut dyn ClassRepository,
                             flags: &[bool])
                             -> Option<InstrumentMethodGroup> {
        let changed = match self.policy {
            Some(ref mut policy) => policy.unprofile_classes(repo, flags),
            None => return None
        };
        self.rebuild_all(repo, changed)
    }

    fn classes_loaded(&mut self,
                      repo: &mut dyn ClassRepository,
                      classes: Vec<(String, u32)>)
                      -> Option<InstrumentMethodGroup> {
        self.policy.as_ref()?;
        let mut group = self.new_group();
        for (name, loader_id) in classes {
            if let Err(err) = repo.preload_bytecode(&name, loader_id) {
                warn!("can not read class {} of loader {}: {}", name, loader_id, err);
                continue;
            }
            let record = match repo.lookup(&name, loader_id) {
                Lookup::Found(record) => record,
                Lookup::Placeholder => {
                    debug!("class {} of loader {} is a placeholder", name, loader_id);
                    continue;
                },
                Lookup::NotFound => {
                    warn!("class {} of loader {} not found", name, loader_id);
                    continue;
                }
            };
            let needed = match self.policy {
                Some(ref mut policy) => policy.class_loaded(record),
                None => false
            };
            if needed || self.has_profile_points(&record.name) {
                self.rebuild_into(record, &mut group);
            }
        }
        self.finish(group)
    }

    fn rebuild_all(&mut self,
                   repo: &mut dyn ClassRepository,
                   classes: Vec<(String, u32)>)
                   -> Option<InstrumentMethodGroup> {
        let mut group = self.new_group();
        for (name, loader_id) in classes {
            let mut queued = group.class_names.iter().zip(group.loader_ids.iter());
            if queued.any(|(n, l)| *n == name && *l == loader_id) {
                continue;
            }
            match repo.lookup(&name, loader_id) {
                Lookup::Found(record) => self.rebuild_into(record, &mut group),
                _ => warn!("class {} of loader {} disappeared before rewriting", name, loader_id)
            }
        }
        self.finish(group)
    }

    fn rebuild_into(&mut self, record: &mut ClassRecord, group: &mut InstrumentMethodGroup) {
        match self.rebuild_class(record) {
            Ok(Some(bytes)) => group.push(&record.name, record.loader_id, bytes),
            Ok(None) => trace!("{} unchanged", record.name),
            Err(err) => error!("instrumentation of {} failed: {}", record.name, err)
        }
    }

    fn new_group(&self) -> InstrumentMethodGroup {
        InstrumentMethodGroup::new(self.mode)
    }

    fn finish(&self, mut group: InstrumentMethodGroup) -> Option<InstrumentMethodGroup> {
        if let Some(ref policy) = self.policy {
            group.root_flags = policy.root_flags();
            group.max_class_id = policy.max_id();
        }
        group.into_option()
    }

    fn has_profile_points(&self, class_name: &str) -> bool {
        self.mode.is_active() && self.profile_points.iter().any(|p| p.class_name == class_name)
    }

    /// Rebuilds every method of `record` from its original bytes with everything currently
    /// planned for it. Returns the new classfile, or `None` when no method changed.
    fn rebuild_class(&mut self, record: &mut ClassRecord) -> Result<Option<Vec<u8>>, InstrError> {
        let mut plans: Vec<Vec<Planned>> = vec![vec![]; record.methods.len()];
        if let Some(ref policy) = self.policy {
            for (i, plan) in plans.iter_mut().enumerate() {
                *plan = policy.plan(record, i);
            }
        }
        for (i, hits) in self.profile_point_hits(record).into_iter().enumerate() {
            if !hits.is_empty() {
                plans[i].push(Planned::ProfilePoints { hits });
            }
        }

        let mut replacements: Vec<Option<Vec<u8>>> = Vec::with_capacity(plans.len());
        for (i, planned) in plans.iter().enumerate() {
            if planned.is_empty() {
                replacements.push(None);
                continue;
            }
            let injections = self.resolve(&mut record.extension, planned)?;
            let ctx = InjectionContext {
                stack_maps: record.class.requires_stack_maps(),
                stack_map_name: record.extension.common_index(common::STACK_MAP_TABLE),
                throwable_class: record.extension.common_index(common::THROWABLE_CLASS),
            };
            let info = record.class.method_info(i);
            let cp = &record.class.constant_pool;
            match instr::instrument_method(&mut self.injector, info, cp, &ctx, &injections) {
                Ok(replacement) => replacements.push(replacement),
                Err(err) => {
                    let method = format!("{}.{}", record.name, record.methods[i].signature());
                    error!("{}", InstrError::scan(method, err));
                    record.methods[i].flags.unscannable = true;
                    replacements.push(None);
                }
            }
        }

        let changed = record.methods.iter().zip(replacements.iter())
            .any(|(method, replacement)| method.replacement() != replacement.as_deref());
        if !changed {
            return Ok(None);
        }
        let added = record.extension.all_added(&self.registry)?;
        let bytes = {
            let refs: Vec<Option<&[u8]>> = replacements.iter().map(|r| r.as_deref()).collect();
            instr::rewrite(&record.class, &refs, record.extension.added_count(), &added)
        };
        for (method, replacement) in record.methods.iter_mut().zip(replacements.into_iter()) {
            match replacement {
                Some(replacement) => method.set_replacement(replacement),
                None => method.clear_replacement()
            }
        }
        debug!("rewrote {} ({} -> {} bytes)", record.name, record.class.len(), bytes.len());
        Ok(Some(bytes))
    }

    /// Appends the fragments `planned` needs and turns it into concrete injections.
    fn resolve(&self,
               extension: &mut ExtensionState,
               planned: &[Planned])
               -> Result<Vec<Injection>, FragmentError> {
        let registry = &self.registry;
        let mut calls = |ty: InjectionType| -> Result<(u16, u16), FragmentError> {
            extension.fragment_for(registry, ty)?;
            let first = extension.call_index(registry, ty, 0)
                .ok_or_else(|| {
                    FragmentError::MissingCall { fragment: format!("{:?}", ty), call: 0 }
                })?;
            let second = extension.call_index(registry, ty, 1).unwrap_or(first);
            Ok((first, second))
        };
        let mut injections = Vec::with_capacity(planned.len());
        for plan in planned {
            injections.push(match plan {
                Planned::EntryExit { ty, method_id, exit_handler } => {
                    let (entry, exit) = calls(*ty)?;
                    let (method_id, exit_handler) = (*method_id, *exit_handler);
                    Injection::EntryExit { entry, exit, method_id, exit_handler }
                },
                Planned::CodeRegion { start_line, end_line } => {
                    let (entry, exit) = calls(InjectionType::CodeRegion)?;
                    let (start_line, end_line) = (*start_line, *end_line);
                    Injection::CodeRegion { entry, exit, start_line, end_line }
                },
                Planned::SpecialCall { ty, aload } => {
                    Injection::SpecialCall { call: calls(*ty)?.0, aload: *aload }
                },
                Planned::Allocations { ty, sites } => {
                    Injection::Allocations { call: calls(*ty)?.0, sites: sites.clone() }
                },
                Planned::ProfilePoints { hits } => {
                    let call = calls(InjectionType::ProfilePoint)?.0;
                    Injection::ProfilePointHits { call, hits: hits.clone() }
                },
            });
        }
        Ok(injections)
    }

    /// Profile point hits of `record`, per method. A point belongs to the first method whose
    /// line range contains its line.
    fn profile_point_hits(&self, record: &ClassRecord) -> Vec<Vec<(u16, u16)>> {
        let mut hits = vec![vec![]; record.methods.len()];
        if !self.has_profile_points(&record.name) {
            return hits;
        }
        let ranges: Vec<Option<(u16, u16)>> = (0..record.methods.len())
            .map(|i| match record.original_code(i) {
                Ok(Some(code)) => {
                    let lines: Vec<u16> = code.line_numbers().map(|l| l.line_number).collect();
                    lines.iter().min().zip(lines.iter().max()).map(|(min, max)| (*min, *max))
                },
                _ => None
            })
            .collect();
        for point in self.profile_points.iter().filter(|p| p.class_name == record.name) {
            let covers = |range: &Option<(u16, u16)>| {
                range.map_or(false, |(min, max)| point.line >= min && point.line <= max)
            };
            match ranges.iter().position(covers) {
                Some(i) => hits[i].push((point.line, point.id)),
                None => {
                    warn!("profile point {} at {}:{} is outside every method",
                          point.id, record.name, point.line)
                }
            }
        }
        hits
    }

    /// Sends every modified class back to its original bytes and forgets all instrumentation.
    fn deinstrument(&mut self, repo: &mut dyn ClassRepository) -> InstrumentMethodGroup {
        let mut group = InstrumentMethodGroup::new(ProfilingMode::None);
        for (name, loader_id) in repo.loaded_classes() {
            if let Lookup::Found(record) = repo.lookup(&name, loader_id) {
                if record.is_modified() {
                    group.push(&name, loader_id, record.class.bytes().to_vec());
                }
                record.reset();
            }
        }
        repo.clear_cache();
        info!("withdrew instrumentation from {} classes", group.len());
        group
    }
}
