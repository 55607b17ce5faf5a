//! Call-graph profiling: only methods reachable from the roots are instrumented, and the
//! reachable set grows as instrumented methods run for the first time.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::bytecode::classfile::{MethodAccessFlags, MethodFlags, MethodRecord};
use crate::config::InstrumentationConfig;
use crate::instr::sites;
use crate::instr::InjectionType;
use crate::policy::{Planned, RootMethodSpec};
use crate::repository::{ClassRecord, ClassRepository, Lookup};

const REFLECT_METHOD_CLASS: &str = "java/lang/reflect/Method";
const REFLECT_INVOKE_DESC: &str = "(Ljava/lang/Object;[Ljava/lang/Object;)Ljava/lang/Object;";
const HTTP_SERVLET_CLASS: &str = "javax/servlet/http/HttpServlet";
const SERVLET_DO_DESC: &str =
    "(Ljavax/servlet/http/HttpServletRequest;Ljavax/servlet/http/HttpServletResponse;)V";
const SERVLET_DO_METHODS: [&str; 7] =
    ["doGet", "doPost", "doPut", "doDelete", "doHead", "doOptions", "doTrace"];

/// Identity of one instrumented method of one loaded class version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub class_name: String,
    pub loader_id: u32,
    pub name: String,
    pub descriptor: String,
}

impl MethodKey {
    fn of(record: &ClassRecord, method: &MethodRecord) -> MethodKey {
        MethodKey {
            class_name: record.name.clone(),
            loader_id: record.loader_id,
            name: method.name.clone(),
            descriptor: method.descriptor.clone(),
        }
    }
}

/// Class, method name and descriptor, independent of the defining loader.
type Signature = (String, String, String);

fn signature(class_name: &str, name: &str, descriptor: &str) -> Signature {
    (class_name.to_owned(), name.to_owned(), descriptor.to_owned())
}

fn is_overridable(method: &MethodRecord) -> bool {
    !method.is_static()
        && !method.access_flags.has_flag(MethodAccessFlags::Private)
        && !method.name.starts_with('<')
}

#[derive(Debug)]
pub struct CallGraphPolicy {
    sampled: bool,
    roots: Vec<RootMethodSpec>,
    config: InstrumentationConfig,
    methods: Vec<MethodKey>,
    root_ids: Vec<bool>,
    ids: HashMap<MethodKey, u16>,
    reachable: HashSet<Signature>,
    /// Reached through virtual or interface calls, so overriders are reachable as well.
    reachable_virtual: HashSet<Signature>,
    scanned: HashSet<u16>,
    supertypes: HashMap<String, Vec<String>>,
    subtypes: HashMap<String, Vec<String>>,
    superclass: HashMap<String, String>,
}

impl CallGraphPolicy {
    pub fn new(config: InstrumentationConfig,
               sampled: bool,
               roots: Vec<RootMethodSpec>)
               -> CallGraphPolicy {
        CallGraphPolicy {
            sampled,
            roots,
            config,
            methods: vec![],
            root_ids: vec![],
            ids: HashMap::new(),
            reachable: HashSet::new(),
            reachable_virtual: HashSet::new(),
            scanned: HashSet::new(),
            supertypes: HashMap::new(),
            subtypes: HashMap::new(),
            superclass: HashMap::new(),
        }
    }

    /// The method an id was handed out for.
    pub fn method(&self, method_id: u16) -> Option<&MethodKey> {
        self.methods.get(method_id as usize)
    }

    pub fn method_id(&self, key: &MethodKey) -> Option<u16> {
        self.ids.get(key).copied()
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn root_flags(&self) -> Vec<bool> {
        self.root_ids.clone()
    }

    pub fn class_loaded(&mut self, record: &mut ClassRecord) -> bool {
        self.register_hierarchy(record);
        let mut changed = false;
        for i in 0..record.methods.len() {
            let method = &record.methods[i];
            let selected = self.roots.iter()
                .find_map(|root| root.selects(&record.name, &method.name, &method.descriptor));
            if let Some(marker) = selected {
                self.reachable.insert(signature(&record.name, &method.name, &method.descriptor));
                let flags = &mut record.methods[i].flags;
                flags.root = true;
                flags.marker = marker;
            }
            if self.is_reachable(&record.name, &record.methods[i]) {
                changed |= self.try_instrument(record, i);
            }
        }
        let record = &*record;
        changed || record.methods.iter().any(|method| self.hook(record, method).is_some())
    }

    pub fn plan(&self, record: &ClassRecord, index: usize) -> Vec<Planned> {
        let method = &record.methods[index];
        let mut plans = vec![];
        if let Some((ty, aload)) = self.hook(record, method) {
            plans.push(Planned::SpecialCall { ty, aload });
        }
        if method.flags.instrumented {
            if let Some(method_id) = self.method_id(&MethodKey::of(record, method)) {
                plans.push(Planned::EntryExit {
                    ty: self.entry_type(&method.flags),
                    method_id,
                    exit_handler: self.config.exceptional_exit_handlers && !method.is_constructor(),
                });
            }
        }
        plans
    }

    /// Scans the body of a method that just ran for the first time and instruments what it
    /// calls. Returns the classes that changed.
    pub fn method_invoked_first_time(&mut self,
                                     repo: &mut dyn ClassRepository,
                                     method_id: u16)
                                     -> Vec<(String, u32)> {
        if !self.scanned.insert(method_id) {
            return vec![];
        }
        let key = match self.method(method_id) {
            Some(key) => key.clone(),
            None => {
                warn!("first invocation of unknown method id {}", method_id);
                return vec![];
            }
        };
        if let Err(err) = repo.preload_bytecode(&key.class_name, key.loader_id) {
            warn!("can not read {}: {}", key.class_name, err);
            return vec![];
        }
        let targets = match repo.lookup(&key.class_name, key.loader_id) {
            Lookup::Found(record) => {
                let code = record.method_index(&key.name, &key.descriptor)
                    .map(|i| record.original_code(i));
                match code {
                    Some(Ok(Some(code))) => {
                        sites::invoke_targets(&code.code, &record.class.constant_pool)
                    },
                    Some(Ok(None)) => Ok(vec![]),
                    Some(Err(err)) => Err(err),
                    None => {
                        warn!("method {}.{}{} not found in this class version",
                              key.class_name, key.name, key.descriptor);
                        Ok(vec![])
                    }
                }
            },
            _ => {
                warn!("class {} of method {} is not available", key.class_name, method_id);
                Ok(vec![])
            }
        };
        let targets = match targets {
            Ok(targets) => targets,
            Err(err) => {
                error!("scan of {}.{}{} failed: {}", key.class_name, key.name, key.descriptor, err);
                return vec![];
            }
        };

        let mut changed = vec![];
        for target in targets {
            if target.member.class_name.starts_with('[') {
                continue;
            }
            let member = &target.member;
            let virtual_call = target.is_virtual();
            let (class_name, descriptor) = (&member.class_name, &member.descriptor);
            self.reach(repo, class_name, &member.name, descriptor, virtual_call, &mut changed);
        }
        debug!("method {} reaches {} newly changed classes", method_id, changed.len());
        changed
    }

    /// A method invoked through reflection.
    pub fn method_loaded(&mut self,
                         repo: &mut dyn ClassRepository,
                         class_name: &str,
                         loader_id: u32,
                         name: &str,
                         descriptor: &str)
                         -> Vec<(String, u32)> {
        trace!("reflective call of {}.{}{} through loader {}",
               class_name, name, descriptor, loader_id);
        let mut changed = vec![];
        self.reach(repo, class_name, name, descriptor, false, &mut changed);
        changed
    }

    fn reach(&mut self,
             repo: &mut dyn ClassRepository,
             class_name: &str,
             name: &str,
             descriptor: &str,
             virtual_call: bool,
             changed: &mut Vec<(String, u32)>) {
        let sig = signature(class_name, name, descriptor);
        let mut newly = self.reachable.insert(sig.clone());
        if virtual_call {
            newly |= self.reachable_virtual.insert(sig);
        }
        if !newly {
            return;
        }
        let mut owner = Some(class_name.to_owned());
        while let Some(current) = owner {
            if self.instrument_declared(repo, &current, name, descriptor, changed) {
                break;
            }
            owner = self.superclass.get(&current).cloned();
        }
        if virtual_call {
            for subtype in self.descendants(class_name) {
                self.instrument_declared(repo, &subtype, name, descriptor, changed);
            }
        }
    }

    /// Instruments `name descriptor` in every loaded version of `class_name` declaring it.
    /// Returns whether any version declares it.
    fn instrument_declared(&mut self,
                           repo: &mut dyn ClassRepository,
                           class_name: &str,
                           name: &str,
                           descriptor: &str,
                           changed: &mut Vec<(String, u32)>)
                           -> bool {
        let mut declared = false;
        for loader_id in repo.all_versions(class_name) {
            if let Err(err) = repo.preload_bytecode(class_name, loader_id) {
                warn!("can not read {}: {}", class_name, err);
                continue;
            }
            if let Lookup::Found(record) = repo.lookup(class_name, loader_id) {
                if let Some(i) = record.method_index(name, descriptor) {
                    declared = true;
                    if self.try_instrument(record, i) {
                        let entry = (class_name.to_owned(), loader_id);
                        if !changed.contains(&entry) {
                            changed.push(entry);
                        }
                    }
                }
            }
        }
        declared
    }

    fn is_reachable(&self, class_name: &str, method: &MethodRecord) -> bool {
        if self.reachable.contains(&signature(class_name, &method.name, &method.descriptor)) {
            return true;
        }
        is_overridable(method) && self.ancestors(class_name).iter().any(|ancestor| {
            self.reachable_virtual.contains(&signature(ancestor, &method.name, &method.descriptor))
        })
    }

    /// Flags the method and hands out its id, unless configuration excludes it.
    fn try_instrument(&mut self, record: &mut ClassRecord, index: usize) -> bool {
        let method = &record.methods[index];
        if method.flags.instrumented || method.flags.unscannable {
            return false;
        }
        if !method.flags.root {
            let runtime_class = self.config.runtime.is_runtime_class(&record.name);
            if !self.config.filter.accepts(&record.name) || runtime_class {
                trace!("{} is filtered out", record.name);
                return false;
            }
            match record.original_code(index) {
                Ok(Some(code)) => {
                    if !self.config.instrument_empty_methods && sites::is_empty_method(&code.code) {
                        return false;
                    }
                    let accessor = sites::is_getter_or_setter(&code.code);
                    if !self.config.instrument_getters_setters && accessor {
                        return false;
                    }
                },
                Ok(None) => return false,
                Err(err) => {
                    error!("scan of {}.{} failed: {}", record.name, method.signature(), err);
                    record.methods[index].flags.unscannable = true;
                    return false;
                }
            }
        }
        if self.methods.len() > u16::MAX as usize {
            warn!("method ids exhausted, {}.{} stays uninstrumented",
                  record.name, method.signature());
            return false;
        }
        let key = MethodKey::of(record, method);
        let id = self.methods.len() as u16;
        debug!("instrumenting {}.{} as method {}", record.name, method.signature(), id);
        self.ids.insert(key.clone(), id);
        self.methods.push(key);
        self.root_ids.push(method.flags.root);
        record.methods[index].flags.instrumented = true;
        true
    }

    fn entry_type(&self, flags: &MethodFlags) -> InjectionType {
        match (self.sampled, flags.marker, flags.root) {
            (false, true, _) => InjectionType::CpuFullMarker,
            (false, false, true) => InjectionType::CpuFullRoot,
            (false, false, false) => InjectionType::CpuFullNormal,
            (true, true, _) => InjectionType::CpuSampledMarker,
            (true, false, true) => InjectionType::CpuSampledRoot,
            (true, false, false) => InjectionType::CpuSampledNormal,
        }
    }

    /// Special call injected into `method`, if it is one of the hooked methods.
    fn hook(&self, record: &ClassRecord, method: &MethodRecord) -> Option<(InjectionType, u8)> {
        if method.flags.unscannable {
            return None;
        }
        if self.config.instrument_reflect_invoke
            && record.name == REFLECT_METHOD_CLASS
            && method.name == "invoke"
            && method.descriptor == REFLECT_INVOKE_DESC {
            return Some((InjectionType::ReflectInvoke, 0));
        }
        if self.config.instrument_servlet_do_methods
            && !method.is_static()
            && method.descriptor == SERVLET_DO_DESC
            && SERVLET_DO_METHODS.contains(&method.name.as_str())
            && record.name != HTTP_SERVLET_CLASS
            && self.ancestors(&record.name).iter().any(|a| a == HTTP_SERVLET_CLASS) {
            return Some((InjectionType::ServletDoMethod, 1));
        }
        None
    }

    fn register_hierarchy(&mut self, record: &ClassRecord) {
        let mut supers = vec![];
        if let Some(ref super_name) = record.class.super_name {
            self.superclass.insert(record.name.clone(), super_name.clone());
            supers.push(super_name.clone());
        }
        supers.extend(record.class.interfaces.iter().cloned());
        for super_name in &supers {
            let subtypes = self.subtypes.entry(super_name.clone()).or_default();
            if !subtypes.contains(&record.name) {
                subtypes.push(record.name.clone());
            }
        }
        self.supertypes.insert(record.name.clone(), supers);
    }

    /// `class_name` and all its known supertypes.
    fn ancestors(&self, class_name: &str) -> Vec<String> {
        walk(&self.supertypes, class_name)
    }

    /// All known subtypes of `class_name`, excluding itself.
    fn descendants(&self, class_name: &str) -> Vec<String> {
        let mut all = walk(&self.subtypes, class_name);
        all.remove(0);
        all
    }
}

fn walk(edges: &HashMap<String, Vec<String>>, start: &str) -> Vec<String> {
    let mut seen = vec![start.to_owned()];
    let mut queue: VecDeque<String> = VecDeque::from(vec![start.to_owned()]);
    while let Some(current) = queue.pop_front() {
        for next in edges.get(&current).into_iter().flatten() {
            if !seen.contains(next) {
                seen.push(next.clone());
                queue.push_back(next.clone());
            }
        }
    }
    seen
}
