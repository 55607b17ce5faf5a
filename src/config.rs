use crate::util::ClassPattern;

/// Which classes call-graph instrumentation may touch. A class passes when it matches one of
/// the includes (or there are none) and none of the excludes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassFilter {
    include: Vec<ClassPattern>,
    exclude: Vec<ClassPattern>,
}

impl ClassFilter {
    pub fn new() -> ClassFilter {
        ClassFilter::default()
    }

    pub fn include(mut self, pattern: &str) -> ClassFilter {
        self.include.push(ClassPattern::parse(pattern));
        self
    }

    pub fn exclude(mut self, pattern: &str) -> ClassFilter {
        self.exclude.push(ClassPattern::parse(pattern));
        self
    }

    pub fn accepts(&self, class_name: &str) -> bool {
        (self.include.is_empty() || self.include.iter().any(|p| p.matches(class_name)))
            && !self.exclude.iter().any(|p| p.matches(class_name))
    }
}

/// Internal names of the profiler runtime classes targeted by injected calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeNames {
    pub cpu_full: String,
    pub cpu_sampled: String,
    pub cpu_code_region: String,
    pub cpu: String,
    pub obj_alloc: String,
    pub obj_liveness: String,
    pub profiler: String,
}

impl RuntimeNames {
    /// Runtime classes living in `package` (dotted or slashed).
    pub fn in_package(package: &str) -> RuntimeNames {
        let package = crate::util::internal_name(package);
        let name = |simple: &str| format!("{}/{}", package, simple);
        RuntimeNames {
            cpu_full: name("ProfilerRuntimeCPUFullInstr"),
            cpu_sampled: name("ProfilerRuntimeCPUSampledInstr"),
            cpu_code_region: name("ProfilerRuntimeCPUCodeRegion"),
            cpu: name("ProfilerRuntimeCPU"),
            obj_alloc: name("ProfilerRuntimeObjAlloc"),
            obj_liveness: name("ProfilerRuntimeObjLiveness"),
            profiler: name("ProfilerRuntime"),
        }
    }
}

impl RuntimeNames {
    fn all(&self) -> [&str; 7] {
        [
            &self.cpu_full,
            &self.cpu_sampled,
            &self.cpu_code_region,
            &self.cpu,
            &self.obj_alloc,
            &self.obj_liveness,
            &self.profiler,
        ]
    }

    /// Whether `class_name` shares a package with the runtime. Such classes are never instrumented.
    pub fn is_runtime_class(&self, class_name: &str) -> bool {
        let package = crate::util::package_of(class_name);
        self.all().iter().any(|name| crate::util::package_of(name) == package)
    }
}

impl Default for RuntimeNames {
    fn default() -> Self {
        RuntimeNames::in_package("profinject/runtime")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentationConfig {
    pub filter: ClassFilter,
    pub instrument_getters_setters: bool,
    pub instrument_empty_methods: bool,
    pub instrument_reflect_invoke: bool,
    pub instrument_servlet_do_methods: bool,
    pub exceptional_exit_handlers: bool,
    pub runtime: RuntimeNames,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        InstrumentationConfig {
            filter: ClassFilter::default(),
            instrument_getters_setters: false,
            instrument_empty_methods: false,
            instrument_reflect_invoke: true,
            instrument_servlet_do_methods: true,
            exceptional_exit_handlers: true,
            runtime: RuntimeNames::default(),
        }
    }
}

impl InstrumentationConfig {
    pub fn with_filter(mut self, filter: ClassFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_getters_setters(mut self, enabled: bool) -> Self {
        self.instrument_getters_setters = enabled;
        self
    }

    pub fn with_empty_methods(mut self, enabled: bool) -> Self {
        self.instrument_empty_methods = enabled;
        self
    }

    pub fn with_reflect_invoke(mut self, enabled: bool) -> Self {
        self.instrument_reflect_invoke = enabled;
        self
    }

    pub fn with_servlet_do_methods(mut self, enabled: bool) -> Self {
        self.instrument_servlet_do_methods = enabled;
        self
    }

    pub fn with_exceptional_exit_handlers(mut self, enabled: bool) -> Self {
        self.exceptional_exit_handlers = enabled;
        self
    }

    pub fn with_runtime(mut self, runtime: RuntimeNames) -> Self {
        self.runtime = runtime;
        self
    }
}
