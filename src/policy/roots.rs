use crate::util::{self, ClassPattern};

/// A declared starting point of profiling: either a range of source lines in one class, or
/// the methods selected by a class pattern, a method name and a descriptor (`*` matches any
/// name or descriptor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootMethodSpec {
    CodeRegion {
        class_name: String,
        start_line: u16,
        end_line: u16,
    },
    Method {
        class: ClassPattern,
        method_name: String,
        descriptor: String,
        /// Markers are reported separately from ordinary root frames.
        marker: bool,
    },
}

impl RootMethodSpec {
    pub fn code_region(class_name: &str, start_line: u16, end_line: u16) -> RootMethodSpec {
        let class_name = util::internal_name(class_name);
        RootMethodSpec::CodeRegion { class_name, start_line, end_line }
    }

    pub fn method(class: &str, method_name: &str, descriptor: &str) -> RootMethodSpec {
        RootMethodSpec::Method {
            class: ClassPattern::parse(class),
            method_name: method_name.to_owned(),
            descriptor: descriptor.to_owned(),
            marker: false,
        }
    }

    /// All methods of the classes selected by `class`.
    pub fn all_methods(class: &str) -> RootMethodSpec {
        RootMethodSpec::method(class, "*", "*")
    }

    pub fn marker(self) -> RootMethodSpec {
        match self {
            RootMethodSpec::Method { class, method_name, descriptor, .. } => {
                RootMethodSpec::Method { class, method_name, descriptor, marker: true }
            },
            region => region
        }
    }

    /// `Some(marker)` when this root selects the method.
    pub fn selects(&self, class_name: &str, method_name: &str, descriptor: &str) -> Option<bool> {
        match self {
            RootMethodSpec::Method { class, method_name: name, descriptor: desc, marker } => {
                if class.matches(class_name)
                    && util::wildcard_matches(name, method_name)
                    && util::wildcard_matches(desc, descriptor) {
                    Some(*marker)
                } else {
                    None
                }
            },
            RootMethodSpec::CodeRegion { .. } => None
        }
    }
}

/// A hit-counting call injected at the first instruction of `line` in `class_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePointSpec {
    pub class_name: String,
    pub line: u16,
    pub id: u16,
}

impl ProfilePointSpec {
    pub fn new(class_name: &str, line: u16, id: u16) -> ProfilePointSpec {
        ProfilePointSpec { class_name: util::internal_name(class_name), line, id }
    }
}
