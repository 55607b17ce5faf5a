pub mod cpool;
pub mod extension;
pub mod injector;
pub mod method;
pub mod rewriter;
pub mod sites;

pub use self::extension::{ExtensionState, FragmentRegistry, InjectionType};
pub use self::injector::{Binding, InjectionSite, Injector, Relocation};
pub use self::method::{instrument_method, AllocationSite, Injection, InjectionContext};
pub use self::rewriter::rewrite;
