//! Browser-side half of the versioned extension system: a semver-resolving
//! module registry plus the bundle loader feeding it.

pub mod loader;
pub mod registry;

pub use loader::{BundleHost, LoadCallback, LoadError, LoadFuture, LoadTicket, NullHost};
pub use registry::{
    Export, ExportFn, Exports, Factory, ModuleHandle, Registry, Require, RequireError,
};
