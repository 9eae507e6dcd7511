//! Version-aware rewriting of bundler output for browser extensions.

pub mod compilation;
pub mod error;
pub mod probe;
pub mod rewriter;

pub use compilation::{ChunkRecord, Compilation, ModuleKind, ModuleRecord};
pub use error::RewriteError;
pub use probe::{PackageHome, PackageProbe};
pub use rewriter::{RewriteOptions, Rewriter};
