use std::path::PathBuf;
use thiserror::Error;

/// Build-fatal failures raised while rewriting a compilation.
#[derive(Debug, Error)]
pub enum RewriteError {
    /// A generated or supplied path fell outside the versioned grammar.
    #[error("path '{path}' does not match the versioned module grammar")]
    BadPath { path: String },

    /// The walk hit the filesystem root without an accepted descriptor.
    #[error("no package descriptor found above '{path}'")]
    NotInPackage { path: PathBuf },

    /// Externals cannot be addressed by version, so they fail the build.
    #[error("external module '{request}' is not allowed in a rewritten chunk")]
    ExternalNotAllowed { request: String },

    #[error("async require of unknown chunk {chunk} from '{from}'")]
    UnresolvableAsyncChunk { chunk: String, from: String },

    #[error("package '{issuer}' does not declare a dependency on '{dependency}'")]
    UndeclaredDependency { issuer: String, dependency: String },

    #[error("module id {id} ({context}) is missing from the compilation")]
    MissingModule { id: u32, context: String },

    #[error("failed to read package descriptor at '{path}': {source}")]
    DescriptorRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse package descriptor at '{path}': {source}")]
    DescriptorParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
