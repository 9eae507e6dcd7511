//! In-memory view of a finished bundler compilation.
//!
//! The rewriter runs as an emit-phase hook: the bundler has already built
//! the module graph, assigned numeric ids and finalised chunk file names.
//! Everything here is serde-serializable so the bundler-side shim can hand
//! the compilation across the N-API boundary as JSON.

use quay_manifest::ChunkId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compilation {
    /// The bundler's configured public path, e.g. `"lab/"`.
    pub public_path: String,
    pub chunks: Vec<ChunkRecord>,
    /// Module table keyed by the bundler's numeric module id.
    pub modules: BTreeMap<u32, ModuleRecord>,
    /// Emitted asset text keyed by file name. The rewriter replaces chunk
    /// assets in place and inserts manifest sidecars.
    #[serde(default)]
    pub assets: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: ChunkId,
    pub name: String,
    pub hash: String,
    /// Finalised asset file names; the first is the chunk script itself.
    pub files: Vec<String>,
    /// Module ids in chunk order.
    pub module_ids: Vec<u32>,
    #[serde(default)]
    pub is_entry: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub id: u32,
    /// Absolute source path; a directory for context modules.
    pub resource: PathBuf,
    pub kind: ModuleKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModuleKind {
    /// Bundler-generated module text, internal references still numeric.
    Normal { source: String },
    /// Directory-glob require: original request strings mapped to the
    /// numeric id each resolved to.
    Context { requests: BTreeMap<String, u32> },
    /// A reference the bundler left to the host environment.
    External { request: String },
}

impl Compilation {
    pub fn module(&self, id: u32) -> Option<&ModuleRecord> {
        self.modules.get(&id)
    }

    /// Chunk carrying the given numeric id, for async require targets.
    pub fn chunk_by_num(&self, id: u32) -> Option<&ChunkRecord> {
        self.chunks.iter().find(|c| c.id == ChunkId::Num(id))
    }
}
