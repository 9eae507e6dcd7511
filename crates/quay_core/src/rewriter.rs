//! Emit-phase chunk rewriting.
//!
//! Runs after the bundler has finalised numeric module ids and chunk file
//! names but before assets are written, so every downstream bundler pass
//! still sees numeric ids and only our text lands on disk. The rewriter
//! never alters the module graph, only the textual addresses used to cross
//! it: definition sites become `name@version/subpath`, require sites become
//! `name@range/subpath`.

use crate::compilation::{Compilation, ModuleKind, ModuleRecord};
use crate::error::RewriteError;
use crate::probe::PackageProbe;
use once_cell::sync::Lazy;
use quay_manifest::{ChunkManifest, VersionedPath};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// The bundler's internal require symbol, as emitted in module text.
const INTERNAL_REQUIRE: &str = "__webpack_require__";

// Async chunk loads: `__webpack_require__.e(1)`, with the optional inline
// comment webpack places either before or inside the call parens.
static ASYNC_REQUIRE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"__webpack_require__\.e\s*(?:/\*.*?\*/\s*)?\(\s*(?:/\*.*?\*/\s*)?(\d+)\s*\)")
        .unwrap()
});

// Plain module requires: `__webpack_require__(42)` / `__webpack_require__(/*! ./x */ 42)`.
static SYNC_REQUIRE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"__webpack_require__\(\s*(?:/\*.*?\*/\s*)?(\d+)\s*\)").unwrap());

// The public-path sentinel used for cross-chunk asset URLs.
static PUBLIC_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"__webpack_require__\.p\b").unwrap());

/// Rewriter configuration. `name` controls every generated identifier:
/// `<name>.define(...)`, `<name>Context` and `__<name>_require__`.
#[derive(Debug, Clone)]
pub struct RewriteOptions {
    pub name: String,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self { name: "jupyter".to_string() }
    }
}

pub struct Rewriter {
    options: RewriteOptions,
}

impl Rewriter {
    pub fn new(options: RewriteOptions) -> Self {
        Self { options }
    }

    fn require_symbol(&self) -> String {
        format!("__{}_require__", self.options.name)
    }

    fn context_symbol(&self) -> String {
        format!("{}Context", self.options.name)
    }

    /// Rewrite every chunk of the compilation in place and emit one
    /// manifest sidecar per chunk asset. Returns the manifests in chunk
    /// order.
    pub fn rewrite(
        &self,
        compilation: &mut Compilation,
        probe: &PackageProbe,
    ) -> Result<Vec<ChunkManifest>, RewriteError> {
        let mut new_assets: Vec<(String, String)> = Vec::new();
        let mut manifests = Vec::new();

        for chunk in &compilation.chunks {
            let chunk_file = match chunk.files.first() {
                Some(f) => f.clone(),
                None => {
                    tracing::warn!("chunk '{}' emitted no files, skipping", chunk.name);
                    continue;
                }
            };

            let mut body = String::new();
            let mut manifest_modules = BTreeMap::new();
            let mut entry_path = None;

            for mid in &chunk.module_ids {
                let module = compilation.module(*mid).ok_or_else(|| {
                    RewriteError::MissingModule {
                        id: *mid,
                        context: format!("chunk '{}'", chunk.name),
                    }
                })?;
                let define_path = self.define_path(module, probe)?;
                let (source, requires) =
                    self.transform_module(module, &define_path, compilation, probe)?;
                if entry_path.is_none() {
                    entry_path = Some(define_path.clone());
                }
                self.wrap_module(&mut body, &define_path, &source);
                tracing::debug!("rewrote module {} as '{}'", mid, define_path);
                manifest_modules.insert(define_path, requires);
            }

            let manifest = ChunkManifest {
                entry: if chunk.is_entry { entry_path } else { None },
                hash: chunk.hash.clone(),
                id: chunk.id.clone(),
                name: chunk.name.clone(),
                files: chunk.files.clone(),
                modules: manifest_modules,
            };
            tracing::info!(
                "rewrote chunk '{}' ({} modules) -> {}",
                chunk.name,
                chunk.module_ids.len(),
                chunk_file
            );
            new_assets.push((
                ChunkManifest::sidecar_name(&chunk_file),
                serde_json::to_string_pretty(&manifest).unwrap(),
            ));
            new_assets.push((chunk_file, body));
            manifests.push(manifest);
        }

        for (file, text) in new_assets {
            compilation.assets.insert(file, text);
        }
        Ok(manifests)
    }

    /// Exact-version define path for a module; externals fail the build.
    fn define_path(
        &self,
        module: &ModuleRecord,
        probe: &PackageProbe,
    ) -> Result<String, RewriteError> {
        if let ModuleKind::External { request } = &module.kind {
            return Err(RewriteError::ExternalNotAllowed { request: request.clone() });
        }
        let path = probe.version_path(&module.resource)?;
        if VersionedPath::parse(&path).is_none() {
            return Err(RewriteError::BadPath { path });
        }
        Ok(path)
    }

    /// Transform one module's text; returns the body (still addressed via
    /// the renamed require symbol) and the semver require paths it issues,
    /// first-occurrence order, deduplicated.
    fn transform_module(
        &self,
        module: &ModuleRecord,
        define_path: &str,
        compilation: &Compilation,
        probe: &PackageProbe,
    ) -> Result<(String, Vec<String>), RewriteError> {
        let mut requires = Vec::new();
        let source = match &module.kind {
            ModuleKind::Normal { source } => {
                let source = replace_fallible(source, &ASYNC_REQUIRE_RE, |caps| {
                    let digits = &caps[1];
                    let target = digits
                        .parse::<u32>()
                        .ok()
                        .and_then(|n| compilation.chunk_by_num(n))
                        .and_then(|c| c.files.first());
                    let file = target.ok_or_else(|| RewriteError::UnresolvableAsyncChunk {
                        chunk: digits.to_string(),
                        from: define_path.to_string(),
                    })?;
                    Ok(format!(
                        "{}.e('{}{}')",
                        INTERNAL_REQUIRE, compilation.public_path, file
                    ))
                })?;
                let source = replace_fallible(&source, &SYNC_REQUIRE_RE, |caps| {
                    let id: u32 = caps[1].parse().map_err(|_| RewriteError::BadPath {
                        path: caps[0].to_string(),
                    })?;
                    let target =
                        compilation
                            .module(id)
                            .ok_or_else(|| RewriteError::MissingModule {
                                id,
                                context: format!("required from '{}'", define_path),
                            })?;
                    if let ModuleKind::External { request } = &target.kind {
                        return Err(RewriteError::ExternalNotAllowed {
                            request: request.clone(),
                        });
                    }
                    let path = probe.semver_path(&module.resource, &target.resource)?;
                    if !requires.contains(&path) {
                        requires.push(path.clone());
                    }
                    Ok(format!("{}('{}')", INTERNAL_REQUIRE, path))
                })?;
                let public_literal = format!("'{}'", compilation.public_path);
                PUBLIC_PATH_RE
                    .replace_all(&source, regex::NoExpand(&public_literal))
                    .into_owned()
            }
            ModuleKind::Context { requests } => {
                self.synthesize_context(module, requests, compilation, probe, &mut requires)?
            }
            // Already rejected in define_path.
            ModuleKind::External { request } => {
                return Err(RewriteError::ExternalNotAllowed { request: request.clone() })
            }
        };
        // Renamed last so every reference form above shares one pass, and
        // other bundler output on the same page keeps its own symbol.
        Ok((source.replace(INTERNAL_REQUIRE, &self.require_symbol()), requires))
    }

    /// Context modules are synthesised from scratch: a request map sorted
    /// ascending by original request, plus the fixed wrapper surface
    /// (`keys()`, `resolve(req)`, call form).
    fn synthesize_context(
        &self,
        module: &ModuleRecord,
        requests: &BTreeMap<String, u32>,
        compilation: &Compilation,
        probe: &PackageProbe,
        requires: &mut Vec<String>,
    ) -> Result<String, RewriteError> {
        let ctx = self.context_symbol();
        let mut body = String::from("var map = {\n");
        for (request, target_id) in requests {
            let target =
                compilation
                    .module(*target_id)
                    .ok_or_else(|| RewriteError::MissingModule {
                        id: *target_id,
                        context: format!("context request '{}'", request),
                    })?;
            if let ModuleKind::External { request } = &target.kind {
                return Err(RewriteError::ExternalNotAllowed { request: request.clone() });
            }
            let path = probe.semver_path(&module.resource, &target.resource)?;
            if !requires.contains(&path) {
                requires.push(path.clone());
            }
            let _ = writeln!(
                body,
                "  {}: {},",
                serde_json::to_string(request).unwrap(),
                serde_json::to_string(&path).unwrap()
            );
        }
        body.push_str("};\n");
        let _ = writeln!(body, "function {}(req) {{", ctx);
        let _ = writeln!(body, "  return {}({}Resolve(req));", INTERNAL_REQUIRE, ctx);
        body.push_str("}\n");
        let _ = writeln!(body, "function {}Resolve(req) {{", ctx);
        body.push_str("  var id = map[req];\n");
        body.push_str("  if (!(id + 1)) {\n");
        body.push_str("    var e = new Error('Cannot find module \"' + req + '\".');\n");
        body.push_str("    e.code = 'MODULE_NOT_FOUND';\n");
        body.push_str("    throw e;\n");
        body.push_str("  }\n");
        body.push_str("  return id;\n");
        body.push_str("}\n");
        let _ = writeln!(body, "{}.keys = function {}Keys() {{", ctx, ctx);
        body.push_str("  return Object.keys(map);\n");
        body.push_str("};\n");
        let _ = writeln!(body, "{}.resolve = {}Resolve;", ctx, ctx);
        let _ = writeln!(body, "module.exports = {};", ctx);
        Ok(body)
    }

    fn wrap_module(&self, body: &mut String, define_path: &str, source: &str) {
        let _ = writeln!(body, "/** START DEFINE BLOCK for {} **/", define_path);
        let _ = writeln!(
            body,
            "{}.define('{}', function (module, exports, {}) {{",
            self.options.name,
            define_path,
            self.require_symbol()
        );
        body.push_str(source);
        body.push_str("\n})\n");
        let _ = writeln!(body, "/** END DEFINE BLOCK for {} **/\n", define_path);
    }
}

fn replace_fallible<F>(source: &str, re: &Regex, mut replace: F) -> Result<String, RewriteError>
where
    F: FnMut(&Captures) -> Result<String, RewriteError>,
{
    let mut out = String::with_capacity(source.len());
    let mut last = 0;
    for caps in re.captures_iter(source) {
        let whole = caps.get(0).unwrap();
        out.push_str(&source[last..whole.start()]);
        out.push_str(&replace(&caps)?);
        last = whole.end();
    }
    out.push_str(&source[last..]);
    Ok(out)
}
