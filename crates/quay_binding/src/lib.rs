use anyhow::Context as _;
use napi_derive::napi;
use quay_core::{Compilation, PackageProbe, RewriteOptions, Rewriter};
use quay_manifest::ChunkManifest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Once;

static INIT: Once = Once::new();

#[derive(Deserialize)]
struct BindingOptions {
    project_root: PathBuf,
    name: Option<String>,
}

#[derive(Serialize)]
struct RewriteReply {
    assets: BTreeMap<String, String>,
    manifests: Vec<ChunkManifest>,
}

fn rewrite_inner(compilation_json: &str, options_json: &str) -> anyhow::Result<String> {
    let mut compilation: Compilation =
        serde_json::from_str(compilation_json).context("invalid compilation payload")?;
    let options: BindingOptions =
        serde_json::from_str(options_json).context("invalid options payload")?;

    let probe = PackageProbe::new(options.project_root);
    let mut rewrite_options = RewriteOptions::default();
    if let Some(name) = options.name {
        rewrite_options.name = name;
    }
    let manifests = Rewriter::new(rewrite_options)
        .rewrite(&mut compilation, &probe)
        .context("chunk rewrite failed")?;

    let reply = RewriteReply { assets: compilation.assets, manifests };
    Ok(serde_json::to_string(&reply)?)
}

/// Rewrite a finished compilation's chunks; called by the bundler-side
/// plugin shim at the emit phase. Both arguments and the reply are JSON.
#[napi]
pub fn rewrite_chunks(compilation_json: String, options_json: String) -> napi::Result<String> {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    });

    rewrite_inner(&compilation_json, &options_json)
        .map_err(|e| napi::Error::from_reason(format!("{:#}", e)))
}
