//! Versioned module paths and the per-chunk manifest sidecar.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// `@scope/pkg@1.0.0/lib/x.js` must parse as pkg = "@scope/pkg", so the
// optional scope prefix is consumed before the bare name, which itself
// forbids both separators.
static PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^((?:@[^/]+/)?[^/@]+)@([^/]+)(/.*)?$").unwrap());

/// A module address of the form `name@version[/subpath]`.
///
/// `version` is an exact version on the define side and a semver range on
/// the require side; the codec does not distinguish the two.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionedPath {
    pub pkg: String,
    pub version: String,
    /// Empty, or begins with `/`.
    pub sub: String,
}

impl VersionedPath {
    /// Total parse: `None` on anything outside the grammar.
    pub fn parse(input: &str) -> Option<VersionedPath> {
        let caps = PATH_RE.captures(input)?;
        Some(VersionedPath {
            pkg: caps[1].to_string(),
            version: caps[2].to_string(),
            sub: caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default(),
        })
    }

    /// Canonical string form. Lossless: `format(parse(s)) == s` for valid `s`.
    pub fn format(&self) -> String {
        format!("{}@{}{}", self.pkg, self.version, self.sub)
    }
}

impl fmt::Display for VersionedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}{}", self.pkg, self.version, self.sub)
    }
}

/// Chunk id as the bundler reports it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChunkId {
    Num(u32),
    Name(String),
}

/// The JSON sidecar emitted next to every rewritten chunk asset.
///
/// Consumers may carry extra fields, so unknown fields are tolerated on
/// the way in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkManifest {
    /// Define path of the first module, present iff this is an entry chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    pub hash: String,
    pub id: ChunkId,
    pub name: String,
    pub files: Vec<String>,
    /// Define path of each module mapped to the require paths it issues.
    pub modules: BTreeMap<String, Vec<String>>,
}

impl ChunkManifest {
    /// Sidecar filename for a chunk asset.
    pub fn sidecar_name(chunk_file: &str) -> String {
        format!("{}.manifest", chunk_file)
    }
}

/// The subset of a package descriptor the probe and rewriter care about.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageDescriptor {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bare_name() {
        let path = VersionedPath::parse("foo@1.2.3/lib/index.js").unwrap();
        assert_eq!(path.pkg, "foo");
        assert_eq!(path.version, "1.2.3");
        assert_eq!(path.sub, "/lib/index.js");
    }

    #[test]
    fn parse_scoped_name() {
        let path = VersionedPath::parse("@scope/pkg@1.0.0/lib/x.js").unwrap();
        assert_eq!(path.pkg, "@scope/pkg");
        assert_eq!(path.version, "1.0.0");
        assert_eq!(path.sub, "/lib/x.js");
    }

    #[test]
    fn parse_range_without_subpath() {
        let path = VersionedPath::parse("foo@^1.0.0").unwrap();
        assert_eq!(path.version, "^1.0.0");
        assert_eq!(path.sub, "");
    }

    #[test]
    fn round_trip_is_lossless() {
        for s in [
            "foo@1.2.3",
            "foo@~1.0.0/lib/index.js",
            "@scope/pkg@^2.0.0/src/a/b.js",
            "foo@1.0.0/",
        ] {
            let parsed = VersionedPath::parse(s).unwrap();
            assert_eq!(parsed.format(), s);
            assert_eq!(VersionedPath::parse(&parsed.format()).unwrap(), parsed);
        }
    }

    #[test]
    fn rejects_malformed_input() {
        for s in ["", "foo", "@scope/foo", "foo@", "/lib/x.js", "@/x@1.0.0"] {
            assert!(VersionedPath::parse(s).is_none(), "should reject {:?}", s);
        }
    }

    #[test]
    fn manifest_omits_absent_entry() {
        let manifest = ChunkManifest {
            entry: None,
            hash: "abc".into(),
            id: ChunkId::Num(0),
            name: "main".into(),
            files: vec!["main.js".into()],
            modules: BTreeMap::new(),
        };
        let json = serde_json::to_string(&manifest).unwrap();
        assert!(!json.contains("entry"));
        assert!(json.contains("\"id\":0"));
    }

    #[test]
    fn manifest_round_trips_with_entry() {
        let mut modules = BTreeMap::new();
        modules.insert(
            "acme@1.4.2/lib/m.js".to_string(),
            vec!["utils@^3.0.0/lib/index.js".to_string()],
        );
        let manifest = ChunkManifest {
            entry: Some("acme@1.4.2/lib/m.js".into()),
            hash: "deadbeef".into(),
            id: ChunkId::Name("main".into()),
            name: "main".into(),
            files: vec!["main.js".into()],
            modules,
        };
        let json = serde_json::to_string(&manifest).unwrap();
        let back: ChunkManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.entry.as_deref(), Some("acme@1.4.2/lib/m.js"));
        assert_eq!(back.modules["acme@1.4.2/lib/m.js"].len(), 1);
    }

    #[test]
    fn sidecar_name_appends_suffix() {
        assert_eq!(ChunkManifest::sidecar_name("main.abc123.js"), "main.abc123.js.manifest");
    }

    #[test]
    fn descriptor_defaults() {
        let desc: PackageDescriptor =
            serde_json::from_str(r#"{"name": "acme", "version": "1.4.2"}"#).unwrap();
        assert!(!desc.private);
        assert!(desc.dependencies.is_empty());
    }
}
