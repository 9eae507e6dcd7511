//! Nearest-enclosing-package lookup for absolute source paths.

use crate::error::RewriteError;
use quay_manifest::{PackageDescriptor, VersionedPath};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// An accepted package descriptor together with the directory it lives in.
#[derive(Debug, Clone)]
pub struct PackageHome {
    pub dir: PathBuf,
    pub descriptor: Rc<PackageDescriptor>,
}

/// Walks upward from a source path to the package that owns it.
///
/// A descriptor is accepted when it is not marked private, or when its
/// directory is the project root itself: the local workspace may be
/// private and still name the extension, while private intermediate
/// workspaces must not pass for publishable dependencies.
pub struct PackageProbe {
    root: PathBuf,
    // Descriptor reads keyed by directory; None records "no descriptor here".
    descriptors: RefCell<HashMap<PathBuf, Option<Rc<PackageDescriptor>>>>,
}

impl PackageProbe {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            root: project_root.into(),
            descriptors: RefCell::new(HashMap::new()),
        }
    }

    fn read_descriptor(&self, dir: &Path) -> Result<Option<Rc<PackageDescriptor>>, RewriteError> {
        if let Some(cached) = self.descriptors.borrow().get(dir) {
            return Ok(cached.clone());
        }
        let file = dir.join("package.json");
        let entry = match std::fs::read_to_string(&file) {
            Ok(text) => {
                let parsed: PackageDescriptor = serde_json::from_str(&text).map_err(|source| {
                    RewriteError::DescriptorParse { path: file.clone(), source }
                })?;
                Some(Rc::new(parsed))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(source) => return Err(RewriteError::DescriptorRead { path: file, source }),
        };
        self.descriptors
            .borrow_mut()
            .insert(dir.to_path_buf(), entry.clone());
        Ok(entry)
    }

    /// Find the accepting package for `start` (a source file or directory).
    pub fn find(&self, start: &Path) -> Result<PackageHome, RewriteError> {
        let mut dir = if start.is_file() {
            start.parent()
        } else {
            Some(start)
        };
        while let Some(d) = dir {
            if let Some(descriptor) = self.read_descriptor(d)? {
                if !descriptor.private || d == self.root {
                    return Ok(PackageHome { dir: d.to_path_buf(), descriptor });
                }
                tracing::debug!("skipping private package at {}", d.display());
            }
            dir = d.parent();
        }
        Err(RewriteError::NotInPackage { path: start.to_path_buf() })
    }

    /// Exact-version address of a module's own home:
    /// `name@exactVersion/subpath`.
    pub fn version_path(&self, resource: &Path) -> Result<String, RewriteError> {
        let home = self.find(resource)?;
        let path = VersionedPath {
            pkg: home.descriptor.name.clone(),
            version: home.descriptor.version.clone(),
            sub: subpath_of(resource, &home.dir),
        };
        Ok(path.format())
    }

    /// The range an issuer package applies to a target package.
    ///
    /// Intra-package references widen to `~exactVersion` unconditionally so
    /// a monorepo package can require its own freshly bumped files; the same
    /// widening applies to `file:`-linked targets, whose version is read
    /// from the linked directory on disk.
    pub fn semver_range(
        &self,
        issuer: &PackageHome,
        target: &PackageHome,
    ) -> Result<String, RewriteError> {
        if issuer.dir == target.dir {
            return Ok(format!("~{}", target.descriptor.version));
        }
        match issuer.descriptor.dependencies.get(&target.descriptor.name) {
            Some(declared) if declared.starts_with("file:") => {
                let linked = issuer.dir.join(&declared["file:".len()..]);
                let descriptor = self
                    .read_descriptor(&linked)?
                    .ok_or(RewriteError::NotInPackage { path: linked })?;
                Ok(format!("~{}", descriptor.version))
            }
            Some(declared) => Ok(declared.clone()),
            None => Err(RewriteError::UndeclaredDependency {
                issuer: issuer.descriptor.name.clone(),
                dependency: target.descriptor.name.clone(),
            }),
        }
    }

    /// Ranged address for a reference from `issuer_resource` to
    /// `target_resource`: `name@range/subpath`.
    pub fn semver_path(
        &self,
        issuer_resource: &Path,
        target_resource: &Path,
    ) -> Result<String, RewriteError> {
        let issuer = self.find(issuer_resource)?;
        let target = self.find(target_resource)?;
        let range = self.semver_range(&issuer, &target)?;
        let path = VersionedPath {
            pkg: target.descriptor.name.clone(),
            version: range,
            sub: subpath_of(target_resource, &target.dir),
        };
        Ok(path.format())
    }
}

// Graph keys stay forward-slashed regardless of the build platform.
fn subpath_of(resource: &Path, package_dir: &Path) -> String {
    match resource.strip_prefix(package_dir) {
        Ok(rel) if rel.as_os_str().is_empty() => String::new(),
        Ok(rel) => format!("/{}", rel.to_string_lossy().replace('\\', "/")),
        Err(_) => String::new(),
    }
}
