use quay_core::{PackageProbe, RewriteError};
use std::fs;
use std::path::{Path, PathBuf};

// Helper to create temp workspace
fn setup_workspace(name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push("quay_tests");
    path.push(name);
    if path.exists() {
        fs::remove_dir_all(&path).unwrap();
    }
    fs::create_dir_all(&path).unwrap();
    path
}

fn write_package(dir: &Path, json: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("package.json"), json).unwrap();
}

fn write_file(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, "// source\n").unwrap();
}

#[test]
fn version_path_of_project_module() {
    let root = setup_workspace("probe_version_path");
    write_package(&root, r#"{"name": "acme", "version": "1.4.2"}"#);
    let module = root.join("lib/m.js");
    write_file(&module);

    let probe = PackageProbe::new(&root);
    assert_eq!(probe.version_path(&module).unwrap(), "acme@1.4.2/lib/m.js");
}

#[test]
fn version_path_of_installed_dependency() {
    let root = setup_workspace("probe_dependency");
    write_package(&root, r#"{"name": "acme", "version": "1.4.2"}"#);
    let utils = root.join("node_modules/utils");
    write_package(&utils, r#"{"name": "utils", "version": "3.1.4"}"#);
    let module = utils.join("lib/index.js");
    write_file(&module);

    let probe = PackageProbe::new(&root);
    assert_eq!(probe.version_path(&module).unwrap(), "utils@3.1.4/lib/index.js");
}

#[test]
fn private_intermediate_package_is_skipped() {
    let root = setup_workspace("probe_private_skip");
    write_package(&root, r#"{"name": "acme", "version": "1.4.2"}"#);
    write_package(
        &root.join("packages"),
        r#"{"name": "workspace", "version": "9.9.9", "private": true}"#,
    );
    let module = root.join("packages/child/x.js");
    write_file(&module);

    let probe = PackageProbe::new(&root);
    // The private workspace must not pass for a publishable package; the
    // walk continues up to the project package.
    assert_eq!(probe.version_path(&module).unwrap(), "acme@1.4.2/packages/child/x.js");
}

#[test]
fn private_project_root_is_still_accepted() {
    let root = setup_workspace("probe_private_root");
    write_package(&root, r#"{"name": "local-app", "version": "0.1.0", "private": true}"#);
    let module = root.join("src/index.js");
    write_file(&module);

    let probe = PackageProbe::new(&root);
    assert_eq!(probe.version_path(&module).unwrap(), "local-app@0.1.0/src/index.js");
}

#[test]
fn missing_descriptor_reports_not_in_package() {
    let root = setup_workspace("probe_not_in_package");
    let module = root.join("src/orphan.js");
    write_file(&module);

    let probe = PackageProbe::new(&root);
    let err = probe.version_path(&module).unwrap_err();
    assert!(matches!(err, RewriteError::NotInPackage { .. }), "got {:?}", err);
}

#[test]
fn declared_range_is_used_literally() {
    let root = setup_workspace("probe_declared_range");
    write_package(
        &root,
        r#"{"name": "acme", "version": "1.4.2", "dependencies": {"utils": "^3.0.0"}}"#,
    );
    let issuer = root.join("lib/m.js");
    write_file(&issuer);
    let utils = root.join("node_modules/utils");
    write_package(&utils, r#"{"name": "utils", "version": "3.1.4"}"#);
    let target = utils.join("lib/index.js");
    write_file(&target);

    let probe = PackageProbe::new(&root);
    assert_eq!(
        probe.semver_path(&issuer, &target).unwrap(),
        "utils@^3.0.0/lib/index.js"
    );
}

#[test]
fn self_reference_widens_to_tilde() {
    let root = setup_workspace("probe_self_reference");
    // The declared self-range is ignored in favour of ~exactVersion.
    write_package(
        &root,
        r#"{"name": "acme", "version": "1.4.2", "dependencies": {"acme": "1.0.0"}}"#,
    );
    let issuer = root.join("lib/m.js");
    write_file(&issuer);
    let target = root.join("lib/other.js");
    write_file(&target);

    let probe = PackageProbe::new(&root);
    assert_eq!(
        probe.semver_path(&issuer, &target).unwrap(),
        "acme@~1.4.2/lib/other.js"
    );
}

#[test]
fn file_link_reads_version_from_disk() {
    let root = setup_workspace("probe_file_link");
    write_package(
        &root,
        r#"{"name": "app", "version": "2.0.0", "dependencies": {"linked": "file:./vendor/linked"}}"#,
    );
    let issuer = root.join("src/main.js");
    write_file(&issuer);
    let linked = root.join("vendor/linked");
    write_package(&linked, r#"{"name": "linked", "version": "5.5.5"}"#);
    let target = linked.join("lib/index.js");
    write_file(&target);

    let probe = PackageProbe::new(&root);
    assert_eq!(
        probe.semver_path(&issuer, &target).unwrap(),
        "linked@~5.5.5/lib/index.js"
    );
}

#[test]
fn undeclared_dependency_fails_the_build() {
    let root = setup_workspace("probe_undeclared");
    write_package(&root, r#"{"name": "acme", "version": "1.4.2"}"#);
    let issuer = root.join("lib/m.js");
    write_file(&issuer);
    let utils = root.join("node_modules/utils");
    write_package(&utils, r#"{"name": "utils", "version": "3.1.4"}"#);
    let target = utils.join("lib/index.js");
    write_file(&target);

    let probe = PackageProbe::new(&root);
    let err = probe.semver_path(&issuer, &target).unwrap_err();
    assert!(
        matches!(err, RewriteError::UndeclaredDependency { .. }),
        "got {:?}",
        err
    );
}

#[test]
fn malformed_descriptor_is_a_structured_error() {
    let root = setup_workspace("probe_malformed");
    fs::write(root.join("package.json"), "{ not json").unwrap();
    let module = root.join("lib/m.js");
    write_file(&module);

    let probe = PackageProbe::new(&root);
    let err = probe.version_path(&module).unwrap_err();
    assert!(matches!(err, RewriteError::DescriptorParse { .. }), "got {:?}", err);
}
