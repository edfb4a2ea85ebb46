//! End-to-end scenarios: save → install → uninstall round trips across
//! platforms, exercised against a temp registry and temp workspaces.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use openpackage::arbitrate::ChooserOutcome;
use openpackage::discovery::DiscoveredFile;
use openpackage::errors::OpkgError;
use openpackage::install::{install_packages, ConflictStrategy, InstallOptions};
use openpackage::markers;
use openpackage::registry::Registry;
use openpackage::resolve::{resolve, ResolveOptions};
use openpackage::save::{save_package, SaveOptions};
use openpackage::uninstall::{uninstall_package, UninstallOptions};
use openpackage::workspace::Workspace;
use openpackage_schema::{PackageIndex, PackageName};
use temp_dir::TempDir;

struct World {
    _guards: Vec<TempDir>,
    registry: Registry,
}

impl World {
    fn new() -> Self {
        let guard = TempDir::new().unwrap();
        let registry =
            Registry::at(Utf8PathBuf::from_path_buf(guard.path().to_owned()).unwrap());
        World {
            _guards: vec![guard],
            registry,
        }
    }

    fn workspace(&mut self, dirs: &[&str], files: &[(&str, &str)]) -> Workspace {
        let guard = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(guard.path().to_owned()).unwrap();
        for dir in dirs {
            std::fs::create_dir_all(root.join(dir)).unwrap();
        }
        for (rel, contents) in files {
            write_file(&root, rel, contents);
        }
        self._guards.push(guard);
        Workspace::at(root)
    }
}

fn write_file(root: &Utf8Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn pin_mtime(root: &Utf8Path, rels: &[&str]) {
    let when = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    for rel in rels {
        let file = std::fs::File::options()
            .write(true)
            .open(root.join(rel))
            .unwrap();
        file.set_modified(when).unwrap();
    }
}

fn name(raw: &str) -> PackageName {
    PackageName::parse(raw).unwrap()
}

fn overwrite_options() -> InstallOptions {
    InstallOptions {
        conflict_strategy: ConflictStrategy::Overwrite,
        dry_run: false,
    }
}

/// S1 + property 2: save from ai/, install elsewhere, and the index
/// matches what's actually on disk.
#[test]
fn save_then_install_round_trips_bytes_and_index() {
    let mut world = World::new();
    let author = world.workspace(&[], &[("ai/helpers/tone.md", "# tone\nbe kind\n")]);
    let report = save_package(
        &world.registry,
        &author,
        "tone-pkg",
        &SaveOptions::default(),
        None,
    )
    .unwrap();

    let consumer = world.workspace(&[".cursor", ".claude"], &[]);
    let resolution = resolve(
        &world.registry,
        &consumer,
        &[(name("tone-pkg"), Some(report.version.clone()))],
        BTreeMap::new(),
        ResolveOptions::default(),
    )
    .unwrap();
    install_packages(&consumer, &resolution, &overwrite_options()).unwrap();

    let installed = consumer
        .package_dir(&name("tone-pkg"))
        .join("ai/helpers/tone.md");
    assert_eq!(
        std::fs::read_to_string(installed).unwrap(),
        "# tone\nbe kind\n"
    );

    // every indexed path exists on disk
    let index = consumer
        .load_package_index(&name("tone-pkg"))
        .unwrap()
        .unwrap();
    assert_eq!(index.workspace.version, report.version);
    for (key, targets) in &index.files {
        for target in targets {
            let path = Utf8PathBuf::from(target);
            if PackageIndex::is_dir_key(key) {
                assert!(path.is_dir(), "{key} -> {target} should be a dir");
            } else {
                assert!(path.is_file(), "{key} -> {target} should be a file");
            }
        }
    }
}

/// S2: three divergent platform copies at identical mtimes, stable
/// target, chooser elects one; the others are synchronized.
#[test]
fn stable_save_arbitrates_divergent_platform_copies() {
    let mut world = World::new();
    let ws = world.workspace(
        &[],
        &[
            (".cursor/commands/setup.md", "cursor setup\n"),
            (".claude/commands/setup.md", "claude setup\n"),
            (".codex/prompts/setup.md", "codex setup\n"),
        ],
    );
    pin_mtime(
        ws.root(),
        &[
            ".cursor/commands/setup.md",
            ".claude/commands/setup.md",
            ".codex/prompts/setup.md",
        ],
    );

    // elect whichever copy came from cursor, mark none platform-specific
    let chooser = |_path: &str, files: &[DiscoveredFile]| {
        let cursor_idx = files
            .iter()
            .position(|f| f.full_path.as_str().contains(".cursor"))
            .unwrap();
        Ok(ChooserOutcome::Elected {
            universal: cursor_idx,
            platform_specific: vec![],
        })
    };
    let report = save_package(
        &world.registry,
        &ws,
        "setup-pkg@1.0.0",
        &SaveOptions::default(),
        Some(&chooser),
    )
    .unwrap();

    // a single universal file in the registry, with the cursor contents
    let stored = std::fs::read_to_string(report.registry_dir.join("commands/setup.md")).unwrap();
    assert_eq!(stored, "cursor setup\n");
    assert!(!report.registry_dir.join("commands/setup.claude.md").exists());

    // the other platform copies were overwritten to match
    for rel in [".claude/commands/setup.md", ".codex/prompts/setup.md"] {
        assert_eq!(
            std::fs::read_to_string(ws.root().join(rel)).unwrap(),
            "cursor setup\n"
        );
    }

    // the index maps the universal file onto all three platform targets
    let index = ws.load_package_index(&name("setup-pkg")).unwrap().unwrap();
    assert_eq!(index.files["commands/setup.md"].len(), 3);
}

/// S3: range intersection across the root manifest and a transitive dep.
#[test]
fn install_intersects_ranges() {
    let mut world = World::new();
    // publish pkg-b at several versions and pkg-a depending on ~1.1.0
    for version in ["1.0.0", "1.1.0", "1.1.4", "1.2.0"] {
        let author = world.workspace(&[], &[("ai/b.md", "b\n")]);
        save_package(
            &world.registry,
            &author,
            &format!("pkg-b@{version}"),
            &SaveOptions::default(),
            None,
        )
        .unwrap();
    }
    let author = world.workspace(&[], &[("ai/a.md", "a\n")]);
    author
        .save_package_manifest(&{
            let mut m = openpackage_schema::PackageManifest::new(name("pkg-a"), "1.2.0");
            m.upsert_dependency(name("pkg-b"), "~1.1.0".to_owned(), false);
            m
        })
        .unwrap();
    save_package(
        &world.registry,
        &author,
        "pkg-a@1.2.0",
        &SaveOptions::default(),
        None,
    )
    .unwrap();

    let consumer = world.workspace(&[".claude"], &[]);
    consumer
        .add_package_to_root(&name("pkg-a"), "^1.0.0", false)
        .unwrap();
    consumer
        .add_package_to_root(&name("pkg-b"), "^1.0.0", false)
        .unwrap();

    let resolution = resolve(
        &world.registry,
        &consumer,
        &[(name("pkg-a"), Some("^1.0.0".to_owned()))],
        BTreeMap::new(),
        ResolveOptions::default(),
    )
    .unwrap();
    let pkg_b = resolution.get(&name("pkg-b")).unwrap();
    assert_eq!(pkg_b.version, "1.1.4");
}

/// S4: a dependency cycle fails cleanly, before any workspace write.
#[test]
fn cycles_fail_without_workspace_writes() {
    let mut world = World::new();
    for (pkg, dep) in [("pkg-a", "pkg-b"), ("pkg-b", "pkg-a")] {
        let author = world.workspace(&[], &[("ai/x.md", "x\n")]);
        author
            .save_package_manifest(&{
                let mut m = openpackage_schema::PackageManifest::new(name(pkg), "1.0.0");
                m.upsert_dependency(name(dep), "^1.0.0".to_owned(), false);
                m
            })
            .unwrap();
        save_package(
            &world.registry,
            &author,
            &format!("{pkg}@1.0.0"),
            &SaveOptions::default(),
            None,
        )
        .unwrap();
    }

    let consumer = world.workspace(&[".claude"], &[]);
    let err = resolve(
        &world.registry,
        &consumer,
        &[(name("pkg-a"), None)],
        BTreeMap::new(),
        ResolveOptions::default(),
    )
    .unwrap_err();
    match err {
        OpkgError::CircularDependency { cycle } => {
            assert_eq!(cycle, vec!["pkg-a", "pkg-b", "pkg-a"]);
        }
        other => panic!("expected CircularDependency, got {other:?}"),
    }
    assert!(!consumer.root().join(".claude/commands").exists());
    assert!(consumer.load_package_index(&name("pkg-a")).unwrap().is_none());
}

/// S5: root-file co-ownership survives a partial uninstall.
#[test]
fn uninstall_removes_only_its_own_root_section() {
    let mut world = World::new();
    let consumer = world.workspace(&[".claude"], &[]);

    for pkg in ["pkg-a", "pkg-b"] {
        let author = world.workspace(
            &[".claude"],
            &[(
                "CLAUDE.md",
                &format!("<!-- package: {pkg} -->\n{pkg} body\n<!-- -->\n"),
            )],
        );
        let report = save_package(
            &world.registry,
            &author,
            pkg,
            &SaveOptions::default(),
            None,
        )
        .unwrap();
        let resolution = resolve(
            &world.registry,
            &consumer,
            &[(name(pkg), Some(report.version))],
            BTreeMap::new(),
            ResolveOptions::default(),
        )
        .unwrap();
        install_packages(&consumer, &resolution, &overwrite_options()).unwrap();
    }

    let claude_md = consumer.root().join("CLAUDE.md");
    let before = std::fs::read_to_string(&claude_md).unwrap();
    let a_before = markers::extract_package_section(&before, "pkg-a").unwrap();

    uninstall_package(&consumer, &name("pkg-b"), &UninstallOptions::default()).unwrap();

    let after = std::fs::read_to_string(&claude_md).unwrap();
    assert!(markers::extract_package_section(&after, "pkg-b").is_none());
    let a_after = markers::extract_package_section(&after, "pkg-a").unwrap();
    assert_eq!(a_after.body, a_before.body);
    assert_eq!(a_after.id, a_before.id);
}

/// Uninstall followed by install restores every installed path
/// byte-for-byte.
#[test]
fn uninstall_then_install_restores_state() {
    let mut world = World::new();
    let author = world.workspace(
        &[],
        &[
            ("ai/notes.md", "notes\n"),
            (".claude/commands/setup.md", "setup\n"),
        ],
    );
    let report = save_package(
        &world.registry,
        &author,
        "pkg@1.0.0",
        &SaveOptions::default(),
        None,
    )
    .unwrap();

    let consumer = world.workspace(&[".claude", ".cursor"], &[]);
    let install = |consumer: &Workspace| {
        let resolution = resolve(
            &world.registry,
            consumer,
            &[(name("pkg"), Some(report.version.clone()))],
            BTreeMap::new(),
            ResolveOptions {
                force: true,
                ..Default::default()
            },
        )
        .unwrap();
        install_packages(consumer, &resolution, &overwrite_options()).unwrap();
    };
    install(&consumer);

    let snapshot: Vec<(Utf8PathBuf, Vec<u8>)> = {
        let index = consumer.load_package_index(&name("pkg")).unwrap().unwrap();
        index
            .files
            .values()
            .flatten()
            .map(Utf8PathBuf::from)
            .filter(|path| path.is_file())
            .map(|path| {
                let bytes = std::fs::read(&path).unwrap();
                (path, bytes)
            })
            .collect()
    };
    assert!(!snapshot.is_empty());

    uninstall_package(&consumer, &name("pkg"), &UninstallOptions::default()).unwrap();
    for (path, _) in &snapshot {
        assert!(!path.exists(), "{path} should have been removed");
    }

    install(&consumer);
    for (path, bytes) in &snapshot {
        assert_eq!(&std::fs::read(path).unwrap(), bytes, "{path} should be restored");
    }
}

/// S6: consecutive saves keep at most one WIP per workspace hash, but
/// don't touch another workspace's WIPs.
#[test]
fn wip_bucket_stays_at_one_per_workspace() {
    let mut world = World::new();
    let ws_one = world.workspace(&[], &[("ai/x.md", "one\n")]);
    let ws_two = world.workspace(&[], &[("ai/x.md", "two\n")]);

    let from_other = save_package(
        &world.registry,
        &ws_two,
        "pkg",
        &SaveOptions::default(),
        None,
    )
    .unwrap();

    save_package(&world.registry, &ws_one, "pkg", &SaveOptions::default(), None).unwrap();
    let second = save_package(
        &world.registry,
        &ws_one,
        "pkg",
        &SaveOptions::default(),
        None,
    )
    .unwrap();

    let mut versions = world.registry.list_versions(&name("pkg")).unwrap();
    versions.sort();
    let mut expected = vec![from_other.version, second.version];
    expected.sort();
    assert_eq!(versions, expected);
}
