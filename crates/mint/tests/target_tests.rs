//! Target graph construction and the up-to-date check, driven through real
//! module files in a temporary project.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use mint::{BuildConfiguration, Diagnostics, TargetMgr, TargetState};

static TEST_SEQ: AtomicU32 = AtomicU32::new(0);

/// A throwaway project directory with a `module.mint` and optional extra
/// files. Removed on drop.
struct TestProject {
    root: PathBuf,
}

impl TestProject {
    fn new(module_src: &str) -> Self {
        let seq = TEST_SEQ.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!(
            "mint-target-test-{}-{seq}",
            std::process::id()
        ));
        std::fs::create_dir_all(root.join("src")).expect("create test project");
        std::fs::create_dir_all(root.join("build")).expect("create build dir");
        std::fs::write(root.join("src/module.mint"), module_src).expect("write module");
        Self { root }
    }

    fn source_dir(&self) -> String {
        self.root.join("src").to_string_lossy().into_owned()
    }

    fn build_dir(&self) -> String {
        self.root.join("build").to_string_lossy().into_owned()
    }

    fn touch(&self, rel: &str, contents: &str) {
        std::fs::write(self.root.join("src").join(rel), contents).expect("write file");
    }

    fn touch_output(&self, rel: &str, contents: &str) {
        std::fs::write(self.root.join("build").join(rel), contents).expect("write output");
    }

    /// Loads the project and gathers its targets.
    fn gather(&self) -> (BuildConfiguration, TargetMgr) {
        let mut config =
            BuildConfiguration::with_diagnostics(self.build_dir(), Diagnostics::captured());
        assert!(
            config.add_source_project(&self.source_dir(), true),
            "project should load: {}",
            config.diags.output()
        );
        let mut mgr = TargetMgr::new();
        config.gather_targets(&mut mgr);
        (config, mgr)
    }
}

impl Drop for TestProject {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

fn find_target(mgr: &TargetMgr, name: &str) -> mint::TargetId {
    mgr.target_ids()
        .find(|&id| mgr.target(id).path.as_deref() == Some(name))
        .unwrap_or_else(|| panic!("target '{name}' not found"))
}

#[test]
fn dependency_edges_are_symmetric() {
    let project = TestProject::new(
        "c = target { outputs = ['c.out'] }\n\
         b = target { outputs = ['b.out'], depends = [c] }\n\
         a = target { outputs = ['a.out'], depends = [b] }\n",
    );
    let (_config, mgr) = project.gather();
    assert_eq!(mgr.target_count(), 3);
    for t in mgr.target_ids() {
        for &d in &mgr.target(t).depends {
            assert!(
                mgr.target(d).dependents.contains(&t),
                "dependents must mirror depends"
            );
        }
        for &d in &mgr.target(t).dependents {
            assert!(
                mgr.target(d).depends.contains(&t),
                "depends must mirror dependents"
            );
        }
    }
}

#[test]
fn file_back_references_are_consistent() {
    let project = TestProject::new(
        "t = target { sources = ['a.c'], outputs = ['a.o'] }\n",
    );
    project.touch("a.c", "int main() {}\n");
    let (_config, mgr) = project.gather();
    let t = find_target(&mgr, "t");
    for &f in &mgr.target(t).sources {
        assert!(mgr.file(f).source_for.contains(&t));
    }
    for &f in &mgr.target(t).outputs {
        assert!(mgr.file(f).output_of.contains(&t));
    }
}

#[test]
fn files_are_deduplicated_by_path() {
    let project = TestProject::new(
        "a = target { sources = ['shared.c'], outputs = ['a.out'] }\n\
         b = target { sources = ['shared.c'], outputs = ['b.out'] }\n",
    );
    project.touch("shared.c", "\n");
    let (_config, mgr) = project.gather();
    let a = find_target(&mgr, "a");
    let b = find_target(&mgr, "b");
    assert_eq!(
        mgr.target(a).sources[0],
        mgr.target(b).sources[0],
        "one File per absolute path"
    );
    let shared = mgr.target(a).sources[0];
    assert_eq!(mgr.file(shared).source_for.len(), 2);
}

#[test]
fn missing_output_makes_target_ready() {
    let project = TestProject::new(
        "t = target { sources = ['a.c'], outputs = ['a.o'] }\n",
    );
    project.touch("a.c", "int main() {}\n");
    let (mut config, mut mgr) = project.gather();
    let t = find_target(&mgr, "t");
    assert_eq!(mgr.target(t).state, TargetState::Initialized);
    mgr.check_state(t, &mut config.diags, &config.sources);
    assert_eq!(mgr.target(t).state, TargetState::Ready);
}

#[test]
fn newer_output_means_up_to_date() {
    let project = TestProject::new(
        "t = target { sources = ['a.c'], outputs = ['a.o'] }\n",
    );
    project.touch("a.c", "int main() {}\n");
    // Written after the source, so at least as new.
    project.touch_output("a.o", "object code\n");
    let (mut config, mut mgr) = project.gather();
    let t = find_target(&mgr, "t");
    mgr.check_state(t, &mut config.diags, &config.sources);
    assert_eq!(mgr.target(t).state, TargetState::Finished);
    assert_eq!(config.diags.error_count(), 0);
}

#[test]
fn missing_source_with_no_producer_is_fatal() {
    let project = TestProject::new(
        "t = target { sources = ['nope.c'], outputs = ['a.o'] }\n",
    );
    let (mut config, mut mgr) = project.gather();
    let t = find_target(&mgr, "t");
    mgr.check_state(t, &mut config.diags, &config.sources);
    assert!(config.diags.error_count() >= 1);
    assert!(
        config.diags.output().contains("non-existent file"),
        "got: {}",
        config.diags.output()
    );
}

#[test]
fn produced_source_makes_target_wait() {
    let project = TestProject::new(
        "gen = target { outputs = ['gen.c'] }\n\
         t = target { sources = ['gen.c'], outputs = ['gen.o'] }\n",
    );
    let (mut config, mut mgr) = project.gather();
    let t = find_target(&mgr, "t");
    mgr.check_state(t, &mut config.diags, &config.sources);
    assert_eq!(
        mgr.target(t).state,
        TargetState::Waiting,
        "a target whose source is produced by a pending target must wait"
    );
    let producer = find_target(&mgr, "gen");
    assert_eq!(mgr.target(producer).state, TargetState::Ready);
}

#[test]
fn dependency_cycle_reports_two_errors() {
    let project = TestProject::new(
        "a = target { outputs = ['a.out'], depends = [b] }\n\
         b = target { outputs = ['b.out'], depends = [a] }\n",
    );
    let (mut config, mut mgr) = project.gather();
    let a = find_target(&mgr, "a");
    mgr.check_state(a, &mut config.diags, &config.sources);
    let output = config.diags.output();
    let error_lines = output
        .lines()
        .filter(|line| line.contains(" error: "))
        .count();
    assert_eq!(
        error_lines, 2,
        "cycle must report one error per endpoint, got: {output}"
    );
    assert!(output.contains("Circular dependency"));
    assert_ne!(config.exit_code(), 0);
}

#[test]
fn forward_reference_in_depends_resolves() {
    // `a` references `b` before `b` is defined; lazy realization makes
    // this work.
    let project = TestProject::new(
        "a = target { outputs = ['a.out'], depends = [b] }\n\
         b = target { outputs = ['b.out'] }\n",
    );
    let (config, mgr) = project.gather();
    assert_eq!(config.diags.error_count(), 0, "{}", config.diags.output());
    let a = find_target(&mgr, "a");
    assert_eq!(mgr.target(a).depends.len(), 1);
}

#[test]
fn target_flags_are_read() {
    let project = TestProject::new(
        "t = target { outputs = ['t.out'], exclude_from_all = true, internal = true }\n",
    );
    let (_config, mgr) = project.gather();
    let t = find_target(&mgr, "t");
    assert!(mgr.target(t).exclude_from_all);
    assert!(mgr.target(t).internal);
    assert!(!mgr.target(t).source_only);
}

#[test]
fn sources_resolve_against_source_dir() {
    let project = TestProject::new(
        "t = target { sources = ['a.c'], outputs = ['a.o'] }\n",
    );
    project.touch("a.c", "\n");
    let (_config, mgr) = project.gather();
    let t = find_target(&mgr, "t");
    let src = mgr.file(mgr.target(t).sources[0]).name.clone();
    assert!(
        src.ends_with("/src/a.c") && src.starts_with('/'),
        "source should be absolute under the module dir: {src}"
    );
    let out = mgr.file(mgr.target(t).outputs[0]).name.clone();
    assert!(
        out.ends_with("/build/a.o"),
        "output should resolve against the build dir: {out}"
    );
}
