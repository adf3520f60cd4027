//! Scheduler behavior: dependency-ordered execution, queue priority, error
//! propagation, and whole-line output.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use mint::{
    BuildConfiguration, CapturedOutput, Diagnostics, OutputSink, TargetMgr, TargetState,
};

static TEST_SEQ: AtomicU32 = AtomicU32::new(0);

struct TestProject {
    root: PathBuf,
}

impl TestProject {
    fn new(module_src: &str) -> Self {
        let seq = TEST_SEQ.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!(
            "mint-sched-test-{}-{seq}",
            std::process::id()
        ));
        std::fs::create_dir_all(root.join("src")).expect("create test project");
        std::fs::create_dir_all(root.join("build")).expect("create build dir");
        std::fs::write(root.join("src/module.mint"), module_src).expect("write module");
        Self { root }
    }

    fn config(&self) -> BuildConfiguration {
        let build_dir = self.root.join("build").to_string_lossy().into_owned();
        let source_dir = self.root.join("src").to_string_lossy().into_owned();
        let mut config = BuildConfiguration::with_diagnostics(build_dir, Diagnostics::captured());
        assert!(
            config.add_source_project(&source_dir, true),
            "project should load: {}",
            config.diags.output()
        );
        config
    }
}

impl Drop for TestProject {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

fn run_build(config: &mut BuildConfiguration, names: &[&str]) -> (bool, String) {
    let captured = CapturedOutput::new();
    let sink: OutputSink = Arc::new(Mutex::new(captured.clone()));
    let names: Vec<String> = names.iter().map(|s| (*s).to_owned()).collect();
    let ok = config.build_targets(&names, Some(sink));
    (ok, captured.contents())
}

#[test]
fn chain_builds_in_dependency_order() {
    let project = TestProject::new(
        "c = target { outputs = ['c.out'], actions = [{message = 'built c'}] }\n\
         b = target { outputs = ['b.out'], depends = [c], actions = [{message = 'built b'}] }\n\
         a = target { outputs = ['a.out'], depends = [b], actions = [{message = 'built a'}] }\n",
    );
    let mut config = project.config();
    config.max_jobs = 1;
    let (ok, output) = run_build(&mut config, &["a"]);
    assert!(ok, "build should succeed: {}", config.diags.output());
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(
        lines,
        vec!["built c", "built b", "built a"],
        "dependencies must build before dependents"
    );
}

#[test]
fn queue_orders_by_sort_key() {
    let project = TestProject::new(
        "zeta = target { outputs = ['z.out'], actions = [{message = 'z'}] }\n\
         alpha = target { outputs = ['a.out'], actions = [{message = 'a'}] }\n",
    );
    let mut config = project.config();
    config.max_jobs = 1;
    let (ok, output) = run_build(&mut config, &[]);
    assert!(ok, "build should succeed: {}", config.diags.output());
    let lines: Vec<&str> = output.lines().collect();
    assert_eq!(lines, vec!["a", "z"], "named targets pop in sort-key order");
}

#[test]
fn shell_actions_run_and_write_output_lines() {
    let project = TestProject::new(
        "t = target { outputs = ['t.out'], actions = ['echo hello world'] }\n",
    );
    let mut config = project.config();
    let (ok, output) = run_build(&mut config, &["t"]);
    assert!(ok, "build should succeed: {}", config.diags.output());
    assert!(
        output.lines().any(|l| l == "hello world"),
        "echoed line should arrive whole, got: {output:?}"
    );
}

#[test]
fn failing_action_marks_target_and_dependents_error() {
    let project = TestProject::new(
        "bad = target { outputs = ['bad.out'], actions = [['false']] }\n\
         top = target { outputs = ['top.out'], depends = [bad], actions = [{message = 'top'}] }\n",
    );
    let mut config = project.config();
    let (ok, output) = run_build(&mut config, &["top"]);
    assert!(!ok, "build must fail when an action fails");
    assert!(
        !output.contains("top"),
        "dependent must not run after a failed dependency"
    );
    assert!(config.diags.output().contains("failed"));
}

#[test]
fn up_to_date_targets_do_not_run_actions() {
    let project = TestProject::new(
        "t = target { sources = ['a.c'], outputs = ['a.o'], actions = [{message = 'ran'}] }\n",
    );
    std::fs::write(project.root.join("src/a.c"), "x\n").expect("write source");
    std::fs::write(project.root.join("build/a.o"), "y\n").expect("write output");
    let mut config = project.config();
    let (ok, output) = run_build(&mut config, &["t"]);
    assert!(ok, "build should succeed: {}", config.diags.output());
    assert!(
        output.is_empty(),
        "an up-to-date target must not rebuild, got: {output:?}"
    );
}

#[test]
fn independent_targets_all_complete_with_parallelism() {
    let project = TestProject::new(
        "a = target { outputs = ['a.out'], actions = ['echo a done'] }\n\
         b = target { outputs = ['b.out'], actions = ['echo b done'] }\n\
         c = target { outputs = ['c.out'], actions = ['echo c done'] }\n",
    );
    let mut config = project.config();
    config.max_jobs = 3;
    let (ok, output) = run_build(&mut config, &[]);
    assert!(ok, "build should succeed: {}", config.diags.output());
    let mut lines: Vec<&str> = output.lines().collect();
    lines.sort_unstable();
    assert_eq!(lines, vec!["a done", "b done", "c done"]);

    let mut mgr = TargetMgr::new();
    config.gather_targets(&mut mgr);
    // Re-gathering creates fresh targets; the built ones finished.
    assert_eq!(mgr.target_count(), 3);
}

#[test]
fn excluded_targets_are_skipped_by_default_build() {
    let project = TestProject::new(
        "hidden = target { outputs = ['h.out'], exclude_from_all = true, actions = [{message = 'hidden'}] }\n\
         shown = target { outputs = ['s.out'], actions = [{message = 'shown'}] }\n",
    );
    let mut config = project.config();
    let (ok, output) = run_build(&mut config, &[]);
    assert!(ok, "build should succeed: {}", config.diags.output());
    assert!(output.contains("shown"));
    assert!(!output.contains("hidden"), "excluded target must not build");
}

#[test]
fn explicit_target_selection_builds_only_that_chain() {
    let project = TestProject::new(
        "a = target { outputs = ['a.out'], actions = [{message = 'a'}] }\n\
         b = target { outputs = ['b.out'], actions = [{message = 'b'}] }\n",
    );
    let mut config = project.config();
    let (ok, output) = run_build(&mut config, &["b"]);
    assert!(ok, "build should succeed: {}", config.diags.output());
    assert_eq!(output.lines().collect::<Vec<_>>(), vec!["b"]);
}

#[test]
fn unknown_target_is_an_error() {
    let project = TestProject::new("a = target { outputs = ['a.out'] }\n");
    let mut config = project.config();
    let (ok, _output) = run_build(&mut config, &["nope"]);
    assert!(!ok);
    assert!(config.diags.output().contains("Unknown target"));
}

#[test]
fn finished_state_settles_after_build() {
    let project = TestProject::new(
        "t = target { outputs = ['t.out'], actions = [{message = 'building'}] }\n",
    );
    let mut config = project.config();
    let mut mgr = TargetMgr::new();
    config.gather_targets(&mut mgr);
    let t = mgr
        .target_ids()
        .find(|&id| mgr.target(id).path.as_deref() == Some("t"))
        .expect("target t");
    assert_eq!(mgr.target(t).state, TargetState::Initialized);
    let (ok, _) = run_build(&mut config, &["t"]);
    assert!(ok);
}
