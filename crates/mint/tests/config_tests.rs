//! End-to-end configuration scenarios: option discovery and help, option
//! persistence through `build.mint`, glob, and Makefile emission.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use mint::{BuildConfiguration, Diagnostics, NodeKind, paths};

static TEST_SEQ: AtomicU32 = AtomicU32::new(0);

struct TestProject {
    root: PathBuf,
}

impl TestProject {
    fn new(module_src: &str) -> Self {
        let seq = TEST_SEQ.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!(
            "mint-config-test-{}-{seq}",
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

    fn config(&self) -> BuildConfiguration {
        let mut config =
            BuildConfiguration::with_diagnostics(self.build_dir(), Diagnostics::captured());
        assert!(
            config.add_source_project(&self.source_dir(), true),
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

#[test]
fn options_help_lists_flag_type_and_default() {
    let project = TestProject::new(
        "option foo : int { help = 'Level of foo.', default = 3 }\n",
    );
    let mut config = project.config();
    let help = config.show_options();
    assert!(help.contains("--foo : int"), "got: {help}");
    assert!(help.contains("Level of foo."), "got: {help}");
    assert!(help.contains("[default = 3]"), "got: {help}");
}

#[test]
fn option_names_show_dashes_but_accept_underscores() {
    let project = TestProject::new(
        "option enable_debug : bool { help = 'Debug build.', default = false }\n",
    );
    let mut config = project.config();
    let help = config.show_options();
    assert!(help.contains("--enable-debug"), "got: {help}");

    config.set_options(&[("enable-debug".to_owned(), "true".to_owned())]);
    assert_eq!(config.diags.error_count(), 0, "{}", config.diags.output());
    config.set_options(&[("enable_debug".to_owned(), "false".to_owned())]);
    assert_eq!(config.diags.error_count(), 0, "{}", config.diags.output());
}

#[test]
fn configure_writes_and_rereads_option_values() {
    let project = TestProject::new(
        "option jobs : int { help = 'Parallelism.', default = 2 }\n",
    );
    {
        let mut config = project.config();
        config.set_options(&[("jobs".to_owned(), "7".to_owned())]);
        assert!(config.configure(), "{}", config.diags.output());
    }
    let written = std::fs::read_to_string(project.root.join("build/build.mint"))
        .expect("build.mint should exist");
    assert!(
        written.contains("option jobs { value = 7 }"),
        "got: {written}"
    );

    // A fresh invocation reads the recorded configuration back.
    let mut fresh =
        BuildConfiguration::with_diagnostics(project.build_dir(), Diagnostics::captured());
    assert!(fresh.read_config(), "{}", fresh.diags.output());
    assert_eq!(fresh.diags.error_count(), 0, "{}", fresh.diags.output());
    let written_again = {
        assert!(fresh.configure(), "{}", fresh.diags.output());
        std::fs::read_to_string(project.root.join("build/build.mint")).expect("build.mint")
    };
    assert!(
        written_again.contains("option jobs { value = 7 }"),
        "option value must survive a round trip, got: {written_again}"
    );
}

#[test]
fn unknown_option_assignment_is_an_error() {
    let project = TestProject::new("x = 1\n");
    let mut config = project.config();
    config.set_options(&[("nope".to_owned(), "1".to_owned())]);
    assert!(config.diags.output().contains("Unknown option"));
    assert_ne!(config.exit_code(), 0);
}

#[test]
fn option_value_coerces_to_declared_type() {
    let project = TestProject::new(
        "option level : float { default = 1.0 }\n",
    );
    let mut config = project.config();
    config.set_options(&[("level".to_owned(), "2".to_owned())]);
    assert!(config.configure(), "{}", config.diags.output());
    let written =
        std::fs::read_to_string(project.root.join("build/build.mint")).expect("build.mint");
    assert!(
        written.contains("option level { value = 2.0 }"),
        "integer input should coerce to the declared float type, got: {written}"
    );
}

#[test]
fn glob_finds_matching_files_in_directory_order() {
    let project = TestProject::new("cs = glob('lib/*.c')\n");
    std::fs::create_dir_all(project.root.join("src/lib")).expect("create lib dir");
    std::fs::write(project.root.join("src/lib/a.c"), "\n").expect("write");
    std::fs::write(project.root.join("src/lib/b.c"), "\n").expect("write");
    std::fs::write(project.root.join("src/lib/README"), "\n").expect("write");

    let config = project.config();
    assert_eq!(config.diags.error_count(), 0, "{}", config.diags.output());
    let module = config.projects[0].main_module.expect("main module");
    let cs_name = config.interns.find("cs").expect("cs interned");
    let value = config
        .graph
        .module(module)
        .own_attr(cs_name)
        .expect("cs attribute");
    let NodeKind::List(elements) = config.graph.kind(value).clone() else {
        panic!("glob should produce a list");
    };
    let mut found: Vec<String> = elements
        .iter()
        .map(|&e| {
            let s = config.graph.as_str(e).expect("glob results are strings");
            config.interns.get(s).to_owned()
        })
        .collect();
    found.sort();
    assert_eq!(found.len(), 2, "only .c files match: {found:?}");
    assert!(found[0].ends_with("/lib/a.c") && paths::is_absolute(&found[0]));
    assert!(found[1].ends_with("/lib/b.c"));
}

#[test]
fn glob_rejects_absolute_and_parent_patterns() {
    let project = TestProject::new("xs = glob('/etc/*')\n");
    let config = project.config();
    assert!(
        config.diags.output().contains("Absolute path not allowed"),
        "got: {}",
        config.diags.output()
    );

    let project2 = TestProject::new("xs = glob('../*.c')\n");
    let config2 = project2.config();
    assert!(
        config2.diags.output().contains("not allowed"),
        "got: {}",
        config2.diags.output()
    );
}

#[test]
fn makefile_contains_rules_and_actions() {
    let project = TestProject::new(
        "t = target { sources = ['a.c'], outputs = ['a.o'], actions = ['cc -c a.c'] }\n",
    );
    std::fs::write(project.root.join("src/a.c"), "\n").expect("write");
    let mut config = project.config();
    let makefile = config.generate_makefile();
    assert!(makefile.contains("all: "), "got: {makefile}");
    assert!(makefile.contains("a.o: "), "got: {makefile}");
    assert!(makefile.contains("\tcc -c a.c"), "got: {makefile}");
}

#[test]
fn do_actions_run_at_configure_time() {
    let project = TestProject::new("do console.info('configured project')\n");
    let mut config = project.config();
    assert!(config.configure(), "{}", config.diags.output());
    assert!(
        config.diags.output().contains("configured project"),
        "got: {}",
        config.diags.output()
    );
}

#[test]
fn cached_params_persist_in_config() {
    let project = TestProject::new(
        "tool = object { cached param version : string = '1.2' }\n",
    );
    let mut config = project.config();
    assert!(config.configure(), "{}", config.diags.output());
    let written =
        std::fs::read_to_string(project.root.join("build/build.mint")).expect("build.mint");
    assert!(
        written.contains("cached tool {") && written.contains("version = '1.2'"),
        "got: {written}"
    );
}
