//! The build configuration: the top-level object tying together the graph,
//! the projects, and the `build.mint` cache file.
//!
//! `build.mint`, stored at the build root, records each project's source
//! directory, option values, and cached attributes. It is written in the
//! configuration language itself and read back by the same parser.

use std::sync::{Arc, Mutex};

use crate::{
    diagnostics::Diagnostics,
    evaluator::{Evaluator, Fundamentals},
    graph::{Graph, OpKind},
    intern::Interns,
    jobs::JobMgr,
    parser::Parser,
    paths,
    process::OutputSink,
    project::Project,
    source::{Location, SourceMap, TextBuffer},
    target::TargetState,
    target_mgr::TargetMgr,
    types::TypeRegistry,
};

pub const CONFIG_FILE: &str = "build.mint";

pub struct BuildConfiguration {
    pub graph: Graph,
    pub interns: Interns,
    pub types: TypeRegistry,
    pub sources: SourceMap,
    pub diags: Diagnostics,
    pub fundamentals: Fundamentals,
    build_root: String,
    pub projects: Vec<Project>,
    pub max_jobs: usize,
    pub trace_config: bool,
}

impl BuildConfiguration {
    #[must_use]
    pub fn new(build_root: impl Into<String>) -> Self {
        Self::with_diagnostics(build_root, Diagnostics::new())
    }

    /// Constructor for tests: a captured diagnostics sink.
    #[must_use]
    pub fn with_diagnostics(build_root: impl Into<String>, diags: Diagnostics) -> Self {
        let mut graph = Graph::new();
        let mut interns = Interns::new();
        let mut types = TypeRegistry::new();
        let fundamentals = crate::fundamentals::build(&mut graph, &mut interns, &mut types);
        Self {
            graph,
            interns,
            types,
            sources: SourceMap::new(),
            diags,
            fundamentals,
            build_root: build_root.into(),
            projects: Vec::new(),
            max_jobs: 4,
            trace_config: false,
        }
    }

    pub fn build_root(&self) -> &str {
        &self.build_root
    }

    /// Non-zero once any error or fatal diagnostic has been recorded.
    pub fn exit_code(&self) -> i32 {
        if self.diags.error_count() > 0 { 1 } else { 0 }
    }

    /// Creates a project over `source_dir` and loads its root module. The
    /// first project added is the main project.
    pub fn add_source_project(&mut self, source_dir: &str, main: bool) -> bool {
        let is_dir = std::fs::metadata(source_dir)
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            self.diags.error(
                Location::NONE,
                &self.sources,
                &format!("Source directory '{source_dir}' not found"),
            );
            return false;
        }
        if main && !self.projects.is_empty() {
            self.diags.warn(
                Location::NONE,
                &self.sources,
                "Main project has already been set",
            );
        }
        let id = crate::module::ProjectId::new(self.projects.len());
        let mut project = Project::new(id, source_dir, self.build_root.clone());
        let ok = project.load_main_module(
            &mut self.graph,
            &mut self.interns,
            &mut self.types,
            &mut self.sources,
            &mut self.diags,
            self.fundamentals,
        );
        self.projects.push(project);
        ok
    }

    /// Reads `build.mint` from the build root, creating the projects it
    /// names and restoring option values and cached attributes. Returns
    /// false when no configuration exists.
    pub fn read_config(&mut self) -> bool {
        let config_path = paths::combine(&self.build_root, CONFIG_FILE);
        let Ok(bytes) = std::fs::read(&config_path) else {
            return false;
        };
        let buffer = self.sources.add(TextBuffer::new(config_path, bytes));
        let projects = {
            let buf = self.sources.get(buffer);
            let mut parser = Parser::new(
                buffer,
                buf,
                &mut self.graph,
                &mut self.interns,
                &mut self.types,
                &mut self.diags,
                &self.sources,
            );
            parser.parse_projects()
        };
        if self.diags.error_count() > 0 {
            return false;
        }
        for project_node in projects {
            let Some((OpKind::Project, args)) = self.graph.as_oper(project_node) else {
                self.diags.error(
                    self.graph.loc(project_node),
                    &self.sources,
                    "Invalid node type for build configuration",
                );
                continue;
            };
            let args: Vec<_> = args.to_vec();
            let Some(dir_id) = self.graph.as_str(args[0]) else {
                continue;
            };
            let source_dir = self.interns.get(dir_id).to_owned();
            let main = self.projects.is_empty();
            if !self.add_source_project(&source_dir, main) {
                continue;
            }
            let project_index = self.projects.len() - 1;
            self.apply_project_config(project_index, &args[1..]);
        }
        true
    }

    /// Applies the recorded entries of one `project { ... }` block.
    fn apply_project_config(&mut self, project_index: usize, entries: &[crate::graph::NodeId]) {
        let names = *self.interns.names();
        for &entry in entries {
            let Some((op, args)) = self.graph.as_oper(entry) else {
                continue;
            };
            let args: Vec<_> = args.to_vec();
            match op {
                OpKind::MakeOption => {
                    let Some(name) = self.graph.as_ident(args[0]) else {
                        continue;
                    };
                    // Recorded form: option <name> { value = <literal> }.
                    let mut value = None;
                    for &set in &args[2..] {
                        if let Some((OpKind::SetMember, set_args)) = self.graph.as_oper(set) {
                            if self.graph.as_ident(set_args[0]) == Some(names.value) {
                                value = Some(set_args[1]);
                            }
                        }
                    }
                    let Some(value_expr) = value else {
                        continue;
                    };
                    let name_text = self.interns.get(name).to_owned();
                    let value_node = {
                        let module = self.projects[project_index]
                            .main_module
                            .unwrap_or(self.fundamentals.module);
                        let mut ev = Evaluator::new(
                            &mut self.graph,
                            &mut self.interns,
                            &mut self.types,
                            &self.sources,
                            &mut self.diags,
                            self.fundamentals,
                            module,
                        );
                        ev.eval(value_expr)
                    };
                    let project = &mut self.projects[project_index];
                    let module = project.main_module.unwrap_or(self.fundamentals.module);
                    // Find the option object and set its value directly.
                    let option = project
                        .find_options(&self.graph, self.fundamentals)
                        .into_iter()
                        .find(|&obj| {
                            self.graph
                                .object(obj)
                                .name
                                .is_some_and(|n| self.interns.get(n) == name_text)
                        });
                    match option {
                        Some(option) => {
                            let mut ev = Evaluator::new(
                                &mut self.graph,
                                &mut self.interns,
                                &mut self.types,
                                &self.sources,
                                &mut self.diags,
                                self.fundamentals,
                                module,
                            );
                            crate::project::set_option_value(&mut ev, option, value_node);
                        }
                        None => {
                            self.diags.warn(
                                self.graph.loc(entry),
                                &self.sources,
                                &format!("Ignoring unknown option '{name_text}'"),
                            );
                        }
                    }
                }
                OpKind::MakeCached => {
                    let Some(object_name) = self.graph.as_ident(args[0]) else {
                        continue;
                    };
                    for &set in &args[1..] {
                        let Some((OpKind::SetMember, set_args)) = self.graph.as_oper(set) else {
                            continue;
                        };
                        let Some(attr) = self.graph.as_ident(set_args[0]) else {
                            continue;
                        };
                        let value_expr = set_args[1];
                        let module = self.projects[project_index]
                            .main_module
                            .unwrap_or(self.fundamentals.module);
                        let value = {
                            let mut ev = Evaluator::new(
                                &mut self.graph,
                                &mut self.interns,
                                &mut self.types,
                                &self.sources,
                                &mut self.diags,
                                self.fundamentals,
                                module,
                            );
                            ev.eval(value_expr)
                        };
                        self.projects[project_index].add_pending_cached(object_name, attr, value);
                    }
                }
                OpKind::SetMember => {
                    // Reserved for future per-project settings.
                }
                _ => {
                    self.diags.error(
                        self.graph.loc(entry),
                        &self.sources,
                        "Invalid node type for project configuration",
                    );
                }
            }
        }
        self.projects[project_index].apply_cached(
            &mut self.graph,
            &mut self.interns,
            &mut self.types,
            &self.sources,
            &mut self.diags,
            self.fundamentals,
        );
    }

    /// Writes the authoritative `build.mint` for the current configuration.
    pub fn write_config(&mut self) -> std::io::Result<()> {
        let mut out = String::from("# Generated build configuration; edit with care.\n");
        for project in &self.projects {
            project.write_config_block(&self.graph, &self.interns, self.fundamentals, &mut out);
        }
        let config_path = paths::combine(&self.build_root, CONFIG_FILE);
        std::fs::write(config_path, out)
    }

    /// Applies `--name=value` assignments from the command line. The first
    /// project defining an option with the given name wins.
    pub fn set_options(&mut self, assignments: &[(String, String)]) {
        for (name, value) in assignments {
            let mut found = false;
            for i in 0..self.projects.len() {
                let has_option = {
                    let normalized = name.replace('-', "_");
                    self.projects[i]
                        .find_options(&self.graph, self.fundamentals)
                        .into_iter()
                        .any(|obj| {
                            self.graph
                                .object(obj)
                                .name
                                .is_some_and(|n| self.interns.get(n) == normalized)
                        })
                };
                if !has_option {
                    continue;
                }
                self.projects[i].set_config_option(
                    &mut self.graph,
                    &mut self.interns,
                    &mut self.types,
                    &self.sources,
                    &mut self.diags,
                    self.fundamentals,
                    name,
                    value,
                );
                found = true;
                break;
            }
            if !found {
                self.diags.error(
                    Location::NONE,
                    &self.sources,
                    &format!("Unknown option: '{name}'"),
                );
                self.diags.recovered();
            }
        }
    }

    /// The configure phase: realize every module object, run deferred
    /// actions, and persist the configuration.
    pub fn configure(&mut self) -> bool {
        let trace = self.trace_config;
        for i in 0..self.projects.len() {
            self.projects[i].configure(
                &mut self.graph,
                &mut self.interns,
                &mut self.types,
                &self.sources,
                &mut self.diags,
                self.fundamentals,
                trace,
            );
        }
        if self.diags.error_count() > 0 {
            return false;
        }
        if let Err(err) = self.write_config() {
            self.diags.error(
                Location::NONE,
                &self.sources,
                &format!("Cannot write build configuration: {err}"),
            );
            return false;
        }
        true
    }

    /// Renders option help for every project.
    pub fn show_options(&mut self) -> String {
        let mut out = String::from("Project options:\n");
        for i in 0..self.projects.len() {
            let rendered = self.projects[i].show_options(
                &mut self.graph,
                &mut self.interns,
                &mut self.types,
                &self.sources,
                &mut self.diags,
                self.fundamentals,
            );
            out.push_str(&rendered);
        }
        out
    }

    /// Registers all targets with a fresh target manager.
    pub fn gather_targets(&mut self, mgr: &mut TargetMgr) {
        for project in &self.projects {
            project.gather_targets(
                &mut self.graph,
                &mut self.interns,
                &mut self.types,
                &self.sources,
                &mut self.diags,
                self.fundamentals,
                mgr,
            );
        }
    }

    /// The build phase: gather targets, seed the ready queue, and run jobs.
    /// With no names given, every default target is built.
    pub fn build_targets(&mut self, names: &[String], sink: Option<OutputSink>) -> bool {
        let mut mgr = TargetMgr::new();
        self.gather_targets(&mut mgr);
        if self.diags.error_count() > 0 {
            return false;
        }
        let sink = sink.unwrap_or_else(|| {
            let stdout: OutputSink = Arc::new(Mutex::new(std::io::stdout()));
            stdout
        });
        let mut jobs = JobMgr::new(self.max_jobs, sink);
        if names.is_empty() {
            jobs.add_all_ready(&mut mgr, &mut self.diags, &self.sources);
        } else {
            for name in names {
                let found = mgr
                    .target_ids()
                    .find(|&id| mgr.target(id).path.as_deref() == Some(name.as_str()));
                match found {
                    Some(id) => jobs.add_ready(&mut mgr, &mut self.diags, &self.sources, id),
                    None => {
                        self.diags.error(
                            Location::NONE,
                            &self.sources,
                            &format!("Unknown target: '{name}'"),
                        );
                        self.diags.recovered();
                    }
                }
            }
        }
        if self.diags.error_count() > 0 {
            return false;
        }
        let module = self
            .projects
            .first()
            .and_then(|p| p.main_module)
            .unwrap_or(self.fundamentals.module);
        let mut ev = Evaluator::new(
            &mut self.graph,
            &mut self.interns,
            &mut self.types,
            &self.sources,
            &mut self.diags,
            self.fundamentals,
            module,
        );
        ev.trace_commands = self.trace_config;
        jobs.run(&mut ev, &mut mgr);
        let failed = mgr
            .target_ids()
            .any(|id| mgr.target(id).state == TargetState::Error);
        !failed && self.diags.error_count() == 0
    }

    /// Emits a Makefile equivalent of the target graph.
    pub fn generate_makefile(&mut self) -> String {
        let mut mgr = TargetMgr::new();
        self.gather_targets(&mut mgr);
        crate::makefile::generate(self, &mut mgr)
    }
}

/// Initializes a new build directory: records the source project in a fresh
/// `build.mint`.
pub fn init_build_dir(build_root: &str, source_dir: &str) -> BuildConfiguration {
    let mut config = BuildConfiguration::new(build_root);
    let absolute = if paths::is_absolute(source_dir) {
        source_dir.to_owned()
    } else {
        let cwd = std::env::current_dir()
            .map(|d| d.to_string_lossy().into_owned())
            .unwrap_or_default();
        paths::normalize(&paths::combine(&cwd, source_dir))
    };
    if config.add_source_project(&absolute, true) {
        if let Err(err) = config.write_config() {
            let message = format!("Cannot write build configuration: {err}");
            config.diags.error(Location::NONE, &config.sources, &message);
        }
    }
    config
}
