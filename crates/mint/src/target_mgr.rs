//! The target manager: arenas for targets and files, dependency edges, and
//! the up-to-date check.

use ahash::AHashMap;

use crate::{
    diagnostics::Diagnostics,
    object::ObjectId,
    source::{Location, SourceMap},
    target::{File, FileId, FileStatus, Target, TargetId, TargetState},
};

#[derive(Debug, Default)]
pub struct TargetMgr {
    targets: Vec<Target>,
    by_definition: AHashMap<ObjectId, TargetId>,
    files: Vec<File>,
    by_path: AHashMap<String, FileId>,
}

impl TargetMgr {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(&self, id: TargetId) -> &Target {
        &self.targets[id.index()]
    }

    pub fn target_mut(&mut self, id: TargetId) -> &mut Target {
        &mut self.targets[id.index()]
    }

    pub fn file(&self, id: FileId) -> &File {
        &self.files[id.index()]
    }

    pub fn file_mut(&mut self, id: FileId) -> &mut File {
        &mut self.files[id.index()]
    }

    pub fn target_ids(&self) -> impl Iterator<Item = TargetId> + '_ {
        (0..self.targets.len()).map(TargetId::new)
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Returns the target for a definition object, creating it if needed.
    /// Targets are deduplicated by definition identity.
    pub fn get_target(&mut self, definition: ObjectId, loc: Location) -> TargetId {
        if let Some(&id) = self.by_definition.get(&definition) {
            return id;
        }
        let id = TargetId::new(self.targets.len());
        self.targets.push(Target::new(definition, loc));
        self.by_definition.insert(definition, id);
        id
    }

    /// Returns the file for an absolute path, creating it if needed. Files
    /// are deduplicated by path.
    pub fn get_file(&mut self, path: &str) -> FileId {
        if let Some(&id) = self.by_path.get(path) {
            return id;
        }
        let id = FileId::new(self.files.len());
        self.files.push(File::new(path.to_owned()));
        self.by_path.insert(path.to_owned(), id);
        id
    }

    /// Adds a dependency edge, updating both endpoints.
    pub fn add_dependency(&mut self, target: TargetId, dep: TargetId) {
        self.targets[target.index()].depends.push(dep);
        self.targets[dep.index()].dependents.push(target);
    }

    pub fn add_source(&mut self, target: TargetId, file: FileId) {
        self.targets[target.index()].sources.push(file);
        self.files[file.index()].source_for.push(target);
    }

    pub fn add_output(&mut self, target: TargetId, file: FileId) {
        self.targets[target.index()].outputs.push(file);
        self.files[file.index()].output_of.push(target);
    }

    /// The printable name of a target: its path, or its first source.
    pub fn target_display(&self, id: TargetId) -> String {
        let target = &self.targets[id.index()];
        if let Some(path) = &target.path {
            return path.clone();
        }
        target
            .sources
            .first()
            .map(|&f| self.files[f.index()].name.clone())
            .unwrap_or_else(|| "<anonymous>".to_owned())
    }

    /// Fetches the filesystem status of a file once per invocation.
    pub fn update_file_status(&mut self, id: FileId) {
        let file = &mut self.files[id.index()];
        if file.status_checked {
            return;
        }
        file.status_checked = true;
        match std::fs::metadata(&file.name) {
            Ok(meta) => {
                file.status = Some(FileStatus {
                    exists: true,
                    size: meta.len(),
                    last_modified: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
                });
                file.status_valid = true;
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                file.status = Some(FileStatus {
                    exists: false,
                    size: 0,
                    last_modified: std::time::SystemTime::UNIX_EPOCH,
                });
                file.status_valid = true;
            }
            Err(_) => {
                file.status = None;
                file.status_valid = false;
            }
        }
    }

    /// The up-to-date check. On an `Initialized` target, compares output
    /// and source timestamps, recursing into producing targets and explicit
    /// dependencies, and settles the target into `Finished`, `Ready`, or
    /// `Waiting`. Revisiting a target already in `CheckingState` is a
    /// dependency cycle and reports an error at both locations.
    pub fn check_state(&mut self, id: TargetId, diags: &mut Diagnostics, sources: &SourceMap) {
        if self.targets[id.index()].state != TargetState::Initialized {
            return;
        }
        self.targets[id.index()].state = TargetState::CheckingState;

        let mut needs_rebuild = false;
        let mut needs_rebuild_deps = false;

        // Check output files.
        let outputs = self.targets[id.index()].outputs.clone();
        let mut oldest_output: Option<FileId> = None;
        for f in outputs {
            self.update_file_status(f);
            if !self.files[f.index()].status_valid {
                continue;
            }
            if !self.files[f.index()].exists() {
                if !needs_rebuild {
                    let name = self.files[f.index()].name.clone();
                    diags.debug(
                        Location::NONE,
                        sources,
                        &format!("Output {name} is missing"),
                    );
                }
                needs_rebuild = true;
                break;
            }
            let newer = match oldest_output {
                None => true,
                Some(prev) => {
                    self.files[f.index()].last_modified() < self.files[prev.index()].last_modified()
                }
            };
            if newer {
                oldest_output = Some(f);
            }
        }

        // Check source files.
        let source_files = self.targets[id.index()].sources.clone();
        for f in source_files {
            self.update_file_status(f);
            if !self.files[f.index()].status_valid {
                continue;
            }
            if !self.files[f.index()].exists() {
                needs_rebuild = true;
            }
            let producers = self.files[f.index()].output_of.clone();
            if !producers.is_empty() {
                for dep in producers {
                    if self.targets[dep.index()].state == TargetState::CheckingState {
                        self.report_cycle(id, dep, diags, sources);
                        continue;
                    }
                    self.check_state(dep, diags, sources);
                    if matches!(
                        self.targets[dep.index()].state,
                        TargetState::Ready | TargetState::Waiting | TargetState::Building
                    ) {
                        needs_rebuild = true;
                        needs_rebuild_deps = true;
                    }
                }
            } else if !self.files[f.index()].exists() {
                let target_name = self.target_display(id);
                let file_name = self.files[f.index()].name.clone();
                let loc = self.targets[id.index()].loc;
                diags.error(
                    loc,
                    sources,
                    &format!("Target {target_name} depends on non-existent file {file_name}"),
                );
                break;
            }
        }

        // Timestamp comparison for sources that are plain files.
        if !needs_rebuild {
            if let Some(oldest) = oldest_output {
                let oldest_time = self.files[oldest.index()].last_modified();
                let source_files = self.targets[id.index()].sources.clone();
                for f in source_files {
                    if !self.files[f.index()].status_valid || !self.files[f.index()].exists() {
                        continue;
                    }
                    if oldest_time < self.files[f.index()].last_modified() {
                        let out_name = self.files[oldest.index()].name.clone();
                        let src_name = self.files[f.index()].name.clone();
                        diags.debug(
                            Location::NONE,
                            sources,
                            &format!("Output {out_name} is older than source {src_name}"),
                        );
                        needs_rebuild = true;
                        break;
                    }
                }
            }
        }

        // Check explicit dependencies.
        let depends = self.targets[id.index()].depends.clone();
        for dep in depends {
            if self.targets[dep.index()].state == TargetState::CheckingState {
                self.report_cycle(id, dep, diags, sources);
                continue;
            }
            self.check_state(dep, diags, sources);
            if matches!(
                self.targets[dep.index()].state,
                TargetState::Ready | TargetState::Waiting | TargetState::Building
            ) {
                needs_rebuild = true;
                needs_rebuild_deps = true;
            }
        }

        let target = &mut self.targets[id.index()];
        target.state = if needs_rebuild {
            if needs_rebuild_deps {
                TargetState::Waiting
            } else {
                TargetState::Ready
            }
        } else {
            TargetState::Finished
        };
    }

    /// Reports a dependency cycle with one error at each endpoint. The gate
    /// is reopened between the two so both locations print.
    fn report_cycle(
        &self,
        target: TargetId,
        dep: TargetId,
        diags: &mut Diagnostics,
        sources: &SourceMap,
    ) {
        let target_name = self.target_display(target);
        let dep_name = self.target_display(dep);
        diags.error(
            self.targets[target.index()].loc,
            sources,
            &format!("Circular dependency between target: {target_name}"),
        );
        diags.recovered();
        diags.error(
            self.targets[dep.index()].loc,
            sources,
            &format!("and target: {dep_name}"),
        );
        diags.recovered();
    }
}
