//! The module loader: resolves module paths to parsed and realized modules,
//! memoized per path.
//!
//! A module reference `foo.bar` maps to `<source-root>/foo/bar.mint`, or to
//! `<source-root>/foo/bar/module.mint` when the path names a directory. The
//! empty path loads the project's root `module.mint`. Imports are resolved
//! before the module body is evaluated, so import cycles are detected here.

use ahash::{AHashMap, AHashSet};

use crate::{
    diagnostics::Diagnostics,
    evaluator::{Evaluator, Fundamentals},
    graph::{Graph, NodeId, OpKind},
    intern::Interns,
    module::{Module, ModuleId},
    parser::Parser,
    paths,
    source::{Location, SourceMap, TextBuffer},
    types::{TYPE_MODULE, TypeRegistry},
};

pub struct ModuleLoader {
    source_root: String,
    build_root: String,
    /// Owning project, recorded on every loaded module.
    project: Option<crate::module::ProjectId>,
    modules: AHashMap<String, ModuleId>,
    loading: AHashSet<String>,
    /// Modules in load order; imports precede importers.
    pub load_order: Vec<ModuleId>,
}

impl ModuleLoader {
    #[must_use]
    pub fn new(
        source_root: impl Into<String>,
        build_root: impl Into<String>,
        project: Option<crate::module::ProjectId>,
    ) -> Self {
        Self {
            source_root: source_root.into(),
            build_root: build_root.into(),
            project,
            modules: AHashMap::new(),
            loading: AHashSet::new(),
            load_order: Vec::new(),
        }
    }

    pub fn source_root(&self) -> &str {
        &self.source_root
    }

    /// Loads, parses, and realizes the module at `path` (slash-separated,
    /// relative to the source root; empty means the root module).
    pub fn load(
        &mut self,
        graph: &mut Graph,
        interns: &mut Interns,
        types: &mut TypeRegistry,
        sources: &mut SourceMap,
        diags: &mut Diagnostics,
        fundamentals: Fundamentals,
        path: &str,
    ) -> Option<ModuleId> {
        if let Some(&id) = self.modules.get(path) {
            return Some(id);
        }
        if !self.loading.insert(path.to_owned()) {
            diags.error(
                Location::NONE,
                sources,
                &format!("Circular import of module '{path}'"),
            );
            return None;
        }
        let result = self.load_uncached(graph, interns, types, sources, diags, fundamentals, path);
        self.loading.remove(path);
        if let Some(id) = result {
            self.modules.insert(path.to_owned(), id);
            self.load_order.push(id);
        }
        result
    }

    fn load_uncached(
        &mut self,
        graph: &mut Graph,
        interns: &mut Interns,
        types: &mut TypeRegistry,
        sources: &mut SourceMap,
        diags: &mut Diagnostics,
        fundamentals: Fundamentals,
        path: &str,
    ) -> Option<ModuleId> {
        let base = if path.is_empty() {
            self.source_root.clone()
        } else {
            paths::combine(&self.source_root, path)
        };
        let is_dir = std::fs::metadata(&base).map(|m| m.is_dir()).unwrap_or(false);
        let (file_path, rel_dir) = if is_dir {
            (paths::combine(&base, "module.mint"), path.to_owned())
        } else {
            (
                paths::change_extension(&base, "mint"),
                paths::parent(path).to_owned(),
            )
        };

        let bytes = match std::fs::read(&file_path) {
            Ok(bytes) => bytes,
            Err(_) => {
                diags.error(
                    Location::NONE,
                    sources,
                    &format!("Module '{file_path}' not found"),
                );
                return None;
            }
        };

        let source_dir = paths::combine(&self.source_root, &rel_dir);
        let build_dir = paths::combine(&self.build_root, &rel_dir);
        let module_name = if path.is_empty() { "module" } else { path };
        let name_id = interns.intern(module_name);
        let module = graph.new_module(Module::new(name_id, source_dir, build_dir), TYPE_MODULE);
        graph.module_mut(module).project = self.project;

        let buffer = sources.add(TextBuffer::new(file_path, bytes));
        graph.module_mut(module).buffer = Some(buffer);

        let errors_before = diags.error_count();
        let defs: Vec<NodeId> = {
            let buf = sources.get(buffer);
            let mut parser = Parser::new(buffer, buf, graph, interns, types, diags, sources);
            let root = parser.parse_module();
            match graph.as_oper(root) {
                Some((OpKind::MakeModule, args)) => args.to_vec(),
                _ => Vec::new(),
            }
        };
        if diags.error_count() > errors_before {
            return None;
        }
        diags.recovered();

        self.resolve_imports(graph, interns, types, sources, diags, fundamentals, module, &defs);

        let mut ev = Evaluator::new(graph, interns, types, sources, diags, fundamentals, module);
        ev.eval_module_contents(&defs);
        Some(module)
    }

    /// Loads the targets of import statements and binds them into the
    /// module before its body is evaluated.
    fn resolve_imports(
        &mut self,
        graph: &mut Graph,
        interns: &mut Interns,
        types: &mut TypeRegistry,
        sources: &mut SourceMap,
        diags: &mut Diagnostics,
        fundamentals: Fundamentals,
        module: ModuleId,
        defs: &[NodeId],
    ) {
        for &def in defs {
            let Some((op, args)) = graph.as_oper(def) else {
                continue;
            };
            if !matches!(
                op,
                OpKind::Import | OpKind::ImportAs | OpKind::ImportFrom | OpKind::ImportAll
            ) {
                continue;
            }
            let args: Vec<NodeId> = args.to_vec();
            let loc = graph.loc(def);
            let Some(name_id) = graph.as_str(args[0]) else {
                continue;
            };
            let name = interns.get(name_id).to_owned();
            if name.contains(':') {
                diags.error(
                    loc,
                    sources,
                    &format!("Cross-project import '{name}' is not supported"),
                );
                continue;
            }
            let import_path = name.replace('.', "/");
            let Some(imported) =
                self.load(graph, interns, types, sources, diags, fundamentals, &import_path)
            else {
                continue;
            };
            let imported_node = graph.module(imported).node();
            match op {
                OpKind::Import => {
                    let last = name.rsplit('.').next().unwrap_or(&name);
                    let bind = interns.intern(last);
                    graph.module_mut(module).set_attr(bind, imported_node);
                }
                OpKind::ImportAs => {
                    if let Some(alias) = graph.as_ident(args[1]) {
                        graph.module_mut(module).set_attr(alias, imported_node);
                    }
                }
                OpKind::ImportFrom => {
                    for &sym_node in &args[1..] {
                        let Some(sym) = graph.as_ident(sym_node) else {
                            continue;
                        };
                        match graph.module(imported).own_attr(sym) {
                            Some(value) => graph.module_mut(module).set_attr(sym, value),
                            None => {
                                let sym_text = interns.get(sym).to_owned();
                                diags.error(
                                    graph.loc(sym_node),
                                    sources,
                                    &format!("Module '{name}' has no member '{sym_text}'"),
                                );
                            }
                        }
                    }
                }
                OpKind::ImportAll => {
                    graph.module_mut(module).imports.push(imported);
                }
                _ => {}
            }
        }
    }
}
