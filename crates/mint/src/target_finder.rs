//! The target finder: walks realized module objects and registers targets
//! and files with the target manager.

use crate::{
    evaluator::Evaluator,
    graph::{NodeId, NodeKind},
    module::ModuleId,
    object::ObjectId,
    paths,
    target::TargetState,
    target_mgr::TargetMgr,
};

pub struct TargetFinder<'m> {
    pub mgr: &'m mut TargetMgr,
}

impl<'m> TargetFinder<'m> {
    pub fn new(mgr: &'m mut TargetMgr) -> Self {
        Self { mgr }
    }

    /// Visits every object bound at the top level of a module.
    pub fn visit_module(&mut self, ev: &mut Evaluator<'_>, module: ModuleId) {
        let attrs: Vec<NodeId> = ev.graph.module(module).attrs.values().copied().collect();
        for value in attrs {
            if let Some(obj) = ev.graph.as_object(value) {
                self.visit_object(ev, obj);
            }
        }
    }

    /// Initializes a target for any object inheriting from the `target`
    /// prototype. Dependencies are visited recursively so targets referenced
    /// only through `depends` are found too.
    pub fn visit_object(&mut self, ev: &mut Evaluator<'_>, obj: ObjectId) {
        let target_proto = ev.fundamentals.target_proto;
        if obj == target_proto || !ev.graph.inherits_from(obj, target_proto) {
            return;
        }
        let loc = ev.graph.object(obj).loc;
        let id = self.mgr.get_target(obj, loc);
        if self.mgr.target(id).state != TargetState::Uninit {
            return;
        }
        self.mgr.target_mut(id).state = TargetState::Initializing;

        let names = *ev.interns.names();
        let module = ev.graph.object(obj).module.unwrap_or(ev.module());

        let depends = ev.attribute_value_as_list(obj, names.depends);
        let implicit_depends = ev.attribute_value_as_list(obj, names.implicit_depends);
        let sources = ev.attribute_value_as_list(obj, names.sources);
        let outputs = ev.attribute_value_as_list(obj, names.outputs);

        self.mgr.target_mut(id).exclude_from_all =
            ev.attribute_value_as_bool(obj, names.exclude_from_all);
        self.mgr.target_mut(id).source_only = ev.attribute_value_as_bool(obj, names.source_only);
        self.mgr.target_mut(id).internal = ev.attribute_value_as_bool(obj, names.internal);

        // Directories default to the module's own.
        let source_dir = ev
            .attribute_value_as_string(obj, names.source_dir)
            .unwrap_or_else(|| ev.graph.module(module).source_dir.clone());
        let output_dir = ev
            .attribute_value_as_string(obj, names.output_dir)
            .unwrap_or_else(|| ev.graph.module(module).build_dir.clone());

        // Target name, from the defining module's namespace.
        let path = ev
            .graph
            .object(obj)
            .name
            .map(|n| ev.interns.get(n).to_owned());
        self.mgr.target_mut(id).path = path;

        self.add_dependencies(ev, id, &depends);
        self.add_dependencies(ev, id, &implicit_depends);

        // Explicit sources apply only when this is not a delegating builder.
        if implicit_depends.is_empty() {
            self.add_sources(ev, id, &sources, &source_dir);
        }
        self.add_outputs(ev, id, &outputs, &output_dir);

        let sort_key = self
            .mgr
            .target(id)
            .path
            .clone()
            .unwrap_or_else(|| self.mgr.target_display(id));
        self.mgr.target_mut(id).sort_key = sort_key;
        self.mgr.target_mut(id).state = TargetState::Initialized;
    }

    fn add_dependencies(&mut self, ev: &mut Evaluator<'_>, target: crate::target::TargetId, list: &[NodeId]) {
        for &node in list {
            let dep_obj = match ev.graph.as_object(node) {
                Some(obj) if ev.graph.inherits_from(obj, ev.fundamentals.target_proto) => obj,
                _ => {
                    let loc = ev.graph.loc(node);
                    let target_name = self.mgr.target_display(target);
                    ev.diags.error(
                        loc,
                        ev.sources,
                        &format!("Invalid type for target dependency, for target: {target_name}"),
                    );
                    continue;
                }
            };
            let dep_loc = ev.graph.object(dep_obj).loc;
            let dep = self.mgr.get_target(dep_obj, dep_loc);
            if dep != target {
                self.mgr.add_dependency(target, dep);
                self.visit_object(ev, dep_obj);
            }
        }
    }

    fn add_sources(
        &mut self,
        ev: &mut Evaluator<'_>,
        target: crate::target::TargetId,
        list: &[NodeId],
        base_dir: &str,
    ) {
        for &node in list {
            match ev.graph.kind(node).clone() {
                NodeKind::Str(s) => {
                    let path = make_absolute(ev.interns.get(s), base_dir);
                    let file = self.mgr.get_file(&path);
                    self.mgr.add_source(target, file);
                }
                _ => {
                    let loc = ev.graph.loc(node);
                    let target_name = self.mgr.target_display(target);
                    ev.diags.error(
                        loc,
                        ev.sources,
                        &format!("Invalid type for source file, for target: {target_name}"),
                    );
                }
            }
        }
    }

    fn add_outputs(
        &mut self,
        ev: &mut Evaluator<'_>,
        target: crate::target::TargetId,
        list: &[NodeId],
        base_dir: &str,
    ) {
        for &node in list {
            match ev.graph.kind(node).clone() {
                NodeKind::Str(s) => {
                    let path = make_absolute(ev.interns.get(s), base_dir);
                    let file = self.mgr.get_file(&path);
                    self.mgr.add_output(target, file);
                }
                _ => {
                    let loc = ev.graph.loc(node);
                    let target_name = self.mgr.target_display(target);
                    ev.diags.error(
                        loc,
                        ev.sources,
                        &format!("Invalid type for output file, for target: {target_name}"),
                    );
                }
            }
        }
    }
}

fn make_absolute(path: &str, base_dir: &str) -> String {
    if paths::is_absolute(path) {
        path.to_owned()
    } else {
        paths::combine(base_dir, path)
    }
}
