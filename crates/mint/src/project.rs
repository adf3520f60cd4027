//! A project: one source tree with its loaded modules, options, and cached
//! configuration.

use crate::{
    diagnostics::Diagnostics,
    evaluator::{Evaluator, Fundamentals},
    graph::{Graph, NodeId},
    graph_writer,
    intern::{Interns, StringId},
    module::{ModuleId, ProjectId},
    module_loader::ModuleLoader,
    object::{Attr, ObjectId},
    source::{Location, SourceMap},
    target_finder::TargetFinder,
    target_mgr::TargetMgr,
    types::TypeRegistry,
};

pub struct Project {
    pub id: ProjectId,
    pub loader: ModuleLoader,
    pub main_module: Option<ModuleId>,
    /// Cached attribute values restored from `build.mint`, applied after
    /// module load: `(object name, attribute name, value node)`.
    pending_cached: Vec<(StringId, StringId, NodeId)>,
}

impl Project {
    #[must_use]
    pub fn new(
        id: ProjectId,
        source_root: impl Into<String>,
        build_root: impl Into<String>,
    ) -> Self {
        Self {
            id,
            loader: ModuleLoader::new(source_root, build_root, Some(id)),
            main_module: None,
            pending_cached: Vec::new(),
        }
    }

    pub fn source_root(&self) -> &str {
        self.loader.source_root()
    }

    pub fn add_pending_cached(&mut self, object: StringId, attr: StringId, value: NodeId) {
        self.pending_cached.push((object, attr, value));
    }

    pub fn load_main_module(
        &mut self,
        graph: &mut Graph,
        interns: &mut Interns,
        types: &mut TypeRegistry,
        sources: &mut SourceMap,
        diags: &mut Diagnostics,
        fundamentals: Fundamentals,
    ) -> bool {
        let loaded = self
            .loader
            .load(graph, interns, types, sources, diags, fundamentals, "");
        self.main_module = loaded;
        loaded.is_some()
    }

    /// All option objects defined by this project's modules, in definition
    /// order.
    pub fn find_options(&self, graph: &Graph, fundamentals: Fundamentals) -> Vec<ObjectId> {
        let mut options = Vec::new();
        for &module in &self.loader.load_order {
            for value in graph.module(module).attrs.values() {
                if let Some(obj) = graph.as_object(*value) {
                    if obj != fundamentals.option_proto
                        && graph.inherits_from(obj, fundamentals.option_proto)
                    {
                        options.push(obj);
                    }
                }
            }
        }
        options
    }

    /// Applies a `--name=value` assignment to the matching option.
    /// Underscores and dashes are interchangeable in the name.
    pub fn set_config_option(
        &mut self,
        graph: &mut Graph,
        interns: &mut Interns,
        types: &mut TypeRegistry,
        sources: &SourceMap,
        diags: &mut Diagnostics,
        fundamentals: Fundamentals,
        name: &str,
        value: &str,
    ) -> bool {
        let normalized = name.replace('-', "_");
        let option = self.find_options(graph, fundamentals).into_iter().find(|&obj| {
            graph
                .object(obj)
                .name
                .is_some_and(|n| interns.get(n) == normalized)
        });
        let Some(option) = option else {
            diags.error(
                Location::NONE,
                sources,
                &format!("Unknown option: '{name}'"),
            );
            return false;
        };
        let module = graph
            .object(option)
            .module
            .or(self.main_module)
            .unwrap_or(fundamentals.module);
        let literal = parse_option_literal(graph, interns, value);
        let mut ev = Evaluator::new(graph, interns, types, sources, diags, fundamentals, module);
        set_option_value(&mut ev, option, literal);
        true
    }

    /// Restores cached attribute values recorded in the build configuration.
    pub fn apply_cached(
        &mut self,
        graph: &mut Graph,
        interns: &mut Interns,
        types: &mut TypeRegistry,
        sources: &SourceMap,
        diags: &mut Diagnostics,
        fundamentals: Fundamentals,
    ) {
        let pending = std::mem::take(&mut self.pending_cached);
        for (object_name, attr_name, value) in pending {
            let mut found = None;
            for &module in &self.loader.load_order {
                if let Some(node) = graph.module(module).own_attr(object_name) {
                    if let Some(obj) = graph.as_object(node) {
                        found = Some((module, obj));
                        break;
                    }
                }
            }
            let Some((module, obj)) = found else {
                continue;
            };
            let mut ev =
                Evaluator::new(graph, interns, types, sources, diags, fundamentals, module);
            ev.eval_object_contents(obj);
            if let Some(Attr::Def(def)) = ev.graph.object_mut(obj).attrs.get_mut(&attr_name) {
                if def.cached() {
                    def.value = value;
                }
            }
        }
    }

    /// Realizes every module-level object and runs deferred `do` actions,
    /// in module load order.
    pub fn configure(
        &mut self,
        graph: &mut Graph,
        interns: &mut Interns,
        types: &mut TypeRegistry,
        sources: &SourceMap,
        diags: &mut Diagnostics,
        fundamentals: Fundamentals,
        trace_commands: bool,
    ) {
        for &module in &self.loader.load_order.clone() {
            let mut ev =
                Evaluator::new(graph, interns, types, sources, diags, fundamentals, module);
            ev.trace_commands = trace_commands;
            let objects: Vec<ObjectId> = ev
                .graph
                .module(module)
                .attrs
                .values()
                .filter_map(|&v| ev.graph.as_object(v))
                .collect();
            for obj in objects {
                ev.eval_object_contents(obj);
                ev.diags.recovered();
            }
            let actions: Vec<NodeId> = ev.graph.module(module).actions.clone();
            for action in actions {
                ev.eval(action);
                ev.diags.recovered();
            }
        }
    }

    /// Registers every target defined by this project's modules.
    pub fn gather_targets(
        &self,
        graph: &mut Graph,
        interns: &mut Interns,
        types: &mut TypeRegistry,
        sources: &SourceMap,
        diags: &mut Diagnostics,
        fundamentals: Fundamentals,
        mgr: &mut TargetMgr,
    ) {
        for &module in &self.loader.load_order {
            let mut ev =
                Evaluator::new(graph, interns, types, sources, diags, fundamentals, module);
            let mut finder = TargetFinder::new(mgr);
            finder.visit_module(&mut ev, module);
        }
    }

    /// Renders option help, one entry per option.
    pub fn show_options(
        &self,
        graph: &mut Graph,
        interns: &mut Interns,
        types: &mut TypeRegistry,
        sources: &SourceMap,
        diags: &mut Diagnostics,
        fundamentals: Fundamentals,
    ) -> String {
        let names = *interns.names();
        let mut out = String::new();
        for option in self.find_options(graph, fundamentals) {
            let module = graph
                .object(option)
                .module
                .unwrap_or(fundamentals.module);
            let mut ev =
                Evaluator::new(graph, interns, types, sources, diags, fundamentals, module);
            let flag = ev
                .graph
                .object(option)
                .name
                .map(|n| ev.interns.get(n).replace('_', "-"))
                .unwrap_or_else(|| "<option>".to_owned());
            let declared_ty = match ev.graph.object(option).own_attr(names.value) {
                Some(Attr::Def(def)) => Some(def.ty),
                _ => None,
            };
            let help = ev.attribute_value_as_string(option, names.help);
            let default = ev
                .graph
                .object(option)
                .own_attr(names.default)
                .map(Attr::node);

            out.push_str("  --");
            out.push_str(&flag);
            if let Some(ty) = declared_ty {
                out.push_str(" : ");
                out.push_str(&ev.types.display(ty));
            }
            out.push('\n');
            if let Some(help) = help {
                out.push_str("      ");
                out.push_str(&help);
                out.push('\n');
            }
            if let Some(default) = default {
                let mut rendered = String::new();
                graph_writer::write_value(ev.graph, ev.interns, default, &mut rendered);
                out.push_str("      [default = ");
                out.push_str(&rendered);
                out.push_str("]\n");
            }
        }
        out
    }

    /// Writes this project's block of the build configuration file.
    pub fn write_config_block(
        &self,
        graph: &Graph,
        interns: &Interns,
        fundamentals: Fundamentals,
        out: &mut String,
    ) {
        let names = *interns.names();
        out.push_str("project ");
        graph_writer::write_quoted(self.source_root(), out);
        out.push_str(" {\n");
        for option in self.find_options(graph, fundamentals) {
            let Some(name) = graph.object(option).name else {
                continue;
            };
            let value = match graph.object(option).own_attr(names.value) {
                Some(attr) => attr.node(),
                None => continue,
            };
            if graph.is_undefined(value) {
                continue;
            }
            out.push_str("  option ");
            out.push_str(interns.get(name));
            out.push_str(" { value = ");
            graph_writer::write_value(graph, interns, value, out);
            out.push_str(" }\n");
        }
        // Cached parameters of realized named objects.
        for &module in &self.loader.load_order {
            for (attr_name, value) in graph.module(module).attrs.iter() {
                let Some(obj) = graph.as_object(*value) else {
                    continue;
                };
                if graph.inherits_from(obj, fundamentals.option_proto) {
                    continue;
                }
                let mut entries = Vec::new();
                for (key, attr) in &graph.object(obj).attrs {
                    if let Attr::Def(def) = attr {
                        if def.cached() && !graph.is_undefined(def.value) {
                            entries.push((*key, def.value));
                        }
                    }
                }
                if entries.is_empty() {
                    continue;
                }
                out.push_str("  cached ");
                out.push_str(interns.get(*attr_name));
                out.push_str(" {\n");
                for (key, value) in entries {
                    out.push_str("    ");
                    out.push_str(interns.get(key));
                    out.push_str(" = ");
                    graph_writer::write_value(graph, interns, value, out);
                    out.push('\n');
                }
                out.push_str("  }\n");
            }
        }
        out.push_str("}\n");
    }
}

/// Parses a command-line option value: bools and numbers by shape,
/// everything else as a string.
pub fn parse_option_literal(graph: &mut Graph, interns: &mut Interns, value: &str) -> NodeId {
    match value {
        "true" => return graph.bool_node(Location::NONE, true),
        "false" => return graph.bool_node(Location::NONE, false),
        "undefined" => return NodeId::UNDEFINED,
        _ => {}
    }
    if let Ok(i) = value.parse::<i64>() {
        return graph.integer(Location::NONE, i);
    }
    if let Ok(f) = value.parse::<f64>() {
        return graph.float(Location::NONE, f);
    }
    let id = interns.intern(value);
    graph.string(Location::NONE, id)
}

/// Coerces and stores a value on an option object.
pub fn set_option_value(ev: &mut Evaluator<'_>, option: ObjectId, value: NodeId) {
    let names = *ev.interns.names();
    let declared_ty = match ev.graph.object(option).own_attr(names.value) {
        Some(Attr::Def(def)) => Some(def.ty),
        _ => None,
    };
    let coerced = match declared_ty {
        Some(ty) => ev.coerce(value, ty),
        None => value,
    };
    if let Some(Attr::Def(def)) = ev.graph.object_mut(option).attrs.get_mut(&names.value) {
        def.value = coerced;
    } else {
        ev.graph.object_mut(option).set_attr(names.value, coerced);
    }
}
