//! Makefile emission: a `make`-compatible rendering of the target graph.
//!
//! Consumes initialized targets only; anonymous targets and targets without
//! outputs are folded into their dependents' prerequisite lists.

use crate::{
    build_config::BuildConfiguration,
    evaluator::Evaluator,
    graph::NodeKind,
    target_mgr::TargetMgr,
};

pub fn generate(config: &mut BuildConfiguration, mgr: &mut TargetMgr) -> String {
    let mut out = String::from("# Generated by mint; do not edit.\n\n");

    // Default goal: every named, non-excluded target's outputs.
    let mut all_outputs = Vec::new();
    for id in mgr.target_ids() {
        let target = mgr.target(id);
        if target.path.is_some() && !target.exclude_from_all && !target.source_only {
            for &f in &target.outputs {
                all_outputs.push(mgr.file(f).name.clone());
            }
        }
    }
    if !all_outputs.is_empty() {
        out.push_str("all: ");
        out.push_str(&all_outputs.join(" "));
        out.push_str("\n\n");
    }

    let module = config
        .projects
        .first()
        .and_then(|p| p.main_module)
        .unwrap_or(config.fundamentals.module);
    let mut ev = Evaluator::new(
        &mut config.graph,
        &mut config.interns,
        &mut config.types,
        &config.sources,
        &mut config.diags,
        config.fundamentals,
        module,
    );

    for id in mgr.target_ids() {
        let outputs: Vec<String> = mgr
            .target(id)
            .outputs
            .iter()
            .map(|&f| mgr.file(f).name.clone())
            .collect();
        if outputs.is_empty() {
            continue;
        }
        let mut prerequisites: Vec<String> = mgr
            .target(id)
            .sources
            .iter()
            .map(|&f| mgr.file(f).name.clone())
            .collect();
        for &dep in &mgr.target(id).depends {
            for &f in &mgr.target(dep).outputs {
                prerequisites.push(mgr.file(f).name.clone());
            }
        }

        out.push_str(&outputs.join(" "));
        out.push_str(": ");
        out.push_str(&prerequisites.join(" "));
        out.push('\n');

        let definition = mgr.target(id).definition;
        let names = *ev.interns.names();
        for action in ev.attribute_value_as_list(definition, names.actions) {
            match ev.graph.kind(action).clone() {
                NodeKind::Str(s) => {
                    out.push('\t');
                    out.push_str(ev.interns.get(s));
                    out.push('\n');
                }
                NodeKind::List(words) => {
                    let mut line = String::new();
                    for (i, w) in words.iter().enumerate() {
                        if i > 0 {
                            line.push(' ');
                        }
                        if let Some(s) = ev.graph.as_str(*w) {
                            line.push_str(ev.interns.get(s));
                        }
                    }
                    out.push('\t');
                    out.push_str(&line);
                    out.push('\n');
                }
                _ => {}
            }
        }
        out.push('\n');
    }
    out
}
