//! `file.*`: small filesystem operations available at configure time.
//!
//! Relative paths resolve against the current module's source directory.

use crate::{evaluator::Evaluator, graph::NodeId, intrinsics::string_arg, paths, source::Location};

fn resolve(ev: &Evaluator<'_>, path: &str) -> String {
    if paths::is_absolute(path) {
        path.to_owned()
    } else {
        paths::combine(&ev.source_dir(), path)
    }
}

pub fn read(ev: &mut Evaluator<'_>, loc: Location, _self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    let Some(path) = string_arg(ev, loc, args, 0) else {
        return NodeId::UNDEFINED;
    };
    let abs = resolve(ev, &path);
    match std::fs::read_to_string(&abs) {
        Ok(contents) => {
            let id = ev.interns.intern(&contents);
            ev.graph.string(loc, id)
        }
        Err(err) => {
            ev.diags.error(
                loc,
                ev.sources,
                &format!("Cannot read file '{abs}': {err}"),
            );
            NodeId::UNDEFINED
        }
    }
}

pub fn write(ev: &mut Evaluator<'_>, loc: Location, _self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    let (Some(path), Some(contents)) = (string_arg(ev, loc, args, 0), string_arg(ev, loc, args, 1))
    else {
        return NodeId::UNDEFINED;
    };
    let abs = resolve(ev, &path);
    match std::fs::write(&abs, contents.as_bytes()) {
        Ok(()) => ev.graph.bool_node(loc, true),
        Err(err) => {
            ev.diags.error(
                loc,
                ev.sources,
                &format!("Cannot write file '{abs}': {err}"),
            );
            ev.graph.bool_node(loc, false)
        }
    }
}

pub fn remove(ev: &mut Evaluator<'_>, loc: Location, _self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    let Some(path) = string_arg(ev, loc, args, 0) else {
        return NodeId::UNDEFINED;
    };
    let abs = resolve(ev, &path);
    match std::fs::remove_file(&abs) {
        Ok(()) => ev.graph.bool_node(loc, true),
        Err(_) => ev.graph.bool_node(loc, false),
    }
}
