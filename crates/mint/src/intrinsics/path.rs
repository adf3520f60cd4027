//! `path.*`: string path manipulation.

use crate::{evaluator::Evaluator, graph::NodeId, intrinsics::string_arg, paths, source::Location};

fn string_result(ev: &mut Evaluator<'_>, loc: Location, value: &str) -> NodeId {
    let id = ev.interns.intern(value);
    ev.graph.string(loc, id)
}

pub fn add_ext(ev: &mut Evaluator<'_>, loc: Location, _self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    let (Some(p), Some(ext)) = (string_arg(ev, loc, args, 0), string_arg(ev, loc, args, 1)) else {
        return NodeId::UNDEFINED;
    };
    let out = paths::add_extension(&p, &ext);
    string_result(ev, loc, &out)
}

pub fn change_ext(ev: &mut Evaluator<'_>, loc: Location, _self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    let (Some(p), Some(ext)) = (string_arg(ev, loc, args, 0), string_arg(ev, loc, args, 1)) else {
        return NodeId::UNDEFINED;
    };
    let out = paths::change_extension(&p, &ext);
    string_result(ev, loc, &out)
}

pub fn ext(ev: &mut Evaluator<'_>, loc: Location, _self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    let Some(p) = string_arg(ev, loc, args, 0) else {
        return NodeId::UNDEFINED;
    };
    let out = paths::extension(&p).to_owned();
    string_result(ev, loc, &out)
}

pub fn basename(ev: &mut Evaluator<'_>, loc: Location, _self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    let Some(p) = string_arg(ev, loc, args, 0) else {
        return NodeId::UNDEFINED;
    };
    let out = paths::filename(&p).to_owned();
    string_result(ev, loc, &out)
}

pub fn dirname(ev: &mut Evaluator<'_>, loc: Location, _self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    let Some(p) = string_arg(ev, loc, args, 0) else {
        return NodeId::UNDEFINED;
    };
    let out = paths::parent(&p).to_owned();
    string_result(ev, loc, &out)
}

pub fn join(ev: &mut Evaluator<'_>, loc: Location, _self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    let (Some(base), Some(rel)) = (string_arg(ev, loc, args, 0), string_arg(ev, loc, args, 1)) else {
        return NodeId::UNDEFINED;
    };
    let out = paths::combine(&base, &rel);
    string_result(ev, loc, &out)
}
