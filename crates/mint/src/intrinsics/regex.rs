//! `re.compile` and `regex.*`: regular expression intrinsics backed by the
//! `regex` crate.
//!
//! A compiled pattern is represented as a dictionary carrying the pattern
//! source; `regex.*` functions accept either that dictionary or a plain
//! pattern string.

use regex::Regex;

use crate::{
    evaluator::Evaluator,
    graph::{NodeId, NodeKind},
    intrinsics::string_arg,
    object::{Attr, Object},
    source::Location,
    types::TYPE_GENERIC_DICT,
};

/// Extracts a pattern from a string argument or a compiled-pattern dict.
fn pattern_arg(ev: &mut Evaluator<'_>, loc: Location, args: &[NodeId], index: usize) -> Option<String> {
    let node = args.get(index).copied()?;
    match ev.graph.kind(node).clone() {
        NodeKind::Str(s) => Some(ev.interns.get(s).to_owned()),
        NodeKind::Dict(obj) => {
            let key = ev.interns.names().pattern;
            match ev.graph.object(obj).own_attr(key).map(Attr::node) {
                Some(p) => ev.graph.as_str(p).map(|s| ev.interns.get(s).to_owned()),
                None => None,
            }
        }
        _ => {
            let shown = ev.display(node);
            ev.diags.error(
                loc,
                ev.sources,
                &format!("Expected pattern argument, not '{shown}'"),
            );
            None
        }
    }
}

fn compile_pattern(ev: &mut Evaluator<'_>, loc: Location, pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(err) => {
            ev.diags.error(
                loc,
                ev.sources,
                &format!("Invalid regular expression: {err}"),
            );
            None
        }
    }
}

/// `re.compile(pattern)` validates the pattern and returns a dictionary
/// `{ pattern = '...' }` usable with the `regex` namespace.
pub fn compile(ev: &mut Evaluator<'_>, loc: Location, _self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    let Some(pattern) = string_arg(ev, loc, args, 0) else {
        return NodeId::UNDEFINED;
    };
    if compile_pattern(ev, loc, &pattern).is_none() {
        return NodeId::UNDEFINED;
    }
    let dict = Object::new(loc, None);
    let dict_id = ev.graph.new_dict(loc, dict, TYPE_GENERIC_DICT);
    let key = ev.interns.names().pattern;
    let pattern_id = ev.interns.intern(&pattern);
    let pattern_node = ev.graph.string(loc, pattern_id);
    ev.graph.object_mut(dict_id).set_attr(key, pattern_node);
    ev.graph.object(dict_id).node()
}

/// `regex.find(pattern, text)`: the first match, or undefined.
pub fn find(ev: &mut Evaluator<'_>, loc: Location, _self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    let (Some(pattern), Some(text)) = (pattern_arg(ev, loc, args, 0), string_arg(ev, loc, args, 1))
    else {
        return NodeId::UNDEFINED;
    };
    let Some(re) = compile_pattern(ev, loc, &pattern) else {
        return NodeId::UNDEFINED;
    };
    match re.find(&text) {
        Some(m) => {
            let id = ev.interns.intern(m.as_str());
            ev.graph.string(loc, id)
        }
        None => NodeId::UNDEFINED,
    }
}

fn subst_impl(ev: &mut Evaluator<'_>, loc: Location, args: &[NodeId], all: bool) -> NodeId {
    let (Some(pattern), Some(replacement), Some(text)) = (
        pattern_arg(ev, loc, args, 0),
        string_arg(ev, loc, args, 1),
        string_arg(ev, loc, args, 2),
    ) else {
        return NodeId::UNDEFINED;
    };
    let Some(re) = compile_pattern(ev, loc, &pattern) else {
        return NodeId::UNDEFINED;
    };
    let out = if all {
        re.replace_all(&text, replacement.as_str()).into_owned()
    } else {
        re.replace(&text, replacement.as_str()).into_owned()
    };
    let id = ev.interns.intern(&out);
    ev.graph.string(loc, id)
}

/// `regex.subst(pattern, replacement, text)`: replace the first match.
pub fn subst(ev: &mut Evaluator<'_>, loc: Location, _self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    subst_impl(ev, loc, args, false)
}

/// `regex.subst_all(pattern, replacement, text)`: replace every match.
pub fn subst_all(ev: &mut Evaluator<'_>, loc: Location, _self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    subst_impl(ev, loc, args, true)
}
