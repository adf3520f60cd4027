//! List methods: `map(fn)` and `filter(fn)`.

use crate::{
    evaluator::Evaluator,
    graph::{NodeId, NodeKind},
    source::Location,
    types::TYPE_GENERIC_LIST,
};

fn list_elements(ev: &mut Evaluator<'_>, loc: Location, self_arg: Option<NodeId>) -> Option<Vec<NodeId>> {
    let list = self_arg?;
    match ev.graph.kind(list) {
        NodeKind::List(elements) => Some(elements.clone()),
        _ => {
            ev.diags
                .error(loc, ev.sources, "Method receiver is not a list");
            None
        }
    }
}

pub fn map(ev: &mut Evaluator<'_>, loc: Location, self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    let Some(elements) = list_elements(ev, loc, self_arg) else {
        return NodeId::UNDEFINED;
    };
    let Some(&func) = args.first() else {
        ev.diags.error(loc, ev.sources, "'map' takes a function argument");
        return NodeId::UNDEFINED;
    };
    let mut mapped = Vec::with_capacity(elements.len());
    for element in elements {
        mapped.push(ev.call_function(func, None, &[element], loc));
    }
    ev.graph.list(loc, TYPE_GENERIC_LIST, mapped)
}

pub fn filter(ev: &mut Evaluator<'_>, loc: Location, self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    let Some(elements) = list_elements(ev, loc, self_arg) else {
        return NodeId::UNDEFINED;
    };
    let Some(&func) = args.first() else {
        ev.diags
            .error(loc, ev.sources, "'filter' takes a function argument");
        return NodeId::UNDEFINED;
    };
    let mut kept = Vec::new();
    for element in elements {
        let verdict = ev.call_function(func, None, &[element], loc);
        if matches!(ev.graph.kind(verdict), NodeKind::Bool(true)) {
            kept.push(element);
        }
    }
    ev.graph.list(loc, TYPE_GENERIC_LIST, kept)
}
