//! `console.*`: message output through the diagnostics severity ladder.

use crate::{
    diagnostics::Severity, evaluator::Evaluator, function::NativeFn, graph::NodeId,
    source::Location,
};

/// Name/handler pairs registered on the `console` namespace.
pub const METHODS: &[(&str, NativeFn)] = &[
    ("debug", debug),
    ("status", status),
    ("info", info),
    ("warn", warn),
    ("error", error),
    ("fatal", fatal),
];

fn emit(ev: &mut Evaluator<'_>, severity: Severity, loc: Location, args: &[NodeId]) -> NodeId {
    let message = args
        .first()
        .map(|&a| ev.display(a))
        .unwrap_or_default();
    // Messages below warning severity carry no source position.
    let loc = if severity >= Severity::Warning {
        loc
    } else {
        Location::NONE
    };
    ev.diags.report(severity, loc, ev.sources, &message);
    NodeId::UNDEFINED
}

fn debug(ev: &mut Evaluator<'_>, loc: Location, _self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    emit(ev, Severity::Debug, loc, args)
}

fn status(ev: &mut Evaluator<'_>, loc: Location, _self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    emit(ev, Severity::Status, loc, args)
}

fn info(ev: &mut Evaluator<'_>, loc: Location, _self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    emit(ev, Severity::Info, loc, args)
}

fn warn(ev: &mut Evaluator<'_>, loc: Location, _self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    emit(ev, Severity::Warning, loc, args)
}

fn error(ev: &mut Evaluator<'_>, loc: Location, _self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    emit(ev, Severity::Error, loc, args)
}

fn fatal(ev: &mut Evaluator<'_>, loc: Location, _self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    emit(ev, Severity::Fatal, loc, args)
}
