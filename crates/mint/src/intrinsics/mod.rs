//! Built-in functions, grouped by namespace.

pub mod console;
pub mod file;
pub mod glob;
pub mod list;
pub mod path;
pub mod regex;
pub mod shell;

use crate::{evaluator::Evaluator, graph::NodeId, source::Location};

/// Fetches a string argument, reporting a diagnostic when missing or of the
/// wrong type.
pub(crate) fn string_arg(
    ev: &mut Evaluator<'_>,
    loc: Location,
    args: &[NodeId],
    index: usize,
) -> Option<String> {
    let Some(node) = args.get(index).copied() else {
        ev.diags
            .error(loc, ev.sources, "Missing argument to builtin function");
        return None;
    };
    match ev.graph.as_str(node) {
        Some(s) => Some(ev.interns.get(s).to_owned()),
        None => {
            let shown = ev.display(node);
            ev.diags.error(
                loc,
                ev.sources,
                &format!("Expected string argument, not '{shown}'"),
            );
            None
        }
    }
}
