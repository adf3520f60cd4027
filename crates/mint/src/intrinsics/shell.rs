//! `shell(program, argv, stdin)`: run a command at configure time.
//!
//! The program is spawned directly (no shell word-splitting); stdin is fed
//! from the third argument. The result is a dictionary with a `status`
//! entry carrying the exit code.

use std::io::Write as _;
use std::process::{Command, Stdio};

use crate::{
    evaluator::Evaluator,
    graph::{NodeId, NodeKind},
    intrinsics::string_arg,
    object::Object,
    source::Location,
    types::TYPE_GENERIC_DICT,
};

pub fn shell(ev: &mut Evaluator<'_>, loc: Location, _self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    let Some(program) = string_arg(ev, loc, args, 0) else {
        return NodeId::UNDEFINED;
    };
    let argv: Vec<String> = match args.get(1).map(|&a| ev.graph.kind(a).clone()) {
        Some(NodeKind::List(elements)) => {
            let mut argv = Vec::with_capacity(elements.len());
            for e in elements {
                match ev.graph.as_str(e) {
                    Some(s) => argv.push(ev.interns.get(s).to_owned()),
                    None => {
                        ev.diags.error(
                            ev.graph.loc(e),
                            ev.sources,
                            "Shell arguments must be strings",
                        );
                        return NodeId::UNDEFINED;
                    }
                }
            }
            argv
        }
        _ => {
            ev.diags
                .error(loc, ev.sources, "Expected argument list for 'shell'");
            return NodeId::UNDEFINED;
        }
    };
    let input = string_arg(ev, loc, args, 2).unwrap_or_default();

    if ev.trace_commands {
        let mut cmd = program.clone();
        for a in &argv {
            cmd.push(' ');
            cmd.push_str(a);
        }
        ev.diags.debug(Location::NONE, ev.sources, &cmd);
    }

    let spawned = Command::new(&program)
        .args(&argv)
        .current_dir(ev.source_dir())
        .stdin(Stdio::piped())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(err) => {
            ev.diags.error(
                loc,
                ev.sources,
                &format!("Command '{program}' failed to run: {err}"),
            );
            return NodeId::UNDEFINED;
        }
    };
    if !input.is_empty() {
        if let Some(stdin) = child.stdin.take() {
            let mut stdin = stdin;
            let _ = stdin.write_all(input.as_bytes());
        }
    } else {
        drop(child.stdin.take());
    }
    let status = match child.wait() {
        Ok(status) => status.code().unwrap_or(-1),
        Err(err) => {
            ev.diags.error(
                loc,
                ev.sources,
                &format!("Command '{program}' failed: {err}"),
            );
            return NodeId::UNDEFINED;
        }
    };

    let dict = Object::new(loc, None);
    let dict_id = ev.graph.new_dict(loc, dict, TYPE_GENERIC_DICT);
    let status_key = ev.interns.names().status;
    let status_node = ev.graph.integer(loc, i64::from(status));
    ev.graph.object_mut(dict_id).set_attr(status_key, status_node);
    ev.graph.object(dict_id).node()
}
