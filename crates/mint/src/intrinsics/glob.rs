//! `glob(pattern)`: wildcard file search relative to the module's source
//! directory.
//!
//! `*` and `?` match within a path segment, `**` matches across segments.
//! Absolute patterns and `..` segments are rejected; results are returned in
//! directory-iteration order.

use crate::{
    evaluator::Evaluator, graph::NodeId, intrinsics::string_arg, paths, source::Location,
    types::TYPE_GENERIC_LIST,
};

/// Segment matcher for `*` and `?`.
pub(crate) fn wildcard_match(pattern: &str, name: &str) -> bool {
    fn matches(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                // Zero-or-more characters.
                matches(&p[1..], n) || (!n.is_empty() && matches(p, &n[1..]))
            }
            (Some(b'?'), Some(_)) => matches(&p[1..], &n[1..]),
            (Some(a), Some(b)) if a == b => matches(&p[1..], &n[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), name.as_bytes())
}

pub(crate) fn has_wildcard(segment: &str) -> bool {
    segment.contains('*') || segment.contains('?')
}

fn dir_entries(base: &str) -> Vec<(String, bool)> {
    let mut entries = Vec::new();
    if let Ok(read) = std::fs::read_dir(base) {
        for entry in read.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            entries.push((name, is_dir));
        }
    }
    entries
}

/// Recursive matcher over pattern segments, accumulating absolute paths.
fn glob_into(
    ev: &mut Evaluator<'_>,
    loc: Location,
    out: &mut Vec<String>,
    base: &str,
    pattern: &str,
) {
    let (leading, trailing) = match pattern.find('/') {
        Some(i) => (&pattern[..i], &pattern[i + 1..]),
        None => (pattern, ""),
    };

    if leading == "." {
        glob_into(ev, loc, out, base, trailing);
    } else if leading == ".." {
        ev.diags.error(
            loc,
            ev.sources,
            "Parent directory '..' not allowed as argument to 'glob'",
        );
    } else if leading == "**" {
        if trailing.is_empty() {
            return;
        }
        if trailing.starts_with("**") {
            ev.diags.error(
                loc,
                ev.sources,
                "Multiple '**' wildcards are not allowed as argument to 'glob'",
            );
            return;
        }
        let more_separators = trailing.contains('/');
        for (name, is_dir) in dir_entries(base) {
            let child = paths::combine(base, &name);
            if is_dir {
                // Match the rest here, and keep `**` in play deeper down.
                glob_into(ev, loc, out, &child, trailing);
                glob_into(ev, loc, out, &child, pattern);
            } else if !more_separators && wildcard_match(trailing, &name) {
                out.push(child);
            }
        }
    } else if has_wildcard(leading) {
        for (name, is_dir) in dir_entries(base) {
            if !wildcard_match(leading, &name) {
                continue;
            }
            let child = paths::combine(base, &name);
            if is_dir {
                if !trailing.is_empty() {
                    glob_into(ev, loc, out, &child, trailing);
                }
            } else if trailing.is_empty() {
                out.push(child);
            }
        }
    } else {
        // A constant segment.
        let child = paths::combine(base, leading);
        if trailing.is_empty() {
            if std::fs::metadata(&child).map(|m| m.is_file()).unwrap_or(false) {
                out.push(child);
            }
        } else {
            glob_into(ev, loc, out, &child, trailing);
        }
    }
}

pub fn glob(ev: &mut Evaluator<'_>, loc: Location, _self_arg: Option<NodeId>, args: &[NodeId]) -> NodeId {
    let Some(pattern) = string_arg(ev, loc, args, 0) else {
        return NodeId::UNDEFINED;
    };
    let mut found = Vec::new();
    if paths::is_absolute(&pattern) {
        ev.diags.error(
            loc,
            ev.sources,
            "Absolute path not allowed as argument to 'glob'",
        );
    } else {
        let base = ev.source_dir();
        glob_into(ev, loc, &mut found, &base, &pattern);
        if found.is_empty() {
            ev.diags
                .warn(loc, ev.sources, "No files found matching pattern");
        }
    }
    let mut elements = Vec::with_capacity(found.len());
    for path in found {
        let id = ev.interns.intern(&path);
        elements.push(ev.graph.string(loc, id));
    }
    ev.graph.list(loc, TYPE_GENERIC_LIST, elements)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_segments_match() {
        assert!(wildcard_match("*.c", "a.c"));
        assert!(wildcard_match("a?.c", "ab.c"));
        assert!(!wildcard_match("*.c", "a.h"));
        assert!(wildcard_match("*", "anything"));
        assert!(!wildcard_match("a?.c", "a.c"));
    }
}
