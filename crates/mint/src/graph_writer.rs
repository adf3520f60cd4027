//! Value printing: human-readable display and re-parseable literal syntax.
//!
//! [`display_value`] renders values for messages and string interpolation
//! (strings unquoted); [`write_value`] renders the language's own literal
//! syntax, used by the configuration writer so `build.mint` can be read back
//! by the same parser.

use std::fmt::Write as _;

use crate::{
    graph::{Graph, NodeId, NodeKind},
    intern::Interns,
};

/// Renders a float with shortest-round-trip formatting, keeping a trailing
/// `.0` so the result re-parses as a float.
fn format_float(value: f64) -> String {
    if value.is_finite() {
        let mut buf = ryu::Buffer::new();
        buf.format(value).to_owned()
    } else {
        value.to_string()
    }
}

/// Human-readable rendering: strings appear without quotes.
pub fn display_value(graph: &Graph, interns: &Interns, node: NodeId) -> String {
    match graph.kind(node) {
        NodeKind::Str(s) => interns.get(*s).to_owned(),
        NodeKind::Ident(s) => interns.get(*s).to_owned(),
        _ => {
            let mut out = String::new();
            write_value(graph, interns, node, &mut out);
            out
        }
    }
}

/// Renders a value in literal syntax parseable by the parser.
pub fn write_value(graph: &Graph, interns: &Interns, node: NodeId, out: &mut String) {
    match graph.kind(node) {
        NodeKind::Undefined => out.push_str("undefined"),
        NodeKind::Bool(true) => out.push_str("true"),
        NodeKind::Bool(false) => out.push_str("false"),
        NodeKind::Integer(i) => {
            let _ = write!(out, "{i}");
        }
        NodeKind::Float(f) => out.push_str(&format_float(*f)),
        NodeKind::Str(s) => write_quoted(interns.get(*s), out),
        NodeKind::Ident(s) => out.push_str(interns.get(*s)),
        NodeKind::TypeName(_) => out.push_str("<type>"),
        NodeKind::List(elements) => {
            out.push('[');
            for (i, &e) in elements.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(graph, interns, e, out);
            }
            out.push(']');
        }
        NodeKind::Dict(obj) => {
            let object = graph.object(*obj);
            out.push('{');
            for (i, (key, attr)) in object.attrs.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(interns.get(*key));
                out.push_str(" = ");
                write_value(graph, interns, attr.node(), out);
            }
            out.push('}');
        }
        NodeKind::Object(obj) => {
            let object = graph.object(*obj);
            match object.name {
                Some(name) => out.push_str(interns.get(name)),
                None => match object.prototype.and_then(|p| graph.object(p).name) {
                    Some(name) => out.push_str(interns.get(name)),
                    None => out.push_str("<object>"),
                },
            }
        }
        NodeKind::Module(m) => {
            out.push_str(interns.get(graph.module(*m).name));
        }
        NodeKind::Function(_) => out.push_str("<function>"),
        NodeKind::Oper(op, _) => {
            let name: &'static str = (*op).into();
            let _ = write!(out, "<{name}>");
        }
    }
}

/// Renders an unevaluated expression tree back to source syntax. Operand
/// grouping is made explicit with parentheses, so re-parsing the output
/// yields a structurally identical tree.
pub fn write_expr(graph: &Graph, interns: &Interns, node: NodeId, out: &mut String) {
    use crate::graph::OpKind;

    let NodeKind::Oper(op, args) = graph.kind(node) else {
        write_value(graph, interns, node, out);
        return;
    };
    let args: &[NodeId] = args;
    let infix = |symbol: &str, out: &mut String| {
        out.push('(');
        write_expr(graph, interns, args[0], out);
        out.push(' ');
        out.push_str(symbol);
        out.push(' ');
        write_expr(graph, interns, args[1], out);
        out.push(')');
    };
    match op {
        OpKind::Add => infix("+", out),
        OpKind::Subtract => infix("-", out),
        OpKind::Multiply => infix("*", out),
        OpKind::Divide => infix("/", out),
        OpKind::Modulus => infix("%", out),
        OpKind::Equal => infix("==", out),
        OpKind::NotEqual => infix("!=", out),
        OpKind::Less => infix("<", out),
        OpKind::LessEqual => infix("<=", out),
        OpKind::Greater => infix(">", out),
        OpKind::GreaterEqual => infix(">=", out),
        OpKind::And => infix("and", out),
        OpKind::Or => infix("or", out),
        OpKind::In => infix("in", out),
        OpKind::NotIn => infix("not in", out),
        OpKind::MapsTo => infix("=>", out),
        OpKind::Concat => {
            // N-ary concats (from interpolated strings) chain left.
            out.push('(');
            for (i, &a) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(" ++ ");
                }
                write_expr(graph, interns, a, out);
            }
            out.push(')');
        }
        OpKind::Negate => {
            out.push('-');
            write_expr(graph, interns, args[0], out);
        }
        OpKind::Not => {
            out.push_str("not ");
            write_expr(graph, interns, args[0], out);
        }
        OpKind::GetMember => {
            write_expr(graph, interns, args[0], out);
            out.push('.');
            write_expr(graph, interns, args[1], out);
        }
        OpKind::GetElement => {
            write_expr(graph, interns, args[0], out);
            out.push('[');
            for (i, &a) in args[1..].iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(graph, interns, a, out);
            }
            out.push(']');
        }
        OpKind::Call => {
            write_expr(graph, interns, args[0], out);
            out.push('(');
            for (i, &a) in args[1..].iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(graph, interns, a, out);
            }
            out.push(')');
        }
        OpKind::MakeList => {
            out.push('[');
            for (i, &a) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(graph, interns, a, out);
            }
            out.push(']');
        }
        OpKind::MakeTuple => {
            out.push('(');
            for (i, &a) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(graph, interns, a, out);
            }
            out.push(')');
        }
        OpKind::MakeDict => {
            out.push('{');
            for (i, &entry) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_member(graph, interns, entry, out);
            }
            out.push('}');
        }
        OpKind::MakeObject => {
            write_expr(graph, interns, args[0], out);
            out.push_str(" { ");
            for (i, &member) in args[1..].iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_member(graph, interns, member, out);
            }
            out.push_str(" }");
        }
        OpKind::MakeDeferred => write_expr(graph, interns, args[0], out),
        OpKind::If => {
            out.push_str("if (");
            write_expr(graph, interns, args[0], out);
            out.push_str(") ");
            write_expr(graph, interns, args[1], out);
            if let Some(&else_body) = args.get(2) {
                out.push_str(" else ");
                write_expr(graph, interns, else_body, out);
            }
        }
        OpKind::Do => {
            out.push_str("do [");
            for (i, &a) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(graph, interns, a, out);
            }
            out.push(']');
        }
        OpKind::Let => {
            out.push_str("let ");
            let (bindings, body) = args.split_at(args.len() - 1);
            for (i, &binding) in bindings.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_member(graph, interns, binding, out);
            }
            out.push_str(" : ");
            write_expr(graph, interns, body[0], out);
        }
        OpKind::SelfRef => out.push_str("self"),
        OpKind::SuperRef => out.push_str("super"),
        _ => {
            let name: &'static str = (*op).into();
            let _ = write!(out, "<{name}>");
        }
    }
}

/// One member entry of an object/dict body or `let` binding list.
fn write_member(graph: &Graph, interns: &Interns, entry: NodeId, out: &mut String) {
    use crate::graph::OpKind;

    let Some((op, args)) = graph.as_oper(entry) else {
        write_expr(graph, interns, entry, out);
        return;
    };
    match op {
        OpKind::SetMember => {
            write_expr(graph, interns, args[0], out);
            if let Some((OpKind::MakeDeferred, inner)) = graph.as_oper(args[1]) {
                out.push_str(" => ");
                write_expr(graph, interns, inner[0], out);
            } else {
                out.push_str(" = ");
                write_expr(graph, interns, args[1], out);
            }
        }
        OpKind::AppendMember => {
            write_expr(graph, interns, args[0], out);
            out.push_str(" ++= ");
            write_expr(graph, interns, args[1], out);
        }
        OpKind::MakeParam => {
            let flags = match graph.kind(args[3]) {
                NodeKind::Integer(bits) => crate::object::AttrFlags::from_bits(*bits as u8),
                _ => crate::object::AttrFlags::PARAM,
            };
            if flags.contains(crate::object::AttrFlags::CACHED) {
                out.push_str("cached ");
            }
            out.push_str("param ");
            write_expr(graph, interns, args[0], out);
            if !graph.is_undefined(args[1]) {
                out.push_str(" : ");
                write_expr(graph, interns, args[1], out);
            }
            if flags.contains(crate::object::AttrFlags::LAZY) {
                out.push_str(" => ");
                if let Some((OpKind::MakeDeferred, inner)) = graph.as_oper(args[2]) {
                    write_expr(graph, interns, inner[0], out);
                } else {
                    write_expr(graph, interns, args[2], out);
                }
            } else {
                out.push_str(" = ");
                write_expr(graph, interns, args[2], out);
            }
        }
        _ => write_expr(graph, interns, entry, out),
    }
}

/// Writes a single-quoted string literal with escapes.
pub fn write_quoted(value: &str, out: &mut String) {
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('\'');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{source::Location, types::TYPE_GENERIC_LIST};

    #[test]
    fn literal_rendering_round_trips_shapes() {
        let mut graph = Graph::new();
        let mut interns = Interns::new();
        let s = interns.intern("a'b");
        let str_node = graph.string(Location::NONE, s);
        let int_node = graph.integer(Location::NONE, 42);
        let float_node = graph.float(Location::NONE, 2.5);
        let list = graph.list(
            Location::NONE,
            TYPE_GENERIC_LIST,
            vec![str_node, int_node, float_node],
        );
        let mut out = String::new();
        write_value(&graph, &interns, list, &mut out);
        assert_eq!(out, "['a\\'b', 42, 2.5]");
    }

    #[test]
    fn display_leaves_strings_unquoted() {
        let mut graph = Graph::new();
        let mut interns = Interns::new();
        let s = interns.intern("plain");
        let node = graph.string(Location::NONE, s);
        assert_eq!(display_value(&graph, &interns, node), "plain");
    }
}
