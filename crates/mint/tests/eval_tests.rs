//! Evaluator behavior: constant folding, coercion, scoping, realization,
//! and the list/lambda machinery.

use mint::{
    Diagnostics, Evaluator, Fundamentals, Graph, Interns, Module, NodeId, NodeKind, OpKind,
    Parser, SourceMap, TextBuffer, TypeRegistry, TYPE_FLOAT, TYPE_INTEGER, TYPE_MODULE,
    fundamentals,
};
use pretty_assertions::assert_eq;

/// In-memory evaluation session over a synthetic module.
struct Session {
    graph: Graph,
    interns: Interns,
    types: TypeRegistry,
    sources: SourceMap,
    diags: Diagnostics,
    fund: Fundamentals,
    module: mint::ModuleId,
}

impl Session {
    fn new(src: &str) -> Self {
        Self::with_source_dir(src, "/tmp")
    }

    fn with_source_dir(src: &str, source_dir: &str) -> Self {
        let mut graph = Graph::new();
        let mut interns = Interns::new();
        let mut types = TypeRegistry::new();
        let mut sources = SourceMap::new();
        let mut diags = Diagnostics::captured();
        let fund = fundamentals::build(&mut graph, &mut interns, &mut types);

        let name = interns.intern("test");
        let module = graph.new_module(
            Module::new(name, source_dir.to_owned(), source_dir.to_owned()),
            TYPE_MODULE,
        );
        let buffer = sources.add(TextBuffer::new("test.mint", src.as_bytes().to_vec()));
        let defs = {
            let buf = sources.get(buffer);
            let mut parser = Parser::new(
                buffer,
                buf,
                &mut graph,
                &mut interns,
                &mut types,
                &mut diags,
                &sources,
            );
            let root = parser.parse_module();
            match graph.as_oper(root) {
                Some((OpKind::MakeModule, args)) => args.to_vec(),
                _ => Vec::new(),
            }
        };
        {
            let mut ev = Evaluator::new(
                &mut graph,
                &mut interns,
                &mut types,
                &sources,
                &mut diags,
                fund,
                module,
            );
            ev.eval_module_contents(&defs);
        }
        Self {
            graph,
            interns,
            types,
            sources,
            diags,
            fund,
            module,
        }
    }

    /// Parses and evaluates one expression in the module's scope.
    fn eval_expr(&mut self, src: &str) -> NodeId {
        let buffer = self
            .sources
            .add(TextBuffer::new("<expr>", src.as_bytes().to_vec()));
        let expr = {
            let buf = self.sources.get(buffer);
            let mut parser = Parser::new(
                buffer,
                buf,
                &mut self.graph,
                &mut self.interns,
                &mut self.types,
                &mut self.diags,
                &self.sources,
            );
            parser.expression().expect("expression should parse")
        };
        let mut ev = Evaluator::new(
            &mut self.graph,
            &mut self.interns,
            &mut self.types,
            &self.sources,
            &mut self.diags,
            self.fund,
            self.module,
        );
        ev.eval(expr)
    }

    fn module_attr(&mut self, name: &str) -> NodeId {
        let id = self.interns.intern(name);
        self.graph
            .module(self.module)
            .own_attr(id)
            .expect("module attribute should exist")
    }

    fn as_int(&self, node: NodeId) -> i64 {
        match *self.graph.kind(node) {
            NodeKind::Integer(i) => i,
            ref other => panic!("expected integer, got {other:?}"),
        }
    }

    fn as_str(&self, node: NodeId) -> String {
        match *self.graph.kind(node) {
            NodeKind::Str(s) => self.interns.get(s).to_owned(),
            ref other => panic!("expected string, got {other:?}"),
        }
    }
}

#[test]
fn integer_constant_folding() {
    let mut session = Session::new("x = 1 + 1\n");
    let x = session.module_attr("x");
    assert_eq!(session.as_int(x), 2);
    assert_eq!(session.diags.error_count(), 0);
}

#[test]
fn mixed_arithmetic_promotes_to_float() {
    let mut session = Session::new("");
    let v = session.eval_expr("1.0 + 1");
    assert!(
        matches!(session.graph.kind(v), NodeKind::Float(f) if *f == 2.0),
        "1.0 + 1 should fold to Float(2.0)"
    );
}

#[test]
fn precedence_through_evaluation() {
    let mut session = Session::new("");
    let v = session.eval_expr("1 + 2 * 3");
    assert_eq!(session.as_int(v), 7);
}

#[test]
fn coercion_between_int_and_float() {
    let mut session = Session::new("");
    let one = session.eval_expr("1");
    let mut ev = Evaluator::new(
        &mut session.graph,
        &mut session.interns,
        &mut session.types,
        &session.sources,
        &mut session.diags,
        session.fund,
        session.module,
    );
    let as_float = ev.coerce(one, TYPE_FLOAT);
    assert!(matches!(ev.graph.kind(as_float), NodeKind::Float(f) if *f == 1.0));
    let float = ev.graph.float(mint::Location::NONE, 1.0);
    let as_int = ev.coerce(float, TYPE_INTEGER);
    assert!(matches!(ev.graph.kind(as_int), NodeKind::Integer(1)));
}

#[test]
fn string_concatenation() {
    let mut session = Session::new("");
    let v = session.eval_expr("'a' ++ 'b'");
    assert_eq!(session.as_str(v), "ab");
}

#[test]
fn list_concatenation_and_membership() {
    let mut session = Session::new("");
    let v = session.eval_expr("[1] ++ [2, 3]");
    assert!(matches!(session.graph.kind(v), NodeKind::List(e) if e.len() == 3));
    let found = session.eval_expr("2 in [1, 2, 3]");
    assert!(matches!(session.graph.kind(found), NodeKind::Bool(true)));
    let missing = session.eval_expr("5 not in [1, 2, 3]");
    assert!(matches!(session.graph.kind(missing), NodeKind::Bool(true)));
}

#[test]
fn logical_operators_short_circuit() {
    let mut session = Session::new("");
    // The right operand would be a type error if evaluated.
    let v = session.eval_expr("false and 'nope'");
    assert!(matches!(session.graph.kind(v), NodeKind::Bool(false)));
    assert_eq!(session.diags.error_count(), 0);
    let v = session.eval_expr("true or 'nope'");
    assert!(matches!(session.graph.kind(v), NodeKind::Bool(true)));
    assert_eq!(session.diags.error_count(), 0);
}

#[test]
fn undefined_symbol_reports_and_yields_undefined() {
    let mut session = Session::new("");
    let v = session.eval_expr("missing_name");
    assert!(session.graph.is_undefined(v));
    assert_eq!(session.diags.error_count(), 1);
    assert!(session.diags.output().contains("Undefined symbol"));
}

#[test]
fn member_access_on_undefined_is_undefined_without_error() {
    let mut session = Session::new("");
    let v = session.eval_expr("undefined.anything");
    assert!(session.graph.is_undefined(v));
    assert_eq!(session.diags.error_count(), 0);
}

#[test]
fn inner_scope_shadows_module_binding() {
    let mut session = Session::new(
        "x = 1\no = object { param x : int = 2, param y => x }\n",
    );
    let v = session.eval_expr("o.y");
    assert_eq!(session.as_int(v), 2, "object x should shadow module x");
    let module_x = session.module_attr("x");
    assert_eq!(session.as_int(module_x), 1);
}

#[test]
fn realization_is_idempotent() {
    let mut session = Session::new("o = object { param a : int = 40 + 2 }\n");
    let first = session.eval_expr("o.a");
    let second = session.eval_expr("o.a");
    assert_eq!(session.as_int(first), 42);
    assert_eq!(
        first, second,
        "non-lazy attribute reads must be pointer-equal across accesses"
    );
}

#[test]
fn lazy_attribute_reevaluates_in_object_scope() {
    let mut session = Session::new(
        "o = object { param base : int = 3, param doubled => base * 2 }\n",
    );
    let v = session.eval_expr("o.doubled");
    assert_eq!(session.as_int(v), 6);
}

#[test]
fn setting_undeclared_property_is_an_error() {
    let mut session = Session::new("o = object { nonexistent = 1 }\n");
    let _ = session.eval_expr("o.nonexistent");
    assert!(
        session.diags.output().contains("non-existent property"),
        "got: {}",
        session.diags.output()
    );
}

#[test]
fn append_to_non_list_is_a_type_error() {
    let mut session = Session::new(
        "o = object { param v : int = 1 }\np = o { v ++= [2] }\n",
    );
    let _ = session.eval_expr("p.v");
    assert!(
        session.diags.output().contains("non-list"),
        "got: {}",
        session.diags.output()
    );
}

#[test]
fn append_member_concatenates_lists() {
    let mut session = Session::new(
        "o = object { param flags : list[string] = ['-a'] }\np = o { flags ++= ['-b'] }\n",
    );
    let v = session.eval_expr("p.flags");
    match session.graph.kind(v).clone() {
        NodeKind::List(elements) => {
            assert_eq!(elements.len(), 2);
            assert_eq!(session.as_str(elements[0]), "-a");
            assert_eq!(session.as_str(elements[1]), "-b");
        }
        other => panic!("expected list, got {other:?}"),
    }
}

#[test]
fn negative_list_index_is_an_error() {
    let mut session = Session::new("");
    let v = session.eval_expr("[1, 2, 3][-1]");
    assert!(session.graph.is_undefined(v));
    assert!(
        session.diags.output().contains("Index out of range"),
        "got: {}",
        session.diags.output()
    );
}

#[test]
fn dict_literal_and_element_access() {
    let mut session = Session::new("d = { a = 1, b = 2 }\n");
    let v = session.eval_expr("d['b']");
    assert_eq!(session.as_int(v), 2);
    let member = session.eval_expr("d.a");
    assert_eq!(session.as_int(member), 1);
}

#[test]
fn map_and_filter_with_lambdas() {
    let mut session = Session::new("");
    let mapped = session.eval_expr("[1, 2, 3].map(x => x * 2)");
    match session.graph.kind(mapped).clone() {
        NodeKind::List(elements) => {
            let values: Vec<i64> = elements.iter().map(|&e| session.as_int(e)).collect();
            assert_eq!(values, vec![2, 4, 6]);
        }
        other => panic!("expected list, got {other:?}"),
    }
    let kept = session.eval_expr("[1, 2, 3, 4].filter(x => x > 2)");
    match session.graph.kind(kept).clone() {
        NodeKind::List(elements) => {
            let values: Vec<i64> = elements.iter().map(|&e| session.as_int(e)).collect();
            assert_eq!(values, vec![3, 4]);
        }
        other => panic!("expected list, got {other:?}"),
    }
}

#[test]
fn let_and_conditional_expressions() {
    let mut session = Session::new("");
    let v = session.eval_expr("let a = 2, b = 3 : a * b");
    assert_eq!(session.as_int(v), 6);
    let v = session.eval_expr("if (1 < 2) 'yes' else 'no'");
    assert_eq!(session.as_str(v), "yes");
}

#[test]
fn interpolated_strings_stringify_segments() {
    let mut session = Session::new("n = 3\n");
    let v = session.eval_expr(r#""count=${n}!""#);
    assert_eq!(session.as_str(v), "count=3!");
}

#[test]
fn conditional_module_definitions() {
    let mut session = Session::new("flag = true\nif (flag) { a = 1 } else { a = 2 }\n");
    let a = session.module_attr("a");
    assert_eq!(session.as_int(a), 1);
    assert_eq!(session.diags.error_count(), 0);
}

#[test]
fn duplicate_module_attribute_is_an_error() {
    let session = Session::new("x = 1\nx = 2\n");
    assert!(
        session
            .diags
            .output()
            .contains("already defined in this module"),
        "got: {}",
        session.diags.output()
    );
}

#[test]
fn path_intrinsics() {
    let mut session = Session::new("");
    let v = session.eval_expr("path.change_ext('a.c', 'o')");
    assert_eq!(session.as_str(v), "a.o");
    let v = session.eval_expr("path.join('/src', 'main.c')");
    assert_eq!(session.as_str(v), "/src/main.c");
    let v = session.eval_expr("path.basename('/src/main.c')");
    assert_eq!(session.as_str(v), "main.c");
}

#[test]
fn regex_intrinsics() {
    let mut session = Session::new("");
    let v = session.eval_expr("regex.find('[0-9]+', 'abc 123 def')");
    assert_eq!(session.as_str(v), "123");
    let v = session.eval_expr("regex.subst_all('o', '0', 'foo boo')");
    assert_eq!(session.as_str(v), "f00 b00");
    let v = session.eval_expr("regex.find(re.compile('b+'), 'abbc')");
    assert_eq!(session.as_str(v), "bb");
}

#[test]
fn shell_returns_status_dict() {
    let mut session = Session::new("");
    let v = session.eval_expr("shell('echo', ['hi'], '')");
    let status = session.eval_expr("shell('true', [], '').status");
    // Both commands exist on any POSIX host; status must be zero.
    assert_eq!(session.as_int(status), 0);
    match session.graph.kind(v) {
        NodeKind::Dict(_) => {}
        other => panic!("expected dict result, got {other:?}"),
    }
}

#[test]
fn option_declaration_and_default() {
    let mut session = Session::new("option opt_level : int { help = 'level', default = 3 }\n");
    let v = session.eval_expr("opt_level");
    assert_eq!(session.as_int(v), 3, "unset option should read its default");
}
