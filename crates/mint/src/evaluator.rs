//! The evaluator: a tree-walking interpreter over the node graph.
//!
//! Evaluation maintains a single mutable lexical scope; scope push/pop is
//! strictly stack-disciplined. Literal nodes evaluate to themselves; operator
//! nodes produce new value nodes. Object bodies are realized lazily, on
//! first attribute access, and realization is idempotent.

use smallvec::SmallVec;

use crate::{
    diagnostics::Diagnostics,
    function::{Function, Handler},
    graph::{Graph, NodeId, NodeKind, OpKind},
    intern::{Interns, StringId},
    module::ModuleId,
    object::{Attr, AttrFlags, AttributeDefinition, AttributeLookup, Object, ObjectId, ScopeRef},
    source::{Location, SourceMap},
    types::{
        TYPE_ANY, TYPE_GENERIC_DICT, TYPE_GENERIC_LIST, TYPE_OBJECT, TYPE_STRING, TypeId,
        TypeKind, TypeRegistry,
    },
};

/// Handles to the built-in root module and its prototypes, created once at
/// startup by [`crate::fundamentals::build`].
#[derive(Debug, Clone, Copy)]
pub struct Fundamentals {
    pub module: ModuleId,
    pub object_proto: ObjectId,
    pub target_proto: ObjectId,
    pub option_proto: ObjectId,
    /// Hidden namespace holding the built-in list methods.
    pub list_methods: ObjectId,
}

pub struct Evaluator<'a> {
    pub graph: &'a mut Graph,
    pub interns: &'a mut Interns,
    pub types: &'a mut TypeRegistry,
    pub sources: &'a SourceMap,
    pub diags: &'a mut Diagnostics,
    pub fundamentals: Fundamentals,
    module: ModuleId,
    scope: ScopeRef,
    /// Echo shell commands before running them (`--trace-config`).
    pub trace_commands: bool,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        graph: &'a mut Graph,
        interns: &'a mut Interns,
        types: &'a mut TypeRegistry,
        sources: &'a SourceMap,
        diags: &'a mut Diagnostics,
        fundamentals: Fundamentals,
        module: ModuleId,
    ) -> Self {
        Self {
            graph,
            interns,
            types,
            sources,
            diags,
            fundamentals,
            module,
            scope: ScopeRef::Module(module),
            trace_commands: false,
        }
    }

    pub fn module(&self) -> ModuleId {
        self.module
    }

    /// Source directory of the module driving this evaluation.
    pub fn source_dir(&self) -> String {
        self.graph.module(self.module).source_dir.clone()
    }

    fn error(&mut self, loc: Location, msg: &str) {
        self.diags.error(loc, self.sources, msg);
    }

    fn set_scope(&mut self, scope: ScopeRef) -> ScopeRef {
        std::mem::replace(&mut self.scope, scope)
    }

    // ------------------------------------------------------------------
    // Scope resolution
    // ------------------------------------------------------------------

    /// Looks up `name` along the prototype chain of `obj`. The value comes
    /// from the nearest entry; the declared type and flags come from the
    /// nearest definition.
    pub fn lookup_attribute(&self, obj: ObjectId, name: StringId) -> Option<AttributeLookup> {
        let mut result: Option<AttributeLookup> = None;
        let mut cursor = Some(obj);
        while let Some(id) = cursor {
            let object = self.graph.object(id);
            if let Some(attr) = object.own_attr(name) {
                match attr {
                    Attr::Value(v) => {
                        if result.is_none() {
                            result = Some(AttributeLookup {
                                value: *v,
                                declared_ty: None,
                                flags: AttrFlags::NONE,
                                found_on: id,
                            });
                        }
                    }
                    Attr::Def(def) => {
                        match &mut result {
                            Some(found) => {
                                // The nearest value wins; pick up the
                                // definition's type and flags.
                                found.declared_ty = Some(def.ty);
                                found.flags = def.flags;
                            }
                            None => {
                                result = Some(AttributeLookup {
                                    value: def.value,
                                    declared_ty: Some(def.ty),
                                    flags: def.flags,
                                    found_on: id,
                                });
                            }
                        }
                        break;
                    }
                }
            }
            cursor = object.prototype;
        }
        result
    }

    /// Resolves an identifier: the active scope chain first, then the
    /// module's imports (last-imported-wins), then the fundamentals root.
    fn resolve_ident(&mut self, name: StringId) -> Option<NodeId> {
        let mut scope = Some(self.scope);
        while let Some(s) = scope {
            match s {
                ScopeRef::Object(obj) => {
                    if let Some(found) = self.lookup_attribute(obj, name) {
                        if found.flags.contains(AttrFlags::LAZY) {
                            let saved = self.set_scope(ScopeRef::Object(obj));
                            let value = self.eval(found.value);
                            self.scope = saved;
                            return Some(value);
                        }
                        return Some(self.deref_binding(found.value));
                    }
                    scope = self.graph.object(obj).parent_scope;
                }
                ScopeRef::Module(m) => {
                    if let Some(value) = self.graph.module(m).own_attr(name) {
                        return Some(self.deref_binding(value));
                    }
                    let imports: Vec<ModuleId> =
                        self.graph.module(m).imports.iter().rev().copied().collect();
                    for import in imports {
                        if let Some(value) = self.graph.module(import).own_attr(name) {
                            return Some(self.deref_binding(value));
                        }
                    }
                    scope = None;
                }
            }
        }
        let root = self.fundamentals.module;
        if let Some(value) = self.graph.module(root).own_attr(name) {
            return Some(self.deref_binding(value));
        }
        None
    }

    /// Option objects dereference to their configured value (or default)
    /// when referenced by name.
    fn deref_binding(&mut self, value: NodeId) -> NodeId {
        if let Some(obj) = self.graph.as_object(value) {
            if self.graph.inherits_from(obj, self.fundamentals.option_proto)
                && obj != self.fundamentals.option_proto
            {
                return self.option_value(obj);
            }
        }
        value
    }

    /// The effective value of an option object: its `value` attribute when
    /// configured, otherwise its `default`.
    pub fn option_value(&mut self, obj: ObjectId) -> NodeId {
        let names = *self.interns.names();
        let value = self
            .graph
            .object(obj)
            .own_attr(names.value)
            .map(Attr::node)
            .filter(|v| !self.graph.is_undefined(*v));
        match value {
            Some(v) => v,
            None => self
                .graph
                .object(obj)
                .own_attr(names.default)
                .map(Attr::node)
                .unwrap_or(NodeId::UNDEFINED),
        }
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    pub fn eval(&mut self, n: NodeId) -> NodeId {
        let kind = self.graph.kind(n).clone();
        let loc = self.graph.loc(n);
        match kind {
            NodeKind::Undefined
            | NodeKind::Bool(_)
            | NodeKind::Integer(_)
            | NodeKind::Float(_)
            | NodeKind::Str(_)
            | NodeKind::TypeName(_)
            | NodeKind::List(_)
            | NodeKind::Dict(_)
            | NodeKind::Object(_)
            | NodeKind::Module(_)
            | NodeKind::Function(_) => n,
            NodeKind::Ident(name) => match self.resolve_ident(name) {
                Some(value) => value,
                None => {
                    let text = self.interns.get(name).to_owned();
                    self.error(loc, &format!("Undefined symbol: '{text}'"));
                    NodeId::UNDEFINED
                }
            },
            NodeKind::Oper(op, args) => self.eval_oper(n, op, &args, loc),
        }
    }

    fn eval_oper(&mut self, node: NodeId, op: OpKind, args: &[NodeId], loc: Location) -> NodeId {
        match op {
            OpKind::MakeList | OpKind::MakeTuple => {
                let elements: Vec<NodeId> = args.iter().map(|&a| self.eval(a)).collect();
                self.graph.list(loc, TYPE_GENERIC_LIST, elements)
            }
            OpKind::MakeDict => self.make_dict(args, loc),
            OpKind::MakeObject => self.make_object(node, None),
            OpKind::MakeDeferred => self.eval(args[0]),
            OpKind::SelfRef => match self.innermost_object() {
                Some(obj) => self.graph.object(obj).node(),
                None => {
                    self.error(loc, "'self' used outside of an object");
                    NodeId::UNDEFINED
                }
            },
            OpKind::SuperRef => match self.innermost_object().and_then(|o| self.graph.object(o).prototype) {
                Some(proto) => self.graph.object(proto).node(),
                None => {
                    self.error(loc, "'super' used outside of an object with a prototype");
                    NodeId::UNDEFINED
                }
            },
            OpKind::GetMember => self.eval_get_member(args, loc),
            OpKind::GetElement => self.eval_get_element(args, loc),
            OpKind::Call => self.eval_call(args, loc),
            OpKind::Negate => {
                let v = self.eval(args[0]);
                match *self.graph.kind(v) {
                    NodeKind::Integer(i) => self.graph.integer(loc, -i),
                    NodeKind::Float(f) => self.graph.float(loc, -f),
                    _ => {
                        let shown = self.display(v);
                        self.error(loc, &format!("Not a number: '{shown}'"));
                        NodeId::UNDEFINED
                    }
                }
            }
            OpKind::Not => {
                let v = self.eval(args[0]);
                let b = self.truth_value(v, loc);
                self.graph.bool_node(loc, !b)
            }
            OpKind::Add | OpKind::Subtract | OpKind::Multiply | OpKind::Divide => {
                self.eval_arithmetic(op, args, loc)
            }
            OpKind::Modulus => {
                let a = self.eval(args[0]);
                let b = self.eval(args[1]);
                match (self.graph.kind(a).clone(), self.graph.kind(b).clone()) {
                    (NodeKind::Integer(x), NodeKind::Integer(y)) => {
                        if y == 0 {
                            self.error(loc, "Division by zero");
                            NodeId::UNDEFINED
                        } else {
                            self.graph.integer(loc, x % y)
                        }
                    }
                    (NodeKind::Float(_), _) | (_, NodeKind::Float(_)) => {
                        let shown = self.display(a);
                        self.error(loc, &format!("Invalid operand type for modulus: '{shown}'"));
                        NodeId::UNDEFINED
                    }
                    _ => {
                        let shown = self.display(a);
                        self.error(loc, &format!("Not a number: '{shown}'"));
                        NodeId::UNDEFINED
                    }
                }
            }
            OpKind::Concat => self.eval_concat(node, args, loc),
            OpKind::Equal => {
                let a = self.eval(args[0]);
                let b = self.eval(args[1]);
                let eq = self.values_equal(a, b);
                self.graph.bool_node(loc, eq)
            }
            OpKind::NotEqual => {
                let a = self.eval(args[0]);
                let b = self.eval(args[1]);
                let eq = self.values_equal(a, b);
                self.graph.bool_node(loc, !eq)
            }
            OpKind::Less | OpKind::LessEqual | OpKind::Greater | OpKind::GreaterEqual => {
                self.eval_relational(op, args, loc)
            }
            OpKind::And => {
                let a = self.eval(args[0]);
                if !self.truth_value(a, loc) {
                    return self.graph.bool_node(loc, false);
                }
                let b = self.eval(args[1]);
                let t = self.truth_value(b, loc);
                self.graph.bool_node(loc, t)
            }
            OpKind::Or => {
                let a = self.eval(args[0]);
                if self.truth_value(a, loc) {
                    return self.graph.bool_node(loc, true);
                }
                let b = self.eval(args[1]);
                let t = self.truth_value(b, loc);
                self.graph.bool_node(loc, t)
            }
            OpKind::In | OpKind::NotIn => {
                let item = self.eval(args[0]);
                let container = self.eval(args[1]);
                let found = self.contains(container, item, loc);
                self.graph
                    .bool_node(loc, if op == OpKind::In { found } else { !found })
            }
            OpKind::If => {
                let test = self.eval(args[0]);
                let t = self.truth_value(test, loc);
                if t {
                    self.eval(args[1])
                } else if args.len() > 2 {
                    self.eval(args[2])
                } else {
                    NodeId::UNDEFINED
                }
            }
            OpKind::Do => {
                let mut result = NodeId::UNDEFINED;
                for &a in args {
                    result = self.eval(a);
                }
                result
            }
            OpKind::Let => self.eval_let(args, loc),
            OpKind::MapsTo => self.make_lambda(args, loc),
            _ => {
                let name: &'static str = op.into();
                self.error(loc, &format!("Expression cannot be evaluated: {name}"));
                NodeId::UNDEFINED
            }
        }
    }

    fn innermost_object(&self) -> Option<ObjectId> {
        let mut scope = Some(self.scope);
        while let Some(s) = scope {
            match s {
                ScopeRef::Object(obj) => return Some(obj),
                ScopeRef::Module(_) => return None,
            }
        }
        None
    }

    fn eval_arithmetic(&mut self, op: OpKind, args: &[NodeId], loc: Location) -> NodeId {
        let a = self.eval(args[0]);
        let b = self.eval(args[1]);
        match (self.graph.kind(a).clone(), self.graph.kind(b).clone()) {
            (NodeKind::Integer(x), NodeKind::Integer(y)) => match op {
                OpKind::Add => self.graph.integer(loc, x.wrapping_add(y)),
                OpKind::Subtract => self.graph.integer(loc, x.wrapping_sub(y)),
                OpKind::Multiply => self.graph.integer(loc, x.wrapping_mul(y)),
                OpKind::Divide => {
                    if y == 0 {
                        self.error(loc, "Division by zero");
                        NodeId::UNDEFINED
                    } else {
                        self.graph.integer(loc, x / y)
                    }
                }
                _ => unreachable!("non-arithmetic op"),
            },
            (lhs, rhs) => {
                // Mixed int/float promotes to float.
                let to_f = |k: &NodeKind| match *k {
                    NodeKind::Integer(i) => Some(i as f64),
                    NodeKind::Float(f) => Some(f),
                    _ => None,
                };
                match (to_f(&lhs), to_f(&rhs)) {
                    (Some(x), Some(y)) => {
                        let v = match op {
                            OpKind::Add => x + y,
                            OpKind::Subtract => x - y,
                            OpKind::Multiply => x * y,
                            OpKind::Divide => x / y,
                            _ => unreachable!("non-arithmetic op"),
                        };
                        self.graph.float(loc, v)
                    }
                    _ => {
                        let shown = self.display(a);
                        self.error(loc, &format!("Not a number: '{shown}'"));
                        NodeId::UNDEFINED
                    }
                }
            }
        }
    }

    fn eval_relational(&mut self, op: OpKind, args: &[NodeId], loc: Location) -> NodeId {
        let a = self.eval(args[0]);
        let b = self.eval(args[1]);
        let ordering = match (self.graph.kind(a).clone(), self.graph.kind(b).clone()) {
            (NodeKind::Integer(x), NodeKind::Integer(y)) => x.partial_cmp(&y),
            (NodeKind::Float(x), NodeKind::Float(y)) => x.partial_cmp(&y),
            (NodeKind::Integer(x), NodeKind::Float(y)) => (x as f64).partial_cmp(&y),
            (NodeKind::Float(x), NodeKind::Integer(y)) => x.partial_cmp(&(y as f64)),
            (NodeKind::Str(x), NodeKind::Str(y)) => {
                Some(self.interns.get(x).cmp(self.interns.get(y)))
            }
            _ => {
                let shown = self.display(a);
                self.error(loc, &format!("Values cannot be ordered: '{shown}'"));
                return NodeId::UNDEFINED;
            }
        };
        let Some(ordering) = ordering else {
            return self.graph.bool_node(loc, false);
        };
        let result = match op {
            OpKind::Less => ordering.is_lt(),
            OpKind::LessEqual => ordering.is_le(),
            OpKind::Greater => ordering.is_gt(),
            OpKind::GreaterEqual => ordering.is_ge(),
            _ => unreachable!("non-relational op"),
        };
        self.graph.bool_node(loc, result)
    }

    fn eval_concat(&mut self, node: NodeId, args: &[NodeId], loc: Location) -> NodeId {
        let values: Vec<NodeId> = args.iter().map(|&a| self.eval(a)).collect();
        // Interpolated strings fold to a Concat typed as string by the
        // parser; those stringify every segment. A binary `++` is strict.
        let from_istring = self.graph.ty(node) == TYPE_STRING;
        if args.len() == 2 && !from_istring {
            // Binary `++`: both operands must be strings or both lists.
            match (
                self.graph.kind(values[0]).clone(),
                self.graph.kind(values[1]).clone(),
            ) {
                (NodeKind::Str(a), NodeKind::Str(b)) => {
                    let joined = format!("{}{}", self.interns.get(a), self.interns.get(b));
                    let id = self.interns.intern(&joined);
                    return self.graph.string(loc, id);
                }
                (NodeKind::List(a), NodeKind::List(b)) => {
                    let mut elements = a.clone();
                    elements.extend_from_slice(&b);
                    return self.graph.list(loc, TYPE_GENERIC_LIST, elements);
                }
                _ => {
                    let shown = self.display(values[0]);
                    self.error(
                        loc,
                        &format!("Invalid operand types for concatenation: '{shown}'"),
                    );
                    return NodeId::UNDEFINED;
                }
            }
        }
        // N-ary concat comes from interpolated strings: stringify segments.
        let mut out = String::new();
        for v in values {
            out.push_str(&self.display(v));
        }
        let id = self.interns.intern(&out);
        self.graph.string(loc, id)
    }

    /// Structural equality for primitives and lists; identity for objects.
    pub fn values_equal(&self, a: NodeId, b: NodeId) -> bool {
        match (self.graph.kind(a), self.graph.kind(b)) {
            (NodeKind::Undefined, NodeKind::Undefined) => true,
            (NodeKind::Bool(x), NodeKind::Bool(y)) => x == y,
            (NodeKind::Integer(x), NodeKind::Integer(y)) => x == y,
            (NodeKind::Float(x), NodeKind::Float(y)) => x == y,
            (NodeKind::Integer(x), NodeKind::Float(y)) | (NodeKind::Float(y), NodeKind::Integer(x)) => {
                (*x as f64) == *y
            }
            (NodeKind::Str(x), NodeKind::Str(y)) => x == y,
            (NodeKind::List(x), NodeKind::List(y)) => {
                x.len() == y.len()
                    && x.iter()
                        .zip(y.iter())
                        .all(|(&ea, &eb)| self.values_equal(ea, eb))
            }
            (NodeKind::Object(x) | NodeKind::Dict(x), NodeKind::Object(y) | NodeKind::Dict(y)) => {
                x == y
            }
            _ => false,
        }
    }

    fn truth_value(&mut self, v: NodeId, loc: Location) -> bool {
        match self.graph.kind(v) {
            NodeKind::Bool(b) => *b,
            NodeKind::Undefined => false,
            _ => {
                let shown = self.display(v);
                self.error(loc, &format!("Not a boolean: '{shown}'"));
                false
            }
        }
    }

    fn contains(&mut self, container: NodeId, item: NodeId, loc: Location) -> bool {
        match self.graph.kind(container).clone() {
            NodeKind::List(elements) => elements.iter().any(|&e| self.values_equal(e, item)),
            NodeKind::Dict(obj) => match self.graph.kind(item) {
                NodeKind::Str(s) => self.graph.object(obj).own_attr(*s).is_some(),
                _ => false,
            },
            NodeKind::Str(s) => match self.graph.kind(item) {
                NodeKind::Str(sub) => self
                    .interns
                    .get(s)
                    .contains(self.interns.get(*sub)),
                _ => false,
            },
            _ => {
                let shown = self.display(container);
                self.error(loc, &format!("Not a container: '{shown}'"));
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Access operators
    // ------------------------------------------------------------------

    fn eval_get_member(&mut self, args: &[NodeId], loc: Location) -> NodeId {
        let base = self.eval(args[0]);
        if self.graph.is_undefined(base) {
            return NodeId::UNDEFINED;
        }
        let Some(name) = self.graph.as_ident(args[1]) else {
            self.error(
                self.graph.loc(args[1]),
                "Invalid node type for object member",
            );
            return NodeId::UNDEFINED;
        };
        self.get_member(base, name, loc)
    }

    /// Member lookup on an evaluated base value.
    pub fn get_member(&mut self, base: NodeId, name: StringId, loc: Location) -> NodeId {
        match self.graph.kind(base).clone() {
            NodeKind::Object(obj) | NodeKind::Dict(obj) => {
                if self.graph.object(obj).definition.is_some() {
                    self.eval_object_contents(obj);
                }
                let Some(found) = self.lookup_attribute(obj, name) else {
                    let text = self.interns.get(name).to_owned();
                    self.error(loc, &format!("Undefined symbol: {text}"));
                    return NodeId::UNDEFINED;
                };
                if found.flags.contains(AttrFlags::LAZY) {
                    // Lazy attributes re-evaluate in the accessed object's
                    // scope each time.
                    let saved = self.set_scope(ScopeRef::Object(obj));
                    let value = self.eval(found.value);
                    self.scope = saved;
                    value
                } else {
                    found.value
                }
            }
            NodeKind::Module(m) => match self.graph.module(m).own_attr(name) {
                Some(value) => self.deref_binding(value),
                None => {
                    let text = self.interns.get(name).to_owned();
                    self.error(loc, &format!("Undefined symbol: {text}"));
                    NodeId::UNDEFINED
                }
            },
            NodeKind::List(_) => {
                // List methods live on a hidden builtin namespace.
                let methods = self.fundamentals.list_methods;
                match self.lookup_attribute(methods, name) {
                    Some(found) => found.value,
                    None => {
                        let text = self.interns.get(name).to_owned();
                        self.error(loc, &format!("Undefined symbol: {text}"));
                        NodeId::UNDEFINED
                    }
                }
            }
            _ => {
                let text = self.interns.get(name).to_owned();
                self.error(loc, &format!("Undefined symbol: {text}"));
                NodeId::UNDEFINED
            }
        }
    }

    fn eval_get_element(&mut self, args: &[NodeId], loc: Location) -> NodeId {
        let base = self.eval(args[0]);
        if args.len() != 2 {
            self.error(loc, "Element access takes a single index");
            return NodeId::UNDEFINED;
        }
        // Type expression: list[string], dict[string, int].
        if let NodeKind::TypeName(_) = self.graph.kind(base) {
            return match self.eval_type_expression_parts(base, &args[1..], loc) {
                Some(ty) => self.graph.type_name(loc, ty),
                None => NodeId::UNDEFINED,
            };
        }
        let index = self.eval(args[1]);
        match self.graph.kind(base).clone() {
            NodeKind::List(elements) => match *self.graph.kind(index) {
                NodeKind::Integer(i) => {
                    if i < 0 || (i as usize) >= elements.len() {
                        self.error(loc, &format!("Index out of range: {i}"));
                        NodeId::UNDEFINED
                    } else {
                        elements[i as usize]
                    }
                }
                _ => {
                    let shown = self.display(index);
                    self.error(loc, &format!("Invalid index type: '{shown}'"));
                    NodeId::UNDEFINED
                }
            },
            NodeKind::Dict(obj) => match *self.graph.kind(index) {
                NodeKind::Str(key) => match self.graph.object(obj).own_attr(key) {
                    Some(attr) => attr.node(),
                    None => {
                        let text = self.interns.get(key).to_owned();
                        self.error(loc, &format!("Key not found: '{text}'"));
                        NodeId::UNDEFINED
                    }
                },
                _ => {
                    let shown = self.display(index);
                    self.error(loc, &format!("Invalid key type: '{shown}'"));
                    NodeId::UNDEFINED
                }
            },
            NodeKind::Undefined => NodeId::UNDEFINED,
            _ => {
                let shown = self.display(base);
                self.error(loc, &format!("Not an indexable value: '{shown}'"));
                NodeId::UNDEFINED
            }
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn eval_call(&mut self, args: &[NodeId], loc: Location) -> NodeId {
        let callee = args[0];
        let (func, self_arg) = match self.graph.kind(callee).clone() {
            NodeKind::Ident(name) => match self.resolve_ident(name) {
                Some(f) => (f, None),
                None => {
                    let text = self.interns.get(name).to_owned();
                    self.error(loc, &format!("Undefined symbol: '{text}'"));
                    return NodeId::UNDEFINED;
                }
            },
            NodeKind::Oper(OpKind::GetMember, member_args) => {
                let base = self.eval(member_args[0]);
                if self.graph.is_undefined(base) {
                    return NodeId::UNDEFINED;
                }
                let Some(name) = self.graph.as_ident(member_args[1]) else {
                    self.error(loc, "Invalid node type for object member");
                    return NodeId::UNDEFINED;
                };
                let func = self.get_member(base, name, loc);
                (func, Some(base))
            }
            _ => {
                let f = self.eval(callee);
                if self.graph.is_undefined(f) {
                    return NodeId::UNDEFINED;
                }
                (f, None)
            }
        };

        let mut evaluated: SmallVec<[NodeId; 8]> = SmallVec::new();
        for &a in &args[1..] {
            let v = self.eval(a);
            evaluated.push(v);
        }
        self.call_function(func, self_arg, &evaluated, loc)
    }

    /// Invokes an evaluated function value with evaluated arguments.
    pub fn call_function(
        &mut self,
        func: NodeId,
        self_arg: Option<NodeId>,
        args: &[NodeId],
        loc: Location,
    ) -> NodeId {
        let NodeKind::Function(fid) = *self.graph.kind(func) else {
            let shown = self.display(func);
            self.error(loc, &format!("Expression is not a function: '{shown}'"));
            return NodeId::UNDEFINED;
        };
        enum Plan {
            Native(crate::function::NativeFn),
            Lambda {
                params: Vec<StringId>,
                body: NodeId,
                scope: Option<ScopeRef>,
            },
        }
        let plan = match &self.graph.function(fid).handler {
            Handler::Native(f) => Plan::Native(*f),
            Handler::Lambda {
                params,
                body,
                scope,
            } => Plan::Lambda {
                params: params.clone(),
                body: *body,
                scope: *scope,
            },
        };
        match plan {
            Plan::Native(f) => f(self, loc, self_arg, args),
            Plan::Lambda {
                params,
                body,
                scope,
            } => {
                if params.len() != args.len() {
                    self.error(
                        loc,
                        &format!(
                            "Function takes {} arguments, {} given",
                            params.len(),
                            args.len()
                        ),
                    );
                    return NodeId::UNDEFINED;
                }
                let mut frame = Object::new(loc, None);
                frame.parent_scope = Some(scope.unwrap_or(self.scope));
                frame.module = Some(self.module);
                for (param, &arg) in params.iter().zip(args) {
                    frame.set_attr(*param, arg);
                }
                let frame_id = self.graph.new_object(loc, frame, TYPE_OBJECT);
                let saved = self.set_scope(ScopeRef::Object(frame_id));
                let result = self.eval(body);
                self.scope = saved;
                result
            }
        }
    }

    fn make_lambda(&mut self, args: &[NodeId], loc: Location) -> NodeId {
        let mut params = Vec::new();
        match self.graph.kind(args[0]).clone() {
            NodeKind::Ident(name) => params.push(name),
            NodeKind::Oper(OpKind::MakeTuple, elements) => {
                for e in elements {
                    match self.graph.as_ident(e) {
                        Some(name) => params.push(name),
                        None => {
                            self.error(loc, "Invalid parameter name in function expression");
                            return NodeId::UNDEFINED;
                        }
                    }
                }
            }
            _ => {
                self.error(loc, "Invalid parameter list in function expression");
                return NodeId::UNDEFINED;
            }
        }
        let param_types: Vec<TypeId> = params.iter().map(|_| TYPE_ANY).collect();
        let ty = self.types.function(TYPE_ANY, &param_types);
        self.graph.new_function(
            loc,
            Function {
                name: None,
                ty,
                handler: Handler::Lambda {
                    params,
                    body: args[1],
                    scope: Some(self.scope),
                },
            },
        )
    }

    fn eval_let(&mut self, args: &[NodeId], loc: Location) -> NodeId {
        let mut frame = Object::new(loc, None);
        frame.parent_scope = Some(self.scope);
        frame.module = Some(self.module);
        let frame_id = self.graph.new_object(loc, frame, TYPE_OBJECT);
        let (bindings, body) = args.split_at(args.len() - 1);
        for &binding in bindings {
            let Some((OpKind::SetMember, set_args)) = self.graph.as_oper(binding) else {
                self.error(loc, "Invalid binding in 'let' expression");
                continue;
            };
            let (name_node, value_node) = (set_args[0], set_args[1]);
            let Some(name) = self.graph.as_ident(name_node) else {
                self.error(loc, "Invalid binding name in 'let' expression");
                continue;
            };
            let value = self.eval(value_node);
            self.graph.object_mut(frame_id).set_attr(name, value);
        }
        let saved = self.set_scope(ScopeRef::Object(frame_id));
        let result = self.eval(body[0]);
        self.scope = saved;
        result
    }

    // ------------------------------------------------------------------
    // Object construction and realization
    // ------------------------------------------------------------------

    fn make_dict(&mut self, args: &[NodeId], loc: Location) -> NodeId {
        let mut dict = Object::new(loc, None);
        dict.parent_scope = Some(self.scope);
        dict.module = Some(self.module);
        let dict_id = self.graph.new_dict(loc, dict, TYPE_GENERIC_DICT);
        for &entry in args {
            let Some((op, entry_args)) = self.graph.as_oper(entry) else {
                continue;
            };
            let (key_node, value_node) = (entry_args[0], entry_args[1]);
            let key = match self.graph.kind(key_node) {
                NodeKind::Ident(name) | NodeKind::Str(name) => *name,
                _ => {
                    self.error(self.graph.loc(key_node), "Invalid dictionary key");
                    continue;
                }
            };
            let value = self.eval(value_node);
            match op {
                OpKind::SetMember => self.graph.object_mut(dict_id).set_attr(key, value),
                OpKind::AppendMember => {
                    self.append_member(dict_id, key, value, self.graph.loc(entry));
                }
                _ => {}
            }
        }
        self.graph.object(dict_id).node()
    }

    /// Constructs an object from a `MakeObject` operator without evaluating
    /// its body; the body is retained as the object's pending definition.
    pub fn make_object(&mut self, op_node: NodeId, name: Option<StringId>) -> NodeId {
        let loc = self.graph.loc(op_node);
        let Some((OpKind::MakeObject, args)) = self.graph.as_oper(op_node) else {
            self.error(loc, "Invalid object expression");
            return NodeId::UNDEFINED;
        };
        let proto_expr = args[0];
        let prototype = self.eval(proto_expr);
        if self.graph.is_undefined(prototype) {
            return NodeId::UNDEFINED;
        }
        let Some(proto_id) = self.graph.as_object(prototype) else {
            let shown = self.display(prototype);
            self.error(
                self.graph.loc(proto_expr),
                &format!("Prototype expression is not an object: '{shown}'"),
            );
            return NodeId::UNDEFINED;
        };
        let mut object = Object::new(loc, Some(proto_id));
        object.parent_scope = Some(self.scope);
        object.module = Some(self.module);
        object.name = name;
        object.definition = Some(op_node);
        let id = self.graph.new_object(loc, object, TYPE_OBJECT);
        self.graph.object(id).node()
    }

    /// Realizes a pending object body: evaluates each member expression and
    /// populates the attribute table. Idempotent; the definition pointer is
    /// cleared before the body runs so self-references terminate.
    pub fn eval_object_contents(&mut self, obj: ObjectId) -> bool {
        let Some(definition) = self.graph.object_mut(obj).definition.take() else {
            return true;
        };
        if let Some(proto) = self.graph.object(obj).prototype {
            if self.graph.object(proto).definition.is_some() && !self.eval_object_contents(proto) {
                return false;
            }
        }
        let saved = self.set_scope(ScopeRef::Object(obj));
        let mut success = true;
        let members: Vec<NodeId> = match self.graph.as_oper(definition) {
            Some((OpKind::MakeObject, args)) => args[1..].to_vec(),
            _ => Vec::new(),
        };
        for member in members {
            let Some((op, margs)) = self.graph.as_oper(member) else {
                continue;
            };
            let member_loc = self.graph.loc(member);
            let margs: Vec<NodeId> = margs.to_vec();
            match op {
                OpKind::SetMember => {
                    let Some(name) = self.graph.as_ident(margs[0]) else {
                        self.error(
                            self.graph.loc(margs[0]),
                            "Invalid expression for object property name",
                        );
                        success = false;
                        continue;
                    };
                    if !self.set_object_property(obj, name, margs[1]) {
                        success = false;
                    }
                }
                OpKind::AppendMember => {
                    let Some(name) = self.graph.as_ident(margs[0]) else {
                        self.error(
                            self.graph.loc(margs[0]),
                            "Invalid expression for object property name",
                        );
                        success = false;
                        continue;
                    };
                    let value = self.eval(margs[1]);
                    if !self.append_member(obj, name, value, member_loc) {
                        success = false;
                    }
                }
                OpKind::MakeParam => {
                    if !self.make_param(obj, &margs, member_loc) {
                        success = false;
                    }
                }
                _ => {
                    self.error(member_loc, "Invalid expression for object property");
                    success = false;
                }
            }
        }
        self.scope = saved;
        success
    }

    /// Stores a member set on an object body, checking that the attribute is
    /// declared on the prototype chain and coercing to its declared type.
    fn set_object_property(&mut self, obj: ObjectId, name: StringId, value_node: NodeId) -> bool {
        let name_loc = self.graph.loc(value_node);
        let obj_name = self.object_display_name(obj);
        if self.graph.object(obj).own_attr(name).is_some() {
            let text = self.interns.get(name).to_owned();
            self.error(
                name_loc,
                &format!("Property '{text}' has already been defined on object '{obj_name}'"),
            );
            return false;
        }
        let inherited = self
            .graph
            .object(obj)
            .prototype
            .and_then(|p| self.lookup_attribute(p, name));
        let Some(inherited) = inherited else {
            let text = self.interns.get(name).to_owned();
            self.error(
                name_loc,
                &format!("Attempt to set non-existent property '{text}' on object '{obj_name}'"),
            );
            return false;
        };
        let value = if let Some((OpKind::MakeObject, _)) = self.graph.as_oper(value_node) {
            self.make_object(value_node, Some(name))
        } else if inherited.flags.contains(AttrFlags::LAZY) {
            // The prototype declared this attribute lazy: store the
            // unevaluated expression.
            self.graph.object_mut(obj).attrs.insert(
                name,
                Attr::Def(AttributeDefinition {
                    value: value_node,
                    ty: inherited.declared_ty.unwrap_or(TYPE_ANY),
                    flags: inherited.flags,
                    loc: name_loc,
                }),
            );
            return true;
        } else {
            let v = self.eval(value_node);
            match inherited.declared_ty {
                Some(ty) => self.coerce(v, ty),
                None => v,
            }
        };
        self.graph.object_mut(obj).set_attr(name, value);
        true
    }

    /// `name ++= value`: concatenates onto an inherited or existing list
    /// attribute. Appending to a non-list is a type error.
    fn append_member(&mut self, obj: ObjectId, name: StringId, value: NodeId, loc: Location) -> bool {
        let existing = self
            .lookup_attribute(obj, name)
            .map(|found| found.value)
            .unwrap_or(NodeId::UNDEFINED);
        let existing = if self.graph.is_undefined(existing) {
            self.graph.list(loc, TYPE_GENERIC_LIST, Vec::new())
        } else {
            existing
        };
        let (NodeKind::List(base), NodeKind::List(extra)) =
            (self.graph.kind(existing).clone(), self.graph.kind(value).clone())
        else {
            let text = self.interns.get(name).to_owned();
            self.error(
                loc,
                &format!("Cannot append to non-list property '{text}'"),
            );
            return false;
        };
        let mut elements = base;
        elements.extend_from_slice(&extra);
        let list = self.graph.list(loc, TYPE_GENERIC_LIST, elements);
        self.graph.object_mut(obj).set_attr(name, list);
        true
    }

    /// `param name [: type] = value` inside an object body.
    fn make_param(&mut self, obj: ObjectId, args: &[NodeId], loc: Location) -> bool {
        let Some(name) = self.graph.as_ident(args[0]) else {
            self.error(loc, "Invalid expression for object property name");
            return false;
        };
        if self.graph.object(obj).own_attr(name).is_some() {
            let text = self.interns.get(name).to_owned();
            let obj_name = self.object_display_name(obj);
            self.error(
                loc,
                &format!("Property '{text}' is already defined on object '{obj_name}'"),
            );
            return false;
        }
        let declared_ty = self.eval_type_expression(args[1]);
        let flags = match *self.graph.kind(args[3]) {
            NodeKind::Integer(bits) => AttrFlags::from_bits(bits as u8),
            _ => AttrFlags::PARAM,
        };
        let mut value = args[2];
        if !flags.contains(AttrFlags::LAZY) {
            value = self.eval(value);
            if let Some(ty) = declared_ty {
                value = self.coerce(value, ty);
            }
        }
        let ty = declared_ty.unwrap_or_else(|| self.graph.ty(value));
        self.graph.object_mut(obj).attrs.insert(
            name,
            Attr::Def(AttributeDefinition {
                value,
                ty,
                flags,
                loc,
            }),
        );
        true
    }

    fn object_display_name(&self, obj: ObjectId) -> String {
        match self.graph.object(obj).name {
            Some(name) => self.interns.get(name).to_owned(),
            None => "<object>".to_owned(),
        }
    }

    // ------------------------------------------------------------------
    // Module realization
    // ------------------------------------------------------------------

    /// Evaluates module-level definitions into the module's attribute table.
    /// Import statements are resolved beforehand by the module loader and
    /// skipped here.
    pub fn eval_module_contents(&mut self, defs: &[NodeId]) -> bool {
        let saved = self.set_scope(ScopeRef::Module(self.module));
        let ok = self.eval_definitions(defs);
        self.scope = saved;
        ok
    }

    fn eval_definitions(&mut self, defs: &[NodeId]) -> bool {
        let mut success = true;
        for &def in defs {
            let Some((op, args)) = self.graph.as_oper(def) else {
                continue;
            };
            let args: Vec<NodeId> = args.to_vec();
            let loc = self.graph.loc(def);
            match op {
                OpKind::SetMember => {
                    if !self.eval_module_property(&args, loc) {
                        success = false;
                    }
                }
                OpKind::MakeOption => {
                    if !self.eval_module_option(&args, loc) {
                        success = false;
                    }
                }
                OpKind::MakeAction => {
                    let action = args[0];
                    self.graph.module_mut(self.module).actions.push(action);
                }
                OpKind::If => {
                    let test = self.eval(args[0]);
                    let t = self.truth_value(test, loc);
                    let branch = if t {
                        Some(args[1])
                    } else {
                        args.get(2).copied()
                    };
                    if let Some(branch) = branch {
                        let branch_defs = match self.graph.kind(branch) {
                            NodeKind::List(defs) => defs.clone(),
                            _ => Vec::new(),
                        };
                        if !self.eval_definitions(&branch_defs) {
                            success = false;
                        }
                    }
                }
                OpKind::Import | OpKind::ImportAs | OpKind::ImportFrom | OpKind::ImportAll => {}
                _ => {
                    self.error(loc, "Invalid expression for module property");
                    success = false;
                }
            }
            self.diags.recovered();
        }
        success
    }

    fn eval_module_property(&mut self, args: &[NodeId], loc: Location) -> bool {
        let Some(name) = self.graph.as_ident(args[0]) else {
            self.error(loc, "Invalid expression for module property name");
            return false;
        };
        if !self.check_module_property_undefined(name, loc) {
            return false;
        }
        let value_node = args[1];
        let value = if let Some((OpKind::MakeObject, _)) = self.graph.as_oper(value_node) {
            self.make_object(value_node, Some(name))
        } else {
            self.eval(value_node)
        };
        self.graph.module_mut(self.module).set_attr(name, value);
        true
    }

    fn eval_module_option(&mut self, args: &[NodeId], loc: Location) -> bool {
        let Some(name) = self.graph.as_ident(args[0]) else {
            self.error(loc, "Invalid option name");
            return false;
        };
        if !self.check_module_property_undefined(name, loc) {
            return false;
        }
        let declared_ty = self.eval_type_expression(args[1]).unwrap_or(TYPE_ANY);

        // An option derives from the builtin option prototype. Unlike
        // regular objects, options do not open their own scope.
        let mut object = Object::new(loc, Some(self.fundamentals.option_proto));
        object.module = Some(self.module);
        object.name = Some(name);
        let obj = self.graph.new_object(loc, object, TYPE_OBJECT);

        let names = *self.interns.names();
        let name_str = self.graph.string(loc, name);
        self.graph.object_mut(obj).set_attr(names.name, name_str);
        // The settable value, typed by the option declaration.
        self.graph.object_mut(obj).attrs.insert(
            names.value,
            Attr::Def(AttributeDefinition {
                value: NodeId::UNDEFINED,
                ty: declared_ty,
                flags: AttrFlags::PARAM.union(AttrFlags::CACHED),
                loc,
            }),
        );

        for &entry in &args[2..] {
            let Some((OpKind::SetMember, entry_args)) = self.graph.as_oper(entry) else {
                continue;
            };
            let (key_node, value_node) = (entry_args[0], entry_args[1]);
            let Some(key) = self.graph.as_ident(key_node) else {
                self.error(self.graph.loc(key_node), "Invalid option property name");
                continue;
            };
            if key == names.default {
                // The default varies in type with the option declaration.
                let v = self.eval(value_node);
                let v = self.coerce(v, declared_ty);
                self.graph.object_mut(obj).set_attr(names.default, v);
            } else if !self.set_object_property(obj, key, value_node) {
                return false;
            }
        }
        let value = self.graph.object(obj).node();
        self.graph.module_mut(self.module).set_attr(name, value);
        true
    }

    fn check_module_property_undefined(&mut self, name: StringId, loc: Location) -> bool {
        if self.graph.module(self.module).own_attr(name).is_some() {
            let text = self.interns.get(name).to_owned();
            self.error(
                loc,
                &format!("Property '{text}' is already defined in this module"),
            );
            return false;
        }
        true
    }

    // ------------------------------------------------------------------
    // Types and coercion
    // ------------------------------------------------------------------

    /// Evaluates a type expression to a [`TypeId`]. Returns `None` for an
    /// `undefined` placeholder (no declared type).
    pub fn eval_type_expression(&mut self, node: NodeId) -> Option<TypeId> {
        match self.graph.kind(node).clone() {
            NodeKind::Undefined => None,
            NodeKind::TypeName(ty) => Some(ty),
            NodeKind::Oper(OpKind::GetElement, args) => {
                let loc = self.graph.loc(node);
                self.eval_type_expression_parts(args[0], &args[1..], loc)
            }
            _ => {
                let shown = self.display(node);
                self.error(
                    self.graph.loc(node),
                    &format!("'{shown}' is not a type name"),
                );
                None
            }
        }
    }

    fn eval_type_expression_parts(
        &mut self,
        base: NodeId,
        params: &[NodeId],
        loc: Location,
    ) -> Option<TypeId> {
        let base_ty = self.eval_type_expression(base)?;
        match self.types.kind(base_ty) {
            TypeKind::List => {
                if params.len() != 1 {
                    self.error(loc, "Incorrect number of type parameters for list type");
                    return None;
                }
                let param = self.eval_type_expression(params[0])?;
                Some(self.types.list_of(param))
            }
            TypeKind::Dictionary => {
                if params.len() != 2 {
                    self.error(loc, "Incorrect number of type parameters for dict type");
                    return None;
                }
                let key = self.eval_type_expression(params[0])?;
                let value = self.eval_type_expression(params[1])?;
                Some(self.types.dict_of(key, value))
            }
            _ => {
                self.error(loc, "Type does not take parameters");
                None
            }
        }
    }

    /// Coerces a constant value to a target type. Identity for matching
    /// types; int/float convert; `any` accepts everything; incompatible
    /// combinations report an error and return the node unchanged.
    pub fn coerce(&mut self, n: NodeId, ty: TypeId) -> NodeId {
        if self.graph.ty(n) == ty {
            return n;
        }
        let loc = self.graph.loc(n);
        match self.types.kind(ty) {
            TypeKind::Any => return n,
            TypeKind::Undefined => return n,
            TypeKind::Integer => {
                if let NodeKind::Float(f) = *self.graph.kind(n) {
                    return self.graph.integer(loc, f as i64);
                }
                if matches!(self.graph.kind(n), NodeKind::Integer(_)) {
                    return n;
                }
            }
            TypeKind::Float => {
                if let NodeKind::Integer(i) = *self.graph.kind(n) {
                    return self.graph.float(loc, i as f64);
                }
                if matches!(self.graph.kind(n), NodeKind::Float(_)) {
                    return n;
                }
            }
            TypeKind::Bool => {
                if matches!(self.graph.kind(n), NodeKind::Bool(_)) {
                    return n;
                }
            }
            TypeKind::String => {
                if matches!(self.graph.kind(n), NodeKind::Str(_)) {
                    return n;
                }
            }
            TypeKind::List => {
                if matches!(self.graph.kind(n), NodeKind::List(_)) {
                    return n;
                }
            }
            TypeKind::Dictionary => {
                if matches!(self.graph.kind(n), NodeKind::Dict(_)) {
                    return n;
                }
            }
            TypeKind::Object => {
                if matches!(self.graph.kind(n), NodeKind::Object(_) | NodeKind::Dict(_)) {
                    return n;
                }
            }
            _ => {}
        }
        if self.graph.is_undefined(n) {
            // Unset values pass through coercion so optional parameters can
            // stay undefined.
            return n;
        }
        let src = self.types.display(self.graph.ty(n));
        let dst = self.types.display(ty);
        self.error(loc, &format!("Cannot coerce value of type {src} to {dst}"));
        n
    }

    // ------------------------------------------------------------------
    // Attribute access helpers (used by the target finder and jobs)
    // ------------------------------------------------------------------

    /// Realizes `obj` and returns the fully evaluated value of `name`,
    /// evaluating lazy attributes in the object's own scope.
    pub fn attribute_value(&mut self, obj: ObjectId, name: StringId) -> NodeId {
        if self.graph.object(obj).definition.is_some() {
            self.eval_object_contents(obj);
        }
        let Some(found) = self.lookup_attribute(obj, name) else {
            return NodeId::UNDEFINED;
        };
        let saved = self.set_scope(ScopeRef::Object(obj));
        let value = self.eval(found.value);
        self.scope = saved;
        value
    }

    /// Like [`Self::attribute_value`], returning list elements (or empty).
    pub fn attribute_value_as_list(&mut self, obj: ObjectId, name: StringId) -> Vec<NodeId> {
        let value = self.attribute_value(obj, name);
        match self.graph.kind(value) {
            NodeKind::List(elements) => elements.clone(),
            NodeKind::Undefined => Vec::new(),
            _ => {
                let text = self.interns.get(name).to_owned();
                let loc = self.graph.loc(value);
                self.error(loc, &format!("Expected list value for '{text}'"));
                Vec::new()
            }
        }
    }

    pub fn attribute_value_as_bool(&mut self, obj: ObjectId, name: StringId) -> bool {
        let value = self.attribute_value(obj, name);
        matches!(self.graph.kind(value), NodeKind::Bool(true))
    }

    pub fn attribute_value_as_string(&mut self, obj: ObjectId, name: StringId) -> Option<String> {
        let value = self.attribute_value(obj, name);
        self.graph
            .as_str(value)
            .map(|s| self.interns.get(s).to_owned())
    }

    /// Renders a value for messages and string interpolation.
    pub fn display(&self, n: NodeId) -> String {
        crate::graph_writer::display_value(self.graph, self.interns, n)
    }
}
