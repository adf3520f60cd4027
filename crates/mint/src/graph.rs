//! The node graph: AST and value representation.
//!
//! Every value the language produces is a [`Node`]; interior (unevaluated)
//! expressions are the [`NodeKind::Oper`] variant. Nodes, objects, modules,
//! and functions are all owned by one [`Graph`] arena and referenced by
//! `u32` handles, which keeps the representation compact and sidesteps
//! ownership cycles between prototypes, scopes, and definitions.

use smallvec::SmallVec;
use strum::IntoStaticStr;

use crate::{
    function::{Function, FunctionId},
    intern::StringId,
    module::{Module, ModuleId},
    object::{Object, ObjectId},
    source::Location,
    types::{TYPE_BOOL, TYPE_FLOAT, TYPE_INTEGER, TYPE_STRING, TYPE_UNDEFINED, TypeId},
};

/// Index of a [`Node`] within the [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    /// The shared `undefined` singleton, allocated first in every graph.
    pub const UNDEFINED: Self = Self(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Operator kinds for interior AST nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OpKind {
    // Unary
    Negate,
    Not,

    // Binary arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
    Concat,

    // Comparisons
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,

    // Logical / membership
    And,
    Or,
    In,
    NotIn,

    // Access and application
    GetMember,
    GetElement,
    Call,

    // Constructors
    MakeList,
    MakeTuple,
    MakeDict,
    MakeObject,
    MakeModule,
    MakeDeferred,
    MakeParam,
    MakeOption,
    MakeAction,
    MakeCached,

    // Statements
    Do,
    Let,
    If,

    // Imports
    Import,
    ImportAs,
    ImportFrom,
    ImportAll,

    // Attribute assignment inside object/dict literals
    SetMember,
    AppendMember,

    // Lambda literal (`params => body`)
    MapsTo,

    // Scope references
    SelfRef,
    SuperRef,

    // Build configuration file entry
    Project,
}

/// The tagged node sum. Literal variants evaluate to themselves.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Undefined,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Str(StringId),
    Ident(StringId),
    TypeName(TypeId),
    List(Vec<NodeId>),
    Dict(ObjectId),
    Object(ObjectId),
    Module(ModuleId),
    Function(FunctionId),
    Oper(OpKind, SmallVec<[NodeId; 2]>),
}

/// A node: kind plus the common `(location, type)` header.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub loc: Location,
    pub ty: TypeId,
}

/// The arena owning all nodes, objects, modules, and functions for one
/// invocation. Handles are never invalidated; nothing is reclaimed until the
/// whole graph is dropped.
#[derive(Debug)]
pub struct Graph {
    nodes: Vec<Node>,
    objects: Vec<Object>,
    modules: Vec<Module>,
    functions: Vec<Function>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Undefined,
                loc: Location::NONE,
                ty: TYPE_UNDEFINED,
            }],
            objects: Vec::new(),
            modules: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.index()].kind
    }

    pub fn loc(&self, id: NodeId) -> Location {
        self.nodes[id.index()].loc
    }

    pub fn ty(&self, id: NodeId) -> TypeId {
        self.nodes[id.index()].ty
    }

    pub fn alloc(&mut self, kind: NodeKind, loc: Location, ty: TypeId) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).expect("graph full"));
        self.nodes.push(Node { kind, loc, ty });
        id
    }

    // --- literal constructors ---

    pub fn undefined(&self) -> NodeId {
        NodeId::UNDEFINED
    }

    pub fn bool_node(&mut self, loc: Location, value: bool) -> NodeId {
        self.alloc(NodeKind::Bool(value), loc, TYPE_BOOL)
    }

    pub fn integer(&mut self, loc: Location, value: i64) -> NodeId {
        self.alloc(NodeKind::Integer(value), loc, TYPE_INTEGER)
    }

    pub fn float(&mut self, loc: Location, value: f64) -> NodeId {
        self.alloc(NodeKind::Float(value), loc, TYPE_FLOAT)
    }

    pub fn string(&mut self, loc: Location, value: StringId) -> NodeId {
        self.alloc(NodeKind::Str(value), loc, TYPE_STRING)
    }

    pub fn ident(&mut self, loc: Location, name: StringId) -> NodeId {
        self.alloc(NodeKind::Ident(name), loc, TYPE_UNDEFINED)
    }

    pub fn type_name(&mut self, loc: Location, ty: TypeId) -> NodeId {
        self.alloc(NodeKind::TypeName(ty), loc, ty)
    }

    pub fn list(&mut self, loc: Location, ty: TypeId, elements: Vec<NodeId>) -> NodeId {
        self.alloc(NodeKind::List(elements), loc, ty)
    }

    pub fn oper(
        &mut self,
        op: OpKind,
        loc: Location,
        args: impl IntoIterator<Item = NodeId>,
    ) -> NodeId {
        self.alloc(
            NodeKind::Oper(op, args.into_iter().collect()),
            loc,
            TYPE_UNDEFINED,
        )
    }

    /// Returns the operator kind and argument list if `id` is an operator.
    pub fn as_oper(&self, id: NodeId) -> Option<(OpKind, &[NodeId])> {
        match &self.nodes[id.index()].kind {
            NodeKind::Oper(op, args) => Some((*op, args)),
            _ => None,
        }
    }

    /// Returns the identifier's name if `id` is an identifier node.
    pub fn as_ident(&self, id: NodeId) -> Option<StringId> {
        match self.nodes[id.index()].kind {
            NodeKind::Ident(name) => Some(name),
            _ => None,
        }
    }

    /// Returns the string value if `id` is a string node.
    pub fn as_str(&self, id: NodeId) -> Option<StringId> {
        match self.nodes[id.index()].kind {
            NodeKind::Str(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the object handle for object and dict nodes.
    pub fn as_object(&self, id: NodeId) -> Option<ObjectId> {
        match self.nodes[id.index()].kind {
            NodeKind::Object(obj) | NodeKind::Dict(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn is_undefined(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.index()].kind, NodeKind::Undefined)
    }

    // --- objects ---

    pub fn object(&self, id: ObjectId) -> &Object {
        &self.objects[id.index()]
    }

    pub fn object_mut(&mut self, id: ObjectId) -> &mut Object {
        &mut self.objects[id.index()]
    }

    /// Allocates an object together with its wrapper node.
    pub fn new_object(&mut self, loc: Location, object: Object, ty: TypeId) -> ObjectId {
        let id = ObjectId::new(self.objects.len());
        self.objects.push(object);
        let node = self.alloc(NodeKind::Object(id), loc, ty);
        self.objects[id.index()].self_node = node;
        id
    }

    /// Allocates a dictionary, which shares the object representation.
    pub fn new_dict(&mut self, loc: Location, object: Object, ty: TypeId) -> ObjectId {
        let id = ObjectId::new(self.objects.len());
        self.objects.push(object);
        let node = self.alloc(NodeKind::Dict(id), loc, ty);
        self.objects[id.index()].self_node = node;
        id
    }

    /// True if `obj` has `proto` anywhere on its prototype chain (including
    /// itself).
    pub fn inherits_from(&self, obj: ObjectId, proto: ObjectId) -> bool {
        let mut cursor = Some(obj);
        while let Some(id) = cursor {
            if id == proto {
                return true;
            }
            cursor = self.object(id).prototype;
        }
        false
    }

    // --- modules ---

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.index()]
    }

    pub fn module_mut(&mut self, id: ModuleId) -> &mut Module {
        &mut self.modules[id.index()]
    }

    pub fn new_module(&mut self, module: Module, ty: TypeId) -> ModuleId {
        let id = ModuleId::new(self.modules.len());
        self.modules.push(module);
        let node = self.alloc(NodeKind::Module(id), Location::NONE, ty);
        self.modules[id.index()].self_node = node;
        id
    }

    // --- functions ---

    pub fn function(&self, id: FunctionId) -> &Function {
        &self.functions[id.index()]
    }

    pub fn new_function(&mut self, loc: Location, function: Function) -> NodeId {
        let id = FunctionId::new(self.functions.len());
        let ty = function.ty;
        self.functions.push(function);
        self.alloc(NodeKind::Function(id), loc, ty)
    }
}
