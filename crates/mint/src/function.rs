//! Function values: native intrinsics and interpreted lambdas.

use crate::{
    evaluator::Evaluator, graph::NodeId, intern::StringId, object::ScopeRef, source::Location,
    types::TypeId,
};

/// Index of a [`Function`] within the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(u32);

impl FunctionId {
    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("function id out of range"))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Signature of a native intrinsic handler.
///
/// Receives the call location, the receiver (`self`) value when invoked as a
/// method, and the already-evaluated argument nodes. Returns the result node;
/// errors are reported through the evaluator's diagnostics and surface as
/// `undefined`.
pub type NativeFn = fn(&mut Evaluator<'_>, Location, Option<NodeId>, &[NodeId]) -> NodeId;

/// How a function executes when called.
pub enum Handler {
    Native(NativeFn),
    /// A `params => body` lambda closing over its defining scope.
    Lambda {
        params: Vec<StringId>,
        body: NodeId,
        scope: Option<ScopeRef>,
    },
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native(_) => f.write_str("Native(..)"),
            Self::Lambda { params, .. } => f.debug_struct("Lambda").field("params", params).finish(),
        }
    }
}

/// A callable value.
#[derive(Debug)]
pub struct Function {
    pub name: Option<StringId>,
    /// Function type; return type first among the parameters.
    pub ty: TypeId,
    pub handler: Handler,
}

impl Function {
    #[must_use]
    pub fn native(name: Option<StringId>, ty: TypeId, handler: NativeFn) -> Self {
        Self {
            name,
            ty,
            handler: Handler::Native(handler),
        }
    }

    /// The declared return type (first parameter of the function type).
    pub fn return_type(&self, types: &crate::types::TypeRegistry) -> TypeId {
        types
            .get(self.ty)
            .params
            .first()
            .copied()
            .unwrap_or(crate::types::TYPE_UNDEFINED)
    }
}
