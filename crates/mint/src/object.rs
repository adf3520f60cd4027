//! Prototype-based objects and attribute definitions.
//!
//! An [`Object`] is a record of named attributes plus an optional prototype
//! it inherits attribute definitions from. Dictionaries share this
//! representation. Attribute tables preserve insertion order so generated
//! output is reproducible.

use indexmap::IndexMap;

use crate::{graph::NodeId, intern::StringId, module::ModuleId, source::Location, types::TypeId};

/// Index of an [`Object`] within the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(u32);

impl ObjectId {
    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("object id out of range"))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A lexical scope reference: either an object or a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeRef {
    Object(ObjectId),
    Module(ModuleId),
}

/// Attribute definition flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttrFlags(u8);

impl AttrFlags {
    pub const NONE: Self = Self(0);
    /// Value is an expression re-evaluated on each access.
    pub const LAZY: Self = Self(1);
    /// Value persists across invocations via the build configuration.
    pub const CACHED: Self = Self(2);
    /// Value must appear in generated output.
    pub const EXPORT: Self = Self(4);
    /// User-settable parameter.
    pub const PARAM: Self = Self(8);

    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// A declared attribute: default value, declared type, and flags.
#[derive(Debug, Clone)]
pub struct AttributeDefinition {
    pub value: NodeId,
    pub ty: TypeId,
    pub flags: AttrFlags,
    pub loc: Location,
}

impl AttributeDefinition {
    pub fn lazy(&self) -> bool {
        self.flags.contains(AttrFlags::LAZY)
    }

    pub fn cached(&self) -> bool {
        self.flags.contains(AttrFlags::CACHED)
    }

    pub fn exported(&self) -> bool {
        self.flags.contains(AttrFlags::EXPORT)
    }
}

/// An entry in an attribute table: either a plain value or a declared
/// definition.
#[derive(Debug, Clone)]
pub enum Attr {
    Value(NodeId),
    Def(AttributeDefinition),
}

impl Attr {
    /// The stored node, whether value or definition default.
    pub fn node(&self) -> NodeId {
        match self {
            Self::Value(n) => *n,
            Self::Def(def) => def.value,
        }
    }
}

/// Result of an attribute lookup along the prototype chain.
#[derive(Debug, Clone, Copy)]
pub struct AttributeLookup {
    /// The value node (a definition's current value for declared attributes).
    pub value: NodeId,
    /// Declared type, when the attribute has a definition.
    pub declared_ty: Option<TypeId>,
    /// Flags, when the attribute has a definition.
    pub flags: AttrFlags,
    /// The object the entry was found on.
    pub found_on: ObjectId,
}

/// A prototype-based record.
#[derive(Debug)]
pub struct Object {
    pub prototype: Option<ObjectId>,
    pub name: Option<StringId>,
    pub parent_scope: Option<ScopeRef>,
    /// Module the object was defined in, used to resolve relative paths.
    pub module: Option<ModuleId>,
    pub attrs: IndexMap<StringId, Attr>,
    /// The unevaluated `MakeObject` body; `Some` until the object is
    /// realized, then cleared. Realization is idempotent.
    pub definition: Option<NodeId>,
    pub loc: Location,
    /// The wrapper node representing this object as a value.
    pub(crate) self_node: NodeId,
}

impl Object {
    #[must_use]
    pub fn new(loc: Location, prototype: Option<ObjectId>) -> Self {
        Self {
            prototype,
            name: None,
            parent_scope: None,
            module: None,
            attrs: IndexMap::new(),
            definition: None,
            loc,
            self_node: NodeId::UNDEFINED,
        }
    }

    /// The node representing this object as a value.
    pub fn node(&self) -> NodeId {
        self.self_node
    }

    /// Looks up an attribute on this object only (no prototype walk).
    pub fn own_attr(&self, name: StringId) -> Option<&Attr> {
        self.attrs.get(&name)
    }

    /// Defines a declared attribute with a default value.
    pub fn define_attribute(
        &mut self,
        name: StringId,
        value: NodeId,
        ty: TypeId,
        flags: AttrFlags,
    ) {
        self.attrs.insert(
            name,
            Attr::Def(AttributeDefinition {
                value,
                ty,
                flags,
                loc: Location::NONE,
            }),
        );
    }

    /// Stores a plain attribute value.
    pub fn set_attr(&mut self, name: StringId, value: NodeId) {
        self.attrs.insert(name, Attr::Value(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_compose() {
        let f = AttrFlags::LAZY.union(AttrFlags::EXPORT);
        assert!(f.contains(AttrFlags::LAZY));
        assert!(f.contains(AttrFlags::EXPORT));
        assert!(!f.contains(AttrFlags::CACHED));
        assert_eq!(AttrFlags::from_bits(f.bits()), f);
    }

    #[test]
    fn attrs_preserve_insertion_order() {
        let mut interns = crate::intern::Interns::new();
        let z = interns.intern("zzz");
        let a = interns.intern("aaa");
        let mut obj = Object::new(Location::NONE, None);
        obj.set_attr(z, NodeId::UNDEFINED);
        obj.set_attr(a, NodeId::UNDEFINED);
        let keys: Vec<StringId> = obj.attrs.keys().copied().collect();
        assert_eq!(keys, vec![z, a], "iteration must follow insertion order");
    }
}
