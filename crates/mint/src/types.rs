//! The type registry.
//!
//! Primitive types are pre-seeded singletons; derived types (`list[T]`,
//! `dict[K, V]`, function signatures) are interned by structural key, so two
//! structurally equal derived types always share one [`TypeId`].

use ahash::AHashMap;
use strum::{Display, IntoStaticStr};

/// Index into the [`TypeRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(u32);

impl TypeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The closed set of type kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum TypeKind {
    Void,
    Any,
    Bool,
    Integer,
    Float,
    String,
    List,
    Dictionary,
    Object,
    Function,
    Module,
    Project,
    Undefined,
}

/// One type: a kind plus parameters for derived kinds.
///
/// For functions the return type comes first, followed by parameter types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    pub kind: TypeKind,
    pub params: Vec<TypeId>,
}

#[derive(Debug)]
pub struct TypeRegistry {
    types: Vec<TypeDef>,
    derived: AHashMap<(TypeKind, Vec<TypeId>), TypeId>,
}

/// Pre-seeded singleton ids, in registration order.
pub const TYPE_VOID: TypeId = TypeId(0);
pub const TYPE_ANY: TypeId = TypeId(1);
pub const TYPE_BOOL: TypeId = TypeId(2);
pub const TYPE_INTEGER: TypeId = TypeId(3);
pub const TYPE_FLOAT: TypeId = TypeId(4);
pub const TYPE_STRING: TypeId = TypeId(5);
pub const TYPE_GENERIC_LIST: TypeId = TypeId(6);
pub const TYPE_GENERIC_DICT: TypeId = TypeId(7);
pub const TYPE_OBJECT: TypeId = TypeId(8);
pub const TYPE_MODULE: TypeId = TypeId(9);
pub const TYPE_PROJECT: TypeId = TypeId(10);
pub const TYPE_UNDEFINED: TypeId = TypeId(11);

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        let singleton = |kind| TypeDef {
            kind,
            params: Vec::new(),
        };
        Self {
            types: vec![
                singleton(TypeKind::Void),
                singleton(TypeKind::Any),
                singleton(TypeKind::Bool),
                singleton(TypeKind::Integer),
                singleton(TypeKind::Float),
                singleton(TypeKind::String),
                singleton(TypeKind::List),
                singleton(TypeKind::Dictionary),
                singleton(TypeKind::Object),
                singleton(TypeKind::Module),
                singleton(TypeKind::Project),
                singleton(TypeKind::Undefined),
            ],
            derived: AHashMap::new(),
        }
    }

    pub fn get(&self, id: TypeId) -> &TypeDef {
        &self.types[id.index()]
    }

    pub fn kind(&self, id: TypeId) -> TypeKind {
        self.types[id.index()].kind
    }

    /// Interns a derived type. Equal `(kind, params)` keys always return the
    /// same id.
    pub fn derived(&mut self, kind: TypeKind, params: Vec<TypeId>) -> TypeId {
        if let Some(&id) = self.derived.get(&(kind, params.clone())) {
            return id;
        }
        let id = TypeId(u32::try_from(self.types.len()).expect("type registry full"));
        self.types.push(TypeDef {
            kind,
            params: params.clone(),
        });
        self.derived.insert((kind, params), id);
        id
    }

    /// `list[element]`
    pub fn list_of(&mut self, element: TypeId) -> TypeId {
        self.derived(TypeKind::List, vec![element])
    }

    /// `dict[key, value]`
    pub fn dict_of(&mut self, key: TypeId, value: TypeId) -> TypeId {
        self.derived(TypeKind::Dictionary, vec![key, value])
    }

    /// Function type; `ret` first, then parameter types.
    pub fn function(&mut self, ret: TypeId, params: &[TypeId]) -> TypeId {
        let mut all = Vec::with_capacity(params.len() + 1);
        all.push(ret);
        all.extend_from_slice(params);
        self.derived(TypeKind::Function, all)
    }

    /// Renders a type for diagnostics and option help.
    pub fn display(&self, id: TypeId) -> String {
        let def = self.get(id);
        match def.kind {
            TypeKind::List if !def.params.is_empty() => {
                format!("list[{}]", self.display(def.params[0]))
            }
            TypeKind::Dictionary if def.params.len() == 2 => format!(
                "dict[{}, {}]",
                self.display(def.params[0]),
                self.display(def.params[1])
            ),
            TypeKind::Function => {
                let mut s = String::from("fn (");
                for (i, p) in def.params.iter().skip(1).enumerate() {
                    if i > 0 {
                        s.push_str(", ");
                    }
                    s.push_str(&self.display(*p));
                }
                s.push_str(") -> ");
                s.push_str(&self.display(def.params[0]));
                s
            }
            TypeKind::Integer => "int".to_owned(),
            kind => kind.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_types_are_interned() {
        let mut reg = TypeRegistry::new();
        let a = reg.list_of(TYPE_STRING);
        let b = reg.list_of(TYPE_STRING);
        assert_eq!(a, b, "equal structural keys must yield identical ids");
        let c = reg.list_of(TYPE_INTEGER);
        assert_ne!(a, c);
    }

    #[test]
    fn function_types_put_return_first() {
        let mut reg = TypeRegistry::new();
        let f = reg.function(TYPE_BOOL, &[TYPE_STRING, TYPE_INTEGER]);
        let def = reg.get(f).clone();
        assert_eq!(def.kind, TypeKind::Function);
        assert_eq!(def.params, vec![TYPE_BOOL, TYPE_STRING, TYPE_INTEGER]);
    }

    #[test]
    fn display_renders_nested_types() {
        let mut reg = TypeRegistry::new();
        let l = reg.list_of(TYPE_STRING);
        assert_eq!(reg.display(l), "list[string]");
        let d = reg.dict_of(TYPE_STRING, TYPE_INTEGER);
        assert_eq!(reg.display(d), "dict[string, int]");
    }
}
