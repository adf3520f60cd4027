//! Modules: top-level lexical scopes.
//!
//! A module's attribute table holds its top-level bindings in definition
//! order. Unresolved identifiers fall through to the module's import scopes
//! (searched last-imported-first) and finally to the fundamentals root.

use indexmap::IndexMap;

use crate::{graph::NodeId, intern::StringId, source::BufferId};

/// Index of a [`Module`] within the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(u32);

impl ModuleId {
    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("module id out of range"))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a project within the build configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProjectId(u32);

impl ProjectId {
    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("project id out of range"))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A loaded module.
#[derive(Debug)]
pub struct Module {
    /// Module name, relative to the project's source root.
    pub name: StringId,
    /// Absolute directory containing the module's sources.
    pub source_dir: String,
    /// Absolute directory where the module's outputs are placed.
    pub build_dir: String,
    /// Top-level bindings, in definition order.
    pub attrs: IndexMap<StringId, NodeId>,
    /// Import scopes searched for unresolved identifiers; later imports win.
    pub imports: Vec<ModuleId>,
    /// Deferred `do` actions, run at configuration time in source order.
    pub actions: Vec<NodeId>,
    /// The source buffer this module was parsed from.
    pub buffer: Option<BufferId>,
    /// Owning project, when loaded through one.
    pub project: Option<ProjectId>,
    /// The wrapper node representing this module as a value.
    pub(crate) self_node: NodeId,
}

impl Module {
    #[must_use]
    pub fn new(name: StringId, source_dir: String, build_dir: String) -> Self {
        Self {
            name,
            source_dir,
            build_dir,
            attrs: IndexMap::new(),
            imports: Vec::new(),
            actions: Vec::new(),
            buffer: None,
            project: None,
            self_node: NodeId::UNDEFINED,
        }
    }

    /// The node representing this module as a value.
    pub fn node(&self) -> NodeId {
        self.self_node
    }

    /// Looks up a binding defined directly in this module.
    pub fn own_attr(&self, name: StringId) -> Option<NodeId> {
        self.attrs.get(&name).copied()
    }

    pub fn set_attr(&mut self, name: StringId, value: NodeId) {
        self.attrs.insert(name, value);
    }
}
