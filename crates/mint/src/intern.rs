//! String interning.
//!
//! All identifiers and string values in the graph are stored once in an
//! [`Interns`] table and referenced by [`StringId`]. Interning makes
//! attribute lookup an integer comparison and keeps [`crate::graph::Node`]
//! small. The attribute names the evaluator and target finder consult on
//! every target are pre-seeded so components can refer to them without a
//! lookup; see [`WellKnown`].

use ahash::AHashMap;

/// Index into the string interner's storage.
///
/// Uses `u32` to save space; ~4 billion unique strings is more than enough
/// for any build configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(u32);

impl StringId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Pre-interned names used by the evaluator, target finder, and option
/// machinery.
#[derive(Debug, Clone, Copy)]
pub struct WellKnown {
    pub empty: StringId,
    pub name: StringId,
    pub help: StringId,
    pub abbrev: StringId,
    pub value: StringId,
    pub default: StringId,
    pub sources: StringId,
    pub outputs: StringId,
    pub depends: StringId,
    pub implicit_depends: StringId,
    pub actions: StringId,
    pub source_dir: StringId,
    pub output_dir: StringId,
    pub exclude_from_all: StringId,
    pub source_only: StringId,
    pub internal: StringId,
    pub status: StringId,
    pub object: StringId,
    pub target: StringId,
    pub option: StringId,
    pub fundamentals: StringId,
    pub prototype: StringId,
    pub map: StringId,
    pub filter: StringId,
    pub pattern: StringId,
    pub message: StringId,
}

/// Interning table mapping [`StringId`] to string content and back.
#[derive(Debug)]
pub struct Interns {
    strings: Vec<Box<str>>,
    lookup: AHashMap<Box<str>, StringId>,
    names: WellKnown,
}

impl Default for Interns {
    fn default() -> Self {
        Self::new()
    }
}

impl Interns {
    #[must_use]
    pub fn new() -> Self {
        let mut table = Self {
            strings: Vec::new(),
            lookup: AHashMap::new(),
            names: WellKnown {
                empty: StringId(0),
                name: StringId(0),
                help: StringId(0),
                abbrev: StringId(0),
                value: StringId(0),
                default: StringId(0),
                sources: StringId(0),
                outputs: StringId(0),
                depends: StringId(0),
                implicit_depends: StringId(0),
                actions: StringId(0),
                source_dir: StringId(0),
                output_dir: StringId(0),
                exclude_from_all: StringId(0),
                source_only: StringId(0),
                internal: StringId(0),
                status: StringId(0),
                object: StringId(0),
                target: StringId(0),
                option: StringId(0),
                fundamentals: StringId(0),
                prototype: StringId(0),
                map: StringId(0),
                filter: StringId(0),
                pattern: StringId(0),
                message: StringId(0),
            },
        };
        table.names = WellKnown {
            empty: table.intern(""),
            name: table.intern("name"),
            help: table.intern("help"),
            abbrev: table.intern("abbrev"),
            value: table.intern("value"),
            default: table.intern("default"),
            sources: table.intern("sources"),
            outputs: table.intern("outputs"),
            depends: table.intern("depends"),
            implicit_depends: table.intern("implicit_depends"),
            actions: table.intern("actions"),
            source_dir: table.intern("source_dir"),
            output_dir: table.intern("output_dir"),
            exclude_from_all: table.intern("exclude_from_all"),
            source_only: table.intern("source_only"),
            internal: table.intern("internal"),
            status: table.intern("status"),
            object: table.intern("object"),
            target: table.intern("target"),
            option: table.intern("option"),
            fundamentals: table.intern("fundamentals"),
            prototype: table.intern("prototype"),
            map: table.intern("map"),
            filter: table.intern("filter"),
            pattern: table.intern("pattern"),
            message: table.intern("message"),
        };
        table
    }

    /// Interns a string, returning the existing id if it was seen before.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.lookup.get(s) {
            return id;
        }
        let id = StringId(u32::try_from(self.strings.len()).expect("interner full"));
        let boxed: Box<str> = s.into();
        self.strings.push(boxed.clone());
        self.lookup.insert(boxed, id);
        id
    }

    pub fn get(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    /// Returns the id of an already-interned string, if any.
    pub fn find(&self, s: &str) -> Option<StringId> {
        self.lookup.get(s).copied()
    }

    pub fn names(&self) -> &WellKnown {
        &self.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut interns = Interns::new();
        let a = interns.intern("sources");
        let b = interns.intern("sources");
        assert_eq!(a, b);
        assert_eq!(a, interns.names().sources);
        assert_eq!(interns.get(a), "sources");
    }

    #[test]
    fn distinct_strings_get_distinct_ids() {
        let mut interns = Interns::new();
        let a = interns.intern("alpha");
        let b = interns.intern("beta");
        assert_ne!(a, b);
        assert_eq!(interns.find("alpha"), Some(a));
        assert_eq!(interns.find("gamma"), None);
    }
}
