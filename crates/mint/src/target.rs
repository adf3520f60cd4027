//! Build targets and files.
//!
//! Targets and files live in the [`crate::target_mgr::TargetMgr`] arena and
//! reference each other by handle, so the bidirectional dependency edges
//! carry no ownership.

use std::time::SystemTime;

use strum::Display;

use crate::{object::ObjectId, source::Location};

/// Index of a [`Target`] within the target manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(u32);

impl TargetId {
    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("target id out of range"))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a [`File`] within the target manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(u32);

impl FileId {
    pub(crate) fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("file id out of range"))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Build state machine for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetState {
    /// Not yet initialized.
    Uninit,
    /// Being initialized (searching for dependencies).
    Initializing,
    /// Initialized, up-to-date status unknown.
    Initialized,
    /// Up-to-date check in progress; revisiting a target in this state means
    /// a dependency cycle.
    CheckingState,
    /// Needs rebuild, waiting on dependencies.
    Waiting,
    /// Needs rebuild, all dependencies satisfied.
    Ready,
    /// Ready and present in the ready queue.
    ReadyInQueue,
    /// Being built.
    Building,
    /// Up to date or successfully built.
    Finished,
    /// Failed; cannot continue.
    Error,
}

/// A build target.
#[derive(Debug)]
pub struct Target {
    pub definition: ObjectId,
    pub state: TargetState,
    /// Target name from the module namespace; `None` for anonymous targets.
    pub path: Option<String>,
    /// Queue ordering key: the path, or the first source file's path.
    pub sort_key: String,
    pub loc: Location,
    pub depends: Vec<TargetId>,
    pub dependents: Vec<TargetId>,
    pub sources: Vec<FileId>,
    pub outputs: Vec<FileId>,
    pub exclude_from_all: bool,
    pub source_only: bool,
    pub internal: bool,
}

impl Target {
    #[must_use]
    pub fn new(definition: ObjectId, loc: Location) -> Self {
        Self {
            definition,
            state: TargetState::Uninit,
            path: None,
            sort_key: String::new(),
            loc,
            depends: Vec::new(),
            dependents: Vec::new(),
            sources: Vec::new(),
            outputs: Vec::new(),
            exclude_from_all: false,
            source_only: false,
            internal: false,
        }
    }
}

/// Filesystem status snapshot for a [`File`].
#[derive(Debug, Clone, Copy)]
pub struct FileStatus {
    pub exists: bool,
    pub size: u64,
    pub last_modified: SystemTime,
}

/// A filesystem entry referenced as a source or output of targets.
#[derive(Debug)]
pub struct File {
    /// Absolute path.
    pub name: String,
    pub status: Option<FileStatus>,
    pub status_checked: bool,
    pub status_valid: bool,
    pub source_for: Vec<TargetId>,
    pub output_of: Vec<TargetId>,
}

impl File {
    #[must_use]
    pub fn new(name: String) -> Self {
        Self {
            name,
            status: None,
            status_checked: false,
            status_valid: false,
            source_for: Vec::new(),
            output_of: Vec::new(),
        }
    }

    pub fn exists(&self) -> bool {
        self.status.map(|s| s.exists).unwrap_or(false)
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        self.status.filter(|s| s.exists).map(|s| s.last_modified)
    }
}
