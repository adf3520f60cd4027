//! Mint: a declarative build-configuration language and build runner.
//!
//! A project describes its targets in `module.mint` files; this library
//! lexes, parses, and evaluates them, resolves user-settable options,
//! assembles the dependency graph over targets and files, and either runs
//! the build actions through a bounded job pool or emits a Makefile. The
//! evaluated configuration is cached into the build directory as
//! `build.mint` so later invocations can adjust options without starting
//! over.

mod build_config;
mod diagnostics;
mod evaluator;
mod function;
pub mod fundamentals;
mod graph;
mod graph_writer;
mod intern;
mod intrinsics;
mod jobs;
mod lexer;
mod makefile;
mod module;
mod module_loader;
mod object;
mod parser;
pub mod paths;
mod process;
mod project;
mod source;
mod target;
mod target_finder;
mod target_mgr;
mod tokens;
mod types;

pub use crate::{
    build_config::{BuildConfiguration, CONFIG_FILE, init_build_dir},
    diagnostics::{Diagnostics, Severity},
    evaluator::{Evaluator, Fundamentals},
    function::{Function, FunctionId, Handler, NativeFn},
    graph::{Graph, Node, NodeId, NodeKind, OpKind},
    graph_writer::{display_value, write_expr, write_quoted, write_value},
    intern::{Interns, StringId},
    jobs::{Action, JobMgr},
    lexer::{LexError, Lexer},
    module::{Module, ModuleId, ProjectId},
    module_loader::ModuleLoader,
    object::{Attr, AttrFlags, AttributeDefinition, AttributeLookup, Object, ObjectId, ScopeRef},
    parser::Parser,
    process::{CapturedOutput, OutputSink, ProcessExit, StreamBuffer},
    project::{Project, parse_option_literal, set_option_value},
    source::{BufferId, LineCol, Location, SourceMap, TextBuffer},
    target::{File, FileId, FileStatus, Target, TargetId, TargetState},
    target_finder::TargetFinder,
    target_mgr::TargetMgr,
    tokens::{Token, lookup_keyword},
    types::{
        TYPE_ANY, TYPE_BOOL, TYPE_FLOAT, TYPE_GENERIC_DICT, TYPE_GENERIC_LIST, TYPE_INTEGER,
        TYPE_MODULE, TYPE_OBJECT, TYPE_PROJECT, TYPE_STRING, TYPE_UNDEFINED, TYPE_VOID, TypeDef,
        TypeId, TypeKind, TypeRegistry,
    },
};
