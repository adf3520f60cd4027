//! The `Fundamentals` root module: built-in prototypes and intrinsic
//! functions. Every loaded module resolves unqualified names against this
//! scope last.

use crate::{
    evaluator::Fundamentals,
    function::{Function, NativeFn},
    graph::{Graph, NodeId},
    intern::Interns,
    intrinsics,
    module::Module,
    object::{Attr, AttrFlags, Object, ObjectId},
    source::Location,
    types::{
        TYPE_ANY, TYPE_BOOL, TYPE_GENERIC_DICT, TYPE_GENERIC_LIST, TYPE_MODULE, TYPE_OBJECT,
        TYPE_STRING, TYPE_UNDEFINED, TypeId, TypeRegistry,
    },
};

/// Builds the root module and returns handles to it and the builtin
/// prototypes. Called once per invocation, before any module is loaded.
pub fn build(graph: &mut Graph, interns: &mut Interns, types: &mut TypeRegistry) -> Fundamentals {
    let names = *interns.names();
    let root_name = interns.intern("<root>");
    let root = graph.new_module(
        Module::new(root_name, String::new(), String::new()),
        TYPE_MODULE,
    );
    let root_node = graph.module(root).node();
    graph
        .module_mut(root)
        .set_attr(names.fundamentals, root_node);

    // Prototype 'object'.
    let object_proto = {
        let mut obj = Object::new(Location::NONE, None);
        obj.name = Some(names.object);
        let id = graph.new_object(Location::NONE, obj, TYPE_OBJECT);
        let node = graph.object(id).node();
        graph.module_mut(root).set_attr(names.object, node);
        id
    };

    // Prototype 'target'.
    let target_proto = {
        let mut obj = Object::new(Location::NONE, Some(object_proto));
        obj.name = Some(names.target);
        let id = graph.new_object(Location::NONE, obj, TYPE_OBJECT);
        let node = graph.object(id).node();
        graph.module_mut(root).set_attr(names.target, node);
        id
    };
    let string_list = types.list_of(TYPE_STRING);
    let object_list = types.list_of(TYPE_OBJECT);
    let any_list = types.list_of(TYPE_ANY);
    let empty_strings = graph.list(Location::NONE, string_list, Vec::new());
    let empty_targets = graph.list(Location::NONE, object_list, Vec::new());
    let empty_actions = graph.list(Location::NONE, any_list, Vec::new());
    let false_node = graph.bool_node(Location::NONE, false);
    {
        let target = graph.object_mut(target_proto);
        target.define_attribute(names.sources, empty_strings, string_list, AttrFlags::NONE);
        target.define_attribute(
            names.outputs,
            empty_strings,
            string_list,
            AttrFlags::LAZY.union(AttrFlags::EXPORT),
        );
        target.define_attribute(names.depends, empty_targets, object_list, AttrFlags::NONE);
        target.define_attribute(
            names.implicit_depends,
            empty_targets,
            object_list,
            AttrFlags::NONE,
        );
        target.define_attribute(names.actions, empty_actions, any_list, AttrFlags::LAZY);
        target.define_attribute(
            names.source_dir,
            NodeId::UNDEFINED,
            TYPE_STRING,
            AttrFlags::NONE,
        );
        target.define_attribute(
            names.output_dir,
            NodeId::UNDEFINED,
            TYPE_STRING,
            AttrFlags::NONE,
        );
        target.define_attribute(names.exclude_from_all, false_node, TYPE_BOOL, AttrFlags::NONE);
        target.define_attribute(names.source_only, false_node, TYPE_BOOL, AttrFlags::NONE);
        target.define_attribute(names.internal, false_node, TYPE_BOOL, AttrFlags::NONE);
    }

    // Prototype 'option'. Not referenced by name; the `option` keyword uses
    // it directly.
    let option_proto = {
        let mut obj = Object::new(Location::NONE, None);
        obj.name = Some(names.option);
        let id = graph.new_object(Location::NONE, obj, TYPE_OBJECT);
        let option = graph.object_mut(id);
        option.define_attribute(names.name, NodeId::UNDEFINED, TYPE_STRING, AttrFlags::NONE);
        option.define_attribute(names.help, NodeId::UNDEFINED, TYPE_STRING, AttrFlags::NONE);
        option.define_attribute(names.abbrev, NodeId::UNDEFINED, TYPE_STRING, AttrFlags::NONE);
        id
    };

    // Builtin namespaces.
    let console = child_scope(graph, interns, root, "console");
    for (name, handler) in intrinsics::console::METHODS {
        define_method(
            graph,
            interns,
            types,
            console,
            name,
            TYPE_UNDEFINED,
            &[TYPE_ANY],
            *handler,
        );
    }

    let path = child_scope(graph, interns, root, "path");
    define_method(graph, interns, types, path, "add_ext", TYPE_STRING, &[TYPE_STRING, TYPE_STRING], intrinsics::path::add_ext);
    define_method(graph, interns, types, path, "change_ext", TYPE_STRING, &[TYPE_STRING, TYPE_STRING], intrinsics::path::change_ext);
    define_method(graph, interns, types, path, "ext", TYPE_STRING, &[TYPE_STRING], intrinsics::path::ext);
    define_method(graph, interns, types, path, "basename", TYPE_STRING, &[TYPE_STRING], intrinsics::path::basename);
    define_method(graph, interns, types, path, "dirname", TYPE_STRING, &[TYPE_STRING], intrinsics::path::dirname);
    define_method(graph, interns, types, path, "join", TYPE_STRING, &[TYPE_STRING, TYPE_STRING], intrinsics::path::join);

    let file = child_scope(graph, interns, root, "file");
    define_method(graph, interns, types, file, "read", TYPE_STRING, &[TYPE_STRING], intrinsics::file::read);
    define_method(graph, interns, types, file, "write", TYPE_BOOL, &[TYPE_STRING, TYPE_STRING], intrinsics::file::write);
    define_method(graph, interns, types, file, "remove", TYPE_BOOL, &[TYPE_STRING], intrinsics::file::remove);

    let re = child_scope(graph, interns, root, "re");
    define_method(graph, interns, types, re, "compile", TYPE_GENERIC_DICT, &[TYPE_STRING], intrinsics::regex::compile);

    let regex_ns = child_scope(graph, interns, root, "regex");
    define_method(graph, interns, types, regex_ns, "find", TYPE_STRING, &[TYPE_ANY, TYPE_STRING], intrinsics::regex::find);
    define_method(graph, interns, types, regex_ns, "subst", TYPE_STRING, &[TYPE_ANY, TYPE_STRING, TYPE_STRING], intrinsics::regex::subst);
    define_method(graph, interns, types, regex_ns, "subst_all", TYPE_STRING, &[TYPE_ANY, TYPE_STRING, TYPE_STRING], intrinsics::regex::subst_all);

    // Global functions.
    let shell_fn = make_function(graph, interns, types, "shell", TYPE_GENERIC_DICT, &[TYPE_STRING, string_list, TYPE_STRING], intrinsics::shell::shell);
    let shell_name = interns.intern("shell");
    graph.module_mut(root).set_attr(shell_name, shell_fn);

    let glob_fn = make_function(graph, interns, types, "glob", string_list, &[TYPE_STRING], intrinsics::glob::glob);
    let glob_name = interns.intern("glob");
    graph.module_mut(root).set_attr(glob_name, glob_fn);

    // List methods live on a hidden namespace consulted by member access on
    // list values.
    let list_methods = {
        let mut obj = Object::new(Location::NONE, None);
        obj.name = Some(interns.intern("list"));
        graph.new_object(Location::NONE, obj, TYPE_OBJECT)
    };
    define_method(graph, interns, types, list_methods, "map", TYPE_GENERIC_LIST, &[TYPE_ANY], intrinsics::list::map);
    define_method(graph, interns, types, list_methods, "filter", TYPE_GENERIC_LIST, &[TYPE_ANY], intrinsics::list::filter);

    Fundamentals {
        module: root,
        object_proto,
        target_proto,
        option_proto,
        list_methods,
    }
}

/// Creates a named dictionary object bound in the root module's namespace.
fn child_scope(graph: &mut Graph, interns: &mut Interns, root: crate::module::ModuleId, name: &str) -> ObjectId {
    let name_id = interns.intern(name);
    let mut obj = Object::new(Location::NONE, None);
    obj.name = Some(name_id);
    let id = graph.new_dict(Location::NONE, obj, TYPE_GENERIC_DICT);
    let node = graph.object(id).node();
    graph.module_mut(root).set_attr(name_id, node);
    id
}

fn make_function(
    graph: &mut Graph,
    interns: &mut Interns,
    types: &mut TypeRegistry,
    name: &str,
    ret: TypeId,
    params: &[TypeId],
    handler: NativeFn,
) -> NodeId {
    let name_id = interns.intern(name);
    let ty = types.function(ret, params);
    graph.new_function(Location::NONE, Function::native(Some(name_id), ty, handler))
}

fn define_method(
    graph: &mut Graph,
    interns: &mut Interns,
    types: &mut TypeRegistry,
    scope: ObjectId,
    name: &str,
    ret: TypeId,
    params: &[TypeId],
    handler: NativeFn,
) {
    let func = make_function(graph, interns, types, name, ret, params, handler);
    let name_id = interns.intern(name);
    graph.object_mut(scope).attrs.insert(name_id, Attr::Value(func));
}
