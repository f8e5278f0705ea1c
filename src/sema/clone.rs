// src/sema/clone.rs
//
// Deep copy of a type graph into a destination arena. Two seen-maps keyed by
// source identity preserve sharing and cycles: the destination node is
// allocated and recorded before its children are cloned, then patched in
// place. Persistent handles are returned unchanged. Valid between arenas
// that share a base prefix.

use rustc_hash::FxHashMap;

use crate::config::FeatureFlags;
use crate::sema::arena::TypeArena;
use crate::sema::types::{
    LazyType, Property, TableIndexer, TableType, Type, TypeFamilyInstance, TypeFun, TypeId,
    TypePack, TypePackId,
};

/// Anything past this is a runaway traversal; substitute the error type and
/// keep going.
pub const CLONE_RECURSION_LIMIT: u32 = 300;

#[derive(Debug, Default)]
pub struct CloneState {
    pub seen_types: FxHashMap<TypeId, TypeId>,
    pub seen_packs: FxHashMap<TypePackId, TypePackId>,
    recursion: u32,
}

impl CloneState {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn clone_type(
    ty: TypeId,
    src: &TypeArena,
    dest: &mut TypeArena,
    state: &mut CloneState,
    flags: &FeatureFlags,
) -> TypeId {
    if src.is_persistent(ty) {
        return ty;
    }

    if let Some(&cloned) = state.seen_types.get(&ty) {
        return cloned;
    }

    if state.recursion >= CLONE_RECURSION_LIMIT {
        return crate::sema::arena::BuiltinTypes::new().error_type;
    }
    state.recursion += 1;
    let result = clone_type_inner(ty, src, dest, state, flags);
    state.recursion -= 1;
    result
}

fn clone_type_inner(
    ty: TypeId,
    src: &TypeArena,
    dest: &mut TypeArena,
    state: &mut CloneState,
    flags: &FeatureFlags,
) -> TypeId {
    match src.get(ty).clone() {
        // Simple nodes copy wholesale
        node @ (Type::Free { .. }
        | Type::Generic { .. }
        | Type::Blocked { .. }
        | Type::Primitive(_)
        | Type::Singleton(_)
        | Type::Any
        | Type::Unknown
        | Type::Never
        | Type::Error) => {
            let cloned = dest.add_type(node);
            state.seen_types.insert(ty, cloned);
            cloned
        }

        // While cloning we can flatten out bound types and tighten the graph,
        // as long as pointers to the binder and bindee end up on one node.
        Type::Bound(target) => {
            let mut cloned = clone_type(target, src, dest, state, flags);
            if flags.debug_preserve_bound_on_clone {
                cloned = dest.add_type(Type::Bound(cloned));
            }
            state.seen_types.insert(ty, cloned);
            cloned
        }

        Type::PendingExpansion(pe) => {
            let result = dest.add_type(Type::PendingExpansion(
                crate::sema::types::PendingExpansion {
                    prefix: pe.prefix.clone(),
                    name: pe.name.clone(),
                    type_args: Vec::new(),
                    pack_args: Vec::new(),
                },
            ));
            state.seen_types.insert(ty, result);

            let type_args: Vec<TypeId> = pe
                .type_args
                .iter()
                .map(|&arg| clone_type(arg, src, dest, state, flags))
                .collect();
            let pack_args: Vec<TypePackId> = pe
                .pack_args
                .iter()
                .map(|&arg| clone_pack(arg, src, dest, state, flags))
                .collect();

            if let Type::PendingExpansion(dest_pe) = dest.get_mut(result) {
                dest_pe.type_args = type_args;
                dest_pe.pack_args = pack_args;
            }
            result
        }

        Type::Function(f) => {
            let result = dest.add_type(Type::Function(f.clone()));
            state.seen_types.insert(ty, result);

            let generics: Vec<TypeId> = f
                .generics
                .iter()
                .map(|&g| clone_type(g, src, dest, state, flags))
                .collect();
            let generic_packs: Vec<TypePackId> = f
                .generic_packs
                .iter()
                .map(|&g| clone_pack(g, src, dest, state, flags))
                .collect();
            let arg_types = clone_pack(f.arg_types, src, dest, state, flags);
            let ret_types = clone_pack(f.ret_types, src, dest, state, flags);

            if let Type::Function(dest_f) = dest.get_mut(result) {
                dest_f.generics = generics;
                dest_f.generic_packs = generic_packs;
                dest_f.arg_types = arg_types;
                dest_f.ret_types = ret_types;
            }
            result
        }

        Type::Table(t) => {
            // A table bound to another is the other; ignore the original
            // content unless the debug flag keeps the indirection.
            if let Some(bound_to) = t.bound_to
                && !flags.debug_preserve_bound_on_clone
            {
                let cloned = clone_type(bound_to, src, dest, state, flags);
                state.seen_types.insert(ty, cloned);
                return cloned;
            }

            let result = dest.add_type(Type::Table(TableType {
                props: Default::default(),
                indexer: None,
                state: t.state,
                level: Default::default(),
                bound_to: None,
                instantiated_type_params: Vec::new(),
                instantiated_type_pack_params: Vec::new(),
                definition_module: t.definition_module.clone(),
                definition_span: t.definition_span,
                tags: t.tags.clone(),
            }));
            state.seen_types.insert(ty, result);

            let bound_to = t
                .bound_to
                .map(|b| clone_type(b, src, dest, state, flags));
            let props: Vec<(String, Property)> = t
                .props
                .iter()
                .map(|(name, prop)| (name.clone(), clone_property(prop, src, dest, state, flags)))
                .collect();
            let indexer = t.indexer.map(|indexer| TableIndexer {
                key_ty: clone_type(indexer.key_ty, src, dest, state, flags),
                value_ty: clone_type(indexer.value_ty, src, dest, state, flags),
            });
            let type_params: Vec<TypeId> = t
                .instantiated_type_params
                .iter()
                .map(|&p| clone_type(p, src, dest, state, flags))
                .collect();
            let pack_params: Vec<TypePackId> = t
                .instantiated_type_pack_params
                .iter()
                .map(|&p| clone_pack(p, src, dest, state, flags))
                .collect();

            if let Type::Table(dest_t) = dest.get_mut(result) {
                dest_t.bound_to = bound_to;
                dest_t.props = props.into_iter().collect();
                dest_t.indexer = indexer;
                dest_t.instantiated_type_params = type_params;
                dest_t.instantiated_type_pack_params = pack_params;
            }
            result
        }

        Type::Metatable { table, metatable } => {
            let result = dest.add_type(Type::Metatable { table, metatable });
            state.seen_types.insert(ty, result);

            let table = clone_type(table, src, dest, state, flags);
            let metatable = clone_type(metatable, src, dest, state, flags);
            if let Type::Metatable {
                table: dest_table,
                metatable: dest_mt,
            } = dest.get_mut(result)
            {
                *dest_table = table;
                *dest_mt = metatable;
            }
            result
        }

        Type::Class(c) => {
            let result = dest.add_type(Type::Class(crate::sema::types::ClassType {
                name: c.name.clone(),
                props: Default::default(),
                parent: None,
                metatable: None,
                indexer: None,
                tags: c.tags.clone(),
                definition_module: c.definition_module.clone(),
            }));
            state.seen_types.insert(ty, result);

            let props: Vec<(String, Property)> = c
                .props
                .iter()
                .map(|(name, prop)| (name.clone(), clone_property(prop, src, dest, state, flags)))
                .collect();
            let parent = c.parent.map(|p| clone_type(p, src, dest, state, flags));
            let metatable = c.metatable.map(|m| clone_type(m, src, dest, state, flags));
            let indexer = c.indexer.map(|indexer| TableIndexer {
                key_ty: clone_type(indexer.key_ty, src, dest, state, flags),
                value_ty: clone_type(indexer.value_ty, src, dest, state, flags),
            });

            if let Type::Class(dest_c) = dest.get_mut(result) {
                dest_c.props = props.into_iter().collect();
                dest_c.parent = parent;
                dest_c.metatable = metatable;
                dest_c.indexer = indexer;
            }
            result
        }

        Type::Union(options) => {
            let result = dest.add_type(Type::Union(Default::default()));
            state.seen_types.insert(ty, result);

            let cloned: Vec<TypeId> = options
                .iter()
                .map(|&opt| clone_type(opt, src, dest, state, flags))
                .collect();
            if let Type::Union(dest_options) = dest.get_mut(result) {
                dest_options.extend(cloned);
            }
            result
        }

        Type::Intersection(parts) => {
            let result = dest.add_type(Type::Intersection(Default::default()));
            state.seen_types.insert(ty, result);

            let cloned: Vec<TypeId> = parts
                .iter()
                .map(|&part| clone_type(part, src, dest, state, flags))
                .collect();
            if let Type::Intersection(dest_parts) = dest.get_mut(result) {
                dest_parts.extend(cloned);
            }
            result
        }

        Type::Negation(inner) => {
            let result = dest.add_type(Type::Negation(inner));
            state.seen_types.insert(ty, result);

            let inner = clone_type(inner, src, dest, state, flags);
            if let Type::Negation(dest_inner) = dest.get_mut(result) {
                *dest_inner = inner;
            }
            result
        }

        Type::Lazy(lazy) => {
            if let Some(unwrapped) = lazy.unwrapped {
                let cloned = clone_type(unwrapped, src, dest, state, flags);
                state.seen_types.insert(ty, cloned);
                cloned
            } else {
                let cloned = dest.add_type(Type::Lazy(LazyType {
                    thunk: lazy.thunk.clone(),
                    unwrapped: None,
                }));
                state.seen_types.insert(ty, cloned);
                cloned
            }
        }

        Type::FamilyInstance(instance) => {
            let result = dest.add_type(Type::FamilyInstance(TypeFamilyInstance {
                family: instance.family.clone(),
                type_args: Vec::new(),
                pack_args: Vec::new(),
            }));
            state.seen_types.insert(ty, result);

            let type_args: Vec<TypeId> = instance
                .type_args
                .iter()
                .map(|&arg| clone_type(arg, src, dest, state, flags))
                .collect();
            let pack_args: Vec<TypePackId> = instance
                .pack_args
                .iter()
                .map(|&arg| clone_pack(arg, src, dest, state, flags))
                .collect();
            if let Type::FamilyInstance(dest_instance) = dest.get_mut(result) {
                dest_instance.type_args = type_args;
                dest_instance.pack_args = pack_args;
            }
            result
        }
    }
}

fn clone_property(
    prop: &Property,
    src: &TypeArena,
    dest: &mut TypeArena,
    state: &mut CloneState,
    flags: &FeatureFlags,
) -> Property {
    Property {
        read_ty: prop.read_ty.map(|ty| clone_type(ty, src, dest, state, flags)),
        write_ty: prop.write_ty.map(|ty| clone_type(ty, src, dest, state, flags)),
        deprecated: prop.deprecated,
        deprecated_suggestion: prop.deprecated_suggestion.clone(),
        location: prop.location,
        tags: prop.tags.clone(),
        documentation_symbol: prop.documentation_symbol.clone(),
    }
}

pub fn clone_pack(
    tp: TypePackId,
    src: &TypeArena,
    dest: &mut TypeArena,
    state: &mut CloneState,
    flags: &FeatureFlags,
) -> TypePackId {
    if src.is_persistent_pack(tp) {
        return tp;
    }

    if let Some(&cloned) = state.seen_packs.get(&tp) {
        return cloned;
    }

    if state.recursion >= CLONE_RECURSION_LIMIT {
        return crate::sema::arena::BuiltinTypes::new().error_type_pack;
    }
    state.recursion += 1;
    let result = clone_pack_inner(tp, src, dest, state, flags);
    state.recursion -= 1;
    result
}

fn clone_pack_inner(
    tp: TypePackId,
    src: &TypeArena,
    dest: &mut TypeArena,
    state: &mut CloneState,
    flags: &FeatureFlags,
) -> TypePackId {
    match src.get_pack(tp).clone() {
        node @ (TypePack::Free { .. }
        | TypePack::Generic { .. }
        | TypePack::Error
        | TypePack::Blocked { .. }) => {
            let cloned = dest.add_pack(node);
            state.seen_packs.insert(tp, cloned);
            cloned
        }

        TypePack::Bound(target) => {
            let mut cloned = clone_pack(target, src, dest, state, flags);
            if flags.debug_preserve_bound_on_clone {
                cloned = dest.add_pack(TypePack::Bound(cloned));
            }
            state.seen_packs.insert(tp, cloned);
            cloned
        }

        TypePack::Variadic { ty, hidden } => {
            let cloned_ty = clone_type(ty, src, dest, state, flags);
            let cloned = dest.add_pack(TypePack::Variadic {
                ty: cloned_ty,
                hidden,
            });
            state.seen_packs.insert(tp, cloned);
            cloned
        }

        TypePack::List { head, tail } => {
            let result = dest.add_pack(TypePack::List {
                head: Default::default(),
                tail: None,
            });
            state.seen_packs.insert(tp, result);

            let cloned_head: Vec<TypeId> = head
                .iter()
                .map(|&ty| clone_type(ty, src, dest, state, flags))
                .collect();
            let cloned_tail = tail.map(|t| clone_pack(t, src, dest, state, flags));

            if let TypePack::List {
                head: dest_head,
                tail: dest_tail,
            } = dest.get_pack_mut(result)
            {
                dest_head.extend(cloned_head);
                *dest_tail = cloned_tail;
            }
            result
        }

        TypePack::FamilyInstance(instance) => {
            let result = dest.add_pack(TypePack::FamilyInstance(TypeFamilyInstance {
                family: instance.family.clone(),
                type_args: Vec::new(),
                pack_args: Vec::new(),
            }));
            state.seen_packs.insert(tp, result);

            let type_args: Vec<TypeId> = instance
                .type_args
                .iter()
                .map(|&arg| clone_type(arg, src, dest, state, flags))
                .collect();
            let pack_args: Vec<TypePackId> = instance
                .pack_args
                .iter()
                .map(|&arg| clone_pack(arg, src, dest, state, flags))
                .collect();
            if let TypePack::FamilyInstance(dest_instance) = dest.get_pack_mut(result) {
                dest_instance.type_args = type_args;
                dest_instance.pack_args = pack_args;
            }
            result
        }
    }
}

/// Clone an alias definition wholesale
pub fn clone_type_fun(
    type_fun: &TypeFun,
    src: &TypeArena,
    dest: &mut TypeArena,
    state: &mut CloneState,
    flags: &FeatureFlags,
) -> TypeFun {
    TypeFun {
        type_params: type_fun
            .type_params
            .iter()
            .map(|param| crate::sema::types::TypeFunParam {
                ty: clone_type(param.ty, src, dest, state, flags),
                default: param.default.map(|d| clone_type(d, src, dest, state, flags)),
            })
            .collect(),
        type_pack_params: type_fun
            .type_pack_params
            .iter()
            .map(|param| crate::sema::types::TypeFunPackParam {
                tp: clone_pack(param.tp, src, dest, state, flags),
                default: param.default.map(|d| clone_pack(d, src, dest, state, flags)),
            })
            .collect(),
        ty: clone_type(type_fun.ty, src, dest, state, flags),
    }
}
