// src/sema/builtins.rs
//
// The global environment: a frozen arena layered over the persistent block,
// a global scope with the standard bindings, and the string metatable that
// property lookup on string values goes through.

use std::sync::Arc;

use smallvec::smallvec;

use crate::sema::arena::{BuiltinTypes, TypeArena};
use crate::sema::scope::{BindingKey, ScopeId, ScopeTree};
use crate::sema::types::{Property, TableType, Type, TypeFun, TypePack};
use crate::syntax::span::Span;

/// One environment's worth of globals. Modules layer their arenas on top of
/// `arena`, so every global handle stays valid inside module arenas.
#[derive(Debug, Clone)]
pub struct GlobalTypes {
    pub arena: Arc<TypeArena>,
    pub scopes: ScopeTree,
    pub global_scope: ScopeId,
    pub string_metatable: Option<crate::sema::types::TypeId>,
}

impl GlobalTypes {
    /// An environment with the standard library surface registered and the
    /// arena frozen.
    pub fn new(builtins: &BuiltinTypes) -> Self {
        let mut arena = TypeArena::new();
        let mut scopes = ScopeTree::new(Span::default());
        let global_scope = scopes.module_scope();

        let string_metatable =
            register_builtin_globals(&mut arena, &mut scopes, global_scope, builtins);
        arena.freeze();

        Self {
            arena: Arc::new(arena),
            scopes,
            global_scope,
            string_metatable: Some(string_metatable),
        }
    }

    /// An empty environment for tests that build their own globals
    pub fn empty() -> Self {
        let mut arena = TypeArena::new();
        arena.freeze();
        let scopes = ScopeTree::new(Span::default());
        let global_scope = scopes.module_scope();
        Self {
            arena: Arc::new(arena),
            scopes,
            global_scope,
            string_metatable: None,
        }
    }

    /// A fresh mutable arena layered on this environment
    pub fn module_arena(&self) -> TypeArena {
        TypeArena::with_base(self.arena.clone())
    }

    pub fn lookup_global(&self, name: &str) -> Option<crate::sema::types::TypeId> {
        self.scopes
            .lookup(self.global_scope, &BindingKey::Global(name.to_string()))
    }
}

/// Register the standard bindings into a global scope. Returns the string
/// metatable so `("x"):upper()` and friends resolve.
fn register_builtin_globals(
    arena: &mut TypeArena,
    scopes: &mut ScopeTree,
    global_scope: ScopeId,
    builtins: &BuiltinTypes,
) -> crate::sema::types::TypeId {
    let bind = |scopes: &mut ScopeTree, name: &str, ty| {
        scopes
            .get_mut(global_scope)
            .bindings
            .insert(BindingKey::Global(name.to_string()), ty);
    };

    // print(...: any) -> ()
    let any_variadic = arena.add_pack(TypePack::Variadic {
        ty: builtins.any_type,
        hidden: false,
    });
    let unit = arena.list_pack(smallvec![], None);
    let print_ty = arena.add_type(Type::Function(crate::sema::types::FunctionType::new(
        any_variadic,
        unit,
    )));
    bind(scopes, "print", print_ty);

    // require(target: any) -> any
    let require_ty = arena.function(smallvec![builtins.any_type], smallvec![builtins.any_type]);
    bind(scopes, "require", require_ty);

    // type(value: any) -> string
    let type_ty = arena.function(smallvec![builtins.any_type], smallvec![builtins.string_type]);
    bind(scopes, "type", type_ty);

    // tostring(value: any) -> string
    let tostring_ty = arena.function(smallvec![builtins.any_type], smallvec![builtins.string_type]);
    bind(scopes, "tostring", tostring_ty);

    // next(t: table, key: any?) -> (any, any)
    let next_ty = arena.function(
        smallvec![builtins.table_type, builtins.any_type],
        smallvec![builtins.any_type, builtins.any_type],
    );
    bind(scopes, "next", next_ty);

    // pairs(t: table) -> ((table, any) -> (any, any), table, nil)
    let pairs_ty = arena.function(
        smallvec![builtins.table_type],
        smallvec![next_ty, builtins.table_type, builtins.nil_type],
    );
    bind(scopes, "pairs", pairs_ty);
    bind(scopes, "ipairs", pairs_ty);

    // The string library table and the string metatable that routes through it
    let string_lib = make_string_lib(arena, builtins);
    bind(scopes, "string", string_lib);

    let mut string_mt = TableType::sealed();
    string_mt
        .props
        .insert("__index".to_string(), Property::read_only(string_lib));
    let string_mt = arena.add_type(Type::Table(string_mt));

    // `string` is also usable as a type alias for the primitive
    scopes
        .get_mut(global_scope)
        .type_aliases
        .insert("string".to_string(), TypeFun::monomorphic(builtins.string_type));

    string_mt
}

fn make_string_lib(
    arena: &mut TypeArena,
    builtins: &BuiltinTypes,
) -> crate::sema::types::TypeId {
    let s = builtins.string_type;
    let n = builtins.number_type;

    let mut lib = TableType::sealed();

    let unary = arena.function(smallvec![s], smallvec![s]);
    for name in ["upper", "lower", "reverse"] {
        lib.props.insert(name.to_string(), Property::read_only(unary));
    }

    let len = arena.function(smallvec![s], smallvec![n]);
    lib.props.insert("len".to_string(), Property::read_only(len));

    let byte = arena.function(smallvec![s, builtins.optional_number_type], smallvec![n]);
    lib.props.insert("byte".to_string(), Property::read_only(byte));

    let rep = arena.function(smallvec![s, n], smallvec![s]);
    lib.props.insert("rep".to_string(), Property::read_only(rep));

    let sub = arena.function(
        smallvec![s, n, builtins.optional_number_type],
        smallvec![s],
    );
    lib.props.insert("sub".to_string(), Property::read_only(sub));

    let format_args = arena.add_pack(TypePack::Variadic {
        ty: builtins.any_type,
        hidden: false,
    });
    let format_head = arena.list_pack(smallvec![s], Some(format_args));
    let format_ret = arena.list_pack(smallvec![s], None);
    let format = arena.add_type(Type::Function(crate::sema::types::FunctionType::new(
        format_head,
        format_ret,
    )));
    lib.props.insert("format".to_string(), Property::read_only(format));

    arena.add_type(Type::Table(lib))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::types::follow;

    #[test]
    fn globals_register_and_freeze() {
        let builtins = BuiltinTypes::new();
        let globals = GlobalTypes::new(&builtins);
        assert!(globals.arena.is_frozen());
        assert!(globals.lookup_global("print").is_some());
        assert!(globals.lookup_global("string").is_some());
        assert!(globals.string_metatable.is_some());
    }

    #[test]
    fn string_metatable_routes_through_index() {
        let builtins = BuiltinTypes::new();
        let globals = GlobalTypes::new(&builtins);
        let mt = globals.string_metatable.unwrap();

        let Type::Table(mt_table) = globals.arena.get(mt) else {
            panic!("string metatable must be a table");
        };
        let index = mt_table.props["__index"].ty().unwrap();
        let Type::Table(lib) = globals.arena.get(follow(&globals.arena, index)) else {
            panic!("__index must be the string library table");
        };
        assert!(lib.props.contains_key("upper"));
        assert!(lib.props.contains_key("len"));
    }

    #[test]
    fn module_arenas_see_global_handles() {
        let builtins = BuiltinTypes::new();
        let globals = GlobalTypes::new(&builtins);
        let print_ty = globals.lookup_global("print").unwrap();

        let module_arena = globals.module_arena();
        assert!(module_arena.is_persistent(print_ty));
        assert!(matches!(module_arena.get(print_ty), Type::Function(_)));
    }
}
