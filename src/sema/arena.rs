// src/sema/arena.rs
//
// Arena ownership of all type and pack nodes. Identities are stable u32
// handles for the arena's lifetime. An arena may extend a frozen base arena:
// handles below the base boundary resolve through the base, which is how
// persistent builtins and frozen global environments are shared without
// cloning. Handles are only meaningful between arenas that share a base
// prefix.

use std::sync::Arc;

use smallvec::smallvec;

use crate::sema::types::{
    PrimitiveKind, SingletonValue, Type, TypeId, TypeIdVec, TypeLevel, TypePack, TypePackId,
};

// Fixed indices of the persistent block every root arena is seeded with.
const IDX_ERROR: u32 = 0;
const IDX_ANY: u32 = 1;
const IDX_UNKNOWN: u32 = 2;
const IDX_NEVER: u32 = 3;
const IDX_NIL: u32 = 4;
const IDX_BOOLEAN: u32 = 5;
const IDX_NUMBER: u32 = 6;
const IDX_STRING: u32 = 7;
const IDX_THREAD: u32 = 8;
const IDX_FUNCTION: u32 = 9;
const IDX_TABLE: u32 = 10;
const IDX_TRUE: u32 = 11;
const IDX_FALSE: u32 = 12;
const IDX_OPTIONAL_NUMBER: u32 = 13;
const FIRST_USER_TYPE: u32 = 14;

const IDX_ERROR_PACK: u32 = 0;
const IDX_ANY_PACK: u32 = 1;
const IDX_EMPTY_PACK: u32 = 2;
const FIRST_USER_PACK: u32 = 3;

/// Well-known handles into the persistent block. The same ids are valid in
/// every arena.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinTypes {
    pub error_type: TypeId,
    pub any_type: TypeId,
    pub unknown_type: TypeId,
    pub never_type: TypeId,
    pub nil_type: TypeId,
    pub boolean_type: TypeId,
    pub number_type: TypeId,
    pub string_type: TypeId,
    pub thread_type: TypeId,
    pub function_type: TypeId,
    pub table_type: TypeId,
    pub true_type: TypeId,
    pub false_type: TypeId,
    pub optional_number_type: TypeId,

    pub error_type_pack: TypePackId,
    pub any_type_pack: TypePackId,
    pub empty_type_pack: TypePackId,
}

impl BuiltinTypes {
    pub fn new() -> Self {
        Self {
            error_type: TypeId(IDX_ERROR),
            any_type: TypeId(IDX_ANY),
            unknown_type: TypeId(IDX_UNKNOWN),
            never_type: TypeId(IDX_NEVER),
            nil_type: TypeId(IDX_NIL),
            boolean_type: TypeId(IDX_BOOLEAN),
            number_type: TypeId(IDX_NUMBER),
            string_type: TypeId(IDX_STRING),
            thread_type: TypeId(IDX_THREAD),
            function_type: TypeId(IDX_FUNCTION),
            table_type: TypeId(IDX_TABLE),
            true_type: TypeId(IDX_TRUE),
            false_type: TypeId(IDX_FALSE),
            optional_number_type: TypeId(IDX_OPTIONAL_NUMBER),
            error_type_pack: TypePackId(IDX_ERROR_PACK),
            any_type_pack: TypePackId(IDX_ANY_PACK),
            empty_type_pack: TypePackId(IDX_EMPTY_PACK),
        }
    }

    /// The recovery type used when checking must continue past an error
    pub fn error_recovery_type(&self) -> TypeId {
        self.error_type
    }

    pub fn primitive(&self, kind: PrimitiveKind) -> TypeId {
        match kind {
            PrimitiveKind::Nil => self.nil_type,
            PrimitiveKind::Boolean => self.boolean_type,
            PrimitiveKind::Number => self.number_type,
            PrimitiveKind::String => self.string_type,
            PrimitiveKind::Thread => self.thread_type,
            PrimitiveKind::Function => self.function_type,
            PrimitiveKind::Table => self.table_type,
        }
    }
}

impl Default for BuiltinTypes {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner of type and pack nodes with stable handle identities.
#[derive(Debug, Clone)]
pub struct TypeArena {
    base: Option<Arc<TypeArena>>,
    /// Handles below this index resolve through `base` (or are the seeded
    /// persistent block in a root arena) and are immutable here.
    base_types: u32,
    base_packs: u32,
    types: Vec<Type>,
    packs: Vec<TypePack>,
    frozen: bool,
}

impl TypeArena {
    /// A root arena seeded with the persistent builtin block.
    pub fn new() -> Self {
        let mut arena = Self {
            base: None,
            base_types: 0,
            base_packs: 0,
            types: Vec::new(),
            packs: Vec::new(),
            frozen: false,
        };

        // Seed order must match the fixed indices above.
        arena.push_type(Type::Error, IDX_ERROR);
        arena.push_type(Type::Any, IDX_ANY);
        arena.push_type(Type::Unknown, IDX_UNKNOWN);
        arena.push_type(Type::Never, IDX_NEVER);
        arena.push_type(Type::Primitive(PrimitiveKind::Nil), IDX_NIL);
        arena.push_type(Type::Primitive(PrimitiveKind::Boolean), IDX_BOOLEAN);
        arena.push_type(Type::Primitive(PrimitiveKind::Number), IDX_NUMBER);
        arena.push_type(Type::Primitive(PrimitiveKind::String), IDX_STRING);
        arena.push_type(Type::Primitive(PrimitiveKind::Thread), IDX_THREAD);
        arena.push_type(Type::Primitive(PrimitiveKind::Function), IDX_FUNCTION);
        arena.push_type(Type::Primitive(PrimitiveKind::Table), IDX_TABLE);
        arena.push_type(Type::Singleton(SingletonValue::Bool(true)), IDX_TRUE);
        arena.push_type(Type::Singleton(SingletonValue::Bool(false)), IDX_FALSE);
        arena.push_type(
            Type::Union(smallvec![TypeId(IDX_NUMBER), TypeId(IDX_NIL)]),
            IDX_OPTIONAL_NUMBER,
        );

        arena.push_pack(TypePack::Error, IDX_ERROR_PACK);
        arena.push_pack(
            TypePack::Variadic {
                ty: TypeId(IDX_ANY),
                hidden: false,
            },
            IDX_ANY_PACK,
        );
        arena.push_pack(
            TypePack::List {
                head: TypeIdVec::new(),
                tail: None,
            },
            IDX_EMPTY_PACK,
        );

        arena.base_types = FIRST_USER_TYPE;
        arena.base_packs = FIRST_USER_PACK;
        arena
    }

    /// An arena layered on top of a frozen base. Handles allocated by the
    /// base stay valid here; new allocations do not disturb the base.
    pub fn with_base(base: Arc<TypeArena>) -> Self {
        debug_assert!(base.frozen, "base arenas must be frozen before layering");
        let base_types = base.total_types();
        let base_packs = base.total_packs();
        Self {
            base: Some(base),
            base_types,
            base_packs,
            types: Vec::new(),
            packs: Vec::new(),
            frozen: false,
        }
    }

    fn push_type(&mut self, ty: Type, expected: u32) {
        debug_assert_eq!(self.types.len() as u32, expected);
        self.types.push(ty);
    }

    fn push_pack(&mut self, tp: TypePack, expected: u32) {
        debug_assert_eq!(self.packs.len() as u32, expected);
        self.packs.push(tp);
    }

    pub fn total_types(&self) -> u32 {
        if self.base.is_some() {
            self.base_types + self.types.len() as u32
        } else {
            self.types.len() as u32
        }
    }

    pub fn total_packs(&self) -> u32 {
        if self.base.is_some() {
            self.base_packs + self.packs.len() as u32
        } else {
            self.packs.len() as u32
        }
    }

    /// Handles below the base boundary are persistent: immutable, shared,
    /// never cloned.
    pub fn is_persistent(&self, ty: TypeId) -> bool {
        ty.0 < self.base_types
    }

    pub fn is_persistent_pack(&self, tp: TypePackId) -> bool {
        tp.0 < self.base_packs
    }

    pub fn add_type(&mut self, ty: Type) -> TypeId {
        debug_assert!(!self.frozen, "cannot allocate in a frozen arena");
        let id = TypeId(self.total_types());
        self.types.push(ty);
        id
    }

    pub fn add_pack(&mut self, tp: TypePack) -> TypePackId {
        debug_assert!(!self.frozen, "cannot allocate in a frozen arena");
        let id = TypePackId(self.total_packs());
        self.packs.push(tp);
        id
    }

    pub fn get(&self, id: TypeId) -> &Type {
        if self.base.is_some() && id.0 < self.base_types {
            return self.base.as_ref().unwrap().get(id);
        }
        let local = (id.0 - self.local_type_offset()) as usize;
        &self.types[local]
    }

    pub fn get_pack(&self, id: TypePackId) -> &TypePack {
        if self.base.is_some() && id.0 < self.base_packs {
            return self.base.as_ref().unwrap().get_pack(id);
        }
        let local = (id.0 - self.local_pack_offset()) as usize;
        &self.packs[local]
    }

    /// Mutable access for unification commits and cycle fix-up during
    /// cloning. Persistent handles are never handed out mutably.
    pub fn get_mut(&mut self, id: TypeId) -> &mut Type {
        debug_assert!(!self.frozen, "cannot mutate a frozen arena");
        debug_assert!(!self.is_persistent(id), "cannot mutate a persistent type");
        let local = (id.0 - self.local_type_offset()) as usize;
        &mut self.types[local]
    }

    pub fn get_pack_mut(&mut self, id: TypePackId) -> &mut TypePack {
        debug_assert!(!self.frozen, "cannot mutate a frozen arena");
        debug_assert!(
            !self.is_persistent_pack(id),
            "cannot mutate a persistent pack"
        );
        let local = (id.0 - self.local_pack_offset()) as usize;
        &mut self.packs[local]
    }

    fn local_type_offset(&self) -> u32 {
        if self.base.is_some() { self.base_types } else { 0 }
    }

    fn local_pack_offset(&self) -> u32 {
        if self.base.is_some() { self.base_packs } else { 0 }
    }

    /// Prevent further allocation and mutation. Interface arenas freeze once
    /// their module is published.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Re-permit mutation, e.g. while attaching errors or loading definition
    /// files into an environment.
    pub fn unfreeze(&mut self) {
        self.frozen = false;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    // ========================================================================
    // Convenience builders
    // ========================================================================

    pub fn fresh_free(&mut self, level: TypeLevel) -> TypeId {
        self.add_type(Type::Free { level })
    }

    pub fn fresh_free_pack(&mut self, level: TypeLevel) -> TypePackId {
        self.add_pack(TypePack::Free { level })
    }

    pub fn list_pack(&mut self, head: impl Into<TypeIdVec>, tail: Option<TypePackId>) -> TypePackId {
        self.add_pack(TypePack::List {
            head: head.into(),
            tail,
        })
    }

    pub fn variadic_pack(&mut self, ty: TypeId) -> TypePackId {
        self.add_pack(TypePack::Variadic { ty, hidden: false })
    }

    pub fn union(&mut self, options: impl Into<TypeIdVec>) -> TypeId {
        self.add_type(Type::Union(options.into()))
    }

    pub fn intersection(&mut self, parts: impl Into<TypeIdVec>) -> TypeId {
        self.add_type(Type::Intersection(parts.into()))
    }

    /// `(args...) -> (rets...)` with both packs freshly allocated
    pub fn function(
        &mut self,
        args: impl Into<TypeIdVec>,
        rets: impl Into<TypeIdVec>,
    ) -> TypeId {
        let arg_pack = self.list_pack(args, None);
        let ret_pack = self.list_pack(rets, None);
        self.add_type(Type::Function(crate::sema::types::FunctionType::new(
            arg_pack, ret_pack,
        )))
    }
}

impl Default for TypeArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::types::follow;

    #[test]
    fn persistent_ids_identical_across_arenas() {
        let a = TypeArena::new();
        let b = TypeArena::new();
        let builtins = BuiltinTypes::new();
        assert!(matches!(a.get(builtins.number_type), Type::Primitive(PrimitiveKind::Number)));
        assert!(matches!(b.get(builtins.number_type), Type::Primitive(PrimitiveKind::Number)));
        assert!(a.is_persistent(builtins.any_type));
        assert!(a.is_persistent_pack(builtins.any_type_pack));
    }

    #[test]
    fn user_allocations_start_past_the_persistent_block() {
        let mut arena = TypeArena::new();
        let builtins = BuiltinTypes::new();
        let id = arena.add_type(Type::Bound(builtins.string_type));
        assert!(!arena.is_persistent(id));
        assert_eq!(follow(&arena, id), builtins.string_type);
    }

    #[test]
    fn layered_arena_resolves_base_handles() {
        let mut base = TypeArena::new();
        let builtins = BuiltinTypes::new();
        let in_base = base.add_type(Type::Bound(builtins.number_type));
        base.freeze();

        let mut layered = TypeArena::with_base(Arc::new(base));
        assert!(layered.is_persistent(in_base));
        assert_eq!(follow(&layered, in_base), builtins.number_type);

        let local = layered.add_type(Type::Bound(in_base));
        assert!(!layered.is_persistent(local));
        assert_eq!(follow(&layered, local), builtins.number_type);
    }

    #[test]
    fn optional_number_is_a_union_with_nil() {
        let arena = TypeArena::new();
        let builtins = BuiltinTypes::new();
        match arena.get(builtins.optional_number_type) {
            Type::Union(options) => {
                assert_eq!(options.len(), 2);
                assert!(options.contains(&builtins.number_type));
                assert!(options.contains(&builtins.nil_type));
            }
            _ => panic!("optional number should be a union"),
        }
    }
}
