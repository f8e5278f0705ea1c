// src/sema/txn_log.rs
//
// Staged mutation for speculative unification. Writes land in the log, reads
// go through it, and nothing touches the arena until commit. Dropping a log
// rolls its work back; speculative probes clone the log and restore the
// snapshot on failure.

use rustc_hash::FxHashMap;

use crate::sema::arena::TypeArena;
use crate::sema::types::{Type, TypeId, TypePack, TypePackId};

#[derive(Debug, Clone, Default)]
pub struct TxnLog {
    types: FxHashMap<TypeId, Type>,
    packs: FxHashMap<TypePackId, TypePack>,
}

impl TxnLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.packs.is_empty()
    }

    /// Stage a replacement for a type node
    pub fn bind_type(&mut self, arena: &TypeArena, id: TypeId, ty: Type) {
        debug_assert!(!arena.is_persistent(id), "cannot stage a persistent type");
        self.types.insert(id, ty);
    }

    pub fn bind_pack(&mut self, arena: &TypeArena, id: TypePackId, tp: TypePack) {
        debug_assert!(
            !arena.is_persistent_pack(id),
            "cannot stage a persistent pack"
        );
        self.packs.insert(id, tp);
    }

    /// Read a type through the log
    pub fn get<'a>(&'a self, arena: &'a TypeArena, id: TypeId) -> &'a Type {
        self.types.get(&id).unwrap_or_else(|| arena.get(id))
    }

    pub fn get_pack<'a>(&'a self, arena: &'a TypeArena, id: TypePackId) -> &'a TypePack {
        self.packs.get(&id).unwrap_or_else(|| arena.get_pack(id))
    }

    /// `follow` that honors staged `Bound` entries
    pub fn follow(&self, arena: &TypeArena, ty: TypeId) -> TypeId {
        let mut cur = ty;
        loop {
            match self.get(arena, cur) {
                Type::Bound(next) => cur = *next,
                Type::Table(t) if t.bound_to.is_some() => cur = t.bound_to.unwrap(),
                _ => return cur,
            }
        }
    }

    pub fn follow_pack(&self, arena: &TypeArena, tp: TypePackId) -> TypePackId {
        let mut cur = tp;
        loop {
            match self.get_pack(arena, cur) {
                TypePack::Bound(next) => cur = *next,
                _ => return cur,
            }
        }
    }

    /// Fold a child log's staged writes into this one; the child wins on
    /// overlapping nodes.
    pub fn concat(&mut self, child: TxnLog) {
        self.types.extend(child.types);
        self.packs.extend(child.packs);
    }

    /// Apply every staged write to the arena
    pub fn commit(self, arena: &mut TypeArena) {
        for (id, ty) in self.types {
            *arena.get_mut(id) = ty;
        }
        for (id, tp) in self.packs {
            *arena.get_pack_mut(id) = tp;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::arena::BuiltinTypes;
    use crate::sema::types::{TypeLevel, follow};

    #[test]
    fn reads_go_through_staged_entries() {
        let mut arena = TypeArena::new();
        let builtins = BuiltinTypes::new();
        let free = arena.fresh_free(TypeLevel::default());

        let mut log = TxnLog::new();
        log.bind_type(&arena, free, Type::Bound(builtins.number_type));

        // The arena itself is untouched
        assert!(matches!(arena.get(free), Type::Free { .. }));
        // But reads through the log see the binding
        assert_eq!(log.follow(&arena, free), builtins.number_type);
    }

    #[test]
    fn commit_applies_and_drop_rolls_back() {
        let mut arena = TypeArena::new();
        let builtins = BuiltinTypes::new();
        let a = arena.fresh_free(TypeLevel::default());
        let b = arena.fresh_free(TypeLevel::default());

        {
            let mut discarded = TxnLog::new();
            discarded.bind_type(&arena, a, Type::Bound(builtins.string_type));
            // dropped without commit
        }
        assert!(matches!(arena.get(a), Type::Free { .. }));

        let mut log = TxnLog::new();
        log.bind_type(&arena, a, Type::Bound(builtins.string_type));
        log.bind_type(&arena, b, Type::Bound(a));
        log.commit(&mut arena);

        assert_eq!(follow(&arena, b), builtins.string_type);
    }

    #[test]
    fn concat_prefers_child_entries() {
        let mut arena = TypeArena::new();
        let builtins = BuiltinTypes::new();
        let free = arena.fresh_free(TypeLevel::default());

        let mut parent = TxnLog::new();
        parent.bind_type(&arena, free, Type::Bound(builtins.number_type));

        let mut child = TxnLog::new();
        child.bind_type(&arena, free, Type::Bound(builtins.string_type));

        parent.concat(child);
        assert_eq!(parent.follow(&arena, free), builtins.string_type);
    }
}
