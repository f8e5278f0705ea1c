// src/sema/pack.rs
//
// Type pack utilities shared by the unifier and the checker: flattening,
// sizing, and extension of packs to a requested width.

use crate::sema::arena::{BuiltinTypes, TypeArena};
use crate::sema::types::{Type, TypeId, TypeIdVec, TypePack, TypePackId, follow_pack};

/// A pack expanded into a concrete head plus whatever tail was left over
#[derive(Debug, Clone, Default)]
pub struct ExtendedPack {
    pub head: Vec<TypeId>,
    pub tail: Option<TypePackId>,
}

/// The first type of a pack, if it has one. `include_hidden` controls
/// whether a hidden variadic tail counts.
pub fn first_type(arena: &TypeArena, tp: TypePackId, include_hidden: bool) -> Option<TypeId> {
    let tp = follow_pack(arena, tp);
    match arena.get_pack(tp) {
        TypePack::List { head, tail } => {
            if let Some(&first) = head.first() {
                Some(first)
            } else if let Some(tail) = tail {
                first_type(arena, *tail, include_hidden)
            } else {
                None
            }
        }
        TypePack::Variadic { ty, hidden } => {
            if *hidden && !include_hidden {
                None
            } else {
                Some(*ty)
            }
        }
        _ => None,
    }
}

/// Number of head elements reachable through `List` chains
pub fn pack_size(arena: &TypeArena, tp: TypePackId) -> usize {
    let mut size = 0;
    let mut cur = follow_pack(arena, tp);
    loop {
        match arena.get_pack(cur) {
            TypePack::List { head, tail } => {
                size += head.len();
                match tail {
                    Some(tail) => cur = follow_pack(arena, *tail),
                    None => return size,
                }
            }
            _ => return size,
        }
    }
}

/// Whether the pack ends without a variadic, free, or generic tail
pub fn finite(arena: &TypeArena, tp: TypePackId) -> bool {
    let mut cur = follow_pack(arena, tp);
    loop {
        match arena.get_pack(cur) {
            TypePack::List { tail, .. } => match tail {
                Some(tail) => cur = follow_pack(arena, *tail),
                None => return true,
            },
            _ => return false,
        }
    }
}

/// Flatten a pack into its head types and residual tail
pub fn flatten(arena: &TypeArena, tp: TypePackId) -> (Vec<TypeId>, Option<TypePackId>) {
    let mut head = Vec::new();
    let mut cur = follow_pack(arena, tp);
    loop {
        match arena.get_pack(cur) {
            TypePack::List { head: h, tail } => {
                head.extend(h.iter().copied());
                match tail {
                    Some(tail) => cur = follow_pack(arena, *tail),
                    None => return (head, None),
                }
            }
            _ => return (head, Some(cur)),
        }
    }
}

/// Expand a pack out to `length` types where possible. Variadic tails repeat
/// their element, error tails produce error types, and a free tail is
/// materialized into fresh types plus a new free tail so the demanded width
/// exists in the graph afterwards.
pub fn extend_type_pack(
    arena: &mut TypeArena,
    builtins: &BuiltinTypes,
    tp: TypePackId,
    length: usize,
) -> ExtendedPack {
    let (mut head, tail) = flatten(arena, tp);
    if head.len() >= length {
        return ExtendedPack { head, tail };
    }

    match tail {
        None => ExtendedPack { head, tail: None },
        Some(tail_id) => match arena.get_pack(tail_id).clone() {
            TypePack::Variadic { ty, .. } => {
                while head.len() < length {
                    head.push(ty);
                }
                ExtendedPack {
                    head,
                    tail: Some(tail_id),
                }
            }
            TypePack::Error => {
                while head.len() < length {
                    head.push(builtins.error_type);
                }
                ExtendedPack {
                    head,
                    tail: Some(tail_id),
                }
            }
            TypePack::Free { level } => {
                let mut fresh: TypeIdVec = TypeIdVec::new();
                while head.len() + fresh.len() < length {
                    fresh.push(arena.add_type(Type::Free { level }));
                }
                let new_tail = arena.add_pack(TypePack::Free { level });
                let replacement = TypePack::List {
                    head: fresh.clone(),
                    tail: Some(new_tail),
                };
                *arena.get_pack_mut(tail_id) = replacement;
                head.extend(fresh);
                ExtendedPack {
                    head,
                    tail: Some(new_tail),
                }
            }
            _ => ExtendedPack {
                head,
                tail: Some(tail_id),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::types::TypeLevel;
    use smallvec::smallvec;

    #[test]
    fn size_counts_through_list_chains() {
        let mut arena = TypeArena::new();
        let builtins = BuiltinTypes::new();
        let inner = arena.list_pack(smallvec![builtins.string_type], None);
        let outer = arena.list_pack(
            smallvec![builtins.number_type, builtins.boolean_type],
            Some(inner),
        );
        assert_eq!(pack_size(&arena, outer), 3);
        assert!(finite(&arena, outer));
    }

    #[test]
    fn variadic_tail_extends_to_requested_width() {
        let mut arena = TypeArena::new();
        let builtins = BuiltinTypes::new();
        let tail = arena.variadic_pack(builtins.number_type);
        let pack = arena.list_pack(smallvec![builtins.string_type], Some(tail));

        let extended = extend_type_pack(&mut arena, &builtins, pack, 3);
        assert_eq!(extended.head.len(), 3);
        assert_eq!(extended.head[0], builtins.string_type);
        assert_eq!(extended.head[1], builtins.number_type);
        assert_eq!(extended.head[2], builtins.number_type);
    }

    #[test]
    fn finite_pack_does_not_overextend() {
        let mut arena = TypeArena::new();
        let builtins = BuiltinTypes::new();
        let pack = arena.list_pack(smallvec![builtins.string_type], None);
        let extended = extend_type_pack(&mut arena, &builtins, pack, 3);
        assert_eq!(extended.head.len(), 1);
        assert!(extended.tail.is_none());
    }

    #[test]
    fn free_tail_materializes_fresh_types() {
        let mut arena = TypeArena::new();
        let builtins = BuiltinTypes::new();
        let free_tail = arena.fresh_free_pack(TypeLevel::default());
        let pack = arena.list_pack(smallvec![builtins.string_type], Some(free_tail));

        let extended = extend_type_pack(&mut arena, &builtins, pack, 3);
        assert_eq!(extended.head.len(), 3);
        assert!(matches!(arena.get(extended.head[1]), Type::Free { .. }));
        // The free tail was rewritten in place, so a second flatten sees the
        // materialized types too.
        assert_eq!(pack_size(&arena, pack), 3);
    }

    #[test]
    fn first_skips_hidden_variadics_unless_asked() {
        let mut arena = TypeArena::new();
        let builtins = BuiltinTypes::new();
        let hidden = arena.add_pack(TypePack::Variadic {
            ty: builtins.string_type,
            hidden: true,
        });
        assert_eq!(first_type(&arena, hidden, false), None);
        assert_eq!(first_type(&arena, hidden, true), Some(builtins.string_type));
    }
}
