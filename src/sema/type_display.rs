// src/sema/type_display.rs
//! Arena-aware rendering of type names for diagnostics. Cycles print as `...`.

use rustc_hash::FxHashSet;

use crate::sema::arena::TypeArena;
use crate::sema::types::{
    SingletonValue, TableState, Type, TypeId, TypePack, TypePackId, follow, follow_pack,
};

pub fn display_type(arena: &TypeArena, ty: TypeId) -> String {
    let mut seen = FxHashSet::default();
    fmt_type(arena, ty, &mut seen)
}

pub fn display_pack(arena: &TypeArena, tp: TypePackId) -> String {
    let mut seen = FxHashSet::default();
    fmt_pack(arena, tp, &mut seen)
}

fn fmt_type(arena: &TypeArena, ty: TypeId, seen: &mut FxHashSet<TypeId>) -> String {
    let ty = follow(arena, ty);
    if !seen.insert(ty) {
        return "...".to_string();
    }

    let out = match arena.get(ty) {
        Type::Free { .. } => format!("'t{}", ty.index()),
        Type::Generic { name } => name.clone(),
        Type::Bound(_) => unreachable!("followed above"),
        Type::Blocked { id } => format!("*blocked-{}*", id),
        Type::PendingExpansion(pe) => match &pe.prefix {
            Some(prefix) => format!("{}.{}", prefix, pe.name),
            None => pe.name.clone(),
        },
        Type::Primitive(kind) => kind.name().to_string(),
        Type::Singleton(SingletonValue::Bool(value)) => value.to_string(),
        Type::Singleton(SingletonValue::Str(value)) => format!("\"{}\"", value),
        Type::Function(f) => {
            format!(
                "({}) -> ({})",
                fmt_pack_inner(arena, f.arg_types, seen),
                fmt_pack_inner(arena, f.ret_types, seen)
            )
        }
        Type::Table(t) => {
            let mut parts: Vec<String> = t
                .props
                .iter()
                .filter_map(|(name, prop)| {
                    prop.ty().map(|ty| format!("{}: {}", name, fmt_type(arena, ty, seen)))
                })
                .collect();
            if let Some(indexer) = &t.indexer {
                parts.push(format!(
                    "[{}]: {}",
                    fmt_type(arena, indexer.key_ty, seen),
                    fmt_type(arena, indexer.value_ty, seen)
                ));
            }
            let open = if t.state == TableState::Sealed { "{" } else { "{+" };
            let close = if t.state == TableState::Sealed { "}" } else { "+}" };
            if parts.is_empty() {
                format!("{} {}", open, close)
            } else {
                format!("{} {} {}", open, parts.join(", "), close)
            }
        }
        Type::Metatable { table, .. } => fmt_type(arena, *table, seen),
        Type::Class(c) => c.name.clone(),
        Type::Union(options) => {
            let parts: Vec<String> = options.iter().map(|&t| fmt_type(arena, t, seen)).collect();
            parts.join(" | ")
        }
        Type::Intersection(parts) => {
            let parts: Vec<String> = parts.iter().map(|&t| fmt_type(arena, t, seen)).collect();
            parts.join(" & ")
        }
        Type::Any => "any".to_string(),
        Type::Unknown => "unknown".to_string(),
        Type::Never => "never".to_string(),
        Type::Error => "*error-type*".to_string(),
        Type::Negation(inner) => format!("~{}", fmt_type(arena, *inner, seen)),
        Type::Lazy(lazy) => match lazy.unwrapped {
            Some(unwrapped) => fmt_type(arena, unwrapped, seen),
            None => "*pending*".to_string(),
        },
        Type::FamilyInstance(instance) => {
            let args: Vec<String> = instance
                .type_args
                .iter()
                .map(|&t| fmt_type(arena, t, seen))
                .collect();
            format!("{}<{}>", instance.family, args.join(", "))
        }
    };

    seen.remove(&ty);
    out
}

fn fmt_pack(arena: &TypeArena, tp: TypePackId, seen: &mut FxHashSet<TypeId>) -> String {
    format!("({})", fmt_pack_inner(arena, tp, seen))
}

fn fmt_pack_inner(arena: &TypeArena, tp: TypePackId, seen: &mut FxHashSet<TypeId>) -> String {
    let tp = follow_pack(arena, tp);
    match arena.get_pack(tp) {
        TypePack::Free { .. } => format!("'p{}...", tp.index()),
        TypePack::Generic { name } => format!("{}...", name),
        TypePack::Bound(_) => unreachable!("followed above"),
        TypePack::Error => "*error-pack*".to_string(),
        TypePack::Blocked { id } => format!("*blocked-pack-{}*", id),
        TypePack::Variadic { ty, .. } => format!("...{}", fmt_type(arena, *ty, seen)),
        TypePack::List { head, tail } => {
            let mut parts: Vec<String> = head.iter().map(|&t| fmt_type(arena, t, seen)).collect();
            if let Some(tail) = tail {
                let rendered = fmt_pack_inner(arena, *tail, seen);
                if !rendered.is_empty() {
                    parts.push(rendered);
                }
            }
            parts.join(", ")
        }
        TypePack::FamilyInstance(instance) => format!("{}<...>", instance.family),
    }
}
