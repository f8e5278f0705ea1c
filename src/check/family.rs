// src/check/family.rs
//
// Type-family bookkeeping in the checker: reduction of instances whose
// arguments are fully concrete (memoized per arena through the no-error
// cache), and the scan for internal families that need a `where`-equivalent
// clause on the enclosing declaration.

use rustc_hash::FxHashSet;

use crate::check::TypeChecker;
use crate::errors::TypeErrorData;
use crate::sema::arena::TypeArena;
use crate::sema::type_display::display_type;
use crate::sema::types::{Type, TypeFamilyInstance, TypeId, TypePack, TypePackId, follow, follow_pack};
use crate::syntax::span::Span;

impl<'a> TypeChecker<'a> {
    /// Reduce the families reachable from `ty`, reporting anything left
    /// irreducible. Clean results are cached so re-reduction at another
    /// location is a lookup.
    pub(crate) fn check_for_family_inhabitance(&mut self, ty: TypeId, span: Span) -> TypeId {
        if self.no_family_errors.contains(&ty) {
            return ty;
        }

        let errors = self.reduce_families_type_at(ty, span);
        if !errors {
            self.no_family_errors.insert(ty);
        }
        ty
    }

    /// Reduce families within a pack's reachable graph.
    pub(crate) fn reduce_families_at(&mut self, tp: TypePackId, span: Span) {
        let mut walker = FamilyWalker::default();
        walker.walk_pack(&self.module.internal_types, tp);
        self.report_irreducible(walker, span);
    }

    /// Reduce families within a type's reachable graph. Returns whether any
    /// diagnostic was produced.
    pub(crate) fn reduce_families_type_at(&mut self, ty: TypeId, span: Span) -> bool {
        let mut walker = FamilyWalker::default();
        walker.walk_type(&self.module.internal_types, ty);
        self.report_irreducible(walker, span)
    }

    fn report_irreducible(&mut self, walker: FamilyWalker, span: Span) -> bool {
        let mut reported = false;
        for instance in walker.instances {
            let arena = &self.module.internal_types;
            let Type::FamilyInstance(fi) = arena.get(instance) else {
                continue;
            };
            // Instances still mentioning inference variables are not ready
            // to reduce; the ones with concrete arguments should have been
            // reduced away before validation.
            if family_args_concrete(arena, fi) {
                let rendered = display_type(arena, instance);
                self.report(
                    span,
                    TypeErrorData::GenericError {
                        message: format!("Type family instance {} is uninhabited", rendered),
                    },
                );
                reported = true;
            }
        }
        for instance in walker.pack_instances {
            let arena = &self.module.internal_types;
            let TypePack::FamilyInstance(fi) = arena.get_pack(instance) else {
                continue;
            };
            if family_args_concrete(arena, fi) {
                let family = fi.family.clone();
                self.report(
                    span,
                    TypeErrorData::GenericError {
                        message: format!("Type pack family instance {} is uninhabited", family),
                    },
                );
                reported = true;
            }
        }
        reported
    }

    /// Scan for family instances that mention generics but are not already
    /// named by an enclosing declaration's signature.
    pub(crate) fn check_for_internal_family(&mut self, ty: TypeId, span: Span) {
        let mut mentioned = FamilyWalker::default();
        for &decl in &self.function_decl_stack {
            mentioned.walk_type(&self.module.internal_types, decl);
        }

        let mut finder = FamilyWalker::default();
        finder.walk_type(&self.module.internal_types, ty);

        let mut internal_types: Vec<TypeId> = Vec::new();
        let mut internal_packs: Vec<TypePackId> = Vec::new();
        {
            let arena = &self.module.internal_types;
            for &instance in &finder.instances {
                let Type::FamilyInstance(fi) = arena.get(instance) else {
                    continue;
                };
                if !family_has_generic_args(arena, fi) {
                    continue;
                }
                let already_mentioned = mentioned.instances.iter().any(|&m| {
                    matches!(arena.get(m), Type::FamilyInstance(other) if fi.equivalent(other, arena))
                });
                if !already_mentioned {
                    internal_types.push(instance);
                }
            }
            for &instance in &finder.pack_instances {
                let TypePack::FamilyInstance(fi) = arena.get_pack(instance) else {
                    continue;
                };
                if !family_has_generic_args(arena, fi) {
                    continue;
                }
                let already_mentioned = mentioned.pack_instances.iter().any(|&m| {
                    matches!(arena.get_pack(m), TypePack::FamilyInstance(other) if fi.equivalent(other, arena))
                });
                if !already_mentioned {
                    internal_packs.push(instance);
                }
            }
        }

        for instance in internal_types {
            self.report(span, TypeErrorData::WhereClauseNeeded { ty: instance });
        }
        for instance in internal_packs {
            self.report(span, TypeErrorData::PackWhereClauseNeeded { pack: instance });
        }
    }
}

fn family_args_concrete(arena: &TypeArena, fi: &TypeFamilyInstance) -> bool {
    let arg_blocked = |&ty: &TypeId| {
        matches!(
            arena.get(follow(arena, ty)),
            Type::Free { .. } | Type::Generic { .. } | Type::Blocked { .. }
        )
    };
    let pack_blocked = |&tp: &TypePackId| {
        matches!(
            arena.get_pack(follow_pack(arena, tp)),
            TypePack::Free { .. } | TypePack::Generic { .. } | TypePack::Blocked { .. }
        )
    };
    !fi.type_args.iter().any(arg_blocked) && !fi.pack_args.iter().any(pack_blocked)
}

fn family_has_generic_args(arena: &TypeArena, fi: &TypeFamilyInstance) -> bool {
    fi.type_args
        .iter()
        .any(|&ty| matches!(arena.get(follow(arena, ty)), Type::Generic { .. }))
        || fi
            .pack_args
            .iter()
            .any(|&tp| matches!(arena.get_pack(follow_pack(arena, tp)), TypePack::Generic { .. }))
}

/// One-visit traversal collecting every family instance reachable from the
/// roots. Cycles are cut by the seen sets.
#[derive(Default)]
struct FamilyWalker {
    seen_types: FxHashSet<TypeId>,
    seen_packs: FxHashSet<TypePackId>,
    instances: Vec<TypeId>,
    pack_instances: Vec<TypePackId>,
}

impl FamilyWalker {
    fn walk_type(&mut self, arena: &TypeArena, ty: TypeId) {
        let ty = follow(arena, ty);
        if !self.seen_types.insert(ty) {
            return;
        }

        match arena.get(ty) {
            Type::FamilyInstance(fi) => {
                self.instances.push(ty);
                for &arg in &fi.type_args {
                    self.walk_type(arena, arg);
                }
                for &arg in &fi.pack_args {
                    self.walk_pack(arena, arg);
                }
            }
            Type::Function(f) => {
                for &g in &f.generics {
                    self.walk_type(arena, g);
                }
                self.walk_pack(arena, f.arg_types);
                self.walk_pack(arena, f.ret_types);
            }
            Type::Table(t) => {
                for prop in t.props.values() {
                    if let Some(ty) = prop.read_ty {
                        self.walk_type(arena, ty);
                    }
                    if let Some(ty) = prop.write_ty {
                        self.walk_type(arena, ty);
                    }
                }
                if let Some(indexer) = t.indexer {
                    self.walk_type(arena, indexer.key_ty);
                    self.walk_type(arena, indexer.value_ty);
                }
            }
            Type::Metatable { table, metatable } => {
                self.walk_type(arena, *table);
                self.walk_type(arena, *metatable);
            }
            Type::Class(c) => {
                for prop in c.props.values() {
                    if let Some(ty) = prop.read_ty {
                        self.walk_type(arena, ty);
                    }
                }
                if let Some(parent) = c.parent {
                    self.walk_type(arena, parent);
                }
                if let Some(metatable) = c.metatable {
                    self.walk_type(arena, metatable);
                }
            }
            Type::Union(options) => {
                for &option in options.iter() {
                    self.walk_type(arena, option);
                }
            }
            Type::Intersection(parts) => {
                for &part in parts.iter() {
                    self.walk_type(arena, part);
                }
            }
            Type::Negation(inner) => self.walk_type(arena, *inner),
            _ => {}
        }
    }

    fn walk_pack(&mut self, arena: &TypeArena, tp: TypePackId) {
        let tp = follow_pack(arena, tp);
        if !self.seen_packs.insert(tp) {
            return;
        }

        match arena.get_pack(tp) {
            TypePack::FamilyInstance(fi) => {
                self.pack_instances.push(tp);
                for &arg in &fi.type_args {
                    self.walk_type(arena, arg);
                }
                for &arg in &fi.pack_args {
                    self.walk_pack(arena, arg);
                }
            }
            TypePack::Variadic { ty, .. } => self.walk_type(arena, *ty),
            TypePack::List { head, tail } => {
                for &ty in head.iter() {
                    self.walk_type(arena, ty);
                }
                if let Some(tail) = tail {
                    self.walk_pack(arena, *tail);
                }
            }
            _ => {}
        }
    }
}
