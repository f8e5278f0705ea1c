// src/check/mod.rs
//
// The post-inference checker. Walks every AST node with a scope stack,
// consuming the per-node type maps the inference engine populated, and
// validates subtyping, arity, iterator protocols, operator semantics, and
// property access. Diagnostics accumulate on the module; nothing here
// short-circuits.

mod annot;
mod expr;
mod family;
mod ops;
mod property;
mod stmt;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::smallvec;

use crate::config::{FeatureFlags, TypeCheckLimits};
use crate::errors::{CountContext, TypeError, TypeErrorData};
use crate::module::{Module, SourceModule};
use crate::sema::arena::BuiltinTypes;
use crate::sema::builtins::GlobalTypes;
use crate::sema::normalize::Normalizer;
use crate::sema::scope::ScopeId;
use crate::sema::types::{
    Type, TypeId, TypeLevel, TypePack, TypePackId, follow, follow_pack,
};
use crate::sema::unify::{Unifier, Variance};
use crate::syntax::ast::{Expr, NodeId, TypeAnnot};
use crate::syntax::span::Span;

/// Whether an expression is being read or written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueContext {
    LValue,
    RValue,
}

/// Run the checker over a module whose inference maps are populated.
/// Returns true when a resource limit stopped the walk early.
pub fn check_module(
    source: &SourceModule,
    module: &mut Module,
    builtins: &BuiltinTypes,
    globals: &GlobalTypes,
    flags: &FeatureFlags,
    limits: &TypeCheckLimits,
) -> bool {
    let mut checker = TypeChecker {
        builtins,
        globals,
        source,
        module,
        flags,
        limits,
        normalizer: Normalizer::new(),
        stack: Vec::new(),
        function_decl_stack: Vec::new(),
        no_family_errors: FxHashSet::default(),
        timed_out: false,
    };

    let root_scope = checker.module.module_scope();
    checker.stack.push(root_scope);
    checker.visit_block(&source.root);
    checker.stack.pop();

    let timed_out = checker.timed_out;
    module.timed_out = timed_out;

    // Re-home error payload types into the interface arena so diagnostics
    // stay meaningful after the internal graph is dropped.
    copy_errors_to_interface(module, flags);

    timed_out
}

fn copy_errors_to_interface(module: &mut Module, flags: &FeatureFlags) {
    let Module {
        internal_types,
        interface_types,
        errors,
        ..
    } = module;

    let mut state = crate::sema::clone::CloneState::new();
    fn remap_ty(
        ty: &mut TypeId,
        internal_types: &crate::sema::arena::TypeArena,
        interface_types: &mut crate::sema::arena::TypeArena,
        state: &mut crate::sema::clone::CloneState,
        flags: &FeatureFlags,
    ) {
        *ty = crate::sema::clone::clone_type(*ty, internal_types, interface_types, state, flags);
    }

    for error in errors.iter_mut() {
        match &mut error.data {
            TypeErrorData::TypeMismatch { expected, actual } => {
                remap_ty(expected, internal_types, interface_types, &mut state, flags);
                remap_ty(actual, internal_types, interface_types, &mut state, flags);
            }
            TypeErrorData::UnknownProperty { ty, .. }
            | TypeErrorData::UnknownPropButFoundLikeProp { ty, .. }
            | TypeErrorData::CannotCallNonFunction { ty }
            | TypeErrorData::CannotExtendTable { ty, .. }
            | TypeErrorData::NotATable { ty }
            | TypeErrorData::WhereClauseNeeded { ty } => {
                remap_ty(ty, internal_types, interface_types, &mut state, flags)
            }
            TypeErrorData::MissingUnionProperty { ty, missing, .. } => {
                remap_ty(ty, internal_types, interface_types, &mut state, flags);
                for missing_ty in missing {
                    remap_ty(missing_ty, internal_types, interface_types, &mut state, flags);
                }
            }
            TypeErrorData::OptionalValueAccess { optional } => {
                remap_ty(optional, internal_types, interface_types, &mut state, flags)
            }
            TypeErrorData::TypesAreUnrelated { left, right } => {
                remap_ty(left, internal_types, interface_types, &mut state, flags);
                remap_ty(right, internal_types, interface_types, &mut state, flags);
            }
            TypeErrorData::PackWhereClauseNeeded { pack } => {
                *pack = crate::sema::clone::clone_pack(
                    *pack,
                    internal_types,
                    interface_types,
                    &mut state,
                    flags,
                );
            }
            _ => {}
        }
    }
}

pub(crate) struct TypeChecker<'a> {
    pub(crate) builtins: &'a BuiltinTypes,
    pub(crate) globals: &'a GlobalTypes,
    pub(crate) source: &'a SourceModule,
    pub(crate) module: &'a mut Module,
    pub(crate) flags: &'a FeatureFlags,
    pub(crate) limits: &'a TypeCheckLimits,
    pub(crate) normalizer: Normalizer,
    pub(crate) stack: Vec<ScopeId>,
    pub(crate) function_decl_stack: Vec<TypeId>,
    pub(crate) no_family_errors: FxHashSet<TypeId>,
    pub(crate) timed_out: bool,
}

impl<'a> TypeChecker<'a> {
    pub(crate) fn scope(&self) -> ScopeId {
        *self.stack.last().expect("scope stack is never empty")
    }

    /// Push the scope attached to a node, if any. The caller pops iff this
    /// returns true.
    pub(crate) fn push_node_scope(&mut self, node: NodeId) -> bool {
        if let Some(&scope) = self.module.ast_scopes.get(&node) {
            self.stack.push(scope);
            true
        } else {
            false
        }
    }

    pub(crate) fn str(&self, sym: crate::syntax::intern::Symbol) -> &'a str {
        self.source.interner.resolve(sym)
    }

    pub(crate) fn check_budget(&mut self) -> bool {
        if self.timed_out {
            return false;
        }
        if self.limits.time_exceeded() {
            self.timed_out = true;
            return false;
        }
        true
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    pub(crate) fn report(&mut self, span: Span, data: TypeErrorData) {
        let data = match data {
            TypeErrorData::UnknownProperty { ty, key } => self.upgrade_unknown_property(ty, key),
            other => other,
        };
        self.module
            .errors
            .push(TypeError::new(span, self.module.name.clone(), data));
    }

    pub(crate) fn report_all(&mut self, errors: Vec<TypeError>) {
        for error in errors {
            self.report(error.span, error.data);
        }
    }

    // ========================================================================
    // Stored-type lookups
    // ========================================================================

    /// The inferred type of an expression. Missing entries mean a recursion
    /// limit dropped the node during inference; checking against any is
    /// cheap and keeps the rest of the walk meaningful.
    pub(crate) fn lookup_type(&mut self, expr: &Expr) -> TypeId {
        let node = expr.node_id();
        if let Some(&ty) = self.module.ast_types.get(&node) {
            let ty = follow(&self.module.internal_types, ty);
            return self.check_for_family_inhabitance(ty, expr.span());
        }
        if let Some(&tp) = self.module.ast_packs.get(&node) {
            let ty = self.flatten_pack_to_type(tp);
            return self.check_for_family_inhabitance(ty, expr.span());
        }
        self.builtins.any_type
    }

    /// Like `lookup_type`, for nodes the caller only has an id for (the
    /// synthesized binary of a compound assignment, a unary's own node).
    pub(crate) fn lookup_node_type(&mut self, node: NodeId, span: Span) -> TypeId {
        if let Some(&ty) = self.module.ast_types.get(&node) {
            let ty = follow(&self.module.internal_types, ty);
            return self.check_for_family_inhabitance(ty, span);
        }
        if let Some(&tp) = self.module.ast_packs.get(&node) {
            let ty = self.flatten_pack_to_type(tp);
            return self.check_for_family_inhabitance(ty, span);
        }
        self.builtins.any_type
    }

    pub(crate) fn lookup_pack(&mut self, expr: &Expr) -> TypePackId {
        match self.module.ast_packs.get(&expr.node_id()) {
            Some(&tp) => follow_pack(&self.module.internal_types, tp),
            None => self.builtins.any_type_pack,
        }
    }

    pub(crate) fn find_pack(&self, expr: &Expr) -> Option<TypePackId> {
        self.module.ast_packs.get(&expr.node_id()).copied()
    }

    /// The resolved type of an annotation node. Inference resolves every
    /// annotation it reaches; a gap degrades to any.
    pub(crate) fn lookup_annotation(&mut self, annot: &TypeAnnot) -> TypeId {
        match self.module.ast_resolved_types.get(&annot.node_id()) {
            Some(&ty) => {
                let ty = follow(&self.module.internal_types, ty);
                self.check_for_family_inhabitance(ty, annot.span())
            }
            None => self.builtins.any_type,
        }
    }

    pub(crate) fn lookup_pack_annotation(
        &self,
        annot: &crate::syntax::ast::TypePackAnnot,
    ) -> Option<TypePackId> {
        self.module
            .ast_resolved_packs
            .get(&annot.node_id())
            .map(|&tp| follow_pack(&self.module.internal_types, tp))
    }

    pub(crate) fn lookup_expected_pack(&mut self, node: NodeId) -> TypePackId {
        match self.module.ast_expected_types.get(&node) {
            Some(&ty) => {
                let ty = follow(&self.module.internal_types, ty);
                self.module.internal_types.list_pack(smallvec![ty], None)
            }
            None => self.builtins.any_type_pack,
        }
    }

    /// Rebuild the pack an expression list produces: one type per leading
    /// expression; a trailing call or varargs contributes its whole pack.
    pub(crate) fn reconstruct_pack(&mut self, exprs: &[Expr]) -> TypePackId {
        if exprs.is_empty() {
            return self.builtins.empty_type_pack;
        }

        let mut head = smallvec![];
        for expr in &exprs[..exprs.len() - 1] {
            head.push(self.lookup_type(expr));
        }

        let last = &exprs[exprs.len() - 1];
        let tail = if last.is_multi_value() {
            Some(self.lookup_pack(last))
        } else {
            head.push(self.lookup_type(last));
            None
        };
        self.module.internal_types.list_pack(head, tail)
    }

    /// Extract the first type of a pack, materializing free packs so the
    /// demanded type exists afterwards.
    pub(crate) fn flatten_pack_to_type(&mut self, tp: TypePackId) -> TypeId {
        let arena = &mut self.module.internal_types;
        let tp = follow_pack(arena, tp);
        if let Some(first) = crate::sema::pack::first_type(arena, tp, false) {
            return follow(arena, first);
        }
        match arena.get_pack(tp).clone() {
            TypePack::Free { level } => {
                let result = arena.add_type(Type::Free { level });
                let tail = arena.add_pack(TypePack::Free { level });
                *arena.get_pack_mut(tp) = TypePack::List {
                    head: smallvec![result],
                    tail: Some(tail),
                };
                result
            }
            TypePack::Error => self.builtins.error_recovery_type(),
            // `(f())` where f returns no values coerces to nil
            _ if crate::sema::pack::finite(arena, tp)
                && crate::sema::pack::pack_size(arena, tp) == 0 =>
            {
                self.builtins.nil_type
            }
            _ => self.builtins.any_type,
        }
    }

    // ========================================================================
    // Unification entry points
    // ========================================================================

    pub(crate) fn try_unify(
        &mut self,
        span: Span,
        sub: TypeId,
        sup: TypeId,
        context: CountContext,
        generics_okay: bool,
    ) {
        let mut unifier = Unifier::new(
            &mut self.module.internal_types,
            &mut self.normalizer,
            self.builtins,
            self.module.name.clone(),
            span,
            Variance::Covariant,
        )
        .with_iteration_limit(self.limits.unifier_iteration_limit);
        unifier.count_context = context;
        unifier.generics_okay = generics_okay;
        unifier.try_unify(sub, sup);

        let errors = std::mem::take(&mut unifier.errors);
        let log = std::mem::take(&mut unifier.log);
        if errors.is_empty() {
            log.commit(&mut self.module.internal_types);
        }
        self.note_complexity(&errors);
        self.report_all(errors);
    }

    pub(crate) fn try_unify_packs(
        &mut self,
        span: Span,
        sub: TypePackId,
        sup: TypePackId,
        context: CountContext,
        generics_okay: bool,
    ) {
        let mut unifier = Unifier::new(
            &mut self.module.internal_types,
            &mut self.normalizer,
            self.builtins,
            self.module.name.clone(),
            span,
            Variance::Covariant,
        )
        .with_iteration_limit(self.limits.unifier_iteration_limit);
        unifier.count_context = context;
        unifier.generics_okay = generics_okay;
        unifier.try_unify_packs(sub, sup);

        let errors = std::mem::take(&mut unifier.errors);
        let log = std::mem::take(&mut unifier.log);
        if errors.is_empty() {
            log.commit(&mut self.module.internal_types);
        }
        self.note_complexity(&errors);
        self.report_all(errors);
    }

    fn note_complexity(&mut self, errors: &[TypeError]) {
        if self.limits.unifier_iteration_limit.is_some()
            && errors
                .iter()
                .any(|e| matches!(e.data, TypeErrorData::UnificationTooComplex))
        {
            self.timed_out = true;
        }
    }

    pub(crate) fn is_subtype(&mut self, sub: TypeId, sup: TypeId, generics_okay: bool) -> bool {
        crate::sema::unify::is_subtype(
            &mut self.module.internal_types,
            &mut self.normalizer,
            self.builtins,
            &self.module.name,
            sub,
            sup,
            generics_okay,
        )
    }

    // ========================================================================
    // Metatables and nil stripping
    // ========================================================================

    /// The named entry of a type's metatable, if both exist.
    pub(crate) fn find_metatable_entry(&self, ty: TypeId, entry: &str) -> Option<TypeId> {
        let arena = &self.module.internal_types;
        let mt = crate::sema::types::get_metatable(arena, ty, self.globals.string_metatable)?;
        let mt = follow(arena, mt);
        match arena.get(mt) {
            Type::Table(table) => table.props.get(entry).and_then(|prop| prop.ty()),
            _ => None,
        }
    }

    /// Strip nil options out of a union, if the union would stay inhabited.
    pub(crate) fn try_strip_union_from_nil(&mut self, ty: TypeId) -> Option<TypeId> {
        let arena = &self.module.internal_types;
        let Type::Union(options) = arena.get(ty) else {
            return None;
        };
        if !options
            .iter()
            .any(|&opt| crate::sema::types::is_nil(arena, opt))
        {
            return None;
        }

        let remaining: Vec<TypeId> = options
            .iter()
            .copied()
            .filter(|&opt| !crate::sema::types::is_nil(arena, opt))
            .collect();

        match remaining.len() {
            0 => None,
            1 => Some(remaining[0]),
            _ => Some(
                self.module
                    .internal_types
                    .union(remaining.into_iter().collect::<smallvec::SmallVec<[TypeId; 4]>>()),
            ),
        }
    }

    /// Strip nil from an optional type, reporting the access.
    pub(crate) fn strip_nil_and_report(&mut self, ty: TypeId, span: Span) -> TypeId {
        let ty = follow(&self.module.internal_types, ty);
        if let Some(stripped) = self.try_strip_union_from_nil(ty) {
            self.report(span, TypeErrorData::OptionalValueAccess { optional: ty });
            return follow(&self.module.internal_types, stripped);
        }
        ty
    }

    // ========================================================================
    // Instantiation
    // ========================================================================

    /// Replace a function's generics with fresh free variables. None when
    /// the instantiation child limit is hit.
    pub(crate) fn instantiate(&mut self, ty: TypeId) -> Option<TypeId> {
        let arena = &mut self.module.internal_types;
        let ty = follow(arena, ty);
        let Type::Function(f) = arena.get(ty) else {
            return Some(ty);
        };
        if f.generics.is_empty() && f.generic_packs.is_empty() {
            return Some(ty);
        }

        let generics = f.generics.clone();
        let generic_packs = f.generic_packs.clone();
        let mut type_subs: FxHashMap<TypeId, TypeId> = FxHashMap::default();
        let mut pack_subs: FxHashMap<TypePackId, TypePackId> = FxHashMap::default();
        for generic in generics {
            let fresh = arena.fresh_free(TypeLevel::default());
            type_subs.insert(follow(arena, generic), fresh);
        }
        for generic in generic_packs {
            let fresh = arena.fresh_free_pack(TypeLevel::default());
            pack_subs.insert(follow_pack(arena, generic), fresh);
        }

        let mut sub = Substitution {
            type_subs,
            pack_subs,
            seen_types: FxHashMap::default(),
            seen_packs: FxHashMap::default(),
            budget: self.limits.instantiation_child_limit.unwrap_or(10_000),
        };
        let result = sub.substitute_type(arena, ty)?;
        if let Type::Function(f) = arena.get_mut(result) {
            f.generics.clear();
            f.generic_packs.clear();
        }
        Some(result)
    }
}

/// In-arena substitution copy used by instantiation. Nodes untouched by the
/// substitution are reused; anything containing a substituted leaf is
/// shallow-copied with an identity map preserving cycles.
struct Substitution {
    type_subs: FxHashMap<TypeId, TypeId>,
    pack_subs: FxHashMap<TypePackId, TypePackId>,
    seen_types: FxHashMap<TypeId, TypeId>,
    seen_packs: FxHashMap<TypePackId, TypePackId>,
    budget: usize,
}

impl Substitution {
    fn spend(&mut self) -> Option<()> {
        if self.budget == 0 {
            return None;
        }
        self.budget -= 1;
        Some(())
    }

    fn substitute_type(
        &mut self,
        arena: &mut crate::sema::arena::TypeArena,
        ty: TypeId,
    ) -> Option<TypeId> {
        let ty = follow(arena, ty);
        if let Some(&mapped) = self.type_subs.get(&ty) {
            return Some(mapped);
        }
        if let Some(&seen) = self.seen_types.get(&ty) {
            return Some(seen);
        }
        if arena.is_persistent(ty) {
            return Some(ty);
        }
        self.spend()?;

        match arena.get(ty).clone() {
            Type::Function(f) => {
                let result = arena.add_type(Type::Function(f.clone()));
                self.seen_types.insert(ty, result);
                let arg_types = self.substitute_pack(arena, f.arg_types)?;
                let ret_types = self.substitute_pack(arena, f.ret_types)?;
                if let Type::Function(dest) = arena.get_mut(result) {
                    dest.arg_types = arg_types;
                    dest.ret_types = ret_types;
                }
                Some(result)
            }
            Type::Union(options) => {
                let result = arena.add_type(Type::Union(Default::default()));
                self.seen_types.insert(ty, result);
                let mut subbed = smallvec![];
                for option in options {
                    subbed.push(self.substitute_type(arena, option)?);
                }
                if let Type::Union(dest) = arena.get_mut(result) {
                    *dest = subbed;
                }
                Some(result)
            }
            Type::Intersection(parts) => {
                let result = arena.add_type(Type::Intersection(Default::default()));
                self.seen_types.insert(ty, result);
                let mut subbed = smallvec![];
                for part in parts {
                    subbed.push(self.substitute_type(arena, part)?);
                }
                if let Type::Intersection(dest) = arena.get_mut(result) {
                    *dest = subbed;
                }
                Some(result)
            }
            Type::Table(t) => {
                let result = arena.add_type(Type::Table(t.clone()));
                self.seen_types.insert(ty, result);
                let props: Vec<(String, Option<TypeId>, Option<TypeId>)> = t
                    .props
                    .iter()
                    .map(|(name, prop)| (name.clone(), prop.read_ty, prop.write_ty))
                    .collect();
                let mut new_props = Vec::new();
                for (name, read_ty, write_ty) in props {
                    let read_ty = match read_ty {
                        Some(ty) => Some(self.substitute_type(arena, ty)?),
                        None => None,
                    };
                    let write_ty = match write_ty {
                        Some(ty) => Some(self.substitute_type(arena, ty)?),
                        None => None,
                    };
                    new_props.push((name, read_ty, write_ty));
                }
                let indexer = match t.indexer {
                    Some(indexer) => Some(crate::sema::types::TableIndexer {
                        key_ty: self.substitute_type(arena, indexer.key_ty)?,
                        value_ty: self.substitute_type(arena, indexer.value_ty)?,
                    }),
                    None => None,
                };
                if let Type::Table(dest) = arena.get_mut(result) {
                    for (name, read_ty, write_ty) in new_props {
                        if let Some(prop) = dest.props.get_mut(&name) {
                            prop.read_ty = read_ty;
                            prop.write_ty = write_ty;
                        }
                    }
                    dest.indexer = indexer;
                }
                Some(result)
            }
            Type::Metatable { table, metatable } => {
                let result = arena.add_type(Type::Metatable { table, metatable });
                self.seen_types.insert(ty, result);
                let table = self.substitute_type(arena, table)?;
                let metatable = self.substitute_type(arena, metatable)?;
                if let Type::Metatable {
                    table: dest_table,
                    metatable: dest_mt,
                } = arena.get_mut(result)
                {
                    *dest_table = table;
                    *dest_mt = metatable;
                }
                Some(result)
            }
            // Leaves and nominal types are unaffected by instantiation
            _ => Some(ty),
        }
    }

    fn substitute_pack(
        &mut self,
        arena: &mut crate::sema::arena::TypeArena,
        tp: TypePackId,
    ) -> Option<TypePackId> {
        let tp = follow_pack(arena, tp);
        if let Some(&mapped) = self.pack_subs.get(&tp) {
            return Some(mapped);
        }
        if let Some(&seen) = self.seen_packs.get(&tp) {
            return Some(seen);
        }
        if arena.is_persistent_pack(tp) {
            return Some(tp);
        }
        self.spend()?;

        match arena.get_pack(tp).clone() {
            TypePack::List { head, tail } => {
                let result = arena.add_pack(TypePack::List {
                    head: Default::default(),
                    tail: None,
                });
                self.seen_packs.insert(tp, result);
                let mut new_head = smallvec![];
                for ty in head {
                    new_head.push(self.substitute_type(arena, ty)?);
                }
                let new_tail = match tail {
                    Some(tail) => Some(self.substitute_pack(arena, tail)?),
                    None => None,
                };
                if let TypePack::List {
                    head: dest_head,
                    tail: dest_tail,
                } = arena.get_pack_mut(result)
                {
                    *dest_head = new_head;
                    *dest_tail = new_tail;
                }
                Some(result)
            }
            TypePack::Variadic { ty, hidden } => {
                let new_ty = self.substitute_type(arena, ty)?;
                let result = arena.add_pack(TypePack::Variadic {
                    ty: new_ty,
                    hidden,
                });
                self.seen_packs.insert(tp, result);
                Some(result)
            }
            _ => Some(tp),
        }
    }
}

/// The base variable a complex lvalue hangs off, for diagnostics.
pub(crate) fn identifier_of_base_var(source: &SourceModule, expr: &Expr) -> Option<String> {
    match expr {
        Expr::Global(global) => Some(source.str(global.name).to_string()),
        Expr::Local(local) => Some(source.str(local.name).to_string()),
        Expr::IndexName(index) => identifier_of_base_var(source, &index.expr),
        Expr::IndexExpr(index) => identifier_of_base_var(source, &index.expr),
        _ => None,
    }
}

