// src/sema/unify.rs
//
// Subtype and equality decisions with free-variable binding. All mutation is
// staged in the transaction log; speculative probes snapshot the log and
// restore it on failure, so a failed attempt leaves no trace in the arena.

use crate::errors::{CountContext, ModuleName, TypeError, TypeErrorData};
use crate::sema::arena::{BuiltinTypes, TypeArena};
use crate::sema::normalize::Normalizer;
use crate::sema::txn_log::TxnLog;
use crate::sema::types::{TableState, Type, TypeId, TypePack, TypePackId};
use crate::syntax::span::Span;

const DEFAULT_ITERATION_LIMIT: usize = 20_000;
const DEPTH_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variance {
    Covariant,
    Invariant,
    Contravariant,
}

pub struct Unifier<'a> {
    arena: &'a mut TypeArena,
    normalizer: &'a mut Normalizer,
    builtins: &'a BuiltinTypes,
    module_name: ModuleName,
    span: Span,
    variance: Variance,
    pub log: TxnLog,
    pub errors: Vec<TypeError>,
    /// What a pack-arity failure is counting, set by the caller
    pub count_context: CountContext,
    /// Treat generics as free variables during this unification. Threaded
    /// per call site; the semantics at each site are inherited from the
    /// original and kept behind this one explicit boolean.
    pub generics_okay: bool,
    iterations: usize,
    iteration_limit: usize,
    too_complex_reported: bool,
}

impl<'a> Unifier<'a> {
    pub fn new(
        arena: &'a mut TypeArena,
        normalizer: &'a mut Normalizer,
        builtins: &'a BuiltinTypes,
        module_name: ModuleName,
        span: Span,
        variance: Variance,
    ) -> Self {
        Self {
            arena,
            normalizer,
            builtins,
            module_name,
            span,
            variance,
            log: TxnLog::new(),
            errors: Vec::new(),
            count_context: CountContext::Arg,
            generics_okay: false,
            iterations: 0,
            iteration_limit: DEFAULT_ITERATION_LIMIT,
            too_complex_reported: false,
        }
    }

    pub fn with_iteration_limit(mut self, limit: Option<usize>) -> Self {
        if let Some(limit) = limit {
            self.iteration_limit = limit;
        }
        self
    }

    /// Entry point: relate `sub` to `sup` under the unifier's variance.
    pub fn try_unify(&mut self, sub: TypeId, sup: TypeId) {
        match self.variance {
            Variance::Covariant => self.unify_types(sub, sup, 0),
            Variance::Contravariant => self.unify_types(sup, sub, 0),
            Variance::Invariant => {
                let before = self.errors.len();
                self.unify_types(sub, sup, 0);
                if self.errors.len() == before {
                    self.unify_types(sup, sub, 0);
                }
            }
        }
    }

    pub fn try_unify_packs(&mut self, sub: TypePackId, sup: TypePackId) {
        match self.variance {
            Variance::Covariant => self.unify_packs(sub, sup, 0),
            Variance::Contravariant => self.unify_packs(sup, sub, 0),
            Variance::Invariant => {
                let before = self.errors.len();
                self.unify_packs(sub, sup, 0);
                if self.errors.len() == before {
                    self.unify_packs(sup, sub, 0);
                }
            }
        }
    }

    fn report(&mut self, data: TypeErrorData) {
        self.errors
            .push(TypeError::new(self.span, self.module_name.clone(), data));
    }

    fn too_complex(&mut self) {
        if !self.too_complex_reported {
            self.too_complex_reported = true;
            self.report(TypeErrorData::UnificationTooComplex);
        }
    }

    fn budget(&mut self, depth: u32) -> bool {
        self.iterations += 1;
        if self.iterations > self.iteration_limit || depth > DEPTH_LIMIT {
            self.too_complex();
            return false;
        }
        true
    }

    /// Run `f` on a snapshot; on failure restore the log and error list.
    fn probe(&mut self, f: impl FnOnce(&mut Self)) -> bool {
        let log_snapshot = self.log.clone();
        let errors_len = self.errors.len();
        f(self);
        if self.errors.len() == errors_len {
            true
        } else {
            self.log = log_snapshot;
            self.errors.truncate(errors_len);
            false
        }
    }

    fn unify_types(&mut self, sub: TypeId, sup: TypeId, depth: u32) {
        if !self.budget(depth) {
            return;
        }

        let sub = self.log.follow(self.arena, sub);
        let sup = self.log.follow(self.arena, sup);

        // Reflexivity
        if sub == sup {
            return;
        }

        let sub_kind = self.log.get(self.arena, sub).clone();
        let sup_kind = self.log.get(self.arena, sup).clone();

        // Lazy nodes stand for their computed type once forced
        if let Type::Lazy(lazy) = &sub_kind
            && let Some(unwrapped) = lazy.unwrapped
        {
            return self.unify_types(unwrapped, sup, depth + 1);
        }
        if let Type::Lazy(lazy) = &sup_kind
            && let Some(unwrapped) = lazy.unwrapped
        {
            return self.unify_types(sub, unwrapped, depth + 1);
        }

        // Gradual absorbers. Error is silent in both directions to suppress
        // cascades; any is a subtype and supertype of everything; never is
        // the bottom; unknown is the top.
        if matches!(sub_kind, Type::Error) || matches!(sup_kind, Type::Error) {
            return;
        }
        if matches!(sub_kind, Type::Any) || matches!(sup_kind, Type::Any) {
            return;
        }
        if matches!(sub_kind, Type::Never) {
            return;
        }
        if matches!(sup_kind, Type::Unknown) {
            return;
        }

        // Placeholders awaiting constraints do not produce diagnostics here
        if matches!(sub_kind, Type::Blocked { .. } | Type::PendingExpansion(_))
            || matches!(sup_kind, Type::Blocked { .. } | Type::PendingExpansion(_))
        {
            return;
        }

        // Free variables bind to the other side through the log. When both
        // sides are free, the deeper variable binds to the shallower one so
        // nothing escapes its scope.
        match (&sub_kind, &sup_kind) {
            (Type::Free { level: sub_level }, Type::Free { level: sup_level }) => {
                if sub_level.subsumes(*sup_level) {
                    self.bind(sup, sub);
                } else {
                    self.bind(sub, sup);
                }
                return;
            }
            (Type::Free { .. }, _) => {
                self.bind(sub, sup);
                return;
            }
            (_, Type::Free { .. }) => {
                self.bind(sup, sub);
                return;
            }
            _ => {}
        }

        // Generics are skolems unless this call site says otherwise
        if let Type::Generic { .. } = &sub_kind {
            if self.generics_okay {
                self.bind(sub, sup);
                return;
            }
            return self.mismatch(sub, sup);
        }
        if let Type::Generic { .. } = &sup_kind {
            if self.generics_okay {
                self.bind(sup, sub);
                return;
            }
            return self.mismatch(sub, sup);
        }

        // Union on the left: every option must fit the supertype
        if let Type::Union(options) = &sub_kind {
            for &option in options.iter() {
                self.unify_types(option, sup, depth + 1);
            }
            return;
        }

        // Intersection on the right: every part must hold
        if let Type::Intersection(parts) = &sup_kind {
            for &part in parts.iter() {
                self.unify_types(sub, part, depth + 1);
            }
            return;
        }

        // Union on the right: some option must fit; the first match wins,
        // committing its log, which keeps the tie-break deterministic.
        if let Type::Union(options) = &sup_kind {
            for &option in options.iter() {
                if self.probe(|u| u.unify_types(sub, option, depth + 1)) {
                    return;
                }
            }
            return self.mismatch(sub, sup);
        }

        // Intersection on the left: some part must fit
        if let Type::Intersection(parts) = &sub_kind {
            for &part in parts.iter() {
                if self.probe(|u| u.unify_types(part, sup, depth + 1)) {
                    return;
                }
            }
            return self.mismatch(sub, sup);
        }

        // Negation on the right: the subtype must not overlap the negated type
        if let Type::Negation(negated) = &sup_kind {
            let negated = *negated;
            if self
                .normalizer
                .is_intersection_inhabited(self.arena, self.builtins, sub, negated)
            {
                self.mismatch(sub, sup);
            }
            return;
        }

        match (&sub_kind, &sup_kind) {
            (Type::Primitive(a), Type::Primitive(b)) => {
                if a != b {
                    self.mismatch(sub, sup);
                }
            }

            (Type::Singleton(a), Type::Singleton(b)) => {
                if a != b {
                    self.mismatch(sub, sup);
                }
            }

            (Type::Singleton(value), Type::Primitive(prim)) => {
                if value.parent_primitive() != *prim {
                    self.mismatch(sub, sup);
                }
            }

            (Type::Function(sub_f), Type::Function(sup_f)) => {
                // Contravariant in arguments, covariant in returns
                let (sub_args, sub_rets) = (sub_f.arg_types, sub_f.ret_types);
                let (sup_args, sup_rets) = (sup_f.arg_types, sup_f.ret_types);
                self.unify_packs(sup_args, sub_args, depth + 1);
                self.unify_packs(sub_rets, sup_rets, depth + 1);
            }

            (Type::Table(sub_t), Type::Table(sup_t)) => {
                self.unify_tables(sub, sub_t.clone(), sup, sup_t.clone(), depth);
            }

            (Type::Metatable { table, .. }, Type::Table(_)) => {
                let table = *table;
                self.unify_types(table, sup, depth + 1);
            }

            (
                Type::Metatable {
                    table: sub_table,
                    metatable: sub_mt,
                },
                Type::Metatable {
                    table: sup_table,
                    metatable: sup_mt,
                },
            ) => {
                let (sub_table, sub_mt, sup_table, sup_mt) =
                    (*sub_table, *sub_mt, *sup_table, *sup_mt);
                self.unify_types(sub_table, sup_table, depth + 1);
                self.unify_types(sub_mt, sup_mt, depth + 1);
            }

            (Type::Class(_), Type::Class(_)) => {
                // Nominal through the parent chain
                if !self.class_is_subclass(sub, sup) {
                    self.mismatch(sub, sup);
                }
            }

            (Type::Class(sub_c), Type::Table(sup_t)) => {
                // Structural: every table property must exist on the class
                let sub_c = sub_c.clone();
                let sup_t = sup_t.clone();
                for (name, sup_prop) in &sup_t.props {
                    let class_prop =
                        crate::sema::types::lookup_class_prop(self.arena, &sub_c, name)
                            .and_then(|p| p.ty());
                    match (class_prop, sup_prop.ty()) {
                        (Some(class_ty), Some(sup_ty)) => {
                            self.unify_invariant(class_ty, sup_ty, depth + 1);
                        }
                        (None, Some(_)) => self.mismatch(sub, sup),
                        _ => {}
                    }
                }
            }

            (Type::FamilyInstance(a), Type::FamilyInstance(b)) => {
                if !a.equivalent(b, self.arena) {
                    self.mismatch(sub, sup);
                }
            }

            _ => self.mismatch(sub, sup),
        }
    }

    fn unify_invariant(&mut self, a: TypeId, b: TypeId, depth: u32) {
        let before = self.errors.len();
        self.unify_types(a, b, depth);
        if self.errors.len() == before {
            self.unify_types(b, a, depth);
        }
    }

    fn unify_tables(
        &mut self,
        sub: TypeId,
        sub_t: crate::sema::types::TableType,
        sup: TypeId,
        sup_t: crate::sema::types::TableType,
        depth: u32,
    ) {
        let sub_is_open = matches!(sub_t.state, TableState::Free | TableState::Unsealed);
        let mut grown = sub_t.clone();
        let mut grew = false;

        for (name, sup_prop) in &sup_t.props {
            match sub_t.props.get(name) {
                Some(sub_prop) => {
                    if let (Some(sub_ty), Some(sup_ty)) = (sub_prop.ty(), sup_prop.ty()) {
                        self.unify_invariant(sub_ty, sup_ty, depth + 1);
                    }
                }
                None if sub_is_open => {
                    // Unsealed tables admit property addition via unification
                    grown.props.insert(name.clone(), sup_prop.clone());
                    grew = true;
                }
                None => {
                    self.mismatch(sub, sup);
                    return;
                }
            }
        }

        match (sub_t.indexer, sup_t.indexer) {
            (Some(sub_idx), Some(sup_idx)) => {
                self.unify_invariant(sub_idx.key_ty, sup_idx.key_ty, depth + 1);
                self.unify_invariant(sub_idx.value_ty, sup_idx.value_ty, depth + 1);
            }
            (None, Some(sup_idx)) if sub_is_open => {
                grown.indexer = Some(sup_idx);
                grew = true;
            }
            (None, Some(_)) => self.mismatch(sub, sup),
            // Width subtyping: the sub side may carry an indexer the sealed
            // supertype does not mention
            (_, None) => {}
        }

        if grew {
            self.log.bind_type(self.arena, sub, Type::Table(grown));
        }
    }

    fn class_is_subclass(&self, sub: TypeId, sup: TypeId) -> bool {
        let mut cur = sub;
        loop {
            if cur == sup {
                return true;
            }
            match self.log.get(self.arena, cur) {
                Type::Class(class) => match class.parent {
                    Some(parent) => cur = self.log.follow(self.arena, parent),
                    None => return false,
                },
                _ => return false,
            }
        }
    }

    fn bind(&mut self, var: TypeId, target: TypeId) {
        debug_assert_ne!(var, target);
        self.log.bind_type(self.arena, var, Type::Bound(target));
    }

    fn mismatch(&mut self, sub: TypeId, sup: TypeId) {
        self.report(TypeErrorData::TypeMismatch {
            expected: sup,
            actual: sub,
        });
    }

    // ========================================================================
    // Packs
    // ========================================================================

    fn unify_packs(&mut self, sub: TypePackId, sup: TypePackId, depth: u32) {
        if !self.budget(depth) {
            return;
        }

        let sub = self.log.follow_pack(self.arena, sub);
        let sup = self.log.follow_pack(self.arena, sup);
        if sub == sup {
            return;
        }

        let sub_kind = self.log.get_pack(self.arena, sub).clone();
        let sup_kind = self.log.get_pack(self.arena, sup).clone();

        // Error packs are silent absorbers
        if matches!(sub_kind, TypePack::Error) || matches!(sup_kind, TypePack::Error) {
            return;
        }
        if matches!(sub_kind, TypePack::Blocked { .. })
            || matches!(sup_kind, TypePack::Blocked { .. })
        {
            return;
        }

        match (&sub_kind, &sup_kind) {
            (TypePack::Free { .. }, _) => {
                self.bind_pack(sub, sup);
            }
            (_, TypePack::Free { .. }) => {
                self.bind_pack(sup, sub);
            }

            (TypePack::Generic { .. }, _) | (_, TypePack::Generic { .. }) => {
                if self.generics_okay {
                    if matches!(sub_kind, TypePack::Generic { .. }) {
                        self.bind_pack(sub, sup);
                    } else {
                        self.bind_pack(sup, sub);
                    }
                } else {
                    self.count_mismatch(sub, sup);
                }
            }

            (TypePack::Variadic { ty: sub_ty, .. }, TypePack::Variadic { ty: sup_ty, .. }) => {
                let (sub_ty, sup_ty) = (*sub_ty, *sup_ty);
                self.unify_types(sub_ty, sup_ty, depth + 1);
            }

            (TypePack::FamilyInstance(a), TypePack::FamilyInstance(b)) => {
                if !a.equivalent(b, self.arena) {
                    self.count_mismatch(sub, sup);
                }
            }

            _ => self.unify_pack_lists(sub, sup, depth),
        }
    }

    /// Pairwise unification of pack heads with tail resolution.
    fn unify_pack_lists(&mut self, sub: TypePackId, sup: TypePackId, depth: u32) {
        let (sub_head, sub_tail) = self.log_flatten(sub);
        let (sup_head, sup_tail) = self.log_flatten(sup);

        let paired = sub_head.len().min(sup_head.len());
        for i in 0..paired {
            self.unify_types(sub_head[i], sup_head[i], depth + 1);
        }

        if sub_head.len() > paired {
            // The subtype has surplus values; the supertype's tail must take them
            let surplus: Vec<TypeId> = sub_head[paired..].to_vec();
            match sup_tail.map(|t| self.log.get_pack(self.arena, t).clone()) {
                Some(TypePack::Variadic { ty, .. }) => {
                    for value in surplus {
                        self.unify_types(value, ty, depth + 1);
                    }
                }
                Some(TypePack::Free { .. }) => {
                    let remainder = self.arena.add_pack(TypePack::List {
                        head: surplus.into_iter().collect(),
                        tail: sub_tail,
                    });
                    self.bind_pack(sup_tail.unwrap(), remainder);
                }
                Some(TypePack::Error) | Some(TypePack::Blocked { .. }) => {}
                Some(TypePack::Generic { .. }) if self.generics_okay => {
                    let remainder = self.arena.add_pack(TypePack::List {
                        head: surplus.into_iter().collect(),
                        tail: sub_tail,
                    });
                    self.bind_pack(sup_tail.unwrap(), remainder);
                }
                _ => self.count_mismatch(sub, sup),
            }
        } else if sup_head.len() > paired {
            // The supertype demands values the subtype does not have
            let demanded: Vec<TypeId> = sup_head[paired..].to_vec();
            match sub_tail.map(|t| self.log.get_pack(self.arena, t).clone()) {
                Some(TypePack::Variadic { ty, .. }) => {
                    for value in demanded {
                        self.unify_types(ty, value, depth + 1);
                    }
                }
                Some(TypePack::Free { .. }) => {
                    let remainder = self.arena.add_pack(TypePack::List {
                        head: demanded.into_iter().collect(),
                        tail: sup_tail,
                    });
                    self.bind_pack(sub_tail.unwrap(), remainder);
                }
                Some(TypePack::Error) | Some(TypePack::Blocked { .. }) => {}
                Some(TypePack::Generic { .. }) if self.generics_okay => {
                    let remainder = self.arena.add_pack(TypePack::List {
                        head: demanded.into_iter().collect(),
                        tail: sup_tail,
                    });
                    self.bind_pack(sub_tail.unwrap(), remainder);
                }
                _ => {
                    // Trailing nil-able demands are satisfiable by absence
                    let all_optional = demanded
                        .iter()
                        .all(|&ty| crate::sema::types::is_optional(self.arena, ty));
                    if !all_optional {
                        self.count_mismatch(sub, sup);
                    }
                }
            }
        } else {
            // Heads paired exactly; resolve tails
            match (sub_tail, sup_tail) {
                (None, None) => {}
                (Some(sub_tail), Some(sup_tail)) => {
                    self.unify_packs(sub_tail, sup_tail, depth + 1);
                }
                (Some(tail), None) => {
                    match self.log.get_pack(self.arena, tail).clone() {
                        // A variadic or free tail can be empty
                        TypePack::Variadic { .. } => {}
                        TypePack::Free { .. } => {
                            self.bind_pack(tail, self.builtins.empty_type_pack);
                        }
                        TypePack::Error | TypePack::Blocked { .. } => {}
                        _ => self.count_mismatch(sub, sup),
                    }
                }
                (None, Some(tail)) => match self.log.get_pack(self.arena, tail).clone() {
                    TypePack::Variadic { .. } => {}
                    TypePack::Free { .. } => {
                        self.bind_pack(tail, self.builtins.empty_type_pack);
                    }
                    TypePack::Error | TypePack::Blocked { .. } => {}
                    TypePack::Generic { .. } if self.generics_okay => {
                        self.bind_pack(tail, self.builtins.empty_type_pack);
                    }
                    _ => self.count_mismatch(sub, sup),
                },
            }
        }
    }

    /// Flatten List chains, honoring staged entries in the log.
    fn log_flatten(&self, tp: TypePackId) -> (Vec<TypeId>, Option<TypePackId>) {
        let mut head = Vec::new();
        let mut cur = self.log.follow_pack(self.arena, tp);
        loop {
            match self.log.get_pack(self.arena, cur) {
                TypePack::List { head: h, tail } => {
                    head.extend(h.iter().copied());
                    match tail {
                        Some(tail) => cur = self.log.follow_pack(self.arena, *tail),
                        None => return (head, None),
                    }
                }
                _ => return (head, Some(cur)),
            }
        }
    }

    fn bind_pack(&mut self, var: TypePackId, target: TypePackId) {
        debug_assert_ne!(var, target);
        self.log.bind_pack(self.arena, var, TypePack::Bound(target));
    }

    fn count_mismatch(&mut self, sub: TypePackId, sup: TypePackId) {
        let (sub_head, _) = self.log_flatten(sub);
        let (sup_head, sup_tail) = self.log_flatten(sup);
        self.report(TypeErrorData::CountMismatch {
            expected: sup_head.len(),
            expected_variadic: sup_tail.is_some(),
            actual: sub_head.len(),
            context: self.count_context,
        });
    }
}

/// Covariant subtype query. The log is discarded; a proof that needed
/// bindings is not a proof.
pub fn is_subtype(
    arena: &mut TypeArena,
    normalizer: &mut Normalizer,
    builtins: &BuiltinTypes,
    module_name: &ModuleName,
    sub: TypeId,
    sup: TypeId,
    generics_okay: bool,
) -> bool {
    let mut unifier = Unifier::new(
        arena,
        normalizer,
        builtins,
        module_name.clone(),
        Span::default(),
        Variance::Covariant,
    );
    unifier.generics_okay = generics_okay;
    unifier.try_unify(sub, sup);
    unifier.errors.is_empty() && unifier.log.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::types::{SingletonValue, TypeLevel, follow};
    use smallvec::smallvec;

    struct Fixture {
        arena: TypeArena,
        normalizer: Normalizer,
        builtins: BuiltinTypes,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                arena: TypeArena::new(),
                normalizer: Normalizer::new(),
                builtins: BuiltinTypes::new(),
            }
        }

        fn unify(&mut self, sub: TypeId, sup: TypeId) -> (Vec<TypeError>, TxnLog) {
            let mut u = Unifier::new(
                &mut self.arena,
                &mut self.normalizer,
                &self.builtins,
                "test".to_string(),
                Span::default(),
                Variance::Covariant,
            );
            u.try_unify(sub, sup);
            (u.errors, u.log)
        }

        fn subtype(&mut self, sub: TypeId, sup: TypeId) -> bool {
            is_subtype(
                &mut self.arena,
                &mut self.normalizer,
                &self.builtins,
                &"test".to_string(),
                sub,
                sup,
                false,
            )
        }
    }

    #[test]
    fn reflexive_with_empty_log() {
        let mut fx = Fixture::new();
        let n = fx.builtins.number_type;
        let (errors, log) = fx.unify(n, n);
        assert!(errors.is_empty());
        assert!(log.is_empty());
    }

    #[test]
    fn gradual_absorbers() {
        let mut fx = Fixture::new();
        let b = fx.builtins;
        for ty in [b.number_type, b.string_type, b.nil_type, b.boolean_type] {
            assert!(fx.subtype(ty, b.any_type), "T <: any");
            assert!(fx.subtype(b.any_type, ty), "any <: T");
            assert!(fx.subtype(b.never_type, ty), "never <: T");
            assert!(fx.subtype(ty, b.unknown_type), "T <: unknown");
            assert!(fx.subtype(ty, b.error_type), "error absorbs");
            assert!(fx.subtype(b.error_type, ty), "error absorbs");
        }
        assert!(!fx.subtype(b.unknown_type, b.number_type));
        assert!(!fx.subtype(b.number_type, b.never_type));
    }

    #[test]
    fn primitive_mismatch_reports() {
        let mut fx = Fixture::new();
        let (errors, _) = fx.unify(fx.builtins.string_type, fx.builtins.number_type);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0].data,
            TypeErrorData::TypeMismatch { expected, actual }
                if expected == fx.builtins.number_type && actual == fx.builtins.string_type
        ));
    }

    #[test]
    fn singletons_are_subtypes_of_their_primitive() {
        let mut fx = Fixture::new();
        let lit = fx
            .arena
            .add_type(Type::Singleton(SingletonValue::Str("hi".into())));
        assert!(fx.subtype(lit, fx.builtins.string_type));
        assert!(!fx.subtype(fx.builtins.string_type, lit));
        assert!(fx.subtype(fx.builtins.true_type, fx.builtins.boolean_type));
    }

    #[test]
    fn union_supertype_tie_breaks_on_first_match() {
        let mut fx = Fixture::new();
        let b = fx.builtins;
        let sup = fx.arena.union(smallvec![b.number_type, b.string_type]);
        assert!(fx.subtype(b.number_type, sup));
        assert!(fx.subtype(b.string_type, sup));
        assert!(!fx.subtype(b.boolean_type, sup));
    }

    #[test]
    fn union_subtype_requires_every_option() {
        let mut fx = Fixture::new();
        let b = fx.builtins;
        let sub = fx.arena.union(smallvec![b.number_type, b.string_type]);
        let sup = fx.arena.union(smallvec![b.number_type, b.string_type, b.nil_type]);
        assert!(fx.subtype(sub, sup));
        assert!(!fx.subtype(sub, b.number_type));
    }

    #[test]
    fn intersection_rules_are_dual() {
        let mut fx = Fixture::new();
        let b = fx.builtins;
        let table_ish = fx.arena.intersection(smallvec![b.number_type, b.string_type]);
        // Intersection subtype: some part fits
        assert!(fx.subtype(table_ish, b.number_type));
        assert!(fx.subtype(table_ish, b.string_type));
        assert!(!fx.subtype(table_ish, b.boolean_type));
        // Intersection supertype: every part must hold
        assert!(!fx.subtype(b.number_type, table_ish));
    }

    #[test]
    fn free_variables_bind_through_the_log() {
        let mut fx = Fixture::new();
        let free = fx.arena.fresh_free(TypeLevel::default());
        let (errors, log) = fx.unify(free, fx.builtins.number_type);
        assert!(errors.is_empty());
        assert!(!log.is_empty());
        assert_eq!(log.follow(&fx.arena, free), fx.builtins.number_type);
        // Nothing applied until commit
        assert!(matches!(fx.arena.get(free), Type::Free { .. }));
        log.commit(&mut fx.arena);
        assert_eq!(follow(&fx.arena, free), fx.builtins.number_type);
    }

    #[test]
    fn deeper_free_binds_to_shallower() {
        let mut fx = Fixture::new();
        let outer = fx.arena.fresh_free(TypeLevel::new(1, 0));
        let inner = fx.arena.fresh_free(TypeLevel::new(2, 0));
        let (errors, log) = fx.unify(inner, outer);
        assert!(errors.is_empty());
        // The inner variable forwards to the outer, never the reverse
        assert!(matches!(log.get(&fx.arena, inner), Type::Bound(t) if *t == outer));
    }

    #[test]
    fn functions_are_contravariant_in_arguments() {
        let mut fx = Fixture::new();
        let b = fx.builtins;
        let number_or_string = fx.arena.union(smallvec![b.number_type, b.string_type]);
        let wide = fx.arena.function(smallvec![number_or_string], smallvec![b.number_type]);
        let narrow = fx.arena.function(smallvec![b.number_type], smallvec![b.number_type]);
        // (number | string) -> number  <:  (number) -> number
        assert!(fx.subtype(wide, narrow));
        assert!(!fx.subtype(narrow, wide));
    }

    #[test]
    fn function_returns_are_covariant() {
        let mut fx = Fixture::new();
        let b = fx.builtins;
        let number_or_string = fx.arena.union(smallvec![b.number_type, b.string_type]);
        let narrow_ret = fx.arena.function(smallvec![b.number_type], smallvec![b.number_type]);
        let wide_ret = fx
            .arena
            .function(smallvec![b.number_type], smallvec![number_or_string]);
        assert!(fx.subtype(narrow_ret, wide_ret));
        assert!(!fx.subtype(wide_ret, narrow_ret));
    }

    #[test]
    fn arity_failure_reports_count_mismatch() {
        let mut fx = Fixture::new();
        let b = fx.builtins;
        let one = fx.arena.list_pack(smallvec![b.number_type], None);
        let two = fx
            .arena
            .list_pack(smallvec![b.number_type, b.number_type], None);

        let mut u = Unifier::new(
            &mut fx.arena,
            &mut fx.normalizer,
            &fx.builtins,
            "test".to_string(),
            Span::default(),
            Variance::Covariant,
        );
        u.try_unify_packs(one, two);
        assert_eq!(u.errors.len(), 1);
        assert!(matches!(
            u.errors[0].data,
            TypeErrorData::CountMismatch {
                expected: 2,
                actual: 1,
                context: CountContext::Arg,
                ..
            }
        ));
    }

    #[test]
    fn missing_trailing_optionals_are_fine() {
        let mut fx = Fixture::new();
        let b = fx.builtins;
        let none = fx.arena.list_pack(smallvec![b.number_type], None);
        let with_optional = fx
            .arena
            .list_pack(smallvec![b.number_type, b.optional_number_type], None);

        let mut u = Unifier::new(
            &mut fx.arena,
            &mut fx.normalizer,
            &fx.builtins,
            "test".to_string(),
            Span::default(),
            Variance::Covariant,
        );
        u.try_unify_packs(none, with_optional);
        assert!(u.errors.is_empty());
    }

    #[test]
    fn sealed_tables_use_width_subtyping() {
        let mut fx = Fixture::new();
        let b = fx.builtins;
        use crate::sema::types::{Property, TableType};

        let mut wide = TableType::sealed();
        wide.props.insert("x".into(), Property::rw(b.number_type));
        wide.props.insert("y".into(), Property::rw(b.string_type));
        let wide = fx.arena.add_type(Type::Table(wide));

        let mut narrow = TableType::sealed();
        narrow.props.insert("x".into(), Property::rw(b.number_type));
        let narrow = fx.arena.add_type(Type::Table(narrow));

        assert!(fx.subtype(wide, narrow), "extra props are fine on the sub side");
        assert!(!fx.subtype(narrow, wide), "missing props are not");
    }

    #[test]
    fn unsealed_tables_grow_through_the_log() {
        let mut fx = Fixture::new();
        let b = fx.builtins;
        use crate::sema::types::{Property, TableType};

        let unsealed = fx.arena.add_type(Type::Table(TableType::default()));

        let mut sup = TableType::sealed();
        sup.props.insert("x".into(), Property::rw(b.number_type));
        let sup = fx.arena.add_type(Type::Table(sup));

        let (errors, log) = fx.unify(unsealed, sup);
        assert!(errors.is_empty());
        log.commit(&mut fx.arena);
        let Type::Table(t) = fx.arena.get(unsealed) else {
            panic!("expected table");
        };
        assert!(t.props.contains_key("x"), "property addition must land on commit");
    }

    #[test]
    fn classes_are_nominal_through_parents() {
        let mut fx = Fixture::new();
        use crate::sema::types::ClassType;

        let base = fx.arena.add_type(Type::Class(ClassType::new("Base", "m")));
        let mut derived_class = ClassType::new("Derived", "m");
        derived_class.parent = Some(base);
        let derived = fx.arena.add_type(Type::Class(derived_class));
        let stranger = fx.arena.add_type(Type::Class(ClassType::new("Stranger", "m")));

        assert!(fx.subtype(derived, base));
        assert!(!fx.subtype(base, derived));
        assert!(!fx.subtype(stranger, base));
    }

    #[test]
    fn determinism_byte_for_byte() {
        let mut fx = Fixture::new();
        let b = fx.builtins;
        let sup = fx.arena.union(smallvec![b.string_type, b.number_type]);
        let sub = fx.arena.union(smallvec![b.boolean_type, b.nil_type]);

        let (errors1, _) = fx.unify(sub, sup);
        let (errors2, _) = fx.unify(sub, sup);
        assert_eq!(format!("{:?}", errors1), format!("{:?}", errors2));
        assert!(!errors1.is_empty());
    }

    #[test]
    fn generics_okay_lets_generics_bind() {
        let mut fx = Fixture::new();
        let generic = fx.arena.add_type(Type::Generic { name: "T".into() });

        let mut u = Unifier::new(
            &mut fx.arena,
            &mut fx.normalizer,
            &fx.builtins,
            "test".to_string(),
            Span::default(),
            Variance::Covariant,
        );
        u.try_unify(generic, u.builtins.number_type);
        assert_eq!(u.errors.len(), 1, "skolemized by default");

        let mut u = Unifier::new(
            &mut fx.arena,
            &mut fx.normalizer,
            &fx.builtins,
            "test".to_string(),
            Span::default(),
            Variance::Covariant,
        );
        u.generics_okay = true;
        u.try_unify(generic, u.builtins.number_type);
        assert!(u.errors.is_empty());
        assert!(!u.log.is_empty());
    }

    #[test]
    fn recursion_bound_reports_too_complex() {
        let mut fx = Fixture::new();
        use crate::sema::types::{Property, TableType};

        // Two mutually recursive tables with a diverging property path
        let a = fx.arena.add_type(Type::Table(TableType::sealed()));
        let b = fx.arena.add_type(Type::Table(TableType::sealed()));
        let a_inner = fx.arena.add_type(Type::Table(TableType::sealed()));
        let b_inner = fx.arena.add_type(Type::Table(TableType::sealed()));
        if let Type::Table(t) = fx.arena.get_mut(a) {
            t.props.insert("next".into(), Property::rw(a_inner));
        }
        if let Type::Table(t) = fx.arena.get_mut(a_inner) {
            t.props.insert("next".into(), Property::rw(a));
        }
        if let Type::Table(t) = fx.arena.get_mut(b) {
            t.props.insert("next".into(), Property::rw(b_inner));
        }
        if let Type::Table(t) = fx.arena.get_mut(b_inner) {
            t.props.insert("next".into(), Property::rw(b));
        }

        let (errors, _) = fx.unify(a, b);
        assert!(
            errors
                .iter()
                .any(|e| matches!(e.data, TypeErrorData::UnificationTooComplex)),
            "diverging recursion must trip the bound, got {:?}",
            errors
        );
    }
}
