// src/check/property.rs
//
// Property lookup over a normalized receiver. Every inhabited component is
// asked whether it carries the property; the mix of answers selects between
// MissingUnionProperty, CannotExtendTable, and UnknownProperty, with a
// case-insensitive near-miss upgrading the latter.

use std::collections::BTreeSet;

use rustc_hash::FxHashSet;
use smallvec::smallvec;

use crate::check::{TypeChecker, ValueContext};
use crate::errors::{ExtendKind, TypeErrorData};
use crate::sema::types::{
    PrimitiveKind, TableType, Type, TypeId, follow, is_string, lookup_class_prop,
};
use crate::syntax::ast::Expr;
use crate::syntax::span::Span;

impl<'a> TypeChecker<'a> {
    /// `expr.prop` and `expr["prop"]` both come through here.
    pub(crate) fn visit_expr_name(
        &mut self,
        expr: &Expr,
        span: Span,
        prop: &str,
        context: ValueContext,
        index_expr_ty: TypeId,
    ) {
        self.visit_expr(expr, ValueContext::RValue);
        let ty = self.lookup_type(expr);
        let receiver = self.strip_nil_and_report(ty, span);
        self.check_index_type_from_type(receiver, prop, span, context, index_expr_ty);
    }

    /// Report an error if the receiver does not carry the named property.
    pub(crate) fn check_index_type_from_type(
        &mut self,
        receiver: TypeId,
        prop: &str,
        span: Span,
        context: ValueContext,
        index_expr_ty: TypeId,
    ) {
        let builtins = *self.builtins;
        let Some(norm) =
            self.normalizer
                .normalize(&self.module.internal_types, &builtins, receiver)
        else {
            self.report(span, TypeErrorData::NormalizationTooComplex);
            return;
        };

        // Assemble the inhabited components to interrogate
        let mut components: Vec<TypeId> = Vec::new();
        if norm.tops != builtins.never_type {
            components.push(norm.tops);
        }
        if norm.booleans != builtins.never_type {
            components.push(norm.booleans);
        }
        components.extend(norm.classes.iter().copied());
        if norm.errors != builtins.never_type {
            components.push(norm.errors);
        }
        if norm.nils != builtins.never_type {
            components.push(norm.nils);
        }
        if norm.numbers != builtins.never_type {
            components.push(norm.numbers);
        }
        if !norm.strings.is_never() {
            components.push(builtins.string_type);
        }
        if norm.threads != builtins.never_type {
            components.push(norm.threads);
        }
        components.extend(norm.tables.iter().copied());
        if norm.functions.is_top {
            components.push(builtins.function_type);
        } else if !norm.functions.parts.is_empty() {
            if norm.functions.parts.len() == 1 {
                components.push(norm.functions.parts[0]);
            } else {
                let parts: smallvec::SmallVec<[TypeId; 4]> =
                    norm.functions.parts.iter().copied().collect();
                components.push(self.module.internal_types.intersection(parts));
            }
        }
        components.extend(norm.tyvars.iter().copied());

        let mut found_one = false;
        let mut missing: Vec<TypeId> = Vec::new();
        for component in components {
            if !self
                .normalizer
                .is_inhabited(&self.module.internal_types, &builtins, component)
            {
                continue;
            }
            let mut seen = FxHashSet::default();
            let found = self.has_index_type_from_type(component, prop, &mut seen, index_expr_ty);
            found_one |= found;
            if !found {
                missing.push(component);
            }
        }

        if !missing.is_empty() {
            if found_one {
                self.report(
                    span,
                    TypeErrorData::MissingUnionProperty {
                        ty: receiver,
                        missing,
                        key: prop.to_string(),
                    },
                );
            } else if context == ValueContext::LValue
                && !matches!(self.module.internal_types.get(receiver), Type::Class(_))
            {
                // Classes come into being with full knowledge of their shape,
                // so extending one is reported as the unknown property below.
                self.report(
                    span,
                    TypeErrorData::CannotExtendTable {
                        ty: receiver,
                        kind: ExtendKind::Property,
                        prop: prop.to_string(),
                    },
                );
            } else {
                self.report(
                    span,
                    TypeErrorData::UnknownProperty {
                        ty: receiver,
                        key: prop.to_string(),
                    },
                );
            }
        }
    }

    fn has_index_type_from_type(
        &mut self,
        ty: TypeId,
        prop: &str,
        seen: &mut FxHashSet<TypeId>,
        index_expr_ty: TypeId,
    ) -> bool {
        let mut ty = follow(&self.module.internal_types, ty);

        // A revisited type means another codepath answers for it
        if !seen.insert(ty) {
            return true;
        }

        if matches!(
            self.module.internal_types.get(ty),
            Type::Error | Type::Any | Type::Never | Type::Unknown
        ) {
            return true;
        }

        // Strings consult the string library through the metatable
        if is_string(&self.module.internal_types, ty) {
            match self.find_metatable_entry(self.builtins.string_type, "__index") {
                Some(index) => ty = follow(&self.module.internal_types, index),
                None => return false,
            }
        }

        match self.module.internal_types.get(ty).clone() {
            Type::Table(table) => self.table_has_prop(&table, prop, seen, index_expr_ty),
            Type::Metatable { table, metatable } => {
                let table = follow(&self.module.internal_types, table);
                if let Type::Table(inner) = self.module.internal_types.get(table).clone() {
                    if self.table_has_prop(&inner, prop, seen, index_expr_ty) {
                        return true;
                    }
                }
                // Fall back to the metatable's __index
                let metatable = follow(&self.module.internal_types, metatable);
                if let Type::Table(mt) = self.module.internal_types.get(metatable).clone() {
                    if let Some(index) = mt.props.get("__index").and_then(|p| p.ty()) {
                        return self.has_index_type_from_type(index, prop, seen, index_expr_ty);
                    }
                }
                false
            }
            Type::Class(class) => {
                if lookup_class_prop(&self.module.internal_types, &class, prop).is_some() {
                    return true;
                }
                // No such property; admit the access when the index
                // expression can inhabit the indexer's key type.
                if let Some(indexer) = class.indexer {
                    let test = self
                        .module
                        .internal_types
                        .intersection(smallvec![indexer.key_ty, index_expr_ty]);
                    let builtins = *self.builtins;
                    return self.normalizer.is_inhabited(
                        &self.module.internal_types,
                        &builtins,
                        test,
                    );
                }
                false
            }
            Type::Union(options) => options
                .iter()
                .all(|&option| self.has_index_type_from_type(option, prop, seen, index_expr_ty)),
            Type::Intersection(parts) => parts
                .iter()
                .any(|&part| self.has_index_type_from_type(part, prop, seen, index_expr_ty)),
            _ => false,
        }
    }

    fn table_has_prop(
        &mut self,
        table: &TableType,
        prop: &str,
        _seen: &mut FxHashSet<TypeId>,
        _index_expr_ty: TypeId,
    ) -> bool {
        if table.props.contains_key(prop) {
            return true;
        }
        if let Some(indexer) = table.indexer {
            let key = follow(&self.module.internal_types, indexer.key_ty);
            match self.module.internal_types.get(key) {
                Type::Primitive(PrimitiveKind::String) => return true,
                // An indexer like { [any]: _ } admits any property
                Type::Any | Type::Unknown => return true,
                _ => {}
            }
        }
        false
    }

    /// If a property is unknown but a known one matches case-insensitively,
    /// point at the likely typo.
    pub(crate) fn upgrade_unknown_property(&self, ty: TypeId, key: String) -> TypeErrorData {
        let arena = &self.module.internal_types;
        let mut candidates: BTreeSet<String> = BTreeSet::new();

        let mut accumulate = |props: &std::collections::BTreeMap<String, crate::sema::types::Property>| {
            for name in props.keys() {
                if name != &key && name.eq_ignore_ascii_case(&key) {
                    candidates.insert(name.clone());
                }
            }
        };

        let followed = follow(arena, ty);
        match arena.get(followed) {
            Type::Table(table) => accumulate(&table.props),
            Type::Metatable { table, .. } => {
                if let Type::Table(inner) = arena.get(follow(arena, *table)) {
                    accumulate(&inner.props);
                }
            }
            Type::Class(_) => {
                let mut cur = Some(followed);
                while let Some(class_ty) = cur {
                    let Type::Class(class) = arena.get(follow(arena, class_ty)) else {
                        break;
                    };
                    accumulate(&class.props);
                    cur = class.parent;
                }
            }
            _ => {}
        }

        if candidates.is_empty() {
            TypeErrorData::UnknownProperty { ty, key }
        } else {
            TypeErrorData::UnknownPropButFoundLikeProp {
                ty,
                key,
                candidates: candidates.into_iter().collect(),
            }
        }
    }
}
