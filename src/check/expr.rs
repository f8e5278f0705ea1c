// src/check/expr.rs
//
// Expression checking. The call case is the involved one: it follows the
// stored original-call type through metamethods, intersections, and unions,
// then validates the stored overload (or explains why none fit).

use crate::check::{TypeChecker, ValueContext};
use crate::errors::{CountContext, TypeErrorData};
use crate::sema::pack::flatten;
use crate::sema::type_display::display_type;
use crate::sema::types::{Type, TypeId, TypePackId, follow, is_optional};
use crate::syntax::ast::*;

impl<'a> TypeChecker<'a> {
    pub(crate) fn visit_expr(&mut self, expr: &Expr, context: ValueContext) {
        let pushed = self.push_node_scope(expr.node_id());

        match expr {
            Expr::Group(e) => self.visit_expr(&e.expr, context),
            Expr::Nil(e) => self.visit_constant(expr, self.builtins.nil_type, e.span),
            Expr::Bool(e) => self.visit_constant(expr, self.builtins.boolean_type, e.span),
            Expr::Number(e) => self.visit_constant(expr, self.builtins.number_type, e.span),
            Expr::Str(e) => self.visit_constant(expr, self.builtins.string_type, e.span),
            Expr::Local(_) | Expr::Global(_) | Expr::Varargs(_) => {}
            Expr::Call(e) => self.visit_call(e),
            Expr::IndexName(e) => self.visit_index_name(e, context),
            Expr::IndexExpr(e) => self.visit_index_expr(e, context),
            Expr::Function(e) => self.visit_function_expr(e),
            Expr::Table(e) => self.visit_table(e),
            Expr::Unary(e) => self.visit_unary(e),
            Expr::Binary(e) => {
                self.visit_binary(e);
            }
            Expr::TypeAssertion(e) => self.visit_type_assertion(e),
            Expr::IfElse(e) => {
                self.visit_expr(&e.condition, ValueContext::RValue);
                self.visit_expr(&e.true_expr, ValueContext::RValue);
                self.visit_expr(&e.false_expr, ValueContext::RValue);
            }
            Expr::InterpString(e) => {
                for expr in &e.expressions {
                    self.visit_expr(expr, ValueContext::RValue);
                }
            }
            Expr::Error(e) => {
                for expr in &e.expressions {
                    self.visit_expr(expr, ValueContext::RValue);
                }
            }
        }

        if pushed {
            self.stack.pop();
        }
    }

    /// Inference must have given constants their primitive type.
    fn visit_constant(&mut self, expr: &Expr, expected: TypeId, _span: crate::syntax::span::Span) {
        #[cfg(debug_assertions)]
        {
            let actual = self.lookup_type(expr);
            let ok = self.is_subtype(actual, expected, false);
            debug_assert!(
                ok,
                "constant was inferred as {} rather than {}",
                display_type(&self.module.internal_types, actual),
                display_type(&self.module.internal_types, expected),
            );
        }
        #[cfg(not(debug_assertions))]
        {
            let _ = (expr, expected);
        }
    }

    fn visit_call(&mut self, call: &CallExpr) {
        self.visit_expr(&call.func, ValueContext::RValue);
        for arg in &call.args {
            self.visit_expr(arg, ValueContext::RValue);
        }
        self.check_call(call);
    }

    fn check_call(&mut self, call: &CallExpr) {
        let expected_ret = self.lookup_expected_pack(call.node_id);

        let Some(&original) = self.module.ast_original_call_types.get(&call.node_id) else {
            return;
        };
        let mut original = follow(&self.module.internal_types, original);
        let overloads = self.flatten_intersection(original);

        let mut args_head: Vec<TypeId> = Vec::new();
        let mut args_tail: Option<TypePackId> = None;
        let mut arg_spans: Vec<crate::syntax::span::Span> = Vec::with_capacity(call.args.len() + 1);

        match self.module.internal_types.get(original).clone() {
            Type::Any | Type::Error | Type::Never => return,
            Type::Function(_) => {}
            kind => {
                if let Some(call_mm) = self.find_metatable_entry(original, "__call") {
                    let call_mm = follow(&self.module.internal_types, call_mm);
                    if matches!(self.module.internal_types.get(call_mm), Type::Function(_)) {
                        // The callee itself becomes the first argument
                        args_head.push(original);
                        arg_spans.push(call.func.span());
                    } else {
                        self.report(
                            call.func.span(),
                            TypeErrorData::CannotCallNonFunction { ty: call_mm },
                        );
                        return;
                    }
                } else {
                    match kind {
                        Type::Intersection(_) => {
                            let builtins = *self.builtins;
                            let Some(norm) = self.normalizer.normalize(
                                &self.module.internal_types,
                                &builtins,
                                original,
                            ) else {
                                self.report(call.span, TypeErrorData::CodeTooComplex);
                                return;
                            };
                            // hasFunctions is true when the tops component is
                            // unknown, but for soundness we want the reverse.
                            if norm.tops == builtins.unknown_type || !norm.has_functions() {
                                self.report(
                                    call.func.span(),
                                    TypeErrorData::CannotCallNonFunction { ty: original },
                                );
                                return;
                            }
                        }
                        Type::Union(options) => {
                            // A union of functions is callable only when every
                            // member is the same function.
                            if is_optional(&self.module.internal_types, original) {
                                self.report(
                                    call.span,
                                    TypeErrorData::OptionalValueAccess { optional: original },
                                );
                                return;
                            }
                            let mut first: Option<TypeId> = None;
                            for &option in options.iter() {
                                let option = follow(&self.module.internal_types, option);
                                match first {
                                    None => first = Some(option),
                                    Some(seen) if seen != option => {
                                        self.report(
                                            call.func.span(),
                                            TypeErrorData::CannotCallNonFunction { ty: original },
                                        );
                                        return;
                                    }
                                    _ => {}
                                }
                            }
                            let Some(first) = first else {
                                return;
                            };
                            original = first;
                            if !matches!(
                                self.module.internal_types.get(original),
                                Type::Function(_)
                            ) {
                                self.report(
                                    call.func.span(),
                                    TypeErrorData::CannotCallNonFunction { ty: original },
                                );
                                return;
                            }
                        }
                        _ => {
                            self.report(
                                call.func.span(),
                                TypeErrorData::CannotCallNonFunction { ty: original },
                            );
                            return;
                        }
                    }
                }
            }
        }

        if call.is_method {
            let Expr::IndexName(index) = call.func.as_ref() else {
                debug_assert!(false, "method call expression has no receiver");
                return;
            };
            let receiver = self.lookup_type(&index.expr);
            args_head.push(receiver);
            arg_spans.push(index.expr.span());
        }

        for (i, arg) in call.args.iter().enumerate() {
            arg_spans.push(arg.span());
            if let Some(&ty) = self.module.ast_types.get(&arg.node_id()) {
                args_head.push(ty);
            } else if i + 1 == call.args.len() {
                args_tail = Some(
                    self.module
                        .ast_packs
                        .get(&arg.node_id())
                        .copied()
                        .unwrap_or(self.builtins.any_type_pack),
                );
            } else {
                args_head.push(self.builtins.any_type);
            }
        }

        let actual_args = self
            .module
            .internal_types
            .list_pack(args_head.into_iter().collect::<smallvec::SmallVec<[TypeId; 4]>>(), args_tail);

        if let Some(&selected) = self
            .module
            .ast_overload_resolved_types
            .get(&call.node_id)
        {
            self.check_resolved_overload(call, selected, actual_args, expected_ret, &arg_spans);
        } else {
            self.explain_unresolved_overloads(call, &overloads, actual_args);
        }
    }

    /// The constraint solver stored an instantiated overload matching in
    /// arity but maybe not in subtyping; unify it piecewise for precise
    /// error locations.
    fn check_resolved_overload(
        &mut self,
        call: &CallExpr,
        selected: TypeId,
        actual_args: TypePackId,
        expected_ret: TypePackId,
        arg_spans: &[crate::syntax::span::Span],
    ) {
        let selected = follow(&self.module.internal_types, selected);
        let overload = match self.module.internal_types.get(selected).clone() {
            Type::Any | Type::Error | Type::Never => return,
            Type::Function(f) => f,
            _ => {
                self.report(
                    call.func.span(),
                    TypeErrorData::CannotCallNonFunction { ty: selected },
                );
                return;
            }
        };

        self.try_unify_packs(
            call.span,
            overload.ret_types,
            expected_ret,
            CountContext::Return,
            true,
        );
        self.reduce_families_at(overload.ret_types, call.span);

        let (formal_head, formal_tail) = flatten(&self.module.internal_types, overload.arg_types);
        let (actual_head, actual_tail) = flatten(&self.module.internal_types, actual_args);

        let mut slice: Vec<TypeId> = Vec::new();
        for (i, &formal) in formal_head.iter().enumerate() {
            let Some(&actual) = actual_head.get(i) else {
                slice.push(formal);
                continue;
            };
            let span = arg_spans
                .get(i.min(arg_spans.len().saturating_sub(1)))
                .copied()
                .unwrap_or(call.span);
            self.try_unify(span, actual, formal, CountContext::Arg, true);
            self.reduce_families_type_at(formal, span);
        }

        if !slice.is_empty() {
            let last_span = arg_spans.last().copied().unwrap_or(call.span);
            if let Some(actual_tail) = actual_tail {
                // Unconsumed formals take the rest of the actual pack
                let remaining = self
                    .module
                    .internal_types
                    .list_pack(slice.into_iter().collect::<smallvec::SmallVec<[TypeId; 4]>>(), formal_tail);
                self.try_unify_packs(
                    last_span,
                    actual_tail,
                    remaining,
                    CountContext::Arg,
                    true,
                );
                self.reduce_families_at(remaining, last_span);
            } else {
                // No values left for the remaining formals; absence is fine
                // only when every one of them admits nil.
                let arena = &self.module.internal_types;
                let all_optional = slice.iter().all(|&ty| is_optional(arena, ty));
                if !all_optional {
                    self.report(
                        call.span,
                        TypeErrorData::CountMismatch {
                            expected: formal_head.len(),
                            expected_variadic: formal_tail.is_some(),
                            actual: actual_head.len(),
                            context: CountContext::Arg,
                        },
                    );
                }
            }
        }
    }

    /// No overload worked, even instantiated. Filter the overload set down
    /// to the ones matching the incoming arity and report those.
    fn explain_unresolved_overloads(
        &mut self,
        call: &CallExpr,
        overloads: &[TypeId],
        actual_args: TypePackId,
    ) {
        let actual_size = crate::sema::pack::pack_size(&self.module.internal_types, actual_args);

        let mut arity_matching: Vec<TypeId> = Vec::new();
        for &overload in overloads {
            let overload = follow(&self.module.internal_types, overload);
            match self.module.internal_types.get(overload) {
                Type::Function(f) => {
                    if crate::sema::pack::pack_size(&self.module.internal_types, f.arg_types)
                        == actual_size
                    {
                        arity_matching.push(overload);
                    }
                }
                _ => {
                    if let Some(call_mm) = self.find_metatable_entry(overload, "__call") {
                        let call_mm = follow(&self.module.internal_types, call_mm);
                        match self.module.internal_types.get(call_mm) {
                            Type::Function(f) => {
                                if crate::sema::pack::pack_size(
                                    &self.module.internal_types,
                                    f.arg_types,
                                ) == actual_size
                                {
                                    arity_matching.push(overload);
                                }
                            }
                            _ => self.report(
                                call.span,
                                TypeErrorData::CannotCallNonFunction { ty: call_mm },
                            ),
                        }
                    }
                }
            }
        }

        if arity_matching.is_empty() {
            self.report(
                call.span,
                TypeErrorData::GenericError {
                    message: format!(
                        "No overload for function accepts {} arguments.",
                        actual_size
                    ),
                },
            );
        } else {
            self.report(
                call.span,
                TypeErrorData::GenericError {
                    message: format!(
                        "None of the overloads for function that accept {} arguments are compatible.",
                        actual_size
                    ),
                },
            );
        }

        let to_list = if arity_matching.is_empty() {
            overloads
        } else {
            &arity_matching
        };
        let mut rendered = String::new();
        for (i, &overload) in to_list.iter().enumerate() {
            if i > 0 {
                rendered.push_str("; ");
            }
            if i > 0 && i + 1 == to_list.len() {
                rendered.push_str("and ");
            }
            rendered.push_str(&display_type(&self.module.internal_types, overload));
        }
        self.report(
            call.func.span(),
            TypeErrorData::ExtraInformation {
                message: format!("Available overloads: {}", rendered),
            },
        );
    }

    pub(crate) fn flatten_intersection(&self, ty: TypeId) -> Vec<TypeId> {
        let arena = &self.module.internal_types;
        let mut out = Vec::new();
        let mut queue = vec![follow(arena, ty)];
        while let Some(ty) = queue.pop() {
            match arena.get(ty) {
                Type::Intersection(parts) => {
                    queue.extend(parts.iter().map(|&p| follow(arena, p)));
                }
                _ => out.push(ty),
            }
        }
        out.reverse();
        out
    }

    fn visit_index_name(&mut self, index: &IndexNameExpr, context: ValueContext) {
        let prop = self.str(index.index).to_string();
        self.visit_expr_name(
            &index.expr,
            index.span,
            &prop,
            context,
            self.builtins.string_type,
        );
    }

    fn visit_index_expr(&mut self, index: &IndexExprExpr, context: ValueContext) {
        if let Expr::Str(lit) = index.index.as_ref() {
            // Indexing with a literal string is property access
            let index_ty = self.lookup_type(&index.index);
            let prop = lit.value.clone();
            self.visit_expr_name(&index.expr, index.span, &prop, context, index_ty);
            return;
        }

        self.visit_expr(&index.expr, ValueContext::LValue);
        self.visit_expr(&index.index, ValueContext::RValue);

        let expr_ty = self.lookup_type(&index.expr);
        let index_ty = self.lookup_type(&index.index);

        match self.module.internal_types.get(expr_ty).clone() {
            Type::Table(table) => match table.indexer {
                Some(indexer) => {
                    self.try_unify(
                        index.index.span(),
                        index_ty,
                        indexer.key_ty,
                        CountContext::Arg,
                        false,
                    );
                }
                None => self.report(
                    index.span,
                    TypeErrorData::CannotExtendTable {
                        ty: expr_ty,
                        kind: crate::errors::ExtendKind::Indexer,
                        prop: String::new(),
                    },
                ),
            },
            Type::Class(class) => {
                if let Some(indexer) = class.indexer {
                    self.try_unify(
                        index.index.span(),
                        index_ty,
                        indexer.key_ty,
                        CountContext::Arg,
                        false,
                    );
                }
            }
            Type::Union(_) if is_optional(&self.module.internal_types, expr_ty) => {
                self.report(
                    index.span,
                    TypeErrorData::OptionalValueAccess { optional: expr_ty },
                );
            }
            _ => {}
        }
    }

    pub(crate) fn visit_function_expr(&mut self, func: &FunctionExpr) {
        let pushed = self.push_node_scope(func.node_id);

        self.visit_generic_names(&func.generics, &func.generic_packs);

        let inferred = self
            .module
            .ast_types
            .get(&func.node_id)
            .copied()
            .map(|ty| follow(&self.module.internal_types, ty));
        if let Some(inferred) = inferred {
            self.function_decl_stack.push(inferred);
            self.check_function_annotations(func, inferred);
        }

        self.visit_block(&func.body);

        if inferred.is_some() {
            self.function_decl_stack.pop();
        }
        if pushed {
            self.stack.pop();
        }
    }

    /// The inferred function type must agree with explicit parameter
    /// annotations.
    fn check_function_annotations(&mut self, func: &FunctionExpr, inferred: TypeId) {
        let builtins = *self.builtins;
        let Some(norm) =
            self.normalizer
                .normalize(&self.module.internal_types, &builtins, inferred)
        else {
            self.report(func.span, TypeErrorData::CodeTooComplex);
            return;
        };

        if norm.errors != builtins.never_type {
            return;
        }
        if norm.functions.parts.len() != 1 {
            // Inference gave this lambda a non-function or overloaded shape;
            // there is nothing meaningful to compare annotations against.
            return;
        }

        let part = norm.functions.parts[0];
        let Type::Function(inferred_fn) = self.module.internal_types.get(part).clone() else {
            return;
        };

        let (mut arg_types, _) = flatten(&self.module.internal_types, inferred_fn.arg_types);
        // There is no way to write an annotation for self, so nothing checks it
        if func.self_param.is_some() && !arg_types.is_empty() {
            arg_types.remove(0);
        }

        for (param, &inferred_arg) in func.params.iter().zip(arg_types.iter()) {
            let Some(annotation) = &param.annotation else {
                continue;
            };
            let annotated = self.lookup_annotation(annotation);
            if !self.is_subtype(inferred_arg, annotated, false) {
                self.report(
                    param.span,
                    TypeErrorData::TypeMismatch {
                        expected: annotated,
                        actual: inferred_arg,
                    },
                );
            }
        }

        if let Some(return_annotation) = &func.return_annotation {
            for annot in &return_annotation.types {
                self.visit_annotation(annot);
            }
        }
        if let Some(vararg_annotation) = &func.vararg_annotation {
            self.visit_pack_annotation(vararg_annotation);
        }
        for param in &func.params {
            if let Some(annotation) = &param.annotation {
                self.visit_annotation(annotation);
            }
        }
    }

    fn visit_table(&mut self, table: &TableExpr) {
        for item in &table.items {
            if let TableItemKind::General { key } = &item.kind {
                self.visit_expr(key, ValueContext::LValue);
            }
            self.visit_expr(&item.value, ValueContext::RValue);
        }
    }

    /// `expr :: T` passes if either direction of subtyping holds.
    fn visit_type_assertion(&mut self, assertion: &TypeAssertionExpr) {
        self.visit_expr(&assertion.expr, ValueContext::RValue);
        self.visit_annotation(&assertion.annotation);

        let annotation_ty = self.lookup_annotation(&assertion.annotation);
        let computed_ty = self.lookup_type(&assertion.expr);

        // Try the narrowing direction first; it is the more likely cast.
        if self.is_subtype(annotation_ty, computed_ty, true) {
            return;
        }
        if self.is_subtype(computed_ty, annotation_ty, true) {
            return;
        }

        self.report(
            assertion.span,
            TypeErrorData::TypesAreUnrelated {
                left: computed_ty,
                right: annotation_ty,
            },
        );
    }
}
