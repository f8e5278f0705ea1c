// src/check/ops.rs
//
// Unary and binary operator checking, including metamethod dispatch. For
// `>` and `>=` the `__lt`/`__le` metamethods run with swapped arguments, and
// comparison metamethods must come back boolean.

use rustc_hash::FxHashSet;
use smallvec::smallvec;

use crate::check::{TypeChecker, ValueContext, identifier_of_base_var};
use crate::errors::{BinaryOpKind, CountContext, TypeErrorData};
use crate::sema::pack::first_type;
use crate::sema::type_display::display_type;
use crate::sema::types::{
    FunctionType, Type, TypeId, follow, get_metatable, is_boolean, is_optional, is_string,
};
use crate::syntax::ast::*;

fn unary_metamethod(op: UnaryOp) -> Option<&'static str> {
    match op {
        UnaryOp::Minus => Some("__unm"),
        UnaryOp::Len => Some("__len"),
        UnaryOp::Not => None,
    }
}

fn binary_metamethod(op: BinaryOp) -> Option<&'static str> {
    match op {
        BinaryOp::Add => Some("__add"),
        BinaryOp::Sub => Some("__sub"),
        BinaryOp::Mul => Some("__mul"),
        BinaryOp::Div => Some("__div"),
        BinaryOp::Mod => Some("__mod"),
        BinaryOp::Pow => Some("__pow"),
        BinaryOp::Concat => Some("__concat"),
        BinaryOp::CompareEq | BinaryOp::CompareNe => Some("__eq"),
        BinaryOp::CompareLt | BinaryOp::CompareGt => Some("__lt"),
        BinaryOp::CompareLe | BinaryOp::CompareGe => Some("__le"),
        BinaryOp::And | BinaryOp::Or => None,
    }
}

impl<'a> TypeChecker<'a> {
    pub(crate) fn visit_unary(&mut self, expr: &UnaryExpr) {
        self.visit_expr(&expr.expr, ValueContext::RValue);

        let operand_ty = self.lookup_type(&expr.expr);
        let result_ty = self.lookup_node_type(expr.node_id, expr.span);

        if matches!(
            self.module.internal_types.get(operand_ty),
            Type::Any | Type::Error | Type::Never
        ) {
            return;
        }

        if let Some(mm_name) = unary_metamethod(expr.op) {
            if let Some(mm) = self.find_metatable_entry(operand_ty, mm_name) {
                let mm = follow(&self.module.internal_types, mm);
                if let Type::Function(ftv) = self.module.internal_types.get(mm).clone() {
                    match first_type(&self.module.internal_types, ftv.ret_types, false) {
                        Some(ret) => {
                            if expr.op == UnaryOp::Len {
                                let ret = follow(&self.module.internal_types, ret);
                                let number = self.builtins.number_type;
                                self.try_unify(expr.span, ret, number, CountContext::Arg, false);
                            }
                        }
                        None => {
                            self.report(
                                expr.span,
                                TypeErrorData::GenericError {
                                    message: format!("Metamethod '{}' must return a value", mm_name),
                                },
                            );
                        }
                    }

                    let Some(first_arg) =
                        first_type(&self.module.internal_types, ftv.arg_types, false)
                    else {
                        self.report(
                            expr.span,
                            TypeErrorData::GenericError {
                                message: format!(
                                    "Metamethod '{}' must accept one argument",
                                    mm_name
                                ),
                            },
                        );
                        return;
                    };

                    let expected = self
                        .module
                        .internal_types
                        .function(smallvec![operand_ty], smallvec![result_ty]);
                    let before = self.module.errors.len();
                    self.try_unify(expr.span, mm, expected, CountContext::Arg, false);
                    if self.module.errors.len() != before {
                        self.module.errors.truncate(before);
                        self.report(
                            expr.span,
                            TypeErrorData::TypeMismatch {
                                expected: first_arg,
                                actual: operand_ty,
                            },
                        );
                    }
                }
                return;
            }
        }

        match expr.op {
            UnaryOp::Len => {
                let mut seen = FxHashSet::default();
                if !self.has_length(operand_ty, &mut seen, 0) {
                    if is_optional(&self.module.internal_types, operand_ty) {
                        self.report(
                            expr.span,
                            TypeErrorData::OptionalValueAccess {
                                optional: operand_ty,
                            },
                        );
                    } else {
                        self.report(expr.span, TypeErrorData::NotATable { ty: operand_ty });
                    }
                }
            }
            UnaryOp::Minus => {
                let number = self.builtins.number_type;
                self.try_unify(expr.span, operand_ty, number, CountContext::Arg, false);
            }
            UnaryOp::Not => {}
        }
    }

    fn has_length(&self, ty: TypeId, seen: &mut FxHashSet<TypeId>, depth: u32) -> bool {
        if depth > 64 {
            return true;
        }
        let arena = &self.module.internal_types;
        let ty = follow(arena, ty);
        if !seen.insert(ty) {
            return true;
        }

        match arena.get(ty) {
            Type::Any | Type::Error | Type::Never | Type::Unknown => true,
            Type::Table(_) | Type::Metatable { .. } => true,
            Type::Primitive(crate::sema::types::PrimitiveKind::String) => true,
            Type::Singleton(crate::sema::types::SingletonValue::Str(_)) => true,
            Type::Union(options) => options
                .iter()
                .all(|&opt| self.has_length(opt, seen, depth + 1)),
            Type::Intersection(parts) => parts
                .iter()
                .any(|&part| self.has_length(part, seen, depth + 1)),
            _ => false,
        }
    }

    /// Check a binary expression and produce its result type (compound
    /// assignment consumes it).
    pub(crate) fn visit_binary(&mut self, expr: &BinaryExpr) -> TypeId {
        self.visit_expr(&expr.left, ValueContext::LValue);
        self.visit_expr(&expr.right, ValueContext::LValue);

        let is_equality = expr.op.is_equality();
        let is_comparison = expr.op.is_comparison();
        let is_logical = expr.op.is_logical();

        let mut left_ty = self.lookup_type(&expr.left);
        let mut right_ty = self.lookup_type(&expr.right);
        let expected_result = self.lookup_node_type(expr.node_id, expr.span);

        if matches!(
            self.module.internal_types.get(expected_result),
            Type::FamilyInstance(_)
        ) {
            self.check_for_internal_family(expected_result, expr.span);
            return expected_result;
        }

        if expr.op == BinaryOp::Or {
            if let Some(stripped) = self.try_strip_union_from_nil(left_ty) {
                left_ty = follow(&self.module.internal_types, stripped);
            }
        }

        let is_string_operation = is_string(&self.module.internal_types, left_ty)
            && is_string(&self.module.internal_types, right_ty);

        if matches!(
            self.module.internal_types.get(left_ty),
            Type::Any | Type::Error | Type::Never
        ) {
            return left_ty;
        }
        if matches!(
            self.module.internal_types.get(right_ty),
            Type::Any | Type::Error | Type::Never
        ) {
            return right_ty;
        }

        if matches!(
            self.module.internal_types.get(left_ty),
            Type::Blocked { .. } | Type::Free { .. } | Type::Generic { .. }
        ) && !is_equality
            && !is_logical
        {
            let suggested_name = identifier_of_base_var(self.source, &expr.left);
            self.report(
                expr.span,
                TypeErrorData::CannotInferBinaryOperation {
                    op: expr.op,
                    suggested_name,
                    kind: if is_comparison {
                        BinaryOpKind::Comparison
                    } else {
                        BinaryOpKind::Operation
                    },
                },
            );
            return left_ty;
        }

        if let Some(mm_name) = binary_metamethod(expr.op) {
            let builtins = *self.builtins;
            let types_have_intersection = self.normalizer.is_intersection_inhabited(
                &self.module.internal_types,
                &builtins,
                left_ty,
                right_ty,
            );

            let string_mt = self.globals.string_metatable;
            let left_mt = get_metatable(&self.module.internal_types, left_ty, string_mt);
            let right_mt = get_metatable(&self.module.internal_types, right_ty, string_mt);
            let mut matches = left_mt == right_mt;

            if is_equality && !matches {
                // A union operand matches when any option shares the other
                // side's metatable.
                let arena = &self.module.internal_types;
                if let Type::Union(options) = arena.get(left_ty)
                    && right_mt.is_some()
                {
                    matches = options.iter().any(|&opt| {
                        get_metatable(arena, follow(arena, opt), string_mt) == right_mt
                    });
                }
                if !matches
                    && let Type::Union(options) = arena.get(right_ty)
                    && left_mt.is_some()
                {
                    matches = options.iter().any(|&opt| {
                        get_metatable(arena, follow(arena, opt), string_mt) == left_mt
                    });
                }

                // With a metatable missing on either side, equality is still
                // meaningful when the types share inhabitants.
                if left_mt.is_none() || right_mt.is_none() {
                    matches = matches || types_have_intersection;
                }
            }

            if !matches && is_comparison {
                let message = format!(
                    "Types {} and {} cannot be compared with {} because they do not have the same metatable",
                    display_type(&self.module.internal_types, left_ty),
                    display_type(&self.module.internal_types, right_ty),
                    expr.op.token(),
                );
                self.report(expr.span, TypeErrorData::GenericError { message });
                return self.builtins.error_recovery_type();
            }

            let mut mm = self.find_metatable_entry(left_ty, mm_name);
            if mm.is_none() {
                if let Some(right_mm) = self.find_metatable_entry(right_ty, mm_name) {
                    mm = Some(right_mm);
                    std::mem::swap(&mut left_ty, &mut right_ty);
                }
            }

            if let Some(mm) = mm {
                let Some(&instantiated_mm) = self
                    .module
                    .ast_overload_resolved_types
                    .get(&expr.node_id)
                else {
                    // Handled by a type family during inference
                    return expected_result;
                };

                let instantiated_mm = follow(&self.module.internal_types, instantiated_mm);
                let ftv = match self.module.internal_types.get(instantiated_mm).clone() {
                    Type::Function(f) => f,
                    _ => {
                        self.report(
                            expr.span,
                            TypeErrorData::CannotCallNonFunction { ty: mm },
                        );
                        return self.builtins.error_recovery_type();
                    }
                };

                return self.check_metamethod_call(expr, mm_name, mm, &ftv, left_ty, right_ty);
            }

            // No metamethod. String comparisons and concatenation fall
            // through to primitive behavior; everything else with a stray
            // metatable is an error.
            if !is_equality
                && !(is_string_operation && (expr.op == BinaryOp::Concat || is_comparison))
            {
                let left_has_mt =
                    left_mt.is_some() && !is_string(&self.module.internal_types, left_ty);
                let right_has_mt =
                    right_mt.is_some() && !is_string(&self.module.internal_types, right_ty);

                if left_has_mt || right_has_mt {
                    let message = if is_comparison {
                        format!(
                            "Types '{}' and '{}' cannot be compared with {} because neither type's metatable has a '{}' metamethod",
                            display_type(&self.module.internal_types, left_ty),
                            display_type(&self.module.internal_types, right_ty),
                            expr.op.token(),
                            mm_name,
                        )
                    } else {
                        format!(
                            "Operator {} is not applicable for '{}' and '{}' because neither type's metatable has a '{}' metamethod",
                            expr.op.token(),
                            display_type(&self.module.internal_types, left_ty),
                            display_type(&self.module.internal_types, right_ty),
                            mm_name,
                        )
                    };
                    self.report(expr.span, TypeErrorData::GenericError { message });
                    return self.builtins.error_recovery_type();
                }

                let arena = &self.module.internal_types;
                let either_table = matches!(arena.get(left_ty), Type::Table(_))
                    || matches!(arena.get(right_ty), Type::Table(_));
                if left_mt.is_none() && right_mt.is_none() && either_table {
                    let message = if is_comparison {
                        format!(
                            "Types '{}' and '{}' cannot be compared with {} because neither type has a metatable",
                            display_type(&self.module.internal_types, left_ty),
                            display_type(&self.module.internal_types, right_ty),
                            expr.op.token(),
                        )
                    } else {
                        format!(
                            "Operator {} is not applicable for '{}' and '{}' because neither type has a metatable",
                            expr.op.token(),
                            display_type(&self.module.internal_types, left_ty),
                            display_type(&self.module.internal_types, right_ty),
                        )
                    };
                    self.report(expr.span, TypeErrorData::GenericError { message });
                    return self.builtins.error_recovery_type();
                }
            }
        }

        match expr.op {
            BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::Pow
            | BinaryOp::Mod => {
                let number = self.builtins.number_type;
                self.try_unify(expr.left.span(), left_ty, number, CountContext::Arg, false);
                self.try_unify(expr.right.span(), right_ty, number, CountContext::Arg, false);
                number
            }
            BinaryOp::Concat => {
                let string = self.builtins.string_type;
                self.try_unify(expr.left.span(), left_ty, string, CountContext::Arg, false);
                self.try_unify(expr.right.span(), right_ty, string, CountContext::Arg, false);
                string
            }
            BinaryOp::CompareGe | BinaryOp::CompareGt | BinaryOp::CompareLe | BinaryOp::CompareLt => {
                // Relational operators work on numbers or on strings; the
                // normalized left operand decides which.
                let builtins = *self.builtins;
                let norm = self.normalizer.normalize(
                    &self.module.internal_types,
                    &builtins,
                    left_ty,
                );
                match norm {
                    Some(norm) if norm.is_exactly_number(&builtins) => {
                        let number = self.builtins.number_type;
                        self.try_unify(
                            expr.right.span(),
                            right_ty,
                            number,
                            CountContext::Arg,
                            false,
                        );
                        number
                    }
                    Some(norm) if norm.is_subtype_of_string(&builtins) => {
                        let string = self.builtins.string_type;
                        self.try_unify(
                            expr.right.span(),
                            right_ty,
                            string,
                            CountContext::Arg,
                            false,
                        );
                        string
                    }
                    _ => {
                        let message = format!(
                            "Types '{}' and '{}' cannot be compared with relational operator {}",
                            display_type(&self.module.internal_types, left_ty),
                            display_type(&self.module.internal_types, right_ty),
                            expr.op.token(),
                        );
                        self.report(expr.span, TypeErrorData::GenericError { message });
                        self.builtins.error_recovery_type()
                    }
                }
            }
            // A compound assignment never carries these operators, so the
            // result type does not matter.
            BinaryOp::And | BinaryOp::Or | BinaryOp::CompareEq | BinaryOp::CompareNe => {
                self.builtins.any_type
            }
        }
    }

    /// Validate a metamethod-backed binary operation against the synthesized
    /// expected function type and produce the result.
    fn check_metamethod_call(
        &mut self,
        expr: &BinaryExpr,
        mm_name: &str,
        mm: TypeId,
        ftv: &FunctionType,
        left_ty: TypeId,
        right_ty: TypeId,
    ) -> TypeId {
        let is_comparison = expr.op.is_comparison();

        // For >= and > we invoke __lt and __le with swapped argument ordering
        let expected_args = if matches!(expr.op, BinaryOp::CompareGe | BinaryOp::CompareGt) {
            smallvec![right_ty, left_ty]
        } else {
            smallvec![left_ty, right_ty]
        };

        let expected_ret = if is_comparison {
            self.builtins.boolean_type
        } else {
            self.module
                .internal_types
                .fresh_free(crate::sema::types::TypeLevel::default())
        };

        let expected_ty = self
            .module
            .internal_types
            .function(expected_args, smallvec![expected_ret]);

        let mm = follow(&self.module.internal_types, mm);
        self.try_unify(expr.span, mm, expected_ty, CountContext::Arg, false);

        match first_type(&self.module.internal_types, ftv.ret_types, false) {
            Some(ret) => {
                let ret = follow(&self.module.internal_types, ret);
                if is_comparison {
                    if !is_boolean(&self.module.internal_types, ret) {
                        self.report(
                            expr.span,
                            TypeErrorData::GenericError {
                                message: format!(
                                    "Metamethod '{}' must return a boolean",
                                    mm_name
                                ),
                            },
                        );
                    }
                    self.builtins.boolean_type
                } else {
                    ret
                }
            }
            None => {
                let message = if is_comparison {
                    format!("Metamethod '{}' must return a boolean", mm_name)
                } else {
                    format!("Metamethod '{}' must return a value", mm_name)
                };
                self.report(expr.span, TypeErrorData::GenericError { message });
                self.builtins.error_recovery_type()
            }
        }
    }
}
