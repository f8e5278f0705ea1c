// src/check/stmt.rs
//
// Statement checking. Scope stack discipline: a scope attached to the node
// is pushed for the duration of the visit.

use smallvec::smallvec;

use crate::check::{TypeChecker, ValueContext};
use crate::errors::{CountContext, TypeErrorData};
use crate::sema::pack::{extend_type_pack, flatten};
use crate::sema::scope::BindingKey;
use crate::sema::types::{
    FunctionType, Type, TypeId, TypePackId, follow, is_optional,
};
use crate::syntax::ast::*;

impl<'a> TypeChecker<'a> {
    pub(crate) fn visit_block(&mut self, block: &Block) {
        let pushed = self.push_node_scope(block.node_id);
        for stmt in &block.body {
            if !self.check_budget() {
                break;
            }
            self.visit_stmt(stmt);
        }
        if pushed {
            self.stack.pop();
        }
    }

    pub(crate) fn visit_stmt(&mut self, stmt: &Stmt) {
        let pushed = self.push_node_scope(stmt.node_id());

        match stmt {
            Stmt::Block(block) => self.visit_block(block),
            Stmt::If(stmt) => self.visit_if(stmt),
            Stmt::While(stmt) => self.visit_while(stmt),
            Stmt::Repeat(stmt) => self.visit_repeat(stmt),
            Stmt::Break(_) | Stmt::Continue(_) => {}
            Stmt::Return(stmt) => self.visit_return(stmt),
            Stmt::Expr(stmt) => self.visit_expr(&stmt.expr, ValueContext::RValue),
            Stmt::Local(stmt) => self.visit_local(stmt),
            Stmt::For(stmt) => self.visit_numeric_for(stmt),
            Stmt::ForIn(stmt) => self.visit_generic_for(stmt),
            Stmt::Assign(stmt) => self.visit_assign(stmt),
            Stmt::CompoundAssign(stmt) => self.visit_compound_assign(stmt),
            Stmt::Function(stmt) => {
                self.visit_expr(&stmt.name, ValueContext::LValue);
                self.visit_function_expr(&stmt.func);
            }
            Stmt::LocalFunction(stmt) => self.visit_function_expr(&stmt.func),
            Stmt::TypeAlias(stmt) => {
                self.visit_generic_names(&stmt.generics, &stmt.generic_packs);
                self.visit_annotation(&stmt.ty);
            }
            Stmt::Error(stmt) => {
                for expr in &stmt.expressions {
                    self.visit_expr(expr, ValueContext::RValue);
                }
                for stmt in &stmt.statements {
                    self.visit_stmt(stmt);
                }
            }
        }

        if pushed {
            self.stack.pop();
        }
    }

    fn visit_if(&mut self, stmt: &IfStmt) {
        self.visit_expr(&stmt.condition, ValueContext::RValue);
        self.visit_block(&stmt.then_body);
        if let Some(else_body) = &stmt.else_body {
            self.visit_stmt(else_body);
        }
    }

    fn visit_while(&mut self, stmt: &WhileStmt) {
        self.visit_expr(&stmt.condition, ValueContext::RValue);
        self.visit_block(&stmt.body);
    }

    fn visit_repeat(&mut self, stmt: &RepeatStmt) {
        self.visit_block(&stmt.body);
        self.visit_expr(&stmt.condition, ValueContext::RValue);
    }

    fn visit_return(&mut self, stmt: &ReturnStmt) {
        let scope = self.module.scopes.find_innermost_scope(stmt.span);
        if let Some(expected) = self.module.scopes.return_pack(scope) {
            let actual = self.reconstruct_pack(&stmt.list);
            let (actual_head, actual_tail) = flatten(&self.module.internal_types, actual);
            let (expected_head, expected_tail) = flatten(&self.module.internal_types, expected);

            // Leading values pair one-to-one with returned expressions, so
            // mismatches land on the offending expression.
            let paired = actual_head.len().min(expected_head.len());
            for i in 0..paired {
                let span = stmt.list.get(i).map(Expr::span).unwrap_or(stmt.span);
                self.try_unify(span, actual_head[i], expected_head[i], CountContext::Return, true);
            }

            // Counts and tails settle on the remainders at the statement
            if actual_head.len() != expected_head.len()
                || actual_tail.is_some()
                || expected_tail.is_some()
            {
                let actual_rest: smallvec::SmallVec<[TypeId; 4]> =
                    actual_head[paired..].iter().copied().collect();
                let expected_rest: smallvec::SmallVec<[TypeId; 4]> =
                    expected_head[paired..].iter().copied().collect();
                let actual_rest = self.module.internal_types.list_pack(actual_rest, actual_tail);
                let expected_rest = self
                    .module
                    .internal_types
                    .list_pack(expected_rest, expected_tail);
                self.try_unify_packs(
                    stmt.span,
                    actual_rest,
                    expected_rest,
                    CountContext::Return,
                    true,
                );
            }
        }

        for expr in &stmt.list {
            self.visit_expr(expr, ValueContext::RValue);
        }
    }

    fn visit_local(&mut self, stmt: &LocalStmt) {
        let count = stmt.vars.len().max(stmt.values.len());
        for i in 0..count {
            let value = stmt.values.get(i);
            let is_pack = value.map(Expr::is_multi_value).unwrap_or(false);

            if let Some(value) = value {
                self.visit_expr(value, ValueContext::RValue);
            }

            if i + 1 != stmt.values.len() || !is_pack {
                let Some(var) = stmt.vars.get(i) else {
                    continue;
                };
                if let Some(annotation) = &var.annotation {
                    let annotation_ty = self.lookup_annotation(annotation);
                    if let Some(value) = value {
                        let value_ty = self.lookup_type(value);
                        self.try_unify(
                            value.span(),
                            value_ty,
                            annotation_ty,
                            CountContext::Arg,
                            false,
                        );
                    }
                    self.visit_annotation(annotation);
                }
            } else if let Some(value) = value {
                // Trailing call or varargs: the pack covers the remaining vars
                let value_pack = self.lookup_pack(value);
                let wanted = stmt.vars.len() - i;
                let builtins = *self.builtins;
                let expanded = extend_type_pack(
                    &mut self.module.internal_types,
                    &builtins,
                    value_pack,
                    wanted,
                );

                let mut error_span = stmt.span;
                for (j, var) in stmt.vars.iter().enumerate().skip(i) {
                    let Some(&value_ty) = expanded.head.get(j - i) else {
                        error_span = var.span;
                        break;
                    };
                    if let Some(annotation) = &var.annotation {
                        let annotation_ty = self.lookup_annotation(annotation);
                        self.try_unify(
                            value.span(),
                            value_ty,
                            annotation_ty,
                            CountContext::Arg,
                            false,
                        );
                        self.visit_annotation(annotation);
                    }
                }

                if expanded.head.len() < wanted {
                    // The trailing expression is not worth one value; it is
                    // worth however many the pack expanded to.
                    let context = if matches!(value, Expr::Call(_)) {
                        CountContext::FunctionResult
                    } else {
                        CountContext::ExprListResult
                    };
                    self.report(
                        error_span,
                        TypeErrorData::CountMismatch {
                            expected: stmt.values.len() - 1 + expanded.head.len(),
                            expected_variadic: false,
                            actual: stmt.vars.len(),
                            context,
                        },
                    );
                }
            }
        }
    }

    fn visit_numeric_for(&mut self, stmt: &NumericForStmt) {
        if let Some(annotation) = &stmt.var.annotation {
            self.visit_annotation(annotation);
            let annotation_ty = self.lookup_annotation(annotation);
            let number = self.builtins.number_type;
            self.try_unify(stmt.var.span, number, annotation_ty, CountContext::Arg, false);
        }

        let number = self.builtins.number_type;
        let mut check_number = |checker: &mut Self, expr: &Expr| {
            checker.visit_expr(expr, ValueContext::RValue);
            let ty = checker.lookup_type(expr);
            checker.try_unify(expr.span(), ty, number, CountContext::Arg, false);
        };

        check_number(self, &stmt.from);
        check_number(self, &stmt.to);
        if let Some(step) = &stmt.step {
            check_number(self, step);
        }

        self.visit_block(&stmt.body);
    }

    fn visit_generic_for(&mut self, stmt: &GenericForStmt) {
        for var in &stmt.vars {
            if let Some(annotation) = &var.annotation {
                self.visit_annotation(annotation);
            }
        }
        for value in &stmt.values {
            self.visit_expr(value, ValueContext::RValue);
        }
        self.visit_block(&stmt.body);

        // Rule out crazy stuff. Maybe possible if the file is not
        // syntactically valid.
        if stmt.vars.is_empty() || stmt.values.is_empty() {
            return;
        }

        let body_scope = self
            .module
            .ast_scopes
            .get(&stmt.body.node_id)
            .copied()
            .unwrap_or_else(|| self.scope());

        let mut variable_types: Vec<TypeId> = Vec::with_capacity(stmt.vars.len());
        for var in &stmt.vars {
            let ty = self
                .module
                .scopes
                .lookup(body_scope, &BindingKey::Local(var.node_id))
                .or_else(|| {
                    var.annotation
                        .as_ref()
                        .and_then(|a| self.module.ast_resolved_types.get(&a.node_id()).copied())
                })
                .unwrap_or(self.builtins.any_type);
            variable_types.push(ty);
        }

        let first_value = &stmt.values[0];

        // Build the typepack for the iterator/value portion of the loop.
        let mut value_types: Vec<TypeId> = Vec::new();
        let mut iterator_tail: Option<TypePackId> = None;

        if let Some(ret_pack) = self.find_pack(first_value) {
            let (head, tail) = flatten(&self.module.internal_types, ret_pack);
            value_types = head;
            iterator_tail = tail;
        } else {
            value_types.push(self.lookup_type(first_value));
        }

        // If the initial and expected iterator types met during inference, a
        // resolved type is stored; use it when the iterator is directly
        // present or when an iterator state constrains us.
        if let Some(&resolved) = self
            .module
            .ast_overload_resolved_types
            .get(&first_value.node_id())
        {
            if self.find_pack(first_value).is_none() || value_types.len() > 1 {
                if !value_types.is_empty() {
                    value_types[0] = resolved;
                }
            }
        }

        for value in stmt.values.iter().skip(1).take(stmt.values.len().saturating_sub(2)) {
            value_types.push(self.lookup_type(value));
        }

        if stmt.values.len() > 1 {
            let last_pack = self.lookup_pack(&stmt.values[stmt.values.len() - 1]);
            let (head, tail) = flatten(&self.module.internal_types, last_pack);
            value_types.extend(head);
            iterator_tail = tail;
        }

        let builtins = *self.builtins;
        let iterator_pack = self
            .module
            .internal_types
            .list_pack(value_types.into_iter().collect::<smallvec::SmallVec<[TypeId; 4]>>(), iterator_tail);

        // Expand out to the three iteration values, if possible
        let iterator_types = extend_type_pack(
            &mut self.module.internal_types,
            &builtins,
            iterator_pack,
            3,
        );
        if iterator_types.head.is_empty() {
            self.report(
                values_span(stmt),
                TypeErrorData::GenericError {
                    message: "for..in loops require at least one value to iterate over.  Got zero"
                        .to_string(),
                },
            );
            return;
        }
        let iterator_ty = follow(&self.module.internal_types, iterator_types.head[0]);

        match self.module.internal_types.get(iterator_ty).clone() {
            Type::Function(next_fn) => {
                self.check_for_in_function(
                    stmt,
                    &variable_types,
                    &next_fn,
                    &iterator_types.head,
                    false,
                );
            }
            Type::Table(table) => {
                if (stmt.vars.len() == 1 || stmt.vars.len() == 2)
                    && let Some(indexer) = table.indexer
                {
                    self.try_unify(
                        stmt.vars[0].span,
                        variable_types[0],
                        indexer.key_ty,
                        CountContext::Arg,
                        false,
                    );
                    if variable_types.len() == 2 {
                        self.try_unify(
                            stmt.vars[1].span,
                            variable_types[1],
                            indexer.value_ty,
                            CountContext::Arg,
                            false,
                        );
                    }
                } else {
                    self.report(
                        stmt.values[0].span(),
                        TypeErrorData::GenericError {
                            message: "Cannot iterate over a table without indexer".to_string(),
                        },
                    );
                }
            }
            Type::Any | Type::Error | Type::Never => {}
            _ if is_optional(&self.module.internal_types, iterator_ty) => {
                self.report(
                    stmt.values[0].span(),
                    TypeErrorData::OptionalValueAccess {
                        optional: iterator_ty,
                    },
                );
            }
            _ => {
                if let Some(iter_mm) = self.find_metatable_entry(iterator_ty, "__iter") {
                    self.check_for_in_iter_metamethod(stmt, &variable_types, iterator_ty, iter_mm);
                } else {
                    self.report(
                        stmt.values[0].span(),
                        TypeErrorData::CannotCallNonFunction { ty: iterator_ty },
                    );
                }
            }
        }
    }

    /// The `__iter` path: call the metamethod, then recurse on its returns
    /// as `(next, state, initial)`.
    fn check_for_in_iter_metamethod(
        &mut self,
        stmt: &GenericForStmt,
        variable_types: &[TypeId],
        iterator_ty: TypeId,
        iter_mm: TypeId,
    ) {
        let Some(instantiated) = self.instantiate(iter_mm) else {
            self.report(stmt.values[0].span(), TypeErrorData::UnificationTooComplex);
            return;
        };

        let Type::Function(mm_fn) = self.module.internal_types.get(instantiated).clone() else {
            self.report(
                stmt.values[0].span(),
                TypeErrorData::CannotCallNonFunction { ty: iter_mm },
            );
            return;
        };

        // __iter receives the iterated value itself
        let arg_pack = self
            .module
            .internal_types
            .list_pack(smallvec![iterator_ty], None);
        self.try_unify_packs(
            stmt.values[0].span(),
            arg_pack,
            mm_fn.arg_types,
            CountContext::Arg,
            false,
        );

        let builtins = *self.builtins;
        let mm_returns = extend_type_pack(
            &mut self.module.internal_types,
            &builtins,
            mm_fn.ret_types,
            3,
        );
        if mm_returns.head.is_empty() {
            self.report(
                stmt.values[0].span(),
                TypeErrorData::GenericError {
                    message: "__iter must return at least one value".to_string(),
                },
            );
            return;
        }

        let next_fn = follow(&self.module.internal_types, mm_returns.head[0]);
        let Some(instantiated_next) = self.instantiate(next_fn) else {
            self.report(stmt.values[0].span(), TypeErrorData::UnificationTooComplex);
            return;
        };

        let mut iterator_types = mm_returns.head.clone();
        iterator_types[0] = instantiated_next;

        match self.module.internal_types.get(instantiated_next).clone() {
            Type::Function(next_fn) => {
                self.check_for_in_function(stmt, variable_types, &next_fn, &iterator_types, true);
            }
            _ => {
                self.report(
                    stmt.values[0].span(),
                    TypeErrorData::CannotCallNonFunction {
                        ty: instantiated_next,
                    },
                );
            }
        }
    }

    /// Check an iterator triple `(next, state, initial)` against the loop's
    /// declared variables.
    fn check_for_in_function(
        &mut self,
        stmt: &GenericForStmt,
        variable_types: &[TypeId],
        next_fn: &FunctionType,
        iterator_types: &[TypeId],
        is_metamethod: bool,
    ) {
        let builtins = *self.builtins;

        if iterator_types.is_empty() || iterator_types.len() > 3 {
            let message = if is_metamethod {
                "__iter metamethod must return (next[, table[, state]])"
            } else {
                "for..in loops must be passed (next[, table[, state]])"
            };
            self.report(
                values_span(stmt),
                TypeErrorData::GenericError {
                    message: message.to_string(),
                },
            );
            return;
        }

        // It is okay if there aren't enough iterators, but the iteratee must
        // provide enough.
        let expected_variable_types = extend_type_pack(
            &mut self.module.internal_types,
            &builtins,
            next_fn.ret_types,
            variable_types.len(),
        );
        if expected_variable_types.head.len() < variable_types.len() {
            let message = if is_metamethod {
                "__iter metamethod's next() function does not return enough values"
            } else {
                "next() does not return enough values"
            };
            self.report(
                stmt.values[0].span(),
                TypeErrorData::GenericError {
                    message: message.to_string(),
                },
            );
        }

        for (i, (&var_ty, &expected)) in variable_types
            .iter()
            .zip(expected_variable_types.head.iter())
            .enumerate()
        {
            self.try_unify(stmt.vars[i].span, var_ty, expected, CountContext::Arg, false);
        }

        // If the iteratee is an error type, we can't say anything else about
        // iteration over it. After all, it could've been a table.
        let first_arg = self.flatten_pack_to_type(next_fn.arg_types);
        if matches!(
            self.module.internal_types.get(follow(&self.module.internal_types, first_arg)),
            Type::Error
        ) {
            return;
        }

        let flattened_arg_types = extend_type_pack(
            &mut self.module.internal_types,
            &builtins,
            next_fn.arg_types,
            2,
        );
        let min_count = crate::sema::pack::pack_size(&self.module.internal_types, next_fn.arg_types);
        let first_iteration_arg_count = iterator_types.len().saturating_sub(1);

        if first_iteration_arg_count < min_count && crate::sema::pack::finite(&self.module.internal_types, next_fn.arg_types) {
            if is_metamethod {
                self.report(
                    values_span(stmt),
                    TypeErrorData::GenericError {
                        message: "__iter metamethod must return (next[, table[, state]])"
                            .to_string(),
                    },
                );
            } else {
                self.report(
                    stmt.values[0].span(),
                    TypeErrorData::CountMismatch {
                        expected: 2,
                        expected_variadic: false,
                        actual: first_iteration_arg_count,
                        context: CountContext::Arg,
                    },
                );
            }
        }

        // The state argument feeds next()'s first parameter, the initial
        // value its second.
        if iterator_types.len() >= 2 && !flattened_arg_types.head.is_empty() {
            let value_index = if stmt.values.len() > 1 { 1 } else { 0 };
            self.try_unify(
                stmt.values[value_index].span(),
                iterator_types[1],
                flattened_arg_types.head[0],
                CountContext::Arg,
                false,
            );
        }

        if iterator_types.len() == 3 && flattened_arg_types.head.len() > 1 {
            let value_index = if stmt.values.len() > 2 { 2 } else { 0 };
            self.try_unify(
                stmt.values[value_index].span(),
                iterator_types[2],
                flattened_arg_types.head[1],
                CountContext::Arg,
                false,
            );
        }
    }

    fn visit_assign(&mut self, stmt: &AssignStmt) {
        let count = stmt.vars.len().min(stmt.values.len());
        for i in 0..count {
            let lhs = &stmt.vars[i];
            self.visit_expr(lhs, ValueContext::LValue);
            let lhs_ty = self.lookup_type(lhs);

            let rhs = &stmt.values[i];
            self.visit_expr(rhs, ValueContext::RValue);
            let rhs_ty = self.lookup_type(rhs);

            if matches!(
                self.module.internal_types.get(lhs_ty),
                Type::Never
            ) {
                continue;
            }

            if !self.is_subtype(rhs_ty, lhs_ty, false) {
                self.report(
                    rhs.span(),
                    TypeErrorData::TypeMismatch {
                        expected: lhs_ty,
                        actual: rhs_ty,
                    },
                );
            }
        }
    }

    /// `a op= b` checks as `a = a op b`, then the synthesized result must fit
    /// the target. The fake binary node reuses the statement's node id so the
    /// stored overload resolution is found.
    fn visit_compound_assign(&mut self, stmt: &CompoundAssignStmt) {
        let fake = BinaryExpr {
            node_id: stmt.node_id,
            op: stmt.op,
            left: Box::new(stmt.var.clone()),
            right: Box::new(stmt.value.clone()),
            span: stmt.span,
        };
        let result_ty = self.visit_binary(&fake);
        let var_ty = self.lookup_type(&stmt.var);
        self.try_unify(stmt.span, result_ty, var_ty, CountContext::Arg, false);
    }

    pub(crate) fn visit_generic_names(&mut self, generics: &[GenericName], packs: &[GenericName]) {
        let mut seen: rustc_hash::FxHashSet<crate::syntax::intern::Symbol> =
            rustc_hash::FxHashSet::default();

        for g in generics.iter().chain(packs) {
            if !seen.insert(g.name) {
                let name = self.str(g.name).to_string();
                self.report(g.span, TypeErrorData::DuplicateGenericParameter { name });
            }
            if let Some(default) = &g.default {
                self.visit_annotation(default);
            }
        }
    }
}

fn values_span(stmt: &GenericForStmt) -> crate::syntax::span::Span {
    let first = stmt.values.first().map(Expr::span).unwrap_or(stmt.span);
    let last = stmt.values.last().map(Expr::span).unwrap_or(stmt.span);
    first.merge(last)
}
