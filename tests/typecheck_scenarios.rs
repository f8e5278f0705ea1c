// tests/typecheck_scenarios.rs
//
// End-to-end validator scenarios over hand-built modules: the AST and the
// per-node type maps are constructed the way the inference engine would
// leave them, then the checker runs and the diagnostics are inspected.

mod support;

use stoat_analysis::check::check_module;
use stoat_analysis::config::{FeatureFlags, Mode, TypeCheckLimits};
use stoat_analysis::errors::{CountContext, TypeError, TypeErrorData};
use stoat_analysis::module::Module;
use stoat_analysis::sema::arena::BuiltinTypes;
use stoat_analysis::sema::builtins::GlobalTypes;
use stoat_analysis::sema::types::{
    FunctionType, Property, TableType, Type, TypeId,
};
use stoat_analysis::syntax::ast::*;
use stoat_analysis::syntax::intern::Interner;

use support::{NodeIds, source_module, span};

struct Scenario {
    builtins: BuiltinTypes,
    globals: GlobalTypes,
    module: Module,
    interner: Interner,
    ids: NodeIds,
}

impl Scenario {
    fn new(name: &str) -> Self {
        let builtins = BuiltinTypes::new();
        let globals = GlobalTypes::new(&builtins);
        let module = Module::new(name.to_string(), name.to_string(), Mode::Strict, &globals);
        Self {
            builtins,
            globals,
            module,
            interner: Interner::new(),
            ids: NodeIds::new(),
        }
    }

    fn run(mut self, root: Block) -> Vec<TypeError> {
        let source = source_module(&self.module.name.clone(), root, self.interner);
        check_module(
            &source,
            &mut self.module,
            &self.builtins,
            &self.globals,
            &FeatureFlags::default(),
            &TypeCheckLimits::default(),
        );
        self.module.errors
    }
}

/// `function f(): number return "hi" end`
/// One TypeMismatch{number, string} at the string literal.
#[test]
fn subtype_mismatch_on_return() {
    let mut sc = Scenario::new("return-mismatch");
    let b = sc.builtins;

    // The function scope carries the annotated return pack
    let root_scope = sc.module.scopes.module_scope();
    let fn_scope = sc.module.scopes.new_scope(Some(root_scope));
    let return_pack = sc
        .module
        .internal_types
        .list_pack(smallvec::smallvec![b.number_type], None);
    sc.module.scopes.get_mut(fn_scope).return_pack = Some(return_pack);
    sc.module.scopes.attach(span(0, 40), fn_scope);

    let lit_span = span(25, 29);
    let lit_id = sc.ids.fresh();
    sc.module.ast_types.insert(lit_id, b.string_type);

    let ret = Stmt::Return(ReturnStmt {
        node_id: sc.ids.fresh(),
        list: vec![Expr::Str(StringExpr {
            node_id: lit_id,
            value: "hi".into(),
            span: lit_span,
        })],
        span: span(18, 29),
    });

    let body = Block {
        node_id: sc.ids.fresh(),
        body: vec![ret],
        span: span(18, 33),
    };

    let f = sc.ids.fresh();
    let func = Stmt::LocalFunction(LocalFunctionStmt {
        node_id: sc.ids.fresh(),
        var: LocalVar {
            node_id: sc.ids.fresh(),
            name: sc.interner.intern("f"),
            annotation: None,
            span: span(0, 1),
        },
        func: FunctionExpr {
            node_id: f,
            generics: vec![],
            generic_packs: vec![],
            self_param: None,
            params: vec![],
            vararg: false,
            vararg_annotation: None,
            return_annotation: None,
            body,
            span: span(0, 40),
        },
        span: span(0, 40),
    });

    let root = Block {
        node_id: sc.ids.fresh(),
        body: vec![func],
        span: span(0, 50),
    };

    let errors = sc.run(root);
    assert_eq!(errors.len(), 1, "errors: {:?}", errors);
    assert_eq!(errors[0].span, lit_span, "mismatch must land on the literal");
    assert!(matches!(
        errors[0].data,
        TypeErrorData::TypeMismatch { expected, actual }
            if expected == b.number_type && actual == b.string_type
    ));
}

/// `local function f(a: number, b: number) return a + b end  f(1)`
/// One CountMismatch{expected 2, actual 1, Arg} at the call site.
#[test]
fn arity_failure_in_call() {
    let mut sc = Scenario::new("arity");
    let b = sc.builtins;

    let fn_ty = sc
        .module
        .internal_types
        .function(smallvec::smallvec![b.number_type, b.number_type], smallvec::smallvec![b.number_type]);

    let call_span = span(40, 44);
    let call_id = sc.ids.fresh();
    sc.module.ast_original_call_types.insert(call_id, fn_ty);
    sc.module.ast_overload_resolved_types.insert(call_id, fn_ty);

    let arg_id = sc.ids.fresh();
    sc.module.ast_types.insert(arg_id, b.number_type);

    let callee_id = sc.ids.fresh();
    sc.module.ast_types.insert(callee_id, fn_ty);

    let call = Stmt::Expr(ExprStmt {
        node_id: sc.ids.fresh(),
        expr: Expr::Call(CallExpr {
            node_id: call_id,
            func: Box::new(Expr::Local(LocalExpr {
                node_id: callee_id,
                local_id: NodeId(999),
                name: sc.interner.intern("f"),
                span: span(40, 41),
            })),
            args: vec![Expr::Number(NumberExpr {
                node_id: arg_id,
                value: 1.0,
                span: span(42, 43),
            })],
            is_method: false,
            span: call_span,
        }),
        span: call_span,
    });

    let root = Block {
        node_id: sc.ids.fresh(),
        body: vec![call],
        span: span(0, 50),
    };

    let errors = sc.run(root);
    assert_eq!(errors.len(), 1, "errors: {:?}", errors);
    assert_eq!(errors[0].span, call_span);
    assert!(matches!(
        errors[0].data,
        TypeErrorData::CountMismatch {
            expected: 2,
            actual: 1,
            context: CountContext::Arg,
            ..
        }
    ));
}

/// A table with `__iter = function(self) return next, self, nil end` where
/// `next` returns `(number, boolean)`, iterated as `for k: number, v: string
/// in t do end`. One TypeMismatch{boolean, string} at `v`.
#[test]
fn iterator_protocol_via_iter_metamethod() {
    let mut sc = Scenario::new("iter-mm");
    let b = sc.builtins;

    // next : (any, any) -> (number, boolean)
    let next_fn = sc.module.internal_types.function(
        smallvec::smallvec![b.any_type, b.any_type],
        smallvec::smallvec![b.number_type, b.boolean_type],
    );

    // The iterated table and its metatable
    let inner_table = sc
        .module
        .internal_types
        .add_type(Type::Table(TableType::sealed()));

    // __iter : (self) -> (next, self, nil)
    let iter_args = sc
        .module
        .internal_types
        .list_pack(smallvec::smallvec![b.any_type], None);
    let iter_rets = sc
        .module
        .internal_types
        .list_pack(smallvec::smallvec![next_fn, inner_table, b.nil_type], None);
    let iter_fn = sc
        .module
        .internal_types
        .add_type(Type::Function(FunctionType::new(iter_args, iter_rets)));

    let mut mt = TableType::sealed();
    mt.props.insert("__iter".into(), Property::read_only(iter_fn));
    let mt = sc.module.internal_types.add_type(Type::Table(mt));
    let iterated = sc.module.internal_types.add_type(Type::Metatable {
        table: inner_table,
        metatable: mt,
    });

    // for k: number, v: string in t do end
    let k_id = sc.ids.fresh();
    let v_id = sc.ids.fresh();
    let v_span = span(15, 16);

    let body_block_id = sc.ids.fresh();
    let root_scope = sc.module.scopes.module_scope();
    let body_scope = sc.module.scopes.new_scope(Some(root_scope));
    sc.module.scopes.attach(span(20, 30), body_scope);
    sc.module.ast_scopes.insert(body_block_id, body_scope);
    use stoat_analysis::sema::scope::BindingKey;
    sc.module
        .scopes
        .get_mut(body_scope)
        .bindings
        .insert(BindingKey::Local(k_id), b.number_type);
    sc.module
        .scopes
        .get_mut(body_scope)
        .bindings
        .insert(BindingKey::Local(v_id), b.string_type);

    let t_expr_id = sc.ids.fresh();
    sc.module.ast_types.insert(t_expr_id, iterated);

    let for_in = Stmt::ForIn(GenericForStmt {
        node_id: sc.ids.fresh(),
        vars: vec![
            LocalVar {
                node_id: k_id,
                name: sc.interner.intern("k"),
                annotation: None,
                span: span(4, 5),
            },
            LocalVar {
                node_id: v_id,
                name: sc.interner.intern("v"),
                annotation: None,
                span: v_span,
            },
        ],
        values: vec![Expr::Local(LocalExpr {
            node_id: t_expr_id,
            local_id: NodeId(998),
            name: sc.interner.intern("t"),
            span: span(18, 19),
        })],
        body: Block {
            node_id: body_block_id,
            body: vec![],
            span: span(20, 30),
        },
        span: span(0, 33),
    });

    let root = Block {
        node_id: sc.ids.fresh(),
        body: vec![for_in],
        span: span(0, 40),
    };

    let errors = sc.run(root);
    assert_eq!(errors.len(), 1, "errors: {:?}", errors);
    assert_eq!(errors[0].span, v_span, "mismatch must land on v");
    assert!(matches!(
        errors[0].data,
        TypeErrorData::TypeMismatch { expected, actual }
            if expected == b.boolean_type && actual == b.string_type
    ));
}

/// `local s: string? ; print(s:upper())`
/// One OptionalValueAccess at the method access.
#[test]
fn optional_index_access() {
    let mut sc = Scenario::new("optional");
    let b = sc.builtins;

    let optional_string = sc
        .module
        .internal_types
        .union(smallvec::smallvec![b.string_type, b.nil_type]);

    let s_decl = sc.ids.fresh();
    let s_expr_id = sc.ids.fresh();
    sc.module.ast_types.insert(s_expr_id, optional_string);

    let access_span = span(26, 35);
    let upper_call_id = sc.ids.fresh();
    let index_id = sc.ids.fresh();

    let local = Stmt::Local(LocalStmt {
        node_id: sc.ids.fresh(),
        vars: vec![LocalVar {
            node_id: s_decl,
            name: sc.interner.intern("s"),
            annotation: None,
            span: span(6, 7),
        }],
        values: vec![],
        span: span(0, 18),
    });

    let upper_call = Expr::Call(CallExpr {
        node_id: upper_call_id,
        func: Box::new(Expr::IndexName(IndexNameExpr {
            node_id: index_id,
            expr: Box::new(Expr::Local(LocalExpr {
                node_id: s_expr_id,
                local_id: s_decl,
                name: sc.interner.intern("s"),
                span: span(26, 27),
            })),
            index: sc.interner.intern("upper"),
            index_span: span(28, 33),
            span: access_span,
        })),
        args: vec![],
        is_method: true,
        span: span(26, 37),
    });

    let print_id = sc.ids.fresh();
    let print_stmt = Stmt::Expr(ExprStmt {
        node_id: sc.ids.fresh(),
        expr: Expr::Call(CallExpr {
            node_id: sc.ids.fresh(),
            func: Box::new(Expr::Global(GlobalExpr {
                node_id: print_id,
                name: sc.interner.intern("print"),
                span: span(20, 25),
            })),
            args: vec![upper_call],
            is_method: false,
            span: span(20, 38),
        }),
        span: span(20, 38),
    });

    let root = Block {
        node_id: sc.ids.fresh(),
        body: vec![local, print_stmt],
        span: span(0, 40),
    };

    let errors = sc.run(root);
    assert_eq!(errors.len(), 1, "errors: {:?}", errors);
    assert_eq!(errors[0].span, access_span);
    assert!(matches!(
        errors[0].data,
        TypeErrorData::OptionalValueAccess { .. }
    ));
}

/// Assigning a string into a number-typed lvalue reports at the rhs.
#[test]
fn assignment_requires_subtype() {
    let mut sc = Scenario::new("assign");
    let b = sc.builtins;

    let lhs_id = sc.ids.fresh();
    sc.module.ast_types.insert(lhs_id, b.number_type);
    let rhs_id = sc.ids.fresh();
    sc.module.ast_types.insert(rhs_id, b.string_type);
    let rhs_span = span(4, 9);

    let assign = Stmt::Assign(AssignStmt {
        node_id: sc.ids.fresh(),
        vars: vec![Expr::Local(LocalExpr {
            node_id: lhs_id,
            local_id: NodeId(997),
            name: sc.interner.intern("x"),
            span: span(0, 1),
        })],
        values: vec![Expr::Str(StringExpr {
            node_id: rhs_id,
            value: "nope".into(),
            span: rhs_span,
        })],
        span: span(0, 9),
    });

    let root = Block {
        node_id: sc.ids.fresh(),
        body: vec![assign],
        span: span(0, 10),
    };

    let errors = sc.run(root);
    assert_eq!(errors.len(), 1, "errors: {:?}", errors);
    assert_eq!(errors[0].span, rhs_span);
    assert!(matches!(
        errors[0].data,
        TypeErrorData::TypeMismatch { expected, actual }
            if expected == b.number_type && actual == b.string_type
    ));
}

/// `expr :: T` with unrelated types reports TypesAreUnrelated.
#[test]
fn unrelated_type_assertion() {
    let mut sc = Scenario::new("assertion");
    let b = sc.builtins;

    let expr_id = sc.ids.fresh();
    sc.module.ast_types.insert(expr_id, b.number_type);
    let annot_id = sc.ids.fresh();
    sc.module.ast_resolved_types.insert(annot_id, b.string_type);

    let assertion_span = span(0, 14);
    let assertion = Stmt::Expr(ExprStmt {
        node_id: sc.ids.fresh(),
        expr: Expr::TypeAssertion(TypeAssertionExpr {
            node_id: sc.ids.fresh(),
            expr: Box::new(Expr::Number(NumberExpr {
                node_id: expr_id,
                value: 4.0,
                span: span(0, 1),
            })),
            annotation: TypeAnnot::Reference(TypeReferenceAnnot {
                node_id: annot_id,
                prefix: None,
                name: sc.interner.intern("string"),
                parameters: vec![],
                has_parameter_list: false,
                span: span(5, 11),
            }),
            span: assertion_span,
        }),
        span: assertion_span,
    });

    // `string` resolves through an alias in scope so the reference check
    // stays quiet.
    let root_scope = sc.module.scopes.module_scope();
    sc.module.scopes.get_mut(root_scope).type_aliases.insert(
        "string".to_string(),
        stoat_analysis::sema::types::TypeFun::monomorphic(b.string_type),
    );

    let root = Block {
        node_id: sc.ids.fresh(),
        body: vec![assertion],
        span: span(0, 16),
    };

    let errors = sc.run(root);
    assert_eq!(errors.len(), 1, "errors: {:?}", errors);
    assert!(matches!(
        errors[0].data,
        TypeErrorData::TypesAreUnrelated { left, right }
            if left == b.number_type && right == b.string_type
    ));
}

/// Property lookup suggests a near-miss with different casing.
#[test]
fn unknown_property_suggests_case_insensitive_match() {
    let mut sc = Scenario::new("typo");
    let b = sc.builtins;

    let mut table = TableType::sealed();
    table
        .props
        .insert("Health".into(), Property::rw(b.number_type));
    let table_ty = sc.module.internal_types.add_type(Type::Table(table));

    let recv_id = sc.ids.fresh();
    sc.module.ast_types.insert(recv_id, table_ty);

    let access = Stmt::Expr(ExprStmt {
        node_id: sc.ids.fresh(),
        expr: Expr::IndexName(IndexNameExpr {
            node_id: sc.ids.fresh(),
            expr: Box::new(Expr::Local(LocalExpr {
                node_id: recv_id,
                local_id: NodeId(996),
                name: sc.interner.intern("t"),
                span: span(0, 1),
            })),
            index: sc.interner.intern("health"),
            index_span: span(2, 8),
            span: span(0, 8),
        }),
        span: span(0, 8),
    });

    let root = Block {
        node_id: sc.ids.fresh(),
        body: vec![access],
        span: span(0, 10),
    };

    let errors = sc.run(root);
    assert_eq!(errors.len(), 1, "errors: {:?}", errors);
    match &errors[0].data {
        TypeErrorData::UnknownPropButFoundLikeProp { key, candidates, .. } => {
            assert_eq!(key, "health");
            assert_eq!(candidates, &vec!["Health".to_string()]);
        }
        other => panic!("expected a near-miss suggestion, got {:?}", other),
    }
}

/// Calling a plain number is CannotCallNonFunction.
#[test]
fn calling_a_non_function() {
    let mut sc = Scenario::new("non-function");
    let b = sc.builtins;

    let call_id = sc.ids.fresh();
    sc.module.ast_original_call_types.insert(call_id, b.number_type);
    let callee_id = sc.ids.fresh();
    sc.module.ast_types.insert(callee_id, b.number_type);
    let callee_span = span(0, 1);

    let call = Stmt::Expr(ExprStmt {
        node_id: sc.ids.fresh(),
        expr: Expr::Call(CallExpr {
            node_id: call_id,
            func: Box::new(Expr::Local(LocalExpr {
                node_id: callee_id,
                local_id: NodeId(995),
                name: sc.interner.intern("n"),
                span: callee_span,
            })),
            args: vec![],
            is_method: false,
            span: span(0, 3),
        }),
        span: span(0, 3),
    });

    let root = Block {
        node_id: sc.ids.fresh(),
        body: vec![call],
        span: span(0, 5),
    };

    let errors = sc.run(root);
    assert_eq!(errors.len(), 1, "errors: {:?}", errors);
    assert_eq!(errors[0].span, callee_span);
    assert!(matches!(
        errors[0].data,
        TypeErrorData::CannotCallNonFunction { ty } if ty == b.number_type
    ));
}

/// Numeric for bounds must be numbers.
#[test]
fn numeric_for_bounds() {
    let mut sc = Scenario::new("numeric-for");
    let b = sc.builtins;

    let from_id = sc.ids.fresh();
    sc.module.ast_types.insert(from_id, b.number_type);
    let to_id = sc.ids.fresh();
    sc.module.ast_types.insert(to_id, b.string_type);
    let to_span = span(11, 16);

    let stmt = Stmt::For(NumericForStmt {
        node_id: sc.ids.fresh(),
        var: LocalVar {
            node_id: sc.ids.fresh(),
            name: sc.interner.intern("i"),
            annotation: None,
            span: span(4, 5),
        },
        from: Expr::Number(NumberExpr {
            node_id: from_id,
            value: 1.0,
            span: span(8, 9),
        }),
        to: Expr::Str(StringExpr {
            node_id: to_id,
            value: "x".into(),
            span: to_span,
        }),
        step: None,
        body: Block {
            node_id: sc.ids.fresh(),
            body: vec![],
            span: span(20, 25),
        },
        span: span(0, 28),
    });

    let root = Block {
        node_id: sc.ids.fresh(),
        body: vec![stmt],
        span: span(0, 30),
    };

    let errors = sc.run(root);
    assert_eq!(errors.len(), 1, "errors: {:?}", errors);
    assert_eq!(errors[0].span, to_span);
    assert!(matches!(
        errors[0].data,
        TypeErrorData::TypeMismatch { expected, actual }
            if expected == b.number_type && actual == b.string_type
    ));
}

/// A trailing call that produces too few values for the bound locals.
#[test]
fn local_binding_count_mismatch() {
    let mut sc = Scenario::new("local-count");
    let b = sc.builtins;

    // f() -> (number)
    let ret_pack = sc
        .module
        .internal_types
        .list_pack(smallvec::smallvec![b.number_type], None);

    let call_id = sc.ids.fresh();
    sc.module.ast_packs.insert(call_id, ret_pack);
    let callee_id = sc.ids.fresh();
    let fn_ty: TypeId = sc
        .module
        .internal_types
        .function(smallvec::smallvec![], smallvec::smallvec![b.number_type]);
    sc.module.ast_types.insert(callee_id, fn_ty);

    let second_var = sc.ids.fresh();
    let second_span = span(9, 10);

    let local = Stmt::Local(LocalStmt {
        node_id: sc.ids.fresh(),
        vars: vec![
            LocalVar {
                node_id: sc.ids.fresh(),
                name: sc.interner.intern("a"),
                annotation: None,
                span: span(6, 7),
            },
            LocalVar {
                node_id: second_var,
                name: sc.interner.intern("c"),
                annotation: None,
                span: second_span,
            },
        ],
        values: vec![Expr::Call(CallExpr {
            node_id: call_id,
            func: Box::new(Expr::Local(LocalExpr {
                node_id: callee_id,
                local_id: NodeId(994),
                name: sc.interner.intern("f"),
                span: span(13, 14),
            })),
            args: vec![],
            is_method: false,
            span: span(13, 16),
        })],
        span: span(0, 16),
    });

    let root = Block {
        node_id: sc.ids.fresh(),
        body: vec![local],
        span: span(0, 18),
    };

    let errors = sc.run(root);
    assert_eq!(errors.len(), 1, "errors: {:?}", errors);
    assert_eq!(errors[0].span, second_span);
    assert!(matches!(
        errors[0].data,
        TypeErrorData::CountMismatch {
            expected: 1,
            actual: 2,
            context: CountContext::FunctionResult,
            ..
        }
    ));
}
