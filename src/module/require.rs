// src/module/require.rs
//
// Walks the AST for `require(path)` patterns and resolves each statically
// analyzable path expression into a module name. Resolution failure is
// silent: the result map simply lacks an entry, and the checker produces the
// ordinary unknown-module diagnostic downstream.

use rustc_hash::FxHashMap;

use crate::errors::ModuleName;
use crate::module::{FileResolver, ModuleInfo, SourceModule};
use crate::syntax::ast::{Block, Expr, NodeId, Stmt};
use crate::syntax::span::Span;

/// One `require`-like call found in the module
#[derive(Debug, Clone)]
pub struct RequireListEntry {
    pub name: ModuleName,
    pub span: Span,
    /// e.g. `require` or `include`
    pub tag: &'static str,
}

#[derive(Debug, Default)]
pub struct RequireTraceResult {
    /// Resolution per path-argument expression
    pub exprs: FxHashMap<NodeId, ModuleInfo>,
    pub require_list: Vec<RequireListEntry>,
}

/// The call names the tracer recognizes
pub const REQUIRE_LIKE_FUNCTIONS: &[&str] = &["require", "include"];

/// Convert a path expression into its segments, root first. The expression
/// must be a chain of field accesses or index-by-string-literal rooted at a
/// plain name; anything dynamic is unresolvable. Weirdly-formulated but
/// syntactically valid paths still produce segments; they simply fail to
/// find a module later, which is the diagnostic we want.
pub fn parse_path_expr(source: &SourceModule, expr: &Expr) -> Option<Vec<String>> {
    let mut segments = Vec::new();
    let mut cur = expr;
    loop {
        match cur {
            Expr::Group(group) => cur = &group.expr,
            Expr::Global(global) => {
                segments.push(source.str(global.name).to_string());
                segments.reverse();
                return Some(segments);
            }
            Expr::Local(local) => {
                segments.push(source.str(local.name).to_string());
                segments.reverse();
                return Some(segments);
            }
            Expr::IndexName(index) => {
                segments.push(source.str(index.index).to_string());
                cur = &index.expr;
            }
            Expr::IndexExpr(index) => match index.index.as_ref() {
                Expr::Str(lit) => {
                    segments.push(lit.value.clone());
                    cur = &index.expr;
                }
                _ => return None,
            },
            _ => return None,
        }
    }
}

/// The default path policy, exported for convenient testing: `script` roots
/// at the requiring module, `game` roots at the absolute tree, and `Parent`
/// segments pop a component.
pub fn path_expr_to_module_name(current: &ModuleName, segments: &[String]) -> Option<ModuleName> {
    let (root, rest) = segments.split_first()?;

    let mut parts: Vec<String> = match root.as_str() {
        "script" => current.split('/').map(str::to_string).collect(),
        "game" => vec!["game".to_string()],
        _ => return None,
    };

    for segment in rest {
        if segment == "Parent" {
            parts.pop()?;
            if parts.is_empty() {
                return None;
            }
        } else {
            parts.push(segment.clone());
        }
    }

    Some(parts.join("/"))
}

/// Find every `local x = require(expr)` (and analogues) and resolve the
/// path arguments through the file resolver.
pub fn trace_requires(
    file_resolver: &dyn FileResolver,
    source: &SourceModule,
    current: &ModuleName,
) -> RequireTraceResult {
    let mut result = RequireTraceResult::default();
    trace_block(file_resolver, source, current, &source.root, &mut result);
    result
}

fn trace_block(
    file_resolver: &dyn FileResolver,
    source: &SourceModule,
    current: &ModuleName,
    block: &Block,
    result: &mut RequireTraceResult,
) {
    for stmt in &block.body {
        trace_stmt(file_resolver, source, current, stmt, result);
    }
}

fn trace_stmt(
    file_resolver: &dyn FileResolver,
    source: &SourceModule,
    current: &ModuleName,
    stmt: &Stmt,
    result: &mut RequireTraceResult,
) {
    match stmt {
        Stmt::Local(local) => {
            for value in &local.values {
                trace_expr(file_resolver, source, current, value, result);
            }
        }
        Stmt::Assign(assign) => {
            for value in &assign.values {
                trace_expr(file_resolver, source, current, value, result);
            }
        }
        Stmt::Expr(stmt) => trace_expr(file_resolver, source, current, &stmt.expr, result),
        Stmt::Block(block) => trace_block(file_resolver, source, current, block, result),
        Stmt::If(stmt) => {
            trace_block(file_resolver, source, current, &stmt.then_body, result);
            if let Some(else_body) = &stmt.else_body {
                trace_stmt(file_resolver, source, current, else_body, result);
            }
        }
        Stmt::While(stmt) => trace_block(file_resolver, source, current, &stmt.body, result),
        Stmt::Repeat(stmt) => trace_block(file_resolver, source, current, &stmt.body, result),
        Stmt::For(stmt) => trace_block(file_resolver, source, current, &stmt.body, result),
        Stmt::ForIn(stmt) => trace_block(file_resolver, source, current, &stmt.body, result),
        Stmt::Function(stmt) => {
            trace_block(file_resolver, source, current, &stmt.func.body, result)
        }
        Stmt::LocalFunction(stmt) => {
            trace_block(file_resolver, source, current, &stmt.func.body, result)
        }
        _ => {}
    }
}

fn trace_expr(
    file_resolver: &dyn FileResolver,
    source: &SourceModule,
    current: &ModuleName,
    expr: &Expr,
    result: &mut RequireTraceResult,
) {
    let Expr::Call(call) = expr else {
        return;
    };

    let callee_tag = match call.func.as_ref() {
        Expr::Global(global) => REQUIRE_LIKE_FUNCTIONS
            .iter()
            .find(|&&name| source.interner.matches(global.name, name))
            .copied(),
        _ => None,
    };
    let Some(tag) = callee_tag else {
        return;
    };
    let Some(arg) = call.args.first() else {
        return;
    };

    let Some(segments) = parse_path_expr(source, arg) else {
        return;
    };
    let Some(info) = file_resolver.resolve_module(current, &segments) else {
        return;
    };

    result.require_list.push(RequireListEntry {
        name: info.name.clone(),
        span: arg.span(),
        tag,
    });
    result.exprs.insert(arg.node_id(), info);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::ast::*;
    use crate::syntax::intern::Interner;

    struct PathPolicyResolver;

    impl FileResolver for PathPolicyResolver {
        fn read_source(&self, _name: &ModuleName) -> Option<crate::module::SourceCode> {
            None
        }

        fn resolve_module(&self, current: &ModuleName, path: &[String]) -> Option<ModuleInfo> {
            path_expr_to_module_name(current, path).map(|name| ModuleInfo {
                name,
                optional: false,
            })
        }
    }

    fn source_with_require(path_root: &str, fields: &[&str]) -> SourceModule {
        let mut interner = Interner::new();
        let mut next_id = 0u32;
        let mut id = || {
            next_id += 1;
            NodeId(next_id)
        };

        let mut path: Expr = Expr::Global(GlobalExpr {
            node_id: id(),
            name: interner.intern(path_root),
            span: Span::default(),
        });
        for field in fields {
            path = Expr::IndexName(IndexNameExpr {
                node_id: id(),
                expr: Box::new(path),
                index: interner.intern(field),
                index_span: Span::default(),
                span: Span::default(),
            });
        }

        let call = Expr::Call(CallExpr {
            node_id: id(),
            func: Box::new(Expr::Global(GlobalExpr {
                node_id: id(),
                name: interner.intern("require"),
                span: Span::default(),
            })),
            args: vec![path],
            is_method: false,
            span: Span::default(),
        });

        let local = Stmt::Local(LocalStmt {
            node_id: id(),
            vars: vec![LocalVar {
                node_id: id(),
                name: interner.intern("M"),
                annotation: None,
                span: Span::default(),
            }],
            values: vec![call],
            span: Span::default(),
        });

        SourceModule {
            name: "game/Workspace/Main".into(),
            human_name: "Main".into(),
            root: Block {
                node_id: id(),
                body: vec![local],
                span: Span::default(),
            },
            hot_comments: Vec::new(),
            parse_errors: Vec::new(),
            lines: 1,
            interner,
        }
    }

    #[test]
    fn game_rooted_paths_resolve_absolutely() {
        let source = source_with_require("game", &["Workspace", "Util"]);
        let trace = trace_requires(&PathPolicyResolver, &source, &source.name.clone());
        assert_eq!(trace.require_list.len(), 1);
        assert_eq!(trace.require_list[0].name, "game/Workspace/Util");
        assert_eq!(trace.exprs.len(), 1);
    }

    #[test]
    fn script_parent_pops_components() {
        let source = source_with_require("script", &["Parent", "Sibling"]);
        let trace = trace_requires(&PathPolicyResolver, &source, &source.name.clone());
        assert_eq!(trace.require_list[0].name, "game/Workspace/Sibling");
    }

    #[test]
    fn dynamic_paths_fail_silently() {
        let mut source = source_with_require("game", &["Workspace"]);
        // Replace the path argument with a call, which is not statically
        // analyzable.
        if let Stmt::Local(local) = &mut source.root.body[0] {
            if let Expr::Call(call) = &mut local.values[0] {
                let func = call.func.clone();
                call.args[0] = Expr::Call(CallExpr {
                    node_id: NodeId(999),
                    func,
                    args: vec![],
                    is_method: false,
                    span: Span::default(),
                });
            }
        }
        let trace = trace_requires(&PathPolicyResolver, &source, &source.name.clone());
        assert!(trace.exprs.is_empty());
        assert!(trace.require_list.is_empty());
    }

    #[test]
    fn weird_but_syntactic_paths_still_produce_names() {
        // game.Parent escapes the root and is rejected by the policy
        assert_eq!(
            path_expr_to_module_name(&"m".into(), &["game".into(), "Parent".into()]),
            None
        );
        // Unrecognized roots are unresolvable
        assert_eq!(
            path_expr_to_module_name(&"m".into(), &["banana".into()]),
            None
        );
        // Deep Parent chains stay within the tree
        assert_eq!(
            path_expr_to_module_name(
                &"game/A/B/C".into(),
                &["script".into(), "Parent".into(), "Parent".into(), "X".into()]
            ),
            Some("game/A/X".into())
        );
    }
}
