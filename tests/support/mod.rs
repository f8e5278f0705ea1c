// tests/support/mod.rs
#![allow(dead_code)]
//
// Shared scaffolding for the integration suites: an in-memory file
// resolver, a deliberately tiny line-based parser stub, and an inference
// stub that records its invocations. The real parser and inference engine
// live outside this crate; these stand-ins produce just enough structure to
// drive the orchestrator and the validator.

use std::sync::Arc;

use parking_lot::Mutex;

use stoat_analysis::config::Mode;
use stoat_analysis::errors::ModuleName;
use stoat_analysis::frontend::{InferenceEngine, ModuleParser, RequireCycle};
use stoat_analysis::module::{
    FileResolver, FrontendModuleResolver, Module, ModuleInfo, SourceCode, SourceModule,
};
use stoat_analysis::config::{FrontendOptions, TypeCheckLimits};
use stoat_analysis::sema::arena::BuiltinTypes;
use stoat_analysis::sema::builtins::GlobalTypes;
use stoat_analysis::syntax::ast::*;
use stoat_analysis::syntax::intern::Interner;
use stoat_analysis::syntax::span::Span;

/// In-memory sources keyed by module name.
#[derive(Default)]
pub struct MemoryFileResolver {
    sources: Mutex<std::collections::HashMap<ModuleName, String>>,
}

impl MemoryFileResolver {
    pub fn new(sources: &[(&str, &str)]) -> Arc<Self> {
        let resolver = Self::default();
        for (name, source) in sources {
            resolver
                .sources
                .lock()
                .insert(name.to_string(), source.to_string());
        }
        Arc::new(resolver)
    }

    pub fn set_source(&self, name: &str, source: &str) {
        self.sources
            .lock()
            .insert(name.to_string(), source.to_string());
    }
}

impl FileResolver for MemoryFileResolver {
    fn read_source(&self, name: &ModuleName) -> Option<SourceCode> {
        self.sources.lock().get(name).map(|source| SourceCode {
            source: source.clone(),
            human_name: name.clone(),
        })
    }

    fn resolve_module(&self, _current: &ModuleName, path: &[String]) -> Option<ModuleInfo> {
        // Test scripts require modules by their plain name
        path.first().map(|root| ModuleInfo {
            name: root.clone(),
            optional: false,
        })
    }
}

/// A line-based stub for the external parser. Understands exactly what the
/// orchestrator tests need:
///
///   --!strict / --!nonstrict / --!nocheck   header hot comments
///   require NAME                            local NAME = require(NAME)
///   !!syntax-error                          a parse error
pub struct LineParser;

impl ModuleParser for LineParser {
    fn parse(&self, _name: &ModuleName, source: &str) -> ParseResult {
        let mut interner = Interner::new();
        let mut next_id = 0u32;
        let mut fresh = move || {
            next_id += 1;
            NodeId(next_id)
        };

        let mut hot_comments = Vec::new();
        let mut errors = Vec::new();
        let mut body = Vec::new();
        let mut in_header = true;

        let mut offset = 0usize;
        for (line_index, line) in source.lines().enumerate() {
            let span = Span::new(offset, offset + line.len(), line_index as u32 + 1, 1);
            offset += line.len() + 1;
            let line = line.trim();

            if let Some(content) = line.strip_prefix("--!") {
                hot_comments.push(HotComment {
                    header: in_header,
                    content: content.to_string(),
                    span,
                });
                continue;
            }
            if line.is_empty() {
                continue;
            }
            in_header = false;

            if line == "!!syntax-error" {
                errors.push(ParseError {
                    message: "unexpected token".to_string(),
                    span,
                });
                continue;
            }

            if let Some(target) = line.strip_prefix("require ") {
                let target = target.trim();
                let path = Expr::Global(GlobalExpr {
                    node_id: fresh(),
                    name: interner.intern(target),
                    span,
                });
                let call = Expr::Call(CallExpr {
                    node_id: fresh(),
                    func: Box::new(Expr::Global(GlobalExpr {
                        node_id: fresh(),
                        name: interner.intern("require"),
                        span,
                    })),
                    args: vec![path],
                    is_method: false,
                    span,
                });
                body.push(Stmt::Local(LocalStmt {
                    node_id: fresh(),
                    vars: vec![LocalVar {
                        node_id: fresh(),
                        name: interner.intern(target),
                        annotation: None,
                        span,
                    }],
                    values: vec![call],
                    span,
                }));
            }
        }

        let lines = source.lines().count();
        ParseResult {
            root: Block {
                node_id: fresh(),
                body,
                span: Span::new(0, source.len(), 1, 1),
            },
            hot_comments,
            errors,
            lines,
            interner,
        }
    }
}

/// Inference stub: returns an empty module and records which modules it ran
/// on and in which mode.
#[derive(Default)]
pub struct CountingInference {
    pub invocations: Mutex<Vec<(ModuleName, Mode)>>,
    /// When set, definition-mode runs declare this global as a string.
    pub declare_global: Option<String>,
}

impl CountingInference {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_declared_global(name: &str) -> Arc<Self> {
        Arc::new(Self {
            invocations: Mutex::new(Vec::new()),
            declare_global: Some(name.to_string()),
        })
    }

    pub fn runs(&self) -> Vec<(ModuleName, Mode)> {
        self.invocations.lock().clone()
    }

    pub fn run_count(&self) -> usize {
        self.invocations.lock().len()
    }
}

impl InferenceEngine for CountingInference {
    fn infer(
        &self,
        source: &SourceModule,
        mode: Mode,
        _require_cycles: &[RequireCycle],
        globals: &GlobalTypes,
        _resolver: &FrontendModuleResolver,
        _options: &FrontendOptions,
        _limits: &TypeCheckLimits,
    ) -> Module {
        self.invocations
            .lock()
            .push((source.name.clone(), mode));

        let mut module = Module::new(
            source.name.clone(),
            source.human_name.clone(),
            mode,
            globals,
        );
        if mode == Mode::Definition
            && let Some(global) = &self.declare_global
        {
            let builtins = BuiltinTypes::new();
            module
                .declared_globals
                .insert(global.clone(), builtins.string_type);
        }
        module
    }
}

/// Sequential node-id allocator for hand-built ASTs.
#[derive(Default)]
pub struct NodeIds {
    next: u32,
}

impl NodeIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self) -> NodeId {
        self.next += 1;
        NodeId(self.next)
    }
}

/// A span at `start..end` on a single line, distinct enough for assertions.
pub fn span(start: usize, end: usize) -> Span {
    Span::new(start, end, 1, start as u32 + 1)
}

/// An empty source module wrapper around a hand-built AST.
pub fn source_module(name: &str, root: Block, interner: Interner) -> SourceModule {
    SourceModule {
        name: name.to_string(),
        human_name: name.to_string(),
        root,
        hot_comments: Vec::new(),
        parse_errors: Vec::new(),
        lines: 1,
        interner,
    }
}
