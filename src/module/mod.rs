// src/module/mod.rs
//
// Per-module records: the parsed source, the checked module with its
// per-AST-node type maps, and the mutex-guarded resolver that publishes
// checked modules to concurrent readers.

pub mod require;

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::config::Mode;
use crate::errors::{LintWarning, ModuleName, TypeError};
use crate::sema::arena::TypeArena;
use crate::sema::builtins::GlobalTypes;
use crate::sema::scope::{ScopeId, ScopeTree};
use crate::sema::types::{TypeId, TypePackId};
use crate::syntax::ast::{Block, HotComment, NodeId, ParseError};
use crate::syntax::intern::Interner;
use crate::syntax::span::Span;

/// Source plus human-readable name, as read by the file resolver
#[derive(Debug, Clone)]
pub struct SourceCode {
    pub source: String,
    pub human_name: String,
}

/// Resolution of a require path expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: ModuleName,
    pub optional: bool,
}

/// Reads sources and resolves module path expressions; consumed from the
/// embedder.
pub trait FileResolver: Send + Sync {
    fn read_source(&self, name: &ModuleName) -> Option<SourceCode>;

    /// Resolve a parsed require path (root segment first) relative to the
    /// requiring module. None means the path is not statically resolvable;
    /// the tracer stays silent and the checker produces the ordinary
    /// unknown-module diagnostic later.
    fn resolve_module(&self, current: &ModuleName, path: &[String]) -> Option<ModuleInfo>;

    fn human_name(&self, name: &ModuleName) -> String {
        name.clone()
    }
}

/// The parsed form of one file, before and independent of checking
#[derive(Debug, Clone)]
pub struct SourceModule {
    pub name: ModuleName,
    pub human_name: String,
    pub root: Block,
    pub hot_comments: Vec<HotComment>,
    pub parse_errors: Vec<ParseError>,
    pub lines: usize,
    pub interner: Interner,
}

impl SourceModule {
    pub fn str(&self, sym: crate::syntax::intern::Symbol) -> &str {
        self.interner.resolve(sym)
    }
}

/// A checked module: arenas, per-AST-node maps populated by inference,
/// the scope tree, and the accumulated diagnostics.
#[derive(Debug)]
pub struct Module {
    pub name: ModuleName,
    pub human_name: String,
    pub mode: Mode,

    /// All types produced while checking this module
    pub internal_types: TypeArena,
    /// The frozen subset re-exported to importers
    pub interface_types: TypeArena,

    // Per-AST-node maps, keyed by NodeId. Populated by the inference engine;
    // read (and in places extended) by the validator.
    pub ast_types: FxHashMap<NodeId, TypeId>,
    pub ast_packs: FxHashMap<NodeId, TypePackId>,
    pub ast_resolved_types: FxHashMap<NodeId, TypeId>,
    pub ast_resolved_packs: FxHashMap<NodeId, TypePackId>,
    pub ast_original_call_types: FxHashMap<NodeId, TypeId>,
    pub ast_overload_resolved_types: FxHashMap<NodeId, TypeId>,
    pub ast_expected_types: FxHashMap<NodeId, TypeId>,
    /// Scope attached to a block or function node
    pub ast_scopes: FxHashMap<NodeId, ScopeId>,

    pub scopes: ScopeTree,

    /// Globals declared by a definition file, exported to the environment
    pub declared_globals: FxHashMap<String, TypeId>,
    /// Exported type aliases visible to importers
    pub exported_type_aliases: FxHashMap<String, crate::sema::types::TypeFun>,

    pub errors: Vec<TypeError>,
    pub lint_warnings: Vec<LintWarning>,
    /// Set when a resource limit stopped this module's check
    pub timed_out: bool,
}

impl Module {
    pub fn new(name: ModuleName, human_name: String, mode: Mode, globals: &GlobalTypes) -> Self {
        Self {
            name,
            human_name,
            mode,
            internal_types: globals.module_arena(),
            interface_types: globals.module_arena(),
            ast_types: FxHashMap::default(),
            ast_packs: FxHashMap::default(),
            ast_resolved_types: FxHashMap::default(),
            ast_resolved_packs: FxHashMap::default(),
            ast_original_call_types: FxHashMap::default(),
            ast_overload_resolved_types: FxHashMap::default(),
            ast_expected_types: FxHashMap::default(),
            ast_scopes: FxHashMap::default(),
            scopes: ScopeTree::new(Span::default()),
            declared_globals: FxHashMap::default(),
            exported_type_aliases: FxHashMap::default(),
            errors: Vec::new(),
            lint_warnings: Vec::new(),
            timed_out: false,
        }
    }

    /// An empty placeholder published for the cyclic dependency of a module
    /// under check, so importers see `any`-shaped exports instead of a
    /// missing module.
    pub fn cycle_placeholder(name: ModuleName, globals: &GlobalTypes) -> Self {
        let mut module = Self::new(name.clone(), name, Mode::NoCheck, globals);
        module.interface_types.freeze();
        module
    }

    pub fn module_scope(&self) -> ScopeId {
        self.scopes.module_scope()
    }

    /// Drop inference-internal state once validation is done. Applied when
    /// `retain_full_type_graphs` is off to cut memory; the interface arena
    /// and the error list survive.
    pub fn clear_internal_types(&mut self, globals: &GlobalTypes) {
        self.ast_types = FxHashMap::default();
        self.ast_packs = FxHashMap::default();
        self.ast_resolved_types = FxHashMap::default();
        self.ast_resolved_packs = FxHashMap::default();
        self.ast_original_call_types = FxHashMap::default();
        self.ast_overload_resolved_types = FxHashMap::default();
        self.ast_expected_types = FxHashMap::default();
        self.internal_types = globals.module_arena();
    }
}

/// The mutex-guarded name → module map behind one checking view. Cloning the
/// resolver clones the handle, not the map.
#[derive(Clone, Default)]
pub struct FrontendModuleResolver {
    modules: Arc<Mutex<FxHashMap<ModuleName, Arc<Module>>>>,
}

impl FrontendModuleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_module(&self, name: &ModuleName) -> Option<Arc<Module>> {
        self.modules.lock().get(name).cloned()
    }

    pub fn module_exists(&self, name: &ModuleName) -> bool {
        self.modules.lock().contains_key(name)
    }

    pub fn set_module(&self, name: ModuleName, module: Arc<Module>) {
        self.modules.lock().insert(name, module);
    }

    pub fn clear_modules(&self) {
        self.modules.lock().clear();
    }
}
