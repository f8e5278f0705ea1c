// src/frontend/mod.rs
//
// The build orchestrator. Discovers the require graph, parses each source
// once, schedules checking in dependency order with cycle groups, runs the
// external inference engine and then the validator per module, publishes
// results to the per-view resolvers, and tracks dirtiness across edits.

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Instant;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::check::check_module;
use crate::config::{
    Config, ConfigResolver, FeatureFlags, FrontendOptions, LintOptions, Mode, TypeCheckLimits,
};
use crate::errors::{
    CheckError, LintResult, LintWarning, ModuleName, TypeError, TypeErrorData,
};
use crate::module::require::{RequireTraceResult, trace_requires};
use crate::module::{
    FileResolver, FrontendModuleResolver, Module, ModuleInfo, SourceModule,
};
use crate::sema::arena::BuiltinTypes;
use crate::sema::builtins::GlobalTypes;
use crate::sema::clone::{CloneState, clone_type};
use crate::sema::scope::BindingKey;
use crate::syntax::ast::{HotComment, NodeId, ParseResult};
use crate::syntax::span::Span;

/// Derive the checking mode from a file's header hot comments.
pub fn parse_mode(hot_comments: &[HotComment]) -> Option<Mode> {
    for comment in hot_comments {
        if !comment.header {
            continue;
        }
        match comment.content.trim() {
            "strict" => return Some(Mode::Strict),
            "nonstrict" => return Some(Mode::Nonstrict),
            "nocheck" => return Some(Mode::NoCheck),
            _ => {}
        }
    }
    None
}

/// Per-module node in the build graph
#[derive(Debug)]
pub struct SourceNode {
    pub name: ModuleName,
    pub human_name: String,
    pub require_set: FxHashSet<ModuleName>,
    pub require_list: Vec<crate::module::require::RequireListEntry>,
    pub dirty_source: bool,
    pub dirty_module: bool,
    pub dirty_module_for_autocomplete: bool,
}

impl SourceNode {
    fn new(name: ModuleName, human_name: String) -> Self {
        Self {
            name,
            human_name,
            require_set: FxHashSet::default(),
            require_list: Vec::new(),
            dirty_source: true,
            dirty_module: true,
            dirty_module_for_autocomplete: true,
        }
    }

    pub fn has_dirty_module(&self, for_autocomplete: bool) -> bool {
        if for_autocomplete {
            self.dirty_module_for_autocomplete
        } else {
            self.dirty_module
        }
    }

    fn clear_dirty_module(&mut self, for_autocomplete: bool) {
        if for_autocomplete {
            self.dirty_module_for_autocomplete = false;
        } else {
            self.dirty_module = false;
        }
    }
}

/// A cycle in the require graph; every module on the path participates.
#[derive(Debug, Clone)]
pub struct RequireCycle {
    pub span: Span,
    pub path: Vec<ModuleName>,
}

#[derive(Debug, Default)]
pub struct CheckResult {
    pub errors: Vec<TypeError>,
    pub lint_result: LintResult,
    pub timeout_hits: Vec<ModuleName>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub files: usize,
    pub lines: usize,
    pub files_strict: usize,
    pub files_nonstrict: usize,
    pub time_read: f64,
    pub time_parse: f64,
    pub time_check: f64,
}

#[derive(Debug)]
pub struct LoadDefinitionFileResult {
    pub success: bool,
    pub parse_errors: Vec<crate::syntax::ast::ParseError>,
    pub module: Option<Arc<Module>>,
}

/// The external parser; yields an AST, header hot comments, and parse
/// diagnostics.
pub trait ModuleParser: Send + Sync {
    fn parse(&self, name: &ModuleName, source: &str) -> ParseResult;
}

/// The constraint-based inference engine. Returns a module with every
/// per-AST-node map populated and inference-time errors recorded; the
/// validator augments the error list afterwards.
pub trait InferenceEngine: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn infer(
        &self,
        source: &SourceModule,
        mode: Mode,
        require_cycles: &[RequireCycle],
        globals: &GlobalTypes,
        resolver: &FrontendModuleResolver,
        options: &FrontendOptions,
        limits: &TypeCheckLimits,
    ) -> Module;
}

/// The external lint engine; its warnings enter the check result aggregate.
pub trait LintEngine: Send + Sync {
    fn lint(&self, source: &SourceModule, module: &Module, options: &LintOptions)
    -> Vec<LintWarning>;
}

/// Work item produced by build planning
struct BuildQueueItem {
    name: ModuleName,
    source: Arc<SourceModule>,
    mode: Mode,
    cycles: Vec<RequireCycle>,
    requires: Vec<ModuleName>,
}

pub struct Frontend {
    pub file_resolver: Arc<dyn FileResolver>,
    pub config_resolver: Arc<dyn ConfigResolver>,
    parser: Arc<dyn ModuleParser>,
    inference: Arc<dyn InferenceEngine>,
    lint: Option<Arc<dyn LintEngine>>,

    pub options: FrontendOptions,
    pub flags: FeatureFlags,
    pub limits: TypeCheckLimits,

    builtins: BuiltinTypes,
    globals: Arc<GlobalTypes>,
    globals_for_autocomplete: Arc<GlobalTypes>,
    environments: FxHashMap<String, Arc<GlobalTypes>>,

    pub module_resolver: FrontendModuleResolver,
    pub module_resolver_for_autocomplete: FrontendModuleResolver,

    source_nodes: FxHashMap<ModuleName, SourceNode>,
    source_modules: FxHashMap<ModuleName, Arc<SourceModule>>,
    require_trace: FxHashMap<ModuleName, RequireTraceResult>,

    stats: Stats,
    module_queue: Vec<ModuleName>,
}

impl Frontend {
    pub fn new(
        file_resolver: Arc<dyn FileResolver>,
        config_resolver: Arc<dyn ConfigResolver>,
        parser: Arc<dyn ModuleParser>,
        inference: Arc<dyn InferenceEngine>,
        options: FrontendOptions,
    ) -> Self {
        let builtins = BuiltinTypes::new();
        Self {
            file_resolver,
            config_resolver,
            parser,
            inference,
            lint: None,
            options,
            flags: FeatureFlags::default(),
            limits: TypeCheckLimits::default(),
            builtins,
            globals: Arc::new(GlobalTypes::new(&builtins)),
            globals_for_autocomplete: Arc::new(GlobalTypes::new(&builtins)),
            environments: FxHashMap::default(),
            module_resolver: FrontendModuleResolver::new(),
            module_resolver_for_autocomplete: FrontendModuleResolver::new(),
            source_nodes: FxHashMap::default(),
            source_modules: FxHashMap::default(),
            require_trace: FxHashMap::default(),
            stats: Stats::default(),
            module_queue: Vec::new(),
        }
    }

    pub fn with_lint_engine(mut self, lint: Arc<dyn LintEngine>) -> Self {
        self.lint = Some(lint);
        self
    }

    pub fn builtin_types(&self) -> &BuiltinTypes {
        &self.builtins
    }

    pub fn globals(&self, for_autocomplete: bool) -> &GlobalTypes {
        if for_autocomplete {
            &self.globals_for_autocomplete
        } else {
            &self.globals
        }
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn clear_stats(&mut self) {
        self.stats = Stats::default();
    }

    /// Drop every cached parse and check result.
    pub fn clear(&mut self) {
        self.module_resolver.clear_modules();
        self.module_resolver_for_autocomplete.clear_modules();
        self.source_nodes.clear();
        self.source_modules.clear();
        self.require_trace.clear();
        self.module_queue.clear();
    }

    // ========================================================================
    // Checking
    // ========================================================================

    pub fn check(
        &mut self,
        name: &ModuleName,
        option_override: Option<FrontendOptions>,
    ) -> Result<CheckResult, CheckError> {
        let options = option_override.unwrap_or(self.options);
        let for_autocomplete = options.for_autocomplete;
        debug!(module = %name, for_autocomplete, "check");

        let (queue, cycles) = self.parse_graph(name, for_autocomplete)?;
        trace!(queue_len = queue.len(), cycles = cycles.len(), "build queue planned");

        let mut timeout_hits = Vec::new();
        for module_name in &queue {
            self.check_one(module_name, &options, for_autocomplete, &cycles, &mut timeout_hits);
        }

        let mut result = self
            .get_check_result(name, true, for_autocomplete)
            .unwrap_or_default();
        result.timeout_hits = timeout_hits;
        Ok(result)
    }

    /// Whether a module (or a source it depends on) needs rechecking.
    pub fn is_dirty(&self, name: &ModuleName, for_autocomplete: bool) -> bool {
        self.source_nodes
            .get(name)
            .map(|node| node.dirty_source || node.has_dirty_module(for_autocomplete))
            .unwrap_or(true)
    }

    /// Flip the dirty bits for `name` and every transitive reverse
    /// dependency; the next check re-reads, re-parses, and re-checks them.
    pub fn mark_dirty(&mut self, name: &ModuleName, mut out_affected: Option<&mut Vec<ModuleName>>) {
        if !self.source_nodes.contains_key(name) {
            return;
        }

        let mut reverse: FxHashMap<&ModuleName, Vec<&ModuleName>> = FxHashMap::default();
        for (module, node) in &self.source_nodes {
            for required in &node.require_set {
                reverse.entry(required).or_default().push(module);
            }
        }

        let mut queue = vec![name.clone()];
        let mut seen: FxHashSet<ModuleName> = FxHashSet::default();
        while let Some(next) = queue.pop() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(dependents) = reverse.get(&next) {
                queue.extend(dependents.iter().map(|&d| d.clone()));
            }
        }

        for affected in &seen {
            if let Some(node) = self.source_nodes.get_mut(affected) {
                node.dirty_source = true;
                node.dirty_module = true;
                node.dirty_module_for_autocomplete = true;
            }
            if let Some(out) = out_affected.as_deref_mut() {
                out.push(affected.clone());
            }
        }
    }

    /// Borrow the cached parse of a module. The reference is valid until the
    /// next `mark_dirty`.
    pub fn get_source_module(&self, name: &ModuleName) -> Option<&SourceModule> {
        self.source_modules.get(name).map(Arc::as_ref)
    }

    /// Resolution of a require path expression inside `current`, from the
    /// trace recorded at parse time.
    pub fn resolve_module_info(&self, current: &ModuleName, expr: NodeId) -> Option<ModuleInfo> {
        self.require_trace
            .get(current)?
            .exprs
            .get(&expr)
            .cloned()
    }

    /// Aggregate the stored result for a module: root-module errors first,
    /// then (with `accumulate_nested`) transitive errors from required
    /// modules in dependency order.
    pub fn get_check_result(
        &self,
        name: &ModuleName,
        accumulate_nested: bool,
        for_autocomplete: bool,
    ) -> Option<CheckResult> {
        let resolver = self.resolver(for_autocomplete);
        let root = resolver.get_module(name)?;

        let mut result = CheckResult {
            errors: root.errors.clone(),
            lint_result: classify_lints(
                &root.lint_warnings,
                &self.config_resolver.config_for(name),
            ),
            timeout_hits: Vec::new(),
        };
        if root.timed_out {
            result.timeout_hits.push(name.clone());
        }

        if accumulate_nested {
            let mut seen: FxHashSet<ModuleName> = FxHashSet::default();
            seen.insert(name.clone());
            let mut queue: Vec<ModuleName> = self.requires_of(name);
            while let Some(dep) = queue.pop() {
                if !seen.insert(dep.clone()) {
                    continue;
                }
                if let Some(module) = resolver.get_module(&dep) {
                    result.errors.extend(module.errors.iter().cloned());
                    if module.timed_out {
                        result.timeout_hits.push(dep.clone());
                    }
                }
                queue.extend(self.requires_of(&dep));
            }
        }

        Some(result)
    }

    fn requires_of(&self, name: &ModuleName) -> Vec<ModuleName> {
        self.source_nodes
            .get(name)
            .map(|node| {
                node.require_list
                    .iter()
                    .map(|entry| entry.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn resolver(&self, for_autocomplete: bool) -> &FrontendModuleResolver {
        if for_autocomplete {
            &self.module_resolver_for_autocomplete
        } else {
            &self.module_resolver
        }
    }

    // ========================================================================
    // Graph discovery
    // ========================================================================

    /// Depth-first discovery of the require graph rooted at `root`. Sources
    /// are read and parsed on demand; the returned queue is in dependency
    /// order and cycles are reported for cycle-group checking.
    fn parse_graph(
        &mut self,
        root: &ModuleName,
        for_autocomplete: bool,
    ) -> Result<(Vec<ModuleName>, Vec<RequireCycle>), CheckError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            OnStack,
            Visited,
        }

        self.ensure_parsed(root)
            .ok_or_else(|| CheckError::SourceNotFound(root.clone()))?;

        let mut marks: FxHashMap<ModuleName, Mark> = FxHashMap::default();
        let mut queue: Vec<ModuleName> = Vec::new();
        let mut cycles: Vec<RequireCycle> = Vec::new();
        // (module, next require index) pairs
        let mut stack: Vec<(ModuleName, usize)> = vec![(root.clone(), 0)];
        marks.insert(root.clone(), Mark::OnStack);

        while let Some((current, child_index)) = stack.pop() {
            let requires = self.requires_of(&current);
            if child_index >= requires.len() {
                marks.insert(current.clone(), Mark::Visited);
                queue.push(current);
                continue;
            }

            stack.push((current.clone(), child_index + 1));
            let dep = requires[child_index].clone();

            match marks.get(&dep) {
                Some(Mark::Visited) => {}
                Some(Mark::OnStack) => {
                    // Back edge: everything from the dependency to the top of
                    // the stack participates in the cycle.
                    let start = stack.iter().position(|(name, _)| *name == dep);
                    if let Some(start) = start {
                        let mut path: Vec<ModuleName> =
                            stack[start..].iter().map(|(name, _)| name.clone()).collect();
                        path.push(dep.clone());
                        let span = self
                            .source_nodes
                            .get(&current)
                            .and_then(|node| {
                                node.require_list
                                    .iter()
                                    .find(|entry| entry.name == dep)
                                    .map(|entry| entry.span)
                            })
                            .unwrap_or_default();
                        cycles.push(RequireCycle { span, path });
                    }
                }
                None => {
                    if self.ensure_parsed(&dep).is_some() {
                        marks.insert(dep.clone(), Mark::OnStack);
                        stack.push((dep, 0));
                    } else {
                        // Missing sources surface as unknown-module errors
                        // during the dependent's check, not here.
                        marks.insert(dep, Mark::Visited);
                    }
                }
            }
        }

        // Only dirty modules need work; clean ones already have results.
        queue.retain(|name| {
            self.source_nodes
                .get(name)
                .map(|node| node.has_dirty_module(for_autocomplete))
                .unwrap_or(false)
        });

        Ok((queue, cycles))
    }

    /// Read and parse a module if its source is dirty. Returns None when the
    /// file resolver cannot produce the source.
    fn ensure_parsed(&mut self, name: &ModuleName) -> Option<()> {
        if let Some(node) = self.source_nodes.get(name)
            && !node.dirty_source
        {
            return Some(());
        }

        let read_start = Instant::now();
        let code = self.file_resolver.read_source(name)?;
        self.stats.time_read += read_start.elapsed().as_secs_f64();

        let parse_start = Instant::now();
        let parse = self.parser.parse(name, &code.source);
        self.stats.time_parse += parse_start.elapsed().as_secs_f64();
        self.stats.files += 1;
        self.stats.lines += parse.lines;

        let source_module = Arc::new(SourceModule {
            name: name.clone(),
            human_name: code.human_name.clone(),
            root: parse.root,
            hot_comments: parse.hot_comments,
            parse_errors: parse.errors,
            lines: parse.lines,
            interner: parse.interner,
        });

        let trace = trace_requires(self.file_resolver.as_ref(), &source_module, name);

        let node = self
            .source_nodes
            .entry(name.clone())
            .or_insert_with(|| SourceNode::new(name.clone(), code.human_name.clone()));
        node.human_name = code.human_name;
        node.require_set = trace
            .require_list
            .iter()
            .map(|entry| entry.name.clone())
            .collect();
        node.require_list = trace.require_list.clone();
        node.dirty_source = false;
        node.dirty_module = true;
        node.dirty_module_for_autocomplete = true;

        self.require_trace.insert(name.clone(), trace);
        self.source_modules.insert(name.clone(), source_module);
        Some(())
    }

    // ========================================================================
    // Per-module checking
    // ========================================================================

    fn check_one(
        &mut self,
        name: &ModuleName,
        options: &FrontendOptions,
        for_autocomplete: bool,
        cycles: &[RequireCycle],
        timeout_hits: &mut Vec<ModuleName>,
    ) {
        let still_dirty = self
            .source_nodes
            .get(name)
            .map(|node| node.has_dirty_module(for_autocomplete))
            .unwrap_or(false);
        if !still_dirty {
            return;
        }
        let Some(source) = self.source_modules.get(name).cloned() else {
            return;
        };

        let item = self.plan_item(name, &source, for_autocomplete, cycles);
        let check_start = Instant::now();
        let module = self.run_item(&item, options, for_autocomplete);
        self.stats.time_check += check_start.elapsed().as_secs_f64();
        if module.timed_out {
            timeout_hits.push(name.clone());
        }
        self.record_item(&item, module, options, for_autocomplete);
    }

    fn plan_item(
        &mut self,
        name: &ModuleName,
        source: &Arc<SourceModule>,
        for_autocomplete: bool,
        cycles: &[RequireCycle],
    ) -> BuildQueueItem {
        let config = self.config_resolver.config_for(name);
        let mut mode = parse_mode(&source.hot_comments).unwrap_or(config.mode);
        // Autocomplete forces strict so tooling sees precise types
        if for_autocomplete {
            mode = Mode::Strict;
        }

        match mode {
            Mode::Strict => self.stats.files_strict += 1,
            Mode::Nonstrict => self.stats.files_nonstrict += 1,
            _ => {}
        }

        let my_cycles: Vec<RequireCycle> = cycles
            .iter()
            .filter(|cycle| cycle.path.contains(name))
            .cloned()
            .collect();

        BuildQueueItem {
            name: name.clone(),
            source: source.clone(),
            mode,
            cycles: my_cycles,
            requires: self.requires_of(name),
        }
    }

    /// Inference plus validation for one planned item. Everything consumed
    /// here is immutable or behind a shared handle, so callers may run it on
    /// another thread.
    fn run_item(
        &self,
        item: &BuildQueueItem,
        options: &FrontendOptions,
        for_autocomplete: bool,
    ) -> Module {
        let globals = if for_autocomplete {
            self.globals_for_autocomplete.clone()
        } else {
            self.globals.clone()
        };
        let resolver = self.resolver(for_autocomplete).clone();

        run_build_item(
            item,
            options,
            &self.builtins,
            &self.flags,
            &self.limits,
            &globals,
            &resolver,
            self.inference.as_ref(),
            self.lint.as_deref(),
        )
    }

    fn record_item(
        &mut self,
        item: &BuildQueueItem,
        mut module: Module,
        options: &FrontendOptions,
        for_autocomplete: bool,
    ) {
        if !options.retain_full_type_graphs {
            let globals = if for_autocomplete {
                self.globals_for_autocomplete.clone()
            } else {
                self.globals.clone()
            };
            module.clear_internal_types(&globals);
        }
        module.interface_types.freeze();

        self.resolver(for_autocomplete)
            .set_module(item.name.clone(), Arc::new(module));
        if let Some(node) = self.source_nodes.get_mut(&item.name) {
            node.clear_dirty_module(for_autocomplete);
        }
    }

    // ========================================================================
    // Batch checking
    // ========================================================================

    pub fn queue_module_check(&mut self, names: &[ModuleName]) {
        for name in names {
            if !self.module_queue.contains(name) {
                self.module_queue.push(name.clone());
            }
        }
    }

    /// Check every queued module. Planning happens once; the per-module
    /// check work may be dispatched through `execute_task`, which is free to
    /// run tasks on worker threads. All tasks complete before results are
    /// recorded and this returns the checked module names.
    pub fn check_queued_modules(
        &mut self,
        option_override: Option<FrontendOptions>,
        execute_task: Option<&(dyn Fn(Box<dyn FnOnce() + Send>) + Sync)>,
        progress: Option<&dyn Fn(usize, usize)>,
    ) -> Result<Vec<ModuleName>, CheckError> {
        let options = option_override.unwrap_or(self.options);
        let for_autocomplete = options.for_autocomplete;

        let roots = std::mem::take(&mut self.module_queue);
        let mut queue: Vec<ModuleName> = Vec::new();
        let mut cycles: Vec<RequireCycle> = Vec::new();
        let mut queued: FxHashSet<ModuleName> = FxHashSet::default();
        for root in &roots {
            let (root_queue, root_cycles) = self.parse_graph(root, for_autocomplete)?;
            for name in root_queue {
                if queued.insert(name.clone()) {
                    queue.push(name);
                }
            }
            cycles.extend(root_cycles);
        }

        let total = queue.len();
        let mut items: Vec<BuildQueueItem> = Vec::with_capacity(total);
        for name in &queue {
            let Some(source) = self.source_modules.get(name).cloned() else {
                continue;
            };
            items.push(self.plan_item(name, &source, for_autocomplete, &cycles));
        }

        match execute_task {
            None => {
                let mut done = 0usize;
                for item in items {
                    let module = self.run_item(&item, &options, for_autocomplete);
                    self.record_item(&item, module, &options, for_autocomplete);
                    done += 1;
                    if let Some(progress) = progress {
                        progress(done, total);
                    }
                }
            }
            Some(execute) => {
                self.check_items_through_dispatcher(
                    items,
                    &options,
                    for_autocomplete,
                    execute,
                    progress,
                );
            }
        }

        Ok(queue)
    }

    /// Wave scheduling through the dispatcher hook: an item is dispatched
    /// once every module it requires has a published result, and all
    /// in-flight tasks drain before we return.
    fn check_items_through_dispatcher(
        &mut self,
        mut items: Vec<BuildQueueItem>,
        options: &FrontendOptions,
        for_autocomplete: bool,
        execute: &(dyn Fn(Box<dyn FnOnce() + Send>) + Sync),
        progress: Option<&dyn Fn(usize, usize)>,
    ) {
        let total = items.len();
        let (tx, rx) = mpsc::channel::<(usize, Module)>();

        let mut recorded: Vec<Option<BuildQueueItem>> = Vec::with_capacity(total);
        let mut in_flight = 0usize;
        let mut done = 0usize;
        let mut pending: Vec<(usize, BuildQueueItem)> = items.drain(..).enumerate().collect();
        let names_being_checked: FxHashSet<ModuleName> =
            pending.iter().map(|(_, item)| item.name.clone()).collect();
        let mut completed: FxHashSet<ModuleName> = FxHashSet::default();
        recorded.resize_with(total, || None);

        loop {
            // Dispatch everything whose dependencies are satisfied
            let mut i = 0;
            while i < pending.len() {
                let ready = pending[i].1.requires.iter().all(|dep| {
                    completed.contains(dep)
                        || !names_being_checked.contains(dep)
                        || pending[i].1.cycles.iter().any(|c| c.path.contains(dep))
                });
                if ready {
                    let (index, item) = pending.remove(i);
                    let task = self.make_task(&item, options, for_autocomplete, index, tx.clone());
                    recorded[index] = Some(item);
                    in_flight += 1;
                    execute(task);
                } else {
                    i += 1;
                }
            }

            if in_flight == 0 {
                if pending.is_empty() {
                    break;
                }
                // A dependency stall with nothing in flight means the graph
                // has an unplanned edge; run the rest inline to make progress.
                for (index, item) in pending.drain(..) {
                    let module = self.run_item(&item, options, for_autocomplete);
                    tx.send((index, module)).ok();
                    recorded[index] = Some(item);
                    in_flight += 1;
                }
            }

            let Ok((index, module)) = rx.recv() else {
                break;
            };
            in_flight -= 1;
            done += 1;
            let item = recorded[index]
                .take()
                .expect("completed task must have a planned item");
            completed.insert(item.name.clone());
            self.record_item(&item, module, options, for_autocomplete);
            if let Some(progress) = progress {
                progress(done, total);
            }
        }
    }

    fn make_task(
        &self,
        item: &BuildQueueItem,
        options: &FrontendOptions,
        for_autocomplete: bool,
        index: usize,
        tx: mpsc::Sender<(usize, Module)>,
    ) -> Box<dyn FnOnce() + Send> {
        let item = BuildQueueItem {
            name: item.name.clone(),
            source: item.source.clone(),
            mode: item.mode,
            cycles: item.cycles.clone(),
            requires: item.requires.clone(),
        };
        let options = *options;
        let builtins = self.builtins;
        let flags = self.flags;
        let limits = self.limits;
        let globals = if for_autocomplete {
            self.globals_for_autocomplete.clone()
        } else {
            self.globals.clone()
        };
        let resolver = self.resolver(for_autocomplete).clone();
        let inference = self.inference.clone();
        let lint = self.lint.clone();

        Box::new(move || {
            let module = run_build_item(
                &item,
                &options,
                &builtins,
                &flags,
                &limits,
                &globals,
                &resolver,
                inference.as_ref(),
                lint.as_deref(),
            );
            tx.send((index, module)).ok();
        })
    }

    // ========================================================================
    // Environments and definition files
    // ========================================================================

    /// Register a named environment derived from the current globals.
    pub fn add_environment(&mut self, name: &str) -> Arc<GlobalTypes> {
        let base = self.globals.clone();
        self.environments
            .entry(name.to_string())
            .or_insert(base)
            .clone()
    }

    pub fn get_environment_scope(&self, name: &str) -> Option<Arc<GlobalTypes>> {
        self.environments.get(name).cloned()
    }

    /// Parse and check a definition file in `Definition` mode, then export
    /// its declared globals into the environment for the chosen view.
    pub fn load_definition_file(
        &mut self,
        source: &str,
        package_name: &str,
        _capture_comments: bool,
        for_autocomplete: bool,
    ) -> LoadDefinitionFileResult {
        let module_name: ModuleName = format!("@{}", package_name);
        let parse = self.parser.parse(&module_name, source);
        if !parse.errors.is_empty() {
            return LoadDefinitionFileResult {
                success: false,
                parse_errors: parse.errors,
                module: None,
            };
        }

        let source_module = SourceModule {
            name: module_name.clone(),
            human_name: package_name.to_string(),
            root: parse.root,
            hot_comments: parse.hot_comments,
            parse_errors: Vec::new(),
            lines: parse.lines,
            interner: parse.interner,
        };

        let globals = if for_autocomplete {
            self.globals_for_autocomplete.clone()
        } else {
            self.globals.clone()
        };
        let resolver = self.resolver(for_autocomplete).clone();
        let mut module = self.inference.infer(
            &source_module,
            Mode::Definition,
            &[],
            &globals,
            &resolver,
            &self.options,
            &self.limits,
        );
        check_module(
            &source_module,
            &mut module,
            &self.builtins,
            &globals,
            &self.flags,
            &self.limits,
        );

        let success = module.errors.is_empty();
        let module = Arc::new(module);
        if success {
            self.copy_globals_from_module(&module, for_autocomplete);
        }

        LoadDefinitionFileResult {
            success,
            parse_errors: Vec::new(),
            module: Some(module),
        }
    }

    /// Deep-clone a module's declared globals into the environment of the
    /// chosen view. The environment grows a new frozen arena layer; modules
    /// checked afterwards see the new bindings.
    pub fn copy_globals_from_module(&mut self, module: &Module, for_autocomplete: bool) -> bool {
        let globals_arc = if for_autocomplete {
            &mut self.globals_for_autocomplete
        } else {
            &mut self.globals
        };

        let old = globals_arc.as_ref();
        let mut next_arena = crate::sema::arena::TypeArena::with_base(old.arena.clone());
        let mut state = CloneState::new();
        let mut new_bindings: Vec<(String, crate::sema::types::TypeId)> = Vec::new();
        for (name, &ty) in &module.declared_globals {
            let cloned = clone_type(
                ty,
                &module.internal_types,
                &mut next_arena,
                &mut state,
                &self.flags,
            );
            new_bindings.push((name.clone(), cloned));
        }
        next_arena.freeze();

        let globals = Arc::make_mut(globals_arc);
        globals.arena = Arc::new(next_arena);
        let global_scope = globals.global_scope;
        for (name, ty) in new_bindings {
            globals
                .scopes
                .get_mut(global_scope)
                .bindings
                .insert(BindingKey::Global(name), ty);
        }

        true
    }
}

/// The inference + validation body shared by inline checking and dispatched
/// tasks.
#[allow(clippy::too_many_arguments)]
fn run_build_item(
    item: &BuildQueueItem,
    options: &FrontendOptions,
    builtins: &BuiltinTypes,
    flags: &FeatureFlags,
    limits: &TypeCheckLimits,
    globals: &GlobalTypes,
    resolver: &FrontendModuleResolver,
    inference: &dyn InferenceEngine,
    lint: Option<&dyn LintEngine>,
) -> Module {
    let check_start = Instant::now();

    // A file that failed to parse blocks only itself
    if !item.source.parse_errors.is_empty() {
        let mut module = Module::new(
            item.name.clone(),
            item.source.human_name.clone(),
            Mode::NoCheck,
            globals,
        );
        for parse_error in &item.source.parse_errors {
            module.errors.push(TypeError::new(
                parse_error.span,
                item.name.clone(),
                TypeErrorData::SyntaxError {
                    message: parse_error.message.clone(),
                },
            ));
        }
        return module;
    }

    // Cyclic dependencies get an empty placeholder so importers observe
    // any-shaped exports instead of a missing module.
    for cycle in &item.cycles {
        for participant in &cycle.path {
            if participant != &item.name && !resolver.module_exists(participant) {
                resolver.set_module(
                    participant.clone(),
                    Arc::new(Module::cycle_placeholder(participant.clone(), globals)),
                );
            }
        }
    }

    let mut module = inference.infer(
        &item.source,
        item.mode,
        &item.cycles,
        globals,
        resolver,
        options,
        limits,
    );

    if item.mode != Mode::NoCheck {
        check_module(&item.source, &mut module, builtins, globals, flags, limits);
    }

    for cycle in &item.cycles {
        module.errors.push(TypeError::new(
            cycle.span,
            item.name.clone(),
            TypeErrorData::ModuleHasCyclicDependency {
                cycle: cycle.path.clone(),
            },
        ));
    }

    if options.run_lint_checks
        && let Some(lint) = lint
    {
        let lint_options = options.enabled_lint_warnings.unwrap_or_default();
        module.lint_warnings = lint.lint(&item.source, &module, &lint_options);
    }

    trace!(
        module = %item.name,
        elapsed = check_start.elapsed().as_secs_f64(),
        errors = module.errors.len(),
        "module checked"
    );
    module
}

/// Split lint warnings into errors and warnings per the module's config.
pub fn classify_lints(warnings: &[LintWarning], config: &Config) -> LintResult {
    let mut result = LintResult::default();
    for warning in warnings {
        if config.lint_errors.is_enabled(warning.code) {
            result.errors.push(warning.clone());
        } else {
            result.warnings.push(warning.clone());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hot(content: &str, header: bool) -> HotComment {
        HotComment {
            header,
            content: content.to_string(),
            span: Span::default(),
        }
    }

    #[test]
    fn mode_comes_from_header_comments() {
        assert_eq!(parse_mode(&[hot("strict", true)]), Some(Mode::Strict));
        assert_eq!(parse_mode(&[hot("nonstrict", true)]), Some(Mode::Nonstrict));
        assert_eq!(parse_mode(&[hot("nocheck", true)]), Some(Mode::NoCheck));
        assert_eq!(parse_mode(&[hot("strict", false)]), None);
        assert_eq!(parse_mode(&[hot("optimize 2", true)]), None);
        assert_eq!(parse_mode(&[]), None);
    }

    #[test]
    fn lint_classification_respects_error_promotion() {
        let mut config = Config::default();
        config.lint_errors.enable(3);

        let warnings = vec![
            LintWarning {
                code: 3,
                span: Span::default(),
                text: "promoted".into(),
            },
            LintWarning {
                code: 4,
                span: Span::default(),
                text: "plain".into(),
            },
        ];

        let result = classify_lints(&warnings, &config);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.warnings.len(), 1);
    }
}
