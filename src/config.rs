// src/config.rs
//! Per-module configuration, frontend options, feature flags, and check limits.

use std::time::Instant;

use crate::errors::ModuleName;

/// Type checking mode for a single module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Parse and collect syntax errors only
    NoCheck,
    /// Infer types, report only the most trustworthy diagnostics
    Nonstrict,
    /// Full inference and validation
    Strict,
    /// Declaration file for a builtin or host-provided library
    Definition,
}

/// Which lint warnings are enabled, as a bit mask over warning codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LintOptions {
    pub warning_mask: u64,
}

impl LintOptions {
    pub fn all() -> Self {
        Self {
            warning_mask: u64::MAX,
        }
    }

    pub fn is_enabled(&self, code: u32) -> bool {
        code < 64 && (self.warning_mask & (1 << code)) != 0
    }

    pub fn enable(&mut self, code: u32) {
        if code < 64 {
            self.warning_mask |= 1 << code;
        }
    }
}

/// Per-module configuration from the external config resolver
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub lint_options: LintOptions,
    /// Warnings promoted to errors
    pub lint_errors: LintOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Nonstrict,
            lint_options: LintOptions::default(),
            lint_errors: LintOptions::default(),
        }
    }
}

/// Supplies a `Config` for each module; consumed from the embedder
pub trait ConfigResolver: Send + Sync {
    fn config_for(&self, name: &ModuleName) -> Config;
}

/// A resolver that hands every module the same configuration
#[derive(Debug, Default)]
pub struct NullConfigResolver {
    pub config: Config,
}

impl ConfigResolver for NullConfigResolver {
    fn config_for(&self, _name: &ModuleName) -> Config {
        self.config.clone()
    }
}

/// Options for a single `Frontend::check` run
#[derive(Debug, Clone, Copy, Default)]
pub struct FrontendOptions {
    /// When true, retain full type information about every term in the AST.
    /// Setting this to false cuts back on RAM and is a good idea for batch
    /// jobs where the type graph is not deeply inspected after checking.
    pub retain_full_type_graphs: bool,

    /// Check in the mode required for autocomplete (strict, for more precise
    /// type information) and store results in the autocomplete view.
    pub for_autocomplete: bool,

    pub run_lint_checks: bool,

    /// If set, shuffle the constraint set before solving; the value seeds the
    /// random number generator. Forwarded to the inference engine for
    /// determinism testing.
    pub randomize_constraint_resolution_seed: Option<u32>,

    pub enabled_lint_warnings: Option<LintOptions>,
}

/// Feature flags threaded through the orchestrator and the checker.
/// A value, not process-global state.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureFlags {
    /// Keep `Bound` indirections when cloning instead of flattening them
    pub debug_preserve_bound_on_clone: bool,
}

/// Resource limits for checking one module
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeCheckLimits {
    pub finish_time: Option<Instant>,
    pub instantiation_child_limit: Option<usize>,
    pub unifier_iteration_limit: Option<usize>,
}

impl TypeCheckLimits {
    pub fn time_exceeded(&self) -> bool {
        match self.finish_time {
            Some(deadline) => Instant::now() > deadline,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lint_mask_roundtrip() {
        let mut opts = LintOptions::default();
        assert!(!opts.is_enabled(3));
        opts.enable(3);
        assert!(opts.is_enabled(3));
        assert!(!opts.is_enabled(4));
        assert!(LintOptions::all().is_enabled(63));
    }

    #[test]
    fn no_deadline_never_exceeds() {
        let limits = TypeCheckLimits::default();
        assert!(!limits.time_exceeded());
    }
}
