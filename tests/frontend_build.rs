// tests/frontend_build.rs
//
// Orchestrator scenarios over the in-memory stubs: require cycles, dirty
// propagation, check idempotence, batch checking through a dispatcher, and
// definition file loading.

mod support;

use std::sync::Arc;

use stoat_analysis::config::{FrontendOptions, Mode, NullConfigResolver};
use stoat_analysis::errors::TypeErrorData;
use stoat_analysis::frontend::Frontend;

use support::{CountingInference, LineParser, MemoryFileResolver};

fn frontend_over(
    sources: &[(&str, &str)],
) -> (Frontend, Arc<MemoryFileResolver>, Arc<CountingInference>) {
    let files = MemoryFileResolver::new(sources);
    let inference = CountingInference::new();
    let frontend = Frontend::new(
        files.clone(),
        Arc::new(NullConfigResolver::default()),
        Arc::new(LineParser),
        inference.clone(),
        FrontendOptions::default(),
    );
    (frontend, files, inference)
}

#[test]
fn check_walks_dependencies_in_order() {
    let (mut frontend, _files, inference) = frontend_over(&[
        ("A", "require B"),
        ("B", "require C"),
        ("C", ""),
    ]);

    let result = frontend.check(&"A".to_string(), None).unwrap();
    assert!(result.errors.is_empty(), "errors: {:?}", result.errors);

    let runs: Vec<String> = inference.runs().into_iter().map(|(name, _)| name).collect();
    assert_eq!(runs, vec!["C", "B", "A"], "dependencies check first");
    assert!(frontend.module_resolver.module_exists(&"C".to_string()));
}

#[test]
fn hot_comments_override_the_configured_mode() {
    let (mut frontend, _files, inference) = frontend_over(&[
        ("Strict", "--!strict\nrequire Plain"),
        ("Plain", ""),
        ("NoCheck", "--!nocheck"),
    ]);

    frontend.check(&"Strict".to_string(), None).unwrap();
    frontend.check(&"NoCheck".to_string(), None).unwrap();

    let runs = inference.runs();
    let mode_of = |name: &str| {
        runs.iter()
            .find(|(n, _)| n == name)
            .map(|&(_, mode)| mode)
            .unwrap()
    };
    assert_eq!(mode_of("Strict"), Mode::Strict);
    assert_eq!(mode_of("Plain"), Mode::Nonstrict, "config default applies");
    assert_eq!(mode_of("NoCheck"), Mode::NoCheck);
}

#[test]
fn require_cycles_get_placeholders_and_diagnostics() {
    let (mut frontend, _files, _inference) = frontend_over(&[
        ("A", "require B"),
        ("B", "require C"),
        ("C", "require A"),
    ]);

    let result = frontend.check(&"A".to_string(), None).unwrap();

    let cyclic: Vec<_> = result
        .errors
        .iter()
        .filter(|e| matches!(e.data, TypeErrorData::ModuleHasCyclicDependency { .. }))
        .collect();
    assert_eq!(cyclic.len(), 3, "every participant reports the cycle");

    for name in ["A", "B", "C"] {
        let module = frontend
            .module_resolver
            .get_module(&name.to_string())
            .unwrap();
        assert_eq!(
            module
                .errors
                .iter()
                .filter(
                    |e| matches!(e.data, TypeErrorData::ModuleHasCyclicDependency { .. })
                )
                .count(),
            1,
            "{} must carry exactly one cycle diagnostic",
            name
        );
    }
}

#[test]
fn checking_twice_is_idempotent() {
    let (mut frontend, _files, inference) = frontend_over(&[
        ("A", "require B"),
        ("B", "require C"),
        ("C", "require A"),
    ]);

    let first = frontend.check(&"A".to_string(), None).unwrap();
    let runs_after_first = inference.run_count();
    let second = frontend.check(&"A".to_string(), None).unwrap();

    assert_eq!(first.errors, second.errors);
    assert_eq!(
        inference.run_count(),
        runs_after_first,
        "a clean recheck does no inference work"
    );
}

#[test]
fn dirty_propagation_follows_reverse_dependencies() {
    let (mut frontend, files, inference) = frontend_over(&[
        ("A", "require B"),
        ("B", "require C"),
        ("C", ""),
        ("Lone", ""),
    ]);

    frontend.check(&"A".to_string(), None).unwrap();
    frontend.check(&"Lone".to_string(), None).unwrap();
    let baseline = inference.run_count();

    files.set_source("C", "--!strict");
    let mut affected = Vec::new();
    frontend.mark_dirty(&"C".to_string(), Some(&mut affected));
    affected.sort();
    assert_eq!(affected, vec!["A", "B", "C"], "reachable-to C, nothing else");
    assert!(frontend.is_dirty(&"A".to_string(), false));
    assert!(!frontend.is_dirty(&"Lone".to_string(), false));

    frontend.check(&"A".to_string(), None).unwrap();
    assert_eq!(
        inference.run_count(),
        baseline + 3,
        "A, B, and C re-run inference"
    );

    frontend.check(&"A".to_string(), None).unwrap();
    assert_eq!(
        inference.run_count(),
        baseline + 3,
        "no intervening mark_dirty, no inference work"
    );
}

#[test]
fn parse_errors_block_only_their_module() {
    let (mut frontend, _files, inference) = frontend_over(&[
        ("A", "require Broken\nrequire Fine"),
        ("Broken", "!!syntax-error"),
        ("Fine", ""),
    ]);

    let result = frontend.check(&"A".to_string(), None).unwrap();

    assert!(
        result
            .errors
            .iter()
            .any(|e| matches!(e.data, TypeErrorData::SyntaxError { .. })
                && e.module_name == "Broken"),
        "the broken module surfaces its parse error: {:?}",
        result.errors
    );

    let runs: Vec<String> = inference.runs().into_iter().map(|(name, _)| name).collect();
    assert!(runs.contains(&"Fine".to_string()), "peers still check");
    assert!(runs.contains(&"A".to_string()));
    assert!(
        !runs.contains(&"Broken".to_string()),
        "a module that failed to parse never reaches inference"
    );
}

#[test]
fn autocomplete_view_is_independent_and_strict() {
    let (mut frontend, _files, inference) = frontend_over(&[("A", "")]);

    let options = FrontendOptions {
        for_autocomplete: true,
        ..Default::default()
    };
    frontend.check(&"A".to_string(), Some(options)).unwrap();

    assert_eq!(inference.runs(), vec![("A".to_string(), Mode::Strict)]);
    assert!(
        frontend
            .module_resolver_for_autocomplete
            .module_exists(&"A".to_string())
    );
    assert!(
        !frontend.module_resolver.module_exists(&"A".to_string()),
        "the normal view stays untouched"
    );

    // The normal view still needs its own pass
    frontend.check(&"A".to_string(), None).unwrap();
    assert_eq!(inference.run_count(), 2);
}

#[test]
fn queued_modules_check_through_the_dispatcher() {
    let (mut frontend, _files, inference) = frontend_over(&[
        ("A", "require Shared"),
        ("B", "require Shared"),
        ("Shared", ""),
    ]);

    frontend.queue_module_check(&["A".to_string(), "B".to_string()]);

    let dispatched = std::sync::Mutex::new(0usize);
    let checked = frontend
        .check_queued_modules(
            None,
            Some(&|task| {
                *dispatched.lock().unwrap() += 1;
                task();
            }),
            None,
        )
        .unwrap();

    assert_eq!(checked.len(), 3, "A, B, and the shared dependency");
    assert_eq!(*dispatched.lock().unwrap(), 3);
    assert_eq!(inference.run_count(), 3, "the shared module checks once");
    assert!(frontend.module_resolver.module_exists(&"Shared".to_string()));
    assert!(frontend.module_resolver.module_exists(&"A".to_string()));
    assert!(frontend.module_resolver.module_exists(&"B".to_string()));
}

#[test]
fn definition_files_extend_the_environment() {
    let files = MemoryFileResolver::new(&[]);
    let inference = CountingInference::with_declared_global("VERSION");
    let mut frontend = Frontend::new(
        files,
        Arc::new(NullConfigResolver::default()),
        Arc::new(LineParser),
        inference.clone(),
        FrontendOptions::default(),
    );

    assert!(frontend.globals(false).lookup_global("VERSION").is_none());

    let result = frontend.load_definition_file("", "host", false, false);
    assert!(result.success);
    assert_eq!(
        inference.runs(),
        vec![("@host".to_string(), Mode::Definition)]
    );

    let globals = frontend.globals(false);
    let version = globals.lookup_global("VERSION");
    assert!(version.is_some(), "the declared global lands in scope");
    assert!(
        globals.arena.is_frozen(),
        "the environment freezes again after the import"
    );
}
