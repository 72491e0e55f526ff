//! Discovery over manifest trees: defaults, precedence, skipping rules and
//! filters.

use std::fs;
use std::path::Path;

use casebench_core::{register_eval, CaseReturn, EvalFunction, EvalRegistry, EvalResult, Parametrize};
use casebench_runner::{
    discover, unique_datasets, unique_labels, DiscoveryError, DiscoveryFilter, EvalRunner,
    RunOptions,
};
use serde_json::json;

fn write(dir: &Path, rel: &str, body: &str) {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, body).unwrap();
}

fn cli_case() -> EvalFunction {
    EvalFunction::plain("test_cli", |_args| Ok(EvalResult::new("cli", "test").into()))
}

fn names(functions: &[EvalFunction]) -> Vec<String> {
    functions.iter().map(|f| f.name().to_string()).collect()
}

fn sample_registry() -> EvalRegistry {
    let registry = EvalRegistry::new();
    register_eval!(registry, "sentiment", cli_case()).unwrap();
    register_eval!(
        registry,
        "sentiment",
        EvalFunction::with_context("labelled", |ctx, _args| {
            ctx.add_output("x");
            Ok(CaseReturn::Auto)
        })
        .with_labels(["experimental"])
        .with_dataset("own")
    )
    .unwrap();
    register_eval!(
        registry,
        "math",
        EvalFunction::plain("add", |args| {
            let x = args["x"].as_i64().unwrap_or_default();
            let y = args["y"].as_i64().unwrap_or_default();
            Ok(EvalResult::new(x, y).into())
        })
        .parametrize(
            Parametrize::new(
                "x,y",
                vec![json!([1, 2]), json!([3, 4]), json!([5, 6])],
            )
            .unwrap(),
        )
    )
    .unwrap();
    registry
}

#[tokio::test]
async fn single_manifest_single_function_summary() {
    let dir = tempfile::tempdir().unwrap();
    let registry = EvalRegistry::new();
    register_eval!(registry, "cli_eval", cli_case()).unwrap();
    write(dir.path(), "cli_eval.toml", "");

    let summary = EvalRunner::new(0, None)
        .run(&registry, &dir.path().join("cli_eval.toml"), &RunOptions::default())
        .await
        .unwrap();

    assert_eq!(summary.total_functions, 1);
    assert_eq!(summary.total_evaluations, 1);
    assert_eq!(summary.total_errors, 0);
    assert_eq!(summary.results[0].dataset, "cli_eval");
}

#[test]
fn defaults_fill_only_unprovided_fields() {
    let dir = tempfile::tempdir().unwrap();
    let registry = sample_registry();
    write(
        dir.path(),
        "sentiment.toml",
        r#"
            [defaults]
            dataset = "sentiment_analysis"
            labels = ["production"]
            metadata = { model = "gpt-4" }
            unsupported_key = 1
        "#,
    );

    let functions = discover(&registry, dir.path(), &DiscoveryFilter::default()).unwrap();
    assert_eq!(names(&functions), vec!["test_cli", "labelled"]);

    let plain = &functions[0];
    assert_eq!(plain.dataset(), "sentiment_analysis");
    assert_eq!(plain.labels(), &["production".to_string()]);
    assert_eq!(plain.config().metadata.as_ref().unwrap()["model"], json!("gpt-4"));

    let own = &functions[1];
    assert_eq!(own.dataset(), "own");
    assert_eq!(own.labels(), &["experimental".to_string()]);
}

#[test]
fn parametrized_templates_expand_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let registry = sample_registry();
    write(dir.path(), "math.toml", "");

    let functions = discover(&registry, dir.path(), &DiscoveryFilter::default()).unwrap();
    assert_eq!(names(&functions), vec!["add[0]", "add[1]", "add[2]"]);

    let pairs: Vec<_> = functions
        .iter()
        .map(|f| {
            let result = &f.call(Default::default()).unwrap()[0];
            (result.input.clone(), result.output.clone())
        })
        .collect();
    assert_eq!(
        pairs,
        vec![(json!(1), json!(2)), (json!(3), json!(4)), (json!(5), json!(6))]
    );
}

#[test]
fn walk_skips_hidden_private_and_broken_manifests() {
    let dir = tempfile::tempdir().unwrap();
    let registry = sample_registry();
    write(dir.path(), "a/math.toml", "");
    write(dir.path(), ".hidden/sentiment.toml", "");
    write(dir.path(), "target/sentiment.toml", "");
    write(dir.path(), "_private.toml", "module = \"sentiment\"");
    write(dir.path(), "broken.toml", "module = [");
    write(dir.path(), "orphan.toml", "module = \"nobody\"");
    write(dir.path(), "notes.txt", "module = \"sentiment\"");

    let functions = discover(&registry, dir.path(), &DiscoveryFilter::default()).unwrap();
    assert_eq!(names(&functions), vec!["add[0]", "add[1]", "add[2]"]);
    assert_eq!(functions[0].dataset(), "math");
}

#[test]
fn manifest_module_overrides_file_stem() {
    let dir = tempfile::tempdir().unwrap();
    let registry = sample_registry();
    write(dir.path(), "nightly.toml", "module = \"sentiment\"");

    let functions = discover(&registry, &dir.path().join("nightly.toml"), &DiscoveryFilter::default())
        .unwrap();
    assert_eq!(functions.len(), 2);
    assert_eq!(functions[0].dataset(), "nightly");
}

#[test]
fn filters_apply_in_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let registry = sample_registry();
    write(dir.path(), "sentiment.toml", "[defaults]\nlabels = [\"production\"]\n");
    write(dir.path(), "math.toml", "");

    let all = discover(&registry, dir.path(), &DiscoveryFilter::default()).unwrap();
    assert_eq!(unique_datasets(&all), vec!["math", "own", "sentiment"]);
    assert_eq!(unique_labels(&all), vec!["experimental", "production"]);

    let by_dataset = discover(
        &registry,
        dir.path(),
        &DiscoveryFilter::new().with_dataset("own,math"),
    )
    .unwrap();
    assert_eq!(by_dataset.len(), 4);

    let by_label = discover(
        &registry,
        dir.path(),
        &DiscoveryFilter::new().with_labels(["experimental"]),
    )
    .unwrap();
    assert_eq!(names(&by_label), vec!["labelled"]);

    let by_name = discover(
        &registry,
        dir.path(),
        &DiscoveryFilter::new().with_function_name("add"),
    )
    .unwrap();
    assert_eq!(by_name.len(), 3);
}

#[tokio::test]
async fn limit_truncates_after_filters() {
    let dir = tempfile::tempdir().unwrap();
    let registry = sample_registry();
    write(dir.path(), "math.toml", "");
    let options = RunOptions {
        limit: Some(2),
        ..RunOptions::default()
    };

    let summary = EvalRunner::from_options(&options)
        .run(&registry, dir.path(), &options)
        .await
        .unwrap();
    assert_eq!(summary.total_evaluations, 2);
    assert_eq!(summary.total_functions, 2);
}

#[test]
fn bad_paths_are_errors() {
    let dir = tempfile::tempdir().unwrap();
    let registry = EvalRegistry::new();
    write(dir.path(), "notes.txt", "");

    let missing = discover(&registry, &dir.path().join("nope"), &DiscoveryFilter::default());
    assert!(matches!(missing, Err(DiscoveryError::PathNotFound { .. })));

    let wrong_kind = discover(&registry, &dir.path().join("notes.txt"), &DiscoveryFilter::default());
    assert!(matches!(wrong_kind, Err(DiscoveryError::PathKind { .. })));
}

#[tokio::test]
async fn output_file_receives_summary() {
    let dir = tempfile::tempdir().unwrap();
    let registry = EvalRegistry::new();
    register_eval!(registry, "cli_eval", cli_case()).unwrap();
    write(dir.path(), "evals/cli_eval.toml", "");
    let output = dir.path().join("out/results.json");
    let options = RunOptions {
        output_file: Some(output.clone()),
        ..RunOptions::default()
    };

    EvalRunner::from_options(&options)
        .run(&registry, &dir.path().join("evals"), &options)
        .await
        .unwrap();

    let written: serde_json::Value = serde_json::from_slice(&fs::read(output).unwrap()).unwrap();
    assert_eq!(written["total_evaluations"], json!(1));
    assert_eq!(written["results"][0]["function_name"], json!("test_cli"));
}
