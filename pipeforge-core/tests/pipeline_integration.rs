//! End-to-end tests: declarations through committed artifacts.

use pipeforge_core::{
    ArtifactKind, ArtifactRef, ArtifactStore, CommitOptions, ExecutionContext, InMemoryArtifactStore,
    LocalArtifactStore, MetricValue, NodeCall, NodeDecl, ParamValue, Pipeline, PipelineError,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

fn passthrough(call: NodeCall<'_>) -> anyhow::Result<Value> {
    Ok(call.inputs.single().cloned().unwrap_or_default())
}

fn counting_loader(name: &str, value: Value, counter: &Arc<AtomicUsize>) -> NodeDecl {
    let counter = Arc::clone(counter);
    NodeDecl::loader(name, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(value.clone())
    })
}

/// Image pipeline: load → resize → grayscale → dataset sink.
fn register_flavia(pipeline: &Pipeline) {
    pipeline
        .register(NodeDecl::loader("load_images", |_| {
            Ok(json!([{"w": 128, "h": 128, "rgb": true}, {"w": 256, "h": 64, "rgb": true}]))
        }))
        .unwrap();
    pipeline
        .register(
            NodeDecl::transformer("resize", |call| {
                let size = call.arg("size").cloned().unwrap_or(json!(32));
                let images = call
                    .inputs
                    .single()
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let resized = images
                    .into_iter()
                    .map(|mut img| {
                        img["w"] = size.clone();
                        img["h"] = size.clone();
                        img
                    })
                    .collect();
                Ok(Value::Array(resized))
            })
            .parent("load_images")
            .arg("size", json!(64)),
        )
        .unwrap();
    pipeline
        .register(
            NodeDecl::transformer("grayscale", |call| {
                let images = call
                    .inputs
                    .single()
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                Ok(Value::Array(
                    images
                        .into_iter()
                        .map(|mut img| {
                            img["rgb"] = json!(false);
                            img
                        })
                        .collect(),
                ))
            })
            .parent("resize"),
        )
        .unwrap();
    pipeline
        .register(NodeDecl::dataset("flavia_dataset", "flavia:dev", passthrough).parent("grayscale"))
        .unwrap();
}

#[test]
fn test_flavia_dataset_scenario() {
    let pipeline = Pipeline::in_memory();
    register_flavia(&pipeline);

    let outcome = pipeline.materialize("flavia_dataset").unwrap();
    assert_eq!(outcome.artifact.reference(), &ArtifactRef::new("flavia", "dev", 1));
    assert_eq!(outcome.artifact.kind(), ArtifactKind::Dataset);
    assert_eq!(
        outcome.artifact.payload(),
        &json!([
            {"w": 64, "h": 64, "rgb": false},
            {"w": 64, "h": 64, "rgb": false}
        ])
    );
    assert_eq!(outcome.context.len(), 4);
    assert_eq!(
        outcome.artifact.lineage(),
        ["load_images", "resize", "grayscale", "flavia_dataset"]
    );
    assert!(outcome.artifact.verify_integrity());

    let fetched = pipeline.get("flavia:dev").unwrap();
    assert_eq!(fetched, outcome.artifact);
}

#[test]
fn test_diamond_invokes_shared_ancestor_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::in_memory();
    pipeline
        .register(counting_loader("a", json!(1), &calls))
        .unwrap();
    pipeline
        .register(
            NodeDecl::transformer("b", |call| {
                Ok(json!(call.inputs.single().and_then(Value::as_i64).unwrap_or(0) + 10))
            })
            .parent("a"),
        )
        .unwrap();
    pipeline
        .register(
            NodeDecl::transformer("c", |call| {
                Ok(json!(call.inputs.single().and_then(Value::as_i64).unwrap_or(0) + 100))
            })
            .parent("a"),
        )
        .unwrap();
    pipeline
        .register(
            NodeDecl::transformer("d", |call| {
                let total: i64 = call.inputs.to_vec().iter().filter_map(|v| v.as_i64()).sum();
                Ok(json!(total))
            })
            .parents(["b", "c"]),
        )
        .unwrap();
    pipeline
        .register(NodeDecl::dataset("ds", "diamond", passthrough).parent("d"))
        .unwrap();

    let outcome = pipeline.materialize("ds").unwrap();
    assert_eq!(outcome.artifact.payload(), &json!(112));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.context.invocation_count("a"), 1);
}

#[test]
fn test_rerun_in_same_context_reuses_results() {
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::in_memory();
    pipeline
        .register(counting_loader("a", json!("x"), &calls))
        .unwrap();
    pipeline
        .register(NodeDecl::transformer("b", passthrough).parent("a"))
        .unwrap();

    let mut ctx = ExecutionContext::new();
    pipeline.run_in("b", &mut ctx).unwrap();
    pipeline.run_in("b", &mut ctx).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.invocations().len(), 2);
}

#[test]
fn test_multi_parent_inputs_in_declaration_order() {
    let pipeline = Pipeline::in_memory();
    pipeline
        .register(NodeDecl::loader("b", |_| Ok(json!("from_b"))))
        .unwrap();
    pipeline
        .register(NodeDecl::loader("c", |_| Ok(json!("from_c"))))
        .unwrap();
    pipeline
        .register(
            NodeDecl::transformer("d", |call| {
                Ok(Value::Array(call.inputs.to_vec().into_iter().cloned().collect()))
            })
            .parents(["c", "b"]),
        )
        .unwrap();
    assert_eq!(pipeline.run("d").unwrap(), json!(["from_c", "from_b"]));
}

#[test]
fn test_failing_node_commits_nothing() {
    let downstream = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&downstream);
    let pipeline = Pipeline::in_memory();
    pipeline
        .register(NodeDecl::loader("A", |_| Ok(json!(1))))
        .unwrap();
    pipeline
        .register(NodeDecl::transformer("B", |_| anyhow::bail!("corrupt batch")).parent("A"))
        .unwrap();
    pipeline
        .register(
            NodeDecl::transformer("C", move |call| {
                seen.fetch_add(1, Ordering::SeqCst);
                passthrough(call)
            })
            .parent("B"),
        )
        .unwrap();
    pipeline
        .register(NodeDecl::dataset("sink", "broken", passthrough).parent("C"))
        .unwrap();

    let err = pipeline.materialize("sink").unwrap_err();
    assert_eq!(err.node_name(), Some("B"));
    assert!(matches!(err, PipelineError::NodeExecution { position: 1, .. }));
    assert_eq!(downstream.load(Ordering::SeqCst), 0);
    assert!(pipeline.versioner().list("broken", "dev").unwrap().is_empty());
}

#[test]
fn test_graph_errors_surface_before_execution() {
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::in_memory();
    pipeline
        .register(counting_loader("a", json!(1), &calls))
        .unwrap();
    pipeline
        .register(NodeDecl::transformer("b", passthrough).parents(["a", "missing"]))
        .unwrap();
    pipeline
        .register(NodeDecl::dataset("ds", "x", passthrough).parent("b"))
        .unwrap();

    let err = pipeline.materialize("ds").unwrap_err();
    assert!(matches!(
        err,
        PipelineError::UnknownNode { ref name, referenced_by: Some(ref by) }
            if name == "missing" && by == "b"
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cycle_detected() {
    let pipeline = Pipeline::in_memory();
    pipeline
        .register(NodeDecl::transformer("x", passthrough).parent("y"))
        .unwrap();
    pipeline
        .register(NodeDecl::transformer("y", passthrough).parent("x"))
        .unwrap();
    pipeline
        .register(NodeDecl::dataset("ds", "loop", passthrough).parent("x"))
        .unwrap();
    let err = pipeline.materialize("ds").unwrap_err();
    match err {
        PipelineError::CyclicDependency { cycle } => assert_eq!(cycle, vec!["x", "y", "x"]),
        other => panic!("expected cycle, got {other:?}"),
    }
}

#[test]
fn test_versions_per_branch() {
    let pipeline = Pipeline::in_memory();
    let versioner = pipeline.versioner();
    let versions: Vec<u32> = (0..3)
        .map(|i| {
            versioner
                .commit("ds", "dev", json!(i), CommitOptions::default())
                .unwrap()
                .version
        })
        .collect();
    assert_eq!(versions, vec![1, 2, 3]);
    let prod = versioner
        .commit("ds", "prod", json!("p"), CommitOptions::default())
        .unwrap();
    assert_eq!(prod, ArtifactRef::new("ds", "prod", 1));
}

#[test]
fn test_rematerializing_appends_versions() {
    let pipeline = Pipeline::in_memory();
    register_flavia(&pipeline);
    for expected in 1..=3 {
        let outcome = pipeline.materialize("flavia_dataset").unwrap();
        assert_eq!(outcome.reference().version, expected);
    }
    assert_eq!(pipeline.get("flavia:dev:2").unwrap().version(), 2);
    assert_eq!(pipeline.get("flavia").unwrap().version(), 3);
}

#[test]
fn test_unpersisted_dataset_stays_in_memory() {
    let store = Arc::new(InMemoryArtifactStore::new());
    let pipeline = Pipeline::with_store(store.clone(), "dev");
    pipeline
        .register(NodeDecl::loader("load", |_| Ok(json!([1]))))
        .unwrap();
    pipeline
        .register(
            NodeDecl::dataset("scratch", "scratch", passthrough)
                .parent("load")
                .persist(false),
        )
        .unwrap();

    let first = pipeline.materialize("scratch").unwrap();
    let second = pipeline.materialize("scratch").unwrap();
    assert_eq!(first.reference().version, 1);
    assert_eq!(second.reference().version, 2);
    assert!(store.versions("scratch", "dev").unwrap().is_empty());
    assert_eq!(pipeline.get("scratch:dev:1").unwrap().payload(), &json!([1]));
}

#[test]
fn test_model_training_with_metrics_and_params() {
    let pipeline = Pipeline::in_memory();
    register_flavia(&pipeline);
    pipeline
        .register(
            NodeDecl::model("classifier", "flavia-clf", |call| {
                let samples = call
                    .inputs
                    .single()
                    .and_then(Value::as_array)
                    .map(Vec::len)
                    .unwrap_or(0);
                for epoch in 0..3 {
                    call.log_metric("loss", 1.0 / f64::from(epoch + 1))?;
                }
                call.log_metric("accuracy", 0.93)?;
                call.log_param("learning_rate", 0.01)?;
                call.log_param("samples", samples as i64)?;
                Ok(json!({"kind": "logreg", "coef": [0.3, -0.2]}))
            })
            .parent("flavia_dataset"),
        )
        .unwrap();

    let outcome = pipeline.materialize("classifier").unwrap();
    let model = &outcome.artifact;
    assert_eq!(model.reference(), &ArtifactRef::new("flavia-clf", "dev", 1));
    assert_eq!(model.kind(), ArtifactKind::Model);
    assert_eq!(
        model.metrics()["loss"],
        MetricValue::Series(vec![1.0, 0.5, 1.0 / 3.0])
    );
    assert_eq!(model.metrics()["accuracy"], MetricValue::Scalar(0.93));
    assert_eq!(model.params()["samples"], ParamValue::Int(2));
    assert_eq!(model.params()["learning_rate"], ParamValue::Float(0.01));

    // Materializing the model does not commit the upstream dataset sink.
    assert!(pipeline.get("flavia").is_err());
}

#[test]
fn test_local_store_survives_new_pipeline() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(LocalArtifactStore::new(dir.path()));

    let first = Pipeline::with_store(store.clone(), "dev");
    register_flavia(&first);
    first.materialize("flavia_dataset").unwrap();

    let second = Pipeline::with_store(store, "dev");
    register_flavia(&second);
    let outcome = second.materialize("flavia_dataset").unwrap();
    assert_eq!(outcome.reference().version, 2);

    let reloaded = second.get("flavia:dev:1").unwrap();
    assert!(reloaded.verify_integrity());
    assert_eq!(reloaded.payload(), outcome.artifact.payload());
}

#[test]
fn test_concurrent_materializations_get_distinct_versions() {
    let pipeline = Pipeline::in_memory();
    register_flavia(&pipeline);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pipeline = pipeline.clone();
            std::thread::spawn(move || pipeline.materialize("flavia_dataset").map(|o| o.reference().version))
        })
        .collect();
    let mut versions: Vec<u32> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();
    versions.sort_unstable();
    assert_eq!(versions, vec![1, 2, 3, 4]);
}
