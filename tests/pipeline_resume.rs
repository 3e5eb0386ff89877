//! End-to-end pipeline tests against a scripted completion backend.
//!
//! These drive the whole orchestrator (generation pools, scorer routing,
//! consensus voting, checkpointing) and assert the properties the
//! pipeline promises: zero completion calls on resume, fail-fast
//! validation before any network traffic, and failure isolation per
//! sample.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Map;
use uuid::Uuid;

use evalforge::checkpoint::CheckpointStore;
use evalforge::error::CompletionError;
use evalforge::llm::{Choice, CompletionBackend, CompletionRequest, CompletionResponse, Message, Usage};
use evalforge::pipeline::{Config, JudgeConfig, JudgeParams, ModelConfig, Pipeline, PipelineError, ScorerConfig};
use evalforge::schema::{EvaluationData, Generation, Sample, SampleOutputsWithScore, SampleWithOutputs};

/// Backend that answers each model with a fixed body and counts every call.
struct MockBackend {
    calls: AtomicUsize,
    /// Per-model scripted content; a missing entry means the call fails.
    responses: HashMap<String, String>,
}

impl MockBackend {
    fn new(responses: &[(&str, &str)]) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            responses: responses
                .iter()
                .map(|(model, content)| (model.to_string(), content.to_string()))
                .collect(),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionBackend for MockBackend {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let content = self
            .responses
            .get(&request.model)
            .ok_or_else(|| CompletionError::RequestFailed(format!("no backend for {}", request.model)))?;
        Ok(CompletionResponse {
            id: "resp".to_string(),
            model: request.model,
            created: 1_760_000_000,
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(content.clone()),
                finish_reason: "stop".to_string(),
            }],
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
                cost: Some(0.001),
            },
        })
    }
}

fn model(model: &str) -> ModelConfig {
    ModelConfig {
        name: model.to_string(),
        model: model.to_string(),
        parallelism: 2,
        retry_budget: 1,
        region: None,
    }
}

fn judge(model: &str, weight: f64) -> JudgeConfig {
    JudgeConfig {
        model: model.to_string(),
        weight,
        params: JudgeParams::default(),
    }
}

fn config(models: Vec<ModelConfig>, judges: Vec<JudgeConfig>) -> Config {
    let mut scorers = HashMap::new();
    scorers.insert(
        "exact_match".to_string(),
        ScorerConfig {
            parallelism: 2,
            judges: vec![],
        },
    );
    scorers.insert(
        "judgment".to_string(),
        ScorerConfig {
            parallelism: 2,
            judges,
        },
    );
    Config { models, scorers }
}

fn exact_sample(expected: &str) -> Sample {
    let mut data = Map::new();
    data.insert("expected".to_string(), expected.into());
    sample("exact_match", data)
}

fn judgment_sample() -> Sample {
    let mut data = Map::new();
    data.insert("criterion".to_string(), "names the capital of France".into());
    sample("judgment", data)
}

fn sample(scorer: &str, data: Map<String, serde_json::Value>) -> Sample {
    Sample {
        id: Uuid::new_v4(),
        module: "geography".to_string(),
        task: "capitals".to_string(),
        language: "en".to_string(),
        generations: vec![Generation {
            id: Uuid::new_v4(),
            messages: vec![Message::user("What is the capital of France?")],
            params: Default::default(),
            metadata: Map::new(),
            num_repeats: 1,
        }],
        metadata: Map::new(),
        evaluation: EvaluationData {
            scorer: scorer.to_string(),
            data,
        },
    }
}

#[tokio::test]
async fn full_run_then_resume_makes_zero_new_calls() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CheckpointStore::new(dir.path().join("run-1"));
    let backend = Arc::new(MockBackend::new(&[
        ("mock/alpha", "Paris"),
        ("mock/beta", "Paris"),
        ("judge-a", r#"{"decision": 1, "reason": "correct"}"#),
        ("judge-b", r#"{"decision": 1}"#),
    ]));
    let config = config(
        vec![model("mock/alpha"), model("mock/beta")],
        vec![judge("judge-a", 2.0), judge("judge-b", 1.0)],
    );
    let samples = vec![exact_sample("Paris"), exact_sample("Lyon"), judgment_sample()];

    let mut pipeline = Pipeline::new(config.clone(), store.clone(), backend.clone());
    let summary = pipeline.run(samples.clone()).await.expect("run should finish");

    // 3 samples x 2 models generations, plus 2 judges x 2 models for the
    // judgment sample.
    assert_eq!(backend.calls(), 10);
    assert_eq!(summary.snapshot.total, 12);
    assert_eq!(summary.snapshot.current, 12);
    for name in ["mock/alpha", "mock/beta"] {
        assert_eq!(summary.snapshot.models[name].success, 3);
        assert_eq!(summary.snapshot.models[name].error, 0);
    }
    assert_eq!(summary.snapshot.scorers["exact_match"].success, 4);
    assert_eq!(summary.snapshot.scorers["judgment"].success, 2);

    // Every (sample, model) pair produced its checkpoints.
    for sample in &samples {
        for model_name in ["mock/alpha", "mock/beta"] {
            assert!(store.exists(&store.generate_path(model_name, sample.id)));
            let result: SampleOutputsWithScore = store
                .load(&store.result_path(model_name, "geography", "capitals", sample.id))
                .expect("load")
                .expect("result checkpoint present");
            assert_eq!(result.sample_with_outputs.sample.id, sample.id);
        }
    }

    // The "Paris" sample matched, the "Lyon" one did not.
    let matched: SampleOutputsWithScore = store
        .load(&store.result_path("mock/alpha", "geography", "capitals", samples[0].id))
        .expect("load")
        .expect("present");
    assert_eq!(matched.scoring.score, 1.0);
    let missed: SampleOutputsWithScore = store
        .load(&store.result_path("mock/alpha", "geography", "capitals", samples[1].id))
        .expect("load")
        .expect("present");
    assert_eq!(missed.scoring.score, 0.0);

    // Second run against the same run directory: every checkpoint hits, no
    // completion call reaches the backend.
    let mut resumed = Pipeline::new(config, store, backend.clone());
    let summary = resumed.run(samples).await.expect("resume should finish");

    assert_eq!(backend.calls(), 10);
    assert_eq!(summary.snapshot.scorers["exact_match"].skipped, 4);
    assert_eq!(summary.snapshot.scorers["judgment"].skipped, 2);
    for name in ["mock/alpha", "mock/beta"] {
        assert_eq!(summary.snapshot.models[name].success, 3);
    }
}

#[tokio::test]
async fn invalid_sample_aborts_before_any_completion_call() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CheckpointStore::new(dir.path().join("run-2"));
    let backend = Arc::new(MockBackend::new(&[("mock/alpha", "Paris")]));
    let config = config(vec![model("mock/alpha")], vec![judge("judge-a", 1.0)]);

    // Second sample is missing its "expected" field.
    let valid = exact_sample("Paris");
    let invalid = sample("exact_match", Map::new());
    let invalid_id = invalid.id;

    let mut pipeline = Pipeline::new(config, store, backend.clone());
    let err = pipeline
        .run(vec![valid, invalid])
        .await
        .expect_err("validation should abort the run");

    assert_eq!(backend.calls(), 0);
    match err {
        PipelineError::Validation { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures["exact_match"], vec![invalid_id]);
        }
        other => panic!("expected validation failure, got {other}"),
    }
}

#[tokio::test]
async fn failed_generation_is_isolated_and_recorded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CheckpointStore::new(dir.path().join("run-3"));
    // "mock/broken" has no scripted response, so its completions fail and
    // the retry budget of one makes the failure permanent.
    let backend = Arc::new(MockBackend::new(&[("mock/alpha", "Paris")]));
    let config = config(
        vec![model("mock/alpha"), model("mock/broken")],
        vec![judge("judge-a", 1.0)],
    );
    let samples = vec![exact_sample("Paris")];

    let mut pipeline = Pipeline::new(config, store.clone(), backend.clone());
    let summary = pipeline.run(samples.clone()).await.expect("run should finish");

    assert_eq!(summary.snapshot.models["mock/alpha"].success, 1);
    assert_eq!(summary.snapshot.models["mock/broken"].error, 1);
    assert_eq!(summary.snapshot.scorers["exact_match"].success, 1);

    let sample_id = samples[0].id;
    assert!(store.exists(&store.generate_error_path("mock/broken", sample_id)));
    assert!(!store.exists(&store.generate_path("mock/broken", sample_id)));
    assert!(!store.exists(&store.result_path(
        "mock/broken",
        "geography",
        "capitals",
        sample_id
    )));

    // The healthy model's result is unaffected.
    let loaded: SampleWithOutputs = store
        .load(&store.generate_path("mock/alpha", sample_id))
        .expect("load")
        .expect("present");
    assert_eq!(loaded.model_outputs.model, "mock/alpha");
}

#[tokio::test]
async fn split_vote_counts_as_scoring_failure_without_crashing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = CheckpointStore::new(dir.path().join("run-4"));
    // Equal-weight judges disagree: neither side exceeds half the total.
    let backend = Arc::new(MockBackend::new(&[
        ("mock/alpha", "Paris"),
        ("judge-a", r#"{"decision": 1}"#),
        ("judge-b", r#"{"decision": 0}"#),
    ]));
    let config = config(
        vec![model("mock/alpha")],
        vec![judge("judge-a", 1.0), judge("judge-b", 1.0)],
    );
    let samples = vec![judgment_sample(), exact_sample("Paris")];

    let mut pipeline = Pipeline::new(config, store.clone(), backend.clone());
    let summary = pipeline.run(samples.clone()).await.expect("run should finish");

    // The split vote fails that sample's scoring; the other sample and the
    // run itself are untouched.
    assert_eq!(summary.snapshot.scorers["judgment"].error, 1);
    assert_eq!(summary.snapshot.scorers["judgment"].success, 0);
    assert_eq!(summary.snapshot.scorers["exact_match"].success, 1);
    assert_eq!(summary.snapshot.models["mock/alpha"].success, 2);

    assert!(!store.exists(&store.result_path(
        "mock/alpha",
        "geography",
        "capitals",
        samples[0].id
    )));
}
