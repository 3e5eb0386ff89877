//! Generation stage: run every generation of a sample against one model.
//!
//! A sample's generations are processed strictly in order, but the
//! `num_repeats` completions of one generation run concurrently as an
//! all-or-nothing group: the first failed repeat drops its siblings and
//! fails the whole sample for this model. A failed sample is recorded under
//! `error/generate/` and never reaches scoring; a successful one is
//! checkpointed and forwarded to its scorer's queue.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::error::CompletionError;
use crate::llm::{complete_with_retry, CompletionBackend, CompletionRequest, RetryPolicy};
use crate::pipeline::config::ModelConfig;
use crate::schema::{
    FailedSample, Generation, ModelOutputs, Output, OutputChoice, OutputUsage, Sample,
    SampleWithOutputs,
};
use crate::stats::RunStats;
use crate::worker::{ScorerRouter, WorkQueue};

/// Everything one generation worker needs.
#[derive(Clone)]
pub struct GenerationContext {
    pub store: CheckpointStore,
    pub model: ModelConfig,
    pub backend: Arc<dyn CompletionBackend>,
    pub policy: RetryPolicy,
    pub stats: Arc<RunStats>,
    pub router: ScorerRouter,
    pub queue: WorkQueue<Sample>,
}

impl GenerationContext {
    /// Builds a context with the retry policy implied by the model config.
    pub fn new(
        store: CheckpointStore,
        model: ModelConfig,
        backend: Arc<dyn CompletionBackend>,
        stats: Arc<RunStats>,
        router: ScorerRouter,
        queue: WorkQueue<Sample>,
    ) -> Self {
        let policy = RetryPolicy::new(model.retry_budget);
        Self {
            store,
            model,
            backend,
            policy,
            stats,
            router,
            queue,
        }
    }
}

/// Issues one completion for one repeat of a generation.
async fn generate_output(
    backend: &dyn CompletionBackend,
    generation: &Generation,
    model: &str,
    policy: &RetryPolicy,
    region: Option<&str>,
) -> Result<Output, CompletionError> {
    let mut request = CompletionRequest::new(model, generation.messages.clone())
        .with_temperature(generation.params.temperature)
        .with_max_tokens(generation.params.max_tokens);
    if let Some(ref tools) = generation.params.tools {
        request.tools = Some(tools.clone());
    }
    request.extra_body = generation.params.extra_body.clone();

    let response = complete_with_retry(backend, request, policy, region, false).await?;
    let choice = response.choices.first().ok_or(CompletionError::MissingChoices)?;

    let created = chrono::DateTime::from_timestamp(response.created, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default();

    Ok(Output {
        id: generation.id,
        choices: vec![OutputChoice {
            finish_reason: choice.finish_reason.clone(),
            index: 0,
            message: choice.message.clone(),
        }],
        created,
        usage: OutputUsage {
            prompt_tokens: response.usage.prompt_tokens,
            completion_tokens: response.usage.completion_tokens,
            total_tokens: response.usage.total_tokens,
            cost: response.usage.cost,
        },
        raw_responses: vec![serde_json::to_value(&response).unwrap_or_default()],
    })
}

/// Runs one sample through generation for one model.
///
/// Returns the generated (or checkpoint-loaded) sample, or `None` when the
/// sample permanently failed and was recorded under `error/generate/`.
pub async fn generate_sample(
    store: &CheckpointStore,
    config: &ModelConfig,
    backend: &dyn CompletionBackend,
    policy: &RetryPolicy,
    sample: &Sample,
) -> Result<Option<SampleWithOutputs>, CheckpointError> {
    let target = store.generate_path(&config.model, sample.id);
    debug!(path = %target.display(), "Checking generation checkpoint");

    if let Some(existing) = store.load::<SampleWithOutputs>(&target)? {
        info!(sample_id = %sample.id, model = %config.model, "Generation checkpoint hit, skipping");
        return Ok(Some(existing));
    }

    let mut outputs = Vec::with_capacity(sample.generations.len());

    for generation in &sample.generations {
        let repeats = generation.num_repeats.max(1);
        let group = (0..repeats).map(|_| {
            generate_output(
                backend,
                generation,
                &config.model,
                policy,
                config.region.as_deref(),
            )
        });

        // try_join_all drops the remaining repeats as soon as one fails.
        match try_join_all(group).await {
            Ok(repeats) => {
                let combined = repeats
                    .into_iter()
                    .reduce(Output::combine)
                    .expect("at least one repeat");
                outputs.push(combined);
            }
            Err(err) => {
                warn!(
                    sample_id = %sample.id,
                    model = %config.model,
                    generation_id = %generation.id,
                    error = %err,
                    "Generation failed, recording error checkpoint"
                );
                let record = FailedSample {
                    sample: sample.clone(),
                    error: err.to_string(),
                };
                let error_path = store.generate_error_path(&config.model, sample.id);
                store.store(&error_path, &record)?;
                return Ok(None);
            }
        }
    }

    let sample_with_outputs = SampleWithOutputs {
        sample: sample.clone(),
        model_outputs: ModelOutputs {
            model: config.model.clone(),
            outputs,
        },
    };
    store.store(&target, &sample_with_outputs)?;
    Ok(Some(sample_with_outputs))
}

/// Run loop of one generation worker.
pub async fn run_generator(ctx: GenerationContext) {
    let model = ctx.model.model.clone();
    while let Some(sample) = ctx.queue.pop().await {
        let sample_id = sample.id;
        info!(sample_id = %sample_id, model = %model, "Starting generation");

        match generate_sample(&ctx.store, &ctx.model, ctx.backend.as_ref(), &ctx.policy, &sample)
            .await
        {
            Ok(Some(sample_with_outputs)) => {
                info!(sample_id = %sample_id, model = %model, "Generation done");
                ctx.stats.record_generation(&model, true);
                ctx.router.submit(sample_with_outputs);
            }
            Ok(None) => {
                ctx.stats.record_generation(&model, false);
            }
            Err(err) => {
                warn!(sample_id = %sample_id, model = %model, error = %err, "Checkpoint error during generation");
                ctx.stats.record_generation(&model, false);
            }
        }

        ctx.queue.task_done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Choice, CompletionResponse, Message, Usage};
    use async_trait::async_trait;
    use serde_json::Map;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    /// Backend that succeeds until `fail_from` calls have happened.
    struct CountingBackend {
        calls: AtomicU32,
        fail_from: u32,
    }

    impl CountingBackend {
        fn succeeding() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_from: u32::MAX,
            }
        }

        fn failing_from(fail_from: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_from,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionBackend for CountingBackend {
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, CompletionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call >= self.fail_from {
                return Err(CompletionError::RequestFailed("scripted failure".to_string()));
            }
            Ok(CompletionResponse {
                id: format!("resp-{}", call),
                model: request.model,
                created: 1_760_000_000,
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(format!("answer {}", call)),
                    finish_reason: "stop".to_string(),
                }],
                usage: Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                    cost: None,
                },
            })
        }
    }

    fn model_config() -> ModelConfig {
        ModelConfig {
            name: "test".to_string(),
            model: "mock/model".to_string(),
            parallelism: 1,
            retry_budget: 1,
            region: None,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(1).with_backoff(Duration::from_millis(0), Duration::from_millis(1))
    }

    fn sample(repeats: u32, generations: usize) -> Sample {
        Sample {
            id: Uuid::new_v4(),
            module: "module".to_string(),
            task: "task".to_string(),
            language: "en".to_string(),
            generations: (0..generations)
                .map(|_| Generation {
                    id: Uuid::new_v4(),
                    messages: vec![Message::user("prompt")],
                    params: Default::default(),
                    metadata: Map::new(),
                    num_repeats: repeats,
                })
                .collect(),
            metadata: Map::new(),
            evaluation: crate::schema::EvaluationData {
                scorer: "exact_match".to_string(),
                data: Map::new(),
            },
        }
    }

    #[tokio::test]
    async fn test_repeats_combine_into_one_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::new(dir.path());
        let backend = CountingBackend::succeeding();
        let sample = sample(3, 1);

        let result = generate_sample(&store, &model_config(), &backend, &fast_policy(), &sample)
            .await
            .expect("no checkpoint error")
            .expect("generation should succeed");

        assert_eq!(backend.calls(), 3);
        assert_eq!(result.model_outputs.outputs.len(), 1);
        let output = &result.model_outputs.outputs[0];
        assert_eq!(output.choices.len(), 3);
        let indices: Vec<u32> = output.choices.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(output.usage.total_tokens, 45);
        assert_eq!(output.raw_responses.len(), 3);
        assert!(store.exists(&store.generate_path("mock/model", sample.id)));
    }

    #[tokio::test]
    async fn test_checkpoint_hit_skips_backend_entirely() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::new(dir.path());
        let backend = CountingBackend::succeeding();
        let sample = sample(2, 2);

        let first = generate_sample(&store, &model_config(), &backend, &fast_policy(), &sample)
            .await
            .expect("ok")
            .expect("some");
        let calls_after_first = backend.calls();
        assert_eq!(calls_after_first, 4);

        let second = generate_sample(&store, &model_config(), &backend, &fast_policy(), &sample)
            .await
            .expect("ok")
            .expect("some");

        assert_eq!(backend.calls(), calls_after_first);
        assert_eq!(
            serde_json::to_value(&second).unwrap(),
            serde_json::to_value(&first).unwrap()
        );
    }

    #[tokio::test]
    async fn test_one_failed_repeat_fails_the_sample() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::new(dir.path());
        // First call succeeds, every later one fails: the second repeat of
        // the first generation sinks the whole sample.
        let backend = CountingBackend::failing_from(1);
        let sample = sample(2, 2);

        let result = generate_sample(&store, &model_config(), &backend, &fast_policy(), &sample)
            .await
            .expect("no checkpoint error");

        assert!(result.is_none());
        assert!(!store.exists(&store.generate_path("mock/model", sample.id)));

        let error_path = store.generate_error_path("mock/model", sample.id);
        let record: FailedSample = store
            .load(&error_path)
            .expect("load")
            .expect("error record present");
        assert_eq!(record.sample.id, sample.id);
        assert!(record.error.contains("scripted failure"));
    }

    #[tokio::test]
    async fn test_generations_run_sequentially() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::new(dir.path());
        // Three single-repeat generations, third one fails: the first two
        // must already have completed (calls 0 and 1).
        let backend = CountingBackend::failing_from(2);
        let sample = sample(1, 3);

        let result = generate_sample(&store, &model_config(), &backend, &fast_policy(), &sample)
            .await
            .expect("no checkpoint error");

        assert!(result.is_none());
        assert_eq!(backend.calls(), 3);
    }
}
