//! Streaming, provider-agnostic image-generation orchestration engine.
//!
//! Drives a two-phase pipeline (cover first, then content pages in parallel
//! or serial), enforces bounded concurrency with per-item retry and
//! backoff, maintains per-task state for targeted retry/regeneration, and
//! emits a well-defined sequence of progress events suitable for
//! server-sent-event relay.

mod emitter;
mod engine;
mod error;
mod events;
mod model;
mod registry;
mod templater;

pub use emitter::StreamingEventEmitter;
pub use engine::{DefaultGeneratorSource, Engine, GeneratorSource, RetryOutcome, AUTO_RETRY_COUNT, MAX_CONCURRENT};
pub use error::EngineError;
pub use events::{
    CompleteData, ErrorData, FinishData, Phase, ProgressData, ProgressEvent, RetryFinishData,
    RetryStartData,
};
pub use model::{Outline, Page, PageType, TaskId, TaskState, TaskStatus};
pub use registry::TaskStateRegistry;
pub use templater::PromptTemplater;

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex as StdMutex};

    use async_trait::async_trait;
    use generator_api::{GenerateRequest, GeneratorError, ImageGenerator, ProviderConfig, ProviderType, Quality};
    use object_store::{original_key, thumbnail_key, ObjectStore, StorageError};
    use tokio::sync::watch;
    use tokio_stream::{Stream, StreamExt};
    use tokio_util::sync::CancellationToken;

    /// A tiny valid PNG so `image-compress` has something real to decode.
    fn fake_png() -> Vec<u8> {
        use image::{ImageBuffer, Rgb};
        let buf: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_fn(8, 8, |x, y| Rgb([x as u8, y as u8, 0]));
        let mut out = Vec::new();
        buf.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    /// Fails a configurable number of times for each page index (matched
    /// by looking for that index's literal `content` string, which the
    /// templater carries verbatim into the rendered prompt), then succeeds.
    #[derive(Debug, Clone, Default)]
    struct ScriptedGenerator {
        remaining_failures: Arc<StdMutex<HashMap<u32, usize>>>,
    }

    impl ScriptedGenerator {
        fn new(remaining_failures: HashMap<u32, usize>) -> Self {
            Self {
                remaining_failures: Arc::new(StdMutex::new(remaining_failures)),
            }
        }
    }

    #[async_trait]
    impl ImageGenerator for ScriptedGenerator {
        async fn generate_image(&self, request: GenerateRequest) -> Result<Vec<u8>, GeneratorError> {
            let prompt = request.prompt().to_string();
            let mut map = self.remaining_failures.lock().unwrap();
            let matched = map
                .keys()
                .copied()
                .find(|index| prompt.contains(&format!("page {index}")));
            if let Some(index) = matched {
                let remaining = map.get_mut(&index).unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(GeneratorError::Other(format!("scripted failure for page {index}")));
                }
            }
            Ok(fake_png())
        }

        async fn check_health(&self) -> Result<(), GeneratorError> {
            Ok(())
        }
    }

    struct ScriptedGeneratorSource(ScriptedGenerator);

    impl GeneratorSource for ScriptedGeneratorSource {
        fn create(&self, _config: &ProviderConfig) -> Result<Box<dyn ImageGenerator>, GeneratorError> {
            Ok(Box::new(self.0.clone()))
        }
    }

    #[derive(Default)]
    struct FakeObjectStore {
        objects: StdMutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl ObjectStore for FakeObjectStore {
        async fn upload(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> Result<String, StorageError> {
            self.objects.lock().unwrap().insert(key.to_string(), bytes);
            Ok(self.url_for(key))
        }

        fn url_for(&self, key: &str) -> String {
            format!("https://example-bucket.test/{key}")
        }
    }

    fn page(index: u32, page_type: PageType, content: &str) -> Page {
        Page {
            index,
            page_type,
            content: content.to_string(),
        }
    }

    fn config(high_concurrency: bool) -> ProviderConfig {
        ProviderConfig {
            provider_type: ProviderType::NativeMultimodal,
            api_key: "test-key".to_string(),
            base_url: None,
            model: None,
            default_aspect_ratio: "3:4".to_string(),
            default_size: "1024x1024".to_string(),
            temperature: 1.0,
            quality: Quality::Standard,
            short_prompt: true,
            high_concurrency,
        }
    }

    fn engine_with(
        provider_config: ProviderConfig,
        remaining_failures: HashMap<u32, usize>,
    ) -> Engine {
        let (_tx, config_rx) = watch::channel(Arc::new(provider_config));
        Engine::with_generator_source(
            Arc::new(TaskStateRegistry::new()),
            Arc::new(FakeObjectStore::default()),
            Arc::new(PromptTemplater::default()),
            config_rx,
            Arc::new(ScriptedGeneratorSource(ScriptedGenerator::new(remaining_failures))),
        )
    }

    async fn drain(stream: impl Stream<Item = ProgressEvent>) -> Vec<ProgressEvent> {
        tokio::pin!(stream);
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }
        events
    }

    fn three_pages() -> Vec<Page> {
        vec![
            page(1, PageType::Cover, "page 1"),
            page(2, PageType::Content, "page 2"),
            page(3, PageType::Content, "page 3"),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn e1_happy_path_parallel() {
        let engine = engine_with(config(true), HashMap::new());
        let events = drain(
            engine
                .generate_images(three_pages(), None, "outline".to_string(), None, "topic".to_string(), CancellationToken::new())
                .unwrap(),
        )
        .await;

        let cover_progress = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Progress(d) if d.phase == Phase::Cover));
        assert_eq!(cover_progress.count(), 1);

        let completes: Vec<_> = events.iter().filter(|e| matches!(e, ProgressEvent::Complete(_))).collect();
        assert_eq!(completes.len(), 3);

        let content_progress: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Progress(d) if d.phase == Phase::Content))
            .collect();
        assert_eq!(content_progress.len(), 2);

        match events.last().unwrap() {
            ProgressEvent::Finish(finish) => {
                assert!(finish.success);
                assert_eq!(finish.total, 3);
                assert_eq!(finish.completed, 3);
                assert_eq!(finish.failed, 0);
                assert!(finish.failed_indices.is_empty());
            }
            other => panic!("expected finish event, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn e2_cover_fails_content_succeeds() {
        let mut failures = HashMap::new();
        failures.insert(1, AUTO_RETRY_COUNT as usize); // cover fails every attempt
        let engine = engine_with(config(true), failures);

        let events = drain(
            engine
                .generate_images(three_pages(), None, String::new(), None, String::new(), CancellationToken::new())
                .unwrap(),
        )
        .await;

        assert!(events.iter().any(|e| matches!(
            e,
            ProgressEvent::Error(d) if d.phase == Phase::Cover && d.index == 1 && d.retryable
        )));

        let content_completes = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Complete(d) if d.phase == Phase::Content))
            .count();
        assert_eq!(content_completes, 2);

        match events.last().unwrap() {
            ProgressEvent::Finish(finish) => {
                assert!(!finish.success);
                assert_eq!(finish.completed, 2);
                assert_eq!(finish.failed, 1);
                assert_eq!(finish.failed_indices, vec![1]);
            }
            other => panic!("expected finish event, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn e3_one_content_page_fails() {
        let mut failures = HashMap::new();
        failures.insert(2, AUTO_RETRY_COUNT as usize);
        let engine = engine_with(config(false), failures);

        let task_id = TaskId("task_e3testcase".to_string());
        let events = drain(
            engine
                .generate_images(
                    three_pages(),
                    Some(task_id.clone()),
                    String::new(),
                    None,
                    String::new(),
                    CancellationToken::new(),
                )
                .unwrap(),
        )
        .await;

        match events.last().unwrap() {
            ProgressEvent::Finish(finish) => {
                assert!(!finish.success);
                assert_eq!(finish.completed, 2);
                assert_eq!(finish.failed, 1);
                assert_eq!(finish.failed_indices, vec![2]);
            }
            other => panic!("expected finish event, got {other:?}"),
        }

        let state = engine.get_task_state(&task_id).unwrap();
        assert_eq!(state.generated.get(&1), Some(&"task_e3testcase/1.png".to_string()));
        assert_eq!(state.generated.get(&3), Some(&"task_e3testcase/3.png".to_string()));
        assert!(state.failed.contains_key(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn e4_retry_recovers_failed_page() {
        let mut failures = HashMap::new();
        failures.insert(2, AUTO_RETRY_COUNT as usize);
        let engine = engine_with(config(false), failures);

        let task_id = TaskId("task_e4testcase".to_string());
        drain(
            engine
                .generate_images(
                    three_pages(),
                    Some(task_id.clone()),
                    String::new(),
                    None,
                    String::new(),
                    CancellationToken::new(),
                )
                .unwrap(),
        )
        .await;
        assert!(engine.get_task_state(&task_id).unwrap().failed.contains_key(&2));

        // The scripted generator's failure budget for page 2 is exhausted by
        // the 3 attempts already spent above, so this retry call exercises a
        // generator that has "recovered" exactly as E4 describes.
        let outcome = engine
            .retry_single(&task_id, page(2, PageType::Content, "page 2"), false, Some(String::new()), Some(String::new()))
            .await
            .unwrap();

        match outcome {
            RetryOutcome::Ok { index, image_url } => {
                assert_eq!(index, 2);
                assert!(image_url.ends_with("2.png"));
            }
            RetryOutcome::Err { message, .. } => panic!("expected retry to succeed, got {message}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn e5_serial_mode_preserves_index_order() {
        let engine = engine_with(config(false), HashMap::new());
        let events = drain(
            engine
                .generate_images(three_pages(), None, String::new(), None, String::new(), CancellationToken::new())
                .unwrap(),
        )
        .await;

        let content_complete_indices: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Complete(d) if d.phase == Phase::Content => Some(d.index),
                _ => None,
            })
            .collect();
        assert_eq!(content_complete_indices, vec![2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn e6_backoff_timing_fails_twice_then_succeeds() {
        let mut failures = HashMap::new();
        failures.insert(2, 2);
        let engine = engine_with(config(false), failures);

        let start = tokio::time::Instant::now();
        let outcome = engine
            .retry_single(
                &TaskId("task_e6testcase".to_string()),
                page(2, PageType::Content, "page 2"),
                false,
                Some(String::new()),
                Some(String::new()),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, RetryOutcome::Ok { index: 2, .. }));
        assert!(start.elapsed() >= std::time::Duration::from_secs(3));
    }

    #[tokio::test]
    async fn get_task_state_is_none_before_creation() {
        let engine = engine_with(config(true), HashMap::new());
        assert!(engine.get_task_state(&TaskId("task_missing0".to_string())).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_task_removes_state() {
        let engine = engine_with(config(true), HashMap::new());
        let task_id = TaskId("task_cleanup00".to_string());
        drain(
            engine
                .generate_images(
                    vec![page(1, PageType::Cover, "page 1")],
                    Some(task_id.clone()),
                    String::new(),
                    None,
                    String::new(),
                    CancellationToken::new(),
                )
                .unwrap(),
        )
        .await;
        assert!(engine.get_task_state(&task_id).is_some());
        engine.cleanup_task(&task_id);
        assert!(engine.get_task_state(&task_id).is_none());
    }

    #[tokio::test]
    async fn generate_images_rejects_empty_pages() {
        let engine = engine_with(config(true), HashMap::new());
        let result = engine.generate_images(vec![], None, String::new(), None, String::new(), CancellationToken::new());
        assert!(matches!(result, Err(EngineError::Input(_))));
    }

    #[test]
    fn object_key_layout_matches_wire_contract_end_to_end() {
        assert_eq!(original_key("task_abc12345", 2), "task_abc12345/2.png");
        assert_eq!(thumbnail_key("task_abc12345", 2), "task_abc12345/thumb_2.jpg");
    }
}
