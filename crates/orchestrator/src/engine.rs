use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use generator_api::{
    GenerateRequest, GeneratorError, GeneratorFactory, ImageGenerator, ProviderConfig, ProviderType,
};
use object_store::{original_key, thumbnail_key, ObjectStore};
use tokio::sync::{mpsc, watch};
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::events::{
    CompleteData, ErrorData, FinishData, Phase, ProgressData, ProgressEvent, RetryFinishData,
    RetryStartData,
};
use crate::model::{Page, PageType, TaskId, TaskState};
use crate::registry::TaskStateRegistry;
use crate::templater::PromptTemplater;

/// Upper bound on content-page workers running concurrently within a single
/// `generate_images`/`retry_failed` call.
pub const MAX_CONCURRENT: usize = 15;

/// Per-page attempt budget inside `generate_one`.
pub const AUTO_RETRY_COUNT: u32 = 3;

const USER_REFERENCE_BUDGET_KB: u32 = 200;
const COVER_REFERENCE_BUDGET_KB: u32 = 200;
const THUMBNAIL_BUDGET_KB: u32 = 50;

/// Outcome of a synchronous single-page retry (`retry_single`/`regenerate`).
#[derive(Debug, Clone)]
pub enum RetryOutcome {
    Ok { index: u32, image_url: String },
    Err { index: u32, message: String },
}

/// Constructs the generator behind each `generate_one` call. Exists as a
/// seam so tests can substitute a fake generator without going through a
/// real `ProviderConfig`/HTTP client; production code uses
/// `DefaultGeneratorSource`, a thin wrapper around `GeneratorFactory`.
pub trait GeneratorSource: Send + Sync {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn ImageGenerator>, GeneratorError>;
}

#[derive(Debug, Default)]
pub struct DefaultGeneratorSource;

impl GeneratorSource for DefaultGeneratorSource {
    fn create(&self, config: &ProviderConfig) -> Result<Box<dyn ImageGenerator>, GeneratorError> {
        GeneratorFactory::create(config)
    }
}

/// The orchestration engine: cover-first/content-parallel pipeline, bounded
/// worker pool, retry loop, event stream. One instance is shared across
/// every task; all per-task mutable state lives in the `TaskStateRegistry`.
pub struct Engine {
    registry: Arc<TaskStateRegistry>,
    object_store: Arc<dyn ObjectStore>,
    templater: Arc<PromptTemplater>,
    config: watch::Receiver<Arc<ProviderConfig>>,
    generator_source: Arc<dyn GeneratorSource>,
}

impl Engine {
    pub fn new(
        registry: Arc<TaskStateRegistry>,
        object_store: Arc<dyn ObjectStore>,
        templater: Arc<PromptTemplater>,
        config: watch::Receiver<Arc<ProviderConfig>>,
    ) -> Self {
        Self::with_generator_source(registry, object_store, templater, config, Arc::new(DefaultGeneratorSource))
    }

    pub fn with_generator_source(
        registry: Arc<TaskStateRegistry>,
        object_store: Arc<dyn ObjectStore>,
        templater: Arc<PromptTemplater>,
        config: watch::Receiver<Arc<ProviderConfig>>,
        generator_source: Arc<dyn GeneratorSource>,
    ) -> Self {
        Self {
            registry,
            object_store,
            templater,
            config,
            generator_source,
        }
    }

    fn current_config(&self) -> Arc<ProviderConfig> {
        self.config.borrow().clone()
    }

    /// `generate_images(pages, task_id?, full_outline, user_images?, user_topic)`.
    /// Returns a finite, single-pass, non-restartable event stream.
    pub fn generate_images(
        &self,
        pages: Vec<Page>,
        task_id: Option<TaskId>,
        full_outline: String,
        user_images: Option<Vec<Vec<u8>>>,
        user_topic: String,
        cancel: CancellationToken,
    ) -> Result<impl Stream<Item = ProgressEvent>, EngineError> {
        if pages.is_empty() {
            return Err(EngineError::Input("pages must not be empty".to_string()));
        }

        let config = self.current_config();
        let task_id = task_id.unwrap_or_else(TaskId::generate);
        let registry = self.registry.clone();
        let object_store = self.object_store.clone();
        let templater = self.templater.clone();
        let generator_source = self.generator_source.clone();

        let compressed_user_images = user_images
            .map(|images| {
                images
                    .into_iter()
                    .map(|bytes| image_compress::compress_to_budget(&bytes, USER_REFERENCE_BUDGET_KB))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        let (cover_page, content_pages) = partition_pages(pages.clone());
        registry.create(
            task_id.clone(),
            TaskState::new(
                pages,
                full_outline.clone(),
                compressed_user_images.clone(),
                user_topic.clone(),
            ),
        );

        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(run_pipeline(
            tx,
            task_id,
            config,
            registry,
            object_store,
            templater,
            generator_source,
            cover_page,
            content_pages,
            full_outline,
            compressed_user_images,
            user_topic,
            cancel,
        ));

        Ok(ReceiverStream::new(rx))
    }

    /// Synchronous single-shot retry. Updates `TaskState` on success (moves
    /// `index` from `failed` to `generated`); leaves it unchanged on failure.
    pub async fn retry_single(
        &self,
        task_id: &TaskId,
        page: Page,
        use_reference: bool,
        full_outline: Option<String>,
        user_topic: Option<String>,
    ) -> Result<RetryOutcome, EngineError> {
        let config = self.current_config();
        let snapshot = self.registry.get(task_id);

        let reference_image = if use_reference {
            snapshot.as_ref().and_then(|s| s.cover_image.clone())
        } else {
            None
        };
        let full_outline = full_outline
            .or_else(|| snapshot.as_ref().map(|s| s.full_outline.clone()))
            .unwrap_or_default();
        let user_topic = user_topic
            .or_else(|| snapshot.as_ref().map(|s| s.user_topic.clone()))
            .unwrap_or_default();
        let user_images = snapshot.as_ref().and_then(|s| s.user_images.clone());

        let generator = self.generator_source.create(&config)?;
        let index = page.index;

        match generate_one(
            generator.as_ref(),
            &self.templater,
            &config,
            &page,
            reference_image.as_deref(),
            user_images.as_deref(),
            &full_outline,
            &user_topic,
            self.object_store.as_ref(),
            task_id,
        )
        .await
        {
            Ok(bytes) => {
                let filename = original_key(&task_id.0, index);
                self.registry.update(task_id, |state| {
                    state.mark_generated(index, filename.clone());
                });
                let _ = bytes;
                Ok(RetryOutcome::Ok {
                    index,
                    image_url: self.object_store.url_for(&original_key(&task_id.0, index)),
                })
            }
            Err(err) => Ok(RetryOutcome::Err {
                index,
                message: err.to_string(),
            }),
        }
    }

    /// Semantically identical to `retry_single`; exists so callers can
    /// express intent separately.
    pub async fn regenerate(
        &self,
        task_id: &TaskId,
        page: Page,
        use_reference: bool,
        full_outline: Option<String>,
        user_topic: Option<String>,
    ) -> Result<RetryOutcome, EngineError> {
        self.retry_single(task_id, page, use_reference, full_outline, user_topic)
            .await
    }

    /// Parallel retry of a subset of pages, bracketed by `retry_start` /
    /// `retry_finish`.
    pub fn retry_failed(
        &self,
        task_id: TaskId,
        pages: Vec<Page>,
    ) -> impl Stream<Item = ProgressEvent> {
        let config = self.current_config();
        let registry = self.registry.clone();
        let object_store = self.object_store.clone();
        let templater = self.templater.clone();
        let generator_source = self.generator_source.clone();

        let snapshot = registry.get(&task_id);
        let cover_reference = snapshot.as_ref().and_then(|s| s.cover_image.clone());
        let full_outline = snapshot.map(|s| s.full_outline).unwrap_or_default();
        let total = pages.len() as u32;

        stream! {
            yield ProgressEvent::RetryStart(RetryStartData { total });

            let semaphore = Arc::new(tokio::sync::Semaphore::new(MAX_CONCURRENT));
            let mut joins = tokio::task::JoinSet::new();
            for page in pages {
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
                let config = config.clone();
                let templater = templater.clone();
                let object_store = object_store.clone();
                let task_id = task_id.clone();
                let cover_reference = cover_reference.clone();
                let full_outline = full_outline.clone();
                let generator_source = generator_source.clone();
                joins.spawn(async move {
                    let _permit = permit;
                    let index = page.index;
                    let generator = generator_source.create(&config);
                    let outcome = match generator {
                        Ok(generator) => generate_one(
                            generator.as_ref(),
                            &templater,
                            &config,
                            &page,
                            cover_reference.as_deref(),
                            None,
                            &full_outline,
                            "",
                            object_store.as_ref(),
                            &task_id,
                        )
                        .await,
                        Err(e) => Err(EngineError::from(e)),
                    };
                    (index, outcome)
                });
            }

            let mut completed = 0u32;
            let mut failed = 0u32;
            while let Some(joined) = joins.join_next().await {
                let (index, outcome) = joined.expect("retry task panicked");
                match outcome {
                    Ok(_) => {
                        completed += 1;
                        let filename = original_key(&task_id.0, index);
                        registry.update(&task_id, |state| state.mark_generated(index, filename.clone()));
                        yield ProgressEvent::Complete(CompleteData {
                            index,
                            status: "done",
                            image_url: object_store.url_for(&original_key(&task_id.0, index)),
                            phase: Phase::Content,
                        });
                    }
                    Err(err) => {
                        failed += 1;
                        let message = err.to_string();
                        registry.update(&task_id, |state| state.mark_failed(index, message.clone()));
                        yield ProgressEvent::Error(ErrorData {
                            index,
                            status: "error",
                            message,
                            retryable: true,
                            phase: Phase::Content,
                        });
                    }
                }
            }

            yield ProgressEvent::RetryFinish(RetryFinishData {
                total,
                completed,
                failed,
                success: failed == 0,
            });
        }
    }

    pub fn get_task_state(&self, task_id: &TaskId) -> Option<TaskState> {
        self.registry.get(task_id)
    }

    pub fn cleanup_task(&self, task_id: &TaskId) {
        self.registry.delete(task_id);
    }
}

fn partition_pages(pages: Vec<Page>) -> (Option<Page>, Vec<Page>) {
    if let Some(pos) = pages.iter().position(|p| p.page_type == PageType::Cover) {
        let mut pages = pages;
        let cover = pages.remove(pos);
        (Some(cover), pages)
    } else if pages.is_empty() {
        (None, pages)
    } else {
        let mut pages = pages;
        let cover = pages.remove(0);
        (Some(cover), pages)
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    tx: mpsc::Sender<ProgressEvent>,
    task_id: TaskId,
    config: Arc<ProviderConfig>,
    registry: Arc<TaskStateRegistry>,
    object_store: Arc<dyn ObjectStore>,
    templater: Arc<PromptTemplater>,
    generator_source: Arc<dyn GeneratorSource>,
    cover_page: Option<Page>,
    content_pages: Vec<Page>,
    full_outline: String,
    user_images: Option<Vec<Vec<u8>>>,
    user_topic: String,
    cancel: CancellationToken,
) {
    let total = cover_page.is_some() as u32 + content_pages.len() as u32;
    let mut generated_images = Vec::new();
    let mut failed_indices = Vec::new();
    let mut cover_reference: Option<Vec<u8>> = None;

    if let Some(page) = &cover_page {
        if send(
            &tx,
            ProgressEvent::Progress(ProgressData {
                index: Some(page.index),
                status: "generating",
                current: Some(1),
                total: Some(total),
                phase: Phase::Cover,
                message: Some("generating cover".to_string()),
            }),
        )
        .await
        .is_err()
        {
            return;
        }

        let generator = generator_source.create(&config);
        let outcome = match generator {
            Ok(generator) => {
                generate_one(
                    generator.as_ref(),
                    &templater,
                    &config,
                    page,
                    None,
                    user_images.as_deref(),
                    &full_outline,
                    &user_topic,
                    object_store.as_ref(),
                    &task_id,
                )
                .await
            }
            Err(e) => Err(EngineError::from(e)),
        };

        match outcome {
            Ok(bytes) => {
                let compressed = match image_compress::compress_to_budget(&bytes, COVER_REFERENCE_BUDGET_KB) {
                    Ok(bytes) => bytes,
                    Err(_) => bytes,
                };
                let filename = original_key(&task_id.0, page.index);
                registry.update(&task_id, |state| {
                    state.mark_generated(page.index, filename.clone());
                    state.cover_image = Some(compressed.clone());
                });
                cover_reference = Some(compressed);
                generated_images.push(filename.clone());
                if send(
                    &tx,
                    ProgressEvent::Complete(CompleteData {
                        index: page.index,
                        status: "done",
                        image_url: object_store.url_for(&filename),
                        phase: Phase::Cover,
                    }),
                )
                .await
                .is_err()
                {
                    return;
                }
            }
            Err(err) => {
                let message = err.to_string();
                registry.update(&task_id, |state| state.mark_failed(page.index, message.clone()));
                failed_indices.push(page.index);
                if send(
                    &tx,
                    ProgressEvent::Error(ErrorData {
                        index: page.index,
                        status: "error",
                        message,
                        retryable: true,
                        phase: Phase::Cover,
                    }),
                )
                .await
                .is_err()
                {
                    return;
                }
            }
        }
    }

    if !content_pages.is_empty() {
        if cancel.is_cancelled() {
            finish(&tx, task_id, total, generated_images, failed_indices).await;
            return;
        }

        let ok = if config.high_concurrency {
            run_content_parallel(
                &tx,
                &task_id,
                &config,
                &registry,
                &object_store,
                &templater,
                &generator_source,
                content_pages,
                cover_reference.as_deref(),
                user_images.as_deref(),
                &full_outline,
                &user_topic,
                generated_images.len() as u32,
                total,
                &cancel,
                &mut generated_images,
                &mut failed_indices,
            )
            .await
        } else {
            run_content_serial(
                &tx,
                &task_id,
                &config,
                &registry,
                &object_store,
                &templater,
                &generator_source,
                content_pages,
                cover_reference.as_deref(),
                user_images.as_deref(),
                &full_outline,
                &user_topic,
                generated_images.len() as u32,
                total,
                &cancel,
                &mut generated_images,
                &mut failed_indices,
            )
            .await
        };

        if !ok {
            return;
        }
    }

    finish(&tx, task_id, total, generated_images, failed_indices).await;
}

#[allow(clippy::too_many_arguments)]
async fn run_content_parallel(
    tx: &mpsc::Sender<ProgressEvent>,
    task_id: &TaskId,
    config: &Arc<ProviderConfig>,
    registry: &Arc<TaskStateRegistry>,
    object_store: &Arc<dyn ObjectStore>,
    templater: &Arc<PromptTemplater>,
    generator_source: &Arc<dyn GeneratorSource>,
    pages: Vec<Page>,
    cover_reference: Option<&[u8]>,
    user_images: Option<&[Vec<u8>]>,
    full_outline: &str,
    user_topic: &str,
    mut current: u32,
    total: u32,
    cancel: &CancellationToken,
    generated_images: &mut Vec<String>,
    failed_indices: &mut Vec<u32>,
) -> bool {
    for page in &pages {
        current += 1;
        if send(
            tx,
            ProgressEvent::Progress(ProgressData {
                index: Some(page.index),
                status: "generating",
                current: Some(current),
                total: Some(total),
                phase: Phase::Content,
                message: None,
            }),
        )
        .await
        .is_err()
        {
            return false;
        }
    }

    let semaphore = Arc::new(tokio::sync::Semaphore::new(MAX_CONCURRENT));
    let mut joins = tokio::task::JoinSet::new();
    for page in pages {
        if cancel.is_cancelled() {
            break;
        }
        let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
        let config = config.clone();
        let templater = templater.clone();
        let task_id = task_id.clone();
        let cover_reference = cover_reference.map(|b| b.to_vec());
        let user_images = user_images.map(|imgs| imgs.to_vec());
        let full_outline = full_outline.to_string();
        let user_topic = user_topic.to_string();
        let object_store = object_store.clone();
        let generator_source = generator_source.clone();
        joins.spawn(async move {
            let _permit = permit;
            let index = page.index;
            let generator = generator_source.create(&config);
            let outcome = match generator {
                Ok(generator) => {
                    generate_one(
                        generator.as_ref(),
                        &templater,
                        &config,
                        &page,
                        cover_reference.as_deref(),
                        user_images.as_deref(),
                        &full_outline,
                        &user_topic,
                        object_store.as_ref(),
                        &task_id,
                    )
                    .await
                }
                Err(e) => Err(EngineError::from(e)),
            };
            (index, outcome)
        });
    }

    while let Some(joined) = joins.join_next().await {
        let (index, outcome) = joined.expect("content worker panicked");
        if !handle_content_outcome(
            tx,
            task_id,
            registry,
            object_store.as_ref(),
            index,
            outcome,
            generated_images,
            failed_indices,
        )
        .await
        {
            return false;
        }
    }
    true
}

#[allow(clippy::too_many_arguments)]
async fn run_content_serial(
    tx: &mpsc::Sender<ProgressEvent>,
    task_id: &TaskId,
    config: &Arc<ProviderConfig>,
    registry: &Arc<TaskStateRegistry>,
    object_store: &Arc<dyn ObjectStore>,
    templater: &Arc<PromptTemplater>,
    generator_source: &Arc<dyn GeneratorSource>,
    pages: Vec<Page>,
    cover_reference: Option<&[u8]>,
    user_images: Option<&[Vec<u8>]>,
    full_outline: &str,
    user_topic: &str,
    mut current: u32,
    total: u32,
    cancel: &CancellationToken,
    generated_images: &mut Vec<String>,
    failed_indices: &mut Vec<u32>,
) -> bool {
    for page in pages {
        if cancel.is_cancelled() {
            break;
        }
        current += 1;
        if send(
            tx,
            ProgressEvent::Progress(ProgressData {
                index: Some(page.index),
                status: "generating",
                current: Some(current),
                total: Some(total),
                phase: Phase::Content,
                message: None,
            }),
        )
        .await
        .is_err()
        {
            return false;
        }

        let generator = generator_source.create(config);
        let outcome = match generator {
            Ok(generator) => {
                generate_one(
                    generator.as_ref(),
                    templater,
                    config,
                    &page,
                    cover_reference,
                    user_images,
                    full_outline,
                    user_topic,
                    object_store.as_ref(),
                    task_id,
                )
                .await
            }
            Err(e) => Err(EngineError::from(e)),
        };

        if !handle_content_outcome(
            tx,
            task_id,
            registry,
            object_store.as_ref(),
            page.index,
            outcome,
            generated_images,
            failed_indices,
        )
        .await
        {
            return false;
        }
    }
    true
}

async fn handle_content_outcome(
    tx: &mpsc::Sender<ProgressEvent>,
    task_id: &TaskId,
    registry: &Arc<TaskStateRegistry>,
    object_store: &dyn ObjectStore,
    index: u32,
    outcome: Result<Vec<u8>, EngineError>,
    generated_images: &mut Vec<String>,
    failed_indices: &mut Vec<u32>,
) -> bool {
    match outcome {
        Ok(_) => {
            let filename = original_key(&task_id.0, index);
            registry.update(task_id, |state| state.mark_generated(index, filename.clone()));
            generated_images.push(filename.clone());
            send(
                tx,
                ProgressEvent::Complete(CompleteData {
                    index,
                    status: "done",
                    image_url: object_store.url_for(&filename),
                    phase: Phase::Content,
                }),
            )
            .await
            .is_ok()
        }
        Err(err) => {
            let message = err.to_string();
            registry.update(task_id, |state| state.mark_failed(index, message.clone()));
            failed_indices.push(index);
            send(
                tx,
                ProgressEvent::Error(ErrorData {
                    index,
                    status: "error",
                    message,
                    retryable: true,
                    phase: Phase::Content,
                }),
            )
            .await
            .is_ok()
        }
    }
}

async fn finish(
    tx: &mpsc::Sender<ProgressEvent>,
    task_id: TaskId,
    total: u32,
    generated_images: Vec<String>,
    mut failed_indices: Vec<u32>,
) {
    failed_indices.sort_unstable();
    let completed = generated_images.len() as u32;
    let failed = failed_indices.len() as u32;
    let _ = tx
        .send(ProgressEvent::Finish(FinishData {
            success: failed == 0,
            task_id,
            images: generated_images,
            total,
            completed,
            failed,
            failed_indices,
        }))
        .await;
}

async fn send(tx: &mpsc::Sender<ProgressEvent>, event: ProgressEvent) -> Result<(), ()> {
    tx.send(event).await.map_err(|_| ())
}

/// Render the prompt, dispatch to the configured generator variant with the
/// corresponding parameter subset, and on success persist the original PNG
/// and a compressed thumbnail. Retries up to `AUTO_RETRY_COUNT` attempts with
/// `2^attempt` second backoff between attempts; storage failures are not
/// retried (they surface on the first occurrence).
#[allow(clippy::too_many_arguments)]
async fn generate_one(
    generator: &dyn ImageGenerator,
    templater: &PromptTemplater,
    config: &ProviderConfig,
    page: &Page,
    cover_reference: Option<&[u8]>,
    user_images: Option<&[Vec<u8>]>,
    full_outline: &str,
    user_topic: &str,
    object_store: &dyn ObjectStore,
    task_id: &TaskId,
) -> Result<Vec<u8>, EngineError> {
    let prompt = templater.render(page, full_outline, user_topic, config.short_prompt);

    for attempt in 0..AUTO_RETRY_COUNT {
        let request = build_request(config, prompt.clone(), cover_reference, user_images);
        match generator.generate_image(request).await {
            Ok(bytes) if !bytes.is_empty() => {
                return persist(object_store, task_id, page.index, bytes).await;
            }
            Ok(_) => {
                tracing::warn!(index = page.index, attempt, "generator returned empty data");
            }
            Err(err) => {
                tracing::warn!(index = page.index, attempt, error = %err, "generator call failed");
            }
        }

        if attempt + 1 < AUTO_RETRY_COUNT {
            tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
        }
    }

    Err(EngineError::Provider(format!(
        "page {} failed after {AUTO_RETRY_COUNT} attempts",
        page.index
    )))
}

async fn persist(
    object_store: &dyn ObjectStore,
    task_id: &TaskId,
    index: u32,
    bytes: Vec<u8>,
) -> Result<Vec<u8>, EngineError> {
    let key = original_key(&task_id.0, index);
    object_store.upload(&key, bytes.clone(), "image/png").await?;

    let thumbnail = image_compress::compress_to_budget(&bytes, THUMBNAIL_BUDGET_KB)?;
    object_store
        .upload(&thumbnail_key(&task_id.0, index), thumbnail, "image/jpeg")
        .await?;

    Ok(bytes)
}

fn build_request(
    config: &ProviderConfig,
    prompt: String,
    cover_reference: Option<&[u8]>,
    user_images: Option<&[Vec<u8>]>,
) -> GenerateRequest {
    match config.provider_type {
        ProviderType::NativeMultimodal => GenerateRequest::NativeMultimodal {
            prompt,
            aspect_ratio: config.default_aspect_ratio.clone(),
            temperature: config.temperature,
            model: config.model_or("gemini-3-pro-image-preview"),
            reference_image: cover_reference.map(|b| b.to_vec()),
        },
        ProviderType::OpenaiCompatible => GenerateRequest::OpenaiCompatible {
            prompt,
            size: config.default_size.clone(),
            model: config.model_or(""),
            quality: config.quality,
        },
        ProviderType::ImageApi => {
            let mut refs = Vec::new();
            if let Some(images) = user_images {
                refs.extend(images.iter().cloned());
            }
            if let Some(cover) = cover_reference {
                refs.push(cover.to_vec());
            }
            GenerateRequest::ImageApi {
                prompt,
                aspect_ratio: config.default_aspect_ratio.clone(),
                temperature: config.temperature,
                model: config.model_or("nano-banana-2"),
                reference_images: if refs.is_empty() { None } else { Some(refs) },
            }
        }
    }
}
