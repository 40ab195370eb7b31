//! Load-once model provider
//!
//! The provider owns the segmentation model and its processor transform. A
//! load is started once by [`ModelProvider::initialize`] and runs in the
//! background:
//!
//! ```text
//! Unloaded --initialize--> Loading --ok--> Ready
//!                                  \--err--> Failed { message }
//! ```
//!
//! Failed loads are not retried. [`ModelProvider::dispose`] drops the model
//! and returns to `Unloaded`, after which `initialize` may start a new load.
//!
//! Consumers observe state and progress through `watch` channels and obtain a
//! [`ModelHandle`] once ready, either by waiting ([`ModelProvider::wait_ready`])
//! or by checking without blocking ([`ModelProvider::handle`]).

use crate::capability::{select_load_options, CapabilityProbe};
use crate::config::{LoadOptions, ProviderConfig};
use crate::error::{BgRemovalError, Result};
use crate::inference::{
    ImageTransform, LoadProgress, ModelLoader, ProgressCallback, SegmentationModel,
};
use image::DynamicImage;
use instant::Instant;
use ndarray::Array4;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, Instrument};

/// Publicly observable provider state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ModelStatus {
    Unloaded,
    Loading,
    Ready,
    Failed { message: String },
}

/// Loading progress of the two sub-resources
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingProgress {
    /// Model progress percentage (0-100)
    pub model_progress: f32,
    /// Processor progress percentage (0-100)
    pub processor_progress: f32,
    pub is_model_loading: bool,
    pub is_processor_loading: bool,
}

impl Default for LoadingProgress {
    fn default() -> Self {
        Self {
            model_progress: 0.0,
            processor_progress: 0.0,
            is_model_loading: true,
            is_processor_loading: true,
        }
    }
}

impl LoadingProgress {
    /// True while either sub-resource is still loading
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.is_model_loading || self.is_processor_loading
    }

    fn settled(progress: f32) -> Self {
        Self {
            model_progress: progress,
            processor_progress: progress,
            is_model_loading: false,
            is_processor_loading: false,
        }
    }
}

#[derive(Clone)]
enum LoadState {
    Unloaded,
    Loading,
    Ready(ModelHandle),
    Failed(String),
}

impl LoadState {
    fn status(&self) -> ModelStatus {
        match self {
            Self::Unloaded => ModelStatus::Unloaded,
            Self::Loading => ModelStatus::Loading,
            Self::Ready(_) => ModelStatus::Ready,
            Self::Failed(message) => ModelStatus::Failed {
                message: message.clone(),
            },
        }
    }
}

/// Ready-to-use model and processor pair
///
/// Cheap to clone. The model sits behind a mutex so only one forward pass
/// runs at a time; the transform is shared read-only.
#[derive(Clone)]
pub struct ModelHandle {
    model: Arc<Mutex<Box<dyn SegmentationModel>>>,
    transform: Arc<dyn ImageTransform>,
    options: LoadOptions,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ModelHandle {
    #[must_use]
    pub fn new(
        model: Box<dyn SegmentationModel>,
        transform: Box<dyn ImageTransform>,
        options: LoadOptions,
    ) -> Self {
        Self {
            model: Arc::new(Mutex::new(model)),
            transform: Arc::from(transform),
            options,
        }
    }

    /// Options the model was loaded with
    #[must_use]
    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Name reported by the loaded model
    #[must_use]
    pub fn model_name(&self) -> String {
        self.model
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .name()
            .to_string()
    }

    /// Run the processor transform on a worker thread
    ///
    /// # Errors
    /// - Transform failures
    /// - The worker task panicked
    pub async fn preprocess(&self, image: Arc<DynamicImage>) -> Result<Array4<f32>> {
        let transform = Arc::clone(&self.transform);
        tokio::task::spawn_blocking(move || transform.preprocess(&image))
            .await
            .map_err(|e| BgRemovalError::internal(format!("Preprocessing task failed: {e}")))?
    }

    /// Run one forward pass on a worker thread
    ///
    /// Both execution backends block for the whole pass, so the pass never
    /// runs on the calling task.
    ///
    /// # Errors
    /// - Inference failures
    /// - The worker task panicked
    pub async fn infer(&self, input: Array4<f32>) -> Result<Array4<f32>> {
        let model = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || Self::run(&model, &input))
            .await
            .map_err(|e| BgRemovalError::internal(format!("Inference task failed: {e}")))?
    }

    fn run(model: &Mutex<Box<dyn SegmentationModel>>, input: &Array4<f32>) -> Result<Array4<f32>> {
        let mut model = model.lock().unwrap_or_else(PoisonError::into_inner);
        model.infer(input)
    }
}

struct Shared {
    config: ProviderConfig,
    loader: Arc<dyn ModelLoader>,
    probe: Arc<dyn CapabilityProbe>,
    state: watch::Sender<LoadState>,
    progress: watch::Sender<LoadingProgress>,
}

/// Owns the model lifecycle and publishes readiness to consumers
pub struct ModelProvider {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ModelProvider {
    /// Create an unloaded provider
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(
        config: ProviderConfig,
        loader: Arc<dyn ModelLoader>,
        probe: Arc<dyn CapabilityProbe>,
    ) -> Result<Self> {
        config.validate()?;
        let (state, _) = watch::channel(LoadState::Unloaded);
        let (progress, _) = watch::channel(LoadingProgress::default());

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                loader,
                probe,
                state,
                progress,
            }),
            task: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.shared.config
    }

    /// Start loading in the background; no-op unless `Unloaded`
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// - No Tokio runtime is available to run the load
    pub fn initialize(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            BgRemovalError::internal(format!("Model loading requires a Tokio runtime: {e}"))
        })?;

        let started = self.shared.state.send_if_modified(|state| {
            if matches!(state, LoadState::Unloaded) {
                *state = LoadState::Loading;
                true
            } else {
                false
            }
        });
        if !started {
            return Ok(());
        }

        self.shared.progress.send_replace(LoadingProgress::default());

        let shared = Arc::clone(&self.shared);
        let span = info_span!("model_loading", model_id = %shared.config.model_id);
        let task = runtime.spawn(async move { Self::run_load(shared).await }.instrument(span));

        let previous = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }

    async fn run_load(shared: Arc<Shared>) {
        let load_start = Instant::now();

        match Self::load(&shared).await {
            Ok(handle) => {
                info!(
                    model = %handle.model_name(),
                    device = %handle.options().device,
                    precision = %handle.options().precision,
                    elapsed_ms = load_start.elapsed().as_millis() as u64,
                    "Model ready"
                );
                shared.progress.send_replace(LoadingProgress::settled(100.0));
                Self::settle(&shared, LoadState::Ready(handle));
            },
            Err(e) => {
                error!(error = %e, "Error loading model");
                shared.progress.send_modify(|progress| {
                    progress.is_model_loading = false;
                    progress.is_processor_loading = false;
                });
                Self::settle(&shared, LoadState::Failed(e.to_string()));
            },
        }
    }

    /// Publish the load outcome unless the provider was disposed meanwhile
    fn settle(shared: &Shared, outcome: LoadState) {
        shared.state.send_if_modified(|state| {
            if matches!(state, LoadState::Loading) {
                *state = outcome;
                true
            } else {
                false
            }
        });
    }

    async fn load(shared: &Arc<Shared>) -> Result<ModelHandle> {
        let tier = shared.probe.probe().await;
        let options = select_load_options(&tier, &shared.config);
        info!(device = %options.device, precision = %options.precision, "Loading model");

        let model_id = shared.config.model_id.as_str();
        let model = shared
            .loader
            .load_model(model_id, options, Self::tracker(shared, Resource::Model))
            .await?;
        let transform = shared
            .loader
            .load_processor(model_id, Self::tracker(shared, Resource::Processor))
            .await?;

        Ok(ModelHandle::new(model, transform, options))
    }

    fn tracker(shared: &Arc<Shared>, resource: Resource) -> Option<ProgressCallback> {
        if !shared.config.track_progress {
            return None;
        }

        let shared = Arc::clone(shared);
        Some(Arc::new(move |event: LoadProgress| {
            shared.progress.send_modify(|progress| {
                let (percent, loading) = match resource {
                    Resource::Model => (&mut progress.model_progress, &mut progress.is_model_loading),
                    Resource::Processor => (
                        &mut progress.processor_progress,
                        &mut progress.is_processor_loading,
                    ),
                };
                if let Some(fraction) = event.progress {
                    *percent = fraction * 100.0;
                }
                if event.is_finished() {
                    *loading = false;
                }
            });
        }))
    }

    /// Current state
    #[must_use]
    pub fn status(&self) -> ModelStatus {
        self.shared.state.borrow().status()
    }

    /// Current loading progress
    #[must_use]
    pub fn progress(&self) -> LoadingProgress {
        *self.shared.progress.borrow()
    }

    /// True while either sub-resource is still loading
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.progress().is_loading()
    }

    /// Receiver notified on every state change
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<ModelStatus> {
        let mut source = self.shared.state.subscribe();
        let (tx, rx) = watch::channel(source.borrow_and_update().status());
        tokio::spawn(async move {
            while source.changed().await.is_ok() {
                let status = source.borrow_and_update().status();
                if tx.send(status).is_err() {
                    break;
                }
            }
        });
        rx
    }

    /// Receiver notified on every progress change
    #[must_use]
    pub fn subscribe_progress(&self) -> watch::Receiver<LoadingProgress> {
        self.shared.progress.subscribe()
    }

    /// Handle if ready, without waiting
    ///
    /// # Errors
    /// - `NotReady` while unloaded or loading
    /// - `ModelLoad` after a failed load
    pub fn handle(&self) -> Result<ModelHandle> {
        Self::resolve(&self.shared.state.borrow())
    }

    /// Wait until the load settles, starting it if needed
    ///
    /// # Errors
    /// - `ModelLoad` when loading failed
    /// - `NotReady` when the provider was disposed while waiting
    pub async fn wait_ready(&self) -> Result<ModelHandle> {
        self.initialize()?;

        let mut receiver = self.shared.state.subscribe();
        let state = receiver
            .wait_for(|state| !matches!(state, LoadState::Loading))
            .await
            .map_err(|e| BgRemovalError::internal(format!("Model state channel closed: {e}")))?;
        Self::resolve(&state)
    }

    fn resolve(state: &LoadState) -> Result<ModelHandle> {
        match state {
            LoadState::Ready(handle) => Ok(handle.clone()),
            LoadState::Failed(message) => Err(BgRemovalError::model_load(message.clone())),
            LoadState::Loading => Err(BgRemovalError::not_ready("model is still loading")),
            LoadState::Unloaded => Err(BgRemovalError::not_ready("model has not been loaded")),
        }
    }

    /// Drop the model and return to `Unloaded`, aborting an in-flight load
    pub fn dispose(&self) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.shared.state.send_replace(LoadState::Unloaded);
        self.shared.progress.send_replace(LoadingProgress::default());
        info!(model_id = %self.shared.config.model_id, "Model provider disposed");
    }
}

impl Drop for ModelProvider {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Resource {
    Model,
    Processor,
}
