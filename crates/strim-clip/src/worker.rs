use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

use strim_core::TelemetrySink;

use crate::clip_store::{ClipRecord, ClipState, ClipStateUpdate, ClipStore};
use crate::encoder::ClipEncoder;
use crate::uploader::ClipUploader;

const TELEMETRY_COMPONENT: &str = "clip_worker";

/// Observer invoked after every state transition; errors are logged at the
/// invoking boundary and never reach the pipeline.
pub type ClipNotifier = Arc<dyn Fn(&ClipRecord) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ClipWorkerConfig {
    pub poll_interval_ms: u64,
    /// At most this many clips are processed concurrently.
    pub concurrency: usize,
    pub output_dir: PathBuf,
}

struct WorkerContext {
    store: Arc<ClipStore>,
    encoder: Arc<dyn ClipEncoder>,
    uploader: Arc<dyn ClipUploader>,
    telemetry: Arc<dyn TelemetrySink>,
    notifier: Option<ClipNotifier>,
    config: ClipWorkerConfig,
    in_flight: AtomicUsize,
}

impl WorkerContext {
    fn notify(&self, record: &ClipRecord) {
        if let Some(notifier) = self.notifier.as_ref() {
            if let Err(error) = notifier(record) {
                warn!(
                    clip_id = record.clip_id.as_str(),
                    error = %error,
                    "clip notification callback failed"
                );
            }
        }
    }

    fn apply(
        &self,
        clip_id: &str,
        next: ClipState,
        update: ClipStateUpdate,
    ) -> Result<ClipRecord> {
        let record = self.store.update_state(clip_id, next, update)?;
        self.telemetry.record_job_state(clip_id, next.as_str());
        self.notify(&record);
        Ok(record)
    }
}

/// Claim/execute loop over the clip store.
///
/// Each tick claims up to `concurrency − in_flight` queued clips and runs each
/// through encode → upload under a semaphore sized to the configured
/// concurrency. A stage failure marks that clip `failed` and leaves the
/// supervisor and its siblings running. `stop` cancels the loop and drains
/// in-flight tasks best-effort.
pub struct ClipWorkerSupervisor {
    context: Arc<WorkerContext>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl ClipWorkerSupervisor {
    pub fn new(
        store: Arc<ClipStore>,
        encoder: Arc<dyn ClipEncoder>,
        uploader: Arc<dyn ClipUploader>,
        telemetry: Arc<dyn TelemetrySink>,
        notifier: Option<ClipNotifier>,
        config: ClipWorkerConfig,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            context: Arc::new(WorkerContext {
                store,
                encoder,
                uploader,
                telemetry,
                notifier,
                config,
                in_flight: AtomicUsize::new(0),
            }),
            stop_tx,
            stop_rx,
            handle: None,
        }
    }

    /// Spawns the supervisor loop. Idempotent: a running supervisor is left
    /// alone.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            warn!("clip worker supervisor already running");
            return;
        }
        let context = Arc::clone(&self.context);
        let stop_rx = self.stop_rx.clone();
        self.handle = Some(tokio::spawn(run_loop(context, stop_rx)));
        info!(
            concurrency = self.context.config.concurrency,
            poll_interval_ms = self.context.config.poll_interval_ms,
            "clip worker supervisor started"
        );
    }

    /// Signals the loop to stop and awaits it; outstanding clip tasks are
    /// cancelled and drained with failures suppressed.
    pub async fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(error) = handle.await {
                if !error.is_cancelled() {
                    warn!(error = %error, "clip worker supervisor join failed");
                }
            }
        }
        info!("clip worker supervisor stopped");
    }

    pub fn in_flight(&self) -> usize {
        self.context.in_flight.load(Ordering::SeqCst)
    }
}

async fn run_loop(context: Arc<WorkerContext>, mut stop_rx: watch::Receiver<bool>) {
    let semaphore = Arc::new(Semaphore::new(context.config.concurrency.max(1)));
    let mut tasks: JoinSet<()> = JoinSet::new();
    let poll_interval = Duration::from_millis(context.config.poll_interval_ms.max(1));
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
        while let Some(result) = tasks.try_join_next() {
            if let Err(error) = result {
                if !error.is_cancelled() {
                    warn!(error = %error, "clip task panicked");
                }
            }
        }
        let in_flight = context.in_flight.load(Ordering::SeqCst);
        let available = context.config.concurrency.saturating_sub(in_flight);
        if available == 0 {
            continue;
        }
        let claimed = match context.store.claim_queued(available) {
            Ok(claimed) => claimed,
            Err(error) => {
                context
                    .telemetry
                    .record_error(TELEMETRY_COMPONENT, &format!("claim failed: {error}"));
                continue;
            }
        };
        for record in claimed {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            context.in_flight.fetch_add(1, Ordering::SeqCst);
            let context = Arc::clone(&context);
            tasks.spawn(async move {
                let _permit = permit;
                process_clip(&context, record).await;
                context.in_flight.fetch_sub(1, Ordering::SeqCst);
            });
        }
    }
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}
    context.in_flight.store(0, Ordering::SeqCst);
}

async fn process_clip(context: &WorkerContext, record: ClipRecord) {
    let clip_id = record.clip_id.clone();
    if let Err(error) = run_stages(context, record).await {
        warn!(clip_id = clip_id.as_str(), error = %error, "clip processing failed");
        context
            .telemetry
            .record_error(TELEMETRY_COMPONENT, &format!("clip {clip_id} failed: {error}"));
        let failed = context.apply(
            &clip_id,
            ClipState::Failed,
            ClipStateUpdate::reason("stage failure").with_error(format!("{error:#}")),
        );
        if let Err(error) = failed {
            warn!(clip_id = clip_id.as_str(), error = %error, "failed to mark clip failed");
        }
    }
}

async fn run_stages(context: &WorkerContext, record: ClipRecord) -> Result<()> {
    let clip_id = record.clip_id.clone();
    let output_path = context
        .encoder
        .encode(&record, &context.config.output_dir)
        .await?;
    context.apply(
        &clip_id,
        ClipState::Encoded,
        ClipStateUpdate::reason("encode complete")
            .with_output_path(output_path.display().to_string()),
    )?;
    context.apply(
        &clip_id,
        ClipState::Uploading,
        ClipStateUpdate::reason("upload started"),
    )?;
    let published = context.uploader.publish(&clip_id, &output_path).await?;
    context.apply(
        &clip_id,
        ClipState::Published,
        ClipStateUpdate::reason(published.detail).with_published_url(published.url),
    )?;
    info!(clip_id = clip_id.as_str(), "clip published");
    Ok(())
}
