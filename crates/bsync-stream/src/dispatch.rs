//! Operations dispatcher.
//!
//! A single dispatcher instance owns all cache writes for its cursor scope:
//! it classifies each op in a frame against one registry snapshot, persists
//! every routing decision through the handler registry (with a bounded
//! retry budget per write), and only then advances the durable cursor.

use crate::cursor::CursorStore;
use crate::process::{processor_for, OpContext, RoutingDecision};
use bsync_cache::{HandlerKey, HandlerRegistry, StudyUserRegistry};
use bsync_core::{CommitFrame, HandlerError, Operation, StreamError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const WRITE_RETRY_STEP: Duration = Duration::from_millis(100);
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
const DRAIN_DEADLINE: Duration = Duration::from_secs(10);

/// Per-frame outcome counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchResult {
    pub written: usize,
    pub skipped: usize,
    pub errors: usize,
}

pub struct OperationsDispatcher {
    handlers: HandlerRegistry,
    registry: Arc<StudyUserRegistry>,
    cursor_store: Arc<dyn CursorStore>,
    max_write_retries: u32,
}

impl OperationsDispatcher {
    pub fn new(
        handlers: HandlerRegistry,
        registry: Arc<StudyUserRegistry>,
        cursor_store: Arc<dyn CursorStore>,
        max_write_retries: u32,
    ) -> Self {
        Self {
            handlers,
            registry,
            cursor_store,
            max_write_retries: max_write_retries.max(1),
        }
    }

    /// Processes every op in the frame, then advances the cursor. Only a
    /// cursor persistence failure is fatal; the frame's completed writes
    /// stay in place because they are idempotent on replay.
    pub async fn dispatch(&self, frame: &CommitFrame) -> Result<DispatchResult, StreamError> {
        let mut result = DispatchResult::default();
        let mut snapshot = self.registry.snapshot();

        for op in &frame.ops {
            let Some(processor) = processor_for(op.kind, &op.collection) else {
                result.skipped += 1;
                metrics::counter!("bsync_records_skipped", 1);
                continue;
            };
            let ctx = OpContext {
                actor_id: &frame.actor_id,
                op,
                synctimestamp: Utc::now(),
            };
            let decisions = processor(&ctx, &snapshot);
            if decisions.is_empty() {
                result.skipped += 1;
                metrics::counter!("bsync_records_skipped", 1);
                continue;
            }

            let mut saw_study_post = false;
            for decision in decisions {
                if decision.handler == HandlerKey::Post
                    && decision.record.op == Operation::Create
                {
                    // Feed the overlay so later likes/replies in this frame
                    // and stream resolve against the just-seen post.
                    self.registry.insert_study_user_post(
                        &decision.record.record_uri,
                        &decision.record.author_id,
                    );
                    saw_study_post = true;
                }
                match self.write_with_retry(&decision).await {
                    Ok(()) => {
                        result.written += 1;
                        metrics::counter!("bsync_records_written", 1);
                    }
                    Err(e) => {
                        result.errors += 1;
                        warn!(
                            handler = decision.handler.as_str(),
                            uri = %decision.record.record_uri,
                            error = %e,
                            "abandoning cache write"
                        );
                    }
                }
            }
            if saw_study_post {
                // Later ops in this frame classify against the overlay
                // delta; each op still sees exactly one consistent view.
                snapshot = self.registry.snapshot();
            }
        }

        self.cursor_store
            .persist(frame.stream_offset)
            .await
            .map_err(|source| StreamError::CursorPersist {
                offset: frame.stream_offset,
                source,
            })?;
        Ok(result)
    }

    async fn write_with_retry(&self, decision: &RoutingDecision) -> Result<(), HandlerError> {
        let Some(handler) = self.handlers.get(decision.handler) else {
            return Err(HandlerError::InvalidRecord("handler"));
        };
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let handler = handler.clone();
            let record = decision.record.clone();
            let outcome = tokio::time::timeout(
                WRITE_DEADLINE,
                tokio::task::spawn_blocking(move || handler.write(&record)),
            )
            .await;
            let err = match outcome {
                Ok(Ok(Ok(_path))) => return Ok(()),
                Ok(Ok(Err(e))) => e,
                Ok(Err(join)) => HandlerError::Other(anyhow::anyhow!(join)),
                Err(_elapsed) => HandlerError::Timeout(WRITE_DEADLINE),
            };
            if !err.is_retryable() || attempt >= self.max_write_retries {
                return Err(err);
            }
            debug!(attempt, error = %err, "retrying cache write");
            tokio::time::sleep(WRITE_RETRY_STEP * attempt).await;
        }
    }
}

/// Dispatcher task: consumes frames from the bounded queue until shutdown,
/// then drains whatever is already queued, best-effort within a deadline.
pub async fn run_dispatcher(
    dispatcher: OperationsDispatcher,
    mut rx: mpsc::Receiver<CommitFrame>,
    cancel: CancellationToken,
) -> Result<(), StreamError> {
    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => dispatch_one(&dispatcher, frame).await?,
                None => return Ok(()),
            },
            _ = cancel.cancelled() => break,
        }
    }

    let deadline = tokio::time::Instant::now() + DRAIN_DEADLINE;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(frame)) => dispatch_one(&dispatcher, frame).await?,
            Ok(None) => return Ok(()),
            Err(_) => {
                info!("drain deadline reached; leaving remaining frames for replay");
                return Ok(());
            }
        }
    }
}

async fn dispatch_one(
    dispatcher: &OperationsDispatcher,
    frame: CommitFrame,
) -> Result<(), StreamError> {
    let result = dispatcher.dispatch(&frame).await?;
    debug!(
        offset = %frame.stream_offset,
        actor = %frame.actor_id,
        written = result.written,
        skipped = result.skipped,
        errors = result.errors,
        "dispatched frame"
    );
    Ok(())
}
