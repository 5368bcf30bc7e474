use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use crate::core::state::AppState;
use crate::pipeline::GradingPipeline;
use crate::tasks::grading;

const STALE_RECOVERY_INTERVAL: Duration = Duration::from_secs(60);

pub(crate) async fn run(state: AppState) -> Result<()> {
    let pipeline = Arc::new(GradingPipeline::from_settings(state.settings())?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_concurrency = state.settings().pipeline().worker_concurrency.max(1);
    let mut handles = Vec::with_capacity(worker_concurrency + 1);

    for _ in 0..worker_concurrency {
        handles.push(tokio::spawn(grading_worker(
            state.clone(),
            pipeline.clone(),
            shutdown_rx.clone(),
        )));
    }
    handles.push(tokio::spawn(stale_recovery_loop(state.clone(), shutdown_rx.clone())));

    crate::core::shutdown::shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to background tasks");
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }

    Ok(())
}

async fn grading_worker(
    state: AppState,
    pipeline: Arc<GradingPipeline>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        match grading::claim_next_submission(state.db()).await {
            Ok(Some(submission)) => {
                let submission_id = submission.id.clone();
                if let Err(err) = grading::process_submission(&state, &pipeline, submission).await {
                    if let Err(recovery_err) = grading::recover_on_unexpected_error(
                        &state,
                        &submission_id,
                        &err.to_string(),
                    )
                    .await
                    {
                        tracing::error!(
                            submission_id,
                            error = %recovery_err,
                            "Failed to record error after worker failure"
                        );
                    }
                    tracing::error!(
                        submission_id,
                        error = %err,
                        "Failed to process submission"
                    );
                }
                continue;
            }
            Ok(None) => {}
            Err(err) => tracing::error!(error = %err, "Failed to claim submission"),
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(Duration::from_secs(2)) => {}
        }
    }
}

async fn stale_recovery_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        if let Err(err) = grading::recover_stale_submissions(&state).await {
            tracing::error!(error = %err, "Stale submission recovery failed");
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(STALE_RECOVERY_INTERVAL) => {}
        }
    }
}
