// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Background job scheduling: start pending jobs, advance hold-until
// timers, reap expired subscription leases, and finish deferred printer
// pauses.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use druckwerk_core::types::{Event, JobReason, JobState, PrinterReason, PrinterState};

use crate::events;
use crate::job::{JobEvent, JobRef};
use crate::printer::PrinterRef;
use crate::system::SystemContext;
use crate::transform::{self, TransformMode};

/// Spawn the periodic maintenance task (1 s cadence).
pub fn start(ctx: Arc<SystemContext>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            tick(&ctx).await;
        }
    })
}

/// One maintenance pass.
pub async fn tick(ctx: &Arc<SystemContext>) {
    ctx.subscriptions.reap_expired(Utc::now()).await;

    for printer in ctx.printers.all().await {
        release_due_holds(ctx, &printer).await;
        finish_deferred_pause(ctx, &printer).await;
        prune_finished_jobs(&printer).await;
        check_jobs(ctx, &printer).await;
    }
}

/// Release held jobs whose hold-until time has arrived.
async fn release_due_holds(ctx: &Arc<SystemContext>, printer: &PrinterRef) {
    let now = Utc::now();
    let jobs: Vec<JobRef> = {
        let printer = printer.read().await;
        printer
            .active_jobs
            .iter()
            .filter_map(|(_, id)| printer.job(*id).cloned())
            .collect()
    };

    for job in jobs {
        let released = {
            let mut job = job.write().await;
            if job.state == JobState::PendingHeld
                && job
                    .hold_until
                    .is_some_and(|t| t != DateTime::<Utc>::MAX_UTC && t <= now)
            {
                job.apply(JobEvent::Release).is_ok()
            } else {
                false
            }
        };
        if released {
            events::add_event(ctx, Some(printer), Some(&job), Event::JobStateChanged, "Job released.")
                .await;
        }
    }
}

/// Complete a pause-after-current-job once the processing job drains.
async fn finish_deferred_pause(ctx: &Arc<SystemContext>, printer: &PrinterRef) {
    let paused = {
        let mut printer = printer.write().await;
        if printer.state_reasons.contains(PrinterReason::MovingToPaused)
            && printer.processing_job.is_none()
        {
            printer.state_reasons.remove(PrinterReason::MovingToPaused);
            printer.state_reasons.insert(PrinterReason::Paused);
            printer.set_state(PrinterState::Stopped);
            true
        } else {
            false
        }
    };
    if paused {
        info!("printer paused after current job");
        events::add_event(ctx, Some(printer), None, Event::PrinterStateChanged, "Printer paused.")
            .await;
    }
}

/// Drop terminal jobs from the active list.
async fn prune_finished_jobs(printer: &PrinterRef) {
    let terminal: Vec<i32> = {
        let printer = printer.read().await;
        let mut terminal = Vec::new();
        for (_, id) in &printer.active_jobs {
            if let Some(job) = printer.job(*id) {
                if job.read().await.effective_state().is_terminal() {
                    terminal.push(*id);
                }
            }
        }
        terminal
    };

    if !terminal.is_empty() {
        let mut printer = printer.write().await;
        for id in terminal {
            printer.remove_active(id);
        }
    }
}

/// Start the next pending job when the printer is able to run one.
pub async fn check_jobs(ctx: &Arc<SystemContext>, printer: &PrinterRef) {
    loop {
        let next = {
            let p = printer.read().await;
            if p.is_shutdown
                || p.is_deleted
                || p.state == PrinterState::Stopped
                || p.is_proxied()
                || p.processing_job.is_some()
            {
                return;
            }
            p.next_pending_job().await
        };

        let Some(job) = next else {
            // Queue drained: fall back to idle.
            let went_idle = {
                let mut p = printer.write().await;
                if p.processing_job.is_none() && p.state == PrinterState::Processing {
                    p.set_state(PrinterState::Idle);
                    true
                } else {
                    false
                }
            };
            if went_idle {
                events::add_event(ctx, Some(printer), None, Event::PrinterStateChanged, "").await;
            }
            return;
        };

        start_job(ctx, printer, &job).await;

        // A transform runs in the background; only the no-command path
        // loops on to the next queued job.
        if printer.read().await.processing_job.is_some() {
            return;
        }
    }
}

async fn start_job(ctx: &Arc<SystemContext>, printer: &PrinterRef, job: &JobRef) {
    let (job_id, command) = {
        let mut p = printer.write().await;
        let mut j = job.write().await;
        if j.apply(JobEvent::StartProcessing).is_err() {
            return;
        }
        p.processing_job = Some(j.id);
        p.set_state(PrinterState::Processing);
        (j.id, p.command.clone())
    };

    debug!(job_id, "job started");
    events::add_event(ctx, Some(printer), Some(job), Event::JobStateChanged, "Job processing.")
        .await;

    match command {
        None => {
            // Spool-only operation: the job completes as soon as it has
            // been ingested.
            {
                let mut j = job.write().await;
                if j.impressions.is_none() {
                    j.impressions = Some(1);
                }
                j.impressions_completed = j.impressions.unwrap_or(1);
                let _ = j.apply(JobEvent::Finish);
            }
            finish_job(ctx, printer, job).await;
        }
        Some(command) => {
            let ctx = ctx.clone();
            let printer = printer.clone();
            let job = job.clone();
            tokio::spawn(async move {
                let exit = transform::run_transform(
                    &ctx,
                    &printer,
                    &job,
                    &command,
                    None,
                    TransformMode::Command,
                )
                .await;
                finalize_transform(&ctx, &printer, &job, exit.ok().flatten()).await;
                // Type-erased to break the async cycle back into the
                // scheduling loop.
                let resume: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> =
                    Box::pin(check_jobs(&ctx, &printer));
                resume.await;
            });
        }
    }
}

/// Apply the final job transition once the transform has exited.
async fn finalize_transform(
    ctx: &Arc<SystemContext>,
    printer: &PrinterRef,
    job: &JobRef,
    exit_code: Option<i32>,
) {
    {
        let mut j = job.write().await;
        if j.cancel_requested {
            j.finish_cancel();
        } else if j.state == JobState::Aborted {
            // Aborted mid-run by a STATE: -error message.
            if j.completed_at.is_none() {
                j.completed_at = Some(Utc::now());
            }
            j.state_reasons.insert(JobReason::AbortedBySystem);
        } else if j.state == JobState::Processing {
            match exit_code {
                Some(0) => {
                    let _ = j.apply(JobEvent::Finish);
                }
                _ => {
                    j.state_reasons.insert(JobReason::AbortedBySystem);
                    j.finish_cancel();
                }
            }
        }
    }
    finish_job(ctx, printer, job).await;
}

/// Clean up the printer after a job reaches a terminal state and pick up
/// the next one.
pub async fn finish_job(ctx: &Arc<SystemContext>, printer: &PrinterRef, job: &JobRef) {
    let job_id = job.read().await.id;
    {
        let mut p = printer.write().await;
        p.remove_active(job_id);
        if p.processing_job == Some(job_id) {
            p.processing_job = None;
        }
        if p.processing_job.is_none() && p.state == PrinterState::Processing {
            p.set_state(PrinterState::Idle);
        }
    }

    events::add_event(ctx, Some(printer), Some(job), Event::JobCompleted, "").await;
    events::add_event(ctx, Some(printer), None, Event::PrinterStateChanged, "").await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use druckwerk_core::config::ServerConfig;
    use druckwerk_core::types::{Events, ServiceType};
    use tokio::sync::RwLock;

    use crate::auth::AllowAll;
    use crate::job::Job;
    use crate::subscription::Subscription;

    async fn ctx_and_printer(command: Option<&str>) -> (Arc<SystemContext>, PrinterRef) {
        let config = ServerConfig {
            transform_command: command.map(str::to_string),
            ..Default::default()
        };
        let ctx = SystemContext::new(config, Arc::new(AllowAll));
        let printer = ctx.create_printer("office", ServiceType::Print).await;
        (ctx, printer)
    }

    async fn enqueue_job(printer: &PrinterRef, spool: Option<PathBuf>) -> JobRef {
        let mut p = printer.write().await;
        let id = p.next_job_id();
        let mut job = Job::new(p.id, &p.path, id, "alice", "test");
        job.spool_file = spool;
        let job = Arc::new(RwLock::new(job));
        p.add_job(job.clone(), id, 50);
        job
    }

    /// Spooled job backed by a real temp file.
    async fn enqueue_spooled_job(printer: &PrinterRef, dir: &tempfile::TempDir) -> JobRef {
        let path = dir.path().join(format!("job-{}.prn", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, b"spooled").await.unwrap();
        enqueue_job(printer, Some(path)).await
    }

    #[tokio::test]
    async fn pending_job_completes_directly_without_transform() {
        let (ctx, printer) = ctx_and_printer(None).await;
        let dir = tempfile::tempdir().unwrap();
        let job = enqueue_spooled_job(&printer, &dir).await;

        check_jobs(&ctx, &printer).await;

        let j = job.read().await;
        assert_eq!(j.state, JobState::Completed);
        assert_eq!(j.impressions_completed, 1);
        drop(j);

        let p = printer.read().await;
        assert_eq!(p.state, PrinterState::Idle);
        assert!(p.processing_job.is_none());
        assert!(p.active_jobs.is_empty());
    }

    #[tokio::test]
    async fn completion_emits_job_completed_event() {
        let (ctx, printer) = ctx_and_printer(None).await;
        let printer_id = printer.read().await.id;

        let mut sub = Subscription::new(1, "alice", Events::from(Event::JobCompleted), 0);
        sub.printer_id = Some(printer_id);
        ctx.subscriptions.insert(1, Arc::new(RwLock::new(sub))).await;

        let dir = tempfile::tempdir().unwrap();
        let _job = enqueue_spooled_job(&printer, &dir).await;
        check_jobs(&ctx, &printer).await;

        let sub = ctx.subscriptions.get(1).await.unwrap();
        assert_eq!(sub.read().await.last_sequence, 1);
    }

    #[tokio::test]
    async fn transform_exit_zero_completes_job() {
        let (ctx, printer) = ctx_and_printer(Some("/bin/cat")).await;

        let dir = tempfile::tempdir().unwrap();
        let spool = dir.path().join("office-00001.txt");
        tokio::fs::write(&spool, b"TEST\nDATA\n").await.unwrap();

        let job = enqueue_job(&printer, Some(spool)).await;
        check_jobs(&ctx, &printer).await;

        // The transform task runs in the background.
        for _ in 0..100 {
            if job.read().await.state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(job.read().await.state, JobState::Completed);
        assert_eq!(printer.read().await.state, PrinterState::Idle);
    }

    #[tokio::test]
    async fn transform_failure_aborts_job() {
        let (ctx, printer) = ctx_and_printer(Some("/bin/false")).await;

        let dir = tempfile::tempdir().unwrap();
        let spool = dir.path().join("office-00001.txt");
        tokio::fs::write(&spool, b"x").await.unwrap();

        let job = enqueue_job(&printer, Some(spool)).await;
        check_jobs(&ctx, &printer).await;

        for _ in 0..100 {
            if job.read().await.state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let j = job.read().await;
        assert_eq!(j.state, JobState::Aborted);
        assert!(j.state_reasons.contains(JobReason::AbortedBySystem));
    }

    #[tokio::test]
    async fn due_holds_are_released_by_tick() {
        let (ctx, printer) = ctx_and_printer(None).await;
        let dir = tempfile::tempdir().unwrap();
        let job = enqueue_spooled_job(&printer, &dir).await;
        job.write()
            .await
            .hold(Some(Utc::now() - chrono::Duration::seconds(1)))
            .unwrap();

        tick(&ctx).await;

        // Released by the tick and then immediately scheduled/completed.
        assert!(matches!(
            job.read().await.state,
            JobState::Completed | JobState::Pending | JobState::Processing
        ));
        assert_ne!(job.read().await.state, JobState::PendingHeld);
    }

    #[tokio::test]
    async fn indefinite_holds_survive_ticks() {
        let (ctx, printer) = ctx_and_printer(None).await;
        let job = enqueue_job(&printer, None).await;
        job.write()
            .await
            .hold(Some(DateTime::<Utc>::MAX_UTC))
            .unwrap();

        tick(&ctx).await;
        assert_eq!(job.read().await.state, JobState::PendingHeld);
    }

    #[tokio::test]
    async fn stopped_printer_does_not_start_jobs() {
        let (ctx, printer) = ctx_and_printer(None).await;
        printer.write().await.set_state(PrinterState::Stopped);
        let dir = tempfile::tempdir().unwrap();
        let job = enqueue_spooled_job(&printer, &dir).await;

        check_jobs(&ctx, &printer).await;
        assert_eq!(job.read().await.state, JobState::Pending);
    }
}
