// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job objects and the job state machine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ipp::attribute::IppAttribute;
use tokio::sync::RwLock;
use uuid::Uuid;

use druckwerk_core::types::{JobReason, JobReasons, JobState};

pub type JobRef = Arc<RwLock<Job>>;

/// Inputs to the job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Hold,
    Release,
    DataComplete,
    StartProcessing,
    Stop,
    Finish,
    Cancel,
    Abort,
}

/// Error from an illegal state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("job is in a terminal state")]
    Terminal,
    #[error("event not valid in the current state")]
    Invalid,
}

/// A print job.  One document per job; the printer owns the job and this
/// struct lives behind the printer's job table.
#[derive(Debug)]
pub struct Job {
    pub id: i32,
    pub uuid: Uuid,
    pub printer_id: i32,
    pub printer_path: String,
    pub username: String,
    pub name: String,
    pub state: JobState,
    pub state_reasons: JobReasons,
    /// Job Template and Job Description attributes.
    pub attrs: HashMap<String, IppAttribute>,
    /// Document attributes from Send-Document/Send-URI.
    pub doc_attrs: HashMap<String, IppAttribute>,
    pub format_supplied: Option<String>,
    pub format_detected: Option<String>,
    pub format: String,
    pub priority: i32,
    pub created: DateTime<Utc>,
    pub processing_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Hold deadline; `DateTime<Utc>::MAX_UTC` means indefinite.
    pub hold_until: Option<DateTime<Utc>>,
    pub spool_file: Option<PathBuf>,
    /// Document data is currently being received.
    pub incoming: bool,
    pub impressions: Option<i32>,
    pub impressions_completed: i32,
    pub cancel_requested: bool,
    /// Output device that acknowledged this job (proxy mode).
    pub dev_uuid: Option<Uuid>,
    pub dev_state: Option<JobState>,
    pub dev_state_reasons: JobReasons,
    pub dev_state_message: Option<String>,
    pub transform_pid: Option<u32>,
}

impl Job {
    pub fn new(printer_id: i32, printer_path: &str, id: i32, username: &str, name: &str) -> Self {
        Self {
            id,
            uuid: Uuid::new_v4(),
            printer_id,
            printer_path: printer_path.to_string(),
            username: username.to_string(),
            name: name.to_string(),
            state: JobState::Pending,
            state_reasons: JobReasons::NONE,
            attrs: HashMap::new(),
            doc_attrs: HashMap::new(),
            format_supplied: None,
            format_detected: None,
            format: "application/octet-stream".to_string(),
            priority: 50,
            created: Utc::now(),
            processing_at: None,
            completed_at: None,
            hold_until: None,
            spool_file: None,
            incoming: false,
            impressions: None,
            impressions_completed: 0,
            cancel_requested: false,
            dev_uuid: None,
            dev_state: None,
            dev_state_reasons: JobReasons::NONE,
            dev_state_message: None,
            transform_pid: None,
        }
    }

    pub fn uri(&self, host: &str, port: u16) -> String {
        format!("ipp://{host}:{port}{}/{}", self.printer_path, self.id)
    }

    /// Effective job state, preferring the device-reported state for
    /// terminal outcomes of proxied jobs.
    pub fn effective_state(&self) -> JobState {
        match self.dev_state {
            Some(dev) if dev.is_terminal() => dev,
            _ => self.state,
        }
    }

    /// Apply a state-machine event.
    ///
    /// Terminal states are sticky.  A `Cancel`/`Abort` during processing
    /// latches the intent (`cancel_requested` plus the
    /// processing-to-stop-point reason) and leaves the state at
    /// processing; the final transition happens when the transform exits
    /// and the supervisor re-applies the event from the stopped path.
    pub fn apply(&mut self, event: JobEvent) -> Result<(), TransitionError> {
        use JobEvent::*;
        use JobState::*;

        if self.state.is_terminal() {
            return Err(TransitionError::Terminal);
        }

        match (self.state, event) {
            (Pending, Hold) => {
                self.state = PendingHeld;
                self.state_reasons.insert(JobReason::JobHoldUntilSpecified);
            }
            (Pending, StartProcessing) => self.enter_processing(),
            (Pending, Cancel) => self.enter_terminal(Canceled),
            (Pending, Abort) => self.enter_terminal(Aborted),

            (PendingHeld, Hold) => {
                self.state_reasons.insert(JobReason::JobHoldUntilSpecified);
            }
            (PendingHeld, Release) => self.release(),
            (PendingHeld, DataComplete) => {
                if self.hold_until.is_none() {
                    self.release();
                }
            }
            (PendingHeld, Cancel) => self.enter_terminal(Canceled),
            (PendingHeld, Abort) => self.enter_terminal(Aborted),

            (Processing, Stop) => {
                self.state = ProcessingStopped;
                self.state_reasons.insert(JobReason::JobStopped);
            }
            (Processing, Finish) => self.enter_terminal(Completed),
            (Processing, Cancel) => {
                self.cancel_requested = true;
                self.state_reasons.insert(JobReason::ProcessingToStopPoint);
            }
            (Processing, Abort) => {
                self.cancel_requested = true;
                self.state_reasons.insert(JobReason::ProcessingToStopPoint);
                self.state_reasons.insert(JobReason::AbortedBySystem);
            }

            (ProcessingStopped, StartProcessing) => {
                self.state_reasons.remove(JobReason::JobStopped);
                self.enter_processing();
            }
            (ProcessingStopped, Cancel) => self.enter_terminal(Canceled),
            (ProcessingStopped, Abort) => self.enter_terminal(Aborted),

            _ => return Err(TransitionError::Invalid),
        }

        Ok(())
    }

    /// Complete the latched cancel/abort once the transform has exited.
    pub fn finish_cancel(&mut self) {
        let target = if self.state_reasons.contains(JobReason::AbortedBySystem) {
            JobState::Aborted
        } else {
            JobState::Canceled
        };
        self.state_reasons.remove(JobReason::ProcessingToStopPoint);
        self.enter_terminal(target);
    }

    fn release(&mut self) {
        self.state = JobState::Pending;
        self.hold_until = None;
        self.state_reasons.remove(JobReason::JobHoldUntilSpecified);
    }

    fn enter_processing(&mut self) {
        self.state = JobState::Processing;
        self.processing_at.get_or_insert_with(Utc::now);
        self.state_reasons.insert(JobReason::JobPrinting);
        self.state_reasons.remove(JobReason::JobQueued);
    }

    fn enter_terminal(&mut self, state: JobState) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.completed_at = Some(Utc::now());
        self.state_reasons.remove(JobReason::JobPrinting);
        match state {
            JobState::Completed => {
                self.state_reasons.insert(JobReason::JobCompletedSuccessfully);
            }
            JobState::Canceled => {
                self.state_reasons.insert(JobReason::JobCanceledByUser);
            }
            JobState::Aborted => {
                self.state_reasons.insert(JobReason::AbortedBySystem);
            }
            _ => {}
        }
    }

    /// Hold the job.  `until` of `None` holds indefinitely.
    pub fn hold(&mut self, until: Option<DateTime<Utc>>) -> Result<(), TransitionError> {
        self.apply(JobEvent::Hold)?;
        self.hold_until = until;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(1, "/ipp/print/test", 1, "alice", "report")
    }

    #[test]
    fn submit_then_process_then_complete() {
        let mut j = job();
        assert_eq!(j.state, JobState::Pending);

        j.apply(JobEvent::StartProcessing).unwrap();
        assert_eq!(j.state, JobState::Processing);
        assert!(j.processing_at.is_some());

        j.apply(JobEvent::Finish).unwrap();
        assert_eq!(j.state, JobState::Completed);
        assert!(j.completed_at.is_some());
        assert!(j.state_reasons.contains(JobReason::JobCompletedSuccessfully));
    }

    #[test]
    fn held_job_releases_to_pending() {
        let mut j = job();
        j.hold(None).unwrap();
        assert_eq!(j.state, JobState::PendingHeld);
        assert!(j.state_reasons.contains(JobReason::JobHoldUntilSpecified));

        j.apply(JobEvent::Release).unwrap();
        assert_eq!(j.state, JobState::Pending);
        assert!(!j.state_reasons.contains(JobReason::JobHoldUntilSpecified));
    }

    #[test]
    fn data_complete_releases_only_untimed_holds() {
        let mut j = job();
        j.hold(Some(DateTime::<Utc>::MAX_UTC)).unwrap();
        j.apply(JobEvent::DataComplete).unwrap();
        assert_eq!(j.state, JobState::PendingHeld);

        let mut j = job();
        j.apply(JobEvent::Hold).unwrap();
        j.apply(JobEvent::DataComplete).unwrap();
        assert_eq!(j.state, JobState::Pending);
    }

    #[test]
    fn cancel_during_processing_latches() {
        let mut j = job();
        j.apply(JobEvent::StartProcessing).unwrap();
        j.apply(JobEvent::Cancel).unwrap();

        assert_eq!(j.state, JobState::Processing);
        assert!(j.cancel_requested);
        assert!(j.state_reasons.contains(JobReason::ProcessingToStopPoint));

        j.finish_cancel();
        assert_eq!(j.state, JobState::Canceled);
        assert!(!j.state_reasons.contains(JobReason::ProcessingToStopPoint));
    }

    #[test]
    fn terminal_states_accept_no_events() {
        let mut j = job();
        j.apply(JobEvent::Cancel).unwrap();
        assert_eq!(j.state, JobState::Canceled);

        for event in [
            JobEvent::Hold,
            JobEvent::Release,
            JobEvent::StartProcessing,
            JobEvent::Finish,
            JobEvent::Cancel,
            JobEvent::Abort,
        ] {
            assert_eq!(j.apply(event), Err(TransitionError::Terminal));
        }
        assert_eq!(j.state, JobState::Canceled);
    }

    #[test]
    fn stopped_job_resumes_processing() {
        let mut j = job();
        j.apply(JobEvent::StartProcessing).unwrap();
        j.apply(JobEvent::Stop).unwrap();
        assert_eq!(j.state, JobState::ProcessingStopped);
        assert!(j.state_reasons.contains(JobReason::JobStopped));

        j.apply(JobEvent::StartProcessing).unwrap();
        assert_eq!(j.state, JobState::Processing);
        assert!(!j.state_reasons.contains(JobReason::JobStopped));
    }

    #[test]
    fn device_terminal_state_wins_for_proxied_jobs() {
        let mut j = job();
        j.apply(JobEvent::StartProcessing).unwrap();
        j.dev_state = Some(JobState::Completed);
        assert_eq!(j.effective_state(), JobState::Completed);

        j.dev_state = Some(JobState::Processing);
        assert_eq!(j.effective_state(), JobState::Processing);
    }
}
