// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Druckwerk IPP server.

use serde::{Deserialize, Serialize};

/// Service flavor a printer endpoint is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceType {
    Print,
    Print3d,
    Faxout,
}

impl ServiceType {
    /// Resource-path prefix for this service (`/ipp/print`, ...).
    pub fn path_prefix(self) -> &'static str {
        match self {
            Self::Print => "/ipp/print",
            Self::Print3d => "/ipp/print3d",
            Self::Faxout => "/ipp/faxout",
        }
    }

    /// `printer-service-type` keyword.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Print => "print",
            Self::Print3d => "print3d",
            Self::Faxout => "faxout",
        }
    }
}

/// Lifecycle states of an IPP job (RFC 8011 `job-state` enum values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    PendingHeld,
    Processing,
    ProcessingStopped,
    Canceled,
    Aborted,
    Completed,
}

impl JobState {
    /// Wire enum value (3..9).
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Pending => 3,
            Self::PendingHeld => 4,
            Self::Processing => 5,
            Self::ProcessingStopped => 6,
            Self::Canceled => 7,
            Self::Aborted => 8,
            Self::Completed => 9,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            3 => Some(Self::Pending),
            4 => Some(Self::PendingHeld),
            5 => Some(Self::Processing),
            6 => Some(Self::ProcessingStopped),
            7 => Some(Self::Canceled),
            8 => Some(Self::Aborted),
            9 => Some(Self::Completed),
            _ => None,
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Canceled | Self::Aborted | Self::Completed)
    }

    /// `which-jobs=not-completed` selects states up to and including
    /// processing-stopped.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

/// Printer states (RFC 8011 `printer-state` enum values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrinterState {
    Idle,
    Processing,
    Stopped,
}

impl PrinterState {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Idle => 3,
            Self::Processing => 4,
            Self::Stopped => 5,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            3 => Some(Self::Idle),
            4 => Some(Self::Processing),
            5 => Some(Self::Stopped),
            _ => None,
        }
    }
}

/// Resource states (PWG 5100.22 `resource-state` enum values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceState {
    Pending,
    Available,
    Installed,
    Canceled,
    Aborted,
}

impl ResourceState {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Pending => 3,
            Self::Available => 4,
            Self::Installed => 5,
            Self::Canceled => 6,
            Self::Aborted => 7,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Canceled | Self::Aborted)
    }
}

/// Resource flavors.  Static resources are content files referenced from
/// printer metadata; template resources hold attribute sets merged into
/// create requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    StaticIccProfile,
    StaticImage,
    StaticStrings,
    TemplateDocument,
    TemplateJob,
    TemplatePrinter,
}

impl ResourceType {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::StaticIccProfile => "static-icc-profile",
            Self::StaticImage => "static-image",
            Self::StaticStrings => "static-strings",
            Self::TemplateDocument => "template-document",
            Self::TemplateJob => "template-job",
            Self::TemplatePrinter => "template-printer",
        }
    }

    pub fn from_keyword(kw: &str) -> Option<Self> {
        match kw {
            "static-icc-profile" => Some(Self::StaticIccProfile),
            "static-image" => Some(Self::StaticImage),
            "static-strings" => Some(Self::StaticStrings),
            "template-document" => Some(Self::TemplateDocument),
            "template-job" => Some(Self::TemplateJob),
            "template-printer" => Some(Self::TemplatePrinter),
            _ => None,
        }
    }

    pub fn is_template(self) -> bool {
        matches!(
            self,
            Self::TemplateDocument | Self::TemplateJob | Self::TemplatePrinter
        )
    }
}

/// Defines a keyword-mapped enum plus a compact bitset over it.
macro_rules! keyword_set {
    (
        $(#[$enum_meta:meta])*
        $enum_name:ident / $set_name:ident {
            $($variant:ident => $kw:literal,)+
        }
    ) => {
        $(#[$enum_meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $enum_name {
            $($variant,)+
        }

        impl $enum_name {
            pub const ALL: &'static [$enum_name] = &[$($enum_name::$variant,)+];

            pub fn keyword(self) -> &'static str {
                match self {
                    $($enum_name::$variant => $kw,)+
                }
            }

            pub fn from_keyword(kw: &str) -> Option<Self> {
                match kw {
                    $($kw => Some($enum_name::$variant),)+
                    _ => None,
                }
            }

            const fn bit(self) -> u64 {
                1u64 << (self as u64)
            }
        }

        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $set_name(u64);

        impl $set_name {
            pub const NONE: $set_name = $set_name(0);

            pub fn insert(&mut self, r: $enum_name) {
                self.0 |= r.bit();
            }

            pub fn remove(&mut self, r: $enum_name) {
                self.0 &= !r.bit();
            }

            pub fn contains(self, r: $enum_name) -> bool {
                self.0 & r.bit() != 0
            }

            pub fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub fn clear(&mut self) {
                self.0 = 0;
            }

            pub fn union(self, other: $set_name) -> $set_name {
                $set_name(self.0 | other.0)
            }

            pub fn intersects(self, other: $set_name) -> bool {
                self.0 & other.0 != 0
            }

            pub fn iter(self) -> impl Iterator<Item = $enum_name> {
                $enum_name::ALL.iter().copied().filter(move |r| self.contains(*r))
            }

            /// Keywords of the member reasons, or `["none"]` when empty.
            pub fn keywords(self) -> Vec<&'static str> {
                if self.is_empty() {
                    vec!["none"]
                } else {
                    self.iter().map(|r| r.keyword()).collect()
                }
            }
        }

        impl From<$enum_name> for $set_name {
            fn from(r: $enum_name) -> Self {
                $set_name(r.bit())
            }
        }

        impl FromIterator<$enum_name> for $set_name {
            fn from_iter<I: IntoIterator<Item = $enum_name>>(iter: I) -> Self {
                let mut set = $set_name::NONE;
                for r in iter {
                    set.insert(r);
                }
                set
            }
        }
    };
}

keyword_set! {
    /// `job-state-reasons` keywords tracked per job.
    JobReason / JobReasons {
        AbortedBySystem => "aborted-by-system",
        CompressionError => "compression-error",
        DocumentAccessError => "document-access-error",
        DocumentFormatError => "document-format-error",
        DocumentPasswordError => "document-password-error",
        DocumentPermissionError => "document-permission-error",
        DocumentSecurityError => "document-security-error",
        DocumentUnprintableError => "document-unprintable-error",
        ErrorsDetected => "errors-detected",
        JobCanceledAtDevice => "job-canceled-at-device",
        JobCanceledByUser => "job-canceled-by-user",
        JobCompletedSuccessfully => "job-completed-successfully",
        JobCompletedWithErrors => "job-completed-with-errors",
        JobCompletedWithWarnings => "job-completed-with-warnings",
        JobDataInsufficient => "job-data-insufficient",
        JobFetchable => "job-fetchable",
        JobHoldUntilSpecified => "job-hold-until-specified",
        JobIncoming => "job-incoming",
        JobPasswordWait => "job-password-wait",
        JobPrinting => "job-printing",
        JobQueued => "job-queued",
        JobSpooling => "job-spooling",
        JobStopped => "job-stopped",
        JobTransforming => "job-transforming",
        ProcessingToStopPoint => "processing-to-stop-point",
        QueuedInDevice => "queued-in-device",
        WarningsDetected => "warnings-detected",
    }
}

keyword_set! {
    /// `printer-state-reasons` keywords tracked per printer.
    PrinterReason / PrinterReasons {
        Other => "other",
        CoverOpen => "cover-open",
        Deleting => "deleting",
        HoldNewJobs => "hold-new-jobs",
        IdentifyPrinterRequested => "identify-printer-requested",
        InputTrayMissing => "input-tray-missing",
        MarkerSupplyEmpty => "marker-supply-empty",
        MarkerSupplyLow => "marker-supply-low",
        MarkerWasteAlmostFull => "marker-waste-almost-full",
        MarkerWasteFull => "marker-waste-full",
        MediaEmpty => "media-empty",
        MediaJam => "media-jam",
        MediaLow => "media-low",
        MediaNeeded => "media-needed",
        MovingToPaused => "moving-to-paused",
        Paused => "paused",
        Shutdown => "shutdown",
        SpoolAreaFull => "spool-area-full",
        TonerEmpty => "toner-empty",
        TonerLow => "toner-low",
    }
}

keyword_set! {
    /// `notify-events` keywords deliverable to subscriptions.
    Event / Events {
        DocumentCompleted => "document-completed",
        DocumentConfigChanged => "document-config-changed",
        DocumentCreated => "document-created",
        DocumentFetchable => "document-fetchable",
        DocumentStateChanged => "document-state-changed",
        DocumentStopped => "document-stopped",
        JobCompleted => "job-completed",
        JobConfigChanged => "job-config-changed",
        JobCreated => "job-created",
        JobFetchable => "job-fetchable",
        JobProgress => "job-progress",
        JobStateChanged => "job-state-changed",
        JobStopped => "job-stopped",
        PrinterConfigChanged => "printer-config-changed",
        PrinterFinishingsChanged => "printer-finishings-changed",
        PrinterMediaChanged => "printer-media-changed",
        PrinterQueueOrderChanged => "printer-queue-order-changed",
        PrinterRestarted => "printer-restarted",
        PrinterShutdown => "printer-shutdown",
        PrinterStateChanged => "printer-state-changed",
        PrinterStopped => "printer-stopped",
        ResourceCanceled => "resource-canceled",
        ResourceConfigChanged => "resource-config-changed",
        ResourceCreated => "resource-created",
        ResourceInstalled => "resource-installed",
        SystemConfigChanged => "system-config-changed",
        SystemStateChanged => "system-state-changed",
        SystemStopped => "system-stopped",
    }
}

keyword_set! {
    /// `identify-actions` keywords latched by Identify-Printer.
    IdentifyAction / IdentifyActions {
        Display => "display",
        Flash => "flash",
        Sound => "sound",
        Speak => "speak",
    }
}

impl Events {
    /// Default event mask for new subscriptions.
    pub fn job_completed_only() -> Events {
        Events::from(Event::JobCompleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_enum_values_match_rfc8011() {
        assert_eq!(JobState::Pending.as_i32(), 3);
        assert_eq!(JobState::Canceled.as_i32(), 7);
        assert_eq!(JobState::Completed.as_i32(), 9);
        assert_eq!(JobState::from_i32(6), Some(JobState::ProcessingStopped));
        assert_eq!(JobState::from_i32(2), None);
    }

    #[test]
    fn terminal_states_are_sticky_markers() {
        assert!(JobState::Canceled.is_terminal());
        assert!(JobState::Aborted.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(!JobState::ProcessingStopped.is_terminal());
    }

    #[test]
    fn reason_set_round_trips_keywords() {
        let mut reasons = JobReasons::NONE;
        reasons.insert(JobReason::JobIncoming);
        reasons.insert(JobReason::JobHoldUntilSpecified);

        assert!(reasons.contains(JobReason::JobIncoming));
        assert_eq!(
            reasons.keywords(),
            vec!["job-hold-until-specified", "job-incoming"]
        );

        reasons.remove(JobReason::JobIncoming);
        assert!(!reasons.contains(JobReason::JobIncoming));

        assert_eq!(JobReason::from_keyword("job-incoming"), Some(JobReason::JobIncoming));
        assert_eq!(JobReason::from_keyword("no-such-reason"), None);
    }

    #[test]
    fn empty_reason_set_reports_none() {
        assert_eq!(PrinterReasons::NONE.keywords(), vec!["none"]);
    }

    #[test]
    fn printer_state_ordering_is_idle_processing_stopped() {
        assert!(PrinterState::Idle < PrinterState::Processing);
        assert!(PrinterState::Processing < PrinterState::Stopped);
    }
}
