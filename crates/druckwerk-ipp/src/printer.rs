// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer objects: attribute bag, job table, bound output devices, and
// the state rollup across local and device-reported state.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ipp::attribute::IppAttribute;
use ipp::value::IppValue;
use tokio::sync::RwLock;
use uuid::Uuid;

use druckwerk_core::config::ServerConfig;
use druckwerk_core::types::{
    IdentifyActions, JobState, PrinterReasons, PrinterState, ServiceType,
};

use crate::device::DeviceRef;
use crate::job::JobRef;

pub type PrinterRef = Arc<RwLock<Printer>>;

/// A logical printer endpoint.
#[derive(Debug)]
pub struct Printer {
    pub id: i32,
    pub uuid: Uuid,
    pub name: String,
    /// Resource path, e.g. `/ipp/print/office`.
    pub path: String,
    pub service: ServiceType,
    pub state: PrinterState,
    pub state_reasons: PrinterReasons,
    pub is_accepting: bool,
    pub is_shutdown: bool,
    pub is_deleted: bool,
    /// Deletion requested while a job was processing; finalized by the
    /// periodic tick once the job stops.
    pub pending_delete: bool,
    /// Printer Description/Status attributes.
    pub attrs: HashMap<String, IppAttribute>,
    /// Union of device-reported attributes (proxy mode).
    pub dev_attrs: HashMap<String, IppAttribute>,
    /// All jobs by id, including history.
    pub jobs: BTreeMap<i32, JobRef>,
    /// Ids of not-yet-terminal jobs, kept sorted by (priority desc, id).
    pub active_jobs: Vec<(i32, i32)>,
    pub processing_job: Option<i32>,
    next_job_id: i32,
    pub devices: Vec<DeviceRef>,
    pub max_devices: usize,
    pub print_group: Option<String>,
    pub proxy_group: Option<String>,
    pub device_uri: Option<String>,
    /// Per-printer transform command override.
    pub command: Option<String>,
    pub allocated_resources: Vec<i32>,
    pub identify_actions: IdentifyActions,
    pub identify_message: Option<String>,
    pub created: DateTime<Utc>,
    pub state_change_time: DateTime<Utc>,
    pub config_change_time: DateTime<Utc>,
    /// Rolled-up device state, refreshed by `aggregate_devices`.
    pub dev_state_cache: Option<PrinterState>,
    pub dev_reasons_cache: PrinterReasons,
}

impl Printer {
    pub fn new(id: i32, name: &str, service: ServiceType, config: &ServerConfig) -> Self {
        let clean = crate::names::sanitize_printer_name(name);
        let path = format!("{}/{}", service.path_prefix(), clean);
        let now = Utc::now();

        let mut printer = Self {
            id,
            uuid: Uuid::new_v4(),
            name: clean,
            path,
            service,
            state: PrinterState::Idle,
            state_reasons: PrinterReasons::NONE,
            is_accepting: true,
            is_shutdown: false,
            is_deleted: false,
            pending_delete: false,
            attrs: HashMap::new(),
            dev_attrs: HashMap::new(),
            jobs: BTreeMap::new(),
            active_jobs: Vec::new(),
            processing_job: None,
            next_job_id: 1,
            devices: Vec::new(),
            max_devices: config.max_devices,
            print_group: None,
            proxy_group: None,
            device_uri: None,
            command: config.transform_command.clone(),
            allocated_resources: Vec::new(),
            identify_actions: IdentifyActions::NONE,
            identify_message: None,
            created: now,
            state_change_time: now,
            config_change_time: now,
            dev_state_cache: None,
            dev_reasons_cache: PrinterReasons::NONE,
        };

        for attr in default_attributes(&printer.name, config) {
            printer.attrs.insert(attr.name().to_string(), attr);
        }
        printer
    }

    pub fn uri(&self, host: &str, port: u16) -> String {
        format!("ipp://{host}:{port}{}", self.path)
    }

    /// Whether jobs on this printer are fetched by output devices rather
    /// than transformed locally.
    pub fn is_proxied(&self) -> bool {
        self.proxy_group.is_some() && self.max_devices > 0
    }

    pub fn next_job_id(&mut self) -> i32 {
        let id = self.next_job_id;
        self.next_job_id += 1;
        id
    }

    pub fn add_job(&mut self, job: JobRef, id: i32, priority: i32) {
        self.jobs.insert(id, job);
        self.active_jobs.push((priority, id));
        // Highest priority first; ids break ties in submission order.
        self.active_jobs.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    }

    pub fn job(&self, id: i32) -> Option<&JobRef> {
        self.jobs.get(&id)
    }

    pub fn remove_active(&mut self, id: i32) {
        self.active_jobs.retain(|(_, j)| *j != id);
        if self.processing_job == Some(id) {
            self.processing_job = None;
        }
    }

    pub fn queued_job_count(&self) -> usize {
        self.active_jobs.len()
    }

    /// Find a device by UUID.  The caller holds at least a read lock on
    /// the printer; the device's own lock is separate.
    pub async fn find_device(&self, uuid: Uuid) -> Option<DeviceRef> {
        for device in &self.devices {
            if device.read().await.uuid == uuid {
                return Some(device.clone());
            }
        }
        None
    }

    /// Recompute the union of device attributes and the rolled-up state.
    /// Locking order: printer write lock is held, device read locks nest
    /// inside.
    pub async fn aggregate_devices(&mut self) {
        let mut merged: HashMap<String, IppAttribute> = HashMap::new();
        let mut state: Option<PrinterState> = None;
        let mut reasons = PrinterReasons::NONE;

        for device in &self.devices {
            let device = device.read().await;
            for (name, attr) in &device.attrs {
                merged.entry(name.clone()).or_insert_with(|| attr.clone());
            }
            if let Some(dev_state) = device.state() {
                state = Some(match state {
                    Some(prev) => prev.max(dev_state),
                    None => dev_state,
                });
            }
            reasons = reasons.union(device.state_reasons());
        }

        merged.remove("printer-state");
        merged.remove("printer-state-reasons");
        self.dev_attrs = merged;
        self.dev_reasons_cache = reasons;
        self.dev_state_cache = state;
    }

    /// The state reported to clients: the worse of the local state and
    /// the aggregated device state (`idle < processing < stopped`).
    pub fn reported_state(&self) -> PrinterState {
        match self.dev_state_cache {
            Some(dev) => self.state.max(dev),
            None => self.state,
        }
    }

    pub fn reported_reasons(&self) -> PrinterReasons {
        self.state_reasons.union(self.dev_reasons_cache)
    }

    pub fn set_state(&mut self, state: PrinterState) {
        if self.state != state {
            self.state = state;
            self.state_change_time = Utc::now();
        }
    }

    pub fn touch_config(&mut self) {
        self.config_change_time = Utc::now();
    }

    /// Look up a supported-values attribute, preferring device-reported
    /// capabilities over the local bag.
    pub fn capability(&self, name: &str) -> Option<&IppAttribute> {
        self.dev_attrs.get(name).or_else(|| self.attrs.get(name))
    }

    /// `printer-state-message` synthesized from state and reasons.
    pub fn state_message(&self) -> String {
        let state = match self.reported_state() {
            PrinterState::Idle => "idle",
            PrinterState::Processing => "processing",
            PrinterState::Stopped => "stopped",
        };
        let reasons = self.reported_reasons();
        if reasons.is_empty() {
            format!("Printer is {state}.")
        } else {
            format!("Printer is {state}; {}.", reasons.keywords().join(", "))
        }
    }
}

impl Printer {
    /// First active job in priority order that is pending and has its
    /// document spooled (Create-Job leaves jobs pending but empty until
    /// Send-Document arrives).
    pub async fn next_pending_job(&self) -> Option<JobRef> {
        for (_, id) in &self.active_jobs {
            if let Some(job) = self.jobs.get(id) {
                let j = job.read().await;
                if j.state == JobState::Pending && j.spool_file.is_some() {
                    return Some(job.clone());
                }
            }
        }
        None
    }
}

/// Default Printer Description attributes for a freshly created printer.
fn default_attributes(name: &str, config: &ServerConfig) -> Vec<IppAttribute> {
    let keywords = |values: &[&str]| {
        IppValue::Array(values.iter().map(|v| IppValue::Keyword(v.to_string())).collect())
    };
    let mimes = |values: &[&str]| {
        IppValue::Array(
            values
                .iter()
                .map(|v| IppValue::MimeMediaType(v.to_string()))
                .collect(),
        )
    };

    vec![
        IppAttribute::new("charset-configured", IppValue::Charset("utf-8".into())),
        IppAttribute::new(
            "charset-supported",
            IppValue::Array(vec![
                IppValue::Charset("us-ascii".into()),
                IppValue::Charset("utf-8".into()),
            ]),
        ),
        IppAttribute::new("color-supported", IppValue::Boolean(true)),
        IppAttribute::new(
            "compression-supported",
            keywords(&["none", "gzip"]),
        ),
        IppAttribute::new("copies-default", IppValue::Integer(1)),
        IppAttribute::new(
            "copies-supported",
            IppValue::RangeOfInteger { min: 1, max: 99 },
        ),
        IppAttribute::new(
            "document-format-default",
            IppValue::MimeMediaType(config.default_format.clone()),
        ),
        IppAttribute::new(
            "document-format-supported",
            mimes(&[
                "application/octet-stream",
                "application/pdf",
                "application/postscript",
                "image/jpeg",
                "image/png",
                "image/pwg-raster",
                "image/urf",
            ]),
        ),
        IppAttribute::new(
            "generated-natural-language-supported",
            IppValue::NaturalLanguage("en".into()),
        ),
        IppAttribute::new(
            "identify-actions-default",
            IppValue::Keyword("sound".into()),
        ),
        IppAttribute::new(
            "identify-actions-supported",
            keywords(&["display", "sound"]),
        ),
        IppAttribute::new(
            "ipp-features-supported",
            keywords(&["ipp-everywhere", "infrastructure-printer", "system-service"]),
        ),
        IppAttribute::new(
            "ipp-versions-supported",
            keywords(&["1.1", "2.0", "2.1", "2.2"]),
        ),
        IppAttribute::new(
            "job-creation-attributes-supported",
            keywords(&[
                "copies",
                "document-format",
                "document-name",
                "finishings",
                "job-hold-until",
                "job-hold-until-time",
                "job-name",
                "job-priority",
                "media",
                "media-col",
                "multiple-document-handling",
                "number-up",
                "orientation-requested",
                "output-bin",
                "page-ranges",
                "print-color-mode",
                "print-quality",
                "printer-resolution",
                "sides",
            ]),
        ),
        IppAttribute::new("job-hold-until-default", IppValue::Keyword("no-hold".into())),
        IppAttribute::new(
            "job-hold-until-supported",
            keywords(&["no-hold", "indefinite"]),
        ),
        IppAttribute::new("job-ids-supported", IppValue::Boolean(true)),
        IppAttribute::new("job-priority-default", IppValue::Integer(50)),
        IppAttribute::new("job-priority-supported", IppValue::Integer(100)),
        IppAttribute::new(
            "job-settable-attributes-supported",
            keywords(&[
                "copies",
                "finishings",
                "job-hold-until",
                "job-name",
                "job-priority",
                "media",
                "media-col",
                "multiple-document-handling",
                "number-up",
                "orientation-requested",
                "output-bin",
                "page-ranges",
                "print-color-mode",
                "print-quality",
                "printer-resolution",
                "sides",
            ]),
        ),
        IppAttribute::new("media-default", IppValue::Keyword("iso_a4_210x297mm".into())),
        IppAttribute::new(
            "media-ready",
            keywords(&["iso_a4_210x297mm", "na_letter_8.5x11in"]),
        ),
        IppAttribute::new(
            "media-supported",
            keywords(&[
                "iso_a4_210x297mm",
                "iso_a5_148x210mm",
                "iso_dl_110x220mm",
                "na_legal_8.5x14in",
                "na_letter_8.5x11in",
                "na_number-10_4.125x9.5in",
            ]),
        ),
        IppAttribute::new("multiple-document-jobs-supported", IppValue::Boolean(false)),
        IppAttribute::new(
            "multiple-document-handling-supported",
            keywords(&["separate-documents-uncollated-copies", "separate-documents-collated-copies"]),
        ),
        IppAttribute::new("natural-language-configured", IppValue::NaturalLanguage("en".into())),
        IppAttribute::new(
            "notify-events-default",
            keywords(&["job-completed", "job-state-changed"]),
        ),
        IppAttribute::new(
            "notify-events-supported",
            keywords(&[
                "job-completed",
                "job-config-changed",
                "job-created",
                "job-fetchable",
                "job-progress",
                "job-state-changed",
                "printer-config-changed",
                "printer-finishings-changed",
                "printer-media-changed",
                "printer-state-changed",
            ]),
        ),
        IppAttribute::new("notify-pull-method-supported", IppValue::Keyword("ippget".into())),
        IppAttribute::new(
            "number-up-supported",
            IppValue::RangeOfInteger { min: 1, max: 9 },
        ),
        IppAttribute::new(
            "orientation-requested-supported",
            IppValue::Array(vec![
                IppValue::Enum(3),
                IppValue::Enum(4),
                IppValue::Enum(5),
                IppValue::Enum(6),
            ]),
        ),
        IppAttribute::new(
            "pdl-override-supported",
            IppValue::Keyword("attempted".into()),
        ),
        IppAttribute::new(
            "print-color-mode-supported",
            keywords(&["auto", "color", "monochrome"]),
        ),
        IppAttribute::new(
            "print-quality-supported",
            IppValue::Array(vec![
                IppValue::Enum(3),
                IppValue::Enum(4),
                IppValue::Enum(5),
            ]),
        ),
        IppAttribute::new(
            "printer-get-attributes-supported",
            IppValue::Keyword("document-format".into()),
        ),
        IppAttribute::new("printer-info", IppValue::TextWithoutLanguage(name.to_string())),
        IppAttribute::new(
            "printer-make-and-model",
            IppValue::TextWithoutLanguage("Druckwerk Virtual Printer".into()),
        ),
        IppAttribute::new(
            "printer-name",
            IppValue::NameWithoutLanguage(name.to_string()),
        ),
        IppAttribute::new(
            "printer-resolution-default",
            IppValue::Resolution {
                cross_feed: 600,
                feed: 600,
                units: 3,
            },
        ),
        IppAttribute::new(
            "printer-resolution-supported",
            IppValue::Resolution {
                cross_feed: 600,
                feed: 600,
                units: 3,
            },
        ),
        IppAttribute::new(
            "printer-settable-attributes-supported",
            keywords(&[
                "printer-geo-location",
                "printer-info",
                "printer-location",
                "printer-organization",
                "printer-organizational-unit",
            ]),
        ),
        IppAttribute::new("sides-default", IppValue::Keyword("one-sided".into())),
        IppAttribute::new(
            "sides-supported",
            keywords(&["one-sided", "two-sided-long-edge", "two-sided-short-edge"]),
        ),
        IppAttribute::new(
            "uri-authentication-supported",
            IppValue::Keyword("none".into()),
        ),
        IppAttribute::new("uri-security-supported", IppValue::Keyword("none".into())),
        IppAttribute::new(
            "which-jobs-supported",
            keywords(&["completed", "not-completed", "all"]),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn printer() -> Printer {
        Printer::new(1, "Test Printer", ServiceType::Print, &ServerConfig::default())
    }

    #[test]
    fn path_uses_sanitized_name() {
        let p = printer();
        assert_eq!(p.path, "/ipp/print/Test_Printer");
        assert_eq!(p.uri("localhost", 631), "ipp://localhost:631/ipp/print/Test_Printer");
    }

    #[test]
    fn default_bag_covers_everywhere_basics() {
        let p = printer();
        for name in [
            "charset-supported",
            "document-format-supported",
            "job-creation-attributes-supported",
            "media-supported",
            "printer-name",
        ] {
            assert!(p.attrs.contains_key(name), "missing {name}");
        }
    }

    #[test]
    fn active_jobs_order_by_priority_then_id() {
        let mut p = printer();
        let mk = |id| {
            Arc::new(RwLock::new(crate::job::Job::new(
                1,
                "/ipp/print/Test_Printer",
                id,
                "alice",
                "j",
            )))
        };
        p.add_job(mk(1), 1, 50);
        p.add_job(mk(2), 2, 80);
        p.add_job(mk(3), 3, 50);

        let order: Vec<i32> = p.active_jobs.iter().map(|(_, id)| *id).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn state_rollup_takes_worse_of_local_and_devices() {
        let mut p = printer();
        assert_eq!(p.reported_state(), PrinterState::Idle);

        p.dev_state_cache = Some(PrinterState::Processing);
        assert_eq!(p.reported_state(), PrinterState::Processing);

        p.set_state(PrinterState::Stopped);
        assert_eq!(p.reported_state(), PrinterState::Stopped);
    }

    #[test]
    fn state_change_bumps_timestamp_only_on_change() {
        let mut p = printer();
        let before = p.state_change_time;
        p.set_state(PrinterState::Idle);
        assert_eq!(p.state_change_time, before);
        p.set_state(PrinterState::Stopped);
        assert!(p.state_change_time >= before);
    }
}
