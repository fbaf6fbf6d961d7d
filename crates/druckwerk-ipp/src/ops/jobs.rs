// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job operations: submission, document ingest, cancel/hold/release, and
// the job/document attribute reads and writes.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use ipp::attribute::IppAttribute;
use ipp::model::StatusCode;
use ipp::value::IppValue;
use tracing::info;

use druckwerk_core::types::{Event, JobReason, JobState};

use crate::attrs::{JOB_VALUES, check_values, date_time_value};
use crate::client::{Client, find_job, requested_attributes};
use crate::events::{self, keyword_set};
use crate::ingest::{self, DocFetchError};
use crate::job::{Job, JobEvent, JobRef};
use crate::msg::{self, AttrGroup, GroupTag, ServerOp};
use crate::printer::PrinterRef;
use crate::scheduler;
use crate::system::SystemContext;
use crate::transform;

use super::{can_see_private, printer_target, require_admin, require_print_group, require_user};

/// Attributes redacted from viewers without ownership or admin rights.
pub(super) const JOB_PRIVACY_ATTRS: &[&str] = &[
    "document-name",
    "job-name",
    "job-originating-host-name",
    "job-originating-user-name",
];

/// The job-hold-until[-time] request, if any: `Some(deadline)` holds the
/// job; the inner value is the release time (`MAX_UTC` = indefinite).
fn requested_hold(client: &Client) -> Option<DateTime<Utc>> {
    if let Some(attr) = client.request.find("job-hold-until") {
        let keyword = msg::attr_string(attr)?;
        if keyword == "no-hold" {
            return None;
        }
        return Some(DateTime::<Utc>::MAX_UTC);
    }

    if let Some(attr) = client.request.find("job-hold-until-time") {
        if let IppValue::DateTime {
            year,
            month,
            day,
            hour,
            minutes,
            seconds,
            ..
        } = msg::first_value(attr)
        {
            return Utc
                .with_ymd_and_hms(
                    i32::from(*year),
                    u32::from(*month),
                    u32::from(*day),
                    u32::from(*hour),
                    u32::from(*minutes),
                    u32::from(*seconds),
                )
                .single();
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Validators
// ---------------------------------------------------------------------------

/// Validate document creation attributes (compression, document-format,
/// document-name).  Offending attributes are echoed into the
/// unsupported group; checks continue past the first failure.
pub(super) async fn valid_doc_attributes(ctx: &Arc<SystemContext>, client: &mut Client) -> bool {
    let _ = ctx;
    let Some(printer) = printer_target(client) else {
        return false;
    };
    let printer = printer.read().await;
    let mut valid = true;

    if let Some(attr) = client.request.find_in(GroupTag::Operation, "compression").cloned() {
        let supported = printer.capability("compression-supported");
        let value = msg::attr_string(&attr);
        let ok = msg::value_count(&attr) == 1
            && matches!(msg::first_value(&attr), IppValue::Keyword(_))
            && value.is_some_and(|v| {
                supported.is_none_or(|s| msg::contains_string(s, v)) || v == "none"
            });
        if !ok {
            drop(printer);
            client.respond_unsupported(&attr);
            return false;
        }
    }

    if let Some(attr) = client.request.find_in(GroupTag::Operation, "document-format").cloned() {
        let supported = printer.capability("document-format-supported");
        let ok = msg::value_count(&attr) == 1
            && matches!(msg::first_value(&attr), IppValue::MimeMediaType(_))
            && msg::attr_string(&attr)
                .is_some_and(|v| supported.is_none_or(|s| msg::contains_string(s, v)));
        if !ok {
            drop(printer);
            client.respond(
                StatusCode::ClientErrorDocumentFormatNotSupported,
                "Unsupported document format.",
            );
            client.add(GroupTag::Unsupported, attr);
            return false;
        }
    }

    if let Some(attr) = client.request.find("document-name").cloned() {
        if !matches!(
            msg::first_value(&attr),
            IppValue::NameWithoutLanguage(_) | IppValue::NameWithLanguage { .. }
        ) || msg::value_count(&attr) != 1
        {
            drop(printer);
            client.respond_unsupported(&attr);
            valid = false;
        }
    }

    valid
}

/// Validate job creation attributes against the value table and the
/// printer's supported values.
pub(super) async fn valid_job_attributes(ctx: &Arc<SystemContext>, client: &mut Client) -> bool {
    let mut valid = valid_doc_attributes(ctx, client).await;

    let op = client.op.unwrap_or(ServerOp::PrintJob);
    let Some(printer) = printer_target(client) else {
        return false;
    };
    let printer = printer.read().await;
    let supported = printer.capability("job-creation-attributes-supported").cloned();

    if let Some(offense) = check_values(
        &client.request,
        op,
        GroupTag::Job,
        supported.as_ref(),
        JOB_VALUES,
    ) {
        drop(printer);
        client.apply_offense(&offense);
        return false;
    }

    // Supported-value checks accumulate so the client sees every bad
    // attribute at once.
    let mut offenders: Vec<IppAttribute> = Vec::new();

    if let Some(attr) = client.request.find("copies") {
        if let Some(copies) = msg::attr_int(attr) {
            let supported = printer.capability("copies-supported");
            if supported.is_some_and(|s| !msg::contains_integer(s, copies)) {
                offenders.push(attr.clone());
            }
        }
    }

    if let Some(attr) = client.request.find("media") {
        if let Some(media) = msg::attr_string(attr) {
            let supported = printer.capability("media-supported");
            if supported.is_some_and(|s| !msg::contains_string(s, media)) {
                offenders.push(attr.clone());
            }
        }
    }

    if let Some(attr) = client.request.find("multiple-document-handling") {
        if let Some(value) = msg::attr_string(attr) {
            let supported = printer.capability("multiple-document-handling-supported");
            if supported.is_some_and(|s| !msg::contains_string(s, value)) {
                offenders.push(attr.clone());
            }
        }
    }

    if let Some(attr) = client.request.find("orientation-requested") {
        if let Some(value) = msg::attr_int(attr) {
            let supported = printer.capability("orientation-requested-supported");
            if supported.is_some_and(|s| !msg::contains_integer(s, value)) {
                offenders.push(attr.clone());
            }
        }
    }

    if let Some(attr) = client.request.find("print-quality") {
        if msg::attr_int(attr).is_none_or(|q| !(3..=5).contains(&q)) {
            offenders.push(attr.clone());
        }
    }

    if let Some(attr) = client.request.find("printer-resolution") {
        let supported = printer.capability("printer-resolution-supported");
        let matches = match (msg::first_value(attr), supported) {
            (IppValue::Resolution { cross_feed, feed, units }, Some(s)) => {
                msg::as_values(s.value()).any(|v| {
                    matches!(v, IppValue::Resolution { cross_feed: sx, feed: sy, units: su }
                        if sx == cross_feed && sy == feed && su == units)
                })
            }
            (_, None) => false,
            _ => false,
        };
        if !matches {
            offenders.push(attr.clone());
        }
    }

    if let Some(attr) = client.request.find("sides") {
        if let Some(sides) = msg::attr_string(attr) {
            let supported = printer.capability("sides-supported");
            if sides != "one-sided" && supported.is_some_and(|s| !msg::contains_string(s, sides)) {
                offenders.push(attr.clone());
            }
        }
    }

    drop(printer);
    for attr in offenders {
        client.respond_unsupported(&attr);
        valid = false;
    }

    valid
}

// ---------------------------------------------------------------------------
// Job creation and ingest plumbing
// ---------------------------------------------------------------------------

/// Create the Job object and register it with the printer.  `None` means
/// the queue is full.
async fn create_job_object(
    ctx: &Arc<SystemContext>,
    client: &mut Client,
    printer: &PrinterRef,
) -> Option<JobRef> {
    let username = client.requesting_user();

    let job = {
        let mut p = printer.write().await;
        if p.queued_job_count() >= ctx.config.max_jobs {
            return None;
        }

        let id = p.next_job_id();
        let name = client
            .request
            .find("job-name")
            .and_then(msg::attr_string)
            .unwrap_or("untitled")
            .to_string();
        let mut job = Job::new(p.id, &p.path, id, &username, &name);

        job.priority = client
            .request
            .find("job-priority")
            .and_then(msg::attr_int)
            .unwrap_or(50);

        job.format_supplied = client
            .request
            .find_in(GroupTag::Operation, "document-format")
            .and_then(msg::attr_string)
            .map(str::to_string);
        job.format = job
            .format_supplied
            .clone()
            .or_else(|| p.attrs.get("document-format-default").and_then(msg::attr_string).map(str::to_string))
            .unwrap_or_else(|| ctx.config.default_format.clone());

        // Job Template attributes from the job group, plus the flagged
        // operation-group subset.
        for group in client.request.groups_of(GroupTag::Job) {
            for attr in &group.attrs {
                job.attrs.insert(attr.name().to_string(), attr.clone());
            }
        }
        for name in ["job-name", "job-hold-until", "job-hold-until-time", "document-name"] {
            if !job.attrs.contains_key(name) {
                if let Some(attr) = client.request.find_in(GroupTag::Operation, name) {
                    job.attrs.insert(name.to_string(), attr.clone());
                }
            }
        }

        // Template-job resources supply defaults for attributes the
        // request left out.
        let allocated = p.allocated_resources.clone();
        drop(p);
        let job = apply_job_templates(ctx, allocated, job).await;

        let mut p = printer.write().await;
        let id = job.id;
        let priority = job.priority;
        let job = Arc::new(tokio::sync::RwLock::new(job));
        p.add_job(job.clone(), id, priority);
        job
    };

    let hold = requested_hold(client);
    let hold_new_jobs = printer
        .read()
        .await
        .state_reasons
        .contains(druckwerk_core::types::PrinterReason::HoldNewJobs);
    if hold.is_some() || hold_new_jobs {
        let _ = job.write().await.hold(hold);
    }

    events::add_event(ctx, Some(printer), Some(&job), Event::JobCreated, "Job created.").await;
    client.job = Some(job.clone());
    Some(job)
}

async fn apply_job_templates(ctx: &Arc<SystemContext>, allocated: Vec<i32>, mut job: Job) -> Job {
    for resource_id in allocated {
        let Some(resource) = ctx.resources.get(resource_id).await else {
            continue;
        };
        let resource = resource.read().await;
        if resource.rtype != druckwerk_core::types::ResourceType::TemplateJob {
            continue;
        }
        for (name, attr) in &resource.attrs {
            if JOB_VALUES.iter().any(|check| check.name == name.as_str()) {
                job.attrs.entry(name.clone()).or_insert_with(|| attr.clone());
            }
        }
    }
    job
}

/// Spool the request payload into the job and run the data-complete
/// transition.  Responds on error.
async fn attach_payload(
    ctx: &Arc<SystemContext>,
    client: &mut Client,
    printer: &PrinterRef,
    job: &JobRef,
) -> bool {
    let Some(payload) = client.payload.take() else {
        client.respond(StatusCode::ClientErrorBadRequest, "No file in request.");
        abort_job(ctx, printer, job).await;
        return false;
    };

    let gzip = client
        .request
        .find_in(GroupTag::Operation, "compression")
        .and_then(msg::attr_string)
        == Some("gzip");

    let path = {
        let p = printer.read().await;
        let j = job.read().await;
        ingest::spool_filename(&ctx.config, &p.name, j.id, &j.format)
    };

    {
        let mut j = job.write().await;
        j.incoming = true;
        j.state_reasons.insert(JobReason::JobIncoming);
    }

    match ingest::spool_payload(&path, payload, gzip).await {
        Ok(result) => {
            finish_ingest(ctx, printer, job, path, result.detected).await;
            true
        }
        Err(err) => {
            client.respond(
                StatusCode::ServerErrorInternalError,
                format!("Unable to write print file: {err}"),
            );
            abort_job(ctx, printer, job).await;
            false
        }
    }
}

/// Fetch a document-uri into the job's spool file.  Responds on error.
async fn attach_uri_document(
    ctx: &Arc<SystemContext>,
    client: &mut Client,
    printer: &PrinterRef,
    job: &JobRef,
) -> bool {
    let Some(uri) = client
        .request
        .find_in(GroupTag::Operation, "document-uri")
        .and_then(msg::attr_string)
        .map(str::to_string)
    else {
        client.respond(StatusCode::ClientErrorBadRequest, "Missing document-uri.");
        abort_job(ctx, printer, job).await;
        return false;
    };

    let data = match ingest::fetch_document_uri(&ctx.config, &uri).await {
        Ok(data) => data,
        Err(DocFetchError::Scheme(scheme)) => {
            client.respond(
                StatusCode::ClientErrorUriSchemeNotSupported,
                format!("URI scheme \"{scheme}\" not supported."),
            );
            abort_job(ctx, printer, job).await;
            return false;
        }
        Err(err) => {
            client.respond(
                StatusCode::ClientErrorDocumentAccessError,
                format!("Unable to access URI: {err}"),
            );
            abort_job(ctx, printer, job).await;
            return false;
        }
    };

    let path = {
        let p = printer.read().await;
        let j = job.read().await;
        ingest::spool_filename(&ctx.config, &p.name, j.id, &j.format)
    };

    match ingest::spool_bytes(&path, &data).await {
        Ok(result) => {
            finish_ingest(ctx, printer, job, path, result.detected).await;
            true
        }
        Err(err) => {
            client.respond(
                StatusCode::ServerErrorInternalError,
                format!("Unable to create print file: {err}"),
            );
            abort_job(ctx, printer, job).await;
            false
        }
    }
}

/// Record the spooled file, resolve the effective format, and move the
/// job out of the incoming state.
async fn finish_ingest(
    ctx: &Arc<SystemContext>,
    printer: &PrinterRef,
    job: &JobRef,
    path: std::path::PathBuf,
    detected: Option<&'static str>,
) {
    let proxied = printer.read().await.is_proxied();

    let fetchable = {
        let mut j = job.write().await;
        j.spool_file = Some(path);
        j.incoming = false;
        j.state_reasons.remove(JobReason::JobIncoming);

        j.format_detected = detected.map(str::to_string);
        let supplied_usable = j
            .format_supplied
            .as_deref()
            .is_some_and(|f| f != "application/octet-stream");
        if !supplied_usable {
            if let Some(detected) = detected {
                j.format = detected.to_string();
            }
        }

        let _ = j.apply(JobEvent::DataComplete);

        if proxied && !j.state.is_terminal() {
            j.state_reasons.insert(JobReason::JobFetchable);
            true
        } else {
            false
        }
    };

    if fetchable {
        events::add_event(ctx, Some(printer), Some(job), Event::JobFetchable, "Job fetchable.")
            .await;
    }

    scheduler::check_jobs(ctx, printer).await;
}

async fn abort_job(ctx: &Arc<SystemContext>, printer: &PrinterRef, job: &JobRef) {
    {
        let mut j = job.write().await;
        j.incoming = false;
        j.state_reasons.remove(JobReason::JobIncoming);
        if !j.state.is_terminal() {
            let _ = j.apply(JobEvent::Abort);
            if j.state == JobState::Processing {
                j.finish_cancel();
            }
        }
    }
    scheduler::finish_job(ctx, printer, job).await;
}

/// Add the short job summary (job-id, state, reasons, uri) to the
/// response.
async fn respond_job_summary(ctx: &Arc<SystemContext>, client: &mut Client, job: &JobRef) {
    let j = job.read().await;
    let mut group = AttrGroup::new(GroupTag::Job);
    group.add(IppAttribute::new("job-id", IppValue::Integer(j.id)));
    group.add(IppAttribute::new(
        "job-uri",
        IppValue::Uri(j.uri(&ctx.config.host, ctx.config.port)),
    ));
    group.add(IppAttribute::new(
        "job-state",
        IppValue::Enum(j.effective_state().as_i32()),
    ));
    group.add(IppAttribute::new(
        "job-state-reasons",
        keyword_set(j.state_reasons.keywords()),
    ));
    client.add_group(group);
}

/// Copy job status and description attributes into a response group.
pub(super) async fn copy_job_attributes(
    ctx: &Arc<SystemContext>,
    job: &JobRef,
    requested: Option<&HashSet<String>>,
    redact: bool,
) -> AttrGroup {
    let j = job.read().await;
    let mut group = AttrGroup::new(GroupTag::Job);

    let private: Option<HashSet<&str>> = if redact {
        Some(JOB_PRIVACY_ATTRS.iter().copied().collect())
    } else {
        None
    };

    let mut push = |name: &str, value: IppValue| {
        if crate::client::check_attribute(name, requested, private.as_ref()) {
            group.add(IppAttribute::new(name, value));
        }
    };

    push("job-id", IppValue::Integer(j.id));
    push("job-uri", IppValue::Uri(j.uri(&ctx.config.host, ctx.config.port)));
    push(
        "job-uuid",
        IppValue::Uri(format!("urn:uuid:{}", j.uuid)),
    );
    push(
        "job-printer-uri",
        IppValue::Uri(format!(
            "ipp://{}:{}{}",
            ctx.config.host, ctx.config.port, j.printer_path
        )),
    );
    push("job-name", IppValue::NameWithoutLanguage(j.name.clone()));
    push(
        "job-originating-user-name",
        IppValue::NameWithoutLanguage(j.username.clone()),
    );
    push("job-state", IppValue::Enum(j.effective_state().as_i32()));
    push(
        "job-state-reasons",
        keyword_set(j.state_reasons.union(j.dev_state_reasons).keywords()),
    );
    if let Some(message) = &j.dev_state_message {
        push("job-state-message", IppValue::TextWithoutLanguage(message.clone()));
    }
    if let Some(impressions) = j.impressions {
        push("job-impressions", IppValue::Integer(impressions));
    }
    push(
        "job-impressions-completed",
        IppValue::Integer(j.impressions_completed),
    );
    push("job-priority", IppValue::Integer(j.priority));
    push("document-format", IppValue::MimeMediaType(j.format.clone()));
    if let Some(supplied) = &j.format_supplied {
        push(
            "document-format-supplied",
            IppValue::MimeMediaType(supplied.clone()),
        );
    }
    if let Some(detected) = &j.format_detected {
        push(
            "document-format-detected",
            IppValue::MimeMediaType(detected.clone()),
        );
    }

    let since_start = |t: DateTime<Utc>| (t - ctx.started_at).num_seconds() as i32;
    push("time-at-creation", IppValue::Integer(since_start(j.created)));
    push(
        "time-at-processing",
        j.processing_at.map_or(IppValue::NoValue, |t| IppValue::Integer(since_start(t))),
    );
    push(
        "time-at-completed",
        j.completed_at.map_or(IppValue::NoValue, |t| IppValue::Integer(since_start(t))),
    );
    push("date-time-at-creation", date_time_value(j.created));
    push(
        "date-time-at-processing",
        j.processing_at.map_or(IppValue::NoValue, date_time_value),
    );
    push(
        "date-time-at-completed",
        j.completed_at.map_or(IppValue::NoValue, date_time_value),
    );
    push("job-printer-up-time", IppValue::Integer(ctx.up_time()));

    for (name, attr) in &j.attrs {
        if group.get(name).is_none()
            && crate::client::check_attribute(name, requested, private.as_ref())
        {
            group.add(attr.clone());
        }
    }

    group
}

// ---------------------------------------------------------------------------
// Submission operations
// ---------------------------------------------------------------------------

pub(super) async fn print_job(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_print_group(ctx, client).await {
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };
    if !printer.read().await.is_accepting {
        client.respond(StatusCode::ServerErrorNotAcceptingJobs, "Not accepting jobs.");
        return;
    }
    if !valid_job_attributes(ctx, client).await {
        return;
    }
    if client.payload.is_none() {
        client.respond(StatusCode::ClientErrorBadRequest, "No file in request.");
        return;
    }

    let Some(job) = create_job_object(ctx, client, &printer).await else {
        client.respond(StatusCode::ServerErrorInternalError, "Too many jobs are queued.");
        return;
    };

    if !attach_payload(ctx, client, &printer, &job).await {
        return;
    }

    respond_job_summary(ctx, client, &job).await;
    subscription_groups_followup(ctx, client).await;
}

pub(super) async fn print_uri(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_print_group(ctx, client).await {
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };
    if !printer.read().await.is_accepting {
        client.respond(StatusCode::ServerErrorNotAcceptingJobs, "Not accepting jobs.");
        return;
    }
    if !valid_job_attributes(ctx, client).await {
        return;
    }

    let Some(job) = create_job_object(ctx, client, &printer).await else {
        client.respond(StatusCode::ServerErrorInternalError, "Too many jobs are queued.");
        return;
    };

    if !attach_uri_document(ctx, client, &printer, &job).await {
        return;
    }

    respond_job_summary(ctx, client, &job).await;
    subscription_groups_followup(ctx, client).await;
}

pub(super) async fn validate_job(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_print_group(ctx, client).await {
        return;
    }
    let _ = valid_job_attributes(ctx, client).await;
}

pub(super) async fn validate_document(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_print_group(ctx, client).await {
        return;
    }
    let _ = valid_doc_attributes(ctx, client).await;
}

pub(super) async fn create_job(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_print_group(ctx, client).await {
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };
    if !printer.read().await.is_accepting {
        client.respond(StatusCode::ServerErrorNotAcceptingJobs, "Not accepting jobs.");
        return;
    }
    if !valid_job_attributes(ctx, client).await {
        return;
    }

    let Some(job) = create_job_object(ctx, client, &printer).await else {
        client.respond(StatusCode::ServerErrorInternalError, "Too many jobs are queued.");
        return;
    };

    respond_job_summary(ctx, client, &job).await;
    subscription_groups_followup(ctx, client).await;
}

pub(super) async fn send_document(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let Some(job) = find_job(client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Job does not exist.");
        return;
    };

    let owner = job.read().await.username.clone();
    if !can_see_private(ctx, client, &owner) {
        client.respond(
            StatusCode::ClientErrorNotAuthorized,
            "Not authorized to access this job.",
        );
        return;
    }

    {
        let j = job.read().await;
        if j.state > JobState::PendingHeld {
            drop(j);
            client.respond(StatusCode::ClientErrorNotPossible, "Job is not in a pending state.");
            return;
        }
        if j.spool_file.is_some() || j.incoming {
            drop(j);
            client.respond(
                StatusCode::ServerErrorMultipleDocumentJobsNotSupported,
                "Multiple document jobs are not supported.",
            );
            return;
        }
    }

    match client.request.find("last-document").cloned() {
        None => {
            client.respond(
                StatusCode::ClientErrorBadRequest,
                "Missing required last-document attribute.",
            );
            return;
        }
        Some(attr) => {
            if msg::attr_bool(&attr) != Some(true) || msg::value_count(&attr) != 1 {
                client.respond_unsupported(&attr);
                return;
            }
        }
    }

    if !valid_doc_attributes(ctx, client).await {
        return;
    }

    // Record document attributes and the effective format.
    {
        let mut j = job.write().await;
        for group in client.request.groups_of(GroupTag::Job) {
            for attr in &group.attrs {
                j.doc_attrs.insert(attr.name().to_string(), attr.clone());
            }
        }
        if let Some(attr) = client.request.find("document-name") {
            j.doc_attrs.insert("document-name".to_string(), attr.clone());
        }
        if let Some(format) = client
            .request
            .find_in(GroupTag::Operation, "document-format")
            .and_then(msg::attr_string)
        {
            j.format_supplied = Some(format.to_string());
            j.format = format.to_string();
        }
    }

    let Some(printer) = printer_target(client) else {
        return;
    };
    if attach_payload(ctx, client, &printer, &job).await {
        respond_job_summary(ctx, client, &job).await;
    }
}

pub(super) async fn send_uri(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let Some(job) = find_job(client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Job does not exist.");
        return;
    };

    {
        let j = job.read().await;
        if j.state > JobState::PendingHeld {
            drop(j);
            client.respond(StatusCode::ClientErrorNotPossible, "Job is not in a pending state.");
            return;
        }
        if j.spool_file.is_some() || j.incoming {
            drop(j);
            client.respond(
                StatusCode::ServerErrorMultipleDocumentJobsNotSupported,
                "Multiple document jobs are not supported.",
            );
            return;
        }
    }

    if !valid_doc_attributes(ctx, client).await {
        return;
    }

    let Some(printer) = printer_target(client) else {
        return;
    };
    if attach_uri_document(ctx, client, &printer, &job).await {
        respond_job_summary(ctx, client, &job).await;
    }
}

pub(super) async fn close_job(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let Some(job) = find_job(client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Job does not exist.");
        return;
    };
    // Single-document jobs: closing is a completion barrier with no
    // further effect once data has arrived.
    respond_job_summary(ctx, client, &job).await;
}

async fn subscription_groups_followup(ctx: &Arc<SystemContext>, client: &mut Client) {
    if client.request.first_group(GroupTag::Subscription).is_some() {
        super::subscriptions::create_from_request(ctx, client).await;
    }
}

// ---------------------------------------------------------------------------
// Cancel / hold / release
// ---------------------------------------------------------------------------

/// Cancel one job object; used by Cancel-Job and friends.  Assumes
/// authorization already happened.
pub(super) async fn cancel_job_object(
    ctx: &Arc<SystemContext>,
    printer: &PrinterRef,
    job: &JobRef,
) {
    let latched = {
        let mut j = job.write().await;
        if j.state == JobState::Processing || (j.state == JobState::PendingHeld && j.incoming) {
            let _ = j.apply(JobEvent::Cancel);
            if let Some(pid) = j.transform_pid {
                transform::terminate(pid);
            }
            true
        } else {
            let _ = j.apply(JobEvent::Cancel);
            false
        }
    };

    if latched {
        events::add_event(ctx, Some(printer), Some(job), Event::JobStateChanged, "Job canceled.")
            .await;
    } else {
        scheduler::finish_job(ctx, printer, job).await;
    }
}

pub(super) async fn cancel_job(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let Some(job) = find_job(client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Job does not exist.");
        return;
    };

    let (owner, state) = {
        let j = job.read().await;
        (j.username.clone(), j.state)
    };
    if !can_see_private(ctx, client, &owner) {
        client.respond(
            StatusCode::ClientErrorNotAuthorized,
            "Not authorized to cancel this job.",
        );
        return;
    }
    if state.is_terminal() {
        client.respond(
            StatusCode::ClientErrorNotPossible,
            format!("Job cannot be canceled in its current state ({}).", state.as_i32()),
        );
        return;
    }

    let Some(printer) = printer_target(client) else {
        return;
    };
    cancel_job_object(ctx, &printer, &job).await;
    let job_id = job.read().await.id;
    info!(job_id, "job canceled");
}

pub(super) async fn cancel_current_job(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_admin(ctx, client) {
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };
    let current = {
        let p = printer.read().await;
        p.processing_job.and_then(|id| p.job(id).cloned())
    };
    match current {
        Some(job) => cancel_job_object(ctx, &printer, &job).await,
        None => client.respond(StatusCode::ClientErrorNotPossible, "No job being processed."),
    }
}

pub(super) async fn cancel_jobs(ctx: &Arc<SystemContext>, client: &mut Client) {
    let my_jobs = client.op == Some(ServerOp::CancelMyJobs);

    if !require_user(ctx, client) {
        return;
    }
    if !my_jobs && !require_admin(ctx, client) {
        return;
    }

    let username = if my_jobs {
        let user = client.requesting_user();
        if user == "anonymous" && client.request.find("requesting-user-name").is_none() {
            client.respond(
                StatusCode::ClientErrorBadRequest,
                "Need requesting-user-name with Cancel-My-Jobs.",
            );
            return;
        }
        Some(user)
    } else {
        None
    };

    let Some(printer) = printer_target(client) else {
        return;
    };
    let requested_ids: Option<Vec<i32>> = client
        .request
        .find_in(GroupTag::Operation, "job-ids")
        .map(|attr| msg::as_values(attr.value()).filter_map(msg::int_of).collect());

    let mut bad_ids: Vec<i32> = Vec::new();
    let mut to_cancel: Vec<JobRef> = Vec::new();

    {
        let p = printer.read().await;
        match &requested_ids {
            Some(ids) => {
                for &id in ids {
                    match p.job(id) {
                        Some(job) => {
                            let j = job.read().await;
                            if username.as_deref().is_some_and(|u| !u.eq_ignore_ascii_case(&j.username)) {
                                if bad_ids.is_empty() {
                                    client.respond(
                                        StatusCode::ClientErrorNotAuthorized,
                                        format!("Job #{id} is owned by another user."),
                                    );
                                }
                                bad_ids.push(id);
                            } else if j.state.is_terminal() {
                                if bad_ids.is_empty() {
                                    client.respond(
                                        StatusCode::ClientErrorNotPossible,
                                        format!("Job #{id} cannot be canceled."),
                                    );
                                }
                                bad_ids.push(id);
                            } else {
                                drop(j);
                                to_cancel.push(job.clone());
                            }
                        }
                        None => {
                            if bad_ids.is_empty() {
                                client.respond(
                                    StatusCode::ClientErrorNotPossible,
                                    format!("Job #{id} does not exist."),
                                );
                            }
                            bad_ids.push(id);
                        }
                    }
                }
            }
            None => {
                for job in p.jobs.values() {
                    let j = job.read().await;
                    let mine = username
                        .as_deref()
                        .is_none_or(|u| u.eq_ignore_ascii_case(&j.username));
                    if !j.state.is_terminal() && mine {
                        drop(j);
                        to_cancel.push(job.clone());
                    }
                }
            }
        }
    }

    if !bad_ids.is_empty() {
        client.add(
            GroupTag::Unsupported,
            IppAttribute::new(
                "job-ids",
                IppValue::Array(bad_ids.into_iter().map(IppValue::Integer).collect()),
            ),
        );
        return;
    }

    for job in to_cancel {
        cancel_job_object(ctx, &printer, &job).await;
    }
}

pub(super) async fn hold_job(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let Some(job) = find_job(client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Job does not exist.");
        return;
    };

    let owner = job.read().await.username.clone();
    if !can_see_private(ctx, client, &owner) {
        client.respond(StatusCode::ClientErrorNotAuthorized, "Not authorized to hold this job.");
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };

    // The special value no-hold clears an existing hold instead.
    let no_hold = client.request.find("job-hold-until").and_then(msg::attr_string)
        == Some("no-hold");
    if no_hold {
        if job.write().await.apply(JobEvent::Release).is_ok() {
            events::add_event(ctx, Some(&printer), Some(&job), Event::JobStateChanged, "Job released.")
                .await;
            scheduler::check_jobs(ctx, &printer).await;
        }
        return;
    }

    let hold = requested_hold(client).or(Some(DateTime::<Utc>::MAX_UTC));
    let held = job.write().await.hold(hold).is_ok();
    if held {
        events::add_event(ctx, Some(&printer), Some(&job), Event::JobStateChanged, "Job held.")
            .await;
    } else {
        client.respond(StatusCode::ClientErrorNotPossible, "Job cannot be held.");
    }
}

pub(super) async fn release_job(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let Some(job) = find_job(client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Job does not exist.");
        return;
    };

    let owner = job.read().await.username.clone();
    if !can_see_private(ctx, client, &owner) {
        client.respond(
            StatusCode::ClientErrorNotAuthorized,
            "Not authorized to release this job.",
        );
        return;
    }

    let released = job.write().await.apply(JobEvent::Release).is_ok();
    if !released {
        client.respond(StatusCode::ClientErrorNotPossible, "Job is not held.");
        return;
    }

    let Some(printer) = printer_target(client) else {
        return;
    };
    events::add_event(ctx, Some(&printer), Some(&job), Event::JobStateChanged, "Job released.")
        .await;
    scheduler::check_jobs(ctx, &printer).await;
    respond_job_summary(ctx, client, &job).await;
}

pub(super) async fn hold_new_jobs(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_admin(ctx, client) {
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };
    printer
        .write()
        .await
        .state_reasons
        .insert(druckwerk_core::types::PrinterReason::HoldNewJobs);
    events::add_event(ctx, Some(&printer), None, Event::PrinterStateChanged, "Holding new jobs.")
        .await;
}

pub(super) async fn release_held_new_jobs(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_admin(ctx, client) {
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };

    let jobs: Vec<JobRef> = {
        let mut p = printer.write().await;
        p.state_reasons
            .remove(druckwerk_core::types::PrinterReason::HoldNewJobs);
        p.active_jobs
            .iter()
            .filter_map(|(_, id)| p.job(*id).cloned())
            .collect()
    };

    for job in jobs {
        let release = {
            let j = job.read().await;
            j.state == JobState::PendingHeld
                && j.attrs
                    .get("job-hold-until")
                    .and_then(msg::attr_string)
                    .is_none_or(|v| v == "no-hold" || v == "none")
        };
        if release && job.write().await.apply(JobEvent::Release).is_ok() {
            events::add_event(ctx, Some(&printer), Some(&job), Event::JobStateChanged, "Job released.")
                .await;
        }
    }

    scheduler::check_jobs(ctx, &printer).await;
}

// ---------------------------------------------------------------------------
// Attribute reads and writes
// ---------------------------------------------------------------------------

pub(super) async fn get_job_attributes(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let Some(job) = find_job(client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Job not found.");
        return;
    };

    let owner = job.read().await.username.clone();
    let redact = !can_see_private(ctx, client, &owner);
    let ra = requested_attributes(&client.request);
    let group = copy_job_attributes(ctx, &job, ra.as_ref(), redact).await;
    client.add_group(group);
}

pub(super) async fn get_jobs(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };

    let which = client
        .request
        .find_in(GroupTag::Operation, "which-jobs")
        .and_then(msg::attr_string)
        .unwrap_or("not-completed")
        .to_string();
    let my_jobs = client
        .request
        .find_in(GroupTag::Operation, "my-jobs")
        .and_then(msg::attr_bool)
        .unwrap_or(false);
    let limit = client
        .request
        .find_in(GroupTag::Operation, "limit")
        .and_then(msg::attr_int)
        .unwrap_or(i32::MAX);
    let first_index = client
        .request
        .find_in(GroupTag::Operation, "first-index")
        .and_then(msg::attr_int)
        .unwrap_or(1)
        .max(1);

    let username = client.requesting_user();
    let ra = requested_attributes(&client.request);

    let jobs: Vec<JobRef> = printer.read().await.jobs.values().cloned().collect();
    let mut matched = 0i32;
    let mut returned = 0i32;
    let mut groups = Vec::new();

    for job in jobs {
        let keep = {
            let j = job.read().await;
            let state_match = match which.as_str() {
                "completed" => j.effective_state().is_terminal(),
                "not-completed" => j.effective_state().is_active(),
                "fetchable" => j.state_reasons.contains(JobReason::JobFetchable),
                _ => true,
            };
            let user_match = !my_jobs || j.username.eq_ignore_ascii_case(&username);
            state_match && user_match
        };
        if !keep {
            continue;
        }
        matched += 1;
        if matched < first_index {
            continue;
        }
        if returned >= limit {
            break;
        }
        returned += 1;

        let owner = job.read().await.username.clone();
        let redact = !can_see_private(ctx, client, &owner);
        groups.push(copy_job_attributes(ctx, &job, ra.as_ref(), redact).await);
    }

    for group in groups {
        client.add_group(group);
    }
}

pub(super) async fn set_job_attributes(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let Some(job) = find_job(client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Job not found.");
        return;
    };

    let owner = job.read().await.username.clone();
    if !can_see_private(ctx, client, &owner) {
        client.respond(StatusCode::ClientErrorNotAuthorized, "Not authorized to modify this job.");
        return;
    }
    if job.read().await.state.is_terminal() {
        client.respond(StatusCode::ClientErrorNotPossible, "Job is in a terminal state.");
        return;
    }

    let Some(printer) = printer_target(client) else {
        return;
    };
    let settable = printer
        .read()
        .await
        .capability("job-settable-attributes-supported")
        .cloned();

    if let Some(offense) = check_values(
        &client.request,
        ServerOp::SetJobAttributes,
        GroupTag::Job,
        settable.as_ref(),
        JOB_VALUES,
    ) {
        client.apply_offense(&offense);
        return;
    }

    // Atomic: validation passed for every attribute, now apply.
    let edits: Vec<IppAttribute> = client
        .request
        .groups_of(GroupTag::Job)
        .flat_map(|g| g.attrs.iter().cloned())
        .collect();

    {
        let mut j = job.write().await;
        for attr in edits {
            if msg::is_delete_attribute(attr.value()) {
                j.attrs.remove(attr.name());
            } else {
                j.attrs.insert(attr.name().to_string(), attr);
            }
        }
    }

    events::add_event(ctx, Some(&printer), Some(&job), Event::JobConfigChanged, "Job changed.")
        .await;
}

// ---------------------------------------------------------------------------
// Document operations (single-document jobs)
// ---------------------------------------------------------------------------

fn document_number_ok(client: &Client) -> bool {
    client
        .request
        .find_in(GroupTag::Operation, "document-number")
        .is_some_and(|attr| msg::value_count(attr) == 1 && msg::attr_int(attr) == Some(1))
}

/// Synthesized document attributes for the job's single document.
async fn copy_document_attributes(
    ctx: &Arc<SystemContext>,
    job: &JobRef,
    requested: Option<&HashSet<String>>,
    redact: bool,
) -> AttrGroup {
    let j = job.read().await;
    let mut group = AttrGroup::new(GroupTag::Document);

    let private: Option<HashSet<&str>> = if redact {
        Some(JOB_PRIVACY_ATTRS.iter().copied().collect())
    } else {
        None
    };
    let mut push = |name: &str, value: IppValue| {
        if crate::client::check_attribute(name, requested, private.as_ref()) {
            group.add(IppAttribute::new(name, value));
        }
    };

    push("document-number", IppValue::Integer(1));
    push("document-job-id", IppValue::Integer(j.id));
    push(
        "document-job-uri",
        IppValue::Uri(j.uri(&ctx.config.host, ctx.config.port)),
    );
    push("document-uuid", IppValue::Uri(format!("urn:uuid:{}", j.uuid)));
    push(
        "document-printer-uri",
        IppValue::Uri(format!(
            "ipp://{}:{}{}",
            ctx.config.host, ctx.config.port, j.printer_path
        )),
    );
    push("document-format", IppValue::MimeMediaType(j.format.clone()));
    push("document-state", IppValue::Enum(j.effective_state().as_i32()));
    push(
        "document-state-reasons",
        keyword_set(j.state_reasons.keywords()),
    );
    push("last-document", IppValue::Boolean(true));
    push("compression", IppValue::Keyword("none".into()));
    if let Some(impressions) = j.impressions {
        push("impressions", IppValue::Integer(impressions));
    }
    push("impressions-completed", IppValue::Integer(j.impressions_completed));

    let since_start = |t: DateTime<Utc>| (t - ctx.started_at).num_seconds() as i32;
    push("time-at-created", IppValue::Integer(since_start(j.created)));
    push(
        "time-at-completed",
        j.completed_at.map_or(IppValue::NoValue, |t| IppValue::Integer(since_start(t))),
    );
    push("date-time-at-created", date_time_value(j.created));
    push(
        "date-time-at-completed",
        j.completed_at.map_or(IppValue::NoValue, date_time_value),
    );

    for (name, attr) in &j.doc_attrs {
        if group.get(name).is_none()
            && crate::client::check_attribute(name, requested, private.as_ref())
        {
            group.add(attr.clone());
        }
    }

    group
}

pub(super) async fn get_document_attributes(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let Some(job) = find_job(client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Job not found.");
        return;
    };
    if !document_number_ok(client) {
        client.respond(StatusCode::ClientErrorNotFound, "Document not found.");
        return;
    }

    let owner = job.read().await.username.clone();
    let redact = !can_see_private(ctx, client, &owner);
    let ra = requested_attributes(&client.request);
    let group = copy_document_attributes(ctx, &job, ra.as_ref(), redact).await;
    client.add_group(group);
}

pub(super) async fn get_documents(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let Some(job) = find_job(client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Job not found.");
        return;
    };

    let owner = job.read().await.username.clone();
    let redact = !can_see_private(ctx, client, &owner);
    let ra = requested_attributes(&client.request);
    let group = copy_document_attributes(ctx, &job, ra.as_ref(), redact).await;
    client.add_group(group);
}

pub(super) async fn set_document_attributes(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let Some(job) = find_job(client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Job not found.");
        return;
    };
    if !document_number_ok(client) {
        client.respond(StatusCode::ClientErrorNotFound, "Document not found.");
        return;
    }
    if job.read().await.state.is_terminal() {
        client.respond(StatusCode::ClientErrorNotPossible, "Job is in a terminal state.");
        return;
    }

    if let Some(offense) = check_values(
        &client.request,
        ServerOp::SetDocumentAttributes,
        GroupTag::Document,
        None,
        JOB_VALUES,
    ) {
        client.apply_offense(&offense);
        return;
    }

    let edits: Vec<IppAttribute> = client
        .request
        .groups_of(GroupTag::Document)
        .flat_map(|g| g.attrs.iter().cloned())
        .collect();
    {
        let mut j = job.write().await;
        for attr in edits {
            if msg::is_delete_attribute(attr.value()) {
                j.doc_attrs.remove(attr.name());
            } else {
                j.doc_attrs.insert(attr.name().to_string(), attr);
            }
        }
    }

    let Some(printer) = printer_target(client) else {
        return;
    };
    events::add_event(ctx, Some(&printer), Some(&job), Event::DocumentConfigChanged, "").await;
}

pub(super) async fn cancel_document(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let Some(job) = find_job(client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Job not found.");
        return;
    };
    if !document_number_ok(client) {
        client.respond(StatusCode::ClientErrorNotFound, "Document not found.");
        return;
    }
    if job.read().await.state.is_terminal() {
        client.respond(StatusCode::ClientErrorNotPossible, "Job cannot be canceled.");
        return;
    }

    // One document per job: canceling it cancels the job.
    let Some(printer) = printer_target(client) else {
        return;
    };
    cancel_job_object(ctx, &printer, &job).await;
}
