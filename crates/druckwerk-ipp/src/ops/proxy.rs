// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Shared Infrastructure (proxy) operations: output-device registration,
// the fetchable-job handshake, status updates, and sparse device
// attribute edits.

use std::sync::Arc;

use ipp::attribute::IppAttribute;
use ipp::model::StatusCode;
use ipp::value::IppValue;
use tracing::{debug, info};
use uuid::Uuid;

use druckwerk_core::types::{Event, JobReason, JobState};

use crate::client::{Client, ResponseBody, find_job, requested_attributes};
use crate::device::{DeviceRef, OutputDevice, parse_sparse_name};
use crate::events::{self, keyword_set};
use crate::job::JobRef;
use crate::msg::{self, AttrGroup, GroupTag};
use crate::printer::PrinterRef;
use crate::system::SystemContext;
use crate::transform;

use super::{jobs, printer_target, require_proxy, require_user, system};

/// Raster formats offered when the device does not accept the job's
/// native format, in preference order.
const RASTER_FALLBACKS: &[&str] = &["image/urf", "image/pwg-raster", "application/vnd.hp-pcl"];

/// The output-device-uuid operation attribute, as a UUID.
fn device_uuid(client: &Client) -> Option<Uuid> {
    let value = client
        .request
        .find_in(GroupTag::Operation, "output-device-uuid")
        .and_then(msg::attr_string)?;
    value.strip_prefix("urn:uuid:")?.parse().ok()
}

async fn find_device(client: &Client) -> Option<DeviceRef> {
    let uuid = device_uuid(client)?;
    let printer = client.printer.as_ref()?;
    printer.read().await.find_device(uuid).await
}

/// Device and job prologue shared by the Fetch/Acknowledge/Update family.
async fn device_and_job(
    ctx: &Arc<SystemContext>,
    client: &mut Client,
    require_assigned: bool,
) -> Option<(DeviceRef, JobRef)> {
    if !require_proxy(ctx, client).await {
        return None;
    }

    let Some(device) = find_device(client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Device was not found.");
        return None;
    };

    let Some(job) = find_job(client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Job was not found.");
        return None;
    };

    if require_assigned {
        let device_uuid = device.read().await.uuid;
        let assigned = job.read().await.dev_uuid;
        if assigned != Some(device_uuid) {
            client.respond(StatusCode::ClientErrorNotPossible, "Job not assigned to device.");
            return None;
        }
    }

    Some((device, job))
}

fn document_number_ok(client: &mut Client) -> bool {
    let ok = client
        .request
        .find_in(GroupTag::Operation, "document-number")
        .is_some_and(|attr| {
            matches!(msg::first_value(attr), IppValue::Integer(_))
                && msg::value_count(attr) == 1
                && msg::attr_int(attr) == Some(1)
        });
    if !ok {
        client.respond(StatusCode::ClientErrorBadRequest, "Bad document-number attribute.");
    }
    ok
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

pub(super) async fn register_output_device(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_proxy(ctx, client).await {
        return;
    }

    let Some(attr) = client
        .request
        .find_in(GroupTag::Operation, "output-device-uuid")
        .cloned()
    else {
        client.respond(
            StatusCode::ClientErrorBadRequest,
            "Missing required 'output-device-uuid' attribute.",
        );
        return;
    };

    let uuid = match msg::attr_string(&attr) {
        Some(value)
            if matches!(msg::first_value(&attr), IppValue::Uri(_))
                && msg::value_count(&attr) == 1 =>
        {
            match value.strip_prefix("urn:uuid:").and_then(|u| u.parse::<Uuid>().ok()) {
                Some(uuid) => uuid,
                None => {
                    client.respond_unsupported(&attr);
                    return;
                }
            }
        }
        _ => {
            client.respond_unsupported(&attr);
            return;
        }
    };

    // Prefer the printer already carrying this device, else the first
    // proxied printer with capacity, else auto-create one.
    let mut existing: Option<PrinterRef> = None;
    let mut available: Option<PrinterRef> = None;
    for printer in ctx.printers.all().await {
        let p = printer.read().await;
        if !p.is_proxied() {
            continue;
        }
        if p.find_device(uuid).await.is_some() {
            drop(p);
            existing = Some(printer);
            break;
        }
        if available.is_none() && p.devices.len() < p.max_devices {
            drop(p);
            available = Some(printer.clone());
        }
    }

    let printer = match existing.or(available) {
        Some(printer) => printer,
        None => {
            let suffix = uuid.to_string();
            system::auto_create_proxy_printer(ctx, &suffix).await
        }
    };
    client.printer = Some(printer.clone());

    // Bind the device if it is not registered yet.
    {
        let mut p = printer.write().await;
        if p.find_device(uuid).await.is_none() {
            p.devices
                .push(Arc::new(tokio::sync::RwLock::new(OutputDevice::new(uuid))));
            info!(device = %uuid, printer = %p.name, "output device registered");
        }
    }

    let p = printer.read().await;
    let mut group = AttrGroup::new(GroupTag::Printer);
    group.add(IppAttribute::new("printer-id", IppValue::Integer(p.id)));
    group.add(IppAttribute::new(
        "printer-is-accepting-jobs",
        IppValue::Boolean(p.is_accepting),
    ));
    group.add(IppAttribute::new(
        "printer-state",
        IppValue::Enum(p.reported_state().as_i32()),
    ));
    group.add(IppAttribute::new(
        "printer-state-reasons",
        keyword_set(p.reported_reasons().keywords()),
    ));
    group.add(IppAttribute::new(
        "printer-uuid",
        IppValue::Uri(format!("urn:uuid:{}", p.uuid)),
    ));
    group.add(IppAttribute::new(
        "printer-xri-supported",
        IppValue::Uri(p.uri(&ctx.config.host, ctx.config.port)),
    ));
    drop(p);
    group.add(IppAttribute::new(
        "system-state",
        IppValue::Enum(ctx.system_state().await.as_i32()),
    ));
    group.add(IppAttribute::new(
        "system-state-reasons",
        IppValue::Keyword("none".into()),
    ));
    client.add_group(group);
}

pub(super) async fn deregister_output_device(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_proxy(ctx, client).await {
        return;
    }
    let Some(uuid) = device_uuid(client) else {
        client.respond(
            StatusCode::ClientErrorBadRequest,
            "Missing required 'output-device-uuid' attribute.",
        );
        return;
    };

    let Some(printer) = printer_target(client) else {
        return;
    };
    let removed = {
        let mut p = printer.write().await;
        let mut removed = false;
        let mut kept = Vec::with_capacity(p.devices.len());
        for device in p.devices.drain(..) {
            if device.read().await.uuid == uuid {
                removed = true;
            } else {
                kept.push(device);
            }
        }
        p.devices = kept;
        if removed {
            p.aggregate_devices().await;
        }
        removed
    };

    if !removed {
        client.respond(StatusCode::ClientErrorNotFound, "Device was not found.");
        return;
    }

    info!(device = %uuid, "output device deregistered");
    events::add_event(ctx, Some(&printer), None, Event::PrinterConfigChanged, "Device removed.")
        .await;
}

// ---------------------------------------------------------------------------
// Fetchable-job handshake
// ---------------------------------------------------------------------------

pub(super) async fn fetch_job(ctx: &Arc<SystemContext>, client: &mut Client) {
    let Some((device, job)) = device_and_job(ctx, client, false).await else {
        return;
    };

    {
        let j = job.read().await;
        let device_uuid = device.read().await.uuid;
        if j.dev_uuid.is_some_and(|assigned| assigned != device_uuid) {
            drop(j);
            client.respond(StatusCode::ClientErrorNotPossible, "Job not assigned to device.");
            return;
        }
        if !j.state_reasons.contains(JobReason::JobFetchable) {
            drop(j);
            client.respond(StatusCode::ServerErrorInternalError, "Job not fetchable.");
            return;
        }
    }

    let group = jobs::copy_job_attributes(ctx, &job, None, false).await;
    client.add_group(group);
}

pub(super) async fn acknowledge_job(ctx: &Arc<SystemContext>, client: &mut Client) {
    let Some((device, job)) = device_and_job(ctx, client, false).await else {
        return;
    };

    let device_uuid = device.read().await.uuid;
    {
        let mut j = job.write().await;
        if j.dev_uuid.is_some_and(|assigned| assigned != device_uuid) {
            drop(j);
            client.respond(StatusCode::ClientErrorNotAuthorized, "Job not assigned to device.");
            return;
        }
        if !j.state_reasons.contains(JobReason::JobFetchable) {
            drop(j);
            client.respond(StatusCode::ServerErrorInternalError, "Job not fetchable.");
            return;
        }

        j.dev_uuid = Some(device_uuid);
        j.state_reasons.remove(JobReason::JobFetchable);
    }

    let Some(printer) = printer_target(client) else {
        return;
    };
    events::add_event(ctx, Some(&printer), Some(&job), Event::JobStateChanged, "Job acknowledged.")
        .await;
}

pub(super) async fn acknowledge_document(ctx: &Arc<SystemContext>, client: &mut Client) {
    let Some((_device, _job)) = device_and_job(ctx, client, true).await else {
        return;
    };
    let _ = document_number_ok(client);
}

pub(super) async fn acknowledge_identify_printer(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_proxy(ctx, client).await {
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };

    let pending = {
        let mut p = printer.write().await;
        if p.identify_actions.is_empty() {
            None
        } else {
            let actions = p.identify_actions;
            let message = p.identify_message.take();
            p.identify_actions = druckwerk_core::types::IdentifyActions::NONE;
            p.state_reasons
                .remove(druckwerk_core::types::PrinterReason::IdentifyPrinterRequested);
            Some((actions, message))
        }
    };

    match pending {
        Some((actions, message)) => {
            client.add(
                GroupTag::Operation,
                IppAttribute::new("identify-actions", keyword_set(actions.keywords())),
            );
            if let Some(message) = message {
                client.add(
                    GroupTag::Operation,
                    IppAttribute::new("message", IppValue::TextWithoutLanguage(message)),
                );
            }
            events::add_event(
                ctx,
                Some(&printer),
                None,
                Event::PrinterStateChanged,
                "Identify-Printer request received.",
            )
            .await;
        }
        None => {
            client.respond(
                StatusCode::ClientErrorNotPossible,
                "No pending Identify-Printer request.",
            );
        }
    }
}

pub(super) async fn fetch_document(ctx: &Arc<SystemContext>, client: &mut Client) {
    let Some((_device, job)) = device_and_job(ctx, client, true).await else {
        return;
    };
    if !document_number_ok(client) {
        return;
    }

    let gzip = client
        .request
        .find_in(GroupTag::Operation, "compression-accepted")
        .and_then(msg::attr_string)
        == Some("gzip");

    let Some(printer) = printer_target(client) else {
        return;
    };
    let accepted = match client
        .request
        .find_in(GroupTag::Operation, "document-format-accepted")
        .cloned()
    {
        Some(attr) => Some(attr),
        None => printer.read().await.dev_attrs.get("document-format-supported").cloned(),
    };

    let (format, spool_file) = {
        let j = job.read().await;
        (j.format.clone(), j.spool_file.clone())
    };

    if let Some(accepted) = accepted
        .as_ref()
        .filter(|a| !msg::contains_string(a, &format))
    {
        // Transform into a raster intermediate the device accepts.
        let Some(target) = RASTER_FALLBACKS
            .iter()
            .copied()
            .find(|f| msg::contains_string(accepted, f))
        else {
            client.respond(
                StatusCode::ServerErrorInternalError,
                "Document not available in requested format.",
            );
            return;
        };

        let command = printer
            .read()
            .await
            .command
            .clone()
            .unwrap_or_else(|| "ipptransform".to_string());

        job.write().await.state = JobState::Processing;
        match transform::spawn_to_client(ctx, &printer, &job, &command, target).await {
            Ok(stdout) => {
                client.add(
                    GroupTag::Operation,
                    IppAttribute::new("document-format", IppValue::MimeMediaType(target.to_string())),
                );
                client.add(
                    GroupTag::Operation,
                    IppAttribute::new(
                        "compression",
                        IppValue::Keyword(if gzip { "gzip" } else { "none" }.to_string()),
                    ),
                );
                client.body = Some(ResponseBody::Transform(stdout));
                client.body_gzip = gzip;
            }
            Err(err) => {
                client.respond(
                    StatusCode::ServerErrorInternalError,
                    format!("Unable to start transform: {err}"),
                );
            }
        }
        return;
    }

    let Some(path) = spool_file else {
        client.respond(StatusCode::ServerErrorInternalError, "Document format unknown.");
        return;
    };
    if tokio::fs::metadata(&path).await.is_err() {
        client.respond(
            StatusCode::ServerErrorInternalError,
            "Document not available in requested format.",
        );
        return;
    }

    client.add(
        GroupTag::Operation,
        IppAttribute::new("document-format", IppValue::MimeMediaType(format)),
    );
    client.add(
        GroupTag::Operation,
        IppAttribute::new(
            "compression",
            IppValue::Keyword(if gzip { "gzip" } else { "none" }.to_string()),
        ),
    );
    client.body = Some(ResponseBody::File(path));
    client.body_gzip = gzip;
}

// ---------------------------------------------------------------------------
// Status updates
// ---------------------------------------------------------------------------

pub(super) async fn update_job_status(ctx: &Arc<SystemContext>, client: &mut Client) {
    let Some((_device, job)) = device_and_job(ctx, client, true).await else {
        return;
    };

    let mut fired: Vec<Event> = Vec::new();

    if let Some(completed) = client
        .request
        .find_in(GroupTag::Operation, "job-impressions-completed")
        .and_then(msg::attr_int)
    {
        job.write().await.impressions_completed = completed;
        fired.push(Event::JobProgress);
    }

    if let Some(state) = client
        .request
        .find_in(GroupTag::Operation, "output-device-job-state")
        .and_then(msg::attr_int)
        .and_then(JobState::from_i32)
    {
        job.write().await.dev_state = Some(state);
        fired.push(Event::JobStateChanged);
    }

    if let Some(attr) = client
        .request
        .find_in(GroupTag::Operation, "output-device-job-state-reasons")
    {
        let reasons = msg::as_values(attr.value())
            .filter_map(msg::string_of)
            .filter_map(JobReason::from_keyword)
            .collect();
        job.write().await.dev_state_reasons = reasons;
        if !fired.contains(&Event::JobStateChanged) {
            fired.push(Event::JobStateChanged);
        }
    }

    if let Some(message) = client
        .request
        .find_in(GroupTag::Operation, "output-device-job-state-message")
        .and_then(msg::attr_string)
    {
        job.write().await.dev_state_message = Some(message.to_string());
    }

    if !fired.is_empty() {
        let Some(printer) = printer_target(client) else {
            return;
        };
        events::add_events(ctx, Some(&printer), Some(&job), &fired, "").await;
    }
}

pub(super) async fn update_document_status(ctx: &Arc<SystemContext>, client: &mut Client) {
    let Some((_device, job)) = device_and_job(ctx, client, true).await else {
        return;
    };
    if !document_number_ok(client) {
        return;
    }

    if let Some(completed) = client
        .request
        .find_in(GroupTag::Operation, "impressions-completed")
        .and_then(msg::attr_int)
    {
        job.write().await.impressions_completed = completed;
        let Some(printer) = printer_target(client) else {
            return;
        };
        events::add_event(ctx, Some(&printer), Some(&job), Event::JobProgress, "").await;
    }
}

pub(super) async fn update_active_jobs(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_proxy(ctx, client).await {
        return;
    }
    let Some(device) = find_device(client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Device was not found.");
        return;
    };
    let device_uuid = device.read().await.uuid;
    let Some(printer) = printer_target(client) else {
        return;
    };

    let Some(job_ids_attr) = client.request.find_in(GroupTag::Operation, "job-ids").cloned()
    else {
        client.respond(StatusCode::ClientErrorBadRequest, "Missing required job-ids attribute.");
        return;
    };
    let Some(states_attr) = client
        .request
        .find_in(GroupTag::Operation, "output-device-job-states")
        .cloned()
    else {
        client.respond(
            StatusCode::ClientErrorBadRequest,
            "Missing required output-device-job-states attribute.",
        );
        return;
    };

    let job_ids: Vec<i32> = msg::as_values(job_ids_attr.value()).filter_map(msg::int_of).collect();
    let states: Vec<i32> = msg::as_values(states_attr.value()).filter_map(msg::int_of).collect();
    if job_ids.len() != states.len() {
        client.respond(
            StatusCode::ClientErrorBadRequest,
            "The job-ids and output-device-job-states attributes do not have the same number of values.",
        );
        return;
    }

    let mut different: Vec<(i32, JobState)> = Vec::new();
    let mut unsupported: Vec<i32> = Vec::new();

    {
        let p = printer.read().await;
        for (&id, &state) in job_ids.iter().zip(&states) {
            let Some(job) = p.job(id) else {
                unsupported.push(id);
                continue;
            };
            let mut j = job.write().await;
            if j.dev_uuid != Some(device_uuid) {
                unsupported.push(id);
                continue;
            }
            let claimed = JobState::from_i32(state);
            if j.state >= JobState::ProcessingStopped && claimed != Some(j.state) {
                // Terminal (or stopped) on the server: report our state
                // back instead of accepting the device's.
                different.push((id, j.state));
            } else {
                j.dev_state = claimed;
            }
        }

        // Jobs assigned to this device the device did not mention.
        for (id, job) in &p.jobs {
            if job_ids.contains(id) {
                continue;
            }
            let j = job.read().await;
            if j.dev_uuid == Some(device_uuid) {
                different.push((*id, j.state));
            }
        }
    }

    if !different.is_empty() {
        client.add(
            GroupTag::Operation,
            IppAttribute::new(
                "job-ids",
                IppValue::Array(different.iter().map(|(id, _)| IppValue::Integer(*id)).collect()),
            ),
        );
        client.add(
            GroupTag::Operation,
            IppAttribute::new(
                "output-device-job-states",
                IppValue::Array(
                    different
                        .iter()
                        .map(|(_, state)| IppValue::Enum(state.as_i32()))
                        .collect(),
                ),
            ),
        );
    }
    if !unsupported.is_empty() {
        client.add(
            GroupTag::Unsupported,
            IppAttribute::new(
                "job-ids",
                IppValue::Array(unsupported.into_iter().map(IppValue::Integer).collect()),
            ),
        );
    }
}

// ---------------------------------------------------------------------------
// Device attribute updates
// ---------------------------------------------------------------------------

/// Attribute name prefixes a device may report.
fn updatable_device_attr(name: &str) -> bool {
    const PREFIXES: &[&str] = &[
        "copies",
        "document-format",
        "finishings",
        "media",
        "print-",
        "sides",
        "printer-alert",
        "printer-input",
        "printer-output",
        "printer-resolution",
        "printer-state",
        "pwg-raster",
        "urf-",
    ];
    PREFIXES.iter().any(|p| name.starts_with(p))
}

pub(super) async fn update_output_device_attributes(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_proxy(ctx, client).await {
        return;
    }

    let Some(printer) = printer_target(client) else {
        return;
    };
    let device = match find_device(client).await {
        Some(device) => device,
        None => {
            // First contact: register the device implicitly when there
            // is capacity.
            let Some(uuid) = device_uuid(client) else {
                client.respond(StatusCode::ClientErrorNotPossible, "Unable to add output device.");
                return;
            };
            let mut p = printer.write().await;
            if p.devices.len() >= p.max_devices {
                drop(p);
                client.respond(StatusCode::ClientErrorNotPossible, "Unable to add output device.");
                return;
            }
            let device = Arc::new(tokio::sync::RwLock::new(OutputDevice::new(uuid)));
            p.devices.push(device.clone());
            device
        }
    };

    let edits: Vec<IppAttribute> = client
        .request
        .groups_of(GroupTag::Printer)
        .flat_map(|g| g.attrs.iter().cloned())
        .collect();

    let mut fired: Vec<Event> = Vec::new();
    let mut fire = |event: Event| {
        if !fired.contains(&event) {
            fired.push(event);
        }
    };

    {
        let mut d = device.write().await;
        for attr in edits {
            let name = attr.name().to_string();
            let base_name = parse_sparse_name(&name).map_or(name.as_str(), |(base, _, _)| base);

            if !updatable_device_attr(base_name) {
                debug!(attr = %name, "ignoring device attribute");
                continue;
            }

            let applied = match parse_sparse_name(&name) {
                Some((base, low, high)) => d.apply_sparse(base, low, high, &attr),
                None => {
                    d.apply_whole(&attr);
                    true
                }
            };
            if !applied {
                client.respond_unsupported(&attr);
                continue;
            }

            // Every accepted attribute is a configuration change;
            // printer-state* additionally changes the reported state.
            fire(Event::PrinterConfigChanged);
            if base_name.starts_with("printer-state") {
                fire(Event::PrinterStateChanged);
            }
            if base_name == "media-ready" || base_name == "media-col-ready" {
                fire(Event::PrinterMediaChanged);
            }
            if base_name == "finishings-ready" || base_name == "finishings-col-ready" {
                fire(Event::PrinterFinishingsChanged);
            }
        }
        d.last_seen = chrono::Utc::now();
    }

    if !fired.is_empty() {
        {
            let mut p = printer.write().await;
            p.aggregate_devices().await;
            p.touch_config();
        }
        events::add_events(ctx, Some(&printer), None, &fired, "").await;
    }
}

pub(super) async fn get_output_device_attributes(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let Some(device) = find_device(client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Output device not found.");
        return;
    };

    let ra = requested_attributes(&client.request);
    let d = device.read().await;
    let mut group = AttrGroup::new(GroupTag::Printer);
    group.add(IppAttribute::new(
        "output-device-uuid",
        IppValue::Uri(format!("urn:uuid:{}", d.uuid)),
    ));
    for (name, attr) in &d.attrs {
        if crate::client::check_attribute(name, ra.as_ref(), None) {
            group.add(attr.clone());
        }
    }
    drop(d);
    client.add_group(group);
}
