// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer operations: attribute reads and writes, Identify-Printer, and
// the admin state changes (pause, resume, disable, shutdown, ...).

use std::collections::HashSet;
use std::sync::Arc;

use ipp::attribute::IppAttribute;
use ipp::value::IppValue;
use tracing::info;

use druckwerk_core::types::{Event, IdentifyAction, IdentifyActions, PrinterReason, PrinterState};

use crate::attrs::{PRINTER_VALUES, check_values, date_time_value};
use crate::client::{Client, requested_attributes};
use crate::events::{self, keyword_set};
use crate::msg::{self, AttrGroup, GroupTag, ServerOp};
use crate::printer::PrinterRef;
use crate::scheduler;
use crate::system::SystemContext;

use super::{printer_target, require_admin, require_user};

/// Operations advertised in `operations-supported`.
const SUPPORTED_OPS: &[ServerOp] = &[
    ServerOp::PrintJob,
    ServerOp::PrintUri,
    ServerOp::ValidateJob,
    ServerOp::CreateJob,
    ServerOp::SendDocument,
    ServerOp::SendUri,
    ServerOp::CancelJob,
    ServerOp::CancelJobs,
    ServerOp::CancelMyJobs,
    ServerOp::CancelCurrentJob,
    ServerOp::GetJobAttributes,
    ServerOp::GetJobs,
    ServerOp::GetPrinterAttributes,
    ServerOp::GetPrinterSupportedValues,
    ServerOp::SetPrinterAttributes,
    ServerOp::SetJobAttributes,
    ServerOp::HoldJob,
    ServerOp::ReleaseJob,
    ServerOp::HoldNewJobs,
    ServerOp::ReleaseHeldNewJobs,
    ServerOp::CloseJob,
    ServerOp::IdentifyPrinter,
    ServerOp::CreatePrinterSubscriptions,
    ServerOp::CreateJobSubscriptions,
    ServerOp::GetSubscriptionAttributes,
    ServerOp::GetSubscriptions,
    ServerOp::RenewSubscription,
    ServerOp::CancelSubscription,
    ServerOp::GetNotifications,
    ServerOp::GetDocumentAttributes,
    ServerOp::GetDocuments,
    ServerOp::SetDocumentAttributes,
    ServerOp::CancelDocument,
    ServerOp::ValidateDocument,
    ServerOp::AcknowledgeDocument,
    ServerOp::AcknowledgeIdentifyPrinter,
    ServerOp::AcknowledgeJob,
    ServerOp::FetchDocument,
    ServerOp::FetchJob,
    ServerOp::GetOutputDeviceAttributes,
    ServerOp::UpdateActiveJobs,
    ServerOp::UpdateDocumentStatus,
    ServerOp::UpdateJobStatus,
    ServerOp::UpdateOutputDeviceAttributes,
    ServerOp::DeregisterOutputDevice,
    ServerOp::EnablePrinter,
    ServerOp::DisablePrinter,
    ServerOp::PausePrinter,
    ServerOp::PausePrinterAfterCurrentJob,
    ServerOp::ResumePrinter,
    ServerOp::RestartPrinter,
    ServerOp::ShutdownPrinter,
    ServerOp::StartupPrinter,
    ServerOp::AllocatePrinterResources,
    ServerOp::DeallocatePrinterResources,
];

/// Copy printer description/status attributes into a response group.
pub(super) async fn copy_printer_attributes(
    ctx: &Arc<SystemContext>,
    printer: &PrinterRef,
    requested: Option<&HashSet<String>>,
) -> AttrGroup {
    let p = printer.read().await;
    let mut group = AttrGroup::new(GroupTag::Printer);

    let mut push = |name: &str, value: IppValue| {
        if crate::client::check_attribute(name, requested, None) {
            group.add(IppAttribute::new(name, value));
        }
    };

    push("printer-id", IppValue::Integer(p.id));
    push("printer-uuid", IppValue::Uri(format!("urn:uuid:{}", p.uuid)));
    push(
        "printer-uri-supported",
        IppValue::Uri(p.uri(&ctx.config.host, ctx.config.port)),
    );
    push(
        "printer-service-type",
        IppValue::Keyword(p.service.keyword().to_string()),
    );
    push("printer-state", IppValue::Enum(p.reported_state().as_i32()));
    push(
        "printer-state-reasons",
        keyword_set(p.reported_reasons().keywords()),
    );
    push(
        "printer-state-message",
        IppValue::TextWithoutLanguage(p.state_message()),
    );
    push("printer-is-accepting-jobs", IppValue::Boolean(p.is_accepting));
    push("printer-up-time", IppValue::Integer(ctx.up_time()));
    push("queued-job-count", IppValue::Integer(p.queued_job_count() as i32));
    push(
        "printer-state-change-date-time",
        date_time_value(p.state_change_time),
    );
    push(
        "printer-state-change-time",
        IppValue::Integer((p.state_change_time - ctx.started_at).num_seconds() as i32),
    );
    push(
        "printer-config-change-date-time",
        date_time_value(p.config_change_time),
    );
    push(
        "printer-config-change-time",
        IppValue::Integer((p.config_change_time - ctx.started_at).num_seconds() as i32),
    );
    push(
        "operations-supported",
        IppValue::Array(SUPPORTED_OPS.iter().map(|op| IppValue::Enum(*op as i32)).collect()),
    );

    // Device-reported capabilities take precedence over the local bag.
    for (name, attr) in p.dev_attrs.iter().chain(p.attrs.iter()) {
        if group.get(name).is_none() && crate::client::check_attribute(name, requested, None) {
            group.add(attr.clone());
        }
    }

    group
}

pub(super) async fn get_printer_attributes(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };
    let ra = requested_attributes(&client.request);
    let group = copy_printer_attributes(ctx, &printer, ra.as_ref()).await;
    client.add_group(group);
}

pub(super) async fn get_printer_supported_values(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };
    let ra = requested_attributes(&client.request);
    let p = printer.read().await;

    let mut group = AttrGroup::new(GroupTag::Printer);
    for (name, attr) in p.attrs.iter().chain(p.dev_attrs.iter()) {
        if name.ends_with("-supported")
            && group.get(name).is_none()
            && crate::client::check_attribute(name, ra.as_ref(), None)
        {
            group.add(attr.clone());
        }
    }
    drop(p);
    client.add_group(group);
}

pub(super) async fn set_printer_attributes(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_admin(ctx, client) {
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };

    let settable = printer
        .read()
        .await
        .capability("printer-settable-attributes-supported")
        .cloned();

    if let Some(offense) = check_values(
        &client.request,
        ServerOp::SetPrinterAttributes,
        GroupTag::Printer,
        settable.as_ref(),
        PRINTER_VALUES,
    ) {
        client.apply_offense(&offense);
        return;
    }

    let edits: Vec<IppAttribute> = client
        .request
        .groups_of(GroupTag::Printer)
        .flat_map(|g| g.attrs.iter().cloned())
        .collect();

    {
        let mut p = printer.write().await;
        for attr in edits {
            if msg::is_delete_attribute(attr.value()) {
                p.attrs.remove(attr.name());
            } else {
                p.attrs.insert(attr.name().to_string(), attr);
            }
        }
        p.touch_config();
    }

    ctx.touch_config().await;
    events::add_event(ctx, Some(&printer), None, Event::PrinterConfigChanged, "Printer changed.")
        .await;
}

pub(super) async fn identify_printer(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };

    let mut actions = IdentifyActions::NONE;
    if let Some(attr) = client.request.find_in(GroupTag::Operation, "identify-actions").cloned() {
        let supported = printer
            .read()
            .await
            .capability("identify-actions-supported")
            .cloned();
        for value in msg::as_values(attr.value()) {
            match msg::string_of(value).and_then(IdentifyAction::from_keyword) {
                Some(action)
                    if supported
                        .as_ref()
                        .is_none_or(|s| msg::contains_string(s, action.keyword())) =>
                {
                    actions.insert(action);
                }
                _ => {
                    client.respond_unsupported(&attr);
                    return;
                }
            }
        }
    }
    if actions.is_empty() {
        actions.insert(IdentifyAction::Sound);
    }

    let message = client
        .request
        .find_in(GroupTag::Operation, "message")
        .and_then(msg::attr_string)
        .map(str::to_string);

    let proxied = printer.read().await.is_proxied();
    if proxied {
        {
            let mut p = printer.write().await;
            p.identify_actions = p.identify_actions.union(actions);
            p.identify_message = message;
            p.state_reasons.insert(PrinterReason::IdentifyPrinterRequested);
        }
        events::add_event(
            ctx,
            Some(&printer),
            None,
            Event::PrinterStateChanged,
            "Identify-Printer requested.",
        )
        .await;
    } else {
        // No proxy: the server is the output device.
        info!(
            actions = ?actions.keywords(),
            message = message.as_deref().unwrap_or(""),
            "IDENTIFY from client"
        );
    }
}

pub(super) async fn disable_printer(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_admin(ctx, client) {
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };
    printer.write().await.is_accepting = false;
    events::add_event(ctx, Some(&printer), None, Event::PrinterStateChanged, "Printer disabled.")
        .await;
}

pub(super) async fn enable_printer(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_admin(ctx, client) {
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };
    printer.write().await.is_accepting = true;
    events::add_event(ctx, Some(&printer), None, Event::PrinterStateChanged, "Printer enabled.")
        .await;
}

pub(super) async fn pause_printer(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_admin(ctx, client) {
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };
    let after_current = client.op == Some(ServerOp::PausePrinterAfterCurrentJob)
        || client.op == Some(ServerOp::PauseAllPrintersAfterCurrentJob);

    let deferred = {
        let mut p = printer.write().await;
        if after_current && p.processing_job.is_some() {
            p.state_reasons.insert(PrinterReason::MovingToPaused);
            true
        } else {
            p.state_reasons.remove(PrinterReason::MovingToPaused);
            p.state_reasons.insert(PrinterReason::Paused);
            p.set_state(PrinterState::Stopped);
            false
        }
    };

    let message = if deferred {
        "Printer pausing after current job."
    } else {
        "Printer paused."
    };
    events::add_event(ctx, Some(&printer), None, Event::PrinterStateChanged, message).await;
    if !deferred {
        events::add_event(ctx, Some(&printer), None, Event::PrinterStopped, "").await;
    }
}

pub(super) async fn resume_printer(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_admin(ctx, client) {
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };
    {
        let mut p = printer.write().await;
        p.state_reasons.remove(PrinterReason::Paused);
        p.state_reasons.remove(PrinterReason::MovingToPaused);
        p.set_state(PrinterState::Idle);
    }
    events::add_event(ctx, Some(&printer), None, Event::PrinterStateChanged, "Printer resumed.")
        .await;
    scheduler::check_jobs(ctx, &printer).await;
}

pub(super) async fn restart_printer(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_admin(ctx, client) {
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };
    {
        let mut p = printer.write().await;
        if !p.is_shutdown && p.processing_job.is_none() {
            p.set_state(PrinterState::Idle);
            p.state_reasons.remove(PrinterReason::Paused);
        }
    }
    events::add_event(ctx, Some(&printer), None, Event::PrinterRestarted, "Printer restarted.")
        .await;
    scheduler::check_jobs(ctx, &printer).await;
}

pub(super) async fn shutdown_printer(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_admin(ctx, client) {
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };
    {
        let mut p = printer.write().await;
        p.is_shutdown = true;
        p.state_reasons.insert(PrinterReason::Shutdown);
        p.set_state(PrinterState::Stopped);
    }
    events::add_event(ctx, Some(&printer), None, Event::PrinterShutdown, "Printer shutdown.")
        .await;
}

pub(super) async fn startup_printer(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_admin(ctx, client) {
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };
    {
        let mut p = printer.write().await;
        p.is_shutdown = false;
        p.state_reasons.remove(PrinterReason::Shutdown);
        p.state_reasons.remove(PrinterReason::Paused);
        p.set_state(PrinterState::Idle);
    }
    events::add_event(ctx, Some(&printer), None, Event::PrinterRestarted, "Printer started.")
        .await;
    scheduler::check_jobs(ctx, &printer).await;
}
