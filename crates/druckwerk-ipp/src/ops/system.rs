// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// System Service operations: system attributes, printer provisioning,
// Get-Printers filtering, and the all-printers admin fan-outs.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use ipp::attribute::IppAttribute;
use ipp::model::StatusCode;
use ipp::value::IppValue;
use tracing::info;

use druckwerk_core::types::{Event, PrinterState, ResourceType, ServiceType};

use crate::attrs::{PRINTER_VALUES, SYSTEM_VALUES, check_values, date_time_value};
use crate::client::{Client, requested_attributes};
use crate::events::{self, keyword_set};
use crate::geo;
use crate::job::JobEvent;
use crate::msg::{self, AttrGroup, GroupTag, ServerOp};
use crate::printer::PrinterRef;
use crate::system::SystemContext;

use super::{printer_target, printers, require_admin, require_user};

pub(super) async fn get_system_attributes(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let ra = requested_attributes(&client.request);
    let mut group = AttrGroup::new(GroupTag::System);

    let mut push = |name: &str, value: IppValue| {
        if crate::client::check_attribute(name, ra.as_ref(), None) {
            group.add(IppAttribute::new(name, value));
        }
    };

    push("system-up-time", IppValue::Integer(ctx.up_time()));
    push("system-uuid", IppValue::Uri(format!("urn:uuid:{}", ctx.uuid)));
    push(
        "system-state",
        IppValue::Enum(ctx.system_state().await.as_i32()),
    );
    push("system-state-reasons", IppValue::Keyword("none".into()));
    push(
        "system-config-change-date-time",
        date_time_value(*ctx.config_change_time.read().await),
    );
    push(
        "system-config-change-time",
        IppValue::Integer(
            (*ctx.config_change_time.read().await - ctx.started_at).num_seconds() as i32,
        ),
    );
    push(
        "system-config-changes",
        IppValue::Integer(ctx.config_changes.load(std::sync::atomic::Ordering::Relaxed)),
    );
    if let Some(default_id) = *ctx.default_printer_id.read().await {
        push("system-default-printer-id", IppValue::Integer(default_id));
    }

    // system-configured-printers: one collection per printer.
    if crate::client::check_attribute("system-configured-printers", ra.as_ref(), None) {
        let mut members = Vec::new();
        for printer in ctx.printers.all().await {
            let p = printer.read().await;
            members.push(IppValue::Collection(BTreeMap::from([
                ("printer-id".to_string(), IppValue::Integer(p.id)),
                (
                    "printer-name".to_string(),
                    IppValue::NameWithoutLanguage(p.name.clone()),
                ),
                (
                    "printer-service-type".to_string(),
                    IppValue::Keyword(p.service.keyword().to_string()),
                ),
                (
                    "printer-state".to_string(),
                    IppValue::Enum(p.reported_state().as_i32()),
                ),
                (
                    "printer-state-reasons".to_string(),
                    keyword_set(p.reported_reasons().keywords()),
                ),
                (
                    "printer-xri-supported".to_string(),
                    IppValue::Uri(p.uri(&ctx.config.host, ctx.config.port)),
                ),
            ])));
        }
        if !members.is_empty() {
            group.add(IppAttribute::new(
                "system-configured-printers",
                IppValue::Array(members),
            ));
        }
    }

    for (name, attr) in ctx.attrs.read().await.iter() {
        if group.get(name).is_none() && crate::client::check_attribute(name, ra.as_ref(), None) {
            group.add(attr.clone());
        }
    }

    client.add_group(group);
}

pub(super) async fn get_system_supported_values(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let ra = requested_attributes(&client.request);
    let mut group = AttrGroup::new(GroupTag::System);
    for (name, attr) in ctx.attrs.read().await.iter() {
        if name.ends_with("-supported") && crate::client::check_attribute(name, ra.as_ref(), None) {
            group.add(attr.clone());
        }
    }
    client.add_group(group);
}

pub(super) async fn set_system_attributes(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_admin(ctx, client) {
        return;
    }

    let settable = ctx
        .attrs
        .read()
        .await
        .get("system-settable-attributes-supported")
        .cloned();

    if let Some(offense) = check_values(
        &client.request,
        ServerOp::SetSystemAttributes,
        GroupTag::System,
        settable.as_ref(),
        SYSTEM_VALUES,
    ) {
        client.apply_offense(&offense);
        return;
    }

    let edits: Vec<IppAttribute> = client
        .request
        .groups_of(GroupTag::System)
        .flat_map(|g| g.attrs.iter().cloned())
        .collect();

    // system-default-printer-id must name a real printer; validate
    // before the atomic apply.
    for attr in &edits {
        if attr.name() == "system-default-printer-id" {
            if let Some(id) = msg::attr_int(attr) {
                if ctx.printers.by_id(id).await.is_none() {
                    client.respond_unsupported(attr);
                    return;
                }
            }
        }
    }

    {
        let mut attrs = ctx.attrs.write().await;
        for attr in edits {
            if attr.name() == "system-default-printer-id" {
                *ctx.default_printer_id.write().await = msg::attr_int(&attr);
                continue;
            }
            if msg::is_delete_attribute(attr.value()) {
                attrs.remove(attr.name());
            } else {
                attrs.insert(attr.name().to_string(), attr);
            }
        }
    }

    ctx.touch_config().await;
    events::add_event(ctx, None, None, Event::SystemConfigChanged, "System changed.").await;
}

pub(super) async fn create_printer(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_admin(ctx, client) {
        return;
    }

    let Some(service) = client
        .request
        .find_in(GroupTag::Operation, "printer-service-type")
        .and_then(msg::attr_string)
        .and_then(|kw| match kw {
            "print" => Some(ServiceType::Print),
            "print3d" => Some(ServiceType::Print3d),
            "faxout" => Some(ServiceType::Faxout),
            _ => None,
        })
    else {
        client.respond(
            StatusCode::ClientErrorBadRequest,
            "Missing or bad printer-service-type attribute.",
        );
        return;
    };

    let Some(name) = client
        .request
        .find("printer-name")
        .and_then(msg::attr_string)
        .map(str::to_string)
    else {
        client.respond(StatusCode::ClientErrorBadRequest, "Missing printer-name attribute.");
        return;
    };

    if let Some(offense) = check_values(
        &client.request,
        ServerOp::CreatePrinter,
        GroupTag::Printer,
        None,
        PRINTER_VALUES,
    ) {
        client.apply_offense(&offense);
        return;
    }

    let path = format!(
        "{}/{}",
        service.path_prefix(),
        crate::names::sanitize_printer_name(&name)
    );
    if ctx.printers.by_path(&path).await.is_some() {
        client.respond(
            StatusCode::ClientErrorNotPossible,
            format!("Printer \"{name}\" already exists."),
        );
        return;
    }

    let printer = ctx.create_printer(&name, service).await;

    // Template-printer resources seed defaults, then the request's
    // printer group overrides.
    {
        let mut p = printer.write().await;
        for resource in ctx.resources.all().await {
            let resource = resource.read().await;
            if resource.rtype != ResourceType::TemplatePrinter {
                continue;
            }
            for (attr_name, attr) in &resource.attrs {
                if PRINTER_VALUES.iter().any(|check| check.name == attr_name.as_str()) {
                    p.attrs.entry(attr_name.clone()).or_insert_with(|| attr.clone());
                }
            }
        }

        for group in client.request.groups_of(GroupTag::Printer) {
            for attr in &group.attrs {
                match attr.name() {
                    "smi2699-auth-print-group" => {
                        p.print_group = msg::attr_string(attr).map(str::to_string);
                    }
                    "smi2699-auth-proxy-group" => {
                        p.proxy_group = msg::attr_string(attr).map(str::to_string);
                    }
                    "smi2699-device-command" => {
                        p.command = msg::attr_string(attr).map(str::to_string);
                    }
                    "smi2699-device-uri" => {
                        p.device_uri = msg::attr_string(attr).map(str::to_string);
                    }
                    "smi2699-max-output-device" => {
                        if let Some(n) = msg::attr_int(attr) {
                            p.max_devices = n.max(0) as usize;
                        }
                    }
                    _ => {
                        p.attrs.insert(attr.name().to_string(), attr.clone());
                    }
                }
            }
        }
    }

    info!(name = %name, "printer created");
    events::add_event(ctx, Some(&printer), None, Event::SystemConfigChanged, "Printer created.")
        .await;

    let p = printer.read().await;
    let mut group = AttrGroup::new(GroupTag::Printer);
    group.add(IppAttribute::new("printer-id", IppValue::Integer(p.id)));
    group.add(IppAttribute::new(
        "printer-uuid",
        IppValue::Uri(format!("urn:uuid:{}", p.uuid)),
    ));
    group.add(IppAttribute::new(
        "printer-uri-supported",
        IppValue::Uri(p.uri(&ctx.config.host, ctx.config.port)),
    ));
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
    drop(p);
    client.add_group(group);
}

pub(super) async fn delete_printer(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_admin(ctx, client) {
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };
    let printer_id = printer.read().await.id;

    ctx.printers.remove(printer_id).await;

    let processing = {
        let mut p = printer.write().await;
        p.is_deleted = true;
        p.is_accepting = false;
        p.state_reasons.insert(druckwerk_core::types::PrinterReason::Deleting);
        p.processing_job.is_some()
    };

    // Abort everything that is not already running.
    let jobs: Vec<_> = {
        let p = printer.read().await;
        p.active_jobs
            .iter()
            .filter_map(|(_, id)| p.job(*id).cloned())
            .collect()
    };
    for job in jobs {
        let mut j = job.write().await;
        if !j.state.is_terminal() && j.state != druckwerk_core::types::JobState::Processing {
            let _ = j.apply(JobEvent::Abort);
        }
    }

    // Subscriptions scoped to this printer wind down on a short lease.
    for sub in ctx.subscriptions.all().await {
        let mut sub = sub.write().await;
        if sub.printer_id == Some(printer_id) {
            sub.expire = Some(Utc::now() + Duration::seconds(30));
        }
    }

    if processing {
        printer.write().await.pending_delete = true;
        info!(printer_id, "printer deletion deferred until current job stops");
    } else {
        info!(printer_id, "printer deleted");
    }

    ctx.touch_config().await;

    let default = *ctx.default_printer_id.read().await;
    if default == Some(printer_id) {
        *ctx.default_printer_id.write().await = None;
    }

    events::add_event(ctx, None, None, Event::SystemConfigChanged, "Printer deleted.").await;
}

pub(super) async fn get_printers(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }

    let request = &client.request;
    let ids: Option<Vec<i32>> = request
        .find_in(GroupTag::Operation, "printer-ids")
        .map(|attr| msg::as_values(attr.value()).filter_map(msg::int_of).collect());
    let location = request
        .find_in(GroupTag::Operation, "printer-location")
        .and_then(msg::attr_string)
        .map(str::to_string);
    let geo_location = request
        .find_in(GroupTag::Operation, "printer-geo-location")
        .and_then(msg::attr_string)
        .map(str::to_string);
    let document_format = request
        .find_in(GroupTag::Operation, "document-format")
        .and_then(msg::attr_string)
        .map(str::to_string);
    let service_type = request
        .find_in(GroupTag::Operation, "printer-service-type")
        .and_then(msg::attr_string)
        .map(str::to_string);
    let which = request
        .find_in(GroupTag::Operation, "which-printers")
        .and_then(msg::attr_string)
        .unwrap_or("all")
        .to_string();
    let first_index = request
        .find_in(GroupTag::Operation, "first-index")
        .and_then(msg::attr_int)
        .unwrap_or(1)
        .max(1);
    let limit = request
        .find_in(GroupTag::Operation, "limit")
        .and_then(msg::attr_int)
        .unwrap_or(i32::MAX);

    // Geo matches within the uncertainty radius of the requested
    // location (u= parameter, default 30 m).
    let geo_radius = geo_location
        .as_deref()
        .and_then(|uri| uri.split(";u=").nth(1))
        .and_then(|u| u.parse::<f64>().ok())
        .unwrap_or(30.0);

    let ra = requested_attributes(&client.request);
    let mut matched = 0i32;
    let mut returned = 0i32;
    let mut groups = Vec::new();

    for printer in ctx.printers.all().await {
        let keep = {
            let p = printer.read().await;
            let id_ok = ids.as_ref().is_none_or(|ids| ids.contains(&p.id));
            let location_ok = location.as_deref().is_none_or(|want| {
                p.attrs
                    .get("printer-location")
                    .and_then(msg::attr_string)
                    .is_some_and(|have| have == want)
            });
            let geo_ok = geo_location.as_deref().is_none_or(|want| {
                p.attrs
                    .get("printer-geo-location")
                    .and_then(msg::attr_string)
                    .is_some_and(|have| geo::wgs84_distance(want, have) <= geo_radius)
            });
            let format_ok = document_format.as_deref().is_none_or(|want| {
                p.capability("document-format-supported")
                    .is_some_and(|s| msg::contains_string(s, want))
            });
            let service_ok = service_type
                .as_deref()
                .is_none_or(|want| p.service.keyword() == want);
            let which_ok = match which.as_str() {
                "accepting" => p.is_accepting,
                "not-accepting" => !p.is_accepting,
                "idle" => p.reported_state() == PrinterState::Idle,
                "processing" => p.reported_state() == PrinterState::Processing,
                "stopped" => p.reported_state() == PrinterState::Stopped,
                "shutdown" => p.is_shutdown,
                _ => true,
            };
            id_ok && location_ok && geo_ok && format_ok && service_ok && which_ok
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
        groups.push(printers::copy_printer_attributes(ctx, &printer, ra.as_ref()).await);
    }

    for group in groups {
        client.add_group(group);
    }
}

/// Run a printer state operation across every registered printer.
pub(super) async fn all_printers_op(ctx: &Arc<SystemContext>, client: &mut Client, op: ServerOp) {
    if !require_admin(ctx, client) {
        return;
    }

    for printer in ctx.printers.all().await {
        client.printer = Some(printer);
        match op {
            ServerOp::DisableAllPrinters => printers::disable_printer(ctx, client).await,
            ServerOp::EnableAllPrinters => printers::enable_printer(ctx, client).await,
            ServerOp::PauseAllPrinters | ServerOp::PauseAllPrintersAfterCurrentJob => {
                printers::pause_printer(ctx, client).await
            }
            ServerOp::ResumeAllPrinters => printers::resume_printer(ctx, client).await,
            ServerOp::ShutdownAllPrinters => printers::shutdown_printer(ctx, client).await,
            ServerOp::StartupAllPrinters => printers::startup_printer(ctx, client).await,
            _ => unreachable!("not an all-printers operation"),
        }
        if !client.is_ok() {
            return;
        }
    }
    client.printer = None;
    ctx.touch_state().await;
}

pub(super) async fn restart_system(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_admin(ctx, client) {
        return;
    }

    for printer in ctx.printers.all().await {
        let restarted = {
            let mut p = printer.write().await;
            if p.processing_job.is_none() && !p.is_shutdown {
                p.set_state(PrinterState::Idle);
                true
            } else {
                false
            }
        };
        if restarted {
            events::add_event(ctx, Some(&printer), None, Event::PrinterRestarted, "").await;
        }
    }

    ctx.touch_state().await;
    events::add_event(ctx, None, None, Event::SystemStateChanged, "System restarted.").await;
}

/// Re-export used by the dispatcher for Register-Output-Device's
/// auto-created printers.
pub(super) async fn auto_create_proxy_printer(
    ctx: &Arc<SystemContext>,
    name: &str,
) -> PrinterRef {
    let printer = ctx.create_printer(name, ServiceType::Print).await;
    {
        let mut p = printer.write().await;
        p.proxy_group = ctx
            .config
            .proxy_group
            .clone()
            .or_else(|| Some("proxy".to_string()));
        p.max_devices = 1.max(ctx.config.max_devices);
    }
    events::add_event(ctx, Some(&printer), None, Event::SystemConfigChanged, "Printer created.")
        .await;
    printer
}
