// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Resource operations: upload, install, cancel, and printer allocation.

use std::collections::HashSet;
use std::sync::Arc;

use futures::io::AsyncReadExt;
use ipp::attribute::IppAttribute;
use ipp::model::StatusCode;
use ipp::value::IppValue;
use tracing::info;

use druckwerk_core::types::{Event, ResourceState, ResourceType};

use crate::attrs::{RESOURCE_VALUES, check_values, date_time_value};
use crate::client::{Client, requested_attributes};
use crate::events;
use crate::msg::{self, AttrGroup, GroupTag, ServerOp};
use crate::resource::{Resource, ResourceRef};
use crate::system::SystemContext;

use super::{printer_target, require_admin, require_user};

async fn find_resource(ctx: &Arc<SystemContext>, client: &Client) -> Option<ResourceRef> {
    let id = client
        .request
        .find_in(GroupTag::Operation, "resource-id")
        .and_then(msg::attr_int)?;
    ctx.resources.get(id).await
}

async fn copy_resource_attributes(
    ctx: &Arc<SystemContext>,
    resource: &ResourceRef,
    requested: Option<&HashSet<String>>,
) -> AttrGroup {
    let r = resource.read().await;
    let mut group = AttrGroup::new(GroupTag::Resource);

    let mut push = |name: &str, value: IppValue| {
        if crate::client::check_attribute(name, requested, None) {
            group.add(IppAttribute::new(name, value));
        }
    };

    push("resource-id", IppValue::Integer(r.id));
    push("resource-uuid", IppValue::Uri(format!("urn:uuid:{}", r.uuid)));
    push(
        "resource-type",
        IppValue::Keyword(r.rtype.keyword().to_string()),
    );
    push("resource-name", IppValue::NameWithoutLanguage(r.name.clone()));
    if let Some(info) = &r.info {
        push("resource-info", IppValue::TextWithoutLanguage(info.clone()));
    }
    if let Some(format) = &r.format {
        push("resource-format", IppValue::MimeMediaType(format.clone()));
    }
    push("resource-state", IppValue::Enum(r.state.as_i32()));
    push("resource-state-reasons", IppValue::Keyword("none".into()));
    if let Some(signature) = &r.signature {
        push(
            "resource-signature",
            IppValue::OctetString(signature.clone()),
        );
    }
    push("resource-use-count", IppValue::Integer(r.use_count as i32));
    push("date-time-at-creation", date_time_value(r.created));
    push(
        "time-at-creation",
        IppValue::Integer((r.created - ctx.started_at).num_seconds() as i32),
    );

    for (name, attr) in &r.attrs {
        if group.get(name).is_none() && crate::client::check_attribute(name, requested, None) {
            group.add(attr.clone());
        }
    }

    group
}

pub(super) async fn create_resource(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_admin(ctx, client) {
        return;
    }

    if let Some(offense) = check_values(
        &client.request,
        ServerOp::CreateResource,
        GroupTag::Resource,
        None,
        RESOURCE_VALUES,
    ) {
        client.apply_offense(&offense);
        return;
    }

    let Some(rtype) = client
        .request
        .find("resource-type")
        .and_then(msg::attr_string)
        .and_then(ResourceType::from_keyword)
    else {
        client.respond(
            StatusCode::ClientErrorBadRequest,
            "Missing or bad resource-type attribute.",
        );
        return;
    };

    let name = client
        .request
        .find("resource-name")
        .and_then(msg::attr_string)
        .unwrap_or("untitled")
        .to_string();

    let id = ctx.next_resource_id();
    let mut resource = Resource::new(id, rtype, &name);
    resource.info = client
        .request
        .find("resource-info")
        .and_then(msg::attr_string)
        .map(str::to_string);
    resource.format = client
        .request
        .find("resource-format")
        .and_then(msg::attr_string)
        .map(str::to_string);

    let resource = Arc::new(tokio::sync::RwLock::new(resource));
    ctx.resources.insert(id, resource.clone()).await;
    info!(resource_id = id, rtype = rtype.keyword(), "resource created");
    events::add_event(ctx, None, None, Event::ResourceCreated, "Resource created.").await;

    let group = copy_resource_attributes(ctx, &resource, None).await;
    client.add_group(group);
}

pub(super) async fn send_resource_data(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_admin(ctx, client) {
        return;
    }
    let Some(resource) = find_resource(ctx, client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Resource was not found.");
        return;
    };

    if resource.read().await.state != ResourceState::Pending {
        client.respond(
            StatusCode::ClientErrorNotPossible,
            "Resource is not in the pending state.",
        );
        return;
    }

    if let Some(attr) = client.request.find_in(GroupTag::Operation, "resource-format").cloned() {
        if !matches!(msg::first_value(&attr), IppValue::MimeMediaType(_)) {
            client.respond_unsupported(&attr);
            return;
        }
        resource.write().await.format = msg::attr_string(&attr).map(str::to_string);
    }

    let Some(mut payload) = client.payload.take() else {
        client.respond(StatusCode::ClientErrorBadRequest, "No resource data in request.");
        return;
    };

    let mut data = Vec::new();
    if let Err(err) = payload.read_to_end(&mut data).await {
        client.respond(
            StatusCode::ServerErrorInternalError,
            format!("Unable to read resource data: {err}"),
        );
        resource.write().await.abort();
        return;
    }

    let id = resource.read().await.id;
    let path = ctx.config.resource_dir.join(format!("resource-{id:05}"));
    if let Err(err) = tokio::fs::write(&path, &data).await {
        client.respond(
            StatusCode::ServerErrorInternalError,
            format!("Unable to write resource file: {err}"),
        );
        resource.write().await.abort();
        return;
    }

    if resource.write().await.set_data(path, &data).is_err() {
        client.respond(StatusCode::ClientErrorNotPossible, "Resource state changed.");
        return;
    }

    events::add_event(ctx, None, None, Event::ResourceConfigChanged, "Resource data received.")
        .await;
    let group = copy_resource_attributes(ctx, &resource, None).await;
    client.add_group(group);
}

pub(super) async fn install_resource(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_admin(ctx, client) {
        return;
    }
    let Some(resource) = find_resource(ctx, client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Resource was not found.");
        return;
    };

    if resource.write().await.install().is_err() {
        client.respond(
            StatusCode::ClientErrorNotPossible,
            "Resource is not in the available state.",
        );
        return;
    }

    events::add_event(ctx, None, None, Event::ResourceInstalled, "Resource installed.").await;
    let group = copy_resource_attributes(ctx, &resource, None).await;
    client.add_group(group);
}

pub(super) async fn cancel_resource(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_admin(ctx, client) {
        return;
    }
    let Some(resource) = find_resource(ctx, client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Resource was not found.");
        return;
    };

    if resource.write().await.cancel().is_err() {
        client.respond(
            StatusCode::ClientErrorNotPossible,
            "Resource is already in a terminal state.",
        );
        return;
    }

    events::add_event(ctx, None, None, Event::ResourceCanceled, "Resource canceled.").await;
}

pub(super) async fn set_resource_attributes(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_admin(ctx, client) {
        return;
    }
    let Some(resource) = find_resource(ctx, client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Resource was not found.");
        return;
    };

    if resource.read().await.state.is_terminal() {
        client.respond(StatusCode::ClientErrorNotPossible, "Resource is in a terminal state.");
        return;
    }

    // Resource template payloads cannot be decoded here, so the template
    // attribute set is maintained through this operation instead.
    let edits: Vec<IppAttribute> = client
        .request
        .groups_of(GroupTag::Resource)
        .flat_map(|g| g.attrs.iter().cloned())
        .collect();

    {
        let mut r = resource.write().await;
        for attr in edits {
            match attr.name() {
                "resource-name" => {
                    if let Some(name) = msg::attr_string(&attr) {
                        r.name = name.to_string();
                    }
                }
                "resource-info" => {
                    r.info = msg::attr_string(&attr).map(str::to_string);
                }
                _ => {
                    if msg::is_delete_attribute(attr.value()) {
                        r.attrs.remove(attr.name());
                    } else {
                        r.attrs.insert(attr.name().to_string(), attr);
                    }
                }
            }
        }
    }

    events::add_event(ctx, None, None, Event::ResourceConfigChanged, "Resource changed.").await;
}

pub(super) async fn get_resource_attributes(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let Some(resource) = find_resource(ctx, client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Resource was not found.");
        return;
    };
    let ra = requested_attributes(&client.request);
    let group = copy_resource_attributes(ctx, &resource, ra.as_ref()).await;
    client.add_group(group);
}

pub(super) async fn get_resources(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }

    let ids: Option<Vec<i32>> = client
        .request
        .find_in(GroupTag::Operation, "resource-ids")
        .map(|attr| msg::as_values(attr.value()).filter_map(msg::int_of).collect());
    let types: Option<Vec<String>> = client
        .request
        .find_in(GroupTag::Operation, "resource-types")
        .map(|attr| {
            msg::as_values(attr.value())
                .filter_map(msg::string_of)
                .map(str::to_string)
                .collect()
        });
    let states: Option<Vec<i32>> = client
        .request
        .find_in(GroupTag::Operation, "resource-states")
        .map(|attr| msg::as_values(attr.value()).filter_map(msg::int_of).collect());
    let first_index = client
        .request
        .find_in(GroupTag::Operation, "first-index")
        .and_then(msg::attr_int)
        .unwrap_or(1)
        .max(1);
    let limit = client
        .request
        .find_in(GroupTag::Operation, "limit")
        .and_then(msg::attr_int)
        .unwrap_or(i32::MAX);

    let ra = requested_attributes(&client.request);
    let mut matched = 0i32;
    let mut returned = 0i32;

    for resource in ctx.resources.all().await {
        let keep = {
            let r = resource.read().await;
            ids.as_ref().is_none_or(|ids| ids.contains(&r.id))
                && types
                    .as_ref()
                    .is_none_or(|t| t.iter().any(|k| k == r.rtype.keyword()))
                && states.as_ref().is_none_or(|s| s.contains(&r.state.as_i32()))
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

        let group = copy_resource_attributes(ctx, &resource, ra.as_ref()).await;
        client.add_group(group);
    }
}

pub(super) async fn allocate_printer_resources(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_admin(ctx, client) {
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };

    let Some(attr) = client.request.find_in(GroupTag::Operation, "resource-ids").cloned() else {
        client.respond(StatusCode::ClientErrorBadRequest, "Missing 'resource-ids' attribute.");
        return;
    };
    if !matches!(msg::first_value(&attr), IppValue::Integer(_)) {
        client.respond(
            StatusCode::ClientErrorAttributesOrValuesNotSupported,
            "The 'resource-ids' attribute is the wrong type.",
        );
        client.respond_unsupported(&attr);
        return;
    }

    let ids: Vec<i32> = msg::as_values(attr.value()).filter_map(msg::int_of).collect();

    // Validate everything before allocating anything.
    let mut resolved = Vec::new();
    for id in &ids {
        let Some(resource) = ctx.resources.get(*id).await else {
            client.respond(
                StatusCode::ClientErrorAttributesOrValuesNotSupported,
                format!("Resource #{id} does not exist."),
            );
            client.respond_unsupported(&attr);
            return;
        };
        let r = resource.read().await;
        if r.state != ResourceState::Installed {
            drop(r);
            client.respond(
                StatusCode::ClientErrorAttributesOrValuesNotSupported,
                format!("Resource #{id} is not installed."),
            );
            client.respond_unsupported(&attr);
            return;
        }
        if r.rtype.is_template() {
            let keyword = r.rtype.keyword();
            drop(r);
            client.respond(
                StatusCode::ClientErrorAttributesOrValuesNotSupported,
                format!("Resource #{id} of type '{keyword}' cannot be allocated."),
            );
            client.respond_unsupported(&attr);
            return;
        }
        drop(r);
        resolved.push(resource);
    }

    {
        let mut p = printer.write().await;
        for (id, resource) in ids.iter().zip(&resolved) {
            if !p.allocated_resources.contains(id) {
                p.allocated_resources.push(*id);
                resource.write().await.acquire();
            }
        }
        p.touch_config();
    }

    events::add_event(ctx, Some(&printer), None, Event::PrinterConfigChanged, "Resources allocated.")
        .await;
}

pub(super) async fn deallocate_printer_resources(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_admin(ctx, client) {
        return;
    }
    let Some(printer) = printer_target(client) else {
        return;
    };

    let Some(attr) = client.request.find_in(GroupTag::Operation, "resource-ids").cloned() else {
        client.respond(StatusCode::ClientErrorBadRequest, "Missing 'resource-ids' attribute.");
        return;
    };
    let ids: Vec<i32> = msg::as_values(attr.value()).filter_map(msg::int_of).collect();

    for id in &ids {
        if !printer.read().await.allocated_resources.contains(id) {
            client.respond(
                StatusCode::ClientErrorAttributesOrValuesNotSupported,
                format!("Resource #{id} is not allocated to this printer."),
            );
            client.respond_unsupported(&attr);
            return;
        }
    }

    {
        let mut p = printer.write().await;
        for id in &ids {
            p.allocated_resources.retain(|r| r != id);
            if let Some(resource) = ctx.resources.get(*id).await {
                resource.write().await.release();
            }
        }
        p.touch_config();
    }

    events::add_event(ctx, Some(&printer), None, Event::PrinterConfigChanged, "Resources deallocated.")
        .await;
}
