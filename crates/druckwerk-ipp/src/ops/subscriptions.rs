// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Subscription operations and the Get-Notifications long-poll.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ipp::attribute::IppAttribute;
use ipp::model::StatusCode;
use ipp::value::IppValue;
use tracing::debug;

use druckwerk_core::types::{Event, Events};

use crate::client::{Client, requested_attributes};
use crate::msg::{self, AttrGroup, GroupTag, ServerOp};
use crate::subscription::{Subscription, SubscriptionRef};
use crate::system::SystemContext;

use super::{can_see_private, require_user};

/// Attributes redacted from viewers without ownership or admin rights.
const SUBSCRIPTION_PRIVACY_ATTRS: &[&str] = &["notify-subscriber-user-name", "notify-user-data"];

/// Standalone Create-xxx-Subscriptions operations.
pub(super) async fn create_subscriptions(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }

    // Create-Job-Subscriptions needs a target job.
    if client.op == Some(ServerOp::CreateJobSubscriptions) && client.job.is_none() {
        let Some(attr) = client.request.find_in(GroupTag::Operation, "notify-job-id").cloned()
        else {
            client.respond(
                StatusCode::ClientErrorBadRequest,
                "Missing 'notify-job-id' attribute in Create-Job-Subscriptions request.",
            );
            return;
        };
        let job_id = match msg::attr_int(&attr) {
            Some(id) if id >= 1 && msg::value_count(&attr) == 1 => id,
            _ => {
                client.respond_unsupported(&attr);
                return;
            }
        };
        let job = match &client.printer {
            Some(printer) => printer.read().await.job(job_id).cloned(),
            None => None,
        };
        match job {
            Some(job) => client.job = Some(job),
            None => {
                client.respond(
                    StatusCode::ClientErrorNotFound,
                    format!("Job #{job_id} not found."),
                );
                return;
            }
        }
    }

    if client.op == Some(ServerOp::CreateResourceSubscriptions) && client.resource.is_none() {
        let Some(attr) = client.request.find_in(GroupTag::Operation, "resource-id").cloned()
        else {
            client.respond(
                StatusCode::ClientErrorBadRequest,
                "Missing 'resource-id' attribute in Create-Resource-Subscriptions request.",
            );
            return;
        };
        let resource_id = match msg::attr_int(&attr) {
            Some(id) if id >= 1 && msg::value_count(&attr) == 1 => id,
            _ => {
                client.respond_unsupported(&attr);
                return;
            }
        };
        match ctx.resources.get(resource_id).await {
            Some(resource) => client.resource = Some(resource),
            None => {
                client.respond(
                    StatusCode::ClientErrorNotFound,
                    format!("Resource #{resource_id} not found."),
                );
                return;
            }
        }
    }

    create_from_request(ctx, client).await;
}

/// Walk the subscription-template groups of the request and create one
/// subscription per group, answering per-group status under
/// `notify-status-code`.  Also used from job submission, where the job
/// response groups come first.
pub(crate) async fn create_from_request(ctx: &Arc<SystemContext>, client: &mut Client) {
    let username = client.requesting_user();
    let printer_id = match &client.printer {
        Some(printer) => Some(printer.read().await.id),
        None => None,
    };
    let job_id = match &client.job {
        Some(job) => Some(job.read().await.id),
        None => None,
    };
    let resource_id = match &client.resource {
        Some(resource) => Some(resource.read().await.id),
        None => None,
    };

    let groups: Vec<AttrGroup> = client.request.groups_of(GroupTag::Subscription).cloned().collect();
    let default_events: Events = match &client.printer {
        Some(printer) => printer
            .read()
            .await
            .attrs
            .get("notify-events-default")
            .map(|attr| {
                msg::as_values(attr.value())
                    .filter_map(msg::string_of)
                    .filter_map(Event::from_keyword)
                    .collect()
            })
            .unwrap_or_else(Events::job_completed_only),
        None => Events::job_completed_only(),
    };

    let mut num_subs = 0usize;
    let mut ok_subs = 0usize;

    for group in groups {
        num_subs += 1;
        let mut status = StatusCode::SuccessfulOk;
        let mut pull_method_ok = false;
        let mut events_mask = default_events;
        let mut charset = "utf-8".to_string();
        let mut language = "en".to_string();
        let mut user_data: Option<Vec<u8>> = None;
        let mut interval = 0i32;
        let mut lease = ctx.config.default_lease_seconds;
        let mut echo: Vec<IppAttribute> = Vec::new();

        for attr in &group.attrs {
            match attr.name() {
                "notify-recipient-uri" => {
                    // Push notifications are not supported.
                    status = StatusCode::ClientErrorAttributesOrValuesNotSupported;
                    echo.push(attr.clone());
                }
                "notify-pull-method" => {
                    let value = msg::attr_string(attr);
                    if !matches!(msg::first_value(attr), IppValue::Keyword(_))
                        || msg::value_count(attr) != 1
                        || value != Some("ippget")
                    {
                        status = StatusCode::ClientErrorAttributesOrValuesNotSupported;
                        echo.push(attr.clone());
                    } else {
                        pull_method_ok = true;
                    }
                }
                "notify-charset" => match msg::attr_string(attr) {
                    Some(value)
                        if matches!(msg::first_value(attr), IppValue::Charset(_))
                            && msg::value_count(attr) == 1
                            && (value == "us-ascii" || value == "utf-8") =>
                    {
                        charset = value.to_string();
                    }
                    _ => {
                        status = StatusCode::ClientErrorAttributesOrValuesNotSupported;
                        echo.push(attr.clone());
                    }
                },
                "notify-natural-language" => match msg::attr_string(attr) {
                    Some(value)
                        if matches!(msg::first_value(attr), IppValue::NaturalLanguage(_))
                            && msg::value_count(attr) == 1
                            && value == "en" =>
                    {
                        language = value.to_string();
                    }
                    _ => {
                        status = StatusCode::ClientErrorAttributesOrValuesNotSupported;
                        echo.push(attr.clone());
                    }
                },
                "notify-user-data" => {
                    let value = msg::attr_string(attr);
                    if msg::value_count(attr) != 1
                        || value.is_none_or(|v| v.len() > 63)
                    {
                        status = StatusCode::ClientErrorAttributesOrValuesNotSupported;
                        echo.push(attr.clone());
                    } else {
                        user_data = value.map(|v| v.as_bytes().to_vec());
                    }
                }
                "notify-events" => {
                    if !matches!(msg::first_value(attr), IppValue::Keyword(_)) {
                        status = StatusCode::ClientErrorAttributesOrValuesNotSupported;
                        echo.push(attr.clone());
                    } else {
                        events_mask = msg::as_values(attr.value())
                            .filter_map(msg::string_of)
                            .filter_map(Event::from_keyword)
                            .collect();
                    }
                }
                "notify-lease-duration" => match msg::attr_int(attr) {
                    Some(value)
                        if matches!(msg::first_value(attr), IppValue::Integer(_))
                            && msg::value_count(attr) == 1
                            && value >= 0 =>
                    {
                        lease = value;
                    }
                    _ => {
                        status = StatusCode::ClientErrorAttributesOrValuesNotSupported;
                        echo.push(attr.clone());
                    }
                },
                "notify-time-interval" => match msg::attr_int(attr) {
                    Some(value)
                        if matches!(msg::first_value(attr), IppValue::Integer(_))
                            && msg::value_count(attr) == 1
                            && value >= 0 =>
                    {
                        interval = value;
                    }
                    _ => {
                        status = StatusCode::ClientErrorAttributesOrValuesNotSupported;
                        echo.push(attr.clone());
                    }
                },
                _ => {}
            }
        }

        for attr in echo {
            client.add(GroupTag::Unsupported, attr);
        }

        let mut response_group = AttrGroup::new(GroupTag::Subscription);
        if status != StatusCode::SuccessfulOk {
            response_group.add(IppAttribute::new(
                "notify-status-code",
                IppValue::Enum(status as u16 as i32),
            ));
        } else if !pull_method_ok {
            response_group.add(IppAttribute::new(
                "notify-status-code",
                IppValue::Enum(StatusCode::ClientErrorBadRequest as u16 as i32),
            ));
        } else if ctx.subscriptions.len().await >= ctx.config.max_subscriptions {
            response_group.add(IppAttribute::new(
                "notify-status-code",
                IppValue::Enum(StatusCode::ServerErrorInternalError as u16 as i32),
            ));
        } else {
            let id = ctx.next_subscription_id();
            let mut sub = Subscription::new(id, &username, events_mask, lease);
            sub.printer_id = printer_id;
            sub.job_id = job_id;
            sub.resource_id = resource_id;
            sub.charset = charset;
            sub.language = language;
            sub.user_data = user_data;
            sub.interval = interval;

            debug!(subscription_id = id, "subscription created");
            ctx.subscriptions
                .insert(id, Arc::new(tokio::sync::RwLock::new(sub)))
                .await;

            response_group.add(IppAttribute::new(
                "notify-subscription-id",
                IppValue::Integer(id),
            ));
            ok_subs += 1;
        }
        client.add_group(response_group);
    }

    if num_subs != 0 && client.is_ok() {
        if ok_subs == 0 {
            client.respond(
                StatusCode::ServerErrorInternalError,
                "All subscriptions were ignored.",
            );
        } else if ok_subs != num_subs {
            client.respond(
                StatusCode::ServerErrorInternalError,
                "Some subscriptions were ignored.",
            );
        }
    }
}

async fn find_subscription(ctx: &Arc<SystemContext>, client: &Client) -> Option<SubscriptionRef> {
    let id = client
        .request
        .find_in(GroupTag::Operation, "notify-subscription-id")
        .and_then(msg::attr_int)?;
    ctx.subscriptions.get(id).await
}

/// Copy subscription description attributes into a response group.
async fn copy_subscription_attributes(
    ctx: &Arc<SystemContext>,
    sub: &SubscriptionRef,
    requested: Option<&HashSet<String>>,
    redact: bool,
) -> AttrGroup {
    let sub = sub.read().await;
    let mut group = AttrGroup::new(GroupTag::Subscription);

    let private: Option<HashSet<&str>> = if redact {
        Some(SUBSCRIPTION_PRIVACY_ATTRS.iter().copied().collect())
    } else {
        None
    };
    let mut push = |name: &str, value: IppValue| {
        if crate::client::check_attribute(name, requested, private.as_ref()) {
            group.add(IppAttribute::new(name, value));
        }
    };

    push("notify-subscription-id", IppValue::Integer(sub.id));
    push(
        "notify-subscription-uuid",
        IppValue::Uri(format!("urn:uuid:{}", sub.uuid)),
    );
    push(
        "notify-pull-method",
        IppValue::Keyword("ippget".to_string()),
    );
    push(
        "notify-events",
        IppValue::Array(
            sub.events
                .iter()
                .map(|e| IppValue::Keyword(e.keyword().to_string()))
                .collect(),
        ),
    );
    push("notify-charset", IppValue::Charset(sub.charset.clone()));
    push(
        "notify-natural-language",
        IppValue::NaturalLanguage(sub.language.clone()),
    );
    push("notify-lease-duration", IppValue::Integer(sub.lease));
    push(
        "notify-lease-expiration-time",
        IppValue::Integer(sub.expire.map_or(0, |e| (e - ctx.started_at).num_seconds() as i32)),
    );
    push("notify-time-interval", IppValue::Integer(sub.interval));
    push(
        "notify-subscriber-user-name",
        IppValue::NameWithoutLanguage(sub.username.clone()),
    );
    if let Some(user_data) = &sub.user_data {
        push(
            "notify-user-data",
            IppValue::OctetString(String::from_utf8_lossy(user_data).into_owned()),
        );
    }
    if let Some(job_id) = sub.job_id {
        push("notify-job-id", IppValue::Integer(job_id));
    }
    push("notify-sequence-number", IppValue::Integer(sub.last_sequence));

    group
}

pub(super) async fn get_subscription_attributes(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let Some(sub) = find_subscription(ctx, client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Subscription was not found.");
        return;
    };

    let owner = sub.read().await.username.clone();
    let redact = !can_see_private(ctx, client, &owner);
    let ra = requested_attributes(&client.request);
    let group = copy_subscription_attributes(ctx, &sub, ra.as_ref(), redact).await;
    client.add_group(group);
}

pub(super) async fn get_subscriptions(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }

    let my_subscriptions = client
        .request
        .find_in(GroupTag::Operation, "my-subscriptions")
        .and_then(msg::attr_bool)
        .unwrap_or(false);
    let limit = client
        .request
        .find_in(GroupTag::Operation, "limit")
        .and_then(msg::attr_int)
        .unwrap_or(i32::MAX);
    let username = client.requesting_user();
    let printer_id = match &client.printer {
        Some(printer) => Some(printer.read().await.id),
        None => None,
    };

    let ra = requested_attributes(&client.request);
    let mut returned = 0i32;

    for sub in ctx.subscriptions.all().await {
        let keep = {
            let s = sub.read().await;
            let scope_ok = printer_id.is_none() || s.printer_id == printer_id;
            let user_ok = !my_subscriptions || s.username.eq_ignore_ascii_case(&username);
            scope_ok && user_ok
        };
        if !keep {
            continue;
        }
        if returned >= limit {
            break;
        }
        returned += 1;

        let owner = sub.read().await.username.clone();
        let redact = !can_see_private(ctx, client, &owner);
        let group = copy_subscription_attributes(ctx, &sub, ra.as_ref(), redact).await;
        client.add_group(group);
    }
}

pub(super) async fn renew_subscription(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let Some(sub) = find_subscription(ctx, client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Subscription was not found.");
        return;
    };

    if sub.read().await.job_id.is_some() {
        client.respond(
            StatusCode::ClientErrorNotPossible,
            "Job subscriptions cannot be renewed.",
        );
        return;
    }

    let lease = client
        .request
        .find("notify-lease-duration")
        .and_then(msg::attr_int)
        .filter(|l| *l >= 0)
        .unwrap_or(ctx.config.default_lease_seconds);

    sub.write().await.renew(lease);
    client.add(
        GroupTag::Operation,
        IppAttribute::new("notify-lease-duration", IppValue::Integer(lease)),
    );
}

pub(super) async fn cancel_subscription(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }
    let Some(sub) = find_subscription(ctx, client).await else {
        client.respond(StatusCode::ClientErrorNotFound, "Subscription was not found.");
        return;
    };
    let id = sub.read().await.id;
    ctx.subscriptions.remove(id).await;
}

pub(super) async fn get_notifications(ctx: &Arc<SystemContext>, client: &mut Client) {
    if !require_user(ctx, client) {
        return;
    }

    let Some(sub_ids_attr) = client
        .request
        .find_in(GroupTag::Operation, "notify-subscription-ids")
        .cloned()
    else {
        client.respond(
            StatusCode::ClientErrorBadRequest,
            "Missing notify-subscription-ids attribute.",
        );
        return;
    };
    let sub_ids: Vec<i32> = msg::as_values(sub_ids_attr.value())
        .filter_map(msg::int_of)
        .collect();

    let seq_nums: Option<Vec<i32>> = client
        .request
        .find_in(GroupTag::Operation, "notify-sequence-numbers")
        .map(|attr| msg::as_values(attr.value()).filter_map(msg::int_of).collect());

    if seq_nums.as_ref().is_some_and(|s| s.len() != sub_ids.len()) {
        client.respond(
            StatusCode::ClientErrorBadRequest,
            "The notify-subscription-ids and notify-sequence-numbers attributes are different lengths.",
        );
        return;
    }

    let mut wait = client
        .request
        .find_in(GroupTag::Operation, "notify-wait")
        .and_then(msg::attr_bool)
        .unwrap_or(false);

    loop {
        let mut event_groups: Vec<AttrGroup> = Vec::new();

        for (i, &sub_id) in sub_ids.iter().enumerate() {
            let Some(sub) = ctx.subscriptions.get(sub_id).await else {
                client.respond(
                    StatusCode::ClientErrorNotFound,
                    format!("Subscription #{sub_id} was not found."),
                );
                client.add(
                    GroupTag::Unsupported,
                    IppAttribute::new("notify-subscription-ids", IppValue::Integer(sub_id)),
                );
                return;
            };

            let owner = sub.read().await.username.clone();
            if !can_see_private(ctx, client, &owner) {
                client.respond(
                    StatusCode::ClientErrorNotAuthorized,
                    format!("You do not have access to subscription #{sub_id}."),
                );
                client.add(
                    GroupTag::Unsupported,
                    IppAttribute::new("notify-subscription-ids", IppValue::Integer(sub_id)),
                );
                return;
            }

            let requested_seq = seq_nums.as_ref().map_or(1, |s| s[i]);
            let sub = sub.read().await;
            for record in sub.events_since(requested_seq) {
                let mut group = AttrGroup::new(GroupTag::EventNotification);
                for attr in &record.attrs {
                    group.add(attr.clone());
                }
                group.add(IppAttribute::new(
                    "notify-sequence-number",
                    IppValue::Integer(record.sequence),
                ));
                event_groups.push(group);
            }
        }

        if !event_groups.is_empty() {
            client.add(
                GroupTag::Operation,
                IppAttribute::new("notify-get-interval", IppValue::Integer(30)),
            );
            let up_time_name = if client.printer.is_some() {
                "printer-up-time"
            } else {
                "system-up-time"
            };
            client.add(
                GroupTag::Operation,
                IppAttribute::new(up_time_name, IppValue::Integer(ctx.up_time())),
            );
            for group in event_groups {
                client.add_group(group);
            }
            return;
        }

        if !wait {
            return;
        }

        // Long-poll: block on the notification condition for up to 30 s
        // and then return whatever accrued.
        debug!("waiting for events");
        let _ = tokio::time::timeout(Duration::from_secs(30), ctx.notify.notified()).await;
        debug!("done waiting for events");
        wait = false;
    }
}
