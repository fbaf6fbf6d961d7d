// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Event fan-out: build an event-notification attribute set, append it to
// every matching subscription, and wake Get-Notifications long-polls.

use std::sync::Arc;

use ipp::attribute::IppAttribute;
use ipp::value::IppValue;
use tracing::debug;

use druckwerk_core::types::Event;

use crate::job::JobRef;
use crate::printer::PrinterRef;
use crate::system::SystemContext;

/// Append one event to every matching subscription.
pub async fn add_event(
    ctx: &Arc<SystemContext>,
    printer: Option<&PrinterRef>,
    job: Option<&JobRef>,
    event: Event,
    message: &str,
) {
    add_events(ctx, printer, job, &[event], message).await;
}

/// Append several events (one record each) to every matching
/// subscription, then signal the notification condition once.
pub async fn add_events(
    ctx: &Arc<SystemContext>,
    printer: Option<&PrinterRef>,
    job: Option<&JobRef>,
    events: &[Event],
    message: &str,
) {
    // Snapshot object state before touching any subscription lock, so
    // the printer/job locks never nest inside a subscription lock.
    let printer_snapshot = match printer {
        Some(p) => {
            let p = p.read().await;
            Some((
                p.id,
                p.reported_state(),
                p.reported_reasons(),
                p.is_accepting,
            ))
        }
        None => None,
    };
    let job_snapshot = match job {
        Some(j) => {
            let j = j.read().await;
            Some((j.id, j.effective_state(), j.state_reasons, j.impressions_completed))
        }
        None => None,
    };

    let printer_id = printer_snapshot.as_ref().map(|p| p.0);
    let job_id = job_snapshot.as_ref().map(|j| j.0);

    let mut delivered = 0usize;
    for sub in ctx.subscriptions.all().await {
        let mut sub = sub.write().await;
        for &event in events {
            if !sub.matches(event, printer_id, job_id) {
                continue;
            }

            let mut attrs = vec![
                IppAttribute::new("notify-charset", IppValue::Charset(sub.charset.clone())),
                IppAttribute::new(
                    "notify-natural-language",
                    IppValue::NaturalLanguage(sub.language.clone()),
                ),
                IppAttribute::new("notify-subscription-id", IppValue::Integer(sub.id)),
                IppAttribute::new(
                    "notify-subscribed-event",
                    IppValue::Keyword(event.keyword().to_string()),
                ),
                IppAttribute::new("printer-up-time", IppValue::Integer(ctx.up_time())),
            ];
            if !message.is_empty() {
                attrs.push(IppAttribute::new(
                    "notify-text",
                    IppValue::TextWithoutLanguage(message.to_string()),
                ));
            }

            if let Some((id, state, reasons, accepting)) = &printer_snapshot {
                attrs.push(IppAttribute::new("printer-id", IppValue::Integer(*id)));
                attrs.push(IppAttribute::new(
                    "printer-state",
                    IppValue::Enum(state.as_i32()),
                ));
                attrs.push(IppAttribute::new(
                    "printer-state-reasons",
                    keyword_set(reasons.keywords()),
                ));
                attrs.push(IppAttribute::new(
                    "printer-is-accepting-jobs",
                    IppValue::Boolean(*accepting),
                ));
            }

            if let Some((id, state, reasons, completed)) = &job_snapshot {
                attrs.push(IppAttribute::new("job-id", IppValue::Integer(*id)));
                attrs.push(IppAttribute::new(
                    "job-state",
                    IppValue::Enum(state.as_i32()),
                ));
                attrs.push(IppAttribute::new(
                    "job-state-reasons",
                    keyword_set(reasons.keywords()),
                ));
                if event == Event::JobProgress {
                    attrs.push(IppAttribute::new(
                        "job-impressions-completed",
                        IppValue::Integer(*completed),
                    ));
                }
            }

            let sequence = sub.append(event, attrs);
            delivered += 1;
            debug!(
                subscription_id = sub.id,
                sequence,
                event = event.keyword(),
                "event appended"
            );
        }
    }

    if delivered > 0 {
        ctx.notify.notify_waiters();
    }
}

/// Build a 1setOf keyword value from reason keywords.
pub fn keyword_set(keywords: Vec<&'static str>) -> IppValue {
    if keywords.len() == 1 {
        IppValue::Keyword(keywords[0].to_string())
    } else {
        IppValue::Array(
            keywords
                .into_iter()
                .map(|k| IppValue::Keyword(k.to_string()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use druckwerk_core::config::ServerConfig;
    use druckwerk_core::types::{Events, ServiceType};
    use tokio::sync::RwLock;

    use crate::auth::AllowAll;
    use crate::subscription::Subscription;

    async fn ctx_with_printer() -> (Arc<SystemContext>, PrinterRef) {
        let ctx = SystemContext::new(ServerConfig::default(), Arc::new(AllowAll));
        let printer = ctx.create_printer("office", ServiceType::Print).await;
        (ctx, printer)
    }

    #[tokio::test]
    async fn event_reaches_matching_subscription_only() {
        let (ctx, printer) = ctx_with_printer().await;
        let printer_id = printer.read().await.id;

        let mut matching =
            Subscription::new(1, "alice", Events::from(Event::PrinterStateChanged), 0);
        matching.printer_id = Some(printer_id);
        ctx.subscriptions
            .insert(1, Arc::new(RwLock::new(matching)))
            .await;

        let mut other = Subscription::new(2, "bob", Events::from(Event::PrinterStateChanged), 0);
        other.printer_id = Some(printer_id + 1);
        ctx.subscriptions.insert(2, Arc::new(RwLock::new(other))).await;

        add_event(&ctx, Some(&printer), None, Event::PrinterStateChanged, "Paused.").await;

        let sub = ctx.subscriptions.get(1).await.unwrap();
        let sub = sub.read().await;
        assert_eq!(sub.last_sequence, 1);
        let record = sub.events_since(1).next().unwrap();
        assert_eq!(record.event, Event::PrinterStateChanged);
        assert!(record.attrs.iter().any(|a| a.name() == "printer-state"));
        assert!(record.attrs.iter().any(|a| a.name() == "notify-text"));

        let other = ctx.subscriptions.get(2).await.unwrap();
        assert_eq!(other.read().await.last_sequence, 0);
    }

    #[tokio::test]
    async fn long_poll_waiter_is_woken_by_event() {
        let (ctx, printer) = ctx_with_printer().await;
        let printer_id = printer.read().await.id;

        let mut sub = Subscription::new(1, "alice", Events::from(Event::PrinterStateChanged), 0);
        sub.printer_id = Some(printer_id);
        ctx.subscriptions.insert(1, Arc::new(RwLock::new(sub))).await;

        let waiter_ctx = ctx.clone();
        let waiter = tokio::spawn(async move {
            waiter_ctx.notify.notified().await;
        });
        // Let the waiter register interest before the event fires.
        tokio::task::yield_now().await;

        add_event(&ctx, Some(&printer), None, Event::PrinterStateChanged, "").await;

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }
}
