// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Process-wide server state, passed around as a context value.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use ipp::attribute::IppAttribute;
use ipp::value::IppValue;
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

use druckwerk_core::config::ServerConfig;
use druckwerk_core::types::{PrinterState, ServiceType};

use crate::auth::GroupResolver;
use crate::printer::{Printer, PrinterRef};
use crate::store::{PrinterStore, ResourceStore, SubscriptionStore};

/// The System object: configuration, the object stores, id allocation,
/// and the notification condition for Get-Notifications long-polls.
pub struct SystemContext {
    pub config: ServerConfig,
    pub auth: Arc<dyn GroupResolver>,
    pub uuid: Uuid,
    pub started: Instant,
    pub started_at: DateTime<Utc>,
    /// System Description attributes settable via Set-System-Attributes.
    pub attrs: RwLock<HashMap<String, IppAttribute>>,
    pub printers: PrinterStore,
    pub subscriptions: SubscriptionStore,
    pub resources: ResourceStore,
    pub default_printer_id: RwLock<Option<i32>>,
    pub config_changes: AtomicI32,
    pub config_change_time: RwLock<DateTime<Utc>>,
    pub state_change_time: RwLock<DateTime<Utc>>,
    /// Signalled whenever an event is appended to any subscription.
    pub notify: Notify,
    next_printer_id: AtomicI32,
    next_subscription_id: AtomicI32,
    next_resource_id: AtomicI32,
}

impl std::fmt::Debug for SystemContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemContext")
            .field("uuid", &self.uuid)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl SystemContext {
    pub fn new(config: ServerConfig, auth: Arc<dyn GroupResolver>) -> Arc<Self> {
        let now = Utc::now();
        let mut attrs = HashMap::new();
        for attr in [
            IppAttribute::new(
                "system-name",
                IppValue::NameWithoutLanguage(config.host.clone()),
            ),
            IppAttribute::new(
                "system-make-and-model",
                IppValue::TextWithoutLanguage("Druckwerk".into()),
            ),
            IppAttribute::new(
                "system-settable-attributes-supported",
                IppValue::Array(vec![
                    IppValue::Keyword("system-default-printer-id".into()),
                    IppValue::Keyword("system-geo-location".into()),
                    IppValue::Keyword("system-info".into()),
                    IppValue::Keyword("system-location".into()),
                    IppValue::Keyword("system-name".into()),
                ]),
            ),
        ] {
            attrs.insert(attr.name().to_string(), attr);
        }

        Arc::new(Self {
            config,
            auth,
            uuid: Uuid::new_v4(),
            started: Instant::now(),
            started_at: now,
            attrs: RwLock::new(attrs),
            printers: PrinterStore::default(),
            subscriptions: SubscriptionStore::default(),
            resources: ResourceStore::default(),
            default_printer_id: RwLock::new(None),
            config_changes: AtomicI32::new(0),
            config_change_time: RwLock::new(now),
            state_change_time: RwLock::new(now),
            notify: Notify::new(),
            next_printer_id: AtomicI32::new(1),
            next_subscription_id: AtomicI32::new(1),
            next_resource_id: AtomicI32::new(1),
        })
    }

    /// Seconds since startup, for `printer-up-time`/`system-up-time`.
    pub fn up_time(&self) -> i32 {
        self.started.elapsed().as_secs() as i32
    }

    pub fn system_uri(&self) -> String {
        format!("ipp://{}:{}/ipp/system", self.config.host, self.config.port)
    }

    pub fn next_printer_id(&self) -> i32 {
        self.next_printer_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_subscription_id(&self) -> i32 {
        self.next_subscription_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_resource_id(&self) -> i32 {
        self.next_resource_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Create a printer, register it, and make it the default when it is
    /// the first one.
    pub async fn create_printer(self: &Arc<Self>, name: &str, service: ServiceType) -> PrinterRef {
        let id = self.next_printer_id();
        let printer = Arc::new(RwLock::new(Printer::new(id, name, service, &self.config)));
        self.printers.insert(printer.clone()).await;

        let mut default = self.default_printer_id.write().await;
        if default.is_none() {
            *default = Some(id);
        }
        drop(default);

        self.touch_config().await;
        printer
    }

    /// Bump the configuration-change counter and timestamp.
    pub async fn touch_config(&self) {
        self.config_changes.fetch_add(1, Ordering::Relaxed);
        *self.config_change_time.write().await = Utc::now();
    }

    pub async fn touch_state(&self) {
        *self.state_change_time.write().await = Utc::now();
    }

    /// Roll up `system-state` from the registered printers: processing
    /// dominates idle; stopped only when every printer is stopped.
    pub async fn system_state(&self) -> PrinterState {
        let printers = self.printers.all().await;
        if printers.is_empty() {
            return PrinterState::Idle;
        }

        let mut any_processing = false;
        let mut all_stopped = true;
        for printer in &printers {
            let printer = printer.read().await;
            match printer.reported_state() {
                PrinterState::Processing => {
                    any_processing = true;
                    all_stopped = false;
                }
                PrinterState::Idle => all_stopped = false,
                PrinterState::Stopped => {}
            }
        }

        if any_processing {
            PrinterState::Processing
        } else if all_stopped {
            PrinterState::Stopped
        } else {
            PrinterState::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AllowAll;

    #[tokio::test]
    async fn first_printer_becomes_default() {
        let ctx = SystemContext::new(ServerConfig::default(), Arc::new(AllowAll));
        let p1 = ctx.create_printer("one", ServiceType::Print).await;
        let _p2 = ctx.create_printer("two", ServiceType::Print).await;

        let default = *ctx.default_printer_id.read().await;
        assert_eq!(default, Some(p1.read().await.id));
        assert_eq!(ctx.printers.len().await, 2);
        assert!(ctx.config_changes.load(Ordering::Relaxed) >= 2);
    }

    #[tokio::test]
    async fn system_state_rolls_up_printer_states() {
        let ctx = SystemContext::new(ServerConfig::default(), Arc::new(AllowAll));
        assert_eq!(ctx.system_state().await, PrinterState::Idle);

        let p = ctx.create_printer("one", ServiceType::Print).await;
        assert_eq!(ctx.system_state().await, PrinterState::Idle);

        p.write().await.set_state(PrinterState::Processing);
        assert_eq!(ctx.system_state().await, PrinterState::Processing);

        p.write().await.set_state(PrinterState::Stopped);
        assert_eq!(ctx.system_state().await, PrinterState::Stopped);
    }
}
