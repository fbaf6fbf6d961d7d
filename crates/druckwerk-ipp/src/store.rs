// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Keyed object stores guarded by reader/writer locks.
//
// Lookups clone the `Arc` handle under the store's read lock; mutation
// of an object takes the object's own lock afterwards.  Acquisition
// order is always store before object.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::printer::PrinterRef;
use crate::resource::ResourceRef;
use crate::subscription::SubscriptionRef;

/// Printers, looked up by resource path, id, or UUID.
#[derive(Debug, Default)]
pub struct PrinterStore {
    printers: RwLock<Vec<PrinterRef>>,
}

impl PrinterStore {
    pub async fn insert(&self, printer: PrinterRef) {
        self.printers.write().await.push(printer);
    }

    pub async fn all(&self) -> Vec<PrinterRef> {
        self.printers.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.printers.read().await.len()
    }

    pub async fn by_path(&self, path: &str) -> Option<PrinterRef> {
        for printer in self.printers.read().await.iter() {
            if printer.read().await.path == path {
                return Some(printer.clone());
            }
        }
        None
    }

    pub async fn by_id(&self, id: i32) -> Option<PrinterRef> {
        for printer in self.printers.read().await.iter() {
            if printer.read().await.id == id {
                return Some(printer.clone());
            }
        }
        None
    }

    pub async fn by_uuid(&self, uuid: Uuid) -> Option<PrinterRef> {
        for printer in self.printers.read().await.iter() {
            if printer.read().await.uuid == uuid {
                return Some(printer.clone());
            }
        }
        None
    }

    /// Remove a printer from the store.  The object itself may live on
    /// while a processing job drains.
    pub async fn remove(&self, id: i32) -> Option<PrinterRef> {
        let mut printers = self.printers.write().await;
        let mut found = None;
        for (i, printer) in printers.iter().enumerate() {
            if printer.read().await.id == id {
                found = Some(i);
                break;
            }
        }
        found.map(|i| {
            debug!(printer_id = id, "printer removed from store");
            printers.remove(i)
        })
    }
}

/// Subscriptions by id.
#[derive(Debug, Default)]
pub struct SubscriptionStore {
    subs: RwLock<BTreeMap<i32, SubscriptionRef>>,
}

impl SubscriptionStore {
    pub async fn insert(&self, id: i32, sub: SubscriptionRef) {
        self.subs.write().await.insert(id, sub);
    }

    pub async fn get(&self, id: i32) -> Option<SubscriptionRef> {
        self.subs.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: i32) -> Option<SubscriptionRef> {
        self.subs.write().await.remove(&id)
    }

    pub async fn all(&self) -> Vec<SubscriptionRef> {
        self.subs.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.subs.read().await.len()
    }

    /// Drop every subscription whose lease has lapsed.
    pub async fn reap_expired(&self, now: DateTime<Utc>) -> Vec<i32> {
        let mut expired = Vec::new();
        for sub in self.all().await {
            let sub = sub.read().await;
            if sub.is_expired(now) {
                expired.push(sub.id);
            }
        }
        if !expired.is_empty() {
            let mut subs = self.subs.write().await;
            for id in &expired {
                subs.remove(id);
            }
            debug!(count = expired.len(), "expired subscriptions reaped");
        }
        expired
    }
}

/// Resources by id or UUID.
#[derive(Debug, Default)]
pub struct ResourceStore {
    resources: RwLock<BTreeMap<i32, ResourceRef>>,
}

impl ResourceStore {
    pub async fn insert(&self, id: i32, resource: ResourceRef) {
        self.resources.write().await.insert(id, resource);
    }

    pub async fn get(&self, id: i32) -> Option<ResourceRef> {
        self.resources.read().await.get(&id).cloned()
    }

    pub async fn by_uuid(&self, uuid: Uuid) -> Option<ResourceRef> {
        for resource in self.resources.read().await.values() {
            if resource.read().await.uuid == uuid {
                return Some(resource.clone());
            }
        }
        None
    }

    pub async fn all(&self) -> Vec<ResourceRef> {
        self.resources.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use druckwerk_core::config::ServerConfig;
    use druckwerk_core::types::{Events, ServiceType};

    use crate::printer::Printer;
    use crate::subscription::Subscription;

    #[tokio::test]
    async fn printer_lookup_by_path_id_uuid() {
        let store = PrinterStore::default();
        let printer = Printer::new(1, "office", ServiceType::Print, &ServerConfig::default());
        let uuid = printer.uuid;
        store.insert(Arc::new(RwLock::new(printer))).await;

        assert!(store.by_path("/ipp/print/office").await.is_some());
        assert!(store.by_path("/ipp/print/nope").await.is_none());
        assert!(store.by_id(1).await.is_some());
        assert!(store.by_uuid(uuid).await.is_some());

        assert!(store.remove(1).await.is_some());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn expired_subscriptions_are_reaped() {
        let store = SubscriptionStore::default();
        let mut sub = Subscription::new(1, "alice", Events::NONE, 1);
        sub.expire = Some(Utc::now() - chrono::Duration::seconds(5));
        store.insert(1, Arc::new(RwLock::new(sub))).await;

        let forever = Subscription::new(2, "bob", Events::NONE, 0);
        store.insert(2, Arc::new(RwLock::new(forever))).await;

        let reaped = store.reap_expired(Utc::now()).await;
        assert_eq!(reaped, vec![1]);
        assert!(store.get(1).await.is_none());
        assert!(store.get(2).await.is_some());
    }
}
