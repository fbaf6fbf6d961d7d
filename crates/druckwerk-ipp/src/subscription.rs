// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Subscriptions and their per-subscription event logs.
//
// Pull-only: events accumulate here until Get-Notifications drains them
// or the lease expires.  Sequence numbers are monotone per subscription.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ipp::attribute::IppAttribute;
use tokio::sync::RwLock;
use uuid::Uuid;

use druckwerk_core::types::{Event, Events};

pub type SubscriptionRef = Arc<RwLock<Subscription>>;

/// Retained events per subscription; older entries are dropped and
/// `first_sequence` advances.
const MAX_RETAINED_EVENTS: usize = 100;

/// One delivered event: the attributes of an event-notification group.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub sequence: i32,
    pub event: Event,
    pub attrs: Vec<IppAttribute>,
}

/// A standing request to collect state-change events.
#[derive(Debug)]
pub struct Subscription {
    pub id: i32,
    pub uuid: Uuid,
    pub username: String,
    /// Scope: a printer, a job on that printer, a resource, or the
    /// system when all are `None`.
    pub printer_id: Option<i32>,
    pub job_id: Option<i32>,
    pub resource_id: Option<i32>,
    pub events: Events,
    pub charset: String,
    pub language: String,
    pub user_data: Option<Vec<u8>>,
    /// Suggested polling interval in seconds (0 = none).
    pub interval: i32,
    /// Lease duration in seconds; 0 means "until shutdown".
    pub lease: i32,
    pub expire: Option<DateTime<Utc>>,
    pub first_sequence: i32,
    pub last_sequence: i32,
    log: VecDeque<EventRecord>,
}

impl Subscription {
    pub fn new(id: i32, username: &str, events: Events, lease: i32) -> Self {
        Self {
            id,
            uuid: Uuid::new_v4(),
            username: username.to_string(),
            printer_id: None,
            job_id: None,
            resource_id: None,
            events,
            charset: "utf-8".to_string(),
            language: "en".to_string(),
            user_data: None,
            interval: 0,
            lease,
            expire: lease_expiry(lease),
            first_sequence: 1,
            last_sequence: 0,
            log: VecDeque::new(),
        }
    }

    pub fn renew(&mut self, lease: i32) {
        self.lease = lease;
        self.expire = lease_expiry(lease);
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire.is_some_and(|e| now > e)
    }

    /// Whether this subscription wants the event for the given scope.
    pub fn matches(&self, event: Event, printer_id: Option<i32>, job_id: Option<i32>) -> bool {
        if !self.events.contains(event) {
            return false;
        }
        if let Some(want_job) = self.job_id {
            return self.printer_id == printer_id && job_id == Some(want_job);
        }
        if let Some(want_printer) = self.printer_id {
            return printer_id == Some(want_printer);
        }
        // System subscriptions see everything.
        true
    }

    /// Append an event and return its sequence number.
    pub fn append(&mut self, event: Event, attrs: Vec<IppAttribute>) -> i32 {
        self.last_sequence += 1;
        self.log.push_back(EventRecord {
            sequence: self.last_sequence,
            event,
            attrs,
        });
        while self.log.len() > MAX_RETAINED_EVENTS {
            self.log.pop_front();
            self.first_sequence += 1;
        }
        self.last_sequence
    }

    /// Events with `sequence >= max(seq, first_sequence)`.
    pub fn events_since(&self, seq: i32) -> impl Iterator<Item = &EventRecord> {
        let floor = seq.max(self.first_sequence);
        self.log.iter().filter(move |r| r.sequence >= floor)
    }
}

fn lease_expiry(lease: i32) -> Option<DateTime<Utc>> {
    if lease == 0 {
        None
    } else {
        Some(Utc::now() + Duration::seconds(i64::from(lease)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use druckwerk_core::types::Event;

    fn sub() -> Subscription {
        Subscription::new(1, "alice", Events::from(Event::JobCompleted), 3600)
    }

    #[test]
    fn sequences_are_monotone_and_bounded_by_first_and_last() {
        let mut s = sub();
        assert_eq!(s.first_sequence, 1);
        assert_eq!(s.last_sequence, 0);

        for i in 1..=5 {
            assert_eq!(s.append(Event::JobCompleted, Vec::new()), i);
        }
        for r in s.events_since(1) {
            assert!(s.first_sequence <= r.sequence && r.sequence <= s.last_sequence);
        }
    }

    #[test]
    fn events_since_respects_first_sequence_floor() {
        let mut s = sub();
        for _ in 0..3 {
            s.append(Event::JobCompleted, Vec::new());
        }
        let seqs: Vec<i32> = s.events_since(2).map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![2, 3]);

        // A request below first_sequence is clamped up.
        let seqs: Vec<i32> = s.events_since(-10).map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn log_cap_advances_first_sequence() {
        let mut s = sub();
        for _ in 0..(MAX_RETAINED_EVENTS + 10) {
            s.append(Event::JobCompleted, Vec::new());
        }
        assert_eq!(s.first_sequence, 11);
        assert_eq!(s.last_sequence, (MAX_RETAINED_EVENTS + 10) as i32);
        assert_eq!(s.events_since(1).count(), MAX_RETAINED_EVENTS);
    }

    #[test]
    fn zero_lease_never_expires() {
        let s = Subscription::new(1, "alice", Events::NONE, 0);
        assert!(s.expire.is_none());
        assert!(!s.is_expired(Utc::now() + Duration::days(365)));
    }

    #[test]
    fn scope_matching() {
        let mut s = sub();
        s.printer_id = Some(7);
        assert!(s.matches(Event::JobCompleted, Some(7), Some(1)));
        assert!(!s.matches(Event::JobCompleted, Some(8), None));
        assert!(!s.matches(Event::PrinterStateChanged, Some(7), None));

        s.job_id = Some(3);
        assert!(s.matches(Event::JobCompleted, Some(7), Some(3)));
        assert!(!s.matches(Event::JobCompleted, Some(7), Some(4)));

        let system = Subscription::new(2, "root", Events::from(Event::PrinterStateChanged), 0);
        assert!(system.matches(Event::PrinterStateChanged, Some(7), None));
        assert!(system.matches(Event::PrinterStateChanged, None, None));
    }
}
