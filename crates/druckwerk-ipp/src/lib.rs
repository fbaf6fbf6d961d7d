// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Druckwerk IPP server core.
//
// This crate implements the request-processing engine of an IPP/2.x
// server: attribute validation, the Printer/Job/Subscription/Resource
// object stores and state machines, ~60 operation handlers, document
// ingest, the transform subprocess supervisor, pull notifications, and
// the Shared Infrastructure (proxy/fetch) protocol.
//
// The binary wire codec, HTTP transport, TLS, and DNS-SD advertisement
// are external collaborators.  Requests arrive as decoded attribute
// groups (`msg::IppMsg`) bound to a per-request `client::Client`; the
// dispatcher in `ops` produces the response message the transport encodes
// and sends.

pub mod attrs;
pub mod auth;
pub mod client;
pub mod device;
pub mod events;
pub mod geo;
pub mod ingest;
pub mod job;
pub mod msg;
pub mod names;
pub mod ops;
pub mod printer;
pub mod resource;
pub mod scheduler;
pub mod store;
pub mod subscription;
pub mod system;
pub mod transform;

pub use client::Client;
pub use msg::{AttrGroup, GroupTag, IppMsg, ServerOp};
pub use system::SystemContext;


#[cfg(test)]
mod __send_probe {
    fn assert_send<T: Send>(_: T) {}
    #[test]
    fn probe() {
        assert_send(crate::scheduler::check_jobs(&std::sync::Arc::new(todo!()), &std::sync::Arc::new(tokio::sync::RwLock::new(todo!()))));
    }
}
