// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Server configuration.
//
// Loading these structs from disk or the command line is the embedding
// binary's business; the core only consumes the resolved values.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Resolved server settings consumed by the request-processing core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host name used when synthesizing printer/job/system URIs.
    pub host: String,
    /// Port used when synthesizing URIs (default 631).
    pub port: u16,
    /// Directory receiving spooled document files.
    pub spool_dir: PathBuf,
    /// Directory holding resource payload files.
    pub resource_dir: PathBuf,
    /// Directory searched for transform commands given as bare names.
    pub bin_dir: PathBuf,
    /// Transform command for locally processed jobs.  `None` means jobs
    /// complete directly after ingest (spool-only operation).
    pub transform_command: Option<String>,
    /// Default document format when none is supplied or detected.
    pub default_format: String,
    /// Require an authenticated username on privileged operations.
    pub require_auth: bool,
    /// Group granting administrative rights, if authentication is on.
    pub admin_group: Option<String>,
    /// Group granting proxy rights for auto-created infrastructure
    /// printers.
    pub proxy_group: Option<String>,
    /// Accept target URIs anywhere in the operation group rather than
    /// strictly third, per the RFC 8011 relaxation knob.
    pub relaxed: bool,
    /// Directories from which `file:` document URIs may be printed.
    pub file_directories: Vec<PathBuf>,
    /// Default notify-lease-duration in seconds.  0 means "until shutdown".
    pub default_lease_seconds: i32,
    /// Upper bound on queued jobs per printer before
    /// `server-error-too-many-jobs` is returned.
    pub max_jobs: usize,
    /// Upper bound on live subscriptions.
    pub max_subscriptions: usize,
    /// Maximum output devices attachable to a proxied printer.
    pub max_devices: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 631,
            spool_dir: PathBuf::from("spool"),
            resource_dir: PathBuf::from("resources"),
            bin_dir: PathBuf::from("/usr/libexec/druckwerk"),
            transform_command: None,
            default_format: "application/octet-stream".into(),
            require_auth: false,
            admin_group: None,
            proxy_group: None,
            relaxed: true,
            file_directories: Vec::new(),
            default_lease_seconds: 86400,
            max_jobs: 100,
            max_subscriptions: 100,
            max_devices: 4,
        }
    }
}
