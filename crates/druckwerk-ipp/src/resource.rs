// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Resource objects: ICC profiles, string catalogs, and create-request
// templates, with the pending/available/installed lifecycle.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ipp::attribute::IppAttribute;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use druckwerk_core::types::{ResourceState, ResourceType};

pub type ResourceRef = Arc<RwLock<Resource>>;

/// A server-managed file or template referenced by printers and jobs.
#[derive(Debug)]
pub struct Resource {
    pub id: i32,
    pub uuid: Uuid,
    pub rtype: ResourceType,
    pub name: String,
    pub info: Option<String>,
    pub format: Option<String>,
    pub state: ResourceState,
    pub filename: Option<PathBuf>,
    /// SHA-256 of the payload, hex-encoded.
    pub signature: Option<String>,
    pub use_count: u32,
    /// Cancel requested while in use; applied when the use count drops.
    pub cancel_pending: bool,
    /// Description attributes; for template resources these are the
    /// attribute sets merged into create requests.
    pub attrs: HashMap<String, IppAttribute>,
    pub created: DateTime<Utc>,
    pub state_changed: DateTime<Utc>,
}

/// Illegal resource lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("resource is not in the required state")]
pub struct ResourceStateError;

impl Resource {
    pub fn new(id: i32, rtype: ResourceType, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id,
            uuid: Uuid::new_v4(),
            rtype,
            name: name.to_string(),
            info: None,
            format: None,
            state: ResourceState::Pending,
            filename: None,
            signature: None,
            use_count: 0,
            cancel_pending: false,
            attrs: HashMap::new(),
            created: now,
            state_changed: now,
        }
    }

    /// Record uploaded payload data: pending -> available.
    pub fn set_data(&mut self, filename: PathBuf, data: &[u8]) -> Result<(), ResourceStateError> {
        if self.state != ResourceState::Pending {
            return Err(ResourceStateError);
        }
        self.signature = Some(hex::encode(Sha256::digest(data)));
        self.filename = Some(filename);
        self.enter(ResourceState::Available);
        Ok(())
    }

    /// Install an available resource: available -> installed.
    pub fn install(&mut self) -> Result<(), ResourceStateError> {
        if self.state != ResourceState::Available {
            return Err(ResourceStateError);
        }
        self.enter(ResourceState::Installed);
        Ok(())
    }

    /// Cancel the resource.  While allocated to a printer the transition
    /// is deferred until the last user releases it.
    pub fn cancel(&mut self) -> Result<(), ResourceStateError> {
        if self.state.is_terminal() {
            return Err(ResourceStateError);
        }
        if self.use_count > 0 {
            self.cancel_pending = true;
        } else {
            self.enter(ResourceState::Canceled);
        }
        Ok(())
    }

    pub fn abort(&mut self) {
        if !self.state.is_terminal() {
            self.enter(ResourceState::Aborted);
        }
    }

    pub fn acquire(&mut self) {
        self.use_count += 1;
    }

    pub fn release(&mut self) {
        self.use_count = self.use_count.saturating_sub(1);
        if self.use_count == 0 && self.cancel_pending {
            self.cancel_pending = false;
            self.enter(ResourceState::Canceled);
        }
    }

    fn enter(&mut self, state: ResourceState) {
        self.state = state;
        self.state_changed = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_pending_available_installed() {
        let mut r = Resource::new(1, ResourceType::StaticIccProfile, "profile");
        assert_eq!(r.state, ResourceState::Pending);
        assert!(r.install().is_err());

        r.set_data(PathBuf::from("r1.icc"), b"icc-bytes").unwrap();
        assert_eq!(r.state, ResourceState::Available);
        assert!(r.signature.is_some());
        assert!(r.set_data(PathBuf::from("again"), b"x").is_err());

        r.install().unwrap();
        assert_eq!(r.state, ResourceState::Installed);
    }

    #[test]
    fn signature_is_sha256_of_payload() {
        let mut r = Resource::new(1, ResourceType::StaticStrings, "strings");
        r.set_data(PathBuf::from("r1.strings"), b"hello").unwrap();
        assert_eq!(
            r.signature.as_deref(),
            Some("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
    }

    #[test]
    fn cancel_defers_while_in_use() {
        let mut r = Resource::new(1, ResourceType::StaticImage, "icon");
        r.set_data(PathBuf::from("r1.png"), b"png").unwrap();
        r.install().unwrap();

        r.acquire();
        r.cancel().unwrap();
        assert_eq!(r.state, ResourceState::Installed);
        assert!(r.cancel_pending);

        r.release();
        assert_eq!(r.state, ResourceState::Canceled);
        assert!(!r.cancel_pending);

        // Terminal is sticky.
        assert!(r.cancel().is_err());
    }
}
