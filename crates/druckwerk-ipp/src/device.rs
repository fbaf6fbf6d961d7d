// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Output devices bound to a proxied printer, and the sparse in-place
// attribute edits they send via Update-Output-Device-Attributes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ipp::attribute::IppAttribute;
use ipp::value::IppValue;
use tokio::sync::RwLock;
use uuid::Uuid;

use druckwerk_core::types::{PrinterReasons, PrinterState};

use crate::attrs::syntax_of;
use crate::msg;

pub type DeviceRef = Arc<RwLock<OutputDevice>>;

/// An output device registered against a proxied printer.
#[derive(Debug)]
pub struct OutputDevice {
    pub uuid: Uuid,
    /// Last reported printer attribute bag.
    pub attrs: HashMap<String, IppAttribute>,
    pub last_seen: DateTime<Utc>,
}

impl OutputDevice {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            attrs: HashMap::new(),
            last_seen: Utc::now(),
        }
    }

    /// Device-reported printer-state, if any.
    pub fn state(&self) -> Option<PrinterState> {
        self.attrs
            .get("printer-state")
            .and_then(msg::attr_int)
            .and_then(PrinterState::from_i32)
    }

    /// Device-reported printer-state-reasons.
    pub fn state_reasons(&self) -> PrinterReasons {
        let Some(attr) = self.attrs.get("printer-state-reasons") else {
            return PrinterReasons::NONE;
        };
        msg::as_values(attr.value())
            .filter_map(msg::string_of)
            .filter_map(druckwerk_core::types::PrinterReason::from_keyword)
            .collect()
    }

    /// Replace-or-delete a whole attribute (plain, non-sparse name).
    pub fn apply_whole(&mut self, attr: &IppAttribute) {
        if msg::is_delete_attribute(attr.value()) {
            self.attrs.remove(attr.name());
        } else {
            self.attrs
                .insert(attr.name().to_string(), attr.clone());
        }
    }

    /// Apply a sparse `name.N` / `name.N-M` edit.  Returns false when the
    /// edit is rejected (unknown base attribute, bad range, or value-tag
    /// mismatch) so the caller can echo the attribute as unsupported.
    pub fn apply_sparse(&mut self, base: &str, low: usize, high: usize, attr: &IppAttribute) -> bool {
        if low < 1 || low > high {
            return false;
        }

        let Some(existing) = self.attrs.get_mut(base) else {
            return false;
        };

        let mut values = match existing.value().clone() {
            IppValue::Array(v) => v,
            single => vec![single],
        };

        if msg::is_delete_attribute(attr.value()) {
            let end = high.min(values.len());
            if low <= end {
                values.drain(low - 1..end);
            }
        } else {
            let new: Vec<IppValue> = msg::as_values(attr.value()).cloned().collect();
            if new.is_empty() {
                return false;
            }
            if values
                .first()
                .is_some_and(|v| syntax_of(v) != syntax_of(&new[0]))
            {
                return false;
            }
            splice_values(&mut values, low, high, &new);
        }

        let name = base.to_string();
        let value = if values.len() == 1 {
            values.pop().unwrap_or(IppValue::NoValue)
        } else {
            IppValue::Array(values)
        };
        self.attrs.insert(name.clone(), IppAttribute::new(&name, value));
        true
    }
}

/// Edit the 1-based index range `[low, high]` of a value list.
///
/// With exactly `high - low + 1` replacement values this is an in-place
/// replace.  With fewer, the remainder of the range is deleted.  With
/// more, the values from position `high` onward are shifted up so the
/// list grows while everything outside the range keeps its relative
/// order.
fn splice_values(values: &mut Vec<IppValue>, low: usize, high: usize, new: &[IppValue]) {
    let span = high - low + 1;

    match new.len().cmp(&span) {
        std::cmp::Ordering::Equal => {
            for (i, v) in new.iter().enumerate() {
                let idx = low - 1 + i;
                if idx < values.len() {
                    values[idx] = v.clone();
                } else {
                    values.push(v.clone());
                }
            }
        }
        std::cmp::Ordering::Less => {
            for (i, v) in new.iter().enumerate() {
                let idx = low - 1 + i;
                if idx < values.len() {
                    values[idx] = v.clone();
                } else {
                    values.push(v.clone());
                }
            }
            let start = low - 1 + new.len();
            let end = high.min(values.len());
            if start < end {
                values.drain(start..end);
            }
        }
        std::cmp::Ordering::Greater => {
            if high <= values.len() {
                let tail = values.split_off(high - 1);
                values.truncate(low - 1);
                values.extend_from_slice(&new[..span]);
                values.extend(tail);
            } else {
                // Range runs past the end: plain replace-and-extend.
                values.truncate(low - 1);
                values.extend_from_slice(new);
            }
        }
    }
}

/// Split `name.N` / `name.N-M` into the base name and index range.
pub fn parse_sparse_name(name: &str) -> Option<(&str, usize, usize)> {
    let dot = name.rfind('.')?;
    let suffix = &name[dot + 1..];
    if !suffix.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }

    let (base, range) = (&name[..dot], suffix);
    if let Some((lo, hi)) = range.split_once('-') {
        let low = lo.parse().ok()?;
        let high = hi.parse().ok()?;
        Some((base, low, high))
    } else {
        let low = range.parse().ok()?;
        Some((base, low, low))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media_ready(values: &[&str]) -> IppAttribute {
        IppAttribute::new(
            "media-ready",
            IppValue::Array(
                values
                    .iter()
                    .map(|v| IppValue::Keyword(v.to_string()))
                    .collect(),
            ),
        )
    }

    fn keywords(device: &OutputDevice, name: &str) -> Vec<String> {
        msg::as_values(device.attrs[name].value())
            .filter_map(msg::string_of)
            .map(str::to_string)
            .collect()
    }

    fn device_with_five() -> OutputDevice {
        let mut d = OutputDevice::new(Uuid::new_v4());
        d.apply_whole(&media_ready(&["m1", "m2", "m3", "m4", "m5"]));
        d
    }

    #[test]
    fn sparse_name_parsing() {
        assert_eq!(parse_sparse_name("media-ready.3"), Some(("media-ready", 3, 3)));
        assert_eq!(
            parse_sparse_name("media-ready.2-4"),
            Some(("media-ready", 2, 4))
        );
        assert_eq!(parse_sparse_name("media-ready"), None);
        assert_eq!(parse_sparse_name("media-ready.x"), None);
    }

    #[test]
    fn single_index_replace_keeps_length() {
        let mut d = device_with_five();
        let edit = IppAttribute::new(
            "media-ready.3",
            IppValue::Keyword("na_letter_8.5x11in".into()),
        );
        assert!(d.apply_sparse("media-ready", 3, 3, &edit));
        assert_eq!(
            keywords(&d, "media-ready"),
            ["m1", "m2", "na_letter_8.5x11in", "m4", "m5"]
        );
    }

    #[test]
    fn oversupplied_range_inserts_and_preserves_tail() {
        let mut d = device_with_five();
        let edit = IppAttribute::new(
            "media-ready.3",
            IppValue::Array(vec![
                IppValue::Keyword("new1".into()),
                IppValue::Keyword("new2".into()),
            ]),
        );
        assert!(d.apply_sparse("media-ready", 3, 3, &edit));
        // Six values: originals 1-2 keep their slots, originals 3-5 land
        // at 4-6.
        assert_eq!(
            keywords(&d, "media-ready"),
            ["m1", "m2", "new1", "m3", "m4", "m5"]
        );
    }

    #[test]
    fn undersupplied_range_deletes_the_remainder() {
        let mut d = device_with_five();
        let edit = IppAttribute::new("media-ready.2-4", IppValue::Keyword("only".into()));
        assert!(d.apply_sparse("media-ready", 2, 4, &edit));
        assert_eq!(keywords(&d, "media-ready"), ["m1", "only", "m5"]);
    }

    #[test]
    fn delete_marker_removes_range() {
        let mut d = device_with_five();
        let edit = IppAttribute::new("media-ready.2-3", msg::delete_attribute());
        assert!(d.apply_sparse("media-ready", 2, 3, &edit));
        assert_eq!(keywords(&d, "media-ready"), ["m1", "m4", "m5"]);
    }

    #[test]
    fn value_tag_mismatch_is_rejected() {
        let mut d = device_with_five();
        let edit = IppAttribute::new("media-ready.3", IppValue::Integer(42));
        assert!(!d.apply_sparse("media-ready", 3, 3, &edit));
        assert_eq!(keywords(&d, "media-ready"), ["m1", "m2", "m3", "m4", "m5"]);
    }

    #[test]
    fn unknown_base_attribute_is_rejected() {
        let mut d = OutputDevice::new(Uuid::new_v4());
        let edit = IppAttribute::new("media-ready.1", IppValue::Keyword("x".into()));
        assert!(!d.apply_sparse("media-ready", 1, 1, &edit));
    }

    #[test]
    fn whole_attribute_delete_and_replace() {
        let mut d = device_with_five();
        d.apply_whole(&IppAttribute::new("media-ready", msg::delete_attribute()));
        assert!(!d.attrs.contains_key("media-ready"));

        d.apply_whole(&IppAttribute::new(
            "printer-state",
            IppValue::Enum(PrinterState::Stopped.as_i32()),
        ));
        assert_eq!(d.state(), Some(PrinterState::Stopped));
    }
}
