// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Attribute validation against per-operation value-tag tables.
//
// Every create/set operation funnels its request through `check_values`
// with a static table describing the expected syntax, the alternate
// syntax, and the cardinality of each known attribute.  Offenses are
// returned to the caller, which echoes them into the response's
// unsupported group (or substitutes `not-settable` for Set-xxx).

use chrono::{Datelike, Timelike, Utc};
use ipp::attribute::IppAttribute;
use ipp::value::IppValue;

use crate::msg::{self, GroupTag, IppMsg, ServerOp};

/// Value syntaxes distinguished by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    Integer,
    Boolean,
    Enum,
    OctetString,
    DateTime,
    Resolution,
    Range,
    Collection,
    Text,
    Name,
    Keyword,
    Uri,
    UriScheme,
    Charset,
    Language,
    Mime,
    NoValue,
    Unknown,
    Other,
}

/// Syntax of a single value.  `nameWithLanguage`/`textWithLanguage`
/// deliberately collapse onto `Name`/`Text`.
pub fn syntax_of(value: &IppValue) -> Syntax {
    match value {
        IppValue::Integer(_) => Syntax::Integer,
        IppValue::Boolean(_) => Syntax::Boolean,
        IppValue::Enum(_) => Syntax::Enum,
        IppValue::OctetString(_) => Syntax::OctetString,
        IppValue::DateTime { .. } => Syntax::DateTime,
        IppValue::Resolution { .. } => Syntax::Resolution,
        IppValue::RangeOfInteger { .. } => Syntax::Range,
        IppValue::Collection(_) => Syntax::Collection,
        IppValue::TextWithoutLanguage(_) | IppValue::TextWithLanguage { .. } => Syntax::Text,
        IppValue::NameWithoutLanguage(_) | IppValue::NameWithLanguage { .. } => Syntax::Name,
        IppValue::Keyword(_) | IppValue::MemberAttrName(_) => Syntax::Keyword,
        IppValue::Uri(_) => Syntax::Uri,
        IppValue::UriScheme(_) => Syntax::UriScheme,
        IppValue::Charset(_) => Syntax::Charset,
        IppValue::NaturalLanguage(_) => Syntax::Language,
        IppValue::MimeMediaType(_) => Syntax::Mime,
        IppValue::NoValue => Syntax::NoValue,
        IppValue::Array(v) => v.first().map_or(Syntax::Other, syntax_of),
        IppValue::Other { tag, .. } if *tag == 0x12 => Syntax::Unknown,
        IppValue::Other { .. } => Syntax::Other,
    }
}

/// One row of a value-check table.
#[derive(Debug, Clone, Copy)]
pub struct ValueCheck {
    pub name: &'static str,
    pub tag: Syntax,
    pub alt: Option<Syntax>,
    /// 1setOf allowed.
    pub multi: bool,
    /// May appear in the operation group on create operations.
    pub create_op: bool,
}

impl ValueCheck {
    pub const fn new(name: &'static str, tag: Syntax) -> Self {
        Self {
            name,
            tag,
            alt: None,
            multi: false,
            create_op: false,
        }
    }

    pub const fn or(mut self, alt: Syntax) -> Self {
        self.alt = Some(alt);
        self
    }

    pub const fn set_of(mut self) -> Self {
        self.multi = true;
        self
    }

    pub const fn create(mut self) -> Self {
        self.create_op = true;
        self
    }

    fn matches(&self, value: &IppValue) -> bool {
        let syntax = syntax_of(value);
        syntax == self.tag || self.alt == Some(syntax)
    }
}

/// A validation failure to be echoed into the response.  Offenses carry
/// owned copies so the caller can mutate the response freely.
#[derive(Debug)]
pub enum Offense {
    /// Attribute name is not in the supported list.
    NotSupported(IppAttribute),
    /// Attribute name is not settable (Set-xxx only).
    NotSettable(String),
    /// Attribute placed in the wrong group.
    WrongGroup(IppAttribute),
    /// Value tag or cardinality mismatch.
    BadValue(IppAttribute),
}

/// Check the attributes of `group` against the supported list and the
/// value table.  Mirrors the short-circuit behavior of the original
/// implementation: the first offense ends the scan.
pub fn check_values(
    request: &IppMsg,
    op: ServerOp,
    group: GroupTag,
    supported: Option<&IppAttribute>,
    checks: &[ValueCheck],
) -> Option<Offense> {
    if let Some(supported) = supported {
        for g in request.groups_of(group) {
            for attr in &g.attrs {
                if !msg::contains_string(supported, attr.name()) {
                    return Some(if op.is_set_op() {
                        Offense::NotSettable(attr.name().to_string())
                    } else {
                        Offense::NotSupported(attr.clone())
                    });
                }
            }
        }
    }

    for check in checks {
        let Some((found_group, attr)) = find_with_group(request, check.name) else {
            continue;
        };

        if found_group != group
            && !(check.create_op && op.is_create_op() && found_group == GroupTag::Operation)
        {
            return Some(Offense::WrongGroup(attr.clone()));
        }

        if !check.matches(attr.value()) {
            return Some(Offense::BadValue(attr.clone()));
        }

        if msg::value_count(attr) > 1 && !check.multi {
            return Some(Offense::BadValue(attr.clone()));
        }
    }

    None
}

fn find_with_group<'a>(request: &'a IppMsg, name: &str) -> Option<(GroupTag, &'a IppAttribute)> {
    request
        .groups
        .iter()
        .find_map(|g| g.get(name).map(|a| (g.tag, a)))
}

// ---------------------------------------------------------------------------
// Attribute serializer (transform environment, logging)
// ---------------------------------------------------------------------------

/// Render an attribute's value(s) the way the transform environment and
/// the event log expect: comma-joined, `WxHdpi` resolutions, `L-U`
/// ranges, `{member=value ...}` collections.
pub fn attribute_string(attr: &IppAttribute) -> String {
    msg::as_values(attr.value())
        .map(value_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn value_string(value: &IppValue) -> String {
    match value {
        IppValue::Integer(i) | IppValue::Enum(i) => i.to_string(),
        IppValue::Boolean(b) => if *b { "true" } else { "false" }.to_string(),
        IppValue::RangeOfInteger { min, max } => format!("{min}-{max}"),
        IppValue::Resolution {
            cross_feed,
            feed,
            units,
        } => {
            let suffix = match units {
                3 => "dpi",
                4 => "dpcm",
                _ => "unknown",
            };
            format!("{cross_feed}x{feed}{suffix}")
        }
        IppValue::DateTime {
            year,
            month,
            day,
            hour,
            minutes,
            seconds,
            ..
        } => format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minutes:02}:{seconds:02}"),
        IppValue::Collection(members) => {
            let body = members
                .iter()
                .map(|(name, v)| format!("{name}={}", value_string(v)))
                .collect::<Vec<_>>()
                .join(" ");
            format!("{{{body}}}")
        }
        IppValue::Array(values) => values
            .iter()
            .map(value_string)
            .collect::<Vec<_>>()
            .join(","),
        IppValue::NoValue => "no-value".to_string(),
        IppValue::Other { tag, .. } => format!("tag-{tag:02x}"),
        other => msg::string_of(other).unwrap_or_default().to_string(),
    }
}

/// Build an IPP dateTime value from a wall-clock timestamp.
pub fn date_time_value(dt: chrono::DateTime<Utc>) -> IppValue {
    IppValue::DateTime {
        year: dt.year() as u16,
        month: dt.month() as u8,
        day: dt.day() as u8,
        hour: dt.hour() as u8,
        minutes: dt.minute() as u8,
        seconds: dt.second() as u8,
        deci_seconds: 0,
        utc_dir: '+',
        utc_hours: 0,
        utc_mins: 0,
    }
}

// ---------------------------------------------------------------------------
// Value tables
// ---------------------------------------------------------------------------

use Syntax::*;

/// Value tags for job create/set attributes.
pub const JOB_VALUES: &[ValueCheck] = &[
    ValueCheck::new("chamber-humidity", Integer),
    ValueCheck::new("chamber-temperature", Integer),
    ValueCheck::new("copies", Integer),
    ValueCheck::new("cover-back", Collection),
    ValueCheck::new("cover-front", Collection),
    ValueCheck::new("document-message", Text).create(),
    ValueCheck::new("document-metadata", OctetString).set_of().create(),
    ValueCheck::new("document-name", Name).create(),
    ValueCheck::new("finishings", Enum).set_of(),
    ValueCheck::new("finishings-col", Collection).set_of(),
    ValueCheck::new("imposition-template", Keyword).or(Name),
    ValueCheck::new("insert-sheet", Collection).set_of(),
    ValueCheck::new("job-account-id", Name).or(NoValue),
    ValueCheck::new("job-account-type", Keyword).or(Name),
    ValueCheck::new("job-accounting-sheets", Collection).or(NoValue),
    ValueCheck::new("job-accounting-user-id", Name).or(NoValue),
    ValueCheck::new("job-delay-output-until", Keyword).or(Name),
    ValueCheck::new("job-delay-output-until-time", DateTime),
    ValueCheck::new("job-error-action", Keyword),
    ValueCheck::new("job-error-sheet", Collection).or(NoValue),
    ValueCheck::new("job-hold-until", Keyword).or(Name).create(),
    ValueCheck::new("job-hold-until-time", DateTime).create(),
    ValueCheck::new("job-message-to-operator", Text),
    ValueCheck::new("job-name", Name).create(),
    ValueCheck::new("job-pages-per-set-supported", Boolean),
    ValueCheck::new("job-phone-number", Uri).or(NoValue),
    ValueCheck::new("job-priority", Integer),
    ValueCheck::new("job-recipient-name", Name).or(NoValue),
    ValueCheck::new("job-retain-until", Keyword).or(Name),
    ValueCheck::new("job-retain-until-time", DateTime),
    ValueCheck::new("job-sheet-message", Text),
    ValueCheck::new("job-sheets-col", Collection),
    ValueCheck::new("job-sheets", Keyword).or(Name),
    ValueCheck::new("materials-col", Collection).set_of(),
    ValueCheck::new("media-col", Collection),
    ValueCheck::new("media", Keyword).or(Name),
    ValueCheck::new("multiple-document-handling", Keyword),
    ValueCheck::new("multiple-object-handling", Keyword),
    ValueCheck::new("number-up", Integer),
    ValueCheck::new("orientation-requested", Enum).or(NoValue),
    ValueCheck::new("output-bin", Keyword).or(Name),
    ValueCheck::new("overrides", Collection).set_of(),
    ValueCheck::new("page-delivery", Keyword),
    ValueCheck::new("page-ranges", Range).set_of(),
    ValueCheck::new("platform-temperature", Integer),
    ValueCheck::new("presentation-direction-number-up", Keyword),
    ValueCheck::new("print-accuracy", Collection),
    ValueCheck::new("print-base", Keyword),
    ValueCheck::new("print-color-mode", Keyword),
    ValueCheck::new("print-content-optimize", Keyword),
    ValueCheck::new("print-objects", Collection),
    ValueCheck::new("print-quality", Enum),
    ValueCheck::new("print-rendering-intent", Keyword),
    ValueCheck::new("print-scaling", Keyword),
    ValueCheck::new("print-supports", Keyword),
    ValueCheck::new("printer-resolution", Resolution),
    ValueCheck::new("proof-print", Collection).or(NoValue),
    ValueCheck::new("separator-sheets", Collection),
    ValueCheck::new("sides", Keyword),
    ValueCheck::new("x-image-position", Keyword),
    ValueCheck::new("x-image-shift", Integer),
    ValueCheck::new("x-side1-image-shift", Integer),
    ValueCheck::new("x-side2-image-shift", Integer),
    ValueCheck::new("y-image-position", Keyword),
    ValueCheck::new("y-image-shift", Integer),
    ValueCheck::new("y-side1-image-shift", Integer),
    ValueCheck::new("y-side2-image-shift", Integer),
];

/// Value tags for printer create/set attributes.
pub const PRINTER_VALUES: &[ValueCheck] = &[
    ValueCheck::new("chamber-humidity-default", Integer),
    ValueCheck::new("chamber-humidity-supported", Boolean),
    ValueCheck::new("chamber-temperature-default", Integer),
    ValueCheck::new("chamber-temperature-supported", Integer).or(Range).set_of(),
    ValueCheck::new("coating-sides-supported", Keyword).set_of(),
    ValueCheck::new("coating-type-supported", Keyword).or(Name).set_of(),
    ValueCheck::new("color-supported", Boolean),
    ValueCheck::new("copies-default", Integer),
    ValueCheck::new("copies-supported", Range),
    ValueCheck::new("cover-back-default", Collection),
    ValueCheck::new("cover-back-supported", Keyword).set_of(),
    ValueCheck::new("cover-front-default", Collection),
    ValueCheck::new("cover-front-supported", Keyword).set_of(),
    ValueCheck::new("covering-name-supported", Keyword).or(Name).set_of(),
    ValueCheck::new("document-creation-attributes-supported", Keyword).set_of(),
    ValueCheck::new("document-format-default", Mime),
    ValueCheck::new("document-format-supported", Mime).set_of(),
    ValueCheck::new("finishing-template-supported", Keyword).or(Name).set_of(),
    ValueCheck::new("finishings-default", Enum).set_of(),
    ValueCheck::new("finishings-ready", Enum).set_of(),
    ValueCheck::new("finishings-supported", Enum).set_of(),
    ValueCheck::new("finishings-col-database", Collection).set_of(),
    ValueCheck::new("finishings-col-default", Collection).set_of(),
    ValueCheck::new("finishings-col-ready", Collection).set_of(),
    ValueCheck::new("finishings-col-supported", Keyword).set_of(),
    ValueCheck::new("folding-direction-supported", Keyword).set_of(),
    ValueCheck::new("folding-offset-supported", Integer).or(Range).set_of(),
    ValueCheck::new("folding-reference-edge-supported", Keyword).set_of(),
    ValueCheck::new("imposition-template-default", Keyword).or(Name),
    ValueCheck::new("imposition-template-supported", Keyword).or(Name).set_of(),
    ValueCheck::new("insert-sheet-default", Collection).set_of(),
    ValueCheck::new("insert-sheet-supported", Keyword).set_of(),
    ValueCheck::new("job-account-id-default", Name).or(NoValue),
    ValueCheck::new("job-account-id-supported", Boolean),
    ValueCheck::new("job-account-type-default", Keyword).or(Name),
    ValueCheck::new("job-account-type-supported", Keyword).or(Name).set_of(),
    ValueCheck::new("job-accounting-sheets-default", Collection).or(NoValue),
    ValueCheck::new("job-accounting-sheets-supported", Keyword).set_of(),
    ValueCheck::new("job-accounting-user-id-default", Name).or(NoValue),
    ValueCheck::new("job-accounting-user-id-supported", Boolean),
    ValueCheck::new("job-authorization-uri-supported", Boolean),
    ValueCheck::new("job-constraints-supported", Collection).set_of(),
    ValueCheck::new("job-creation-attributes-supported", Keyword).set_of(),
    ValueCheck::new("job-delay-output-until-default", Keyword).or(Name),
    ValueCheck::new("job-error-action-default", Keyword),
    ValueCheck::new("job-error-action-supported", Keyword).set_of(),
    ValueCheck::new("job-error-sheet-default", Collection).or(NoValue),
    ValueCheck::new("job-error-sheet-supported", Keyword).set_of(),
    ValueCheck::new("job-hold-until-default", Keyword).or(Name),
    ValueCheck::new("job-message-to-operator-default", Text),
    ValueCheck::new("job-pages-per-set-supported", Boolean),
    ValueCheck::new("job-password-encryption-supported", Keyword).set_of(),
    ValueCheck::new("job-password-length-supported", Range),
    ValueCheck::new("job-password-repertoire-configured", Keyword),
    ValueCheck::new("job-password-repertoire-supported", Keyword).set_of(),
    ValueCheck::new("job-password-supported", Integer),
    ValueCheck::new("job-phone-number-default", Uri).or(NoValue),
    ValueCheck::new("job-phone-number-supported", Boolean),
    ValueCheck::new("job-presets-supported", Collection).set_of(),
    ValueCheck::new("job-priority-default", Integer),
    ValueCheck::new("job-recipient-name-default", Name).or(NoValue),
    ValueCheck::new("job-recipient-name-supported", Boolean),
    ValueCheck::new("job-resolvers-supported", Collection).set_of(),
    ValueCheck::new("job-retain-until-default", Keyword).or(Name),
    ValueCheck::new("job-sheet-message-default", Text),
    ValueCheck::new("job-sheet-message-supported", Boolean),
    ValueCheck::new("job-sheets-col-default", Collection),
    ValueCheck::new("job-sheets-col-supported", Keyword).set_of(),
    ValueCheck::new("job-sheets-default", Keyword).or(Name),
    ValueCheck::new("job-sheets-supported", Keyword).or(Name).set_of(),
    ValueCheck::new("job-triggers-supported", Collection).set_of(),
    ValueCheck::new("laminating-sides-supported", Keyword).set_of(),
    ValueCheck::new("laminating-type-supported", Keyword).or(Name).set_of(),
    ValueCheck::new("material-amount-units-supported", Keyword).set_of(),
    ValueCheck::new("material-diameter-supported", Integer).or(Range).set_of(),
    ValueCheck::new("material-nozzle-diameter-supported", Integer).or(Range).set_of(),
    ValueCheck::new("material-purpose-supported", Keyword).set_of(),
    ValueCheck::new("material-rate-supported", Integer).or(Range).set_of(),
    ValueCheck::new("material-rate-units-supported", Keyword).set_of(),
    ValueCheck::new("material-shell-thickness-supported", Integer).or(Range).set_of(),
    ValueCheck::new("material-temperature-supported", Integer).or(Range).set_of(),
    ValueCheck::new("material-type-supported", Keyword).set_of(),
    ValueCheck::new("materials-col-database", Collection).set_of(),
    ValueCheck::new("materials-col-default", Collection).set_of(),
    ValueCheck::new("materials-col-ready", Collection).set_of(),
    ValueCheck::new("materials-col-supported", Keyword).set_of(),
    ValueCheck::new("max-materials-col-supported", Integer),
    ValueCheck::new("max-stitching-locations-supported", Integer),
    ValueCheck::new("media-bottom-margin-supported", Integer).set_of(),
    ValueCheck::new("media-col-database", Collection).set_of(),
    ValueCheck::new("media-col-default", Collection),
    ValueCheck::new("media-col-ready", Collection).set_of(),
    ValueCheck::new("media-color-supported", Keyword).or(Name).set_of(),
    ValueCheck::new("media-default", Keyword).or(Name),
    ValueCheck::new("media-key-supported", Keyword).or(Name).set_of(),
    ValueCheck::new("media-ready", Keyword).or(Name).set_of(),
    ValueCheck::new("media-supported", Keyword).or(Name).set_of(),
    ValueCheck::new("media-left-margin-supported", Integer).set_of(),
    ValueCheck::new("media-right-margin-supported", Integer).set_of(),
    ValueCheck::new("media-size-supported", Collection).set_of(),
    ValueCheck::new("media-source-supported", Keyword).or(Name).set_of(),
    ValueCheck::new("media-top-margin-supported", Integer).set_of(),
    ValueCheck::new("media-type-supported", Keyword).or(Name).set_of(),
    ValueCheck::new("multiple-document-handling-default", Keyword),
    ValueCheck::new("multiple-document-jobs-supported", Boolean),
    ValueCheck::new("multiple-object-handling-default", Keyword),
    ValueCheck::new("multiple-operation-time-out-action", Keyword),
    ValueCheck::new("natural-language-configured", Language),
    ValueCheck::new("notify-events-default", Keyword).set_of(),
    ValueCheck::new("number-up-default", Integer),
    ValueCheck::new("number-up-supported", Integer).or(Range).set_of(),
    ValueCheck::new("orientation-requested-default", Enum).or(NoValue),
    ValueCheck::new("orientation-requested-supported", Enum).set_of(),
    ValueCheck::new("output-bin-default", Keyword).or(Name),
    ValueCheck::new("output-bin-supported", Keyword).or(Name).set_of(),
    ValueCheck::new("overrides-supported", Keyword).set_of(),
    ValueCheck::new("page-delivery-default", Keyword),
    ValueCheck::new("page-delivery-supported", Keyword).set_of(),
    ValueCheck::new("page-ranges-supported", Boolean),
    ValueCheck::new("pages-per-minute", Integer),
    ValueCheck::new("pages-per-minute-color", Integer),
    ValueCheck::new("pdl-override-supported", Keyword),
    ValueCheck::new("platform-shape", Keyword),
    ValueCheck::new("platform-temperature-default", Integer),
    ValueCheck::new("platform-temperature-supported", Integer).or(Range).set_of(),
    ValueCheck::new("presentation-direction-number-up-default", Keyword),
    ValueCheck::new("presentation-direction-number-up-supported", Keyword).set_of(),
    ValueCheck::new("print-accuracy-default", Collection),
    ValueCheck::new("print-accuracy-supported", Collection),
    ValueCheck::new("print-base-default", Keyword),
    ValueCheck::new("print-base-supported", Keyword).set_of(),
    ValueCheck::new("print-color-mode-default", Keyword),
    ValueCheck::new("print-color-mode-supported", Keyword).set_of(),
    ValueCheck::new("print-content-optimize-default", Keyword),
    ValueCheck::new("print-content-optimize-supported", Keyword).set_of(),
    ValueCheck::new("print-objects-default", Collection),
    ValueCheck::new("print-quality-default", Enum),
    ValueCheck::new("print-rendering-intent-default", Keyword),
    ValueCheck::new("print-rendering-intent-supported", Keyword).set_of(),
    ValueCheck::new("print-scaling-default", Keyword),
    ValueCheck::new("print-scaling-supported", Keyword).set_of(),
    ValueCheck::new("print-supports-default", Keyword),
    ValueCheck::new("print-supports-supported", Keyword).set_of(),
    ValueCheck::new("printer-charge-info", Text),
    ValueCheck::new("printer-charge-info-uri", Uri),
    ValueCheck::new("printer-contact-col", Collection).or(Unknown),
    ValueCheck::new("printer-device-id", Text),
    ValueCheck::new("printer-dns-sd-name", Name),
    ValueCheck::new("printer-geo-location", Uri),
    ValueCheck::new("printer-icc-profiles", Collection),
    ValueCheck::new("printer-info", Text),
    ValueCheck::new("printer-kind", Keyword).or(Name).set_of(),
    ValueCheck::new("printer-location", Text),
    ValueCheck::new("printer-make-and-model", Text),
    ValueCheck::new("printer-mandatory-job-attributes", Keyword),
    ValueCheck::new("printer-name", Name),
    ValueCheck::new("printer-organization", Text),
    ValueCheck::new("printer-organizational-unit", Text),
    ValueCheck::new("printer-resolution-default", Resolution),
    ValueCheck::new("printer-resolution-supported", Resolution).set_of(),
    ValueCheck::new("printer-volume-supported", Collection),
    ValueCheck::new("proof-print-default", Collection).or(NoValue),
    ValueCheck::new("proof-print-supported", Keyword).set_of(),
    ValueCheck::new("punching-hole-diameter-configured", Integer),
    ValueCheck::new("punching-locations-supported", Integer).or(Range).set_of(),
    ValueCheck::new("punching-offset-supported", Integer).or(Range).set_of(),
    ValueCheck::new("punching-reference-edge-supported", Keyword).set_of(),
    ValueCheck::new("pwg-raster-document-resolution-supported", Resolution).set_of(),
    ValueCheck::new("pwg-raster-document-sheet-back", Keyword),
    ValueCheck::new("pwg-raster-document-type-supported", Keyword).set_of(),
    ValueCheck::new("pwg-safe-gcode-supported", Text).set_of(),
    ValueCheck::new("separator-sheets-default", Collection),
    ValueCheck::new("separator-sheets-supported", Keyword).set_of(),
    ValueCheck::new("sides-default", Keyword),
    ValueCheck::new("sides-supported", Keyword).set_of(),
    ValueCheck::new("smi2699-auth-print-group", Name).or(NoValue),
    ValueCheck::new("smi2699-auth-proxy-group", Name).or(NoValue),
    ValueCheck::new("smi2699-device-command", Name).or(NoValue),
    ValueCheck::new("smi2699-device-format", Mime),
    ValueCheck::new("smi2699-device-name", Name),
    ValueCheck::new("smi2699-device-uri", Uri).or(NoValue),
    ValueCheck::new("smi2699-max-output-device", Integer),
    ValueCheck::new("stitching-angle-supported", Integer).or(Range).set_of(),
    ValueCheck::new("stitching-locations-supported", Integer).or(Range).set_of(),
    ValueCheck::new("stitching-method-supported", Keyword).set_of(),
    ValueCheck::new("stitching-offset-supported", Integer).or(Range).set_of(),
    ValueCheck::new("stitching-reference-edge-supported", Keyword).set_of(),
    ValueCheck::new("trimming-offset-supported", Integer).or(Range).set_of(),
    ValueCheck::new("trimming-reference-edge-supported", Keyword).set_of(),
    ValueCheck::new("trimming-type-supported", Keyword).set_of(),
    ValueCheck::new("trimming-when-supported", Keyword).set_of(),
    ValueCheck::new("urf-supported", Keyword).set_of(),
    ValueCheck::new("faxout-supported", Keyword).set_of(),
    ValueCheck::new("x-image-position-default", Keyword),
    ValueCheck::new("x-image-position-supported", Keyword).set_of(),
    ValueCheck::new("x-image-shift-default", Integer),
    ValueCheck::new("x-image-shift-supported", Range),
    ValueCheck::new("x-side1-image-shift-default", Integer),
    ValueCheck::new("x-side1-image-shift-supported", Range),
    ValueCheck::new("x-side2-image-shift-default", Integer),
    ValueCheck::new("x-side2-image-shift-supported", Range),
    ValueCheck::new("y-image-position-default", Keyword),
    ValueCheck::new("y-image-position-supported", Keyword).set_of(),
    ValueCheck::new("y-image-shift-default", Integer),
    ValueCheck::new("y-image-shift-supported", Range),
    ValueCheck::new("y-side1-image-shift-default", Integer),
    ValueCheck::new("y-side1-image-shift-supported", Range),
    ValueCheck::new("y-side2-image-shift-default", Integer),
    ValueCheck::new("y-side2-image-shift-supported", Range),
];

/// Value tags for system set attributes.
pub const SYSTEM_VALUES: &[ValueCheck] = &[
    ValueCheck::new("system-default-printer-id", Integer).or(NoValue),
    ValueCheck::new("system-dns-sd-name", Name).or(NoValue),
    ValueCheck::new("system-geo-location", Uri).or(Unknown),
    ValueCheck::new("system-info", Text),
    ValueCheck::new("system-location", Text),
    ValueCheck::new("system-make-and-model", Text),
    ValueCheck::new("system-name", Name),
    ValueCheck::new("system-owner-col", Collection),
];

/// Value tags for resource create/set attributes.
pub const RESOURCE_VALUES: &[ValueCheck] = &[
    ValueCheck::new("resource-format", Mime).create(),
    ValueCheck::new("resource-info", Text).create(),
    ValueCheck::new("resource-name", Name).create(),
    ValueCheck::new("resource-type", Keyword).create(),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::AttrGroup;

    fn print_job_request() -> IppMsg {
        let mut msg = IppMsg::request(ServerOp::PrintJob, 1);
        let mut op = AttrGroup::new(GroupTag::Operation);
        op.add(IppAttribute::new(
            "attributes-charset",
            IppValue::Charset("utf-8".into()),
        ));
        msg.push_group(op);
        msg
    }

    #[test]
    fn accepts_well_typed_job_attributes() {
        let mut msg = print_job_request();
        let mut job = AttrGroup::new(GroupTag::Job);
        job.add(IppAttribute::new("copies", IppValue::Integer(2)));
        job.add(IppAttribute::new(
            "media",
            IppValue::Keyword("iso_a4_210x297mm".into()),
        ));
        msg.push_group(job);

        assert!(
            check_values(&msg, ServerOp::PrintJob, GroupTag::Job, None, JOB_VALUES).is_none()
        );
    }

    #[test]
    fn rejects_wrong_value_tag() {
        let mut msg = print_job_request();
        let mut job = AttrGroup::new(GroupTag::Job);
        job.add(IppAttribute::new(
            "copies",
            IppValue::Keyword("two".into()),
        ));
        msg.push_group(job);

        let offense =
            check_values(&msg, ServerOp::PrintJob, GroupTag::Job, None, JOB_VALUES).unwrap();
        assert!(matches!(offense, Offense::BadValue(a) if a.name() == "copies"));
    }

    #[test]
    fn rejects_setof_on_single_value_attribute() {
        let mut msg = print_job_request();
        let mut job = AttrGroup::new(GroupTag::Job);
        job.add(IppAttribute::new(
            "copies",
            IppValue::Array(vec![IppValue::Integer(1), IppValue::Integer(2)]),
        ));
        msg.push_group(job);

        let offense =
            check_values(&msg, ServerOp::PrintJob, GroupTag::Job, None, JOB_VALUES).unwrap();
        assert!(matches!(offense, Offense::BadValue(_)));
    }

    #[test]
    fn create_op_allows_flagged_attributes_in_operation_group() {
        let mut msg = print_job_request();
        msg.add(
            GroupTag::Operation,
            IppAttribute::new("job-name", IppValue::NameWithoutLanguage("test".into())),
        );

        assert!(
            check_values(&msg, ServerOp::PrintJob, GroupTag::Job, None, JOB_VALUES).is_none()
        );

        // The same placement on a non-create operation is a group error.
        let offense = check_values(
            &msg,
            ServerOp::SetJobAttributes,
            GroupTag::Job,
            None,
            JOB_VALUES,
        )
        .unwrap();
        assert!(matches!(offense, Offense::WrongGroup(_)));
    }

    #[test]
    fn name_with_language_matches_name_syntax() {
        let mut msg = print_job_request();
        let mut job = AttrGroup::new(GroupTag::Job);
        job.add(IppAttribute::new(
            "job-name",
            IppValue::NameWithLanguage {
                language: "en".into(),
                name: "übersicht".into(),
            },
        ));
        msg.push_group(job);

        assert!(
            check_values(&msg, ServerOp::PrintJob, GroupTag::Job, None, JOB_VALUES).is_none()
        );
    }

    #[test]
    fn unsupported_name_is_flagged_against_supported_list() {
        let supported = IppAttribute::new(
            "job-creation-attributes-supported",
            IppValue::Array(vec![IppValue::Keyword("copies".into())]),
        );

        let mut msg = print_job_request();
        let mut job = AttrGroup::new(GroupTag::Job);
        job.add(IppAttribute::new("number-up", IppValue::Integer(2)));
        msg.push_group(job);

        let offense = check_values(
            &msg,
            ServerOp::PrintJob,
            GroupTag::Job,
            Some(&supported),
            JOB_VALUES,
        )
        .unwrap();
        assert!(matches!(offense, Offense::NotSupported(a) if a.name() == "number-up"));

        // Set operations substitute not-settable instead.
        let offense = check_values(
            &msg,
            ServerOp::SetJobAttributes,
            GroupTag::Job,
            Some(&supported),
            JOB_VALUES,
        )
        .unwrap();
        assert!(matches!(offense, Offense::NotSettable(name) if name == "number-up"));
    }

    #[test]
    fn validation_is_idempotent() {
        let mut msg = print_job_request();
        let mut job = AttrGroup::new(GroupTag::Job);
        job.add(IppAttribute::new("copies", IppValue::Integer(9999)));
        job.add(IppAttribute::new(
            "sides",
            IppValue::Integer(1),
        ));
        msg.push_group(job);

        let first = check_values(&msg, ServerOp::PrintJob, GroupTag::Job, None, JOB_VALUES);
        let second = check_values(&msg, ServerOp::PrintJob, GroupTag::Job, None, JOB_VALUES);
        match (first, second) {
            (Some(Offense::BadValue(a)), Some(Offense::BadValue(b))) => {
                assert_eq!(a.name(), b.name());
            }
            other => panic!("expected matching BadValue offenses, got {other:?}"),
        }
    }

    #[test]
    fn attribute_string_formats_values() {
        let attr = IppAttribute::new(
            "printer-resolution",
            IppValue::Resolution {
                cross_feed: 600,
                feed: 600,
                units: 3,
            },
        );
        assert_eq!(attribute_string(&attr), "600x600dpi");

        let attr = IppAttribute::new(
            "page-ranges",
            IppValue::Array(vec![
                IppValue::RangeOfInteger { min: 1, max: 5 },
                IppValue::RangeOfInteger { min: 7, max: 7 },
            ]),
        );
        assert_eq!(attribute_string(&attr), "1-5,7-7");
    }
}
