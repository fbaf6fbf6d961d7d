// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Decoded IPP message model.
//
// The wire codec is an external collaborator; this module defines the
// in-memory shape it hands us.  Attribute values reuse the `ipp` crate's
// `IppValue`/`IppAttribute`, which cover every IPP value syntax including
// the out-of-band octets.  Group containers are our own because the
// system-service group tags (subscription, event-notification, resource,
// document, system) go beyond RFC 8011 and need to stay ordered exactly
// as they arrived.

use ipp::attribute::IppAttribute;
use ipp::model::IppVersion;
use ipp::value::IppValue;

/// Attribute-group delimiter tags (RFC 8010 §3.5.1 plus the registered
/// system-service groups).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum GroupTag {
    Operation = 0x01,
    Job = 0x02,
    Printer = 0x04,
    Unsupported = 0x05,
    Subscription = 0x06,
    EventNotification = 0x07,
    Resource = 0x08,
    Document = 0x09,
    System = 0x0a,
}

impl GroupTag {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One delimited group of attributes, in arrival order.
#[derive(Debug, Clone)]
pub struct AttrGroup {
    pub tag: GroupTag,
    pub attrs: Vec<IppAttribute>,
}

impl AttrGroup {
    pub fn new(tag: GroupTag) -> Self {
        Self {
            tag,
            attrs: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&IppAttribute> {
        self.attrs.iter().find(|a| a.name() == name)
    }

    pub fn add(&mut self, attr: IppAttribute) {
        self.attrs.push(attr);
    }
}

/// A decoded IPP request or response.
#[derive(Debug, Clone)]
pub struct IppMsg {
    pub version: IppVersion,
    /// Operation code on requests, status code on responses.
    pub code: u16,
    pub request_id: u32,
    pub groups: Vec<AttrGroup>,
}

impl IppMsg {
    pub fn new(version: IppVersion, code: u16, request_id: u32) -> Self {
        Self {
            version,
            code,
            request_id,
            groups: Vec::new(),
        }
    }

    /// Request constructor used by tests and internal template expansion.
    pub fn request(op: ServerOp, request_id: u32) -> Self {
        Self::new(IppVersion::v2_0(), op as u16, request_id)
    }

    pub fn groups_of(&self, tag: GroupTag) -> impl Iterator<Item = &AttrGroup> {
        self.groups.iter().filter(move |g| g.tag == tag)
    }

    pub fn first_group(&self, tag: GroupTag) -> Option<&AttrGroup> {
        self.groups_of(tag).next()
    }

    /// Get-or-append the trailing group with this tag, for building.
    pub fn group_mut(&mut self, tag: GroupTag) -> &mut AttrGroup {
        let pos = if self.groups.last().is_some_and(|g| g.tag == tag) {
            self.groups.len() - 1
        } else if let Some(pos) = self.groups.iter().position(|g| g.tag == tag) {
            pos
        } else {
            self.groups.push(AttrGroup::new(tag));
            self.groups.len() - 1
        };
        &mut self.groups[pos]
    }

    /// Append a fresh group even when one with the same tag exists
    /// (subscription-template and event sequences are repeated groups).
    pub fn push_group(&mut self, group: AttrGroup) {
        self.groups.push(group);
    }

    pub fn add(&mut self, tag: GroupTag, attr: IppAttribute) {
        self.group_mut(tag).add(attr);
    }

    /// Find an attribute anywhere in the message, first match wins.
    pub fn find(&self, name: &str) -> Option<&IppAttribute> {
        self.groups.iter().find_map(|g| g.get(name))
    }

    /// Find an attribute restricted to one group tag.
    pub fn find_in(&self, tag: GroupTag, name: &str) -> Option<&IppAttribute> {
        self.groups_of(tag).find_map(|g| g.get(name))
    }

    /// Arrival-order check: group tags must be non-decreasing.
    pub fn groups_in_order(&self) -> bool {
        self.groups
            .windows(2)
            .all(|w| w[0].tag.as_u8() <= w[1].tag.as_u8())
    }

    pub fn attr_count(&self) -> usize {
        self.groups.iter().map(|g| g.attrs.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// Operation codes
// ---------------------------------------------------------------------------

/// Operations this server dispatches (RFC 8011, RFC 3995/3996, RFC 3998,
/// PWG 5100.11, PWG 5100.18, PWG 5100.22).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ServerOp {
    PrintJob = 0x0002,
    PrintUri = 0x0003,
    ValidateJob = 0x0004,
    CreateJob = 0x0005,
    SendDocument = 0x0006,
    SendUri = 0x0007,
    CancelJob = 0x0008,
    GetJobAttributes = 0x0009,
    GetJobs = 0x000a,
    GetPrinterAttributes = 0x000b,
    HoldJob = 0x000c,
    ReleaseJob = 0x000d,
    RestartJob = 0x000e,
    PausePrinter = 0x0010,
    ResumePrinter = 0x0011,
    PurgeJobs = 0x0012,
    SetPrinterAttributes = 0x0013,
    SetJobAttributes = 0x0014,
    GetPrinterSupportedValues = 0x0015,
    CreatePrinterSubscriptions = 0x0016,
    CreateJobSubscriptions = 0x0017,
    GetSubscriptionAttributes = 0x0018,
    GetSubscriptions = 0x0019,
    RenewSubscription = 0x001a,
    CancelSubscription = 0x001b,
    GetNotifications = 0x001c,
    EnablePrinter = 0x0022,
    DisablePrinter = 0x0023,
    PausePrinterAfterCurrentJob = 0x0024,
    HoldNewJobs = 0x0025,
    ReleaseHeldNewJobs = 0x0026,
    RestartPrinter = 0x0029,
    ShutdownPrinter = 0x002a,
    StartupPrinter = 0x002b,
    CancelCurrentJob = 0x002d,
    CancelDocument = 0x0033,
    GetDocumentAttributes = 0x0034,
    GetDocuments = 0x0035,
    SetDocumentAttributes = 0x0037,
    CancelJobs = 0x0038,
    CancelMyJobs = 0x0039,
    CloseJob = 0x003b,
    IdentifyPrinter = 0x003c,
    ValidateDocument = 0x003d,
    AcknowledgeDocument = 0x003f,
    AcknowledgeIdentifyPrinter = 0x0040,
    AcknowledgeJob = 0x0041,
    FetchDocument = 0x0042,
    FetchJob = 0x0043,
    GetOutputDeviceAttributes = 0x0044,
    UpdateActiveJobs = 0x0045,
    DeregisterOutputDevice = 0x0046,
    UpdateDocumentStatus = 0x0047,
    UpdateJobStatus = 0x0048,
    UpdateOutputDeviceAttributes = 0x0049,
    AllocatePrinterResources = 0x004b,
    CreatePrinter = 0x004c,
    DeallocatePrinterResources = 0x004d,
    DeletePrinter = 0x004e,
    GetPrinters = 0x004f,
    ShutdownOnePrinter = 0x0050,
    StartupOnePrinter = 0x0051,
    CancelResource = 0x0052,
    CreateResource = 0x0053,
    InstallResource = 0x0054,
    SendResourceData = 0x0055,
    SetResourceAttributes = 0x0056,
    CreateResourceSubscriptions = 0x0057,
    CreateSystemSubscriptions = 0x0058,
    DisableAllPrinters = 0x0059,
    EnableAllPrinters = 0x005a,
    GetSystemAttributes = 0x005b,
    GetSystemSupportedValues = 0x005c,
    PauseAllPrinters = 0x005d,
    PauseAllPrintersAfterCurrentJob = 0x005e,
    RegisterOutputDevice = 0x005f,
    RestartSystem = 0x0060,
    ResumeAllPrinters = 0x0061,
    SetSystemAttributes = 0x0062,
    ShutdownAllPrinters = 0x0063,
    StartupAllPrinters = 0x0064,
}

impl ServerOp {
    pub fn from_u16(code: u16) -> Option<Self> {
        use ServerOp::*;
        Some(match code {
            0x0002 => PrintJob,
            0x0003 => PrintUri,
            0x0004 => ValidateJob,
            0x0005 => CreateJob,
            0x0006 => SendDocument,
            0x0007 => SendUri,
            0x0008 => CancelJob,
            0x0009 => GetJobAttributes,
            0x000a => GetJobs,
            0x000b => GetPrinterAttributes,
            0x000c => HoldJob,
            0x000d => ReleaseJob,
            0x000e => RestartJob,
            0x0010 => PausePrinter,
            0x0011 => ResumePrinter,
            0x0012 => PurgeJobs,
            0x0013 => SetPrinterAttributes,
            0x0014 => SetJobAttributes,
            0x0015 => GetPrinterSupportedValues,
            0x0016 => CreatePrinterSubscriptions,
            0x0017 => CreateJobSubscriptions,
            0x0018 => GetSubscriptionAttributes,
            0x0019 => GetSubscriptions,
            0x001a => RenewSubscription,
            0x001b => CancelSubscription,
            0x001c => GetNotifications,
            0x0022 => EnablePrinter,
            0x0023 => DisablePrinter,
            0x0024 => PausePrinterAfterCurrentJob,
            0x0025 => HoldNewJobs,
            0x0026 => ReleaseHeldNewJobs,
            0x0029 => RestartPrinter,
            0x002a => ShutdownPrinter,
            0x002b => StartupPrinter,
            0x002d => CancelCurrentJob,
            0x0033 => CancelDocument,
            0x0034 => GetDocumentAttributes,
            0x0035 => GetDocuments,
            0x0037 => SetDocumentAttributes,
            0x0038 => CancelJobs,
            0x0039 => CancelMyJobs,
            0x003b => CloseJob,
            0x003c => IdentifyPrinter,
            0x003d => ValidateDocument,
            0x003f => AcknowledgeDocument,
            0x0040 => AcknowledgeIdentifyPrinter,
            0x0041 => AcknowledgeJob,
            0x0042 => FetchDocument,
            0x0043 => FetchJob,
            0x0044 => GetOutputDeviceAttributes,
            0x0045 => UpdateActiveJobs,
            0x0046 => DeregisterOutputDevice,
            0x0047 => UpdateDocumentStatus,
            0x0048 => UpdateJobStatus,
            0x0049 => UpdateOutputDeviceAttributes,
            0x004b => AllocatePrinterResources,
            0x004c => CreatePrinter,
            0x004d => DeallocatePrinterResources,
            0x004e => DeletePrinter,
            0x004f => GetPrinters,
            0x0050 => ShutdownOnePrinter,
            0x0051 => StartupOnePrinter,
            0x0052 => CancelResource,
            0x0053 => CreateResource,
            0x0054 => InstallResource,
            0x0055 => SendResourceData,
            0x0056 => SetResourceAttributes,
            0x0057 => CreateResourceSubscriptions,
            0x0058 => CreateSystemSubscriptions,
            0x0059 => DisableAllPrinters,
            0x005a => EnableAllPrinters,
            0x005b => GetSystemAttributes,
            0x005c => GetSystemSupportedValues,
            0x005d => PauseAllPrinters,
            0x005e => PauseAllPrintersAfterCurrentJob,
            0x005f => RegisterOutputDevice,
            0x0060 => RestartSystem,
            0x0061 => ResumeAllPrinters,
            0x0062 => SetSystemAttributes,
            0x0063 => ShutdownAllPrinters,
            0x0064 => StartupAllPrinters,
            _ => return None,
        })
    }

    /// True for the job/printer/resource create family, which relaxes the
    /// validator's group-placement rule for a flagged attribute subset.
    pub fn is_create_op(self) -> bool {
        matches!(
            self,
            Self::CreateJob
                | Self::CreatePrinter
                | Self::CreateResource
                | Self::PrintJob
                | Self::PrintUri
                | Self::ValidateJob
                | Self::ValidateDocument
        )
    }

    /// True for the Set-xxx-Attributes family.
    pub fn is_set_op(self) -> bool {
        matches!(
            self,
            Self::SetDocumentAttributes
                | Self::SetJobAttributes
                | Self::SetPrinterAttributes
                | Self::SetResourceAttributes
                | Self::SetSystemAttributes
        )
    }
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

/// Iterate the member values of an attribute, flattening 1setOf.
pub fn as_values(value: &IppValue) -> std::slice::Iter<'_, IppValue> {
    match value {
        IppValue::Array(v) => v.iter(),
        single => std::slice::from_ref(single).iter(),
    }
}

/// Number of values carried by an attribute (1setOf aware).
pub fn value_count(attr: &IppAttribute) -> usize {
    match attr.value() {
        IppValue::Array(v) => v.len(),
        _ => 1,
    }
}

/// First value of an attribute.
pub fn first_value(attr: &IppAttribute) -> &IppValue {
    as_values(attr.value()).next().unwrap_or(attr.value())
}

/// String payload of any text-like value syntax.
pub fn string_of(value: &IppValue) -> Option<&str> {
    match value {
        IppValue::Keyword(s)
        | IppValue::NameWithoutLanguage(s)
        | IppValue::TextWithoutLanguage(s)
        | IppValue::Uri(s)
        | IppValue::UriScheme(s)
        | IppValue::Charset(s)
        | IppValue::NaturalLanguage(s)
        | IppValue::MimeMediaType(s)
        | IppValue::MemberAttrName(s)
        | IppValue::OctetString(s) => Some(s),
        IppValue::NameWithLanguage { name, .. } => Some(name),
        IppValue::TextWithLanguage { text, .. } => Some(text),
        _ => None,
    }
}

pub fn int_of(value: &IppValue) -> Option<i32> {
    match value {
        IppValue::Integer(i) | IppValue::Enum(i) => Some(*i),
        _ => None,
    }
}

pub fn bool_of(value: &IppValue) -> Option<bool> {
    match value {
        IppValue::Boolean(b) => Some(*b),
        _ => None,
    }
}

/// First string of an attribute, 1setOf aware.
pub fn attr_string(attr: &IppAttribute) -> Option<&str> {
    string_of(first_value(attr))
}

pub fn attr_int(attr: &IppAttribute) -> Option<i32> {
    int_of(first_value(attr))
}

pub fn attr_bool(attr: &IppAttribute) -> Option<bool> {
    bool_of(first_value(attr))
}

/// Whether any member value equals the given string.
pub fn contains_string(attr: &IppAttribute, s: &str) -> bool {
    as_values(attr.value()).any(|v| string_of(v) == Some(s))
}

/// Whether any member value equals (or, for ranges, contains) the integer.
pub fn contains_integer(attr: &IppAttribute, n: i32) -> bool {
    as_values(attr.value()).any(|v| match v {
        IppValue::Integer(i) | IppValue::Enum(i) => *i == n,
        IppValue::RangeOfInteger { min, max } => *min <= n && n <= *max,
        _ => false,
    })
}

// ---------------------------------------------------------------------------
// Out-of-band values
// ---------------------------------------------------------------------------

const TAG_UNKNOWN: u8 = 0x12;
const TAG_NOT_SETTABLE: u8 = 0x15;
const TAG_DELETE_ATTRIBUTE: u8 = 0x16;
const TAG_ADMIN_DEFINE: u8 = 0x17;

pub fn unknown() -> IppValue {
    IppValue::Other {
        tag: TAG_UNKNOWN,
        data: bytes::Bytes::new(),
    }
}

pub fn not_settable() -> IppValue {
    IppValue::Other {
        tag: TAG_NOT_SETTABLE,
        data: bytes::Bytes::new(),
    }
}

pub fn delete_attribute() -> IppValue {
    IppValue::Other {
        tag: TAG_DELETE_ATTRIBUTE,
        data: bytes::Bytes::new(),
    }
}

pub fn admin_define() -> IppValue {
    IppValue::Other {
        tag: TAG_ADMIN_DEFINE,
        data: bytes::Bytes::new(),
    }
}

pub fn is_delete_attribute(value: &IppValue) -> bool {
    matches!(value, IppValue::Other { tag, .. } if *tag == TAG_DELETE_ATTRIBUTE)
}

pub fn is_out_of_band(value: &IppValue) -> bool {
    matches!(value, IppValue::NoValue)
        || matches!(
            value,
            IppValue::Other { tag, .. }
                if matches!(*tag, TAG_UNKNOWN | TAG_NOT_SETTABLE | TAG_DELETE_ATTRIBUTE | TAG_ADMIN_DEFINE)
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_codes_round_trip() {
        for op in [
            ServerOp::PrintJob,
            ServerOp::GetNotifications,
            ServerOp::RegisterOutputDevice,
            ServerOp::UpdateOutputDeviceAttributes,
            ServerOp::StartupAllPrinters,
        ] {
            assert_eq!(ServerOp::from_u16(op as u16), Some(op));
        }
        assert_eq!(ServerOp::from_u16(0x7fff), None);
    }

    #[test]
    fn group_order_check_allows_non_decreasing() {
        let mut msg = IppMsg::request(ServerOp::PrintJob, 1);
        msg.add(
            GroupTag::Operation,
            IppAttribute::new("attributes-charset", IppValue::Charset("utf-8".into())),
        );
        msg.add(
            GroupTag::Job,
            IppAttribute::new("copies", IppValue::Integer(1)),
        );
        assert!(msg.groups_in_order());

        msg.push_group(AttrGroup::new(GroupTag::Operation));
        assert!(!msg.groups_in_order());
    }

    #[test]
    fn setof_helpers_flatten_arrays() {
        let attr = IppAttribute::new(
            "media-ready",
            IppValue::Array(vec![
                IppValue::Keyword("iso_a4_210x297mm".into()),
                IppValue::Keyword("na_letter_8.5x11in".into()),
            ]),
        );
        assert_eq!(value_count(&attr), 2);
        assert!(contains_string(&attr, "na_letter_8.5x11in"));
        assert!(!contains_string(&attr, "iso_a5_148x210mm"));
        assert_eq!(attr_string(&attr), Some("iso_a4_210x297mm"));
    }

    #[test]
    fn range_contains_integer() {
        let attr = IppAttribute::new(
            "copies-supported",
            IppValue::RangeOfInteger { min: 1, max: 99 },
        );
        assert!(contains_integer(&attr, 1));
        assert!(contains_integer(&attr, 99));
        assert!(!contains_integer(&attr, 100));
    }

    #[test]
    fn delete_attribute_marker_is_recognized() {
        assert!(is_delete_attribute(&delete_attribute()));
        assert!(!is_delete_attribute(&not_settable()));
        assert!(is_out_of_band(&IppValue::NoValue));
    }
}
