// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-request client context: the decoded request, the response under
// construction, the authenticated user, and the resolved target.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use ipp::attribute::IppAttribute;
use ipp::model::{IppVersion, StatusCode};
use ipp::payload::IppPayload;
use ipp::value::IppValue;
use tracing::{debug, warn};

use crate::attrs::Offense;
use crate::job::JobRef;
use crate::msg::{self, AttrGroup, GroupTag, IppMsg, ServerOp};
use crate::printer::PrinterRef;
use crate::resource::ResourceRef;
use crate::system::SystemContext;

/// Response document data attached after the IPP message.
pub enum ResponseBody {
    /// Stream a spooled file (Fetch-Document).
    File(PathBuf),
    /// Stream transform output as it is produced.
    Transform(tokio::process::ChildStdout),
}

/// Per-request state.  Borrowed references into the stores last for the
/// duration of one request.
pub struct Client {
    pub request: IppMsg,
    pub op: Option<ServerOp>,
    /// Authenticated username supplied by the transport, if any.
    pub username: Option<String>,
    /// Request document payload (Print-Job, Send-Document, ...).
    pub payload: Option<IppPayload>,
    pub printer: Option<PrinterRef>,
    pub job: Option<JobRef>,
    pub resource: Option<ResourceRef>,
    pub target_is_system: bool,
    /// Job id taken from a job-uri path suffix.
    pub uri_job_id: Option<i32>,
    pub body: Option<ResponseBody>,
    /// Compress the response body with gzip (Fetch-Document).
    pub body_gzip: bool,
    status: StatusCode,
    status_message: Option<String>,
    response_groups: Vec<AttrGroup>,
}

impl Client {
    pub fn new(request: IppMsg, username: Option<String>, payload: Option<IppPayload>) -> Self {
        let op = ServerOp::from_u16(request.code);
        Self {
            request,
            op,
            username,
            payload,
            printer: None,
            job: None,
            resource: None,
            target_is_system: false,
            uri_job_id: None,
            body: None,
            body_gzip: false,
            status: StatusCode::SuccessfulOk,
            status_message: None,
            response_groups: Vec::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::SuccessfulOk
    }

    /// The user this request acts for: the authenticated name, else the
    /// requesting-user-name operation attribute, else "anonymous".
    pub fn requesting_user(&self) -> String {
        if let Some(user) = self.username.as_deref().filter(|u| !u.is_empty()) {
            return user.to_string();
        }
        self.request
            .find_in(GroupTag::Operation, "requesting-user-name")
            .and_then(msg::attr_string)
            .unwrap_or("anonymous")
            .to_string()
    }

    /// Set the response status and status-message.
    pub fn respond(&mut self, status: StatusCode, message: impl Into<String>) {
        self.status = status;
        let message = message.into();
        if !message.is_empty() {
            debug!(status = ?status, message = %message, "response status");
            self.status_message = Some(message);
        }
    }

    /// Echo an offending attribute into the unsupported group, setting
    /// the attributes-or-values status if nothing failed yet.
    pub fn respond_unsupported(&mut self, attr: &IppAttribute) {
        if self.is_ok() {
            self.respond(
                StatusCode::ClientErrorAttributesOrValuesNotSupported,
                format!("Unsupported {} value.", attr.name()),
            );
        }
        self.add(GroupTag::Unsupported, attr.clone());
    }

    /// Echo an unsettable attribute with the not-settable out-of-band
    /// value (Set-xxx operations).
    pub fn respond_unsettable(&mut self, name: &str) {
        if self.is_ok() {
            self.respond(
                StatusCode::ServerErrorInternalError,
                format!("Unsettable {name} attribute."),
            );
        }
        self.add(
            GroupTag::Unsupported,
            IppAttribute::new(name, msg::not_settable()),
        );
    }

    /// Apply a validator offense to the response.  Always leaves the
    /// response in a failed state.
    pub fn apply_offense(&mut self, offense: &Offense) {
        match offense {
            Offense::NotSupported(attr) | Offense::BadValue(attr) => {
                self.respond_unsupported(attr);
            }
            Offense::NotSettable(name) => self.respond_unsettable(name),
            Offense::WrongGroup(attr) => {
                self.respond(
                    StatusCode::ClientErrorBadRequest,
                    format!("'{}' attribute in the wrong group.", attr.name()),
                );
                self.add(GroupTag::Unsupported, attr.clone());
            }
        }
    }

    pub fn add(&mut self, tag: GroupTag, attr: IppAttribute) {
        if self.response_groups.last().is_some_and(|g| g.tag == tag) {
            if let Some(last) = self.response_groups.last_mut() {
                last.add(attr);
            }
            return;
        }
        if let Some(pos) = self.response_groups.iter().position(|g| g.tag == tag) {
            self.response_groups[pos].add(attr);
            return;
        }
        let mut group = AttrGroup::new(tag);
        group.add(attr);
        self.response_groups.push(group);
    }

    /// Append a repeated group (subscription status, event sequences).
    pub fn add_group(&mut self, group: AttrGroup) {
        self.response_groups.push(group);
    }

    /// Build the final response message.
    pub fn finish(self) -> IppMsg {
        let mut response = IppMsg::new(self.request.version, self.status as u16, self.request.request_id);

        let mut op = AttrGroup::new(GroupTag::Operation);
        op.add(IppAttribute::new(
            "attributes-charset",
            IppValue::Charset("utf-8".into()),
        ));
        op.add(IppAttribute::new(
            "attributes-natural-language",
            IppValue::NaturalLanguage("en".into()),
        ));
        if let Some(message) = self.status_message {
            op.add(IppAttribute::new(
                "status-message",
                IppValue::TextWithoutLanguage(message),
            ));
        }
        response.push_group(op);

        for group in self.response_groups {
            if group.tag == GroupTag::Operation {
                for attr in group.attrs {
                    response.group_mut(GroupTag::Operation).add(attr);
                }
            } else {
                response.push_group(group);
            }
        }
        response
    }
}

/// The resolved target of a request URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    System,
    Printer,
}

/// Validate the request envelope and resolve the target object.
///
/// Returns `None` when the request was already answered with an error;
/// the dispatcher then skips straight to sending the response.
pub async fn resolve_target(ctx: &Arc<SystemContext>, client: &mut Client) -> Option<Target> {
    let major = client.request.version.0 >> 8;
    let minor = client.request.version.0 & 0xff;
    if !(1..=2).contains(&major) {
        client.respond(
            StatusCode::ServerErrorVersionNotSupported,
            format!("Bad request version number {major}.{minor}."),
        );
        return None;
    }

    if client.request.request_id == 0 {
        client.respond(StatusCode::ClientErrorBadRequest, "Bad request-id 0.");
        return None;
    }

    if client.request.attr_count() == 0 {
        client.respond(StatusCode::ClientErrorBadRequest, "No attributes in request.");
        return None;
    }

    if !client.request.groups_in_order() {
        client.respond(
            StatusCode::ClientErrorBadRequest,
            "Attribute groups are out of order.",
        );
        return None;
    }

    // The first three operation attributes must be attributes-charset,
    // attributes-natural-language, and the target URI; relaxed mode
    // accepts the URI anywhere in the operation group.
    let op_group = client.request.first_group(GroupTag::Operation);
    let first_three: Vec<&str> = op_group
        .map(|g| g.attrs.iter().take(3).map(IppAttribute::name).collect())
        .unwrap_or_default();

    let charset_ok = first_three.first() == Some(&"attributes-charset")
        && matches!(
            op_group.and_then(|g| g.get("attributes-charset")).map(IppAttribute::value),
            Some(IppValue::Charset(_))
        );
    let language_ok = first_three.get(1) == Some(&"attributes-natural-language");

    let uri_attr_name = ["system-uri", "printer-uri", "job-uri"]
        .into_iter()
        .find(|name| client.request.find_in(GroupTag::Operation, name).is_some());

    let uri_in_place = first_three
        .get(2)
        .is_some_and(|name| ["system-uri", "printer-uri", "job-uri"].contains(name));

    let charset = client
        .request
        .find_in(GroupTag::Operation, "attributes-charset")
        .and_then(msg::attr_string)
        .map(str::to_string);
    if let Some(charset) = charset {
        if !charset.eq_ignore_ascii_case("us-ascii") && !charset.eq_ignore_ascii_case("utf-8") {
            client.respond(
                StatusCode::ClientErrorBadRequest,
                format!("Unsupported character set \"{charset}\"."),
            );
            return None;
        }
    }

    let strict_ok = charset_ok && language_ok && uri_in_place;
    let relaxed_ok = ctx.config.relaxed
        && charset_ok
        && language_ok
        && uri_attr_name.is_some();

    if !strict_ok && !relaxed_ok {
        client.respond(
            StatusCode::ClientErrorBadRequest,
            "Missing required attributes in request.",
        );
        return None;
    }
    if !uri_in_place && relaxed_ok {
        warn!("target URI not the third attribute in the request");
    }

    let Some(uri_name) = uri_attr_name else {
        client.respond(
            StatusCode::ClientErrorBadRequest,
            "Missing required attributes in request.",
        );
        return None;
    };
    let uri_value = client
        .request
        .find_in(GroupTag::Operation, uri_name)
        .and_then(msg::attr_string)
        .unwrap_or_default()
        .to_string();

    let Ok(uri) = uri_value.parse::<http::Uri>() else {
        client.respond(
            StatusCode::ClientErrorAttributesOrValuesNotSupported,
            format!("Bad \"{uri_name}\" value '{uri_value}'."),
        );
        return None;
    };
    let mut resource_path = uri.path().to_string();

    if uri_name == "job-uri" {
        // Strip the job-id suffix after the printer path.
        let known_prefix = ["/ipp/print/", "/ipp/print3d/", "/ipp/faxout/"]
            .iter()
            .any(|p| resource_path.starts_with(p));
        if !known_prefix {
            client.respond(
                StatusCode::ClientErrorNotFound,
                format!("\"{uri_name}\" '{uri_value}' not found."),
            );
            return None;
        }
        if let Some(slash) = resource_path.rfind('/') {
            if let Ok(job_id) = resource_path[slash + 1..].parse::<i32>() {
                client.uri_job_id = Some(job_id);
                resource_path.truncate(slash);
            }
        }
    }

    if resource_path == "/ipp/system" {
        client.target_is_system = true;
        return Some(Target::System);
    }

    let Some(printer) = ctx.printers.by_path(&resource_path).await else {
        client.respond(
            StatusCode::ClientErrorNotFound,
            format!("\"{uri_name}\" '{uri_value}' not found."),
        );
        return None;
    };

    {
        let p = printer.read().await;
        let startup = matches!(
            client.op,
            Some(ServerOp::StartupPrinter) | Some(ServerOp::StartupOnePrinter)
        );
        if p.is_shutdown && !startup {
            let name = p.name.clone();
            drop(p);
            client.respond(
                StatusCode::ServerErrorServiceUnavailable,
                format!("\"{name}\" is shutdown."),
            );
            return None;
        }
    }

    client.printer = Some(printer);
    Some(Target::Printer)
}

/// Locate the target job from the job-id operation attribute or the
/// job-uri path suffix.
pub async fn find_job(client: &Client) -> Option<JobRef> {
    let id = client
        .request
        .find_in(GroupTag::Operation, "job-id")
        .and_then(msg::attr_int)
        .or(client.uri_job_id)?;

    let printer = client.printer.as_ref()?;
    printer.read().await.job(id).cloned()
}

/// The requested-attributes filter, if the request carries one.
pub fn requested_attributes(request: &IppMsg) -> Option<HashSet<String>> {
    let attr = request.find_in(GroupTag::Operation, "requested-attributes")?;
    let mut set: HashSet<String> = msg::as_values(attr.value())
        .filter_map(msg::string_of)
        .map(str::to_string)
        .collect();

    // Group keywords expand to "everything in that group".
    if set.remove("all") {
        return None;
    }
    Some(set)
}

/// requested-attributes check combined with the privacy array: an
/// attribute is copied when requested and not redacted.
pub fn check_attribute(
    name: &str,
    requested: Option<&HashSet<String>>,
    private: Option<&HashSet<&str>>,
) -> bool {
    if private.is_some_and(|p| p.contains(name)) {
        return false;
    }
    requested.is_none_or(|r| r.contains(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use druckwerk_core::config::ServerConfig;
    use druckwerk_core::types::ServiceType;

    use crate::auth::AllowAll;

    fn base_request(op: ServerOp, uri_name: &str, uri: &str) -> IppMsg {
        let mut msg = IppMsg::request(op, 1);
        let mut group = AttrGroup::new(GroupTag::Operation);
        group.add(IppAttribute::new(
            "attributes-charset",
            IppValue::Charset("utf-8".into()),
        ));
        group.add(IppAttribute::new(
            "attributes-natural-language",
            IppValue::NaturalLanguage("en".into()),
        ));
        group.add(IppAttribute::new(uri_name, IppValue::Uri(uri.into())));
        msg.push_group(group);
        msg
    }

    async fn ctx() -> Arc<SystemContext> {
        let ctx = SystemContext::new(ServerConfig::default(), Arc::new(AllowAll));
        ctx.create_printer("office", ServiceType::Print).await;
        ctx
    }

    #[tokio::test]
    async fn resolves_printer_target() {
        let ctx = ctx().await;
        let req = base_request(
            ServerOp::GetPrinterAttributes,
            "printer-uri",
            "ipp://localhost:631/ipp/print/office",
        );
        let mut client = Client::new(req, None, None);
        assert_eq!(resolve_target(&ctx, &mut client).await, Some(Target::Printer));
        assert!(client.printer.is_some());
    }

    #[tokio::test]
    async fn resolves_system_target_and_job_uri() {
        let ctx = ctx().await;
        let req = base_request(
            ServerOp::GetSystemAttributes,
            "system-uri",
            "ipp://localhost:631/ipp/system",
        );
        let mut client = Client::new(req, None, None);
        assert_eq!(resolve_target(&ctx, &mut client).await, Some(Target::System));

        let req = base_request(
            ServerOp::GetJobAttributes,
            "job-uri",
            "ipp://localhost:631/ipp/print/office/42",
        );
        let mut client = Client::new(req, None, None);
        assert_eq!(resolve_target(&ctx, &mut client).await, Some(Target::Printer));
        assert_eq!(client.uri_job_id, Some(42));
    }

    #[tokio::test]
    async fn rejects_bad_version_and_unknown_target() {
        let ctx = ctx().await;
        let mut req = base_request(
            ServerOp::GetPrinterAttributes,
            "printer-uri",
            "ipp://localhost:631/ipp/print/office",
        );
        req.version = IppVersion(0x0300);
        let mut client = Client::new(req, None, None);
        assert_eq!(resolve_target(&ctx, &mut client).await, None);
        assert_eq!(client.status(), StatusCode::ServerErrorVersionNotSupported);

        let req = base_request(
            ServerOp::GetPrinterAttributes,
            "printer-uri",
            "ipp://localhost:631/ipp/print/missing",
        );
        let mut client = Client::new(req, None, None);
        assert_eq!(resolve_target(&ctx, &mut client).await, None);
        assert_eq!(client.status(), StatusCode::ClientErrorNotFound);
    }

    #[tokio::test]
    async fn rejects_bad_charset_and_missing_required() {
        let ctx = ctx().await;
        let mut msg = IppMsg::request(ServerOp::GetPrinterAttributes, 1);
        let mut group = AttrGroup::new(GroupTag::Operation);
        group.add(IppAttribute::new(
            "attributes-charset",
            IppValue::Charset("iso-8859-1".into()),
        ));
        group.add(IppAttribute::new(
            "attributes-natural-language",
            IppValue::NaturalLanguage("en".into()),
        ));
        group.add(IppAttribute::new(
            "printer-uri",
            IppValue::Uri("ipp://localhost:631/ipp/print/office".into()),
        ));
        msg.push_group(group);
        let mut client = Client::new(msg, None, None);
        assert_eq!(resolve_target(&ctx, &mut client).await, None);
        assert_eq!(client.status(), StatusCode::ClientErrorBadRequest);

        // No target URI at all.
        let mut msg = IppMsg::request(ServerOp::GetPrinterAttributes, 1);
        msg.add(
            GroupTag::Operation,
            IppAttribute::new("attributes-charset", IppValue::Charset("utf-8".into())),
        );
        msg.add(
            GroupTag::Operation,
            IppAttribute::new(
                "attributes-natural-language",
                IppValue::NaturalLanguage("en".into()),
            ),
        );
        let mut client = Client::new(msg, None, None);
        assert_eq!(resolve_target(&ctx, &mut client).await, None);
    }

    #[test]
    fn finish_builds_operation_group_first() {
        let req = base_request(
            ServerOp::GetPrinterAttributes,
            "printer-uri",
            "ipp://localhost:631/ipp/print/office",
        );
        let mut client = Client::new(req, None, None);
        client.add(
            GroupTag::Printer,
            IppAttribute::new("printer-state", IppValue::Enum(3)),
        );
        client.respond(StatusCode::SuccessfulOk, "ok");

        let response = client.finish();
        assert_eq!(response.code, StatusCode::SuccessfulOk as u16);
        assert_eq!(response.groups[0].tag, GroupTag::Operation);
        assert!(response.groups[0].get("attributes-charset").is_some());
        assert!(response.groups[0].get("status-message").is_some());
        assert!(response.find_in(GroupTag::Printer, "printer-state").is_some());
    }

    #[test]
    fn requested_attributes_expands_all() {
        let mut req = base_request(
            ServerOp::GetPrinterAttributes,
            "printer-uri",
            "ipp://x/ipp/print/office",
        );
        req.add(
            GroupTag::Operation,
            IppAttribute::new(
                "requested-attributes",
                IppValue::Array(vec![
                    IppValue::Keyword("printer-state".into()),
                    IppValue::Keyword("printer-name".into()),
                ]),
            ),
        );
        let ra = requested_attributes(&req).unwrap();
        assert!(ra.contains("printer-state"));
        assert!(!ra.contains("printer-up-time"));

        let mut req2 = base_request(
            ServerOp::GetPrinterAttributes,
            "printer-uri",
            "ipp://x/ipp/print/office",
        );
        req2.add(
            GroupTag::Operation,
            IppAttribute::new("requested-attributes", IppValue::Keyword("all".into())),
        );
        assert!(requested_attributes(&req2).is_none());
    }
}
