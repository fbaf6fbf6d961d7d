// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Operation dispatch: route a validated request to its handler based on
// the resolved target (printer or system) and the operation code.

use std::sync::Arc;

use ipp::model::StatusCode;
use tracing::info;

use crate::auth::{self, Access};
use crate::client::{Client, ResponseBody, Target, resolve_target};
use crate::msg::{self, GroupTag, IppMsg, ServerOp};
use crate::printer::PrinterRef;
use crate::system::SystemContext;

mod jobs;
mod printers;
mod proxy;
mod resources;
mod subscriptions;
mod system;

/// A finished response: the IPP message plus any document body to stream
/// after it (Fetch-Document).
pub struct Reply {
    pub message: IppMsg,
    pub body: Option<ResponseBody>,
    pub body_gzip: bool,
}

/// Process one decoded request end to end.
pub async fn process_request(ctx: &Arc<SystemContext>, mut client: Client) -> Reply {
    let target = resolve_target(ctx, &mut client).await;

    match target {
        None => {}
        Some(Target::Printer) => dispatch_printer_op(ctx, &mut client).await,
        Some(Target::System) => dispatch_system_op(ctx, &mut client).await,
    }

    info!(
        op = ?client.op,
        status = ?client.status(),
        "request processed"
    );

    let body = client.body.take();
    let body_gzip = client.body_gzip;
    Reply {
        message: client.finish(),
        body,
        body_gzip,
    }
}

async fn dispatch_printer_op(ctx: &Arc<SystemContext>, client: &mut Client) {
    use ServerOp::*;

    let Some(op) = client.op else {
        client.respond(
            StatusCode::ServerErrorOperationNotSupported,
            "Operation not supported.",
        );
        return;
    };

    match op {
        PrintJob => jobs::print_job(ctx, client).await,
        PrintUri => jobs::print_uri(ctx, client).await,
        ValidateJob => jobs::validate_job(ctx, client).await,
        CreateJob => jobs::create_job(ctx, client).await,
        SendDocument => jobs::send_document(ctx, client).await,
        SendUri => jobs::send_uri(ctx, client).await,
        CancelJob => jobs::cancel_job(ctx, client).await,
        CancelCurrentJob => jobs::cancel_current_job(ctx, client).await,
        CancelJobs | CancelMyJobs => jobs::cancel_jobs(ctx, client).await,
        CloseJob => jobs::close_job(ctx, client).await,
        GetJobAttributes => jobs::get_job_attributes(ctx, client).await,
        SetJobAttributes => jobs::set_job_attributes(ctx, client).await,
        GetJobs => jobs::get_jobs(ctx, client).await,
        HoldJob => jobs::hold_job(ctx, client).await,
        HoldNewJobs => jobs::hold_new_jobs(ctx, client).await,
        ReleaseJob => jobs::release_job(ctx, client).await,
        ReleaseHeldNewJobs => jobs::release_held_new_jobs(ctx, client).await,
        CancelDocument => jobs::cancel_document(ctx, client).await,
        GetDocumentAttributes => jobs::get_document_attributes(ctx, client).await,
        GetDocuments => jobs::get_documents(ctx, client).await,
        SetDocumentAttributes => jobs::set_document_attributes(ctx, client).await,
        ValidateDocument => jobs::validate_document(ctx, client).await,

        GetPrinterAttributes => printers::get_printer_attributes(ctx, client).await,
        GetPrinterSupportedValues => printers::get_printer_supported_values(ctx, client).await,
        SetPrinterAttributes => printers::set_printer_attributes(ctx, client).await,
        IdentifyPrinter => printers::identify_printer(ctx, client).await,
        DisablePrinter => printers::disable_printer(ctx, client).await,
        EnablePrinter => printers::enable_printer(ctx, client).await,
        PausePrinter | PausePrinterAfterCurrentJob => printers::pause_printer(ctx, client).await,
        ResumePrinter => printers::resume_printer(ctx, client).await,
        RestartPrinter => printers::restart_printer(ctx, client).await,
        ShutdownPrinter => printers::shutdown_printer(ctx, client).await,
        StartupPrinter => printers::startup_printer(ctx, client).await,

        CreateJobSubscriptions | CreatePrinterSubscriptions => {
            subscriptions::create_subscriptions(ctx, client).await
        }
        GetNotifications => subscriptions::get_notifications(ctx, client).await,
        GetSubscriptionAttributes => subscriptions::get_subscription_attributes(ctx, client).await,
        GetSubscriptions => subscriptions::get_subscriptions(ctx, client).await,
        RenewSubscription => subscriptions::renew_subscription(ctx, client).await,
        CancelSubscription => subscriptions::cancel_subscription(ctx, client).await,

        AcknowledgeDocument => proxy::acknowledge_document(ctx, client).await,
        AcknowledgeIdentifyPrinter => proxy::acknowledge_identify_printer(ctx, client).await,
        AcknowledgeJob => proxy::acknowledge_job(ctx, client).await,
        FetchDocument => proxy::fetch_document(ctx, client).await,
        FetchJob => proxy::fetch_job(ctx, client).await,
        GetOutputDeviceAttributes => proxy::get_output_device_attributes(ctx, client).await,
        UpdateActiveJobs => proxy::update_active_jobs(ctx, client).await,
        UpdateDocumentStatus => proxy::update_document_status(ctx, client).await,
        UpdateJobStatus => proxy::update_job_status(ctx, client).await,
        UpdateOutputDeviceAttributes => {
            proxy::update_output_device_attributes(ctx, client).await
        }
        DeregisterOutputDevice => proxy::deregister_output_device(ctx, client).await,

        AllocatePrinterResources => resources::allocate_printer_resources(ctx, client).await,
        DeallocatePrinterResources => resources::deallocate_printer_resources(ctx, client).await,

        _ => client.respond(
            StatusCode::ServerErrorOperationNotSupported,
            "Operation not supported.",
        ),
    }
}

async fn dispatch_system_op(ctx: &Arc<SystemContext>, client: &mut Client) {
    use ServerOp::*;

    let Some(op) = client.op else {
        client.respond(
            StatusCode::ServerErrorOperationNotSupported,
            "Operation not supported.",
        );
        return;
    };

    // A printer-id operation attribute selects a printer target under
    // the system URI.
    if let Some(attr) = client.request.find_in(GroupTag::Operation, "printer-id") {
        let printer_id = match msg::attr_int(attr) {
            Some(id) if id > 0 && msg::value_count(attr) == 1 => id,
            _ => {
                let attr = attr.clone();
                client.respond(StatusCode::ClientErrorBadRequest, "Bad printer-id attribute.");
                client.respond_unsupported(&attr);
                return;
            }
        };
        match ctx.printers.by_id(printer_id).await {
            Some(printer) => client.printer = Some(printer),
            None => {
                let attr = attr.clone();
                client.respond(StatusCode::ClientErrorNotFound, "Unknown printer-id.");
                client.respond_unsupported(&attr);
                return;
            }
        }
    }

    match op {
        GetPrinterAttributes => {
            if client.printer.is_none() {
                let default_id = *ctx.default_printer_id.read().await;
                match default_id {
                    Some(id) => client.printer = ctx.printers.by_id(id).await,
                    None => {}
                }
            }
            if client.printer.is_some() {
                printers::get_printer_attributes(ctx, client).await;
            } else {
                client.respond(StatusCode::ClientErrorNotFound, "No default printer.");
            }
        }

        GetSystemAttributes => system::get_system_attributes(ctx, client).await,
        GetSystemSupportedValues => system::get_system_supported_values(ctx, client).await,
        SetSystemAttributes => system::set_system_attributes(ctx, client).await,
        CreatePrinter => system::create_printer(ctx, client).await,
        GetPrinters => system::get_printers(ctx, client).await,
        DeletePrinter => {
            if client.printer.is_some() {
                system::delete_printer(ctx, client).await;
            } else {
                client.respond(StatusCode::ClientErrorBadRequest, "Missing printer-id.");
            }
        }
        DisableAllPrinters | EnableAllPrinters | PauseAllPrinters
        | PauseAllPrintersAfterCurrentJob | ResumeAllPrinters | ShutdownAllPrinters
        | StartupAllPrinters => system::all_printers_op(ctx, client, op).await,
        ShutdownOnePrinter => {
            if client.printer.is_some() {
                printers::shutdown_printer(ctx, client).await;
            } else {
                client.respond(StatusCode::ClientErrorBadRequest, "Missing printer-id.");
            }
        }
        StartupOnePrinter => {
            if client.printer.is_some() {
                printers::startup_printer(ctx, client).await;
            } else {
                client.respond(StatusCode::ClientErrorBadRequest, "Missing printer-id.");
            }
        }
        RestartSystem => system::restart_system(ctx, client).await,
        RegisterOutputDevice => proxy::register_output_device(ctx, client).await,

        CreateResource => resources::create_resource(ctx, client).await,
        SendResourceData => resources::send_resource_data(ctx, client).await,
        InstallResource => resources::install_resource(ctx, client).await,
        CancelResource => resources::cancel_resource(ctx, client).await,
        SetResourceAttributes => resources::set_resource_attributes(ctx, client).await,
        GetResourceAttributes => resources::get_resource_attributes(ctx, client).await,
        GetResources => resources::get_resources(ctx, client).await,

        CreateSystemSubscriptions | CreateResourceSubscriptions => {
            subscriptions::create_subscriptions(ctx, client).await
        }
        GetNotifications => subscriptions::get_notifications(ctx, client).await,
        GetSubscriptionAttributes => subscriptions::get_subscription_attributes(ctx, client).await,
        GetSubscriptions => subscriptions::get_subscriptions(ctx, client).await,
        RenewSubscription => subscriptions::renew_subscription(ctx, client).await,
        CancelSubscription => subscriptions::cancel_subscription(ctx, client).await,

        _ => client.respond(
            StatusCode::ServerErrorOperationNotSupported,
            "Operation not supported.",
        ),
    }
}

// ---------------------------------------------------------------------------
// Shared handler prologues
// ---------------------------------------------------------------------------

/// The printer target resolved by the dispatcher.  Routing guarantees
/// one for printer operations; answer an internal error rather than
/// asserting it.
pub(crate) fn printer_target(client: &mut Client) -> Option<PrinterRef> {
    if client.printer.is_none() {
        client.respond(
            StatusCode::ServerErrorInternalError,
            "No printer selected for this operation.",
        );
    }
    client.printer.clone()
}

/// Require an authenticated user when authentication is on.  Responds
/// and returns false on failure.
pub(crate) fn require_user(ctx: &SystemContext, client: &mut Client) -> bool {
    if !ctx.config.require_auth {
        return true;
    }
    if client.username.as_deref().is_none_or(str::is_empty) {
        client.respond(
            StatusCode::ClientErrorNotAuthenticated,
            "Authentication required.",
        );
        return false;
    }
    true
}

/// Admin-scoped operations: authenticated user in the admin group.
pub(crate) fn require_admin(ctx: &SystemContext, client: &mut Client) -> bool {
    if !ctx.config.require_auth {
        return true;
    }
    match auth::require_group(
        ctx.auth.as_ref(),
        client.username.as_deref(),
        ctx.config.admin_group.as_deref(),
    ) {
        Access::Granted => true,
        Access::Unauthenticated => {
            client.respond(
                StatusCode::ClientErrorNotAuthenticated,
                "Authentication required.",
            );
            false
        }
        Access::Forbidden => {
            client.respond(
                StatusCode::ClientErrorNotAuthorized,
                "Administrative rights required.",
            );
            false
        }
    }
}

/// Proxy-scoped operations: authenticated user in the target printer's
/// proxy group.
pub(crate) async fn require_proxy(ctx: &SystemContext, client: &mut Client) -> bool {
    if !ctx.config.require_auth {
        return true;
    }
    let group = match &client.printer {
        Some(printer) => printer.read().await.proxy_group.clone(),
        None => ctx.config.proxy_group.clone(),
    };
    match auth::require_group(ctx.auth.as_ref(), client.username.as_deref(), group.as_deref()) {
        Access::Granted => true,
        Access::Unauthenticated => {
            client.respond(
                StatusCode::ClientErrorNotAuthenticated,
                "Authentication required.",
            );
            false
        }
        Access::Forbidden => {
            client.respond(
                StatusCode::ClientErrorNotAuthorized,
                "Not authorized to proxy for this printer.",
            );
            false
        }
    }
}

/// Job-submission gate: the printer's print group, when set.
pub(crate) async fn require_print_group(ctx: &SystemContext, client: &mut Client) -> bool {
    if !ctx.config.require_auth {
        return true;
    }
    if !require_user(ctx, client) {
        return false;
    }
    let group = match &client.printer {
        Some(printer) => printer.read().await.print_group.clone(),
        None => None,
    };
    match auth::require_group(ctx.auth.as_ref(), client.username.as_deref(), group.as_deref()) {
        Access::Granted => true,
        _ => {
            client.respond(
                StatusCode::ClientErrorNotAuthorized,
                "Not authorized to access this printer.",
            );
            false
        }
    }
}

/// Whether the requester owns the object or holds admin rights; used to
/// decide privacy redaction rather than refusal.
pub(crate) fn can_see_private(ctx: &SystemContext, client: &Client, owner: &str) -> bool {
    if !ctx.config.require_auth {
        return true;
    }
    let user = client.requesting_user();
    auth::owns_or_admin(
        ctx.auth.as_ref(),
        Some(&user),
        owner,
        ctx.config.admin_group.as_deref(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use ipp::attribute::IppAttribute;
    use ipp::payload::IppPayload;
    use ipp::value::IppValue;
    use tokio::sync::RwLock;

    use druckwerk_core::config::ServerConfig;
    use druckwerk_core::types::{Event, Events, JobState, ServiceType};

    use crate::auth::AllowAll;
    use crate::msg::AttrGroup;
    use crate::printer::PrinterRef;
    use crate::subscription::Subscription;

    struct TestServer {
        ctx: Arc<SystemContext>,
        printer: PrinterRef,
        _spool: tempfile::TempDir,
    }

    async fn server() -> TestServer {
        let spool = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            spool_dir: spool.path().to_path_buf(),
            resource_dir: spool.path().to_path_buf(),
            ..Default::default()
        };
        let ctx = SystemContext::new(config, Arc::new(AllowAll));
        let printer = ctx.create_printer("office", ServiceType::Print).await;
        TestServer {
            ctx,
            printer,
            _spool: spool,
        }
    }

    fn printer_uri() -> String {
        "ipp://localhost:631/ipp/print/office".to_string()
    }

    fn system_uri() -> String {
        "ipp://localhost:631/ipp/system".to_string()
    }

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
        group.add(IppAttribute::new(uri_name, IppValue::Uri(uri.to_string())));
        msg.push_group(group);
        msg
    }

    async fn send(ctx: &Arc<SystemContext>, msg: IppMsg) -> Reply {
        process_request(ctx, Client::new(msg, None, None)).await
    }

    async fn send_with_payload(ctx: &Arc<SystemContext>, msg: IppMsg, data: &[u8]) -> Reply {
        let payload = IppPayload::new_async(futures::io::Cursor::new(data.to_vec()));
        process_request(ctx, Client::new(msg, None, Some(payload))).await
    }

    fn job_state(reply: &Reply) -> Option<i32> {
        reply
            .message
            .find_in(GroupTag::Job, "job-state")
            .and_then(msg::attr_int)
    }

    fn job_reasons(reply: &Reply) -> Vec<String> {
        reply
            .message
            .find_in(GroupTag::Job, "job-state-reasons")
            .map(|attr| {
                msg::as_values(attr.value())
                    .filter_map(msg::string_of)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn s1_hold_then_release() {
        let ts = server().await;

        // Create-Job with job-hold-until=indefinite.
        let mut req = base_request(ServerOp::CreateJob, "printer-uri", &printer_uri());
        req.add(
            GroupTag::Operation,
            IppAttribute::new("job-hold-until", IppValue::Keyword("indefinite".into())),
        );
        let reply = send(&ts.ctx, req).await;
        assert_eq!(reply.message.code, StatusCode::SuccessfulOk as u16);
        assert_eq!(job_state(&reply), Some(4));
        assert!(job_reasons(&reply).contains(&"job-hold-until-specified".to_string()));

        // Send-Document with last-document=true; the job stays held.
        let mut req = base_request(ServerOp::SendDocument, "printer-uri", &printer_uri());
        req.add(GroupTag::Operation, IppAttribute::new("job-id", IppValue::Integer(1)));
        req.add(
            GroupTag::Operation,
            IppAttribute::new("last-document", IppValue::Boolean(true)),
        );
        let reply = send_with_payload(&ts.ctx, req, b"TEST\nDATA\n").await;
        assert_eq!(reply.message.code, StatusCode::SuccessfulOk as u16);
        assert_eq!(job_state(&reply), Some(4));

        // Release-Job: with no transform configured the job runs straight
        // to completed.
        let mut req = base_request(ServerOp::ReleaseJob, "printer-uri", &printer_uri());
        req.add(GroupTag::Operation, IppAttribute::new("job-id", IppValue::Integer(1)));
        let reply = send(&ts.ctx, req).await;
        assert_eq!(reply.message.code, StatusCode::SuccessfulOk as u16);

        let job = ts.printer.read().await.job(1).cloned().unwrap();
        let j = job.read().await;
        assert_eq!(j.state, JobState::Completed);
        assert!(!j.state_reasons.contains(druckwerk_core::types::JobReason::JobStopped));

        // The spool file holds exactly the bytes sent.
        let spooled = std::fs::read(j.spool_file.as_ref().unwrap()).unwrap();
        assert_eq!(spooled, b"TEST\nDATA\n");
    }

    #[tokio::test]
    async fn s3_unsupported_value_echo() {
        let ts = server().await;

        let mut req = base_request(ServerOp::PrintJob, "printer-uri", &printer_uri());
        let mut job_group = AttrGroup::new(GroupTag::Job);
        job_group.add(IppAttribute::new("copies", IppValue::Integer(9999)));
        req.push_group(job_group);

        let reply = send_with_payload(&ts.ctx, req, b"%PDF-1.7").await;
        assert_eq!(
            reply.message.code,
            StatusCode::ClientErrorAttributesOrValuesNotSupported as u16
        );

        let unsupported = reply
            .message
            .find_in(GroupTag::Unsupported, "copies")
            .expect("copies echoed in unsupported group");
        assert_eq!(msg::attr_int(unsupported), Some(9999));

        // No job was created.
        assert!(ts.printer.read().await.jobs.is_empty());
    }

    #[tokio::test]
    async fn s4_proxy_fetchable_handshake() {
        let ts = server().await;
        let dev_uuid = uuid::Uuid::new_v4();
        {
            let mut p = ts.printer.write().await;
            p.proxy_group = Some("proxy".to_string());
            p.max_devices = 1;
        }

        // Submit a job; it becomes fetchable instead of printing.
        let req = base_request(ServerOp::PrintJob, "printer-uri", &printer_uri());
        let reply = send_with_payload(&ts.ctx, req, b"%PDF-1.7 data").await;
        assert_eq!(reply.message.code, StatusCode::SuccessfulOk as u16);
        assert_eq!(job_state(&reply), Some(3));
        assert!(job_reasons(&reply).contains(&"job-fetchable".to_string()));

        // Register the output device.
        let mut req = base_request(ServerOp::RegisterOutputDevice, "system-uri", &system_uri());
        req.add(
            GroupTag::Operation,
            IppAttribute::new(
                "output-device-uuid",
                IppValue::Uri(format!("urn:uuid:{dev_uuid}")),
            ),
        );
        let reply = send(&ts.ctx, req).await;
        assert_eq!(reply.message.code, StatusCode::SuccessfulOk as u16);
        assert!(reply.message.find_in(GroupTag::Printer, "printer-id").is_some());

        // Fetch-Job echoes the job attributes.
        let mut req = base_request(ServerOp::FetchJob, "printer-uri", &printer_uri());
        req.add(GroupTag::Operation, IppAttribute::new("job-id", IppValue::Integer(1)));
        req.add(
            GroupTag::Operation,
            IppAttribute::new(
                "output-device-uuid",
                IppValue::Uri(format!("urn:uuid:{dev_uuid}")),
            ),
        );
        let reply = send(&ts.ctx, req).await;
        assert_eq!(reply.message.code, StatusCode::SuccessfulOk as u16);
        assert_eq!(job_state(&reply), Some(3));

        // Acknowledge-Job assigns the device and clears job-fetchable.
        let mut req = base_request(ServerOp::AcknowledgeJob, "printer-uri", &printer_uri());
        req.add(GroupTag::Operation, IppAttribute::new("job-id", IppValue::Integer(1)));
        req.add(
            GroupTag::Operation,
            IppAttribute::new(
                "output-device-uuid",
                IppValue::Uri(format!("urn:uuid:{dev_uuid}")),
            ),
        );
        let reply = send(&ts.ctx, req).await;
        assert_eq!(reply.message.code, StatusCode::SuccessfulOk as u16);

        let job = ts.printer.read().await.job(1).cloned().unwrap();
        {
            let j = job.read().await;
            assert_eq!(j.dev_uuid, Some(dev_uuid));
            assert!(!j.state_reasons.contains(druckwerk_core::types::JobReason::JobFetchable));
        }

        // Fetch-Document streams the spool file uncompressed.
        let mut req = base_request(ServerOp::FetchDocument, "printer-uri", &printer_uri());
        req.add(GroupTag::Operation, IppAttribute::new("job-id", IppValue::Integer(1)));
        req.add(
            GroupTag::Operation,
            IppAttribute::new(
                "output-device-uuid",
                IppValue::Uri(format!("urn:uuid:{dev_uuid}")),
            ),
        );
        req.add(
            GroupTag::Operation,
            IppAttribute::new("document-number", IppValue::Integer(1)),
        );
        let reply = send(&ts.ctx, req).await;
        assert_eq!(reply.message.code, StatusCode::SuccessfulOk as u16);
        assert_eq!(
            reply
                .message
                .find_in(GroupTag::Operation, "compression")
                .and_then(msg::attr_string),
            Some("none")
        );
        match reply.body {
            Some(ResponseBody::File(path)) => {
                assert_eq!(std::fs::read(path).unwrap(), b"%PDF-1.7 data");
            }
            _ => panic!("expected a file body"),
        }
    }

    #[tokio::test]
    async fn s5_sparse_device_update() {
        let ts = server().await;
        let dev_uuid = uuid::Uuid::new_v4();
        {
            let mut p = ts.printer.write().await;
            p.proxy_group = Some("proxy".to_string());
            p.max_devices = 1;
        }

        // A printer-scoped subscription watching for media changes.
        let printer_id = ts.printer.read().await.id;
        let mut sub = Subscription::new(77, "monitor", Events::from(Event::PrinterMediaChanged), 0);
        sub.printer_id = Some(printer_id);
        ts.ctx.subscriptions.insert(77, Arc::new(RwLock::new(sub))).await;

        // Seed media-ready with five values.
        let mut req = base_request(
            ServerOp::UpdateOutputDeviceAttributes,
            "printer-uri",
            &printer_uri(),
        );
        req.add(
            GroupTag::Operation,
            IppAttribute::new(
                "output-device-uuid",
                IppValue::Uri(format!("urn:uuid:{dev_uuid}")),
            ),
        );
        let mut group = AttrGroup::new(GroupTag::Printer);
        group.add(IppAttribute::new(
            "media-ready",
            IppValue::Array(
                ["m1", "m2", "m3", "m4", "m5"]
                    .iter()
                    .map(|m| IppValue::Keyword(m.to_string()))
                    .collect(),
            ),
        ));
        req.push_group(group);
        let reply = send(&ts.ctx, req).await;
        assert_eq!(reply.message.code, StatusCode::SuccessfulOk as u16);

        // Sparse replace of index 3.
        let mut req = base_request(
            ServerOp::UpdateOutputDeviceAttributes,
            "printer-uri",
            &printer_uri(),
        );
        req.add(
            GroupTag::Operation,
            IppAttribute::new(
                "output-device-uuid",
                IppValue::Uri(format!("urn:uuid:{dev_uuid}")),
            ),
        );
        let mut group = AttrGroup::new(GroupTag::Printer);
        group.add(IppAttribute::new(
            "media-ready.3",
            IppValue::Keyword("na_letter_8.5x11in".into()),
        ));
        req.push_group(group);
        let reply = send(&ts.ctx, req).await;
        assert_eq!(reply.message.code, StatusCode::SuccessfulOk as u16);

        let device = ts.printer.read().await.find_device(dev_uuid).await.unwrap();
        let values: Vec<String> = msg::as_values(device.read().await.attrs["media-ready"].value())
            .filter_map(msg::string_of)
            .map(str::to_string)
            .collect();
        assert_eq!(values, ["m1", "m2", "na_letter_8.5x11in", "m4", "m5"]);

        // The media-changed event reached the subscription.
        let sub = ts.ctx.subscriptions.get(77).await.unwrap();
        let sub = sub.read().await;
        assert!(sub.last_sequence >= 1);
        assert!(
            sub.events_since(1)
                .any(|r| r.event == Event::PrinterMediaChanged)
        );
    }

    #[tokio::test]
    async fn s6_long_poll_notification() {
        let ts = server().await;
        let printer_id = ts.printer.read().await.id;

        let mut sub = Subscription::new(9, "alice", Events::from(Event::PrinterStateChanged), 0);
        sub.printer_id = Some(printer_id);
        ts.ctx.subscriptions.insert(9, Arc::new(RwLock::new(sub))).await;

        // B pauses the printer shortly after A starts waiting.
        let ctx_b = ts.ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let req = base_request(ServerOp::PausePrinter, "printer-uri", &printer_uri());
            send(&ctx_b, req).await;
        });

        let mut req = base_request(ServerOp::GetNotifications, "printer-uri", &printer_uri());
        req.add(
            GroupTag::Operation,
            IppAttribute::new("notify-subscription-ids", IppValue::Integer(9)),
        );
        req.add(
            GroupTag::Operation,
            IppAttribute::new("notify-sequence-numbers", IppValue::Integer(1)),
        );
        req.add(
            GroupTag::Operation,
            IppAttribute::new("notify-wait", IppValue::Boolean(true)),
        );

        let reply = tokio::time::timeout(Duration::from_secs(10), send(&ts.ctx, req))
            .await
            .expect("long-poll returns promptly once the event fires");

        assert_eq!(reply.message.code, StatusCode::SuccessfulOk as u16);
        assert_eq!(
            reply
                .message
                .find_in(GroupTag::Operation, "notify-get-interval")
                .and_then(msg::attr_int),
            Some(30)
        );
        let event_group = reply
            .message
            .first_group(GroupTag::EventNotification)
            .expect("one event notification group");
        let seq = event_group
            .get("notify-sequence-number")
            .and_then(msg::attr_int)
            .unwrap();
        assert!(seq >= 1);
    }

    #[tokio::test]
    async fn set_then_get_printer_attribute_round_trips() {
        let ts = server().await;

        let mut req = base_request(ServerOp::SetPrinterAttributes, "printer-uri", &printer_uri());
        let mut group = AttrGroup::new(GroupTag::Printer);
        group.add(IppAttribute::new(
            "printer-location",
            IppValue::TextWithoutLanguage("Lab 3".into()),
        ));
        req.push_group(group);
        let reply = send(&ts.ctx, req).await;
        assert_eq!(reply.message.code, StatusCode::SuccessfulOk as u16);

        let mut req = base_request(ServerOp::GetPrinterAttributes, "printer-uri", &printer_uri());
        req.add(
            GroupTag::Operation,
            IppAttribute::new(
                "requested-attributes",
                IppValue::Keyword("printer-location".into()),
            ),
        );
        let reply = send(&ts.ctx, req).await;
        let location = reply
            .message
            .find_in(GroupTag::Printer, "printer-location")
            .and_then(msg::attr_string);
        assert_eq!(location, Some("Lab 3"));
    }

    #[tokio::test]
    async fn set_printer_rejects_unsettable_attribute() {
        let ts = server().await;

        let mut req = base_request(ServerOp::SetPrinterAttributes, "printer-uri", &printer_uri());
        let mut group = AttrGroup::new(GroupTag::Printer);
        group.add(IppAttribute::new(
            "printer-make-and-model",
            IppValue::TextWithoutLanguage("Forged 9000".into()),
        ));
        req.push_group(group);
        let reply = send(&ts.ctx, req).await;
        assert_eq!(
            reply.message.code,
            StatusCode::ServerErrorInternalError as u16
        );
        // The offending name is echoed with the not-settable out-of-band
        // value.
        assert!(
            reply
                .message
                .find_in(GroupTag::Unsupported, "printer-make-and-model")
                .is_some()
        );
    }

    #[tokio::test]
    async fn get_jobs_not_completed_returns_active_only() {
        let ts = server().await;

        // One held job (stays active) and one completed job.
        let mut req = base_request(ServerOp::CreateJob, "printer-uri", &printer_uri());
        req.add(
            GroupTag::Operation,
            IppAttribute::new("job-hold-until", IppValue::Keyword("indefinite".into())),
        );
        send(&ts.ctx, req).await;

        let req = base_request(ServerOp::PrintJob, "printer-uri", &printer_uri());
        send_with_payload(&ts.ctx, req, b"data").await;

        let mut req = base_request(ServerOp::GetJobs, "printer-uri", &printer_uri());
        req.add(
            GroupTag::Operation,
            IppAttribute::new("which-jobs", IppValue::Keyword("not-completed".into())),
        );
        let reply = send(&ts.ctx, req).await;

        let states: Vec<i32> = reply
            .message
            .groups_of(GroupTag::Job)
            .filter_map(|g| g.get("job-state").and_then(msg::attr_int))
            .collect();
        assert_eq!(states, vec![4]);

        let mut req = base_request(ServerOp::GetJobs, "printer-uri", &printer_uri());
        req.add(
            GroupTag::Operation,
            IppAttribute::new("which-jobs", IppValue::Keyword("completed".into())),
        );
        let reply = send(&ts.ctx, req).await;
        let states: Vec<i32> = reply
            .message
            .groups_of(GroupTag::Job)
            .filter_map(|g| g.get("job-state").and_then(msg::attr_int))
            .collect();
        assert_eq!(states, vec![9]);
    }

    #[tokio::test]
    async fn cancel_terminal_job_is_not_possible() {
        let ts = server().await;

        let req = base_request(ServerOp::PrintJob, "printer-uri", &printer_uri());
        let reply = send_with_payload(&ts.ctx, req, b"data").await;
        assert_eq!(reply.message.code, StatusCode::SuccessfulOk as u16);

        // The job completed immediately (no transform); cancel must be
        // refused.
        let mut req = base_request(ServerOp::CancelJob, "printer-uri", &printer_uri());
        req.add(GroupTag::Operation, IppAttribute::new("job-id", IppValue::Integer(1)));
        let reply = send(&ts.ctx, req).await;
        assert_eq!(reply.message.code, StatusCode::ClientErrorNotPossible as u16);
    }

    #[tokio::test]
    async fn create_subscription_rejects_push_and_accepts_ippget() {
        let ts = server().await;

        let mut req = base_request(
            ServerOp::CreatePrinterSubscriptions,
            "printer-uri",
            &printer_uri(),
        );
        let mut group = AttrGroup::new(GroupTag::Subscription);
        group.add(IppAttribute::new(
            "notify-pull-method",
            IppValue::Keyword("ippget".into()),
        ));
        group.add(IppAttribute::new(
            "notify-events",
            IppValue::Keyword("job-completed".into()),
        ));
        req.push_group(group);

        let mut push_group = AttrGroup::new(GroupTag::Subscription);
        push_group.add(IppAttribute::new(
            "notify-recipient-uri",
            IppValue::Uri("ipp://listener/".into()),
        ));
        req.push_group(push_group);

        let reply = send(&ts.ctx, req).await;
        assert_eq!(
            reply.message.code,
            StatusCode::ServerErrorInternalError as u16
        );

        let groups: Vec<_> = reply.message.groups_of(GroupTag::Subscription).collect();
        assert_eq!(groups.len(), 2);
        assert!(groups[0].get("notify-subscription-id").is_some());
        assert!(groups[1].get("notify-status-code").is_some());
    }

    #[tokio::test]
    async fn shutdown_printer_refuses_operations_until_startup() {
        let ts = server().await;

        let req = base_request(ServerOp::ShutdownPrinter, "printer-uri", &printer_uri());
        let reply = send(&ts.ctx, req).await;
        assert_eq!(reply.message.code, StatusCode::SuccessfulOk as u16);

        let req = base_request(ServerOp::GetPrinterAttributes, "printer-uri", &printer_uri());
        let reply = send(&ts.ctx, req).await;
        assert_eq!(
            reply.message.code,
            StatusCode::ServerErrorServiceUnavailable as u16
        );

        let req = base_request(ServerOp::StartupPrinter, "printer-uri", &printer_uri());
        let reply = send(&ts.ctx, req).await;
        assert_eq!(reply.message.code, StatusCode::SuccessfulOk as u16);

        let req = base_request(ServerOp::GetPrinterAttributes, "printer-uri", &printer_uri());
        let reply = send(&ts.ctx, req).await;
        assert_eq!(reply.message.code, StatusCode::SuccessfulOk as u16);
    }

    #[tokio::test]
    async fn unsupported_operation_is_answered_as_such() {
        let ts = server().await;
        let mut req = base_request(ServerOp::GetPrinterAttributes, "printer-uri", &printer_uri());
        req.code = 0x7fff;
        let reply = send(&ts.ctx, req).await;
        assert_eq!(
            reply.message.code,
            StatusCode::ServerErrorOperationNotSupported as u16
        );
    }
}
