// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Transform subprocess supervision.
//
// A job entering local processing spawns the configured transform
// command with the spool file as its argument and the printer/job
// attributes flattened into IPP_* environment variables.  The child's
// stderr carries a line-oriented side channel: `STATE:` lines edit the
// job/printer state-reason sets, `ATTR:` lines update status attributes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use ipp::attribute::IppAttribute;
use ipp::value::IppValue;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStdout, Command};
use tracing::{debug, error, info};

use druckwerk_core::error::{DruckwerkError, Result};
use druckwerk_core::types::{JobReason, JobReasons, JobState, PrinterReason, PrinterReasons};

use crate::attrs::attribute_string;
use crate::job::JobRef;
use crate::printer::PrinterRef;
use crate::system::SystemContext;

/// Where the transform's stdout goes.
#[derive(Debug)]
pub enum TransformMode {
    /// Attribute/state updates only; output discarded.
    Command,
    /// Write printer-ready data to this file.
    ToFile(PathBuf),
    /// Stream printer-ready data back to the requesting client.
    ToClient,
}

/// Deliver SIGTERM to a running transform child.
#[cfg(unix)]
pub fn terminate(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
}

#[cfg(not(unix))]
pub fn terminate(_pid: u32) {}

/// Run the transform for a job and wait for it to exit, applying the
/// stderr side channel as it arrives.  Returns the raw exit code
/// (None when killed by a signal).
pub async fn run_transform(
    ctx: &Arc<SystemContext>,
    printer: &PrinterRef,
    job: &JobRef,
    command: &str,
    output_format: Option<&str>,
    mode: TransformMode,
) -> Result<Option<i32>> {
    let mut child = spawn(ctx, printer, job, command, output_format, &mode).await?;
    let stderr = child.stderr.take();

    if let Some(stderr) = stderr {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            process_stderr_line(printer, job, &line, matches!(mode, TransformMode::Command)).await;
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| DruckwerkError::Transform(format!("wait: {e}")))?;
    job.write().await.transform_pid = None;

    report_exit(command, &status);
    Ok(status.code())
}

/// Spawn a transform whose stdout streams to the client; the caller owns
/// the stdout handle, and a background task drains stderr and reaps the
/// child.
pub async fn spawn_to_client(
    ctx: &Arc<SystemContext>,
    printer: &PrinterRef,
    job: &JobRef,
    command: &str,
    output_format: &str,
) -> Result<ChildStdout> {
    let mut child = spawn(
        ctx,
        printer,
        job,
        command,
        Some(output_format),
        &TransformMode::ToClient,
    )
    .await?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| DruckwerkError::Transform("no stdout pipe".into()))?;
    let stderr = child.stderr.take();

    let printer = printer.clone();
    let job = job.clone();
    let command = command.to_string();
    tokio::spawn(async move {
        if let Some(stderr) = stderr {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                process_stderr_line(&printer, &job, &line, false).await;
            }
        }
        if let Ok(status) = child.wait().await {
            report_exit(&command, &status);
        }
        job.write().await.transform_pid = None;
    });

    Ok(stdout)
}

async fn spawn(
    ctx: &Arc<SystemContext>,
    printer: &PrinterRef,
    job: &JobRef,
    command: &str,
    output_format: Option<&str>,
    mode: &TransformMode,
) -> Result<tokio::process::Child> {
    let resolved = if command.starts_with('/') {
        PathBuf::from(command)
    } else {
        ctx.config.bin_dir.join(command)
    };

    let (spool_file, env) = {
        let printer = printer.read().await;
        let job_guard = job.read().await;
        let spool = job_guard
            .spool_file
            .clone()
            .ok_or_else(|| DruckwerkError::Transform("job has no spool file".into()))?;
        (spool, build_environment(&printer, &job_guard, output_format))
    };

    debug!(command = %resolved.display(), file = %spool_file.display(), "running transform");

    let mut cmd = Command::new(&resolved);
    cmd.arg(&spool_file)
        .envs(env)
        .stdin(Stdio::null())
        .stderr(Stdio::piped());

    match mode {
        TransformMode::Command => {
            cmd.stdout(Stdio::null());
        }
        TransformMode::ToFile(path) => {
            let file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
                .map_err(|e| DruckwerkError::Transform(format!("output file: {e}")))?;
            cmd.stdout(Stdio::from(file));
        }
        TransformMode::ToClient => {
            cmd.stdout(Stdio::piped());
        }
    }

    let child = cmd
        .spawn()
        .map_err(|e| DruckwerkError::Transform(format!("unable to start {command}: {e}")))?;

    job.write().await.transform_pid = child.id();
    Ok(child)
}

fn report_exit(command: &str, status: &std::process::ExitStatus) {
    if status.success() {
        return;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            if signal != libc_sigterm() {
                error!(command, signal, "transform command crashed on signal");
            }
            return;
        }
    }
    if let Some(code) = status.code() {
        error!(command, code, "transform command exited with status");
    }
}

#[cfg(unix)]
fn libc_sigterm() -> i32 {
    nix::sys::signal::Signal::SIGTERM as i32
}

/// Build the child environment: the parent environment plus the
/// transform contract variables and one IPP_* entry per attribute.
fn build_environment(
    printer: &crate::printer::Printer,
    job: &crate::job::Job,
    output_format: Option<&str>,
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();

    env.insert("CONTENT_TYPE".into(), job.format.clone());
    if let Some(device_uri) = &printer.device_uri {
        env.insert("DEVICE_URI".into(), device_uri.clone());
    }
    if let Some(format) = output_format {
        env.insert("OUTPUT_TYPE".into(), format.to_string());
    }
    env.insert("SERVER_LOGLEVEL".into(), "info".into());

    // Device capabilities and printer defaults: only "-default" and
    // "pwg-" attributes cross into the environment.
    for (name, attr) in &printer.dev_attrs {
        if is_env_printer_attr(name) {
            env.insert(env_name(name), attribute_string(attr));
        }
    }
    for (name, attr) in &printer.attrs {
        if is_env_printer_attr(name) && !printer.dev_attrs.contains_key(name) {
            env.insert(env_name(name), attribute_string(attr));
        }
    }

    for (name, attr) in &job.doc_attrs {
        env.insert(env_name(name), attribute_string(attr));
    }
    for (name, attr) in &job.attrs {
        if !job.doc_attrs.contains_key(name) {
            env.insert(env_name(name), attribute_string(attr));
        }
    }

    env
}

fn is_env_printer_attr(name: &str) -> bool {
    name.starts_with("pwg-") || name.ends_with("-default")
}

/// `media-default` -> `IPP_MEDIA_DEFAULT`.
pub fn env_name(attr_name: &str) -> String {
    let mut out = String::with_capacity(attr_name.len() + 4);
    out.push_str("IPP_");
    for c in attr_name.chars() {
        if c == '-' {
            out.push('_');
        } else {
            out.push(c.to_ascii_uppercase());
        }
    }
    out
}

async fn process_stderr_line(printer: &PrinterRef, job: &JobRef, line: &str, command_mode: bool) {
    if let Some(rest) = line.strip_prefix("STATE:") {
        let (job_reasons, printer_reasons) = {
            let job = job.read().await;
            let printer = printer.read().await;
            (job.state_reasons, printer.state_reasons)
        };
        let update = apply_state_message(rest, job_reasons, printer_reasons);

        {
            let mut job = job.write().await;
            job.state_reasons = update.job_reasons;
            if update.abort_job && !job.state.is_terminal() {
                job.state = JobState::Aborted;
            }
        }
        printer.write().await.state_reasons = update.printer_reasons;
    } else if let Some(rest) = line.strip_prefix("ATTR:") {
        apply_attr_message(printer, job, rest, command_mode).await;
    } else {
        debug!(line, "transform output");
    }
}

/// Result of applying a `STATE:` message to the current reason sets.
#[derive(Debug, PartialEq, Eq)]
pub struct StateUpdate {
    pub job_reasons: JobReasons,
    pub printer_reasons: PrinterReasons,
    pub abort_job: bool,
}

/// Apply a `STATE: [+|-]keyword[,keyword...]` message.
///
/// Without a prefix the printer reasons are replaced by the parsed set
/// while the job reasons merge.  Keywords may carry an `-error`,
/// `-report`, or `-warning` suffix which is stripped for printer-reason
/// matching; a bare `-error` suffix also aborts the job.
pub fn apply_state_message(
    message: &str,
    job_reasons: JobReasons,
    printer_reasons: PrinterReasons,
) -> StateUpdate {
    let message = message.trim_start();

    let (remove, mut jreasons, mut preasons, rest) = match message.as_bytes().first() {
        Some(b'-') => (true, job_reasons, printer_reasons, &message[1..]),
        Some(b'+') => (false, job_reasons, printer_reasons, &message[1..]),
        _ => (false, job_reasons, PrinterReasons::NONE, message),
    };

    let mut abort_job = false;

    for keyword in rest.split(',') {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            continue;
        }

        if let Some(jreason) = JobReason::from_keyword(keyword) {
            if remove {
                jreasons.remove(jreason);
            } else {
                jreasons.insert(jreason);
            }
        }

        let stripped = if let Some(s) = keyword.strip_suffix("-error") {
            abort_job = true;
            s
        } else if let Some(s) = keyword.strip_suffix("-report") {
            s
        } else if let Some(s) = keyword.strip_suffix("-warning") {
            s
        } else {
            keyword
        };

        if let Some(preason) = PrinterReason::from_keyword(stripped) {
            if remove {
                preasons.remove(preason);
            } else {
                preasons.insert(preason);
            }
        }
    }

    StateUpdate {
        job_reasons: jreasons,
        printer_reasons: preasons,
        abort_job,
    }
}

async fn apply_attr_message(printer: &PrinterRef, job: &JobRef, rest: &str, command_mode: bool) {
    for (name, value) in parse_options(rest) {
        match name.as_str() {
            "job-impressions" => {
                if let Ok(n) = value.parse::<i32>() {
                    job.write().await.impressions = Some(n);
                }
            }
            "job-impressions-completed" if command_mode => {
                if let Ok(n) = value.parse::<i32>() {
                    job.write().await.impressions_completed = n;
                }
            }
            "job-impressions-col" | "job-media-sheets" | "job-media-sheets-col" => {
                set_text_attr(&mut job.write().await.attrs, &name, &value);
            }
            "job-impressions-completed-col"
            | "job-media-sheets-completed"
            | "job-media-sheets-completed-col"
                if command_mode =>
            {
                set_text_attr(&mut job.write().await.attrs, &name, &value);
            }
            _ if name.starts_with("marker-")
                || name == "printer-alert"
                || name == "printer-supply"
                || name == "printer-supply-description" =>
            {
                info!(attr = %name, value = %value, "printer status update from transform");
                set_text_attr(&mut printer.write().await.attrs, &name, &value);
            }
            _ => {
                debug!(attr = %name, value = %value, "ignoring transform attribute");
            }
        }
    }
}

fn set_text_attr(bag: &mut HashMap<String, IppAttribute>, name: &str, value: &str) {
    bag.insert(
        name.to_string(),
        IppAttribute::new(name, IppValue::TextWithoutLanguage(value.to_string())),
    );
}

/// Parse `name=value name2='quoted value' name3={collection}` options.
pub fn parse_options(input: &str) -> Vec<(String, String)> {
    let mut options = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c.is_whitespace() {
                break;
            }
            name.push(c);
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'=') {
            chars.next();
            match chars.peek() {
                Some(&quote @ ('\'' | '"')) => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == quote {
                            break;
                        }
                        value.push(c);
                    }
                }
                Some(&'{') => {
                    let mut depth = 0;
                    for c in chars.by_ref() {
                        value.push(c);
                        if c == '{' {
                            depth += 1;
                        } else if c == '}' {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                    }
                }
                _ => {
                    while let Some(&c) = chars.peek() {
                        if c.is_whitespace() {
                            break;
                        }
                        value.push(c);
                        chars.next();
                    }
                }
            }
        }

        if !name.is_empty() {
            options.push((name, value));
        }
    }

    options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_names_are_upper_snake_with_prefix() {
        assert_eq!(env_name("media-default"), "IPP_MEDIA_DEFAULT");
        assert_eq!(env_name("pwg-raster-document-sheet-back"), "IPP_PWG_RASTER_DOCUMENT_SHEET_BACK");
        assert_eq!(env_name("copies"), "IPP_COPIES");
    }

    #[test]
    fn options_parse_plain_quoted_and_collections() {
        let opts = parse_options(" job-impressions=5 media='na letter' over={a=1 b=2} flag");
        assert_eq!(
            opts,
            vec![
                ("job-impressions".to_string(), "5".to_string()),
                ("media".to_string(), "na letter".to_string()),
                ("over".to_string(), "{a=1 b=2}".to_string()),
                ("flag".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn bare_state_message_replaces_printer_reasons_and_merges_job() {
        let mut job = JobReasons::NONE;
        job.insert(JobReason::JobPrinting);
        let mut printer = PrinterReasons::NONE;
        printer.insert(PrinterReason::MediaLow);

        let update = apply_state_message(" media-empty", job, printer);
        assert!(update.job_reasons.contains(JobReason::JobPrinting));
        assert!(update.printer_reasons.contains(PrinterReason::MediaEmpty));
        assert!(!update.printer_reasons.contains(PrinterReason::MediaLow));
        assert!(!update.abort_job);
    }

    #[test]
    fn plus_and_minus_edit_existing_sets() {
        let mut printer = PrinterReasons::NONE;
        printer.insert(PrinterReason::MediaLow);

        let update = apply_state_message("+media-empty,cover-open", JobReasons::NONE, printer);
        assert!(update.printer_reasons.contains(PrinterReason::MediaLow));
        assert!(update.printer_reasons.contains(PrinterReason::MediaEmpty));
        assert!(update.printer_reasons.contains(PrinterReason::CoverOpen));

        let update = apply_state_message("-media-low", JobReasons::NONE, update.printer_reasons);
        assert!(!update.printer_reasons.contains(PrinterReason::MediaLow));
        assert!(update.printer_reasons.contains(PrinterReason::MediaEmpty));
    }

    #[test]
    fn error_suffix_aborts_and_strips_for_matching() {
        let update = apply_state_message("media-jam-error", JobReasons::NONE, PrinterReasons::NONE);
        assert!(update.abort_job);
        assert!(update.printer_reasons.contains(PrinterReason::MediaJam));

        let update = apply_state_message("media-jam-warning", JobReasons::NONE, PrinterReasons::NONE);
        assert!(!update.abort_job);
        assert!(update.printer_reasons.contains(PrinterReason::MediaJam));

        let update = apply_state_message("media-jam-report", JobReasons::NONE, PrinterReasons::NONE);
        assert!(!update.abort_job);
        assert!(update.printer_reasons.contains(PrinterReason::MediaJam));
    }

    #[test]
    fn job_reason_keywords_match_before_suffix_strip() {
        let update = apply_state_message(
            "job-canceled-at-device",
            JobReasons::NONE,
            PrinterReasons::NONE,
        );
        assert!(update.job_reasons.contains(JobReason::JobCanceledAtDevice));
    }
}
