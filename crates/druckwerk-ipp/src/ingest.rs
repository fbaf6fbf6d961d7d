// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document ingest: stream an inline payload or a referenced URI into a
// freshly created spool file, sniffing the format on the way through.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_compression::futures::bufread::GzipDecoder;
use futures::io::{AsyncReadExt, BufReader};
use ipp::payload::IppPayload;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use druckwerk_core::config::ServerConfig;

use crate::names;

/// Outcome of spooling a document.
#[derive(Debug)]
pub struct IngestResult {
    pub bytes: u64,
    /// Format sniffed from the first bytes, if recognizable.
    pub detected: Option<&'static str>,
}

/// Failure fetching a referenced document, split by the status code the
/// operation must answer with.
#[derive(Debug, thiserror::Error)]
pub enum DocFetchError {
    #[error("URI scheme \"{0}\" not supported")]
    Scheme(String),
    #[error("unable to access URI: {0}")]
    Access(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Map magic numbers in the first 8 bytes to a MIME type.
pub fn detect_format(header: &[u8]) -> Option<&'static str> {
    if header.starts_with(b"%PDF") {
        Some("application/pdf")
    } else if header.starts_with(b"%!") {
        Some("application/postscript")
    } else if header.len() >= 4
        && header.starts_with(&[0xff, 0xd8, 0xff])
        && (0xe0..=0xef).contains(&header[3])
    {
        Some("image/jpeg")
    } else if header.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("image/png")
    } else if header.starts_with(b"RAS2") {
        Some("image/pwg-raster")
    } else if header.starts_with(b"UNIRAST") && header.len() >= 8 {
        Some("image/urf")
    } else {
        None
    }
}

/// File extension used in spool filenames for a document format.
pub fn format_extension(format: &str) -> &'static str {
    match format {
        "application/pdf" => "pdf",
        "application/postscript" => "ps",
        "application/vnd.hp-pcl" => "pcl",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/pwg-raster" => "pwg",
        "image/urf" => "urf",
        "text/plain" => "txt",
        _ => "prn",
    }
}

/// Spool filename for a printer/job/format triple.
pub fn spool_filename(config: &ServerConfig, printer_name: &str, job_id: i32, format: &str) -> PathBuf {
    config.spool_dir.join(format!(
        "{printer_name}-{job_id:05}.{}",
        format_extension(format)
    ))
}

/// Stream the request payload into `path`, optionally gunzipping, and
/// fsync on EOF.  The file is created exclusively with mode 0600; a
/// failure removes the partial file.
pub async fn spool_payload(
    path: &Path,
    payload: IppPayload,
    gzip: bool,
) -> std::io::Result<IngestResult> {
    let file = create_spool_file(path).await?;
    let result = if gzip {
        let decoder = GzipDecoder::new(BufReader::new(payload));
        copy_to_spool(path, file, decoder).await
    } else {
        copy_to_spool(path, file, payload).await
    };

    if result.is_err() {
        let _ = tokio::fs::remove_file(path).await;
    }
    result
}

/// Write already-fetched bytes (Print-URI/Send-URI) into the spool file.
pub async fn spool_bytes(path: &Path, data: &[u8]) -> std::io::Result<IngestResult> {
    let mut file = create_spool_file(path).await?;
    let result: std::io::Result<()> = async {
        file.write_all(data).await?;
        file.sync_all().await
    }
    .await;

    if let Err(err) = result {
        let _ = tokio::fs::remove_file(path).await;
        return Err(err);
    }

    debug!(path = %path.display(), bytes = data.len(), "document spooled");
    Ok(IngestResult {
        bytes: data.len() as u64,
        detected: detect_format(&data[..data.len().min(8)]),
    })
}

async fn copy_to_spool(
    path: &Path,
    mut file: tokio::fs::File,
    mut source: impl futures::io::AsyncRead + Unpin,
) -> std::io::Result<IngestResult> {
    let mut header = [0u8; 8];
    let mut header_len = 0usize;
    let mut total = 0u64;
    let mut buffer = vec![0u8; 65536];

    loop {
        let n = source.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        if header_len < header.len() {
            let take = (header.len() - header_len).min(n);
            header[header_len..header_len + take].copy_from_slice(&buffer[..take]);
            header_len += take;
        }
        file.write_all(&buffer[..n]).await?;
        total += n as u64;
    }

    file.sync_all().await?;
    debug!(path = %path.display(), bytes = total, "document spooled");

    Ok(IngestResult {
        bytes: total,
        detected: detect_format(&header[..header_len]),
    })
}

async fn create_spool_file(path: &Path) -> std::io::Result<tokio::fs::File> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);
    options.open(path).await
}

/// Fetch a `file:` or `http(s):` document URI into memory.
///
/// `file:` paths must pass the allow-list and resolve to a regular,
/// non-symlinked file.  HTTP redirects are followed up to ten hops and
/// only within the http/https schemes.
pub async fn fetch_document_uri(
    config: &ServerConfig,
    uri: &str,
) -> Result<Vec<u8>, DocFetchError> {
    if let Some(path) = uri.strip_prefix("file://") {
        return fetch_file(config, path).await;
    }

    match uri.split(':').next().unwrap_or_default() {
        "http" | "https" => fetch_http(uri).await,
        "" => Err(DocFetchError::Access(format!("bad document-uri '{uri}'"))),
        other => Err(DocFetchError::Scheme(other.to_string())),
    }
}

async fn fetch_file(config: &ServerConfig, path: &str) -> Result<Vec<u8>, DocFetchError> {
    if !names::valid_filename(path, &config.file_directories) {
        return Err(DocFetchError::Access(format!(
            "filename '{path}' not allowed"
        )));
    }

    let meta = tokio::fs::symlink_metadata(path).await?;
    if meta.file_type().is_symlink() || !meta.file_type().is_file() {
        return Err(DocFetchError::Access(format!(
            "'{path}' is not a regular file"
        )));
    }

    Ok(tokio::fs::read(path).await?)
}

async fn fetch_http(uri: &str) -> Result<Vec<u8>, DocFetchError> {
    let policy = reqwest::redirect::Policy::custom(|attempt| {
        if attempt.previous().len() >= 10 {
            attempt.error("too many redirects")
        } else if !matches!(attempt.url().scheme(), "http" | "https") {
            attempt.error("redirected to unsupported URI scheme")
        } else {
            attempt.follow()
        }
    });

    let client = reqwest::Client::builder()
        .redirect(policy)
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| DocFetchError::Access(e.to_string()))?;

    let response = client
        .get(uri)
        .send()
        .await
        .map_err(|e| DocFetchError::Access(e.to_string()))?;

    if !response.status().is_success() {
        warn!(uri, status = %response.status(), "document GET failed");
        return Err(DocFetchError::Access(format!(
            "unable to GET URI: {}",
            response.status()
        )));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| DocFetchError::Access(e.to_string()))?;
    Ok(body.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_numbers_map_to_formats() {
        assert_eq!(detect_format(b"%PDF-1.7"), Some("application/pdf"));
        assert_eq!(detect_format(b"%!PS-Ado"), Some("application/postscript"));
        assert_eq!(
            detect_format(&[0xff, 0xd8, 0xff, 0xe1, 0, 0, 0, 0]),
            Some("image/jpeg")
        );
        assert_eq!(
            detect_format(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]),
            Some("image/png")
        );
        assert_eq!(detect_format(b"RAS2pwgr"), Some("image/pwg-raster"));
        assert_eq!(detect_format(b"UNIRAST\0"), Some("image/urf"));
        assert_eq!(detect_format(b"TEST\nDAT"), None);
        assert_eq!(
            detect_format(&[0xff, 0xd8, 0xff, 0x00, 0, 0, 0, 0]),
            None
        );
    }

    #[tokio::test]
    async fn payload_is_spooled_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("office-00001.pdf");

        let data = b"%PDF-1.7 fake document".to_vec();
        let payload = IppPayload::new_async(futures::io::Cursor::new(data.clone()));
        let result = spool_payload(&path, payload, false).await.unwrap();

        assert_eq!(result.bytes, data.len() as u64);
        assert_eq!(result.detected, Some("application/pdf"));
        assert_eq!(tokio::fs::read(&path).await.unwrap(), data);
    }

    #[tokio::test]
    async fn existing_spool_file_is_never_clobbered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("office-00001.prn");
        tokio::fs::write(&path, b"already here").await.unwrap();

        let payload = IppPayload::new_async(futures::io::Cursor::new(b"new".to_vec()));
        assert!(spool_payload(&path, payload, false).await.is_err());
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"already here");
    }

    #[tokio::test]
    async fn file_uri_outside_allow_list_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("doc.txt");
        tokio::fs::write(&doc, b"hello").await.unwrap();

        let mut config = ServerConfig::default();
        let err = fetch_document_uri(&config, &format!("file://{}", doc.display()))
            .await
            .unwrap_err();
        assert!(matches!(err, DocFetchError::Access(_)));

        config.file_directories = vec![dir.path().to_path_buf()];
        let data = fetch_document_uri(&config, &format!("file://{}", doc.display()))
            .await
            .unwrap();
        assert_eq!(data, b"hello");
    }

    #[tokio::test]
    async fn unsupported_scheme_is_split_out() {
        let config = ServerConfig::default();
        let err = fetch_document_uri(&config, "ftp://example.com/doc.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, DocFetchError::Scheme(s) if s == "ftp"));
    }

    #[test]
    fn spool_filenames_embed_printer_job_and_format() {
        let config = ServerConfig {
            spool_dir: PathBuf::from("/var/spool/druckwerk"),
            ..Default::default()
        };
        assert_eq!(
            spool_filename(&config, "office", 42, "application/pdf"),
            PathBuf::from("/var/spool/druckwerk/office-00042.pdf")
        );
    }
}
