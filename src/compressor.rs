//! C2 — the compression capability (spec §4.2).
//!
//! `Compressor` is the sole interface the pipeline depends on; it is a
//! capability, not a component with its own concurrency, and must be
//! safe to call from multiple worker threads at once. `TinyPngCompressor`
//! is the concrete default wired up by `main.rs`; tests exercise the
//! pipeline against `MockCompressor` instead.

use std::io::Write;
use std::time::Duration;

use base64::Engine;

use crate::cancel::CancelToken;
use crate::error::ErrorKind;
use crate::key_pool::ApiKey;

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub remote_ref: String,
    pub input_size: u64,
    pub input_mime: String,
    pub quota_used: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub output_size: u64,
    pub output_mime: String,
    pub quota_used: Option<u64>,
}

/// One remote compression round-trip. Implementations classify every
/// failure into `ErrorKind` themselves — that classification is the
/// entire contract the pipeline relies on (spec §4.2).
pub trait Compressor: Send + Sync {
    fn upload(
        &self,
        ctx: &CancelToken,
        key: &ApiKey,
        data: &[u8],
    ) -> Result<UploadOutcome, ErrorKind>;

    fn download(
        &self,
        ctx: &CancelToken,
        key: &ApiKey,
        remote_ref: &str,
        writer: &mut dyn Write,
    ) -> Result<DownloadOutcome, ErrorKind>;

    /// Optional probe for the remote-reported cumulative quota count.
    /// Per DESIGN.md this never counts against `max_key_errors`.
    fn quota(&self, ctx: &CancelToken, key: &ApiKey) -> Result<u64, ErrorKind>;
}

/// Default collaborator: talks to a TinyPNG-compatible HTTP API.
pub struct TinyPngCompressor {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl TinyPngCompressor {
    pub fn new() -> Self {
        Self::with_base_url("https://api.tinify.com")
    }

    /// Exposed for tests that want to point at a local stub server.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client config is valid");
        Self { client, base_url: base_url.into() }
    }

    fn basic_auth_header(key: &ApiKey) -> String {
        let raw = format!("api:{}", key.as_str());
        format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(raw))
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> ErrorKind {
        match status.as_u16() {
            401 | 403 => ErrorKind::BadCredential,
            429 => {
                if body.contains("TooManyRequests") || body.contains("quota") {
                    ErrorKind::QuotaExhausted
                } else {
                    ErrorKind::Transient
                }
            }
            415 => ErrorKind::NotAnImage,
            500..=599 => ErrorKind::Transient,
            _ => ErrorKind::Transient,
        }
    }

    /// Any transport-level failure (timeout, connect refused, reset) is
    /// treated as transient; none of them indicate a bad credential or
    /// quota state, so there is nothing else to distinguish here.
    fn classify_transport_error(_err: &reqwest::Error) -> ErrorKind {
        ErrorKind::Transient
    }
}

impl Default for TinyPngCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for TinyPngCompressor {
    fn upload(
        &self,
        ctx: &CancelToken,
        key: &ApiKey,
        data: &[u8],
    ) -> Result<UploadOutcome, ErrorKind> {
        if ctx.is_canceled() {
            return Err(ErrorKind::Canceled);
        }
        let input_size = data.len() as u64;
        let resp = self
            .client
            .post(format!("{}/shrink", self.base_url))
            .header("Authorization", Self::basic_auth_header(key))
            .body(data.to_vec())
            .send()
            .map_err(|e| Self::classify_transport_error(&e))?;

        if ctx.is_canceled() {
            return Err(ErrorKind::Canceled);
        }

        let quota_used = resp
            .headers()
            .get("Compression-Count")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        let remote_ref = resp
            .headers()
            .get("Location")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or(ErrorKind::Transient)?;

        let input_mime = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        Ok(UploadOutcome { remote_ref, input_size, input_mime, quota_used })
    }

    fn download(
        &self,
        ctx: &CancelToken,
        key: &ApiKey,
        remote_ref: &str,
        writer: &mut dyn Write,
    ) -> Result<DownloadOutcome, ErrorKind> {
        if ctx.is_canceled() {
            return Err(ErrorKind::Canceled);
        }
        let mut resp = self
            .client
            .get(remote_ref)
            .header("Authorization", Self::basic_auth_header(key))
            .send()
            .map_err(|e| Self::classify_transport_error(&e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        let output_mime = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let quota_used = resp
            .headers()
            .get("Compression-Count")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let mut output_size = 0u64;
        let mut buf = [0u8; 64 * 1024];
        loop {
            if ctx.is_canceled() {
                return Err(ErrorKind::Canceled);
            }
            let n = std::io::Read::read(&mut resp, &mut buf).map_err(|_| ErrorKind::Transient)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).map_err(|_| ErrorKind::Io)?;
            output_size += n as u64;
        }

        Ok(DownloadOutcome { output_size, output_mime, quota_used })
    }

    fn quota(&self, ctx: &CancelToken, key: &ApiKey) -> Result<u64, ErrorKind> {
        if ctx.is_canceled() {
            return Err(ErrorKind::Canceled);
        }
        let resp = self
            .client
            .post(format!("{}/shrink", self.base_url))
            .header("Authorization", Self::basic_auth_header(key))
            .body(Vec::new())
            .send()
            .map_err(|e| Self::classify_transport_error(&e))?;
        let quota = resp
            .headers()
            .get("Compression-Count")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or(ErrorKind::Transient)?;
        Ok(quota)
    }
}

/// First-32-bytes magic sniff used by the upload stage (spec §4.3.5).
/// `original_source/` was filtered out of the retrieval pack, so this
/// signature table is hand-maintained rather than translated from it.
pub fn sniff_image_mime(head: &[u8]) -> Option<&'static str> {
    const SIGS: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"BM", "image/bmp"),
        (b"II*\x00", "image/tiff"),
        (b"MM\x00*", "image/tiff"),
    ];
    for (sig, mime) in SIGS {
        if head.len() >= sig.len() && &head[..sig.len()] == *sig {
            return Some(mime);
        }
    }
    if head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    None
}

/// Deterministic `Compressor` used to drive the scenarios in spec §8
/// without a network, from both unit tests and `tests/` integration
/// tests. Grounded on the teacher's `mock_io.rs` fault-injection style
/// (`PartialReader`/`FailingWriter`), which is likewise a plain
/// (non-`cfg(test)`) module so it's reachable from `tests/`.
#[allow(dead_code)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    pub enum Script {
        Succeed,
        FailThenSucceed { fail_times: usize, kind: ErrorKind },
        AlwaysFail(ErrorKind),
        FailOnceOnKey { key: String, kind: ErrorKind },
    }

    pub struct MockCompressor {
        script: Mutex<Script>,
        attempts: AtomicU64,
        download_bytes: Vec<u8>,
    }

    impl MockCompressor {
        pub fn new(script: Script, download_bytes: Vec<u8>) -> Self {
            Self { script: Mutex::new(script), attempts: AtomicU64::new(0), download_bytes }
        }

        pub fn attempts(&self) -> u64 {
            self.attempts.load(Ordering::SeqCst)
        }

        fn should_fail(&self, key: &ApiKey) -> Option<ErrorKind> {
            let mut script = self.script.lock().unwrap();
            match &mut *script {
                Script::Succeed => None,
                Script::AlwaysFail(kind) => Some(kind.clone()),
                Script::FailThenSucceed { fail_times, kind } => {
                    if *fail_times > 0 {
                        *fail_times -= 1;
                        Some(kind.clone())
                    } else {
                        None
                    }
                }
                Script::FailOnceOnKey { key: bad_key, kind } => {
                    if bad_key == key.as_str() {
                        let k = kind.clone();
                        *script = Script::Succeed;
                        Some(k)
                    } else {
                        None
                    }
                }
            }
        }
    }

    impl Compressor for MockCompressor {
        fn upload(
            &self,
            ctx: &CancelToken,
            key: &ApiKey,
            data: &[u8],
        ) -> Result<UploadOutcome, ErrorKind> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if ctx.is_canceled() {
                return Err(ErrorKind::Canceled);
            }
            if let Some(kind) = self.should_fail(key) {
                return Err(kind);
            }
            Ok(UploadOutcome {
                remote_ref: "mock://ref".to_string(),
                input_size: data.len() as u64,
                input_mime: "image/png".to_string(),
                quota_used: Some(1),
            })
        }

        fn download(
            &self,
            ctx: &CancelToken,
            key: &ApiKey,
            _remote_ref: &str,
            writer: &mut dyn Write,
        ) -> Result<DownloadOutcome, ErrorKind> {
            if ctx.is_canceled() {
                return Err(ErrorKind::Canceled);
            }
            if let Some(kind) = self.should_fail(key) {
                return Err(kind);
            }
            writer.write_all(&self.download_bytes).map_err(|_| ErrorKind::Io)?;
            Ok(DownloadOutcome {
                output_size: self.download_bytes.len() as u64,
                output_mime: "image/png".to_string(),
                quota_used: Some(1),
            })
        }

        fn quota(&self, _ctx: &CancelToken, _key: &ApiKey) -> Result<u64, ErrorKind> {
            Ok(1)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::super::*;

        #[test]
        fn sniff_detects_png_jpeg_gif() {
            assert_eq!(sniff_image_mime(b"\x89PNG\r\n\x1a\nrest"), Some("image/png"));
            assert_eq!(sniff_image_mime(b"\xff\xd8\xffrest"), Some("image/jpeg"));
            assert_eq!(sniff_image_mime(b"GIF89arest"), Some("image/gif"));
            assert_eq!(sniff_image_mime(b"not an image"), None);
        }

        #[test]
        fn sniff_detects_webp() {
            let mut head = b"RIFF".to_vec();
            head.extend_from_slice(&[0u8; 4]);
            head.extend_from_slice(b"WEBP");
            assert_eq!(sniff_image_mime(&head), Some("image/webp"));
        }
    }
}
