use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, CONTENT_DISPOSITION, CONTENT_TYPE, LOCATION, USER_AGENT};
use reqwest::{redirect, Url};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::Result;
use crate::keywords::{contains_any, LOGIN_TERMS};
use crate::models::LinkStatus;

pub const MAX_REDIRECTS: usize = 5;
pub const MAX_DOWNLOAD_BYTES: u64 = 25 * 1024 * 1024;
pub const HTML_SNIFF_BYTES: u64 = 5000;
const ACCEPT_VALUE: &str = "application/pdf,application/octet-stream,*/*";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadResult {
    pub status: LinkStatus,
    pub resolved_url: String,
    pub content_type: Option<String>,
    pub filename: Option<String>,
    pub local_path: Option<PathBuf>,
    pub size_bytes: Option<u64>,
    pub sha256: Option<String>,
    pub http_status: Option<u16>,
    pub failure_reason: Option<String>,
}

impl DownloadResult {
    fn terminal(status: LinkStatus, url: &Url) -> Self {
        Self {
            status,
            resolved_url: url.to_string(),
            ..Self::default()
        }
    }

    fn failed(url: &str, reason: impl Into<String>) -> Self {
        Self {
            status: LinkStatus::Failed,
            resolved_url: url.to_string(),
            failure_reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

enum Attempt {
    Redirect(Url),
    Done(DownloadResult),
}

fn disposition_filename_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)filename="?([^";]+)"?"#).expect("invalid disposition regex"))
}

/// HTTP fetcher for invoice links. Follows redirects by hand so each hop
/// is counted, and classifies the final response.
pub struct LinkDownloader {
    client: Client,
    user_agent: String,
    max_bytes: u64,
}

impl LinkDownloader {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
            max_bytes: MAX_DOWNLOAD_BYTES,
        })
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Never fails: every outcome, including transport errors, is folded
    /// into the returned status.
    pub fn download(&self, url: &str, dest_dir: &Path) -> DownloadResult {
        let mut current = match Url::parse(url.trim()) {
            Ok(u) => u,
            Err(e) => return DownloadResult::failed(url, format!("Invalid URL: {e}")),
        };

        for hop in 0..MAX_REDIRECTS {
            match self.attempt(&current, dest_dir) {
                Attempt::Redirect(next) => {
                    debug!(hop, from = %current, to = %next, "following redirect");
                    current = next;
                }
                Attempt::Done(result) => return result,
            }
        }
        DownloadResult::failed(current.as_str(), "Too many redirects")
    }

    fn attempt(&self, url: &Url, dest_dir: &Path) -> Attempt {
        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, ACCEPT_VALUE)
            .send();
        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Attempt::Done(DownloadResult::failed(url.as_str(), "Timeout")),
            Err(e) => return Attempt::Done(DownloadResult::failed(url.as_str(), e.to_string())),
        };

        let status = response.status();
        if status.is_redirection() {
            let next = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|loc| url.join(loc).ok());
            if let Some(next) = next {
                return Attempt::Redirect(next);
            }
        }

        let code = status.as_u16();
        if code == 401 || code == 403 {
            let mut r = DownloadResult::terminal(LinkStatus::NeedsLogin, url);
            r.http_status = Some(code);
            return Attempt::Done(r);
        }
        if code >= 400 {
            let mut r = DownloadResult::failed(url.as_str(), format!("HTTP {code}"));
            r.http_status = Some(code);
            return Attempt::Done(r);
        }

        Attempt::Done(self.handle_body(response, url, dest_dir))
    }

    fn handle_body(&self, response: Response, url: &Url, dest_dir: &Path) -> DownloadResult {
        let code = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let ct_lower = content_type.to_ascii_lowercase();

        let mut result = DownloadResult::terminal(LinkStatus::Unsupported, url);
        result.http_status = Some(code);
        result.content_type = Some(content_type.clone());

        if ct_lower.contains("text/html") {
            let mut head = Vec::new();
            if let Err(e) = response.take(HTML_SNIFF_BYTES).read_to_end(&mut head) {
                return DownloadResult::failed(url.as_str(), e.to_string());
            }
            let text = String::from_utf8_lossy(&head).to_lowercase();
            if contains_any(&text, LOGIN_TERMS) {
                result.status = LinkStatus::NeedsLogin;
            } else {
                result.failure_reason = Some("HTML page but no login wall detected".to_string());
            }
            return result;
        }

        let downloadable = ct_lower.contains("pdf") || ct_lower.contains("image/") || ct_lower.contains("octet-stream");
        if !downloadable {
            result.failure_reason = Some(format!("Unsupported content type: {content_type}"));
            return result;
        }

        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return DownloadResult::failed(url.as_str(), "File too large");
        }

        let filename = response_filename(&response, url);
        match self.save_stream(response, dest_dir, &filename) {
            Ok(Some((path, size, digest))) => {
                result.status = LinkStatus::Downloaded;
                result.filename = Some(filename);
                result.local_path = Some(path);
                result.size_bytes = Some(size);
                result.sha256 = Some(digest);
                result
            }
            Ok(None) => DownloadResult::failed(url.as_str(), "File too large"),
            Err(e) => {
                warn!(url = %url, error = %e, "link download write failed");
                DownloadResult::failed(url.as_str(), e.to_string())
            }
        }
    }

    /// Stream into `<dest>/<millis>_<filename>`. Returns `None` after
    /// removing the partial file when the cap is exceeded.
    fn save_stream(
        &self,
        mut response: Response,
        dest_dir: &Path,
        filename: &str,
    ) -> std::io::Result<Option<(PathBuf, u64, String)>> {
        std::fs::create_dir_all(dest_dir)?;
        let millis = chrono::Utc::now().timestamp_millis();
        let path = dest_dir.join(format!("{millis}_{filename}"));

        let outcome = (|| -> std::io::Result<Option<(u64, String)>> {
            let mut file = File::create(&path)?;
            let mut hasher = Sha256::new();
            let mut total: u64 = 0;
            let mut buf = [0u8; 16 * 1024];
            loop {
                let n = response.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                total += n as u64;
                if total > self.max_bytes {
                    return Ok(None);
                }
                file.write_all(&buf[..n])?;
                hasher.update(&buf[..n]);
            }
            file.flush()?;
            Ok(Some((total, hex::encode(hasher.finalize()))))
        })();

        match outcome {
            Ok(Some((size, digest))) => Ok(Some((path, size, digest))),
            Ok(None) => {
                let _ = std::fs::remove_file(&path);
                Ok(None)
            }
            Err(e) => {
                let _ = std::fs::remove_file(&path);
                Err(e)
            }
        }
    }
}

fn response_filename(response: &Response, url: &Url) -> String {
    let from_disposition = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| disposition_filename_re().captures(v))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string());
    let from_path = || {
        url.path_segments()
            .and_then(|mut s| s.next_back())
            .filter(|last| last.contains('.'))
            .map(String::from)
    };
    let name = from_disposition.or_else(from_path).unwrap_or_else(|| "invoice.pdf".to_string());
    // Drop any directory components a server might send.
    Path::new(&name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("invoice.pdf")
        .to_string()
}
