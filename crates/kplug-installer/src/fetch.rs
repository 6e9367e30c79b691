//! Archive retrieval and checksum verification.
//!
//! A [`Fetcher`] turns a URI into a byte stream; a [`Verifier`] watches the
//! bytes as they are buffered and decides whether they may be used.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use futures::TryStreamExt;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tokio_util::io::StreamReader;

use crate::error::InstallError;

/// URI prefix selecting the command fetcher.
pub const EXEC_SCHEME: &str = "exec:";

/// Readable archive body.
pub type Body = Box<dyn AsyncRead + Send + Unpin>;

/// Trait implemented by every archive source.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn get(&self, uri: &str) -> Result<Body, InstallError>;
}

// ─── HTTP ──────────────────────────────────────────────────────────────

/// Plain HTTP(S) GET. No retries: a failed request fails the install.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, uri: &str) -> Result<Body, InstallError> {
        tracing::debug!(uri = %uri, "sending request");

        let response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| InstallError::Fetch {
                uri: uri.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(InstallError::Fetch {
                uri: uri.to_string(),
                message: format!("unexpected status {status}"),
            });
        }

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::new(StreamReader::new(Box::pin(stream))))
    }
}

// ─── Local file ────────────────────────────────────────────────────────

/// Reads a local file. With `path` set, the URI is ignored.
#[derive(Debug, Clone, Default)]
pub struct FileFetcher {
    path: Option<PathBuf>,
}

impl FileFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always read `path`, whatever URI the descriptor names.
    pub fn with_override(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    fn resolve(&self, uri: &str) -> Result<PathBuf, InstallError> {
        if let Some(ref path) = self.path {
            return Ok(path.clone());
        }
        if uri.starts_with("file:") {
            let parsed = url::Url::parse(uri).map_err(|e| InstallError::Fetch {
                uri: uri.to_string(),
                message: format!("invalid file URI: {e}"),
            })?;
            return parsed.to_file_path().map_err(|_| InstallError::Fetch {
                uri: uri.to_string(),
                message: "file URI has no local path".into(),
            });
        }
        Ok(PathBuf::from(uri))
    }
}

#[async_trait]
impl Fetcher for FileFetcher {
    async fn get(&self, uri: &str) -> Result<Body, InstallError> {
        let path = self.resolve(uri)?;
        tracing::info!(path = %path.display(), "reading local archive");

        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| InstallError::Fetch {
                uri: path.display().to_string(),
                message: e.to_string(),
            })?;
        Ok(Box::new(file))
    }
}

// ─── External command ──────────────────────────────────────────────────

/// Runs `exec:<command line>` and serves its standard output.
///
/// The command line is split with shell quoting rules but executed
/// directly, never through a shell. Output is spooled to an anonymous temp
/// file so it can be read back from the start.
#[derive(Debug, Clone, Default)]
pub struct CommandFetcher;

impl CommandFetcher {
    fn argv(uri: &str) -> Result<Vec<String>, InstallError> {
        let line = uri.strip_prefix(EXEC_SCHEME).unwrap_or(uri).trim();
        let argv = shlex::split(line).ok_or_else(|| InstallError::Fetch {
            uri: uri.to_string(),
            message: "unbalanced quoting in command".into(),
        })?;
        if argv.is_empty() {
            return Err(InstallError::Fetch {
                uri: uri.to_string(),
                message: "empty command".into(),
            });
        }
        Ok(argv)
    }
}

#[async_trait]
impl Fetcher for CommandFetcher {
    async fn get(&self, uri: &str) -> Result<Body, InstallError> {
        let argv = Self::argv(uri)?;
        tracing::warn!(command = ?argv, "fetching archive through external command");

        let fetch_err = |message: String| InstallError::Fetch {
            uri: uri.to_string(),
            message,
        };

        let spool = tempfile::tempfile().map_err(|e| fetch_err(format!("temp file: {e}")))?;
        let stdout = spool
            .try_clone()
            .map_err(|e| fetch_err(format!("temp file: {e}")))?;

        let child = tokio::process::Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| fetch_err(format!("failed to run '{}': {e}", argv[0])))?;
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| fetch_err(format!("failed to wait for '{}': {e}", argv[0])))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(fetch_err(format!(
                "command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let mut file = tokio::fs::File::from_std(spool);
        file.seek(SeekFrom::Start(0))
            .await
            .map_err(|e| fetch_err(format!("rewind: {e}")))?;
        Ok(Box::new(file))
    }
}

// ─── Selection ─────────────────────────────────────────────────────────

/// Which fetchers are allowed.
#[derive(Debug, Clone, Default)]
pub struct FetchPolicy {
    /// Allow `exec:` URIs to run local commands.
    pub allow_exec: bool,
}

/// Pick the fetcher for a descriptor URI.
pub fn fetcher_for(uri: &str, policy: &FetchPolicy) -> Result<Box<dyn Fetcher>, InstallError> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(Box::new(HttpFetcher::new()));
    }
    if uri.starts_with(EXEC_SCHEME) {
        if !policy.allow_exec {
            return Err(InstallError::ExecDisabled(uri.to_string()));
        }
        return Ok(Box::new(CommandFetcher));
    }
    if uri.starts_with("file:") || Path::new(uri).is_absolute() {
        return Ok(Box::new(FileFetcher::new()));
    }
    Err(InstallError::Fetch {
        uri: uri.to_string(),
        message: "unsupported URI scheme".into(),
    })
}

// ─── Verification ──────────────────────────────────────────────────────

/// Observes archive bytes and accepts or rejects them once complete.
pub trait Verifier: Send {
    fn update(&mut self, chunk: &[u8]);
    fn verify(&mut self) -> Result<(), InstallError>;
}

/// Compares the SHA-256 of the body with an expected hex digest.
#[derive(Debug, Clone)]
pub struct Sha256Verifier {
    expected: String,
    hasher: Sha256,
}

impl Sha256Verifier {
    pub fn new(expected: &str) -> Self {
        Self {
            expected: expected.trim().to_ascii_lowercase(),
            hasher: Sha256::new(),
        }
    }
}

impl Verifier for Sha256Verifier {
    fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    fn verify(&mut self) -> Result<(), InstallError> {
        let actual = format!("{:x}", std::mem::take(&mut self.hasher).finalize());
        if actual != self.expected {
            return Err(InstallError::ChecksumMismatch {
                expected: self.expected.clone(),
                actual,
            });
        }
        Ok(())
    }
}

/// Accepts everything.
#[derive(Debug, Clone, Default)]
pub struct NoopVerifier;

impl Verifier for NoopVerifier {
    fn update(&mut self, _chunk: &[u8]) {}

    fn verify(&mut self) -> Result<(), InstallError> {
        Ok(())
    }
}

/// Buffer the whole body, feeding every chunk to the verifier as it
/// arrives, and return the bytes only if verification passes.
pub async fn read_verified(
    mut body: Body,
    verifier: &mut dyn Verifier,
) -> Result<Vec<u8>, InstallError> {
    let mut data = Vec::new();
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        let n = body.read(&mut chunk).await.map_err(|e| InstallError::Fetch {
            uri: String::from("<body>"),
            message: format!("read failed: {e}"),
        })?;
        if n == 0 {
            break;
        }
        verifier.update(&chunk[..n]);
        data.extend_from_slice(&chunk[..n]);
    }

    verifier.verify()?;
    tracing::debug!(bytes = data.len(), "archive body verified");
    Ok(data)
}

/// Hex SHA-256 of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}
