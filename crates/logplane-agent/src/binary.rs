//! Promtail binary acquisition.
//!
//! Sources are tried in a fixed order: an operator-attached resource, the
//! copy already in the workload, the local cache, and finally a download.
//! A downloaded zip is verified against its pinned SHA-256 before it is
//! unpacked, and the unpacked binary against its own pinned SHA-256 before
//! it is cached or pushed. A peer-advertised URL may replace the download
//! location but never the pinned digests.

use std::future::Future;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use logplane_core::Container;
use logplane_core::container::write_atomic;

use crate::error::{AgentError, AgentErrorKind};

pub const PROMTAIL_ZIP_URL: &str =
    "https://github.com/grafana/loki/releases/download/v2.4.1/promtail-linux-amd64.zip";
pub const PROMTAIL_ZIP_SHA256: &str =
    "978391a174e71cfef444ab9dc012f95d5d7eae0d682eaf1da2ea18f793452031";
pub const PROMTAIL_BINARY_SHA256: &str =
    "00ed6a4b899698abc97d471c483a6a7e7c95e761714f872eb8d6ffd45f3d32e6";
pub const PROMTAIL_BINARY_NAME: &str = "promtail-linux-amd64";
pub const PROMTAIL_INSTALL_DIR: &str = "/opt/promtail";

const BINARY_MODE: u32 = 0o755;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Where the binary comes from and what it must hash to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinarySpec {
    pub zip_url: String,
    pub zip_sha256: String,
    pub binary_sha256: String,
    pub binary_name: String,
    pub install_dir: String,
}

impl Default for BinarySpec {
    fn default() -> Self {
        Self {
            zip_url: PROMTAIL_ZIP_URL.to_string(),
            zip_sha256: PROMTAIL_ZIP_SHA256.to_string(),
            binary_sha256: PROMTAIL_BINARY_SHA256.to_string(),
            binary_name: PROMTAIL_BINARY_NAME.to_string(),
            install_dir: PROMTAIL_INSTALL_DIR.to_string(),
        }
    }
}

impl BinarySpec {
    /// Path of the binary inside the workload container.
    pub fn workload_path(&self) -> String {
        format!("{}/{}", self.install_dir.trim_end_matches('/'), self.binary_name)
    }
}

/// Observed state of the binary across cache and workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryState {
    Absent,
    CachedGood,
    /// A cached file exists but fails verification.
    CachedBad,
    InWorkload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinarySource {
    Resource,
    Workload,
    Cache,
    Download,
}

/// Result of one provisioning pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provisioned {
    pub source: BinarySource,
    /// Whether the workload copy was (re)written.
    pub pushed: bool,
}

/// Fetches a URL into memory.
pub trait Fetcher {
    fn fetch(&self, url: &str, timeout: Duration) -> impl Future<Output = Result<Vec<u8>, String>> + Send;
}

/// HTTPS fetcher backed by reqwest.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, String> {
        let resp = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?;
        let bytes = resp.bytes().await.map_err(|e| e.to_string())?;
        Ok(bytes.to_vec())
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub struct BinaryProvisioner<F> {
    spec: BinarySpec,
    cache_dir: PathBuf,
    resource_path: Option<PathBuf>,
    fetcher: F,
    download_timeout: Duration,
    max_attempts: u32,
}

impl<F: Fetcher> BinaryProvisioner<F> {
    pub fn new(spec: BinarySpec, cache_dir: &Path, fetcher: F) -> Self {
        Self {
            spec,
            cache_dir: cache_dir.to_path_buf(),
            resource_path: None,
            fetcher,
            download_timeout: Duration::from_secs(60),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_resource(mut self, path: Option<PathBuf>) -> Self {
        self.resource_path = path;
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub fn spec(&self) -> &BinarySpec {
        &self.spec
    }

    fn cache_path(&self) -> PathBuf {
        self.cache_dir.join(&self.spec.binary_name)
    }

    /// Verified state of the binary, looking at the workload first.
    pub fn state(&self, container: &dyn Container) -> BinaryState {
        let in_workload = container
            .pull(&self.spec.workload_path())
            .ok()
            .flatten()
            .is_some_and(|bytes| sha256_hex(&bytes) == self.spec.binary_sha256);
        if in_workload {
            return BinaryState::InWorkload;
        }
        match std::fs::read(self.cache_path()) {
            Ok(bytes) if sha256_hex(&bytes) == self.spec.binary_sha256 => BinaryState::CachedGood,
            Ok(_) => BinaryState::CachedBad,
            Err(_) => BinaryState::Absent,
        }
    }

    /// Make sure a verified binary sits at the workload path.
    ///
    /// `advertised_url` is a peer-published zip location; it is used in
    /// place of the built-in URL when present.
    pub async fn provision(
        &self,
        container: &mut dyn Container,
        advertised_url: Option<&str>,
    ) -> Result<Provisioned, AgentError> {
        if let Some(resource) = &self.resource_path {
            let bytes = std::fs::read(resource).map_err(|e| {
                AgentError::new(
                    AgentErrorKind::Fetch,
                    format!("reading resource {}: {e}", resource.display()),
                )
            })?;
            let pushed = self.push_if_different(container, &bytes)?;
            return Ok(Provisioned {
                source: BinarySource::Resource,
                pushed,
            });
        }

        match self.state(container) {
            BinaryState::InWorkload => {
                return Ok(Provisioned {
                    source: BinarySource::Workload,
                    pushed: false,
                });
            }
            BinaryState::CachedGood => {
                let bytes = std::fs::read(self.cache_path()).map_err(|e| {
                    AgentError::new(AgentErrorKind::Fetch, format!("reading cache: {e}"))
                })?;
                container
                    .push(&self.spec.workload_path(), &bytes, BINARY_MODE)
                    .map_err(AgentError::push)?;
                info!(path = %self.spec.workload_path(), "promtail pushed from cache");
                return Ok(Provisioned {
                    source: BinarySource::Cache,
                    pushed: true,
                });
            }
            BinaryState::CachedBad => {
                warn!(path = %self.cache_path().display(), "cached promtail failed verification, discarding");
                if let Err(e) = std::fs::remove_file(self.cache_path()) {
                    warn!(path = %self.cache_path().display(), error = %e, "could not discard cached promtail");
                }
            }
            BinaryState::Absent => {}
        }

        let url = advertised_url.unwrap_or(&self.spec.zip_url);
        let binary = self.download(url).await?;
        self.write_cache(&binary)?;
        container
            .push(&self.spec.workload_path(), &binary, BINARY_MODE)
            .map_err(AgentError::push)?;
        info!(%url, path = %self.spec.workload_path(), "promtail downloaded and pushed");
        Ok(Provisioned {
            source: BinarySource::Download,
            pushed: true,
        })
    }

    fn push_if_different(&self, container: &mut dyn Container, bytes: &[u8]) -> Result<bool, AgentError> {
        let path = self.spec.workload_path();
        let current = container.pull(&path).map_err(AgentError::push)?;
        if current.as_deref() == Some(bytes) {
            return Ok(false);
        }
        container.push(&path, bytes, BINARY_MODE).map_err(AgentError::push)?;
        info!(%path, "promtail pushed from resource");
        Ok(true)
    }

    /// Fetch and verify, retrying integrity failures up to `max_attempts`.
    /// Transport failures abort immediately.
    async fn download(&self, url: &str) -> Result<Vec<u8>, AgentError> {
        let mut last = String::new();
        for attempt in 1..=self.max_attempts {
            let zip_bytes = self
                .fetcher
                .fetch(url, self.download_timeout)
                .await
                .map_err(|e| AgentError::new(AgentErrorKind::Fetch, format!("{url}: {e}")))?;

            let digest = sha256_hex(&zip_bytes);
            if digest != self.spec.zip_sha256 {
                warn!(%url, attempt, %digest, "zip checksum mismatch");
                last = format!("zip sha256 {digest} does not match {}", self.spec.zip_sha256);
                continue;
            }

            let binary = match extract(&zip_bytes, &self.spec.binary_name) {
                Ok(binary) => binary,
                Err(e) => {
                    warn!(%url, attempt, error = %e, "zip extraction failed");
                    last = e;
                    continue;
                }
            };
            let digest = sha256_hex(&binary);
            if digest != self.spec.binary_sha256 {
                warn!(%url, attempt, %digest, "binary checksum mismatch");
                last = format!("binary sha256 {digest} does not match {}", self.spec.binary_sha256);
                continue;
            }
            debug!(%url, attempt, bytes = binary.len(), "promtail verified");
            return Ok(binary);
        }
        Err(AgentError::new(
            AgentErrorKind::Integrity,
            format!("{url}: gave up after {} attempt(s): {last}", self.max_attempts),
        ))
    }

    fn write_cache(&self, binary: &[u8]) -> Result<(), AgentError> {
        write_atomic(&self.cache_path(), binary, Some(BINARY_MODE)).map_err(|e| {
            AgentError::new(
                AgentErrorKind::State,
                format!("writing cache {}: {e}", self.cache_dir.display()),
            )
        })
    }
}

/// Pull `name` out of a zip archive, matching on the entry's file name.
fn extract(zip_bytes: &[u8], name: &str) -> Result<Vec<u8>, String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(zip_bytes)).map_err(|e| format!("invalid zip: {e}"))?;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|e| format!("invalid zip entry: {e}"))?;
        let matches = Path::new(entry.name())
            .file_name()
            .is_some_and(|f| f == name);
        if entry.is_file() && matches {
            let mut out = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut out)
                .map_err(|e| format!("reading {name} from zip: {e}"))?;
            return Ok(out);
        }
    }
    Err(format!("{name} not found in zip"))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    /// Build a zip holding a single entry.
    pub fn make_zip(name: &str, content: &[u8]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file(name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
        writer.finish().unwrap().into_inner()
    }

    /// Serves queued responses in order; records requested URLs.
    #[derive(Default)]
    pub struct QueueFetcher {
        pub responses: Mutex<Vec<Result<Vec<u8>, String>>>,
        pub requests: Mutex<Vec<String>>,
    }

    impl QueueFetcher {
        pub fn new(responses: Vec<Result<Vec<u8>, String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl Fetcher for &QueueFetcher {
        async fn fetch(&self, url: &str, _timeout: Duration) -> Result<Vec<u8>, String> {
            self.requests.lock().unwrap().push(url.to_string());
            let mut queue = self.responses.lock().unwrap();
            if queue.is_empty() {
                return Err("no more responses".to_string());
            }
            queue.remove(0)
        }
    }

    pub const BINARY: &[u8] = b"\x7fELF fake promtail";

    /// A `BinarySpec` whose digests match `make_zip(PROMTAIL_BINARY_NAME, BINARY)`.
    pub fn spec_for_fake() -> (BinarySpec, Vec<u8>) {
        let zip = make_zip(PROMTAIL_BINARY_NAME, BINARY);
        let spec = BinarySpec {
            zip_sha256: sha256_hex(&zip),
            binary_sha256: sha256_hex(BINARY),
            ..BinarySpec::default()
        };
        (spec, zip)
    }
}
