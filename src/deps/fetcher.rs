//! Remote archive fetching.
//!
//! The provider contract is deliberately narrow: one endpoint resolves a
//! ref to a commit SHA, one serves a gzip tarball of the tree at that SHA.
//! Everything else (auth ladder, extraction, integrity checks) is local.

use crate::error::ApmError;
use crate::manifest::{DependencySpec, Manifest, MANIFEST_FILE};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Dedicated token for private package fetches; checked first.
pub const PAT_ENV: &str = "APM_PAT";
/// General hosting token; fallback when the dedicated one is unset.
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

const FETCH_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A ref resolved to a concrete commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRef {
    pub sha: String,
}

/// Seam between the installer and the hosting provider. Tests substitute a
/// fixture-backed implementation.
#[async_trait]
pub trait PackageSource: Send + Sync {
    /// Resolve a branch/tag/commit (or the default branch) to a SHA.
    async fn resolve_ref(&self, spec: &DependencySpec) -> Result<ResolvedRef, ApmError>;

    /// Fetch only the manifest of the package at `sha`.
    async fn fetch_manifest(&self, spec: &DependencySpec, sha: &str) -> Result<Manifest, ApmError>;

    /// Materialize the package tree at `sha` as the children of `dest`.
    /// `dest` must already exist and be empty.
    async fn fetch_archive(
        &self,
        spec: &DependencySpec,
        sha: &str,
        dest: &Path,
    ) -> Result<(), ApmError>;
}

/// Retry an operation on retryable errors: up to 3 network retries with
/// exponential backoff from 500 ms, and one retry for a corrupt archive.
pub async fn with_retries<T, F, Fut>(context: &str, mut op: F) -> Result<T, ApmError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ApmError>>,
{
    const MAX_NETWORK_RETRIES: u32 = 3;
    let mut network_attempts = 0u32;
    let mut corrupt_attempts = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err @ ApmError::Network { .. }) if network_attempts < MAX_NETWORK_RETRIES => {
                let delay = Duration::from_millis(500 * 2u64.pow(network_attempts));
                network_attempts += 1;
                warn!(
                    context,
                    attempt = network_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "network error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err @ ApmError::ArchiveCorrupt { .. }) if corrupt_attempts < 1 => {
                corrupt_attempts += 1;
                warn!(context, error = %err, "corrupt archive, retrying once");
            }
            Err(err) => return Err(err),
        }
    }
}

/// GitHub-backed [`PackageSource`].
///
/// The provider has no manifest-only endpoint within the allowed contract,
/// so `fetch_manifest` falls back to a full archive fetch kept in an
/// internal per-SHA cache that `fetch_archive` reuses.
pub struct GitHubSource {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
    cache_root: tempfile::TempDir,
    cache: Mutex<HashMap<String, PathBuf>>,
}

impl GitHubSource {
    pub fn new() -> Result<Self, ApmError> {
        Self::with_api_base("https://api.github.com")
    }

    /// Point at a different API base (tests use a local server).
    pub fn with_api_base(api_base: &str) -> Result<Self, ApmError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent("apm-cli")
            .build()
            .map_err(|e| ApmError::Network {
                context: api_base.to_string(),
                reason: e.to_string(),
            })?;
        let token = std::env::var(PAT_ENV)
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty()));
        let cache_root = tempfile::TempDir::new().map_err(|e| ApmError::io("<tempdir>", e))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            cache_root,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// GET with the auth ladder: unauthenticated first; on 401/404 retry
    /// with the bearer token, or fail with `AuthRequired` when none is set.
    async fn get(&self, url: &str, spec: &DependencySpec) -> Result<reqwest::Response, ApmError> {
        let network_err = |e: reqwest::Error| ApmError::Network {
            context: url.to_string(),
            reason: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(network_err)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::NOT_FOUND {
            let Some(token) = &self.token else {
                return Err(ApmError::AuthRequired {
                    owner: spec.owner.clone(),
                    repo: spec.repo.clone(),
                });
            };
            debug!(url, status = %status, "unauthenticated request refused, retrying with token");
            let response = self
                .client
                .get(url)
                .bearer_auth(token)
                .send()
                .await
                .map_err(network_err)?;
            if response.status().is_success() {
                return Ok(response);
            }
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(ApmError::RefNotFound {
                    owner: spec.owner.clone(),
                    repo: spec.repo.clone(),
                    reference: spec.reference.clone().unwrap_or_else(|| "HEAD".to_string()),
                });
            }
            return Err(ApmError::Network {
                context: url.to_string(),
                reason: format!("unexpected status {}", response.status()),
            });
        }

        Err(ApmError::Network {
            context: url.to_string(),
            reason: format!("unexpected status {status}"),
        })
    }

    async fn default_branch(&self, spec: &DependencySpec) -> Result<String, ApmError> {
        let url = format!("{}/repos/{}/{}", self.api_base, spec.owner, spec.repo);
        let response = self.get(&url, spec).await?;
        let body: serde_json::Value = response.json().await.map_err(|e| ApmError::Network {
            context: url.clone(),
            reason: e.to_string(),
        })?;
        body.get("default_branch")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ApmError::Network {
                context: url,
                reason: "response missing default_branch".to_string(),
            })
    }

    /// Download and extract the archive for `sha` into the internal cache,
    /// once per SHA.
    async fn ensure_cached(&self, spec: &DependencySpec, sha: &str) -> Result<PathBuf, ApmError> {
        let cache_key = format!("{}@{}", spec.key(), sha);
        if let Some(path) = self.cache.lock().get(&cache_key) {
            return Ok(path.clone());
        }

        let url = format!(
            "{}/repos/{}/{}/tarball/{}",
            self.api_base, spec.owner, spec.repo, sha
        );
        let response = self.get(&url, spec).await?;
        let bytes = response.bytes().await.map_err(|e| ApmError::Network {
            context: url,
            reason: e.to_string(),
        })?;

        let dest = self
            .cache_root
            .path()
            .join(&spec.owner)
            .join(format!("{}-{}", spec.repo, sha));
        std::fs::create_dir_all(&dest).map_err(|e| ApmError::io(&dest, e))?;
        extract_tarball(&bytes, &dest, spec)?;
        verify_extracted(&dest, spec)?;

        self.cache.lock().insert(cache_key, dest.clone());
        Ok(dest)
    }
}

#[async_trait]
impl PackageSource for GitHubSource {
    async fn resolve_ref(&self, spec: &DependencySpec) -> Result<ResolvedRef, ApmError> {
        let reference = match &spec.reference {
            Some(r) => r.clone(),
            None => self.default_branch(spec).await?,
        };
        let url = format!(
            "{}/repos/{}/{}/commits/{}",
            self.api_base, spec.owner, spec.repo, reference
        );
        let response = self.get(&url, spec).await?;
        let body: serde_json::Value = response.json().await.map_err(|e| ApmError::Network {
            context: url.clone(),
            reason: e.to_string(),
        })?;
        let sha = body
            .get("sha")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ApmError::RefNotFound {
                owner: spec.owner.clone(),
                repo: spec.repo.clone(),
                reference,
            })?;
        Ok(ResolvedRef {
            sha: sha.to_string(),
        })
    }

    async fn fetch_manifest(&self, spec: &DependencySpec, sha: &str) -> Result<Manifest, ApmError> {
        let cached = self.ensure_cached(spec, sha).await?;
        Manifest::load(&cached)
    }

    async fn fetch_archive(
        &self,
        spec: &DependencySpec,
        sha: &str,
        dest: &Path,
    ) -> Result<(), ApmError> {
        let cached = self.ensure_cached(spec, sha).await?;
        copy_tree(&cached, dest)
    }
}

/// Extract a gzip tarball into `dest`, stripping the provider's top-level
/// prefix directory so the repository contents become `dest`'s children.
pub fn extract_tarball(
    gz_bytes: &[u8],
    dest: &Path,
    spec: &DependencySpec,
) -> Result<(), ApmError> {
    let corrupt = |reason: String| ApmError::ArchiveCorrupt {
        owner: spec.owner.clone(),
        repo: spec.repo.clone(),
        reason,
    };

    if gz_bytes.is_empty() {
        return Err(corrupt("archive is empty".to_string()));
    }

    let decoder = GzDecoder::new(gz_bytes);
    let mut archive = tar::Archive::new(decoder);
    let entries = archive
        .entries()
        .map_err(|e| corrupt(format!("unreadable tar stream: {e}")))?;

    let mut extracted_any = false;
    for entry in entries {
        let mut entry = entry.map_err(|e| corrupt(format!("unreadable tar entry: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| corrupt(format!("bad entry path: {e}")))?
            .into_owned();

        // Strip the `<owner>-<repo>-<sha>/` prefix; refuse traversal.
        let mut components = path.components();
        components.next();
        let stripped: PathBuf = components.as_path().to_path_buf();
        if stripped.as_os_str().is_empty() {
            continue;
        }
        if stripped
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
        {
            return Err(corrupt(format!(
                "entry escapes extraction root: {}",
                path.display()
            )));
        }

        let target = dest.join(&stripped);
        if entry.header().entry_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| ApmError::io(&target, e))?;
        } else if entry.header().entry_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| ApmError::io(parent, e))?;
            }
            entry
                .unpack(&target)
                .map_err(|e| corrupt(format!("failed to unpack {}: {e}", stripped.display())))?;
            extracted_any = true;
        }
        // Symlinks and special entries are dropped.
    }

    if !extracted_any {
        return Err(corrupt("archive contained no files".to_string()));
    }
    Ok(())
}

/// Integrity gate before an extracted tree may be swapped into place.
pub fn verify_extracted(dir: &Path, spec: &DependencySpec) -> Result<(), ApmError> {
    if !dir.join(MANIFEST_FILE).is_file() {
        return Err(ApmError::NotAnApmPackage {
            path: dir.to_path_buf(),
            reason: format!("{MANIFEST_FILE} missing from {}", spec.key()),
        });
    }
    Ok(())
}

fn copy_tree(from: &Path, to: &Path) -> Result<(), ApmError> {
    std::fs::create_dir_all(to).map_err(|e| ApmError::io(to, e))?;
    for entry in std::fs::read_dir(from).map_err(|e| ApmError::io(from, e))? {
        let entry = entry.map_err(|e| ApmError::io(from, e))?;
        let target = to.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| ApmError::io(entry.path(), e))?;
        if file_type.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &target).map_err(|e| ApmError::io(&target, e))?;
        }
    }
    Ok(())
}
