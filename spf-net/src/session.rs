// spf-net/src/session.rs
//! One fetch session per run: owns the trusted-host list, the credential
//! resolver and the HTTP page cache, and sends every request.

use std::path::Path;
use std::sync::Arc;

use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    LAST_MODIFIED, USER_AGENT,
};
use reqwest::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use spf_common::cache::PermissionSafeCache;
use spf_common::config::Config;
use spf_common::error::{Result, SpfError};
use spf_common::locator::Locator;
use tracing::debug;

use crate::auth::{CredentialPrompt, CredentialResolver, KeyringProvider};
use crate::keyring::OsKeyring;
use crate::netrc::NetrcFile;
use crate::transport::{ReqwestTransport, Transport};
use crate::trust::OriginTrustPolicy;
use crate::user_agent::user_agent;

#[derive(Debug, Serialize, Deserialize)]
struct CachedPage {
    etag: Option<String>,
    last_modified: Option<String>,
    body: String,
}

pub struct FetchSession {
    transport: Arc<dyn Transport>,
    trust: Arc<OriginTrustPolicy>,
    auth: CredentialResolver,
    page_cache: PermissionSafeCache,
    user_agent: HeaderValue,
}

impl FetchSession {
    /// Builds a session from the loaded configuration. netrc and the OS
    /// keyring are used unless disabled there; `prompt` is ignored when input
    /// is disabled.
    pub fn new(config: &Config, prompt: Option<Box<dyn CredentialPrompt>>) -> Result<Self> {
        let trust = Arc::new(OriginTrustPolicy::with_trusted_hosts(&config.trusted_hosts));
        let transport = ReqwestTransport::new(Arc::clone(&trust), config.timeout)?;

        let mut auth =
            CredentialResolver::new(config.index_urls()).with_prompt_ceiling(config.prompt_ceiling);
        if config.use_netrc {
            if let Some(netrc) = NetrcFile::from_env() {
                auth = auth.with_netrc(Box::new(netrc));
            }
        }
        let keyring = if config.use_keyring {
            OsKeyring::provider()
        } else {
            KeyringProvider::NoKeyring
        };
        auth = auth.with_keyring(keyring);
        if let Some(prompt) = prompt.filter(|_| !config.no_input) {
            auth = auth.with_prompt(prompt);
        }

        let page_cache = PermissionSafeCache::new(config.http_cache_dir());
        Ok(Self::with_transport(Arc::new(transport), trust, auth, page_cache))
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        trust: Arc<OriginTrustPolicy>,
        auth: CredentialResolver,
        page_cache: PermissionSafeCache,
    ) -> Self {
        let agent = user_agent();
        let user_agent = HeaderValue::from_str(&agent).unwrap_or_else(|_| {
            debug!("User agent is not a valid header value: {}", agent);
            HeaderValue::from_static("spf")
        });
        Self {
            transport,
            trust,
            auth,
            page_cache,
            user_agent,
        }
    }

    pub fn add_trusted_host(&self, host: &str, source: Option<&str>) {
        self.trust.add_trusted_host(host, source);
    }

    pub fn is_secure_origin(&self, locator: &Locator) -> bool {
        self.trust.is_secure_locator(locator)
    }

    /// Sends one request to `locator`, answering a 401 challenge at most once.
    /// An insecure origin is warned about but still contacted.
    pub async fn send(
        &self,
        method: Method,
        locator: &Locator,
        headers: HeaderMap,
    ) -> Result<Response> {
        if !self.is_secure_origin(locator) {
            debug!("Sending to insecure origin {}", locator.redacted());
        }
        let prepared = self.auth.prepare(locator)?;
        let mut request = Request::new(method, prepared.url.clone());
        *request.headers_mut() = headers;
        request
            .headers_mut()
            .insert(USER_AGENT, self.user_agent.clone());
        if let Some(credential) = &prepared.credential {
            request
                .headers_mut()
                .insert(AUTHORIZATION, credential.header_value()?);
        }
        let first = request
            .try_clone()
            .ok_or_else(|| SpfError::Generic("request cannot be cloned".to_string()))?;
        let response = self.transport.execute(first).await?;
        self.auth
            .authenticate_and_retry(&prepared, request, response, self.transport.as_ref())
            .await
    }

    pub async fn get(&self, locator: &Locator, headers: HeaderMap) -> Result<Response> {
        self.send(Method::GET, locator, headers).await
    }

    /// Fetches a small text resource such as an index page. Insecure origins
    /// are refused. HTTPS responses from verified hosts are cached and
    /// revalidated with their validators.
    pub async fn get_page(&self, locator: &Locator) -> Result<String> {
        if !self.is_secure_origin(locator) {
            return Err(SpfError::InsecureOrigin(locator.redacted()));
        }
        if locator.is_file() {
            let path = spf_aio::path::url_to_path(locator.url_without_fragment())?;
            return read_local_page(&path).await;
        }

        let (key, _) = locator.split_credentials();
        let cacheable = locator.scheme() == "https"
            && !locator
                .host()
                .is_some_and(|host| self.trust.is_trusted_host(host, locator.port()));
        let cached: Option<CachedPage> = if cacheable {
            self.page_cache
                .get(&key)
                .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        } else {
            None
        };

        let mut headers = HeaderMap::new();
        if let Some(page) = &cached {
            if let Some(etag) = page.etag.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
                headers.insert(IF_NONE_MATCH, etag);
            }
            if let Some(modified) = page
                .last_modified
                .as_deref()
                .and_then(|v| HeaderValue::from_str(v).ok())
            {
                headers.insert(IF_MODIFIED_SINCE, modified);
            }
        }

        let response = self.get(locator, headers).await?;
        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            if let Some(page) = cached {
                debug!("Using cached page for {}", locator);
                return Ok(page.body);
            }
        }
        if !status.is_success() {
            return Err(SpfError::HttpStatus {
                url: locator.redacted(),
                status: status.as_u16(),
            });
        }

        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let etag = header(ETAG);
        let last_modified = header(LAST_MODIFIED);
        let body = response.text().await?;

        if cacheable && (etag.is_some() || last_modified.is_some()) {
            let page = CachedPage {
                etag,
                last_modified,
                body,
            };
            match serde_json::to_vec(&page) {
                Ok(bytes) => self.page_cache.set(&key, &bytes),
                Err(e) => debug!("Could not serialize page for {}: {}", locator, e),
            }
            return Ok(page.body);
        }
        Ok(body)
    }
}

async fn read_local_page(path: &Path) -> Result<String> {
    let path = if path.is_dir() {
        path.join("index.html")
    } else {
        path.to_path_buf()
    };
    debug!("Reading local page {}", path.display());
    Ok(tokio::fs::read_to_string(&path).await?)
}
