// spf-net/src/transport.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, Request, Response};
use spf_common::error::{Result, SpfError};
use tracing::debug;

use crate::trust::OriginTrustPolicy;

const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Sends a fully built request. Implementations must not follow up on 401s;
/// that is the credential resolver's job.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: Request) -> Result<Response>;
}

/// Reqwest-backed transport. Hosts the user trusted explicitly go through a
/// client that skips certificate verification.
pub struct ReqwestTransport {
    secure: Client,
    insecure: Client,
    trust: Arc<OriginTrustPolicy>,
}

impl ReqwestTransport {
    pub fn new(trust: Arc<OriginTrustPolicy>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            secure: build_http_client(timeout, false)?,
            insecure: build_http_client(timeout, true)?,
            trust,
        })
    }
}

fn build_http_client(timeout: Duration, accept_invalid_certs: bool) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .read_timeout(timeout)
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10));
    if accept_invalid_certs {
        builder = builder.danger_accept_invalid_certs(true);
    }
    builder
        .build()
        .map_err(|e| SpfError::Generic(format!("Failed to build HTTP client: {e}")))
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: Request) -> Result<Response> {
        let url = request.url();
        let trusted = url.scheme() == "https"
            && url
                .host_str()
                .is_some_and(|host| self.trust.is_trusted_host(host, url.port_or_known_default()));
        let client = if trusted {
            debug!("Using unverified TLS for trusted host {}", url.host_str().unwrap_or_default());
            &self.insecure
        } else {
            &self.secure
        };
        debug!("{} {}", request.method(), request.url());
        let response = client.execute(request).await.map_err(|e| {
            debug!("HTTP request failed: {}", e);
            SpfError::from(e)
        })?;
        debug!("Received HTTP status: {} for {}", response.status(), response.url());
        Ok(response)
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use reqwest::header::HeaderMap;
    use reqwest::ResponseBuilderExt;
    use url::Url;

    use super::*;

    #[derive(Debug, Clone)]
    pub struct Recorded {
        pub url: Url,
        pub headers: HeaderMap,
    }

    pub struct Reply {
        pub status: u16,
        pub headers: Vec<(&'static str, String)>,
        pub body: Vec<u8>,
    }

    impl Reply {
        pub fn status(status: u16) -> Self {
            Self {
                status,
                headers: Vec::new(),
                body: Vec::new(),
            }
        }

        pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
            self.headers.push((name, value.into()));
            self
        }

        pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
            self.body = body.into();
            self
        }
    }

    /// Replays canned responses in order and records every request.
    #[derive(Default)]
    pub struct ScriptedTransport {
        replies: Mutex<VecDeque<Reply>>,
        pub requests: Mutex<Vec<Recorded>>,
    }

    impl ScriptedTransport {
        pub fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<Recorded> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn execute(&self, request: Request) -> Result<Response> {
            self.requests.lock().unwrap().push(Recorded {
                url: request.url().clone(),
                headers: request.headers().clone(),
            });
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| SpfError::Generic("no scripted reply left".into()))?;
            let mut builder = http::Response::builder()
                .status(reply.status)
                .url(request.url().clone());
            for (name, value) in &reply.headers {
                builder = builder.header(*name, value.as_str());
            }
            let response = builder.body(reply.body).unwrap();
            Ok(Response::from(response))
        }
    }
}
