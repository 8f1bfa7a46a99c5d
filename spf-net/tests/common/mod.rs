use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Request, Response, ResponseBuilderExt};
use spf_common::cache::PermissionSafeCache;
use spf_common::error::{Result, SpfError};
use spf_net::{CredentialResolver, FetchSession, OriginTrustPolicy, Transport};
use url::Url;

pub struct Canned {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

pub fn reply(status: u16, body: impl Into<Vec<u8>>) -> Canned {
    Canned {
        status,
        headers: Vec::new(),
        body: body.into(),
    }
}

impl Canned {
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.push((name, value.to_string()));
        self
    }
}

/// In-memory transport answering from a queue of canned responses.
#[derive(Default)]
pub struct FakeTransport {
    replies: Mutex<VecDeque<Canned>>,
    seen: Mutex<Vec<(Url, HeaderMap)>>,
}

impl FakeTransport {
    pub fn new(replies: Vec<Canned>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn seen(&self) -> Vec<(Url, HeaderMap)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn execute(&self, request: Request) -> Result<Response> {
        self.seen
            .lock()
            .unwrap()
            .push((request.url().clone(), request.headers().clone()));
        let canned = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| SpfError::Generic("unexpected request".into()))?;
        let mut builder = http::Response::builder()
            .status(canned.status)
            .url(request.url().clone());
        for (name, value) in &canned.headers {
            builder = builder.header(*name, value.as_str());
        }
        Ok(Response::from(builder.body(canned.body).unwrap()))
    }
}

pub fn session_with(transport: Arc<FakeTransport>, auth: CredentialResolver) -> FetchSession {
    FetchSession::with_transport(
        transport,
        Arc::new(OriginTrustPolicy::new()),
        auth,
        PermissionSafeCache::disabled(),
    )
}
