use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, SET_COOKIE};

use crate::error::{handle_reqwest_err, TransportError};
use crate::request::{HttpRequest, HttpResponse, ResponseBody};

/// Applied to every request unless configured otherwise.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends rendered requests to the service under test.
///
/// Implementations hold no per-user state. Cookies and auth headers travel on the request so
/// one transport can be shared by every session in a run.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [Transport] backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        // No cookie store on the shared client. Each session keeps its own jar.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::Build)?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        log::trace!("{} {}", request.method, request.url);

        let started = Instant::now();
        let mut builder = self.client.request(request.method, request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| handle_reqwest_err(e, self.timeout))?;

        let status = response.status().as_u16();
        let set_cookies = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_string)
            .collect();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|content_type| content_type.contains("json"));

        let text = response
            .text()
            .await
            .map_err(|e| handle_reqwest_err(e, self.timeout))?;

        Ok(HttpResponse {
            status,
            body: ResponseBody::parse(text, is_json),
            set_cookies,
            elapsed: started.elapsed(),
        })
    }
}
