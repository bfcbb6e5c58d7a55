use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{ClientError, ClientResult};

/// Thin JSON client for the ops backend. No retries and no caching.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub body: Option<Value>,
    pub token: Option<String>,
    pub headers: HeaderMap,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(mut self, token: Option<&str>) -> Self {
        self.token = token.map(ToOwned::to_owned);
        self
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> ClientResult<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration) -> ClientResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> ClientResult<T> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.extend(options.headers);
        if let Some(token) = options.token.as_deref() {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ClientError::validation("token contains invalid header characters"))?;
            headers.insert(AUTHORIZATION, value);
        }

        let mut request = self.http.request(method.clone(), self.url(path)).headers(headers);
        if let Some(body) = &options.body {
            request = request.body(serde_json::to_vec(body)?);
        }

        let response = request.send().await?;
        let status = response.status();
        tracing::debug!(%method, path, status = status.as_u16(), "api request");

        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        if status == StatusCode::NO_CONTENT {
            return serde_json::from_value(json!({}))
                .map_err(|error| ClientError::Decode(format!("{path}: {error}")));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|error| ClientError::Decode(format!("{path}: {error}")))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, token: Option<&str>) -> ClientResult<T> {
        self.request(Method::GET, path, RequestOptions::new().token(token))
            .await
    }

    pub async fn send_json<T, B>(
        &self,
        method: Method,
        path: &str,
        body: &B,
        token: Option<&str>,
    ) -> ClientResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let options = RequestOptions::new().token(token).json(body)?;
        self.request(method, path, options).await
    }

    /// Raw response body, used for non-JSON downloads such as ICS files.
    pub async fn get_bytes(&self, path: &str, token: Option<&str>) -> ClientResult<Vec<u8>> {
        let mut request = self.http.get(self.url(path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        tracing::debug!(method = "GET", path, status = status.as_u16(), "api download");

        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Direct PUT of raw bytes to an absolute, pre-signed URL. The signed URL
    /// carries its own authorization, so no bearer token is attached.
    pub async fn put_bytes(
        &self,
        url: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> ClientResult<()> {
        let response = self
            .http
            .put(url)
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        Ok(())
    }
}

async fn error_from_response(response: reqwest::Response) -> ClientError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        format!("Request failed: {status}")
    } else {
        body
    };
    ClientError::Http { status, message }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use reqwest::header::{HeaderName, HeaderValue};
    use reqwest::Method;
    use serde_json::{json, Value};

    use super::{ApiClient, RequestOptions};
    use crate::error::ClientError;
    use crate::test_support::spawn_router;

    async fn echo_headers(headers: HeaderMap) -> Json<Value> {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(ToOwned::to_owned)
        };
        Json(json!({
            "authorization": read("authorization"),
            "content_type": read("content-type"),
        }))
    }

    fn stub_router() -> Router {
        Router::new()
            .route("/echo", get(echo_headers).post(echo_headers))
            .route("/empty", post(|| async { StatusCode::NO_CONTENT }))
            .route(
                "/invalid",
                post(|| async { (StatusCode::UNPROCESSABLE_ENTITY, "title must not be empty") }),
            )
            .route("/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .route("/blank", get(|| async { (StatusCode::BAD_GATEWAY, "  \n") }))
            .route("/ics", get(|| async { "BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n" }))
    }

    async fn client() -> (ApiClient, tokio::task::JoinHandle<()>) {
        let (base_url, server) = spawn_router(stub_router()).await;
        let client =
            ApiClient::new(&base_url, Duration::from_secs(5)).expect("client should build");
        (client, server)
    }

    #[tokio::test]
    async fn no_content_resolves_to_empty_object() {
        let (client, server) = client().await;

        let value: Value = client
            .request(Method::POST, "/empty", RequestOptions::new())
            .await
            .expect("204 should resolve");
        assert_eq!(value, json!({}));

        server.abort();
    }

    #[tokio::test]
    async fn error_status_carries_body_or_generic_message() {
        let (client, server) = client().await;

        let error = client
            .request::<Value>(Method::POST, "/invalid", RequestOptions::new())
            .await
            .expect_err("422 should fail");
        assert_eq!(error.status(), Some(422));
        assert_eq!(error.to_string(), "title must not be empty");

        let error = client
            .get::<Value>("/broken", None)
            .await
            .expect_err("500 should fail");
        assert!(matches!(error, ClientError::Http { status: 500, .. }));
        assert_eq!(error.to_string(), "Request failed: 500");

        let error = client
            .get::<Value>("/blank", None)
            .await
            .expect_err("502 should fail");
        assert_eq!(error.status(), Some(502));
        assert_eq!(error.to_string(), "  \n", "any non-empty body is kept verbatim");

        server.abort();
    }

    #[tokio::test]
    async fn bearer_header_is_sent_only_with_a_token() {
        let (client, server) = client().await;

        let anonymous: Value = client.get("/echo", None).await.expect("echo should work");
        assert_eq!(anonymous["authorization"], Value::Null);
        assert_eq!(anonymous["content_type"], "application/json");

        let authed: Value = client
            .get("/echo", Some("abc123"))
            .await
            .expect("echo should work");
        assert_eq!(authed["authorization"], "Bearer abc123");

        server.abort();
    }

    #[tokio::test]
    async fn caller_headers_override_content_type() {
        let (client, server) = client().await;

        let options = RequestOptions::new().header(
            HeaderName::from_static("content-type"),
            HeaderValue::from_static("text/plain"),
        );
        let echoed: Value = client
            .request(Method::POST, "/echo", options)
            .await
            .expect("echo should work");
        assert_eq!(echoed["content_type"], "text/plain");

        server.abort();
    }

    #[tokio::test]
    async fn get_bytes_returns_raw_body() {
        let (client, server) = client().await;

        let bytes = client
            .get_bytes("/ics", Some("abc123"))
            .await
            .expect("download should work");
        assert!(String::from_utf8_lossy(&bytes).starts_with("BEGIN:VCALENDAR"));

        server.abort();
    }
}
