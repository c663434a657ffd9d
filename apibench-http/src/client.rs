use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::collections::BTreeMap;
use std::time::Duration;

use super::estimate::{request_bytes, response_head_bytes};
use super::util::{check_scheme, has_header, host_header_value};
use super::{Error, HttpRequest, HttpResponse, Result};

/// Pooled HTTP/1.1 client shared by every worker of a run.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        // OS-level connect timeouts can run to tens of seconds; an unreachable SUT should
        // surface as a prompt `connect` failure instead.
        Self::new(Some(Duration::from_secs(3)))
    }
}

impl HttpClient {
    #[must_use]
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(connect_timeout);
        http_connector.set_nodelay(true);

        let https_connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let inner = Client::builder(TokioExecutor::new()).build(https_connector);

        Self { inner }
    }

    /// Send one request and collect the full response body.
    ///
    /// `req.timeout` bounds the whole exchange, body included.
    pub async fn request(&self, req: HttpRequest) -> Result<HttpResponse> {
        match req.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.exchange(req))
                .await
                .map_err(|_| Error::Timeout(timeout))?,
            None => self.exchange(req).await,
        }
    }

    async fn exchange(&self, req: HttpRequest) -> Result<HttpResponse> {
        let parsed = url::Url::parse(&req.url).map_err(|_| Error::InvalidUrl(req.url.clone()))?;
        if !check_scheme(&parsed) {
            return Err(Error::UnsupportedScheme(req.url));
        }

        let bytes_sent = request_bytes(&req.method, &req.url, &req.headers, req.body.len() as u64)?;

        let uri: hyper::Uri = req
            .url
            .parse()
            .map_err(|_| Error::InvalidUrl(req.url.clone()))?;

        let mut builder = Request::builder().method(req.method).uri(uri);

        // Implicit headers are made explicit so byte accounting stays deterministic.
        if !has_header(&req.headers, "host")
            && let Some(host) = host_header_value(&parsed)
        {
            builder = builder.header(http::header::HOST, host);
        }
        if !req.body.is_empty() && !has_header(&req.headers, "content-length") {
            builder = builder.header(http::header::CONTENT_LENGTH, req.body.len());
        }

        for (k, v) in &req.headers {
            let name = http::header::HeaderName::from_bytes(k.as_bytes())?;
            let value = http::header::HeaderValue::from_str(v)?;
            builder = builder.header(name, value);
        }

        let request: Request<Full<Bytes>> = builder.body(Full::new(req.body))?;
        let res: hyper::Response<Incoming> = self.inner.request(request).await?;

        let (parts, body) = res.into_parts();
        let head_bytes = response_head_bytes(parts.version, parts.status, &parts.headers);
        let headers = merge_headers(&parts.headers);
        let body = body.collect().await?.to_bytes();

        Ok(HttpResponse {
            status: parts.status.as_u16(),
            bytes_sent,
            bytes_received: head_bytes.saturating_add(body.len() as u64),
            body,
            headers,
        })
    }
}

fn merge_headers(headers: &http::HeaderMap) -> Vec<(String, String)> {
    let mut merged: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let v = String::from_utf8_lossy(value.as_bytes()).into_owned();
        merged
            .entry(name.as_str().to_ascii_lowercase())
            .and_modify(|cur| {
                if !cur.is_empty() {
                    cur.push_str(", ");
                }
                cur.push_str(&v);
            })
            .or_insert(v);
    }
    merged.into_iter().collect()
}
