use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

use super::{Error, HttpRequest, HttpResponse, Result};

#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        // OS-level TCP connect timeouts can run to tens of seconds, which makes
        // short runs against an unreachable host look hung. Surface failed
        // connects promptly instead.
        Self::new(Some(Duration::from_secs(3)))
    }
}

impl HttpClient {
    #[must_use]
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(connect_timeout);

        let https_connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let inner = Client::builder(TokioExecutor::new()).build(https_connector);

        Self { inner }
    }

    /// Issue a request and read the full response body.
    ///
    /// `req.timeout` covers the whole exchange, headers and body both.
    pub async fn send(&self, req: HttpRequest) -> Result<HttpResponse> {
        let parsed = url::Url::parse(&req.url).map_err(|_| Error::InvalidUrl(req.url.clone()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(Error::UnsupportedScheme(req.url));
        }

        let uri: hyper::Uri = req
            .url
            .parse()
            .map_err(|_| Error::InvalidUrl(req.url.clone()))?;

        let mut builder = Request::builder().method(req.method).uri(uri);
        if !req.body.is_empty() {
            builder = builder.header(http::header::CONTENT_LENGTH, req.body.len());
        }
        for (name, value) in &req.headers {
            let name = http::header::HeaderName::from_bytes(name.as_bytes())?;
            let value = http::header::HeaderValue::from_str(value)?;
            builder = builder.header(name, value);
        }

        let timeout = req.timeout;
        let request: Request<Full<Bytes>> = builder.body(Full::new(req.body))?;

        let exchange = self.exchange(request);
        match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, exchange).await {
                Ok(res) => res,
                Err(_) => Err(Error::Timeout(timeout)),
            },
            None => exchange.await,
        }
    }

    async fn exchange(&self, request: Request<Full<Bytes>>) -> Result<HttpResponse> {
        let res: hyper::Response<Incoming> = self.inner.request(request).await?;
        let (parts, body) = res.into_parts();
        let status = parts.status.as_u16();

        // Normalize header names to lowercase; join repeated values.
        let mut merged: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in parts.headers.iter() {
            let key = name.as_str().to_ascii_lowercase();
            let value = String::from_utf8_lossy(value.as_bytes()).to_string();
            merged
                .entry(key)
                .and_modify(|cur| {
                    if !cur.is_empty() {
                        cur.push_str(", ");
                    }
                    cur.push_str(&value);
                })
                .or_insert(value);
        }

        let body = body.collect().await?.to_bytes();

        Ok(HttpResponse {
            status,
            headers: merged.into_iter().collect(),
            body,
        })
    }
}
