//! HTTP object-storage page store.

use std::fmt;

use hyper::client::HttpConnector;
use hyper::{Body, Client, Method, Request, StatusCode};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use nbdpage_store::{PageAddress, SendPageStore};
use url::Url;

/// Error type for [`HttpObjectStore`] operations.
#[derive(Debug)]
#[non_exhaustive]
pub enum HttpStoreError {
    /// Transport-level failure talking to the endpoint.
    Http(hyper::Error),
    /// Malformed request (bad object URL, typically an odd export name).
    Request(hyper::http::Error),
    /// The endpoint answered with an unexpected status.
    Status {
        /// Status the endpoint returned.
        status: StatusCode,
        /// Object URL the request targeted.
        url: String,
    },
    /// The object URL could not be built from the endpoint.
    Url(url::ParseError),
}

impl fmt::Display for HttpStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpStoreError::Http(e) => write!(f, "http error: {}", e),
            HttpStoreError::Request(e) => write!(f, "request error: {}", e),
            HttpStoreError::Status { status, url } => {
                write!(f, "unexpected status {} for {}", status, url)
            }
            HttpStoreError::Url(e) => write!(f, "bad object url: {}", e),
        }
    }
}

impl std::error::Error for HttpStoreError {}

impl From<hyper::Error> for HttpStoreError {
    fn from(e: hyper::Error) -> Self {
        HttpStoreError::Http(e)
    }
}

/// Page store keeping one object per page behind an HTTP/1.1 endpoint.
///
/// Objects live at `<endpoint>/<export>/page-<index:08>.bin`; reads are
/// plain `GET` (404 means the page was never written and reads as zeroes),
/// writes are `PUT`. A `PUT` acknowledged by the endpoint is taken as
/// durable, so `flush_export` is a no-op. Suitable for S3-compatible
/// gateways that accept unsigned requests.
#[derive(Clone)]
pub struct HttpObjectStore {
    client: Client<HttpsConnector<HttpConnector>>,
    base: Url,
}

impl HttpObjectStore {
    /// Create a store for objects under `endpoint`, e.g.
    /// `http://127.0.0.1:9000/exports`.
    pub fn new(mut endpoint: Url) -> Self {
        // Url::join replaces the last path segment unless it ends in '/'.
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        let https = HttpsConnectorBuilder::new()
            .with_native_roots()
            .https_or_http()
            .enable_http1()
            .build();
        Self {
            client: Client::builder().build(https),
            base: endpoint,
        }
    }

    fn page_url(&self, addr: &PageAddress) -> Result<Url, HttpStoreError> {
        self.base
            .join(&format!("{}/{}", addr.export, addr.object_name()))
            .map_err(HttpStoreError::Url)
    }
}

impl SendPageStore for HttpObjectStore {
    type Error = HttpStoreError;

    async fn read_page(&self, addr: &PageAddress) -> Result<Vec<u8>, Self::Error> {
        let url = self.page_url(addr)?;
        let req = Request::builder()
            .method(Method::GET)
            .uri(url.as_str())
            .body(Body::empty())
            .map_err(HttpStoreError::Request)?;

        let resp = self.client.request(req).await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(vec![0; addr.size as usize]),
            status if status.is_success() => {
                let body = hyper::body::to_bytes(resp.into_body()).await?;
                let mut page = vec![0u8; addr.size as usize];
                let n = body.len().min(page.len());
                page[..n].copy_from_slice(&body[..n]);
                Ok(page)
            }
            status => Err(HttpStoreError::Status {
                status,
                url: url.to_string(),
            }),
        }
    }

    async fn write_page(&self, addr: &PageAddress, data: &[u8]) -> Result<(), Self::Error> {
        let url = self.page_url(addr)?;
        let req = Request::builder()
            .method(Method::PUT)
            .uri(url.as_str())
            .body(Body::from(data.to_vec()))
            .map_err(HttpStoreError::Request)?;

        let resp = self.client.request(req).await?;
        if !resp.status().is_success() {
            return Err(HttpStoreError::Status {
                status: resp.status(),
                url: url.to_string(),
            });
        }
        Ok(())
    }

    async fn flush_export(&self, _export: &str) -> Result<(), Self::Error> {
        // An acknowledged PUT is already durable on the object side.
        Ok(())
    }
}
