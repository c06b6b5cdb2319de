//! Synchronous application surface: `environ` in, status/headers/body out.
//!
//! A [`WsgiApp`] is called once per request on one thread. Returning `Err` is the
//! equivalent of an exception reaching the server; outer middlewares may turn it
//! into a response.

pub mod context;
pub mod controller;
pub mod dispatch;

use crate::config::Service;
use crate::error::AppError;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::sync::Arc;

pub use context::{RequestContext, RoutingArgs, TemplateContext, UrlGenerator};
pub use controller::{Controller, ControllerFactory, ControllerHandle, ControllerNamespace, ObjectController, Output};
pub use dispatch::TgApp;

/// Well-known environ keys.
pub mod keys {
    pub const ROUTING_ARGS: &str = "wsgiorg.routing_args";
    pub const LOCALS: &str = "tg.locals";
    pub const ROUTES_DICT: &str = "tg.routes_dict";
    pub const REGISTRY: &str = "tg.registry";
    pub const SESSION: &str = "beaker.session";
    pub const CACHE: &str = "beaker.cache";
    pub const IDENTITY: &str = "repoze.who.identity";
    pub const REMOTE_USER: &str = "REMOTE_USER";
    pub const CREDENTIALS: &str = "repoze.what.credentials";
    pub const STATUS_CODE_REDIRECT: &str = "tg.status_code_redirect";
    pub const ORIGINAL_REQUEST: &str = "tg.original_request";
    pub const ORIGINAL_RESPONSE: &str = "tg.original_response";
    pub const ORIGINAL_ERROR: &str = "tg.original_error";
    pub const FILE_WRAPPER: &str = "wsgi.file_wrapper";
    pub const TESTING_VARIABLES: &str = "paste.testing_variables";
}

pub trait WsgiApp: Send + Sync {
    fn call(&self, environ: &mut Environ) -> Result<WsgiResponse, AppError>;
}

pub type BoxedApp = Arc<dyn WsgiApp>;

impl<F> WsgiApp for F
where
    F: Fn(&mut Environ) -> Result<WsgiResponse, AppError> + Send + Sync,
{
    fn call(&self, environ: &mut Environ) -> Result<WsgiResponse, AppError> {
        self(environ)
    }
}

/// Per-request environment.
#[derive(Clone)]
pub struct Environ {
    pub method: Method,
    pub script_name: String,
    pub path_info: String,
    pub query_string: String,
    pub server_name: String,
    pub server_port: u16,
    pub url_scheme: String,
    pub remote_addr: Option<String>,
    pub headers: HeaderMap,
    pub input: Bytes,
    vars: HashMap<String, Service>,
}

impl Environ {
    /// `target` may carry a query string (`/path?a=1`).
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p, q),
            None => (target, ""),
        };
        Environ {
            method,
            script_name: String::new(),
            path_info: if path.is_empty() { "/".into() } else { path.to_string() },
            query_string: query.to_string(),
            server_name: "localhost".into(),
            server_port: 80,
            url_scheme: "http".into(),
            remote_addr: None,
            headers: HeaderMap::new(),
            input: Bytes::new(),
            vars: HashMap::new(),
        }
    }

    pub fn get(target: &str) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: &str, body: impl Into<Bytes>) -> Self {
        Self::new(Method::POST, target).with_body(body)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.insert_header(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.input = body.into();
        self
    }

    pub fn insert_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            self.headers.append(name, value);
        } else {
            tracing::warn!(header = name, "dropping malformed header");
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn path_segments(&self) -> Vec<String> {
        self.path_info
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// `scheme://host[:port]`, preferring the `Host` header.
    pub fn host_url(&self) -> String {
        let host = match self.header("host") {
            Some(h) => h.to_string(),
            None => {
                let default_port = matches!(
                    (self.url_scheme.as_str(), self.server_port),
                    ("http", 80) | ("https", 443)
                );
                if default_port {
                    self.server_name.clone()
                } else {
                    format!("{}:{}", self.server_name, self.server_port)
                }
            }
        };
        format!("{}://{}", self.url_scheme, host)
    }

    pub fn var<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.vars.get(key).cloned().and_then(|v| v.downcast::<T>().ok())
    }

    pub fn set_var<T: Any + Send + Sync>(&mut self, key: &str, value: T) {
        self.vars.insert(key.to_string(), Arc::new(value));
    }

    pub fn set_var_arc<T: Any + Send + Sync>(&mut self, key: &str, value: Arc<T>) {
        self.vars.insert(key.to_string(), value);
    }

    pub fn remove_var(&mut self, key: &str) -> bool {
        self.vars.remove(key).is_some()
    }

    pub fn has_var(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// True when `key` holds a `bool` set to true.
    pub fn flag(&self, key: &str) -> bool {
        self.var::<bool>(key).map(|b| *b).unwrap_or(false)
    }

    pub fn var_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.vars.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

impl fmt::Debug for Environ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environ")
            .field("REQUEST_METHOD", &self.method)
            .field("SCRIPT_NAME", &self.script_name)
            .field("PATH_INFO", &self.path_info)
            .field("QUERY_STRING", &self.query_string)
            .field("vars", &self.var_keys())
            .finish()
    }
}

pub type Chunk = Result<Bytes, AppError>;

/// Response body as an iterator of chunks. Dropping the body closes it.
pub struct Body {
    chunks: Box<dyn Iterator<Item = Chunk> + Send>,
}

impl Body {
    pub fn empty() -> Self {
        Body {
            chunks: Box::new(std::iter::empty()),
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Self::empty();
        }
        Body {
            chunks: Box::new(std::iter::once(Ok(bytes))),
        }
    }

    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Chunk>,
        I::IntoIter: Send + 'static,
    {
        Body {
            chunks: Box::new(chunks.into_iter()),
        }
    }

    /// Streams `reader` in `chunk_size` pieces.
    pub fn from_reader<R: Read + Send + 'static>(reader: R, chunk_size: usize) -> Self {
        Body {
            chunks: Box::new(ReaderChunks {
                reader,
                chunk_size: chunk_size.max(1),
                done: false,
            }),
        }
    }

    /// Run `f` once, when the body is exhausted or dropped, whichever comes first.
    pub fn on_close<F: FnOnce() + Send + 'static>(self, f: F) -> Self {
        Body {
            chunks: Box::new(ClosingBody {
                inner: self.chunks,
                on_close: Some(Box::new(f)),
            }),
        }
    }

    pub fn collect_bytes(self) -> Result<Vec<u8>, AppError> {
        let mut out = Vec::new();
        for chunk in self {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl Iterator for Body {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        self.chunks.next()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Body(..)")
    }
}

struct ReaderChunks<R> {
    reader: R,
    chunk_size: usize,
    done: bool,
}

impl<R: Read> Iterator for ReaderChunks<R> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }
        let mut buf = vec![0_u8; self.chunk_size];
        match self.reader.read(&mut buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(n) => {
                buf.truncate(n);
                Some(Ok(Bytes::from(buf)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(AppError::Io(e)))
            }
        }
    }
}

struct ClosingBody {
    inner: Box<dyn Iterator<Item = Chunk> + Send>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl ClosingBody {
    fn close(&mut self) {
        if let Some(f) = self.on_close.take() {
            f();
        }
    }
}

impl Iterator for ClosingBody {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let next = self.inner.next();
        if next.is_none() {
            self.close();
        }
        next
    }
}

impl Drop for ClosingBody {
    fn drop(&mut self) {
        self.close();
    }
}

/// Objects reported to test harnesses; stored under [`keys::TESTING_VARIABLES`] by the harness.
#[derive(Default)]
pub struct TestingVariables {
    vars: parking_lot::Mutex<HashMap<String, Service>>,
}

impl TestingVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, value: Service) {
        self.vars.lock().insert(key.to_string(), value);
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.vars.lock().get(key).cloned().and_then(|v| v.downcast::<T>().ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.lock().contains_key(key)
    }
}

/// Builds the body of a static file; stored in the environ under [`keys::FILE_WRAPPER`].
pub type FileWrapper = Arc<dyn Fn(std::fs::File, usize) -> Body + Send + Sync>;

pub struct WsgiResponse {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl WsgiResponse {
    pub fn new(status: StatusCode, headers: Vec<(String, String)>, body: Body) -> Self {
        WsgiResponse { status, headers, body }
    }

    pub fn text(status: StatusCode, content_type: &str, text: impl Into<String>) -> Self {
        let text: String = text.into();
        WsgiResponse {
            status,
            headers: vec![
                ("Content-Type".into(), content_type.to_string()),
                ("Content-Length".into(), text.len().to_string()),
            ],
            body: Body::from_bytes(text),
        }
    }

    pub fn not_found() -> Self {
        Self::text(StatusCode::NOT_FOUND, "text/plain; charset=utf-8", "Not Found")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn collect(self) -> Result<CollectedResponse, AppError> {
        Ok(CollectedResponse {
            status: self.status,
            headers: self.headers,
            body: self.body.collect_bytes()?,
        })
    }
}

impl fmt::Debug for WsgiResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsgiResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish()
    }
}

/// A response whose body has been fully consumed.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectedResponse {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CollectedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn into_wsgi(self) -> WsgiResponse {
        WsgiResponse::new(self.status, self.headers, Body::from_bytes(self.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn target_splits_path_and_query() {
        let env = Environ::get("/a/b?x=1&y=2");
        assert_eq!(env.path_info, "/a/b");
        assert_eq!(env.query_string, "x=1&y=2");
        assert_eq!(env.path_segments(), vec!["a", "b"]);
        assert_eq!(Environ::get("").path_info, "/");
    }

    #[test]
    fn vars_are_typed() {
        let mut env = Environ::get("/");
        env.set_var(keys::STATUS_CODE_REDIRECT, true);
        env.set_var("count", 3_u32);
        assert!(env.flag(keys::STATUS_CODE_REDIRECT));
        assert_eq!(env.var::<u32>("count").map(|v| *v), Some(3));
        assert!(env.var::<String>("count").is_none());
        assert!(env.remove_var("count"));
        assert!(!env.has_var("count"));
    }

    #[test]
    fn close_callback_runs_once_on_exhaustion() {
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = closed.clone();
        let body = Body::from_chunks(vec![Ok(Bytes::from_static(b"a")), Ok(Bytes::from_static(b"b"))])
            .on_close(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        assert_eq!(body.collect_bytes().unwrap(), b"ab");
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_callback_runs_on_drop() {
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = closed.clone();
        let mut body = Body::from_chunks(vec![Ok(Bytes::from_static(b"a")), Ok(Bytes::from_static(b"b"))])
            .on_close(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        assert!(body.next().is_some());
        drop(body);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reader_bodies_stream_in_chunks() {
        let body = Body::from_reader(std::io::Cursor::new(b"hello world".to_vec()), 4);
        let chunks: Vec<_> = body.map(|c| c.unwrap().len()).collect();
        assert_eq!(chunks, vec![4, 4, 3]);
    }

    #[test]
    fn host_url_omits_default_ports() {
        let mut env = Environ::get("/");
        assert_eq!(env.host_url(), "http://localhost");
        env.server_port = 8080;
        assert_eq!(env.host_url(), "http://localhost:8080");
        let env = env.with_header("host", "example.org");
        assert_eq!(env.host_url(), "http://example.org");
    }
}
