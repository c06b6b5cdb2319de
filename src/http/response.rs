//! Framework response, mutable until it is turned into a WSGI response.

use super::cookies::SetCookie;
use crate::config::Conf;
use crate::wsgi::{Body, CollectedResponse, WsgiResponse};
use axum::http::StatusCode;
use serde_json::Value;

#[derive(Clone, Debug)]
pub struct ResponseOptions {
    pub content_type: String,
    pub charset: String,
    pub headers: Vec<(String, String)>,
}

impl Default for ResponseOptions {
    fn default() -> Self {
        ResponseOptions {
            content_type: "text/html".into(),
            charset: "utf-8".into(),
            headers: vec![
                ("Cache-Control".into(), "no-cache".into()),
                ("Pragma".into(), "no-cache".into()),
            ],
        }
    }
}

impl ResponseOptions {
    /// `content_type`, `charset` and the `response.headers` object.
    pub fn from_conf(conf: &Conf) -> Self {
        let mut options = ResponseOptions::default();
        if let Some(ct) = conf.get_str("content_type") {
            options.content_type = ct.to_string();
        }
        if let Some(charset) = conf.get_str("charset") {
            options.charset = charset.to_string();
        }
        if let Some(Value::Object(headers)) = conf.get("response.headers") {
            options.headers = headers
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect();
        }
        options
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub content_type: Option<String>,
    pub charset: Option<String>,
    pub body: Vec<u8>,
}

impl Default for Response {
    fn default() -> Self {
        Response::new(&ResponseOptions::default())
    }
}

impl Response {
    pub fn new(options: &ResponseOptions) -> Self {
        Response {
            status: StatusCode::OK,
            headers: options.headers.clone(),
            content_type: Some(options.content_type.clone()),
            charset: Some(options.charset.clone()),
            body: Vec::new(),
        }
    }

    pub fn with_status(status: StatusCode) -> Self {
        Response {
            status,
            ..Response::default()
        }
    }

    /// Content type without parameters (`text/html; charset=utf-8` gives `text/html`).
    pub fn content_type_base(&self) -> Option<&str> {
        self.content_type
            .as_deref()
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim())
            .filter(|ct| !ct.is_empty())
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = Some(content_type.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        if name.eq_ignore_ascii_case("content-type") {
            return self.content_type.as_deref();
        }
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace every header named `name`.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        if name.eq_ignore_ascii_case("content-type") {
            self.content_type = Some(value.into());
            return;
        }
        self.remove_header(name);
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn add_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn set_cookie(&mut self, cookie: &SetCookie) {
        self.add_header("Set-Cookie", cookie.to_header_value());
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.body = text.into().into_bytes();
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn content_type_header(&self) -> Option<String> {
        let ct = self.content_type.as_deref()?;
        let textual = ct.starts_with("text/") || ct == "application/json" || ct == "application/javascript";
        match &self.charset {
            Some(charset) if textual && !ct.contains("charset=") => Some(format!("{ct}; charset={charset}")),
            _ => Some(ct.to_string()),
        }
    }

    pub fn into_wsgi(self) -> WsgiResponse {
        let mut headers = Vec::with_capacity(self.headers.len() + 2);
        if let Some(ct) = self.content_type_header() {
            headers.push(("Content-Type".to_string(), ct));
        }
        headers.extend(
            self.headers
                .into_iter()
                .filter(|(k, _)| !k.eq_ignore_ascii_case("content-length")),
        );
        headers.push(("Content-Length".to_string(), self.body.len().to_string()));
        WsgiResponse::new(self.status, headers, Body::from_bytes(self.body))
    }

    /// Rebuild a framework response from a collected WSGI one.
    pub fn from_collected(collected: CollectedResponse) -> Self {
        let mut content_type = None;
        let mut headers = Vec::with_capacity(collected.headers.len());
        for (k, v) in collected.headers {
            if k.eq_ignore_ascii_case("content-type") {
                content_type = Some(v);
            } else if !k.eq_ignore_ascii_case("content-length") {
                headers.push((k, v));
            }
        }
        Response {
            status: collected.status,
            headers,
            content_type,
            charset: None,
            body: collected.body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn textual_types_carry_the_charset() {
        let mut resp = Response::default();
        resp.set_content_type("application/json");
        resp.set_text("{}");
        let wsgi = resp.into_wsgi();
        assert_eq!(wsgi.header("content-type"), Some("application/json; charset=utf-8"));
        assert_eq!(wsgi.header("content-length"), Some("2"));
        assert_eq!(wsgi.header("cache-control"), Some("no-cache"));
    }

    #[test]
    fn binary_types_do_not() {
        let mut resp = Response::default();
        resp.set_content_type("image/png");
        assert_eq!(resp.into_wsgi().header("content-type"), Some("image/png"));
    }

    #[test]
    fn content_type_base_strips_parameters() {
        let mut resp = Response::default();
        resp.set_header("Content-Type", "text/html; charset=latin-1");
        assert_eq!(resp.content_type_base(), Some("text/html"));
        resp.content_type = None;
        assert_eq!(resp.content_type_base(), None);
    }

    #[test]
    fn collected_responses_round_trip_headers() {
        let collected = CollectedResponse {
            status: StatusCode::NOT_FOUND,
            headers: vec![
                ("Content-Type".into(), "text/plain".into()),
                ("Content-Length".into(), "3".into()),
                ("X-Extra".into(), "1".into()),
            ],
            body: b"abc".to_vec(),
        };
        let resp = Response::from_collected(collected);
        assert_eq!(resp.content_type_base(), Some("text/plain"));
        assert_eq!(resp.header("x-extra"), Some("1"));
        assert_eq!(resp.headers.len(), 1);
    }
}
