use crate::error::AppError;
use crate::mime::MimeDatabase;
use crate::wsgi::{keys, Body, BoxedApp, Environ, FileWrapper, WsgiApp, WsgiResponse};
use axum::http::{Method, StatusCode};
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

const CHUNK_SIZE: usize = 64 * 1024;

/// Serves files under a directory ahead of the wrapped application.
///
/// Only `GET` and `HEAD` are answered; anything else, and any path without a
/// matching file, goes to the wrapped application.
pub struct StaticsMiddleware {
    app: BoxedApp,
    root: PathBuf,
    mimetypes: Arc<MimeDatabase>,
}

enum Resolved {
    Path(PathBuf),
    Escapes,
    Undecodable,
}

impl StaticsMiddleware {
    pub fn new(app: BoxedApp, root: impl Into<PathBuf>, mimetypes: Arc<MimeDatabase>) -> Self {
        StaticsMiddleware {
            app,
            root: root.into(),
            mimetypes,
        }
    }

    fn resolve(&self, path_info: &str) -> Resolved {
        // No file on disk can be named by a path that does not decode.
        let Ok(decoded) = urlencoding::decode(path_info) else {
            return Resolved::Undecodable;
        };
        let relative = Path::new(decoded.trim_start_matches('/'));
        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return Resolved::Escapes,
            }
        }
        Resolved::Path(resolved)
    }

    fn serve(&self, environ: &Environ, path: &Path) -> Result<WsgiResponse, AppError> {
        let file = std::fs::File::open(path)?;
        let metadata = file.metadata()?;
        let content_type = self
            .mimetypes
            .guess_type(path)
            .unwrap_or("application/octet-stream")
            .to_string();

        let mut headers = vec![
            ("Content-Type".to_string(), content_type),
            ("Content-Length".to_string(), metadata.len().to_string()),
        ];
        if let Ok(modified) = metadata.modified() {
            let modified: DateTime<Utc> = modified.into();
            headers.push((
                "Last-Modified".to_string(),
                modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
            ));
        }

        let body = if environ.method == Method::HEAD {
            Body::empty()
        } else if let Some(wrapper) = environ.var::<FileWrapper>(keys::FILE_WRAPPER) {
            wrapper(file, CHUNK_SIZE)
        } else {
            Body::from_reader(file, CHUNK_SIZE)
        };
        tracing::debug!(path = %path.display(), "serving static file");
        Ok(WsgiResponse::new(StatusCode::OK, headers, body))
    }
}

impl WsgiApp for StaticsMiddleware {
    fn call(&self, environ: &mut Environ) -> Result<WsgiResponse, AppError> {
        if environ.method != Method::GET && environ.method != Method::HEAD {
            return self.app.call(environ);
        }
        let path = match self.resolve(&environ.path_info) {
            Resolved::Path(path) => path,
            Resolved::Undecodable => return self.app.call(environ),
            Resolved::Escapes => {
                tracing::warn!(path = %environ.path_info, "refused static path outside the root");
                return Ok(WsgiResponse::text(StatusCode::FORBIDDEN, "text/plain; charset=utf-8", "Forbidden"));
            }
        };
        if !path.is_file() {
            return self.app.call(environ);
        }
        self.serve(environ, &path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup() -> (tempfile::TempDir, StaticsMiddleware, Arc<AtomicUsize>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("css")).unwrap();
        std::fs::write(dir.path().join("css/site.css"), "body {}").unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app: BoxedApp = Arc::new(move |_: &mut Environ| -> Result<WsgiResponse, AppError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(WsgiResponse::text(StatusCode::OK, "text/plain", "app"))
        });
        let statics = StaticsMiddleware::new(app, dir.path(), Arc::new(MimeDatabase::new()));
        (dir, statics, hits)
    }

    #[test]
    fn serves_existing_files() {
        let (_dir, statics, hits) = setup();
        let response = statics.call(&mut Environ::get("/css/site.css")).unwrap();
        assert_eq!(response.header("content-type"), Some("text/css"));
        assert_eq!(response.header("content-length"), Some("7"));
        assert!(response.header("last-modified").is_some());
        assert_eq!(response.collect().unwrap().text(), "body {}");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn head_has_no_body() {
        let (_dir, statics, _) = setup();
        let mut environ = Environ::new(Method::HEAD, "/css/site.css");
        let response = statics.call(&mut environ).unwrap().collect().unwrap();
        assert_eq!(response.header("content-length"), Some("7"));
        assert!(response.text().is_empty());
    }

    #[test]
    fn misses_and_posts_fall_through() {
        let (_dir, statics, hits) = setup();
        assert_eq!(statics.call(&mut Environ::get("/missing.css")).unwrap().collect().unwrap().text(), "app");
        statics.call(&mut Environ::post("/css/site.css", "x")).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn traversal_is_refused() {
        let (_dir, statics, hits) = setup();
        let response = statics.call(&mut Environ::get("/css/../../etc/passwd")).unwrap();
        assert_eq!(response.status, StatusCode::FORBIDDEN);
        let encoded = statics.call(&mut Environ::get("/%2e%2e/secret")).unwrap();
        assert_eq!(encoded.status, StatusCode::FORBIDDEN);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn undecodable_paths_fall_through() {
        let (_dir, statics, hits) = setup();
        let response = statics.call(&mut Environ::get("/%FF")).unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.collect().unwrap().text(), "app");
        statics.call(&mut Environ::get("/css/%C3%28.css")).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn file_wrapper_is_used_when_present() {
        let (_dir, statics, _) = setup();
        let mut environ = Environ::get("/css/site.css");
        let wrapper: FileWrapper = Arc::new(|_file: std::fs::File, _size: usize| Body::from_bytes("wrapped"));
        environ.set_var(keys::FILE_WRAPPER, wrapper);
        let response = statics.call(&mut environ).unwrap().collect().unwrap();
        assert_eq!(response.text(), "wrapped");
    }
}
