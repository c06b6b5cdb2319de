//! Extension to content-type lookup.

use std::collections::HashMap;
use std::path::Path;

const BUILTIN: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("htm", "text/html"),
    ("txt", "text/plain"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("xml", "application/xml"),
    ("json", "application/json"),
    ("js", "application/javascript"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("ico", "image/vnd.microsoft.icon"),
    ("webp", "image/webp"),
    ("woff", "font/woff"),
    ("woff2", "font/woff2"),
];

#[derive(Clone, Debug)]
pub struct MimeDatabase {
    types: HashMap<String, String>,
}

impl Default for MimeDatabase {
    fn default() -> Self {
        MimeDatabase {
            types: BUILTIN
                .iter()
                .map(|(ext, ct)| (ext.to_string(), ct.to_string()))
                .collect(),
        }
    }
}

impl MimeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// `ext` may be given with or without the leading dot.
    pub fn add_type(&mut self, ext: &str, content_type: &str) {
        self.types
            .insert(ext.trim_start_matches('.').to_ascii_lowercase(), content_type.to_string());
    }

    pub fn guess_type(&self, path: impl AsRef<Path>) -> Option<&str> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        self.types.get(&ext).map(String::as_str)
    }
}
