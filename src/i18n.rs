//! Translators, message catalogs and language negotiation helpers.

use crate::error::ConfigError;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Messages of one language: `msgid -> [singular, plural]`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Catalog {
    messages: HashMap<String, Vec<String>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, msgid: impl Into<String>, msgstr: impl Into<String>) {
        self.messages.insert(msgid.into(), vec![msgstr.into()]);
    }

    pub fn insert_plural(&mut self, msgid: impl Into<String>, singular: impl Into<String>, plural: impl Into<String>) {
        self.messages.insert(msgid.into(), vec![singular.into(), plural.into()]);
    }

    /// `{"msgid": "text"}` or `{"msgid": ["singular", "plural"]}`.
    pub fn from_json(value: &Value) -> Result<Self, ConfigError> {
        let Value::Object(map) = value else {
            return Err(ConfigError::Load("catalog must be a JSON object".into()));
        };
        let mut catalog = Catalog::new();
        for (msgid, msgstr) in map {
            match msgstr {
                Value::String(s) => catalog.insert(msgid.clone(), s.clone()),
                Value::Array(forms) => {
                    let forms: Vec<String> = forms.iter().filter_map(|f| f.as_str().map(str::to_string)).collect();
                    catalog.messages.insert(msgid.clone(), forms);
                }
                other => {
                    return Err(ConfigError::Load(format!("catalog entry {msgid}: unexpected {other}")));
                }
            }
        }
        Ok(catalog)
    }

    fn lookup(&self, msgid: &str, form: usize) -> Option<&str> {
        let forms = self.messages.get(msgid)?;
        forms.get(form).or_else(|| forms.first()).map(String::as_str)
    }
}

/// Catalogs keyed by sanitized language code.
#[derive(Clone, Debug, Default)]
pub struct Catalogs {
    by_lang: HashMap<String, Arc<Catalog>>,
}

impl Catalogs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, lang: &str, catalog: Catalog) {
        self.by_lang.insert(sanitize_language_code(lang), Arc::new(catalog));
    }

    pub fn get(&self, lang: &str) -> Option<Arc<Catalog>> {
        self.by_lang.get(lang).cloned()
    }

    pub fn languages(&self) -> Vec<&str> {
        let mut langs: Vec<&str> = self.by_lang.keys().map(String::as_str).collect();
        langs.sort_unstable();
        langs
    }

    /// Load every `<lang>.json` file in `dir`.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let mut catalogs = Catalogs::new();
        let entries = std::fs::read_dir(dir).map_err(|e| ConfigError::Load(format!("{}: {}", dir.display(), e)))?;
        for entry in entries {
            let path = entry.map_err(|e| ConfigError::Load(e.to_string()))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(lang) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
            let value: Value = serde_json::from_str(&text)
                .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
            catalogs.add(lang, Catalog::from_json(&value)?);
            tracing::debug!(lang, path = %path.display(), "loaded catalog");
        }
        Ok(catalogs)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Translator {
    languages: Vec<String>,
    catalogs: Vec<Arc<Catalog>>,
}

impl Translator {
    /// Returns every message untranslated.
    pub fn null() -> Self {
        Self::default()
    }

    /// Catalogs are searched in `languages` order; `pt_BR` falls back to `pt`.
    pub fn new(languages: Vec<String>, catalogs: &Catalogs) -> Self {
        let mut found = Vec::new();
        for lang in &languages {
            if let Some(catalog) = catalogs.get(lang) {
                found.push(catalog);
            }
            if let Some((base, _)) = lang.split_once('_') {
                if let Some(catalog) = catalogs.get(base) {
                    found.push(catalog);
                }
            }
        }
        Translator {
            languages,
            catalogs: found,
        }
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    pub fn gettext(&self, msgid: &str) -> String {
        self.catalogs
            .iter()
            .find_map(|c| c.lookup(msgid, 0))
            .unwrap_or(msgid)
            .to_string()
    }

    pub fn ngettext(&self, singular: &str, plural: &str, n: u64) -> String {
        let form = usize::from(n != 1);
        match self.catalogs.iter().find_map(|c| c.lookup(singular, form)) {
            Some(text) => text.to_string(),
            None if n == 1 => singular.to_string(),
            None => plural.to_string(),
        }
    }
}

/// `pt-br` -> `pt_BR`, `EN` -> `en`, `zh-hant-tw` -> `zh_Hant_TW`.
pub fn sanitize_language_code(code: &str) -> String {
    let mut parts = code.trim().split(['-', '_']).filter(|p| !p.is_empty());
    let Some(lang) = parts.next() else {
        return String::new();
    };
    let mut out = lang.to_ascii_lowercase();
    for part in parts {
        out.push('_');
        if part.len() == 4 {
            let mut chars = part.chars();
            if let Some(first) = chars.next() {
                out.push(first.to_ascii_uppercase());
                out.push_str(&chars.as_str().to_ascii_lowercase());
            }
        } else {
            out.push_str(&part.to_ascii_uppercase());
        }
    }
    out
}

/// Languages of an `Accept-Language` header ordered by quality. `*` is skipped.
pub fn parse_accept_language(header: &str) -> Vec<String> {
    let mut weighted: Vec<(f32, usize, String)> = header
        .split(',')
        .enumerate()
        .filter_map(|(idx, item)| {
            let mut pieces = item.trim().split(';');
            let lang = pieces.next()?.trim();
            if lang.is_empty() || lang == "*" {
                return None;
            }
            let q = pieces
                .find_map(|p| p.trim().strip_prefix("q="))
                .and_then(|q| q.parse::<f32>().ok())
                .unwrap_or(1.0);
            (q > 0.0).then(|| (q, idx, lang.to_string()))
        })
        .collect();
    weighted.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    weighted.into_iter().map(|(_, _, lang)| lang).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitizes_codes() {
        assert_eq!(sanitize_language_code("pt-br"), "pt_BR");
        assert_eq!(sanitize_language_code("EN"), "en");
        assert_eq!(sanitize_language_code("zh-hant-tw"), "zh_Hant_TW");
        assert_eq!(sanitize_language_code(""), "");
    }

    #[test]
    fn accept_language_is_sorted_by_quality() {
        assert_eq!(
            parse_accept_language("fr;q=0.5, pt-BR, en;q=0.8, *;q=0.1, de;q=0"),
            vec!["pt-BR", "en", "fr"]
        );
    }

    #[test]
    fn translator_falls_back_to_base_language() {
        let mut catalogs = Catalogs::new();
        let pt = Catalog::from_json(&json!({"Hello": "Olá", "file": ["arquivo", "arquivos"]})).unwrap();
        catalogs.add("pt", pt);
        let tr = Translator::new(vec!["pt_BR".into()], &catalogs);
        assert_eq!(tr.gettext("Hello"), "Olá");
        assert_eq!(tr.gettext("Bye"), "Bye");
        assert_eq!(tr.ngettext("file", "files", 2), "arquivos");
        assert_eq!(Translator::null().ngettext("file", "files", 1), "file");
    }

    #[test]
    fn loads_catalog_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("it.json"), r#"{"Hello": "Ciao"}"#).unwrap();
        std::fs::write(dir.path().join("README"), "ignored").unwrap();
        let catalogs = Catalogs::load_dir(dir.path()).unwrap();
        assert_eq!(catalogs.languages(), vec!["it"]);
        let tr = Translator::new(vec!["it".into()], &catalogs);
        assert_eq!(tr.gettext("Hello"), "Ciao");
    }
}
