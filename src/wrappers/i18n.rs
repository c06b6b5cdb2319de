use super::{ApplicationWrapper, Handler, RequestHandler};
use crate::config::Conf;
use crate::error::{AppError, ConfigError};
use crate::http::Response;
use crate::i18n::{sanitize_language_code, Catalogs, Translator};
use crate::wsgi::{ControllerHandle, Environ, RequestContext};
use serde_json::Value;
use std::sync::Arc;

/// Picks the request languages and installs a matching translator.
pub struct I18nApplicationWrapper {
    next: Handler,
    enabled: bool,
    default_lang: Option<String>,
    lang_session_key: String,
    no_session_touch: bool,
    catalogs: Arc<Catalogs>,
}

impl I18nApplicationWrapper {
    pub fn new(next: Handler, conf: &Conf) -> Result<Self, ConfigError> {
        Ok(I18nApplicationWrapper {
            next,
            enabled: conf.bool_or("i18n.enabled", false)?,
            default_lang: conf.get_str("i18n.lang").map(sanitize_language_code),
            lang_session_key: conf.str_or("i18n.lang_session_key", "tg_lang"),
            no_session_touch: conf.bool_or("i18n.no_session_touch", false)?,
            catalogs: conf.service::<Arc<Catalogs>>("i18n.catalogs").unwrap_or_default(),
        })
    }

    /// Session languages first, then `Accept-Language`, then the configured default.
    fn languages(&self, context: &RequestContext) -> Vec<String> {
        let mut candidates = Vec::new();
        if let Some(session) = &context.session {
            let stored = if self.no_session_touch {
                session.peek(&self.lang_session_key)
            } else {
                session.get(&self.lang_session_key)
            };
            match stored {
                Some(Value::String(lang)) => candidates.push(lang),
                Some(Value::Array(langs)) => {
                    candidates.extend(langs.into_iter().filter_map(|l| l.as_str().map(str::to_string)))
                }
                _ => {}
            }
        }
        candidates.extend(context.request.accept_languages());
        candidates.extend(self.default_lang.iter().cloned());

        let mut languages: Vec<String> = Vec::with_capacity(candidates.len());
        for lang in candidates.iter().map(|l| sanitize_language_code(l)) {
            if !lang.is_empty() && !languages.contains(&lang) {
                languages.push(lang);
            }
        }
        languages
    }
}

impl RequestHandler for I18nApplicationWrapper {
    fn handle(
        &self,
        controller: &ControllerHandle,
        environ: &mut Environ,
        context: &mut RequestContext,
    ) -> Result<Response, AppError> {
        let languages = self.languages(context);
        tracing::trace!(?languages, "request languages");
        context.set_translator(Translator::new(languages, &self.catalogs))?;
        self.next.handle(controller, environ, context)
    }
}

impl ApplicationWrapper for I18nApplicationWrapper {
    fn name(&self) -> &str {
        "i18n"
    }

    fn injected(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::i18n::Catalog;
    use crate::registry::locals;

    fn conf() -> Conf {
        let mut catalogs = Catalogs::new();
        let mut pt = Catalog::new();
        pt.insert("Hello", "Olá");
        catalogs.add("pt", pt);
        let mut conf = Conf::new();
        conf.set("i18n.enabled", true);
        conf.set("i18n.lang", "en");
        conf.set_service("i18n.catalogs", Arc::new(catalogs));
        conf
    }

    fn greet() -> Handler {
        handler(|_, _, ctx| {
            let through_proxy = locals::TRANSLATOR.current_obj()?.gettext("Hello");
            Ok(text(&format!("{}|{}", ctx.gettext("Hello"), through_proxy)))
        })
    }

    #[test]
    fn accept_language_selects_the_catalog() {
        let wrapper = I18nApplicationWrapper::new(greet(), &conf()).unwrap();
        let mut environ = Environ::get("/").with_header("accept-language", "pt-br,en;q=0.5");
        let mut ctx = context(conf(), &environ);
        let response = wrapper.handle(&controller(), &mut environ, &mut ctx).unwrap();
        assert_eq!(response.text(), "Olá|Olá");
        assert_eq!(ctx.translator.languages(), ["pt_BR".to_string(), "en".to_string()]);
    }

    #[test]
    fn falls_back_to_the_default_language() {
        let wrapper = I18nApplicationWrapper::new(greet(), &conf()).unwrap();
        let mut environ = Environ::get("/");
        let mut ctx = context(conf(), &environ);
        let response = wrapper.handle(&controller(), &mut environ, &mut ctx).unwrap();
        assert_eq!(response.text(), "Hello|Hello");
        assert_eq!(ctx.translator.languages(), ["en".to_string()]);
    }
}
