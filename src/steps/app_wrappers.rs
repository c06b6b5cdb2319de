//! Steps that only contribute an application wrapper, plus the options it reads.

use crate::cache::CacheManager;
use crate::config::{Coercion, Conf};
use crate::configurator::{BuildContext, ConfigurationStep, Configurator};
use crate::deps::After;
use crate::error::{ConfigError, RegistrationError};
use crate::session::{MemorySessionStore, SessionStore};
use crate::wrappers::{
    wrapper_factory, CacheApplicationWrapper, ErrorPageApplicationWrapper, I18nApplicationWrapper,
    IdentityApplicationWrapper, SessionApplicationWrapper, TransactionApplicationWrapper,
};
use serde_json::{json, Map, Value};
use std::any::Any;
use std::sync::Arc;

fn map(entries: &[(&str, Value)]) -> Map<String, Value> {
    entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn bools(keys: &[&str]) -> Vec<(String, Coercion)> {
    keys.iter().map(|k| (k.to_string(), Coercion::Bool)).collect()
}

macro_rules! wrapper_step {
    ($step:ident, $id:literal, $key:literal, $wrapper:ty) => {
        impl $step {
            fn bind(configurator: &mut Configurator) -> Result<(), RegistrationError> {
                if configurator.application_wrappers().contains(&$key) {
                    return Ok(());
                }
                configurator.register_application_wrapper($key, wrapper_factory(<$wrapper>::new), After::Late)
            }
        }

        impl ConfigurationStep for $step {
            fn id(&self) -> &str {
                $id
            }

            fn defaults(&self) -> Map<String, Value> {
                self.options()
            }

            fn coercions(&self) -> Vec<(String, Coercion)> {
                self.converters()
            }

            fn on_bind(&self, configurator: &mut Configurator) -> Result<(), RegistrationError> {
                Self::bind(configurator)
            }

            fn config_ready(&self, conf: &mut Conf, _ctx: &BuildContext) -> Result<(), ConfigError> {
                self.prepare(conf)
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }
    };
}

/// Error documents for trapped statuses and escaping errors.
#[derive(Debug, Default)]
pub struct ErrorPageStep;

impl ErrorPageStep {
    fn options(&self) -> Map<String, Value> {
        map(&[
            ("errorpage.enabled", json!(false)),
            ("errorpage.path", json!("/error/document")),
        ])
    }

    fn converters(&self) -> Vec<(String, Coercion)> {
        let mut coercions = bools(&["errorpage.enabled", "errorpage.handle_exceptions"]);
        coercions.push(("errorpage.status_codes".into(), Coercion::list()));
        coercions.push(("errorpage.content_types".into(), Coercion::list()));
        coercions
    }

    fn prepare(&self, _conf: &mut Conf) -> Result<(), ConfigError> {
        Ok(())
    }
}

wrapper_step!(ErrorPageStep, "error_pages", "errorpage", ErrorPageApplicationWrapper);

/// Cookie sessions. Installs a process-wide memory store unless `session.store` is given.
#[derive(Debug, Default)]
pub struct SessionStep;

impl SessionStep {
    fn options(&self) -> Map<String, Value> {
        map(&[("session.enabled", json!(false))])
    }

    fn converters(&self) -> Vec<(String, Coercion)> {
        let mut coercions = bools(&["session.enabled", "session.httponly", "session.secure"]);
        coercions.push(("session.timeout".into(), Coercion::Int));
        coercions
    }

    fn prepare(&self, conf: &mut Conf) -> Result<(), ConfigError> {
        if conf.bool_or("session.enabled", false)? && !conf.has_service("session.store") {
            let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::from_conf(conf)?);
            conf.set_service("session.store", store);
        }
        Ok(())
    }
}

wrapper_step!(SessionStep, "sessions", "session", SessionApplicationWrapper);

/// Request cache. The manager is shared by the wrapper and cached rendering.
#[derive(Debug, Default)]
pub struct CacheStep;

impl CacheStep {
    fn options(&self) -> Map<String, Value> {
        map(&[("cache.enabled", json!(true))])
    }

    fn converters(&self) -> Vec<(String, Coercion)> {
        vec![
            ("cache.enabled".into(), Coercion::Bool),
            ("cache.expire".into(), Coercion::Int),
        ]
    }

    fn prepare(&self, conf: &mut Conf) -> Result<(), ConfigError> {
        if conf.bool_or("cache.enabled", true)? && !conf.has_service("cache.manager") {
            let expire = conf.int_or("cache.expire", 0)?;
            let manager = CacheManager::new(u64::try_from(expire).ok().filter(|e| *e > 0));
            conf.set_service("cache.manager", Arc::new(manager));
        }
        Ok(())
    }
}

wrapper_step!(CacheStep, "caching", "cache", CacheApplicationWrapper);

/// Per-request language selection.
#[derive(Debug, Default)]
pub struct I18nStep;

impl I18nStep {
    fn options(&self) -> Map<String, Value> {
        map(&[
            ("i18n.enabled", json!(false)),
            ("i18n.lang_session_key", json!("tg_lang")),
        ])
    }

    fn converters(&self) -> Vec<(String, Coercion)> {
        bools(&["i18n.enabled", "i18n.no_session_touch"])
    }

    fn prepare(&self, conf: &mut Conf) -> Result<(), ConfigError> {
        if conf.bool_or("i18n.enabled", false)? && !conf.has_service("i18n.catalogs") {
            tracing::debug!("i18n enabled without catalogs, messages stay untranslated");
        }
        Ok(())
    }
}

wrapper_step!(I18nStep, "i18n", "i18n", I18nApplicationWrapper);

/// Identity enrichment from `sa_auth.authmetadata`.
#[derive(Debug, Default)]
pub struct IdentityStep;

impl IdentityStep {
    fn options(&self) -> Map<String, Value> {
        map(&[("identity.allow_missing_user", json!(true))])
    }

    fn converters(&self) -> Vec<(String, Coercion)> {
        bools(&["identity.enabled", "identity.allow_missing_user"])
    }

    fn prepare(&self, conf: &mut Conf) -> Result<(), ConfigError> {
        if conf.bool_or("identity.enabled", false)? && !conf.has_service("sa_auth.authmetadata") {
            tracing::debug!("identity enabled without metadata provider, identities are not enriched");
        }
        Ok(())
    }
}

wrapper_step!(IdentityStep, "identity", "identity", IdentityApplicationWrapper);

/// Transaction per request with retries.
#[derive(Debug, Default)]
pub struct TransactionStep;

impl TransactionStep {
    fn options(&self) -> Map<String, Value> {
        map(&[("tm.enabled", json!(false)), ("tm.attempts", json!(1))])
    }

    fn converters(&self) -> Vec<(String, Coercion)> {
        vec![
            ("tm.enabled".into(), Coercion::Bool),
            ("tm.attempts".into(), Coercion::Int),
        ]
    }

    fn prepare(&self, _conf: &mut Conf) -> Result<(), ConfigError> {
        Ok(())
    }
}

wrapper_step!(TransactionStep, "tm", "transaction", TransactionApplicationWrapper);

#[cfg(test)]
mod tests {
    use super::super::testing::ctx;
    use super::*;

    #[test]
    fn wrappers_register_late_in_chain_order() {
        let mut cfg = Configurator::new();
        cfg.register(ErrorPageStep, After::Middle).unwrap();
        cfg.register(SessionStep, After::Middle).unwrap();
        cfg.register(CacheStep, After::Middle).unwrap();
        cfg.register(I18nStep, After::Middle).unwrap();
        cfg.register(IdentityStep, After::Middle).unwrap();
        cfg.register(TransactionStep, After::Middle).unwrap();
        assert_eq!(
            cfg.application_wrappers(),
            vec!["errorpage", "session", "cache", "i18n", "identity", "transaction"]
        );
    }

    #[test]
    fn enabled_sessions_get_a_store() {
        let mut conf = Conf::new();
        SessionStep.config_ready(&mut conf, &ctx()).unwrap();
        assert!(!conf.has_service("session.store"));
        conf.set("session.enabled", true);
        SessionStep.config_ready(&mut conf, &ctx()).unwrap();
        assert!(conf.service::<Arc<dyn SessionStore>>("session.store").is_some());
    }

    #[test]
    fn session_timeout_must_be_positive() {
        let mut conf = Conf::new();
        conf.set("session.enabled", true);
        conf.set("session.timeout", -5);
        assert!(matches!(
            SessionStep.config_ready(&mut conf, &ctx()),
            Err(ConfigError::Validation(_))
        ));
        assert!(!conf.has_service("session.store"));
    }

    #[test]
    fn cache_manager_honours_the_default_expiry() {
        let mut conf = Conf::new();
        conf.set("cache.expire", 30);
        CacheStep.config_ready(&mut conf, &ctx()).unwrap();
        assert!(conf.service::<Arc<CacheManager>>("cache.manager").is_some());
    }
}
