use crate::config::{Coercion, Conf};
use crate::configurator::{BuildContext, ConfigurationStep, Configurator, Milestones};
use crate::error::{ConfigError, RegistrationError};
use crate::globals::AppGlobals;
use crate::render::{JsonRenderer, Renderer, RendererFactory, Renderers, TextRenderer};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::any::Any;
use std::sync::{Arc, OnceLock};

/// Turns the `renderers` names into active renderers, published as `render_functions`.
pub struct RenderingStep {
    engines: RwLock<Vec<(String, RendererFactory)>>,
    milestones: OnceLock<Arc<Milestones>>,
}

impl Default for RenderingStep {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderingStep {
    /// Knows the `json` and `text` engines.
    pub fn new() -> Self {
        let step = RenderingStep {
            engines: RwLock::new(Vec::new()),
            milestones: OnceLock::new(),
        };
        step.register_engine("json", Arc::new(json_factory));
        step.register_engine("text", Arc::new(text_factory));
        step
    }

    /// A later registration under the same name replaces the factory.
    pub fn register_engine(&self, name: &str, factory: RendererFactory) {
        if self.milestones.get().is_some_and(|m| m.renderers_ready.is_reached()) {
            tracing::warn!(engine = name, "rendering engine registered after renderers_ready");
        }
        let mut engines = self.engines.write();
        match engines.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = factory,
            None => engines.push((name.to_string(), factory)),
        }
    }

    pub fn engine_names(&self) -> Vec<String> {
        self.engines.read().iter().map(|(n, _)| n.clone()).collect()
    }

    fn factory(&self, name: &str) -> Option<RendererFactory> {
        self.engines.read().iter().find(|(n, _)| n == name).map(|(_, f)| f.clone())
    }
}

fn json_factory(_conf: &Conf) -> Result<Option<Arc<dyn Renderer>>, ConfigError> {
    Ok(Some(Arc::new(JsonRenderer)))
}

fn text_factory(conf: &Conf) -> Result<Option<Arc<dyn Renderer>>, ConfigError> {
    let Some(globals) = conf.service::<Arc<AppGlobals>>("tg.app_globals") else {
        return Ok(None);
    };
    let auto_reload = conf.bool_or("auto_reload_templates", false)?;
    Ok(Some(Arc::new(TextRenderer::new(globals, auto_reload))))
}

impl ConfigurationStep for RenderingStep {
    fn id(&self) -> &str {
        "rendering"
    }

    fn defaults(&self) -> Map<String, Value> {
        let mut defaults = Map::new();
        defaults.insert("renderers".into(), json!(["json"]));
        defaults.insert("default_renderer".into(), json!("json"));
        defaults.insert("auto_reload_templates".into(), json!(false));
        defaults
    }

    fn coercions(&self) -> Vec<(String, Coercion)> {
        vec![
            ("renderers".into(), Coercion::list()),
            ("auto_reload_templates".into(), Coercion::Bool),
        ]
    }

    fn on_bind(&self, configurator: &mut Configurator) -> Result<(), RegistrationError> {
        let _ = self.milestones.set(configurator.milestones().clone());
        Ok(())
    }

    fn config_ready(&self, conf: &mut Conf, ctx: &BuildContext) -> Result<(), ConfigError> {
        let mut active: Vec<(String, Arc<dyn Renderer>)> = Vec::new();
        for name in conf.list("renderers")? {
            let factory = self
                .factory(&name)
                .ok_or_else(|| ConfigError::UnknownRenderer(name.clone()))?;
            match factory(conf)? {
                Some(renderer) => {
                    if !active.iter().any(|(n, _)| *n == name) {
                        active.push((name, renderer));
                    }
                }
                None => tracing::warn!(renderer = %name, "renderer unavailable, removed from the active list"),
            }
        }

        let requested = conf.get_str("default_renderer").map(str::to_string);
        let default = match requested {
            Some(name) if active.iter().any(|(n, _)| *n == name) => Some(name),
            other => {
                let fallback = active.first().map(|(n, _)| n.clone());
                if other.is_some() {
                    tracing::warn!(requested = ?other, fallback = ?fallback, "default renderer is not active");
                }
                fallback
            }
        };

        let names: Vec<&str> = active.iter().map(|(n, _)| n.as_str()).collect();
        conf.set("renderers", json!(names));
        match &default {
            Some(name) => conf.set("default_renderer", name.as_str()),
            None => conf.set("default_renderer", Value::Null),
        }
        tracing::debug!(renderers = ?names, default = ?default, "renderers ready");
        conf.set_service("render_functions", Arc::new(Renderers::new(active, default)));
        ctx.milestones.renderers_ready.reach();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::ctx;
    use super::*;

    fn conf(renderers: Value, default: &str) -> Conf {
        let mut conf = Conf::new();
        conf.set("renderers", renderers);
        conf.set("default_renderer", default);
        conf
    }

    #[test]
    fn unavailable_renderers_drop_out_and_default_falls_back() {
        let step = RenderingStep::new();
        let mut conf = conf(json!(["text", "json"]), "text");
        let ctx = ctx();
        step.config_ready(&mut conf, &ctx).unwrap();
        let renderers = conf.service::<Arc<Renderers>>("render_functions").unwrap();
        assert_eq!(renderers.names(), vec!["json"]);
        assert_eq!(renderers.default_name(), Some("json"));
        assert_eq!(conf.get_str("default_renderer"), Some("json"));
        assert!(ctx.milestones.renderers_ready.is_reached());
    }

    #[test]
    fn unknown_renderers_fail() {
        let mut conf = conf(json!(["genshi"]), "genshi");
        assert!(matches!(
            RenderingStep::new().config_ready(&mut conf, &ctx()),
            Err(ConfigError::UnknownRenderer(name)) if name == "genshi"
        ));
    }

    #[test]
    fn registered_engines_are_available() {
        struct Upper;
        impl Renderer for Upper {
            fn content_type(&self) -> &str {
                "text/plain"
            }

            fn render(
                &self,
                template: &str,
                _vars: &Map<String, Value>,
                _cache: &crate::render::CacheOptions,
            ) -> Result<String, crate::error::AppError> {
                Ok(template.to_uppercase())
            }
        }

        let step = RenderingStep::new();
        fn upper(_conf: &Conf) -> Result<Option<Arc<dyn Renderer>>, ConfigError> {
            Ok(Some(Arc::new(Upper)))
        }
        step.register_engine("upper", Arc::new(upper));
        assert_eq!(step.engine_names(), vec!["json", "text", "upper"]);
        let mut conf = conf(json!(["upper"]), "upper");
        step.config_ready(&mut conf, &ctx()).unwrap();
        let renderers = conf.service::<Arc<Renderers>>("render_functions").unwrap();
        let (name, renderer) = renderers.resolve(None).unwrap();
        assert_eq!(name, "upper");
        assert_eq!(renderer.render("hi", &Map::new(), &Default::default()).unwrap(), "HI");
    }
}
