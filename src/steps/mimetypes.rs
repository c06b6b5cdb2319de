use crate::config::Conf;
use crate::configurator::{BuildContext, ConfigurationStep};
use crate::error::ConfigError;
use crate::mime::MimeDatabase;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;

/// Builds the MIME database shared as the `mimetypes` service.
///
/// `mimetypes.lookup` maps extensions to content types and overrides the builtin table.
#[derive(Debug, Default)]
pub struct MimeTypesStep;

impl ConfigurationStep for MimeTypesStep {
    fn id(&self) -> &str {
        "mimetypes"
    }

    fn before_config(&self, conf: &mut Conf, _ctx: &BuildContext) -> Result<(), ConfigError> {
        let mut db = MimeDatabase::new();
        db.add_type(".json", "application/json");
        db.add_type(".js", "application/javascript");

        match conf.get("mimetypes.lookup") {
            None | Some(Value::Null) => {}
            Some(Value::Object(lookup)) => {
                for (ext, content_type) in lookup {
                    let Some(content_type) = content_type.as_str() else {
                        return Err(ConfigError::Validation(format!(
                            "mimetypes.lookup: content type of {ext} must be a string"
                        )));
                    };
                    db.add_type(ext, content_type);
                }
            }
            Some(other) => {
                return Err(ConfigError::Validation(format!(
                    "mimetypes.lookup must map extensions to content types, got {other}"
                )))
            }
        }
        conf.set_service("mimetypes", Arc::new(db));
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
