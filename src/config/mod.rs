pub mod blueprint;
pub mod coerce;
pub mod conf;
pub mod loader;
pub mod validator;

pub use blueprint::BlueprintView;
pub use coerce::{aslist, asbool, asint, aslogger, astemplate, Coercion, Logger, Template};
pub use conf::{Conf, Service};
pub use loader::DeploymentConfig;
pub use validator::validate;
