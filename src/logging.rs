use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "turbine=info";

/// Install the global fmt subscriber. `RUST_LOG` directives are honoured and
/// `default` (or `turbine=info`) is added on top of them.
pub fn init(default: Option<&str>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let directive = default.unwrap_or(DEFAULT_FILTER).parse()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .try_init()
}
