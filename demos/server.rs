//! Demo server: a root controller with a JSON index, a session counter and a failing
//! action, built by the full configurator from env (`TG_*`) or a JSON file (`CONFIG_PATH`).

use serde_json::json;
use tokio::net::TcpListener;
use turbine::http::Params;
use turbine::wsgi::{ControllerFactory, ObjectController, Output, RequestContext};
use turbine::{AppError, Configurator, DeploymentConfig};

fn root() -> ObjectController {
    ObjectController::new()
        .index(|_: &mut RequestContext, _: &[String], _: &Params| -> Result<Output, AppError> {
            Ok(Output::data(json!({ "ok": true })))
        })
        .route("counter", |ctx: &mut RequestContext, _: &[String], _: &Params| -> Result<Output, AppError> {
            let session = ctx
                .session
                .clone()
                .ok_or_else(|| AppError::Controller("sessions are disabled".into()))?;
            let count = session.get("count").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
            session.set("count", count);
            session.save();
            Ok(Output::data(json!({ "count": count })))
        })
        .route("fail", |_: &mut RequestContext, _: &[String], _: &Params| -> Result<Output, AppError> {
            Err(AppError::Controller("deliberate failure".into()))
        })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    turbine::logging::init(None)?;

    let deployment = match std::env::var("CONFIG_PATH") {
        Ok(path) => DeploymentConfig::from_json_file(path)?,
        Err(_) => DeploymentConfig::from_env("TG_"),
    };

    let mut configurator = Configurator::full()?;
    configurator.update_blueprint([
        ("session.enabled", json!(true)),
        ("session.secret", json!("change-me")),
    ]);
    configurator.update_blueprint_service("root_controller", ControllerFactory::instance(root()));

    let app = configurator.make_wsgi_app_from(&deployment)?;
    let router = turbine::router(app);

    let addr = std::env::var("BIND").unwrap_or_else(|_| "0.0.0.0:8080".into());
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router).await?;
    configurator.shutdown();
    Ok(())
}
