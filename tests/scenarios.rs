//! End-to-end requests through fully configured applications.

use axum::http::StatusCode;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use turbine::db::ScopedSession;
use turbine::http::Params;
use turbine::identity::{Authenticator, Identity, IdentityMetadataProvider, USERID};
use turbine::locals;
use turbine::wsgi::{CollectedResponse, ControllerFactory, ObjectController, Output, RequestContext};
use turbine::{AppError, BoxedApp, Configurator, Environ};

type Handler = fn(&mut RequestContext, &[String], &Params) -> Result<Output, AppError>;

fn build(mut cfg: Configurator, root: ObjectController, options: Value) -> BoxedApp {
    cfg.update_blueprint_service("root_controller", ControllerFactory::instance(root));
    let Value::Object(options) = options else {
        panic!("options must be an object");
    };
    cfg.make_wsgi_app(&options).unwrap()
}

fn get(app: &BoxedApp, path: &str) -> CollectedResponse {
    app.call(&mut Environ::get(path)).unwrap().collect().unwrap()
}

#[test]
fn minimal_application_renders_json() {
    let index: Handler = |_, _, _| Ok(Output::data(json!({"ok": true})));
    let app = build(Configurator::minimal().unwrap(), ObjectController::new().index(index), json!({}));

    let response = get(&app, "/");
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.text(), r#"{"ok": true}"#);
    assert!(response.header("content-type").unwrap().starts_with("application/json"));
    assert_eq!(locals::CONTEXT.depth(), 0);
}

#[test]
fn missing_pages_are_replaced_by_the_error_page() {
    let err: Handler = |_, _, _| Ok(Output::from("not-found"));
    let root = ObjectController::new().route("err", err);
    let app = build(
        Configurator::full().unwrap(),
        root,
        json!({
            "errorpage.enabled": true,
            "errorpage.status_codes": [404],
            "errorpage.path": "/err",
        }),
    );

    let response = get(&app, "/missing");
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.text(), "not-found");
}

#[test]
fn sessions_carry_state_between_requests() {
    let counter: Handler = |ctx, _, _| {
        let session = ctx.session.clone().ok_or_else(|| AppError::Controller("no session".into()))?;
        let n = session.get("n").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
        session.set("n", n);
        Ok(Output::from(n.to_string()))
    };
    let app = build(
        Configurator::full().unwrap(),
        ObjectController::new().index(counter),
        json!({"session.enabled": true, "session.secret": "s3cret"}),
    );

    let first = get(&app, "/");
    assert_eq!(first.text(), "1");
    let cookie = first
        .header("set-cookie")
        .and_then(|c| c.split(';').next())
        .unwrap()
        .to_string();

    let mut seen = Vec::new();
    for _ in 0..2 {
        let mut environ = Environ::get("/").with_header("cookie", &cookie);
        seen.push(app.call(&mut environ).unwrap().collect().unwrap().text());
    }
    assert_eq!(seen, vec!["2", "3"]);
}

#[test]
fn error_pages_keep_the_session_cookie() {
    fn flash(ctx: &RequestContext) -> Result<String, AppError> {
        let session = ctx.session.clone().ok_or_else(|| AppError::Controller("no session".into()))?;
        Ok(session.get("flash").and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default())
    }
    let restricted: Handler = |ctx, _, _| {
        let session = ctx.session.clone().ok_or_else(|| AppError::Controller("no session".into()))?;
        session.set("flash", "gone");
        Err(AppError::http(StatusCode::NOT_FOUND, "no such item"))
    };
    let err: Handler = |ctx, _, _| Ok(Output::from(format!("not-found: {}", flash(ctx)?)));
    let index: Handler = |ctx, _, _| Ok(Output::from(flash(ctx)?));
    let app = build(
        Configurator::full().unwrap(),
        ObjectController::new().index(index).route("restricted", restricted).route("err", err),
        json!({
            "session.enabled": true,
            "session.secret": "s3cret",
            "errorpage.enabled": true,
            "errorpage.status_codes": [404],
            "errorpage.path": "/err",
        }),
    );

    let page = get(&app, "/restricted");
    assert_eq!(page.status, StatusCode::NOT_FOUND);
    assert_eq!(page.text(), "not-found: gone");
    let cookie = page
        .header("set-cookie")
        .and_then(|c| c.split(';').next())
        .unwrap()
        .to_string();

    let mut environ = Environ::get("/").with_header("cookie", &cookie);
    assert_eq!(app.call(&mut environ).unwrap().collect().unwrap().text(), "gone");
}

struct Alice;

impl Authenticator for Alice {
    fn identify(&self, _environ: &Environ) -> Option<Identity> {
        let mut identity = Identity::new();
        identity.insert(USERID.into(), json!("alice"));
        Some(identity)
    }
}

struct Directory {
    known: bool,
}

impl IdentityMetadataProvider for Directory {
    fn get_user(&self, _identity: &Identity, userid: &str) -> Option<Value> {
        self.known.then(|| json!({"name": userid}))
    }

    fn get_groups(&self, _identity: &Identity, _userid: &str) -> Vec<String> {
        vec!["g".into()]
    }

    fn get_permissions(&self, _identity: &Identity, _userid: &str) -> Vec<String> {
        vec!["p".into()]
    }
}

fn identity_app(known: bool, allow_missing_user: bool) -> BoxedApp {
    let whoami: Handler = |ctx, _, _| Ok(Output::data(Value::Object(ctx.request.identity().unwrap_or_default())));
    let mut cfg = Configurator::full().unwrap();
    let authenticator: Arc<dyn Authenticator> = Arc::new(Alice);
    let provider: Arc<dyn IdentityMetadataProvider> = Arc::new(Directory { known });
    cfg.update_blueprint_service("sa_auth.authenticator", authenticator);
    cfg.update_blueprint_service("sa_auth.authmetadata", provider);
    build(
        cfg,
        ObjectController::new().index(whoami),
        json!({"auth_backend": "custom", "identity.allow_missing_user": allow_missing_user}),
    )
}

#[test]
fn identities_are_enriched_with_metadata() {
    let response = get(&identity_app(true, true), "/");
    let identity: Map<String, Value> = serde_json::from_str(&response.text()).unwrap();
    assert_eq!(identity[USERID], json!("alice"));
    assert_eq!(identity["user"], json!({"name": "alice"}));
    assert_eq!(identity["groups"], json!(["g"]));
    assert_eq!(identity["permissions"], json!(["p"]));
}

#[test]
fn unknown_users_lose_their_identity() {
    let response = get(&identity_app(false, false), "/");
    assert_eq!(response.text(), "{}");
}

#[test]
fn balanced_sessions_read_from_slaves_and_flush_to_master() {
    fn session(ctx: &RequestContext) -> Result<ScopedSession, AppError> {
        ctx.config
            .service::<ScopedSession>("DBSession")
            .ok_or_else(|| AppError::Controller("no DBSession".into()))
    }
    let read: Handler = |ctx, _, _| {
        let bind = session(ctx)?.current().lock().get_bind();
        Ok(Output::from(bind.url().to_string()))
    };
    let write: Handler = |ctx, _, _| {
        let bind = session(ctx)?.current().lock().flush();
        Ok(Output::from(bind.url().to_string()))
    };
    let app = build(
        Configurator::full().unwrap(),
        ObjectController::new().route("read", read).route("write", write),
        json!({
            "use_sqlalchemy": true,
            "sqlalchemy.master.url": "postgres://master/app",
            "sqlalchemy.slaves.s1.url": "postgres://s1/app",
        }),
    );

    assert_eq!(get(&app, "/read").text(), "postgres://s1/app");
    assert_eq!(get(&app, "/write").text(), "postgres://master/app");
}

#[test]
fn debug_mode_preserves_frames_until_the_next_request() {
    let index: Handler = |_, _, _| Ok(Output::from("fine"));
    let fail: Handler = |_, _, _| Err(AppError::Controller("exploded".into()));
    let app = build(
        Configurator::full().unwrap(),
        ObjectController::new().index(index).route("fail", fail),
        json!({"debug": true}),
    );

    let page = get(&app, "/fail");
    assert_eq!(page.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(page.text().contains("exploded"));
    assert_eq!(locals::CONTEXT.depth(), 1);
    assert!(locals::CONTEXT.is_preserved());

    assert_eq!(get(&app, "/").text(), "fine");
    assert_eq!(locals::CONTEXT.depth(), 0);
}
