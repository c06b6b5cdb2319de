use super::{ApplicationWrapper, Handler, RequestHandler};
use crate::config::Conf;
use crate::error::{AppError, ConfigError};
use crate::http::Response;
use crate::wsgi::{keys, ControllerFactory, ControllerHandle, Environ, RequestContext};
use axum::http::{Method, StatusCode};

/// Headers of a trapped response that still reach the client through the error page.
const CARRIED_HEADERS: [&str; 2] = ["set-cookie", "www-authenticate"];

/// Replays error responses through the error controller path.
///
/// A trapped response (status and content type both configured) is answered by a
/// second pass through the inner chain with `PATH_INFO` set to `errorpage.path`.
/// The second pass runs on a rebuilt context and keeps the original status, cookies
/// and authentication challenges.
pub struct ErrorPageApplicationWrapper {
    next: Handler,
    enabled: bool,
    status_codes: Vec<u16>,
    content_types: Vec<String>,
    path: String,
    handle_exceptions: bool,
    root: Option<ControllerFactory>,
}

impl ErrorPageApplicationWrapper {
    pub fn new(next: Handler, conf: &Conf) -> Result<Self, ConfigError> {
        let status_codes = if conf.is_set("errorpage.status_codes") {
            conf.list("errorpage.status_codes")?
                .iter()
                .map(|code| {
                    code.parse::<u16>().map_err(|e| ConfigError::Coercion {
                        key: "errorpage.status_codes".into(),
                        value: code.clone(),
                        reason: e.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?
        } else if conf.is_set("auth_backend") {
            vec![403, 404]
        } else {
            vec![401, 403, 404]
        };
        let content_types = if conf.is_set("errorpage.content_types") {
            conf.list("errorpage.content_types")?
        } else {
            vec!["text/html".to_string(), String::new()]
        };
        let debug = conf.bool_or("debug", false)?;
        Ok(ErrorPageApplicationWrapper {
            next,
            enabled: conf.bool_or("errorpage.enabled", false)?,
            status_codes,
            content_types,
            path: conf.str_or("errorpage.path", "/error/document"),
            handle_exceptions: conf.bool_or("errorpage.handle_exceptions", !debug)?,
            root: conf.service::<ControllerFactory>("tg.root_controller"),
        })
    }

    fn traps(&self, response: &Response) -> bool {
        let content_type = response.content_type_base().unwrap_or("");
        self.status_codes.contains(&response.status.as_u16())
            && self.content_types.iter().any(|ct| ct == content_type)
    }
}

impl RequestHandler for ErrorPageApplicationWrapper {
    fn handle(
        &self,
        controller: &ControllerHandle,
        environ: &mut Environ,
        context: &mut RequestContext,
    ) -> Result<Response, AppError> {
        let (response, error) = match self.next.handle(controller, environ, context) {
            Ok(response) => (response, None),
            Err(e) if self.handle_exceptions => {
                tracing::error!(error = %e, path = %environ.path_info, "request failed, rendering error page");
                let mut response = context.response.lock().clone();
                response.status = StatusCode::INTERNAL_SERVER_ERROR;
                response.set_content_type("text/html");
                (response, Some(e))
            }
            Err(e) => return Err(e),
        };

        if environ.flag(keys::STATUS_CODE_REDIRECT) {
            return Ok(response);
        }
        if error.is_none() && !self.traps(&response) {
            return Ok(response);
        }

        let status = response.status;
        let carried: Vec<(String, String)> = response
            .headers
            .iter()
            .filter(|(name, _)| CARRIED_HEADERS.iter().any(|c| name.eq_ignore_ascii_case(c)))
            .cloned()
            .collect();
        tracing::debug!(%status, path = %self.path, "rewriting to error page");
        environ.set_var_arc(keys::ORIGINAL_REQUEST, context.request.clone());
        environ.set_var(keys::ORIGINAL_RESPONSE, response);
        if let Some(e) = &error {
            environ.set_var(keys::ORIGINAL_ERROR, e.to_string());
        }

        let saved = (
            std::mem::replace(&mut environ.path_info, self.path.clone()),
            std::mem::take(&mut environ.query_string),
            std::mem::replace(&mut environ.method, Method::GET),
        );
        environ.remove_var(keys::ROUTING_ARGS);
        context.rebuild(environ)?;

        let error_controller = match &self.root {
            Some(root) => ControllerHandle::new("root", root.instantiate()),
            None => controller.clone(),
        };
        let result = self.next.handle(&error_controller, environ, context);
        (environ.path_info, environ.query_string, environ.method) = saved;

        let mut page = result?;
        page.status = status;
        carry_over(&mut page, carried);
        Ok(page)
    }
}

/// Add the trapped response's headers the page does not set itself.
fn carry_over(page: &mut Response, carried: Vec<(String, String)>) {
    for (name, value) in carried {
        let shadowed = if name.eq_ignore_ascii_case("set-cookie") {
            let cookie = cookie_name(&value);
            page.headers
                .iter()
                .any(|(n, v)| n.eq_ignore_ascii_case("set-cookie") && cookie_name(v) == cookie)
        } else {
            page.header(&name).is_some()
        };
        if !shadowed {
            page.add_header(&name, value);
        }
    }
}

fn cookie_name(set_cookie: &str) -> &str {
    set_cookie.split(['=', ';']).next().unwrap_or_default().trim()
}

impl ApplicationWrapper for ErrorPageApplicationWrapper {
    fn name(&self) -> &str {
        "errorpage"
    }

    fn injected(&self) -> bool {
        self.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::http::SetCookie;

    fn conf() -> Conf {
        let mut conf = Conf::new();
        conf.set("errorpage.enabled", true);
        conf.set("errorpage.status_codes", serde_json::json!([404]));
        conf.set("errorpage.path", "/err");
        conf
    }

    /// `/err` answers "not-found"; every other path is a 404 page; `/boom` fails.
    fn app() -> Handler {
        handler(|_, environ, ctx| {
            if environ.path_info == "/err" {
                let original = environ
                    .var::<Response>(keys::ORIGINAL_RESPONSE)
                    .map(|r| r.status.as_u16())
                    .unwrap_or(0);
                return Ok(text(&format!("not-found ({original}) {}", ctx.request.path_info)));
            }
            if environ.path_info == "/boom" {
                return Err(AppError::Controller("boom".into()));
            }
            let mut response = text("missing");
            if environ.path_info == "/login" {
                response.set_cookie(&SetCookie::new("flash", "please log in"));
                response.add_header("WWW-Authenticate", "Basic realm=\"shop\"");
            }
            response.status = StatusCode::NOT_FOUND;
            response.set_content_type("text/html");
            Ok(response)
        })
    }

    fn run(conf: Conf, mut environ: Environ) -> (Result<Response, AppError>, Environ) {
        let wrapper = ErrorPageApplicationWrapper::new(app(), &conf).unwrap();
        let mut ctx = context(conf, &environ);
        let result = wrapper.handle(&controller(), &mut environ, &mut ctx);
        (result, environ)
    }

    #[test]
    fn trapped_statuses_render_the_error_page() {
        let (result, environ) = run(conf(), Environ::get("/missing?x=1"));
        let response = result.unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.text(), "not-found (404) /err");
        assert_eq!(environ.path_info, "/missing");
        assert_eq!(environ.query_string, "x=1");
        assert!(environ.has_var(keys::ORIGINAL_REQUEST));
    }

    #[test]
    fn status_code_redirect_flag_suppresses_rewriting() {
        let mut environ = Environ::get("/missing");
        environ.set_var(keys::STATUS_CODE_REDIRECT, true);
        let (result, _) = run(conf(), environ);
        assert_eq!(result.unwrap().text(), "missing");
    }

    #[test]
    fn other_content_types_pass_through() {
        let mut conf = conf();
        conf.set("errorpage.content_types", serde_json::json!(["application/json"]));
        let (result, environ) = run(conf, Environ::get("/missing"));
        assert_eq!(result.unwrap().text(), "missing");
        assert!(!environ.has_var(keys::ORIGINAL_RESPONSE));
    }

    #[test]
    fn exceptions_become_500_error_pages() {
        let (result, environ) = run(conf(), Environ::get("/boom"));
        let response = result.unwrap();
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.text().starts_with("not-found (500)"));
        assert_eq!(environ.var::<String>(keys::ORIGINAL_ERROR).as_deref().map(String::as_str), Some("boom"));
    }

    #[test]
    fn exceptions_propagate_when_not_handled() {
        let mut conf = conf();
        conf.set("errorpage.handle_exceptions", false);
        let (result, _) = run(conf, Environ::get("/boom"));
        assert!(result.is_err());
    }

    #[test]
    fn defaults_trap_401_without_auth() {
        let mut conf = Conf::new();
        conf.set("errorpage.enabled", true);
        let without_auth = ErrorPageApplicationWrapper::new(app(), &conf).unwrap();
        assert_eq!(without_auth.status_codes, vec![401, 403, 404]);
        conf.set("auth_backend", "sqlalchemy");
        let with_auth = ErrorPageApplicationWrapper::new(app(), &conf).unwrap();
        assert_eq!(with_auth.status_codes, vec![403, 404]);
    }

    #[test]
    fn error_pages_keep_cookies_and_challenges() {
        let (result, _) = run(conf(), Environ::get("/login"));
        let response = result.unwrap();
        assert_eq!(response.text(), "not-found (404) /err");
        assert!(response.header("set-cookie").unwrap().starts_with("flash="));
        assert_eq!(response.header("www-authenticate"), Some("Basic realm=\"shop\""));
    }

    #[test]
    fn page_cookies_win_over_carried_ones() {
        let mut page = text("page");
        page.set_cookie(&SetCookie::new("flash", "from page"));
        carry_over(
            &mut page,
            vec![
                ("Set-Cookie".into(), "flash=old; Path=/".into()),
                ("Set-Cookie".into(), "sid=abc; Path=/".into()),
            ],
        );
        let cookies: Vec<&str> = page
            .headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case("set-cookie"))
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].starts_with("flash=from page"));
        assert!(cookies[1].starts_with("sid=abc"));
    }
}
