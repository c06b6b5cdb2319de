//! Process-wide names for the objects of the request being served on this thread.

use super::StackedObjectProxy;
use crate::cache::CacheManager;
use crate::config::Conf;
use crate::globals::AppGlobals;
use crate::http::{Request, Response};
use crate::i18n::Translator;
use crate::session::Session;
use crate::wsgi::context::{RequestContext, TemplateContext, UrlGenerator};
use parking_lot::Mutex;

pub static CONTEXT: StackedObjectProxy<RequestContext> = StackedObjectProxy::new("context");
pub static REQUEST: StackedObjectProxy<Request> = StackedObjectProxy::new("request");
pub static RESPONSE: StackedObjectProxy<Mutex<Response>> = StackedObjectProxy::new("response");
pub static TMPL_CONTEXT: StackedObjectProxy<TemplateContext> = StackedObjectProxy::new("tmpl_context");
pub static APP_GLOBALS: StackedObjectProxy<AppGlobals> = StackedObjectProxy::new("app_globals");
pub static CONFIG: StackedObjectProxy<Conf> = StackedObjectProxy::new("config");
pub static TRANSLATOR: StackedObjectProxy<Translator> = StackedObjectProxy::with_default("translator", Translator::null);
pub static SESSION: StackedObjectProxy<Session> = StackedObjectProxy::new("session");
pub static CACHE: StackedObjectProxy<CacheManager> = StackedObjectProxy::new("cache");
pub static URL: StackedObjectProxy<UrlGenerator> = StackedObjectProxy::new("url");

/// True while a request is being served on this thread.
pub fn in_request() -> bool {
    CONTEXT.is_bound()
}
