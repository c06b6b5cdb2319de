//! Typed request/response objects seen by wrappers and controllers.

pub mod cookies;
pub mod params;
pub mod request;
pub mod response;

pub use cookies::{parse_cookie_header, SetCookie};
pub use params::{DecodeErrors, Params};
pub use request::{Request, RequestOptions};
pub use response::{Response, ResponseOptions};
