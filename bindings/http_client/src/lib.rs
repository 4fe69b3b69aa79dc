mod client;
mod cookies;
mod error;
mod request;

pub mod prelude {
    pub use crate::client::{HttpClient, Transport, DEFAULT_REQUEST_TIMEOUT};
    pub use crate::cookies::CookieJar;
    pub use crate::error::TransportError;
    pub use crate::request::{HttpRequest, HttpResponse, ResponseBody};

    // Re-exported so scenarios don't need their own reqwest/url dependency to describe requests.
    pub use reqwest::Method;
    pub use url::Url;
}
