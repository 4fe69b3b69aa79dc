use std::borrow::Cow;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use url::{Position, Url};

/// A fully rendered request, ready to send.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_json_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Path and query of the request, without the host.
    pub fn endpoint(&self) -> &str {
        &self.url[Position::BeforePath..]
    }
}

/// A response body, parsed as JSON when the server said it was JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    /// Interpret `text` according to the response content type. A body that claims to be JSON
    /// but does not parse is kept as text.
    pub fn parse(text: String, is_json: bool) -> Self {
        if !is_json {
            return Self::Text(text);
        }

        match serde_json::from_str(&text) {
            Ok(value) => Self::Json(value),
            Err(e) => {
                log::debug!("Response declared JSON but did not parse: {e}");
                Self::Text(text)
            }
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    /// The body as a string, for summaries and marker searches.
    pub fn to_text(&self) -> Result<Cow<'_, str>, serde_json::Error> {
        match self {
            Self::Json(value) => serde_json::to_string(value).map(Cow::Owned),
            Self::Text(text) => Ok(Cow::Borrowed(text)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: ResponseBody,
    /// Raw `Set-Cookie` header values, in the order received.
    pub set_cookies: Vec<String>,
    pub elapsed: Duration,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoint_strips_host() {
        let url = Url::parse("http://14.99.126.171/api/method/get_data?key=ls_employees&page=1")
            .unwrap();
        let request = HttpRequest::new(Method::GET, url);

        assert_eq!("/api/method/get_data?key=ls_employees&page=1", request.endpoint());
    }

    #[test]
    fn parse_json_body() {
        let body = ResponseBody::parse(r#"{"message":"Logged In"}"#.to_string(), true);
        assert_eq!(Some(&json!({"message": "Logged In"})), body.as_json());
        assert_eq!(r#"{"message":"Logged In"}"#, body.to_text().unwrap());
    }

    #[test]
    fn invalid_json_is_kept_as_text() {
        let body = ResponseBody::parse("<html>502</html>".to_string(), true);
        assert_eq!(ResponseBody::Text("<html>502</html>".to_string()), body);
    }

    #[test]
    fn text_body_is_not_parsed() {
        let body = ResponseBody::parse("{}".to_string(), false);
        assert!(body.as_json().is_none());
    }
}
