use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use url::Url;

/// Cookies received by one virtual user.
///
/// Backed by reqwest's cookie store, so `Domain`, `Path`, `Max-Age` and `Expires` are honoured
/// when deciding what to send.
#[derive(Debug, Default)]
pub struct CookieJar {
    jar: Jar,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the `Set-Cookie` values of a response to `url`.
    pub fn store_set_cookies<'a>(&self, headers: impl IntoIterator<Item = &'a String>, url: &Url) {
        let values = headers
            .into_iter()
            .filter_map(|header| match HeaderValue::from_str(header) {
                Ok(value) => Some(value),
                Err(_) => {
                    log::trace!("Ignoring unreadable Set-Cookie header: {header}");
                    None
                }
            })
            .collect::<Vec<_>>();

        self.jar.set_cookies(&mut values.iter(), url);
    }

    /// The value for a `Cookie` header on a request to `url`, if there is anything to send.
    pub fn header_value(&self, url: &Url) -> Option<String> {
        self.jar
            .cookies(url)
            .and_then(|value| value.to_str().ok().map(str::to_string))
    }

    pub fn clear(&mut self) {
        self.jar = Jar::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn login_url() -> Url {
        Url::parse("http://erp.local/api/method/login").unwrap()
    }

    fn set_cookies(headers: &[&str]) -> Vec<String> {
        headers.iter().map(|h| h.to_string()).collect()
    }

    #[test]
    fn sends_stored_cookies_back() {
        let jar = CookieJar::new();
        jar.store_set_cookies(
            &set_cookies(&[
                "sid=abc123; Expires=Thu, 01 Jan 2099 00:00:00 GMT; Path=/; HttpOnly",
                "user_id=emp1%40erp.in; Path=/",
            ]),
            &login_url(),
        );

        let header = jar
            .header_value(&Url::parse("http://erp.local/api/resource/Visitor").unwrap())
            .unwrap();
        let mut pairs = header.split("; ").collect::<Vec<_>>();
        pairs.sort();
        assert_eq!(vec!["sid=abc123", "user_id=emp1%40erp.in"], pairs);
    }

    #[test]
    fn expired_cookies_are_dropped() {
        let jar = CookieJar::new();
        let url = login_url();

        jar.store_set_cookies(&set_cookies(&["sid=abc123; Path=/"]), &url);
        assert_eq!(Some("sid=abc123".to_string()), jar.header_value(&url));

        jar.store_set_cookies(
            &set_cookies(&[
                "sid=deleted; Max-Age=0; Path=/",
                "full_name=Bob; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
            ]),
            &url,
        );

        assert_eq!(None, jar.header_value(&url));
    }

    #[test]
    fn cookies_stay_with_their_host() {
        let jar = CookieJar::new();
        jar.store_set_cookies(&set_cookies(&["sid=abc123; Path=/"]), &login_url());

        assert_eq!(
            None,
            jar.header_value(&Url::parse("http://reports.local/").unwrap())
        );
    }

    #[test]
    fn clear_forgets_everything() {
        let mut jar = CookieJar::new();
        let url = login_url();
        jar.store_set_cookies(&set_cookies(&["sid=abc123; Path=/"]), &url);

        jar.clear();

        assert_eq!(None, jar.header_value(&url));
    }
}
