use std::collections::BTreeMap;

use serde_json::{Map, Value};
use stampede_core::prelude::Credential;
use stampede_http_client::prelude::CookieJar;

/// Everything one virtual user knows. Only its own session reads or writes it.
///
/// Built in placeholders are `identifier`, `secret`, `role` and `session_id`. Values extracted
/// from responses are looked up by their key.
#[derive(Debug, Default)]
pub struct SessionState {
    session_id: String,
    credential: Option<Credential>,
    role: Option<String>,
    cookies: CookieJar,
    values: BTreeMap<String, String>,
    authenticated: bool,
}

impl SessionState {
    pub fn new(session_id: &str, credential: Option<Credential>, role: Option<String>) -> Self {
        Self {
            session_id: session_id.to_string(),
            credential,
            role,
            ..Default::default()
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn identifier(&self) -> Option<&str> {
        self.credential.as_ref().map(Credential::identifier)
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set_value(&mut self, key: &str, value: String) {
        self.values.insert(key.to_string(), value);
    }

    pub fn remove_value(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub(crate) fn set_authenticated(&mut self) {
        self.authenticated = true;
    }

    /// Drop cookies and extracted values once the session is over.
    pub(crate) fn release(&mut self) {
        self.cookies.clear();
        self.values.clear();
        self.authenticated = false;
    }

    /// The values request templates are rendered against. Built ins win over extracted values
    /// with the same key. Unset values are left out so that using them fails the render.
    pub fn template_data(&self) -> Value {
        let mut data = self
            .values
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect::<Map<_, _>>();

        data.insert(
            "session_id".to_string(),
            Value::String(self.session_id.clone()),
        );
        if let Some(credential) = &self.credential {
            data.insert(
                "identifier".to_string(),
                Value::String(credential.identifier().to_string()),
            );
            data.insert(
                "secret".to_string(),
                Value::String(credential.secret().to_string()),
            );
        }
        if let Some(role) = &self.role {
            data.insert("role".to_string(), Value::String(role.clone()));
        }

        Value::Object(data)
    }
}
