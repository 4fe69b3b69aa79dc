use std::sync::Arc;

use serde_json::Value;
use stampede_http_client::prelude::{HttpRequest, HttpResponse, Method, ResponseBody, Url};

use crate::template::{MissingValue, TemplateEngine, TemplateError};

/// Reasons a task could not be turned into a request.
#[derive(derive_more::Error, derive_more::Display, Debug)]
pub enum RenderError {
    #[display("{_0}")]
    Missing(MissingValue),
    #[display("{_0}")]
    Template(TemplateError),
    #[display("invalid request path `{path}`: {source}")]
    InvalidUrl {
        path: String,
        source: url::ParseError,
    },
}

impl From<TemplateError> for RenderError {
    fn from(value: TemplateError) -> Self {
        match value {
            TemplateError::Missing(missing) => Self::Missing(missing),
            other => Self::Template(other),
        }
    }
}

/// The HTTP request a task sends, with `{{placeholder}}` slots filled from the session.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<Value>,
}

impl RequestTemplate {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_json_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn render(
        &self,
        base: &Url,
        templates: &TemplateEngine,
        data: &Value,
    ) -> Result<HttpRequest, RenderError> {
        let path = templates.render(&self.path, data)?;
        let mut url = base.join(&path).map_err(|source| RenderError::InvalidUrl {
            path: path.clone(),
            source,
        })?;

        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &self.query {
                pairs.append_pair(name, &templates.render(value, data)?);
            }
        }

        let mut request = HttpRequest::new(self.method.clone(), url);
        for (name, value) in &self.headers {
            request = request.with_header(name, templates.render(value, data)?);
        }
        if let Some(body) = &self.body {
            request = request.with_json_body(templates.render_json(body, data)?);
        }

        Ok(request)
    }

    fn validate_templates(&self) -> Result<(), TemplateError> {
        TemplateEngine::validate(&self.path)?;
        for (_, value) in self.query.iter().chain(&self.headers) {
            TemplateEngine::validate(value)?;
        }
        match &self.body {
            Some(body) => TemplateEngine::validate_json(body),
            None => Ok(()),
        }
    }
}

/// Decides whether a response counts as a success.
#[derive(Debug, Clone, PartialEq)]
pub enum SuccessPredicate {
    /// Any 2xx status.
    Status2xx,
    /// One of the listed status codes.
    StatusIn(Vec<u16>),
    /// A 2xx JSON response with `expected` at the JSON pointer `pointer`.
    JsonFieldEquals { pointer: String, expected: Value },
}

impl SuccessPredicate {
    pub fn json_field_equals(pointer: impl Into<String>, expected: impl Into<Value>) -> Self {
        Self::JsonFieldEquals {
            pointer: pointer.into(),
            expected: expected.into(),
        }
    }

    pub fn evaluate(&self, response: &HttpResponse) -> bool {
        match self {
            Self::Status2xx => response.is_success(),
            Self::StatusIn(codes) => codes.contains(&response.status),
            Self::JsonFieldEquals { pointer, expected } => {
                response.is_success()
                    && response
                        .body
                        .as_json()
                        .and_then(|body| body.pointer(pointer))
                        .is_some_and(|value| value == expected)
            }
        }
    }
}

/// Copies a value out of a successful JSON response into the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub key: String,
    pub pointer: String,
}

impl Extraction {
    /// Strings are stored as is, numbers and booleans in their JSON form. Anything else is
    /// treated as absent.
    pub fn apply(&self, body: &ResponseBody) -> Option<String> {
        match body.as_json()?.pointer(&self.pointer)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// One named unit of user behaviour.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    name: String,
    weight: u32,
    request: RequestTemplate,
    success: SuccessPredicate,
    extractions: Vec<Extraction>,
    consumes: Vec<String>,
}

impl TaskDefinition {
    /// The name may contain placeholders, for example `"{{identifier}}{{role}}- Onboarding"`.
    pub fn new(name: impl Into<String>, request: RequestTemplate) -> Self {
        Self {
            name: name.into(),
            weight: 1,
            request,
            success: SuccessPredicate::Status2xx,
            extractions: Vec::new(),
            consumes: Vec::new(),
        }
    }

    /// Relative selection weight in a weighted task set. Ignored in a sequence.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_success(mut self, success: SuccessPredicate) -> Self {
        self.success = success;
        self
    }

    /// After a successful response, store the value at `pointer` under `key`. The key is
    /// cleared when a successful response does not carry the value.
    pub fn extract(mut self, key: impl Into<String>, pointer: impl Into<String>) -> Self {
        self.extractions.push(Extraction {
            key: key.into(),
            pointer: pointer.into(),
        });
        self
    }

    /// Clear `key` from the session once this task succeeds, so the value is used only once.
    pub fn consumes(mut self, key: impl Into<String>) -> Self {
        self.consumes.push(key.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn request(&self) -> &RequestTemplate {
        &self.request
    }

    pub fn success(&self) -> &SuccessPredicate {
        &self.success
    }

    pub fn extractions(&self) -> &[Extraction] {
        &self.extractions
    }

    pub fn consumed_keys(&self) -> &[String] {
        &self.consumes
    }

    /// Only idempotent requests are retried. Anything else is sent at most once per tick.
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self.request.method,
            Method::GET | Method::HEAD | Method::OPTIONS
        )
    }

    /// The task name as it appears in results. Falls back to the raw name if a placeholder
    /// cannot be filled.
    pub(crate) fn display_name(&self, templates: &TemplateEngine, data: &Value) -> String {
        templates
            .render(&self.name, data)
            .unwrap_or_else(|_| self.name.clone())
    }

    pub(crate) fn validate_templates(&self) -> anyhow::Result<()> {
        TemplateEngine::validate(&self.name)
            .and_then(|_| self.request.validate_templates())
            .map_err(|e| anyhow::anyhow!("Task [{}] has a broken template: {e}", self.name))
    }
}

/// The tasks of a user type and how they are chosen.
#[derive(Debug, Clone)]
pub enum TaskList {
    /// Each tick picks a task at random, in proportion to its weight.
    WeightedSet(Vec<Arc<TaskDefinition>>),
    /// Tasks run in declared order, wrapping back to the first.
    Sequence(Vec<Arc<TaskDefinition>>),
}

impl TaskList {
    pub fn weighted(tasks: impl IntoIterator<Item = TaskDefinition>) -> Self {
        Self::WeightedSet(tasks.into_iter().map(Arc::new).collect())
    }

    pub fn sequence(tasks: impl IntoIterator<Item = TaskDefinition>) -> Self {
        Self::Sequence(tasks.into_iter().map(Arc::new).collect())
    }

    pub fn tasks(&self) -> &[Arc<TaskDefinition>] {
        match self {
            Self::WeightedSet(tasks) | Self::Sequence(tasks) => tasks,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks().is_empty()
    }

    pub fn total_weight(&self) -> u64 {
        self.tasks().iter().map(|t| u64::from(t.weight())).sum()
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        if self.is_empty() {
            anyhow::bail!("No tasks defined");
        }

        if let Self::WeightedSet(_) = self {
            if self.total_weight() == 0 {
                anyhow::bail!("All task weights are zero, at least one task must have a positive weight");
            }
        }

        self.tasks()
            .iter()
            .try_for_each(|task| task.validate_templates())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    fn response(status: u16, body: ResponseBody) -> HttpResponse {
        HttpResponse {
            status,
            body,
            set_cookies: Vec::new(),
            elapsed: Duration::from_millis(5),
        }
    }

    #[test]
    fn renders_url_query_headers_and_body() {
        let data = json!({
            "identifier": "emp1@erp.in",
            "secret": "pw",
            "visitor_name": "VIS-0001",
        });
        let template = RequestTemplate::put("/api/resource/Visitor/{{visitor_name}}")
            .with_query("key", "ls_employees")
            .with_header("Authorization", "token {{identifier}}:{{secret}}")
            .with_json_body(json!({"status": "Exit"}));

        let request = template
            .render(
                &Url::parse("http://14.99.126.171").unwrap(),
                &TemplateEngine::new(),
                &data,
            )
            .unwrap();

        assert_eq!(Method::PUT, request.method);
        assert_eq!(
            "/api/resource/Visitor/VIS-0001?key=ls_employees",
            request.endpoint()
        );
        assert_eq!(
            vec![("Authorization".to_string(), "token emp1@erp.in:pw".to_string())],
            request.headers
        );
        assert_eq!(Some(json!({"status": "Exit"})), request.body);
    }

    #[test]
    fn missing_value_fails_render() {
        let err = RequestTemplate::get("/api/resource/Visitor/{{visitor_name}}")
            .render(
                &Url::parse("http://localhost").unwrap(),
                &TemplateEngine::new(),
                &json!({}),
            )
            .unwrap_err();

        assert!(
            matches!(err, RenderError::Missing(MissingValue { ref key }) if key == "visitor_name"),
            "{err:?}"
        );
    }

    #[test]
    fn only_safe_methods_are_idempotent() {
        assert!(TaskDefinition::new("a", RequestTemplate::get("/")).is_idempotent());
        assert!(!TaskDefinition::new("b", RequestTemplate::post("/")).is_idempotent());
        assert!(!TaskDefinition::new("c", RequestTemplate::put("/")).is_idempotent());
    }

    #[test]
    fn json_field_predicate() {
        let predicate = SuccessPredicate::json_field_equals("/message", "Logged In");

        assert!(predicate.evaluate(&response(
            200,
            ResponseBody::Json(json!({"message": "Logged In"}))
        )));
        assert!(!predicate.evaluate(&response(
            200,
            ResponseBody::Json(json!({"message": "Nope"}))
        )));
        assert!(!predicate.evaluate(&response(
            401,
            ResponseBody::Json(json!({"message": "Logged In"}))
        )));
        assert!(!predicate.evaluate(&response(200, ResponseBody::Text("Logged In".into()))));
    }

    #[test]
    fn status_in_predicate() {
        let predicate = SuccessPredicate::StatusIn(vec![200, 404]);

        assert!(predicate.evaluate(&response(404, ResponseBody::Text(String::new()))));
        assert!(!predicate.evaluate(&response(500, ResponseBody::Text(String::new()))));
    }

    #[test]
    fn extraction_reads_pointer() {
        let body = ResponseBody::Json(json!({"data": {"name": "VIS-0001", "idx": 3, "blank": ""}}));

        let name = Extraction {
            key: "visitor_name".to_string(),
            pointer: "/data/name".to_string(),
        };
        let idx = Extraction {
            key: "idx".to_string(),
            pointer: "/data/idx".to_string(),
        };
        let blank = Extraction {
            key: "blank".to_string(),
            pointer: "/data/blank".to_string(),
        };

        assert_eq!(Some("VIS-0001".to_string()), name.apply(&body));
        assert_eq!(Some("3".to_string()), idx.apply(&body));
        assert_eq!(None, blank.apply(&body));
        assert_eq!(None, name.apply(&ResponseBody::Text("VIS-0001".into())));
    }

    #[test]
    fn validates_task_lists() {
        assert!(TaskList::weighted(Vec::new()).validate().is_err());
        assert!(
            TaskList::weighted([TaskDefinition::new("a", RequestTemplate::get("/")).with_weight(0)])
                .validate()
                .is_err()
        );
        assert!(
            TaskList::sequence([TaskDefinition::new("a", RequestTemplate::get("/")).with_weight(0)])
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn broken_templates_fail_validation() {
        let broken = TaskList::weighted([TaskDefinition::new(
            "visitor_exit",
            RequestTemplate::put("/api/resource/Visitor/{{visitor_name")
                .with_json_body(json!({"status": "Exit"})),
        )]);
        let broken_body = TaskList::sequence([TaskDefinition::new(
            "visitor_entry",
            RequestTemplate::post("/api/resource/Visitor")
                .with_json_body(json!({"name": "{{#if nonce}}"})),
        )]);

        assert!(broken.validate().is_err());
        assert!(broken_body.validate().is_err());
    }

    #[test]
    fn display_name_falls_back_to_raw_name() {
        let task = TaskDefinition::new(
            "{{identifier}}{{role}}- Onboarding",
            RequestTemplate::get("/"),
        );
        let templates = TemplateEngine::new();

        assert_eq!(
            "emp1@erp.in (FL) - Onboarding",
            task.display_name(&templates, &json!({"identifier": "emp1@erp.in", "role": " (FL) "}))
        );
        assert_eq!(
            "{{identifier}}{{role}}- Onboarding",
            task.display_name(&templates, &json!({"identifier": "emp1@erp.in"}))
        );
    }
}
