use handlebars::{
    Context, Handlebars, Helper, HelperResult, Output, RenderContext, RenderError,
    RenderErrorReason, Template,
};
use serde_json::Value;

/// A placeholder in a request template had no value in the session.
#[derive(derive_more::Error, derive_more::Display, Debug, Clone, PartialEq, Eq)]
#[display("session value `{key}` is not set")]
pub struct MissingValue {
    pub key: String,
}

#[derive(derive_more::Error, derive_more::Display, Debug)]
pub enum TemplateError {
    #[display("{_0}")]
    Missing(MissingValue),
    #[display("invalid template `{template}`: {reason}")]
    Invalid { template: String, reason: String },
}

/// Renders `{{key}}` placeholders against the values of one session.
///
/// Strict mode is on, so a placeholder without a value fails the render instead of producing an
/// empty string. Output is not HTML escaped. `{{nonce}}` gives a fresh random string on every
/// use.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.register_helper("nonce", Box::new(nonce));

        Self { handlebars }
    }

    pub fn render(&self, template: &str, data: &Value) -> Result<String, TemplateError> {
        if !template.contains("{{") {
            return Ok(template.to_string());
        }

        self.handlebars
            .render_template(template, data)
            .map_err(|e| classify(template, e))
    }

    /// Render the string leaves of a JSON body. Keys and non-string values are left alone.
    pub fn render_json(&self, template: &Value, data: &Value) -> Result<Value, TemplateError> {
        Ok(match template {
            Value::String(s) => Value::String(self.render(s, data)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.render_json(item, data))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), self.render_json(value, data)?)))
                    .collect::<Result<_, TemplateError>>()?,
            ),
            other => other.clone(),
        })
    }

    /// Check the syntax of a template without rendering it.
    pub fn validate(template: &str) -> Result<(), TemplateError> {
        Template::compile(template)
            .map(|_| ())
            .map_err(|e| TemplateError::Invalid {
                template: template.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn validate_json(template: &Value) -> Result<(), TemplateError> {
        match template {
            Value::String(s) => Self::validate(s),
            Value::Array(items) => items.iter().try_for_each(Self::validate_json),
            Value::Object(fields) => fields.values().try_for_each(Self::validate_json),
            _ => Ok(()),
        }
    }
}

fn classify(template: &str, error: RenderError) -> TemplateError {
    match error.reason() {
        RenderErrorReason::MissingVariable(Some(key)) => TemplateError::Missing(MissingValue {
            key: key.clone(),
        }),
        _ => TemplateError::Invalid {
            template: template.to_string(),
            reason: error.to_string(),
        },
    }
}

fn nonce(
    _: &Helper<'_>,
    _: &Handlebars<'_>,
    _: &Context,
    _: &mut RenderContext<'_, '_>,
    out: &mut dyn Output,
) -> HelperResult {
    out.write(&nanoid::nanoid!(8))?;
    Ok(())
}
