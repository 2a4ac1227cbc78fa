use handlebars::Handlebars;

use super::RenderError;

/// How substituted values are escaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markup {
    /// Values are HTML-escaped.
    Html,
    /// Values are inserted verbatim (subject lines).
    Plain,
}

/// Templating collaborator: renders a template string against a JSON context.
pub trait TemplateRenderer: Send + Sync + std::fmt::Debug {
    fn render_template(
        &self,
        template: &str,
        context: &serde_json::Value,
        markup: Markup,
    ) -> Result<String, RenderError>;
}

/// Handlebars templates in strict mode: a variable missing from the context fails the
/// render instead of producing an empty string.
pub struct HandlebarsRenderer {
    html: Handlebars<'static>,
    plain: Handlebars<'static>,
}

impl std::fmt::Debug for HandlebarsRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlebarsRenderer").finish_non_exhaustive()
    }
}

impl Default for HandlebarsRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlebarsRenderer {
    pub fn new() -> Self {
        let mut html = Handlebars::new();
        html.set_strict_mode(true);

        let mut plain = Handlebars::new();
        plain.set_strict_mode(true);
        plain.register_escape_fn(handlebars::no_escape);

        Self { html, plain }
    }
}

impl TemplateRenderer for HandlebarsRenderer {
    fn render_template(
        &self,
        template: &str,
        context: &serde_json::Value,
        markup: Markup,
    ) -> Result<String, RenderError> {
        let engine = match markup {
            Markup::Html => &self.html,
            Markup::Plain => &self.plain,
        };

        engine
            .render_template(template, context)
            .map_err(|e| RenderError::Template(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_html_escapes_values() {
        let renderer = HandlebarsRenderer::new();
        let context = json!({ "recipient": { "name": "Tom & Jerry" } });

        let html = renderer
            .render_template("<p>Hi {{ recipient.name }}</p>", &context, Markup::Html)
            .expect("Renderable template");
        let plain = renderer
            .render_template("Hi {{ recipient.name }}", &context, Markup::Plain)
            .expect("Renderable template");

        assert_eq!(html, "<p>Hi Tom &amp; Jerry</p>");
        assert_eq!(plain, "Hi Tom & Jerry");
    }

    #[test]
    fn test_missing_variable_fails() {
        let renderer = HandlebarsRenderer::new();
        let result =
            renderer.render_template("Hi {{ recipient.nickname }}", &json!({}), Markup::Plain);

        assert!(matches!(result, Err(RenderError::Template(_))));
    }

    #[test]
    fn test_syntax_error_fails() {
        let renderer = HandlebarsRenderer::new();
        let result = renderer.render_template("{{#if}}", &json!({}), Markup::Html);

        assert!(matches!(result, Err(RenderError::Template(_))));
    }
}
