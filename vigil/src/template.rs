//! Message templating.
//!
//! Notification titles, messages, params and command arguments may embed
//! handlebars expressions that are evaluated against the owning service's
//! info snapshot, e.g. `{{ id }} - {{ latest_version }} released`.

use handlebars::Handlebars;
use serde::Serialize;

use crate::{Error, Result};

/// Templating context for one monitored service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    /// Stable service identifier.
    pub id: String,
    /// Canonical URL of the monitored service.
    pub url: String,
    /// URL of the service in the web UI.
    pub web_url: String,
    /// Latest known version.
    pub latest_version: String,
}

/// Check that `template` is syntactically valid.
///
/// Compile-only, so invalid templates are rejected at validation time and
/// never reach a send.
pub fn validate_template(template: &str) -> Result<()> {
    handlebars::Template::compile(template)
        .map(|_| ())
        .map_err(|e| Error::template(e.to_string()))
}

/// Evaluate `template` against the service info context.
///
/// Missing keys render as empty rather than erroring, matching attribute
/// resolution where absence is not exceptional.
pub fn render(template: &str, info: &ServiceInfo) -> Result<String> {
    // Fast path: nothing to evaluate.
    if !template.contains("{{") {
        return Ok(template.to_string());
    }

    let mut registry = Handlebars::new();
    registry.register_escape_fn(handlebars::no_escape);
    registry
        .render_template(template, info)
        .map_err(|e| Error::template(e.to_string()))
}
