//! Target validation.
//!
//! `check_values` is a pure pass over one target's configuration: it
//! collects every problem instead of short-circuiting, so a user sees all
//! of them at once. Errors render as backslash-delimited, indented lines
//! grouped under `type:` / `options:` / `params:` / `url_fields:` headers;
//! downstream consumers split on those header strings.

use crate::template;
use crate::{Error, Result};

use super::{Namespace, NotifierType, NotifyTarget, Slice};

impl NotifyTarget {
    /// Validate this target, normalizing keys and applying field
    /// corrections along the way.
    pub fn check_values(&mut self, prefix: &str) -> Result<()> {
        self.attrs.normalize();

        let leaf_pad = format!("{}    ", prefix);
        let mut type_errs = String::new();
        let mut option_errs = String::new();
        let mut param_errs = String::new();
        let mut url_field_errs = String::new();

        // A bare-integer delay gets a seconds unit before parsing.
        if let Some(delay) = self.attrs.get(Namespace::Options, "delay") {
            let mut delay = delay.to_string();
            if !delay.is_empty() && delay.chars().all(|c| c.is_ascii_digit()) {
                delay.push('s');
                self.attrs.set(Namespace::Options, "delay", delay.clone());
            }
            if humantime::parse_duration(&delay).is_err() {
                option_errs += &leaf(&leaf_pad, "delay", &delay, "invalid duration");
            }
        }

        self.correct_self();

        if let Some(message) = self.attrs.get(Namespace::Options, "message")
            && template::validate_template(message).is_err()
        {
            option_errs += &leaf(&leaf_pad, "message", message, "invalid template");
        }

        let mut param_pairs: Vec<(String, String)> = self
            .attrs
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        param_pairs.sort();
        for (key, value) in &param_pairs {
            if template::validate_template(value).is_err() {
                param_errs += &leaf(&leaf_pad, key, value, "invalid template");
            }
        }

        // Omitting the type must inherit, never silently diverge from the
        // override parent.
        let resolved = self.resolved_type();
        let kind = NotifierType::parse(&resolved);
        let type_pad = format!("{}  ", prefix);
        if resolved.is_empty() {
            type_errs += &leaf(&type_pad, "type", "", "required");
        } else if !self.main.kind.is_empty() && resolved != self.main.kind {
            type_errs += &leaf(
                &type_pad,
                "type",
                &resolved,
                &format!("does not match the main record's type of {}", self.main.kind),
            );
        } else if kind.is_none() {
            type_errs += &leaf(&type_pad, "type", &resolved, "unknown type");
        }

        if let Some(kind) = kind {
            for field in kind.required_url_fields() {
                if self.get_url_field(field).is_empty() {
                    url_field_errs += &leaf(
                        &leaf_pad,
                        field,
                        "",
                        &format!("required for {}", kind),
                    );
                }
            }
            for field in kind.required_params() {
                if self.get_param(field).is_empty() {
                    param_errs +=
                        &leaf(&leaf_pad, field, "", &format!("required for {}", kind));
                }
            }
        }

        let has_field_errors = !type_errs.is_empty()
            || !option_errs.is_empty()
            || !param_errs.is_empty()
            || !url_field_errs.is_empty();

        // Only probe a clean config; a known-broken one would just add
        // noise on top of the real problems.
        let mut trailing = String::new();
        if !has_field_errors
            && let Some(kind) = kind
            && kind.needs_locate_probe()
            && let Err(e) = self.factory.locate(&self.build_url())
        {
            trailing = format!("{}  {}\\", prefix, e);
        }

        if !has_field_errors && trailing.is_empty() {
            return Ok(());
        }

        let mut out = format!("{}{}:\\", prefix, self.id);
        out += &type_errs;
        if !option_errs.is_empty() {
            out += &format!("{}  options:\\", prefix);
            out += &option_errs;
        }
        if !param_errs.is_empty() {
            out += &format!("{}  params:\\", prefix);
            out += &param_errs;
        }
        if !url_field_errs.is_empty() {
            out += &format!("{}  url_fields:\\", prefix);
            out += &url_field_errs;
        }
        out += &trailing;
        Err(Error::Validation(out))
    }
}

fn leaf(pad: &str, field: &str, value: &str, reason: &str) -> String {
    let value = if value.is_empty() {
        String::new()
    } else {
        format!("{} ", value)
    };
    format!("{}{}: {}<invalid> ({})\\", pad, field, value, reason)
}

impl Slice {
    /// Validate every target, aggregating all errors under a `notify:`
    /// header.
    pub fn check_values(&mut self, prefix: &str) -> Result<()> {
        let child_prefix = format!("{}  ", prefix);
        let mut all = String::new();
        for target in self.iter_mut() {
            match target.check_values(&child_prefix) {
                Ok(()) => {}
                Err(Error::Validation(text)) => all += &text,
                Err(e) => all += &e.to_string(),
            }
        }

        if all.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(format!("{}notify:\\{}", prefix, all)))
        }
    }
}
