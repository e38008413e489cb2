//! Annotation templating
//!
//! Supports `{{ $value }}`, `{{ $labels }}`, `{{ $labels.<name> }}` and the
//! same references written bare (`$value`, `$labels.instance`). A missing
//! label renders as an empty string.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

static ACTION_REGEX: OnceLock<Regex> = OnceLock::new();
static BARE_REFERENCE_REGEX: OnceLock<Regex> = OnceLock::new();

fn action_regex() -> &'static Regex {
    ACTION_REGEX.get_or_init(|| {
        Regex::new(r"\{\{-?\s*(.*?)\s*-?\}\}").unwrap_or_else(|_| unreachable!())
    })
}

fn bare_reference_regex() -> &'static Regex {
    BARE_REFERENCE_REGEX.get_or_init(|| {
        Regex::new(r"\$labels\.([a-zA-Z_][a-zA-Z0-9_]*)|\$labels|\$value")
            .unwrap_or_else(|_| unreachable!())
    })
}

/// Render `template` against a series value and label set
pub fn render(
    template: &str,
    value: &str,
    labels: &BTreeMap<String, String>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in action_regex().captures_iter(template) {
        let (Some(whole), Some(expr)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&substitute_bare(&template[last..whole.start()], value, labels)?);
        out.push_str(&eval_reference(expr.as_str(), value, labels)?);
        last = whole.end();
    }
    out.push_str(&substitute_bare(&template[last..], value, labels)?);

    Ok(out)
}

/// Render, falling back to the raw template on error
pub fn render_or_raw(template: &str, value: &str, labels: &BTreeMap<String, String>) -> String {
    render(template, value, labels).unwrap_or_else(|e| {
        tracing::debug!(error = %e, template, "Template render failed, keeping raw text");
        template.to_string()
    })
}

fn eval_reference(
    expr: &str,
    value: &str,
    labels: &BTreeMap<String, String>,
) -> Result<String, TemplateError> {
    match expr {
        "$value" | ".Value" => Ok(value.to_string()),
        "$labels" | ".Labels" => Ok(format_labels(labels)),
        _ => {
            let key = expr
                .strip_prefix("$labels.")
                .or_else(|| expr.strip_prefix(".Labels."))
                .filter(|k| is_label_name(k))
                .ok_or_else(|| TemplateError::UnsupportedAction(expr.to_string()))?;
            Ok(labels.get(key).cloned().unwrap_or_default())
        }
    }
}

fn substitute_bare(
    text: &str,
    value: &str,
    labels: &BTreeMap<String, String>,
) -> Result<String, TemplateError> {
    if text.contains("{{") || text.contains("}}") {
        return Err(TemplateError::Unbalanced);
    }

    Ok(bare_reference_regex()
        .replace_all(text, |caps: &regex::Captures| match caps.get(1) {
            Some(key) => labels.get(key.as_str()).cloned().unwrap_or_default(),
            None if &caps[0] == "$value" => value.to_string(),
            None => format_labels(labels),
        })
        .into_owned())
}

fn is_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `{a="1", b="2"}`
fn format_labels(labels: &BTreeMap<String, String>) -> String {
    let inner: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}={:?}", k, v))
        .collect();
    format!("{{{}}}", inner.join(", "))
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("unsupported template action '{0}'")]
    UnsupportedAction(String),

    #[error("unbalanced template delimiters")]
    Unbalanced,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("instance".to_string(), "node-1:9100".to_string()),
            ("job".to_string(), "node".to_string()),
        ])
    }

    #[test]
    fn test_render_actions() {
        let out = render(
            "{{ $labels.instance }} of {{$labels.job}} is at {{ $value }}%",
            "93.5",
            &labels(),
        )
        .unwrap();
        assert_eq!(out, "node-1:9100 of node is at 93.5%");
    }

    #[test]
    fn test_render_bare_references() {
        let out = render("value=$value on $labels.instance.", "7", &labels()).unwrap();
        assert_eq!(out, "value=7 on node-1:9100.");
    }

    #[test]
    fn test_render_label_map() {
        let out = render("{{ $labels }}", "1", &labels()).unwrap();
        assert_eq!(out, r#"{instance="node-1:9100", job="node"}"#);
        assert_eq!(render("$labels", "1", &BTreeMap::new()).unwrap(), "{}");
    }

    #[test]
    fn test_missing_label_is_empty() {
        assert_eq!(render("[{{ $labels.pod }}]", "1", &labels()).unwrap(), "[]");
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(render("disk almost full", "1", &labels()).unwrap(), "disk almost full");
    }

    #[test]
    fn test_render_errors_fall_back_to_raw() {
        assert!(matches!(
            render("{{ humanize $value }}", "1", &labels()),
            Err(TemplateError::UnsupportedAction(_))
        ));
        assert!(matches!(render("oops {{ $value", "1", &labels()), Err(TemplateError::Unbalanced)));

        let raw = "{{ printf \"%.2f\" $value }}";
        assert_eq!(render_or_raw(raw, "1", &labels()), raw);
    }

    #[test]
    fn test_patterns_compiled_once() {
        assert!(std::ptr::eq(action_regex(), action_regex()));
        assert!(std::ptr::eq(bare_reference_regex(), bare_reference_regex()));

        for i in 0..3 {
            let out = render("{{ $value }} / $value", &i.to_string(), &labels()).unwrap();
            assert_eq!(out, format!("{} / {}", i, i));
        }
    }
}
