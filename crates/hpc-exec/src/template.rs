use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::TemplateError;

pub const HOST_DIRECTORY_PLACEHOLDER: &str = "host_directory";

#[allow(clippy::expect_used)]
static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{|\}\}|\{([^{}]*)\}|[{}]").expect("valid template token regex")
});

/// Substitutes every `{host_directory}` with `workspace_path`.
pub fn render(template: &str, workspace_path: &str) -> Result<String, TemplateError> {
    let mut rendered = String::with_capacity(template.len() + workspace_path.len());
    let mut last = 0;
    let mut substitutions = 0usize;
    for caps in TOKEN_RE.captures_iter(template) {
        let Some(token) = caps.get(0) else {
            continue;
        };
        rendered.push_str(&template[last..token.start()]);
        last = token.end();
        match token.as_str() {
            "{{" => rendered.push('{'),
            "}}" => rendered.push('}'),
            "{" => {
                return Err(TemplateError::Malformed {
                    offset: token.start(),
                    reason: "unmatched '{'",
                })
            }
            "}" => {
                return Err(TemplateError::Malformed {
                    offset: token.start(),
                    reason: "unmatched '}'",
                })
            }
            _ => {
                let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                if name.is_empty() {
                    return Err(TemplateError::Malformed {
                        offset: token.start(),
                        reason: "empty placeholder",
                    });
                }
                if name != HOST_DIRECTORY_PLACEHOLDER {
                    return Err(TemplateError::UnknownPlaceholder {
                        name: name.to_string(),
                        offset: token.start(),
                    });
                }
                rendered.push_str(workspace_path);
                substitutions += 1;
            }
        }
    }
    rendered.push_str(&template[last..]);
    if substitutions == 0 {
        return Err(TemplateError::MissingPlaceholder {
            placeholder: HOST_DIRECTORY_PLACEHOLDER,
        });
    }
    Ok(rendered)
}

pub fn render_file(path: &Path, workspace_path: &str) -> Result<String, TemplateError> {
    let template = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    render(&template, workspace_path)
}
