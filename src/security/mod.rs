use crate::error::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Characters an allowlisted command argument may contain. Anything else
/// is rejected before the process is spawned — arguments are never built
/// by shelling out through a formatted string.
static ARG_GRAMMAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9._:/@=-]*$").unwrap());

const LOG_MAX_BYTES: usize = 4096;

/// Strip control characters, truncate to 4KB, and escape `{`/`}` so log
/// lines built from untrusted input cannot forge structured fields.
pub fn sanitize_log(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(LOG_MAX_BYTES));
    for c in input.chars() {
        if out.len() >= LOG_MAX_BYTES {
            break;
        }
        if c.is_control() && c != '\t' {
            continue;
        }
        match c {
            '{' => out.push_str("{{"),
            '}' => out.push_str("}}"),
            _ => out.push(c),
        }
    }
    if out.len() > LOG_MAX_BYTES {
        out.truncate(LOG_MAX_BYTES);
    }
    out
}

/// Validate a string destined for a command-line argument against the
/// allowlisted grammar. Returns the string unchanged on success.
pub fn sanitize_for_command(input: &str) -> Result<String, ValidationError> {
    if input.len() > 256 {
        return Err(ValidationError::TooLong { max: 256 });
    }
    if !ARG_GRAMMAR.is_match(input) {
        return Err(ValidationError::DisallowedCharacters {
            detail: input.to_string(),
        });
    }
    Ok(input.to_string())
}

/// Canonicalize `path` and verify it resolves to somewhere inside `root`.
/// `root` itself need not exist yet — only its lexical ancestor relation
/// to `path` is checked when canonicalization of a not-yet-created file
/// is required, by canonicalizing the deepest existing ancestor.
pub fn canonicalize_within(root: &Path, path: &Path) -> Result<PathBuf, ValidationError> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };

    let lexically_normalized = normalize_lexically(&joined);
    let root_normalized = normalize_lexically(root);

    if !lexically_normalized.starts_with(&root_normalized) {
        return Err(ValidationError::PathEscapesRoot {
            path: path.display().to_string(),
        });
    }

    Ok(lexically_normalized)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        use std::path::Component;
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
