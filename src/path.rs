//! Expression classification and dotted-path escaping shared by the
//! analysis passes.

use crate::ast::{Expression, Param, PathExpression, strip_brackets};

/// What an expression's callee denotes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Callee {
    /// Resolves to a registered helper.
    Helper,
    /// A literal written where a reference was expected, e.g. `{{"text"}}`.
    Literal,
    /// A data lookup.
    Field,
    /// A nested `(helper ...)` call in callee position.
    SubExpression,
}

/// The helper name an expression would invoke, if its shape allows one: a
/// bare single-segment path with no `@`, `this` or `../` prefix.
pub fn helper_name(expression: &Expression) -> Option<&str> {
    let path = expression.path.as_path()?;
    if path.data || path.scoped || path.depth > 0 || path.parts.len() != 1 {
        return None;
    }
    path.root()
}

/// Classifies `expression` against the current helper namespace.
///
/// Never cached: helper registration may change between two visits.
pub fn classify<F>(expression: &Expression, is_helper: F) -> Callee
where
    F: FnOnce(&str) -> bool,
{
    if let Some(name) = helper_name(expression) {
        if is_helper(name) {
            return Callee::Helper;
        }
    }

    match &expression.path {
        Param::Path(_) => Callee::Field,
        Param::String(_) | Param::Boolean(_) | Param::Number(_) => Callee::Literal,
        Param::SubExpression(_) => Callee::SubExpression,
    }
}

/// Wraps every whitespace-containing segment of a dotted path in brackets.
///
/// ```
/// assert_eq!(whiskers::escape_path("user.first name"), "user.[first name]");
/// assert_eq!(whiskers::escape_path("[first name].id"), "[first name].id");
/// ```
pub fn escape_path(path: &str) -> String {
    path.split('.')
        .map(|segment| {
            if segment.contains(char::is_whitespace) && !segment.starts_with('[') {
                format!("[{segment}]")
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Whether the reference `path` is covered by the known variable `name`.
pub(crate) fn matches_known(path: &PathExpression, name: &str) -> bool {
    if let Some(root) = path.root() {
        if root == name || strip_brackets(root) == name {
            return true;
        }
    }

    let escaped = escape_path(name);
    match path.original.strip_prefix(escaped.as_str()) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}
