use std::sync::Arc;

use serde_json::{Map, Value};

use crate::ast::Program;
use crate::error::{WhiskersError, WhiskersResult};

/// A named capability callable from a template expression.
///
/// Any `Fn(&mut HelperCall<'_>) -> WhiskersResult<Value>` closure that is
/// `Send + Sync` is a helper.
///
/// ```
/// use serde_json::{Value, json};
/// use whiskers::{HelperCall, Template, WhiskersResult};
///
/// let template = Template::parse("{{shout name}}").unwrap();
/// template.register_helper("shout", |call: &mut HelperCall<'_>| -> WhiskersResult<Value> {
///     let text = call.param(0).and_then(Value::as_str).unwrap_or_default();
///     Ok(Value::String(text.to_uppercase()))
/// });
/// assert_eq!(template.exec(&json!({"name": "bob"})).unwrap(), "BOB");
/// ```
pub trait Helper: Send + Sync {
    fn call(&self, call: &mut HelperCall<'_>) -> WhiskersResult<Value>;
}

impl<F> Helper for F
where
    F: Fn(&mut HelperCall<'_>) -> WhiskersResult<Value> + Send + Sync,
{
    fn call(&self, call: &mut HelperCall<'_>) -> WhiskersResult<Value> {
        self(call)
    }
}

pub type HelperRef = Arc<dyn Helper>;

/// Private `@data` variables visible during evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataFrame {
    values: Map<String, Value>,
}

impl DataFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: AsRef<str>>(&self, name: T) -> Option<&Value> {
        self.values.get(name.as_ref())
    }

    pub fn insert<T: Into<String>>(&mut self, name: T, value: Value) -> &mut Self {
        self.values.insert(name.into(), value);
        self
    }

    /// A copy of this frame carrying the per-iteration variables.
    pub fn iteration(&self, index: usize, len: usize, key: Option<&str>) -> Self {
        let mut frame = self.clone();
        frame
            .insert("index", Value::from(index))
            .insert("first", Value::Bool(index == 0))
            .insert("last", Value::Bool(index.saturating_add(1) == len));
        if let Some(key) = key {
            frame.insert("key", Value::String(key.to_string()));
        }
        frame
    }
}

/// A block body rendering request, issued by a helper.
#[derive(Debug, Default)]
pub struct BlockFrame {
    /// Context to push; `None` renders with the current context.
    pub context: Option<Value>,
    /// Data frame to push; `None` keeps the current one.
    pub data: Option<DataFrame>,
    /// Values bound positionally to the body's `as |a b|` names.
    pub block_params: Vec<Value>,
}

impl BlockFrame {
    pub fn with_context(context: Value) -> Self {
        Self {
            context: Some(context),
            ..Self::default()
        }
    }
}

/// The evaluation state a helper may call back into.
pub(crate) trait Renderer {
    fn render_program(&mut self, program: &Program, frame: BlockFrame) -> WhiskersResult<String>;
    fn context(&self) -> &Value;
    fn data(&self) -> &DataFrame;
}

/// Arguments and block access for a single helper invocation.
pub struct HelperCall<'c> {
    pub(crate) name: &'c str,
    pub(crate) params: Vec<Value>,
    pub(crate) hash: Map<String, Value>,
    pub(crate) program: Option<&'c Program>,
    pub(crate) inverse: Option<&'c Program>,
    pub(crate) block: bool,
    pub(crate) renderer: &'c mut dyn Renderer,
}

impl HelperCall<'_> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn param(&self, index: usize) -> Option<&Value> {
        self.params.get(index)
    }

    pub fn hash(&self) -> &Map<String, Value> {
        &self.hash
    }

    pub fn hash_get(&self, key: &str) -> Option<&Value> {
        self.hash.get(key)
    }

    /// Whether the helper was invoked as `{{#name}}...{{/name}}`.
    pub fn is_block(&self) -> bool {
        self.block
    }

    /// The context the helper was invoked in.
    pub fn context(&self) -> &Value {
        self.renderer.context()
    }

    pub fn data(&self) -> &DataFrame {
        self.renderer.data()
    }

    /// Number of `as |a b|` names on the primary body.
    pub fn block_param_count(&self) -> usize {
        self.program.map_or(0, |p| p.block_params.len())
    }

    /// Renders the primary body. An absent body renders as empty.
    pub fn render(&mut self, frame: BlockFrame) -> WhiskersResult<String> {
        match self.program {
            Some(program) => self.renderer.render_program(program, frame),
            None => Ok(String::new()),
        }
    }

    /// Renders the `{{else}}` body. An absent body renders as empty.
    pub fn render_inverse(&mut self, frame: BlockFrame) -> WhiskersResult<String> {
        match self.inverse {
            Some(program) => self.renderer.render_program(program, frame),
            None => Ok(String::new()),
        }
    }

    /// Fails with a [`WhiskersError::Helper`] attributed to this helper.
    pub fn error<M: Into<String>>(&self, message: M) -> WhiskersError {
        WhiskersError::helper(self.name, message)
    }
}

/// Template truthiness: `false`, `null`, `""`, `0` and `[]` are falsy.
pub fn is_truthy(value: &Value, include_zero: bool) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => include_zero || n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

fn include_zero(call: &HelperCall<'_>) -> bool {
    call.hash_get("includeZero").is_some_and(|v| is_truthy(v, false))
}

fn helper_if(call: &mut HelperCall<'_>) -> WhiskersResult<Value> {
    let condition = call
        .param(0)
        .ok_or_else(|| call.error("#if requires exactly one argument"))?;
    let truthy = is_truthy(condition, include_zero(call));
    branch(call, truthy)
}

fn helper_unless(call: &mut HelperCall<'_>) -> WhiskersResult<Value> {
    let condition = call
        .param(0)
        .ok_or_else(|| call.error("#unless requires exactly one argument"))?;
    let truthy = is_truthy(condition, include_zero(call));
    branch(call, !truthy)
}

fn branch(call: &mut HelperCall<'_>, take_program: bool) -> WhiskersResult<Value> {
    if !call.is_block() {
        return Ok(Value::Bool(take_program));
    }
    let rendered = if take_program {
        call.render(BlockFrame::default())?
    } else {
        call.render_inverse(BlockFrame::default())?
    };
    Ok(Value::String(rendered))
}

fn helper_with(call: &mut HelperCall<'_>) -> WhiskersResult<Value> {
    let context = call
        .param(0)
        .cloned()
        .ok_or_else(|| call.error("#with requires exactly one argument"))?;
    let rendered = if is_truthy(&context, false) {
        call.render(BlockFrame {
            context: Some(context.clone()),
            data: None,
            block_params: vec![context],
        })?
    } else {
        call.render_inverse(BlockFrame::default())?
    };
    Ok(Value::String(rendered))
}

fn helper_each(call: &mut HelperCall<'_>) -> WhiskersResult<Value> {
    let collection = call
        .param(0)
        .cloned()
        .ok_or_else(|| call.error("Must pass iterator to #each"))?;

    let mut output = String::new();
    match collection {
        Value::Array(items) if !items.is_empty() => {
            let len = items.len();
            for (index, item) in items.into_iter().enumerate() {
                let frame = BlockFrame {
                    context: Some(item.clone()),
                    data: Some(call.data().iteration(index, len, None)),
                    block_params: vec![item, Value::from(index)],
                };
                output.push_str(&call.render(frame)?);
            }
        }
        Value::Object(entries) if !entries.is_empty() => {
            let len = entries.len();
            for (index, (key, item)) in entries.into_iter().enumerate() {
                let frame = BlockFrame {
                    context: Some(item.clone()),
                    data: Some(call.data().iteration(index, len, Some(&key))),
                    block_params: vec![item, Value::String(key)],
                };
                output.push_str(&call.render(frame)?);
            }
        }
        Value::Array(_)
        | Value::Object(_)
        | Value::Null
        | Value::Bool(_)
        | Value::Number(_)
        | Value::String(_) => output = call.render_inverse(BlockFrame::default())?,
    }
    Ok(Value::String(output))
}

fn helper_lookup(call: &mut HelperCall<'_>) -> WhiskersResult<Value> {
    let (Some(target), Some(key)) = (call.param(0), call.param(1)) else {
        return Err(call.error("lookup requires two arguments"));
    };
    let found = match (target, key) {
        (Value::Object(map), key) => map.get(&crate::eval::to_output(key)).cloned(),
        (Value::Array(items), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| items.get(i).cloned()),
        _ => None,
    };
    Ok(found.unwrap_or(Value::Null))
}

fn helper_log(call: &mut HelperCall<'_>) -> WhiskersResult<Value> {
    let message = call
        .params()
        .iter()
        .map(crate::eval::to_output)
        .collect::<Vec<_>>()
        .join(" ");
    match call.hash_get("level").and_then(Value::as_str) {
        Some("debug") => tracing::debug!(target: "whiskers::log", "{message}"),
        Some("warn") => tracing::warn!(target: "whiskers::log", "{message}"),
        Some("error") => tracing::error!(target: "whiskers::log", "{message}"),
        Some(_) | None => tracing::info!(target: "whiskers::log", "{message}"),
    }
    Ok(Value::String(String::new()))
}

/// The helpers every default [`Registry`](crate::Registry) starts with.
pub(crate) fn builtins() -> Vec<(&'static str, HelperRef)> {
    vec![
        ("if", Arc::new(helper_if) as HelperRef),
        ("unless", Arc::new(helper_unless) as HelperRef),
        ("with", Arc::new(helper_with) as HelperRef),
        ("each", Arc::new(helper_each) as HelperRef),
        ("lookup", Arc::new(helper_lookup) as HelperRef),
        ("log", Arc::new(helper_log) as HelperRef),
    ]
}
