//! Evaluation pass: renders a tree against a `serde_json::Value` context.

use std::sync::LazyLock;

use serde_json::{Map, Value};
use tracing::trace;

use crate::ast::{
    BlockStatement, BooleanLiteral, CommentStatement, ContentStatement, Expression, Hash,
    HashPair, MustacheStatement, NumberLiteral, Param, PartialStatement, PathExpression, Program,
    StringLiteral, SubExpression, Visitor,
};
use crate::error::{WhiskersError, WhiskersResult};
use crate::helper::{BlockFrame, DataFrame, HelperCall, HelperRef, Renderer, is_truthy};
use crate::path::helper_name;
use crate::registry::read_lock;
use crate::template::Template;

/// Renders `program` with `context` as the root context.
///
/// Helpers and partials are resolved through `template`: its own
/// registrations first, then its registry.
///
/// # Errors
/// Returns the first error raised by the evaluator or by a helper. Panics
/// raised by helpers are not caught.
pub fn evaluate(
    template: &Template,
    program: &Program,
    context: &Value,
    data: Option<&DataFrame>,
) -> WhiskersResult<String> {
    let mut evaluator = Evaluator {
        template,
        contexts: vec![context.clone()],
        data: vec![data.cloned().unwrap_or_default()],
        block_params: Vec::new(),
    };
    evaluator.render_body(program)
}

/// Text form of a value as it appears in output.
pub(crate) fn to_output(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(to_output).collect::<Vec<_>>().join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

pub(crate) fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '`' => out.push_str("&#x60;"),
            '=' => out.push_str("&#x3D;"),
            _ => out.push(c),
        }
    }
    out
}

struct Evaluator<'t> {
    template: &'t Template,
    contexts: Vec<Value>,
    data: Vec<DataFrame>,
    block_params: Vec<Vec<(String, Value)>>,
}

impl Evaluator<'_> {
    fn render_body(&mut self, program: &Program) -> WhiskersResult<String> {
        let mut out = String::new();
        for statement in &program.body {
            if let Value::String(text) = statement.accept(self)? {
                out.push_str(&text);
            }
        }
        Ok(out)
    }

    fn render_optional(
        &mut self,
        program: Option<&Program>,
        frame: BlockFrame,
    ) -> WhiskersResult<String> {
        match program {
            Some(program) => self.render_program(program, frame),
            None => Ok(String::new()),
        }
    }

    fn context_at(&self, depth: usize) -> Option<&Value> {
        let index = self.contexts.len().checked_sub(depth.checked_add(1)?)?;
        self.contexts.get(index)
    }

    fn current_context(&self) -> &Value {
        static NULL: Value = Value::Null;
        self.context_at(0).unwrap_or(&NULL)
    }

    fn current_data(&self) -> &DataFrame {
        static EMPTY: LazyLock<DataFrame> = LazyLock::new(DataFrame::new);
        self.data.last().unwrap_or(&EMPTY)
    }

    fn block_param(&self, name: &str) -> Option<&Value> {
        self.block_params
            .iter()
            .rev()
            .flat_map(|frame| frame.iter())
            .find(|(bound, _)| bound == name)
            .map(|(_, value)| value)
    }

    fn resolve(&self, path: &PathExpression) -> Value {
        let found = if path.data {
            let base = match path.segment_name(0) {
                Some("root") => self.contexts.first(),
                Some(name) => self.current_data().get(name),
                None => None,
            };
            base.and_then(|base| descend(base, path, 1))
        } else if path.parts.is_empty() {
            self.context_at(path.depth)
        } else if let Some(bound) = (path.depth == 0 && !path.scoped)
            .then(|| path.segment_name(0).and_then(|name| self.block_param(name)))
            .flatten()
        {
            descend(bound, path, 1)
        } else {
            self.context_at(path.depth)
                .and_then(|base| descend(base, path, 0))
        };
        found.cloned().unwrap_or(Value::Null)
    }

    fn eval_params(&mut self, params: &[Param]) -> WhiskersResult<Vec<Value>> {
        params.iter().map(|param| param.accept(self)).collect()
    }

    fn eval_hash(&mut self, hash: Option<&Hash>) -> WhiskersResult<Map<String, Value>> {
        let mut out = Map::new();
        if let Some(hash) = hash {
            for pair in &hash.pairs {
                let value = pair.value.accept(self)?;
                out.insert(pair.key.clone(), value);
            }
        }
        Ok(out)
    }

    fn call_helper(
        &mut self,
        name: &str,
        helper: &HelperRef,
        expression: &Expression,
        bodies: Option<(Option<&Program>, Option<&Program>)>,
    ) -> WhiskersResult<Value> {
        let params = self.eval_params(&expression.params)?;
        let hash = self.eval_hash(expression.hash.as_ref())?;
        let (program, inverse) = bodies.unwrap_or((None, None));
        trace!(helper = name, block = bodies.is_some(), "calling helper");
        let mut call = HelperCall {
            name,
            params,
            hash,
            program,
            inverse,
            block: bodies.is_some(),
            renderer: self,
        };
        helper.call(&mut call)
    }

    fn section(&mut self, node: &BlockStatement, value: Value) -> WhiskersResult<String> {
        if !is_truthy(&value, false) {
            return self.render_optional(node.inverse.as_ref(), BlockFrame::default());
        }
        match value {
            Value::Array(items) => {
                let len = items.len();
                let mut out = String::new();
                for (index, item) in items.into_iter().enumerate() {
                    let frame = BlockFrame {
                        context: Some(item.clone()),
                        data: Some(self.current_data().iteration(index, len, None)),
                        block_params: vec![item, Value::from(index)],
                    };
                    out.push_str(&self.render_optional(node.program.as_ref(), frame)?);
                }
                Ok(out)
            }
            Value::Bool(_) => self.render_optional(node.program.as_ref(), BlockFrame::default()),
            other => self.render_optional(node.program.as_ref(), BlockFrame::with_context(other)),
        }
    }

    fn partial_name(&mut self, name: &Param) -> WhiskersResult<String> {
        Ok(match name {
            Param::Path(path) => path.original.clone(),
            Param::SubExpression(sub) => to_output(&self.visit_sub_expression(sub)?),
            literal => literal.literal_str().unwrap_or_default().to_string(),
        })
    }
}

/// Walks `path.parts[start..]` down from `base`.
fn descend<'v>(base: &'v Value, path: &PathExpression, start: usize) -> Option<&'v Value> {
    (start..path.parts.len()).try_fold(base, |current, index| {
        let segment = path.segment_name(index)?;
        match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => None,
        }
    })
}

impl Renderer for Evaluator<'_> {
    fn render_program(&mut self, program: &Program, frame: BlockFrame) -> WhiskersResult<String> {
        let pushed_context = frame.context.map(|context| self.contexts.push(context)).is_some();
        let pushed_data = frame.data.map(|data| self.data.push(data)).is_some();
        let bindings = program
            .block_params
            .iter()
            .cloned()
            .zip(frame.block_params)
            .collect::<Vec<_>>();
        let pushed_params = !bindings.is_empty();
        if pushed_params {
            self.block_params.push(bindings);
        }

        let result = self.render_body(program);

        if pushed_params {
            self.block_params.pop();
        }
        if pushed_data {
            self.data.pop();
        }
        if pushed_context {
            self.contexts.pop();
        }
        result
    }

    fn context(&self) -> &Value {
        self.current_context()
    }

    fn data(&self) -> &DataFrame {
        self.current_data()
    }
}

impl Visitor for Evaluator<'_> {
    type Output = WhiskersResult<Value>;

    fn visit_program(&mut self, node: &Program) -> Self::Output {
        self.render_body(node).map(Value::String)
    }

    fn visit_mustache(&mut self, node: &MustacheStatement) -> Self::Output {
        let value = self.visit_expression(&node.expression)?;
        let text = to_output(&value);
        Ok(Value::String(if node.unescaped {
            text
        } else {
            escape_html(&text)
        }))
    }

    fn visit_block(&mut self, node: &BlockStatement) -> Self::Output {
        if let Some(name) = helper_name(&node.expression) {
            if let Some(helper) = self.template.find_helper(name) {
                let bodies = Some((node.program.as_ref(), node.inverse.as_ref()));
                let value = self.call_helper(name, &helper, &node.expression, bodies)?;
                return Ok(Value::String(to_output(&value)));
            }
        }
        let value = self.visit_expression(&node.expression)?;
        self.section(node, value).map(Value::String)
    }

    fn visit_partial(&mut self, node: &PartialStatement) -> Self::Output {
        let name = self.partial_name(&node.name)?;
        let partial = self
            .template
            .find_partial(&name)
            .ok_or_else(|| WhiskersError::MissingPartial { name: name.clone() })?;
        trace!(partial = %name, "rendering partial");

        // Copied out so a partial may include itself without re-entering its lock.
        let tree = partial.template(self.template.registry())?.tree()?;
        let program = read_lock(&tree).clone();

        let mut context = match &node.context {
            Some(param) => param.accept(self)?,
            None => self.current_context().clone(),
        };
        let hash = self.eval_hash(node.hash.as_ref())?;
        if !hash.is_empty() {
            match &mut context {
                Value::Object(map) => map.extend(hash),
                other => *other = Value::Object(hash),
            }
        }
        self.render_program(&program, BlockFrame::with_context(context))
            .map(Value::String)
    }

    fn visit_content(&mut self, node: &ContentStatement) -> Self::Output {
        Ok(Value::String(node.original.clone()))
    }

    fn visit_comment(&mut self, _node: &CommentStatement) -> Self::Output {
        Ok(Value::String(String::new()))
    }

    fn visit_expression(&mut self, node: &Expression) -> Self::Output {
        if let Some(name) = helper_name(node) {
            if let Some(helper) = self.template.find_helper(name) {
                return self.call_helper(name, &helper, node, None);
            }
        }
        match &node.path {
            Param::Path(path) if !node.params.is_empty() || node.hash.is_some() => {
                Err(WhiskersError::MissingHelper {
                    name: path.original.clone(),
                })
            }
            callee => callee.accept(self),
        }
    }

    fn visit_sub_expression(&mut self, node: &SubExpression) -> Self::Output {
        self.visit_expression(&node.expression)
    }

    fn visit_path(&mut self, node: &PathExpression) -> Self::Output {
        Ok(self.resolve(node))
    }

    fn visit_string(&mut self, node: &StringLiteral) -> Self::Output {
        Ok(Value::String(node.value.clone()))
    }

    fn visit_boolean(&mut self, node: &BooleanLiteral) -> Self::Output {
        Ok(Value::Bool(node.value))
    }

    fn visit_number(&mut self, node: &NumberLiteral) -> Self::Output {
        if node.is_int {
            if let Ok(int) = node.original.parse::<i64>() {
                return Ok(Value::from(int));
            }
        }
        Ok(serde_json::Number::from_f64(node.value).map_or(Value::Null, Value::Number))
    }

    fn visit_hash(&mut self, node: &Hash) -> Self::Output {
        self.eval_hash(Some(node)).map(Value::Object)
    }

    fn visit_hash_pair(&mut self, node: &HashPair) -> Self::Output {
        node.value.accept(self)
    }
}
