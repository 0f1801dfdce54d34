//! Rewrites field references in place according to an `old -> new` mapping.

use std::cmp::Reverse;

use tracing::trace;

use crate::ast::{
    BlockStatement, BooleanLiteral, CommentStatement, ContentStatement, Expression, Hash,
    HashPair, MustacheStatement, NumberLiteral, Param, PartialStatement, PathExpression, Program,
    StringLiteral, SubExpression, VisitorMut,
};
use crate::error::WhiskersResult;
use crate::path::{Callee, classify, escape_path};

struct Rule {
    old: String,
    old_escaped: String,
    new_escaped: String,
}

/// Rename state for one walk of a tree.
///
/// Rules are tried longest key first, ties broken lexicographically; the
/// first rule whose key prefixes a reference is applied and the reference is
/// done.
pub struct RenameVisitor<F> {
    rules: Vec<Rule>,
    is_helper: F,
}

impl<F> RenameVisitor<F>
where
    F: Fn(&str) -> bool,
{
    pub fn new<I, K, V>(mapping: I, is_helper: F) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut rules: Vec<Rule> = mapping
            .into_iter()
            .map(|(old, new)| {
                let old = old.into();
                Rule {
                    old_escaped: escape_path(&old),
                    new_escaped: escape_path(new.as_ref()),
                    old,
                }
            })
            .collect();
        rules.sort_by(|a, b| {
            (Reverse(a.old.len()), &a.old).cmp(&(Reverse(b.old.len()), &b.old))
        });
        Self { rules, is_helper }
    }
}

/// Applies `mapping` to every field reference of `program`.
pub fn rename<I, K, V, F>(program: &mut Program, mapping: I, is_helper: F) -> WhiskersResult<()>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: AsRef<str>,
    F: Fn(&str) -> bool,
{
    program.accept_mut(&mut RenameVisitor::new(mapping, is_helper))
}

fn replace_first(node: &mut PathExpression, from: &str, to: &str) {
    node.original = node.original.replacen(from, to, 1);
    if let Some(root) = node.parts.first_mut() {
        *root = root.replacen(from, to, 1);
    }
}

impl<F> VisitorMut for RenameVisitor<F>
where
    F: Fn(&str) -> bool,
{
    type Output = WhiskersResult<()>;

    fn visit_program(&mut self, node: &mut Program) -> Self::Output {
        node.body
            .iter_mut()
            .try_for_each(|statement| statement.accept_mut(self))
    }

    fn visit_mustache(&mut self, node: &mut MustacheStatement) -> Self::Output {
        node.expression.accept_mut(self)
    }

    fn visit_block(&mut self, node: &mut BlockStatement) -> Self::Output {
        node.expression.accept_mut(self)?;
        if let Some(program) = &mut node.program {
            program.accept_mut(self)?;
        }
        if let Some(inverse) = &mut node.inverse {
            inverse.accept_mut(self)?;
        }
        Ok(())
    }

    fn visit_partial(&mut self, _node: &mut PartialStatement) -> Self::Output {
        Ok(())
    }

    fn visit_content(&mut self, _node: &mut ContentStatement) -> Self::Output {
        Ok(())
    }

    fn visit_comment(&mut self, _node: &mut CommentStatement) -> Self::Output {
        Ok(())
    }

    fn visit_expression(&mut self, node: &mut Expression) -> Self::Output {
        for param in &mut node.params {
            param.accept_mut(self)?;
        }
        if let Some(hash) = &mut node.hash {
            hash.accept_mut(self)?;
        }

        match classify(node, &self.is_helper) {
            Callee::Field => match &mut node.path {
                Param::Path(path) => self.visit_path(path),
                Param::SubExpression(_) | Param::String(_) | Param::Boolean(_) | Param::Number(_) => {
                    Ok(())
                }
            },
            Callee::Helper | Callee::Literal | Callee::SubExpression => Ok(()),
        }
    }

    fn visit_sub_expression(&mut self, node: &mut SubExpression) -> Self::Output {
        node.expression.accept_mut(self)
    }

    fn visit_path(&mut self, node: &mut PathExpression) -> Self::Output {
        if node.parts.is_empty() {
            return Ok(());
        }
        for rule in &self.rules {
            let from = if node.original.starts_with(&rule.old) {
                &rule.old
            } else if node.original.starts_with(&rule.old_escaped) {
                &rule.old_escaped
            } else {
                continue;
            };
            trace!(reference = %node.original, from = %from, to = %rule.new_escaped, "renaming reference");
            replace_first(node, from, &rule.new_escaped);
            break;
        }
        Ok(())
    }

    fn visit_string(&mut self, _node: &mut StringLiteral) -> Self::Output {
        Ok(())
    }

    fn visit_boolean(&mut self, _node: &mut BooleanLiteral) -> Self::Output {
        Ok(())
    }

    fn visit_number(&mut self, _node: &mut NumberLiteral) -> Self::Output {
        Ok(())
    }

    fn visit_hash(&mut self, node: &mut Hash) -> Self::Output {
        node.pairs
            .iter_mut()
            .try_for_each(|pair| pair.accept_mut(self))
    }

    fn visit_hash_pair(&mut self, node: &mut HashPair) -> Self::Output {
        node.value.accept_mut(self)
    }
}
