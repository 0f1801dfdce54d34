//! Checks that every top-level field reference names a known variable.

use std::collections::BTreeSet;

use tracing::trace;

use crate::ast::{
    BlockStatement, BooleanLiteral, CommentStatement, ContentStatement, Expression, Hash,
    HashPair, MustacheStatement, NumberLiteral, PartialStatement, PathExpression, Program,
    StringLiteral, SubExpression, Visitor,
};
use crate::error::{WhiskersError, WhiskersResult};
use crate::path::{Callee, classify, matches_known};

/// Validation state for one walk of a tree.
///
/// References inside a block, including the block's own call expression,
/// are not checked.
pub struct ValidateVisitor<'a, F> {
    known: &'a BTreeSet<String>,
    is_helper: F,
    block_depth: usize,
}

impl<'a, F> ValidateVisitor<'a, F>
where
    F: Fn(&str) -> bool,
{
    /// `is_helper` answers whether a bare name currently resolves to a helper.
    pub fn new(known: &'a BTreeSet<String>, is_helper: F) -> Self {
        Self {
            known,
            is_helper,
            block_depth: 0,
        }
    }

    fn in_block(&self) -> bool {
        self.block_depth > 0
    }
}

/// Validates `program` against `known`, stopping at the first unknown
/// reference.
///
/// # Errors
/// [`WhiskersError::InvalidReference`] naming the reference and the known
/// set, in sorted order.
pub fn validate<F>(program: &Program, known: &BTreeSet<String>, is_helper: F) -> WhiskersResult<()>
where
    F: Fn(&str) -> bool,
{
    program.accept(&mut ValidateVisitor::new(known, is_helper))
}

impl<F> Visitor for ValidateVisitor<'_, F>
where
    F: Fn(&str) -> bool,
{
    type Output = WhiskersResult<()>;

    fn visit_program(&mut self, node: &Program) -> Self::Output {
        node.body.iter().try_for_each(|statement| statement.accept(self))
    }

    fn visit_mustache(&mut self, node: &MustacheStatement) -> Self::Output {
        node.expression.accept(self)
    }

    fn visit_block(&mut self, node: &BlockStatement) -> Self::Output {
        self.block_depth = self.block_depth.saturating_add(1);
        let result = node
            .expression
            .accept(self)
            .and_then(|()| node.program.as_ref().map_or(Ok(()), |p| p.accept(self)))
            .and_then(|()| node.inverse.as_ref().map_or(Ok(()), |p| p.accept(self)));
        self.block_depth = self.block_depth.saturating_sub(1);
        result
    }

    fn visit_partial(&mut self, _node: &PartialStatement) -> Self::Output {
        Ok(())
    }

    fn visit_content(&mut self, _node: &ContentStatement) -> Self::Output {
        Ok(())
    }

    fn visit_comment(&mut self, _node: &CommentStatement) -> Self::Output {
        Ok(())
    }

    fn visit_expression(&mut self, node: &Expression) -> Self::Output {
        for param in &node.params {
            param.accept(self)?;
        }
        if let Some(hash) = &node.hash {
            hash.accept(self)?;
        }

        match classify(node, &self.is_helper) {
            Callee::Field => node.path.as_path().map_or(Ok(()), |path| self.visit_path(path)),
            Callee::Helper | Callee::Literal | Callee::SubExpression => Ok(()),
        }
    }

    fn visit_sub_expression(&mut self, node: &SubExpression) -> Self::Output {
        node.expression.accept(self)
    }

    fn visit_path(&mut self, node: &PathExpression) -> Self::Output {
        if self.in_block() || node.parts.is_empty() {
            return Ok(());
        }
        if self.known.iter().any(|name| matches_known(node, name)) {
            return Ok(());
        }
        trace!(reference = %node.original, "unknown reference");
        Err(WhiskersError::InvalidReference {
            reference: node.original.clone(),
            known: self.known.iter().cloned().collect(),
        })
    }

    fn visit_string(&mut self, _node: &StringLiteral) -> Self::Output {
        Ok(())
    }

    fn visit_boolean(&mut self, _node: &BooleanLiteral) -> Self::Output {
        Ok(())
    }

    fn visit_number(&mut self, _node: &NumberLiteral) -> Self::Output {
        Ok(())
    }

    fn visit_hash(&mut self, node: &Hash) -> Self::Output {
        node.pairs.iter().try_for_each(|pair| pair.accept(self))
    }

    fn visit_hash_pair(&mut self, node: &HashPair) -> Self::Output {
        node.value.accept(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn known(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn check(source: &str, names: &[&str]) -> WhiskersResult<()> {
        let program = parse(source, false).unwrap();
        validate(&program, &known(names), |name| name == "upper")
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_top_level_reference() {
        assert!(check("Hello {{name}}", &["name"]).is_ok());
        let err = check("Hello {{name}}", &["other"]).unwrap_err();
        match err {
            WhiskersError::InvalidReference { reference, known } => {
                assert_eq!(reference, "name");
                assert_eq!(known, vec!["other".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_block_bodies_are_relaxed() {
        assert!(check("{{#each items}}{{anything.at.all}}{{/each}}", &[]).is_ok());
        assert!(check("{{#if flag}}x{{else}}{{other}}{{/if}}", &[]).is_ok());
        assert!(check("{{#items}}{{../nope}}{{/items}}", &[]).is_ok());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_params_and_hash_are_checked() {
        assert!(check("{{upper name}}", &["name"]).is_ok());
        assert!(check("{{upper name}}", &[]).is_err());
        assert!(check("{{upper \"x\" style=color}}", &[]).is_err());
        assert!(check("{{upper \"x\" style=color}}", &["color"]).is_ok());
        assert!(check("{{upper (upper name)}}", &[]).is_err());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_literals_and_partials_are_skipped() {
        assert!(check("{{\"text\"}} {{42}} {{true}}", &[]).is_ok());
        assert!(check("{{> header title}}", &[]).is_ok());
        assert!(check("{{! just a comment }}", &[]).is_ok());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_escaped_forms() {
        assert!(check("{{[user name]}}", &["user name"]).is_ok());
        assert!(check("{{user.[first name]}}", &["user.first name"]).is_ok());
        assert!(check("{{user.id}}", &["user"]).is_ok());
        assert!(check("{{username}}", &["user"]).is_err());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_fails_at_first_reference() {
        let err = check("{{a}}{{b}}", &[]).unwrap_err();
        assert!(matches!(
            err,
            WhiskersError::InvalidReference { ref reference, .. } if reference == "a"
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_data_and_scoped_references_are_fields() {
        assert!(check("{{@index}}", &[]).is_err());
        assert!(check("{{@index}}", &["index"]).is_ok());
        assert!(check("{{this.name}}", &["name"]).is_ok());
    }
}
