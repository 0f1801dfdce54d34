//! Diagnostic printers: an approximate reconstruction of the source, and an
//! indented dump of the tree structure.
//!
//! Neither output round-trips through the parser.

use crate::ast::{
    BlockStatement, BooleanLiteral, CommentStatement, ContentStatement, Expression, Hash,
    HashPair, MustacheStatement, NumberLiteral, Param, PartialStatement, PathExpression, Program,
    StringLiteral, SubExpression, Visitor,
};

/// Approximate source text for `program`.
pub fn print(program: &Program) -> String {
    let mut printer = SourcePrinter::default();
    program.accept(&mut printer);
    printer.buf
}

/// Indented structural dump of `program`.
///
/// ```
/// let program = whiskers::parse("Hi {{name}}", false).unwrap();
/// assert_eq!(whiskers::print_ast(&program), "CONTENT[ 'Hi ' ]\n{{ PATH:name [] }}\n");
/// ```
pub fn print_ast(program: &Program) -> String {
    let mut printer = AstPrinter::default();
    program.accept(&mut printer);
    printer.buf
}

#[derive(Default)]
struct SourcePrinter {
    buf: String,
    depth: usize,
}

impl SourcePrinter {
    fn line(&mut self, text: &str) {
        for _ in 0..self.depth {
            self.buf.push_str("  ");
        }
        self.buf.push_str(text);
        self.buf.push('\n');
    }
}

impl Visitor for SourcePrinter {
    type Output = ();

    fn visit_program(&mut self, node: &Program) {
        if !node.block_params.is_empty() {
            self.line(&format!("BLOCK PARAMS: [ {} ]", node.block_params.join(" ")));
        }
        for statement in &node.body {
            statement.accept(self);
        }
    }

    fn visit_mustache(&mut self, node: &MustacheStatement) {
        self.buf.push_str(if node.unescaped { "{{{" } else { "{{" });
        node.expression.accept(self);
        self.buf.push_str(if node.unescaped { "}}}" } else { "}}" });
    }

    fn visit_block(&mut self, node: &BlockStatement) {
        self.buf.push_str("{{#");
        node.expression.accept(self);
        self.buf.push_str("}}");

        self.depth = self.depth.saturating_add(1);
        if let Some(program) = &node.program {
            program.accept(self);
        }
        if let Some(inverse) = &node.inverse {
            self.buf.push_str("{{else}}");
            inverse.accept(self);
        }
        self.depth = self.depth.saturating_sub(1);

        if let Param::Path(path) = &node.expression.path {
            self.buf.push_str("{{/");
            self.buf.push_str(&path.original);
            self.buf.push_str("}}");
        }
    }

    fn visit_partial(&mut self, node: &PartialStatement) {
        self.buf.push_str("{{> PARTIAL:");
        node.name.accept(self);
        if let Some(context) = &node.context {
            self.buf.push(' ');
            context.accept(self);
        }
        if let Some(hash) = &node.hash {
            self.buf.push(' ');
            hash.accept(self);
        }
        self.buf.push_str(" }}");
    }

    fn visit_content(&mut self, node: &ContentStatement) {
        self.buf.push_str(&node.original);
    }

    fn visit_comment(&mut self, node: &CommentStatement) {
        self.line(&format!("{{{{! '{}' }}}}", node.value));
    }

    fn visit_expression(&mut self, node: &Expression) {
        node.path.accept(self);
        for param in &node.params {
            self.buf.push(' ');
            param.accept(self);
        }
        if let Some(hash) = &node.hash {
            self.buf.push(' ');
            hash.accept(self);
        }
    }

    fn visit_sub_expression(&mut self, node: &SubExpression) {
        self.buf.push('(');
        node.expression.accept(self);
        self.buf.push(')');
    }

    fn visit_path(&mut self, node: &PathExpression) {
        self.buf.push_str(&node.original);
    }

    fn visit_string(&mut self, node: &StringLiteral) {
        self.buf.push_str(&node.original);
    }

    fn visit_boolean(&mut self, node: &BooleanLiteral) {
        self.buf.push_str(&node.original);
    }

    fn visit_number(&mut self, node: &NumberLiteral) {
        self.buf.push_str(&node.original);
    }

    fn visit_hash(&mut self, node: &Hash) {
        self.buf.push_str("HASH{");
        for (i, pair) in node.pairs.iter().enumerate() {
            if i > 0 {
                self.buf.push_str(", ");
            }
            pair.accept(self);
        }
        self.buf.push('}');
    }

    fn visit_hash_pair(&mut self, node: &HashPair) {
        self.buf.push_str(&node.key);
        self.buf.push('=');
        node.value.accept(self);
    }
}

#[derive(Default)]
struct AstPrinter {
    buf: String,
    depth: usize,
    /// Inside a partial name, where names print as written.
    original: bool,
    /// Expressions of a block head print on their own line.
    in_block: bool,
}

impl AstPrinter {
    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.buf.push_str("  ");
        }
    }

    fn line(&mut self, text: &str) {
        self.indent();
        self.buf.push_str(text);
        self.buf.push('\n');
    }
}

impl Visitor for AstPrinter {
    type Output = ();

    fn visit_program(&mut self, node: &Program) {
        if !node.block_params.is_empty() {
            self.line(&format!("BLOCK PARAMS: [ {} ]", node.block_params.join(" ")));
        }
        for statement in &node.body {
            statement.accept(self);
        }
    }

    fn visit_mustache(&mut self, node: &MustacheStatement) {
        self.indent();
        self.buf.push_str("{{ ");
        let in_block = std::mem::replace(&mut self.in_block, false);
        node.expression.accept(self);
        self.in_block = in_block;
        self.buf.push_str(" }}\n");
    }

    fn visit_block(&mut self, node: &BlockStatement) {
        self.line("BLOCK:");
        self.depth = self.depth.saturating_add(1);

        let in_block = std::mem::replace(&mut self.in_block, true);
        node.expression.accept(self);
        self.in_block = false;

        if let Some(program) = &node.program {
            self.line("PROGRAM:");
            self.depth = self.depth.saturating_add(1);
            program.accept(self);
            self.depth = self.depth.saturating_sub(1);
        }
        if let Some(inverse) = &node.inverse {
            self.line("{{^}}");
            self.depth = self.depth.saturating_add(1);
            inverse.accept(self);
            self.depth = self.depth.saturating_sub(1);
        }

        self.in_block = in_block;
        self.depth = self.depth.saturating_sub(1);
    }

    fn visit_partial(&mut self, node: &PartialStatement) {
        self.indent();
        self.buf.push_str("{{> PARTIAL:");
        self.original = true;
        node.name.accept(self);
        self.original = false;
        if let Some(context) = &node.context {
            self.buf.push(' ');
            context.accept(self);
        }
        if let Some(hash) = &node.hash {
            self.buf.push(' ');
            hash.accept(self);
        }
        self.buf.push_str(" }}\n");
    }

    fn visit_content(&mut self, node: &ContentStatement) {
        self.line(&format!("CONTENT[ '{}' ]", node.original));
    }

    fn visit_comment(&mut self, node: &CommentStatement) {
        self.line(&format!("{{{{! '{}' }}}}", node.value));
    }

    fn visit_expression(&mut self, node: &Expression) {
        let head = std::mem::replace(&mut self.in_block, false);
        if head {
            self.indent();
        }

        node.path.accept(self);
        self.buf.push_str(" [");
        for (i, param) in node.params.iter().enumerate() {
            if i > 0 {
                self.buf.push_str(", ");
            }
            param.accept(self);
        }
        self.buf.push(']');
        if let Some(hash) = &node.hash {
            self.buf.push(' ');
            hash.accept(self);
        }

        if head {
            self.buf.push('\n');
        }
    }

    fn visit_sub_expression(&mut self, node: &SubExpression) {
        node.expression.accept(self);
    }

    fn visit_path(&mut self, node: &PathExpression) {
        if self.original {
            self.buf.push_str(&node.original);
            return;
        }
        let prefix = if node.data { "@PATH:" } else { "PATH:" };
        self.buf.push_str(prefix);
        self.buf.push_str(&node.parts.join("/"));
    }

    fn visit_string(&mut self, node: &StringLiteral) {
        if self.original {
            self.buf.push_str(&node.value);
        } else {
            self.buf.push('"');
            self.buf.push_str(&node.value);
            self.buf.push('"');
        }
    }

    fn visit_boolean(&mut self, node: &BooleanLiteral) {
        if self.original {
            self.buf.push_str(&node.original);
        } else {
            self.buf.push_str(&format!("BOOLEAN{{{}}}", node.value));
        }
    }

    fn visit_number(&mut self, node: &NumberLiteral) {
        if self.original {
            self.buf.push_str(&node.original);
        } else {
            self.buf.push_str(&format!("NUMBER{{{}}}", node.original));
        }
    }

    fn visit_hash(&mut self, node: &Hash) {
        self.buf.push_str("HASH{");
        for (i, pair) in node.pairs.iter().enumerate() {
            if i > 0 {
                self.buf.push_str(", ");
            }
            pair.accept(self);
        }
        self.buf.push('}');
    }

    fn visit_hash_pair(&mut self, node: &HashPair) {
        self.buf.push_str(&node.key);
        self.buf.push('=');
        node.value.accept(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn source(input: &str) -> String {
        print(&parse(input, false).unwrap())
    }

    fn dump(input: &str) -> String {
        print_ast(&parse(input, false).unwrap())
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_print_simple() {
        assert_eq!(source("Hello {{name}}!"), "Hello {{name}}!");
        assert_eq!(source("{{{raw}}}"), "{{{raw}}}");
        assert_eq!(source("{{fmt 1.0 true \"x\" key=val}}"), "{{fmt 1.0 true \"x\" HASH{key=val}}}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_print_block_uses_opening_path() {
        assert_eq!(
            source("{{#if user.ok}}yes{{else}}no{{/if}}"),
            "{{#if user.ok}}yes{{else}}no{{/if}}"
        );
        assert_eq!(source("{{#items}}x{{/items}}"), "{{#items}}x{{/items}}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_print_partial_comment_and_block_params() {
        assert_eq!(source("{{> card user a=1}}"), "{{> PARTIAL:card user HASH{a=1} }}");
        assert_eq!(source("{{! note }}"), "{{! ' note ' }}\n");
        assert_eq!(
            source("{{#each xs as |x|}}{{x}}{{/each}}"),
            "{{#each xs}}  BLOCK PARAMS: [ x ]\n{{x}}{{/each}}"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_print_sub_expression() {
        assert_eq!(source("{{outer (inner a) b}}"), "{{outer (inner a) b}}");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_print_ast_block() {
        let expected = "\
BLOCK:
  PATH:if [PATH:cond]
  PROGRAM:
    CONTENT[ 'a' ]
  {{^}}
    {{ PATH:b [] }}
";
        assert_eq!(dump("{{#if cond}}a{{else}}{{b}}{{/if}}"), expected);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_print_ast_literals() {
        assert_eq!(
            dump("{{f \"s\" 2 false @index k=v}}"),
            "{{ PATH:f [\"s\", NUMBER{2}, BOOLEAN{false}, @PATH:index] HASH{k=PATH:v} }}\n"
        );
        assert_eq!(dump("{{> (name) ctx}}"), "{{> PARTIAL:name [] PATH:ctx }}\n");
    }
}
