//! The template syntax tree and the visitor protocol every pass is built on.
//!
//! The node set is closed. A node never walks its own children: `accept`
//! performs a single dispatch to the matching visitor method and hands back
//! whatever that method returned. Traversal order is therefore a property of
//! each pass, not of the tree.

/// Root of a template, or the body of a block.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    /// Names introduced by `as |a b|` on the owning block.
    pub block_params: Vec<String>,
    pub body: Vec<Statement>,
}

/// Any node that may appear in a [`Program`] body.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Mustache(MustacheStatement),
    Block(BlockStatement),
    Partial(PartialStatement),
    Content(ContentStatement),
    Comment(CommentStatement),
}

/// `{{expr}}`, or `{{{expr}}}` / `{{&expr}}` when `unescaped`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct MustacheStatement {
    pub expression: Expression,
    pub unescaped: bool,
}

/// `{{#expr}}program{{else}}inverse{{/path}}`.
///
/// The closing tag is checked against the opening path by the parser and is
/// not stored.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct BlockStatement {
    pub expression: Expression,
    pub program: Option<Program>,
    pub inverse: Option<Program>,
}

/// `{{> name context key=value}}`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct PartialStatement {
    pub name: Param,
    pub context: Option<Param>,
    pub hash: Option<Hash>,
}

/// Raw template text, emitted verbatim.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ContentStatement {
    pub original: String,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct CommentStatement {
    pub value: String,
}

/// The head of a mustache, block or sub-expression: a callee followed by
/// positional parameters and an optional hash.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub path: Param,
    pub params: Vec<Param>,
    pub hash: Option<Hash>,
}

/// `(helper arg ...)`, usable wherever a [`Param`] is expected.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct SubExpression {
    pub expression: Box<Expression>,
}

/// A dotted reference such as `user.name`, `../title`, `@index` or
/// `this.[first name]`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpression {
    /// The verbatim source slice.
    pub original: String,
    /// Segments after any `this`, `./` or `../` prefix. Bracketed segments
    /// keep their brackets.
    pub parts: Vec<String>,
    /// Number of `../` prefixes.
    pub depth: usize,
    /// `@`-prefixed private data reference.
    pub data: bool,
    /// Explicitly scoped with `this` or `./`.
    pub scoped: bool,
}

impl PathExpression {
    /// Segment `index` with any surrounding brackets removed.
    pub fn segment_name(&self, index: usize) -> Option<&str> {
        self.parts.get(index).map(|part| strip_brackets(part))
    }

    /// The root symbol used for variable-name matching.
    pub fn root(&self) -> Option<&str> {
        self.parts.first().map(String::as_str)
    }
}

pub(crate) fn strip_brackets(part: &str) -> &str {
    part.strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(part)
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct StringLiteral {
    pub value: String,
    pub original: String,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct BooleanLiteral {
    pub value: bool,
    pub original: String,
}

/// Numeric literal. `original` keeps the spelling (`1.0` stays `1.0`).
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct NumberLiteral {
    pub value: f64,
    pub is_int: bool,
    pub original: String,
}

/// `key=value` pairs in insertion order.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Hash {
    pub pairs: Vec<HashPair>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct HashPair {
    pub key: String,
    pub value: Param,
}

/// Any node that may appear in value position: an expression callee, a
/// parameter, a hash value or a partial name.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Path(PathExpression),
    SubExpression(SubExpression),
    String(StringLiteral),
    Boolean(BooleanLiteral),
    Number(NumberLiteral),
}

impl Param {
    pub fn as_path(&self) -> Option<&PathExpression> {
        match self {
            Self::Path(path) => Some(path),
            Self::SubExpression(_) | Self::String(_) | Self::Boolean(_) | Self::Number(_) => None,
        }
    }

    /// The original spelling of a literal, if this is one.
    pub fn literal_str(&self) -> Option<&str> {
        match self {
            Self::String(lit) => Some(&lit.value),
            Self::Boolean(lit) => Some(&lit.original),
            Self::Number(lit) => Some(&lit.original),
            Self::Path(_) | Self::SubExpression(_) => None,
        }
    }
}

/// A read-only pass over the tree.
///
/// There are no default methods: a new pass handles every variant, and a new
/// variant must be handled by every pass.
pub trait Visitor {
    type Output;

    fn visit_program(&mut self, node: &Program) -> Self::Output;
    fn visit_mustache(&mut self, node: &MustacheStatement) -> Self::Output;
    fn visit_block(&mut self, node: &BlockStatement) -> Self::Output;
    fn visit_partial(&mut self, node: &PartialStatement) -> Self::Output;
    fn visit_content(&mut self, node: &ContentStatement) -> Self::Output;
    fn visit_comment(&mut self, node: &CommentStatement) -> Self::Output;
    fn visit_expression(&mut self, node: &Expression) -> Self::Output;
    fn visit_sub_expression(&mut self, node: &SubExpression) -> Self::Output;
    fn visit_path(&mut self, node: &PathExpression) -> Self::Output;
    fn visit_string(&mut self, node: &StringLiteral) -> Self::Output;
    fn visit_boolean(&mut self, node: &BooleanLiteral) -> Self::Output;
    fn visit_number(&mut self, node: &NumberLiteral) -> Self::Output;
    fn visit_hash(&mut self, node: &Hash) -> Self::Output;
    fn visit_hash_pair(&mut self, node: &HashPair) -> Self::Output;
}

/// A pass that rewrites the tree in place.
pub trait VisitorMut {
    type Output;

    fn visit_program(&mut self, node: &mut Program) -> Self::Output;
    fn visit_mustache(&mut self, node: &mut MustacheStatement) -> Self::Output;
    fn visit_block(&mut self, node: &mut BlockStatement) -> Self::Output;
    fn visit_partial(&mut self, node: &mut PartialStatement) -> Self::Output;
    fn visit_content(&mut self, node: &mut ContentStatement) -> Self::Output;
    fn visit_comment(&mut self, node: &mut CommentStatement) -> Self::Output;
    fn visit_expression(&mut self, node: &mut Expression) -> Self::Output;
    fn visit_sub_expression(&mut self, node: &mut SubExpression) -> Self::Output;
    fn visit_path(&mut self, node: &mut PathExpression) -> Self::Output;
    fn visit_string(&mut self, node: &mut StringLiteral) -> Self::Output;
    fn visit_boolean(&mut self, node: &mut BooleanLiteral) -> Self::Output;
    fn visit_number(&mut self, node: &mut NumberLiteral) -> Self::Output;
    fn visit_hash(&mut self, node: &mut Hash) -> Self::Output;
    fn visit_hash_pair(&mut self, node: &mut HashPair) -> Self::Output;
}

macro_rules! accept_impl {
    ($($node:ty => $method:ident),* $(,)?) => {
        $(
            impl $node {
                pub fn accept<V: Visitor + ?Sized>(&self, visitor: &mut V) -> V::Output {
                    visitor.$method(self)
                }

                pub fn accept_mut<V: VisitorMut + ?Sized>(&mut self, visitor: &mut V) -> V::Output {
                    visitor.$method(self)
                }
            }
        )*
    };
}

accept_impl! {
    Program => visit_program,
    MustacheStatement => visit_mustache,
    BlockStatement => visit_block,
    PartialStatement => visit_partial,
    ContentStatement => visit_content,
    CommentStatement => visit_comment,
    Expression => visit_expression,
    SubExpression => visit_sub_expression,
    PathExpression => visit_path,
    StringLiteral => visit_string,
    BooleanLiteral => visit_boolean,
    NumberLiteral => visit_number,
    Hash => visit_hash,
    HashPair => visit_hash_pair,
}

impl Statement {
    pub fn accept<V: Visitor + ?Sized>(&self, visitor: &mut V) -> V::Output {
        match self {
            Self::Mustache(node) => visitor.visit_mustache(node),
            Self::Block(node) => visitor.visit_block(node),
            Self::Partial(node) => visitor.visit_partial(node),
            Self::Content(node) => visitor.visit_content(node),
            Self::Comment(node) => visitor.visit_comment(node),
        }
    }

    pub fn accept_mut<V: VisitorMut + ?Sized>(&mut self, visitor: &mut V) -> V::Output {
        match self {
            Self::Mustache(node) => visitor.visit_mustache(node),
            Self::Block(node) => visitor.visit_block(node),
            Self::Partial(node) => visitor.visit_partial(node),
            Self::Content(node) => visitor.visit_content(node),
            Self::Comment(node) => visitor.visit_comment(node),
        }
    }
}

impl Param {
    pub fn accept<V: Visitor + ?Sized>(&self, visitor: &mut V) -> V::Output {
        match self {
            Self::Path(node) => visitor.visit_path(node),
            Self::SubExpression(node) => visitor.visit_sub_expression(node),
            Self::String(node) => visitor.visit_string(node),
            Self::Boolean(node) => visitor.visit_boolean(node),
            Self::Number(node) => visitor.visit_number(node),
        }
    }

    pub fn accept_mut<V: VisitorMut + ?Sized>(&mut self, visitor: &mut V) -> V::Output {
        match self {
            Self::Path(node) => visitor.visit_path(node),
            Self::SubExpression(node) => visitor.visit_sub_expression(node),
            Self::String(node) => visitor.visit_string(node),
            Self::Boolean(node) => visitor.visit_boolean(node),
            Self::Number(node) => visitor.visit_number(node),
        }
    }
}
