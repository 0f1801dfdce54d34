//! A Handlebars-style template engine built around a closed syntax tree and
//! visitor passes over it: validation of variable references, in-place
//! renaming, diagnostic printing and evaluation.
//!
//! ```rust
//! use serde_json::json;
//! use whiskers::Template;
//!
//! let template = Template::parse("{{#each users}}{{name}} {{/each}}").unwrap();
//! template.validate(["users"]).unwrap();
//! template.rename([("users", "members")]).unwrap();
//! assert_eq!(template.print(), "{{#each members}}{{name}} {{/each}}");
//!
//! let out = template.exec(&json!({"members": [{"name": "a"}, {"name": "b"}]})).unwrap();
//! assert_eq!(out, "a b ");
//! ```

pub mod ast;
mod error;
mod eval;
mod helper;
mod parser;
mod partial;
mod path;
mod print;
mod registry;
mod rename;
mod template;
mod validate;

// Public exports.
pub use error::{ParseError, ParseErrorKind, RegistrationKind, WhiskersError, WhiskersResult};
pub use eval::evaluate;
pub use helper::{BlockFrame, DataFrame, Helper, HelperCall, HelperRef, is_truthy};
pub use parser::parse;
pub use partial::Partial;
pub use path::{Callee, classify, escape_path, helper_name};
pub use print::{print, print_ast};
pub use registry::Registry;
pub use rename::{RenameVisitor, rename};
pub use template::{SharedProgram, Template};
pub use validate::{ValidateVisitor, validate};
