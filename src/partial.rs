use std::sync::{Arc, OnceLock};

use crate::error::WhiskersResult;
use crate::registry::Registry;
use crate::template::Template;

/// A named template insertable with `{{> name}}`.
///
/// Source-backed partials build their template on first use and keep it.
#[derive(Debug)]
pub struct Partial {
    name: String,
    source: String,
    unescaped: bool,
    template: OnceLock<Arc<Template>>,
}

impl Partial {
    pub(crate) fn from_source(name: String, source: String, unescaped: bool) -> Self {
        Self {
            name,
            source,
            unescaped,
            template: OnceLock::new(),
        }
    }

    pub(crate) fn from_template(name: String, template: Arc<Template>) -> Self {
        Self {
            name,
            source: String::new(),
            unescaped: template.is_unescaped(),
            template: OnceLock::from(template),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw source; empty for partials registered from a template.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_unescaped(&self) -> bool {
        self.unescaped
    }

    /// The partial's parsed template.
    ///
    /// A source-backed partial is built on first use against `registry`, the
    /// tier it was found in: the owning template's registry for a
    /// template-local partial, or the registry itself. Later calls return the
    /// same template.
    ///
    /// # Errors
    /// If the source does not parse. Nothing is cached in that case, so the
    /// next call parses again.
    pub fn template(&self, registry: &Arc<Registry>) -> WhiskersResult<Arc<Template>> {
        if let Some(template) = self.template.get() {
            return Ok(Arc::clone(template));
        }
        let template = Template::with_registry(self.source.clone(), self.unescaped, Arc::clone(registry));
        template.tree()?;
        Ok(Arc::clone(self.template.get_or_init(|| Arc::new(template))))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::helper::HelperCall;

    fn shout(_: &mut HelperCall<'_>) -> WhiskersResult<Value> {
        Ok(json!("HEY"))
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_template_is_built_once() {
        let registry = Arc::new(Registry::new());
        let partial = Partial::from_source("p".to_string(), "{{x}}".to_string(), false);
        let first = partial.template(&registry).unwrap();
        let second = partial.template(&registry).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_template_binds_owning_registry() {
        let registry = Arc::new(Registry::empty());
        registry.register_helper("shout", shout);
        let partial = Partial::from_source("p".to_string(), "{{shout}}".to_string(), false);

        let template = partial.template(&registry).unwrap();
        assert!(Arc::ptr_eq(template.registry(), &registry));
        assert!(template.has_helper("shout"));
        assert!(!template.has_helper("if"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_failed_parse_is_not_cached() {
        let registry = Arc::new(Registry::new());
        let partial = Partial::from_source("p".to_string(), "{{#if}}".to_string(), false);
        assert!(partial.template(&registry).is_err());
        assert!(partial.template(&registry).is_err());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_from_template_keeps_flag() {
        let template = Arc::new(Template::parse_unescaped("{{x}}").unwrap());
        let partial = Partial::from_template("p".to_string(), Arc::clone(&template));
        assert!(partial.is_unescaped());
        assert_eq!(partial.source(), "");
        let registry = Arc::new(Registry::new());
        assert!(Arc::ptr_eq(&partial.template(&registry).unwrap(), &template));
    }
}
