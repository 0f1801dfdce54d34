use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::debug;

use crate::ast::Program;
use crate::error::{RegistrationKind, WhiskersResult};
use crate::eval::evaluate;
use crate::helper::{DataFrame, Helper, HelperRef};
use crate::parser::parse;
use crate::partial::Partial;
use crate::registry::{
    Registry, fatal_on_conflict, file_base, insert_unique, read_lock, read_source, write_lock,
};
use crate::{print, rename, validate};

/// A parsed tree shared between a template and its clones.
pub type SharedProgram = Arc<RwLock<Program>>;

#[derive(Clone, Default)]
struct Registrations {
    helpers: HashMap<String, HelperRef>,
    partials: HashMap<String, Arc<Partial>>,
}

/// A template: source text, its lazily parsed tree, and the helpers and
/// partials registered on it.
///
/// Every method takes `&self`; registrations sit behind a lock and a
/// template can be shared between threads.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use whiskers::Template;
///
/// let template = Template::parse("Hello, {{name}}!").unwrap();
/// template.validate(["name"]).unwrap();
///
/// let result = template.exec(&json!({"name": "World"})).unwrap();
/// assert_eq!(result, "Hello, World!");
/// ```
///
/// # Clones share the tree
///
/// [`Clone`] copies the registrations but keeps the same tree slot, so the
/// source is parsed once for all clones and a [`rename`](Self::rename) on a
/// clone is visible through the original, even when neither had been parsed
/// before cloning. Use
/// [`fork`](Self::fork) for an independent copy.
pub struct Template {
    source: String,
    unescaped: bool,
    tree: Arc<RwLock<Option<SharedProgram>>>,
    registrations: RwLock<Registrations>,
    registry: Arc<Registry>,
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registrations = read_lock(&self.registrations);
        let mut helpers: Vec<&String> = registrations.helpers.keys().collect();
        let mut partials: Vec<&String> = registrations.partials.keys().collect();
        helpers.sort();
        partials.sort();
        f.debug_struct("Template")
            .field("source", &self.source)
            .field("unescaped", &self.unescaped)
            .field("parsed", &self.is_parsed())
            .field("helpers", &helpers)
            .field("partials", &partials)
            .finish()
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Template {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("Template", 2)?;
        state.serialize_field("source", &self.source)?;
        state.serialize_field("unescaped", &self.unescaped)?;
        state.end()
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Template {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        struct TemplateHelper {
            source: String,
            #[serde(default)]
            unescaped: bool,
        }

        let helper = TemplateHelper::deserialize(deserializer)?;
        Template::parse_template(helper.source, helper.unescaped)
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse template: {e}")))
    }
}

impl Clone for Template {
    fn clone(&self) -> Self {
        debug!("cloning template");
        Self {
            source: self.source.clone(),
            unescaped: self.unescaped,
            tree: Arc::clone(&self.tree),
            registrations: RwLock::new(read_lock(&self.registrations).clone()),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl Template {
    /// Creates an unparsed template using the global [`Registry`].
    ///
    /// The source is parsed on first use.
    pub fn new<T: Into<String>>(source: T, unescaped: bool) -> Self {
        Self::with_registry(source, unescaped, Registry::global())
    }

    /// Creates an unparsed template resolving helpers and partials it does
    /// not hold itself through `registry`.
    pub fn with_registry<T: Into<String>>(
        source: T,
        unescaped: bool,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            source: source.into(),
            unescaped,
            tree: Arc::new(RwLock::new(None)),
            registrations: RwLock::new(Registrations::default()),
            registry,
        }
    }

    /// Creates a template and parses it immediately.
    ///
    /// # Arguments
    ///
    /// * `source` - The template source
    ///
    /// # Errors
    ///
    /// Returns a `WhiskersError::Parse` error if the template syntax is invalid.
    pub fn parse<T: Into<String>>(source: T) -> WhiskersResult<Self> {
        Self::parse_template(source, false)
    }

    /// Like [`parse`](Self::parse), with every mustache left unescaped.
    pub fn parse_unescaped<T: Into<String>>(source: T) -> WhiskersResult<Self> {
        Self::parse_template(source, true)
    }

    pub fn parse_template<T: Into<String>>(source: T, unescaped: bool) -> WhiskersResult<Self> {
        let template = Self::new(source, unescaped);
        template.tree()?;
        Ok(template)
    }

    /// Parses `source`, panicking on a syntax error.
    #[track_caller]
    pub fn must_parse<T: Into<String>>(source: T) -> Self {
        match Self::parse(source) {
            Ok(template) => template,
            Err(err) => panic!("{err}"),
        }
    }

    /// Reads and parses the template at `path`.
    ///
    /// # Errors
    ///
    /// `WhiskersError::Io` if the file cannot be read, `WhiskersError::Parse`
    /// if its content does not parse.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> WhiskersResult<Self> {
        Self::parse(read_source(path.as_ref())?)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_unescaped(&self) -> bool {
        self.unescaped
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn is_parsed(&self) -> bool {
        read_lock(&self.tree).is_some()
    }

    /// The parsed tree, parsing on first call.
    ///
    /// A failed parse leaves the template unparsed, so the next call parses
    /// again.
    ///
    /// # Errors
    ///
    /// Returns a `WhiskersError::Parse` error if the template syntax is invalid.
    pub fn tree(&self) -> WhiskersResult<SharedProgram> {
        if let Some(tree) = read_lock(&self.tree).as_ref() {
            return Ok(Arc::clone(tree));
        }

        let mut slot = write_lock(&self.tree);
        if let Some(tree) = slot.as_ref() {
            return Ok(Arc::clone(tree));
        }
        debug!(bytes = self.source.len(), "parsing template");
        let tree = Arc::new(RwLock::new(parse(&self.source, self.unescaped)?));
        *slot = Some(Arc::clone(&tree));
        Ok(tree)
    }

    /// A copy with its own tree, so renaming one never affects the other.
    pub fn fork(&self) -> Self {
        let tree = read_lock(&self.tree)
            .as_ref()
            .map(|tree| Arc::new(RwLock::new(read_lock(tree).clone())));
        Self {
            tree: Arc::new(RwLock::new(tree)),
            ..self.clone()
        }
    }

    // --- Helpers ---

    /// Registers a helper on this template only.
    ///
    /// # Panics
    ///
    /// If `name` is already registered on this template.
    #[track_caller]
    pub fn register_helper<N: Into<String>, H: Helper + 'static>(&self, name: N, helper: H) {
        fatal_on_conflict(self.try_register_helper(name, helper));
    }

    /// Like [`register_helper`](Self::register_helper), returning the conflict
    /// instead of panicking.
    pub fn try_register_helper<N: Into<String>, H: Helper + 'static>(
        &self,
        name: N,
        helper: H,
    ) -> WhiskersResult<()> {
        let name = name.into();
        debug!(helper = %name, "registering helper");
        insert_unique(
            &mut write_lock(&self.registrations).helpers,
            RegistrationKind::Helper,
            name,
            Arc::new(helper) as HelperRef,
        )
    }

    /// # Panics
    ///
    /// If any name is already registered. Earlier entries stay registered.
    #[track_caller]
    pub fn register_helpers<I, N, H>(&self, helpers: I)
    where
        I: IntoIterator<Item = (N, H)>,
        N: Into<String>,
        H: Helper + 'static,
    {
        for (name, helper) in helpers {
            self.register_helper(name, helper);
        }
    }

    /// Looks `name` up on this template, then in its registry.
    pub fn find_helper(&self, name: &str) -> Option<HelperRef> {
        let local = read_lock(&self.registrations).helpers.get(name).cloned();
        local.or_else(|| self.registry.find_helper(name))
    }

    pub fn has_helper(&self, name: &str) -> bool {
        read_lock(&self.registrations).helpers.contains_key(name) || self.registry.has_helper(name)
    }

    // --- Partials ---

    /// Registers a partial on this template only. It inherits this
    /// template's unescaped flag.
    ///
    /// # Panics
    ///
    /// If `name` is already registered on this template.
    #[track_caller]
    pub fn register_partial<N: Into<String>, S: Into<String>>(&self, name: N, source: S) {
        fatal_on_conflict(self.try_register_partial(name, source));
    }

    pub fn try_register_partial<N: Into<String>, S: Into<String>>(
        &self,
        name: N,
        source: S,
    ) -> WhiskersResult<()> {
        let name = name.into();
        let partial = Partial::from_source(name.clone(), source.into(), self.unescaped);
        self.add_partial(name, partial)
    }

    /// # Panics
    ///
    /// If any name is already registered. Earlier entries stay registered.
    #[track_caller]
    pub fn register_partials<I, N, S>(&self, partials: I)
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: Into<String>,
    {
        for (name, source) in partials {
            self.register_partial(name, source);
        }
    }

    /// Registers an already parsed template as a partial.
    ///
    /// # Panics
    ///
    /// If `name` is already registered on this template.
    #[track_caller]
    pub fn register_partial_template<N: Into<String>, T: Into<Arc<Template>>>(
        &self,
        name: N,
        template: T,
    ) {
        let name = name.into();
        let partial = Partial::from_template(name.clone(), template.into());
        fatal_on_conflict(self.add_partial(name, partial));
    }

    /// Reads `path` and registers its content under `name`.
    ///
    /// # Errors
    ///
    /// `WhiskersError::Io` if the file cannot be read.
    ///
    /// # Panics
    ///
    /// If `name` is already registered on this template.
    #[track_caller]
    pub fn register_partial_file<P: AsRef<Path>, N: Into<String>>(
        &self,
        path: P,
        name: N,
    ) -> WhiskersResult<()> {
        let source = read_source(path.as_ref())?;
        self.register_partial(name, source);
        Ok(())
    }

    /// Registers every file under its base name, without extension:
    /// `partials/header.hbs` becomes `header`.
    ///
    /// # Errors
    ///
    /// On the first file that cannot be read.
    #[track_caller]
    pub fn register_partial_files<I, P>(&self, paths: I) -> WhiskersResult<()>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for path in paths {
            let path = path.as_ref();
            self.register_partial_file(path, file_base(path))?;
        }
        Ok(())
    }

    /// Looks `name` up on this template, then in its registry.
    pub fn find_partial(&self, name: &str) -> Option<Arc<Partial>> {
        let local = read_lock(&self.registrations).partials.get(name).cloned();
        local.or_else(|| self.registry.find_partial(name))
    }

    fn add_partial(&self, name: String, partial: Partial) -> WhiskersResult<()> {
        debug!(partial = %name, "registering partial");
        insert_unique(
            &mut write_lock(&self.registrations).partials,
            RegistrationKind::Partial,
            name,
            Arc::new(partial),
        )
    }

    // --- Passes ---

    /// Renders the template with `context`.
    ///
    /// # Errors
    ///
    /// A parse error, or the first error raised by the evaluator or by a
    /// helper. A panicking helper is not caught and unwinds through this call.
    pub fn exec(&self, context: &Value) -> WhiskersResult<String> {
        self.exec_with(context, None)
    }

    /// Renders the template with `context` and a private `@data` frame.
    pub fn exec_with(&self, context: &Value, data: Option<&DataFrame>) -> WhiskersResult<String> {
        let tree = self.tree()?;
        let program = read_lock(&tree);
        evaluate(self, &program, context, data)
    }

    /// Renders the template, panicking on error.
    #[track_caller]
    pub fn must_exec(&self, context: &Value) -> String {
        match self.exec(context) {
            Ok(output) => output,
            Err(err) => panic!("{err}"),
        }
    }

    /// Checks every top-level field reference against `names`.
    ///
    /// References inside block bodies, and in a block's own opening tag, are
    /// not checked. Helper names, literals and partial arguments are skipped.
    ///
    /// # Example
    ///
    /// ```
    /// use whiskers::Template;
    ///
    /// let template = Template::parse("{{user.[first name]}}").unwrap();
    /// assert!(template.validate(["user.first name"]).is_ok());
    /// assert!(template.validate(["account"]).is_err());
    /// ```
    ///
    /// # Errors
    ///
    /// A parse error, or `WhiskersError::InvalidReference` for the first
    /// unknown reference.
    pub fn validate<I, S>(&self, names: I) -> WhiskersResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let known: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        let tree = self.tree()?;
        let program = read_lock(&tree);
        validate::validate(&program, &known, |name| self.has_helper(name))
    }

    /// Rewrites field references in place through `mapping`.
    ///
    /// The tree is shared with every clone of this template; they all see the
    /// result.
    ///
    /// # Errors
    ///
    /// A parse error.
    pub fn rename<I, K, V>(&self, mapping: I) -> WhiskersResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let tree = self.tree()?;
        let mut program = write_lock(&tree);
        debug!("renaming template references");
        rename::rename(&mut program, mapping, |name| self.has_helper(name))
    }

    /// Approximate source text of the tree. See [`print::print`].
    pub fn print(&self) -> String {
        match self.tree() {
            Ok(tree) => print::print(&read_lock(&tree)),
            Err(err) => format!("PARSER ERROR: {err}"),
        }
    }

    /// Structural dump of the tree. See [`print::print_ast`].
    pub fn print_ast(&self) -> String {
        match self.tree() {
            Ok(tree) => print::print_ast(&read_lock(&tree)),
            Err(err) => format!("PARSER ERROR: {err}"),
        }
    }
}
