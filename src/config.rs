//! JSON configuration: which leaf calls seed the refactoring, what the context
//! parameter looks like, and where propagation must not go.
//!
//! The raw file deserializes into [`RawConfig`] (PascalCase keys, list-shaped
//! entries); [`Config::from_raw`] validates it and builds the lookup maps and
//! derived qualified names the analysis matches against.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::errors::EngineError;

/// Placeholder for the context parameter name visible in the enclosing
/// function.
pub const CTX_WILDCARD: &str = "<CTX>";
/// Placeholder for the name of a custom-context parameter inside the
/// configured extraction expression.
pub const CTX_CUSTOM_WILDCARD: &str = "<CTX_CUSTOM>";
/// Placeholder for the package qualifier of the context package, resolved per
/// rewritten file.
pub const CTX_PREF_WILDCARD: &str = "<CTX_PREF>";
/// Placeholder for the alias of a per-leaf additional import.
pub const ALIAS1_WILDCARD: &str = "<ALIAS1>";

/// Everything needed to rewrite one call site: optional rename, where the
/// context argument goes, extra imports, and the context expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replacement {
    /// New callee name, when the leaf is renamed at rewritten call sites.
    pub new_name: Option<String>,
    /// 1-based argument position; zero or negative appends as the last
    /// argument.
    pub arg_pos: i32,
    /// Additional imports (path, optional alias) referenced by the context
    /// expression. At most one entry is supported.
    pub imports: Vec<(String, Option<String>)>,
    /// Context expression template, with wildcards still in place.
    pub template: Option<String>,
    /// Template with `<CTX>` already substituted, when the enclosing function
    /// binds the context under a non-canonical name. `None` means "resolve
    /// against the canonical parameter name at rewrite time".
    pub expr: Option<String>,
}

impl Replacement {
    /// The replacement used for ordinary propagated call sites: context goes
    /// first and the expression is the parameter itself.
    fn common() -> Self {
        Replacement { arg_pos: 1, ..Default::default() }
    }
}

// ---- raw JSON shapes ----

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct RecvSpec {
    pub pkg_path: String,
    pub pkg_name: String,
    #[serde(rename = "Type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct ImportSpec {
    pub import: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct LeafSpec {
    pub name: String,
    pub recv: Option<RecvSpec>,
    pub new_name: Option<String>,
    pub arg_pos: Option<i32>,
    pub ctx_imports: Option<Vec<ImportSpec>>,
    pub ctx_expr: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct FnSpec {
    pub name: String,
    pub pkg_path: String,
    pub pkg_name: String,
    pub recv: Option<RecvSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct TypeSpec {
    pub name: String,
    pub pkg_path: String,
    pub pkg_name: String,
}

/// The configuration file as written, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawConfig {
    pub ctx_pkg_path: String,
    pub ctx_pkg_name: String,
    pub ctx_pkg_alias: String,
    pub ctx_param_name: String,
    pub ctx_param_type: String,
    pub ctx_param_invalid: String,

    pub lib_pkg_path: String,
    pub lib_pkg_name: String,
    pub lib_iface: String,
    pub lib_fns: Vec<LeafSpec>,

    pub ctx_custom_pkg_path: String,
    pub ctx_custom_pkg_name: String,
    pub ctx_custom_param_type: String,
    pub ctx_custom_expr_extract: String,

    pub ext_pkg_paths: Vec<String>,
    pub ext_embed_types: Vec<TypeSpec>,
    pub propagation_stops: Vec<FnSpec>,
    pub load_paths: Vec<String>,
}

/// Validated configuration plus everything derived from it once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub ctx_pkg_path: String,
    pub ctx_pkg_name: String,
    pub ctx_pkg_alias: String,
    pub ctx_param_name: String,
    pub ctx_param_type: String,
    pub ctx_param_invalid: String,

    pub lib_pkg_path: String,
    pub lib_pkg_name: String,
    pub lib_iface: String,

    pub ctx_custom_expr_extract: String,

    pub ext_pkg_paths: Vec<String>,
    pub load_paths: Vec<String>,

    /// Leaf name -> qualified receiver ("" for plain functions) -> replacement.
    pub leaf_fns: HashMap<String, HashMap<String, Replacement>>,
    /// Stop name -> qualified receiver -> (pkg path, pkg name) pairs.
    pub propagation_stops: HashMap<String, HashMap<String, Vec<(String, String)>>>,
    /// Embedded external type name -> (pkg path, pkg name) pairs.
    pub ext_embed_types: HashMap<String, Vec<(String, String)>>,

    /// Context type qualified with its package path and name.
    pub ctx_type_qualified: String,
    /// Custom context type, qualified, when a custom context is configured.
    pub ctx_custom_type_qualified: Option<String>,

    /// Replacement for ordinary propagated call sites.
    pub common_replacement: Replacement,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Config, EngineError> {
        let text =
            std::fs::read_to_string(path).map_err(|e| EngineError::io(path.to_path_buf(), e))?;
        Config::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Config, EngineError> {
        let raw: RawConfig = serde_json::from_str(text)
            .map_err(|e| EngineError::config(format!("malformed configuration: {e}")))?;
        Config::from_raw(raw)
    }

    pub fn from_raw(raw: RawConfig) -> Result<Config, EngineError> {
        if raw.ctx_param_invalid.is_empty() {
            return Err(EngineError::config(
                "artificial context expression (CtxParamInvalid) must be specified",
            ));
        }

        let custom_fields = [
            &raw.ctx_custom_pkg_path,
            &raw.ctx_custom_pkg_name,
            &raw.ctx_custom_param_type,
            &raw.ctx_custom_expr_extract,
        ];
        let custom_set = custom_fields.iter().filter(|f| !f.is_empty()).count();
        if custom_set != 0 && custom_set != custom_fields.len() {
            return Err(EngineError::config(
                "either all or none of the custom context options should be specified",
            ));
        }

        let ctx_type_qualified =
            qualified_type(&raw.ctx_param_type, &raw.ctx_pkg_path, &raw.ctx_pkg_name)?;
        let ctx_custom_type_qualified = if custom_set > 0 {
            Some(qualified_type(
                &raw.ctx_custom_param_type,
                &raw.ctx_custom_pkg_path,
                &raw.ctx_custom_pkg_name,
            )?)
        } else {
            None
        };

        let mut leaf_fns: HashMap<String, HashMap<String, Replacement>> = HashMap::new();
        for leaf in &raw.lib_fns {
            let recv = qualified_recv(&leaf.recv)?;
            let replacement = Replacement {
                new_name: leaf.new_name.clone().filter(|n| !n.is_empty()),
                arg_pos: leaf.arg_pos.unwrap_or(1),
                imports: leaf
                    .ctx_imports
                    .as_deref()
                    .unwrap_or_default()
                    .iter()
                    .map(|i| (i.import.clone(), i.alias.clone().filter(|a| !a.is_empty())))
                    .collect(),
                template: leaf.ctx_expr.clone().filter(|e| !e.is_empty()),
                expr: None,
            };
            leaf_fns.entry(leaf.name.clone()).or_default().insert(recv, replacement);
        }

        let mut propagation_stops: HashMap<String, HashMap<String, Vec<(String, String)>>> =
            HashMap::new();
        for stop in &raw.propagation_stops {
            let recv = qualified_recv(&stop.recv)?;
            propagation_stops
                .entry(stop.name.clone())
                .or_default()
                .entry(recv)
                .or_default()
                .push((stop.pkg_path.clone(), stop.pkg_name.clone()));
        }

        let mut ext_embed_types: HashMap<String, Vec<(String, String)>> = HashMap::new();
        for t in &raw.ext_embed_types {
            ext_embed_types
                .entry(t.name.clone())
                .or_default()
                .push((t.pkg_path.clone(), t.pkg_name.clone()));
        }

        Ok(Config {
            ctx_pkg_path: raw.ctx_pkg_path,
            ctx_pkg_name: raw.ctx_pkg_name,
            ctx_pkg_alias: raw.ctx_pkg_alias,
            ctx_param_name: raw.ctx_param_name,
            ctx_param_type: raw.ctx_param_type,
            ctx_param_invalid: raw.ctx_param_invalid,
            lib_pkg_path: raw.lib_pkg_path,
            lib_pkg_name: raw.lib_pkg_name,
            lib_iface: raw.lib_iface,
            ctx_custom_expr_extract: raw.ctx_custom_expr_extract,
            ext_pkg_paths: raw.ext_pkg_paths,
            load_paths: raw.load_paths,
            leaf_fns,
            propagation_stops,
            ext_embed_types,
            ctx_type_qualified,
            ctx_custom_type_qualified,
            common_replacement: Replacement::common(),
        })
    }

    /// A package is external when its path starts with the context package
    /// path, the leaf library path, or any configured external prefix.
    /// External packages are never rewritten.
    pub fn is_pkg_external(&self, pkg_path: &str) -> bool {
        pkg_path.starts_with(&self.ctx_pkg_path)
            || pkg_path.starts_with(&self.lib_pkg_path)
            || self.ext_pkg_paths.iter().any(|p| pkg_path.starts_with(p))
    }

    /// Whether upward propagation must stop at the given function.
    pub fn is_propagation_stop(
        &self,
        fn_name: &str,
        recv: &str,
        pkg_path: &str,
        pkg_name: &str,
    ) -> bool {
        self.propagation_stops
            .get(fn_name)
            .and_then(|recvs| recvs.get(recv))
            .map(|pkgs| pkgs.iter().any(|(p, n)| p == pkg_path && n == pkg_name))
            .unwrap_or(false)
    }

    /// Whether the given named type matches a configured embedded external
    /// type.
    pub fn is_ext_embed_type(&self, type_name: &str, pkg_path: &str, pkg_name: &str) -> bool {
        self.ext_embed_types
            .get(type_name)
            .map(|pkgs| pkgs.iter().any(|(p, n)| p == pkg_path && n == pkg_name))
            .unwrap_or(false)
    }
}

/// Substitute a wildcard in a context expression template. An empty template
/// stands for the context value itself.
pub fn substitute(wildcard: &str, template: &str, value: &str) -> String {
    if template.is_empty() {
        return value.to_string();
    }
    if template.contains(wildcard) {
        return template.replace(wildcard, value);
    }
    template.to_string()
}

/// Render a type name qualified with its package path and name, keeping a
/// single leading `*` for pointer types.
pub fn qualified_type(
    type_name: &str,
    pkg_path: &str,
    pkg_name: &str,
) -> Result<String, EngineError> {
    if type_name.is_empty() {
        return Err(EngineError::config("unexpected empty type in configuration"));
    }
    if let Some(inner) = type_name.strip_prefix('*') {
        if inner.starts_with('*') {
            return Err(EngineError::config(
                "unexpected multiple level pointer type in configuration",
            ));
        }
        return Ok(format!("*{pkg_path}{pkg_name}.{inner}"));
    }
    Ok(format!("{pkg_path}{pkg_name}.{type_name}"))
}

fn qualified_recv(recv: &Option<RecvSpec>) -> Result<String, EngineError> {
    match recv {
        None => Ok(String::new()),
        Some(r) => qualified_type(&r.type_name, &r.pkg_path, &r.pkg_name),
    }
}
