//! The transformation engine: applies the decision tables to each file's AST.
//!
//! Files are processed once each, sequentially; all cross-file knowledge
//! lives in the read-only plan. A file either comes out fully rewritten or
//! untouched.

mod apply;

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::analysis::RewritePlan;
use crate::config::Config;
use crate::errors::EngineError;
use crate::model::ast::{ImportDecl, SourceFile};
use crate::model::Program;
use crate::span::FileTableId;
use crate::warnings::WarningSink;

use apply::FileRewriter;

/// A file the engine changed, ready to be printed and written by the caller.
#[derive(Debug, Clone)]
pub struct RewrittenFile {
    /// Index into `Program::files`.
    pub file_index: usize,
    pub path: String,
    pub ast: SourceFile,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RewriteStats {
    pub iface_decls_modified: usize,
    pub iface_methods_modified: usize,
    pub named_modified: usize,
    pub params_modified: usize,
    pub calls_modified: usize,
    pub sigs_modified: usize,
    pub defs_modified: usize,
    pub imports_added: usize,
}

/// Per-file state reset before each AST is processed.
#[derive(Debug)]
pub(crate) struct FileContext {
    pub table: FileTableId,
    /// Import path -> alias, as written in the file today.
    pub existing_imports: HashMap<String, Option<String>>,
    /// Imports required by injected code.
    pub new_imports: BTreeMap<String, Option<String>>,
    /// Package qualifier for the context package as visible in this file.
    pub ctx_prefix: String,
    /// Context parameter type as spelled in this file.
    pub ctx_type_text: String,
    /// Artificial context expression as spelled in this file.
    pub artificial_expr: String,
    pub modified: bool,
}

impl FileContext {
    fn new(file: &SourceFile, config: &Config) -> Self {
        let existing_imports: HashMap<String, Option<String>> = file
            .imports
            .iter()
            .map(|imp| (imp.path.clone(), imp.alias.clone()))
            .collect();

        // the spelling of everything injected depends on how this file
        // imports the context package
        let ctx_prefix = match existing_imports.get(&config.ctx_pkg_path) {
            Some(Some(alias)) => alias.clone(),
            Some(None) => config.ctx_pkg_name.clone(),
            None => {
                if config.ctx_pkg_alias.is_empty() {
                    config.ctx_pkg_name.clone()
                } else {
                    config.ctx_pkg_alias.clone()
                }
            }
        };
        let ctx_type_text = format!("{ctx_prefix}.{}", config.ctx_param_type);
        let artificial_expr = format!("{ctx_prefix}.{}", config.ctx_param_invalid);

        FileContext {
            table: file.table,
            existing_imports,
            new_imports: BTreeMap::new(),
            ctx_prefix,
            ctx_type_text,
            artificial_expr,
            modified: false,
        }
    }
}

/// Apply the plan to every non-external file, returning the rewritten ones.
pub fn transform(
    program: &Program,
    config: &Config,
    plan: &RewritePlan,
    warnings: &mut WarningSink,
) -> Result<Vec<RewrittenFile>, EngineError> {
    let mut results = Vec::new();
    let mut visited_files: HashSet<String> = HashSet::new();
    let mut stats = RewriteStats::default();

    for (index, file) in program.files.iter().enumerate() {
        if config.is_pkg_external(&program.pkg(file.pkg).path) {
            continue;
        }
        // duplicate load paths could hand us the same file twice, and a
        // second pass over an already-rewritten AST would corrupt it
        if !visited_files.insert(file.path.clone()) {
            continue;
        }

        let mut ast = file.clone();
        let mut ctx = FileContext::new(&ast, config);
        {
            let mut rewriter = FileRewriter {
                program,
                config,
                plan,
                warnings: &mut *warnings,
                ctx: &mut ctx,
                stats: &mut stats,
            };
            rewriter.rewrite_file(&mut ast)?;
        }

        if ctx.modified {
            if add_imports(&mut ast, config, &ctx) {
                stats.imports_added += 1;
            }
            results.push(RewrittenFile { file_index: index, path: ast.path.clone(), ast });
        }
    }

    tracing::debug!(
        iface_decls = stats.iface_decls_modified,
        iface_methods = stats.iface_methods_modified,
        named = stats.named_modified,
        params = stats.params_modified,
        calls = stats.calls_modified,
        sigs = stats.sigs_modified,
        defs = stats.defs_modified,
        imports = stats.imports_added,
        "rewrite complete"
    );

    Ok(results)
}

/// Add the context package import (if missing) and any imports required by
/// injected call expressions. Never duplicates an existing import.
fn add_imports(ast: &mut SourceFile, config: &Config, ctx: &FileContext) -> bool {
    let mut added = false;
    let mut have: HashSet<String> = ast.imports.iter().map(|i| i.path.clone()).collect();

    if !have.contains(&config.ctx_pkg_path) {
        let alias = if config.ctx_pkg_alias.is_empty() {
            None
        } else {
            Some(config.ctx_pkg_alias.clone())
        };
        ast.imports.push(ImportDecl { path: config.ctx_pkg_path.clone(), alias });
        have.insert(config.ctx_pkg_path.clone());
        added = true;
    }
    for (path, alias) in &ctx.new_imports {
        if have.contains(path) {
            continue;
        }
        ast.imports.push(ImportDecl { path: path.clone(), alias: alias.clone() });
        have.insert(path.clone());
        added = true;
    }
    added
}
