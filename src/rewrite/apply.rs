//! The per-file AST walk realising the §rewrite rules: parameter injection,
//! argument insertion, callee renames, artificial bindings, and parameter
//! renames. Handlers replace nodes wholesale; nothing is patched in place
//! through shared references.

use crate::analysis::{CallSiteRewrite, FnClass, RewritePlan};
use crate::config::{substitute, Config, Replacement, ALIAS1_WILDCARD, CTX_PREF_WILDCARD, CTX_WILDCARD};
use crate::errors::EngineError;
use crate::model::ast::{
    Block, CallExpr, Decl, Expr, Field, FieldList, FuncDecl, FuncLit, FuncType, Ident, SourceFile,
    Stmt, TypeDecl, TypeExpr,
};
use crate::model::Program;
use crate::span::{Pos, SiteKey};
use crate::warnings::WarningSink;

use super::{FileContext, RewriteStats};

pub(crate) struct FileRewriter<'a> {
    pub(super) program: &'a Program,
    pub(super) config: &'a Config,
    pub(super) plan: &'a RewritePlan,
    pub(super) warnings: &'a mut WarningSink,
    pub(super) ctx: &'a mut FileContext,
    pub(super) stats: &'a mut RewriteStats,
}

impl<'a> FileRewriter<'a> {
    fn key(&self, pos: Pos) -> SiteKey {
        self.program.site_key_in(self.ctx.table, pos)
    }

    fn class_at(&self, pos: Pos) -> Option<FnClass> {
        self.plan.fn_classes.get(&self.key(pos)).copied()
    }

    fn location(&self, pos: Pos) -> String {
        match self.program.positions.lookup(self.key(pos)) {
            Some(loc) => format!("{}:{}", loc.path, loc.line),
            None => "<unknown>".to_string(),
        }
    }

    pub(super) fn rewrite_file(&mut self, file: &mut SourceFile) -> Result<(), EngineError> {
        for decl in &mut file.decls {
            match decl {
                Decl::Func(fd) => self.rewrite_func_decl(fd)?,
                Decl::Type(td) => self.rewrite_type_decl(td)?,
            }
        }
        Ok(())
    }

    fn rewrite_func_decl(&mut self, fd: &mut FuncDecl) -> Result<(), EngineError> {
        match self.class_at(fd.name.pos) {
            Some(FnClass::Regular) => {
                self.add_context_param(&mut fd.sig.params);
                self.ctx.modified = true;
                self.stats.sigs_modified += 1;
            }
            Some(FnClass::FreshCtx) => {
                let name_pos = fd.name.pos;
                let Some(body) = fd.body.as_mut() else {
                    return Err(EngineError::rewrite(format!(
                        "adding artificial context to function declaration with no body at {}",
                        self.location(name_pos)
                    )));
                };
                let binding = self.context_init_stmt(name_pos);
                body.stmts.insert(0, binding);
                self.ctx.modified = true;
                self.stats.defs_modified += 1;
            }
            _ => {}
        }

        self.rewrite_func_type(&mut fd.sig);
        if let Some(body) = fd.body.as_mut() {
            self.rewrite_block(body)?;
        }
        Ok(())
    }

    fn rewrite_type_decl(&mut self, td: &mut TypeDecl) -> Result<(), EngineError> {
        match &mut td.ty {
            TypeExpr::Func(ft) => {
                if self.class_at(td.name.pos) == Some(FnClass::Regular) {
                    Self::insert_context_field(
                        &mut ft.params,
                        &self.ctx.ctx_type_text,
                        &self.config.ctx_param_name,
                    );
                    self.ctx.modified = true;
                    self.stats.named_modified += 1;
                }
            }
            TypeExpr::Interface(iface) => {
                let mut decl_modified = false;
                for field in &mut iface.methods.fields {
                    if field.names.is_empty() {
                        // embedded interface, nothing declared here
                        continue;
                    }
                    if self.plan.fn_classes.get(&self.key(field.pos)).copied()
                        == Some(FnClass::Regular)
                    {
                        Self::add_param_to_type_expr(
                            &mut field.ty,
                            &self.ctx.ctx_type_text,
                            &self.config.ctx_param_name,
                        );
                        self.ctx.modified = true;
                        self.stats.iface_methods_modified += 1;
                        decl_modified = true;
                    }
                    if let TypeExpr::Func(ft) = &mut field.ty {
                        self.rewrite_func_type(ft);
                    }
                }
                if decl_modified {
                    self.stats.iface_decls_modified += 1;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Parameter-list rules that apply inside any function type: inject the
    /// context parameter into function-typed parameters recorded by the
    /// analysis, and give anonymous or underscore context parameters the
    /// canonical name.
    fn rewrite_func_type(&mut self, ft: &mut FuncType) {
        for field in &mut ft.params.fields {
            if self.plan.fn_params_modified.contains(&self.key(field.pos)) {
                Self::add_param_to_type_expr(
                    &mut field.ty,
                    &self.ctx.ctx_type_text,
                    &self.config.ctx_param_name,
                );
                self.ctx.modified = true;
                self.stats.params_modified += 1;
            }
            if self.plan.param_renames.contains(&self.key(field.pos)) {
                if field.names.is_empty() {
                    field.names = vec![Ident::new(self.config.ctx_param_name.clone(), field.pos)];
                } else {
                    let pos = field.names[0].pos;
                    field.names[0] = Ident::new(self.config.ctx_param_name.clone(), pos);
                }
                self.ctx.modified = true;
            }
            if let TypeExpr::Func(inner) = &mut field.ty {
                self.rewrite_func_type(inner);
            }
        }
    }

    fn rewrite_block(&mut self, block: &mut Block) -> Result<(), EngineError> {
        for stmt in &mut block.stmts {
            match stmt {
                Stmt::Expr(e) => self.rewrite_expr(e, None)?,
                Stmt::Assign { lhs, rhs, .. } => {
                    for e in lhs.iter_mut().chain(rhs.iter_mut()) {
                        self.rewrite_expr(e, None)?;
                    }
                }
                Stmt::Return { exprs, .. } => {
                    for e in exprs {
                        self.rewrite_expr(e, None)?;
                    }
                }
                // spawned and deferred calls are keyed by the keyword
                // position, not the call's own parenthesis
                Stmt::Spawn { call, pos } | Stmt::Defer { call, pos } => {
                    let pos = *pos;
                    self.rewrite_expr(call, Some(pos))?;
                }
            }
        }
        Ok(())
    }

    fn rewrite_expr(&mut self, expr: &mut Expr, parent_pos: Option<Pos>) -> Result<(), EngineError> {
        match expr {
            Expr::Call(call) => {
                self.rewrite_call(call, parent_pos)?;
                self.rewrite_expr(&mut call.fun, None)?;
                for arg in &mut call.args {
                    self.rewrite_expr(arg, None)?;
                }
            }
            Expr::FuncLit(fl) => self.rewrite_func_lit(fl)?,
            Expr::Selector { base, .. } => self.rewrite_expr(base, None)?,
            Expr::Index { base, index } => {
                self.rewrite_expr(base, None)?;
                self.rewrite_expr(index, None)?;
            }
            Expr::Unary { operand, .. } => self.rewrite_expr(operand, None)?,
            Expr::Binary { lhs, rhs, .. } => {
                self.rewrite_expr(lhs, None)?;
                self.rewrite_expr(rhs, None)?;
            }
            Expr::StructLit { fields, .. } => {
                for (_, e) in fields {
                    self.rewrite_expr(e, None)?;
                }
            }
            Expr::MapLit { entries, .. } => {
                for (k, v) in entries {
                    self.rewrite_expr(k, None)?;
                    self.rewrite_expr(v, None)?;
                }
            }
            Expr::SliceLit { elems, .. } => {
                for e in elems {
                    self.rewrite_expr(e, None)?;
                }
            }
            Expr::Ident(_) | Expr::Raw { .. } => {}
        }
        Ok(())
    }

    fn rewrite_func_lit(&mut self, fl: &mut FuncLit) -> Result<(), EngineError> {
        match self.class_at(fl.sig.pos) {
            Some(FnClass::Regular) => {
                self.add_context_param(&mut fl.sig.params);
                self.ctx.modified = true;
                self.stats.sigs_modified += 1;
            }
            Some(FnClass::FreshCtx) => {
                let binding = self.context_init_stmt(fl.sig.pos);
                fl.body.stmts.insert(0, binding);
                self.ctx.modified = true;
                self.stats.defs_modified += 1;
            }
            _ => {}
        }
        self.rewrite_func_type(&mut fl.sig);
        self.rewrite_block(&mut fl.body)
    }

    /// Rename the callee and insert the context argument at one call site.
    fn rewrite_call(
        &mut self,
        call: &mut CallExpr,
        parent_pos: Option<Pos>,
    ) -> Result<(), EngineError> {
        let key_pos = parent_pos.unwrap_or(call.lparen);
        let key = self.key(key_pos);

        if let Some(new_name) = self.plan.call_renames.get(&key) {
            match call.fun.as_mut() {
                Expr::Selector { sel, .. } => {
                    *sel = Ident::new(new_name.clone(), sel.pos);
                }
                Expr::Ident(id) => {
                    *id = Ident::new(new_name.clone(), id.pos);
                }
                _ => {
                    return Err(EngineError::rewrite(format!(
                        "unrecognized call expression when rewriting AST at {}",
                        self.location(key_pos)
                    )));
                }
            }
            self.ctx.modified = true;
        }

        let Some(rewrite) = self.plan.call_sites.get(&key) else {
            return Ok(());
        };
        let (expr_text, arg_pos) = match rewrite {
            CallSiteRewrite::Artificial => (self.ctx.artificial_expr.clone(), 1),
            CallSiteRewrite::Arg(repl) => {
                let resolved = self.resolve_ctx_expr(repl)?;
                (substitute(CTX_PREF_WILDCARD, &resolved, &self.ctx.ctx_prefix), repl.arg_pos)
            }
        };

        if call.args.is_empty() {
            if arg_pos != 1 {
                let msg = "requesting to put a context argument in a position other than the first one for a parameter-less function - defaulting to first position";
                self.warnings.push(&self.program.positions, key, msg);
            }
            call.args.push(Expr::Raw { text: expr_text, pos: call.lparen });
        } else {
            let index = if arg_pos < 1 {
                // zero or negative position appends as the last argument
                call.args.len()
            } else {
                let index = (arg_pos - 1) as usize;
                if index > call.args.len() {
                    return Err(EngineError::rewrite(format!(
                        "requesting to put a context argument in a position beyond the last function parameter at {}",
                        self.location(key_pos)
                    )));
                }
                index
            };
            call.args.insert(index, Expr::Raw { text: expr_text, pos: call.lparen });
        }
        self.ctx.modified = true;
        self.stats.calls_modified += 1;
        Ok(())
    }

    /// Resolve a replacement's context expression: substitute `<CTX>` with
    /// the canonical name when the analysis left it unresolved, then satisfy
    /// the replacement's additional import, filling `<ALIAS1>` from the alias
    /// actually visible in this file.
    fn resolve_ctx_expr(&mut self, repl: &Replacement) -> Result<String, EngineError> {
        if repl.imports.len() > 1 {
            return Err(EngineError::config(
                "only one additional import per leaf call is supported",
            ));
        }
        let expr = match &repl.expr {
            Some(resolved) => resolved.clone(),
            None => substitute(
                CTX_WILDCARD,
                repl.template.as_deref().unwrap_or(""),
                &self.config.ctx_param_name,
            ),
        };
        let Some((path, alias)) = repl.imports.first() else {
            return Ok(expr);
        };

        let needs_alias = expr.contains(ALIAS1_WILDCARD);
        match self.ctx.existing_imports.get(path) {
            Some(existing_alias) => {
                if needs_alias {
                    match existing_alias {
                        // the file already aliases the import, reuse it
                        Some(a) => {
                            self.ctx.new_imports.insert(path.clone(), Some(a.clone()));
                            Ok(substitute(ALIAS1_WILDCARD, &expr, a))
                        }
                        None => match alias {
                            Some(a) => {
                                self.ctx.new_imports.insert(path.clone(), Some(a.clone()));
                                Ok(substitute(ALIAS1_WILDCARD, &expr, a))
                            }
                            None => Err(EngineError::config(
                                "alias placeholder used in a context expression without an alias being defined",
                            )),
                        },
                    }
                } else {
                    if let Some(a) = alias {
                        self.ctx.new_imports.insert(path.clone(), Some(a.clone()));
                    }
                    Ok(expr)
                }
            }
            None => {
                if needs_alias {
                    match alias {
                        Some(a) => {
                            self.ctx.new_imports.insert(path.clone(), Some(a.clone()));
                            Ok(substitute(ALIAS1_WILDCARD, &expr, a))
                        }
                        None => Err(EngineError::config(
                            "alias placeholder used in a context expression without an alias being defined",
                        )),
                    }
                } else {
                    self.ctx.new_imports.insert(path.clone(), alias.clone());
                    Ok(expr)
                }
            }
        }
    }

    /// `ctx := <artificial>` pinned to the signature position so the printer
    /// cannot split it from a trailing comment.
    fn context_init_stmt(&self, sig_pos: Pos) -> Stmt {
        Stmt::Assign {
            lhs: vec![Expr::Ident(Ident::new(self.config.ctx_param_name.clone(), sig_pos))],
            rhs: vec![Expr::Raw { text: self.ctx.artificial_expr.clone(), pos: sig_pos }],
            define: true,
            pos: sig_pos,
        }
    }

    fn add_context_param(&mut self, params: &mut FieldList) {
        Self::insert_context_field(params, &self.ctx.ctx_type_text, &self.config.ctx_param_name);
    }

    /// Find the parameter list of the first function type inside a type
    /// expression and inject the context parameter there.
    fn add_param_to_type_expr(ty: &mut TypeExpr, ctx_type_text: &str, ctx_param_name: &str) {
        match ty {
            TypeExpr::Func(ft) => {
                Self::insert_context_field(&mut ft.params, ctx_type_text, ctx_param_name);
            }
            TypeExpr::Pointer(inner) | TypeExpr::Slice(inner) => {
                Self::add_param_to_type_expr(inner, ctx_type_text, ctx_param_name);
            }
            _ => {}
        }
    }

    /// Insert the context parameter first in a parameter list. A non-empty
    /// list with named entries gets a named field; anonymous entries get an
    /// anonymous one, since the two forms cannot be mixed.
    fn insert_context_field(params: &mut FieldList, ctx_type_text: &str, ctx_param_name: &str) {
        if params.fields.is_empty() {
            params.fields.push(Field {
                names: vec![Ident::new(ctx_param_name, params.closing)],
                // pin the type to the closing paren so the printer does not
                // place a stray comma
                ty: TypeExpr::Name(Ident::new(ctx_type_text, params.closing)),
                pos: params.closing,
            });
            return;
        }
        let first_pos = params.fields[0].pos;
        let names = if params.fields[0].names.is_empty() {
            Vec::new()
        } else {
            vec![Ident::new(ctx_param_name, first_pos)]
        };
        params.fields.insert(
            0,
            Field {
                names,
                ty: TypeExpr::Name(Ident::new(ctx_type_text, first_pos)),
                pos: first_pos,
            },
        );
    }
}
