//! Interface and named-type closure: a fixed point that keeps method sets and
//! named function types compatible with the classifications made so far.
//!
//! Each pass reclassifies sibling methods of modified interfaces, chases
//! interface-typed parameters to the dynamic types of their arguments, and
//! rewrites named function types together with every function passed through
//! them. The pass repeats until no table grows.

use std::collections::HashSet;

use crate::config::Replacement;
use crate::errors::EngineError;
use crate::model::ir::{CallTarget, FuncId, ValueKind};
use crate::model::types::{TypeId, TypeKind};

use super::{Analyzer, CallSiteRewrite, FnClass, ValueRef};

impl<'a> Analyzer<'a> {
    /// Iterate interface and named-type consequences to a fixed point.
    pub(super) fn run_closure(&mut self) -> Result<(), EngineError> {
        let mut named_modified: HashSet<TypeId> = HashSet::new();
        loop {
            let before = (self.plan.fingerprint(), named_modified.len());
            self.collect_ifaces(&mut named_modified)?;
            self.collect_named_types(&mut named_modified)?;
            if (self.plan.fingerprint(), named_modified.len()) == before {
                return Ok(());
            }
        }
    }

    /// Reclassify concrete methods satisfying modified interfaces, and chase
    /// interface-typed parameters to the dynamic types of their call-site
    /// arguments.
    fn collect_ifaces(&mut self, named_modified: &mut HashSet<TypeId>) -> Result<(), EngineError> {
        for node in self.program.graph.node_ids() {
            let func = self.node_func(node);
            let Some(sig) = self.program.types.signature(func.sig) else {
                continue;
            };

            if let Some(recv) = sig.recv {
                let snapshot: Vec<(TypeId, Vec<String>)> = self
                    .plan
                    .ifaces_modified
                    .iter()
                    .map(|(iface, names)| (*iface, names.iter().cloned().collect()))
                    .collect();
                for (iface, names) in snapshot {
                    if self.program.types.implements(recv, iface)
                        && names.iter().any(|n| *n == func.name)
                    {
                        self.insert_artificial_ctx(named_modified, func.id)?;
                    }
                }
            }

            let params = sig.params.clone();
            for (ind, p) in params.iter().enumerate() {
                let Some(names) = self.plan.ifaces_modified.get(&p.ty).cloned() else {
                    continue;
                };
                let in_edges: Vec<_> = self.program.graph.node(node).ins.clone();
                for edge_id in in_edges {
                    let edge = self.program.graph.edge(edge_id).clone();
                    let common = self.program.edge_call(&edge).clone();
                    let site_fn = self.program.edge_site_fn(&edge);
                    let arg = self.actual_call_arg(&common, site_fn, ind);
                    let arg_ty = self.arg_dynamic_type(arg)?;
                    // every method of the dynamic type named by the modified
                    // interface must be reclassified in lockstep
                    let methods = self.program.types.method_set(arg_ty).to_vec();
                    for m in methods {
                        if names.contains(&m.name) {
                            self.insert_artificial_ctx(named_modified, m.func)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Rewrite named function types used to pass modified functions, then
    /// pull every function flowing through parameters of those named types
    /// into the classification.
    fn collect_named_types(
        &mut self,
        named_modified: &mut HashSet<TypeId>,
    ) -> Result<(), EngineError> {
        loop {
            let mut named_new: HashSet<TypeId> = HashSet::new();

            for node in self.program.graph.node_ids() {
                let func = self.node_func(node);
                let Some(sig) = self.program.types.signature(func.sig) else {
                    continue;
                };
                let params = sig.params.clone();
                for (ind, p) in params.iter().enumerate() {
                    let Some((named, named_sig)) =
                        self.unmodified_named_fn_type(p.ty, named_modified)
                    else {
                        continue;
                    };
                    if self.first_param(named_sig).is_ctx {
                        // the named type already carries a context parameter
                        continue;
                    }
                    let in_edges: Vec<_> = self.program.graph.node(node).ins.clone();
                    for edge_id in in_edges {
                        let edge = self.program.graph.edge(edge_id).clone();
                        let common = self.program.edge_call(&edge).clone();
                        let site_fn = self.program.edge_site_fn(&edge);
                        let arg = self.actual_call_arg(&common, site_fn, ind);
                        let Some(arg_fn) = self.func_from_arg(arg)? else {
                            continue;
                        };
                        let arg_fn_ir = self.func(arg_fn);
                        let arg_key = self.key_of(arg_fn_ir, arg_fn_ir.pos);
                        let class = self.plan.fn_classes.get(&arg_key).copied();
                        match class {
                            Some(FnClass::ExtFn) | None => {}
                            Some(_) => {
                                let decl = self.named_decl_key(named);
                                self.plan.fn_classes.insert(decl, FnClass::Regular);
                                named_new.insert(named);
                            }
                        }
                    }
                }
            }

            if named_new.is_empty() {
                return Ok(());
            }

            // functions passed through parameters of the freshly modified
            // named types must themselves be modified
            for node in self.program.graph.node_ids() {
                let func = self.node_func(node);
                let Some(sig) = self.program.types.signature(func.sig) else {
                    continue;
                };
                let params = sig.params.clone();
                for (ind, p) in params.iter().enumerate() {
                    if !named_new.contains(&p.ty) {
                        continue;
                    }
                    let in_edges: Vec<_> = self.program.graph.node(node).ins.clone();
                    for edge_id in in_edges {
                        let edge = self.program.graph.edge(edge_id).clone();
                        let common = self.program.edge_call(&edge).clone();
                        let site_fn = self.program.edge_site_fn(&edge);
                        let arg = self.actual_call_arg(&common, site_fn, ind);
                        if let Some(arg_fn) = self.func_from_arg(arg)? {
                            self.insert_artificial_ctx(named_modified, arg_fn)?;
                        }
                    }
                }
            }

            named_modified.extend(named_new);
        }
    }

    /// Classify a function discovered by the closure, and push an artificial
    /// (or existing) context into all its call sites when it becomes
    /// `Regular`.
    fn insert_artificial_ctx(
        &mut self,
        named_modified: &mut HashSet<TypeId>,
        func_id: FuncId,
    ) -> Result<(), EngineError> {
        let func = self.func(func_id);
        let fp = self.first_param(func.sig);
        if fp.is_ctx {
            if fp.name == "_" || fp.name.is_empty() {
                let key = self.program.site_key(func, fp.pos);
                self.plan.param_renames.insert(key);
            }
            // a context (or custom context) parameter already exists; call
            // sites inside the function resolve against it
            return Ok(());
        }

        let key = self.key_of(func, func.pos);
        let prior = self.plan.fn_classes.get(&key).copied();
        if (prior.is_none() || prior == Some(FnClass::ExtFn))
            && fp.type_display == self.config.ctx_param_type
            && !self.config.is_pkg_external(self.pkg_path(func.pkg))
        {
            let msg = format!(
                "function {} takes the first parameter that is of type {} defined in different package than {}/{}",
                func.name,
                self.config.ctx_param_type,
                self.config.ctx_pkg_path,
                self.config.ctx_pkg_name
            );
            self.warn(key, msg);
        }

        if prior.map(|c| c != FnClass::Regular).unwrap_or(false)
            || self.is_testing_init_or_main(&func.name, func.sig)
        {
            self.mark_fresh_ctx(key, func, prior.unwrap_or(FnClass::FreshCtx), prior.is_some());
        } else if self.is_container_sig(func) {
            self.mark_fresh_ctx(key, func, FnClass::ContainerSig, prior.is_some());
        } else if self.is_ext_receiver(func.sig) {
            self.mark_fresh_ctx(key, func, FnClass::ExtRecv, prior.is_some());
        } else {
            let recv_str = self.qualified_recv(func.sig);
            let name = func.name.clone();
            if self.add_ifaces_modified(func.sig, &name, &recv_str) {
                self.plan.fn_classes.insert(key, FnClass::Regular);
                if let Some(node) = self.program.graph.node_of(func_id) {
                    self.insert_artificial_ctx_callsites(named_modified, node);
                }
            } else {
                self.mark_fresh_ctx(key, func, FnClass::ExtPkg, prior.is_some());
            }
        }
        Ok(())
    }

    /// A function just became `Regular` outside the worklist: every call site
    /// of it must now pass a context — the caller's own, renamed if
    /// anonymous, or an artificial one when the caller has none.
    fn insert_artificial_ctx_callsites(
        &mut self,
        named_modified: &HashSet<TypeId>,
        node: crate::model::callgraph::NodeId,
    ) {
        let in_edges: Vec<_> = self.program.graph.node(node).ins.clone();
        for edge_id in in_edges {
            let edge = self.program.graph.edge(edge_id).clone();
            let site_fn = self.program.edge_site_fn(&edge);
            let key = self.program.site_key(site_fn, edge.pos);
            if self.plan.call_sites.contains_key(&key) {
                continue;
            }
            let common = self.program.edge_call(&edge).clone();
            if self.first_param(common.sig).is_ctx {
                continue;
            }

            let caller_fn = self.node_func(edge.caller);
            let fp = self.first_param(caller_fn.sig);
            if fp.is_ctx {
                if fp.name == "_" || fp.name.is_empty() {
                    self.plan
                        .call_sites
                        .insert(key, CallSiteRewrite::Arg(self.config.common_replacement.clone()));
                    let rename_key = self.program.site_key(caller_fn, fp.pos);
                    self.plan.param_renames.insert(rename_key);
                } else if fp.name != self.config.ctx_param_name {
                    self.plan.call_sites.insert(
                        key,
                        CallSiteRewrite::Arg(Replacement {
                            expr: Some(fp.name.clone()),
                            ..self.config.common_replacement.clone()
                        }),
                    );
                } else {
                    self.plan
                        .call_sites
                        .insert(key, CallSiteRewrite::Arg(self.config.common_replacement.clone()));
                }
            } else {
                // no context in the caller: artificial value, unless the call
                // goes through a named function type that stays unmodified
                let through_unmodified_named = match &common.target {
                    CallTarget::Value(v) => {
                        let ty = site_fn.value(*v).ty;
                        self.unmodified_named_fn_type(ty, named_modified).is_some()
                    }
                    CallTarget::Invoke { .. } => false,
                };
                if !through_unmodified_named {
                    self.plan.call_sites.insert(key, CallSiteRewrite::Artificial);
                }
            }
        }
    }

    /// A named type whose underlying type is a function signature and which
    /// has not been modified yet.
    fn unmodified_named_fn_type(
        &self,
        ty: TypeId,
        named_modified: &HashSet<TypeId>,
    ) -> Option<(TypeId, TypeId)> {
        let TypeKind::Named { underlying, .. } = self.program.types.kind(ty) else {
            return None;
        };
        self.program.types.signature(*underlying)?;
        if named_modified.contains(&ty) {
            return None;
        }
        Some((ty, *underlying))
    }

    fn named_decl_key(&self, named: TypeId) -> crate::span::SiteKey {
        match self.program.types.kind(named) {
            TypeKind::Named { decl, .. } => self.program.site_key_in(decl.table, decl.pos),
            _ => crate::span::SiteKey::new(crate::span::FileTableId::NONE, crate::span::NO_POS),
        }
    }

    /// The function definition behind a higher-order argument, if any.
    /// Results of calls, parameters, unary operations, constants, phis and
    /// extractions are accepted but ignored.
    fn func_from_arg(&self, arg: ValueRef) -> Result<Option<FuncId>, EngineError> {
        let func = self.func(arg.func);
        match &func.value(arg.value).kind {
            ValueKind::ChangeType { operand } | ValueKind::Convert { operand } => {
                match &func.value(*operand).kind {
                    ValueKind::MakeClosure { func: f } => Ok(Some(*f)),
                    ValueKind::FuncRef(f) => Ok(Some(*f)),
                    _ => Ok(None),
                }
            }
            ValueKind::MakeClosure { func: f } => Ok(Some(*f)),
            ValueKind::FuncRef(f) => Ok(Some(*f)),
            ValueKind::Call(common) => {
                let results =
                    self.program.types.signature(common.sig).map(|s| s.results.len()).unwrap_or(0);
                if results != 1 {
                    return Err(EngineError::analysis(
                        "function call argument has more than one return value (expected one of function type)",
                    ));
                }
                Ok(None)
            }
            ValueKind::Parameter { .. }
            | ValueKind::UnOp { .. }
            | ValueKind::Const
            | ValueKind::Phi
            | ValueKind::Extract { .. } => Ok(None),
            _ => Err(EngineError::analysis(
                "unrecognized argument for parameter of type function",
            )),
        }
    }

    /// The dynamic type of an argument passed at an interface-typed
    /// parameter position.
    fn arg_dynamic_type(&self, arg: ValueRef) -> Result<TypeId, EngineError> {
        let func = self.func(arg.func);
        let value = func.value(arg.value);
        match &value.kind {
            ValueKind::MakeInterface { operand } => Ok(func.value(*operand).ty),
            ValueKind::Call(common) => {
                let sig = self.program.types.signature(common.sig);
                let results: Vec<TypeId> =
                    sig.map(|s| s.results.clone()).unwrap_or_default();
                if results.len() != 1 {
                    return Err(EngineError::analysis(
                        "function call argument has more than one return value (expected one of interface type)",
                    ));
                }
                Ok(results[0])
            }
            ValueKind::Parameter { .. }
            | ValueKind::UnOp { .. }
            | ValueKind::Extract { .. }
            | ValueKind::Phi
            | ValueKind::Const
            | ValueKind::ChangeType { .. }
            | ValueKind::ChangeInterface { .. } => Ok(value.ty),
            _ => Err(EngineError::analysis(
                "unrecognized argument for parameter of type interface",
            )),
        }
    }
}
