//! Upward propagation: a worklist over inbound call edges that records call
//! site rewrites, classifies callers, co-marks function-typed parameters that
//! propagated calls flow through, and stops at configured boundaries.

use std::collections::HashSet;

use crate::config::Replacement;
use crate::errors::EngineError;
use crate::model::callgraph::{Edge, NodeId};
use crate::model::ir::{CallTarget, IrFunction, ValueKind};
use crate::model::types::TypeId;
use crate::span::SiteKey;

use super::{Analyzer, CallSiteRewrite, FnClass, TESTING_M, TESTING_T};

impl<'a> Analyzer<'a> {
    /// Drain the worklist: for every inbound edge of a popped node, record
    /// the call-site rewrite and decide whether the caller propagates
    /// further.
    pub(super) fn collect(
        &mut self,
        worklist: &mut Vec<NodeId>,
        visited: &mut HashSet<NodeId>,
    ) -> Result<(), EngineError> {
        while let Some(node) = worklist.pop() {
            let callee_fn = self.node_func(node);
            let in_edges: Vec<_> = self.program.graph.node(node).ins.clone();
            for edge_id in in_edges {
                let edge = self.program.graph.edge(edge_id).clone();
                if edge.pos == crate::span::NO_POS {
                    // edge with no source counterpart
                    continue;
                }
                if callee_fn.name.contains('$') && callee_fn.parent != Some(edge.site_fn) {
                    // a call of an anonymous function from a different scope
                    // is almost certainly call-graph imprecision
                    continue;
                }

                let common = self.program.edge_call(&edge).clone();
                let fp = self.first_param(common.sig);
                if self.first_param_compatible(&fp) {
                    // the called value's own signature already carries a
                    // compatible context
                    continue;
                }

                let site_fn = self.program.edge_site_fn(&edge);
                let key = self.program.site_key(site_fn, edge.pos);
                let caller_node = edge.caller;
                let caller_fn = self.node_func(caller_node);

                if caller_fn.synthetic_init {
                    // roots in synthesised initialisers get an artificial
                    // value instead of propagating
                    let already_artificial = matches!(
                        self.plan.call_sites.get(&key),
                        Some(CallSiteRewrite::Artificial)
                    );
                    if !already_artificial
                        && !self
                            .config
                            .is_pkg_external(self.pkg_path(caller_fn.pkg))
                    {
                        let msg = format!(
                            "function {} is called from synthetic package initializer - receives artificial context as an argument",
                            callee_fn.name
                        );
                        self.warn(key, msg);
                    }
                    self.plan.call_sites.insert(key, CallSiteRewrite::Artificial);
                    continue;
                }

                // calls through a function-typed parameter co-mark the
                // parameter and every other callee sharing that hole
                self.collect_fn_param(worklist, visited, &edge)?;

                self.plan
                    .call_sites
                    .insert(key, CallSiteRewrite::Arg(self.config.common_replacement.clone()));

                if let Some(pkg) = caller_fn.pkg {
                    let info = self.program.pkg(pkg);
                    let pkg_path = info.path.clone();
                    let pkg_name = info.name.clone();
                    let fn_name = caller_fn.name.clone();
                    let recv_str = self.qualified_recv(caller_fn.sig);

                    if self.config.is_propagation_stop(&fn_name, &recv_str, &pkg_path, &pkg_name) {
                        // the caller promises a context of its own: bind an
                        // artificial one there and stop climbing
                        let ckey = self.key_of(caller_fn, caller_fn.pos);
                        if self.plan.fn_classes.get(&ckey) != Some(&FnClass::Regular) {
                            self.plan.fn_classes.insert(ckey, FnClass::FreshCtx);
                        }
                        continue;
                    }

                    let param_name =
                        self.collect_fn_def(worklist, visited, caller_node, &fn_name, &recv_str);
                    if param_name != self.config.ctx_param_name {
                        self.plan.call_sites.insert(
                            key,
                            CallSiteRewrite::Arg(Replacement {
                                expr: Some(param_name),
                                ..self.config.common_replacement.clone()
                            }),
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// When a propagated call happens through a parameter of the enclosing
    /// function, the parameter's function type must gain the context
    /// parameter too, and so must every function that can flow through it.
    fn collect_fn_param(
        &mut self,
        worklist: &mut Vec<NodeId>,
        visited: &mut HashSet<NodeId>,
        edge: &Edge,
    ) -> Result<(), EngineError> {
        let common = self.program.edge_call(edge).clone();
        let CallTarget::Value(v) = common.target else {
            return Ok(());
        };
        let site_fn = self.program.edge_site_fn(edge);
        let index = match &site_fn.value(v).kind {
            ValueKind::Parameter { index } => *index,
            _ => return Ok(()),
        };
        let param_ty = site_fn.value(v).ty;
        let Some(site_sig) = self.program.types.signature(site_fn.sig) else {
            return Ok(());
        };
        let Some(param) = site_sig.params.get(index) else {
            return Ok(());
        };
        let param_pos = param.pos;
        let key = self.program.site_key(site_fn, param_pos);
        if self.plan.fn_params_modified.contains(&key) {
            return Ok(());
        }

        // only inline function types are handled here; named function types
        // have their own closure pass
        if self.program.types.signature(param_ty).is_none() {
            return Ok(());
        }
        let fp = self.first_param(param_ty);
        if self.first_param_compatible(&fp) {
            return Ok(());
        }
        let caller_fn = self.node_func(edge.caller);
        if fp.type_display == self.config.ctx_param_type
            && !self.config.is_pkg_external(self.pkg_path(caller_fn.pkg))
        {
            let msg = format!(
                "function-typed argument takes a first parameter of type {} defined in a different package than {}/{}",
                self.config.ctx_param_type, self.config.ctx_pkg_path, self.config.ctx_pkg_name
            );
            self.warn(key, msg);
        }
        self.plan.fn_params_modified.insert(key);

        // every other function reachable through this typed hole (other
        // outgoing edges of the caller overlaid on the same call site) must
        // also gain the parameter, even if some never need it
        let edge_key = self.edge_site_key(edge);
        let out_edges: Vec<_> = self.program.graph.node(edge.caller).outs.clone();
        for out_id in out_edges {
            let out = self.program.graph.edge(out_id).clone();
            if self.edge_site_key(&out) != edge_key {
                continue;
            }
            let callee_fn = self.node_func(out.callee);
            let callee_name = callee_fn.name.clone();
            let callee_recv = self.qualified_recv(callee_fn.sig);
            self.collect_fn_def(worklist, visited, out.callee, &callee_name, &callee_recv);
        }
        Ok(())
    }

    fn edge_site_key(&self, edge: &Edge) -> SiteKey {
        self.program.site_key(self.program.edge_site_fn(edge), edge.pos)
    }

    /// Classify a caller that needs the context, returning the name under
    /// which call sites inside it can reach the context value.
    ///
    /// Classification is a total function of the node: an existing context
    /// parameter wins, nested literals defer to their enclosing function,
    /// then the first matching immutability rule decides, and only plain
    /// functions become `Regular` and keep propagating.
    pub(super) fn collect_fn_def(
        &mut self,
        worklist: &mut Vec<NodeId>,
        visited: &mut HashSet<NodeId>,
        node: NodeId,
        fn_name: &str,
        fn_recv: &str,
    ) -> String {
        let caller_fn = self.node_func(node);
        let fp = self.first_param(caller_fn.sig);
        if fp.is_ctx {
            if fp.name == "_" || fp.name.is_empty() {
                let key = self.program.site_key(caller_fn, fp.pos);
                self.plan.param_renames.insert(key);
                return self.config.ctx_param_name.clone();
            }
            // an existing context (or custom context) parameter: callers stop
            // here, call sites inside use its name (or extraction expression)
            return fp.name;
        }

        if let Some(parent) = caller_fn.parent {
            if let Some(parent_node) = self.program.graph.node_of(parent) {
                // nested literals capture the context from their closure, so
                // the enclosing function is what propagates
                let parent_fn = self.func(parent);
                let parent_name = parent_fn.name.clone();
                let parent_recv = self.qualified_recv(parent_fn.sig);
                return self.collect_fn_def(
                    worklist,
                    visited,
                    parent_node,
                    &parent_name,
                    &parent_recv,
                );
            }
        }

        if visited.contains(&node) {
            return self.config.ctx_param_name.clone();
        }
        visited.insert(node);

        let key = self.key_of(caller_fn, caller_fn.pos);
        let prior = self.plan.fn_classes.get(&key).copied();
        if (prior.is_none() || prior == Some(FnClass::ExtFn))
            && fp.type_display == self.config.ctx_param_type
            && !self.config.is_pkg_external(self.pkg_path(caller_fn.pkg))
        {
            let msg = format!(
                "function {} takes the first parameter that is of type {} defined in different package than {}/{}",
                caller_fn.name,
                self.config.ctx_param_type,
                self.config.ctx_pkg_path,
                self.config.ctx_pkg_name
            );
            self.warn(key, msg);
        }

        if prior.map(|c| c != FnClass::Regular).unwrap_or(false)
            || self.is_testing_init_or_main(&caller_fn.name, caller_fn.sig)
        {
            self.mark_fresh_ctx(key, caller_fn, prior.unwrap_or(FnClass::FreshCtx), prior.is_some());
        } else if self.is_container_sig(caller_fn) {
            self.mark_fresh_ctx(key, caller_fn, FnClass::ContainerSig, prior.is_some());
        } else if self.is_ext_receiver(caller_fn.sig) {
            self.mark_fresh_ctx(key, caller_fn, FnClass::ExtRecv, prior.is_some());
        } else if self.add_ifaces_modified(caller_fn.sig, fn_name, fn_recv) {
            self.plan.fn_classes.insert(key, FnClass::Regular);
            worklist.push(node);
        } else {
            self.mark_fresh_ctx(key, caller_fn, FnClass::ExtPkg, prior.is_some());
        }
        self.config.ctx_param_name.clone()
    }

    /// Mark a function for an artificial context binding at the start of its
    /// body, warning once about why its signature cannot change.
    pub(super) fn mark_fresh_ctx(
        &mut self,
        key: SiteKey,
        func: &IrFunction,
        reason: FnClass,
        existed: bool,
    ) {
        if !existed || reason == FnClass::ExtFn {
            if self.config.is_pkg_external(self.pkg_path(func.pkg)) {
                // external code is never rewritten, so neither the binding
                // nor the warning applies
                return;
            }
            let msg = match reason {
                FnClass::ContainerSig => format!(
                    "signature of function {} is used as a type in construction of map or array/slice (injecting artificial context)",
                    func.name
                ),
                FnClass::ExtFn => format!(
                    "function {} is used as parameter by another function from an external package (injecting artificial context)",
                    func.name
                ),
                FnClass::ExtPkg => format!(
                    "function {} implements interface from an external package (injecting artificial context)",
                    func.name
                ),
                FnClass::ExtRecv => format!(
                    "function {} receiver type embeds another external type (injecting artificial context)",
                    func.name
                ),
                _ => format!(
                    "function {} is a function used by the test harness (injecting artificial context)",
                    func.name
                ),
            };
            self.warn(key, msg);
        }
        self.plan.fn_classes.insert(key, FnClass::FreshCtx);
    }

    /// Whether the function's signature matches one stored as a container
    /// element type in the same package.
    pub(super) fn is_container_sig(&self, func: &IrFunction) -> bool {
        let Some(pkg) = func.pkg else {
            return false;
        };
        let Some(sigs) = self.container_sigs.get(&pkg) else {
            return false;
        };
        sigs.iter().any(|s| self.program.types.identical(func.sig, *s))
    }

    /// Whether the method's receiver type embeds a configured external type.
    pub(super) fn is_ext_receiver(&self, sig_ty: TypeId) -> bool {
        let Some(sig) = self.program.types.signature(sig_ty) else {
            return false;
        };
        let Some(recv) = sig.recv else {
            return false;
        };
        let base = match self.program.types.kind(recv) {
            crate::model::types::TypeKind::Pointer(inner) => *inner,
            _ => recv,
        };
        let underlying = self.program.types.underlying(base);
        self.ext_recv_structs.contains(&underlying)
    }

    /// Record every interface the receiver satisfies whose (possibly
    /// embedded) declaring interface is part of the load set, marking the
    /// declaring method fields for rewrite. Returns false when the method
    /// only satisfies interfaces declared outside the load set, in which
    /// case its signature must not change.
    pub(super) fn add_ifaces_modified(
        &mut self,
        sig_ty: TypeId,
        fn_name: &str,
        fn_recv: &str,
    ) -> bool {
        if fn_recv.is_empty() {
            // no interfaces to keep in sync, but the signature may change
            return true;
        }
        let Some(sig) = self.program.types.signature(sig_ty) else {
            return true;
        };
        let Some(recv) = sig.recv else {
            return true;
        };

        let mut to_modify: Vec<(TypeId, crate::model::types::IfaceMethod)> = Vec::new();
        let ifaces: Vec<TypeId> = self.ifaces.keys().copied().collect();
        for iface in ifaces {
            if !self.program.types.implements(recv, iface) {
                continue;
            }
            // the method may be declared by an embedded interface
            let Some((method, actual_iface)) =
                self.program.types.method_and_interface(fn_name, iface)
            else {
                continue;
            };
            if !self.ifaces.contains_key(&actual_iface) {
                // declared outside the load set: neither the interface nor
                // the method's signature can change
                return false;
            }
            to_modify.push((actual_iface, method));
        }

        for (iface, method) in to_modify {
            // interface methods have no body to bind an artificial context
            // in, so they are always rewritten as regular signatures
            let table = self.iface_table(iface);
            let key = self.program.site_key_in(table, method.pos);
            self.plan.fn_classes.insert(key, FnClass::Regular);
            self.plan
                .ifaces_modified
                .entry(iface)
                .or_default()
                .insert(fn_name.to_string());
        }
        true
    }

    /// File table of the interface's declaration.
    fn iface_table(&self, iface: TypeId) -> crate::span::FileTableId {
        match self.program.types.kind(iface) {
            crate::model::types::TypeKind::Named { decl, .. } => decl.table,
            _ => crate::span::FileTableId::NONE,
        }
    }

    /// Test-harness entry points and init/main roots never propagate: they
    /// bind an artificial context instead.
    pub(super) fn is_testing_init_or_main(&self, name: &str, sig_ty: TypeId) -> bool {
        let Some(sig) = self.program.types.signature(sig_ty) else {
            return false;
        };
        if (name == "main" || is_init_fn_name(name))
            && sig.results.is_empty()
            && sig.params.is_empty()
        {
            return true;
        }
        if name.len() < 5 || !name.starts_with("Test") {
            return false;
        }
        let fifth = &name[4..5];
        if fifth != "_" && fifth.to_lowercase() == fifth {
            // X in TestX must be "_" or upper case
            return false;
        }
        if sig.params.len() != 1 {
            return false;
        }
        let first = self.program.types.display(sig.params[0].ty, &self.program.packages);
        first == TESTING_T || (name == "TestMain" && first == TESTING_M)
    }
}

/// Numbered init functions (`init#1`, `init#2`, ...) synthesised from source
/// initialisers.
fn is_init_fn_name(name: &str) -> bool {
    match name.strip_prefix("init#") {
        Some(rest) => rest.parse::<u32>().map(|n| n > 0).unwrap_or(false),
        None => false,
    }
}
