//! Leaf seeding: find every call of a configured leaf routine, record the
//! call-site rewrite (and optional rename), and enqueue the enclosing callers
//! for upward propagation.

use std::collections::HashSet;

use crate::config::{substitute, Replacement, CTX_WILDCARD};
use crate::errors::EngineError;
use crate::model::callgraph::NodeId;
use crate::model::ir::{CallCommon, CallTarget, ValueKind};
use crate::model::types::TypeKind;

use super::{Analyzer, CallSiteRewrite};

/// The literal callee of a call, when the call is not performed through a
/// function-typed parameter.
struct LiteralCallee {
    pkg_path: String,
    pkg_name: String,
    recv: String,
    name: String,
}

impl<'a> Analyzer<'a> {
    /// Seed the worklist from configured leaf calls.
    pub(super) fn process_leaf_calls(
        &mut self,
    ) -> Result<(Vec<NodeId>, HashSet<NodeId>), EngineError> {
        let mut leaf_calls: HashSet<crate::span::SiteKey> = HashSet::new();
        let mut worklist: Vec<NodeId> = Vec::new();
        let mut visited: HashSet<NodeId> = HashSet::new();

        let leaf_names: Vec<String> = self.config.leaf_fns.keys().cloned().collect();

        for node in self.program.graph.node_ids() {
            let func = self.node_func(node);
            for leaf_name in &leaf_names {
                if func.name != *leaf_name {
                    continue;
                }
                let sig = self.program.types.signature(func.sig);
                let recv_ty = sig.and_then(|s| s.recv);

                if !self.lib_ifaces.is_empty() {
                    // leaf methods are specified by the interface they
                    // satisfy; renaming does not apply in this mode
                    let Some(recv_ty) = recv_ty else {
                        continue;
                    };
                    if self.recv_pkg_external(recv_ty) {
                        // implementations in third-party code are out of reach
                        continue;
                    }
                    let lib_ifaces = self.lib_ifaces.clone();
                    for li in lib_ifaces {
                        if !self.program.types.implements(recv_ty, li) {
                            continue;
                        }
                        let msg = format!(
                            "function {} implements library interface {} and, consequently, receives context parameter but may in fact not use context",
                            func.name, self.config.lib_iface
                        );
                        let key = self.key_of(func, func.pos);
                        self.warn(key, msg);
                        let recv_str = self.qualified_recv(func.sig);
                        let name = func.name.clone();
                        self.collect_fn_def(&mut worklist, &mut visited, node, &name, &recv_str);
                    }
                    continue;
                }

                let replacements = self.config.leaf_fns[leaf_name].clone();
                for (recv_str, replacement) in replacements {
                    let Some(pkg) = func.pkg else {
                        continue;
                    };
                    let info = self.program.pkg(pkg);
                    if info.path != self.config.lib_pkg_path
                        || info.name != self.config.lib_pkg_name
                    {
                        // definition does not live in the leaf library
                        continue;
                    }
                    let leaf_recv = self.qualified_recv(func.sig);
                    if leaf_recv != recv_str {
                        continue;
                    }

                    let in_edges: Vec<_> = self.program.graph.node(node).ins.clone();
                    for edge_id in in_edges {
                        let edge = self.program.graph.edge(edge_id).clone();
                        let site_fn = self.program.edge_site_fn(&edge);
                        let key = self.program.site_key(site_fn, edge.pos);
                        let common = self.program.edge_call(&edge).clone();

                        let Some(callee) = self.literal_callee(&common, site_fn.id) else {
                            // calls reached through function-typed parameters
                            // are skipped: an imprecise graph overlays them
                            // onto signature-compatible direct functions,
                            // which must not be renamed
                            continue;
                        };
                        if let Some(new_name) = &replacement.new_name {
                            if callee.pkg_path == self.config.lib_pkg_path
                                && callee.pkg_name == self.config.lib_pkg_name
                                && callee.recv == leaf_recv
                                && callee.name == *leaf_name
                            {
                                self.plan.call_renames.insert(key, new_name.clone());
                            }
                        }

                        leaf_calls.insert(key);
                        let caller_node = edge.caller;
                        let caller_fn = self.node_func(caller_node);
                        let caller_name = caller_fn.name.clone();
                        let caller_recv = self.qualified_recv(caller_fn.sig);
                        let param_name = self.collect_fn_def(
                            &mut worklist,
                            &mut visited,
                            caller_node,
                            &caller_name,
                            &caller_recv,
                        );
                        let rewrite = if param_name == self.config.ctx_param_name {
                            CallSiteRewrite::Arg(replacement.clone())
                        } else {
                            // the caller binds the context under another name
                            CallSiteRewrite::Arg(Replacement {
                                expr: Some(substitute(
                                    CTX_WILDCARD,
                                    replacement.template.as_deref().unwrap_or(""),
                                    &param_name,
                                )),
                                ..replacement.clone()
                            })
                        };
                        self.plan.call_sites.insert(key, rewrite);
                    }
                }
            }
        }
        tracing::debug!(count = leaf_calls.len(), "leaf function calls seeded");
        Ok((worklist, visited))
    }

    fn recv_pkg_external(&self, recv_ty: crate::model::types::TypeId) -> bool {
        let base = match self.program.types.kind(recv_ty) {
            TypeKind::Pointer(inner) => *inner,
            _ => recv_ty,
        };
        if let TypeKind::Named { pkg: Some(pkg), .. } = self.program.types.kind(base) {
            return self.config.is_pkg_external(&self.program.pkg(*pkg).path);
        }
        false
    }

    /// Resolve the literal callee of a call. Returns `None` for calls through
    /// parameters or other first-class values with no stable identity.
    fn literal_callee(
        &self,
        common: &CallCommon,
        site_fn: crate::model::ir::FuncId,
    ) -> Option<LiteralCallee> {
        match &common.target {
            CallTarget::Invoke { iface, method } => {
                let TypeKind::Named { pkg: Some(pkg), .. } = self.program.types.kind(*iface)
                else {
                    return None;
                };
                let info = self.program.pkg(*pkg);
                Some(LiteralCallee {
                    pkg_path: info.path.clone(),
                    pkg_name: info.name.clone(),
                    recv: self.qualified_recv(common.sig),
                    name: method.clone(),
                })
            }
            CallTarget::Value(v) => {
                let func = self.func(site_fn);
                let callee_fn = match &func.value(*v).kind {
                    ValueKind::Parameter { .. } => return None,
                    ValueKind::MakeClosure { func: f } => *f,
                    ValueKind::FuncRef(f) => *f,
                    _ => return None,
                };
                let callee = self.func(callee_fn);
                let pkg = callee.pkg?;
                let info = self.program.pkg(pkg);
                Some(LiteralCallee {
                    pkg_path: info.path.clone(),
                    pkg_name: info.name.clone(),
                    recv: self.qualified_recv(callee.sig),
                    name: callee.name.clone(),
                })
            }
        }
    }
}
