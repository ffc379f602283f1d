//! Pre-scan: facts that are cheap to gather once over all declarations and
//! instructions and expensive to recompute — interface definitions, structs
//! embedding external types, container-stored signatures, and functions whose
//! signatures are frozen because external code holds them.

use crate::model::ir::{IrFunction, ValueId, ValueKind};
use crate::model::types::{TypeId, TypeKind};

use super::{Analyzer, FnClass, ValueRef};

impl<'a> Analyzer<'a> {
    /// Collect every named interface of the load set and every struct type
    /// embedding a configured external type.
    pub(super) fn collect_interfaces_and_ext_embeds(&mut self) {
        for (id, kind) in self.program.types.iter() {
            let TypeKind::Named { name, pkg: Some(pkg), underlying, .. } = kind else {
                continue;
            };
            match self.program.types.kind(*underlying) {
                TypeKind::Interface(_) => {
                    self.ifaces.insert(id, *pkg);
                    let info = self.program.pkg(*pkg);
                    if info.path == self.config.lib_pkg_path
                        && info.name == self.config.lib_pkg_name
                        && !self.config.lib_iface.is_empty()
                        && *name == self.config.lib_iface
                    {
                        self.lib_ifaces.push(id);
                    }
                }
                TypeKind::Struct(info) => {
                    for field in &info.fields {
                        if !field.embedded {
                            continue;
                        }
                        let TypeKind::Named { name: field_ty_name, pkg: Some(field_pkg), .. } =
                            self.program.types.kind(field.ty)
                        else {
                            continue;
                        };
                        let field_pkg = self.program.pkg(*field_pkg);
                        if self.config.is_ext_embed_type(
                            field_ty_name,
                            &field_pkg.path,
                            &field_pkg.name,
                        ) {
                            self.ext_recv_structs.insert(*underlying);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// One instruction sweep doing two things: record signatures used as
    /// container element types, and freeze the signatures of methods boxed
    /// into externally-defined interfaces.
    pub(super) fn collect_container_sigs_and_ext_iface_impls(&mut self) {
        for node in self.program.graph.node_ids() {
            let func = self.node_func(node);
            if !func.has_body() {
                continue;
            }
            for block in &func.blocks {
                for &instr in &block.instrs {
                    match &func.value(instr).kind {
                        ValueKind::MakeMap => {
                            let map_ty = self.program.types.underlying(func.value(instr).ty);
                            if let TypeKind::Map { key, elem } = self.program.types.kind(map_ty) {
                                let (key, elem) = (*key, *elem);
                                self.add_container_sig(func, key);
                                self.add_container_sig(func, elem);
                            }
                        }
                        ValueKind::MakeSlice => {
                            let slice_ty = self.program.types.underlying(func.value(instr).ty);
                            if let TypeKind::Slice(elem) = self.program.types.kind(slice_ty) {
                                let elem = *elem;
                                self.add_container_sig(func, elem);
                            }
                        }
                        ValueKind::Alloc => {
                            let TypeKind::Pointer(storage) =
                                self.program.types.kind(func.value(instr).ty)
                            else {
                                continue;
                            };
                            match self.program.types.kind(self.program.types.underlying(*storage))
                            {
                                TypeKind::Slice(elem) | TypeKind::Array(elem) => {
                                    let elem = *elem;
                                    self.add_container_sig(func, elem);
                                }
                                _ => {}
                            }
                        }
                        ValueKind::MakeInterface { operand } => {
                            self.mark_ext_iface_impl(func, instr, *operand);
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn add_container_sig(&mut self, func: &IrFunction, ty: TypeId) {
        let Some(pkg) = func.pkg else {
            return;
        };
        let underlying = self.program.types.underlying(ty);
        if self.program.types.signature(underlying).is_some() {
            self.container_sigs.entry(pkg).or_default().push(underlying);
        }
    }

    /// If a value is boxed into an interface named in an external package,
    /// every method of the concrete type must keep its signature.
    fn mark_ext_iface_impl(&mut self, func: &IrFunction, instr: ValueId, operand: ValueId) {
        let iface_ty = func.value(instr).ty;
        let TypeKind::Named { pkg, .. } = self.program.types.kind(iface_ty) else {
            return;
        };
        let external = match pkg {
            Some(p) => {
                let path = &self.program.pkg(*p).path;
                self.config.ext_pkg_paths.iter().any(|ext| path.starts_with(ext))
            }
            None => false,
        };
        if !external {
            return;
        }
        let concrete = func.value(operand).ty;
        for method in self.program.types.method_set(concrete).to_vec() {
            let m_fn = self.func(method.func);
            let key = self.key_of(m_fn, m_fn.pos);
            self.plan.fn_classes.insert(key, FnClass::ExtFn);
        }
    }

    /// Freeze the signature of every function value passed (directly or in a
    /// variadic pack) to an externally-defined callee at a function- or
    /// interface-typed parameter.
    pub(super) fn mark_external_param_fns(&mut self) {
        for node in self.program.graph.node_ids() {
            let func = self.node_func(node);
            let path = self.pkg_path(func.pkg).to_string();
            let external =
                self.config.ext_pkg_paths.iter().any(|ext| path.starts_with(ext));
            if func.pkg.is_none() || !external {
                continue;
            }
            let Some(sig) = self.program.types.signature(func.sig) else {
                continue;
            };
            let params = sig.params.clone();
            let variadic = sig.variadic;

            for (i, p) in params.iter().enumerate() {
                let takes_fn = self.program.types.signature(p.ty).is_some();
                let takes_iface =
                    matches!(self.program.types.kind(p.ty), TypeKind::Interface(_));
                if !takes_fn && !takes_iface {
                    continue;
                }
                let in_edges: Vec<_> = self.program.graph.node(node).ins.clone();
                for edge_id in in_edges {
                    let edge = self.program.graph.edge(edge_id).clone();
                    let common = self.program.edge_call(&edge).clone();
                    let site_fn = self.program.edge_site_fn(&edge);
                    let arg = self.actual_call_arg(&common, site_fn, i);
                    self.mark_param_as_external_fn(arg);
                }
            }

            if !params.is_empty() && variadic {
                let in_edges: Vec<_> = self.program.graph.node(node).ins.clone();
                for edge_id in in_edges {
                    let edge = self.program.graph.edge(edge_id).clone();
                    let common = self.program.edge_call(&edge).clone();
                    let site_fn = self.program.edge_site_fn(&edge);
                    let arg = self.actual_call_arg(&common, site_fn, params.len() - 1);
                    for packed in variadic_pack_values(site_fn, arg.value) {
                        self.mark_param_as_external_fn(ValueRef {
                            func: site_fn.id,
                            value: packed,
                        });
                    }
                }
            }
        }
    }

    /// Resolve a function behind an argument value and freeze its signature.
    fn mark_param_as_external_fn(&mut self, arg: ValueRef) {
        let func = self.func(arg.func);
        let target = match &func.value(arg.value).kind {
            ValueKind::MakeClosure { func: f } => Some(*f),
            ValueKind::MakeInterface { operand } => match &func.value(*operand).kind {
                ValueKind::FuncRef(f) => Some(*f),
                _ => None,
            },
            ValueKind::FuncRef(f) => Some(*f),
            _ => None,
        };
        if let Some(f) = target {
            let ext_fn = self.func(f);
            let key = self.key_of(ext_fn, ext_fn.pos);
            self.plan.fn_classes.insert(key, FnClass::ExtFn);
        }
    }
}

/// Walk the instruction sequence backing a variadic pack: from the slice of
/// the storage, find each element store (an address-of followed by the stored
/// value, possibly behind one conversion).
///
/// This depends on the way packs are laid out in the instruction stream, but
/// there is no first-class representation of them to read instead.
fn variadic_pack_values(func: &IrFunction, arg: ValueId) -> Vec<ValueId> {
    let ValueKind::SliceOp { operand: storage } = &func.value(arg).kind else {
        // argument is not a variadic pack (not a slice of storage)
        return Vec::new();
    };
    let Some((block, _)) = func.block_of(arg) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for (idx, &instr) in block.instrs.iter().enumerate() {
        let ValueKind::IndexAddr { base } = &func.value(instr).kind else {
            continue;
        };
        if base != storage {
            // an element store, but into a different backing array
            continue;
        }
        let Some(&next) = block.instrs.get(idx + 1) else {
            continue;
        };
        match &func.value(next).kind {
            ValueKind::ChangeType { operand }
            | ValueKind::ChangeInterface { operand }
            | ValueKind::MakeInterface { operand }
            | ValueKind::Convert { operand } => out.push(*operand),
            _ => {}
        }
    }
    out
}
