//! The analysis engine: walks the call graph upward from configured leaf
//! calls and fills the decision tables the rewrite phase executes.
//!
//! Pipeline: pre-scan, leaf seeding, worklist propagation, then the
//! interface/named-type closure. All tables grow monotonically, so the
//! closure's fixed point terminates.

mod closure;
mod prescan;
mod propagate;
mod seed;

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::config::{Config, Replacement};
use crate::errors::EngineError;
use crate::model::callgraph::NodeId;
use crate::model::ir::{CallCommon, CallTarget, FuncId, IrFunction};
use crate::model::types::{PkgId, TypeId};
use crate::model::Program;
use crate::span::{Pos, SiteKey, NO_POS};
use crate::warnings::WarningSink;

/// How a keyed function is treated by the rewrite.
///
/// Only `Regular` and `FreshCtx` survive into the final tables for reached
/// functions: the container/external classes record why a function must not
/// change signature, and collapse to `FreshCtx` the moment propagation
/// reaches them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnClass {
    /// Signature gains the context parameter; callers propagate further.
    Regular,
    /// Signature unchanged; body receives an artificial context binding.
    FreshCtx,
    /// Signature stored in a map/slice/array element type; immutable.
    ContainerSig,
    /// Passed to or implementing an externally-defined declaration;
    /// immutable.
    ExtFn,
    /// Implements an interface declared outside the load set; immutable.
    ExtPkg,
    /// Receiver embeds a configured external type; immutable.
    ExtRecv,
}

/// What to do at one recorded call site.
#[derive(Debug, Clone, PartialEq)]
pub enum CallSiteRewrite {
    /// Pass a context expression derived from the enclosing function.
    Arg(Replacement),
    /// Pass the configured artificial context expression.
    Artificial,
}

/// The decision tables shared by analysis and rewrite.
#[derive(Debug, Clone, Default)]
pub struct RewritePlan {
    /// Function, literal and interface-method classifications, keyed by
    /// declaration position.
    pub fn_classes: HashMap<SiteKey, FnClass>,
    /// Call sites that receive a context argument.
    pub call_sites: HashMap<SiteKey, CallSiteRewrite>,
    /// Call sites whose callee is renamed.
    pub call_renames: HashMap<SiteKey, String>,
    /// Interface -> method names whose signatures must be rewritten.
    pub ifaces_modified: HashMap<TypeId, BTreeSet<String>>,
    /// Positions of function-typed parameters whose type gains the context
    /// parameter.
    pub fn_params_modified: HashSet<SiteKey>,
    /// Positions of unnamed or underscore context parameters to rename.
    pub param_renames: HashSet<SiteKey>,
}

impl RewritePlan {
    /// Monotone measure of the tables, used to detect fixed points.
    fn fingerprint(&self) -> (usize, usize, usize, usize, usize, usize) {
        (
            self.fn_classes.len(),
            self.fn_classes.values().filter(|c| **c == FnClass::Regular).count(),
            self.ifaces_modified.values().map(|m| m.len()).sum(),
            self.call_sites.len(),
            self.fn_params_modified.len(),
            self.param_renames.len(),
        )
    }
}

/// First-parameter inspection result: whether the signature already starts
/// with a (canonical or custom) context parameter, and how call sites inside
/// the function should spell the context.
#[derive(Debug, Clone)]
struct FirstParam {
    is_ctx: bool,
    pos: Pos,
    /// Parameter name; for custom contexts the extraction expression with
    /// the parameter name substituted in.
    name: String,
    /// Short type rendering, for warnings.
    type_display: String,
    custom: bool,
}

pub(crate) struct Analyzer<'a> {
    program: &'a Program,
    config: &'a Config,
    warnings: &'a mut WarningSink,
    plan: RewritePlan,
    /// All named interfaces of the load set, with their owning packages.
    ifaces: HashMap<TypeId, PkgId>,
    /// Interfaces literally matching the configured leaf interface.
    lib_ifaces: Vec<TypeId>,
    /// Struct types embedding a configured external type.
    ext_recv_structs: HashSet<TypeId>,
    /// Signatures used as container element types, per package.
    container_sigs: HashMap<PkgId, Vec<TypeId>>,
}

/// Run the whole analysis and return the rewrite plan.
pub fn analyze(
    program: &Program,
    config: &Config,
    warnings: &mut WarningSink,
) -> Result<RewritePlan, EngineError> {
    let mut analyzer = Analyzer {
        program,
        config,
        warnings,
        plan: RewritePlan::default(),
        ifaces: HashMap::new(),
        lib_ifaces: Vec::new(),
        ext_recv_structs: HashSet::new(),
        container_sigs: HashMap::new(),
    };

    analyzer.collect_interfaces_and_ext_embeds();
    analyzer.collect_container_sigs_and_ext_iface_impls();
    analyzer.mark_external_param_fns();

    let (mut worklist, mut visited) = analyzer.process_leaf_calls()?;
    analyzer.collect(&mut worklist, &mut visited)?;

    analyzer.run_closure()?;

    Ok(analyzer.plan)
}

impl<'a> Analyzer<'a> {
    fn key_of(&self, func: &IrFunction, pos: Pos) -> SiteKey {
        self.program.site_key(func, pos)
    }

    fn func(&self, id: FuncId) -> &'a IrFunction {
        self.program.ir.func(id)
    }

    fn node_func(&self, node: NodeId) -> &'a IrFunction {
        self.func(self.program.graph.node(node).func)
    }

    fn pkg_path(&self, pkg: Option<PkgId>) -> &str {
        match pkg {
            Some(p) => &self.program.pkg(p).path,
            None => "",
        }
    }

    fn qualified_recv(&self, sig_ty: TypeId) -> String {
        self.program
            .types
            .signature(sig_ty)
            .and_then(|sig| sig.recv)
            .map(|recv| self.program.types.qualified_name(recv, &self.program.packages))
            .unwrap_or_default()
    }

    fn warn(&mut self, key: SiteKey, msg: impl Into<String>) {
        self.warnings.push(&self.program.positions, key, msg);
    }

    /// Inspect the first parameter of a signature for an existing context.
    fn first_param(&self, sig_ty: TypeId) -> FirstParam {
        let absent = FirstParam {
            is_ctx: false,
            pos: NO_POS,
            name: self.config.ctx_param_name.clone(),
            type_display: String::new(),
            custom: false,
        };
        let Some(sig) = self.program.types.signature(sig_ty) else {
            return absent;
        };
        let Some(v) = sig.params.first() else {
            return absent;
        };
        let type_display = self.program.types.short_name(v.ty, &self.program.packages);
        let qualified = self.program.types.qualified_name(v.ty, &self.program.packages);
        let v_name = v.name.clone().unwrap_or_default();
        if qualified == self.config.ctx_type_qualified {
            return FirstParam { is_ctx: true, pos: v.pos, name: v_name, type_display, custom: false };
        }
        if self.config.ctx_custom_type_qualified.as_deref() == Some(qualified.as_str()) {
            // the custom parameter cannot be passed directly; call sites use
            // the configured extraction expression over its name
            let expr = crate::config::substitute(
                crate::config::CTX_CUSTOM_WILDCARD,
                &self.config.ctx_custom_expr_extract,
                &v_name,
            );
            return FirstParam { is_ctx: true, pos: v.pos, name: expr, type_display, custom: true };
        }
        FirstParam { type_display, ..absent }
    }

    /// Whether an existing first context parameter makes a call site need no
    /// new argument: custom contexts and canonical/unnamed names qualify.
    fn first_param_compatible(&self, fp: &FirstParam) -> bool {
        fp.is_ctx
            && (fp.custom
                || fp.name == "_"
                || fp.name.is_empty()
                || fp.name == self.config.ctx_param_name)
    }

    /// The actual argument at a parameter position, skipping the receiver
    /// slot of method calls.
    fn actual_call_arg(&self, common: &CallCommon, func: &IrFunction, index: usize) -> ValueRef {
        let is_invoke = matches!(common.target, CallTarget::Invoke { .. });
        let has_recv = self
            .program
            .types
            .signature(common.sig)
            .map(|s| s.recv.is_some())
            .unwrap_or(false);
        let slot = if !is_invoke && has_recv { index + 1 } else { index };
        ValueRef { func: func.id, value: common.args[slot] }
    }
}

/// A value inside a specific function's arena.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ValueRef {
    pub func: FuncId,
    pub value: crate::model::ir::ValueId,
}

/// Names of the test-harness parameter types that stop propagation at test
/// entry points.
pub(crate) const TESTING_T: &str = "*testing.T";
pub(crate) const TESTING_M: &str = "*testing.M";
