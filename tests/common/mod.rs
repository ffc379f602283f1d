//! Program-bundle builder for engine tests.
//!
//! The engine consumes what a loader, an IR builder and a call-graph
//! constructor produce. This builder plays all three roles at a semantic
//! level: tests declare packages, types, functions and calls once, and the
//! builder keeps the AST, the type table, the instruction stream and the
//! call graph consistent (shared positions above all).

#![allow(dead_code)]

use std::collections::HashMap;

use ctxweave::model::ast::{
    Block, CallExpr, Decl, Expr, Field, FieldList, FuncDecl, FuncLit, FuncType, Ident, ImportDecl,
    InterfaceType, SourceFile, Stmt, StructType, TypeDecl, TypeExpr,
};
use ctxweave::model::ir::{
    BasicBlock, CallCommon, CallTarget, FuncId, IrFunction, Value, ValueId, ValueKind,
};
use ctxweave::model::types::{
    FieldInfo, IfaceMethod, InterfaceInfo, MethodInfo, ParamInfo, PkgId, SigInfo, StructInfo,
    TypeId, TypeKind, TypeTable,
};
use ctxweave::model::{PackageInfo, Program};
use ctxweave::span::{FileRange, FileTableId, Pos, SiteKey};

/// A declared or library function, as tests refer to it.
#[derive(Debug, Clone, Copy)]
pub struct FnHandle {
    pub func: FuncId,
    pub sig: TypeId,
    pub name_pos: Pos,
    pub pkg: PkgId,
    /// Index into `Program::files` / decl index, for declared functions.
    file: Option<(usize, usize)>,
}

/// A parameter of a function being declared.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: Option<String>,
    pub ty: TypeId,
}

pub fn param(name: &str, ty: TypeId) -> ParamSpec {
    ParamSpec { name: Some(name.to_string()), ty }
}

pub fn anon_param(ty: TypeId) -> ParamSpec {
    ParamSpec { name: None, ty }
}

/// Underscore-named parameter.
pub fn blank_param(ty: TypeId) -> ParamSpec {
    ParamSpec { name: Some("_".to_string()), ty }
}

/// An argument of a call: the source expression plus the IR value behind it.
#[derive(Debug, Clone)]
pub struct Arg {
    pub expr: Expr,
    pub value: ValueId,
}

pub struct ProgramBuilder {
    program: Program,
    pos: Pos,
    basics: HashMap<String, TypeId>,
    table: FileTableId,
    file_starts: Vec<(usize, Pos)>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self {
            program: Program::default(),
            pos: 0,
            basics: HashMap::new(),
            table: FileTableId::NONE,
            file_starts: Vec::new(),
        }
    }

    /// Switch to a new file table, marking the program as batch-loaded.
    /// Position numbering restarts, as it does across real load batches.
    pub fn next_batch(&mut self) {
        self.program.batched = true;
        self.table = FileTableId(self.table.0 + 1);
        self.pos = 0;
    }

    pub fn next_pos(&mut self) -> Pos {
        self.pos += 1;
        self.pos
    }

    pub fn table(&self) -> FileTableId {
        self.table
    }

    pub fn finish(mut self) -> Program {
        let end = self.pos + 1;
        for (index, start) in &self.file_starts {
            let file = &self.program.files[*index];
            self.program.positions.add_file(FileRange {
                table: file.table,
                start: *start,
                end,
                path: file.path.clone(),
                base_line: 1,
            });
        }
        self.program
    }

    // ── Packages and files ───────────────────────────────────────────

    pub fn pkg(&mut self, path: &str, name: &str) -> PkgId {
        let id = PkgId(self.program.packages.len() as u32);
        self.program
            .packages
            .push(PackageInfo { path: path.to_string(), name: name.to_string() });
        id
    }

    pub fn file(&mut self, pkg: PkgId, path: &str) -> usize {
        let index = self.program.files.len();
        self.program.files.push(SourceFile {
            path: path.to_string(),
            pkg,
            table: self.table,
            imports: Vec::new(),
            decls: Vec::new(),
        });
        let start = self.pos + 1;
        self.file_starts.push((index, start));
        index
    }

    pub fn import(&mut self, file: usize, path: &str) {
        self.program.files[file]
            .imports
            .push(ImportDecl { path: path.to_string(), alias: None });
    }

    pub fn import_aliased(&mut self, file: usize, alias: &str, path: &str) {
        self.program.files[file]
            .imports
            .push(ImportDecl { path: path.to_string(), alias: Some(alias.to_string()) });
    }

    pub fn mark_excluded(&mut self, what: &str) {
        self.program.excluded.push(what.to_string());
    }

    // ── Types ────────────────────────────────────────────────────────

    pub fn types(&mut self) -> &mut TypeTable {
        &mut self.program.types
    }

    pub fn basic(&mut self, name: &str) -> TypeId {
        if let Some(id) = self.basics.get(name) {
            return *id;
        }
        let id = self.program.types.add(TypeKind::Basic(name.to_string()));
        self.basics.insert(name.to_string(), id);
        id
    }

    pub fn pointer(&mut self, inner: TypeId) -> TypeId {
        self.program.types.add(TypeKind::Pointer(inner))
    }

    pub fn slice(&mut self, elem: TypeId) -> TypeId {
        self.program.types.add(TypeKind::Slice(elem))
    }

    pub fn array(&mut self, elem: TypeId) -> TypeId {
        self.program.types.add(TypeKind::Array(elem))
    }

    pub fn map(&mut self, key: TypeId, elem: TypeId) -> TypeId {
        self.program.types.add(TypeKind::Map { key, elem })
    }

    /// A function signature usable as a parameter or element type. Parameter
    /// positions are fresh; nothing in the engine keys on them.
    pub fn fn_sig(&mut self, params: &[ParamSpec], results: &[TypeId]) -> TypeId {
        let params = params
            .iter()
            .map(|p| {
                let pos = self.next_pos();
                ParamInfo { name: p.name.clone(), ty: p.ty, pos }
            })
            .collect();
        self.program.types.add(TypeKind::Signature(SigInfo {
            recv: None,
            params,
            results: results.to_vec(),
            variadic: false,
        }))
    }

    /// An interface's underlying type; method field positions are recorded
    /// so a later `type_decl` reuses them.
    pub fn iface(&mut self, methods: &[(&str, TypeId)], embeds: &[TypeId]) -> TypeId {
        let methods = methods
            .iter()
            .map(|(name, sig)| {
                let pos = self.next_pos();
                IfaceMethod { name: name.to_string(), sig: *sig, pos }
            })
            .collect();
        self.program
            .types
            .add(TypeKind::Interface(InterfaceInfo { methods, embeds: embeds.to_vec() }))
    }

    pub fn strukt(&mut self, fields: &[(&str, TypeId, bool)]) -> TypeId {
        let fields = fields
            .iter()
            .map(|(name, ty, embedded)| FieldInfo {
                name: name.to_string(),
                ty: *ty,
                embedded: *embedded,
            })
            .collect();
        self.program.types.add(TypeKind::Struct(StructInfo { fields }))
    }

    pub fn named(&mut self, pkg: PkgId, name: &str, underlying: TypeId) -> TypeId {
        let pos = self.next_pos();
        self.program.types.add(TypeKind::Named {
            name: name.to_string(),
            pkg: Some(pkg),
            underlying,
            decl: SiteKey::new(self.table, pos),
        })
    }

    /// A named type declared outside the load set (truly third-party).
    pub fn named_external(&mut self, name: &str, underlying: TypeId) -> TypeId {
        let pos = self.next_pos();
        self.program.types.add(TypeKind::Named {
            name: name.to_string(),
            pkg: None,
            underlying,
            decl: SiteKey::new(self.table, pos),
        })
    }

    fn named_decl_pos(&self, named: TypeId) -> Pos {
        match self.program.types.kind(named) {
            TypeKind::Named { decl, .. } => decl.pos,
            _ => panic!("not a named type"),
        }
    }

    /// Emit the AST declaration for a named type (interface, struct or named
    /// function type), reusing the positions recorded in the type table.
    pub fn type_decl(&mut self, file: usize, named: TypeId) {
        let (name, underlying, decl_pos) = match self.program.types.kind(named) {
            TypeKind::Named { name, underlying, decl, .. } => {
                (name.clone(), *underlying, decl.pos)
            }
            _ => panic!("type_decl expects a named type"),
        };
        let pkg = self.program.files[file].pkg;
        let ty = match self.program.types.kind(underlying).clone() {
            TypeKind::Interface(info) => {
                let mut fields = Vec::new();
                for m in &info.methods {
                    let ty = self.type_expr_of_sig(m.sig, pkg);
                    fields.push(Field {
                        names: vec![Ident::new(m.name.clone(), m.pos)],
                        ty,
                        pos: m.pos,
                    });
                }
                for e in &info.embeds {
                    let pos = self.next_pos();
                    let ty = self.type_expr_of(*e, pkg);
                    fields.push(Field { names: vec![], ty, pos });
                }
                TypeExpr::Interface(InterfaceType {
                    methods: FieldList { fields, closing: decl_pos },
                })
            }
            TypeKind::Struct(info) => {
                let mut fields = Vec::new();
                for f in &info.fields {
                    let pos = self.next_pos();
                    let names = if f.embedded {
                        vec![]
                    } else {
                        vec![Ident::new(f.name.clone(), pos)]
                    };
                    let ty = self.type_expr_of(f.ty, pkg);
                    fields.push(Field { names, ty, pos });
                }
                TypeExpr::Struct(StructType { fields: FieldList { fields, closing: decl_pos } })
            }
            TypeKind::Signature(_) => self.type_expr_of_sig(underlying, pkg),
            _ => self.type_expr_of(underlying, pkg),
        };
        self.program.files[file]
            .decls
            .push(Decl::Type(TypeDecl { name: Ident::new(name, decl_pos), ty }));
    }

    /// Render a type reference as it would be written in a file of `pkg`.
    pub fn type_expr_of(&mut self, ty: TypeId, pkg: PkgId) -> TypeExpr {
        match self.program.types.kind(ty).clone() {
            TypeKind::Basic(name) => TypeExpr::Name(Ident::new(name, 0)),
            TypeKind::Named { name, pkg: owner, .. } => {
                let text = match owner {
                    Some(p) if p != pkg => {
                        format!("{}.{}", self.program.pkg(p).name, name)
                    }
                    _ => name,
                };
                TypeExpr::Name(Ident::new(text, 0))
            }
            TypeKind::Pointer(inner) => {
                TypeExpr::Pointer(Box::new(self.type_expr_of(inner, pkg)))
            }
            TypeKind::Slice(inner) => TypeExpr::Slice(Box::new(self.type_expr_of(inner, pkg))),
            TypeKind::Array(inner) => TypeExpr::Slice(Box::new(self.type_expr_of(inner, pkg))),
            TypeKind::Map { key, elem } => TypeExpr::Map(
                Box::new(self.type_expr_of(key, pkg)),
                Box::new(self.type_expr_of(elem, pkg)),
            ),
            TypeKind::Signature(_) => self.type_expr_of_sig(ty, pkg),
            TypeKind::Interface(_) => TypeExpr::Name(Ident::new("interface{}", 0)),
            TypeKind::Struct(_) => TypeExpr::Name(Ident::new("struct{}", 0)),
        }
    }

    fn type_expr_of_sig(&mut self, sig_ty: TypeId, pkg: PkgId) -> TypeExpr {
        let sig = match self.program.types.kind(sig_ty) {
            TypeKind::Signature(s) => s.clone(),
            _ => panic!("not a signature type"),
        };
        let mut fields = Vec::new();
        for p in &sig.params {
            let names = match &p.name {
                Some(n) => vec![Ident::new(n.clone(), p.pos)],
                None => vec![],
            };
            let ty = self.type_expr_of(p.ty, pkg);
            fields.push(Field { names, ty, pos: p.pos });
        }
        let mut results = Vec::new();
        for r in &sig.results {
            results.push(self.type_expr_of(*r, pkg));
        }
        let pos = self.next_pos();
        TypeExpr::Func(Box::new(FuncType {
            pos,
            params: FieldList { fields, closing: pos },
            results,
        }))
    }

    // ── Functions ────────────────────────────────────────────────────

    /// Declare a function with an AST declaration, an IR shell and a call
    /// graph node. The body is attached separately with [`Self::body`].
    pub fn func_decl(
        &mut self,
        file: usize,
        name: &str,
        recv: Option<(&str, TypeId)>,
        params: &[ParamSpec],
        results: &[TypeId],
    ) -> FnHandle {
        let pkg = self.program.files[file].pkg;
        let name_pos = self.next_pos();

        let recv_field = recv.map(|(var, ty)| {
            let pos = self.next_pos();
            let names =
                if var.is_empty() { vec![] } else { vec![Ident::new(var, pos)] };
            Field { names, ty: self.type_expr_of(ty, pkg), pos }
        });

        let mut fields = Vec::new();
        let mut param_infos = Vec::new();
        for p in params {
            let pos = self.next_pos();
            let names = match &p.name {
                Some(n) => vec![Ident::new(n.clone(), pos)],
                None => vec![],
            };
            fields.push(Field { names, ty: self.type_expr_of(p.ty, pkg), pos });
            param_infos.push(ParamInfo { name: p.name.clone(), ty: p.ty, pos });
        }
        let closing = self.next_pos();

        let sig = self.program.types.add(TypeKind::Signature(SigInfo {
            recv: recv.map(|(_, ty)| ty),
            params: param_infos,
            results: results.to_vec(),
            variadic: false,
        }));

        let func = FuncId(self.program.ir.funcs.len() as u32);
        self.program.ir.funcs.push(IrFunction {
            id: func,
            name: name.to_string(),
            pkg: Some(pkg),
            sig,
            table: self.table,
            pos: name_pos,
            parent: None,
            synthetic_init: false,
            blocks: Vec::new(),
            values: Vec::new(),
        });
        self.program.graph.add_node(func);

        if let Some((_, recv_ty)) = recv {
            self.register_method(recv_ty, name, func, sig);
        }

        let sig_pos = self.next_pos();
        let decl_index = self.program.files[file].decls.len();
        let result_exprs = results.iter().map(|r| self.type_expr_of(*r, pkg)).collect();
        self.program.files[file].decls.push(Decl::Func(FuncDecl {
            name: Ident::new(name, name_pos),
            recv: recv_field,
            sig: FuncType {
                pos: sig_pos,
                params: FieldList { fields, closing },
                results: result_exprs,
            },
            body: None,
        }));

        FnHandle { func, sig, name_pos, pkg, file: Some((file, decl_index)) }
    }

    /// A function of an external package: it exists in the IR and the call
    /// graph but has no AST (external files are never rewritten).
    pub fn lib_fn(
        &mut self,
        pkg: PkgId,
        name: &str,
        recv: Option<TypeId>,
        params: &[ParamSpec],
        results: &[TypeId],
    ) -> FnHandle {
        self.lib_fn_inner(pkg, name, recv, params, results, false)
    }

    pub fn lib_fn_variadic(
        &mut self,
        pkg: PkgId,
        name: &str,
        params: &[ParamSpec],
        results: &[TypeId],
    ) -> FnHandle {
        self.lib_fn_inner(pkg, name, None, params, results, true)
    }

    fn lib_fn_inner(
        &mut self,
        pkg: PkgId,
        name: &str,
        recv: Option<TypeId>,
        params: &[ParamSpec],
        results: &[TypeId],
        variadic: bool,
    ) -> FnHandle {
        let name_pos = self.next_pos();
        let param_infos = params
            .iter()
            .map(|p| {
                let pos = self.next_pos();
                ParamInfo { name: p.name.clone(), ty: p.ty, pos }
            })
            .collect();
        let sig = self.program.types.add(TypeKind::Signature(SigInfo {
            recv,
            params: param_infos,
            results: results.to_vec(),
            variadic,
        }));
        let func = FuncId(self.program.ir.funcs.len() as u32);
        self.program.ir.funcs.push(IrFunction {
            id: func,
            name: name.to_string(),
            pkg: Some(pkg),
            sig,
            table: self.table,
            pos: name_pos,
            parent: None,
            synthetic_init: false,
            blocks: Vec::new(),
            values: Vec::new(),
        });
        self.program.graph.add_node(func);
        if let Some(recv_ty) = recv {
            self.register_method(recv_ty, name, func, sig);
        }
        FnHandle { func, sig, name_pos, pkg, file: None }
    }

    /// The synthesised package initialiser.
    pub fn synthetic_init(&mut self, pkg: PkgId) -> FnHandle {
        let name_pos = self.next_pos();
        let sig = self.program.types.add(TypeKind::Signature(SigInfo {
            recv: None,
            params: vec![],
            results: vec![],
            variadic: false,
        }));
        let func = FuncId(self.program.ir.funcs.len() as u32);
        self.program.ir.funcs.push(IrFunction {
            id: func,
            name: "init".to_string(),
            pkg: Some(pkg),
            sig,
            table: self.table,
            pos: name_pos,
            parent: None,
            synthetic_init: true,
            blocks: Vec::new(),
            values: Vec::new(),
        });
        self.program.graph.add_node(func);
        FnHandle { func, sig, name_pos, pkg, file: None }
    }

    fn register_method(&mut self, recv_ty: TypeId, name: &str, func: FuncId, sig: TypeId) {
        let base = match self.program.types.kind(recv_ty) {
            TypeKind::Pointer(inner) => *inner,
            _ => recv_ty,
        };
        self.program
            .types
            .add_method(base, MethodInfo { name: name.to_string(), func, sig });
    }

    /// Build a function's body: statements for the AST, values and a block
    /// for the IR, edges for the call graph.
    pub fn body(&mut self, handle: &FnHandle, build: impl FnOnce(&mut BodyCtx)) {
        let mut ctx = BodyCtx {
            pb: &mut *self,
            func: handle.func,
            pkg: handle.pkg,
            stmts: Vec::new(),
            values: Vec::new(),
            instrs: Vec::new(),
        };
        build(&mut ctx);
        let BodyCtx { stmts, values, instrs, .. } = ctx;
        self.attach_body(handle, stmts, values, instrs);
    }

    fn attach_body(
        &mut self,
        handle: &FnHandle,
        stmts: Vec<Stmt>,
        values: Vec<Value>,
        instrs: Vec<ValueId>,
    ) {
        let pos = self.next_pos();
        {
            let func = &mut self.program.ir.funcs[handle.func.0 as usize];
            func.values = values;
            func.blocks = vec![BasicBlock { instrs }];
        }
        if let Some((file, decl)) = handle.file {
            if let Decl::Func(fd) = &mut self.program.files[file].decls[decl] {
                fd.body = Some(Block { stmts, pos });
            }
        }
    }
}

/// Body under construction: parallel AST statements and IR values.
pub struct BodyCtx<'b> {
    pb: &'b mut ProgramBuilder,
    func: FuncId,
    pkg: PkgId,
    stmts: Vec<Stmt>,
    values: Vec<Value>,
    instrs: Vec<ValueId>,
}

impl<'b> BodyCtx<'b> {
    fn add_value(&mut self, kind: ValueKind, ty: TypeId) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Value { kind, ty });
        id
    }

    fn add_instr(&mut self, kind: ValueKind, ty: TypeId) -> ValueId {
        let id = self.add_value(kind, ty);
        self.instrs.push(id);
        id
    }

    fn result_ty(&mut self, sig: TypeId) -> TypeId {
        let results = self
            .pb
            .program
            .types
            .signature(sig)
            .map(|s| s.results.clone())
            .unwrap_or_default();
        match results.first() {
            Some(r) => *r,
            None => self.pb.basic("void"),
        }
    }

    /// Reference to a function as an expression in this file's package.
    pub fn fn_expr(&mut self, handle: &FnHandle) -> Expr {
        let name = self.pb.program.ir.func(handle.func).name.clone();
        if handle.pkg != self.pkg {
            let pkg_name = self.pb.program.pkg(handle.pkg).name.clone();
            Expr::Selector {
                base: Box::new(Expr::Ident(Ident::new(pkg_name, self.pb.next_pos()))),
                sel: Ident::new(name, self.pb.next_pos()),
            }
        } else {
            Expr::Ident(Ident::new(name, self.pb.next_pos()))
        }
    }

    // ── Arguments ────────────────────────────────────────────────────

    pub fn arg_lit(&mut self, text: &str, ty: TypeId) -> Arg {
        let pos = self.pb.next_pos();
        let value = self.add_value(ValueKind::Const, ty);
        Arg { expr: Expr::Raw { text: text.to_string(), pos }, value }
    }

    pub fn arg_ident(&mut self, name: &str, ty: TypeId) -> Arg {
        let pos = self.pb.next_pos();
        let value = self.add_value(ValueKind::Const, ty);
        Arg { expr: Expr::Ident(Ident::new(name, pos)), value }
    }

    /// The enclosing function's parameter at `index`.
    pub fn arg_param(&mut self, index: usize) -> Arg {
        let sig = self.pb.program.ir.func(self.func).sig;
        let p = self.pb.program.types.signature(sig).unwrap().params[index].clone();
        let value = self.add_value(ValueKind::Parameter { index }, p.ty);
        let pos = self.pb.next_pos();
        Arg { expr: Expr::Ident(Ident::new(p.name.unwrap_or_default(), pos)), value }
    }

    /// A direct reference to a declared function.
    pub fn arg_fn(&mut self, handle: &FnHandle) -> Arg {
        let expr = self.fn_expr(handle);
        let value = self.add_value(ValueKind::FuncRef(handle.func), handle.sig);
        Arg { expr, value }
    }

    /// A function reference converted to a named function type, the way
    /// passing it at a named-type parameter position looks in the IR.
    pub fn arg_fn_as(&mut self, handle: &FnHandle, named: TypeId) -> Arg {
        let inner = self.arg_fn(handle);
        let value = self.add_instr(ValueKind::ChangeType { operand: inner.value }, named);
        Arg { expr: inner.expr, value }
    }

    /// A value boxed into an interface.
    pub fn arg_boxed(&mut self, iface: TypeId, inner: Arg) -> Arg {
        let value = self.add_instr(ValueKind::MakeInterface { operand: inner.value }, iface);
        Arg { expr: inner.expr, value }
    }

    // ── Calls ────────────────────────────────────────────────────────

    fn finish_call(
        &mut self,
        fun: Expr,
        target: CallTarget,
        sig: TypeId,
        ast_args: Vec<Expr>,
        ir_args: Vec<ValueId>,
        callee: Option<FuncId>,
        key_pos: Option<Pos>,
    ) -> Expr {
        self.finish_call_arg(fun, target, sig, ast_args, ir_args, callee, key_pos).expr
    }

    fn finish_call_arg(
        &mut self,
        fun: Expr,
        target: CallTarget,
        sig: TypeId,
        ast_args: Vec<Expr>,
        ir_args: Vec<ValueId>,
        callee: Option<FuncId>,
        key_pos: Option<Pos>,
    ) -> Arg {
        let lparen = self.pb.next_pos();
        let ir_pos = key_pos.unwrap_or(lparen);
        let result = self.result_ty(sig);
        let call = self.add_instr(
            ValueKind::Call(CallCommon { target, args: ir_args, sig, pos: ir_pos }),
            result,
        );
        if let Some(callee) = callee {
            let caller_node = self.pb.program.graph.node_of(self.func).unwrap();
            let callee_node = self.pb.program.graph.add_node(callee);
            self.pb
                .program
                .graph
                .add_edge(caller_node, callee_node, self.func, call, ir_pos);
        }
        Arg { expr: Expr::Call(CallExpr { fun: Box::new(fun), args: ast_args, lparen }), value: call }
    }

    /// Like [`Self::call_fn`], but usable as an argument of an outer call.
    pub fn call_fn_arg(&mut self, callee: &FnHandle, args: Vec<Arg>) -> Arg {
        let fun = self.fn_expr(callee);
        let fref = self.add_value(ValueKind::FuncRef(callee.func), callee.sig);
        let (exprs, values) = Self::split_args(args);
        self.finish_call_arg(
            fun,
            CallTarget::Value(fref),
            callee.sig,
            exprs,
            values,
            Some(callee.func),
            None,
        )
    }

    fn split_args(args: Vec<Arg>) -> (Vec<Expr>, Vec<ValueId>) {
        let values = args.iter().map(|a| a.value).collect();
        let exprs = args.into_iter().map(|a| a.expr).collect();
        (exprs, values)
    }

    /// Plain call of a declared function: `pkg.F(args)` or `F(args)`.
    pub fn call_fn(&mut self, callee: &FnHandle, args: Vec<Arg>) -> Expr {
        let fun = self.fn_expr(callee);
        let fref = self.add_value(ValueKind::FuncRef(callee.func), callee.sig);
        let (exprs, values) = Self::split_args(args);
        self.finish_call(fun, CallTarget::Value(fref), callee.sig, exprs, values, Some(callee.func), None)
    }

    /// Method call `recv.M(args)`; the receiver occupies the hidden first
    /// argument slot in the IR but not in the source argument list.
    pub fn call_method(&mut self, recv: Arg, callee: &FnHandle, args: Vec<Arg>) -> Expr {
        let method = self.pb.program.ir.func(callee.func).name.clone();
        let fun = Expr::Selector {
            base: Box::new(recv.expr),
            sel: Ident::new(method, self.pb.next_pos()),
        };
        let fref = self.add_value(ValueKind::FuncRef(callee.func), callee.sig);
        let (exprs, mut values) = Self::split_args(args);
        values.insert(0, recv.value);
        self.finish_call(fun, CallTarget::Value(fref), callee.sig, exprs, values, Some(callee.func), None)
    }

    /// Dynamic dispatch through an interface; the call graph resolves it to
    /// `concrete`.
    pub fn call_invoke(
        &mut self,
        recv: Expr,
        iface: TypeId,
        method_sig: TypeId,
        method: &str,
        concrete: &FnHandle,
        args: Vec<Arg>,
    ) -> Expr {
        let fun = Expr::Selector {
            base: Box::new(recv),
            sel: Ident::new(method, self.pb.next_pos()),
        };
        let (exprs, values) = Self::split_args(args);
        self.finish_call(
            fun,
            CallTarget::Invoke { iface, method: method.to_string() },
            method_sig,
            exprs,
            values,
            Some(concrete.func),
            None,
        )
    }

    /// Call through the enclosing function's parameter at `index`. The call
    /// graph overlays edges to every function in `overlays`, all sharing
    /// this one call site.
    pub fn call_param(&mut self, index: usize, overlays: &[FnHandle], args: Vec<Arg>) -> Expr {
        let sig = self.pb.program.ir.func(self.func).sig;
        let p = self.pb.program.types.signature(sig).unwrap().params[index].clone();
        let param_value = self.add_value(ValueKind::Parameter { index }, p.ty);
        // the callable signature is the underlying one even when the
        // parameter's type is named
        let call_sig = self.pb.program.types.underlying(p.ty);
        let fun = Expr::Ident(Ident::new(p.name.clone().unwrap_or_default(), self.pb.next_pos()));

        let lparen = self.pb.next_pos();
        let arg_values: Vec<ValueId> = args.iter().map(|a| a.value).collect();
        let arg_exprs: Vec<Expr> = args.into_iter().map(|a| a.expr).collect();
        let result = self.result_ty(call_sig);
        let call = self.add_instr(
            ValueKind::Call(CallCommon {
                target: CallTarget::Value(param_value),
                args: arg_values,
                sig: call_sig,
                pos: lparen,
            }),
            result,
        );
        for overlay in overlays {
            let caller_node = self.pb.program.graph.node_of(self.func).unwrap();
            let callee_node = self.pb.program.graph.add_node(overlay.func);
            self.pb
                .program
                .graph
                .add_edge(caller_node, callee_node, self.func, call, lparen);
        }
        Expr::Call(CallExpr { fun: Box::new(fun), args: arg_exprs, lparen })
    }

    /// Call through an arbitrary callable expression (map element, slice
    /// element, field). The call graph overlays edges to every function in
    /// `resolves_to`.
    pub fn call_indirect(
        &mut self,
        fun: Expr,
        sig: TypeId,
        resolves_to: &[FnHandle],
        args: Vec<Arg>,
    ) -> Expr {
        let callable = self.add_value(ValueKind::Const, sig);
        let (exprs, values) = Self::split_args(args);
        let lparen = self.pb.next_pos();
        let result = self.result_ty(sig);
        let call = self.add_instr(
            ValueKind::Call(CallCommon {
                target: CallTarget::Value(callable),
                args: values,
                sig,
                pos: lparen,
            }),
            result,
        );
        for callee in resolves_to {
            let caller_node = self.pb.program.graph.node_of(self.func).unwrap();
            let callee_node = self.pb.program.graph.add_node(callee.func);
            self.pb
                .program
                .graph
                .add_edge(caller_node, callee_node, self.func, call, lparen);
        }
        Expr::Call(CallExpr { fun: Box::new(fun), args: exprs, lparen })
    }

    /// Index expression `base[index]`.
    pub fn index(&mut self, base: Expr, index: Expr) -> Expr {
        Expr::Index { base: Box::new(base), index: Box::new(index) }
    }

    /// Variadic call to an external function: the pack is backed by an
    /// allocated array, element stores behind one conversion each, and a
    /// slice handed to the callee.
    pub fn call_fn_variadic(
        &mut self,
        callee: &FnHandle,
        mut fixed: Vec<Arg>,
        pack: Vec<Arg>,
        pack_elem: TypeId,
    ) -> Expr {
        let array = self.pb.array(pack_elem);
        let storage_ptr = self.pb.pointer(array);
        let alloc = self.add_instr(ValueKind::Alloc, storage_ptr);
        let elem_ptr = self.pb.pointer(pack_elem);
        let mut pack_exprs = Vec::new();
        for item in pack {
            let _ia = self.add_instr(ValueKind::IndexAddr { base: alloc }, elem_ptr);
            self.add_instr(ValueKind::MakeInterface { operand: item.value }, pack_elem);
            pack_exprs.push(item.expr);
        }
        let slice_ty = self.pb.slice(pack_elem);
        let slice = self.add_instr(ValueKind::SliceOp { operand: alloc }, slice_ty);

        let fun = self.fn_expr(callee);
        let fref = self.add_value(ValueKind::FuncRef(callee.func), callee.sig);
        let lparen = self.pb.next_pos();
        let mut arg_values: Vec<ValueId> = fixed.iter().map(|a| a.value).collect();
        arg_values.push(slice);
        let mut arg_exprs: Vec<Expr> = fixed.drain(..).map(|a| a.expr).collect();
        arg_exprs.extend(pack_exprs);
        let result = self.result_ty(callee.sig);
        let call = self.add_instr(
            ValueKind::Call(CallCommon {
                target: CallTarget::Value(fref),
                args: arg_values,
                sig: callee.sig,
                pos: lparen,
            }),
            result,
        );
        let caller_node = self.pb.program.graph.node_of(self.func).unwrap();
        let callee_node = self.pb.program.graph.add_node(callee.func);
        self.pb
            .program
            .graph
            .add_edge(caller_node, callee_node, self.func, call, lparen);
        Expr::Call(CallExpr { fun: Box::new(fun), args: arg_exprs, lparen })
    }

    /// A function literal; returns the closure argument (usable as a call
    /// target or argument) and the new function's handle.
    pub fn closure(
        &mut self,
        params: &[ParamSpec],
        results: &[TypeId],
        build: impl FnOnce(&mut BodyCtx),
    ) -> (Arg, FnHandle) {
        let parent = self.func;
        let parent_name = self.pb.program.ir.func(parent).name.clone();
        let lit_pos = self.pb.next_pos();

        let mut fields = Vec::new();
        let mut param_infos = Vec::new();
        for p in params {
            let pos = self.pb.next_pos();
            let names = match &p.name {
                Some(n) => vec![Ident::new(n.clone(), pos)],
                None => vec![],
            };
            fields.push(Field { names, ty: self.pb.type_expr_of(p.ty, self.pkg), pos });
            param_infos.push(ParamInfo { name: p.name.clone(), ty: p.ty, pos });
        }
        let closing = self.pb.next_pos();
        let sig = self.pb.program.types.add(TypeKind::Signature(SigInfo {
            recv: None,
            params: param_infos,
            results: results.to_vec(),
            variadic: false,
        }));

        let anon_index = self
            .pb
            .program
            .ir
            .funcs
            .iter()
            .filter(|f| f.parent == Some(parent))
            .count()
            + 1;
        let parent_pkg = self.pb.program.ir.func(parent).pkg;
        let func = FuncId(self.pb.program.ir.funcs.len() as u32);
        self.pb.program.ir.funcs.push(IrFunction {
            id: func,
            name: format!("{parent_name}${anon_index}"),
            pkg: parent_pkg,
            sig,
            table: self.pb.table,
            pos: lit_pos,
            parent: Some(parent),
            synthetic_init: false,
            blocks: Vec::new(),
            values: Vec::new(),
        });
        self.pb.program.graph.add_node(func);

        let mut inner = BodyCtx {
            pb: &mut *self.pb,
            func,
            pkg: self.pkg,
            stmts: Vec::new(),
            values: Vec::new(),
            instrs: Vec::new(),
        };
        build(&mut inner);
        let BodyCtx { stmts, values, instrs, .. } = inner;
        let body_pos = self.pb.next_pos();
        {
            let f = &mut self.pb.program.ir.funcs[func.0 as usize];
            f.values = values;
            f.blocks = vec![BasicBlock { instrs }];
        }

        let result_exprs: Vec<TypeExpr> =
            results.iter().map(|r| self.pb.type_expr_of(*r, self.pkg)).collect();
        let expr = Expr::FuncLit(Box::new(FuncLit {
            sig: FuncType {
                pos: lit_pos,
                params: FieldList { fields, closing },
                results: result_exprs,
            },
            body: Block { stmts, pos: body_pos },
        }));

        let value = self.add_value(ValueKind::MakeClosure { func }, sig);
        let handle =
            FnHandle { func, sig, name_pos: lit_pos, pkg: self.pkg, file: None };
        (Arg { expr, value }, handle)
    }

    /// Call a closure value directly: `f()` where `f` was bound to a literal.
    pub fn call_closure(&mut self, name: &str, closure: &Arg, handle: &FnHandle, args: Vec<Arg>) -> Expr {
        let fun = Expr::Ident(Ident::new(name, self.pb.next_pos()));
        let (exprs, values) = Self::split_args(args);
        self.finish_call(
            fun,
            CallTarget::Value(closure.value),
            handle.sig,
            exprs,
            values,
            Some(handle.func),
            None,
        )
    }

    // ── Statements ───────────────────────────────────────────────────

    pub fn expr_stmt(&mut self, expr: Expr) {
        self.stmts.push(Stmt::Expr(expr));
    }

    pub fn ret(&mut self, expr: Expr) {
        let pos = self.pb.next_pos();
        self.stmts.push(Stmt::Return { exprs: vec![expr], pos });
    }

    pub fn ret_nothing(&mut self) {
        let pos = self.pb.next_pos();
        self.stmts.push(Stmt::Return { exprs: vec![], pos });
    }

    pub fn define(&mut self, name: &str, expr: Expr) {
        let pos = self.pb.next_pos();
        self.stmts.push(Stmt::Assign {
            lhs: vec![Expr::Ident(Ident::new(name, pos))],
            rhs: vec![expr],
            define: true,
            pos,
        });
    }

    /// `go F(args)` — the call is keyed by the keyword position.
    pub fn spawn_call_fn(&mut self, callee: &FnHandle, args: Vec<Arg>) {
        let keyword = self.pb.next_pos();
        let call = self.call_fn_at(callee, args, keyword);
        self.stmts.push(Stmt::Spawn { call, pos: keyword });
    }

    /// `defer F(args)` — the call is keyed by the keyword position.
    pub fn defer_call_fn(&mut self, callee: &FnHandle, args: Vec<Arg>) {
        let keyword = self.pb.next_pos();
        let call = self.call_fn_at(callee, args, keyword);
        self.stmts.push(Stmt::Defer { call, pos: keyword });
    }

    /// `go F(closureArg)` and `defer F(closureArg)` for already-built calls.
    pub fn spawn(&mut self, call: Expr, keyword: Pos) {
        self.stmts.push(Stmt::Spawn { call, pos: keyword });
    }

    pub fn defer_stmt(&mut self, call: Expr, keyword: Pos) {
        self.stmts.push(Stmt::Defer { call, pos: keyword });
    }

    /// Reserve a keyword position for a spawn/defer built around a custom
    /// call.
    pub fn keyword_pos(&mut self) -> Pos {
        self.pb.next_pos()
    }

    /// Build a call of a declared function keyed at an explicit position
    /// (for spawn/defer statements).
    pub fn call_fn_at(&mut self, callee: &FnHandle, args: Vec<Arg>, key_pos: Pos) -> Expr {
        let fun = self.fn_expr(callee);
        let fref = self.add_value(ValueKind::FuncRef(callee.func), callee.sig);
        let (exprs, values) = Self::split_args(args);
        self.finish_call(
            fun,
            CallTarget::Value(fref),
            callee.sig,
            exprs,
            values,
            Some(callee.func),
            Some(key_pos),
        )
    }

    /// Map literal: AST plus the `MakeMap` instruction the pre-scan reads.
    pub fn map_lit(
        &mut self,
        key: TypeId,
        elem: TypeId,
        entries: Vec<(Expr, Expr)>,
    ) -> Expr {
        let map_ty = self.pb.map(key, elem);
        self.add_instr(ValueKind::MakeMap, map_ty);
        let pos = self.pb.next_pos();
        let key_expr = self.pb.type_expr_of(key, self.pkg);
        let elem_expr = self.pb.type_expr_of(elem, self.pkg);
        Expr::MapLit {
            key: Box::new(key_expr),
            elem: Box::new(elem_expr),
            entries,
            pos,
        }
    }

    /// Slice literal: AST plus the storage allocation the pre-scan reads.
    pub fn slice_lit(&mut self, elem: TypeId, elems: Vec<Expr>) -> Expr {
        let array_ty = self.pb.array(elem);
        let ptr = self.pb.pointer(array_ty);
        self.add_instr(ValueKind::Alloc, ptr);
        let pos = self.pb.next_pos();
        let elem_expr = self.pb.type_expr_of(elem, self.pkg);
        Expr::SliceLit { elem: Box::new(elem_expr), elems, pos }
    }

    pub fn raw(&mut self, text: &str) -> Expr {
        let pos = self.pb.next_pos();
        Expr::Raw { text: text.to_string(), pos }
    }

    pub fn ident(&mut self, name: &str) -> Expr {
        let pos = self.pb.next_pos();
        Expr::Ident(Ident::new(name, pos))
    }

    pub fn binary(&mut self, op: &str, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary { op: op.to_string(), lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }
}

/// Print all rewritten files joined by their paths, for golden comparisons.
pub fn print_outcome(program: &Program, outcome: &ctxweave::Outcome) -> HashMap<String, String> {
    outcome
        .files
        .iter()
        .map(|f| {
            let pkg_name = &program.pkg(f.ast.pkg).name;
            (f.path.clone(), ctxweave::pretty::print_file(&f.ast, pkg_name))
        })
        .collect()
}

/// Standard configuration used by most scenarios: context lives in `lib`,
/// leaves `A`..`G` rename to `CtxA`..`CtxG` with varying argument positions.
pub fn standard_config() -> ctxweave::Config {
    ctxweave::Config::from_json(
        r#"{
        "CtxPkgPath": "lib",
        "CtxPkgName": "lib",
        "CtxParamName": "ctx",
        "CtxParamType": "Context",
        "CtxParamInvalid": "Background()",
        "LibPkgPath": "lib",
        "LibPkgName": "lib",
        "LibFns": [
            {"Name": "A", "NewName": "CtxA"},
            {"Name": "B", "NewName": "CtxB"},
            {"Name": "C", "NewName": "CtxC", "ArgPos": 1},
            {"Name": "D", "NewName": "CtxD", "ArgPos": 2},
            {"Name": "E", "NewName": "CtxE", "ArgPos": -1},
            {"Name": "F", "Recv": {"PkgPath": "lib", "PkgName": "lib", "Type": "*Rec"}, "NewName": "CtxF"},
            {"Name": "G", "NewName": "CtxG", "CtxExpr": "<CTX_PREF>.Copy(<CTX>)"}
        ]
    }"#,
    )
    .unwrap()
}

/// The `lib` package most scenarios share: a `Context` interface, leaves
/// `A`..`G` and the `Rec` receiver type.
pub struct LibPkg {
    pub pkg: PkgId,
    pub context: TypeId,
    pub bool_ty: TypeId,
    pub rec: TypeId,
    pub rec_ptr: TypeId,
    pub leaf_a: FnHandle,
    pub leaf_b: FnHandle,
    pub leaf_c: FnHandle,
    pub leaf_d: FnHandle,
    pub leaf_e: FnHandle,
    pub leaf_f: FnHandle,
    pub leaf_g: FnHandle,
}

pub fn lib_pkg(b: &mut ProgramBuilder) -> LibPkg {
    let pkg = b.pkg("lib", "lib");
    let bool_ty = b.basic("bool");
    let val_sig = b.fn_sig(&[], &[bool_ty]);
    let ctx_iface = b.iface(&[("Val", val_sig)], &[]);
    let context = b.named(pkg, "Context", ctx_iface);
    let rec_struct = b.strukt(&[("R", bool_ty, false)]);
    let rec = b.named(pkg, "Rec", rec_struct);
    let rec_ptr = b.pointer(rec);

    let leaf_a = b.lib_fn(pkg, "A", None, &[], &[bool_ty]);
    let leaf_b = b.lib_fn(pkg, "B", None, &[param("b", bool_ty)], &[bool_ty]);
    let leaf_c = b.lib_fn(pkg, "C", None, &[param("b", bool_ty)], &[bool_ty]);
    let leaf_d =
        b.lib_fn(pkg, "D", None, &[param("b1", bool_ty), param("b2", bool_ty)], &[bool_ty]);
    let leaf_e =
        b.lib_fn(pkg, "E", None, &[param("b1", bool_ty), param("b2", bool_ty)], &[bool_ty]);
    let leaf_f = b.lib_fn(pkg, "F", Some(rec_ptr), &[], &[bool_ty]);
    let leaf_g = b.lib_fn(pkg, "G", None, &[], &[bool_ty]);

    LibPkg {
        pkg,
        context,
        bool_ty,
        rec,
        rec_ptr,
        leaf_a,
        leaf_b,
        leaf_c,
        leaf_d,
        leaf_e,
        leaf_f,
        leaf_g,
    }
}
