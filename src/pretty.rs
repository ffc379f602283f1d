//! Print a rewritten source file back into compilable text.
//!
//! The output is a canonical rendering, not a byte-for-byte reproduction of
//! the input formatting; semantic equivalence is the contract.

use crate::model::ast::*;

/// Pretty-print a source file.
pub fn print_file(file: &SourceFile, pkg_name: &str) -> String {
    let mut pp = Printer::new();
    pp.emit_file(file, pkg_name);
    pp.buf
}

struct Printer {
    buf: String,
    indent: usize,
}

impl Printer {
    fn new() -> Self {
        Self { buf: String::new(), indent: 0 }
    }

    fn write(&mut self, s: &str) {
        self.buf.push_str(s);
    }

    fn newline(&mut self) {
        self.buf.push('\n');
    }

    fn write_indent(&mut self) {
        for _ in 0..self.indent {
            self.buf.push('\t');
        }
    }

    // ── File ─────────────────────────────────────────────────────────

    fn emit_file(&mut self, file: &SourceFile, pkg_name: &str) {
        self.write("package ");
        self.write(pkg_name);
        self.newline();

        if !file.imports.is_empty() {
            self.newline();
            self.emit_imports(&file.imports);
        }

        for decl in &file.decls {
            self.newline();
            match decl {
                Decl::Func(fd) => self.emit_func_decl(fd),
                Decl::Type(td) => self.emit_type_decl(td),
            }
        }
    }

    fn emit_imports(&mut self, imports: &[ImportDecl]) {
        if let [only] = imports {
            self.write("import ");
            self.emit_import(only);
            self.newline();
            return;
        }
        self.write("import (");
        self.newline();
        for imp in imports {
            self.write("\t");
            self.emit_import(imp);
            self.newline();
        }
        self.write(")");
        self.newline();
    }

    fn emit_import(&mut self, imp: &ImportDecl) {
        if let Some(alias) = &imp.alias {
            self.write(alias);
            self.write(" ");
        }
        self.write(&format!("{:?}", imp.path));
    }

    // ── Declarations ─────────────────────────────────────────────────

    fn emit_func_decl(&mut self, fd: &FuncDecl) {
        self.write("func ");
        if let Some(recv) = &fd.recv {
            self.write("(");
            self.emit_field(recv);
            self.write(") ");
        }
        self.write(&fd.name.name);
        self.emit_signature(&fd.sig);
        match &fd.body {
            Some(body) => {
                self.write(" ");
                self.emit_block(body);
                self.newline();
            }
            None => self.newline(),
        }
    }

    fn emit_type_decl(&mut self, td: &TypeDecl) {
        self.write("type ");
        self.write(&td.name.name);
        self.write(" ");
        self.emit_type_expr(&td.ty);
        self.newline();
    }

    fn emit_signature(&mut self, sig: &FuncType) {
        self.write("(");
        self.emit_params(&sig.params);
        self.write(")");
        match sig.results.as_slice() {
            [] => {}
            [only] => {
                self.write(" ");
                self.emit_type_expr(only);
            }
            many => {
                self.write(" (");
                for (i, r) in many.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.emit_type_expr(r);
                }
                self.write(")");
            }
        }
    }

    fn emit_params(&mut self, params: &FieldList) {
        for (i, field) in params.fields.iter().enumerate() {
            if i > 0 {
                self.write(", ");
            }
            self.emit_field(field);
        }
    }

    fn emit_field(&mut self, field: &Field) {
        for (i, name) in field.names.iter().enumerate() {
            if i > 0 {
                self.write(", ");
            }
            self.write(&name.name);
        }
        if !field.names.is_empty() {
            self.write(" ");
        }
        self.emit_type_expr(&field.ty);
    }

    fn emit_type_expr(&mut self, ty: &TypeExpr) {
        match ty {
            TypeExpr::Name(id) => self.write(&id.name),
            TypeExpr::Pointer(inner) => {
                self.write("*");
                self.emit_type_expr(inner);
            }
            TypeExpr::Slice(inner) => {
                self.write("[]");
                self.emit_type_expr(inner);
            }
            TypeExpr::Map(key, elem) => {
                self.write("map[");
                self.emit_type_expr(key);
                self.write("]");
                self.emit_type_expr(elem);
            }
            TypeExpr::Func(ft) => {
                self.write("func");
                self.emit_signature(ft);
            }
            TypeExpr::Interface(iface) => {
                self.write("interface {");
                self.newline();
                self.indent += 1;
                for field in &iface.methods.fields {
                    self.write_indent();
                    if field.names.is_empty() {
                        // embedded interface
                        self.emit_type_expr(&field.ty);
                    } else {
                        self.write(&field.names[0].name);
                        if let TypeExpr::Func(ft) = &field.ty {
                            self.emit_signature(ft);
                        }
                    }
                    self.newline();
                }
                self.indent -= 1;
                self.write_indent();
                self.write("}");
            }
            TypeExpr::Struct(st) => {
                self.write("struct {");
                self.newline();
                self.indent += 1;
                for field in &st.fields.fields {
                    self.write_indent();
                    self.emit_field(field);
                    self.newline();
                }
                self.indent -= 1;
                self.write_indent();
                self.write("}");
            }
        }
    }

    // ── Statements ───────────────────────────────────────────────────

    fn emit_block(&mut self, block: &Block) {
        self.write("{");
        self.newline();
        self.indent += 1;
        for stmt in &block.stmts {
            self.write_indent();
            self.emit_stmt(stmt);
            self.newline();
        }
        self.indent -= 1;
        self.write_indent();
        self.write("}");
    }

    fn emit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(e) => self.emit_expr(e),
            Stmt::Assign { lhs, rhs, define, .. } => {
                for (i, e) in lhs.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.emit_expr(e);
                }
                self.write(if *define { " := " } else { " = " });
                for (i, e) in rhs.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.emit_expr(e);
                }
            }
            Stmt::Return { exprs, .. } => {
                self.write("return");
                for (i, e) in exprs.iter().enumerate() {
                    self.write(if i > 0 { ", " } else { " " });
                    self.emit_expr(e);
                }
            }
            Stmt::Spawn { call, .. } => {
                self.write("go ");
                self.emit_expr(call);
            }
            Stmt::Defer { call, .. } => {
                self.write("defer ");
                self.emit_expr(call);
            }
        }
    }

    // ── Expressions ──────────────────────────────────────────────────

    fn emit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Ident(id) => self.write(&id.name),
            Expr::Raw { text, .. } => self.write(text),
            Expr::Selector { base, sel } => {
                self.emit_expr(base);
                self.write(".");
                self.write(&sel.name);
            }
            Expr::Call(call) => {
                self.emit_expr(&call.fun);
                self.write("(");
                for (i, arg) in call.args.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.emit_expr(arg);
                }
                self.write(")");
            }
            Expr::FuncLit(fl) => {
                self.write("func");
                self.emit_signature(&fl.sig);
                self.write(" ");
                self.emit_block(&fl.body);
            }
            Expr::StructLit { ty, fields, .. } => {
                self.emit_type_expr(ty);
                self.write("{");
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.write(&name.name);
                    self.write(": ");
                    self.emit_expr(value);
                }
                self.write("}");
            }
            Expr::MapLit { key, elem, entries, .. } => {
                self.write("map[");
                self.emit_type_expr(key);
                self.write("]");
                self.emit_type_expr(elem);
                self.write("{");
                self.newline();
                self.indent += 1;
                for (k, v) in entries {
                    self.write_indent();
                    self.emit_expr(k);
                    self.write(": ");
                    self.emit_expr(v);
                    self.write(",");
                    self.newline();
                }
                self.indent -= 1;
                self.write_indent();
                self.write("}");
            }
            Expr::SliceLit { elem, elems, .. } => {
                self.write("[]");
                self.emit_type_expr(elem);
                self.write("{");
                self.newline();
                self.indent += 1;
                for e in elems {
                    self.write_indent();
                    self.emit_expr(e);
                    self.write(",");
                    self.newline();
                }
                self.indent -= 1;
                self.write_indent();
                self.write("}");
            }
            Expr::Index { base, index } => {
                self.emit_expr(base);
                self.write("[");
                self.emit_expr(index);
                self.write("]");
            }
            Expr::Unary { op, operand, .. } => {
                self.write(op);
                self.emit_expr(operand);
            }
            Expr::Binary { op, lhs, rhs } => {
                self.emit_expr(lhs);
                self.write(" ");
                self.write(op);
                self.write(" ");
                self.emit_expr(rhs);
            }
        }
    }
}
