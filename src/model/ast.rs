//! Typed AST of the analyzed (object) language: a package-structured
//! imperative language with interfaces, methods, closures and named function
//! types.
//!
//! Node kinds form a closed set; the rewrite matches on them and replaces
//! nodes wholesale. Every node the analysis keys a decision on carries its
//! source position: function declarations their name position, function
//! literals the position of their type, call expressions their left paren,
//! parameter fields their field position.

use serde::{Deserialize, Serialize};

use crate::span::Pos;

use super::types::PkgId;
use crate::span::FileTableId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ident {
    pub name: String,
    pub pos: Pos,
}

impl Ident {
    pub fn new(name: impl Into<String>, pos: Pos) -> Self {
        Self { name: name.into(), pos }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDecl {
    pub path: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub pkg: PkgId,
    pub table: FileTableId,
    pub imports: Vec<ImportDecl>,
    pub decls: Vec<Decl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decl {
    Func(FuncDecl),
    Type(TypeDecl),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncDecl {
    pub name: Ident,
    pub recv: Option<Field>,
    pub sig: FuncType,
    /// `None` for declarations without a body.
    pub body: Option<Block>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: Ident,
    pub ty: TypeExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncType {
    /// Position of the `func` keyword; the identity key for function
    /// literals.
    pub pos: Pos,
    pub params: FieldList,
    pub results: Vec<TypeExpr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldList {
    pub fields: Vec<Field>,
    /// Position of the closing parenthesis, used to pin injected fields.
    pub closing: Pos,
}

impl FieldList {
    pub fn empty(closing: Pos) -> Self {
        Self { fields: Vec::new(), closing }
    }
}

/// One entry in a parameter, result, receiver, struct or interface-method
/// list. Interface methods carry the method name in `names` and a function
/// type in `ty`; embedded fields have empty `names`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub names: Vec<Ident>,
    pub ty: TypeExpr,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeExpr {
    /// A plain (possibly package-qualified) type name, printed verbatim.
    Name(Ident),
    Pointer(Box<TypeExpr>),
    Slice(Box<TypeExpr>),
    Map(Box<TypeExpr>, Box<TypeExpr>),
    Func(Box<FuncType>),
    Interface(InterfaceType),
    Struct(StructType),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceType {
    pub methods: FieldList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructType {
    pub fields: FieldList,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Expr(Expr),
    /// `lhs := rhs` when `define`, plain assignment otherwise.
    Assign { lhs: Vec<Expr>, rhs: Vec<Expr>, define: bool, pos: Pos },
    Return { exprs: Vec<Expr>, pos: Pos },
    /// Spawned call; `pos` is the keyword position and keys the call site.
    Spawn { call: Expr, pos: Pos },
    /// Deferred call; `pos` is the keyword position and keys the call site.
    Defer { call: Expr, pos: Pos },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Ident(Ident),
    /// `base.sel` — package-qualified names, field accesses, method values.
    Selector { base: Box<Expr>, sel: Ident },
    Call(CallExpr),
    FuncLit(Box<FuncLit>),
    StructLit { ty: TypeExpr, fields: Vec<(Ident, Expr)>, pos: Pos },
    MapLit { key: Box<TypeExpr>, elem: Box<TypeExpr>, entries: Vec<(Expr, Expr)>, pos: Pos },
    SliceLit { elem: Box<TypeExpr>, elems: Vec<Expr>, pos: Pos },
    Index { base: Box<Expr>, index: Box<Expr> },
    Unary { op: String, operand: Box<Expr>, pos: Pos },
    Binary { op: String, lhs: Box<Expr>, rhs: Box<Expr> },
    /// A literal or an injected expression, printed verbatim.
    Raw { text: String, pos: Pos },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallExpr {
    pub fun: Box<Expr>,
    pub args: Vec<Expr>,
    pub lparen: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncLit {
    pub sig: FuncType,
    pub body: Block,
}
