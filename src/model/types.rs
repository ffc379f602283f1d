//! Semantic types of the analyzed program: an arena of type nodes plus the
//! method sets of named types.
//!
//! Named types compare by identity (their arena id); everything else compares
//! structurally. Interface satisfaction flattens embedded interfaces, and
//! signature identity ignores receivers and parameter names, which is what
//! the propagation needs when matching methods against interface methods.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::span::{Pos, SiteKey};

use super::ir::FuncId;
use super::PackageInfo;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PkgId(pub u32);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TypeId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamInfo {
    pub name: Option<String>,
    pub ty: TypeId,
    /// Declaration position of the parameter (name position when named,
    /// field position otherwise).
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigInfo {
    pub recv: Option<TypeId>,
    pub params: Vec<ParamInfo>,
    pub results: Vec<TypeId>,
    pub variadic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub ty: TypeId,
    pub embedded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructInfo {
    pub fields: Vec<FieldInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IfaceMethod {
    pub name: String,
    pub sig: TypeId,
    /// Position of the method's field in the declaring interface.
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub methods: Vec<IfaceMethod>,
    /// Embedded interfaces (named interface type ids).
    pub embeds: Vec<TypeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeKind {
    Basic(String),
    Named {
        name: String,
        pkg: Option<PkgId>,
        underlying: TypeId,
        /// Declaration site of the type name, keying named-type rewrites.
        decl: SiteKey,
    },
    Pointer(TypeId),
    Slice(TypeId),
    Array(TypeId),
    Map { key: TypeId, elem: TypeId },
    Struct(StructInfo),
    Interface(InterfaceInfo),
    Signature(SigInfo),
}

/// A concrete method of a named type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInfo {
    pub name: String,
    pub func: FuncId,
    pub sig: TypeId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeTable {
    kinds: Vec<TypeKind>,
    /// Concrete methods, keyed by named type.
    #[serde(with = "super::serde_pairs")]
    methods: HashMap<TypeId, Vec<MethodInfo>>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: TypeKind) -> TypeId {
        let id = TypeId(self.kinds.len() as u32);
        self.kinds.push(kind);
        id
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.kinds[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &TypeKind)> {
        self.kinds.iter().enumerate().map(|(i, k)| (TypeId(i as u32), k))
    }

    pub fn add_method(&mut self, named: TypeId, method: MethodInfo) {
        self.methods.entry(named).or_default().push(method);
    }

    /// Resolve named chains down to the structural type.
    pub fn underlying(&self, id: TypeId) -> TypeId {
        let mut cur = id;
        while let TypeKind::Named { underlying, .. } = self.kind(cur) {
            cur = *underlying;
        }
        cur
    }

    pub fn signature(&self, id: TypeId) -> Option<&SigInfo> {
        match self.kind(id) {
            TypeKind::Signature(sig) => Some(sig),
            _ => None,
        }
    }

    pub fn signature_of(&self, id: TypeId) -> Option<&SigInfo> {
        self.signature(self.underlying(id))
    }

    /// Concrete method set of a type: the methods of the named type itself
    /// or of the named type behind one pointer.
    pub fn method_set(&self, id: TypeId) -> &[MethodInfo] {
        let base = match self.kind(id) {
            TypeKind::Pointer(inner) => *inner,
            _ => id,
        };
        self.methods.get(&base).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Structural identity; named types compare by arena id, signatures
    /// ignore receivers and parameter names.
    pub fn identical(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        match (self.kind(a), self.kind(b)) {
            (TypeKind::Basic(x), TypeKind::Basic(y)) => x == y,
            (TypeKind::Named { .. }, TypeKind::Named { .. }) => false,
            (TypeKind::Pointer(x), TypeKind::Pointer(y))
            | (TypeKind::Slice(x), TypeKind::Slice(y))
            | (TypeKind::Array(x), TypeKind::Array(y)) => self.identical(*x, *y),
            (TypeKind::Map { key: k1, elem: e1 }, TypeKind::Map { key: k2, elem: e2 }) => {
                self.identical(*k1, *k2) && self.identical(*e1, *e2)
            }
            (TypeKind::Struct(s1), TypeKind::Struct(s2)) => {
                s1.fields.len() == s2.fields.len()
                    && s1.fields.iter().zip(&s2.fields).all(|(f1, f2)| {
                        f1.name == f2.name
                            && f1.embedded == f2.embedded
                            && self.identical(f1.ty, f2.ty)
                    })
            }
            (TypeKind::Interface(_), TypeKind::Interface(_)) => {
                let m1 = self.flatten_iface(a);
                let m2 = self.flatten_iface(b);
                m1.len() == m2.len()
                    && m1
                        .iter()
                        .zip(&m2)
                        .all(|(x, y)| x.name == y.name && self.identical(x.sig, y.sig))
            }
            (TypeKind::Signature(s1), TypeKind::Signature(s2)) => {
                s1.variadic == s2.variadic
                    && s1.params.len() == s2.params.len()
                    && s1.results.len() == s2.results.len()
                    && s1
                        .params
                        .iter()
                        .zip(&s2.params)
                        .all(|(p1, p2)| self.identical(p1.ty, p2.ty))
                    && s1
                        .results
                        .iter()
                        .zip(&s2.results)
                        .all(|(r1, r2)| self.identical(*r1, *r2))
            }
            _ => false,
        }
    }

    /// All methods an interface requires, flattened through embedded
    /// interfaces, sorted by name.
    pub fn flatten_iface(&self, iface: TypeId) -> Vec<IfaceMethod> {
        let mut out = Vec::new();
        self.flatten_iface_into(iface, &mut out);
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out.dedup_by(|a, b| a.name == b.name);
        out
    }

    fn flatten_iface_into(&self, iface: TypeId, out: &mut Vec<IfaceMethod>) {
        if let TypeKind::Interface(info) = self.kind(self.underlying(iface)) {
            out.extend(info.methods.iter().cloned());
            for embed in &info.embeds {
                self.flatten_iface_into(*embed, out);
            }
        }
    }

    /// Whether `t`'s method set satisfies `iface`.
    pub fn implements(&self, t: TypeId, iface: TypeId) -> bool {
        let required = self.flatten_iface(iface);
        if required.is_empty() {
            // every type satisfies the empty interface; nothing to propagate
            // through it either
            return true;
        }
        if let TypeKind::Interface(_) = self.kind(self.underlying(t)) {
            let have = self.flatten_iface(t);
            return required.iter().all(|r| {
                have.iter().any(|m| m.name == r.name && self.identical(m.sig, r.sig))
            });
        }
        let ms = self.method_set(t);
        required
            .iter()
            .all(|r| ms.iter().any(|m| m.name == r.name && self.identical(m.sig, r.sig)))
    }

    /// Locate the interface that actually declares `method_name`, searching
    /// embedded interfaces recursively. Returns the declaring method and the
    /// declaring interface.
    pub fn method_and_interface(
        &self,
        method_name: &str,
        iface: TypeId,
    ) -> Option<(IfaceMethod, TypeId)> {
        let info = match self.kind(self.underlying(iface)) {
            TypeKind::Interface(info) => info,
            _ => return None,
        };
        for m in &info.methods {
            if m.name == method_name {
                return Some((m.clone(), iface));
            }
        }
        for embed in &info.embeds {
            if let Some(found) = self.method_and_interface(method_name, *embed) {
                return Some(found);
            }
        }
        None
    }

    /// Render a type qualified with its defining package path and name, with
    /// a leading `*` for pointers. This is the form configuration entries are
    /// matched against.
    pub fn qualified_name(&self, id: TypeId, pkgs: &[PackageInfo]) -> String {
        match self.kind(id) {
            TypeKind::Basic(name) => name.clone(),
            TypeKind::Named { name, pkg, .. } => match pkg {
                Some(p) => {
                    let info = &pkgs[p.0 as usize];
                    format!("{}{}.{}", info.path, info.name, name)
                }
                None => name.clone(),
            },
            TypeKind::Pointer(inner) => format!("*{}", self.qualified_name(*inner, pkgs)),
            TypeKind::Slice(inner) => format!("[]{}", self.qualified_name(*inner, pkgs)),
            TypeKind::Array(inner) => format!("[...]{}", self.qualified_name(*inner, pkgs)),
            TypeKind::Map { key, elem } => format!(
                "map[{}]{}",
                self.qualified_name(*key, pkgs),
                self.qualified_name(*elem, pkgs)
            ),
            TypeKind::Struct(_) => "struct{...}".to_string(),
            TypeKind::Interface(_) => "interface{...}".to_string(),
            TypeKind::Signature(sig) => {
                let params: Vec<String> =
                    sig.params.iter().map(|p| self.qualified_name(p.ty, pkgs)).collect();
                format!("func({})", params.join(", "))
            }
        }
    }

    /// Short rendering used in warnings: the bare name for named types, the
    /// package-qualified rendering otherwise.
    pub fn short_name(&self, id: TypeId, pkgs: &[PackageInfo]) -> String {
        match self.kind(id) {
            TypeKind::Named { name, .. } => name.clone(),
            _ => self.qualified_name(id, pkgs),
        }
    }

    /// Source-like rendering: named types print as `pkgname.Name`.
    pub fn display(&self, id: TypeId, pkgs: &[PackageInfo]) -> String {
        match self.kind(id) {
            TypeKind::Basic(name) => name.clone(),
            TypeKind::Named { name, pkg, .. } => match pkg {
                Some(p) => format!("{}.{}", pkgs[p.0 as usize].name, name),
                None => name.clone(),
            },
            TypeKind::Pointer(inner) => format!("*{}", self.display(*inner, pkgs)),
            TypeKind::Slice(inner) => format!("[]{}", self.display(*inner, pkgs)),
            TypeKind::Array(inner) => format!("[...]{}", self.display(*inner, pkgs)),
            TypeKind::Map { key, elem } => {
                format!("map[{}]{}", self.display(*key, pkgs), self.display(*elem, pkgs))
            }
            TypeKind::Struct(_) => "struct{...}".to_string(),
            TypeKind::Interface(_) => "interface{...}".to_string(),
            TypeKind::Signature(sig) => {
                let params: Vec<String> =
                    sig.params.iter().map(|p| self.display(p.ty, pkgs)).collect();
                format!("func({})", params.join(", "))
            }
        }
    }
}
