//! The program bundle the engine consumes: packages, typed ASTs, the type
//! table, SSA-lite function bodies, the call graph, and the position service.
//!
//! A loader outside this crate assembles the bundle (tests assemble it with a
//! builder); the engine treats it as read-only input. The bundle is
//! serde-serializable so a loader can hand it over as a file.

pub mod ast;
pub mod callgraph;
pub mod ir;
pub mod types;

use serde::{Deserialize, Serialize};

use crate::span::{FileTableId, Pos, PositionTable, SiteKey};
use ast::SourceFile;
use callgraph::{CallGraph, Edge};
use ir::{CallCommon, IrFunction, IrProgram, Value, ValueKind};
use types::{PkgId, TypeTable};

/// One package of the analyzed program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub path: String,
    pub name: String,
}

/// The whole analyzed program.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    /// Indexed by `PkgId`.
    pub packages: Vec<PackageInfo>,
    pub files: Vec<SourceFile>,
    pub types: TypeTable,
    pub ir: IrProgram,
    pub graph: CallGraph,
    pub positions: PositionTable,
    /// Packages dropped at load time (build problems); reported, never
    /// analyzed.
    pub excluded: Vec<String>,
    /// True when the program was loaded in batches with independent file
    /// tables. When false, all site keys collapse to `FileTableId::NONE`.
    pub batched: bool,
}

impl Program {
    pub fn pkg(&self, id: PkgId) -> &PackageInfo {
        &self.packages[id.0 as usize]
    }

    /// Identity key for a position inside the given function's file table.
    pub fn site_key(&self, func: &IrFunction, pos: Pos) -> SiteKey {
        if self.batched {
            SiteKey::new(func.table, pos)
        } else {
            SiteKey::new(FileTableId::NONE, pos)
        }
    }

    /// Identity key for a position inside the given file table.
    pub fn site_key_in(&self, table: FileTableId, pos: Pos) -> SiteKey {
        if self.batched {
            SiteKey::new(table, pos)
        } else {
            SiteKey::new(FileTableId::NONE, pos)
        }
    }

    /// The call instruction an edge points at.
    pub fn edge_call(&self, edge: &Edge) -> &CallCommon {
        let func = self.ir.func(edge.site_fn);
        match &func.value(edge.site_instr).kind {
            ValueKind::Call(common) => common,
            other => panic!("edge site is not a call instruction: {other:?}"),
        }
    }

    /// The function physically containing an edge's call instruction.
    pub fn edge_site_fn(&self, edge: &Edge) -> &IrFunction {
        self.ir.func(edge.site_fn)
    }

    pub fn value_of<'a>(&self, func: &'a IrFunction, id: ir::ValueId) -> &'a Value {
        func.value(id)
    }
}

/// Serialize map-shaped side tables as pair lists so the bundle stays plain
/// JSON (object keys must be strings there).
pub(crate) mod serde_pairs {
    use serde::de::Deserialize;
    use serde::{Deserializer, Serialize, Serializer};
    use std::collections::HashMap;
    use std::hash::Hash;

    pub fn serialize<K, V, S>(map: &HashMap<K, V>, ser: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize + Ord,
        V: Serialize,
        S: Serializer,
    {
        let mut pairs: Vec<(&K, &V)> = map.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        pairs.serialize(ser)
    }

    pub fn deserialize<'de, K, V, D>(de: D) -> Result<HashMap<K, V>, D::Error>
    where
        K: Deserialize<'de> + Eq + Hash,
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let pairs: Vec<(K, V)> = Vec::deserialize(de)?;
        Ok(pairs.into_iter().collect())
    }
}
