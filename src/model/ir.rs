//! SSA-lite view of function bodies: just enough of the instruction stream
//! for the pre-scan to find container element types, interface boxing,
//! closures and the stores backing variadic packs.
//!
//! Every value carries its type; instructions are values listed in block
//! order, so "the instruction after this one" is a well-defined question.

use serde::{Deserialize, Serialize};

use crate::span::{FileTableId, Pos};

use super::types::{PkgId, TypeId};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct FuncId(pub u32);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub kind: ValueKind,
    pub ty: TypeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueKind {
    /// Reference to a declared function.
    FuncRef(FuncId),
    /// The enclosing function's parameter at the given index.
    Parameter { index: usize },
    /// Closure over a function literal.
    MakeClosure { func: FuncId },
    /// Boxing a concrete value into an interface; the value's type is the
    /// interface type.
    MakeInterface { operand: ValueId },
    /// Map construction; the value's type is the map type.
    MakeMap,
    /// Slice construction; the value's type is the slice type.
    MakeSlice,
    /// Storage allocation; the value's type is a pointer to the storage.
    Alloc,
    ChangeType { operand: ValueId },
    Convert { operand: ValueId },
    ChangeInterface { operand: ValueId },
    /// Slicing of backing storage (how variadic packs reach their callee).
    SliceOp { operand: ValueId },
    /// Address of the i-th element of backing storage.
    IndexAddr { base: ValueId },
    Call(CallCommon),
    Const,
    Phi,
    UnOp { operand: ValueId },
    Extract { operand: ValueId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallCommon {
    pub target: CallTarget,
    pub args: Vec<ValueId>,
    /// Signature of the called value (or interface method).
    pub sig: TypeId,
    /// Position keying the call site: the call's left paren, or the spawn or
    /// defer keyword when the call is wrapped in one.
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallTarget {
    /// Call of a first-class value (direct reference, closure, parameter).
    Value(ValueId),
    /// Dynamic dispatch through an interface method.
    Invoke { iface: TypeId, method: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub instrs: Vec<ValueId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrFunction {
    pub id: FuncId,
    pub name: String,
    pub pkg: Option<PkgId>,
    pub sig: TypeId,
    pub table: FileTableId,
    /// Declaration position: the name for declared functions, the type
    /// position for literals.
    pub pos: Pos,
    /// Enclosing function, for function literals.
    pub parent: Option<FuncId>,
    /// Synthesised package initialiser (no source counterpart).
    pub synthetic_init: bool,
    /// Empty for functions without a body.
    pub blocks: Vec<BasicBlock>,
    pub values: Vec<Value>,
}

impl IrFunction {
    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.0 as usize]
    }

    pub fn has_body(&self) -> bool {
        !self.blocks.is_empty()
    }

    /// The block containing an instruction, with the instruction's index in
    /// it.
    pub fn block_of(&self, id: ValueId) -> Option<(&BasicBlock, usize)> {
        for block in &self.blocks {
            if let Some(idx) = block.instrs.iter().position(|v| *v == id) {
                return Some((block, idx));
            }
        }
        None
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IrProgram {
    /// Indexed by `FuncId`.
    pub funcs: Vec<IrFunction>,
}

impl IrProgram {
    pub fn func(&self, id: FuncId) -> &IrFunction {
        &self.funcs[id.0 as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &IrFunction> {
        self.funcs.iter()
    }
}
