//! Mid-level IR: per-function control-flow graphs of basic blocks with
//! three-address instructions and explicit terminators.
//!
//! A [`MirModule`] is the compilation unit handed to the interpreter. It is
//! fully serializable (serde + postcard) so hosts can precompile sources and
//! execute the snapshot later.
//!
//! # Module Structure
//!
//! - `mod` - MIR data model (this file)
//! - `lower` - resolved-HIR to MIR lowering
//! - `passes` - the ordered optimization pipeline (const-fold, copy-prop,
//!   cse, dce)

pub(crate) mod lower;
pub(crate) mod passes;

use serde::{Deserialize, Serialize};

use crate::error::{Error, RunResult};

/// Index of a local slot within one function frame.
pub type Local = u32;
/// Index of a basic block within one function.
pub type BlockId = u32;
/// Index of a function within its module.
pub type FuncId = u32;

/// A compile-time constant operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Const {
    Null,
    /// Sentinel for a parameter slot awaiting default completion. Never
    /// observable from Nova code.
    Undefined,
    Bool(bool),
    Int(i64),
    Long(i64),
    Double(f64),
    Char(char),
    Str(String),
}

/// Binary opcodes. Logical `&&`/`||` never reach MIR; they are lowered to
/// control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum UnOp {
    Neg,
    Not,
}

/// One `catch` arm of a protected region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchArm {
    /// Error-kind filter; `None` catches every kind.
    pub kind: Option<String>,
    pub block: BlockId,
}

/// Import request executed by the module loader at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportSpec {
    /// `import a.b.Symbol [as Alias]`
    Named {
        path: Vec<String>,
        name: String,
        alias: Option<String>,
    },
    /// `import a.b.*`
    Wildcard { path: Vec<String> },
    /// `import java fq.Class [as Alias]` / `import java fq.*`
    Java {
        path: Vec<String>,
        wildcard: bool,
        alias: Option<String>,
    },
    /// `import static fq.Member [as Alias]`
    JavaStatic { path: Vec<String>, alias: Option<String> },
}

/// Three-address instruction set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    Const {
        dst: Local,
        value: Const,
    },
    Copy {
        dst: Local,
        src: Local,
    },
    /// Reads a capture cell of the current closure.
    LoadCapture {
        dst: Local,
        index: u32,
    },
    /// Writes through a capture cell of the current closure.
    StoreCapture {
        index: u32,
        src: Local,
    },
    LoadGlobal {
        dst: Local,
        name: String,
    },
    StoreGlobal {
        name: String,
        src: Local,
    },
    LoadField {
        dst: Local,
        obj: Local,
        name: String,
    },
    StoreField {
        obj: Local,
        name: String,
        src: Local,
    },
    LoadStatic {
        dst: Local,
        class: Local,
        name: String,
    },
    StoreStatic {
        class: Local,
        name: String,
        src: Local,
    },
    LoadIndex {
        dst: Local,
        obj: Local,
        index: Local,
    },
    StoreIndex {
        obj: Local,
        index: Local,
        src: Local,
    },
    Binary {
        dst: Local,
        op: BinOp,
        lhs: Local,
        rhs: Local,
    },
    Unary {
        dst: Local,
        op: UnOp,
        operand: Local,
    },
    Call {
        dst: Local,
        func: Local,
        args: Vec<Local>,
        names: Vec<Option<String>>,
    },
    CallMethod {
        dst: Local,
        recv: Local,
        name: String,
        args: Vec<Local>,
        names: Vec<Option<String>>,
    },
    /// Direct instantiation of a class resolved at lowering time.
    NewObject {
        dst: Local,
        class: Local,
        args: Vec<Local>,
        names: Vec<Option<String>>,
    },
    /// Runs the superclass constructor chain on the object under
    /// construction. Valid only inside constructor-init functions.
    SuperInit {
        args: Vec<Local>,
        names: Vec<Option<String>>,
    },
    ClosureMake {
        dst: Local,
        func: FuncId,
    },
    ListNew {
        dst: Local,
    },
    ListPush {
        list: Local,
        item: Local,
    },
    /// Appends every element of `items` (spread argument `*e`).
    ListSpread {
        list: Local,
        items: Local,
    },
    RangeNew {
        dst: Local,
        start: Local,
        end: Local,
        step: Option<Local>,
        inclusive: bool,
        down: bool,
    },
    PairNew {
        dst: Local,
        first: Local,
        second: Local,
    },
    Cast {
        dst: Local,
        src: Local,
        ty: String,
        safe: bool,
    },
    TypeTest {
        dst: Local,
        src: Local,
        ty: String,
        negated: bool,
    },
    /// Canonical recursive `toString` coercion.
    ToStr {
        dst: Local,
        src: Local,
    },
    Concat {
        dst: Local,
        lhs: Local,
        rhs: Local,
    },
    /// `val (a, b) = e` component extraction: `componentN()` when defined,
    /// else positional list/pair access.
    Destructure {
        dst: Local,
        src: Local,
        index: u32,
    },
    IterNew {
        dst: Local,
        src: Local,
    },
    IterHasNext {
        dst: Local,
        iter: Local,
    },
    IterNext {
        dst: Local,
        iter: Local,
    },
    Throw {
        src: Local,
    },
    /// Enters a protected region; popped by `TryPop` on the normal path.
    TryPush {
        catches: Vec<CatchArm>,
        finally_block: Option<BlockId>,
    },
    TryPop,
    /// First instruction of a catch block: binds the in-flight error value.
    CatchBind {
        dst: Local,
    },
    /// `use` teardown: calls `close()`, attaching failures per resource
    /// semantics (surface on normal exit, suppressed note while unwinding).
    CloseResource {
        src: Local,
    },
    DeclareClass {
        dst: Local,
        class_idx: u32,
        superclass: Option<Local>,
        /// Evaluated annotation arguments, index-aligned with
        /// `MirClass::annotations`.
        ann_args: Vec<Vec<Local>>,
    },
    /// Invokes matching annotation processors after the class definition
    /// (including statics) has completed.
    FireProcessors {
        class: Local,
    },
    /// Registers an extension function for dispatch on a type name.
    RegisterExt {
        type_name: String,
        method: String,
        func: Local,
    },
    Import {
        spec: ImportSpec,
    },
}

impl Op {
    /// The destination local written by this instruction, if any.
    #[must_use]
    pub fn dst(&self) -> Option<Local> {
        match self {
            Self::Const { dst, .. }
            | Self::Copy { dst, .. }
            | Self::LoadGlobal { dst, .. }
            | Self::LoadField { dst, .. }
            | Self::LoadStatic { dst, .. }
            | Self::LoadIndex { dst, .. }
            | Self::Binary { dst, .. }
            | Self::Unary { dst, .. }
            | Self::Call { dst, .. }
            | Self::CallMethod { dst, .. }
            | Self::NewObject { dst, .. }
            | Self::ClosureMake { dst, .. }
            | Self::ListNew { dst }
            | Self::RangeNew { dst, .. }
            | Self::PairNew { dst, .. }
            | Self::Cast { dst, .. }
            | Self::TypeTest { dst, .. }
            | Self::ToStr { dst, .. }
            | Self::Concat { dst, .. }
            | Self::Destructure { dst, .. }
            | Self::IterNew { dst, .. }
            | Self::IterHasNext { dst, .. }
            | Self::IterNext { dst, .. }
            | Self::CatchBind { dst }
            | Self::LoadCapture { dst, .. }
            | Self::DeclareClass { dst, .. } => Some(*dst),
            _ => None,
        }
    }

    /// True when the instruction has no side effect beyond writing `dst`,
    /// making it a candidate for CSE and dead-code elimination.
    ///
    /// Loads from fields and indexes are pure *between* side-effecting
    /// instructions; the passes invalidate them conservatively across calls
    /// and stores. Comparisons on objects may dispatch to user
    /// `compareTo`/`contains`; for pass purposes arithmetic and comparisons
    /// count as pure, relying on in-block operand invalidation.
    #[must_use]
    pub fn is_pure(&self) -> bool {
        matches!(
            self,
            Self::Const { .. }
                | Self::Copy { .. }
                | Self::Binary { .. }
                | Self::Unary { .. }
                | Self::LoadField { .. }
                | Self::LoadIndex { .. }
                | Self::RangeNew { .. }
                | Self::PairNew { .. }
                | Self::TypeTest { .. }
                | Self::Concat { .. }
                | Self::ToStr { .. }
        )
    }

    /// True when the instruction may mutate heap state or transfer control,
    /// invalidating previously observed field/index loads.
    #[must_use]
    pub fn clobbers_heap(&self) -> bool {
        matches!(
            self,
            Self::Call { .. }
                | Self::CallMethod { .. }
                | Self::NewObject { .. }
                | Self::SuperInit { .. }
                | Self::StoreField { .. }
                | Self::StoreStatic { .. }
                | Self::StoreIndex { .. }
                | Self::StoreGlobal { .. }
                | Self::ListPush { .. }
                | Self::ListSpread { .. }
                | Self::IterNext { .. }
                | Self::IterHasNext { .. }
                | Self::CloseResource { .. }
                | Self::DeclareClass { .. }
                | Self::FireProcessors { .. }
                | Self::Import { .. }
                | Self::RegisterExt { .. }
        )
    }

    /// Rewrites every operand (source) local through `f`. `dst` is untouched.
    pub fn for_each_src(&mut self, mut f: impl FnMut(&mut Local)) {
        match self {
            Self::Const { .. }
            | Self::LoadGlobal { .. }
            | Self::LoadCapture { .. }
            | Self::ClosureMake { .. }
            | Self::ListNew { .. }
            | Self::TryPush { .. }
            | Self::TryPop
            | Self::CatchBind { .. }
            | Self::Import { .. } => {}
            Self::StoreCapture { src, .. } => f(src),
            Self::FireProcessors { class } => f(class),
            Self::Copy { src, .. }
            | Self::StoreGlobal { src, .. }
            | Self::Unary { operand: src, .. }
            | Self::Cast { src, .. }
            | Self::TypeTest { src, .. }
            | Self::ToStr { src, .. }
            | Self::Destructure { src, .. }
            | Self::IterNew { src, .. }
            | Self::Throw { src }
            | Self::CloseResource { src }
            | Self::RegisterExt { func: src, .. } => f(src),
            Self::LoadField { obj, .. } => f(obj),
            Self::StoreField { obj, src, .. } => {
                f(obj);
                f(src);
            }
            Self::LoadStatic { class, .. } => f(class),
            Self::StoreStatic { class, src, .. } => {
                f(class);
                f(src);
            }
            Self::LoadIndex { obj, index, .. } => {
                f(obj);
                f(index);
            }
            Self::StoreIndex { obj, index, src } => {
                f(obj);
                f(index);
                f(src);
            }
            Self::Binary { lhs, rhs, .. } | Self::Concat { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Self::Call { func, args, .. } => {
                f(func);
                args.iter_mut().for_each(&mut f);
            }
            Self::CallMethod { recv, args, .. } => {
                f(recv);
                args.iter_mut().for_each(&mut f);
            }
            Self::NewObject { class, args, .. } => {
                f(class);
                args.iter_mut().for_each(&mut f);
            }
            Self::SuperInit { args, .. } => args.iter_mut().for_each(&mut f),
            Self::ListPush { list, item } => {
                f(list);
                f(item);
            }
            Self::ListSpread { list, items } => {
                f(list);
                f(items);
            }
            Self::RangeNew { start, end, step, .. } => {
                f(start);
                f(end);
                if let Some(step) = step {
                    f(step);
                }
            }
            Self::PairNew { first, second, .. } => {
                f(first);
                f(second);
            }
            Self::IterHasNext { iter, .. } | Self::IterNext { iter, .. } => f(iter),
            Self::DeclareClass {
                superclass, ann_args, ..
            } => {
                if let Some(superclass) = superclass {
                    f(superclass);
                }
                ann_args.iter_mut().flatten().for_each(&mut f);
            }
        }
    }
}

/// An instruction with its source position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inst {
    pub op: Op,
    pub line: u32,
    pub column: u32,
}

/// Block terminators; every block ends with exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminator {
    Return {
        src: Option<Local>,
    },
    Jump {
        target: BlockId,
    },
    CondJump {
        cond: Local,
        then_block: BlockId,
        else_block: BlockId,
    },
    Switch {
        disc: Local,
        cases: Vec<(Const, BlockId)>,
        default: BlockId,
    },
    /// End of a `finally` body: resumes the pending action (fall through to
    /// `next`, keep returning, keep unwinding, or keep exit-jumping).
    EndFinally {
        next: BlockId,
    },
    /// `break`/`continue` crossing protected regions: pops handlers down to
    /// `depth`, running finallys, then jumps to `target`.
    ExitJump {
        target: BlockId,
        depth: u32,
    },
    /// Control never reaches here (follows `Throw`).
    Unreachable,
}

/// A basic block: straight-line instructions plus one terminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirBlock {
    pub insts: Vec<Inst>,
    pub terminator: Terminator,
    pub term_line: u32,
    pub term_column: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirParam {
    pub name: String,
    pub has_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirLocal {
    pub name: String,
    /// Captured by some inner lambda: the slot holds a shared cell.
    pub is_cell: bool,
}

/// Where a capture slot is loaded from in the enclosing frame at
/// closure-make time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureFrom {
    /// A cell local of the enclosing function.
    Local(Local),
    /// A capture slot of the enclosing function (chained capture).
    Capture(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirFunction {
    pub name: String,
    pub params: Vec<MirParam>,
    pub locals: Vec<MirLocal>,
    pub captures: Vec<CaptureFrom>,
    pub blocks: Vec<MirBlock>,
    /// Lambdas and `= expr` bodies return their trailing expression.
    pub expr_body: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    Val,
    Var,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirCtorParam {
    pub name: String,
    pub binding: FieldKind,
    pub is_private: bool,
    pub has_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirAnnotation {
    pub name: String,
    pub arg_names: Vec<Option<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassKind {
    Class,
    Interface,
    Object,
    Annotation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirClass {
    pub name: String,
    pub kind: ClassKind,
    pub is_open: bool,
    pub ctor_params: Vec<MirCtorParam>,
    /// Constructor-init function: params `[this, ctor params...]`; completes
    /// defaults, runs `SuperInit`, assigns fields, executes body statements.
    /// Static-field initializers are lowered into the declaring function
    /// right after `DeclareClass`.
    pub init: Option<FuncId>,
    pub methods: Vec<(String, FuncId)>,
    pub static_methods: Vec<(String, FuncId)>,
    /// Non-private field names declared by ctor params and class body.
    pub field_names: Vec<String>,
    /// Private field names (ctor params and body fields marked `private`).
    pub private_fields: Vec<String>,
    pub interfaces: Vec<String>,
    pub annotations: Vec<MirAnnotation>,
}

/// A compiled module: all functions and classes plus the script entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirModule {
    /// Origin name, used in error positions.
    pub file: String,
    pub functions: Vec<MirFunction>,
    pub classes: Vec<MirClass>,
    pub entry: FuncId,
}

impl MirModule {
    /// Serializes the module with postcard for later [`from_bytes`](Self::from_bytes).
    pub fn to_bytes(&self) -> RunResult<Vec<u8>> {
        postcard::to_allocvec(self).map_err(|e| Error::type_error(format!("MIR serialization failed: {e}")))
    }

    /// Deserializes a module previously produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> RunResult<Self> {
        postcard::from_bytes(bytes).map_err(|e| Error::type_error(format!("MIR deserialization failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postcard_round_trip() {
        let module = MirModule {
            file: "t.nova".into(),
            functions: vec![MirFunction {
                name: "<main>".into(),
                params: vec![],
                locals: vec![MirLocal {
                    name: "$t0".into(),
                    is_cell: false,
                }],
                captures: vec![],
                blocks: vec![MirBlock {
                    insts: vec![Inst {
                        op: Op::Const {
                            dst: 0,
                            value: Const::Int(42),
                        },
                        line: 1,
                        column: 1,
                    }],
                    terminator: Terminator::Return { src: Some(0) },
                    term_line: 1,
                    term_column: 1,
                }],
                expr_body: true,
            }],
            classes: vec![],
            entry: 0,
        };
        let bytes = module.to_bytes().unwrap();
        let back = MirModule::from_bytes(&bytes).unwrap();
        assert_eq!(module, back);
    }
}
