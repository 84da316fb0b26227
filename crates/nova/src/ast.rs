//! Syntax tree produced by the parser.
//!
//! The same tree is reused by HIR lowering: desugar passes rewrite surface
//! constructs (`when`, interpolation, pipelines, ...) into core nodes, and the
//! resolve pass replaces [`Expr::Name`] with slot-addressed variants
//! ([`Expr::Local`], [`Expr::Capture`], [`Expr::Global`]). Variants marked
//! *lowering-only* are never produced by the parser.

/// A 1-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    #[must_use]
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// Binary operators surviving to HIR. `&&`/`||` short-circuit and are lowered
/// to control flow in MIR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
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
    And,
    Or,
    In,
    NotIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

/// A declared type annotation. Nova is dynamically typed; annotations are
/// kept for diagnostics and for `is`/`as` name matching only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    pub name: String,
    pub nullable: bool,
}

/// A function or lambda parameter.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: Option<TypeRef>,
    pub default: Option<Expr>,
}

/// A brace-delimited statement sequence. When used as an expression, the
/// value is the trailing expression statement (or null).
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

/// Left-hand side of an assignment.
#[derive(Debug, Clone)]
pub enum AssignTarget {
    Name {
        name: String,
        span: Span,
        /// Filled by the resolve pass: `Some` for a local slot, `None` for a
        /// module global.
        slot: Option<ResolvedSlot>,
    },
    Field { recv: Box<Expr>, name: String, span: Span },
    Index { recv: Box<Expr>, index: Box<Expr>, span: Span },
}

/// A resolved binding site: local slot or capture slot of the current function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedSlot {
    Local(u32),
    Capture(u32),
}

/// Binding pattern for `val`/`var` and `for`.
#[derive(Debug, Clone)]
pub enum BindPattern {
    Name(String),
    /// Destructuring: `val (a, b, c) = e`.
    Tuple(Vec<String>),
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    Val {
        pattern: BindPattern,
        mutable: bool,
        ty: Option<TypeRef>,
        init: Expr,
        span: Span,
        /// Filled by the resolve pass, aligned with the pattern names:
        /// `Some(slot)` for a local, `None` for a module global.
        slots: Vec<Option<u32>>,
    },
    Assign {
        target: AssignTarget,
        /// `Some(op)` for compound assignment (`+=` etc.).
        op: Option<BinOp>,
        value: Expr,
        span: Span,
    },
    /// `target ??= value` (assign only when target is null).
    CoalesceAssign {
        target: AssignTarget,
        value: Expr,
        span: Span,
    },
    Fun(FunDecl),
    Class(ClassDecl),
    Import(ImportDecl),
    While {
        cond: Expr,
        body: Block,
        span: Span,
    },
    DoWhile {
        body: Block,
        cond: Expr,
        span: Span,
    },
    For {
        pattern: BindPattern,
        iter: Expr,
        body: Block,
        span: Span,
        /// Loop-variable local slots, filled by the resolve pass.
        slots: Vec<u32>,
    },
    Return {
        value: Option<Expr>,
        span: Span,
    },
    Throw {
        value: Expr,
        span: Span,
    },
    Break(Span),
    Continue(Span),
    Try {
        body: Block,
        catches: Vec<CatchClause>,
        finally: Option<Block>,
        span: Span,
    },
    /// `use (val r = e) { body }`; lowered to try/finally + `close()`.
    Use {
        name: String,
        init: Expr,
        body: Block,
        span: Span,
    },
    /// Lowering-only: close the resource, attaching failures per resource
    /// semantics (surface on normal exit, suppressed note while unwinding).
    CloseResource { resource: Expr, span: Span },
}

#[derive(Debug, Clone)]
pub struct CatchClause {
    pub name: String,
    /// Error kind filter from `catch (e: TypeError)`; `None` catches all.
    pub kind: Option<String>,
    pub body: Block,
    pub span: Span,
    /// Local slot for the bound error, filled by the resolve pass.
    pub slot: u32,
}

/// Name-resolution result for a function body, filled by the resolve pass.
#[derive(Debug, Clone, Default)]
pub struct FnResolution {
    /// Total local slot count (params first).
    pub locals: u32,
    /// Names of the local slots, index-aligned; used for diagnostics.
    pub local_names: Vec<String>,
    /// Locals captured by some inner lambda; these become shared cells.
    pub captured: Vec<u32>,
    /// For lambdas: where each capture slot loads from in the enclosing frame.
    pub captures_from: Vec<CaptureSource>,
}

/// Where a lambda capture is loaded from at closure-make time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    /// A (cell) local of the directly enclosing function.
    Local(u32),
    /// A capture slot of the directly enclosing function.
    Capture(u32),
}

#[derive(Debug, Clone)]
pub struct FunDecl {
    pub name: String,
    /// Extension receiver: `fun Int.double()` has `Some("Int")`.
    pub receiver: Option<String>,
    pub params: Vec<Param>,
    pub ret: Option<TypeRef>,
    pub body: Block,
    /// True for `fun f() = expr` and for lambdas: the trailing expression is
    /// the return value. Block-bodied functions return null unless `return`.
    pub expr_body: bool,
    pub is_private: bool,
    pub resolution: FnResolution,
    /// For nested (local) functions: the local slot the closure binds to.
    /// `None` for top-level functions (bound as module globals) and methods.
    pub slot: Option<u32>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Class,
    Interface,
    Object,
    Annotation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldBinding {
    Val,
    Var,
    None,
}

#[derive(Debug, Clone)]
pub struct CtorParam {
    pub name: String,
    pub binding: FieldBinding,
    pub is_private: bool,
    pub ty: Option<TypeRef>,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct AnnotationUse {
    pub name: String,
    pub args: Vec<CallArg>,
    pub span: Span,
}

/// Superclass clause: `class D(x) : B(x)`.
#[derive(Debug, Clone)]
pub struct SuperSpec {
    pub name: String,
    pub args: Vec<CallArg>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ClassMember {
    Method(FunDecl),
    StaticField {
        name: String,
        init: Expr,
        span: Span,
    },
    StaticMethod(FunDecl),
    Field {
        name: String,
        mutable: bool,
        is_private: bool,
        init: Expr,
        span: Span,
    },
    /// Initializer statement executed per instantiation.
    Init(Stmt),
}

#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub name: String,
    pub kind: ClassKind,
    pub is_open: bool,
    pub annotations: Vec<AnnotationUse>,
    pub ctor_params: Vec<CtorParam>,
    pub superclass: Option<SuperSpec>,
    pub interfaces: Vec<String>,
    pub members: Vec<ClassMember>,
    /// Resolution for the synthesized constructor-init function
    /// (`this` + ctor params as locals, then body init statements).
    /// Static-field initializers resolve in the enclosing scope instead:
    /// they run at declaration time, where the class value is in scope.
    pub init_resolution: FnResolution,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportSymbol {
    Named { name: String, alias: Option<String> },
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportKind {
    /// `import a.b.Symbol [as Alias]` / `import a.b.*`
    Module { path: Vec<String>, symbol: ImportSymbol },
    /// `import java fq.Class [as Alias]` / `import java fq.*`
    Java {
        path: Vec<String>,
        wildcard: bool,
        alias: Option<String>,
    },
    /// `import static fq.Member [as Alias]`
    JavaStatic { path: Vec<String>, alias: Option<String> },
}

#[derive(Debug, Clone)]
pub struct ImportDecl {
    pub kind: ImportKind,
    pub span: Span,
}

/// One piece of an interpolated string expression.
#[derive(Debug, Clone)]
pub enum InterpPart {
    Text(String),
    Expr(Expr),
}

/// A call argument, optionally named (`f(x = 1)`) or spread (`[*xs, 1]`).
#[derive(Debug, Clone)]
pub struct CallArg {
    pub name: Option<String>,
    pub value: Expr,
    pub spread: bool,
}

#[derive(Debug, Clone)]
pub struct WhenArm {
    pub conds: Vec<WhenCond>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum WhenCond {
    /// Subject form: matches `subject == expr`; subjectless form: boolean guard.
    Expr(Expr),
    In { expr: Expr, negated: bool },
    Is { ty: String, negated: bool },
}

#[derive(Debug, Clone)]
pub enum Expr {
    Null(Span),
    Bool(bool, Span),
    Int(i64, Span),
    Long(i64, Span),
    Double(f64, Span),
    CharLit(char, Span),
    Str(String, Span),
    /// Interpolated string; desugared to `Concat`/`ToStr` chains.
    Interp { parts: Vec<InterpPart>, span: Span },
    Name(String, Span),
    /// `_` partial-application placeholder, valid only in call arguments.
    Placeholder(Span),
    /// `::name` callable reference.
    CallableRef(String, Span),
    Lambda(Box<FunDecl>),
    Call {
        callee: Box<Expr>,
        args: Vec<CallArg>,
        span: Span,
    },
    Member {
        recv: Box<Expr>,
        name: String,
        safe: bool,
        span: Span,
    },
    Index {
        recv: Box<Expr>,
        index: Box<Expr>,
        safe: bool,
        span: Span,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
    /// Chained comparison `a < b <= c`; desugared with single evaluation of
    /// the middle operands.
    CmpChain {
        operands: Vec<Expr>,
        ops: Vec<BinOp>,
        span: Span,
    },
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
        inclusive: bool,
        /// `downTo` counts down with step -1.
        down: bool,
        step: Option<Box<Expr>>,
        span: Span,
    },
    /// `a to b` infix pair constructor.
    PairOf {
        first: Box<Expr>,
        second: Box<Expr>,
        span: Span,
    },
    Elvis {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
    If {
        cond: Box<Expr>,
        then: Block,
        else_: Option<Block>,
        span: Span,
    },
    /// `if (val x = e) { ... } else { ... }`
    IfLet {
        name: String,
        value: Box<Expr>,
        then: Block,
        else_: Option<Block>,
        span: Span,
    },
    When {
        subject: Option<Box<Expr>>,
        arms: Vec<WhenArm>,
        else_arm: Option<Block>,
        span: Span,
    },
    /// Error-propagation postfix `e?`.
    TryPostfix { operand: Box<Expr>, span: Span },
    /// `try { } catch (e) { } finally { }` in expression position; the value
    /// is the body's (or the taken catch's) trailing expression.
    TryCatch {
        body: Block,
        catches: Vec<CatchClause>,
        finally: Option<Block>,
        span: Span,
    },
    Is {
        operand: Box<Expr>,
        ty: String,
        negated: bool,
        span: Span,
    },
    Cast {
        operand: Box<Expr>,
        ty: String,
        safe: bool,
        span: Span,
    },
    ListLit { items: Vec<CallArg>, span: Span },
    Pipeline {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
    /// Expression block `run { ... }`-style bodies and lowering temporaries.
    BlockExpr { block: Block, span: Span },

    // --- lowering-only variants (produced by HIR passes) ---
    /// Resolved local slot of the current function.
    Local(u32, Span),
    /// Resolved capture slot of the current lambda.
    Capture(u32, Span),
    /// Resolved module-global (or builtin fallback) by name.
    Global(String, Span),
    /// Canonical `toString` coercion inserted by interpolation desugar.
    ToStr { operand: Box<Expr>, span: Span },
    /// String concatenation inserted by interpolation desugar.
    Concat {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
}

impl Expr {
    /// The position of this expression, for error reporting.
    #[must_use]
    pub fn span(&self) -> Span {
        match self {
            Self::Null(s)
            | Self::Bool(_, s)
            | Self::Int(_, s)
            | Self::Long(_, s)
            | Self::Double(_, s)
            | Self::CharLit(_, s)
            | Self::Str(_, s)
            | Self::Name(_, s)
            | Self::Placeholder(s)
            | Self::CallableRef(_, s)
            | Self::Local(_, s)
            | Self::Capture(_, s)
            | Self::Global(_, s) => *s,
            Self::Lambda(decl) => decl.span,
            Self::Interp { span, .. }
            | Self::Call { span, .. }
            | Self::Member { span, .. }
            | Self::Index { span, .. }
            | Self::Unary { span, .. }
            | Self::Binary { span, .. }
            | Self::CmpChain { span, .. }
            | Self::Range { span, .. }
            | Self::PairOf { span, .. }
            | Self::Elvis { span, .. }
            | Self::If { span, .. }
            | Self::IfLet { span, .. }
            | Self::When { span, .. }
            | Self::TryPostfix { span, .. }
            | Self::TryCatch { span, .. }
            | Self::Is { span, .. }
            | Self::Cast { span, .. }
            | Self::ListLit { span, .. }
            | Self::Pipeline { span, .. }
            | Self::BlockExpr { span, .. }
            | Self::ToStr { span, .. }
            | Self::Concat { span, .. } => *span,
        }
    }
}

/// A parsed source file (or REPL chunk) before lowering.
#[derive(Debug, Clone, Default)]
pub struct SourceModule {
    pub stmts: Vec<Stmt>,
}
