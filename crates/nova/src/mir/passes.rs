//! The ordered MIR optimization pipeline.
//!
//! Fixed order: `const-fold`, `copy-prop`, `cse`, `dce`. Each pass works
//! within basic blocks and is behaviorally idempotent. Pass names are exposed
//! for pipeline telemetry.

use ahash::AHashMap;

use super::{BinOp, Const, Local, MirFunction, MirModule, Op, Terminator, UnOp};

/// One MIR pass.
struct MirPass {
    name: &'static str,
    run: fn(&mut MirFunction),
}

const PASSES: &[MirPass] = &[
    MirPass {
        name: "const-fold",
        run: const_fold,
    },
    MirPass {
        name: "copy-prop",
        run: copy_prop,
    },
    MirPass { name: "cse", run: cse },
    MirPass { name: "dce", run: dce },
];

/// Ordered MIR pass names, for pipeline telemetry.
#[must_use]
pub fn pass_names() -> Vec<&'static str> {
    PASSES.iter().map(|p| p.name).collect()
}

/// Runs the full pipeline over every function of the module.
pub fn optimize(module: &mut MirModule) {
    for function in &mut module.functions {
        for pass in PASSES {
            (pass.run)(function);
        }
    }
}

/// True when the slot may be observed through a closure cell; such slots are
/// never rewritten or eliminated.
fn is_cell(function: &MirFunction, local: Local) -> bool {
    function.locals.get(local as usize).is_some_and(|l| l.is_cell)
}

// --- const-fold ---

/// Folds `Binary`/`Unary` over locals holding known constants, in-block.
/// Int arithmetic folds with wrapping semantics; division folds only for
/// non-zero divisors so the runtime `ArithmeticError` is preserved.
fn const_fold(function: &mut MirFunction) {
    let cells: Vec<bool> = function.locals.iter().map(|l| l.is_cell).collect();
    for block in &mut function.blocks {
        let mut known: AHashMap<Local, Const> = AHashMap::new();
        for inst in &mut block.insts {
            let folded = match &inst.op {
                Op::Binary { dst, op, lhs, rhs } => {
                    match (known.get(lhs), known.get(rhs)) {
                        (Some(a), Some(b)) => fold_binary(*op, a, b).map(|value| (*dst, value)),
                        _ => None,
                    }
                }
                Op::Unary { dst, op, operand } => known
                    .get(operand)
                    .and_then(|value| fold_unary(*op, value))
                    .map(|value| (*dst, value)),
                _ => None,
            };
            if let Some((dst, value)) = folded {
                inst.op = Op::Const { dst, value };
            }
            match &inst.op {
                Op::Const { dst, value } if !cells[*dst as usize] => {
                    known.insert(*dst, value.clone());
                }
                other => {
                    if let Some(dst) = other.dst() {
                        known.remove(&dst);
                    }
                }
            }
        }
    }
}

fn fold_binary(op: BinOp, lhs: &Const, rhs: &Const) -> Option<Const> {
    match (lhs, rhs) {
        (Const::Int(a), Const::Int(b)) => Some(match op {
            BinOp::Add => Const::Int(a.wrapping_add(*b)),
            BinOp::Sub => Const::Int(a.wrapping_sub(*b)),
            BinOp::Mul => Const::Int(a.wrapping_mul(*b)),
            BinOp::Div if *b != 0 => Const::Int(a.wrapping_div(*b)),
            BinOp::Rem if *b != 0 => Const::Int(a.wrapping_rem(*b)),
            BinOp::Eq => Const::Bool(a == b),
            BinOp::Ne => Const::Bool(a != b),
            BinOp::Lt => Const::Bool(a < b),
            BinOp::Le => Const::Bool(a <= b),
            BinOp::Gt => Const::Bool(a > b),
            BinOp::Ge => Const::Bool(a >= b),
            _ => return None,
        }),
        (Const::Bool(a), Const::Bool(b)) => Some(match op {
            BinOp::Eq => Const::Bool(a == b),
            BinOp::Ne => Const::Bool(a != b),
            _ => return None,
        }),
        _ => None,
    }
}

fn fold_unary(op: UnOp, operand: &Const) -> Option<Const> {
    match (op, operand) {
        (UnOp::Neg, Const::Int(v)) => Some(Const::Int(v.wrapping_neg())),
        (UnOp::Neg, Const::Double(v)) => Some(Const::Double(-v)),
        (UnOp::Not, Const::Bool(v)) => Some(Const::Bool(!v)),
        _ => None,
    }
}

// --- copy-prop ---

/// Forwards `Copy` sources into later operand uses while both slots stay
/// unmodified, in-block.
fn copy_prop(function: &mut MirFunction) {
    let cells: Vec<bool> = function.locals.iter().map(|l| l.is_cell).collect();
    for block in &mut function.blocks {
        let mut copy_of: AHashMap<Local, Local> = AHashMap::new();
        for inst in &mut block.insts {
            inst.op.for_each_src(|src| {
                if let Some(&original) = copy_of.get(src) {
                    *src = original;
                }
            });
            let written = inst.op.dst();
            if let Some(dst) = written {
                copy_of.retain(|key, value| *key != dst && *value != dst);
            }
            if let Op::Copy { dst, src } = inst.op {
                if !cells[dst as usize] && !cells[src as usize] && dst != src {
                    copy_of.insert(dst, src);
                }
            }
        }
    }
}

// --- cse ---

/// Value-numbering key for a pure instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CseKey {
    Bin(BinOp, Local, Local),
    Un(UnOp, Local),
    LoadField(Local, String),
    LoadIndex(Local, Local),
    Concat(Local, Local),
    ToStr(Local),
    TypeTest(Local, String, bool),
    Range(Local, Local, Option<Local>, bool, bool),
    Pair(Local, Local),
}

fn cse_key(op: &Op) -> Option<CseKey> {
    Some(match op {
        Op::Binary { op, lhs, rhs, .. } => CseKey::Bin(*op, *lhs, *rhs),
        Op::Unary { op, operand, .. } => CseKey::Un(*op, *operand),
        Op::LoadField { obj, name, .. } => CseKey::LoadField(*obj, name.clone()),
        Op::LoadIndex { obj, index, .. } => CseKey::LoadIndex(*obj, *index),
        Op::Concat { lhs, rhs, .. } => CseKey::Concat(*lhs, *rhs),
        Op::ToStr { src, .. } => CseKey::ToStr(*src),
        Op::TypeTest { src, ty, negated, .. } => CseKey::TypeTest(*src, ty.clone(), *negated),
        Op::RangeNew {
            start,
            end,
            step,
            inclusive,
            down,
            ..
        } => CseKey::Range(*start, *end, *step, *inclusive, *down),
        Op::PairNew { first, second, .. } => CseKey::Pair(*first, *second),
        _ => return None,
    })
}

fn key_mentions(key: &CseKey, local: Local) -> bool {
    match key {
        CseKey::Bin(_, a, b)
        | CseKey::LoadIndex(a, b)
        | CseKey::Concat(a, b)
        | CseKey::Pair(a, b) => *a == local || *b == local,
        CseKey::Un(_, a) | CseKey::LoadField(a, _) | CseKey::ToStr(a) | CseKey::TypeTest(a, _, _) => *a == local,
        CseKey::Range(a, b, step, _, _) => *a == local || *b == local || *step == Some(local),
    }
}

/// Common-subexpression elimination within a block across pure instructions.
///
/// Conservative across side effects: any instruction that may mutate heap
/// state drops all observed field and index loads; a write to a local drops
/// every expression mentioning it.
fn cse(function: &mut MirFunction) {
    let cells: Vec<bool> = function.locals.iter().map(|l| l.is_cell).collect();
    for block in &mut function.blocks {
        let mut available: AHashMap<CseKey, Local> = AHashMap::new();
        for inst in &mut block.insts {
            let mut replaced = false;
            if inst.op.is_pure() {
                if let (Some(key), Some(dst)) = (cse_key(&inst.op), inst.op.dst()) {
                    if !cells[dst as usize] {
                        if let Some(&prev) = available.get(&key) {
                            inst.op = Op::Copy { dst, src: prev };
                            replaced = true;
                        } else {
                            available.insert(key, dst);
                        }
                    }
                }
            }
            if !replaced && inst.op.clobbers_heap() {
                available.retain(|key, _| !matches!(key, CseKey::LoadField(..) | CseKey::LoadIndex(..)));
            }
            if let Some(dst) = inst.op.dst() {
                available.retain(|key, value| *value != dst && !key_mentions(key, dst));
            }
        }
    }
}

// --- dce ---

/// Reads performed by a terminator.
fn terminator_reads(terminator: &Terminator, mut f: impl FnMut(Local)) {
    match terminator {
        Terminator::Return { src: Some(src) } => f(*src),
        Terminator::CondJump { cond, .. } => f(*cond),
        Terminator::Switch { disc, .. } => f(*disc),
        _ => {}
    }
}

/// Deletes pure instructions whose destination is never read anywhere in the
/// function. Cell slots are kept: a closure may observe them.
fn dce(function: &mut MirFunction) {
    let mut read = vec![false; function.locals.len()];
    for block in &function.blocks {
        for inst in &block.insts {
            let mut op = inst.op.clone();
            op.for_each_src(|src| {
                read[*src as usize] = true;
            });
        }
        terminator_reads(&block.terminator, |local| {
            read[local as usize] = true;
        });
    }
    let cells: Vec<bool> = function.locals.iter().map(|l| l.is_cell).collect();
    for block in &mut function.blocks {
        block.insts.retain(|inst| {
            if !inst.op.is_pure() && !matches!(inst.op, Op::Const { .. } | Op::Copy { .. }) {
                return true;
            }
            match inst.op.dst() {
                Some(dst) => read[dst as usize] || cells[dst as usize],
                None => true,
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hir, mir, parse::parse};

    fn optimized(source: &str) -> MirModule {
        let ast = parse(source, "t.nova").unwrap();
        let hir = hir::lower(ast, "t.nova").unwrap();
        let mut module = mir::lower::lower(hir).unwrap();
        optimize(&mut module);
        module
    }

    fn entry_ops(module: &MirModule) -> Vec<&Op> {
        module.functions[module.entry as usize]
            .blocks
            .iter()
            .flat_map(|b| &b.insts)
            .map(|i| &i.op)
            .collect()
    }

    #[test]
    fn pipeline_names_are_ordered() {
        assert_eq!(pass_names(), vec!["const-fold", "copy-prop", "cse", "dce"]);
    }

    #[test]
    fn const_fold_folds_arithmetic() {
        let module = optimized("1 + 2");
        let ops = entry_ops(&module);
        assert!(
            ops.iter().any(|op| matches!(op, Op::Const { value: Const::Int(3), .. })),
            "expected folded constant, got {ops:?}"
        );
        assert!(!ops.iter().any(|op| matches!(op, Op::Binary { .. })));
    }

    #[test]
    fn division_by_zero_is_not_folded() {
        let module = optimized("1 / 0");
        let ops = entry_ops(&module);
        assert!(ops.iter().any(|op| matches!(op, Op::Binary { op: BinOp::Div, .. })));
    }

    #[test]
    fn cse_deduplicates_repeated_loads() {
        // Two reads of o.x with no intervening side effect: one LoadField.
        let module = optimized("fun f(o) { return o.x + o.x }");
        let function = module.functions.iter().find(|f| f.name == "f").unwrap();
        let loads = function
            .blocks
            .iter()
            .flat_map(|b| &b.insts)
            .filter(|i| matches!(i.op, Op::LoadField { .. }))
            .count();
        assert_eq!(loads, 1, "CSE should collapse the second field load");
    }

    #[test]
    fn calls_invalidate_field_loads() {
        let module = optimized("fun f(o, g) { return o.x + g() + o.x }");
        let function = module.functions.iter().find(|f| f.name == "f").unwrap();
        let loads = function
            .blocks
            .iter()
            .flat_map(|b| &b.insts)
            .filter(|i| matches!(i.op, Op::LoadField { .. }))
            .count();
        assert_eq!(loads, 2, "a call between the loads must block CSE");
    }

    #[test]
    fn dce_removes_dead_constants() {
        let module = optimized("val x = 1\n2");
        // `x` is a module global; the store stays. But the folded temporary
        // feeding nothing else must not linger as an extra Const.
        let ops = entry_ops(&module);
        let consts = ops.iter().filter(|op| matches!(op, Op::Const { .. })).count();
        assert!(consts <= 2, "dead constants should be eliminated, got {ops:?}");
    }
}
