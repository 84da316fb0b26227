//! High-level IR lowering: desugaring passes plus name resolution.
//!
//! HIR reuses the parser's tree. Each pass is a named function over the whole
//! module; the ordered pipeline is exposed through [`pass_names`] so hosts and
//! tests can observe it. Desugar passes rewrite surface constructs into core
//! nodes; the final `resolve-names` pass replaces identifier expressions with
//! slot-addressed variants and computes per-function capture lists.

mod desugar;
mod resolve;

use crate::{
    ast::{FnResolution, SourceModule, Stmt},
    error::RunResult,
};

/// A module after all HIR passes: core nodes only, names resolved.
#[derive(Debug, Clone)]
pub struct HirModule {
    pub stmts: Vec<Stmt>,
    /// Resolution for the synthesized script entry function (temps, loop
    /// variables and catch bindings at top level live in entry locals;
    /// declared `val`/`var`/`fun`/`class` become module globals).
    pub entry_resolution: FnResolution,
    pub file: String,
}

/// One HIR pass: a named function over the module.
struct Pass {
    name: &'static str,
    run: fn(&mut HirModule) -> RunResult<()>,
}

const PASSES: &[Pass] = &[
    Pass {
        name: "desugar-when",
        run: desugar::desugar_when,
    },
    Pass {
        name: "desugar-interp",
        run: desugar::desugar_interp,
    },
    Pass {
        name: "desugar-null-safety",
        run: desugar::desugar_null_safety,
    },
    Pass {
        name: "desugar-compare",
        run: desugar::desugar_compare,
    },
    Pass {
        name: "desugar-pipeline",
        run: desugar::desugar_pipeline,
    },
    Pass {
        name: "desugar-partial",
        run: desugar::desugar_partial,
    },
    Pass {
        name: "desugar-extensions",
        run: desugar::desugar_extensions,
    },
    Pass {
        name: "desugar-operators",
        run: desugar::desugar_operators,
    },
    Pass {
        name: "desugar-if-let",
        run: desugar::desugar_if_let,
    },
    Pass {
        name: "desugar-try-postfix",
        run: desugar::desugar_try_postfix,
    },
    Pass {
        name: "desugar-use",
        run: desugar::desugar_use,
    },
    Pass {
        name: "resolve-names",
        run: resolve::resolve_names,
    },
];

/// Ordered HIR pass names, for pipeline telemetry.
#[must_use]
pub fn pass_names() -> Vec<&'static str> {
    PASSES.iter().map(|p| p.name).collect()
}

/// Runs every HIR pass over a freshly parsed module.
///
/// # Errors
/// Returns the first pass failure (malformed operator declarations, `_`
/// outside call arguments, `when` conditions without a subject, ...).
pub fn lower(module: SourceModule, file: &str) -> RunResult<HirModule> {
    let mut hir = HirModule {
        stmts: module.stmts,
        entry_resolution: FnResolution::default(),
        file: file.to_owned(),
    };
    for pass in PASSES {
        (pass.run)(&mut hir)?;
    }
    Ok(hir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    #[test]
    fn pipeline_exposes_pass_names_in_order() {
        let names = pass_names();
        assert_eq!(names.first(), Some(&"desugar-when"));
        assert_eq!(names.last(), Some(&"resolve-names"));
        let cse_like: Vec<_> = names.iter().filter(|n| n.starts_with("desugar-")).collect();
        assert_eq!(cse_like.len(), names.len() - 1);
    }

    #[test]
    fn lower_smoke() {
        let module = parse("val x = 10\nx + 1", "t.nova").unwrap();
        let hir = lower(module, "t.nova").unwrap();
        assert_eq!(hir.stmts.len(), 2);
    }

    #[test]
    fn when_without_subject_rejects_range_conditions() {
        let module = parse("when { in 1..2 -> 3\nelse -> 4 }", "t.nova").unwrap();
        let err = lower(module, "t.nova").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::SyntaxError);
    }
}
