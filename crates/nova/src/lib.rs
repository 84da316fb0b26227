//! Nova: an embeddable, Kotlin-flavored scripting language runtime.
//!
//! Source is compiled through a fixed pipeline (lexer, recursive-descent
//! parser, HIR desugaring and name resolution, MIR lowering, an ordered MIR
//! optimization pipeline with constant folding, copy propagation, CSE and
//! DCE) and executed by a value-tagged MIR interpreter with classes, annotations
//! with a processor registry, structured concurrency, lazy cached modules
//! with Python-style cyclic imports, and a capability-based security policy.
//!
//! The embedding surface is [`Interpreter`]:
//!
//! ```
//! use nova::{Interpreter, Value};
//!
//! let mut interp = Interpreter::new();
//! assert_eq!(interp.eval("1 + 2", "demo.nova").unwrap(), Value::Int(3));
//! ```

#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked at call sites")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are intentional")]
#![expect(clippy::cast_possible_wrap, reason = "wrap behavior mirrors the JVM")]
#![expect(clippy::missing_panics_doc, reason = "lock poisoning is the only panic source")]
#![expect(clippy::must_use_candidate, reason = "builder-style accessors are self-evident")]

pub mod annotations;
mod ast;
pub mod builtins;
pub mod concurrency;
mod error;
pub mod host;
mod hir;
mod io;
mod lexer;
pub mod loader;
pub mod mir;
mod modules;
mod parse;
pub mod security;
pub mod types;
pub mod value;
mod run;
mod vm;

pub use crate::{
    annotations::{ClassTarget, NativeProcessor, Processor, ProcessorHandle, Registry},
    error::{CodeLoc, Error, ErrorKind, RunResult},
    host::{HostInterop, NoHostInterop},
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    mir::MirModule,
    run::Interpreter,
    security::{LimitTracker, SecurityPolicy},
    value::Value,
};
