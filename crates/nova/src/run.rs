//! Embedding surface: the [`Interpreter`].
//!
//! `eval` runs source one-shot against a fresh environment (stdlib only);
//! `eval_repl` is incremental and preserves top-level bindings across calls.
//! A user error never invalidates a REPL session: the error is returned and
//! the binding table stays intact.
//!
//! # Example
//! ```
//! use nova::{Interpreter, Value};
//!
//! let mut interp = Interpreter::new();
//! let result = interp.eval("val x = 40\nx + 2", "demo.nova").unwrap();
//! assert_eq!(result, Value::Int(42));
//! ```

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, atomic::AtomicBool},
};

use crate::{
    annotations::{NativeProcessor, Processor, ProcessorHandle},
    error::RunResult,
    host::HostInterop,
    io::PrintWriter,
    loader::ModuleBindings,
    mir::MirModule,
    security::SecurityPolicy,
    value::Value,
    vm::{EngineShared, Vm, compile},
};

/// One Nova runtime instance: module cache, annotation registry, root task
/// scope and security policy live for the interpreter's lifetime.
pub struct Interpreter {
    shared: Arc<EngineShared>,
    repl_bindings: Arc<ModuleBindings>,
    repl_mode: bool,
}

impl Interpreter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: EngineShared::new(),
            repl_bindings: Arc::new(ModuleBindings::new("<repl>")),
            repl_mode: false,
        }
    }

    /// Evaluates source in script mode: a fresh environment except for the
    /// standard library. In REPL mode this delegates to [`eval_repl`](Self::eval_repl).
    pub fn eval(&mut self, source: &str, origin: &str) -> RunResult<Value> {
        if self.repl_mode {
            return self.eval_repl(source);
        }
        let code = compile(source, origin)?;
        let globals = Arc::new(ModuleBindings::new(origin));
        self.run(&code, &globals)
    }

    /// Evaluates source incrementally, preserving top-level bindings across
    /// calls. Errors are reported without aborting the session.
    pub fn eval_repl(&mut self, source: &str) -> RunResult<Value> {
        let code = compile(source, "<repl>")?;
        let globals = Arc::clone(&self.repl_bindings);
        self.run(&code, &globals)
    }

    fn run(&mut self, code: &Arc<MirModule>, globals: &Arc<ModuleBindings>) -> RunResult<Value> {
        let mut vm = Vm::new(
            Arc::clone(&self.shared),
            Arc::clone(self.shared.root_scope()),
            Arc::new(AtomicBool::new(false)),
        );
        vm.exec_module(code, globals)
    }

    /// Compiles source down to optimized MIR without executing it.
    pub fn precompile_to_mir(&self, source: &str, origin: &str) -> RunResult<MirModule> {
        compile(source, origin).map(|code| (*code).clone())
    }

    /// Executes a precompiled module in a fresh environment.
    pub fn execute_mir(&mut self, module: &MirModule) -> RunResult<Value> {
        let code = Arc::new(module.clone());
        let globals = Arc::new(ModuleBindings::new(module.file.clone()));
        self.run(&code, &globals)
    }

    /// Redirects `print`/`println` output.
    pub fn set_stdout(&mut self, writer: Arc<Mutex<dyn PrintWriter>>) {
        *self.shared.stdout.lock().expect("stdout slot lock") = writer;
    }

    /// In REPL mode, `eval` preserves bindings like `eval_repl`.
    pub fn set_repl_mode(&mut self, repl_mode: bool) {
        self.repl_mode = repl_mode;
    }

    /// Base directory for module resolution (`import a.b.c`).
    pub fn set_script_base_path(&mut self, path: impl Into<PathBuf>) {
        *self.shared.base_path.lock().expect("base path lock") = Some(path.into());
    }

    /// Arguments surfaced by `System.args()`.
    pub fn set_cli_args(&mut self, args: Vec<String>) {
        *self.shared.cli_args.lock().expect("cli args lock") = args;
    }

    /// Installs the security policy checked at boundary operations.
    pub fn set_security_policy(&mut self, policy: SecurityPolicy) {
        *self.shared.policy.lock().expect("policy lock") = policy;
    }

    /// Installs the host-interop implementation behind `import java`.
    pub fn set_host_interop(&mut self, host: Arc<dyn HostInterop>) {
        *self.shared.host.lock().expect("host lock") = host;
    }

    /// Registers a native annotation processor; returns its handle.
    pub fn register_annotation_processor(&mut self, processor: Arc<dyn NativeProcessor>) -> Arc<ProcessorHandle> {
        let name = processor.annotation_name().to_owned();
        self.shared.registry().register(&name, Processor::Native(processor))
    }

    /// Instantiates a class value with positional and named arguments.
    pub fn instantiate(&mut self, class: &Value, positional: Vec<Value>, named: Vec<(String, Value)>) -> RunResult<Value> {
        let Value::Class(class) = class else {
            return Err(crate::error::Error::type_error(format!(
                "instantiate() expects a class, got {}",
                class.type_name()
            )));
        };
        let mut args = positional;
        let mut names: Vec<Option<String>> = vec![None; args.len()];
        for (name, value) in named {
            names.push(Some(name));
            args.push(value);
        }
        let mut vm = Vm::new(
            Arc::clone(&self.shared),
            Arc::clone(self.shared.root_scope()),
            Arc::new(AtomicBool::new(false)),
        );
        vm.instantiate_class(class, args, &names)
    }

    /// Ordered HIR and MIR pass names, for pipeline telemetry.
    #[must_use]
    pub fn pipeline_names(&self) -> Vec<&'static str> {
        let mut names = crate::hir::pass_names();
        names.extend(crate::mir::passes::pass_names());
        names
    }

    /// Names bound in the persistent REPL environment.
    #[must_use]
    pub fn repl_names(&self) -> Vec<String> {
        self.repl_bindings.names()
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        // Break closure/class reference cycles rooted in binding tables so
        // the Arc graph can drop.
        self.repl_bindings.clear();
        self.shared.modules.clear();
    }
}
