//! Output plumbing for `print`/`println` and REPL echo.
//!
//! Implement [`PrintWriter`] to capture or redirect output from evaluated Nova
//! code. The default implementation [`StdPrint`] writes to stdout.

use std::{
    fmt,
    io::{self, Write as _},
};

/// Trait for handling output from the `print()` and `println()` builtins.
pub trait PrintWriter: fmt::Debug + Send {
    /// Writes one already-formatted chunk of output, without appending a newline.
    fn write(&mut self, output: &str);

    /// Terminates the current line. `println` calls this after [`write`](Self::write).
    fn newline(&mut self) {
        self.write("\n");
    }
}

/// Default `PrintWriter` that writes directly to the process stdout.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn write(&mut self, output: &str) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(output.as_bytes());
        let _ = stdout.flush();
    }
}

/// `PrintWriter` that collects all output into an owned string.
///
/// Useful in tests:
/// ```
/// use std::sync::{Arc, Mutex};
///
/// use nova::{CollectStringPrint, Interpreter};
///
/// let out = Arc::new(Mutex::new(CollectStringPrint::default()));
/// let mut interp = Interpreter::new();
/// interp.set_stdout(out.clone());
/// interp.eval("println(\"hi\")", "test.nova").unwrap();
/// assert_eq!(out.lock().unwrap().output(), "hi\n");
/// ```
#[derive(Debug, Default)]
pub struct CollectStringPrint {
    collected: String,
}

impl CollectStringPrint {
    /// Returns everything written so far.
    #[must_use]
    pub fn output(&self) -> &str {
        &self.collected
    }

    /// Returns the collected output, consuming the writer.
    #[must_use]
    pub fn into_output(self) -> String {
        self.collected
    }
}

impl PrintWriter for CollectStringPrint {
    fn write(&mut self, output: &str) {
        self.collected.push_str(output);
    }
}

/// `PrintWriter` that discards all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn write(&mut self, _output: &str) {}
}
