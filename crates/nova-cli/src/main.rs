use std::{env, fs, process::ExitCode, time::Instant};

use nova::{Interpreter, SecurityPolicy, Value};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let Some(file_path) = args.get(1) else {
        eprintln!("usage: nova <script.nova> [args...]");
        return ExitCode::FAILURE;
    };
    let source = match fs::read_to_string(file_path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: cannot read {file_path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut interp = Interpreter::new();
    interp.set_security_policy(SecurityPolicy::unrestricted());
    if let Some(parent) = std::path::Path::new(file_path).parent() {
        interp.set_script_base_path(parent);
    }
    interp.set_cli_args(args[2..].to_vec());

    let start = Instant::now();
    match interp.eval(&source, file_path) {
        Ok(Value::Null) => ExitCode::SUCCESS,
        Ok(value) => {
            println!("{value}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            let elapsed = start.elapsed();
            eprintln!("error after {elapsed:?}:\n{err}");
            ExitCode::FAILURE
        }
    }
}
