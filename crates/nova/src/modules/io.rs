//! File handle methods, gated by `allowFileIO`.

use std::sync::Arc;

use crate::{
    error::{Error, RunResult},
    types::{need_args, str_arg},
    value::{FileValue, Value},
    vm::Vm,
};

pub fn call(vm: &mut Vm, file: &Arc<FileValue>, name: &str, args: &[Value]) -> RunResult<Option<Value>> {
    let result = match name {
        "readText" => {
            need_args(name, args, 0)?;
            vm.policy().check_file_io()?;
            let text = std::fs::read_to_string(&file.path)
                .map_err(|e| Error::type_error(format!("cannot read {}: {e}", file.path.display())))?;
            Value::from_string(text)
        }
        "writeText" => {
            need_args(name, args, 1)?;
            vm.policy().check_file_io()?;
            let text = str_arg(name, args, 0)?;
            std::fs::write(&file.path, text)
                .map_err(|e| Error::type_error(format!("cannot write {}: {e}", file.path.display())))?;
            Value::Null
        }
        "appendText" => {
            need_args(name, args, 1)?;
            vm.policy().check_file_io()?;
            let text = str_arg(name, args, 0)?;
            use std::io::Write as _;
            let mut handle = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&file.path)
                .map_err(|e| Error::type_error(format!("cannot open {}: {e}", file.path.display())))?;
            handle
                .write_all(text.as_bytes())
                .map_err(|e| Error::type_error(format!("cannot append {}: {e}", file.path.display())))?;
            Value::Null
        }
        "exists" => {
            need_args(name, args, 0)?;
            vm.policy().check_file_io()?;
            Value::Bool(file.path.exists())
        }
        "delete" => {
            need_args(name, args, 0)?;
            vm.policy().check_file_io()?;
            Value::Bool(std::fs::remove_file(&file.path).is_ok())
        }
        "lines" => {
            need_args(name, args, 0)?;
            vm.policy().check_file_io()?;
            let text = std::fs::read_to_string(&file.path)
                .map_err(|e| Error::type_error(format!("cannot read {}: {e}", file.path.display())))?;
            Value::list(text.lines().map(Value::str).collect())
        }
        _ => return Ok(None),
    };
    Ok(Some(result))
}
