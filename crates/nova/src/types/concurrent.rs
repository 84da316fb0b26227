//! Methods on concurrency values: scopes, task handles, channels, mutexes
//! and atomics.

use std::sync::atomic::Ordering;

use super::{int_arg, need_args};
use crate::{
    concurrency::TaskKind,
    error::{Error, RunResult},
    value::Value,
    vm::Vm,
};

pub fn call(vm: &mut Vm, recv: &Value, name: &str, args: &[Value]) -> RunResult<Option<Value>> {
    let result = match recv {
        Value::Scope(scope) => match name {
            "async" => {
                need_args(name, args, 1)?;
                let handle = vm.spawn_task(scope, TaskKind::Deferred, args[0].clone())?;
                Value::Deferred(handle)
            }
            "launch" => {
                need_args(name, args, 1)?;
                let handle = vm.spawn_task(scope, TaskKind::Job, args[0].clone())?;
                Value::Job(handle)
            }
            "cancel" => {
                need_args(name, args, 0)?;
                scope.cancel();
                Value::Null
            }
            "isActive" => {
                need_args(name, args, 0)?;
                Value::Bool(matches!(scope.state(), crate::concurrency::ScopeState::Active))
            }
            "isCancelled" => {
                need_args(name, args, 0)?;
                Value::Bool(scope.is_cancelled())
            }
            _ => return Ok(None),
        },
        Value::Deferred(handle) => match name {
            "get" | "await" => {
                need_args(name, args, 0)?;
                handle.wait_value(&vm.wait_cx())?
            }
            "cancel" => {
                need_args(name, args, 0)?;
                handle.cancel();
                Value::Null
            }
            "isDone" => {
                need_args(name, args, 0)?;
                Value::Bool(handle.is_done())
            }
            "isCancelled" => {
                need_args(name, args, 0)?;
                Value::Bool(handle.is_cancelled())
            }
            "isCompleted" => {
                need_args(name, args, 0)?;
                Value::Bool(handle.is_completed())
            }
            _ => return Ok(None),
        },
        Value::Job(handle) => match name {
            "join" => {
                need_args(name, args, 0)?;
                // Join rethrows a stored failure; the value itself is unit.
                handle.wait_value(&vm.wait_cx())?;
                Value::Null
            }
            "cancel" => {
                need_args(name, args, 0)?;
                handle.cancel();
                Value::Null
            }
            "isActive" => {
                need_args(name, args, 0)?;
                Value::Bool(handle.is_active())
            }
            "isCompleted" => {
                need_args(name, args, 0)?;
                Value::Bool(handle.is_completed())
            }
            "isCancelled" => {
                need_args(name, args, 0)?;
                Value::Bool(handle.is_cancelled())
            }
            _ => return Ok(None),
        },
        Value::Channel(channel) => match name {
            "send" => {
                need_args(name, args, 1)?;
                channel.send(args[0].clone(), &vm.wait_cx())?;
                Value::Null
            }
            "receive" => {
                need_args(name, args, 0)?;
                channel.receive(&vm.wait_cx())?
            }
            "tryReceive" => {
                need_args(name, args, 0)?;
                channel.try_receive().unwrap_or(Value::Null)
            }
            "receiveTimeout" => {
                need_args(name, args, 1)?;
                let ms = int_arg(name, args, 0)?;
                let ms = u64::try_from(ms).map_err(|_| Error::type_error("receiveTimeout() expects a non-negative timeout"))?;
                channel.receive_timeout(ms, &vm.wait_cx())?
            }
            "close" => {
                need_args(name, args, 0)?;
                channel.close();
                Value::Null
            }
            "isClosed" => {
                need_args(name, args, 0)?;
                Value::Bool(channel.is_closed())
            }
            "isEmpty" => {
                need_args(name, args, 0)?;
                Value::Bool(channel.is_empty())
            }
            "size" => {
                need_args(name, args, 0)?;
                Value::Int(channel.size() as i64)
            }
            _ => return Ok(None),
        },
        Value::Mutex(mutex) => match name {
            "lock" => {
                need_args(name, args, 0)?;
                mutex.lock(&vm.wait_cx())?;
                Value::Null
            }
            "unlock" => {
                need_args(name, args, 0)?;
                mutex.unlock()?;
                Value::Null
            }
            "tryLock" => {
                need_args(name, args, 0)?;
                Value::Bool(mutex.try_lock())
            }
            "isLocked" => {
                need_args(name, args, 0)?;
                Value::Bool(mutex.is_locked())
            }
            "withLock" => {
                need_args(name, args, 1)?;
                mutex.lock(&vm.wait_cx())?;
                let result = vm.call_value(&args[0], Vec::new());
                // Unlock on every exit; a lock failure above never reaches here.
                let unlocked = mutex.unlock();
                let value = result?;
                unlocked?;
                value
            }
            _ => return Ok(None),
        },
        Value::AtomicInt(cell) | Value::AtomicLong(cell) => {
            let wrap = |v: i64| {
                if matches!(recv, Value::AtomicInt(_)) {
                    Value::Int(v)
                } else {
                    Value::Long(v)
                }
            };
            match name {
                "get" => {
                    need_args(name, args, 0)?;
                    wrap(cell.load(Ordering::SeqCst))
                }
                "set" => {
                    need_args(name, args, 1)?;
                    cell.store(int_arg(name, args, 0)?, Ordering::SeqCst);
                    Value::Null
                }
                "incrementAndGet" => {
                    need_args(name, args, 0)?;
                    wrap(cell.fetch_add(1, Ordering::SeqCst) + 1)
                }
                "decrementAndGet" => {
                    need_args(name, args, 0)?;
                    wrap(cell.fetch_sub(1, Ordering::SeqCst) - 1)
                }
                "addAndGet" => {
                    need_args(name, args, 1)?;
                    let delta = int_arg(name, args, 0)?;
                    wrap(cell.fetch_add(delta, Ordering::SeqCst) + delta)
                }
                "compareAndSet" => {
                    need_args(name, args, 2)?;
                    let expected = int_arg(name, args, 0)?;
                    let new = int_arg(name, args, 1)?;
                    let swapped = cell
                        .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok();
                    Value::Bool(swapped)
                }
                _ => return Ok(None),
            }
        }
        Value::AtomicRef(cell) => match name {
            "get" => {
                need_args(name, args, 0)?;
                cell.lock().expect("atomic ref lock").clone()
            }
            "set" => {
                need_args(name, args, 1)?;
                *cell.lock().expect("atomic ref lock") = args[0].clone();
                Value::Null
            }
            "compareAndSet" => {
                need_args(name, args, 2)?;
                let mut guard = cell.lock().expect("atomic ref lock");
                if *guard == args[0] {
                    *guard = args[1].clone();
                    Value::Bool(true)
                } else {
                    Value::Bool(false)
                }
            }
            _ => return Ok(None),
        },
        _ => return Ok(None),
    };
    Ok(Some(result))
}
