//! C ABI entry point. Declared in `include/cendol_embed.h`.

use std::ffi::{CStr, c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use log::{debug, error};

use crate::error::DispatchError;

/// The toolchain is not reentrant; one compilation at a time per process.
static TOOLCHAIN_LOCK: Mutex<()> = Mutex::new(());

/// Run `compile` under the process-wide lock with panics contained.
pub(crate) fn guarded(compile: impl FnOnce() -> Result<(), DispatchError>) -> bool {
    let _guard = TOOLCHAIN_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    match panic::catch_unwind(AssertUnwindSafe(compile)) {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            debug!("compilation failed: {}", err);
            false
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("compilation panicked: {}", message);
            false
        }
    }
}

/// Copy `argv[0..argc]`, or `None` when any pointer is null.
///
/// # Safety
///
/// Non-null pointers must point to NUL-terminated strings that stay valid for
/// the duration of the call, and `argv` must hold `argc` entries.
unsafe fn collect_args(argc: c_int, argv: *const *const c_char) -> Option<Vec<String>> {
    if argc <= 0 || argv.is_null() {
        return None;
    }
    let mut args = Vec::with_capacity(argc as usize);
    for index in 0..argc as usize {
        // SAFETY: `argv` has `argc` entries per the caller's contract.
        let arg = unsafe { *argv.add(index) };
        if arg.is_null() {
            return None;
        }
        // SAFETY: non-null entries are NUL-terminated strings.
        args.push(unsafe { CStr::from_ptr(arg) }.to_string_lossy().into_owned());
    }
    Some(args)
}

/// Compile as the native driver would for `argv`, entirely in-process.
///
/// Returns `true` when every planned job succeeded. Details of a failure are
/// only written to stderr.
///
/// # Safety
///
/// `argv` must point to `argc` NUL-terminated strings and `resources_dir` to
/// one NUL-terminated string; all must stay valid until the call returns.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn cendol_embed_try_compile(
    argc: c_int,
    argv: *const *const c_char,
    resources_dir: *const c_char,
) -> bool {
    if resources_dir.is_null() {
        return false;
    }
    // SAFETY: forwarded caller contract.
    let Some(args) = (unsafe { collect_args(argc, argv) }) else {
        return false;
    };
    // SAFETY: checked for null above; NUL-terminated per the caller's contract.
    let resource_dir = PathBuf::from(unsafe { CStr::from_ptr(resources_dir) }.to_string_lossy().into_owned());
    crate::try_compile(&args, &resource_dir)
}

#[cfg(test)]
mod tests_ffi;
