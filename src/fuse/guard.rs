//! Fault barrier around dispatcher calls
//!
//! Every kernel callback runs its dispatcher call through [`call`]. Domain
//! errors become their errno; a panic anywhere in the call is logged with the
//! verb name and answered with EINVAL. A panic while translating the error
//! itself is answered with EFAULT. Nothing escapes into the kernel session.

use std::any::Any;
use std::fmt::Display;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{debug, error};

use crate::error::FuseBridgeError;

/// Errors that can be reported to the kernel
pub trait ToErrno: Display {
    fn to_errno(&self) -> i32;

    /// Unexpected errors are logged at error level, the rest at debug
    fn is_fault(&self) -> bool {
        false
    }
}

impl ToErrno for FuseBridgeError {
    fn to_errno(&self) -> i32 {
        FuseBridgeError::to_errno(self)
    }

    fn is_fault(&self) -> bool {
        FuseBridgeError::is_fault(self)
    }
}

/// Run `op` for `verb`, translating its outcome to a kernel reply value
pub fn call<T, E, F>(verb: &str, op: F) -> Result<T, i32>
where
    E: ToErrno,
    F: FnOnce() -> Result<T, E>,
{
    match catch_unwind(AssertUnwindSafe(op)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(translate(verb, &err)),
        Err(panic) => {
            error!("{}: unexpected panic: {}", verb, panic_message(&*panic));
            Err(libc::EINVAL)
        }
    }
}

fn translate<E: ToErrno>(verb: &str, err: &E) -> i32 {
    match catch_unwind(AssertUnwindSafe(|| (err.to_errno(), err.is_fault()))) {
        Ok((errno, true)) => {
            error!("{} failed: {}", verb, err);
            errno
        }
        Ok((errno, false)) => {
            debug!("{}: {}", verb, err);
            errno
        }
        Err(panic) => {
            error!(
                "{}: panic while translating error: {}",
                verb,
                panic_message(&*panic)
            );
            libc::EFAULT
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
