//! Logging helpers.

use log::error;

/// Logs an error, one line per cause, followed by its backtrace if one was captured.
pub fn log_err(err: &failure::Error) {
    for (i, cause) in err.iter_chain().enumerate() {
        if i == 0 {
            error!("{}", cause);
        } else {
            error!("caused by: {}", cause);
        }
    }
    let bt = err.backtrace().to_string();
    if !bt.is_empty() {
        error!("{}", bt);
    }
}

/// Logs anything that converts into a `failure::Error`, such as a [`crate::error::Error`].
pub fn log_fail<E: Into<failure::Error>>(err: E) {
    log_err(&err.into())
}
