//! Bounded retry for transient transport failures.

use std::{thread, time::Duration};

use log::debug;

use crate::error::{Error, Result};

/// Attempts made before a transient failure is surfaced.
pub const ERROR_RETRY_COUNT: u32 = 3;

/// Pause between attempts.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Run `op` up to `count` times, backing off between attempts.
///
/// Only transient errors (timeouts and transport I/O) are retried;
/// protocol-level failures surface immediately. After `count` failed
/// attempts the last error is returned, never making attempt `count + 1`.
pub fn with_retry<T, F>(count: u32, backoff: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < count => {
                debug!("attempt {attempt}/{count} failed ({err}), retrying");
                thread::sleep(backoff);
            },
            Err(err) => return Err(err),
        }
    }
}
