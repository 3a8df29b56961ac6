//! Miscellaneous utility structs and functions.

use std::future::Future;

use futures::future::{self, AbortHandle};

use crate::platform;

/// Upgrades the provided [`Weak`] reference, breaking out of the enclosing
/// loop if the referenced value is already dropped.
///
/// [`Weak`]: std::rc::Weak
macro_rules! upgrade_or_break {
    ($v:expr) => {
        match $v.upgrade() {
            Some(v) => v,
            None => break,
        }
    };
}

/// Abort handle of a spawned task.
///
/// The task is aborted when this [`TaskHandle`] is dropped.
#[derive(Debug)]
pub(crate) struct TaskHandle(AbortHandle);

impl From<AbortHandle> for TaskHandle {
    #[inline]
    fn from(handle: AbortHandle) -> Self {
        Self(handle)
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Spawns the provided [`Future`] on the current thread and returns a
/// [`TaskHandle`] aborting it.
pub(crate) fn spawn_abortable<F>(task: F) -> TaskHandle
where
    F: Future<Output = ()> + 'static,
{
    let (task, handle) = future::abortable(task);
    platform::spawn(async move {
        let _ = task.await;
    });
    handle.into()
}
