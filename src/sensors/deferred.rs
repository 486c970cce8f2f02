//! Holding back sensor listener calls while a caller is inside a critical
//! section.
//!
//! Decoders update sensors while the device manager holds its state lock.
//! Listeners are consumers (display, export) that may query the manager, so
//! the manager opens a [`DeferredNotifications`] scope around every locked
//! section and the listener calls made on that thread run when the scope
//! ends, after the lock is gone.

use std::cell::RefCell;

type Pending = Box<dyn FnOnce()>;

thread_local! {
    static PENDING: RefCell<Option<Vec<Pending>>> = const { RefCell::new(None) };
}

/// Scope collecting the listener calls of the current thread.
///
/// Calls run in the order they were made when the outermost scope is
/// dropped. Nested scopes join the outer one.
#[derive(Debug)]
pub struct DeferredNotifications {
    outermost: bool,
}

impl DeferredNotifications {
    pub fn begin() -> Self {
        let outermost = PENDING.with(|pending| {
            let mut pending = pending.borrow_mut();
            if pending.is_some() {
                false
            } else {
                *pending = Some(Vec::new());
                true
            }
        });
        Self { outermost }
    }
}

impl Drop for DeferredNotifications {
    fn drop(&mut self) {
        if !self.outermost {
            return;
        }

        // Close the scope first so listeners run with no scope open.
        let calls = PENDING.with(|pending| pending.borrow_mut().take());
        if std::thread::panicking() {
            return;
        }
        for call in calls.into_iter().flatten() {
            call();
        }
    }
}

/// Run `call` now, or at the end of the open scope on this thread.
pub(crate) fn dispatch<F>(call: F)
where
    F: FnOnce() + 'static,
{
    let call: Pending = Box::new(call);
    let immediate = PENDING.with(|pending| match pending.borrow_mut().as_mut() {
        Some(calls) => {
            calls.push(call);
            None
        }
        None => Some(call),
    });

    if let Some(call) = immediate {
        call();
    }
}
