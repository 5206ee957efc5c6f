// Last-error channel of the engine.
//
// Engines report failures out of band: a call stores a message in the slot
// and returns normally. The slot is kept per thread, like errno, so a session
// driven from its owning thread only ever sees its own engine's errors.

use std::cell::RefCell;

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = RefCell::new(None);
}

/// Store an error message, replacing any message not yet collected
pub fn set_error<S: Into<String>>(message: S) {
    let message = message.into();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

pub fn has_error() -> bool {
    LAST_ERROR.with(|slot| slot.borrow().is_some())
}

/// Current message, empty when no error is set
pub fn error_string() -> String {
    LAST_ERROR.with(|slot| slot.borrow().clone().unwrap_or_default())
}

pub fn reset_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Check and clear in one step
pub(crate) fn take_error() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow_mut().take())
}
