use std::cell::Cell;
use std::cell::RefCell;
use std::mem;

use crate::impl_::object::Target;

thread_local! {
    static PENDING: RefCell<Vec<Target>> = const { RefCell::new(Vec::new()) };
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

struct Draining;

impl Drop for Draining {
    fn drop(&mut self) {
        let _ = DRAINING.try_with(|draining| draining.set(false));
    }
}

/// Drop graph values without recursing through their destructors.
///
/// Destroying a value releases its edges, which may destroy further values.
/// Nested releases only queue their targets; the outermost call drops the
/// queue batch by batch until it stays empty.
pub fn release(targets: Vec<Target>) {
    if targets.is_empty() {
        return;
    }
    if PENDING
        .try_with(move |pending| pending.borrow_mut().extend(targets))
        .is_err()
    {
        return;
    }
    let already_draining = DRAINING
        .try_with(|draining| draining.replace(true))
        .unwrap_or(true);
    if already_draining {
        return;
    }
    let _draining = Draining;
    loop {
        let batch = match PENDING.try_with(|pending| mem::take(&mut *pending.borrow_mut())) {
            Ok(batch) => batch,
            Err(_) => break,
        };
        if batch.is_empty() {
            break;
        }
        drop(batch);
    }
}

pub fn release_one(target: Target) {
    release(vec![target]);
}
