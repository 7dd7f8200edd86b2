//! Borrow-once scratch arena.
//!
//! The container carries one workspace for transient allocations (tag
//! arrays during consistency checks, value buffers during report-back).
//! Only one borrow may be live at a time; a double borrow is a programming
//! error that debug builds detect.

use std::cell::Cell;

use bumpalo::Bump;

use remold_core::{CoreError, CoreResult};

/// Scratch arena with a borrow-once discipline.
pub struct Workspace {
    bump: Bump,
    in_use: Cell<bool>,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace").field("in_use", &self.in_use.get()).finish()
    }
}

impl Workspace {
    pub fn new() -> Workspace {
        Workspace { bump: Bump::new(), in_use: Cell::new(false) }
    }

    /// Borrow the workspace. Fails when a previous borrow is still live.
    pub fn borrow(&self) -> CoreResult<WorkspaceGuard<'_>> {
        if self.in_use.replace(true) {
            debug_assert!(false, "workspace borrowed twice");
            return Err(CoreError::RuntimeError(
                "workspace memory is already in use".into(),
            ));
        }
        Ok(WorkspaceGuard { ws: self })
    }

    /// Reset the arena. O(1); requires no live borrow.
    pub fn reset(&mut self) {
        debug_assert!(!self.in_use.get());
        self.bump.reset();
    }
}

impl Default for Workspace {
    fn default() -> Workspace {
        Workspace::new()
    }
}

/// RAII guard over a borrowed workspace; allocations live as long as the
/// guard.
pub struct WorkspaceGuard<'a> {
    ws: &'a Workspace,
}

impl<'a> WorkspaceGuard<'a> {
    /// A zero-initialized scratch slice of `len` elements.
    pub fn alloc_slice<T: Copy + Default>(&self, len: usize) -> &'a mut [T] {
        self.ws.bump.alloc_slice_fill_default(len)
    }

    pub fn alloc_vec<T>(&self) -> bumpalo::collections::Vec<'a, T> {
        bumpalo::collections::Vec::new_in(&self.ws.bump)
    }
}

impl Drop for WorkspaceGuard<'_> {
    fn drop(&mut self) {
        self.ws.in_use.set(false);
    }
}
