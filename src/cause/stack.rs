//! The per-thread cause stack and its scoped frames.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;

use indexmap::IndexMap;
use tracing::{error, trace};

use crate::error::UsageError;
use crate::observability::metrics;

use super::context::{ContextEntry, ContextKey, EventContext};
use super::{Cause, Causer};

#[derive(Default)]
struct Frame {
    causes: Vec<Causer>,
    context: IndexMap<&'static str, ContextEntry>,
}

/// Cause stack of one simulation thread.
///
/// Index 0 is a base frame that is never released; everything pushed
/// through the manager directly lands in the innermost open frame.
/// Not `Sync`: a manager lives on the thread its tracker is bound to.
pub struct CauseStackManager {
    frames: RefCell<Vec<Frame>>,
}

impl Default for CauseStackManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CauseStackManager {
    /// Creates a stack holding only the base frame.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: RefCell::new(vec![Frame::default()]),
        }
    }

    /// Opens a nested frame. Dropping the frame restores the stack.
    #[must_use = "the frame is released as soon as it is dropped"]
    pub fn push_cause_frame(&self) -> StackFrame<'_> {
        let mut frames = self.frames.borrow_mut();
        let index = frames.len();
        frames.push(Frame::default());
        trace!(depth = index, "pushed cause frame");
        StackFrame {
            manager: self,
            index,
        }
    }

    /// Appends a causer to the innermost frame.
    ///
    /// # Errors
    ///
    /// Returns `UsageError::EmptyCause` if the causer has no identity.
    pub fn push_cause(&self, causer: Causer) -> Result<(), UsageError> {
        let top = self.top_index();
        self.push_cause_at(top, causer)
    }

    /// Binds `value` to `key` in the innermost frame.
    pub fn add_context<T>(&self, key: ContextKey<T>, value: T)
    where
        T: Any + fmt::Debug + Send + Sync,
    {
        let top = self.top_index();
        self.add_context_at(top, key, value);
    }

    /// Removes the binding of `key` from the innermost frame.
    ///
    /// Bindings of outer frames are untouched and become visible again.
    pub fn remove_context<T>(&self, key: ContextKey<T>) -> bool {
        let top = self.top_index();
        self.remove_context_at(top, key)
    }

    /// Snapshot of every causer in stack order and the shadowed context.
    #[must_use]
    pub fn current_cause(&self) -> Cause {
        let frames = self.frames.borrow();
        let causes = frames
            .iter()
            .flat_map(|f| f.causes.iter().cloned())
            .collect();
        let mut context = EventContext::default();
        for frame in frames.iter() {
            for (key, entry) in &frame.context {
                context.insert(key, entry.clone());
            }
        }
        Cause::new(causes, context)
    }

    /// Innermost binding of `key`.
    #[must_use]
    pub fn context<T: Any + Clone>(&self, key: ContextKey<T>) -> Option<T> {
        self.current_cause().context().get(&key).cloned()
    }

    /// Number of open frames, not counting the base frame.
    #[must_use]
    pub fn frame_depth(&self) -> usize {
        self.frames.borrow().len() - 1
    }

    fn top_index(&self) -> usize {
        self.frames.borrow().len() - 1
    }

    fn push_cause_at(&self, index: usize, causer: Causer) -> Result<(), UsageError> {
        if let Err(e) = causer.validate() {
            error!(error = %e, "rejected cause push");
            metrics::record_usage_error("empty_cause");
            return Err(e);
        }
        if let Some(frame) = self.frames.borrow_mut().get_mut(index) {
            frame.causes.push(causer);
        }
        Ok(())
    }

    fn add_context_at<T>(&self, index: usize, key: ContextKey<T>, value: T)
    where
        T: Any + fmt::Debug + Send + Sync,
    {
        if let Some(frame) = self.frames.borrow_mut().get_mut(index) {
            frame.context.insert(key.name(), ContextEntry::new(value));
        }
    }

    fn remove_context_at<T>(&self, index: usize, key: ContextKey<T>) -> bool {
        self.frames
            .borrow_mut()
            .get_mut(index)
            .is_some_and(|frame| frame.context.shift_remove(key.name()).is_some())
    }

    fn release(&self, index: usize) {
        let mut frames = self.frames.borrow_mut();
        let len = frames.len();
        if len == index + 1 {
            frames.truncate(index);
            drop(frames);
            trace!(depth = index, "released cause frame");
            return;
        }

        metrics::record_usage_error("frame_release_order");
        if std::thread::panicking() {
            error!(
                depth = index,
                open = len - 1,
                "cause frame released out of order while unwinding"
            );
            frames.truncate(index.min(len));
            return;
        }
        drop(frames);
        error!(
            depth = index,
            open = len - 1,
            "cause frame released out of order"
        );
        panic!("cause frame at depth {index} released while {len} frames are open");
    }
}

impl fmt::Debug for CauseStackManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CauseStackManager")
            .field("cause", &self.current_cause())
            .finish()
    }
}

// ============================================================================
// StackFrame
// ============================================================================

/// One nested extension of the cause stack.
///
/// Released on drop, truncating causes and context back to what they were
/// when the frame was opened. Frames must be released strictly LIFO;
/// releasing an outer frame while an inner one is open panics.
pub struct StackFrame<'a> {
    manager: &'a CauseStackManager,
    index: usize,
}

impl StackFrame<'_> {
    /// Appends a causer to this frame.
    ///
    /// # Errors
    ///
    /// Returns `UsageError::EmptyCause` if the causer has no identity.
    pub fn push_cause(&self, causer: Causer) -> Result<(), UsageError> {
        self.manager.push_cause_at(self.index, causer)
    }

    /// Binds `value` to `key` in this frame, replacing an earlier binding
    /// of the same key in this frame only.
    pub fn add_context<T>(&self, key: ContextKey<T>, value: T)
    where
        T: Any + fmt::Debug + Send + Sync,
    {
        self.manager.add_context_at(self.index, key, value);
    }

    /// Removes this frame's binding of `key`.
    pub fn remove_context<T>(&self, key: ContextKey<T>) -> bool {
        self.manager.remove_context_at(self.index, key)
    }

    /// Depth of this frame (1 for the outermost).
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.index
    }
}

impl Drop for StackFrame<'_> {
    fn drop(&mut self) {
        self.manager.release(self.index);
    }
}

impl fmt::Debug for StackFrame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackFrame")
            .field("depth", &self.index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cause::{MovementType, keys};
    use crate::world::PlayerId;

    #[test]
    fn test_frame_release_restores_causes() {
        let stack = CauseStackManager::new();
        stack.push_cause(Causer::Server).unwrap();
        let before = stack.current_cause();
        {
            let frame = stack.push_cause_frame();
            frame.push_cause(Causer::plugin("warps")).unwrap();
            frame.add_context(keys::PLUGIN, "warps".to_string());
            assert_eq!(stack.current_cause().causes().len(), 2);
        }
        assert_eq!(stack.current_cause(), before);
        assert_eq!(stack.frame_depth(), 0);
    }

    #[test]
    fn test_inner_context_shadows_outer() {
        let stack = CauseStackManager::new();
        let outer = stack.push_cause_frame();
        outer.add_context(keys::MOVEMENT_TYPE, MovementType::Natural);
        {
            let inner = stack.push_cause_frame();
            inner.add_context(keys::MOVEMENT_TYPE, MovementType::Command);
            assert_eq!(
                stack.context(keys::MOVEMENT_TYPE),
                Some(MovementType::Command)
            );
        }
        assert_eq!(
            stack.context(keys::MOVEMENT_TYPE),
            Some(MovementType::Natural)
        );
    }

    #[test]
    fn test_readding_key_overwrites_within_frame() {
        let stack = CauseStackManager::new();
        let frame = stack.push_cause_frame();
        frame.add_context(keys::PLUGIN, "a".to_string());
        frame.add_context(keys::PLUGIN, "b".to_string());
        assert_eq!(stack.context(keys::PLUGIN), Some("b".to_string()));
        assert_eq!(stack.current_cause().context().len(), 1);
        assert!(frame.remove_context(keys::PLUGIN));
        assert_eq!(stack.context(keys::PLUGIN), None);
    }

    #[test]
    fn test_empty_cause_rejected_without_mutation() {
        let stack = CauseStackManager::new();
        let frame = stack.push_cause_frame();
        assert!(frame.push_cause(Causer::plugin("")).is_err());
        assert!(stack.current_cause().is_empty());
    }

    #[test]
    fn test_causes_in_push_order() {
        let stack = CauseStackManager::new();
        let player = Causer::player(PlayerId::random(), "alex");
        let outer = stack.push_cause_frame();
        outer.push_cause(player.clone()).unwrap();
        let inner = stack.push_cause_frame();
        inner.push_cause(Causer::plugin("warps")).unwrap();
        let cause = stack.current_cause();
        assert_eq!(cause.root(), Some(&player));
        assert_eq!(cause.most_specific(), Some(&Causer::plugin("warps")));
        assert_eq!(inner.depth(), 2);
    }

    #[test]
    #[should_panic(expected = "released while")]
    fn test_out_of_order_release_panics() {
        let stack = CauseStackManager::new();
        let outer = stack.push_cause_frame();
        let inner = stack.push_cause_frame();
        drop(outer);
        drop(inner);
    }
}
