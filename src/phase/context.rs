//! Phase contexts: one transactional scope per unit of work.
//!
//! A context is configured through builder calls, pushed onto its tracker's
//! phase stack with [`PhaseContext::build_and_switch`], and unwound by
//! [`PhaseContext::close`] or, failing that, when it is dropped.

use std::fmt;
use std::mem;
use std::time::Instant;

use tracing::error;

use crate::cause::Causer;
use crate::error::{Result, UsageError};
use crate::inventory::{Inventory, ItemStack};
use crate::observability::metrics;
use crate::world::PlayerId;

use super::capture::Captures;
use super::state::PhaseState;
use super::tracker::PhaseTracker;
use super::unwind::UnwindReport;

/// Builder configuration of a context.
#[derive(Debug, Clone, Default)]
pub struct PhaseSetup {
    pub(crate) source: Option<Causer>,
    pub(crate) packet_player: Option<PlayerId>,
    pub(crate) cursor: Option<ItemStack>,
    pub(crate) used_item: Option<ItemStack>,
    pub(crate) creator: Option<Causer>,
    pub(crate) notifier: Option<Causer>,
    pub(crate) container: Option<Inventory>,
    pub(crate) clicked_slot: Option<usize>,
}

impl PhaseSetup {
    /// Player whose packet is being handled.
    #[must_use]
    pub const fn packet_player(&self) -> Option<PlayerId> {
        self.packet_player
    }

    /// Cursor item at dispatch time.
    #[must_use]
    pub const fn cursor(&self) -> Option<&ItemStack> {
        self.cursor.as_ref()
    }

    /// Container open while the unit of work runs.
    #[must_use]
    pub const fn container(&self) -> Option<&Inventory> {
        self.container.as_ref()
    }

    /// Flat slot index a click packet targets.
    #[must_use]
    pub const fn clicked_slot(&self) -> Option<usize> {
        self.clicked_slot
    }
}

/// An open phase as it sits on the phase stack.
#[derive(Debug)]
pub(crate) struct PhaseRecord {
    pub(crate) id: u64,
    pub(crate) state: PhaseState,
    pub(crate) source: Causer,
    pub(crate) setup: PhaseSetup,
    pub(crate) captures: Captures,
    pub(crate) opened_at: Instant,
}

enum Lifecycle {
    Building(Box<PhaseSetup>),
    Switched { index: usize },
    Closed,
}

/// One unit of work's transactional scope.
///
/// Configure it, then call `build_and_switch` to make it the tracker's
/// current phase. `close` unwinds it: the context is popped, its captures
/// are turned into events, and each batch is applied or reverted by the
/// listeners' verdict.
///
/// # Closing on drop
///
/// A switched context that is dropped without `close` is unwound by `Drop`.
/// `Drop` cannot return an error, so a `StoreError` hit while applying or
/// reverting is logged and the remaining batches of that context are not
/// settled. Drivers must call [`close`](Self::close) to see those errors;
/// the drop path only keeps the phase stack balanced. A context dropped
/// while its thread is panicking is discarded without firing events.
pub struct PhaseContext<'t> {
    tracker: &'t PhaseTracker,
    id: u64,
    state: PhaseState,
    lifecycle: Lifecycle,
}

impl<'t> PhaseContext<'t> {
    pub(crate) fn new(tracker: &'t PhaseTracker, state: PhaseState) -> Self {
        Self {
            tracker,
            id: tracker.next_context_id(),
            state,
            lifecycle: Lifecycle::Building(Box::default()),
        }
    }

    /// Context id, unique per tracker.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// State the context was created for.
    #[must_use]
    pub const fn state(&self) -> PhaseState {
        self.state
    }

    /// Whether the context is on the phase stack.
    #[must_use]
    pub const fn is_switched(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Switched { .. })
    }

    /// Causer the unit of work is attributed to. Defaults to the server.
    #[must_use]
    #[track_caller]
    pub fn source(mut self, source: Causer) -> Self {
        self.setup_mut("source").source = Some(source);
        self
    }

    /// Player whose packet is being handled.
    #[must_use]
    #[track_caller]
    pub fn packet_player(mut self, player: PlayerId) -> Self {
        self.setup_mut("packet_player").packet_player = Some(player);
        self
    }

    /// Item on the player's cursor at dispatch time.
    #[must_use]
    #[track_caller]
    pub fn cursor(mut self, cursor: ItemStack) -> Self {
        self.setup_mut("cursor").cursor = Some(cursor);
        self
    }

    /// Item in use while the unit of work runs.
    #[must_use]
    #[track_caller]
    pub fn used_item(mut self, item: ItemStack) -> Self {
        self.setup_mut("used_item").used_item = Some(item);
        self
    }

    /// Owner of whatever the unit of work produces.
    #[must_use]
    #[track_caller]
    pub fn creator(mut self, creator: Causer) -> Self {
        self.setup_mut("creator").creator = Some(creator);
        self
    }

    /// Who gets notified about the changes.
    #[must_use]
    #[track_caller]
    pub fn notifier(mut self, notifier: Causer) -> Self {
        self.setup_mut("notifier").notifier = Some(notifier);
        self
    }

    /// Container the player has open.
    #[must_use]
    #[track_caller]
    pub fn container(mut self, inventory: Inventory) -> Self {
        self.setup_mut("container").container = Some(inventory);
        self
    }

    /// Flat slot index targeted by a click.
    #[must_use]
    #[track_caller]
    pub fn clicked_slot(mut self, index: usize) -> Self {
        self.setup_mut("clicked_slot").clicked_slot = Some(index);
        self
    }

    /// Pushes the context onto the phase stack and makes it current.
    ///
    /// # Errors
    ///
    /// - `UsageError::AlreadySwitched` if called a second time; the stack is
    ///   left untouched.
    /// - `UsageError::EmptyCause` if the source has no identity.
    /// - `PhaseError::ReentryDenied` if the state is not reentrant and
    ///   already open.
    /// - `PhaseError::DepthExceeded` if the stack is full.
    ///
    /// # Panics
    ///
    /// Panics if called off the tracker's bound thread.
    #[track_caller]
    pub fn build_and_switch(&mut self) -> Result<()> {
        let setup = match mem::replace(&mut self.lifecycle, Lifecycle::Closed) {
            Lifecycle::Building(setup) => setup,
            other => {
                self.lifecycle = other;
                let err = UsageError::AlreadySwitched {
                    context_id: self.id,
                    state: self.state.name(),
                };
                error!(context_id = self.id, error = %err, "context switched twice");
                metrics::record_usage_error("already_switched");
                return Err(err.into());
            }
        };

        if let Err(e) = self.tracker.admit(self.state, &setup) {
            self.lifecycle = Lifecycle::Building(setup);
            return Err(e);
        }
        let index = self.tracker.push_record(self.id, self.state, *setup);
        self.lifecycle = Lifecycle::Switched { index };
        Ok(())
    }

    /// Pops and unwinds the context.
    ///
    /// Closing a context that was never switched does nothing.
    ///
    /// # Errors
    ///
    /// Returns the first `StoreError` hit while applying or reverting
    /// captured changes. The context is popped either way.
    ///
    /// # Panics
    ///
    /// Panics if the context is not on top of the phase stack, or if called
    /// off the tracker's bound thread.
    #[track_caller]
    pub fn close(mut self) -> Result<UnwindReport> {
        match mem::replace(&mut self.lifecycle, Lifecycle::Closed) {
            Lifecycle::Switched { index } => self.tracker.close_context(self.id, index),
            Lifecycle::Building(_) | Lifecycle::Closed => {
                Ok(UnwindReport::new(self.id, self.state))
            }
        }
    }

    #[track_caller]
    fn setup_mut(&mut self, field: &'static str) -> &mut PhaseSetup {
        let context_id = self.id;
        match &mut self.lifecycle {
            Lifecycle::Building(setup) => setup,
            Lifecycle::Switched { .. } | Lifecycle::Closed => {
                let err = UsageError::ConfiguredAfterSwitch { context_id, field };
                error!(context_id, error = %err, "context configured after switch");
                metrics::record_usage_error("configured_after_switch");
                panic!("{err}");
            }
        }
    }
}

impl Drop for PhaseContext<'_> {
    fn drop(&mut self) {
        let Lifecycle::Switched { index } = mem::replace(&mut self.lifecycle, Lifecycle::Closed)
        else {
            return;
        };
        if std::thread::panicking() {
            self.tracker.abandon_context(self.id, index);
            return;
        }
        if let Err(e) = self.tracker.close_context(self.id, index) {
            error!(
                context_id = self.id,
                state = self.state.name(),
                error = %e,
                "phase context failed to unwind on drop"
            );
        }
    }
}

impl fmt::Debug for PhaseContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseContext")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("switched", &self.is_switched())
            .finish()
    }
}
