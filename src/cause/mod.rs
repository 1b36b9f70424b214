//! Cause tracking.
//!
//! A [`Cause`] explains why a world mutation happened: an ordered chain of
//! [`Causer`]s (most specific last) plus typed context values. Code running
//! on a simulation thread extends the chain through scoped
//! [`StackFrame`]s obtained from that thread's [`CauseStackManager`].

pub mod context;
pub mod stack;

use std::fmt;

use serde::Serialize;

use crate::error::UsageError;
use crate::world::{BlockPos, EntityId, PlayerId};

pub use context::{ContextKey, EventContext, MovementType, keys};
pub use stack::{CauseStackManager, StackFrame};

// ============================================================================
// Causer
// ============================================================================

/// Something that can be held responsible for a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Causer {
    /// A connected player
    Player {
        /// Player id
        id: PlayerId,
        /// Player name
        name: String,
    },
    /// A non-player entity
    Entity {
        /// Entity handle
        id: EntityId,
    },
    /// A block in the world
    Block {
        /// Block position
        pos: BlockPos,
    },
    /// A plugin acting through the API
    Plugin {
        /// Plugin id
        id: String,
    },
    /// A scheduled task
    Task {
        /// Task id
        id: u64,
        /// Task name
        name: String,
    },
    /// The server itself
    Server,
}

impl Causer {
    /// Player causer.
    #[must_use]
    pub fn player(id: PlayerId, name: impl Into<String>) -> Self {
        Self::Player {
            id,
            name: name.into(),
        }
    }

    /// Plugin causer.
    #[must_use]
    pub fn plugin(id: impl Into<String>) -> Self {
        Self::Plugin { id: id.into() }
    }

    /// Short kind label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Player { .. } => "player",
            Self::Entity { .. } => "entity",
            Self::Block { .. } => "block",
            Self::Plugin { .. } => "plugin",
            Self::Task { .. } => "task",
            Self::Server => "server",
        }
    }

    /// Checks that the causer carries an identity.
    ///
    /// # Errors
    ///
    /// Returns `UsageError::EmptyCause` for players, plugins or tasks with
    /// an empty name or id.
    pub fn validate(&self) -> Result<(), UsageError> {
        let empty = match self {
            Self::Player { name, .. } | Self::Task { name, .. } => name.is_empty(),
            Self::Plugin { id } => id.is_empty(),
            Self::Entity { .. } | Self::Block { .. } | Self::Server => false,
        };
        if empty {
            Err(UsageError::EmptyCause { kind: self.kind() })
        } else {
            Ok(())
        }
    }

    /// Player id, if this is a player.
    #[must_use]
    pub const fn player_id(&self) -> Option<PlayerId> {
        match self {
            Self::Player { id, .. } => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Causer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Player { name, .. } => write!(f, "player:{name}"),
            Self::Entity { id } => write!(f, "{id}"),
            Self::Block { pos } => write!(f, "block:{pos}"),
            Self::Plugin { id } => write!(f, "plugin:{id}"),
            Self::Task { id, name } => write!(f, "task:{name}#{id}"),
            Self::Server => f.write_str("server"),
        }
    }
}

// ============================================================================
// Cause snapshot
// ============================================================================

/// Immutable snapshot of the cause stack.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cause {
    causes: Vec<Causer>,
    context: EventContext,
}

impl Cause {
    pub(crate) const fn new(causes: Vec<Causer>, context: EventContext) -> Self {
        Self { causes, context }
    }

    /// Causers in attribution order, most specific last.
    #[must_use]
    pub fn causes(&self) -> &[Causer] {
        &self.causes
    }

    /// The most specific causer.
    #[must_use]
    pub fn most_specific(&self) -> Option<&Causer> {
        self.causes.last()
    }

    /// The outermost causer.
    #[must_use]
    pub fn root(&self) -> Option<&Causer> {
        self.causes.first()
    }

    /// Whether `causer` appears anywhere in the chain.
    #[must_use]
    pub fn contains(&self, causer: &Causer) -> bool {
        self.causes.contains(causer)
    }

    /// The most specific player in the chain.
    #[must_use]
    pub fn player(&self) -> Option<PlayerId> {
        self.causes.iter().rev().find_map(Causer::player_id)
    }

    /// Context bindings with innermost-frame-wins shadowing applied.
    #[must_use]
    pub const fn context(&self) -> &EventContext {
        &self.context
    }

    /// Whether the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.causes.is_empty()
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, causer) in self.causes.iter().enumerate() {
            if i > 0 {
                f.write_str(" > ")?;
            }
            write!(f, "{causer}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_identity_rejected() {
        assert_eq!(
            Causer::plugin("").validate(),
            Err(UsageError::EmptyCause { kind: "plugin" })
        );
        assert_eq!(
            Causer::player(PlayerId::random(), "").validate(),
            Err(UsageError::EmptyCause { kind: "player" })
        );
        assert!(Causer::Server.validate().is_ok());
        assert!(Causer::plugin("warps").validate().is_ok());
    }

    #[test]
    fn test_player_lookup_prefers_most_specific() {
        let outer = PlayerId::random();
        let inner = PlayerId::random();
        let cause = Cause::new(
            vec![
                Causer::player(outer, "alex"),
                Causer::plugin("warps"),
                Causer::player(inner, "sam"),
            ],
            EventContext::default(),
        );
        assert_eq!(cause.player(), Some(inner));
        assert_eq!(cause.root(), Some(&Causer::player(outer, "alex")));
        assert_eq!(cause.most_specific(), Some(&Causer::player(inner, "sam")));
    }

    #[test]
    fn test_display_chain() {
        let cause = Cause::new(
            vec![Causer::Server, Causer::plugin("warps")],
            EventContext::default(),
        );
        assert_eq!(cause.to_string(), "[server > plugin:warps]");
    }
}
