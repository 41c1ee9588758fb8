// SPDX-License-Identifier: MPL-2.0

//! Keeping the entity cache in step with the remote store: optimistic
//! toggles, client-side joins and background view tracking.

pub mod aggregate;
mod analytics;
mod mutation;

pub use aggregate::{AuthorSummary, CommentItem, FeedItem, PostExtras, PostStats, Tally};
pub use analytics::{ViewState, ViewTracker, engagement_rate, format_rate};
pub use mutation::{
    Follows, Likes, Membership, MutationController, MutationError, MutationKind, Snapshot,
    ToggleOutcome,
};
