// SPDX-License-Identifier: MPL-2.0

mod context;
mod session;

pub use context::SessionContext;
pub use session::{SessionError, SessionManager};
