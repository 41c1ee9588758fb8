// SPDX-License-Identifier: MPL-2.0

mod avatar;
mod password;
mod time;
pub mod validate;

pub use avatar::initials;
pub use password::{PasswordStrength, StrengthLabel, password_strength};
pub use time::{distance, format_date, time_ago, time_ago_from};
pub use validate::ValidationError;
