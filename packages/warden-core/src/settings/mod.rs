//! # Security Settings
//!
//! The persisted settings record and the [`SecurityFacade`] that drives
//! every security flow against it.

mod facade;
mod model;

pub use facade::{SecondFactor, SecurityFacade};
pub use model::{Confirmation, SecuritySettings, TwoFactorSettings, TwoFactorState};
