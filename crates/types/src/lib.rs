//! Core types for the Courier account system.
//!
//! This crate defines the data model shared by the account store, the
//! write-through cache, and the account lifecycle coordinator:
//!
//! - Typed identifiers (`Aci`, `Pni`, `DeviceId`) that cannot be mixed up
//! - The `Account` and `Device` records with their staleness and
//!   directory-visibility behaviors
//! - Registration payload types (`AccountAttributes`, `AccountBadge`)
//! - E.164 phone-number helpers
//! - Configuration for cache and deleted-accounts-gate policy

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod account;
mod config;
mod e164;
mod ids;

pub use account::{
    start_of_utc_day, Account, AccountAttributes, AccountBadge, AuthenticationCredentials, Device,
    DeviceCapabilities, RegistrationLock,
};
pub use config::{CacheConfig, GateConfig};
pub use e164::country_code;
pub use ids::{Aci, DeviceId, Pni};
