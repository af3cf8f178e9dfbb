//! Coordinator metrics exposed through the `metrics` facade.
//!
//! Naming: `courier_accounts_{name}_{unit}`, counters suffixed `_total`,
//! histograms suffixed `_seconds`.

use std::time::Duration;

use metrics::{counter, histogram};

const ACCOUNTS_CREATED: &str = "courier_accounts_created_total";
const ACCOUNTS_DELETED: &str = "courier_accounts_deleted_total";

const CREATE_LATENCY: &str = "courier_accounts_create_latency_seconds";
const UPDATE_LATENCY: &str = "courier_accounts_update_latency_seconds";
const DELETE_LATENCY: &str = "courier_accounts_delete_latency_seconds";
const LOOKUP_LATENCY: &str = "courier_accounts_lookup_latency_seconds";

/// Records a completed registration, tagged `new`, `re-registration`, or
/// `recently-deleted`.
#[inline]
pub(crate) fn record_create(kind: &'static str) {
    counter!(ACCOUNTS_CREATED, "type" => kind).increment(1);
}

/// Records registration latency.
#[inline]
pub(crate) fn observe_create(latency: Duration) {
    histogram!(CREATE_LATENCY).record(latency.as_secs_f64());
}

/// Records a completed deletion, tagged with the number's country code and
/// the caller-supplied reason.
#[inline]
pub(crate) fn record_delete(country: String, reason: &'static str) {
    counter!(ACCOUNTS_DELETED, "country" => country, "reason" => reason).increment(1);
}

/// Records deletion latency.
#[inline]
pub(crate) fn observe_delete(latency: Duration) {
    histogram!(DELETE_LATENCY).record(latency.as_secs_f64());
}

/// Records general-update latency.
#[inline]
pub(crate) fn observe_update(latency: Duration) {
    histogram!(UPDATE_LATENCY).record(latency.as_secs_f64());
}

/// Records lookup latency per key family (`aci`, `e164`, `pni`, `username`).
#[inline]
pub(crate) fn observe_lookup(key: &'static str, latency: Duration) {
    histogram!(LOOKUP_LATENCY, "key" => key).record(latency.as_secs_f64());
}
