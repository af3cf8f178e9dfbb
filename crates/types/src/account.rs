//! The account and device records.
//!
//! `Account` is the root entity of the account system. Instances are plain
//! values owned by one caller at a time; the coordinator returns a fresh copy
//! from every successful mutation and flags the argument as stale, so holding
//! on to a pre-update copy is detectable in assertions and diagnostics.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ids::{Aci, DeviceId, Pni};

/// Truncates a timestamp to the start of its UTC day.
///
/// Device last-seen timestamps are tracked at day granularity to keep
/// heavily-contended updates rare.
pub fn start_of_utc_day(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Salted digest of a client-supplied secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationCredentials {
    /// Hex-encoded SHA-256 of `salt || secret`.
    pub hashed: String,
    /// Hex-encoded random salt.
    pub salt: String,
}

impl AuthenticationCredentials {
    /// Derives credentials from a plaintext secret with a fresh random salt.
    pub fn new(secret: &str) -> Self {
        let salt: [u8; 16] = rand::random();
        let salt = hex(&salt);
        let hashed = Self::digest(&salt, secret);
        Self { hashed, salt }
    }

    /// Checks a plaintext secret against the stored digest.
    pub fn verify(&self, secret: &str) -> bool {
        Self::digest(&self.salt, secret) == self.hashed
    }

    fn digest(salt: &str, secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(secret.as_bytes());
        hex(&hasher.finalize())
    }
}

/// Registration-lock credential derived from the client-supplied token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistrationLock(AuthenticationCredentials);

impl RegistrationLock {
    /// Derives a lock credential from the client token.
    pub fn new(token: &str) -> Self {
        Self(AuthenticationCredentials::new(token))
    }

    /// Checks a client token against the stored credential.
    pub fn verify(&self, token: &str) -> bool {
        self.0.verify(token)
    }
}

/// Feature capabilities advertised by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceCapabilities {
    /// Device supports remote secure storage.
    pub storage: bool,
    /// Device supports account transfer.
    pub transfer: bool,
    /// Device supports sender-key group messaging.
    pub sender_key: bool,
    /// Device supports announcement-only groups.
    pub announcement_group: bool,
    /// Device supports the phone-number-change flow.
    pub change_number: bool,
}

/// A single registered device of an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Device identifier; the primary device is [`DeviceId::PRIMARY`].
    pub id: DeviceId,
    /// Authentication credentials for this device.
    pub credentials: AuthenticationCredentials,
    /// Registration id used by the session protocol.
    #[serde(default)]
    pub registration_id: u32,
    /// Advertised capabilities.
    #[serde(default)]
    pub capabilities: DeviceCapabilities,
    /// When the device was registered.
    pub created: DateTime<Utc>,
    /// Last activity, truncated to the UTC day.
    pub last_seen: DateTime<Utc>,
    /// Whether the device polls for messages instead of using a push channel.
    #[serde(default)]
    pub fetches_messages: bool,
    /// Client user agent supplied at registration.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Client-chosen device name.
    #[serde(default)]
    pub name: Option<String>,
}

impl Device {
    /// Creates a device with the given id and credentials; timestamps start
    /// at `created` and every other field at its default.
    pub fn new(id: DeviceId, credentials: AuthenticationCredentials, created: DateTime<Utc>) -> Self {
        Self {
            id,
            credentials,
            registration_id: 0,
            capabilities: DeviceCapabilities::default(),
            created,
            last_seen: start_of_utc_day(created),
            fetches_messages: false,
            user_agent: None,
            name: None,
        }
    }

    /// Whether this device can currently receive messages.
    ///
    /// Message fetching is the only delivery channel in this model, so a
    /// device is enabled iff it fetches.
    pub fn is_enabled(&self) -> bool {
        self.fetches_messages
    }
}

/// A badge held by an account, shown (when visible) on the profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBadge {
    /// Badge identifier.
    pub id: String,
    /// When the badge lapses.
    pub expiration: DateTime<Utc>,
    /// Whether the owner displays the badge.
    pub visible: bool,
}

/// Client-supplied attributes accompanying a registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountAttributes {
    /// Whether the primary device polls for messages.
    pub fetches_messages: bool,
    /// Registration id for the primary device.
    pub registration_id: u32,
    /// Device name.
    pub name: Option<String>,
    /// Capabilities of the primary device.
    pub capabilities: DeviceCapabilities,
    /// Registration-lock token, when the client has one enabled.
    pub registration_lock: Option<String>,
    /// Key gating sealed-sender delivery.
    pub unidentified_access_key: Option<Vec<u8>>,
    /// Whether sealed sender is accepted from anyone.
    pub unrestricted_unidentified_access: bool,
    /// Whether the account may be found by phone number.
    pub discoverable_by_phone_number: bool,
}

impl Default for AccountAttributes {
    fn default() -> Self {
        Self {
            fetches_messages: false,
            registration_id: 0,
            name: None,
            capabilities: DeviceCapabilities::default(),
            registration_lock: None,
            unidentified_access_key: None,
            unrestricted_unidentified_access: false,
            discoverable_by_phone_number: true,
        }
    }
}

/// The root account record.
///
/// The ACI is not part of the serialized body; cache readers reattach it from
/// the key the body was stored under. The stale flag is transient as well: a
/// clone is a fresh, detached copy.
#[derive(Debug, Serialize, Deserialize)]
pub struct Account {
    #[serde(skip)]
    aci: Aci,
    pni: Pni,
    number: String,
    #[serde(default)]
    username: Option<String>,
    devices: Vec<Device>,
    /// Key gating sealed-sender delivery.
    #[serde(default)]
    pub unidentified_access_key: Option<Vec<u8>>,
    /// Whether sealed sender is accepted from anyone.
    #[serde(default)]
    pub unrestricted_unidentified_access: bool,
    /// Registration lock, when enabled.
    #[serde(default)]
    pub registration_lock: Option<RegistrationLock>,
    /// Whether the account may be found by phone number.
    #[serde(default = "default_discoverable")]
    pub discoverable_by_phone_number: bool,
    /// Badges currently held.
    #[serde(default)]
    pub badges: Vec<AccountBadge>,
    version: u64,
    #[serde(skip)]
    stale: AtomicBool,
}

fn default_discoverable() -> bool {
    true
}

impl Clone for Account {
    fn clone(&self) -> Self {
        Self {
            aci: self.aci,
            pni: self.pni,
            number: self.number.clone(),
            username: self.username.clone(),
            devices: self.devices.clone(),
            unidentified_access_key: self.unidentified_access_key.clone(),
            unrestricted_unidentified_access: self.unrestricted_unidentified_access,
            registration_lock: self.registration_lock.clone(),
            discoverable_by_phone_number: self.discoverable_by_phone_number,
            badges: self.badges.clone(),
            version: self.version,
            // A clone is a fresh detached copy.
            stale: AtomicBool::new(false),
        }
    }
}

impl Account {
    /// Creates an empty account with the given identifiers and number.
    pub fn new(aci: Aci, number: impl Into<String>, pni: Pni) -> Self {
        Self {
            aci,
            pni,
            number: number.into(),
            username: None,
            devices: Vec::new(),
            unidentified_access_key: None,
            unrestricted_unidentified_access: false,
            registration_lock: None,
            discoverable_by_phone_number: true,
            badges: Vec::new(),
            version: 0,
            stale: AtomicBool::new(false),
        }
    }

    /// The account identifier.
    pub fn aci(&self) -> Aci {
        self.aci
    }

    /// Reattaches the account identifier; used by the store on a number
    /// conflict and by cache readers after decoding the body.
    pub fn set_aci(&mut self, aci: Aci) {
        self.aci = aci;
    }

    /// The E.164 phone number.
    pub fn number(&self) -> &str {
        &self.number
    }

    /// The phone-number identifier.
    pub fn pni(&self) -> Pni {
        self.pni
    }

    /// Replaces the phone number together with its identifier; the two always
    /// change as a pair.
    pub fn set_number(&mut self, number: impl Into<String>, pni: Pni) {
        self.number = number.into();
        self.pni = pni;
    }

    /// The canonical username, when one is set.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Sets the canonical username.
    pub fn set_username(&mut self, username: impl Into<String>) {
        self.username = Some(username.into());
    }

    /// Clears the username.
    pub fn clear_username(&mut self) {
        self.username = None;
    }

    /// All devices, ordered by id.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Adds a device, keeping the set ordered by id.
    pub fn add_device(&mut self, device: Device) {
        self.devices.retain(|d| d.id != device.id);
        self.devices.push(device);
        self.devices.sort_by_key(|d| d.id);
    }

    /// Removes the device with the given id, if present.
    pub fn remove_device(&mut self, id: DeviceId) {
        self.devices.retain(|d| d.id != id);
    }

    /// Looks up a device by id.
    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Looks up a device by id for mutation.
    pub fn device_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.id == id)
    }

    /// The distinguished primary device, present on any registered account.
    pub fn primary_device(&self) -> Option<&Device> {
        self.device(DeviceId::PRIMARY)
    }

    /// The next free device id.
    pub fn next_device_id(&self) -> DeviceId {
        self.devices
            .last()
            .map(|d| d.id.next())
            .unwrap_or(DeviceId::PRIMARY)
    }

    /// Whether the account can currently receive messages at all.
    pub fn is_enabled(&self) -> bool {
        self.primary_device().map(Device::is_enabled).unwrap_or(false)
    }

    /// Whether the contact-discovery directory should list this account.
    pub fn should_be_visible_in_directory(&self) -> bool {
        self.discoverable_by_phone_number && self.is_enabled()
    }

    /// Replaces the badge set, dropping badges already expired at `now`.
    pub fn set_badges(&mut self, now: DateTime<Utc>, badges: Vec<AccountBadge>) {
        self.badges = badges.into_iter().filter(|b| b.expiration > now).collect();
    }

    /// The optimistic-concurrency revision.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Sets the revision; used by the store on successful writes.
    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Flags this copy as superseded by a later revision.
    ///
    /// One-way: once stale, always stale. The coordinator marks the argument
    /// of every successful mutation so accidental reuse shows up in
    /// diagnostics.
    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    /// Whether this copy has been superseded.
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn test_account() -> Account {
        let mut account = Account::new(Aci::random(), "+15550100", Pni::random());
        let created = Utc.with_ymd_and_hms(2024, 6, 1, 10, 30, 0).unwrap();
        let mut device = Device::new(
            DeviceId::PRIMARY,
            AuthenticationCredentials::new("hunter2"),
            created,
        );
        device.fetches_messages = true;
        account.add_device(device);
        account
    }

    #[test]
    fn test_credentials_round_trip() {
        let credentials = AuthenticationCredentials::new("correct horse");
        assert!(credentials.verify("correct horse"));
        assert!(!credentials.verify("battery staple"));
    }

    #[test]
    fn test_credentials_use_distinct_salts() {
        let a = AuthenticationCredentials::new("secret");
        let b = AuthenticationCredentials::new("secret");
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.hashed, b.hashed);
    }

    #[test]
    fn test_stale_flag_is_one_way() {
        let account = test_account();
        assert!(!account.is_stale());

        account.mark_stale();
        assert!(account.is_stale());
        account.mark_stale();
        assert!(account.is_stale());
    }

    #[test]
    fn test_clone_resets_staleness() {
        let account = test_account();
        account.mark_stale();

        let copy = account.clone();
        assert!(!copy.is_stale());
        assert_eq!(copy.aci(), account.aci());
        assert_eq!(copy.number(), account.number());
    }

    #[test]
    fn test_directory_visibility() {
        let mut account = test_account();
        assert!(account.should_be_visible_in_directory());

        account.discoverable_by_phone_number = false;
        assert!(!account.should_be_visible_in_directory());

        account.discoverable_by_phone_number = true;
        account
            .device_mut(DeviceId::PRIMARY)
            .unwrap()
            .fetches_messages = false;
        assert!(!account.should_be_visible_in_directory());
    }

    #[test]
    fn test_visibility_requires_primary_device() {
        let account = Account::new(Aci::random(), "+15550100", Pni::random());
        assert!(!account.should_be_visible_in_directory());
    }

    #[test]
    fn test_next_device_id() {
        let mut account = Account::new(Aci::random(), "+15550100", Pni::random());
        assert_eq!(account.next_device_id(), DeviceId::PRIMARY);

        let created = Utc::now();
        account.add_device(Device::new(
            DeviceId::PRIMARY,
            AuthenticationCredentials::new("pw"),
            created,
        ));
        assert_eq!(account.next_device_id(), DeviceId::new(2));

        account.add_device(Device::new(
            DeviceId::new(4),
            AuthenticationCredentials::new("pw"),
            created,
        ));
        assert_eq!(account.next_device_id(), DeviceId::new(5));
    }

    #[test]
    fn test_set_badges_drops_expired() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let mut account = test_account();

        account.set_badges(
            now,
            vec![
                AccountBadge {
                    id: "donor".into(),
                    expiration: now + chrono::Duration::days(30),
                    visible: true,
                },
                AccountBadge {
                    id: "lapsed".into(),
                    expiration: now - chrono::Duration::days(1),
                    visible: true,
                },
            ],
        );

        assert_eq!(account.badges.len(), 1);
        assert_eq!(account.badges[0].id, "donor");
    }

    #[test]
    fn test_serde_body_omits_aci_and_staleness() {
        let account = test_account();
        account.mark_stale();

        let json = serde_json::to_string(&account).unwrap();
        assert!(!json.contains(&account.aci().as_uuid().to_string()));

        let decoded: Account = serde_json::from_str(&json).unwrap();
        assert!(decoded.aci().is_nil());
        assert!(!decoded.is_stale());
        assert_eq!(decoded.number(), account.number());
        assert_eq!(decoded.pni(), account.pni());
    }

    #[test]
    fn test_serde_tolerates_unknown_fields() {
        let account = test_account();
        let mut value: serde_json::Value = serde_json::to_value(&account).unwrap();
        value["introduced_in_a_later_release"] = serde_json::json!({"x": 1});

        let decoded: Account = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.number(), account.number());
    }

    #[test]
    fn test_start_of_utc_day() {
        let instant = Utc.with_ymd_and_hms(2024, 6, 1, 17, 45, 12).unwrap();
        let day = start_of_utc_day(instant);
        assert_eq!(day, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
    }
}
