//! User settings resolution
//!
//! Settings were historically written once per chat channel, so a single
//! `(community, user)` identity may own several stored records. This module
//! merges them into one effective view and owns the partial-update
//! operations that write them back.
//!
//! Merging is a pure fold ([`aggregate`]) over records sorted newest first:
//! every field takes the first non-empty value, and a value taken from a
//! newer record is never replaced by an older one.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::crypto::Cipher;
use crate::error::{Error, Result};
use crate::exclusion;
use crate::source::{Credential, IssueSourceFactory};
use crate::state::StoreError;

/// Logical tenant key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub community_id: String,
    pub user_id: String,
}

impl Identity {
    pub fn new(community_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            community_id: community_id.into(),
            user_id: user_id.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.community_id, self.user_id)
    }
}

/// Feature a notification channel or exclusion list applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Purpose {
    /// Repository-wide issue listings
    Issues,
    /// Issues assigned to the user
    Assign,
}

impl Purpose {
    pub const ALL: [Purpose; 2] = [Purpose::Issues, Purpose::Assign];

    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Issues => "issues",
            Purpose::Assign => "assign",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "issues" => Some(Purpose::Issues),
            "assign" => Some(Purpose::Assign),
            _ => None,
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted settings row, keyed by `(community, channel, user)`
///
/// `None` means the field was never written. When passed to
/// [`CredentialStore::save`], `None` fields leave the stored value untouched,
/// while `Some(vec![])` explicitly clears an exclusion list.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub identity: Identity,
    pub channel_id: String,
    pub encrypted_credential: Option<String>,
    pub excluded_issues: Option<Vec<String>>,
    pub excluded_assign: Option<Vec<String>>,
    /// Purpose-less list from before the issues/assign split; read-only
    pub legacy_excluded: Option<Vec<String>>,
    /// Purpose-less notification channel; read-only fallback
    pub notification_channel: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StoredRecord {
    /// A record update that touches nothing but `updated_at`
    pub fn touch(identity: &Identity, channel_id: &str) -> Self {
        Self {
            identity: identity.clone(),
            channel_id: channel_id.to_string(),
            encrypted_credential: None,
            excluded_issues: None,
            excluded_assign: None,
            legacy_excluded: None,
            notification_channel: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_credential(mut self, encrypted: impl Into<String>) -> Self {
        self.encrypted_credential = Some(encrypted.into());
        self
    }

    pub fn with_exclusions(mut self, purpose: Purpose, patterns: Vec<String>) -> Self {
        match purpose {
            Purpose::Issues => self.excluded_issues = Some(patterns),
            Purpose::Assign => self.excluded_assign = Some(patterns),
        }
        self
    }

    pub fn updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = at;
        self
    }
}

/// Merged view of all records for an identity, credential still encrypted
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedSettings {
    pub identity: Identity,
    pub encrypted_credential: Option<String>,
    pub excluded_issues: Option<Vec<String>>,
    pub excluded_assign: Option<Vec<String>>,
    pub legacy_excluded: Option<Vec<String>>,
    pub legacy_notification_channel: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl AggregatedSettings {
    /// Exclusion list for a purpose, falling back to the legacy list when
    /// no record carries a non-empty purpose list
    pub fn excluded_repos(&self, purpose: Purpose) -> Vec<String> {
        let specific = match purpose {
            Purpose::Issues => self.excluded_issues.as_ref(),
            Purpose::Assign => self.excluded_assign.as_ref(),
        };
        specific
            .or(self.legacy_excluded.as_ref())
            .cloned()
            .unwrap_or_default()
    }
}

/// Fold stored records into one view
///
/// Records are ordered by `updated_at` descending (ties by channel id) so the
/// result does not depend on the order the store returned them in. Returns
/// `None` when there are no records at all.
pub fn aggregate(mut records: Vec<StoredRecord>) -> Option<AggregatedSettings> {
    records.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.channel_id.cmp(&b.channel_id))
    });

    let mut records = records.into_iter();
    let newest = records.next()?;

    let mut merged = AggregatedSettings {
        identity: newest.identity.clone(),
        encrypted_credential: None,
        excluded_issues: None,
        excluded_assign: None,
        legacy_excluded: None,
        legacy_notification_channel: None,
        updated_at: newest.updated_at,
    };

    for record in std::iter::once(newest).chain(records) {
        fill(
            &mut merged.encrypted_credential,
            record.encrypted_credential.filter(|c| !c.is_empty()),
        );
        fill(&mut merged.excluded_issues, non_empty(record.excluded_issues));
        fill(&mut merged.excluded_assign, non_empty(record.excluded_assign));
        fill(&mut merged.legacy_excluded, non_empty(record.legacy_excluded));
        fill(
            &mut merged.legacy_notification_channel,
            record.notification_channel.filter(|c| !c.is_empty()),
        );
    }

    Some(merged)
}

fn non_empty(list: Option<Vec<String>>) -> Option<Vec<String>> {
    list.filter(|items| !items.is_empty())
}

fn fill<T>(slot: &mut Option<T>, candidate: Option<T>) {
    if slot.is_none() {
        *slot = candidate;
    }
}

/// Pick the notification channel for a purpose
///
/// A purpose-specific channel always wins; the legacy channel is only used
/// when nothing purpose-specific is set.
pub fn resolve_notification_channel(
    specific: Option<&String>,
    legacy: Option<&String>,
) -> Option<String> {
    specific
        .filter(|c| !c.is_empty())
        .or(legacy.filter(|c| !c.is_empty()))
        .cloned()
}

/// Resolved settings for an identity
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveSettings {
    pub identity: Identity,
    credential: Option<Credential>,
    excluded_issues: Vec<String>,
    excluded_assign: Vec<String>,
    notify_issues: Option<String>,
    notify_assign: Option<String>,
}

impl EffectiveSettings {
    /// Settings with no credential, exclusions or channels
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            credential: None,
            excluded_issues: Vec::new(),
            excluded_assign: Vec::new(),
            notify_issues: None,
            notify_assign: None,
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential).filter(|c| !c.is_empty());
        self
    }

    pub fn with_exclusions(mut self, purpose: Purpose, patterns: Vec<String>) -> Self {
        match purpose {
            Purpose::Issues => self.excluded_issues = patterns,
            Purpose::Assign => self.excluded_assign = patterns,
        }
        self
    }

    pub fn with_notification_channel(mut self, purpose: Purpose, channel: Option<String>) -> Self {
        match purpose {
            Purpose::Issues => self.notify_issues = channel,
            Purpose::Assign => self.notify_assign = channel,
        }
        self
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// The credential, or [`Error::CredentialNotFound`]
    pub fn require_credential(&self) -> Result<&Credential> {
        self.credential.as_ref().ok_or(Error::CredentialNotFound)
    }

    pub fn excluded_repos(&self, purpose: Purpose) -> &[String] {
        match purpose {
            Purpose::Issues => &self.excluded_issues,
            Purpose::Assign => &self.excluded_assign,
        }
    }

    pub fn notification_channel(&self, purpose: Purpose) -> Option<&str> {
        match purpose {
            Purpose::Issues => self.notify_issues.as_deref(),
            Purpose::Assign => self.notify_assign.as_deref(),
        }
    }
}

/// Persistence contract for settings records
///
/// Every write is a partial update: fields left as `None` on the record keep
/// their stored values.
pub trait CredentialStore: Send + Sync {
    /// Upsert a record by `(community, channel, user)`
    fn save(&self, record: &StoredRecord) -> std::result::Result<(), StoreError>;

    /// All records for the identity, across channels
    fn find_all_for_identity(
        &self,
        identity: &Identity,
    ) -> std::result::Result<Vec<StoredRecord>, StoreError>;

    /// Route `purposes` to `target_channel` and upsert `record`, atomically
    fn save_notification_channel(
        &self,
        record: &StoredRecord,
        purposes: &[Purpose],
        target_channel: &str,
    ) -> std::result::Result<(), StoreError>;

    fn get_notification_channels(
        &self,
        identity: &Identity,
    ) -> std::result::Result<HashMap<Purpose, String>, StoreError>;

    /// Remove purpose-specific channels and the legacy channel
    fn clear_notification_channels(&self, identity: &Identity)
        -> std::result::Result<(), StoreError>;
}

/// Reads and writes user settings on top of a store and a cipher
#[derive(Clone)]
pub struct SettingsResolver {
    store: Arc<dyn CredentialStore>,
    cipher: Arc<dyn Cipher>,
}

impl SettingsResolver {
    pub fn new(store: Arc<dyn CredentialStore>, cipher: Arc<dyn Cipher>) -> Self {
        Self { store, cipher }
    }

    /// Load and fold all records for the identity
    pub fn load(&self, identity: &Identity) -> Result<Option<AggregatedSettings>> {
        let records = self.store.find_all_for_identity(identity)?;
        debug!("Found {} settings records for {}", records.len(), identity);
        Ok(aggregate(records))
    }

    /// Resolve effective settings; `None` when the identity was never configured
    pub fn resolve(&self, identity: &Identity) -> Result<Option<EffectiveSettings>> {
        let Some(aggregated) = self.load(identity)? else {
            return Ok(None);
        };

        let channels = self.store.get_notification_channels(identity)?;
        let legacy = aggregated.legacy_notification_channel.as_ref();

        let mut settings = EffectiveSettings::new(identity.clone());
        for purpose in Purpose::ALL {
            settings = settings
                .with_exclusions(purpose, aggregated.excluded_repos(purpose))
                .with_notification_channel(
                    purpose,
                    resolve_notification_channel(channels.get(&purpose), legacy),
                );
        }

        if let Some(credential) = self.decrypt_credential(&aggregated) {
            settings = settings.with_credential(credential);
        }

        Ok(Some(settings))
    }

    /// Resolve settings that must carry a usable credential
    pub fn resolve_with_credential(&self, identity: &Identity) -> Result<EffectiveSettings> {
        let settings = self.resolve(identity)?.ok_or(Error::CredentialNotFound)?;
        settings.require_credential()?;
        Ok(settings)
    }

    fn decrypt_credential(&self, aggregated: &AggregatedSettings) -> Option<Credential> {
        let encrypted = aggregated.encrypted_credential.as_deref()?;
        match self.cipher.decrypt(encrypted) {
            Ok(token) => Some(Credential::new(token)),
            Err(e) => {
                warn!(
                    "Stored credential for {} could not be decrypted: {}",
                    aggregated.identity, e
                );
                None
            }
        }
    }

    /// Exclusion list for a purpose; empty when nothing is configured
    pub fn excluded_repositories(&self, identity: &Identity, purpose: Purpose) -> Result<Vec<String>> {
        Ok(self
            .load(identity)?
            .map(|aggregated| aggregated.excluded_repos(purpose))
            .unwrap_or_default())
    }

    /// Active notification channel for a purpose
    pub fn notification_channel(&self, identity: &Identity, purpose: Purpose) -> Result<Option<String>> {
        Ok(self
            .resolve(identity)?
            .and_then(|settings| settings.notification_channel(purpose).map(str::to_string)))
    }

    /// Validate a token against the issue source, then store it encrypted
    pub async fn register_credential(
        &self,
        identity: &Identity,
        channel_id: &str,
        token: &str,
        sources: &dyn IssueSourceFactory,
    ) -> Result<()> {
        let credential = Credential::new(token.trim());
        if credential.is_empty() {
            return Err(Error::CredentialNotFound);
        }

        let source = sources.connect(&credential)?;
        source.validate_credential().await?;

        self.save_credential(identity, channel_id, credential.expose())
    }

    /// Encrypt and store a token without validating it
    pub fn save_credential(&self, identity: &Identity, channel_id: &str, token: &str) -> Result<()> {
        let encrypted = self.cipher.encrypt(token)?;
        self.store
            .save(&StoredRecord::touch(identity, channel_id).with_credential(encrypted))?;

        info!("Saved credential for {} in channel {}", identity, channel_id);
        Ok(())
    }

    /// Replace the exclusion list for a purpose
    ///
    /// The whole batch is validated before anything is written. An empty
    /// batch clears the list. Returns the stored (trimmed) patterns.
    pub fn save_exclusions<S: AsRef<str>>(
        &self,
        identity: &Identity,
        channel_id: &str,
        purpose: Purpose,
        patterns: &[S],
    ) -> Result<Vec<String>> {
        let accepted = exclusion::validate_patterns(patterns)?;

        self.store.save(
            &StoredRecord::touch(identity, channel_id).with_exclusions(purpose, accepted.clone()),
        )?;

        if accepted.is_empty() {
            info!("Cleared {} exclusions for {}", purpose, identity);
        } else {
            info!(
                "Saved {} {} exclusions for {}",
                accepted.len(),
                purpose,
                identity
            );
        }
        Ok(accepted)
    }

    /// Route notifications for one purpose to `target_channel`
    pub fn save_notification_channel(
        &self,
        identity: &Identity,
        channel_id: &str,
        purpose: Purpose,
        target_channel: &str,
    ) -> Result<()> {
        self.store.save_notification_channel(
            &StoredRecord::touch(identity, channel_id),
            &[purpose],
            target_channel,
        )?;

        info!(
            "Routed {} notifications for {} to {}",
            purpose, identity, target_channel
        );
        Ok(())
    }

    /// Route notifications for every purpose to `target_channel`
    pub fn save_notification_channel_all(
        &self,
        identity: &Identity,
        channel_id: &str,
        target_channel: &str,
    ) -> Result<()> {
        self.store.save_notification_channel(
            &StoredRecord::touch(identity, channel_id),
            &Purpose::ALL,
            target_channel,
        )?;

        info!("Routed all notifications for {} to {}", identity, target_channel);
        Ok(())
    }

    pub fn clear_notification_channels(&self, identity: &Identity) -> Result<()> {
        self.store.clear_notification_channels(identity)?;
        info!("Cleared notification channels for {}", identity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::TokenCipher;
    use crate::source::{GatewayError, IssueSource, MockIssueSource, SourceStatus};
    use crate::state::SqliteCredentialStore;
    use assert_matches::assert_matches;
    use chrono::Duration;

    fn identity() -> Identity {
        Identity::new("guild-1", "user-1")
    }

    fn at(minutes_ago: i64) -> DateTime<Utc> {
        Utc::now() - Duration::minutes(minutes_ago)
    }

    fn record(channel: &str, minutes_ago: i64) -> StoredRecord {
        StoredRecord::touch(&identity(), channel).updated_at(at(minutes_ago))
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn resolver() -> (SettingsResolver, Arc<SqliteCredentialStore>, Arc<TokenCipher>) {
        let store = Arc::new(SqliteCredentialStore::open_in_memory().unwrap());
        let cipher = Arc::new(TokenCipher::from_secret("test-secret").unwrap());
        (
            SettingsResolver::new(store.clone(), cipher.clone()),
            store,
            cipher,
        )
    }

    struct FixedSource(Arc<MockIssueSource>);

    impl IssueSourceFactory for FixedSource {
        fn connect(
            &self,
            _credential: &Credential,
        ) -> std::result::Result<Arc<dyn IssueSource>, GatewayError> {
            let source: Arc<dyn IssueSource> = self.0.clone();
            Ok(source)
        }
    }

    #[test]
    fn test_aggregate_empty() {
        assert!(aggregate(Vec::new()).is_none());
    }

    #[test]
    fn test_aggregate_first_non_empty_credential_wins() {
        let newer = record("c1", 1).with_credential("");
        let older = record("c2", 10).with_credential("sealed-old");

        let merged = aggregate(vec![newer, older]).unwrap();
        assert_eq!(merged.encrypted_credential.as_deref(), Some("sealed-old"));
    }

    #[test]
    fn test_aggregate_newer_value_is_never_overwritten() {
        let newer = record("c1", 1).with_credential("sealed-new");
        let older = record("c2", 10).with_credential("sealed-old");

        let merged = aggregate(vec![older, newer]).unwrap();
        assert_eq!(merged.encrypted_credential.as_deref(), Some("sealed-new"));
    }

    #[test]
    fn test_aggregate_is_order_independent() {
        let a = record("c1", 5)
            .with_credential("sealed-a")
            .with_exclusions(Purpose::Issues, strings(&["acme/*"]));
        let b = record("c2", 5).with_exclusions(Purpose::Assign, strings(&["tempuser"]));
        let c = record("c3", 20).with_credential("sealed-c");

        let forward = aggregate(vec![a.clone(), b.clone(), c.clone()]).unwrap();
        let backward = aggregate(vec![c, b, a]).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward.encrypted_credential.as_deref(), Some("sealed-a"));
    }

    #[test]
    fn test_aggregate_empty_list_falls_through_to_older_list() {
        let cleared = record("c1", 1).with_exclusions(Purpose::Issues, Vec::new());
        let older = record("c2", 10).with_exclusions(Purpose::Issues, strings(&["acme/*"]));

        let merged = aggregate(vec![cleared, older]).unwrap();
        assert_eq!(merged.excluded_repos(Purpose::Issues), strings(&["acme/*"]));
    }

    #[test]
    fn test_empty_purpose_list_falls_back_to_legacy() {
        let mut legacy = record("c1", 10);
        legacy.legacy_excluded = Some(strings(&["old/*"]));
        let cleared = record("c2", 1).with_exclusions(Purpose::Assign, Vec::new());

        let merged = aggregate(vec![legacy, cleared]).unwrap();
        assert_eq!(merged.excluded_repos(Purpose::Assign), strings(&["old/*"]));
    }

    #[test]
    fn test_aggregate_absent_list_falls_through_to_older_record() {
        let newer = record("c1", 1).with_credential("sealed");
        let older = record("c2", 10).with_exclusions(Purpose::Assign, strings(&["acme/widgets"]));

        let merged = aggregate(vec![newer, older]).unwrap();
        assert_eq!(merged.excluded_repos(Purpose::Assign), strings(&["acme/widgets"]));
        assert!(merged.excluded_repos(Purpose::Issues).is_empty());
    }

    #[test]
    fn test_legacy_exclusions_used_only_when_purpose_list_absent() {
        let mut legacy = record("c1", 5);
        legacy.legacy_excluded = Some(strings(&["old/*"]));
        let specific = record("c2", 10).with_exclusions(Purpose::Issues, strings(&["new/*"]));

        let merged = aggregate(vec![legacy, specific]).unwrap();
        assert_eq!(merged.excluded_repos(Purpose::Issues), strings(&["new/*"]));
        assert_eq!(merged.excluded_repos(Purpose::Assign), strings(&["old/*"]));
    }

    #[test]
    fn test_notification_channel_resolution() {
        let legacy = "legacy".to_string();
        let specific = "issues-channel".to_string();

        assert_eq!(
            resolve_notification_channel(None, Some(&legacy)),
            Some("legacy".to_string())
        );
        assert_eq!(
            resolve_notification_channel(Some(&specific), Some(&legacy)),
            Some("issues-channel".to_string())
        );
        assert_eq!(resolve_notification_channel(None, None), None);
    }

    #[test]
    fn test_purpose_parse() {
        assert_eq!(Purpose::parse("issues"), Some(Purpose::Issues));
        assert_eq!(Purpose::parse("assign"), Some(Purpose::Assign));
        assert_eq!(Purpose::parse("all"), None);
        assert_eq!(Purpose::Assign.to_string(), "assign");
    }

    #[test]
    fn test_resolve_not_configured() {
        let (resolver, _, _) = resolver();

        assert!(resolver.resolve(&identity()).unwrap().is_none());
        assert_matches!(
            resolver.resolve_with_credential(&identity()),
            Err(Error::CredentialNotFound)
        );
        assert!(resolver
            .excluded_repositories(&identity(), Purpose::Issues)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_save_and_resolve_credential() {
        let (resolver, _, _) = resolver();

        resolver
            .save_credential(&identity(), "chan-a", "ghp_token")
            .unwrap();

        let settings = resolver.resolve_with_credential(&identity()).unwrap();
        assert_eq!(settings.credential().unwrap().expose(), "ghp_token");
    }

    #[test]
    fn test_undecryptable_credential_is_not_found() {
        let (resolver, store, _) = resolver();

        store
            .save(&StoredRecord::touch(&identity(), "chan-a").with_credential("garbage"))
            .unwrap();

        let settings = resolver.resolve(&identity()).unwrap().unwrap();
        assert!(settings.credential().is_none());
        assert_matches!(
            resolver.resolve_with_credential(&identity()),
            Err(Error::CredentialNotFound)
        );
    }

    #[test]
    fn test_credential_from_older_channel_record() {
        let (resolver, store, cipher) = resolver();

        let sealed = cipher.encrypt("ghp_old").unwrap();
        store
            .save(&record("chan-old", 60).with_credential(sealed))
            .unwrap();
        store
            .save(&record("chan-new", 1).with_exclusions(Purpose::Issues, strings(&["acme/*"])))
            .unwrap();

        let settings = resolver.resolve_with_credential(&identity()).unwrap();
        assert_eq!(settings.credential().unwrap().expose(), "ghp_old");
        assert_eq!(settings.excluded_repos(Purpose::Issues), &strings(&["acme/*"])[..]);
    }

    #[test]
    fn test_save_exclusions_preserves_credential() {
        let (resolver, _, _) = resolver();

        resolver
            .save_credential(&identity(), "chan-a", "ghp_token")
            .unwrap();
        resolver
            .save_exclusions(&identity(), "chan-a", Purpose::Issues, &["acme/*", " tempuser "])
            .unwrap();

        let settings = resolver.resolve_with_credential(&identity()).unwrap();
        assert_eq!(settings.credential().unwrap().expose(), "ghp_token");
        assert_eq!(
            settings.excluded_repos(Purpose::Issues),
            &strings(&["acme/*", "tempuser"])[..]
        );
        assert!(settings.excluded_repos(Purpose::Assign).is_empty());
    }

    #[test]
    fn test_save_exclusions_empty_clears() {
        let (resolver, _, _) = resolver();

        resolver
            .save_exclusions(&identity(), "chan-a", Purpose::Assign, &["acme/*"])
            .unwrap();
        resolver
            .save_exclusions::<&str>(&identity(), "chan-a", Purpose::Assign, &[])
            .unwrap();

        assert!(resolver
            .excluded_repositories(&identity(), Purpose::Assign)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_cleared_list_in_one_channel_keeps_other_channel_list() {
        let (resolver, _, _) = resolver();

        resolver
            .save_exclusions(&identity(), "chan-b", Purpose::Issues, &["acme/*"])
            .unwrap();
        resolver
            .save_exclusions::<&str>(&identity(), "chan-a", Purpose::Issues, &[])
            .unwrap();

        assert_eq!(
            resolver
                .excluded_repositories(&identity(), Purpose::Issues)
                .unwrap(),
            strings(&["acme/*"])
        );
    }

    #[test]
    fn test_save_exclusions_rejects_batch_atomically() {
        let (resolver, store, _) = resolver();

        resolver
            .save_exclusions(&identity(), "chan-a", Purpose::Issues, &["keep/*"])
            .unwrap();

        let err = resolver
            .save_exclusions(&identity(), "chan-a", Purpose::Issues, &["acme/*", "bad one"])
            .unwrap_err();
        assert_matches!(err, Error::InvalidExclusionPattern(_));

        let records = store.find_all_for_identity(&identity()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].excluded_issues, Some(strings(&["keep/*"])));
    }

    #[test]
    fn test_notification_channel_routing() {
        let (resolver, store, _) = resolver();

        let mut legacy = record("chan-a", 30);
        legacy.notification_channel = Some("legacy-chan".to_string());
        store.save(&legacy).unwrap();

        assert_eq!(
            resolver
                .notification_channel(&identity(), Purpose::Issues)
                .unwrap()
                .as_deref(),
            Some("legacy-chan")
        );

        resolver
            .save_notification_channel(&identity(), "chan-a", Purpose::Issues, "issues-chan")
            .unwrap();

        let settings = resolver.resolve(&identity()).unwrap().unwrap();
        assert_eq!(settings.notification_channel(Purpose::Issues), Some("issues-chan"));
        assert_eq!(settings.notification_channel(Purpose::Assign), Some("legacy-chan"));
    }

    #[test]
    fn test_clear_notification_channels_does_not_resurrect_legacy() {
        let (resolver, store, _) = resolver();

        let mut legacy = record("chan-a", 30);
        legacy.notification_channel = Some("legacy-chan".to_string());
        store.save(&legacy).unwrap();
        resolver
            .save_notification_channel_all(&identity(), "chan-a", "all-chan")
            .unwrap();

        resolver.clear_notification_channels(&identity()).unwrap();

        let settings = resolver.resolve(&identity()).unwrap().unwrap();
        assert_eq!(settings.notification_channel(Purpose::Issues), None);
        assert_eq!(settings.notification_channel(Purpose::Assign), None);
    }

    #[tokio::test]
    async fn test_register_credential_validates_first() {
        let (resolver, _, _) = resolver();

        let mut source = MockIssueSource::new();
        source
            .expect_validate_credential()
            .times(1)
            .returning(|| Err(GatewayError::status(SourceStatus::Unauthorized, None)));
        let factory = FixedSource(Arc::new(source));

        let err = resolver
            .register_credential(&identity(), "chan-a", "ghp_bad", &factory)
            .await
            .unwrap_err();
        assert_matches!(
            err,
            Error::Gateway(GatewayError::Status {
                status: SourceStatus::Unauthorized,
                ..
            })
        );
        assert!(resolver.resolve(&identity()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_credential_saves_on_success() {
        let (resolver, _, _) = resolver();

        let mut source = MockIssueSource::new();
        source.expect_validate_credential().times(1).returning(|| Ok(()));
        let factory = FixedSource(Arc::new(source));

        resolver
            .register_credential(&identity(), "chan-a", "  ghp_good  ", &factory)
            .await
            .unwrap();

        let settings = resolver.resolve_with_credential(&identity()).unwrap();
        assert_eq!(settings.credential().unwrap().expose(), "ghp_good");
    }

    struct FailingStore;

    impl CredentialStore for FailingStore {
        fn save(&self, _: &StoredRecord) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        fn find_all_for_identity(
            &self,
            _: &Identity,
        ) -> std::result::Result<Vec<StoredRecord>, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        fn save_notification_channel(
            &self,
            _: &StoredRecord,
            _: &[Purpose],
            _: &str,
        ) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        fn get_notification_channels(
            &self,
            _: &Identity,
        ) -> std::result::Result<HashMap<Purpose, String>, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        fn clear_notification_channels(&self, _: &Identity) -> std::result::Result<(), StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    #[test]
    fn test_store_failure_propagates() {
        let cipher = Arc::new(TokenCipher::from_secret("test-secret").unwrap());
        let resolver = SettingsResolver::new(Arc::new(FailingStore), cipher);

        assert_matches!(resolver.resolve(&identity()), Err(Error::Store(_)));
        assert_matches!(
            resolver.save_credential(&identity(), "chan", "tok"),
            Err(Error::Store(_))
        );
    }
}
