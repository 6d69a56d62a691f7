//! User profile management: identity lookups, match stats and wallet

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::catalog::{default_catalog, CueItem, PurchaseError, Wallet, STARTER_CUES};
use super::supabase::SupabaseClient;
use super::{StoreError, UserId};

const PROFILES_TABLE: &str = "profiles";
const CUES_TABLE: &str = "cues";

/// Optimistic stat updates give up after this many lost races
const STATS_RETRIES: usize = 3;

/// User profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub user_name: String,
    pub coins: i64,
    pub total_games: i64,
    pub win_games: i64,
    /// Bit `n-1` set means cue `n` is owned
    pub cues_owned: i64,
}

impl UserProfile {
    pub fn new(user_id: UserId, user_name: impl Into<String>) -> Self {
        Self {
            user_id,
            user_name: user_name.into(),
            coins: 0,
            total_games: 0,
            win_games: 0,
            cues_owned: STARTER_CUES,
        }
    }

    pub fn with_coins(mut self, coins: i64) -> Self {
        self.coins = coins;
        self
    }

    /// Share of games won, `None` until the first game is played
    pub fn win_rate(&self) -> Option<f64> {
        if self.total_games <= 0 {
            None
        } else {
            Some(self.win_games as f64 / self.total_games as f64)
        }
    }

    pub fn wallet(&self) -> Wallet {
        Wallet {
            coins: self.coins,
            cues_owned: self.cues_owned,
        }
    }

    fn record(&mut self, won: bool) {
        self.total_games += 1;
        if won {
            self.win_games += 1;
        }
    }
}

/// User directory and persistent user record, owned outside the match core
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, user_id: UserId) -> Result<Option<UserProfile>, StoreError>;

    /// Called with every verified identity. Backends that mirror an
    /// external user directory create the profile on first sight; the
    /// default leaves registration to that directory.
    async fn ensure_profile(
        &self,
        _user_id: UserId,
        _user_name: Option<&str>,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    /// Whether `user_id` names a registered user
    async fn user_exists(&self, user_id: UserId) -> Result<bool, StoreError> {
        Ok(self.get_profile(user_id).await?.is_some())
    }

    /// Count one finished game for the user
    async fn record_result(&self, user_id: UserId, won: bool) -> Result<(), StoreError>;

    async fn list_cues(&self) -> Result<Vec<CueItem>, StoreError>;

    /// Spend coins on a cue, returning the updated wallet
    async fn purchase_cue(&self, user_id: UserId, cue_id: u8) -> Result<Wallet, PurchaseError>;
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Process-local profiles with the built-in cue catalog
pub struct MemoryProfileStore {
    profiles: DashMap<UserId, UserProfile>,
    catalog: Vec<CueItem>,
    register_on_auth: bool,
}

impl MemoryProfileStore {
    /// Store that only knows explicitly inserted users
    pub fn new() -> Self {
        Self::with_catalog(default_catalog())
    }

    /// Store that registers every verified token subject on first use.
    /// Used when no external user directory is configured.
    pub fn registering() -> Self {
        Self {
            register_on_auth: true,
            ..Self::new()
        }
    }

    pub fn with_catalog(catalog: Vec<CueItem>) -> Self {
        Self {
            profiles: DashMap::new(),
            catalog,
            register_on_auth: false,
        }
    }

    /// Register or replace a profile
    pub fn insert(&self, profile: UserProfile) {
        self.profiles.insert(profile.user_id, profile);
    }
}

impl Default for MemoryProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn ensure_profile(
        &self,
        user_id: UserId,
        user_name: Option<&str>,
    ) -> Result<(), StoreError> {
        if self.register_on_auth {
            self.profiles.entry(user_id).or_insert_with(|| {
                let name = user_name
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("player{}", user_id));
                info!(user_id = %user_id, user_name = %name, "Registered new profile");
                UserProfile::new(user_id, name)
            });
        }
        Ok(())
    }

    async fn get_profile(&self, user_id: UserId) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.profiles.get(&user_id).map(|p| p.value().clone()))
    }

    async fn record_result(&self, user_id: UserId, won: bool) -> Result<(), StoreError> {
        if let Some(mut profile) = self.profiles.get_mut(&user_id) {
            profile.record(won);
        }
        Ok(())
    }

    async fn list_cues(&self) -> Result<Vec<CueItem>, StoreError> {
        Ok(self.catalog.clone())
    }

    async fn purchase_cue(&self, user_id: UserId, cue_id: u8) -> Result<Wallet, PurchaseError> {
        let cue = self
            .catalog
            .iter()
            .find(|c| c.cue_id == cue_id)
            .ok_or(PurchaseError::UnknownCue(cue_id))?;

        // The entry guard holds the shard lock for the whole read-modify-write
        let mut profile = self
            .profiles
            .get_mut(&user_id)
            .ok_or(PurchaseError::UnknownUser(user_id))?;
        let wallet = profile.wallet().buy(cue)?;
        profile.coins = wallet.coins;
        profile.cues_owned = wallet.cues_owned;
        Ok(wallet)
    }
}

// ============================================================================
// Supabase backend
// ============================================================================

#[derive(Debug, Serialize)]
struct StatsUpdate {
    total_games: i64,
    win_games: i64,
}

/// Profiles and catalog stored in the `profiles` and `cues` tables
#[derive(Clone)]
pub struct SupabaseProfileStore {
    client: SupabaseClient,
}

impl SupabaseProfileStore {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProfileStore for SupabaseProfileStore {
    async fn get_profile(&self, user_id: UserId) -> Result<Option<UserProfile>, StoreError> {
        let query = format!("user_id=eq.{}", user_id);
        Ok(self.client.get_one(PROFILES_TABLE, &query).await?)
    }

    async fn record_result(&self, user_id: UserId, won: bool) -> Result<(), StoreError> {
        for _ in 0..STATS_RETRIES {
            let Some(mut profile) = self.get_profile(user_id).await? else {
                return Ok(());
            };
            let query = format!(
                "user_id=eq.{}&total_games=eq.{}",
                user_id, profile.total_games
            );
            profile.record(won);
            let update = StatsUpdate {
                total_games: profile.total_games,
                win_games: profile.win_games,
            };
            let rows: Vec<UserProfile> = self
                .client
                .update_returning(PROFILES_TABLE, &query, &update)
                .await?;
            if !rows.is_empty() {
                return Ok(());
            }
            warn!(user_id = %user_id, "Stats update lost a race, retrying");
        }
        Err(StoreError::Contended(PROFILES_TABLE))
    }

    async fn list_cues(&self) -> Result<Vec<CueItem>, StoreError> {
        Ok(self.client.get(CUES_TABLE, "order=cue_id.asc").await?)
    }

    async fn purchase_cue(&self, user_id: UserId, cue_id: u8) -> Result<Wallet, PurchaseError> {
        let profile = self
            .get_profile(user_id)
            .await?
            .ok_or(PurchaseError::UnknownUser(user_id))?;
        let cue: CueItem = self
            .client
            .get_one(CUES_TABLE, &format!("cue_id=eq.{}", cue_id))
            .await
            .map_err(StoreError::from)?
            .ok_or(PurchaseError::UnknownCue(cue_id))?;

        let before = profile.wallet();
        let after = before.buy(&cue)?;

        // Only applies if nobody touched the wallet since it was read
        let query = format!(
            "user_id=eq.{}&coins=eq.{}&cues_owned=eq.{}",
            user_id, before.coins, before.cues_owned
        );
        let rows: Vec<UserProfile> = self
            .client
            .update_returning(PROFILES_TABLE, &query, &after)
            .await
            .map_err(StoreError::from)?;
        if rows.is_empty() {
            return Err(StoreError::Contended(PROFILES_TABLE).into());
        }
        Ok(after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn win_rate_is_undefined_before_first_game() {
        let mut profile = UserProfile::new(1, "alice");
        assert_eq!(profile.win_rate(), None);

        profile.record(true);
        profile.record(false);
        assert_eq!(profile.total_games, 2);
        assert_eq!(profile.win_games, 1);
        assert_eq!(profile.win_rate(), Some(0.5));
    }

    #[tokio::test]
    async fn user_exists_follows_registration() {
        let store = MemoryProfileStore::new();
        assert!(!store.user_exists(1).await.unwrap());
        store.insert(UserProfile::new(1, "alice"));
        assert!(store.user_exists(1).await.unwrap());
    }

    #[tokio::test]
    async fn registering_store_creates_profile_once() {
        let store = MemoryProfileStore::registering();
        assert_ok!(store.ensure_profile(4, Some("dave")).await);
        assert_ok!(store.ensure_profile(5, None).await);

        let dave = store.get_profile(4).await.unwrap().unwrap();
        assert_eq!(dave.user_name, "dave");
        assert_eq!(dave.coins, 0);
        assert_eq!(dave.cues_owned, STARTER_CUES);
        assert_eq!(store.get_profile(5).await.unwrap().unwrap().user_name, "player5");

        // later logins keep progress
        store.record_result(4, true).await.unwrap();
        assert_ok!(store.ensure_profile(4, Some("renamed")).await);
        let dave = store.get_profile(4).await.unwrap().unwrap();
        assert_eq!(dave.user_name, "dave");
        assert_eq!(dave.total_games, 1);
    }

    #[tokio::test]
    async fn plain_store_ignores_unregistered_identities() {
        let store = MemoryProfileStore::new();
        assert_ok!(store.ensure_profile(4, Some("dave")).await);
        assert!(!store.user_exists(4).await.unwrap());
    }

    #[tokio::test]
    async fn record_result_updates_stats() {
        let store = MemoryProfileStore::new();
        store.insert(UserProfile::new(1, "alice"));
        assert_ok!(store.record_result(1, true).await);

        let profile = store.get_profile(1).await.unwrap().unwrap();
        assert_eq!(profile.total_games, 1);
        assert_eq!(profile.win_games, 1);
        assert_eq!(profile.win_rate(), Some(1.0));
    }

    #[tokio::test]
    async fn purchase_persists_wallet() {
        let store = MemoryProfileStore::new();
        store.insert(UserProfile::new(1, "alice").with_coins(600));

        let wallet = store.purchase_cue(1, 3).await.unwrap();
        assert_eq!(wallet.coins, 100);
        assert!(wallet.owns(3));

        let profile = store.get_profile(1).await.unwrap().unwrap();
        assert_eq!(profile.wallet(), wallet);

        assert!(matches!(
            store.purchase_cue(1, 3).await,
            Err(PurchaseError::AlreadyOwned(3))
        ));
    }

    #[tokio::test]
    async fn purchase_rejects_unknown_cue_and_user() {
        let store = MemoryProfileStore::new();
        store.insert(UserProfile::new(1, "alice").with_coins(600));

        assert!(matches!(
            store.purchase_cue(1, 42).await,
            Err(PurchaseError::UnknownCue(42))
        ));
        assert!(matches!(
            store.purchase_cue(9, 2).await,
            Err(PurchaseError::UnknownUser(9))
        ));
    }
}
