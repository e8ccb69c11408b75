// Cannoh Engine: Persisted bot settings
//
// Feature flags, mode, prefix, approved users and per-user prefixes.
// Stored as one pretty-printed JSON file, overwritten whole on every change.
// Authorization decisions (owner / public / private) live here too.

use crate::atoms::error::BotResult;
use crate::atoms::types::{jid_number, BotMode, Feature, FeatureFlags};
use crate::engine::config::{is_valid_prefix, BotConfig};
use log::{error, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

// ── On-disk shape ──────────────────────────────────────────────────────

/// `userPrefixes` is a list of `[jid, prefix]` pairs.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSettings {
    #[serde(default)]
    features: BTreeMap<String, bool>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    prefix: Option<String>,
    #[serde(default)]
    approved_users: Vec<String>,
    #[serde(default)]
    user_prefixes: Vec<(String, String)>,
}

// ── In-memory state ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct BotSettings {
    pub features: FeatureFlags,
    pub mode: BotMode,
    pub prefix: String,
    pub approved_users: BTreeSet<String>,
    pub user_prefixes: BTreeMap<String, String>,
}

impl BotSettings {
    pub fn from_config(config: &BotConfig) -> Self {
        BotSettings {
            features: config.features.clone(),
            mode: config.default_mode,
            prefix: config.default_prefix.clone(),
            approved_users: BTreeSet::new(),
            user_prefixes: BTreeMap::new(),
        }
    }

    fn apply(&mut self, saved: PersistedSettings) {
        self.features.merge_named(&saved.features);
        if let Some(mode) = saved.mode.as_deref().and_then(BotMode::parse) {
            self.mode = mode;
        }
        if let Some(prefix) = saved.prefix.filter(|p| is_valid_prefix(p)) {
            self.prefix = prefix;
        }
        self.approved_users = saved.approved_users.into_iter().collect();
        self.user_prefixes = saved.user_prefixes.into_iter()
            .filter(|(_, p)| is_valid_prefix(p))
            .collect();
    }

    fn to_persisted(&self) -> PersistedSettings {
        PersistedSettings {
            features: self.features.iter().map(|(f, v)| (f.name().to_string(), v)).collect(),
            mode: Some(self.mode.as_str().to_string()),
            prefix: Some(self.prefix.clone()),
            approved_users: self.approved_users.iter().cloned().collect(),
            user_prefixes: self.user_prefixes.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

// ── Store ──────────────────────────────────────────────────────────────

pub struct SettingsStore {
    path: PathBuf,
    owner_number: String,
    private_allowed_commands: Vec<String>,
    state: Mutex<BotSettings>,
    /// Held from snapshot to rename so an older snapshot never lands last.
    save_lock: Mutex<()>,
}

impl SettingsStore {
    /// Load saved settings over the configured defaults. A missing or unreadable
    /// file means defaults, which are written back immediately.
    pub fn load(config: &BotConfig) -> Self {
        let path = config.settings_path();
        let mut settings = BotSettings::from_config(config);

        let loaded = match read_settings(&path) {
            Ok(saved) => {
                settings.apply(saved);
                info!("[settings] Loaded from {}", path.display());
                info!("[settings] Current prefix: {}", settings.prefix);
                info!("[settings] Current mode: {}", settings.mode);
                true
            }
            Err(e) => {
                info!("[settings] No saved settings ({}), using defaults", e);
                false
            }
        };

        let store = SettingsStore {
            path,
            owner_number: config.owner_number().to_string(),
            private_allowed_commands: config.private_mode.allowed_commands.clone(),
            state: Mutex::new(settings),
            save_lock: Mutex::new(()),
        };
        if !loaded {
            store.persist();
        }
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the whole settings file through a temp file and a rename.
    pub fn save(&self) -> BotResult<()> {
        let _guard = self.save_lock.lock();
        let json = serde_json::to_string_pretty(&self.state.lock().to_persisted())?;
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Save, logging instead of failing.
    fn persist(&self) {
        match self.save() {
            Ok(()) => info!("[settings] Saved"),
            Err(e) => error!("[settings] Error saving {}: {}", self.path.display(), e),
        }
    }

    // ── Reads ──────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> BotSettings {
        self.state.lock().clone()
    }

    pub fn mode(&self) -> BotMode {
        self.state.lock().mode
    }

    pub fn prefix(&self) -> String {
        self.state.lock().prefix.clone()
    }

    pub fn features(&self) -> FeatureFlags {
        self.state.lock().features.clone()
    }

    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.state.lock().features.is_enabled(feature)
    }

    pub fn approved_users(&self) -> Vec<String> {
        self.state.lock().approved_users.iter().cloned().collect()
    }

    pub fn is_owner(&self, jid: &str) -> bool {
        jid_number(jid) == self.owner_number
    }

    /// Owner always; everyone in public mode; in private mode approved users,
    /// plus anyone running one of the commands open to all.
    pub fn is_user_authorized(&self, jid: &str, command: Option<&str>) -> bool {
        if self.is_owner(jid) {
            return true;
        }
        let state = self.state.lock();
        match state.mode {
            BotMode::Public => true,
            BotMode::Private => {
                if state.approved_users.contains(jid) {
                    return true;
                }
                command.is_some_and(|c| self.private_allowed_commands.iter().any(|a| a == c))
            }
        }
    }

    /// Per-user prefix if set, otherwise the global one.
    pub fn user_prefix(&self, jid: &str) -> String {
        let state = self.state.lock();
        state.user_prefixes.get(jid).cloned().unwrap_or_else(|| state.prefix.clone())
    }

    pub fn has_custom_prefix(&self, jid: &str) -> bool {
        self.state.lock().user_prefixes.contains_key(jid)
    }

    // ── Writes (each one persists) ─────────────────────────────────────

    pub fn approve_user(&self, jid: &str) {
        self.state.lock().approved_users.insert(jid.to_string());
        self.persist();
    }

    /// Returns false when the user was not approved.
    pub fn remove_user(&self, jid: &str) -> bool {
        let removed = self.state.lock().approved_users.remove(jid);
        self.persist();
        removed
    }

    pub fn set_mode(&self, mode: &str) -> bool {
        let Some(mode) = BotMode::parse(mode) else { return false };
        self.state.lock().mode = mode;
        self.persist();
        true
    }

    pub fn set_prefix(&self, prefix: &str) -> bool {
        if !is_valid_prefix(prefix) {
            return false;
        }
        self.state.lock().prefix = prefix.to_string();
        self.persist();
        true
    }

    pub fn set_user_prefix(&self, jid: &str, prefix: &str) -> bool {
        if !is_valid_prefix(prefix) {
            return false;
        }
        self.state.lock().user_prefixes.insert(jid.to_string(), prefix.to_string());
        self.persist();
        true
    }

    pub fn clear_user_prefix(&self, jid: &str) -> bool {
        let removed = self.state.lock().user_prefixes.remove(jid).is_some();
        if removed {
            self.persist();
        }
        removed
    }

    /// Flip a feature by (case-insensitive) name. `None` for unknown names.
    pub fn toggle_feature(&self, name: &str) -> Option<(Feature, bool)> {
        let feature = Feature::from_name(name)?;
        let enabled = self.state.lock().features.toggle(feature);
        self.persist();
        Some((feature, enabled))
    }

    pub fn set_feature(&self, feature: Feature, enabled: bool) {
        self.state.lock().features.set(feature, enabled);
        self.persist();
    }
}

fn read_settings(path: &Path) -> BotResult<PersistedSettings> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}
