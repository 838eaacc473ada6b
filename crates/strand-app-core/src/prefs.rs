// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Saved session preferences (tracking mode, stream scoping, undo naming).

use serde::{Deserialize, Serialize};
use strand_core::{SessionConfig, StreamMode, TrackingMode};

use crate::config::{ConfigError, ConfigService, ConfigStore};

/// Config key the session preferences are stored under.
pub const SESSION_PREFS_KEY: &str = "session";

/// Saved preferences for one host session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionPrefs {
    /// Undo entry name given to each cycle's transaction group.
    pub group_name: String,
    /// How producing nodes treat the entities of earlier cycles.
    pub tracking: TrackingMode,
    /// Scoping applied to streams opened without an explicit mode.
    pub scope: ScopePrefs,
    /// Apply held-back invalidations on idle ticks.
    pub flush_on_idle: bool,
}

impl Default for SessionPrefs {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

/// Stream scoping toggles, one per [`StreamMode`] flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScopePrefs {
    /// Active document only.
    pub current_document: bool,
    /// Entities owned by the active view only.
    pub current_view: bool,
    /// Entities in the active design option only.
    pub current_design_option: bool,
    /// Entities in the active workset only.
    pub current_workset: bool,
}

impl From<ScopePrefs> for StreamMode {
    fn from(scope: ScopePrefs) -> Self {
        let mut mode = Self::empty();
        mode.set(Self::CURRENT_DOCUMENT, scope.current_document);
        mode.set(Self::CURRENT_VIEW, scope.current_view);
        mode.set(Self::CURRENT_DESIGN_OPTION, scope.current_design_option);
        mode.set(Self::CURRENT_WORKSET, scope.current_workset);
        mode
    }
}

impl From<StreamMode> for ScopePrefs {
    fn from(mode: StreamMode) -> Self {
        Self {
            current_document: mode.contains(StreamMode::CURRENT_DOCUMENT),
            current_view: mode.contains(StreamMode::CURRENT_VIEW),
            current_design_option: mode.contains(StreamMode::CURRENT_DESIGN_OPTION),
            current_workset: mode.contains(StreamMode::CURRENT_WORKSET),
        }
    }
}

impl From<&SessionConfig> for SessionPrefs {
    fn from(config: &SessionConfig) -> Self {
        Self {
            group_name: config.group_name.clone(),
            tracking: config.tracking,
            scope: config.default_mode.into(),
            flush_on_idle: config.flush_on_idle,
        }
    }
}

impl SessionPrefs {
    /// Validates and converts into the core session settings.
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] when the group name is blank.
    pub fn to_session_config(&self) -> Result<SessionConfig, ConfigError> {
        let group_name = self.group_name.trim();
        if group_name.is_empty() {
            return Err(ConfigError::Invalid {
                key: SESSION_PREFS_KEY.to_owned(),
                reason: "transaction group name is blank".to_owned(),
            });
        }
        Ok(SessionConfig {
            group_name: group_name.to_owned(),
            default_mode: self.scope.into(),
            tracking: self.tracking,
            flush_on_idle: self.flush_on_idle,
        })
    }

    /// Loads the saved preferences, or the defaults when none were saved.
    ///
    /// # Errors
    /// Store and decoding failures.
    pub fn load<S: ConfigStore>(service: &ConfigService<S>) -> Result<Self, ConfigError> {
        service.load_or_default(SESSION_PREFS_KEY)
    }

    /// Saves these preferences.
    ///
    /// # Errors
    /// Store and encoding failures.
    pub fn save<S: ConfigStore>(&self, service: &ConfigService<S>) -> Result<(), ConfigError> {
        service.save(SESSION_PREFS_KEY, self)
    }
}
