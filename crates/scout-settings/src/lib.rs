//! # scout-settings
//!
//! Configuration management with layered sources for the Scout realtime client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ScoutSettings::default()`]
//! 2. **User file**: `~/.scout/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `SCOUT_*` overrides (highest priority)
//!
//! Settings are loaded once at startup and passed down explicitly; there is
//! no process-global instance.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings_with_env, settings_path};
pub use types::{LoggingSettings, ReachabilitySettings, ScoutSettings, StreamSettings};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let settings = ScoutSettings::default();
        let _policy = settings.stream.reconnect_policy();
        let _path = settings_path();
    }
}
