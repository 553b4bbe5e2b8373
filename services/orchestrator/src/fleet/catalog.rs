//! Game type to fleet resolution.

use std::collections::HashMap;

/// Fleet used for game types without an explicit entry.
pub const DEFAULT_FLEET: &str = "wtg-free-fleet";

/// Static lookup from game type to the fleet that serves it.
#[derive(Debug, Clone)]
pub struct FleetCatalog {
    fleets: HashMap<String, String>,
    default_fleet: String,
}

impl Default for FleetCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_FLEET)
            .with_fleet("minecraft", "agis-dev-fleet")
            .with_fleet("cs2", "wtg-premium-fleet")
            .with_fleet("terraria", "wtg-free-fleet")
            .with_fleet("gmod", "wtg-premium-fleet")
    }
}

impl FleetCatalog {
    /// An empty catalog that resolves everything to `default_fleet`.
    pub fn new(default_fleet: impl Into<String>) -> Self {
        Self {
            fleets: HashMap::new(),
            default_fleet: default_fleet.into(),
        }
    }

    pub fn with_fleet(mut self, game_type: impl Into<String>, fleet: impl Into<String>) -> Self {
        self.fleets.insert(game_type.into(), fleet.into());
        self
    }

    /// The fleet serving `game_type`, or the default fleet.
    pub fn fleet_for(&self, game_type: &str) -> &str {
        self.fleets
            .get(game_type)
            .map(String::as_str)
            .unwrap_or(&self.default_fleet)
    }

    pub fn default_fleet(&self) -> &str {
        &self.default_fleet
    }
}
