//! Tracking behaviour of queries and per-entry persistence state.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RepositoryError;

/// How a query materialises its results.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Results are registered with the session as `Unchanged` and resolved
    /// through its identity map. Edits made through `Session::tracked_mut`
    /// are written by the next save.
    TrackAll,
    /// Results are detached snapshots; every read yields fresh instances.
    NoTracking,
    /// Results are detached snapshots, but repeated reads of one id within the
    /// session yield the same instance.
    #[default]
    NoTrackingWithIdentityResolution,
}

impl TrackingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TrackAll => "track_all",
            Self::NoTracking => "no_tracking",
            Self::NoTrackingWithIdentityResolution => "no_tracking_with_identity_resolution",
        }
    }

    /// Whether results go through the session identity map.
    pub fn resolves_identity(self) -> bool {
        !matches!(self, Self::NoTracking)
    }
}

impl fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackingMode {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "track_all" => Ok(Self::TrackAll),
            "no_tracking" => Ok(Self::NoTracking),
            "no_tracking_with_identity_resolution" => Ok(Self::NoTrackingWithIdentityResolution),
            other => Err(RepositoryError::invalid_argument(format!(
                "unsupported tracking mode '{other}'"
            ))),
        }
    }
}

impl TryFrom<i32> for TrackingMode {
    type Error = RepositoryError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::TrackAll),
            1 => Ok(Self::NoTracking),
            2 => Ok(Self::NoTrackingWithIdentityResolution),
            other => Err(RepositoryError::invalid_argument(format!(
                "unsupported tracking mode {other}"
            ))),
        }
    }
}

/// Persistence state of an entity within a session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Not known to the session.
    Detached,
    /// Tracked and matching the store.
    Unchanged,
    /// Registered for insertion.
    Added,
    /// Registered for update.
    Modified,
    /// Registered for deletion.
    Deleted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_resolves_identity_without_tracking() {
        assert_eq!(
            TrackingMode::default(),
            TrackingMode::NoTrackingWithIdentityResolution
        );
        assert!(TrackingMode::default().resolves_identity());
        assert!(!TrackingMode::NoTracking.resolves_identity());
    }

    #[test]
    fn parses_known_names() {
        for mode in [
            TrackingMode::TrackAll,
            TrackingMode::NoTracking,
            TrackingMode::NoTrackingWithIdentityResolution,
        ] {
            assert_eq!(mode.as_str().parse::<TrackingMode>().unwrap(), mode);
        }
    }

    #[test]
    fn unknown_modes_are_invalid_arguments() {
        assert!(matches!(
            "track_some".parse::<TrackingMode>(),
            Err(RepositoryError::InvalidArgument(_))
        ));
        assert!(matches!(
            TrackingMode::try_from(7),
            Err(RepositoryError::InvalidArgument(_))
        ));
        assert_eq!(TrackingMode::try_from(0).unwrap(), TrackingMode::TrackAll);
    }
}
