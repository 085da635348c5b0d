// ABOUTME: Decides which mode the database server boots into from the recovery marker and operator intent.
// ABOUTME: Pure selection logic plus the single marker check and the server settings a plan implies.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// File that tells the server to replay archived WAL on boot.
pub const RECOVERY_MARKER: &str = "recovery.signal";

/// Path of the recovery marker inside a data directory.
pub fn marker_path(data_dir: &Path) -> PathBuf {
    data_dir.join(RECOVERY_MARKER)
}

/// Whether the data directory carries a recovery marker.
pub fn marker_present(data_dir: &Path) -> bool {
    marker_path(data_dir).is_file()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootMode {
    Fresh,
    Recovering,
}

/// What the server does once a point-in-time target is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Pause,
    Promote,
}

impl RecoveryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryAction::Pause => "pause",
            RecoveryAction::Promote => "promote",
        }
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    pub mode: BootMode,
    /// Point-in-time target, only set while recovering.
    pub target: Option<String>,
    /// Only set when a target is present.
    pub action: Option<RecoveryAction>,
}

impl RecoveryPlan {
    pub fn is_recovering(&self) -> bool {
        self.mode == BootMode::Recovering
    }

    /// Server `-c` settings (name, value) for this plan.
    ///
    /// A fresh boot and an unbounded replay need no extra settings; a
    /// point-in-time plan pins the target and the action taken on reaching it.
    pub fn server_settings(&self) -> Vec<(String, String)> {
        let mut settings = Vec::new();
        if let (Some(target), Some(action)) = (&self.target, self.action) {
            settings.push((
                "recovery_target_time".to_string(),
                format!("'{}'", target.replace('\'', "''")),
            ));
            settings.push((
                "recovery_target_action".to_string(),
                action.as_str().to_string(),
            ));
        }
        settings
    }
}

/// Select the boot mode.
///
/// Without a marker the server always starts fresh, whatever the operator
/// asked for. With a marker and a target the default action is `Pause`;
/// promotion requires the explicit flag.
pub fn select_recovery_mode(
    marker_present: bool,
    target: Option<&str>,
    promote: bool,
) -> RecoveryPlan {
    if !marker_present {
        return RecoveryPlan {
            mode: BootMode::Fresh,
            target: None,
            action: None,
        };
    }

    match target {
        None => RecoveryPlan {
            mode: BootMode::Recovering,
            target: None,
            action: None,
        },
        Some(target) => RecoveryPlan {
            mode: BootMode::Recovering,
            target: Some(target.to_string()),
            action: Some(if promote {
                RecoveryAction::Promote
            } else {
                RecoveryAction::Pause
            }),
        },
    }
}
