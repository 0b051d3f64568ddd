//! First-boot storage provisioning states.
//!
//! A blank device asks the user to format its encrypted store, choose a PIN,
//! confirm it, waits several minutes while formatting, then asks for the PIN
//! once more to unlock and mount the new store.  The states below follow that
//! flow.  They only ever move forward: a step that fails aborts the run
//! instead of being retried, because the guest's screen no longer matches any
//! earlier state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Position within the first-boot provisioning flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProvisioningState {
    /// The "format storage?" dialog is on screen.
    AwaitingFormatConfirm,
    /// The first PIN prompt is on screen.
    EnteringPin,
    /// A one-time "press any key" notice is on screen.
    AwaitingNotification,
    /// The PIN confirmation prompt is on screen.
    ConfirmingPin,
    /// The guest is formatting the store in the background.
    Formatting,
    /// The unlock prompt for the freshly formatted store is on screen.
    Unlocking,
    /// The store is being mounted.
    MountWait,
    /// Provisioning finished.
    Ready,
}

impl ProvisioningState {
    /// Every state in flow order.
    pub const ALL: [ProvisioningState; 8] = [
        ProvisioningState::AwaitingFormatConfirm,
        ProvisioningState::EnteringPin,
        ProvisioningState::AwaitingNotification,
        ProvisioningState::ConfirmingPin,
        ProvisioningState::Formatting,
        ProvisioningState::Unlocking,
        ProvisioningState::MountWait,
        ProvisioningState::Ready,
    ];

    /// The state that follows this one.  `Ready` is terminal and returns itself.
    pub fn next(self) -> ProvisioningState {
        match self {
            ProvisioningState::AwaitingFormatConfirm => ProvisioningState::EnteringPin,
            ProvisioningState::EnteringPin => ProvisioningState::AwaitingNotification,
            ProvisioningState::AwaitingNotification => ProvisioningState::ConfirmingPin,
            ProvisioningState::ConfirmingPin => ProvisioningState::Formatting,
            ProvisioningState::Formatting => ProvisioningState::Unlocking,
            ProvisioningState::Unlocking => ProvisioningState::MountWait,
            ProvisioningState::MountWait => ProvisioningState::Ready,
            ProvisioningState::Ready => ProvisioningState::Ready,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == ProvisioningState::Ready
    }

    /// Human-readable step name used in logs and errors.
    pub fn as_str(self) -> &'static str {
        match self {
            ProvisioningState::AwaitingFormatConfirm => "AwaitingFormatConfirm",
            ProvisioningState::EnteringPin => "EnteringPin",
            ProvisioningState::AwaitingNotification => "AwaitingNotification",
            ProvisioningState::ConfirmingPin => "ConfirmingPin",
            ProvisioningState::Formatting => "Formatting",
            ProvisioningState::Unlocking => "Unlocking",
            ProvisioningState::MountWait => "MountWait",
            ProvisioningState::Ready => "Ready",
        }
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
