use finality_core::participant::ParticipantId;

use crate::store::StoreError;

/// Why a trial operation was refused.
///
/// Precondition failures never mutate coordinator state.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialError {
    TrialsDisabled,
    UnknownParticipant(ParticipantId),
    ParticipantOffline(ParticipantId),
    NotInGroup,
    /// The group already has a pending or active run.
    AlreadyInTrial,
    GroupSize {
        size: usize,
        min: usize,
        max: usize,
    },
    LevelSpread {
        spread: u8,
        max: u8,
    },
    MemberOffline(String),
    MemberHoldsMarker(String),
    MemberPermanentlyFailed(String),
    /// A member is on the roster of another group's run.
    MemberInOtherRun(String),
    NotAwaitingConfirmation,
    AlreadyConfirmed,
    /// The participant must leave their group before a solo test run.
    AlreadyGrouped,
    /// The host could not create a group for the run.
    GroupUnavailable,
    Store(StoreError),
}

impl std::fmt::Display for TrialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TrialsDisabled => write!(f, "The Trial of Finality is currently disabled"),
            Self::UnknownParticipant(id) => write!(f, "unknown participant {id}"),
            Self::ParticipantOffline(id) => write!(f, "participant {id} is offline"),
            Self::NotInGroup => write!(f, "You must be in a group to begin the trial"),
            Self::AlreadyInTrial => write!(f, "Your group is already in the trial"),
            Self::GroupSize { size, min, max } => {
                write!(f, "Group size {size} is outside the allowed range {min}-{max}")
            },
            Self::LevelSpread { spread, max } => write!(
                f,
                "Level difference {spread} in your group exceeds the allowed {max}"
            ),
            Self::MemberOffline(name) => write!(f, "{name} is offline"),
            Self::MemberHoldsMarker(name) => {
                write!(f, "{name} already carries the Trial token")
            },
            Self::MemberPermanentlyFailed(name) => {
                write!(f, "{name} has already fallen in the Trial of Finality")
            },
            Self::MemberInOtherRun(name) => write!(f, "{name} is already in another trial"),
            Self::NotAwaitingConfirmation => write!(f, "No trial confirmation is pending for you"),
            Self::AlreadyConfirmed => write!(f, "You have already confirmed"),
            Self::AlreadyGrouped => write!(f, "Leave your group before starting a test run"),
            Self::GroupUnavailable => write!(f, "Could not create a group for the trial"),
            Self::Store(e) => write!(f, "penalty store: {e}"),
        }
    }
}

impl std::error::Error for TrialError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for TrialError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
