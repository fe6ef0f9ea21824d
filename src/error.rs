use std::fmt;

use bitcoin::Amount;

/// Why a draft could not be built.
///
/// None of these are fatal to the engine: every variant settles the
/// finalizer into an invalid state whose warning text comes from
/// [`BuildError::user_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// Spendable coins cannot cover amount plus fee at the chosen rate.
    InsufficientFunds { missing: u64 },
    /// A dynamic strategy is selected but no estimates are available yet.
    NoDynamicFeeEstimates,
    InvalidAddress(String),
    DustOutput { value: Amount, dust_limit: Amount },
    /// Any other construction failure, described by the collaborator.
    Construction(String),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InsufficientFunds { missing } => {
                write!(f, "not enough funds to cover amount and fee, {missing} sat short")
            }
            Self::NoDynamicFeeEstimates => write!(f, "dynamic fee estimates are not available yet"),
            Self::InvalidAddress(reason) => write!(f, "invalid address: {reason}"),
            Self::DustOutput { value, dust_limit } => {
                write!(f, "output value {value} is below the dust limit {dust_limit}")
            }
            Self::Construction(reason) => write!(f, "{reason}"),
        }
    }
}

impl std::error::Error for BuildError {}

impl From<bdk_coin_select::InsufficientFunds> for BuildError {
    fn from(err: bdk_coin_select::InsufficientFunds) -> Self {
        BuildError::InsufficientFunds { missing: err.missing }
    }
}

impl BuildError {
    /// The warning text published to the user for this failure.
    pub fn user_message(&self) -> String {
        match self {
            Self::InsufficientFunds { .. } => String::from("Not enough funds"),
            other => other.to_string(),
        }
    }
}
