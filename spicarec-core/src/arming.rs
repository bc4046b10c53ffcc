//! Confirmation gating for destructive operations.
//!
//! Formats, image restores, wipes and conversions can only be invoked with
//! an [`ArmToken`] in hand, so the compiler enforces that every destructive
//! call site passed through an explicit confirmation. The menu shell
//! constructs the token after its confirm-key prompt; the CLI after
//! `--yes-i-know`.

use crate::errors::{RecoveryError, Result};

#[derive(Debug, Clone, Copy)]
pub struct ArmToken(());

impl ArmToken {
    pub fn try_new(confirmed: bool) -> Result<Self> {
        if !confirmed {
            return Err(RecoveryError::SafetyLock.into());
        }
        Ok(Self(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfirmed_token_is_refused() {
        let err = ArmToken::try_new(false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RecoveryError>(),
            Some(RecoveryError::SafetyLock)
        ));
    }

    #[test]
    fn confirmed_token_is_granted() {
        assert!(ArmToken::try_new(true).is_ok());
    }
}
