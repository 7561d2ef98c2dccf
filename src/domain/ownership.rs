//! Record-ownership guard shared by lifecycle and billing operations.
//!
//! The identity collaborator hands us the authenticated email; resources
//! resolve their owning account email through an explicit query. This is
//! the single place where the two are compared, so a broken owner chain
//! (missing profile, missing account) always reads as "not the owner".

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("principal does not own this record")]
pub struct NotOwner;

pub fn ensure_owner(principal_email: &str, owner_email: Option<&str>) -> Result<(), NotOwner> {
    match owner_email {
        Some(owner) if owner == principal_email => Ok(()),
        _ => Err(NotOwner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_email_is_owner() {
        assert_eq!(ensure_owner("p@clinic.test", Some("p@clinic.test")), Ok(()));
    }

    #[test]
    fn mismatch_or_broken_chain_is_not_owner() {
        assert_eq!(ensure_owner("p@clinic.test", Some("other@clinic.test")), Err(NotOwner));
        assert_eq!(ensure_owner("p@clinic.test", None), Err(NotOwner));
        // exact comparison, no case folding
        assert_eq!(ensure_owner("p@clinic.test", Some("P@clinic.test")), Err(NotOwner));
    }
}
