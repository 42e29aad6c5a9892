//! Account model (one per physical store).

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::attachment::Attachment;
use crate::models::entity::EntityId;
use crate::util::normalize_text_option;

/// The loyalty account persisted in a per-account store.
///
/// Shares its id with the base [`crate::models::Entity`] row created
/// alongside it; exactly one account lives in each physical store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: EntityId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub points: i64,
    pub image: Attachment,
}

impl Account {
    /// Create a new account record.
    ///
    /// Name and email are rejected when empty, before any storage write.
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        phone: Option<String>,
    ) -> Result<Self> {
        let name = name.into().trim().to_string();
        let email = email.into().trim().to_string();

        if name.is_empty() {
            return Err(Error::Validation(
                "Account name cannot be empty".to_string(),
            ));
        }
        if email.is_empty() {
            return Err(Error::Validation(
                "Account email cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            id: EntityId::new(),
            name,
            email,
            phone: normalize_text_option(phone),
            points: 0,
            image: Attachment::empty(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::attachment::AttachmentState;

    #[test]
    fn new_account_starts_with_zero_points() {
        let account = Account::new("Dana", "dana@nsp.com", None).unwrap();
        assert_eq!(account.points, 0);
        assert_eq!(account.image.state(), AttachmentState::Empty);
    }

    #[test]
    fn validation_rejects_empty_fields() {
        assert!(Account::new("", "dana@nsp.com", None).is_err());
        assert!(Account::new("   ", "dana@nsp.com", None).is_err());
        assert!(Account::new("Dana", "", None).is_err());
    }

    #[test]
    fn phone_is_normalized() {
        let account = Account::new("Dana", "dana@nsp.com", Some("   ".to_string())).unwrap();
        assert_eq!(account.phone, None);
        let account = Account::new("Dana", "dana@nsp.com", Some(" 555-0101 ".to_string())).unwrap();
        assert_eq!(account.phone.as_deref(), Some("555-0101"));
    }
}
