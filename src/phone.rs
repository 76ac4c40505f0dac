use std::fmt;

use crate::config::PhoneConfig;
use crate::error::NotifyError;

/// Routing suffix the gateway expects on individual (non-group) chats.
pub const JID_SUFFIX: &str = "@s.whatsapp.net";

/// Digits-only, country-code-normalized phone number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalPhone(String);

impl CanonicalPhone {
    /// Strip everything but digits and prepend the default country code when
    /// the number is too short to already carry one.
    pub fn normalize(raw: &str, config: &PhoneConfig) -> Result<Self, NotifyError> {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(NotifyError::InvalidPhone(raw.to_string()));
        }

        if digits.len() < config.min_international_digits {
            Ok(Self(format!("{}{}", config.default_country_code, digits)))
        } else {
            Ok(Self(digits))
        }
    }

    pub fn digits(&self) -> &str {
        &self.0
    }

    /// Recipient identifier as the gateway routes it.
    pub fn jid(&self) -> String {
        format!("{}{}", self.0, JID_SUFFIX)
    }
}

impl fmt::Display for CanonicalPhone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
