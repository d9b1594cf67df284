//! Recipient addressing.
//!
//! A JID is `user@server` or `user:device@server`. Callers usually hand us a
//! bare phone number, which becomes a direct-chat JID on
//! [`DEFAULT_USER_SERVER`].

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
pub const GROUP_SERVER: &str = "g.us";
pub const BROADCAST_SERVER: &str = "broadcast";

const MIN_PHONE_DIGITS: usize = 5;
const MAX_PHONE_DIGITS: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Jid {
    pub user: String,
    pub device: u16,
    pub server: String,
}

/// The parts of a JID, as logged for incoming messages.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UserInfo {
    pub user: String,
    pub server: String,
    pub device: Option<u16>,
}

impl Jid {
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            device: 0,
            server: server.into(),
        }
    }

    /// Direct-chat JID for a phone number.
    pub fn user(phone: impl Into<String>) -> Self {
        Self::new(phone, DEFAULT_USER_SERVER)
    }

    pub fn is_group(&self) -> bool {
        self.server == GROUP_SERVER
    }

    pub fn is_broadcast(&self) -> bool {
        self.server == BROADCAST_SERVER
    }

    pub fn user_info(&self) -> UserInfo {
        UserInfo {
            user: self.user.clone(),
            server: self.server.clone(),
            device: (self.device > 0).then_some(self.device),
        }
    }
}

impl FromStr for Jid {
    type Err = JidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user, server) = s.split_once('@').ok_or(JidParseError)?;
        if server.is_empty() || server.contains('@') || server.contains(char::is_whitespace) {
            return Err(JidParseError);
        }
        let (user, device) = match user.split_once(':') {
            Some((user, device)) => (user, device.parse().map_err(|_| JidParseError)?),
            None => (user, 0),
        };
        if user.is_empty() || user.contains(char::is_whitespace) {
            return Err(JidParseError);
        }
        Ok(Self {
            user: user.to_string(),
            device,
            server: server.to_string(),
        })
    }
}

#[derive(Debug)]
pub struct JidParseError;

impl fmt::Display for JidParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid JID format")
    }
}

impl std::error::Error for JidParseError {}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.device > 0 {
            write!(f, "{}:{}@{}", self.user, self.device, self.server)
        } else {
            write!(f, "{}@{}", self.user, self.server)
        }
    }
}

impl serde::Serialize for Jid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Append the direct-chat server to a bare identifier. Anything already
/// containing `@` is returned unchanged (apart from trimming).
pub fn normalize_recipient(recipient: &str) -> String {
    let recipient = recipient.trim();
    if recipient.contains('@') {
        recipient.to_string()
    } else {
        format!("{recipient}@{DEFAULT_USER_SERVER}")
    }
}

/// Validate a caller-supplied recipient and turn it into a [`Jid`].
///
/// Bare numbers may carry a leading `+` and the usual visual separators.
pub fn parse_recipient(recipient: &str) -> Result<Jid, Error> {
    let recipient = recipient.trim();
    if recipient.contains('@') {
        return recipient
            .parse()
            .map_err(|_| Error::invalid(format!("Invalid recipient: {recipient}")));
    }

    let digits: String = recipient
        .strip_prefix('+')
        .unwrap_or(recipient)
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    let valid = (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits.len())
        && digits.bytes().all(|b| b.is_ascii_digit());
    if !valid {
        return Err(Error::invalid(format!(
            "Invalid recipient: {recipient} (expected a phone number with country code)"
        )));
    }
    Ok(Jid::user(digits))
}

/// True when `value` looks like a phone number `parse_recipient` would accept.
pub fn is_phone_like(value: &str) -> bool {
    !value.contains('@') && parse_recipient(value).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_appends_default_server_once() {
        assert_eq!(
            normalize_recipient("15551234567"),
            "15551234567@s.whatsapp.net"
        );
        let once = normalize_recipient("15551234567");
        assert_eq!(normalize_recipient(&once), once);
    }

    #[test]
    fn normalize_leaves_qualified_ids_alone() {
        assert_eq!(
            normalize_recipient("120363025246125486@g.us"),
            "120363025246125486@g.us"
        );
    }

    #[test]
    fn parse_strips_plus_and_separators() {
        let jid = parse_recipient("+1 (555) 123-4567").unwrap();
        assert_eq!(jid.to_string(), "15551234567@s.whatsapp.net");
    }

    #[test]
    fn parse_rejects_non_numbers() {
        for bad in ["", "abc", "1234", "12345678901234567890123", "555-CALL-NOW"] {
            assert!(
                matches!(parse_recipient(bad), Err(Error::InvalidRequest(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn parse_accepts_group_and_device_jids() {
        let group = parse_recipient("120363025246125486@g.us").unwrap();
        assert!(group.is_group());

        let device: Jid = "15551234567:12@s.whatsapp.net".parse().unwrap();
        assert_eq!(device.device, 12);
        assert_eq!(device.to_string(), "15551234567:12@s.whatsapp.net");
        assert_eq!(
            device.user_info(),
            UserInfo {
                user: "15551234567".into(),
                server: "s.whatsapp.net".into(),
                device: Some(12),
            }
        );
    }

    #[test]
    fn from_str_rejects_malformed() {
        for bad in ["@s.whatsapp.net", "user@", "a@b@c", "user:x@s.whatsapp.net", "no-at-sign"] {
            assert!(bad.parse::<Jid>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn phone_like_detection() {
        assert!(is_phone_like("15551234567"));
        assert!(!is_phone_like("Phone Number"));
        assert!(!is_phone_like("15551234567@s.whatsapp.net"));
    }
}
