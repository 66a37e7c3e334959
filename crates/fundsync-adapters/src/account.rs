use std::fmt;

use mail_parser::MessageParser;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmailError {
    #[error("email is empty")]
    Empty,
    #[error("not a mail address: {0}")]
    Invalid(String),
}

/// A fundraiser's platform account, identified by its email address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmailAccount {
    address: String,
}

impl EmailAccount {
    /// Accepts bare addresses as well as `Name <addr>` forms. The address is
    /// lowercased since the platform treats account emails case-insensitively.
    pub fn parse(raw: &str) -> Result<Self, EmailError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(EmailError::Empty);
        }
        if raw.contains(['\r', '\n']) {
            return Err(EmailError::Invalid(raw.to_string()));
        }

        let header = format!("From: {raw}\r\n\r\n");
        let message = MessageParser::default()
            .parse(header.as_bytes())
            .ok_or_else(|| EmailError::Invalid(raw.to_string()))?;
        let address = message
            .from()
            .and_then(|addrs| addrs.first())
            .and_then(|addr| addr.address())
            .map(str::trim)
            .filter(|addr| is_plausible_address(addr))
            .ok_or_else(|| EmailError::Invalid(raw.to_string()))?;

        Ok(Self {
            address: address.to_ascii_lowercase(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl fmt::Display for EmailAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

fn is_plausible_address(addr: &str) -> bool {
    match addr.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !addr.contains(char::is_whitespace)
        }
        None => false,
    }
}
