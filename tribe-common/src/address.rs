//! Recipient address checks.
//!
//! The queue only rejects input that can never be delivered by any provider.
//! Anything that looks like `local@domain` is accepted and left for the
//! provider to judge, so provider feedback (invalid address, bounce, ...)
//! ends up in the dead-letter store rather than at the caller.

use crate::error::AddressError;

/// Maximum length of a forward path (RFC 5321 §4.5.3.1.3, minus the brackets).
pub const MAX_ADDRESS_LEN: usize = 254;

/// Validate a recipient address.
///
/// Returns the trimmed address on success.
pub fn validate(address: &str) -> Result<&str, AddressError> {
    let address = address.trim();

    if address.is_empty() {
        return Err(AddressError::Empty);
    }

    if address.len() > MAX_ADDRESS_LEN {
        return Err(AddressError::TooLong {
            len: address.len(),
            max: MAX_ADDRESS_LEN,
        });
    }

    if address
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(AddressError::InvalidCharacter(address.to_string()));
    }

    let (Some(first), Some(last)) = (address.find('@'), address.rfind('@')) else {
        return Err(AddressError::MissingAtSign(address.to_string()));
    };

    if first == 0 {
        return Err(AddressError::MissingLocalPart(address.to_string()));
    }

    if last + 1 == address.len() {
        return Err(AddressError::MissingDomain(address.to_string()));
    }

    Ok(address)
}

/// Returns `true` if [`validate`] would accept the address.
pub fn is_valid(address: &str) -> bool {
    validate(address).is_ok()
}
