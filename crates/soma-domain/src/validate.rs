use crate::error::DomainError;

/// Validate a repository or bucket name.
///
/// Accepted: 4 to 512 bytes, leading alphabetic character, remainder
/// limited to alphanumerics, `_` and `-`.
pub fn validate_entity_name(name: &str) -> Result<(), DomainError> {
    if name.len() < 4 {
        return Err(DomainError::InvalidName(format!(
            "'{}' is shorter than 4 characters",
            name
        )));
    }
    if name.len() > 512 {
        return Err(DomainError::InvalidName(
            "name exceeds 512 characters".into(),
        ));
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => {
            return Err(DomainError::InvalidName(format!(
                "'{}' must start with a letter",
                name
            )))
        }
    }
    if let Some(bad) = chars.find(|c| !c.is_ascii_alphanumeric() && *c != '_' && *c != '-') {
        return Err(DomainError::InvalidName(format!(
            "'{}' contains illegal character '{}'",
            name, bad
        )));
    }
    Ok(())
}
