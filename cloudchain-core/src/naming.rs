//! Naming convention for chain accounts.
//!
//! Every account identifier has the form
//! `<base><NNN>.cloudchain@<domain>`, where `NNN` is the account's 1-based
//! index zero-padded to three digits and `base` is fixed by the first
//! account of the chain.

use thiserror::Error;

/// Fixed marker between the index and the domain.
pub const REQUIRED_SUFFIX: &str = "cloudchain";

/// Number of digits in the index part.
pub const INDEX_WIDTH: usize = 3;

/// Largest index expressible in [`INDEX_WIDTH`] digits.
pub const MAX_INDEX: u32 = 999;

/// Why an identifier does not match the expected chain position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamingMismatch {
    #[error("malformed identifier {identifier:?}: {detail}")]
    MalformedPattern { identifier: String, detail: String },

    #[error("invalid base {base:?}: {detail}")]
    InvalidBase { base: String, detail: String },

    #[error("wrong base: expected {expected:?}, found {found:?}")]
    WrongBase { expected: String, found: String },

    #[error("wrong index: expected {expected:03}, found {found:03}")]
    WrongIndex { expected: u32, found: u32 },

    #[error("wrong domain: expected {expected:?}, found {found:?}")]
    WrongDomain { expected: String, found: String },
}

/// Components of a syntactically valid identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedIdentifier<'a> {
    pub base: &'a str,
    pub index: u32,
    pub domain: &'a str,
}

/// Splits an identifier into base, index and domain without checking them
/// against any chain.
pub fn parse(identifier: &str) -> Result<ParsedIdentifier<'_>, NamingMismatch> {
    let malformed = |detail: &str| NamingMismatch::MalformedPattern {
        identifier: identifier.to_string(),
        detail: detail.to_string(),
    };

    if identifier.chars().any(char::is_whitespace) {
        return Err(malformed("contains whitespace"));
    }
    let (local, domain) = identifier
        .split_once('@')
        .ok_or_else(|| malformed("missing '@'"))?;
    if domain.is_empty() || domain.contains('@') {
        return Err(malformed("domain must be a single non-empty part"));
    }

    let stem = local
        .strip_suffix(REQUIRED_SUFFIX)
        .and_then(|s| s.strip_suffix('.'))
        .ok_or_else(|| malformed("local part must end with \".cloudchain\""))?;

    let bytes = stem.as_bytes();
    if bytes.len() <= INDEX_WIDTH {
        return Err(malformed("missing base before the index"));
    }
    let split = bytes.len() - INDEX_WIDTH;
    if !bytes[split..].iter().all(u8::is_ascii_digit) {
        return Err(malformed("index must be exactly three digits"));
    }

    // The index bytes are ASCII, so `split` is a char boundary.
    let (base, digits) = stem.split_at(split);
    let index = digits
        .parse::<u32>()
        .map_err(|_| malformed("index must be exactly three digits"))?;

    Ok(ParsedIdentifier { base, index, domain })
}

/// Checks that `identifier` is exactly the account `expected_index` of the
/// chain with `expected_base` on `domain`.
pub fn validate(
    identifier: &str,
    expected_base: &str,
    expected_index: u32,
    domain: &str,
) -> Result<(), NamingMismatch> {
    let parsed = parse(identifier)?;

    if parsed.base != expected_base {
        return Err(NamingMismatch::WrongBase {
            expected: expected_base.to_string(),
            found: parsed.base.to_string(),
        });
    }
    if parsed.index != expected_index {
        return Err(NamingMismatch::WrongIndex {
            expected: expected_index,
            found: parsed.index,
        });
    }
    if parsed.domain != domain {
        return Err(NamingMismatch::WrongDomain {
            expected: domain.to_string(),
            found: parsed.domain.to_string(),
        });
    }
    Ok(())
}

/// Rejects bases that could not round-trip through an identifier or a
/// directory name.
pub fn validate_base(base: &str) -> Result<(), NamingMismatch> {
    let invalid = |detail: &str| NamingMismatch::InvalidBase {
        base: base.to_string(),
        detail: detail.to_string(),
    };

    if base.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if base.starts_with('.') {
        return Err(invalid("must not start with '.'"));
    }
    if base
        .chars()
        .any(|c| c.is_whitespace() || c == '@' || c == '/' || c == '\\')
    {
        return Err(invalid("must not contain whitespace, '@' or path separators"));
    }
    Ok(())
}

/// Builds the identifier for account `index` of a chain.
pub fn format_identifier(base: &str, index: u32, domain: &str) -> String {
    format!("{}@{domain}", account_dir_name(base, index))
}

/// Name of an account's local directory: the identifier without its domain.
pub fn account_dir_name(base: &str, index: u32) -> String {
    format!("{base}{index:0width$}.{REQUIRED_SUFFIX}", width = INDEX_WIDTH)
}

/// The part of an identifier before `@`.
pub fn local_part(identifier: &str) -> &str {
    identifier
        .split_once('@')
        .map_or(identifier, |(local, _)| local)
}
