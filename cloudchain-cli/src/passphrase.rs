use zeroize::Zeroizing;

use crate::prompt::prompt_hidden;

pub(crate) const PASSPHRASE_ENV: &str = "CLOUDCHAIN_PASSPHRASE";

fn from_env() -> Option<Zeroizing<String>> {
    std::env::var(PASSPHRASE_ENV)
        .ok()
        .filter(|p| !p.is_empty())
        .map(Zeroizing::new)
}

/// Passphrase for decrypting an existing export.
pub(crate) fn existing_passphrase() -> anyhow::Result<Zeroizing<String>> {
    if let Some(pass) = from_env() {
        return Ok(pass);
    }
    Ok(Zeroizing::new(prompt_hidden("Export passphrase: ")?))
}

/// Passphrase for a new export. Prompts twice when interactive.
pub(crate) fn new_passphrase() -> anyhow::Result<Zeroizing<String>> {
    if let Some(pass) = from_env() {
        return Ok(pass);
    }
    let first = Zeroizing::new(prompt_hidden("New export passphrase: ")?);
    let second = Zeroizing::new(prompt_hidden("Confirm passphrase: ")?);
    check_new(first, &second)
}

fn check_new(first: Zeroizing<String>, second: &str) -> anyhow::Result<Zeroizing<String>> {
    if first.is_empty() {
        anyhow::bail!("passphrase must not be empty");
    }
    if first.as_str() != second {
        anyhow::bail!("passphrases do not match");
    }
    Ok(first)
}
