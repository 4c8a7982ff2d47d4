//! Fixed lexicons and markers shared by the monitors and the checks.

/// Value stored in place of a memory value preview once sensitivity is
/// flagged, and for any value under a secret key.
pub const REDACTED_MARKER: &str = "[REDACTED]";

/// Value stored in place of a masked tool argument.
pub const MASKED_PLACEHOLDER: &str = "***MASKED***";

/// Key fragments that mark a memory read as a secret access.
pub const SECRET_KEY_KEYWORDS: &[&str] = &[
    "secret",
    "password",
    "passwd",
    "token",
    "api_key",
    "apikey",
    "credential",
    "private_key",
    "ssh_key",
    "auth",
];

/// Key prefixes reserved for system state. Writes and deletes against these
/// are always sensitive.
pub const SYSTEM_KEY_PREFIXES: &[&str] = &[
    "system_", "system/", "config_", "config/", "admin_", "admin/", "policy_", "policy/",
];

/// Case-insensitive match of a memory key against the secret lexicon.
pub fn is_secret_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SECRET_KEY_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

/// Case-insensitive match of a memory key against the reserved prefixes.
pub fn is_system_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    SYSTEM_KEY_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
}
