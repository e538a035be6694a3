//! Input validation functions
//!
//! Pure checks on registration input. Each returns the reason
//! for rejection so callers can surface it verbatim.

/// Characters that satisfy the "special character" class of the password policy
pub const PASSWORD_SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";

/// Minimum password length, counted in characters
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Validate username: 3-50 characters of letters, digits, `_`, `.` or `-`
pub fn validate_username(username: &str) -> Result<(), String> {
    let len = username.chars().count();
    if len < 3 {
        return Err("Username must be at least 3 characters".to_string());
    }
    if len > 50 {
        return Err("Username must be at most 50 characters".to_string());
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err("Username may only contain letters, digits, '_', '.' and '-'".to_string());
    }
    Ok(())
}

/// Validate password strength
///
/// Requires at least 8 characters with an uppercase letter, a lowercase
/// letter, a digit and one of [`PASSWORD_SPECIAL_CHARS`].
pub fn validate_password_strength(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }
    if !password.chars().any(char::is_uppercase) {
        return Err("Password must contain an uppercase letter".to_string());
    }
    if !password.chars().any(char::is_lowercase) {
        return Err("Password must contain a lowercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain a digit".to_string());
    }
    if !password.chars().any(|c| PASSWORD_SPECIAL_CHARS.contains(c)) {
        return Err("Password must contain a special character".to_string());
    }
    Ok(())
}
