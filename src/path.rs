//! Path and command preprocessing performed upstream of the core.
//!
//! These are pure functions invoked by the transport layer *before* input
//! reaches the session façade (spec §6). They are described here, and kept in
//! this crate, because the core's correctness (symbol path handling,
//! rejecting unsafe input before it ever reaches the adapter) depends on
//! them running first — but they do not touch any session state.

use crate::error::CoreError;

/// Translate a WSL-style path (`/mnt/<drive>/...`) into Windows form
/// (`<Drive>:\...`). Paths that don't match the WSL mount convention are
/// returned unchanged.
#[must_use]
pub fn translate_wsl_path(input: &str) -> String {
    let Some(rest) = input.strip_prefix("/mnt/") else {
        return input.to_string();
    };
    let mut chars = rest.chars();
    let Some(drive) = chars.next() else {
        return input.to_string();
    };
    if !drive.is_ascii_alphabetic() {
        return input.to_string();
    }
    let remainder = chars.as_str();
    let remainder = remainder.strip_prefix('/').unwrap_or(remainder);
    let windows_tail = remainder.replace('/', "\\");
    if windows_tail.is_empty() {
        format!("{}:\\", drive.to_ascii_uppercase())
    } else {
        format!("{}:\\{}", drive.to_ascii_uppercase(), windows_tail)
    }
}

/// Returns true if `token` looks like a UNC path (`\\server\share`) or a URL
/// scheme (`http://`, `https://`, `srv*`), both of which are skipped by
/// directory-creation preprocessing and left for CDB itself to interpret.
#[must_use]
pub fn is_unc_or_url(token: &str) -> bool {
    token.starts_with("\\\\")
        || token.contains("://")
        || token.to_ascii_lowercase().starts_with("srv*")
        || token.to_ascii_lowercase().starts_with("symsrv*")
}

/// Reject inputs containing path-traversal segments (`..`) or bare UNC roots,
/// which must never be accepted as a local directory argument for
/// `.srcpath`/`.sympath`/`.symfix`.
pub fn reject_unsafe_path(path: &str) -> Result<(), CoreError> {
    if path.split(['/', '\\']).any(|seg| seg == "..") {
        return Err(CoreError::InvalidInput(format!(
            "path traversal rejected: {path}"
        )));
    }
    if path.starts_with("\\\\") {
        return Err(CoreError::InvalidInput(format!(
            "UNC path rejected: {path}"
        )));
    }
    Ok(())
}

/// Split a `.srcpath`/`.sympath`/`.symfix`-style argument on `;` and return
/// the local directory tokens that should be created if absent (UNC and
/// URL-schemed tokens are skipped, per spec §6).
#[must_use]
pub fn local_directory_tokens(arg: &str) -> Vec<String> {
    arg.split(';')
        .map(str::trim)
        .filter(|tok| !tok.is_empty() && !is_unc_or_url(tok))
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_wsl_mount_path() {
        assert_eq!(
            translate_wsl_path("/mnt/c/Users/dev/dump.dmp"),
            "C:\\Users\\dev\\dump.dmp"
        );
        assert_eq!(translate_wsl_path("/mnt/d/"), "D:\\");
    }

    #[test]
    fn leaves_non_wsl_paths_unchanged() {
        assert_eq!(translate_wsl_path("C:\\already\\windows"), "C:\\already\\windows");
        assert_eq!(translate_wsl_path("/home/dev/dump.dmp"), "/home/dev/dump.dmp");
    }

    #[test]
    fn detects_unc_and_url_tokens() {
        assert!(is_unc_or_url("\\\\server\\share"));
        assert!(is_unc_or_url("https://symbols.example.com"));
        assert!(is_unc_or_url("srv*c:\\symcache*https://msdl"));
        assert!(!is_unc_or_url("C:\\local\\symbols"));
    }

    #[test]
    fn rejects_traversal_and_unc_roots() {
        assert!(reject_unsafe_path("C:\\dumps\\..\\..\\windows").is_err());
        assert!(reject_unsafe_path("\\\\evil\\share").is_err());
        assert!(reject_unsafe_path("C:\\dumps\\safe").is_ok());
    }

    #[test]
    fn local_directory_tokens_skip_unc_and_url() {
        let tokens = local_directory_tokens("C:\\local1;\\\\server\\share;srv*c:\\cache*https://msdl;C:\\local2");
        assert_eq!(tokens, vec!["C:\\local1".to_string(), "C:\\local2".to_string()]);
    }
}
