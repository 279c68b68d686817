//! Who and where we are: home directory, user name, host name, and `~`
//! expansion.

use std::path::{Path, PathBuf};

/// Home directory of the current user: `$HOME`, falling back to the
/// password database.
pub fn home_dir() -> Option<PathBuf> {
    if let Some(home) = std::env::var_os("HOME").filter(|h| !h.is_empty()) {
        return Some(PathBuf::from(home));
    }
    passwd_home_for_uid()
}

#[cfg(unix)]
fn passwd_home_for_uid() -> Option<PathBuf> {
    use nix::unistd::{getuid, User};
    User::from_uid(getuid()).ok().flatten().map(|u| u.dir)
}

#[cfg(not(unix))]
fn passwd_home_for_uid() -> Option<PathBuf> {
    None
}

#[cfg(unix)]
fn passwd_home_for_name(name: &str) -> Option<PathBuf> {
    nix::unistd::User::from_name(name).ok().flatten().map(|u| u.dir)
}

#[cfg(not(unix))]
fn passwd_home_for_name(_name: &str) -> Option<PathBuf> {
    None
}

/// Login name of the current user
pub fn current_user() -> Option<String> {
    if let Some(user) = std::env::var("USER").ok().filter(|u| !u.is_empty()) {
        return Some(user);
    }
    passwd_user_name()
}

#[cfg(unix)]
fn passwd_user_name() -> Option<String> {
    use nix::unistd::{getuid, User};
    User::from_uid(getuid()).ok().flatten().map(|u| u.name)
}

#[cfg(not(unix))]
fn passwd_user_name() -> Option<String> {
    None
}

/// Host name of this machine
pub fn hostname() -> Option<String> {
    #[cfg(unix)]
    {
        nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
    }
    #[cfg(not(unix))]
    {
        std::env::var("COMPUTERNAME").ok()
    }
}

/// Expand a leading `~` or `~user` using the current user's home directory.
/// Paths that cannot be expanded are returned unchanged.
pub fn expand_user(path: &str) -> String {
    match home_dir() {
        Some(home) => expand_user_with(path, &home),
        None => path.to_string(),
    }
}

/// Expand a leading `~` against `home`, or `~user` against that user's home.
pub fn expand_user_with(path: &str, home: &Path) -> String {
    let Some(rest) = path.strip_prefix('~') else {
        return path.to_string();
    };

    let (user, tail) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx + 1..]),
        None => (rest, ""),
    };

    let base = if user.is_empty() {
        home.to_path_buf()
    } else {
        match passwd_home_for_name(user) {
            Some(dir) => dir,
            None => return path.to_string(),
        }
    };

    if tail.is_empty() {
        base.to_string_lossy().into_owned()
    } else {
        base.join(tail).to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde_slash() {
        assert_eq!(expand_user_with("~/run.sh", Path::new("/home/u1")), "/home/u1/run.sh");
        assert_eq!(
            expand_user_with("~/ood_tmp/run.sh", Path::new("/home/u1")),
            "/home/u1/ood_tmp/run.sh"
        );
    }

    #[test]
    fn test_expand_bare_tilde() {
        assert_eq!(expand_user_with("~", Path::new("/home/u1")), "/home/u1");
    }

    #[test]
    fn test_absolute_and_relative_paths_unchanged() {
        assert_eq!(expand_user_with("/bin/true", Path::new("/home/u1")), "/bin/true");
        assert_eq!(expand_user_with("run.sh", Path::new("/home/u1")), "run.sh");
        assert_eq!(expand_user_with("a/~/b", Path::new("/home/u1")), "a/~/b");
    }

    #[test]
    fn test_unknown_user_unchanged() {
        assert_eq!(
            expand_user_with("~no-such-user-jobctl/run.sh", Path::new("/home/u1")),
            "~no-such-user-jobctl/run.sh"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_expand_named_user() {
        let expanded = expand_user_with("~root/x", Path::new("/home/u1"));
        // root exists on any unix box; its home varies
        assert!(expanded.ends_with("/x"));
        assert!(!expanded.starts_with('~'));
    }
}
