//! Command guard: allow/warn/deny classification for shell commands
//!
//! A pure classifier with no state and no side effects. It is a policy
//! gate, not an isolation boundary: denied commands never reach execution,
//! warned commands run with the reason surfaced alongside the result.
//!
//! Rules are checked in order:
//! 1. deny-list substrings (destructive fs ops, privilege escalation,
//!    exfiltration pipes, kill-all)
//! 2. absolute system-directory targets, with a carve-out for project-local
//!    virtualenv / package-manager paths
//! 3. shell redirection into a denied path
//! 4. warn-list substrings (forced delete, permission changes, force-push)
//! 5. default allow

/// Classification verdict. Reasons are plain strings for verbatim display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Warned(String),
    Denied(String),
}

impl Verdict {
    /// Denied commands must not execute; Allowed and Warned may.
    pub fn permits_execution(&self) -> bool {
        !matches!(self, Verdict::Denied(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Allowed => None,
            Verdict::Warned(r) | Verdict::Denied(r) => Some(r),
        }
    }
}

/// Substrings that are always denied, with their display reasons.
const DENY_PATTERNS: &[(&str, &str)] = &[
    ("rm -rf /", "recursive delete of the filesystem root"),
    ("rm -fr /", "recursive delete of the filesystem root"),
    ("mkfs", "filesystem format command"),
    ("dd if=", "raw disk write"),
    (":(){", "fork bomb"),
    ("sudo ", "privilege escalation"),
    ("su -", "privilege escalation"),
    ("shutdown", "system shutdown"),
    ("reboot", "system reboot"),
    ("killall", "indiscriminate process kill"),
    ("kill -9 -1", "kill of all user processes"),
    ("pkill -9 .", "indiscriminate process kill"),
    ("| sh", "piping downloaded content into a shell"),
    ("| bash", "piping downloaded content into a shell"),
    ("/dev/tcp/", "raw network exfiltration"),
    ("nc -e", "reverse shell"),
];

/// Substrings that execute but carry a warning.
const WARN_PATTERNS: &[(&str, &str)] = &[
    ("rm -rf", "recursive forced delete"),
    ("rm -fr", "recursive forced delete"),
    ("rm -f", "forced delete"),
    ("chmod", "permission change"),
    ("chown", "ownership change"),
    ("push --force", "force push rewrites remote history"),
    ("push -f", "force push rewrites remote history"),
    ("uninstall", "package removal"),
    ("reset --hard", "discards uncommitted changes"),
];

/// Absolute prefixes a command may not target.
const SYSTEM_DIRS: &[&str] = &[
    "/etc", "/bin", "/sbin", "/usr", "/boot", "/dev", "/sys", "/proc", "/lib", "/root", "/var",
];

/// Path fragments that exempt a system-looking target: project-local
/// virtualenvs and package-manager trees routinely live under paths that
/// would otherwise trip the system-directory rule.
const PATH_CARVE_OUTS: &[&str] = &[
    "/.venv/",
    "/venv/",
    "/node_modules/",
    "/site-packages/",
    "/.cargo/",
    "/.npm/",
    "/.rustup/",
];

/// Pure command classifier
#[derive(Debug, Clone, Default)]
pub struct CommandGuard;

impl CommandGuard {
    pub fn new() -> Self {
        Self
    }

    /// Classify a command line. Never errors; unknown input is Allowed.
    pub fn classify(&self, command_line: &str) -> Verdict {
        let command = command_line.trim();
        if command.is_empty() {
            return Verdict::Allowed;
        }

        // 1. Hard deny-list
        for (pattern, reason) in DENY_PATTERNS {
            if command.contains(pattern) {
                return Verdict::Denied(format!(
                    "Command blocked: {} ('{}')",
                    reason, pattern
                ));
            }
        }

        // 2. Absolute system-directory targets, regardless of verb
        for token in command.split_whitespace() {
            let token = token.trim_matches(|c| c == '"' || c == '\'');
            if Self::is_denied_path(token) {
                return Verdict::Denied(format!(
                    "Command targets protected system path: {}",
                    token
                ));
            }
        }

        // 3. Redirection into a denied path
        if let Some(target) = Self::redirection_target(command) {
            if Self::is_denied_path(&target) {
                return Verdict::Denied(format!(
                    "Command redirects output into protected system path: {}",
                    target
                ));
            }
        }

        // 4. Warn-list
        for (pattern, reason) in WARN_PATTERNS {
            if command.contains(pattern) {
                return Verdict::Warned(format!("Caution: {} ('{}')", reason, pattern));
            }
        }

        // 5. Default
        Verdict::Allowed
    }

    /// True when `token` is an absolute path under a protected system
    /// directory and not exempted by a carve-out.
    fn is_denied_path(token: &str) -> bool {
        if !token.starts_with('/') {
            return false;
        }
        if PATH_CARVE_OUTS.iter().any(|c| token.contains(c)) {
            return false;
        }
        SYSTEM_DIRS.iter().any(|dir| {
            token == *dir
                || token
                    .strip_prefix(dir)
                    .map(|rest| rest.starts_with('/'))
                    .unwrap_or(false)
        })
    }

    /// The token following the last `>` / `>>`, if any.
    fn redirection_target(command: &str) -> Option<String> {
        let idx = command.rfind('>')?;
        let after = &command[idx + 1..];
        after
            .split_whitespace()
            .next()
            .map(|t| t.trim_matches(|c| c == '"' || c == '\'').to_string())
    }
}
