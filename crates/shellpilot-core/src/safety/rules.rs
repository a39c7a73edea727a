//! Built-in risk rules and the read-only allowlist.
//!
//! The rule table is ordered data: the first matching pattern decides a
//! segment's risk. Blocked rules come before confirm rules so a command
//! that matches both is blocked. Pattern matching over shell strings is
//! inherently heuristic; obfuscated payloads (base64, eval indirection)
//! are caught only by the coarse confirm rules at the bottom.

use super::RiskLevel;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// One pattern -> risk mapping with a human-readable rationale.
#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: Regex,
    pub risk: RiskLevel,
    pub rationale: String,
}

impl Rule {
    pub fn new(pattern: Regex, risk: RiskLevel, rationale: impl Into<String>) -> Self {
        Self {
            pattern,
            risk,
            rationale: rationale.into(),
        }
    }
}

macro_rules! rule {
    ($pattern:literal, $risk:expr, $rationale:literal) => {
        Rule::new(
            Regex::new($pattern).expect("built-in rule pattern must compile"),
            $risk,
            $rationale,
        )
    };
}

/// The ordered built-in rule table.
pub static BUILTIN_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        // --- Blocked: destructive beyond recovery ---
        rule!(
            r"(?i)\brm\s+(?:-{1,2}[\w-]+\s+)*(?:/\*?|~/?|\$HOME)\s*$",
            RiskLevel::Blocked,
            "deletes a root-level or home path"
        ),
        rule!(
            r"(?i)--no-preserve-root",
            RiskLevel::Blocked,
            "explicitly disables root deletion protection"
        ),
        rule!(
            r"(?i)\bmkfs(\.[a-z0-9]+)?\b",
            RiskLevel::Blocked,
            "reformats a filesystem"
        ),
        rule!(
            r"(?i)\bdd\b.*\bof=/dev/",
            RiskLevel::Blocked,
            "writes raw data over a device"
        ),
        rule!(
            r">\s*/dev/(sd|hd|nvme|vd)[a-z0-9]*",
            RiskLevel::Blocked,
            "redirects output onto a block device"
        ),
        rule!(
            r"(?i)\bshred\b.*\s/dev/",
            RiskLevel::Blocked,
            "destroys data on a device"
        ),
        rule!(
            r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
            RiskLevel::Blocked,
            "fork bomb"
        ),
        rule!(
            r"(?i)\b(chmod|chown)\b.*\s-[a-zA-Z]*R[a-zA-Z]*\b.*\s+/\s*$",
            RiskLevel::Blocked,
            "recursively changes ownership or permissions from the filesystem root"
        ),
        // --- Confirm: legitimate but needs an explicit go-ahead ---
        rule!(
            r"(?i)^(sudo|doas)(\s|$)",
            RiskLevel::Confirm,
            "privilege escalation"
        ),
        rule!(
            r"(?i)^su(\s|$)",
            RiskLevel::Confirm,
            "switches user identity"
        ),
        rule!(
            r"(?i)^(shutdown|reboot|halt|poweroff)\b",
            RiskLevel::Confirm,
            "power state change"
        ),
        rule!(
            r"(?i)^init\s+[06]\b",
            RiskLevel::Confirm,
            "power state change"
        ),
        rule!(
            r"(?i)^(fdisk|parted|mkswap|wipefs)\b",
            RiskLevel::Confirm,
            "partition or disk metadata change"
        ),
        rule!(
            r"(?i)\b(curl|wget)\b[^|]*\|\s*(sudo\s+)?[a-z]*sh\b",
            RiskLevel::Confirm,
            "pipes a downloaded script into a shell"
        ),
        rule!(
            r"(?i)\bbase64\b.*(-d|--decode).*\|",
            RiskLevel::Confirm,
            "decodes and pipes a payload; contents cannot be inspected"
        ),
        rule!(
            r"(?i)\beval\b",
            RiskLevel::Confirm,
            "evaluates dynamically constructed shell code"
        ),
        rule!(
            r"(?i)\bfind\b.*(\s-delete\b|\s-exec\s+rm\b)",
            RiskLevel::Confirm,
            "bulk file deletion"
        ),
        rule!(
            r">\s*/etc/",
            RiskLevel::Confirm,
            "overwrites system configuration"
        ),
        // Last so the specific /dev and /etc redirect rules win first.
        // `>&` duplicates a file descriptor and is excluded.
        rule!(
            r">{1,2}\s*[^&\s>]",
            RiskLevel::Confirm,
            "redirects output, may create or overwrite a file"
        ),
    ]
});

/// Single-word commands considered read-only. A segment whose first word is
/// in this set executes without confirmation (unless a rule matched first).
pub static READ_ONLY_COMMANDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        // Files and text
        "ls", "pwd", "cat", "head", "tail", "less", "more", "wc", "file", "stat", "du",
        "df", "tree", "basename", "dirname", "realpath", "readlink", "find", "locate",
        "grep", "egrep", "fgrep", "rg", "diff", "comm", "sort", "uniq", "cut", "tr",
        "nl", "column", "strings", "md5sum", "sha1sum", "sha256sum", "base64", "jq",
        // Shell introspection and navigation
        "cd", "echo", "printf", "which", "whereis", "type", "env", "printenv",
        "history", "alias", "true", "false", "test",
        // System and processes
        "whoami", "id", "groups", "who", "w", "last", "date", "cal", "uptime",
        "hostname", "uname", "ps", "pgrep", "free", "lsblk", "lscpu", "lsusb",
        "lspci", "lsof", "dmesg", "journalctl", "vmstat", "iostat",
        // Network (read-only queries)
        "ping", "dig", "nslookup", "host", "ip", "ifconfig", "netstat", "ss",
        "traceroute",
        // Documentation
        "man", "info", "help", "apropos",
    ]
    .into_iter()
    .collect()
});

/// Two-word prefixes (command + subcommand) considered read-only for tools
/// whose risk depends on the subcommand.
pub static SAFE_PREFIXES: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "git status",
        "git diff",
        "git log",
        "git show",
        "git branch",
        "git remote",
        "git blame",
        "git describe",
        "git shortlog",
        "git tag",
        "git ls-files",
        "git ls-tree",
        "git reflog",
        "systemctl status",
        "systemctl list-units",
        "docker ps",
        "docker images",
        "docker logs",
        "kubectl get",
        "kubectl describe",
        "apt list",
        "dnf list",
        "npm ls",
        "cargo tree",
        "brew list",
    ]
    .into_iter()
    .collect()
});
