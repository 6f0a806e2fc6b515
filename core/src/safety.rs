//! Safety Gate: a cheap, deterministic, pure classification of a
//! shell invocation into blocked / safe-readonly / ordinary.

const PROTECTED_PREFIXES: &[&str] = &["/bin", "/sbin", "/usr/bin", "/usr/sbin", "/etc", "/sys", "/proc"];

const SAFE_READONLY_PROGRAMS: &[&str] = &["ls", "pwd", "echo", "cat", "head", "tail", "wc", "file", "stat", "whoami", "date", "env", "printenv"];

const SAFE_READONLY_GIT_SUBCOMMANDS: &[&str] = &["status", "diff", "log", "show", "branch", "remote", "blame"];

/// Returns true when `argv` is a recognized safe, read-only command that can
/// bypass the permission prompt. Still subject to [`blocked`].
pub fn is_safe_readonly(argv: &[String]) -> bool {
    let Some(program) = argv.first() else { return false };
    let program_lower = program.to_ascii_lowercase();
    if SAFE_READONLY_PROGRAMS.contains(&program_lower.as_str()) {
        return true;
    }
    if program_lower == "git" {
        if let Some(subcommand) = argv.get(1) {
            return SAFE_READONLY_GIT_SUBCOMMANDS.contains(&subcommand.to_ascii_lowercase().as_str());
        }
    }
    false
}

/// Returns true when `argv` must never run, regardless of approval state.
/// Matching is case-insensitive.
pub fn blocked(argv: &[String]) -> bool {
    if argv.is_empty() {
        return false;
    }
    let lower: Vec<String> = argv.iter().map(|a| a.to_ascii_lowercase()).collect();
    let program = lower[0].rsplit('/').next().unwrap_or(lower[0].as_str());
    let joined = lower.join(" ");

    is_recursive_force_remove(program, &lower)
        || is_self_harm(program, &lower)
        || is_disk_wiper(program, &lower)
        || is_fork_bomb_signature(&joined)
        || is_force_push(program, &lower)
        || is_insecure_permission_change(program, &lower)
        || touches_protected_prefix(program, &lower)
}

fn is_recursive_force_remove(program: &str, argv: &[String]) -> bool {
    if program != "rm" {
        return false;
    }
    let mut recursive = false;
    let mut force = false;
    for arg in &argv[1..] {
        if let Some(flags) = arg.strip_prefix("--") {
            recursive |= flags == "recursive";
            force |= flags == "force";
        } else if let Some(flags) = arg.strip_prefix('-') {
            if flags.starts_with('-') {
                continue;
            }
            recursive |= flags.contains('r');
            force |= flags.contains('f');
        }
    }
    recursive && force
}

fn is_self_harm(program: &str, argv: &[String]) -> bool {
    const SELF_TARGETS: &[&str] = &["nexora", "tmux", "screen"];
    match program {
        "kill" | "pkill" | "killall" => {
            argv[1..].iter().any(|a| a == "-1" || a == "1" || SELF_TARGETS.iter().any(|t| a.contains(t)))
        }
        _ => false,
    }
}

fn is_disk_wiper(program: &str, _argv: &[String]) -> bool {
    program.starts_with("mkfs") || program == "fdisk" || program == "dd" || program == "shred"
}

fn is_fork_bomb_signature(joined: &str) -> bool {
    joined.contains(":(){:|:&};:") || joined.contains(":(){ :|:& };:")
}

fn is_force_push(program: &str, argv: &[String]) -> bool {
    if program != "git" {
        return false;
    }
    argv[1..].iter().any(|a| a == "-f" || a == "--force" || a == "--force-with-lease") && argv[1..].iter().any(|a| a == "push")
}

fn is_insecure_permission_change(program: &str, argv: &[String]) -> bool {
    if program != "chmod" {
        return false;
    }
    argv[1..].iter().any(|a| a == "777" || a == "000")
}

fn touches_protected_prefix(program: &str, argv: &[String]) -> bool {
    const DESTRUCTIVE: &[&str] = &["rm", "mv", "chmod", "chown", "truncate"];
    if !DESTRUCTIVE.contains(&program) {
        return false;
    }
    argv[1..].iter().any(|a| PROTECTED_PREFIXES.iter().any(|p| a.starts_with(p)))
}
