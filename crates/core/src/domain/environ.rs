// Environment and rendering helpers shared by every Cmd implementation

use std::collections::HashSet;
use std::path::Path;

/// Split a `KEY=VALUE` entry. Entries without `=` yield `None`.
pub fn split_env_entry(entry: &str) -> Option<(&str, &str)> {
    // A leading '=' is part of the key on Windows ("=C:=C:\\dir")
    let search_from = usize::from(cfg!(windows) && entry.starts_with('='));
    let idx = entry[search_from..].find('=')? + search_from;
    Some((&entry[..idx], &entry[idx + 1..]))
}

fn env_key(entry: &str) -> String {
    let key = split_env_entry(entry).map_or(entry, |(k, _)| k);
    if cfg!(windows) {
        key.to_ascii_uppercase()
    } else {
        key.to_string()
    }
}

/// Collapse duplicate keys, keeping the last value for each
///
/// Entries keep the relative order of their final occurrence. Malformed
/// entries (no `=`) cannot be passed to a process and are dropped.
pub fn dedup_env(env: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out: Vec<String> = Vec::with_capacity(env.len());

    for entry in env.iter().rev() {
        if split_env_entry(entry).is_none() {
            continue;
        }
        if seen.insert(env_key(entry)) {
            out.push(entry.clone());
        }
    }

    out.reverse();
    out
}

/// Environment a command would be started with
///
/// # Arguments
/// * `env` - Explicit environment; `None` inherits the caller's
/// * `dir` - Working directory; adds `PWD` to an inherited environment
/// * `allowlist` - Keys kept from an inherited environment (all when `None`)
pub fn effective_environ(
    env: Option<&[String]>,
    dir: Option<&Path>,
    allowlist: Option<&[String]>,
) -> Vec<String> {
    if let Some(env) = env {
        return dedup_env(env);
    }

    let mut inherited: Vec<String> = std::env::vars_os()
        .map(|(k, v)| format!("{}={}", k.to_string_lossy(), v.to_string_lossy()))
        .filter(|entry| match allowlist {
            Some(keys) => split_env_entry(entry).is_some_and(|(k, _)| keys.iter().any(|a| a == k)),
            None => true,
        })
        .collect();

    if let Some(dir) = dir.filter(|_| !cfg!(windows)) {
        let absolute = if dir.is_absolute() {
            Some(dir.to_path_buf())
        } else {
            std::env::current_dir().ok().map(|cwd| cwd.join(dir))
        };
        if let Some(absolute) = absolute {
            inherited.push(format!("PWD={}", absolute.display()));
        }
    }

    dedup_env(&inherited)
}

/// Human-readable command line: path followed by `args[1..]`
pub fn render_command(path: &str, args: &[String]) -> String {
    let mut out = String::from(path);
    for arg in args.iter().skip(1) {
        out.push(' ');
        out.push_str(arg);
    }
    out
}
