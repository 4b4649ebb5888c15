pub mod generate;
pub mod parse;
pub mod types;

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub use parse::{load_config, validate_config, ConfigError};
pub use types::{Config, ListingConfig, TailConfig};

const USER_CONFIG: &str = ".config/batchlog/config.yml";
pub const SYSTEM_CONFIG: &str = "/etc/batchlog/config.yml";

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is valid")
    })
}

/// Expands `$env{VAR_NAME}` references. Unset variables are left unchanged.
pub fn expand_env_vars(text: &str) -> String {
    env_var_pattern()
        .replace_all(text, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string()
}

/// Names of `$env{...}` references still present in `text`, sorted and
/// deduplicated. Comment lines are skipped.
pub fn unexpanded_env_vars(text: &str) -> Vec<String> {
    let mut vars: Vec<String> = text
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .flat_map(|line| env_var_pattern().captures_iter(line))
        .map(|caps| caps[1].to_string())
        .collect();
    vars.sort();
    vars.dedup();
    vars
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    } else if path_str == "~" {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir;
        }
    }

    path.to_path_buf()
}

/// Resolves the config file path.
/// Returns the first of:
/// 1. Explicit path (with tilde expansion)
/// 2. ~/.config/batchlog/config.yml
/// 3. /etc/batchlog/config.yml
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }

    if let Some(home_dir) = dirs::home_dir() {
        let user_config = home_dir.join(USER_CONFIG);
        if user_config.exists() {
            return Some(user_config);
        }
    }

    let system_config = PathBuf::from(SYSTEM_CONFIG);
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Where `config init` writes by default.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(USER_CONFIG))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars_single() {
        std::env::set_var("BATCHLOG_TEST_ROOT", "/srv/logs");
        let result = expand_env_vars("logs_path: $env{BATCHLOG_TEST_ROOT}/x");
        assert_eq!(result, "logs_path: /srv/logs/x");
        std::env::remove_var("BATCHLOG_TEST_ROOT");
    }

    #[test]
    fn test_expand_env_vars_unset_left_alone() {
        let result = expand_env_vars("path/$env{BATCHLOG_NONEXISTENT_VAR}/file");
        assert_eq!(result, "path/$env{BATCHLOG_NONEXISTENT_VAR}/file");
        assert_eq!(
            unexpanded_env_vars(&result),
            vec!["BATCHLOG_NONEXISTENT_VAR".to_string()]
        );
    }

    #[test]
    fn test_unexpanded_env_vars_skips_comments() {
        let text = "# set $env{BATCHLOG_DOC_EXAMPLE} to override\n  # $env{ALSO_DOC}\nlogs_path: $env{BATCHLOG_REAL_UNSET}\n";
        assert_eq!(
            unexpanded_env_vars(text),
            vec!["BATCHLOG_REAL_UNSET".to_string()]
        );
    }

    #[test]
    fn test_expand_env_vars_ignores_plain_braces() {
        let result = expand_env_vars("${not_an_env_ref}");
        assert_eq!(result, "${not_an_env_ref}");
        assert!(unexpanded_env_vars(&result).is_empty());
    }

    #[test]
    fn test_expand_tilde_with_path() {
        let expanded = expand_tilde(Path::new("~/logs"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join("logs"));
        }
    }

    #[test]
    fn test_expand_tilde_no_expansion() {
        assert_eq!(expand_tilde(Path::new("/var/log")), Path::new("/var/log"));
        assert_eq!(expand_tilde(Path::new("relative/path")), Path::new("relative/path"));
    }

    #[test]
    fn test_resolve_config_path_prefers_explicit() {
        let resolved = resolve_config_path(Some(Path::new("/tmp/explicit.yml")));
        assert_eq!(resolved, Some(PathBuf::from("/tmp/explicit.yml")));
    }
}
