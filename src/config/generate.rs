pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# BATCHLOG CONFIGURATION
# =============================================================================
# batchlog serves the rotated log files of sibling services over HTTP.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/batchlog/config.yml
#   3. /etc/batchlog/config.yml
#
# $env{...} references are expanded from the environment, ~ expands to $HOME.
# Durations use humantime syntax: 500ms, 20s, 5m, 7days.

# Address the HTTP API listens on.
listen: 0.0.0.0:8080

# Root directory with one subdirectory per service. Each service directory
# holds a live 'current' file plus archives named '@<timestamp>.s' or '.u'.
logs_path: /var/log/services

# Status snapshot, rewritten after every rotation scan. Batch id mappings are
# restored from it on startup.
status_path: ./status/status.json

# How often service directories are rescanned for rotations.
status_update_interval: 20s

# When every archive a service's mapping knew about has vanished, new ids
# jump this far past the last known id. Must be greater than 1.
skip_batches_on_mismatch: 3

listing:
  # Attempts at a consistent directory listing before giving up.
  max_retries: 10
  # Pause after a raced attempt, doubled on each retry (capped at 500ms).
  retry_delay: 5ms

tail:
  # Follow-capable executable (GNU coreutils or busybox tail).
  program: tail
  # How often a follow stream checks whether 'current' was rotated.
  rotation_check_interval: 5s
  # Re-resolutions allowed per follow stream.
  max_reresolve: 16
  # Grace period between SIGTERM and SIGKILL.
  termination_grace: 5s
  # Terminated tail processes kept for status reporting.
  retention: 7days
  max_terminated: 100
"#
    .to_string()
}
