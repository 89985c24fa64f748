//! INI parsing logic for converting `Ini` → `AfdConfig`.
//!
//! The single place where INI key names are mapped to struct fields.
//! Starts from `AfdConfig::default()` and overlays any values found in
//! the file.

use ini::Ini;

use super::file::ConfigError;
use super::settings::AfdConfig;

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

macro_rules! overlay {
    ($section:expr, $name:literal, $key:literal, $target:expr, $reason:literal) => {
        if let Some(v) = $section.get($key) {
            $target = v
                .trim()
                .parse()
                .map_err(|_| invalid($name, $key, v, $reason))?;
        }
    };
}

pub(super) fn parse_ini(ini: &Ini) -> Result<AfdConfig, ConfigError> {
    let mut config = AfdConfig::default();

    if let Some(s) = ini.section(Some("dispatcher")) {
        overlay!(
            s,
            "dispatcher",
            "max_connections",
            config.dispatcher.max_connections,
            "must be a positive integer"
        );
        overlay!(
            s,
            "dispatcher",
            "dispatch_interval_ms",
            config.dispatcher.dispatch_interval_ms,
            "must be milliseconds as a positive integer"
        );
        overlay!(
            s,
            "dispatcher",
            "default_retry_interval",
            config.dispatcher.default_retry_interval,
            "must be seconds as a positive integer"
        );
        if config.dispatcher.max_connections == 0 {
            return Err(invalid(
                "dispatcher",
                "max_connections",
                "0",
                "at least one connection is required",
            ));
        }
    }

    if let Some(s) = ini.section(Some("log")) {
        overlay!(s, "log", "max_output_log_files", config.log.max_output_log_files, "must be a file count");
        overlay!(s, "log", "max_input_log_files", config.log.max_input_log_files, "must be a file count");
        overlay!(s, "log", "max_delete_log_files", config.log.max_delete_log_files, "must be a file count");
        overlay!(s, "log", "max_distribution_log_files", config.log.max_distribution_log_files, "must be a file count");
        overlay!(s, "log", "max_log_file_size", config.log.max_log_file_size, "must be bytes as a positive integer");
        overlay!(s, "log", "switch_file_time", config.log.switch_file_time, "must be seconds as a positive integer");
        if config.log.switch_file_time == 0 {
            return Err(invalid(
                "log",
                "switch_file_time",
                "0",
                "rotation period cannot be zero",
            ));
        }
    }

    if let Some(s) = ini.section(Some("archive")) {
        overlay!(s, "archive", "rescan_interval", config.archive.rescan_interval, "must be seconds as a positive integer");
        overlay!(s, "archive", "report_interval", config.archive.report_interval, "must be seconds as a positive integer");
    }

    if let Some(s) = ini.section(Some("defaults")) {
        overlay!(s, "defaults", "max_errors", config.host_defaults.max_errors, "must be a positive integer");
        overlay!(s, "defaults", "retry_interval", config.host_defaults.retry_interval, "must be seconds as a positive integer");
        overlay!(s, "defaults", "transfer_timeout", config.host_defaults.transfer_timeout, "must be seconds as a positive integer");
        overlay!(s, "defaults", "transfer_block_size", config.host_defaults.transfer_block_size, "must be bytes as a positive integer");
        overlay!(s, "defaults", "allowed_transfers", config.host_defaults.allowed_transfers, "must be between 1 and 15");
        if config.host_defaults.allowed_transfers == 0
            || config.host_defaults.allowed_transfers as usize
                > crate::status::fsa::MAX_NO_PARALLEL_JOBS
        {
            return Err(invalid(
                "defaults",
                "allowed_transfers",
                &config.host_defaults.allowed_transfers.to_string(),
                "must be between 1 and 15",
            ));
        }
    }

    if let Some(s) = ini.section(Some("supervisor")) {
        overlay!(s, "supervisor", "config_check_interval", config.supervisor.config_check_interval, "must be seconds as a positive integer");
        overlay!(s, "supervisor", "max_restarts", config.supervisor.max_restarts, "must be a positive integer");
        overlay!(s, "supervisor", "restart_window", config.supervisor.restart_window, "must be seconds as a positive integer");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ini_yields_defaults() {
        let config = parse_ini(&Ini::new()).unwrap();
        assert_eq!(config.dispatcher.max_connections, 50);
        assert_eq!(config.log.switch_file_time, 3600);
    }

    #[test]
    fn sections_overlay_defaults() {
        let ini = Ini::load_from_str(
            "[dispatcher]\nmax_connections = 12\n[log]\nmax_output_log_files = 4\n",
        )
        .unwrap();
        let config = parse_ini(&ini).unwrap();
        assert_eq!(config.dispatcher.max_connections, 12);
        assert_eq!(config.log.max_output_log_files, 4);
        // Untouched sections keep their defaults.
        assert_eq!(config.host_defaults.max_errors, 10);
    }

    #[test]
    fn bad_value_names_section_and_key() {
        let ini = Ini::load_from_str("[dispatcher]\nmax_connections = lots\n").unwrap();
        let err = parse_ini(&ini).unwrap_err().to_string();
        assert!(err.contains("dispatcher.max_connections"));
    }

    #[test]
    fn zero_connections_rejected() {
        let ini = Ini::load_from_str("[dispatcher]\nmax_connections = 0\n").unwrap();
        assert!(parse_ini(&ini).is_err());
    }

    #[test]
    fn allowed_transfers_bounded_by_slot_count() {
        let ini = Ini::load_from_str("[defaults]\nallowed_transfers = 16\n").unwrap();
        assert!(parse_ini(&ini).is_err());
    }
}
