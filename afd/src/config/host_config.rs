//! Parser for the textual HOST_CONFIG ruleset.
//!
//! One host per line, colon-separated fields in a fixed order:
//!
//! ```text
//! alias:real1:real2:toggle:proxy:allowed_transfers:max_errors:\
//! retry_interval:transfer_block_size:successful_retries:\
//! file_size_offset:transfer_timeout:protocol_options:host_status:\
//! special_flag:transfer_rate_limit:ttl:socket_send_buffer:\
//! socket_recv_buffer:dup_check_timeout:dup_check_flag:\
//! keep_connected:warn_time
//! ```
//!
//! Trailing fields may be omitted; empty fields take the configured
//! defaults. Lines starting with `#` and blank lines are skipped. An
//! alias whose first real hostname starts with `+` declares a group.

use std::str::FromStr;

use crate::status::fsa::{
    DupCheckFlags, HostRecord, HostStatus, ProtocolOptions, SpecialFlags,
};

use super::file::ConfigError;
use super::settings::HostDefaults;

fn bad(line: usize, reason: impl Into<String>) -> ConfigError {
    ConfigError::MalformedHostConfig {
        line,
        reason: reason.into(),
    }
}

fn field<T: FromStr>(
    fields: &[&str],
    idx: usize,
    default: T,
    line: usize,
    what: &str,
) -> Result<T, ConfigError> {
    match fields.get(idx) {
        None => Ok(default),
        Some(s) if s.is_empty() => Ok(default),
        Some(s) => s
            .parse()
            .map_err(|_| bad(line, format!("field {} ({what}): bad value '{s}'", idx + 1))),
    }
}

fn parse_line(
    raw: &str,
    line: usize,
    defaults: &HostDefaults,
) -> Result<HostRecord, ConfigError> {
    let fields: Vec<&str> = raw.split(':').collect();
    let alias = fields[0].trim();
    if alias.is_empty() {
        return Err(bad(line, "empty alias"));
    }
    if alias.len() >= crate::status::fsa::MAX_HOSTNAME {
        return Err(bad(line, format!("alias '{alias}' too long")));
    }

    let allowed = field(&fields, 5, defaults.allowed_transfers, line, "allowed_transfers")?;
    let mut host = HostRecord::new(alias, allowed);

    if let Some(r1) = fields.get(1).filter(|s| !s.is_empty()) {
        host.real_hostname[0] = r1.to_string();
    }
    if let Some(r2) = fields.get(2).filter(|s| !s.is_empty()) {
        host.real_hostname[1] = r2.to_string();
    }
    if let Some(t) = fields.get(3).filter(|s| !s.is_empty()) {
        host.toggle_str = t.to_string();
        host.auto_toggle = t.starts_with('{');
    }
    if let Some(p) = fields.get(4).filter(|s| !s.is_empty()) {
        host.proxy_name = p.to_string();
    }

    host.max_errors = field(&fields, 6, defaults.max_errors, line, "max_errors")?;
    host.retry_interval = field(&fields, 7, defaults.retry_interval, line, "retry_interval")?;
    host.transfer_block_size = field(
        &fields,
        8,
        defaults.transfer_block_size,
        line,
        "transfer_block_size",
    )?;
    host.max_successful_retries = field(&fields, 9, 0, line, "successful_retries")?;
    host.file_size_offset = field(&fields, 10, -1, line, "file_size_offset")?;
    host.transfer_timeout = field(
        &fields,
        11,
        defaults.transfer_timeout,
        line,
        "transfer_timeout",
    )?;
    host.protocol_options = ProtocolOptions::from_bits_truncate(field(
        &fields,
        12,
        0,
        line,
        "protocol_options",
    )?);
    host.host_status =
        HostStatus::from_bits_truncate(field(&fields, 13, 0, line, "host_status")?);
    host.special_flag =
        SpecialFlags::from_bits_truncate(field(&fields, 14, 0u8, line, "special_flag")?)
            | SpecialFlags::HOST_IN_DIR_CONFIG;
    host.transfer_rate_limit = field(&fields, 15, 0, line, "transfer_rate_limit")?;
    host.ttl = field(&fields, 16, 0, line, "ttl")?;
    host.socket_send_buffer = field(&fields, 17, 0, line, "socket_send_buffer")?;
    host.socket_recv_buffer = field(&fields, 18, 0, line, "socket_recv_buffer")?;
    host.dup_check_timeout = field(&fields, 19, 0, line, "dup_check_timeout")?;
    host.dup_check_flag =
        DupCheckFlags::from_bits_truncate(field(&fields, 20, 0, line, "dup_check_flag")?);
    host.keep_connected = field(&fields, 21, 0, line, "keep_connected")?;
    host.warn_time = field(&fields, 22, 0, line, "warn_time")?;

    Ok(host)
}

/// Parses a whole HOST_CONFIG text into records, in file order.
/// Duplicate aliases are rejected; group lines are accepted like any
/// other host.
pub fn parse_host_config(
    text: &str,
    defaults: &HostDefaults,
) -> Result<Vec<HostRecord>, ConfigError> {
    let mut hosts: Vec<HostRecord> = Vec::new();
    for (n, raw) in text.lines().enumerate() {
        let line = n + 1;
        let raw = raw.trim_end();
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }
        let host = parse_line(raw, line, defaults)?;
        if hosts.iter().any(|h| h.alias == host.alias) {
            return Err(bad(line, format!("duplicate alias '{}'", host.alias)));
        }
        hosts.push(host);
    }
    Ok(hosts)
}
