//! Pure validation helpers for builder inputs (spec.md §6). These are
//! plain functions on strings and integers — no I/O, no state — so the
//! builder can reject bad configuration before any resource is acquired.

/// Validate a hostname per RFC 1123: labels of 1–63 chars from
/// `[A-Za-z0-9-]` (no leading/trailing hyphen), total length <= 253.
/// Also accepts dotted-decimal IPv4 and a basic IPv6 form.
pub fn is_valid_host(host: &str) -> bool {
    if host.is_empty() {
        return false;
    }
    if is_valid_ipv4(host) || is_valid_ipv6(host) {
        return true;
    }
    is_valid_hostname(host)
}

fn is_valid_hostname(host: &str) -> bool {
    if host.len() > 253 {
        return false;
    }
    host.split('.').all(is_valid_label)
}

fn is_valid_label(label: &str) -> bool {
    if label.is_empty() || label.len() > 63 {
        return false;
    }
    let bytes = label.as_bytes();
    if bytes[0] == b'-' || bytes[bytes.len() - 1] == b'-' {
        return false;
    }
    bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
}

/// Validate dotted-decimal IPv4 with four octets 0-255 and no leading
/// zeros on multi-digit octets.
pub fn is_valid_ipv4(host: &str) -> bool {
    let parts: Vec<&str> = host.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|part| is_valid_octet(part))
}

fn is_valid_octet(part: &str) -> bool {
    if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    if part.len() > 1 && part.starts_with('0') {
        return false;
    }
    part.parse::<u16>().map(|v| v <= 255).unwrap_or(false)
}

/// Validate a basic IPv6 address form (delegates to the standard
/// library's parser, which accepts the full RFC 4291 grammar).
pub fn is_valid_ipv6(host: &str) -> bool {
    host.contains(':') && host.parse::<std::net::Ipv6Addr>().is_ok()
}

/// Validate a TCP port: any value except 0.
pub fn is_valid_port(port: u16) -> bool {
    port != 0
}

/// Validate a serial baud rate against the range spec.md §6 allows.
pub fn is_valid_baud_rate(baud: u32) -> bool {
    (50..=4_000_000).contains(&baud)
}

/// Validate serial data bits (5-8).
pub fn is_valid_data_bits(bits: u8) -> bool {
    (5..=8).contains(&bits)
}

/// Validate serial stop bits (1-2).
pub fn is_valid_stop_bits(bits: u8) -> bool {
    (1..=2).contains(&bits)
}

/// Validate a serial device path: Unix-style (`/` followed by
/// alphanumerics, `/`, `_`, `-`), or `COM1`..`COM255`, or a Windows
/// reserved device name.
pub fn is_valid_device_path(path: &str) -> bool {
    if let Some(rest) = path.strip_prefix('/') {
        return !rest.is_empty()
            && path
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'/' | b'_' | b'-'));
    }
    if let Some(digits) = path.to_ascii_uppercase().strip_prefix("COM") {
        if let Ok(n) = digits.parse::<u16>() {
            return (1..=255).contains(&n);
        }
        return false;
    }
    is_windows_reserved_name(path)
}

fn is_windows_reserved_name(path: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7",
        "LPT8", "LPT9",
    ];
    RESERVED.iter().any(|name| name.eq_ignore_ascii_case(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostnames() {
        assert!(is_valid_host("example.com"));
        assert!(is_valid_host("a.b.c"));
        assert!(!is_valid_host(""));
        assert!(!is_valid_host("-bad.com"));
        assert!(!is_valid_host("bad-.com"));
        assert!(!is_valid_host(&"a".repeat(64)));
    }

    #[test]
    fn ipv4() {
        assert!(is_valid_ipv4("192.168.0.1"));
        assert!(is_valid_ipv4("0.0.0.0"));
        assert!(is_valid_ipv4("255.255.255.255"));
        assert!(!is_valid_ipv4("256.0.0.1"));
        assert!(!is_valid_ipv4("01.0.0.1"));
        assert!(!is_valid_ipv4("1.2.3"));
    }

    #[test]
    fn ipv6() {
        assert!(is_valid_ipv6("::1"));
        assert!(is_valid_ipv6("2001:db8::1"));
        assert!(!is_valid_ipv6("not-an-address"));
    }

    #[test]
    fn ports() {
        assert!(is_valid_port(1));
        assert!(is_valid_port(65535));
        assert!(!is_valid_port(0));
    }

    #[test]
    fn baud_rates() {
        assert!(is_valid_baud_rate(9600));
        assert!(is_valid_baud_rate(50));
        assert!(is_valid_baud_rate(4_000_000));
        assert!(!is_valid_baud_rate(49));
        assert!(!is_valid_baud_rate(4_000_001));
    }

    #[test]
    fn device_paths() {
        assert!(is_valid_device_path("/dev/ttyUSB0"));
        assert!(is_valid_device_path("COM3"));
        assert!(is_valid_device_path("COM255"));
        assert!(!is_valid_device_path("COM0"));
        assert!(!is_valid_device_path("COM256"));
        assert!(is_valid_device_path("CON"));
        assert!(!is_valid_device_path("nonsense"));
    }
}
