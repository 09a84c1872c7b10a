// DAMONBENCH SIZE UNITS
// BINARY SIZES FOR MEMORY LIMITS: "1GiB", "512M", "2g", "1073741824"

use std::sync::OnceLock;

use regex::Regex;

pub const KIB: u64 = 1 << 10;
pub const MIB: u64 = 1 << 20;
pub const GIB: u64 = 1 << 30;
pub const TIB: u64 = 1 << 40;

fn size_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(\d+)\s*(?:([kmgt])(?:i?b)?|b)?\s*$").expect("static size regex")
    })
}

// ALL SUFFIXES ARE BINARY. cgroup memory.max TAKES BYTES, NOBODY MEANS 10^9 HERE.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let caps = size_re()
        .captures(s)
        .ok_or_else(|| format!("invalid size `{}` (expected e.g. 1GiB, 512M, 4096)", s))?;
    let n: u64 = caps[1]
        .parse()
        .map_err(|e| format!("invalid size `{}`: {}", s, e))?;
    let mult = match caps.get(2).map(|m| m.as_str().to_ascii_lowercase()) {
        None => 1,
        Some(u) => match u.as_str() {
            "k" => KIB,
            "m" => MIB,
            "g" => GIB,
            _ => TIB,
        },
    };
    n.checked_mul(mult)
        .ok_or_else(|| format!("size `{}` overflows u64", s))
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [(u64, &str); 4] = [(TIB, "TiB"), (GIB, "GiB"), (MIB, "MiB"), (KIB, "KiB")];
    for (scale, label) in UNITS {
        if bytes >= scale {
            let v = bytes as f64 / scale as f64;
            return if bytes % scale == 0 {
                format!("{} {}", bytes / scale, label)
            } else {
                format!("{:.2} {}", v, label)
            };
        }
    }
    format!("{} B", bytes)
}
