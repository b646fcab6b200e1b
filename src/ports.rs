use anyhow::{bail, Context, Result};
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use std::fs;
use std::path::Path;

/// Parse a port list into a deduplicated list of ports (1..=65535), keeping first-seen order.
///
/// Supported formats, separated by commas or newlines:
/// - single port number: `2408`
/// - inclusive range: `8000-8010`
/// - comments: everything after `#` on a line is ignored
pub fn parse_ports_str(s: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");
        for item in line.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            if let Some((a, b)) = item.split_once('-') {
                let start = parse_port_str(a.trim())
                    .with_context(|| format!("line {line_no}: invalid start in range: {a}"))?;
                let end = parse_port_str(b.trim())
                    .with_context(|| format!("line {line_no}: invalid end in range: {b}"))?;
                if start > end {
                    bail!("line {line_no}: invalid range {start}-{end} (start > end)");
                }
                for p in start..=end {
                    if seen.insert(p) {
                        out.push(p);
                    }
                }
                continue;
            }

            let p = parse_port_str(item)
                .with_context(|| format!("line {line_no}: invalid port value: {item}"))?;
            if seen.insert(p) {
                out.push(p);
            }
        }
    }

    Ok(out)
}

/// Load a port list from a file path. Errors if the file cannot be read or parsed.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<Vec<u16>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ports file: {}", path.as_ref().display()))?;
    parse_ports_str(&content)
}

/// Pick one port uniformly from `ports`, or `fallback` when the list is empty.
pub fn random_port(ports: &[u16], fallback: u16) -> u16 {
    ports.choose(&mut OsRng).copied().unwrap_or(fallback)
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}
