use std::collections::HashMap;

use anyhow::{Context, Result, anyhow, bail};
use tracing::trace;

use crate::target::riscv;

/// Everything we know about the fault, frozen at capture time.
///
/// Built exactly once from the dump text and never mutated afterwards; it is
/// the sole input to every RSP command handler.
#[derive(Clone, Debug)]
pub struct FaultInfo {
    /// Which CPU core produced the dump.
    pub core_id: u32,
    /// Register values by their dump name. Registers the panic handler did
    /// not print read as 0.
    pub registers: HashMap<String, u32>,
    /// Address of the first captured stack byte.
    pub stack_base_addr: u32,
    /// Contiguous stack bytes covering `[stack_base_addr, stack_base_addr + len)`.
    pub stack_data: Vec<u8>,
}

/// Parse the panic output of the ESP RISC-V chips (esp32c2/c3/c6/h2).
pub fn parse_riscv(text: &str) -> Result<FaultInfo> {
    parse_dump(text, &riscv::DUMP_REGISTERS)
}

/// Line-oriented scan over the dump text. Banner lines outside the two
/// sections are skipped; inside a section, the first line that doesn't match
/// the section's grammar ends it. Any structural mismatch fails the whole
/// parse, there is no partial result.
fn parse_dump(text: &str, canonical: &phf::Set<&'static str>) -> Result<FaultInfo> {
    let lines: Vec<&str> = text.lines().collect();
    let mut core: Option<(u32, HashMap<String, u32>)> = None;
    let mut stack: Option<(u32, Vec<u8>)> = None;

    let mut i = 0;
    while i < lines.len() {
        if let Some(core_id) = parse_core_header(lines[i]) {
            if core.is_some() {
                bail!("multi-core dumps are not supported");
            }
            i += 1;
            let mut registers = HashMap::new();
            while i < lines.len() {
                let Some(pairs) = parse_register_pairs(lines[i])
                    .with_context(|| format!("register dump line {}", i + 1))?
                else {
                    break;
                };
                for (name, value) in pairs {
                    if !canonical.contains(name.as_str()) {
                        bail!("unknown register {:?} on line {}", name, i + 1);
                    }
                    registers.insert(name, value);
                }
                i += 1;
            }
            if registers.is_empty() {
                bail!("register dump for core {core_id} contains no register values");
            }
            core = Some((core_id, registers));
            continue;
        }

        if parse_stack_header(lines[i]) {
            if stack.is_some() {
                bail!("found more than one stack memory section");
            }
            i += 1;
            let mut base: Option<u32> = None;
            let mut data: Vec<u8> = Vec::new();
            while i < lines.len() {
                let Some((addr, words)) = parse_stack_line(lines[i])
                    .with_context(|| format!("stack memory line {}", i + 1))?
                else {
                    break;
                };
                if let Some(base) = base {
                    let expected = base as u64 + data.len() as u64;
                    if addr as u64 != expected {
                        bail!(
                            "stack memory is not contiguous: line {} starts at {:#x}, expected {:#x}",
                            i + 1,
                            addr,
                            expected
                        );
                    }
                } else {
                    base = Some(addr);
                }
                for word in words {
                    data.extend_from_slice(&word.to_le_bytes());
                }
                i += 1;
            }
            let Some(stack_base_addr) = base else {
                bail!("stack memory section contains no data lines");
            };
            stack = Some((stack_base_addr, data));
            continue;
        }

        i += 1;
    }

    let (core_id, registers) = core.ok_or_else(|| anyhow!("no register dump found in input"))?;
    let (stack_base_addr, stack_data) =
        stack.ok_or_else(|| anyhow!("no stack memory dump found in input"))?;

    trace!(
        core_id,
        register_count = registers.len(),
        stack_base_addr,
        stack_bytes = stack_data.len(),
        "parsed fault dump"
    );

    Ok(FaultInfo {
        core_id,
        registers,
        stack_base_addr,
        stack_data,
    })
}

/// Matches a register dump header like `Core  0 register dump:` and returns
/// the core index.
pub fn parse_core_header(line: &str) -> Option<u32> {
    let rest = line.trim().strip_prefix("Core")?;
    let rest = rest.trim_start();
    let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    if digits == 0 {
        return None;
    }
    let core_id = rest[..digits].parse().ok()?;
    let rest = rest[digits..].trim_start();
    rest.starts_with("register dump").then_some(core_id)
}

/// Matches one line of whitespace-separated `NAME : 0xHEXVALUE` pairs.
///
/// `Ok(None)` means the line isn't pair-shaped at all (blank, prose, the
/// next section header) and ends the register section. A line that starts
/// like a pair but carries a missing or non-hex value is a hard error.
pub fn parse_register_pairs(line: &str) -> Result<Option<Vec<(String, u32)>>> {
    let mut rest = line.trim();
    if rest.is_empty() {
        return Ok(None);
    }

    let mut pairs = Vec::new();
    while !rest.is_empty() {
        let name_end = rest
            .find(|c: char| c == ':' || c.is_whitespace())
            .unwrap_or(rest.len());
        let name = &rest[..name_end];
        if name.is_empty() || !is_register_token(name) {
            if pairs.is_empty() {
                return Ok(None);
            }
            bail!("malformed register pair at {:?}", rest);
        }

        let after_name = rest[name_end..].trim_start();
        let Some(after_colon) = after_name.strip_prefix(':') else {
            // a bare word: prose, not a register line
            if pairs.is_empty() {
                return Ok(None);
            }
            bail!("register {name} is missing its value");
        };

        let value_str = after_colon.trim_start();
        let Some(hex) = value_str.strip_prefix("0x") else {
            bail!("register {name} has a non-hex value at {:?}", value_str);
        };
        let hex_end = hex
            .find(|c: char| !c.is_ascii_hexdigit())
            .unwrap_or(hex.len());
        if hex_end == 0 {
            bail!("register {name} has a non-hex value at {:?}", value_str);
        }
        let value = u32::from_str_radix(&hex[..hex_end], 16)
            .with_context(|| format!("register {name} value out of range"))?;

        rest = &hex[hex_end..];
        if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
            bail!("register {name} has a malformed value at {:?}", value_str);
        }
        rest = rest.trim_start();

        pairs.push((name.to_string(), value));
    }

    Ok(Some(pairs))
}

fn is_register_token(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '/' || c == '_')
}

/// Matches the `Stack memory:` section header.
pub fn parse_stack_header(line: &str) -> bool {
    line.trim_start().starts_with("Stack memory:")
}

/// Matches one stack dump line, `ADDRESS: 0xWORD 0xWORD ...`, returning the
/// line's base address and its 32-bit words in capture order.
///
/// `Ok(None)` means the line isn't stack-line shaped and ends the section;
/// a malformed word on an otherwise matching line is a hard error.
pub fn parse_stack_line(line: &str) -> Result<Option<(u32, Vec<u32>)>> {
    let Some((addr_part, words_part)) = line.trim().split_once(':') else {
        return Ok(None);
    };
    let addr_hex = addr_part.trim();
    let addr_hex = addr_hex.strip_prefix("0x").unwrap_or(addr_hex);
    if addr_hex.is_empty() || !addr_hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(None);
    }
    let addr = u32::from_str_radix(addr_hex, 16)
        .with_context(|| format!("stack line address {addr_hex:?} out of range"))?;

    let mut words = Vec::new();
    for token in words_part.split_whitespace() {
        let word = token
            .strip_prefix("0x")
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .ok_or_else(|| anyhow!("malformed stack word {token:?}"))?;
        words.push(word);
    }
    if words.is_empty() {
        bail!("stack line at {addr:#x} has no data words");
    }

    Ok(Some((addr, words)))
}
