use anyhow::Result;
use strum::{Display, EnumString, VariantNames};

use crate::dump::{self, FaultInfo};

pub mod riscv;

/// Chips whose fault dumps we can serve.
///
/// Adding a chip means adding a variant here and pointing it at a
/// `TargetSpec`; the dump grammar and the RSP dispatch never change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, VariantNames)]
#[strum(serialize_all = "lowercase")]
pub enum Target {
    Esp32c2,
    Esp32c3,
    Esp32c6,
    Esp32h2,
}

/// What a target name resolves to: the dump grammar variant for that family
/// and the register order the debugger expects in a `g` reply.
pub struct TargetSpec {
    pub parse: fn(&str) -> Result<FaultInfo>,
    pub gdb_registers: &'static [&'static str],
}

static RISCV: TargetSpec = TargetSpec {
    parse: dump::parse_riscv,
    gdb_registers: riscv::GDB_REGISTERS,
};

impl Target {
    pub fn spec(&self) -> &'static TargetSpec {
        // all current chips are single-core RISC-V and share one family spec
        match self {
            Target::Esp32c2 | Target::Esp32c3 | Target::Esp32c6 | Target::Esp32h2 => &RISCV,
        }
    }
}
