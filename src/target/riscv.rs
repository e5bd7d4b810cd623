/// Register order for a `g` reply, as the debugger expects it for the ESP
/// RISC-V chips. Values are 32 bits, rendered little-endian.
///
/// The panic handler prints registers by their ABI names (the fault PC is
/// reported in MEPC); X0 is hardwired to zero and never printed, so any name
/// missing from a dump simply reads as 0.
pub static GDB_REGISTERS: &[&str] = &[
    "MEPC", "RA", "SP", "GP", "TP", "T0", "T1", "T2",
    "S0/FP", "S1", "A0", "A1", "A2", "A3", "A4", "A5",
    "A6", "A7", "S2", "S3", "S4", "S5", "S6", "S7",
    "S8", "S9", "S10", "S11", "T3", "T4", "T5", "T6",
];

/// Every name the fault handler may legally print in a register dump: the
/// GDB-visible set above plus the machine CSRs it appends. Anything else in
/// a dump is a parse error.
pub static DUMP_REGISTERS: phf::Set<&'static str> = phf::phf_set! {
    "MEPC", "RA", "SP", "GP", "TP", "T0", "T1", "T2",
    "S0/FP", "S1", "A0", "A1", "A2", "A3", "A4", "A5",
    "A6", "A7", "S2", "S3", "S4", "S5", "S6", "S7",
    "S8", "S9", "S10", "S11", "T3", "T4", "T5", "T6",
    "MSTATUS", "MTVEC", "MCAUSE", "MTVAL", "MHARTID",
};
