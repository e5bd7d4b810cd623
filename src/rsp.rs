use std::fmt::Write as _;
use std::io::{self, Read, Write};

use anyhow::{Result, bail};
use tracing::{debug, warn};

use crate::dump::FaultInfo;

/// Why the serve loop returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// The debugger ended the session with `k`/`vKill`.
    Killed,
    /// The peer closed its end of the stream.
    Disconnected,
}

enum AckStatus {
    Acked,
    PeerClosed,
}

/// A minimal GDB Remote Serial Protocol server over a frozen `FaultInfo`.
///
/// Single-threaded and fully blocking: one read/dispatch/write loop for the
/// lifetime of the process, serving exactly one debugger connection. The
/// state is immutable, so every command handler is a pure function of the
/// fault dump.
pub struct RspServer<R: Read, W: Write> {
    fault: FaultInfo,
    registers: &'static [&'static str],
    reader: R,
    writer: W,
}

impl<R: Read, W: Write> RspServer<R, W> {
    pub fn new(fault: FaultInfo, registers: &'static [&'static str], reader: R, writer: W) -> Self {
        RspServer {
            fault,
            registers,
            reader,
            writer,
        }
    }

    /// Serve until the debugger kills the session or goes away.
    ///
    /// End-of-stream from the peer, whether mid-packet or in place of an
    /// ack, is a clean disconnect: debuggers routinely drop the pipe without
    /// sending `vKill`. Only an ack byte that is present but not `+` proves
    /// the session is desynchronized, and that is a hard error.
    pub fn run(&mut self) -> Result<SessionEnd> {
        loop {
            let Some(command) = self.read_packet()? else {
                warn!("peer closed the stream; shutting down");
                return Ok(SessionEnd::Disconnected);
            };

            // ack on receipt; the transport is a trusted local pipe, so the
            // checksum is not validated first
            self.writer.write_all(b"+")?;
            self.writer.flush()?;
            debug!(command = %command, "recv");

            match dispatch(&self.fault, self.registers, &command) {
                DispatchResult::Reply(payload) => {
                    if matches!(self.send_packet(&payload)?, AckStatus::PeerClosed) {
                        warn!("peer closed the stream instead of acknowledging");
                        return Ok(SessionEnd::Disconnected);
                    }
                }
                DispatchResult::Exit => {
                    self.send_packet("OK")?;
                    return Ok(SessionEnd::Killed);
                }
            }
        }
    }

    /// Accumulate one `$<payload>#XY` frame and return its payload, or
    /// `None` at end of stream. Bytes before the `$` (stray acks, line
    /// noise) are skipped.
    fn read_packet(&mut self) -> Result<Option<String>> {
        loop {
            match self.read_byte()? {
                None => return Ok(None),
                Some(b'$') => break,
                Some(_) => continue,
            }
        }

        let mut buf: Vec<u8> = Vec::new();
        loop {
            let Some(byte) = self.read_byte()? else {
                return Ok(None);
            };
            buf.push(byte);
            // the frame ends with '#' plus two checksum digits
            if buf.len() >= 3 && buf[buf.len() - 3] == b'#' {
                buf.truncate(buf.len() - 3);
                return Ok(Some(String::from_utf8_lossy(&buf).into_owned()));
            }
        }
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.reader.read_exact(&mut byte) {
            Ok(()) => Ok(Some(byte[0])),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Frame and send one reply, then read the peer's ack byte.
    fn send_packet(&mut self, payload: &str) -> Result<AckStatus> {
        let checksum = payload.bytes().fold(0u8, |sum, b| sum.wrapping_add(b));
        write!(self.writer, "${payload}#{checksum:02x}")?;
        self.writer.flush()?;
        debug!(reply = %payload, "send");

        match self.read_byte()? {
            Some(b'+') => Ok(AckStatus::Acked),
            Some(other) => bail!(
                "protocol desynchronized: expected '+' ack, got {:?}",
                other as char
            ),
            None => Ok(AckStatus::PeerClosed),
        }
    }
}

/// Result of dispatching one command against the frozen fault state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchResult {
    Reply(String),
    /// `k`/`vKill`: acknowledge with `OK`, then shut down cleanly.
    Exit,
}

/// The full command vocabulary. Anything not handled here gets the empty
/// reply, which is the protocol's standard "unsupported" signal; the
/// debugger then falls back to behavior that needs no target support.
pub fn dispatch(fault: &FaultInfo, registers: &[&str], command: &str) -> DispatchResult {
    match command {
        // the client only needs to see "stopped on trap" to start inspecting
        "?" => DispatchResult::Reply("T05".to_string()),
        "qfThreadInfo" => DispatchResult::Reply("m1".to_string()),
        "qC" => DispatchResult::Reply("QC1".to_string()),
        "g" => DispatchResult::Reply(read_all_registers(fault, registers)),
        "k" => DispatchResult::Exit,
        _ if command.starts_with("vKill") => DispatchResult::Exit,
        // only one pseudo-thread exists, so any thread select is fine
        _ if command.starts_with("Hg") || command.starts_with("Hc") => {
            DispatchResult::Reply("OK".to_string())
        }
        _ if command.starts_with('m') => {
            DispatchResult::Reply(read_memory(fault, &command[1..]))
        }
        _ => DispatchResult::Reply(String::new()),
    }
}

fn read_all_registers(fault: &FaultInfo, registers: &[&str]) -> String {
    let mut payload = String::with_capacity(registers.len() * 8);
    for name in registers {
        let value = fault.registers.get(*name).copied().unwrap_or(0);
        for byte in value.to_le_bytes() {
            let _ = write!(payload, "{byte:02x}");
        }
    }
    payload
}

/// `m<hex-addr>,<hex-len>`. Bytes outside the captured stack range read as
/// zero: code and rodata are resolved by the debugger from its own symbol
/// file and are never requested from us with meaningful content.
fn read_memory(fault: &FaultInfo, args: &str) -> String {
    let Some((addr, len)) = parse_memory_args(args) else {
        return String::new();
    };
    let base = fault.stack_base_addr as u64;
    let end = base + fault.stack_data.len() as u64;

    let mut payload = String::with_capacity(len as usize * 2);
    for a in addr..addr.saturating_add(len) {
        let byte = if a >= base && a < end {
            fault.stack_data[(a - base) as usize]
        } else {
            0
        };
        let _ = write!(payload, "{byte:02x}");
    }
    payload
}

fn parse_memory_args(args: &str) -> Option<(u64, u64)> {
    let (addr, len) = args.split_once(',')?;
    let addr = u64::from_str_radix(addr, 16).ok()?;
    let len = u64::from_str_radix(len, 16).ok()?;
    Some((addr, len))
}
