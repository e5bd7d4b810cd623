
use std::collections::HashMap;
use std::io::Cursor;

use anyhow::Result;
use panicdb::dump::{FaultInfo, parse_riscv};
use panicdb::rsp::{DispatchResult, RspServer, SessionEnd, dispatch};
use panicdb::target::Target;

fn fault_with_stack(stack_base_addr: u32, stack_data: Vec<u8>) -> FaultInfo {
    FaultInfo {
        core_id: 0,
        registers: HashMap::new(),
        stack_base_addr,
        stack_data,
    }
}

fn reply(fault: &FaultInfo, command: &str) -> String {
    match dispatch(fault, Target::Esp32c3.spec().gdb_registers, command) {
        DispatchResult::Reply(payload) => payload,
        DispatchResult::Exit => panic!("command {command:?} should not end the session"),
    }
}

/// Frame a command the way a debugger client would.
fn frame(payload: &str) -> String {
    let checksum = payload.bytes().fold(0u8, |sum, b| sum.wrapping_add(b));
    format!("${payload}#{checksum:02x}")
}

/// Split the server's raw output into reply payloads, checking that every
/// received command was acked with `+` and that every emitted checksum is
/// the payload's ASCII sum mod 256 in lowercase hex.
fn split_session(text: &str) -> Vec<String> {
    let mut replies = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let body = rest
            .strip_prefix('+')
            .expect("each command is acked before its reply")
            .strip_prefix('$')
            .expect("replies are framed");
        let (payload, tail) = body.split_once('#').expect("replies carry a checksum");
        let (checksum, tail) = tail.split_at(2);
        let expected = payload.bytes().fold(0u8, |sum, b| sum.wrapping_add(b));
        assert_eq!(checksum, format!("{expected:02x}"), "checksum of {payload:?}");
        replies.push(payload.to_string());
        rest = tail;
    }
    replies
}

#[test]
fn register_payload_round_trips() {
    let gdb_registers = Target::Esp32c3.spec().gdb_registers;
    let mut registers = HashMap::new();
    registers.insert("MEPC".to_string(), 0x4200_232c);
    registers.insert("RA".to_string(), 0x4200_9694);
    registers.insert("S0/FP".to_string(), 0x3fc9_3ab0);
    registers.insert("A5".to_string(), 0xdead_beef);

    let fault = FaultInfo {
        core_id: 0,
        registers: registers.clone(),
        stack_base_addr: 0x3fc9_3a80,
        stack_data: Vec::new(),
    };
    let payload = reply(&fault, "g");
    assert_eq!(payload.len(), gdb_registers.len() * 8);
    // the fault PC leads the reply
    assert!(payload.starts_with("2c234200"));

    // regrouping into little-endian words in declared order reconstructs
    // the inputs, with 0 for every register absent from the dump
    for (i, name) in gdb_registers.iter().enumerate() {
        let word = &payload[i * 8..(i + 1) * 8];
        let bytes: Vec<u8> = (0..4)
            .map(|j| u8::from_str_radix(&word[j * 2..j * 2 + 2], 16).unwrap())
            .collect();
        let value = u32::from_le_bytes(bytes.try_into().unwrap());
        assert_eq!(
            value,
            registers.get(*name).copied().unwrap_or(0),
            "register {name}"
        );
    }
}

#[test]
fn memory_reads_respect_capture_boundaries() {
    // 16 bytes of stack, values 0x30..=0x3f
    let fault = fault_with_stack(0x3fc9_3a80, (0x30..0x40).collect());

    // fully inside: the literal captured bytes
    assert_eq!(reply(&fault, "m3fc93a80,4"), "30313233");
    // fully before the base: fabricated zeros
    assert_eq!(reply(&fault, "m3fc93a7c,4"), "00000000");
    // spanning the start: zeros, then the captured prefix
    assert_eq!(reply(&fault, "m3fc93a7e,4"), "00003031");
    // spanning the end: the captured suffix, then zeros
    assert_eq!(reply(&fault, "m3fc93a8e,4"), "3e3f0000");
    // fully after the end
    assert_eq!(reply(&fault, "m3fc93a90,2"), "0000");
}

#[test]
fn fixed_replies_and_unsupported_commands() {
    let fault = fault_with_stack(0, Vec::new());
    let gdb_registers = Target::Esp32c3.spec().gdb_registers;

    assert_eq!(reply(&fault, "?"), "T05");
    assert_eq!(reply(&fault, "qfThreadInfo"), "m1");
    assert_eq!(reply(&fault, "qC"), "QC1");
    assert_eq!(reply(&fault, "Hg0"), "OK");
    assert_eq!(reply(&fault, "Hc-1"), "OK");

    // unsupported commands get the empty reply, the standard negotiation signal
    assert_eq!(reply(&fault, "qSupported:multiprocess+;swbreak+"), "");
    assert_eq!(reply(&fault, "vMustReplyEmpty"), "");
    assert_eq!(reply(&fault, "s"), "");
    // a malformed memory read is unsupported, not fatal
    assert_eq!(reply(&fault, "mzz,4"), "");

    assert_eq!(
        dispatch(&fault, gdb_registers, "k"),
        DispatchResult::Exit
    );
    assert_eq!(
        dispatch(&fault, gdb_registers, "vKill;a410"),
        DispatchResult::Exit
    );
}

#[test]
fn serves_a_full_debugger_session() -> Result<()> {
    let fault = parse_riscv(fixtures::esp32c3_panic())?;
    let spec = Target::Esp32c3.spec();

    // a scripted client: initial ack, then each command followed by the ack
    // for our reply
    let mut input = String::from("+");
    for command in ["qSupported:multiprocess+", "?", "g", "m3fc93a80,4", "k"] {
        input.push_str(&frame(command));
        input.push('+');
    }

    let mut output = Vec::new();
    let mut server = RspServer::new(
        fault,
        spec.gdb_registers,
        Cursor::new(input.into_bytes()),
        &mut output,
    );
    assert_eq!(server.run()?, SessionEnd::Killed);

    let replies = split_session(std::str::from_utf8(&output)?);
    assert_eq!(replies.len(), 5);
    assert_eq!(replies[0], "");
    assert_eq!(replies[1], "T05");
    assert!(replies[2].starts_with("2c234200"), "g reply leads with MEPC");
    assert_eq!(replies[2].len(), spec.gdb_registers.len() * 8);
    assert_eq!(replies[3], "30000000");
    assert_eq!(replies[4], "OK");

    Ok(())
}

#[test]
fn bad_ack_byte_is_a_desynchronization_error() {
    let fault = fault_with_stack(0x3fc9_3a80, vec![0; 4]);
    let input = format!("+{}-", frame("?"));

    let mut output = Vec::new();
    let mut server = RspServer::new(
        fault,
        Target::Esp32c3.spec().gdb_registers,
        Cursor::new(input.into_bytes()),
        &mut output,
    );
    let err = server.run().unwrap_err();
    assert!(err.to_string().contains("desynchronized"), "{err:#}");
}

#[test]
fn peer_eof_is_a_clean_disconnect() {
    let gdb_registers = Target::Esp32c3.spec().gdb_registers;

    // nothing at all
    let mut output = Vec::new();
    let mut server = RspServer::new(
        fault_with_stack(0, Vec::new()),
        gdb_registers,
        Cursor::new(Vec::new()),
        &mut output,
    );
    assert_eq!(server.run().unwrap(), SessionEnd::Disconnected);

    // stream ends mid-packet
    let mut output = Vec::new();
    let mut server = RspServer::new(
        fault_with_stack(0, Vec::new()),
        gdb_registers,
        Cursor::new(b"+$g#6".to_vec()),
        &mut output,
    );
    assert_eq!(server.run().unwrap(), SessionEnd::Disconnected);

    // command received, but the peer vanishes instead of acking our reply
    let mut output = Vec::new();
    let mut server = RspServer::new(
        fault_with_stack(0, Vec::new()),
        gdb_registers,
        Cursor::new(frame("?").into_bytes()),
        &mut output,
    );
    assert_eq!(server.run().unwrap(), SessionEnd::Disconnected);
    let replies = split_session(std::str::from_utf8(&output).unwrap());
    assert_eq!(replies, vec!["T05".to_string()]);
}
