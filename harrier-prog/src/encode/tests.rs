use super::*;
use crate::{CsumChunk, Dir, ProgramBuilder};
use harrier_wire::{CsumKind, WordReader, WORD_SIZE};
use test_case::test_case;

const LAYOUT: Layout = Layout {
    page_size: 4096,
    data_offset: 0x1_0000,
};

fn encode(prog: &Program) -> Vec<u8> {
    let mut buf = vec![0u8; 4096];
    let len = serialize(prog, &LAYOUT, 0, &mut buf).expect("serialize");
    buf.truncate(len);
    buf
}

fn words(buf: &[u8]) -> Vec<Word> {
    assert_eq!(buf.len() % WORD_SIZE, 0);
    let mut r = WordReader::new(buf);
    let mut out = Vec::new();
    while let Ok(w) = r.read_word() {
        out.push(w);
    }
    out
}

#[test_case(2, 0 => 2 * 4096 + 0x1_0000 ; "page base")]
#[test_case(0, 16 => 0x1_0000 + 16 ; "positive offset")]
#[test_case(1, -8 => 4096 + 0x1_0000 + 4096 - 8 ; "negative offset counts from page end")]
fn physical_addr_formula(page_index: u64, page_offset: i64) -> u64 {
    LAYOUT.physical_addr(page_index, page_offset)
}

#[test]
fn lone_call_with_data_and_const_args() {
    let mut b = ProgramBuilder::default();
    let path = b.data_arg(Dir::In, b"/x".to_vec());
    let flags = b.const_arg(8, 0);
    b.call(2, vec![path, flags]);

    let buf = encode(&b.finish());
    assert_eq!(
        words(&buf),
        vec![
            2,                        // call id
            NO_COPYOUT,               // return unused
            2,                        // num_args
            ArgKind::Data.into(),     // arg 0
            2,                        // byte length
            u64::from_le_bytes(*b"/x\0\0\0\0\0\0"),
            ArgKind::Const.into(),    // arg 1
            8,
            0,
            0,
            0,
            INSTR_EOF,
        ],
    );
}

#[test]
fn return_slot_feeds_a_later_result_arg() {
    let mut b = ProgramBuilder::default();
    let ret = b.call(22, vec![]);
    let res = b.result_of(8, ret, 1, 0);
    b.call(23, vec![res]);

    let buf = encode(&b.finish());
    assert_eq!(
        words(&buf),
        vec![
            22,
            0, // first copyout slot goes to the used return
            0,
            23,
            NO_COPYOUT,
            1,
            ArgKind::Result.into(),
            8,
            0, // referenced slot
            1, // op_div
            0, // op_add
            INSTR_EOF,
        ],
    );
}

#[test]
fn copyout_slots_are_dense_and_in_encounter_order() {
    let mut b = ProgramBuilder::default();
    let inner = b.const_arg(4, 0x11);
    let grp = b.group(vec![(0, inner)]);
    let ptr = b.pointer_to(0, 0, Some(grp));
    let ret = b.call(1, vec![ptr]);
    let from_ret = b.result_of(8, ret, 0, 0);
    let from_mem = b.result_of(4, inner, 0, 0);
    b.call(2, vec![from_ret, from_mem]);

    let addr = LAYOUT.physical_addr(0, 0);
    let buf = encode(&b.finish());
    assert_eq!(
        words(&buf),
        vec![
            // copyin of the group's only field
            INSTR_COPYIN,
            addr,
            ArgKind::Const.into(),
            4,
            0x11,
            0,
            0,
            // call 1: return takes slot 0
            1,
            0,
            1,
            ArgKind::Const.into(),
            8,
            addr,
            0,
            0,
            // memory capture takes slot 1
            INSTR_COPYOUT,
            1,
            addr,
            4,
            // call 2 consumes both slots
            2,
            NO_COPYOUT,
            2,
            ArgKind::Result.into(),
            8,
            0,
            0,
            0,
            ArgKind::Result.into(),
            4,
            1,
            0,
            0,
            INSTR_EOF,
        ],
    );
}

#[test]
fn checksum_copyins_come_last_in_reverse_address_order() {
    let mut b = ProgramBuilder::default();
    let payload = b.data_arg(Dir::In, vec![0xaa; 4]);
    let low = b.csum_inet(vec![CsumChunk::Data { arg: payload, size: 4 }]);
    let high = b.csum_inet(vec![CsumChunk::Const { value: 0x1234, size: 2 }]);
    let grp = b.group(vec![(0, payload), (4, low), (8, high)]);
    let ptr = b.pointer_to(0, 0, Some(grp));
    b.call(1, vec![ptr]);

    let buf = encode(&b.finish());
    let w = words(&buf);

    // One data copyin, then the two checksum copyins.
    let copyins: Vec<usize> = w
        .iter()
        .enumerate()
        .filter(|(_, word)| **word == INSTR_COPYIN)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(copyins.len(), 3);

    let base = LAYOUT.physical_addr(0, 0);
    // Address words follow the instruction words.
    assert_eq!(w[copyins[0] + 1], base);
    assert_eq!(w[copyins[1] + 1], base + 8, "farthest checksum first");
    assert_eq!(w[copyins[2] + 1], base + 4);
    assert_eq!(w[copyins[1] + 2], ArgKind::Csum.into());
    assert_eq!(w[copyins[2] + 2], ArgKind::Csum.into());
    // The data chunk resolved to the payload's physical address.
    assert_eq!(&w[copyins[2] + 2..copyins[2] + 9], &[
        ArgKind::Csum.into(),
        2,
        CsumKind::Inet.into(),
        1,
        ChunkKind::Data.into(),
        base,
        4,
    ]);
}

#[test]
fn out_pad_and_empty_nodes_are_not_copied_in() {
    let mut b = ProgramBuilder::default();
    let kept = b.const_arg(4, 7);
    let pad = b.pad_arg(4);
    let out = b.data_arg(Dir::Out, vec![1, 2, 3]);
    let empty = b.data_arg(Dir::In, Vec::new());
    let grp = b.group(vec![(0, kept), (4, pad), (8, out), (11, empty)]);
    let ptr = b.pointer_to(0, 0, Some(grp));
    b.call(1, vec![ptr]);

    let w = words(&encode(&b.finish()));
    let copyins = w.iter().filter(|word| **word == INSTR_COPYIN).count();
    assert_eq!(copyins, 1);
}

#[test]
fn five_byte_data_copyin_occupies_one_padded_word() {
    let mut b = ProgramBuilder::default();
    let data = b.data_arg(Dir::In, vec![1, 2, 3, 4, 5]);
    let ptr = b.pointer_to(0, 0, Some(data));
    b.call(1, vec![ptr]);

    let buf = encode(&b.finish());
    assert_eq!(
        words(&buf),
        vec![
            INSTR_COPYIN,
            LAYOUT.physical_addr(0, 0),
            ArgKind::Data.into(),
            5,
            u64::from_le_bytes([1, 2, 3, 4, 5, 0, 0, 0]),
            1,
            NO_COPYOUT,
            1,
            ArgKind::Const.into(),
            8,
            LAYOUT.physical_addr(0, 0),
            0,
            0,
            INSTR_EOF,
        ],
    );
}

#[test]
fn nested_pointer_cell_is_copied_in_and_chased() {
    let mut b = ProgramBuilder::default();
    let leaf = b.const_arg(2, 0x22);
    let inner_ptr = b.pointer_to(1, 0, Some(leaf));
    let grp = b.group(vec![(0, inner_ptr)]);
    let outer = b.pointer_to(0, 0, Some(grp));
    b.call(1, vec![outer]);

    let w = words(&encode(&b.finish()));
    let outer_addr = LAYOUT.physical_addr(0, 0);
    let inner_addr = LAYOUT.physical_addr(1, 0);
    // Pointer cell written with the resolved address as an immediate.
    assert_eq!(
        &w[..7],
        &[
            INSTR_COPYIN,
            outer_addr,
            ArgKind::Const.into(),
            8,
            inner_addr,
            0,
            0,
        ],
    );
    // Then the leaf behind it.
    assert_eq!(
        &w[7..14],
        &[
            INSTR_COPYIN,
            inner_addr,
            ArgKind::Const.into(),
            2,
            0x22,
            0,
            0,
        ],
    );
}

#[test]
fn bitfield_slices_pass_through_the_copyin_encoding() {
    let mut b = ProgramBuilder::default();
    let bf = b.bitfield_arg(4, 0b101, 3, 3);
    let ptr = b.pointer_to(0, 0, Some(bf));
    b.call(1, vec![ptr]);

    let w = words(&encode(&b.finish()));
    assert_eq!(
        &w[..7],
        &[
            INSTR_COPYIN,
            LAYOUT.physical_addr(0, 0),
            ArgKind::Const.into(),
            4,
            0b101,
            3,
            3,
        ],
    );
}

#[test]
fn pid_stride_partitions_const_values() {
    let mut b = ProgramBuilder::default();
    let port = b.pid_arg(2, 20000, 4);
    b.call(1, vec![port]);
    let prog = b.finish();

    let mut buf = vec![0u8; 256];
    let len = serialize(&prog, &LAYOUT, 3, &mut buf).unwrap();
    let w = words(&buf[..len]);
    assert_eq!(w[5], 20012);
}

#[test]
fn unlinked_result_is_inlined_as_const() {
    let mut b = ProgramBuilder::default();
    let res = b.result_literal(4, 0xabc);
    b.call(1, vec![res]);

    let w = words(&encode(&b.finish()));
    assert_eq!(
        &w[3..8],
        &[ArgKind::Const.into(), 4, 0xabc, 0, 0],
    );
}

#[test]
fn exhausted_buffer_reports_buffer_too_small() {
    let mut b = ProgramBuilder::default();
    let data = b.data_arg(Dir::In, vec![0x55; 3000]);
    let ptr = b.pointer_to(0, 0, Some(data));
    b.call(1, vec![ptr]);
    let prog = b.finish();

    let mut buf = vec![0u8; 128];
    assert_eq!(
        serialize(&prog, &LAYOUT, 0, &mut buf),
        Err(EncodeError::BufferTooSmall),
    );
}

#[test]
fn result_reference_without_a_slot_is_rejected() {
    // A referent that never lands in pointer-mapped memory has no copyout
    // slot for the dependent call to name.
    let mut b = ProgramBuilder::default();
    let loose = b.const_arg(4, 1);
    b.call(1, vec![loose]);
    let res = b.result_of(4, loose, 0, 0);
    b.call(2, vec![res]);
    let prog = b.finish();

    let mut buf = vec![0u8; 512];
    assert_eq!(
        serialize(&prog, &LAYOUT, 0, &mut buf),
        Err(EncodeError::MissingCopyoutIndex),
    );
}

#[test]
fn too_many_args_is_rejected() {
    let mut b = ProgramBuilder::default();
    let args: Vec<_> = (0..10).map(|i| b.const_arg(8, i)).collect();
    b.call(1, args);
    let prog = b.finish();

    let mut buf = vec![0u8; 1024];
    assert_eq!(
        serialize(&prog, &LAYOUT, 0, &mut buf),
        Err(EncodeError::TooManyArgs {
            call: 0,
            count: 10,
            limit: MAX_ARGS,
        }),
    );
}
