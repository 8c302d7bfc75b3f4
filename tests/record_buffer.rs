// tests/record_buffer.rs

use proptest::prelude::*;

use cronvisor::buffer::{RecordBuffer, RecordStatus};

/// Feed `chunks` one after the other and collect every record.
fn collect(chunks: &[&[u8]]) -> (Vec<String>, RecordBuffer) {
    let mut buf = RecordBuffer::new();
    let mut out = Vec::new();
    for chunk in chunks {
        buf.feed(chunk, &mut |r: &str| {
            out.push(r.to_string());
            RecordStatus::Continue
        });
    }
    (out, buf)
}

#[test]
fn splits_on_newlines_and_keeps_the_tail() {
    let (records, buf) = collect(&[b"alpha\nbeta\ngam"]);
    assert_eq!(records, vec!["alpha", "beta"]);
    assert_eq!(buf.pending_len(), 3);
    assert!(!buf.has_complete_record());
}

#[test]
fn record_split_across_feeds_is_surfaced_once_complete() {
    let (records, buf) = collect(&[b"hel", b"lo wo", b"rld\n"]);
    assert_eq!(records, vec!["hello world"]);
    assert_eq!(buf.pending_len(), 0);
}

#[test]
fn escaped_newline_does_not_end_a_record() {
    let (records, _) = collect(&[b"one\\\ntwo\nthree\n"]);
    assert_eq!(records, vec!["one\\\ntwo", "three"]);
}

#[test]
fn trailing_escape_waits_for_the_next_byte() {
    let (records, buf) = collect(&[b"abc\\", b"\nstill abc\n"]);
    assert_eq!(records, vec!["abc\\\nstill abc"]);
    assert_eq!(buf.pending_len(), 0);
}

#[test]
fn empty_records_are_passed_through() {
    let (records, _) = collect(&[b"\n\nx\n"]);
    assert_eq!(records, vec!["", "", "x"]);
}

#[test]
fn boundary_stops_consumption_and_keeps_the_rest() {
    let mut buf = RecordBuffer::new();
    let mut seen = Vec::new();
    let mut handler = |r: &str| {
        seen.push(r.to_string());
        if r == "stop" {
            RecordStatus::Boundary
        } else {
            RecordStatus::Continue
        }
    };

    let status = buf.feed(b"a\nstop\nb\nc\n", &mut handler);
    assert_eq!(status, RecordStatus::Boundary);
    assert!(buf.has_complete_record());

    let status = buf.flush(&mut handler);
    assert_eq!(status, RecordStatus::Continue);
    assert_eq!(seen, vec!["a", "stop", "b", "c"]);
    assert_eq!(buf.pending_len(), 0);
}

#[test]
fn flush_never_invents_a_record_from_the_tail() {
    let mut buf = RecordBuffer::new();
    let mut count = 0;
    buf.feed(b"no newline", &mut |_: &str| {
        count += 1;
        RecordStatus::Continue
    });
    buf.flush(&mut |_: &str| {
        count += 1;
        RecordStatus::Continue
    });
    assert_eq!(count, 0);
    assert_eq!(buf.take_partial().as_deref(), Some("no newline"));
    assert_eq!(buf.take_partial(), None);
}

#[test]
fn invalid_utf8_is_replaced_not_rejected() {
    let (records, _) = collect(&[&[b'o', b'k', 0xff, b'\n']]);
    assert_eq!(records, vec!["ok\u{fffd}"]);
}

/// Cut `data` at the given (sorted, deduplicated) positions.
fn split_at_points(data: &[u8], mut cuts: Vec<usize>) -> Vec<&[u8]> {
    cuts.retain(|&c| c > 0 && c < data.len());
    cuts.sort_unstable();
    cuts.dedup();

    let mut chunks = Vec::new();
    let mut last = 0;
    for c in cuts {
        chunks.push(&data[last..c]);
        last = c;
    }
    chunks.push(&data[last..]);
    chunks
}

proptest! {
    #[test]
    fn chunking_does_not_change_the_records(
        data in proptest::collection::vec(
            prop_oneof![Just(b'\n'), Just(b'\\'), Just(b'-'), b'a'..=b'z'],
            0..200,
        ),
        cuts in proptest::collection::vec(0usize..200, 0..20),
    ) {
        let (whole, whole_buf) = collect(&[data.as_slice()]);
        let chunks = split_at_points(&data, cuts);
        let (pieces, pieces_buf) = collect(&chunks);

        prop_assert_eq!(whole, pieces);
        prop_assert_eq!(whole_buf.pending_len(), pieces_buf.pending_len());
    }
}
