//! Integration tests for non-blocking cursor reads.

mod common;

use common::*;
use tickdb::{NextResult, SelectionOptions, StreamOptions, Timestamp};

// --- Historical Cursors ---

#[test]
fn test_next_if_available_reads_stream() {
    let fx = fixture();
    let mut cursor = fx.bars.create_cursor(SelectionOptions::default()).unwrap();

    let (count, last) = drain_available(&mut cursor);
    assert_eq!(count, STREAM_SIZE);
    assert_eq!(last, NextResult::EndOfCursor);
}

#[test]
fn test_next_if_available_over_streams() {
    let fx = fixture();
    let mut cursor = fx
        .db
        .select(Timestamp::MIN, &fx.streams(), SelectionOptions::default(), None, None)
        .unwrap();

    let mut previous = Timestamp::MIN;
    let mut count = 0;
    while let NextResult::Available(message) = cursor.next_if_available().unwrap() {
        assert!(message.timestamp >= previous);
        previous = message.timestamp;
        count += 1;
    }
    assert_eq!(count, 3 * STREAM_SIZE);
}

#[test]
fn test_next_if_available_reverse() {
    let fx = fixture();
    let options = SelectionOptions {
        reverse: true,
        ..Default::default()
    };
    let mut cursor = fx.trade_bbo.create_cursor(options).unwrap();

    let mut previous = Timestamp::MAX;
    let mut count = 0;
    while let NextResult::Available(message) = cursor.next_if_available().unwrap() {
        assert!(message.timestamp <= previous);
        previous = message.timestamp;
        count += 1;
    }
    assert_eq!(count, STREAM_SIZE);
    assert_eq!(previous, ms(0));
}

#[test]
fn test_next_if_available_after_reset() {
    let fx = fixture();
    let mut cursor = fx.l2.create_cursor(SelectionOptions::default()).unwrap();
    let (count, _) = drain_available(&mut cursor);
    assert_eq!(count, STREAM_SIZE);

    cursor.reset(ms(9_000_000), None).unwrap();
    let (count, last) = drain_available(&mut cursor);
    assert_eq!(count, 1000);
    assert_eq!(last, NextResult::EndOfCursor);
}

#[test]
fn test_end_of_cursor_is_not_sticky() {
    let fx = fixture();
    let mut cursor = fx.bars.create_cursor(SelectionOptions::default()).unwrap();
    drain_available(&mut cursor);
    assert_eq!(cursor.next_if_available().unwrap(), NextResult::EndOfCursor);

    load_bars(&fx.bars, 3, 20_000_000, SYMBOLS);
    let (count, last) = drain_available(&mut cursor);
    assert_eq!(count, 3);
    assert_eq!(last, NextResult::EndOfCursor);
}

// --- Empty Subscriptions ---

#[test]
fn test_empty_filter_ends_historical_cursor() {
    let fx = fixture();
    let mut cursor = fx
        .bars
        .select(Timestamp::MIN, SelectionOptions::default(), Some(&[]), None)
        .unwrap();
    assert_eq!(cursor.next_if_available().unwrap(), NextResult::EndOfCursor);
    assert!(cursor.next().unwrap().is_none());
}

#[test]
fn test_empty_filter_leaves_live_cursor_pending() {
    let fx = fixture();
    let options = SelectionOptions {
        live: true,
        ..Default::default()
    };
    let mut cursor = fx
        .bars
        .select(Timestamp::MIN, options, None, Some(&[]))
        .unwrap();
    assert_eq!(cursor.next_if_available().unwrap(), NextResult::Pending);

    cursor.add_entity("IBM").unwrap();
    let (count, last) = drain_available(&mut cursor);
    assert_eq!(count, 3333);
    assert_eq!(last, NextResult::Pending);
}

#[test]
fn test_empty_stream() {
    let fx = fixture();
    let empty = fx
        .db
        .create_stream("empty", StreamOptions::polymorphic(Vec::new()))
        .unwrap();

    let mut historical = empty.create_cursor(SelectionOptions::default()).unwrap();
    assert_eq!(historical.next_if_available().unwrap(), NextResult::EndOfCursor);

    let mut live = empty
        .create_cursor(SelectionOptions {
            live: true,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(live.next_if_available().unwrap(), NextResult::Pending);

    load_l2(&empty, 5, 0, SYMBOLS);
    assert_eq!(drain_available(&mut live), (5, NextResult::Pending));
    assert_eq!(drain_available(&mut historical), (5, NextResult::EndOfCursor));
}
