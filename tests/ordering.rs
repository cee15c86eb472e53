//! Property tests for merge ordering across streams.

use proptest::prelude::*;
use tickdb::{
    LoadingOptions, MessageInput, SelectionOptions, StreamOptions, TickCursor, TickDb, Timestamp,
};

const SYMBOLS: &[&str] = &["AAPL", "GOOG", "IBM", "MSFT"];
const TYPES: &[&str] = &["trade", "quote"];

/// (stream, time, symbol, type) of one generated message.
type Row = (usize, i64, usize, usize);

fn arb_rows() -> impl Strategy<Value = Vec<Row>> {
    prop::collection::vec((0..3usize, 0..50i64, 0..SYMBOLS.len(), 0..TYPES.len()), 0..200)
}

/// Observable identity of a delivered message.
type Seen = (Timestamp, String, String, String, u64);

fn load(rows: &[Row], batch: usize) -> (TickDb, Vec<tickdb::TickStream>) {
    let db = TickDb::in_memory();
    let streams: Vec<_> = (0..3)
        .map(|i| {
            db.create_stream(&format!("s{}", i), StreamOptions::polymorphic(Vec::new()))
                .unwrap()
        })
        .collect();

    let mut loaders: Vec<_> = streams
        .iter()
        .map(|s| s.create_loader(LoadingOptions::default()).unwrap())
        .collect();
    for (n, (stream, time, symbol, kind)) in rows.iter().enumerate() {
        let input = MessageInput::new(TYPES[*kind], SYMBOLS[*symbol], Timestamp(*time));
        loaders[*stream].send(input).unwrap();
        if (n + 1) % batch == 0 {
            loaders[*stream].flush().unwrap();
        }
    }
    for loader in &mut loaders {
        loader.close().unwrap();
    }
    drop(loaders);
    (db, streams)
}

fn collect(cursor: &mut TickCursor) -> Vec<Seen> {
    let mut seen = Vec::new();
    while let Some(message) = cursor.next().unwrap() {
        seen.push((
            message.timestamp,
            cursor.current_stream_key().unwrap().to_string(),
            message.symbol.to_string(),
            message.type_name.to_string(),
            message.sequence,
        ));
    }
    seen
}

proptest! {
    #[test]
    fn prop_forward_read_is_time_ordered_and_complete(rows in arb_rows(), batch in 1..20usize) {
        let (db, streams) = load(&rows, batch);
        let mut cursor = db
            .select(Timestamp::MIN, &streams, SelectionOptions::default(), None, None)
            .unwrap();
        let seen = collect(&mut cursor);

        prop_assert_eq!(seen.len(), rows.len());
        prop_assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));

        let mut expected: Vec<i64> = rows.iter().map(|r| r.1).collect();
        expected.sort_unstable();
        let times: Vec<i64> = seen.iter().map(|s| s.0 .0).collect();
        prop_assert_eq!(times, expected);
    }

    #[test]
    fn prop_reverse_read_mirrors_forward(rows in arb_rows()) {
        let (db, streams) = load(&rows, 7);
        let mut forward = db
            .select(Timestamp::MIN, &streams, SelectionOptions::default(), None, None)
            .unwrap();
        let reverse_options = SelectionOptions { reverse: true, ..Default::default() };
        let mut reverse = db
            .select(Timestamp::MAX, &streams, reverse_options, None, None)
            .unwrap();

        let mut expected = collect(&mut forward);
        expected.reverse();
        prop_assert_eq!(collect(&mut reverse), expected);
    }

    #[test]
    fn prop_window_selects_inclusive_range(rows in arb_rows(), from in 0..50i64, span in 0..50i64) {
        let (db, streams) = load(&rows, 11);
        let options = SelectionOptions {
            from: Some(Timestamp(from)),
            to: Some(Timestamp(from + span)),
            ..Default::default()
        };
        let mut cursor = db.select(Timestamp(from), &streams, options, None, None).unwrap();

        let expected = rows.iter().filter(|r| r.1 >= from && r.1 <= from + span).count();
        prop_assert_eq!(collect(&mut cursor).len(), expected);
    }
}
