//! Shared fixture for the integration tests: three market-data streams loaded
//! with one message per second, cycling over a fixed set of symbols.

#![allow(dead_code)]

use std::collections::BTreeSet;
use tickdb::{
    FieldDef, FieldType, FieldValue, LoadingOptions, MessageInput, NextResult, StreamOptions,
    TickCursor, TickDb, TickStream, Timestamp, TypeDescriptor,
};

pub const TRADE: &str = "deltix.timebase.api.messages.TradeMessage";
pub const BBO: &str = "deltix.timebase.api.messages.BestBidOfferMessage";
pub const BAR: &str = "deltix.timebase.api.messages.BarMessage";
pub const L2: &str = "deltix.timebase.api.messages.L2Message";

pub const BARS_KEY: &str = "bars1min";
pub const TRADE_BBO_KEY: &str = "tradeBBO";
pub const L2_KEY: &str = "l2";

pub const SYMBOLS: &[&str] = &["AAPL", "GOOG", "IBM"];
pub const EXTRA_SYMBOLS: &[&str] = &["MSFT", "ORCL"];

/// Messages per stream in the fixture.
pub const STREAM_SIZE: usize = 10_000;

/// Spacing between consecutive messages.
pub const INTERVAL_MS: i64 = 1_000;

pub struct Fixture {
    pub db: TickDb,
    pub bars: TickStream,
    pub trade_bbo: TickStream,
    pub l2: TickStream,
}

impl Fixture {
    pub fn streams(&self) -> Vec<TickStream> {
        vec![self.bars.clone(), self.trade_bbo.clone(), self.l2.clone()]
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

pub fn ms(millis: i64) -> Timestamp {
    Timestamp::from_millis(millis)
}

// --- Schemas ---

pub fn bar_schema() -> Vec<TypeDescriptor> {
    vec![TypeDescriptor::new(BAR)
        .with_field(FieldDef::new("currencyCode", FieldType::Int))
        .with_field(FieldDef::new("open", FieldType::Float))
        .with_field(FieldDef::new("high", FieldType::Float))
        .with_field(FieldDef::new("low", FieldType::Float))
        .with_field(FieldDef::new("close", FieldType::Float))
        .with_field(FieldDef::new("volume", FieldType::Float))]
}

pub fn trade_bbo_schema() -> Vec<TypeDescriptor> {
    vec![
        TypeDescriptor::new(TRADE)
            .with_field(FieldDef::new("currencyCode", FieldType::Int))
            .with_field(FieldDef::new("exchangeId", FieldType::Text))
            .with_field(FieldDef::new("price", FieldType::Float))
            .with_field(FieldDef::new("size", FieldType::Float))
            .with_field(FieldDef::new("aggressorSide", FieldType::Text).nullable()),
        TypeDescriptor::new(BBO)
            .with_field(FieldDef::new("currencyCode", FieldType::Int))
            .with_field(FieldDef::new("bidPrice", FieldType::Float).nullable())
            .with_field(FieldDef::new("bidSize", FieldType::Float).nullable())
            .with_field(FieldDef::new("offerPrice", FieldType::Float).nullable())
            .with_field(FieldDef::new("offerSize", FieldType::Float).nullable()),
    ]
}

// --- Loading ---

/// Load `count` bars starting at `start_ms`, one per interval, cycling
/// through `symbols`.
pub fn load_bars(stream: &TickStream, count: usize, start_ms: i64, symbols: &[&str]) -> usize {
    let mut loader = stream.create_loader(LoadingOptions::default()).unwrap();
    for i in 0..count {
        let price = (i % 100) as f64;
        let input = MessageInput::new(BAR, symbols[i % symbols.len()], ms(start_ms + i as i64 * INTERVAL_MS))
            .with_field("currencyCode", FieldValue::Int(840))
            .with_field("open", FieldValue::Float(price))
            .with_field("high", FieldValue::Float(price + 1.0))
            .with_field("low", FieldValue::Float(price - 1.0))
            .with_field("close", FieldValue::Float(price + 0.5))
            .with_field("volume", FieldValue::Float(i as f64));
        loader.send(input).unwrap();
    }
    loader.close().unwrap();
    count
}

/// Load `count` trade/quote pairs sharing timestamps. Returns the number of
/// messages loaded.
pub fn load_trade_bbo(stream: &TickStream, count: usize, start_ms: i64, symbols: &[&str]) -> usize {
    let mut loader = stream.create_loader(LoadingOptions::default()).unwrap();
    for i in 0..count {
        let symbol = symbols[i % symbols.len()];
        let time = ms(start_ms + i as i64 * INTERVAL_MS);
        let price = (i % 100) as f64;

        let trade = MessageInput::new(TRADE, symbol, time)
            .with_field("currencyCode", FieldValue::Int(840))
            .with_field("exchangeId", FieldValue::Text("NYSE".into()))
            .with_field("price", FieldValue::Float(price))
            .with_field("size", FieldValue::Float((i % 1000) as f64))
            .with_field("aggressorSide", FieldValue::Text("BUY".into()));
        loader.send(trade).unwrap();

        let quote = MessageInput::new(BBO, symbol, time)
            .with_field("currencyCode", FieldValue::Int(840))
            .with_field("bidPrice", FieldValue::Float(price - 0.1))
            .with_field("bidSize", FieldValue::Float(100.0))
            .with_field("offerPrice", FieldValue::Float(price + 0.1))
            .with_field("offerSize", FieldValue::Null);
        loader.send(quote).unwrap();
    }
    loader.close().unwrap();
    count * 2
}

/// Load `count` book updates into a polymorphic stream.
pub fn load_l2(stream: &TickStream, count: usize, start_ms: i64, symbols: &[&str]) -> usize {
    let mut loader = stream.create_loader(LoadingOptions::default()).unwrap();
    for i in 0..count {
        let input = MessageInput::new(L2, symbols[i % symbols.len()], ms(start_ms + i as i64 * INTERVAL_MS))
            .with_field("exchangeId", FieldValue::Text("NYSE".into()))
            .with_field("isImplied", FieldValue::Bool(false))
            .with_field("level", FieldValue::Int((i % 10) as i64))
            .with_field("price", FieldValue::Float((i % 100) as f64));
        loader.send(input).unwrap();
    }
    loader.close().unwrap();
    count
}

/// In-memory database with the three fixture streams loaded.
pub fn fixture() -> Fixture {
    init_tracing();
    let db = TickDb::in_memory();

    let bars = db.create_stream(BARS_KEY, StreamOptions::fixed(bar_schema())).unwrap();
    let trade_bbo = db
        .create_stream(TRADE_BBO_KEY, StreamOptions::fixed(trade_bbo_schema()))
        .unwrap();
    let l2 = db.create_stream(L2_KEY, StreamOptions::polymorphic(Vec::new())).unwrap();

    load_bars(&bars, STREAM_SIZE, 0, SYMBOLS);
    load_trade_bbo(&trade_bbo, STREAM_SIZE / 2, 0, SYMBOLS);
    load_l2(&l2, STREAM_SIZE, 0, SYMBOLS);

    Fixture { db, bars, trade_bbo, l2 }
}

// --- Reading ---

/// Read a historical cursor to the end with blocking reads.
pub fn read_all(cursor: &mut TickCursor) -> Vec<Timestamp> {
    let mut times = Vec::new();
    while let Some(message) = cursor.next().unwrap() {
        times.push(message.timestamp);
    }
    times
}

/// Read with non-blocking reads until the cursor stops producing.
/// Returns the count and the final result.
pub fn drain_available(cursor: &mut TickCursor) -> (usize, NextResult) {
    let mut count = 0;
    loop {
        match cursor.next_if_available().unwrap() {
            NextResult::Available(_) => count += 1,
            other => return (count, other),
        }
    }
}

/// Type names and symbols of the next `count` messages.
pub fn sample(cursor: &mut TickCursor, count: usize) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut types = BTreeSet::new();
    let mut symbols = BTreeSet::new();
    for _ in 0..count {
        let message = cursor.next().unwrap().expect("cursor ended early");
        types.insert(message.type_name.to_string());
        symbols.insert(message.symbol.to_string());
    }
    (types, symbols)
}

pub fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}
