// src/database/schema.rs
// SQL schema definitions for the scanner's tables. Executed by
// PostgresManager::init_tables; kept here so the DDL is reviewable in one
// place.

pub const CREATE_DAILY_CANDLES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS daily_candles (
    id SERIAL PRIMARY KEY,
    ticker VARCHAR NOT NULL,
    date DATE NOT NULL,
    open DOUBLE PRECISION NOT NULL,
    high DOUBLE PRECISION NOT NULL,
    low DOUBLE PRECISION NOT NULL,
    close DOUBLE PRECISION NOT NULL,
    volume BIGINT NOT NULL,
    trading_value DOUBLE PRECISION NOT NULL,
    UNIQUE(ticker, date)
);
"#;

pub const CREATE_BLOCK_CONDITIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS block_conditions (
    id VARCHAR PRIMARY KEY,
    name VARCHAR NOT NULL,
    document JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

pub const CREATE_BLOCK_DETECTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS block_detections (
    id VARCHAR PRIMARY KEY,
    condition_set_id VARCHAR NOT NULL,
    ticker VARCHAR NOT NULL,
    level INTEGER NOT NULL,
    status VARCHAR NOT NULL,
    started_at DATE NOT NULL,
    ended_at DATE,
    entry_open DOUBLE PRECISION NOT NULL,
    entry_high DOUBLE PRECISION NOT NULL,
    entry_low DOUBLE PRECISION NOT NULL,
    entry_close DOUBLE PRECISION NOT NULL,
    entry_volume BIGINT NOT NULL,
    peak_price DOUBLE PRECISION NOT NULL,
    peak_date DATE NOT NULL,
    peak_volume BIGINT NOT NULL,
    exit_reason VARCHAR,
    parent_id VARCHAR,
    pattern_id VARCHAR,
    is_virtual BOOLEAN NOT NULL DEFAULT FALSE,
    spots JSONB NOT NULL DEFAULT '[]',
    UNIQUE(condition_set_id, ticker, level, started_at)
);
"#;

pub const CREATE_BLOCK_PATTERNS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS block_patterns (
    id VARCHAR PRIMARY KEY,
    condition_set_id VARCHAR NOT NULL,
    ticker VARCHAR NOT NULL,
    detection_ids JSONB NOT NULL,
    windows JSONB NOT NULL
);
"#;

pub const CREATE_BLOCK_REDETECTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS block_redetections (
    id VARCHAR PRIMARY KEY,
    parent_detection_id VARCHAR NOT NULL,
    seq INTEGER NOT NULL,
    status VARCHAR NOT NULL,
    started_at DATE NOT NULL,
    ended_at DATE,
    entry_open DOUBLE PRECISION NOT NULL,
    entry_close DOUBLE PRECISION NOT NULL,
    peak_price DOUBLE PRECISION NOT NULL,
    peak_volume BIGINT NOT NULL,
    UNIQUE(parent_detection_id, started_at)
);
"#;

pub const CREATE_INDICES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_daily_candles_ticker_date ON daily_candles(ticker, date);
CREATE INDEX IF NOT EXISTS idx_block_detections_ticker ON block_detections(ticker, condition_set_id);
CREATE INDEX IF NOT EXISTS idx_block_redetections_parent ON block_redetections(parent_detection_id);
"#;
