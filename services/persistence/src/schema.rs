//! Table definitions and statement text for the ClickHouse archive
//!
//! Table and database names come from configuration, so they are validated
//! as plain identifiers before being spliced into statements. Filter values
//! never are: they travel as `{name:Type}` query parameters.

use crate::store::StoreError;

/// Default trade table name, kept compatible with existing archives.
pub const DEFAULT_TRADE_TABLE: &str = "aggtradesteam";
/// Default log table name.
pub const DEFAULT_LOG_TABLE: &str = "loggingmsg";

/// Reject anything that is not `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_identifier(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(StoreError::InvalidConfig(format!(
            "{name:?} is not a valid identifier"
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    database: String,
    trade_table: String,
    log_table: String,
}

impl Schema {
    pub fn new(database: &str, trade_table: &str, log_table: &str) -> Result<Self, StoreError> {
        validate_identifier(database)?;
        validate_identifier(trade_table)?;
        validate_identifier(log_table)?;
        Ok(Self {
            database: database.to_string(),
            trade_table: trade_table.to_string(),
            log_table: log_table.to_string(),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn trade_table(&self) -> String {
        format!("{}.{}", self.database, self.trade_table)
    }

    pub fn log_table(&self) -> String {
        format!("{}.{}", self.database, self.log_table)
    }

    /// `CREATE ... IF NOT EXISTS` statements, in execution order.
    ///
    /// The trade table collapses rows sharing `(time_exchange, uuid)` within a
    /// `(day, symbol)` partition during background merges.
    pub fn create_statements(&self) -> Vec<String> {
        vec![
            format!("CREATE DATABASE IF NOT EXISTS {}", self.database),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 time_exchange UInt64 CODEC(Delta, ZSTD), \
                 time_coinapi UInt64 CODEC(Delta, ZSTD), \
                 uuid UInt64, \
                 price String, \
                 size String, \
                 taker_side String, \
                 symbol_id LowCardinality(String)\
                 ) ENGINE = ReplacingMergeTree \
                 PARTITION BY (intDiv(time_exchange, 86400000), symbol_id) \
                 ORDER BY (time_exchange, uuid)",
                self.trade_table()
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 timestamp DateTime64(3) CODEC(Delta, ZSTD), \
                 msg String, \
                 level UInt8 CODEC(Delta, LZ4), \
                 payload String DEFAULT ''\
                 ) ENGINE = MergeTree \
                 PARTITION BY toYYYYMM(timestamp) \
                 ORDER BY timestamp",
                self.log_table()
            ),
        ]
    }

    pub fn insert_trades_sql(&self) -> String {
        format!("INSERT INTO {} FORMAT JSONEachRow", self.trade_table())
    }

    pub fn insert_logs_sql(&self) -> String {
        format!("INSERT INTO {} FORMAT JSONEachRow", self.log_table())
    }

    /// Trade scan; binds `{symbol:String}` and `{from:UInt64}`.
    pub fn select_trades_sql(&self) -> String {
        format!(
            "SELECT time_exchange, time_coinapi, uuid, price, size, taker_side, symbol_id \
             FROM {} \
             WHERE symbol_id = {{symbol:String}} AND time_exchange >= {{from:UInt64}} \
             ORDER BY time_exchange, uuid \
             FORMAT JSONCompactEachRow",
            self.trade_table()
        )
    }

    pub fn distinct_symbols_sql(&self) -> String {
        format!(
            "SELECT DISTINCT symbol_id FROM {} ORDER BY symbol_id FORMAT JSONCompactEachRow",
            self.trade_table()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new("archive", DEFAULT_TRADE_TABLE, DEFAULT_LOG_TABLE).unwrap()
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("archive").is_ok());
        assert!(validate_identifier("_t1").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("a; DROP TABLE x").is_err());
        assert!(Schema::new("archive", "trades`", "logs").is_err());
    }

    #[test]
    fn test_select_binds_parameters() {
        let sql = schema().select_trades_sql();
        assert!(sql.contains("FROM archive.aggtradesteam"));
        assert!(sql.contains("symbol_id = {symbol:String}"));
        assert!(sql.contains("time_exchange >= {from:UInt64}"));
        assert!(sql.contains("ORDER BY time_exchange, uuid"));
        assert!(sql.ends_with("FORMAT JSONCompactEachRow"));
    }

    #[test]
    fn test_select_column_order() {
        let sql = schema().select_trades_sql();
        assert!(sql.starts_with(
            "SELECT time_exchange, time_coinapi, uuid, price, size, taker_side, symbol_id "
        ));
    }

    #[test]
    fn test_create_statements() {
        let statements = schema().create_statements();
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[0], "CREATE DATABASE IF NOT EXISTS archive");
        assert!(statements[1].contains("ENGINE = ReplacingMergeTree"));
        assert!(statements[1].contains("symbol_id LowCardinality(String)"));
        assert!(statements[2].contains("archive.loggingmsg"));
    }

    #[test]
    fn test_insert_statements() {
        assert_eq!(
            schema().insert_trades_sql(),
            "INSERT INTO archive.aggtradesteam FORMAT JSONEachRow"
        );
        assert_eq!(
            schema().insert_logs_sql(),
            "INSERT INTO archive.loggingmsg FORMAT JSONEachRow"
        );
    }
}
