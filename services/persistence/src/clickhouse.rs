//! ClickHouse store over the HTTP interface
//!
//! Writes are single `INSERT ... FORMAT JSONEachRow` requests. Trade scans
//! are one `SELECT` whose body is streamed; with a block size the server is
//! asked for blocks of that size (`max_block_size`) and the body is re-cut
//! into blocks client-side, so rows are never all held at once.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, info};
use types::log::LogEvent;
use types::trade::TradeEvent;

use crate::rows::{self, LogRow, TradeRow};
use crate::schema::{Schema, DEFAULT_LOG_TABLE, DEFAULT_TRADE_TABLE};
use crate::store::{StoreError, TradeBlockStream, TradeQuery, TradeStore};

/// Connection settings for the ClickHouse HTTP endpoint.
#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    /// Base URL, e.g. `http://localhost:8123/`
    pub url: String,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub trade_table: String,
    pub log_table: String,
    /// TCP connect timeout; request duration is bounded by callers
    pub connect_timeout: Duration,
}

impl ClickHouseConfig {
    pub fn new(url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: database.into(),
            user: None,
            password: None,
            trade_table: DEFAULT_TRADE_TABLE.to_string(),
            log_table: DEFAULT_LOG_TABLE.to_string(),
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_credentials(mut self, user: Option<String>, password: Option<String>) -> Self {
        self.user = user;
        self.password = password;
        self
    }
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self::new("http://localhost:8123/", "archive")
    }
}

pub struct ClickHouseStore {
    client: Client,
    config: ClickHouseConfig,
    schema: Schema,
}

impl ClickHouseStore {
    pub fn new(config: ClickHouseConfig) -> Result<Self, StoreError> {
        let schema = Schema::new(&config.database, &config.trade_table, &config.log_table)?;
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        info!(
            url = %config.url,
            database = %config.database,
            trade_table = %config.trade_table,
            "ClickHouse store initialized"
        );

        Ok(Self {
            client,
            config,
            schema,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Create the database and both tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in self.schema.create_statements() {
            self.execute(&statement).await?;
        }
        info!(database = %self.schema.database(), "Archive schema ready");
        Ok(())
    }

    /// Run a statement that returns no rows.
    pub async fn execute(&self, sql: &str) -> Result<(), StoreError> {
        let response = self.request(&[]).body(sql.to_string()).send().await?;
        check(response).await?;
        Ok(())
    }

    fn request(&self, params: &[(&str, String)]) -> RequestBuilder {
        let mut builder = self.client.post(&self.config.url).query(params);
        if let Some(user) = &self.config.user {
            builder = builder.header("X-ClickHouse-User", user);
        }
        if let Some(password) = &self.config.password {
            builder = builder.header("X-ClickHouse-Key", password);
        }
        builder
    }

    async fn insert_body(&self, sql: String, body: Vec<u8>, rows: usize) -> Result<(), StoreError> {
        let response = self
            .request(&[("query", sql)])
            .body(body)
            .send()
            .await?;
        check(response).await?;
        debug!(rows, "Insert acknowledged");
        Ok(())
    }
}

/// Map a non-2xx response to `StoreError::Rejected` with the server's message.
async fn check(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Rejected {
            status: status.as_u16(),
            body: body.trim().to_string(),
        })
    }
}

/// Rows are sent as plain JSON numbers instead of quoted 64-bit integers.
const UNQUOTED_INTEGERS: (&str, &str) = ("output_format_json_quote_64bit_integers", "0");

#[async_trait]
impl TradeStore for ClickHouseStore {
    async fn insert_trades(&self, trades: &[TradeEvent]) -> Result<(), StoreError> {
        if trades.is_empty() {
            return Ok(());
        }
        let body = rows::encode_json_each_row(trades.iter().map(TradeRow::from))?;
        self.insert_body(self.schema.insert_trades_sql(), body, trades.len())
            .await
    }

    async fn insert_logs(&self, events: &[LogEvent]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }
        let body = rows::encode_json_each_row(events.iter().map(LogRow::from))?;
        self.insert_body(self.schema.insert_logs_sql(), body, events.len())
            .await
    }

    async fn query_trades(&self, query: &TradeQuery) -> Result<TradeBlockStream, StoreError> {
        let mut params = vec![
            ("param_symbol", query.symbol().to_string()),
            ("param_from", query.from_exchange_timestamp().to_string()),
            (UNQUOTED_INTEGERS.0, UNQUOTED_INTEGERS.1.to_string()),
        ];
        if let Some(block_size) = query.block_size() {
            params.push(("max_block_size", block_size.get().to_string()));
        }

        debug!(
            symbol = %query.symbol(),
            from = query.from_exchange_timestamp(),
            block_size = ?query.block_size(),
            "Issuing trade scan"
        );

        let response = self
            .request(&params)
            .body(self.schema.select_trades_sql())
            .send()
            .await?;
        let response = check(response).await?;

        match query.block_size() {
            Some(block_size) => {
                let body = response
                    .bytes_stream()
                    .map_ok(|chunk| chunk.to_vec())
                    .map_err(StoreError::from)
                    .boxed();
                Ok(rows::block_stream(body, block_size.get()))
            }
            None => {
                let text = response.text().await?;
                let block = rows::decode_trade_rows(&text)?;
                Ok(stream::once(async move { Ok(block) }).boxed())
            }
        }
    }

    async fn distinct_symbols(&self) -> Result<Vec<String>, StoreError> {
        let response = self
            .request(&[])
            .body(self.schema.distinct_symbols_sql())
            .send()
            .await?;
        let text = check(response).await?.text().await?;

        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                serde_json::from_str::<(String,)>(line)
                    .map(|(symbol,)| symbol)
                    .map_err(|e| StoreError::Decode {
                        line: line.to_string(),
                        reason: e.to_string(),
                    })
            })
            .collect()
    }
}
