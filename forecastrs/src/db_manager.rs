use std::path::Path;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::data_prep::RawRow;
use crate::utility::errors::{ForecastError, ForecastResult};

/// 저장소에 쓰이는 원자 단위. ticker는 원본 심볼이거나 `<ticker>_pred` 합성 심볼
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRow {
    pub date: String,
    pub ticker: String,
    pub close_price: f64,
}

/// SQLite 일봉 저장소 어댑터
///
/// 원본 테이블에서 (date, ticker, close_price)를 읽고, 예측 병합 결과를
/// 대상 테이블에 통째로 교체(replace) 방식으로 쓴다.
pub struct DbManager {
    conn: Connection,
}

impl DbManager {
    pub fn open(path: &Path) -> ForecastResult<Self> {
        let conn = Connection::open(path).map_err(|e| {
            ForecastError::database("DB 열기", format!("{} ({})", e, path.display()))
        })?;
        Ok(Self { conn })
    }

    /// 설정된 티커들의 일봉 종가를 전부 읽어온다 (티커, 날짜 오름차순)
    pub fn read_daily_rows(
        &self,
        source_table: &str,
        tickers: &[String],
    ) -> ForecastResult<Vec<RawRow>> {
        if tickers.is_empty() {
            return Err(ForecastError::database(
                "일봉 조회",
                "조회할 티커가 없습니다".to_string(),
            ));
        }

        let placeholders = vec!["?"; tickers.len()].join(", ");
        let sql = format!(
            "SELECT date, ticker, close_price FROM {} WHERE ticker IN ({}) ORDER BY ticker, date",
            source_table, placeholders
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> =
            tickers.iter().map(|t| t as &dyn rusqlite::ToSql).collect();

        let rows = stmt
            .query_map(params.as_slice(), |row| {
                Ok(RawRow {
                    date: row.get(0)?,
                    ticker: row.get(1)?,
                    close_price: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "일봉 {}행 로드 완료 (테이블: {}, 티커 {}개)",
            rows.len(),
            source_table,
            tickers.len()
        );

        Ok(rows)
    }

    /// 대상 테이블 내용을 통째로 교체한다
    /// DROP → CREATE → 일괄 INSERT를 하나의 트랜잭션으로 묶어 소비자 입장에서
    /// 교체가 원자적으로 보이도록 한다
    pub fn replace_forecast_table(
        &mut self,
        forecast_table: &str,
        rows: &[ForecastRow],
    ) -> ForecastResult<()> {
        let tx = self.conn.transaction()?;

        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table};
             CREATE TABLE {table} (
                 date TEXT,
                 ticker TEXT,
                 close_price REAL
             );",
            table = forecast_table
        ))?;

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} (date, ticker, close_price) VALUES (?, ?, ?)",
                forecast_table
            ))?;
            for row in rows {
                stmt.execute((&row.date, &row.ticker, row.close_price))?;
            }
        }

        tx.commit()?;

        info!(
            "💾 테이블 {} 교체 완료: {}행 기록",
            forecast_table,
            rows.len()
        );
        Ok(())
    }

    /// 테스트/도구용: 대상 테이블 전체를 읽어온다
    pub fn read_forecast_table(&self, forecast_table: &str) -> ForecastResult<Vec<ForecastRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT date, ticker, close_price FROM {} ORDER BY rowid",
            forecast_table
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ForecastRow {
                    date: row.get(0)?,
                    ticker: row.get(1)?,
                    close_price: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
