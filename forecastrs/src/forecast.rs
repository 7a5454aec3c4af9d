use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::data_prep::{DataPrep, NormalizationStats, RawRow};
use crate::db_manager::{DbManager, ForecastRow};
use crate::model::LstmModel;
use crate::utility::calendar::next_business_days;
use crate::utility::config::Config;
use crate::utility::errors::{ForecastError, ForecastResult};

/// 합성 예측 시리즈 식별자 접미사
pub const PRED_SUFFIX: &str = "_pred";

/// 날짜 문자열 형식 (저장소와 아티팩트 공통)
const DATE_FORMAT: &str = "%Y-%m-%d";

/// train_config.json으로 영속화되는 학습 스케줄
/// train_start는 주간 학습 요일 (월요일 = 0 .. 일요일 = 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainSchedule {
    pub window_size: usize,
    pub epochs: usize,
    pub train_start: u32,
}

/// 모델 아티팩트 파일 묶음에 대한 순수 직렬화 경계
///
/// 핵심 로직은 파일 경로를 모른 채 값으로만 동작하고,
/// 읽기/쓰기는 전부 이 타입을 통해서만 일어난다.
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn train_config_path(&self) -> PathBuf {
        self.dir.join("train_config.json")
    }

    fn tickers_config_path(&self) -> PathBuf {
        self.dir.join("tickers_config.json")
    }

    fn model_config_path(&self) -> PathBuf {
        self.dir.join("model_config.json")
    }

    fn weights_path(&self) -> PathBuf {
        self.dir.join("model.bin")
    }

    pub fn load_schedule(&self) -> ForecastResult<TrainSchedule> {
        let content = std::fs::read_to_string(self.train_config_path())?;
        let schedule: TrainSchedule = serde_json::from_str(&content)?;
        Ok(schedule)
    }

    pub fn save_schedule(&self, schedule: &TrainSchedule) -> ForecastResult<()> {
        let json = serde_json::to_string(schedule)?;
        std::fs::write(self.train_config_path(), json)?;
        Ok(())
    }

    pub fn load_stats(&self) -> ForecastResult<NormalizationStats> {
        NormalizationStats::load(&self.tickers_config_path())
    }

    pub fn save_stats(&self, stats: &NormalizationStats) -> ForecastResult<()> {
        stats.save(&self.tickers_config_path())
    }

    pub fn load_model(&self, expected_input_size: usize) -> ForecastResult<LstmModel> {
        LstmModel::load(
            &self.weights_path(),
            &self.model_config_path(),
            expected_input_size,
        )
    }

    pub fn save_model(&self, model: &LstmModel) -> ForecastResult<()> {
        model.save(&self.weights_path(), &self.model_config_path())
    }
}

/// 주간 학습 게이트: 오늘 요일이 스케줄의 train_start와 같을 때만 참
pub fn should_train(today_weekday: u32, train_start: u32) -> bool {
    today_weekday == train_start
}

/// 게이트를 통과하면 학습 뷰 구성 → 통계 영속화 → 학습 → 아티팩트 영속화.
/// 스케줄 파일은 게이트 결과와 무관하게 내용 변경 없이 다시 기록된다.
/// 학습이 실행됐으면 true를 반환한다.
pub fn train_if_scheduled(
    rows: &[RawRow],
    store: &ArtifactStore,
    hidden_size: usize,
    today_weekday: u32,
) -> ForecastResult<bool> {
    let schedule = store.load_schedule()?;
    store.save_schedule(&schedule)?;

    if !should_train(today_weekday, schedule.train_start) {
        debug!(
            "학습 게이트 통과 안 함 (오늘 요일 {}, 학습 요일 {})",
            today_weekday, schedule.train_start
        );
        return Ok(false);
    }

    info!("🧠 주간 학습 시작 (window_size={}, epochs={})", schedule.window_size, schedule.epochs);

    let prep = DataPrep::training(rows, schedule.window_size)?;
    store.save_stats(&prep.stats)?;

    let mut model = LstmModel::new(prep.stats.len(), hidden_size);
    let (x, y) = prep.training_samples();
    let history = model.train_fn(&x, &y, schedule.epochs)?;
    store.save_model(&model)?;

    info!(
        "✅ 학습 완료: {}개 윈도우, 마지막 에폭 손실 {:.6}",
        prep.num_windows(),
        history.last().copied().unwrap_or(f32::NAN)
    );

    Ok(true)
}

/// 과거 구간 재구성: 모든 학습 윈도우에 대해 한 번의 배치 호출로
/// 한 스텝 앞 예측을 만들고, 각 예측을 윈도우 직후 날짜에 정렬한다
/// (전체 날짜 인덱스의 마지막 len(windows)개 날짜)
pub fn predict_historical(model: &LstmModel, prep: &DataPrep) -> Vec<ForecastRow> {
    let n = prep.num_windows();
    if n == 0 {
        return Vec::new();
    }

    let batch = prep.windows_batch();
    let preds = model.predict(&batch);

    let dates = &prep.date_index[prep.date_index.len() - n..];
    let tickers = prep.stats.tickers();

    let mut rows = Vec::with_capacity(n * tickers.len());
    for (i, date) in dates.iter().enumerate() {
        for (j, ticker) in tickers.iter().enumerate() {
            rows.push(ForecastRow {
                date: date.clone(),
                ticker: format!("{}{}", ticker, PRED_SUFFIX),
                close_price: preds[(i, j)] as f64,
            });
        }
    }

    debug!("과거 재구성 완료: {}개 날짜 × {}개 티커", n, tickers.len());
    rows
}

/// 자기회귀 롤아웃: 마지막 window_size개 원시 행을 시드로, 다음 n 영업일을
/// 하루씩 전진한다. 매 스텝 현재 원시 윈도우를 **영속화된** 통계로 정규화해
/// 예측하고, 예측 벡터를 윈도우 끝에 붙이며 가장 오래된 행을 버린다.
/// 예측이 다음 스텝의 입력이 되므로 오차는 스텝마다 누적된다 (보정 없음).
pub fn forecast_next_n(
    model: &LstmModel,
    prep: &DataPrep,
    n: usize,
) -> ForecastResult<Vec<ForecastRow>> {
    let last_date_str = prep
        .date_index
        .last()
        .ok_or_else(|| ForecastError::general("날짜 인덱스가 비어 있습니다"))?;
    let last_date = NaiveDate::parse_from_str(last_date_str, DATE_FORMAT).map_err(|e| {
        ForecastError::parsing("날짜", format!("{} ({})", e, last_date_str))
    })?;

    let inference_index = next_business_days(last_date, n);
    let tickers = prep.stats.tickers();

    let mut window = prep.last_window_raw();
    let window_size = prep.window_size;
    let mut rows = Vec::with_capacity(n * tickers.len());

    for date in &inference_index {
        let normalized = prep.stats.normalize_matrix(&window);
        let pred = model.predict_one(&normalized);

        let date_str = date.format(DATE_FORMAT).to_string();
        for (j, ticker) in tickers.iter().enumerate() {
            rows.push(ForecastRow {
                date: date_str.clone(),
                ticker: format!("{}{}", ticker, PRED_SUFFIX),
                close_price: pred[j] as f64,
            });
        }

        // 윈도우 전진: 가장 오래된 행을 버리고 예측을 덧붙인다
        let mut next = Array2::zeros(window.raw_dim());
        next.slice_mut(s![..window_size - 1, ..])
            .assign(&window.slice(s![1.., ..]));
        next.row_mut(window_size - 1).assign(&pred);
        window = next;
    }

    debug!("롤아웃 완료: {}개 영업일 × {}개 티커", n, tickers.len());
    Ok(rows)
}

/// 원시 이력 → 미래 예측 → 과거 재구성 순서로 출력 버퍼를 조립한다.
/// 과거 재구성이 없으면 마지막 이력 날짜의 실제 종가와 같은 `<ticker>_pred`
/// 시드 행을 먼저 합성해서 예측 시리즈가 이력에 이어지도록 한다.
pub fn assemble_output(
    raw_rows: &[RawRow],
    forecast: Vec<ForecastRow>,
    pred_historical: Option<Vec<ForecastRow>>,
    prep: &DataPrep,
) -> ForecastResult<Vec<ForecastRow>> {
    let historical_len = pred_historical.as_ref().map(|h| h.len()).unwrap_or(0);
    let mut out =
        Vec::with_capacity(raw_rows.len() + prep.stats.len() + forecast.len() + historical_len);

    for row in raw_rows {
        out.push(ForecastRow {
            date: row.date.clone(),
            ticker: row.ticker.clone(),
            close_price: row.close_price,
        });
    }

    if pred_historical.is_none() {
        let last = prep
            .date_index
            .last()
            .ok_or_else(|| ForecastError::general("날짜 인덱스가 비어 있습니다"))?;
        for ticker in prep.stats.tickers() {
            let close = raw_rows
                .iter()
                .find(|r| &r.date == last && r.ticker == ticker)
                .map(|r| r.close_price)
                .ok_or_else(|| {
                    ForecastError::general(format!(
                        "시드 행 합성 실패: {} {}의 종가가 없습니다",
                        last, ticker
                    ))
                })?;
            out.push(ForecastRow {
                date: last.clone(),
                ticker: format!("{}{}", ticker, PRED_SUFFIX),
                close_price: close,
            });
        }
    }

    out.extend(forecast);
    if let Some(historical) = pred_historical {
        out.extend(historical);
    }

    Ok(out)
}

/// 한 번의 전체 실행: 일괄 읽기 → (조건부) 학습 → 일괄 과거 추론 →
/// 순차 롤아웃 → 전체 테이블 교체 쓰기
pub fn run_forecast(config: &Config, today: NaiveDate) -> ForecastResult<()> {
    let store = ArtifactStore::new(&config.models.dir);
    let mut db = DbManager::open(Path::new(&config.database.stock_db_path))?;

    let rows = db.read_daily_rows(&config.database.source_table, &config.forecast.tickers)?;
    info!("📥 일봉 {}행 로드 완료", rows.len());

    let today_weekday = today.weekday().num_days_from_monday();
    let trained = train_if_scheduled(&rows, &store, config.forecast.hidden_size, today_weekday)?;
    if !trained {
        info!("⏭️ 오늘은 학습일이 아님 - 기존 아티팩트로 추론");
    }

    let schedule = store.load_schedule()?;
    let stats = store.load_stats()?;
    let prep = DataPrep::inference(&rows, schedule.window_size, stats)?;
    let model = store.load_model(prep.stats.len())?;

    let pred_historical = predict_historical(&model, &prep);
    let forecast = forecast_next_n(&model, &prep, config.forecast.horizon_days)?;

    let out = assemble_output(&rows, forecast, Some(pred_historical), &prep)?;
    db.replace_forecast_table(&config.database.forecast_table, &out)?;

    info!("🔮 예측 실행 완료 (horizon: {}일)", config.forecast.horizon_days);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utility::config::{
        Config, DatabaseConfig, ForecastConfig, LoggingConfig, ModelsConfig,
    };

    /// 2024-01-01(월)부터 시작하는 영업일 days개, 티커별 선형 증가 가격
    fn make_rows(tickers: &[&str], days: usize) -> Vec<RawRow> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).expect("잘못된 날짜");
        let dates = {
            let mut v = vec![start];
            v.extend(next_business_days(start, days - 1));
            v
        };
        let mut rows = Vec::new();
        for (ti, ticker) in tickers.iter().enumerate() {
            for (d, date) in dates.iter().enumerate() {
                rows.push(RawRow {
                    date: date.format(DATE_FORMAT).to_string(),
                    ticker: ticker.to_string(),
                    close_price: 100.0 + ti as f64 * 50.0 + d as f64,
                });
            }
        }
        rows
    }

    #[test]
    fn test_gate_truth_table() {
        for today in 0..7u32 {
            for start in 0..7u32 {
                assert_eq!(should_train(today, start), today == start);
            }
        }
    }

    #[test]
    fn test_forecast_dates_skip_weekend() {
        // 이력은 금요일 2024-01-05에 끝남
        let rows = make_rows(&["A", "B"], 5);
        let prep = DataPrep::training(&rows, 3).expect("학습 뷰 생성 실패");
        let model = LstmModel::new(2, 8);

        let forecast = forecast_next_n(&model, &prep, 3).expect("롤아웃 실패");
        let dates: Vec<&str> = forecast
            .iter()
            .step_by(2)
            .map(|r| r.date.as_str())
            .collect();
        assert_eq!(dates, vec!["2024-01-08", "2024-01-09", "2024-01-10"]);
        assert_eq!(forecast.len(), 6);
    }

    #[test]
    fn test_rollout_feeds_back_predictions() {
        let rows = make_rows(&["A", "B"], 8);
        let prep = DataPrep::training(&rows, 4).expect("학습 뷰 생성 실패");
        let model = LstmModel::new(2, 8);

        let forecast = forecast_next_n(&model, &prep, 2).expect("롤아웃 실패");

        // 스텝 0을 손으로 재현
        let w0 = prep.last_window_raw();
        let pred0 = model.predict_one(&prep.stats.normalize_matrix(&w0));
        assert!((forecast[0].close_price - pred0[0] as f64).abs() < 1e-6);

        // 스텝 1의 윈도우는 w0에서 가장 오래된 행을 버리고 pred0을 붙인 것
        let mut w1 = Array2::zeros(w0.raw_dim());
        w1.slice_mut(s![..3, ..]).assign(&w0.slice(s![1.., ..]));
        w1.row_mut(3).assign(&pred0);
        let pred1 = model.predict_one(&prep.stats.normalize_matrix(&w1));
        assert!((forecast[2].close_price - pred1[0] as f64).abs() < 1e-6);
        assert!((forecast[3].close_price - pred1[1] as f64).abs() < 1e-6);
    }

    #[test]
    fn test_predict_historical_alignment() {
        let rows = make_rows(&["A", "B"], 10);
        let prep = DataPrep::training(&rows, 5).expect("학습 뷰 생성 실패");
        let model = LstmModel::new(2, 8);

        let rows_out = predict_historical(&model, &prep);
        assert_eq!(rows_out.len(), prep.num_windows() * 2);

        // 날짜 정렬: 전체 인덱스의 마지막 len(windows)개
        let expected_dates = &prep.date_index[5..];
        for (i, date) in expected_dates.iter().enumerate() {
            assert_eq!(&rows_out[i * 2].date, date);
            assert!(rows_out[i * 2].ticker.ends_with(PRED_SUFFIX));
        }
    }

    #[test]
    fn test_assemble_seed_row_only_without_historical() {
        let rows = make_rows(&["A", "B"], 6);
        let prep = DataPrep::training(&rows, 3).expect("학습 뷰 생성 실패");
        let model = LstmModel::new(2, 8);
        let forecast = forecast_next_n(&model, &prep, 1).expect("롤아웃 실패");

        // 재구성이 없으면 마지막 날짜의 실제 종가로 시드 행을 합성
        let out = assemble_output(&rows, forecast.clone(), None, &prep).expect("조립 실패");
        let last = prep.date_index.last().expect("인덱스 비어 있음");
        let seeds: Vec<&ForecastRow> = out
            .iter()
            .filter(|r| &r.date == last && r.ticker.ends_with(PRED_SUFFIX))
            .collect();
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0].close_price, 105.0);
        assert_eq!(seeds[1].close_price, 155.0);

        // 재구성이 있으면 시드 합성은 건너뜀
        let historical = predict_historical(&model, &prep);
        let out = assemble_output(&rows, forecast, Some(historical.clone()), &prep)
            .expect("조립 실패");
        assert_eq!(out.len(), rows.len() + 2 + historical.len());
        // 순서: 원시 이력 → 미래 예측 → 과거 재구성
        assert_eq!(out[rows.len()].date, "2024-01-09");
        assert!(out.last().expect("비어 있음").ticker.ends_with(PRED_SUFFIX));
    }

    #[test]
    fn test_end_to_end_run() {
        let dir = tempfile::tempdir().expect("임시 디렉토리 생성 실패");
        let db_path = dir.path().join("stock.db");
        let models_dir = dir.path().join("models");
        std::fs::create_dir_all(&models_dir).expect("models 디렉토리 생성 실패");

        // 2개 티커 × 10 영업일 일봉 적재
        let rows = make_rows(&["A", "B"], 10);
        {
            let conn = rusqlite::Connection::open(&db_path).expect("DB 열기 실패");
            crate::db_manager::tests::seed_daily(&conn, &rows);
        }

        // 학습 스케줄: window 5, 1 에폭, 월요일 학습
        let store = ArtifactStore::new(&models_dir);
        store
            .save_schedule(&TrainSchedule {
                window_size: 5,
                epochs: 1,
                train_start: 0,
            })
            .expect("스케줄 저장 실패");

        let config = Config {
            database: DatabaseConfig {
                stock_db_path: db_path.to_string_lossy().to_string(),
                source_table: "daily".to_string(),
                forecast_table: "small_daily".to_string(),
            },
            models: ModelsConfig {
                dir: models_dir.to_string_lossy().to_string(),
            },
            forecast: ForecastConfig {
                tickers: vec!["A".to_string(), "B".to_string()],
                horizon_days: 2,
                hidden_size: 8,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        };

        // 2024-01-15는 월요일이므로 게이트 통과 → 학습 후 추론까지 전체 실행
        let today = NaiveDate::from_ymd_opt(2024, 1, 15).expect("잘못된 날짜");
        run_forecast(&config, today).expect("전체 실행 실패");

        let db = DbManager::open(&db_path).expect("DB 열기 실패");
        let out = db.read_forecast_table("small_daily").expect("읽기 실패");

        // 원시 20행 + 롤아웃 2일 × 2티커 + 재구성 5일 × 2티커
        assert_eq!(out.len(), 20 + 4 + 10);

        let pred_rows: Vec<&ForecastRow> = out
            .iter()
            .filter(|r| r.ticker.ends_with(PRED_SUFFIX))
            .collect();
        assert_eq!(pred_rows.len(), 14);

        // _pred 시리즈에 (date, ticker) 중복이 없어야 함
        let mut keys: Vec<(String, String)> = pred_rows
            .iter()
            .map(|r| (r.date.clone(), r.ticker.clone()))
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 14);

        // 스케줄 파일은 내용 변경 없이 다시 기록되어 있어야 함
        let schedule = store.load_schedule().expect("스케줄 로드 실패");
        assert_eq!(
            schedule,
            TrainSchedule {
                window_size: 5,
                epochs: 1,
                train_start: 0,
            }
        );

        // 학습일이 아닌 날의 재실행은 기존 아티팩트로 추론만 수행
        let tuesday = NaiveDate::from_ymd_opt(2024, 1, 16).expect("잘못된 날짜");
        run_forecast(&config, tuesday).expect("재실행 실패");
        let out2 = db.read_forecast_table("small_daily").expect("읽기 실패");
        assert_eq!(out2.len(), out.len());
    }
}
