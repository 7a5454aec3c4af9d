use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{s, Array2, Array3, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utility::errors::{ForecastError, ForecastResult};

/// 한 티커의 정규화 통계
/// 학습 시 전체 시계열에 대해 한 번만 계산되고, 추론 시 재계산 없이 그대로 재사용된다
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickerStats {
    pub mean: f64,
    pub std: f64,
}

impl TickerStats {
    pub fn normalize(&self, x: f32) -> f32 {
        ((x as f64 - self.mean) / self.std) as f32
    }

    pub fn denormalize(&self, z: f32) -> f32 {
        (z as f64 * self.std + self.mean) as f32
    }
}

/// 티커 → {mean, std} 매핑 (tickers_config.json으로 영속화)
/// BTreeMap의 키 순서(사전순)가 곧 행렬 컬럼 순서다. 학습 시 티커를 사전순으로
/// 정렬해서 컬럼을 만들기 때문에, 저장 후 다시 로드해도 순서가 일치한다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizationStats(pub BTreeMap<String, TickerStats>);

impl NormalizationStats {
    /// 컬럼 순서대로 정렬된 티커 목록
    pub fn tickers(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, ticker: &str) -> Option<&TickerStats> {
        self.0.get(ticker)
    }

    /// 원시 가격 윈도우를 컬럼별(티커별)로 정규화한 사본을 반환
    /// 컬럼 순서는 이 통계의 티커 순서와 같다고 가정한다
    pub fn normalize_matrix(&self, window: &Array2<f32>) -> Array2<f32> {
        let mut norm = window.clone();
        for (j, stats) in self.0.values().enumerate() {
            norm.column_mut(j).mapv_inplace(|x| stats.normalize(x));
        }
        norm
    }

    /// tickers_config.json으로 저장
    pub fn save(&self, path: &Path) -> ForecastResult<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// tickers_config.json에서 로드
    pub fn load(path: &Path) -> ForecastResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let stats: NormalizationStats = serde_json::from_str(&content)?;
        Ok(stats)
    }
}

/// 입력 쿼리 결과의 한 행 (date는 YYYY-MM-DD 문자열)
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub date: String,
    pub ticker: String,
    pub close_price: f64,
}

/// 다중 티커 가격 행렬과 슬라이딩 윈도우를 담당하는 데이터 준비 단계
///
/// 행 = 거래일(오름차순), 열 = 티커(고정 순서). 학습 모드는 통계를 새로 계산하고,
/// 추론 모드는 영속화된 통계에서 컬럼 집합과 순서를 그대로 가져온다.
/// 모드는 생성자에서 한 번 결정되며 이후 분기는 없다.
pub struct DataPrep {
    pub window_size: usize,
    pub stats: NormalizationStats,
    /// 오름차순 날짜 인덱스 (모든 티커가 동일한 인덱스를 공유해야 함)
    pub date_index: Vec<String>,
    /// 원시 가격 행렬 [날짜 수, 티커 수]
    pub data: Array2<f32>,
    /// 티커별 (x - mean) / std 정규화 행렬, data와 같은 모양
    pub data_normalized: Array2<f32>,
}

impl DataPrep {
    /// 학습 모드: 티커를 사전순으로 정렬해 컬럼 순서를 고정하고,
    /// 각 티커의 전체 시계열에서 mean/std를 계산한다
    pub fn training(rows: &[RawRow], window_size: usize) -> ForecastResult<Self> {
        let mut tickers: Vec<String> = rows.iter().map(|r| r.ticker.clone()).collect();
        tickers.sort();
        tickers.dedup();

        if tickers.is_empty() {
            return Err(ForecastError::empty_series("(전체)"));
        }

        let mut stats = NormalizationStats::default();
        let mut columns: Vec<Vec<f32>> = Vec::with_capacity(tickers.len());
        let mut date_index: Option<Vec<String>> = None;

        for ticker in &tickers {
            let series = collect_series(rows, ticker);
            if series.is_empty() {
                return Err(ForecastError::empty_series(ticker.clone()));
            }

            let dates: Vec<String> = series.iter().map(|(d, _)| d.clone()).collect();
            validate_alignment(&mut date_index, &dates, ticker)?;

            let ticker_stats = compute_stats(ticker, &series)?;
            stats.0.insert(ticker.clone(), ticker_stats);
            columns.push(series.iter().map(|(_, p)| *p as f32).collect());
        }

        let date_index = date_index.unwrap_or_default();
        let (data, data_normalized) = assemble_matrices(&date_index, &tickers, &columns, &stats);

        debug!(
            "학습 데이터 준비 완료: {}개 티커, {}개 날짜, window_size={}",
            tickers.len(),
            date_index.len(),
            window_size
        );

        Ok(DataPrep {
            window_size,
            stats,
            date_index,
            data,
            data_normalized,
        })
    }

    /// 추론 모드: 컬럼 집합과 순서를 영속화된 통계에서 가져온다 (재도출 금지)
    pub fn inference(
        rows: &[RawRow],
        window_size: usize,
        stats: NormalizationStats,
    ) -> ForecastResult<Self> {
        let tickers: Vec<String> = stats.tickers().iter().map(|t| t.to_string()).collect();
        let mut columns: Vec<Vec<f32>> = Vec::with_capacity(tickers.len());
        let mut date_index: Option<Vec<String>> = None;

        for ticker in &tickers {
            let series = collect_series(rows, ticker);
            if series.is_empty() {
                return Err(ForecastError::missing_ticker(ticker.clone()));
            }

            let dates: Vec<String> = series.iter().map(|(d, _)| d.clone()).collect();
            validate_alignment(&mut date_index, &dates, ticker)?;

            columns.push(series.iter().map(|(_, p)| *p as f32).collect());
        }

        let date_index = date_index.unwrap_or_default();
        let (data, data_normalized) = assemble_matrices(&date_index, &tickers, &columns, &stats);

        debug!(
            "추론 데이터 준비 완료: {}개 티커, {}개 날짜",
            tickers.len(),
            date_index.len()
        );

        Ok(DataPrep {
            window_size,
            stats,
            date_index,
            data,
            data_normalized,
        })
    }

    /// 슬라이딩 윈도우 개수: len(date_index) - window_size
    pub fn num_windows(&self) -> usize {
        self.date_index.len().saturating_sub(self.window_size)
    }

    /// 정규화 행렬 위의 고정 길이 윈도우들 (날짜 오름차순)
    pub fn windows(&self) -> Vec<ArrayView2<'_, f32>> {
        (0..self.num_windows())
            .map(|i| self.data_normalized.slice(s![i..i + self.window_size, ..]))
            .collect()
    }

    /// (정규화 윈도우, 원시 타깃) 쌍. 타깃은 윈도우 직후 인덱스의 **원시** 가격
    /// 벡터다 - 모델은 원시 스케일을 예측하도록 학습되므로 타깃을 정규화하지 않는다
    pub fn windows_with_targets(&self) -> Vec<(ArrayView2<'_, f32>, ArrayView1<'_, f32>)> {
        (0..self.num_windows())
            .map(|i| {
                (
                    self.data_normalized.slice(s![i..i + self.window_size, ..]),
                    self.data.row(i + self.window_size),
                )
            })
            .collect()
    }

    /// 모든 윈도우를 하나의 배치 텐서 [N, T, C]로 적층 (일괄 추론용)
    pub fn windows_batch(&self) -> Array3<f32> {
        let n = self.num_windows();
        let t = self.window_size;
        let c = self.stats.len();
        Array3::from_shape_fn((n, t, c), |(i, ti, j)| self.data_normalized[(i + ti, j)])
    }

    /// 학습 샘플을 (X [N, T, C], Y [N, C]) 텐서 쌍으로 반환
    pub fn training_samples(&self) -> (Array3<f32>, Array2<f32>) {
        let n = self.num_windows();
        let c = self.stats.len();
        let x = self.windows_batch();
        let y = Array2::from_shape_fn((n, c), |(i, j)| self.data[(i + self.window_size, j)]);
        (x, y)
    }

    /// 롤아웃 시드: 마지막 window_size개의 원시 가격 행
    pub fn last_window_raw(&self) -> Array2<f32> {
        let len = self.date_index.len();
        self.data
            .slice(s![len - self.window_size..len, ..])
            .to_owned()
    }
}

/// 한 티커의 (date, close_price) 시계열을 날짜 오름차순으로 수집
fn collect_series(rows: &[RawRow], ticker: &str) -> Vec<(String, f64)> {
    let mut series: Vec<(String, f64)> = rows
        .iter()
        .filter(|r| r.ticker == ticker)
        .map(|r| (r.date.clone(), r.close_price))
        .collect();
    series.sort_by(|a, b| a.0.cmp(&b.0));
    series
}

/// 모든 티커가 동일한 날짜 인덱스를 공유하는지 검증
/// 불일치 상태로 행렬을 조립하면 조용히 어긋나므로 여기서 즉시 실패시킨다
fn validate_alignment(
    date_index: &mut Option<Vec<String>>,
    dates: &[String],
    ticker: &str,
) -> ForecastResult<()> {
    match date_index {
        None => {
            *date_index = Some(dates.to_vec());
            Ok(())
        }
        Some(expected) => {
            if expected.len() != dates.len() {
                return Err(ForecastError::alignment(
                    ticker,
                    format!("날짜 수가 다릅니다 ({} vs {})", expected.len(), dates.len()),
                ));
            }
            for (a, b) in expected.iter().zip(dates.iter()) {
                if a != b {
                    return Err(ForecastError::alignment(
                        ticker,
                        format!("날짜 불일치 ({} vs {})", a, b),
                    ));
                }
            }
            Ok(())
        }
    }
}

/// 티커 전체 시계열의 mean / 표본 표준편차(ddof=1) 계산
fn compute_stats(ticker: &str, series: &[(String, f64)]) -> ForecastResult<TickerStats> {
    let n = series.len();
    if n < 2 {
        return Err(ForecastError::general(format!(
            "정규화 불가: 티커 {}의 데이터가 {}개뿐입니다 (최소 2개 필요)",
            ticker, n
        )));
    }

    let mean = series.iter().map(|(_, p)| *p).sum::<f64>() / n as f64;
    let var = series
        .iter()
        .map(|(_, p)| (*p - mean) * (*p - mean))
        .sum::<f64>()
        / (n - 1) as f64;
    let std = var.sqrt();

    if !std.is_finite() || std <= 0.0 {
        return Err(ForecastError::general(format!(
            "정규화 불가: 티커 {}의 표준편차가 {}입니다",
            ticker, std
        )));
    }

    Ok(TickerStats { mean, std })
}

/// 컬럼 벡터들을 원시/정규화 행렬 쌍으로 조립
fn assemble_matrices(
    date_index: &[String],
    tickers: &[String],
    columns: &[Vec<f32>],
    stats: &NormalizationStats,
) -> (Array2<f32>, Array2<f32>) {
    let rows = date_index.len();
    let cols = tickers.len();

    let data = Array2::from_shape_fn((rows, cols), |(i, j)| columns[j][i]);
    let mut data_normalized = data.clone();
    for (j, ticker) in tickers.iter().enumerate() {
        // 생성자에서 티커마다 통계를 넣었으므로 항상 존재
        let ts = stats.get(ticker).copied().unwrap_or(TickerStats {
            mean: 0.0,
            std: 1.0,
        });
        data_normalized
            .column_mut(j)
            .mapv_inplace(|x| ts.normalize(x));
    }

    (data, data_normalized)
}
