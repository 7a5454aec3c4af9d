use thiserror::Error;

/// 예측 시스템의 모든 오류 타입을 정의하는 enum
/// 데이터 정합성 오류는 전부 치명적이며, 테이블 쓰기 전에 실행을 중단시킨다
#[derive(Error, Debug)]
pub enum ForecastError {
    /// 학습 소스에 해당 티커의 행이 하나도 없음
    #[error("빈 시계열: 티커 {ticker}의 데이터가 없습니다")]
    EmptySeries { ticker: String },

    /// 정규화 통계에는 있지만 추론 입력에는 없는 티커
    #[error("티커 누락: {ticker}가 정규화 통계에는 있으나 입력 데이터에 없습니다")]
    MissingTicker { ticker: String },

    /// 저장된 모델 설정의 입력 크기가 현재 티커 수와 다름
    #[error("모델 아티팩트 불일치: input_size {expected} 기대, 실제 {actual}")]
    ArtifactMismatch { expected: usize, actual: usize },

    /// 티커 간 날짜 인덱스가 서로 다름 (행렬 조립 전 검증)
    #[error("날짜 인덱스 불일치: 티커 {ticker} - {reason}")]
    Alignment { ticker: String, reason: String },

    /// 데이터베이스 관련 오류
    #[error("데이터베이스 오류: {operation} - {reason}")]
    Database { operation: String, reason: String },

    /// 설정 관련 오류 (config.rs의 ConfigError와 연동)
    #[error("설정 오류: {0}")]
    Config(#[from] crate::utility::config::ConfigError),

    /// 데이터 파싱 오류
    #[error("파싱 오류: {data_type} 파싱 실패 - {reason}")]
    Parsing { data_type: String, reason: String },

    /// 일반적인 I/O 오류
    #[error("I/O 오류: {operation} - {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// 일반적인 오류 (기타)
    #[error("오류: {message}")]
    General { message: String },
}

/// 예측 시스템에서 사용하는 Result 타입 별칭
pub type ForecastResult<T> = Result<T, ForecastError>;

impl ForecastError {
    /// 빈 시계열 오류를 간편하게 생성하는 헬퍼 함수
    pub fn empty_series(ticker: impl Into<String>) -> Self {
        Self::EmptySeries {
            ticker: ticker.into(),
        }
    }

    /// 티커 누락 오류를 간편하게 생성하는 헬퍼 함수
    pub fn missing_ticker(ticker: impl Into<String>) -> Self {
        Self::MissingTicker {
            ticker: ticker.into(),
        }
    }

    /// 날짜 인덱스 불일치 오류를 간편하게 생성하는 헬퍼 함수
    pub fn alignment(ticker: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Alignment {
            ticker: ticker.into(),
            reason: reason.into(),
        }
    }

    /// 데이터베이스 오류를 간편하게 생성하는 헬퍼 함수
    pub fn database(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Database {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// 데이터 파싱 오류를 간편하게 생성하는 헬퍼 함수
    pub fn parsing(data_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parsing {
            data_type: data_type.into(),
            reason: reason.into(),
        }
    }

    /// 모델 로딩 오류를 생성하는 헬퍼 함수
    pub fn model_loading(message: impl Into<String>) -> Self {
        ForecastError::General {
            message: format!("모델 로딩 오류: {}", message.into()),
        }
    }

    /// 예측 관련 오류를 생성하는 헬퍼 함수
    pub fn prediction(message: impl Into<String>) -> Self {
        ForecastError::General {
            message: format!("예측 오류: {}", message.into()),
        }
    }

    /// 일반적인 오류를 생성하는 헬퍼 함수
    pub fn general(message: impl Into<String>) -> Self {
        ForecastError::General {
            message: message.into(),
        }
    }
}

/// Rusqlite 데이터베이스 오류를 ForecastError로 변환
impl From<rusqlite::Error> for ForecastError {
    fn from(error: rusqlite::Error) -> Self {
        let operation = match &error {
            rusqlite::Error::SqliteFailure(_, _) => "SQL 실행",
            rusqlite::Error::InvalidParameterName(_) => "매개변수 검증",
            rusqlite::Error::InvalidPath(_) => "경로 확인",
            rusqlite::Error::InvalidColumnIndex(_) => "컬럼 인덱스",
            rusqlite::Error::InvalidColumnName(_) => "컬럼 이름",
            rusqlite::Error::InvalidColumnType(_, _, _) => "컬럼 타입",
            _ => "데이터베이스 작업",
        };

        ForecastError::Database {
            operation: operation.to_string(),
            reason: error.to_string(),
        }
    }
}

/// std::io::Error를 ForecastError로 변환
impl From<std::io::Error> for ForecastError {
    fn from(error: std::io::Error) -> Self {
        ForecastError::Io {
            operation: "파일 I/O".to_string(),
            source: error,
        }
    }
}

/// serde_json 오류를 ForecastError로 변환 (JSON 아티팩트 읽기/쓰기)
impl From<serde_json::Error> for ForecastError {
    fn from(error: serde_json::Error) -> Self {
        ForecastError::Parsing {
            data_type: "JSON".to_string(),
            reason: error.to_string(),
        }
    }
}

/// &str을 ForecastError로 변환
impl From<&str> for ForecastError {
    fn from(message: &str) -> Self {
        ForecastError::General {
            message: message.to_string(),
        }
    }
}

/// String을 ForecastError로 변환
impl From<String> for ForecastError {
    fn from(message: String) -> Self {
        ForecastError::General { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = ForecastError::empty_series("AAPL");
        assert_eq!(error.to_string(), "빈 시계열: 티커 AAPL의 데이터가 없습니다");
    }

    #[test]
    fn test_artifact_mismatch_display() {
        let error = ForecastError::ArtifactMismatch {
            expected: 3,
            actual: 2,
        };
        assert_eq!(
            error.to_string(),
            "모델 아티팩트 불일치: input_size 3 기대, 실제 2"
        );
    }

    #[test]
    fn test_error_helpers() {
        let error = ForecastError::alignment("MSFT", "날짜 수가 다릅니다");
        match error {
            ForecastError::Alignment { ticker, .. } => {
                assert_eq!(ticker, "MSFT");
            }
            _ => {
                assert!(false, "잘못된 오류 타입");
            }
        }
    }

    #[test]
    fn test_result_type() {
        fn test_function() -> ForecastResult<i32> {
            Ok(42)
        }

        assert_eq!(test_function().expect("Test function should succeed"), 42);
    }
}
