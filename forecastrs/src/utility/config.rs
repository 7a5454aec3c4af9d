use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("설정 파일을 찾을 수 없습니다: {0}")]
    FileNotFound(String),
    #[error("설정 파일 읽기 오류: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("설정 파일 파싱 오류: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("설정 유효성 검증 실패: {0}")]
    ValidationError(String),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub models: ModelsConfig,
    pub forecast: ForecastConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub stock_db_path: String,
    /// 원본 일봉 테이블 (읽기 전용)
    pub source_table: String,
    /// 예측 결과가 병합되어 통째로 교체되는 테이블
    pub forecast_table: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelsConfig {
    /// 모델 아티팩트 디렉토리 (train_config.json, tickers_config.json,
    /// model_config.json, model.bin)
    pub dir: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ForecastConfig {
    /// 예측 대상 티커 목록
    pub tickers: Vec<String>,
    /// 롤아웃으로 생성할 영업일 수
    pub horizon_days: usize,
    /// LSTM 은닉 상태 크기 (학습 시에만 사용)
    pub hidden_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    /// config.toml 파일에서 설정을 로드
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("config.toml")
    }

    /// 지정된 파일에서 설정을 로드
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        if !Path::new(path).exists() {
            return Err(ConfigError::FileNotFound(format!(
                "{}가 없습니다. config.example.toml을 복사해서 config.toml을 만들고 설정을 채워주세요.",
                path
            )));
        }

        let content = fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;

        // 환경 변수로 오버라이드
        config.apply_env_overrides();

        // 설정 유효성 검증
        config.validate()?;

        Ok(config)
    }

    /// 환경 변수로 설정을 오버라이드
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("STOCK_DB_PATH") {
            self.database.stock_db_path = path;
        }
        if let Ok(dir) = std::env::var("MODELS_DIR") {
            self.models.dir = dir;
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// 설정 유효성 검증
    fn validate(&self) -> Result<(), ConfigError> {
        if self.forecast.tickers.is_empty() {
            return Err(ConfigError::ValidationError(
                "forecast.tickers에 최소 한 개의 티커가 필요합니다".to_string(),
            ));
        }

        if self.forecast.horizon_days == 0 {
            return Err(ConfigError::ValidationError(
                "forecast.horizon_days는 1 이상이어야 합니다".to_string(),
            ));
        }

        if self.forecast.hidden_size == 0 {
            return Err(ConfigError::ValidationError(
                "forecast.hidden_size는 1 이상이어야 합니다".to_string(),
            ));
        }

        if self.database.source_table.trim().is_empty()
            || self.database.forecast_table.trim().is_empty()
        {
            return Err(ConfigError::ValidationError(
                "database.source_table과 database.forecast_table은 비어있을 수 없습니다"
                    .to_string(),
            ));
        }

        if self.database.source_table == self.database.forecast_table {
            return Err(ConfigError::ValidationError(
                "source_table과 forecast_table은 서로 달라야 합니다 (forecast_table은 매 실행마다 교체됨)"
                    .to_string(),
            ));
        }

        // 로그 레벨 검증
        match self.logging.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(ConfigError::ValidationError(
                    "log level은 'error', 'warn', 'info', 'debug', 'trace' 중 하나여야 합니다"
                        .to_string(),
                ))
            }
        }

        Ok(())
    }

    /// 설정을 파일로 저장 (주로 디버깅용)
    pub fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ValidationError(format!("직렬화 오류: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Config {
        Config {
            database: DatabaseConfig {
                stock_db_path: "data/stock.db".to_string(),
                source_table: "daily".to_string(),
                forecast_table: "small_daily".to_string(),
            },
            models: ModelsConfig {
                dir: "data/models".to_string(),
            },
            forecast: ForecastConfig {
                tickers: vec!["AAPL".to_string(), "MSFT".to_string()],
                horizon_days: 5,
                hidden_size: 32,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }

    #[test]
    fn test_validate_ok() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_tickers() {
        let mut config = sample_config();
        config.forecast.tickers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_same_tables() {
        let mut config = sample_config();
        config.database.forecast_table = config.database.source_table.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let mut config = sample_config();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = sample_config();
        let text = toml::to_string_pretty(&config).expect("직렬화 실패");
        let parsed: Config = toml::from_str(&text).expect("파싱 실패");
        assert_eq!(parsed.forecast.tickers, config.forecast.tickers);
        assert_eq!(parsed.database.source_table, "daily");
    }
}
