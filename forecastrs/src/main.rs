use chrono::Local;
use clap::Parser;
use forecastrs::{
    forecast::run_forecast,
    init_tracing,
    utility::config::Config,
    utility::errors::{ForecastError, ForecastResult},
};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "forecastrs")]
#[command(about = "Daily close-price forecasting with an LSTM model")]
struct Args {
    /// 설정 파일 경로 (기본값: config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// 일봉 DB 경로 (기본값: 설정 파일의 stock_db_path)
    #[arg(long)]
    db: Option<String>,

    /// 롤아웃 영업일 수 (기본값: 설정 파일의 horizon_days)
    #[arg(long)]
    horizon: Option<usize>,
}

fn main() -> ForecastResult<()> {
    // 명령행 인수 파싱
    let args = Args::parse();

    // 로깅 초기화 (콘솔 출력만)
    init_tracing().map_err(|e| ForecastError::general(format!("로그 시스템 초기화 실패: {}", e)))?;

    info!("🚀 forecastrs 시작!");
    info!("📁 설정 파일: {}", args.config);

    // 설정 로드 (명령행 인수가 있으면 우선 적용)
    let mut config = Config::load_from_file(&args.config)?;
    if let Some(db) = args.db {
        config.database.stock_db_path = db;
    }
    if let Some(horizon) = args.horizon {
        config.forecast.horizon_days = horizon;
    }

    info!("✅ 설정 로드 완료");
    info!(
        "💾 일봉 DB: {} ({} → {})",
        config.database.stock_db_path,
        config.database.source_table,
        config.database.forecast_table
    );
    info!(
        "📊 티커 {}개, horizon {}일",
        config.forecast.tickers.len(),
        config.forecast.horizon_days
    );

    let today = Local::now().date_naive();
    match run_forecast(&config, today) {
        Ok(()) => {
            info!("✨ 예측 완료!");
        }
        Err(e) => {
            error!("❌ 예측 실행 중 오류 발생: {}", e);
            return Err(e);
        }
    }

    info!("🏁 forecastrs 종료");
    Ok(())
}
