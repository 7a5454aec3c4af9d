use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// 주말(토/일)을 제외한 영업일인지 확인
pub fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// 기준일 이후의 영업일 n개를 생성 (월~금, 기준일 미포함)
/// 하루씩 증가시키며 주말을 건너뛴다
pub fn next_business_days(last: NaiveDate, n: usize) -> Vec<NaiveDate> {
    let mut days = Vec::with_capacity(n);
    let mut day = last;
    while days.len() < n {
        day += Duration::days(1);
        if is_business_day(day) {
            days.push(day);
        }
    }
    days
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("잘못된 테스트 날짜")
    }

    #[test]
    fn test_friday_rolls_over_weekend() {
        // 2024-01-05는 금요일
        let days = next_business_days(date("2024-01-05"), 3);
        assert_eq!(
            days,
            vec![date("2024-01-08"), date("2024-01-09"), date("2024-01-10")]
        );
    }

    #[test]
    fn test_no_weekends_strictly_increasing() {
        let days = next_business_days(date("2024-02-14"), 10);
        assert_eq!(days.len(), 10);
        for pair in days.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        for day in &days {
            assert!(is_business_day(*day));
        }
    }

    #[test]
    fn test_starts_strictly_after_last_date() {
        // 일요일에서 시작해도 기준일 자신은 포함되지 않음
        let days = next_business_days(date("2024-01-07"), 1);
        assert_eq!(days, vec![date("2024-01-08")]);
    }

    #[test]
    fn test_is_business_day() {
        assert!(is_business_day(date("2024-01-05"))); // 금
        assert!(!is_business_day(date("2024-01-06"))); // 토
        assert!(!is_business_day(date("2024-01-07"))); // 일
        assert!(is_business_day(date("2024-01-08"))); // 월
    }
}
