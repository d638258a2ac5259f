use chrono::{DateTime, Utc};

pub fn human_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1}G", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}M", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}K", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Age of `at` relative to `now`, in Portuguese.
pub fn human_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now.signed_duration_since(at);

    let (n, one, many) = if diff.num_days() > 365 {
        (diff.num_days() / 365, "ano", "anos")
    } else if diff.num_days() > 30 {
        (diff.num_days() / 30, "mês", "meses")
    } else if diff.num_days() > 0 {
        (diff.num_days(), "dia", "dias")
    } else if diff.num_hours() > 0 {
        (diff.num_hours(), "hora", "horas")
    } else if diff.num_minutes() > 0 {
        (diff.num_minutes(), "minuto", "minutos")
    } else {
        return "agora".to_string();
    };

    format!("há {} {}", n, if n > 1 { many } else { one })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(512), "512B");
        assert_eq!(human_bytes(2048), "2.0K");
        assert_eq!(human_bytes(50 * 1024 * 1024), "50.0M");
    }

    #[test]
    fn test_human_age() {
        let now = Utc::now();
        assert_eq!(human_age(now, now), "agora");
        assert_eq!(human_age(now - Duration::minutes(1), now), "há 1 minuto");
        assert_eq!(human_age(now - Duration::hours(5), now), "há 5 horas");
        assert_eq!(human_age(now - Duration::days(40), now), "há 1 mês");
        assert_eq!(human_age(now - Duration::days(800), now), "há 2 anos");
    }
}
