use chrono::{DateTime, Utc};
use cloudchain_core::quota;
use cloudchain_core::{AccountStatus, LedgerEntry, Presence, QuotaSnapshot};

pub(crate) fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

pub(crate) fn presence_label(presence: Option<Presence>) -> &'static str {
    match presence {
        Some(Presence::Both) => "both",
        Some(Presence::CloudOnly) => "cloud only",
        Some(Presence::LocalOnly) => "local only",
        None => "gone",
    }
}

pub(crate) fn entry_presence(entry: &LedgerEntry) -> &'static str {
    presence_label(entry.presence())
}

pub(crate) fn status_label(status: AccountStatus) -> &'static str {
    match status {
        AccountStatus::Active => "active",
        AccountStatus::Exhausted => "exhausted",
        AccountStatus::Pending => "pending",
    }
}

/// "1.20 GiB of 15.00 GiB (8.0%)", or "unknown" without a snapshot.
pub(crate) fn quota_summary(snapshot: Option<&QuotaSnapshot>) -> String {
    match snapshot {
        None => "unknown".to_string(),
        Some(q) if q.total_bytes == 0 => format!("{} (no limit)", format_bytes(q.used_bytes)),
        Some(q) => format!(
            "{} of {} ({:.1}%)",
            format_bytes(q.used_bytes),
            format_bytes(q.total_bytes),
            quota::usage_ratio(q.used_bytes, q.total_bytes) * 100.0
        ),
    }
}

pub(crate) fn format_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bytes_pick_the_largest_unit() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MiB");
        assert_eq!(format_bytes(15 * 1024 * 1024 * 1024), "15.00 GiB");
    }

    #[test]
    fn presence_labels() {
        assert_eq!(presence_label(Some(Presence::Both)), "both");
        assert_eq!(presence_label(Some(Presence::CloudOnly)), "cloud only");
        assert_eq!(presence_label(Some(Presence::LocalOnly)), "local only");
        assert_eq!(presence_label(None), "gone");
    }

    #[test]
    fn quota_summary_shows_percentage() {
        let snap = QuotaSnapshot {
            used_bytes: 512,
            total_bytes: 1024,
            observed_at: Utc::now(),
        };
        assert_eq!(quota_summary(Some(&snap)), "512 B of 1.00 KiB (50.0%)");
        assert_eq!(quota_summary(None), "unknown");
    }

    #[test]
    fn quota_summary_without_limit() {
        let snap = QuotaSnapshot {
            used_bytes: 10,
            total_bytes: 0,
            observed_at: Utc::now(),
        };
        assert_eq!(quota_summary(Some(&snap)), "10 B (no limit)");
    }
}
