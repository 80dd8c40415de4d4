//! Quota monitor: decides when the active account must roll over.

/// One binary gigabyte.
pub const GIB: u64 = 1 << 30;

/// Nominal free-tier quota of a single account (15 GiB).
pub const NOMINAL_QUOTA_BYTES: u64 = 15 * GIB;

/// Absolute usage floor that forces rollover: 14.25 GiB.
///
/// A provider's real ceiling can sit below the nominal 15 GiB (shared quota,
/// reserved overhead), so the floor applies regardless of the reported total.
pub const ROLLOVER_FLOOR_BYTES: u64 = 57 * GIB / 4;

/// Usage ratio that forces rollover, as a percentage.
pub const ROLLOVER_PERCENT: u64 = 95;

/// True when `used/total >= 0.95` or `used >= 14.25 GiB`.
///
/// A `total` of zero means the provider reported no limit; only the absolute
/// floor applies then.
pub fn needs_rollover(used: u64, total: u64) -> bool {
    if used >= ROLLOVER_FLOOR_BYTES {
        return true;
    }
    if total == 0 {
        return false;
    }
    u128::from(used) * 100 >= u128::from(total) * u128::from(ROLLOVER_PERCENT)
}

/// Fraction of quota used, for display. Zero when no limit is reported.
pub fn usage_ratio(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64
    }
}
