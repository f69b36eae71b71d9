use chrono::{DateTime, Utc};

/// Computes the engine's compromise clock between a venue-reported timestamp and local wall
/// time: `round((venueTs + localTs) / 2)` when `venueTs` is present and finite, otherwise
/// `localTs`.
///
/// Averaging halves one-sided skew (network-delay bias on either side) without requiring
/// synchronized clocks across venues. The engine never trusts venue timestamps for ordering
/// across venues; within one venue they are preserved verbatim as `exchangeTimestamp`.
pub fn unified_timestamp(
    exchange_timestamp: Option<DateTime<Utc>>,
    local_timestamp: DateTime<Utc>,
) -> DateTime<Utc> {
    let Some(exchange_timestamp) = exchange_timestamp else {
        return local_timestamp;
    };

    let venue_ms = exchange_timestamp.timestamp_millis();
    let local_ms = local_timestamp.timestamp_millis();

    let averaged_ms = venue_ms.checked_add(local_ms).map(|sum| {
        // round-half-up on integer division, matching round() for the midpoint case.
        let half = sum.div_euclid(2);
        if sum.rem_euclid(2) != 0 && sum >= 0 {
            half + 1
        } else {
            half
        }
    });

    match averaged_ms {
        Some(ms) => DateTime::from_timestamp_millis(ms).unwrap_or(local_timestamp),
        None => local_timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn test_unified_timestamp_averages_present_venue_ts() {
        let venue = at(1_700_000_000_000);
        let local = at(1_700_000_000_500);

        let unified = unified_timestamp(Some(venue), local);

        assert_eq!(unified, at(1_700_000_000_250));
    }

    #[test]
    fn test_unified_timestamp_falls_back_to_local_when_absent() {
        let local = at(1_700_000_000_500);

        assert_eq!(unified_timestamp(None, local), local);
    }

    #[test]
    fn test_unified_timestamp_bounded_by_min_max() {
        let venue = at(1_000);
        let local = at(2_000);

        let unified = unified_timestamp(Some(venue), local);

        assert!(unified >= venue && unified <= local);
    }
}
