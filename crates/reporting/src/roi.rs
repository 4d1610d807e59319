//! ROI / ROAS per channel from attributed revenue and caller-supplied spend.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Return-on-spend figures for one channel.
///
/// Ratios are `None` when spend is absent or not positive, so "no spend data"
/// never reads as "zero return".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRoi {
    pub channel_id: Option<Uuid>,
    pub channel_name: String,
    pub revenue: f64,
    pub attributed_conversions: f64,
    pub spend: Option<f64>,
    /// `(revenue - spend) / spend`
    pub roi: Option<f64>,
    /// `revenue / spend`
    pub roas: Option<f64>,
    pub cost_per_conversion: Option<f64>,
}

impl ChannelRoi {
    pub fn new(
        channel_id: Option<Uuid>,
        channel_name: String,
        revenue: f64,
        attributed_conversions: f64,
        spend: Option<f64>,
    ) -> Self {
        let billable = spend.filter(|s| s.is_finite() && *s > 0.0);
        let roi = billable.map(|s| (revenue - s) / s);
        let roas = billable.map(|s| revenue / s);
        let cost_per_conversion = billable
            .filter(|_| attributed_conversions > 0.0)
            .map(|s| s / attributed_conversions);

        Self {
            channel_id,
            channel_name,
            revenue,
            attributed_conversions,
            spend,
            roi,
            roas,
            cost_per_conversion,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_roi() {
        let row = ChannelRoi::new(None, "search".into(), 6_000.0, 3.0, Some(2_000.0));
        assert!((row.roi.unwrap() - 2.0).abs() < f64::EPSILON);
        assert!((row.roas.unwrap() - 3.0).abs() < f64::EPSILON);
        assert!((row.cost_per_conversion.unwrap() - 666.666_666_666_666_6).abs() < 1e-6);
    }

    #[test]
    fn test_negative_roi() {
        let row = ChannelRoi::new(None, "display".into(), 2_500.0, 1.0, Some(5_000.0));
        assert!((row.roi.unwrap() - (-0.5)).abs() < f64::EPSILON);
        assert!((row.roas.unwrap() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_or_zero_spend_is_undefined() {
        let absent = ChannelRoi::new(None, "email".into(), 100.0, 1.0, None);
        assert_eq!(absent.roi, None);
        assert_eq!(absent.roas, None);
        assert_eq!(absent.spend, None);

        let zero = ChannelRoi::new(None, "email".into(), 100.0, 1.0, Some(0.0));
        assert_eq!(zero.roi, None);
        assert_eq!(zero.spend, Some(0.0));

        let json = serde_json::to_value(&zero).unwrap();
        assert!(json["roi"].is_null());
    }

    #[test]
    fn test_zero_revenue_with_spend_is_total_loss() {
        let row = ChannelRoi::new(None, "social".into(), 0.0, 0.0, Some(300.0));
        assert_eq!(row.roi, Some(-1.0));
        assert_eq!(row.roas, Some(0.0));
        assert_eq!(row.cost_per_conversion, None);
    }
}
