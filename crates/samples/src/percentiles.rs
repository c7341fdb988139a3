use crate::error::SampleError;
use crate::sample::{Metadata, Sample};
use std::collections::BTreeMap;

pub const DEFAULT_PERCENTILES: [f64; 7] = [1.0, 5.0, 50.0, 90.0, 99.0, 99.9, 100.0];

/// Percentiles, `average` and sample `stddev` of `values`.
///
/// Keys are `p<percentile>` (`p50`, `p99.9`). The percentile index is
/// `floor(n * p / 100)` clamped to the last element.
pub fn percentile_summary(values: &[f64], percentiles: &[f64]) -> Result<BTreeMap<String, f64>, SampleError> {
    if values.is_empty() {
        return Err(SampleError::EmptyValues);
    }
    if let Some(bad) = percentiles
        .iter()
        .copied()
        .find(|p| !p.is_finite() || !(0.0..=100.0).contains(p))
    {
        return Err(SampleError::InvalidPercentile(bad));
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let count = sorted.len();

    let mut summary = BTreeMap::new();
    for &p in percentiles {
        let index = ((count as f64 * p / 100.0) as usize).min(count - 1);
        summary.insert(format!("p{}", p), sorted[index]);
    }

    let average = sorted.iter().sum::<f64>() / count as f64;
    let stddev = if count > 1 {
        let variance =
            sorted.iter().map(|v| (v - average).powi(2)).sum::<f64>() / (count - 1) as f64;
        variance.sqrt()
    } else {
        0.0
    };
    summary.insert("average".to_string(), average);
    summary.insert("stddev".to_string(), stddev);
    Ok(summary)
}

/// One sample per summary entry, named `"<metric> <key>"`.
pub fn percentile_samples(
    metric: &str,
    unit: &str,
    values: &[f64],
    percentiles: &[f64],
    metadata: &Metadata,
) -> Result<Vec<Sample>, SampleError> {
    Ok(percentile_summary(values, percentiles)?
        .into_iter()
        .map(|(key, value)| {
            Sample::new(format!("{} {}", metric, key), value, unit).with_metadata(metadata.clone())
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_summary_over_zero_to_thousand() {
        let values: Vec<f64> = (0..=1000).map(f64::from).collect();
        let summary = percentile_summary(&values, &[0.0, 1.0, 99.9, 100.0]).unwrap();

        assert_eq!(summary.len(), 6);
        assert_eq!(summary["p0"], 0.0);
        assert_eq!(summary["p1"], 10.0);
        assert_eq!(summary["p99.9"], 999.0);
        assert_eq!(summary["p100"], 1000.0);
        assert_eq!(summary["average"], 500.0);
        assert!((summary["stddev"] - 289.1081).abs() < 1e-3);
    }

    #[test]
    fn test_single_value_has_zero_stddev() {
        let summary = percentile_summary(&[4.5], &[50.0]).unwrap();
        assert_eq!(summary["p50"], 4.5);
        assert_eq!(summary["stddev"], 0.0);
    }

    #[test]
    fn test_rejects_empty_and_out_of_range() {
        assert!(matches!(percentile_summary(&[], &[50.0]), Err(SampleError::EmptyValues)));
        assert!(matches!(
            percentile_summary(&[1.0], &[101.0]),
            Err(SampleError::InvalidPercentile(_))
        ));
        assert!(percentile_summary(&[1.0], &[-0.5]).is_err());
    }

    #[test]
    fn test_percentile_samples_names() {
        let samples =
            percentile_samples("Upload Time", "seconds", &[1.0, 2.0, 3.0], &[50.0], &Metadata::new())
                .unwrap();
        let names: Vec<&str> = samples.iter().map(|s| s.metric()).collect();
        assert_eq!(names, ["Upload Time average", "Upload Time p50", "Upload Time stddev"]);
    }

    proptest! {
        #[test]
        fn prop_percentiles_are_members_and_ordered(values in prop::collection::vec(-1e6f64..1e6, 1..200)) {
            let summary = percentile_summary(&values, &DEFAULT_PERCENTILES).unwrap();
            let mut previous = f64::NEG_INFINITY;
            for p in DEFAULT_PERCENTILES {
                let v = summary[&format!("p{}", p)];
                prop_assert!(values.contains(&v));
                prop_assert!(v >= previous);
                previous = v;
            }
        }
    }
}
