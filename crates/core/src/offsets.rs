//! Planning the `resultOffset` of every page of a query.

use crate::{Error, Result};
use std::iter::{FusedIterator, StepBy};
use std::ops::Range;

/// The ordered offsets of every page needed to read `feature_count` features.
///
/// Created by [offsets].
#[derive(Debug, Clone)]
pub struct Offsets {
    inner: StepBy<Range<u64>>,
}

/// Plans the offsets needed to page through `feature_count` features when the
/// server returns at most `max_record_count` features per request.
///
/// The sequence is `0, step, 2 * step, ...`, stopping before
/// `feature_count`. A zero feature count produces no offsets.
///
/// # Examples
///
/// ```
/// let offsets: Vec<_> = restfeature::offsets(500, 100).unwrap().collect();
/// assert_eq!(offsets, vec![0, 100, 200, 300, 400]);
///
/// assert_eq!(restfeature::offsets(0, 100).unwrap().len(), 0);
/// assert!(restfeature::offsets(500, 0).is_err());
/// ```
pub fn offsets(feature_count: u64, max_record_count: i64) -> Result<Offsets> {
    if max_record_count <= 0 {
        return Err(Error::InvalidMaxRecordCount(max_record_count));
    }
    let step = usize::try_from(max_record_count)
        .map_err(|_| Error::InvalidMaxRecordCount(max_record_count))?;
    Ok(Offsets {
        inner: (0..feature_count).step_by(step),
    })
}

impl Iterator for Offsets {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Offsets {}
impl FusedIterator for Offsets {}

#[cfg(test)]
mod tests {
    use super::offsets;
    use crate::{Error, ErrorKind};
    use rstest::rstest;

    #[rstest]
    #[case(500, 100, vec![0, 100, 200, 300, 400])]
    #[case(501, 100, vec![0, 100, 200, 300, 400, 500])]
    #[case(99, 100, vec![0])]
    #[case(1, 1, vec![0])]
    #[case(0, 100, vec![])]
    fn planned(#[case] feature_count: u64, #[case] max_record_count: i64, #[case] expected: Vec<u64>) {
        let offsets: Vec<_> = offsets(feature_count, max_record_count).unwrap().collect();
        assert_eq!(offsets, expected);
    }

    #[rstest]
    #[case(0)]
    #[case(-1)]
    #[case(i64::MIN)]
    fn invalid_max_record_count(#[case] max_record_count: i64) {
        let err = offsets(10, max_record_count).unwrap_err();
        assert!(matches!(err, Error::InvalidMaxRecordCount(n) if n == max_record_count));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn sequence_properties() {
        for feature_count in 0..250u64 {
            for max_record_count in 1..40i64 {
                let step = max_record_count as u64;
                let offsets: Vec<_> = offsets(feature_count, max_record_count).unwrap().collect();
                assert_eq!(offsets.len() as u64, feature_count.div_ceil(step));
                if let Some(first) = offsets.first() {
                    assert_eq!(*first, 0);
                }
                assert!(offsets.windows(2).all(|w| w[1] - w[0] == step));
                if let Some(last) = offsets.last() {
                    assert!(*last < feature_count);
                }
            }
        }
    }

    #[test]
    fn exact_size() {
        let offsets = offsets(1_000_001, 1000).unwrap();
        assert_eq!(offsets.len(), 1001);
    }
}
