//! FILENAME: etl-model/src/span.rs
//! PURPOSE: Set algebra over time-bucket coverage spans.
//! CONTEXT: A span is a half-open range of bucket indices
//! `[range_start, range_start + range_length)` for which data exists.
//! Union (`consolidate_spans`) and the subset-based intersection are used by
//! the pivot to summarise measurement-time coverage across files.
//!
//! Reduced spans are opaque: every set operation fails with
//! `EtlError::ReducedSpan` when one is present.

use serde::{Deserialize, Serialize};

use crate::error::{EtlError, EtlResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub range_start: i64,
    pub range_length: i64,
    #[serde(default)]
    pub reduced: bool,
}

impl Span {
    pub fn new(range_start: i64, range_length: i64) -> Self {
        Span {
            range_start,
            range_length,
            reduced: false,
        }
    }

    /// Exclusive end of the range.
    pub fn range_end(&self) -> i64 {
        self.range_start + self.range_length
    }

    /// Same span moved by `delta` buckets.
    pub fn shifted(&self, delta: i64) -> Self {
        Span {
            range_start: self.range_start + delta,
            ..*self
        }
    }
}

fn check(span: &Span) -> EtlResult<()> {
    if span.reduced {
        Err(EtlError::ReducedSpan(*span))
    } else {
        Ok(())
    }
}

fn check_all(spans: &[Span]) -> EtlResult<()> {
    spans.iter().try_for_each(check)
}

/// `a` lies entirely within `b`.
pub fn is_subset(a: &Span, b: &Span) -> EtlResult<bool> {
    check(a)?;
    check(b)?;
    Ok(a.range_start >= b.range_start && a.range_end() <= b.range_end())
}

/// `a` and `b` touch or overlap without either containing the other.
pub fn is_continuous(a: &Span, b: &Span) -> EtlResult<bool> {
    if is_subset(a, b)? || is_subset(b, a)? {
        return Ok(false);
    }
    Ok(a.range_start <= b.range_end() && b.range_start <= a.range_end())
}

/// Merges a mutually combinable cluster into one span covering all of it.
pub fn combine(spans: &[Span]) -> EtlResult<Option<Span>> {
    check_all(spans)?;
    let start = spans.iter().map(|s| s.range_start).min();
    let end = spans.iter().map(Span::range_end).max();
    Ok(start.zip(end).map(|(start, end)| Span::new(start, end - start)))
}

/// Span union: the minimal sorted set covering the same buckets.
///
/// Any two spans where one is a subset of the other, or that touch or
/// overlap, are merged until no such pair remains.
pub fn consolidate_spans(spans: &[Span]) -> EtlResult<Vec<Span>> {
    check_all(spans)?;

    let mut sorted: Vec<Span> = spans.to_vec();
    sorted.sort_by_key(|s| (s.range_start, s.range_end()));

    let mut result: Vec<Span> = Vec::with_capacity(sorted.len());
    for span in sorted {
        match result.last_mut() {
            Some(last) if span.range_start <= last.range_end() => {
                if span.range_end() > last.range_end() {
                    last.range_length = span.range_end() - last.range_start;
                }
            }
            _ => result.push(span),
        }
    }
    Ok(result)
}

/// Pairwise intersection.
///
/// Both inputs are consolidated, then only spans of either side that are a
/// subset of some span on the other side are kept, and the kept set is
/// consolidated again.
pub fn intersection(spans_a: &[Span], spans_b: &[Span]) -> EtlResult<Vec<Span>> {
    let a = consolidate_spans(spans_a)?;
    let b = consolidate_spans(spans_b)?;

    let mut kept = Vec::new();
    for (side, other) in [(&a, &b), (&b, &a)] {
        for span in side.iter() {
            let mut inside = false;
            for candidate in other.iter() {
                if is_subset(span, candidate)? {
                    inside = true;
                    break;
                }
            }
            if inside {
                kept.push(*span);
            }
        }
    }
    consolidate_spans(&kept)
}

/// Union over a collection of span groups.
pub fn union_all<'a, I>(groups: I) -> EtlResult<Vec<Span>>
where
    I: IntoIterator<Item = &'a [Span]>,
{
    let all: Vec<Span> = groups.into_iter().flatten().copied().collect();
    consolidate_spans(&all)
}

/// Left fold of pairwise intersection over a collection of span groups.
///
/// The fold starts from an empty accumulator; while the accumulator is empty
/// the next group is taken as-is.
pub fn intersection_all<'a, I>(groups: I) -> EtlResult<Vec<Span>>
where
    I: IntoIterator<Item = &'a [Span]>,
{
    groups.into_iter().try_fold(Vec::new(), |acc, group| {
        if acc.is_empty() {
            consolidate_spans(group)
        } else {
            intersection(&acc, group)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn s(start: i64, len: i64) -> Span {
        Span::new(start, len)
    }

    #[test]
    fn test_subset_and_continuous() {
        assert!(is_subset(&s(2, 3), &s(0, 10)).unwrap());
        assert!(!is_subset(&s(0, 10), &s(2, 3)).unwrap());
        assert!(is_subset(&s(4, 2), &s(4, 2)).unwrap());

        // touching
        assert!(is_continuous(&s(0, 3), &s(3, 2)).unwrap());
        // overlapping
        assert!(is_continuous(&s(0, 4), &s(3, 4)).unwrap());
        // gap
        assert!(!is_continuous(&s(0, 2), &s(3, 2)).unwrap());
        // subset is not continuous
        assert!(!is_continuous(&s(1, 1), &s(0, 4)).unwrap());
    }

    #[test]
    fn test_combine() {
        assert_eq!(combine(&[s(3, 2), s(0, 4)]).unwrap(), Some(s(0, 5)));
        assert_eq!(combine(&[]).unwrap(), None);
    }

    #[test]
    fn test_consolidate_merges_touching_and_nested() {
        let merged = consolidate_spans(&[s(5, 2), s(0, 2), s(2, 1), s(1, 1), s(10, 1)]).unwrap();
        assert_eq!(merged, vec![s(0, 3), s(5, 2), s(10, 1)]);
    }

    #[test]
    fn test_intersection_keeps_contained_spans() {
        let a = [s(0, 10)];
        let b = [s(2, 2), s(8, 5)];
        // s(8,5) only partially overlaps and is dropped
        assert_eq!(intersection(&a, &b).unwrap(), vec![s(2, 2)]);
    }

    #[test]
    fn test_intersection_all_starts_from_first_group() {
        let g1 = vec![s(0, 10)];
        let g2 = vec![s(2, 3)];
        let groups: Vec<&[Span]> = vec![g1.as_slice(), g2.as_slice()];
        assert_eq!(intersection_all(groups).unwrap(), vec![s(2, 3)]);

        let empty: Vec<&[Span]> = Vec::new();
        assert!(intersection_all(empty).unwrap().is_empty());
    }

    #[test]
    fn test_union_all() {
        let g1 = vec![s(0, 2)];
        let g2 = vec![s(2, 2), s(9, 1)];
        let groups: Vec<&[Span]> = vec![g1.as_slice(), g2.as_slice()];
        assert_eq!(union_all(groups).unwrap(), vec![s(0, 4), s(9, 1)]);
    }

    #[test]
    fn test_reduced_span_fails() {
        let reduced = Span {
            reduced: true,
            ..s(0, 1)
        };
        assert!(matches!(
            consolidate_spans(&[s(0, 1), reduced]),
            Err(EtlError::ReducedSpan(_))
        ));
        assert!(is_subset(&reduced, &s(0, 4)).is_err());
        assert!(intersection(&[s(0, 1)], &[reduced]).is_err());
        assert!(combine(&[reduced]).is_err());
    }

    fn span_strategy() -> impl Strategy<Value = Span> {
        (-50i64..50, 1i64..20).prop_map(|(start, len)| Span::new(start, len))
    }

    proptest! {
        #[test]
        fn prop_consolidate_is_idempotent(spans in prop::collection::vec(span_strategy(), 0..20)) {
            let once = consolidate_spans(&spans).unwrap();
            let twice = consolidate_spans(&once).unwrap();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_consolidate_single_is_identity(span in span_strategy()) {
            prop_assert_eq!(consolidate_spans(&[span]).unwrap(), vec![span]);
        }

        #[test]
        fn prop_union_is_commutative(
            a in prop::collection::vec(span_strategy(), 0..10),
            b in prop::collection::vec(span_strategy(), 0..10),
        ) {
            let ab = union_all([a.as_slice(), b.as_slice()]).unwrap();
            let ba = union_all([b.as_slice(), a.as_slice()]).unwrap();
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn prop_subset_reflexive_and_excludes_continuous(a in span_strategy(), b in span_strategy()) {
            prop_assert!(is_subset(&a, &a).unwrap());
            if is_subset(&a, &b).unwrap() && !is_subset(&b, &a).unwrap() {
                prop_assert!(!is_continuous(&a, &b).unwrap());
            }
        }

        #[test]
        fn prop_empty_is_left_identity_of_fold(spans in prop::collection::vec(span_strategy(), 0..10)) {
            let folded = intersection_all([spans.as_slice()]).unwrap();
            prop_assert_eq!(folded, consolidate_spans(&spans).unwrap());
        }

        #[test]
        fn prop_fold_matches_nested_pairs(
            a in prop::collection::vec(span_strategy(), 1..6),
            b in prop::collection::vec(span_strategy(), 1..6),
            c in prop::collection::vec(span_strategy(), 1..6),
        ) {
            let ab = intersection(&a, &b).unwrap();
            // an empty accumulator restarts the fold
            prop_assume!(!ab.is_empty());
            let left = intersection(&ab, &c).unwrap();
            let folded = intersection_all([a.as_slice(), b.as_slice(), c.as_slice()]).unwrap();
            prop_assert_eq!(left, folded);
        }
    }
}
