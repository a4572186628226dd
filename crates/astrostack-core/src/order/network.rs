//! Fixed-size sorting and median networks for buffers of 1 to 9 samples.
//!
//! The full-sort tables are Bose-Nelson networks. The odd-size median tables
//! are the shorter selection networks that only guarantee the centre element.

use super::Sample;

type Comparators = &'static [(u8, u8)];

const SORT_2: Comparators = &[(0, 1)];
const SORT_3: Comparators = &[(1, 2), (0, 2), (0, 1)];
const SORT_4: Comparators = &[(0, 1), (2, 3), (0, 2), (1, 3), (1, 2)];
#[rustfmt::skip]
const SORT_5: Comparators = &[
    (0, 1), (3, 4), (2, 4), (2, 3), (0, 3), (0, 2), (1, 4), (1, 3), (1, 2),
];
#[rustfmt::skip]
const SORT_6: Comparators = &[
    (1, 2), (0, 2), (0, 1), (4, 5), (3, 5), (3, 4),
    (0, 3), (1, 4), (2, 5), (2, 4), (1, 3), (2, 3),
];
#[rustfmt::skip]
const SORT_7: Comparators = &[
    (1, 2), (0, 2), (0, 1), (3, 4), (5, 6), (3, 5), (4, 6), (4, 5),
    (0, 4), (0, 3), (1, 5), (2, 6), (2, 5), (1, 3), (2, 4), (2, 3),
];
#[rustfmt::skip]
const SORT_8: Comparators = &[
    (0, 1), (2, 3), (0, 2), (1, 3), (1, 2), (4, 5), (6, 7), (4, 6), (5, 7), (5, 6),
    (0, 4), (1, 5), (1, 4), (2, 6), (3, 7), (3, 6), (2, 4), (3, 5), (3, 4),
];
#[rustfmt::skip]
const SORT_9: Comparators = &[
    (0, 1), (2, 3), (0, 2), (1, 3), (1, 2), (4, 5), (7, 8), (6, 8), (6, 7),
    (4, 7), (4, 6), (5, 8), (5, 7), (5, 6), (0, 5), (0, 4), (1, 6), (1, 5),
    (1, 4), (2, 7), (3, 8), (3, 7), (2, 5), (2, 4), (3, 6), (3, 5), (3, 4),
];

const MEDIAN_5: Comparators = &[(0, 1), (3, 4), (0, 3), (1, 4), (1, 2), (2, 3), (1, 2)];
#[rustfmt::skip]
const MEDIAN_7: Comparators = &[
    (0, 5), (0, 3), (1, 6), (2, 4), (0, 1), (3, 5), (2, 6),
    (2, 3), (3, 6), (4, 5), (1, 4), (1, 3), (3, 4),
];
#[rustfmt::skip]
const MEDIAN_9: Comparators = &[
    (1, 2), (4, 5), (7, 8), (0, 1), (3, 4), (6, 7), (1, 2), (4, 5), (7, 8), (0, 3),
    (5, 8), (4, 7), (3, 6), (1, 4), (2, 5), (4, 7), (4, 2), (6, 4), (4, 2),
];

fn sort_table(n: usize) -> Comparators {
    match n {
        2 => SORT_2,
        3 => SORT_3,
        4 => SORT_4,
        5 => SORT_5,
        6 => SORT_6,
        7 => SORT_7,
        8 => SORT_8,
        9 => SORT_9,
        _ => &[],
    }
}

#[inline(always)]
fn apply<T: Sample>(data: &mut [T], comparators: Comparators) {
    for &(a, b) in comparators {
        let (a, b) = (a as usize, b as usize);
        if data[a] > data[b] {
            data.swap(a, b);
        }
    }
}

/// Whether a buffer of this length is handled by a network.
pub fn supports(n: usize) -> bool {
    (1..=crate::consts::SORTING_NETWORK_MAX).contains(&n)
}

/// Fully sort a buffer of 1 to 9 samples.
pub fn sort_small<T: Sample>(data: &mut [T]) {
    debug_assert!(supports(data.len()));
    apply(data, sort_table(data.len()));
}

/// Median of a buffer of 1 to 9 samples. The buffer is reordered.
///
/// Even sizes return the mean of the two central samples.
pub fn median_small<T: Sample>(data: &mut [T]) -> f64 {
    let n = data.len();
    debug_assert!(supports(n));
    match n {
        5 => apply(data, MEDIAN_5),
        7 => apply(data, MEDIAN_7),
        9 => apply(data, MEDIAN_9),
        _ => apply(data, sort_table(n)),
    }
    if n % 2 == 1 {
        data[n / 2].as_f64()
    } else {
        (data[n / 2 - 1].as_f64() + data[n / 2].as_f64()) / 2.0
    }
}
