use crate::consts::INSERTION_SORT_THRESHOLD;

use super::Sample;

/// Sort a buffer in place with a hybrid quicksort.
///
/// Middle-element pivot, two-pointer Hoare partitioning, insertion sort for
/// partitions of at most [`INSERTION_SORT_THRESHOLD`] elements. Worst case is
/// quadratic on adversarial orderings.
pub fn sort_in_place<T: Sample>(mut data: &mut [T]) {
    while data.len() > INSERTION_SORT_THRESHOLD {
        let pivot = data.len() / 2;
        let (left_end, right_start) = hoare_partition(data, pivot);
        // Recurse into the smaller side so stack depth stays logarithmic.
        let (left, rest) = std::mem::take(&mut data).split_at_mut(right_start);
        let left = &mut left[..left_end];
        if left.len() < rest.len() {
            sort_in_place(left);
            data = rest;
        } else {
            sort_in_place(rest);
            data = left;
        }
    }
    insertion_sort(data);
}

/// Partition around `data[pivot_index]`.
///
/// Returns `(left_end, right_start)`: afterwards every element of
/// `data[..left_end]` is `<=` the pivot, every element of `data[right_start..]`
/// is `>=` the pivot, and anything in between equals the pivot.
pub(crate) fn hoare_partition<T: Sample>(data: &mut [T], pivot_index: usize) -> (usize, usize) {
    debug_assert!(!data.is_empty());
    let pivot = data[pivot_index];
    let mut i: isize = 0;
    let mut j: isize = data.len() as isize - 1;

    while i <= j {
        while data[i as usize] < pivot {
            i += 1;
        }
        while data[j as usize] > pivot {
            j -= 1;
        }
        if i <= j {
            data.swap(i as usize, j as usize);
            i += 1;
            j -= 1;
        }
    }

    ((j + 1) as usize, i as usize)
}

pub(crate) fn insertion_sort<T: Sample>(data: &mut [T]) {
    for i in 1..data.len() {
        let value = data[i];
        let mut j = i;
        while j > 0 && data[j - 1] > value {
            data[j] = data[j - 1];
            j -= 1;
        }
        data[j] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_bounds() {
        let mut v = vec![5, 1, 9, 3, 3, 7, 3, 0, 8];
        let (le, rs) = hoare_partition(&mut v, 4);
        assert!(le <= rs);
        assert!(v[..le].iter().all(|&x| x <= 3));
        assert!(v[rs..].iter().all(|&x| x >= 3));
        assert!(v[le..rs].iter().all(|&x| x == 3));
    }

    #[test]
    fn test_insertion_sort_small() {
        let mut v = vec![3.0f32, -1.0, 2.5, 2.5, 0.0];
        insertion_sort(&mut v);
        assert_eq!(v, vec![-1.0, 0.0, 2.5, 2.5, 3.0]);
    }
}
