use crate::consts::DEFAULT_ROWS_DIVISOR;

/// Number of image rows to buffer per block when median or mean stacking.
///
/// Every worker holds `rows` rows of every frame, so the per-row cost is
/// `width * frames * sample_size * threads` bytes. With no ceiling a quarter of
/// the image is used; an unbounded ceiling (`u64::MAX`) buffers the whole
/// image. When the ceiling allows more than half but not all of the image,
/// half is used so the two blocks are balanced. Never less than one row.
pub fn rows_in_memory(
    height: usize,
    width: usize,
    frames: usize,
    sample_size: usize,
    threads: usize,
    ceiling: Option<u64>,
) -> usize {
    if height == 0 {
        return 1;
    }
    let Some(ceiling) = ceiling else {
        return (height / DEFAULT_ROWS_DIVISOR).max(1);
    };
    let per_row = (width as u128)
        * (frames as u128)
        * (sample_size as u128)
        * (threads.max(1) as u128);
    if per_row == 0 {
        return height;
    }
    let rows = u128::from(ceiling) / per_row;
    if rows >= height as u128 {
        height
    } else if rows > (height / 2) as u128 {
        (height / 2).max(1)
    } else {
        (rows as usize).max(1)
    }
}
