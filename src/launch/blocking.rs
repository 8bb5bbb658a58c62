// The auto-blocking rule shared by the host code and the device runtime. Along dimension 0, a
// launch uses work-groups of the largest size dividing the extent of the dimension that does not
// exceed the maximum work-group size. The remaining dimensions use work-groups of size 1.

pub fn local_size(extent: usize, max_group_size: usize) -> usize {
    let max = max_group_size.max(1).min(extent.max(1));
    (1..=max).rev()
        .find(|d| extent % d == 0)
        .unwrap_or(1)
}

pub fn group_count(extent: usize, max_group_size: usize) -> usize {
    extent / local_size(extent, max_group_size)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn local_size_divides_extent() {
        assert_eq!(local_size(100, 25), 25);
        assert_eq!(local_size(100, 30), 25);
        assert_eq!(local_size(100, 256), 100);
        assert_eq!(local_size(97, 64), 1);
        assert_eq!(local_size(1024, 256), 256);
    }

    #[test]
    fn group_count_of_reduction_launches() {
        assert_eq!(group_count(100, 100), 1);
        assert_eq!(group_count(100, 50), 2);
        assert_eq!(group_count(100, 25), 4);
    }

    #[test]
    fn empty_extent_has_no_groups() {
        assert_eq!(local_size(0, 64), 1);
        assert_eq!(group_count(0, 64), 0);
    }
}
