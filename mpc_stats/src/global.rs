/// Constants shared by every query of a study.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlobalInfo {
    /// fractional bits of fixed-point values
    pub bits_of_precision: usize,
    pub bytes_in_lookup_table_cells: usize,
    pub max_table_rows: usize,
    /// join key columns take values in `[0, key_max)`
    pub key_max: u64,
    /// data values satisfy `|x| < 2^value_bits`
    pub value_bits: usize,
    /// rows a single data owner may contribute
    pub max_list_size: usize,
    /// data owners taking part in the query
    pub num_data_owners: usize,
}

impl GlobalInfo {
    pub const DEFAULT_BITS_OF_PRECISION: usize = 5;
    pub const DEFAULT_CELL_BYTES: usize = 4;
    pub const DEFAULT_MAX_TABLE_ROWS: usize = 1000;
    pub const DEFAULT_KEY_MAX: u64 = 1 << 20;
    pub const DEFAULT_VALUE_BITS: usize = 8;

    pub fn new(max_list_size: usize, num_data_owners: usize) -> Self {
        Self {
            bits_of_precision: Self::DEFAULT_BITS_OF_PRECISION,
            bytes_in_lookup_table_cells: Self::DEFAULT_CELL_BYTES,
            max_table_rows: Self::DEFAULT_MAX_TABLE_ROWS,
            key_max: Self::DEFAULT_KEY_MAX,
            value_bits: Self::DEFAULT_VALUE_BITS,
            max_list_size,
            num_data_owners,
        }
    }

    /// Upper bound on the number of joined rows.
    pub fn max_intersection(&self) -> usize {
        self.max_list_size * self.num_data_owners.max(1)
    }

    /// Bits needed to hold [`GlobalInfo::max_intersection`].
    pub fn intersection_bits(&self) -> usize {
        (usize::BITS - self.max_intersection().leading_zeros()) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersection_bits() {
        let global = GlobalInfo::new(100, 3);
        assert_eq!(global.max_intersection(), 300);
        assert_eq!(global.intersection_bits(), 9);
        assert_eq!(GlobalInfo::new(1, 1).intersection_bits(), 1);
        assert_eq!(GlobalInfo::new(8, 2).intersection_bits(), 5);
    }
}
