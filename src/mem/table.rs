use std::collections::HashMap;
use std::fmt::Debug;

/// Number of addressable entries of every register class
pub const ADDRESS_SPACE: usize = 0x1_0000;

/// Sparse storage for one register class
///
/// The address space is split into slices of `SLICE_SIZE` entries which are allocated on first
/// write. Reading from a slice that was never written yields `Value::default()`.
#[derive(Debug)]
pub struct Table<const SLICE_SIZE: usize, Value: Default + Copy + Debug> {
    slices: HashMap<usize, [Value; SLICE_SIZE]>,
}

impl<const SLICE_SIZE: usize, Value: Default + Copy + Debug> Default for Table<SLICE_SIZE, Value> {
    fn default() -> Self {
        Self {
            slices: HashMap::new(),
        }
    }
}

impl<const SLICE_SIZE: usize, Value: Default + Copy + Debug> Table<SLICE_SIZE, Value> {
    #[cfg(test)]
    pub fn get(&self, addr: usize) -> Value {
        self.slices
            .get(&(addr / SLICE_SIZE))
            .map(|slice| slice[addr % SLICE_SIZE])
            .unwrap_or_default()
    }

    pub fn set(&mut self, addr: usize, value: Value) {
        self.slices
            .entry(addr / SLICE_SIZE)
            .or_insert_with(|| [Value::default(); SLICE_SIZE])[addr % SLICE_SIZE] = value;
    }

    /// Copy `values` into the table starting at `start`
    pub fn write(&mut self, start: usize, mut values: &[Value]) {
        debug_assert!(start + values.len() <= ADDRESS_SPACE);
        let mut offset = start % SLICE_SIZE;
        let mut idx = start / SLICE_SIZE;
        while !values.is_empty() {
            let slice = self
                .slices
                .entry(idx)
                .or_insert_with(|| [Value::default(); SLICE_SIZE]);
            let bound = std::cmp::min(values.len(), SLICE_SIZE - offset);
            slice[offset..(offset + bound)].copy_from_slice(&values[..bound]);
            values = &values[bound..];
            offset = 0;
            idx += 1;
        }
    }

    /// Read `count` values starting at `start`
    pub fn read(&self, start: usize, count: usize) -> Vec<Value> {
        debug_assert!(start + count <= ADDRESS_SPACE);
        let mut vec = Vec::with_capacity(count);
        let mut len = count;
        let mut offset = start % SLICE_SIZE;
        let mut idx = start / SLICE_SIZE;
        while len != 0 {
            let bound = std::cmp::min(len, SLICE_SIZE - offset);
            match self.slices.get(&idx) {
                Some(slice) => vec.extend_from_slice(&slice[offset..(offset + bound)]),
                None => vec.extend(std::iter::repeat_n(Value::default(), bound)),
            }
            len -= bound;
            offset = 0;
            idx += 1;
        }
        vec
    }
}
