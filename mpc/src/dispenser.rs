use std::collections::VecDeque;

/// Owned queue of pre-generated randomness, consumed exactly once per item.
///
/// Running out is a planning bug, not a runtime condition: both [`Dispenser::take_one`]
/// and [`Dispenser::split`] panic when too few items remain.
#[derive(Clone, Debug)]
pub struct Dispenser<T> {
    items: VecDeque<T>,
}

impl<T> Dispenser<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into(),
        }
    }

    pub fn empty() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    pub fn take_one(&mut self) -> T {
        match self.items.pop_front() {
            Some(item) => item,
            None => panic!("{} dispenser exhausted", std::any::type_name::<T>()),
        }
    }

    /// Detach the next `n` items as their own dispenser.
    pub fn split(&mut self, n: usize) -> Dispenser<T> {
        if self.items.len() < n {
            panic!(
                "{} dispenser has {} items, {} requested",
                std::any::type_name::<T>(),
                self.items.len(),
                n
            );
        }
        let rest = self.items.split_off(n);
        Dispenser {
            items: std::mem::replace(&mut self.items, rest),
        }
    }

    /// Take the next `n` items.
    pub fn take(&mut self, n: usize) -> Vec<T> {
        self.split(n).into_vec()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items.into()
    }
}

impl<T> From<Vec<T>> for Dispenser<T> {
    fn from(items: Vec<T>) -> Self {
        Self::new(items)
    }
}

impl<T> Default for Dispenser<T> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_and_split() {
        let mut d = Dispenser::new(vec![1, 2, 3, 4, 5]);
        assert_eq!(d.take_one(), 1);
        let mut little = d.split(2);
        assert_eq!(little.len(), 2);
        assert_eq!(little.take_one(), 2);
        assert_eq!(little.take_one(), 3);
        assert_eq!(d.take(2), vec![4, 5]);
        assert!(d.is_empty());
    }

    #[test]
    #[should_panic(expected = "dispenser exhausted")]
    fn test_exhaustion_panics() {
        let mut d: Dispenser<u8> = Dispenser::empty();
        d.take_one();
    }

    #[test]
    #[should_panic(expected = "requested")]
    fn test_oversized_split_panics() {
        let mut d = Dispenser::new(vec![1]);
        d.split(2);
    }
}
