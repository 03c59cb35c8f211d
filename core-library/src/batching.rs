//! Chunked iteration for batched queries and writes.
//!
//! Every site that turns a long list into several bounded statements goes
//! through [`Batches`], so the number of statements for `n` items is always
//! `ceil(n / size)`.

/// A restartable view of `items` in chunks of at most `size`
///
/// Iterating does not consume or mutate anything; calling [`Batches::iter`]
/// again starts from the first chunk.
#[derive(Debug, Clone, Copy)]
pub struct Batches<'a, T> {
    items: &'a [T],
    size: usize,
}

impl<'a, T> Batches<'a, T> {
    /// A zero `size` is treated as one.
    pub fn new(items: &'a [T], size: usize) -> Self {
        Self {
            items,
            size: size.max(1),
        }
    }

    /// Number of chunks
    pub fn len(&self) -> usize {
        batch_count(self.items.len(), self.size)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn iter(&self) -> std::slice::Chunks<'a, T> {
        self.items.chunks(self.size)
    }
}

impl<'a, T> IntoIterator for Batches<'a, T> {
    type Item = &'a [T];
    type IntoIter = std::slice::Chunks<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T> IntoIterator for &Batches<'a, T> {
    type Item = &'a [T];
    type IntoIter = std::slice::Chunks<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// `ceil(total / size)`, with a zero `size` treated as one
pub fn batch_count(total: usize, size: usize) -> usize {
    total.div_ceil(size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_count() {
        assert_eq!(batch_count(0, 1000), 0);
        assert_eq!(batch_count(1, 1000), 1);
        assert_eq!(batch_count(1000, 1000), 1);
        assert_eq!(batch_count(2500, 1000), 3);
        assert_eq!(batch_count(3, 0), 3);
    }

    #[test]
    fn test_chunks_cover_all_items() {
        let items: Vec<u32> = (0..2500).collect();
        let batches = Batches::new(&items, 1000);

        assert_eq!(batches.len(), 3);
        let sizes: Vec<usize> = batches.iter().map(<[u32]>::len).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
    }

    #[test]
    fn test_restartable() {
        let items = vec!['a', 'b', 'c'];
        let batches = Batches::new(&items, 2);

        let first: Vec<_> = batches.iter().collect();
        let second: Vec<_> = (&batches).into_iter().collect();
        assert_eq!(first, second);
        assert_eq!(items, vec!['a', 'b', 'c']);
    }

    #[test]
    fn test_empty() {
        let items: Vec<u8> = Vec::new();
        let batches = Batches::new(&items, 10);
        assert!(batches.is_empty());
        assert_eq!(batches.iter().count(), 0);
    }
}
