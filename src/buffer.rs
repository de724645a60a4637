//! Chunk buffers collecting raw input lines.

/// Buffer builder.
pub trait ChunkBufferBuilder: Default {
    type Buffer: ChunkBuffer;

    /// Creates a new empty buffer.
    fn build(&self) -> Self::Buffer;
}

/// Base limited buffer interface. A buffer is one chunk of raw lines handed to a run producer.
pub trait ChunkBuffer: IntoIterator<Item = String> + Send {
    /// Adds a new line to the buffer.
    fn push(&mut self, line: String);

    /// Returns buffer length
    fn len(&self) -> usize;

    /// Checks if the buffer reached the limit.
    fn is_full(&self) -> bool;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds buffers holding at most `lines_limit` lines.
pub struct LimitedBufferBuilder {
    lines_limit: usize,
    preallocate: bool,
}

impl LimitedBufferBuilder {
    pub fn new(lines_limit: usize, preallocate: bool) -> Self {
        LimitedBufferBuilder {
            lines_limit,
            preallocate,
        }
    }
}

impl ChunkBufferBuilder for LimitedBufferBuilder {
    type Buffer = LimitedBuffer;

    fn build(&self) -> Self::Buffer {
        if self.preallocate {
            LimitedBuffer::with_capacity(self.lines_limit)
        } else {
            LimitedBuffer::new(self.lines_limit)
        }
    }
}

impl Default for LimitedBufferBuilder {
    fn default() -> Self {
        LimitedBufferBuilder {
            lines_limit: 1_000_000,
            preallocate: false,
        }
    }
}

/// Buffer limited by lines count.
#[derive(Debug)]
pub struct LimitedBuffer {
    limit: usize,
    inner: Vec<String>,
}

impl LimitedBuffer {
    pub fn new(limit: usize) -> Self {
        LimitedBuffer {
            limit,
            inner: Vec::new(),
        }
    }

    pub fn with_capacity(limit: usize) -> Self {
        LimitedBuffer {
            limit,
            inner: Vec::with_capacity(limit),
        }
    }
}

impl ChunkBuffer for LimitedBuffer {
    fn push(&mut self, line: String) {
        self.inner.push(line);
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn is_full(&self) -> bool {
        self.inner.len() >= self.limit
    }
}

impl IntoIterator for LimitedBuffer {
    type Item = String;
    type IntoIter = <Vec<String> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

#[cfg(test)]
mod test {
    use super::{ChunkBuffer, ChunkBufferBuilder, LimitedBufferBuilder};

    #[test]
    fn test_limited_buffer() {
        let builder = LimitedBufferBuilder::new(2, true);
        let mut buffer = builder.build();
        assert!(buffer.is_empty());

        buffer.push("1. a".to_string());
        assert_eq!(buffer.is_full(), false);
        buffer.push("2. b".to_string());
        assert_eq!(buffer.is_full(), true);

        let data = Vec::from_iter(buffer);
        assert_eq!(data, vec!["1. a".to_string(), "2. b".to_string()]);
    }
}

#[cfg(feature = "memory-limit")]
pub mod mem {
    use deepsize::DeepSizeOf;

    use super::{ChunkBuffer, ChunkBufferBuilder};

    /// Builds buffers limited both by lines count and by consumed memory.
    pub struct MemoryLimitedBufferBuilder {
        lines_limit: usize,
        memory_limit: u64,
    }

    impl MemoryLimitedBufferBuilder {
        pub fn new(lines_limit: usize, memory_limit: u64) -> Self {
            MemoryLimitedBufferBuilder {
                lines_limit,
                memory_limit,
            }
        }
    }

    impl ChunkBufferBuilder for MemoryLimitedBufferBuilder {
        type Buffer = MemoryLimitedBuffer;

        fn build(&self) -> Self::Buffer {
            MemoryLimitedBuffer::new(self.lines_limit, self.memory_limit)
        }
    }

    impl Default for MemoryLimitedBufferBuilder {
        fn default() -> Self {
            MemoryLimitedBufferBuilder {
                lines_limit: usize::MAX,
                memory_limit: u64::MAX,
            }
        }
    }

    /// Buffer limited by lines count and by consumed memory, whichever is reached first.
    #[derive(Debug)]
    pub struct MemoryLimitedBuffer {
        lines_limit: usize,
        memory_limit: u64,
        current_size: u64,
        inner: Vec<String>,
    }

    impl MemoryLimitedBuffer {
        pub fn new(lines_limit: usize, memory_limit: u64) -> Self {
            MemoryLimitedBuffer {
                lines_limit,
                memory_limit,
                current_size: 0,
                inner: Vec::new(),
            }
        }

        pub fn mem_size(&self) -> u64 {
            self.current_size
        }
    }

    impl ChunkBuffer for MemoryLimitedBuffer {
        fn push(&mut self, line: String) {
            self.current_size += line.deep_size_of() as u64;
            self.inner.push(line);
        }

        fn len(&self) -> usize {
            self.inner.len()
        }

        fn is_full(&self) -> bool {
            self.inner.len() >= self.lines_limit || self.current_size >= self.memory_limit
        }
    }

    impl IntoIterator for MemoryLimitedBuffer {
        type Item = String;
        type IntoIter = <Vec<String> as IntoIterator>::IntoIter;

        fn into_iter(self) -> Self::IntoIter {
            self.inner.into_iter()
        }
    }

    #[cfg(test)]
    mod test {
        use super::{ChunkBuffer, ChunkBufferBuilder, MemoryLimitedBufferBuilder};

        #[test]
        fn test_memory_limited_buffer() {
            // a String costs 24 bytes plus its heap capacity
            let builder = MemoryLimitedBufferBuilder::new(100, 60);
            let mut buffer = builder.build();

            buffer.push(String::from("1. apple"));
            assert_eq!(buffer.mem_size(), 32);
            assert_eq!(buffer.is_full(), false);

            buffer.push(String::from("2. b"));
            assert_eq!(buffer.mem_size(), 60);
            assert_eq!(buffer.is_full(), true);

            let actual_data = Vec::from_iter(buffer);
            assert_eq!(actual_data, vec!["1. apple".to_string(), "2. b".to_string()]);
        }

        #[test]
        fn test_lines_limit_wins() {
            let builder = MemoryLimitedBufferBuilder::new(2, u64::MAX);
            let mut buffer = builder.build();

            buffer.push(String::from("1. a"));
            buffer.push(String::from("2. b"));
            assert_eq!(buffer.is_full(), true);
        }
    }
}
