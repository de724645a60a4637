//! Sequential chunk reader.

use std::io::{self, prelude::*};

use crate::buffer::{ChunkBuffer, ChunkBufferBuilder};

/// Splits an input stream into chunks of raw lines.
///
/// The stream is consumed strictly forward. Every yielded chunk is non-empty, only the last one
/// may be partially filled. After an I/O error is yielded the reader is exhausted.
pub struct ChunkReader<'a, R: BufRead, B: ChunkBufferBuilder> {
    lines: io::Lines<R>,
    buffer_builder: &'a B,
    exhausted: bool,
}

impl<'a, R: BufRead, B: ChunkBufferBuilder> ChunkReader<'a, R, B> {
    pub fn new(input: R, buffer_builder: &'a B) -> Self {
        ChunkReader {
            lines: input.lines(),
            buffer_builder,
            exhausted: false,
        }
    }
}

impl<'a, R: BufRead, B: ChunkBufferBuilder> Iterator for ChunkReader<'a, R, B> {
    type Item = io::Result<B::Buffer>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        let mut chunk = self.buffer_builder.build();
        // a chunk takes at least one line whatever the buffer limit
        loop {
            match self.lines.next() {
                Some(Ok(line)) => chunk.push(line),
                Some(Err(err)) => {
                    self.exhausted = true;
                    return Some(Err(err));
                }
                None => {
                    self.exhausted = true;
                    break;
                }
            }
            if chunk.is_full() {
                break;
            }
        }

        if chunk.is_empty() {
            None
        } else {
            Some(Ok(chunk))
        }
    }
}
