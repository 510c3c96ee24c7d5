/// Circular buffer for continuous lookback recording.
///
/// Stores mono f32 samples and continuously overwrites the oldest data, so
/// the most recent `capacity` samples are always readable. Capacity is fixed
/// at construction; no method allocates.
pub struct RingBuffer {
    buf: Vec<f32>,
    write_pos: usize,
    total_written: i64,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0.0; capacity.max(1)],
            write_pos: 0,
            total_written: 0,
        }
    }

    pub fn capacity(&self) -> i64 {
        self.buf.len() as i64
    }

    pub fn total_written(&self) -> i64 {
        self.total_written
    }

    /// Valid samples available for reading.
    pub fn available(&self) -> i64 {
        self.total_written.min(self.capacity())
    }

    /// Write samples, wrapping at capacity. Writing more than the buffer can
    /// hold keeps only the tail.
    pub fn write(&mut self, data: &[f32]) {
        if data.is_empty() {
            return;
        }

        let cap = self.buf.len();
        if data.len() >= cap {
            let tail = &data[data.len() - cap..];
            self.buf.copy_from_slice(tail);
            self.write_pos = 0;
        } else {
            let space_to_end = cap - self.write_pos;
            if data.len() <= space_to_end {
                self.buf[self.write_pos..self.write_pos + data.len()].copy_from_slice(data);
            } else {
                self.buf[self.write_pos..].copy_from_slice(&data[..space_to_end]);
                let remaining = data.len() - space_to_end;
                self.buf[..remaining].copy_from_slice(&data[space_to_end..]);
            }
            self.write_pos = (self.write_pos + data.len()) % cap;
        }

        self.total_written += data.len() as i64;
    }

    /// Read the most recent `dest.len()` samples. If fewer samples exist,
    /// the leading portion of `dest` is zero-filled.
    pub fn read_most_recent(&self, dest: &mut [f32]) {
        let n = dest.len() as i64;
        self.read_from_past(dest, n);
    }

    /// Read `dest.len()` samples starting `samples_ago` samples before the
    /// write head. `samples_ago` is clamped to what is available; any prefix
    /// with no data yet is zero-filled.
    pub fn read_from_past(&self, dest: &mut [f32], samples_ago: i64) {
        if dest.is_empty() {
            return;
        }

        let cap = self.capacity();
        let ago = samples_ago.min(self.available()).max(0);
        let mut n = dest.len() as i64;
        let mut dest_off = 0usize;
        if n > ago {
            let zero_count = (n - ago) as usize;
            dest[..zero_count].fill(0.0);
            dest_off = zero_count;
            n = ago;
        }
        if n == 0 {
            return;
        }

        let read_start = ((self.write_pos as i64 - ago).rem_euclid(cap)) as usize;
        let n = n as usize;
        let space_to_end = cap as usize - read_start;
        if n <= space_to_end {
            dest[dest_off..dest_off + n].copy_from_slice(&self.buf[read_start..read_start + n]);
        } else {
            dest[dest_off..dest_off + space_to_end]
                .copy_from_slice(&self.buf[read_start..]);
            let remaining = n - space_to_end;
            dest[dest_off + space_to_end..dest_off + n].copy_from_slice(&self.buf[..remaining]);
        }
    }

    pub fn clear(&mut self) {
        self.buf.fill(0.0);
        self.write_pos = 0;
        self.total_written = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_roundtrip() {
        let mut ring = RingBuffer::new(16);
        let input = vec![0.1, 0.2, 0.3, 0.4];
        ring.write(&input);

        let mut out = vec![0.0; 4];
        ring.read_most_recent(&mut out);
        assert_eq!(out, input);
    }

    #[test]
    fn test_short_reads_zero_fill() {
        let mut ring = RingBuffer::new(16);
        ring.write(&[1.0, 2.0]);

        let mut out = vec![9.0; 5];
        ring.read_most_recent(&mut out);
        assert_eq!(out, vec![0.0, 0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_oversized_write_keeps_tail() {
        let mut ring = RingBuffer::new(4);
        let input: Vec<f32> = (0..10).map(|i| i as f32).collect();
        ring.write(&input);

        assert_eq!(ring.available(), 4);
        let mut out = vec![0.0; 4];
        ring.read_most_recent(&mut out);
        assert_eq!(out, vec![6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_wrap_around_read() {
        let mut ring = RingBuffer::new(8);
        ring.write(&[1.0; 6]);
        ring.write(&[2.0; 4]);

        let mut out = vec![0.0; 6];
        ring.read_most_recent(&mut out);
        assert_eq!(out, vec![1.0, 1.0, 2.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_read_from_past_offset() {
        let mut ring = RingBuffer::new(16);
        let input: Vec<f32> = (0..10).map(|i| i as f32).collect();
        ring.write(&input);

        // 4 samples starting 8 samples ago: values 2, 3, 4, 5
        let mut out = vec![0.0; 4];
        ring.read_from_past(&mut out, 8);
        assert_eq!(out, vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_available_invariant() {
        let mut ring = RingBuffer::new(8);
        for i in 0..20 {
            ring.write(&[0.5]);
            assert_eq!(ring.available(), ring.total_written().min(ring.capacity()));
            assert_eq!(ring.total_written(), i + 1);
        }
    }

    #[test]
    fn test_clear() {
        let mut ring = RingBuffer::new(8);
        ring.write(&[1.0; 8]);
        ring.clear();
        assert_eq!(ring.available(), 0);
        assert_eq!(ring.total_written(), 0);
    }
}
