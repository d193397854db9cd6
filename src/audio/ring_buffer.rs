//! Audio ring buffer: fixed pre-allocated circular buffer for PCM samples.
//! Written from the cpal capture callback, drained by the detection thread.
//! No dynamic allocation after construction.

/// Fixed-size ring buffer for normalized f32 PCM samples. Never grows.
pub struct RingBuffer {
    buffer: Box<[f32]>,
    write_pos: usize,
    read_pos: usize,
    capacity: usize,
}

impl RingBuffer {
    /// Create a ring buffer sized for `duration_secs` at `sample_rate` Hz, mono.
    pub fn new(sample_rate: u32, duration_secs: f32) -> Self {
        let capacity = ((sample_rate as f32 * duration_secs) as usize).max(1);
        Self {
            buffer: vec![0f32; capacity].into_boxed_slice(),
            write_pos: 0,
            read_pos: 0,
            capacity,
        }
    }

    /// Write samples into the ring buffer. Overwrites oldest data if full.
    /// Called from the audio callback: no allocation, no blocking.
    #[inline]
    pub fn write(&mut self, samples: &[f32]) {
        for &s in samples {
            self.buffer[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) % self.capacity;
            if self.write_pos == self.read_pos {
                // Lapped the reader; drop the oldest sample.
                self.read_pos = (self.read_pos + 1) % self.capacity;
            }
        }
    }

    /// Read available samples into `output`. Returns the number read.
    #[inline]
    pub fn read(&mut self, output: &mut [f32]) -> usize {
        let to_read = output.len().min(self.available());
        for slot in output.iter_mut().take(to_read) {
            *slot = self.buffer[self.read_pos];
            self.read_pos = (self.read_pos + 1) % self.capacity;
        }
        to_read
    }

    /// Number of unread samples.
    #[inline]
    pub fn available(&self) -> usize {
        if self.write_pos >= self.read_pos {
            self.write_pos - self.read_pos
        } else {
            self.capacity - self.read_pos + self.write_pos
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut rb = RingBuffer::new(100, 1.0);
        rb.write(&[0.1, 0.2, 0.3]);
        assert_eq!(rb.available(), 3);
        let mut out = [0f32; 3];
        assert_eq!(rb.read(&mut out), 3);
        assert_eq!(out, [0.1, 0.2, 0.3]);
        assert_eq!(rb.available(), 0);
    }

    #[test]
    fn read_is_bounded_by_available() {
        let mut rb = RingBuffer::new(100, 1.0);
        rb.write(&[0.5; 4]);
        let mut out = [0f32; 16];
        assert_eq!(rb.read(&mut out), 4);
    }

    #[test]
    fn overflow_drops_oldest_samples() {
        // Capacity 10; write 15, only the newest survive.
        let mut rb = RingBuffer::new(10, 1.0);
        let input: Vec<f32> = (0..15).map(|i| i as f32).collect();
        rb.write(&input);
        assert!(rb.available() < 10);
        let mut out = vec![0f32; rb.available()];
        let n = rb.read(&mut out);
        // Whatever is left must be the tail of the input, in order.
        assert_eq!(out[n - 1], 14.0);
        for pair in out.windows(2) {
            assert_eq!(pair[1], pair[0] + 1.0);
        }
    }

    #[test]
    fn wraparound_preserves_order() {
        let mut rb = RingBuffer::new(8, 1.0);
        let mut out = [0f32; 4];
        for round in 0..5 {
            let base = round as f32 * 4.0;
            rb.write(&[base, base + 1.0, base + 2.0, base + 3.0]);
            assert_eq!(rb.read(&mut out), 4);
            assert_eq!(out, [base, base + 1.0, base + 2.0, base + 3.0]);
        }
    }
}
