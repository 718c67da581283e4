//! Ping-pong render target pair.

use crate::backend::{GpuBackend, TargetId};
use crate::error::GpuResult;

/// Two equally sized off-screen targets selected by a parity index.
///
/// Within a tick, non-terminal passes write to `targets[parity]` and the
/// parity flips after each one, so the next pass reads what the previous
/// pass wrote.
#[derive(Debug)]
pub struct PingPong {
    targets: [TargetId; 2],
    parity: usize,
    size: (u32, u32),
}

impl PingPong {
    pub fn create<B: GpuBackend + ?Sized>(
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> GpuResult<Self> {
        let first = backend.create_target(width, height)?;
        let second = match backend.create_target(width, height) {
            Ok(t) => t,
            Err(e) => {
                backend.release_target(first);
                return Err(e);
            }
        };
        Ok(Self {
            targets: [first, second],
            parity: 0,
            size: (width, height),
        })
    }

    /// Resize both targets. On failure the recorded size is left unchanged,
    /// so the pair still reports stale until a resize succeeds.
    pub fn resize<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> GpuResult<()> {
        if self.size == (width, height) {
            return Ok(());
        }
        for target in self.targets {
            backend.resize_target(target, width, height)?;
        }
        self.size = (width, height);
        Ok(())
    }

    /// Target the next non-terminal pass writes to.
    pub fn write_target(&self) -> TargetId {
        self.targets[self.parity]
    }

    /// Flip roles after a non-terminal pass; returns the target just written.
    pub fn swap(&mut self) -> TargetId {
        let written = self.targets[self.parity];
        self.parity ^= 1;
        written
    }

    /// Start of a tick: the first pass writes `targets[0]`.
    pub fn reset(&mut self) {
        self.parity = 0;
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn release<B: GpuBackend + ?Sized>(self, backend: &mut B) {
        for target in self.targets {
            backend.release_target(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;

    #[test]
    fn test_parity_alternates() {
        let mut backend = SoftwareBackend::new();
        let mut pair = PingPong::create(&mut backend, 4, 4).unwrap();
        let a = pair.write_target();
        assert_eq!(pair.swap(), a);
        let b = pair.write_target();
        assert_ne!(a, b);
        assert_eq!(pair.swap(), b);
        assert_eq!(pair.write_target(), a);
        pair.swap();
        pair.reset();
        assert_eq!(pair.write_target(), a);
    }

    #[test]
    fn test_resize_keeps_both_in_step() {
        let mut backend = SoftwareBackend::new();
        let mut pair = PingPong::create(&mut backend, 4, 4).unwrap();
        pair.resize(&mut backend, 8, 2).unwrap();
        assert_eq!(pair.size(), (8, 2));
        for t in pair.targets {
            assert_eq!(backend.target_size(t), Some((8, 2)));
        }
        assert!(pair.resize(&mut backend, 0, 2).is_err());
        assert_eq!(pair.size(), (8, 2));
    }

    #[test]
    fn test_release_frees_both() {
        let mut backend = SoftwareBackend::new();
        let pair = PingPong::create(&mut backend, 2, 2).unwrap();
        assert_eq!(backend.target_count(), 2);
        pair.release(&mut backend);
        assert_eq!(backend.target_count(), 0);
    }
}
