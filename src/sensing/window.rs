use std::collections::VecDeque;

use super::sample::ImuSample;

/// The latest `size` samples. Once full, every push slides it by one.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    size: usize,
    samples: VecDeque<ImuSample>,
}

impl SlidingWindow {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            samples: VecDeque::with_capacity(size),
        }
    }

    /// Add a sample; returns true when the window is full.
    pub fn push(&mut self, sample: ImuSample) -> bool {
        if self.samples.len() == self.size {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.size
    }

    /// Oldest first.
    pub fn samples(&mut self) -> &[ImuSample] {
        self.samples.make_contiguous()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ax: i32) -> ImuSample {
        ImuSample {
            ax,
            ay: 0,
            az: 0,
            gx: 0,
            gy: 0,
            gz: 0,
            motion: "Still".into(),
        }
    }

    #[test]
    fn fills_then_slides() {
        let mut window = SlidingWindow::new(3);
        assert!(!window.push(sample(1)));
        assert!(!window.push(sample(2)));
        assert!(window.push(sample(3)));
        assert!(window.push(sample(4)));

        let axes: Vec<i32> = window.samples().iter().map(|s| s.ax).collect();
        assert_eq!(axes, vec![2, 3, 4]);
    }

    #[test]
    fn zero_size_is_clamped() {
        let mut window = SlidingWindow::new(0);
        assert_eq!(window.size(), 1);
        assert!(window.push(sample(1)));
    }
}
