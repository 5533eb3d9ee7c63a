use crate::error::{Result, TelemetryError};
use crate::reading::DeviceId;
use fxhash::FxHashMap;

/// Whether a device has accumulated a full window yet.
///
/// A device never leaves `Ready` once it gets there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Collecting,
    Ready,
}

/// Fixed-capacity ring of the most recent samples of one device.
///
/// Only the last `capacity` values are retained; `total` keeps counting every
/// sample ever appended.
#[derive(Debug)]
pub struct DeviceWindow {
    buf: Box<[f64]>,
    head: usize,
    total: u64,
}

impl DeviceWindow {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "window capacity must be greater than 0");
        Self {
            buf: vec![0.0; capacity].into_boxed_slice(),
            head: 0,
            total: 0,
        }
    }

    #[inline(always)]
    pub fn push(&mut self, value: f64) {
        self.buf[self.head] = value;
        self.head += 1;
        if self.head == self.buf.len() {
            self.head = 0;
        }
        self.total += 1;
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of values currently held, at most `capacity`.
    pub fn len(&self) -> usize {
        self.total.min(self.buf.len() as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Returns the held values as two slices, oldest first.
    fn as_slices(&self) -> (&[f64], &[f64]) {
        if self.total < self.buf.len() as u64 {
            (&self.buf[..self.head], &[])
        } else {
            (&self.buf[self.head..], &self.buf[..self.head])
        }
    }

    /// Copies the `count` most recent values, oldest first, into `out`.
    /// Returns false if fewer than `count` values are held.
    pub fn latest_into(&self, count: usize, out: &mut Vec<f64>) -> bool {
        if count > self.len() {
            return false;
        }
        out.clear();
        let (older, newer) = self.as_slices();
        let skip = self.len() - count;
        if skip < older.len() {
            out.extend_from_slice(&older[skip..]);
            out.extend_from_slice(newer);
        } else {
            out.extend_from_slice(&newer[skip - older.len()..]);
        }
        true
    }
}

/// Per-device sample windows, all sharing the same capacity.
pub struct WindowStore {
    window_size: usize,
    windows: FxHashMap<DeviceId, DeviceWindow>,
}

impl WindowStore {
    pub fn new(window_size: usize) -> Self {
        assert!(window_size > 0, "window_size must be greater than 0");
        Self {
            window_size,
            windows: FxHashMap::default(),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Appends `value` as the newest sample of `device`, creating its window on
    /// first sight.
    #[inline(always)]
    pub fn append(&mut self, device: DeviceId, value: f64) {
        // Known devices must not go through `entry`, which may reserve.
        if let Some(window) = self.windows.get_mut(&device) {
            window.push(value);
            return;
        }
        let mut window = DeviceWindow::new(self.window_size);
        window.push(value);
        self.windows.insert(device, window);
    }

    /// Returns the `count` most recently appended values in arrival order.
    pub fn latest(&self, device: DeviceId, count: usize) -> Result<Vec<f64>> {
        let mut out = Vec::with_capacity(count);
        self.latest_into(device, count, &mut out)?;
        Ok(out)
    }

    /// Same as [`WindowStore::latest`], writing into a caller-owned buffer.
    pub fn latest_into(&self, device: DeviceId, count: usize, out: &mut Vec<f64>) -> Result<()> {
        let window = self.windows.get(&device);
        let copied = window.is_some_and(|w| w.latest_into(count, out));
        if copied {
            Ok(())
        } else {
            Err(TelemetryError::InsufficientSamples {
                device,
                requested: count,
                available: window.map_or(0, DeviceWindow::len),
            })
        }
    }

    /// Number of samples ever appended for `device`.
    pub fn size(&self, device: DeviceId) -> u64 {
        self.windows.get(&device).map_or(0, DeviceWindow::total)
    }

    pub fn state(&self, device: DeviceId) -> DeviceState {
        if self.size(device) >= self.window_size as u64 {
            DeviceState::Ready
        } else {
            DeviceState::Collecting
        }
    }

    pub fn device_count(&self) -> usize {
        self.windows.len()
    }

    pub fn window(&self, device: DeviceId) -> Option<&DeviceWindow> {
        self.windows.get(&device)
    }
}
