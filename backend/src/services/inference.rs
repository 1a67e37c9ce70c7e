use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use ndarray::Array4;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::models::enhance::Region;
use crate::models::error::AppError;

// ---------------------------------------------------------------------------
// Collaborator traits
//
// All calls block on a compute device; callers run them on the blocking pool
// while holding an InferenceGate permit.
// ---------------------------------------------------------------------------

pub trait Denoiser: Send + Sync {
    /// `[1, 3, h, w]` in `[0, 1]` to the same shape and range.
    fn transform(&self, tile: Array4<f32>) -> Result<Array4<f32>, AppError>;
}

pub trait Upscaler: Send + Sync {
    /// Returns an image exactly `scale` times larger in each dimension.
    fn enhance(&self, image: &RgbImage, scale: u32) -> Result<RgbImage, AppError>;
}

pub trait RegionDetector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Region>, AppError>;
}

/// Used when no face model is configured.
pub struct NoRegionDetector;

impl RegionDetector for NoRegionDetector {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<Region>, AppError> {
        Ok(Vec::new())
    }
}

/// Model handles shared by every request.
#[derive(Clone)]
pub struct ModelSet {
    pub denoiser: Arc<dyn Denoiser>,
    pub upscaler: Arc<dyn Upscaler>,
    pub detector: Arc<dyn RegionDetector>,
}

// ---------------------------------------------------------------------------
// Admission gate
// ---------------------------------------------------------------------------

/// Bounds the number of inference calls running on the device at once.
///
/// Waiters queue in FIFO order. The permit is released when dropped, so it
/// must be moved into the task that actually occupies the device.
#[derive(Clone)]
pub struct InferenceGate {
    permits: Arc<Semaphore>,
    capacity: usize,
    wait_timeout: Option<Duration>,
}

impl InferenceGate {
    pub fn new(capacity: usize, wait_timeout: Option<Duration>) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            wait_timeout,
        }
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AppError> {
        let wait = self.permits.clone().acquire_owned();
        let permit = match self.wait_timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                AppError::InferenceTimeout {
                    waited_secs: limit.as_secs(),
                }
            })?,
            None => wait.await,
        };
        permit.map_err(|_| AppError::Internal("Inference gate closed".to_string()))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn waits_time_out_while_the_slot_is_held() {
        let gate = InferenceGate::new(1, Some(Duration::from_millis(50)));
        let held = gate.acquire().await.unwrap();
        assert_eq!(gate.available(), 0);

        let err = gate.acquire().await.unwrap_err();
        assert!(matches!(err, AppError::InferenceTimeout { .. }));

        drop(held);
        assert_eq!(gate.available(), 1);
        let _again = gate.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn waiter_proceeds_once_slot_is_released() {
        let gate = InferenceGate::new(1, None);
        let held = gate.acquire().await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn abandoned_blocking_work_releases_its_slot() {
        let gate = InferenceGate::new(1, Some(Duration::from_secs(5)));
        let permit = gate.acquire().await.unwrap();

        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            std::thread::sleep(Duration::from_millis(30));
        });
        drop(task);

        let _next = gate.acquire().await.unwrap();
        assert_eq!(gate.capacity(), 1);
    }

    #[test]
    fn capacity_is_at_least_one() {
        assert_eq!(InferenceGate::new(0, None).capacity(), 1);
    }
}
