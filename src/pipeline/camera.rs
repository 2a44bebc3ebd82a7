use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use image::{DynamicImage, RgbImage, RgbaImage};
use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    query,
    utils::{ApiBackend, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType},
};

use super::components::CaptureSource;

const FRAME_WAIT: Duration = Duration::from_millis(50);

// Prefer pixel formats that are widely supported on macOS (the built-in cameras
// often reject YUYV even though Nokhwa reports it).
const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
    FrameFormat::RAWRGB,
    FrameFormat::RAWBGR,
    FrameFormat::GRAY,
    FrameFormat::YUYV,
    FrameFormat::NV12,
    FrameFormat::MJPEG,
];

fn requested_formats() -> [RequestedFormat<'static>; 4] {
    [
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestFrameRate,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::with_formats(
            RequestedFormatType::AbsoluteHighestResolution,
            PREFERRED_PIXEL_FORMATS,
        ),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    ]
}

/// `(index, name)` of every camera the native backend reports.
pub fn available_cameras() -> Result<Vec<(u32, String)>> {
    let cameras = query(ApiBackend::Auto)?;
    Ok(cameras
        .into_iter()
        .filter_map(|info| match info.index() {
            CameraIndex::Index(index) => Some((*index, info.human_name())),
            CameraIndex::String(_) => None,
        })
        .collect())
}

fn build_camera(index: CameraIndex) -> Result<Camera> {
    let mut last_err = None;

    for requested in requested_formats() {
        match Camera::new(index.clone(), requested) {
            Ok(mut camera) => match camera.open_stream() {
                Ok(()) => return Ok(camera),
                Err(err) => last_err = Some(err.into()),
            },
            Err(err) => last_err = Some(err.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
}

/// Webcam capture. The camera handle is not `Send`, so it lives on its own
/// thread and hands decoded frames over a single-slot channel.
#[derive(Debug)]
pub struct NokhwaCapture {
    frames: Receiver<RgbaImage>,
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl NokhwaCapture {
    pub fn open(index: u32) -> Result<Self> {
        // Fail fast before spawning the capture thread.
        drop(build_camera(CameraIndex::Index(index))?);

        let (frame_tx, frames) = bounded(1);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = thread::Builder::new()
            .name("gesture-camera".to_string())
            .spawn(move || {
                let mut camera = match build_camera(CameraIndex::Index(index)) {
                    Ok(camera) => camera,
                    Err(err) => {
                        log::error!("failed to open camera {index}: {err:?}");
                        return;
                    }
                };
                let resolution = camera.resolution();
                log::info!(
                    "camera {index} streaming at {}x{}",
                    resolution.width(),
                    resolution.height()
                );

                while !stop_flag.load(Ordering::Relaxed) {
                    let buffer = match camera.frame() {
                        Ok(buffer) => buffer,
                        Err(err) => {
                            log::warn!("camera frame read failed: {err:?}");
                            continue;
                        }
                    };
                    let rgb = match buffer.decode_image::<RgbFormat>() {
                        Ok(rgb) => rgb,
                        Err(err) => {
                            log::warn!("failed to decode camera frame: {err:?}");
                            continue;
                        }
                    };
                    let (width, height) = (rgb.width(), rgb.height());
                    let Some(rgba) = rgb_to_rgba(width, height, rgb.into_raw()) else {
                        log::warn!("camera frame buffer size mismatch");
                        continue;
                    };
                    // Keep only the newest frame when the pipeline is busy.
                    let _ = frame_tx.try_send(rgba);
                }
            })?;

        Ok(Self {
            frames,
            stop,
            handle: Some(handle),
        })
    }
}

/// nokhwa's decoded buffer can belong to another `image` release, so the
/// conversion starts from raw bytes.
fn rgb_to_rgba(width: u32, height: u32, rgb: Vec<u8>) -> Option<RgbaImage> {
    let rgb = RgbImage::from_raw(width, height, rgb)?;
    Some(DynamicImage::ImageRgb8(rgb).into_rgba8())
}

impl CaptureSource for NokhwaCapture {
    fn get_frame(&mut self) -> Result<Option<RgbaImage>> {
        match self.frames.recv_timeout(FRAME_WAIT) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(anyhow!("camera stream ended")),
        }
    }
}

impl Drop for NokhwaCapture {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
