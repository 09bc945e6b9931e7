use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Sender};
use image::RgbaImage;
use odscapture::{CubeFace, CubicFrame, FrameSink, StereoFrame};

/// Strips queued ahead of the writer before `consume` blocks.
const WRITE_QUEUE_DEPTH: usize = 2;

struct PendingWrite {
    path: PathBuf,
    image: RgbaImage,
}

/// Writes every stereo frame as one PNG: the six faces side by side, left eye
/// on the top row, right eye below.
///
/// Encoding happens on a background thread so the capture loop only pays for
/// assembling the strip.
pub struct PngStripSink {
    directory: PathBuf,
    sender: Option<Sender<PendingWrite>>,
    writer: Option<JoinHandle<Result<usize>>>,
    written: Vec<PathBuf>,
}

impl PngStripSink {
    pub fn create(directory: &Path) -> Result<Self> {
        fs::create_dir_all(directory).with_context(|| {
            format!("failed to create output directory {}", directory.display())
        })?;

        let (sender, receiver) = bounded::<PendingWrite>(WRITE_QUEUE_DEPTH);
        let writer = thread::Builder::new()
            .name("odscap-png".into())
            .spawn(move || -> Result<usize> {
                let mut count = 0;
                for pending in receiver {
                    pending
                        .image
                        .save_with_format(&pending.path, image::ImageFormat::Png)
                        .with_context(|| format!("failed to write {}", pending.path.display()))?;
                    tracing::debug!(path = %pending.path.display(), "wrote frame strip");
                    count += 1;
                }
                Ok(count)
            })
            .context("failed to spawn PNG writer thread")?;

        Ok(Self {
            directory: directory.to_path_buf(),
            sender: Some(sender),
            writer: Some(writer),
            written: Vec::new(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Files handed to the writer so far.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn join_writer(&mut self) -> Result<usize> {
        self.sender = None;
        match self.writer.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow!("PNG writer thread panicked"))?,
            None => Ok(0),
        }
    }
}

pub fn frame_file_name(frame_id: u32) -> String {
    format!("frame-{frame_id:05}.png")
}

/// Lays both eyes out as a `6w x 2h` strip.
pub fn stereo_strip(frame: &StereoFrame) -> Result<RgbaImage> {
    let (width, height) = frame.left().face_size();
    let strip_width = width * CubeFace::ALL.len() as u32;
    let row_bytes = width as usize * 4;
    let mut bytes = Vec::with_capacity(strip_width as usize * height as usize * 2 * 4);
    for cubic in [frame.left(), frame.right()] {
        append_eye_rows(&mut bytes, cubic, row_bytes)?;
    }
    RgbaImage::from_raw(strip_width, height * 2, bytes)
        .ok_or_else(|| anyhow!("frame {} strip has the wrong size", frame.frame_id()))
}

fn append_eye_rows(bytes: &mut Vec<u8>, cubic: &CubicFrame, row_bytes: usize) -> Result<()> {
    let (_, height) = cubic.face_size();
    for y in 0..height as usize {
        for face in cubic.faces() {
            let pixels: &[u8] = bytemuck::cast_slice(face.pixels());
            let row = pixels
                .get(y * row_bytes..(y + 1) * row_bytes)
                .ok_or_else(|| anyhow!("{} face is missing row {y}", face.face()))?;
            bytes.extend_from_slice(row);
        }
    }
    Ok(())
}

impl FrameSink<StereoFrame> for PngStripSink {
    fn consume(&mut self, frame: StereoFrame) -> Result<()> {
        let path = self.directory.join(frame_file_name(frame.frame_id()));
        let image = stereo_strip(&frame)?;
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("PNG sink already finished"))?;
        if sender
            .send(PendingWrite {
                path: path.clone(),
                image,
            })
            .is_err()
        {
            // The writer only hangs up after failing; surface its error.
            self.join_writer()?;
            return Err(anyhow!("PNG writer stopped unexpectedly"));
        }
        self.written.push(path);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let count = self.join_writer()?;
        tracing::debug!(count, directory = %self.directory.display(), "PNG writer drained");
        Ok(())
    }
}

impl Drop for PngStripSink {
    fn drop(&mut self) {
        if self.writer.is_some() {
            if let Err(err) = self.join_writer() {
                tracing::warn!(error = %format!("{err:#}"), "PNG writer failed during shutdown");
            }
        }
    }
}
