use crate::error::PipelineError;
use crate::frame::Frame;
use failure::Error;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

const FRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// Produces decoded frames in order, numbering them from 1. Dropping the
/// source releases whatever it holds open.
pub trait FrameSource: Send {
    /// `Ok(None)` marks the end of the stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, Error>;
}

/// Opens a video file, or a directory of still frames.
pub fn open(path: &Path) -> Result<Box<dyn FrameSource>, PipelineError> {
    if !path.exists() {
        return Err(PipelineError::unavailable(path, "no such file or directory"));
    }
    if path.is_dir() {
        let source = ImageSequence::open(path).map_err(|e| PipelineError::unavailable(path, e))?;
        return Ok(Box::new(source));
    }
    open_video(path)
}

#[cfg(feature = "ffmpeg")]
fn open_video(path: &Path) -> Result<Box<dyn FrameSource>, PipelineError> {
    let source = ffmpeg::FfmpegVideo::open(path).map_err(|e| PipelineError::unavailable(path, e))?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_video(path: &Path) -> Result<Box<dyn FrameSource>, PipelineError> {
    Err(PipelineError::unavailable(
        path,
        "decoding video files requires building with the `ffmpeg` feature",
    ))
}

/// Fails when single video files cannot be decoded by this build. Only frame
/// directories are readable without the `ffmpeg` feature.
#[cfg(feature = "ffmpeg")]
pub fn ensure_decodes_files(_extension: &str) -> Result<(), Error> {
    Ok(())
}

#[cfg(not(feature = "ffmpeg"))]
pub fn ensure_decodes_files(extension: &str) -> Result<(), Error> {
    bail!(
        "unable to decode *.{} files: rebuild with the `ffmpeg` feature",
        extension
    )
}

/// A directory of still frames, played back in file name order.
pub struct ImageSequence {
    files: std::vec::IntoIter<PathBuf>,
    ordinal: u64,
}

impl ImageSequence {
    pub fn open(dir: &Path) -> Result<Self, Error> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && is_frame_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        info!("Opened {} frames from {}", files.len(), dir.display());
        Ok(ImageSequence {
            files: files.into_iter(),
            ordinal: 0,
        })
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| {
            FRAME_EXTENSIONS.iter().any(|f| e.eq_ignore_ascii_case(f))
        })
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
        let path = match self.files.next() {
            Some(path) => path,
            None => return Ok(None),
        };
        self.ordinal += 1;
        debug!("Reading frame {} from {}", self.ordinal, path.display());
        let image = image::open(&path)
            .map_err(|e| format_err!("Unable to decode {}: {}", path.display(), e))?
            .to_rgb8();
        Ok(Some(Frame::new(self.ordinal, image)))
    }
}

#[cfg(feature = "ffmpeg")]
mod ffmpeg {
    use super::FrameSource;
    use crate::frame::Frame;
    use failure::Error;
    use ffmpeg_next as ff;
    use image::RgbImage;
    use log::info;
    use std::collections::VecDeque;
    use std::path::Path;

    /// Decodes the best video stream of a file to RGB.
    pub struct FfmpegVideo {
        input: ff::format::context::Input,
        stream_index: usize,
        decoder: ff::codec::decoder::Video,
        scaler: ff::software::scaling::Context,
        decoded: VecDeque<Frame>,
        ordinal: u64,
        flushed: bool,
    }

    impl FfmpegVideo {
        pub fn open(path: &Path) -> Result<Self, Error> {
            ff::init()?;
            let input = ff::format::input(&path)?;
            let stream = input
                .streams()
                .best(ff::media::Type::Video)
                .ok_or_else(|| format_err!("{} has no video stream", path.display()))?;
            let stream_index = stream.index();
            let context = ff::codec::context::Context::from_parameters(stream.parameters())?;
            let decoder = context.decoder().video()?;
            let scaler = ff::software::scaling::Context::get(
                decoder.format(),
                decoder.width(),
                decoder.height(),
                ff::util::format::pixel::Pixel::RGB24,
                decoder.width(),
                decoder.height(),
                ff::software::scaling::flag::Flags::BILINEAR,
            )?;
            info!(
                "Opened {} ({}x{})",
                path.display(),
                decoder.width(),
                decoder.height()
            );
            Ok(FfmpegVideo {
                input,
                stream_index,
                decoder,
                scaler,
                decoded: VecDeque::new(),
                ordinal: 0,
                flushed: false,
            })
        }

        fn receive_frames(&mut self) -> Result<(), Error> {
            let mut decoded = ff::frame::Video::empty();
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb = ff::frame::Video::empty();
                self.scaler.run(&decoded, &mut rgb)?;
                self.ordinal += 1;
                self.decoded
                    .push_back(Frame::new(self.ordinal, to_rgb_image(&rgb)?));
            }
            Ok(())
        }
    }

    impl FrameSource for FfmpegVideo {
        fn next_frame(&mut self) -> Result<Option<Frame>, Error> {
            loop {
                if let Some(frame) = self.decoded.pop_front() {
                    return Ok(Some(frame));
                }
                if self.flushed {
                    return Ok(None);
                }
                let mut sent = false;
                for (stream, packet) in self.input.packets() {
                    if stream.index() == self.stream_index {
                        self.decoder.send_packet(&packet)?;
                        sent = true;
                        break;
                    }
                }
                if !sent {
                    self.decoder.send_eof()?;
                    self.flushed = true;
                }
                self.receive_frames()?;
            }
        }
    }

    // Rows may be padded past width * 3.
    fn to_rgb_image(frame: &ff::frame::Video) -> Result<RgbImage, Error> {
        let (width, height) = (frame.width(), frame.height());
        let row = width as usize * 3;
        let stride = frame.stride(0);
        let data = frame.data(0);
        let mut pixels = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            let start = y * stride;
            let line = data
                .get(start..start + row)
                .ok_or_else(|| format_err!("frame row {} is out of bounds", y))?;
            pixels.extend_from_slice(line);
        }
        RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| format_err!("frame buffer does not match {}x{}", width, height))
    }
}
