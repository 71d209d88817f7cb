//! FFmpeg stream backend for local files and network URLs (rtsp://, http://).
//!
//! `connect` opens the input and builds the decoder; `release` drops both, so
//! a reconnect always starts from a fresh demuxer. Frames are scaled to RGB24
//! in-memory.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use super::StreamBackend;
use crate::frame::RawImage;

struct Session {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    eof_sent: bool,
}

impl Session {
    /// Pop one buffered frame from the decoder, scaled to RGB.
    fn take_frame(&mut self) -> Result<Option<RawImage>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        // Again (needs more input) and Eof both mean nothing is buffered.
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        Ok(Some(RawImage::new(pixels, width, height)))
    }
}

pub struct FfmpegStream {
    url: String,
    session: Option<Session>,
}

impl FfmpegStream {
    pub fn new(url: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        Ok(Self {
            url: url.to_string(),
            session: None,
        })
    }

    fn open(&self) -> Result<Session> {
        let input = ffmpeg::format::input(&self.url)
            .with_context(|| format!("failed to open input '{}' with ffmpeg", self.url))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("input '{}' has no video track", self.url))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Session {
            input,
            stream_index,
            decoder,
            scaler,
            eof_sent: false,
        })
    }
}

impl StreamBackend for FfmpegStream {
    fn connect(&mut self) -> Result<()> {
        self.session = Some(self.open()?);
        log::info!("stream {} opened (ffmpeg)", self.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<RawImage> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow!("stream {} is not connected", self.url))?;

        // A packet can yield several frames; drain those first.
        if let Some(image) = session.take_frame()? {
            return Ok(image);
        }

        while !session.eof_sent {
            let next = session
                .input
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            let Some((index, packet)) = next else {
                session
                    .decoder
                    .send_eof()
                    .context("flush ffmpeg decoder")?;
                session.eof_sent = true;
                break;
            };
            if index != session.stream_index {
                continue;
            }

            session
                .decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;

            if let Some(image) = session.take_frame()? {
                return Ok(image);
            }
        }

        // Frames the decoder held back until end of stream.
        if let Some(image) = session.take_frame()? {
            return Ok(image);
        }

        anyhow::bail!("stream {} ended", self.url)
    }

    fn release(&mut self) {
        self.session = None;
    }

    fn describe(&self) -> String {
        format!("ffmpeg:{}", self.url)
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
