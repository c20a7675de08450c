//! Poster stills for the player: the first decodable video frame of a
//! recording, written as a JPEG.

use std::io::Write;
use std::path::Path;

use anyhow::Context as _;
use ffmpeg::util::frame::video::Video;
use ffmpeg_next::{self as ffmpeg, codec, format, media, software, Error};
use image::codecs::jpeg;
use image::ImageBuffer;

const POSTER_QUALITY: u8 = 90;

pub fn write_poster(video_path: &Path, poster_path: &Path) -> anyhow::Result<()> {
    crate::transcode::init()?;
    let mut input = format::input(video_path)?;

    let video_stream = input
        .streams()
        .best(media::Type::Video)
        .ok_or(anyhow::anyhow!(Error::StreamNotFound))?;
    let video_stream_index = video_stream.index();
    let mut decoder = codec::context::Context::from_parameters(video_stream.parameters())?
        .decoder()
        .video()?;

    let mut decoded = Video::empty();
    let mut found = false;
    for (stream, packet) in input.packets() {
        if stream.index() != video_stream_index {
            continue;
        }
        decoder.send_packet(&packet)?;
        if decoder.receive_frame(&mut decoded).is_ok() {
            found = true;
            break;
        }
    }
    if !found {
        decoder.send_eof()?;
        found = decoder.receive_frame(&mut decoded).is_ok();
    }
    anyhow::ensure!(found, "no decodable video frame in {}", video_path.display());

    let jpeg_data = encode_jpeg(&decoded)?;

    let parent = poster_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut file = tempfile::Builder::new()
        .prefix(".poster-")
        .suffix(".jpg")
        .tempfile_in(parent)
        .with_context(|| format!("Failed to create poster in {}", parent.display()))?;
    file.write_all(&jpeg_data)?;
    file.persist(poster_path)?;
    Ok(())
}

fn encode_jpeg(decoded: &Video) -> anyhow::Result<Vec<u8>> {
    let mut scaler = software::scaling::context::Context::get(
        decoded.format(),
        decoded.width(),
        decoded.height(),
        format::Pixel::RGB24,
        decoded.width(),
        decoded.height(),
        software::scaling::Flags::BILINEAR,
    )?;
    let mut rgb_frame = Video::empty();
    scaler.run(decoded, &mut rgb_frame)?;

    // Rows are padded to the line stride.
    let (width, height) = (rgb_frame.width(), rgb_frame.height());
    let row_len = width as usize * 3;
    let stride = rgb_frame.stride(0);
    let pixels: Vec<u8> = rgb_frame
        .data(0)
        .chunks(stride)
        .take(height as usize)
        .flat_map(|row| &row[..row_len])
        .copied()
        .collect();
    let image_buffer = ImageBuffer::<image::Rgb<u8>, _>::from_raw(width, height, pixels)
        .ok_or(anyhow::anyhow!("Failed to create image buffer"))?;

    let mut jpeg_data = Vec::new();
    jpeg::JpegEncoder::new_with_quality(&mut jpeg_data, POSTER_QUALITY).encode(
        &image_buffer,
        image_buffer.width(),
        image_buffer.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(jpeg_data)
}
