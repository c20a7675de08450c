use std::path::Path;
use std::sync::OnceLock;

use anyhow::Context as _;

use ffmpeg::util::frame::{audio::Audio, video::Video};
use ffmpeg_next::{
    self as ffmpeg, channel_layout, codec, decoder, encoder, filter, format, media, picture,
    software, Dictionary, Error, Frame, Packet, Rational,
};
use tracing::debug;

use crate::config::{AudioCodec, VideoCodec};

const FALLBACK_AUDIO_BIT_RATE: usize = 128_000;

/// Marks a pipeline error as coming from the input side: a stream that has
/// no decoder, or packets the decoder rejects. Anything else is on the
/// encoding side.
#[derive(thiserror::Error, Debug)]
#[error("cannot decode input stream {stream}")]
pub(crate) struct DecodeError {
    pub(crate) stream: usize,
}

static INIT: OnceLock<Result<(), Error>> = OnceLock::new();

/// Initializes ffmpeg once per process and quiets its own logger.
pub fn init() -> Result<(), Error> {
    *INIT.get_or_init(|| {
        ffmpeg::init()?;
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
        Ok(())
    })
}

fn open_decoder(input_stream: &format::stream::Stream) -> anyhow::Result<decoder::Decoder> {
    codec::context::Context::from_parameters(input_stream.parameters())
        .map(|context| context.decoder())
        .context(DecodeError {
            stream: input_stream.index(),
        })
}

trait Transcoder {
    fn output_stream_index(&self) -> usize;

    fn flush_filter_graph(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn receive_and_process_filtered_frames(
        &mut self,
        _output: &mut format::context::Output,
        _output_stream_time_base: Rational,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn send_packet_to_decoder(&mut self, packet: &Packet) -> anyhow::Result<()>;

    fn send_eof_to_decoder(&mut self) -> anyhow::Result<()>;

    fn receive_and_process_decoded_frames(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> anyhow::Result<()>;

    fn send_eof_to_encoder(&mut self) -> anyhow::Result<()>;

    fn receive_and_process_encoded_packets(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> anyhow::Result<()>;
}

/// Re-encodes one video stream. Frames not already in YUV 4:2:0 are
/// converted first so the output plays in browsers.
struct VideoTranscoder {
    output_stream_index: usize,
    decoder: decoder::Video,
    encoder: encoder::Video,
    scaler: Option<software::scaling::context::Context>,
    input_time_base: Rational,
}

impl VideoTranscoder {
    fn new(
        input_stream: &format::stream::Stream,
        output: &mut format::context::Output,
        output_stream_index: usize,
        video_codec: VideoCodec,
    ) -> anyhow::Result<Self> {
        let global_header = output
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);
        let decoder = open_decoder(input_stream)?
            .video()
            .context(DecodeError {
                stream: input_stream.index(),
            })?;

        let codec = encoder::find(video_codec.id());
        let mut output_stream = output.add_stream(codec)?;
        let mut encoder = codec::context::Context::new_with_codec(
            codec.ok_or(anyhow::anyhow!(Error::EncoderNotFound))?,
        )
        .encoder()
        .video()?;
        encoder.set_height(decoder.height());
        encoder.set_width(decoder.width());
        encoder.set_aspect_ratio(decoder.aspect_ratio());
        encoder.set_format(format::Pixel::YUV420P);
        encoder.set_frame_rate(decoder.frame_rate());
        encoder.set_time_base(input_stream.time_base());

        if global_header {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut opts = Dictionary::new();
        opts.set("preset", "medium");

        let opened_encoder = encoder.open_with(opts)?;
        output_stream.set_parameters(&opened_encoder);

        let scaler = if decoder.format() != format::Pixel::YUV420P {
            debug!(from = ?decoder.format(), "Converting pixel format to yuv420p");
            Some(software::scaling::context::Context::get(
                decoder.format(),
                decoder.width(),
                decoder.height(),
                format::Pixel::YUV420P,
                decoder.width(),
                decoder.height(),
                software::scaling::Flags::BILINEAR,
            )?)
        } else {
            None
        };

        Ok(Self {
            output_stream_index,
            decoder,
            encoder: opened_encoder,
            scaler,
            input_time_base: input_stream.time_base(),
        })
    }
}

impl Transcoder for VideoTranscoder {
    fn output_stream_index(&self) -> usize {
        self.output_stream_index
    }

    fn send_packet_to_decoder(&mut self, packet: &Packet) -> anyhow::Result<()> {
        self.decoder
            .send_packet(packet)
            .map_err(anyhow::Error::from)
    }

    fn send_eof_to_decoder(&mut self) -> anyhow::Result<()> {
        self.decoder.send_eof().map_err(anyhow::Error::from)
    }

    fn receive_and_process_decoded_frames(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> anyhow::Result<()> {
        let mut frame = Video::empty();
        while self.decoder.receive_frame(&mut frame).is_ok() {
            let timestamp = frame.timestamp().or(frame.pts());
            let mut scaled = Video::empty();
            let frame = match self.scaler.as_mut() {
                Some(scaler) => {
                    scaler.run(&frame, &mut scaled)?;
                    &mut scaled
                }
                None => &mut frame,
            };
            frame.set_pts(timestamp);
            frame.set_kind(picture::Type::None);
            self.encoder.send_frame(&*frame)?;
            self.receive_and_process_encoded_packets(output, output_stream_time_base)?;
        }
        Ok(())
    }

    fn send_eof_to_encoder(&mut self) -> anyhow::Result<()> {
        self.encoder.send_eof().map_err(anyhow::Error::from)
    }

    fn receive_and_process_encoded_packets(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> anyhow::Result<()> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.output_stream_index);
            packet.rescale_ts(self.input_time_base, output_stream_time_base);
            packet.write_interleaved(output)?;
        }
        Ok(())
    }
}

/// Re-encodes one audio stream through an `anull` filter graph whose sink
/// resamples to whatever the target encoder accepts.
struct AudioTranscoder {
    output_stream_index: usize,
    decoder: decoder::Audio,
    encoder: encoder::Audio,
    filter_graph: filter::Graph,
    input_time_base: Rational,
}

impl AudioTranscoder {
    fn new(
        input_stream: &format::stream::Stream,
        output: &mut format::context::Output,
        output_stream_index: usize,
        audio_codec: AudioCodec,
    ) -> anyhow::Result<Self> {
        let global_header = output
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);
        let input_time_base = input_stream.time_base();
        let decoder = open_decoder(input_stream)?
            .audio()
            .context(DecodeError {
                stream: input_stream.index(),
            })?;

        let codec = encoder::find(audio_codec.id())
            .ok_or(anyhow::anyhow!(Error::EncoderNotFound))?
            .audio()?;
        let mut output_stream = output.add_stream(codec)?;
        let context = codec::context::Context::from_parameters(output_stream.parameters())?;
        let mut encoder = context.encoder().audio()?;

        if global_header {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let channel_layout = codec
            .channel_layouts()
            .map(|layouts| layouts.best(decoder.channel_layout().channels()))
            .unwrap_or(channel_layout::ChannelLayout::STEREO);

        encoder.set_channel_layout(channel_layout);
        encoder.set_rate(decoder.rate() as _);
        encoder.set_format(
            codec
                .formats()
                .ok_or(anyhow::anyhow!("Unknown supported formats"))?
                .next()
                .ok_or(anyhow::anyhow!("Failed to get sample format"))?,
        );
        let bit_rate = match decoder.bit_rate() {
            0 => FALLBACK_AUDIO_BIT_RATE,
            rate => rate,
        };
        encoder.set_bit_rate(bit_rate);
        encoder.set_max_bit_rate(decoder.max_bit_rate());
        encoder.set_time_base(input_time_base);
        output_stream.set_time_base(input_time_base);

        let opened_encoder = encoder.open_as(codec)?;
        output_stream.set_parameters(&opened_encoder);

        let filter_graph = Self::filter_graph("anull", input_time_base, &decoder, &opened_encoder)?;

        Ok(Self {
            output_stream_index,
            decoder,
            encoder: opened_encoder,
            filter_graph,
            input_time_base,
        })
    }

    fn filter_graph(
        spec: &str,
        time_base: Rational,
        decoder: &codec::decoder::Audio,
        encoder: &codec::encoder::Audio,
    ) -> anyhow::Result<filter::Graph> {
        let mut filter_graph = filter::Graph::new();

        let args = format!(
            "time_base={}:sample_rate={}:sample_fmt={}:channel_layout=0x{:x}",
            time_base,
            decoder.rate(),
            decoder.format().name(),
            decoder.channel_layout().bits()
        );

        filter_graph.add(
            &filter::find("abuffer").ok_or(anyhow::anyhow!("Failed to find filter"))?,
            "in",
            &args,
        )?;
        filter_graph.add(
            &filter::find("abuffersink").ok_or(anyhow::anyhow!("Failed to find filter"))?,
            "out",
            "",
        )?;

        {
            let mut out = filter_graph
                .get("out")
                .ok_or(anyhow::anyhow!("Failed to get filter"))?;
            out.set_sample_format(encoder.format());
            out.set_channel_layout(encoder.channel_layout());
            out.set_sample_rate(encoder.rate());
        }

        filter_graph.output("in", 0)?.input("out", 0)?.parse(spec)?;
        filter_graph.validate()?;

        debug!(graph = %filter_graph.dump(), "Audio filter graph ready");

        if let Some(codec) = encoder.codec() {
            if !codec
                .capabilities()
                .contains(ffmpeg::codec::capabilities::Capabilities::VARIABLE_FRAME_SIZE)
            {
                filter_graph
                    .get("out")
                    .ok_or(anyhow::anyhow!("Failed to get filter"))?
                    .sink()
                    .set_frame_size(encoder.frame_size());
            }
        }

        Ok(filter_graph)
    }

    fn add_frame_to_filter_graph(&mut self, frame: &Frame) -> anyhow::Result<()> {
        self.filter_graph
            .get("in")
            .ok_or(anyhow::anyhow!("Failed to get filter"))?
            .source()
            .add(frame)
            .map_err(|e| anyhow::anyhow!(e))
    }
}

impl Transcoder for AudioTranscoder {
    fn output_stream_index(&self) -> usize {
        self.output_stream_index
    }

    fn flush_filter_graph(&mut self) -> anyhow::Result<()> {
        self.filter_graph
            .get("in")
            .ok_or(anyhow::anyhow!("Failed to get filter"))?
            .source()
            .flush()
            .map_err(|e| anyhow::anyhow!(e))
    }

    fn receive_and_process_filtered_frames(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> anyhow::Result<()> {
        let mut frame = Audio::empty();
        while self
            .filter_graph
            .get("out")
            .ok_or(anyhow::anyhow!("Failed to get filter"))?
            .sink()
            .frame(&mut frame)
            .is_ok()
        {
            self.encoder.send_frame(&frame)?;
            self.receive_and_process_encoded_packets(output, output_stream_time_base)?;
        }
        Ok(())
    }

    fn send_packet_to_decoder(&mut self, packet: &Packet) -> anyhow::Result<()> {
        self.decoder
            .send_packet(packet)
            .map_err(anyhow::Error::from)
    }

    fn send_eof_to_decoder(&mut self) -> anyhow::Result<()> {
        self.decoder.send_eof().map_err(anyhow::Error::from)
    }

    fn receive_and_process_decoded_frames(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> anyhow::Result<()> {
        let mut frame = Audio::empty();
        while self.decoder.receive_frame(&mut frame).is_ok() {
            let timestamp = frame.timestamp().or(frame.pts());
            frame.set_pts(timestamp);
            self.add_frame_to_filter_graph(&frame)?;
            self.receive_and_process_filtered_frames(output, output_stream_time_base)?;
        }
        Ok(())
    }

    fn send_eof_to_encoder(&mut self) -> anyhow::Result<()> {
        self.encoder.send_eof().map_err(anyhow::Error::from)
    }

    fn receive_and_process_encoded_packets(
        &mut self,
        output: &mut format::context::Output,
        output_stream_time_base: Rational,
    ) -> anyhow::Result<()> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.output_stream_index);
            packet.rescale_ts(self.input_time_base, output_stream_time_base);
            packet.write_interleaved(output)?;
        }
        Ok(())
    }
}

/// Decodes every audio and video stream of `input`, re-encodes it with the
/// given codecs and muxes the result into a fresh file at `output_path`.
///
/// Streams of any other kind (timed metadata, subtitles, cover art) are
/// dropped. The container is chosen from `output_path`'s extension.
pub(crate) fn transcode_file(
    input: &mut format::context::Input,
    output_path: &Path,
    video_codec: VideoCodec,
    audio_codec: AudioCodec,
) -> anyhow::Result<()> {
    let mut output = format::output(&output_path)?;
    let mut transcoders: Vec<Option<Box<dyn Transcoder>>> = Vec::new();

    let mut output_stream_index = 0;
    for ist in input.streams() {
        let attached_picture = ist
            .disposition()
            .contains(format::stream::Disposition::ATTACHED_PIC);
        let transcoder: Option<Box<dyn Transcoder>> = match ist.parameters().medium() {
            media::Type::Video if !attached_picture => Some(Box::new(VideoTranscoder::new(
                &ist,
                &mut output,
                output_stream_index,
                video_codec,
            )?)),
            media::Type::Audio => Some(Box::new(AudioTranscoder::new(
                &ist,
                &mut output,
                output_stream_index,
                audio_codec,
            )?)),
            medium => {
                debug!(stream = ist.index(), ?medium, "Dropping stream");
                None
            }
        };
        if transcoder.is_some() {
            output_stream_index += 1;
        }
        transcoders.push(transcoder);
    }
    if output_stream_index == 0 {
        anyhow::bail!(Error::StreamNotFound);
    }

    output.set_metadata(input.metadata().to_owned());

    let mut muxer_opts = Dictionary::new();
    muxer_opts.set("movflags", "+faststart");
    output.write_header_with(muxer_opts)?;

    let output_stream_time_base: Vec<Rational> =
        output.streams().map(|ost| ost.time_base()).collect();

    for (ist, packet) in input.packets() {
        let Some(transcoder) = transcoders.get_mut(ist.index()).and_then(Option::as_mut) else {
            continue;
        };
        let ost_time_base = output_stream_time_base[transcoder.output_stream_index()];
        transcoder
            .send_packet_to_decoder(&packet)
            .context(DecodeError { stream: ist.index() })?;
        transcoder.receive_and_process_decoded_frames(&mut output, ost_time_base)?;
    }

    for (stream, transcoder) in transcoders.iter_mut().enumerate() {
        let Some(transcoder) = transcoder else {
            continue;
        };
        let ost_time_base = output_stream_time_base[transcoder.output_stream_index()];
        transcoder
            .send_eof_to_decoder()
            .context(DecodeError { stream })?;
        transcoder.receive_and_process_decoded_frames(&mut output, ost_time_base)?;
        transcoder.flush_filter_graph()?;
        transcoder.receive_and_process_filtered_frames(&mut output, ost_time_base)?;
        transcoder.send_eof_to_encoder()?;
        transcoder.receive_and_process_encoded_packets(&mut output, ost_time_base)?;
    }

    output.write_trailer()?;

    Ok(())
}
