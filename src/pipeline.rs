//! The demux → decode → seek → scale pipeline.
//!
//! One call to [`run`] performs a single extraction, strictly in order:
//! open container, select video stream, open decoder, seek, decode the
//! nearest frame, close decoder and container, scale, package. Every native
//! object lives in a [`ResourceHandle`], so any failure or cancellation
//! releases what was opened so far before the error is returned. The
//! container and decoder are closed before scaling starts so the
//! demuxer/decoder buffers never coexist with the scaling buffers.

use std::{path::Path, sync::Arc};

use crate::{
    backend::{
        DecodedFrame, DemuxContainer, FrameDecoder, MediaBackend, MediaPacket, Received,
        VideoStreamDescriptor,
    },
    configuration::ExtractOptions,
    error::ThumbnailError,
    progress::CancellationToken,
    request::ExtractionRequest,
    resource::{ResourceHandle, ResourceKind, ResourceLedger},
    scaler,
    seek::{SeekPrecision, SeekStrategy},
    thumbnail::{self, DeferredReply},
    utilities::pts_to_duration,
};

/// Open the container at `path`.
///
/// # Errors
///
/// Returns [`ThumbnailError::OpenFailed`] if the file cannot be opened or
/// its stream info cannot be read.
pub fn open<B: MediaBackend>(
    backend: &B,
    path: &Path,
    ledger: &Arc<ResourceLedger>,
) -> Result<ResourceHandle<B::Container>, ThumbnailError> {
    log::debug!("Opening media file: {}", path.display());
    let container = backend.open(path)?;
    Ok(ResourceHandle::new(ResourceKind::Container, container, ledger))
}

/// Pick the container's best video stream.
///
/// # Errors
///
/// Returns [`ThumbnailError::NoVideoStream`] if the container has none.
pub fn select_video_stream<B: MediaBackend>(
    backend: &B,
    container: &B::Container,
    path: &Path,
) -> Result<VideoStreamDescriptor, ThumbnailError> {
    let stream = backend.select_video_stream(container, path)?;
    log::debug!(
        "Selected video stream {} ({}, {}x{}, time base {})",
        stream.index,
        stream.codec,
        stream.width,
        stream.height,
        stream.time_base
    );
    Ok(stream)
}

/// Open a decoder for `stream`.
///
/// # Errors
///
/// Returns [`ThumbnailError::CodecOpenFailed`] if the decoder cannot be
/// initialised.
pub fn open_decoder<B: MediaBackend>(
    backend: &B,
    container: &B::Container,
    stream: &VideoStreamDescriptor,
    ledger: &Arc<ResourceLedger>,
) -> Result<ResourceHandle<B::Decoder>, ThumbnailError> {
    let decoder = backend.open_decoder(container, stream)?;
    Ok(ResourceHandle::new(ResourceKind::Decoder, decoder, ledger))
}

/// Decode one frame near `target` after the container has been positioned.
///
/// Reads packets of the selected stream only. "Needs more input" from the
/// decoder advances to the next packet; real decoder errors abort. With
/// [`SeekPrecision::Keyframe`] the first complete frame is returned. With
/// [`SeekPrecision::Accurate`] decoding continues to the first frame whose
/// pts is at or after `target`; if the stream ends first, the last decoded
/// frame is returned.
///
/// `cancellation` is checked before every packet of the selected stream.
///
/// # Errors
///
/// Returns [`ThumbnailError::DecodeFailed`] if no frame could be decoded,
/// or [`ThumbnailError::Cancelled`].
pub fn decode_nearest<C, D>(
    container: &mut C,
    decoder: &mut D,
    stream: &VideoStreamDescriptor,
    target: i64,
    precision: SeekPrecision,
    ledger: &Arc<ResourceLedger>,
    cancellation: &CancellationToken,
) -> Result<ResourceHandle<D::Frame>, ThumbnailError>
where
    C: DemuxContainer,
    D: FrameDecoder<Packet = C::Packet>,
{
    let mut candidate: Option<ResourceHandle<D::Frame>> = None;

    while let Some(packet) = container.read_packet()? {
        if packet.stream_index() != stream.index {
            continue;
        }
        cancellation.check()?;
        decoder.send_packet(&packet)?;
        drop(packet);

        loop {
            match decoder.receive_frame()? {
                Received::Frame(frame) => {
                    let frame = ResourceHandle::new(ResourceKind::RawFrame, frame, ledger);
                    if accept(&*frame, target, precision) {
                        return Ok(finish(frame, stream));
                    }
                    // Replacing the candidate releases the previous frame.
                    candidate = Some(frame);
                }
                Received::NeedMoreInput => break,
                Received::EndOfStream => {
                    return candidate
                        .map(|frame| finish(frame, stream))
                        .ok_or_else(no_frame_error);
                }
            }
        }
    }

    decoder.send_eof()?;
    loop {
        match decoder.receive_frame()? {
            Received::Frame(frame) => {
                let frame = ResourceHandle::new(ResourceKind::RawFrame, frame, ledger);
                if accept(&*frame, target, precision) {
                    return Ok(finish(frame, stream));
                }
                candidate = Some(frame);
            }
            Received::NeedMoreInput | Received::EndOfStream => break,
        }
    }

    candidate
        .map(|frame| finish(frame, stream))
        .ok_or_else(no_frame_error)
}

fn accept<F: DecodedFrame>(frame: &F, target: i64, precision: SeekPrecision) -> bool {
    match precision {
        SeekPrecision::Keyframe => true,
        // Frames without a pts cannot be placed; take them rather than scan forever.
        SeekPrecision::Accurate => frame.pts().is_none_or(|pts| pts >= target),
    }
}

fn finish<F: DecodedFrame>(
    frame: ResourceHandle<F>,
    stream: &VideoStreamDescriptor,
) -> ResourceHandle<F> {
    log::debug!(
        "Decoded {}x{} frame at {:?}",
        frame.width(),
        frame.height(),
        frame
            .pts()
            .map(|pts| pts_to_duration(pts.saturating_sub(stream.start_time), stream.time_base))
    );
    frame
}

fn no_frame_error() -> ThumbnailError {
    ThumbnailError::DecodeFailed("no frame could be decoded after seeking".to_string())
}

/// Run one complete extraction.
///
/// `cancellation` is checked between steps; a cancelled run releases
/// everything it opened and returns [`ThumbnailError::Cancelled`].
///
/// # Errors
///
/// Any of the pipeline error kinds. Failures are terminal for this request
/// and are never retried internally.
pub fn run<B: MediaBackend>(
    backend: &B,
    request: &ExtractionRequest,
    options: &ExtractOptions,
    ledger: &Arc<ResourceLedger>,
    cancellation: &CancellationToken,
) -> Result<DeferredReply, ThumbnailError> {
    let path = request.file_path();
    let strategy = SeekStrategy::new(options.position_percent());

    cancellation.check()?;
    let raw_frame = {
        let mut container = open(backend, path, ledger)?;
        cancellation.check()?;
        let stream = select_video_stream(backend, &container, path)?;
        let mut decoder = open_decoder(backend, &container, &stream, ledger)?;
        cancellation.check()?;

        let target = strategy.target_timestamp(&stream, container.duration());
        strategy.seek(&mut *container, &mut *decoder, &stream, target)?;
        cancellation.check()?;

        let frame = decode_nearest(
            &mut *container,
            &mut *decoder,
            &stream,
            target,
            options.seek_precision(),
            ledger,
            cancellation,
        )?;
        decoder.close();
        container.close();
        frame
    };

    cancellation.check()?;
    let output = scaler::scale(
        backend,
        raw_frame,
        request.maximum_logical_size(),
        request.display_scale_factor(),
        options.max_output_pixels(),
    )?;
    let output = ResourceHandle::new(ResourceKind::OutputFrame, output, ledger);

    Ok(thumbnail::package(output, request.display_scale_factor()))
}
